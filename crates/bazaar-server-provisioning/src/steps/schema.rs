// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::{ProductFieldDefinition, Stage, TenantStore};

use super::{resolve_tenant, StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;

/// Catalogue attributes every new marketplace starts with, in display order.
pub fn default_product_fields() -> Vec<ProductFieldDefinition> {
	[
		("title", "Title", "text", true),
		("description", "Description", "rich_text", false),
		("price", "Price", "currency", true),
		("images", "Images", "image_gallery", false),
		("category", "Category", "category", false),
		("sku", "SKU", "text", false),
		("stock", "Stock", "number", false),
	]
	.into_iter()
	.enumerate()
	.map(|(position, (key, label, field_type, required))| ProductFieldDefinition {
		key: key.to_string(),
		label: label.to_string(),
		field_type: field_type.to_string(),
		required,
		position: position as u32,
	})
	.collect()
}

pub struct ProvisionSchemaStep {
	tenants: Arc<dyn TenantStore>,
}

impl ProvisionSchemaStep {
	pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
		Self { tenants }
	}
}

#[async_trait]
impl StepExecutor for ProvisionSchemaStep {
	fn stage(&self) -> Stage {
		Stage::ProvisioningSchema
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		let tenant_id = ctx.artifacts.require_tenant()?;
		self
			.tenants
			.seed_product_fields(tenant_id, &default_product_fields())
			.await?;
		let field_count = self.tenants.list_product_fields(tenant_id).await?.len() as u32;

		Ok(StepOutput::SchemaProvisioned {
			tenant_id,
			field_count,
		})
	}

	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>) -> Result<(), StepError> {
		let tenant_id = match output {
			Some(StepOutput::SchemaProvisioned { tenant_id, .. }) => Some(*tenant_id),
			_ => resolve_tenant(self.tenants.as_ref(), ctx).await?,
		};
		if let Some(tenant_id) = tenant_id {
			self.tenants.delete_product_fields(tenant_id).await?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_fields_are_ordered_and_unique() {
		let fields = default_product_fields();
		assert_eq!(fields.len(), 7);
		for (i, field) in fields.iter().enumerate() {
			assert_eq!(field.position as usize, i);
		}
		let mut keys: Vec<_> = fields.iter().map(|f| f.key.as_str()).collect();
		keys.sort();
		keys.dedup();
		assert_eq!(keys.len(), 7);

		let required: Vec<_> = fields
			.iter()
			.filter(|f| f.required)
			.map(|f| f.key.as_str())
			.collect();
		assert_eq!(required, vec!["title", "price"]);
	}
}
