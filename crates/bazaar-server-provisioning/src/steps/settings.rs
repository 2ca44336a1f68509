// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::{Stage, TenantSettings, TenantStore};

use super::{resolve_tenant, StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;

/// Writes initial branding and visibility. Upserting makes replays harmless.
pub struct ApplySettingsStep {
	tenants: Arc<dyn TenantStore>,
}

impl ApplySettingsStep {
	pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
		Self { tenants }
	}
}

#[async_trait]
impl StepExecutor for ApplySettingsStep {
	fn stage(&self) -> Stage {
		Stage::ApplyingSettings
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		let tenant_id = ctx.artifacts.require_tenant()?;
		self
			.tenants
			.upsert_settings(&TenantSettings {
				tenant_id,
				display_name: ctx.request.company_name.trim().to_string(),
				primary_color: ctx.request.primary_color.to_lowercase(),
				public_access: ctx.request.public_access,
			})
			.await?;

		Ok(StepOutput::SettingsApplied { tenant_id })
	}

	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>) -> Result<(), StepError> {
		let tenant_id = match output {
			Some(StepOutput::SettingsApplied { tenant_id }) => Some(*tenant_id),
			_ => resolve_tenant(self.tenants.as_ref(), ctx).await?,
		};
		if let Some(tenant_id) = tenant_id {
			self.tenants.delete_settings(tenant_id).await?;
		}
		Ok(())
	}
}
