// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::{DbError, NewTenant, Stage, TenantStore};
use tracing::info;

use super::{resolve_tenant, StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;

/// Creates the inactive tenant record bound to the reserved namespace.
pub struct CreateTenantStep {
	tenants: Arc<dyn TenantStore>,
}

impl CreateTenantStep {
	pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
		Self { tenants }
	}
}

#[async_trait]
impl StepExecutor for CreateTenantStep {
	fn stage(&self) -> Stage {
		Stage::CreatingTenant
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		if let Some(existing) = self.tenants.find_tenant_by_run(ctx.run_id).await? {
			return Ok(StepOutput::TenantCreated {
				tenant_id: existing.id,
			});
		}

		let request = ctx.request;
		let new_tenant = NewTenant {
			run_id: ctx.run_id,
			company_name: request.company_name.trim().to_string(),
			subdomain: request.subdomain.clone(),
			custom_domain: request.custom_domain.clone(),
			plan_id: request.plan_id.clone(),
			billing_cycle: request.billing_cycle,
		};

		match self.tenants.create_tenant(&new_tenant).await {
			Ok(tenant) => {
				info!(run_id = %ctx.run_id, tenant_id = %tenant.id, "Tenant created");
				Ok(StepOutput::TenantCreated {
					tenant_id: tenant.id,
				})
			}
			// Lost a race with an earlier attempt of this same run.
			Err(DbError::Conflict(what)) => match self.tenants.find_tenant_by_run(ctx.run_id).await? {
				Some(existing) => Ok(StepOutput::TenantCreated {
					tenant_id: existing.id,
				}),
				None => Err(StepError::Conflict(what)),
			},
			Err(e) => Err(e.into()),
		}
	}

	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>) -> Result<(), StepError> {
		let tenant_id = match output {
			Some(StepOutput::TenantCreated { tenant_id }) => Some(*tenant_id),
			_ => resolve_tenant(self.tenants.as_ref(), ctx).await?,
		};
		if let Some(tenant_id) = tenant_id {
			if self.tenants.delete_tenant(tenant_id).await? {
				info!(run_id = %ctx.run_id, tenant_id = %tenant_id, "Tenant deleted");
			}
		}
		Ok(())
	}
}
