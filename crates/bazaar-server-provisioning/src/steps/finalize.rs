// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::{Stage, TenantStatus, TenantStore};
use tracing::info;

use super::{resolve_tenant, StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;
use crate::reservation::NamespaceReservation;

/// The commit point: confirms the namespaces and activates the tenant.
pub struct FinalizeStep {
	tenants: Arc<dyn TenantStore>,
	reservation: NamespaceReservation,
}

impl FinalizeStep {
	pub fn new(tenants: Arc<dyn TenantStore>, reservation: NamespaceReservation) -> Self {
		Self {
			tenants,
			reservation,
		}
	}

	async fn confirm(&self, ctx: &StepContext<'_>, name: &str) -> Result<(), StepError> {
		if self.reservation.confirm(name, ctx.run_id).await? {
			Ok(())
		} else {
			Err(StepError::Unrecoverable(format!(
				"reservation for '{name}' is no longer held by this run"
			)))
		}
	}
}

#[async_trait]
impl StepExecutor for FinalizeStep {
	fn stage(&self) -> Stage {
		Stage::Finalizing
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		let tenant_id = ctx.artifacts.require_tenant()?;

		self.confirm(ctx, &ctx.request.subdomain).await?;
		if let Some(domain) = &ctx.request.custom_domain {
			self.confirm(ctx, domain).await?;
		}

		if !self
			.tenants
			.set_tenant_status(tenant_id, TenantStatus::Active)
			.await?
		{
			return Err(StepError::Unrecoverable(format!("tenant {tenant_id} disappeared")));
		}

		info!(run_id = %ctx.run_id, tenant_id = %tenant_id, "Tenant activated");
		Ok(StepOutput::Finalized { tenant_id })
	}

	/// Only the tenant status is reverted here; the namespace is released by
	/// the reservation step's own compensation.
	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>) -> Result<(), StepError> {
		let tenant_id = match output {
			Some(StepOutput::Finalized { tenant_id }) => Some(*tenant_id),
			_ => resolve_tenant(self.tenants.as_ref(), ctx).await?,
		};
		if let Some(tenant_id) = tenant_id {
			self
				.tenants
				.set_tenant_status(tenant_id, TenantStatus::Inactive)
				.await?;
		}
		Ok(())
	}
}
