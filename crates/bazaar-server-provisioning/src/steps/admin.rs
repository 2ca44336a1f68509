// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::{NewAdminAccount, Stage, TenantStore};
use tracing::info;

use super::{StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;

pub struct CreateAdminStep {
	tenants: Arc<dyn TenantStore>,
}

impl CreateAdminStep {
	pub fn new(tenants: Arc<dyn TenantStore>) -> Self {
		Self { tenants }
	}
}

#[async_trait]
impl StepExecutor for CreateAdminStep {
	fn stage(&self) -> Stage {
		Stage::CreatingAdmin
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		if let Some(existing) = self.tenants.find_admin_by_run(ctx.run_id).await? {
			return Ok(StepOutput::AdminCreated {
				admin_account_id: existing.id,
			});
		}

		let request = ctx.request;
		let account = self
			.tenants
			.create_admin_account(&NewAdminAccount {
				run_id: ctx.run_id,
				tenant_id: ctx.artifacts.require_tenant()?,
				first_name: request.admin_first_name.trim().to_string(),
				last_name: request.admin_last_name.trim().to_string(),
				email: request.admin_email.trim().to_lowercase(),
			})
			.await?;

		info!(run_id = %ctx.run_id, admin_account_id = %account.id, "Administrator account created");
		Ok(StepOutput::AdminCreated {
			admin_account_id: account.id,
		})
	}

	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>) -> Result<(), StepError> {
		let admin_id = match output {
			Some(StepOutput::AdminCreated { admin_account_id }) => Some(*admin_account_id),
			_ => self
				.tenants
				.find_admin_by_run(ctx.run_id)
				.await?
				.map(|a| a.id),
		};
		if let Some(admin_id) = admin_id {
			self.tenants.delete_admin_account(admin_id).await?;
		}
		Ok(())
	}
}
