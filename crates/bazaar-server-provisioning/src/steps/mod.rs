// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Step executors, one per provisioning stage.
//!
//! Every executor is idempotent in both directions: `run` looks for a
//! resource already created by the same run before creating one, and `undo`
//! is a no-op once the resource is gone. A crash at any point can therefore
//! be recovered by replaying the interrupted stage.

mod admin;
mod finalize;
mod namespace;
mod schema;
mod settings;
mod tenant;
mod validate;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bazaar_server_db::{ProvisioningRequest, RunId, Stage, TenantId, TenantStore};

pub use admin::CreateAdminStep;
pub use finalize::FinalizeStep;
pub use namespace::ReserveNamespaceStep;
pub use schema::{default_product_fields, ProvisionSchemaStep};
pub use settings::ApplySettingsStep;
pub use tenant::CreateTenantStep;
pub use validate::ValidateStep;

use crate::error::StepError;
use crate::output::{Artifacts, StepOutput};
use crate::reservation::NamespaceReservation;
use crate::validation::ValidationRules;

/// Inputs available to a step: the immutable request and everything earlier
/// steps of the same run produced.
pub struct StepContext<'a> {
	pub run_id: RunId,
	pub request: &'a ProvisioningRequest,
	pub artifacts: &'a Artifacts,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
	fn stage(&self) -> Stage;

	/// Steps without side effects are skipped during compensation.
	fn has_side_effects(&self) -> bool {
		true
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError>;

	/// Reverse the step. `output` is `None` when the step failed or was
	/// interrupted before recording one.
	async fn undo(&self, ctx: &StepContext<'_>, output: Option<&StepOutput>)
		-> Result<(), StepError>;
}

/// Tenant created by this run, from its artifacts or by lookup.
pub(crate) async fn resolve_tenant(
	tenants: &dyn TenantStore,
	ctx: &StepContext<'_>,
) -> Result<Option<TenantId>, StepError> {
	if let Some(id) = ctx.artifacts.tenant_id {
		return Ok(Some(id));
	}
	Ok(tenants.find_tenant_by_run(ctx.run_id).await?.map(|t| t.id))
}

/// The seven executors in stage order.
pub fn standard_executors(
	tenants: Arc<dyn TenantStore>,
	reservation: NamespaceReservation,
	rules: ValidationRules,
	reservation_ttl: Duration,
) -> Vec<Arc<dyn StepExecutor>> {
	vec![
		Arc::new(ValidateStep::new(rules)),
		Arc::new(ReserveNamespaceStep::new(reservation.clone(), reservation_ttl)),
		Arc::new(CreateTenantStep::new(Arc::clone(&tenants))),
		Arc::new(ProvisionSchemaStep::new(Arc::clone(&tenants))),
		Arc::new(CreateAdminStep::new(Arc::clone(&tenants))),
		Arc::new(ApplySettingsStep::new(Arc::clone(&tenants))),
		Arc::new(FinalizeStep::new(tenants, reservation)),
	]
}
