// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for Bazaar marketplace provisioning.
//!
//! Each concern is a `*Store` trait with a SQLite `*Repository`
//! implementation:
//! - [`RunStore`]: provisioning runs and their step checkpoints
//! - [`NamespaceStore`]: subdomain / custom-domain reservations
//! - [`IdempotencyStore`]: idempotency keys bound to runs
//! - [`TenantStore`]: tenant records, admin accounts, settings and field schema

pub mod error;
pub mod idempotency;
pub mod namespace;
pub mod pool;
pub mod run;
pub mod tenant;
pub mod testing;
pub mod types;

pub use error::{DbError, Result};
pub use idempotency::{Admission, IdempotencyRepository, IdempotencyStore};
pub use namespace::{
	NamespaceRepository, NamespaceStore, ReservationRecord, ReservationState, ReserveOutcome,
};
pub use pool::{create_pool, run_migrations};
pub use run::{Outcome, ProvisioningRun, RunRepository, RunStore, Stage, StepRecord, StepStatus};
pub use tenant::{
	AdminAccount, NewAdminAccount, NewTenant, ProductFieldDefinition, Tenant, TenantRepository,
	TenantSettings, TenantStatus, TenantStore,
};
pub use types::{AdminAccountId, BillingCycle, ProvisioningRequest, RunId, TenantId};
