// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Marketplace provisioning for Bazaar server.
//!
//! A payment-authorized [`ProvisioningRequest`] passes through the
//! [`IdempotencyGuard`], then the [`Orchestrator`] reserves the namespace and
//! runs the step executors in order, persisting a checkpoint after each one.
//! Unrecoverable failures are unwound by running each completed step's
//! compensation in reverse.

pub mod error;
pub mod guard;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod reservation;
pub mod retry;
pub mod status;
pub mod steps;
pub mod validation;

pub use bazaar_server_db::ProvisioningRequest;
pub use error::{ProvisioningError, Result, StepError};
pub use guard::IdempotencyGuard;
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProvisioningStores};
pub use output::{Artifacts, StepOutput};
pub use reservation::NamespaceReservation;
pub use retry::RetryPolicy;
pub use status::{MarketplaceLinks, RunStatus, UrlSettings};
pub use steps::{StepContext, StepExecutor};
pub use validation::ValidationRules;
