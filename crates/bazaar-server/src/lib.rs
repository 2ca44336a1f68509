// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bazaar marketplace provisioning server.
//!
//! Accepts payment-authorized provisioning requests over HTTP, drives them
//! through the provisioning orchestrator and runs the maintenance jobs that
//! keep reservations, idempotency keys and stuck compensations in check.

pub mod api;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod routes;

pub use api::{create_app_state, create_router, orchestrator_config, AppState};
pub use bazaar_server_config::ServerConfig;
pub use error::ServerError;
pub use notify::{notifier_for, SmtpNotifier};
