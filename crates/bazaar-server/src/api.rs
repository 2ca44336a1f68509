// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router wiring.

use std::sync::Arc;

use axum::{
	routing::{get, post},
	Router,
};
use bazaar_server_config::{ProvisioningConfig, ServerConfig};
use bazaar_server_jobs::JobScheduler;
use bazaar_server_provisioning::{
	Orchestrator, OrchestratorConfig, ProvisioningStores, RetryPolicy, UrlSettings,
	ValidationRules,
};
use sqlx::SqlitePool;

use crate::{notify::notifier_for, routes};

#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub orchestrator: Arc<Orchestrator>,
	/// Absent until the scheduler has been started.
	pub job_scheduler: Option<Arc<JobScheduler>>,
}

/// Map the resolved provisioning section onto the orchestrator's settings.
pub fn orchestrator_config(config: &ProvisioningConfig) -> OrchestratorConfig {
	OrchestratorConfig {
		retry: RetryPolicy {
			max_attempts: config.max_attempts,
			base_delay: config.base_delay(),
			max_delay: config.max_delay(),
			attempt_timeout: config.step_timeout(),
		},
		reservation_ttl: config.reservation_ttl(),
		idempotency_window: config.idempotency_window(),
		compensation_alert: config.compensation_alert(),
		urls: UrlSettings {
			scheme: config.url_scheme.clone(),
			base_domain: config.base_domain.clone(),
		},
		validation: ValidationRules {
			reserved_subdomains: config.reserved_subdomains.clone(),
		},
	}
}

pub fn create_app_state(pool: SqlitePool, config: &ServerConfig) -> AppState {
	let orchestrator = Orchestrator::new(
		ProvisioningStores::sqlite(pool.clone()),
		notifier_for(config.smtp.as_ref()),
		orchestrator_config(&config.provisioning),
	);

	AppState {
		pool,
		orchestrator: Arc::new(orchestrator),
		job_scheduler: None,
	}
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health_check))
		.route(
			"/api/provisioning",
			post(routes::provisioning::submit_provisioning),
		)
		.route(
			"/api/provisioning/{run_id}",
			get(routes::provisioning::get_provisioning_status),
		)
		.route(
			"/api/provisioning/{run_id}/steps",
			get(routes::provisioning::get_provisioning_steps),
		)
		.route(
			"/api/provisioning/{run_id}/cancel",
			post(routes::provisioning::cancel_provisioning),
		)
		.route(
			"/api/provisioning/{run_id}/rollback",
			post(routes::provisioning::rollback_provisioning),
		)
		.route(
			"/api/provisioning/{run_id}/resume",
			post(routes::provisioning::resume_provisioning),
		)
		.route(
			"/api/namespaces/availability",
			get(routes::namespaces::check_availability),
		)
		.with_state(state)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn orchestrator_config_follows_provisioning_section() {
		let provisioning = ProvisioningConfig {
			base_domain: "shops.example".to_string(),
			max_attempts: 2,
			step_timeout_secs: 5,
			reserved_subdomains: vec!["billing".to_string()],
			..Default::default()
		};

		let config = orchestrator_config(&provisioning);

		assert_eq!(config.retry.max_attempts, 2);
		assert_eq!(config.retry.attempt_timeout, Duration::from_secs(5));
		assert_eq!(config.retry.base_delay, Duration::from_millis(200));
		assert_eq!(config.urls.base_domain, "shops.example");
		assert_eq!(config.urls.scheme, "https");
		assert_eq!(config.reservation_ttl, Duration::from_secs(900));
		assert!(config.validation.is_reserved("billing"));
		assert!(!config.validation.is_reserved("admin"));
	}
}
