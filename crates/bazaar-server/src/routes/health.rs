// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health check handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bazaar_server_jobs::{HealthState, JobsHealthStatus};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthState,
	pub timestamp: String,
	pub duration_ms: u64,
	pub version: &'static str,
	pub components: HealthComponents,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
	pub database: DatabaseHealth,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub jobs: Option<JobsHealthStatus>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
	pub status: HealthState,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

async fn check_database(pool: &SqlitePool) -> DatabaseHealth {
	let start = tokio::time::Instant::now();
	let result = sqlx::query("SELECT 1").execute(pool).await;
	let latency_ms = start.elapsed().as_millis() as u64;
	match result {
		Ok(_) => DatabaseHealth {
			status: HealthState::Healthy,
			latency_ms,
			error: None,
		},
		Err(e) => DatabaseHealth {
			status: HealthState::Unhealthy,
			latency_ms,
			error: Some(e.to_string()),
		},
	}
}

/// GET /health - database connectivity plus the scheduler's job rollup.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let start = tokio::time::Instant::now();

	let database = check_database(&state.pool).await;
	let jobs = state.job_scheduler.as_ref().map(|s| s.health_status());

	let status = jobs
		.as_ref()
		.map(|j| j.status)
		.unwrap_or(HealthState::Healthy)
		.max(database.status);

	let response = HealthResponse {
		status,
		timestamp: chrono::Utc::now().to_rfc3339(),
		duration_ms: start.elapsed().as_millis() as u64,
		version: env!("CARGO_PKG_VERSION"),
		components: HealthComponents { database, jobs },
	};

	let http_status = match status {
		HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
		HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};

	(http_status, Json(response))
}
