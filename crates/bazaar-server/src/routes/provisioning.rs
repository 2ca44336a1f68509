// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioning run endpoints.
//!
//! - `POST /api/provisioning` admits a request and drives it in the background
//! - `GET /api/provisioning/{run_id}` reports status and, once complete, URLs
//! - `GET /api/provisioning/{run_id}/steps` returns the step audit trail
//! - `POST /api/provisioning/{run_id}/{cancel,rollback,resume}` operator actions

use axum::{
	extract::{Path, State},
	http::StatusCode,
	Json,
};
use bazaar_server_db::{Outcome, ProvisioningRun, RunId, Stage, StepRecord};
use bazaar_server_provisioning::{ProvisioningRequest, RunStatus};
use serde::{Deserialize, Serialize};

use crate::{api::AppState, error::ServerError};

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
	pub run_id: RunId,
	pub is_new: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepsResponse {
	pub run_id: RunId,
	pub stage: Stage,
	pub outcome: Outcome,
	pub failure_reason: Option<String>,
	pub rollback_requested: bool,
	pub steps: Vec<StepRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
	#[serde(default)]
	pub reason: Option<String>,
}

fn status_of(state: &AppState, run: &ProvisioningRun) -> RunStatus {
	RunStatus::from_run(run, &state.orchestrator.config().urls)
}

/// Returns 202 when a new run was started, 200 when the key was already known.
#[tracing::instrument(skip(state, request), fields(idempotency_key = %request.idempotency_key))]
pub async fn submit_provisioning(
	State(state): State<AppState>,
	Json(request): Json<ProvisioningRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ServerError> {
	let admission = state.orchestrator.start(request).await?;
	let status = if admission.is_new {
		StatusCode::ACCEPTED
	} else {
		StatusCode::OK
	};
	Ok((
		status,
		Json(SubmitResponse {
			run_id: admission.run_id,
			is_new: admission.is_new,
		}),
	))
}

pub async fn get_provisioning_status(
	State(state): State<AppState>,
	Path(run_id): Path<RunId>,
) -> Result<Json<RunStatus>, ServerError> {
	Ok(Json(state.orchestrator.status_view(run_id).await?))
}

pub async fn get_provisioning_steps(
	State(state): State<AppState>,
	Path(run_id): Path<RunId>,
) -> Result<Json<StepsResponse>, ServerError> {
	let run = state.orchestrator.status(run_id).await?;
	Ok(Json(StepsResponse {
		run_id: run.id,
		stage: run.stage,
		outcome: run.outcome,
		failure_reason: run.failure_reason,
		rollback_requested: run.rollback_requested,
		steps: run.steps,
	}))
}

#[tracing::instrument(skip(state), fields(run_id = %run_id))]
pub async fn cancel_provisioning(
	State(state): State<AppState>,
	Path(run_id): Path<RunId>,
) -> Result<Json<RunStatus>, ServerError> {
	let run = state.orchestrator.cancel(run_id).await?;
	Ok(Json(status_of(&state, &run)))
}

#[tracing::instrument(skip(state, body), fields(run_id = %run_id))]
pub async fn rollback_provisioning(
	State(state): State<AppState>,
	Path(run_id): Path<RunId>,
	body: Option<Json<RollbackRequest>>,
) -> Result<Json<RunStatus>, ServerError> {
	let reason = body.and_then(|Json(b)| b.reason);
	let run = state
		.orchestrator
		.rollback(run_id, reason.as_deref())
		.await?;
	Ok(Json(status_of(&state, &run)))
}

/// Drive an interrupted run again in the background.
#[tracing::instrument(skip(state), fields(run_id = %run_id))]
pub async fn resume_provisioning(
	State(state): State<AppState>,
	Path(run_id): Path<RunId>,
) -> Result<(StatusCode, Json<RunStatus>), ServerError> {
	let run = state.orchestrator.status(run_id).await?;
	if run.stage.is_terminal() {
		return Ok((StatusCode::OK, Json(status_of(&state, &run))));
	}
	state.orchestrator.spawn_drive(run_id);
	Ok((StatusCode::ACCEPTED, Json(status_of(&state, &run))))
}
