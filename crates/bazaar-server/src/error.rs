// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use bazaar_server_db::DbError;
use bazaar_server_provisioning::ProvisioningError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("not cancellable: {0}")]
	NotCancellable(String),

	#[error("invalid request: {0}")]
	BadRequest(String),

	#[error("database error: {0}")]
	Database(String),

	#[error("internal error: {0}")]
	Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl ServerError {
	fn parts(&self) -> (StatusCode, &'static str, &str) {
		match self {
			ServerError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
			ServerError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m),
			ServerError::NotCancellable(m) => (StatusCode::CONFLICT, "not_cancellable", m),
			ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, "invalid_request", m),
			ServerError::Database(m) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", m),
			ServerError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", m),
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, error, message) = self.parts();
		if status.is_server_error() {
			tracing::error!(error, message, "Request failed");
		}
		(
			status,
			Json(ErrorResponse {
				error: error.to_string(),
				message: message.to_string(),
			}),
		)
			.into_response()
	}
}

impl From<ProvisioningError> for ServerError {
	fn from(err: ProvisioningError) -> Self {
		match err {
			ProvisioningError::RunNotFound(id) => {
				ServerError::NotFound(format!("provisioning run {id} not found"))
			}
			e @ ProvisioningError::NotCancellable { .. } => ServerError::NotCancellable(e.to_string()),
			e @ ProvisioningError::InvalidTransition { .. } => ServerError::Conflict(e.to_string()),
			ProvisioningError::InvalidRequest(m) => ServerError::BadRequest(m),
			ProvisioningError::Database(e) => e.into(),
			ProvisioningError::Internal(m) => ServerError::Internal(m),
		}
	}
}

impl From<DbError> for ServerError {
	fn from(err: DbError) -> Self {
		match err {
			DbError::NotFound(m) => ServerError::NotFound(m),
			DbError::Conflict(m) => ServerError::Conflict(m),
			e => ServerError::Database(e.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bazaar_server_db::{RunId, Stage};

	#[test]
	fn provisioning_errors_map_to_statuses() {
		let cases = [
			(
				ProvisioningError::RunNotFound(RunId::generate()),
				StatusCode::NOT_FOUND,
				"not_found",
			),
			(
				ProvisioningError::NotCancellable {
					run_id: RunId::generate(),
					stage: Stage::CreatingTenant,
				},
				StatusCode::CONFLICT,
				"not_cancellable",
			),
			(
				ProvisioningError::InvalidTransition {
					from: Stage::Completed,
					to: Stage::Compensating,
				},
				StatusCode::CONFLICT,
				"conflict",
			),
			(
				ProvisioningError::InvalidRequest("idempotency_key is required".into()),
				StatusCode::BAD_REQUEST,
				"invalid_request",
			),
			(
				ProvisioningError::Database(DbError::Internal("disk full".into())),
				StatusCode::INTERNAL_SERVER_ERROR,
				"database_error",
			),
		];

		for (err, status, code) in cases {
			let server: ServerError = err.into();
			let (actual_status, actual_code, _) = server.parts();
			assert_eq!(actual_status, status);
			assert_eq!(actual_code, code);
		}
	}
}
