// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use bazaar_server_db::{DbError, RunId, Stage};

/// Failure of a single step attempt, classified for retry and compensation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
	/// Malformed input. Never retried, nothing to undo.
	#[error("validation failed: {0}")]
	Validation(String),

	/// The namespace or resource is owned by another run.
	#[error("conflict: {0}")]
	Conflict(String),

	/// Timeouts, connection resets, lock contention.
	#[error("transient failure: {0}")]
	Transient(String),

	/// Permanent rejection by a collaborator.
	#[error("unrecoverable failure: {0}")]
	Unrecoverable(String),
}

impl StepError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, StepError::Transient(_))
	}

	/// Whether the failing attempt may have left a partial side effect that
	/// must be undone along with the earlier steps.
	pub fn may_have_partial_effect(&self) -> bool {
		matches!(self, StepError::Transient(_) | StepError::Unrecoverable(_))
	}

	pub fn kind(&self) -> &'static str {
		match self {
			StepError::Validation(_) => "validation",
			StepError::Conflict(_) => "conflict",
			StepError::Transient(_) => "transient",
			StepError::Unrecoverable(_) => "unrecoverable",
		}
	}
}

impl From<DbError> for StepError {
	fn from(err: DbError) -> Self {
		if err.is_transient() {
			return StepError::Transient(err.to_string());
		}
		match err {
			DbError::Conflict(what) => StepError::Conflict(what),
			other => StepError::Unrecoverable(other.to_string()),
		}
	}
}

impl From<serde_json::Error> for StepError {
	fn from(err: serde_json::Error) -> Self {
		StepError::Unrecoverable(format!("step output encoding: {err}"))
	}
}

/// Errors surfaced by the provisioning service to its callers.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("provisioning run not found: {0}")]
	RunNotFound(RunId),

	#[error("run {run_id} cannot be cancelled in stage {stage}")]
	NotCancellable { run_id: RunId, stage: Stage },

	#[error("invalid transition from {from} to {to}")]
	InvalidTransition { from: Stage, to: Stage },

	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;
