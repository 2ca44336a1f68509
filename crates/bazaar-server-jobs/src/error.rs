// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("job failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("job cancelled")]
	Cancelled,

	#[error("job not found: {0}")]
	NotFound(String),
}

impl JobError {
	/// A failure the scheduler should try again after a backoff.
	pub fn retryable(message: impl Into<String>) -> Self {
		Self::Failed {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		Self::Failed {
			message: message.into(),
			retryable: false,
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn constructors_set_retryability() {
		assert!(matches!(
			JobError::retryable("db busy"),
			JobError::Failed { retryable: true, .. }
		));
		assert!(matches!(
			JobError::permanent("bad config"),
			JobError::Failed { retryable: false, .. }
		));
	}

	#[test]
	fn display_includes_message() {
		assert_eq!(JobError::permanent("boom").to_string(), "job failed: boom");
		assert_eq!(
			JobError::NotFound("reservation-expiry".to_string()).to_string(),
			"job not found: reservation-expiry"
		);
	}
}
