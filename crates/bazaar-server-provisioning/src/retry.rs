// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::time::Duration;

use crate::error::StepError;

const RETRY_FACTOR: f64 = 2.0;

/// Bounded exponential backoff shared by forward steps and compensations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts including the first.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	/// Upper bound on a single attempt; exceeding it is a transient failure.
	pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(10),
			attempt_timeout: Duration::from_secs(30),
		}
	}
}

impl RetryPolicy {
	/// Delay before the retry that follows failed attempt `attempt` (1-based).
	pub fn backoff_delay(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(30) as i32;
		let delay_ms = self.base_delay.as_millis() as f64 * RETRY_FACTOR.powi(exponent);
		let capped = delay_ms.min(self.max_delay.as_millis() as f64);
		Duration::from_millis(capped as u64)
	}

	/// Backoff with equal jitter: half fixed, half random.
	pub fn jittered_delay(&self, attempt: u32) -> Duration {
		let delay = self.backoff_delay(attempt).as_millis() as u64;
		let half = delay / 2;
		Duration::from_millis(half + fastrand::u64(0..=half))
	}

	pub fn should_retry(&self, err: &StepError, attempt: u32) -> bool {
		err.is_retryable() && attempt < self.max_attempts
	}

	/// Run one attempt under the per-attempt timeout.
	pub async fn attempt<T, F>(&self, fut: F) -> Result<T, StepError>
	where
		F: Future<Output = Result<T, StepError>>,
	{
		match tokio::time::timeout(self.attempt_timeout, fut).await {
			Ok(result) => result,
			Err(_) => Err(StepError::Transient(format!(
				"attempt timed out after {}ms",
				self.attempt_timeout.as_millis()
			))),
		}
	}
}
