// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::TriggerSource;

/// Passed to every [`Job::run`](crate::Job::run) invocation.
pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	/// Zero on the first try, incremented on each retry of the same run.
	pub attempt: u32,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}
}

/// Shared flag a job polls between units of work.
#[derive(Clone, Default)]
pub struct CancellationToken {
	cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	/// Re-enable a previously cancelled job.
	pub fn resume(&self) {
		self.cancelled.store(false, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}
