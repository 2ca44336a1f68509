// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use bazaar_server_jobs::{Job, JobContext, JobError, JobOutput};
use bazaar_server_provisioning::IdempotencyGuard;
use tracing::instrument;

use super::retryable;

/// Forgets idempotency keys older than the retention window. The runs they
/// pointed at are kept.
pub struct IdempotencyKeyCleanupJob {
	guard: IdempotencyGuard,
}

impl IdempotencyKeyCleanupJob {
	pub fn new(guard: IdempotencyGuard) -> Self {
		Self { guard }
	}
}

#[async_trait]
impl Job for IdempotencyKeyCleanupJob {
	fn id(&self) -> &str {
		"idempotency-key-cleanup"
	}

	fn name(&self) -> &str {
		"Idempotency Key Cleanup"
	}

	fn description(&self) -> &str {
		"Delete idempotency keys past the retention window"
	}

	#[instrument(skip(self, ctx), fields(job_id = "idempotency-key-cleanup"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let purged = self.guard.purge_expired().await.map_err(retryable)?;

		Ok(
			JobOutput::message(format!("Purged {purged} expired idempotency keys"))
				.with_metadata(serde_json::json!({ "purged": purged })),
		)
	}
}
