// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::Stage;
use bazaar_server_jobs::{Job, JobContext, JobError, JobOutput};
use bazaar_server_provisioning::Orchestrator;
use tracing::{error, info, instrument};

use super::retryable;

/// Escalates runs stuck in `COMPENSATING` and tries their undo steps again.
///
/// Runs that are still stuck afterwards fail the job, which degrades the
/// scheduler health so the condition shows up on `/health`.
pub struct StalledCompensationJob {
	orchestrator: Arc<Orchestrator>,
}

impl StalledCompensationJob {
	pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
		Self { orchestrator }
	}
}

#[async_trait]
impl Job for StalledCompensationJob {
	fn id(&self) -> &str {
		"stalled-compensation"
	}

	fn name(&self) -> &str {
		"Stalled Compensation"
	}

	fn description(&self) -> &str {
		"Alert on and retry provisioning runs stuck in compensation"
	}

	#[instrument(skip(self, ctx), fields(job_id = "stalled-compensation"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let stalled = self
			.orchestrator
			.stalled_compensations()
			.await
			.map_err(retryable)?;

		let mut recovered = 0u32;
		let mut still_stuck = Vec::new();

		for run in stalled {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}

			error!(
				run_id = %run.id,
				subdomain = %run.request.subdomain,
				since = ?run.compensation_started_at,
				reason = run.failure_reason.as_deref().unwrap_or(""),
				"Provisioning run stuck in compensation; operator attention required"
			);

			match self.orchestrator.resume(run.id).await {
				Ok(resumed) if resumed.stage == Stage::Compensating => still_stuck.push(run.id),
				Ok(resumed) => {
					info!(run_id = %run.id, outcome = resumed.outcome.as_str(), "Stalled compensation finished");
					recovered += 1;
				}
				Err(e) => {
					error!(run_id = %run.id, error = %e, "Failed to resume stalled compensation");
					still_stuck.push(run.id);
				}
			}
		}

		if !still_stuck.is_empty() {
			let ids: Vec<String> = still_stuck.iter().map(|id| id.to_string()).collect();
			return Err(JobError::permanent(format!(
				"{} provisioning runs stuck in compensation: {}",
				still_stuck.len(),
				ids.join(", ")
			)));
		}

		Ok(
			JobOutput::message(format!("Recovered {recovered} stalled compensations"))
				.with_metadata(serde_json::json!({ "recovered": recovered })),
		)
	}
}
