// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_jobs::{Job, JobContext, JobError, JobOutput};
use bazaar_server_provisioning::Orchestrator;
use tracing::instrument;

use super::retryable;

/// One-shot startup job that resumes every run left unfinished by a
/// previous process.
pub struct ProvisioningRecoveryJob {
	orchestrator: Arc<Orchestrator>,
}

impl ProvisioningRecoveryJob {
	pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
		Self { orchestrator }
	}
}

#[async_trait]
impl Job for ProvisioningRecoveryJob {
	fn id(&self) -> &str {
		"provisioning-recovery"
	}

	fn name(&self) -> &str {
		"Provisioning Recovery"
	}

	fn description(&self) -> &str {
		"Resume provisioning runs interrupted by a restart"
	}

	#[instrument(skip(self, ctx), fields(job_id = "provisioning-recovery"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let resumed = self
			.orchestrator
			.recover_incomplete()
			.await
			.map_err(retryable)?;

		let ids: Vec<String> = resumed.iter().map(|id| id.to_string()).collect();
		Ok(
			JobOutput::message(format!("Resumed {} incomplete runs", resumed.len()))
				.with_metadata(serde_json::json!({ "resumed": ids })),
		)
	}
}
