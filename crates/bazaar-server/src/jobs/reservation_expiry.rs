// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use bazaar_server_jobs::{Job, JobContext, JobError, JobOutput};
use bazaar_server_provisioning::NamespaceReservation;
use tracing::instrument;

use super::retryable;

/// Frees `held` reservations whose TTL has passed so abandoned runs stop
/// blocking their names.
pub struct ReservationExpiryJob {
	reservation: NamespaceReservation,
}

impl ReservationExpiryJob {
	pub fn new(reservation: NamespaceReservation) -> Self {
		Self { reservation }
	}
}

#[async_trait]
impl Job for ReservationExpiryJob {
	fn id(&self) -> &str {
		"reservation-expiry"
	}

	fn name(&self) -> &str {
		"Reservation Expiry"
	}

	fn description(&self) -> &str {
		"Release namespace reservations held past their expiry"
	}

	#[instrument(skip(self, ctx), fields(job_id = "reservation-expiry"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let released = self.reservation.release_expired().await.map_err(retryable)?;

		Ok(
			JobOutput::message(format!("Released {released} expired reservations"))
				.with_metadata(serde_json::json!({ "released": released })),
		)
	}
}
