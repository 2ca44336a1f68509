// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Maintenance jobs registered with the scheduler at startup.

mod idempotency_cleanup;
mod provisioning_recovery;
mod reservation_expiry;
mod stalled_compensation;

pub use idempotency_cleanup::IdempotencyKeyCleanupJob;
pub use provisioning_recovery::ProvisioningRecoveryJob;
pub use reservation_expiry::ReservationExpiryJob;
pub use stalled_compensation::StalledCompensationJob;

use bazaar_server_jobs::JobError;

fn retryable(err: impl std::fmt::Display) -> JobError {
	JobError::retryable(err.to_string())
}
