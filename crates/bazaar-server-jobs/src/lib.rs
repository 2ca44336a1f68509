// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the bazaar server.
//!
//! Runs periodic maintenance work (reservation expiry, idempotency key
//! cleanup, stalled compensation escalation) with bounded retry, keeps a
//! short in-memory history of every run and rolls that history up into a
//! health status.

pub mod context;
pub mod error;
pub mod health;
pub mod history;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use history::RunHistory;
pub use job::Job;
pub use scheduler::{JobScheduler, RetrySettings};
pub use types::{JobOutput, JobRun, JobStatus, JobType, TriggerSource};
