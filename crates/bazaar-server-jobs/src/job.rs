// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::JobError;
use crate::types::JobOutput;

/// A unit of background work the scheduler can run repeatedly.
///
/// Implementations should return [`JobError::Cancelled`] promptly once
/// `ctx.cancellation_token` is cancelled.
#[async_trait]
pub trait Job: Send + Sync {
	/// Stable identifier, used for triggering and health reporting.
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	fn description(&self) -> &str;
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}
