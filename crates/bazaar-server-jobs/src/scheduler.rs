// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{HealthState, JobHealthStatus, JobsHealthStatus};
use crate::history::RunHistory;
use crate::job::Job;
use crate::types::{JobRun, JobStatus, JobType, TriggerSource};

const RETRY_FACTOR: f64 = 2.0;

/// Bounded exponential backoff applied when a job fails retryably.
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub max_retries: u32,
}

impl Default for RetrySettings {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(60),
			max_retries: 3,
		}
	}
}

impl RetrySettings {
	/// Delay before retry number `retry_count` (1-based).
	pub fn backoff_delay(&self, retry_count: u32) -> Duration {
		let exponent = retry_count.saturating_sub(1).min(32) as i32;
		let delay = self.base_delay.as_secs_f64() * RETRY_FACTOR.powi(exponent);
		Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
	}
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	job_type: JobType,
	cancellation_token: CancellationToken,
}

pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	history: Arc<RunHistory>,
	retry: RetrySettings,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(history: Arc<RunHistory>) -> Self {
		Self::with_retry(history, RetrySettings::default())
	}

	pub fn with_retry(history: Arc<RunHistory>, retry: RetrySettings) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			history,
			retry,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.register(job, JobType::Periodic { interval });
	}

	/// Runs once, immediately after [`start`](Self::start).
	pub fn register_one_shot(&mut self, job: Arc<dyn Job>) {
		self.register(job, JobType::OneShot);
	}

	fn register(&mut self, job: Arc<dyn Job>, job_type: JobType) {
		self.jobs.insert(
			job.id().to_string(),
			RegisteredJob {
				job,
				job_type,
				cancellation_token: CancellationToken::new(),
			},
		);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			info!(
				job_id = %job_id,
				name = registered.job.name(),
				job_type = registered.job_type.as_str(),
				"Registering job"
			);

			let job = Arc::clone(&registered.job);
			let history = Arc::clone(&self.history);
			let cancellation_token = registered.cancellation_token.clone();
			let retry = self.retry;
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let job_id = job_id.clone();

			let handle = match registered.job_type {
				JobType::Periodic { interval } => tokio::spawn(async move {
					loop {
						tokio::select! {
							_ = tokio::time::sleep(interval) => {
								if cancellation_token.is_cancelled() {
									continue;
								}
								let _ = run_job_with_retry(
									&job,
									&history,
									retry,
									TriggerSource::Schedule,
									&cancellation_token,
								)
								.await;
							}
							_ = shutdown_rx.recv() => {
								info!(job_id = %job_id, "Shutting down periodic job");
								break;
							}
						}
					}
				}),
				JobType::OneShot => tokio::spawn(async move {
					tokio::select! {
						_ = run_job_with_retry(
							&job,
							&history,
							retry,
							TriggerSource::Schedule,
							&cancellation_token,
						) => {}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "One-shot job interrupted by shutdown");
						}
					}
				}),
			};
			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
	}

	/// Run a job now, outside its schedule. Returns the run id.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_job_with_retry(
			&registered.job,
			&self.history,
			self.retry,
			triggered_by,
			&registered.cancellation_token,
		)
		.await
	}

	#[instrument(skip(self))]
	pub fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	pub fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.history.last_run(job_id);
		let consecutive_failures = self.history.consecutive_failures(job_id);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	pub fn health_status(&self) -> JobsHealthStatus {
		let mut ids = self.job_ids();
		ids.sort();
		JobsHealthStatus::from_jobs(ids.iter().filter_map(|id| self.job_status(id)).collect())
	}
}

fn determine_health_state(last_run: Option<&JobRun>, consecutive_failures: u32) -> HealthState {
	match last_run.map(|r| r.status) {
		Some(JobStatus::Failed) if consecutive_failures >= 3 => HealthState::Unhealthy,
		Some(JobStatus::Failed) if consecutive_failures >= 1 => HealthState::Degraded,
		_ => HealthState::Healthy,
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	history: &RunHistory,
	retry: RetrySettings,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
) -> Result<String> {
	let job_id = job.id();
	let run_id = uuid::Uuid::new_v4().to_string();
	history.record_start(JobRun {
		id: run_id.clone(),
		job_id: job_id.to_string(),
		status: JobStatus::Running,
		started_at: Utc::now(),
		completed_at: None,
		duration_ms: None,
		error_message: None,
		retry_count: 0,
		triggered_by,
		metadata: None,
	});

	let mut retry_count = 0u32;
	loop {
		if cancellation_token.is_cancelled() {
			history.record_complete(job_id, &run_id, JobStatus::Cancelled, None, None);
			info!(job_id, run_id = %run_id, "Job cancelled");
			return Err(JobError::Cancelled);
		}

		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			attempt: retry_count,
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				history.record_complete(job_id, &run_id, JobStatus::Succeeded, None, output.metadata);
				info!(job_id, run_id = %run_id, message = %output.message, "Job completed successfully");
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				history.record_complete(job_id, &run_id, JobStatus::Cancelled, None, None);
				info!(job_id, run_id = %run_id, "Job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < retry.max_retries {
					retry_count += 1;
					history.record_retry(job_id, &run_id, retry_count);
					let delay = retry.backoff_delay(retry_count);
					warn!(
						job_id,
						run_id = %run_id,
						retry_count,
						delay_ms = delay.as_millis() as u64,
						error = %message,
						"Job failed, retrying"
					);
					tokio::time::sleep(delay).await;
					continue;
				}

				history.record_complete(
					job_id,
					&run_id,
					JobStatus::Failed,
					Some(message.clone()),
					None,
				);
				warn!(job_id, run_id = %run_id, error = %message, "Job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				let message = e.to_string();
				history.record_complete(job_id, &run_id, JobStatus::Failed, Some(message.clone()), None);
				warn!(job_id, run_id = %run_id, error = %message, "Job failed with error");
				return Err(e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Fails the first `failures` calls, then succeeds.
	struct CountingJob {
		id: String,
		calls: AtomicU32,
		failures: u32,
		retryable: bool,
	}

	impl CountingJob {
		fn new(id: &str, failures: u32, retryable: bool) -> Arc<Self> {
			Arc::new(Self {
				id: id.to_string(),
				calls: AtomicU32::new(0),
				failures,
				retryable,
			})
		}

		fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for CountingJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Counting Job"
		}

		fn description(&self) -> &str {
			"Counts its invocations"
		}

		async fn run(&self, _ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if n <= self.failures {
				return Err(JobError::Failed {
					message: format!("failure {n}"),
					retryable: self.retryable,
				});
			}
			Ok(JobOutput::message(format!("call {n}")))
		}
	}

	fn fast_retry() -> RetrySettings {
		RetrySettings {
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(4),
			max_retries: 3,
		}
	}

	fn scheduler() -> JobScheduler {
		JobScheduler::with_retry(Arc::new(RunHistory::default()), fast_retry())
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let retry = RetrySettings::default();
		assert_eq!(retry.backoff_delay(1), Duration::from_secs(1));
		assert_eq!(retry.backoff_delay(2), Duration::from_secs(2));
		assert_eq!(retry.backoff_delay(3), Duration::from_secs(4));
		assert_eq!(retry.backoff_delay(10), Duration::from_secs(60));
		assert_eq!(retry.backoff_delay(u32::MAX), Duration::from_secs(60));
	}

	#[test]
	fn health_state_follows_consecutive_failures() {
		let mut run = JobRun {
			id: "run-1".to_string(),
			job_id: "job-1".to_string(),
			status: JobStatus::Failed,
			started_at: Utc::now(),
			completed_at: Some(Utc::now()),
			duration_ms: Some(10),
			error_message: Some("boom".to_string()),
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		};
		assert_eq!(determine_health_state(None, 0), HealthState::Healthy);
		assert_eq!(determine_health_state(Some(&run), 1), HealthState::Degraded);
		assert_eq!(determine_health_state(Some(&run), 2), HealthState::Degraded);
		assert_eq!(determine_health_state(Some(&run), 3), HealthState::Unhealthy);

		run.status = JobStatus::Succeeded;
		assert_eq!(determine_health_state(Some(&run), 0), HealthState::Healthy);
		run.status = JobStatus::Running;
		assert_eq!(determine_health_state(Some(&run), 2), HealthState::Healthy);
	}

	#[tokio::test]
	async fn trigger_unknown_job_is_not_found() {
		let scheduler = scheduler();
		match scheduler.trigger_job("missing", TriggerSource::Manual).await {
			Err(JobError::NotFound(id)) => assert_eq!(id, "missing"),
			other => panic!("expected NotFound, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn retryable_failures_are_retried_within_one_run() {
		let mut scheduler = scheduler();
		let job = CountingJob::new("flaky", 2, true);
		scheduler.register_one_shot(job.clone());

		let run_id = scheduler
			.trigger_job("flaky", TriggerSource::Manual)
			.await
			.unwrap();

		assert_eq!(job.calls(), 3);
		let status = scheduler.job_status("flaky").unwrap();
		assert_eq!(status.status, HealthState::Healthy);
		let last = status.last_run.unwrap();
		assert_eq!(last.run_id, run_id);
		assert_eq!(last.status, JobStatus::Succeeded);
	}

	#[tokio::test]
	async fn permanent_failures_degrade_then_fail_health() {
		let mut scheduler = scheduler();
		let job = CountingJob::new("broken", u32::MAX, false);
		scheduler.register_one_shot(job.clone());

		scheduler
			.trigger_job("broken", TriggerSource::Manual)
			.await
			.unwrap_err();
		assert_eq!(job.calls(), 1);
		assert_eq!(scheduler.health_status().status, HealthState::Degraded);

		for _ in 0..2 {
			scheduler
				.trigger_job("broken", TriggerSource::Manual)
				.await
				.unwrap_err();
		}
		let health = scheduler.health_status();
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.jobs[0].consecutive_failures, 3);
	}

	#[tokio::test]
	async fn cancelled_job_does_not_run() {
		let mut scheduler = scheduler();
		let job = CountingJob::new("sweep", 0, false);
		scheduler.register_one_shot(job.clone());

		scheduler.cancel_job("sweep").unwrap();
		assert!(matches!(
			scheduler.trigger_job("sweep", TriggerSource::Manual).await,
			Err(JobError::Cancelled)
		));
		assert_eq!(job.calls(), 0);
		assert!(matches!(scheduler.cancel_job("missing"), Err(JobError::NotFound(_))));
	}

	#[tokio::test(start_paused = true)]
	async fn periodic_jobs_run_until_shutdown() {
		let mut scheduler = scheduler();
		let periodic = CountingJob::new("sweep", 0, false);
		let once = CountingJob::new("recover", 0, false);
		scheduler.register_periodic(periodic.clone(), Duration::from_secs(60));
		scheduler.register_one_shot(once.clone());

		scheduler.start().await;
		tokio::time::sleep(Duration::from_secs(185)).await;
		scheduler.shutdown().await;

		assert_eq!(periodic.calls(), 3);
		assert_eq!(once.calls(), 1);
	}
}
