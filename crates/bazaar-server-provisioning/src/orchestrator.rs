// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The provisioning state machine.
//!
//! A run advances through [`Stage::STEPS`] strictly in order. After every
//! step a [`StepRecord`] is persisted; a restarted process resumes at the
//! first stage without an `ok` record. Transient step failures are retried
//! with backoff; anything else (or exhausted retries, or a rollback request)
//! moves the run to `COMPENSATING`, where completed steps are undone in
//! reverse order before the run becomes `FAILED`.
//!
//! A compensation that cannot finish leaves the run in `COMPENSATING` so it
//! stays visible to operators and to the stalled-compensation job.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bazaar_server_db::{
	Admission, IdempotencyRepository, IdempotencyStore, NamespaceRepository, NamespaceStore,
	Outcome, ProvisioningRequest, ProvisioningRun, RunId, RunRepository, RunStore, Stage,
	StepRecord, StepStatus, TenantRepository, TenantStore,
};
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProvisioningError, Result, StepError};
use crate::guard::IdempotencyGuard;
use crate::notify::{dispatch_completed, dispatch_failed, Notifier};
use crate::output::{Artifacts, FailureDetail, StepOutput};
use crate::reservation::NamespaceReservation;
use crate::retry::RetryPolicy;
use crate::status::{MarketplaceLinks, RunStatus, UrlSettings};
use crate::steps::{standard_executors, StepContext, StepExecutor};
use crate::validation::{validate_custom_domain, validate_subdomain, ValidationRules};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
	pub retry: RetryPolicy,
	/// How long a namespace stays held without being confirmed.
	pub reservation_ttl: Duration,
	/// How long idempotency keys are remembered.
	pub idempotency_window: Duration,
	/// Age after which a run stuck in `COMPENSATING` is escalated.
	pub compensation_alert: Duration,
	pub urls: UrlSettings,
	pub validation: ValidationRules,
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			retry: RetryPolicy::default(),
			reservation_ttl: Duration::from_secs(900),
			idempotency_window: Duration::from_secs(24 * 60 * 60),
			compensation_alert: Duration::from_secs(600),
			urls: UrlSettings::default(),
			validation: ValidationRules::default(),
		}
	}
}

/// The collaborators the orchestrator is wired with.
#[derive(Clone)]
pub struct ProvisioningStores {
	pub runs: Arc<dyn RunStore>,
	pub idempotency: Arc<dyn IdempotencyStore>,
	pub namespaces: Arc<dyn NamespaceStore>,
	pub tenants: Arc<dyn TenantStore>,
}

impl ProvisioningStores {
	/// All stores backed by the same SQLite pool.
	pub fn sqlite(pool: SqlitePool) -> Self {
		Self {
			runs: Arc::new(RunRepository::new(pool.clone())),
			idempotency: Arc::new(IdempotencyRepository::new(pool.clone())),
			namespaces: Arc::new(NamespaceRepository::new(pool.clone())),
			tenants: Arc::new(TenantRepository::new(pool)),
		}
	}
}

/// Runs currently driven by a task in this process.
#[derive(Clone, Default)]
struct LeaseSet(Arc<Mutex<HashSet<RunId>>>);

impl LeaseSet {
	fn try_acquire(&self, run_id: RunId) -> Option<Lease> {
		let mut held = self.0.lock().unwrap_or_else(PoisonError::into_inner);
		held.insert(run_id).then(|| Lease {
			set: self.clone(),
			run_id,
		})
	}

	fn is_held(&self, run_id: RunId) -> bool {
		self
			.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.contains(&run_id)
	}
}

struct Lease {
	set: LeaseSet,
	run_id: RunId,
}

impl Drop for Lease {
	fn drop(&mut self) {
		self
			.set
			.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&self.run_id);
	}
}

pub struct Orchestrator {
	runs: Arc<dyn RunStore>,
	tenants: Arc<dyn TenantStore>,
	reservation: NamespaceReservation,
	guard: IdempotencyGuard,
	notifier: Arc<dyn Notifier>,
	executors: Vec<Arc<dyn StepExecutor>>,
	config: OrchestratorConfig,
	leases: LeaseSet,
}

impl Orchestrator {
	pub fn new(
		stores: ProvisioningStores,
		notifier: Arc<dyn Notifier>,
		config: OrchestratorConfig,
	) -> Self {
		let reservation = NamespaceReservation::new(stores.namespaces);
		let guard = IdempotencyGuard::new(stores.idempotency, config.idempotency_window);
		let executors = standard_executors(
			Arc::clone(&stores.tenants),
			reservation.clone(),
			config.validation.clone(),
			config.reservation_ttl,
		);

		Self {
			runs: stores.runs,
			tenants: stores.tenants,
			reservation,
			guard,
			notifier,
			executors,
			config,
			leases: LeaseSet::default(),
		}
	}

	pub fn config(&self) -> &OrchestratorConfig {
		&self.config
	}

	pub fn reservation(&self) -> &NamespaceReservation {
		&self.reservation
	}

	pub fn guard(&self) -> &IdempotencyGuard {
		&self.guard
	}

	/// Deduplicate and persist a request without driving it.
	pub async fn admit(&self, request: ProvisioningRequest) -> Result<Admission> {
		self.guard.admit(request).await
	}

	/// Admit a request and drive a new run in the background.
	///
	/// A duplicate submission returns the existing run and starts nothing.
	pub async fn start(self: &Arc<Self>, request: ProvisioningRequest) -> Result<Admission> {
		let admission = self.admit(request).await?;
		if admission.is_new {
			self.spawn_drive(admission.run_id);
		}
		Ok(admission)
	}

	/// Admit a request and drive it to a resting state on the current task.
	pub async fn provision(&self, request: ProvisioningRequest) -> Result<ProvisioningRun> {
		let admission = self.admit(request).await?;
		if admission.is_new {
			self.resume(admission.run_id).await
		} else {
			self.status(admission.run_id).await
		}
	}

	pub fn spawn_drive(self: &Arc<Self>, run_id: RunId) -> JoinHandle<()> {
		let this = Arc::clone(self);
		tokio::spawn(async move {
			if let Err(e) = this.resume(run_id).await {
				error!(run_id = %run_id, error = %e, "Provisioning run driver failed");
			}
		})
	}

	/// Continue a run from its last checkpoint.
	///
	/// If another task in this process is already driving the run, the
	/// current snapshot is returned and nothing is executed.
	#[instrument(skip(self), fields(run_id = %run_id))]
	pub async fn resume(&self, run_id: RunId) -> Result<ProvisioningRun> {
		let Some(_lease) = self.leases.try_acquire(run_id) else {
			debug!("Run is already being driven");
			return self.status(run_id).await;
		};
		self.drive(run_id).await
	}

	pub async fn status(&self, run_id: RunId) -> Result<ProvisioningRun> {
		self
			.runs
			.get_run(run_id)
			.await?
			.ok_or(ProvisioningError::RunNotFound(run_id))
	}

	pub async fn status_view(&self, run_id: RunId) -> Result<RunStatus> {
		let run = self.status(run_id).await?;
		Ok(RunStatus::from_run(&run, &self.config.urls))
	}

	/// Abort a run that has not yet caused any side effect.
	#[instrument(skip(self), fields(run_id = %run_id))]
	pub async fn cancel(&self, run_id: RunId) -> Result<ProvisioningRun> {
		let run = self.status(run_id).await?;
		if !matches!(run.stage, Stage::Pending | Stage::Validating) {
			return Err(ProvisioningError::NotCancellable {
				run_id,
				stage: run.stage,
			});
		}
		self.request_rollback(&run, "cancelled by caller").await
	}

	/// Force a non-terminal run into compensation.
	#[instrument(skip(self, reason), fields(run_id = %run_id))]
	pub async fn rollback(&self, run_id: RunId, reason: Option<&str>) -> Result<ProvisioningRun> {
		let run = self.status(run_id).await?;
		if run.stage.is_terminal() {
			return Err(ProvisioningError::InvalidTransition {
				from: run.stage,
				to: Stage::Compensating,
			});
		}
		self
			.request_rollback(&run, reason.unwrap_or("rollback requested by operator"))
			.await
	}

	async fn request_rollback(&self, run: &ProvisioningRun, reason: &str) -> Result<ProvisioningRun> {
		if !self.runs.request_rollback(run.id, reason).await? {
			let current = self.status(run.id).await?;
			return Err(ProvisioningError::InvalidTransition {
				from: current.stage,
				to: Stage::Compensating,
			});
		}
		info!(reason, "Rollback requested");
		// An active driver notices the flag itself; otherwise compensate here.
		self.resume(run.id).await
	}

	/// Resume every non-terminal run in the background. Called at startup.
	#[instrument(skip(self))]
	pub async fn recover_incomplete(self: &Arc<Self>) -> Result<Vec<RunId>> {
		let mut resumed = Vec::new();
		for run in self.runs.list_active_runs().await? {
			if self.leases.is_held(run.id) {
				continue;
			}
			info!(run_id = %run.id, stage = %run.stage, "Resuming incomplete provisioning run");
			self.spawn_drive(run.id);
			resumed.push(run.id);
		}
		Ok(resumed)
	}

	/// Runs that have sat in `COMPENSATING` longer than the alert threshold.
	pub async fn stalled_compensations(&self) -> Result<Vec<ProvisioningRun>> {
		let threshold = chrono::Duration::from_std(self.config.compensation_alert)
			.map_err(|e| ProvisioningError::Internal(format!("alert threshold out of range: {e}")))?;
		Ok(
			self
				.runs
				.list_stalled_compensations(Utc::now() - threshold)
				.await?,
		)
	}

	/// Whether the namespaces are well-formed and not held by anyone.
	pub async fn namespace_available(
		&self,
		subdomain: Option<&str>,
		custom_domain: Option<&str>,
	) -> Result<bool> {
		if subdomain.is_none() && custom_domain.is_none() {
			return Err(ProvisioningError::InvalidRequest(
				"subdomain or custom_domain is required".to_string(),
			));
		}
		if let Some(subdomain) = subdomain {
			if validate_subdomain(subdomain, &self.config.validation).is_err()
				|| !self.namespace_free(subdomain).await?
			{
				return Ok(false);
			}
		}
		if let Some(domain) = custom_domain {
			if validate_custom_domain(domain).is_err() || !self.namespace_free(domain).await? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	async fn namespace_free(&self, name: &str) -> Result<bool> {
		Ok(self.reservation.is_free(name).await? && !self.tenants.namespace_in_use(name).await?)
	}

	async fn drive(&self, run_id: RunId) -> Result<ProvisioningRun> {
		loop {
			let run = self.status(run_id).await?;
			if run.stage.is_terminal() {
				return Ok(run);
			}
			if run.stage == Stage::Compensating {
				return self.compensate(run).await;
			}
			if run.rollback_requested {
				let reason = rollback_reason(&run);
				return self.begin_compensation(run, reason).await;
			}

			let Some(stage) = run.next_step() else {
				return self.complete(run).await;
			};
			// A failure recorded before the crash still decides the run.
			if let Some(failed) = run
				.step(stage)
				.filter(|r| r.status == StepStatus::Failed && r.compensated_at.is_none())
			{
				let reason = format!(
					"{stage}: {}",
					failed.error.as_deref().unwrap_or("step failed")
				);
				warn!(stage = %stage, "Resuming into compensation for a recorded failure");
				return self.begin_compensation(run, reason).await;
			}
			if run.stage != stage {
				self.advance(&run, stage, Outcome::None, None).await?;
			}
			info!(stage = %stage, "Stage started");

			if let Some(err) = self.execute_step(&run, stage).await? {
				let run = self.status(run_id).await?;
				let reason = if run.rollback_requested {
					rollback_reason(&run)
				} else {
					format!("{stage}: {err}")
				};
				return self.begin_compensation(run, reason).await;
			}
		}
	}

	/// Execute one stage with retries. Returns the error that ended it, if any.
	async fn execute_step(&self, run: &ProvisioningRun, stage: Stage) -> Result<Option<StepError>> {
		let executor = self.executor(stage)?;
		let started_at = Utc::now();
		let artifacts = match Artifacts::from_run(run) {
			Ok(artifacts) => artifacts,
			Err(err) => {
				self.record_failure(run.id, stage, 0, started_at, &err).await?;
				return Ok(Some(err));
			}
		};
		let ctx = StepContext {
			run_id: run.id,
			request: &run.request,
			artifacts: &artifacts,
		};
		let policy = &self.config.retry;
		let mut attempt = 0u32;

		loop {
			attempt += 1;
			let result = policy
				.attempt(executor.run(&ctx))
				.await
				.and_then(|output| output.to_value());

			let err = match result {
				Ok(output) => {
					let record = StepRecord {
						stage,
						status: StepStatus::Ok,
						attempts: attempt,
						started_at,
						completed_at: Some(Utc::now()),
						output: Some(output),
						error: None,
						compensated_at: None,
					};
					self.runs.record_step(run.id, &record).await?;
					info!(stage = %stage, attempts = attempt, "Step completed");
					return Ok(None);
				}
				Err(err) => err,
			};

			if !policy.should_retry(&err, attempt) {
				warn!(stage = %stage, attempt, kind = err.kind(), error = %err, "Step failed");
				self.record_failure(run.id, stage, attempt, started_at, &err).await?;
				return Ok(Some(err));
			}

			let delay = policy.jittered_delay(attempt);
			warn!(
				stage = %stage,
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"Step attempt failed, retrying"
			);
			tokio::time::sleep(delay).await;

			if self.status(run.id).await?.rollback_requested {
				warn!(stage = %stage, "Rollback requested while retrying");
				self.record_failure(run.id, stage, attempt, started_at, &err).await?;
				return Ok(Some(err));
			}
		}
	}

	async fn record_failure(
		&self,
		run_id: RunId,
		stage: Stage,
		attempts: u32,
		started_at: chrono::DateTime<Utc>,
		err: &StepError,
	) -> Result<()> {
		let record = StepRecord {
			stage,
			status: StepStatus::Failed,
			attempts,
			started_at,
			completed_at: Some(Utc::now()),
			output: serde_json::to_value(FailureDetail::from_error(err)).ok(),
			error: Some(err.to_string()),
			compensated_at: None,
		};
		self.runs.record_step(run_id, &record).await?;
		Ok(())
	}

	async fn complete(&self, run: ProvisioningRun) -> Result<ProvisioningRun> {
		self
			.advance(&run, Stage::Completed, Outcome::Succeeded, None)
			.await?;
		let run = self.status(run.id).await?;
		let links = MarketplaceLinks::for_request(&run.request, &self.config.urls);
		info!(marketplace_url = %links.marketplace_url, "Provisioning run completed");
		dispatch_completed(Arc::clone(&self.notifier), run.clone(), links);
		Ok(run)
	}

	async fn begin_compensation(
		&self,
		run: ProvisioningRun,
		reason: String,
	) -> Result<ProvisioningRun> {
		// A stage that was entered but never recorded may have half-applied.
		if run.stage.position().is_some() && run.step(run.stage).is_none() {
			let record = StepRecord {
				stage: run.stage,
				status: StepStatus::Failed,
				attempts: 0,
				started_at: run.updated_at,
				completed_at: None,
				output: serde_json::to_value(FailureDetail::interrupted()).ok(),
				error: Some("interrupted before completion".to_string()),
				compensated_at: None,
			};
			self.runs.record_step(run.id, &record).await?;
		}

		self
			.advance(&run, Stage::Compensating, Outcome::None, Some(&reason))
			.await?;
		warn!(reason = %reason, "Compensation started");
		let run = self.status(run.id).await?;
		self.compensate(run).await
	}

	/// Undo outstanding steps newest first, then mark the run `FAILED`.
	async fn compensate(&self, run: ProvisioningRun) -> Result<ProvisioningRun> {
		let artifacts = Artifacts::from_run(&run).unwrap_or_else(|e| {
			warn!(error = %e, "Unreadable step outputs; compensating by lookup");
			Artifacts::default()
		});
		let pending: Vec<&StepRecord> = run
			.steps
			.iter()
			.filter(|r| r.compensated_at.is_none() && self.needs_undo(r))
			.rev()
			.collect();

		for record in pending {
			let executor = self.executor(record.stage)?;
			let output = if record.is_ok() {
				record
					.output
					.as_ref()
					.and_then(|v| StepOutput::from_value(v).ok())
			} else {
				None
			};
			let ctx = StepContext {
				run_id: run.id,
				request: &run.request,
				artifacts: &artifacts,
			};

			match self.undo_with_retry(executor.as_ref(), &ctx, output.as_ref()).await {
				Ok(()) => {
					self
						.runs
						.mark_compensated(run.id, record.stage, Utc::now())
						.await?;
					info!(stage = %record.stage, "Step compensated");
				}
				Err(err) => {
					error!(
						stage = %record.stage,
						error = %err,
						"Compensation stuck; operator intervention required"
					);
					let mut stuck = record.clone();
					stuck.error = Some(format!("undo failed: {err}"));
					self.runs.record_step(run.id, &stuck).await?;
					self
						.advance(&run, Stage::Compensating, Outcome::None, None)
						.await?;
					return self.status(run.id).await;
				}
			}
		}

		let outcome = if run.steps.iter().any(|r| self.needs_undo(r)) {
			Outcome::Compensated
		} else {
			Outcome::Failed
		};
		self.advance(&run, Stage::Failed, outcome, None).await?;
		let run = self.status(run.id).await?;
		info!(outcome = outcome.as_str(), "Compensation finished");
		dispatch_failed(Arc::clone(&self.notifier), run.clone());
		Ok(run)
	}

	async fn undo_with_retry(
		&self,
		executor: &dyn StepExecutor,
		ctx: &StepContext<'_>,
		output: Option<&StepOutput>,
	) -> std::result::Result<(), StepError> {
		let policy = &self.config.retry;
		let mut attempt = 0u32;
		loop {
			attempt += 1;
			match policy.attempt(executor.undo(ctx, output)).await {
				Ok(()) => return Ok(()),
				Err(err) if attempt < policy.max_attempts => {
					let delay = policy.jittered_delay(attempt);
					warn!(
						stage = %executor.stage(),
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %err,
						"Compensation attempt failed, retrying"
					);
					tokio::time::sleep(delay).await;
				}
				Err(err) => return Err(err),
			}
		}
	}

	/// Whether the step left something behind that compensation must remove.
	fn needs_undo(&self, record: &StepRecord) -> bool {
		let side_effects = self
			.executor(record.stage)
			.map(|e| e.has_side_effects())
			.unwrap_or(false);
		side_effects && (record.is_ok() || FailureDetail::of_record(record).partial_effect)
	}

	fn executor(&self, stage: Stage) -> Result<&Arc<dyn StepExecutor>> {
		self
			.executors
			.iter()
			.find(|e| e.stage() == stage)
			.ok_or_else(|| ProvisioningError::Internal(format!("no executor for stage {stage}")))
	}

	async fn advance(
		&self,
		run: &ProvisioningRun,
		to: Stage,
		outcome: Outcome,
		failure_reason: Option<&str>,
	) -> Result<()> {
		if !run.stage.can_transition_to(to) {
			return Err(ProvisioningError::InvalidTransition {
				from: run.stage,
				to,
			});
		}
		self
			.runs
			.transition(run.id, to, outcome, failure_reason)
			.await?;
		if run.stage != to {
			info!(from = %run.stage, to = %to, "Run stage transition");
		}
		Ok(())
	}
}

fn rollback_reason(run: &ProvisioningRun) -> String {
	run
		.rollback_reason
		.clone()
		.unwrap_or_else(|| "rollback requested".to_string())
}
