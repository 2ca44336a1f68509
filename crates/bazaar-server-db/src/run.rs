// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioning state store: durable runs and their step checkpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::error::{DbError, Result};
use crate::types::{parse_id, timestamp, ProvisioningRequest, RunId};

/// Provisioning stages in their fixed total order, followed by the
/// compensation and terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
	Pending,
	Validating,
	ReservingNamespace,
	CreatingTenant,
	ProvisioningSchema,
	CreatingAdmin,
	ApplyingSettings,
	Finalizing,
	Completed,
	Compensating,
	Failed,
}

impl Stage {
	/// Stages that execute a step, in execution order.
	pub const STEPS: [Stage; 7] = [
		Stage::Validating,
		Stage::ReservingNamespace,
		Stage::CreatingTenant,
		Stage::ProvisioningSchema,
		Stage::CreatingAdmin,
		Stage::ApplyingSettings,
		Stage::Finalizing,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Stage::Pending => "PENDING",
			Stage::Validating => "VALIDATING",
			Stage::ReservingNamespace => "RESERVING_NAMESPACE",
			Stage::CreatingTenant => "CREATING_TENANT",
			Stage::ProvisioningSchema => "PROVISIONING_SCHEMA",
			Stage::CreatingAdmin => "CREATING_ADMIN",
			Stage::ApplyingSettings => "APPLYING_SETTINGS",
			Stage::Finalizing => "FINALIZING",
			Stage::Completed => "COMPLETED",
			Stage::Compensating => "COMPENSATING",
			Stage::Failed => "FAILED",
		}
	}

	/// Index of this stage within [`Stage::STEPS`].
	pub fn position(&self) -> Option<usize> {
		Stage::STEPS.iter().position(|s| s == self)
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Stage::Completed | Stage::Failed)
	}

	/// The following stage on the forward path.
	pub fn next(&self) -> Option<Stage> {
		match self {
			Stage::Pending => Some(Stage::Validating),
			Stage::Finalizing => Some(Stage::Completed),
			Stage::Compensating => Some(Stage::Failed),
			Stage::Completed | Stage::Failed => None,
			step => step
				.position()
				.and_then(|i| Stage::STEPS.get(i + 1))
				.copied(),
		}
	}

	/// No skipping, no going back except through compensation.
	pub fn can_transition_to(&self, to: Stage) -> bool {
		if self.is_terminal() {
			return false;
		}
		if *self == to {
			return true;
		}
		match (self, to) {
			(Stage::Compensating, Stage::Failed) => true,
			(Stage::Compensating, _) => false,
			(_, Stage::Compensating) => true,
			(from, to) => from.next() == Some(to),
		}
	}
}

impl std::fmt::Display for Stage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Stage {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"PENDING" => Ok(Stage::Pending),
			"VALIDATING" => Ok(Stage::Validating),
			"RESERVING_NAMESPACE" => Ok(Stage::ReservingNamespace),
			"CREATING_TENANT" => Ok(Stage::CreatingTenant),
			"PROVISIONING_SCHEMA" => Ok(Stage::ProvisioningSchema),
			"CREATING_ADMIN" => Ok(Stage::CreatingAdmin),
			"APPLYING_SETTINGS" => Ok(Stage::ApplyingSettings),
			"FINALIZING" => Ok(Stage::Finalizing),
			"COMPLETED" => Ok(Stage::Completed),
			"COMPENSATING" => Ok(Stage::Compensating),
			"FAILED" => Ok(Stage::Failed),
			_ => Err(format!("unknown stage: {s}")),
		}
	}
}

/// Terminal result of a run. `None` until the run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
	None,
	Succeeded,
	Failed,
	Compensated,
}

impl Outcome {
	pub fn as_str(&self) -> &'static str {
		match self {
			Outcome::None => "none",
			Outcome::Succeeded => "succeeded",
			Outcome::Failed => "failed",
			Outcome::Compensated => "compensated",
		}
	}
}

impl std::str::FromStr for Outcome {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"none" => Ok(Outcome::None),
			"succeeded" => Ok(Outcome::Succeeded),
			"failed" => Ok(Outcome::Failed),
			"compensated" => Ok(Outcome::Compensated),
			_ => Err(format!("unknown outcome: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
	Ok,
	Failed,
}

impl StepStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			StepStatus::Ok => "ok",
			StepStatus::Failed => "failed",
		}
	}
}

impl std::str::FromStr for StepStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"ok" => Ok(StepStatus::Ok),
			"failed" => Ok(StepStatus::Failed),
			_ => Err(format!("unknown step status: {s}")),
		}
	}
}

/// Checkpoint written after a step finishes, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
	pub stage: Stage,
	pub status: StepStatus,
	pub attempts: u32,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	/// Output captured for later steps and for compensation.
	pub output: Option<serde_json::Value>,
	pub error: Option<String>,
	pub compensated_at: Option<DateTime<Utc>>,
}

impl StepRecord {
	pub fn is_ok(&self) -> bool {
		self.status == StepStatus::Ok
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRun {
	pub id: RunId,
	pub request: ProvisioningRequest,
	pub stage: Stage,
	pub outcome: Outcome,
	/// Step records ordered by stage position.
	pub steps: Vec<StepRecord>,
	pub failure_reason: Option<String>,
	pub rollback_requested: bool,
	pub rollback_reason: Option<String>,
	/// When the run first entered `COMPENSATING`. Retries leave it unchanged.
	pub compensation_started_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ProvisioningRun {
	/// A freshly accepted run, not yet persisted.
	pub fn new(request: ProvisioningRequest) -> Self {
		let now = Utc::now();
		Self {
			id: RunId::generate(),
			request,
			stage: Stage::Pending,
			outcome: Outcome::None,
			steps: Vec::new(),
			failure_reason: None,
			rollback_requested: false,
			rollback_reason: None,
			compensation_started_at: None,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn step(&self, stage: Stage) -> Option<&StepRecord> {
		self.steps.iter().find(|s| s.stage == stage)
	}

	pub fn is_step_ok(&self, stage: Stage) -> bool {
		self.step(stage).map(StepRecord::is_ok).unwrap_or(false)
	}

	/// First stage lacking an `ok` record: where a resumed run continues.
	pub fn next_step(&self) -> Option<Stage> {
		Stage::STEPS.into_iter().find(|s| !self.is_step_ok(*s))
	}
}

type RunRow = (
	String,
	String,
	String,
	String,
	Option<String>,
	bool,
	Option<String>,
	Option<DateTime<Utc>>,
	DateTime<Utc>,
	DateTime<Utc>,
);

type StepRow = (
	String,
	String,
	i64,
	DateTime<Utc>,
	Option<DateTime<Utc>>,
	Option<String>,
	Option<String>,
	Option<DateTime<Utc>>,
);

const RUN_COLUMNS: &str = "id, request, stage, outcome, failure_reason, rollback_requested, rollback_reason, compensation_started_at, created_at, updated_at";

#[async_trait]
pub trait RunStore: Send + Sync {
	async fn get_run(&self, id: RunId) -> Result<Option<ProvisioningRun>>;
	async fn list_active_runs(&self) -> Result<Vec<ProvisioningRun>>;
	async fn list_stalled_compensations(
		&self,
		started_before: DateTime<Utc>,
	) -> Result<Vec<ProvisioningRun>>;
	async fn transition(
		&self,
		id: RunId,
		stage: Stage,
		outcome: Outcome,
		failure_reason: Option<&str>,
	) -> Result<()>;
	async fn record_step(&self, id: RunId, record: &StepRecord) -> Result<()>;
	async fn mark_compensated(&self, id: RunId, stage: Stage, at: DateTime<Utc>) -> Result<()>;
	async fn request_rollback(&self, id: RunId, reason: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct RunRepository {
	pool: SqlitePool,
}

impl RunRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert a new run. Used inside the idempotency admission transaction.
	pub(crate) async fn insert_run<'e, E>(executor: E, run: &ProvisioningRun) -> Result<()>
	where
		E: Executor<'e, Database = Sqlite>,
	{
		let request = serde_json::to_string(&run.request)?;
		sqlx::query(
			r#"
			INSERT INTO provisioning_runs (id, idempotency_key, request, stage, outcome, failure_reason, rollback_requested, rollback_reason, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(run.id.to_string())
		.bind(&run.request.idempotency_key)
		.bind(request)
		.bind(run.stage.as_str())
		.bind(run.outcome.as_str())
		.bind(&run.failure_reason)
		.bind(run.rollback_requested)
		.bind(&run.rollback_reason)
		.bind(timestamp(run.created_at))
		.bind(timestamp(run.updated_at))
		.execute(executor)
		.await
		.map_err(|e| DbError::from_write(e, format!("run {} already exists", run.id)))?;

		Ok(())
	}

	async fn load_steps(&self, id: &str) -> Result<Vec<StepRecord>> {
		let rows = sqlx::query_as::<_, StepRow>(
			r#"
			SELECT stage, status, attempts, started_at, completed_at, output, error, compensated_at
			FROM provisioning_step_records
			WHERE run_id = ?
			ORDER BY position
			"#,
		)
		.bind(id)
		.fetch_all(&self.pool)
		.await?;

		rows
			.into_iter()
			.map(
				|(stage, status, attempts, started_at, completed_at, output, error, compensated_at)| {
					Ok(StepRecord {
						stage: stage.parse().map_err(DbError::Internal)?,
						status: status.parse().map_err(DbError::Internal)?,
						attempts: attempts as u32,
						started_at,
						completed_at,
						output: output.as_deref().map(serde_json::from_str).transpose()?,
						error,
						compensated_at,
					})
				},
			)
			.collect()
	}

	async fn hydrate(&self, row: RunRow) -> Result<ProvisioningRun> {
		let (
			id,
			request,
			stage,
			outcome,
			failure_reason,
			rollback_requested,
			rollback_reason,
			compensation_started_at,
			created_at,
			updated_at,
		) = row;
		let steps = self.load_steps(&id).await?;

		Ok(ProvisioningRun {
			id: parse_id(&id, "run")?,
			request: serde_json::from_str(&request)?,
			stage: stage.parse().map_err(DbError::Internal)?,
			outcome: outcome.parse().map_err(DbError::Internal)?,
			steps,
			failure_reason,
			rollback_requested,
			rollback_reason,
			compensation_started_at,
			created_at,
			updated_at,
		})
	}

	#[tracing::instrument(skip(self), fields(run_id = %id))]
	pub async fn get_run(&self, id: RunId) -> Result<Option<ProvisioningRun>> {
		let row = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM provisioning_runs WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		match row {
			Some(row) => Ok(Some(self.hydrate(row).await?)),
			None => Ok(None),
		}
	}

	/// Runs that have not reached a terminal stage, oldest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_active_runs(&self) -> Result<Vec<ProvisioningRun>> {
		let rows = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM provisioning_runs WHERE stage NOT IN (?, ?) ORDER BY created_at"
		))
		.bind(Stage::Completed.as_str())
		.bind(Stage::Failed.as_str())
		.fetch_all(&self.pool)
		.await?;

		let mut runs = Vec::with_capacity(rows.len());
		for row in rows {
			runs.push(self.hydrate(row).await?);
		}
		Ok(runs)
	}

	/// Runs still in `COMPENSATING` that entered it before `started_before`.
	#[tracing::instrument(skip(self))]
	pub async fn list_stalled_compensations(
		&self,
		started_before: DateTime<Utc>,
	) -> Result<Vec<ProvisioningRun>> {
		let rows = sqlx::query_as::<_, RunRow>(&format!(
			"SELECT {RUN_COLUMNS} FROM provisioning_runs WHERE stage = ? AND compensation_started_at < ? ORDER BY compensation_started_at"
		))
		.bind(Stage::Compensating.as_str())
		.bind(timestamp(started_before))
		.fetch_all(&self.pool)
		.await?;

		let mut runs = Vec::with_capacity(rows.len());
		for row in rows {
			runs.push(self.hydrate(row).await?);
		}
		Ok(runs)
	}

	/// Persist a stage change. A `None` failure reason keeps the existing one.
	#[tracing::instrument(skip(self, failure_reason), fields(run_id = %id, stage = %stage))]
	pub async fn transition(
		&self,
		id: RunId,
		stage: Stage,
		outcome: Outcome,
		failure_reason: Option<&str>,
	) -> Result<()> {
		let now = timestamp(Utc::now());
		let result = sqlx::query(
			r#"
			UPDATE provisioning_runs
			SET stage = ?,
				outcome = ?,
				failure_reason = COALESCE(?, failure_reason),
				compensation_started_at = CASE
					WHEN ? THEN COALESCE(compensation_started_at, ?)
					ELSE compensation_started_at
				END,
				updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(stage.as_str())
		.bind(outcome.as_str())
		.bind(failure_reason)
		.bind(stage == Stage::Compensating)
		.bind(now.as_str())
		.bind(now.as_str())
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("run {id}")));
		}

		Ok(())
	}

	#[tracing::instrument(skip(self, record), fields(run_id = %id, stage = %record.stage))]
	pub async fn record_step(&self, id: RunId, record: &StepRecord) -> Result<()> {
		let position = record
			.stage
			.position()
			.ok_or_else(|| DbError::Internal(format!("{} is not a step stage", record.stage)))?;
		let output = record.output.as_ref().map(|o| o.to_string());

		sqlx::query(
			r#"
			INSERT INTO provisioning_step_records (run_id, stage, position, status, attempts, started_at, completed_at, output, error, compensated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(run_id, stage) DO UPDATE SET
				status = excluded.status,
				attempts = excluded.attempts,
				started_at = excluded.started_at,
				completed_at = excluded.completed_at,
				output = excluded.output,
				error = excluded.error,
				compensated_at = excluded.compensated_at
			"#,
		)
		.bind(id.to_string())
		.bind(record.stage.as_str())
		.bind(position as i64)
		.bind(record.status.as_str())
		.bind(record.attempts as i64)
		.bind(timestamp(record.started_at))
		.bind(record.completed_at.map(timestamp))
		.bind(output)
		.bind(&record.error)
		.bind(record.compensated_at.map(timestamp))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(run_id = %id, stage = %stage))]
	pub async fn mark_compensated(&self, id: RunId, stage: Stage, at: DateTime<Utc>) -> Result<()> {
		let result = sqlx::query(
			"UPDATE provisioning_step_records SET compensated_at = ? WHERE run_id = ? AND stage = ?",
		)
		.bind(timestamp(at))
		.bind(id.to_string())
		.bind(stage.as_str())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("step {stage} of run {id}")));
		}

		Ok(())
	}

	/// Flag a non-terminal run for rollback. Returns `false` if the run is
	/// unknown or already terminal.
	#[tracing::instrument(skip(self), fields(run_id = %id))]
	pub async fn request_rollback(&self, id: RunId, reason: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE provisioning_runs
			SET rollback_requested = 1,
				rollback_reason = COALESCE(rollback_reason, ?),
				updated_at = ?
			WHERE id = ? AND stage NOT IN (?, ?)
			"#,
		)
		.bind(reason)
		.bind(timestamp(Utc::now()))
		.bind(id.to_string())
		.bind(Stage::Completed.as_str())
		.bind(Stage::Failed.as_str())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
impl RunStore for RunRepository {
	async fn get_run(&self, id: RunId) -> Result<Option<ProvisioningRun>> {
		self.get_run(id).await
	}

	async fn list_active_runs(&self) -> Result<Vec<ProvisioningRun>> {
		self.list_active_runs().await
	}

	async fn list_stalled_compensations(
		&self,
		started_before: DateTime<Utc>,
	) -> Result<Vec<ProvisioningRun>> {
		self.list_stalled_compensations(started_before).await
	}

	async fn transition(
		&self,
		id: RunId,
		stage: Stage,
		outcome: Outcome,
		failure_reason: Option<&str>,
	) -> Result<()> {
		self.transition(id, stage, outcome, failure_reason).await
	}

	async fn record_step(&self, id: RunId, record: &StepRecord) -> Result<()> {
		self.record_step(id, record).await
	}

	async fn mark_compensated(&self, id: RunId, stage: Stage, at: DateTime<Utc>) -> Result<()> {
		self.mark_compensated(id, stage, at).await
	}

	async fn request_rollback(&self, id: RunId, reason: &str) -> Result<bool> {
		self.request_rollback(id, reason).await
	}
}
