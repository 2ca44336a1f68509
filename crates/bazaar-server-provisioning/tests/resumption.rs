// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-and-restart behaviour against a file-backed database.

mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bazaar_server_db::testing::{create_test_pool, sample_request};
use bazaar_server_db::{
	create_pool, run_migrations, NamespaceRepository, NamespaceStore, Outcome, ProvisioningRun,
	ReservationState, RunId, RunRepository, Stage, StepRecord, StepStatus,
};
use bazaar_server_provisioning::output::FailureDetail;
use bazaar_server_provisioning::{OrchestratorConfig, RetryPolicy, StepError};
use sqlx::SqlitePool;
use support::{
	count_rows, count_tenants, fast_config, orchestrator, orchestrator_with, wait_for_terminal,
	FaultMode, FaultyTenantStore, Op,
};
use tempfile::tempdir;

async fn open(path: &Path) -> SqlitePool {
	let pool = create_pool(&format!("sqlite:{}", path.display()))
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

fn patient_config() -> OrchestratorConfig {
	OrchestratorConfig {
		retry: RetryPolicy {
			attempt_timeout: Duration::from_secs(30),
			..fast_config().retry
		},
		..fast_config()
	}
}

/// Drive a fresh run until `op` has taken effect, then kill the driver and
/// close the database as a process crash would.
async fn crash_after(path: &Path, op: Op) -> RunId {
	let pool = open(path).await;
	let tenants =
		Arc::new(FaultyTenantStore::new(pool.clone()).with_fault(op, FaultMode::HangAfter));
	let hit = Arc::clone(&tenants.hit);
	let orch = orchestrator_with(pool.clone(), Some(tenants), patient_config());

	let admission = orch.admit(sample_request("k1", "acme")).await.unwrap();
	let driver = orch.spawn_drive(admission.run_id);
	hit.notified().await;
	driver.abort();
	let _ = driver.await;
	drop(orch);
	pool.close().await;

	admission.run_id
}

fn crash_stage(op: Op) -> Stage {
	match op {
		Op::CreateTenant => Stage::CreatingTenant,
		Op::SeedFields => Stage::ProvisioningSchema,
		Op::CreateAdmin => Stage::CreatingAdmin,
		Op::UpsertSettings => Stage::ApplyingSettings,
		Op::ActivateTenant => Stage::Finalizing,
		Op::DeleteTenant => unreachable!(),
	}
}

/// Persist a failed record for `stage` without moving the run on, as a
/// crash between recording the failure and starting compensation leaves it.
async fn record_failed_step(pool: &SqlitePool, run_id: RunId, stage: Stage, err: &StepError) {
	RunRepository::new(pool.clone())
		.record_step(
			run_id,
			&StepRecord {
				stage,
				status: StepStatus::Failed,
				attempts: 3,
				started_at: chrono::Utc::now(),
				completed_at: Some(chrono::Utc::now()),
				output: Some(serde_json::to_value(FailureDetail::from_error(err)).unwrap()),
				error: Some(err.to_string()),
				compensated_at: None,
			},
		)
		.await
		.unwrap();
}

fn assert_completed(run: &ProvisioningRun) {
	assert_eq!(run.stage, Stage::Completed);
	assert_eq!(run.outcome, Outcome::Succeeded);
	let stages: Vec<Stage> = run.steps.iter().map(|s| s.stage).collect();
	assert_eq!(stages, Stage::STEPS.to_vec());
	assert!(run.steps.iter().all(|s| s.status == StepStatus::Ok));
}

#[tokio::test]
async fn crash_at_any_stage_resumes_to_the_uninterrupted_outcome() {
	let baseline_dir = tempdir().unwrap();
	let baseline_pool = open(&baseline_dir.path().join("baseline.db")).await;
	let baseline = orchestrator(baseline_pool)
		.provision(sample_request("k1", "acme"))
		.await
		.unwrap();
	assert_completed(&baseline);

	for op in [
		Op::CreateTenant,
		Op::SeedFields,
		Op::CreateAdmin,
		Op::UpsertSettings,
		Op::ActivateTenant,
	] {
		let dir = tempdir().unwrap();
		let path = dir.path().join("bazaar.db");
		let run_id = crash_after(&path, op).await;

		let pool = open(&path).await;
		let orch = orchestrator(pool.clone());
		let interrupted = orch.status(run_id).await.unwrap();
		assert_eq!(interrupted.stage, crash_stage(op), "{op:?}");
		assert!(interrupted.step(crash_stage(op)).is_none(), "{op:?}");

		let run = orch.resume(run_id).await.unwrap();
		assert_completed(&run);
		assert_eq!(run.outcome, baseline.outcome);
		assert_eq!(count_tenants(&pool, "acme").await, 1, "{op:?}");
		assert_eq!(count_rows(&pool, "tenant_admin_accounts").await, 1, "{op:?}");
		assert_eq!(count_rows(&pool, "tenant_product_fields").await, 7, "{op:?}");

		let reservation = NamespaceRepository::new(pool.clone())
			.get_reservation("acme")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(reservation.state, ReservationState::Confirmed);
	}
}

#[tokio::test]
async fn resumed_failure_matches_uninterrupted_failure() {
	let baseline_dir = tempdir().unwrap();
	let baseline_pool = open(&baseline_dir.path().join("baseline.db")).await;
	let failing = Arc::new(
		FaultyTenantStore::new(baseline_pool.clone())
			.with_fault(Op::CreateAdmin, FaultMode::Unrecoverable),
	);
	let baseline = orchestrator_with(baseline_pool, Some(failing), fast_config())
		.provision(sample_request("k1", "acme"))
		.await
		.unwrap();

	let dir = tempdir().unwrap();
	let path = dir.path().join("bazaar.db");
	let run_id = crash_after(&path, Op::SeedFields).await;

	let pool = open(&path).await;
	let failing = Arc::new(
		FaultyTenantStore::new(pool.clone()).with_fault(Op::CreateAdmin, FaultMode::Unrecoverable),
	);
	let run = orchestrator_with(pool.clone(), Some(failing), fast_config())
		.resume(run_id)
		.await
		.unwrap();

	assert_eq!(run.stage, baseline.stage);
	assert_eq!(run.outcome, baseline.outcome);
	assert_eq!(run.outcome, Outcome::Compensated);
	assert_eq!(count_tenants(&pool, "acme").await, 0);
}

#[tokio::test]
async fn recover_incomplete_resumes_interrupted_runs() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("bazaar.db");
	let run_id = crash_after(&path, Op::CreateAdmin).await;

	let pool = open(&path).await;
	let orch = orchestrator(pool);
	let resumed = orch.recover_incomplete().await.unwrap();
	assert_eq!(resumed, vec![run_id]);

	let run = wait_for_terminal(&orch, run_id).await;
	assert_completed(&run);
}

#[tokio::test]
async fn rollback_after_crash_undoes_the_interrupted_stage() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("bazaar.db");
	let run_id = crash_after(&path, Op::CreateAdmin).await;

	let pool = open(&path).await;
	let orch = orchestrator(pool.clone());
	let run = orch.rollback(run_id, Some("abandoned")).await.unwrap();

	assert_eq!(run.stage, Stage::Failed);
	assert_eq!(run.outcome, Outcome::Compensated);
	let admin = run.step(Stage::CreatingAdmin).unwrap();
	assert_eq!(admin.status, StepStatus::Failed);
	assert!(admin.compensated_at.is_some());
	assert_eq!(count_rows(&pool, "tenant_admin_accounts").await, 0);
	assert_eq!(count_tenants(&pool, "acme").await, 0);
}

#[tokio::test]
async fn recorded_validation_failure_is_not_re_executed() {
	let pool = create_test_pool().await;
	let orch = orchestrator(pool.clone());
	let admission = orch.admit(sample_request("k1", "acme")).await.unwrap();
	RunRepository::new(pool.clone())
		.transition(admission.run_id, Stage::Validating, Outcome::None, None)
		.await
		.unwrap();
	let err = StepError::Validation("subdomain is reserved".to_string());
	record_failed_step(&pool, admission.run_id, Stage::Validating, &err).await;

	let run = orch.resume(admission.run_id).await.unwrap();

	assert_eq!(run.stage, Stage::Failed);
	assert_eq!(run.outcome, Outcome::Failed);
	assert_eq!(run.step(Stage::Validating).unwrap().status, StepStatus::Failed);
	assert!(run.step(Stage::ReservingNamespace).is_none());
	assert_eq!(
		run.failure_reason.as_deref(),
		Some("VALIDATING: validation failed: subdomain is reserved")
	);
	assert_eq!(count_tenants(&pool, "acme").await, 0);
}

#[tokio::test]
async fn crash_after_exhausted_retries_still_compensates() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("bazaar.db");
	let run_id = crash_after(&path, Op::CreateAdmin).await;

	let pool = open(&path).await;
	let err = StepError::Transient("connection reset".to_string());
	record_failed_step(&pool, run_id, Stage::CreatingAdmin, &err).await;

	let run = orchestrator(pool.clone()).resume(run_id).await.unwrap();

	assert_eq!(run.stage, Stage::Failed);
	assert_eq!(run.outcome, Outcome::Compensated);
	let admin = run.step(Stage::CreatingAdmin).unwrap();
	assert_eq!(admin.status, StepStatus::Failed);
	assert!(admin.compensated_at.is_some());
	assert!(run
		.failure_reason
		.as_deref()
		.unwrap()
		.starts_with("CREATING_ADMIN: transient failure"));
	assert_eq!(count_rows(&pool, "tenant_admin_accounts").await, 0);
	assert_eq!(count_tenants(&pool, "acme").await, 0);
	assert!(orchestrator(pool).namespace_available(Some("acme"), None).await.unwrap());
}
