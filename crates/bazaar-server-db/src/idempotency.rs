// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Idempotency keys bound to provisioning runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::run::{ProvisioningRun, RunRepository};
use crate::types::{parse_id, timestamp, RunId};

/// Result of admitting a request under an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
	pub run_id: RunId,
	pub is_new: bool,
	/// Fingerprint stored with the key; differs from the submitted one when a
	/// key is replayed with a different payload.
	pub fingerprint: String,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
	async fn admit(
		&self,
		fingerprint: &str,
		run: &ProvisioningRun,
		expires_at: DateTime<Utc>,
	) -> Result<Admission>;
	async fn lookup(&self, key: &str, now: DateTime<Utc>) -> Result<Option<RunId>>;
	async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct IdempotencyRepository {
	pool: SqlitePool,
}

impl IdempotencyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Bind the run's idempotency key to the run, or return the run that
	/// already owns a live key.
	///
	/// The key upsert is the first statement of the transaction so concurrent
	/// admissions serialize on the write lock; the run row is only inserted by
	/// the admission that claimed the key.
	#[tracing::instrument(skip(self, fingerprint, run), fields(run_id = %run.id, key = %run.request.idempotency_key))]
	pub async fn admit(
		&self,
		fingerprint: &str,
		run: &ProvisioningRun,
		expires_at: DateTime<Utc>,
	) -> Result<Admission> {
		let key = &run.request.idempotency_key;
		let now = timestamp(run.created_at);
		let mut tx = self.pool.begin().await?;

		let result = sqlx::query(
			r#"
			INSERT INTO idempotency_keys (key, run_id, fingerprint, created_at, expires_at)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET
				run_id = excluded.run_id,
				fingerprint = excluded.fingerprint,
				created_at = excluded.created_at,
				expires_at = excluded.expires_at
			WHERE idempotency_keys.expires_at <= ?
			"#,
		)
		.bind(key)
		.bind(run.id.to_string())
		.bind(fingerprint)
		.bind(&now)
		.bind(timestamp(expires_at))
		.bind(&now)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() > 0 {
			RunRepository::insert_run(&mut *tx, run).await?;
			tx.commit().await?;
			return Ok(Admission {
				run_id: run.id,
				is_new: true,
				fingerprint: fingerprint.to_string(),
			});
		}

		let (run_id, stored): (String, String) =
			sqlx::query_as("SELECT run_id, fingerprint FROM idempotency_keys WHERE key = ?")
				.bind(key)
				.fetch_one(&mut *tx)
				.await?;
		tx.commit().await?;

		Ok(Admission {
			run_id: parse_id(&run_id, "run")?,
			is_new: false,
			fingerprint: stored,
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn lookup(&self, key: &str, now: DateTime<Utc>) -> Result<Option<RunId>> {
		let row: Option<(String,)> =
			sqlx::query_as("SELECT run_id FROM idempotency_keys WHERE key = ? AND expires_at > ?")
				.bind(key)
				.bind(timestamp(now))
				.fetch_optional(&self.pool)
				.await?;

		row.map(|(run_id,)| parse_id(&run_id, "run")).transpose()
	}

	/// Forget keys past their retention window. Runs are kept for audit.
	#[tracing::instrument(skip(self))]
	pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= ?")
			.bind(timestamp(now))
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
impl IdempotencyStore for IdempotencyRepository {
	async fn admit(
		&self,
		fingerprint: &str,
		run: &ProvisioningRun,
		expires_at: DateTime<Utc>,
	) -> Result<Admission> {
		self.admit(fingerprint, run, expires_at).await
	}

	async fn lookup(&self, key: &str, now: DateTime<Utc>) -> Result<Option<RunId>> {
		self.lookup(key, now).await
	}

	async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		self.purge_expired(now).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::run::RunRepository;
	use crate::testing::{create_test_pool, sample_request};
	use chrono::Duration;
	use std::sync::Arc;

	#[tokio::test]
	async fn test_first_admission_creates_run() {
		let pool = create_test_pool().await;
		let repo = IdempotencyRepository::new(pool.clone());
		let runs = RunRepository::new(pool);
		let run = ProvisioningRun::new(sample_request("k1", "acme"));

		let admission = repo
			.admit("fp", &run, Utc::now() + Duration::hours(24))
			.await
			.unwrap();
		assert!(admission.is_new);
		assert_eq!(admission.run_id, run.id);
		assert!(runs.get_run(run.id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_replay_returns_existing_run() {
		let pool = create_test_pool().await;
		let repo = IdempotencyRepository::new(pool.clone());
		let runs = RunRepository::new(pool);
		let first = ProvisioningRun::new(sample_request("k1", "acme"));
		let second = ProvisioningRun::new(sample_request("k1", "acme"));
		let expiry = Utc::now() + Duration::hours(24);

		repo.admit("fp", &first, expiry).await.unwrap();
		let replay = repo.admit("fp-other", &second, expiry).await.unwrap();

		assert!(!replay.is_new);
		assert_eq!(replay.run_id, first.id);
		assert_eq!(replay.fingerprint, "fp");
		assert!(runs.get_run(second.id).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_expired_key_admits_new_run() {
		let pool = create_test_pool().await;
		let repo = IdempotencyRepository::new(pool);
		let mut old = ProvisioningRun::new(sample_request("k1", "acme"));
		old.created_at = Utc::now() - Duration::hours(48);
		repo
			.admit("fp", &old, old.created_at + Duration::hours(24))
			.await
			.unwrap();

		let fresh = ProvisioningRun::new(sample_request("k1", "acme"));
		let admission = repo
			.admit("fp", &fresh, Utc::now() + Duration::hours(24))
			.await
			.unwrap();
		assert!(admission.is_new);
		assert_eq!(admission.run_id, fresh.id);
	}

	#[tokio::test]
	async fn test_concurrent_admissions_yield_one_run() {
		let pool = create_test_pool().await;
		let repo = Arc::new(IdempotencyRepository::new(pool));
		let expiry = Utc::now() + Duration::hours(24);

		let mut handles = Vec::new();
		for _ in 0..8 {
			let repo = Arc::clone(&repo);
			handles.push(tokio::spawn(async move {
				let run = ProvisioningRun::new(sample_request("k1", "acme"));
				repo.admit("fp", &run, expiry).await.unwrap()
			}));
		}

		let mut admissions = Vec::new();
		for handle in handles {
			admissions.push(handle.await.unwrap());
		}
		let new_count = admissions.iter().filter(|a| a.is_new).count();
		assert_eq!(new_count, 1);
		let first = admissions[0].run_id;
		assert!(admissions.iter().all(|a| a.run_id == first));
	}

	#[tokio::test]
	async fn test_lookup_and_purge() {
		let pool = create_test_pool().await;
		let repo = IdempotencyRepository::new(pool);
		let run = ProvisioningRun::new(sample_request("k1", "acme"));
		let expiry = Utc::now() + Duration::hours(1);
		repo.admit("fp", &run, expiry).await.unwrap();

		assert_eq!(repo.lookup("k1", Utc::now()).await.unwrap(), Some(run.id));
		assert_eq!(repo.purge_expired(Utc::now()).await.unwrap(), 0);

		let later = expiry + Duration::seconds(1);
		assert_eq!(repo.lookup("k1", later).await.unwrap(), None);
		assert_eq!(repo.purge_expired(later).await.unwrap(), 1);
		assert_eq!(repo.lookup("k1", Utc::now()).await.unwrap(), None);
	}
}
