// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Namespace reservations: at most one live holder per subdomain or domain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::types::{parse_id, timestamp, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
	Held,
	Confirmed,
	Released,
}

impl ReservationState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ReservationState::Held => "held",
			ReservationState::Confirmed => "confirmed",
			ReservationState::Released => "released",
		}
	}
}

impl std::str::FromStr for ReservationState {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"held" => Ok(ReservationState::Held),
			"confirmed" => Ok(ReservationState::Confirmed),
			"released" => Ok(ReservationState::Released),
			_ => Err(format!("unknown reservation state: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
	pub namespace: String,
	pub run_id: RunId,
	pub state: ReservationState,
	/// `None` once confirmed or released.
	pub expires_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl ReservationRecord {
	/// Whether this row still blocks other runs at `now`.
	pub fn is_live(&self, now: DateTime<Utc>) -> bool {
		match self.state {
			ReservationState::Confirmed => true,
			ReservationState::Held => self.expires_at.map(|e| e > now).unwrap_or(false),
			ReservationState::Released => false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
	Reserved,
	Conflict { holder: RunId },
}

type ReservationRow = (
	String,
	String,
	String,
	Option<DateTime<Utc>>,
	DateTime<Utc>,
	DateTime<Utc>,
);

#[async_trait]
pub trait NamespaceStore: Send + Sync {
	async fn try_reserve(
		&self,
		namespace: &str,
		run_id: RunId,
		expires_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<ReserveOutcome>;
	async fn confirm(&self, namespace: &str, run_id: RunId) -> Result<bool>;
	async fn release(&self, namespace: &str, run_id: RunId) -> Result<bool>;
	async fn get_reservation(&self, namespace: &str) -> Result<Option<ReservationRecord>>;
	async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct NamespaceRepository {
	pool: SqlitePool,
}

impl NamespaceRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Compare-and-set reservation.
	///
	/// Succeeds when the namespace is free, released, held past its expiry, or
	/// already held or confirmed by the same run. The conflict check and the
	/// write happen in a single upsert statement.
	#[tracing::instrument(skip(self), fields(run_id = %run_id))]
	pub async fn try_reserve(
		&self,
		namespace: &str,
		run_id: RunId,
		expires_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<ReserveOutcome> {
		let now_str = timestamp(now);
		let result = sqlx::query(
			r#"
			INSERT INTO namespace_reservations (namespace, run_id, state, expires_at, created_at, updated_at)
			VALUES (?, ?, 'held', ?, ?, ?)
			ON CONFLICT(namespace) DO UPDATE SET
				run_id = excluded.run_id,
				state = 'held',
				expires_at = excluded.expires_at,
				updated_at = excluded.updated_at
			WHERE namespace_reservations.state = 'released'
				OR (namespace_reservations.state = 'held'
					AND (namespace_reservations.expires_at <= ? OR namespace_reservations.run_id = excluded.run_id))
			"#,
		)
		.bind(namespace)
		.bind(run_id.to_string())
		.bind(timestamp(expires_at))
		.bind(&now_str)
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() > 0 {
			return Ok(ReserveOutcome::Reserved);
		}

		let existing = self
			.get_reservation(namespace)
			.await?
			.ok_or_else(|| DbError::Internal(format!("reservation for {namespace} vanished")))?;

		if existing.run_id == run_id && existing.state == ReservationState::Confirmed {
			return Ok(ReserveOutcome::Reserved);
		}

		Ok(ReserveOutcome::Conflict {
			holder: existing.run_id,
		})
	}

	/// Make a held reservation permanent. Returns `false` if the run does not
	/// hold the namespace.
	#[tracing::instrument(skip(self), fields(run_id = %run_id))]
	pub async fn confirm(&self, namespace: &str, run_id: RunId) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE namespace_reservations
			SET state = 'confirmed', expires_at = NULL, updated_at = ?
			WHERE namespace = ? AND run_id = ? AND state IN ('held', 'confirmed')
			"#,
		)
		.bind(timestamp(Utc::now()))
		.bind(namespace)
		.bind(run_id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Release the namespace if (and only if) this run holds it.
	#[tracing::instrument(skip(self), fields(run_id = %run_id))]
	pub async fn release(&self, namespace: &str, run_id: RunId) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE namespace_reservations
			SET state = 'released', expires_at = NULL, updated_at = ?
			WHERE namespace = ? AND run_id = ? AND state != 'released'
			"#,
		)
		.bind(timestamp(Utc::now()))
		.bind(namespace)
		.bind(run_id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_reservation(&self, namespace: &str) -> Result<Option<ReservationRecord>> {
		let row = sqlx::query_as::<_, ReservationRow>(
			r#"
			SELECT namespace, run_id, state, expires_at, created_at, updated_at
			FROM namespace_reservations
			WHERE namespace = ?
			"#,
		)
		.bind(namespace)
		.fetch_optional(&self.pool)
		.await?;

		row
			.map(
				|(namespace, run_id, state, expires_at, created_at, updated_at)| {
					Ok(ReservationRecord {
						namespace,
						run_id: parse_id(&run_id, "run")?,
						state: state.parse().map_err(DbError::Internal)?,
						expires_at,
						created_at,
						updated_at,
					})
				},
			)
			.transpose()
	}

	/// Release every held reservation whose expiry has passed.
	#[tracing::instrument(skip(self))]
	pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		let now_str = timestamp(now);
		let result = sqlx::query(
			r#"
			UPDATE namespace_reservations
			SET state = 'released', expires_at = NULL, updated_at = ?
			WHERE state = 'held' AND expires_at <= ?
			"#,
		)
		.bind(&now_str)
		.bind(&now_str)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
impl NamespaceStore for NamespaceRepository {
	async fn try_reserve(
		&self,
		namespace: &str,
		run_id: RunId,
		expires_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<ReserveOutcome> {
		self.try_reserve(namespace, run_id, expires_at, now).await
	}

	async fn confirm(&self, namespace: &str, run_id: RunId) -> Result<bool> {
		self.confirm(namespace, run_id).await
	}

	async fn release(&self, namespace: &str, run_id: RunId) -> Result<bool> {
		self.release(namespace, run_id).await
	}

	async fn get_reservation(&self, namespace: &str) -> Result<Option<ReservationRecord>> {
		self.get_reservation(namespace).await
	}

	async fn release_expired(&self, now: DateTime<Utc>) -> Result<u64> {
		self.release_expired(now).await
	}
}
