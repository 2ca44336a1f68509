// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Namespace reservation service.
//!
//! A namespace (subdomain or custom domain) moves through
//! `held -> confirmed` on success or `held -> released` on rollback. Held
//! reservations carry an expiry so a run that never resumes cannot starve
//! the name forever.

use std::sync::Arc;
use std::time::Duration;

use bazaar_server_db::{DbError, NamespaceStore, ReserveOutcome, RunId};
use chrono::Utc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct NamespaceReservation {
	store: Arc<dyn NamespaceStore>,
}

impl NamespaceReservation {
	pub fn new(store: Arc<dyn NamespaceStore>) -> Self {
		Self { store }
	}

	/// Hold `name` for `run_id` until `ttl` elapses.
	#[instrument(skip(self), fields(namespace = %name, run_id = %run_id))]
	pub async fn reserve(
		&self,
		name: &str,
		run_id: RunId,
		ttl: Duration,
	) -> Result<ReserveOutcome, DbError> {
		let now = Utc::now();
		let ttl = chrono::Duration::from_std(ttl)
			.map_err(|e| DbError::Internal(format!("reservation ttl out of range: {e}")))?;
		let outcome = self.store.try_reserve(name, run_id, now + ttl, now).await?;

		match outcome {
			ReserveOutcome::Reserved => info!("Namespace reserved"),
			ReserveOutcome::Conflict { holder } => {
				warn!(holder = %holder, "Namespace reservation conflict")
			}
		}
		Ok(outcome)
	}

	/// Make the binding permanent. Returns `false` if the run no longer holds
	/// the namespace.
	#[instrument(skip(self), fields(namespace = %name, run_id = %run_id))]
	pub async fn confirm(&self, name: &str, run_id: RunId) -> Result<bool, DbError> {
		let confirmed = self.store.confirm(name, run_id).await?;
		if confirmed {
			info!("Namespace confirmed");
		}
		Ok(confirmed)
	}

	/// Release the namespace if this run holds it. Safe to repeat.
	#[instrument(skip(self), fields(namespace = %name, run_id = %run_id))]
	pub async fn release(&self, name: &str, run_id: RunId) -> Result<bool, DbError> {
		let released = self.store.release(name, run_id).await?;
		if released {
			info!("Namespace released");
		}
		Ok(released)
	}

	/// Whether no live reservation exists for `name`.
	pub async fn is_free(&self, name: &str) -> Result<bool, DbError> {
		let now = Utc::now();
		Ok(
			self
				.store
				.get_reservation(name)
				.await?
				.map(|r| !r.is_live(now))
				.unwrap_or(true),
		)
	}

	#[instrument(skip(self))]
	pub async fn release_expired(&self) -> Result<u64, DbError> {
		let released = self.store.release_expired(Utc::now()).await?;
		if released > 0 {
			info!(released, "Released expired namespace reservations");
		}
		Ok(released)
	}
}
