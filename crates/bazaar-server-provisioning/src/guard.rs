// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use bazaar_server_db::{Admission, IdempotencyStore, ProvisioningRequest, ProvisioningRun, RunId};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::error::{ProvisioningError, Result};
use crate::validation::validate_idempotency_key;

/// Deduplicates submissions by their caller-supplied idempotency key.
#[derive(Clone)]
pub struct IdempotencyGuard {
	store: Arc<dyn IdempotencyStore>,
	window: Duration,
}

impl IdempotencyGuard {
	pub fn new(store: Arc<dyn IdempotencyStore>, window: Duration) -> Self {
		Self { store, window }
	}

	/// SHA-256 over the canonical JSON encoding of the request.
	pub fn fingerprint(request: &ProvisioningRequest) -> Result<String> {
		json_digest(request)
	}

	/// Create a run for a new key, or return the run already bound to it.
	///
	/// A replay with a different payload still resolves to the original run.
	#[instrument(skip(self, request), fields(key = %request.idempotency_key))]
	pub async fn admit(&self, request: ProvisioningRequest) -> Result<Admission> {
		validate_idempotency_key(&request.idempotency_key)
			.map_err(ProvisioningError::InvalidRequest)?;

		let fingerprint = Self::fingerprint(&request)?;
		let run = ProvisioningRun::new(request);
		let window = chrono::Duration::from_std(self.window).map_err(|e| {
			ProvisioningError::InvalidRequest(format!("idempotency window out of range: {e}"))
		})?;
		let admission = self
			.store
			.admit(&fingerprint, &run, run.created_at + window)
			.await?;

		if admission.is_new {
			info!(run_id = %admission.run_id, "Provisioning run admitted");
		} else if admission.fingerprint != fingerprint {
			warn!(
				run_id = %admission.run_id,
				"Idempotency key replayed with a different payload; returning existing run"
			);
		} else {
			info!(run_id = %admission.run_id, "Duplicate provisioning request deduplicated");
		}

		Ok(admission)
	}

	pub async fn lookup(&self, key: &str) -> Result<Option<RunId>> {
		Ok(self.store.lookup(key, Utc::now()).await?)
	}

	#[instrument(skip(self))]
	pub async fn purge_expired(&self) -> Result<u64> {
		let purged = self.store.purge_expired(Utc::now()).await?;
		if purged > 0 {
			info!(purged, "Purged expired idempotency keys");
		}
		Ok(purged)
	}
}

fn json_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
	let encoded = serde_json::to_vec(value)
		.map_err(|e| ProvisioningError::Internal(format!("request fingerprint: {e}")))?;
	Ok(hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use bazaar_server_db::testing::{create_test_pool, sample_request};
	use bazaar_server_db::IdempotencyRepository;

	async fn guard(window: Duration) -> IdempotencyGuard {
		let pool = create_test_pool().await;
		IdempotencyGuard::new(Arc::new(IdempotencyRepository::new(pool)), window)
	}

	#[test]
	fn test_fingerprint_is_stable_and_payload_sensitive() {
		let a = sample_request("k1", "acme");
		let mut b = a.clone();
		let fa = IdempotencyGuard::fingerprint(&a).unwrap();
		assert_eq!(fa, IdempotencyGuard::fingerprint(&b).unwrap());

		b.primary_color = "#000000".to_string();
		assert_ne!(fa, IdempotencyGuard::fingerprint(&b).unwrap());
		assert_eq!(fa.len(), 64);
	}

	#[test]
	fn test_unencodable_payload_is_an_error_not_an_empty_digest() {
		let mut payload = std::collections::HashMap::new();
		payload.insert((1u8, 2u8), "x");

		let result = json_digest(&payload);

		assert!(matches!(result, Err(ProvisioningError::Internal(msg)) if msg.contains("fingerprint")));
	}

	#[tokio::test]
	async fn test_second_admission_returns_same_run() {
		let guard = guard(Duration::from_secs(3600)).await;

		let first = guard.admit(sample_request("k1", "acme")).await.unwrap();
		let second = guard.admit(sample_request("k1", "acme")).await.unwrap();

		assert!(first.is_new);
		assert!(!second.is_new);
		assert_eq!(first.run_id, second.run_id);
		assert_eq!(guard.lookup("k1").await.unwrap(), Some(first.run_id));
	}

	#[tokio::test]
	async fn test_different_payload_still_returns_existing_run() {
		let guard = guard(Duration::from_secs(3600)).await;

		let first = guard.admit(sample_request("k1", "acme")).await.unwrap();
		let second = guard.admit(sample_request("k1", "globex")).await.unwrap();

		assert_eq!(first.run_id, second.run_id);
		assert!(!second.is_new);
		assert_ne!(
			second.fingerprint,
			IdempotencyGuard::fingerprint(&sample_request("k1", "globex")).unwrap()
		);
	}

	#[tokio::test]
	async fn test_blank_key_rejected() {
		let guard = guard(Duration::from_secs(3600)).await;
		let result = guard.admit(sample_request("  ", "acme")).await;
		assert!(matches!(result, Err(ProvisioningError::InvalidRequest(_))));
	}

	#[tokio::test]
	async fn test_expired_key_admits_new_run() {
		let guard = guard(Duration::ZERO).await;

		let first = guard.admit(sample_request("k1", "acme")).await.unwrap();
		assert_eq!(guard.lookup("k1").await.unwrap(), None);
		assert_eq!(guard.purge_expired().await.unwrap(), 1);

		let second = guard.admit(sample_request("k1", "acme")).await.unwrap();
		assert!(second.is_new);
		assert_ne!(first.run_id, second.run_id);
	}
}
