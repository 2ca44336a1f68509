// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::pool::run_migrations;
use crate::types::{BillingCycle, ProvisioningRequest};

/// In-memory database with the full schema applied.
///
/// A single connection keeps every caller on the same in-memory database and
/// serializes writers the way a file-backed database would.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	sqlx::query("PRAGMA foreign_keys = ON")
		.execute(&pool)
		.await
		.unwrap();
	run_migrations(&pool).await.unwrap();
	pool
}

pub fn sample_request(idempotency_key: &str, subdomain: &str) -> ProvisioningRequest {
	ProvisioningRequest {
		idempotency_key: idempotency_key.to_string(),
		company_name: format!("{subdomain} Trading Co"),
		admin_first_name: "Ada".to_string(),
		admin_last_name: "Lovelace".to_string(),
		admin_email: format!("admin@{subdomain}.test"),
		subdomain: subdomain.to_string(),
		custom_domain: None,
		public_access: true,
		primary_color: "#1f6feb".to_string(),
		plan_id: "starter".to_string(),
		billing_cycle: BillingCycle::Monthly,
	}
}
