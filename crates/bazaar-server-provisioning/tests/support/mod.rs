// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bazaar_server_db::{
	AdminAccount, AdminAccountId, DbError, NewAdminAccount, NewTenant, ProductFieldDefinition,
	ProvisioningRun, Result, RunId, Tenant, TenantId, TenantRepository, TenantSettings,
	TenantStatus, TenantStore,
};
use bazaar_server_provisioning::{
	LogNotifier, Orchestrator, OrchestratorConfig, ProvisioningStores, RetryPolicy,
};
use sqlx::SqlitePool;
use tokio::sync::Notify;

/// Tenant-store operations a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	CreateTenant,
	SeedFields,
	CreateAdmin,
	UpsertSettings,
	ActivateTenant,
	DeleteTenant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
	/// Every call fails with a permanent rejection.
	Unrecoverable,
	/// The first `n` calls fail with lock contention.
	Transient(u32),
	/// The first call completes, then never returns.
	HangAfter,
}

struct Fault {
	op: Op,
	mode: FaultMode,
	calls: AtomicU32,
	hung: AtomicBool,
}

/// Wraps the real tenant repository and injects failures on chosen calls.
pub struct FaultyTenantStore {
	inner: TenantRepository,
	faults: Vec<Fault>,
	/// Signalled when a `HangAfter` fault takes effect.
	pub hit: Arc<Notify>,
}

impl FaultyTenantStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			inner: TenantRepository::new(pool),
			faults: Vec::new(),
			hit: Arc::new(Notify::new()),
		}
	}

	pub fn with_fault(mut self, op: Op, mode: FaultMode) -> Self {
		self.faults.push(Fault {
			op,
			mode,
			calls: AtomicU32::new(0),
			hung: AtomicBool::new(false),
		});
		self
	}

	fn before(&self, op: Op) -> Result<()> {
		for fault in self.faults.iter().filter(|f| f.op == op) {
			let n = fault.calls.fetch_add(1, Ordering::SeqCst) + 1;
			match fault.mode {
				FaultMode::Unrecoverable => {
					return Err(DbError::Internal("quota exceeded".to_string()))
				}
				FaultMode::Transient(limit) if n <= limit => {
					return Err(DbError::Sqlx(sqlx::Error::PoolTimedOut))
				}
				_ => {}
			}
		}
		Ok(())
	}

	async fn after(&self, op: Op) {
		let hang = self.faults.iter().any(|f| {
			f.op == op && f.mode == FaultMode::HangAfter && !f.hung.swap(true, Ordering::SeqCst)
		});
		if hang {
			self.hit.notify_one();
			std::future::pending::<()>().await;
		}
	}
}

#[async_trait]
impl TenantStore for FaultyTenantStore {
	async fn create_tenant(&self, tenant: &NewTenant) -> Result<Tenant> {
		self.before(Op::CreateTenant)?;
		let result = self.inner.create_tenant(tenant).await;
		self.after(Op::CreateTenant).await;
		result
	}

	async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
		self.inner.get_tenant(id).await
	}

	async fn find_tenant_by_run(&self, run_id: RunId) -> Result<Option<Tenant>> {
		self.inner.find_tenant_by_run(run_id).await
	}

	async fn namespace_in_use(&self, namespace: &str) -> Result<bool> {
		self.inner.namespace_in_use(namespace).await
	}

	async fn set_tenant_status(&self, id: TenantId, status: TenantStatus) -> Result<bool> {
		let active = status == TenantStatus::Active;
		if active {
			self.before(Op::ActivateTenant)?;
		}
		let result = self.inner.set_tenant_status(id, status).await;
		if active {
			self.after(Op::ActivateTenant).await;
		}
		result
	}

	async fn delete_tenant(&self, id: TenantId) -> Result<bool> {
		self.before(Op::DeleteTenant)?;
		self.inner.delete_tenant(id).await
	}

	async fn seed_product_fields(
		&self,
		tenant_id: TenantId,
		fields: &[ProductFieldDefinition],
	) -> Result<u64> {
		self.before(Op::SeedFields)?;
		let result = self.inner.seed_product_fields(tenant_id, fields).await;
		self.after(Op::SeedFields).await;
		result
	}

	async fn list_product_fields(&self, tenant_id: TenantId) -> Result<Vec<ProductFieldDefinition>> {
		self.inner.list_product_fields(tenant_id).await
	}

	async fn delete_product_fields(&self, tenant_id: TenantId) -> Result<u64> {
		self.inner.delete_product_fields(tenant_id).await
	}

	async fn create_admin_account(&self, account: &NewAdminAccount) -> Result<AdminAccount> {
		self.before(Op::CreateAdmin)?;
		let result = self.inner.create_admin_account(account).await;
		self.after(Op::CreateAdmin).await;
		result
	}

	async fn get_admin_account(&self, id: AdminAccountId) -> Result<Option<AdminAccount>> {
		self.inner.get_admin_account(id).await
	}

	async fn find_admin_by_run(&self, run_id: RunId) -> Result<Option<AdminAccount>> {
		self.inner.find_admin_by_run(run_id).await
	}

	async fn delete_admin_account(&self, id: AdminAccountId) -> Result<bool> {
		self.inner.delete_admin_account(id).await
	}

	async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()> {
		self.before(Op::UpsertSettings)?;
		let result = self.inner.upsert_settings(settings).await;
		self.after(Op::UpsertSettings).await;
		result
	}

	async fn get_settings(&self, tenant_id: TenantId) -> Result<Option<TenantSettings>> {
		self.inner.get_settings(tenant_id).await
	}

	async fn delete_settings(&self, tenant_id: TenantId) -> Result<bool> {
		self.inner.delete_settings(tenant_id).await
	}
}

/// Millisecond backoff so failure paths finish quickly.
pub fn fast_config() -> OrchestratorConfig {
	OrchestratorConfig {
		retry: RetryPolicy {
			max_attempts: 3,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			attempt_timeout: Duration::from_millis(500),
		},
		..OrchestratorConfig::default()
	}
}

pub fn orchestrator(pool: SqlitePool) -> Arc<Orchestrator> {
	orchestrator_with(pool, None, fast_config())
}

pub fn orchestrator_with(
	pool: SqlitePool,
	tenants: Option<Arc<dyn TenantStore>>,
	config: OrchestratorConfig,
) -> Arc<Orchestrator> {
	let mut stores = ProvisioningStores::sqlite(pool);
	if let Some(tenants) = tenants {
		stores.tenants = tenants;
	}
	Arc::new(Orchestrator::new(stores, Arc::new(LogNotifier), config))
}

/// Poll until the run reaches `COMPLETED` or `FAILED`.
pub async fn wait_for_terminal(orchestrator: &Orchestrator, run_id: RunId) -> ProvisioningRun {
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			let run = orchestrator.status(run_id).await.unwrap();
			if run.stage.is_terminal() {
				return run;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("run did not reach a terminal stage")
}

pub async fn count_tenants(pool: &SqlitePool, subdomain: &str) -> i64 {
	let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tenants WHERE subdomain = ?")
		.bind(subdomain)
		.fetch_one(pool)
		.await
		.unwrap();
	count
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
	let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
		.fetch_one(pool)
		.await
		.unwrap();
	count
}
