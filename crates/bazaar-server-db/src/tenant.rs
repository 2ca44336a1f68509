// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tenant data: marketplace records, administrator accounts, settings and
//! the tenant-scoped product-field schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::types::{parse_id, timestamp, AdminAccountId, BillingCycle, RunId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
	Inactive,
	Active,
}

impl TenantStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TenantStatus::Inactive => "inactive",
			TenantStatus::Active => "active",
		}
	}
}

impl std::str::FromStr for TenantStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"inactive" => Ok(TenantStatus::Inactive),
			"active" => Ok(TenantStatus::Active),
			_ => Err(format!("unknown tenant status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
	pub id: TenantId,
	/// The provisioning run that created this tenant.
	pub run_id: RunId,
	pub company_name: String,
	pub subdomain: String,
	pub custom_domain: Option<String>,
	pub plan_id: String,
	pub billing_cycle: BillingCycle,
	pub status: TenantStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
	pub run_id: RunId,
	pub company_name: String,
	pub subdomain: String,
	pub custom_domain: Option<String>,
	pub plan_id: String,
	pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAccount {
	pub id: AdminAccountId,
	pub run_id: RunId,
	pub tenant_id: TenantId,
	pub first_name: String,
	pub last_name: String,
	pub email: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAdminAccount {
	pub run_id: RunId,
	pub tenant_id: TenantId,
	pub first_name: String,
	pub last_name: String,
	pub email: String,
}

/// Branding and visibility for a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
	pub tenant_id: TenantId,
	pub display_name: String,
	pub primary_color: String,
	pub public_access: bool,
}

/// One product attribute in a tenant's catalogue schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFieldDefinition {
	pub key: String,
	pub label: String,
	pub field_type: String,
	pub required: bool,
	/// Display ordering, ascending.
	pub position: u32,
}

type TenantRow = (
	String,
	String,
	String,
	String,
	Option<String>,
	String,
	String,
	String,
	DateTime<Utc>,
	DateTime<Utc>,
);

type AdminRow = (String, String, String, String, String, String, DateTime<Utc>);

const TENANT_COLUMNS: &str = "id, run_id, company_name, subdomain, custom_domain, plan_id, billing_cycle, status, created_at, updated_at";

const ADMIN_COLUMNS: &str = "id, run_id, tenant_id, first_name, last_name, email, created_at";

fn tenant_from_row(row: TenantRow) -> Result<Tenant> {
	let (
		id,
		run_id,
		company_name,
		subdomain,
		custom_domain,
		plan_id,
		billing_cycle,
		status,
		created_at,
		updated_at,
	) = row;
	Ok(Tenant {
		id: parse_id(&id, "tenant")?,
		run_id: parse_id(&run_id, "run")?,
		company_name,
		subdomain,
		custom_domain,
		plan_id,
		billing_cycle: billing_cycle.parse().map_err(DbError::Internal)?,
		status: status.parse().map_err(DbError::Internal)?,
		created_at,
		updated_at,
	})
}

fn admin_from_row(row: AdminRow) -> Result<AdminAccount> {
	let (id, run_id, tenant_id, first_name, last_name, email, created_at) = row;
	Ok(AdminAccount {
		id: parse_id(&id, "admin account")?,
		run_id: parse_id(&run_id, "run")?,
		tenant_id: parse_id(&tenant_id, "tenant")?,
		first_name,
		last_name,
		email,
		created_at,
	})
}

#[async_trait]
pub trait TenantStore: Send + Sync {
	async fn create_tenant(&self, tenant: &NewTenant) -> Result<Tenant>;
	async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>>;
	async fn find_tenant_by_run(&self, run_id: RunId) -> Result<Option<Tenant>>;
	async fn namespace_in_use(&self, namespace: &str) -> Result<bool>;
	async fn set_tenant_status(&self, id: TenantId, status: TenantStatus) -> Result<bool>;
	async fn delete_tenant(&self, id: TenantId) -> Result<bool>;
	async fn seed_product_fields(
		&self,
		tenant_id: TenantId,
		fields: &[ProductFieldDefinition],
	) -> Result<u64>;
	async fn list_product_fields(&self, tenant_id: TenantId) -> Result<Vec<ProductFieldDefinition>>;
	async fn delete_product_fields(&self, tenant_id: TenantId) -> Result<u64>;
	async fn create_admin_account(&self, account: &NewAdminAccount) -> Result<AdminAccount>;
	async fn get_admin_account(&self, id: AdminAccountId) -> Result<Option<AdminAccount>>;
	async fn find_admin_by_run(&self, run_id: RunId) -> Result<Option<AdminAccount>>;
	async fn delete_admin_account(&self, id: AdminAccountId) -> Result<bool>;
	async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()>;
	async fn get_settings(&self, tenant_id: TenantId) -> Result<Option<TenantSettings>>;
	async fn delete_settings(&self, tenant_id: TenantId) -> Result<bool>;
}

#[derive(Clone)]
pub struct TenantRepository {
	pool: SqlitePool,
}

impl TenantRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert an inactive tenant.
	///
	/// # Errors
	/// Returns `DbError::Conflict` if the run already created a tenant or the
	/// subdomain/custom domain belongs to another tenant.
	#[tracing::instrument(skip(self, tenant), fields(run_id = %tenant.run_id, subdomain = %tenant.subdomain))]
	pub async fn create_tenant(&self, tenant: &NewTenant) -> Result<Tenant> {
		let now = Utc::now();
		let created = Tenant {
			id: TenantId::generate(),
			run_id: tenant.run_id,
			company_name: tenant.company_name.clone(),
			subdomain: tenant.subdomain.clone(),
			custom_domain: tenant.custom_domain.clone(),
			plan_id: tenant.plan_id.clone(),
			billing_cycle: tenant.billing_cycle,
			status: TenantStatus::Inactive,
			created_at: now,
			updated_at: now,
		};

		sqlx::query(&format!(
			"INSERT INTO tenants ({TENANT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(created.id.to_string())
		.bind(created.run_id.to_string())
		.bind(&created.company_name)
		.bind(&created.subdomain)
		.bind(&created.custom_domain)
		.bind(&created.plan_id)
		.bind(created.billing_cycle.as_str())
		.bind(created.status.as_str())
		.bind(timestamp(now))
		.bind(timestamp(now))
		.execute(&self.pool)
		.await
		.map_err(|e| DbError::from_write(e, format!("tenant namespace {} is taken", tenant.subdomain)))?;

		Ok(created)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
		let row = sqlx::query_as::<_, TenantRow>(&format!(
			"SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(tenant_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_tenant_by_run(&self, run_id: RunId) -> Result<Option<Tenant>> {
		let row = sqlx::query_as::<_, TenantRow>(&format!(
			"SELECT {TENANT_COLUMNS} FROM tenants WHERE run_id = ?"
		))
		.bind(run_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(tenant_from_row).transpose()
	}

	/// Whether any tenant already answers on this subdomain or domain.
	#[tracing::instrument(skip(self))]
	pub async fn namespace_in_use(&self, namespace: &str) -> Result<bool> {
		let (count,): (i64,) = sqlx::query_as(
			"SELECT COUNT(*) FROM tenants WHERE subdomain = ? OR custom_domain = ?",
		)
		.bind(namespace)
		.bind(namespace)
		.fetch_one(&self.pool)
		.await?;

		Ok(count > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn set_tenant_status(&self, id: TenantId, status: TenantStatus) -> Result<bool> {
		let result = sqlx::query("UPDATE tenants SET status = ?, updated_at = ? WHERE id = ?")
			.bind(status.as_str())
			.bind(timestamp(Utc::now()))
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_tenant(&self, id: TenantId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM tenants WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	/// Insert the given fields, skipping any key the tenant already has.
	/// Returns the number of rows inserted.
	#[tracing::instrument(skip(self, fields), fields(field_count = fields.len()))]
	pub async fn seed_product_fields(
		&self,
		tenant_id: TenantId,
		fields: &[ProductFieldDefinition],
	) -> Result<u64> {
		let now = timestamp(Utc::now());
		let mut tx = self.pool.begin().await?;
		let mut inserted = 0;

		for field in fields {
			let result = sqlx::query(
				r#"
				INSERT INTO tenant_product_fields (tenant_id, key, label, field_type, required, position, created_at)
				VALUES (?, ?, ?, ?, ?, ?, ?)
				ON CONFLICT(tenant_id, key) DO NOTHING
				"#,
			)
			.bind(tenant_id.to_string())
			.bind(&field.key)
			.bind(&field.label)
			.bind(&field.field_type)
			.bind(field.required)
			.bind(field.position as i64)
			.bind(&now)
			.execute(&mut *tx)
			.await
			.map_err(|e| DbError::from_write(e, format!("tenant {tenant_id} field {}", field.key)))?;
			inserted += result.rows_affected();
		}

		tx.commit().await?;
		Ok(inserted)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_product_fields(&self, tenant_id: TenantId) -> Result<Vec<ProductFieldDefinition>> {
		let rows = sqlx::query_as::<_, (String, String, String, bool, i64)>(
			r#"
			SELECT key, label, field_type, required, position
			FROM tenant_product_fields
			WHERE tenant_id = ?
			ORDER BY position, key
			"#,
		)
		.bind(tenant_id.to_string())
		.fetch_all(&self.pool)
		.await?;

		Ok(
			rows
				.into_iter()
				.map(
					|(key, label, field_type, required, position)| ProductFieldDefinition {
						key,
						label,
						field_type,
						required,
						position: position as u32,
					},
				)
				.collect(),
		)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_product_fields(&self, tenant_id: TenantId) -> Result<u64> {
		let result = sqlx::query("DELETE FROM tenant_product_fields WHERE tenant_id = ?")
			.bind(tenant_id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self, account), fields(run_id = %account.run_id, tenant_id = %account.tenant_id))]
	pub async fn create_admin_account(&self, account: &NewAdminAccount) -> Result<AdminAccount> {
		let created = AdminAccount {
			id: AdminAccountId::generate(),
			run_id: account.run_id,
			tenant_id: account.tenant_id,
			first_name: account.first_name.clone(),
			last_name: account.last_name.clone(),
			email: account.email.clone(),
			created_at: Utc::now(),
		};

		sqlx::query(&format!(
			"INSERT INTO tenant_admin_accounts ({ADMIN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
		))
		.bind(created.id.to_string())
		.bind(created.run_id.to_string())
		.bind(created.tenant_id.to_string())
		.bind(&created.first_name)
		.bind(&created.last_name)
		.bind(&created.email)
		.bind(timestamp(created.created_at))
		.execute(&self.pool)
		.await
		.map_err(|e| DbError::from_write(e, format!("admin account for run {}", account.run_id)))?;

		Ok(created)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_admin_account(&self, id: AdminAccountId) -> Result<Option<AdminAccount>> {
		let row = sqlx::query_as::<_, AdminRow>(&format!(
			"SELECT {ADMIN_COLUMNS} FROM tenant_admin_accounts WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(admin_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_admin_by_run(&self, run_id: RunId) -> Result<Option<AdminAccount>> {
		let row = sqlx::query_as::<_, AdminRow>(&format!(
			"SELECT {ADMIN_COLUMNS} FROM tenant_admin_accounts WHERE run_id = ?"
		))
		.bind(run_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		row.map(admin_from_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_admin_account(&self, id: AdminAccountId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM tenant_admin_accounts WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self, settings), fields(tenant_id = %settings.tenant_id))]
	pub async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()> {
		let now = timestamp(Utc::now());
		sqlx::query(
			r#"
			INSERT INTO tenant_settings (tenant_id, display_name, primary_color, public_access, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(tenant_id) DO UPDATE SET
				display_name = excluded.display_name,
				primary_color = excluded.primary_color,
				public_access = excluded.public_access,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(settings.tenant_id.to_string())
		.bind(&settings.display_name)
		.bind(&settings.primary_color)
		.bind(settings.public_access)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_settings(&self, tenant_id: TenantId) -> Result<Option<TenantSettings>> {
		let row = sqlx::query_as::<_, (String, String, bool)>(
			"SELECT display_name, primary_color, public_access FROM tenant_settings WHERE tenant_id = ?",
		)
		.bind(tenant_id.to_string())
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(display_name, primary_color, public_access)| TenantSettings {
			tenant_id,
			display_name,
			primary_color,
			public_access,
		}))
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_settings(&self, tenant_id: TenantId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM tenant_settings WHERE tenant_id = ?")
			.bind(tenant_id.to_string())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
impl TenantStore for TenantRepository {
	async fn create_tenant(&self, tenant: &NewTenant) -> Result<Tenant> {
		self.create_tenant(tenant).await
	}

	async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
		self.get_tenant(id).await
	}

	async fn find_tenant_by_run(&self, run_id: RunId) -> Result<Option<Tenant>> {
		self.find_tenant_by_run(run_id).await
	}

	async fn namespace_in_use(&self, namespace: &str) -> Result<bool> {
		self.namespace_in_use(namespace).await
	}

	async fn set_tenant_status(&self, id: TenantId, status: TenantStatus) -> Result<bool> {
		self.set_tenant_status(id, status).await
	}

	async fn delete_tenant(&self, id: TenantId) -> Result<bool> {
		self.delete_tenant(id).await
	}

	async fn seed_product_fields(
		&self,
		tenant_id: TenantId,
		fields: &[ProductFieldDefinition],
	) -> Result<u64> {
		self.seed_product_fields(tenant_id, fields).await
	}

	async fn list_product_fields(&self, tenant_id: TenantId) -> Result<Vec<ProductFieldDefinition>> {
		self.list_product_fields(tenant_id).await
	}

	async fn delete_product_fields(&self, tenant_id: TenantId) -> Result<u64> {
		self.delete_product_fields(tenant_id).await
	}

	async fn create_admin_account(&self, account: &NewAdminAccount) -> Result<AdminAccount> {
		self.create_admin_account(account).await
	}

	async fn get_admin_account(&self, id: AdminAccountId) -> Result<Option<AdminAccount>> {
		self.get_admin_account(id).await
	}

	async fn find_admin_by_run(&self, run_id: RunId) -> Result<Option<AdminAccount>> {
		self.find_admin_by_run(run_id).await
	}

	async fn delete_admin_account(&self, id: AdminAccountId) -> Result<bool> {
		self.delete_admin_account(id).await
	}

	async fn upsert_settings(&self, settings: &TenantSettings) -> Result<()> {
		self.upsert_settings(settings).await
	}

	async fn get_settings(&self, tenant_id: TenantId) -> Result<Option<TenantSettings>> {
		self.get_settings(tenant_id).await
	}

	async fn delete_settings(&self, tenant_id: TenantId) -> Result<bool> {
		self.delete_settings(tenant_id).await
	}
}
