// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed step outputs and the artifacts accumulated from them.

use bazaar_server_db::{AdminAccountId, ProvisioningRun, StepRecord, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// What a step produced, captured in its record for later steps and for
/// compensation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
	Validated,
	NamespaceReserved {
		subdomain: String,
		custom_domain: Option<String>,
	},
	TenantCreated {
		tenant_id: TenantId,
	},
	SchemaProvisioned {
		tenant_id: TenantId,
		field_count: u32,
	},
	AdminCreated {
		admin_account_id: AdminAccountId,
	},
	SettingsApplied {
		tenant_id: TenantId,
	},
	Finalized {
		tenant_id: TenantId,
	},
}

impl StepOutput {
	pub fn to_value(&self) -> Result<serde_json::Value, StepError> {
		Ok(serde_json::to_value(self)?)
	}

	pub fn from_value(value: &serde_json::Value) -> Result<Self, StepError> {
		Ok(serde_json::from_value(value.clone())?)
	}
}

/// Stored as the output of a failed step record so a resumed compensation
/// knows whether the failed step must be undone too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
	pub kind: String,
	pub partial_effect: bool,
}

impl FailureDetail {
	pub fn from_error(err: &StepError) -> Self {
		Self {
			kind: err.kind().to_string(),
			partial_effect: err.may_have_partial_effect(),
		}
	}

	/// A stage that was started but never recorded a result.
	pub fn interrupted() -> Self {
		Self {
			kind: "interrupted".to_string(),
			partial_effect: true,
		}
	}

	/// Read the detail back from a failed record. Records without one are
	/// treated as possibly partial.
	pub fn of_record(record: &StepRecord) -> Self {
		record
			.output
			.as_ref()
			.and_then(|v| serde_json::from_value(v.clone()).ok())
			.unwrap_or_else(Self::interrupted)
	}
}

/// Outputs of every successful step so far, folded in stage order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
	pub subdomain: Option<String>,
	pub custom_domain: Option<String>,
	pub tenant_id: Option<TenantId>,
	pub field_count: Option<u32>,
	pub admin_account_id: Option<AdminAccountId>,
	pub settings_applied: bool,
	pub finalized: bool,
}

impl Artifacts {
	pub fn from_run(run: &ProvisioningRun) -> Result<Self, StepError> {
		let mut artifacts = Artifacts::default();
		for record in run.steps.iter().filter(|r| r.is_ok()) {
			if let Some(value) = &record.output {
				artifacts.absorb(&StepOutput::from_value(value)?);
			}
		}
		Ok(artifacts)
	}

	pub fn absorb(&mut self, output: &StepOutput) {
		match output {
			StepOutput::Validated => {}
			StepOutput::NamespaceReserved {
				subdomain,
				custom_domain,
			} => {
				self.subdomain = Some(subdomain.clone());
				self.custom_domain = custom_domain.clone();
			}
			StepOutput::TenantCreated { tenant_id } => self.tenant_id = Some(*tenant_id),
			StepOutput::SchemaProvisioned {
				tenant_id,
				field_count,
			} => {
				self.tenant_id.get_or_insert(*tenant_id);
				self.field_count = Some(*field_count);
			}
			StepOutput::AdminCreated { admin_account_id } => {
				self.admin_account_id = Some(*admin_account_id)
			}
			StepOutput::SettingsApplied { .. } => self.settings_applied = true,
			StepOutput::Finalized { .. } => self.finalized = true,
		}
	}

	/// The tenant created earlier in this run.
	pub fn require_tenant(&self) -> Result<TenantId, StepError> {
		self
			.tenant_id
			.ok_or_else(|| StepError::Unrecoverable("no tenant recorded for this run".to_string()))
	}
}
