// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core identifier and request types shared by the provisioning crates.
//!
//! All ID types implement transparent serde serialization (as UUID strings) and
//! provide conversion to/from [`uuid::Uuid`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::DbError;

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl std::str::FromStr for $name {
			type Err = uuid::Error;

			fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
				Uuid::parse_str(s).map(Self)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(RunId, "Unique identifier for a provisioning run.");
define_id_type!(TenantId, "Unique identifier for a tenant marketplace.");
define_id_type!(AdminAccountId, "Unique identifier for a tenant administrator account.");

/// Billing cadence selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
	Monthly,
	Yearly,
}

impl BillingCycle {
	pub fn as_str(&self) -> &'static str {
		match self {
			BillingCycle::Monthly => "monthly",
			BillingCycle::Yearly => "yearly",
		}
	}
}

impl std::str::FromStr for BillingCycle {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"monthly" => Ok(BillingCycle::Monthly),
			"yearly" => Ok(BillingCycle::Yearly),
			_ => Err(format!("unknown billing cycle: {s}")),
		}
	}
}

/// A payment-authorized request to provision a new marketplace.
///
/// Immutable once accepted; the orchestrator persists it verbatim alongside
/// the run so a resumed run replays the exact same inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
	pub idempotency_key: String,
	pub company_name: String,
	pub admin_first_name: String,
	pub admin_last_name: String,
	pub admin_email: String,
	pub subdomain: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub custom_domain: Option<String>,
	pub public_access: bool,
	pub primary_color: String,
	pub plan_id: String,
	pub billing_cycle: BillingCycle,
}

/// Fixed-width RFC 3339 rendering so stored timestamps compare lexically.
pub(crate) fn timestamp(dt: DateTime<Utc>) -> String {
	dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_id<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, DbError> {
	raw
		.parse()
		.map_err(|_| DbError::Internal(format!("invalid {what} id: {raw}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_billing_cycle_roundtrip() {
		for cycle in [BillingCycle::Monthly, BillingCycle::Yearly] {
			assert_eq!(cycle.as_str().parse::<BillingCycle>().unwrap(), cycle);
		}
		assert!("weekly".parse::<BillingCycle>().is_err());
	}

	#[test]
	fn test_request_omits_absent_custom_domain() {
		let request = ProvisioningRequest {
			idempotency_key: "k1".to_string(),
			company_name: "Acme".to_string(),
			admin_first_name: "Ada".to_string(),
			admin_last_name: "Lovelace".to_string(),
			admin_email: "ada@acme.test".to_string(),
			subdomain: "acme".to_string(),
			custom_domain: None,
			public_access: true,
			primary_color: "#112233".to_string(),
			plan_id: "starter".to_string(),
			billing_cycle: BillingCycle::Monthly,
		};
		let json = serde_json::to_value(&request).unwrap();
		assert!(json.get("custom_domain").is_none());
		assert_eq!(json["billing_cycle"], "monthly");
	}

	#[test]
	fn test_timestamp_is_fixed_width() {
		let a = timestamp(DateTime::from_timestamp(0, 0).unwrap());
		let b = timestamp(DateTime::from_timestamp(1_700_000_000, 123_000).unwrap());
		assert_eq!(a.len(), b.len());
		assert!(a < b);
	}

	proptest! {
		#[test]
		fn run_id_display_parse_roundtrip(a: u128) {
			let id = RunId::new(Uuid::from_u128(a));
			let parsed: RunId = id.to_string().parse().unwrap();
			prop_assert_eq!(parsed, id);
		}

		#[test]
		fn timestamps_order_lexically(a in 0i64..4_000_000_000, b in 0i64..4_000_000_000) {
			let ta = DateTime::from_timestamp(a, 0).unwrap();
			let tb = DateTime::from_timestamp(b, 0).unwrap();
			prop_assert_eq!(ta.cmp(&tb), timestamp(ta).cmp(&timestamp(tb)));
		}
	}
}
