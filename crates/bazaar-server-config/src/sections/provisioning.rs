// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provisioning configuration section.
//!
//! Timing knobs for the orchestrator and the maintenance jobs, plus the
//! URL settings used to build links for completed tenants.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_RESERVED_SUBDOMAINS: &[&str] =
	&["www", "api", "admin", "app", "mail", "static", "cdn", "status"];

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfigLayer {
	#[serde(default)]
	pub base_domain: Option<String>,
	#[serde(default)]
	pub url_scheme: Option<String>,
	#[serde(default)]
	pub reservation_ttl_secs: Option<u64>,
	#[serde(default)]
	pub idempotency_window_secs: Option<u64>,
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub base_delay_ms: Option<u64>,
	#[serde(default)]
	pub max_delay_ms: Option<u64>,
	#[serde(default)]
	pub step_timeout_secs: Option<u64>,
	#[serde(default)]
	pub compensation_alert_secs: Option<u64>,
	#[serde(default)]
	pub maintenance_interval_secs: Option<u64>,
	#[serde(default)]
	pub reserved_subdomains: Option<Vec<String>>,
}

impl ProvisioningConfigLayer {
	pub fn merge(&mut self, other: Self) {
		macro_rules! take {
			($($field:ident),* $(,)?) => {
				$(
					if other.$field.is_some() {
						self.$field = other.$field;
					}
				)*
			};
		}
		take!(
			base_domain,
			url_scheme,
			reservation_ttl_secs,
			idempotency_window_secs,
			max_attempts,
			base_delay_ms,
			max_delay_ms,
			step_timeout_secs,
			compensation_alert_secs,
			maintenance_interval_secs,
			reserved_subdomains,
		);
	}

	pub fn finalize(self) -> Result<ProvisioningConfig, ConfigError> {
		let config = ProvisioningConfig {
			base_domain: self
				.base_domain
				.unwrap_or_else(|| "bazaar.local".to_string())
				.to_ascii_lowercase(),
			url_scheme: self
				.url_scheme
				.unwrap_or_else(|| "https".to_string())
				.to_ascii_lowercase(),
			reservation_ttl_secs: self.reservation_ttl_secs.unwrap_or(900),
			idempotency_window_secs: self.idempotency_window_secs.unwrap_or(86_400),
			max_attempts: self.max_attempts.unwrap_or(5),
			base_delay_ms: self.base_delay_ms.unwrap_or(200),
			max_delay_ms: self.max_delay_ms.unwrap_or(10_000),
			step_timeout_secs: self.step_timeout_secs.unwrap_or(30),
			compensation_alert_secs: self.compensation_alert_secs.unwrap_or(600),
			maintenance_interval_secs: self.maintenance_interval_secs.unwrap_or(60),
			reserved_subdomains: self
				.reserved_subdomains
				.map(|names| {
					names
						.into_iter()
						.map(|n| n.trim().to_ascii_lowercase())
						.filter(|n| !n.is_empty())
						.collect()
				})
				.unwrap_or_else(|| {
					DEFAULT_RESERVED_SUBDOMAINS
						.iter()
						.map(|s| s.to_string())
						.collect()
				}),
		};
		config.validate()?;
		Ok(config)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningConfig {
	pub base_domain: String,
	pub url_scheme: String,
	pub reservation_ttl_secs: u64,
	pub idempotency_window_secs: u64,
	pub max_attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub step_timeout_secs: u64,
	pub compensation_alert_secs: u64,
	pub maintenance_interval_secs: u64,
	pub reserved_subdomains: Vec<String>,
}

impl Default for ProvisioningConfig {
	fn default() -> Self {
		Self {
			base_domain: "bazaar.local".to_string(),
			url_scheme: "https".to_string(),
			reservation_ttl_secs: 900,
			idempotency_window_secs: 86_400,
			max_attempts: 5,
			base_delay_ms: 200,
			max_delay_ms: 10_000,
			step_timeout_secs: 30,
			compensation_alert_secs: 600,
			maintenance_interval_secs: 60,
			reserved_subdomains: DEFAULT_RESERVED_SUBDOMAINS
				.iter()
				.map(|s| s.to_string())
				.collect(),
		}
	}
}

impl ProvisioningConfig {
	/// Cross-field rules the orchestrator relies on.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"provisioning.max_attempts must be at least 1".to_string(),
			));
		}
		if self.base_delay_ms > self.max_delay_ms {
			return Err(ConfigError::Validation(format!(
				"provisioning.base_delay_ms ({}) exceeds max_delay_ms ({})",
				self.base_delay_ms, self.max_delay_ms
			)));
		}
		// A reservation must outlive at least one step attempt.
		if self.reservation_ttl_secs <= self.step_timeout_secs {
			return Err(ConfigError::Validation(format!(
				"provisioning.reservation_ttl_secs ({}) must be greater than step_timeout_secs ({})",
				self.reservation_ttl_secs, self.step_timeout_secs
			)));
		}
		if self.maintenance_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"provisioning.maintenance_interval_secs must be greater than 0".to_string(),
			));
		}
		if !matches!(self.url_scheme.as_str(), "http" | "https") {
			return Err(ConfigError::InvalidValue {
				key: "provisioning.url_scheme".to_string(),
				message: format!("unsupported scheme '{}'", self.url_scheme),
			});
		}
		if self.base_domain.is_empty() {
			return Err(ConfigError::Validation(
				"provisioning.base_domain must not be empty".to_string(),
			));
		}
		Ok(())
	}

	pub fn reservation_ttl(&self) -> Duration {
		Duration::from_secs(self.reservation_ttl_secs)
	}

	pub fn idempotency_window(&self) -> Duration {
		Duration::from_secs(self.idempotency_window_secs)
	}

	pub fn base_delay(&self) -> Duration {
		Duration::from_millis(self.base_delay_ms)
	}

	pub fn max_delay(&self) -> Duration {
		Duration::from_millis(self.max_delay_ms)
	}

	pub fn step_timeout(&self) -> Duration {
		Duration::from_secs(self.step_timeout_secs)
	}

	pub fn compensation_alert(&self) -> Duration {
		Duration::from_secs(self.compensation_alert_secs)
	}

	pub fn maintenance_interval(&self) -> Duration {
		Duration::from_secs(self.maintenance_interval_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn empty_layer_finalizes_to_defaults() {
		let config = ProvisioningConfigLayer::default().finalize().unwrap();
		assert_eq!(config, ProvisioningConfig::default());
		assert_eq!(config.idempotency_window(), Duration::from_secs(24 * 60 * 60));
		assert!(config.reserved_subdomains.contains(&"admin".to_string()));
	}

	#[test]
	fn reserved_subdomains_are_normalised() {
		let config = ProvisioningConfigLayer {
			reserved_subdomains: Some(vec![" Shop ".to_string(), "".to_string(), "API".to_string()]),
			..Default::default()
		}
		.finalize()
		.unwrap();
		assert_eq!(config.reserved_subdomains, vec!["shop", "api"]);
	}

	#[test]
	fn zero_attempts_is_rejected() {
		let err = ProvisioningConfigLayer {
			max_attempts: Some(0),
			..Default::default()
		}
		.finalize()
		.unwrap_err();
		assert!(err.to_string().contains("max_attempts"));
	}

	#[test]
	fn base_delay_above_max_is_rejected() {
		let result = ProvisioningConfigLayer {
			base_delay_ms: Some(5_000),
			max_delay_ms: Some(1_000),
			..Default::default()
		}
		.finalize();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn reservation_must_outlive_a_step() {
		let result = ProvisioningConfigLayer {
			reservation_ttl_secs: Some(30),
			step_timeout_secs: Some(30),
			..Default::default()
		}
		.finalize();
		assert!(matches!(result, Err(ConfigError::Validation(_))));
	}

	#[test]
	fn unknown_scheme_is_rejected() {
		let result = ProvisioningConfigLayer {
			url_scheme: Some("ftp".to_string()),
			..Default::default()
		}
		.finalize();
		assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
	}

	#[test]
	fn deserializes_partial_toml() {
		let layer: ProvisioningConfigLayer = toml::from_str(
			r#"
base_domain = "Shops.Example"
max_attempts = 3
reserved_subdomains = ["billing"]
"#,
		)
		.unwrap();
		let config = layer.finalize().unwrap();
		assert_eq!(config.base_domain, "shops.example");
		assert_eq!(config.max_attempts, 3);
		assert_eq!(config.reserved_subdomains, vec!["billing"]);
		assert_eq!(config.step_timeout_secs, 30);
	}

	proptest! {
		#[test]
		fn merging_an_empty_layer_changes_nothing(
			ttl in proptest::option::of(31u64..10_000),
			attempts in proptest::option::of(1u32..20),
			domain in proptest::option::of("[a-z]{1,10}\\.[a-z]{2,5}"),
		) {
			let mut layer = ProvisioningConfigLayer {
				reservation_ttl_secs: ttl,
				max_attempts: attempts,
				base_domain: domain,
				..Default::default()
			};
			let before = layer.clone();
			layer.merge(ProvisioningConfigLayer::default());
			prop_assert_eq!(layer, before);
		}
	}
}
