// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SMTP configuration for provisioning notification email.
//!
//! The section is optional: without a `host` the server logs notifications
//! instead of sending them.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

const REDACTED: &str = "[REDACTED]";

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
	/// Plain text. Only for local relays.
	None,
	/// STARTTLS upgrade after connecting.
	StartTls,
	/// Implicit TLS from the first byte.
	#[default]
	Tls,
}

impl FromStr for TlsMode {
	type Err = ConfigError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.to_lowercase().as_str() {
			"true" | "tls" => Ok(TlsMode::Tls),
			"starttls" => Ok(TlsMode::StartTls),
			"false" | "none" => Ok(TlsMode::None),
			_ => Err(ConfigError::InvalidValue {
				key: "smtp.tls_mode".to_string(),
				message: format!("'{value}' is not one of tls, starttls, none"),
			}),
		}
	}
}

#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub username: Option<String>,
	pub password: Option<String>,
	pub from_address: Option<String>,
	pub from_name: Option<String>,
	pub tls_mode: Option<TlsMode>,
}

impl fmt::Debug for SmtpConfigLayer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SmtpConfigLayer")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| REDACTED))
			.field("from_address", &self.from_address)
			.field("from_name", &self.from_name)
			.field("tls_mode", &self.tls_mode)
			.finish()
	}
}

impl SmtpConfigLayer {
	pub fn merge(&mut self, other: SmtpConfigLayer) {
		if other.host.is_some() {
			self.host = other.host;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
		if other.username.is_some() {
			self.username = other.username;
		}
		if other.password.is_some() {
			self.password = other.password;
		}
		if other.from_address.is_some() {
			self.from_address = other.from_address;
		}
		if other.from_name.is_some() {
			self.from_name = other.from_name;
		}
		if other.tls_mode.is_some() {
			self.tls_mode = other.tls_mode;
		}
	}

	/// `None` when no relay host is configured.
	pub fn finalize(self) -> Result<Option<SmtpConfig>, ConfigError> {
		let Some(host) = self.host.filter(|h| !h.trim().is_empty()) else {
			return Ok(None);
		};

		let from_address = self
			.from_address
			.filter(|a| !a.trim().is_empty())
			.ok_or_else(|| {
				ConfigError::Validation(
					"smtp.from_address is required when smtp.host is set".to_string(),
				)
			})?;

		if self.username.is_some() != self.password.is_some() {
			return Err(ConfigError::Validation(
				"smtp.username and smtp.password must be set together".to_string(),
			));
		}

		Ok(Some(SmtpConfig {
			host,
			port: self.port.unwrap_or(587),
			username: self.username,
			password: self.password,
			from_address,
			from_name: self.from_name.unwrap_or_else(|| "Bazaar".to_string()),
			tls_mode: self.tls_mode.unwrap_or_default(),
		}))
	}
}

/// Validated relay settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
	pub host: String,
	pub port: u16,
	pub username: Option<String>,
	pub password: Option<String>,
	pub from_address: String,
	pub from_name: String,
	pub tls_mode: TlsMode,
}

impl SmtpConfig {
	pub fn credentials(&self) -> Option<(&str, &str)> {
		self.username.as_deref().zip(self.password.as_deref())
	}
}

impl fmt::Debug for SmtpConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SmtpConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("username", &self.username)
			.field("password", &self.password.as_ref().map(|_| REDACTED))
			.field("from_address", &self.from_address)
			.field("from_name", &self.from_name)
			.field("tls_mode", &self.tls_mode)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn relay() -> SmtpConfigLayer {
		SmtpConfigLayer {
			host: Some("smtp.example.com".to_string()),
			from_address: Some("noreply@example.com".to_string()),
			..Default::default()
		}
	}

	#[test]
	fn absent_host_disables_smtp() {
		assert!(SmtpConfigLayer::default().finalize().unwrap().is_none());
		let blank = SmtpConfigLayer {
			host: Some("  ".to_string()),
			..Default::default()
		};
		assert!(blank.finalize().unwrap().is_none());
	}

	#[test]
	fn minimal_relay_gets_defaults() {
		let config = relay().finalize().unwrap().unwrap();
		assert_eq!(config.port, 587);
		assert_eq!(config.from_name, "Bazaar");
		assert_eq!(config.tls_mode, TlsMode::Tls);
		assert!(config.credentials().is_none());
	}

	#[test]
	fn host_without_sender_is_rejected() {
		let layer = SmtpConfigLayer {
			host: Some("smtp.example.com".to_string()),
			..Default::default()
		};
		assert!(matches!(layer.finalize(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn half_configured_credentials_are_rejected() {
		let layer = SmtpConfigLayer {
			username: Some("mailer".to_string()),
			..relay()
		};
		assert!(matches!(layer.finalize(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn tls_mode_parses_aliases() {
		assert_eq!("TLS".parse::<TlsMode>().unwrap(), TlsMode::Tls);
		assert_eq!("true".parse::<TlsMode>().unwrap(), TlsMode::Tls);
		assert_eq!("starttls".parse::<TlsMode>().unwrap(), TlsMode::StartTls);
		assert_eq!("none".parse::<TlsMode>().unwrap(), TlsMode::None);
		assert!("sometimes".parse::<TlsMode>().is_err());
	}

	#[test]
	fn merge_keeps_unset_fields() {
		let mut base = SmtpConfigLayer {
			port: Some(25),
			..relay()
		};
		base.merge(SmtpConfigLayer {
			host: Some("relay.internal".to_string()),
			..Default::default()
		});
		assert_eq!(base.host.as_deref(), Some("relay.internal"));
		assert_eq!(base.port, Some(25));
		assert_eq!(base.from_address.as_deref(), Some("noreply@example.com"));
	}

	proptest! {
		#[test]
		fn password_never_in_debug(password in "[a-zA-Z0-9]{10,40}") {
			prop_assume!(!password.contains("REDACTED"));
			let layer = SmtpConfigLayer {
				username: Some("mailer".to_string()),
				password: Some(password.clone()),
				..relay()
			};
			let layer_debug = format!("{:?}", layer);
			prop_assert!(!layer_debug.contains(&password));
			let config = layer.finalize().unwrap().unwrap();
			let config_debug = format!("{:?}", config);
			prop_assert!(!config_debug.contains(&password));
		}
	}
}
