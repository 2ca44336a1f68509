// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file and the environment.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, HttpConfigLayer, LogFormat, LoggingConfigLayer, ProvisioningConfigLayer,
	SmtpConfigLayer, TlsMode,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	/// Every default lives in the section `finalize` methods, so this layer
	/// is empty.
	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
	required: bool,
}

impl TomlSource {
	/// A file the operator asked for explicitly; missing is an error.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			required: true,
		}
	}

	/// The well-known system path, skipped when absent.
	pub fn system() -> Self {
		Self {
			path: PathBuf::from("/etc/bazaar/server.toml"),
			required: false,
		}
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.required && !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `BAZAAR_SERVER_<FIELD>` for the listener, database and
/// logging, `BAZAAR_SERVER_PROVISIONING_<FIELD>` for provisioning and
/// `BAZAAR_SERVER_SMTP_<FIELD>` for notification email.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		EnvSource::load_with(|name| std::env::var(name).ok())
	}
}

impl EnvSource {
	/// Build a layer from an arbitrary variable lookup.
	pub fn load_with<F>(lookup: F) -> Result<ServerConfigLayer, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let env = Env(lookup);
		Ok(ServerConfigLayer {
			http: Some(HttpConfigLayer {
				host: env.var("BAZAAR_SERVER_HOST"),
				port: env.parse("BAZAAR_SERVER_PORT")?,
				base_url: env.var("BAZAAR_SERVER_BASE_URL"),
			}),
			database: Some(DatabaseConfigLayer {
				url: env.var("BAZAAR_SERVER_DATABASE_URL"),
			}),
			logging: Some(LoggingConfigLayer {
				level: env.var("BAZAAR_SERVER_LOG_LEVEL"),
				format: env.parse::<LogFormat>("BAZAAR_SERVER_LOG_FORMAT")?,
			}),
			provisioning: Some(load_provisioning(&env)?),
			smtp: Some(load_smtp(&env)?),
		})
	}
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
	fn var(&self, name: &str) -> Option<String> {
		(self.0)(name).filter(|s| !s.trim().is_empty())
	}

	fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
	where
		T: std::str::FromStr,
	{
		match self.var(name) {
			Some(v) => v
				.trim()
				.parse()
				.map(Some)
				.map_err(|_| ConfigError::InvalidValue {
					key: name.to_string(),
					message: format!("cannot parse '{v}'"),
				}),
			None => Ok(None),
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|s| {
			s.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect()
		})
	}
}

fn load_provisioning<F>(env: &Env<F>) -> Result<ProvisioningConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	const P: &str = "BAZAAR_SERVER_PROVISIONING_";
	let key = |field: &str| format!("{P}{field}");

	Ok(ProvisioningConfigLayer {
		base_domain: env.var(&key("BASE_DOMAIN")),
		url_scheme: env.var(&key("URL_SCHEME")),
		reservation_ttl_secs: env.parse(&key("RESERVATION_TTL_SECS"))?,
		idempotency_window_secs: env.parse(&key("IDEMPOTENCY_WINDOW_SECS"))?,
		max_attempts: env.parse(&key("MAX_ATTEMPTS"))?,
		base_delay_ms: env.parse(&key("BASE_DELAY_MS"))?,
		max_delay_ms: env.parse(&key("MAX_DELAY_MS"))?,
		step_timeout_secs: env.parse(&key("STEP_TIMEOUT_SECS"))?,
		compensation_alert_secs: env.parse(&key("COMPENSATION_ALERT_SECS"))?,
		maintenance_interval_secs: env.parse(&key("MAINTENANCE_INTERVAL_SECS"))?,
		reserved_subdomains: env.list(&key("RESERVED_SUBDOMAINS")),
	})
}

fn load_smtp<F>(env: &Env<F>) -> Result<SmtpConfigLayer, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	Ok(SmtpConfigLayer {
		host: env.var("BAZAAR_SERVER_SMTP_HOST"),
		port: env.parse("BAZAAR_SERVER_SMTP_PORT")?,
		username: env.var("BAZAAR_SERVER_SMTP_USERNAME"),
		password: env.var("BAZAAR_SERVER_SMTP_PASSWORD"),
		from_address: env.var("BAZAAR_SERVER_SMTP_FROM_ADDRESS"),
		from_name: env.var("BAZAAR_SERVER_SMTP_FROM_NAME"),
		tls_mode: env.parse::<TlsMode>("BAZAAR_SERVER_SMTP_TLS")?,
	})
}
