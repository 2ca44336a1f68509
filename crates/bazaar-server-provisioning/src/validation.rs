// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Input checks for provisioning requests and namespace availability lookups.

use bazaar_server_db::ProvisioningRequest;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::StepError;

static SUBDOMAIN_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").unwrap());

static DOMAIN_LABEL_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").unwrap());

static EMAIL_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static PLAN_ID_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());

static COLOR_REGEX: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());

pub const SUBDOMAIN_MIN_LEN: usize = 3;
pub const SUBDOMAIN_MAX_LEN: usize = 63;
pub const COMPANY_NAME_MIN_LEN: usize = 2;
pub const COMPANY_NAME_MAX_LEN: usize = 100;
pub const PERSON_NAME_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 254;
pub const DOMAIN_MAX_LEN: usize = 253;
pub const PLAN_ID_MAX_LEN: usize = 64;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 255;

pub const DEFAULT_RESERVED_SUBDOMAINS: &[&str] =
	&["www", "api", "admin", "app", "mail", "static", "cdn", "status"];

/// Deployment-specific validation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
	/// Subdomains the platform keeps for itself.
	pub reserved_subdomains: Vec<String>,
}

impl Default for ValidationRules {
	fn default() -> Self {
		Self {
			reserved_subdomains: DEFAULT_RESERVED_SUBDOMAINS
				.iter()
				.map(|s| s.to_string())
				.collect(),
		}
	}
}

impl ValidationRules {
	pub fn is_reserved(&self, subdomain: &str) -> bool {
		self.reserved_subdomains.iter().any(|r| r == subdomain)
	}
}

/// Lowercase letters, digits and single hyphens, 3-63 characters, not
/// starting or ending with a hyphen.
pub fn validate_subdomain(subdomain: &str, rules: &ValidationRules) -> Result<(), String> {
	if subdomain.len() < SUBDOMAIN_MIN_LEN || subdomain.len() > SUBDOMAIN_MAX_LEN {
		return Err(format!(
			"subdomain must be between {SUBDOMAIN_MIN_LEN} and {SUBDOMAIN_MAX_LEN} characters"
		));
	}
	if !SUBDOMAIN_REGEX.is_match(subdomain) || subdomain.contains("--") {
		return Err(format!("subdomain '{subdomain}' has invalid syntax"));
	}
	if rules.is_reserved(subdomain) {
		return Err(format!("subdomain '{subdomain}' is reserved"));
	}
	Ok(())
}

pub fn validate_custom_domain(domain: &str) -> Result<(), String> {
	if domain.is_empty() || domain.len() > DOMAIN_MAX_LEN {
		return Err(format!("custom domain must be at most {DOMAIN_MAX_LEN} characters"));
	}
	let labels: Vec<&str> = domain.split('.').collect();
	if labels.len() < 2 {
		return Err(format!("custom domain '{domain}' must contain a dot"));
	}
	for label in &labels {
		if label.len() > 63 || !DOMAIN_LABEL_REGEX.is_match(label) {
			return Err(format!("custom domain '{domain}' has invalid syntax"));
		}
	}
	let tld = labels[labels.len() - 1];
	if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_lowercase()) {
		return Err(format!("custom domain '{domain}' has an invalid top-level domain"));
	}
	Ok(())
}

pub fn validate_company_name(name: &str) -> Result<(), String> {
	let len = name.trim().chars().count();
	if !(COMPANY_NAME_MIN_LEN..=COMPANY_NAME_MAX_LEN).contains(&len) {
		return Err(format!(
			"company name must be between {COMPANY_NAME_MIN_LEN} and {COMPANY_NAME_MAX_LEN} characters"
		));
	}
	Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
	if email.len() > EMAIL_MAX_LEN || !EMAIL_REGEX.is_match(email) {
		return Err(format!("'{email}' is not a valid email address"));
	}
	Ok(())
}

fn validate_person_name(field: &str, value: &str) -> Result<(), String> {
	let len = value.trim().chars().count();
	if len == 0 || len > PERSON_NAME_MAX_LEN {
		return Err(format!(
			"{field} must be between 1 and {PERSON_NAME_MAX_LEN} characters"
		));
	}
	Ok(())
}

pub fn validate_primary_color(color: &str) -> Result<(), String> {
	if !COLOR_REGEX.is_match(color) {
		return Err(format!("primary color '{color}' must be a #rrggbb hex value"));
	}
	Ok(())
}

pub fn validate_plan_id(plan_id: &str) -> Result<(), String> {
	if plan_id.len() > PLAN_ID_MAX_LEN || !PLAN_ID_REGEX.is_match(plan_id) {
		return Err(format!("plan id '{plan_id}' is invalid"));
	}
	Ok(())
}

pub fn validate_idempotency_key(key: &str) -> Result<(), String> {
	if key.trim().is_empty() || key.len() > IDEMPOTENCY_KEY_MAX_LEN {
		return Err(format!(
			"idempotency key must be between 1 and {IDEMPOTENCY_KEY_MAX_LEN} characters"
		));
	}
	if key.chars().any(char::is_control) {
		return Err("idempotency key must not contain control characters".to_string());
	}
	Ok(())
}

/// Check every field, reporting all problems at once.
pub fn validate_request(
	request: &ProvisioningRequest,
	rules: &ValidationRules,
) -> Result<(), StepError> {
	let checks = [
		validate_idempotency_key(&request.idempotency_key),
		validate_company_name(&request.company_name),
		validate_person_name("admin first name", &request.admin_first_name),
		validate_person_name("admin last name", &request.admin_last_name),
		validate_email(&request.admin_email),
		validate_subdomain(&request.subdomain, rules),
		request
			.custom_domain
			.as_deref()
			.map(validate_custom_domain)
			.unwrap_or(Ok(())),
		validate_primary_color(&request.primary_color),
		validate_plan_id(&request.plan_id),
	];

	let problems: Vec<String> = checks.into_iter().filter_map(|c| c.err()).collect();
	if problems.is_empty() {
		Ok(())
	} else {
		Err(StepError::Validation(problems.join("; ")))
	}
}
