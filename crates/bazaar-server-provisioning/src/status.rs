// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use bazaar_server_db::{Outcome, ProvisioningRequest, ProvisioningRun, RunId, Stage, StepStatus};
use serde::{Deserialize, Serialize};

/// How public marketplace URLs are formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSettings {
	pub scheme: String,
	pub base_domain: String,
}

impl Default for UrlSettings {
	fn default() -> Self {
		Self {
			scheme: "https".to_string(),
			base_domain: "bazaar.local".to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceLinks {
	pub marketplace_url: String,
	pub admin_login_url: String,
}

impl MarketplaceLinks {
	/// A custom domain takes precedence over the platform subdomain.
	pub fn for_request(request: &ProvisioningRequest, urls: &UrlSettings) -> Self {
		let host = match &request.custom_domain {
			Some(domain) => domain.clone(),
			None => format!("{}.{}", request.subdomain, urls.base_domain),
		};
		let marketplace_url = format!("{}://{}", urls.scheme, host);
		Self {
			admin_login_url: format!("{marketplace_url}/admin/login"),
			marketplace_url,
		}
	}
}

/// Caller-facing view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
	pub run_id: RunId,
	pub stage: Stage,
	pub outcome: Outcome,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failed_stage: Option<Stage>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub marketplace_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub admin_login_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl RunStatus {
	pub fn from_run(run: &ProvisioningRun, urls: &UrlSettings) -> Self {
		let links = (run.stage == Stage::Completed)
			.then(|| MarketplaceLinks::for_request(&run.request, urls));
		let failed_stage = run
			.steps
			.iter()
			.find(|s| s.status == StepStatus::Failed)
			.map(|s| s.stage);

		Self {
			run_id: run.id,
			stage: run.stage,
			outcome: run.outcome,
			failed_stage,
			marketplace_url: links.as_ref().map(|l| l.marketplace_url.clone()),
			admin_login_url: links.map(|l| l.admin_login_url),
			error: run.failure_reason.clone(),
		}
	}
}
