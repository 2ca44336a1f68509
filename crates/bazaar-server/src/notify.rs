// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Email notifications for finished provisioning runs.

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_config::SmtpConfig;
use bazaar_server_db::ProvisioningRun;
use bazaar_server_provisioning::{LogNotifier, MarketplaceLinks, Notifier, NotifyError};
use bazaar_server_smtp::{SmtpClient, SmtpError};
use tracing::{info, warn};

/// A rendered message ready to hand to the SMTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
	pub subject: String,
	pub html: String,
	pub text: String,
}

pub fn completed_email(run: &ProvisioningRun, links: &MarketplaceLinks) -> Email {
	let request = &run.request;
	let text = format!(
		"Hi {first},\n\n\
		 Your {company} marketplace is ready.\n\n\
		 Marketplace: {marketplace}\n\
		 Admin login: {login}\n\n\
		 Sign in with {email} to finish setting up your store.\n",
		first = request.admin_first_name,
		company = request.company_name,
		marketplace = links.marketplace_url,
		login = links.admin_login_url,
		email = request.admin_email,
	);
	let html = format!(
		"<p>Hi {first},</p>\
		 <p>Your {company} marketplace is ready.</p>\
		 <p><a href=\"{marketplace}\">Visit your marketplace</a></p>\
		 <p><a href=\"{login}\">Sign in as admin</a> with {email} to finish setting up your store.</p>",
		first = escape_html(&request.admin_first_name),
		company = escape_html(&request.company_name),
		marketplace = escape_html(&links.marketplace_url),
		login = escape_html(&links.admin_login_url),
		email = escape_html(&request.admin_email),
	);

	Email {
		subject: format!("Your {} marketplace is ready", request.company_name),
		html,
		text,
	}
}

pub fn failed_email(run: &ProvisioningRun) -> Email {
	let request = &run.request;
	let reason = run.failure_reason.as_deref().unwrap_or("an unexpected error");
	let text = format!(
		"Hi {first},\n\n\
		 We could not set up your {company} marketplace: {reason}.\n\
		 Please quote reference {run_id} when contacting support.\n",
		first = request.admin_first_name,
		company = request.company_name,
		run_id = run.id,
	);
	let html = format!(
		"<p>Hi {first},</p>\
		 <p>We could not set up your {company} marketplace: {reason}.</p>\
		 <p>Please quote reference <code>{run_id}</code> when contacting support.</p>",
		first = escape_html(&request.admin_first_name),
		company = escape_html(&request.company_name),
		reason = escape_html(reason),
		run_id = run.id,
	);

	Email {
		subject: format!("We could not set up your {} marketplace", request.company_name),
		html,
		text,
	}
}

fn escape_html(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			_ => out.push(c),
		}
	}
	out
}

/// Sends notifications to the run's admin email over SMTP.
pub struct SmtpNotifier {
	client: SmtpClient,
}

impl SmtpNotifier {
	pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
		Ok(Self {
			client: SmtpClient::new(config)?,
		})
	}

	async fn deliver(&self, run: &ProvisioningRun, email: Email) -> Result<(), NotifyError> {
		self
			.client
			.send_email(&run.request.admin_email, &email.subject, &email.html, &email.text)
			.await
			.map_err(|e| NotifyError(e.to_string()))
	}
}

#[async_trait]
impl Notifier for SmtpNotifier {
	async fn provisioning_completed(
		&self,
		run: &ProvisioningRun,
		links: &MarketplaceLinks,
	) -> Result<(), NotifyError> {
		self.deliver(run, completed_email(run, links)).await
	}

	async fn provisioning_failed(&self, run: &ProvisioningRun) -> Result<(), NotifyError> {
		self.deliver(run, failed_email(run)).await
	}
}

/// SMTP when a relay is configured and usable, the log otherwise.
pub fn notifier_for(smtp: Option<&SmtpConfig>) -> Arc<dyn Notifier> {
	let Some(config) = smtp else {
		info!("SMTP not configured; notifications will be logged");
		return Arc::new(LogNotifier);
	};

	match SmtpNotifier::new(config) {
		Ok(notifier) => {
			info!(host = %config.host, port = config.port, "Sending notifications over SMTP");
			Arc::new(notifier)
		}
		Err(e) => {
			warn!(error = %e, "SMTP client unavailable; notifications will be logged");
			Arc::new(LogNotifier)
		}
	}
}
