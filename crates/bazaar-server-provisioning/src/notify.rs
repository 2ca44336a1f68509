// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Completion and failure notifications.
//!
//! Dispatch is fire-and-forget: a notifier error is logged and never changes
//! the outcome of the run it describes.

use std::sync::Arc;

use async_trait::async_trait;
use bazaar_server_db::ProvisioningRun;
use tracing::{info, warn};

use crate::status::MarketplaceLinks;

#[derive(Debug, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
	async fn provisioning_completed(
		&self,
		run: &ProvisioningRun,
		links: &MarketplaceLinks,
	) -> Result<(), NotifyError>;

	async fn provisioning_failed(&self, run: &ProvisioningRun) -> Result<(), NotifyError>;
}

/// Writes the notification to the log instead of sending email.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	async fn provisioning_completed(
		&self,
		run: &ProvisioningRun,
		links: &MarketplaceLinks,
	) -> Result<(), NotifyError> {
		info!(
			run_id = %run.id,
			to = %run.request.admin_email,
			company = %run.request.company_name,
			marketplace_url = %links.marketplace_url,
			admin_login_url = %links.admin_login_url,
			"Marketplace ready notification"
		);
		Ok(())
	}

	async fn provisioning_failed(&self, run: &ProvisioningRun) -> Result<(), NotifyError> {
		info!(
			run_id = %run.id,
			to = %run.request.admin_email,
			company = %run.request.company_name,
			reason = run.failure_reason.as_deref().unwrap_or("unknown"),
			"Marketplace provisioning failed notification"
		);
		Ok(())
	}
}

pub(crate) fn dispatch_completed(
	notifier: Arc<dyn Notifier>,
	run: ProvisioningRun,
	links: MarketplaceLinks,
) {
	tokio::spawn(async move {
		if let Err(e) = notifier.provisioning_completed(&run, &links).await {
			warn!(run_id = %run.id, error = %e, "Failed to dispatch completion notification");
		}
	});
}

pub(crate) fn dispatch_failed(notifier: Arc<dyn Notifier>, run: ProvisioningRun) {
	tokio::spawn(async move {
		if let Err(e) = notifier.provisioning_failed(&run).await {
			warn!(run_id = %run.id, error = %e, "Failed to dispatch failure notification");
		}
	});
}
