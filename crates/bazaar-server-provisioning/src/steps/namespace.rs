// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use async_trait::async_trait;
use bazaar_server_db::{ReserveOutcome, Stage};

use super::{StepContext, StepExecutor};
use crate::error::StepError;
use crate::output::StepOutput;
use crate::reservation::NamespaceReservation;

/// Holds the subdomain and, when requested, the custom domain.
pub struct ReserveNamespaceStep {
	reservation: NamespaceReservation,
	ttl: Duration,
}

impl ReserveNamespaceStep {
	pub fn new(reservation: NamespaceReservation, ttl: Duration) -> Self {
		Self { reservation, ttl }
	}

	async fn reserve(&self, ctx: &StepContext<'_>, name: &str) -> Result<(), StepError> {
		match self.reservation.reserve(name, ctx.run_id, self.ttl).await? {
			ReserveOutcome::Reserved => Ok(()),
			ReserveOutcome::Conflict { holder } => Err(StepError::Conflict(format!(
				"namespace '{name}' is held by run {holder}"
			))),
		}
	}
}

#[async_trait]
impl StepExecutor for ReserveNamespaceStep {
	fn stage(&self) -> Stage {
		Stage::ReservingNamespace
	}

	async fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutput, StepError> {
		let subdomain = &ctx.request.subdomain;
		self.reserve(ctx, subdomain).await?;

		if let Some(domain) = &ctx.request.custom_domain {
			if let Err(e) = self.reserve(ctx, domain).await {
				// A conflict is never compensated, so drop the subdomain here.
				self.reservation.release(subdomain, ctx.run_id).await?;
				return Err(e);
			}
		}

		Ok(StepOutput::NamespaceReserved {
			subdomain: subdomain.clone(),
			custom_domain: ctx.request.custom_domain.clone(),
		})
	}

	async fn undo(&self, ctx: &StepContext<'_>, _output: Option<&StepOutput>) -> Result<(), StepError> {
		if let Some(domain) = &ctx.request.custom_domain {
			self.reservation.release(domain, ctx.run_id).await?;
		}
		self.reservation
			.release(&ctx.request.subdomain, ctx.run_id)
			.await?;
		Ok(())
	}
}
