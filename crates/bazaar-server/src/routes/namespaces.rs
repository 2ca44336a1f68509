// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{
	extract::{Query, State},
	Json,
};
use serde::{Deserialize, Serialize};

use crate::{api::AppState, error::ServerError};

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
	pub subdomain: Option<String>,
	pub custom_domain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
	pub available: bool,
}

/// GET /api/namespaces/availability - read-only lookup; reserves nothing.
pub async fn check_availability(
	State(state): State<AppState>,
	Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ServerError> {
	let available = state
		.orchestrator
		.namespace_available(query.subdomain.as_deref(), query.custom_domain.as_deref())
		.await?;
	Ok(Json(AvailabilityResponse { available }))
}
