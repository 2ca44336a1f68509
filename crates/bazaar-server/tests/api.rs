// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use axum::{
	body::Body,
	http::{Request, StatusCode},
	Router,
};
use bazaar_server::{create_app_state, create_router, ServerConfig};
use bazaar_server_db::testing::{create_test_pool, sample_request};
use bazaar_server_db::ProvisioningRequest;
use serde_json::Value;
use tower::ServiceExt;

async fn create_test_app() -> Router {
	let pool = create_test_pool().await;
	create_router(create_app_state(pool, &ServerConfig::default()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
	let response = app.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let body = axum::body::to_bytes(response.into_body(), usize::MAX)
		.await
		.unwrap();
	let json = if body.is_empty() {
		Value::Null
	} else {
		serde_json::from_slice(&body).unwrap_or(Value::Null)
	};
	(status, json)
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header("Content-Type", "application/json")
		.body(Body::from(serde_json::to_vec(body).unwrap()))
		.unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.body(Body::empty())
		.unwrap()
}

async fn submit(app: &Router, request: &ProvisioningRequest) -> (StatusCode, String) {
	let (status, body) = send(app, post_json("/api/provisioning", request)).await;
	(status, body["run_id"].as_str().unwrap().to_string())
}

async fn wait_for_stage(app: &Router, run_id: &str, stage: &str) -> Value {
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			let (status, body) = send(app, get(&format!("/api/provisioning/{run_id}"))).await;
			assert_eq!(status, StatusCode::OK);
			if body["stage"] == stage {
				return body;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("run did not reach the expected stage")
}

#[tokio::test]
async fn health_reports_database() {
	let app = create_test_app().await;
	let (status, body) = send(&app, get("/health")).await;

	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "healthy");
	assert_eq!(body["components"]["database"]["status"], "healthy");
	assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn submit_provisions_and_reports_urls() {
	let app = create_test_app().await;
	let (status, run_id) = submit(&app, &sample_request("order-1", "acme")).await;
	assert_eq!(status, StatusCode::ACCEPTED);

	let body = wait_for_stage(&app, &run_id, "COMPLETED").await;
	assert_eq!(body["outcome"], "succeeded");
	assert_eq!(body["marketplace_url"], "https://acme.bazaar.local");
	assert_eq!(
		body["admin_login_url"],
		"https://acme.bazaar.local/admin/login"
	);

	let (status, steps) = send(&app, get(&format!("/api/provisioning/{run_id}/steps"))).await;
	assert_eq!(status, StatusCode::OK);
	let steps = steps["steps"].as_array().unwrap();
	assert_eq!(steps.len(), 7);
	assert!(steps.iter().all(|s| s["status"] == "ok"));
}

#[tokio::test]
async fn duplicate_submission_returns_existing_run() {
	let app = create_test_app().await;
	let request = sample_request("order-1", "acme");

	let (first_status, first_id) = submit(&app, &request).await;
	let (status, body) = send(&app, post_json("/api/provisioning", &request)).await;

	assert_eq!(first_status, StatusCode::ACCEPTED);
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["run_id"], first_id.as_str());
	assert_eq!(body["is_new"], false);
}

#[tokio::test]
async fn blank_idempotency_key_is_rejected() {
	let app = create_test_app().await;
	let (status, body) = send(
		&app,
		post_json("/api/provisioning", &sample_request("", "acme")),
	)
	.await;

	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn invalid_request_fails_the_run_not_the_call() {
	let app = create_test_app().await;
	let (status, run_id) = submit(&app, &sample_request("order-1", "-bad-")).await;
	assert_eq!(status, StatusCode::ACCEPTED);

	let body = wait_for_stage(&app, &run_id, "FAILED").await;
	assert_eq!(body["outcome"], "failed");
	assert_eq!(body["failed_stage"], "VALIDATING");
	assert!(body["marketplace_url"].is_null());
	assert!(body["error"].as_str().unwrap().contains("subdomain"));
}

#[tokio::test]
async fn unknown_run_is_not_found() {
	let app = create_test_app().await;
	let (status, body) = send(
		&app,
		get("/api/provisioning/00000000-0000-4000-8000-000000000000"),
	)
	.await;

	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn malformed_run_id_is_bad_request() {
	let app = create_test_app().await;
	let (status, _) = send(&app, get("/api/provisioning/not-a-uuid")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn operator_actions_on_completed_run_conflict() {
	let app = create_test_app().await;
	let (_, run_id) = submit(&app, &sample_request("order-1", "acme")).await;
	wait_for_stage(&app, &run_id, "COMPLETED").await;

	let (status, body) = send(
		&app,
		post_empty(&format!("/api/provisioning/{run_id}/cancel")),
	)
	.await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["error"], "not_cancellable");

	let (status, body) = send(
		&app,
		post_json(
			&format!("/api/provisioning/{run_id}/rollback"),
			&serde_json::json!({ "reason": "customer refunded" }),
		),
	)
	.await;
	assert_eq!(status, StatusCode::CONFLICT);
	assert_eq!(body["error"], "conflict");

	let (status, body) = send(
		&app,
		post_empty(&format!("/api/provisioning/{run_id}/resume")),
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["stage"], "COMPLETED");
}

#[tokio::test]
async fn availability_lookup() {
	let app = create_test_app().await;

	let (status, body) = send(&app, get("/api/namespaces/availability?subdomain=acme")).await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["available"], true);

	let (_, body) = send(&app, get("/api/namespaces/availability?subdomain=admin")).await;
	assert_eq!(body["available"], false);

	let (_, run_id) = submit(&app, &sample_request("order-1", "acme")).await;
	wait_for_stage(&app, &run_id, "COMPLETED").await;
	let (_, body) = send(&app, get("/api/namespaces/availability?subdomain=acme")).await;
	assert_eq!(body["available"], false);

	let (status, body) = send(&app, get("/api/namespaces/availability")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["error"], "invalid_request");
}
