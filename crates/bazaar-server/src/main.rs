// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bazaar provisioning server binary.

use std::path::PathBuf;
use std::sync::Arc;

use bazaar_server::jobs::{
	IdempotencyKeyCleanupJob, ProvisioningRecoveryJob, ReservationExpiryJob, StalledCompensationJob,
};
use bazaar_server::{create_app_state, create_router};
use bazaar_server_config::LogFormat;
use bazaar_server_jobs::{JobScheduler, RunHistory};
use clap::{Parser, Subcommand};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod version;

/// Bazaar server - marketplace tenant provisioning.
#[derive(Parser, Debug)]
#[command(name = "bazaar-server", about = "Marketplace tenant provisioning server", version)]
struct Args {
	/// Read configuration from this TOML file instead of /etc/bazaar/server.toml
	#[arg(long, env = "BAZAAR_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => bazaar_server_config::load_config_with_file(path)?,
		None => bazaar_server_config::load_config()?,
	};

	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		"starting bazaar-server"
	);

	let pool = bazaar_server_db::create_pool(&config.database.url).await?;
	bazaar_server_db::run_migrations(&pool).await?;

	let mut state = create_app_state(pool, &config);
	let orchestrator = Arc::clone(&state.orchestrator);
	let interval = config.provisioning.maintenance_interval();

	let mut scheduler = JobScheduler::new(Arc::new(RunHistory::default()));
	scheduler.register_one_shot(Arc::new(ProvisioningRecoveryJob::new(Arc::clone(
		&orchestrator,
	))));
	scheduler.register_periodic(
		Arc::new(ReservationExpiryJob::new(orchestrator.reservation().clone())),
		interval,
	);
	scheduler.register_periodic(
		Arc::new(IdempotencyKeyCleanupJob::new(orchestrator.guard().clone())),
		interval,
	);
	scheduler.register_periodic(
		Arc::new(StalledCompensationJob::new(Arc::clone(&orchestrator))),
		interval,
	);

	let scheduler = Arc::new(scheduler);
	state.job_scheduler = Some(Arc::clone(&scheduler));
	scheduler.start().await;

	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	tracing::info!("listening on {}", addr);

	let listener = tokio::net::TcpListener::bind(&addr).await?;

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "Server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Received shutdown signal");
			scheduler.shutdown().await;
		}
	}

	tracing::info!("Server shutdown complete");
	Ok(())
}
