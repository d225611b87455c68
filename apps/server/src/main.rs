use std::sync::Arc;

use anyhow::Context;
use lw_registration::LogListener;
use lw_server::{ServerBuilder, ServerConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = ServerConfig::from_env()
		.await
		.context("Failed to load server configuration")?;

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)))
		.with(fmt::layer().with_target(true))
		.init();

	let server = ServerBuilder::from_config(&config)?
		.listener(Arc::new(LogListener))
		.build()?;

	server.start().await;

	info!(
		local_address = %server.local_address(),
		secure_address = ?server.secure_address(),
		security = server.resolver().is_some(),
		"Listening for device registrations",
	);

	signal::ctrl_c()
		.await
		.context("Failed to listen for the shutdown signal")?;

	info!("Shutting down");
	server.stop().await;

	Ok(())
}
