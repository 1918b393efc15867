// Entrypoint for the cache engine binary.

mod config;
mod error;
mod hash;
mod arena;
mod slab;
mod protocol;
mod server;
mod shutdown;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Args, Config, Env};
use crate::server::Listener;
use crate::shutdown::GracefulShutdown;
use crate::store::Engine;

/// Configures structured logging: pretty console output in `dev`, JSON
/// lines in `prod`.
fn configure_logger(env: Env) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match env {
        Env::Prod => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        Env::Dev => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config: Config = args.into();

    // Forking a multi-threaded process is unsafe, so daemonize before
    // the tokio runtime exists.
    if config.daemonize {
        config::daemonize().context("failed to daemonize")?;
    }

    configure_logger(config.env);

    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<()> {
    shutdown::ignore_sigpipe();

    info!(
        component = "main",
        event = "startup",
        version = store::engine::VERSION,
        port = config.port,
        shards = config.engine.shard_count,
        "sharded cache engine starting"
    );

    let shutdown_token = CancellationToken::new();
    let graceful = GracefulShutdown::new(shutdown_token.clone());
    graceful.set_graceful_timeout(Duration::from_secs(30)).await;

    let engine = Arc::new(Engine::new(config.engine));
    let listener = Listener::bind(&config).context("failed to bind listener")?;

    graceful.add(1);
    let serve_engine = Arc::clone(&engine);
    let serve_shutdown = shutdown_token.clone();
    let serve_graceful = graceful.clone();
    let serve_done = graceful.clone();
    tokio::spawn(async move {
        if let Err(err) = listener.serve(serve_engine, serve_shutdown, serve_graceful).await {
            error!(component = "main", %err, "listener exited with error");
        }
        serve_done.done();
    });

    if let Err(err) = graceful.await_shutdown().await {
        error!(component = "main", %err, "graceful shutdown failed");
        return Err(err);
    }

    info!(component = "main", event = "shutdown_complete", "exiting");
    Ok(())
}
