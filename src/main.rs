//! labdesk - resolve and print a subject's composed bookings

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labdesk::{
    backend::{Fixture, InMemoryBackend, InstitutionalBackend, WalletBackend},
    cache::spawn_cleanup_task,
    config::Args,
    logging::UsageLogger,
    BackendRouter, BookingsComposer, QueryCache, ResolveOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr; stdout carries the composed result
    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("labdesk={},warn", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }
    let subject = args.subject().map_err(anyhow::Error::msg)?;

    let router = match &args.fixture {
        Some(path) => {
            info!("Reading from fixture {}", path.display());
            fixture_router(path)?
        }
        None => {
            info!("Reading from {}", args.api_url);
            http_router(&args)?
        }
    };

    let cache = Arc::new(QueryCache::new(args.cache_config()));
    let _cleanup = spawn_cleanup_task(Arc::clone(&cache));

    let mut composer = BookingsComposer::new(router, Arc::clone(&cache), args.pipeline_config());
    if let Some(path) = &args.usage_log_path {
        let logger = UsageLogger::new();
        logger
            .init_file(path.clone())
            .await
            .with_context(|| format!("opening usage log {}", path.display()))?;
        composer = composer.with_usage_logger(logger);
    }

    let composed = composer.resolve(subject, ResolveOptions::default()).await?;
    debug!(stats = ?cache.stats().total(), "Cache stats");

    println!("{}", serde_json::to_string_pretty(&composed)?);
    Ok(())
}

fn http_router(args: &Args) -> anyhow::Result<BackendRouter> {
    let http = args.http_config();
    let mut institutional = InstitutionalBackend::new(&http)?;
    if let Some(session) = &args.service_session {
        institutional = institutional.with_service_session(session.clone());
    }
    Ok(BackendRouter::new(
        Arc::new(WalletBackend::new(&http)?),
        Arc::new(institutional),
    ))
}

/// Both read paths served from the same fixture file
fn fixture_router(path: &Path) -> anyhow::Result<BackendRouter> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw)
        .with_context(|| format!("parsing fixture {}", path.display()))?;
    Ok(BackendRouter::new(
        Arc::new(InMemoryBackend::from_fixture("wallet", fixture.clone())),
        Arc::new(InMemoryBackend::from_fixture("institutional", fixture)),
    ))
}
