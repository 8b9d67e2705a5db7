// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Gateway Node
//!
//! Entry point for the `strata-node` binary. Parses CLI arguments, loads the
//! gateway configuration, connects the cache, starts the liveness sweep, and
//! serves the public API and the Prometheus endpoint.
//!
//! The binary supports four subcommands:
//!
//! - `run`          — start the gateway
//! - `check-config` — validate a configuration file and print a summary
//! - `status`       — query a running gateway's network status
//! - `version`      — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use strata_gateway::{
    cache, ChainService, GatewayConfig, GatewayMetrics, HttpNodeClient, HttpStatusProbe,
    LivenessChecker, NodeRegistry,
};

use cli::{Commands, ConfigArgs, StrataNodeCli};
use logging::DEFAULT_DIRECTIVES;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrataNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_gateway(args).await,
        Commands::CheckConfig(args) => check_config(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the config file (or defaults), applies CLI overrides, validates.
fn resolve_config(args: &ConfigArgs) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to build default config".to_string(),
    })?;
    args.apply(&mut config);
    config.validate().context("invalid gateway configuration")?;
    Ok(config)
}

/// Starts the gateway: cache, registry, liveness sweep, API and metrics
/// listeners. Returns after a shutdown signal.
async fn run_gateway(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_DIRECTIVES, args.log_format);

    let config = resolve_config(&args.config)?;
    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        nodes = config.nodes.len(),
        cache_backend = %config.cache.backend,
        network_version = %config.network_version,
        "starting strata-node"
    );

    // --- Metrics ---
    let gateway_metrics = GatewayMetrics::shared();

    // --- Cache ---
    let cache_layer = cache::connect(&config.cache, Arc::clone(&gateway_metrics))
        .await
        .context("failed to initialize cache")?;
    tracing::info!(backend = cache_layer.backend(), "cache ready");

    // --- Registry ---
    let registry = Arc::new(NodeRegistry::with_nodes(config.nodes.iter().cloned()));
    tracing::info!(count = registry.len(), "node registry seeded");

    // --- Node client ---
    let client = Arc::new(
        HttpNodeClient::new(config.node_timeout()).context("failed to build HTTP client")?,
    );

    // --- Service ---
    let service = Arc::new(ChainService::new(
        &config,
        Arc::clone(&registry),
        client.clone(),
        cache_layer,
        Arc::clone(&gateway_metrics),
    ));
    service.node_counts();

    // --- Liveness sweep ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let liveness = if config.liveness.enabled {
        let checker = Arc::new(LivenessChecker::new(
            Arc::clone(&registry),
            Arc::new(HttpStatusProbe::new(client)),
            Arc::clone(&gateway_metrics),
            config.liveness.clone(),
        ));
        tracing::info!(
            interval_secs = config.liveness.interval_secs,
            "liveness sweep enabled"
        );
        Some(checker.spawn(shutdown_rx))
    } else {
        tracing::info!("liveness sweep disabled");
        None
    };

    // --- API server ---
    let api_router = api::create_router(api::AppState {
        service,
        metrics: Arc::clone(&gateway_metrics),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let api_addr = format!("{}:{}", args.bind, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = metrics::metrics_router(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = liveness {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "liveness task ended abnormally");
        }
    }

    tracing::info!("strata-node stopped");
    Ok(())
}

/// Validates a configuration and prints what the gateway would start with.
fn check_config(args: ConfigArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    println!("Configuration OK.");
    println!("  Network version : {}", config.network_version);
    println!("  Node timeout    : {} ms", config.node_timeout_ms);
    println!(
        "  Cache           : {} (fallback: {})",
        config.cache.backend,
        config
            .cache
            .fallback
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".into())
    );
    println!(
        "  Liveness        : {}",
        if config.liveness.enabled {
            format!("every {} s", config.liveness.interval_secs)
        } else {
            "disabled".into()
        }
    );
    println!("  Nodes           : {}", config.nodes.len());
    for node in &config.nodes {
        println!("    - {:<16} {:<10} {}", node.id, node.role.as_str(), node.url);
    }

    Ok(())
}

/// Queries a running gateway's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/blockchain/status", args.api_url.trim_end_matches('/'));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach gateway at {}", url))?
        .error_for_status()
        .with_context(|| format!("gateway at {} returned an error", url))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("gateway returned a non-JSON status body")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("strata-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolve_config_reads_file_and_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
network_version = "2.0.0"

[[nodes]]
id = "val-1"
url = "http://val-1.test:8080"
role = "validator"
"#
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            no_liveness: true,
            ..ConfigArgs::default()
        };
        let config = resolve_config(&args).unwrap();

        assert_eq!(config.network_version, "2.0.0");
        assert_eq!(config.nodes.len(), 1);
        assert!(!config.liveness.enabled);
    }

    #[test]
    fn resolve_config_reports_missing_file() {
        let args = ConfigArgs {
            config: Some("/nonexistent/strata.toml".into()),
            ..ConfigArgs::default()
        };
        let err = resolve_config(&args).unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }

    #[test]
    fn check_config_accepts_defaults() {
        check_config(ConfigArgs::default()).unwrap();
    }
}
