//! # CLI Interface
//!
//! Command-line structure for `strata-node`, built with `clap` derive.
//! Subcommands: `run`, `check-config`, `status`, `version`.
//!
//! Flags override the TOML config file; every flag can also be given as an
//! environment variable.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use strata_gateway::config::{CacheBackend, DEFAULT_API_PORT, DEFAULT_METRICS_PORT};
use strata_gateway::GatewayConfig;

use crate::logging::LogFormat;

/// Strata chain-node gateway.
///
/// Fronts a set of validator, full and seed nodes with one API: reads fail
/// over between nodes and are cached, transactions go to the first validator
/// that accepts them, and chain height is a majority vote over what the
/// nodes report.
#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    about = "Strata chain-node gateway",
    version,
    propagate_version = true
)]
pub struct StrataNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Load and validate a configuration, print a summary, and exit.
    CheckConfig(ConfigArgs),
    /// Query the network status from a running gateway.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Config file location and the values that may override it.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to the gateway configuration file (TOML).
    ///
    /// When omitted, built-in defaults are used.
    #[arg(long, short = 'c', env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Redis connection URL. Overrides `cache.redis_url`.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Cache backend: redis, memory or null. Overrides `cache.backend`.
    #[arg(long, env = "STRATA_CACHE_BACKEND")]
    pub cache_backend: Option<CacheBackend>,

    /// Backend to fall back to when Redis is unreachable at startup.
    #[arg(long, env = "STRATA_CACHE_FALLBACK")]
    pub cache_fallback: Option<CacheBackend>,

    /// Version string reported by the status endpoint.
    #[arg(long, env = "NETWORK_VERSION")]
    pub network_version: Option<String>,

    /// Disable the background liveness sweep.
    #[arg(long, env = "STRATA_NO_LIVENESS")]
    pub no_liveness: bool,
}

impl ConfigArgs {
    /// Applies every flag that was given on top of `config`.
    pub fn apply(&self, config: &mut GatewayConfig) {
        if let Some(url) = &self.redis_url {
            config.cache.redis_url = url.clone();
        }
        if let Some(backend) = self.cache_backend {
            config.cache.backend = backend;
        }
        if let Some(fallback) = self.cache_fallback {
            config.cache.fallback = Some(fallback);
        }
        if let Some(version) = &self.network_version {
            config.network_version = version.clone();
        }
        if self.no_liveness {
            config.liveness.enabled = false;
        }
    }
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Address to bind both listeners on.
    #[arg(long, env = "STRATA_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the public API.
    #[arg(long, env = "STRATA_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "STRATA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "STRATA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running gateway.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub api_url: String,
}
