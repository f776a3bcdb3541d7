//! meterlined — the meterline daemon.
//!
//! Serves the REST API over one Prometheus-compatible backend, or runs a
//! single analysis from the command line and prints the report as JSON.
//!
//! # Usage
//!
//! ```text
//! meterlined serve --port 8080 --config /etc/meterline/meterline.toml
//! meterlined analyze slo_status --filter 'checkout|search'
//! meterlined check-config --config meterline.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meterline_core::MeterlineConfig;
use meterline_core::duration::parse_duration;
use meterline_engine::{AnalysisKind, AnalysisRequest, Engine};
use meterline_fetch::PrometheusBackend;

const DEFAULT_LOG_FILTER: &str = "info,meterline=debug,meterlined=debug";

#[derive(Parser)]
#[command(name = "meterlined", about = "meterline metric analysis daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// TOML configuration file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overrides `backend.url` from the configuration.
        #[arg(long)]
        backend_url: Option<String>,
    },
    /// Run one analysis and print the report as JSON.
    Analyze {
        /// slo_status, traffic, cost_report, agent_cost or backend_status.
        kind: String,

        /// Regex over the analysis key label.
        #[arg(long)]
        filter: Option<String>,

        /// Traffic comparison offset, e.g. "1h" or "7d".
        #[arg(long)]
        offset: Option<String>,

        #[arg(long)]
        slo_target: Option<f64>,

        /// Cost period in days.
        #[arg(long)]
        days: Option<u32>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        backend_url: Option<String>,
    },
    /// Validate a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            port,
            config,
            backend_url,
        } => {
            let config = load_config(config.as_deref(), backend_url)?;
            run_server(port, config).await
        }
        Command::Analyze {
            kind,
            filter,
            offset,
            slo_target,
            days,
            config,
            backend_url,
        } => {
            let config = load_config(config.as_deref(), backend_url)?;
            let mut request = AnalysisRequest::new(kind.parse::<AnalysisKind>()?);
            if let Some(filter) = filter {
                request = request.with_filter(filter);
            }
            if let Some(offset) = offset {
                let offset = parse_duration(&offset)
                    .with_context(|| format!("--offset is not a duration: {offset:?}"))?;
                request = request.with_offset(offset);
            }
            if let Some(target) = slo_target {
                request = request.with_slo_target(target);
            }
            if let Some(days) = days {
                request = request.with_days(days);
            }
            run_analysis(config, request).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config), None)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Load the configuration file (or defaults) and apply the CLI override.
fn load_config(path: Option<&Path>, backend_url: Option<String>) -> anyhow::Result<MeterlineConfig> {
    let mut config = match path {
        Some(path) => MeterlineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MeterlineConfig::default(),
    };
    if let Some(url) = backend_url {
        config.backend.url = url;
        config.validate()?;
    }
    Ok(config)
}

fn build_engine(config: MeterlineConfig) -> anyhow::Result<Engine> {
    let backend = PrometheusBackend::from_config(&config.backend);
    info!(backend = %backend.base_url(), "metrics backend configured");
    Ok(Engine::new(config, Arc::new(backend))?)
}

async fn run_analysis(config: MeterlineConfig, request: AnalysisRequest) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    let report = engine.run(&request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_server(port: u16, config: MeterlineConfig) -> anyhow::Result<()> {
    info!("meterline daemon starting");

    let engine = Arc::new(build_engine(config)?);
    let router = meterline_api::build_router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C. In-flight analyses are dropped with
    // their connections, which cancels their queries.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c, shutting down");
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("meterline daemon stopped");
    Ok(())
}
