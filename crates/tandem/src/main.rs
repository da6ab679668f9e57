mod bridge;

use anyhow::Context;
use bridge::{HttpBrowser, HttpReasoner, OfflineReasoner};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tandem_core::loader::load_spec;
use tandem_core::reasoner::Reasoner;
use tandem_core::reporter::{self, ReportFormat};
use tandem_core::{Orchestrator, TandemConfig};
use tracing::warn;

#[derive(Parser)]
#[command(name = "tandem", version, about = "Intent-driven browser automation")]
struct Args {
    /// Config file (defaults to ./tandem.yaml, then ~/.tandem/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate an intent spec without executing it
    Validate {
        /// Path to the intent spec YAML
        spec: PathBuf,
    },
    /// Execute an intent spec against a browser bridge
    Run {
        /// Path to the intent spec YAML
        spec: PathBuf,
        /// Parameter binding, repeatable (NAME=value)
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Report format: text, json or csv
        #[arg(long, default_value = "text")]
        format: ReportFormat,
        /// Browser bridge base URL
        #[arg(long, default_value = "http://127.0.0.1:7700")]
        bridge_url: String,
        /// Reasoner bridge base URL; without one, semantic steps fail over
        /// to their deterministic fallback
        #[arg(long)]
        reasoner_url: Option<String>,
        /// Stop at the first failed step
        #[arg(long)]
        halt_on_failure: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the rendered report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TandemConfig::load_from(path)
            .await
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TandemConfig::load_default().await?,
    };

    match args.command {
        Command::Validate { spec } => validate(&spec).await,
        Command::Run {
            spec,
            params,
            format,
            bridge_url,
            reasoner_url,
            halt_on_failure,
        } => {
            run(
                config,
                &spec,
                params,
                format,
                bridge_url,
                reasoner_url,
                halt_on_failure,
            )
            .await
        }
    }
}

async fn validate(path: &PathBuf) -> anyhow::Result<()> {
    let (spec, warnings) = load_spec(path)
        .await
        .with_context(|| format!("loading spec from {}", path.display()))?;
    for warning in &warnings {
        eprintln!("warning: {}", warning);
    }
    println!("Spec '{}' is valid ({} steps)", spec.name, spec.steps.len());
    Ok(())
}

async fn run(
    mut config: TandemConfig,
    path: &PathBuf,
    params: Vec<String>,
    format: ReportFormat,
    bridge_url: String,
    reasoner_url: Option<String>,
    halt_on_failure: bool,
) -> anyhow::Result<()> {
    if halt_on_failure {
        config.execution.halt_on_failure = true;
    }
    let (spec, warnings) = load_spec(path)
        .await
        .with_context(|| format!("loading spec from {}", path.display()))?;
    for warning in &warnings {
        eprintln!("warning: {}", warning);
    }
    let vars = parse_params(&params)?;

    bridge::ping(&bridge_url)
        .await
        .with_context(|| format!("browser bridge at {} is unreachable", bridge_url))?;
    let mut browser = HttpBrowser::new(bridge_url);

    let reasoner: Arc<dyn Reasoner> = match reasoner_url {
        Some(url) => Arc::new(HttpReasoner::new(url)),
        None => Arc::new(OfflineReasoner),
    };

    let orchestrator = Orchestrator::new(config, reasoner).await;
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping the run");
            cancel.cancel();
        }
    });

    let report = orchestrator.execute(&spec, &vars, &mut browser).await?;
    println!("{}", reporter::render(&report, format)?);

    if !report.overall_success {
        std::process::exit(1);
    }
    Ok(())
}

fn parse_params(params: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for param in params {
        let (name, value) = param
            .split_once('=')
            .with_context(|| format!("parameter '{}' is not NAME=value", param))?;
        vars.insert(name.to_string(), value.to_string());
    }
    Ok(vars)
}
