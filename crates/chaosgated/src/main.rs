//! ChaosGate runner.
//!
//! `chaosgated` executes one experiment definition under the SLO, policy and
//! blast-radius guards and prints the final report as JSON.
//!
//! ## Commands
//!
//! - `run`: create the experiment, execute it and print the report
//! - `validate`: check a definition against the admission rules
//! - `config`: print the effective configuration

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chaosgate_core::{
    AdmissionPolicy, ChaosGateConfig, ControlPlane, ExperimentDefinition, FaultAgent,
    InMemoryExperimentRepository, MetricSource, ProcessFaultAgent, PrometheusMetricSource,
    RuleAdmission, SimulatedFaultAgent, StaticMetricSource,
};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "chaosgated")]
#[command(version = chaosgate_core::VERSION)]
#[command(about = "Run chaos experiments under continuous SLO verification", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "CHAOSGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute an experiment definition and print its report
    Run {
        /// Experiment definition (JSON)
        #[arg(short, long)]
        experiment: PathBuf,

        /// Ask the agent for a dry run
        #[arg(long)]
        dry_run: bool,

        /// Prometheus base URL (overrides the config file)
        #[arg(long, conflicts_with = "static_metrics")]
        metrics_url: Option<String>,

        /// Fixed metric values instead of Prometheus, as QUERY=VALUE
        #[arg(long = "static-metric", value_name = "QUERY=VALUE")]
        static_metrics: Vec<String>,

        /// Use the in-process simulated agent, stepping every N seconds
        #[arg(long, value_name = "SECS")]
        simulate: Option<u64>,
    },
    /// Check an experiment definition against the admission rules
    Validate {
        #[arg(short, long)]
        experiment: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    chaosgate_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            experiment,
            dry_run,
            metrics_url,
            static_metrics,
            simulate,
        } => {
            cmd_run(
                config,
                &experiment,
                dry_run,
                metrics_url,
                &static_metrics,
                simulate,
            )
            .await
        }
        Commands::Validate { experiment } => cmd_validate(&config, &experiment),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ChaosGateConfig> {
    let config = match path {
        Some(path) => ChaosGateConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ChaosGateConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn read_definition(path: &Path) -> Result<ExperimentDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read experiment {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid experiment definition {}", path.display()))
}

fn parse_static_metrics(pairs: &[String]) -> Result<StaticMetricSource> {
    let source = StaticMetricSource::new();
    for pair in pairs {
        let Some((query, value)) = pair.split_once('=') else {
            bail!("expected QUERY=VALUE, got {pair:?}");
        };
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("invalid metric value in {pair:?}"))?;
        source.set(query.trim(), value);
    }
    Ok(source)
}

async fn cmd_run(
    mut config: ChaosGateConfig,
    experiment: &Path,
    dry_run: bool,
    metrics_url: Option<String>,
    static_metrics: &[String],
    simulate: Option<u64>,
) -> Result<()> {
    let definition = read_definition(experiment)?;

    if let Some(url) = metrics_url {
        config.metrics.prometheus_url = url;
    }
    let metric_source: Arc<dyn MetricSource> = if static_metrics.is_empty() {
        Arc::new(
            PrometheusMetricSource::new(&config.metrics)
                .context("Failed to build Prometheus client")?,
        )
    } else {
        Arc::new(parse_static_metrics(static_metrics)?)
    };
    let agent: Arc<dyn FaultAgent> = match simulate {
        Some(secs) => Arc::new(SimulatedFaultAgent::new(Duration::from_secs(secs))),
        None => Arc::new(ProcessFaultAgent::new(config.agent.clone())),
    };

    let plane = ControlPlane::from_config(
        &config,
        Arc::new(InMemoryExperimentRepository::new()),
        agent,
        metric_source,
    );

    let experiment_id = plane.create_experiment(&definition).await?;
    info!(experiment_id = %experiment_id, name = %definition.name, "executing experiment");
    let report = plane.execute_run(&experiment_id, dry_run).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    plane.orchestrator().metrics().flush();
    Ok(())
}

fn cmd_validate(config: &ChaosGateConfig, experiment: &Path) -> Result<()> {
    let definition = read_definition(experiment)?;
    let admission = RuleAdmission::new(config.admission.clone());
    let reason = admission.denial_reason(&definition);
    if !admission.is_allowed(&definition) {
        bail!(
            "experiment denied: {}",
            reason.unwrap_or_else(|| "denied by admission policy".to_string())
        );
    }
    match reason {
        Some(note) => println!("allowed ({note})"),
        None => println!("allowed"),
    }
    Ok(())
}
