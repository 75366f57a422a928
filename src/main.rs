use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signalwatch::agent::{CycleReport, ObservabilityAgent};
use signalwatch::config::AgentConfig;
use signalwatch::incident::Incident;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "signalwatch",
    about = "Correlate anomaly signals into incidents and act on confident root causes",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (poll loop + API server)
    Serve {
        /// Bind address, overriding api.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single poll cycle against the configured sources and exit
    RunOnce {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Run one cycle over built-in sample data with dry-run sinks
    Demo {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(config: &AgentConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_and_print(agent: &ObservabilityAgent, json: bool) -> Result<()> {
    let report = agent.run_cycle().await;
    let incidents = agent.incidents().await;

    if json {
        let incidents: Vec<&Incident> = incidents.iter().map(|i| i.as_ref()).collect();
        let output = serde_json::json!({ "report": report, "incidents": incidents });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_report(&report);
    if incidents.is_empty() {
        println!("No incidents.");
        return Ok(());
    }
    println!("{:<32} | {:<13} | {:<8} | {:<10} | Title", "Incident", "Status", "Severity", "Confidence");
    println!("{:-<32}-|-{:-<13}-|-{:-<8}-|-{:-<10}-|-{:-<40}", "", "", "", "", "");
    for incident in &incidents {
        println!(
            "{:<32} | {:<13} | {:<8} | {:<10.2} | {}",
            incident.id,
            incident.status.as_str(),
            incident.severity.as_str(),
            incident.confidence(),
            incident.title
        );
        if let Some(analysis) = &incident.analysis {
            println!("{:<32} |   -> Root cause: {}", "", analysis.root_cause);
        }
        for action in &incident.actions {
            println!("{:<32} |   -> {} [{:?}]", "", action.kind.description(), action.status);
        }
    }
    println!();
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("\n=== signalwatch cycle ===");
    println!("Signals:   {} ({} duplicate)", report.signals_seen, report.duplicate_signals);
    println!("Incidents: {} created, {} updated, {} resolved", report.incidents_created, report.incidents_updated, report.incidents_resolved);
    println!("Actions:   {} dispatched, {} failed", report.actions_dispatched, report.actions_failed);
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.api.bind.clone());
            tracing::info!(%bind, sources = config.sources.len(), "Starting signalwatch daemon");
            signalwatch::serve(&config, &bind).await?;
        }
        Commands::RunOnce { json } => {
            tracing::info!(sources = config.sources.len(), "Running a single poll cycle");
            let agent = signalwatch::build_agent(&config)?;
            run_and_print(&agent, json).await?;
        }
        Commands::Demo { json } => {
            tracing::info!("Running demo cycle over sample data");
            let agent = signalwatch::demo::demo_agent(chrono::Utc::now());
            run_and_print(&agent, json).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
