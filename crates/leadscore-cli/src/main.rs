use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use leadscore_core::{CriteriaToggles, NameKey};
use leadscore_scoring::{RegionSets, ScoringEngine};
use leadscore_sync::{parse_criteria_list, report_history_markdown, AgentPool, AnalysisConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadscore-cli")]
#[command(about = "Event lead scoring command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Score every record in an import bundle and export a ranked report.
    Analyze {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        max_records: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Criteria to switch off (history, region, contact, delegates).
        #[arg(long, value_delimiter = ',')]
        disable: Vec<String>,
        /// Add the ICCA qualification advisory to notes.
        #[arg(long)]
        icca: bool,
    },
    /// Score one event from a bundle and print the result as JSON.
    Score {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        event: String,
    },
    /// Summarize recently exported reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

fn apply_disabled(mut toggles: CriteriaToggles, names: &[String]) -> CriteriaToggles {
    let (criteria, unknown) = parse_criteria_list(&names.join(","));
    for name in unknown {
        warn!(criterion = %name, "ignoring unknown criterion");
    }
    for criterion in criteria {
        toggles = toggles.disable(criterion);
    }
    toggles
}

fn load_engine(config: &AnalysisConfig) -> ScoringEngine {
    let regions = RegionSets::from_workspace_root(&config.workspace_root).unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "falling back to built-in region lists");
        RegionSets::default()
    });
    ScoringEngine::new(regions)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AnalysisConfig::from_env();

    match cli.command {
        Commands::Analyze {
            bundle,
            max_records,
            concurrency,
            disable,
            icca,
        } => {
            if let Some(max_records) = max_records {
                config.max_records = max_records;
            }
            if let Some(concurrency) = concurrency {
                config.max_concurrency = concurrency.max(1);
            }
            config.toggles = apply_disabled(config.toggles, &disable);
            config.toggles.icca_qualification |= icca;

            let import = leadscore_ingest::load_and_ingest(&bundle)?;
            let engine = load_engine(&config);
            let pool = AgentPool::scoring(config, engine);
            let (summary, written) = pool.run_and_export(import.events, import.contacts).await?;
            println!(
                "analysis complete: run_id={} records={} completed={} errored={} not_analyzed={} report={}",
                summary.run_id,
                summary.total_records,
                summary.completed,
                summary.errored,
                summary.not_analyzed,
                written.dir.display()
            );
        }
        Commands::Score { bundle, event } => {
            let import = leadscore_ingest::load_and_ingest(&bundle)?;
            let wanted = NameKey::new(&event);
            let Some(record) = import.events.iter().find(|e| e.key() == wanted) else {
                bail!("no event named {event:?} in {}", bundle.display());
            };
            let engine = load_engine(&config);
            let result = engine.score_with_contacts(record, &import.contacts, &config.toggles)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Report { runs } => {
            println!("{}", report_history_markdown(&config.workspace_root, runs)?);
        }
    }

    Ok(())
}
