mod agent;
mod analysis;
mod bench;
mod error;
mod experiment;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::{Credentials, HarnessConfig, ProcessBackend};
use bench::{available_combinations, total_instances, Catalog, Category, Level, RunStore, RunSummary};
use error::RunError;
use experiment::ExperimentRunner;

/// Run OpenHands against AutoPenBench and analyse the results
#[derive(Debug, Parser)]
#[command(name = "autopen", version, about)]
struct Cli {
    /// JSON config file; its `harness` section configures the agent harness
    #[arg(long, global = true, default_value = "autopen.json")]
    config: PathBuf,

    /// AutoPenBench games file
    #[arg(long, global = true, env = "AUTOPENBENCH_DATA")]
    data: Option<PathBuf>,

    /// Directory that receives one timestamped folder per run
    #[arg(long, global = true, default_value = "logs/openhands_experiments")]
    log_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every instance of every category
    RunAll,
    /// Run one category, or a single instance of it
    RunCategory {
        #[arg(long, value_enum)]
        level: Level,
        #[arg(long, value_enum)]
        category: Category,
        #[arg(long)]
        instance_idx: Option<usize>,
    },
    /// Command frequency over the stdout.log files of a run
    AnalyzeCommands {
        #[arg(long)]
        log_dir: PathBuf,
        #[arg(long, default_value_t = 30)]
        top_n: usize,
        /// List commands containing this keyword instead of the frequency report
        #[arg(long)]
        search: Option<String>,
        /// Count Metasploit console verbs as one tool and skip sleep/timeout
        #[arg(long)]
        merge_metasploit: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// SR/PR/cost table in LaTeX
    Report {
        #[arg(long = "log-dir", required = true, num_args = 1..)]
        log_dirs: Vec<PathBuf>,
        #[arg(long, default_value = "openhands_results.tex")]
        output: PathBuf,
    },
    /// Success rate per attack stage
    StageSuccess {
        #[arg(long)]
        log_dir: PathBuf,
        #[arg(long, value_enum, default_value = "real-world")]
        level: Level,
        #[arg(long, value_enum, default_value = "cve")]
        category: Category,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autopen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(RunError::InvalidCategory { .. }) = e.downcast_ref::<RunError>() {
                eprintln!("Error: {}", e);
                eprintln!("Available combinations:");
                for combo in available_combinations() {
                    eprintln!("  {}", combo);
                }
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::RunAll => {
            let runner = build_runner(&cli.config, cli.data.as_deref(), &cli.log_root)?;
            tracing::info!(
                "Running all {} instances, results in {}",
                total_instances(),
                runner.store().run_dir().display()
            );
            let results = runner.run_all().await;
            let summary = runner.summarize(results, None)?;
            print_summary(&summary);
        }
        Command::RunCategory {
            level,
            category,
            instance_idx,
        } => {
            // reject bad selections before touching credentials or the filesystem
            bench::lookup(level, category)?.select_indices(instance_idx)?;
            let runner = build_runner(&cli.config, cli.data.as_deref(), &cli.log_root)?;
            let results = runner.run_category(level, category, instance_idx).await?;
            let summary = runner.summarize(results, Some((level, category)))?;
            print_summary(&summary);
        }
        Command::AnalyzeCommands {
            log_dir,
            top_n,
            search,
            merge_metasploit,
            output,
        } => {
            if !log_dir.exists() {
                bail!("Directory not found: {}", log_dir.display());
            }
            let text = match search {
                Some(keyword) => {
                    let hits = analysis::search_commands(&log_dir, &keyword)?;
                    let mut text = format!("Found {} commands containing '{}':\n", hits.len(), keyword);
                    for (cmd, instance) in hits {
                        text.push_str(&format!("  [{}] {}\n", instance, cmd));
                    }
                    text
                }
                None => {
                    let commands = analysis::analyze_commands(&log_dir)?;
                    let categories = if merge_metasploit {
                        analysis::merge_metasploit(&commands.categories)
                    } else {
                        commands.categories.clone()
                    };
                    analysis::render_report(&commands, &categories, top_n)
                }
            };
            emit(&text, output.as_deref())?;
        }
        Command::Report { log_dirs, output } => {
            let mut results = Vec::new();
            for dir in &log_dirs {
                let loaded = RunStore::load_results(dir)?;
                tracing::info!("Loaded {} results from {}", loaded.len(), dir.display());
                results.extend(loaded);
            }
            if results.is_empty() {
                bail!("No instance results found");
            }
            let metrics = analysis::calculate_metrics(&results);
            println!("{}", analysis::render_metrics_summary(&metrics));
            emit(&analysis::render_latex_table(&metrics), Some(&output))?;
        }
        Command::StageSuccess {
            log_dir,
            level,
            category,
        } => {
            let results: Vec<_> = RunStore::load_results(&log_dir)?
                .into_iter()
                .filter(|r| r.level == level && r.category == category)
                .collect();
            if results.is_empty() {
                bail!("No {}/{} results found in {}", level, category, log_dir.display());
            }
            tracing::info!("Loaded {} {}/{} results", results.len(), level, category);
            let rates = analysis::stage_success_rates(&results);
            println!("Stage success rates (%)\n");
            print!("{}", analysis::render_stage_chart(&rates));
        }
    }
    Ok(())
}

fn build_runner(
    config_path: &Path,
    data: Option<&Path>,
    log_root: &Path,
) -> Result<ExperimentRunner<ProcessBackend>> {
    let credentials = Credentials::from_env()?;
    let config = HarnessConfig::load(config_path)?;

    let catalog_path = data
        .map(Path::to_path_buf)
        .or_else(|| config.catalog.clone())
        .context("No benchmark catalog: pass --data, set AUTOPENBENCH_DATA or set harness.catalog")?;
    let catalog = Catalog::load(&catalog_path)?;

    let store = RunStore::create(log_root, RunStore::new_timestamp())?;
    tracing::info!(
        model = %credentials.llm.model,
        harness = %config.agent.command,
        "Logs will be saved to {}",
        store.run_dir().display()
    );

    let backend = ProcessBackend::new(config.agent.clone(), credentials.harness_env());
    Ok(ExperimentRunner::new(
        backend,
        catalog,
        store,
        credentials.llm.model,
        config.seconds_per_iteration,
    ))
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved to {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total instances: {}", summary.total_instances);
    println!("Successful: {}", summary.successful);
    println!("Failed: {}", summary.failed);
    println!("Success rate: {:.1}%", summary.success_rate() * 100.0);
}
