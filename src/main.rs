use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use fedrl::lifecycle::{EvaluationObserver, EvaluationProgress};
use fedrl::tasks::Corridor;
use fedrl::{EngineConfig, FederatedEngine, FileStore, MemoryStore, PersistencePort};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (json, yaml or toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for stored and exported models
    #[arg(short, long, global = true)]
    model_dir: Option<PathBuf>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on the corridor task, freeze the population and evaluate it
    Run {
        /// Number of clients
        #[arg(short = 'n', long)]
        clients: Option<usize>,

        /// Training ticks before freezing
        #[arg(short, long, default_value_t = 2000)]
        ticks: u64,

        /// Evaluation episodes
        #[arg(short, long)]
        eval_episodes: Option<usize>,

        /// Seed for reproducible exploration
        #[arg(short, long)]
        seed: Option<u64>,

        /// Corridor length in cells
        #[arg(short, long, default_value_t = 8)]
        length: usize,

        /// Also export the frozen model to a timestamped file
        #[arg(long)]
        export: bool,
    },

    /// Evaluate the stored model without training
    Evaluate {
        /// Evaluation episodes
        #[arg(short, long)]
        eval_episodes: Option<usize>,

        /// Corridor length the model was trained on
        #[arg(short, long, default_value_t = 8)]
        length: usize,

        /// Evaluate this exported model instead of the stored one
        #[arg(short, long)]
        import: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination (defaults to the user config directory)
        path: Option<PathBuf>,
    },
}

/// Logs evaluation progress about ten times per run
struct ProgressLog;

impl EvaluationObserver for ProgressLog {
    fn on_episode(&mut self, progress: &EvaluationProgress<'_>) {
        let step = (progress.requested / 10).max(1);
        if progress.completed % step == 0 || progress.completed == progress.requested {
            info!(
                "Evaluated {}/{} episodes (last reward {:.3}, running avg {:.3} ± {:.3})",
                progress.completed,
                progress.requested,
                progress.last.total_reward,
                progress.partial.avg_reward,
                progress.partial.std_reward
            );
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let default_path = EngineConfig::default_config_path();
            if default_path.exists() {
                EngineConfig::load(&default_path).with_context(|| {
                    format!("Failed to load configuration from {}", default_path.display())
                })
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode result")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // keep stdout clean when it carries JSON
    fedrl::logging::init_logging(!cli.json);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = &cli.model_dir {
        config.persistence.directory = dir.clone();
    }

    match cli.command {
        Commands::Run {
            clients,
            ticks,
            eval_episodes,
            seed,
            length,
            export,
        } => {
            if let Some(clients) = clients {
                config.num_clients = clients;
            }
            if let Some(episodes) = eval_episodes {
                config.evaluation.episodes = episodes;
            }
            if seed.is_some() {
                config.seed = seed;
            }

            let corridor = Corridor::new(length);
            let metrics = corridor.metrics_engine();
            let store = Arc::new(FileStore::new(&config.persistence.directory));
            let mut engine = FederatedEngine::new(config, corridor, metrics, store)
                .await
                .context("Failed to start the engine")?;

            info!("Training {} clients for {} ticks", engine.config().num_clients, ticks);
            for _ in 0..ticks {
                engine.tick().await.context("Training tick failed")?;
            }

            let status = engine.status();
            info!(
                "Trained {} episodes over {} federation rounds (avg reward {:.3})",
                status.population.total_episodes, status.round, status.population.avg_reward
            );

            engine
                .enter_inference()
                .context("Failed to freeze the population")?;
            if export && !engine.export_model()? {
                tracing::warn!("Model export failed");
            }

            let result = engine
                .run_evaluation(&mut ProgressLog)
                .await
                .context("Evaluation failed")?;

            if cli.json {
                print_json(&engine.status())?;
            } else {
                println!(
                    "avg reward {:.3} ± {:.3} | success {:.1}% | consistency {:.3} | avg steps {:.1}",
                    result.avg_reward,
                    result.std_reward,
                    result.success_rate * 100.0,
                    result.consistency,
                    result.avg_steps
                );
            }
        }

        Commands::Evaluate {
            eval_episodes,
            length,
            import,
        } => {
            if let Some(episodes) = eval_episodes {
                config.evaluation.episodes = episodes;
            }

            let mut store = FileStore::new(&config.persistence.directory);
            let stored = match import {
                Some(path) => {
                    store = store.with_import_path(path);
                    store.import().await.context("Failed to import model")?
                }
                None => match store.load() {
                    Some(stored) => stored,
                    None => bail!(
                        "No stored model in {}; run `fedrl run` first",
                        store.directory().display()
                    ),
                },
            };

            // the working copy on disk stays untouched while evaluating
            let corridor = Corridor::new(length);
            let metrics = corridor.metrics_engine();
            let mut engine =
                FederatedEngine::new(config, corridor, metrics, Arc::new(MemoryStore::new()))
                    .await
                    .context("Failed to start the engine")?;
            engine.enter_inference()?;
            engine
                .install_model(stored)
                .context("Stored model does not fit the corridor task")?;

            let result = engine
                .run_evaluation(&mut ProgressLog)
                .await
                .context("Evaluation failed")?;

            if cli.json {
                print_json(&result)?;
            } else {
                println!(
                    "avg reward {:.3} ± {:.3} | success {:.1}% | consistency {:.3}",
                    result.avg_reward,
                    result.std_reward,
                    result.success_rate * 100.0,
                    result.consistency
                );
            }
        }

        Commands::InitConfig { path } => {
            let path = path.unwrap_or_else(EngineConfig::default_config_path);
            config
                .save(&path)
                .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
    }

    Ok(())
}
