use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use radio_text_lib::config::Config;
use radio_text_lib::database::{Database, Phase, State};
use radio_text_lib::worker::WorkSource;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "radio-text", version, about = "Transcribe and enrich radio episodes")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "RADIOTEXT_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run episodes through every phase
    Work {
        /// Episode ids, comma-separated. Default: latest episodes of the configured programs.
        #[arg(long, value_delimiter = ',')]
        episodes: Vec<i64>,

        /// Delete leftover transcription jobs before starting
        #[arg(long)]
        clean: bool,

        /// Repeat the run every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// List stored episode status records
    Status {
        #[arg(long)]
        phase: Option<Phase>,

        #[arg(long)]
        state: Option<State>,
    },
    /// Forget an episode's status so it is processed from scratch
    Reset { episode_id: i64 },
    /// Delete every transcription job the speech backends still track
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    radio_text_lib::init_logging();
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    let db = Arc::new(
        Database::new(&config.database_path)
            .with_context(|| format!("Failed to open database {:?}", config.database_path))?,
    );

    match cli.command {
        Command::Work {
            episodes,
            clean,
            watch,
        } => run_work(&config, db, episodes, clean, watch).await,
        Command::Status { phase, state } => {
            let records = db.list_episode_statuses(phase, state)?;
            for record in &records {
                if record.info.is_empty() {
                    println!("{}\t{}\t{}", record.episode_id, record.phase, record.state);
                } else {
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.episode_id, record.phase, record.state, record.info
                    );
                }
            }
            log::info!("{} records", records.len());
            Ok(())
        }
        Command::Reset { episode_id } => {
            db.delete_episode_status(episode_id)?;
            log::info!("Episode {} will be processed from scratch on the next run", episode_id);
            Ok(())
        }
        Command::Cleanup => {
            let pool = radio_text_lib::build_speech_pool(&config)?;
            let deleted = pool.cleanup().await;
            println!("Deleted {} jobs", deleted);
            Ok(())
        }
    }
}

async fn run_work(
    config: &Config,
    db: Arc<Database>,
    episodes: Vec<i64>,
    clean: bool,
    watch: Option<u64>,
) -> Result<()> {
    let worker = radio_text_lib::build_worker(config, db)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing in-flight work");
            ctrl_c.cancel();
        }
    });

    loop {
        let source = if episodes.is_empty() {
            WorkSource::Programs(config.programs.clone())
        } else {
            WorkSource::Episodes(episodes.clone())
        };

        let summary = worker.work(source, clean, &cancel).await?;
        println!("{}", serde_json::to_string(&summary)?);

        let Some(interval) = watch else { break };
        if cancel.is_cancelled() {
            break;
        }
        log::info!("Next run in {}s", interval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
        }
    }

    Ok(())
}
