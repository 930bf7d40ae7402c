pub mod backend;
pub mod config;
pub mod database;
pub mod error;
pub mod worker;

use backend::{
    BatchJobClient, SpeechBatchClient, SpeechSynthesizer, SverigesRadioClient, SynthesisClient,
    TextAnalyticsClient, TranslatorClient,
};
use config::Config;
use database::Database;
use error::AppResult;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worker::collect::CollectAction;
use worker::enrich::EnrichAction;
use worker::speak::SpeakAction;
use worker::summarize::SummarizeAction;
use worker::transcribe::TranscribeAction;
use worker::word_count::WordCountAction;
use worker::{
    ClientPool, ConcurrencyScheduler, EpisodeWorker, JobPoller, PhaseRunner, PipelineActions,
    WorkflowEngine,
};

/// Installs the fmt subscriber (`RUST_LOG`, default `info`). `log` records
/// from the library are forwarded into it.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// One batch transcription client per configured speech resource.
pub fn build_speech_pool(config: &Config) -> AppResult<Arc<ClientPool<dyn BatchJobClient>>> {
    let clients = config
        .speech
        .iter()
        .enumerate()
        .map(|(slot, c)| {
            let client = SpeechBatchClient::new(c, format!("speech-{}", slot))?;
            Ok(Arc::new(client) as Arc<dyn BatchJobClient>)
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Arc::new(ClientPool::new(clients)?))
}

fn build_synthesis_pool(config: &Config) -> AppResult<Arc<ClientPool<dyn SpeechSynthesizer>>> {
    let clients = config
        .speech
        .iter()
        .map(|c| Ok(Arc::new(SynthesisClient::new(c)?) as Arc<dyn SpeechSynthesizer>))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Arc::new(ClientPool::new(clients)?))
}

/// Wires the configured backends, the phase actions and the scheduler
/// together. Fails on invalid configuration before any work starts.
pub fn build_worker(config: &Config, db: Arc<Database>) -> AppResult<EpisodeWorker> {
    config.validate()?;

    let speech_pool = build_speech_pool(config)?;
    let synthesis_pool = build_synthesis_pool(config)?;
    let sverigesradio = Arc::new(SverigesRadioClient::new(&config.sverigesradio_base_url)?);
    let translator = Arc::new(TranslatorClient::new(&config.translator)?);
    let analyzer = Arc::new(TextAnalyticsClient::new(&config.text_analytics)?);

    let actions = PipelineActions {
        collect: Arc::new(CollectAction::new(db.clone(), sverigesradio.clone(), config)?),
        transcribe: Arc::new(TranscribeAction::new(
            db.clone(),
            speech_pool.clone(),
            JobPoller::new(config.poll_interval()),
        )),
        enrich: Arc::new(EnrichAction::new(db.clone(), translator, analyzer)),
        generate_speech: Arc::new(SpeakAction::new(
            db.clone(),
            synthesis_pool,
            config.media_path.clone(),
        )),
        summarize: Arc::new(SummarizeAction::new(db.clone())),
        count_words: Arc::new(WordCountAction::new(db.clone(), config.word_groups.clone())),
    };

    let engine = WorkflowEngine::new(PhaseRunner::new(db), actions.into_phases())?;
    let scheduler = ConcurrencyScheduler::new(config.max_parallelism)?;

    log::info!(
        "Worker ready: {} speech clients, parallelism {}, polling every {}s",
        speech_pool.len(),
        config.max_parallelism,
        config.poll_interval_secs
    );
    Ok(EpisodeWorker::new(engine, scheduler, sverigesradio, speech_pool))
}
