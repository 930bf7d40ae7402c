//! Episode pipeline: the workflow engine walking one episode through every
//! phase, the scheduler fanning episodes out, and the phase actions.

pub mod collect;
pub mod enrich;
pub mod poller;
pub mod pool;
pub mod runner;
pub mod speak;
pub mod status;
pub mod summarize;
pub mod transcribe;
pub mod word_count;

#[cfg(test)]
pub(crate) mod fakes;

use crate::backend::{BatchJobClient, EpisodeLister};
use crate::database::Phase;
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use poller::{JobPoller, PollOutcome};
pub use pool::ClientPool;
pub use runner::{PhaseAction, PhaseOutcome, PhaseRunner};
pub use status::{MemoryStatusStore, StatusStore};

/// How one episode's pass through the pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Every phase is done, whether run now or earlier.
    Completed,
    /// A phase failed and was recorded as `Error`; later phases were not tried.
    Failed { phase: Phase, message: String },
    Cancelled,
}

/// The six phase actions in pipeline order.
pub struct PipelineActions {
    pub collect: Arc<dyn PhaseAction>,
    pub transcribe: Arc<dyn PhaseAction>,
    pub enrich: Arc<dyn PhaseAction>,
    pub generate_speech: Arc<dyn PhaseAction>,
    pub summarize: Arc<dyn PhaseAction>,
    pub count_words: Arc<dyn PhaseAction>,
}

impl PipelineActions {
    pub fn into_phases(self) -> Vec<(Phase, Arc<dyn PhaseAction>)> {
        vec![
            (Phase::Collect, self.collect),
            (Phase::Transcribe, self.transcribe),
            (Phase::Enrich, self.enrich),
            (Phase::GenerateSpeech, self.generate_speech),
            (Phase::Summarize, self.summarize),
            (Phase::CountWords, self.count_words),
        ]
    }
}

// ── Workflow engine ────────────────────────────────────────────────────────

/// Runs one episode through an ordered list of phases, stopping at the first
/// failure. Each phase re-checks the stored status, so a finished episode
/// walks the whole list without executing anything.
#[derive(Clone)]
pub struct WorkflowEngine {
    runner: PhaseRunner,
    phases: Arc<Vec<(Phase, Arc<dyn PhaseAction>)>>,
}

impl WorkflowEngine {
    pub fn new(runner: PhaseRunner, phases: Vec<(Phase, Arc<dyn PhaseAction>)>) -> AppResult<Self> {
        if phases.is_empty() {
            return Err(AppError::Config("workflow needs at least one phase".to_string()));
        }
        if phases.iter().any(|(phase, _)| *phase == Phase::Unknown) {
            return Err(AppError::Config("Unknown is not a runnable phase".to_string()));
        }
        if phases.windows(2).any(|pair| pair[0].0 >= pair[1].0) {
            return Err(AppError::Config(
                "workflow phases must be in strictly ascending order".to_string(),
            ));
        }
        Ok(Self {
            runner,
            phases: Arc::new(phases),
        })
    }

    pub async fn process(&self, episode_id: i64, cancel: &CancellationToken) -> ItemOutcome {
        for (phase, action) in self.phases.iter() {
            if cancel.is_cancelled() {
                log::info!("Stopping before {}: cancelled", phase);
                return ItemOutcome::Cancelled;
            }

            let outcome = self
                .runner
                .run_phase(episode_id, *phase, action.as_ref(), cancel)
                .await;
            if outcome.should_continue() {
                continue;
            }

            return match outcome {
                PhaseOutcome::Failed(message) => ItemOutcome::Failed {
                    phase: *phase,
                    message,
                },
                _ => ItemOutcome::Cancelled,
            };
        }
        ItemOutcome::Completed
    }
}

// ── Concurrency scheduler ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Episodes stopped by cancellation, including those never started.
    pub cancelled: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => self.completed += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
            ItemOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Fans the workflow out over a batch with at most `max_parallelism`
/// episodes in flight.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyScheduler {
    max_parallelism: usize,
}

impl ConcurrencyScheduler {
    pub fn new(max_parallelism: usize) -> AppResult<Self> {
        if max_parallelism == 0 {
            return Err(AppError::Config("max_parallelism must be at least 1".to_string()));
        }
        Ok(Self { max_parallelism })
    }

    pub async fn run_all(
        &self,
        engine: &WorkflowEngine,
        episode_ids: Vec<i64>,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let total = episode_ids.len();
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let finished = Arc::new(AtomicUsize::new(0));
        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };

        log::info!(
            "Processing {} episodes, at most {} at a time",
            total,
            self.max_parallelism
        );

        let mut tasks = Vec::with_capacity(total);
        for episode_id in episode_ids {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let engine = engine.clone();
            let cancel = cancel.clone();
            let finished = finished.clone();
            let span = tracing::info_span!("episode", episode_id);
            let task = tokio::spawn(
                async move {
                    let _permit = permit;
                    log::info!("Processing episode {}", episode_id);
                    let outcome = engine.process(episode_id, &cancel).await;
                    let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                    match &outcome {
                        ItemOutcome::Completed => log::info!("Episode {} completed", episode_id),
                        ItemOutcome::Failed { phase, message } => {
                            log::warn!("Episode {} failed in {}: {}", episode_id, phase, message)
                        }
                        ItemOutcome::Cancelled => log::info!("Episode {} cancelled", episode_id),
                    }
                    log::info!("{}/{} episodes finished", done, total);
                    outcome
                }
                .instrument(span),
            );
            tasks.push((episode_id, task));
        }

        let not_started = total - tasks.len();
        if not_started > 0 {
            log::info!("Cancelled before starting {} episodes", not_started);
        }
        summary.cancelled += not_started;

        for (episode_id, task) in tasks {
            match task.await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    log::error!("Episode {} task ended abnormally: {}", episode_id, e);
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "Batch finished: {} completed, {} failed, {} cancelled",
            summary.completed,
            summary.failed,
            summary.cancelled
        );
        summary
    }
}

// ── Worker entry point ─────────────────────────────────────────────────────

/// Which episodes a run should cover.
#[derive(Debug, Clone)]
pub enum WorkSource {
    Episodes(Vec<i64>),
    /// Program id → number of latest episodes to look up.
    Programs(BTreeMap<i64, usize>),
}

pub struct EpisodeWorker {
    engine: WorkflowEngine,
    scheduler: ConcurrencyScheduler,
    lister: Arc<dyn EpisodeLister>,
    speech_pool: Arc<ClientPool<dyn BatchJobClient>>,
}

impl EpisodeWorker {
    pub fn new(
        engine: WorkflowEngine,
        scheduler: ConcurrencyScheduler,
        lister: Arc<dyn EpisodeLister>,
        speech_pool: Arc<ClientPool<dyn BatchJobClient>>,
    ) -> Self {
        Self {
            engine,
            scheduler,
            lister,
            speech_pool,
        }
    }

    pub fn speech_pool(&self) -> &Arc<ClientPool<dyn BatchJobClient>> {
        &self.speech_pool
    }

    /// Runs every selected episode through the pipeline. Per-episode failures
    /// end up in the status store and the summary, never in the `Err` arm.
    pub async fn work(
        &self,
        source: WorkSource,
        clean_before_start: bool,
        cancel: &CancellationToken,
    ) -> AppResult<BatchSummary> {
        if clean_before_start {
            log::info!("Removing leftover transcription jobs before starting");
            self.speech_pool.cleanup().await;
        }

        let episode_ids = match source {
            WorkSource::Episodes(ids) => dedup(ids),
            WorkSource::Programs(programs) => self.discover(&programs).await,
        };

        if episode_ids.is_empty() {
            log::info!("No episodes to process");
            return Ok(BatchSummary::default());
        }

        Ok(self.scheduler.run_all(&self.engine, episode_ids, cancel).await)
    }

    async fn discover(&self, programs: &BTreeMap<i64, usize>) -> Vec<i64> {
        let lookups = programs.iter().map(|(&program_id, &count)| {
            let lister = self.lister.clone();
            async move { (program_id, lister.list_episode_ids(program_id, count).await) }
        });

        let mut ids = Vec::new();
        for (program_id, result) in futures_util::future::join_all(lookups).await {
            match result {
                Ok(found) => {
                    log::info!("Program {}: {} episodes", program_id, found.len());
                    ids.extend(found);
                }
                Err(e) => log::warn!("Failed to list episodes for program {}: {}", program_id, e),
            }
        }
        dedup(ids)
    }
}

/// Drops repeated ids, keeping first occurrences in order.
fn dedup(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{State, StatusRecord};
    use crate::worker::fakes::{ConcurrencyProbe, CountingAction, ScriptedJobClient};
    use async_trait::async_trait;
    use std::time::Duration;

    const TRANSCRIBE: usize = 1;

    fn counting_actions() -> Vec<Arc<CountingAction>> {
        (0..Phase::PIPELINE.len())
            .map(|_| Arc::new(CountingAction::new()))
            .collect()
    }

    fn engine(store: &Arc<MemoryStatusStore>, actions: &[Arc<CountingAction>]) -> WorkflowEngine {
        let phases = Phase::PIPELINE
            .iter()
            .zip(actions)
            .map(|(phase, action)| (*phase, action.clone() as Arc<dyn PhaseAction>))
            .collect();
        WorkflowEngine::new(PhaseRunner::new(store.clone()), phases).unwrap()
    }

    fn calls(actions: &[Arc<CountingAction>]) -> Vec<usize> {
        actions.iter().map(|a| a.calls()).collect()
    }

    fn assert_monotonic(history: &[StatusRecord]) {
        for pair in history.windows(2) {
            assert!(
                pair[0].phase <= pair[1].phase,
                "phase went from {} back to {}",
                pair[0].phase,
                pair[1].phase
            );
        }
    }

    #[test]
    fn test_engine_rejects_unordered_phases() {
        let store = Arc::new(MemoryStatusStore::new());
        let action: Arc<dyn PhaseAction> = Arc::new(CountingAction::new());
        let runner = PhaseRunner::new(store);

        let result = WorkflowEngine::new(
            runner.clone(),
            vec![(Phase::Enrich, action.clone()), (Phase::Collect, action.clone())],
        );
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(WorkflowEngine::new(runner.clone(), Vec::new()).is_err());
        assert!(WorkflowEngine::new(runner, vec![(Phase::Unknown, action)]).is_err());
    }

    #[tokio::test]
    async fn test_fresh_episode_runs_every_phase_once() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();

        let outcome = engine(&store, &actions)
            .process(42, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ItemOutcome::Completed);
        assert_eq!(calls(&actions), vec![1; 6]);
        assert_eq!(store.get_status(42).await.unwrap(), StatusRecord::done(42, Phase::CountWords));

        let history = store.history_for(42);
        assert_eq!(history.len(), 12);
        assert_eq!(history.iter().filter(|r| r.state == State::Started).count(), 6);
        assert_eq!(history.iter().filter(|r| r.state == State::Done).count(), 6);
        assert_eq!(history.iter().filter(|r| r.state == State::Error).count(), 0);
        assert_monotonic(&history);
    }

    #[tokio::test]
    async fn test_failed_phase_stops_the_chain_and_is_retried_next_run() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();
        let transcribe = Arc::new(CountingAction::new().failing("quota exceeded"));
        let mut wired = actions.clone();
        wired[TRANSCRIBE] = transcribe.clone();
        let engine = engine(&store, &wired);
        let cancel = CancellationToken::new();

        let outcome = engine.process(43, &cancel).await;
        assert_eq!(
            outcome,
            ItemOutcome::Failed {
                phase: Phase::Transcribe,
                message: "quota exceeded".to_string()
            }
        );
        assert_eq!(
            store.get_status(43).await.unwrap(),
            StatusRecord::error(43, Phase::Transcribe, "quota exceeded")
        );
        assert_eq!(calls(&wired), vec![1, 1, 0, 0, 0, 0]);
        assert_eq!(store.history_for(43).len(), 4);

        transcribe.recover();
        let outcome = engine.process(43, &cancel).await;

        assert_eq!(outcome, ItemOutcome::Completed);
        assert_eq!(calls(&wired), vec![1, 2, 1, 1, 1, 1]);
        let history = store.history_for(43);
        assert_eq!(history.len(), 4 + 10);
        assert_eq!(history[4], StatusRecord::started(43, Phase::Transcribe));
        assert_eq!(history[5], StatusRecord::done(43, Phase::Transcribe));
        assert_monotonic(&history);
    }

    #[tokio::test]
    async fn test_finished_episode_makes_no_writes() {
        let store = Arc::new(MemoryStatusStore::new());
        store.insert(StatusRecord::done(42, Phase::CountWords));
        let actions = counting_actions();

        let outcome = engine(&store, &actions)
            .process(42, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ItemOutcome::Completed);
        assert_eq!(calls(&actions), vec![0; 6]);
        assert_eq!(store.reads(), 6);
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_done_phase_continues_with_the_next_one() {
        let store = Arc::new(MemoryStatusStore::new());
        store.insert(StatusRecord::done(42, Phase::Enrich));
        let actions = counting_actions();

        engine(&store, &actions)
            .process(42, &CancellationToken::new())
            .await;

        assert_eq!(calls(&actions), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(
            store.history_for(42)[0],
            StatusRecord::started(42, Phase::GenerateSpeech)
        );
    }

    #[tokio::test]
    async fn test_phase_left_started_is_rerun() {
        let store = Arc::new(MemoryStatusStore::new());
        store.insert(StatusRecord::started(42, Phase::Enrich));
        let actions = counting_actions();

        engine(&store, &actions)
            .process(42, &CancellationToken::new())
            .await;

        assert_eq!(calls(&actions), vec![0, 0, 1, 1, 1, 1]);
        assert_eq!(store.history_for(42)[0], StatusRecord::started(42, Phase::Enrich));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine(&store, &actions).process(42, &cancel).await;

        assert_eq!(outcome, ItemOutcome::Cancelled);
        assert_eq!(calls(&actions), vec![0; 6]);
        assert_eq!(store.reads(), 0);
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_phase_stays_started() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut actions = counting_actions();
        actions[TRANSCRIBE] = Arc::new(CountingAction::new().cancelling());

        let outcome = engine(&store, &actions)
            .process(42, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ItemOutcome::Cancelled);
        assert_eq!(
            store.get_status(42).await.unwrap(),
            StatusRecord::started(42, Phase::Transcribe)
        );
        assert_eq!(calls(&actions)[2..], [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_failing_episode_does_not_block_the_batch() {
        let store = Arc::new(MemoryStatusStore::new());
        let mut actions = counting_actions();
        actions[TRANSCRIBE] = Arc::new(CountingAction::new().failing_for(3, "quota exceeded"));
        let engine = engine(&store, &actions);
        let scheduler = ConcurrencyScheduler::new(2).unwrap();

        let summary = scheduler
            .run_all(&engine, vec![1, 2, 3, 4, 5], &CancellationToken::new())
            .await;

        assert_eq!(
            summary,
            BatchSummary {
                total: 5,
                completed: 4,
                failed: 1,
                cancelled: 0
            }
        );
        for id in [1, 2, 4, 5] {
            assert_eq!(store.get_status(id).await.unwrap(), StatusRecord::done(id, Phase::CountWords));
        }
        assert_eq!(store.get_status(3).await.unwrap().state, State::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallelism_is_bounded() {
        let store = Arc::new(MemoryStatusStore::new());
        let probe = Arc::new(ConcurrencyProbe::default());
        let actions: Vec<Arc<CountingAction>> = (0..Phase::PIPELINE.len())
            .map(|_| {
                Arc::new(CountingAction::new().with_delay(Duration::from_millis(10), probe.clone()))
            })
            .collect();
        let engine = engine(&store, &actions);
        let scheduler = ConcurrencyScheduler::new(3).unwrap();

        let summary = scheduler
            .run_all(&engine, (1..=12).collect(), &CancellationToken::new())
            .await;

        assert_eq!(summary.completed, 12);
        assert!(probe.max() <= 3, "saw {} episodes in flight", probe.max());
        assert!(probe.max() >= 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_episodes_from_starting() {
        let store = Arc::new(MemoryStatusStore::new());
        let probe = Arc::new(ConcurrencyProbe::default());
        let actions: Vec<Arc<CountingAction>> = (0..Phase::PIPELINE.len())
            .map(|_| {
                Arc::new(CountingAction::new().with_delay(Duration::from_secs(60), probe.clone()))
            })
            .collect();
        let engine = engine(&store, &actions);
        let scheduler = ConcurrencyScheduler::new(1).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = scheduler.run_all(&engine, vec![1, 2, 3], &cancel).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.cancelled, 3);
        assert_eq!(actions[0].episodes(), vec![1]);
        assert_eq!(store.get_status(1).await.unwrap(), StatusRecord::started(1, Phase::Collect));
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        assert!(matches!(
            ConcurrencyScheduler::new(0),
            Err(AppError::Config(_))
        ));
    }

    struct FixedLister;

    #[async_trait]
    impl EpisodeLister for FixedLister {
        async fn list_episode_ids(&self, program_id: i64, count: usize) -> AppResult<Vec<i64>> {
            match program_id {
                4540 => Ok(vec![100, 101, 102].into_iter().take(count).collect()),
                2054 => Ok(vec![101, 200]),
                _ => Err(AppError::Backend("program not found".to_string())),
            }
        }
    }

    fn worker(
        store: &Arc<MemoryStatusStore>,
        actions: &[Arc<CountingAction>],
        jobs: Arc<ScriptedJobClient>,
    ) -> EpisodeWorker {
        let clients: Vec<Arc<dyn BatchJobClient>> = vec![jobs];
        EpisodeWorker::new(
            engine(store, actions),
            ConcurrencyScheduler::new(4).unwrap(),
            Arc::new(FixedLister),
            Arc::new(ClientPool::new(clients).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_work_discovers_programs_and_cleans_first() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();
        let jobs = Arc::new(ScriptedJobClient::new("speech-0", Vec::new()));
        jobs.track_jobs(&["stale-1", "stale-2"]);
        let worker = worker(&store, &actions, jobs.clone());

        let programs = BTreeMap::from([(4540, 2), (2054, 5), (9999, 1)]);
        let summary = worker
            .work(WorkSource::Programs(programs), true, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(jobs.deleted(), vec!["stale-1", "stale-2"]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 3);
        let mut seen = actions[0].episodes();
        seen.sort();
        assert_eq!(seen, vec![100, 101, 200]);
    }

    #[tokio::test]
    async fn test_work_on_explicit_ids_skips_cleanup_and_duplicates() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();
        let jobs = Arc::new(ScriptedJobClient::new("speech-0", Vec::new()));
        jobs.track_jobs(&["running"]);
        let worker = worker(&store, &actions, jobs.clone());

        let summary = worker
            .work(WorkSource::Episodes(vec![7, 8, 7]), false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(jobs.deleted().is_empty());
        assert_eq!(summary.total, 2);
        assert_eq!(actions[0].calls(), 2);
    }

    #[tokio::test]
    async fn test_work_with_nothing_to_do() {
        let store = Arc::new(MemoryStatusStore::new());
        let actions = counting_actions();
        let jobs = Arc::new(ScriptedJobClient::new("speech-0", Vec::new()));
        let worker = worker(&store, &actions, jobs);

        let summary = worker
            .work(WorkSource::Episodes(Vec::new()), false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, BatchSummary::default());
    }
}
