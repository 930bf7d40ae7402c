use super::status::StatusStore;
use crate::database::{Phase, State, StatusRecord};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The work behind one phase for one episode.
///
/// Actions may be re-run after a crash or a recorded error, so they must be
/// safe to call again for an episode they already (partly) handled.
#[async_trait]
pub trait PhaseAction: Send + Sync {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()>;
}

/// What to do with a phase given the episode's stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Execute,
    /// Target phase already done; move on to the next one.
    AlreadyDone,
    /// The episode is past the target phase.
    Passed,
}

pub fn decide(current: &StatusRecord, target: Phase) -> Decision {
    if current.phase > target {
        Decision::Passed
    } else if current.phase == target && current.state == State::Done {
        Decision::AlreadyDone
    } else {
        // Below target, or same phase left at Unknown, Started or Error
        Decision::Execute
    }
}

/// Result of one guarded phase run. Failures are values here, never errors,
/// so nothing from a single episode escapes into the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Executed,
    AlreadyDone,
    Passed,
    Failed(String),
    Cancelled,
}

impl PhaseOutcome {
    /// Whether the chain may proceed to the next phase.
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Executed | Self::AlreadyDone | Self::Passed)
    }
}

/// Runs phase actions guarded by the status store: skip what is done, record
/// `Started` before and `Done` or `Error` after everything it executes.
#[derive(Clone)]
pub struct PhaseRunner {
    store: Arc<dyn StatusStore>,
}

impl PhaseRunner {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub async fn run_phase(
        &self,
        episode_id: i64,
        phase: Phase,
        action: &dyn PhaseAction,
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let current = match self.store.get_status(episode_id).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to read status before {}: {}", phase, e);
                return PhaseOutcome::Failed(e.to_string());
            }
        };

        match decide(&current, phase) {
            Decision::AlreadyDone => {
                log::debug!("{} already done", phase);
                return PhaseOutcome::AlreadyDone;
            }
            Decision::Passed => {
                log::debug!("{} skipped, episode is at {}", phase, current.phase);
                return PhaseOutcome::Passed;
            }
            Decision::Execute => {}
        }

        if current.phase == phase && current.state != State::Unknown {
            log::info!("Retrying {} (last state {})", phase, current.state);
        } else {
            log::info!("Starting {}", phase);
        }

        if let Err(e) = self
            .store
            .set_status(episode_id, &StatusRecord::started(episode_id, phase))
            .await
        {
            log::error!("Failed to record start of {}: {}", phase, e);
            return PhaseOutcome::Failed(e.to_string());
        }

        match action.run(episode_id, cancel).await {
            Ok(()) => {
                if let Err(e) = self
                    .store
                    .set_status(episode_id, &StatusRecord::done(episode_id, phase))
                    .await
                {
                    log::error!("{} finished but could not be recorded: {}", phase, e);
                    return PhaseOutcome::Failed(e.to_string());
                }
                log::info!("{} done", phase);
                PhaseOutcome::Executed
            }
            Err(AppError::Cancelled) => {
                log::warn!("{} cancelled, leaving it marked as started", phase);
                PhaseOutcome::Cancelled
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("{} failed: {}", phase, message);
                if let Err(store_err) = self
                    .store
                    .set_status(episode_id, &StatusRecord::error(episode_id, phase, &message))
                    .await
                {
                    log::error!("Failed to record error for {}: {}", phase, store_err);
                }
                PhaseOutcome::Failed(message)
            }
        }
    }
}
