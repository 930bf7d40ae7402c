use crate::backend::{BatchJobClient, JobHandle, JobReport, JobState};
use crate::error::AppResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Terminal result of waiting on an external job.
#[derive(Debug)]
pub enum PollOutcome {
    Succeeded(JobReport),
    /// The job failed or reported a status we do not recognize.
    Failed(String),
    Cancelled,
}

/// Drives one submitted job to a terminal state with a fixed polling interval.
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
}

impl JobPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Polls `client` until `job` succeeds, fails or `cancel` fires.
    ///
    /// Transport errors while fetching the status are returned as `Err`; a
    /// job the backend reports as failed is an `Ok(PollOutcome::Failed)` so
    /// the caller decides what that means for its phase.
    pub async fn await_completion(
        &self,
        job: &JobHandle,
        client: &dyn BatchJobClient,
        cancel: &CancellationToken,
    ) -> AppResult<PollOutcome> {
        let mut fetches = 0u32;
        loop {
            if cancel.is_cancelled() {
                log::info!("Stopped polling job {} on {}: cancelled", job, client.name());
                return Ok(PollOutcome::Cancelled);
            }

            let report = client.get_job_status(job).await?;
            fetches += 1;
            log::debug!(
                "Job {} on {} is {:?} (poll #{})",
                job,
                client.name(),
                report.state,
                fetches
            );

            match report.state {
                JobState::Succeeded => return Ok(PollOutcome::Succeeded(report)),
                JobState::Failed => {
                    let message = if report.status_message.is_empty() {
                        "job failed".to_string()
                    } else {
                        report.status_message
                    };
                    return Ok(PollOutcome::Failed(message));
                }
                JobState::Unrecognized => {
                    return Ok(PollOutcome::Failed(format!(
                        "job reported an unrecognized status: {:?}",
                        report.status_message
                    )));
                }
                JobState::NotStarted | JobState::Running => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Stopped polling job {} on {}: cancelled", job, client.name());
                    return Ok(PollOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
