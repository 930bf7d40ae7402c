use crate::backend::BatchJobClient;
use crate::error::{AppError, AppResult};
use std::sync::{Arc, Mutex};

/// Hands out clients in rotation so rate-limited calls spread across every
/// configured credential.
pub struct ClientPool<C: ?Sized> {
    clients: Vec<Arc<C>>,
    cursor: Mutex<usize>,
}

impl<C: ?Sized> ClientPool<C> {
    pub fn new(clients: Vec<Arc<C>>) -> AppResult<Self> {
        if clients.is_empty() {
            return Err(AppError::Config(
                "client pool needs at least one client".to_string(),
            ));
        }
        Ok(Self {
            clients,
            cursor: Mutex::new(0),
        })
    }

    /// Next client in rotation, wrapping after the last slot.
    pub fn next(&self) -> Arc<C> {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let client = self.clients[*cursor].clone();
        *cursor = (*cursor + 1) % self.clients.len();
        client
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<C: BatchJobClient + ?Sized> ClientPool<C> {
    /// Deletes every job each backend still tracks. Best effort: failures are
    /// logged and the remaining jobs are still attempted.
    pub async fn cleanup(&self) -> usize {
        let mut deleted = 0;
        for client in &self.clients {
            let jobs = match client.list_jobs().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    log::warn!("Failed to list jobs on {}: {}", client.name(), e);
                    continue;
                }
            };
            for job in jobs {
                match client.delete_job(&job).await {
                    Ok(()) => deleted += 1,
                    Err(e) => log::warn!("Failed to delete job {} on {}: {}", job, client.name(), e),
                }
            }
        }
        log::info!("Cleanup removed {} jobs across {} clients", deleted, self.clients.len());
        deleted
    }
}
