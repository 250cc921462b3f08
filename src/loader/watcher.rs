//! Repository change watcher
//!
//! Polls the repository version token and reloads the generation cache when
//! another process has changed the repository. Every reload reports the token
//! it read before repopulating through a [`ReloadListener`]; that token becomes
//! the last-seen one, so a commit landing mid-reload still triggers the next poll.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{GenerationCache, ReloadListener};
use crate::repository::{CodeRepository, VersionToken};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Reloaded,
    /// Version token could not be read; treated as no change
    Unavailable,
}

type LastSeen = Arc<Mutex<Option<VersionToken>>>;

pub struct RepositoryWatcher {
    cache: Arc<GenerationCache>,
    repository: Arc<dyn CodeRepository>,
    last_seen: LastSeen,
    interval: Duration,
}

impl RepositoryWatcher {
    /// Watch `cache`'s repository, starting from its present version
    pub fn new(cache: Arc<GenerationCache>, interval: Duration) -> Self {
        let repository = cache.repository();
        let initial = match repository.current_version_token() {
            Ok(token) => Some(token),
            Err(e) => {
                error!(error = %e, "Failed to read repository version");
                None
            }
        };
        let last_seen: LastSeen = Arc::new(Mutex::new(initial));

        cache.add_listener(Arc::new(VersionSync {
            last_seen: last_seen.clone(),
        }));

        Self {
            cache,
            repository,
            last_seen,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_seen(&self) -> Option<VersionToken> {
        lock(&self.last_seen).clone()
    }

    /// One poll: reload when the version token moved since it was last seen
    pub fn poll_once(&self) -> PollOutcome {
        let token = match self.repository.current_version_token() {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to read repository version");
                return PollOutcome::Unavailable;
            }
        };

        if lock(&self.last_seen).as_ref() == Some(&token) {
            return PollOutcome::Unchanged;
        }

        info!(version = %token, "Repository changed, reloading");
        self.cache.reload_all();
        PollOutcome::Reloaded
    }

    /// Run the poll loop on the tokio runtime until the handle is shut down
    pub fn spawn(self) -> WatcherHandle {
        let cancel_token = CancellationToken::new();
        let stopped = cancel_token.clone();
        let watcher = Arc::new(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watcher.interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stopped.cancelled() => {
                        debug!("Repository watcher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let poller = watcher.clone();
                        match tokio::task::spawn_blocking(move || poller.poll_once()).await {
                            Ok(outcome) => debug!(?outcome, "Polled repository version"),
                            Err(e) => error!(error = %e, "Repository poll task failed"),
                        }
                    }
                }
            }
        });

        WatcherHandle { cancel_token, task }
    }
}

/// Records the version each reload was taken from, whoever started it
struct VersionSync {
    last_seen: LastSeen,
}

impl ReloadListener for VersionSync {
    fn on_reload(&self, generation: u64, version: Option<&VersionToken>) {
        let Some(token) = version else {
            return;
        };
        debug!(generation, version = %token, "Recorded repository version after reload");
        *lock(&self.last_seen) = Some(token.clone());
    }
}

pub struct WatcherHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop polling and wait for the loop to exit
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Repository watcher task failed");
        }
    }
}

fn lock(last_seen: &Mutex<Option<VersionToken>>) -> MutexGuard<'_, Option<VersionToken>> {
    last_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
