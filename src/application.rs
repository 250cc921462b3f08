//! The assembled runtime: repository, generation cache, engine and manager
//! wired together from one [`Config`].

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::RuntimeEngine;
use crate::loader::watcher::{RepositoryWatcher, WatcherHandle};
use crate::loader::GenerationCache;
use crate::manager::ScriptManager;
use crate::repository::CodeRepository;

pub struct Application {
    pub config: Config,
    pub repository: Arc<dyn CodeRepository>,
    pub generations: Arc<GenerationCache>,
    pub engine: Arc<RuntimeEngine>,
    pub manager: Arc<ScriptManager>,
    watcher: Option<WatcherHandle>,
}

impl Application {
    /// Wire the components together. Does not start the watcher.
    pub fn new(config: Config, repository: Arc<dyn CodeRepository>) -> Self {
        let generations = Arc::new(GenerationCache::new(repository.clone()));
        let engine = Arc::new(
            RuntimeEngine::new(generations.clone()).with_runtime_debug(config.logging.runtime_debug),
        );
        let manager = Arc::new(ScriptManager::new(generations.clone(), engine.clone()));

        Self {
            config,
            repository,
            generations,
            engine,
            manager,
            watcher: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn watcher_running(&self) -> bool {
        self.watcher.as_ref().is_some_and(WatcherHandle::is_running)
    }

    /// Start polling the repository when enabled and a tokio runtime is available
    pub fn start_watcher(&mut self) -> bool {
        if self.watcher.is_some() {
            return true;
        }
        if !self.config.watcher.enabled {
            debug!("Repository watcher disabled");
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No tokio runtime, repository watcher not started");
            return false;
        }

        let watcher = RepositoryWatcher::new(
            self.generations.clone(),
            self.config.watcher.poll_interval(),
        );
        self.watcher = Some(watcher.spawn());
        info!(
            interval_secs = self.config.watcher.poll_interval_secs,
            "Repository watcher started"
        );
        true
    }

    /// Stop the watcher, if any
    pub async fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.shutdown().await;
        }
    }
}
