//! Initialization
//!
//! Builds an [`Application`] from configuration and optional start-up
//! sources. Record types are registered before scripts so scripts can use them.
//!
//! # Example
//!
//! ```rust,ignore
//! use bfa_core::init::InitBuilder;
//!
//! let app = InitBuilder::new()
//!     .config_path("bfa.toml")
//!     .record_type("Person", "String Name; Integer Age")
//!     .script("Greet", r#"DeclareLocalVar("P", "Person");"#)
//!     .init()
//!     .await?;
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::application::Application;
use crate::config::Config;
use crate::manager::ScriptManager;
use crate::repository::{CodeRepository, MemoryRepository};

/// Named source registered at start-up
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub source: String,
}

#[derive(Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Overrides `watcher.poll_interval_secs`
    pub poll_interval_secs: Option<u64>,

    /// Overrides `watcher.enabled`
    pub watcher_enabled: Option<bool>,

    /// Backing store; an empty in-memory repository when unset
    pub repository: Option<Arc<dyn CodeRepository>>,

    /// Field specs by record type name
    pub record_types: Vec<SourceFile>,

    /// Script bodies by script name
    pub scripts: Vec<SourceFile>,
}

pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.options.poll_interval_secs = Some(secs);
        self
    }

    pub fn watcher_enabled(mut self, enabled: bool) -> Self {
        self.options.watcher_enabled = Some(enabled);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn CodeRepository>) -> Self {
        self.options.repository = Some(repository);
        self
    }

    pub fn record_type(mut self, name: impl Into<String>, field_spec: impl Into<String>) -> Self {
        self.options.record_types.push(SourceFile {
            name: name.into(),
            source: field_spec.into(),
        });
        self
    }

    pub fn script(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.options.scripts.push(SourceFile {
            name: name.into(),
            source: body.into(),
        });
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration, wire the components, register start-up sources and
/// start the repository watcher when enabled.
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .config_path(options.config_path)
        .poll_interval_secs(options.poll_interval_secs)
        .watcher_enabled(options.watcher_enabled)
        .build()?;

    let repository = options
        .repository
        .unwrap_or_else(|| Arc::new(MemoryRepository::new()));
    let mut app = Application::new(config, repository);

    register(&app.manager, &options.record_types, &options.scripts)?;
    app.start_watcher();

    info!(
        generation = app.generations.current().id(),
        watcher = app.watcher_running(),
        "Initialized"
    );
    Ok(app)
}

/// Create each source, or update it when the repository already holds one
fn register(
    manager: &ScriptManager,
    record_types: &[SourceFile],
    scripts: &[SourceFile],
) -> Result<()> {
    for record_type in record_types {
        let existing = manager.record_type_source(&record_type.name)?;
        if existing.as_deref() == Some(record_type.source.as_str()) {
            continue;
        }
        let registered = match existing {
            Some(_) => manager.update_record_type(&record_type.name, &record_type.source),
            None => manager.create_record_type(&record_type.name, &record_type.source),
        };
        registered
            .with_context(|| format!("Failed to register record type [{}]", record_type.name))?;
    }

    for script in scripts {
        let existing = manager.script_source(&script.name)?;
        if existing.as_deref() == Some(script.source.as_str()) {
            continue;
        }
        let registered = match existing {
            Some(_) => manager.update_script(&script.name, &script.source),
            None => manager.create_script(&script.name, &script.source),
        };
        registered.with_context(|| format!("Failed to register script [{}]", script.name))?;
    }
    Ok(())
}
