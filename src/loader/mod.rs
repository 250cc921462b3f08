//! Generation cache
//!
//! Holds the loaded units of the current generation. A reload publishes a new,
//! empty generation and repopulates it from the repository; holders of the old
//! generation keep using it undisturbed, but can no longer resolve through it.

pub mod watcher;


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::compiler::{load_from_payload, CompileError, ReadyUnit};
use crate::naming::QualifiedName;
use crate::registry::{RecordType, TypeDescriptors};
use crate::repository::{CodeRepository, RepositoryError, VersionToken};

/// Attempts of `resolve_current` when reloads keep racing the lookup
const RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Compiled unit [{0}] was not found")]
    NotFound(QualifiedName),

    #[error("Generation {stale} is obsolete, the current generation is {current}")]
    ObsoleteGeneration { stale: u64, current: u64 },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/* ===================== Generations ===================== */

#[derive(Debug)]
struct Generation {
    id: u64,
    /// Append-only; the first insertion of a name wins
    units: RwLock<HashMap<QualifiedName, ReadyUnit>>,
}

/// Reference to one generation. Two handles are equal when they refer to the same generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle(Arc<Generation>);

impl GenerationHandle {
    fn new(id: u64) -> Self {
        Self(Arc::new(Generation {
            id,
            units: RwLock::new(HashMap::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Unit already loaded into this generation
    pub fn cached(&self, name: &QualifiedName) -> Option<ReadyUnit> {
        read(&self.0.units).get(name).cloned()
    }

    pub fn names(&self) -> Vec<QualifiedName> {
        read(&self.0.units).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.0.units).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, name: &QualifiedName, unit: ReadyUnit) -> ReadyUnit {
        write(&self.0.units)
            .entry(name.clone())
            .or_insert(unit)
            .clone()
    }
}

impl PartialEq for GenerationHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for GenerationHandle {}

/// Called after every reload, with the id of the newly published generation
/// and the repository version read before it was repopulated.
pub trait ReloadListener: Send + Sync {
    fn on_reload(&self, generation: u64, version: Option<&VersionToken>);
}

/* ===================== Cache ===================== */

pub struct GenerationCache {
    repository: Arc<dyn CodeRepository>,
    current: RwLock<GenerationHandle>,
    next_id: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn ReloadListener>>>,
}

impl GenerationCache {
    pub fn new(repository: Arc<dyn CodeRepository>) -> Self {
        Self {
            repository,
            current: RwLock::new(GenerationHandle::new(1)),
            next_id: AtomicU64::new(2),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn repository(&self) -> Arc<dyn CodeRepository> {
        self.repository.clone()
    }

    /// Active generation. Fetch it again after a reload instead of keeping it.
    pub fn current(&self) -> GenerationHandle {
        read(&self.current).clone()
    }

    /// Resolve `name` through `handle`, loading it from the repository on a miss
    pub fn resolve(
        &self,
        handle: &GenerationHandle,
        name: &QualifiedName,
    ) -> Result<ReadyUnit, LoaderError> {
        let current = self.current();
        if *handle != current {
            return Err(LoaderError::ObsoleteGeneration {
                stale: handle.id(),
                current: current.id(),
            });
        }

        if let Some(unit) = handle.cached(name) {
            return Ok(unit);
        }
        self.load_into(handle, name)
    }

    /// Resolve through whatever generation is current, retrying when a reload
    /// replaces it mid-lookup
    pub fn resolve_current(&self, name: &QualifiedName) -> Result<ReadyUnit, LoaderError> {
        let mut attempt = 1;
        loop {
            match self.resolve(&self.current(), name) {
                Err(LoaderError::ObsoleteGeneration { .. }) if attempt < RESOLVE_ATTEMPTS => {
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Publish a new generation and repopulate it with every name the previous one held.
    ///
    /// Names that can no longer be loaded are logged and left out. The version
    /// token is read before the swap, so every load observes at least that version.
    pub fn reload_all(&self) -> GenerationHandle {
        let version = match self.repository.current_version_token() {
            Ok(token) => Some(token),
            Err(e) => {
                error!(error = %e, "Failed to read repository version");
                None
            }
        };
        let next = GenerationHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let previous = std::mem::replace(&mut *write(&self.current), next.clone());

        let names = previous.names();
        let mut restored = 0;
        for name in &names {
            match self.load_into(&next, name) {
                Ok(_) => restored += 1,
                Err(e) => warn!(unit = %name, error = %e, "Dropped unit during reload"),
            }
        }
        info!(
            generation = next.id(),
            previous = previous.id(),
            restored,
            dropped = names.len() - restored,
            "Reloaded compiled units"
        );

        let listeners = read(&self.listeners).clone();
        for listener in listeners {
            listener.on_reload(next.id(), version.as_ref());
        }
        next
    }

    pub fn add_listener(&self, listener: Arc<dyn ReloadListener>) {
        write(&self.listeners).push(listener);
    }

    fn load_into(
        &self,
        generation: &GenerationHandle,
        name: &QualifiedName,
    ) -> Result<ReadyUnit, LoaderError> {
        let payload = self
            .repository
            .load(name)?
            .ok_or_else(|| LoaderError::NotFound(name.clone()))?;
        let unit = load_from_payload(name, &payload)?;

        debug!(unit = %name, generation = generation.id(), "Loaded unit from repository");
        Ok(generation.insert(name, unit))
    }
}

impl TypeDescriptors for GenerationCache {
    fn record_type(&self, name: &QualifiedName) -> Result<Option<RecordType>, RepositoryError> {
        match self.resolve_current(name) {
            Ok(unit) => Ok(unit.record_type().cloned()),
            Err(LoaderError::NotFound(_)) => Ok(None),
            Err(LoaderError::Repository(e)) => Err(e),
            Err(e) => {
                warn!(record_type = %name, error = %e, "Record type is unusable");
                Ok(None)
            }
        }
    }
}

/* ===================== Lock Helpers ===================== */

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
