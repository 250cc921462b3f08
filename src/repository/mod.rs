//! Code repository: where compiled units and their sources are stored
//!
//! Backing stores implement [`CodeRepository`]. Calls are blocking; async
//! callers move them onto `spawn_blocking`.

mod memory;

pub use memory::MemoryRepository;

use std::fmt;
use thiserror::Error;

use crate::naming::{NamePrefix, QualifiedName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("Compiled unit [{0}] already exists in the repository")]
    AlreadyExists(QualifiedName),

    #[error("Repository access failed: {0}")]
    Access(String),

    #[error("No transaction is in progress")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,
}

/// Opaque marker of the repository state, compared by inequality only
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionToken(pub String);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait CodeRepository: Send + Sync {
    /// Stored payload, `None` when nothing is stored under `name`
    fn load(&self, name: &QualifiedName) -> Result<Option<Vec<u8>>, RepositoryError>;

    /// Store a new unit. Saving a name that already exists is rejected.
    fn save(
        &self,
        name: &QualifiedName,
        payload: &[u8],
        source_text: Option<&str>,
    ) -> Result<(), RepositoryError>;

    /// Delete every unit under `prefix`, returning how many were removed
    fn delete_by_prefix(&self, prefix: &NamePrefix) -> Result<usize, RepositoryError>;

    fn load_source_text(&self, name: &QualifiedName) -> Result<Option<String>, RepositoryError>;

    fn current_version_token(&self) -> Result<VersionToken, RepositoryError>;

    fn begin(&self) -> Result<(), RepositoryError>;

    fn commit(&self) -> Result<(), RepositoryError>;

    fn rollback(&self) -> Result<(), RepositoryError>;
}
