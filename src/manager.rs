//! Script and record type management
//!
//! Compiles sources and stores the resulting units in one repository
//! transaction per operation. A failing step rolls the transaction back.
//! Every successful change reloads the generation cache locally.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::compiler::{CompiledUnit, Compiler, InputManifest};
use crate::engine::{ExecutionError, RuntimeEngine};
use crate::loader::GenerationCache;
use crate::naming::QualifiedName;
use crate::repository::{CodeRepository, RepositoryError};

type Cause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Name [{0}] is invalid")]
    InvalidName(String),

    #[error("Failed to create the script [{name}]")]
    CreateScript {
        name: String,
        #[source]
        source: Cause,
    },

    #[error("Failed to update the script [{name}]")]
    UpdateScript {
        name: String,
        #[source]
        source: Cause,
    },

    #[error("The script [{0}] does not exist in the repository")]
    ScriptNotFound(String),

    #[error("Failed to create the record type [{name}]")]
    CreateRecordType {
        name: String,
        #[source]
        source: Cause,
    },

    #[error("Failed to update the record type [{name}]")]
    UpdateRecordType {
        name: String,
        #[source]
        source: Cause,
    },

    #[error("The record type [{0}] does not exist in the repository")]
    RecordTypeNotFound(String),

    #[error("Failed to read [{name}] from the repository")]
    Read {
        name: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to resolve [{name}]")]
    Resolve {
        name: String,
        #[source]
        source: ExecutionError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ScriptManager {
    repository: Arc<dyn CodeRepository>,
    generations: Arc<GenerationCache>,
    engine: Arc<RuntimeEngine>,
}

impl ScriptManager {
    pub fn new(generations: Arc<GenerationCache>, engine: Arc<RuntimeEngine>) -> Self {
        Self {
            repository: generations.repository(),
            generations,
            engine,
        }
    }

    /* ===================== Scripts ===================== */

    /// Compile and store a new script, returning its input parameters
    pub fn create_script(&self, name: &str, body: &str) -> Result<InputManifest, ManagementError> {
        let qualified = checked(name, QualifiedName::script)?;
        let failed = |source: Cause| ManagementError::CreateScript {
            name: name.to_string(),
            source,
        };

        let compilation = Compiler::new(self.engine.as_ref())
            .compile_script(&qualified, body)
            .map_err(|e| failed(Box::new(e)))?;

        self.in_transaction(|repository| save_all(repository, compilation.units()))
            .map_err(|e| failed(Box::new(e)))?;

        info!(
            script = name,
            units = compilation.expressions.len() + 1,
            "Created script"
        );
        self.generations.reload_all();
        Ok(compilation.input_parameters)
    }

    /// Replace a stored script and every expression unit it owns
    pub fn update_script(&self, name: &str, body: &str) -> Result<InputManifest, ManagementError> {
        let qualified = checked(name, QualifiedName::script)?;
        let failed = |source: Cause| ManagementError::UpdateScript {
            name: name.to_string(),
            source,
        };

        let compilation = Compiler::new(self.engine.as_ref())
            .compile_script(&qualified, body)
            .map_err(|e| failed(Box::new(e)))?;

        self.in_transaction(|repository| {
            if repository.delete_by_prefix(&qualified.prefix())? == 0 {
                return Err(ManagementError::ScriptNotFound(name.to_string()));
            }
            save_all(repository, compilation.units())
        })
        .map_err(|e| match e {
            ManagementError::ScriptNotFound(_) => e,
            other => failed(Box::new(other)),
        })?;

        info!(script = name, "Updated script");
        self.generations.reload_all();
        Ok(compilation.input_parameters)
    }

    /// Remove a script and its expression units
    pub fn delete_script(&self, name: &str) -> Result<usize, ManagementError> {
        let qualified = checked(name, QualifiedName::script)?;
        let deleted = self.in_transaction(|repository| {
            match repository.delete_by_prefix(&qualified.prefix())? {
                0 => Err(ManagementError::ScriptNotFound(name.to_string())),
                deleted => Ok(deleted),
            }
        })?;

        info!(script = name, deleted, "Deleted script");
        self.generations.reload_all();
        Ok(deleted)
    }

    pub fn script_source(&self, name: &str) -> Result<Option<String>, ManagementError> {
        self.source_text(&QualifiedName::script(name), name)
    }

    /// Input parameters of a stored script, in declaration order
    pub fn script_parameters(&self, name: &str) -> Result<InputManifest, ManagementError> {
        let qualified = QualifiedName::script(name);
        let resolve_failed = |source| ManagementError::Resolve {
            name: name.to_string(),
            source,
        };

        let unit = self
            .engine
            .get_executable(&qualified, None)
            .map_err(resolve_failed)?;
        match unit.script() {
            Some(program) => Ok(program.inputs.clone()),
            None => Err(ManagementError::ScriptNotFound(name.to_string())),
        }
    }

    /* ===================== Record Types ===================== */

    pub fn create_record_type(&self, name: &str, field_spec: &str) -> Result<(), ManagementError> {
        let qualified = checked(name, QualifiedName::record)?;
        let failed = |source: Cause| ManagementError::CreateRecordType {
            name: name.to_string(),
            source,
        };

        let unit = Compiler::new(self.engine.as_ref())
            .compile_record_type(&qualified, field_spec)
            .map_err(|e| failed(Box::new(e)))?;

        self.in_transaction(|repository| save_all(repository, std::iter::once(&unit)))
            .map_err(|e| failed(Box::new(e)))?;

        info!(record_type = name, "Created record type");
        self.generations.reload_all();
        Ok(())
    }

    pub fn update_record_type(&self, name: &str, field_spec: &str) -> Result<(), ManagementError> {
        let qualified = checked(name, QualifiedName::record)?;
        let failed = |source: Cause| ManagementError::UpdateRecordType {
            name: name.to_string(),
            source,
        };

        let unit = Compiler::new(self.engine.as_ref())
            .compile_record_type(&qualified, field_spec)
            .map_err(|e| failed(Box::new(e)))?;

        self.in_transaction(|repository| {
            if repository.delete_by_prefix(&qualified.prefix())? == 0 {
                return Err(ManagementError::RecordTypeNotFound(name.to_string()));
            }
            save_all(repository, std::iter::once(&unit))
        })
        .map_err(|e| match e {
            ManagementError::RecordTypeNotFound(_) => e,
            other => failed(Box::new(other)),
        })?;

        info!(record_type = name, "Updated record type");
        self.generations.reload_all();
        Ok(())
    }

    pub fn record_type_source(&self, name: &str) -> Result<Option<String>, ManagementError> {
        self.source_text(&QualifiedName::record(name), name)
    }

    /* ===================== Helpers ===================== */

    fn source_text(
        &self,
        qualified: &QualifiedName,
        name: &str,
    ) -> Result<Option<String>, ManagementError> {
        self.repository
            .load_source_text(qualified)
            .map_err(|source| ManagementError::Read {
                name: name.to_string(),
                source,
            })
    }

    /// Run `work` inside a repository transaction, rolling back on any failure
    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&dyn CodeRepository) -> Result<T, ManagementError>,
    ) -> Result<T, ManagementError> {
        let repository = self.repository.as_ref();
        repository.begin()?;

        let result = work(repository).and_then(|value| {
            repository.commit()?;
            Ok(value)
        });

        if result.is_err() {
            if let Err(e) = repository.rollback() {
                // Nothing left to undo when commit already closed the transaction
                if e != RepositoryError::NoTransaction {
                    error!(error = %e, "Failed to roll back transaction");
                }
            }
        }
        result
    }
}

/// Qualified name for `name`, rejecting blank names and empty group levels
fn checked(name: &str, qualify: fn(&str) -> QualifiedName) -> Result<QualifiedName, ManagementError> {
    let qualified = qualify(name);
    if qualified.is_well_formed() {
        Ok(qualified)
    } else {
        Err(ManagementError::InvalidName(name.to_string()))
    }
}

fn save_all<'a>(
    repository: &dyn CodeRepository,
    units: impl Iterator<Item = &'a CompiledUnit>,
) -> Result<(), ManagementError> {
    for unit in units {
        repository.save(&unit.qualified_name, &unit.payload, unit.source_text.as_deref())?;
    }
    Ok(())
}
