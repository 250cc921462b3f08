//! Runtime engine
//!
//! Resolves executable units and runs scripts. Resolution goes through:
//!
//! 1. the process-local fast cache,
//! 2. the generation cache, when a repository is configured,
//! 3. an on-the-fly compile of the caller's fallback source.
//!
//! Compiles are serialized per qualified name: concurrent callers for the same
//! missing unit wait on that name's lock and find the first caller's result
//! in the fast cache.

pub mod eval;
mod exec;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::compiler::{load_from_payload, CompileError, Compiler, ExprRef, ReadyUnit};
use crate::loader::{read, write, GenerationCache, LoaderError, ReloadListener};
use crate::naming::{QualifiedName, UnitKind};
use crate::registry::{RecordType, TypeDescriptors};
use crate::repository::{RepositoryError, VersionToken};
use crate::types::Value;
use crate::variables::{VariableTable, VariableTableError};

pub use eval::EvalError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Compiled unit [{0}] was not found and no source was given to compile it")]
    NotFound(QualifiedName),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Variables(#[from] VariableTableError),

    #[error("Evaluation of expression [{expression}] failed: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: EvalError,
    },

    #[error("Compiled unit [{name}] is a {found}, expected a {expected}")]
    WrongKind {
        name: QualifiedName,
        expected: UnitKind,
        found: UnitKind,
    },
}

/// Source to compile when a unit is neither cached nor stored
#[derive(Clone, Copy)]
pub enum Fallback<'a> {
    Expression {
        text: &'a str,
        variables: &'a VariableTable,
    },
    Script {
        body: &'a str,
    },
    RecordType {
        field_spec: &'a str,
    },
}

/* ===================== Script Runs ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Outcome of one script execution
#[derive(Debug, Clone, Serialize)]
pub struct ScriptRun {
    pub id: Uuid,
    pub script: String,
    pub status: RunStatus,
    /// Error message followed by its causes
    pub error: Option<String>,
    pub locals: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScriptRun {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/* ===================== Engine ===================== */

type FastCache = Arc<RwLock<HashMap<QualifiedName, ReadyUnit>>>;

pub struct RuntimeEngine {
    generations: Option<Arc<GenerationCache>>,
    fast_cache: FastCache,
    compile_locks: Mutex<HashMap<QualifiedName, Arc<Mutex<()>>>>,
    compilations: AtomicU64,
    runtime_debug: bool,
}

impl RuntimeEngine {
    /// Engine without a repository: every unit is compiled on first use
    pub fn standalone() -> Self {
        Self::build(None)
    }

    /// Engine resolving stored units through `generations`.
    ///
    /// The fast cache is cleared on every reload of the generation cache.
    pub fn new(generations: Arc<GenerationCache>) -> Self {
        let engine = Self::build(Some(generations.clone()));
        generations.add_listener(Arc::new(FastCacheReset(engine.fast_cache.clone())));
        engine
    }

    fn build(generations: Option<Arc<GenerationCache>>) -> Self {
        Self {
            generations,
            fast_cache: Arc::new(RwLock::new(HashMap::new())),
            compile_locks: Mutex::new(HashMap::new()),
            compilations: AtomicU64::new(0),
            runtime_debug: false,
        }
    }

    /// Log every assignment and condition outcome at debug level
    pub fn with_runtime_debug(mut self, enabled: bool) -> Self {
        self.runtime_debug = enabled;
        self
    }

    pub fn runtime_debug(&self) -> bool {
        self.runtime_debug
    }

    pub fn generations(&self) -> Option<&Arc<GenerationCache>> {
        self.generations.as_ref()
    }

    /// Number of on-the-fly compiles so far
    pub fn compile_count(&self) -> u64 {
        self.compilations.load(Ordering::SeqCst)
    }

    /// Resolve a ready-to-run unit, compiling `fallback` when nothing is cached or stored
    pub fn get_executable(
        &self,
        name: &QualifiedName,
        fallback: Option<Fallback<'_>>,
    ) -> Result<ReadyUnit, ExecutionError> {
        if let Some(unit) = self.fast_cached(name) {
            return Ok(unit);
        }

        if let Some(generations) = &self.generations {
            match generations.resolve_current(name) {
                Ok(unit) => return Ok(unit),
                Err(LoaderError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let Some(fallback) = fallback else {
            return Err(ExecutionError::NotFound(name.clone()));
        };

        let name_lock = self.compile_lock(name);
        let result = {
            let _guard = name_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Another caller may have compiled it while we waited
            match self.fast_cached(name) {
                Some(unit) => Ok(unit),
                None => self.compile(name, fallback),
            }
        };
        self.release_compile_lock(name, name_lock);
        result
    }

    /// Evaluate one expression unit against `variables`
    pub fn evaluate(&self, expr: &ExprRef, variables: &VariableTable) -> Result<Value, ExecutionError> {
        let unit = self.get_executable(
            &expr.name,
            Some(Fallback::Expression {
                text: &expr.source,
                variables,
            }),
        )?;
        let Some(target) = unit.expression() else {
            return Err(wrong_kind(&unit, UnitKind::Expression));
        };

        eval::evaluate(target, variables).map_err(|source| ExecutionError::Evaluation {
            expression: expr.source.clone(),
            source,
        })
    }

    /// Compile a record type into the fast cache unless it is already known
    pub fn define_record_type(
        &self,
        name: &QualifiedName,
        field_spec: &str,
    ) -> Result<ReadyUnit, ExecutionError> {
        self.get_executable(name, Some(Fallback::RecordType { field_spec }))
    }

    /// Run a stored or cached script
    pub fn run_script(&self, name: &QualifiedName, inputs: Vec<Value>) -> ScriptRun {
        self.run(name, None, inputs)
    }

    /// Run a script, compiling `body` when the script is neither cached nor stored
    pub fn run_script_source(&self, name: &QualifiedName, body: &str, inputs: Vec<Value>) -> ScriptRun {
        self.run(name, Some(Fallback::Script { body }), inputs)
    }

    fn run(&self, name: &QualifiedName, fallback: Option<Fallback<'_>>, inputs: Vec<Value>) -> ScriptRun {
        let id = Uuid::new_v4();
        let span = info_span!("script_run", run_id = %id, script = %name);
        let _enter = span.enter();

        let started_at = Utc::now();
        let result = self.execute(name, fallback, inputs);
        let finished_at = Utc::now();

        let (status, error, locals) = match result {
            Ok(table) => {
                info!("Script completed");
                (RunStatus::Completed, None, table.locals())
            }
            Err(e) => {
                let chain = error_chain(&e);
                error!(error = %chain, "Script failed");
                (RunStatus::Failed, Some(chain), BTreeMap::new())
            }
        };

        ScriptRun {
            id,
            script: name.human_name(),
            status,
            error,
            locals,
            started_at,
            finished_at,
        }
    }

    fn execute(
        &self,
        name: &QualifiedName,
        fallback: Option<Fallback<'_>>,
        inputs: Vec<Value>,
    ) -> Result<VariableTable, ExecutionError> {
        let unit = self.get_executable(name, fallback)?;
        let Some(program) = unit.script() else {
            return Err(wrong_kind(&unit, UnitKind::Script));
        };

        let mut runner = exec::ScriptRunner::new(self, inputs);
        runner.run(&program.statements)?;
        Ok(runner.into_table())
    }

    fn compile(&self, name: &QualifiedName, fallback: Fallback<'_>) -> Result<ReadyUnit, ExecutionError> {
        let compiler = Compiler::new(self);

        let unit = match fallback {
            Fallback::Expression { text, variables } => {
                let compiled = compiler.compile_expression_source(name, text, variables)?;
                load_from_payload(name, &compiled.payload)?
            }
            Fallback::Script { body } => {
                let compiled = compiler.compile_script(name, body)?;
                for expression in &compiled.expressions {
                    let unit = load_from_payload(&expression.qualified_name, &expression.payload)?;
                    write(&self.fast_cache)
                        .entry(expression.qualified_name.clone())
                        .or_insert(unit);
                }
                load_from_payload(name, &compiled.unit.payload)?
            }
            Fallback::RecordType { field_spec } => {
                let compiled = compiler.compile_record_type(name, field_spec)?;
                load_from_payload(name, &compiled.payload)?
            }
        };

        self.compilations.fetch_add(1, Ordering::SeqCst);
        debug!(unit = %name, kind = %unit.body().kind(), "Compiled unit on the fly");

        Ok(write(&self.fast_cache)
            .entry(name.clone())
            .or_insert(unit)
            .clone())
    }

    fn fast_cached(&self, name: &QualifiedName) -> Option<ReadyUnit> {
        let unit = read(&self.fast_cache).get(name).cloned();
        if unit.is_some() {
            debug!(unit = %name, "Fast cache hit");
        }
        unit
    }

    fn compile_lock(&self, name: &QualifiedName) -> Arc<Mutex<()>> {
        lock(&self.compile_locks)
            .entry(name.clone())
            .or_default()
            .clone()
    }

    /// Drop the name's lock once no other caller holds or waits on it
    fn release_compile_lock(&self, name: &QualifiedName, name_lock: Arc<Mutex<()>>) {
        let mut locks = lock(&self.compile_locks);
        // One reference in the map, one here
        if Arc::strong_count(&name_lock) == 2 {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn compile_lock_count(&self) -> usize {
        lock(&self.compile_locks).len()
    }
}

impl TypeDescriptors for RuntimeEngine {
    fn record_type(&self, name: &QualifiedName) -> Result<Option<RecordType>, RepositoryError> {
        if let Some(unit) = self.fast_cached(name) {
            return Ok(unit.record_type().cloned());
        }
        match &self.generations {
            Some(generations) => generations.record_type(name),
            None => Ok(None),
        }
    }
}

/// Empties the fast cache whenever a new generation is published
struct FastCacheReset(FastCache);

impl ReloadListener for FastCacheReset {
    fn on_reload(&self, generation: u64, _version: Option<&VersionToken>) {
        let cleared = {
            let mut units = write(&self.0);
            let cleared = units.len();
            units.clear();
            cleared
        };
        debug!(generation, cleared, "Cleared fast cache");
    }
}

fn wrong_kind(unit: &ReadyUnit, expected: UnitKind) -> ExecutionError {
    ExecutionError::WrongKind {
        name: unit.name().clone(),
        expected,
        found: unit.body().kind(),
    }
}

/// `error: cause: cause`, skipping causes the message already ends with
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !chain.ends_with(&message) {
            chain.push_str(": ");
            chain.push_str(&message);
        }
        source = cause.source();
    }
    chain
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
