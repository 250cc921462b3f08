use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::debug;

use super::{CodeRepository, RepositoryError, VersionToken};
use crate::naming::{NamePrefix, QualifiedName};

#[derive(Debug, Clone)]
struct Entry {
    payload: Vec<u8>,
    source_text: Option<String>,
}

#[derive(Debug)]
struct Transaction {
    owner: ThreadId,
    /// Entries as they were when the transaction began
    snapshot: BTreeMap<QualifiedName, Entry>,
    dirty: bool,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<QualifiedName, Entry>,
    version: u64,
    transaction: Option<Transaction>,
}

impl State {
    /// Changes outside a transaction are committed immediately
    fn changed(&mut self) {
        match &mut self.transaction {
            Some(transaction) => transaction.dirty = true,
            None => self.version += 1,
        }
    }

    fn owned_by_current_thread(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|transaction| transaction.owner == thread::current().id())
    }
}

/// In-process repository.
///
/// Transactions snapshot the entries on `begin` and restore them on
/// `rollback`. A transaction belongs to the thread that began it: calls from
/// any other thread, `begin` included, wait until it commits or rolls back.
/// The version token advances once per committed change, so several handles
/// sharing one `MemoryRepository` see each other's edits as external changes.
#[derive(Debug)]
pub struct MemoryRepository {
    state: Mutex<State>,
    transaction_ended: Condvar,
    available: AtomicBool,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            transaction_ended: Condvar::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the version token without changing any unit
    pub fn touch(&self) {
        self.lock().version += 1;
    }

    /// Make every call fail with an access error while `false`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Names of all stored units, in order
    pub fn names(&self) -> Vec<QualifiedName> {
        self.lock().entries.keys().cloned().collect()
    }

    /// State guard, once no other thread holds an open transaction
    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while state.transaction.is_some() && !state.owned_by_current_thread() {
            state = self
                .transaction_ended
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Access(
                "memory repository is unavailable".to_string(),
            ))
        }
    }
}

impl CodeRepository for MemoryRepository {
    fn load(&self, name: &QualifiedName) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.check_available()?;
        Ok(self.lock().entries.get(name).map(|entry| entry.payload.clone()))
    }

    fn save(
        &self,
        name: &QualifiedName,
        payload: &[u8],
        source_text: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.entries.contains_key(name) {
            return Err(RepositoryError::AlreadyExists(name.clone()));
        }

        state.entries.insert(
            name.clone(),
            Entry {
                payload: payload.to_vec(),
                source_text: source_text.map(str::to_string),
            },
        );
        state.changed();
        debug!(unit = %name, bytes = payload.len(), "Saved compiled unit");
        Ok(())
    }

    fn delete_by_prefix(&self, prefix: &NamePrefix) -> Result<usize, RepositoryError> {
        self.check_available()?;
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|name, _| !prefix.matches(name));

        let deleted = before - state.entries.len();
        if deleted > 0 {
            state.changed();
        }
        debug!(prefix = %prefix, deleted, "Deleted compiled units");
        Ok(deleted)
    }

    fn load_source_text(&self, name: &QualifiedName) -> Result<Option<String>, RepositoryError> {
        self.check_available()?;
        Ok(self
            .lock()
            .entries
            .get(name)
            .and_then(|entry| entry.source_text.clone()))
    }

    fn current_version_token(&self) -> Result<VersionToken, RepositoryError> {
        self.check_available()?;
        Ok(VersionToken(self.lock().version.to_string()))
    }

    /// Nested transactions on one thread are rejected
    fn begin(&self) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.lock();
        if state.transaction.is_some() {
            return Err(RepositoryError::TransactionInProgress);
        }
        state.transaction = Some(Transaction {
            owner: thread::current().id(),
            snapshot: state.entries.clone(),
            dirty: false,
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.lock();
        let transaction = state.transaction.take().ok_or(RepositoryError::NoTransaction)?;
        if transaction.dirty {
            state.version += 1;
        }
        drop(state);
        self.transaction_ended.notify_all();
        Ok(())
    }

    /// Restores the snapshot even while unavailable
    fn rollback(&self) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let transaction = state.transaction.take().ok_or(RepositoryError::NoTransaction)?;
        state.entries = transaction.snapshot;
        drop(state);
        self.transaction_ended.notify_all();
        Ok(())
    }
}
