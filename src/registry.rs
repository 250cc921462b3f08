//! Type descriptor registry
//!
//! Compiled record types expose their field tables here. The translator walks
//! field chains and the compiler checks record field types through
//! [`TypeDescriptors`], never through the units themselves.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::naming::QualifiedName;
use crate::repository::RepositoryError;
use crate::types::{RecordValue, SemanticType, Value};

/// Field table of a compiled record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordType {
    pub name: QualifiedName,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: SemanticType,
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Fresh instance with every field unassigned
    pub fn instantiate(&self) -> RecordValue {
        RecordValue {
            type_name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .map(|field| (field.name.clone(), Value::Null))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

/// Lookup of compiled record types by qualified name
pub trait TypeDescriptors {
    /// `Ok(None)` when no such record type exists. A store that cannot be
    /// read reports the failure instead.
    fn record_type(&self, name: &QualifiedName) -> Result<Option<RecordType>, RepositoryError>;
}

/// Fixed set of record types, for callers without a generation cache
#[derive(Debug, Clone, Default)]
pub struct StaticTypes {
    types: HashMap<QualifiedName, RecordType>,
}

impl StaticTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record_type: RecordType) {
        self.types.insert(record_type.name.clone(), record_type);
    }

    pub fn with(mut self, record_type: RecordType) -> Self {
        self.insert(record_type);
        self
    }
}

impl TypeDescriptors for StaticTypes {
    fn record_type(&self, name: &QualifiedName) -> Result<Option<RecordType>, RepositoryError> {
        Ok(self.types.get(name).cloned())
    }
}
