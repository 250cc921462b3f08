//! Variable table: the per-execution scope of a script
//!
//! Input and local variables live in two disjoint namespaces. A name may be
//! declared once, in one namespace, for the lifetime of the table.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;

use crate::registry::TypeDescriptors;
use crate::repository::RepositoryError;
use crate::types::{CoercionError, SemanticType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Input,
    Local,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Input => write!(f, "Input"),
            Namespace::Local => write!(f, "Local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub semantic_type: SemanticType,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariableTableError {
    #[error("{namespace} variable with name [{name}] is already declared")]
    AlreadyDeclared { name: String, namespace: Namespace },

    #[error("Local variable with name [{0}] is not declared")]
    NotDeclared(String),

    #[error("No input value is left for input variable [{0}]")]
    MissingInput(String),

    #[error("Variable [{name}] cannot hold the value: {source}")]
    InvalidValue {
        name: String,
        #[source]
        source: CoercionError,
    },

    #[error("Cannot assign [{path}]: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Cannot assign [{path}]: {source}")]
    TypeLookup {
        path: String,
        #[source]
        source: RepositoryError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    inputs: BTreeMap<String, Variable>,
    locals: BTreeMap<String, Variable>,
    pending_inputs: VecDeque<Value>,
}

impl VariableTable {
    /// Empty table, used for type checking at compile time
    pub fn new() -> Self {
        Self::default()
    }

    /// Table that binds `inputs` to input declarations in order
    pub fn with_inputs(inputs: Vec<Value>) -> Self {
        Self {
            pending_inputs: inputs.into(),
            ..Self::default()
        }
    }

    /// Declare an input variable without binding a value
    pub fn declare_input(
        &mut self,
        name: &str,
        semantic_type: SemanticType,
    ) -> Result<(), VariableTableError> {
        self.ensure_undeclared(name)?;
        self.inputs.insert(
            name.to_string(),
            Variable {
                name: name.to_string(),
                semantic_type,
                value: Value::Null,
            },
        );
        Ok(())
    }

    /// Declare an input variable and bind the next queued input value to it
    pub fn bind_input(
        &mut self,
        name: &str,
        semantic_type: SemanticType,
    ) -> Result<(), VariableTableError> {
        self.ensure_undeclared(name)?;
        let raw = self
            .pending_inputs
            .pop_front()
            .ok_or_else(|| VariableTableError::MissingInput(name.to_string()))?;
        let value = semantic_type
            .coerce(raw)
            .map_err(|source| VariableTableError::InvalidValue {
                name: name.to_string(),
                source,
            })?;

        self.inputs.insert(
            name.to_string(),
            Variable {
                name: name.to_string(),
                semantic_type,
                value,
            },
        );
        Ok(())
    }

    pub fn declare_local(
        &mut self,
        name: &str,
        semantic_type: SemanticType,
    ) -> Result<(), VariableTableError> {
        self.ensure_undeclared(name)?;
        self.locals.insert(
            name.to_string(),
            Variable {
                name: name.to_string(),
                semantic_type,
                value: Value::Null,
            },
        );
        Ok(())
    }

    /// Look a variable up in either namespace
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.locals.get(name).or_else(|| self.inputs.get(name))
    }

    pub fn get_local(&self, name: &str) -> Option<&Variable> {
        self.locals.get(name)
    }

    /// Update a declared local variable, coercing to its declared type
    pub fn assign(&mut self, name: &str, value: Value) -> Result<(), VariableTableError> {
        let variable = self
            .locals
            .get_mut(name)
            .ok_or_else(|| VariableTableError::NotDeclared(name.to_string()))?;
        variable.value = variable
            .semantic_type
            .coerce(value)
            .map_err(|source| VariableTableError::InvalidValue {
                name: name.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Update a local variable or one of its record fields (`Contract.Days`).
    ///
    /// Unassigned records along the path are instantiated from their type descriptor.
    pub fn assign_path(
        &mut self,
        path: &str,
        value: Value,
        types: &dyn TypeDescriptors,
    ) -> Result<(), VariableTableError> {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        let fields: Vec<&str> = parts.collect();
        if fields.is_empty() {
            return self.assign(head, value);
        }

        let variable = self
            .locals
            .get_mut(head)
            .ok_or_else(|| VariableTableError::NotDeclared(head.to_string()))?;
        let semantic_type = variable.semantic_type.clone();
        assign_field(&mut variable.value, &semantic_type, &fields, value, types, path)
    }

    /// Snapshot of local variable values
    pub fn locals(&self) -> BTreeMap<String, Value> {
        self.locals
            .iter()
            .map(|(name, variable)| (name.clone(), variable.value.clone()))
            .collect()
    }

    /// Snapshot of input variable values
    pub fn inputs(&self) -> BTreeMap<String, Value> {
        self.inputs
            .iter()
            .map(|(name, variable)| (name.clone(), variable.value.clone()))
            .collect()
    }

    fn ensure_undeclared(&self, name: &str) -> Result<(), VariableTableError> {
        let namespace = if self.inputs.contains_key(name) {
            Namespace::Input
        } else if self.locals.contains_key(name) {
            Namespace::Local
        } else {
            return Ok(());
        };

        Err(VariableTableError::AlreadyDeclared {
            name: name.to_string(),
            namespace,
        })
    }
}

fn assign_field(
    slot: &mut Value,
    slot_type: &SemanticType,
    fields: &[&str],
    value: Value,
    types: &dyn TypeDescriptors,
    path: &str,
) -> Result<(), VariableTableError> {
    let invalid = |reason: String| VariableTableError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let SemanticType::Record(type_name) = slot_type else {
        return Err(invalid(format!("[{}] is not a record type", slot_type)));
    };
    let record_type = types
        .record_type(type_name)
        .map_err(|source| VariableTableError::TypeLookup {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| invalid(format!("record type [{}] is unknown", slot_type)))?;

    if slot.is_null() {
        *slot = Value::Record(record_type.instantiate());
    }
    let Value::Record(record) = &mut *slot else {
        return Err(invalid(format!("value [{}] is not a record", slot)));
    };

    let (field_name, rest) = match fields.split_first() {
        Some(split) => split,
        None => return Err(invalid("empty field path".to_string())),
    };
    let field = record_type.field(field_name).ok_or_else(|| {
        invalid(format!(
            "record type [{}] has no field [{}]",
            slot_type, field_name
        ))
    })?;
    let entry = record
        .fields
        .entry(field_name.to_string())
        .or_insert(Value::Null);

    if rest.is_empty() {
        *entry = field
            .field_type
            .coerce(value)
            .map_err(|source| VariableTableError::InvalidValue {
                name: path.to_string(),
                source,
            })?;
        Ok(())
    } else {
        assign_field(entry, &field.field_type, rest, value, types, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::QualifiedName;
    use crate::registry::{FieldDef, RecordType, StaticTypes};

    fn contract_types() -> StaticTypes {
        StaticTypes::new()
            .with(RecordType {
                name: QualifiedName::record("Contract"),
                fields: vec![
                    FieldDef {
                        name: "Days".into(),
                        field_type: SemanticType::Integer,
                    },
                    FieldDef {
                        name: "Owner".into(),
                        field_type: SemanticType::Record(QualifiedName::record("Person")),
                    },
                ],
            })
            .with(RecordType {
                name: QualifiedName::record("Person"),
                fields: vec![FieldDef {
                    name: "Name".into(),
                    field_type: SemanticType::String,
                }],
            })
    }

    #[test]
    fn test_names_are_unique_across_namespaces() {
        let mut table = VariableTable::new();
        table.declare_input("A", SemanticType::Integer).unwrap();

        let err = table.declare_local("A", SemanticType::Integer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Input variable with name [A] is already declared"
        );

        table.declare_local("B", SemanticType::Integer).unwrap();
        let err = table.declare_local("B", SemanticType::Decimal).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Local variable with name [B] is already declared"
        );
    }

    #[test]
    fn test_inputs_bind_in_order() {
        let mut table =
            VariableTable::with_inputs(vec![Value::Integer(3), Value::String("1.5".into())]);
        table.bind_input("Var1", SemanticType::Integer).unwrap();
        table.bind_input("Rate", SemanticType::Decimal).unwrap();

        assert_eq!(table.get("Var1").unwrap().value, Value::Integer(3));
        assert_eq!(table.get("Rate").unwrap().value, Value::Decimal(1.5));

        let err = table.bind_input("Var3", SemanticType::Integer).unwrap_err();
        assert_eq!(err, VariableTableError::MissingInput("Var3".into()));
    }

    #[test]
    fn test_assign_requires_declared_local() {
        let mut table = VariableTable::with_inputs(vec![Value::Integer(1)]);
        table.bind_input("In", SemanticType::Integer).unwrap();

        let err = table.assign("Missing", Value::Integer(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Local variable with name [Missing] is not declared"
        );

        // Inputs are read-only
        assert!(table.assign("In", Value::Integer(2)).is_err());
    }

    #[test]
    fn test_assign_coerces_to_declared_type() {
        let mut table = VariableTable::new();
        table.declare_local("Fee", SemanticType::Decimal).unwrap();
        table.assign("Fee", Value::Integer(2)).unwrap();
        assert_eq!(table.locals()["Fee"], Value::Decimal(2.0));

        let err = table
            .assign("Fee", Value::Boolean(true))
            .unwrap_err();
        assert!(matches!(err, VariableTableError::InvalidValue { .. }));
    }

    #[test]
    fn test_assign_path_instantiates_records() {
        let types = contract_types();
        let mut table = VariableTable::new();
        table
            .declare_local("C", SemanticType::Record(QualifiedName::record("Contract")))
            .unwrap();

        table
            .assign_path("C.Owner.Name", Value::String("Ann".into()), &types)
            .unwrap();
        table.assign_path("C.Days", Value::Integer(30), &types).unwrap();

        let Value::Record(contract) = &table.locals()["C"] else {
            panic!("contract should be instantiated");
        };
        assert_eq!(contract.fields["Days"], Value::Integer(30));
        let Value::Record(owner) = &contract.fields["Owner"] else {
            panic!("owner should be instantiated");
        };
        assert_eq!(owner.fields["Name"], Value::String("Ann".into()));
    }

    #[test]
    fn test_assign_path_rejects_unknown_field() {
        let types = contract_types();
        let mut table = VariableTable::new();
        table
            .declare_local("C", SemanticType::Record(QualifiedName::record("Contract")))
            .unwrap();

        let err = table
            .assign_path("C.Weeks", Value::Integer(1), &types)
            .unwrap_err();
        assert!(err.to_string().contains("has no field [Weeks]"));
    }

    #[test]
    fn test_assign_path_reports_unreadable_types() {
        struct Unreadable;

        impl TypeDescriptors for Unreadable {
            fn record_type(&self, _name: &QualifiedName) -> Result<Option<RecordType>, RepositoryError> {
                Err(RepositoryError::Access("store offline".into()))
            }
        }

        let mut table = VariableTable::new();
        table
            .declare_local("C", SemanticType::Record(QualifiedName::record("Contract")))
            .unwrap();

        let err = table
            .assign_path("C.Days", Value::Integer(1), &Unreadable)
            .unwrap_err();
        assert_eq!(
            err,
            VariableTableError::TypeLookup {
                path: "C.Days".into(),
                source: RepositoryError::Access("store offline".into()),
            }
        );
    }
}
