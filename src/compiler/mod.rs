//! Artifact compiler
//!
//! Turns translated expressions, script bodies and record field specs into
//! [`CompiledUnit`]s: a serialized payload plus the source text it came from.
//! Payloads are materialized back into executable [`ReadyUnit`]s with
//! [`load_from_payload`].

pub mod payload;
pub mod script;
pub mod target;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::naming::{is_identifier, QualifiedName, UnitKind};
use crate::registry::{FieldDef, RecordType, TypeDescriptors};
use crate::repository::RepositoryError;
use crate::translator::{TranslationError, Translator};
use crate::types::SemanticType;
use crate::variables::VariableTable;

pub use script::{
    Comparison, Condition, ExprRef, InputManifest, InputParameter, Instruction, ScriptProgram,
};
pub use target::TargetExpr;

/* ===================== Errors ===================== */

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Qualified name [{0}] has an empty segment")]
    InvalidName(QualifiedName),

    #[error("Compilation of the script [{name}] failed\n{}", .failures.join("\n"))]
    Script {
        name: String,
        failures: Vec<String>,
        translation_errors: Vec<TranslationError>,
    },

    #[error("Compilation of the script [{name}] failed\n{message}")]
    Syntax { name: String, message: String },

    #[error("Compilation of record type [{name}] failed. Expression [{fragment}] is invalid")]
    InvalidField { name: String, fragment: String },

    #[error("Compilation of record type [{name}] failed. Field [{field}] has unknown type [{field_type}]")]
    UnknownFieldType {
        name: String,
        field: String,
        field_type: String,
    },

    #[error("Compilation of record type [{name}] failed. Field [{field}] is declared twice")]
    DuplicateField { name: String, field: String },

    #[error("Malformed target code for [{name}]: {message}")]
    MalformedTarget { name: QualifiedName, message: String },

    #[error("Could not parse expression [{expression}]: {source}")]
    Expression {
        expression: String,
        #[source]
        source: TranslationError,
    },

    #[error("Cannot load compiled unit [{name}]: {message}")]
    Payload { name: QualifiedName, message: String },

    #[error("Compilation of [{name}] failed. Record types could not be read: {source}")]
    TypeLookup {
        name: String,
        #[source]
        source: RepositoryError,
    },
}

/* ===================== Units ===================== */

/// Executable content of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitBody {
    Expression(TargetExpr),
    Script(ScriptProgram),
    Record(RecordType),
}

impl UnitBody {
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitBody::Expression(_) => UnitKind::Expression,
            UnitBody::Script(_) => UnitKind::Script,
            UnitBody::Record(_) => UnitKind::RecordType,
        }
    }
}

/// Output of a compile, ready to be saved to a repository
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub qualified_name: QualifiedName,
    pub payload: Vec<u8>,
    pub source_text: Option<String>,
    /// SHA-256 of `source_text`
    pub source_digest: Option<String>,
    pub input_parameters: Option<InputManifest>,
}

/// A compiled script together with the expression units it references
#[derive(Debug, Clone)]
pub struct ScriptCompilation {
    pub unit: CompiledUnit,
    pub input_parameters: InputManifest,
    pub expressions: Vec<CompiledUnit>,
}

impl ScriptCompilation {
    /// Script unit first, then its expression units
    pub fn units(&self) -> impl Iterator<Item = &CompiledUnit> {
        std::iter::once(&self.unit).chain(self.expressions.iter())
    }
}

/// Materialized unit. Identity (pointer equality) is stable within a generation.
#[derive(Debug)]
pub struct LoadedUnit {
    name: QualifiedName,
    body: UnitBody,
}

pub type ReadyUnit = Arc<LoadedUnit>;

impl LoadedUnit {
    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn body(&self) -> &UnitBody {
        &self.body
    }

    pub fn expression(&self) -> Option<&TargetExpr> {
        match &self.body {
            UnitBody::Expression(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn script(&self) -> Option<&ScriptProgram> {
        match &self.body {
            UnitBody::Script(program) => Some(program),
            _ => None,
        }
    }

    pub fn record_type(&self) -> Option<&RecordType> {
        match &self.body {
            UnitBody::Record(record_type) => Some(record_type),
            _ => None,
        }
    }
}

/// Materialize a stored payload into an executable unit
pub fn load_from_payload(name: &QualifiedName, payload: &[u8]) -> Result<ReadyUnit, CompileError> {
    let invalid = |message: String| CompileError::Payload {
        name: name.clone(),
        message,
    };

    let body = payload::decode(payload).map_err(invalid)?;
    if body.kind() != name.kind() {
        return Err(invalid(format!(
            "payload holds a {} but the name denotes a {}",
            body.kind(),
            name.kind()
        )));
    }
    if let UnitBody::Record(record_type) = &body {
        if record_type.name != *name {
            return Err(invalid(format!(
                "payload describes record type [{}]",
                record_type.name
            )));
        }
    }

    Ok(Arc::new(LoadedUnit {
        name: name.clone(),
        body,
    }))
}

/* ===================== Compiler ===================== */

/// Compiles against the record types visible through `types`
pub struct Compiler<'a> {
    types: &'a dyn TypeDescriptors,
}

impl<'a> Compiler<'a> {
    pub fn new(types: &'a dyn TypeDescriptors) -> Self {
        Self { types }
    }

    /// Wrap one piece of translated target code into an invocable unit
    pub fn compile_expression(
        &self,
        name: &QualifiedName,
        target_code: &str,
    ) -> Result<CompiledUnit, CompileError> {
        check_name(name)?;
        let expr = parse_target_code(name, target_code)?;
        build_unit(name, UnitBody::Expression(expr), None, None)
    }

    /// Translate a DSL expression and compile the result, keeping the DSL text as source
    pub fn compile_expression_source(
        &self,
        name: &QualifiedName,
        expression: &str,
        variables: &VariableTable,
    ) -> Result<CompiledUnit, CompileError> {
        check_name(name)?;
        let code = Translator::new(self.types)
            .translate(expression, variables)
            .map_err(|source| match source.lookup_failure() {
                Some(failure) => CompileError::TypeLookup {
                    name: name.human_name(),
                    source: failure.clone(),
                },
                None => CompileError::Expression {
                    expression: expression.to_string(),
                    source,
                },
            })?;

        let expr = parse_target_code(name, &code.text)?;
        build_unit(name, UnitBody::Expression(expr), Some(expression), None)
    }

    /// Compile a script body and every unique expression it contains.
    ///
    /// All failures found in the body are reported together.
    pub fn compile_script(
        &self,
        name: &QualifiedName,
        body: &str,
    ) -> Result<ScriptCompilation, CompileError> {
        check_name(name)?;
        let statements = script::parse_script(body).map_err(|message| CompileError::Syntax {
            name: name.human_name(),
            message,
        })?;

        let checked = script::ScriptChecker::new(name, self.types)
            .check(&statements)
            .map_err(|failure| match failure.lookup_failure {
                Some(source) => CompileError::TypeLookup {
                    name: name.human_name(),
                    source,
                },
                None => CompileError::Script {
                    name: name.human_name(),
                    failures: failure.failures,
                    translation_errors: failure.translation_errors,
                },
            })?;

        let expressions = checked
            .expressions
            .iter()
            .map(|pending| {
                let expr = parse_target_code(&pending.name, &pending.code.text)?;
                build_unit(
                    &pending.name,
                    UnitBody::Expression(expr),
                    Some(&pending.source),
                    None,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input_parameters = checked.program.inputs.clone();
        let unit = build_unit(
            name,
            UnitBody::Script(checked.program),
            Some(body),
            Some(input_parameters.clone()),
        )?;

        debug!(
            script = %name,
            expressions = expressions.len(),
            inputs = input_parameters.0.len(),
            "Compiled script"
        );

        Ok(ScriptCompilation {
            unit,
            input_parameters,
            expressions,
        })
    }

    /// Compile a `Type name; Type name; ...` field spec.
    ///
    /// A field may refer to the record type being compiled.
    pub fn compile_record_type(
        &self,
        name: &QualifiedName,
        field_spec: &str,
    ) -> Result<CompiledUnit, CompileError> {
        check_name(name)?;
        let human = name.human_name();
        let mut fields = Vec::new();
        let mut seen = HashSet::new();

        for fragment in field_spec.split(';').map(str::trim).filter(|f| !f.is_empty()) {
            let parts: Vec<&str> = fragment.split_whitespace().collect();
            let &[type_name, field] = parts.as_slice() else {
                return Err(CompileError::InvalidField {
                    name: human,
                    fragment: fragment.to_string(),
                });
            };
            if !is_identifier(field) {
                return Err(CompileError::InvalidField {
                    name: human,
                    fragment: fragment.to_string(),
                });
            }

            let field_type = SemanticType::from_type_name(type_name);
            if let SemanticType::Record(record) = &field_type {
                let known = record == name
                    || self
                        .types
                        .record_type(record)
                        .map_err(|source| CompileError::TypeLookup {
                            name: human.clone(),
                            source,
                        })?
                        .is_some();
                if !known {
                    return Err(CompileError::UnknownFieldType {
                        name: human,
                        field: field.to_string(),
                        field_type: type_name.to_string(),
                    });
                }
            }
            if !seen.insert(field) {
                return Err(CompileError::DuplicateField {
                    name: human,
                    field: field.to_string(),
                });
            }

            fields.push(FieldDef {
                name: field.to_string(),
                field_type,
            });
        }

        let record_type = RecordType {
            name: name.clone(),
            fields,
        };
        build_unit(name, UnitBody::Record(record_type), Some(field_spec), None)
    }
}

fn check_name(name: &QualifiedName) -> Result<(), CompileError> {
    if name.is_well_formed() {
        Ok(())
    } else {
        Err(CompileError::InvalidName(name.clone()))
    }
}

fn parse_target_code(name: &QualifiedName, code: &str) -> Result<TargetExpr, CompileError> {
    target::parse_target(code).map_err(|message| CompileError::MalformedTarget {
        name: name.clone(),
        message,
    })
}

fn build_unit(
    name: &QualifiedName,
    body: UnitBody,
    source_text: Option<&str>,
    input_parameters: Option<InputManifest>,
) -> Result<CompiledUnit, CompileError> {
    let payload = payload::encode(&body).map_err(|message| CompileError::Payload {
        name: name.clone(),
        message,
    })?;

    Ok(CompiledUnit {
        qualified_name: name.clone(),
        payload,
        source_text: source_text.map(str::to_string),
        source_digest: source_text.map(payload::hash_source),
        input_parameters,
    })
}
