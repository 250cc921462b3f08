//! Expression translator
//!
//! Converts one DSL expression into target code with a finite-state machine
//! over whitespace-delimited tokens:
//!
//! ```text
//! Start --literal/variable/field chain--> <Kind>Value --operand--> <Kind>Operand
//!   |                                         ^                        |
//!   |                                         +----same-kind value-----+
//!   +--record/array/null--> Termination
//! <Kind>Value / Termination --end of input--> End
//! ```
//!
//! Variable types come from the [`VariableTable`]; record field chains are
//! resolved through the [`TypeDescriptors`] registry.

pub mod numbers;
mod tokens;


use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::is_identifier;
use crate::registry::TypeDescriptors;
use crate::repository::RepositoryError;
use crate::types::{PrimitiveKind, ResultKind, SemanticType};
use crate::variables::VariableTable;

/* ===================== Output & Errors ===================== */

/// Translated expression: target code text and the kind of value it computes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCode {
    pub text: String,
    pub kind: ResultKind,
}

/// First unrecoverable mismatch in an expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TranslationError {
    /// Offending token (the operand itself for a dangling operand)
    pub token: String,
    /// What would have been accepted instead
    pub expected: Vec<String>,
    message: String,
    /// Set when a record type along a field chain could not be read
    #[source]
    lookup: Option<RepositoryError>,
}

impl TranslationError {
    fn unexpected_token(token: &str) -> Self {
        Self {
            token: token.to_string(),
            expected: ["literal", "variable", "field chain", "null"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            message: format!("Unexpected token [{}]", token),
            lookup: None,
        }
    }

    fn operand_expected(previous: &str, token: &str, kind: PrimitiveKind) -> Self {
        Self {
            token: token.to_string(),
            expected: kind.operands().iter().map(|s| s.to_string()).collect(),
            message: format!(
                "Operand is expected after [{}], but was [{}]",
                previous, token
            ),
            lookup: None,
        }
    }

    fn value_expected(kind: PrimitiveKind, operand: &str, token: &str) -> Self {
        Self {
            token: token.to_string(),
            expected: value_kinds(kind),
            message: format!(
                "{} value or variable is expected after operand [{}], but was [{}]",
                kind.name(),
                operand,
                token
            ),
            lookup: None,
        }
    }

    fn dangling_operand(kind: PrimitiveKind, operand: &str) -> Self {
        Self {
            token: operand.to_string(),
            expected: value_kinds(kind),
            message: format!("Unexpected operand [{}] at the end", operand),
            lookup: None,
        }
    }

    fn unreadable_types(token: &str, source: RepositoryError) -> Self {
        Self {
            token: token.to_string(),
            expected: Vec::new(),
            message: format!("Record types for [{}] could not be read", token),
            lookup: Some(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Repository failure that prevented resolving a field chain
    pub fn lookup_failure(&self) -> Option<&RepositoryError> {
        self.lookup.as_ref()
    }
}

fn value_kinds(kind: PrimitiveKind) -> Vec<String> {
    vec![
        format!("{} value", kind.name()),
        format!("{} variable", kind.name()),
    ]
}

/* ===================== Translator ===================== */

/// Translates DSL expressions against a variable table
pub struct Translator<'a> {
    types: &'a dyn TypeDescriptors,
}

impl<'a> Translator<'a> {
    pub fn new(types: &'a dyn TypeDescriptors) -> Self {
        Self { types }
    }

    /// Translate `expression` into target code.
    ///
    /// Fails on the first token the state machine cannot accept.
    pub fn translate(
        &self,
        expression: &str,
        variables: &VariableTable,
    ) -> Result<TargetCode, TranslationError> {
        let mut machine = Machine {
            resolver: Resolver {
                types: self.types,
                variables,
            },
            state: State::Start,
            previous: String::new(),
            code: String::new(),
        };

        for token in tokens::tokenize(expression) {
            machine.advance(&token)?;
        }
        machine.finish()
    }
}

/* ===================== State Machine ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Value(PrimitiveKind),
    Operand(PrimitiveKind),
    /// Record, array element or null: nothing may follow
    Termination(ResultKind),
    End,
}

struct Machine<'a> {
    resolver: Resolver<'a>,
    state: State,
    previous: String,
    code: String,
}

impl Machine<'_> {
    fn advance(&mut self, token: &str) -> Result<(), TranslationError> {
        self.state = match self.state {
            State::Start => match self.classify(token)? {
                Some(Term::Primitive { kind, code }) => {
                    self.code = code;
                    State::Value(kind)
                }
                Some(Term::Reference(code)) => {
                    self.code = code;
                    State::Termination(ResultKind::Reference)
                }
                Some(Term::Null) => {
                    self.code = "null".to_string();
                    State::Termination(ResultKind::Null)
                }
                None => return Err(TranslationError::unexpected_token(token)),
            },
            State::Value(kind) => {
                if !kind.operands().contains(&token) {
                    return Err(TranslationError::operand_expected(
                        &self.previous,
                        token,
                        kind,
                    ));
                }
                self.code.push(' ');
                self.code.push_str(token);
                self.code.push(' ');
                State::Operand(kind)
            }
            State::Operand(kind) => match self.classify(token)? {
                Some(Term::Primitive { kind: found, code }) if found == kind => {
                    self.code.push_str(&code);
                    State::Value(kind)
                }
                _ => {
                    return Err(TranslationError::value_expected(
                        kind,
                        &self.previous,
                        token,
                    ))
                }
            },
            State::Termination(_) | State::End => {
                return Err(TranslationError::unexpected_token(token))
            }
        };

        self.previous = token.to_string();
        Ok(())
    }

    fn classify(&self, token: &str) -> Result<Option<Term>, TranslationError> {
        self.resolver
            .classify(token)
            .map_err(|e| TranslationError::unreadable_types(token, e))
    }

    fn finish(mut self) -> Result<TargetCode, TranslationError> {
        let state = std::mem::replace(&mut self.state, State::End);
        match state {
            State::Value(kind) => Ok(TargetCode {
                text: format!("return {}({});", kind.coercion(), self.code),
                kind: kind.into(),
            }),
            State::Termination(kind) => Ok(TargetCode {
                text: format!("return {};", self.code),
                kind,
            }),
            State::Operand(kind) => Err(TranslationError::dangling_operand(kind, &self.previous)),
            State::Start | State::End => Err(TranslationError::unexpected_token(&self.previous)),
        }
    }
}

/* ===================== Token Classification ===================== */

enum Term {
    Primitive { kind: PrimitiveKind, code: String },
    Reference(String),
    Null,
}

struct Resolver<'a> {
    types: &'a dyn TypeDescriptors,
    variables: &'a VariableTable,
}

impl Resolver<'_> {
    /// `Ok(None)` for tokens that are not a value; `Err` only when record
    /// types could not be read
    fn classify(&self, token: &str) -> Result<Option<Term>, RepositoryError> {
        if token == "null" {
            return Ok(Some(Term::Null));
        }
        if numbers::is_integer(token) {
            return Ok(Some(literal(PrimitiveKind::Integer, token.to_string())));
        }
        if numbers::is_decimal(token) {
            return Ok(Some(literal(PrimitiveKind::Decimal, token.to_string())));
        }
        if token == "true" || token == "false" {
            return Ok(Some(literal(PrimitiveKind::Boolean, token.to_string())));
        }
        if let Some(text) = tokens::string_literal(token) {
            return Ok(Some(literal(PrimitiveKind::String, quote(text))));
        }
        if token.ends_with(']') {
            return Ok(self.array_element(token));
        }
        if token.contains('.') {
            return self.field_chain(token);
        }
        Ok(self.variable(token))
    }

    /// `Var` of a declared variable
    fn variable(&self, name: &str) -> Option<Term> {
        if !is_identifier(name) {
            return None;
        }
        let variable = self.variables.get(name)?;
        Some(access(
            format!("var({})", quote(name)),
            &variable.semantic_type,
        ))
    }

    /// `Arr[k]` with a 1-based index, emitted 0-based
    fn array_element(&self, token: &str) -> Option<Term> {
        let (name, rest) = token.split_once('[')?;
        let index = rest.strip_suffix(']')?;
        if !is_identifier(name) || !numbers::is_positive_integer(index) {
            return None;
        }

        let variable = self.variables.get(name)?;
        if variable.semantic_type != SemanticType::Array {
            return None;
        }
        let index: usize = index.parse().ok()?;
        Some(Term::Reference(format!(
            "var({}).at({})",
            quote(name),
            index - 1
        )))
    }

    /// `var.f1.f2...fN`, each field looked up in the previous field's record type
    fn field_chain(&self, token: &str) -> Result<Option<Term>, RepositoryError> {
        let mut parts = token.split('.');
        let head = parts.next().unwrap_or_default();
        let Some(variable) = self.variables.get(head).filter(|_| is_identifier(head)) else {
            return Ok(None);
        };

        let mut current = variable.semantic_type.clone();
        let mut code = format!("var({})", quote(head));

        for field in parts {
            let SemanticType::Record(type_name) = &current else {
                return Ok(None);
            };
            let Some(record_type) = self.types.record_type(type_name)? else {
                return Ok(None);
            };
            let Some(definition) = record_type.field(field) else {
                return Ok(None);
            };
            code.push_str(&format!(".field({})", quote(field)));
            current = definition.field_type.clone();
        }

        Ok(Some(access(code, &current)))
    }
}

fn literal(kind: PrimitiveKind, code: String) -> Term {
    Term::Primitive { kind, code }
}

/// Primitive reads get the coercion accessor; records and arrays stay references
fn access(code: String, semantic_type: &SemanticType) -> Term {
    match semantic_type.primitive() {
        Some(kind) => Term::Primitive {
            kind,
            code: format!("{}.{}()", code, kind.coercion()),
        },
        None => Term::Reference(code),
    }
}

/// Double-quoted target-code string literal
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
