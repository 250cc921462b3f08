//! Script bodies: parsing, expression extraction and type checking
//!
//! Every expression argument is translated once per distinct text and
//! replaced by an [`ExprRef`] naming its own compiled unit. Failures are
//! collected rather than returned one at a time.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::naming::{is_identifier, DiscriminatorAllocator, QualifiedName};
use crate::registry::{RecordType, TypeDescriptors};
use crate::repository::RepositoryError;
use crate::translator::{TargetCode, TranslationError, Translator};
use crate::types::{ResultKind, SemanticType};
use crate::variables::VariableTable;

/* ===================== Compiled Script ===================== */

/// Compiled script body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptProgram {
    pub inputs: InputManifest,
    pub statements: Vec<Instruction>,
}

/// Declared input variables, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputManifest(pub Vec<InputParameter>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParameter {
    pub name: String,
    pub semantic_type: SemanticType,
}

/// Call site of an expression unit. The source text lets the runtime compile
/// the unit on the fly when it is neither cached nor stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprRef {
    pub name: QualifiedName,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    DeclareInput {
        name: String,
        semantic_type: SemanticType,
    },
    DeclareLocal {
        name: String,
        semantic_type: SemanticType,
        init: Option<ExprRef>,
    },
    SetLocal {
        target: String,
        value: ExprRef,
    },
    Branch {
        condition: Condition,
        then_branch: Vec<Instruction>,
        else_branch: Vec<Instruction>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub comparison: Comparison,
    pub left: ExprRef,
    pub right: ExprRef,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    LessOrEqual,
}

impl Comparison {
    fn call_name(self) -> &'static str {
        match self {
            Comparison::Equal => "EqualCondition",
            Comparison::LessOrEqual => "LessOrEqualCondition",
        }
    }
}

/* ===================== Script Syntax ===================== */

#[derive(Parser)]
#[grammar = "compiler/script.pest"]
struct ScriptParser;

#[derive(Debug)]
pub(crate) enum RawStatement {
    Call(RawCall),
    If {
        condition: RawCall,
        then_branch: Vec<RawStatement>,
        else_branch: Vec<RawStatement>,
    },
}

#[derive(Debug)]
pub(crate) struct RawCall {
    pub name: String,
    pub args: Vec<String>,
    pub line: usize,
}

/// Parse a script body into raw statements
pub(crate) fn parse_script(body: &str) -> Result<Vec<RawStatement>, String> {
    let mut pairs = ScriptParser::parse(Rule::script, body).map_err(|e| e.to_string())?;
    let script = pairs.next().ok_or_else(|| "Empty script".to_string())?;

    // script = { SOI ~ statement* ~ EOI }
    script
        .into_inner()
        .filter(|pair| pair.as_rule() != Rule::EOI)
        .map(build_statement)
        .collect()
}

fn build_statement(pair: Pair<Rule>) -> Result<RawStatement, String> {
    match pair.as_rule() {
        Rule::call_statement => {
            // call_statement = { call ~ ";" }
            let call = pair
                .into_inner()
                .next()
                .ok_or_else(|| "Missing call".to_string())?;
            Ok(RawStatement::Call(build_call(call)?))
        }
        Rule::if_statement => {
            // if_statement = { "if" ~ "(" ~ call ~ ")" ~ block ~ ("else" ~ (if_statement | block))? }
            let mut inner = pair.into_inner();
            let condition = build_call(
                inner
                    .next()
                    .ok_or_else(|| "Missing condition".to_string())?,
            )?;
            let then_branch = build_block(
                inner
                    .next()
                    .ok_or_else(|| "Missing if block".to_string())?,
            )?;
            let else_branch = match inner.next() {
                None => Vec::new(),
                Some(nested) if nested.as_rule() == Rule::if_statement => {
                    vec![build_statement(nested)?]
                }
                Some(block) => build_block(block)?,
            };
            Ok(RawStatement::If {
                condition,
                then_branch,
                else_branch,
            })
        }
        other => Err(format!("Unexpected statement rule: {:?}", other)),
    }
}

fn build_block(pair: Pair<Rule>) -> Result<Vec<RawStatement>, String> {
    // block = { "{" ~ statement* ~ "}" }
    pair.into_inner().map(build_statement).collect()
}

fn build_call(pair: Pair<Rule>) -> Result<RawCall, String> {
    // call = { identifier ~ "(" ~ (string ~ ("," ~ string)*)? ~ ")" }
    let line = pair.as_span().start_pos().line_col().0;
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .ok_or_else(|| "Missing statement name".to_string())?
        .as_str()
        .to_string();
    let args = inner.map(|arg| unescape(arg.as_str())).collect();
    Ok(RawCall { name, args, line })
}

/// Strip the quotes of a string literal and resolve escapes
fn unescape(literal: &str) -> String {
    let raw = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(literal);

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/* ===================== Semantic Pass ===================== */

/// Unique translated expression awaiting compilation
pub(crate) struct PendingExpression {
    pub name: QualifiedName,
    pub source: String,
    pub code: TargetCode,
}

/// Output of the semantic pass
pub(crate) struct CheckedScript {
    pub program: ScriptProgram,
    pub expressions: Vec<PendingExpression>,
}

pub(crate) struct CheckFailure {
    pub failures: Vec<String>,
    pub translation_errors: Vec<TranslationError>,
    /// First repository failure met while looking up record types
    pub lookup_failure: Option<RepositoryError>,
}

/// Walks raw statements in order, tracking declarations in a compile-time
/// variable table so expressions are checked against what is in scope.
pub(crate) struct ScriptChecker<'a> {
    script: &'a QualifiedName,
    types: &'a dyn TypeDescriptors,
    translator: Translator<'a>,
    table: VariableTable,
    manifest: Vec<InputParameter>,
    discriminators: DiscriminatorAllocator,
    expressions: Vec<PendingExpression>,
    seen: HashMap<String, Option<usize>>,
    failures: Vec<String>,
    translation_errors: Vec<TranslationError>,
    lookup_failure: Option<RepositoryError>,
}

impl<'a> ScriptChecker<'a> {
    pub fn new(script: &'a QualifiedName, types: &'a dyn TypeDescriptors) -> Self {
        Self {
            script,
            types,
            translator: Translator::new(types),
            table: VariableTable::new(),
            manifest: Vec::new(),
            discriminators: DiscriminatorAllocator::new(),
            expressions: Vec::new(),
            seen: HashMap::new(),
            failures: Vec::new(),
            translation_errors: Vec::new(),
            lookup_failure: None,
        }
    }

    pub fn check(mut self, statements: &[RawStatement]) -> Result<CheckedScript, CheckFailure> {
        let statements = self.statements(statements);

        if !self.failures.is_empty() {
            return Err(CheckFailure {
                failures: self.failures,
                translation_errors: self.translation_errors,
                lookup_failure: self.lookup_failure,
            });
        }

        Ok(CheckedScript {
            program: ScriptProgram {
                inputs: InputManifest(self.manifest),
                statements,
            },
            expressions: self.expressions,
        })
    }

    fn statements(&mut self, raw: &[RawStatement]) -> Vec<Instruction> {
        raw.iter()
            .filter_map(|statement| match statement {
                RawStatement::Call(call) => self.call(call),
                RawStatement::If {
                    condition,
                    then_branch,
                    else_branch,
                } => {
                    let condition = self.condition(condition);
                    let then_branch = self.statements(then_branch);
                    let else_branch = self.statements(else_branch);
                    condition.map(|condition| Instruction::Branch {
                        condition,
                        then_branch,
                        else_branch,
                    })
                }
            })
            .collect()
    }

    fn call(&mut self, call: &RawCall) -> Option<Instruction> {
        let args = &call.args;
        match (call.name.as_str(), args.len()) {
            ("DeclareInputVar", 2) => {
                let semantic_type = self.variable_type(&args[0], &args[1])?;
                let declared = self.table.declare_input(&args[0], semantic_type.clone());
                self.declared(declared)?;
                self.manifest.push(InputParameter {
                    name: args[0].clone(),
                    semantic_type: semantic_type.clone(),
                });
                Some(Instruction::DeclareInput {
                    name: args[0].clone(),
                    semantic_type,
                })
            }
            ("DeclareLocalVar", 2 | 3) => {
                let semantic_type = self.variable_type(&args[0], &args[1]);
                // The initializer is checked before the name comes into scope
                let init = match args.get(2) {
                    Some(text) => Some(self.expression(text)),
                    None => None,
                };

                let semantic_type = semantic_type?;
                let declared = self.table.declare_local(&args[0], semantic_type.clone());
                self.declared(declared)?;

                let init = match init {
                    Some(init) => {
                        let (expr, kind) = init?;
                        self.assignable(&args[0], &semantic_type, &expr, kind)?;
                        Some(expr)
                    }
                    None => None,
                };
                Some(Instruction::DeclareLocal {
                    name: args[0].clone(),
                    semantic_type,
                    init,
                })
            }
            ("SetLocalVar", 2) => {
                let target_type = self.target_type(&args[0]);
                let (value, kind) = self.expression(&args[1])?;
                let target_type = target_type?;
                self.assignable(&args[0], &target_type, &value, kind)?;
                Some(Instruction::SetLocal {
                    target: args[0].clone(),
                    value,
                })
            }
            ("EqualCondition" | "LessOrEqualCondition", _) => {
                self.fail(call, format!("[{}] can only be used as an if condition", call.name));
                None
            }
            (name, count) => {
                self.fail(
                    call,
                    format!("Unknown statement [{}] with {} argument(s)", name, count),
                );
                None
            }
        }
    }

    fn condition(&mut self, call: &RawCall) -> Option<Condition> {
        let comparison = match call.name.as_str() {
            "EqualCondition" => Comparison::Equal,
            "LessOrEqualCondition" => Comparison::LessOrEqual,
            other => {
                self.fail(call, format!("Unknown condition [{}]", other));
                return None;
            }
        };
        if !(2..=3).contains(&call.args.len()) {
            self.fail(
                call,
                format!(
                    "Condition [{}] expects 2 or 3 arguments, but was {}",
                    comparison.call_name(),
                    call.args.len()
                ),
            );
            return None;
        }

        let left = self.expression(&call.args[0]);
        let right = self.expression(&call.args[1]);
        let ((left, left_kind), (right, right_kind)) = (left?, right?);

        if !comparable(comparison, left_kind, right_kind) {
            self.fail(
                call,
                format!(
                    "Condition [{}] cannot compare [{}] with [{}]",
                    comparison.call_name(),
                    left_kind,
                    right_kind
                ),
            );
            return None;
        }

        Some(Condition {
            comparison,
            left,
            right,
            description: call.args.get(2).cloned(),
        })
    }

    /// Translate an expression once per distinct text and hand out its call site
    fn expression(&mut self, text: &str) -> Option<(ExprRef, ResultKind)> {
        if let Some(slot) = self.seen.get(text) {
            return slot.map(|index| {
                let pending = &self.expressions[index];
                (
                    ExprRef {
                        name: pending.name.clone(),
                        source: pending.source.clone(),
                    },
                    pending.code.kind,
                )
            });
        }

        match self.translator.translate(text, &self.table) {
            Ok(code) => {
                let discriminator = self.discriminators.allocate(text);
                let name = self.script.expression(discriminator);
                let kind = code.kind;

                self.seen.insert(text.to_string(), Some(self.expressions.len()));
                self.expressions.push(PendingExpression {
                    name: name.clone(),
                    source: text.to_string(),
                    code,
                });
                Some((
                    ExprRef {
                        name,
                        source: text.to_string(),
                    },
                    kind,
                ))
            }
            Err(e) => {
                if let Some(failure) = e.lookup_failure() {
                    self.lookup_failure.get_or_insert_with(|| failure.clone());
                }
                self.failures
                    .push(format!("Could not parse expression [{}]: {}", text, e));
                self.translation_errors.push(e);
                self.seen.insert(text.to_string(), None);
                None
            }
        }
    }

    fn variable_type(&mut self, name: &str, type_name: &str) -> Option<SemanticType> {
        if !is_identifier(name) {
            self.failures
                .push(format!("Variable name [{}] is invalid", name));
            return None;
        }

        let semantic_type = SemanticType::from_type_name(type_name);
        if let SemanticType::Record(record) = &semantic_type {
            if self.lookup(record).is_none() {
                self.failures.push(format!(
                    "Variable [{}] has invalid type [{}]",
                    name, type_name
                ));
                return None;
            }
        }
        Some(semantic_type)
    }

    /// Declared type of an assignment target (`Var` or `Var.Field.Field`)
    fn target_type(&mut self, target: &str) -> Option<SemanticType> {
        let mut parts = target.split('.');
        let head = parts.next().unwrap_or_default();
        let Some(variable) = self.table.get_local(head) else {
            self.failures.push(format!(
                "Local variable with name [{}] is not declared",
                head
            ));
            return None;
        };

        let mut current = variable.semantic_type.clone();
        for field in parts {
            let field_type = match &current {
                SemanticType::Record(record) => self
                    .lookup(record)
                    .and_then(|record_type| record_type.field(field).map(|f| f.field_type.clone())),
                _ => None,
            };
            match field_type {
                Some(field_type) => current = field_type,
                None => {
                    self.failures
                        .push(format!("Field path [{}] is invalid", target));
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Record type by name. A store that cannot be read fails the whole compile.
    fn lookup(&mut self, record: &QualifiedName) -> Option<RecordType> {
        match self.types.record_type(record) {
            Ok(found) => found,
            Err(e) => {
                self.failures
                    .push(format!("Record type [{}] could not be read: {}", record.human_name(), e));
                self.lookup_failure.get_or_insert(e);
                None
            }
        }
    }

    fn assignable(
        &mut self,
        target: &str,
        target_type: &SemanticType,
        value: &ExprRef,
        kind: ResultKind,
    ) -> Option<()> {
        if target_type.accepts(kind) {
            return Some(());
        }
        self.failures.push(format!(
            "Variable [{}] of type [{}] cannot be assigned expression [{}] of type [{}]",
            target, target_type, value.source, kind
        ));
        None
    }

    fn declared<E: std::fmt::Display>(&mut self, result: Result<(), E>) -> Option<()> {
        match result {
            Ok(()) => Some(()),
            Err(e) => {
                self.failures.push(e.to_string());
                None
            }
        }
    }

    fn fail(&mut self, call: &RawCall, message: String) {
        self.failures
            .push(format!("{} (line {})", message, call.line));
    }
}

fn comparable(comparison: Comparison, left: ResultKind, right: ResultKind) -> bool {
    let numeric = |kind| matches!(kind, ResultKind::Integer | ResultKind::Decimal);
    match comparison {
        Comparison::Equal => {
            left == right
                || left == ResultKind::Null
                || right == ResultKind::Null
                || (numeric(left) && numeric(right))
        }
        Comparison::LessOrEqual => {
            (numeric(left) && numeric(right))
                || (left == ResultKind::String && right == ResultKind::String)
        }
    }
}
