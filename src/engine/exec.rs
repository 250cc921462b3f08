//! Script interpreter: walks compiled instructions over one variable table

use std::cmp::Ordering;
use tracing::debug;

use super::{ExecutionError, RuntimeEngine};
use crate::compiler::{Comparison, Condition, Instruction};
use crate::engine::eval::EvalError;
use crate::types::Value;
use crate::variables::VariableTable;

pub(crate) struct ScriptRunner<'a> {
    engine: &'a RuntimeEngine,
    table: VariableTable,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(engine: &'a RuntimeEngine, inputs: Vec<Value>) -> Self {
        Self {
            engine,
            table: VariableTable::with_inputs(inputs),
        }
    }

    pub fn into_table(self) -> VariableTable {
        self.table
    }

    pub fn run(&mut self, statements: &[Instruction]) -> Result<(), ExecutionError> {
        for statement in statements {
            self.step(statement)?;
        }
        Ok(())
    }

    fn step(&mut self, statement: &Instruction) -> Result<(), ExecutionError> {
        match statement {
            Instruction::DeclareInput {
                name,
                semantic_type,
            } => {
                self.table.bind_input(name, semantic_type.clone())?;
                self.trace(name);
            }
            Instruction::DeclareLocal {
                name,
                semantic_type,
                init,
            } => {
                let value = match init {
                    Some(init) => Some(self.engine.evaluate(init, &self.table)?),
                    None => None,
                };
                self.table.declare_local(name, semantic_type.clone())?;
                if let Some(value) = value {
                    self.table.assign(name, value)?;
                }
                self.trace(name);
            }
            Instruction::SetLocal { target, value } => {
                let value = self.engine.evaluate(value, &self.table)?;
                self.table.assign_path(target, value, self.engine)?;
                self.trace(target);
            }
            Instruction::Branch {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.test(condition)? {
                    self.run(then_branch)?;
                } else {
                    self.run(else_branch)?;
                }
            }
        }
        Ok(())
    }

    fn test(&self, condition: &Condition) -> Result<bool, ExecutionError> {
        let left = self.engine.evaluate(&condition.left, &self.table)?;
        let right = self.engine.evaluate(&condition.right, &self.table)?;

        let outcome = match condition.comparison {
            Comparison::Equal => equal(&left, &right),
            Comparison::LessOrEqual => match compare(&left, &right) {
                Some(ordering) => ordering != Ordering::Greater,
                None => {
                    return Err(ExecutionError::Evaluation {
                        expression: format!("{} <= {}", condition.left.source, condition.right.source),
                        source: EvalError::Incomparable {
                            lhs: left.to_string(),
                            rhs: right.to_string(),
                        },
                    })
                }
            },
        };

        if self.engine.runtime_debug() {
            debug!(
                condition = condition.description.as_deref().unwrap_or_default(),
                left = %left,
                right = %right,
                outcome,
                "Evaluated condition"
            );
        }
        Ok(outcome)
    }

    fn trace(&self, name: &str) {
        if !self.engine.runtime_debug() {
            return;
        }
        let head = name.split('.').next().unwrap_or(name);
        if let Some(variable) = self.table.get(head) {
            debug!(variable = name, value = %variable.value, "Assigned variable");
        }
    }
}

/// Integers and decimals compare by numeric value
fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Integer(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Integer(a)) => {
            (*a as f64) == *b
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Decimal(a), Value::Decimal(b)) => a.partial_cmp(b),
        (Value::Integer(a), Value::Decimal(b)) => (*a as f64).partial_cmp(b),
        (Value::Decimal(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_kinds() {
        assert!(equal(&Value::Integer(2), &Value::Decimal(2.0)));
        assert!(equal(&Value::Decimal(2.0), &Value::Integer(2)));
        assert!(!equal(&Value::Integer(2), &Value::String("2".into())));
        assert!(equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_ordering() {
        assert_eq!(compare(&Value::Integer(1), &Value::Decimal(1.5)), Some(Ordering::Less));
        assert_eq!(
            compare(&Value::String("b".into()), &Value::String("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(compare(&Value::Null, &Value::Integer(1)), None);
    }
}
