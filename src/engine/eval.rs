//! Evaluation of compiled expression trees against a variable table

use thiserror::Error;

use crate::compiler::target::{Access, BinaryOp, Node, Step};
use crate::compiler::TargetExpr;
use crate::types::{PrimitiveKind, Value};
use crate::variables::VariableTable;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Variable [{0}] is not declared")]
    UnknownVariable(String),

    #[error("[{0}] is null")]
    NullValue(String),

    #[error("[{access}] has no field [{field}]")]
    NoSuchField { access: String, field: String },

    #[error("[{0}] is not a record")]
    NotARecord(String),

    #[error("[{0}] is not an array")]
    NotAnArray(String),

    #[error("[{access}] has {len} element(s)")]
    OutOfBounds { access: String, len: usize },

    #[error("[{access}] holds [{value}], which is not a {kind} value")]
    WrongType {
        access: String,
        value: String,
        kind: &'static str,
    },

    #[error("Overflow in [{lhs} {op} {rhs}]")]
    Overflow { lhs: String, op: BinaryOp, rhs: String },

    #[error("Division by zero in [{lhs} / {rhs}]")]
    DivisionByZero { lhs: String, rhs: String },

    #[error("Operator [{op}] cannot combine [{lhs}] and [{rhs}]")]
    InvalidOperands { lhs: String, op: BinaryOp, rhs: String },

    #[error("[{lhs}] cannot be compared with [{rhs}]")]
    Incomparable { lhs: String, rhs: String },
}

/// Compute the value of `expr`. Records and array elements are returned by value.
pub fn evaluate(expr: &TargetExpr, variables: &VariableTable) -> Result<Value, EvalError> {
    eval_node(&expr.root, variables)
}

fn eval_node(node: &Node, variables: &VariableTable) -> Result<Value, EvalError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Null => Ok(Value::Null),
        Node::Reference(access) => resolve(access, variables).cloned(),
        Node::Read { access, kind } => read(access, *kind, variables),
        Node::Binary { op, lhs, rhs } => {
            let lhs = eval_node(lhs, variables)?;

            // && and || short-circuit
            match (op, &lhs) {
                (BinaryOp::And, Value::Boolean(false)) => return Ok(Value::Boolean(false)),
                (BinaryOp::Or, Value::Boolean(true)) => return Ok(Value::Boolean(true)),
                _ => {}
            }

            let rhs = eval_node(rhs, variables)?;
            apply(*op, lhs, rhs)
        }
    }
}

fn resolve<'v>(access: &Access, variables: &'v VariableTable) -> Result<&'v Value, EvalError> {
    let variable = variables
        .get(&access.variable)
        .ok_or_else(|| EvalError::UnknownVariable(access.variable.clone()))?;

    let mut current = &variable.value;
    let mut path = access.variable.clone();

    for step in &access.steps {
        current = match (step, current) {
            (_, Value::Null) => return Err(EvalError::NullValue(path)),
            (Step::Field(field), Value::Record(record)) => {
                record
                    .fields
                    .get(field)
                    .ok_or_else(|| EvalError::NoSuchField {
                        access: path.clone(),
                        field: field.clone(),
                    })?
            }
            (Step::Field(_), _) => return Err(EvalError::NotARecord(path)),
            (Step::Index(index), Value::Array(items)) => {
                items.get(*index).ok_or_else(|| EvalError::OutOfBounds {
                    access: path.clone(),
                    len: items.len(),
                })?
            }
            (Step::Index(_), _) => return Err(EvalError::NotAnArray(path)),
        };

        match step {
            Step::Field(field) => {
                path.push('.');
                path.push_str(field);
            }
            Step::Index(index) => path.push_str(&format!("[{}]", index + 1)),
        }
    }

    Ok(current)
}

fn read(access: &Access, kind: PrimitiveKind, variables: &VariableTable) -> Result<Value, EvalError> {
    let value = resolve(access, variables)?;
    match (kind, value) {
        (_, Value::Null) => Err(EvalError::NullValue(access.to_string())),
        (PrimitiveKind::Integer, Value::Integer(_))
        | (PrimitiveKind::Decimal, Value::Decimal(_))
        | (PrimitiveKind::Boolean, Value::Boolean(_))
        | (PrimitiveKind::String, Value::String(_)) => Ok(value.clone()),
        (PrimitiveKind::Decimal, Value::Integer(i)) => Ok(Value::Decimal(*i as f64)),
        (kind, other) => Err(EvalError::WrongType {
            access: access.to_string(),
            value: other.to_string(),
            kind: kind.name(),
        }),
    }
}

fn apply(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let overflow = |lhs: &Value, rhs: &Value| EvalError::Overflow {
        lhs: lhs.to_string(),
        op,
        rhs: rhs.to_string(),
    };

    match (op, &lhs, &rhs) {
        (BinaryOp::Div, Value::Integer(_), Value::Integer(0)) => Err(division_by_zero(&lhs, &rhs)),
        (_, Value::Integer(a), Value::Integer(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => a.checked_div(*b),
                BinaryOp::And | BinaryOp::Or => return Err(invalid(op, &lhs, &rhs)),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| overflow(&lhs, &rhs))
        }
        (BinaryOp::Div, Value::Decimal(_), Value::Decimal(b)) if *b == 0.0 => {
            Err(division_by_zero(&lhs, &rhs))
        }
        (_, Value::Decimal(a), Value::Decimal(b)) => {
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::And | BinaryOp::Or => return Err(invalid(op, &lhs, &rhs)),
            };
            if result.is_finite() {
                Ok(Value::Decimal(result))
            } else {
                Err(overflow(&lhs, &rhs))
            }
        }
        (BinaryOp::And, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a && *b)),
        (BinaryOp::Or, Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
        _ => Err(invalid(op, &lhs, &rhs)),
    }
}

fn division_by_zero(lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::DivisionByZero {
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    }
}

fn invalid(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::InvalidOperands {
        lhs: lhs.to_string(),
        op,
        rhs: rhs.to_string(),
    }
}
