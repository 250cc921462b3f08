//! Target code: the language the translator emits
//!
//! Parsed with pest into a typed tree that the runtime evaluates. Precedence
//! is encoded in the grammar layers (`*_sum` over `*_product`, `bool_or` over
//! `bool_and`), so the builder only folds each layer left to right.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PrimitiveKind, ResultKind, Value};

/* ===================== Target Tree ===================== */

/// Parsed `return <value>;` statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetExpr {
    pub kind: ResultKind,
    pub root: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Literal(Value),
    /// Variable or field read through a coercion accessor (`.int()`)
    Read { access: Access, kind: PrimitiveKind },
    /// Record or array element, returned as is
    Reference(Access),
    Null,
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// `var("C").field("Owner").at(0)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    pub variable: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Field(String),
    Index(usize),
}

impl fmt::Display for Access {
    /// DSL spelling: `C.Owner.Name`, `Arr[1]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.variable)?;
        for step in &self.steps {
            match step {
                Step::Field(name) => write!(f, ".{}", name)?,
                Step::Index(index) => write!(f, "[{}]", index + 1)?,
            }
        }
        Ok(())
    }
}

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "compiler/target.pest"]
struct TargetParser;

type BuildResult<T> = Result<T, String>;

/// Parse target code into a typed tree
pub fn parse_target(code: &str) -> BuildResult<TargetExpr> {
    let mut pairs = TargetParser::parse(Rule::program, code).map_err(|e| e.to_string())?;
    let program = next_pair(&mut pairs, "program")?;

    // program = { SOI ~ "return" ~ value ~ ";" ~ EOI }
    let mut inner = program.into_inner();
    let value = next_pair(&mut inner, "value")?;
    build_value(value)
}

/* ===================== Tree Builder ===================== */

fn build_value(pair: Pair<Rule>) -> BuildResult<TargetExpr> {
    let (kind, root) = match pair.as_rule() {
        Rule::int_value => (ResultKind::Integer, build_node(single_inner(pair)?)?),
        Rule::dec_value => (ResultKind::Decimal, build_node(single_inner(pair)?)?),
        Rule::bool_value => (ResultKind::Boolean, build_node(single_inner(pair)?)?),
        Rule::str_value => (ResultKind::String, build_node(single_inner(pair)?)?),
        Rule::null => (ResultKind::Null, Node::Null),
        Rule::access => (ResultKind::Reference, Node::Reference(build_access(pair)?)),
        other => return Err(format!("Unexpected value rule: {:?}", other)),
    };
    Ok(TargetExpr { kind, root })
}

fn build_node(pair: Pair<Rule>) -> BuildResult<Node> {
    match pair.as_rule() {
        Rule::int_sum
        | Rule::int_product
        | Rule::dec_sum
        | Rule::dec_product
        | Rule::bool_or
        | Rule::bool_and
        | Rule::str_concat => {
            // layer = { operand ~ (op ~ operand)* }
            let mut inner = pair.into_inner();
            let mut node = build_node(next_pair(&mut inner, "operand")?)?;
            while let Some(op) = inner.next() {
                let rhs = build_node(next_pair(&mut inner, "right operand")?)?;
                node = Node::Binary {
                    op: build_op(&op)?,
                    lhs: Box::new(node),
                    rhs: Box::new(rhs),
                };
            }
            Ok(node)
        }
        Rule::int_read => build_read(pair, PrimitiveKind::Integer),
        Rule::dec_read => build_read(pair, PrimitiveKind::Decimal),
        Rule::bool_read => build_read(pair, PrimitiveKind::Boolean),
        Rule::str_read => build_read(pair, PrimitiveKind::String),
        Rule::integer => {
            let text = pair.as_str();
            let value = text
                .parse::<i64>()
                .map_err(|_| format!("Integer literal [{}] is out of range", text))?;
            Ok(Node::Literal(Value::Integer(value)))
        }
        Rule::decimal => {
            let text = pair.as_str();
            let value = text
                .parse::<f64>()
                .map_err(|e| format!("Failed to parse decimal [{}]: {}", text, e))?;
            Ok(Node::Literal(Value::Decimal(value)))
        }
        Rule::boolean => Ok(Node::Literal(Value::Boolean(pair.as_str() == "true"))),
        Rule::string => Ok(Node::Literal(Value::String(build_string(pair)?))),
        other => Err(format!("Unexpected expression rule: {:?}", other)),
    }
}

fn build_read(pair: Pair<Rule>, kind: PrimitiveKind) -> BuildResult<Node> {
    // *_read = { access ~ "." ~ "<kind>" ~ "(" ~ ")" }
    let access = build_access(single_inner(pair)?)?;
    Ok(Node::Read { access, kind })
}

fn build_access(pair: Pair<Rule>) -> BuildResult<Access> {
    // access = { "var" ~ "(" ~ string ~ ")" ~ step* }
    let mut inner = pair.into_inner();
    let variable = build_string(next_pair(&mut inner, "variable name")?)?;

    let steps = inner
        .map(|step| -> BuildResult<Step> {
            match step.as_rule() {
                Rule::field => Ok(Step::Field(build_string(single_inner(step)?)?)),
                Rule::index => {
                    let text = single_inner(step)?.as_str().to_string();
                    text.parse::<usize>()
                        .map(Step::Index)
                        .map_err(|_| format!("Element index [{}] is out of range", text))
                }
                other => Err(format!("Unexpected access step: {:?}", other)),
            }
        })
        .collect::<BuildResult<Vec<_>>>()?;

    Ok(Access { variable, steps })
}

fn build_op(pair: &Pair<Rule>) -> BuildResult<BinaryOp> {
    match pair.as_rule() {
        Rule::add => Ok(BinaryOp::Add),
        Rule::sub => Ok(BinaryOp::Sub),
        Rule::mul => Ok(BinaryOp::Mul),
        Rule::div => Ok(BinaryOp::Div),
        Rule::and => Ok(BinaryOp::And),
        Rule::or => Ok(BinaryOp::Or),
        other => Err(format!("Unexpected operator rule: {:?}", other)),
    }
}

fn build_string(pair: Pair<Rule>) -> BuildResult<String> {
    // string = ${ "\"" ~ string_inner ~ "\"" }
    let raw = single_inner(pair)?.as_str();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn single_inner(pair: Pair<Rule>) -> BuildResult<Pair<Rule>> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| format!("Empty {:?}", rule))
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> BuildResult<Pair<'i, Rule>> {
    pairs.next().ok_or_else(|| format!("Missing {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(variable: &str, kind: PrimitiveKind) -> Node {
        Node::Read {
            access: Access {
                variable: variable.to_string(),
                steps: vec![],
            },
            kind,
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_target(r#"return int(1 + var("A").int() * 3);"#).unwrap();
        assert_eq!(expr.kind, ResultKind::Integer);
        assert_eq!(
            expr.root,
            Node::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Node::Literal(Value::Integer(1))),
                rhs: Box::new(Node::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(read("A", PrimitiveKind::Integer)),
                    rhs: Box::new(Node::Literal(Value::Integer(3))),
                }),
            }
        );
    }

    #[test]
    fn test_left_associative() {
        let expr = parse_target("return int(8 - 2 - 1);").unwrap();
        let Node::Binary { op, lhs, rhs } = expr.root else {
            panic!("expected binary node");
        };
        assert_eq!(op, BinaryOp::Sub);
        assert_eq!(*rhs, Node::Literal(Value::Integer(1)));
        assert!(matches!(*lhs, Node::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn test_negative_literals() {
        let expr = parse_target("return dec(-.5 - -1.25);").unwrap();
        assert_eq!(
            expr.root,
            Node::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Node::Literal(Value::Decimal(-0.5))),
                rhs: Box::new(Node::Literal(Value::Decimal(-1.25))),
            }
        );
    }

    #[test]
    fn test_boolean_precedence() {
        let expr = parse_target("return bool(true || false && false);").unwrap();
        let Node::Binary { op, .. } = expr.root else {
            panic!("expected binary node");
        };
        assert_eq!(op, BinaryOp::Or);
    }

    #[test]
    fn test_access_steps() {
        let expr =
            parse_target(r#"return str(var("C").field("Owner").field("Name").str());"#).unwrap();
        let Node::Read { access, kind } = expr.root else {
            panic!("expected read");
        };
        assert_eq!(kind, PrimitiveKind::String);
        assert_eq!(access.to_string(), "C.Owner.Name");

        let expr = parse_target(r#"return var("Arr").at(2);"#).unwrap();
        assert_eq!(expr.kind, ResultKind::Reference);
        let Node::Reference(access) = expr.root else {
            panic!("expected reference");
        };
        assert_eq!(access.steps, vec![Step::Index(2)]);
        assert_eq!(access.to_string(), "Arr[3]");
    }

    #[test]
    fn test_string_escapes() {
        let expr = parse_target(r#"return str("a \"b\" \\ c");"#).unwrap();
        assert_eq!(
            expr.root,
            Node::Literal(Value::String(r#"a "b" \ c"#.to_string()))
        );
    }

    #[test]
    fn test_malformed_code_is_rejected() {
        for code in [
            "return int(1 +);",
            "return int(1.5);",
            "return dec(1 + 2);",
            "return str(\"a\" - \"b\");",
            "int(1);",
            "return int(1)",
            r#"return var(A);"#,
            "return int(99999999999999999999);",
        ] {
            assert!(parse_target(code).is_err(), "{} should be rejected", code);
        }
    }
}
