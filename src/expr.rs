//! A small expression language evaluated per record.
//!
//! Filter predicates, computed columns, streamstats reset conditions and
//! measure gates all share these trees. Evaluation happens against a
//! field-name to [`Cell`] map for one record; a referenced field the record
//! lacks evaluates as null, and comparisons involving null are indeterminate
//! rather than false so callers can decide how to treat them.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;

/// A match pattern compiled exactly once, at construction or
/// deserialization. A bad pattern is rejected there instead of on every
/// record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MatchPattern(Regex);

impl MatchPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid match pattern <{pattern}>"))?;
        Ok(Self(re))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for MatchPattern {
    type Err = anyhow::Error;

    fn from_str(pattern: &str) -> Result<Self> {
        Self::new(pattern)
    }
}

impl TryFrom<String> for MatchPattern {
    type Error = anyhow::Error;

    fn try_from(pattern: String) -> Result<Self> {
        Self::new(&pattern)
    }
}

impl From<MatchPattern> for String {
    fn from(pattern: MatchPattern) -> String {
        pattern.0.as_str().to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// An expression producing a scalar value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueExpr {
    Field(String),
    Literal(Cell),
    Arith {
        op: ArithOp,
        left: Box<ValueExpr>,
        right: Box<ValueExpr>,
    },
}

/// An expression producing a boolean.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolExpr {
    Cmp {
        op: CmpOp,
        left: ValueExpr,
        right: ValueExpr,
    },
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Not(Box<BoolExpr>),
    /// Regex match of a field's string rendering.
    Matches { field: String, pattern: MatchPattern },
}

impl ValueExpr {
    /// Collect every field name the expression reads.
    pub fn fields(&self, out: &mut BTreeSet<String>) {
        match self {
            ValueExpr::Field(name) => {
                out.insert(name.clone());
            }
            ValueExpr::Literal(_) => {}
            ValueExpr::Arith { left, right, .. } => {
                left.fields(out);
                right.fields(out);
            }
        }
    }

    /// Evaluate against one record's fields. Missing fields read as null;
    /// arithmetic on non-numeric operands is an error.
    pub fn evaluate(&self, fields: &HashMap<String, Cell>) -> Result<Cell> {
        match self {
            ValueExpr::Field(name) => Ok(fields.get(name).cloned().unwrap_or(Cell::Null)),
            ValueExpr::Literal(cell) => Ok(cell.clone()),
            ValueExpr::Arith { op, left, right } => {
                let lhs = left.evaluate(fields)?;
                let rhs = right.evaluate(fields)?;
                let (Some(a), Some(b)) = (lhs.coerce_f64(), rhs.coerce_f64()) else {
                    bail!(
                        "arithmetic requires numeric operands, got <{}> and <{}>",
                        lhs.display_string(),
                        rhs.display_string()
                    );
                };
                let out = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => {
                        if b == 0.0 {
                            bail!("division by zero");
                        }
                        a / b
                    }
                };
                Ok(Cell::Float(out))
            }
        }
    }
}

impl BoolExpr {
    pub fn fields(&self, out: &mut BTreeSet<String>) {
        match self {
            BoolExpr::Cmp { left, right, .. } => {
                left.fields(out);
                right.fields(out);
            }
            BoolExpr::And(a, b) | BoolExpr::Or(a, b) => {
                a.fields(out);
                b.fields(out);
            }
            BoolExpr::Not(inner) => inner.fields(out),
            BoolExpr::Matches { field, .. } => {
                out.insert(field.clone());
            }
        }
    }

    /// Strict evaluation: an indeterminate result (a null operand) reads as
    /// false.
    pub fn evaluate(&self, fields: &HashMap<String, Cell>) -> Result<bool> {
        Ok(self.evaluate_with_null(fields)?.unwrap_or(false))
    }

    /// Evaluation preserving the indeterminate case: `None` means a compared
    /// operand was null, which some operators treat differently from false.
    pub fn evaluate_with_null(&self, fields: &HashMap<String, Cell>) -> Result<Option<bool>> {
        match self {
            BoolExpr::Cmp { op, left, right } => {
                let lhs = left.evaluate(fields)?;
                let rhs = right.evaluate(fields)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(None);
                }
                let ord = lhs.compare(&rhs);
                let holds = match op {
                    CmpOp::Eq => ord.is_eq(),
                    CmpOp::Ne => ord.is_ne(),
                    CmpOp::Lt => ord.is_lt(),
                    CmpOp::Le => ord.is_le(),
                    CmpOp::Gt => ord.is_gt(),
                    CmpOp::Ge => ord.is_ge(),
                };
                Ok(Some(holds))
            }
            BoolExpr::And(a, b) => {
                match (a.evaluate_with_null(fields)?, b.evaluate_with_null(fields)?) {
                    (Some(false), _) | (_, Some(false)) => Ok(Some(false)),
                    (Some(true), Some(true)) => Ok(Some(true)),
                    _ => Ok(None),
                }
            }
            BoolExpr::Or(a, b) => {
                match (a.evaluate_with_null(fields)?, b.evaluate_with_null(fields)?) {
                    (Some(true), _) | (_, Some(true)) => Ok(Some(true)),
                    (Some(false), Some(false)) => Ok(Some(false)),
                    _ => Ok(None),
                }
            }
            BoolExpr::Not(inner) => Ok(inner.evaluate_with_null(fields)?.map(|b| !b)),
            BoolExpr::Matches { field, pattern } => {
                let Some(cell) = fields.get(field) else {
                    return Ok(None);
                };
                if cell.is_null() {
                    return Ok(None);
                }
                Ok(Some(pattern.is_match(&cell.display_string())))
            }
        }
    }
}

/// Shorthand for `field <op> literal`, the most common predicate shape.
pub fn field_cmp(field: &str, op: CmpOp, literal: impl Into<Cell>) -> BoolExpr {
    BoolExpr::Cmp {
        op,
        left: ValueExpr::Field(field.to_string()),
        right: ValueExpr::Literal(literal.into()),
    }
}
