//! The scalar value type flowing through batches.
//!
//! Every column of a [`crate::Batch`] is a vector of [`Cell`]s. A `Cell` is a
//! tagged scalar: it can hold a string, a signed or unsigned integer, a float,
//! a list of strings (multi-value fields), or the null/backfill sentinel used
//! when a record has no value for a column.
//!
//! Coercions are explicit and fallible. Comparison is numeric-first: two cells
//! that both coerce to a number compare by value, everything else falls back
//! to lexicographic string comparison, and null orders before any value.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// A single scalar value in a batch column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    /// Missing value; also the backfill sentinel for columns a record lacks.
    Null,
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Multi-value field.
    StrList(Vec<String>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell. Strings do not coerce here; see
    /// [`Cell::coerce_f64`] for the lenient variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::UInt(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view that also parses numeric strings.
    pub fn coerce_f64(&self) -> Option<f64> {
        match self {
            Cell::Str(s) => s.trim().parse::<f64>().ok(),
            other => other.as_f64(),
        }
    }

    /// Unsigned view, used for timestamps.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Cell::UInt(v) => Some(*v),
            Cell::Int(v) => u64::try_from(*v).ok(),
            Cell::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Render the cell the way it appears in bucket keys and result columns.
    ///
    /// Floats with no fractional part print without a trailing `.0` so that
    /// `200.0` and `200` produce the same key.
    pub fn display_string(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Str(s) => s.clone(),
            Cell::Int(v) => v.to_string(),
            Cell::UInt(v) => v.to_string(),
            Cell::Float(v) => format_float(*v),
            Cell::StrList(items) => items.join(","),
        }
    }

    /// Numeric-then-string total order. Null sorts before everything.
    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match (self.coerce_f64(), other.coerce_f64()) {
            (Some(a), Some(b)) => OrderedFloat(a).cmp(&OrderedFloat(b)),
            _ => self.display_string().cmp(&other.display_string()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Str(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Str(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Cell::UInt(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
