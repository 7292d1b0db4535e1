//! Testing utilities for query pipelines.
//!
//! Helpers for building batches tersely, a [`VecStream`] mock source that
//! serves a fixed sequence of batches and supports rewinding, and assertion
//! functions for comparing columns against expected values.
//!
//! ```no_run
//! use pipequery::testing::*;
//!
//! let batch = batch_of(&[("status", int_cells(&[200, 404, 500]))]).unwrap();
//! assert_column_eq(&batch, "status", &int_cells(&[200, 404, 500]));
//! ```

use anyhow::Result;

use crate::batch::Batch;
use crate::cell::Cell;
use crate::stream::{Fetched, Stream};

/// Build a batch from `(name, cells)` pairs.
pub fn batch_of(columns: &[(&str, Vec<Cell>)]) -> Result<Batch> {
    Batch::from_columns(
        columns
            .iter()
            .map(|(name, cells)| (name.to_string(), cells.clone()))
            .collect(),
    )
}

pub fn str_cells(values: &[&str]) -> Vec<Cell> {
    values.iter().map(|v| Cell::from(*v)).collect()
}

pub fn int_cells(values: &[i64]) -> Vec<Cell> {
    values.iter().map(|v| Cell::Int(*v)).collect()
}

pub fn uint_cells(values: &[u64]) -> Vec<Cell> {
    values.iter().map(|v| Cell::UInt(*v)).collect()
}

pub fn float_cells(values: &[f64]) -> Vec<Cell> {
    values.iter().map(|v| Cell::Float(*v)).collect()
}

/// Assert a column holds exactly `expected`.
///
/// # Panics
///
/// Panics with a diff-style message when the column is missing or differs.
pub fn assert_column_eq(batch: &Batch, column: &str, expected: &[Cell]) {
    let actual = batch
        .read_column(column)
        .unwrap_or_else(|_| panic!("expected column <{column}>, batch has {:?}", batch.column_names()));
    assert_eq!(
        actual, expected,
        "column <{column}> differs:\n  actual:   {actual:?}\n  expected: {expected:?}"
    );
}

/// Assert a column's cells render to exactly `expected` strings. Convenient
/// for aggregation results where float formatting would be noisy.
pub fn assert_column_display_eq(batch: &Batch, column: &str, expected: &[&str]) {
    let actual: Vec<String> = batch
        .read_column(column)
        .unwrap_or_else(|_| panic!("expected column <{column}>, batch has {:?}", batch.column_names()))
        .iter()
        .map(Cell::display_string)
        .collect();
    assert_eq!(
        actual, expected,
        "column <{column}> differs:\n  actual:   {actual:?}\n  expected: {expected:?}"
    );
}

/// Pull a stream until done, appending everything into one batch.
pub fn drain_stream(stream: &mut dyn Stream) -> Result<Batch> {
    let mut all = Batch::new();
    loop {
        let fetched = stream.fetch()?;
        if let Some(batch) = fetched.batch {
            all.append(batch)?;
        }
        if fetched.done {
            return Ok(all);
        }
    }
}

/// A mock stream serving a fixed sequence of batches, one per fetch.
///
/// The fetch serving the last batch also signals done. Tracks how many
/// fetches and rewinds happened so tests can assert on pull behavior.
pub struct VecStream {
    batches: Vec<Batch>,
    next: usize,
    pub fetch_count: usize,
    pub rewind_count: usize,
}

impl VecStream {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches,
            next: 0,
            fetch_count: 0,
            rewind_count: 0,
        }
    }

    pub fn single(batch: Batch) -> Self {
        Self::new(vec![batch])
    }

    /// One single-column batch per value, so each fetch serves one record.
    pub fn one_record_batches(column: &str, cells: Vec<Cell>) -> Result<Self> {
        let batches = cells
            .into_iter()
            .map(|cell| Batch::from_columns(vec![(column.to_string(), vec![cell])]))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(batches))
    }
}

impl Stream for VecStream {
    fn fetch(&mut self) -> Result<Fetched> {
        self.fetch_count += 1;
        if self.next >= self.batches.len() {
            return Ok(Fetched::done(None));
        }
        let batch = self.batches[self.next].clone();
        self.next += 1;
        if self.next == self.batches.len() {
            Ok(Fetched::done(Some(batch)))
        } else {
            Ok(Fetched::batch(batch))
        }
    }

    fn rewind(&mut self) {
        self.next = 0;
        self.rewind_count += 1;
    }
}
