//! The columnar batch moving between pipeline stages.
//!
//! A [`Batch`] holds named columns of equal length in insertion order. Columns
//! a record lacks are backfilled with [`Cell::Null`], so every column is
//! always exactly `num_records` cells long. [`Record`] is a cheap row view
//! over a batch, used by comparators and expression evaluation.
//!
//! [`Batch::merge_sorted`] implements the k-way merge used when a stage has
//! several upstreams: it consumes records in comparator order only until the
//! first input runs dry, returning the unconsumed remainder of every other
//! input so the caller can replay it on the next round.

use std::collections::HashMap;

use anyhow::{Result, bail};

use crate::cell::Cell;

/// Column name carrying the record timestamp in milliseconds.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// An ordered set of named, equal-length columns.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    column_order: Vec<String>,
    columns: HashMap<String, Vec<Cell>>,
    num_records: usize,
}

/// A borrowed view of one row of a [`Batch`].
#[derive(Clone, Copy)]
pub struct Record<'a> {
    batch: &'a Batch,
    row: usize,
}

impl<'a> Record<'a> {
    /// The cell for `column`, or `None` if the batch has no such column.
    pub fn read_column(&self, column: &str) -> Option<&'a Cell> {
        self.batch.columns.get(column).map(|col| &col[self.row])
    }

    /// The record timestamp, when present and numeric.
    pub fn timestamp(&self) -> Option<u64> {
        self.read_column(TIMESTAMP_KEY).and_then(Cell::as_u64)
    }
}

/// Result of [`Batch::merge_sorted`].
pub struct MergeOutcome {
    /// Records taken from the inputs, in comparator order.
    pub merged: Batch,
    /// Index of the first input that was fully consumed.
    pub exhausted: usize,
    /// Per-input unconsumed remainder, `None` where an input was drained.
    /// Parallel to the input vector.
    pub leftovers: Vec<Option<Batch>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from `(name, cells)` pairs. All columns must be the same
    /// length.
    pub fn from_columns(columns: Vec<(String, Vec<Cell>)>) -> Result<Self> {
        let mut batch = Self::new();
        batch.append_known_values(columns)?;
        Ok(batch)
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn read_column(&self, name: &str) -> Result<&[Cell]> {
        match self.columns.get(name) {
            Some(col) => Ok(col),
            None => bail!("batch has no column <{name}>"),
        }
    }

    /// Insert or replace columns. Each column must match the batch length; a
    /// batch with no columns yet adopts the length of the first insert.
    pub fn append_known_values(&mut self, columns: Vec<(String, Vec<Cell>)>) -> Result<()> {
        for (name, cells) in columns {
            if self.column_order.is_empty() && self.columns.is_empty() {
                self.num_records = cells.len();
            } else if cells.len() != self.num_records {
                bail!(
                    "column <{name}> has {} cells, batch has {} records",
                    cells.len(),
                    self.num_records
                );
            }
            if !self.columns.contains_key(&name) {
                self.column_order.push(name.clone());
            }
            self.columns.insert(name, cells);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        let Some(cells) = self.columns.remove(old) else {
            bail!("cannot rename missing column <{old}>");
        };
        if self.columns.insert(new.to_string(), cells).is_some() {
            // The target name already existed; its slot in the order vector
            // stays, the old name's slot goes away.
            self.column_order.retain(|name| name != old);
        } else if let Some(slot) = self.column_order.iter_mut().find(|name| *name == old) {
            *slot = new.to_string();
        }
        Ok(())
    }

    /// Drop the rows at `indices` (must be sorted ascending, no duplicates).
    pub fn discard_rows(&mut self, indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        if indices.windows(2).any(|w| w[0] >= w[1]) {
            bail!("row indices to discard must be sorted and unique");
        }
        if *indices.last().unwrap() >= self.num_records {
            bail!(
                "cannot discard row {} from a batch of {} records",
                indices.last().unwrap(),
                self.num_records
            );
        }
        for col in self.columns.values_mut() {
            let mut drop_at = indices.iter().copied().peekable();
            let mut row = 0;
            col.retain(|_| {
                let keep = drop_at.peek() != Some(&row);
                if !keep {
                    drop_at.next();
                }
                row += 1;
                keep
            });
        }
        self.num_records -= indices.len();
        Ok(())
    }

    /// Drop the first `count` rows.
    pub fn discard_front(&mut self, count: usize) -> Result<()> {
        if count > self.num_records {
            bail!(
                "cannot discard {count} rows from a batch of {} records",
                self.num_records
            );
        }
        for col in self.columns.values_mut() {
            col.drain(..count);
        }
        self.num_records -= count;
        Ok(())
    }

    /// Keep only the first `count` rows.
    pub fn truncate_records(&mut self, count: usize) {
        if count >= self.num_records {
            return;
        }
        for col in self.columns.values_mut() {
            col.truncate(count);
        }
        self.num_records = count;
    }

    pub fn reverse_records(&mut self) {
        for col in self.columns.values_mut() {
            col.reverse();
        }
    }

    /// Append all records of `other`, backfilling columns either side lacks.
    pub fn append(&mut self, other: Batch) -> Result<()> {
        let added = other.num_records;
        for name in &other.column_order {
            if !self.columns.contains_key(name) {
                self.column_order.push(name.clone());
                self.columns
                    .insert(name.clone(), vec![Cell::Null; self.num_records]);
            }
        }
        for (name, col) in self.columns.iter_mut() {
            match other.columns.get(name) {
                Some(cells) => col.extend(cells.iter().cloned()),
                None => col.extend(std::iter::repeat_n(Cell::Null, added)),
            }
        }
        self.num_records += added;
        Ok(())
    }

    pub fn record(&self, row: usize) -> Record<'_> {
        Record { batch: self, row }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        (0..self.num_records).map(|row| self.record(row))
    }

    /// Stable in-place sort by a strict-less comparator over row views.
    pub fn sort_records(&mut self, less: &dyn Fn(&Record<'_>, &Record<'_>) -> bool) {
        let mut order: Vec<usize> = (0..self.num_records).collect();
        order.sort_by(|&a, &b| {
            let ra = self.record(a);
            let rb = self.record(b);
            if less(&ra, &rb) {
                std::cmp::Ordering::Less
            } else if less(&rb, &ra) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        for col in self.columns.values_mut() {
            let mut permuted = Vec::with_capacity(col.len());
            for &row in &order {
                permuted.push(col[row].clone());
            }
            *col = permuted;
        }
    }

    /// K-way merge of sorted inputs. Records are taken in `less` order until
    /// the first input runs dry; the remainder of every other input comes back
    /// as a leftover. The merged batch carries the union of all input columns,
    /// backfilled where an input lacks one.
    pub fn merge_sorted(
        batches: Vec<Batch>,
        less: &dyn Fn(&Record<'_>, &Record<'_>) -> bool,
    ) -> Result<MergeOutcome> {
        if batches.is_empty() {
            bail!("cannot merge zero batches");
        }
        let mut merged = Batch::new();
        for batch in &batches {
            for name in &batch.column_order {
                if !merged.columns.contains_key(name) {
                    merged.column_order.push(name.clone());
                    merged.columns.insert(name.clone(), Vec::new());
                }
            }
        }

        if let Some(empty) = batches.iter().position(Batch::is_empty) {
            let leftovers = batches
                .into_iter()
                .enumerate()
                .map(|(i, b)| if i == empty { None } else { Some(b) })
                .collect();
            return Ok(MergeOutcome {
                merged,
                exhausted: empty,
                leftovers,
            });
        }

        let mut cursors = vec![0usize; batches.len()];
        let exhausted = loop {
            let mut best = 0;
            for i in 1..batches.len() {
                let candidate = batches[i].record(cursors[i]);
                let current = batches[best].record(cursors[best]);
                if less(&candidate, &current) {
                    best = i;
                }
            }
            let taken = batches[best].record(cursors[best]);
            for name in &merged.column_order {
                let cell = taken.read_column(name).cloned().unwrap_or(Cell::Null);
                if let Some(col) = merged.columns.get_mut(name) {
                    col.push(cell);
                }
            }
            merged.num_records += 1;
            cursors[best] += 1;
            if cursors[best] == batches[best].num_records {
                break best;
            }
        };

        let leftovers = batches
            .into_iter()
            .zip(cursors)
            .map(|(mut batch, taken)| {
                if taken == batch.num_records {
                    Ok(None)
                } else {
                    batch.discard_front(taken)?;
                    Ok(Some(batch))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MergeOutcome {
            merged,
            exhausted,
            leftovers,
        })
    }
}
