//! The `dedup` operator: drop repeated records by field combination.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::cell::Cell;
use crate::processors::Processor;
use crate::stream::Fetched;

fn default_allowance() -> u64 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupOptions {
    /// Fields forming the dedup key.
    pub fields: Vec<String>,
    /// How many records with the same key to keep.
    #[serde(default = "default_allowance")]
    pub keep: u64,
    /// Only suppress immediate repeats instead of tracking all seen keys.
    #[serde(default)]
    pub consecutive: bool,
}

pub struct DedupProcessor {
    options: DedupOptions,
    seen: HashMap<String, u64>,
    previous_key: Option<String>,
}

impl DedupProcessor {
    pub fn new(options: DedupOptions) -> Self {
        Self {
            options,
            seen: HashMap::new(),
            previous_key: None,
        }
    }

    fn key_for(&self, batch: &Batch, row: usize) -> String {
        let record = batch.record(row);
        let mut key = String::new();
        for field in &self.options.fields {
            let cell = record.read_column(field).unwrap_or(&Cell::Null);
            key.push_str(&cell.display_string());
            key.push('\u{1f}');
        }
        key
    }
}

impl Processor for DedupProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        let Some(mut batch) = input else {
            return Ok(Fetched::done(None));
        };

        let mut dropped = Vec::new();
        for row in 0..batch.num_records() {
            let key = self.key_for(&batch, row);
            if self.options.consecutive {
                if self.previous_key.as_deref() == Some(key.as_str()) {
                    dropped.push(row);
                }
                self.previous_key = Some(key);
            } else {
                let count = self.seen.entry(key).or_insert(0);
                if *count >= self.options.keep {
                    dropped.push(row);
                } else {
                    *count += 1;
                }
            }
        }
        batch.discard_rows(&dropped)?;
        Ok(Fetched::batch(batch))
    }

    fn rewind(&mut self) {
        self.seen.clear();
        self.previous_key = None;
    }
}
