//! The `sort` operator: multi-key bottleneck sort with an optional limit.
//!
//! Keys compare numerically when both sides coerce to numbers and fall back
//! to string comparison otherwise; nulls order first. The comparator and
//! limit are exposed so a downstream stage merging several sorted upstreams
//! can adopt them.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::cell::Cell;
use crate::processors::Processor;
use crate::stage::RecordCompare;
use crate::stream::Fetched;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SortElement {
    pub field: String,
    pub ascending: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SortOptions {
    pub elements: Vec<SortElement>,
    #[serde(default)]
    pub limit: Option<u64>,
}

pub struct SortProcessor {
    options: SortOptions,
    comparator: RecordCompare,
    buffer: Option<Batch>,
}

impl SortProcessor {
    pub fn new(options: SortOptions) -> Self {
        let comparator = comparator_for(options.elements.clone());
        Self {
            options,
            comparator,
            buffer: None,
        }
    }
}

fn comparator_for(elements: Vec<SortElement>) -> RecordCompare {
    Arc::new(move |a, b| {
        for element in &elements {
            let left = a.read_column(&element.field).unwrap_or(&Cell::Null);
            let right = b.read_column(&element.field).unwrap_or(&Cell::Null);
            let ord = left.compare(right);
            if ord.is_ne() {
                return if element.ascending {
                    ord.is_lt()
                } else {
                    ord.is_gt()
                };
            }
        }
        false
    })
}

impl Processor for SortProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        match input {
            Some(batch) => {
                self.buffer.get_or_insert_with(Batch::new).append(batch)?;
                Ok(Fetched::default())
            }
            None => {
                let mut out = self.buffer.take().unwrap_or_default();
                let comparator = Arc::clone(&self.comparator);
                out.sort_records(comparator.as_ref());
                if let Some(limit) = self.options.limit {
                    out.truncate_records(limit as usize);
                }
                Ok(Fetched::done(Some(out)))
            }
        }
    }

    fn rewind(&mut self) {
        self.buffer = None;
    }

    fn output_order(&self) -> Option<(RecordCompare, Option<u64>)> {
        Some((Arc::clone(&self.comparator), self.options.limit))
    }
}
