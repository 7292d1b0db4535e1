//! The `where` operator: keep records matching a predicate.

use std::collections::BTreeSet;

use anyhow::Result;
use log::debug;

use crate::batch::Batch;
use crate::expr::BoolExpr;
use crate::processors::{Processor, record_fields};
use crate::stream::Fetched;

pub struct WhereProcessor {
    predicate: BoolExpr,
    required: BTreeSet<String>,
}

impl WhereProcessor {
    pub fn new(predicate: BoolExpr) -> Self {
        let mut required = BTreeSet::new();
        predicate.fields(&mut required);
        Self {
            predicate,
            required,
        }
    }
}

impl Processor for WhereProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        let Some(mut batch) = input else {
            return Ok(Fetched::done(None));
        };

        let mut dropped = Vec::new();
        for (row, record) in batch.records().enumerate() {
            let fields = record_fields(&record, &self.required);
            // A record the predicate cannot be evaluated on is dropped, not
            // fatal to the batch.
            match self.predicate.evaluate(&fields) {
                Ok(true) => {}
                Ok(false) => dropped.push(row),
                Err(err) => {
                    debug!("where: dropping record {row}: {err:#}");
                    dropped.push(row);
                }
            }
        }
        batch.discard_rows(&dropped)?;
        Ok(Fetched::batch(batch))
    }

    fn rewind(&mut self) {}
}
