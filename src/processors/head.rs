//! The `head` operator: keep leading records, by count or by condition.
//!
//! The plain form passes records through until a row cap is reached; the
//! fetch that reaches the cap carries the truncated batch together with the
//! end-of-data signal. The conditional form keeps records while a predicate
//! holds, with two escape hatches: `keep_last` also emits the first failing
//! record, and `keep_null` treats an indeterminate predicate (a null operand)
//! as holding instead of failing.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::expr::BoolExpr;
use crate::processors::{Processor, record_fields};
use crate::stream::Fetched;

fn default_max_rows() -> u64 {
    u64::MAX
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeadOptions {
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default)]
    pub predicate: Option<BoolExpr>,
    /// Also keep the first record the predicate fails on.
    #[serde(default)]
    pub keep_last: bool,
    /// Treat an indeterminate predicate as holding.
    #[serde(default)]
    pub keep_null: bool,
}

impl HeadOptions {
    pub fn limit(max_rows: u64) -> Self {
        Self {
            max_rows,
            predicate: None,
            keep_last: false,
            keep_null: false,
        }
    }
}

pub struct HeadProcessor {
    options: HeadOptions,
    required: BTreeSet<String>,
    rows_sent: u64,
    finished: bool,
}

impl HeadProcessor {
    pub fn new(options: HeadOptions) -> Self {
        let mut required = BTreeSet::new();
        if let Some(predicate) = &options.predicate {
            predicate.fields(&mut required);
        }
        Self {
            options,
            required,
            rows_sent: 0,
            finished: false,
        }
    }

    fn limit_only(&mut self, mut batch: Batch) -> Fetched {
        let remaining = self.options.max_rows - self.rows_sent;
        let n = batch.num_records() as u64;
        if n < remaining {
            self.rows_sent += n;
            return Fetched::batch(batch);
        }
        batch.truncate_records(remaining as usize);
        self.rows_sent = self.options.max_rows;
        self.finished = true;
        Fetched::done(Some(batch))
    }

    fn conditional(&mut self, mut batch: Batch, predicate: &BoolExpr) -> Result<Fetched> {
        let mut keep = 0usize;
        let mut stopped = false;
        for record in batch.records() {
            if self.rows_sent + keep as u64 >= self.options.max_rows {
                stopped = true;
                break;
            }
            let fields = record_fields(&record, &self.required);
            let holds = match predicate.evaluate_with_null(&fields)? {
                Some(holds) => holds,
                None => self.options.keep_null,
            };
            if holds {
                keep += 1;
            } else {
                if self.options.keep_last {
                    keep += 1;
                }
                stopped = true;
                break;
            }
        }
        batch.truncate_records(keep);
        self.rows_sent += keep as u64;
        if stopped {
            self.finished = true;
            Ok(Fetched::done(Some(batch)))
        } else {
            Ok(Fetched::batch(batch))
        }
    }
}

impl Processor for HeadProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        if self.finished {
            return Ok(Fetched::done(None));
        }
        let Some(batch) = input else {
            return Ok(Fetched::done(None));
        };
        match self.options.predicate.clone() {
            None => Ok(self.limit_only(batch)),
            Some(predicate) => self.conditional(batch, &predicate),
        }
    }

    fn rewind(&mut self) {
        self.rows_sent = 0;
        self.finished = false;
    }
}
