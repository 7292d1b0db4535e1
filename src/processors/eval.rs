//! The `eval` operator: add or overwrite a column computed per record.

use std::collections::BTreeSet;

use anyhow::Result;
use log::debug;

use crate::batch::Batch;
use crate::cell::Cell;
use crate::expr::ValueExpr;
use crate::processors::{Processor, record_fields};
use crate::stream::Fetched;

pub struct EvalProcessor {
    field: String,
    expr: ValueExpr,
    required: BTreeSet<String>,
}

impl EvalProcessor {
    pub fn new(field: String, expr: ValueExpr) -> Self {
        let mut required = BTreeSet::new();
        expr.fields(&mut required);
        Self {
            field,
            expr,
            required,
        }
    }
}

impl Processor for EvalProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        let Some(mut batch) = input else {
            return Ok(Fetched::done(None));
        };

        let mut computed = Vec::with_capacity(batch.num_records());
        for (row, record) in batch.records().enumerate() {
            let fields = record_fields(&record, &self.required);
            match self.expr.evaluate(&fields) {
                Ok(cell) => computed.push(cell),
                Err(err) => {
                    debug!("eval <{}>: record {row}: {err:#}", self.field);
                    computed.push(Cell::Null);
                }
            }
        }
        batch.append_known_values(vec![(self.field.clone(), computed)])?;
        Ok(Fetched::batch(batch))
    }

    fn rewind(&mut self) {}
}
