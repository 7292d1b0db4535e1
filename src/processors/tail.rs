//! The `tail` operator: the last N records, most recent first.
//!
//! A bottleneck that keeps at most N buffered records while the input drains,
//! then emits them in reverse arrival order.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::processors::Processor;
use crate::stream::Fetched;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TailOptions {
    pub rows: u64,
}

pub struct TailProcessor {
    options: TailOptions,
    buffer: Option<Batch>,
}

impl TailProcessor {
    pub fn new(options: TailOptions) -> Self {
        Self {
            options,
            buffer: None,
        }
    }
}

impl Processor for TailProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        match input {
            Some(batch) => {
                let buffer = self.buffer.get_or_insert_with(Batch::new);
                buffer.append(batch)?;
                let excess = buffer
                    .num_records()
                    .saturating_sub(self.options.rows as usize);
                buffer.discard_front(excess)?;
                Ok(Fetched::default())
            }
            None => {
                let mut out = self.buffer.take().unwrap_or_default();
                out.reverse_records();
                Ok(Fetched::done(Some(out)))
            }
        }
    }

    fn rewind(&mut self) {
        self.buffer = None;
    }
}
