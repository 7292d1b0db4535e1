//! The `fillnull` operator: replace missing values with a default.
//!
//! With an explicit field list this streams: each batch gets the listed
//! columns materialized and their null cells replaced. With no field list the
//! operator cannot know the full column set until it has seen every batch, so
//! it runs as a two-pass bottleneck: the first pass only collects column
//! names, then the stage replays the input and the second pass fills every
//! known column.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::cell::Cell;
use crate::processors::Processor;
use crate::stream::Fetched;

fn default_fill() -> String {
    "0".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FillNullOptions {
    #[serde(default = "default_fill")]
    pub value: String,
    /// Columns to fill; empty means every column seen anywhere in the input.
    #[serde(default)]
    pub fields: Vec<String>,
}

pub struct FillNullProcessor {
    options: FillNullOptions,
    known_columns: BTreeSet<String>,
    in_second_pass: bool,
}

impl FillNullProcessor {
    pub fn new(options: FillNullOptions) -> Self {
        Self {
            options,
            known_columns: BTreeSet::new(),
            in_second_pass: false,
        }
    }

    fn fill(&self, batch: &mut Batch, fields: &[String]) -> Result<()> {
        let fill = Cell::Str(self.options.value.clone());
        for field in fields {
            let filled = if batch.has_column(field) {
                batch
                    .read_column(field)?
                    .iter()
                    .map(|cell| {
                        if cell.is_null() {
                            fill.clone()
                        } else {
                            cell.clone()
                        }
                    })
                    .collect()
            } else {
                vec![fill.clone(); batch.num_records()]
            };
            batch.append_known_values(vec![(field.clone(), filled)])?;
        }
        Ok(())
    }
}

impl Processor for FillNullProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        if !self.options.fields.is_empty() {
            let Some(mut batch) = input else {
                return Ok(Fetched::done(None));
            };
            let fields = self.options.fields.clone();
            self.fill(&mut batch, &fields)?;
            return Ok(Fetched::batch(batch));
        }

        match input {
            Some(mut batch) => {
                if self.in_second_pass {
                    let fields: Vec<String> = self.known_columns.iter().cloned().collect();
                    self.fill(&mut batch, &fields)?;
                    Ok(Fetched::batch(batch))
                } else {
                    self.known_columns
                        .extend(batch.column_names().iter().cloned());
                    Ok(Fetched::default())
                }
            }
            None => Ok(Fetched::done(None)),
        }
    }

    /// Called by the stage between passes. Column names collected on the
    /// first pass are the whole point, so they survive.
    fn rewind(&mut self) {
        self.in_second_pass = true;
    }
}
