//! The `stats` operator: grouped aggregation over the whole input.
//!
//! A bottleneck: records accumulate into per-bucket state until the upstream
//! ends, then one row per bucket comes out with the group-by columns first
//! and one column per measure, buckets in key order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::cell::Cell;
use crate::processors::{AggFunc, Processor};
use crate::stream::Fetched;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measure {
    pub func: AggFunc,
    pub field: String,
}

impl Measure {
    /// The output column name, `func(field)`. A count over no particular
    /// field is just `count`.
    pub fn result_name(&self) -> String {
        if self.field.is_empty() {
            self.func.to_string()
        } else {
            format!("{}({})", self.func, self.field)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsOptions {
    #[serde(default)]
    pub group_by: Vec<String>,
    pub measures: Vec<Measure>,
}

enum Acc {
    Count(u64),
    Sum(f64),
    Avg { sum: f64, count: u64 },
    Min(Cell),
    Max(Cell),
    Range { min: f64, max: f64, seen: bool },
    Distinct(BTreeSet<String>),
}

impl Acc {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Acc::Count(0),
            AggFunc::Sum => Acc::Sum(0.0),
            AggFunc::Avg => Acc::Avg { sum: 0.0, count: 0 },
            AggFunc::Min => Acc::Min(Cell::Null),
            AggFunc::Max => Acc::Max(Cell::Null),
            AggFunc::Range => Acc::Range {
                min: 0.0,
                max: 0.0,
                seen: false,
            },
            AggFunc::Cardinality | AggFunc::Values => Acc::Distinct(BTreeSet::new()),
        }
    }

    fn update(&mut self, cell: &Cell) {
        if cell.is_null() {
            return;
        }
        match self {
            Acc::Count(n) => *n += 1,
            Acc::Sum(total) => {
                if let Some(v) = cell.coerce_f64() {
                    *total += v;
                }
            }
            Acc::Avg { sum, count } => {
                if let Some(v) = cell.coerce_f64() {
                    *sum += v;
                    *count += 1;
                }
            }
            Acc::Min(best) => {
                if best.is_null() || cell.compare(best).is_lt() {
                    *best = cell.clone();
                }
            }
            Acc::Max(best) => {
                if best.is_null() || cell.compare(best).is_gt() {
                    *best = cell.clone();
                }
            }
            Acc::Range { min, max, seen } => {
                if let Some(v) = cell.coerce_f64() {
                    if !*seen {
                        *min = v;
                        *max = v;
                        *seen = true;
                    } else {
                        *min = min.min(v);
                        *max = max.max(v);
                    }
                }
            }
            Acc::Distinct(set) => {
                set.insert(cell.display_string());
            }
        }
    }

    fn finish(&self, func: AggFunc) -> Cell {
        match self {
            Acc::Count(n) => Cell::UInt(*n),
            Acc::Sum(total) => Cell::Float(*total),
            Acc::Avg { sum, count } => {
                if *count == 0 {
                    Cell::Null
                } else {
                    Cell::Float(sum / *count as f64)
                }
            }
            Acc::Min(best) | Acc::Max(best) => best.clone(),
            Acc::Range { min, max, seen } => {
                if *seen {
                    Cell::Float(max - min)
                } else {
                    Cell::Null
                }
            }
            Acc::Distinct(set) => {
                if func == AggFunc::Cardinality {
                    Cell::UInt(set.len() as u64)
                } else {
                    Cell::StrList(set.iter().cloned().collect())
                }
            }
        }
    }
}

struct Bucket {
    group_values: Vec<Cell>,
    accs: Vec<Acc>,
}

pub struct StatsProcessor {
    options: StatsOptions,
    buckets: BTreeMap<String, Bucket>,
}

impl StatsProcessor {
    pub fn new(options: StatsOptions) -> Self {
        Self {
            options,
            buckets: BTreeMap::new(),
        }
    }

    fn flush(&mut self) -> Result<Batch> {
        let mut columns: Vec<(String, Vec<Cell>)> = self
            .options
            .group_by
            .iter()
            .map(|name| (name.clone(), Vec::with_capacity(self.buckets.len())))
            .collect();
        let group_count = columns.len();
        for measure in &self.options.measures {
            columns.push((
                measure.result_name(),
                Vec::with_capacity(self.buckets.len()),
            ));
        }

        for bucket in self.buckets.values() {
            for (slot, value) in bucket.group_values.iter().enumerate() {
                columns[slot].1.push(value.clone());
            }
            for (slot, acc) in bucket.accs.iter().enumerate() {
                let func = self.options.measures[slot].func;
                columns[group_count + slot].1.push(acc.finish(func));
            }
        }
        Batch::from_columns(columns)
    }
}

impl Processor for StatsProcessor {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        let Some(batch) = input else {
            let out = self.flush()?;
            self.buckets.clear();
            return Ok(Fetched::done(Some(out)));
        };

        for record in batch.records() {
            let mut key = String::new();
            let mut group_values = Vec::with_capacity(self.options.group_by.len());
            for field in &self.options.group_by {
                let cell = record.read_column(field).unwrap_or(&Cell::Null);
                key.push_str(&cell.display_string());
                key.push('_');
                group_values.push(cell.clone());
            }
            let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
                group_values,
                accs: self
                    .options
                    .measures
                    .iter()
                    .map(|m| Acc::new(m.func))
                    .collect(),
            });
            for (slot, measure) in self.options.measures.iter().enumerate() {
                let cell = if measure.field.is_empty() {
                    // A bare count has no input field; every record counts.
                    Cell::UInt(1)
                } else {
                    record.read_column(&measure.field).cloned().unwrap_or(Cell::Null)
                };
                bucket.accs[slot].update(&cell);
            }
        }
        Ok(Fetched::default())
    }

    fn rewind(&mut self) {
        self.buckets.clear();
    }
}
