//! Operator processors and the spec-to-stage factory.
//!
//! Each pipeline operator implements [`Processor`]: it is handed one input
//! batch per call (or `None` when the upstream is done) and returns what it
//! wants to emit. The surrounding [`Stage`] owns the pull loop, buffering and
//! rewind mechanics; processors only hold operator state.
//!
//! [`OperatorSpec`] is the serializable description of one operator.
//! [`OperatorSpec::build`] pairs the processor with the behavioral flags that
//! operator requires; the flag table here is the single source of truth for
//! which operators are bottlenecks, permute their input, or need two passes.

pub mod dedup;
pub mod eval;
pub mod fillnull;
pub mod head;
pub mod sort;
pub mod stats;
pub mod streamstats;
pub mod tail;
pub mod where_filter;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::batch::{Batch, Record};
use crate::cell::Cell;
use crate::expr::{BoolExpr, ValueExpr};
use crate::stage::{RecordCompare, Stage, StageFlags};
use crate::stream::Fetched;

pub use dedup::DedupOptions;
pub use fillnull::FillNullOptions;
pub use head::HeadOptions;
pub use sort::{SortElement, SortOptions};
pub use stats::{Measure, StatsOptions};
pub use streamstats::{MeasureSource, StreamMeasure, StreamStatsOptions, TimeSpan, TimeUnit};
pub use tail::TailOptions;

/// One pipeline operator's processing logic.
pub trait Processor: Send {
    /// Handle one input batch; `None` means the upstream has ended and the
    /// processor should flush. The returned [`Fetched`] says what to emit and
    /// whether this operator is finished.
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched>;

    /// Drop accumulated state so the input can be replayed.
    fn rewind(&mut self);

    fn cleanup(&mut self) {}

    /// The ordering and row cap this operator guarantees for its output, if
    /// it sorts. Downstream multi-upstream merges adopt it.
    fn output_order(&self) -> Option<(RecordCompare, Option<u64>)> {
        None
    }
}

/// Forwards input unchanged. Used where a stage boundary is needed without an
/// operator, and as the base case in tests.
#[derive(Default)]
pub struct PassThrough;

impl Processor for PassThrough {
    fn process(&mut self, input: Option<Batch>) -> Result<Fetched> {
        match input {
            Some(batch) => Ok(Fetched::batch(batch)),
            None => Ok(Fetched::done(None)),
        }
    }

    fn rewind(&mut self) {}
}

/// The fields one record exposes to expression evaluation. Columns the batch
/// lacks are simply absent, which evaluates as null.
pub(crate) fn record_fields(
    record: &Record<'_>,
    names: &BTreeSet<String>,
) -> HashMap<String, Cell> {
    names
        .iter()
        .filter_map(|name| {
            record
                .read_column(name)
                .map(|cell| (name.clone(), cell.clone()))
        })
        .collect()
}

/// The aggregation functions shared by `stats` and `streamstats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Range,
    Cardinality,
    Values,
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Range => "range",
            AggFunc::Cardinality => "dc",
            AggFunc::Values => "values",
        };
        f.write_str(name)
    }
}

/// Serializable description of one pipeline operator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorSpec {
    Where { predicate: BoolExpr },
    Eval { field: String, expr: ValueExpr },
    Dedup(DedupOptions),
    Head(HeadOptions),
    Tail(TailOptions),
    Sort(SortOptions),
    Stats(StatsOptions),
    StreamStats(StreamStatsOptions),
    FillNull(FillNullOptions),
}

impl OperatorSpec {
    /// True for operators whose output is aggregation buckets rather than the
    /// input records.
    pub fn is_aggregating(&self) -> bool {
        matches!(self, OperatorSpec::Stats(_))
    }

    /// Build the stage for this operator, with its behavioral flags.
    pub fn build(self) -> Stage {
        match self {
            OperatorSpec::Where { predicate } => Stage::new(
                "where",
                Box::new(where_filter::WhereProcessor::new(predicate)),
                StageFlags::default(),
            ),
            OperatorSpec::Eval { field, expr } => Stage::new(
                "eval",
                Box::new(eval::EvalProcessor::new(field, expr)),
                StageFlags::default(),
            ),
            OperatorSpec::Dedup(options) => Stage::new(
                "dedup",
                Box::new(dedup::DedupProcessor::new(options)),
                StageFlags {
                    input_order_matters: true,
                    ..StageFlags::default()
                },
            ),
            OperatorSpec::Head(options) => Stage::new(
                "head",
                Box::new(head::HeadProcessor::new(options)),
                StageFlags {
                    input_order_matters: true,
                    ..StageFlags::default()
                },
            ),
            OperatorSpec::Tail(options) => Stage::new(
                "tail",
                Box::new(tail::TailProcessor::new(options)),
                StageFlags {
                    input_order_matters: true,
                    is_permuting: true,
                    is_bottleneck: true,
                    is_two_pass: false,
                },
            ),
            OperatorSpec::Sort(options) => Stage::new(
                "sort",
                Box::new(sort::SortProcessor::new(options)),
                StageFlags {
                    input_order_matters: false,
                    is_permuting: true,
                    is_bottleneck: true,
                    is_two_pass: false,
                },
            ),
            OperatorSpec::Stats(options) => Stage::new(
                "stats",
                Box::new(stats::StatsProcessor::new(options)),
                StageFlags {
                    is_bottleneck: true,
                    ..StageFlags::default()
                },
            ),
            OperatorSpec::StreamStats(options) => Stage::new(
                "streamstats",
                Box::new(streamstats::StreamStatsProcessor::new(options)),
                StageFlags {
                    input_order_matters: true,
                    ..StageFlags::default()
                },
            ),
            OperatorSpec::FillNull(options) => {
                // Without a field list the processor must learn every column
                // name before it can fill, so it replays its input.
                let two_pass = options.fields.is_empty();
                Stage::new(
                    "fillnull",
                    Box::new(fillnull::FillNullProcessor::new(options)),
                    StageFlags {
                        is_bottleneck: two_pass,
                        is_two_pass: two_pass,
                        ..StageFlags::default()
                    },
                )
            }
        }
    }
}
