//! # pipequery
//!
//! A pull-based, batch-oriented execution core for log/event search query
//! pipelines.
//!
//! A query is a chain of [`Stage`]s, each wrapping one operator. Data moves
//! as columnar [`Batch`]es, pulled from the end of the chain: every fetch
//! recursively fetches from its upstream(s), runs its operator, and hands the
//! result downstream. End-of-data travels in-band as a [`Fetched`] with its
//! `done` flag set, possibly alongside a final batch.
//!
//! The interesting machinery:
//!
//! - [`CachedStream`] gives every stage input a one-slot replay buffer, which
//!   the multi-upstream merge uses to push back records it could not consume.
//! - Bottleneck operators (sort, stats, tail) buffer silently until their
//!   upstream ends; two-pass operators additionally rewind and replay their
//!   input exactly once.
//! - The `streamstats` operator maintains per-bucket sliding windows with
//!   monotonic deques for min/max/range and reference-counted sets for
//!   windowed distinct counts.
//! - [`QueryProcessor`] assembles the chain from serializable
//!   [`OperatorSpec`]s, caps the result by query shape, and delivers it
//!   wholesale or incrementally over a channel.
//!
//! ```no_run
//! use pipequery::driver::QueryProcessor;
//! use pipequery::processors::{OperatorSpec, TailOptions};
//! use pipequery::testing::{VecStream, batch_of, int_cells};
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = batch_of(&[("status", int_cells(&[200, 404, 500]))])?;
//! let specs = vec![OperatorSpec::Tail(TailOptions { rows: 2 })];
//! let mut query = QueryProcessor::new(specs, Box::new(VecStream::single(input)));
//! let result = query.full_result()?;
//! assert_eq!(result.total_records, 2);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cell;
pub mod driver;
pub mod expr;
pub mod processors;
pub mod sketch;
pub mod stage;
pub mod stream;
pub mod testing;

pub use batch::{Batch, MergeOutcome, Record, TIMESTAMP_KEY};
pub use cell::Cell;
pub use driver::{
    MAX_GROUP_BUCKETS, MAX_RESULT_ROWS, QueryKind, QueryProcessor, QueryResult, QueryUpdate,
};
pub use expr::{ArithOp, BoolExpr, CmpOp, MatchPattern, ValueExpr, field_cmp};
pub use processors::{AggFunc, OperatorSpec, PassThrough, Processor};
pub use stage::{MergeSettings, RecordCompare, Stage, StageFlags};
pub use stream::{CachedStream, Fetched, Stream};
