//! Assembling and running a whole query pipeline.
//!
//! [`QueryProcessor`] turns an ordered list of [`OperatorSpec`]s into a chain
//! of stages: the retrieval stream feeds the first stage, each stage feeds
//! the next through a [`CachedStream`], and a terminal row-limit stage caps
//! the result. The cap depends on the query's shape, decided once before
//! anything runs: a records query returns at most [`MAX_RESULT_ROWS`] rows,
//! an aggregation query at most [`MAX_GROUP_BUCKETS`] buckets.
//!
//! Results come back either wholesale ([`QueryProcessor::full_result`]) or
//! incrementally over a channel ([`QueryProcessor::stream_result`]), so a
//! caller on another thread can render partial results while the pipeline
//! still runs.

use std::sync::mpsc::Sender;

use anyhow::{Context, Result};
use log::debug;

use crate::batch::Batch;
use crate::processors::{HeadOptions, OperatorSpec};
use crate::stage::Stage;
use crate::stream::{CachedStream, Stream};

/// Row cap for records queries.
pub const MAX_RESULT_ROWS: u64 = 10_000;
/// Bucket cap for aggregation queries.
pub const MAX_GROUP_BUCKETS: u64 = 3_000;

/// The shape of a query's final result, fixed before execution starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    /// The result is (a subset of) the input records.
    Records,
    /// The result is aggregation buckets.
    Aggregation,
}

/// A finished query's result.
#[derive(Debug)]
pub struct QueryResult {
    pub kind: QueryKind,
    pub batch: Option<Batch>,
    pub total_records: u64,
    /// True when the row cap cut the result short; the caller can narrow the
    /// query and re-run for more.
    pub can_fetch_more: bool,
}

/// An incremental result update delivered over a channel.
#[derive(Debug)]
pub enum QueryUpdate {
    Partial { batch: Batch, records_so_far: u64 },
    Complete(QueryResult),
}

pub struct QueryProcessor {
    kind: QueryKind,
    chain: Stage,
}

impl QueryProcessor {
    /// Build the full stage chain over `input`, the retrieval layer's stream.
    pub fn new(specs: Vec<OperatorSpec>, input: Box<dyn Stream>) -> Self {
        let kind = if specs.iter().any(OperatorSpec::is_aggregating) {
            QueryKind::Aggregation
        } else {
            QueryKind::Records
        };

        let mut upstream: Box<dyn Stream> = input;
        let mut upstream_stage: Option<&'static str> = None;
        let mut carried_order = None;
        for spec in specs {
            let mut stage = spec.build();
            stage.add_stream(CachedStream::new(upstream));
            if let Some(settings) = carried_order.take() {
                stage.adopt_merge_settings(settings);
            }
            debug!(
                "query chain: <{}> feeds <{}>",
                upstream_stage.unwrap_or("input"),
                stage.name()
            );
            carried_order = stage.merge_settings_for_downstream();
            upstream_stage = Some(stage.name());
            upstream = Box::new(stage);
        }

        let cap = match kind {
            QueryKind::Records => MAX_RESULT_ROWS,
            QueryKind::Aggregation => MAX_GROUP_BUCKETS,
        };
        let mut chain = OperatorSpec::Head(HeadOptions::limit(cap)).build();
        chain.add_stream(CachedStream::new(upstream));
        if let Some(settings) = carried_order {
            chain.adopt_merge_settings(settings);
        }

        Self { kind, chain }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    fn limit(&self) -> u64 {
        match self.kind {
            QueryKind::Records => MAX_RESULT_ROWS,
            QueryKind::Aggregation => MAX_GROUP_BUCKETS,
        }
    }

    /// Drive the pipeline to completion and return everything at once.
    pub fn full_result(&mut self) -> Result<QueryResult> {
        let mut collected: Option<Batch> = None;
        let mut total_records = 0u64;
        loop {
            let fetched = self.chain.fetch()?;
            if let Some(batch) = fetched.batch {
                total_records += batch.num_records() as u64;
                match collected.as_mut() {
                    Some(all) => all.append(batch)?,
                    None => collected = Some(batch),
                }
            }
            if fetched.done {
                break;
            }
        }
        self.chain.cleanup();
        Ok(QueryResult {
            kind: self.kind,
            batch: collected,
            total_records,
            can_fetch_more: self.kind == QueryKind::Records && total_records >= self.limit(),
        })
    }

    /// Drive the pipeline, delivering partial record batches as they arrive.
    /// Aggregation results only make sense whole, so an aggregation query
    /// sends a single `Complete` carrying the final buckets.
    pub fn stream_result(&mut self, sender: &Sender<QueryUpdate>) -> Result<()> {
        let mut collected: Option<Batch> = None;
        let mut total_records = 0u64;
        loop {
            let fetched = self.chain.fetch()?;
            if let Some(batch) = fetched.batch
                && !batch.is_empty()
            {
                total_records += batch.num_records() as u64;
                match self.kind {
                    QueryKind::Records => {
                        sender
                            .send(QueryUpdate::Partial {
                                batch,
                                records_so_far: total_records,
                            })
                            .context("result receiver dropped")?;
                    }
                    QueryKind::Aggregation => match collected.as_mut() {
                        Some(all) => all.append(batch)?,
                        None => collected = Some(batch),
                    },
                }
            }
            if fetched.done {
                break;
            }
        }
        self.chain.cleanup();
        sender
            .send(QueryUpdate::Complete(QueryResult {
                kind: self.kind,
                batch: collected,
                total_records,
                can_fetch_more: self.kind == QueryKind::Records && total_records >= self.limit(),
            }))
            .context("result receiver dropped")?;
        Ok(())
    }
}
