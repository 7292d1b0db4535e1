//! A pipeline stage: one operator behind the common fetch contract.
//!
//! A [`Stage`] owns an operator processor, the [`CachedStream`]s it reads
//! from, and the behavioral flags fixed at construction:
//!
//! - `is_bottleneck`: the operator must see all input before emitting, so the
//!   fetch loop keeps feeding it and produces nothing until the upstream ends.
//! - `is_two_pass`: a bottleneck that reads its whole input once, rewinds, and
//!   streams output during the replay. The rewind happens automatically,
//!   exactly once, inside the fetch loop.
//! - `is_permuting`: output order may differ from input order.
//! - `input_order_matters`: upstream data must arrive in stream order.
//!
//! With several upstreams, each fetch runs one merge round: pull one batch
//! from every non-exhausted upstream, merge in comparator order until the
//! first batch runs dry, and push every remainder back into its
//! [`CachedStream`] for the next round. When the upstream chain ends in a
//! sorted, limited stage, the merge adopts that stage's comparator and stops
//! after the limit.

use std::sync::Arc;

use anyhow::{Result, bail};
use log::debug;

use crate::batch::{Batch, MergeOutcome, Record};
use crate::processors::Processor;
use crate::stream::{CachedStream, Fetched, Stream};

/// Strict-less comparator over record views, shared between sort and merge.
pub type RecordCompare = Arc<dyn Fn(&Record<'_>, &Record<'_>) -> bool + Send + Sync>;

/// How a multi-upstream merge orders and caps its output.
pub struct MergeSettings {
    pub less: RecordCompare,
    pub limit: Option<u64>,
    num_returned: u64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        // Most-recent-first by timestamp, matching the default result order.
        Self {
            less: Arc::new(|a, b| a.timestamp().unwrap_or(0) > b.timestamp().unwrap_or(0)),
            limit: None,
            num_returned: 0,
        }
    }
}

/// Behavioral flags fixed when the operator is constructed.
#[derive(Clone, Copy, Debug, Default)]
pub struct StageFlags {
    pub input_order_matters: bool,
    pub is_permuting: bool,
    pub is_bottleneck: bool,
    pub is_two_pass: bool,
}

pub struct Stage {
    name: &'static str,
    streams: Vec<CachedStream>,
    processor: Box<dyn Processor>,
    merge: MergeSettings,
    flags: StageFlags,
    finished_first_pass: bool,
}

impl Stage {
    pub fn new(name: &'static str, processor: Box<dyn Processor>, flags: StageFlags) -> Self {
        Self {
            name,
            streams: Vec::new(),
            processor,
            merge: MergeSettings::default(),
            flags,
            finished_first_pass: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn add_stream(&mut self, stream: CachedStream) {
        self.streams.push(stream);
    }

    pub fn does_input_order_matter(&self) -> bool {
        self.flags.input_order_matters
    }

    pub fn is_permuting(&self) -> bool {
        self.flags.is_permuting
    }

    pub fn is_bottleneck(&self) -> bool {
        self.flags.is_bottleneck
    }

    pub fn is_two_pass(&self) -> bool {
        self.flags.is_two_pass
    }

    /// Comparator and row cap this stage guarantees for its own output, if
    /// any. A downstream stage merging several sorted upstreams adopts these.
    pub fn merge_settings_for_downstream(&self) -> Option<(RecordCompare, Option<u64>)> {
        self.processor.output_order()
    }

    /// Adopt merge ordering guaranteed by the upstream feeding this stage.
    pub fn adopt_merge_settings(&mut self, (less, limit): (RecordCompare, Option<u64>)) {
        self.merge = MergeSettings {
            less,
            limit,
            num_returned: 0,
        };
    }

    /// Adopt merge ordering from the upstream stage feeding this one.
    pub fn set_merge_settings_based_on_stream(&mut self, upstream: &Stage) {
        if let Some(settings) = upstream.merge_settings_for_downstream() {
            self.adopt_merge_settings(settings);
        }
    }

    /// One input for the processor: the single upstream's next batch, or one
    /// merge round over all upstreams. `None` means the upstream is done.
    fn next_input(&mut self) -> Result<Option<Batch>> {
        match self.streams.len() {
            0 => bail!("stage <{}> has no input streams", self.name),
            1 => Ok(self.streams[0].fetch()?.batch),
            _ => self.merged_input(),
        }
    }

    fn merged_input(&mut self) -> Result<Option<Batch>> {
        let mut batches = Vec::new();
        let mut origins = Vec::new();
        for (i, stream) in self.streams.iter_mut().enumerate() {
            if stream.is_exhausted() {
                continue;
            }
            let fetched = stream.fetch()?;
            match fetched.batch {
                Some(batch) => {
                    batches.push(batch);
                    origins.push(i);
                }
                None if fetched.done => {}
                None => bail!(
                    "stage <{}>: upstream {i} returned no batch without ending",
                    self.name
                ),
            }
        }
        if batches.is_empty() {
            return Ok(None);
        }

        let less = Arc::clone(&self.merge.less);
        let MergeOutcome {
            mut merged,
            exhausted,
            leftovers,
        } = Batch::merge_sorted(batches, less.as_ref())?;
        debug!(
            "stage <{}>: merge round drained upstream {}, {} records out",
            self.name,
            origins[exhausted],
            merged.num_records()
        );

        for (slot, leftover) in leftovers.into_iter().enumerate() {
            // A drained or empty remainder clears the slot instead of being
            // replayed forever.
            let leftover = leftover.filter(|batch| !batch.is_empty());
            self.streams[origins[slot]].set_unused_data_from_last_fetch(leftover);
        }

        if let Some(limit) = self.merge.limit {
            let remaining = limit.saturating_sub(self.merge.num_returned);
            if remaining == 0 {
                return Ok(None);
            }
            merged.truncate_records(remaining as usize);
        }
        self.merge.num_returned += merged.num_records() as u64;
        Ok(Some(merged))
    }
}

impl Stream for Stage {
    /// The stage pull loop. Keeps pulling and processing until the operator
    /// has something to emit, honoring the bottleneck and two-pass flags.
    fn fetch(&mut self) -> Result<Fetched> {
        loop {
            let input = self.next_input()?;
            let output = self.processor.process(input)?;

            if output.done {
                if self.flags.is_two_pass && !self.finished_first_pass {
                    self.finished_first_pass = true;
                    self.rewind();
                    continue;
                }
                return Ok(output);
            }

            let streaming = !self.flags.is_bottleneck
                || (self.flags.is_two_pass && self.finished_first_pass);
            if output.batch.is_some() && streaming {
                return Ok(output);
            }
        }
    }

    /// Restart this stage and everything upstream of it. The first-pass
    /// marker is deliberately not cleared: a two-pass operator rewinds once.
    fn rewind(&mut self) {
        for stream in &mut self.streams {
            stream.rewind();
        }
        self.merge.num_returned = 0;
        self.processor.rewind();
    }

    fn cleanup(&mut self) {
        for stream in &mut self.streams {
            stream.cleanup();
        }
        self.processor.cleanup();
    }
}
