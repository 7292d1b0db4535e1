//! The pull contract between pipeline stages.
//!
//! Everything a stage reads from implements [`Stream`]. A fetch yields a
//! [`Fetched`]: an optional batch plus a `done` flag, so end-of-data can
//! travel in the same result as the final payload. Errors are reserved for
//! real failures.
//!
//! [`CachedStream`] decorates a stream with the one-slot replay buffer the
//! multi-upstream merge needs: when a merge round cannot consume a whole
//! batch, the remainder is pushed back and replayed before the underlying
//! stream is asked for more.

use anyhow::Result;

use crate::batch::Batch;

/// The outcome of one fetch: maybe a batch, and whether the source is done.
/// `done` may accompany a final batch; every fetch after that yields
/// `done` with no batch.
#[derive(Debug, Default)]
pub struct Fetched {
    pub batch: Option<Batch>,
    pub done: bool,
}

impl Fetched {
    /// A batch with more data expected.
    pub fn batch(batch: Batch) -> Self {
        Self {
            batch: Some(batch),
            done: false,
        }
    }

    /// End of data, optionally carrying the final batch.
    pub fn done(batch: Option<Batch>) -> Self {
        Self { batch, done: true }
    }
}

/// A pull source of batches.
pub trait Stream: Send {
    fn fetch(&mut self) -> Result<Fetched>;

    /// Restart the stream from the beginning.
    fn rewind(&mut self);

    /// Release any held resources. Called once when the pipeline finishes.
    fn cleanup(&mut self) {}
}

/// A [`Stream`] decorator with a one-slot leftover buffer and a sticky
/// exhaustion flag.
pub struct CachedStream {
    source: Box<dyn Stream>,
    unused: Option<Batch>,
    exhausted: bool,
}

impl CachedStream {
    pub fn new(source: Box<dyn Stream>) -> Self {
        Self {
            source,
            unused: None,
            exhausted: false,
        }
    }

    /// Replay the leftover if one is buffered, otherwise pull the source.
    /// Once the source reports done, later fetches return done without
    /// touching the source again.
    pub fn fetch(&mut self) -> Result<Fetched> {
        if self.exhausted {
            return Ok(Fetched::done(None));
        }
        if let Some(batch) = self.unused.take() {
            return Ok(Fetched::batch(batch));
        }
        let fetched = self.source.fetch()?;
        if fetched.done {
            self.exhausted = true;
        }
        Ok(fetched)
    }

    /// Buffer the unconsumed remainder of the last fetch. A non-empty
    /// leftover un-marks exhaustion so the buffered data is still served.
    pub fn set_unused_data_from_last_fetch(&mut self, leftover: Option<Batch>) {
        if leftover.is_some() {
            self.exhausted = false;
        }
        self.unused = leftover;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn rewind(&mut self) {
        self.unused = None;
        self.exhausted = false;
        self.source.rewind();
    }

    pub fn cleanup(&mut self) {
        self.source.cleanup();
    }
}
