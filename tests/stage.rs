use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pipequery::processors::{OperatorSpec, SortElement, SortOptions};
use pipequery::testing::*;
use pipequery::{Batch, CachedStream, Fetched, Stream};

/// Wraps a [`VecStream`] and counts rewinds through a shared handle, since
/// the stream itself disappears into the stage.
struct CountingStream {
    inner: VecStream,
    rewinds: Arc<AtomicUsize>,
}

impl Stream for CountingStream {
    fn fetch(&mut self) -> anyhow::Result<Fetched> {
        self.inner.fetch()
    }

    fn rewind(&mut self) {
        self.rewinds.fetch_add(1, Ordering::Relaxed);
        self.inner.rewind();
    }
}

#[test]
fn bottleneck_stage_emits_nothing_until_upstream_ends() -> anyhow::Result<()> {
    let batches = vec![
        batch_of(&[("v", int_cells(&[3, 1]))])?,
        batch_of(&[("v", int_cells(&[2]))])?,
        batch_of(&[("v", int_cells(&[5, 4]))])?,
    ];
    let mut stage = OperatorSpec::Sort(SortOptions {
        elements: vec![SortElement {
            field: "v".to_string(),
            ascending: true,
        }],
        limit: None,
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::new(batches))));

    // The very first fetch must already be the complete, final output: the
    // stage looped over all three input batches internally.
    let fetched = stage.fetch()?;
    assert!(fetched.done);
    assert_column_eq(&fetched.batch.unwrap(), "v", &int_cells(&[1, 2, 3, 4, 5]));
    Ok(())
}

#[test]
fn two_pass_stage_rewinds_exactly_once() -> anyhow::Result<()> {
    // Column "b" only appears in the second batch; with no field list the
    // fill operator needs a full first pass to learn it exists at all.
    let first = batch_of(&[("a", int_cells(&[1, 2]))])?;
    let mut second = batch_of(&[("a", int_cells(&[3]))])?;
    second.append_known_values(vec![("b".to_string(), str_cells(&["x"]))])?;

    let rewinds = Arc::new(AtomicUsize::new(0));
    let source = CountingStream {
        inner: VecStream::new(vec![first, second]),
        rewinds: Arc::clone(&rewinds),
    };

    let mut stage = OperatorSpec::FillNull(pipequery::processors::FillNullOptions {
        value: "0".to_string(),
        fields: vec![],
    })
    .build();
    assert!(stage.is_two_pass());
    stage.add_stream(CachedStream::new(Box::new(source)));

    let out = drain_stream(&mut stage)?;
    assert_eq!(rewinds.load(Ordering::Relaxed), 1);
    assert_column_eq(&out, "a", &int_cells(&[1, 2, 3]));
    // The first batch never had "b"; the second pass fills it everywhere.
    assert_column_eq(&out, "b", &str_cells(&["0", "0", "x"]));
    Ok(())
}

#[test]
fn streaming_stage_forwards_batches_as_they_come() -> anyhow::Result<()> {
    let batches = vec![
        batch_of(&[("v", int_cells(&[1]))])?,
        batch_of(&[("v", int_cells(&[2]))])?,
    ];
    let mut stage = pipequery::Stage::new(
        "passthrough",
        Box::new(pipequery::PassThrough),
        pipequery::StageFlags::default(),
    );
    stage.add_stream(CachedStream::new(Box::new(VecStream::new(batches))));

    let first = stage.fetch()?;
    assert!(!first.done);
    assert_column_eq(&first.batch.unwrap(), "v", &int_cells(&[1]));
    let second = stage.fetch()?;
    assert_column_eq(&second.batch.unwrap(), "v", &int_cells(&[2]));
    Ok(())
}

#[test]
fn stage_without_streams_is_an_error() {
    let mut stage = pipequery::Stage::new(
        "orphan",
        Box::new(pipequery::PassThrough),
        pipequery::StageFlags::default(),
    );
    assert!(stage.fetch().is_err());
}

#[test]
fn rewound_stage_replays_from_scratch() -> anyhow::Result<()> {
    let only = batch_of(&[("v", int_cells(&[1, 2]))])?;
    let mut stage = pipequery::Stage::new(
        "passthrough",
        Box::new(pipequery::PassThrough),
        pipequery::StageFlags::default(),
    );
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(only))));

    let first = drain_stream(&mut stage)?;
    stage.rewind();
    let second = drain_stream(&mut stage)?;
    assert_eq!(first.num_records(), second.num_records());
    Ok(())
}

#[test]
fn empty_batches_add_no_records() -> anyhow::Result<()> {
    let batches = vec![
        Batch::new(),
        batch_of(&[("v", int_cells(&[9]))])?,
    ];
    let mut stage = pipequery::Stage::new(
        "passthrough",
        Box::new(pipequery::PassThrough),
        pipequery::StageFlags::default(),
    );
    stage.add_stream(CachedStream::new(Box::new(VecStream::new(batches))));
    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "v", &int_cells(&[9]));
    Ok(())
}
