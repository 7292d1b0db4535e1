use std::sync::mpsc;

use pipequery::processors::{
    Measure, OperatorSpec, SortElement, SortOptions, StatsOptions, TailOptions,
};
use pipequery::testing::*;
use pipequery::{
    AggFunc, CmpOp, QueryKind, QueryProcessor, QueryUpdate, field_cmp,
};

#[test]
fn records_query_runs_the_whole_chain() -> anyhow::Result<()> {
    let mut batch = batch_of(&[("status", int_cells(&[500, 200, 404, 200, 503]))])?;
    batch.append_known_values(vec![(
        "host".to_string(),
        str_cells(&["a", "a", "b", "b", "a"]),
    )])?;

    let specs = vec![
        OperatorSpec::Where {
            predicate: field_cmp("status", CmpOp::Ge, 400i64),
        },
        OperatorSpec::Sort(SortOptions {
            elements: vec![SortElement {
                field: "status".to_string(),
                ascending: true,
            }],
            limit: None,
        }),
    ];
    let mut query = QueryProcessor::new(specs, Box::new(VecStream::single(batch)));
    assert_eq!(query.kind(), QueryKind::Records);

    let result = query.full_result()?;
    assert_eq!(result.total_records, 3);
    assert!(!result.can_fetch_more);
    assert_column_eq(
        &result.batch.unwrap(),
        "status",
        &int_cells(&[404, 500, 503]),
    );
    Ok(())
}

#[test]
fn stats_makes_it_an_aggregation_query() -> anyhow::Result<()> {
    let batch = batch_of(&[("host", str_cells(&["a", "b", "a"]))])?;
    let specs = vec![OperatorSpec::Stats(StatsOptions {
        group_by: vec!["host".to_string()],
        measures: vec![Measure {
            func: AggFunc::Count,
            field: String::new(),
        }],
    })];
    let mut query = QueryProcessor::new(specs, Box::new(VecStream::single(batch)));
    assert_eq!(query.kind(), QueryKind::Aggregation);

    let result = query.full_result()?;
    assert_eq!(result.kind, QueryKind::Aggregation);
    let buckets = result.batch.unwrap();
    assert_column_eq(&buckets, "host", &str_cells(&["a", "b"]));
    assert_column_eq(&buckets, "count", &uint_cells(&[2, 1]));
    Ok(())
}

#[test]
fn empty_spec_list_still_caps_and_delivers() -> anyhow::Result<()> {
    let batch = batch_of(&[("v", int_cells(&[1, 2, 3]))])?;
    let mut query = QueryProcessor::new(vec![], Box::new(VecStream::single(batch)));
    let result = query.full_result()?;
    assert_eq!(result.total_records, 3);
    Ok(())
}

#[test]
fn streamed_records_arrive_as_partials_then_complete() -> anyhow::Result<()> {
    let batches = vec![
        batch_of(&[("v", int_cells(&[1, 2]))])?,
        batch_of(&[("v", int_cells(&[3]))])?,
    ];
    let mut query = QueryProcessor::new(vec![], Box::new(VecStream::new(batches)));

    let (sender, receiver) = mpsc::channel();
    query.stream_result(&sender)?;
    drop(sender);

    let updates: Vec<QueryUpdate> = receiver.iter().collect();
    assert_eq!(updates.len(), 3);
    match &updates[0] {
        QueryUpdate::Partial {
            batch,
            records_so_far,
        } => {
            assert_eq!(batch.num_records(), 2);
            assert_eq!(*records_so_far, 2);
        }
        other => panic!("expected a partial update, got {other:?}"),
    }
    match &updates[2] {
        QueryUpdate::Complete(result) => {
            assert_eq!(result.total_records, 3);
            assert!(!result.can_fetch_more);
            assert!(result.batch.is_none());
        }
        other => panic!("expected the completion event, got {other:?}"),
    }
    Ok(())
}

#[test]
fn streamed_aggregation_sends_only_the_completion() -> anyhow::Result<()> {
    let batch = batch_of(&[("host", str_cells(&["a", "b", "a"]))])?;
    let specs = vec![OperatorSpec::Stats(StatsOptions {
        group_by: vec!["host".to_string()],
        measures: vec![Measure {
            func: AggFunc::Count,
            field: String::new(),
        }],
    })];
    let mut query = QueryProcessor::new(specs, Box::new(VecStream::single(batch)));

    let (sender, receiver) = mpsc::channel();
    query.stream_result(&sender)?;
    drop(sender);

    let updates: Vec<QueryUpdate> = receiver.iter().collect();
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        QueryUpdate::Complete(result) => {
            let buckets = result.batch.as_ref().unwrap();
            assert_column_eq(buckets, "host", &str_cells(&["a", "b"]));
        }
        other => panic!("expected the completion event, got {other:?}"),
    }
    Ok(())
}

#[test]
fn chain_of_streaming_and_bottleneck_operators() -> anyhow::Result<()> {
    // where -> tail: the filter streams, the tail buffers and reverses.
    let batch = batch_of(&[("status", int_cells(&[200, 500, 404, 200, 503]))])?;
    let specs = vec![
        OperatorSpec::Where {
            predicate: field_cmp("status", CmpOp::Ge, 400i64),
        },
        OperatorSpec::Tail(TailOptions { rows: 2 }),
    ];
    let mut query = QueryProcessor::new(specs, Box::new(VecStream::single(batch)));
    let result = query.full_result()?;
    assert_column_eq(&result.batch.unwrap(), "status", &int_cells(&[503, 404]));
    Ok(())
}
