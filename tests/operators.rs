use pipequery::processors::{
    DedupOptions, FillNullOptions, Measure, OperatorSpec, SortElement, SortOptions, StatsOptions,
};
use pipequery::testing::*;
use pipequery::{AggFunc, ArithOp, BoolExpr, CachedStream, Cell, CmpOp, ValueExpr, field_cmp};

#[test]
fn where_keeps_matching_records_and_drops_unevaluable_ones() -> anyhow::Result<()> {
    let mut batch = batch_of(&[("status", int_cells(&[200, 404, 500]))])?;
    batch.append_known_values(vec![(
        "host".to_string(),
        str_cells(&["web-1", "web-2", "web-1"]),
    )])?;

    let predicate = BoolExpr::And(
        Box::new(field_cmp("status", CmpOp::Ge, 400i64)),
        Box::new(field_cmp("host", CmpOp::Eq, "web-1")),
    );
    let mut stage = OperatorSpec::Where { predicate }.build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "status", &int_cells(&[500]));
    Ok(())
}

#[test]
fn where_regex_match() -> anyhow::Result<()> {
    let batch = batch_of(&[("path", str_cells(&["/api/users", "/static/app.js", "/api/orders"]))])?;
    let predicate = BoolExpr::Matches {
        field: "path".to_string(),
        pattern: "^/api/".parse()?,
    };
    let mut stage = OperatorSpec::Where { predicate }.build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));
    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "path", &str_cells(&["/api/users", "/api/orders"]));
    Ok(())
}

#[test]
fn eval_adds_a_computed_column_with_null_on_failure() -> anyhow::Result<()> {
    let batch = batch_of(&[("latency", str_cells(&["1.5", "oops", "3"]))])?;
    let expr = ValueExpr::Arith {
        op: ArithOp::Mul,
        left: Box::new(ValueExpr::Field("latency".to_string())),
        right: Box::new(ValueExpr::Literal(Cell::Int(1000))),
    };
    let mut stage = OperatorSpec::Eval {
        field: "latency_ms".to_string(),
        expr,
    }
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(
        &out,
        "latency_ms",
        &[Cell::Float(1500.0), Cell::Null, Cell::Float(3000.0)],
    );
    Ok(())
}

#[test]
fn dedup_keeps_the_configured_allowance_per_key() -> anyhow::Result<()> {
    let mut stage = OperatorSpec::Dedup(DedupOptions {
        fields: vec!["host".to_string()],
        keep: 1,
        consecutive: false,
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::one_record_batches(
        "host",
        str_cells(&["a", "b", "a", "c", "b", "a"]),
    )?)));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "host", &str_cells(&["a", "b", "c"]));
    Ok(())
}

#[test]
fn dedup_consecutive_only_suppresses_immediate_repeats() -> anyhow::Result<()> {
    let mut stage = OperatorSpec::Dedup(DedupOptions {
        fields: vec!["host".to_string()],
        keep: 1,
        consecutive: true,
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch_of(&[
        ("host", str_cells(&["a", "a", "b", "b", "a"])),
    ])?))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "host", &str_cells(&["a", "b", "a"]));
    Ok(())
}

#[test]
fn sort_orders_numeric_before_string_fallback() -> anyhow::Result<()> {
    // "10" vs "9" must compare numerically, not lexicographically.
    let mut stage = OperatorSpec::Sort(SortOptions {
        elements: vec![SortElement {
            field: "v".to_string(),
            ascending: true,
        }],
        limit: None,
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch_of(&[
        ("v", str_cells(&["10", "9", "banana", "apple"])),
    ])?))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "v", &str_cells(&["9", "10", "apple", "banana"]));
    Ok(())
}

#[test]
fn sort_multi_key_with_limit() -> anyhow::Result<()> {
    let mut batch = batch_of(&[("host", str_cells(&["b", "a", "b", "a"]))])?;
    batch.append_known_values(vec![("v".to_string(), int_cells(&[1, 2, 3, 4]))])?;
    let mut stage = OperatorSpec::Sort(SortOptions {
        elements: vec![
            SortElement {
                field: "host".to_string(),
                ascending: true,
            },
            SortElement {
                field: "v".to_string(),
                ascending: false,
            },
        ],
        limit: Some(3),
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "host", &str_cells(&["a", "a", "b"]));
    assert_column_eq(&out, "v", &int_cells(&[4, 2, 3]));
    Ok(())
}

#[test]
fn stats_groups_and_aggregates() -> anyhow::Result<()> {
    let mut batch = batch_of(&[("host", str_cells(&["a", "b", "a", "b", "a"]))])?;
    batch.append_known_values(vec![(
        "latency".to_string(),
        float_cells(&[10.0, 20.0, 30.0, 40.0, 50.0]),
    )])?;
    let mut stage = OperatorSpec::Stats(StatsOptions {
        group_by: vec!["host".to_string()],
        measures: vec![
            Measure {
                func: AggFunc::Count,
                field: String::new(),
            },
            Measure {
                func: AggFunc::Avg,
                field: "latency".to_string(),
            },
            Measure {
                func: AggFunc::Max,
                field: "latency".to_string(),
            },
        ],
    })
    .build();
    assert!(stage.is_bottleneck());
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "host", &str_cells(&["a", "b"]));
    assert_column_eq(&out, "count", &uint_cells(&[3, 2]));
    assert_column_eq(&out, "avg(latency)", &float_cells(&[30.0, 30.0]));
    assert_column_eq(&out, "max(latency)", &float_cells(&[50.0, 40.0]));
    Ok(())
}

#[test]
fn stats_distinct_functions() -> anyhow::Result<()> {
    let batch = batch_of(&[("host", str_cells(&["a", "b", "a", "c"]))])?;
    let mut stage = OperatorSpec::Stats(StatsOptions {
        group_by: vec![],
        measures: vec![
            Measure {
                func: AggFunc::Cardinality,
                field: "host".to_string(),
            },
            Measure {
                func: AggFunc::Values,
                field: "host".to_string(),
            },
        ],
    })
    .build();
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "dc(host)", &uint_cells(&[3]));
    assert_column_eq(
        &out,
        "values(host)",
        &[Cell::StrList(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ])],
    );
    Ok(())
}

#[test]
fn fillnull_with_field_list_streams() -> anyhow::Result<()> {
    let mut batch = batch_of(&[("a", vec![Cell::Int(1), Cell::Null])])?;
    batch.append_known_values(vec![("b".to_string(), vec![Cell::Null, Cell::from("x")])])?;
    let mut stage = OperatorSpec::FillNull(FillNullOptions {
        value: "-".to_string(),
        fields: vec!["a".to_string(), "missing".to_string()],
    })
    .build();
    assert!(!stage.is_two_pass());
    stage.add_stream(CachedStream::new(Box::new(VecStream::single(batch))));

    let out = drain_stream(&mut stage)?;
    assert_column_eq(&out, "a", &[Cell::Int(1), Cell::from("-")]);
    // Listed but absent columns are materialized whole.
    assert_column_eq(&out, "missing", &str_cells(&["-", "-"]));
    // Unlisted columns keep their nulls.
    assert_column_eq(&out, "b", &[Cell::Null, Cell::from("x")]);
    Ok(())
}

#[test]
fn operator_specs_deserialize_from_json() -> anyhow::Result<()> {
    let specs: Vec<OperatorSpec> = serde_json::from_str(
        r#"[
            {"where": {"predicate": {"cmp": {
                "op": "ge",
                "left": {"field": "status"},
                "right": {"literal": {"int": 400}}
            }}}},
            {"sort": {"elements": [{"field": "status", "ascending": true}]}},
            {"head": {"max_rows": 2}}
        ]"#,
    )?;

    let batch = batch_of(&[("status", int_cells(&[200, 503, 404, 500]))])?;
    let mut query =
        pipequery::QueryProcessor::new(specs, Box::new(VecStream::single(batch)));
    let result = query.full_result()?;
    let out = result.batch.expect("records expected");
    assert_column_eq(&out, "status", &int_cells(&[404, 500]));
    Ok(())
}
