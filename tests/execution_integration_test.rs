// Physical execution tests: compiled plans driven batch-by-batch against
// deterministic row sets, checking operator semantics, statistics and the
// copy/execute law.

use sqlforge::logical::TableStatistics;
use sqlforge::physical::operators::{
    HashJoinOperator, LimitOperator, NestedLoopJoinOperator, ParallelSequentialScanOperator,
    SequentialScanOperator, SortOperator,
};
use sqlforge::physical::{ExecutionContext, PhysicalOperator, Tuple};
use sqlforge::pipeline::{ExecutionEngine, QueryPipeline};
use sqlforge::schema::{
    ColumnDefinition, ColumnType, DatabaseSchema, SchemaRegistry, TableDefinition,
};
use std::collections::HashSet;
use std::sync::Arc;

fn sample_registry() -> Arc<SchemaRegistry> {
    let schema = DatabaseSchema::new("shop");
    schema
        .add_table(TableDefinition::new(
            "users",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer).primary_key(),
                ColumnDefinition::new("name", ColumnType::Varchar).max_length(100),
                ColumnDefinition::new("email", ColumnType::Varchar).max_length(255),
            ],
        ))
        .unwrap();
    schema
        .add_table(TableDefinition::new(
            "orders",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer).primary_key(),
                ColumnDefinition::new("user_id", ColumnType::Integer),
                ColumnDefinition::new("total", ColumnType::Decimal),
            ],
        ))
        .unwrap();
    Arc::new(SchemaRegistry::new(&schema))
}

fn id_rows(count: usize) -> Vec<Tuple> {
    (0..count)
        .map(|i| Tuple::new(vec![(i + 1).to_string(), format!("name_{}", i + 1)]))
        .collect()
}

fn drain(operator: &mut dyn PhysicalOperator) -> Vec<Tuple> {
    let mut rows = Vec::new();
    while operator.has_more_data() {
        rows.extend(operator.next_batch().unwrap().tuples);
    }
    rows
}

#[test]
fn limit_returns_exactly_n_tuples() {
    let scan = SequentialScanOperator::new("users", "users")
        .with_output_columns(vec!["id".to_string(), "name".to_string()])
        .with_rows(id_rows(1000));
    let mut limit = LimitOperator::new(Some(5), None, Box::new(scan));

    let context = Arc::new(ExecutionContext::default());
    limit.initialize(&context).unwrap();
    let rows = drain(&mut limit);

    assert_eq!(rows.len(), 5);
    assert_eq!(limit.stats().rows_returned, 5);
}

#[test]
fn compiled_limit_plan_short_circuits() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    pipeline.set_table_stats(
        "users",
        TableStatistics {
            row_count: 1000,
            ..Default::default()
        },
    );

    let mut plan = pipeline.compile("SELECT * FROM users LIMIT 5").unwrap();
    let rows = plan.execute().unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(plan.total_stats.rows_returned, 5);
}

#[test]
fn hash_join_execution_matches_nested_loop() {
    let left_rows: Vec<Tuple> = (1..=50).map(|i| Tuple::new(vec![i.to_string()])).collect();
    let right_rows: Vec<Tuple> = (25..=75).map(|i| Tuple::new(vec![i.to_string()])).collect();

    let context = Arc::new(ExecutionContext::default());

    let mut hash_join = HashJoinOperator::new(
        sqlforge::bound::JoinType::Inner,
        vec![],
        Box::new(
            SequentialScanOperator::new("a", "a")
                .with_output_columns(vec!["k".to_string()])
                .with_rows(left_rows.clone()),
        ),
        Box::new(
            SequentialScanOperator::new("b", "b")
                .with_output_columns(vec!["k".to_string()])
                .with_rows(right_rows.clone()),
        ),
    );
    hash_join.initialize(&context).unwrap();
    let hash_result: HashSet<Vec<String>> = drain(&mut hash_join)
        .into_iter()
        .map(|t| t.values)
        .collect();

    let mut nl_join = NestedLoopJoinOperator::new(
        sqlforge::bound::JoinType::Inner,
        vec![],
        Box::new(
            SequentialScanOperator::new("a", "a")
                .with_output_columns(vec!["k".to_string()])
                .with_rows(left_rows),
        ),
        Box::new(
            SequentialScanOperator::new("b", "b")
                .with_output_columns(vec!["k".to_string()])
                .with_rows(right_rows),
        ),
    );
    // Cross product with equality on the first column simulated by the
    // nested loop's match rule needs a condition; without one it is a cross
    // product, so compare against the hash join's natural key matching by
    // filtering pairs
    nl_join.initialize(&context).unwrap();
    let nl_result: HashSet<Vec<String>> = drain(&mut nl_join)
        .into_iter()
        .filter(|t| t.value(0) == t.value(1))
        .map(|t| t.values)
        .collect();

    assert_eq!(hash_result, nl_result);
    assert_eq!(hash_result.len(), 26); // keys 25..=50
}

#[test]
fn sort_orders_batches_globally() {
    let rows: Vec<Tuple> = (0..500)
        .rev()
        .map(|i| Tuple::new(vec![i.to_string()]))
        .collect();
    let scan = SequentialScanOperator::new("t", "t")
        .with_output_columns(vec!["v".to_string()])
        .with_rows(rows);

    let key = sqlforge::logical::SortKey {
        expr: sqlforge::bound::BoundExpression {
            kind: sqlforge::bound::BoundExpressionKind::ColumnRef {
                table_id: 1,
                column_id: 1,
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: "v".to_string(),
        },
        ascending: true,
        nulls_first: false,
    };

    let mut sort = SortOperator::new(vec![key], Box::new(scan));
    let context = Arc::new(ExecutionContext::default());
    sort.initialize(&context).unwrap();

    let values: Vec<i64> = drain(&mut sort)
        .iter()
        .map(|t| t.value(0).parse().unwrap())
        .collect();
    assert_eq!(values.len(), 500);
    assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn parallel_scan_is_complete_and_unordered() {
    let mut scan = ParallelSequentialScanOperator::new("users", 4)
        .with_output_columns(vec!["id".to_string()])
        .with_rows(
            (0..10_000)
                .map(|i| Tuple::new(vec![i.to_string()]))
                .collect(),
        );

    let context = Arc::new(ExecutionContext::default());
    scan.initialize(&context).unwrap();
    let rows = drain(&mut scan);
    scan.cleanup();

    assert_eq!(rows.len(), 10_000);
    let unique: HashSet<String> = rows.iter().map(|t| t.value(0).to_string()).collect();
    assert_eq!(unique.len(), 10_000);
}

#[test]
fn physical_copy_executes_same_multiset() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    pipeline.set_table_stats(
        "users",
        TableStatistics {
            row_count: 200,
            ..Default::default()
        },
    );

    let mut plan = pipeline.compile("SELECT * FROM users").unwrap();
    let mut copy = plan.copy();

    let original: Vec<Vec<String>> = plan
        .execute()
        .unwrap()
        .into_iter()
        .map(|t| t.values)
        .collect();
    let copied: Vec<Vec<String>> = copy
        .execute()
        .unwrap()
        .into_iter()
        .map(|t| t.values)
        .collect();

    assert_eq!(original.len(), copied.len());
    let original_set: HashSet<Vec<String>> = original.into_iter().collect();
    let copied_set: HashSet<Vec<String>> = copied.into_iter().collect();
    assert_eq!(original_set, copied_set);
}

#[test]
fn engine_collects_stats_and_supports_cancel() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    pipeline.set_table_stats(
        "users",
        TableStatistics {
            row_count: 100,
            ..Default::default()
        },
    );

    let mut plan = pipeline.compile("SELECT * FROM users").unwrap();
    let mut engine = ExecutionEngine::new(Arc::clone(&plan.context));
    let rows = engine.execute_plan(&mut plan).unwrap();

    assert_eq!(rows.len(), 100);
    assert_eq!(engine.execution_stats().rows_returned, 100);
    assert!(plan.total_stats.rows_processed >= 100);

    // Cancel is aspirational: it takes effect at batch boundaries
    engine.cancel();
}

#[test]
fn explain_analyze_reports_totals() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    let mut plan = pipeline
        .compile("SELECT * FROM users LIMIT 3")
        .unwrap();
    plan.execute().unwrap();

    let report = plan.explain_analyze();
    assert!(report.contains("Limit"));
    assert!(report.contains("Total rows: 3"));
    assert!(report.contains("Execution time:"));
}

#[test]
fn aggregate_pipeline_counts_groups() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    pipeline.set_table_stats(
        "orders",
        TableStatistics {
            row_count: 60,
            ..Default::default()
        },
    );

    let mut plan = pipeline
        .compile("SELECT user_id, count(*) FROM orders GROUP BY user_id")
        .unwrap();
    let rows = plan.execute().unwrap();

    assert!(!rows.is_empty());
    let total: u64 = rows
        .iter()
        .map(|t| t.value(t.len() - 1).parse::<u64>().unwrap())
        .sum();
    assert_eq!(total, 60, "group counts must add up to the input row count");
}

#[test]
fn reset_replays_the_same_rows() {
    let scan = SequentialScanOperator::new("users", "users")
        .with_output_columns(vec!["id".to_string(), "name".to_string()])
        .with_rows(id_rows(50));
    let mut limit = LimitOperator::new(Some(10), Some(5), Box::new(scan));

    let context = Arc::new(ExecutionContext::default());
    limit.initialize(&context).unwrap();
    let first: Vec<Vec<String>> = drain(&mut limit).into_iter().map(|t| t.values).collect();

    limit.reset();
    let second: Vec<Vec<String>> = drain(&mut limit).into_iter().map(|t| t.values).collect();

    assert_eq!(first, second);
    assert_eq!(first.len(), 10);
    assert_eq!(first[0][0], "6");
}
