// End-to-end compilation tests: SQL text through binder, logical planner and
// rewrites, checking plan shapes, costs and error reporting.

use sqlforge::binder::{Binder, BindingErrorKind};
use sqlforge::bound::{BoundExpressionKind, BoundStatement};
use sqlforge::logical::{LogicalNodeKind, LogicalPlanner, TableStatistics};
use sqlforge::pipeline::QueryPipeline;
use sqlforge::schema::{
    ColumnDefinition, ColumnType, DatabaseSchema, IndexDefinition, SchemaRegistry,
    TableDefinition,
};
use std::sync::Arc;

fn sample_registry() -> Arc<SchemaRegistry> {
    let schema = DatabaseSchema::new("shop");
    schema
        .add_table(
            TableDefinition::new(
                "users",
                vec![
                    ColumnDefinition::new("id", ColumnType::Integer).primary_key(),
                    ColumnDefinition::new("name", ColumnType::Varchar).max_length(100),
                    ColumnDefinition::new("email", ColumnType::Varchar)
                        .max_length(255)
                        .unique(),
                ],
            )
            .with_index(IndexDefinition::new(
                "idx_users_email",
                vec!["email".to_string()],
            )),
        )
        .unwrap();
    schema
        .add_table(TableDefinition::new(
            "orders",
            vec![
                ColumnDefinition::new("id", ColumnType::Integer).primary_key(),
                ColumnDefinition::new("user_id", ColumnType::Integer).references("users", "id"),
                ColumnDefinition::new("total", ColumnType::Decimal),
            ],
        ))
        .unwrap();
    Arc::new(SchemaRegistry::new(&schema))
}

#[test]
fn simple_select_binds_and_plans() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder.bind("SELECT id, name, email FROM users").unwrap();

    let select = statement.as_select().unwrap();
    assert_eq!(select.select_list.len(), 3);
    let from = select.from_table.as_ref().unwrap();
    assert_eq!(from.table_name, "users");
    assert!(from.table_id > 0);

    let plan = LogicalPlanner::new().plan(&statement).unwrap();
    let display = plan.to_string();
    assert!(display.contains("Projection"));
    assert!(display.contains("Output: id, name, email"));
    assert!(display.contains("Seq Scan on users"));
}

#[test]
fn where_clause_pushdown_shape() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind("SELECT id, name FROM users WHERE id > 10 AND name LIKE 'A%'")
        .unwrap();

    let select = statement.as_select().unwrap();
    match &select.where_clause.as_ref().unwrap().kind {
        BoundExpressionKind::BinaryOp { op, .. } => assert_eq!(op, "AND"),
        other => panic!("expected AND at the top of WHERE, got {:?}", other),
    }

    let planner = LogicalPlanner::new();
    let plan = planner.plan(&statement).unwrap();
    let optimized = planner.optimize(&plan);

    // Optimized shape: Selection -> Projection -> TableScan
    assert!(matches!(
        optimized.root.kind,
        LogicalNodeKind::Selection { .. }
    ));
    assert!(matches!(
        optimized.root.children[0].kind,
        LogicalNodeKind::Projection { .. }
    ));
    assert!(matches!(
        optimized.root.children[0].children[0].kind,
        LogicalNodeKind::TableScan { .. }
    ));
}

#[test]
fn unknown_table_suggests_similar_names() {
    let mut binder = Binder::new(sample_registry());
    let errors = binder.bind("SELECT id FROM userz").unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, BindingErrorKind::TableNotFound);
    assert!(errors[0].suggestions.contains(&"users".to_string()));
}

#[test]
fn recursive_cte_binds_with_inferred_schema() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind(
            "WITH RECURSIVE s AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM s WHERE n < 5) \
             SELECT n FROM s",
        )
        .unwrap();

    let select = statement.as_select().unwrap();
    assert_eq!(select.ctes.len(), 1);
    let cte = &select.ctes[0];
    assert!(cte.temp_table_id >= 10_000);
    assert_eq!(cte.column_names, vec!["n".to_string()]);
    assert_eq!(cte.column_types, vec![ColumnType::Integer]);
    assert!(cte.is_recursive);

    // Outer select resolves through the CTE path
    let from = select.from_table.as_ref().unwrap();
    assert_eq!(from.table_id, cte.temp_table_id);
}

#[test]
fn statement_binding_is_deterministic() {
    let mut binder = Binder::new(sample_registry());
    let sql = "WITH a AS (SELECT id FROM users) SELECT id FROM a ORDER BY id LIMIT 3";
    let first = binder.bind(sql).unwrap();
    let second = binder.bind(sql).unwrap();
    assert_eq!(first, second);
}

#[test]
fn optimization_reaches_a_fixpoint() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE o.total > 10")
        .unwrap();

    let planner = LogicalPlanner::new();
    let plan = planner.plan(&statement).unwrap();
    let once = planner.optimize(&plan);
    let twice = planner.optimize(&once);
    assert_eq!(once.root, twice.root);
}

#[test]
fn rewrites_preserve_referenced_columns() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind(
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id \
             WHERE o.total > 100 ORDER BY o.total DESC LIMIT 10",
        )
        .unwrap();

    let planner = LogicalPlanner::new();
    let plan = planner.plan(&statement).unwrap();
    let optimized = planner.optimize(&plan);

    assert_eq!(
        plan.root.collect_column_refs(),
        optimized.root.collect_column_refs()
    );
}

#[test]
fn plan_copy_is_independent() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder.bind("SELECT id FROM users WHERE id = 1").unwrap();
    let plan = LogicalPlanner::new().plan(&statement).unwrap();

    let mut copy = plan.copy();
    copy.root.cost.total_cost += 1000.0;
    copy.root.children[0].output_columns.push("extra".to_string());

    assert_ne!(copy.root.cost, plan.root.cost);
    assert_ne!(
        copy.root.children[0].output_columns,
        plan.root.children[0].output_columns
    );
}

#[test]
fn costs_are_monotonic_and_non_negative() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind(
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id \
             WHERE o.total > 10 ORDER BY o.total LIMIT 7",
        )
        .unwrap();
    let plan = LogicalPlanner::new().plan(&statement).unwrap();

    plan.root.for_each(&mut |node| {
        assert!(node.cost.startup_cost >= 0.0);
        assert!(node.cost.total_cost >= node.cost.startup_cost);
        assert!(node.cost.selectivity >= 0.001 && node.cost.selectivity <= 1.0);
    });
}

#[test]
fn name_resolution_is_case_sensitive() {
    let mut binder = Binder::new(sample_registry());
    let errors = binder.bind("SELECT * FROM Users").unwrap_err();
    assert_eq!(errors[0].kind, BindingErrorKind::TableNotFound);
}

#[test]
fn cte_boundary_errors() {
    let mut binder = Binder::new(sample_registry());

    // Explicit column list with the wrong arity
    let errors = binder
        .bind("WITH a (x, y) AS (SELECT id FROM users) SELECT x FROM a")
        .unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.kind == BindingErrorKind::Cte && e.message.contains("mismatch")));

    // Duplicate CTE names within one WITH
    let errors = binder
        .bind("WITH a AS (SELECT id FROM users), a AS (SELECT id FROM orders) SELECT id FROM a")
        .unwrap_err();
    assert!(errors.iter().any(|e| e.message.contains("Duplicate CTE")));
}

#[test]
fn ambiguity_rules_over_scope() {
    let mut binder = Binder::new(sample_registry());

    // One match resolves
    assert!(binder.bind("SELECT email FROM users").is_ok());

    // Two in-scope tables exposing the column is ambiguous
    let errors = binder
        .bind("SELECT id FROM users u JOIN orders o ON u.id = o.user_id")
        .unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.kind == BindingErrorKind::AmbiguousColumn));

    // Zero matches is column-not-found
    let errors = binder.bind("SELECT shoe_size FROM users").unwrap_err();
    assert!(errors
        .iter()
        .any(|e| e.kind == BindingErrorKind::ColumnNotFound));
}

#[test]
fn bind_and_plan_reports_errors_without_plans() {
    let mut pipeline = QueryPipeline::new(sample_registry());
    let result = pipeline.bind_and_plan("SELECT nope FROM users");
    assert!(!result.success);
    assert!(result.logical_plan.is_none());
    assert!(!result.errors.is_empty());

    let result = pipeline.bind_and_plan("SELECT id FROM users");
    assert!(result.success);
    assert!(result.errors.is_empty());
    assert!(matches!(
        result.bound_statement,
        Some(BoundStatement::Select(_))
    ));
}

#[test]
fn join_stats_drive_hash_join_choice() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind("SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id")
        .unwrap();

    let mut planner = LogicalPlanner::new();
    planner.set_table_stats(
        "users",
        TableStatistics {
            row_count: 100,
            ..Default::default()
        },
    );
    planner.set_table_stats(
        "orders",
        TableStatistics {
            row_count: 100_000,
            ..Default::default()
        },
    );

    let plan = planner.plan(&statement).unwrap();
    let mut hash_join = None;
    plan.root.for_each(&mut |node| {
        if matches!(node.kind, LogicalNodeKind::HashJoin { .. }) {
            hash_join = Some((
                node.children[0].cost.estimated_rows,
                node.children[1].cost.estimated_rows,
            ));
        }
    });

    let (probe_rows, build_rows) = hash_join.expect("hash join in plan");
    assert!(build_rows < probe_rows, "smaller side must be the build side");
}

#[test]
fn plan_display_is_stable() {
    let mut binder = Binder::new(sample_registry());
    let statement = binder
        .bind("SELECT id FROM users ORDER BY name DESC LIMIT 10")
        .unwrap();
    let plan = LogicalPlanner::new().plan(&statement).unwrap();
    let display = plan.to_string();

    assert!(display.contains("Limit (cost="));
    assert!(display.contains("Limit: 10"));
    assert!(display.contains("Sort Key: name DESC"));
    assert!(display.contains("Seq Scan on users (cost=0.00.."));

    // Fixed-point cost formatting, two decimals
    let first_line = display.lines().next().unwrap();
    assert!(first_line.contains("cost="));
    assert!(first_line.contains(".."));
}
