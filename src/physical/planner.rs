// Physical planner: logical plan -> operator tree.
//
// Structural conversion plus the algorithm and resource choices: sequential
// vs index scan (access methods), nested-loop vs hash join (thresholds),
// selection pushdown into scans, parallelization of eligible scan leaves,
// and memory budgeting against work_mem.

use super::operators::{
    AppendOperator, FilterOperator, HashAggregateOperator, HashJoinOperator, IndexScanOperator,
    LimitOperator, NestedLoopJoinOperator, ParallelSequentialScanOperator,
    SequentialScanOperator, SortOperator,
};
use super::{ExecutionContext, PhysicalOperator, PhysicalPlan};
use crate::bound::{BoundExpression, JoinType};
use crate::error::PlannerError;
use crate::logical::{LogicalNodeKind, LogicalPlan, LogicalPlanNode, TableStatistics};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Physical planning configuration.
#[derive(Debug, Clone)]
pub struct PhysicalPlannerConfig {
    pub enable_parallel_execution: bool,
    pub enable_hash_joins: bool,
    pub max_parallel_workers: usize,
    pub work_mem: usize,
    /// Prefer a hash join when either side exceeds this many rows
    pub hash_join_threshold: usize,
    /// Prefer an index scan below this many rows
    pub index_scan_threshold: usize,
    /// Parallelize plans whose total cost exceeds this
    pub parallel_threshold: f64,
    pub enable_vectorization: bool,
    pub batch_size: usize,
    pub temp_dir: String,
}

impl Default for PhysicalPlannerConfig {
    fn default() -> Self {
        Self {
            enable_parallel_execution: true,
            enable_hash_joins: true,
            max_parallel_workers: num_cpus::get(),
            work_mem: 1024 * 1024,
            hash_join_threshold: 10_000,
            index_scan_threshold: 1000,
            parallel_threshold: 1000.0,
            enable_vectorization: true,
            batch_size: 1000,
            temp_dir: std::env::temp_dir().to_string_lossy().into_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMethodKind {
    HeapScan,
    IndexScan,
    BitmapScan,
}

/// A registered way of reading a table, with its estimated cost.
#[derive(Debug, Clone)]
pub struct AccessMethod {
    pub kind: AccessMethodKind,
    pub index_name: String,
    pub key_columns: Vec<String>,
    pub selectivity: f64,
    pub cost: f64,
}

pub struct PhysicalPlanner {
    config: PhysicalPlannerConfig,
    table_stats: HashMap<String, TableStatistics>,
    access_methods: HashMap<String, Vec<AccessMethod>>,
}

impl PhysicalPlanner {
    pub fn new() -> Self {
        Self::with_config(PhysicalPlannerConfig::default())
    }

    pub fn with_config(config: PhysicalPlannerConfig) -> Self {
        Self {
            config,
            table_stats: HashMap::new(),
            access_methods: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PhysicalPlannerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PhysicalPlannerConfig) {
        self.config = config;
    }

    pub fn set_table_stats(&mut self, table_name: impl Into<String>, stats: TableStatistics) {
        self.table_stats.insert(table_name.into(), stats);
    }

    pub fn add_access_method(&mut self, table_name: impl Into<String>, method: AccessMethod) {
        self.access_methods
            .entry(table_name.into())
            .or_default()
            .push(method);
    }

    fn get_table_stats(&self, table_name: &str) -> TableStatistics {
        self.table_stats
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }

    fn execution_context(&self) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext {
            work_mem_limit: self.config.work_mem,
            temp_file_threshold: self.config.work_mem / 2,
            temp_dir: self.config.temp_dir.clone(),
            enable_parallel: self.config.enable_parallel_execution,
            max_parallel_workers: self.config.max_parallel_workers,
            batch_size: self.config.batch_size,
        })
    }

    // ------------------------------------------------------------------
    // Conversion
    // ------------------------------------------------------------------

    pub fn create_physical_plan(&self, logical_plan: &LogicalPlan) -> Result<PhysicalPlan> {
        let root = self.convert_node(&logical_plan.root, false)?;
        Ok(PhysicalPlan::new(root, self.execution_context()))
    }

    /// Base plan plus a parallelized variant when the plan qualifies.
    pub fn generate_alternative_physical_plans(
        &self,
        logical_plan: &LogicalPlan,
    ) -> Result<Vec<PhysicalPlan>> {
        let mut plans = vec![self.create_physical_plan(logical_plan)?];

        if self.should_parallelize(&logical_plan.root) {
            let root = self.convert_node(&logical_plan.root, true)?;
            plans.push(PhysicalPlan::new(root, self.execution_context()));
        }

        Ok(plans)
    }

    fn convert_node(
        &self,
        node: &LogicalPlanNode,
        parallel: bool,
    ) -> Result<Box<dyn PhysicalOperator>> {
        match &node.kind {
            LogicalNodeKind::TableScan {
                table_name,
                alias,
                filters,
            } => Ok(self.convert_table_scan(node, table_name, alias, filters.clone(), parallel)),
            LogicalNodeKind::IndexScan {
                table_name,
                index_name,
                alias,
                index_conditions,
                filters,
            } => Ok(Box::new(
                IndexScanOperator::new(table_name.clone(), index_name.clone(), alias.clone())
                    .with_index_conditions(index_conditions.clone())
                    .with_filters(filters.clone())
                    .with_cost(node.cost)
                    .with_output_columns(node.output_columns.clone()),
            )),
            LogicalNodeKind::NestedLoopJoin {
                join_type,
                conditions,
            }
            | LogicalNodeKind::HashJoin {
                join_type,
                conditions,
            }
            | LogicalNodeKind::MergeJoin {
                join_type,
                conditions,
            } => self.convert_join(node, *join_type, conditions, parallel),
            LogicalNodeKind::Projection { exprs, .. } => {
                // Absorbed: expressions travel via output columns. A
                // FROM-less projection becomes a one-row constant source.
                match node.children.first() {
                    Some(child) => self.convert_node(child, parallel),
                    None => {
                        let values = exprs
                            .iter()
                            .map(|expr| match &expr.kind {
                                crate::bound::BoundExpressionKind::Constant { value } => {
                                    value.clone()
                                }
                                _ => expr.text.clone(),
                            })
                            .collect();
                        Ok(Box::new(
                            SequentialScanOperator::new("", "")
                                .with_rows(vec![crate::physical::Tuple::new(values)])
                                .with_cost(node.cost)
                                .with_output_columns(node.output_columns.clone()),
                        ))
                    }
                }
            }
            LogicalNodeKind::Selection { conditions } => {
                self.convert_selection(node, conditions, parallel)
            }
            LogicalNodeKind::Aggregation {
                group_by,
                aggregates,
                ..
            } => {
                let child = node.children.first().ok_or_else(|| {
                    PlannerError::Planning("aggregation without input".to_string())
                })?;
                let input = self.convert_node(child, parallel)?;
                Ok(Box::new(
                    HashAggregateOperator::new(group_by.clone(), aggregates.clone(), input)
                        .with_cost(node.cost),
                ))
            }
            LogicalNodeKind::Sort { keys } => {
                let child = node.children.first().ok_or_else(|| {
                    PlannerError::Planning("sort without input".to_string())
                })?;
                let input = self.convert_node(child, parallel)?;
                Ok(Box::new(
                    SortOperator::new(keys.clone(), input).with_cost(node.cost),
                ))
            }
            LogicalNodeKind::Limit { limit, offset } => {
                let child = node.children.first().ok_or_else(|| {
                    PlannerError::Planning("limit without input".to_string())
                })?;
                let input = self.convert_node(child, parallel)?;
                Ok(Box::new(
                    LimitOperator::new(*limit, *offset, input).with_cost(node.cost),
                ))
            }
            LogicalNodeKind::Union { all } => {
                let mut children = Vec::with_capacity(node.children.len());
                for child in &node.children {
                    children.push(self.convert_node(child, parallel)?);
                }
                Ok(Box::new(
                    AppendOperator::new(children, !*all).with_cost(node.cost),
                ))
            }
            LogicalNodeKind::Intersect { .. } | LogicalNodeKind::Except { .. } => {
                Err(PlannerError::NotImplemented(
                    "INTERSECT/EXCEPT execution".to_string(),
                ))
            }
            LogicalNodeKind::Insert { .. }
            | LogicalNodeKind::Update { .. }
            | LogicalNodeKind::Delete { .. } => Err(PlannerError::NotImplemented(
                "DML execution (writes are planned but not executed)".to_string(),
            )),
        }
    }

    fn convert_table_scan(
        &self,
        node: &LogicalPlanNode,
        table_name: &str,
        alias: &str,
        filters: Vec<BoundExpression>,
        parallel: bool,
    ) -> Box<dyn PhysicalOperator> {
        if parallel {
            let degree = self.calculate_parallel_degree(node);
            if degree > 1 {
                return Box::new(
                    ParallelSequentialScanOperator::new(table_name.to_string(), degree)
                        .with_filters(filters)
                        .with_cost(node.cost)
                        .with_output_columns(node.output_columns.clone()),
                );
            }
        }

        // An index access method beats the sequential scan when registered
        // and cheaper
        if let Some(best) = self.select_best_access_method(table_name, &filters) {
            if best.kind == AccessMethodKind::IndexScan && !best.index_name.is_empty() {
                debug!(table = table_name, index = %best.index_name, "index scan selected");
                return Box::new(
                    IndexScanOperator::new(table_name.to_string(), best.index_name, alias)
                        .with_filters(filters)
                        .with_cost(node.cost)
                        .with_output_columns(node.output_columns.clone()),
                );
            }
        }

        Box::new(
            SequentialScanOperator::new(table_name.to_string(), alias)
                .with_filters(filters)
                .with_cost(node.cost)
                .with_output_columns(node.output_columns.clone()),
        )
    }

    fn convert_selection(
        &self,
        node: &LogicalPlanNode,
        conditions: &[BoundExpression],
        parallel: bool,
    ) -> Result<Box<dyn PhysicalOperator>> {
        let mut child = node.children.first().ok_or_else(|| {
            PlannerError::Planning("selection without input".to_string())
        })?;

        // Projections are absorbed during conversion, so look through them
        // when hunting for a scan to push into
        while matches!(child.kind, LogicalNodeKind::Projection { .. }) {
            match child.children.first() {
                Some(grandchild) => child = grandchild,
                None => break,
            }
        }

        // Push the predicates into a scan child; otherwise keep an explicit
        // filtering operator
        match &child.kind {
            LogicalNodeKind::TableScan {
                table_name,
                alias,
                filters,
            } => {
                let mut merged = filters.clone();
                merged.extend(conditions.iter().cloned());
                let mut scan_node = child.clone();
                scan_node.cost = node.cost;
                Ok(self.convert_table_scan(&scan_node, table_name, alias, merged, parallel))
            }
            LogicalNodeKind::IndexScan {
                table_name,
                index_name,
                alias,
                index_conditions,
                filters,
            } => {
                let mut merged = filters.clone();
                merged.extend(conditions.iter().cloned());
                Ok(Box::new(
                    IndexScanOperator::new(
                        table_name.clone(),
                        index_name.clone(),
                        alias.clone(),
                    )
                    .with_index_conditions(index_conditions.clone())
                    .with_filters(merged)
                    .with_cost(node.cost)
                    .with_output_columns(child.output_columns.clone()),
                ))
            }
            _ => {
                let input = self.convert_node(child, parallel)?;
                Ok(Box::new(
                    FilterOperator::new(conditions.to_vec(), input)
                        .with_cost(node.cost)
                        .with_output_columns(node.output_columns.clone()),
                ))
            }
        }
    }

    fn convert_join(
        &self,
        node: &LogicalPlanNode,
        join_type: JoinType,
        conditions: &[BoundExpression],
        parallel: bool,
    ) -> Result<Box<dyn PhysicalOperator>> {
        let [left, right] = node.children.as_slice() else {
            return Err(PlannerError::Planning(
                "join requires exactly two inputs".to_string(),
            ));
        };

        let left_operator = self.convert_node(left, parallel)?;
        let right_operator = self.convert_node(right, parallel)?;

        if self.should_use_hash_join(left, right) {
            debug!(
                left_rows = left.cost.estimated_rows,
                right_rows = right.cost.estimated_rows,
                "hash join selected"
            );
            Ok(Box::new(
                HashJoinOperator::new(
                    join_type,
                    conditions.to_vec(),
                    left_operator,
                    right_operator,
                )
                .with_cost(node.cost)
                .with_output_columns(node.output_columns.clone()),
            ))
        } else {
            Ok(Box::new(
                NestedLoopJoinOperator::new(
                    join_type,
                    conditions.to_vec(),
                    left_operator,
                    right_operator,
                )
                .with_cost(node.cost)
                .with_output_columns(node.output_columns.clone()),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Algorithm selection
    // ------------------------------------------------------------------

    /// Hash join when either side exceeds the threshold, the sides are not
    /// approximately equal, and hash joins are enabled.
    pub fn should_use_hash_join(&self, left: &LogicalPlanNode, right: &LogicalPlanNode) -> bool {
        if !self.config.enable_hash_joins {
            return false;
        }

        let left_rows = left.cost.estimated_rows;
        let right_rows = right.cost.estimated_rows;

        (left_rows > self.config.hash_join_threshold
            || right_rows > self.config.hash_join_threshold)
            && left_rows != right_rows
    }

    fn select_best_access_method(
        &self,
        table_name: &str,
        _conditions: &[BoundExpression],
    ) -> Option<AccessMethod> {
        let heap_cost = self.get_table_stats(table_name).row_count as f64 * 0.01;

        let methods = self.access_methods.get(table_name)?;
        methods
            .iter()
            .filter(|method| method.cost < heap_cost)
            .min_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }

    // ------------------------------------------------------------------
    // Parallelization
    // ------------------------------------------------------------------

    pub fn should_parallelize(&self, node: &LogicalPlanNode) -> bool {
        self.config.enable_parallel_execution
            && node.cost.total_cost > self.config.parallel_threshold
    }

    /// Workers proportional to the row count, clamped to the configured
    /// ceiling and never below one.
    pub fn calculate_parallel_degree(&self, node: &LogicalPlanNode) -> usize {
        (node.cost.estimated_rows / 10_000)
            .min(self.config.max_parallel_workers)
            .max(1)
    }

    // ------------------------------------------------------------------
    // Memory budgeting
    // ------------------------------------------------------------------

    /// Estimated memory footprint of a subtree: hash-join builds at 64 bytes
    /// per row, sorts at 32, aggregates at 50 per group, plus a base cost
    /// per operator.
    pub fn estimate_memory_usage(&self, node: &LogicalPlanNode) -> usize {
        let own = match &node.kind {
            LogicalNodeKind::HashJoin { .. } => node
                .children
                .get(1)
                .map(|build| build.cost.estimated_rows * 64)
                .unwrap_or(1024),
            LogicalNodeKind::Sort { .. } => node
                .children
                .first()
                .map(|input| input.cost.estimated_rows * 32)
                .unwrap_or(1024),
            LogicalNodeKind::Aggregation { .. } => node.cost.estimated_rows * 50,
            _ => 1024,
        };

        own + node
            .children
            .iter()
            .map(|child| self.estimate_memory_usage(child))
            .sum::<usize>()
    }

    pub fn should_use_temp_files(&self, node: &LogicalPlanNode) -> bool {
        self.estimate_memory_usage(node) > self.config.work_mem
    }
}

impl Default for PhysicalPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Binder;
    use crate::logical::LogicalPlanner;
    use crate::schema::{
        ColumnDefinition, ColumnType, DatabaseSchema, SchemaRegistry, TableDefinition,
    };

    fn registry() -> Arc<SchemaRegistry> {
        let schema = DatabaseSchema::new("test");
        schema
            .add_table(TableDefinition::new(
                "users",
                vec![
                    ColumnDefinition::new("id", ColumnType::Integer).primary_key(),
                    ColumnDefinition::new("name", ColumnType::Varchar).max_length(100),
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

    fn logical_plan_with_stats(
        sql: &str,
        stats: &[(&str, usize)],
    ) -> crate::logical::LogicalPlan {
        let statement = Binder::new(registry()).bind(sql).unwrap();
        let mut planner = LogicalPlanner::new();
        for (table, rows) in stats {
            planner.set_table_stats(
                table.to_string(),
                TableStatistics {
                    row_count: *rows,
                    ..Default::default()
                },
            );
        }
        planner.plan(&statement).unwrap()
    }

    #[test]
    fn test_hash_join_selected_above_threshold() {
        let plan = logical_plan_with_stats(
            "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id",
            &[("users", 100), ("orders", 100_000)],
        );
        let physical = PhysicalPlanner::new().create_physical_plan(&plan).unwrap();
        let display = physical.to_display();
        assert!(display.contains("Hash Inner Join"), "got:\n{}", display);
        assert!(!display.contains("Nested Loop"));
    }

    #[test]
    fn test_nested_loop_below_threshold() {
        let plan = logical_plan_with_stats(
            "SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id",
            &[("users", 100), ("orders", 200)],
        );
        let physical = PhysicalPlanner::new().create_physical_plan(&plan).unwrap();
        assert!(physical.to_display().contains("Nested Loop Inner Join"));
    }

    #[test]
    fn test_selection_pushed_into_scan() {
        let statement = Binder::new(registry())
            .bind("SELECT id, name FROM users WHERE id > 10")
            .unwrap();
        let logical_planner = LogicalPlanner::new();
        let plan = logical_planner.plan(&statement).unwrap();
        let optimized = logical_planner.optimize(&plan);

        let physical = PhysicalPlanner::new()
            .create_physical_plan(&optimized)
            .unwrap();
        let display = physical.to_display();
        assert!(display.contains("Seq Scan on users"));
        assert!(display.contains("Filter: id > 10"));
        // The selection collapsed into the scan: no standalone Filter node
        assert!(!display.contains("\nFilter ("), "got:\n{}", display);
    }

    #[test]
    fn test_index_access_method_wins_when_cheaper() {
        let plan = logical_plan_with_stats("SELECT id FROM users", &[("users", 10_000)]);

        let mut planner = PhysicalPlanner::new();
        planner.set_table_stats(
            "users",
            TableStatistics {
                row_count: 10_000,
                ..Default::default()
            },
        );
        planner.add_access_method(
            "users",
            AccessMethod {
                kind: AccessMethodKind::IndexScan,
                index_name: "idx_users_id".to_string(),
                key_columns: vec!["id".to_string()],
                selectivity: 0.1,
                cost: 5.0,
            },
        );

        let physical = planner.create_physical_plan(&plan).unwrap();
        assert!(physical
            .to_display()
            .contains("Index Scan using idx_users_id on users"));
    }

    #[test]
    fn test_parallel_alternative_generated() {
        let plan = logical_plan_with_stats("SELECT * FROM users", &[("users", 500_000)]);

        let mut config = PhysicalPlannerConfig::default();
        config.max_parallel_workers = 4;
        let planner = PhysicalPlanner::with_config(config);

        let plans = planner.generate_alternative_physical_plans(&plan).unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans[1].to_display().contains("Parallel Seq Scan on users"));
    }

    #[test]
    fn test_parallel_degree_clamped() {
        let mut config = PhysicalPlannerConfig::default();
        config.max_parallel_workers = 4;
        let planner = PhysicalPlanner::with_config(config);

        let mut node = LogicalPlanNode::new(LogicalNodeKind::TableScan {
            table_name: "users".to_string(),
            alias: "users".to_string(),
            filters: vec![],
        });
        node.cost.estimated_rows = 1_000_000;
        assert_eq!(planner.calculate_parallel_degree(&node), 4);

        node.cost.estimated_rows = 5;
        assert_eq!(planner.calculate_parallel_degree(&node), 1);
    }

    #[test]
    fn test_memory_budget_flags_temp_files() {
        let plan = logical_plan_with_stats(
            "SELECT id FROM users ORDER BY id",
            &[("users", 1_000_000)],
        );

        let mut config = PhysicalPlannerConfig::default();
        config.work_mem = 1024;
        let planner = PhysicalPlanner::with_config(config);
        assert!(planner.should_use_temp_files(&plan.root));

        let small = logical_plan_with_stats("SELECT id FROM users", &[("users", 10)]);
        let planner = PhysicalPlanner::new();
        assert!(!planner.should_use_temp_files(&small.root));
    }

    #[test]
    fn test_dml_is_not_executable() {
        let statement = Binder::new(registry())
            .bind("DELETE FROM users WHERE id = 1")
            .unwrap();
        let plan = LogicalPlanner::new().plan(&statement).unwrap();
        let result = PhysicalPlanner::new().create_physical_plan(&plan);
        assert!(matches!(result, Err(PlannerError::NotImplemented(_))));
    }
}
