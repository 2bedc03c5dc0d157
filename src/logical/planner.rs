// Logical planner: BoundStatement -> LogicalPlan.
//
// Bottom-up assembly (scan -> joins -> selection -> projection -> aggregation
// -> sort -> limit), bottom-up cost estimation from table statistics, and
// rule-based rewrites (predicate pushdown, projection pushdown placeholder,
// join reordering). The planner never re-parses SQL text.

use super::{LogicalNodeKind, LogicalPlan, LogicalPlanNode, PlanCost, SortKey};
use crate::bound::{
    BoundExpression, BoundExpressionKind, BoundSelect, BoundStatement, BoundTableRef, SetOpKind,
};
use crate::error::PlannerError;
use crate::Result;
use std::collections::HashMap;
use tracing::debug;

/// Per-table statistics supplied by the caller.
#[derive(Debug, Clone)]
pub struct TableStatistics {
    pub row_count: usize,
    pub avg_row_size: f64,
    pub column_selectivity: HashMap<String, f64>,
    pub distinct_values: HashMap<String, usize>,
}

impl Default for TableStatistics {
    fn default() -> Self {
        Self {
            row_count: 1000,
            avg_row_size: 100.0,
            column_selectivity: HashMap::new(),
            distinct_values: HashMap::new(),
        }
    }
}

/// Cost parameters and feature toggles (PostgreSQL-flavored defaults).
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub enable_hash_joins: bool,
    pub enable_merge_joins: bool,
    pub enable_index_scans: bool,
    pub random_page_cost: f64,
    pub seq_page_cost: f64,
    pub cpu_tuple_cost: f64,
    pub cpu_index_tuple_cost: f64,
    pub cpu_operator_cost: f64,
    pub work_mem: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_hash_joins: true,
            enable_merge_joins: true,
            enable_index_scans: true,
            random_page_cost: 4.0,
            seq_page_cost: 1.0,
            cpu_tuple_cost: 0.01,
            cpu_index_tuple_cost: 0.005,
            cpu_operator_cost: 0.0025,
            work_mem: 1024 * 1024,
        }
    }
}

/// Disk page size used by the scan cost model.
const PAGE_SIZE_BYTES: f64 = 8192.0;

pub struct LogicalPlanner {
    config: PlannerConfig,
    table_stats: HashMap<String, TableStatistics>,
}

impl LogicalPlanner {
    pub fn new() -> Self {
        Self::with_config(PlannerConfig::default())
    }

    pub fn with_config(config: PlannerConfig) -> Self {
        Self {
            config,
            table_stats: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlannerConfig) {
        self.config = config;
    }

    pub fn set_table_stats(&mut self, table_name: impl Into<String>, stats: TableStatistics) {
        self.table_stats.insert(table_name.into(), stats);
    }

    pub fn get_table_stats(&self, table_name: &str) -> TableStatistics {
        self.table_stats
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Plan construction
    // ------------------------------------------------------------------

    pub fn plan(&self, statement: &BoundStatement) -> Result<LogicalPlan> {
        let root = match statement {
            BoundStatement::Select(select) => self.plan_select(select),
            BoundStatement::Insert(insert) => {
                let mut node = LogicalPlanNode::new(LogicalNodeKind::Insert {
                    table_name: insert.target_table.table_name.clone(),
                    target_columns: insert
                        .target_columns
                        .iter()
                        .filter_map(|&column_id| {
                            column_name(&insert.target_table, column_id)
                        })
                        .collect(),
                    value_rows: match &insert.source {
                        crate::bound::InsertSource::Values(rows) => rows.clone(),
                        crate::bound::InsertSource::Select(_) => Vec::new(),
                    },
                });
                if let crate::bound::InsertSource::Select(select) = &insert.source {
                    node.children.push(self.plan_select(select));
                }
                node
            }
            BoundStatement::Update(update) => {
                let scan = self.scan_for(&update.target_table);
                let child = self.wrap_where(scan, update.where_clause.as_ref());
                LogicalPlanNode::new(LogicalNodeKind::Update {
                    table_name: update.target_table.table_name.clone(),
                    target_columns: update
                        .assignments
                        .iter()
                        .filter_map(|(column_id, _)| {
                            column_name(&update.target_table, *column_id)
                        })
                        .collect(),
                    values: update.assignments.iter().map(|(_, e)| e.clone()).collect(),
                })
                .with_child(child)
            }
            BoundStatement::Delete(delete) => {
                let scan = self.scan_for(&delete.target_table);
                let child = self.wrap_where(scan, delete.where_clause.as_ref());
                LogicalPlanNode::new(LogicalNodeKind::Delete {
                    table_name: delete.target_table.table_name.clone(),
                })
                .with_child(child)
            }
        };

        let mut plan = LogicalPlan::new(root);
        for table_ref in statement.table_refs().values() {
            plan.table_aliases
                .insert(table_ref.alias.clone(), table_ref.table_name.clone());
        }

        self.estimate_costs(&mut plan.root);
        plan.refresh_total_cost();
        Ok(plan)
    }

    fn plan_select(&self, select: &BoundSelect) -> LogicalPlanNode {
        let mut root = self.plan_select_core(select);

        // Set operations combine the anchor with further arms before the
        // trailing sort/limit applies
        for set_op in &select.set_operations {
            let kind = match set_op.op {
                SetOpKind::Union => LogicalNodeKind::Union { all: set_op.all },
                SetOpKind::Intersect => LogicalNodeKind::Intersect { all: set_op.all },
                SetOpKind::Except => LogicalNodeKind::Except { all: set_op.all },
            };
            let right = self.plan_select(&set_op.right);
            let output = root.output_columns.clone();
            let mut combined = LogicalPlanNode::new(kind);
            combined.children.push(root);
            combined.children.push(right);
            combined.output_columns = output;
            root = combined;
        }

        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .iter()
                .map(|order| SortKey {
                    expr: order.expr.clone(),
                    ascending: order.ascending,
                    nulls_first: order.nulls_first,
                })
                .collect();
            let output = root.output_columns.clone();
            let mut sort = LogicalPlanNode::new(LogicalNodeKind::Sort { keys });
            sort.children.push(root);
            sort.output_columns = output;
            root = sort;
        }

        if select.limit.is_some() || select.offset.is_some() {
            let output = root.output_columns.clone();
            let mut limit = LogicalPlanNode::new(LogicalNodeKind::Limit {
                limit: select.limit,
                offset: select.offset,
            });
            limit.children.push(root);
            limit.output_columns = output;
            root = limit;
        }

        root
    }

    /// Scan -> joins -> selection -> projection -> aggregation for one select
    /// arm (no trailing sort/limit).
    fn plan_select_core(&self, select: &BoundSelect) -> LogicalPlanNode {
        let mut root = match &select.from_table {
            Some(table_ref) => {
                let mut scan = self.scan_for(table_ref);
                self.estimate_costs(&mut scan);
                scan
            }
            None => {
                // FROM-less select: a projection with no input
                let mut projection = LogicalPlanNode::new(LogicalNodeKind::Projection {
                    exprs: select.select_list.clone(),
                    aliases: select.select_aliases.clone(),
                });
                projection.output_columns =
                    select.select_list.iter().map(|e| e.text.clone()).collect();
                return projection;
            }
        };

        for join in &select.joins {
            let mut right = self.scan_for(&join.table);
            self.estimate_costs(&mut right);

            let conditions: Vec<BoundExpression> = join
                .condition
                .as_ref()
                .map(|c| split_conjuncts(c))
                .unwrap_or_default();

            let left_rows = root.cost.estimated_rows;
            let right_rows = right.cost.estimated_rows;
            let mut output = root.output_columns.clone();
            output.extend(right.output_columns.iter().cloned());

            root = if self.config.enable_hash_joins && left_rows < right_rows {
                // Put the smaller accumulated side on the build (right) side
                debug!(left_rows, right_rows, "building hash join");
                let mut join_node = LogicalPlanNode::new(LogicalNodeKind::HashJoin {
                    join_type: join.join_type,
                    conditions,
                });
                join_node.children.push(right);
                join_node.children.push(root);
                join_node
            } else {
                let mut join_node = LogicalPlanNode::new(LogicalNodeKind::NestedLoopJoin {
                    join_type: join.join_type,
                    conditions,
                });
                join_node.children.push(root);
                join_node.children.push(right);
                join_node
            };
            root.output_columns = output;
        }

        root = self.wrap_where(root, select.where_clause.as_ref());

        if !select.is_star && !select.select_list.is_empty() {
            let output: Vec<String> = select
                .select_list
                .iter()
                .enumerate()
                .map(|(i, expr)| {
                    select
                        .select_aliases
                        .get(i)
                        .and_then(Clone::clone)
                        .unwrap_or_else(|| expr.text.clone())
                })
                .collect();
            let mut projection = LogicalPlanNode::new(LogicalNodeKind::Projection {
                exprs: select.select_list.clone(),
                aliases: select.select_aliases.clone(),
            });
            projection.children.push(root);
            projection.output_columns = output;
            root = projection;
        }

        let aggregates: Vec<BoundExpression> = select
            .select_list
            .iter()
            .filter(|expr| expr.contains_aggregate())
            .cloned()
            .collect();
        if !select.group_by.is_empty() || !aggregates.is_empty() {
            let mut output: Vec<String> =
                select.group_by.iter().map(|e| e.text.clone()).collect();
            output.extend(aggregates.iter().map(|e| e.text.clone()));
            let mut aggregation = LogicalPlanNode::new(LogicalNodeKind::Aggregation {
                group_by: select.group_by.clone(),
                aggregates,
                having: select
                    .having
                    .as_ref()
                    .map(|h| split_conjuncts(h))
                    .unwrap_or_default(),
            });
            aggregation.children.push(root);
            aggregation.output_columns = output;
            root = aggregation;
        }

        root
    }

    fn scan_for(&self, table_ref: &BoundTableRef) -> LogicalPlanNode {
        let mut scan = LogicalPlanNode::new(LogicalNodeKind::TableScan {
            table_name: table_ref.table_name.clone(),
            alias: table_ref.alias.clone(),
            filters: Vec::new(),
        });
        scan.output_columns = table_ref
            .column_definitions
            .iter()
            .map(|column| column.name.clone())
            .collect();
        scan
    }

    fn wrap_where(
        &self,
        child: LogicalPlanNode,
        where_clause: Option<&BoundExpression>,
    ) -> LogicalPlanNode {
        match where_clause {
            Some(condition) => {
                let output = child.output_columns.clone();
                let mut selection = LogicalPlanNode::new(LogicalNodeKind::Selection {
                    conditions: split_conjuncts(condition),
                });
                selection.children.push(child);
                selection.output_columns = output;
                selection
            }
            None => child,
        }
    }

    // ------------------------------------------------------------------
    // Cost estimation
    // ------------------------------------------------------------------

    /// Recompute costs bottom-up for the whole subtree.
    pub fn estimate_costs(&self, node: &mut LogicalPlanNode) {
        for child in &mut node.children {
            self.estimate_costs(child);
        }

        match &node.kind {
            LogicalNodeKind::TableScan {
                table_name,
                filters,
                ..
            } => {
                let stats = self.get_table_stats(table_name);
                let rows = stats.row_count as f64;
                let pages = rows * stats.avg_row_size / PAGE_SIZE_BYTES;
                let selectivity = self.estimate_selectivity(filters);

                node.cost.startup_cost = 0.0;
                node.cost.total_cost =
                    pages * self.config.seq_page_cost + rows * self.config.cpu_tuple_cost;
                node.cost.estimated_rows = (rows * selectivity) as usize;
                node.cost.selectivity = selectivity;
            }
            LogicalNodeKind::IndexScan {
                table_name,
                index_conditions,
                ..
            } => {
                let stats = self.get_table_stats(table_name);
                let rows = stats.row_count as f64;
                let selectivity = self.estimate_selectivity(index_conditions);
                let selected = rows * selectivity;
                let descent = if rows > 1.0 { rows.log2() } else { 0.0 };

                node.cost.startup_cost = 0.0;
                node.cost.total_cost = descent * self.config.random_page_cost
                    + selected * self.config.random_page_cost
                    + selected * self.config.cpu_index_tuple_cost;
                node.cost.estimated_rows = selected as usize;
                node.cost.selectivity = selectivity;
            }
            LogicalNodeKind::NestedLoopJoin { conditions, .. }
            | LogicalNodeKind::MergeJoin { conditions, .. } => {
                if let [left, right] = node.children.as_slice() {
                    let selectivity = self.estimate_selectivity(conditions);
                    let left_rows = left.cost.estimated_rows as f64;
                    let right_rows = right.cost.estimated_rows as f64;
                    let join_cost =
                        left_rows * right_rows * selectivity * self.config.cpu_tuple_cost;

                    node.cost.startup_cost = left.cost.startup_cost + right.cost.startup_cost;
                    node.cost.total_cost =
                        left.cost.total_cost + right.cost.total_cost + join_cost;
                    node.cost.estimated_rows = (left_rows * right_rows * selectivity) as usize;
                    node.cost.selectivity = selectivity;
                }
            }
            LogicalNodeKind::HashJoin { conditions, .. } => {
                if let [left, right] = node.children.as_slice() {
                    let selectivity = self.estimate_selectivity(conditions);
                    let left_rows = left.cost.estimated_rows as f64;
                    let right_rows = right.cost.estimated_rows as f64;
                    // Build on the right child, probe with the left
                    let build_cost = right_rows * self.config.cpu_tuple_cost;
                    let probe_cost = left_rows * self.config.cpu_tuple_cost * 0.5;

                    node.cost.startup_cost =
                        left.cost.startup_cost + right.cost.total_cost + build_cost;
                    node.cost.total_cost = left.cost.total_cost
                        + right.cost.total_cost
                        + build_cost
                        + probe_cost;
                    node.cost.estimated_rows = (left_rows * right_rows * selectivity) as usize;
                    node.cost.selectivity = selectivity;
                }
            }
            LogicalNodeKind::Projection { .. } => match node.children.as_slice() {
                [child] => {
                    let child_rows = child.cost.estimated_rows as f64;
                    node.cost.startup_cost = child.cost.startup_cost;
                    node.cost.total_cost =
                        child.cost.total_cost + child_rows * self.config.cpu_tuple_cost;
                    node.cost.estimated_rows = child.cost.estimated_rows;
                    node.cost.selectivity = child.cost.selectivity;
                }
                _ => {
                    // FROM-less projection produces one row
                    node.cost.startup_cost = 0.0;
                    node.cost.total_cost = self.config.cpu_tuple_cost;
                    node.cost.estimated_rows = 1;
                    node.cost.selectivity = 1.0;
                }
            },
            LogicalNodeKind::Selection { conditions } => {
                if let [child] = node.children.as_slice() {
                    let selectivity = self.estimate_selectivity(conditions);
                    let child_rows = child.cost.estimated_rows as f64;

                    node.cost.startup_cost = child.cost.startup_cost;
                    node.cost.total_cost =
                        child.cost.total_cost + child_rows * self.config.cpu_operator_cost;
                    node.cost.estimated_rows = (child_rows * selectivity) as usize;
                    node.cost.selectivity = selectivity;
                }
            }
            LogicalNodeKind::Aggregation { group_by, .. } => {
                if let [child] = node.children.as_slice() {
                    let child_rows = child.cost.estimated_rows as f64;
                    node.cost.startup_cost =
                        child.cost.total_cost + child_rows * self.config.cpu_operator_cost;
                    node.cost.total_cost = node.cost.startup_cost;
                    node.cost.estimated_rows = if group_by.is_empty() {
                        1
                    } else {
                        ((child_rows / 10.0) as usize).max(1)
                    };
                    node.cost.selectivity = child.cost.selectivity;
                }
            }
            LogicalNodeKind::Sort { .. } => {
                if let [child] = node.children.as_slice() {
                    let child_rows = child.cost.estimated_rows as f64;
                    let sort_cost = if child_rows > 1.0 {
                        child_rows * child_rows.log2() * self.config.cpu_operator_cost
                    } else {
                        0.0
                    };

                    // Blocking: nothing comes out before the sort finishes
                    node.cost.startup_cost = child.cost.total_cost + sort_cost;
                    node.cost.total_cost = node.cost.startup_cost;
                    node.cost.estimated_rows = child.cost.estimated_rows;
                    node.cost.selectivity = child.cost.selectivity;
                }
            }
            LogicalNodeKind::Limit { limit, offset } => {
                if let [child] = node.children.as_slice() {
                    let child_rows = child.cost.estimated_rows;
                    let after_offset =
                        child_rows.saturating_sub(offset.unwrap_or(0) as usize);
                    let output_rows = match limit {
                        Some(limit) => after_offset.min(*limit as usize),
                        None => after_offset,
                    };
                    let fraction = if child_rows > 0 {
                        output_rows as f64 / child_rows as f64
                    } else {
                        0.0
                    };

                    node.cost.startup_cost = child.cost.startup_cost;
                    node.cost.total_cost =
                        child.cost.startup_cost + child.cost.total_cost * fraction;
                    node.cost.estimated_rows = output_rows;
                    node.cost.selectivity = child.cost.selectivity;
                }
            }
            LogicalNodeKind::Union { .. } => {
                node.cost.startup_cost = node
                    .children
                    .iter()
                    .map(|c| c.cost.startup_cost)
                    .fold(0.0, f64::max);
                node.cost.total_cost = node.children.iter().map(|c| c.cost.total_cost).sum();
                node.cost.estimated_rows =
                    node.children.iter().map(|c| c.cost.estimated_rows).sum();
            }
            LogicalNodeKind::Intersect { .. } => {
                node.cost.total_cost = node.children.iter().map(|c| c.cost.total_cost).sum();
                node.cost.estimated_rows = node
                    .children
                    .iter()
                    .map(|c| c.cost.estimated_rows)
                    .min()
                    .unwrap_or(0);
            }
            LogicalNodeKind::Except { .. } => {
                node.cost.total_cost = node.children.iter().map(|c| c.cost.total_cost).sum();
                node.cost.estimated_rows = node
                    .children
                    .first()
                    .map(|c| c.cost.estimated_rows)
                    .unwrap_or(0);
            }
            LogicalNodeKind::Insert { value_rows, .. } => {
                let child_cost: f64 = node.children.iter().map(|c| c.cost.total_cost).sum();
                let rows = if value_rows.is_empty() {
                    node.children
                        .first()
                        .map(|c| c.cost.estimated_rows)
                        .unwrap_or(0)
                } else {
                    value_rows.len()
                };
                node.cost.total_cost = child_cost + rows as f64 * self.config.cpu_tuple_cost;
                node.cost.estimated_rows = rows;
            }
            LogicalNodeKind::Update { .. } | LogicalNodeKind::Delete { .. } => {
                if let [child] = node.children.as_slice() {
                    let rows = child.cost.estimated_rows;
                    node.cost.startup_cost = child.cost.startup_cost;
                    node.cost.total_cost =
                        child.cost.total_cost + rows as f64 * self.config.cpu_tuple_cost;
                    node.cost.estimated_rows = rows;
                    node.cost.selectivity = child.cost.selectivity;
                }
            }
        }
    }

    /// Combined selectivity of a condition list: product of per-condition
    /// heuristics, clamped to [0.001, 1.0]. Empty list = 1.0.
    pub fn estimate_selectivity(&self, conditions: &[BoundExpression]) -> f64 {
        if conditions.is_empty() {
            return 1.0;
        }

        let mut selectivity = 1.0;
        for condition in conditions {
            selectivity *= condition_selectivity(condition);
        }
        selectivity.clamp(0.001, 1.0)
    }

    // ------------------------------------------------------------------
    // Rewrites
    // ------------------------------------------------------------------

    /// Apply the rewrite pipeline and recompute costs. Each pass is
    /// idempotent; running optimize twice yields the same plan.
    pub fn optimize(&self, plan: &LogicalPlan) -> LogicalPlan {
        let mut optimized = plan.copy();

        optimized.root = transform(optimized.root, &predicate_pushdown_rule);
        optimized.root = transform(optimized.root, &projection_pushdown_rule);
        optimized.root = transform(optimized.root, &join_reordering_rule);

        self.estimate_costs(&mut optimized.root);
        optimized.refresh_total_cost();
        optimized
    }

    /// Base plan plus its optimized variant (when different), for comparison
    /// by the physical planner or callers.
    pub fn generate_alternative_plans(
        &self,
        statement: &BoundStatement,
    ) -> Result<Vec<LogicalPlan>> {
        let base = self.plan(statement)?;
        let optimized = self.optimize(&base);

        let mut plans = vec![base];
        if plans[0].root != optimized.root {
            plans.push(optimized);
        }
        if plans.is_empty() {
            return Err(PlannerError::Planning("no plan generated".to_string()));
        }
        Ok(plans)
    }
}

impl Default for LogicalPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn column_name(table_ref: &BoundTableRef, column_id: usize) -> Option<String> {
    let index = table_ref
        .available_columns
        .iter()
        .position(|&id| id == column_id)?;
    table_ref
        .column_definitions
        .get(index)
        .map(|column| column.name.clone())
}

/// Split top-level AND chains into a condition list.
fn split_conjuncts(expr: &BoundExpression) -> Vec<BoundExpression> {
    match &expr.kind {
        BoundExpressionKind::BinaryOp { op, left, right } if op == "AND" => {
            let mut conditions = split_conjuncts(left);
            conditions.extend(split_conjuncts(right));
            conditions
        }
        _ => vec![expr.clone()],
    }
}

/// Per-condition selectivity heuristic: equality 0.1, range 0.3, LIKE 0.2,
/// conjunctions multiply, everything else 0.5.
fn condition_selectivity(condition: &BoundExpression) -> f64 {
    match &condition.kind {
        BoundExpressionKind::BinaryOp { op, left, right } => match op.as_str() {
            "=" => 0.1,
            "<" | ">" | "<=" | ">=" => 0.3,
            "LIKE" | "ILIKE" => 0.2,
            "AND" => condition_selectivity(left) * condition_selectivity(right),
            _ => 0.5,
        },
        _ => 0.5,
    }
}

/// Post-order transform: rewrite children first, then the node itself.
fn transform(
    mut node: LogicalPlanNode,
    rule: &impl Fn(LogicalPlanNode) -> LogicalPlanNode,
) -> LogicalPlanNode {
    node.children = node
        .children
        .into_iter()
        .map(|child| transform(child, rule))
        .collect();
    rule(node)
}

/// Predicate pushdown: a Projection directly above a Selection is swapped so
/// the filter runs first.
fn predicate_pushdown_rule(node: LogicalPlanNode) -> LogicalPlanNode {
    if !matches!(node.kind, LogicalNodeKind::Projection { .. }) {
        return node;
    }
    let child_is_selection = node
        .children
        .first()
        .map(|child| {
            matches!(child.kind, LogicalNodeKind::Selection { .. }) && !child.children.is_empty()
        })
        .unwrap_or(false);
    if !child_is_selection {
        return node;
    }

    let mut projection = node;
    let mut selection = projection.children.remove(0);
    let grandchild = selection.children.remove(0);

    projection.children.insert(0, grandchild);
    // The selection's output narrows to what the projection produces
    selection.output_columns = projection.output_columns.clone();
    selection.children.push(projection);
    selection
}

/// Placeholder pass: the interface exists so the rewrite pipeline stays
/// symmetric, with no behavior change yet.
fn projection_pushdown_rule(node: LogicalPlanNode) -> LogicalPlanNode {
    node
}

/// Join reordering: for a nested-loop join whose right child is smaller,
/// swap children so the smaller relation drives the outer loop. Hash joins
/// already take the smaller side as build and are left alone.
fn join_reordering_rule(mut node: LogicalPlanNode) -> LogicalPlanNode {
    if matches!(node.kind, LogicalNodeKind::NestedLoopJoin { .. }) && node.children.len() == 2 {
        let left_rows = node.children[0].cost.estimated_rows;
        let right_rows = node.children[1].cost.estimated_rows;
        if right_rows < left_rows {
            node.children.swap(0, 1);
        }
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Binder;
    use crate::schema::{
        ColumnDefinition, ColumnType, DatabaseSchema, SchemaRegistry, TableDefinition,
    };
    use std::sync::Arc;

    fn registry() -> Arc<SchemaRegistry> {
        let schema = DatabaseSchema::new("test");
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

    fn plan_sql(sql: &str) -> LogicalPlan {
        let statement = Binder::new(registry()).bind(sql).unwrap();
        LogicalPlanner::new().plan(&statement).unwrap()
    }

    #[test]
    fn test_simple_select_shape() {
        let plan = plan_sql("SELECT id, name, email FROM users");
        match &plan.root.kind {
            LogicalNodeKind::Projection { exprs, .. } => assert_eq!(exprs.len(), 3),
            other => panic!("expected Projection at root, got {:?}", other),
        }
        assert!(matches!(
            plan.root.children[0].kind,
            LogicalNodeKind::TableScan { .. }
        ));
        assert!(plan.root.to_display(0).contains("Output: id, name, email"));
    }

    #[test]
    fn test_select_star_has_no_projection() {
        let plan = plan_sql("SELECT * FROM users");
        assert!(matches!(plan.root.kind, LogicalNodeKind::TableScan { .. }));
    }

    #[test]
    fn test_where_builds_projection_over_selection() {
        let plan = plan_sql("SELECT id, name FROM users WHERE id > 10 AND name LIKE 'A%'");
        // Initial shape: Projection above Selection (filter below project)
        match &plan.root.kind {
            LogicalNodeKind::Projection { .. } => {}
            other => panic!("expected Projection, got {:?}", other),
        }
        match &plan.root.children[0].kind {
            LogicalNodeKind::Selection { conditions } => assert_eq!(conditions.len(), 2),
            other => panic!("expected Selection, got {:?}", other),
        }
    }

    #[test]
    fn test_pushdown_swaps_projection_and_selection() {
        let planner = LogicalPlanner::new();
        let statement = Binder::new(registry())
            .bind("SELECT id, name FROM users WHERE id > 10 AND name LIKE 'A%'")
            .unwrap();
        let plan = planner.plan(&statement).unwrap();
        let optimized = planner.optimize(&plan);

        match &optimized.root.kind {
            LogicalNodeKind::Selection { .. } => {}
            other => panic!("expected Selection at root after pushdown, got {:?}", other),
        }
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
    fn test_optimize_is_idempotent() {
        let planner = LogicalPlanner::new();
        let statement = Binder::new(registry())
            .bind("SELECT id, name FROM users WHERE id > 10")
            .unwrap();
        let plan = planner.plan(&statement).unwrap();
        let once = planner.optimize(&plan);
        let twice = planner.optimize(&once);
        assert_eq!(once.root, twice.root);
    }

    #[test]
    fn test_rewrites_preserve_column_refs() {
        let planner = LogicalPlanner::new();
        let statement = Binder::new(registry())
            .bind("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE o.total > 10")
            .unwrap();
        let plan = planner.plan(&statement).unwrap();
        let optimized = planner.optimize(&plan);
        assert_eq!(
            plan.root.collect_column_refs(),
            optimized.root.collect_column_refs()
        );
    }

    #[test]
    fn test_cost_invariants() {
        let plan = plan_sql("SELECT id FROM users WHERE id > 10 ORDER BY id LIMIT 5");
        plan.root.for_each(&mut |node| {
            assert!(node.cost.total_cost >= node.cost.startup_cost);
            assert!(node.cost.startup_cost >= 0.0);
        });
    }

    #[test]
    fn test_selectivity_heuristics() {
        let planner = LogicalPlanner::new();
        let statement = Binder::new(registry())
            .bind("SELECT id FROM users WHERE id = 5")
            .unwrap();
        let select = statement.as_select().unwrap();
        let conditions = vec![select.where_clause.clone().unwrap()];
        let selectivity = planner.estimate_selectivity(&conditions);
        assert!((selectivity - 0.1).abs() < 1e-9);

        assert_eq!(planner.estimate_selectivity(&[]), 1.0);
    }

    #[test]
    fn test_selectivity_clamped() {
        let planner = LogicalPlanner::new();
        let statement = Binder::new(registry())
            .bind("SELECT id FROM users WHERE id = 1 AND id = 2 AND id = 3 AND id = 4")
            .unwrap();
        let select = statement.as_select().unwrap();
        let conditions = split_conjuncts(select.where_clause.as_ref().unwrap());
        let selectivity = planner.estimate_selectivity(&conditions);
        assert!(selectivity >= 0.001);
    }

    #[test]
    fn test_join_reordering_puts_smaller_outer() {
        let mut planner = LogicalPlanner::new();
        let mut config = PlannerConfig::default();
        config.enable_hash_joins = false;
        planner.set_config(config);
        planner.set_table_stats(
            "users",
            TableStatistics {
                row_count: 100_000,
                ..Default::default()
            },
        );
        planner.set_table_stats(
            "orders",
            TableStatistics {
                row_count: 10,
                ..Default::default()
            },
        );

        let statement = Binder::new(registry())
            .bind("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id")
            .unwrap();
        let plan = planner.plan(&statement).unwrap();
        let optimized = planner.optimize(&plan);

        let mut join_seen = false;
        optimized.root.for_each(&mut |node| {
            if let LogicalNodeKind::NestedLoopJoin { .. } = node.kind {
                join_seen = true;
                let left = node.children[0].cost.estimated_rows;
                let right = node.children[1].cost.estimated_rows;
                assert!(left <= right, "outer side should be the smaller relation");
            }
        });
        assert!(join_seen);
    }

    #[test]
    fn test_group_by_adds_aggregation() {
        let plan = plan_sql("SELECT user_id, count(*) FROM orders GROUP BY user_id");
        match &plan.root.kind {
            LogicalNodeKind::Aggregation {
                group_by,
                aggregates,
                ..
            } => {
                assert_eq!(group_by.len(), 1);
                assert_eq!(aggregates.len(), 1);
            }
            other => panic!("expected Aggregation, got {:?}", other),
        }
    }

    #[test]
    fn test_update_plan_shape() {
        let plan = plan_sql("UPDATE users SET name = 'x' WHERE id = 1");
        match &plan.root.kind {
            LogicalNodeKind::Update { table_name, .. } => assert_eq!(table_name, "users"),
            other => panic!("expected Update, got {:?}", other),
        }
        assert!(matches!(
            plan.root.children[0].kind,
            LogicalNodeKind::Selection { .. }
        ));
    }

    #[test]
    fn test_limit_cost_rows() {
        let plan = plan_sql("SELECT id FROM users LIMIT 5");
        assert_eq!(plan.root.cost.estimated_rows, 5);
    }
}
