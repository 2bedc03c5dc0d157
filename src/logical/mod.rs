// Logical plan model: the algebraic plan tree produced from bound statements.
//
// Nodes are a tagged sum (`LogicalNodeKind`) with unique ownership of their
// children; copy is a derive(Clone) deep copy and printing is a formatter
// keyed on the tag. Costs live on every node and are recomputed bottom-up by
// the planner.

pub mod planner;

pub use planner::{LogicalPlanner, PlannerConfig, TableStatistics};

use crate::bound::{BoundExpression, JoinType};
use crate::schema::{ColumnId, TableId};
use std::collections::HashMap;
use std::fmt;

/// Cost annotation: startup cost, total cost, output cardinality, and the
/// selectivity applied at this node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanCost {
    pub startup_cost: f64,
    pub total_cost: f64,
    pub estimated_rows: usize,
    pub selectivity: f64,
}

impl Default for PlanCost {
    fn default() -> Self {
        Self {
            startup_cost: 0.0,
            total_cost: 0.0,
            estimated_rows: 0,
            selectivity: 1.0,
        }
    }
}

impl fmt::Display for PlanCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cost={:.2}..{:.2} rows={}",
            self.startup_cost, self.total_cost, self.estimated_rows
        )
    }
}

/// Sort key: expression plus direction and null placement.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: BoundExpression,
    pub ascending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    fn display(&self) -> String {
        let mut out = self.expr.text.clone();
        if !self.ascending {
            out.push_str(" DESC");
        }
        // Only print null placement when it differs from the default
        // (NULLS LAST for ascending, NULLS FIRST for descending)
        if self.nulls_first && self.ascending {
            out.push_str(" NULLS FIRST");
        } else if !self.nulls_first && !self.ascending {
            out.push_str(" NULLS LAST");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalNodeKind {
    TableScan {
        table_name: String,
        alias: String,
        filters: Vec<BoundExpression>,
    },
    IndexScan {
        table_name: String,
        index_name: String,
        alias: String,
        index_conditions: Vec<BoundExpression>,
        filters: Vec<BoundExpression>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        conditions: Vec<BoundExpression>,
    },
    HashJoin {
        join_type: JoinType,
        conditions: Vec<BoundExpression>,
    },
    MergeJoin {
        join_type: JoinType,
        conditions: Vec<BoundExpression>,
    },
    Projection {
        exprs: Vec<BoundExpression>,
        aliases: Vec<Option<String>>,
    },
    Selection {
        conditions: Vec<BoundExpression>,
    },
    Aggregation {
        group_by: Vec<BoundExpression>,
        aggregates: Vec<BoundExpression>,
        having: Vec<BoundExpression>,
    },
    Sort {
        keys: Vec<SortKey>,
    },
    Limit {
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Union {
        all: bool,
    },
    Intersect {
        all: bool,
    },
    Except {
        all: bool,
    },
    Insert {
        table_name: String,
        target_columns: Vec<String>,
        value_rows: Vec<Vec<BoundExpression>>,
    },
    Update {
        table_name: String,
        target_columns: Vec<String>,
        values: Vec<BoundExpression>,
    },
    Delete {
        table_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPlanNode {
    pub kind: LogicalNodeKind,
    pub cost: PlanCost,
    pub children: Vec<LogicalPlanNode>,
    pub output_columns: Vec<String>,
}

impl LogicalPlanNode {
    pub fn new(kind: LogicalNodeKind) -> Self {
        Self {
            kind,
            cost: PlanCost::default(),
            children: Vec::new(),
            output_columns: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: LogicalPlanNode) -> Self {
        self.children.push(child);
        self
    }

    /// Deep copy with independent ownership.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Pre-order traversal.
    pub fn for_each<'a>(&'a self, visit: &mut impl FnMut(&'a LogicalPlanNode)) {
        visit(self);
        for child in &self.children {
            child.for_each(visit);
        }
    }

    /// Every `(table_id, column_id)` referenced anywhere in this subtree.
    /// Rewrite passes must preserve this set.
    pub fn collect_column_refs(&self) -> Vec<(TableId, ColumnId)> {
        let mut refs = Vec::new();
        self.for_each(&mut |node| {
            for expr in node.expressions() {
                expr.collect_column_refs(&mut refs);
            }
        });
        refs.sort_unstable();
        refs
    }

    /// All expressions attached to this node.
    pub fn expressions(&self) -> Vec<&BoundExpression> {
        match &self.kind {
            LogicalNodeKind::TableScan { filters, .. } => filters.iter().collect(),
            LogicalNodeKind::IndexScan {
                index_conditions,
                filters,
                ..
            } => index_conditions.iter().chain(filters.iter()).collect(),
            LogicalNodeKind::NestedLoopJoin { conditions, .. }
            | LogicalNodeKind::HashJoin { conditions, .. }
            | LogicalNodeKind::MergeJoin { conditions, .. } => conditions.iter().collect(),
            LogicalNodeKind::Projection { exprs, .. } => exprs.iter().collect(),
            LogicalNodeKind::Selection { conditions } => conditions.iter().collect(),
            LogicalNodeKind::Aggregation {
                group_by,
                aggregates,
                having,
            } => group_by
                .iter()
                .chain(aggregates.iter())
                .chain(having.iter())
                .collect(),
            LogicalNodeKind::Sort { keys } => keys.iter().map(|key| &key.expr).collect(),
            LogicalNodeKind::Insert { value_rows, .. } => {
                value_rows.iter().flat_map(|row| row.iter()).collect()
            }
            LogicalNodeKind::Update { values, .. } => values.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// One line per node: `<indent><name> (cost=<s>..<t> rows=<n>)`, detail
    /// lines indented one step further.
    pub fn to_display(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        let detail_pad = "  ".repeat(indent + 1);
        let mut out = format!("{}{} ({})\n", pad, self.node_name(), self.cost);

        match &self.kind {
            LogicalNodeKind::TableScan { filters, .. } => {
                if !filters.is_empty() {
                    out.push_str(&format!("{}Filter: {}\n", detail_pad, join_texts(filters)));
                }
            }
            LogicalNodeKind::IndexScan {
                index_conditions,
                filters,
                ..
            } => {
                if !index_conditions.is_empty() {
                    out.push_str(&format!(
                        "{}Index Cond: {}\n",
                        detail_pad,
                        join_texts(index_conditions)
                    ));
                }
                if !filters.is_empty() {
                    out.push_str(&format!("{}Filter: {}\n", detail_pad, join_texts(filters)));
                }
            }
            LogicalNodeKind::NestedLoopJoin { conditions, .. }
            | LogicalNodeKind::MergeJoin { conditions, .. } => {
                if !conditions.is_empty() {
                    out.push_str(&format!(
                        "{}Join Filter: {}\n",
                        detail_pad,
                        join_texts(conditions)
                    ));
                }
            }
            LogicalNodeKind::HashJoin { conditions, .. } => {
                if !conditions.is_empty() {
                    out.push_str(&format!(
                        "{}Hash Cond: {}\n",
                        detail_pad,
                        join_texts(conditions)
                    ));
                }
            }
            LogicalNodeKind::Projection { exprs, aliases } => {
                if !exprs.is_empty() {
                    let rendered: Vec<String> = exprs
                        .iter()
                        .enumerate()
                        .map(|(i, expr)| match aliases.get(i).and_then(|a| a.as_ref()) {
                            Some(alias) => format!("{} AS {}", expr.text, alias),
                            None => expr.text.clone(),
                        })
                        .collect();
                    out.push_str(&format!("{}Output: {}\n", detail_pad, rendered.join(", ")));
                }
            }
            LogicalNodeKind::Selection { conditions } => {
                if !conditions.is_empty() {
                    out.push_str(&format!("{}Filter: {}\n", detail_pad, join_texts(conditions)));
                }
            }
            LogicalNodeKind::Aggregation {
                group_by,
                aggregates,
                having,
            } => {
                if !group_by.is_empty() {
                    out.push_str(&format!(
                        "{}Group Key: {}\n",
                        detail_pad,
                        comma_texts(group_by)
                    ));
                }
                if !aggregates.is_empty() {
                    out.push_str(&format!(
                        "{}Aggregates: {}\n",
                        detail_pad,
                        comma_texts(aggregates)
                    ));
                }
                if !having.is_empty() {
                    out.push_str(&format!("{}Filter: {}\n", detail_pad, join_texts(having)));
                }
            }
            LogicalNodeKind::Sort { keys } => {
                if !keys.is_empty() {
                    let rendered: Vec<String> = keys.iter().map(SortKey::display).collect();
                    out.push_str(&format!("{}Sort Key: {}\n", detail_pad, rendered.join(", ")));
                }
            }
            LogicalNodeKind::Limit { limit, offset } => {
                let mut line = String::new();
                if let Some(offset) = offset {
                    if *offset > 0 {
                        line.push_str(&format!("Offset: {} ", offset));
                    }
                }
                match limit {
                    Some(limit) => line.push_str(&format!("Limit: {}", limit)),
                    None => line.push_str("Limit: ALL"),
                }
                out.push_str(&format!("{}{}\n", detail_pad, line));
            }
            LogicalNodeKind::Insert {
                target_columns, ..
            } => {
                if !target_columns.is_empty() {
                    out.push_str(&format!(
                        "{}Columns: {}\n",
                        detail_pad,
                        target_columns.join(", ")
                    ));
                }
            }
            _ => {}
        }

        for child in &self.children {
            out.push_str(&child.to_display(indent + 1));
        }

        out
    }

    pub fn node_name(&self) -> String {
        match &self.kind {
            LogicalNodeKind::TableScan {
                table_name, alias, ..
            } => {
                if alias.is_empty() || alias == table_name {
                    format!("Seq Scan on {}", table_name)
                } else {
                    format!("Seq Scan on {} {}", table_name, alias)
                }
            }
            LogicalNodeKind::IndexScan {
                table_name,
                index_name,
                alias,
                ..
            } => {
                if alias.is_empty() || alias == table_name {
                    format!("Index Scan using {} on {}", index_name, table_name)
                } else {
                    format!("Index Scan using {} on {} {}", index_name, table_name, alias)
                }
            }
            LogicalNodeKind::NestedLoopJoin { join_type, .. } => {
                format!("Nested Loop {}", join_type)
            }
            LogicalNodeKind::HashJoin { join_type, .. } => format!("Hash {}", join_type),
            LogicalNodeKind::MergeJoin { join_type, .. } => format!("Merge {}", join_type),
            LogicalNodeKind::Projection { .. } => "Projection".to_string(),
            LogicalNodeKind::Selection { .. } => "Filter".to_string(),
            LogicalNodeKind::Aggregation { .. } => "Aggregate".to_string(),
            LogicalNodeKind::Sort { .. } => "Sort".to_string(),
            LogicalNodeKind::Limit { .. } => "Limit".to_string(),
            LogicalNodeKind::Union { all } => {
                if *all {
                    "Union All".to_string()
                } else {
                    "Union".to_string()
                }
            }
            LogicalNodeKind::Intersect { .. } => "Intersect".to_string(),
            LogicalNodeKind::Except { .. } => "Except".to_string(),
            LogicalNodeKind::Insert { table_name, .. } => format!("Insert on {}", table_name),
            LogicalNodeKind::Update { table_name, .. } => format!("Update on {}", table_name),
            LogicalNodeKind::Delete { table_name } => format!("Delete on {}", table_name),
        }
    }
}

fn join_texts(exprs: &[BoundExpression]) -> String {
    exprs
        .iter()
        .map(|expr| expr.text.clone())
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn comma_texts(exprs: &[BoundExpression]) -> String {
    exprs
        .iter()
        .map(|expr| expr.text.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A complete logical plan.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalPlan {
    pub root: LogicalPlanNode,
    pub table_aliases: HashMap<String, String>,
    pub total_cost: PlanCost,
}

impl LogicalPlan {
    pub fn new(root: LogicalPlanNode) -> Self {
        let total_cost = root.cost;
        Self {
            root,
            table_aliases: HashMap::new(),
            total_cost,
        }
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn refresh_total_cost(&mut self) {
        self.total_cost = self.root.cost;
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root.to_display(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::BoundExpressionKind;
    use crate::schema::ColumnType;

    fn filter_expr() -> BoundExpression {
        BoundExpression {
            kind: BoundExpressionKind::Constant {
                value: "true".to_string(),
            },
            result_type: ColumnType::Boolean,
            nullable: false,
            text: "id > 10".to_string(),
        }
    }

    fn scan(table: &str) -> LogicalPlanNode {
        LogicalPlanNode::new(LogicalNodeKind::TableScan {
            table_name: table.to_string(),
            alias: table.to_string(),
            filters: Vec::new(),
        })
    }

    #[test]
    fn test_display_format() {
        let mut node = LogicalPlanNode::new(LogicalNodeKind::Selection {
            conditions: vec![filter_expr()],
        })
        .with_child(scan("users"));
        node.cost = PlanCost {
            startup_cost: 0.0,
            total_cost: 12.5,
            estimated_rows: 100,
            selectivity: 0.3,
        };

        let text = node.to_display(0);
        assert!(text.starts_with("Filter (cost=0.00..12.50 rows=100)\n"));
        assert!(text.contains("  Filter: id > 10\n"));
        assert!(text.contains("  Seq Scan on users (cost=0.00..0.00 rows=0)\n"));
    }

    #[test]
    fn test_copy_is_independent() {
        let original = LogicalPlanNode::new(LogicalNodeKind::Projection {
            exprs: vec![filter_expr()],
            aliases: vec![None],
        })
        .with_child(scan("users"));

        let mut copied = original.copy();
        copied.children[0].cost.total_cost = 99.0;
        assert_eq!(original.children[0].cost.total_cost, 0.0);
        assert_ne!(copied.children[0].cost, original.children[0].cost);
    }

    #[test]
    fn test_sort_key_display() {
        let key = SortKey {
            expr: filter_expr(),
            ascending: false,
            nulls_first: true,
        };
        assert_eq!(key.display(), "id > 10 DESC");

        let key = SortKey {
            expr: filter_expr(),
            ascending: false,
            nulls_first: false,
        };
        assert_eq!(key.display(), "id > 10 DESC NULLS LAST");
    }

    #[test]
    fn test_traversal_order() {
        let tree = LogicalPlanNode::new(LogicalNodeKind::Limit {
            limit: Some(5),
            offset: None,
        })
        .with_child(
            LogicalPlanNode::new(LogicalNodeKind::Selection { conditions: vec![] })
                .with_child(scan("users")),
        );

        let mut names = Vec::new();
        tree.for_each(&mut |node| names.push(node.node_name()));
        assert_eq!(names, vec!["Limit", "Filter", "Seq Scan on users"]);
    }
}
