// Physical operator implementations.
//
// All operators speak the pull-based batch protocol defined in
// `crate::physical`. Predicate and key evaluation in this version is
// intentionally simple: equality probes and first-column keys over the
// string-encoded tuple representation.

mod filter;
mod hash_aggregate;
mod hash_join;
mod index_scan;
mod limit;
mod mock;
mod nested_loop_join;
mod parallel_scan;
mod seq_scan;
mod sort;
mod union_all;

pub use filter::FilterOperator;
pub use hash_aggregate::HashAggregateOperator;
pub use hash_join::HashJoinOperator;
pub use index_scan::IndexScanOperator;
pub use limit::LimitOperator;
pub use mock::MockDataGenerator;
pub use nested_loop_join::NestedLoopJoinOperator;
pub use parallel_scan::ParallelSequentialScanOperator;
pub use seq_scan::SequentialScanOperator;
pub use sort::SortOperator;
pub use union_all::AppendOperator;

use crate::bound::{BoundExpression, BoundExpressionKind};
use crate::logical::PlanCost;
use crate::physical::Tuple;

/// Position of a (possibly qualified) column name in a column list; falls
/// back to the first column when the name cannot be matched.
pub(crate) fn column_index(name: &str, columns: &[String]) -> usize {
    let bare = name.rsplit('.').next().unwrap_or(name);
    columns
        .iter()
        .position(|column| column == name || column == bare)
        .unwrap_or(0)
}

/// Evaluate a filter predicate against a tuple.
///
/// Supported shape: equality between a column reference and a constant,
/// combined with AND/OR. Anything else passes (the planner keeps those
/// predicates for display; full expression evaluation is a later stage).
pub(crate) fn evaluate_predicate(
    predicate: &BoundExpression,
    tuple: &Tuple,
    columns: &[String],
) -> bool {
    match &predicate.kind {
        BoundExpressionKind::BinaryOp { op, left, right } => match op.as_str() {
            "AND" => {
                evaluate_predicate(left, tuple, columns)
                    && evaluate_predicate(right, tuple, columns)
            }
            "OR" => {
                evaluate_predicate(left, tuple, columns)
                    || evaluate_predicate(right, tuple, columns)
            }
            "=" => match (&left.kind, &right.kind) {
                (
                    BoundExpressionKind::ColumnRef { .. },
                    BoundExpressionKind::Constant { value },
                ) => tuple.value(column_index(&left.text, columns)) == value,
                (
                    BoundExpressionKind::Constant { value },
                    BoundExpressionKind::ColumnRef { .. },
                ) => tuple.value(column_index(&right.text, columns)) == value,
                _ => true,
            },
            _ => true,
        },
        _ => true,
    }
}

/// Evaluate every predicate in the list (implicit conjunction).
pub(crate) fn passes_filters(
    filters: &[BoundExpression],
    tuple: &Tuple,
    columns: &[String],
) -> bool {
    filters
        .iter()
        .all(|filter| evaluate_predicate(filter, tuple, columns))
}

/// One display line for an operator head: `<indent><name> (cost=...)`.
pub(crate) fn push_head(out: &mut String, indent: usize, name: &str, cost: &PlanCost) {
    out.push_str(&"  ".repeat(indent));
    out.push_str(name);
    out.push_str(&format!(" ({})\n", cost));
}

/// Detail line indented one step past the operator head.
pub(crate) fn push_detail(out: &mut String, indent: usize, detail: &str) {
    out.push_str(&"  ".repeat(indent + 1));
    out.push_str(detail);
    out.push('\n');
}

/// AND-joined display of a predicate list.
pub(crate) fn render_conditions(conditions: &[BoundExpression]) -> String {
    conditions
        .iter()
        .map(|condition| condition.text.clone())
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn column_expr(text: &str) -> BoundExpression {
        BoundExpression {
            kind: BoundExpressionKind::ColumnRef {
                table_id: 1,
                column_id: 1,
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: text.to_string(),
        }
    }

    fn constant_expr(value: &str) -> BoundExpression {
        BoundExpression {
            kind: BoundExpressionKind::Constant {
                value: value.to_string(),
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: value.to_string(),
        }
    }

    fn equality(column: &str, value: &str) -> BoundExpression {
        BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: "=".to_string(),
                left: Box::new(column_expr(column)),
                right: Box::new(constant_expr(value)),
            },
            result_type: ColumnType::Boolean,
            nullable: false,
            text: format!("{} = {}", column, value),
        }
    }

    #[test]
    fn test_column_index_resolution() {
        let columns = vec!["id".to_string(), "name".to_string()];
        assert_eq!(column_index("name", &columns), 1);
        assert_eq!(column_index("u.name", &columns), 1);
        assert_eq!(column_index("missing", &columns), 0);
    }

    #[test]
    fn test_equality_predicate() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let tuple = Tuple::new(vec!["5".to_string(), "alice".to_string()]);

        assert!(evaluate_predicate(&equality("id", "5"), &tuple, &columns));
        assert!(!evaluate_predicate(&equality("id", "7"), &tuple, &columns));
        assert!(evaluate_predicate(&equality("name", "alice"), &tuple, &columns));
    }

    #[test]
    fn test_conjunction_and_unsupported_predicates() {
        let columns = vec!["id".to_string()];
        let tuple = Tuple::new(vec!["5".to_string()]);

        let both = BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: "AND".to_string(),
                left: Box::new(equality("id", "5")),
                right: Box::new(equality("id", "6")),
            },
            result_type: ColumnType::Boolean,
            nullable: false,
            text: "id = 5 AND id = 6".to_string(),
        };
        assert!(!evaluate_predicate(&both, &tuple, &columns));

        // A range predicate is not evaluated and passes through
        let range = BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: ">".to_string(),
                left: Box::new(column_expr("id")),
                right: Box::new(constant_expr("100")),
            },
            result_type: ColumnType::Boolean,
            nullable: false,
            text: "id > 100".to_string(),
        };
        assert!(evaluate_predicate(&range, &tuple, &columns));
    }
}
