// Bound statement model: the fully-typed IR produced by the binder.
//
// Every identifier has been replaced by a stable schema id; every expression
// carries its resolved result type and nullability. Plan layers consume this
// model and never look at the AST again.

use crate::schema::{ColumnId, ColumnType, ColumnDefinition, IndexDefinition, TableId};
use std::collections::HashMap;
use std::fmt;

/// Parameter types: the column types plus `Unknown` for parameters whose
/// context has not fixed a type yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Integer,
    BigInt,
    Varchar,
    Text,
    Boolean,
    Timestamp,
    Date,
    Decimal,
    Json,
    Uuid,
    Unknown,
}

impl From<ColumnType> for ParameterType {
    fn from(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Integer => ParameterType::Integer,
            ColumnType::BigInt => ParameterType::BigInt,
            ColumnType::Varchar => ParameterType::Varchar,
            ColumnType::Text => ParameterType::Text,
            ColumnType::Boolean => ParameterType::Boolean,
            ColumnType::Timestamp => ParameterType::Timestamp,
            ColumnType::Date => ParameterType::Date,
            ColumnType::Decimal => ParameterType::Decimal,
            ColumnType::Json => ParameterType::Json,
            ColumnType::Uuid => ParameterType::Uuid,
        }
    }
}

/// A `$N` placeholder collected during binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// 1-based, matching `$N`
    pub index: usize,
    pub param_type: ParameterType,
    pub nullable: bool,
}

/// Join kinds carried from the AST into plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
    Semi,
    Anti,
}

impl JoinType {
    pub fn display_name(self) -> &'static str {
        match self {
            JoinType::Inner => "Inner Join",
            JoinType::LeftOuter => "Left Join",
            JoinType::RightOuter => "Right Join",
            JoinType::FullOuter => "Full Join",
            JoinType::Cross => "Cross Join",
            JoinType::Semi => "Semi Join",
            JoinType::Anti => "Anti Join",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Set operations combining select arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

/// Aggregate function names the planner recognizes.
pub const AGGREGATE_FUNCTIONS: [&str; 5] = ["count", "sum", "avg", "min", "max"];

#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpressionKind {
    /// Resolved column reference. For CTE virtual tables the column id is
    /// 0-based positional; for schema tables it is the registry's 1-based id.
    ColumnRef {
        table_id: TableId,
        column_id: ColumnId,
    },
    /// Literal, stored as canonical text
    Constant { value: String },
    Parameter(BoundParameter),
    FunctionCall {
        name: String,
        args: Vec<BoundExpression>,
    },
    BinaryOp {
        op: String,
        left: Box<BoundExpression>,
        right: Box<BoundExpression>,
    },
    /// NOT and friends
    UnaryOp {
        op: String,
        operand: Box<BoundExpression>,
    },
    Subquery { statement: Box<BoundSelect> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundExpression {
    pub kind: BoundExpressionKind,
    pub result_type: ColumnType,
    pub nullable: bool,
    /// Display form used in plan output ("u.id", "id > 10", "count(*)")
    pub text: String,
}

impl BoundExpression {
    pub fn is_column_ref(&self) -> bool {
        matches!(self.kind, BoundExpressionKind::ColumnRef { .. })
    }

    pub fn is_aggregate_call(&self) -> bool {
        match &self.kind {
            BoundExpressionKind::FunctionCall { name, .. } => {
                AGGREGATE_FUNCTIONS.contains(&name.as_str())
            }
            _ => false,
        }
    }

    /// True when any node of the expression tree is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        if self.is_aggregate_call() {
            return true;
        }
        match &self.kind {
            BoundExpressionKind::FunctionCall { args, .. } => {
                args.iter().any(BoundExpression::contains_aggregate)
            }
            BoundExpressionKind::BinaryOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            BoundExpressionKind::UnaryOp { operand, .. } => operand.contains_aggregate(),
            _ => false,
        }
    }

    /// Collect every `(table_id, column_id)` referenced by this expression.
    pub fn collect_column_refs(&self, out: &mut Vec<(TableId, ColumnId)>) {
        match &self.kind {
            BoundExpressionKind::ColumnRef {
                table_id,
                column_id,
            } => out.push((*table_id, *column_id)),
            BoundExpressionKind::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_column_refs(out);
                }
            }
            BoundExpressionKind::BinaryOp { left, right, .. } => {
                left.collect_column_refs(out);
                right.collect_column_refs(out);
            }
            BoundExpressionKind::UnaryOp { operand, .. } => operand.collect_column_refs(out),
            _ => {}
        }
    }

    /// Visit parameters in the tree, depth-first.
    pub fn visit_parameters<'a>(&'a self, visit: &mut impl FnMut(&'a BoundParameter)) {
        match &self.kind {
            BoundExpressionKind::Parameter(parameter) => visit(parameter),
            BoundExpressionKind::FunctionCall { args, .. } => {
                for arg in args {
                    arg.visit_parameters(visit);
                }
            }
            BoundExpressionKind::BinaryOp { left, right, .. } => {
                left.visit_parameters(visit);
                right.visit_parameters(visit);
            }
            BoundExpressionKind::UnaryOp { operand, .. } => operand.visit_parameters(visit),
            _ => {}
        }
    }
}

impl fmt::Display for BoundExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ---------------------------------------------------------------------
// Table references and CTEs
// ---------------------------------------------------------------------

/// A table reference with its schema resolved at bind time.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundTableRef {
    pub table_id: TableId,
    pub table_name: String,
    pub alias: String,
    pub available_columns: Vec<ColumnId>,
    pub column_name_to_id: HashMap<String, ColumnId>,
    pub column_definitions: Vec<ColumnDefinition>,
    pub available_indexes: Vec<IndexDefinition>,
}

impl BoundTableRef {
    pub fn is_cte(&self) -> bool {
        self.table_id >= crate::schema::CTE_TABLE_ID_BASE
    }
}

/// A CTE registered while binding one statement. The temp table id lives in
/// the CTE namespace (>= 10000) and is only meaningful within that binding.
#[derive(Debug, Clone, PartialEq)]
pub struct CteDefinition {
    pub name: String,
    pub column_names: Vec<String>,
    pub column_types: Vec<ColumnType>,
    pub statement: Box<BoundSelect>,
    pub is_recursive: bool,
    pub temp_table_id: TableId,
}

// ---------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BoundOrderBy {
    pub expr: BoundExpression,
    pub ascending: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundJoin {
    pub table: BoundTableRef,
    pub join_type: JoinType,
    pub condition: Option<BoundExpression>,
}

/// A further select arm combined with the anchor by a set operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSetOperation {
    pub op: SetOpKind,
    pub all: bool,
    pub right: Box<BoundSelect>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundSelect {
    pub select_list: Vec<BoundExpression>,
    /// Output alias per select-list entry (`expr AS name`)
    pub select_aliases: Vec<Option<String>>,
    /// True when the select list came from `*` expansion
    pub is_star: bool,
    pub from_table: Option<BoundTableRef>,
    pub joins: Vec<BoundJoin>,
    pub where_clause: Option<BoundExpression>,
    pub group_by: Vec<BoundExpression>,
    pub having: Option<BoundExpression>,
    pub order_by: Vec<BoundOrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub ctes: Vec<CteDefinition>,
    pub set_operations: Vec<BoundSetOperation>,
    /// Tables visible in this statement, by name and by alias
    pub table_refs: HashMap<String, BoundTableRef>,
    pub parameters: Vec<BoundParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<BoundExpression>>),
    Select(Box<BoundSelect>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundInsert {
    pub target_table: BoundTableRef,
    pub target_columns: Vec<ColumnId>,
    pub source: InsertSource,
    pub conflict_columns: Vec<ColumnId>,
    pub returning_columns: Vec<ColumnId>,
    pub table_refs: HashMap<String, BoundTableRef>,
    pub parameters: Vec<BoundParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundUpdate {
    pub target_table: BoundTableRef,
    pub assignments: Vec<(ColumnId, BoundExpression)>,
    pub where_clause: Option<BoundExpression>,
    pub returning_columns: Vec<ColumnId>,
    pub table_refs: HashMap<String, BoundTableRef>,
    pub parameters: Vec<BoundParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundDelete {
    pub target_table: BoundTableRef,
    pub where_clause: Option<BoundExpression>,
    pub returning_columns: Vec<ColumnId>,
    pub table_refs: HashMap<String, BoundTableRef>,
    pub parameters: Vec<BoundParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundStatement {
    Select(BoundSelect),
    Insert(BoundInsert),
    Update(BoundUpdate),
    Delete(BoundDelete),
}

impl BoundStatement {
    pub fn table_refs(&self) -> &HashMap<String, BoundTableRef> {
        match self {
            BoundStatement::Select(select) => &select.table_refs,
            BoundStatement::Insert(insert) => &insert.table_refs,
            BoundStatement::Update(update) => &update.table_refs,
            BoundStatement::Delete(delete) => &delete.table_refs,
        }
    }

    pub fn parameters(&self) -> &[BoundParameter] {
        match self {
            BoundStatement::Select(select) => &select.parameters,
            BoundStatement::Insert(insert) => &insert.parameters,
            BoundStatement::Update(update) => &update.parameters,
            BoundStatement::Delete(delete) => &delete.parameters,
        }
    }

    pub fn as_select(&self) -> Option<&BoundSelect> {
        match self {
            BoundStatement::Select(select) => Some(select),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(table_id: TableId, column_id: ColumnId, name: &str) -> BoundExpression {
        BoundExpression {
            kind: BoundExpressionKind::ColumnRef {
                table_id,
                column_id,
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: name.to_string(),
        }
    }

    #[test]
    fn test_aggregate_detection() {
        let count = BoundExpression {
            kind: BoundExpressionKind::FunctionCall {
                name: "count".to_string(),
                args: vec![],
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: "count(*)".to_string(),
        };
        assert!(count.is_aggregate_call());
        assert!(count.contains_aggregate());

        let sum_inside = BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: "+".to_string(),
                left: Box::new(count.clone()),
                right: Box::new(column(1, 1, "id")),
            },
            result_type: ColumnType::Integer,
            nullable: false,
            text: "count(*) + id".to_string(),
        };
        assert!(!sum_inside.is_aggregate_call());
        assert!(sum_inside.contains_aggregate());

        assert!(!column(1, 1, "id").contains_aggregate());
    }

    #[test]
    fn test_collect_column_refs() {
        let expr = BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: "=".to_string(),
                left: Box::new(column(1, 1, "u.id")),
                right: Box::new(column(2, 2, "o.user_id")),
            },
            result_type: ColumnType::Boolean,
            nullable: false,
            text: "u.id = o.user_id".to_string(),
        };

        let mut refs = Vec::new();
        expr.collect_column_refs(&mut refs);
        assert_eq!(refs, vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn test_parameter_visit() {
        let param = BoundExpression {
            kind: BoundExpressionKind::Parameter(BoundParameter {
                index: 1,
                param_type: ParameterType::Unknown,
                nullable: true,
            }),
            result_type: ColumnType::Text,
            nullable: true,
            text: "$1".to_string(),
        };
        let expr = BoundExpression {
            kind: BoundExpressionKind::BinaryOp {
                op: ">".to_string(),
                left: Box::new(column(1, 1, "id")),
                right: Box::new(param),
            },
            result_type: ColumnType::Boolean,
            nullable: true,
            text: "id > $1".to_string(),
        };

        let mut seen = Vec::new();
        expr.visit_parameters(&mut |p| seen.push(p.index));
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn test_cte_table_ids_are_namespaced() {
        let table_ref = BoundTableRef {
            table_id: crate::schema::CTE_TABLE_ID_BASE,
            table_name: "s".to_string(),
            alias: "s".to_string(),
            available_columns: vec![0],
            column_name_to_id: HashMap::from([("n".to_string(), 0)]),
            column_definitions: vec![],
            available_indexes: vec![],
        };
        assert!(table_ref.is_cte());
    }
}
