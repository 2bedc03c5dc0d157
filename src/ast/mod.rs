// AST adapter: a narrow, typed interface over the parser's JSON tree.
//
// The binder never touches raw JSON key names; every node shape the pipeline
// relies on ("is this a ColumnRef?", "give me the A_Const value") goes
// through this module. The JSON document follows the libpg_query layout:
//
//   { "stmts": [ { "stmt": { "SelectStmt": { ... } } } ] }
//
// String leaves accept both `sval` and `str` key variants for parser-version
// tolerance.

use serde_json::Value;

/// Top-level statement kinds the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

/// One field of a ColumnRef: either a name segment or `*`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRefField {
    Name(String),
    Star,
}

/// Decoded A_Const payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Integer(i64),
    Float(String),
    String(String),
    Boolean(bool),
    Null,
}

// ---------------------------------------------------------------------
// Document level
// ---------------------------------------------------------------------

/// The `stmt` nodes of a parse document, in order.
pub fn statements(document: &Value) -> Vec<&Value> {
    document
        .get("stmts")
        .and_then(Value::as_array)
        .map(|stmts| stmts.iter().filter_map(|entry| entry.get("stmt")).collect())
        .unwrap_or_default()
}

/// Classify a `stmt` node and return its payload.
pub fn statement_kind(stmt: &Value) -> Option<(StatementKind, &Value)> {
    if let Some(node) = stmt.get("SelectStmt") {
        return Some((StatementKind::Select, node));
    }
    if let Some(node) = stmt.get("InsertStmt") {
        return Some((StatementKind::Insert, node));
    }
    if let Some(node) = stmt.get("UpdateStmt") {
        return Some((StatementKind::Update, node));
    }
    if let Some(node) = stmt.get("DeleteStmt") {
        return Some((StatementKind::Delete, node));
    }
    None
}

// ---------------------------------------------------------------------
// SelectStmt accessors
// ---------------------------------------------------------------------

pub fn with_clause(select: &Value) -> Option<&Value> {
    non_null(select.get("withClause"))
}

pub fn target_list(select: &Value) -> Vec<&Value> {
    array_items(select.get("targetList"))
}

pub fn from_clause(select: &Value) -> Vec<&Value> {
    array_items(select.get("fromClause"))
}

pub fn where_clause(select: &Value) -> Option<&Value> {
    non_null(select.get("whereClause"))
}

pub fn group_clause(select: &Value) -> Vec<&Value> {
    array_items(select.get("groupClause"))
}

pub fn having_clause(select: &Value) -> Option<&Value> {
    non_null(select.get("havingClause"))
}

pub fn sort_clause(select: &Value) -> Vec<&Value> {
    array_items(select.get("sortClause"))
}

pub fn limit_count(select: &Value) -> Option<&Value> {
    non_null(select.get("limitCount"))
}

pub fn limit_offset(select: &Value) -> Option<&Value> {
    non_null(select.get("limitOffset"))
}

/// Set-operation fields: `(op, all, larg, rarg)` when the SelectStmt is a
/// UNION / INTERSECT / EXCEPT combination rather than a plain select.
pub fn set_operation(select: &Value) -> Option<(&str, bool, &Value, &Value)> {
    let op = select.get("op").and_then(Value::as_str)?;
    if op == "SETOP_NONE" {
        return None;
    }
    let all = select.get("all").and_then(Value::as_bool).unwrap_or(false);
    let larg = select.get("larg")?;
    let rarg = select.get("rarg")?;
    Some((op, all, larg, rarg))
}

// ---------------------------------------------------------------------
// ResTarget
// ---------------------------------------------------------------------

pub fn res_target(entry: &Value) -> Option<&Value> {
    entry.get("ResTarget")
}

pub fn res_target_name(res_target: &Value) -> Option<&str> {
    res_target.get("name").and_then(Value::as_str)
}

pub fn res_target_value(res_target: &Value) -> Option<&Value> {
    non_null(res_target.get("val"))
}

// ---------------------------------------------------------------------
// Table references
// ---------------------------------------------------------------------

/// Extract `(relname, alias)` from a RangeVar node. Accepts both the wrapped
/// form `{"RangeVar": {...}}` and the bare form used by DML `relation` fields.
pub fn range_var(table_node: &Value) -> Option<(String, Option<String>)> {
    let inner = table_node.get("RangeVar").unwrap_or(table_node);
    let relname = inner.get("relname").and_then(Value::as_str)?.to_string();
    let alias = inner
        .get("alias")
        .and_then(|alias| alias.get("aliasname"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((relname, alias))
}

pub fn is_range_var(table_node: &Value) -> bool {
    table_node.get("RangeVar").is_some() || table_node.get("relname").is_some()
}

/// JoinExpr fields: `(jointype, rarg, quals)`. The left side is the
/// accumulated from-clause prefix, so only the right argument matters here.
pub fn join_expr(node: &Value) -> Option<(&str, &Value, Option<&Value>)> {
    let join = node.get("JoinExpr")?;
    let join_type = join
        .get("jointype")
        .and_then(Value::as_str)
        .unwrap_or("JOIN_INNER");
    let rarg = join.get("rarg")?;
    let quals = non_null(join.get("quals"));
    Some((join_type, rarg, quals))
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

pub fn as_column_ref(expr: &Value) -> Option<&Value> {
    expr.get("ColumnRef")
}

pub fn as_a_const(expr: &Value) -> Option<&Value> {
    expr.get("A_Const")
}

pub fn as_param_ref(expr: &Value) -> Option<&Value> {
    expr.get("ParamRef")
}

pub fn as_func_call(expr: &Value) -> Option<&Value> {
    expr.get("FuncCall")
}

pub fn as_a_expr(expr: &Value) -> Option<&Value> {
    expr.get("A_Expr")
}

pub fn as_bool_expr(expr: &Value) -> Option<&Value> {
    expr.get("BoolExpr")
}

pub fn as_sublink(expr: &Value) -> Option<&Value> {
    expr.get("SubLink")
}

/// Fields of a ColumnRef, in order. `SELECT *` yields a single Star field,
/// `t.c` yields two Name fields.
pub fn column_ref_fields(column_ref: &Value) -> Vec<ColumnRefField> {
    array_items(column_ref.get("fields"))
        .into_iter()
        .map(|field| {
            if field.get("A_Star").is_some() {
                ColumnRefField::Star
            } else {
                ColumnRefField::Name(string_value(field).unwrap_or_default())
            }
        })
        .collect()
}

/// Decode an A_Const payload.
pub fn const_value(a_const: &Value) -> ConstValue {
    if a_const.get("isnull").and_then(Value::as_bool).unwrap_or(false) {
        return ConstValue::Null;
    }
    let Some(val) = a_const.get("val") else {
        return ConstValue::Null;
    };
    if let Some(integer) = val.get("Integer") {
        if let Some(ival) = integer.get("ival").and_then(Value::as_i64) {
            return ConstValue::Integer(ival);
        }
    }
    if let Some(string) = val.get("String") {
        if let Some(sval) = string_field(string) {
            return ConstValue::String(sval.to_string());
        }
    }
    if let Some(float) = val.get("Float") {
        if let Some(fval) = string_field(float) {
            return ConstValue::Float(fval.to_string());
        }
    }
    if let Some(boolean) = val.get("Boolean") {
        if let Some(bval) = boolean.get("boolval").and_then(Value::as_bool) {
            return ConstValue::Boolean(bval);
        }
    }
    ConstValue::Null
}

pub fn param_number(param_ref: &Value) -> Option<usize> {
    param_ref
        .get("number")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

/// Function name (first segment of `funcname`) and argument nodes.
pub fn func_call_parts(func_call: &Value) -> Option<(String, Vec<&Value>)> {
    let name_parts = array_items(func_call.get("funcname"));
    let name = name_parts.first().and_then(|part| string_value(part))?;
    Some((name, array_items(func_call.get("args"))))
}

/// Operator name and operand nodes of an A_Expr.
pub fn a_expr_parts(a_expr: &Value) -> Option<(String, Option<&Value>, Option<&Value>)> {
    let name_parts = array_items(a_expr.get("name"));
    let op = name_parts.first().and_then(|part| string_value(part))?;
    Some((op, non_null(a_expr.get("lexpr")), non_null(a_expr.get("rexpr"))))
}

/// Boolean operator (`AND_EXPR` / `OR_EXPR` / `NOT_EXPR`) and argument nodes.
pub fn bool_expr_parts(bool_expr: &Value) -> Option<(&str, Vec<&Value>)> {
    let boolop = bool_expr.get("boolop").and_then(Value::as_str)?;
    Some((boolop, array_items(bool_expr.get("args"))))
}

pub fn sublink_subselect(sublink: &Value) -> Option<&Value> {
    non_null(sublink.get("subselect"))
}

/// SortBy fields: `(node, ascending, nulls_first)`. Defaults follow
/// PostgreSQL: ASC, and NULLS LAST for ascending keys.
pub fn sort_by_parts(entry: &Value) -> Option<(&Value, bool, bool)> {
    let sort_by = entry.get("SortBy")?;
    let node = sort_by.get("node")?;
    let ascending = !matches!(
        sort_by.get("sortby_dir").and_then(Value::as_str),
        Some("SORTBY_DESC")
    );
    let nulls_first = match sort_by.get("sortby_nulls").and_then(Value::as_str) {
        Some("SORTBY_NULLS_FIRST") => true,
        Some("SORTBY_NULLS_LAST") => false,
        _ => !ascending,
    };
    Some((node, ascending, nulls_first))
}

/// Evaluate a constant integer expression (LIMIT / OFFSET counts).
pub fn const_integer(expr: &Value) -> Option<u64> {
    let a_const = as_a_const(expr)?;
    match const_value(a_const) {
        ConstValue::Integer(value) if value >= 0 => Some(value as u64),
        _ => None,
    }
}

// ---------------------------------------------------------------------
// WITH clause / CTEs
// ---------------------------------------------------------------------

pub fn with_clause_ctes(with_clause: &Value) -> Vec<&Value> {
    array_items(with_clause.get("ctes"))
}

pub fn with_clause_recursive(with_clause: &Value) -> bool {
    with_clause
        .get("recursive")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub fn common_table_expr(cte_entry: &Value) -> Option<&Value> {
    cte_entry.get("CommonTableExpr")
}

pub fn cte_name(cte: &Value) -> Option<&str> {
    cte.get("ctename").and_then(Value::as_str)
}

pub fn cte_column_names(cte: &Value) -> Option<Vec<String>> {
    let columns = cte.get("aliascolnames")?.as_array()?;
    Some(
        columns
            .iter()
            .filter_map(|item| string_value(item))
            .collect(),
    )
}

pub fn cte_query(cte: &Value) -> Option<&Value> {
    non_null(cte.get("ctequery"))
}

// ---------------------------------------------------------------------
// DML statements
// ---------------------------------------------------------------------

pub fn dml_relation(stmt: &Value) -> Option<&Value> {
    non_null(stmt.get("relation"))
}

pub fn dml_where_clause(stmt: &Value) -> Option<&Value> {
    non_null(stmt.get("whereClause"))
}

pub fn insert_columns(insert: &Value) -> Vec<&Value> {
    array_items(insert.get("cols"))
}

pub fn insert_select(insert: &Value) -> Option<&Value> {
    non_null(insert.get("selectStmt"))
}

/// VALUES rows: each row is a list of expression nodes.
pub fn insert_values(insert: &Value) -> Option<Vec<Vec<&Value>>> {
    let rows = insert.get("VALUES")?.as_array()?;
    Some(
        rows.iter()
            .map(|row| row.as_array().map(|items| items.iter().collect()).unwrap_or_default())
            .collect(),
    )
}

/// ON CONFLICT inference columns (IndexElem names).
pub fn on_conflict_columns(insert: &Value) -> Vec<String> {
    let Some(elems) = insert
        .get("onConflictClause")
        .and_then(|clause| clause.get("infer"))
        .and_then(|infer| infer.get("indexElems"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    elems
        .iter()
        .filter_map(|elem| {
            elem.get("IndexElem")
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

/// RETURNING entries (ResTarget nodes).
pub fn returning_list(stmt: &Value) -> Vec<&Value> {
    array_items(stmt.get("returningList"))
}

pub fn update_target_list(update: &Value) -> Vec<&Value> {
    array_items(update.get("targetList"))
}

// ---------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------

/// Extract a string leaf. Accepts `{"String": {"sval": ...}}`,
/// `{"String": {"str": ...}}`, and bare JSON strings.
pub fn string_value(node: &Value) -> Option<String> {
    if let Some(string_node) = node.get("String") {
        return string_field(string_node).map(str::to_string);
    }
    node.as_str().map(str::to_string)
}

fn string_field(string_node: &Value) -> Option<&str> {
    string_node
        .get("sval")
        .or_else(|| string_node.get("str"))
        .and_then(Value::as_str)
}

fn array_items(node: Option<&Value>) -> Vec<&Value> {
    node.and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

fn non_null(node: Option<&Value>) -> Option<&Value> {
    node.filter(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_dispatch() {
        let doc = json!({"stmts": [{"stmt": {"SelectStmt": {"targetList": []}}}]});
        let stmts = statements(&doc);
        assert_eq!(stmts.len(), 1);
        let (kind, _) = statement_kind(stmts[0]).unwrap();
        assert_eq!(kind, StatementKind::Select);
    }

    #[test]
    fn test_column_ref_fields() {
        let star = json!({"fields": [{"A_Star": {}}]});
        assert_eq!(column_ref_fields(&star), vec![ColumnRefField::Star]);

        let qualified = json!({"fields": [
            {"String": {"sval": "u"}},
            {"String": {"sval": "id"}}
        ]});
        assert_eq!(
            column_ref_fields(&qualified),
            vec![
                ColumnRefField::Name("u".to_string()),
                ColumnRefField::Name("id".to_string())
            ]
        );
    }

    #[test]
    fn test_string_value_accepts_both_key_variants() {
        let sval = json!({"String": {"sval": "users"}});
        let str_variant = json!({"String": {"str": "users"}});
        assert_eq!(string_value(&sval).as_deref(), Some("users"));
        assert_eq!(string_value(&str_variant).as_deref(), Some("users"));
    }

    #[test]
    fn test_const_values() {
        let int = json!({"val": {"Integer": {"ival": 42}}});
        assert_eq!(const_value(&int), ConstValue::Integer(42));

        let float = json!({"val": {"Float": {"str": "3.14"}}});
        assert_eq!(const_value(&float), ConstValue::Float("3.14".to_string()));

        let string = json!({"val": {"String": {"sval": "abc"}}});
        assert_eq!(const_value(&string), ConstValue::String("abc".to_string()));

        let null = json!({"isnull": true});
        assert_eq!(const_value(&null), ConstValue::Null);
    }

    #[test]
    fn test_range_var_wrapped_and_bare() {
        let wrapped = json!({"RangeVar": {"relname": "users", "alias": {"aliasname": "u"}}});
        assert_eq!(
            range_var(&wrapped),
            Some(("users".to_string(), Some("u".to_string())))
        );

        let bare = json!({"relname": "orders"});
        assert_eq!(range_var(&bare), Some(("orders".to_string(), None)));
    }

    #[test]
    fn test_sort_by_defaults() {
        let entry = json!({"SortBy": {"node": {"ColumnRef": {"fields": [{"String": {"sval": "id"}}]}}}});
        let (_, ascending, nulls_first) = sort_by_parts(&entry).unwrap();
        assert!(ascending);
        assert!(!nulls_first);

        let desc = json!({"SortBy": {"node": {}, "sortby_dir": "SORTBY_DESC"}});
        let (_, ascending, nulls_first) = sort_by_parts(&desc).unwrap();
        assert!(!ascending);
        assert!(nulls_first);
    }
}
