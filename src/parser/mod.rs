// SQL front end: wraps the `sqlparser` crate and emits the JSON AST document
// consumed by the binder.
//
// The document follows the libpg_query layout (see `ast`):
// `{ "stmts": [ { "stmt": { "SelectStmt": {...} } } ] }`. Joins are flattened
// into the fromClause (first entry RangeVar, one JoinExpr per join) and
// `WITH` lists arrive as CommonTableExpr nodes in declaration order. The rest
// of the pipeline treats this JSON as an interface and never sees sqlparser
// types.

use crate::error::PlannerError;
use crate::Result;
use serde_json::{json, Map, Value as Json};
use sqlparser::ast as sql;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

pub struct SqlFrontend {
    dialect: PostgreSqlDialect,
}

impl SqlFrontend {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse SQL text into the JSON AST document.
    pub fn parse_to_ast(&self, sql_text: &str) -> Result<Json> {
        let statements = Parser::parse_sql(&self.dialect, sql_text)
            .map_err(|e| PlannerError::Parse(e.to_string()))?;

        if statements.is_empty() {
            return Err(PlannerError::Parse("empty statement".to_string()));
        }

        let mut stmts = Vec::with_capacity(statements.len());
        for statement in &statements {
            stmts.push(json!({ "stmt": self.convert_statement(statement)? }));
        }

        Ok(json!({ "stmts": stmts }))
    }

    fn convert_statement(&self, statement: &sql::Statement) -> Result<Json> {
        match statement {
            sql::Statement::Query(query) => {
                Ok(json!({ "SelectStmt": self.convert_query(query)? }))
            }
            sql::Statement::Insert(insert) => self.convert_insert(insert),
            sql::Statement::Update(update) => self.convert_update(
                &update.table,
                &update.assignments,
                update.selection.as_ref(),
                update.returning.as_deref(),
            ),
            sql::Statement::Delete(delete) => self.convert_delete(delete),
            other => Err(PlannerError::Parse(format!(
                "unsupported statement type: {}",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Convert a full query (WITH + body + ORDER BY + LIMIT/OFFSET) into a
    /// SelectStmt-shaped object.
    fn convert_query(&self, query: &sql::Query) -> Result<Json> {
        let mut select = self.convert_set_expr(&query.body)?;
        let object = select
            .as_object_mut()
            .ok_or_else(|| PlannerError::Internal("select body is not an object".to_string()))?;

        if let Some(with) = &query.with {
            object.insert("withClause".to_string(), self.convert_with(with)?);
        }

        if let Some(order_by) = &query.order_by {
            if let sql::OrderByKind::Expressions(exprs) = &order_by.kind {
                let mut sort_clause = Vec::with_capacity(exprs.len());
                for order_expr in exprs {
                    sort_clause.push(self.convert_order_by_expr(order_expr)?);
                }
                if !sort_clause.is_empty() {
                    object.insert("sortClause".to_string(), Json::Array(sort_clause));
                }
            }
        }

        if let Some(limit_clause) = &query.limit_clause {
            match limit_clause {
                sql::LimitClause::LimitOffset { limit, offset, .. } => {
                    if let Some(limit) = limit {
                        object.insert("limitCount".to_string(), self.convert_expr(limit)?);
                    }
                    if let Some(offset) = offset {
                        object.insert("limitOffset".to_string(), self.convert_expr(&offset.value)?);
                    }
                }
                sql::LimitClause::OffsetCommaLimit { offset, limit } => {
                    object.insert("limitCount".to_string(), self.convert_expr(limit)?);
                    object.insert("limitOffset".to_string(), self.convert_expr(offset)?);
                }
                _ => {}
            }
        }

        Ok(select)
    }

    fn convert_set_expr(&self, body: &sql::SetExpr) -> Result<Json> {
        match body {
            sql::SetExpr::Select(select) => self.convert_select(select),
            sql::SetExpr::Query(query) => self.convert_query(query),
            sql::SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let op_name = match op {
                    sql::SetOperator::Union => "SETOP_UNION",
                    sql::SetOperator::Intersect => "SETOP_INTERSECT",
                    sql::SetOperator::Except => "SETOP_EXCEPT",
                    _ => {
                        return Err(PlannerError::Parse(format!(
                            "unsupported set operation: {}",
                            op
                        )))
                    }
                };
                let all = matches!(set_quantifier, sql::SetQuantifier::All);
                Ok(json!({
                    "op": op_name,
                    "all": all,
                    "larg": self.convert_set_expr(left)?,
                    "rarg": self.convert_set_expr(right)?,
                }))
            }
            other => Err(PlannerError::Parse(format!(
                "unsupported query body: {}",
                other
            ))),
        }
    }

    fn convert_select(&self, select: &sql::Select) -> Result<Json> {
        let mut object = Map::new();

        let mut target_list = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            target_list.push(self.convert_select_item(item)?);
        }
        object.insert("targetList".to_string(), Json::Array(target_list));

        let from_clause = self.convert_from(&select.from)?;
        if !from_clause.is_empty() {
            object.insert("fromClause".to_string(), Json::Array(from_clause));
        }

        if let Some(selection) = &select.selection {
            object.insert("whereClause".to_string(), self.convert_expr(selection)?);
        }

        if let sql::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            if !exprs.is_empty() {
                let mut group_clause = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    group_clause.push(self.convert_expr(expr)?);
                }
                object.insert("groupClause".to_string(), Json::Array(group_clause));
            }
        }

        if let Some(having) = &select.having {
            object.insert("havingClause".to_string(), self.convert_expr(having)?);
        }

        Ok(Json::Object(object))
    }

    fn convert_select_item(&self, item: &sql::SelectItem) -> Result<Json> {
        match item {
            sql::SelectItem::UnnamedExpr(expr) => {
                Ok(json!({ "ResTarget": { "val": self.convert_expr(expr)? } }))
            }
            sql::SelectItem::ExprWithAlias { expr, alias } => Ok(json!({
                "ResTarget": { "name": alias.value, "val": self.convert_expr(expr)? }
            })),
            sql::SelectItem::Wildcard(_) | sql::SelectItem::QualifiedWildcard(..) => Ok(json!({
                "ResTarget": { "val": { "ColumnRef": { "fields": [ { "A_Star": {} } ] } } }
            })),
            #[allow(unreachable_patterns)]
            other => Err(PlannerError::Parse(format!(
                "unsupported select item: {}",
                other
            ))),
        }
    }

    /// Flatten FROM and JOIN entries: first relation as a RangeVar, every join
    /// as a JoinExpr whose left side is the accumulated prefix. Additional
    /// comma-separated relations become cross joins.
    fn convert_from(&self, from: &[sql::TableWithJoins]) -> Result<Vec<Json>> {
        let mut entries = Vec::new();

        for (index, table_with_joins) in from.iter().enumerate() {
            let relation = self.convert_table_factor(&table_with_joins.relation)?;
            if index == 0 {
                entries.push(relation);
            } else {
                entries.push(json!({
                    "JoinExpr": {
                        "jointype": "JOIN_INNER",
                        "larg": Json::Null,
                        "rarg": relation,
                        "quals": Json::Null,
                    }
                }));
            }

            for join in &table_with_joins.joins {
                entries.push(self.convert_join(join)?);
            }
        }

        Ok(entries)
    }

    fn convert_join(&self, join: &sql::Join) -> Result<Json> {
        let (join_type, constraint) = match &join.join_operator {
            sql::JoinOperator::Join(constraint) | sql::JoinOperator::Inner(constraint) => {
                ("JOIN_INNER", Some(constraint))
            }
            sql::JoinOperator::Left(constraint) | sql::JoinOperator::LeftOuter(constraint) => {
                ("JOIN_LEFT", Some(constraint))
            }
            sql::JoinOperator::Right(constraint) | sql::JoinOperator::RightOuter(constraint) => {
                ("JOIN_RIGHT", Some(constraint))
            }
            sql::JoinOperator::FullOuter(constraint) => ("JOIN_FULL", Some(constraint)),
            sql::JoinOperator::CrossJoin(_) => ("JOIN_INNER", None),
            other => {
                return Err(PlannerError::Parse(format!(
                    "unsupported join operator: {:?}",
                    other
                )))
            }
        };

        let quals = match constraint {
            Some(sql::JoinConstraint::On(expr)) => self.convert_expr(expr)?,
            _ => Json::Null,
        };

        Ok(json!({
            "JoinExpr": {
                "jointype": join_type,
                "larg": Json::Null,
                "rarg": self.convert_table_factor(&join.relation)?,
                "quals": quals,
            }
        }))
    }

    fn convert_table_factor(&self, factor: &sql::TableFactor) -> Result<Json> {
        match factor {
            sql::TableFactor::Table { name, alias, .. } => {
                let mut range_var = Map::new();
                range_var.insert("relname".to_string(), Json::String(object_name_tail(name)));
                if let Some(alias) = alias {
                    range_var.insert(
                        "alias".to_string(),
                        json!({ "aliasname": alias.name.value }),
                    );
                }
                Ok(json!({ "RangeVar": range_var }))
            }
            other => Err(PlannerError::Parse(format!(
                "unsupported table factor: {}",
                other
            ))),
        }
    }

    fn convert_with(&self, with: &sql::With) -> Result<Json> {
        let mut ctes = Vec::with_capacity(with.cte_tables.len());
        for cte in &with.cte_tables {
            let mut node = Map::new();
            node.insert("ctename".to_string(), Json::String(cte.alias.name.value.clone()));
            if !cte.alias.columns.is_empty() {
                let columns: Vec<Json> = cte
                    .alias
                    .columns
                    .iter()
                    .map(|column| json!({ "String": { "sval": column.name.value } }))
                    .collect();
                node.insert("aliascolnames".to_string(), Json::Array(columns));
            }
            node.insert(
                "ctequery".to_string(),
                json!({ "SelectStmt": self.convert_query(&cte.query)? }),
            );
            ctes.push(json!({ "CommonTableExpr": node }));
        }

        Ok(json!({ "recursive": with.recursive, "ctes": ctes }))
    }

    fn convert_order_by_expr(&self, order_expr: &sql::OrderByExpr) -> Result<Json> {
        let direction = match order_expr.options.asc {
            Some(false) => "SORTBY_DESC",
            Some(true) => "SORTBY_ASC",
            None => "SORTBY_DEFAULT",
        };
        let nulls = match order_expr.options.nulls_first {
            Some(true) => "SORTBY_NULLS_FIRST",
            Some(false) => "SORTBY_NULLS_LAST",
            None => "SORTBY_NULLS_DEFAULT",
        };
        Ok(json!({
            "SortBy": {
                "node": self.convert_expr(&order_expr.expr)?,
                "sortby_dir": direction,
                "sortby_nulls": nulls,
            }
        }))
    }

    // ------------------------------------------------------------------
    // DML
    // ------------------------------------------------------------------

    fn convert_insert(&self, insert: &sql::Insert) -> Result<Json> {
        let mut node = Map::new();

        let relation = match &insert.table {
            sql::TableObject::TableName(name) => json!({ "relname": object_name_tail(name) }),
            other => {
                return Err(PlannerError::Parse(format!(
                    "unsupported INSERT target: {:?}",
                    other
                )))
            }
        };
        node.insert("relation".to_string(), relation);

        if !insert.columns.is_empty() {
            let cols: Vec<Json> = insert
                .columns
                .iter()
                .map(|column| json!({ "ResTarget": { "name": column.value } }))
                .collect();
            node.insert("cols".to_string(), Json::Array(cols));
        }

        if let Some(source) = &insert.source {
            if let sql::SetExpr::Values(values) = source.body.as_ref() {
                let mut rows = Vec::with_capacity(values.rows.len());
                for row in &values.rows {
                    let mut converted = Vec::with_capacity(row.len());
                    for expr in row {
                        converted.push(self.convert_expr(expr)?);
                    }
                    rows.push(Json::Array(converted));
                }
                node.insert("VALUES".to_string(), Json::Array(rows));
            } else {
                node.insert(
                    "selectStmt".to_string(),
                    json!({ "SelectStmt": self.convert_query(source)? }),
                );
            }
        }

        if let Some(sql::OnInsert::OnConflict(on_conflict)) = &insert.on {
            if let Some(sql::ConflictTarget::Columns(columns)) = &on_conflict.conflict_target {
                let elems: Vec<Json> = columns
                    .iter()
                    .map(|column| json!({ "IndexElem": { "name": column.value } }))
                    .collect();
                node.insert(
                    "onConflictClause".to_string(),
                    json!({ "infer": { "indexElems": elems } }),
                );
            }
        }

        if let Some(returning) = &insert.returning {
            node.insert("returningList".to_string(), self.convert_returning(returning)?);
        }

        Ok(json!({ "InsertStmt": node }))
    }

    fn convert_update(
        &self,
        table: &sql::TableWithJoins,
        assignments: &[sql::Assignment],
        selection: Option<&sql::Expr>,
        returning: Option<&[sql::SelectItem]>,
    ) -> Result<Json> {
        let mut node = Map::new();
        node.insert("relation".to_string(), self.bare_relation(&table.relation)?);

        let mut target_list = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let column = match &assignment.target {
                sql::AssignmentTarget::ColumnName(name) => object_name_tail(name),
                other => {
                    return Err(PlannerError::Parse(format!(
                        "unsupported SET target: {:?}",
                        other
                    )))
                }
            };
            target_list.push(json!({
                "ResTarget": { "name": column, "val": self.convert_expr(&assignment.value)? }
            }));
        }
        node.insert("targetList".to_string(), Json::Array(target_list));

        if let Some(selection) = selection {
            node.insert("whereClause".to_string(), self.convert_expr(selection)?);
        }

        if let Some(returning) = returning {
            node.insert("returningList".to_string(), self.convert_returning(returning)?);
        }

        Ok(json!({ "UpdateStmt": node }))
    }

    fn convert_delete(&self, delete: &sql::Delete) -> Result<Json> {
        let tables = match &delete.from {
            sql::FromTable::WithFromKeyword(tables) | sql::FromTable::WithoutKeyword(tables) => {
                tables
            }
        };
        let relation = tables
            .first()
            .ok_or_else(|| PlannerError::Parse("DELETE without a target table".to_string()))?;

        let mut node = Map::new();
        node.insert("relation".to_string(), self.bare_relation(&relation.relation)?);

        if let Some(selection) = &delete.selection {
            node.insert("whereClause".to_string(), self.convert_expr(selection)?);
        }

        if let Some(returning) = &delete.returning {
            node.insert("returningList".to_string(), self.convert_returning(returning)?);
        }

        Ok(json!({ "DeleteStmt": node }))
    }

    /// DML relation fields use the bare RangeVar form.
    fn bare_relation(&self, factor: &sql::TableFactor) -> Result<Json> {
        match factor {
            sql::TableFactor::Table { name, alias, .. } => {
                let mut relation = Map::new();
                relation.insert("relname".to_string(), Json::String(object_name_tail(name)));
                if let Some(alias) = alias {
                    relation.insert(
                        "alias".to_string(),
                        json!({ "aliasname": alias.name.value }),
                    );
                }
                Ok(Json::Object(relation))
            }
            other => Err(PlannerError::Parse(format!(
                "unsupported DML target: {}",
                other
            ))),
        }
    }

    fn convert_returning(&self, items: &[sql::SelectItem]) -> Result<Json> {
        let mut list = Vec::with_capacity(items.len());
        for item in items {
            list.push(self.convert_select_item(item)?);
        }
        Ok(Json::Array(list))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn convert_expr(&self, expr: &sql::Expr) -> Result<Json> {
        match expr {
            sql::Expr::Identifier(ident) => Ok(column_ref(&[ident.value.clone()])),
            sql::Expr::CompoundIdentifier(idents) => {
                let names: Vec<String> = idents.iter().map(|i| i.value.clone()).collect();
                Ok(column_ref(&names))
            }
            sql::Expr::Value(value) => self.convert_value(&value.value),
            sql::Expr::BinaryOp { left, op, right } => self.convert_binary_op(left, op, right),
            sql::Expr::UnaryOp { op, expr } => match op {
                sql::UnaryOperator::Not => Ok(json!({
                    "BoolExpr": { "boolop": "NOT_EXPR", "args": [ self.convert_expr(expr)? ] }
                })),
                sql::UnaryOperator::Minus => Ok(json!({
                    "A_Expr": {
                        "name": [ { "String": { "sval": "-" } } ],
                        "rexpr": self.convert_expr(expr)?,
                    }
                })),
                sql::UnaryOperator::Plus => self.convert_expr(expr),
                other => Err(PlannerError::Parse(format!(
                    "unsupported unary operator: {}",
                    other
                ))),
            },
            sql::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => {
                let like = a_expr("LIKE", Some(self.convert_expr(expr)?), Some(self.convert_expr(pattern)?));
                Ok(if *negated { not_expr(like) } else { like })
            }
            sql::Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => {
                let like = a_expr("ILIKE", Some(self.convert_expr(expr)?), Some(self.convert_expr(pattern)?));
                Ok(if *negated { not_expr(like) } else { like })
            }
            sql::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let lower = a_expr(">=", Some(self.convert_expr(expr)?), Some(self.convert_expr(low)?));
                let upper = a_expr("<=", Some(self.convert_expr(expr)?), Some(self.convert_expr(high)?));
                let both = json!({ "BoolExpr": { "boolop": "AND_EXPR", "args": [ lower, upper ] } });
                Ok(if *negated { not_expr(both) } else { both })
            }
            sql::Expr::InList {
                expr,
                list,
                negated,
            } => {
                // Fold IN (a, b, ...) into an OR chain of equalities
                let mut arms = Vec::with_capacity(list.len());
                for item in list {
                    arms.push(a_expr(
                        "=",
                        Some(self.convert_expr(expr)?),
                        Some(self.convert_expr(item)?),
                    ));
                }
                let folded = if arms.len() == 1 {
                    arms.pop().expect("one arm")
                } else {
                    json!({ "BoolExpr": { "boolop": "OR_EXPR", "args": arms } })
                };
                Ok(if *negated { not_expr(folded) } else { folded })
            }
            sql::Expr::IsNull(expr) => Ok(a_expr("IS NULL", Some(self.convert_expr(expr)?), None)),
            sql::Expr::IsNotNull(expr) => {
                Ok(a_expr("IS NOT NULL", Some(self.convert_expr(expr)?), None))
            }
            sql::Expr::Nested(expr) => self.convert_expr(expr),
            sql::Expr::Function(function) => self.convert_function(function),
            sql::Expr::Subquery(query) => Ok(json!({
                "SubLink": { "subselect": { "SelectStmt": self.convert_query(query)? } }
            })),
            sql::Expr::Exists { subquery, negated } => {
                let sublink = json!({
                    "SubLink": { "subselect": { "SelectStmt": self.convert_query(subquery)? } }
                });
                Ok(if *negated { not_expr(sublink) } else { sublink })
            }
            sql::Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let sublink = json!({
                    "SubLink": { "subselect": { "SelectStmt": self.convert_query(subquery)? } }
                });
                let in_expr = a_expr("IN", Some(self.convert_expr(expr)?), Some(sublink));
                Ok(if *negated { not_expr(in_expr) } else { in_expr })
            }
            sql::Expr::Cast { expr, .. } => self.convert_expr(expr),
            other => Err(PlannerError::Parse(format!(
                "unsupported expression: {}",
                other
            ))),
        }
    }

    fn convert_value(&self, value: &sql::Value) -> Result<Json> {
        match value {
            sql::Value::Number(number, _) => {
                if number.contains('.') || number.contains('e') || number.contains('E') {
                    Ok(json!({ "A_Const": { "val": { "Float": { "str": number } } } }))
                } else if let Ok(ival) = number.parse::<i64>() {
                    Ok(json!({ "A_Const": { "val": { "Integer": { "ival": ival } } } }))
                } else {
                    Ok(json!({ "A_Const": { "val": { "Float": { "str": number } } } }))
                }
            }
            sql::Value::SingleQuotedString(text) | sql::Value::DoubleQuotedString(text) => {
                Ok(json!({ "A_Const": { "val": { "String": { "sval": text } } } }))
            }
            sql::Value::DollarQuotedString(text) => {
                Ok(json!({ "A_Const": { "val": { "String": { "sval": text.value } } } }))
            }
            sql::Value::Boolean(value) => {
                Ok(json!({ "A_Const": { "val": { "Boolean": { "boolval": value } } } }))
            }
            sql::Value::Null => Ok(json!({ "A_Const": { "isnull": true } })),
            sql::Value::Placeholder(placeholder) => {
                let number: usize = placeholder
                    .trim_start_matches('$')
                    .parse()
                    .map_err(|_| {
                        PlannerError::Parse(format!(
                            "unsupported parameter placeholder: {}",
                            placeholder
                        ))
                    })?;
                Ok(json!({ "ParamRef": { "number": number } }))
            }
            other => Ok(json!({
                "A_Const": { "val": { "String": { "sval": other.to_string() } } }
            })),
        }
    }

    fn convert_binary_op(
        &self,
        left: &sql::Expr,
        op: &sql::BinaryOperator,
        right: &sql::Expr,
    ) -> Result<Json> {
        let boolop = match op {
            sql::BinaryOperator::And => Some("AND_EXPR"),
            sql::BinaryOperator::Or => Some("OR_EXPR"),
            _ => None,
        };
        if let Some(boolop) = boolop {
            return Ok(json!({
                "BoolExpr": {
                    "boolop": boolop,
                    "args": [ self.convert_expr(left)?, self.convert_expr(right)? ],
                }
            }));
        }

        let name = match op {
            sql::BinaryOperator::Eq => "=".to_string(),
            sql::BinaryOperator::NotEq => "<>".to_string(),
            sql::BinaryOperator::Lt => "<".to_string(),
            sql::BinaryOperator::Gt => ">".to_string(),
            sql::BinaryOperator::LtEq => "<=".to_string(),
            sql::BinaryOperator::GtEq => ">=".to_string(),
            sql::BinaryOperator::Plus => "+".to_string(),
            sql::BinaryOperator::Minus => "-".to_string(),
            sql::BinaryOperator::Multiply => "*".to_string(),
            sql::BinaryOperator::Divide => "/".to_string(),
            sql::BinaryOperator::Modulo => "%".to_string(),
            other => other.to_string(),
        };

        Ok(a_expr(
            &name,
            Some(self.convert_expr(left)?),
            Some(self.convert_expr(right)?),
        ))
    }

    fn convert_function(&self, function: &sql::Function) -> Result<Json> {
        // Unquoted identifiers fold to lowercase in the PostgreSQL dialect
        let name = object_name_tail(&function.name).to_lowercase();

        let mut node = Map::new();
        node.insert(
            "funcname".to_string(),
            json!([ { "String": { "sval": name } } ]),
        );

        let mut args = Vec::new();
        let mut agg_star = false;
        if let sql::FunctionArguments::List(list) = &function.args {
            for arg in &list.args {
                match arg {
                    sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(expr)) => {
                        args.push(self.convert_expr(expr)?);
                    }
                    sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Wildcard) => {
                        agg_star = true;
                    }
                    _ => {
                        return Err(PlannerError::Parse(format!(
                            "unsupported function argument in {}",
                            name
                        )))
                    }
                }
            }
        }

        node.insert("args".to_string(), Json::Array(args));
        if agg_star {
            node.insert("agg_star".to_string(), Json::Bool(true));
        }

        Ok(json!({ "FuncCall": node }))
    }
}

impl Default for SqlFrontend {
    fn default() -> Self {
        Self::new()
    }
}

fn column_ref(names: &[String]) -> Json {
    let fields: Vec<Json> = names
        .iter()
        .map(|name| json!({ "String": { "sval": name } }))
        .collect();
    json!({ "ColumnRef": { "fields": fields } })
}

fn a_expr(name: &str, lexpr: Option<Json>, rexpr: Option<Json>) -> Json {
    let mut node = Map::new();
    node.insert("name".to_string(), json!([ { "String": { "sval": name } } ]));
    if let Some(lexpr) = lexpr {
        node.insert("lexpr".to_string(), lexpr);
    }
    if let Some(rexpr) = rexpr {
        node.insert("rexpr".to_string(), rexpr);
    }
    json!({ "A_Expr": node })
}

fn not_expr(arg: Json) -> Json {
    json!({ "BoolExpr": { "boolop": "NOT_EXPR", "args": [ arg ] } })
}

/// Last segment of a (possibly qualified) object name.
fn object_name_tail(name: &sql::ObjectName) -> String {
    name.0
        .last()
        .map(|part| match part {
            sql::ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast;

    fn parse(sql_text: &str) -> Json {
        SqlFrontend::new().parse_to_ast(sql_text).unwrap()
    }

    #[test]
    fn test_simple_select_shape() {
        let doc = parse("SELECT id, name FROM users");
        let stmts = ast::statements(&doc);
        assert_eq!(stmts.len(), 1);

        let (kind, select) = ast::statement_kind(stmts[0]).unwrap();
        assert_eq!(kind, ast::StatementKind::Select);
        assert_eq!(ast::target_list(select).len(), 2);

        let from = ast::from_clause(select);
        assert_eq!(from.len(), 1);
        assert_eq!(ast::range_var(from[0]), Some(("users".to_string(), None)));
    }

    #[test]
    fn test_select_star() {
        let doc = parse("SELECT * FROM users");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let targets = ast::target_list(select);
        let res_target = ast::res_target(targets[0]).unwrap();
        let val = ast::res_target_value(res_target).unwrap();
        let fields = ast::column_ref_fields(ast::as_column_ref(val).unwrap());
        assert_eq!(fields, vec![ast::ColumnRefField::Star]);
    }

    #[test]
    fn test_where_clause_becomes_bool_expr() {
        let doc = parse("SELECT id FROM users WHERE id > 10 AND name LIKE 'A%'");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let where_clause = ast::where_clause(select).unwrap();
        let (boolop, args) = ast::bool_expr_parts(ast::as_bool_expr(where_clause).unwrap()).unwrap();
        assert_eq!(boolop, "AND_EXPR");
        assert_eq!(args.len(), 2);

        let (op, _, _) = ast::a_expr_parts(ast::as_a_expr(args[0]).unwrap()).unwrap();
        assert_eq!(op, ">");
        let (op, _, _) = ast::a_expr_parts(ast::as_a_expr(args[1]).unwrap()).unwrap();
        assert_eq!(op, "LIKE");
    }

    #[test]
    fn test_join_is_flattened() {
        let doc = parse("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let from = ast::from_clause(select);
        assert_eq!(from.len(), 2);
        assert_eq!(
            ast::range_var(from[0]),
            Some(("users".to_string(), Some("u".to_string())))
        );

        let (join_type, rarg, quals) = ast::join_expr(from[1]).unwrap();
        assert_eq!(join_type, "JOIN_INNER");
        assert_eq!(
            ast::range_var(rarg),
            Some(("orders".to_string(), Some("o".to_string())))
        );
        assert!(quals.is_some());
    }

    #[test]
    fn test_left_join_type() {
        let doc = parse("SELECT * FROM users u LEFT JOIN orders o ON u.id = o.user_id");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let from = ast::from_clause(select);
        let (join_type, _, _) = ast::join_expr(from[1]).unwrap();
        assert_eq!(join_type, "JOIN_LEFT");
    }

    #[test]
    fn test_order_by_and_limit() {
        let doc = parse("SELECT id FROM users ORDER BY name DESC LIMIT 10 OFFSET 5");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();

        let sort = ast::sort_clause(select);
        assert_eq!(sort.len(), 1);
        let (_, ascending, nulls_first) = ast::sort_by_parts(sort[0]).unwrap();
        assert!(!ascending);
        assert!(nulls_first);

        assert_eq!(ast::limit_count(select).and_then(ast::const_integer), Some(10));
        assert_eq!(ast::limit_offset(select).and_then(ast::const_integer), Some(5));
    }

    #[test]
    fn test_parameters() {
        let doc = parse("SELECT id FROM users WHERE id = $1");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let where_clause = ast::where_clause(select).unwrap();
        let (_, _, rexpr) = ast::a_expr_parts(ast::as_a_expr(where_clause).unwrap()).unwrap();
        let param = ast::as_param_ref(rexpr.unwrap()).unwrap();
        assert_eq!(ast::param_number(param), Some(1));
    }

    #[test]
    fn test_with_clause() {
        let doc = parse("WITH active (uid) AS (SELECT id FROM users) SELECT uid FROM active");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let with = ast::with_clause(select).unwrap();
        assert!(!ast::with_clause_recursive(with));

        let ctes = ast::with_clause_ctes(with);
        assert_eq!(ctes.len(), 1);
        let cte = ast::common_table_expr(ctes[0]).unwrap();
        assert_eq!(ast::cte_name(cte), Some("active"));
        assert_eq!(ast::cte_column_names(cte), Some(vec!["uid".to_string()]));
        assert!(ast::cte_query(cte).is_some());
    }

    #[test]
    fn test_recursive_union_all_body() {
        let doc = parse(
            "WITH RECURSIVE s AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM s WHERE n < 5) \
             SELECT n FROM s",
        );
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let with = ast::with_clause(select).unwrap();
        assert!(ast::with_clause_recursive(with));

        let ctes = ast::with_clause_ctes(with);
        let cte = ast::common_table_expr(ctes[0]).unwrap();
        let body = ast::cte_query(cte).unwrap();
        let (_, body_select) = ast::statement_kind(body).unwrap();
        let (op, all, _, _) = ast::set_operation(body_select).unwrap();
        assert_eq!(op, "SETOP_UNION");
        assert!(all);
    }

    #[test]
    fn test_insert_values() {
        let doc = parse("INSERT INTO users (id, name) VALUES (1, 'alice'), (2, 'bob')");
        let stmts = ast::statements(&doc);
        let (kind, insert) = ast::statement_kind(stmts[0]).unwrap();
        assert_eq!(kind, ast::StatementKind::Insert);

        assert_eq!(
            ast::range_var(ast::dml_relation(insert).unwrap()),
            Some(("users".to_string(), None))
        );
        assert_eq!(ast::insert_columns(insert).len(), 2);

        let rows = ast::insert_values(insert).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn test_update_and_delete() {
        let doc = parse("UPDATE users SET name = 'x' WHERE id = 1");
        let stmts = ast::statements(&doc);
        let (kind, update) = ast::statement_kind(stmts[0]).unwrap();
        assert_eq!(kind, ast::StatementKind::Update);
        assert_eq!(ast::update_target_list(update).len(), 1);
        assert!(ast::dml_where_clause(update).is_some());

        let doc = parse("DELETE FROM users WHERE id = 1");
        let stmts = ast::statements(&doc);
        let (kind, delete) = ast::statement_kind(stmts[0]).unwrap();
        assert_eq!(kind, ast::StatementKind::Delete);
        assert!(ast::dml_where_clause(delete).is_some());
    }

    #[test]
    fn test_count_star() {
        let doc = parse("SELECT count(*) FROM users");
        let stmts = ast::statements(&doc);
        let (_, select) = ast::statement_kind(stmts[0]).unwrap();
        let targets = ast::target_list(select);
        let val = ast::res_target_value(ast::res_target(targets[0]).unwrap()).unwrap();
        let func = ast::as_func_call(val).unwrap();
        let (name, args) = ast::func_call_parts(func).unwrap();
        assert_eq!(name, "count");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = SqlFrontend::new().parse_to_ast("SELEC id FROM users").unwrap_err();
        assert!(err.to_string().starts_with("Parse error:"));
    }
}
