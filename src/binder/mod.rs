// Binder: AST -> BoundStatement.
//
// Walks the JSON AST once, resolving identifiers against the schema registry
// (and the per-statement CTE registry), inferring result types, and recording
// user errors instead of failing fast. A statement binds successfully only if
// the error list stays empty.
//
// Scoping: the binder keeps a current table scope (name and alias -> table
// ref) that grows left-to-right through FROM and JOIN entries; select lists
// and predicates are bound against that scope only, never against the global
// column index directly. CTE state lives for one `bind_ast` call.

use crate::ast::{self, ColumnRefField, ConstValue, StatementKind};
use crate::bound::{
    BoundDelete, BoundExpression, BoundExpressionKind, BoundInsert, BoundJoin, BoundOrderBy,
    BoundParameter, BoundSelect, BoundSetOperation, BoundStatement, BoundTableRef, BoundUpdate,
    CteDefinition, InsertSource, JoinType, ParameterType, SetOpKind,
};
use crate::parser::SqlFrontend;
use crate::schema::{
    suggest_from_candidates, ColumnDefinition, ColumnId, ColumnType, SchemaRegistry, TableId,
    CTE_TABLE_ID_BASE,
};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Classification of a binding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingErrorKind {
    Parse,
    TableNotFound,
    ColumnNotFound,
    AmbiguousColumn,
    Cte,
    Unsupported,
}

/// A user-facing binding error with optional name suggestions.
#[derive(Debug, Clone)]
pub struct BindingError {
    pub kind: BindingErrorKind,
    pub message: String,
    pub location: String,
    pub suggestions: Vec<String>,
}

impl BindingError {
    fn new(kind: BindingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: String::new(),
            suggestions: Vec::new(),
        }
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

impl std::fmt::Display for BindingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.suggestions.is_empty() {
            write!(f, " (did you mean: {}?)", self.suggestions.join(", "))?;
        }
        Ok(())
    }
}

pub struct Binder {
    registry: Arc<SchemaRegistry>,
    frontend: SqlFrontend,
    errors: Vec<BindingError>,

    // Current query scope: name and alias -> table ref, plus one primary key
    // per distinct table in registration order (drives `SELECT *` expansion)
    table_scope: HashMap<String, BoundTableRef>,
    scope_order: Vec<String>,

    // CTE state for the current bind_ast call
    ctes: Vec<CteDefinition>,
    cte_names: HashMap<String, usize>,
    with_recursive: bool,
    next_temp_table_id: TableId,
}

impl Binder {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            frontend: SqlFrontend::new(),
            errors: Vec::new(),
            table_scope: HashMap::new(),
            scope_order: Vec::new(),
            ctes: Vec::new(),
            cte_names: HashMap::new(),
            with_recursive: false,
            next_temp_table_id: CTE_TABLE_ID_BASE,
        }
    }

    /// Parse and bind SQL text.
    pub fn bind(&mut self, sql: &str) -> std::result::Result<BoundStatement, Vec<BindingError>> {
        let document = match self.frontend.parse_to_ast(sql) {
            Ok(document) => document,
            Err(error) => {
                return Err(vec![BindingError::new(
                    BindingErrorKind::Parse,
                    error.to_string(),
                )]);
            }
        };
        self.bind_ast(&document)
    }

    /// Bind a parse document. Returns the bound statement or the full list of
    /// accumulated errors.
    pub fn bind_ast(
        &mut self,
        document: &Json,
    ) -> std::result::Result<BoundStatement, Vec<BindingError>> {
        self.errors.clear();
        self.clear_ctes();
        self.table_scope.clear();
        self.scope_order.clear();

        let statements = ast::statements(document);
        let Some(stmt) = statements.first() else {
            return Err(vec![BindingError::new(
                BindingErrorKind::Parse,
                "Invalid AST: no statements found",
            )]);
        };

        let bound = match ast::statement_kind(stmt) {
            Some((StatementKind::Select, node)) => {
                self.bind_select(node).map(BoundStatement::Select)
            }
            Some((StatementKind::Insert, node)) => {
                self.bind_insert(node).map(BoundStatement::Insert)
            }
            Some((StatementKind::Update, node)) => {
                self.bind_update(node).map(BoundStatement::Update)
            }
            Some((StatementKind::Delete, node)) => {
                self.bind_delete(node).map(BoundStatement::Delete)
            }
            None => {
                self.add_error(BindingError::new(
                    BindingErrorKind::Unsupported,
                    "Unsupported statement type",
                ));
                None
            }
        };

        match bound {
            Some(mut statement) if self.errors.is_empty() => {
                // Attach the statement-level CTE list to the top-level select
                if let BoundStatement::Select(select) = &mut statement {
                    select.ctes = std::mem::take(&mut self.ctes);
                }
                Ok(statement)
            }
            _ => Err(std::mem::take(&mut self.errors)),
        }
    }

    fn add_error(&mut self, error: BindingError) {
        debug!(message = %error.message, "binding error");
        self.errors.push(error);
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    fn bind_select(&mut self, node: &Json) -> Option<BoundSelect> {
        // (i) CTEs first so FROM can resolve them
        if let Some(with_clause) = ast::with_clause(node) {
            self.process_with_clause(with_clause);
        }

        // Set operation: bind the anchor and each further arm, then attach
        // ORDER BY / LIMIT of the combined statement to the anchor.
        if let Some((op, all, larg, rarg)) = ast::set_operation(node) {
            let op = match op {
                "SETOP_UNION" => SetOpKind::Union,
                "SETOP_INTERSECT" => SetOpKind::Intersect,
                "SETOP_EXCEPT" => SetOpKind::Except,
                other => {
                    self.add_error(BindingError::new(
                        BindingErrorKind::Unsupported,
                        format!("Unsupported set operation: {}", other),
                    ));
                    return None;
                }
            };

            let mut anchor = self.bind_select(larg)?;
            let right = self.bind_select(rarg)?;
            anchor.set_operations.push(BoundSetOperation {
                op,
                all,
                right: Box::new(right),
            });

            // Scope for trailing ORDER BY is the anchor's tables
            let saved = self.swap_scope_from_refs(&anchor.table_refs);
            self.bind_tail_clauses(node, &mut anchor);
            self.restore_scope(saved);

            anchor.parameters = self.collect_parameters(&anchor);
            return Some(anchor);
        }

        let saved_scope = self.save_scope();
        let mut select = BoundSelect::default();

        // (ii) FROM establishes the root table, (iii) JOINs extend the scope
        let from_entries = ast::from_clause(node);
        let mut entries = from_entries.iter();

        if let Some(first) = entries.next() {
            let from_table = match self.bind_table_ref(first) {
                Some(table) => table,
                None => {
                    self.restore_scope(saved_scope);
                    return None;
                }
            };
            self.add_to_scope(&from_table);
            select.from_table = Some(from_table);
        }

        for entry in entries {
            if let Some((join_type, rarg, quals)) = ast::join_expr(entry) {
                let join_type = match join_type {
                    "JOIN_LEFT" => JoinType::LeftOuter,
                    "JOIN_RIGHT" => JoinType::RightOuter,
                    "JOIN_FULL" => JoinType::FullOuter,
                    _ => JoinType::Inner,
                };
                let Some(table) = self.bind_table_ref(rarg) else {
                    self.restore_scope(saved_scope);
                    return None;
                };
                self.add_to_scope(&table);
                let condition = quals.and_then(|quals| self.bind_expression(quals));
                select.joins.push(BoundJoin {
                    table,
                    join_type,
                    condition,
                });
            } else if ast::is_range_var(entry) {
                // Comma-separated relation: cross join
                let Some(table) = self.bind_table_ref(entry) else {
                    self.restore_scope(saved_scope);
                    return None;
                };
                self.add_to_scope(&table);
                select.joins.push(BoundJoin {
                    table,
                    join_type: JoinType::Cross,
                    condition: None,
                });
            }
        }

        // (iv) SELECT list after FROM/JOIN so the scope is complete
        let targets = ast::target_list(node);
        let plain_star = targets.len() == 1
            && targets
                .first()
                .and_then(|t| ast::res_target(t))
                .and_then(ast::res_target_value)
                .and_then(ast::as_column_ref)
                .map(|cr| ast::column_ref_fields(cr) == vec![ColumnRefField::Star])
                .unwrap_or(false);
        select.is_star = plain_star;

        for target in &targets {
            let Some(res_target) = ast::res_target(target) else {
                continue;
            };
            let alias = ast::res_target_name(res_target).map(str::to_string);
            let Some(value) = ast::res_target_value(res_target) else {
                continue;
            };

            if let Some(column_ref) = ast::as_column_ref(value) {
                let fields = ast::column_ref_fields(column_ref);
                match fields.as_slice() {
                    [ColumnRefField::Star] => {
                        self.expand_star(None, &mut select);
                        continue;
                    }
                    [ColumnRefField::Name(table), ColumnRefField::Star] => {
                        self.expand_star(Some(table.clone()), &mut select);
                        continue;
                    }
                    _ => {}
                }
            }

            match self.bind_expression(value) {
                Some(expr) => {
                    select.select_list.push(expr);
                    select.select_aliases.push(alias);
                }
                None => {
                    self.restore_scope(saved_scope);
                    return None;
                }
            }
        }

        // (v) WHERE
        if let Some(where_clause) = ast::where_clause(node) {
            select.where_clause = self.bind_expression(where_clause);
        }

        // (vi) GROUP BY / HAVING / ORDER BY / LIMIT / OFFSET
        for group_expr in ast::group_clause(node) {
            if let Some(expr) = self.bind_expression(group_expr) {
                select.group_by.push(expr);
            }
        }
        if let Some(having) = ast::having_clause(node) {
            select.having = self.bind_expression(having);
        }
        self.bind_tail_clauses(node, &mut select);

        select.table_refs = self.table_scope.clone();
        select.parameters = self.collect_parameters(&select);

        self.restore_scope(saved_scope);
        Some(select)
    }

    /// ORDER BY / LIMIT / OFFSET, shared between plain selects and set
    /// operations.
    fn bind_tail_clauses(&mut self, node: &Json, select: &mut BoundSelect) {
        for entry in ast::sort_clause(node) {
            if let Some((sort_node, ascending, nulls_first)) = ast::sort_by_parts(entry) {
                if let Some(expr) = self.bind_expression(sort_node) {
                    select.order_by.push(BoundOrderBy {
                        expr,
                        ascending,
                        nulls_first,
                    });
                }
            }
        }

        if let Some(limit_node) = ast::limit_count(node) {
            match ast::const_integer(limit_node) {
                Some(limit) => select.limit = Some(limit),
                None => self.add_error(BindingError::new(
                    BindingErrorKind::Unsupported,
                    "LIMIT must be a non-negative integer constant",
                )),
            }
        }
        if let Some(offset_node) = ast::limit_offset(node) {
            match ast::const_integer(offset_node) {
                Some(offset) => select.offset = Some(offset),
                None => self.add_error(BindingError::new(
                    BindingErrorKind::Unsupported,
                    "OFFSET must be a non-negative integer constant",
                )),
            }
        }
    }

    /// Expand `*` (or `alias.*`) to every column of the matching in-scope
    /// tables, in scope registration order.
    fn expand_star(&mut self, qualifier: Option<String>, select: &mut BoundSelect) {
        let keys: Vec<String> = match &qualifier {
            Some(name) => vec![name.clone()],
            None => self.scope_order.clone(),
        };

        if let Some(name) = &qualifier {
            if !self.table_scope.contains_key(name) {
                let suggestions = self.registry.suggest_table_names(name);
                self.add_error(
                    BindingError::new(
                        BindingErrorKind::TableNotFound,
                        format!("Table '{}' not found", name),
                    )
                    .with_suggestions(suggestions),
                );
                return;
            }
        }

        for key in keys {
            let Some(table_ref) = self.table_scope.get(&key).cloned() else {
                continue;
            };
            for (position, &column_id) in table_ref.available_columns.iter().enumerate() {
                let Some(definition) = table_ref.column_definitions.get(position) else {
                    continue;
                };
                select.select_list.push(BoundExpression {
                    kind: BoundExpressionKind::ColumnRef {
                        table_id: table_ref.table_id,
                        column_id,
                    },
                    result_type: definition.column_type,
                    nullable: definition.nullable,
                    text: definition.name.clone(),
                });
                select.select_aliases.push(None);
            }
        }
    }

    // ------------------------------------------------------------------
    // INSERT / UPDATE / DELETE
    // ------------------------------------------------------------------

    fn bind_insert(&mut self, node: &Json) -> Option<BoundInsert> {
        if let Some(with_clause) = ast::with_clause(node) {
            self.process_with_clause(with_clause);
        }

        let relation = ast::dml_relation(node)?;
        let target_table = self.bind_table_ref(relation)?;

        let mut target_columns = Vec::new();
        for col in ast::insert_columns(node) {
            let Some(res_target) = ast::res_target(col) else {
                continue;
            };
            let Some(name) = ast::res_target_name(res_target) else {
                continue;
            };
            match target_table.column_name_to_id.get(name) {
                Some(&column_id) => target_columns.push(column_id),
                None => self.add_column_not_found(name, Some(&target_table)),
            }
        }

        let expected_width = if target_columns.is_empty() {
            target_table.available_columns.len()
        } else {
            target_columns.len()
        };

        let saved_scope = self.save_scope();
        self.add_to_scope(&target_table);

        let source = if let Some(select_node) = ast::insert_select(node) {
            // bind_select establishes its own scope for the source query
            let inner = ast::statement_kind(select_node)
                .filter(|(kind, _)| *kind == StatementKind::Select)
                .map(|(_, inner)| inner)
                .unwrap_or(select_node);
            match self.bind_select(inner) {
                Some(select) => InsertSource::Select(Box::new(select)),
                None => {
                    self.restore_scope(saved_scope);
                    return None;
                }
            }
        } else if let Some(rows) = ast::insert_values(node) {
            let mut bound_rows = Vec::with_capacity(rows.len());
            for row in rows {
                if row.len() != expected_width {
                    self.add_error(BindingError::new(
                        BindingErrorKind::Unsupported,
                        format!(
                            "INSERT row has {} expressions but {} target columns",
                            row.len(),
                            expected_width
                        ),
                    ));
                    continue;
                }
                let mut bound_row = Vec::with_capacity(row.len());
                for (position, expr_node) in row.iter().enumerate() {
                    if let Some(mut expr) = self.bind_expression(expr_node) {
                        // A bare parameter in VALUES takes the target
                        // column's type
                        if let Some(column_type) = self.insert_column_type(
                            &target_table,
                            &target_columns,
                            position,
                        ) {
                            refine_parameter(&mut expr, column_type);
                        }
                        bound_row.push(expr);
                    }
                }
                bound_rows.push(bound_row);
            }
            InsertSource::Values(bound_rows)
        } else {
            InsertSource::Values(Vec::new())
        };

        let conflict_columns = ast::on_conflict_columns(node)
            .iter()
            .filter_map(|name| match target_table.column_name_to_id.get(name) {
                Some(&column_id) => Some(column_id),
                None => {
                    self.add_column_not_found(name, Some(&target_table));
                    None
                }
            })
            .collect();

        let returning_columns = self.bind_returning(node, &target_table);

        let mut table_refs = HashMap::new();
        table_refs.insert(target_table.table_name.clone(), target_table.clone());

        self.restore_scope(saved_scope);

        let mut insert = BoundInsert {
            target_table,
            target_columns,
            source,
            conflict_columns,
            returning_columns,
            table_refs,
            parameters: Vec::new(),
        };
        insert.parameters = self.collect_insert_parameters(&insert);
        Some(insert)
    }

    fn insert_column_type(
        &self,
        target: &BoundTableRef,
        target_columns: &[ColumnId],
        position: usize,
    ) -> Option<ColumnType> {
        let column_id = if target_columns.is_empty() {
            *target.available_columns.get(position)?
        } else {
            *target_columns.get(position)?
        };
        let index = target
            .available_columns
            .iter()
            .position(|&id| id == column_id)?;
        Some(target.column_definitions.get(index)?.column_type)
    }

    fn bind_update(&mut self, node: &Json) -> Option<BoundUpdate> {
        if let Some(with_clause) = ast::with_clause(node) {
            self.process_with_clause(with_clause);
        }

        let relation = ast::dml_relation(node)?;
        let target_table = self.bind_table_ref(relation)?;

        let saved_scope = self.save_scope();
        self.add_to_scope(&target_table);

        let mut assignments = Vec::new();
        for target in ast::update_target_list(node) {
            let Some(res_target) = ast::res_target(target) else {
                continue;
            };
            let (Some(name), Some(value)) = (
                ast::res_target_name(res_target),
                ast::res_target_value(res_target),
            ) else {
                continue;
            };

            let Some(&column_id) = target_table.column_name_to_id.get(name) else {
                self.add_column_not_found(name, Some(&target_table));
                continue;
            };

            if let Some(mut expr) = self.bind_expression(value) {
                let index = target_table
                    .available_columns
                    .iter()
                    .position(|&id| id == column_id);
                if let Some(definition) =
                    index.and_then(|i| target_table.column_definitions.get(i))
                {
                    refine_parameter(&mut expr, definition.column_type);
                    if !self
                        .registry
                        .are_types_compatible(definition.column_type, expr.result_type)
                    {
                        debug!(
                            column = %definition.name,
                            expected = %definition.column_type,
                            actual = %expr.result_type,
                            "assignment type mismatch, keeping text fallback"
                        );
                    }
                }
                assignments.push((column_id, expr));
            }
        }

        let where_clause = ast::dml_where_clause(node).and_then(|w| self.bind_expression(w));
        let returning_columns = self.bind_returning(node, &target_table);

        let mut table_refs = HashMap::new();
        table_refs.insert(target_table.table_name.clone(), target_table.clone());
        if target_table.alias != target_table.table_name {
            table_refs.insert(target_table.alias.clone(), target_table.clone());
        }

        self.restore_scope(saved_scope);

        let mut update = BoundUpdate {
            target_table,
            assignments,
            where_clause,
            returning_columns,
            table_refs,
            parameters: Vec::new(),
        };
        update.parameters = self.collect_update_parameters(&update);
        Some(update)
    }

    fn bind_delete(&mut self, node: &Json) -> Option<BoundDelete> {
        if let Some(with_clause) = ast::with_clause(node) {
            self.process_with_clause(with_clause);
        }

        let relation = ast::dml_relation(node)?;
        let target_table = self.bind_table_ref(relation)?;

        let saved_scope = self.save_scope();
        self.add_to_scope(&target_table);

        let where_clause = ast::dml_where_clause(node).and_then(|w| self.bind_expression(w));
        let returning_columns = self.bind_returning(node, &target_table);

        let mut table_refs = HashMap::new();
        table_refs.insert(target_table.table_name.clone(), target_table.clone());
        if target_table.alias != target_table.table_name {
            table_refs.insert(target_table.alias.clone(), target_table.clone());
        }

        self.restore_scope(saved_scope);

        let mut parameters = Vec::new();
        if let Some(where_clause) = &where_clause {
            where_clause.visit_parameters(&mut |p| parameters.push(p.clone()));
        }

        Some(BoundDelete {
            target_table,
            where_clause,
            returning_columns,
            table_refs,
            parameters: dedup_parameters(parameters),
        })
    }

    fn bind_returning(&mut self, node: &Json, target: &BoundTableRef) -> Vec<ColumnId> {
        let mut columns = Vec::new();
        for entry in ast::returning_list(node) {
            let Some(value) = ast::res_target(entry).and_then(ast::res_target_value) else {
                continue;
            };
            let Some(column_ref) = ast::as_column_ref(value) else {
                continue;
            };
            let fields = ast::column_ref_fields(column_ref);
            match fields.as_slice() {
                [ColumnRefField::Star] => {
                    columns.extend(target.available_columns.iter().copied());
                }
                [ColumnRefField::Name(name)]
                | [ColumnRefField::Name(_), ColumnRefField::Name(name)] => {
                    match target.column_name_to_id.get(name) {
                        Some(&column_id) => columns.push(column_id),
                        None => self.add_column_not_found(name, Some(target)),
                    }
                }
                _ => {}
            }
        }
        columns
    }

    // ------------------------------------------------------------------
    // Table references
    // ------------------------------------------------------------------

    fn bind_table_ref(&mut self, node: &Json) -> Option<BoundTableRef> {
        let Some((table_name, alias)) = ast::range_var(node) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Unsupported table reference",
            ));
            return None;
        };

        // CTEs shadow schema tables
        if let Some(&index) = self.cte_names.get(&table_name) {
            let cte = &self.ctes[index];
            let mut column_name_to_id = HashMap::new();
            let mut column_definitions = Vec::new();
            let mut available_columns = Vec::new();

            for (position, name) in cte.column_names.iter().enumerate() {
                // Positional 0-based ids for CTE columns
                available_columns.push(position);
                column_name_to_id.insert(name.clone(), position);

                let column_type = cte
                    .column_types
                    .get(position)
                    .copied()
                    .unwrap_or(ColumnType::Text);
                let mut definition = ColumnDefinition::new(name.clone(), column_type);
                definition.nullable = true;
                column_definitions.push(definition);
            }

            return Some(BoundTableRef {
                table_id: cte.temp_table_id,
                table_name: table_name.clone(),
                alias: alias.unwrap_or(table_name),
                available_columns,
                column_name_to_id,
                column_definitions,
                available_indexes: Vec::new(),
            });
        }

        let Some(table_id) = self.registry.resolve_table(&table_name) else {
            let suggestions = self.registry.suggest_table_names(&table_name);
            self.add_error(
                BindingError::new(
                    BindingErrorKind::TableNotFound,
                    format!("Table '{}' not found", table_name),
                )
                .with_suggestions(suggestions),
            );
            return None;
        };

        let mut available_columns = Vec::new();
        let mut column_name_to_id = HashMap::new();
        let mut column_definitions = Vec::new();
        for column_id in self.registry.get_table_column_ids(table_id) {
            let definition = self.registry.get_column_definition(table_id, column_id);
            available_columns.push(column_id);
            column_name_to_id.insert(definition.name.clone(), column_id);
            column_definitions.push(definition.clone());
        }

        Some(BoundTableRef {
            table_id,
            table_name: table_name.clone(),
            alias: alias.unwrap_or(table_name),
            available_columns,
            column_name_to_id,
            column_definitions,
            available_indexes: self.registry.get_table_indexes(table_id),
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn bind_expression(&mut self, node: &Json) -> Option<BoundExpression> {
        if let Some(column_ref) = ast::as_column_ref(node) {
            return self.bind_column_ref(column_ref);
        }
        if let Some(a_const) = ast::as_a_const(node) {
            return Some(self.bind_constant(a_const));
        }
        if let Some(param_ref) = ast::as_param_ref(node) {
            return self.bind_parameter(param_ref);
        }
        if let Some(func_call) = ast::as_func_call(node) {
            return self.bind_function_call(func_call);
        }
        if let Some(a_expr) = ast::as_a_expr(node) {
            return self.bind_a_expr(a_expr);
        }
        if let Some(bool_expr) = ast::as_bool_expr(node) {
            return self.bind_bool_expr(bool_expr);
        }
        if let Some(sublink) = ast::as_sublink(node) {
            return self.bind_subquery(sublink);
        }

        self.add_error(BindingError::new(
            BindingErrorKind::Unsupported,
            "Unsupported expression node",
        ));
        None
    }

    fn bind_column_ref(&mut self, column_ref: &Json) -> Option<BoundExpression> {
        let fields = ast::column_ref_fields(column_ref);

        match fields.as_slice() {
            [ColumnRefField::Name(column_name)] => {
                // Unqualified: search the current scope only, one entry per
                // distinct table
                let mut matches: Vec<(String, BoundTableRef, ColumnId)> = Vec::new();
                for key in &self.scope_order {
                    let Some(table_ref) = self.table_scope.get(key) else {
                        continue;
                    };
                    if let Some(&column_id) = table_ref.column_name_to_id.get(column_name) {
                        matches.push((key.clone(), table_ref.clone(), column_id));
                    }
                }

                match matches.len() {
                    0 => {
                        self.add_column_not_found(column_name, None);
                        None
                    }
                    1 => {
                        let (_, table_ref, column_id) = matches.remove(0);
                        Some(self.column_expression(&table_ref, column_id, column_name.clone()))
                    }
                    _ => {
                        let candidates: Vec<String> = matches
                            .iter()
                            .map(|(key, _, _)| format!("{}.{}", key, column_name))
                            .collect();
                        self.add_error(BindingError::new(
                            BindingErrorKind::AmbiguousColumn,
                            format!(
                                "Ambiguous column reference '{}'. Could be: {}",
                                column_name,
                                candidates.join(", ")
                            ),
                        ));
                        None
                    }
                }
            }
            [ColumnRefField::Name(qualifier), ColumnRefField::Name(column_name)] => {
                let Some(table_ref) = self.table_scope.get(qualifier).cloned() else {
                    let suggestions = self.registry.suggest_table_names(qualifier);
                    self.add_error(
                        BindingError::new(
                            BindingErrorKind::TableNotFound,
                            format!("Table '{}' not found", qualifier),
                        )
                        .with_suggestions(suggestions),
                    );
                    return None;
                };

                let Some(&column_id) = table_ref.column_name_to_id.get(column_name) else {
                    self.add_column_not_found(column_name, Some(&table_ref));
                    return None;
                };

                let text = format!("{}.{}", qualifier, column_name);
                Some(self.column_expression(&table_ref, column_id, text))
            }
            _ => {
                self.add_error(BindingError::new(
                    BindingErrorKind::Unsupported,
                    "Invalid column reference format",
                ));
                None
            }
        }
    }

    fn column_expression(
        &self,
        table_ref: &BoundTableRef,
        column_id: ColumnId,
        text: String,
    ) -> BoundExpression {
        let index = table_ref
            .available_columns
            .iter()
            .position(|&id| id == column_id)
            .unwrap_or(0);
        let definition = table_ref.column_definitions.get(index);

        BoundExpression {
            kind: BoundExpressionKind::ColumnRef {
                table_id: table_ref.table_id,
                column_id,
            },
            result_type: definition.map(|d| d.column_type).unwrap_or(ColumnType::Text),
            nullable: definition.map(|d| d.nullable).unwrap_or(true),
            text,
        }
    }

    fn bind_constant(&mut self, a_const: &Json) -> BoundExpression {
        match ast::const_value(a_const) {
            ConstValue::Integer(value) => BoundExpression {
                kind: BoundExpressionKind::Constant {
                    value: value.to_string(),
                },
                result_type: ColumnType::Integer,
                nullable: false,
                text: value.to_string(),
            },
            ConstValue::Float(value) => BoundExpression {
                kind: BoundExpressionKind::Constant {
                    value: value.clone(),
                },
                result_type: ColumnType::Decimal,
                nullable: false,
                text: value,
            },
            ConstValue::String(value) => BoundExpression {
                kind: BoundExpressionKind::Constant {
                    value: value.clone(),
                },
                result_type: ColumnType::Text,
                nullable: false,
                text: format!("'{}'", value),
            },
            ConstValue::Boolean(value) => BoundExpression {
                kind: BoundExpressionKind::Constant {
                    value: value.to_string(),
                },
                result_type: ColumnType::Boolean,
                nullable: false,
                text: value.to_string(),
            },
            ConstValue::Null => BoundExpression {
                kind: BoundExpressionKind::Constant {
                    value: "NULL".to_string(),
                },
                result_type: ColumnType::Text,
                nullable: true,
                text: "NULL".to_string(),
            },
        }
    }

    fn bind_parameter(&mut self, param_ref: &Json) -> Option<BoundExpression> {
        let Some(index) = ast::param_number(param_ref).filter(|&n| n >= 1) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Parameter reference without a valid number",
            ));
            return None;
        };

        Some(BoundExpression {
            kind: BoundExpressionKind::Parameter(BoundParameter {
                index,
                param_type: ParameterType::Unknown,
                nullable: true,
            }),
            result_type: ColumnType::Text,
            nullable: true,
            text: format!("${}", index),
        })
    }

    fn bind_function_call(&mut self, func_call: &Json) -> Option<BoundExpression> {
        let Some((name, arg_nodes)) = ast::func_call_parts(func_call) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Function call without a name",
            ));
            return None;
        };
        let agg_star = func_call
            .get("agg_star")
            .and_then(Json::as_bool)
            .unwrap_or(false);

        let mut args = Vec::with_capacity(arg_nodes.len());
        for arg in arg_nodes {
            args.push(self.bind_expression(arg)?);
        }

        let result_type = match name.as_str() {
            "count" | "sum" => ColumnType::Integer,
            "max" | "min" => args
                .first()
                .map(|arg| arg.result_type)
                .unwrap_or(ColumnType::Text),
            _ => ColumnType::Text,
        };

        let text = if agg_star {
            format!("{}(*)", name)
        } else {
            let rendered: Vec<&str> = args.iter().map(|arg| arg.text.as_str()).collect();
            format!("{}({})", name, rendered.join(", "))
        };

        Some(BoundExpression {
            kind: BoundExpressionKind::FunctionCall { name: name.clone(), args },
            result_type,
            nullable: name != "count",
            text,
        })
    }

    fn bind_a_expr(&mut self, a_expr: &Json) -> Option<BoundExpression> {
        let Some((op, lexpr, rexpr)) = ast::a_expr_parts(a_expr) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Operator expression without a name",
            ));
            return None;
        };

        let left = lexpr.and_then(|node| self.bind_expression(node));
        let right = rexpr.and_then(|node| self.bind_expression(node));

        match (left, right) {
            (Some(mut left), Some(mut right)) => {
                let is_comparison =
                    matches!(op.as_str(), "=" | "<>" | "!=" | "<" | ">" | "<=" | ">=");

                if is_comparison {
                    // Refine untyped parameters from the opposite side
                    if !matches!(right.kind, BoundExpressionKind::Parameter(_)) {
                        refine_parameter(&mut left, right.result_type);
                    }
                    if !matches!(left.kind, BoundExpressionKind::Parameter(_)) {
                        refine_parameter(&mut right, left.result_type);
                    }
                }

                let result_type = if is_comparison
                    || matches!(op.as_str(), "AND" | "OR" | "LIKE" | "ILIKE" | "IN")
                {
                    ColumnType::Boolean
                } else if matches!(op.as_str(), "+" | "-" | "*" | "/" | "%") {
                    self.registry
                        .get_common_type(left.result_type, right.result_type)
                } else {
                    ColumnType::Text
                };

                let nullable = left.nullable || right.nullable;
                let text = format!("{} {} {}", left.text, op, right.text);
                Some(BoundExpression {
                    kind: BoundExpressionKind::BinaryOp {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    result_type,
                    nullable,
                    text,
                })
            }
            (Some(operand), None) | (None, Some(operand)) => {
                let (result_type, nullable, text) = match op.as_str() {
                    "IS NULL" | "IS NOT NULL" => (
                        ColumnType::Boolean,
                        false,
                        format!("{} {}", operand.text, op),
                    ),
                    "-" => (
                        operand.result_type,
                        operand.nullable,
                        format!("-{}", operand.text),
                    ),
                    _ => (
                        ColumnType::Text,
                        operand.nullable,
                        format!("{} {}", op, operand.text),
                    ),
                };
                Some(BoundExpression {
                    kind: BoundExpressionKind::UnaryOp {
                        op,
                        operand: Box::new(operand),
                    },
                    result_type,
                    nullable,
                    text,
                })
            }
            (None, None) => None,
        }
    }

    fn bind_bool_expr(&mut self, bool_expr: &Json) -> Option<BoundExpression> {
        let Some((boolop, arg_nodes)) = ast::bool_expr_parts(bool_expr) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Boolean expression without an operator",
            ));
            return None;
        };

        let op = match boolop {
            "AND_EXPR" => "AND",
            "OR_EXPR" => "OR",
            "NOT_EXPR" => "NOT",
            other => other,
        };

        let mut args = Vec::with_capacity(arg_nodes.len());
        for node in arg_nodes {
            args.push(self.bind_expression(node)?);
        }

        if op == "NOT" {
            let operand = args.pop()?;
            let text = format!("NOT {}", operand.text);
            return Some(BoundExpression {
                kind: BoundExpressionKind::UnaryOp {
                    op: "NOT".to_string(),
                    operand: Box::new(operand),
                },
                result_type: ColumnType::Boolean,
                nullable: true,
                text,
            });
        }

        // Fold arguments into a left-deep binary chain
        let mut iter = args.into_iter();
        let mut acc = iter.next()?;
        for next in iter {
            let text = format!("{} {} {}", acc.text, op, next.text);
            let nullable = acc.nullable || next.nullable;
            acc = BoundExpression {
                kind: BoundExpressionKind::BinaryOp {
                    op: op.to_string(),
                    left: Box::new(acc),
                    right: Box::new(next),
                },
                result_type: ColumnType::Boolean,
                nullable,
                text,
            };
        }
        Some(acc)
    }

    fn bind_subquery(&mut self, sublink: &Json) -> Option<BoundExpression> {
        let Some(subselect) = ast::sublink_subselect(sublink) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Unsupported,
                "Subquery without a SELECT body",
            ));
            return None;
        };

        let select_node = ast::statement_kind(subselect)
            .filter(|(kind, _)| *kind == StatementKind::Select)
            .map(|(_, node)| node)
            .unwrap_or(subselect);

        let statement = self.bind_select(select_node)?;
        Some(BoundExpression {
            kind: BoundExpressionKind::Subquery {
                statement: Box::new(statement),
            },
            // Pending better inference
            result_type: ColumnType::Text,
            nullable: true,
            text: "(SUBQUERY)".to_string(),
        })
    }

    fn add_column_not_found(&mut self, column_name: &str, table: Option<&BoundTableRef>) {
        let error = match table {
            Some(table_ref) => {
                let suggestions = suggest_from_candidates(
                    column_name,
                    table_ref.column_name_to_id.keys().cloned().collect(),
                );
                BindingError::new(
                    BindingErrorKind::ColumnNotFound,
                    format!(
                        "Column '{}' not found in table '{}'",
                        column_name, table_ref.table_name
                    ),
                )
                .with_suggestions(suggestions)
                .with_location(table_ref.table_name.clone())
            }
            None => {
                // Suggest from every in-scope table
                let mut candidates = Vec::new();
                for table_ref in self.table_scope.values() {
                    candidates.extend(table_ref.column_name_to_id.keys().cloned());
                }
                candidates.sort();
                candidates.dedup();
                let suggestions = suggest_from_candidates(column_name, candidates);
                BindingError::new(
                    BindingErrorKind::ColumnNotFound,
                    format!("Column '{}' not found", column_name),
                )
                .with_suggestions(suggestions)
            }
        };
        self.add_error(error);
    }

    // ------------------------------------------------------------------
    // CTE protocol
    // ------------------------------------------------------------------

    fn process_with_clause(&mut self, with_clause: &Json) {
        self.with_recursive = ast::with_clause_recursive(with_clause);

        for entry in ast::with_clause_ctes(with_clause) {
            let Some(cte_node) = ast::common_table_expr(entry) else {
                self.add_error(BindingError::new(
                    BindingErrorKind::Cte,
                    "Invalid CTE definition: missing CommonTableExpr",
                ));
                continue;
            };
            self.bind_cte_definition(cte_node);
        }
    }

    fn bind_cte_definition(&mut self, cte_node: &Json) {
        let Some(name) = ast::cte_name(cte_node).map(str::to_string) else {
            self.add_error(BindingError::new(
                BindingErrorKind::Cte,
                "CTE definition missing name",
            ));
            return;
        };

        if self.cte_names.contains_key(&name) {
            self.add_error(BindingError::new(
                BindingErrorKind::Cte,
                format!("Duplicate CTE name: {}", name),
            ));
            return;
        }

        let Some(query) = ast::cte_query(cte_node) else {
            self.add_error(
                BindingError::new(BindingErrorKind::Cte, "CTE definition missing query")
                    .with_location(name),
            );
            return;
        };

        let Some((StatementKind::Select, select_node)) = ast::statement_kind(query) else {
            self.add_error(
                BindingError::new(
                    BindingErrorKind::Cte,
                    "CTE definition must be a SELECT statement",
                )
                .with_location(name),
            );
            return;
        };

        let explicit_columns = ast::cte_column_names(cte_node);
        let preliminary_columns = explicit_columns
            .clone()
            .unwrap_or_else(|| derive_cte_column_names(select_node));

        // Pre-register before binding the body so a recursive self-reference
        // resolves; types are filled in after the body is bound.
        let temp_table_id = self.next_temp_table_id;
        self.next_temp_table_id += 1;
        let stub = CteDefinition {
            name: name.clone(),
            column_names: preliminary_columns,
            column_types: Vec::new(),
            statement: Box::new(BoundSelect::default()),
            is_recursive: self.with_recursive,
            temp_table_id,
        };
        let index = self.ctes.len();
        self.ctes.push(stub);
        self.cte_names.insert(name.clone(), index);

        let Some(body) = self.bind_select(select_node) else {
            self.add_error(
                BindingError::new(BindingErrorKind::Cte, "Failed to bind CTE definition")
                    .with_location(name.clone()),
            );
            return;
        };

        // Infer the CTE's schema from the bound select list (the anchor arm
        // for set operations)
        let cte = &mut self.ctes[index];
        if let Some(explicit) = &explicit_columns {
            if explicit.len() != body.select_list.len() {
                let error = BindingError::new(
                    BindingErrorKind::Cte,
                    format!(
                        "CTE column count mismatch: specified {} but query returns {}",
                        explicit.len(),
                        body.select_list.len()
                    ),
                )
                .with_location(name);
                self.errors.push(error);
                return;
            }
        } else {
            cte.column_names = body
                .select_list
                .iter()
                .enumerate()
                .map(|(position, expr)| {
                    body.select_aliases
                        .get(position)
                        .and_then(Clone::clone)
                        .unwrap_or_else(|| {
                            if expr.is_column_ref() {
                                unqualified_name(&expr.text)
                            } else {
                                format!("col_{}", position + 1)
                            }
                        })
                })
                .collect();
        }

        cte.column_types = body.select_list.iter().map(|e| e.result_type).collect();
        cte.statement = Box::new(body);
    }

    fn clear_ctes(&mut self) {
        self.ctes.clear();
        self.cte_names.clear();
        self.with_recursive = false;
        self.next_temp_table_id = CTE_TABLE_ID_BASE;
    }

    // ------------------------------------------------------------------
    // Scope management
    // ------------------------------------------------------------------

    fn add_to_scope(&mut self, table_ref: &BoundTableRef) {
        let primary = table_ref.alias.clone();
        self.table_scope.insert(primary.clone(), table_ref.clone());
        self.scope_order.push(primary);
        if table_ref.alias != table_ref.table_name {
            self.table_scope
                .insert(table_ref.table_name.clone(), table_ref.clone());
        }
    }

    fn save_scope(&mut self) -> (HashMap<String, BoundTableRef>, Vec<String>) {
        (
            std::mem::take(&mut self.table_scope),
            std::mem::take(&mut self.scope_order),
        )
    }

    fn restore_scope(&mut self, saved: (HashMap<String, BoundTableRef>, Vec<String>)) {
        self.table_scope = saved.0;
        self.scope_order = saved.1;
    }

    fn swap_scope_from_refs(
        &mut self,
        refs: &HashMap<String, BoundTableRef>,
    ) -> (HashMap<String, BoundTableRef>, Vec<String>) {
        let saved = self.save_scope();
        let mut order: Vec<String> = refs.keys().cloned().collect();
        order.sort();
        self.table_scope = refs.clone();
        self.scope_order = order;
        saved
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    fn collect_parameters(&self, select: &BoundSelect) -> Vec<BoundParameter> {
        let mut parameters = Vec::new();
        let mut visit = |p: &BoundParameter| parameters.push(p.clone());

        for expr in &select.select_list {
            expr.visit_parameters(&mut visit);
        }
        for join in &select.joins {
            if let Some(condition) = &join.condition {
                condition.visit_parameters(&mut visit);
            }
        }
        if let Some(where_clause) = &select.where_clause {
            where_clause.visit_parameters(&mut visit);
        }
        for expr in &select.group_by {
            expr.visit_parameters(&mut visit);
        }
        if let Some(having) = &select.having {
            having.visit_parameters(&mut visit);
        }
        for order in &select.order_by {
            order.expr.visit_parameters(&mut visit);
        }
        for set_op in &select.set_operations {
            parameters.extend(set_op.right.parameters.iter().cloned());
        }

        dedup_parameters(parameters)
    }

    fn collect_insert_parameters(&self, insert: &BoundInsert) -> Vec<BoundParameter> {
        let mut parameters = Vec::new();
        let mut visit = |p: &BoundParameter| parameters.push(p.clone());

        match &insert.source {
            InsertSource::Values(rows) => {
                for row in rows {
                    for expr in row {
                        expr.visit_parameters(&mut visit);
                    }
                }
            }
            InsertSource::Select(select) => {
                parameters.extend(select.parameters.iter().cloned());
            }
        }

        dedup_parameters(parameters)
    }

    fn collect_update_parameters(&self, update: &BoundUpdate) -> Vec<BoundParameter> {
        let mut parameters = Vec::new();
        let mut visit = |p: &BoundParameter| parameters.push(p.clone());

        for (_, expr) in &update.assignments {
            expr.visit_parameters(&mut visit);
        }
        if let Some(where_clause) = &update.where_clause {
            where_clause.visit_parameters(&mut visit);
        }

        dedup_parameters(parameters)
    }
}

/// If the expression is an untyped parameter, adopt the context type.
/// When the same parameter appears in several contexts, the last one wins.
fn refine_parameter(expr: &mut BoundExpression, context_type: ColumnType) {
    if let BoundExpressionKind::Parameter(parameter) = &mut expr.kind {
        parameter.param_type = ParameterType::from(context_type);
        expr.result_type = context_type;
    }
}

/// Merge collected parameters by index; a typed occurrence overrides an
/// earlier one (last context wins), output sorted by index.
fn dedup_parameters(parameters: Vec<BoundParameter>) -> Vec<BoundParameter> {
    let mut by_index: HashMap<usize, BoundParameter> = HashMap::new();
    for parameter in parameters {
        match by_index.get(&parameter.index) {
            Some(existing)
                if parameter.param_type == ParameterType::Unknown
                    && existing.param_type != ParameterType::Unknown => {}
            _ => {
                by_index.insert(parameter.index, parameter);
            }
        }
    }
    let mut merged: Vec<BoundParameter> = by_index.into_values().collect();
    merged.sort_by_key(|p| p.index);
    merged
}

/// Column names for a CTE whose explicit list is absent, derived from the
/// (possibly set-operation) query's first target list before binding.
fn derive_cte_column_names(select_node: &Json) -> Vec<String> {
    // Walk into the anchor arm of a set operation
    let mut node = select_node;
    while let Some((_, _, larg, _)) = ast::set_operation(node) {
        node = larg;
    }

    let mut names = Vec::new();
    for (position, target) in ast::target_list(node).iter().enumerate() {
        let Some(res_target) = ast::res_target(target) else {
            names.push(format!("col_{}", position + 1));
            continue;
        };
        if let Some(alias) = ast::res_target_name(res_target) {
            names.push(alias.to_string());
            continue;
        }
        let column_name = ast::res_target_value(res_target)
            .and_then(ast::as_column_ref)
            .and_then(|cr| {
                let fields = ast::column_ref_fields(cr);
                match fields.last() {
                    Some(ColumnRefField::Name(name)) => Some(name.clone()),
                    _ => None,
                }
            });
        names.push(column_name.unwrap_or_else(|| format!("col_{}", position + 1)));
    }
    names
}

/// "alias.column" -> "column"
fn unqualified_name(text: &str) -> String {
    text.rsplit('.').next().unwrap_or(text).to_string()
}
