// ID-based schema lookup tables.
//
// The registry snapshots a `DatabaseSchema` into dense, immutable mappings:
// table name -> TableId (1-based), column name -> ColumnId (1-based within a
// table), plus a global column index for ambiguity detection. Rebuilding
// (`register_schema` / `refresh_mappings`) is an explicit, non-concurrent
// operation; lookups afterwards are read-only.

use super::{
    ColumnDefinition, ColumnId, ColumnType, DatabaseSchema, IndexDefinition, TableDefinition,
    TableId,
};
use std::collections::HashMap;

/// A candidate resolution of an unqualified column name.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnResolution {
    pub table_id: TableId,
    pub column_id: ColumnId,
    pub table_name: String,
    pub column_name: String,
}

/// Maximum number of name suggestions attached to a lookup failure.
const MAX_SUGGESTIONS: usize = 3;

/// Minimum similarity for a name to qualify as a suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.3;

pub struct SchemaRegistry {
    schema: DatabaseSchema,

    table_name_to_id: HashMap<String, TableId>,
    table_id_to_name: HashMap<TableId, String>,
    table_definitions: HashMap<TableId, TableDefinition>,

    column_mappings: HashMap<TableId, HashMap<String, ColumnId>>,
    column_definitions: HashMap<TableId, Vec<ColumnDefinition>>,

    // column name -> every (table, column) pair exposing it; drives ambiguity
    // detection for unqualified references
    global_column_index: HashMap<String, Vec<(TableId, ColumnId)>>,

    table_indexes: HashMap<TableId, Vec<IndexDefinition>>,

    next_table_id: TableId,
}

impl SchemaRegistry {
    pub fn new(schema: &DatabaseSchema) -> Self {
        let mut registry = Self {
            schema: schema.clone(),
            table_name_to_id: HashMap::new(),
            table_id_to_name: HashMap::new(),
            table_definitions: HashMap::new(),
            column_mappings: HashMap::new(),
            column_definitions: HashMap::new(),
            global_column_index: HashMap::new(),
            table_indexes: HashMap::new(),
            next_table_id: 1,
        };
        registry.initialize_mappings();
        registry
    }

    /// Rebuild all mappings from a new schema. Not safe to call concurrently
    /// with lookups; callers must externally serialize.
    pub fn register_schema(&mut self, schema: &DatabaseSchema) {
        self.schema = schema.clone();
        self.table_name_to_id.clear();
        self.table_id_to_name.clear();
        self.table_definitions.clear();
        self.column_mappings.clear();
        self.column_definitions.clear();
        self.global_column_index.clear();
        self.table_indexes.clear();
        self.next_table_id = 1;
        self.initialize_mappings();
    }

    /// Rebuild mappings from the current schema (after external mutation).
    pub fn refresh_mappings(&mut self) {
        let schema = self.schema.clone();
        self.register_schema(&schema);
    }

    fn initialize_mappings(&mut self) {
        for table in self.schema.tables() {
            self.register_table(table);
        }
        self.build_global_column_index();
    }

    fn register_table(&mut self, table: TableDefinition) {
        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let mut column_map = HashMap::new();
        for (position, column) in table.columns.iter().enumerate() {
            // Column ids are 1-based; 0 is reserved
            column_map.insert(column.name.clone(), position + 1);
        }

        self.table_name_to_id.insert(table.name.clone(), table_id);
        self.table_id_to_name.insert(table_id, table.name.clone());
        self.column_mappings.insert(table_id, column_map);
        self.column_definitions.insert(table_id, table.columns.clone());
        self.table_indexes.insert(table_id, table.indexes.clone());
        self.table_definitions.insert(table_id, table);
    }

    fn build_global_column_index(&mut self) {
        self.global_column_index.clear();
        for (&table_id, column_map) in &self.column_mappings {
            for (column_name, &column_id) in column_map {
                self.global_column_index
                    .entry(column_name.clone())
                    .or_default()
                    .push((table_id, column_id));
            }
        }
        // Deterministic candidate order regardless of hash iteration
        for entries in self.global_column_index.values_mut() {
            entries.sort_unstable();
        }
    }

    // ------------------------------------------------------------------
    // Table resolution
    // ------------------------------------------------------------------

    /// Exact, case-sensitive table lookup.
    pub fn resolve_table(&self, name: &str) -> Option<TableId> {
        self.table_name_to_id.get(name).copied()
    }

    /// Panics on an unknown id: that is a programmer error, not a user error.
    pub fn get_table_definition(&self, table_id: TableId) -> &TableDefinition {
        self.table_definitions
            .get(&table_id)
            .unwrap_or_else(|| panic!("unknown table id {}", table_id))
    }

    pub fn get_table_name(&self, table_id: TableId) -> &str {
        self.table_id_to_name
            .get(&table_id)
            .map(|s| s.as_str())
            .unwrap_or_else(|| panic!("unknown table id {}", table_id))
    }

    pub fn get_all_table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.table_definitions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.table_name_to_id.contains_key(name)
    }

    // ------------------------------------------------------------------
    // Column resolution
    // ------------------------------------------------------------------

    /// Exact, case-sensitive column lookup within a table.
    pub fn resolve_column(&self, table_id: TableId, name: &str) -> Option<ColumnId> {
        self.column_mappings.get(&table_id)?.get(name).copied()
    }

    /// Panics on an unknown (table, column) id pair.
    pub fn get_column_definition(&self, table_id: TableId, column_id: ColumnId) -> &ColumnDefinition {
        let columns = self
            .column_definitions
            .get(&table_id)
            .unwrap_or_else(|| panic!("unknown table id {}", table_id));
        if column_id == 0 || column_id > columns.len() {
            panic!("unknown column id {} in table {}", column_id, table_id);
        }
        &columns[column_id - 1]
    }

    pub fn get_column_name(&self, table_id: TableId, column_id: ColumnId) -> &str {
        &self.get_column_definition(table_id, column_id).name
    }

    /// Column ids of a table in declaration order.
    pub fn get_table_column_ids(&self, table_id: TableId) -> Vec<ColumnId> {
        self.column_definitions
            .get(&table_id)
            .map(|columns| (1..=columns.len()).collect())
            .unwrap_or_default()
    }

    pub fn column_exists(&self, table_id: TableId, column_name: &str) -> bool {
        self.resolve_column(table_id, column_name).is_some()
    }

    /// Every table that exposes `column_name`. One entry = unambiguous;
    /// several = ambiguous reference; none = not found.
    pub fn resolve_unqualified_column(&self, column_name: &str) -> Vec<ColumnResolution> {
        let Some(entries) = self.global_column_index.get(column_name) else {
            return Vec::new();
        };
        entries
            .iter()
            .map(|&(table_id, column_id)| ColumnResolution {
                table_id,
                column_id,
                table_name: self.get_table_name(table_id).to_string(),
                column_name: column_name.to_string(),
            })
            .collect()
    }

    pub fn is_column_ambiguous(&self, column_name: &str) -> bool {
        self.global_column_index
            .get(column_name)
            .map(|entries| entries.len() > 1)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Indexes and constraints
    // ------------------------------------------------------------------

    pub fn get_table_indexes(&self, table_id: TableId) -> Vec<IndexDefinition> {
        self.table_indexes.get(&table_id).cloned().unwrap_or_default()
    }

    pub fn has_index_on_column(&self, table_id: TableId, column_id: ColumnId) -> bool {
        let column_name = self.get_column_name(table_id, column_id).to_string();
        self.get_table_indexes(table_id)
            .iter()
            .any(|index| index.columns.iter().any(|c| c == &column_name))
    }

    /// A foreign key is valid iff the types are compatible and the referenced
    /// column is a primary key or carries a unique constraint.
    pub fn validate_foreign_key(
        &self,
        table_id: TableId,
        column_id: ColumnId,
        ref_table_id: TableId,
        ref_column_id: ColumnId,
    ) -> bool {
        let column = match self.column_definitions.get(&table_id) {
            Some(columns) if column_id >= 1 && column_id <= columns.len() => &columns[column_id - 1],
            _ => return false,
        };
        let ref_column = match self.column_definitions.get(&ref_table_id) {
            Some(columns) if ref_column_id >= 1 && ref_column_id <= columns.len() => {
                &columns[ref_column_id - 1]
            }
            _ => return false,
        };

        if !self.are_types_compatible(column.column_type, ref_column.column_type) {
            return false;
        }
        ref_column.primary_key || ref_column.unique
    }

    // ------------------------------------------------------------------
    // Type compatibility
    // ------------------------------------------------------------------

    pub fn are_types_compatible(&self, left: ColumnType, right: ColumnType) -> bool {
        if left == right {
            return true;
        }
        (left.is_numeric() && right.is_numeric())
            || (left.is_string() && right.is_string())
            || (left.is_date() && right.is_date())
    }

    pub fn can_cast_implicitly(&self, from: ColumnType, to: ColumnType) -> bool {
        if from == to {
            return true;
        }
        matches!(
            (from, to),
            (ColumnType::Integer, ColumnType::BigInt)
                | (ColumnType::Varchar, ColumnType::Text)
                | (ColumnType::Date, ColumnType::Timestamp)
        )
    }

    /// Within a family, promote toward the widest member; across families the
    /// common type defaults to TEXT.
    pub fn get_common_type(&self, left: ColumnType, right: ColumnType) -> ColumnType {
        if left == right {
            return left;
        }

        if left.is_numeric() && right.is_numeric() {
            if left == ColumnType::Decimal || right == ColumnType::Decimal {
                return ColumnType::Decimal;
            }
            if left == ColumnType::BigInt || right == ColumnType::BigInt {
                return ColumnType::BigInt;
            }
            return ColumnType::Integer;
        }

        if left.is_string() && right.is_string() {
            return ColumnType::Text;
        }

        if left.is_date() && right.is_date() {
            return ColumnType::Timestamp;
        }

        ColumnType::Text
    }

    // ------------------------------------------------------------------
    // Suggestions
    // ------------------------------------------------------------------

    pub fn suggest_table_names(&self, input: &str) -> Vec<String> {
        let candidates: Vec<String> = self.table_name_to_id.keys().cloned().collect();
        rank_suggestions(input, candidates)
    }

    pub fn suggest_column_names(&self, input: &str, table_id: TableId) -> Vec<String> {
        let candidates: Vec<String> = self
            .column_mappings
            .get(&table_id)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        rank_suggestions(input, candidates)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn table_count(&self) -> usize {
        self.table_name_to_id.len()
    }

    pub fn total_column_count(&self) -> usize {
        self.column_definitions.values().map(|c| c.len()).sum()
    }
}

/// Rank arbitrary candidate names against an input, returning the closest
/// matches above the suggestion threshold. Used by the binder for
/// scope-restricted column suggestions.
pub fn suggest_from_candidates(input: &str, candidates: Vec<String>) -> Vec<String> {
    rank_suggestions(input, candidates)
}

/// Levenshtein-based similarity under case folding:
/// `1 - distance / max(|a|, |b|)`.
pub(crate) fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = a.chars().flat_map(|c| c.to_lowercase()).collect();
    let b: Vec<char> = b.chars().flat_map(|c| c.to_lowercase()).collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (prev[j + 1] + 1).min(current[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    let distance = prev[b.len()];
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

fn rank_suggestions(input: &str, candidates: Vec<String>) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .map(|candidate| {
            let similarity = string_similarity(input, &candidate);
            (candidate, similarity)
        })
        .collect();

    // Similarity first, name as a deterministic tie-break
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    scored
        .into_iter()
        .filter(|(_, similarity)| *similarity > SUGGESTION_THRESHOLD)
        .take(MAX_SUGGESTIONS)
        .map(|(name, _)| name)
        .collect()
}
