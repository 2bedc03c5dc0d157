// Sort: blocking operator. Drains the child into a buffer, performs a stable
// in-memory sort on the configured keys, then emits batches. Exceeding the
// memory budget flips the temp-file flag in the stats; the actual external
// merge is a later stage.

use super::{column_index, push_detail, push_head};
use crate::logical::{PlanCost, SortKey};
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Estimated bytes per buffered tuple for the memory budget.
const SORT_TUPLE_BYTES: usize = 100;

const SPILL_CHUNK_BYTES: usize = 64 * 1024;

pub struct SortOperator {
    keys: Vec<SortKey>,
    child: Box<dyn PhysicalOperator>,
    sorted: Vec<Tuple>,
    position: usize,
    sort_complete: bool,
    input_columns: Vec<String>,
    context: Option<Arc<ExecutionContext>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
}

impl SortOperator {
    pub fn new(keys: Vec<SortKey>, child: Box<dyn PhysicalOperator>) -> Self {
        let output_columns = child.output_columns().to_vec();
        Self {
            keys,
            child,
            sorted: Vec::new(),
            position: 0,
            sort_complete: false,
            input_columns: Vec::new(),
            context: None,
            stats: ExecutionStats::default(),
            cost: PlanCost::default(),
            output_columns,
        }
    }

    pub fn with_cost(mut self, cost: PlanCost) -> Self {
        self.cost = cost;
        self
    }

    fn perform_sort(&mut self) -> Result<()> {
        while self.child.has_more_data() {
            let batch = self.child.next_batch()?;
            if self.input_columns.is_empty() && !batch.column_names.is_empty() {
                self.input_columns = batch.column_names.clone();
            }
            for tuple in batch.tuples {
                self.stats.rows_processed += 1;
                self.sorted.push(tuple);
            }
        }

        let columns = if self.input_columns.is_empty() {
            self.output_columns.clone()
        } else {
            self.input_columns.clone()
        };
        let keys = self.keys.clone();

        // Stable sort preserves input order between equal keys
        self.sorted
            .sort_by(|a, b| compare_tuples(a, b, &keys, &columns));

        self.stats.memory_used_bytes = self.sorted.len() * SORT_TUPLE_BYTES;
        if let Some(context) = &self.context {
            if self.stats.memory_used_bytes > context.work_mem_limit {
                self.stats.used_temp_files = true;
                self.stats.disk_writes +=
                    self.stats.memory_used_bytes / SPILL_CHUNK_BYTES + 1;
                debug!(
                    bytes = self.stats.memory_used_bytes,
                    limit = context.work_mem_limit,
                    "sort buffer exceeded work_mem"
                );
            }
        }

        self.sort_complete = true;
        Ok(())
    }
}

impl PhysicalOperator for SortOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.context = Some(Arc::clone(context));
        self.sorted.clear();
        self.position = 0;
        self.sort_complete = false;
        self.input_columns.clear();
        self.child.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        if !self.sort_complete {
            self.perform_sort()?;
        }

        let capacity = self
            .context
            .as_ref()
            .map(|ctx| ctx.batch_size.max(1))
            .unwrap_or(crate::physical::DEFAULT_BATCH_SIZE);

        let mut batch = TupleBatch::new(self.output_columns.clone());
        let end = (self.position + capacity).min(self.sorted.len());
        for index in self.position..end {
            batch.add_tuple(self.sorted[index].clone());
            self.stats.rows_returned += 1;
        }
        self.position = end;

        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.sort_complete || self.position < self.sorted.len()
    }

    fn reset(&mut self) {
        self.sorted.clear();
        self.position = 0;
        self.sort_complete = false;
        self.input_columns.clear();
        self.stats = ExecutionStats::default();
        self.child.reset();
    }

    fn cleanup(&mut self) {
        self.sorted.clear();
        self.sorted.shrink_to_fit();
        self.child.cleanup();
    }

    fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    fn estimated_cost(&self) -> &PlanCost {
        &self.cost
    }

    fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    fn collect_stats(&self, total: &mut ExecutionStats) {
        total.merge(&self.stats);
        self.child.collect_stats(total);
    }

    fn explain(&self, indent: usize, out: &mut String) {
        push_head(out, indent, "Sort", &self.cost);
        if !self.keys.is_empty() {
            let rendered: Vec<String> = self
                .keys
                .iter()
                .map(|key| {
                    let mut text = key.expr.text.clone();
                    if !key.ascending {
                        text.push_str(" DESC");
                    }
                    text
                })
                .collect();
            push_detail(out, indent, &format!("Sort Key: {}", rendered.join(", ")));
        }
        self.child.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            keys: self.keys.clone(),
            child: self.child.clone_operator(),
            sorted: Vec::new(),
            position: 0,
            sort_complete: false,
            input_columns: Vec::new(),
            context: None,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
        })
    }
}

fn compare_tuples(a: &Tuple, b: &Tuple, keys: &[SortKey], columns: &[String]) -> Ordering {
    for key in keys {
        let index = column_index(&key.expr.text, columns);
        let value_a = a.value(index);
        let value_b = b.value(index);

        let ordering = match (value_a.is_empty(), value_b.is_empty()) {
            // Empty string stands in for NULL
            (true, true) => Ordering::Equal,
            (true, false) => {
                if key.nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if key.nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => {
                let base = compare_values(value_a, value_b);
                if key.ascending {
                    base
                } else {
                    base.reverse()
                }
            }
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Numeric comparison when both values parse; string comparison otherwise.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(left), Ok(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{BoundExpression, BoundExpressionKind};
    use crate::physical::operators::SequentialScanOperator;
    use crate::schema::ColumnType;

    fn key(text: &str, ascending: bool) -> SortKey {
        SortKey {
            expr: BoundExpression {
                kind: BoundExpressionKind::ColumnRef {
                    table_id: 1,
                    column_id: 1,
                },
                result_type: ColumnType::Integer,
                nullable: false,
                text: text.to_string(),
            },
            ascending,
            nulls_first: !ascending,
        }
    }

    fn scan(rows: Vec<Vec<&str>>, columns: Vec<&str>) -> Box<dyn PhysicalOperator> {
        let tuples: Vec<Tuple> = rows
            .into_iter()
            .map(|row| Tuple::new(row.into_iter().map(str::to_string).collect()))
            .collect();
        Box::new(
            SequentialScanOperator::new("t", "t")
                .with_output_columns(columns.into_iter().map(str::to_string).collect())
                .with_rows(tuples),
        )
    }

    fn run(mut sort: SortOperator) -> Vec<Tuple> {
        let context = Arc::new(ExecutionContext::default());
        sort.initialize(&context).unwrap();
        let mut all = Vec::new();
        while sort.has_more_data() {
            all.extend(sort.next_batch().unwrap().tuples);
        }
        all
    }

    #[test]
    fn test_numeric_ascending_sort() {
        let sort = SortOperator::new(
            vec![key("id", true)],
            scan(vec![vec!["10"], vec!["2"], vec!["33"], vec!["1"]], vec!["id"]),
        );
        let rows = run(sort);
        let ids: Vec<&str> = rows.iter().map(|t| t.value(0)).collect();
        assert_eq!(ids, vec!["1", "2", "10", "33"]);
    }

    #[test]
    fn test_descending_string_sort() {
        let sort = SortOperator::new(
            vec![key("name", false)],
            scan(
                vec![vec!["alice"], vec!["carol"], vec!["bob"]],
                vec!["name"],
            ),
        );
        let rows = run(sort);
        let names: Vec<&str> = rows.iter().map(|t| t.value(0)).collect();
        assert_eq!(names, vec!["carol", "bob", "alice"]);
    }

    #[test]
    fn test_nulls_placement() {
        let sort = SortOperator::new(
            vec![key("v", true)],
            scan(vec![vec!["3"], vec![""], vec!["1"]], vec!["v"]),
        );
        let rows = run(sort);
        let values: Vec<&str> = rows.iter().map(|t| t.value(0)).collect();
        // Ascending defaults to NULLS LAST
        assert_eq!(values, vec!["1", "3", ""]);
    }

    #[test]
    fn test_spill_flag_when_over_budget() {
        let rows: Vec<Vec<String>> = (0..100)
            .map(|i| vec![i.to_string()])
            .collect();
        let tuples: Vec<Tuple> = rows.into_iter().map(Tuple::new).collect();
        let child = Box::new(
            SequentialScanOperator::new("t", "t")
                .with_output_columns(vec!["id".to_string()])
                .with_rows(tuples),
        );

        let mut sort = SortOperator::new(vec![key("id", true)], child);
        let context = Arc::new(ExecutionContext {
            work_mem_limit: 1000,
            ..Default::default()
        });
        sort.initialize(&context).unwrap();
        while sort.has_more_data() {
            sort.next_batch().unwrap();
        }

        assert!(sort.stats().used_temp_files);
        assert!(sort.stats().disk_writes > 0);
    }
}
