// Hash join: build phase drains the right child into a multimap keyed on the
// first-column string; probe phase streams the left child and emits merged
// tuples per match. Left-outer joins pad unmatched probe tuples with nulls.

use super::{push_detail, push_head, render_conditions};
use crate::bound::{BoundExpression, JoinType};
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Estimated bytes per buffered build-side tuple.
const BUILD_TUPLE_BYTES: usize = 64;

pub struct HashJoinOperator {
    join_type: JoinType,
    conditions: Vec<BoundExpression>,
    probe: Box<dyn PhysicalOperator>,
    build: Box<dyn PhysicalOperator>,
    hash_table: HashMap<String, Vec<Tuple>>,
    build_done: bool,
    build_width: usize,
    probe_exhausted: bool,
    context: Option<Arc<ExecutionContext>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
}

impl HashJoinOperator {
    pub fn new(
        join_type: JoinType,
        conditions: Vec<BoundExpression>,
        probe: Box<dyn PhysicalOperator>,
        build: Box<dyn PhysicalOperator>,
    ) -> Self {
        let mut output_columns = probe.output_columns().to_vec();
        output_columns.extend(build.output_columns().iter().cloned());
        let build_width = build.output_columns().len();
        Self {
            join_type,
            conditions,
            probe,
            build,
            hash_table: HashMap::new(),
            build_done: false,
            build_width,
            probe_exhausted: false,
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

    pub fn with_output_columns(mut self, columns: Vec<String>) -> Self {
        self.output_columns = columns;
        self
    }

    /// Hash key of a tuple: the first column's string value.
    fn hash_key(tuple: &Tuple) -> String {
        tuple.value(0).to_string()
    }

    fn build_hash_table(&mut self) -> Result<()> {
        while self.build.has_more_data() {
            let batch = self.build.next_batch()?;
            for tuple in batch.tuples {
                if self.build_width == 0 {
                    self.build_width = tuple.len();
                }
                self.stats.rows_processed += 1;
                self.hash_table
                    .entry(Self::hash_key(&tuple))
                    .or_default()
                    .push(tuple);
            }
        }

        let entries: usize = self.hash_table.values().map(Vec::len).sum();
        self.stats.memory_used_bytes = entries * BUILD_TUPLE_BYTES;
        if let Some(context) = &self.context {
            if self.stats.memory_used_bytes > context.work_mem_limit {
                // Over budget: report the spill even though v1 stays in memory
                self.stats.used_temp_files = true;
                self.stats.disk_writes +=
                    self.stats.memory_used_bytes / context.temp_file_threshold.max(1) + 1;
                debug!(
                    bytes = self.stats.memory_used_bytes,
                    limit = context.work_mem_limit,
                    "hash join build exceeded work_mem"
                );
            }
        }

        self.build_done = true;
        Ok(())
    }

    fn merge(probe: &Tuple, build: &Tuple) -> Tuple {
        let mut merged = Tuple::new(Vec::with_capacity(probe.len() + build.len()));
        merged.values.extend(probe.values.iter().cloned());
        merged.values.extend(build.values.iter().cloned());
        for (key, value) in &probe.column_map {
            merged.column_map.insert(key.clone(), value.clone());
        }
        for (key, value) in &build.column_map {
            merged.column_map.insert(key.clone(), value.clone());
        }
        merged
    }

    fn null_padded(&self, probe: &Tuple) -> Tuple {
        let mut padded = Tuple::new(Vec::with_capacity(probe.len() + self.build_width));
        padded.values.extend(probe.values.iter().cloned());
        padded
            .values
            .extend(std::iter::repeat(String::new()).take(self.build_width));
        padded
    }
}

impl PhysicalOperator for HashJoinOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.context = Some(Arc::clone(context));
        self.hash_table.clear();
        self.build_done = false;
        self.probe_exhausted = false;
        self.probe.initialize(context)?;
        self.build.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        if !self.build_done {
            self.build_hash_table()?;
        }

        let mut result = TupleBatch::new(self.output_columns.clone());

        while result.len() < result.batch_size && self.probe.has_more_data() {
            let probe_batch = self.probe.next_batch()?;
            for tuple in probe_batch.tuples {
                self.stats.rows_processed += 1;
                match self.hash_table.get(&Self::hash_key(&tuple)) {
                    Some(matches) => {
                        for build_tuple in matches {
                            result.add_tuple(Self::merge(&tuple, build_tuple));
                            self.stats.rows_returned += 1;
                        }
                    }
                    None if self.join_type == JoinType::LeftOuter => {
                        result.add_tuple(self.null_padded(&tuple));
                        self.stats.rows_returned += 1;
                    }
                    None => {}
                }
            }
        }

        self.probe_exhausted = !self.probe.has_more_data();
        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(result)
    }

    fn has_more_data(&self) -> bool {
        !self.probe_exhausted
    }

    fn reset(&mut self) {
        self.hash_table.clear();
        self.build_done = false;
        self.probe_exhausted = false;
        self.stats = ExecutionStats::default();
        self.probe.reset();
        self.build.reset();
    }

    fn cleanup(&mut self) {
        self.hash_table.clear();
        self.hash_table.shrink_to_fit();
        self.probe.cleanup();
        self.build.cleanup();
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
        self.probe.collect_stats(total);
        self.build.collect_stats(total);
    }

    fn explain(&self, indent: usize, out: &mut String) {
        push_head(out, indent, &format!("Hash {}", self.join_type), &self.cost);
        if !self.conditions.is_empty() {
            push_detail(
                out,
                indent,
                &format!("Hash Cond: {}", render_conditions(&self.conditions)),
            );
        }
        self.probe.explain(indent + 1, out);
        self.build.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            join_type: self.join_type,
            conditions: self.conditions.clone(),
            probe: self.probe.clone_operator(),
            build: self.build.clone_operator(),
            hash_table: HashMap::new(),
            build_done: false,
            build_width: self.build_width,
            probe_exhausted: false,
            context: None,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::operators::SequentialScanOperator;

    fn scan(values: &[&str], column: &str) -> Box<dyn PhysicalOperator> {
        let rows: Vec<Tuple> = values
            .iter()
            .map(|v| Tuple::new(vec![v.to_string()]))
            .collect();
        Box::new(
            SequentialScanOperator::new("t", "t")
                .with_output_columns(vec![column.to_string()])
                .with_rows(rows),
        )
    }

    fn run(mut join: HashJoinOperator) -> Vec<Tuple> {
        let context = Arc::new(ExecutionContext::default());
        join.initialize(&context).unwrap();
        let mut all = Vec::new();
        while join.has_more_data() {
            all.extend(join.next_batch().unwrap().tuples);
        }
        all
    }

    #[test]
    fn test_inner_hash_join() {
        let join = HashJoinOperator::new(
            JoinType::Inner,
            vec![],
            scan(&["1", "2", "3", "4"], "a"),
            scan(&["2", "4", "6"], "b"),
        );
        let rows = run(join);
        let keys: Vec<&str> = rows.iter().map(|t| t.value(0)).collect();
        assert_eq!(keys, vec!["2", "4"]);
    }

    #[test]
    fn test_duplicate_build_keys_multiply() {
        let join = HashJoinOperator::new(
            JoinType::Inner,
            vec![],
            scan(&["1"], "a"),
            scan(&["1", "1", "1"], "b"),
        );
        let rows = run(join);
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_left_outer_pads_with_nulls() {
        let join = HashJoinOperator::new(
            JoinType::LeftOuter,
            vec![],
            scan(&["1", "2"], "a"),
            scan(&["2"], "b"),
        );
        let rows = run(join);
        assert_eq!(rows.len(), 2);

        let unmatched = rows.iter().find(|t| t.value(0) == "1").unwrap();
        assert_eq!(unmatched.len(), 2);
        assert_eq!(unmatched.value(1), "");
    }

    #[test]
    fn test_copy_executes_identically() {
        let join = HashJoinOperator::new(
            JoinType::Inner,
            vec![],
            scan(&["1", "2", "3"], "a"),
            scan(&["2", "3"], "b"),
        );
        let copy = join.clone_operator();

        let rows = run(join);

        let mut copied = copy;
        let context = Arc::new(ExecutionContext::default());
        copied.initialize(&context).unwrap();
        let mut copy_rows = Vec::new();
        while copied.has_more_data() {
            copy_rows.extend(copied.next_batch().unwrap().tuples);
        }

        assert_eq!(rows, copy_rows);
    }
}
