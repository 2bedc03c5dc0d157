// Sequential scan: emits a row set batch-by-batch, evaluating attached
// filter predicates inline. Rows come from an injected source or the mock
// generator.

use super::{passes_filters, push_detail, push_head, render_conditions, MockDataGenerator};
use crate::bound::BoundExpression;
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

/// Bytes assumed per tuple when sizing batches from `work_mem_limit`.
const TUPLE_SIZE_ESTIMATE: usize = 1000;

pub struct SequentialScanOperator {
    table_name: String,
    alias: String,
    filters: Vec<BoundExpression>,
    rows: Vec<Tuple>,
    position: usize,
    context: Option<Arc<ExecutionContext>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
    exhausted: bool,
}

impl SequentialScanOperator {
    pub fn new(table_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            alias: alias.into(),
            filters: Vec::new(),
            rows: Vec::new(),
            position: 0,
            context: None,
            stats: ExecutionStats::default(),
            cost: PlanCost::default(),
            output_columns: Vec::new(),
            exhausted: false,
        }
    }

    pub fn with_filters(mut self, filters: Vec<BoundExpression>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_cost(mut self, cost: PlanCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_output_columns(mut self, columns: Vec<String>) -> Self {
        self.output_columns = columns;
        self
    }

    /// Inject a concrete row set (tests, or a storage adapter).
    pub fn with_rows(mut self, rows: Vec<Tuple>) -> Self {
        self.rows = rows;
        self
    }

    fn batch_capacity(&self) -> usize {
        self.context
            .as_ref()
            .map(|ctx| (ctx.work_mem_limit / TUPLE_SIZE_ESTIMATE).max(1))
            .unwrap_or(crate::physical::DEFAULT_BATCH_SIZE)
    }
}

impl PhysicalOperator for SequentialScanOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.context = Some(Arc::clone(context));
        self.position = 0;
        self.exhausted = false;

        if self.rows.is_empty() {
            let num_rows = if self.cost.estimated_rows > 0 {
                self.cost.estimated_rows
            } else {
                1000
            };
            self.rows = MockDataGenerator::generate_table_data(
                &self.table_name,
                num_rows,
                &self.output_columns,
            );
        }
        Ok(())
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        let mut batch = TupleBatch::new(self.output_columns.clone());
        let capacity = self.batch_capacity();
        let end = (self.position + capacity).min(self.rows.len());

        for index in self.position..end {
            let tuple = &self.rows[index];
            self.stats.rows_processed += 1;
            if passes_filters(&self.filters, tuple, &self.output_columns) {
                batch.add_tuple(tuple.clone());
                self.stats.rows_returned += 1;
            }
        }

        self.position = end;
        self.exhausted = self.position >= self.rows.len();

        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.exhausted
    }

    fn reset(&mut self) {
        self.position = 0;
        self.exhausted = false;
        self.stats = ExecutionStats::default();
    }

    fn cleanup(&mut self) {
        self.rows.clear();
        self.rows.shrink_to_fit();
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
    }

    fn explain(&self, indent: usize, out: &mut String) {
        let name = if self.alias.is_empty() || self.alias == self.table_name {
            format!("Seq Scan on {}", self.table_name)
        } else {
            format!("Seq Scan on {} {}", self.table_name, self.alias)
        };
        push_head(out, indent, &name, &self.cost);
        if !self.filters.is_empty() {
            push_detail(
                out,
                indent,
                &format!("Filter: {}", render_conditions(&self.filters)),
            );
        }
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            table_name: self.table_name.clone(),
            alias: self.alias.clone(),
            filters: self.filters.clone(),
            rows: self.rows.clone(),
            position: 0,
            context: None,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
            exhausted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_scan(mut scan: SequentialScanOperator) -> Vec<Tuple> {
        let context = Arc::new(ExecutionContext::default());
        scan.initialize(&context).unwrap();
        let mut all = Vec::new();
        while scan.has_more_data() {
            all.extend(scan.next_batch().unwrap().tuples);
        }
        all
    }

    #[test]
    fn test_scan_emits_all_rows() {
        let rows: Vec<Tuple> = (0..2500)
            .map(|i| Tuple::new(vec![(i + 1).to_string()]))
            .collect();
        let scan = SequentialScanOperator::new("users", "users")
            .with_output_columns(vec!["id".to_string()])
            .with_rows(rows);

        let all = run_scan(scan);
        assert_eq!(all.len(), 2500);
        assert_eq!(all[0].value(0), "1");
        assert_eq!(all[2499].value(0), "2500");
    }

    #[test]
    fn test_scan_generates_mock_rows_when_empty() {
        let mut cost = PlanCost::default();
        cost.estimated_rows = 42;
        let scan = SequentialScanOperator::new("users", "users")
            .with_output_columns(vec!["id".to_string(), "name".to_string()])
            .with_cost(cost);

        let all = run_scan(scan);
        assert_eq!(all.len(), 42);
    }

    #[test]
    fn test_reset_rescans() {
        let rows: Vec<Tuple> = (0..10)
            .map(|i| Tuple::new(vec![(i + 1).to_string()]))
            .collect();
        let mut scan = SequentialScanOperator::new("users", "users")
            .with_output_columns(vec!["id".to_string()])
            .with_rows(rows);

        let context = Arc::new(ExecutionContext::default());
        scan.initialize(&context).unwrap();
        while scan.has_more_data() {
            scan.next_batch().unwrap();
        }
        assert!(!scan.has_more_data());

        scan.reset();
        assert!(scan.has_more_data());
        let batch = scan.next_batch().unwrap();
        assert_eq!(batch.len(), 10);
    }
}
