// Streaming filter: applies predicates to a non-scan child (selections over
// joins or aggregates, where pushdown into a scan is not possible).

use super::{passes_filters, push_detail, push_head, render_conditions};
use crate::bound::BoundExpression;
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, TupleBatch,
};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

pub struct FilterOperator {
    conditions: Vec<BoundExpression>,
    child: Box<dyn PhysicalOperator>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
    exhausted: bool,
}

impl FilterOperator {
    pub fn new(conditions: Vec<BoundExpression>, child: Box<dyn PhysicalOperator>) -> Self {
        let output_columns = child.output_columns().to_vec();
        Self {
            conditions,
            child,
            stats: ExecutionStats::default(),
            cost: PlanCost::default(),
            output_columns,
            exhausted: false,
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
}

impl PhysicalOperator for FilterOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.exhausted = false;
        self.child.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        let input = self.child.next_batch()?;
        let columns = if input.column_names.is_empty() {
            self.output_columns.clone()
        } else {
            input.column_names.clone()
        };

        let mut batch = TupleBatch::new(columns.clone());
        for tuple in input.tuples {
            self.stats.rows_processed += 1;
            if passes_filters(&self.conditions, &tuple, &columns) {
                batch.add_tuple(tuple);
                self.stats.rows_returned += 1;
            }
        }

        self.exhausted = !self.child.has_more_data();
        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.exhausted
    }

    fn reset(&mut self) {
        self.exhausted = false;
        self.stats = ExecutionStats::default();
        self.child.reset();
    }

    fn cleanup(&mut self) {
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
        push_head(out, indent, "Filter", &self.cost);
        if !self.conditions.is_empty() {
            push_detail(
                out,
                indent,
                &format!("Filter: {}", render_conditions(&self.conditions)),
            );
        }
        self.child.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            conditions: self.conditions.clone(),
            child: self.child.clone_operator(),
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
            exhausted: false,
        })
    }
}
