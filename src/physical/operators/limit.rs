// Limit: streams tuples through, skipping `offset` rows and emitting at most
// `limit`. Signals end-of-stream as soon as the quota is met regardless of
// child state.

use super::{push_detail, push_head};
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, TupleBatch,
};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

pub struct LimitOperator {
    limit: Option<u64>,
    offset: Option<u64>,
    child: Box<dyn PhysicalOperator>,
    rows_emitted: u64,
    rows_skipped: u64,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
    exhausted: bool,
}

impl LimitOperator {
    pub fn new(
        limit: Option<u64>,
        offset: Option<u64>,
        child: Box<dyn PhysicalOperator>,
    ) -> Self {
        let output_columns = child.output_columns().to_vec();
        Self {
            limit,
            offset,
            child,
            rows_emitted: 0,
            rows_skipped: 0,
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

    fn quota_met(&self) -> bool {
        matches!(self.limit, Some(limit) if self.rows_emitted >= limit)
    }
}

impl PhysicalOperator for LimitOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.rows_emitted = 0;
        self.rows_skipped = 0;
        self.exhausted = self.limit == Some(0);
        self.child.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        let mut batch = TupleBatch::new(self.output_columns.clone());
        if self.exhausted || self.quota_met() {
            self.exhausted = true;
            self.stats.execution_time_ms += elapsed_ms(started);
            return Ok(batch);
        }

        let skip = self.offset.unwrap_or(0);

        'outer: while self.child.has_more_data() && !batch.is_full() {
            let child_batch = self.child.next_batch()?;
            if batch.column_names.is_empty() && !child_batch.column_names.is_empty() {
                batch.column_names = child_batch.column_names.clone();
            }

            for tuple in child_batch.tuples {
                self.stats.rows_processed += 1;

                if self.rows_skipped < skip {
                    self.rows_skipped += 1;
                    continue;
                }
                if self.quota_met() {
                    break 'outer;
                }

                batch.add_tuple(tuple);
                self.rows_emitted += 1;
                self.stats.rows_returned += 1;
            }
        }

        self.exhausted = self.quota_met() || !self.child.has_more_data();
        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.exhausted
    }

    fn reset(&mut self) {
        self.rows_emitted = 0;
        self.rows_skipped = 0;
        self.exhausted = self.limit == Some(0);
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
        push_head(out, indent, "Limit", &self.cost);
        let mut line = String::new();
        if let Some(offset) = self.offset {
            if offset > 0 {
                line.push_str(&format!("Offset: {} ", offset));
            }
        }
        match self.limit {
            Some(limit) => line.push_str(&format!("Limit: {}", limit)),
            None => line.push_str("Limit: ALL"),
        }
        push_detail(out, indent, &line);
        self.child.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            limit: self.limit,
            offset: self.offset,
            child: self.child.clone_operator(),
            rows_emitted: 0,
            rows_skipped: 0,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
            exhausted: false,
        })
    }
}
