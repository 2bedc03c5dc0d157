// Nested loop join: consumes outer batches, rewinding the inner child for
// each outer tuple. Cursor state survives across `next_batch` calls; the
// full inner side is never buffered.
//
// Join predicate evaluation follows the simplified v1 contract: with
// conditions present, equi-join on the first column of each side by string
// equality; an empty condition list is a cross product.

use super::{push_detail, push_head, render_conditions};
use crate::bound::{BoundExpression, JoinType};
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;

pub struct NestedLoopJoinOperator {
    join_type: JoinType,
    conditions: Vec<BoundExpression>,
    outer: Box<dyn PhysicalOperator>,
    inner: Box<dyn PhysicalOperator>,
    outer_batch: TupleBatch,
    inner_batch: TupleBatch,
    outer_index: usize,
    inner_index: usize,
    outer_exhausted: bool,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
}

impl NestedLoopJoinOperator {
    pub fn new(
        join_type: JoinType,
        conditions: Vec<BoundExpression>,
        outer: Box<dyn PhysicalOperator>,
        inner: Box<dyn PhysicalOperator>,
    ) -> Self {
        let mut output_columns = outer.output_columns().to_vec();
        output_columns.extend(inner.output_columns().iter().cloned());
        Self {
            join_type,
            conditions,
            outer,
            inner,
            outer_batch: TupleBatch::default(),
            inner_batch: TupleBatch::default(),
            outer_index: 0,
            inner_index: 0,
            outer_exhausted: false,
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

    fn join_matches(&self, outer: &Tuple, inner: &Tuple) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        if outer.values.is_empty() || inner.values.is_empty() {
            return false;
        }
        outer.value(0) == inner.value(0)
    }

    fn merge(outer: &Tuple, inner: &Tuple) -> Tuple {
        let mut merged = Tuple::new(Vec::with_capacity(outer.len() + inner.len()));
        merged.values.extend(outer.values.iter().cloned());
        merged.values.extend(inner.values.iter().cloned());
        for (key, value) in &outer.column_map {
            merged.column_map.insert(key.clone(), value.clone());
        }
        for (key, value) in &inner.column_map {
            merged.column_map.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl PhysicalOperator for NestedLoopJoinOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.outer_batch = TupleBatch::default();
        self.inner_batch = TupleBatch::default();
        self.outer_index = 0;
        self.inner_index = 0;
        self.outer_exhausted = false;
        self.outer.initialize(context)?;
        self.inner.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();
        let mut result = TupleBatch::new(self.output_columns.clone());

        while result.len() < result.batch_size {
            // Refill the outer cursor, skipping transient empty batches
            if self.outer_batch.is_empty() || self.outer_index >= self.outer_batch.len() {
                if self.outer_exhausted {
                    break;
                }
                self.outer_batch = TupleBatch::default();
                self.outer_index = 0;
                while self.outer.has_more_data() {
                    let batch = self.outer.next_batch()?;
                    if !batch.is_empty() {
                        self.outer_batch = batch;
                        break;
                    }
                }
                if self.outer_batch.is_empty() {
                    self.outer_exhausted = true;
                    break;
                }
            }

            // Refill the inner cursor; rewind when the inner side runs dry
            if self.inner_batch.is_empty() || self.inner_index >= self.inner_batch.len() {
                self.inner_batch = TupleBatch::default();
                self.inner_index = 0;
                while self.inner.has_more_data() {
                    let batch = self.inner.next_batch()?;
                    if !batch.is_empty() {
                        self.inner_batch = batch;
                        break;
                    }
                }
                if self.inner_batch.is_empty() {
                    self.inner.reset();
                    self.outer_index += 1;
                    continue;
                }
            }

            let outer_tuple = self.outer_batch.tuples[self.outer_index].clone();
            while self.inner_index < self.inner_batch.len() && result.len() < result.batch_size {
                let inner_tuple = &self.inner_batch.tuples[self.inner_index];
                self.stats.rows_processed += 1;

                if self.join_matches(&outer_tuple, inner_tuple) {
                    result.add_tuple(Self::merge(&outer_tuple, inner_tuple));
                    self.stats.rows_returned += 1;
                }
                self.inner_index += 1;
            }

            if self.inner_index >= self.inner_batch.len() {
                self.inner_batch.clear();
                self.inner_index = 0;
            }
        }

        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(result)
    }

    fn has_more_data(&self) -> bool {
        !self.outer_exhausted
    }

    fn reset(&mut self) {
        self.outer_batch = TupleBatch::default();
        self.inner_batch = TupleBatch::default();
        self.outer_index = 0;
        self.inner_index = 0;
        self.outer_exhausted = false;
        self.stats = ExecutionStats::default();
        self.outer.reset();
        self.inner.reset();
    }

    fn cleanup(&mut self) {
        self.outer.cleanup();
        self.inner.cleanup();
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
        self.outer.collect_stats(total);
        self.inner.collect_stats(total);
    }

    fn explain(&self, indent: usize, out: &mut String) {
        push_head(
            out,
            indent,
            &format!("Nested Loop {}", self.join_type),
            &self.cost,
        );
        if !self.conditions.is_empty() {
            push_detail(
                out,
                indent,
                &format!("Join Filter: {}", render_conditions(&self.conditions)),
            );
        }
        self.outer.explain(indent + 1, out);
        self.inner.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            join_type: self.join_type,
            conditions: self.conditions.clone(),
            outer: self.outer.clone_operator(),
            inner: self.inner.clone_operator(),
            outer_batch: TupleBatch::default(),
            inner_batch: TupleBatch::default(),
            outer_index: 0,
            inner_index: 0,
            outer_exhausted: false,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
        })
    }
}
