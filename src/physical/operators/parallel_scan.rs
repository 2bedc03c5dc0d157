// Parallel sequential scan: worker threads each scan a contiguous row range
// and push matching-tuple batches into a bounded channel; `next_batch` pops
// one batch and blocks while workers are still producing. Channel disconnect
// (all workers done) signals completion.

use super::{passes_filters, push_detail, push_head, render_conditions, MockDataGenerator};
use crate::bound::BoundExpression;
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use crossbeam::channel::{bounded, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::debug;

pub struct ParallelSequentialScanOperator {
    table_name: String,
    filters: Vec<BoundExpression>,
    parallel_degree: usize,
    rows: Arc<Vec<Tuple>>,
    receiver: Option<Receiver<TupleBatch>>,
    workers: Vec<JoinHandle<()>>,
    context: Option<Arc<ExecutionContext>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
    exhausted: bool,
}

impl ParallelSequentialScanOperator {
    pub fn new(table_name: impl Into<String>, parallel_degree: usize) -> Self {
        Self {
            table_name: table_name.into(),
            filters: Vec::new(),
            parallel_degree: parallel_degree.max(1),
            rows: Arc::new(Vec::new()),
            receiver: None,
            workers: Vec::new(),
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

    pub fn with_rows(mut self, rows: Vec<Tuple>) -> Self {
        self.rows = Arc::new(rows);
        self
    }

    pub fn parallel_degree(&self) -> usize {
        self.parallel_degree
    }

    fn spawn_workers(&mut self) {
        let batch_size = self
            .context
            .as_ref()
            .map(|ctx| ctx.batch_size.max(1))
            .unwrap_or(crate::physical::DEFAULT_BATCH_SIZE);

        let (sender, receiver) = bounded::<TupleBatch>(self.parallel_degree * 2);
        let total_rows = self.rows.len();
        let rows_per_worker = total_rows.div_ceil(self.parallel_degree).max(1);

        debug!(
            table = %self.table_name,
            workers = self.parallel_degree,
            rows = total_rows,
            "starting parallel scan"
        );

        for worker in 0..self.parallel_degree {
            let start = worker * rows_per_worker;
            let end = ((worker + 1) * rows_per_worker).min(total_rows);
            if start >= end {
                continue;
            }

            let rows = Arc::clone(&self.rows);
            let filters = self.filters.clone();
            let columns = self.output_columns.clone();
            let sender = sender.clone();

            self.workers.push(std::thread::spawn(move || {
                let mut batch = TupleBatch::new(columns.clone()).with_batch_size(batch_size);
                for tuple in &rows[start..end] {
                    if passes_filters(&filters, tuple, &columns) {
                        batch.add_tuple(tuple.clone());
                    }
                    if batch.is_full() {
                        let full = std::mem::replace(
                            &mut batch,
                            TupleBatch::new(columns.clone()).with_batch_size(batch_size),
                        );
                        // Consumer gone: stop producing
                        if sender.send(full).is_err() {
                            return;
                        }
                    }
                }
                if !batch.is_empty() {
                    let _ = sender.send(batch);
                }
            }));
        }

        // Drop the original sender so channel disconnect tracks the workers
        drop(sender);
        self.receiver = Some(receiver);
    }

    fn join_workers(&mut self) {
        self.receiver = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl PhysicalOperator for ParallelSequentialScanOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.context = Some(Arc::clone(context));
        self.exhausted = false;

        if self.rows.is_empty() {
            let num_rows = if self.cost.estimated_rows > 0 {
                self.cost.estimated_rows
            } else {
                10_000
            };
            self.rows = Arc::new(MockDataGenerator::generate_table_data(
                &self.table_name,
                num_rows,
                &self.output_columns,
            ));
        }

        self.spawn_workers();
        Ok(())
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        // Re-arm lazily after a reset
        if self.receiver.is_none() && !self.exhausted {
            self.spawn_workers();
        }

        let batch = match &self.receiver {
            // Blocks while the queue is empty and workers are still running
            Some(receiver) => match receiver.recv() {
                Ok(batch) => batch,
                Err(_) => {
                    self.exhausted = true;
                    self.join_workers();
                    TupleBatch::new(self.output_columns.clone())
                }
            },
            None => {
                self.exhausted = true;
                TupleBatch::new(self.output_columns.clone())
            }
        };

        self.stats.rows_processed += batch.len();
        self.stats.rows_returned += batch.len();
        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.exhausted
    }

    fn reset(&mut self) {
        self.join_workers();
        self.exhausted = false;
        self.stats = ExecutionStats::default();
    }

    fn cleanup(&mut self) {
        self.join_workers();
        self.rows = Arc::new(Vec::new());
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
        push_head(
            out,
            indent,
            &format!(
                "Parallel Seq Scan on {} (workers={})",
                self.table_name, self.parallel_degree
            ),
            &self.cost,
        );
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
            filters: self.filters.clone(),
            parallel_degree: self.parallel_degree,
            rows: Arc::clone(&self.rows),
            receiver: None,
            workers: Vec::new(),
            context: None,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
            exhausted: false,
        })
    }
}

impl Drop for ParallelSequentialScanOperator {
    fn drop(&mut self) {
        self.join_workers();
    }
}
