// Physical plan model and operator protocol.
//
// Execution is pull-based: the parent asks each child for the next
// `TupleBatch`; control flows downward, data upward. Operators are stateful
// structs behind the `PhysicalOperator` trait; every call to `next_batch`
// brackets itself with timing and accumulates `ExecutionStats`. The
// `ExecutionContext` is a read-only bag of limits shared by `Arc`.

pub mod operators;
pub mod planner;

pub use planner::{AccessMethod, AccessMethodKind, PhysicalPlanner, PhysicalPlannerConfig};

use crate::logical::PlanCost;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Default number of tuples per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Read-only execution limits handed to every operator at initialize time.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub work_mem_limit: usize,
    pub temp_file_threshold: usize,
    pub temp_dir: String,
    pub enable_parallel: bool,
    pub max_parallel_workers: usize,
    pub batch_size: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            work_mem_limit: 1024 * 1024,
            temp_file_threshold: 512 * 1024,
            temp_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            enable_parallel: true,
            max_parallel_workers: num_cpus::get(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// A positional row of string-encoded values plus an optional name map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tuple {
    pub values: Vec<String>,
    pub column_map: HashMap<String, String>,
}

impl Tuple {
    pub fn new(values: Vec<String>) -> Self {
        Self {
            values,
            column_map: HashMap::new(),
        }
    }

    pub fn value(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn value_by_name(&self, column: &str) -> &str {
        self.column_map.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn set_value(&mut self, index: usize, value: String) {
        if index >= self.values.len() {
            self.values.resize(index + 1, String::new());
        }
        self.values[index] = value;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.column_map.is_empty()
    }
}

/// The unit of inter-operator data transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleBatch {
    pub tuples: Vec<Tuple>,
    pub column_names: Vec<String>,
    pub batch_size: usize,
}

impl TupleBatch {
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            tuples: Vec::new(),
            column_names,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn add_tuple(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.batch_size
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
    }
}

/// Per-operator runtime statistics; merged into plan totals after execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub rows_processed: usize,
    pub rows_returned: usize,
    pub execution_time_ms: f64,
    pub memory_used_bytes: usize,
    pub disk_reads: usize,
    pub disk_writes: usize,
    pub used_temp_files: bool,
}

impl ExecutionStats {
    pub fn merge(&mut self, other: &ExecutionStats) {
        self.rows_processed += other.rows_processed;
        self.rows_returned += other.rows_returned;
        self.execution_time_ms += other.execution_time_ms;
        self.memory_used_bytes = self.memory_used_bytes.max(other.memory_used_bytes);
        self.disk_reads += other.disk_reads;
        self.disk_writes += other.disk_writes;
        self.used_temp_files = self.used_temp_files || other.used_temp_files;
    }
}

/// Milliseconds elapsed since `started`; used to bracket `next_batch`.
pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Pull-based batched operator protocol.
///
/// Lifecycle: `initialize` once (top-down), then `next_batch` until
/// `has_more_data` flips to false, optionally `reset` back to the
/// pre-initialize state (required for nested-loop inner rewinds), finally
/// `cleanup` to release buffers and worker threads.
pub trait PhysicalOperator: Send {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()>;

    /// Next batch, possibly empty. An empty batch once `has_more_data` is
    /// false terminates the stream.
    fn next_batch(&mut self) -> Result<TupleBatch>;

    /// May transition true -> false only.
    fn has_more_data(&self) -> bool;

    /// Return to the pre-initialize state; recursively resets children and
    /// clears local stats.
    fn reset(&mut self);

    /// Release memory (hash tables, sort buffers, worker threads).
    fn cleanup(&mut self);

    fn stats(&self) -> &ExecutionStats;

    fn estimated_cost(&self) -> &PlanCost;

    fn output_columns(&self) -> &[String];

    /// Merge this operator's stats (and its children's) into `total`.
    fn collect_stats(&self, total: &mut ExecutionStats);

    /// Append the display form of this subtree at the given indent.
    fn explain(&self, indent: usize, out: &mut String);

    /// Clone into a fresh, pre-initialize operator tree.
    fn clone_operator(&self) -> Box<dyn PhysicalOperator>;
}

/// A complete physical plan: operator tree plus shared context and totals.
pub struct PhysicalPlan {
    pub root: Box<dyn PhysicalOperator>,
    pub context: Arc<ExecutionContext>,
    pub total_stats: ExecutionStats,
}

impl PhysicalPlan {
    pub fn new(root: Box<dyn PhysicalOperator>, context: Arc<ExecutionContext>) -> Self {
        Self {
            root,
            context,
            total_stats: ExecutionStats::default(),
        }
    }

    pub fn initialize(&mut self) -> Result<()> {
        let context = Arc::clone(&self.context);
        self.root.initialize(&context)
    }

    /// Run to completion and materialize every tuple.
    pub fn execute(&mut self) -> Result<Vec<Tuple>> {
        self.initialize()?;

        let started = Instant::now();
        let mut results = Vec::new();
        while self.root.has_more_data() {
            let batch = self.root.next_batch()?;
            results.extend(batch.tuples);
        }

        self.total_stats = ExecutionStats::default();
        self.root.collect_stats(&mut self.total_stats);
        self.total_stats.execution_time_ms = elapsed_ms(started);
        self.total_stats.rows_returned = results.len();

        Ok(results)
    }

    /// Initialize and pull a single batch.
    pub fn execute_batch(&mut self) -> Result<TupleBatch> {
        self.initialize()?;
        self.root.next_batch()
    }

    pub fn reset(&mut self) {
        self.root.reset();
        self.total_stats = ExecutionStats::default();
    }

    pub fn cleanup(&mut self) {
        self.root.cleanup();
    }

    pub fn to_display(&self) -> String {
        let mut out = String::new();
        self.root.explain(0, &mut out);
        out
    }

    /// Post-execution report: plan shape plus accumulated totals.
    pub fn explain_analyze(&self) -> String {
        let mut out = String::new();
        self.root.explain(0, &mut out);
        out.push_str(&format!(
            "Execution time: {:.3} ms\nTotal rows: {}\nPeak memory: {} bytes\n",
            self.total_stats.execution_time_ms,
            self.total_stats.rows_returned,
            self.total_stats.memory_used_bytes,
        ));
        out
    }

    pub fn execution_stats(&self) -> &ExecutionStats {
        &self.total_stats
    }

    /// Independent copy in the pre-initialize state; executing the copy
    /// yields the same tuple multiset as executing the original.
    pub fn copy(&self) -> PhysicalPlan {
        PhysicalPlan {
            root: self.root.clone_operator(),
            context: Arc::clone(&self.context),
            total_stats: ExecutionStats::default(),
        }
    }
}
