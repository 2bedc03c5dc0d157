// Query pipeline: the combined entry point tying binder, logical planner and
// physical planner together, plus the execution engine driving a physical
// plan to completion.

use crate::binder::{Binder, BindingError};
use crate::bound::BoundStatement;
use crate::logical::{LogicalPlan, LogicalPlanner, PlannerConfig, TableStatistics};
use crate::physical::{
    ExecutionContext, ExecutionStats, PhysicalPlan, PhysicalPlanner, PhysicalPlannerConfig,
    Tuple, TupleBatch,
};
use crate::schema::SchemaRegistry;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of `bind_and_plan`: either a bound statement with its optimized
/// logical plan, or the accumulated error messages.
#[derive(Debug)]
pub struct PlanningResult {
    pub success: bool,
    pub bound_statement: Option<BoundStatement>,
    pub logical_plan: Option<LogicalPlan>,
    pub errors: Vec<String>,
}

/// SQL text -> bound statement -> optimized logical plan -> physical plan.
///
/// The registry is shared read-only; per-query state lives in the binder and
/// is reset on every call.
pub struct QueryPipeline {
    registry: Arc<SchemaRegistry>,
    binder: Binder,
    logical_planner: LogicalPlanner,
    physical_planner: PhysicalPlanner,
}

impl QueryPipeline {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            binder: Binder::new(Arc::clone(&registry)),
            logical_planner: LogicalPlanner::new(),
            physical_planner: PhysicalPlanner::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn set_planner_config(&mut self, config: PlannerConfig) {
        self.logical_planner.set_config(config);
    }

    pub fn set_physical_config(&mut self, config: PhysicalPlannerConfig) {
        self.physical_planner.set_config(config);
    }

    /// Register statistics with both planners.
    pub fn set_table_stats(&mut self, table_name: &str, stats: TableStatistics) {
        self.logical_planner
            .set_table_stats(table_name.to_string(), stats.clone());
        self.physical_planner
            .set_table_stats(table_name.to_string(), stats);
    }

    pub fn physical_planner_mut(&mut self) -> &mut PhysicalPlanner {
        &mut self.physical_planner
    }

    /// Bind and plan in one step. Binding errors surface unchanged; no plan
    /// is produced when binding fails.
    pub fn bind_and_plan(&mut self, sql: &str) -> PlanningResult {
        info!(sql, "compiling query");

        let statement = match self.binder.bind(sql) {
            Ok(statement) => statement,
            Err(errors) => {
                debug!(count = errors.len(), "binding failed");
                return PlanningResult {
                    success: false,
                    bound_statement: None,
                    logical_plan: None,
                    errors: errors.iter().map(render_error).collect(),
                };
            }
        };

        let plan = match self.logical_planner.plan(&statement) {
            Ok(plan) => plan,
            Err(error) => {
                return PlanningResult {
                    success: false,
                    bound_statement: Some(statement),
                    logical_plan: None,
                    errors: vec![error.to_string()],
                };
            }
        };

        let optimized = self.logical_planner.optimize(&plan);

        PlanningResult {
            success: true,
            bound_statement: Some(statement),
            logical_plan: Some(optimized),
            errors: Vec::new(),
        }
    }

    /// Full compilation: SQL text to an executable physical plan.
    pub fn compile(&mut self, sql: &str) -> std::result::Result<PhysicalPlan, Vec<String>> {
        let result = self.bind_and_plan(sql);
        let Some(logical_plan) = result.logical_plan else {
            return Err(result.errors);
        };
        self.physical_planner
            .create_physical_plan(&logical_plan)
            .map_err(|error| vec![error.to_string()])
    }
}

fn render_error(error: &BindingError) -> String {
    error.to_string()
}

/// Drives physical plans to completion. `cancel` takes effect at the next
/// batch boundary: the engine stops pulling and the plan reports end of
/// stream to its caller.
pub struct ExecutionEngine {
    context: Arc<ExecutionContext>,
    stats: ExecutionStats,
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self {
            context,
            stats: ExecutionStats::default(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Run the plan to completion and materialize all tuples.
    pub fn execute_plan(&mut self, plan: &mut PhysicalPlan) -> Result<Vec<Tuple>> {
        self.cancelled.store(false, Ordering::SeqCst);
        plan.initialize()?;

        let started = std::time::Instant::now();
        let mut results = Vec::new();

        while plan.root.has_more_data() {
            if self.cancelled.load(Ordering::SeqCst) {
                debug!("execution cancelled at batch boundary");
                break;
            }
            let batch = plan.root.next_batch()?;
            results.extend(batch.tuples);
        }

        plan.total_stats = ExecutionStats::default();
        plan.root.collect_stats(&mut plan.total_stats);
        plan.total_stats.execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        plan.total_stats.rows_returned = results.len();
        self.stats = plan.total_stats.clone();

        Ok(results)
    }

    /// Pull a single batch.
    pub fn execute_batch(&mut self, plan: &mut PhysicalPlan) -> Result<TupleBatch> {
        plan.execute_batch()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn execution_stats(&self) -> &ExecutionStats {
        &self.stats
    }
}
