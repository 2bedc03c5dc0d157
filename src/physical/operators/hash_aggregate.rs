// Hash aggregate: blocking operator. Consumes all input, partitions tuples
// by a composite group-key string, maintains per-group accumulators for each
// aggregate, then emits one result tuple per group (input encounter order).

use super::{column_index, push_detail, push_head};
use crate::bound::{BoundExpression, BoundExpressionKind};
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, Tuple, TupleBatch,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Estimated bytes per group for the memory budget.
const GROUP_BYTES: usize = 50;

const GROUP_KEY_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: Option<String>,
    max: Option<String>,
}

impl Accumulator {
    fn update(&mut self, value: &str) {
        self.count += 1;
        if let Ok(number) = value.parse::<f64>() {
            self.sum += number;
        }
        match &self.min {
            Some(current) if compare(value, current).is_ge() => {}
            _ => self.min = Some(value.to_string()),
        }
        match &self.max {
            Some(current) if compare(value, current).is_le() => {}
            _ => self.max = Some(value.to_string()),
        }
    }

    fn finish(&self, function: &str) -> String {
        match function {
            "count" => self.count.to_string(),
            "sum" => format_number(self.sum),
            "avg" => {
                if self.count == 0 {
                    String::new()
                } else {
                    format_number(self.sum / self.count as f64)
                }
            }
            "min" => self.min.clone().unwrap_or_default(),
            "max" => self.max.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(left), Ok(right)) => left.partial_cmp(&right).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

/// An aggregate call extracted from the select list: function name plus the
/// argument column (None for `count(*)`).
#[derive(Debug, Clone)]
struct AggregateSpec {
    function: String,
    argument: Option<String>,
    display: String,
}

fn aggregate_spec(expr: &BoundExpression) -> AggregateSpec {
    match &expr.kind {
        BoundExpressionKind::FunctionCall { name, args } => AggregateSpec {
            function: name.clone(),
            argument: args.first().map(|arg| arg.text.clone()),
            display: expr.text.clone(),
        },
        _ => AggregateSpec {
            function: "count".to_string(),
            argument: None,
            display: expr.text.clone(),
        },
    }
}

struct Group {
    key_values: Vec<String>,
    accumulators: Vec<Accumulator>,
}

pub struct HashAggregateOperator {
    group_by: Vec<BoundExpression>,
    aggregates: Vec<AggregateSpec>,
    child: Box<dyn PhysicalOperator>,
    groups: HashMap<String, Group>,
    group_order: Vec<String>,
    position: usize,
    aggregation_complete: bool,
    context: Option<Arc<ExecutionContext>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
}

impl HashAggregateOperator {
    pub fn new(
        group_by: Vec<BoundExpression>,
        aggregates: Vec<BoundExpression>,
        child: Box<dyn PhysicalOperator>,
    ) -> Self {
        let aggregates: Vec<AggregateSpec> = aggregates.iter().map(aggregate_spec).collect();
        let mut output_columns: Vec<String> =
            group_by.iter().map(|expr| expr.text.clone()).collect();
        output_columns.extend(aggregates.iter().map(|spec| spec.display.clone()));

        Self {
            group_by,
            aggregates,
            child,
            groups: HashMap::new(),
            group_order: Vec::new(),
            position: 0,
            aggregation_complete: false,
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

    fn perform_aggregation(&mut self) -> Result<()> {
        let mut input_columns: Vec<String> = Vec::new();

        while self.child.has_more_data() {
            let batch = self.child.next_batch()?;
            if input_columns.is_empty() && !batch.column_names.is_empty() {
                input_columns = batch.column_names.clone();
            }

            for tuple in batch.tuples {
                self.stats.rows_processed += 1;

                let key_values: Vec<String> = self
                    .group_by
                    .iter()
                    .map(|expr| {
                        tuple
                            .value(column_index(&expr.text, &input_columns))
                            .to_string()
                    })
                    .collect();
                let key = key_values.join(&GROUP_KEY_SEPARATOR.to_string());

                if !self.groups.contains_key(&key) {
                    self.group_order.push(key.clone());
                    self.groups.insert(
                        key.clone(),
                        Group {
                            key_values: key_values.clone(),
                            accumulators: vec![Accumulator::default(); self.aggregates.len()],
                        },
                    );
                }

                let group = self.groups.get_mut(&key).expect("group just inserted");
                for (index, spec) in self.aggregates.iter().enumerate() {
                    let value = match &spec.argument {
                        Some(argument) => {
                            tuple.value(column_index(argument, &input_columns)).to_string()
                        }
                        // count(*) counts rows; value content is irrelevant
                        None => "1".to_string(),
                    };
                    group.accumulators[index].update(&value);
                }
            }
        }

        self.stats.memory_used_bytes = self.groups.len() * GROUP_BYTES;
        if let Some(context) = &self.context {
            if self.stats.memory_used_bytes > context.work_mem_limit {
                self.stats.used_temp_files = true;
                debug!(
                    groups = self.groups.len(),
                    limit = context.work_mem_limit,
                    "hash aggregate exceeded work_mem"
                );
            }
        }

        self.aggregation_complete = true;
        Ok(())
    }
}

impl PhysicalOperator for HashAggregateOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.context = Some(Arc::clone(context));
        self.groups.clear();
        self.group_order.clear();
        self.position = 0;
        self.aggregation_complete = false;
        self.child.initialize(context)
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();

        if !self.aggregation_complete {
            self.perform_aggregation()?;
        }

        let capacity = self
            .context
            .as_ref()
            .map(|ctx| ctx.batch_size.max(1))
            .unwrap_or(crate::physical::DEFAULT_BATCH_SIZE);

        let mut batch = TupleBatch::new(self.output_columns.clone());
        let end = (self.position + capacity).min(self.group_order.len());

        for index in self.position..end {
            let key = &self.group_order[index];
            let group = &self.groups[key];

            let mut values = group.key_values.clone();
            for (agg_index, spec) in self.aggregates.iter().enumerate() {
                values.push(group.accumulators[agg_index].finish(&spec.function));
            }

            batch.add_tuple(Tuple::new(values));
            self.stats.rows_returned += 1;
        }
        self.position = end;

        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        !self.aggregation_complete || self.position < self.group_order.len()
    }

    fn reset(&mut self) {
        self.groups.clear();
        self.group_order.clear();
        self.position = 0;
        self.aggregation_complete = false;
        self.stats = ExecutionStats::default();
        self.child.reset();
    }

    fn cleanup(&mut self) {
        self.groups.clear();
        self.groups.shrink_to_fit();
        self.group_order.clear();
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
        push_head(out, indent, "HashAggregate", &self.cost);
        if !self.group_by.is_empty() {
            let keys: Vec<String> = self.group_by.iter().map(|e| e.text.clone()).collect();
            push_detail(out, indent, &format!("Group Key: {}", keys.join(", ")));
        }
        if !self.aggregates.is_empty() {
            let calls: Vec<String> = self.aggregates.iter().map(|s| s.display.clone()).collect();
            push_detail(out, indent, &format!("Aggregates: {}", calls.join(", ")));
        }
        self.child.explain(indent + 1, out);
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            group_by: self.group_by.clone(),
            aggregates: self.aggregates.clone(),
            child: self.child.clone_operator(),
            groups: HashMap::new(),
            group_order: Vec::new(),
            position: 0,
            aggregation_complete: false,
            context: None,
            stats: ExecutionStats::default(),
            cost: self.cost,
            output_columns: self.output_columns.clone(),
        })
    }
}
