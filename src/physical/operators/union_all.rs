// Append: concatenates its children's output, deduplicating whole rows for
// distinct set semantics (UNION vs UNION ALL). Output is the children's
// order; hash-based dedup makes no further ordering promise.

use super::push_head;
use crate::logical::PlanCost;
use crate::physical::{
    elapsed_ms, ExecutionContext, ExecutionStats, PhysicalOperator, TupleBatch,
};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

pub struct AppendOperator {
    children: Vec<Box<dyn PhysicalOperator>>,
    distinct: bool,
    current: usize,
    seen: HashSet<Vec<String>>,
    stats: ExecutionStats,
    cost: PlanCost,
    output_columns: Vec<String>,
}

impl AppendOperator {
    pub fn new(children: Vec<Box<dyn PhysicalOperator>>, distinct: bool) -> Self {
        let output_columns = children
            .first()
            .map(|child| child.output_columns().to_vec())
            .unwrap_or_default();
        Self {
            children,
            distinct,
            current: 0,
            seen: HashSet::new(),
            stats: ExecutionStats::default(),
            cost: PlanCost::default(),
            output_columns,
        }
    }

    pub fn with_cost(mut self, cost: PlanCost) -> Self {
        self.cost = cost;
        self
    }
}

impl PhysicalOperator for AppendOperator {
    fn initialize(&mut self, context: &Arc<ExecutionContext>) -> Result<()> {
        self.current = 0;
        self.seen.clear();
        for child in &mut self.children {
            child.initialize(context)?;
        }
        Ok(())
    }

    fn next_batch(&mut self) -> Result<TupleBatch> {
        let started = Instant::now();
        let mut batch = TupleBatch::new(self.output_columns.clone());

        while self.current < self.children.len() {
            let child = &mut self.children[self.current];
            if !child.has_more_data() {
                self.current += 1;
                continue;
            }

            let input = child.next_batch()?;
            for tuple in input.tuples {
                self.stats.rows_processed += 1;
                if self.distinct && !self.seen.insert(tuple.values.clone()) {
                    continue;
                }
                batch.add_tuple(tuple);
                self.stats.rows_returned += 1;
            }
            break;
        }

        self.stats.execution_time_ms += elapsed_ms(started);
        Ok(batch)
    }

    fn has_more_data(&self) -> bool {
        self.children[self.current..]
            .iter()
            .any(|child| child.has_more_data())
    }

    fn reset(&mut self) {
        self.current = 0;
        self.seen.clear();
        self.stats = ExecutionStats::default();
        for child in &mut self.children {
            child.reset();
        }
    }

    fn cleanup(&mut self) {
        self.seen.clear();
        for child in &mut self.children {
            child.cleanup();
        }
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
        for child in &self.children {
            child.collect_stats(total);
        }
    }

    fn explain(&self, indent: usize, out: &mut String) {
        let name = if self.distinct { "Unique Append" } else { "Append" };
        push_head(out, indent, name, &self.cost);
        for child in &self.children {
            child.explain(indent + 1, out);
        }
    }

    fn clone_operator(&self) -> Box<dyn PhysicalOperator> {
        Box::new(Self {
            children: self
                .children
                .iter()
                .map(|child| child.clone_operator())
                .collect(),
            distinct: self.distinct,
            current: 0,
            seen: HashSet::new(),
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
    use crate::physical::Tuple;

    fn scan(values: &[&str]) -> Box<dyn PhysicalOperator> {
        let rows: Vec<Tuple> = values
            .iter()
            .map(|v| Tuple::new(vec![v.to_string()]))
            .collect();
        Box::new(
            SequentialScanOperator::new("t", "t")
                .with_output_columns(vec!["v".to_string()])
                .with_rows(rows),
        )
    }

    fn run(mut append: AppendOperator) -> Vec<String> {
        let context = Arc::new(ExecutionContext::default());
        append.initialize(&context).unwrap();
        let mut all = Vec::new();
        while append.has_more_data() {
            for tuple in append.next_batch().unwrap().tuples {
                all.push(tuple.value(0).to_string());
            }
        }
        all
    }

    #[test]
    fn test_union_all_concatenates() {
        let append = AppendOperator::new(vec![scan(&["1", "2"]), scan(&["2", "3"])], false);
        assert_eq!(run(append), vec!["1", "2", "2", "3"]);
    }

    #[test]
    fn test_union_distinct_dedups() {
        let append = AppendOperator::new(vec![scan(&["1", "2"]), scan(&["2", "3"])], true);
        assert_eq!(run(append), vec!["1", "2", "3"]);
    }
}
