// Deterministic mock row source backing scans when no storage is attached.
//
// Rows are reproducible for a given (table, column) shape: the first column
// is a 1-based row number and numeric-looking columns draw from a seeded
// generator, so repeated executions yield identical tuple multisets.

use crate::physical::Tuple;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MOCK_SEED: u64 = 0x5EED_CAFE;

pub struct MockDataGenerator;

impl MockDataGenerator {
    /// Generate `num_rows` tuples shaped after `columns`.
    pub fn generate_table_data(
        table_name: &str,
        num_rows: usize,
        columns: &[String],
    ) -> Vec<Tuple> {
        let mut rng = StdRng::seed_from_u64(MOCK_SEED ^ seed_for(table_name));
        let mut rows = Vec::with_capacity(num_rows);

        for row in 0..num_rows {
            rows.push(Self::generate_row(table_name, row, columns, &mut rng));
        }

        rows
    }

    fn generate_row(
        table_name: &str,
        row: usize,
        columns: &[String],
        rng: &mut StdRng,
    ) -> Tuple {
        if columns.is_empty() {
            return Tuple::new(vec![
                (row + 1).to_string(),
                format!("{}_value_{}", table_name, row + 1),
            ]);
        }

        let values = columns
            .iter()
            .enumerate()
            .map(|(position, column)| {
                if position == 0 {
                    (row + 1).to_string()
                } else if is_numeric_column(column) {
                    format!("{:.2}", rng.random_range(1.0..1000.0))
                } else if column.contains("email") {
                    format!("user{}@example.com", row + 1)
                } else {
                    format!("{}_{}", column, row + 1)
                }
            })
            .collect();

        Tuple::new(values)
    }
}

fn is_numeric_column(column: &str) -> bool {
    ["total", "price", "amount", "quantity", "count"]
        .iter()
        .any(|hint| column.contains(hint))
}

fn seed_for(table_name: &str) -> u64 {
    table_name
        .bytes()
        .fold(0u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_generation() {
        let columns = vec!["id".to_string(), "name".to_string(), "total".to_string()];
        let first = MockDataGenerator::generate_table_data("orders", 100, &columns);
        let second = MockDataGenerator::generate_table_data("orders", 100, &columns);
        assert_eq!(first, second);
        assert_eq!(first.len(), 100);
        assert_eq!(first[0].value(0), "1");
        assert_eq!(first[99].value(0), "100");
    }

    #[test]
    fn test_shape_follows_columns() {
        let columns = vec!["id".to_string(), "email".to_string()];
        let rows = MockDataGenerator::generate_table_data("users", 3, &columns);
        assert_eq!(rows[0].len(), 2);
        assert!(rows[0].value(1).contains("@example.com"));
    }
}
