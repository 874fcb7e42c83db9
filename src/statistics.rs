//! Numeric result statistics
//!
//! Per-numeric-column `{count, sum, mean, min, max}` over a result set.
//! Columns are considered numeric when at least one row carries a JSON
//! number for them; non-numeric values in such a column are skipped.

use crate::executor::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultStatistics {
    pub total_records: usize,
    pub columns: Vec<String>,
    pub numeric_summary: BTreeMap<String, ColumnStats>,
}

/// Compute statistics over a result set.
pub fn compute(data: &[Record]) -> ResultStatistics {
    if data.is_empty() {
        return ResultStatistics::default();
    }

    let columns: Vec<String> = data[0].keys().cloned().collect();

    let mut values_by_column: BTreeMap<&String, Vec<f64>> = BTreeMap::new();
    for record in data {
        for (column, value) in record {
            if let Some(n) = value.as_f64() {
                values_by_column.entry(column).or_default().push(n);
            }
        }
    }

    let numeric_summary = values_by_column
        .into_iter()
        .map(|(column, values)| {
            let count = values.len();
            let sum: f64 = values.iter().sum();
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            (
                column.clone(),
                ColumnStats {
                    count,
                    sum,
                    mean: sum / count as f64,
                    min,
                    max,
                },
            )
        })
        .collect();

    ResultStatistics {
        total_records: data.len(),
        columns,
        numeric_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[i64]) -> Vec<Record> {
        values
            .iter()
            .map(|v| {
                let mut record = Record::new();
                record.insert("a".to_string(), serde_json::json!(v));
                record
            })
            .collect()
    }

    #[test]
    fn basic_stats() {
        let stats = compute(&rows(&[1, 2, 3]));

        assert_eq!(stats.total_records, 3);
        let a = &stats.numeric_summary["a"];
        assert_eq!(a.count, 3);
        assert_eq!(a.sum, 6.0);
        assert_eq!(a.mean, 2.0);
        assert_eq!(a.min, 1.0);
        assert_eq!(a.max, 3.0);
    }

    #[test]
    fn skips_non_numeric_columns() {
        let mut record = Record::new();
        record.insert("name".to_string(), serde_json::json!("张三"));
        record.insert("balance".to_string(), serde_json::json!(100.5));
        let stats = compute(&[record]);

        assert!(stats.numeric_summary.contains_key("balance"));
        assert!(!stats.numeric_summary.contains_key("name"));
        assert_eq!(stats.columns.len(), 2);
    }

    #[test]
    fn empty_input_yields_empty_stats() {
        let stats = compute(&[]);
        assert_eq!(stats.total_records, 0);
        assert!(stats.numeric_summary.is_empty());
    }

    #[test]
    fn nulls_are_ignored_in_counts() {
        let mut r1 = Record::new();
        r1.insert("a".to_string(), serde_json::json!(4));
        let mut r2 = Record::new();
        r2.insert("a".to_string(), serde_json::Value::Null);
        let stats = compute(&[r1, r2]);

        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.numeric_summary["a"].count, 1);
    }
}
