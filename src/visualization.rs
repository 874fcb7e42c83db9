//! Chart suggestion
//!
//! Produces a declarative [`ChartSpec`] (chart type plus field bindings)
//! from the shape of a result set. Rendering is entirely the caller's
//! concern; no generated code is ever executed.

use crate::executor::Record;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Pie,
    Line,
    Scatter,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    /// Column used for the category axis / labels, when one exists.
    pub category_field: Option<String>,
    /// Numeric columns bound to values.
    pub value_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationData {
    pub chart_ready: bool,
    pub record_count: usize,
    pub columns: Vec<String>,
    pub suggested_charts: Vec<ChartSpec>,
}

/// Suggest charts for a result set.
///
/// Categorical + numeric columns suggest bar and pie; two or more numeric
/// columns suggest line and scatter; anything else falls back to a table.
pub fn prepare(data: &[Record]) -> VisualizationData {
    if data.is_empty() {
        return VisualizationData {
            chart_ready: false,
            record_count: 0,
            columns: Vec::new(),
            suggested_charts: Vec::new(),
        };
    }

    let columns: Vec<String> = data[0].keys().cloned().collect();
    let numeric: Vec<String> = columns
        .iter()
        .filter(|c| data.iter().any(|r| r.get(*c).map(|v| v.is_number()).unwrap_or(false)))
        .cloned()
        .collect();
    let categorical: Vec<String> = columns
        .iter()
        .filter(|c| !numeric.contains(c))
        .cloned()
        .collect();

    let suggested_charts = if !categorical.is_empty() && !numeric.is_empty() {
        let category = categorical[0].clone();
        vec![
            ChartSpec {
                chart_type: ChartType::Bar,
                category_field: Some(category.clone()),
                value_fields: numeric.clone(),
            },
            ChartSpec {
                chart_type: ChartType::Pie,
                category_field: Some(category),
                value_fields: vec![numeric[0].clone()],
            },
        ]
    } else if numeric.len() > 1 {
        vec![
            ChartSpec {
                chart_type: ChartType::Line,
                category_field: None,
                value_fields: numeric.clone(),
            },
            ChartSpec {
                chart_type: ChartType::Scatter,
                category_field: None,
                value_fields: numeric.clone(),
            },
        ]
    } else {
        vec![ChartSpec {
            chart_type: ChartType::Table,
            category_field: None,
            value_fields: Vec::new(),
        }]
    };

    VisualizationData {
        chart_ready: true,
        record_count: data.len(),
        columns,
        suggested_charts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn categorical_plus_numeric_suggests_bar_and_pie() {
        let data = vec![
            record(&[("branch", serde_json::json!("城东")), ("balance", serde_json::json!(100))]),
            record(&[("branch", serde_json::json!("城西")), ("balance", serde_json::json!(200))]),
        ];

        let viz = prepare(&data);
        assert!(viz.chart_ready);
        let types: Vec<ChartType> = viz.suggested_charts.iter().map(|c| c.chart_type).collect();
        assert_eq!(types, vec![ChartType::Bar, ChartType::Pie]);
        assert_eq!(
            viz.suggested_charts[0].category_field.as_deref(),
            Some("branch")
        );
        assert_eq!(viz.suggested_charts[0].value_fields, vec!["balance"]);
    }

    #[test]
    fn multiple_numeric_columns_suggest_line_and_scatter() {
        let data = vec![record(&[
            ("x", serde_json::json!(1)),
            ("y", serde_json::json!(2.5)),
        ])];

        let viz = prepare(&data);
        let types: Vec<ChartType> = viz.suggested_charts.iter().map(|c| c.chart_type).collect();
        assert_eq!(types, vec![ChartType::Line, ChartType::Scatter]);
    }

    #[test]
    fn single_numeric_column_falls_back_to_table() {
        let data = vec![record(&[("total", serde_json::json!(42))])];
        let viz = prepare(&data);
        assert_eq!(viz.suggested_charts[0].chart_type, ChartType::Table);
    }

    #[test]
    fn empty_data_is_not_chart_ready() {
        let viz = prepare(&[]);
        assert!(!viz.chart_ready);
        assert!(viz.suggested_charts.is_empty());
    }
}
