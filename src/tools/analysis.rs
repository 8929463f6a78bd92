use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FunctionTool, run_with_args};

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").expect("number pattern should compile")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    /// Sample standard deviation; present when there are at least two values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn calculate_statistics(values: &[f64]) -> Result<Statistics> {
    if values.is_empty() {
        return Err(anyhow::anyhow!("number list is empty"));
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = mean(values);
    let variance = (values.len() >= 2).then(|| {
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    });

    Ok(Statistics {
        count: values.len(),
        sum: values.iter().sum(),
        mean: avg,
        median: median(values),
        min,
        max,
        range: max - min,
        stdev: variance.map(f64::sqrt),
        variance,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetComparison {
    pub first: Statistics,
    pub second: Statistics,
    pub mean_difference: f64,
    pub median_difference: f64,
    pub mean_trend: String,
}

/// Differences are `second - first`.
pub fn compare_data(
    first: &[f64],
    second: &[f64],
    first_label: &str,
    second_label: &str,
) -> Result<DatasetComparison> {
    if first.is_empty() || second.is_empty() {
        return Err(anyhow::anyhow!("dataset is empty"));
    }

    let a = calculate_statistics(first)?;
    let b = calculate_statistics(second)?;
    let mean_trend = if b.mean > a.mean {
        format!("{second_label} has the higher mean than {first_label}")
    } else if b.mean < a.mean {
        format!("{first_label} has the higher mean than {second_label}")
    } else {
        "means are equal".to_string()
    };

    Ok(DatasetComparison {
        mean_difference: b.mean - a.mean,
        median_difference: b.median - a.median,
        first: a,
        second: b,
        mean_trend,
    })
}

/// Integers, decimals, negatives and comma thousands separators (`1,234.5`).
pub fn extract_numbers_from_text(text: &str) -> Vec<f64> {
    NUMBER_PATTERN
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub trend: TrendDirection,
    pub total_points: usize,
    pub increases: usize,
    pub decreases: usize,
    pub no_change: usize,
    pub average_change: f64,
    pub total_change: f64,
    /// Zero when the series starts at zero.
    pub percent_change: f64,
}

pub fn analyze_trend(series: &[f64]) -> Result<TrendReport> {
    if series.len() < 2 {
        return Err(anyhow::anyhow!(
            "not enough data points (at least 2 required)"
        ));
    }

    let deltas = series
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<f64>>();
    let increases = deltas.iter().filter(|d| **d > 0.0).count();
    let decreases = deltas.iter().filter(|d| **d < 0.0).count();
    let first = series[0];
    let last = series[series.len() - 1];

    Ok(TrendReport {
        trend: match increases.cmp(&decreases) {
            std::cmp::Ordering::Greater => TrendDirection::Rising,
            std::cmp::Ordering::Less => TrendDirection::Falling,
            std::cmp::Ordering::Equal => TrendDirection::Flat,
        },
        total_points: series.len(),
        increases,
        decreases,
        no_change: deltas.len() - increases - decreases,
        average_change: mean(&deltas),
        total_change: last - first,
        percent_change: if first != 0.0 {
            (last - first) / first * 100.0
        } else {
            0.0
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorized {
    pub threshold: f64,
    pub high: BTreeMap<String, f64>,
    pub low: BTreeMap<String, f64>,
}

/// Entries `>= threshold` are high. Non-numeric values are skipped.
pub fn categorize_data(data: &BTreeMap<String, Value>, threshold: f64) -> Categorized {
    let mut high = BTreeMap::new();
    let mut low = BTreeMap::new();
    for (key, value) in data {
        let Some(number) = value.as_f64() else {
            continue;
        };
        if number >= threshold {
            high.insert(key.clone(), number);
        } else {
            low.insert(key.clone(), number);
        }
    }
    Categorized {
        threshold,
        high,
        low,
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NumbersArgs {
    /// Numbers to analyze
    numbers: Vec<f64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CompareArgs {
    first: Vec<f64>,
    second: Vec<f64>,
    #[serde(default)]
    first_label: Option<String>,
    #[serde(default)]
    second_label: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TextArgs {
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CategorizeArgs {
    /// Item name to numeric value
    data: BTreeMap<String, Value>,
    threshold: f64,
}

pub fn tools() -> Vec<FunctionTool> {
    vec![
        FunctionTool::new::<NumbersArgs>(
            "calculate_statistics",
            "Computes count, sum, mean, median, min, max, range and sample stdev/variance.",
            |args| run_with_args(args, |a: NumbersArgs| calculate_statistics(&a.numbers)),
        ),
        FunctionTool::new::<CompareArgs>(
            "compare_data",
            "Compares two numeric datasets and reports mean/median differences.",
            |args| {
                run_with_args(args, |a: CompareArgs| {
                    compare_data(
                        &a.first,
                        &a.second,
                        a.first_label.as_deref().unwrap_or("dataset1"),
                        a.second_label.as_deref().unwrap_or("dataset2"),
                    )
                })
            },
        ),
        FunctionTool::new::<TextArgs>(
            "extract_numbers_from_text",
            "Extracts every number that appears in a text.",
            |args| run_with_args(args, |a: TextArgs| Ok(extract_numbers_from_text(&a.text))),
        ),
        FunctionTool::new::<NumbersArgs>(
            "analyze_trend",
            "Classifies a time series as rising, falling or flat and reports the change.",
            |args| run_with_args(args, |a: NumbersArgs| analyze_trend(&a.numbers)),
        ),
        FunctionTool::new::<CategorizeArgs>(
            "categorize_data",
            "Splits named numeric values into high/low groups around a threshold.",
            |args| {
                run_with_args(args, |a: CategorizeArgs| {
                    Ok(categorize_data(&a.data, a.threshold))
                })
            },
        ),
    ]
}
