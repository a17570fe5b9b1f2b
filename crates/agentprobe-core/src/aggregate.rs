//! Aggregation — comparable statistics over sets of run records.
//!
//! Records are bucketed in a single pass by the values of caller-chosen
//! grouping fields. Each bucket reports count, success rate and latency /
//! token distributions. Null values are excluded from the distribution of
//! the field they belong to, so "unknown" never counts as zero. A null
//! grouping value gets its own bucket, apart from any real value that
//! happens to read "unknown" or "".

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

use crate::error::{self, ProbeError};
use crate::record::RunRecord;

/// Display label for a missing or null grouping value.
pub const UNKNOWN: &str = "unknown";

pub const DEFAULT_GROUP_BY: &[&str] = &["agent_name", "config_hash"];

const GROUPABLE_FIELDS: &[&str] = &[
    "agent_name",
    "agent_version",
    "config_hash",
    "dataset_id",
    "item_id",
    "schema_version",
    "success",
];

/// Linear-interpolation percentile over sorted values, `q` in `[0, 1]`.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    /// Number of non-null values the statistics are computed over.
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub min: f64,
    pub max: f64,
}

impl Distribution {
    /// `None` when there are no values.
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        Some(Self {
            n,
            mean: values.iter().sum::<f64>() / n as f64,
            median: percentile(&values, 0.5)?,
            p90: percentile(&values, 0.9)?,
            min: values[0],
            max: values[n - 1],
        })
    }
}

/// Statistics for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    /// Grouping values, in the order of the grouping fields. Missing values
    /// read [`UNKNOWN`].
    pub key: Vec<String>,
    /// Which positions of `key` were missing or null in the records.
    pub missing: Vec<bool>,
    pub count: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub time_ms: Option<Distribution>,
    pub tokens_prompt: Option<Distribution>,
    pub tokens_completion: Option<Distribution>,
    pub tokens_total: Option<Distribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub group_by: Vec<String>,
    /// Ordered by descending count, then by key.
    pub groups: Vec<Aggregate>,
    /// All records together.
    pub total: Aggregate,
}

impl Aggregate {
    /// The raw grouping values, `None` where the value was missing.
    pub fn values(&self) -> Vec<Option<&str>> {
        self.key
            .iter()
            .zip(&self.missing)
            .map(|(k, &missing)| (!missing).then_some(k.as_str()))
            .collect()
    }
}

impl Summary {
    /// The bucket whose grouping values are all present and equal `key`.
    pub fn group(&self, key: &[&str]) -> Option<&Aggregate> {
        let key: Vec<Option<&str>> = key.iter().copied().map(Some).collect();
        self.group_with(&key)
    }

    /// The bucket for `values`, where `None` selects missing values.
    pub fn group_with(&self, values: &[Option<&str>]) -> Option<&Aggregate> {
        self.groups.iter().find(|g| g.values() == values)
    }
}

#[derive(Default)]
struct Bucket {
    count: usize,
    successes: usize,
    time_ms: Vec<f64>,
    tokens_prompt: Vec<f64>,
    tokens_completion: Vec<f64>,
    tokens_total: Vec<f64>,
}

impl Bucket {
    fn add(&mut self, record: &RunRecord) {
        self.count += 1;
        if record.success {
            self.successes += 1;
        }
        self.time_ms.push(record.time_ms as f64);
        for (values, field) in [
            (&mut self.tokens_prompt, record.tokens_prompt),
            (&mut self.tokens_completion, record.tokens_completion),
            (&mut self.tokens_total, record.tokens_total),
        ] {
            if let Some(v) = field {
                values.push(v as f64);
            }
        }
    }

    fn finish(self, values: Vec<Option<String>>) -> Aggregate {
        let missing = values.iter().map(Option::is_none).collect();
        let key = values
            .into_iter()
            .map(|v| v.unwrap_or_else(|| UNKNOWN.to_string()))
            .collect();
        let success_rate = if self.count == 0 {
            0.0
        } else {
            self.successes as f64 / self.count as f64
        };
        Aggregate {
            key,
            missing,
            count: self.count,
            successes: self.successes,
            success_rate,
            time_ms: Distribution::from_values(self.time_ms),
            tokens_prompt: Distribution::from_values(self.tokens_prompt),
            tokens_completion: Distribution::from_values(self.tokens_completion),
            tokens_total: Distribution::from_values(self.tokens_total),
        }
    }
}

/// Whether `field` can be used as a grouping key.
pub fn is_groupable(field: &str) -> bool {
    GROUPABLE_FIELDS.contains(&field)
        || field
            .strip_prefix("extra.")
            .is_some_and(|key| !key.is_empty())
}

/// The grouping value of `field` for `record`, `None` when missing or null.
pub fn field_value(record: &RunRecord, field: &str) -> Option<String> {
    match field {
        "agent_name" => Some(record.agent_name.clone()),
        "agent_version" => Some(record.agent_version.clone()),
        "config_hash" => Some(record.config_hash.clone()),
        "dataset_id" => record.dataset_id.clone(),
        "item_id" => record.item_id.clone(),
        "schema_version" => Some(record.schema_version.clone()),
        "success" => Some(record.success.to_string()),
        other => match record.extra.get(other.strip_prefix("extra.")?)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            v => Some(v.to_string()),
        },
    }
}

/// Bucket `records` by `group_by` and compute per-bucket statistics.
///
/// Fails when a grouping field is not groupable.
pub fn summarize<'a, I, S>(records: I, group_by: &[S]) -> error::Result<Summary>
where
    I: IntoIterator<Item = &'a RunRecord>,
    S: AsRef<str>,
{
    let fields: Vec<String> = group_by.iter().map(|f| f.as_ref().trim().to_string()).collect();
    if let Some(bad) = fields.iter().find(|f| !is_groupable(f)) {
        return Err(ProbeError::validation(
            bad.as_str(),
            format!(
                "cannot group by this field (expected one of {} or extra.<key>)",
                GROUPABLE_FIELDS.join(", ")
            ),
        ));
    }

    let mut buckets: HashMap<Vec<Option<String>>, Bucket> = HashMap::new();
    let mut total = Bucket::default();
    for record in records {
        let key: Vec<Option<String>> = fields.iter().map(|f| field_value(record, f)).collect();
        buckets.entry(key).or_default().add(record);
        total.add(record);
    }

    let mut buckets: Vec<_> = buckets.into_iter().collect();
    buckets.sort_by(|(ka, a), (kb, b)| b.count.cmp(&a.count).then_with(|| ka.cmp(kb)));
    let groups = buckets
        .into_iter()
        .map(|(key, bucket)| bucket.finish(key))
        .collect();

    Ok(Summary {
        group_by: fields,
        groups,
        total: total.finish(vec![Some("TOTAL".to_string())]),
    })
}

/// Render a summary as an aligned text table with a trailing total row.
pub fn render_table(summary: &Summary) -> String {
    let mut header: Vec<String> = if summary.group_by.is_empty() {
        vec!["group".to_string()]
    } else {
        summary.group_by.clone()
    };
    header.extend(
        [
            "count",
            "success_rate",
            "time_ms_mean",
            "time_ms_median",
            "time_ms_p90",
            "time_ms_min",
            "time_ms_max",
            "tokens_total_mean",
            "tokens_total_p90",
        ]
        .map(String::from),
    );
    let key_columns = summary.group_by.len().max(1);

    let mut rows = vec![header];
    for group in &summary.groups {
        rows.push(table_row(group, key_columns));
    }
    rows.push(table_row(&summary.total, key_columns));

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..width)
        .map(|col| {
            rows.iter()
                .filter_map(|r| r.get(col))
                .map(|c| c.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(col, cell)| {
                if col < key_columns {
                    format!("{cell:<w$}", w = widths[col])
                } else {
                    format!("{cell:>w$}", w = widths[col])
                }
            })
            .collect();
        let _ = writeln!(out, "{}", cells.join("  ").trim_end());
        if i == 0 || i == rows.len() - 2 {
            let rule: usize = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
            let _ = writeln!(out, "{}", "-".repeat(rule));
        }
    }
    out
}

fn table_row(agg: &Aggregate, key_columns: usize) -> Vec<String> {
    let mut row: Vec<String> = agg.key.clone();
    row.resize(key_columns, String::new());
    row.push(agg.count.to_string());
    row.push(format!("{:.1}%", agg.success_rate * 100.0));
    let time = agg.time_ms.as_ref();
    row.push(fmt_stat(time.map(|d| d.mean)));
    row.push(fmt_stat(time.map(|d| d.median)));
    row.push(fmt_stat(time.map(|d| d.p90)));
    row.push(fmt_stat(time.map(|d| d.min)));
    row.push(fmt_stat(time.map(|d| d.max)));
    let tokens = agg.tokens_total.as_ref();
    row.push(fmt_stat(tokens.map(|d| d.mean)));
    row.push(fmt_stat(tokens.map(|d| d.p90)));
    row
}

fn fmt_stat(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.1}")).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.5), Some(2.5));
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 1.0), Some(4.0));
        assert!((percentile(&v, 0.9).unwrap() - 3.7).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn distribution_of_single_value() {
        let d = Distribution::from_values(vec![7.0]).unwrap();
        assert_eq!((d.n, d.mean, d.median, d.p90, d.min, d.max), (1, 7.0, 7.0, 7.0, 7.0, 7.0));
        assert!(Distribution::from_values(vec![]).is_none());
    }

    #[test]
    fn groupable_fields() {
        assert!(is_groupable("agent_name"));
        assert!(is_groupable("extra.model"));
        assert!(!is_groupable("extra."));
        assert!(!is_groupable("goal"));
    }
}
