//! Convention-based row decoding.
//!
//! A row becomes one [`Metric`]:
//! - every `label_<name>` column contributes label `<name>`
//! - the `value` column contributes the sample value
//! - all other columns are ignored

use crate::source::{Row, Scalar};

/// Column-name prefix marking a label column.
pub const LABEL_PREFIX: &str = "label_";

/// Column holding the sample value.
pub const VALUE_COLUMN: &str = "value";

/// A single labeled sample decoded from one result row.
///
/// Label names are unique and sorted ascending; `values[i]` is the value of
/// `labels[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    labels: Vec<String>,
    values: Vec<String>,
    value: f64,
}

impl Metric {
    /// Sorted label names.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label values, parallel to [`Metric::labels`].
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Sample value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Decode one result row into a [`Metric`].
///
/// A row without a `value` column decodes to `0.0`, as does a `value` column
/// holding a non-numeric scalar.
pub fn decode(row: &Row) -> Metric {
    let mut labels = Vec::new();
    let mut value = 0.0;

    for (column, scalar) in row {
        if let Some(label) = column.strip_prefix(LABEL_PREFIX) {
            labels.push(label.to_owned());
        } else if column == VALUE_COLUMN {
            value = to_f64(scalar);
        }
    }

    // Column order is not part of the row contract.
    labels.sort_unstable();

    let values = labels
        .iter()
        .map(|label| {
            row.get(&format!("{LABEL_PREFIX}{label}"))
                .map(to_label_value)
                .unwrap_or_default()
        })
        .collect();

    Metric {
        labels,
        values,
        value,
    }
}

fn to_f64(scalar: &Scalar) -> f64 {
    match scalar {
        Scalar::Integer(v) => *v as f64,
        Scalar::Float(v) => *v,
        Scalar::String(_) | Scalar::Null => 0.0,
    }
}

/// Numeric label values are rounded to two decimals to bound cardinality.
fn to_label_value(scalar: &Scalar) -> String {
    match scalar {
        Scalar::String(s) => s.clone(),
        other => format!("{:.2}", to_f64(other)),
    }
}
