//! Response Validator/Repairer
//!
//! Turns free model text into an `ExtractionResult` without ever failing:
//! 1. Locate the outermost `{...}` span (the model may wrap JSON in prose)
//! 2. Parse it; unparsable or missing JSON yields an empty result
//! 3. Strict schema check; a conforming response passes through unchanged
//! 4. Otherwise repair field by field, dropping only rows whose region is
//!    empty or whose year is not positive
//!
//! This module is pure: no I/O, no logging side effects beyond `tracing`.

use crate::extraction::{ExtractedDataPoint, ExtractedMetric, ExtractionResult};
use serde::Serialize;
use serde_json::Value;

pub const UNKNOWN_METRIC: &str = "Unknown metric";
pub const UNKNOWN_UNIT: &str = "Unknown unit";

/// Which path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionOutcome {
    Strict,
    Repaired,
    Empty,
}

impl ExtractionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Repaired => "repaired",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub result: ExtractionResult,
    pub outcome: ExtractionOutcome,
    /// Data entries removed by the repair pass.
    pub dropped: usize,
}

impl Validated {
    fn empty() -> Self {
        Self {
            result: ExtractionResult::default(),
            outcome: ExtractionOutcome::Empty,
            dropped: 0,
        }
    }
}

pub fn validate_response(raw: &str) -> Validated {
    let Some(span) = locate_json_object(raw) else {
        tracing::warn!("no JSON object found in model response");
        return Validated::empty();
    };

    let value: Value = match serde_json::from_str(span) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "model response JSON did not parse");
            return Validated::empty();
        }
    };

    match serde_json::from_value::<ExtractionResult>(value.clone()) {
        Ok(result) => Validated {
            result,
            outcome: ExtractionOutcome::Strict,
            dropped: 0,
        },
        Err(e) => {
            tracing::warn!(error = %e, "model response failed schema validation, repairing");
            let (result, dropped) = repair(&value);
            Validated {
                result,
                outcome: ExtractionOutcome::Repaired,
                dropped,
            }
        }
    }
}

/// First `{` through last `}`.
fn locate_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Field-level salvage of a schema-violating response. Never fails.
pub fn repair(value: &Value) -> (ExtractionResult, usize) {
    let mut dropped = 0;

    let metrics = match value.get("metrics") {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| {
                let data = match entry.get("data") {
                    Some(Value::Array(points)) => points
                        .iter()
                        .filter_map(|point| {
                            let repaired = repair_point(point);
                            if repaired.is_none() {
                                dropped += 1;
                            }
                            repaired
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                ExtractedMetric {
                    name: coerce_label(entry.get("name"), UNKNOWN_METRIC),
                    unit: coerce_label(entry.get("unit"), UNKNOWN_UNIT),
                    data,
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    (ExtractionResult { metrics }, dropped)
}

/// Returns `None` when the entry must be dropped (empty region or year <= 0).
fn repair_point(point: &Value) -> Option<ExtractedDataPoint> {
    let region = coerce_region(point.get("region"));
    let year = coerce_year(point.get("year"));
    if region.is_empty() || year <= 0 {
        return None;
    }
    Some(ExtractedDataPoint {
        region,
        year,
        value: coerce_value(point.get("value")),
    })
}

fn coerce_label(value: Option<&Value>, placeholder: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => placeholder.to_string(),
    }
}

fn coerce_region(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn coerce_year(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => leading_integer(s.trim()),
        _ => 0,
    }
}

fn coerce_value(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

/// Integer prefix of a string ("2023", "2023.0", "2023 (est.)"); 0 if none.
fn leading_integer(s: &str) -> i64 {
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}
