//! Metric validation: turns user-entered indicator values into an
//! immutable [`MetricSet`].
//!
//! Only indicators in the configured required set are inspected; anything
//! else in the raw input is ignored. Validation walks the indicators in
//! configuration order, so the same input always produces the same first
//! error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Indicator configuration
// ---------------------------------------------------------------------------

/// Declaration of one academic indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Key expected in the raw input (e.g. `attendance_pct`).
    pub name: String,
    /// Human-readable label used in prompts and reports.
    pub label: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Relative weight in the composite health score.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Values strictly below this are reported as a weak area.
    #[serde(default)]
    pub weak_below: Option<f64>,
    /// Value at which the indicator counts as fully healthy. Defaults to `max`.
    #[serde(default)]
    pub healthy_at: Option<f64>,
    /// Values strictly below this force at least high risk, whatever the
    /// composite says.
    #[serde(default)]
    pub floor_below: Option<f64>,
    /// Words that mark a recommendation as addressing this indicator.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl IndicatorSpec {
    /// Create an indicator with unit weight and no weak threshold.
    pub fn new(name: impl Into<String>, label: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            min,
            max,
            weight: 1.0,
            weak_below: None,
            healthy_at: None,
            floor_below: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_weak_below(mut self, threshold: f64) -> Self {
        self.weak_below = Some(threshold);
        self
    }

    pub fn with_healthy_at(mut self, value: f64) -> Self {
        self.healthy_at = Some(value);
        self
    }

    pub fn with_floor_below(mut self, threshold: f64) -> Self {
        self.floor_below = Some(threshold);
        self
    }

    /// Whether `value` sits below this indicator's hard floor.
    pub fn breaches_floor(&self, value: f64) -> bool {
        self.floor_below.is_some_and(|floor| value < floor)
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Normalized health in `0.0..=1.0`; higher is healthier.
    pub fn health(&self, value: f64) -> f64 {
        let top = self.healthy_at.unwrap_or(self.max);
        let span = top - self.min;
        if span <= 0.0 {
            return 1.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }

    /// Whether `text` mentions this indicator by label or keyword.
    pub fn is_mentioned_in(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        std::iter::once(&self.label)
            .chain(self.keywords.iter())
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && haystack.contains(&k))
    }
}

/// The indicator set collected by the student profile form.
pub fn default_indicators() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::new("attendance_pct", "Attendance", 0.0, 100.0)
            .with_weight(0.25)
            .with_weak_below(75.0)
            .with_floor_below(60.0)
            .with_keywords(["attendance", "attend", "class"]),
        IndicatorSpec::new("assignment_score", "Assignments", 0.0, 100.0)
            .with_weight(0.20)
            .with_weak_below(60.0)
            .with_floor_below(50.0)
            .with_keywords(["assignment", "homework", "coursework"]),
        IndicatorSpec::new("quiz_score", "Quizzes", 0.0, 100.0)
            .with_weight(0.20)
            .with_weak_below(60.0)
            .with_floor_below(50.0)
            .with_keywords(["quiz", "practice question", "flashcard"]),
        IndicatorSpec::new("midterm_score", "Midterm", 0.0, 100.0)
            .with_weight(0.25)
            .with_weak_below(60.0)
            .with_floor_below(50.0)
            .with_keywords(["midterm", "exam", "test"]),
        IndicatorSpec::new("study_hours_per_week", "Study hours", 0.0, 40.0)
            .with_weight(0.05)
            .with_weak_below(10.0)
            .with_healthy_at(20.0)
            .with_floor_below(5.0)
            .with_keywords(["study hour", "study session", "hours of study", "study"]),
        IndicatorSpec::new("previous_gpa", "GPA", 0.0, 10.0)
            .with_weight(0.05)
            .with_weak_below(6.0)
            .with_floor_below(5.0)
            .with_keywords(["gpa", "grade"]),
    ]
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Unvalidated indicator values as entered by a user.
///
/// Values may be JSON numbers, numeric strings (optionally with a trailing
/// `%`), or anything else; coercion happens during validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawMetrics {
    values: BTreeMap<String, Value>,
}

impl RawMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for RawMetrics {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated output
// ---------------------------------------------------------------------------

/// A validated, immutable bundle of indicator values for one student.
///
/// Only [`MetricValidator::validate`] can construct one, so every instance
/// holds exactly the required indicators, each within its declared range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricSet {
    values: BTreeMap<String, f64>,
}

impl MetricSet {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Iterate indicators in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The flat numeric record sent to prediction services.
    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An indicator whose value sits below its weak-area threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakArea {
    pub name: String,
    pub label: String,
    pub value: f64,
    pub threshold: f64,
    /// How far below the threshold, normalized to `0.0..=1.0`.
    pub shortfall: f64,
}

/// One indicator reading with its declared range, for prompt summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub name: String,
    pub label: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validates raw input against the configured indicator set.
#[derive(Debug, Clone)]
pub struct MetricValidator {
    indicators: Vec<IndicatorSpec>,
}

impl MetricValidator {
    pub fn new(indicators: Vec<IndicatorSpec>) -> Self {
        Self { indicators }
    }

    pub fn indicators(&self) -> &[IndicatorSpec] {
        &self.indicators
    }

    /// Validate every required indicator, returning the first violation.
    pub fn validate(&self, raw: &RawMetrics) -> Result<MetricSet, PipelineError> {
        let mut values = BTreeMap::new();

        for spec in &self.indicators {
            let value = match raw.get(&spec.name).map(coerce) {
                None | Some(Coerced::Missing) => {
                    return Err(PipelineError::MissingMetric {
                        metric: spec.name.clone(),
                    });
                }
                Some(Coerced::Invalid(rendered)) => {
                    return Err(PipelineError::InvalidMetricType {
                        metric: spec.name.clone(),
                        value: rendered,
                    });
                }
                Some(Coerced::Number(v)) => v,
            };

            if value < spec.min || value > spec.max {
                return Err(PipelineError::MetricOutOfRange {
                    metric: spec.name.clone(),
                    value,
                    min: spec.min,
                    max: spec.max,
                });
            }

            // Collapse -0.0 so equal inputs fingerprint identically.
            values.insert(spec.name.clone(), if value == 0.0 { 0.0 } else { value });
        }

        Ok(MetricSet { values })
    }

    /// Indicators below their weak threshold, worst first.
    pub fn weak_areas(&self, metrics: &MetricSet) -> Vec<WeakArea> {
        let mut areas: Vec<WeakArea> = self
            .indicators
            .iter()
            .filter_map(|spec| {
                let threshold = spec.weak_below?;
                let value = metrics.get(&spec.name)?;
                if value >= threshold {
                    return None;
                }
                let span = (threshold - spec.min).max(f64::EPSILON);
                Some(WeakArea {
                    name: spec.name.clone(),
                    label: spec.label.clone(),
                    value,
                    threshold,
                    shortfall: ((threshold - value) / span).clamp(0.0, 1.0),
                })
            })
            .collect();

        areas.sort_by(|a, b| {
            b.shortfall
                .partial_cmp(&a.shortfall)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        areas
    }

    /// Readings in configuration order, for prompt construction.
    pub fn readings(&self, metrics: &MetricSet) -> Vec<MetricReading> {
        self.indicators
            .iter()
            .filter_map(|spec| {
                Some(MetricReading {
                    name: spec.name.clone(),
                    label: spec.label.clone(),
                    value: metrics.get(&spec.name)?,
                    min: spec.min,
                    max: spec.max,
                })
            })
            .collect()
    }
}

enum Coerced {
    Missing,
    Number(f64),
    Invalid(String),
}

fn coerce(value: &Value) -> Coerced {
    match value {
        Value::Null => Coerced::Missing,
        Value::Number(n) => match n.as_f64() {
            Some(v) if v.is_finite() => Coerced::Number(v),
            _ => Coerced::Invalid(n.to_string()),
        },
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Coerced::Missing;
            }
            let numeric = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
            match numeric.parse::<f64>() {
                Ok(v) if v.is_finite() => Coerced::Number(v),
                _ => Coerced::Invalid(format!("{s:?}")),
            }
        }
        other => Coerced::Invalid(other.to_string()),
    }
}
