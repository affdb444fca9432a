//! Error taxonomy for the assessment pipeline.
//!
//! Input errors (`MissingMetric`, `InvalidMetricType`, `MetricOutOfRange`)
//! are never retried. Upstream errors from the prediction and generation
//! capabilities are retryable under the orchestrator's budget.
//! `PlanQualityExhausted` is terminal and carries the last rejection.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::PipelineStage;
use crate::plan::PlanRejection;

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingMetric,
    InvalidMetricType,
    MetricOutOfRange,
    ClassificationUnavailable,
    ClassificationTimeout,
    GenerationUnavailable,
    GenerationTimeout,
    GenerationMalformed,
    PlanQualityExhausted,
    Cancelled,
}

impl ErrorKind {
    /// The snake_case name used in logs and HTTP bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingMetric => "missing_metric",
            Self::InvalidMetricType => "invalid_metric_type",
            Self::MetricOutOfRange => "metric_out_of_range",
            Self::ClassificationUnavailable => "classification_unavailable",
            Self::ClassificationTimeout => "classification_timeout",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationMalformed => "generation_malformed",
            Self::PlanQualityExhausted => "plan_quality_exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Input errors are caused by the caller's data and surface immediately.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingMetric | Self::InvalidMetricType | Self::MetricOutOfRange
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by [`crate::Pipeline::submit`].
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("required metric {metric:?} is missing")]
    MissingMetric { metric: String },

    #[error("metric {metric:?} is not a number: {value}")]
    InvalidMetricType { metric: String, value: String },

    #[error("metric {metric:?} = {value} is outside the allowed range [{min}, {max}]")]
    MetricOutOfRange {
        metric: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("risk classification unavailable: {reason}")]
    ClassificationUnavailable { reason: String },

    #[error("risk classification timed out after {timeout:?}")]
    ClassificationTimeout { timeout: Duration },

    #[error("plan generation unavailable: {reason}")]
    GenerationUnavailable { reason: String },

    #[error("plan generation timed out after {timeout:?}")]
    GenerationTimeout { timeout: Duration },

    #[error("generated plan is malformed: {reason}")]
    GenerationMalformed { reason: String },

    #[error("no acceptable plan after {attempts} attempts; last rejection: {last_rejection}")]
    PlanQualityExhausted {
        attempts: u32,
        last_rejection: PlanRejection,
    },

    #[error("assessment cancelled while {stage}")]
    Cancelled { stage: PipelineStage },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingMetric { .. } => ErrorKind::MissingMetric,
            Self::InvalidMetricType { .. } => ErrorKind::InvalidMetricType,
            Self::MetricOutOfRange { .. } => ErrorKind::MetricOutOfRange,
            Self::ClassificationUnavailable { .. } => ErrorKind::ClassificationUnavailable,
            Self::ClassificationTimeout { .. } => ErrorKind::ClassificationTimeout,
            Self::GenerationUnavailable { .. } => ErrorKind::GenerationUnavailable,
            Self::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            Self::GenerationMalformed { .. } => ErrorKind::GenerationMalformed,
            Self::PlanQualityExhausted { .. } => ErrorKind::PlanQualityExhausted,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Whether the orchestrator may re-issue the failed external call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ClassificationUnavailable
                | ErrorKind::ClassificationTimeout
                | ErrorKind::GenerationUnavailable
                | ErrorKind::GenerationTimeout
                | ErrorKind::GenerationMalformed
        )
    }
}

/// Failure reported by an external prediction or generation capability.
///
/// Adapters translate these into the stage-specific [`PipelineError`]
/// variants; capabilities never see the pipeline taxonomy.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("capability unreachable: {0}")]
    Unreachable(String),

    #[error("malformed capability response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_not_retryable() {
        let err = PipelineError::MissingMetric {
            metric: "attendance_pct".to_string(),
        };
        assert!(err.kind().is_input_error());
        assert!(!err.is_retryable());

        let err = PipelineError::MetricOutOfRange {
            metric: "quiz_score".to_string(),
            value: 140.0,
            min: 0.0,
            max: 100.0,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("quiz_score"));
        assert!(err.to_string().contains("[0, 100]"));
    }

    #[test]
    fn upstream_errors_are_retryable() {
        let errors = [
            PipelineError::ClassificationUnavailable {
                reason: "connection refused".to_string(),
            },
            PipelineError::ClassificationTimeout {
                timeout: Duration::from_secs(5),
            },
            PipelineError::GenerationUnavailable {
                reason: "503".to_string(),
            },
            PipelineError::GenerationTimeout {
                timeout: Duration::from_secs(30),
            },
            PipelineError::GenerationMalformed {
                reason: "not toml".to_string(),
            },
        ];
        for err in errors {
            assert!(err.is_retryable(), "{} should be retryable", err.kind());
            assert!(!err.kind().is_input_error());
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        let err = PipelineError::Cancelled {
            stage: PipelineStage::Classifying,
        };
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "assessment cancelled while classifying");
    }

    #[test]
    fn kind_names_are_snake_case() {
        assert_eq!(ErrorKind::PlanQualityExhausted.to_string(), "plan_quality_exhausted");
        assert_eq!(
            serde_json::to_value(ErrorKind::GenerationMalformed).unwrap(),
            serde_json::json!("generation_malformed")
        );
    }
}
