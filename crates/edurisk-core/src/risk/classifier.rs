//! The `RiskPredictor` trait and the adapter that maps its output onto a
//! [`RiskLevel`].
//!
//! The adapter is single-shot: one call to the capability per invocation,
//! bounded by the configured deadline. Retrying is the orchestrator's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, PipelineError};
use crate::metrics::MetricSet;

use super::{PREDICTION_CONTRACT_VERSION, Prediction, PredictionOutput, RiskLevel, RiskThresholds};

/// Adapter interface for an external risk prediction capability.
///
/// Implementors receive a validated [`MetricSet`] and return a raw score or
/// label. The trait is object-safe so the pipeline can hold
/// `Arc<dyn RiskPredictor>`.
#[async_trait]
pub trait RiskPredictor: Send + Sync {
    /// Human-readable name for logs (e.g. "heuristic", "http").
    fn name(&self) -> &str;

    async fn predict(&self, metrics: &MetricSet) -> Result<Prediction, CapabilityError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn RiskPredictor) {}
};

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Deadline for a single prediction call.
    pub timeout_ms: u64,
    /// Contract version predictions must declare.
    pub contract_version: u32,
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            contract_version: PREDICTION_CONTRACT_VERSION,
        }
    }
}

/// A classified risk level plus the raw score when one was provided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assessment {
    pub level: RiskLevel,
    pub score: Option<f64>,
}

/// Invokes a [`RiskPredictor`] and maps its answer through the thresholds.
#[derive(Clone)]
pub struct ClassifierAdapter {
    predictor: Arc<dyn RiskPredictor>,
    thresholds: RiskThresholds,
    config: ClassifierConfig,
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("predictor", &self.predictor.name())
            .field("thresholds", &self.thresholds)
            .field("config", &self.config)
            .finish()
    }
}

impl ClassifierAdapter {
    pub fn new(
        predictor: Arc<dyn RiskPredictor>,
        thresholds: RiskThresholds,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            predictor,
            thresholds,
            config,
        }
    }

    /// Classify once. Fails with `ClassificationTimeout` when the deadline
    /// passes and `ClassificationUnavailable` for unreachable or malformed
    /// answers.
    pub async fn classify(&self, metrics: &MetricSet) -> Result<Assessment, PipelineError> {
        let timeout = self.config.timeout();
        let prediction = match tokio::time::timeout(timeout, self.predictor.predict(metrics)).await
        {
            Err(_) => return Err(PipelineError::ClassificationTimeout { timeout }),
            Ok(Err(e)) => {
                return Err(PipelineError::ClassificationUnavailable {
                    reason: e.to_string(),
                });
            }
            Ok(Ok(p)) => p,
        };

        if prediction.contract_version != self.config.contract_version {
            return Err(PipelineError::ClassificationUnavailable {
                reason: format!(
                    "{} answered with contract version {}, expected {}",
                    self.predictor.name(),
                    prediction.contract_version,
                    self.config.contract_version
                ),
            });
        }

        match prediction.output {
            PredictionOutput::Score(score) if !score.is_finite() => {
                Err(PipelineError::ClassificationUnavailable {
                    reason: format!("{} returned a non-finite score", self.predictor.name()),
                })
            }
            PredictionOutput::Score(score) => Ok(Assessment {
                level: self.thresholds.classify(score),
                score: Some(score),
            }),
            PredictionOutput::Label(level) => Ok(Assessment { level, score: None }),
        }
    }
}
