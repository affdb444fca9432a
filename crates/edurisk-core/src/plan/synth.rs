//! The `TextGenerator` trait and the adapter that turns its output into a
//! [`CandidatePlan`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CapabilityError, PipelineError};
use crate::metrics::{MetricReading, WeakArea};
use crate::risk::Assessment;

use super::parser::parse_candidate_plan;
use super::prompt::{GenerationRequest, PlanConstraints};
use super::types::CandidatePlan;

/// Adapter interface for an external text generation capability.
///
/// Implementors receive the full [`GenerationRequest`], including the
/// schema constraints, and return raw text expected to parse as a plan.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Human-readable name for logs (e.g. "template", "http").
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn TextGenerator) {}
};

/// Synthesis settings: the per-call deadline plus the plan shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub constraints: PlanConstraints,
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            constraints: PlanConstraints::default(),
        }
    }
}

/// Invokes a [`TextGenerator`] once and parses the reply.
#[derive(Clone)]
pub struct SynthesizerAdapter {
    generator: Arc<dyn TextGenerator>,
    config: SynthesisConfig,
}

impl std::fmt::Debug for SynthesizerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesizerAdapter")
            .field("generator", &self.generator.name())
            .field("config", &self.config)
            .finish()
    }
}

impl SynthesizerAdapter {
    pub fn new(generator: Arc<dyn TextGenerator>, config: SynthesisConfig) -> Self {
        Self { generator, config }
    }

    pub fn constraints(&self) -> &PlanConstraints {
        &self.config.constraints
    }

    /// Build the first-attempt request for an assessment.
    pub fn request(
        &self,
        assessment: Assessment,
        readings: Vec<MetricReading>,
        weak_areas: Vec<WeakArea>,
    ) -> GenerationRequest {
        GenerationRequest {
            risk_level: assessment.level,
            risk_score: assessment.score,
            readings,
            weak_areas,
            constraints: self.config.constraints.clone(),
            attempt: 1,
            feedback: None,
        }
    }

    /// Generate once and parse. Fails with `GenerationTimeout`,
    /// `GenerationUnavailable`, or `GenerationMalformed`.
    pub async fn synthesize(
        &self,
        request: &GenerationRequest,
    ) -> Result<CandidatePlan, PipelineError> {
        let timeout = self.config.timeout();
        let text = match tokio::time::timeout(timeout, self.generator.generate(request)).await {
            Err(_) => return Err(PipelineError::GenerationTimeout { timeout }),
            Ok(Err(CapabilityError::Unreachable(reason))) => {
                return Err(PipelineError::GenerationUnavailable { reason });
            }
            Ok(Err(CapabilityError::Malformed(reason))) => {
                return Err(PipelineError::GenerationMalformed { reason });
            }
            Ok(Ok(text)) => text,
        };

        debug!(
            generator = self.generator.name(),
            attempt = request.attempt,
            bytes = text.len(),
            "generator replied"
        );

        parse_candidate_plan(&text).map_err(|e| PipelineError::GenerationMalformed {
            reason: e.to_string(),
        })
    }
}
