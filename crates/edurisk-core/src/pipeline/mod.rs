//! The assessment orchestrator: sequences validation, classification,
//! cached synthesis, and plan validation for one request, and owns every
//! retry decision.

pub mod retry;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{CacheStatus, CachedPlan, Fingerprint, PlanCache};
use crate::config::{ConfigError, PipelineConfig};
use crate::error::PipelineError;
use crate::metrics::{IndicatorSpec, MetricSet, MetricValidator, RawMetrics, WeakArea};
use crate::plan::{GenerationRequest, ImprovementPlan, PlanValidator, SynthesizerAdapter, TextGenerator};
use crate::risk::{Assessment, ClassifierAdapter, RiskLevel, RiskPredictor};

pub use retry::RetryPolicy;
pub use state::{PipelineStage, StageTracker};

/// How a result was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationMetadata {
    pub fingerprint: Fingerprint,
    pub cache: CacheStatus,
    /// Prediction calls made for this request.
    pub classification_attempts: u32,
    /// Generation calls made by this request; zero when the plan came from
    /// the cache or another request's in-flight synthesis.
    pub synthesis_attempts: u32,
    pub predictor: String,
    pub generator: String,
    pub stages: Vec<PipelineStage>,
    pub completed_at: DateTime<Utc>,
}

/// Everything returned for one successful assessment. Owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub metrics: MetricSet,
    pub risk_level: RiskLevel,
    /// Raw score when the predictor returned one rather than a label.
    pub risk_score: Option<f64>,
    pub weak_areas: Vec<WeakArea>,
    pub plan: ImprovementPlan,
    pub metadata: GenerationMetadata,
}

pub struct Pipeline {
    metrics: MetricValidator,
    classifier: ClassifierAdapter,
    synthesizer: SynthesizerAdapter,
    plans: PlanValidator,
    retry: RetryPolicy,
    cache: PlanCache,
    predictor_name: String,
    generator_name: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("classifier", &self.classifier)
            .field("synthesizer", &self.synthesizer)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Pipeline {
    /// Validate `config` and build every component from it.
    pub fn new(
        config: PipelineConfig,
        predictor: Arc<dyn RiskPredictor>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let predictor_name = predictor.name().to_string();
        let generator_name = generator.name().to_string();
        let mut synthesis = config.synthesis.clone();
        synthesis.constraints.repeat_day_limit = config.validation.repeat_day_limit;
        let plans = PlanValidator::new(
            synthesis.constraints.clone(),
            config.validation,
            config.indicators.clone(),
        );

        Ok(Self {
            metrics: MetricValidator::new(config.indicators),
            classifier: ClassifierAdapter::new(predictor, config.thresholds, config.classifier),
            synthesizer: SynthesizerAdapter::new(generator, synthesis),
            plans,
            retry: config.retry,
            cache: PlanCache::new(config.cache),
            predictor_name,
            generator_name,
        })
    }

    pub fn indicators(&self) -> &[IndicatorSpec] {
        self.metrics.indicators()
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    pub fn predictor_name(&self) -> &str {
        &self.predictor_name
    }

    pub fn generator_name(&self) -> &str {
        &self.generator_name
    }

    /// Assess one student. See [`Self::submit_with_cancel`].
    pub async fn submit(&self, raw: &RawMetrics) -> Result<PipelineResult, PipelineError> {
        self.submit_with_cancel(raw, CancellationToken::new()).await
    }

    /// Assess one student, abandoning the request when `cancel` fires.
    ///
    /// Cancellation is observed at both external calls and surfaces as
    /// [`PipelineError::Cancelled`]. Dropping the returned future has the
    /// same effect on shared state: an in-flight synthesis led by this
    /// request is released so waiting requests can take over.
    pub async fn submit_with_cancel(
        &self,
        raw: &RawMetrics,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("assessment", request_id = %request_id);
        self.run(request_id, raw, &cancel).instrument(span).await
    }

    async fn run(
        &self,
        request_id: Uuid,
        raw: &RawMetrics,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        let mut tracker = StageTracker::new();

        let metrics = match self.metrics.validate(raw) {
            Ok(metrics) => metrics,
            Err(e) => return Err(tracker.fail(e)),
        };

        tracker.advance(PipelineStage::Classifying);
        let (assessment, classification_attempts) =
            match until_cancelled(cancel, self.classify_with_retry(&metrics)).await {
                Some(Ok(classified)) => classified,
                Some(Err(e)) => return Err(tracker.fail(e)),
                None => return Err(cancelled(&mut tracker)),
            };
        tracing::info!(
            risk_level = %assessment.level,
            score = ?assessment.score,
            attempts = classification_attempts,
            "classified"
        );

        let weak_areas = self.metrics.weak_areas(&metrics);
        let fingerprint = Fingerprint::compute(&metrics, assessment.level);
        let request = self.synthesizer.request(
            assessment,
            self.metrics.readings(&metrics),
            weak_areas.clone(),
        );

        tracker.advance(PipelineStage::Synthesizing);
        let synthesized = {
            let stages = &mut tracker;
            let weak = weak_areas.as_slice();
            let synthesis = self.cache.get_or_synthesize(&fingerprint, move || {
                self.synthesize_with_retry(request, weak, stages)
            });
            until_cancelled(cancel, synthesis).await
        };
        let (cached, cache_status) = match synthesized {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => return Err(tracker.fail(e)),
            None => return Err(cancelled(&mut tracker)),
        };

        tracker.advance(PipelineStage::Done);
        let synthesis_attempts = match cache_status {
            CacheStatus::Miss => cached.attempts,
            CacheStatus::Hit | CacheStatus::Joined => 0,
        };
        tracing::info!(
            fingerprint = %fingerprint,
            cache = %cache_status,
            synthesis_attempts,
            "assessment complete"
        );

        Ok(PipelineResult {
            request_id,
            metrics,
            risk_level: assessment.level,
            risk_score: assessment.score,
            weak_areas,
            plan: cached.plan.clone(),
            metadata: GenerationMetadata {
                fingerprint,
                cache: cache_status,
                classification_attempts,
                synthesis_attempts,
                predictor: self.predictor_name.clone(),
                generator: self.generator_name.clone(),
                stages: tracker.history().to_vec(),
                completed_at: Utc::now(),
            },
        })
    }

    /// Classify with backoff between retryable failures.
    async fn classify_with_retry(
        &self,
        metrics: &MetricSet,
    ) -> Result<(Assessment, u32), PipelineError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.classifier.classify(metrics).await {
                Ok(assessment) => return Ok((assessment, attempt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error_kind = %e.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "classification failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }

    /// Generate and validate until a plan is accepted or the attempt budget
    /// is spent. Upstream failures back off; rejections regenerate
    /// immediately with the rejection as feedback. Both draw on the same
    /// budget.
    async fn synthesize_with_retry(
        &self,
        mut request: GenerationRequest,
        weak_areas: &[WeakArea],
        tracker: &mut StageTracker,
    ) -> Result<CachedPlan, PipelineError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            request.attempt = attempt;
            tracing::info!(attempt, max_attempts, "requesting plan");

            match self.synthesizer.synthesize(&request).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error_kind = %e.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "plan generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
                Ok(candidate) => {
                    tracker.advance(PipelineStage::PlanValidating);
                    match self.plans.validate(candidate, request.risk_level, weak_areas) {
                        Ok(plan) => {
                            return Ok(CachedPlan {
                                plan,
                                attempts: attempt,
                            });
                        }
                        Err(rejection) if attempt < max_attempts => {
                            tracing::warn!(
                                attempt,
                                max_attempts,
                                rule = %rejection.rule,
                                detail = %rejection.detail,
                                "plan rejected, regenerating"
                            );
                            request.feedback = Some(rejection.to_string());
                            tracker.advance(PipelineStage::Synthesizing);
                        }
                        Err(rejection) => {
                            tracing::warn!(
                                attempts = attempt,
                                rule = %rejection.rule,
                                "plan quality budget exhausted"
                            );
                            return Err(PipelineError::PlanQualityExhausted {
                                attempts: attempt,
                                last_rejection: rejection,
                            });
                        }
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Race `fut` against `cancel`; `None` means the token fired first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

fn cancelled(tracker: &mut StageTracker) -> PipelineError {
    let stage = tracker.current();
    tracing::info!(stage = %stage, "assessment cancelled");
    tracker.fail(PipelineError::Cancelled { stage })
}
