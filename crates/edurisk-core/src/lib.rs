//! Academic risk assessment and improvement plan synthesis.
//!
//! Raw student metrics flow through a fixed sequence of stages:
//!
//! ```text
//! RawMetrics
//!     |
//!     v
//! MetricValidator ----> MetricSet (immutable)
//!     |
//!     v
//! ClassifierAdapter --predict--> dyn RiskPredictor   ----> RiskLevel
//!     |
//!     v
//! PlanCache (fingerprint of MetricSet + RiskLevel)
//!     |  miss
//!     v
//! SynthesizerAdapter --generate--> dyn TextGenerator ----> CandidatePlan
//!     |
//!     v
//! PlanValidator ------> ImprovementPlan  (or PlanRejection -> regenerate)
//!     |
//!     v
//! PipelineResult
//! ```
//!
//! [`Pipeline::submit`] is the only entry point callers need.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod plan;
pub mod risk;

pub use cache::{CacheConfig, CacheStatus, Fingerprint, PlanCache};
pub use config::{ConfigError, PipelineConfig};
pub use error::{CapabilityError, ErrorKind, PipelineError};
pub use metrics::{IndicatorSpec, MetricSet, MetricValidator, RawMetrics, WeakArea};
pub use pipeline::{GenerationMetadata, Pipeline, PipelineResult, PipelineStage, RetryPolicy};
pub use plan::{
    CandidatePlan, GenerationRequest, HttpGenerator, ImprovementPlan, PlanConstraints, PlanDay,
    PlanRejection, PlanRule, PlanRules, PlanValidator, SynthesisConfig, SynthesizerAdapter,
    TemplateGenerator, TextGenerator,
};
pub use risk::{
    Assessment, ClassifierAdapter, ClassifierConfig, HeuristicPredictor, HttpPredictor, Prediction,
    PredictionOutput, RiskLevel, RiskPredictor, RiskThresholds,
};
