//! Pipeline configuration.
//!
//! One [`PipelineConfig`] is built at startup and handed to
//! [`crate::Pipeline::new`], which validates it and passes each section to
//! the component that needs it. Nothing reads configuration from ambient
//! state.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::metrics::{IndicatorSpec, default_indicators};
use crate::pipeline::RetryPolicy;
use crate::plan::{PLAN_DAYS, PlanRules, SynthesisConfig};
use crate::risk::{ClassifierConfig, RiskThresholds};

/// Errors that can occur while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("at least one indicator must be configured")]
    NoIndicators,

    #[error("indicator {0:?} is configured more than once")]
    DuplicateIndicator(String),

    #[error("indicator {name:?} has min {min} not below max {max}")]
    InvalidRange { name: String, min: f64, max: f64 },

    #[error("indicator {name:?} has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },

    #[error("indicator weights must not all be zero")]
    ZeroTotalWeight,

    #[error("risk thresholds must be strictly increasing, got {low_below} / {medium_below} / {high_below}")]
    UnorderedThresholds {
        low_below: f64,
        medium_below: f64,
        high_below: f64,
    },

    #[error("{stage} timeout must be greater than zero")]
    ZeroTimeout { stage: &'static str },

    #[error("plan must span exactly {days} days, got {0}", days = PLAN_DAYS)]
    PlanLength(u8),

    #[error("recommendation bounds {min}..={max} are invalid")]
    InvalidRecommendationBounds { min: usize, max: usize },

    #[error("maximum recommendation length must be greater than zero")]
    ZeroRecommendationLength,

    #[error("similarity threshold {0} must be within (0, 1]")]
    InvalidSimilarity(f64),

    #[error("retry policy must allow at least one attempt")]
    ZeroAttempts,

    #[error("an enabled cache must hold at least one entry")]
    ZeroCacheEntries,
}

/// Every tunable of the pipeline, with documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Required indicators, in report order.
    pub indicators: Vec<IndicatorSpec>,
    /// Score cut points; default 30 / 50 / 70.
    pub thresholds: RiskThresholds,
    pub classifier: ClassifierConfig,
    pub synthesis: SynthesisConfig,
    pub validation: PlanRules,
    pub retry: RetryPolicy,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            indicators: default_indicators(),
            thresholds: RiskThresholds::default(),
            classifier: ClassifierConfig::default(),
            synthesis: SynthesisConfig::default(),
            validation: PlanRules::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings before any component is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indicators.is_empty() {
            return Err(ConfigError::NoIndicators);
        }
        let mut names = HashSet::new();
        for spec in &self.indicators {
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateIndicator(spec.name.clone()));
            }
            if !(spec.min.is_finite() && spec.max.is_finite() && spec.min < spec.max) {
                return Err(ConfigError::InvalidRange {
                    name: spec.name.clone(),
                    min: spec.min,
                    max: spec.max,
                });
            }
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    name: spec.name.clone(),
                    weight: spec.weight,
                });
            }
        }
        if self.indicators.iter().all(|s| s.weight == 0.0) {
            return Err(ConfigError::ZeroTotalWeight);
        }

        if !self.thresholds.is_ordered() {
            let t = self.thresholds;
            return Err(ConfigError::UnorderedThresholds {
                low_below: t.low_below,
                medium_below: t.medium_below,
                high_below: t.high_below,
            });
        }

        if self.classifier.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                stage: "classification",
            });
        }
        if self.synthesis.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout { stage: "synthesis" });
        }

        let c = &self.synthesis.constraints;
        if c.days != PLAN_DAYS {
            return Err(ConfigError::PlanLength(c.days));
        }
        if c.min_recommendations == 0 || c.min_recommendations > c.max_recommendations {
            return Err(ConfigError::InvalidRecommendationBounds {
                min: c.min_recommendations,
                max: c.max_recommendations,
            });
        }
        if c.max_recommendation_chars == 0 {
            return Err(ConfigError::ZeroRecommendationLength);
        }

        let similarity = self.validation.similarity;
        if !(similarity > 0.0 && similarity <= 1.0) {
            return Err(ConfigError::InvalidSimilarity(similarity));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::ZeroCacheEntries);
        }
        Ok(())
    }
}
