//! Risk levels and the classifier adapter.
//!
//! # Architecture
//!
//! ```text
//! ClassifierAdapter
//!     |   timeout(predict(metrics))
//!     v
//! dyn RiskPredictor ---> Prediction { contract_version, Score | Label }
//!     |
//!     v
//! RiskThresholds::classify(score) ---> RiskLevel
//! ```

pub mod classifier;
pub mod heuristic;
pub mod http;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use classifier::{Assessment, ClassifierAdapter, ClassifierConfig, RiskPredictor};
pub use heuristic::HeuristicPredictor;
pub use http::HttpPredictor;

/// Version of the prediction contract this build understands.
pub const PREDICTION_CONTRACT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

/// Ordered severity classification. `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = RiskLevelParseError;

    /// Case-insensitive, since external models return labels like `"High"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(RiskLevelParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`RiskLevel`] string.
#[derive(Debug, Clone)]
pub struct RiskLevelParseError(pub String);

impl fmt::Display for RiskLevelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid risk level: {:?}", self.0)
    }
}

impl std::error::Error for RiskLevelParseError {}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Ordered cut points mapping a raw risk score onto a [`RiskLevel`].
///
/// `score < low_below` is Low, `< medium_below` is Medium,
/// `< high_below` is High, anything else is Critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low_below: f64,
    pub medium_below: f64,
    pub high_below: f64,
}

impl RiskThresholds {
    pub fn new(low_below: f64, medium_below: f64, high_below: f64) -> Self {
        Self {
            low_below,
            medium_below,
            high_below,
        }
    }

    pub fn classify(&self, score: f64) -> RiskLevel {
        if score < self.low_below {
            RiskLevel::Low
        } else if score < self.medium_below {
            RiskLevel::Medium
        } else if score < self.high_below {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    /// Cut points must be finite and strictly increasing.
    pub fn is_ordered(&self) -> bool {
        [self.low_below, self.medium_below, self.high_below]
            .iter()
            .all(|t| t.is_finite())
            && self.low_below < self.medium_below
            && self.medium_below < self.high_below
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self::new(30.0, 50.0, 70.0)
    }
}

// ---------------------------------------------------------------------------
// Prediction contract
// ---------------------------------------------------------------------------

/// Output of a prediction capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Contract version the capability answered under.
    pub contract_version: u32,
    pub output: PredictionOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionOutput {
    /// Scalar risk score; higher is riskier.
    Score(f64),
    /// The capability classified directly.
    Label(RiskLevel),
}

impl Prediction {
    pub fn score(score: f64) -> Self {
        Self {
            contract_version: PREDICTION_CONTRACT_VERSION,
            output: PredictionOutput::Score(score),
        }
    }

    pub fn label(level: RiskLevel) -> Self {
        Self {
            contract_version: PREDICTION_CONTRACT_VERSION,
            output: PredictionOutput::Label(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::ALL.iter().max(), Some(&RiskLevel::Critical));
    }

    #[test]
    fn level_display_roundtrip() {
        for level in RiskLevel::ALL {
            let parsed: RiskLevel = level.to_string().parse().unwrap();
            assert_eq!(parsed, level);
        }
    }

    #[test]
    fn level_parse_is_case_insensitive() {
        assert_eq!("High".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!(" CRITICAL ".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn thresholds_classify_at_cut_points() {
        let t = RiskThresholds::default();
        assert_eq!(t.classify(0.0), RiskLevel::Low);
        assert_eq!(t.classify(29.99), RiskLevel::Low);
        assert_eq!(t.classify(30.0), RiskLevel::Medium);
        assert_eq!(t.classify(50.0), RiskLevel::High);
        assert_eq!(t.classify(69.9), RiskLevel::High);
        assert_eq!(t.classify(70.0), RiskLevel::Critical);
        assert_eq!(t.classify(100.0), RiskLevel::Critical);
    }

    #[test]
    fn thresholds_must_increase() {
        assert!(RiskThresholds::default().is_ordered());
        assert!(!RiskThresholds::new(30.0, 30.0, 70.0).is_ordered());
        assert!(!RiskThresholds::new(50.0, 30.0, 70.0).is_ordered());
        assert!(!RiskThresholds::new(f64::NAN, 30.0, 70.0).is_ordered());
    }

    #[test]
    fn prediction_serializes_tagged_output() {
        let json = serde_json::to_value(Prediction::label(RiskLevel::High)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"contract_version": 1, "output": {"label": "high"}})
        );
    }
}
