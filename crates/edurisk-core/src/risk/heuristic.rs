//! Local, deterministic risk predictor.
//!
//! Reproduces the weighted composite model the product shipped with before a
//! hosted model existed: each indicator contributes its normalized health in
//! proportion to its weight, the composite is inverted into a 0-100 risk
//! score, and every indicator below its weak threshold adds a fixed penalty.
//! An indicator under its hard floor lifts the score to at least the floor
//! score, so one collapsed metric cannot be averaged away by strong ones.
//! Raising any indicator never raises the score.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::metrics::{IndicatorSpec, MetricSet};

use super::classifier::RiskPredictor;
use super::Prediction;

/// Default score penalty per weak indicator.
pub const DEFAULT_WEAK_PENALTY: f64 = 5.0;

/// Default minimum score once any indicator breaches its floor. Matches the
/// default high-risk boundary.
pub const DEFAULT_FLOOR_SCORE: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct HeuristicPredictor {
    indicators: Vec<IndicatorSpec>,
    weak_penalty: f64,
    floor_score: f64,
}

impl HeuristicPredictor {
    pub fn new(indicators: Vec<IndicatorSpec>) -> Self {
        Self {
            indicators,
            weak_penalty: DEFAULT_WEAK_PENALTY,
            floor_score: DEFAULT_FLOOR_SCORE,
        }
    }

    pub fn with_weak_penalty(mut self, penalty: f64) -> Self {
        self.weak_penalty = penalty.max(0.0);
        self
    }

    pub fn with_floor_score(mut self, score: f64) -> Self {
        self.floor_score = score.clamp(0.0, 100.0);
        self
    }

    /// Composite risk score in `0.0..=100.0`.
    pub fn score(&self, metrics: &MetricSet) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut weak = 0u32;
        let mut floored = false;

        for spec in &self.indicators {
            let Some(value) = metrics.get(&spec.name) else {
                continue;
            };
            let weight = spec.weight.max(0.0);
            weighted += spec.health(value) * weight;
            total_weight += weight;
            if spec.weak_below.is_some_and(|t| value < t) {
                weak += 1;
            }
            floored |= spec.breaches_floor(value);
        }

        let health = if total_weight > 0.0 {
            weighted / total_weight * 100.0
        } else {
            100.0
        };
        let score = (100.0 - health + f64::from(weak) * self.weak_penalty).clamp(0.0, 100.0);
        if floored {
            score.max(self.floor_score)
        } else {
            score
        }
    }
}

#[async_trait]
impl RiskPredictor for HeuristicPredictor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn predict(&self, metrics: &MetricSet) -> Result<Prediction, CapabilityError> {
        Ok(Prediction::score(self.score(metrics)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricValidator, RawMetrics, default_indicators};
    use crate::risk::{RiskLevel, RiskThresholds};

    fn three_indicators() -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::new("attendance", "Attendance", 0.0, 100.0).with_weak_below(75.0),
            IndicatorSpec::new("avg_score", "Average score", 0.0, 100.0).with_weak_below(60.0),
            IndicatorSpec::new("completion", "Completion", 0.0, 100.0).with_weak_below(60.0),
        ]
    }

    fn metrics(indicators: &[IndicatorSpec], values: &[(&str, f64)]) -> MetricSet {
        let raw: RawMetrics = values.iter().map(|(k, v)| (*k, *v)).collect();
        MetricValidator::new(indicators.to_vec())
            .validate(&raw)
            .unwrap()
    }

    #[test]
    fn struggling_student_scores_critical() {
        let specs = three_indicators();
        let set = metrics(
            &specs,
            &[("attendance", 40.0), ("avg_score", 35.0), ("completion", 20.0)],
        );
        let score = HeuristicPredictor::new(specs).score(&set);
        // 100 - 31.67 + 3 * 5 = 83.33
        assert!((score - 83.333).abs() < 0.01, "score was {score}");
        assert_eq!(RiskThresholds::default().classify(score), RiskLevel::Critical);
    }

    #[test]
    fn healthy_student_scores_low() {
        let specs = three_indicators();
        let set = metrics(
            &specs,
            &[("attendance", 95.0), ("avg_score", 88.0), ("completion", 92.0)],
        );
        let score = HeuristicPredictor::new(specs).score(&set);
        assert_eq!(RiskThresholds::default().classify(score), RiskLevel::Low);
    }

    #[test]
    fn default_profile_weights() {
        let specs = default_indicators();
        let set = metrics(
            &specs,
            &[
                ("attendance_pct", 75.0),
                ("assignment_score", 65.0),
                ("quiz_score", 60.0),
                ("midterm_score", 62.0),
                ("study_hours_per_week", 10.0),
                ("previous_gpa", 6.5),
            ],
        );
        // health = 75*.25 + 65*.2 + 60*.2 + 62*.25 + 50*.05 + 65*.05 = 65.0
        let score = HeuristicPredictor::new(specs).score(&set);
        assert!((score - 35.0).abs() < 1e-9, "score was {score}");
    }

    fn strong_profile(attendance: f64) -> Vec<(&'static str, f64)> {
        vec![
            ("attendance_pct", attendance),
            ("assignment_score", 90.0),
            ("quiz_score", 90.0),
            ("midterm_score", 90.0),
            ("study_hours_per_week", 20.0),
            ("previous_gpa", 9.0),
        ]
    }

    #[test]
    fn breached_floor_forces_high_risk() {
        let specs = default_indicators();
        let predictor = HeuristicPredictor::new(specs.clone());
        let thresholds = RiskThresholds::default();

        let floored = predictor.score(&metrics(&specs, &strong_profile(55.0)));
        assert!(floored >= DEFAULT_FLOOR_SCORE, "score was {floored}");
        assert_eq!(thresholds.classify(floored), RiskLevel::High);

        // Weak but above the floor: the composite alone decides.
        let weak_only = predictor.score(&metrics(&specs, &strong_profile(65.0)));
        assert!(weak_only < DEFAULT_FLOOR_SCORE, "score was {weak_only}");
        assert_eq!(thresholds.classify(weak_only), RiskLevel::Low);
    }

    #[test]
    fn floor_score_is_configurable_and_never_lowers() {
        let specs = default_indicators();
        let set = metrics(&specs, &strong_profile(55.0));
        let raised = HeuristicPredictor::new(specs.clone())
            .with_floor_score(75.0)
            .score(&set);
        assert_eq!(raised, 75.0);

        let mut collapsed = strong_profile(0.0);
        collapsed[1].1 = 0.0;
        collapsed[2].1 = 0.0;
        collapsed[3].1 = 0.0;
        let set = metrics(&specs, &collapsed);
        let base = HeuristicPredictor::new(specs.clone()).with_floor_score(0.0).score(&set);
        let floored = HeuristicPredictor::new(specs).score(&set);
        assert_eq!(base, floored);
        assert!(floored > DEFAULT_FLOOR_SCORE);
    }

    #[test]
    fn score_is_clamped() {
        let specs = three_indicators();
        let set = metrics(
            &specs,
            &[("attendance", 0.0), ("avg_score", 0.0), ("completion", 0.0)],
        );
        let score = HeuristicPredictor::new(specs)
            .with_weak_penalty(50.0)
            .score(&set);
        assert_eq!(score, 100.0);
    }

    #[tokio::test]
    async fn predict_returns_current_contract() {
        let specs = three_indicators();
        let set = metrics(
            &specs,
            &[("attendance", 80.0), ("avg_score", 70.0), ("completion", 65.0)],
        );
        let prediction = HeuristicPredictor::new(specs).predict(&set).await.unwrap();
        assert_eq!(prediction.contract_version, super::super::PREDICTION_CONTRACT_VERSION);
    }
}
