//! Plan data types: the loosely-typed candidate parsed from generator
//! output, and the validated [`ImprovementPlan`].

use serde::{Deserialize, Serialize};

use crate::risk::RiskLevel;

/// Generator output after parsing, before any quality checks.
///
/// Day indices are kept as signed integers so out-of-range values survive
/// parsing and can be reported by the validator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePlan {
    #[serde(default)]
    pub days: Vec<CandidateDay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDay {
    pub day: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// One validated day of an improvement plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanDay {
    /// 1-based day index.
    pub day: u8,
    /// Indicator or theme the day concentrates on.
    pub focus: Option<String>,
    /// Ordered, non-empty list of actionable items.
    pub recommendations: Vec<String>,
}

/// A validated multi-day plan.
///
/// Constructed only by [`super::PlanValidator`], so `days` is always
/// contiguous from 1, ordered, and every day has at least one
/// recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImprovementPlan {
    risk_level: RiskLevel,
    days: Vec<PlanDay>,
}

impl ImprovementPlan {
    pub(crate) fn new(risk_level: RiskLevel, days: Vec<PlanDay>) -> Self {
        Self { risk_level, days }
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn days(&self) -> &[PlanDay] {
        &self.days
    }

    pub fn day(&self, index: u8) -> Option<&PlanDay> {
        self.days.iter().find(|d| d.day == index)
    }

    /// Total number of recommendations across all days.
    pub fn recommendation_count(&self) -> usize {
        self.days.iter().map(|d| d.recommendations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_parses_from_toml_with_defaults() {
        let plan: CandidatePlan = toml::from_str(
            r#"
[[days]]
day = 1
recommendations = ["Attend every class"]

[[days]]
day = 2
focus = "quiz_score"
"#,
        )
        .unwrap();
        assert_eq!(plan.days.len(), 2);
        assert!(plan.days[0].focus.is_none());
        assert!(plan.days[1].recommendations.is_empty());
        assert_eq!(plan.days[1].focus.as_deref(), Some("quiz_score"));
    }

    #[test]
    fn candidate_serializes_as_array_of_tables() {
        let plan = CandidatePlan {
            days: vec![CandidateDay {
                day: 1,
                focus: None,
                recommendations: vec!["Review notes".to_string()],
            }],
        };
        let text = toml::to_string(&plan).unwrap();
        assert!(text.contains("[[days]]"));
        assert!(!text.contains("focus"));
    }

    #[test]
    fn plan_accessors() {
        let plan = ImprovementPlan::new(
            RiskLevel::High,
            vec![
                PlanDay {
                    day: 1,
                    focus: None,
                    recommendations: vec!["a b".to_string(), "c d".to_string()],
                },
                PlanDay {
                    day: 2,
                    focus: Some("attendance".to_string()),
                    recommendations: vec!["e f".to_string()],
                },
            ],
        );
        assert_eq!(plan.risk_level(), RiskLevel::High);
        assert_eq!(plan.recommendation_count(), 3);
        assert_eq!(plan.day(2).unwrap().focus.as_deref(), Some("attendance"));
        assert!(plan.day(3).is_none());
    }
}
