//! Plan validation: structural and content checks on generated plans.
//!
//! Rules are checked in a fixed order and the first violation is returned:
//!
//! 1. `day_count`       -- exactly the configured number of days.
//! 2. `day_index`       -- every index within `1..=days`.
//! 3. `duplicate_day`   -- no index appears twice (with 1 and 2 this makes
//!                         the indices contiguous).
//! 4. per day, in index order: `empty_day`, `empty_recommendation`,
//!    `too_few_recommendations`, `too_many_recommendations`,
//!    `recommendation_too_long`, `placeholder`.
//! 5. `repeated_recommendation` -- the same (or near-identical) text on
//!    `repeat_day_limit` or more days.
//! 6. `unfocused` -- fewer than `min_focused_days` days address a weak area.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::{IndicatorSpec, WeakArea};
use crate::risk::RiskLevel;

use super::prompt::PlanConstraints;
use super::types::{CandidatePlan, ImprovementPlan, PlanDay};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Content-quality settings for plan validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanRules {
    /// Reject a recommendation that appears on this many days or more.
    pub repeat_day_limit: usize,
    /// Word-set (Jaccard) similarity at or above which two recommendations
    /// count as the same text. `1.0` means exact match after normalization.
    pub similarity: f64,
    /// Minimum days that must address a weak area (when any exist).
    pub min_focused_days: usize,
    /// Whole recommendations that are placeholders after normalization.
    pub placeholder_patterns: Vec<String>,
    /// Fragments that mark a recommendation as unfinished wherever they occur.
    pub placeholder_markers: Vec<String>,
}

impl Default for PlanRules {
    fn default() -> Self {
        Self {
            repeat_day_limit: 3,
            similarity: 0.9,
            min_focused_days: 1,
            placeholder_patterns: ["tbd", "todo", "n a", "na", "none", "placeholder", "xxx", "etc"]
                .into_iter()
                .map(String::from)
                .collect(),
            placeholder_markers: ["lorem ipsum", "[insert", "<insert", "recommendation here"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// The rule a rejected plan violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanRule {
    DayCount,
    DayIndex,
    DuplicateDay,
    EmptyDay,
    EmptyRecommendation,
    TooFewRecommendations,
    TooManyRecommendations,
    RecommendationTooLong,
    Placeholder,
    RepeatedRecommendation,
    Unfocused,
}

impl fmt::Display for PlanRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DayCount => "day_count",
            Self::DayIndex => "day_index",
            Self::DuplicateDay => "duplicate_day",
            Self::EmptyDay => "empty_day",
            Self::EmptyRecommendation => "empty_recommendation",
            Self::TooFewRecommendations => "too_few_recommendations",
            Self::TooManyRecommendations => "too_many_recommendations",
            Self::RecommendationTooLong => "recommendation_too_long",
            Self::Placeholder => "placeholder",
            Self::RepeatedRecommendation => "repeated_recommendation",
            Self::Unfocused => "unfocused",
        };
        f.write_str(s)
    }
}

/// Why a candidate plan was rejected.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{rule}: {detail}")]
pub struct PlanRejection {
    pub rule: PlanRule,
    /// Day index the violation was found on, when it is day-specific.
    pub day: Option<i64>,
    pub detail: String,
}

impl PlanRejection {
    fn new(rule: PlanRule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            day: None,
            detail: detail.into(),
        }
    }

    fn on_day(rule: PlanRule, day: i64, detail: impl Into<String>) -> Self {
        Self {
            rule,
            day: Some(day),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlanValidator {
    constraints: PlanConstraints,
    rules: PlanRules,
    indicators: Vec<IndicatorSpec>,
}

impl PlanValidator {
    pub fn new(constraints: PlanConstraints, rules: PlanRules, indicators: Vec<IndicatorSpec>) -> Self {
        Self {
            constraints,
            rules,
            indicators,
        }
    }

    /// Validate a candidate and produce an [`ImprovementPlan`] ordered by day.
    pub fn validate(
        &self,
        candidate: CandidatePlan,
        risk_level: RiskLevel,
        weak_areas: &[WeakArea],
    ) -> Result<ImprovementPlan, PlanRejection> {
        let expected = usize::from(self.constraints.days);
        if candidate.days.len() != expected {
            return Err(PlanRejection::new(
                PlanRule::DayCount,
                format!("expected {expected} days, got {}", candidate.days.len()),
            ));
        }

        let mut seen = HashSet::new();
        for day in &candidate.days {
            if day.day < 1 || day.day > i64::from(self.constraints.days) {
                return Err(PlanRejection::on_day(
                    PlanRule::DayIndex,
                    day.day,
                    format!("day index {} is outside 1..={}", day.day, self.constraints.days),
                ));
            }
            if !seen.insert(day.day) {
                return Err(PlanRejection::on_day(
                    PlanRule::DuplicateDay,
                    day.day,
                    format!("day {} appears more than once", day.day),
                ));
            }
        }

        let mut candidate_days = candidate.days;
        candidate_days.sort_by_key(|d| d.day);

        let mut days = Vec::with_capacity(expected);
        for day in candidate_days {
            let recommendations: Vec<String> = day
                .recommendations
                .iter()
                .map(|r| r.trim().to_string())
                .collect();
            self.check_day(day.day, &recommendations)?;
            days.push(PlanDay {
                // Range-checked above.
                day: day.day as u8,
                focus: day
                    .focus
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty()),
                recommendations,
            });
        }

        self.check_repetition(&days)?;
        self.check_focus(&days, weak_areas)?;

        Ok(ImprovementPlan::new(risk_level, days))
    }

    fn check_day(&self, day: i64, recommendations: &[String]) -> Result<(), PlanRejection> {
        if recommendations.is_empty() {
            return Err(PlanRejection::on_day(
                PlanRule::EmptyDay,
                day,
                format!("day {day} has no recommendations"),
            ));
        }
        if recommendations.iter().any(|r| r.is_empty()) {
            return Err(PlanRejection::on_day(
                PlanRule::EmptyRecommendation,
                day,
                format!("day {day} contains an empty recommendation"),
            ));
        }
        if recommendations.len() < self.constraints.min_recommendations {
            return Err(PlanRejection::on_day(
                PlanRule::TooFewRecommendations,
                day,
                format!(
                    "day {day} has {} recommendations, minimum is {}",
                    recommendations.len(),
                    self.constraints.min_recommendations
                ),
            ));
        }
        if recommendations.len() > self.constraints.max_recommendations {
            return Err(PlanRejection::on_day(
                PlanRule::TooManyRecommendations,
                day,
                format!(
                    "day {day} has {} recommendations, maximum is {}",
                    recommendations.len(),
                    self.constraints.max_recommendations
                ),
            ));
        }
        for rec in recommendations {
            let chars = rec.chars().count();
            if chars > self.constraints.max_recommendation_chars {
                return Err(PlanRejection::on_day(
                    PlanRule::RecommendationTooLong,
                    day,
                    format!(
                        "day {day} recommendation is {chars} characters, limit is {}",
                        self.constraints.max_recommendation_chars
                    ),
                ));
            }
            if self.is_placeholder(rec) {
                return Err(PlanRejection::on_day(
                    PlanRule::Placeholder,
                    day,
                    format!("day {day} recommendation {rec:?} is a placeholder"),
                ));
            }
        }
        Ok(())
    }

    fn is_placeholder(&self, rec: &str) -> bool {
        let normalized = normalize(rec);
        if normalized.is_empty() {
            return true;
        }
        if self
            .rules
            .placeholder_patterns
            .iter()
            .any(|p| normalize(p) == normalized)
        {
            return true;
        }
        let lower = rec.to_lowercase();
        self.rules
            .placeholder_markers
            .iter()
            .any(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
    }

    fn check_repetition(&self, days: &[PlanDay]) -> Result<(), PlanRejection> {
        let limit = self.rules.repeat_day_limit;
        if limit < 2 {
            return Ok(());
        }

        let entries: Vec<(u8, &str, BTreeSet<String>)> = days
            .iter()
            .flat_map(|d| {
                d.recommendations
                    .iter()
                    .map(move |r| (d.day, r.as_str(), word_set(r)))
            })
            .collect();

        for (_, text, words) in &entries {
            let on_days: BTreeSet<u8> = entries
                .iter()
                .filter(|(_, _, other)| similarity(words, other) >= self.rules.similarity)
                .map(|(day, _, _)| *day)
                .collect();
            if on_days.len() >= limit {
                let listed: Vec<String> = on_days.iter().map(u8::to_string).collect();
                return Err(PlanRejection::new(
                    PlanRule::RepeatedRecommendation,
                    format!("{text:?} is repeated on days {}", listed.join(", ")),
                ));
            }
        }
        Ok(())
    }

    fn check_focus(&self, days: &[PlanDay], weak_areas: &[WeakArea]) -> Result<(), PlanRejection> {
        let required = self.rules.min_focused_days.min(days.len());
        if weak_areas.is_empty() || required == 0 {
            return Ok(());
        }

        let targets: Vec<&IndicatorSpec> = weak_areas
            .iter()
            .filter_map(|w| self.indicators.iter().find(|s| s.name == w.name))
            .collect();

        let focused = days
            .iter()
            .filter(|day| {
                targets.iter().any(|spec| {
                    day.focus
                        .as_deref()
                        .is_some_and(|f| f == spec.name || spec.is_mentioned_in(f))
                        || day.recommendations.iter().any(|r| spec.is_mentioned_in(r))
                })
            })
            .count();

        if focused < required {
            let names: Vec<&str> = weak_areas.iter().map(|w| w.name.as_str()).collect();
            return Err(PlanRejection::new(
                PlanRule::Unfocused,
                format!(
                    "{focused} of {} days address the weak areas ({}), need at least {required}",
                    days.len(),
                    names.join(", ")
                ),
            ));
        }
        Ok(())
    }
}

/// Lowercase, replace punctuation with spaces, and collapse whitespace.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn word_set(text: &str) -> BTreeSet<String> {
    normalize(text).split(' ').filter(|w| !w.is_empty()).map(String::from).collect()
}

/// Jaccard similarity of two word sets.
fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let total = a.union(b).count();
    shared as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::CandidateDay;

    fn indicators() -> Vec<IndicatorSpec> {
        vec![
            IndicatorSpec::new("attendance", "Attendance", 0.0, 100.0)
                .with_weak_below(75.0)
                .with_keywords(["attend"]),
            IndicatorSpec::new("avg_score", "Average score", 0.0, 100.0)
                .with_weak_below(60.0)
                .with_keywords(["score", "grade"]),
        ]
    }

    fn weak_attendance() -> Vec<WeakArea> {
        vec![WeakArea {
            name: "attendance".to_string(),
            label: "Attendance".to_string(),
            value: 40.0,
            threshold: 75.0,
            shortfall: 0.47,
        }]
    }

    fn validator() -> PlanValidator {
        PlanValidator::new(PlanConstraints::default(), PlanRules::default(), indicators())
    }

    const DISTINCT: [&str; 7] = [
        "Attend every lecture and sit in the front row",
        "Rewrite your lecture notes from Monday in your own words",
        "Complete ten practice problems from chapter three",
        "Meet your tutor to go over last week's quiz mistakes",
        "Plan next week's study blocks in a calendar",
        "Explain one difficult concept aloud to a classmate",
        "Review the week and list two things to improve",
    ];

    fn good_candidate() -> CandidatePlan {
        CandidatePlan {
            days: (1..=7)
                .map(|d| CandidateDay {
                    day: d,
                    focus: None,
                    recommendations: vec![DISTINCT[(d - 1) as usize].to_string()],
                })
                .collect(),
        }
    }

    fn rejection(candidate: CandidatePlan) -> PlanRejection {
        validator()
            .validate(candidate, RiskLevel::High, &weak_attendance())
            .unwrap_err()
    }

    #[test]
    fn accepts_well_formed_plan() {
        let plan = validator()
            .validate(good_candidate(), RiskLevel::High, &weak_attendance())
            .unwrap();
        assert_eq!(plan.days().len(), 7);
        let indices: Vec<u8> = plan.days().iter().map(|d| d.day).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(plan.risk_level(), RiskLevel::High);
    }

    #[test]
    fn out_of_order_days_are_sorted() {
        let mut candidate = good_candidate();
        candidate.days.reverse();
        let plan = validator()
            .validate(candidate, RiskLevel::High, &weak_attendance())
            .unwrap();
        assert_eq!(plan.days()[0].day, 1);
        assert_eq!(plan.days()[6].day, 7);
    }

    #[test]
    fn rejects_wrong_day_count() {
        let mut candidate = good_candidate();
        candidate.days.pop();
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::DayCount);
        assert!(r.detail.contains("expected 7 days, got 6"));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let mut candidate = good_candidate();
        candidate.days[6].day = 8;
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::DayIndex);
        assert_eq!(r.day, Some(8));

        let mut candidate = good_candidate();
        candidate.days[0].day = 0;
        assert_eq!(rejection(candidate).rule, PlanRule::DayIndex);
    }

    #[test]
    fn rejects_duplicate_index() {
        let mut candidate = good_candidate();
        candidate.days[6].day = 3;
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::DuplicateDay);
        assert_eq!(r.day, Some(3));
    }

    #[test]
    fn rejects_empty_day() {
        let mut candidate = good_candidate();
        candidate.days[3].recommendations.clear();
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::EmptyDay);
        assert_eq!(r.day, Some(4));
        assert_eq!(r.to_string(), "empty_day: day 4 has no recommendations");
    }

    #[test]
    fn rejects_blank_recommendation() {
        let mut candidate = good_candidate();
        candidate.days[2].recommendations.push("   ".to_string());
        assert_eq!(rejection(candidate).rule, PlanRule::EmptyRecommendation);
    }

    #[test]
    fn rejects_too_many_recommendations() {
        let mut candidate = good_candidate();
        candidate.days[1].recommendations = (0..6).map(|i| format!("Distinct task number {i}")).collect();
        assert_eq!(rejection(candidate).rule, PlanRule::TooManyRecommendations);
    }

    #[test]
    fn rejects_too_few_recommendations() {
        let v = PlanValidator::new(
            PlanConstraints {
                min_recommendations: 2,
                ..PlanConstraints::default()
            },
            PlanRules::default(),
            indicators(),
        );
        let r = v
            .validate(good_candidate(), RiskLevel::Low, &[])
            .unwrap_err();
        assert_eq!(r.rule, PlanRule::TooFewRecommendations);
    }

    #[test]
    fn rejects_overlong_recommendation() {
        let mut candidate = good_candidate();
        candidate.days[5].recommendations = vec!["word ".repeat(40)];
        assert_eq!(rejection(candidate).rule, PlanRule::RecommendationTooLong);
    }

    #[test]
    fn rejects_placeholders() {
        for text in ["TBD", "...", "N/A", "Lorem ipsum dolor sit amet", "[Insert activity]"] {
            let mut candidate = good_candidate();
            candidate.days[4].recommendations = vec![text.to_string()];
            let r = rejection(candidate);
            assert_eq!(r.rule, PlanRule::Placeholder, "{text:?} should be a placeholder");
        }
    }

    #[test]
    fn rejects_text_repeated_on_three_days() {
        let mut candidate = good_candidate();
        for i in [1, 3, 5] {
            candidate.days[i].recommendations.push("Study for two hours".to_string());
        }
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::RepeatedRecommendation);
        assert!(r.detail.contains("days 2, 4, 6"));
    }

    #[test]
    fn near_identical_text_counts_as_repeated() {
        let mut candidate = good_candidate();
        candidate.days[1].recommendations.push("Study for two hours.".to_string());
        candidate.days[3].recommendations.push("study for TWO hours".to_string());
        candidate.days[5].recommendations.push("Study  for two hours!".to_string());
        assert_eq!(rejection(candidate).rule, PlanRule::RepeatedRecommendation);
    }

    #[test]
    fn repetition_on_two_days_is_allowed() {
        let mut candidate = good_candidate();
        candidate.days[1].recommendations.push("Study for two hours".to_string());
        candidate.days[3].recommendations.push("Study for two hours".to_string());
        assert!(
            validator()
                .validate(candidate, RiskLevel::High, &weak_attendance())
                .is_ok()
        );
    }

    #[test]
    fn repetition_limit_is_configurable() {
        let v = PlanValidator::new(
            PlanConstraints::default(),
            PlanRules {
                repeat_day_limit: 2,
                ..PlanRules::default()
            },
            indicators(),
        );
        let mut candidate = good_candidate();
        candidate.days[1].recommendations.push("Study for two hours".to_string());
        candidate.days[3].recommendations.push("Study for two hours".to_string());
        let r = v
            .validate(candidate, RiskLevel::High, &weak_attendance())
            .unwrap_err();
        assert_eq!(r.rule, PlanRule::RepeatedRecommendation);
    }

    #[test]
    fn rejects_plan_ignoring_weak_areas() {
        let mut candidate = good_candidate();
        // Day 1 is the only one mentioning attendance.
        candidate.days[0].recommendations = vec!["Sleep eight hours tonight".to_string()];
        let r = rejection(candidate);
        assert_eq!(r.rule, PlanRule::Unfocused);
        assert!(r.detail.contains("attendance"));
    }

    #[test]
    fn focus_tag_satisfies_focus_rule() {
        let mut candidate = good_candidate();
        candidate.days[0].recommendations = vec!["Sleep eight hours tonight".to_string()];
        candidate.days[0].focus = Some("attendance".to_string());
        assert!(
            validator()
                .validate(candidate, RiskLevel::High, &weak_attendance())
                .is_ok()
        );
    }

    #[test]
    fn focus_rule_skipped_without_weak_areas() {
        let mut candidate = good_candidate();
        candidate.days[0].recommendations = vec!["Sleep eight hours tonight".to_string()];
        assert!(validator().validate(candidate, RiskLevel::Low, &[]).is_ok());
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Study, for TWO hours! "), "study for two hours");
        assert_eq!(normalize("..."), "");
        assert_eq!(normalize("N/A"), "n a");
    }

    #[test]
    fn similarity_of_word_sets() {
        let a = word_set("review your quiz answers");
        let b = word_set("review quiz answers");
        assert!((similarity(&a, &b) - 0.75).abs() < 1e-9);
        assert_eq!(similarity(&a, &a), 1.0);
    }
}
