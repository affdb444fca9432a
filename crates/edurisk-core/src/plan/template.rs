//! Deterministic local plan generator.
//!
//! Expands per-risk-level guidance into a multi-day plan. Each day pairs one
//! tier recommendation with one action for a weak indicator, rotating
//! through the weak areas worst first. The reply is TOML in the same schema
//! a remote generator is asked for, so it goes through the same parser and
//! validator.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::metrics::WeakArea;
use crate::risk::RiskLevel;

use super::prompt::GenerationRequest;
use super::synth::TextGenerator;
use super::types::{CandidateDay, CandidatePlan};

const CRITICAL: [&str; 7] = [
    "Meet your academic advisor today to agree on an attendance and score recovery target",
    "Attend every scheduled class and log your attendance before leaving campus",
    "Book a tutoring session aimed at raising your lowest course score",
    "Study for five focused hours, starting with the topic behind your lowest score",
    "Review returned work with your instructor to find where your score dropped",
    "Confirm you attended every session this week and make up any you missed",
    "Compare this week's attendance and scores with your advisor and set next week's targets",
];

const HIGH: [&str; 7] = [
    "Meet your academic advisor to agree on a recovery plan",
    "Block out four to five hours of focused study today",
    "Sign up for tutoring in your weakest subject",
    "Track your attendance and arrive early to every class",
    "Redo one graded assignment you lost marks on",
    "Take a timed practice quiz and correct every mistake",
    "Review the week's progress with your advisor or a tutor",
];

const MEDIUM: [&str; 7] = [
    "Schedule three hours of structured study today",
    "Spend your first study hour on your weakest subject",
    "Summarise today's lectures in one page of notes",
    "Complete one practice set from your weakest topic",
    "Ask one question in class or during office hours",
    "Quiz yourself on this week's material without notes",
    "Run a weekly progress review and set next week's goals",
];

const LOW: [&str; 7] = [
    "Keep your current study routine and note what works",
    "Offer to explain a topic to a classmate as a peer mentor",
    "Start a small advanced learning project in a subject you enjoy",
    "Read one chapter ahead of the syllabus",
    "Attempt a challenge problem beyond the assigned work",
    "Join or start a study group session",
    "Reflect on the week and set one stretch goal",
];

fn tier(level: RiskLevel) -> &'static [&'static str] {
    match level {
        RiskLevel::Critical => &CRITICAL,
        RiskLevel::High => &HIGH,
        RiskLevel::Medium => &MEDIUM,
        RiskLevel::Low => &LOW,
    }
}

/// Built-in actions for the default indicator set.
fn known_actions(indicator: &str) -> Option<[&'static str; 4]> {
    let actions = match indicator {
        "attendance_pct" => [
            "Attend every class today and sit near the front",
            "Plan your route and set two alarms so you reach class on time",
            "Email your instructor to catch up on any class you missed",
            "Keep a written attendance log for the rest of the week",
        ],
        "assignment_score" => [
            "Outline your next assignment today before writing any of it",
            "Check the marking rubric before submitting any assignment",
            "Ask for feedback on a returned assignment and note two fixes",
            "Finish one pending assignment a day before it is due",
        ],
        "quiz_score" => [
            "Take a practice quiz on last week's topic and review errors",
            "Make flashcards for the terms from your last quiz",
            "Redo every question you missed on your last quiz",
            "Spend 20 minutes on spaced recall of quiz material",
        ],
        "midterm_score" => [
            "List the midterm topics you lost marks on",
            "Work one past exam question under timed conditions",
            "Meet your instructor to go through your midterm mistakes",
            "Build a one-page summary sheet for the next exam",
        ],
        "study_hours_per_week" => [
            "Put two fixed study blocks in your calendar today",
            "Study for 90 minutes with your phone out of reach",
            "Log today's study hours and aim for three",
            "Replace one hour of screen time with revision",
        ],
        "previous_gpa" => [
            "List the courses that pulled your GPA down and pick one to prioritise",
            "Meet your advisor to map out a GPA recovery plan",
            "Set a target grade for each course this term",
            "Mark the key assessments in your weakest course's syllabus",
        ],
        _ => return None,
    };
    Some(actions)
}

fn generic_action(label: &str, index: usize) -> String {
    let label = label.to_lowercase();
    match index % 4 {
        0 => format!("Set a specific target for your {label} this week and write it down"),
        1 => format!("Spend 30 focused minutes today on what is holding back your {label}"),
        2 => format!("Ask your instructor for one concrete tip to improve your {label}"),
        _ => format!("Check your {label} against your target and adjust tomorrow's plan"),
    }
}

fn action_for(area: &WeakArea, occurrence: usize) -> String {
    match known_actions(&area.name) {
        Some(actions) => actions[occurrence % actions.len()].to_string(),
        None => generic_action(&area.label, occurrence),
    }
}

/// Local generator backed by fixed guidance templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, request: &GenerationRequest) -> CandidatePlan {
        let guidance = tier(request.risk_level);
        let weak = &request.weak_areas;
        let max = request.constraints.max_recommendations.max(1);

        let days = (1..=request.constraints.days)
            .map(|day| {
                let i = usize::from(day - 1);
                let mut recommendations = Vec::with_capacity(2);
                let mut focus = None;
                if !weak.is_empty() {
                    let area = &weak[i % weak.len()];
                    recommendations.push(action_for(area, i / weak.len()));
                    focus = Some(area.name.clone());
                }
                recommendations.push(guidance[i % guidance.len()].to_string());
                recommendations.truncate(max);
                CandidateDay {
                    day: i64::from(day),
                    focus,
                    recommendations,
                }
            })
            .collect();

        CandidatePlan { days }
    }
}

#[async_trait]
impl TextGenerator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        toml::to_string(&self.plan(request))
            .map_err(|e| CapabilityError::Malformed(format!("template serialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::default_indicators;
    use crate::plan::parser::parse_candidate_plan;
    use crate::plan::prompt::PlanConstraints;
    use crate::plan::validator::{PlanRules, PlanValidator};

    fn weak(name: &str, label: &str) -> WeakArea {
        WeakArea {
            name: name.to_string(),
            label: label.to_string(),
            value: 10.0,
            threshold: 60.0,
            shortfall: 0.5,
        }
    }

    fn request(level: RiskLevel, weak_areas: Vec<WeakArea>) -> GenerationRequest {
        GenerationRequest {
            risk_level: level,
            risk_score: None,
            readings: vec![],
            weak_areas,
            constraints: PlanConstraints::default(),
            attempt: 1,
            feedback: None,
        }
    }

    fn validator() -> PlanValidator {
        PlanValidator::new(PlanConstraints::default(), PlanRules::default(), default_indicators())
    }

    #[tokio::test]
    async fn output_passes_validation_for_every_level() {
        let areas = vec![
            weak("attendance_pct", "Attendance"),
            weak("quiz_score", "Quiz score"),
        ];
        for level in RiskLevel::ALL {
            let req = request(level, areas.clone());
            let text = TemplateGenerator::new().generate(&req).await.unwrap();
            let candidate = parse_candidate_plan(&text).unwrap();
            let plan = validator().validate(candidate, level, &areas).unwrap();
            assert_eq!(plan.days().len(), 7);
        }
    }

    #[test]
    fn passes_validation_without_weak_areas() {
        let req = request(RiskLevel::Low, vec![]);
        let plan = TemplateGenerator::new().plan(&req);
        assert!(plan.days.iter().all(|d| d.focus.is_none()));
        assert!(validator().validate(plan, RiskLevel::Low, &[]).is_ok());
    }

    #[test]
    fn rotates_weak_areas_worst_first() {
        let req = request(
            RiskLevel::High,
            vec![weak("midterm_score", "Midterm"), weak("previous_gpa", "GPA")],
        );
        let plan = TemplateGenerator::new().plan(&req);
        let focus: Vec<&str> = plan.days.iter().filter_map(|d| d.focus.as_deref()).collect();
        assert_eq!(focus[..3], ["midterm_score", "previous_gpa", "midterm_score"]);
    }

    #[test]
    fn single_weak_area_never_repeats_three_times() {
        let areas = vec![weak("attendance_pct", "Attendance")];
        let plan = TemplateGenerator::new().plan(&request(RiskLevel::Medium, areas.clone()));
        assert!(validator().validate(plan, RiskLevel::Medium, &areas).is_ok());
    }

    #[test]
    fn unknown_indicator_uses_label() {
        let areas = vec![weak("completion", "Assignment completion")];
        let plan = TemplateGenerator::new().plan(&request(RiskLevel::High, areas));
        assert!(plan.days[0].recommendations[0].contains("assignment completion"));
    }

    #[test]
    fn critical_guidance_addresses_attendance_or_score() {
        for text in CRITICAL {
            let lower = text.to_lowercase();
            assert!(lower.contains("attend") || lower.contains("score"), "{text}");
        }
    }

    #[test]
    fn honours_recommendation_limit() {
        let mut req = request(RiskLevel::High, vec![weak("quiz_score", "Quiz score")]);
        req.constraints.max_recommendations = 1;
        let plan = TemplateGenerator::new().plan(&req);
        assert!(plan.days.iter().all(|d| d.recommendations.len() == 1));
    }
}
