//! Generation request construction: the output-schema directive and the
//! prompts handed to a text generation capability.
//!
//! This module contains pure logic (no I/O).

use serde::{Deserialize, Serialize};

use crate::metrics::{MetricReading, WeakArea};
use crate::risk::RiskLevel;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Machine-readable format the generator must answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFormat {
    Toml,
}

/// Every improvement plan covers one week.
pub const PLAN_DAYS: u8 = 7;

/// Structural limits the generated plan must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConstraints {
    pub days: u8,
    pub min_recommendations: usize,
    pub max_recommendations: usize,
    pub max_recommendation_chars: usize,
    pub format: PlanFormat,
    /// Mirrors [`super::PlanRules::repeat_day_limit`] so the directive states
    /// the rule the validator enforces. Set by [`crate::Pipeline::new`].
    #[serde(skip_deserializing)]
    pub repeat_day_limit: usize,
}

impl Default for PlanConstraints {
    fn default() -> Self {
        Self {
            days: PLAN_DAYS,
            min_recommendations: 1,
            max_recommendations: 5,
            max_recommendation_chars: 160,
            format: PlanFormat::Toml,
            repeat_day_limit: 3,
        }
    }
}

impl PlanConstraints {
    /// The literal schema directive passed to the generator.
    pub fn schema_directive(&self) -> String {
        format!(
            r#"## Output Schema

Respond with TOML only, matching this schema exactly:

```toml
[[days]]
day = 1                       # REQUIRED. Integer 1..{days}, each exactly once, in order.
focus = "attendance_pct"      # Optional. Indicator name the day targets.
recommendations = [           # REQUIRED. {min} to {max} items.
  "One concrete, actionable step",
]
```

### Rules
- Exactly {days} `[[days]]` tables, numbered 1 through {days} with no gaps.
- Each recommendation is a single imperative sentence of at most {chars} characters.
- Do not repeat the same recommendation on {repeat} or more days.
- No placeholders such as "TBD", "N/A", or "...".
- Target the weakest indicators listed below by name.
"#,
            days = self.days,
            min = self.min_recommendations,
            max = self.max_recommendations,
            chars = self.max_recommendation_chars,
            repeat = self.repeat_day_limit,
        )
    }
}

/// Everything a [`super::TextGenerator`] receives for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub risk_level: RiskLevel,
    pub risk_score: Option<f64>,
    pub readings: Vec<MetricReading>,
    /// Weakest indicators first.
    pub weak_areas: Vec<WeakArea>,
    pub constraints: PlanConstraints,
    /// 1-based synthesis attempt for this request.
    pub attempt: u32,
    /// Why the previous attempt was rejected, if it was.
    pub feedback: Option<String>,
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

/// System prompt: role, output contract, and schema directive.
pub fn build_system_prompt(constraints: &PlanConstraints) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("# Academic Improvement Planner\n\n");
    prompt.push_str(&format!(
        "You write {}-day improvement plans for students flagged by an academic \
         early-warning system. Each day lists short, concrete actions the student \
         can complete that day.\n\n",
        constraints.days
    ));
    prompt.push_str(
        "IMPORTANT: Output only the plan in the schema below. Do not add \
         commentary before or after it.\n\n",
    );
    prompt.push_str(&constraints.schema_directive());

    prompt
}

/// User prompt: the student's risk level, readings, and weak areas.
pub fn build_user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str("## Student Profile\n\n");
    match request.risk_score {
        Some(score) => prompt.push_str(&format!(
            "- **Risk level:** {} (score {score:.1}/100)\n",
            request.risk_level
        )),
        None => prompt.push_str(&format!("- **Risk level:** {}\n", request.risk_level)),
    }

    prompt.push_str("\n### Indicators\n\n");
    for r in &request.readings {
        prompt.push_str(&format!(
            "- `{}` ({}): {} (range {}-{})\n",
            r.name, r.label, r.value, r.min, r.max
        ));
    }

    if request.weak_areas.is_empty() {
        prompt.push_str("\n### Weak Areas\n\nNone below threshold; focus on consistency.\n");
    } else {
        prompt.push_str("\n### Weak Areas (weakest first)\n\n");
        for w in &request.weak_areas {
            prompt.push_str(&format!(
                "- `{}` ({}): {} against a target of {}\n",
                w.name, w.label, w.value, w.threshold
            ));
        }
    }

    if let Some(feedback) = &request.feedback {
        prompt.push_str(&format!(
            "\n## Previous Attempt Rejected\n\nAttempt {} was rejected: {feedback}\n\
             Fix this problem in the new plan.\n",
            request.attempt.saturating_sub(1)
        ));
    }

    prompt
}
