//! Shared test utilities for edurisk integration tests.
//!
//! Provides scripted prediction and generation capabilities that count
//! their calls, and fixture builders for the three-indicator profile used
//! throughout the tests (attendance, average score, assignment completion).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use edurisk_core::{
    CapabilityError, GenerationRequest, IndicatorSpec, MetricSet, PipelineConfig, Prediction,
    RawMetrics, RetryPolicy, RiskPredictor, TextGenerator,
};

/// One scripted capability response.
#[derive(Debug, Clone)]
pub enum Step<T> {
    Reply(T),
    Fail(CapabilityError),
    /// Never answers within any reasonable deadline.
    Stall,
}

struct Script<T> {
    steps: Mutex<VecDeque<Step<T>>>,
    fallback: Step<T>,
    calls: AtomicUsize,
    latency: Duration,
}

impl<T: Clone> Script<T> {
    fn new(fallback: Step<T>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    fn push(&self, steps: impl IntoIterator<Item = Step<T>>) {
        self.steps
            .lock()
            .expect("script lock poisoned")
            .extend(steps);
    }

    async fn next(&self) -> Result<T, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match step {
            Step::Reply(value) => Ok(value),
            Step::Fail(err) => Err(err),
            Step::Stall => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(CapabilityError::Unreachable("stalled".to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Prediction capability that plays back scripted steps, then repeats a
/// fallback.
pub struct ScriptedPredictor {
    script: Script<Prediction>,
}

impl ScriptedPredictor {
    pub fn always(prediction: Prediction) -> Self {
        Self {
            script: Script::new(Step::Reply(prediction)),
        }
    }

    pub fn failing(error: CapabilityError) -> Self {
        Self {
            script: Script::new(Step::Fail(error)),
        }
    }

    pub fn stalling() -> Self {
        Self {
            script: Script::new(Step::Stall),
        }
    }

    /// Queue steps to play before the fallback.
    pub fn then(self, steps: impl IntoIterator<Item = Step<Prediction>>) -> Self {
        self.script.push(steps);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.script.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskPredictor for ScriptedPredictor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn predict(&self, _metrics: &MetricSet) -> Result<Prediction, CapabilityError> {
        self.script.next().await
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Generation capability that plays back scripted replies and records every
/// request it receives.
pub struct ScriptedGenerator {
    script: Script<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            script: Script::new(Step::Reply(text.into())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: CapabilityError) -> Self {
        Self {
            script: Script::new(Step::Fail(error)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn stalling() -> Self {
        Self {
            script: Script::new(Step::Stall),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, steps: impl IntoIterator<Item = Step<String>>) -> Self {
        self.script.push(steps);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.script.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(request.clone());
        self.script.next().await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Attendance, average score, and assignment completion, all 0-100 with
/// equal weight.
pub fn example_indicators() -> Vec<IndicatorSpec> {
    vec![
        IndicatorSpec::new("attendance", "Attendance", 0.0, 100.0)
            .with_weak_below(75.0)
            .with_keywords(["attend", "class"]),
        IndicatorSpec::new("avg_score", "Average score", 0.0, 100.0)
            .with_weak_below(60.0)
            .with_keywords(["score", "grade", "exam"]),
        IndicatorSpec::new("completion", "Assignment completion", 0.0, 100.0)
            .with_weak_below(70.0)
            .with_keywords(["assignment", "complete"]),
    ]
}

/// Default configuration over [`example_indicators`] with deterministic,
/// short backoff.
pub fn example_config() -> PipelineConfig {
    PipelineConfig {
        indicators: example_indicators(),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: false,
        },
        ..PipelineConfig::default()
    }
}

pub fn raw(values: &[(&str, f64)]) -> RawMetrics {
    values.iter().map(|(name, value)| (*name, *value)).collect()
}

/// The at-risk student: attendance 40, average score 35, completion 20.
pub fn example_student() -> RawMetrics {
    raw(&[("attendance", 40.0), ("avg_score", 35.0), ("completion", 20.0)])
}

pub fn healthy_student() -> RawMetrics {
    raw(&[("attendance", 96.0), ("avg_score", 88.0), ("completion", 100.0)])
}

const PLAN_DAYS: [(&str, &str); 7] = [
    ("attendance", "Attend every class today and sit in the front row"),
    ("avg_score", "Redo the three quiz questions that cost you the most score"),
    ("completion", "Finish the overdue assignment so it counts toward your score"),
    ("attendance", "Email your instructor about the classes you missed"),
    ("avg_score", "Book a tutoring slot to raise your exam score"),
    ("completion", "Check tomorrow's assignment against the score rubric"),
    ("avg_score", "Review the week's grades and attendance with your advisor"),
];

/// A seven-day plan that passes every validation rule.
pub fn valid_plan_toml() -> String {
    plan_toml(&PLAN_DAYS[..])
}

/// Six days only.
pub fn short_plan_toml() -> String {
    plan_toml(&PLAN_DAYS[..6])
}

/// Seven days with the same recommendation every day.
pub fn repetitive_plan_toml() -> String {
    let days: Vec<(&str, &str)> = (0..7)
        .map(|_| ("attendance", "Attend class and study hard"))
        .collect();
    plan_toml(&days)
}

fn plan_toml(days: &[(&str, &str)]) -> String {
    days.iter()
        .enumerate()
        .map(|(i, (focus, rec))| {
            format!(
                "[[days]]\nday = {}\nfocus = \"{focus}\"\nrecommendations = [\"{rec}\"]\n",
                i + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_well_formed() {
        assert_eq!(example_student().len(), 3);
        assert!(example_config().validate().is_ok());
        assert_eq!(valid_plan_toml().matches("[[days]]").count(), 7);
        assert_eq!(short_plan_toml().matches("[[days]]").count(), 6);
    }

    #[tokio::test]
    async fn script_plays_steps_then_fallback() {
        let generator = ScriptedGenerator::always("fallback").then([
            Step::Fail(CapabilityError::Unreachable("down".to_string())),
            Step::Reply("first".to_string()),
        ]);
        let request = GenerationRequest {
            risk_level: edurisk_core::RiskLevel::Low,
            risk_score: None,
            readings: vec![],
            weak_areas: vec![],
            constraints: Default::default(),
            attempt: 1,
            feedback: None,
        };
        assert!(generator.generate(&request).await.is_err());
        assert_eq!(generator.generate(&request).await.unwrap(), "first");
        assert_eq!(generator.generate(&request).await.unwrap(), "fallback");
        assert_eq!(generator.calls(), 3);
        assert_eq!(generator.requests().len(), 3);
    }
}
