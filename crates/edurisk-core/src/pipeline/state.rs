//! Per-request stage machine.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;

/// Stage of a single assessment request.
///
/// ```text
/// validating     -> classifying
/// classifying    -> synthesizing
/// synthesizing   -> plan_validating
/// plan_validating -> synthesizing   (regeneration)
/// plan_validating -> done
/// synthesizing   -> done            (cache hit or joined flight)
/// <any live>     -> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validating,
    Classifying,
    Synthesizing,
    PlanValidating,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Classifying => "classifying",
            Self::Synthesizing => "synthesizing",
            Self::PlanValidating => "plan_validating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Check whether `from -> to` is an edge in the stage graph.
    pub fn is_valid_transition(from: PipelineStage, to: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (from, to),
            (Validating, Classifying)
                | (Classifying, Synthesizing)
                | (Synthesizing, PlanValidating)
                | (PlanValidating, Synthesizing)
                | (PlanValidating, Done)
                | (Synthesizing, Done)
        ) || (to == Failed && !from.is_terminal())
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the path a request takes through the stage graph.
#[derive(Debug, Clone)]
pub struct StageTracker {
    history: Vec<PipelineStage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            history: vec![PipelineStage::Validating],
        }
    }

    pub fn current(&self) -> PipelineStage {
        *self.history.last().unwrap_or(&PipelineStage::Validating)
    }

    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }

    pub fn advance(&mut self, to: PipelineStage) {
        let from = self.current();
        debug_assert!(
            PipelineStage::is_valid_transition(from, to),
            "invalid stage transition: {from} -> {to}"
        );
        info!(from = %from, stage = %to, "stage transition");
        self.history.push(to);
    }

    /// Move to `failed` and hand the error back for propagation.
    pub fn fail(&mut self, error: PipelineError) -> PipelineError {
        info!(
            from = %self.current(),
            stage = %PipelineStage::Failed,
            error_kind = %error.kind(),
            "stage transition"
        );
        self.history.push(PipelineStage::Failed);
        error
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}
