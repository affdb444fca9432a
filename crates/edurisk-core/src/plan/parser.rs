//! Parses generator output into a [`CandidatePlan`].
//!
//! Generators are asked for bare TOML but frequently wrap it in a fenced
//! code block or add a sentence of prose. When a fence is present only its
//! contents are parsed. Anything that still fails to parse is malformed;
//! structural and quality checks belong to the validator.

use thiserror::Error;

use super::types::CandidatePlan;

/// Errors that can occur while parsing generator output.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("generator returned no content")]
    Empty,

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("output contains no [[days]] tables")]
    NoDays,
}

/// Parse generator text into a candidate plan.
pub fn parse_candidate_plan(text: &str) -> Result<CandidatePlan, PlanParseError> {
    let body = extract_fenced(text).unwrap_or(text).trim();
    if body.is_empty() {
        return Err(PlanParseError::Empty);
    }

    let plan: CandidatePlan = toml::from_str(body)?;
    if plan.days.is_empty() {
        return Err(PlanParseError::NoDays);
    }
    Ok(plan)
}

/// Return the contents of the first fenced code block, if any.
fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the info string (e.g. "toml") up to the end of the line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}
