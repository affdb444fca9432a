//! Improvement plan synthesis and validation.
//!
//! # Architecture
//!
//! ```text
//! SynthesizerAdapter::request(assessment, readings, weak_areas)
//!     |
//!     v
//! GenerationRequest { constraints, attempt, feedback }
//!     |   timeout(generate(request))
//!     v
//! dyn TextGenerator ---> text ---> parse_candidate_plan ---> CandidatePlan
//!     |
//!     v
//! PlanValidator::validate ---> ImprovementPlan | PlanRejection
//! ```
//!
//! The generator is told the output schema through
//! [`PlanConstraints::schema_directive`]. Parsing failures become
//! `GenerationMalformed`; content that parses but breaks a rule becomes a
//! [`PlanRejection`] that the orchestrator feeds back into the next attempt.

pub mod http;
pub mod parser;
pub mod prompt;
pub mod synth;
pub mod template;
pub mod types;
pub mod validator;

pub use http::HttpGenerator;
pub use parser::{PlanParseError, parse_candidate_plan};
pub use prompt::{
    GenerationRequest, PLAN_DAYS, PlanConstraints, PlanFormat, build_system_prompt, build_user_prompt,
};
pub use synth::{SynthesisConfig, SynthesizerAdapter, TextGenerator};
pub use template::TemplateGenerator;
pub use types::{CandidateDay, CandidatePlan, ImprovementPlan, PlanDay};
pub use validator::{PlanRejection, PlanRule, PlanRules, PlanValidator};
