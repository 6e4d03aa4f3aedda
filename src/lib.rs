//! Activitygen: LLM-driven generation of structured learning activities
//!
//! A request is hydrated into a context (subject, eligible activity-type plugins,
//! citable resources), compiled into one prompt and one output schema, and streamed
//! from a model. Each activity is validated, repaired against evaluator feedback, and
//! cleaned of unverifiable citations before it is emitted.

pub mod activity;
pub mod citation;
pub mod config;
pub mod error;
pub mod generation;
pub mod hydrate;
pub mod logging;
pub mod plugin;
pub mod prompt;
pub mod provider;
pub mod request;
pub mod schema;
pub mod structured;

pub use activity::{ActivityAnswer, ActivityConfig, Citation, EvaluationResult, GradeResult};
pub use error::{ApiError, GenerationError};
pub use generation::{ActivityGenerator, ActivityStream, SlotOutcome, SlotVerdict};
pub use plugin::{ActivityTypePlugin, PluginRegistry};
pub use request::{GenerationRequest, Subject};
