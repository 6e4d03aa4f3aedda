//! Shared model-backed evaluator.
//!
//! Plugins supply rubric criteria; the model answers against a fixed
//! [`EvaluationResult`] schema so every evaluator reports feedback the same way.

use crate::activity::{ActivityConfig, EvaluationResult};
use crate::error::GenerationError;
use crate::plugin::SlotContext;
use crate::provider::{ChatMessage, CompletionOptions};
use crate::structured::ObjectRequest;
use serde_json::{json, Value};
use tracing::debug;

pub const EVALUATION_SCHEMA_NAME: &str = "evaluation_result";

pub fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "isValid": { "type": "boolean" },
            "feedback": {
                "type": "object",
                "properties": {
                    "issues": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "issue": { "type": "string" },
                                "suggestedFix": { "type": "string" }
                            },
                            "required": ["issue"]
                        }
                    },
                    "generalFeedback": { "type": "string" }
                },
                "required": ["issues"]
            }
        },
        "required": ["isValid", "feedback"]
    })
}

fn rubric_prompt(activity_type: &str, subject: &str, criteria: &[&str], extra: Option<&str>) -> String {
    let mut prompt = format!(
        "You review {} learning activities written to teach: {}.\n\n\
         Judge the activity against every criterion below. Mark it valid only if all of \
         them hold. For each problem, describe the issue and suggest a concrete fix.\n\n\
         ## Criteria\n",
        activity_type, subject
    );
    for criterion in criteria {
        prompt.push_str(&format!("- {}\n", criterion));
    }
    if let Some(extra) = extra {
        prompt.push_str(&format!("\n## Author instructions the activity must follow\n{}\n", extra));
    }
    prompt
}

/// Ask the model to review `activity` against `criteria`.
pub async fn llm_evaluate(
    activity: &ActivityConfig,
    criteria: &[&str],
    ctx: &SlotContext<'_>,
) -> Result<EvaluationResult, GenerationError> {
    let activity_type = activity.activity_type.as_str();
    let rendered = serde_json::to_string_pretty(&activity.to_value()).map_err(|e| {
        GenerationError::Evaluation {
            activity_type: activity_type.to_string(),
            message: e.to_string(),
        }
    })?;

    let messages = vec![
        ChatMessage::system(rubric_prompt(
            activity_type,
            &ctx.hydrated.subject,
            criteria,
            ctx.additional_instructions,
        )),
        ChatMessage::user(format!("```json\n{}\n```", rendered)),
    ];
    let request = ObjectRequest::new(EVALUATION_SCHEMA_NAME, evaluation_schema(), messages)
        .with_model(ctx.model.map(str::to_string))
        .with_options(CompletionOptions {
            temperature: Some(0.0),
            ..CompletionOptions::default()
        });

    let value = ctx
        .generator
        .generate_object(request)
        .await
        .map_err(|e| GenerationError::Evaluation {
            activity_type: activity_type.to_string(),
            message: e.to_string(),
        })?;
    let result: EvaluationResult =
        serde_json::from_value(value).map_err(|e| GenerationError::Evaluation {
            activity_type: activity_type.to_string(),
            message: format!("malformed evaluation result: {}", e),
        })?;

    debug!(
        activity_type,
        slot_index = ctx.slot_index,
        is_valid = result.is_valid,
        issues = result.feedback.issues.len(),
        "Activity evaluated"
    );
    Ok(result)
}
