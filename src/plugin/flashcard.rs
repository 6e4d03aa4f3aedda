//! Flashcard activities: one prompt on the front, its answer on the back.

use crate::activity::{ActivityAnswer, ActivityConfig, EvaluationResult, GradeResult};
use crate::error::GenerationError;
use crate::plugin::evaluation::llm_evaluate;
use crate::plugin::{ActivityTypePlugin, GenConfigArgs, GenerationConfig, GradeContext, SlotContext};
use crate::provider::{ChatMessage, CompletionOptions};
use crate::structured::ObjectRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FLASHCARD_TYPE: &str = "flashcard";

const CRITERIA: &[&str] = &[
    "The front asks exactly one clear question or names one concept to recall",
    "The back fully and correctly answers the front",
    "The back does not restate the front",
    "The card is about the stated subject",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub front_content: String,
    pub back_content: String,
}

pub struct FlashcardPlugin;

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": { "const": FLASHCARD_TYPE },
            "frontContent": { "type": "string", "description": "Question or prompt shown first" },
            "backContent": { "type": "string", "description": "Answer revealed on flip" }
        },
        "required": ["type", "frontContent", "backContent"]
    })
}

fn grade_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": { "type": "number", "minimum": 0, "maximum": 1 },
            "isCorrect": { "type": "boolean" },
            "explanation": { "type": "string" }
        },
        "required": ["score", "isCorrect"]
    })
}

/// Trim and collapse runs of spaces and tabs, keeping line breaks.
fn normalize_whitespace(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode(activity: &ActivityConfig) -> Result<Flashcard, String> {
    activity.decode::<Flashcard>().map_err(|e| e.to_string())
}

#[async_trait]
impl ActivityTypePlugin for FlashcardPlugin {
    fn activity_type(&self) -> &str {
        FLASHCARD_TYPE
    }

    async fn gen_config(
        &self,
        args: &GenConfigArgs<'_>,
    ) -> Result<GenerationConfig, GenerationError> {
        Ok(GenerationConfig {
            usage_guidance: Some(
                "Use flashcards for definitions, facts and short associations the learner should \
                 be able to recall without prompting."
                    .to_string(),
            ),
            examples: vec![json!({
                "type": FLASHCARD_TYPE,
                "frontContent": "What organelle produces most of a cell's ATP?",
                "backContent": "The mitochondrion."
            })],
            final_reminders: Some("Keep the back short enough to read at a glance.".to_string()),
            ..GenerationConfig::new(
                schema(),
                format!(
                    "Write flashcards that help the learner memorize key ideas of {}. Put a single \
                     question or term on the front and its answer on the back.",
                    args.subject
                ),
            )
        })
    }

    fn supports_post_process(&self) -> bool {
        true
    }

    async fn post_process(
        &self,
        activity: &ActivityConfig,
        _ctx: &SlotContext<'_>,
    ) -> Result<Option<ActivityConfig>, GenerationError> {
        let card = decode(activity).map_err(|message| GenerationError::PostProcess {
            activity_type: FLASHCARD_TYPE.to_string(),
            message,
        })?;
        let normalized = Flashcard {
            front_content: normalize_whitespace(&card.front_content),
            back_content: normalize_whitespace(&card.back_content),
        };
        if normalized == card {
            return Ok(None);
        }
        ActivityConfig::encode(FLASHCARD_TYPE, &normalized, activity.citations.clone())
            .map(Some)
            .map_err(|e| GenerationError::PostProcess {
                activity_type: FLASHCARD_TYPE.to_string(),
                message: e.to_string(),
            })
    }

    fn supports_evaluation(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        activity: &ActivityConfig,
        ctx: &SlotContext<'_>,
    ) -> Result<Option<EvaluationResult>, GenerationError> {
        llm_evaluate(activity, CRITERIA, ctx).await.map(Some)
    }

    async fn grade(
        &self,
        activity: &ActivityConfig,
        answer: &ActivityAnswer,
        ctx: &GradeContext<'_>,
    ) -> Result<Option<GradeResult>, GenerationError> {
        let grading_error = |message: String| GenerationError::Grading {
            activity_type: FLASHCARD_TYPE.to_string(),
            message,
        };
        let text = match answer {
            ActivityAnswer::Text { text } => text,
            ActivityAnswer::Choice { .. } => {
                return Err(grading_error("flashcards take text answers".to_string()))
            }
        };
        let card = decode(activity).map_err(grading_error)?;

        let messages = vec![
            ChatMessage::system(
                "Grade the learner's answer to a flashcard. Accept answers that are correct in \
                 substance even if worded differently. Score from 0 to 1.",
            ),
            ChatMessage::user(format!(
                "Front: {}\nExpected answer: {}\nLearner answer: {}",
                card.front_content, card.back_content, text
            )),
        ];
        let request = ObjectRequest::new("flashcard_grade", grade_schema(), messages)
            .with_model(ctx.model.map(str::to_string))
            .with_options(CompletionOptions {
                temperature: Some(0.0),
                ..CompletionOptions::default()
            });
        let value = ctx
            .generator
            .generate_object(request)
            .await
            .map_err(|e| grading_error(e.to_string()))?;
        let grade: GradeResult =
            serde_json::from_value(value).map_err(|e| grading_error(e.to_string()))?;
        Ok(Some(GradeResult {
            score: grade.score.clamp(0.0, 1.0),
            ..grade
        }))
    }

    fn empty_config(&self) -> Option<ActivityConfig> {
        ActivityConfig::encode(
            FLASHCARD_TYPE,
            &Flashcard {
                front_content: String::new(),
                back_content: String::new(),
            },
            None,
        )
        .ok()
    }

    fn completed_tip(&self, activity: &ActivityConfig, grade: &GradeResult) -> Option<String> {
        if grade.is_correct {
            return None;
        }
        decode(activity)
            .ok()
            .map(|card| format!("The answer was: {}", card.back_content))
    }
}
