//! Multiple-choice questions with per-choice explanations.

use crate::activity::{
    ActivityAnswer, ActivityConfig, EvaluationIssue, EvaluationResult, GradeResult,
};
use crate::error::GenerationError;
use crate::plugin::evaluation::llm_evaluate;
use crate::plugin::{ActivityTypePlugin, GenConfigArgs, GenerationConfig, GradeContext, SlotContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const MULTIPLE_CHOICE_TYPE: &str = "multiple-choice";

const CRITERIA: &[&str] = &[
    "The question has exactly one defensible correct answer among the choices",
    "Every incorrect choice is plausible to a learner who has not mastered the subject",
    "Each explanation says why its choice is right or wrong",
    "No choice gives the answer away through wording or length",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipleChoice {
    pub question: String,
    pub answer_choices: Vec<AnswerChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerChoice {
    pub text: String,
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: String,
}

impl MultipleChoice {
    fn correct_choice(&self) -> Option<&AnswerChoice> {
        self.answer_choices.iter().find(|c| c.is_correct)
    }

    /// Problems detectable without a model.
    fn structural_issues(&self) -> Vec<EvaluationIssue> {
        let mut issues = Vec::new();
        if self.question.trim().is_empty() {
            issues.push(EvaluationIssue::new("The question is empty").with_fix("Write the question"));
        }
        if self.answer_choices.len() < 2 {
            issues.push(
                EvaluationIssue::new("Fewer than two answer choices")
                    .with_fix("Add plausible incorrect choices"),
            );
        }
        match self.answer_choices.iter().filter(|c| c.is_correct).count() {
            0 => issues.push(
                EvaluationIssue::new("No choice is marked correct")
                    .with_fix("Mark exactly one choice as correct"),
            ),
            1 => {}
            n => issues.push(
                EvaluationIssue::new(format!("{} choices are marked correct", n))
                    .with_fix("Mark exactly one choice as correct"),
            ),
        }
        for (index, choice) in self.answer_choices.iter().enumerate() {
            if choice.text.trim().is_empty() {
                issues.push(EvaluationIssue::new(format!("Choice {} has no text", index + 1)));
            }
            if choice.explanation.trim().is_empty() {
                issues.push(
                    EvaluationIssue::new(format!("Choice {} has no explanation", index + 1))
                        .with_fix("Explain why the choice is right or wrong"),
                );
            }
        }
        issues
    }
}

pub struct MultipleChoicePlugin;

fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": { "const": MULTIPLE_CHOICE_TYPE },
            "question": { "type": "string" },
            "answerChoices": {
                "type": "array",
                "minItems": 2,
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "isCorrect": { "type": "boolean" },
                        "explanation": { "type": "string" }
                    },
                    "required": ["text", "isCorrect", "explanation"]
                }
            },
            "followUp": { "type": "string", "description": "Optional question to extend the learner's thinking" }
        },
        "required": ["type", "question", "answerChoices"]
    })
}

fn choice_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop repeated choices, keeping the first; a dropped correct duplicate marks the kept one correct.
fn dedupe_choices(choices: &[AnswerChoice]) -> Vec<AnswerChoice> {
    let mut kept: Vec<AnswerChoice> = Vec::with_capacity(choices.len());
    for choice in choices {
        let key = choice_key(&choice.text);
        match kept.iter_mut().find(|k| choice_key(&k.text) == key) {
            Some(existing) => {
                if choice.is_correct && !existing.is_correct {
                    existing.is_correct = true;
                    existing.explanation = choice.explanation.clone();
                }
            }
            None => kept.push(choice.clone()),
        }
    }
    kept
}

fn decode(activity: &ActivityConfig) -> Result<MultipleChoice, String> {
    activity.decode::<MultipleChoice>().map_err(|e| e.to_string())
}

#[async_trait]
impl ActivityTypePlugin for MultipleChoicePlugin {
    fn activity_type(&self) -> &str {
        MULTIPLE_CHOICE_TYPE
    }

    async fn gen_config(
        &self,
        args: &GenConfigArgs<'_>,
    ) -> Result<GenerationConfig, GenerationError> {
        Ok(GenerationConfig {
            usage_guidance: Some(
                "Use multiple choice to check understanding where a common misconception can be \
                 offered as a tempting wrong answer."
                    .to_string(),
            ),
            examples: vec![json!({
                "type": MULTIPLE_CHOICE_TYPE,
                "question": "Which process releases energy stored in glucose?",
                "answerChoices": [
                    {"text": "Cellular respiration", "isCorrect": true,
                     "explanation": "Respiration breaks glucose down to release ATP."},
                    {"text": "Photosynthesis", "isCorrect": false,
                     "explanation": "Photosynthesis stores energy in glucose rather than releasing it."}
                ]
            })],
            final_reminders: Some(
                "Mark exactly one choice correct and explain every choice.".to_string(),
            ),
            ..GenerationConfig::new(
                schema(),
                format!(
                    "Write multiple-choice questions that test understanding of {}. Give three to \
                     five answer choices, exactly one of them correct.",
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
        let post_process_error = |message: String| GenerationError::PostProcess {
            activity_type: MULTIPLE_CHOICE_TYPE.to_string(),
            message,
        };
        let mut question = decode(activity).map_err(post_process_error)?;
        let deduped = dedupe_choices(&question.answer_choices);
        if deduped == question.answer_choices {
            return Ok(None);
        }
        debug!(
            removed = question.answer_choices.len() - deduped.len(),
            "Removed duplicate answer choices"
        );
        question.answer_choices = deduped;
        ActivityConfig::encode(MULTIPLE_CHOICE_TYPE, &question, activity.citations.clone())
            .map(Some)
            .map_err(|e| post_process_error(e.to_string()))
    }

    fn supports_evaluation(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        activity: &ActivityConfig,
        ctx: &SlotContext<'_>,
    ) -> Result<Option<EvaluationResult>, GenerationError> {
        let question = match decode(activity) {
            Ok(question) => question,
            Err(message) => {
                return Ok(Some(EvaluationResult::invalid(vec![EvaluationIssue::new(
                    format!("The activity does not match the multiple-choice shape: {}", message),
                )])))
            }
        };
        let issues = question.structural_issues();
        if !issues.is_empty() {
            return Ok(Some(EvaluationResult::invalid(issues)));
        }
        llm_evaluate(activity, CRITERIA, ctx).await.map(Some)
    }

    async fn grade(
        &self,
        activity: &ActivityConfig,
        answer: &ActivityAnswer,
        _ctx: &GradeContext<'_>,
    ) -> Result<Option<GradeResult>, GenerationError> {
        let grading_error = |message: String| GenerationError::Grading {
            activity_type: MULTIPLE_CHOICE_TYPE.to_string(),
            message,
        };
        let question = decode(activity).map_err(grading_error)?;
        let chosen = match answer {
            ActivityAnswer::Choice { index } => question.answer_choices.get(*index),
            ActivityAnswer::Text { text } => {
                let key = choice_key(text);
                question
                    .answer_choices
                    .iter()
                    .find(|c| choice_key(&c.text) == key)
            }
        };
        let chosen = chosen.ok_or_else(|| grading_error("answer matches no choice".to_string()))?;
        Ok(Some(GradeResult {
            score: if chosen.is_correct { 1.0 } else { 0.0 },
            is_correct: chosen.is_correct,
            explanation: Some(chosen.explanation.clone()).filter(|e| !e.is_empty()),
        }))
    }

    fn empty_config(&self) -> Option<ActivityConfig> {
        ActivityConfig::encode(
            MULTIPLE_CHOICE_TYPE,
            &MultipleChoice {
                question: String::new(),
                answer_choices: Vec::new(),
                follow_up: None,
            },
            None,
        )
        .ok()
    }

    fn completed_tip(&self, activity: &ActivityConfig, _grade: &GradeResult) -> Option<String> {
        let question = decode(activity).ok()?;
        question
            .correct_choice()
            .map(|c| c.explanation.clone())
            .filter(|e| !e.is_empty())
    }
}
