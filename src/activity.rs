//! Generated activity artifacts and the evaluation/grading records attached to them.
//!
//! `ActivityConfig` is the open tagged union over activity kinds: the `type` tag selects
//! the plugin, the common `citations` list is modelled explicitly, and the type-specific
//! fields stay in `fields` until a plugin decodes them into its own typed view.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A generated activity of any registered type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(rename = "type")]
    pub activity_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A claim that a span of a source document backs the activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub doc_id: String,
    pub start_text: String,
    pub end_text: String,
}

impl ActivityConfig {
    pub fn new(activity_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            activity_type: activity_type.into(),
            citations: None,
            fields,
        }
    }

    /// Parse a model-produced object; the `type` tag is required.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode into a plugin's typed view of the activity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }

    /// Re-encode a typed view, keeping this activity's citations.
    pub fn encode<T: Serialize>(
        activity_type: &str,
        typed: &T,
        citations: Option<Vec<Citation>>,
    ) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(typed)?;
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), Value::String(activity_type.to_string()));
        }
        let mut activity = Self::from_value(value)?;
        activity.citations = citations;
        Ok(activity)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Read a declared type tag from a raw model object
pub fn declared_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Outcome of evaluating one candidate activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub is_valid: bool,
    #[serde(default)]
    pub feedback: EvaluationFeedback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationFeedback {
    #[serde(default)]
    pub issues: Vec<EvaluationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationIssue {
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl EvaluationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            feedback: EvaluationFeedback::default(),
        }
    }

    pub fn invalid(issues: Vec<EvaluationIssue>) -> Self {
        Self {
            is_valid: false,
            feedback: EvaluationFeedback {
                issues,
                general_feedback: None,
            },
        }
    }

    /// Markdown rendering used in the corrective repair turn
    pub fn render_feedback(&self) -> String {
        let mut out = String::new();
        for (index, issue) in self.feedback.issues.iter().enumerate() {
            out.push_str(&format!("{}. {}", index + 1, issue.issue));
            if let Some(fix) = &issue.suggested_fix {
                out.push_str(&format!("\n   Suggested fix: {}", fix));
            }
            out.push('\n');
        }
        if let Some(general) = &self.feedback.general_feedback {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(general);
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("The activity did not pass review.\n");
        }
        out
    }
}

impl EvaluationIssue {
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issue: issue.into(),
            suggested_fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// A learner's answer to an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivityAnswer {
    Text { text: String },
    Choice { index: usize },
}

/// Grade for one answer, `score` in 0.0..=1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub score: f32,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}
