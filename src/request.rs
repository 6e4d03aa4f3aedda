//! Generation requests and the policy resolution rules applied per slot.

use crate::activity::ActivityConfig;
use crate::config::GenerationDefaults;
use crate::provider::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller input for one generation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub subject: Subject,

    /// Learner the activities are generated for; selects the user profile
    #[serde(default)]
    pub user_id: Option<String>,

    /// Inline documents; listed ahead of retrieved resources for citation
    #[serde(default)]
    pub source_documents: Vec<SourceDocument>,

    /// Ids of existing activities whose style should be emulated
    #[serde(default)]
    pub activities_to_emulate: Vec<String>,

    /// Activity configs shown to the model as references
    #[serde(default)]
    pub reference_activities: Vec<ActivityConfig>,

    #[serde(default)]
    pub additional_instructions: Option<String>,

    #[serde(default)]
    pub valid_activity_types: Option<Vec<String>>,

    #[serde(default)]
    pub num_activities: Option<usize>,

    #[serde(default)]
    pub type_overrides: HashMap<String, TypeOverride>,

    #[serde(default)]
    pub evaluator: Option<EvaluatorPolicy>,

    #[serde(default)]
    pub postprocessing: Option<PostprocessPolicy>,

    #[serde(default)]
    pub sequencing: Option<Vec<SequenceSlot>>,

    #[serde(default)]
    pub context_injectors: Vec<InjectorSpec>,

    /// Free-form messages appended after the system and context block
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Opaque model identifier passed to the structured generator
    #[serde(default)]
    pub model: Option<String>,
}

/// The skill the activities teach, with its ancestor chain (nearest parent first)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub skill_id: Option<String>,
    #[serde(default)]
    pub parent_skill_ids: Vec<String>,
    /// Human-readable subject used as-is when no skill id is given
    #[serde(default)]
    pub name: Option<String>,
}

impl Subject {
    pub fn skill(skill_id: impl Into<String>) -> Self {
        Self {
            skill_id: Some(skill_id.into()),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The skill followed by its ancestors, the scope used for retrieval.
    pub fn scope_ids(&self) -> Vec<String> {
        self.skill_id
            .iter()
            .chain(self.parent_skill_ids.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub content: String,
}

/// Per-type adjustments merged into a plugin's fetched generation config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeOverride {
    #[serde(default)]
    pub additional_instructions: Option<String>,
    #[serde(default)]
    pub examples: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorPolicy {
    pub enabled: bool,
    #[serde(default = "default_max_eval_loops")]
    pub max_eval_loops: u32,
}

fn default_max_eval_loops() -> u32 {
    1
}

impl Default for EvaluatorPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_eval_loops: default_max_eval_loops(),
        }
    }
}

impl EvaluatorPolicy {
    pub fn enabled(max_eval_loops: u32) -> Self {
        Self {
            enabled: true,
            max_eval_loops,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Loop bound actually used; never below one pass.
    pub fn effective_loops(&self) -> u32 {
        self.max_eval_loops.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostprocessPolicy {
    pub enabled: bool,
}

impl Default for PostprocessPolicy {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One entry of a sequencing plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceSlot {
    /// Allowed types for this slot; empty means any type the request allows
    #[serde(default)]
    pub activity_types: Vec<String>,
    #[serde(default)]
    pub additional_instructions: Option<String>,
    #[serde(default)]
    pub evaluator: Option<EvaluatorPolicy>,
    #[serde(default)]
    pub postprocessing: Option<PostprocessPolicy>,
}

impl SequenceSlot {
    pub fn of_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            activity_types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// A named context injector and its configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorSpec {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Policies in force for one slot after overrides are applied
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub evaluator: EvaluatorPolicy,
    pub postprocessing: PostprocessPolicy,
    pub additional_instructions: Option<String>,
}

impl GenerationRequest {
    pub fn for_subject(subject: Subject) -> Self {
        Self {
            subject,
            ..Self::default()
        }
    }

    /// Request-level evaluator policy, falling back to configured defaults
    pub fn evaluator_policy(&self, defaults: &GenerationDefaults) -> EvaluatorPolicy {
        self.evaluator.unwrap_or(EvaluatorPolicy {
            enabled: defaults.evaluator_enabled,
            max_eval_loops: defaults.max_eval_loops,
        })
    }

    pub fn postprocess_policy(&self, defaults: &GenerationDefaults) -> PostprocessPolicy {
        self.postprocessing.unwrap_or(PostprocessPolicy {
            enabled: defaults.postprocessing_enabled,
        })
    }

    /// Slot-level overrides win; additional instructions concatenate request-first.
    pub fn effective_policy(
        &self,
        slot: Option<&SequenceSlot>,
        defaults: &GenerationDefaults,
    ) -> EffectivePolicy {
        let evaluator = slot
            .and_then(|s| s.evaluator)
            .unwrap_or_else(|| self.evaluator_policy(defaults));
        let postprocessing = slot
            .and_then(|s| s.postprocessing)
            .unwrap_or_else(|| self.postprocess_policy(defaults));
        let additional_instructions = join_instructions(
            self.additional_instructions.as_deref(),
            slot.and_then(|s| s.additional_instructions.as_deref()),
        );
        EffectivePolicy {
            evaluator,
            postprocessing,
            additional_instructions,
        }
    }

    /// Every type the request could produce, if it constrains types at all.
    pub fn requested_types(&self) -> Option<Vec<String>> {
        let sequenced: Option<Vec<String>> = self.sequencing.as_ref().and_then(|slots| {
            if slots.iter().any(|s| s.activity_types.is_empty()) {
                return None;
            }
            let mut types: Vec<String> = Vec::new();
            for t in slots.iter().flat_map(|s| s.activity_types.iter()) {
                if !types.contains(t) {
                    types.push(t.clone());
                }
            }
            Some(types)
        });
        match (&self.valid_activity_types, sequenced) {
            (Some(allowed), Some(sequenced)) => Some(
                sequenced
                    .into_iter()
                    .filter(|t| allowed.contains(t))
                    .collect(),
            ),
            (Some(allowed), None) => Some(allowed.clone()),
            (None, sequenced) => sequenced,
        }
    }
}

fn join_instructions(request: Option<&str>, slot: Option<&str>) -> Option<String> {
    let request = request.map(str::trim).filter(|s| !s.is_empty());
    let slot = slot.map(str::trim).filter(|s| !s.is_empty());
    match (request, slot) {
        (Some(r), Some(s)) => Some(format!("{}\n\n{}", r, s)),
        (Some(r), None) => Some(r.to_string()),
        (None, Some(s)) => Some(s.to_string()),
        (None, None) => None,
    }
}
