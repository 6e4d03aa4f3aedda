//! Activity type plugins
//!
//! One plugin per activity kind. Plugins are stateless capability sets registered once on
//! the generator; activities are dispatched to them by the `type` tag, never by the
//! concrete Rust type. Optional capabilities report "unsupported" as `Ok(None)`/`None`.

use crate::activity::{ActivityAnswer, ActivityConfig, EvaluationResult, GradeResult};
use crate::error::GenerationError;
use crate::hydrate::HydratedContext;
use crate::request::{GenerationRequest, TypeOverride};
use crate::schema::with_citations;
use crate::structured::StructuredGenerator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod evaluation;
pub mod flashcard;
pub mod multiple_choice;
pub mod slide;

pub use flashcard::FlashcardPlugin;
pub use multiple_choice::MultipleChoicePlugin;
pub use slide::SlidePlugin;

/// What a plugin contributes to the generation prompt and output contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// JSON Schema for one activity of this type (without citations)
    pub schema: Value,
    pub primary_instructions: String,
    #[serde(default)]
    pub usage_guidance: Option<String>,
    #[serde(default)]
    pub examples: Vec<Value>,
    #[serde(default)]
    pub final_reminders: Option<String>,
}

impl GenerationConfig {
    pub fn new(schema: Value, primary_instructions: impl Into<String>) -> Self {
        Self {
            schema,
            primary_instructions: primary_instructions.into(),
            usage_guidance: None,
            examples: Vec::new(),
            final_reminders: None,
        }
    }

    /// Fold a request's per-type override into this config.
    pub fn apply_override(mut self, type_override: &TypeOverride) -> Self {
        if let Some(extra) = type_override
            .additional_instructions
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            self.primary_instructions = format!("{}\n\n{}", self.primary_instructions, extra);
        }
        if let Some(examples) = &type_override.examples {
            self.examples = examples.clone();
        }
        self
    }
}

/// Inputs available while a plugin builds its generation config
pub struct GenConfigArgs<'a> {
    pub subject: &'a str,
    pub request: &'a GenerationRequest,
}

/// A plugin's rendered instruction block
#[derive(Debug, Clone, PartialEq)]
pub struct PluginPrompt {
    pub activity_type: String,
    pub primary: String,
    pub final_reminders: Option<String>,
}

impl PluginPrompt {
    pub fn from_config(activity_type: &str, config: &GenerationConfig) -> Self {
        let mut primary = format!(
            "## Activity type: {}\n\n{}",
            activity_type,
            config.primary_instructions.trim()
        );
        if let Some(usage) = &config.usage_guidance {
            primary.push_str(&format!("\n\n### When to use\n{}", usage.trim()));
        }
        if !config.examples.is_empty() {
            primary.push_str("\n\n### Examples");
            for example in &config.examples {
                let rendered =
                    serde_json::to_string_pretty(example).unwrap_or_else(|_| example.to_string());
                primary.push_str(&format!("\n```json\n{}\n```", rendered));
            }
        }
        Self {
            activity_type: activity_type.to_string(),
            primary,
            final_reminders: config
                .final_reminders
                .as_ref()
                .map(|r| format!("- {}: {}", activity_type, r.trim())),
        }
    }
}

/// Per-slot state handed to post-processors and evaluators
pub struct SlotContext<'a> {
    pub generator: &'a dyn StructuredGenerator,
    pub hydrated: &'a HydratedContext,
    pub slot_index: usize,
    pub additional_instructions: Option<&'a str>,
    /// Model for calls made on the slot's behalf; the request's, else the generator default
    pub model: Option<&'a str>,
}

/// State handed to graders
pub struct GradeContext<'a> {
    pub generator: &'a dyn StructuredGenerator,
    pub model: Option<&'a str>,
}

/// Capability contract implemented once per activity kind
#[async_trait]
pub trait ActivityTypePlugin: Send + Sync {
    /// The `type` tag this plugin owns
    fn activity_type(&self) -> &str;

    async fn gen_config(&self, args: &GenConfigArgs<'_>)
        -> Result<GenerationConfig, GenerationError>;

    async fn render_instructions(
        &self,
        config: &GenerationConfig,
        _hydrated: &HydratedContext,
    ) -> Result<PluginPrompt, GenerationError> {
        Ok(PluginPrompt::from_config(self.activity_type(), config))
    }

    fn supports_post_process(&self) -> bool {
        false
    }

    /// `Ok(None)` leaves the activity unchanged.
    async fn post_process(
        &self,
        _activity: &ActivityConfig,
        _ctx: &SlotContext<'_>,
    ) -> Result<Option<ActivityConfig>, GenerationError> {
        Ok(None)
    }

    fn supports_evaluation(&self) -> bool {
        false
    }

    async fn evaluate(
        &self,
        _activity: &ActivityConfig,
        _ctx: &SlotContext<'_>,
    ) -> Result<Option<EvaluationResult>, GenerationError> {
        Ok(None)
    }

    async fn grade(
        &self,
        _activity: &ActivityConfig,
        _answer: &ActivityAnswer,
        _ctx: &GradeContext<'_>,
    ) -> Result<Option<GradeResult>, GenerationError> {
        Ok(None)
    }

    fn empty_config(&self) -> Option<ActivityConfig> {
        None
    }

    fn completed_tip(&self, _activity: &ActivityConfig, _grade: &GradeResult) -> Option<String> {
        None
    }
}

/// A usable plugin paired with the config fetched for the current request
#[derive(Clone)]
pub struct HydratedPlugin {
    pub plugin: Arc<dyn ActivityTypePlugin>,
    pub config: GenerationConfig,
}

impl HydratedPlugin {
    pub fn activity_type(&self) -> &str {
        self.plugin.activity_type()
    }

    /// The schema embedded in the output contract and used for repairs
    pub fn output_schema(&self) -> Value {
        with_citations(&self.config.schema)
    }
}

impl std::fmt::Debug for HydratedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydratedPlugin")
            .field("activity_type", &self.activity_type())
            .finish()
    }
}

/// Ordered table of registered plugins
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn ActivityTypePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in flashcard, multiple-choice and slide plugins
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FlashcardPlugin));
        registry.register(Arc::new(MultipleChoicePlugin));
        registry.register(Arc::new(SlidePlugin));
        registry
    }

    /// Register a plugin; a plugin with the same tag is replaced in place.
    pub fn register(&mut self, plugin: Arc<dyn ActivityTypePlugin>) -> &mut Self {
        match self
            .plugins
            .iter()
            .position(|p| p.activity_type() == plugin.activity_type())
        {
            Some(index) => self.plugins[index] = plugin,
            None => self.plugins.push(plugin),
        }
        self
    }

    pub fn get(&self, activity_type: &str) -> Option<&Arc<dyn ActivityTypePlugin>> {
        self.plugins
            .iter()
            .find(|p| p.activity_type() == activity_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.activity_type()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registered plugins allowed by `allowlist`, in registration order.
    pub fn filter(&self, allowlist: Option<&[String]>) -> Vec<Arc<dyn ActivityTypePlugin>> {
        self.plugins
            .iter()
            .filter(|p| {
                allowlist.map_or(true, |allowed| {
                    allowed.iter().any(|t| t == p.activity_type())
                })
            })
            .cloned()
            .collect()
    }
}
