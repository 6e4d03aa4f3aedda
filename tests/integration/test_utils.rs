//! Shared test utilities for integration tests
//!
//! In-memory collaborators and a scriptable activity-type plugin, so pipeline tests can
//! drive every stage through the public API without a model or a retrieval backend.

use activitygen::activity::{ActivityConfig, EvaluationIssue, EvaluationResult};
use activitygen::generation::ActivityGenerator;
use activitygen::hydrate::{
    HydrationSources, ReferencesAndChunks, Resource, ResourceFilter, ResourceRetriever,
    SkillExplainer,
};
use activitygen::plugin::{
    ActivityTypePlugin, GenConfigArgs, GenerationConfig, PluginRegistry, SlotContext,
};
use activitygen::structured::StubGenerator;
use activitygen::GenerationError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Explains every skill with the same text and counts lookups
pub struct FixedExplainer {
    text: String,
    calls: AtomicUsize,
}

impl FixedExplainer {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SkillExplainer for FixedExplainer {
    async fn explain_skill_path(
        &self,
        _skill_id: &str,
        _ancestor_ids: &[String],
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Returns a fixed resource list for any query
pub struct InMemoryRetriever {
    resources: Vec<Resource>,
    queries: Mutex<Vec<Vec<String>>>,
}

impl InMemoryRetriever {
    pub fn new(resources: Vec<Resource>) -> Arc<Self> {
        Arc::new(Self {
            resources,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<Vec<String>> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ResourceRetriever for InMemoryRetriever {
    async fn get_all_resources(
        &self,
        _filter: &ResourceFilter,
        query_texts: &[String],
    ) -> Result<Vec<Resource>, GenerationError> {
        self.queries.lock().push(query_texts.to_vec());
        Ok(self.resources.clone())
    }

    async fn get_all_references_and_chunks(
        &self,
        _scope_ids: &[String],
    ) -> Result<ReferencesAndChunks, GenerationError> {
        Ok(ReferencesAndChunks::default())
    }
}

/// What a [`ScriptedPlugin`] evaluator answers on one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    Valid,
    Invalid,
    Fail,
}

/// A plugin for `{type, text}` activities whose evaluator follows a script.
///
/// Once the script runs out every evaluation is valid.
pub struct ScriptedPlugin {
    activity_type: String,
    judgements: Mutex<VecDeque<Judgement>>,
    evaluate_delay: Option<Duration>,
    post_process: bool,
    evaluations: AtomicUsize,
    post_processed: AtomicUsize,
}

impl ScriptedPlugin {
    pub fn new(activity_type: &str) -> Self {
        Self {
            activity_type: activity_type.to_string(),
            judgements: Mutex::new(VecDeque::new()),
            evaluate_delay: None,
            post_process: false,
            evaluations: AtomicUsize::new(0),
            post_processed: AtomicUsize::new(0),
        }
    }

    pub fn judging(self, judgements: &[Judgement]) -> Self {
        *self.judgements.lock() = judgements.iter().copied().collect();
        self
    }

    pub fn with_evaluate_delay(mut self, delay: Duration) -> Self {
        self.evaluate_delay = Some(delay);
        self
    }

    /// Post-processing appends " [checked]" to the text field.
    pub fn with_post_process(mut self) -> Self {
        self.post_process = true;
        self
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn post_processed(&self) -> usize {
        self.post_processed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActivityTypePlugin for ScriptedPlugin {
    fn activity_type(&self) -> &str {
        &self.activity_type
    }

    async fn gen_config(
        &self,
        args: &GenConfigArgs<'_>,
    ) -> Result<GenerationConfig, GenerationError> {
        Ok(GenerationConfig::new(
            json!({
                "type": "object",
                "properties": {
                    "type": { "const": self.activity_type },
                    "text": { "type": "string" }
                },
                "required": ["type", "text"]
            }),
            format!("Write a {} about {}.", self.activity_type, args.subject),
        ))
    }

    fn supports_post_process(&self) -> bool {
        self.post_process
    }

    async fn post_process(
        &self,
        activity: &ActivityConfig,
        _ctx: &SlotContext<'_>,
    ) -> Result<Option<ActivityConfig>, GenerationError> {
        self.post_processed.fetch_add(1, Ordering::SeqCst);
        let mut processed = activity.clone();
        let text = activity.field_str("text").unwrap_or_default();
        processed
            .fields
            .insert("text".to_string(), json!(format!("{} [checked]", text)));
        Ok(Some(processed))
    }

    fn supports_evaluation(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        _activity: &ActivityConfig,
        _ctx: &SlotContext<'_>,
    ) -> Result<Option<EvaluationResult>, GenerationError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.evaluate_delay {
            tokio::time::sleep(delay).await;
        }
        let judgement = self.judgements.lock().pop_front().unwrap_or(Judgement::Valid);
        match judgement {
            Judgement::Valid => Ok(Some(EvaluationResult::valid())),
            Judgement::Invalid => Ok(Some(EvaluationResult::invalid(vec![
                EvaluationIssue::new("The text is too vague").with_fix("Name a concrete example"),
            ]))),
            Judgement::Fail => Err(GenerationError::Evaluation {
                activity_type: self.activity_type.clone(),
                message: "grader unavailable".to_string(),
            }),
        }
    }
}

/// A `{type, text}` activity object as the model would emit it
pub fn text_activity(activity_type: &str, text: &str) -> Value {
    json!({ "type": activity_type, "text": text })
}

pub fn registry_of(plugins: Vec<Arc<dyn ActivityTypePlugin>>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(plugin);
    }
    registry
}

/// A generator over `registry` and `stub` whose subjects resolve to "Photosynthesis".
pub fn generator_for(registry: PluginRegistry, stub: &Arc<StubGenerator>) -> ActivityGenerator {
    let sources = HydrationSources::new(FixedExplainer::new("Photosynthesis"));
    ActivityGenerator::new(stub.clone(), registry, sources)
}
