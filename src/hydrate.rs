//! Request hydration
//!
//! Turns a raw [`GenerationRequest`] into the read-only [`HydratedContext`] every later
//! stage works from. Plugin filtering and subject resolution run first; the independent
//! fetches (plugin configs, resources, references, injected context, profile, prior
//! activities) are then launched together and joined as one barrier.

use crate::activity::ActivityConfig;
use crate::config::GenerationDefaults;
use crate::error::GenerationError;
use crate::plugin::{GenConfigArgs, HydratedPlugin, PluginRegistry};
use crate::provider::ChatMessage;
use crate::request::{GenerationRequest, InjectorSpec, SourceDocument};
use crate::schema::{compose_output_schema, OutputSchema, SlotLayout};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// A citable document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Canonical id; citations are rewritten to this
    #[serde(default)]
    pub id: Option<String>,
    /// Alternate id of the entity the resource was derived from
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Source URL
    #[serde(default)]
    pub source: Option<String>,
    pub content: String,
    #[serde(default)]
    pub matched_sections: Vec<String>,
}

impl Resource {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            entity_id: None,
            resource_type: None,
            name: None,
            source: None,
            content: content.into(),
            matched_sections: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn from_source_document(document: &SourceDocument) -> Self {
        Self {
            id: document.id.clone(),
            entity_id: None,
            resource_type: Some("document".to_string()),
            name: document.name.clone(),
            source: document.source_url.clone(),
            content: document.content.clone(),
            matched_sections: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Excerpt of a reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferencesAndChunks {
    pub references: Vec<Reference>,
    pub chunks: Vec<Chunk>,
}

/// Retrieval scope for resources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    /// Skill followed by its ancestors
    pub scope_ids: Vec<String>,
    pub user_id: Option<String>,
}

/// Output of a context injector
#[derive(Debug, Clone, PartialEq)]
pub enum InjectedContext {
    Message(ChatMessage),
    Text(String),
}

impl InjectedContext {
    pub fn into_message(self) -> ChatMessage {
        match self {
            InjectedContext::Message(message) => message,
            InjectedContext::Text(text) => ChatMessage::system(text),
        }
    }
}

#[async_trait]
pub trait SkillExplainer: Send + Sync {
    /// Human-readable description of a skill in the context of its ancestors
    async fn explain_skill_path(
        &self,
        skill_id: &str,
        ancestor_ids: &[String],
    ) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait ResourceRetriever: Send + Sync {
    async fn get_all_resources(
        &self,
        filter: &ResourceFilter,
        query_texts: &[String],
    ) -> Result<Vec<Resource>, GenerationError>;

    async fn get_all_references_and_chunks(
        &self,
        scope_ids: &[String],
    ) -> Result<ReferencesAndChunks, GenerationError>;
}

#[async_trait]
pub trait ContextInjector: Send + Sync {
    async fn expand_injectors(
        &self,
        injectors: &[InjectorSpec],
    ) -> Result<Vec<InjectedContext>, GenerationError>;
}

#[async_trait]
pub trait ActivityLookup: Send + Sync {
    async fn activities_by_id(&self, ids: &[String]) -> Result<Vec<ActivityConfig>, GenerationError>;
}

#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn user_profile(&self, user_id: &str) -> Result<Option<String>, GenerationError>;
}

/// The collaborators hydration draws on. Only the explainer is required.
#[derive(Clone)]
pub struct HydrationSources {
    pub explainer: Arc<dyn SkillExplainer>,
    pub retriever: Option<Arc<dyn ResourceRetriever>>,
    pub injector: Option<Arc<dyn ContextInjector>>,
    pub activities: Option<Arc<dyn ActivityLookup>>,
    pub profiles: Option<Arc<dyn ProfileSource>>,
}

impl HydrationSources {
    pub fn new(explainer: Arc<dyn SkillExplainer>) -> Self {
        Self {
            explainer,
            retriever: None,
            injector: None,
            activities: None,
            profiles: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ResourceRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_injector(mut self, injector: Arc<dyn ContextInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn with_activities(mut self, activities: Arc<dyn ActivityLookup>) -> Self {
        self.activities = Some(activities);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileSource>) -> Self {
        self.profiles = Some(profiles);
        self
    }
}

/// Replaces hydration entirely
pub type HydrationOverride = Arc<
    dyn Fn(GenerationRequest) -> BoxFuture<'static, Result<HydratedContext, GenerationError>>
        + Send
        + Sync,
>;

/// Everything derived for one request; read-only once built
#[derive(Debug, Clone)]
pub struct HydratedContext {
    pub request: GenerationRequest,
    pub subject: String,
    pub plugins: Vec<HydratedPlugin>,
    pub output: OutputSchema,
    /// Caller documents first, then retrieved resources
    pub resources: Vec<Resource>,
    pub references: Vec<Reference>,
    pub chunks: Vec<Chunk>,
    pub context: Vec<InjectedContext>,
    pub user_profile: Option<String>,
    /// Formatted activities the request asked to emulate
    pub prior_activities: Vec<String>,
    /// Formatted reference activity configs from the request
    pub reference_activities: Vec<String>,
}

impl HydratedContext {
    /// Compose the output contract for `plugins` and seed resources from the request's
    /// inline documents.
    pub fn new(
        request: GenerationRequest,
        subject: impl Into<String>,
        plugins: Vec<HydratedPlugin>,
    ) -> Result<Self, GenerationError> {
        let output = compose_output_schema(&plugins, SlotLayout::for_request(&request))?;
        let resources = request
            .source_documents
            .iter()
            .map(Resource::from_source_document)
            .collect();
        let reference_activities = request
            .reference_activities
            .iter()
            .map(format_activity)
            .collect();
        Ok(Self {
            request,
            subject: subject.into(),
            plugins,
            output,
            resources,
            references: Vec::new(),
            chunks: Vec::new(),
            context: Vec::new(),
            user_profile: None,
            prior_activities: Vec::new(),
            reference_activities,
        })
    }

    /// Append retrieved resources after the caller's documents.
    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources.extend(resources);
        self
    }

    pub fn with_references(mut self, found: ReferencesAndChunks) -> Self {
        self.references = found.references;
        self.chunks = found.chunks;
        self
    }

    pub fn with_context(mut self, context: Vec<InjectedContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_user_profile(mut self, profile: Option<String>) -> Self {
        self.user_profile = profile;
        self
    }

    pub fn with_prior_activities(mut self, activities: &[ActivityConfig]) -> Self {
        self.prior_activities = activities.iter().map(format_activity).collect();
        self
    }

    pub fn layout(&self) -> &SlotLayout {
        &self.output.layout
    }

    pub fn schema(&self) -> &Value {
        &self.output.schema
    }

    pub fn plugin(&self, activity_type: &str) -> Option<&HydratedPlugin> {
        self.plugins.iter().find(|p| p.activity_type() == activity_type)
    }
}

fn format_activity(activity: &ActivityConfig) -> String {
    serde_json::to_string_pretty(&activity.to_value()).unwrap_or_default()
}

async fn resolve_subject(
    request: &GenerationRequest,
    explainer: &dyn SkillExplainer,
) -> Result<String, GenerationError> {
    let subject = &request.subject;
    let resolved = match (&subject.skill_id, &subject.name) {
        (Some(skill_id), _) => {
            explainer
                .explain_skill_path(skill_id, &subject.parent_skill_ids)
                .await?
        }
        (None, Some(name)) => name.clone(),
        (None, None) => {
            return Err(GenerationError::MissingSubject(
                "request names neither a skill nor a subject".to_string(),
            ))
        }
    };
    let resolved = resolved.trim();
    if resolved.is_empty() {
        return Err(GenerationError::MissingSubject(
            "subject resolved to an empty description".to_string(),
        ));
    }
    Ok(resolved.to_string())
}

/// Build the hydrated context for `request`.
pub async fn hydrate(
    request: GenerationRequest,
    registry: &PluginRegistry,
    sources: &HydrationSources,
    defaults: &GenerationDefaults,
) -> Result<HydratedContext, GenerationError> {
    let requested = request.requested_types();
    let candidates = registry.filter(requested.as_deref());
    if candidates.is_empty() {
        return Err(GenerationError::NoValidPlugins { slot: None });
    }

    let subject = resolve_subject(&request, sources.explainer.as_ref()).await?;
    let scope_ids = request.subject.scope_ids();

    let plugins_fut = {
        let args = GenConfigArgs {
            subject: &subject,
            request: &request,
        };
        let request = &request;
        async move {
            try_join_all(candidates.into_iter().map(|plugin| {
                let args = &args;
                async move {
                    let mut config = plugin.gen_config(args).await?;
                    if let Some(type_override) = request.type_overrides.get(plugin.activity_type()) {
                        config = config.apply_override(type_override);
                    }
                    Ok::<_, GenerationError>(HydratedPlugin { plugin, config })
                }
            }))
            .await
        }
    };

    let resources_fut = async {
        let retriever = match &sources.retriever {
            Some(retriever) => retriever,
            None => return Ok(Vec::new()),
        };
        let filter = ResourceFilter {
            scope_ids: scope_ids.clone(),
            user_id: request.user_id.clone(),
        };
        let mut query_texts = vec![subject.clone()];
        query_texts.extend(request.additional_instructions.iter().cloned());
        let mut resources = retriever.get_all_resources(&filter, &query_texts).await?;
        if let Some(limit) = defaults.max_citation_resources {
            resources.truncate(limit);
        }
        Ok::<_, GenerationError>(resources)
    };

    let references_fut = async {
        match &sources.retriever {
            Some(retriever) if !scope_ids.is_empty() => {
                retriever.get_all_references_and_chunks(&scope_ids).await
            }
            _ => Ok(ReferencesAndChunks::default()),
        }
    };

    let context_fut = async {
        match &sources.injector {
            Some(injector) if !request.context_injectors.is_empty() => {
                injector.expand_injectors(&request.context_injectors).await
            }
            _ => Ok(Vec::new()),
        }
    };

    let profile_fut = async {
        match (&sources.profiles, &request.user_id) {
            (Some(profiles), Some(user_id)) => profiles.user_profile(user_id).await,
            _ => Ok(None),
        }
    };

    let prior_fut = async {
        match &sources.activities {
            Some(lookup) if !request.activities_to_emulate.is_empty() => {
                lookup.activities_by_id(&request.activities_to_emulate).await
            }
            _ => Ok(Vec::new()),
        }
    };

    let (plugins, resources, references, context, profile, prior) = futures::try_join!(
        plugins_fut,
        resources_fut,
        references_fut,
        context_fut,
        profile_fut,
        prior_fut
    )?;

    let hydrated = HydratedContext::new(request, subject, plugins)?
        .with_resources(resources)
        .with_references(references)
        .with_context(context)
        .with_user_profile(profile)
        .with_prior_activities(&prior);

    info!(
        subject = %hydrated.subject,
        plugins = hydrated.plugins.len(),
        resources = hydrated.resources.len(),
        chunks = hydrated.chunks.len(),
        "Request hydrated"
    );
    debug!(layout = ?hydrated.output.layout, "Composed output schema");
    Ok(hydrated)
}
