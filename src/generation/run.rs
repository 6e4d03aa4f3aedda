//! Generation entry points: hydrate, assemble, stream, demultiplex, repair, emit.
//! Callers use `ActivityGenerator` only; slot processing stays in the executor.

use crate::activity::{declared_type, ActivityAnswer, ActivityConfig, GradeResult};
use crate::config::{ActivityGenConfig, GenerationDefaults};
use crate::error::{ApiError, GenerationError};
use crate::generation::demux::SlotDemuxer;
use crate::generation::executor::{completion_options, SlotExecutor, SlotOutcome};
use crate::hydrate::{hydrate, HydratedContext, HydrationOverride, HydrationSources};
use crate::plugin::{ActivityTypePlugin, GradeContext, PluginRegistry};
use crate::prompt::assemble_messages;
use crate::provider::ProviderFactory;
use crate::request::GenerationRequest;
use crate::structured::{ObjectRequest, ProviderStructuredGenerator, StructuredGenerator};
use futures::{Future, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Activities in slot order. An `Err` item means the model stream failed and is last.
pub type ActivityStream = Pin<Box<dyn Stream<Item = Result<ActivityConfig, GenerationError>> + Send>>;

/// Per-slot diagnostic records in slot order
pub type OutcomeStream = Pin<Box<dyn Stream<Item = Result<SlotOutcome, GenerationError>> + Send>>;

const BATCH_SCHEMA_NAME: &str = "activities";

/// Generates activities for requests against one plugin registry.
pub struct ActivityGenerator {
    generator: Arc<dyn StructuredGenerator>,
    registry: Arc<PluginRegistry>,
    sources: HydrationSources,
    defaults: GenerationDefaults,
    hydration_override: Option<HydrationOverride>,
    model: Option<String>,
}

impl ActivityGenerator {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        registry: PluginRegistry,
        sources: HydrationSources,
    ) -> Self {
        Self {
            generator,
            registry: Arc::new(registry),
            sources,
            defaults: GenerationDefaults::default(),
            hydration_override: None,
            model: None,
        }
    }

    /// Build from loaded configuration, talking to the configured provider.
    pub fn from_config(
        config: &ActivityGenConfig,
        registry: PluginRegistry,
        sources: HydrationSources,
    ) -> Result<Self, ApiError> {
        let provider = config.provider.as_ref().ok_or_else(|| {
            ApiError::ProviderNotConfigured("no [provider] section in configuration".to_string())
        })?;
        let client = ProviderFactory::create_client(provider)?;
        let generator = Arc::new(ProviderStructuredGenerator::new(client));
        Ok(Self::new(generator, registry, sources).with_defaults(config.generation.clone()))
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Replace hydration with `f`; retrieval collaborators are then never called.
    pub fn with_hydration_override<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(GenerationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HydratedContext, GenerationError>> + Send + 'static,
    {
        self.hydration_override = Some(Arc::new(move |request| Box::pin(f(request))));
        self
    }

    /// Model used when a request names none
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    async fn hydrate(&self, request: GenerationRequest) -> Result<HydratedContext, GenerationError> {
        match &self.hydration_override {
            Some(hydration_override) => hydration_override(request).await,
            None => hydrate(request, &self.registry, &self.sources, &self.defaults).await,
        }
    }

    /// Generate activities lazily, one per slot, in slot order.
    ///
    /// Hydration and schema composition finish before this returns, so configuration
    /// errors surface here. The model is first called when the stream is first polled,
    /// and dropping the stream stops all further slot processing.
    pub async fn generate(&self, request: GenerationRequest) -> Result<ActivityStream, GenerationError> {
        let outcomes = self.generate_outcomes(request).await?;
        Ok(Box::pin(outcomes.map(|item| item.map(|outcome| outcome.activity))))
    }

    /// Like [`generate`](Self::generate), yielding the full per-slot record.
    pub async fn generate_outcomes(
        &self,
        request: GenerationRequest,
    ) -> Result<OutcomeStream, GenerationError> {
        let model = request.model.clone().or_else(|| self.model.clone());
        let hydrated = Arc::new(self.hydrate(request).await?);
        let messages = assemble_messages(&hydrated).await?;
        let generator = Arc::clone(&self.generator);
        let defaults = self.defaults.clone();

        info!(
            subject = %hydrated.subject,
            layout = ?hydrated.layout(),
            plugins = ?hydrated.plugins.iter().map(|p| p.activity_type()).collect::<Vec<_>>(),
            "Generation prepared"
        );

        let outcomes = async_stream::stream! {
            let executor = SlotExecutor::new(
                generator.as_ref(),
                &hydrated,
                &messages,
                &defaults,
                model.as_deref(),
            );
            let request = ObjectRequest::new(BATCH_SCHEMA_NAME, hydrated.schema().clone(), messages.clone())
                .with_model(model.clone())
                .with_options(completion_options(&defaults));

            let mut snapshots = match generator.stream_object(request).await {
                Ok(snapshots) => Some(snapshots),
                Err(e) => {
                    error!(error = %e, "Generation stream failed to start");
                    yield Err(GenerationError::from(e));
                    None
                }
            };

            let mut emitted = 0usize;
            let mut skipped = 0usize;
            let mut demux = SlotDemuxer::new(hydrated.layout().clone());
            while let Some(stream) = snapshots.as_mut() {
                let (ready, finished) = match stream.next().await {
                    Some(Ok(snapshot)) => (demux.push(snapshot), false),
                    Some(Err(e)) => {
                        error!(error = %e, emitted, "Generation stream failed");
                        yield Err(GenerationError::from(e));
                        break;
                    }
                    None => (demux.finish(), true),
                };

                for (slot_index, raw) in ready {
                    let activity_type = declared_type(&raw).unwrap_or("<missing>").to_string();
                    match executor.run(slot_index, raw).await {
                        Ok(Some(outcome)) => {
                            emitted += 1;
                            yield Ok(outcome);
                        }
                        Ok(None) => skipped += 1,
                        Err(e) => {
                            skipped += 1;
                            error!(
                                slot_index,
                                activity_type = %activity_type,
                                error = %e,
                                "Slot processing failed, skipping slot"
                            );
                        }
                    }
                }

                if finished {
                    snapshots = None;
                }
            }
            info!(emitted, skipped, "Generation finished");
        };
        Ok(Box::pin(outcomes))
    }

    /// Generate a single activity.
    pub async fn generate_one(
        &self,
        request: GenerationRequest,
    ) -> Result<ActivityConfig, GenerationError> {
        let request = GenerationRequest {
            num_activities: Some(1),
            sequencing: None,
            ..request
        };
        let mut activities = self.generate(request).await?;
        match activities.next().await {
            Some(item) => item,
            None => Err(GenerationError::NoActivityGenerated),
        }
    }

    fn plugin_for(&self, activity_type: &str) -> Result<&Arc<dyn ActivityTypePlugin>, GenerationError> {
        self.registry.get(activity_type).ok_or_else(|| {
            GenerationError::InvalidActivity(format!(
                "no plugin registered for activity type '{}'",
                activity_type
            ))
        })
    }

    /// Grade an answer; `Ok(None)` when the activity type has no grader.
    pub async fn grade(
        &self,
        activity: &ActivityConfig,
        answer: &ActivityAnswer,
    ) -> Result<Option<GradeResult>, GenerationError> {
        let plugin = self.plugin_for(&activity.activity_type)?;
        let ctx = GradeContext {
            generator: self.generator.as_ref(),
            model: self.model.as_deref(),
        };
        let grade = plugin.grade(activity, answer, &ctx).await?;
        if grade.is_none() {
            warn!(activity_type = %activity.activity_type, "Activity type has no grader");
        }
        Ok(grade)
    }

    pub fn empty_config(&self, activity_type: &str) -> Option<ActivityConfig> {
        self.registry
            .get(activity_type)
            .and_then(|plugin| plugin.empty_config())
    }

    pub fn completed_tip(&self, activity: &ActivityConfig, grade: &GradeResult) -> Option<String> {
        self.registry
            .get(&activity.activity_type)
            .and_then(|plugin| plugin.completed_tip(activity, grade))
    }
}
