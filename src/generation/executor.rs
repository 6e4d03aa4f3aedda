//! Per-slot executor: type resolution, post-processing, citation cleanup, evaluation and
//! corrective regeneration for one finalized slot object.
//!
//! Slots move `Pending -> PostProcessed -> Evaluating -> (Valid | RepairRequested)`;
//! a repair loops back to `PostProcessed` with the regenerated candidate. Every invalid
//! verdict within the loop bound triggers a regeneration; when the bound is reached the
//! last regenerated candidate is cleaned once more and emitted.

use crate::activity::{declared_type, ActivityConfig, EvaluationResult};
use crate::citation::{resolve_activity_citations, RejectedCitation};
use crate::config::GenerationDefaults;
use crate::error::GenerationError;
use crate::generation::plan::{plan_slot, SlotPlan};
use crate::hydrate::HydratedContext;
use crate::plugin::{HydratedPlugin, SlotContext};
use crate::prompt::repair_messages;
use crate::provider::{ChatMessage, CompletionOptions};
use crate::structured::{ObjectRequest, StructuredGenerator};
use serde_json::Value;
use tracing::{debug, warn};

/// How a slot's repair loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotVerdict {
    /// The evaluator accepted the candidate
    Valid,
    /// Evaluation was disabled or unsupported; the first pass is final
    Unevaluated,
    /// Every pass was judged invalid; the last regenerated candidate is emitted anyway
    Exhausted,
}

/// Diagnostic record for one emitted slot
#[derive(Debug, Clone)]
pub struct SlotOutcome {
    pub slot_index: usize,
    pub activity: ActivityConfig,
    pub verdict: SlotVerdict,
    /// Passes through the loop, including the first
    pub iterations: u32,
    pub regenerations: u32,
    /// Citations dropped from the emitted candidate
    pub rejected_citations: Vec<RejectedCitation>,
    /// Every invalid evaluation, oldest first
    pub feedback: Vec<EvaluationResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    PostProcessed,
    Evaluating,
    RepairRequested,
}

/// Runs the repair loop for slots of one request
pub struct SlotExecutor<'a> {
    generator: &'a dyn StructuredGenerator,
    hydrated: &'a HydratedContext,
    /// Messages of the primary call; repairs extend them
    messages: &'a [ChatMessage],
    defaults: &'a GenerationDefaults,
    model: Option<&'a str>,
}

impl<'a> SlotExecutor<'a> {
    pub fn new(
        generator: &'a dyn StructuredGenerator,
        hydrated: &'a HydratedContext,
        messages: &'a [ChatMessage],
        defaults: &'a GenerationDefaults,
        model: Option<&'a str>,
    ) -> Self {
        Self {
            generator,
            hydrated,
            messages,
            defaults,
            model,
        }
    }

    /// Process one finalized slot object.
    ///
    /// `Ok(None)` means the slot was skipped as recoverable (no plugin for its type).
    /// `Err` aborts only this slot.
    pub async fn run(
        &self,
        slot_index: usize,
        raw: Value,
    ) -> Result<Option<SlotOutcome>, GenerationError> {
        let plan = plan_slot(self.hydrated, slot_index, self.defaults);
        let plugin = match declared_type(&raw).and_then(|t| plan.plugin_for(t)) {
            Some(plugin) => plugin,
            None => {
                warn!(
                    slot_index,
                    declared_type = declared_type(&raw).unwrap_or("<missing>"),
                    allowed = ?plan.plugins.iter().map(|p| p.activity_type()).collect::<Vec<_>>(),
                    "No plugin for slot object type, skipping slot"
                );
                return Ok(None);
            }
        };
        let candidate = ActivityConfig::from_value(raw)
            .map_err(|e| GenerationError::InvalidActivity(e.to_string()))?;
        self.repair_loop(&plan, plugin, candidate).await.map(Some)
    }

    async fn repair_loop(
        &self,
        plan: &SlotPlan<'_>,
        plugin: &HydratedPlugin,
        mut candidate: ActivityConfig,
    ) -> Result<SlotOutcome, GenerationError> {
        let slot_index = plan.slot_index;
        let activity_type = plugin.activity_type();
        let max_passes = plan.max_passes(plugin);
        let evaluating = plan.policy.evaluator.enabled && plugin.plugin.supports_evaluation();
        let ctx = SlotContext {
            generator: self.generator,
            hydrated: self.hydrated,
            slot_index,
            additional_instructions: plan.policy.additional_instructions.as_deref(),
            model: self.model,
        };

        let mut state = SlotState::Pending;
        let mut feedback: Vec<EvaluationResult> = Vec::new();
        let mut rejected: Vec<RejectedCitation> = Vec::new();
        let mut regenerations = 0u32;
        let mut verdict = SlotVerdict::Exhausted;
        let mut iterations = max_passes;

        for iteration in 1..=max_passes {
            debug!(slot_index, activity_type, iteration, from = ?state, "Slot pass started");

            (candidate, rejected) = self.clean(plan, plugin, candidate, &ctx).await;
            state = SlotState::PostProcessed;
            debug!(
                slot_index,
                activity_type,
                iteration,
                rejected_citations = rejected.len(),
                state = ?state,
                "Slot candidate cleaned"
            );

            if !evaluating {
                verdict = SlotVerdict::Unevaluated;
                iterations = iteration;
                break;
            }

            state = SlotState::Evaluating;
            let evaluation = match plugin.plugin.evaluate(&candidate, &ctx).await? {
                Some(evaluation) => evaluation,
                None => {
                    verdict = SlotVerdict::Unevaluated;
                    iterations = iteration;
                    break;
                }
            };

            if evaluation.is_valid {
                debug!(slot_index, activity_type, iteration, "Slot valid");
                verdict = SlotVerdict::Valid;
                iterations = iteration;
                break;
            }

            debug!(
                slot_index,
                activity_type,
                iteration,
                issues = evaluation.feedback.issues.len(),
                from = ?state,
                "Slot judged invalid"
            );
            state = SlotState::RepairRequested;
            candidate = self.regenerate(plugin, &candidate, &evaluation).await?;
            feedback.push(evaluation);
            regenerations += 1;
            debug!(slot_index, activity_type, regenerations, from = ?state, "Slot regenerated");
        }

        if verdict == SlotVerdict::Exhausted {
            (candidate, rejected) = self.clean(plan, plugin, candidate, &ctx).await;
            warn!(
                slot_index,
                activity_type,
                passes = max_passes,
                regenerations,
                "Evaluation loop exhausted, emitting last candidate"
            );
        }

        Ok(SlotOutcome {
            slot_index,
            activity: candidate,
            verdict,
            iterations,
            regenerations,
            rejected_citations: rejected,
            feedback,
        })
    }

    /// Post-process (when enabled) and drop unverifiable citations.
    async fn clean(
        &self,
        plan: &SlotPlan<'_>,
        plugin: &HydratedPlugin,
        mut candidate: ActivityConfig,
        ctx: &SlotContext<'_>,
    ) -> (ActivityConfig, Vec<RejectedCitation>) {
        if plan.policy.postprocessing.enabled && plugin.plugin.supports_post_process() {
            match plugin.plugin.post_process(&candidate, ctx).await {
                Ok(Some(processed)) => candidate = processed,
                Ok(None) => {}
                Err(e) => warn!(
                    slot_index = plan.slot_index,
                    activity_type = plugin.activity_type(),
                    error = %e,
                    "Post-processing failed, keeping activity unmodified"
                ),
            }
        }
        resolve_activity_citations(candidate, self.hydrated)
    }

    async fn regenerate(
        &self,
        plugin: &HydratedPlugin,
        invalid: &ActivityConfig,
        evaluation: &EvaluationResult,
    ) -> Result<ActivityConfig, GenerationError> {
        let messages = repair_messages(self.messages, invalid, evaluation);
        let request = ObjectRequest::new(plugin.activity_type(), plugin.output_schema(), messages)
            .with_model(self.model.map(str::to_string))
            .with_options(completion_options(self.defaults));
        let value = self.generator.generate_object(request).await?;
        let mut regenerated = ActivityConfig::from_value(value)
            .map_err(|e| GenerationError::InvalidActivity(e.to_string()))?;
        regenerated.activity_type = plugin.activity_type().to_string();
        Ok(regenerated)
    }
}

pub(crate) fn completion_options(defaults: &GenerationDefaults) -> CompletionOptions {
    let base = CompletionOptions::default();
    CompletionOptions {
        temperature: defaults.temperature.or(base.temperature),
        ..base
    }
}
