use crate::config::GenerationDefaults;
use crate::hydrate::HydratedContext;
use crate::plugin::HydratedPlugin;
use crate::request::EffectivePolicy;
use crate::schema::plugins_for_slot;

/// What one slot may contain and the policies it runs under
#[derive(Debug, Clone)]
pub struct SlotPlan<'a> {
    pub slot_index: usize,
    pub plugins: Vec<&'a HydratedPlugin>,
    pub policy: EffectivePolicy,
}

impl<'a> SlotPlan<'a> {
    /// The eligible plugin owning `activity_type`, if any
    pub fn plugin_for(&self, activity_type: &str) -> Option<&'a HydratedPlugin> {
        self.plugins
            .iter()
            .copied()
            .find(|p| p.activity_type() == activity_type)
    }

    /// Passes the repair loop may take for `plugin`; one unless it will be evaluated.
    pub fn max_passes(&self, plugin: &HydratedPlugin) -> u32 {
        if self.policy.evaluator.enabled && plugin.plugin.supports_evaluation() {
            self.policy.evaluator.effective_loops()
        } else {
            1
        }
    }
}

pub fn plan_slot<'a>(
    hydrated: &'a HydratedContext,
    slot_index: usize,
    defaults: &GenerationDefaults,
) -> SlotPlan<'a> {
    let sequence_slot = hydrated
        .request
        .sequencing
        .as_ref()
        .and_then(|slots| slots.get(slot_index));
    SlotPlan {
        slot_index,
        plugins: plugins_for_slot(&hydrated.plugins, hydrated.layout(), slot_index),
        policy: hydrated.request.effective_policy(sequence_slot, defaults),
    }
}
