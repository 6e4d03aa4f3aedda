//! Prompt assembly
//!
//! Message order: one system message (framing, subject, constraints, plugin blocks,
//! reminders, citable resources), then injected context, then the caller's messages.

use crate::activity::{ActivityConfig, EvaluationResult};
use crate::error::GenerationError;
use crate::hydrate::HydratedContext;
use crate::plugin::PluginPrompt;
use crate::provider::{ChatMessage, MessageRole};
use crate::schema::SlotLayout;
use futures::future::join_all;

const FRAMING: &str = "You are an expert instructional designer. You write learning activities \
for an online learning platform. Every activity must be accurate, self-contained and pitched at \
the learner described below.";

const DEFAULT_USER_MESSAGE: &str = "Generate the activities now.";

fn layout_section(hydrated: &HydratedContext) -> String {
    match hydrated.layout() {
        SlotLayout::Sequenced { slots } => {
            let mut section = format!(
                "## Output\nProduce exactly {} activities as a JSON array, in this order:",
                slots.len()
            );
            let plan = hydrated.request.sequencing.as_deref().unwrap_or_default();
            for (index, types) in slots.iter().enumerate() {
                let allowed = if types.is_empty() {
                    "any listed activity type".to_string()
                } else {
                    types.join(" or ")
                };
                section.push_str(&format!("\n{}. {}", index + 1, allowed));
                if let Some(extra) = plan
                    .get(index)
                    .and_then(|slot| slot.additional_instructions.as_deref())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                {
                    section.push_str(&format!(": {}", extra));
                }
            }
            section
        }
        SlotLayout::FixedCount { count } => format!(
            "## Output\nProduce exactly {} activities as a JSON object whose keys are \"1\" \
             through \"{}\", one activity per key.",
            count, count
        ),
        SlotLayout::Unbounded => "## Output\nProduce a JSON array of activities. Choose the \
             number and mix of activity types that best teach the subject."
            .to_string(),
    }
}

fn resources_section(hydrated: &HydratedContext) -> Option<String> {
    let mut entries = Vec::new();
    for resource in &hydrated.resources {
        let doc_id = resource
            .id
            .as_deref()
            .or(resource.name.as_deref())
            .or(resource.source.as_deref());
        if let Some(doc_id) = doc_id {
            let title = resource.name.as_deref().unwrap_or(doc_id);
            entries.push(format!("### {} (docId: `{}`)\n{}", title, doc_id, resource.content));
        }
    }
    for chunk in &hydrated.chunks {
        if let Some(doc_id) = chunk.id.as_deref() {
            entries.push(format!("### Excerpt (docId: `{}`)\n{}", doc_id, chunk.content));
        }
    }
    if entries.is_empty() {
        return None;
    }
    Some(format!(
        "## Resources\nWhen an activity draws on these documents, cite them. Each citation gives \
         the docId and a startText and endText copied exactly from the document.\n\n{}",
        entries.join("\n\n")
    ))
}

fn context_sections(hydrated: &HydratedContext) -> Vec<String> {
    let mut sections = Vec::new();
    if let Some(profile) = hydrated.user_profile.as_deref().filter(|p| !p.trim().is_empty()) {
        sections.push(format!("## Learner\n{}", profile.trim()));
    }
    if let Some(extra) = hydrated
        .request
        .additional_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sections.push(format!("## Additional instructions\n{}", extra));
    }
    if !hydrated.prior_activities.is_empty() {
        sections.push(format!(
            "## Activities to emulate\nMatch the style and difficulty of these activities.\n\n{}",
            fenced(&hydrated.prior_activities)
        ));
    }
    if !hydrated.reference_activities.is_empty() {
        sections.push(format!(
            "## Reference activities\n{}",
            fenced(&hydrated.reference_activities)
        ));
    }
    sections
}

fn fenced(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("```json\n{}\n```", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render every plugin's instruction block concurrently, kept in plugin order.
async fn plugin_prompts(hydrated: &HydratedContext) -> Result<Vec<PluginPrompt>, GenerationError> {
    join_all(
        hydrated
            .plugins
            .iter()
            .map(|p| p.plugin.render_instructions(&p.config, hydrated)),
    )
    .await
    .into_iter()
    .collect()
}

/// Build the message list for the primary generation call.
pub async fn assemble_messages(
    hydrated: &HydratedContext,
) -> Result<Vec<ChatMessage>, GenerationError> {
    let prompts = plugin_prompts(hydrated).await?;

    let mut sections = vec![
        FRAMING.to_string(),
        format!("## Subject\n{}", hydrated.subject),
        layout_section(hydrated),
    ];
    sections.extend(context_sections(hydrated));
    sections.extend(prompts.iter().map(|p| p.primary.clone()));

    let reminders: Vec<&str> = prompts
        .iter()
        .filter_map(|p| p.final_reminders.as_deref())
        .collect();
    if !reminders.is_empty() {
        sections.push(format!("## Final reminders\n{}", reminders.join("\n")));
    }
    sections.extend(resources_section(hydrated));

    let mut messages = vec![ChatMessage::system(sections.join("\n\n"))];
    messages.extend(hydrated.context.iter().cloned().map(|c| c.into_message()));
    messages.extend(hydrated.request.messages.iter().cloned());
    if !messages.iter().any(|m| m.role == MessageRole::User) {
        messages.push(ChatMessage::user(DEFAULT_USER_MESSAGE));
    }
    Ok(messages)
}

/// The original messages plus the assistant echo of `invalid` and a corrective user turn.
pub fn repair_messages(
    original: &[ChatMessage],
    invalid: &ActivityConfig,
    evaluation: &EvaluationResult,
) -> Vec<ChatMessage> {
    let echoed = serde_json::to_string_pretty(&invalid.to_value()).unwrap_or_default();
    let mut messages = original.to_vec();
    messages.push(ChatMessage::assistant(echoed));
    messages.push(ChatMessage::user(format!(
        "The activity above did not pass review.\n\n{}\nReturn one corrected {} activity that \
         fixes every issue. Keep whatever was already correct.",
        evaluation.render_feedback(),
        invalid.activity_type
    )));
    messages
}
