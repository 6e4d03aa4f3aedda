//! Output contract composition.
//!
//! Builds the JSON Schema the model must satisfy for one request. The same
//! [`SlotLayout`] drives both composition here and demultiplexing of the streamed
//! output, so the two cannot disagree about where slots live.

use crate::error::GenerationError;
use crate::plugin::HydratedPlugin;
use crate::request::GenerationRequest;
use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Map, Value};

/// How activity slots are arranged in the model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLayout {
    /// Ordered tuple; entry `i` lists the types allowed in slot `i` (empty = any)
    Sequenced { slots: Vec<Vec<String>> },
    /// Object keyed `"1"..="count"`
    FixedCount { count: usize },
    /// Array of any length
    Unbounded,
}

impl SlotLayout {
    /// Sequencing wins over a fixed count; neither means unbounded.
    pub fn for_request(request: &GenerationRequest) -> Self {
        if let Some(slots) = &request.sequencing {
            return SlotLayout::Sequenced {
                slots: slots.iter().map(|s| s.activity_types.clone()).collect(),
            };
        }
        match request.num_activities {
            Some(count) => SlotLayout::FixedCount { count },
            None => SlotLayout::Unbounded,
        }
    }

    /// Exact number of slots, when the layout fixes one
    pub fn slot_count(&self) -> Option<usize> {
        match self {
            SlotLayout::Sequenced { slots } => Some(slots.len()),
            SlotLayout::FixedCount { count } => Some(*count),
            SlotLayout::Unbounded => None,
        }
    }

    /// Type constraints for one slot; `None` when every request plugin applies.
    pub fn slot_types(&self, slot_index: usize) -> Option<&[String]> {
        match self {
            SlotLayout::Sequenced { slots } => slots
                .get(slot_index)
                .map(Vec::as_slice)
                .filter(|types| !types.is_empty()),
            _ => None,
        }
    }
}

/// The composed contract for one request
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub schema: Value,
    pub layout: SlotLayout,
}

fn citation_schema() -> Value {
    json!({
        "type": ["array", "null"],
        "description": "Spans of the provided resources that support this activity. startText and endText must be copied verbatim from the cited document.",
        "items": {
            "type": "object",
            "properties": {
                "docId": { "type": "string" },
                "startText": { "type": "string" },
                "endText": { "type": "string" }
            },
            "required": ["docId", "startText", "endText"]
        }
    })
}

/// Extend an activity schema with the optional, nullable `citations` field.
pub fn with_citations(schema: &Value) -> Value {
    let mut extended = schema.clone();
    if let Some(object) = extended.as_object_mut() {
        let properties = object
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(properties) = properties.as_object_mut() {
            properties.insert("citations".to_string(), citation_schema());
        }
    }
    extended
}

/// A bare schema for one member, `anyOf` for several.
pub fn union_of(mut schemas: Vec<Value>) -> Value {
    if schemas.len() == 1 {
        return schemas.remove(0);
    }
    json!({ "anyOf": schemas })
}

/// Plugins eligible for a slot, in request plugin order.
pub fn plugins_for_slot<'a>(
    plugins: &'a [HydratedPlugin],
    layout: &SlotLayout,
    slot_index: usize,
) -> Vec<&'a HydratedPlugin> {
    match layout.slot_types(slot_index) {
        Some(types) => plugins
            .iter()
            .filter(|p| types.iter().any(|t| t == p.activity_type()))
            .collect(),
        None => plugins.iter().collect(),
    }
}

fn union_for<'a>(
    plugins: impl IntoIterator<Item = &'a HydratedPlugin>,
    slot: Option<usize>,
) -> Result<Value, GenerationError> {
    let schemas: Vec<Value> = plugins.into_iter().map(HydratedPlugin::output_schema).collect();
    if schemas.is_empty() {
        return Err(GenerationError::NoValidPlugins { slot });
    }
    Ok(union_of(schemas))
}

/// Compose the output contract for `plugins` under `layout`.
pub fn compose_output_schema(
    plugins: &[HydratedPlugin],
    layout: SlotLayout,
) -> Result<OutputSchema, GenerationError> {
    if plugins.is_empty() {
        return Err(GenerationError::NoValidPlugins { slot: None });
    }

    let schema = match &layout {
        SlotLayout::Sequenced { slots } => {
            let mut items = Vec::with_capacity(slots.len());
            for slot_index in 0..slots.len() {
                let eligible = plugins_for_slot(plugins, &layout, slot_index);
                items.push(union_for(eligible, Some(slot_index))?);
            }
            json!({
                "type": "array",
                "items": items,
                "minItems": slots.len(),
                "maxItems": slots.len(),
                "additionalItems": false
            })
        }
        SlotLayout::FixedCount { count } => {
            let member = union_for(plugins, None)?;
            let keys: Vec<String> = (1..=*count).map(|k| k.to_string()).collect();
            let properties: Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), member.clone()))
                .collect();
            json!({
                "type": "object",
                "properties": properties,
                "required": keys,
                "additionalProperties": false
            })
        }
        SlotLayout::Unbounded => json!({
            "type": "array",
            "items": union_for(plugins, None)?
        }),
    };

    Ok(OutputSchema { schema, layout })
}

/// Validate `instance` against `schema`, returning every violation message.
pub fn validate_instance(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| vec![format!("invalid schema: {}", e)])?;
    let outcome = match compiled.validate(instance) {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
    };
    outcome
}
