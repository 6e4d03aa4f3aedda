//! Integration tests for the composed output contract

use crate::integration::test_utils::{generator_for, registry_of};
use activitygen::plugin::{FlashcardPlugin, PluginRegistry};
use activitygen::request::{GenerationRequest, SequenceSlot, Subject};
use activitygen::schema::validate_instance;
use activitygen::structured::StubGenerator;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;

fn slide() -> Value {
    json!({"type": "slide", "title": "Light", "markdownContent": "Plants absorb light."})
}

fn flashcard(front: &str) -> Value {
    json!({"type": "flashcard", "frontContent": front, "backContent": "Chlorophyll"})
}

fn multiple_choice() -> Value {
    json!({
        "type": "multiple-choice",
        "question": "Which pigment absorbs light?",
        "answerChoices": [
            {"text": "Chlorophyll", "isCorrect": true, "explanation": "It absorbs red and blue light."},
            {"text": "Keratin", "isCorrect": false, "explanation": "Keratin is a structural protein."}
        ]
    })
}

/// The schema the batch stream was asked to satisfy
async fn composed_schema(registry: PluginRegistry, request: GenerationRequest) -> Value {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([])));
    let generator = generator_for(registry, &stub);
    let _: Vec<_> = generator
        .generate(request)
        .await
        .unwrap()
        .collect()
        .await;
    stub.stream_requests()[0].schema.clone()
}

#[tokio::test]
async fn test_sequenced_schema_constrains_each_position() {
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.sequencing = Some(vec![
        SequenceSlot::of_types(["slide"]),
        SequenceSlot::of_types(["flashcard", "multiple-choice"]),
    ]);
    let schema = composed_schema(PluginRegistry::with_builtin(), request).await;

    assert!(validate_instance(&schema, &json!([slide(), flashcard("What absorbs light?")])).is_ok());
    assert!(validate_instance(&schema, &json!([slide(), multiple_choice()])).is_ok());

    assert!(validate_instance(&schema, &json!([flashcard("Q"), flashcard("Q")])).is_err());
    assert!(validate_instance(&schema, &json!([flashcard("Q"), multiple_choice()])).is_err());
    assert!(validate_instance(&schema, &json!([slide(), slide()])).is_err());
    assert!(validate_instance(&schema, &json!([slide()])).is_err());
    assert!(validate_instance(&schema, &json!([slide(), flashcard("Q"), slide()])).is_err());
}

#[tokio::test]
async fn test_fixed_count_yields_exactly_that_many_activities() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!({
        "1": flashcard("What absorbs light?"),
        "2": flashcard("Where does photosynthesis happen?"),
        "3": flashcard("What gas is released?")
    })));
    let generator = generator_for(registry_of(vec![Arc::new(FlashcardPlugin)]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.num_activities = Some(3);

    let activities: Vec<_> = generator
        .generate(request)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(activities.len(), 3);
    assert!(activities.iter().all(|a| a.activity_type == "flashcard"));
    assert_eq!(activities[1].field_str("frontContent"), Some("Where does photosynthesis happen?"));

    let schema = &stub.stream_requests()[0].schema;
    assert_eq!(schema["required"], json!(["1", "2", "3"]));
    assert_eq!(schema["additionalProperties"], json!(false));
}

#[tokio::test]
async fn test_fixed_count_ignores_surplus_keys() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!({
        "1": flashcard("One"),
        "2": flashcard("Two"),
        "extra": flashcard("Nope")
    })));
    let generator = generator_for(registry_of(vec![Arc::new(FlashcardPlugin)]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.num_activities = Some(1);

    let activities: Vec<_> = generator.generate(request).await.unwrap().collect().await;
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].as_ref().unwrap().field_str("frontContent"), Some("One"));
}

#[tokio::test]
async fn test_unbounded_schema_is_an_array_of_the_union() {
    let request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    let schema = composed_schema(PluginRegistry::with_builtin(), request).await;

    assert_eq!(schema["type"], json!("array"));
    assert!(validate_instance(&schema, &json!([])).is_ok());
    assert!(validate_instance(&schema, &json!([multiple_choice(), slide(), flashcard("Q")])).is_ok());
    assert!(validate_instance(&schema, &json!([{"type": "roleplay"}])).is_err());
}
