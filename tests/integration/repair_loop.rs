//! Integration tests for the evaluate-and-repair loop

use crate::integration::test_utils::{
    generator_for, registry_of, text_activity, Judgement, ScriptedPlugin,
};
use activitygen::error::ApiError;
use activitygen::generation::{SlotOutcome, SlotVerdict};
use activitygen::provider::MessageRole;
use activitygen::request::{EvaluatorPolicy, GenerationRequest, SequenceSlot, Subject};
use activitygen::structured::StubGenerator;
use activitygen::ActivityGenerator;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

fn evaluated_request(max_eval_loops: u32) -> GenerationRequest {
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.evaluator = Some(EvaluatorPolicy::enabled(max_eval_loops));
    request
}

async fn outcomes(generator: &ActivityGenerator, request: GenerationRequest) -> Vec<SlotOutcome> {
    generator
        .generate_outcomes(request)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn test_single_invalid_verdict_triggers_one_repair() {
    let plugin = Arc::new(ScriptedPlugin::new("note").judging(&[Judgement::Invalid, Judgement::Valid]));
    let stub = Arc::new(
        StubGenerator::new()
            .with_stream_output(json!([text_activity("note", "Plants eat")]))
            .with_object(text_activity("note", "Plants turn light into sugar")),
    );
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);

    let outcomes = outcomes(&generator, evaluated_request(2)).await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.verdict, SlotVerdict::Valid);
    assert_eq!(outcome.regenerations, 1);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.activity.field_str("text"), Some("Plants turn light into sugar"));
    assert_eq!(plugin.evaluations(), 2);
    assert_eq!(stub.object_calls(), 1);
}

#[tokio::test]
async fn test_repair_request_carries_feedback_and_type_schema() {
    let plugin = Arc::new(ScriptedPlugin::new("note").judging(&[Judgement::Invalid]));
    let stub = Arc::new(
        StubGenerator::new()
            .with_stream_output(json!([text_activity("note", "Plants eat")]))
            .with_object(json!({"type": "wrong", "text": "Plants make sugar"})),
    );
    let generator = generator_for(registry_of(vec![plugin]), &stub);

    let outcomes = outcomes(&generator, evaluated_request(2)).await;
    assert_eq!(outcomes[0].activity.activity_type, "note");

    let repair = &stub.object_requests()[0];
    assert_eq!(repair.schema_name, "note");
    assert_eq!(repair.schema["properties"]["type"]["const"], json!("note"));
    let roles: Vec<MessageRole> = repair.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles[roles.len() - 2], MessageRole::Assistant);
    assert_eq!(roles[roles.len() - 1], MessageRole::User);
    assert!(repair.messages[roles.len() - 2].content.contains("Plants eat"));
    assert!(repair.messages[roles.len() - 1].content.contains("The text is too vague"));
}

#[tokio::test]
async fn test_exhausted_loop_emits_last_candidate() {
    let plugin = Arc::new(
        ScriptedPlugin::new("note").judging(&[Judgement::Invalid, Judgement::Invalid, Judgement::Invalid]),
    );
    let stub = Arc::new(
        StubGenerator::new()
            .with_stream_output(json!([text_activity("note", "first")]))
            .with_object(text_activity("note", "second"))
            .with_object(text_activity("note", "third"))
            .with_object(text_activity("note", "fourth")),
    );
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);

    let outcomes = outcomes(&generator, evaluated_request(3)).await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.verdict, SlotVerdict::Exhausted);
    assert_eq!(outcome.regenerations, 3);
    assert_eq!(outcome.feedback.len(), 3);
    assert_eq!(outcome.activity.field_str("text"), Some("fourth"));
    assert_eq!(plugin.evaluations(), 3);
    assert_eq!(stub.object_calls(), 3);
}

#[tokio::test]
async fn test_single_pass_budget_still_repairs_once() {
    let plugin = Arc::new(
        ScriptedPlugin::new("note")
            .judging(&[Judgement::Invalid])
            .with_post_process(),
    );
    let stub = Arc::new(
        StubGenerator::new()
            .with_stream_output(json!([text_activity("note", "draft")]))
            .with_object(text_activity("note", "repaired")),
    );
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);

    let outcomes = outcomes(&generator, evaluated_request(1)).await;

    let outcome = &outcomes[0];
    assert_eq!(outcome.verdict, SlotVerdict::Exhausted);
    assert_eq!(outcome.regenerations, 1);
    assert_eq!(outcome.activity.field_str("text"), Some("repaired [checked]"));
    assert_eq!(plugin.evaluations(), 1);
    assert_eq!(stub.object_calls(), 1);
}

#[tokio::test]
async fn test_disabled_evaluator_is_never_invoked() {
    let plugin = Arc::new(
        ScriptedPlugin::new("note")
            .judging(&[Judgement::Invalid, Judgement::Invalid])
            .with_post_process(),
    );
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([text_activity("note", "draft")])));
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.evaluator = Some(EvaluatorPolicy::disabled());

    let outcomes = outcomes(&generator, request).await;

    assert_eq!(plugin.evaluations(), 0);
    assert_eq!(plugin.post_processed(), 1);
    assert_eq!(outcomes[0].verdict, SlotVerdict::Unevaluated);
    assert_eq!(outcomes[0].activity.field_str("text"), Some("draft [checked]"));
    assert_eq!(stub.object_calls(), 0);
}

#[tokio::test]
async fn test_failing_slot_does_not_abort_its_siblings() {
    let broken = Arc::new(ScriptedPlugin::new("broken").judging(&[Judgement::Fail]));
    let healthy = Arc::new(ScriptedPlugin::new("note"));
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([
        text_activity("broken", "first"),
        text_activity("note", "second")
    ])));
    let generator = generator_for(registry_of(vec![broken.clone(), healthy]), &stub);
    let mut request = evaluated_request(2);
    request.sequencing = Some(vec![
        SequenceSlot::of_types(["broken"]),
        SequenceSlot::of_types(["note"]),
    ]);

    let items: Vec<_> = generator.generate(request).await.unwrap().collect().await;

    assert_eq!(items.len(), 1);
    let activity = items[0].as_ref().unwrap();
    assert_eq!(activity.activity_type, "note");
    assert_eq!(activity.field_str("text"), Some("second"));
    assert_eq!(broken.evaluations(), 1);
}

#[tokio::test]
async fn test_failed_regeneration_drops_only_that_slot() {
    let flaky = Arc::new(ScriptedPlugin::new("note").judging(&[Judgement::Invalid, Judgement::Valid]));
    let stub = Arc::new(
        StubGenerator::new()
            .with_stream_output(json!([
                text_activity("note", "first"),
                text_activity("note", "second")
            ]))
            .with_object_error(ApiError::ProviderRateLimit("slow down".to_string())),
    );
    let generator = generator_for(registry_of(vec![flaky]), &stub);

    let outcomes = outcomes(&generator, evaluated_request(2)).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].slot_index, 1);
    assert_eq!(outcomes[0].verdict, SlotVerdict::Valid);
}

#[tokio::test]
async fn test_slot_override_enables_evaluation_for_one_slot() {
    let plugin = Arc::new(ScriptedPlugin::new("note"));
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([
        text_activity("note", "first"),
        text_activity("note", "second")
    ])));
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.sequencing = Some(vec![
        SequenceSlot::of_types(["note"]),
        SequenceSlot {
            evaluator: Some(EvaluatorPolicy::enabled(2)),
            ..SequenceSlot::of_types(["note"])
        },
    ]);

    let outcomes = outcomes(&generator, request).await;

    assert_eq!(outcomes[0].verdict, SlotVerdict::Unevaluated);
    assert_eq!(outcomes[1].verdict, SlotVerdict::Valid);
    assert_eq!(plugin.evaluations(), 1);
}
