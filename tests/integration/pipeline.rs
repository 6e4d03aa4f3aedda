//! Integration tests for request hydration, ordering and stream lifecycle

use crate::integration::test_utils::{
    generator_for, registry_of, text_activity, FixedExplainer, Judgement, ScriptedPlugin,
};
use activitygen::activity::ActivityAnswer;
use activitygen::generation::ActivityGenerator;
use activitygen::hydrate::{HydratedContext, HydrationSources, Resource};
use activitygen::plugin::{
    ActivityTypePlugin, GenConfigArgs, HydratedPlugin, MultipleChoicePlugin, PluginRegistry,
};
use activitygen::provider::MessageRole;
use activitygen::request::{EvaluatorPolicy, GenerationRequest, Subject};
use activitygen::structured::StubGenerator;
use activitygen::GenerationError;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_emission_follows_arrival_order_not_completion_time() {
    let slow = Arc::new(
        ScriptedPlugin::new("essay")
            .judging(&[Judgement::Valid])
            .with_evaluate_delay(Duration::from_millis(50)),
    );
    let fast = Arc::new(ScriptedPlugin::new("note"));
    let stub = Arc::new(StubGenerator::new().with_chunk_size(7).with_stream_output(json!([
        text_activity("essay", "A"),
        text_activity("note", "B"),
        text_activity("note", "C")
    ])));
    let generator = generator_for(registry_of(vec![slow, fast]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.evaluator = Some(EvaluatorPolicy::enabled(1));

    let texts: Vec<String> = generator
        .generate(request)
        .await
        .unwrap()
        .map(|item| item.unwrap().field_str("text").unwrap_or_default().to_string())
        .collect()
        .await;

    assert_eq!(texts, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_empty_registry_fails_before_any_model_call() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([])));
    let explainer = FixedExplainer::new("Photosynthesis");
    let generator = ActivityGenerator::new(
        stub.clone(),
        PluginRegistry::new(),
        HydrationSources::new(explainer.clone()),
    );

    let err = generator
        .generate(GenerationRequest::for_subject(Subject::skill("skill-42")))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, GenerationError::NoValidPlugins { slot: None }));
    assert!(err.is_configuration());
    assert_eq!(stub.model_calls(), 0);
    assert_eq!(explainer.calls(), 0);
}

#[tokio::test]
async fn test_allowlist_without_registered_types_fails() {
    let stub = Arc::new(StubGenerator::new());
    let generator = generator_for(PluginRegistry::with_builtin(), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.valid_activity_types = Some(vec!["roleplay".to_string()]);

    let err = generator.generate(request).await.err().unwrap();
    assert!(matches!(err, GenerationError::NoValidPlugins { .. }));
    assert_eq!(stub.model_calls(), 0);
}

#[tokio::test]
async fn test_skill_subject_goes_through_explainer() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([])));
    let explainer = FixedExplainer::new("Light reactions within Photosynthesis");
    let generator = ActivityGenerator::new(
        stub.clone(),
        registry_of(vec![Arc::new(ScriptedPlugin::new("note"))]),
        HydrationSources::new(explainer.clone()),
    );

    let _: Vec<_> = generator
        .generate(GenerationRequest::for_subject(Subject::skill("skill-42")))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(explainer.calls(), 1);
    let request = &stub.stream_requests()[0];
    assert_eq!(request.schema_name, "activities");
    assert_eq!(request.messages[0].role, MessageRole::System);
    assert!(request.messages[0]
        .content
        .contains("Light reactions within Photosynthesis"));
    assert_eq!(request.messages.last().unwrap().role, MessageRole::User);
}

#[tokio::test]
async fn test_hydration_override_replaces_retrieval() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([{
        "type": "note",
        "text": "Sugar",
        "citations": [{"docId": "notes", "startText": "Plants", "endText": "sugar"}]
    }])));
    let explainer = FixedExplainer::new("unused");
    let generator = ActivityGenerator::new(
        stub.clone(),
        PluginRegistry::new(),
        HydrationSources::new(explainer.clone()),
    )
    .with_hydration_override(|request| async move {
        let plugin: Arc<dyn ActivityTypePlugin> = Arc::new(ScriptedPlugin::new("note"));
        let config = plugin
            .gen_config(&GenConfigArgs {
                subject: "Sugar",
                request: &request,
            })
            .await?;
        let context = HydratedContext::new(request, "Sugar", vec![HydratedPlugin { plugin, config }])?
            .with_resources(vec![Resource::new("notes", "Plants make sugar")]);
        Ok::<_, GenerationError>(context)
    });

    let activities: Vec<_> = generator
        .generate(GenerationRequest::default())
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(explainer.calls(), 0);
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].citations.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dropping_the_stream_stops_processing() {
    let plugin = Arc::new(ScriptedPlugin::new("note"));
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([
        text_activity("note", "A"),
        text_activity("note", "B"),
        text_activity("note", "C")
    ])));
    let generator = generator_for(registry_of(vec![plugin.clone()]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Photosynthesis"));
    request.evaluator = Some(EvaluatorPolicy::enabled(1));

    let mut stream = generator.generate(request).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    drop(stream);

    assert_eq!(first.field_str("text"), Some("A"));
    assert_eq!(plugin.evaluations(), 1);
}

#[tokio::test]
async fn test_grading_dispatches_by_type_tag() {
    let stub = Arc::new(StubGenerator::new());
    let generator = generator_for(registry_of(vec![Arc::new(MultipleChoicePlugin)]), &stub);
    let activity = activitygen::ActivityConfig::from_value(json!({
        "type": "multiple-choice",
        "question": "Which gas do plants release?",
        "answerChoices": [
            {"text": "Oxygen", "isCorrect": true, "explanation": "Water is split, releasing oxygen."},
            {"text": "Helium", "isCorrect": false, "explanation": "Plants do not produce helium."}
        ]
    }))
    .unwrap();

    let grade = generator
        .grade(&activity, &ActivityAnswer::Choice { index: 0 })
        .await
        .unwrap()
        .unwrap();
    assert!(grade.is_correct);
    assert_eq!(stub.model_calls(), 0);

    let wrong = generator
        .grade(&activity, &ActivityAnswer::Text { text: "helium".to_string() })
        .await
        .unwrap()
        .unwrap();
    assert!(!wrong.is_correct);
    assert_eq!(
        generator.completed_tip(&activity, &wrong).as_deref(),
        Some("Water is split, releasing oxygen.")
    );
}
