//! Integration tests for citation verification during generation

use crate::integration::test_utils::{generator_for, registry_of, InMemoryRetriever, FixedExplainer};
use activitygen::activity::Citation;
use activitygen::citation::CitationIndex;
use activitygen::generation::ActivityGenerator;
use activitygen::hydrate::{HydrationSources, Resource};
use activitygen::plugin::SlidePlugin;
use activitygen::request::{GenerationRequest, SourceDocument, Subject};
use activitygen::structured::StubGenerator;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

fn citation(doc_id: &str, start_text: &str, end_text: &str) -> Citation {
    Citation {
        doc_id: doc_id.to_string(),
        start_text: start_text.to_string(),
        end_text: end_text.to_string(),
    }
}

#[test]
fn test_verbatim_spans_survive_and_missing_spans_are_rejected() {
    let resources = vec![Resource::new("doc1", "Hello world foo bar")];
    let index = CitationIndex::new(&resources, &[], &[]);

    let kept = index.resolve(&[citation("doc1", "Hello", "bar")]);
    assert_eq!(kept.citations, vec![citation("doc1", "Hello", "bar")]);
    assert!(kept.rejected.is_empty());

    let dropped = index.resolve(&[citation("doc1", "Hello", "nonexistent")]);
    assert!(dropped.citations.is_empty());
    assert_eq!(dropped.rejected.len(), 1);
    assert!(dropped.rejected[0].reason.contains("end text not found"));
}

#[test]
fn test_display_name_is_rewritten_to_canonical_id() {
    let resources = vec![Resource::new("canonical-id", "Leaves contain chlorophyll.").named("My Doc")];
    let index = CitationIndex::new(&resources, &[], &[]);

    let resolution = index.resolve(&[citation("My Doc", "Leaves", "chlorophyll.")]);
    assert!(resolution.rejected.is_empty());
    assert_eq!(resolution.citations[0].doc_id, "canonical-id");
}

#[tokio::test]
async fn test_generated_activity_keeps_only_verified_citations() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([{
        "type": "slide",
        "title": "Greeting",
        "markdownContent": "Hello there",
        "citations": [
            {"docId": "doc1", "startText": "Hello", "endText": "bar"},
            {"docId": "doc1", "startText": "Hello", "endText": "nonexistent"},
            {"docId": "unknown", "startText": "Hello", "endText": "bar"}
        ]
    }])));
    let generator = generator_for(registry_of(vec![Arc::new(SlidePlugin)]), &stub);
    let mut request = GenerationRequest::for_subject(Subject::named("Greetings"));
    request.source_documents = vec![SourceDocument {
        id: Some("doc1".to_string()),
        name: None,
        source_url: None,
        content: "Hello world foo bar".to_string(),
    }];

    let outcomes: Vec<_> = generator
        .generate_outcomes(request)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(
        outcome.activity.citations,
        Some(vec![citation("doc1", "Hello", "bar")])
    );
    assert_eq!(outcome.rejected_citations.len(), 2);
    assert!(outcome.rejected_citations[0].reason.contains("end text not found"));
    assert!(outcome.rejected_citations[1].reason.contains("could not find resource"));
}

#[tokio::test]
async fn test_retrieved_resources_are_citable_by_name() {
    let stub = Arc::new(StubGenerator::new().with_stream_output(json!([{
        "type": "slide",
        "title": "Chlorophyll",
        "markdownContent": "Green pigment",
        "citations": [{"docId": "My Doc", "startText": "Leaves", "endText": "chlorophyll."}]
    }])));
    let retriever = InMemoryRetriever::new(vec![
        Resource::new("canonical-id", "Leaves contain chlorophyll.").named("My Doc"),
    ]);
    let sources = HydrationSources::new(FixedExplainer::new("Pigments")).with_retriever(retriever.clone());
    let generator = ActivityGenerator::new(
        stub.clone(),
        registry_of(vec![Arc::new(SlidePlugin)]),
        sources,
    );

    let activities: Vec<_> = generator
        .generate(GenerationRequest::for_subject(Subject::named("Pigments")))
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(retriever.queries().len(), 1);
    let citations = activities[0].citations.as_ref().unwrap();
    assert_eq!(citations[0].doc_id, "canonical-id");

    let prompt = &stub.stream_requests()[0].messages[0].content;
    assert!(prompt.contains("canonical-id"));
}
