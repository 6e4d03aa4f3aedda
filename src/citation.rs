//! Citation resolution
//!
//! A citation survives only when its `docId` resolves to a known document with a stable
//! id and both text spans occur verbatim in that document. Survivors are rewritten to
//! the canonical id; everything else is reported as rejected data, never as an error.

use crate::activity::{ActivityConfig, Citation};
use crate::hydrate::{Chunk, HydratedContext, Reference, Resource};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedCitation {
    pub citation: Citation,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationResolution {
    pub citations: Vec<Citation>,
    pub rejected: Vec<RejectedCitation>,
}

#[derive(Clone, Copy)]
enum Document<'a> {
    Resource(&'a Resource),
    Reference(&'a Reference),
    Chunk(&'a Chunk),
}

impl<'a> Document<'a> {
    fn id(&self) -> Option<&'a str> {
        match self {
            Document::Resource(r) => r.id.as_deref(),
            Document::Reference(r) => r.id.as_deref(),
            Document::Chunk(c) => c.id.as_deref(),
        }
    }

    fn content(&self) -> &'a str {
        match self {
            Document::Resource(r) => &r.content,
            Document::Reference(r) => &r.content,
            Document::Chunk(c) => &c.content,
        }
    }
}

/// The documents citations may point at
#[derive(Clone, Copy)]
pub struct CitationIndex<'a> {
    resources: &'a [Resource],
    references: &'a [Reference],
    chunks: &'a [Chunk],
}

impl<'a> CitationIndex<'a> {
    pub fn new(resources: &'a [Resource], references: &'a [Reference], chunks: &'a [Chunk]) -> Self {
        Self {
            resources,
            references,
            chunks,
        }
    }

    pub fn from_context(hydrated: &'a HydratedContext) -> Self {
        Self::new(&hydrated.resources, &hydrated.references, &hydrated.chunks)
    }

    /// First match wins: resource id, entity id, name, source URL, then reference id and
    /// chunk id.
    fn lookup(&self, doc_id: &str) -> Option<Document<'a>> {
        let by = |field: fn(&Resource) -> Option<&str>| {
            self.resources
                .iter()
                .find(|r| field(r) == Some(doc_id))
                .map(Document::Resource)
        };
        by(|r| r.id.as_deref())
            .or_else(|| by(|r| r.entity_id.as_deref()))
            .or_else(|| by(|r| r.name.as_deref()))
            .or_else(|| by(|r| r.source.as_deref()))
            .or_else(|| {
                self.references
                    .iter()
                    .find(|r| r.id.as_deref() == Some(doc_id))
                    .map(Document::Reference)
            })
            .or_else(|| {
                self.chunks
                    .iter()
                    .find(|c| c.id.as_deref() == Some(doc_id))
                    .map(Document::Chunk)
            })
    }

    fn check(&self, citation: &Citation) -> Result<Citation, String> {
        let document = self.lookup(&citation.doc_id).ok_or_else(|| {
            format!("could not find resource for citation `{}`", citation.doc_id)
        })?;
        let id = document.id().ok_or_else(|| "resource has no id".to_string())?;
        let content = document.content();
        if !content.contains(citation.start_text.as_str()) {
            return Err(format!("start text not found: `{}`", citation.start_text));
        }
        if !content.contains(citation.end_text.as_str()) {
            return Err(format!("end text not found: `{}`", citation.end_text));
        }
        Ok(Citation {
            doc_id: id.to_string(),
            ..citation.clone()
        })
    }

    pub fn resolve(&self, citations: &[Citation]) -> CitationResolution {
        let mut resolution = CitationResolution::default();
        for citation in citations {
            match self.check(citation) {
                Ok(kept) => resolution.citations.push(kept),
                Err(reason) => resolution.rejected.push(RejectedCitation {
                    citation: citation.clone(),
                    reason,
                }),
            }
        }
        resolution
    }
}

/// Replace an activity's citations with the resolved ones.
pub fn resolve_activity_citations(
    mut activity: ActivityConfig,
    hydrated: &HydratedContext,
) -> (ActivityConfig, Vec<RejectedCitation>) {
    let citations = match activity.citations.take() {
        Some(citations) => citations,
        None => return (activity, Vec::new()),
    };
    let resolution = CitationIndex::from_context(hydrated).resolve(&citations);
    if !resolution.rejected.is_empty() {
        debug!(
            activity_type = %activity.activity_type,
            kept = resolution.citations.len(),
            rejected = resolution.rejected.len(),
            "Dropped unverifiable citations"
        );
    }
    activity.citations = Some(resolution.citations);
    (activity, resolution.rejected)
}
