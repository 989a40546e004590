//! Provider-agnostic specification bundle

use serde::{Deserialize, Serialize};
use serde_json::Value;
use specmatrix_model::{Document, DocumentId, DocumentInfo, Section};
use std::collections::BTreeMap;

/// One document's structured content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundledDocument {
    /// Original filename
    pub filename: String,
    /// Title, version, date, supplier
    pub document_info: DocumentInfo,
    /// Full section tree
    pub sections: Vec<Section>,
    /// Extractor metadata
    pub extraction_metadata: BTreeMap<String, Value>,
}

/// Where a bundled document came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Document identity
    pub document_id: DocumentId,
    /// Original filename
    pub filename: String,
    /// Extractor that produced the payload
    pub extraction_model: Option<String>,
}

/// What gets sent to the provider instead of the raw file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecBundle {
    /// Structured documents
    pub documents: Vec<BundledDocument>,
    /// Provenance, parallel to `documents`
    pub document_sources: Vec<DocumentSource>,
}

impl SpecBundle {
    /// Bundle every document that carries an extraction payload
    ///
    /// Documents without a payload are skipped.
    #[must_use]
    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a Document>) -> Self {
        let mut bundle = Self::default();
        for document in documents {
            let Some(payload) = &document.extraction_payload else {
                continue;
            };
            bundle.documents.push(BundledDocument {
                filename: document.original_filename.clone(),
                document_info: payload.document_info.clone(),
                sections: payload.sections.clone(),
                extraction_metadata: payload.extraction_metadata.clone(),
            });
            bundle.document_sources.push(DocumentSource {
                document_id: document.id,
                filename: document.original_filename.clone(),
                extraction_model: document.extraction_model.clone(),
            });
        }
        bundle
    }

    /// Number of bundled documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether nothing was bundled
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Total top-level sections across documents
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.documents.iter().map(|d| d.sections.len()).sum()
    }
}
