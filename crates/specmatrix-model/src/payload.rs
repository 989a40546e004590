//! Structured extraction payload
//!
//! The output of content extraction: document metadata plus the full section
//! tree. This, not the raw file, is what generation works from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured content of an extracted specification document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecificationPayload {
    /// Document-level metadata
    #[serde(default)]
    pub document_info: DocumentInfo,
    /// Top-level sections, in document order
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Free-form metadata written by the extractor
    #[serde(default)]
    pub extraction_metadata: BTreeMap<String, serde_json::Value>,
}

impl SpecificationPayload {
    /// Number of sections including all nested subsections
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.iter().map(Section::tree_size).sum()
    }

    /// Whether the payload carries any content at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Document-level metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Document date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Supplier or vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
}

/// A numbered section and everything beneath it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section number as written ("3.2.1")
    #[serde(default)]
    pub section_number: String,
    /// Heading text
    #[serde(default)]
    pub heading: String,
    /// Body text
    #[serde(default)]
    pub content: String,
    /// Page number, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<String>,
    /// Nested sections
    #[serde(default)]
    pub subsections: Vec<Section>,
    /// Tables
    #[serde(default)]
    pub tables: Vec<Table>,
    /// List items
    #[serde(default)]
    pub lists: Vec<String>,
}

impl Section {
    /// Create a section
    #[must_use]
    pub fn new(
        section_number: impl Into<String>,
        heading: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            section_number: section_number.into(),
            heading: heading.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// With a nested subsection
    #[must_use]
    pub fn with_subsection(mut self, section: Section) -> Self {
        self.subsections.push(section);
        self
    }

    fn tree_size(&self) -> usize {
        1 + self.subsections.iter().map(Section::tree_size).sum::<usize>()
    }
}

/// A table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Column headers
    #[serde(default)]
    pub headers: Vec<String>,
    /// Rows of cells
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}
