//! Deterministic content extractors

use crate::error::ExtractionError;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use serde_json::json;
use specmatrix_model::{DocumentInfo, Section, SpecificationPayload, Table};
use std::sync::{Arc, OnceLock};

/// Turns raw bytes of one content type into a specification payload
pub trait Extractor: Send + Sync {
    /// Recorded as the document's extraction model
    fn name(&self) -> &str;

    /// Whether this extractor handles `mime`
    fn supports(&self, mime: &str) -> bool;

    /// Extract a payload
    ///
    /// # Errors
    /// `Malformed` when the bytes cannot be interpreted.
    fn extract(&self, bytes: &[u8]) -> Result<SpecificationPayload, ExtractionError>;
}

/// Extractors consulted in order
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self {
            extractors: vec![
                Arc::new(JsonExtractor),
                Arc::new(MarkdownExtractor),
                Arc::new(PlainTextExtractor),
            ],
        }
    }
}

impl ExtractorRegistry {
    /// Registry with no extractors
    #[must_use]
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Put `extractor` ahead of the existing ones
    #[must_use]
    pub fn with(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(0, extractor);
        self
    }

    /// First extractor supporting `mime`
    ///
    /// # Errors
    /// `UnsupportedMime` when none does.
    pub fn for_mime(&self, mime: &str) -> Result<Arc<dyn Extractor>, ExtractionError> {
        let essence = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
        self.extractors
            .iter()
            .find(|e| e.supports(&essence))
            .cloned()
            .ok_or(ExtractionError::UnsupportedMime(essence))
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, ExtractionError> {
    std::str::from_utf8(bytes).map_err(|e| ExtractionError::Malformed(format!("not UTF-8: {e}")))
}

fn finish(
    extractor: &str,
    document_info: DocumentInfo,
    sections: Vec<Section>,
    characters: usize,
) -> Result<SpecificationPayload, ExtractionError> {
    let mut payload = SpecificationPayload {
        document_info,
        sections,
        ..SpecificationPayload::default()
    };
    if payload.is_empty() {
        return Err(ExtractionError::Malformed("document has no content".into()));
    }
    payload
        .extraction_metadata
        .insert("extractor".into(), json!(extractor));
    payload
        .extraction_metadata
        .insert("section_count".into(), json!(payload.section_count()));
    payload
        .extraction_metadata
        .insert("characters".into(), json!(characters));
    Ok(payload)
}

/// Pre-structured payloads (`application/json`)
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn name(&self) -> &str {
        "json"
    }

    fn supports(&self, mime: &str) -> bool {
        mime == "application/json"
    }

    fn extract(&self, bytes: &[u8]) -> Result<SpecificationPayload, ExtractionError> {
        let payload: SpecificationPayload = serde_json::from_slice(bytes)
            .map_err(|e| ExtractionError::Malformed(format!("invalid payload JSON: {e}")))?;
        finish(self.name(), payload.document_info, payload.sections, bytes.len())
    }
}

/// Attach finished sections to their parents, keyed by depth
struct SectionTree {
    roots: Vec<Section>,
    open: Vec<(usize, Section)>,
}

impl SectionTree {
    fn new() -> Self {
        Self {
            roots: Vec::new(),
            open: Vec::new(),
        }
    }

    fn open(&mut self, depth: usize, section: Section) {
        self.close_to(depth);
        self.open.push((depth, section));
    }

    fn close_to(&mut self, depth: usize) {
        while self.open.last().is_some_and(|(d, _)| *d >= depth) {
            if let Some((_, done)) = self.open.pop() {
                match self.open.last_mut() {
                    Some((_, parent)) => parent.subsections.push(done),
                    None => self.roots.push(done),
                }
            }
        }
    }

    fn current(&mut self) -> Option<&mut Section> {
        self.open.last_mut().map(|(_, s)| s)
    }

    fn finish(mut self) -> Vec<Section> {
        self.close_to(0);
        self.roots
    }
}

fn append_paragraph(section: &mut Section, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !section.content.is_empty() {
        section.content.push_str("\n\n");
    }
    section.content.push_str(text);
}

/// Markdown (`text/markdown`): headings become the section tree
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownExtractor;

#[derive(Default)]
struct TableBuilder {
    table: Table,
    row: Vec<String>,
    cell: String,
    in_head: bool,
}

impl Extractor for MarkdownExtractor {
    fn name(&self) -> &str {
        "markdown"
    }

    fn supports(&self, mime: &str) -> bool {
        matches!(mime, "text/markdown" | "text/x-markdown")
    }

    #[allow(clippy::too_many_lines)]
    fn extract(&self, bytes: &[u8]) -> Result<SpecificationPayload, ExtractionError> {
        let text = utf8(bytes)?;
        let mut tree = SectionTree::new();
        let mut preamble = Section::new("0", "Preamble", "");
        let mut info = DocumentInfo::default();
        let mut counters = [0usize; 6];

        let mut heading: Option<(usize, String)> = None;
        let mut paragraph = String::new();
        let mut items: Vec<String> = Vec::new();
        let mut table: Option<TableBuilder> = None;

        for event in Parser::new_ext(text, Options::ENABLE_TABLES) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    heading = Some((level as usize, String::new()));
                }
                Event::End(TagEnd::Heading(_)) => {
                    let Some((level, title)) = heading.take() else {
                        continue;
                    };
                    let title = title.trim().to_string();
                    if level == 1 && info.title.is_none() {
                        info.title = Some(title.clone());
                    }
                    counters[level - 1] += 1;
                    for deeper in counters.iter_mut().skip(level) {
                        *deeper = 0;
                    }
                    let number = counters[..level]
                        .iter()
                        .filter(|c| **c > 0)
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(".");
                    tree.open(level, Section::new(number, title, ""));
                }
                Event::Start(Tag::Item) => items.push(String::new()),
                Event::End(TagEnd::Item) => {
                    if let Some(item) = items.pop() {
                        let item = item.trim().to_string();
                        if !item.is_empty() {
                            tree.current().unwrap_or(&mut preamble).lists.push(item);
                        }
                    }
                }
                Event::End(TagEnd::Paragraph) => {
                    if items.is_empty() {
                        let section = tree.current().unwrap_or(&mut preamble);
                        append_paragraph(section, &paragraph);
                        paragraph.clear();
                    }
                }
                Event::Start(Tag::Table(_)) => table = Some(TableBuilder::default()),
                Event::Start(Tag::TableHead) => {
                    if let Some(t) = table.as_mut() {
                        t.in_head = true;
                    }
                }
                Event::End(TagEnd::TableHead) => {
                    if let Some(t) = table.as_mut() {
                        t.table.headers = std::mem::take(&mut t.row);
                        t.in_head = false;
                    }
                }
                Event::End(TagEnd::TableCell) => {
                    if let Some(t) = table.as_mut() {
                        let cell = std::mem::take(&mut t.cell).trim().to_string();
                        t.row.push(cell);
                    }
                }
                Event::End(TagEnd::TableRow) => {
                    if let Some(t) = table.as_mut() {
                        if !t.in_head {
                            let row = std::mem::take(&mut t.row);
                            t.table.rows.push(row);
                        }
                    }
                }
                Event::End(TagEnd::Table) => {
                    if let Some(t) = table.take() {
                        tree.current().unwrap_or(&mut preamble).tables.push(t.table);
                    }
                }
                Event::Text(s) | Event::Code(s) => {
                    if let Some((_, title)) = heading.as_mut() {
                        title.push_str(&s);
                    } else if let Some(t) = table.as_mut() {
                        t.cell.push_str(&s);
                    } else if let Some(item) = items.last_mut() {
                        item.push_str(&s);
                    } else {
                        paragraph.push_str(&s);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some(item) = items.last_mut() {
                        item.push(' ');
                    } else if heading.is_none() && table.is_none() {
                        paragraph.push('\n');
                    }
                }
                _ => {}
            }
        }

        let mut sections = Vec::new();
        if !preamble.content.is_empty() || !preamble.lists.is_empty() || !preamble.tables.is_empty() {
            sections.push(preamble);
        }
        sections.extend(tree.finish());
        finish(self.name(), info, sections, text.chars().count())
    }
}

fn numbered_heading() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)*)\.?\s+([A-Za-z][^\n]{0,118})$").ok())
        .as_ref()
}

/// Plain text (`text/plain`): numbered headings such as `3.2 Audit Trail`
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &str {
        "plain-text"
    }

    fn supports(&self, mime: &str) -> bool {
        mime == "text/plain"
    }

    fn extract(&self, bytes: &[u8]) -> Result<SpecificationPayload, ExtractionError> {
        let text = utf8(bytes)?;
        let mut tree = SectionTree::new();
        let mut preamble = Section::new("0", "Preamble", "");
        let mut info = DocumentInfo::default();
        let mut block = String::new();

        let flush = |tree: &mut SectionTree, preamble: &mut Section, block: &mut String| {
            let section = tree.current().unwrap_or(preamble);
            append_paragraph(section, block);
            block.clear();
        };

        for line in text.lines() {
            let trimmed = line.trim();
            let heading = numbered_heading()
                .and_then(|re| re.captures(trimmed))
                .filter(|c| !c[2].trim_end().ends_with('.'));
            if let Some(caps) = heading {
                flush(&mut tree, &mut preamble, &mut block);
                let number = caps[1].to_string();
                let depth = number.split('.').count();
                tree.open(depth, Section::new(number, caps[2].trim(), ""));
            } else if trimmed.is_empty() {
                flush(&mut tree, &mut preamble, &mut block);
            } else if let Some(item) = trimmed.strip_prefix("- ").or_else(|| trimmed.strip_prefix("* ")) {
                flush(&mut tree, &mut preamble, &mut block);
                tree.current().unwrap_or(&mut preamble).lists.push(item.trim().to_string());
            } else {
                if !block.is_empty() {
                    block.push('\n');
                }
                block.push_str(trimmed);
            }
        }
        flush(&mut tree, &mut preamble, &mut block);

        let mut sections = Vec::new();
        if !preamble.content.is_empty() || !preamble.lists.is_empty() {
            if info.title.is_none() {
                info.title = preamble.content.lines().next().map(str::to_string);
            }
            sections.push(preamble);
        }
        sections.extend(tree.finish());
        finish(self.name(), info, sections, text.chars().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MARKDOWN: &str = "\
# Supplier Specification

Version 2.1 of the LIMS platform.

## Security

Role based access.

### Audit Trail

All changes are logged.

- user id
- timestamp

## Backup

| Item | Frequency |
|------|-----------|
| DB   | Daily     |
";

    #[test]
    fn markdown_builds_numbered_tree() {
        let payload = MarkdownExtractor.extract(MARKDOWN.as_bytes()).unwrap();
        assert_eq!(payload.document_info.title.as_deref(), Some("Supplier Specification"));
        assert_eq!(payload.sections.len(), 1);
        let root = &payload.sections[0];
        assert_eq!(root.section_number, "1");
        assert_eq!(root.content, "Version 2.1 of the LIMS platform.");
        assert_eq!(root.subsections.len(), 2);

        let security = &root.subsections[0];
        assert_eq!((security.section_number.as_str(), security.heading.as_str()), ("1.1", "Security"));
        let audit = &security.subsections[0];
        assert_eq!(audit.section_number, "1.1.1");
        assert_eq!(audit.content, "All changes are logged.");
        assert_eq!(audit.lists, vec!["user id".to_string(), "timestamp".to_string()]);

        let backup = &root.subsections[1];
        assert_eq!(backup.section_number, "1.2");
        assert_eq!(backup.tables[0].headers, vec!["Item".to_string(), "Frequency".to_string()]);
        assert_eq!(backup.tables[0].rows, vec![vec!["DB".to_string(), "Daily".to_string()]]);
        assert_eq!(payload.extraction_metadata["extractor"], json!("markdown"));
    }

    #[test]
    fn plain_text_uses_numbered_headings() {
        let text = "LIMS Functional Specification\n\n1 Introduction\nScope of the system.\n\n3.2 Audit Trail\nEvery change is recorded.\n- who\n- when\n";
        let payload = PlainTextExtractor.extract(text.as_bytes()).unwrap();
        assert_eq!(payload.document_info.title.as_deref(), Some("LIMS Functional Specification"));
        let numbers: Vec<_> = payload.sections.iter().map(|s| s.section_number.as_str()).collect();
        assert_eq!(numbers, vec!["0", "1"]);
        let audit = &payload.sections[1].subsections[0];
        assert_eq!(audit.heading, "Audit Trail");
        assert_eq!(audit.content, "Every change is recorded.");
        assert_eq!(audit.lists.len(), 2);
    }

    #[test]
    fn sentences_starting_with_numbers_are_not_headings() {
        let text = "1 Scope\n2 users are supported.\n";
        let payload = PlainTextExtractor.extract(text.as_bytes()).unwrap();
        assert_eq!(payload.sections.len(), 1);
        assert_eq!(payload.sections[0].content, "2 users are supported.");
    }

    #[test]
    fn json_passes_through() {
        let raw = br#"{"document_info":{"title":"T"},"sections":[{"section_number":"1","heading":"H","content":"C"}]}"#;
        let payload = JsonExtractor.extract(raw).unwrap();
        assert_eq!(payload.sections[0].heading, "H");
        assert!(JsonExtractor.extract(b"{\"sections\": []}").is_err());
        assert!(JsonExtractor.extract(b"nope").is_err());
    }

    #[test]
    fn registry_routes_by_mime_essence() {
        let registry = ExtractorRegistry::default();
        assert_eq!(registry.for_mime("text/markdown; charset=utf-8").unwrap().name(), "markdown");
        assert_eq!(registry.for_mime("TEXT/PLAIN").unwrap().name(), "plain-text");
        assert!(matches!(
            registry.for_mime("application/pdf"),
            Err(ExtractionError::UnsupportedMime(_))
        ));
    }

    #[test]
    fn empty_documents_fail() {
        assert!(PlainTextExtractor.extract(b"   \n\n").is_err());
        assert!(MarkdownExtractor.extract(b"").is_err());
    }
}
