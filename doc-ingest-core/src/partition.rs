//! Default partitioner: local files to structured elements.
//!
//! The element schema is deliberately small. Each paragraph-like block of the
//! document becomes one [`Element`], classified as a title, a list item or
//! narrative text. HTML is reduced to text first. Binary formats are rejected
//! with [`PartitionError::Unsupported`], which the worker reports as a
//! per-document failure.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::contract::{PartitionError, Partitioner};

/// Longest single line still considered a title when it has no terminal
/// punctuation.
const MAX_TITLE_LEN: usize = 80;

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Title,
    NarrativeText,
    ListItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// One structured piece of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub text: String,
    pub metadata: ElementMetadata,
}

/// Plain-text and HTML partitioner.
#[derive(Debug, Default, Clone)]
pub struct TextPartitioner;

impl TextPartitioner {
    pub fn new() -> Self {
        Self
    }
}

impl Partitioner for TextPartitioner {
    fn initialize(&self) -> Result<(), PartitionError> {
        // Compile the patterns up front so a bad pattern fails the run, not a worker.
        let _ = tag_pattern();
        let _ = script_pattern();
        info!("Text partitioner initialized");
        Ok(())
    }

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PartitionError> {
        let bytes = std::fs::read(path)?;
        let sniff = &bytes[..bytes.len().min(SNIFF_LEN)];
        if sniff.contains(&0) {
            return Err(PartitionError::Unsupported(format!(
                "{} looks like a binary file",
                path.display()
            )));
        }

        let raw = String::from_utf8_lossy(&bytes);
        let text = if is_html(path, &raw) {
            debug!(path = %path.display(), "Stripping HTML before partitioning");
            html_to_text(&raw)
        } else {
            raw.into_owned()
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let elements = partition_text(&text, filename.as_deref());
        debug!(
            path = %path.display(),
            elements = elements.len(),
            "Partitioned document"
        );
        Ok(elements)
    }
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"))
}

fn script_pattern() -> &'static Regex {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>")
            .expect("script pattern is valid")
    })
}

fn is_html(path: &Path, content: &str) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false);
    by_extension || content.trim_start().to_ascii_lowercase().starts_with("<!doctype html")
}

/// Reduces HTML to blank-line separated text blocks, keeping heading markers.
pub fn html_to_text(html: &str) -> String {
    let mut text = script_pattern().replace_all(html, "").into_owned();
    for level in (1..=6).rev() {
        let open = Regex::new(&format!(r"(?i)<h{level}\b[^>]*>")).expect("heading pattern is valid");
        text = open
            .replace_all(&text, format!("\n\n{} ", "#".repeat(level)).as_str())
            .into_owned();
        text = text
            .replace(&format!("</h{level}>"), "\n\n")
            .replace(&format!("</H{level}>"), "\n\n");
    }
    for (from, to) in [
        ("<p>", "\n\n"),
        ("</p>", "\n\n"),
        ("<br>", "\n"),
        ("<br/>", "\n"),
        ("<br />", "\n"),
        ("<li>", "\n- "),
        ("</li>", "\n"),
        ("<ul>", "\n\n"),
        ("</ul>", "\n\n"),
        ("<ol>", "\n\n"),
        ("</ol>", "\n\n"),
        ("</div>", "\n\n"),
    ] {
        text = text.replace(from, to);
    }
    let stripped = tag_pattern().replace_all(&text, "");
    decode_entities(&stripped)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Splits text on blank lines and classifies each block.
pub fn partition_text(text: &str, filename: Option<&str>) -> Vec<Element> {
    let metadata = ElementMetadata {
        filename: filename.map(str::to_string),
    };
    let mut elements = Vec::new();

    let normalized = text.replace("\r\n", "\n");
    let mut block: Vec<&str> = Vec::new();
    for line in normalized.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !block.is_empty() {
                classify_block(&block, &metadata, &mut elements);
                block.clear();
            }
        } else {
            block.push(line.trim());
        }
    }
    elements
}

fn classify_block(lines: &[&str], metadata: &ElementMetadata, out: &mut Vec<Element>) {
    let element = |kind, text: String| Element {
        kind,
        text,
        metadata: metadata.clone(),
    };

    if lines.iter().all(|l| strip_list_marker(l).is_some()) {
        for line in lines {
            if let Some(item) = strip_list_marker(line) {
                out.push(element(ElementKind::ListItem, item.to_string()));
            }
        }
        return;
    }

    let joined = lines.join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(heading) = collapsed.strip_prefix('#') {
        let heading = heading.trim_start_matches('#').trim();
        if !heading.is_empty() {
            out.push(element(ElementKind::Title, heading.to_string()));
            return;
        }
    }

    if lines.len() == 1 && looks_like_title(&collapsed) {
        out.push(element(ElementKind::Title, collapsed));
    } else {
        out.push(element(ElementKind::NarrativeText, collapsed));
    }
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

fn looks_like_title(text: &str) -> bool {
    text.chars().count() <= MAX_TITLE_LEN
        && text.chars().any(char::is_alphabetic)
        && !text.ends_with(|c: char| matches!(c, '.' | '!' | '?' | ':' | ';' | ','))
}
