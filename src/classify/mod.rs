//! Heuristic response classifier: turns raw generated text into a typed,
//! structured [`ParsedResponse`]. Pure and total — malformed input
//! degrades to plain text with zero confidence, never an error.

pub mod signals;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classify::signals::{default_signals, extract, signal_for, Extracted};
use crate::classify::signals::{HEADING_RE, LINK_RE};

/// Inferred content kind, in decision priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Code,
    StructuredData,
    FormattedDocument,
    Review,
    Debug,
    Documentation,
    Explanation,
    PlainText,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Code => "code",
            ContentKind::StructuredData => "structured_data",
            ContentKind::FormattedDocument => "formatted_document",
            ContentKind::Review => "review",
            ContentKind::Debug => "debug",
            ContentKind::Documentation => "documentation",
            ContentKind::Explanation => "explanation",
            ContentKind::PlainText => "plain_text",
        }
    }
}

/// One fenced code block, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Lowercased language tag; empty when the fence had none.
    pub language: String,
    pub code: String,
    pub index: usize,
}

/// Kind-specific structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Code {
        functions: Vec<String>,
        classes: Vec<String>,
        imports: Vec<String>,
    },
    StructuredData {
        fragments: Vec<serde_json::Value>,
    },
    Document {
        headings: Vec<String>,
        links: Vec<DocumentLink>,
    },
    Review {
        items: Vec<ReviewItem>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentLink {
    pub text: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub severity: String,
    pub category: String,
    pub title: String,
    pub body: String,
}

/// Classifier output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub kind: ContentKind,
    pub original_text: String,
    pub summary: String,
    pub code_blocks: Vec<CodeBlock>,
    pub inline_code: Vec<String>,
    pub payload: Option<ResponsePayload>,
    /// In [0, 1]. 0.0 means the classifier had nothing to go on.
    pub confidence: f64,
}

const MAX_SUMMARY_CHARS: usize = 200;

/// Classify raw generated text, preferring `expected` when its own signal
/// check passes. See module docs for the degradation guarantee.
pub fn classify(text: &str, expected: Option<ContentKind>) -> ParsedResponse {
    if text.trim().is_empty() {
        return ParsedResponse {
            kind: ContentKind::PlainText,
            original_text: text.to_string(),
            summary: String::new(),
            code_blocks: Vec::new(),
            inline_code: Vec::new(),
            payload: None,
            confidence: 0.0,
        };
    }

    let extracted = extract(text);
    let kind = decide(text, &extracted, expected);
    let confidence = score(kind, expected, &extracted);
    let payload = build_payload(kind, text, &extracted);

    ParsedResponse {
        kind,
        original_text: text.to_string(),
        summary: summarize(text),
        code_blocks: extracted.code_blocks,
        inline_code: extracted.inline_code,
        payload,
        confidence,
    }
}

/// Expected kind wins iff its own signal passes; otherwise the first
/// passing signal in fixed priority order; otherwise plain text.
fn decide(text: &str, extracted: &Extracted, expected: Option<ContentKind>) -> ContentKind {
    if let Some(kind) = expected {
        match signal_for(kind) {
            Some(signal) if signal.matches(text, extracted) => return kind,
            None => return ContentKind::PlainText, // expecting plain text is always satisfied
            _ => {}
        }
    }
    default_signals()
        .iter()
        .find(|s| s.matches(text, extracted))
        .map(|s| s.kind())
        .unwrap_or(ContentKind::PlainText)
}

/// 0.5 base, +0.3 for an expected-kind match, plus kind-specific bonuses,
/// clamped to [0, 1].
fn score(kind: ContentKind, expected: Option<ContentKind>, extracted: &Extracted) -> f64 {
    let mut confidence: f64 = 0.5;
    if expected == Some(kind) {
        confidence += 0.3;
    }
    match kind {
        ContentKind::Code => {
            confidence += (0.1 * extracted.code_blocks.len() as f64).min(0.3);
        }
        ContentKind::StructuredData if extracted.json_candidates > 0 => {
            let ratio = extracted.json_fragments.len() as f64 / extracted.json_candidates as f64;
            confidence += 0.4 * ratio;
        }
        _ => {}
    }
    confidence.clamp(0.0, 1.0)
}

/// First paragraph that is not a code fence, truncated.
fn summarize(text: &str) -> String {
    let paragraph = text
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with("```"))
        .unwrap_or("");
    let summary: String = paragraph.chars().take(MAX_SUMMARY_CHARS).collect();
    if paragraph.chars().count() > MAX_SUMMARY_CHARS {
        format!("{summary}...")
    } else {
        summary
    }
}

fn build_payload(kind: ContentKind, text: &str, extracted: &Extracted) -> Option<ResponsePayload> {
    match kind {
        ContentKind::Code => Some(code_payload(extracted)),
        ContentKind::StructuredData => Some(ResponsePayload::StructuredData {
            fragments: extracted.json_fragments.clone(),
        }),
        ContentKind::FormattedDocument | ContentKind::Documentation => {
            Some(document_payload(text))
        }
        ContentKind::Review => Some(review_payload(text)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Code payload: function/class/import names via lightweight per-family
// pattern matching
// ---------------------------------------------------------------------------

static PY_FN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)").expect("py fn regex"));
static PY_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*class\s+(\w+)").expect("py class regex"));
static PY_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").expect("py import regex")
});

static JS_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:function\s+(\w+)|(?:const|let)\s+(\w+)\s*=\s*(?:async\s*)?\()")
        .expect("js fn regex")
});
static JS_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"class\s+(\w+)").expect("js class regex"));
static JS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+[^;]*?from\s+['"]([^'"]+)['"]"#).expect("js import regex")
});

static RUST_FN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fn\s+(\w+)").expect("rust fn regex"));
static RUST_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:struct|enum|trait)\s+(\w+)").expect("rust type regex"));
static RUST_USE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"use\s+([\w:]+)").expect("rust use regex"));

fn collect_captures(re: &Regex, code: &str, into: &mut Vec<String>) {
    for caps in re.captures_iter(code) {
        for group in caps.iter().skip(1).flatten() {
            let name = group.as_str().trim().to_string();
            if !name.is_empty() && !into.contains(&name) {
                into.push(name);
            }
        }
    }
}

fn code_payload(extracted: &Extracted) -> ResponsePayload {
    let mut functions = Vec::new();
    let mut classes = Vec::new();
    let mut imports = Vec::new();

    for block in &extracted.code_blocks {
        match block.language.as_str() {
            "python" | "py" => {
                collect_captures(&PY_FN_RE, &block.code, &mut functions);
                collect_captures(&PY_CLASS_RE, &block.code, &mut classes);
                collect_captures(&PY_IMPORT_RE, &block.code, &mut imports);
            }
            "javascript" | "js" | "typescript" | "ts" => {
                collect_captures(&JS_FN_RE, &block.code, &mut functions);
                collect_captures(&JS_CLASS_RE, &block.code, &mut classes);
                collect_captures(&JS_IMPORT_RE, &block.code, &mut imports);
            }
            "rust" | "rs" => {
                collect_captures(&RUST_FN_RE, &block.code, &mut functions);
                collect_captures(&RUST_TYPE_RE, &block.code, &mut classes);
                collect_captures(&RUST_USE_RE, &block.code, &mut imports);
            }
            // Unknown family: try the python and js patterns, which cover
            // most of what models emit untagged.
            _ => {
                collect_captures(&PY_FN_RE, &block.code, &mut functions);
                collect_captures(&JS_FN_RE, &block.code, &mut functions);
                collect_captures(&PY_CLASS_RE, &block.code, &mut classes);
            }
        }
    }

    ResponsePayload::Code {
        functions,
        classes,
        imports,
    }
}

fn document_payload(text: &str) -> ResponsePayload {
    let headings = HEADING_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();
    let links = LINK_RE
        .captures_iter(text)
        .filter_map(|c| {
            Some(DocumentLink {
                text: c.get(1)?.as_str().to_string(),
                target: c.get(2)?.as_str().to_string(),
            })
        })
        .collect();
    ResponsePayload::Document { headings, links }
}

// ---------------------------------------------------------------------------
// Review payload: split on list/numbered sections, infer severity and
// category from vocabulary
// ---------------------------------------------------------------------------

static REVIEW_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:\d+\.|[-*])\s+").expect("review section regex"));

const SEVERITY_TABLE: &[(&str, &[&str])] = &[
    ("critical", &["critical", "severe", "vulnerability", "unsafe"]),
    ("major", &["major", "bug", "important", "incorrect"]),
    ("minor", &["minor", "improvement", "suggestion", "recommended", "nit"]),
];

const CATEGORY_TABLE: &[(&str, &[&str])] = &[
    ("security", &["security", "vulnerability", "injection", "sanitize"]),
    ("performance", &["performance", "slow", "allocation", "latency"]),
    ("style", &["style", "naming", "formatting", "readability"]),
    ("bug", &["bug", "incorrect", "crash", "error"]),
];

fn lookup(table: &[(&str, &[&str])], text_lower: &str, default: &str) -> String {
    table
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text_lower.contains(k)))
        .map(|(label, _)| (*label).to_string())
        .unwrap_or_else(|| default.to_string())
}

fn review_payload(text: &str) -> ResponsePayload {
    let mut items = Vec::new();
    let mut starts: Vec<usize> = REVIEW_SECTION_RE.find_iter(text).map(|m| m.start()).collect();
    starts.push(text.len());

    for window in starts.windows(2) {
        let section = text[window[0]..window[1]].trim();
        if section.is_empty() {
            continue;
        }
        let lower = section.to_lowercase();
        let mut lines = section.lines();
        let title = lines
            .next()
            .unwrap_or("")
            .trim_start_matches(['-', '*', ' '])
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.')
            .trim()
            .to_string();
        items.push(ReviewItem {
            severity: lookup(SEVERITY_TABLE, &lower, "info"),
            category: lookup(CATEGORY_TABLE, &lower, "quality"),
            title,
            body: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
        });
    }

    ResponsePayload::Review { items }
}
