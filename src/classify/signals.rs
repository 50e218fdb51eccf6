//! Cheap structural signals the classifier decides on. Each signal lives
//! behind [`SignalCheck`] so a stricter parser can replace a heuristic for
//! one kind without touching the decision order.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::{CodeBlock, ContentKind};

pub static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[ \t]*\r?\n?(.*?)```").expect("fence regex")
});

pub static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("inline code regex"));

pub static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("heading regex"));

pub static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").expect("link regex"));

pub static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+\S").expect("list regex"));

/// Everything extracted up front, independent of classification.
#[derive(Debug, Default)]
pub struct Extracted {
    pub code_blocks: Vec<CodeBlock>,
    pub inline_code: Vec<String>,
    /// Successfully parsed embedded JSON fragments.
    pub json_fragments: Vec<serde_json::Value>,
    /// How many fragments looked like JSON and were attempted.
    pub json_candidates: usize,
}

/// Pull code fences, inline spans, and parseable JSON fragments out of the
/// raw text. Total over any input.
pub fn extract(text: &str) -> Extracted {
    let mut extracted = Extracted::default();

    for (index, caps) in FENCE_RE.captures_iter(text).enumerate() {
        let language = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let code = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if code.is_empty() {
            continue;
        }
        extracted.code_blocks.push(CodeBlock {
            language,
            code: code.to_string(),
            index,
        });
    }

    extracted.inline_code = INLINE_CODE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();

    // JSON candidates: fenced blocks tagged json (or untagged but
    // brace-shaped), plus the whole body when it is brace-shaped itself.
    for block in &extracted.code_blocks {
        let looks_like_json = block.language == "json"
            || (block.language.is_empty()
                && (block.code.starts_with('{') || block.code.starts_with('[')));
        if !looks_like_json {
            continue;
        }
        extracted.json_candidates += 1;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&block.code) {
            extracted.json_fragments.push(value);
        }
    }
    let trimmed = text.trim();
    if extracted.code_blocks.is_empty() && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
        extracted.json_candidates += 1;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            extracted.json_fragments.push(value);
        }
    }

    extracted
}

/// One structural signal: does `text` look like this kind of content?
pub trait SignalCheck: Send + Sync {
    fn kind(&self) -> ContentKind;
    fn matches(&self, text: &str, extracted: &Extracted) -> bool;
}

/// Count case-insensitive keyword hits. Density thresholds are small on
/// purpose — these are tie-breakers, not parsers.
fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    let lower = text.to_lowercase();
    keywords.iter().filter(|k| lower.contains(*k)).count()
}

pub struct CodeSignal;

impl SignalCheck for CodeSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::Code
    }
    fn matches(&self, _text: &str, extracted: &Extracted) -> bool {
        // Pure JSON fences are structured data, not code.
        extracted.code_blocks.iter().any(|b| {
            b.language != "json"
                && !(b.language.is_empty()
                    && (b.code.starts_with('{') || b.code.starts_with('[')))
        })
    }
}

pub struct StructuredDataSignal;

impl SignalCheck for StructuredDataSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::StructuredData
    }
    fn matches(&self, _text: &str, extracted: &Extracted) -> bool {
        !extracted.json_fragments.is_empty()
    }
}

pub struct DocumentSignal;

impl SignalCheck for DocumentSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::FormattedDocument
    }
    fn matches(&self, text: &str, _extracted: &Extracted) -> bool {
        let headings = HEADING_RE.find_iter(text).count();
        let links = LINK_RE.find_iter(text).count();
        let list_items = LIST_ITEM_RE.find_iter(text).count();
        headings >= 2 || (headings >= 1 && (links >= 1 || list_items >= 2))
    }
}

pub struct ReviewSignal;

const REVIEW_KEYWORDS: &[&str] = &[
    "review",
    "issue",
    "severity",
    "improvement",
    "suggestion",
    "code smell",
    "refactor",
    "vulnerability",
];

impl SignalCheck for ReviewSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::Review
    }
    fn matches(&self, text: &str, _extracted: &Extracted) -> bool {
        keyword_hits(text, REVIEW_KEYWORDS) >= 2
    }
}

pub struct DebugSignal;

const DEBUG_KEYWORDS: &[&str] = &[
    "error",
    "bug",
    "exception",
    "stack trace",
    "traceback",
    "panic",
    "root cause",
    "reproduce",
];

impl SignalCheck for DebugSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::Debug
    }
    fn matches(&self, text: &str, _extracted: &Extracted) -> bool {
        keyword_hits(text, DEBUG_KEYWORDS) >= 2
    }
}

pub struct DocumentationSignal;

const DOCUMENTATION_KEYWORDS: &[&str] = &[
    "documentation",
    "usage",
    "api reference",
    "parameters",
    "returns",
    "example",
    "installation",
];

impl SignalCheck for DocumentationSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::Documentation
    }
    fn matches(&self, text: &str, _extracted: &Extracted) -> bool {
        keyword_hits(text, DOCUMENTATION_KEYWORDS) >= 2
    }
}

pub struct ExplanationSignal;

const EXPLANATION_KEYWORDS: &[&str] = &[
    "explanation",
    "explain",
    "this means",
    "because",
    "works by",
    "in other words",
    "essentially",
    "the reason",
];

impl SignalCheck for ExplanationSignal {
    fn kind(&self) -> ContentKind {
        ContentKind::Explanation
    }
    fn matches(&self, text: &str, _extracted: &Extracted) -> bool {
        keyword_hits(text, EXPLANATION_KEYWORDS) >= 2
    }
}

/// Signals in fixed decision priority: code > structured-data >
/// formatted-document > review > debug > documentation > explanation.
pub fn default_signals() -> Vec<Box<dyn SignalCheck>> {
    vec![
        Box::new(CodeSignal),
        Box::new(StructuredDataSignal),
        Box::new(DocumentSignal),
        Box::new(ReviewSignal),
        Box::new(DebugSignal),
        Box::new(DocumentationSignal),
        Box::new(ExplanationSignal),
    ]
}

/// The signal for one kind, used to vet an expected kind before trusting it.
pub fn signal_for(kind: ContentKind) -> Option<Box<dyn SignalCheck>> {
    match kind {
        ContentKind::Code => Some(Box::new(CodeSignal)),
        ContentKind::StructuredData => Some(Box::new(StructuredDataSignal)),
        ContentKind::FormattedDocument => Some(Box::new(DocumentSignal)),
        ContentKind::Review => Some(Box::new(ReviewSignal)),
        ContentKind::Debug => Some(Box::new(DebugSignal)),
        ContentKind::Documentation => Some(Box::new(DocumentationSignal)),
        ContentKind::Explanation => Some(Box::new(ExplanationSignal)),
        ContentKind::PlainText => None,
    }
}
