//! HTML-to-text extraction for LLM input.
//!
//! News front pages are mostly chrome and markup. This crate reduces a raw
//! page to compact Markdown-ish text: page chrome is dropped, the rest is
//! converted with `htmd`, a series of cleanup passes normalizes it, and the
//! result is capped to a character budget.

mod cleanup;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

/// Tags whose content never reaches the model.
const SKIP_TAGS: [&str; 10] = [
    "script", "style", "nav", "footer", "header", "iframe", "noscript", "svg", "form", "template",
];

/// Default character budget, matching what fits comfortably in a prompt.
pub const DEFAULT_MAX_CHARS: usize = 30_000;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`extract_text`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Maximum characters (not bytes) of text returned.
    pub max_chars: usize,
    /// Keep Markdown link targets; otherwise links collapse to their text.
    pub keep_links: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            keep_links: false,
        }
    }
}

/// Result of extracting text from a page.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    /// `<title>`, falling back to the first `<h1>`.
    pub title: Option<String>,
    /// Whether the text was cut to fit `max_chars`.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Reduce raw HTML to compact text.
///
/// Never fails: if Markdown conversion errors, the visible text nodes of the
/// page body are used instead.
#[instrument(skip_all, fields(html_len = html.len()))]
pub fn extract_text(html: &str, opts: &ExtractOptions) -> ExtractedText {
    let doc = Html::parse_document(html);
    let title = extract_title(&doc);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let markdown = match converter.convert(&body_html(&doc)) {
        Ok(md) => md,
        Err(e) => {
            warn!(error = %e, "markdown conversion failed, using plain text");
            plain_text(&doc)
        }
    };

    let cleaned = cleanup::run_pipeline(&markdown, opts.keep_links);
    let (text, truncated) = truncate_chars(&cleaned, opts.max_chars);

    debug!(
        chars = text.chars().count(),
        truncated,
        "text extracted"
    );

    ExtractedText {
        text: text.to_string(),
        title,
        truncated,
    }
}

/// Cut `s` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&s[..byte_idx], true),
        None => (s, false),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// The body's inner HTML, or the whole document when there is no body.
fn body_html(doc: &Html) -> String {
    static BODY: LazyLock<Option<Selector>> = LazyLock::new(|| selector("body"));
    BODY.as_ref()
        .and_then(|sel| doc.select(sel).next())
        .map(|body| body.inner_html())
        .unwrap_or_else(|| doc.root_element().inner_html())
}

fn extract_title(doc: &Html) -> Option<String> {
    static TITLE: LazyLock<Option<Selector>> = LazyLock::new(|| selector("title, h1"));
    TITLE.as_ref().and_then(|sel| {
        doc.select(sel)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|t| !t.is_empty())
    })
}

/// Visible text of the body, skipping the same chrome tags as the converter.
fn plain_text(doc: &Html) -> String {
    static BODY: LazyLock<Option<Selector>> = LazyLock::new(|| selector("body"));
    let Some(body) = BODY.as_ref().and_then(|sel| doc.select(sel).next()) else {
        return String::new();
    };

    let mut out = String::new();
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| SKIP_TAGS.contains(&el.name()))
        });
        if !hidden && !text.trim().is_empty() {
            out.push_str(text.trim());
            out.push('\n');
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
