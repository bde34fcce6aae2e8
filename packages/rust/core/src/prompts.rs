//! Prompt templates for the LLM-backed stages.

use serde_json::Value;

use newsdesk_shared::{SourceKind, SourceMeta};

use crate::aggregate::SynthesisInput;

/// System message for every stage that must answer in JSON.
pub const JSON_SYSTEM: &str = "You are a careful news analyst. Reply with a single JSON object and nothing else.";

/// System message for the final report.
pub const REPORT_SYSTEM: &str = "You are a senior news editor. Reply in Markdown.";

const FINANCIAL_FOCUS: &[&str] = &[
    "the latest financial headlines with their content (at least 15)",
    "stock, currency and economic indicators",
    "market moves and trends",
    "company news and earnings",
    "policy changes and economic events",
];

const TECH_FOCUS: &[&str] = &[
    "the latest technology headlines with their content (at least 15)",
    "trends in AI, machine learning and data",
    "product launches and technical breakthroughs",
    "industry moves and company news",
    "technical analysis and reviews",
];

const FORUM_FOCUS: &[&str] = &[
    "the hottest topics and thread titles (at least 15)",
    "prevailing user opinions and comment trends",
    "controversies and breaking events",
    "areas the community is focused on",
];

const GENERAL_FOCUS: &[&str] = &[
    "the latest headlines with their content (at least 15)",
    "key themes and topics",
    "important facts: figures, events, people",
    "publication times where visible",
];

/// What the perceive stage should pay attention to for each kind of site.
fn perceive_focus(kind: SourceKind) -> (&'static str, &'static [&'static str]) {
    match kind {
        SourceKind::Financial => ("financial news", FINANCIAL_FOCUS),
        SourceKind::Tech => ("technology news", TECH_FOCUS),
        SourceKind::Forum => ("forum discussions", FORUM_FOCUS),
        SourceKind::General | SourceKind::Other => ("news", GENERAL_FOCUS),
    }
}

/// Prompt asking for structured extraction from cleaned page text.
pub fn perceive(source: &SourceMeta, page_text: &str) -> String {
    let (subject, focus) = perceive_focus(source.kind);
    let focus = focus
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Extract the latest {subject} from the web page below.\n\n\
         Site: {name}\n\
         URL: {url}\n\
         Page content:\n{page_text}\n\n\
         Focus on:\n{focus}\n\n\
         Return JSON with:\n\
         - extracted_news: list of items, each with title, content and time\n\
         - key_topics: list of key topics\n\
         - important_info: object of notable facts",
        name = source.name,
        url = source.url,
    )
}

/// Prompt asking for a content model built from perceive output.
pub fn model(source: &SourceMeta, perception: &Value) -> String {
    format!(
        "Build a content model from the news extracted from {name}.\n\n\
         Extracted data:\n{data}\n\n\
         Return JSON with:\n\
         - content_summary: a concise summary\n\
         - main_themes: list of main themes\n\
         - sentiment: overall tone\n\
         - key_insights: list of insights\n\
         - related_entities: people, companies and events mentioned",
        name = source.name,
        data = pretty(perception),
    )
}

/// Prompt asking for the model (and its news items) in the target language.
pub fn translate(source: &SourceMeta, target_language: &str, content: &Value) -> String {
    format!(
        "Translate the content below into the language with code '{target_language}', \
         keeping its structure and meaning and preserving technical terms.\n\n\
         Source language: {language}\n\
         Site: {name}\n\
         Content:\n{data}\n\n\
         Return JSON with:\n\
         - summary: the translated summary\n\
         - news: the translated news items\n\
         - insights: the translated insights\n\
         Every text field must be in '{target_language}'.",
        language = source.language,
        name = source.name,
        data = pretty(content),
    )
}

/// Prompt asking for the consolidated report.
pub fn synthesis(input: &SynthesisInput, target_language: &str) -> String {
    format!(
        "Write a consolidated news report in the language with code '{target_language}' \
         from the per-source content below.\n\n\
         Number of sources: {count}\n\
         Some sources may be partial or absent; say so where it matters rather than \
         guessing their content.\n\n\
         Sources:\n{data}\n\n\
         Include:\n\
         1. A title and executive summary\n\
         2. The main stories, most important first\n\
         3. Shared themes and trends\n\
         4. How the sources' perspectives differ\n\
         5. Key findings\n\
         6. Conclusions",
        count = input.entries.len(),
        data = pretty(&serde_json::to_value(&input.entries).unwrap_or(Value::Null)),
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
