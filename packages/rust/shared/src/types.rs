//! Core domain types shared by every Newsdesk crate.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::SourceEntry;
use crate::error::{NewsdeskError, Result};

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one scheduler run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// The kind of site a source is. Selects kind-specific capability bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Financial,
    Tech,
    #[default]
    General,
    Forum,
    #[serde(other)]
    Other,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Tech => "tech",
            Self::General => "general",
            Self::Forum => "forum",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// One of the four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Fetch,
    Perceive,
    Model,
    Translate,
}

impl StageKind {
    /// All stages in pipeline order.
    pub const ALL: [StageKind; 4] = [Self::Fetch, Self::Perceive, Self::Model, Self::Translate];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Self::Fetch => 0,
            Self::Perceive => 1,
            Self::Model => 2,
            Self::Translate => 3,
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<StageKind> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Perceive => "perceive",
            Self::Model => "model",
            Self::Translate => "translate",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SourceMeta
// ---------------------------------------------------------------------------

/// Validated descriptor of one configured source. Never mutated after startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMeta {
    /// Unique display name; also the cache namespace.
    pub name: String,
    /// Page to fetch.
    pub url: Url,
    pub kind: SourceKind,
    /// Declared content language (`"auto"` when unknown).
    pub language: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Per-source model override for the LLM stages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TryFrom<&SourceEntry> for SourceMeta {
    type Error = NewsdeskError;

    fn try_from(entry: &SourceEntry) -> Result<Self> {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(NewsdeskError::config(format!(
                "source with url '{}' has an empty name",
                entry.url
            )));
        }

        let url = Url::parse(&entry.url).map_err(|e| {
            NewsdeskError::config(format!("source '{name}': invalid url '{}': {e}", entry.url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(NewsdeskError::config(format!(
                "source '{name}': unsupported scheme '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            url,
            kind: entry.kind,
            language: entry.language.clone(),
            description: entry.description.clone(),
            model: entry.model.clone(),
        })
    }
}
