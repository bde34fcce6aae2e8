//! Capability seams and kind-based binding.
//!
//! The engine never knows how a page is fetched or how text is transformed.
//! It calls trait objects bound per source at construction time, chosen from
//! a [`CapabilityTable`] keyed by [`SourceKind`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use newsdesk_fetch::HttpFetcher;
use newsdesk_shared::{Result, SourceEntry, SourceKind, SourceMeta, StageError};

use crate::aggregate::SynthesisInput;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Retrieves the raw page for a source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceMeta) -> std::result::Result<String, StageError>;
}

/// One text-transform stage (perceive, model or translate).
///
/// Input is the previous stage's output. Implementations must not assume they
/// are called only once: a retried stage calls `apply` again from scratch.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(
        &self,
        source: &SourceMeta,
        input: &Value,
    ) -> std::result::Result<Value, StageError>;
}

/// Turns the aggregated run into report text. Invoked once per run.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, input: &SynthesisInput) -> std::result::Result<String, StageError>;
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceMeta) -> std::result::Result<String, StageError> {
        HttpFetcher::fetch(self, &source.url)
            .await
            .map(|page| page.body)
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// The four capabilities a pipeline drives, one per stage.
#[derive(Clone)]
pub struct CapabilityBindings {
    pub fetch: Arc<dyn Fetcher>,
    pub perceive: Arc<dyn Transform>,
    pub model: Arc<dyn Transform>,
    pub translate: Arc<dyn Transform>,
}

impl fmt::Debug for CapabilityBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBindings").finish_non_exhaustive()
    }
}

/// A source ready to run: validated metadata plus its bound capabilities.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub meta: SourceMeta,
    pub bindings: CapabilityBindings,
}

impl SourceSpec {
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// Kind → bindings lookup. Kinds without an entry use the default bindings.
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    default: CapabilityBindings,
    by_kind: HashMap<SourceKind, CapabilityBindings>,
}

impl CapabilityTable {
    pub fn new(default: CapabilityBindings) -> Self {
        Self {
            default,
            by_kind: HashMap::new(),
        }
    }

    /// Register bindings for one kind, replacing any previous entry.
    pub fn with_kind(mut self, kind: SourceKind, bindings: CapabilityBindings) -> Self {
        self.by_kind.insert(kind, bindings);
        self
    }

    pub fn bindings_for(&self, kind: SourceKind) -> &CapabilityBindings {
        self.by_kind.get(&kind).unwrap_or(&self.default)
    }

    /// Validate one config entry and bind its capabilities.
    pub fn bind(&self, entry: &SourceEntry) -> Result<SourceSpec> {
        let meta = SourceMeta::try_from(entry)?;
        let bindings = self.bindings_for(meta.kind).clone();
        Ok(SourceSpec { meta, bindings })
    }

    /// Bind every entry, preserving configuration order.
    pub fn bind_all(&self, entries: &[SourceEntry]) -> Result<Vec<SourceSpec>> {
        entries.iter().map(|entry| self.bind(entry)).collect()
    }
}
