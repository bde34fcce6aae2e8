//! Fake capabilities shared by the engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use newsdesk_shared::{ErrorKind, SourceEntry, SourceKind, SourceMeta, StageError, StageKind};

use crate::capability::{CapabilityBindings, Fetcher, SourceSpec, Transform};
use crate::pipeline::ProgressReporter;
use crate::record::SourceRecord;

/// Returns a fixed page (or a fixed error) and counts calls.
pub(crate) struct CountingFetcher {
    result: Result<String, ErrorKind>,
    calls: AtomicU32,
}

impl CountingFetcher {
    pub(crate) fn new(page: &str) -> Self {
        Self {
            result: Ok(page.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing(kind: ErrorKind) -> Self {
        Self {
            result: Err(kind),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, source: &SourceMeta) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Ok(page) => Ok(page.clone()),
            Err(kind) => Err(StageError::new(*kind, format!("{} unavailable", source.url))),
        }
    }
}

/// Fetcher keyed by source name: per-source delay and failure, plus a
/// high-water mark of concurrent calls.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, ErrorKind>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn delay(mut self, source: &str, delay: Duration) -> Self {
        self.delays.insert(source.to_string(), delay);
        self
    }

    pub(crate) fn fail(mut self, source: &str, kind: ErrorKind) -> Self {
        self.failures.insert(source.to_string(), kind);
        self
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, source: &SourceMeta) -> Result<String, StageError> {
        self.started.lock().expect("lock").push(source.name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&source.name) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.get(&source.name) {
            Some(kind) => Err(StageError::new(*kind, format!("{} refused", source.name))),
            None => Ok(format!("<p>{} page</p>", source.name)),
        }
    }
}

/// Wraps its input under a label, so nested output shows which stages ran.
pub(crate) struct EchoTransform {
    label: &'static str,
}

impl EchoTransform {
    pub(crate) fn new(label: &'static str) -> Self {
        Self { label }
    }
}

#[async_trait]
impl Transform for EchoTransform {
    async fn apply(&self, _source: &SourceMeta, input: &Value) -> Result<Value, StageError> {
        let mut wrapped = Map::new();
        wrapped.insert(self.label.to_string(), input.clone());
        Ok(Value::Object(wrapped))
    }
}

/// Always fails with one kind and counts calls.
pub(crate) struct FailingTransform {
    kind: ErrorKind,
    calls: AtomicU32,
}

impl FailingTransform {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for FailingTransform {
    async fn apply(&self, _source: &SourceMeta, _input: &Value) -> Result<Value, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StageError::new(self.kind, "transform rejected input"))
    }
}

/// Captures progress callbacks.
#[derive(Default)]
pub(crate) struct RecordingProgress {
    started: Mutex<Vec<(String, StageKind)>>,
    finished: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub(crate) fn started(&self) -> Vec<(String, StageKind)> {
        self.started.lock().expect("lock").clone()
    }

    pub(crate) fn finished(&self) -> Vec<String> {
        self.finished.lock().expect("lock").clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn stage_started(&self, source: &str, stage: StageKind) {
        self.started
            .lock()
            .expect("lock")
            .push((source.to_string(), stage));
    }

    fn source_finished(&self, record: &SourceRecord) {
        self.finished.lock().expect("lock").push(record.name.clone());
    }
}

/// Bindings with the given fetcher and labelled echo transforms.
pub(crate) fn bindings(fetch: Arc<dyn Fetcher>) -> CapabilityBindings {
    CapabilityBindings {
        fetch,
        perceive: Arc::new(EchoTransform::new("perceive")),
        model: Arc::new(EchoTransform::new("model")),
        translate: Arc::new(EchoTransform::new("translate")),
    }
}

/// Host label derived from a display name (`Tech News` → `tech-news`).
fn host_label(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

pub(crate) fn meta(name: &str) -> SourceMeta {
    let entry = SourceEntry {
        name: name.to_string(),
        url: format!("https://{}.example.com/news", host_label(name)),
        kind: SourceKind::General,
        language: "en".into(),
        description: String::new(),
        model: None,
    };
    SourceMeta::try_from(&entry).expect("valid test source")
}

pub(crate) fn spec(name: &str, bindings: CapabilityBindings) -> SourceSpec {
    SourceSpec {
        meta: meta(name),
        bindings,
    }
}
