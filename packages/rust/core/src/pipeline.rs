//! Per-source pipeline: fetch → perceive → model → translate.
//!
//! A [`SourcePipeline`] is an explicit state machine. Each stage runs under
//! the [`StageRunner`]; the first failed stage moves the pipeline to
//! `Degraded` and every later stage is recorded as skipped. A pipeline never
//! returns an error: whatever happens ends up in its [`SourceRecord`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use newsdesk_cache::{CacheKey, ContentCache};
use newsdesk_shared::{RunSettings, StageKind};

use crate::capability::{SourceSpec, Transform};
use crate::record::{DegradeReason, FetchOrigin, SourceRecord, StageOutcome, Terminal};
use crate::scheduler::StopHandle;
use crate::stage::{StagePolicy, StageResult, StageRunner};

// ---------------------------------------------------------------------------
// Options and progress
// ---------------------------------------------------------------------------

/// Knobs shared by every pipeline in a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub policy: StagePolicy,
    /// Maximum age of a cache entry that still counts as fresh.
    pub cache_ttl: Duration,
    /// Skip the cache lookup (the fresh result is still written back).
    pub force_refresh: bool,
    /// Use an expired cache entry when the network fetch fails.
    pub stale_on_error: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_settings(&RunSettings::default())
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            policy: StagePolicy::from_settings(settings),
            cache_ttl: settings.cache_max_age(),
            force_refresh: settings.force_refresh,
            stale_on_error: settings.stale_on_error,
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a source enters a stage.
    fn stage_started(&self, source: &str, stage: StageKind);
    /// Called once per source with its final record.
    fn source_finished(&self, record: &SourceRecord);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _source: &str, _stage: StageKind) {}
    fn source_finished(&self, _record: &SourceRecord) {}
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a pipeline is. `Completed` and `Degraded` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Fetching,
    Perceiving,
    Modeling,
    Translating,
    Completed,
    Degraded,
}

impl PipelineState {
    /// The stage this state runs, or `None` when terminal.
    pub fn stage(self) -> Option<StageKind> {
        match self {
            Self::Fetching => Some(StageKind::Fetch),
            Self::Perceiving => Some(StageKind::Perceive),
            Self::Modeling => Some(StageKind::Model),
            Self::Translating => Some(StageKind::Translate),
            Self::Completed | Self::Degraded => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.stage().is_none()
    }

    /// Transition taken when the current stage succeeds.
    pub fn on_success(self) -> Self {
        match self {
            Self::Fetching => Self::Perceiving,
            Self::Perceiving => Self::Modeling,
            Self::Modeling => Self::Translating,
            Self::Translating | Self::Completed => Self::Completed,
            Self::Degraded => Self::Degraded,
        }
    }
}

// ---------------------------------------------------------------------------
// SourcePipeline
// ---------------------------------------------------------------------------

/// Drives one source through its four stages.
pub struct SourcePipeline {
    spec: SourceSpec,
    options: Arc<PipelineOptions>,
    cache: Option<ContentCache>,
    stop: StopHandle,
    progress: Arc<dyn ProgressReporter>,
}

impl SourcePipeline {
    pub fn new(spec: SourceSpec, options: Arc<PipelineOptions>) -> Self {
        Self {
            spec,
            options,
            cache: None,
            stop: StopHandle::default(),
            progress: Arc::new(SilentProgress),
        }
    }

    /// Read fetched pages from, and write them to, `cache`.
    pub fn with_cache(mut self, cache: Option<ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Run to a terminal state and return the record.
    #[instrument(skip_all, fields(source = %self.spec.meta.name, kind = %self.spec.meta.kind))]
    pub async fn run(&self) -> SourceRecord {
        let started = Instant::now();
        let runner = StageRunner::new(self.options.policy.clone());
        let meta = &self.spec.meta;

        let mut stages: [StageOutcome; 4] = Default::default();
        let mut fetch_origin = None;
        let mut carry = Value::Null;
        let mut last_good = None;
        let mut reason = None;
        let mut state = PipelineState::Fetching;

        while let Some(stage) = state.stage() {
            if self.stop.is_stop_requested() {
                info!(before = %stage, "stop requested, halting");
                reason = Some(DegradeReason::Cancelled { before: stage });
                break;
            }

            debug!(?state, "entering stage");
            self.progress.stage_started(&meta.name, stage);

            let bindings = &self.spec.bindings;
            let result = match stage {
                StageKind::Fetch => self.fetch_stage(&runner, &mut fetch_origin).await,
                StageKind::Perceive => {
                    self.transform_stage(&runner, stage, &*bindings.perceive, &carry).await
                }
                StageKind::Model => {
                    self.transform_stage(&runner, stage, &*bindings.model, &carry).await
                }
                StageKind::Translate => {
                    self.transform_stage(&runner, stage, &*bindings.translate, &carry).await
                }
            };

            match result {
                StageResult::Ok(value) => {
                    stages[stage.index()] = StageOutcome::Ok(value.clone());
                    carry = value;
                    last_good = Some(stage);
                    state = state.on_success();
                }
                StageResult::Failed(failure) => {
                    warn!(
                        stage = %stage,
                        kind = %failure.kind,
                        attempts = failure.attempts,
                        error = %failure.message,
                        "stage failed, source degraded"
                    );
                    reason = Some(DegradeReason::Stage {
                        stage,
                        kind: failure.kind,
                        message: failure.message.clone(),
                    });
                    stages[stage.index()] = StageOutcome::Failed(failure);
                    for later in &mut stages[stage.index() + 1..] {
                        *later = StageOutcome::Skipped { blocked_by: stage };
                    }
                    state = PipelineState::Degraded;
                }
            }
        }

        let terminal = match reason {
            None => Terminal::Completed { output: carry },
            Some(reason) => Terminal::Degraded {
                last_good_stage: last_good,
                reason,
            },
        };
        let record = SourceRecord {
            name: meta.name.clone(),
            url: meta.url.to_string(),
            kind: meta.kind,
            stages,
            fetch_origin,
            elapsed_ms: started.elapsed().as_millis() as u64,
            terminal,
        };

        info!(
            completed = record.is_completed(),
            elapsed_ms = record.elapsed_ms,
            "source finished"
        );
        self.progress.source_finished(&record);
        record
    }

    /// Cache lookup, then network fetch with retries, then write-back.
    async fn fetch_stage(
        &self,
        runner: &StageRunner,
        origin: &mut Option<FetchOrigin>,
    ) -> StageResult<Value> {
        let meta = &self.spec.meta;
        let key = CacheKey::for_source(&meta.name, meta.url.as_str());

        if !self.options.force_refresh {
            if let Some(hit) = self
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&key, self.options.cache_ttl))
            {
                debug!(cache_hit = true, age_secs = hit.age.as_secs(), "using cached page");
                *origin = Some(FetchOrigin::Cache);
                return StageResult::Ok(Value::String(hit.content));
            }
        }

        let fetcher = &self.spec.bindings.fetch;
        match runner.run(&meta.name, StageKind::Fetch, || fetcher.fetch(meta)).await {
            StageResult::Ok(body) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put(&key, &body) {
                        warn!(%key, error = %e, "failed to write cache entry");
                    }
                }
                debug!(cache_hit = false, bytes = body.len(), "page fetched");
                *origin = Some(FetchOrigin::Network);
                StageResult::Ok(Value::String(body))
            }
            StageResult::Failed(failure) => {
                let stale = self
                    .cache
                    .as_ref()
                    .filter(|_| self.options.stale_on_error)
                    .and_then(|cache| cache.get_stale(&key));
                match stale {
                    Some(entry) => {
                        warn!(
                            age_secs = entry.age.as_secs(),
                            error = %failure.message,
                            "fetch failed, using stale cache entry"
                        );
                        *origin = Some(FetchOrigin::StaleCache);
                        StageResult::Ok(Value::String(entry.content))
                    }
                    None => StageResult::Failed(failure),
                }
            }
        }
    }

    async fn transform_stage(
        &self,
        runner: &StageRunner,
        stage: StageKind,
        transform: &dyn Transform,
        input: &Value,
    ) -> StageResult<Value> {
        let meta = &self.spec.meta;
        runner
            .run(&meta.name, stage, || transform.apply(meta, input))
            .await
    }
}
