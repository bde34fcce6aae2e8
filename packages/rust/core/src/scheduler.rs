//! Runs every configured source through its pipeline.
//!
//! Serial mode is a pool of one. In concurrent mode a semaphore caps the
//! number of pipelines in flight. Permits are taken in configuration order
//! *before* a pipeline task is spawned, and task handles are awaited in the
//! same order, so the batch always lists sources as configured no matter
//! which finishes first.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use newsdesk_cache::{CacheKey, ContentCache};
use newsdesk_shared::{NewsdeskError, Result, RunId, RunModeSetting, RunSettings};

use crate::capability::SourceSpec;
use crate::pipeline::{PipelineOptions, ProgressReporter, SilentProgress, SourcePipeline};
use crate::record::{AggregationBatch, SourceRecord};

/// How sources are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serial,
    Concurrent { max_in_flight: usize },
}

impl RunMode {
    pub fn from_settings(settings: &RunSettings) -> Self {
        match settings.run_mode {
            RunModeSetting::Serial => Self::Serial,
            RunModeSetting::Concurrent => Self::Concurrent {
                max_in_flight: settings.max_in_flight,
            },
        }
    }

    pub fn pool_size(self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Concurrent { max_in_flight } => max_in_flight,
        }
    }
}

/// Cooperative stop signal shared by the scheduler and its pipelines.
///
/// Once requested, no new pipeline starts and running pipelines halt after
/// their current stage.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Slot {
    Running(JoinHandle<SourceRecord>),
    NotStarted,
}

/// Owns the ordered source list and drives a run over it.
pub struct PipelineScheduler {
    sources: Vec<SourceSpec>,
    options: Arc<PipelineOptions>,
    cache: Option<ContentCache>,
    stop: StopHandle,
    progress: Arc<dyn ProgressReporter>,
}

impl PipelineScheduler {
    pub fn new(sources: Vec<SourceSpec>, options: PipelineOptions) -> Self {
        Self {
            sources,
            options: Arc::new(options),
            cache: None,
            stop: StopHandle::default(),
            progress: Arc::new(SilentProgress),
        }
    }

    /// Share `cache` with every pipeline; `None` disables caching.
    pub fn with_cache(mut self, cache: Option<ContentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Handle that stops this scheduler's runs.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    /// Run every source and return their records in configuration order.
    ///
    /// Per-source failures never surface here; only configuration problems do.
    #[instrument(skip_all, fields(sources = self.sources.len(), mode = ?mode))]
    pub async fn run_all(&self, mode: RunMode) -> Result<AggregationBatch> {
        self.validate(mode)?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(%run_id, pool = mode.pool_size(), "starting run");

        let semaphore = Arc::new(Semaphore::new(mode.pool_size()));
        let mut slots = Vec::with_capacity(self.sources.len());

        for spec in &self.sources {
            // Waiting here keeps start order equal to configuration order.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(source = %spec.name(), error = %e, "worker pool closed");
                    slots.push(Slot::NotStarted);
                    continue;
                }
            };
            if self.stop.is_stop_requested() {
                slots.push(Slot::NotStarted);
                continue;
            }

            let pipeline = SourcePipeline::new(spec.clone(), self.options.clone())
                .with_cache(self.cache.clone())
                .with_stop(self.stop.clone())
                .with_progress(self.progress.clone());
            slots.push(Slot::Running(tokio::spawn(async move {
                let _permit = permit;
                pipeline.run().await
            })));
        }

        let mut records = Vec::with_capacity(slots.len());
        for (spec, slot) in self.sources.iter().zip(slots) {
            let record = match slot {
                Slot::Running(handle) => match handle.await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(source = %spec.name(), error = %e, "pipeline task failed");
                        let record = SourceRecord::crashed(&spec.meta, e.to_string());
                        self.progress.source_finished(&record);
                        record
                    }
                },
                Slot::NotStarted => {
                    let record = SourceRecord::cancelled(&spec.meta);
                    self.progress.source_finished(&record);
                    record
                }
            };
            records.push(record);
        }

        let batch = AggregationBatch {
            run_id,
            started_at,
            finished_at: Utc::now(),
            records,
        };
        let stats = batch.stats();
        info!(
            %run_id,
            completed = stats.completed,
            degraded = stats.degraded,
            from_cache = stats.from_cache,
            elapsed_ms = batch.elapsed().num_milliseconds(),
            "run finished"
        );
        Ok(batch)
    }

    fn validate(&self, mode: RunMode) -> Result<()> {
        if self.sources.is_empty() {
            return Err(NewsdeskError::config("no sources configured"));
        }
        if mode.pool_size() == 0 {
            return Err(NewsdeskError::config("max_in_flight must be at least 1"));
        }
        if mode.pool_size() > Semaphore::MAX_PERMITS {
            return Err(NewsdeskError::config(format!(
                "max_in_flight {} exceeds the worker pool limit of {}",
                mode.pool_size(),
                Semaphore::MAX_PERMITS
            )));
        }

        // Names double as cache namespaces, so they must stay distinct after
        // sanitizing as well.
        let mut seen: HashMap<String, &str> = HashMap::new();
        for spec in &self.sources {
            let namespace = CacheKey::for_source(spec.name(), "").namespace().to_string();
            if let Some(previous) = seen.insert(namespace, spec.name()) {
                return Err(NewsdeskError::config(format!(
                    "duplicate source name: '{previous}' and '{}'",
                    spec.name()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use newsdesk_shared::{ErrorKind, SourceMeta, StageError, StageKind};

    use crate::capability::Fetcher;
    use crate::record::{DegradeReason, StageOutcome};
    use crate::stage::{Backoff, StagePolicy};
    use crate::testing::{CountingFetcher, RecordingProgress, ScriptedFetcher, bindings, spec};

    fn options() -> PipelineOptions {
        PipelineOptions {
            policy: StagePolicy {
                backoff: Backoff::none(),
                ..StagePolicy::default()
            },
            ..PipelineOptions::default()
        }
    }

    fn scheduler_over(names: &[&str], fetcher: Arc<ScriptedFetcher>) -> PipelineScheduler {
        let specs = names
            .iter()
            .map(|name| spec(name, bindings(fetcher.clone())))
            .collect();
        PipelineScheduler::new(specs, options())
    }

    fn names(batch: &AggregationBatch) -> Vec<&str> {
        batch.records.iter().map(|r| r.name.as_str()).collect()
    }

    #[tokio::test]
    async fn concurrent_output_keeps_configuration_order() {
        // Earlier sources are slower, so completion order is reversed.
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .delay("S1", Duration::from_millis(120))
                .delay("S2", Duration::from_millis(90))
                .delay("S3", Duration::from_millis(60))
                .delay("S4", Duration::from_millis(30))
                .delay("S5", Duration::from_millis(5)),
        );
        let scheduler = scheduler_over(&["S1", "S2", "S3", "S4", "S5"], fetcher.clone());

        let batch = scheduler
            .run_all(RunMode::Concurrent { max_in_flight: 2 })
            .await
            .unwrap();

        assert_eq!(names(&batch), ["S1", "S2", "S3", "S4", "S5"]);
        assert!(batch.records.iter().all(SourceRecord::is_completed));
        assert_eq!(fetcher.peak(), 2, "never more than max_in_flight at once");
    }

    #[tokio::test]
    async fn serial_mode_runs_one_at_a_time_in_order() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .delay("A", Duration::from_millis(40))
                .delay("B", Duration::from_millis(10)),
        );
        let scheduler = scheduler_over(&["A", "B", "C"], fetcher.clone());

        let batch = scheduler.run_all(RunMode::Serial).await.unwrap();

        assert_eq!(names(&batch), ["A", "B", "C"]);
        assert_eq!(fetcher.started(), ["A", "B", "C"]);
        assert_eq!(fetcher.peak(), 1);
    }

    #[tokio::test]
    async fn end_to_end_failure_isolation() {
        let fetcher = Arc::new(ScriptedFetcher::default().fail("B", ErrorKind::PermanentFetch));
        let scheduler = scheduler_over(&["A", "B", "C"], fetcher);

        let batch = scheduler
            .run_all(RunMode::Concurrent { max_in_flight: 3 })
            .await
            .unwrap();

        assert_eq!(names(&batch), ["A", "B", "C"]);
        assert!(batch.records[0].is_completed());
        assert!(batch.records[2].is_completed());

        let b = &batch.records[1];
        assert!(matches!(b.stage(StageKind::Fetch), StageOutcome::Failed(f) if f.attempts == 1));
        assert_eq!(b.degrade_reason().unwrap().label(), "PermanentFetch");
        assert_eq!(batch.stats().completed, 2);
    }

    #[tokio::test]
    async fn configuration_errors_are_rejected() {
        let fetcher = Arc::new(ScriptedFetcher::default());

        let empty = PipelineScheduler::new(Vec::new(), options());
        assert!(empty.run_all(RunMode::Serial).await.is_err());

        let zero = scheduler_over(&["A"], fetcher.clone());
        assert!(
            zero.run_all(RunMode::Concurrent { max_in_flight: 0 })
                .await
                .is_err()
        );

        let dupes = scheduler_over(&["A", "B", "A"], fetcher.clone());
        let err = dupes.run_all(RunMode::Serial).await.unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));

        // Distinct names that share a cache namespace are duplicates too.
        let clash = scheduler_over(&["Tech News", "Tech_News"], fetcher.clone());
        let err = clash.run_all(RunMode::Serial).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("duplicate source name: 'Tech News' and 'Tech_News'"),
            "got {err}"
        );

        let huge = scheduler_over(&["A"], fetcher);
        let err = huge
            .run_all(RunMode::Concurrent {
                max_in_flight: Semaphore::MAX_PERMITS + 1,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max_in_flight"), "got {err}");
    }

    #[test]
    fn fixture_names_with_spaces_get_valid_hosts() {
        let meta = crate::testing::meta("Tech News");
        assert_eq!(meta.url.as_str(), "https://tech-news.example.com/news");
    }

    #[tokio::test]
    async fn stop_cancels_unstarted_sources() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let scheduler = scheduler_over(&["A", "B"], fetcher.clone());
        scheduler.stop_handle().request_stop();

        let batch = scheduler.run_all(RunMode::Serial).await.unwrap();

        assert_eq!(names(&batch), ["A", "B"]);
        assert!(fetcher.started().is_empty());
        for record in &batch.records {
            assert_eq!(
                record.degrade_reason(),
                Some(&DegradeReason::Cancelled {
                    before: StageKind::Fetch
                })
            );
        }
    }

    /// Requests a stop from inside the first source's fetch.
    struct StopDuringFetch {
        stop: StopHandle,
    }

    #[async_trait]
    impl Fetcher for StopDuringFetch {
        async fn fetch(&self, _source: &SourceMeta) -> std::result::Result<String, StageError> {
            self.stop.request_stop();
            Ok("<p>page</p>".into())
        }
    }

    #[tokio::test]
    async fn stop_mid_run_finishes_current_stage_only() {
        let stop = StopHandle::default();
        let first = spec("First", bindings(Arc::new(StopDuringFetch { stop: stop.clone() })));
        let second = spec("Second", bindings(Arc::new(CountingFetcher::new("<p>2</p>"))));
        let mut scheduler = PipelineScheduler::new(vec![first, second], options());
        scheduler.stop = stop;

        let batch = scheduler.run_all(RunMode::Serial).await.unwrap();

        let first = &batch.records[0];
        assert!(first.stage(StageKind::Fetch).is_ok());
        assert_eq!(first.stage(StageKind::Perceive), &StageOutcome::NotRun);
        assert_eq!(
            first.degrade_reason(),
            Some(&DegradeReason::Cancelled {
                before: StageKind::Perceive
            })
        );
        assert_eq!(
            batch.records[1].degrade_reason(),
            Some(&DegradeReason::Cancelled {
                before: StageKind::Fetch
            })
        );
    }

    /// Panics inside the pipeline task.
    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, _source: &SourceMeta) -> std::result::Result<String, StageError> {
            panic!("fetcher bug");
        }
    }

    #[tokio::test]
    async fn panicking_pipeline_is_isolated() {
        let progress = Arc::new(RecordingProgress::default());
        let ok = spec("Ok", bindings(Arc::new(CountingFetcher::new("<p>ok</p>"))));
        let bad = spec("Bad", bindings(Arc::new(PanickingFetcher)));
        let scheduler = PipelineScheduler::new(vec![bad, ok], options())
            .with_progress(progress.clone());

        let batch = scheduler
            .run_all(RunMode::Concurrent { max_in_flight: 2 })
            .await
            .unwrap();

        assert_eq!(batch.records[0].degrade_reason().unwrap().label(), "Crashed");
        assert!(batch.records[1].is_completed());
        assert_eq!(progress.finished().len(), 2);
    }

    #[test]
    fn run_mode_from_settings() {
        let mut settings = RunSettings::default();
        assert_eq!(RunMode::from_settings(&settings), RunMode::Serial);
        settings.run_mode = RunModeSetting::Concurrent;
        settings.max_in_flight = 4;
        assert_eq!(
            RunMode::from_settings(&settings),
            RunMode::Concurrent { max_in_flight: 4 }
        );
        assert_eq!(RunMode::Serial.pool_size(), 1);
    }
}
