//! Core pipeline engine for Newsdesk.
//!
//! Runs every configured source through fetch → perceive → model → translate,
//! serially or with bounded concurrency, and folds the results into one
//! synthesis input. Capabilities (fetching, LLM transforms, synthesis) are
//! trait objects bound per source, so the engine is testable with fakes.

pub mod aggregate;
pub mod capability;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod report;
pub mod scheduler;
pub mod stage;

#[cfg(test)]
mod testing;

pub use aggregate::{Coverage, SynthesisEntry, SynthesisInput, aggregate};
pub use capability::{
    CapabilityBindings, CapabilityTable, Fetcher, SourceSpec, Synthesizer, Transform,
};
pub use llm::{LlmClient, LlmSynthesizer, PromptStage, PromptTransform, llm_bindings};
pub use pipeline::{PipelineOptions, ProgressReporter, SilentProgress, SourcePipeline};
pub use record::{
    AggregationBatch, DegradeReason, FetchOrigin, RunStats, SourceRecord, StageOutcome, Terminal,
};
pub use scheduler::{PipelineScheduler, RunMode, StopHandle};
pub use stage::{Backoff, StageFailure, StagePolicy, StageResult, StageRunner};
