//! Test-execution core for competitive-programming workflows.
//!
//! Given a solution and its helper programs (input generator, reference
//! solution, validator), the crate compiles everything for the selected
//! language, runs a batch of numbered tests on a bounded worker pool, and
//! streams typed progress events back to the caller while a stop request
//! can kill everything mid-flight.
//!
//! Entry point: build a [`RunRequest`], then call [`start_run`]. Consume
//! events from the returned [`RunHandle`] until the terminal
//! [`RunEvent::AllTestsCompleted`], then [`RunHandle::join`] for the
//! persisted [`TestSummary`].

pub mod compile;
pub mod domain;
pub mod error;
pub mod events;
pub mod language;
pub mod pipeline;
pub mod process;
pub mod resources;
pub mod results;
pub mod run;
pub mod scheduler;

pub use domain::{
    Artifact, ArtifactKind, CompilationResult, LanguageConfig, RunRequest, SourceSet, StageTimes,
    StopPolicy, TestMode, TestResult,
};
pub use error::{CompileError, ConfigError, ProcessError};
pub use events::{OutputKind, RunEvent};
pub use language::Language;
pub use process::{ProcessRunner, TokioProcessRunner};
pub use resources::{ResourceManager, ResourceSession};
pub use results::{ResultAggregator, ResultStore, TestSummary};
pub use run::{RunHandle, start_run, start_run_with_runner};

use tracing_subscriber::EnvFilter;

/// Installs the default log subscriber, filtered by `RUST_LOG`. Call once
/// from the embedding application.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
