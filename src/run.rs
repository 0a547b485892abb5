//! Run orchestration: compile every role, fan tests out over the worker
//! pool, aggregate, persist, and guarantee cleanup on every exit path.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::compile::{compile, validate_environment};
use crate::domain::{Artifact, LanguageConfig, RunRequest, TestMode};
use crate::error::ConfigError;
use crate::events::{OutputKind, RunEvent};
use crate::language::Language;
use crate::pipeline::{ProgramSet, TestPipeline};
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::resources::{ResourceManager, ResourceSession};
use crate::results::{ResultAggregator, ResultStore, TestSummary};
use crate::scheduler::{run_batch, worker_count};

const EVENT_BUFFER: usize = 256;

/// Handle to a run in flight. Events stream through [`next_event`]; the
/// summary comes back from [`join`] once the run's task finishes.
///
/// [`next_event`]: RunHandle::next_event
/// [`join`]: RunHandle::join
pub struct RunHandle {
    events: mpsc::Receiver<RunEvent>,
    session: Arc<ResourceSession>,
    task: JoinHandle<Option<TestSummary>>,
}

impl RunHandle {
    /// Requests a stop. Returns immediately; in-flight processes are
    /// killed and the terminal event still arrives.
    pub fn stop(&self) {
        tracing::info!(session = %self.session.id(), "stop requested");
        self.session.cancel();
    }

    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Waits for the run task and returns the summary, or `None` if the
    /// run never reached the test phase.
    pub async fn join(self) -> Option<TestSummary> {
        match self.task.await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "run task aborted");
                None
            }
        }
    }
}

/// Starts a run with the production process runner.
pub fn start_run(
    request: RunRequest,
    config: LanguageConfig,
    manager: &ResourceManager,
    store: Arc<dyn ResultStore>,
) -> Result<RunHandle, ConfigError> {
    request.validate()?;
    let session = manager
        .create_session()
        .map_err(|e| ConfigError::Workspace(e.to_string()))?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new(session.clone()));
    Ok(spawn_run(request, config, session, runner, store))
}

/// Same as [`start_run`] but with a caller-supplied process runner.
pub fn start_run_with_runner(
    request: RunRequest,
    config: LanguageConfig,
    manager: &ResourceManager,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn ResultStore>,
) -> Result<RunHandle, ConfigError> {
    request.validate()?;
    let session = manager
        .create_session()
        .map_err(|e| ConfigError::Workspace(e.to_string()))?;
    Ok(spawn_run(request, config, session, runner, store))
}

fn spawn_run(
    request: RunRequest,
    config: LanguageConfig,
    session: Arc<ResourceSession>,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn ResultStore>,
) -> RunHandle {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let task_session = session.clone();
    let task = tokio::spawn(async move {
        let summary = run_task(request, config, task_session.clone(), runner, store, &tx).await;
        // Cleanup happens after the last event, on every path.
        task_session.cleanup();
        summary
    });
    RunHandle {
        events: rx,
        session,
        task,
    }
}

#[tracing::instrument(skip_all, fields(project = %request.project_name, mode = request.mode.tag()))]
async fn run_task(
    request: RunRequest,
    config: LanguageConfig,
    session: Arc<ResourceSession>,
    runner: Arc<dyn ProcessRunner>,
    store: Arc<dyn ResultStore>,
    tx: &mpsc::Sender<RunEvent>,
) -> Option<TestSummary> {
    if let Err(e) = validate_environment(&config, runner.as_ref()).await {
        emit(tx, error_output(e.to_string())).await;
        emit(tx, RunEvent::AllTestsCompleted { all_passed: false }).await;
        return None;
    }

    let Some(programs) = compile_all(&request, &config, runner.as_ref(), tx).await else {
        emit(tx, RunEvent::AllTestsCompleted { all_passed: false }).await;
        return None;
    };

    let pipeline = TestPipeline::new(
        programs,
        request.mode,
        request.time_limit,
        Arc::clone(&runner),
        Arc::clone(&session),
    );
    let workers = worker_count(request.max_workers, request.test_count);
    tracing::info!(workers, tests = request.test_count, "starting test batch");

    let mut aggregator = ResultAggregator::new(
        request.mode,
        request.sources.candidate.display().to_string(),
        request.project_name.clone(),
        request.test_count,
    );

    let (batch_tx, mut batch_rx) = mpsc::channel(EVENT_BUFFER);
    let batch = tokio::spawn(run_batch(
        pipeline,
        request.test_count,
        workers,
        request.stop_policy,
        Arc::clone(&session),
        batch_tx,
    ));
    // Forward progress while the batch runs so the channel never backs up.
    while let Some(event) = batch_rx.recv().await {
        emit(tx, event).await;
    }
    let results = match batch.await {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(error = %e, "test batch task failed");
            Vec::new()
        }
    };
    for result in results {
        aggregator.record(result);
    }

    let all_passed = aggregator.all_passed();
    tracing::info!(
        passed = aggregator.passed(),
        failed = aggregator.failed(),
        total_time = aggregator.total_time(),
        "batch finished"
    );

    let summary = aggregator.finish();
    let id = store.save(&summary);
    if id <= 0 {
        tracing::warn!("failed to persist run summary");
    }

    emit(tx, RunEvent::AllTestsCompleted { all_passed }).await;
    Some(summary)
}

/// Compiles every role the mode needs, in a fixed order, streaming
/// compiler output as it goes. Any failure aborts before tests start.
async fn compile_all(
    request: &RunRequest,
    config: &LanguageConfig,
    runner: &dyn ProcessRunner,
    tx: &mpsc::Sender<RunEvent>,
) -> Option<ProgramSet> {
    let sources = &request.sources;

    let generator = match &sources.generator {
        Some(path) => Some(compile_role("generator", path, request, config, runner, tx).await?),
        None => None,
    };
    let candidate =
        compile_role("solution", &sources.candidate, request, config, runner, tx).await?;
    let reference = match (&request.mode, &sources.reference) {
        (TestMode::Comparison, Some(path)) => {
            Some(compile_role("reference", path, request, config, runner, tx).await?)
        }
        _ => None,
    };
    let validator = match (&request.mode, &sources.validator) {
        (TestMode::Validation, Some(path)) => {
            Some(compile_role("validator", path, request, config, runner, tx).await?)
        }
        _ => None,
    };

    Some(ProgramSet {
        generator,
        candidate,
        reference,
        validator,
    })
}

async fn compile_role(
    role: &str,
    source: &Path,
    request: &RunRequest,
    config: &LanguageConfig,
    runner: &dyn ProcessRunner,
    tx: &mpsc::Sender<RunEvent>,
) -> Option<Artifact> {
    // Helper programs may be written in a different language than the
    // solution under test; each file is detected on its own.
    let language = Language::detect(source).unwrap_or(request.language);
    let role_config;
    let config = if language == request.language {
        config
    } else {
        role_config = LanguageConfig::defaults_for(language);
        &role_config
    };

    emit(
        tx,
        info_output(format!("compiling {role}: {}", source.display())),
    )
    .await;

    let result = match compile(source, language, config, &request.workspace_dir, runner).await {
        Ok(result) => result,
        Err(e) => {
            emit(tx, error_output(format!("{role}: {e}"))).await;
            return None;
        }
    };

    if !result.success {
        emit(tx, error_output(format!("{role}: {}", result.error))).await;
        return None;
    }
    if !result.output.is_empty() {
        emit(tx, info_output(result.output.clone())).await;
    }
    match result.artifact {
        Some(artifact) => Some(artifact),
        None => {
            emit(
                tx,
                error_output(format!("{role}: compilation produced no artifact")),
            )
            .await;
            None
        }
    }
}

fn info_output(text: String) -> RunEvent {
    RunEvent::CompilationOutput {
        text,
        kind: OutputKind::Info,
    }
}

fn error_output(text: String) -> RunEvent {
    RunEvent::CompilationOutput {
        text,
        kind: OutputKind::Error,
    }
}

async fn emit(tx: &mpsc::Sender<RunEvent>, event: RunEvent) {
    // A caller that dropped its handle just stops receiving progress.
    let _ = tx.send(event).await;
}
