use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::language::Language;

/// Per-language toolchain settings, supplied by the configuration
/// collaborator once per run. Immutable for the duration of a run.
#[derive(Clone, Debug)]
pub struct LanguageConfig {
    /// Compiler or interpreter binary (`g++`, `python3`, `javac`, ...).
    pub compiler: PathBuf,
    /// Runtime for languages where it differs from the compiler (`java`).
    pub runtime: Option<PathBuf>,
    /// Language standard, e.g. `c++17`.
    pub std_version: Option<String>,
    /// Optimization level, e.g. `O2`.
    pub optimization: Option<String>,
    /// Extra flags appended to the compile command.
    pub flags: Vec<String>,
    pub compile_timeout: Duration,
    pub memory_limit_mb: Option<u64>,
}

impl LanguageConfig {
    /// Sensible defaults per language, mirroring what the configuration
    /// collaborator ships out of the box.
    pub fn defaults_for(language: Language) -> Self {
        match language {
            Language::Cpp => LanguageConfig {
                compiler: "g++".into(),
                runtime: None,
                std_version: Some("c++17".into()),
                optimization: Some("O2".into()),
                flags: vec!["-pipe".into(), "-Wall".into()],
                compile_timeout: Duration::from_secs(30),
                memory_limit_mb: None,
            },
            Language::C => LanguageConfig {
                compiler: "gcc".into(),
                runtime: None,
                std_version: Some("c17".into()),
                optimization: Some("O2".into()),
                flags: vec!["-pipe".into(), "-Wall".into()],
                compile_timeout: Duration::from_secs(30),
                memory_limit_mb: None,
            },
            Language::Python => LanguageConfig {
                compiler: "python3".into(),
                runtime: None,
                std_version: None,
                optimization: None,
                flags: vec!["-u".into()],
                compile_timeout: Duration::from_secs(10),
                memory_limit_mb: None,
            },
            Language::Java => LanguageConfig {
                compiler: "javac".into(),
                runtime: Some("java".into()),
                std_version: None,
                optimization: None,
                flags: vec![],
                compile_timeout: Duration::from_secs(60),
                memory_limit_mb: None,
            },
            Language::JavaScript | Language::TypeScript => LanguageConfig {
                compiler: PathBuf::new(),
                runtime: None,
                std_version: None,
                optimization: None,
                flags: vec![],
                compile_timeout: Duration::from_secs(30),
                memory_limit_mb: None,
            },
        }
    }
}

/// A runnable artifact produced by compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Native executable on disk.
    Executable { path: PathBuf },
    /// Validated script plus the interpreter invocation for it.
    Script {
        interpreter: PathBuf,
        flags: Vec<String>,
        path: PathBuf,
    },
    /// Compiled Java class: runtime, classpath directory and main class.
    JavaClass {
        runtime: PathBuf,
        class_dir: PathBuf,
        class_name: String,
    },
}

impl Artifact {
    /// The command line that runs this artifact.
    pub fn command(&self) -> (PathBuf, Vec<String>) {
        match &self.kind {
            ArtifactKind::Executable { path } => (path.clone(), vec![]),
            ArtifactKind::Script {
                interpreter,
                flags,
                path,
            } => {
                let mut args = flags.clone();
                args.push(path.display().to_string());
                (interpreter.clone(), args)
            }
            ArtifactKind::JavaClass {
                runtime,
                class_dir,
                class_name,
            } => (
                runtime.clone(),
                vec![
                    "-cp".to_string(),
                    class_dir.display().to_string(),
                    class_name.clone(),
                ],
            ),
        }
    }
}

/// Outcome of compiling one source file.
///
/// Invariant: `success == false` implies `artifact.is_none()`; the run must
/// not start testing in that case.
#[derive(Clone, Debug)]
pub struct CompilationResult {
    pub success: bool,
    pub artifact: Option<Artifact>,
    pub output: String,
    pub error: String,
    pub duration: Duration,
    pub cached: bool,
}

impl CompilationResult {
    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        CompilationResult {
            success: false,
            artifact: None,
            output: String::new(),
            error: error.into(),
            duration,
            cached: false,
        }
    }
}

/// The three pipeline variants, historically "stress", "TLE" and
/// "validator" testing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestMode {
    Comparison,
    Benchmark,
    Validation,
}

impl TestMode {
    /// Tag used by the persistence collaborator's schema.
    pub fn tag(&self) -> &'static str {
        match self {
            TestMode::Comparison => "comparison",
            TestMode::Benchmark => "benchmark",
            TestMode::Validation => "validator",
        }
    }
}

/// Whether a failing test stops the whole batch (legacy stress-testing
/// convention) or the full requested count still runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StopPolicy {
    #[default]
    RunAll,
    StopOnFirstFailure,
}

/// Source files by role for one run.
#[derive(Clone, Debug, Default)]
pub struct SourceSet {
    pub generator: Option<PathBuf>,
    pub candidate: PathBuf,
    pub reference: Option<PathBuf>,
    pub validator: Option<PathBuf>,
}

/// Everything the caller supplies to start a run. Validated once, then
/// immutable.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub workspace_dir: PathBuf,
    pub language: Language,
    pub mode: TestMode,
    pub sources: SourceSet,
    pub test_count: u32,
    pub time_limit: Duration,
    pub memory_limit_mb: Option<u64>,
    pub max_workers: Option<usize>,
    pub stop_policy: StopPolicy,
    pub project_name: String,
}

impl RunRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.language.is_supported() {
            return Err(ConfigError::UnsupportedLanguage(self.language));
        }
        if self.test_count == 0 {
            return Err(ConfigError::InvalidRequest(
                "test_count must be at least 1".into(),
            ));
        }
        if self.time_limit.is_zero() {
            return Err(ConfigError::InvalidRequest(
                "time_limit must be positive".into(),
            ));
        }
        if self.sources.candidate.as_os_str().is_empty() {
            return Err(ConfigError::InvalidRequest(
                "candidate source file is required".into(),
            ));
        }
        match self.mode {
            TestMode::Comparison if self.sources.reference.is_none() => Err(
                ConfigError::InvalidRequest("comparison mode requires a reference solution".into()),
            ),
            TestMode::Validation if self.sources.validator.is_none() => Err(
                ConfigError::InvalidRequest("validation mode requires a validator".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Wall-clock seconds spent in each pipeline stage of one test.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StageTimes {
    pub generator: f64,
    pub candidate: f64,
    /// Reference run (comparison) or validator run (validation).
    pub verdict: f64,
}

/// One completed test. Created exactly once by its pipeline invocation and
/// immutable afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct TestResult {
    pub test_number: u32,
    pub passed: bool,
    /// Input snapshot, truncated for display.
    pub input: String,
    pub expected_output: Option<String>,
    pub actual_output: String,
    /// Candidate wall time in seconds.
    pub execution_time: f64,
    pub memory_used: Option<f64>,
    pub error_message: Option<String>,
    pub stage_times: StageTimes,
    pub timestamp: DateTime<Utc>,
}
