//! Source-to-artifact compilation, one implementation per language.
//!
//! Compiler diagnostics (bad source, timeout, Java class-name mismatch)
//! come back in-band as a failed [`CompilationResult`] so the caller can
//! surface them verbatim; only infrastructure problems are `Err`.

mod cpp;
mod java;
mod python;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::domain::{CompilationResult, LanguageConfig};
use crate::error::{CompileError, ConfigError, ProcessError};
use crate::language::Language;
use crate::process::{ProcessRunner, ProcessSpec};

/// Compile one source file into a runnable artifact in `workspace`.
pub async fn compile(
    source: &Path,
    language: Language,
    config: &LanguageConfig,
    workspace: &Path,
    runner: &dyn ProcessRunner,
) -> Result<CompilationResult, CompileError> {
    match language {
        Language::Cpp | Language::C => cpp::compile_native(source, config, workspace, runner).await,
        Language::Python => python::validate_script(source, config, runner).await,
        Language::Java => java::compile_java(source, config, workspace, runner).await,
        other => Err(CompileError::Unsupported(other)),
    }
}

/// Probe the configured compiler before a run starts so a missing
/// toolchain surfaces as a configuration error, not a mid-run failure.
pub async fn validate_environment(
    config: &LanguageConfig,
    runner: &dyn ProcessRunner,
) -> Result<(), ConfigError> {
    let spec = ProcessSpec::new(&config.compiler, Duration::from_secs(5)).arg("--version");
    match runner.run(spec).await {
        Ok(out) if out.success() => Ok(()),
        Ok(_) => Err(ConfigError::CompilerUnavailable(format!(
            "`{}` failed its version check",
            config.compiler.display()
        ))),
        Err(ProcessError::NotFound(p)) | Err(ProcessError::PermissionDenied(p)) => {
            Err(ConfigError::CompilerUnavailable(p))
        }
        Err(e) => Err(ConfigError::CompilerUnavailable(e.to_string())),
    }
}

/// Cache key over source content and the complete compile command, so a
/// flag or standard change recompiles even when the source is untouched.
pub(super) fn fingerprint(source_bytes: &[u8], program: &Path, args: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_bytes);
    hasher.update(program.display().to_string().as_bytes());
    for arg in args {
        hasher.update([0u8]);
        hasher.update(arg.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

pub(super) fn fingerprint_path(artifact_path: &Path) -> PathBuf {
    let mut name = artifact_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".fingerprint");
    artifact_path.with_file_name(name)
}

/// A hit requires both the artifact on disk and a matching fingerprint.
pub(super) async fn cache_hit(artifact_path: &Path, fp_path: &Path, fp: &str) -> bool {
    if !tokio::fs::try_exists(artifact_path).await.unwrap_or(false) {
        return false;
    }
    match tokio::fs::read_to_string(fp_path).await {
        Ok(stored) => stored.trim() == fp,
        Err(_) => false,
    }
}

pub(super) async fn store_fingerprint(fp_path: &Path, fp: &str) {
    if let Err(e) = tokio::fs::write(fp_path, fp).await {
        tracing::warn!(path = %fp_path.display(), error = %e, "failed to store compile fingerprint");
    }
}

pub(super) fn file_stem(source: &Path) -> Result<String, CompileError> {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| CompileError::Io {
            path: source.to_path_buf(),
            msg: "source path has no file name".into(),
        })
}

pub(super) fn map_runner_error(e: ProcessError, compiler: &Path) -> CompileError {
    match e {
        ProcessError::NotFound(_) | ProcessError::PermissionDenied(_) => {
            CompileError::CompilerNotFound {
                path: compiler.to_path_buf(),
            }
        }
        ProcessError::Cancelled => CompileError::Cancelled,
        other => CompileError::Io {
            path: compiler.to_path_buf(),
            msg: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactKind;
    use crate::process::{MockProcessRunner, ProcessOutput};
    use std::time::Duration;

    fn ok_output() -> ProcessOutput {
        ProcessOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::from_millis(120),
            timed_out: false,
            peak_memory_mb: None,
        }
    }

    fn cpp_config() -> LanguageConfig {
        LanguageConfig::defaults_for(Language::Cpp)
    }

    fn write_source(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn cpp_compile_produces_executable_artifact() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "test.cpp", "int main() { return 0; }");
        let artifact_path = ws.path().join("test");

        let mut runner = MockProcessRunner::new();
        let created = artifact_path.clone();
        runner.expect_run().times(1).returning(move |spec| {
            assert!(spec.args.iter().any(|a| a == "-std=c++17"));
            assert!(spec.args.iter().any(|a| a == "-O2"));
            std::fs::write(&created, b"\x7fELF").unwrap();
            Ok(ok_output())
        });

        let result = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.cached);
        match &result.artifact.unwrap().kind {
            ArtifactKind::Executable { path } => assert_eq!(path, &artifact_path),
            other => panic!("expected executable artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unchanged_source_hits_the_cache() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "test.cpp", "int main() { return 0; }");
        let artifact_path = ws.path().join("test");

        let mut runner = MockProcessRunner::new();
        let created = artifact_path.clone();
        // The compiler may be spawned exactly once across both calls.
        runner.expect_run().times(1).returning(move |_| {
            std::fs::write(&created, b"\x7fELF").unwrap();
            Ok(ok_output())
        });

        let first = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap();
        assert!(first.success);
        assert!(!first.cached);

        let second = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.cached);
    }

    #[tokio::test]
    async fn flag_change_invalidates_the_cache() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "test.cpp", "int main() { return 0; }");
        let artifact_path = ws.path().join("test");

        let mut runner = MockProcessRunner::new();
        let created = artifact_path.clone();
        runner.expect_run().times(2).returning(move |_| {
            std::fs::write(&created, b"\x7fELF").unwrap();
            Ok(ok_output())
        });

        let config = cpp_config();
        compile(&source, Language::Cpp, &config, ws.path(), &runner)
            .await
            .unwrap();

        let mut changed = config.clone();
        changed.optimization = Some("O3".into());
        let recompiled = compile(&source, Language::Cpp, &changed, ws.path(), &runner)
            .await
            .unwrap();
        assert!(!recompiled.cached);
    }

    #[tokio::test]
    async fn compiler_diagnostics_are_carried_verbatim() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "broken.cpp", "int main() { return 0 }");

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|_| {
            Ok(ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "broken.cpp:1:23: error: expected ';'".into(),
                elapsed: Duration::from_millis(80),
                timed_out: false,
                peak_memory_mb: None,
            })
        });

        let result = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.artifact.is_none());
        assert!(result.error.contains("expected ';'"));
    }

    #[tokio::test]
    async fn compilation_timeout_is_a_failure_not_a_crash() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "slow.cpp", "int main() {}");

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            Ok(ProcessOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                elapsed: spec.timeout,
                timed_out: true,
                peak_memory_mb: None,
            })
        });

        let result = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("timed out"));
    }

    #[tokio::test]
    async fn missing_compiler_is_an_infrastructure_error() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "test.cpp", "int main() {}");

        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Err(ProcessError::NotFound("g++".into())));

        let err = compile(&source, Language::Cpp, &cpp_config(), ws.path(), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::CompilerNotFound { .. }));
    }

    #[tokio::test]
    async fn java_class_name_mismatch_fails_without_invoking_javac() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "Main.java", "public class Solution {}\n");

        // No expectations: any spawn would panic the mock.
        let runner = MockProcessRunner::new();

        let result = compile(
            &source,
            Language::Java,
            &LanguageConfig::defaults_for(Language::Java),
            ws.path(),
            &runner,
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("Solution"));
        assert!(result.error.contains("Main"));
    }

    #[tokio::test]
    async fn java_compile_yields_class_artifact() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "Main.java", "public class Main {}\n");
        let class_file = ws.path().join("Main.class");

        let mut runner = MockProcessRunner::new();
        let created = class_file.clone();
        runner.expect_run().times(1).returning(move |spec| {
            assert!(spec.args.iter().any(|a| a == "-d"));
            std::fs::write(&created, b"\xca\xfe\xba\xbe").unwrap();
            Ok(ok_output())
        });

        let result = compile(
            &source,
            Language::Java,
            &LanguageConfig::defaults_for(Language::Java),
            ws.path(),
            &runner,
        )
        .await
        .unwrap();

        assert!(result.success);
        match &result.artifact.unwrap().kind {
            ArtifactKind::JavaClass {
                class_name,
                class_dir,
                ..
            } => {
                assert_eq!(class_name, "Main");
                assert_eq!(class_dir, ws.path());
            }
            other => panic!("expected java class artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn python_validation_uses_script_itself_as_artifact() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "gen.py", "print(1)\n");

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            assert!(spec.args.iter().any(|a| a == "py_compile"));
            Ok(ok_output())
        });

        let result = compile(
            &source,
            Language::Python,
            &LanguageConfig::defaults_for(Language::Python),
            ws.path(),
            &runner,
        )
        .await
        .unwrap();

        assert!(result.success);
        match &result.artifact.unwrap().kind {
            ArtifactKind::Script { path, .. } => assert_eq!(path, &source),
            other => panic!("expected script artifact, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn python_syntax_error_fails_validation() {
        let ws = tempfile::tempdir().unwrap();
        let source = write_source(ws.path(), "bad.py", "def f(:\n");

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|_| {
            Ok(ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "SyntaxError: invalid syntax".into(),
                elapsed: Duration::from_millis(40),
                timed_out: false,
                peak_memory_mb: None,
            })
        });

        let result = compile(
            &source,
            Language::Python,
            &LanguageConfig::defaults_for(Language::Python),
            ws.path(),
            &runner,
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn environment_probe_reports_missing_toolchain() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|_| Err(ProcessError::NotFound("g++".into())));

        let err = validate_environment(&cpp_config(), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::CompilerUnavailable(_)));
    }
}
