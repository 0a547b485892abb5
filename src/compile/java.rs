use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use uuid::Uuid;

use crate::domain::{Artifact, ArtifactKind, CompilationResult, LanguageConfig};
use crate::error::CompileError;
use crate::process::{ProcessRunner, ProcessSpec};

use super::{cache_hit, file_stem, fingerprint, fingerprint_path, map_runner_error, store_fingerprint};

fn public_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)\bpublic\s+(?:final\s+|abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
            .expect("valid regex")
    })
}

/// Compile a Java source with `javac`. The public class name is checked
/// against the file's base name before the compiler is invoked; a mismatch
/// would fail anyway, but with a much worse diagnostic.
pub(super) async fn compile_java(
    source: &Path,
    config: &LanguageConfig,
    workspace: &Path,
    runner: &dyn ProcessRunner,
) -> Result<CompilationResult, CompileError> {
    let stem = file_stem(source)?;
    let text = tokio::fs::read_to_string(source)
        .await
        .map_err(|e| CompileError::Io {
            path: source.to_path_buf(),
            msg: e.to_string(),
        })?;

    if let Some(caps) = public_class_re().captures(&text) {
        let declared = &caps[1];
        if declared != stem {
            return Ok(CompilationResult::failed(
                format!(
                    "public class `{declared}` does not match file name `{stem}.java`; \
                     rename the class or the file"
                ),
                Duration::ZERO,
            ));
        }
    }

    let class_dir = workspace.to_path_buf();
    let class_file = class_dir.join(format!("{stem}.class"));

    let mut args: Vec<String> = config.flags.clone();
    args.push("-d".to_string());
    args.push(class_dir.display().to_string());
    args.push(source.display().to_string());

    let fp = fingerprint(text.as_bytes(), &config.compiler, &args);
    let fp_path = fingerprint_path(&class_file);

    if cache_hit(&class_file, &fp_path, &fp).await {
        tracing::debug!(source = %source.display(), "class file up to date, skipping compilation");
        return Ok(CompilationResult {
            success: true,
            artifact: Some(class_artifact(config, &class_dir, &stem)),
            output: format!("{stem}.class is up to date, skipping compilation"),
            error: String::new(),
            duration: Duration::ZERO,
            cached: true,
        });
    }

    tracing::debug!(source = %source.display(), "compiling with javac");
    let spec = ProcessSpec::new(&config.compiler, config.compile_timeout).args(args);
    let out = runner
        .run(spec)
        .await
        .map_err(|e| map_runner_error(e, &config.compiler))?;

    if out.timed_out {
        return Ok(CompilationResult::failed(
            format!(
                "compilation of {stem}.java timed out after {}s",
                config.compile_timeout.as_secs()
            ),
            out.elapsed,
        ));
    }
    if out.exit_code != 0 {
        let diag = if out.stderr.is_empty() { out.stdout } else { out.stderr };
        return Ok(CompilationResult::failed(diag, out.elapsed));
    }
    if !tokio::fs::try_exists(&class_file).await.unwrap_or(false) {
        return Ok(CompilationResult::failed(
            format!(
                "javac reported success but {} was not created",
                class_file.display()
            ),
            out.elapsed,
        ));
    }

    store_fingerprint(&fp_path, &fp).await;

    Ok(CompilationResult {
        success: true,
        artifact: Some(class_artifact(config, &class_dir, &stem)),
        output: format!("successfully compiled {stem}.java"),
        error: String::new(),
        duration: out.elapsed,
        cached: false,
    })
}

fn class_artifact(config: &LanguageConfig, class_dir: &Path, class_name: &str) -> Artifact {
    Artifact {
        id: Uuid::new_v4(),
        kind: ArtifactKind::JavaClass {
            runtime: config
                .runtime
                .clone()
                .unwrap_or_else(|| PathBuf::from("java")),
            class_dir: class_dir.to_path_buf(),
            class_name: class_name.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_public_class_name() {
        let caps = public_class_re()
            .captures("import java.util.*;\n\npublic class Main {\n}")
            .unwrap();
        assert_eq!(&caps[1], "Main");
    }

    #[test]
    fn matches_final_and_abstract_modifiers() {
        assert_eq!(
            &public_class_re()
                .captures("public final class Solver {}")
                .unwrap()[1],
            "Solver"
        );
        assert_eq!(
            &public_class_re()
                .captures("public abstract class Base {}")
                .unwrap()[1],
            "Base"
        );
    }

    #[test]
    fn ignores_non_public_classes() {
        assert!(public_class_re().captures("class Helper {}").is_none());
    }
}
