use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{Artifact, ArtifactKind, CompilationResult, LanguageConfig};
use crate::error::CompileError;
use crate::process::{ProcessRunner, ProcessSpec};

use super::{cache_hit, file_stem, fingerprint, fingerprint_path, map_runner_error, store_fingerprint};

/// C and C++ share one flow: assemble flags from the config, invoke the
/// system compiler, and require both exit 0 and the artifact on disk.
pub(super) async fn compile_native(
    source: &Path,
    config: &LanguageConfig,
    workspace: &Path,
    runner: &dyn ProcessRunner,
) -> Result<CompilationResult, CompileError> {
    let stem = file_stem(source)?;
    let artifact_path = workspace.join(&stem);

    let mut args = Vec::new();
    if let Some(opt) = &config.optimization {
        args.push(format!("-{opt}"));
    }
    if let Some(std_version) = &config.std_version {
        args.push(format!("-std={std_version}"));
    }
    args.extend(config.flags.iter().cloned());
    args.push(source.display().to_string());
    args.push("-o".to_string());
    args.push(artifact_path.display().to_string());

    let source_bytes = tokio::fs::read(source).await.map_err(|e| CompileError::Io {
        path: source.to_path_buf(),
        msg: e.to_string(),
    })?;
    let fp = fingerprint(&source_bytes, &config.compiler, &args);
    let fp_path = fingerprint_path(&artifact_path);

    if cache_hit(&artifact_path, &fp_path, &fp).await {
        tracing::debug!(source = %source.display(), "artifact up to date, skipping compilation");
        return Ok(CompilationResult {
            success: true,
            artifact: Some(executable(&artifact_path)),
            output: format!("{stem} is up to date, skipping compilation"),
            error: String::new(),
            duration: Duration::ZERO,
            cached: true,
        });
    }

    tracing::debug!(source = %source.display(), compiler = %config.compiler.display(), "compiling");
    let spec = ProcessSpec::new(&config.compiler, config.compile_timeout).args(args);
    let out = runner
        .run(spec)
        .await
        .map_err(|e| map_runner_error(e, &config.compiler))?;

    if out.timed_out {
        return Ok(CompilationResult::failed(
            format!(
                "compilation of {stem} timed out after {}s",
                config.compile_timeout.as_secs()
            ),
            out.elapsed,
        ));
    }
    if out.exit_code != 0 {
        let diag = if out.stderr.is_empty() { out.stdout } else { out.stderr };
        return Ok(CompilationResult::failed(diag, out.elapsed));
    }
    if !tokio::fs::try_exists(&artifact_path).await.unwrap_or(false) {
        return Ok(CompilationResult::failed(
            format!(
                "compiler reported success but {} was not created",
                artifact_path.display()
            ),
            out.elapsed,
        ));
    }

    store_fingerprint(&fp_path, &fp).await;

    Ok(CompilationResult {
        success: true,
        artifact: Some(executable(&artifact_path)),
        output: format!("successfully compiled {stem}"),
        error: String::new(),
        duration: out.elapsed,
        cached: false,
    })
}

fn executable(path: &Path) -> Artifact {
    Artifact {
        id: Uuid::new_v4(),
        kind: ArtifactKind::Executable {
            path: path.to_path_buf(),
        },
    }
}
