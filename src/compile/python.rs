use std::path::Path;

use uuid::Uuid;

use crate::domain::{Artifact, ArtifactKind, CompilationResult, LanguageConfig};
use crate::error::CompileError;
use crate::process::{ProcessRunner, ProcessSpec};

use super::{file_stem, map_runner_error};

/// Python "compilation" is a syntax validation pass: parse the script
/// without executing it. The artifact is the validated script itself plus
/// the interpreter invocation. Validation is cheap, so there is no cache.
pub(super) async fn validate_script(
    source: &Path,
    config: &LanguageConfig,
    runner: &dyn ProcessRunner,
) -> Result<CompilationResult, CompileError> {
    let stem = file_stem(source)?;

    let spec = ProcessSpec::new(&config.compiler, config.compile_timeout)
        .arg("-m")
        .arg("py_compile")
        .arg(source.display().to_string());

    let out = runner
        .run(spec)
        .await
        .map_err(|e| map_runner_error(e, &config.compiler))?;

    if out.timed_out {
        return Ok(CompilationResult::failed(
            format!("syntax validation of {stem} timed out"),
            out.elapsed,
        ));
    }
    if out.exit_code != 0 {
        let diag = if out.stderr.is_empty() { out.stdout } else { out.stderr };
        return Ok(CompilationResult::failed(diag, out.elapsed));
    }

    Ok(CompilationResult {
        success: true,
        artifact: Some(Artifact {
            id: Uuid::new_v4(),
            kind: ArtifactKind::Script {
                interpreter: config.compiler.clone(),
                flags: config.flags.clone(),
                path: source.to_path_buf(),
            },
        }),
        output: format!("{stem} has no syntax errors"),
        error: String::new(),
        duration: out.elapsed,
        cached: false,
    })
}
