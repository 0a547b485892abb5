//! Per-test execution pipeline: generate an input, run the candidate on
//! it, then produce a verdict according to the test mode.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::{Artifact, StageTimes, TestMode, TestResult};
use crate::error::ProcessError;
use crate::process::{ProcessOutput, ProcessRunner, ProcessSpec};
use crate::resources::ResourceSession;

/// Generators are auxiliary programs; they get a fixed generous timeout
/// independent of the candidate's time limit.
const GENERATOR_TIMEOUT: Duration = Duration::from_secs(10);
const VALIDATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs and outputs kept on a [`TestResult`] are display snapshots, not
/// archives; anything longer is cut here.
const MAX_SNAPSHOT_CHARS: usize = 500;

/// Compiled artifacts by role. `candidate` is always present; the rest
/// depend on the test mode.
#[derive(Clone, Debug)]
pub struct ProgramSet {
    pub generator: Option<Artifact>,
    pub candidate: Artifact,
    pub reference: Option<Artifact>,
    pub validator: Option<Artifact>,
}

/// Runs single test cases end to end. One pipeline is shared by all
/// workers of a run; each `run_case` call is independent.
#[derive(Clone)]
pub struct TestPipeline {
    programs: ProgramSet,
    mode: TestMode,
    time_limit: Duration,
    runner: Arc<dyn ProcessRunner>,
    session: Arc<ResourceSession>,
}

impl TestPipeline {
    pub fn new(
        programs: ProgramSet,
        mode: TestMode,
        time_limit: Duration,
        runner: Arc<dyn ProcessRunner>,
        session: Arc<ResourceSession>,
    ) -> Self {
        TestPipeline {
            programs,
            mode,
            time_limit,
            runner,
            session,
        }
    }

    /// Executes one numbered test. Program misbehavior (crashes, timeouts,
    /// wrong output) comes back as a failed [`TestResult`]; only a stop
    /// request surfaces as `Err`, so abandoned tests never reach the
    /// aggregator.
    pub async fn run_case(&self, test_number: u32) -> Result<TestResult, ProcessError> {
        let mut stage_times = StageTimes::default();

        // Stage 1: input generation. The generator runs with no input and
        // its stdout becomes the test's input payload.
        let input = match &self.programs.generator {
            Some(generator) => {
                let spec = ProcessSpec::for_artifact(generator, "", GENERATOR_TIMEOUT);
                let out = match self.runner.run(spec).await {
                    Ok(out) => out,
                    Err(e) => return self.infra_failure(test_number, String::new(), stage_times, e),
                };
                stage_times.generator = out.elapsed_secs();
                if !out.success() {
                    return Ok(self.failed(
                        test_number,
                        String::new(),
                        String::new(),
                        stage_times,
                        0.0,
                        stage_error("generator", &out),
                    ));
                }
                out.stdout
            }
            None => String::new(),
        };

        // Stage 2: the candidate, under the run's time limit.
        let spec = ProcessSpec::for_artifact(&self.programs.candidate, input.clone(), self.time_limit);
        let candidate = match self.runner.run(spec).await {
            Ok(out) => out,
            Err(e) => return self.infra_failure(test_number, input, stage_times, e),
        };
        stage_times.candidate = candidate.elapsed_secs();
        let execution_time = candidate.elapsed_secs();

        if candidate.timed_out {
            let message = format!(
                "time limit exceeded ({:.2}s limit)",
                self.time_limit.as_secs_f64()
            );
            let mut result = self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                message,
            );
            result.memory_used = candidate.peak_memory_mb;
            return Ok(result);
        }
        if candidate.exit_code != 0 {
            let message = stage_error("candidate", &candidate);
            let mut result = self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                message,
            );
            result.memory_used = candidate.peak_memory_mb;
            return Ok(result);
        }

        // Stage 3: the verdict, which is what distinguishes the modes.
        match self.mode {
            TestMode::Benchmark => Ok(TestResult {
                test_number,
                passed: true,
                input: snapshot(&input),
                expected_output: None,
                actual_output: snapshot(&candidate.stdout),
                execution_time,
                memory_used: candidate.peak_memory_mb,
                error_message: None,
                stage_times,
                timestamp: Utc::now(),
            }),
            TestMode::Comparison => {
                self.compare(test_number, input, candidate, stage_times).await
            }
            TestMode::Validation => {
                self.validate(test_number, input, candidate, stage_times).await
            }
        }
    }

    async fn compare(
        &self,
        test_number: u32,
        input: String,
        candidate: ProcessOutput,
        mut stage_times: StageTimes,
    ) -> Result<TestResult, ProcessError> {
        let execution_time = candidate.elapsed_secs();
        let Some(reference) = &self.programs.reference else {
            return Ok(self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                "no reference solution for comparison".to_string(),
            ));
        };

        let spec = ProcessSpec::for_artifact(reference, input.clone(), self.time_limit);
        let expected = match self.runner.run(spec).await {
            Ok(out) => out,
            Err(e) => return self.infra_failure(test_number, input, stage_times, e),
        };
        stage_times.verdict = expected.elapsed_secs();

        if !expected.success() {
            return Ok(self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                stage_error("reference", &expected),
            ));
        }

        let passed = candidate.stdout.trim_end() == expected.stdout.trim_end();
        Ok(TestResult {
            test_number,
            passed,
            input: snapshot(&input),
            expected_output: Some(snapshot(&expected.stdout)),
            actual_output: snapshot(&candidate.stdout),
            execution_time,
            memory_used: candidate.peak_memory_mb,
            error_message: (!passed).then(|| "output differs from reference".to_string()),
            stage_times,
            timestamp: Utc::now(),
        })
    }

    async fn validate(
        &self,
        test_number: u32,
        input: String,
        candidate: ProcessOutput,
        mut stage_times: StageTimes,
    ) -> Result<TestResult, ProcessError> {
        let execution_time = candidate.elapsed_secs();
        let Some(validator) = &self.programs.validator else {
            return Ok(self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                "no validator program".to_string(),
            ));
        };

        // Validators take the input and the candidate's output as file
        // arguments, not on stdin.
        let input_path = self.session.temp_file("input");
        let output_path = self.session.temp_file("output");
        if let Err(e) = tokio::fs::write(&input_path, &input).await {
            return Ok(self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                format!("failed to stage validator input: {e}"),
            ));
        }
        if let Err(e) = tokio::fs::write(&output_path, &candidate.stdout).await {
            return Ok(self.failed(
                test_number,
                input,
                snapshot(&candidate.stdout),
                stage_times,
                execution_time,
                format!("failed to stage validator output: {e}"),
            ));
        }

        let spec = ProcessSpec::for_artifact(validator, "", VALIDATOR_TIMEOUT)
            .arg(input_path.display().to_string())
            .arg(output_path.display().to_string());
        let verdict = match self.runner.run(spec).await {
            Ok(out) => out,
            Err(e) => return self.infra_failure(test_number, input, stage_times, e),
        };
        stage_times.verdict = verdict.elapsed_secs();

        let error_message = if verdict.timed_out {
            Some("validator timed out".to_string())
        } else {
            match verdict.exit_code {
                0 => None,
                1 => Some(with_detail("wrong answer", &verdict)),
                2 => Some(with_detail("presentation error", &verdict)),
                code => Some(with_detail(&format!("validator error (exit {code})"), &verdict)),
            }
        };

        Ok(TestResult {
            test_number,
            passed: error_message.is_none(),
            input: snapshot(&input),
            expected_output: None,
            actual_output: snapshot(&candidate.stdout),
            execution_time,
            memory_used: candidate.peak_memory_mb,
            error_message,
            stage_times,
            timestamp: Utc::now(),
        })
    }

    fn failed(
        &self,
        test_number: u32,
        input: String,
        actual_output: String,
        stage_times: StageTimes,
        execution_time: f64,
        error_message: String,
    ) -> TestResult {
        TestResult {
            test_number,
            passed: false,
            input: snapshot(&input),
            expected_output: None,
            actual_output,
            execution_time,
            memory_used: None,
            error_message: Some(error_message),
            stage_times,
            timestamp: Utc::now(),
        }
    }

    /// A spawn-level failure still keeps whatever input was already
    /// generated, so the user can reproduce the case.
    fn infra_failure(
        &self,
        test_number: u32,
        input: String,
        stage_times: StageTimes,
        e: ProcessError,
    ) -> Result<TestResult, ProcessError> {
        match e {
            ProcessError::Cancelled => Err(ProcessError::Cancelled),
            other => Ok(self.failed(
                test_number,
                input,
                String::new(),
                stage_times,
                0.0,
                other.to_string(),
            )),
        }
    }
}

fn stage_error(stage: &str, out: &ProcessOutput) -> String {
    if out.timed_out {
        return format!("{stage} timed out");
    }
    let detail = if out.stderr.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", snapshot(out.stderr.trim()))
    };
    format!("{stage} exited with code {}{detail}", out.exit_code)
}

fn with_detail(verdict: &str, out: &ProcessOutput) -> String {
    let msg = if out.stderr.trim().is_empty() {
        out.stdout.trim()
    } else {
        out.stderr.trim()
    };
    if msg.is_empty() {
        verdict.to_string()
    } else {
        format!("{verdict}: {}", snapshot(msg))
    }
}

/// Bounded copy of program output for display and persistence.
fn snapshot(text: &str) -> String {
    if text.chars().count() <= MAX_SNAPSHOT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_SNAPSHOT_CHARS).collect();
    format!("{cut}... (truncated)")
}
