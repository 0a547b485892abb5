use crate::domain::TestResult;

/// Severity of a compilation progress message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Info,
    Error,
}

/// Everything the core reports back to its caller while a run is in
/// flight. One typed channel replaces the cross-wired signal fan-out of
/// the original design; results stream as tests complete, not in
/// test-number order.
#[derive(Clone, Debug)]
pub enum RunEvent {
    CompilationOutput { text: String, kind: OutputKind },
    TestStarted { test_number: u32 },
    TestCompleted { result: TestResult },
    WorkerBusy { worker_id: usize, test_number: u32 },
    WorkerIdle { worker_id: usize },
    /// Terminal event. Emitted exactly once per run, whether the run
    /// finished naturally, failed to compile, or was stopped.
    AllTestsCompleted { all_passed: bool },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::AllTestsCompleted { .. })
    }
}
