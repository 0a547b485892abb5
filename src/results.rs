//! Result aggregation: collects the stream of per-test results into the
//! summary record that gets persisted and reported at the end of a run.

use chrono::{DateTime, Utc};
use itertools::{EitherOrBoth, Itertools};
use serde::Serialize;

use crate::domain::{TestMode, TestResult};

/// The persisted record of one finished run. Field names follow the
/// history database schema.
#[derive(Clone, Debug, Serialize)]
pub struct TestSummary {
    pub test_type: &'static str,
    pub file_path: String,
    pub test_count: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    /// Sum of candidate wall times, in seconds. Under concurrency this
    /// exceeds the run's real elapsed time.
    pub total_time: f64,
    pub average_time: f64,
    pub max_memory: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub test_details: Vec<TestResult>,
    /// For comparison runs: where the first failing test first diverged.
    pub mismatch_analysis: Option<String>,
}

/// Abstracts the history store so the run loop does not depend on a
/// concrete database. Returns the new record id, or a value `<= 0` on
/// failure; a failed save is reported, never fatal.
#[mockall::automock]
pub trait ResultStore: Send + Sync {
    fn save(&self, summary: &TestSummary) -> i64;
}

/// Accumulates results as workers finish them. Order of arrival does not
/// matter; each result is recorded once.
#[derive(Debug)]
pub struct ResultAggregator {
    mode: TestMode,
    file_path: String,
    project_name: String,
    requested: u32,
    results: Vec<TestResult>,
}

impl ResultAggregator {
    pub fn new(
        mode: TestMode,
        file_path: impl Into<String>,
        project_name: impl Into<String>,
        requested: u32,
    ) -> Self {
        ResultAggregator {
            mode,
            file_path: file_path.into(),
            project_name: project_name.into(),
            requested,
            results: Vec::with_capacity(requested as usize),
        }
    }

    pub fn record(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn completed(&self) -> u32 {
        self.results.len() as u32
    }

    pub fn passed(&self) -> u32 {
        self.results.iter().filter(|r| r.passed).count() as u32
    }

    pub fn failed(&self) -> u32 {
        self.completed() - self.passed()
    }

    /// True only when every requested test ran and passed. A stopped run
    /// is not a passing run even if nothing failed before the stop.
    pub fn all_passed(&self) -> bool {
        self.failed() == 0 && self.completed() == self.requested
    }

    pub fn total_time(&self) -> f64 {
        self.results.iter().map(|r| r.execution_time).sum()
    }

    pub fn average_time(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.total_time() / self.results.len() as f64
        }
    }

    pub fn max_memory(&self) -> Option<f64> {
        self.results
            .iter()
            .filter_map(|r| r.memory_used)
            .fold(None, |acc, m| Some(acc.map_or(m, |a: f64| a.max(m))))
    }

    /// Finalizes into the persistable summary. Consumes the aggregator so
    /// nothing can be recorded after the summary exists.
    pub fn finish(mut self) -> TestSummary {
        self.results.sort_by_key(|r| r.test_number);
        let passed_tests = self.passed();
        let failed_tests = self.failed();
        let total_time = self.total_time();
        let average_time = self.average_time();
        let max_memory = self.max_memory();
        let mismatch_analysis = match self.mode {
            TestMode::Comparison => first_mismatch(&self.results),
            _ => None,
        };
        let test_count = self.completed();
        TestSummary {
            test_type: self.mode.tag(),
            file_path: self.file_path,
            test_count,
            passed_tests,
            failed_tests,
            total_time,
            average_time,
            max_memory,
            timestamp: Utc::now(),
            project_name: self.project_name,
            test_details: self.results,
            mismatch_analysis,
        }
    }
}

/// Pinpoints the first diverging line of the first failed comparison.
fn first_mismatch(results: &[TestResult]) -> Option<String> {
    let failed = results
        .iter()
        .find(|r| !r.passed && r.expected_output.is_some())?;
    let expected = failed.expected_output.as_deref()?;

    for (idx, pair) in expected
        .lines()
        .zip_longest(failed.actual_output.lines())
        .enumerate()
    {
        let line = idx + 1;
        match pair {
            EitherOrBoth::Both(e, a) if e == a => continue,
            EitherOrBoth::Both(e, a) => {
                return Some(format!(
                    "test {}: line {} differs: expected `{}`, got `{}`",
                    failed.test_number, line, e, a
                ));
            }
            EitherOrBoth::Left(e) => {
                return Some(format!(
                    "test {}: output ends early at line {}: expected `{}`",
                    failed.test_number, line, e
                ));
            }
            EitherOrBoth::Right(a) => {
                return Some(format!(
                    "test {}: extra output at line {}: `{}`",
                    failed.test_number, line, a
                ));
            }
        }
    }
    Some(format!(
        "test {}: outputs differ only in whitespace",
        failed.test_number
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageTimes;

    fn result(test_number: u32, passed: bool, time: f64) -> TestResult {
        TestResult {
            test_number,
            passed,
            input: "in".into(),
            expected_output: None,
            actual_output: "out".into(),
            execution_time: time,
            memory_used: None,
            error_message: (!passed).then(|| "failed".into()),
            stage_times: StageTimes::default(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn counts_track_recorded_results() {
        let mut agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 4);
        agg.record(result(2, true, 0.5));
        agg.record(result(1, true, 0.3));
        agg.record(result(4, false, 1.2));
        agg.record(result(3, true, 0.4));

        assert_eq!(agg.completed(), 4);
        assert_eq!(agg.passed(), 3);
        assert_eq!(agg.failed(), 1);
        assert!(!agg.all_passed());
        assert!((agg.total_time() - 2.4).abs() < 1e-9);
        assert!((agg.average_time() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn summary_counts_match_details() {
        let mut agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 3);
        agg.record(result(3, true, 0.1));
        agg.record(result(1, false, 0.2));
        agg.record(result(2, true, 0.3));

        let summary = agg.finish();
        assert_eq!(summary.test_type, "benchmark");
        assert_eq!(summary.test_count, 3);
        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.failed_tests, 1);
        assert_eq!(summary.test_details.len(), 3);
        // Details are sorted even though results arrived out of order.
        let numbers: Vec<u32> = summary.test_details.iter().map(|r| r.test_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn summary_max_memory_is_the_largest_sample() {
        let mut agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 3);
        let mut a = result(1, true, 0.1);
        a.memory_used = Some(4.0);
        let b = result(2, true, 0.1);
        let mut c = result(3, true, 0.1);
        c.memory_used = Some(17.5);
        agg.record(a);
        agg.record(b);
        agg.record(c);

        assert_eq!(agg.max_memory(), Some(17.5));
        assert_eq!(agg.finish().max_memory, Some(17.5));
    }

    #[test]
    fn max_memory_is_none_without_samples() {
        let mut agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 1);
        agg.record(result(1, true, 0.1));
        assert_eq!(agg.finish().max_memory, None);
    }

    #[test]
    fn incomplete_run_is_not_all_passed() {
        let mut agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 10);
        agg.record(result(1, true, 0.1));
        agg.record(result(2, true, 0.1));
        assert_eq!(agg.failed(), 0);
        assert!(!agg.all_passed());
    }

    #[test]
    fn empty_aggregator_has_zero_average() {
        let agg = ResultAggregator::new(TestMode::Benchmark, "test.cpp", "demo", 0);
        assert_eq!(agg.average_time(), 0.0);
        assert_eq!(agg.total_time(), 0.0);
    }

    #[test]
    fn mismatch_analysis_names_the_first_diverging_line() {
        let mut agg = ResultAggregator::new(TestMode::Comparison, "test.cpp", "demo", 2);
        agg.record(result(1, true, 0.1));
        let mut bad = result(2, false, 0.1);
        bad.expected_output = Some("1\n2\n3\n".into());
        bad.actual_output = "1\n5\n3\n".into();
        agg.record(bad);

        let analysis = agg.finish().mismatch_analysis.unwrap();
        assert!(analysis.contains("test 2"));
        assert!(analysis.contains("line 2"));
        assert!(analysis.contains('5'));
    }

    #[test]
    fn mismatch_analysis_reports_short_output() {
        let mut agg = ResultAggregator::new(TestMode::Comparison, "test.cpp", "demo", 1);
        let mut bad = result(1, false, 0.1);
        bad.expected_output = Some("a\nb\n".into());
        bad.actual_output = "a\n".into();
        agg.record(bad);

        let analysis = agg.finish().mismatch_analysis.unwrap();
        assert!(analysis.contains("ends early"));
    }

    #[test]
    fn non_comparison_modes_skip_mismatch_analysis() {
        let mut agg = ResultAggregator::new(TestMode::Validation, "test.cpp", "demo", 1);
        agg.record(result(1, false, 0.1));
        assert!(agg.finish().mismatch_analysis.is_none());
    }

    #[test]
    fn serialized_summary_uses_schema_field_names() {
        let mut agg = ResultAggregator::new(TestMode::Comparison, "sol.cpp", "demo", 1);
        agg.record(result(1, true, 0.2));
        let json = serde_json::to_value(agg.finish()).unwrap();

        assert_eq!(json["test_type"], "comparison");
        assert_eq!(json["passed_tests"], 1);
        assert_eq!(json["failed_tests"], 0);
        assert_eq!(json["project_name"], "demo");
        assert!(json["test_details"].is_array());
        assert!(json.get("timestamp").is_some());
        assert!((json["average_time"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    }
}
