// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

// Domain data model shared across the worker's stages.
//
// These types are the cross-stage blackboard's wire format: `ExecTelemetry`
// and `JudgeVerdict` are what stage 2 and stage 3 containers write to
// `OUT/<test>.exec.json` / `OUT/<test>.judge.json`, and `ProblemSpecification`
// is what `workspace::persist_spec` writes to `CONF/problem_specification.json`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_LIMIT_SECONDS: f64 = 2.0;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_STACK_LIMIT_BYTES: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MAINFILE: &str = "main";

/// One student upload, as handed off by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub submission_id: String,
    pub compiler_image: String,
    pub mainfile: Option<String>,
    pub submitter_id: String,
    pub problem_id: String,
}

impl Submission {
    /// The worker fills `mainfile` in from the first entry of the submission
    /// archive during staging when the front end doesn't supply one
    ///. This fallback is the last resort for an archive
    /// that was empty or unreadable.
    pub fn mainfile(&self) -> &str {
        match &self.mainfile {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_MAINFILE,
        }
    }
}

/// Ordered list of tests for one problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSpecification {
    pub id: String,
    pub tests: Vec<TestSpecification>,
}

impl ProblemSpecification {
    pub fn empty(problem_id: impl Into<String>) -> Self {
        ProblemSpecification {
            id: problem_id.into(),
            tests: Vec::new(),
        }
    }

    /// Test names are unique and non-empty.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for test in &self.tests {
            if test.test_name.is_empty() {
                return Err("test name must not be empty".to_string());
            }
            if !seen.insert(&test.test_name) {
                return Err(format!("duplicate test name: {}", test.test_name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpecification {
    pub test_name: String,
    #[serde(default = "default_time_limit", rename = "time_limit")]
    pub time_limit_seconds: f64,
    #[serde(default = "default_memory_limit", rename = "total_memory_limit")]
    pub total_memory_limit_bytes: u64,
    #[serde(default, rename = "stack_size_limit", skip_serializing_if = "Option::is_none")]
    pub stack_limit_bytes: Option<u64>,
}

fn default_time_limit() -> f64 {
    DEFAULT_TIME_LIMIT_SECONDS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

impl TestSpecification {
    pub fn new(test_name: impl Into<String>) -> Self {
        TestSpecification {
            test_name: test_name.into(),
            time_limit_seconds: DEFAULT_TIME_LIMIT_SECONDS,
            total_memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            stack_limit_bytes: None,
        }
    }

    /// `0` or absent both mean "use the implementation default": a true zero-byte stack isn't
    /// something a real test would ask for, so we don't try to honor it.
    pub fn stack_limit_or_default(&self) -> u64 {
        match self.stack_limit_bytes {
            Some(bytes) if bytes > 0 => bytes,
            _ => DEFAULT_STACK_LIMIT_BYTES,
        }
    }
}

/// Per-test resource-accounting record written by the in-sandbox executor.
///
/// `return_code` is normalized: negative is `-signal_number`, zero is a clean
/// exit, positive is the program's own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecTelemetry {
    pub return_code: i32,
    pub signal: Option<i32>,
    #[serde(rename = "user_time")]
    pub user_time_seconds: Option<f64>,
    #[serde(rename = "total_memory")]
    pub peak_memory_bytes: Option<f64>,
}

impl ExecTelemetry {
    /// Sentinel telemetry for tests that could not be attempted at all
    /// (missing binary, missing input).
    pub fn sentinel_not_run() -> Self {
        ExecTelemetry {
            return_code: 1,
            signal: None,
            user_time_seconds: None,
            peak_memory_bytes: None,
        }
    }

    pub fn from_signal(signal: i32, user_time_seconds: f64, peak_memory_bytes: u64) -> Self {
        ExecTelemetry {
            return_code: -signal,
            signal: Some(signal),
            user_time_seconds: Some(user_time_seconds),
            peak_memory_bytes: Some(peak_memory_bytes as f64),
        }
    }

    pub fn from_exit_code(code: i32, user_time_seconds: f64, peak_memory_bytes: u64) -> Self {
        ExecTelemetry {
            return_code: code,
            signal: None,
            user_time_seconds: Some(user_time_seconds),
            peak_memory_bytes: Some(peak_memory_bytes as f64),
        }
    }
}

/// Per-test pass/fail verdict written by the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub grade: bool,
    pub info: String,
}

impl JudgeVerdict {
    pub fn pass(info: impl Into<String>) -> Self {
        JudgeVerdict { grade: true, info: info.into() }
    }

    pub fn fail(info: impl Into<String>) -> Self {
        JudgeVerdict { grade: false, info: info.into() }
    }
}

/// Compilation outcome, written by the compile stage to `OUT/comp.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompilationRecord {
    pub return_code: i32,
}

impl CompilationRecord {
    pub fn succeeded(&self) -> bool {
        self.return_code == 0
    }
}

/// One row of the final report: a `TestSpecification` joined with its
/// `ExecTelemetry` and `JudgeVerdict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub grade: bool,
    pub info: String,
    #[serde(rename = "ret_code", skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    pub user_time_seconds: Option<f64>,
    #[serde(rename = "memory", skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<f64>,
}

impl TestResult {
    /// Synthesized when a test's telemetry/verdict files are missing
    /// entirely.
    pub fn missing(test_name: impl Into<String>) -> Self {
        TestResult {
            test_name: test_name.into(),
            grade: false,
            info: "error while running test".to_string(),
            return_code: None,
            user_time_seconds: None,
            peak_memory_bytes: None,
        }
    }
}

/// The final payload reported back to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub points: usize,
    pub test_results: Vec<TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl SubmissionResult {
    pub fn new(mut test_results: Vec<TestResult>) -> Self {
        test_results.sort_by(|a, b| natural_cmp(&a.test_name, &b.test_name));
        let points = test_results.iter().filter(|t| t.grade).count();
        SubmissionResult {
            points,
            test_results,
            compilation_info: None,
            debug: None,
        }
    }

    /// A total failure still reports a result document.
    pub fn failure(debug: impl Into<String>) -> Self {
        SubmissionResult {
            points: 0,
            test_results: Vec::new(),
            compilation_info: None,
            debug: Some(debug.into()),
        }
    }
}

/// One run of `natural_key`'s alternating text/integer split.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalKeyPart {
    Text(String),
    Number(u64),
}

/// Splits a string into alternating runs of non-digit / ASCII-digit
/// characters so that `t2 < t10`. Matches the
/// ASCII-only splitting behavior of the original's `natsorted` call
/// rather than a locale- or Unicode-digit-aware split.
fn natural_key(s: &str) -> Vec<NaturalKeyPart> {
    let mut parts = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            // u64 is ample for test-name numeric runs; a longer run just
            // saturates rather than panicking on overflow.
            parts.push(NaturalKeyPart::Number(digits.parse().unwrap_or(u64::MAX)));
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_digit() {
                    text.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            parts.push(NaturalKeyPart::Text(text));
        }
    }
    parts
}

/// Natural-order comparator: `t2 < t10`, `a` < `a1`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainfile_defaults_when_absent() {
        let submission = Submission {
            submission_id: "s1".to_string(),
            compiler_image: "cpp17".to_string(),
            mainfile: None,
            submitter_id: "stu1".to_string(),
            problem_id: "p1".to_string(),
        };
        assert_eq!(submission.mainfile(), "main");
    }

    #[test]
    fn mainfile_honors_explicit_value() {
        let submission = Submission {
            submission_id: "s1".to_string(),
            compiler_image: "cpp17".to_string(),
            mainfile: Some("solution".to_string()),
            submitter_id: "stu1".to_string(),
            problem_id: "p1".to_string(),
        };
        assert_eq!(submission.mainfile(), "solution");
    }

    #[test]
    fn problem_spec_rejects_duplicate_names() {
        let spec = ProblemSpecification {
            id: "p1".to_string(),
            tests: vec![TestSpecification::new("a"), TestSpecification::new("a")],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn problem_spec_rejects_empty_names() {
        let spec = ProblemSpecification {
            id: "p1".to_string(),
            tests: vec![TestSpecification::new("")],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn natural_sort_orders_numeric_runs_as_integers() {
        let mut names = vec!["t10", "t2", "t1", "t11"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["t1", "t2", "t10", "t11"]);
    }

    #[test]
    fn natural_sort_is_stable_for_plain_text() {
        let mut names = vec!["b", "a", "c"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn stack_limit_zero_falls_back_to_default() {
        let mut test = TestSpecification::new("a");
        test.stack_limit_bytes = Some(0);
        assert_eq!(test.stack_limit_or_default(), DEFAULT_STACK_LIMIT_BYTES);
    }

    #[test]
    fn stack_limit_positive_is_honored() {
        let mut test = TestSpecification::new("a");
        test.stack_limit_bytes = Some(64 * 1024 * 1024);
        assert_eq!(test.stack_limit_or_default(), 64 * 1024 * 1024);
    }

    #[test]
    fn submission_result_computes_points_and_orders_tests() {
        let results = vec![
            TestResult { test_name: "t10".into(), grade: true, info: "ok".into(), return_code: Some(0), user_time_seconds: None, peak_memory_bytes: None },
            TestResult { test_name: "t2".into(), grade: false, info: "wa".into(), return_code: Some(0), user_time_seconds: None, peak_memory_bytes: None },
        ];
        let result = SubmissionResult::new(results);
        assert_eq!(result.points, 1);
        assert_eq!(result.test_results[0].test_name, "t2");
        assert_eq!(result.test_results[1].test_name, "t10");
    }

    #[test]
    fn exec_telemetry_round_trips_signal() {
        let telemetry = ExecTelemetry::from_signal(11, 0.05, 1024);
        let json = serde_json::to_string(&telemetry).unwrap();
        let parsed: ExecTelemetry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.return_code, -11);
        assert_eq!(parsed.signal, Some(11));
    }
}
