// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Result aggregator.
//!
//! Scans `OUT` for `*.judge.json`, natural-sorts the test names, joins each
//! with its `*.exec.json`, and synthesizes a sentinel `TestResult` for
//! anything the upstream stages never produced.

use std::fs;
use std::path::Path;

use types::{ExecTelemetry, JudgeVerdict, SubmissionResult, TestResult};

/// Caps on the compilation-info and debug-log text embedded in a reported result.
pub const COMPILATION_INFO_MAX_BYTES: usize = 10 * 1024;
pub const DEBUG_MAX_BYTES: usize = 20 * 1024;

/// Builds the final `SubmissionResult` from the `out` directory's telemetry
/// and verdict files, for exactly the test names in `expected_tests` (the
/// problem specification's own list, so a test whose stages never ran still
/// gets a row instead of silently disappearing). `compilation_info_max_bytes`
/// caps `comp.txt` when it's embedded in the result (the worker wires this
/// through from `RESULT_COMPILATION_MAX_BYTES`; use
/// [`COMPILATION_INFO_MAX_BYTES`] for the default).
pub fn aggregate(out_dir: &Path, expected_tests: &[String], compilation_info_max_bytes: usize) -> SubmissionResult {
    let mut names: Vec<String> = expected_tests.to_vec();
    names.sort_by(|a, b| types::natural_cmp(a, b));

    let test_results: Vec<TestResult> = names
        .iter()
        .map(|name| join_test_result(out_dir, name))
        .collect();

    let mut result = SubmissionResult::new(test_results);
    result.compilation_info = read_compilation_info(out_dir, compilation_info_max_bytes);
    result
}

/// Reads `debug/worker.log` (already flushed by the caller) and attaches a
/// copy capped at `max_bytes` as `debug` (the worker wires this through from
/// `RESULT_DEBUG_MAX_BYTES`; use [`DEBUG_MAX_BYTES`] for the default). Kept
/// separate from `aggregate` since the log path isn't under `out_dir`.
pub fn attach_debug_log(mut result: SubmissionResult, log_path: &Path, include: bool, max_bytes: usize) -> SubmissionResult {
    if !include {
        return result;
    }
    match logging::read_submission_log(log_path) {
        Ok(text) => result.debug = Some(logging::head(&text, max_bytes)),
        Err(e) => log::warn!("could not attach debug log {}: {e}", log_path.display()),
    }
    result
}

fn join_test_result(out_dir: &Path, test_name: &str) -> TestResult {
    let judge_path = out_dir.join(format!("{test_name}.judge.json"));
    let exec_path = out_dir.join(format!("{test_name}.exec.json"));

    let verdict: Option<JudgeVerdict> = read_json(&judge_path);
    let telemetry: Option<ExecTelemetry> = read_json(&exec_path);

    match verdict {
        Some(verdict) => TestResult {
            test_name: test_name.to_string(),
            grade: verdict.grade,
            info: verdict.info,
            return_code: telemetry.map(|t| t.return_code),
            user_time_seconds: telemetry.and_then(|t| t.user_time_seconds),
            peak_memory_bytes: telemetry.and_then(|t| t.peak_memory_bytes),
        },
        None => {
            log::warn!("no judge verdict found for test {test_name}, synthesizing a failure");
            TestResult::missing(test_name)
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn read_compilation_info(out_dir: &Path, max_bytes: usize) -> Option<String> {
    let path = out_dir.join("comp.txt");
    fs::read_to_string(&path)
        .ok()
        .map(|text| logging::head(&text, max_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_json(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn joins_telemetry_and_verdict_for_a_complete_test() {
        let tmp = tempfile::tempdir().unwrap();
        write_json(&tmp.path().join("t1.exec.json"), r#"{"return_code":0,"signal":null,"user_time":0.2,"total_memory":1024.0}"#);
        write_json(&tmp.path().join("t1.judge.json"), r#"{"grade":true,"info":"ok"}"#);

        let result = aggregate(tmp.path(), &["t1".to_string()], COMPILATION_INFO_MAX_BYTES);
        assert_eq!(result.points, 1);
        assert_eq!(result.test_results[0].test_name, "t1");
        assert_eq!(result.test_results[0].user_time_seconds, Some(0.2));
    }

    #[test]
    fn missing_files_synthesize_a_failing_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let result = aggregate(tmp.path(), &["t1".to_string()], COMPILATION_INFO_MAX_BYTES);
        assert_eq!(result.points, 0);
        assert_eq!(result.test_results[0].info, "error while running test");
        assert!(result.test_results[0].return_code.is_none());
    }

    #[test]
    fn test_results_are_returned_in_natural_order() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["t10", "t2", "t1"] {
            write_json(&tmp.path().join(format!("{name}.exec.json")), r#"{"return_code":0,"signal":null,"user_time":0.1,"total_memory":100.0}"#);
            write_json(&tmp.path().join(format!("{name}.judge.json")), r#"{"grade":true,"info":"ok"}"#);
        }
        let result = aggregate(tmp.path(), &["t10".to_string(), "t2".to_string(), "t1".to_string()], COMPILATION_INFO_MAX_BYTES);
        let names: Vec<&str> = result.test_results.iter().map(|t| t.test_name.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2", "t10"]);
    }

    #[test]
    fn compilation_info_is_read_and_capped() {
        let tmp = tempfile::tempdir().unwrap();
        let long_log = "x".repeat(COMPILATION_INFO_MAX_BYTES + 100);
        fs::write(tmp.path().join("comp.txt"), &long_log).unwrap();
        let result = aggregate(tmp.path(), &[], COMPILATION_INFO_MAX_BYTES);
        assert!(result.compilation_info.unwrap().len() < long_log.len());
    }

    #[test]
    fn compilation_info_honors_a_caller_supplied_cap() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("comp.txt"), "x".repeat(200)).unwrap();
        let result = aggregate(tmp.path(), &[], 10);
        assert!(result.compilation_info.unwrap().starts_with(&"x".repeat(10)));
    }

    #[test]
    fn debug_log_honors_a_caller_supplied_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("worker.log");
        fs::write(&log_path, "y".repeat(200)).unwrap();
        let result = attach_debug_log(SubmissionResult::new(vec![]), &log_path, true, 10);
        assert!(result.debug.unwrap().starts_with(&"y".repeat(10)));
    }
}
