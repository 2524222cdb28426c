// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Judge — classifies one test's outcome against a
//! compilation record, its execution telemetry, and the expected answer.
//! Compilation failure takes priority over every execution outcome, which
//! in turn takes priority over output comparison.

use std::path::Path;

use types::{CompilationRecord, ExecTelemetry, JudgeVerdict, TestSpecification};

/// Expected-answer files larger than this are refused outright.
pub const MAX_ANSWER_FILE_BYTES: u64 = 5 * 1024 * 1024;

const SIGSEGV: i32 = 11;

/// Classifies one test, given its compilation record (shared across all
/// tests of a submission), its telemetry, and the paths to the captured
/// stdout and the expected answer file.
pub fn classify(
    compilation: Option<&CompilationRecord>,
    test: &TestSpecification,
    telemetry: &ExecTelemetry,
    captured_stdout: &Path,
    expected_answer: &Path,
) -> JudgeVerdict {
    if let Some(record) = compilation {
        if !record.succeeded() {
            return JudgeVerdict::fail(format!(
                "compilation failed with return code {}",
                record.return_code
            ));
        }
    }

    if let Some(user_time) = telemetry.user_time_seconds {
        if user_time >= test.time_limit_seconds {
            return JudgeVerdict::fail("time limit exceeded");
        }
    }
    if let Some(peak_memory) = telemetry.peak_memory_bytes {
        if peak_memory >= test.total_memory_limit_bytes as f64 {
            return JudgeVerdict::fail("memory limit exceeded");
        }
    }
    if telemetry.return_code == -SIGSEGV {
        return JudgeVerdict::fail("segmentation fault");
    }
    if telemetry.return_code < 0 {
        return JudgeVerdict::fail(signal_name(-telemetry.return_code));
    }
    if telemetry.return_code > 0 {
        return JudgeVerdict::fail(format!("program exited with {}", telemetry.return_code));
    }

    compare_output(captured_stdout, expected_answer)
}

fn signal_name(signal: i32) -> String {
    match nix::sys::signal::Signal::try_from(signal) {
        Ok(sig) => format!("{sig:?}").to_lowercase(),
        Err(_) => format!("signal {signal}"),
    }
}

/// Line-by-line, trimmed-whitespace comparison of `actual` against
/// `expected`.
fn compare_output(actual: &Path, expected: &Path) -> JudgeVerdict {
    match std::fs::metadata(expected) {
        Ok(meta) if meta.len() > MAX_ANSWER_FILE_BYTES => {
            return JudgeVerdict::fail("answer file is too big");
        }
        Ok(_) => {}
        Err(e) => return JudgeVerdict::fail(format!("could not read expected answer: {e}")),
    }

    let actual_text = match std::fs::read_to_string(actual) {
        Ok(text) => text,
        Err(e) => return JudgeVerdict::fail(format!("could not read captured output: {e}")),
    };
    let expected_text = match std::fs::read_to_string(expected) {
        Ok(text) => text,
        Err(e) => return JudgeVerdict::fail(format!("could not read expected answer: {e}")),
    };

    let mut actual_lines = actual_text.lines();
    let mut expected_lines = expected_text.lines();
    let mut line_no = 0usize;

    loop {
        line_no += 1;
        match (expected_lines.next(), actual_lines.next()) {
            (Some(expected_line), Some(actual_line)) => {
                if expected_line.trim() != actual_line.trim() {
                    return JudgeVerdict::fail(format!("line {line_no} is not correct"));
                }
            }
            (Some(_), None) => {
                return JudgeVerdict::fail(format!("unexpected EOF in line {line_no}"));
            }
            (None, _) => {
                return JudgeVerdict::pass("ok");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn telemetry_ok() -> ExecTelemetry {
        ExecTelemetry::from_exit_code(0, 0.01, 1024)
    }

    #[test]
    fn compilation_failure_short_circuits_everything_else() {
        let test = TestSpecification::new("t1");
        let comp = CompilationRecord { return_code: 1 };
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(Some(&comp), &test, &telemetry_ok(), &tmp.path().join("a"), &tmp.path().join("b"));
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "compilation failed with return code 1");
    }

    #[test]
    fn time_limit_breach_is_tle() {
        let test = TestSpecification::new("t1");
        let telemetry = ExecTelemetry::from_exit_code(0, 2.5, 1024);
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(None, &test, &telemetry, &tmp.path().join("a"), &tmp.path().join("b"));
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "time limit exceeded");
    }

    #[test]
    fn memory_limit_breach_is_mle() {
        let test = TestSpecification::new("t1");
        let telemetry = ExecTelemetry::from_exit_code(0, 0.1, types::DEFAULT_MEMORY_LIMIT_BYTES * 2);
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(None, &test, &telemetry, &tmp.path().join("a"), &tmp.path().join("b"));
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "memory limit exceeded");
    }

    #[test]
    fn segfault_signal_is_reported_by_name() {
        let test = TestSpecification::new("t1");
        let telemetry = ExecTelemetry::from_signal(11, 0.1, 1024);
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(None, &test, &telemetry, &tmp.path().join("a"), &tmp.path().join("b"));
        assert_eq!(verdict.info, "segmentation fault");
    }

    #[test]
    fn other_signals_report_the_lowercase_signal_name() {
        let test = TestSpecification::new("t1");
        let telemetry = ExecTelemetry::from_signal(9, 0.1, 1024);
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(None, &test, &telemetry, &tmp.path().join("a"), &tmp.path().join("b"));
        assert_eq!(verdict.info, "sigkill");
    }

    #[test]
    fn nonzero_exit_reports_the_exit_code() {
        let test = TestSpecification::new("t1");
        let telemetry = ExecTelemetry::from_exit_code(7, 0.1, 1024);
        let tmp = tempfile::tempdir().unwrap();
        let verdict = classify(None, &test, &telemetry, &tmp.path().join("a"), &tmp.path().join("b"));
        assert_eq!(verdict.info, "program exited with 7");
    }

    #[test]
    fn matching_output_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let actual = tmp.path().join("actual.out");
        let expected = tmp.path().join("expected.out");
        fs::write(&actual, "1\n2 \n3\n").unwrap();
        fs::write(&expected, "1\n2\n3\n").unwrap();
        let test = TestSpecification::new("t1");
        let verdict = classify(None, &test, &telemetry_ok(), &actual, &expected);
        assert!(verdict.grade);
        assert_eq!(verdict.info, "ok");
    }

    #[test]
    fn a_differing_line_is_wrong_answer_with_its_line_number() {
        let tmp = tempfile::tempdir().unwrap();
        let actual = tmp.path().join("actual.out");
        let expected = tmp.path().join("expected.out");
        fs::write(&actual, "1\nWRONG\n3\n").unwrap();
        fs::write(&expected, "1\n2\n3\n").unwrap();
        let test = TestSpecification::new("t1");
        let verdict = classify(None, &test, &telemetry_ok(), &actual, &expected);
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "line 2 is not correct");
    }

    #[test]
    fn a_short_actual_output_is_unexpected_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let actual = tmp.path().join("actual.out");
        let expected = tmp.path().join("expected.out");
        fs::write(&actual, "1\n2\n").unwrap();
        fs::write(&expected, "1\n2\n3\n").unwrap();
        let test = TestSpecification::new("t1");
        let verdict = classify(None, &test, &telemetry_ok(), &actual, &expected);
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "unexpected EOF in line 3");
    }

    #[test]
    fn an_oversized_answer_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let actual = tmp.path().join("actual.out");
        let expected = tmp.path().join("expected.out");
        fs::write(&actual, "x").unwrap();
        fs::write(&expected, "x".repeat((MAX_ANSWER_FILE_BYTES + 1) as usize)).unwrap();
        let test = TestSpecification::new("t1");
        let verdict = classify(None, &test, &telemetry_ok(), &actual, &expected);
        assert!(!verdict.grade);
        assert_eq!(verdict.info, "answer file is too big");
    }
}
