// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Per-problem script parser.
//!
//! The wire format isn't specified beyond "newline-delimited `key value`
//! pairs naming test limits", so this picks one: a script is
//! a sequence of blocks, each opened by a `test <name>` line and followed by
//! zero or more `<key> <value>` lines that override that test's limits.
//! Blank lines and lines starting with `#` are ignored. Lines appearing
//! before the first `test` line are ignored rather than rejected, since a
//! leading comment block is common in hand-written problem scripts.
//!
//! Parse failure never propagates as an error: any line this
//! parser can't make sense of is skipped and the test it belongs to simply
//! keeps its defaults, and a script that is empty or entirely unparsable
//! degrades to the empty-but-valid spec built by [`empty_specification`].

use log::warn;
use types::{ProblemSpecification, TestSpecification};

const KEY_TIME_LIMIT: &str = "time_limit";
const KEY_MEMORY_LIMIT: &str = "total_memory_limit";
const KEY_STACK_LIMIT: &str = "stack_size_limit";

/// Parses `text` into a [`ProblemSpecification`] for `problem_id`. Never
/// fails: unparsable lines are skipped and logged, and a script with no
/// `test` lines at all yields [`empty_specification`].
pub fn parse_script(text: &str, problem_id: &str) -> ProblemSpecification {
    let mut tests: Vec<TestSpecification> = Vec::new();

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            warn!("script line {} has no key/value separator, skipping: {line:?}", line_no + 1);
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if key == "test" {
            if value.is_empty() {
                warn!("script line {} declares a test with an empty name, skipping", line_no + 1);
                continue;
            }
            tests.push(TestSpecification::new(value));
            continue;
        }

        let Some(current) = tests.last_mut() else {
            warn!(
                "script line {} sets {key:?} before any `test` line, skipping",
                line_no + 1
            );
            continue;
        };

        match key {
            KEY_TIME_LIMIT => match value.parse::<f64>() {
                Ok(v) if v > 0.0 => current.time_limit_seconds = v,
                _ => warn!("script line {} has an invalid time_limit {value:?}, keeping default", line_no + 1),
            },
            KEY_MEMORY_LIMIT => match value.parse::<u64>() {
                Ok(v) if v > 0 => current.total_memory_limit_bytes = v,
                _ => warn!("script line {} has an invalid total_memory_limit {value:?}, keeping default", line_no + 1),
            },
            KEY_STACK_LIMIT => match value.parse::<u64>() {
                Ok(v) => current.stack_limit_bytes = Some(v),
                Err(_) => warn!("script line {} has an invalid stack_size_limit {value:?}, keeping default", line_no + 1),
            },
            other => warn!("script line {} has an unknown key {other:?}, skipping", line_no + 1),
        }
    }

    if tests.is_empty() {
        warn!("script for problem {problem_id} produced no tests, degrading to an empty specification");
        return empty_specification(problem_id);
    }

    ProblemSpecification {
        id: problem_id.to_string(),
        tests,
    }
}

/// A valid but empty specification so the pipeline can still run end to end
/// and report zero points instead of aborting when a problem can't be staged.
pub fn empty_specification(problem_id: &str) -> ProblemSpecification {
    ProblemSpecification {
        id: problem_id.to_string(),
        tests: Vec::new(),
    }
}

/// Builds a specification by scanning `in_dir` for `<name>.in` files and
/// giving each one default limits, with no script at all to consult. This is
/// the fallback an exec stage falls back to when `problem_specification.json`
/// itself is missing or unparsable, producing the same `ProblemSpecification`
/// type this crate otherwise builds from script text.
pub fn default_specification_from_input_dir(
    in_dir: &std::path::Path,
    problem_id: &str,
) -> ProblemSpecification {
    let mut names: Vec<String> = match std::fs::read_dir(in_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("in") {
                    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                } else {
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!("failed to scan {} for *.in files: {e}", in_dir.display());
            Vec::new()
        }
    };
    names.sort_by(|a, b| types::natural_cmp(a, b));

    ProblemSpecification {
        id: problem_id.to_string(),
        tests: names.into_iter().map(|n| TestSpecification::new(&n)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_script() {
        let text = "\
test t1
time_limit 1.5
total_memory_limit 1048576
test t2
stack_size_limit 4096
";
        let spec = parse_script(text, "p1");
        assert_eq!(spec.id, "p1");
        assert_eq!(spec.tests.len(), 2);
        assert_eq!(spec.tests[0].test_name, "t1");
        assert_eq!(spec.tests[0].time_limit_seconds, 1.5);
        assert_eq!(spec.tests[0].total_memory_limit_bytes, 1_048_576);
        assert_eq!(spec.tests[1].test_name, "t2");
        assert_eq!(spec.tests[1].stack_limit_bytes, Some(4096));
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let text = "# a problem script\n\ntest only\n# trailing comment\ntime_limit 2\n";
        let spec = parse_script(text, "p2");
        assert_eq!(spec.tests.len(), 1);
        assert_eq!(spec.tests[0].time_limit_seconds, 2.0);
    }

    #[test]
    fn an_empty_script_degrades_to_an_empty_specification() {
        let spec = parse_script("", "p3");
        assert_eq!(spec, empty_specification("p3"));
    }

    #[test]
    fn a_script_with_only_junk_lines_degrades_to_an_empty_specification() {
        let spec = parse_script("time_limit 2\ntotal_memory_limit 100\n", "p4");
        assert_eq!(spec, empty_specification("p4"));
    }

    #[test]
    fn an_invalid_limit_value_is_skipped_and_default_kept() {
        let spec = parse_script("test t1\ntime_limit not-a-number\n", "p5");
        assert_eq!(spec.tests[0].time_limit_seconds, types::DEFAULT_TIME_LIMIT_SECONDS);
    }

    #[test]
    fn default_specification_from_input_dir_natural_sorts_test_names() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["t2.in", "t10.in", "t1.in", "notes.txt"] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        let spec = default_specification_from_input_dir(tmp.path(), "p6");
        let names: Vec<&str> = spec.tests.iter().map(|t| t.test_name.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2", "t10"]);
    }
}
