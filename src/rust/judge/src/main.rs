// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Entrypoint run inside the judge-stage container. Reads `IN`/`OUT`/`ANS`/
//! `CONF` and writes one `<test>.judge.json` per test named in
//! `CONF/problem_specification.json`, falling back to a scan of `*.out`
//! files under `ANS` when that specification is missing or unparsable.

use std::path::{Path, PathBuf};

use types::{CompilationRecord, ExecTelemetry, ProblemSpecification, TestSpecification};

fn env_path(name: &str) -> PathBuf {
    std::env::var(name)
        .unwrap_or_else(|_| panic!("required environment variable {name} is not set"))
        .into()
}

fn load_problem_specification(conf_dir: &Path, ans_dir: &Path) -> ProblemSpecification {
    let spec_path = conf_dir.join(workspace::PROBLEM_SPEC_FILENAME);
    match std::fs::read_to_string(&spec_path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(spec) => return spec,
            Err(e) => log::warn!("{} failed to parse ({e}), falling back to *.out scan", spec_path.display()),
        },
        Err(e) => log::warn!("could not read {} ({e}), falling back to *.out scan", spec_path.display()),
    }
    default_specification_from_answer_dir(ans_dir)
}

fn default_specification_from_answer_dir(ans_dir: &Path) -> ProblemSpecification {
    let mut names: Vec<String> = std::fs::read_dir(ans_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let path = e.path();
                    if path.extension().and_then(|ext| ext.to_str()) == Some("out") {
                        path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    names.sort_by(|a, b| types::natural_cmp(a, b));
    ProblemSpecification {
        id: "default_problem".to_string(),
        tests: names.into_iter().map(|n| TestSpecification::new(&n)).collect(),
    }
}

fn load_compilation_record(out_dir: &Path) -> Option<CompilationRecord> {
    let path = out_dir.join("comp.json");
    let contents = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn load_telemetry(out_dir: &Path, test_name: &str) -> Option<ExecTelemetry> {
    let path = out_dir.join(format!("{test_name}.exec.json"));
    let contents = std::fs::read_to_string(&path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn main() {
    env_logger::init();

    let in_dir = env_path("IN");
    let out_dir = env_path("OUT");
    let ans_dir = env_path("ANS");
    let conf_dir = env_path("CONF");

    let spec = load_problem_specification(&conf_dir, &ans_dir);
    let compilation = load_compilation_record(&out_dir);

    for test in &spec.tests {
        let telemetry = load_telemetry(&out_dir, &test.test_name).unwrap_or_else(|| {
            log::warn!("no telemetry found for test {}, treating as not run", test.test_name);
            ExecTelemetry::sentinel_not_run()
        });
        let captured_stdout = in_dir.join(format!("{}.stdout.out", test.test_name));
        let expected_answer = ans_dir.join(format!("{}.out", test.test_name));

        let verdict = judge::classify(
            compilation.as_ref(),
            test,
            &telemetry,
            &captured_stdout,
            &expected_answer,
        );

        let dest = out_dir.join(format!("{}.judge.json", test.test_name));
        match serde_json::to_string(&verdict) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&dest, contents) {
                    log::warn!("failed to write {}: {e}", dest.display());
                }
            }
            Err(e) => log::warn!("failed to serialize verdict for {}: {e}", test.test_name),
        }
    }
}
