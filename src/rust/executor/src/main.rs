// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Entrypoint run inside the exec-stage container. Reads the standard
//! `BIN`/`IN`/`STD`/`OUT`/`CONF` env vars and runs every
//! test named by `CONF/problem_specification.json`, falling back to a scan
//! of `*.in` files under `IN` when that file is missing or unparsable.

use std::path::{Path, PathBuf};

fn env_path(name: &str) -> PathBuf {
    std::env::var(name)
        .unwrap_or_else(|_| panic!("required environment variable {name} is not set"))
        .into()
}

fn load_problem_specification(conf_dir: &Path, in_dir: &Path) -> types::ProblemSpecification {
    let spec_path = conf_dir.join(workspace::PROBLEM_SPEC_FILENAME);
    match std::fs::read_to_string(&spec_path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(spec) => return spec,
            Err(e) => log::warn!("{} failed to parse ({e}), falling back to *.in scan", spec_path.display()),
        },
        Err(e) => log::warn!("could not read {} ({e}), falling back to *.in scan", spec_path.display()),
    }
    script::default_specification_from_input_dir(in_dir, "unknown")
}

fn main() {
    env_logger::init();

    let bin_dir = env_path("BIN");
    let in_dir = env_path("IN");
    let std_dir = env_path("STD");
    let out_dir = env_path("OUT");
    let conf_dir = env_path("CONF");

    let spec = load_problem_specification(&conf_dir, &in_dir);
    log::info!("running {} test(s) for problem {}", spec.tests.len(), spec.id);

    let attempted = executor::run_all(&spec.tests, &bin_dir, &in_dir, &std_dir, &out_dir);
    log::info!("attempted {} test(s): {:?}", attempted.len(), attempted);
}
