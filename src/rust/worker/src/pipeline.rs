// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The worker control loop: poll -> fetch -> stage -> run
//! the three sandbox stages -> aggregate -> report, with every stage wrapped
//! so a single bad submission can never abort the loop. Each of the three
//! sandbox stages runs via `sandbox::run`, driven by
//! `sandbox::{compile,exec,judge}_stage`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::Docker;
use log::{debug, error, info, warn};
use types::{ProblemSpecification, Submission};

use crate::config::WorkerConfig;
use crate::submission::{classify_problem_file, extract_submission_archive, ProblemFileKind};

const SUBMISSION_ARCHIVE_FILENAME: &str = "_submission.zip";
const SCRIPT_SCRATCH_FILENAME: &str = "_script.txt";

pub struct Worker {
    config: WorkerConfig,
    frontend: frontend::FrontendClient,
    docker: Docker,
    queue_compiler_dict: Vec<(String, String)>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self, String> {
        let queue_compiler_dict = config.queue_compiler_dict()?;
        let frontend = frontend::FrontendClient::new(
            config.gui_url.clone(),
            frontend::Timeout {
                connect: Duration::from_secs(5),
                read: Duration::from_secs(15),
            },
        )?;
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| format!("Failed to connect to the Docker daemon: {e}"))?;
        Ok(Worker {
            config,
            frontend,
            docker,
            queue_compiler_dict,
        })
    }

    /// Local (worker-visible) workspace root, `<WORKERS_DATA_LOCAL_PATH>/<HOSTNAME>`.
    pub fn local_root(&self) -> PathBuf {
        workspace::root_for(&self.config.workers_data_local_path, &self.config.hostname)
    }

    /// Host-visible workspace root, used for container bind mounts
    ///.
    pub fn host_root(&self) -> PathBuf {
        workspace::root_for(&self.config.workers_data_host_path, &self.config.hostname)
    }

    /// Runs one iteration of the poll/fetch/stage/run/report state machine.
    /// Returns `should_wait`: `true` means sleep `POLL_INTERVAL_SECONDS`
    /// before the next call, `false` means loop back immediately.
    pub async fn process_once(&self) -> bool {
        let root = self.local_root();

        if let Err(e) = workspace::init(&root) {
            error!("Error while initializing workspace: {e}");
            return true;
        }
        let log_path = root.join("logs").join("worker.log");
        if let Err(e) = logging::start_submission_log(&log_path) {
            warn!("Error while starting submission log: {e}");
        }

        let submission = match self.fetch_submission(&root).await {
            Ok(Some(submission)) => submission,
            Ok(None) => return true,
            Err(e) => {
                error!("Error while fetching submission: {e}");
                return true;
            }
        };
        info!("running submission {}", submission.submission_id);

        let mut had_stage_failure = false;

        let spec = match self.stage_problem(&root, &submission.problem_id).await {
            Ok(spec) => spec,
            Err(e) => {
                warn!(
                    "Error while staging problem {}: {e}; degrading to an empty specification",
                    submission.problem_id
                );
                had_stage_failure = true;
                script::empty_specification(&submission.problem_id)
            }
        };

        if let Err(e) = workspace::persist_spec(&spec, &root) {
            warn!("Error while saving problem specification: {e}");
        }

        if let Err(e) = self.run_stages(&submission, &spec).await {
            warn!("Error while running sandbox stages: {e}");
            had_stage_failure = true;
        }

        let test_names: Vec<String> = spec.tests.iter().map(|t| t.test_name.clone()).collect();
        let mut result = aggregate::aggregate(
            &root.join("out"),
            &test_names,
            self.config.result_compilation_max_bytes,
        );
        result = aggregate::attach_debug_log(
            result,
            &log_path,
            self.config.debug_mode,
            self.config.result_debug_max_bytes,
        );

        self.report(&submission.submission_id, &result).await;

        if self.config.debug_mode {
            if let Err(e) = workspace::archive(&root) {
                error!("Error while archiving workspace: {e}");
                return true;
            }
        }

        had_stage_failure
    }

    /// FETCHING: tries each configured queue in declaration order; the
    /// first one to hand back a submission wins. A 404 or transient error
    /// on one queue moves on to the next rather than failing the whole
    /// iteration.
    async fn fetch_submission(&self, root: &Path) -> Result<Option<Submission>, String> {
        let archive_path = root.join(SUBMISSION_ARCHIVE_FILENAME);
        let src_dir = root.join("src");

        for (queue_name, compiler_image) in &self.queue_compiler_dict {
            let header = match self.frontend.get_submission(queue_name, &archive_path).await {
                Ok(Some(header)) => header,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Error while polling queue {queue_name}: {e}");
                    continue;
                }
            };

            let mainfile = match extract_submission_archive(&archive_path, &src_dir) {
                Ok(mainfile) => mainfile,
                Err(e) => {
                    warn!("Error while extracting submission archive: {e}");
                    None
                }
            };

            return Ok(Some(Submission {
                submission_id: header.submission_id,
                compiler_image: compiler_image.clone(),
                mainfile,
                submitter_id: header.student_id,
                problem_id: header.problem_id,
            }));
        }
        Ok(None)
    }

    /// STAGED: downloads every file `list_problem_files` names, sorting
    /// each into `tests/` (`.in`/`.out`), a scratch script path, or `lib/`
    /// (everything else), then parses the script into a specification.
    async fn stage_problem(&self, root: &Path, problem_id: &str) -> Result<ProblemSpecification, String> {
        let file_names = self.frontend.list_problem_files(problem_id).await?;

        let tests_dir = root.join("tests");
        let lib_dir = root.join("lib");
        let script_path = root.join(SCRIPT_SCRATCH_FILENAME);
        let mut saw_script = false;

        for file_name in &file_names {
            let destination = match classify_problem_file(file_name) {
                ProblemFileKind::TestData => tests_dir.join(file_name),
                ProblemFileKind::Script => {
                    saw_script = true;
                    script_path.clone()
                }
                ProblemFileKind::Library => lib_dir.join(file_name),
            };
            if let Err(e) = self.frontend.get_file(file_name, problem_id, &destination).await {
                warn!("Error while fetching problem file {file_name}: {e}");
            }
        }

        if !saw_script {
            debug!("problem {problem_id} has no script.txt, degrading to an empty specification");
            return Ok(script::empty_specification(problem_id));
        }

        let script_text = tokio::fs::read_to_string(&script_path)
            .await
            .map_err(|e| format!("Failed to read downloaded script {}: {e}", script_path.display()))?;
        Ok(script::parse_script(&script_text, problem_id))
    }

    /// COMPILING -> EXECUTING -> JUDGING: runs the three stage containers
    /// in sequence. Each stage's own failure is logged and tolerated —
    /// the next stage still runs, and missing artifacts become sentinel
    /// telemetry downstream.
    async fn run_stages(&self, submission: &Submission, spec: &ProblemSpecification) -> Result<(), String> {
        let host_root = self.host_root();
        let timeout = self.config.containers_timeout();
        let mut any_error = None;

        let compile_config = sandbox::compile_stage(
            submission.compiler_image.clone(),
            path_str(&host_root.join("src")),
            path_str(&host_root.join("lib")),
            path_str(&host_root.join("bin")),
            path_str(&host_root.join("out")),
            submission.mainfile().to_string(),
            self.config.compile_image_memory_bytes(),
            timeout,
        );
        if let Err(e) = sandbox::run(&self.docker, &compile_config).await {
            warn!("compile stage failed: {e}");
            any_error.get_or_insert(e);
        }

        let exec_config = sandbox::exec_stage(
            self.config.exec_image_name.clone(),
            path_str(&host_root.join("tests")),
            path_str(&host_root.join("conf")),
            path_str(&host_root.join("bin")),
            path_str(&host_root.join("std")),
            path_str(&host_root.join("out")),
            self.config.exec_image_memory_bytes(),
            timeout,
        );
        if let Err(e) = sandbox::run(&self.docker, &exec_config).await {
            warn!("exec stage failed: {e}");
            any_error.get_or_insert(e);
        }

        let judge_config = sandbox::judge_stage(
            self.config.judge_image_name.clone(),
            path_str(&host_root.join("std")),
            path_str(&host_root.join("tests")),
            path_str(&host_root.join("conf")),
            path_str(&host_root.join("out")),
            self.config.judge_image_memory_bytes(),
            timeout,
        );
        if let Err(e) = sandbox::run(&self.docker, &judge_config).await {
            warn!("judge stage failed: {e}");
            any_error.get_or_insert(e);
        }

        debug!("ran {} test(s) for submission {}", spec.tests.len(), submission.submission_id);
        match any_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// REPORTING: always attempted, even with a partial result.
    async fn report(&self, submission_id: &str, result: &types::SubmissionResult) {
        let result_json = match serde_json::to_string(result) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize result for submission {submission_id}: {e}");
                return;
            }
        };
        let info = result
            .compilation_info
            .clone()
            .unwrap_or_default();
        let debug_text = result.debug.clone().unwrap_or_default();

        match self.frontend.post_result(submission_id, &result_json, &info, &debug_text).await {
            Ok(message) => info!("reported result for submission {submission_id}: {message}"),
            Err(e) => error!("Error while reporting result for submission {submission_id}: {e}"),
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
