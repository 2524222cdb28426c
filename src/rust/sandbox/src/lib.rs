// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Sandbox stage runner: builds a `bollard::container::Config` / `HostConfig`
//! (bind mounts, network disabled, resource caps), creates and starts the
//! container, waits on it with a wall-clock timeout, and always removes it
//! afterward regardless of outcome.

use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::service::{HostConfig, ResourcesUlimits};
use bollard::Docker;
use futures::StreamExt;
use log::{debug, warn};

/// Per-container process count cap.
pub const DEFAULT_PROCESS_LIMIT: i64 = 50;
/// Per-container open-file ulimit.
pub const DEFAULT_OPEN_FILES_SOFT: i64 = 1024;
pub const DEFAULT_OPEN_FILES_HARD: i64 = 4096;
/// Per-container file-size ulimit, 5 GiB.
pub const DEFAULT_FILE_SIZE_LIMIT_BYTES: i64 = 5 * 1024 * 1024 * 1024;

/// One of the three pipeline stages, used only to build a readable container
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Exec,
    Judge,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Exec => "exec",
            Stage::Judge => "judge",
        }
    }
}

/// A single host-path → container-path bind mount.
#[derive(Debug, Clone)]
pub struct Bind {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl Bind {
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>, read_only: bool) -> Self {
        Bind {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only,
        }
    }

    fn to_docker_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host_path, self.container_path, mode)
    }
}

/// Everything one `run` call needs for one container.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub stage: Stage,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub binds: Vec<Bind>,
    pub memory_limit_bytes: i64,
    pub wall_clock_timeout: Duration,
}

/// Result of running one stage container to completion or timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Exited { status_code: i64 },
    TimedOut,
}

/// Creates, starts, and waits on one stage container with network disabled,
/// `no-new-privileges`, and a memory cap, then removes it regardless of
/// outcome.
pub async fn run(docker: &Docker, config: &StageConfig) -> Result<StageOutcome, String> {
    let container_name = container_name(config.stage, &config.image);

    let env: Vec<String> = config
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let binds: Vec<String> = config.binds.iter().map(Bind::to_docker_string).collect();

    let container_config = Config {
        image: Some(config.image.clone()),
        env: Some(env),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            binds: Some(binds),
            memory: Some(config.memory_limit_bytes),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            auto_remove: Some(true),
            pids_limit: Some(DEFAULT_PROCESS_LIMIT),
            ulimits: Some(vec![
                ResourcesUlimits {
                    name: Some("fsize".to_string()),
                    soft: Some(DEFAULT_FILE_SIZE_LIMIT_BYTES),
                    hard: Some(DEFAULT_FILE_SIZE_LIMIT_BYTES),
                },
                ResourcesUlimits {
                    name: Some("nofile".to_string()),
                    soft: Some(DEFAULT_OPEN_FILES_SOFT),
                    hard: Some(DEFAULT_OPEN_FILES_HARD),
                },
            ]),
            ..HostConfig::default()
        }),
        ..Config::default()
    };

    debug!("creating container {container_name} for stage {:?} image {}", config.stage, config.image);
    let create_options = CreateContainerOptions {
        name: container_name.as_str(),
        platform: None,
    };
    let created = docker
        .create_container(Some(create_options), container_config)
        .await
        .map_err(|e| format!("Failed to create container {container_name}: {e}"))?;

    docker
        .start_container::<String>(&created.id, None)
        .await
        .map_err(|e| format!("Failed to start container {container_name}: {e}"))?;

    let wait_result = tokio::time::timeout(
        config.wall_clock_timeout,
        wait_for_exit(docker, &created.id),
    )
    .await;

    match wait_result {
        Ok(inner) => inner,
        Err(_) => {
            warn!("container {container_name} exceeded wall-clock timeout, killing it");
            if let Err(e) = docker.kill_container::<String>(&created.id, None).await {
                warn!("failed to kill timed-out container {container_name}: {e}");
            }
            cleanup_best_effort(docker, &created.id).await;
            Ok(StageOutcome::TimedOut)
        }
    }
}

async fn wait_for_exit(docker: &Docker, container_id: &str) -> Result<StageOutcome, String> {
    let mut stream = docker.wait_container(container_id, None::<WaitContainerOptions<String>>);
    match stream.next().await {
        Some(Ok(response)) => Ok(StageOutcome::Exited {
            status_code: response.status_code,
        }),
        Some(Err(e)) => Err(format!("container {container_id} wait failed: {e}")),
        None => Err(format!("container {container_id} wait stream ended with no result")),
    }
}

/// `auto_remove` already asks Docker to clean up on a normal exit; this is
/// only reached on the timeout/kill path, where a race between `kill` and
/// the auto-remove can leave the container behind.
async fn cleanup_best_effort(docker: &Docker, container_id: &str) {
    let _ = docker
        .remove_container(
            container_id,
            Some(RemoveContainerOptions {
                force: true,
                ..RemoveContainerOptions::default()
            }),
        )
        .await;
}

/// `judge-{stage}-{image-derived-tag}-{uuid}`, guaranteeing uniqueness even
/// under clock skew.
fn container_name(stage: Stage, image: &str) -> String {
    let image_tag: String = image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("judge-{}-{}-{}", stage.label(), image_tag, uuid::Uuid::new_v4())
}

/// Builds the compile stage's container config.
pub fn compile_stage(
    image: String,
    src_host_path: String,
    lib_host_path: String,
    bin_host_path: String,
    out_host_path: String,
    mainfile: String,
    memory_limit_bytes: i64,
    wall_clock_timeout: Duration,
) -> StageConfig {
    StageConfig {
        stage: Stage::Compile,
        image,
        env: vec![
            ("SRC".to_string(), "/data/src".to_string()),
            ("LIB".to_string(), "/data/lib".to_string()),
            ("OUT".to_string(), "/data/out".to_string()),
            ("BIN".to_string(), "/data/bin".to_string()),
            ("MAINFILE".to_string(), mainfile),
        ],
        binds: vec![
            Bind::new(src_host_path, "/data/src", true),
            Bind::new(lib_host_path, "/data/lib", true),
            Bind::new(bin_host_path, "/data/bin", false),
            Bind::new(out_host_path, "/data/out", false),
        ],
        memory_limit_bytes,
        wall_clock_timeout,
    }
}

/// Builds the exec stage's container config.
pub fn exec_stage(
    image: String,
    in_host_path: String,
    conf_host_path: String,
    bin_host_path: String,
    std_host_path: String,
    out_host_path: String,
    memory_limit_bytes: i64,
    wall_clock_timeout: Duration,
) -> StageConfig {
    StageConfig {
        stage: Stage::Exec,
        image,
        env: vec![
            ("IN".to_string(), "/data/in".to_string()),
            ("OUT".to_string(), "/data/out".to_string()),
            ("STD".to_string(), "/data/std".to_string()),
            ("BIN".to_string(), "/data/bin".to_string()),
            ("CONF".to_string(), "/data/conf".to_string()),
        ],
        binds: vec![
            Bind::new(in_host_path, "/data/in", true),
            Bind::new(conf_host_path, "/data/conf", true),
            Bind::new(bin_host_path, "/data/bin", true),
            Bind::new(std_host_path, "/data/std", false),
            Bind::new(out_host_path, "/data/out", false),
        ],
        memory_limit_bytes,
        wall_clock_timeout,
    }
}

/// Builds the judge stage's container config.
pub fn judge_stage(
    image: String,
    std_host_path: String,
    ans_host_path: String,
    conf_host_path: String,
    out_host_path: String,
    memory_limit_bytes: i64,
    wall_clock_timeout: Duration,
) -> StageConfig {
    StageConfig {
        stage: Stage::Judge,
        image,
        env: vec![
            ("IN".to_string(), "/data/in".to_string()),
            ("ANS".to_string(), "/data/ans".to_string()),
            ("OUT".to_string(), "/data/out".to_string()),
            ("CONF".to_string(), "/data/conf".to_string()),
        ],
        binds: vec![
            Bind::new(std_host_path, "/data/in", true),
            Bind::new(ans_host_path, "/data/ans", true),
            Bind::new(conf_host_path, "/data/conf", true),
            Bind::new(out_host_path, "/data/out", false),
        ],
        memory_limit_bytes,
        wall_clock_timeout,
    }
}
