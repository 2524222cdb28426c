// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Process configuration, parsed once at
//! start-up from environment variables via `clap`'s `env` feature, the same
//! pattern `process_executor`'s `CommandSpec` uses for its `#[arg(long)]`
//! flags. Unlike per-submission errors, which are tolerated and reported,
//! a malformed environment is a boot-time panic: this is worker process
//! configuration, not untrusted submission input.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the front end.
    #[arg(long, env = "GUI_URL")]
    pub gui_url: String,

    /// Raw JSON object mapping queue name to compiler image tag, in
    /// declaration order. Parsed by
    /// [`parse_queue_compiler_dict`] rather than `clap`'s own value parser
    /// so that key order survives.
    #[arg(long, env = "QUEUE_COMPILER_DICT")]
    pub queue_compiler_dict: String,

    #[arg(long, env = "EXEC_IMAGE_NAME")]
    pub exec_image_name: String,

    #[arg(long, env = "JUDGE_IMAGE_NAME")]
    pub judge_image_name: String,

    #[arg(long, env = "WORKERS_DATA_LOCAL_PATH")]
    pub workers_data_local_path: PathBuf,

    #[arg(long, env = "WORKERS_DATA_HOST_PATH")]
    pub workers_data_host_path: PathBuf,

    /// Namespaces this worker's workspace root among others sharing a host
    /// mount.
    #[arg(long, env = "HOSTNAME")]
    pub hostname: String,

    #[arg(long, env = "IS_DEBUG_MODE_ENABLED", default_value_t = false)]
    pub debug_mode: bool,

    /// Sleep between poll iterations when the previous one found no work.
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 1.0)]
    pub poll_interval_seconds: f64,

    /// Wall-clock timeout passed to every `sandbox::run` call.
    #[arg(long, env = "CONTAINERS_TIMEOUT_SECONDS", default_value_t = 250)]
    pub containers_timeout_seconds: u64,

    #[arg(long, env = "COMPILE_IMAGE_MEMORY_MB", default_value_t = 512)]
    pub compile_image_memory_mb: i64,

    #[arg(long, env = "EXEC_IMAGE_MEMORY_MB", default_value_t = 512)]
    pub exec_image_memory_mb: i64,

    #[arg(long, env = "JUDGE_IMAGE_MEMORY_MB", default_value_t = 512)]
    pub judge_image_memory_mb: i64,

    /// Caps on the debug log and compilation info embedded in a reported result.
    #[arg(long, env = "RESULT_DEBUG_MAX_BYTES", default_value_t = 20 * 1024)]
    pub result_debug_max_bytes: usize,

    #[arg(long, env = "RESULT_COMPILATION_MAX_BYTES", default_value_t = 10 * 1024)]
    pub result_compilation_max_bytes: usize,
}

impl WorkerConfig {
    pub fn containers_timeout(&self) -> Duration {
        Duration::from_secs(self.containers_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds.max(0.0))
    }

    pub fn compile_image_memory_bytes(&self) -> i64 {
        self.compile_image_memory_mb * 1024 * 1024
    }

    pub fn exec_image_memory_bytes(&self) -> i64 {
        self.exec_image_memory_mb * 1024 * 1024
    }

    pub fn judge_image_memory_bytes(&self) -> i64 {
        self.judge_image_memory_mb * 1024 * 1024
    }

    pub fn queue_compiler_dict(&self) -> Result<Vec<(String, String)>, String> {
        parse_queue_compiler_dict(&self.queue_compiler_dict)
    }
}

/// Parses `QUEUE_COMPILER_DICT` as a JSON object of `queue name -> compiler
/// image tag`, preserving declaration order (`serde_json`'s `preserve_order`
/// feature backs `Value::Object` with an `IndexMap`-equivalent for exactly
/// this reason). The first queue to return a submission wins ties, so this
/// order is part of the contract, not incidental. Unknown (non-string) values are a hard error.
pub fn parse_queue_compiler_dict(raw: &str) -> Result<Vec<(String, String)>, String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("QUEUE_COMPILER_DICT is not valid JSON: {e}"))?;
    let serde_json::Value::Object(map) = value else {
        return Err("QUEUE_COMPILER_DICT must be a JSON object".to_string());
    };
    map.into_iter()
        .map(|(queue, image)| match image {
            serde_json::Value::String(image) => Ok((queue, image)),
            other => Err(format!(
                "QUEUE_COMPILER_DICT entry {queue:?} must be a string, got {other}"
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_compiler_dict_preserves_declaration_order() {
        let parsed = parse_queue_compiler_dict(r#"{"cpp":"cpp17","py":"python3","java":"java17"}"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("cpp".to_string(), "cpp17".to_string()),
                ("py".to_string(), "python3".to_string()),
                ("java".to_string(), "java17".to_string()),
            ]
        );
    }

    #[test]
    fn queue_compiler_dict_rejects_non_string_values() {
        assert!(parse_queue_compiler_dict(r#"{"cpp":17}"#).is_err());
    }

    #[test]
    fn queue_compiler_dict_rejects_a_non_object() {
        assert!(parse_queue_compiler_dict(r#"["cpp","cpp17"]"#).is_err());
    }

    #[test]
    fn queue_compiler_dict_rejects_malformed_json() {
        assert!(parse_queue_compiler_dict("{not json}").is_err());
    }
}
