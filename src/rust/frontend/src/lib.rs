// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Front-end HTTP API client: a long-lived `reqwest::Client` backing a
//! size-capped, chunked streaming download loop, plus the exact endpoints,
//! query parameters, and header contract the front end expects.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use log::debug;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

/// Size cap on any single downloaded file.
pub const MAX_DOWNLOAD_BYTES: u64 = 1024 * 1024 * 1024;

const CHUNK_LOG_INTERVAL_BYTES: u64 = 64 * 1024 * 1024;

/// What `get_submission` returns for a non-empty queue: the response headers
/// identifying whose submission was just streamed to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionHeader {
    pub submission_id: String,
    pub problem_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    pub connect: Duration,
    pub read: Duration,
}

pub struct FrontendClient {
    client: Client,
    base_url: String,
}

impl FrontendClient {
    pub fn new(base_url: impl Into<String>, timeout: Timeout) -> Result<Self, String> {
        let client = Client::builder()
            .connect_timeout(timeout.connect)
            .timeout(timeout.read)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        Ok(FrontendClient {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// `GET {base}/qapi/qctrl.php?f=get&name=<queue>`. 404 means the queue is
    /// empty and is not an error. The archive is streamed to `destination`.
    pub async fn get_submission(
        &self,
        queue_name: &str,
        destination: &Path,
    ) -> Result<Option<SubmissionHeader>, String> {
        let response = self
            .client
            .get(self.url("qapi/qctrl.php"))
            .query(&[("f", "get"), ("name", queue_name)])
            .send()
            .await
            .map_err(|e| format!("Failed to request submission from queue {queue_name}: {e}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| format!("Queue {queue_name} returned an error status: {e}"))?;

        let submission_id = header_value(&response, "X-Server-Id")
            .ok_or_else(|| "missing X-Server-Id header".to_string())?;
        let x_param = header_value(&response, "X-Param")
            .ok_or_else(|| "missing X-Param header".to_string())?;
        let (problem_id, student_id) = parse_x_param(&x_param)?;

        stream_to_file(response, destination).await?;

        Ok(Some(SubmissionHeader {
            submission_id,
            problem_id,
            student_id,
        }))
    }

    /// `GET {base}/fsapi/fsctrl.php?f=list&area=0&pid=<problem_id>`. One
    /// `name[:meta]` per line; the `:meta` suffix is stripped.
    pub async fn list_problem_files(&self, problem_id: &str) -> Result<Vec<String>, String> {
        let response = self
            .client
            .get(self.url("fsapi/fsctrl.php"))
            .query(&[("f", "list"), ("area", "0"), ("pid", problem_id)])
            .send()
            .await
            .map_err(|e| format!("Failed to list files for problem {problem_id}: {e}"))?
            .error_for_status()
            .map_err(|e| format!("Problem file listing for {problem_id} returned an error status: {e}"))?;

        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read problem file listing body: {e}"))?;

        Ok(body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(':').next().unwrap_or(line).trim().to_string())
            .collect())
    }

    /// `GET {base}/fsapi/fsctrl.php?f=get&area=0&pid=<problem_id>&name=<file>`.
    pub async fn get_file(
        &self,
        file_name: &str,
        problem_id: &str,
        destination: &Path,
    ) -> Result<(), String> {
        let response = self
            .client
            .get(self.url("fsapi/fsctrl.php"))
            .query(&[("f", "get"), ("area", "0"), ("pid", problem_id), ("name", file_name)])
            .send()
            .await
            .map_err(|e| format!("Failed to fetch {file_name} for problem {problem_id}: {e}"))?
            .error_for_status()
            .map_err(|e| format!("Fetching {file_name} for problem {problem_id} returned an error status: {e}"))?;

        stream_to_file(response, destination).await
    }

    /// `POST {base}/io-result.php`, multipart with a plain `id` field and
    /// three text-file parts. Returns the raw server response body.
    pub async fn post_result(
        &self,
        submission_id: &str,
        result: &str,
        info: &str,
        debug: &str,
    ) -> Result<String, String> {
        let form = reqwest::multipart::Form::new()
            .text("id", submission_id.to_string())
            .part("result", text_part("result.txt", result))
            .part("info", text_part("info.txt", info))
            .part("debug", text_part("debug.txt", debug));

        let response = self
            .client
            .post(self.url("io-result.php"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("Failed to post result for submission {submission_id}: {e}"))?
            .error_for_status()
            .map_err(|e| format!("Posting result for submission {submission_id} returned an error status: {e}"))?;

        response
            .text()
            .await
            .map_err(|e| format!("Failed to read post_result response body: {e}"))
    }

    /// `POST {base}/qapi/qctrl.php?f=notify&id=<sid>` with form `{id, info}`.
    /// Not called anywhere in the main pipeline — exposed here for a caller
    /// that wants to push an interim status update.
    pub async fn notify(&self, submission_id: &str, info: &str) -> Result<(), String> {
        self.client
            .post(self.url("qapi/qctrl.php"))
            .query(&[("f", "notify"), ("id", submission_id)])
            .form(&[("id", submission_id), ("info", info)])
            .send()
            .await
            .map_err(|e| format!("Failed to notify for submission {submission_id}: {e}"))?
            .error_for_status()
            .map_err(|e| format!("Notify for submission {submission_id} returned an error status: {e}"))?;
        Ok(())
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Splits an `X-Param` header into `(problem_id, student_id)`. Requires
/// exactly two `;`-separated parts and hard-errors otherwise — no tolerance
/// for extra separators.
pub fn parse_x_param(x_param: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = x_param.split(';').collect();
    match parts.as_slice() {
        [problem_id, student_id] => Ok((problem_id.to_string(), student_id.to_string())),
        _ => Err(format!("invalid X-Param header format: {x_param:?}")),
    }
}

async fn stream_to_file(response: reqwest::Response, destination: &Path) -> Result<(), String> {
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| format!("Failed to create {}: {e}", destination.display()))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut next_log_at = CHUNK_LOG_INTERVAL_BYTES;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Download of {} failed mid-stream: {e}", destination.display()))?;
        downloaded += chunk.len() as u64;
        if downloaded > MAX_DOWNLOAD_BYTES {
            return Err(format!(
                "download of {} exceeded {MAX_DOWNLOAD_BYTES} bytes, aborted",
                destination.display()
            ));
        }
        if downloaded >= next_log_at {
            debug!("{} bytes downloaded to {}", downloaded, destination.display());
            next_log_at += CHUNK_LOG_INTERVAL_BYTES;
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write {}: {e}", destination.display()))?;
    }
    file.flush()
        .await
        .map_err(|e| format!("Failed to flush {}: {e}", destination.display()))
}

fn text_part(filename: &str, contents: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::text(contents.to_string())
        .file_name(filename.to_string())
        .mime_str("text/plain")
        .expect("text/plain is always a valid mime string")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_x_param_splits_problem_and_student_id() {
        let (problem_id, student_id) = parse_x_param("p42;stu7").unwrap();
        assert_eq!(problem_id, "p42");
        assert_eq!(student_id, "stu7");
    }

    #[test]
    fn parse_x_param_rejects_a_single_field() {
        assert!(parse_x_param("p42").is_err());
    }

    #[test]
    fn parse_x_param_rejects_more_than_two_fields() {
        assert!(parse_x_param("p42;stu7;extra").is_err());
    }

    #[test]
    fn list_problem_files_strips_metadata_after_colon() {
        let body = "a.in:1024\nb.out\n\nc.in:512:extra\n";
        let names: Vec<String> = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(':').next().unwrap_or(line).trim().to_string())
            .collect();
        assert_eq!(names, vec!["a.in", "b.out", "c.in"]);
    }
}
