// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! In-sandbox executor — the resource-accounting core.
//!
//! Grounded on `engine/process_execution/src/children.rs`'s `ManagedChild`
//! for the "new session, kill by negative PGID" shape, generalized from an
//! async `tokio::process::Command` to a synchronous `std::process::Command`
//! since this binary runs alone inside a single-purpose container with
//! nothing else to multiplex. Live CPU-time/RSS sampling has no
//! `rusage`-while-running equivalent, so it reads `/proc/<pid>/stat` and
//! `/proc/<pid>/status`, the same place any `ps`/`top` would.

use std::fs;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::warn;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use types::{ExecTelemetry, TestSpecification};

/// Initial polling interval.
pub const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Sharpened polling interval once a test is close to its time limit.
pub const SHARPENED_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Resolved on-disk paths for one test.
#[derive(Debug, Clone)]
pub struct TestPaths {
    pub binary: PathBuf,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub telemetry: PathBuf,
}

impl TestPaths {
    pub fn resolve(bin_dir: &Path, in_dir: &Path, std_dir: &Path, out_dir: &Path, test_name: &str) -> Self {
        TestPaths {
            binary: bin_dir.join("program"),
            stdin: in_dir.join(format!("{test_name}.in")),
            stdout: std_dir.join(format!("{test_name}.stdout.out")),
            stderr: std_dir.join(format!("{test_name}.stderr.out")),
            telemetry: out_dir.join(format!("{test_name}.exec.json")),
        }
    }
}

/// CPU-time rlimit: a kernel-enforced safety net one second past the polled
/// deadline.
pub fn cpu_rlimit_seconds(time_limit_seconds: f64) -> u64 {
    time_limit_seconds.ceil() as u64 + 1
}

/// Address-space rlimit: `2x` the accounted memory limit, an overcommit
/// margin so the kernel's hard cap never fires before the polled MLE check
/// does.
pub fn address_space_rlimit_bytes(total_memory_limit_bytes: u64) -> u64 {
    total_memory_limit_bytes.saturating_mul(2)
}

/// Runs every test named in `spec`'s tests (or, if empty, whatever the
/// caller already resolved from a directory scan) and writes one telemetry
/// file per test. Returns the list of test names actually attempted.
pub fn run_all(
    tests: &[TestSpecification],
    bin_dir: &Path,
    in_dir: &Path,
    std_dir: &Path,
    out_dir: &Path,
) -> Vec<String> {
    let mut attempted = Vec::with_capacity(tests.len());
    for test in tests {
        let paths = TestPaths::resolve(bin_dir, in_dir, std_dir, out_dir, &test.test_name);
        let telemetry = run_one(test, &paths);
        if let Err(e) = write_telemetry(&paths.telemetry, &telemetry) {
            warn!("failed to write telemetry for test {}: {e}", test.test_name);
        }
        attempted.push(test.test_name.clone());
    }
    attempted
}

fn write_telemetry(path: &Path, telemetry: &ExecTelemetry) -> Result<(), String> {
    let contents = serde_json::to_string(telemetry)
        .map_err(|e| format!("Failed to serialize telemetry: {e}"))?;
    fs::write(path, contents).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

/// Runs one test to completion, enforcing its limits, and returns its
/// telemetry. Never panics: a missing binary or
/// input produces the sentinel telemetry named in step 1 rather than an
/// error, since a telemetry file must exist for every attempted test.
pub fn run_one(test: &TestSpecification, paths: &TestPaths) -> ExecTelemetry {
    if !paths.binary.is_file() || !is_executable(&paths.binary) {
        warn!("test {}: binary {} missing or not executable", test.test_name, paths.binary.display());
        return ExecTelemetry::sentinel_not_run();
    }
    if !paths.stdin.is_file() {
        warn!("test {}: input {} missing", test.test_name, paths.stdin.display());
        return ExecTelemetry::sentinel_not_run();
    }

    match spawn_and_supervise(test, paths) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            warn!("test {}: failed to run: {e}", test.test_name);
            ExecTelemetry::sentinel_not_run()
        }
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn spawn_and_supervise(test: &TestSpecification, paths: &TestPaths) -> Result<ExecTelemetry, String> {
    let stdin_file = fs::File::open(&paths.stdin)
        .map_err(|e| format!("Failed to open stdin {}: {e}", paths.stdin.display()))?;
    let stdout_file = fs::File::create(&paths.stdout)
        .map_err(|e| format!("Failed to create stdout {}: {e}", paths.stdout.display()))?;
    let stderr_file = fs::File::create(&paths.stderr)
        .map_err(|e| format!("Failed to create stderr {}: {e}", paths.stderr.display()))?;

    let cpu_limit = cpu_rlimit_seconds(test.time_limit_seconds);
    let as_limit = address_space_rlimit_bytes(test.total_memory_limit_bytes);
    let stack_limit = test.stack_limit_or_default();

    let mut command = Command::new(&paths.binary);
    command
        .stdin(Stdio::from(stdin_file))
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));

    // SAFETY: the closure only calls async-signal-safe functions
    // (setsid, setrlimit) between fork and exec, as `pre_exec` requires.
    unsafe {
        command.pre_exec(move || {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("setsid failed: {e}")))?;
            set_rlimit(libc::RLIMIT_CPU, cpu_limit, cpu_limit)?;
            set_rlimit(libc::RLIMIT_AS, as_limit, as_limit)?;
            set_rlimit(libc::RLIMIT_STACK, stack_limit, stack_limit)?;
            set_rlimit(libc::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }

    let mut child = command
        .spawn()
        .map_err(|e| format!("Failed to spawn {}: {e}", paths.binary.display()))?;
    let pid = child.id();

    let outcome = poll_until_exit_or_limit_breach(
        &mut child,
        pid,
        test.time_limit_seconds,
        test.total_memory_limit_bytes,
    )?;

    Ok(outcome)
}

fn set_rlimit(resource: libc::c_int, soft: u64, hard: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: `limit` is a valid, fully-initialized rlimit struct.
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Polls the child's CPU time and RSS until it exits or breaches a limit,
/// then kills its whole process group if it breached one.
fn poll_until_exit_or_limit_breach(
    child: &mut std::process::Child,
    pid: u32,
    time_limit_seconds: f64,
    memory_limit_bytes: u64,
) -> Result<ExecTelemetry, String> {
    let start = Instant::now();
    let mut interval = INITIAL_POLL_INTERVAL;

    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| format!("Failed to poll child {pid}: {e}"))?
        {
            let (user_time, rss_bytes) = sample_proc(pid).unwrap_or((start.elapsed().as_secs_f64(), 0));
            return Ok(telemetry_from_exit_status(status, user_time, rss_bytes));
        }

        let sample = sample_proc(pid);
        if let Some((user_time, rss_bytes)) = sample {
            if user_time > time_limit_seconds || rss_bytes > memory_limit_bytes {
                kill_process_group(pid)?;
                let status = child.wait().map_err(|e| format!("Failed to wait for killed child {pid}: {e}"))?;
                let (final_time, final_rss) = sample_proc(pid).unwrap_or((user_time, rss_bytes));
                return Ok(telemetry_from_exit_status(status, final_time.max(user_time), final_rss.max(rss_bytes)));
            }
            if user_time >= time_limit_seconds - interval.as_secs_f64() {
                interval = SHARPENED_POLL_INTERVAL;
            }
        }

        std::thread::sleep(interval);
    }
}

fn kill_process_group(pid: u32) -> Result<(), String> {
    signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL)
        .map_err(|e| format!("Failed to SIGKILL process group {pid}: {e}"))
}

fn telemetry_from_exit_status(status: std::process::ExitStatus, user_time_seconds: f64, peak_memory_bytes: u64) -> ExecTelemetry {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => ExecTelemetry::from_signal(signal, user_time_seconds, peak_memory_bytes),
        None => ExecTelemetry::from_exit_code(status.code().unwrap_or(1), user_time_seconds, peak_memory_bytes),
    }
}

/// Reads the leader's `/proc/<pid>/stat` for user CPU ticks, and sums
/// `VmRSS` across every process sharing its process group. Returns `None` once the leader itself has
/// exited and `/proc/<pid>` has gone away.
fn sample_proc(pid: u32) -> Option<(f64, u64)> {
    let user_time = read_user_cpu_seconds(pid)?;
    let rss_bytes = sum_group_rss_bytes(pid);
    Some((user_time, rss_bytes))
}

/// Sums `VmRSS` over every process in `/proc` whose process group (field 5
/// of `/proc/<pid>/stat`, the `pgrp`) equals `leader_pid` — the group leader
/// itself plus anything it `fork()`ed that never called its own `setsid`.
fn sum_group_rss_bytes(leader_pid: u32) -> u64 {
    let Ok(entries) = fs::read_dir("/proc") else {
        return read_rss_bytes(leader_pid).unwrap_or(0);
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .filter(|&pid| read_pgrp(pid) == Some(leader_pid))
        .filter_map(read_rss_bytes)
        .sum()
}

fn read_pgrp(pid: u32) -> Option<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is `state`, fields[1] is `ppid`, fields[2] is `pgrp`.
    fields.get(2)?.parse().ok()
}

fn read_user_cpu_seconds(pid: u32) -> Option<f64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is `state`; utime is the 14th /proc/pid/stat field overall,
    // i.e. the 12th field (index 11) after the `pid (comm)` prefix.
    let utime_ticks: u64 = fields.get(11)?.parse().ok()?;
    let ticks_per_sec = clock_ticks_per_second();
    Some(utime_ticks as f64 / ticks_per_sec as f64)
}

fn read_rss_bytes(pid: u32) -> Option<u64> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

fn clock_ticks_per_second() -> i64 {
    // SAFETY: `_SC_CLK_TCK` is always a valid sysconf name.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks
    } else {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_rlimit_adds_a_one_second_safety_margin() {
        assert_eq!(cpu_rlimit_seconds(2.0), 3);
        assert_eq!(cpu_rlimit_seconds(2.1), 4);
    }

    #[test]
    fn address_space_rlimit_doubles_the_memory_limit() {
        assert_eq!(address_space_rlimit_bytes(256 * 1024 * 1024), 512 * 1024 * 1024);
    }

    #[test]
    fn resolve_builds_the_five_fixed_paths() {
        let paths = TestPaths::resolve(
            Path::new("/data/bin"),
            Path::new("/data/in"),
            Path::new("/data/std"),
            Path::new("/data/out"),
            "t1",
        );
        assert_eq!(paths.binary, PathBuf::from("/data/bin/program"));
        assert_eq!(paths.stdin, PathBuf::from("/data/in/t1.in"));
        assert_eq!(paths.stdout, PathBuf::from("/data/std/t1.stdout.out"));
        assert_eq!(paths.stderr, PathBuf::from("/data/std/t1.stderr.out"));
        assert_eq!(paths.telemetry, PathBuf::from("/data/out/t1.exec.json"));
    }

    #[test]
    fn missing_binary_yields_sentinel_telemetry() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TestPaths::resolve(tmp.path(), tmp.path(), tmp.path(), tmp.path(), "t1");
        fs::write(tmp.path().join("t1.in"), "input\n").unwrap();
        let test = TestSpecification::new("t1");
        let telemetry = run_one(&test, &paths);
        assert_eq!(telemetry, ExecTelemetry::sentinel_not_run());
    }

    #[test]
    fn missing_input_yields_sentinel_telemetry() {
        let tmp = tempfile::tempdir().unwrap();
        let bin_path = tmp.path().join("program");
        fs::write(&bin_path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = fs::metadata(&bin_path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        fs::set_permissions(&bin_path, perms).unwrap();

        let paths = TestPaths::resolve(tmp.path(), tmp.path(), tmp.path(), tmp.path(), "t1");
        let test = TestSpecification::new("t1");
        let telemetry = run_one(&test, &paths);
        assert_eq!(telemetry, ExecTelemetry::sentinel_not_run());
    }

    #[test]
    fn a_clean_exit_is_captured_with_zero_return_code() {
        let tmp = tempfile::tempdir().unwrap();
        let bin_path = tmp.path().join("program");
        fs::write(&bin_path, "#!/bin/sh\ncat\n").unwrap();
        let mut perms = fs::metadata(&bin_path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        fs::set_permissions(&bin_path, perms).unwrap();
        fs::write(tmp.path().join("t1.in"), "hello\n").unwrap();

        let paths = TestPaths::resolve(tmp.path(), tmp.path(), tmp.path(), tmp.path(), "t1");
        let test = TestSpecification::new("t1");
        let telemetry = run_one(&test, &paths);
        assert_eq!(telemetry.return_code, 0);
        assert_eq!(telemetry.signal, None);

        let stdout = fs::read_to_string(tmp.path().join("t1.stdout.out")).unwrap();
        assert_eq!(stdout, "hello\n");
    }

    #[test]
    fn group_rss_sums_at_least_the_calling_process_own_rss() {
        // The test harness process is its own group leader or a member of one;
        // either way its own VmRSS must be included in the group total.
        let pgrp = read_pgrp(std::process::id()).expect("own /proc/self/stat is always readable");
        let own_rss = read_rss_bytes(std::process::id()).unwrap_or(0);
        let group_rss = sum_group_rss_bytes(pgrp);
        assert!(group_rss >= own_rss);
    }
}
