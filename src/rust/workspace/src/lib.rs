// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

// Per-submission workspace directory tree.
//
// Grounded on `engine/process_execution/src/local.rs`'s `create_sandbox` /
// `AsyncDropSandbox` for the "purge first, recreate, never try to patch a
// half-built tree" philosophy, though unlike a `tempfile::TempDir` this is a
// fixed, named path that is reused submission after submission.

use std::fs;
use std::path::{Path, PathBuf};

use types::ProblemSpecification;

/// The eight fixed subdirectories every workspace has.
pub const SUBDIRS: [&str; 8] = ["src", "lib", "tests", "conf", "bin", "std", "out", "logs"];

pub const PROBLEM_SPEC_FILENAME: &str = "problem_specification.json";

/// `<data_path>/<hostname>`, namespacing one worker's workspace root among
/// others sharing a host mount.
pub fn root_for(data_path: &Path, hostname: &str) -> PathBuf {
    data_path.join(hostname)
}

/// Removes `root` if present, recreates it, and creates the eight fixed
/// subdirectories. There is no cleanup needed on partial failure: the next
/// submission's `init` purges unconditionally before trying again.
pub fn init(root: &Path) -> Result<(), String> {
    purge(root)?;
    fs::create_dir_all(root)
        .map_err(|e| format!("Failed to create workspace root {}: {e}", root.display()))?;
    for subdir in SUBDIRS {
        let path = root.join(subdir);
        fs::create_dir_all(&path)
            .map_err(|e| format!("Failed to create workspace subdir {}: {e}", path.display()))?;
    }
    Ok(())
}

/// Removes the workspace tree if it exists. Idempotent.
pub fn purge(root: &Path) -> Result<(), String> {
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("Failed to purge workspace {}: {e}", root.display())),
    }
}

/// Copies the workspace tree to `<root>_debug`, purging any existing debug
/// copy first.
pub fn archive(root: &Path) -> Result<PathBuf, String> {
    let debug_root = debug_path_for(root);
    purge(&debug_root)?;
    copy_dir_recursive(root, &debug_root)?;
    Ok(debug_root)
}

pub fn debug_path_for(root: &Path) -> PathBuf {
    let mut name = root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push("_debug");
    match root.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), String> {
    fs::create_dir_all(dst)
        .map_err(|e| format!("Failed to create {}: {e}", dst.display()))?;
    for entry in fs::read_dir(src).map_err(|e| format!("Failed to read {}: {e}", src.display()))? {
        let entry = entry.map_err(|e| format!("Failed to read directory entry: {e}"))?;
        let file_type = entry
            .file_type()
            .map_err(|e| format!("Failed to stat {}: {e}", entry.path().display()))?;
        let dst_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dst_path)
                .map_err(|e| format!("Failed to copy {}: {e}", entry.path().display()))?;
        }
        // Symlinks inside a workspace would only ever point at container mount
        // targets that no longer exist once the container is gone, so they're
        // skipped rather than copied.
    }
    Ok(())
}

/// Writes the problem specification into `conf/problem_specification.json`
/// in a stable, forward-compatible form so later pipeline stages can read it
/// back without re-parsing the original script text.
pub fn persist_spec(spec: &ProblemSpecification, root: &Path) -> Result<(), String> {
    let conf_dir = root.join("conf");
    let contents = serde_json::to_string_pretty(spec)
        .map_err(|e| format!("Failed to serialize problem specification: {e}"))?;
    let dest = conf_dir.join(PROBLEM_SPEC_FILENAME);
    fs::write(&dest, contents)
        .map_err(|e| format!("Failed to write {}: {e}", dest.display()))
}

/// True iff `path`'s parent exists, is a directory, is writable, and `path`
/// itself is not a directory.
pub fn validate_file_dest(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    parent_is_writable_dir(path)
}

/// True iff `path`'s parent exists, is a directory, is writable, and `path`
/// itself is not an existing regular file (see DESIGN.md for why this
/// differs from requiring `path` itself to already exist as a directory).
pub fn validate_dir_dest(path: &Path) -> bool {
    if path.is_file() {
        return false;
    }
    parent_is_writable_dir(path)
}

fn parent_is_writable_dir(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => !meta.permissions().readonly(),
        _ => false,
    }
}

/// Widens the process umask to 0 so sandbox images writing as their own
/// UIDs aren't blocked by the worker's default umask. A single global call
/// made once by the orchestrator right after process start — it is NOT
/// re-applied per submission.
#[cfg(unix)]
pub fn widen_umask_once() {
    // SAFETY: umask(2) has no preconditions beyond being a valid process;
    // it is process-global state, which is exactly why callers must invoke
    // this exactly once rather than per-submission.
    unsafe {
        libc::umask(0);
    }
}

#[cfg(not(unix))]
pub fn widen_umask_once() {}

#[cfg(test)]
mod tests {
    use super::*;
    use types::TestSpecification;

    #[test]
    fn init_creates_all_fixed_subdirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("submission-1");
        init(&root).unwrap();
        for subdir in SUBDIRS {
            assert!(root.join(subdir).is_dir(), "missing {subdir}");
        }
    }

    #[test]
    fn init_purges_stale_files_from_a_previous_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("submission-1");
        init(&root).unwrap();
        fs::write(root.join("out").join("stale.json"), "leftover").unwrap();
        init(&root).unwrap();
        assert!(!root.join("out").join("stale.json").exists());
    }

    #[test]
    fn purge_is_idempotent_on_a_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("never-created");
        assert!(purge(&root).is_ok());
    }

    #[test]
    fn archive_clones_tree_and_replaces_prior_debug_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("submission-1");
        init(&root).unwrap();
        fs::write(root.join("out").join("a.judge.json"), "{}").unwrap();

        let debug_root = archive(&root).unwrap();
        assert!(debug_root.join("out").join("a.judge.json").is_file());

        // A second archive should fully replace the first, not merge into it.
        fs::remove_file(root.join("out").join("a.judge.json")).unwrap();
        fs::write(root.join("out").join("b.judge.json"), "{}").unwrap();
        let debug_root = archive(&root).unwrap();
        assert!(!debug_root.join("out").join("a.judge.json").exists());
        assert!(debug_root.join("out").join("b.judge.json").is_file());
    }

    #[test]
    fn persist_spec_writes_readable_json() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("submission-1");
        init(&root).unwrap();
        let spec = ProblemSpecification {
            id: "p1".to_string(),
            tests: vec![TestSpecification::new("a")],
        };
        persist_spec(&spec, &root).unwrap();
        let contents = fs::read_to_string(root.join("conf").join(PROBLEM_SPEC_FILENAME)).unwrap();
        let parsed: ProblemSpecification = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn validate_file_dest_rejects_directories() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!validate_file_dest(tmp.path()));
    }

    #[test]
    fn validate_file_dest_accepts_a_fresh_path_in_an_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(validate_file_dest(&tmp.path().join("out.txt")));
    }

    #[test]
    fn validate_file_dest_rejects_missing_parent() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!validate_file_dest(&tmp.path().join("missing").join("out.txt")));
    }

    #[test]
    fn validate_dir_dest_accepts_a_fresh_path_in_an_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(validate_dir_dest(&tmp.path().join("not-created-yet")));
    }

    #[test]
    fn validate_dir_dest_rejects_a_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a-file");
        fs::write(&file, "x").unwrap();
        assert!(!validate_dir_dest(&file));
    }

    #[test]
    fn root_for_namespaces_by_hostname() {
        let root = root_for(Path::new("/data"), "worker-7");
        assert_eq!(root, PathBuf::from("/data/worker-7"));
    }
}
