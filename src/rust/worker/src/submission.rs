// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Submission-archive and problem-file staging helpers. The submission
//! archive's first entry name becomes `MAINFILE` when the front end doesn't
//! supply one, and a problem's file listing is split into test
//! inputs/outputs, an optional script, and everything else (treated as
//! compile-time library material).

use std::fs;
use std::path::Path;

/// Extracts every entry of the zip archive at `archive_path` into `dest_dir`
/// (which must already exist), returning the name of the first entry as the
/// archive-derived `MAINFILE` fallback, or `None` for an
/// empty archive.
pub fn extract_submission_archive(archive_path: &Path, dest_dir: &Path) -> Result<Option<String>, String> {
    let file = fs::File::open(archive_path)
        .map_err(|e| format!("Failed to open submission archive {}: {e}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| format!("Failed to read submission archive {}: {e}", archive_path.display()))?;

    let mut first_entry_name: Option<String> = None;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("Failed to read archive entry {i}: {e}"))?;
        let Some(relative_path) = entry.enclosed_name() else {
            continue;
        };
        if i == 0 {
            first_entry_name = relative_path.to_str().map(str::to_string);
        }
        if entry.is_dir() {
            continue;
        }
        let dest_path = dest_dir.join(&relative_path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
        let mut out = fs::File::create(&dest_path)
            .map_err(|e| format!("Failed to create {}: {e}", dest_path.display()))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| format!("Failed to extract {}: {e}", dest_path.display()))?;
    }
    Ok(first_entry_name)
}

/// One file named by `list_problem_files`, classified by how the worker
/// stages it into the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProblemFileKind {
    /// `<name>.in` / `<name>.out` — staged into `tests/`.
    TestData,
    /// `script.txt` — staged to a scratch path, then parsed by `script::parse_script`.
    Script,
    /// Anything else — staged into `lib/` as compile-time auxiliary material.
    Library,
}

pub fn classify_problem_file(file_name: &str) -> ProblemFileKind {
    if file_name == "script.txt" {
        ProblemFileKind::Script
    } else if file_name.ends_with(".in") || file_name.ends_with(".out") {
        ProblemFileKind::TestData
    } else {
        ProblemFileKind::Library
    }
}
