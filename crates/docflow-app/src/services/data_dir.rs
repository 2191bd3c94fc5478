// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

/// The application data directory, created if needed.
///
/// `DOCFLOW_DATA_DIR` wins; otherwise the XDG data home, then
/// `~/.local/share`.
pub fn data_dir() -> PathBuf {
    let dir = match std::env::var_os("DOCFLOW_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => base_dir().join("docflow"),
    };
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default location of the job archive.
pub fn default_archive_path(dir: &Path) -> PathBuf {
    dir.join("jobs.db")
}

fn base_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    std::env::temp_dir()
}
