//! Dashboard file discovery.
//!
//! Walks a source directory, matches files against a glob pattern, and
//! probes each match just enough to extract the dashboard `title` and `uid`
//! from its JSON model. Results are sorted by relative path so a manifest
//! always produces the same import order.

use std::path::{Path, PathBuf};

use glob_match::glob_match;
use tracing::{debug, warn};

use crate::errors::DiscoveryError;

/// A dashboard JSON file found under a source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the source directory, forward-slash separated.
    pub rel_path: String,
    /// Dashboard title from the JSON model.
    pub title: String,
    /// Dashboard uid, if the model pins one.
    pub uid: Option<String>,
}

impl DashboardFile {
    /// Read and parse the full dashboard JSON model.
    pub fn load_model(&self) -> Result<serde_json::Value, DiscoveryError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| DiscoveryError::IoError {
            path: self.path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| DiscoveryError::InvalidDashboard {
            path: self.path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Discover dashboard files under `dir` whose relative path matches
/// `pattern`.
///
/// Non-matching files are skipped silently; a matching file that is not a
/// valid dashboard model is an error, since importing it later would fail
/// halfway through an apply.
pub fn discover(dir: &Path, pattern: &str) -> Result<Vec<DashboardFile>, DiscoveryError> {
    if !dir.is_dir() {
        return Err(DiscoveryError::DirNotFound(dir.display().to_string()));
    }

    let mut paths = Vec::new();
    walk(dir, dir, &mut paths)?;
    paths.sort();

    let mut dashboards = Vec::new();
    for (rel_path, path) in paths {
        if !glob_match(pattern, &rel_path) {
            debug!(rel_path, pattern, "skipping non-matching file");
            continue;
        }
        dashboards.push(probe(path, rel_path)?);
    }

    debug!(dir = %dir.display(), count = dashboards.len(), "discovered dashboards");
    Ok(dashboards)
}

/// Recursively collect `(rel_path, abs_path)` pairs for all regular files.
fn walk(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), DiscoveryError> {
    let entries = std::fs::read_dir(dir).map_err(|e| DiscoveryError::IoError {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError::IoError {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(root)
                .expect("walked path is always under root");
            let rel_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel_path, path));
        }
    }
    Ok(())
}

/// Parse just the `title` and `uid` fields out of a dashboard file.
fn probe(path: PathBuf, rel_path: String) -> Result<DashboardFile, DiscoveryError> {
    let contents = std::fs::read_to_string(&path).map_err(|e| DiscoveryError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;

    let model: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| DiscoveryError::InvalidDashboard {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let title = model
        .get("title")
        .and_then(|t| t.as_str())
        .ok_or_else(|| DiscoveryError::InvalidDashboard {
            path: path.display().to_string(),
            detail: "missing 'title' field".into(),
        })?
        .to_string();

    let uid = model
        .get("uid")
        .and_then(|u| u.as_str())
        .map(str::to_string);
    if uid.is_none() {
        warn!(rel_path, "dashboard has no pinned uid, Grafana will assign one");
    }

    Ok(DashboardFile {
        path,
        rel_path,
        title,
        uid,
    })
}
