use crate::normalize::RawReport;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Read every `*.json` file directly inside `dir`, in path order.
///
/// Contents are handed over unparsed; the normalizer decides what is valid.
/// A missing directory or an unreadable file is logged and skipped.
pub fn load_reports(dir: &Path) -> Vec<RawReport> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "benchmark directory not found");
        return Vec::new();
    }

    let mut paths: Vec<_> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(content) => reports.push(RawReport::Text(content)),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable report"),
        }
    }
    info!(dir = %dir.display(), reports = reports.len(), "loaded benchmark reports");
    reports
}
