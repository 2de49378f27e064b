//! Manifest discovery.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

const MANIFEST_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Manifests under `directory` modified after `since`, sorted by path.
/// A missing or unreadable directory yields nothing: the user workflows
/// directory may simply not exist yet.
pub fn manifests_since(directory: &Path, since: SystemTime) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return vec![];
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|extension| extension.to_str())
                .map(|extension| MANIFEST_EXTENSIONS.contains(&extension))
                .unwrap_or(false)
        })
        .filter(|path| modified_after(path, since))
        .collect();
    paths.sort();
    paths
}

fn modified_after(path: &Path, since: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(|modified| modified > since)
        .unwrap_or(false)
}
