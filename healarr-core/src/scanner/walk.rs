//! Directory enumeration (spec §4.4). Depth-first walk via `walkdir`, the
//! same crate and call pattern `ferrex-core::scanner::MediaScanner` uses,
//! restricted to the media extension set and a hidden-file skip rule.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "m2ts", "mpg", "mpeg",
];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct WalkResult {
    pub files: Vec<PathBuf>,
    pub truncated: bool,
}

/// Enumerates every media file under `root`, skipping hidden entries.
/// `max_files`, when set, stops the walk once that many files have been
/// collected and reports `truncated = true`.
pub fn walk_media_files(root: &Path, max_files: Option<usize>) -> WalkResult {
    let mut files = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| !is_hidden(e.path()) || e.path() == root) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        if !is_media_file(path) {
            continue;
        }

        if let Some(max) = max_files {
            if files.len() >= max {
                truncated = true;
                break;
            }
        }

        files.push(path.to_path_buf());
    }

    WalkResult { files, truncated }
}
