pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Recursively collect supported audio files beneath `dir`, in discovery order.
///
/// Hidden files and directories are skipped. Never fails: unreadable entries
/// are logged and left out, so an unreadable root yields an empty list.
pub fn scan_dir(dir: &Path) -> Vec<PathBuf> {
    let mut audio_files = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if is_supported(entry.path()) {
            audio_files.push(entry.into_path());
        }
    }

    audio_files
}

/// True when the extension is one of the supported audio formats (any case).
pub fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Canonical absolute form of `path`, used for duplicate detection.
///
/// Falls back to a lexically absolute path when the file does not exist
/// (e.g. a library entry whose file was moved away).
pub fn standardize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
