//! Shared test helpers

pub mod audio_generator;

use shellac_common::config::CleanupConfig;
use std::path::Path;

/// Config wired to a scratch tree: `in/` scanned, `organized/` and
/// `rejected/` as outputs, the store under `workspace/`. Filters are
/// loosened so the small generated fixtures pass.
pub fn test_config(root: &Path) -> CleanupConfig {
    let mut config = CleanupConfig::default();
    config.source_roots = vec![root.join("in")];
    config.target_root = root.join("organized");
    config.rejected_root = root.join("rejected");
    config.workspace_dir = root.join("workspace");
    config.min_size_bytes = 256;
    config.max_size_bytes = 100 * 1024 * 1024;
    config.min_duration_sec = 0.5;
    config.checkpoint_interval_sec = 3600;
    config
}

/// Count regular files under a directory, recursively
pub fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// All file names under a directory, recursively, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
