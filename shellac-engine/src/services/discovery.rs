//! Discovery producer
//!
//! Walks the configured source roots depth-first and yields candidate
//! files as a lazy, bounded stream. Symlinks are not followed; protected
//! roots are skipped wholesale; extension and size filters apply before
//! anything is emitted. Each emitted path is upserted as `discovered`,
//! so a resumed run re-walks cheaply and inserts nothing twice.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};

/// Discovery errors; all are per-path and never abort the walk
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("File access error {0}: {1}")]
    FileAccess(PathBuf, String),
}

/// One discovered candidate
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub modified_time: DateTime<Utc>,
}

/// Filesystem walker with the configured filters applied
pub struct DiscoveryProducer {
    source_roots: Vec<PathBuf>,
    protected_roots: Vec<PathBuf>,
    supported_extensions: HashSet<String>,
    min_size_bytes: u64,
    max_size_bytes: u64,
    ignore_patterns: Vec<String>,
}

impl DiscoveryProducer {
    pub fn new(config: &shellac_common::config::CleanupConfig) -> Self {
        Self {
            source_roots: config.source_roots.clone(),
            protected_roots: config.protected_roots.clone(),
            supported_extensions: config
                .supported_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            min_size_bytes: config.min_size_bytes,
            max_size_bytes: config.max_size_bytes,
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
        }
    }

    /// Spawn the walk on the blocking pool, yielding candidates through a
    /// bounded channel. Dropping the receiver stops the walk.
    pub fn stream(&self, channel_capacity: usize) -> mpsc::Receiver<DiscoveredFile> {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let producer = self.clone_inner();

        tokio::task::spawn_blocking(move || {
            for root in &producer.source_roots {
                if let Err(e) = producer.walk_root(root, &tx) {
                    tracing::warn!(root = %root.display(), error = %e, "Source root skipped");
                }
            }
        });

        rx
    }

    /// Walk every source root synchronously, collecting candidates.
    /// Used by tests and small trees; the pipeline uses [`stream`].
    pub fn collect_all(&self) -> Vec<DiscoveredFile> {
        let mut found = Vec::new();
        for root in &self.source_roots {
            if let Err(e) = self.walk_root_into(root, &mut |file| found.push(file)) {
                tracing::warn!(root = %root.display(), error = %e, "Source root skipped");
            }
        }
        found
    }

    fn clone_inner(&self) -> DiscoveryProducer {
        DiscoveryProducer {
            source_roots: self.source_roots.clone(),
            protected_roots: self.protected_roots.clone(),
            supported_extensions: self.supported_extensions.clone(),
            min_size_bytes: self.min_size_bytes,
            max_size_bytes: self.max_size_bytes,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }

    fn walk_root(&self, root: &Path, tx: &mpsc::Sender<DiscoveredFile>) -> Result<(), ScanError> {
        self.walk_root_into(root, &mut |file| {
            // blocking_send is fine here: the walk runs on the blocking pool
            if tx.blocking_send(file).is_err() {
                tracing::debug!("Discovery receiver dropped, stopping walk");
            }
        })
    }

    fn walk_root_into(
        &self,
        root: &Path,
        emit: &mut dyn FnMut(DiscoveredFile),
    ) -> Result<(), ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| self.should_descend(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Error accessing entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            match self.evaluate(path) {
                Ok(Some(file)) => emit(file),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "File skipped"),
            }
        }

        Ok(())
    }

    /// Prune protected roots and junk directories before descending
    fn should_descend(&self, entry: &DirEntry) -> bool {
        let path = entry.path();
        if self.is_protected(path) {
            tracing::debug!(path = %path.display(), "Protected root, skipping");
            return false;
        }

        let file_name = entry.file_name().to_string_lossy();
        !self
            .ignore_patterns
            .iter()
            .any(|pattern| file_name == pattern.as_str())
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected_roots.iter().any(|root| path.starts_with(root))
    }

    /// Apply the extension and size filters to one file
    fn evaluate(&self, path: &Path) -> Result<Option<DiscoveredFile>, ScanError> {
        if self.is_protected(path) {
            return Ok(None);
        }

        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            return Ok(None);
        };
        if !self.supported_extensions.contains(&ext) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ScanError::PermissionDenied(path.to_path_buf())
            } else {
                ScanError::FileAccess(path.to_path_buf(), e.to_string())
            }
        })?;

        let size = metadata.len();
        // Bounds are inclusive on both ends
        if size < self.min_size_bytes || size > self.max_size_bytes {
            return Ok(None);
        }

        let modified_time = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(DiscoveredFile {
            absolute_path: path.to_path_buf(),
            size_bytes: size,
            modified_time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellac_common::config::CleanupConfig;
    use std::fs;

    fn config_for(dir: &Path) -> CleanupConfig {
        let mut config = CleanupConfig::default();
        config.source_roots = vec![dir.to_path_buf()];
        config.min_size_bytes = 4;
        config.max_size_bytes = 1024;
        config
    }

    #[test]
    fn test_extension_and_size_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.mp3"), b"12345678").unwrap();
        fs::write(dir.path().join("skip.txt"), b"12345678").unwrap();
        fs::write(dir.path().join("tiny.mp3"), b"123").unwrap();

        let producer = DiscoveryProducer::new(&config_for(dir.path()));
        let found = producer.collect_all();
        assert_eq!(found.len(), 1);
        assert!(found[0].absolute_path.ends_with("keep.mp3"));
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("at_min.mp3"), vec![0u8; 4]).unwrap();
        fs::write(dir.path().join("below.mp3"), vec![0u8; 3]).unwrap();
        fs::write(dir.path().join("at_max.mp3"), vec![0u8; 1024]).unwrap();
        fs::write(dir.path().join("above.mp3"), vec![0u8; 1025]).unwrap();

        let producer = DiscoveryProducer::new(&config_for(dir.path()));
        let mut names: Vec<String> = producer
            .collect_all()
            .iter()
            .map(|f| f.absolute_path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["at_max.mp3", "at_min.mp3"]);
    }

    #[test]
    fn test_protected_root_never_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("precious.mp3"), vec![0u8; 16]).unwrap();
        fs::write(dir.path().join("normal.mp3"), vec![0u8; 16]).unwrap();

        let mut config = config_for(dir.path());
        config.protected_roots = vec![vault.clone()];

        let producer = DiscoveryProducer::new(&config);
        let found = producer.collect_all();
        assert_eq!(found.len(), 1);
        assert!(found[0].absolute_path.ends_with("normal.mp3"));
    }

    #[test]
    fn test_nested_directories_walked() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("deep.flac"), vec![0u8; 32]).unwrap();

        let producer = DiscoveryProducer::new(&config_for(dir.path()));
        let found = producer.collect_all();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_lazily() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("{}.mp3", i)), vec![0u8; 16]).unwrap();
        }

        let producer = DiscoveryProducer::new(&config_for(dir.path()));
        let mut rx = producer.stream(2);

        let mut count = 0;
        while let Some(_file) = rx.recv().await {
            count += 1;
        }
        assert_eq!(count, 10);
    }
}
