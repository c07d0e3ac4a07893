//! Scoring-tag writer
//!
//! Default [`MetadataWriter`]: stamps the computed grade into the file's
//! comment tag. Writes go to a sibling temp copy which is renamed over
//! the target, and paths under a protected root are refused outright.

use super::{ExtractError, MetadataWriter, ScoreTags};
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use std::path::{Path, PathBuf};

pub struct TagWriter {
    protected_roots: Vec<PathBuf>,
}

impl TagWriter {
    pub fn new(protected_roots: Vec<PathBuf>) -> Self {
        Self { protected_roots }
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "tagwrite".to_string());
        name.push_str(".tmp");
        path.with_file_name(name)
    }
}

impl MetadataWriter for TagWriter {
    fn write(&self, path: &Path, tags: &ScoreTags) -> Result<(), ExtractError> {
        if self.protected_roots.iter().any(|root| path.starts_with(root)) {
            return Err(ExtractError::ProtectedPath(path.display().to_string()));
        }

        let tmp = Self::temp_path(path);
        std::fs::copy(path, &tmp)?;

        let result = (|| -> Result<(), ExtractError> {
            let mut tagged_file = Probe::open(&tmp)
                .map_err(|e| ExtractError::TagWrite(e.to_string()))?
                .read()
                .map_err(|e| ExtractError::TagWrite(e.to_string()))?;

            if tagged_file.primary_tag().is_none() {
                let tag_type = tagged_file.primary_tag_type();
                tagged_file.insert_tag(Tag::new(tag_type));
            }
            let tag = tagged_file
                .primary_tag_mut()
                .ok_or_else(|| ExtractError::TagWrite("No writable tag".to_string()))?;

            tag.set_comment(format!(
                "Quality {} ({:.1}/100)",
                tags.grade, tags.final_score
            ));

            tagged_file
                .save_to_path(&tmp, WriteOptions::default())
                .map_err(|e| ExtractError::TagWrite(e.to_string()))?;

            std::fs::rename(&tmp, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        } else {
            tracing::debug!(path = %path.display(), grade = %tags.grade, "Score tag written");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_path_refused() {
        let writer = TagWriter::new(vec![PathBuf::from("/mnt/vault")]);
        let result = writer.write(
            Path::new("/mnt/vault/a.mp3"),
            &ScoreTags {
                grade: "A".to_string(),
                final_score: 91.0,
            },
        );
        assert!(matches!(result, Err(ExtractError::ProtectedPath(_))));
    }

    #[test]
    fn test_missing_file_errors_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("none.mp3");
        let writer = TagWriter::new(Vec::new());
        let result = writer.write(
            &target,
            &ScoreTags {
                grade: "B".to_string(),
                final_score: 76.0,
            },
        );
        assert!(result.is_err());
        assert!(!dir.path().join("none.mp3.tmp").exists());
    }
}
