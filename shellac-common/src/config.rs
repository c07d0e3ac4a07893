//! Configuration loading for the cleanup engine
//!
//! All tunables live in a single TOML file. Missing keys fall back to the
//! compiled defaults, so an empty file (or no file at all) yields a usable
//! safe-mode configuration: copy-only, no deletions, conservative filters.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a destination conflict is resolved during organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Same content hash at the destination: skip the operation entirely
    SkipIfSameHash,
    /// Append a numbered suffix until the name is free
    Rename,
    /// Abort the transaction
    Fail,
}

/// How files travel into the organized and rejected trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    /// Copy, source stays in place (safe default)
    Copy,
    /// Copy, verify hash, then remove the source as a staged step
    Move,
    /// Hard-link into the destination tree
    Link,
}

/// Depth of content verification performed after copies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityLevel {
    Basic,
    Checksum,
    Deep,
    Paranoid,
}

/// Component weights for the quality score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityWeights {
    pub technical: f64,
    pub fidelity: f64,
    pub integrity: f64,
    pub reference: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            technical: 0.25,
            fidelity: 0.25,
            integrity: 0.15,
            reference: 0.35,
        }
    }
}

/// One genre category with its match keywords (first match wins, in order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreCategory {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Roots scanned by discovery
    pub source_roots: Vec<PathBuf>,
    /// Path prefixes that are never written to
    pub protected_roots: Vec<PathBuf>,
    /// Root of the organized tree
    pub target_root: PathBuf,
    /// Root of the rejected tree
    pub rejected_root: PathBuf,
    /// Workspace directory holding the store
    pub workspace_dir: PathBuf,

    /// Lowercased extensions accepted by discovery
    pub supported_extensions: Vec<String>,
    /// Inclusive size bounds for discovery
    pub min_size_bytes: u64,
    pub max_size_bytes: u64,

    /// Files per batch; also sizes the inter-stage channels (2x)
    pub batch_size: usize,
    /// Per-stage worker pool size; 0 means min(cpu count, 8)
    pub max_workers: usize,
    /// Soft memory cap that throttles prefetch
    pub memory_limit_bytes: u64,

    /// When false, grouping uses content hash only
    pub enable_fingerprinting: bool,
    /// Fingerprint similarity needed to union two files
    pub duplicate_similarity_threshold: f64,

    /// Corruption filter policy
    pub min_health_score: u8,
    pub critical_defects: Vec<String>,
    pub min_duration_sec: f64,
    pub max_duration_sec: f64,

    /// Scoring and tie-break tables
    pub quality_weights: QualityWeights,
    pub format_priority: Vec<String>,

    /// Destination filename template
    pub organize_pattern: String,
    /// Filename length cap applied after pattern expansion
    pub max_filename_len: usize,
    pub handle_conflicts: ConflictPolicy,
    pub duplicate_action: DuplicateAction,
    pub integrity_level: IntegrityLevel,
    /// Stamp the computed grade into the organized copy's tags. Off by
    /// default: the stamp changes the copy's bytes, so re-runs can no
    /// longer classify it as an identical-content skip
    pub write_quality_tags: bool,

    /// Regex patterns tried, in order, against the file stem when tags are
    /// missing. Named groups: artist, title, year
    pub filename_patterns: Vec<String>,

    pub checkpoint_interval_sec: u64,
    /// Total time writes may wait out a locked store before giving up
    pub store_lock_wait_ms: u64,
    /// Per-file cap on fingerprinter / metadata calls
    pub extractor_timeout_sec: u64,
    /// Transactions are planned and staged but never performed
    pub dry_run: bool,
    /// Quarantine copies instead of moving
    pub quarantine_copy: bool,

    /// Category -> keyword mapping, matched in order against the tag genre
    pub genre_categories: Vec<GenreCategory>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            protected_roots: Vec::new(),
            target_root: PathBuf::from("organized"),
            rejected_root: PathBuf::from("rejected"),
            workspace_dir: PathBuf::from("."),
            supported_extensions: [
                "mp3", "flac", "wav", "m4a", "aac", "ogg", "opus", "wma",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_size_bytes: 100 * 1024,
            max_size_bytes: 2 * 1024 * 1024 * 1024,
            batch_size: 50,
            max_workers: 0,
            memory_limit_bytes: 512 * 1024 * 1024,
            enable_fingerprinting: true,
            duplicate_similarity_threshold: 0.90,
            min_health_score: 50,
            critical_defects: [
                "header-corruption",
                "truncation",
                "complete-silence",
                "metadata-unreadable",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_duration_sec: 10.0,
            max_duration_sec: 3600.0,
            quality_weights: QualityWeights::default(),
            format_priority: [
                "flac", "wav", "alac", "mp3", "ogg", "aac", "opus", "wma",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            organize_pattern: "{year} - {artist} - {title} [QS{score}%]".to_string(),
            max_filename_len: 180,
            handle_conflicts: ConflictPolicy::SkipIfSameHash,
            duplicate_action: DuplicateAction::Copy,
            integrity_level: IntegrityLevel::Checksum,
            write_quality_tags: false,
            filename_patterns: vec![
                // "Artist - Title"
                r"^(?P<artist>[^-]+?)\s*-\s*(?P<title>.+)$".to_string(),
                // "01. Artist - Title"
                r"^\d{1,3}[.\s-]+(?P<artist>[^-]+?)\s*-\s*(?P<title>.+)$".to_string(),
            ],
            checkpoint_interval_sec: 60,
            store_lock_wait_ms: 5000,
            extractor_timeout_sec: 30,
            dry_run: false,
            quarantine_copy: false,
            genre_categories: default_genre_categories(),
        }
    }
}

impl CleanupConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
        let config: CleanupConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration if the file exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            self.max_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .min(8)
        }
    }

    /// Path of the unified store file
    pub fn store_path(&self) -> PathBuf {
        self.workspace_dir.join("music_cleanup.db")
    }

    /// True when the path sits under one of the protected prefixes
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected_roots.iter().any(|root| path.starts_with(root))
    }

    fn validate(&self) -> Result<()> {
        if self.min_size_bytes > self.max_size_bytes {
            return Err(Error::Config(
                "min_size_bytes exceeds max_size_bytes".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.duplicate_similarity_threshold) {
            return Err(Error::Config(
                "duplicate_similarity_threshold must be in [0, 1]".to_string(),
            ));
        }
        let w = &self.quality_weights;
        let sum = w.technical + w.fidelity + w.integrity + w.reference;
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::Config(format!(
                "quality_weights must sum to 1.0 (got {:.3})",
                sum
            )));
        }
        Ok(())
    }
}

/// Write configuration atomically (temp file + rename)
pub fn write_config(config: &CleanupConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), "Config written");
    Ok(())
}

/// Built-in category table; operators override via `genre_categories`
fn default_genre_categories() -> Vec<GenreCategory> {
    let table: &[(&str, &[&str])] = &[
        ("House", &["house", "deep house", "tech house", "electro house"]),
        ("Techno", &["techno", "minimal", "industrial techno"]),
        ("Trance", &["trance", "psytrance", "progressive trance"]),
        ("Drum & Bass", &["drum & bass", "drum and bass", "dnb", "jungle"]),
        ("Hip-Hop", &["hip hop", "hip-hop", "rap", "trap"]),
        ("Rock", &["rock", "punk", "grunge", "metal", "hard rock"]),
        ("Pop", &["pop", "synthpop", "dance pop"]),
        ("Jazz", &["jazz", "bebop", "swing", "fusion"]),
        ("Classical", &["classical", "orchestral", "baroque", "opera"]),
        ("Ambient", &["ambient", "downtempo", "chillout", "idm"]),
        ("Funk & Soul", &["funk", "soul", "disco", "r&b", "rnb"]),
        ("Reggae", &["reggae", "dub", "ska", "dancehall"]),
    ];
    table
        .iter()
        .map(|(name, keywords)| GenreCategory {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_safe_mode() {
        let config = CleanupConfig::default();
        assert_eq!(config.duplicate_action, DuplicateAction::Copy);
        assert!(!config.dry_run);
        assert_eq!(config.handle_conflicts, ConflictPolicy::SkipIfSameHash);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = CleanupConfig::default();
        config.quality_weights.reference = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shellac.toml");

        let mut config = CleanupConfig::default();
        config.batch_size = 17;
        config.protected_roots.push(PathBuf::from("/mnt/vault"));
        write_config(&config, &path).unwrap();

        let loaded = CleanupConfig::load(&path).unwrap();
        assert_eq!(loaded.batch_size, 17);
        assert!(loaded.is_protected(Path::new("/mnt/vault/a.mp3")));
        assert!(!loaded.is_protected(Path::new("/mnt/other/a.mp3")));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = CleanupConfig::load_or_default(Path::new("/nonexistent/shellac.toml")).unwrap();
        assert_eq!(config.batch_size, 50);
    }
}
