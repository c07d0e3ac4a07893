//! External analysis collaborators
//!
//! The pipeline consumes fingerprinting, tag reading/writing, defect
//! detection, and reference lookup through the trait seams defined here.
//! Default implementations live in this module; alternates (a no-op
//! fingerprinter, a tag-only reader) are selected by config. The core
//! never assumes more than these contracts promise.

pub mod decode;
pub mod decode_scan;
pub mod envelope_fingerprinter;
pub mod tag_reader;
pub mod tag_writer;

use shellac_common::config::CleanupConfig;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use decode_scan::DecodeScan;
pub use envelope_fingerprinter::{EnvelopeFingerprinter, NoopFingerprinter};
pub use tag_reader::{FilenameParser, TagReader};
pub use tag_writer::TagWriter;

/// Extraction failures
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Tag read failed: {0}")]
    TagRead(String),

    #[error("Tag write failed: {0}")]
    TagWrite(String),

    #[error("Refusing to write under protected root: {0}")]
    ProtectedPath(String),

    #[error("Fingerprinting disabled")]
    Disabled,
}

/// Technical attributes reported alongside a fingerprint
#[derive(Debug, Clone, Default)]
pub struct TechnicalAttributes {
    pub duration_sec: f64,
    pub sample_rate_hz: u32,
    pub bit_depth: Option<u8>,
    pub channels: u8,
    pub codec: String,
    pub bitrate_kbps: u32,
}

/// Fingerprinter output
#[derive(Debug, Clone)]
pub struct AudioFingerprint {
    /// Opaque, deterministic for identical content
    pub fingerprint: String,
    pub attributes: TechnicalAttributes,
}

/// Tag-level metadata as read from the file
#[derive(Debug, Clone, Default)]
pub struct TagData {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
}

/// Tags the engine writes back (organized copies only)
#[derive(Debug, Clone, Default)]
pub struct ScoreTags {
    pub grade: String,
    pub final_score: f64,
}

/// Defect detector output
#[derive(Debug, Clone)]
pub struct DefectReport {
    /// 0..=100; lower means more defective
    pub health_score: u8,
    pub defects: Vec<String>,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
    /// Decibels between loud and quiet analysis windows
    pub dynamic_range_db: Option<f64>,
}

/// Known-good reference for a recording
#[derive(Debug, Clone)]
pub struct ReferenceTrack {
    pub format: String,
    pub bitrate_kbps: u32,
    /// 0..=100
    pub quality_class: f64,
}

/// Maps a file to a fingerprint string plus technical attributes.
/// Must be deterministic for identical file content.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractError>;

    /// Similarity of two fingerprint strings in [0, 1]
    fn similarity(&self, a: &str, b: &str) -> f64;

    /// False disables acoustic grouping entirely
    fn enabled(&self) -> bool {
        true
    }
}

/// Reads tag metadata from a file
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagData, ExtractError>;
}

/// Writes scoring tags; implementations must refuse protected paths
pub trait MetadataWriter: Send + Sync {
    fn write(&self, path: &Path, tags: &ScoreTags) -> Result<(), ExtractError>;
}

/// Probes a file for defects and a health score
pub trait DefectDetector: Send + Sync {
    fn scan(&self, path: &Path, sample_duration_sec: f64) -> Result<DefectReport, ExtractError>;
}

/// Optional lookup of known-good references by fingerprint
pub trait ReferenceLookup: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> Result<Vec<ReferenceTrack>, ExtractError>;
}

/// Default reference lookup: nothing known, scorer uses the neutral value
pub struct NoReferenceLookup;

impl ReferenceLookup for NoReferenceLookup {
    fn lookup(&self, _fingerprint: &str) -> Result<Vec<ReferenceTrack>, ExtractError> {
        Ok(Vec::new())
    }
}

/// The analyzer's bundle of collaborators, selected by config
#[derive(Clone)]
pub struct AnalyzerToolkit {
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub metadata_reader: Arc<dyn MetadataReader>,
    pub metadata_writer: Arc<dyn MetadataWriter>,
    pub defect_detector: Arc<dyn DefectDetector>,
    pub reference_lookup: Arc<dyn ReferenceLookup>,
    pub filename_parser: Arc<FilenameParser>,
}

impl AnalyzerToolkit {
    /// Wire up the default implementations per config
    pub fn from_config(config: &CleanupConfig) -> Result<Self, shellac_common::Error> {
        let fingerprinter: Arc<dyn Fingerprinter> = if config.enable_fingerprinting {
            Arc::new(EnvelopeFingerprinter::new())
        } else {
            Arc::new(NoopFingerprinter)
        };

        Ok(Self {
            fingerprinter,
            metadata_reader: Arc::new(TagReader::new()),
            metadata_writer: Arc::new(TagWriter::new(config.protected_roots.clone())),
            defect_detector: Arc::new(DecodeScan::new()),
            reference_lookup: Arc::new(NoReferenceLookup),
            filename_parser: Arc::new(FilenameParser::new(&config.filename_patterns)?),
        })
    }
}
