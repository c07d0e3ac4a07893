//! File analyzer
//!
//! Attaches to each discovered file everything the rest of the pipeline
//! needs: content hash, tag metadata (with filename-parse fallback),
//! fingerprint, defect report, and the quality score. Results are
//! persisted against the file row and the file moves to `analyzed`.
//!
//! Failure policy: a hash failure is fatal for the file (it cannot be
//! grouped); metadata and fingerprint failures are recorded and the file
//! continues; a defect-scan failure is treated as health 0, which sends
//! the file to quarantine downstream. No per-file failure blocks the
//! batch.

use crate::db::files::FileRecord;
use crate::db::{self, StoreError};
use crate::extractors::envelope_fingerprinter::probe_attributes;
use crate::extractors::{
    AnalyzerToolkit, DefectReport, ExtractError, TagData, TechnicalAttributes,
};
use crate::services::quality_scorer::{self, ScoreInputs};
use shellac_common::config::CleanupConfig;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How one file came out of analysis
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Analyzed and persisted; carries the final score
    Analyzed { final_score: f64 },
    /// Marked failed in the store; carries the recorded error kind
    Failed { error: String },
}

pub struct FileAnalyzer {
    pool: SqlitePool,
    toolkit: AnalyzerToolkit,
    weights: shellac_common::config::QualityWeights,
    extractor_timeout: Duration,
    defect_sample_duration_sec: f64,
}

impl FileAnalyzer {
    pub fn new(pool: SqlitePool, toolkit: AnalyzerToolkit, config: &CleanupConfig) -> Self {
        Self {
            pool,
            toolkit,
            weights: config.quality_weights,
            extractor_timeout: Duration::from_secs(config.extractor_timeout_sec.max(1)),
            defect_sample_duration_sec: 60.0,
        }
    }

    /// Analyze one file end to end. Store errors propagate; per-file
    /// analysis errors are captured into the file row instead.
    pub async fn process(&self, file: &FileRecord) -> Result<AnalysisOutcome, StoreError> {
        let path = PathBuf::from(&file.absolute_path);

        // 1. Content hash; fatal for the file when it fails
        let content_hash = match self.hash_file(&path).await {
            Ok(hash) => hash,
            Err(e) => {
                let error = format!("hash: {}", e);
                tracing::error!(path = %path.display(), error = %e, "Hash failed");
                db::files::mark_failed(&self.pool, file.id, &error).await?;
                return Ok(AnalysisOutcome::Failed { error });
            }
        };

        // 2. Metadata: tag, then filename parse for missing fields
        let mut defects_from_analysis: Vec<String> = Vec::new();
        let (tag_data, metadata_source) = match self.read_metadata(&path).await {
            Ok(data) => {
                let from_tag = data.artist.is_some() || data.title.is_some();
                let merged = self.fill_from_filename(&path, data);
                let source = if from_tag { "tag" } else { "filename-parse" };
                (merged, source)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Metadata read failed");
                defects_from_analysis.push("metadata-unreadable".to_string());
                (self.fill_from_filename(&path, TagData::default()), "filename-parse")
            }
        };

        // 3. Fingerprint; failure only disables acoustic grouping
        let fingerprint = if self.toolkit.fingerprinter.enabled() {
            match self.compute_fingerprint(&path).await {
                Ok(fp) => Some(fp),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Fingerprint failed");
                    None
                }
            }
        } else {
            None
        };

        // Technical attributes come with the fingerprint; probe directly
        // when there is none
        let attributes = match &fingerprint {
            Some(fp) => fp.attributes.clone(),
            None => self.probe_attributes_only(&path).await.unwrap_or_default(),
        };

        // 4. Defect scan; failure means health 0 and quarantine downstream
        let report = match self.scan_defects(&path).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Defect scan failed");
                DefectReport {
                    health_score: 0,
                    defects: vec!["scan-error".to_string()],
                    clipping_ratio: None,
                    silence_ratio: None,
                    dynamic_range_db: None,
                }
            }
        };

        // 5. Quality score over the recorded facts
        let references = fingerprint
            .as_ref()
            .and_then(|fp| self.toolkit.reference_lookup.lookup(&fp.fingerprint).ok())
            .unwrap_or_default();

        let mut defects = report.defects.clone();
        defects.extend(defects_from_analysis);

        let inputs = ScoreInputs {
            codec: attributes.codec.clone(),
            bitrate_kbps: attributes.bitrate_kbps,
            sample_rate_hz: attributes.sample_rate_hz,
            health_score: report.health_score,
            defects: defects.clone(),
            clipping_ratio: report.clipping_ratio,
            silence_ratio: report.silence_ratio,
            dynamic_range_db: report.dynamic_range_db,
            references,
        };
        let breakdown = quality_scorer::score(&inputs, &self.weights);

        // 6. Persist everything against the file row
        let fingerprint_id = match &fingerprint {
            Some(fp) => Some(
                db::fingerprints::get_or_insert(
                    &self.pool,
                    &db::fingerprints::FingerprintRow {
                        id: 0,
                        fingerprint: fp.fingerprint.clone(),
                        duration_sec: Some(fp.attributes.duration_sec),
                        sample_rate_hz: Some(fp.attributes.sample_rate_hz as i64),
                        bit_depth: fp.attributes.bit_depth.map(|b| b as i64),
                        channels: Some(fp.attributes.channels as i64),
                        codec: Some(fp.attributes.codec.clone()),
                        bitrate_kbps: Some(fp.attributes.bitrate_kbps as i64),
                    },
                )
                .await?,
            ),
            None => None,
        };

        let has_any_metadata = tag_data.artist.is_some()
            || tag_data.title.is_some()
            || tag_data.album.is_some()
            || tag_data.year.is_some()
            || tag_data.genre.is_some();
        let metadata_id = if has_any_metadata {
            Some(
                db::metadata::get_or_insert(
                    &self.pool,
                    &db::metadata::MetadataRow {
                        id: 0,
                        artist: tag_data.artist.clone(),
                        title: tag_data.title.clone(),
                        album: tag_data.album.clone(),
                        year: tag_data.year.map(|y| y as i64),
                        genre: tag_data.genre.clone(),
                        track_number: tag_data.track_number.map(|t| t as i64),
                        disc_number: tag_data.disc_number.map(|d| d as i64),
                        source: metadata_source.to_string(),
                    },
                )
                .await?,
            )
        } else {
            None
        };

        db::quality::upsert(
            &self.pool,
            &db::quality::QualityRow {
                id: 0,
                file_id: file.id,
                technical_score: breakdown.technical,
                audio_fidelity_score: breakdown.fidelity,
                integrity_score: breakdown.integrity,
                reference_score: breakdown.reference,
                final_score: breakdown.final_score,
                grade: breakdown.grade,
                recommended_action: breakdown.recommended_action,
                defects,
                health_score: report.health_score as i64,
                clipping_ratio: report.clipping_ratio,
                silence_ratio: report.silence_ratio,
                duration_sec: duration_or_none(&attributes),
            },
        )
        .await?;

        db::files::attach_analysis(
            &self.pool,
            file.id,
            &content_hash,
            fingerprint_id,
            metadata_id,
            breakdown.final_score,
        )
        .await?;

        tracing::debug!(
            path = %path.display(),
            score = breakdown.final_score,
            grade = breakdown.grade.as_str(),
            "File analyzed"
        );

        Ok(AnalysisOutcome::Analyzed {
            final_score: breakdown.final_score,
        })
    }

    /// Streamed SHA-256 over 1 MiB chunks, off the async runtime
    async fn hash_file(&self, path: &Path) -> Result<String, ExtractError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<String, ExtractError> {
            use sha2::{Digest, Sha256};
            use std::io::Read;

            let mut file = std::fs::File::open(&path)?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; 1024 * 1024];

            loop {
                let bytes_read = file.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }

            Ok(format!("{:x}", hasher.finalize()))
        })
        .await
        .map_err(|e| ExtractError::Decode(format!("Hash task failed: {}", e)))?
    }

    async fn read_metadata(&self, path: &Path) -> Result<TagData, ExtractError> {
        let reader = self.toolkit.metadata_reader.clone();
        let path = path.to_path_buf();
        self.with_timeout("metadata", tokio::task::spawn_blocking(move || reader.read(&path)))
            .await
    }

    async fn compute_fingerprint(
        &self,
        path: &Path,
    ) -> Result<crate::extractors::AudioFingerprint, ExtractError> {
        let fingerprinter = self.toolkit.fingerprinter.clone();
        let path = path.to_path_buf();
        self.with_timeout(
            "fingerprint",
            tokio::task::spawn_blocking(move || fingerprinter.fingerprint(&path)),
        )
        .await
    }

    async fn scan_defects(&self, path: &Path) -> Result<DefectReport, ExtractError> {
        let detector = self.toolkit.defect_detector.clone();
        let sample = self.defect_sample_duration_sec;
        let path = path.to_path_buf();
        self.with_timeout(
            "defect-scan",
            tokio::task::spawn_blocking(move || detector.scan(&path, sample)),
        )
        .await
    }

    async fn probe_attributes_only(&self, path: &Path) -> Option<TechnicalAttributes> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_attributes(&path).ok())
            .await
            .ok()
            .flatten()
    }

    async fn with_timeout<T>(
        &self,
        what: &'static str,
        task: tokio::task::JoinHandle<Result<T, ExtractError>>,
    ) -> Result<T, ExtractError> {
        match tokio::time::timeout(self.extractor_timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| ExtractError::Decode(format!("{} task failed: {}", what, e)))?
            }
            Err(_) => Err(ExtractError::Decode(format!(
                "{} timed out after {:?}",
                what, self.extractor_timeout
            ))),
        }
    }

    fn fill_from_filename(&self, path: &Path, mut data: TagData) -> TagData {
        if data.artist.is_some() && data.title.is_some() {
            return data;
        }
        let parsed = self.toolkit.filename_parser.parse(path);
        if data.artist.is_none() {
            data.artist = parsed.artist;
        }
        if data.title.is_none() {
            data.title = parsed.title;
        }
        if data.year.is_none() {
            data.year = parsed.year;
        }
        data
    }
}

fn duration_or_none(attributes: &TechnicalAttributes) -> Option<f64> {
    if attributes.duration_sec > 0.0 {
        Some(attributes.duration_sec)
    } else {
        None
    }
}
