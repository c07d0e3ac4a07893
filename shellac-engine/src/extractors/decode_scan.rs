//! Decode-based defect detector
//!
//! Default [`DefectDetector`]: decodes the stream and derives defect
//! codes from what actually comes out. A file that will not probe is
//! header-corrupt; one that decodes far short of its declared duration
//! is truncated; ratios come from the analysis window.

use super::decode::decode_audio_file;
use super::{DefectDetector, DefectReport, ExtractError};
use std::path::Path;

/// Samples with |s| above this count as clipped
const CLIP_THRESHOLD: f32 = 0.985;
/// Samples with |s| below this count as silence
const SILENCE_THRESHOLD: f32 = 0.001;
/// Decoded duration under this fraction of declared means truncation
const TRUNCATION_RATIO: f64 = 0.90;

pub struct DecodeScan;

impl DecodeScan {
    pub fn new() -> Self {
        Self
    }

    fn analyze_window(samples: &[f32]) -> (f64, f64, Option<f64>) {
        if samples.is_empty() {
            return (0.0, 1.0, None);
        }

        let total = samples.len() as f64;
        let clipped = samples.iter().filter(|s| s.abs() >= CLIP_THRESHOLD).count() as f64;
        let silent = samples.iter().filter(|s| s.abs() < SILENCE_THRESHOLD).count() as f64;

        // Dynamic range from short RMS windows: loud (p95) vs quiet (p5)
        let window = (samples.len() / 256).max(1024).min(samples.len());
        let mut rms: Vec<f64> = samples
            .chunks(window)
            .map(|chunk| {
                let sum_sq: f64 = chunk.iter().map(|s| (*s as f64) * (*s as f64)).sum();
                (sum_sq / chunk.len() as f64).sqrt()
            })
            .filter(|r| *r > 1e-9)
            .collect();

        let dynamic_range_db = if rms.len() >= 4 {
            rms.sort_by(|a, b| a.total_cmp(b));
            let quiet = rms[rms.len() / 20];
            let loud = rms[rms.len() - 1 - rms.len() / 20];
            Some(20.0 * (loud / quiet).log10())
        } else {
            None
        };

        (clipped / total, silent / total, dynamic_range_db)
    }
}

impl Default for DecodeScan {
    fn default() -> Self {
        Self::new()
    }
}

impl DefectDetector for DecodeScan {
    fn scan(&self, path: &Path, sample_duration_sec: f64) -> Result<DefectReport, ExtractError> {
        let decoded = match decode_audio_file(path, Some(sample_duration_sec.max(1.0))) {
            Ok(decoded) => decoded,
            Err(ExtractError::Io(e)) => return Err(ExtractError::Io(e)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Probe failed, header corrupt");
                return Ok(DefectReport {
                    health_score: 0,
                    defects: vec!["header-corruption".to_string()],
                    clipping_ratio: None,
                    silence_ratio: None,
                    dynamic_range_db: None,
                });
            }
        };

        let mut defects = Vec::new();
        let mut health: i32 = 100;

        if decoded.samples.is_empty() {
            return Ok(DefectReport {
                health_score: 0,
                defects: vec!["header-corruption".to_string()],
                clipping_ratio: None,
                silence_ratio: None,
                dynamic_range_db: None,
            });
        }

        if decoded.decode_errors > 0 {
            defects.push("decode-error".to_string());
            health -= (10 * decoded.decode_errors.min(5)) as i32;
        }

        if let Some(declared) = decoded.declared_duration_sec {
            if declared > 1.0 && decoded.decoded_duration_sec < declared * TRUNCATION_RATIO {
                defects.push("truncation".to_string());
                health -= 60;
            }
        }

        let (clipping_ratio, silence_ratio, dynamic_range_db) =
            Self::analyze_window(&decoded.samples);

        if silence_ratio > 0.999 {
            defects.push("complete-silence".to_string());
            health -= 100;
        }
        if clipping_ratio > 0.05 {
            defects.push("clipping".to_string());
            health -= 20;
        }
        if let Some(dr) = dynamic_range_db {
            if dr < 3.0 {
                defects.push("flat-dynamics".to_string());
                health -= 10;
            }
        }

        let report = DefectReport {
            health_score: health.clamp(0, 100) as u8,
            defects,
            clipping_ratio: Some(clipping_ratio),
            silence_ratio: Some(silence_ratio),
            dynamic_range_db,
        };

        tracing::debug!(
            path = %path.display(),
            health = report.health_score,
            defects = ?report.defects,
            "Defect scan complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_file_reports_header_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mp3");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let report = DecodeScan::new().scan(&path, 30.0).unwrap();
        assert_eq!(report.health_score, 0);
        assert!(report.defects.contains(&"header-corruption".to_string()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = DecodeScan::new().scan(Path::new("/nonexistent/a.mp3"), 30.0);
        assert!(matches!(result, Err(ExtractError::Io(_))));
    }

    #[test]
    fn test_analysis_window_ratios() {
        // Half silence, half loud square wave with clipping
        let mut samples = vec![0.0f32; 22050];
        samples.extend(std::iter::repeat(0.99f32).take(22050));

        let (clipping, silence, _) = DecodeScan::analyze_window(&samples);
        assert!((silence - 0.5).abs() < 0.01, "silence {}", silence);
        assert!((clipping - 0.5).abs() < 0.01, "clipping {}", clipping);
    }

    #[test]
    fn test_empty_window_is_all_silence() {
        let (clipping, silence, dr) = DecodeScan::analyze_window(&[]);
        assert_eq!(clipping, 0.0);
        assert_eq!(silence, 1.0);
        assert!(dr.is_none());
    }
}
