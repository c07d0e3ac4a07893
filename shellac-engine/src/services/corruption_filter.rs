//! Corruption filter
//!
//! Splits the analyzed stream into healthy and quarantine sub-streams
//! before grouping, so a corrupted file can never be selected as the
//! best version of anything. The rules are pure over the recorded
//! quality row; applying them (status flips, quarantine moves) is the
//! orchestrator's phase work.

use crate::db::quality::QualityRow;
use shellac_common::config::CleanupConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Outcome of the filter rules for one file
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Healthy,
    /// Critically corrupted; reasons listed for the audit trail
    Corrupted { reasons: Vec<String> },
}

impl FilterVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, FilterVerdict::Healthy)
    }
}

pub struct CorruptionFilter {
    min_health_score: i64,
    critical_defects: HashSet<String>,
    min_duration_sec: f64,
    max_duration_sec: f64,
}

impl CorruptionFilter {
    pub fn new(config: &CleanupConfig) -> Self {
        Self {
            min_health_score: config.min_health_score as i64,
            critical_defects: config.critical_defects.iter().cloned().collect(),
            min_duration_sec: config.min_duration_sec,
            max_duration_sec: config.max_duration_sec,
        }
    }

    /// Evaluate the filter rules against one recorded analysis.
    ///
    /// A file is critically corrupted when any rule trips: low health,
    /// a critical defect code, duration out of bounds, clipping above
    /// 5%, or silence above 80%. Unmeasured values trip nothing.
    pub fn evaluate(&self, quality: &QualityRow) -> FilterVerdict {
        let mut reasons = Vec::new();

        if quality.health_score < self.min_health_score {
            reasons.push(format!(
                "health score {} below minimum {}",
                quality.health_score, self.min_health_score
            ));
        }

        for defect in &quality.defects {
            if self.critical_defects.contains(defect) {
                reasons.push(format!("critical defect: {}", defect));
            }
        }

        if let Some(duration) = quality.duration_sec {
            if duration < self.min_duration_sec {
                reasons.push(format!(
                    "duration {:.1}s below minimum {:.1}s",
                    duration, self.min_duration_sec
                ));
            } else if duration > self.max_duration_sec {
                reasons.push(format!(
                    "duration {:.1}s above maximum {:.1}s",
                    duration, self.max_duration_sec
                ));
            }
        }

        if let Some(clipping) = quality.clipping_ratio {
            if clipping > 0.05 {
                reasons.push(format!("clipping ratio {:.1}%", clipping * 100.0));
            }
        }
        if let Some(silence) = quality.silence_ratio {
            if silence > 0.80 {
                reasons.push(format!("silence ratio {:.0}%", silence * 100.0));
            }
        }

        if reasons.is_empty() {
            FilterVerdict::Healthy
        } else {
            FilterVerdict::Corrupted { reasons }
        }
    }
}

/// Destination for a quarantined file inside the rejected tree
pub fn quarantine_destination(rejected_root: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    rejected_root.join("corrupted").join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grade, RecommendedAction};

    fn healthy_row() -> QualityRow {
        QualityRow {
            id: 0,
            file_id: 1,
            technical_score: 90.0,
            audio_fidelity_score: 90.0,
            integrity_score: 100.0,
            reference_score: None,
            final_score: 85.0,
            grade: Grade::AMinus,
            recommended_action: RecommendedAction::Keep,
            defects: vec![],
            health_score: 95,
            clipping_ratio: Some(0.001),
            silence_ratio: Some(0.05),
            duration_sec: Some(240.0),
        }
    }

    fn filter() -> CorruptionFilter {
        CorruptionFilter::new(&CleanupConfig::default())
    }

    #[test]
    fn test_healthy_file_passes() {
        assert_eq!(filter().evaluate(&healthy_row()), FilterVerdict::Healthy);
    }

    #[test]
    fn test_low_health_score_quarantines() {
        let mut row = healthy_row();
        row.health_score = 49;
        let verdict = filter().evaluate(&row);
        assert!(!verdict.is_healthy());
    }

    #[test]
    fn test_critical_defect_quarantines() {
        let mut row = healthy_row();
        row.defects = vec!["truncation".to_string()];
        match filter().evaluate(&row) {
            FilterVerdict::Corrupted { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("truncation")));
            }
            FilterVerdict::Healthy => panic!("Expected quarantine"),
        }
    }

    #[test]
    fn test_non_critical_defect_passes() {
        let mut row = healthy_row();
        row.defects = vec!["flat-dynamics".to_string()];
        assert!(filter().evaluate(&row).is_healthy());
    }

    #[test]
    fn test_duration_bounds() {
        let mut row = healthy_row();
        row.duration_sec = Some(5.0);
        assert!(!filter().evaluate(&row).is_healthy());

        row.duration_sec = Some(4000.0);
        assert!(!filter().evaluate(&row).is_healthy());

        // Unknown duration trips nothing
        row.duration_sec = None;
        assert!(filter().evaluate(&row).is_healthy());
    }

    #[test]
    fn test_clipping_and_silence_ratios() {
        let mut row = healthy_row();
        row.clipping_ratio = Some(0.06);
        assert!(!filter().evaluate(&row).is_healthy());

        let mut row = healthy_row();
        row.silence_ratio = Some(0.85);
        assert!(!filter().evaluate(&row).is_healthy());
    }

    #[test]
    fn test_multiple_reasons_all_reported() {
        let mut row = healthy_row();
        row.health_score = 10;
        row.defects = vec!["header-corruption".to_string()];
        row.duration_sec = Some(2.0);
        match filter().evaluate(&row) {
            FilterVerdict::Corrupted { reasons } => assert_eq!(reasons.len(), 3),
            FilterVerdict::Healthy => panic!("Expected quarantine"),
        }
    }

    #[test]
    fn test_quarantine_destination_under_corrupted() {
        let dest = quarantine_destination(Path::new("/rej"), Path::new("/in/bad.mp3"));
        assert_eq!(dest, PathBuf::from("/rej/corrupted/bad.mp3"));
    }
}
