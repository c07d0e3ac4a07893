//! Quality scoring
//!
//! Pure function of recorded inputs: replaying it on the same inputs
//! yields the same score and grade. Component scores live in [0, 100];
//! the final score is their weighted sum rounded to one decimal.
//! Also home of the total tie-break order used for primary selection.

use crate::db::files::GroupingCandidate;
use crate::extractors::ReferenceTrack;
use crate::models::{Grade, QualityBreakdown, RecommendedAction};
use shellac_common::config::QualityWeights;
use std::cmp::Ordering;

/// Reference component used when no reference is known
pub const NEUTRAL_REFERENCE: f64 = 70.0;

/// Everything the scorer looks at, as recorded during analysis
#[derive(Debug, Clone, Default)]
pub struct ScoreInputs {
    /// Lowercased codec name ("flac", "mp3", ...)
    pub codec: String,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub health_score: u8,
    pub defects: Vec<String>,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
    pub dynamic_range_db: Option<f64>,
    pub references: Vec<ReferenceTrack>,
}

/// Compute the weighted quality breakdown
pub fn score(inputs: &ScoreInputs, weights: &QualityWeights) -> QualityBreakdown {
    let technical = technical_score(&inputs.codec, inputs.bitrate_kbps, inputs.sample_rate_hz);
    let fidelity = fidelity_score(
        inputs.clipping_ratio,
        inputs.silence_ratio,
        inputs.dynamic_range_db,
    );
    let integrity = integrity_score(&inputs.defects);
    let reference = reference_score(technical, &inputs.references);

    let final_raw = technical * weights.technical
        + fidelity * weights.fidelity
        + integrity * weights.integrity
        + reference.unwrap_or(NEUTRAL_REFERENCE) * weights.reference;
    let final_score = (final_raw * 10.0).round() / 10.0;

    let recommended_action = if inputs.health_score < 50 {
        RecommendedAction::Quarantine
    } else if final_score < 50.0 {
        RecommendedAction::Replace
    } else {
        RecommendedAction::Keep
    };

    QualityBreakdown {
        technical,
        fidelity,
        integrity,
        reference,
        final_score,
        grade: Grade::from_score(final_score),
        recommended_action,
    }
}

/// Format/bitrate/sample-rate component
fn technical_score(codec: &str, bitrate_kbps: u32, sample_rate_hz: u32) -> f64 {
    let base: f64 = match codec {
        "flac" => 100.0,
        "wav" => 98.0,
        "alac" => 95.0,
        "mp3" => {
            if bitrate_kbps >= 320 {
                90.0
            } else if bitrate_kbps >= 256 {
                80.0
            } else if bitrate_kbps >= 192 {
                70.0
            } else if bitrate_kbps >= 128 {
                50.0
            } else {
                35.0
            }
        }
        "ogg" | "aac" | "opus" => {
            if bitrate_kbps >= 256 {
                85.0
            } else if bitrate_kbps >= 192 {
                75.0
            } else if bitrate_kbps >= 128 {
                60.0
            } else {
                40.0
            }
        }
        "wma" => 60.0,
        _ => 50.0,
    };

    let adjusted = if sample_rate_hz > 0 && sample_rate_hz < 44100 {
        base - 10.0
    } else {
        base
    };
    adjusted.clamp(0.0, 100.0)
}

/// Dynamic range, clipping, silence component; unknown measurements are
/// neutral rather than penalized
fn fidelity_score(
    clipping_ratio: Option<f64>,
    silence_ratio: Option<f64>,
    dynamic_range_db: Option<f64>,
) -> f64 {
    let mut score = 100.0;

    if let Some(clipping) = clipping_ratio {
        score -= (clipping * 400.0).min(40.0);
    }
    if let Some(silence) = silence_ratio {
        if silence > 0.5 {
            score -= ((silence - 0.5) * 60.0).min(30.0);
        }
    }
    if let Some(dr) = dynamic_range_db {
        if dr < 6.0 {
            score -= 20.0;
        } else if dr < 10.0 {
            score -= 10.0;
        }
    }

    score.clamp(0.0, 100.0)
}

/// 100 minus per-defect penalties
fn integrity_score(defects: &[String]) -> f64 {
    let mut score: f64 = 100.0;
    for defect in defects {
        score -= match defect.as_str() {
            "header-corruption" => 80.0,
            "complete-silence" => 70.0,
            "truncation" => 60.0,
            "decode-error" => 40.0,
            "metadata-unreadable" => 30.0,
            "clipping" => 15.0,
            "flat-dynamics" => 10.0,
            _ => 20.0,
        };
    }
    score.clamp(0.0, 100.0)
}

/// Distance of this file's technical class to the best known reference;
/// None when no reference exists
fn reference_score(technical: f64, references: &[ReferenceTrack]) -> Option<f64> {
    let best = references
        .iter()
        .map(|r| r.quality_class)
        .fold(None, |acc: Option<f64>, q| {
            Some(acc.map_or(q, |a: f64| a.max(q)))
        })?;

    let shortfall = (best - technical).max(0.0);
    Some((100.0 - shortfall).clamp(0.0, 100.0))
}

/// Total order for primary selection: best candidate sorts first.
///
/// Final score, then preferred format, then bitrate, then size, then
/// lexicographically smallest path. The path step makes the order total,
/// so primary selection is deterministic under any worker scheduling.
pub fn primary_order(
    a: &GroupingCandidate,
    b: &GroupingCandidate,
    format_priority: &[String],
) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            format_rank(a.codec.as_deref(), format_priority)
                .cmp(&format_rank(b.codec.as_deref(), format_priority))
        })
        .then_with(|| b.bitrate_kbps.unwrap_or(0).cmp(&a.bitrate_kbps.unwrap_or(0)))
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.absolute_path.cmp(&b.absolute_path))
}

fn format_rank(codec: Option<&str>, format_priority: &[String]) -> usize {
    codec
        .and_then(|c| format_priority.iter().position(|f| f == c))
        .unwrap_or(format_priority.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flac_inputs() -> ScoreInputs {
        ScoreInputs {
            codec: "flac".to_string(),
            bitrate_kbps: 900,
            sample_rate_hz: 44100,
            health_score: 100,
            ..ScoreInputs::default()
        }
    }

    fn mp3_inputs(bitrate: u32) -> ScoreInputs {
        ScoreInputs {
            codec: "mp3".to_string(),
            bitrate_kbps: bitrate,
            sample_rate_hz: 44100,
            health_score: 100,
            ..ScoreInputs::default()
        }
    }

    fn candidate(path: &str, score: f64, codec: &str, bitrate: i64, size: i64) -> GroupingCandidate {
        GroupingCandidate {
            file_id: 0,
            absolute_path: path.to_string(),
            content_hash: "h".to_string(),
            size_bytes: size,
            fingerprint: None,
            duration_sec: None,
            codec: Some(codec.to_string()),
            bitrate_kbps: Some(bitrate),
            final_score: score,
        }
    }

    #[test]
    fn test_scoring_is_pure() {
        let weights = QualityWeights::default();
        let a = score(&flac_inputs(), &weights);
        let b = score(&flac_inputs(), &weights);
        assert_eq!(a.final_score, b.final_score);
        assert_eq!(a.grade, b.grade);
    }

    #[test]
    fn test_flac_beats_low_bitrate_mp3() {
        let weights = QualityWeights::default();
        let flac = score(&flac_inputs(), &weights);
        let mp3 = score(&mp3_inputs(128), &weights);
        // Clean FLAC with the neutral reference: 100/100/100/70 -> 89.5
        assert_eq!(flac.final_score, 89.5);
        assert!(mp3.final_score <= 90.0, "mp3 scored {}", mp3.final_score);
        assert!(flac.final_score > mp3.final_score);
    }

    #[test]
    fn test_clean_mp3_128_lands_around_70() {
        // Technical 50, fidelity 100, integrity 100, neutral reference 70
        let weights = QualityWeights::default();
        let result = score(&mp3_inputs(128), &weights);
        assert_eq!(result.final_score, 77.0);
        assert_eq!(result.grade, Grade::B);
    }

    #[test]
    fn test_neutral_reference_when_none_known() {
        let weights = QualityWeights::default();
        let result = score(&flac_inputs(), &weights);
        assert!(result.reference.is_none());
    }

    #[test]
    fn test_reference_shortfall_penalizes() {
        let weights = QualityWeights::default();
        let mut inputs = mp3_inputs(128);
        inputs.references = vec![ReferenceTrack {
            format: "flac".to_string(),
            bitrate_kbps: 900,
            quality_class: 100.0,
        }];
        let with_ref = score(&inputs, &weights);
        // Technical 50 vs reference class 100: shortfall 50
        assert_eq!(with_ref.reference, Some(50.0));

        let without = score(&mp3_inputs(128), &weights);
        assert!(with_ref.final_score < without.final_score);
    }

    #[test]
    fn test_critical_defects_tank_integrity() {
        let weights = QualityWeights::default();
        let mut inputs = mp3_inputs(320);
        inputs.health_score = 10;
        inputs.defects = vec!["truncation".to_string(), "decode-error".to_string()];
        let result = score(&inputs, &weights);
        assert_eq!(result.integrity, 0.0);
        assert_eq!(result.recommended_action, RecommendedAction::Quarantine);
    }

    #[test]
    fn test_final_score_rounded_to_one_decimal() {
        let weights = QualityWeights::default();
        let result = score(&mp3_inputs(192), &weights);
        let rounded = (result.final_score * 10.0).round() / 10.0;
        assert_eq!(result.final_score, rounded);
    }

    #[test]
    fn test_primary_order_by_score() {
        let priority = shellac_common::config::CleanupConfig::default().format_priority;
        let strong = candidate("/a.flac", 95.0, "flac", 900, 1);
        let weak = candidate("/b.mp3", 70.0, "mp3", 320, 999);
        assert_eq!(primary_order(&strong, &weak, &priority), Ordering::Less);
        assert_eq!(primary_order(&weak, &strong, &priority), Ordering::Greater);
    }

    #[test]
    fn test_equal_scores_use_format_priority() {
        let priority = shellac_common::config::CleanupConfig::default().format_priority;
        let flac = candidate("/b.flac", 80.0, "flac", 900, 1);
        let mp3 = candidate("/a.mp3", 80.0, "mp3", 320, 999);
        assert_eq!(primary_order(&flac, &mp3, &priority), Ordering::Less);
    }

    #[test]
    fn test_total_order_falls_through_to_path() {
        let priority = shellac_common::config::CleanupConfig::default().format_priority;
        let a = candidate("/a.mp3", 80.0, "mp3", 320, 100);
        let b = candidate("/b.mp3", 80.0, "mp3", 320, 100);
        assert_eq!(primary_order(&a, &b, &priority), Ordering::Less);
        assert_eq!(primary_order(&b, &a, &priority), Ordering::Greater);
        assert_eq!(primary_order(&a, &a, &priority), Ordering::Equal);
    }

    #[test]
    fn test_sort_puts_primary_first_and_ranks_rest() {
        let priority = shellac_common::config::CleanupConfig::default().format_priority;
        let mut group = vec![
            candidate("/c.mp3", 70.0, "mp3", 192, 10),
            candidate("/a.flac", 92.0, "flac", 900, 30),
            candidate("/b.mp3", 81.0, "mp3", 320, 20),
        ];
        group.sort_by(|a, b| primary_order(a, b, &priority));
        let paths: Vec<&str> = group.iter().map(|c| c.absolute_path.as_str()).collect();
        assert_eq!(paths, vec!["/a.flac", "/b.mp3", "/c.mp3"]);
    }
}
