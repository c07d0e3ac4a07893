//! Quality grading types

use serde::{Deserialize, Serialize};

/// Letter grade on the fixed step mapping over the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    APlus,
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    D,
    F,
}

impl Grade {
    /// Grade for a final score in [0, 100]
    pub fn from_score(score: f64) -> Grade {
        if score >= 95.0 {
            Grade::APlus
        } else if score >= 90.0 {
            Grade::A
        } else if score >= 85.0 {
            Grade::AMinus
        } else if score >= 80.0 {
            Grade::BPlus
        } else if score >= 75.0 {
            Grade::B
        } else if score >= 70.0 {
            Grade::BMinus
        } else if score >= 65.0 {
            Grade::CPlus
        } else if score >= 60.0 {
            Grade::C
        } else if score >= 55.0 {
            Grade::CMinus
        } else if score >= 50.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Grade> {
        match s {
            "A+" => Some(Grade::APlus),
            "A" => Some(Grade::A),
            "A-" => Some(Grade::AMinus),
            "B+" => Some(Grade::BPlus),
            "B" => Some(Grade::B),
            "B-" => Some(Grade::BMinus),
            "C+" => Some(Grade::CPlus),
            "C" => Some(Grade::C),
            "C-" => Some(Grade::CMinus),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

/// What the scorer recommends doing with the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Keep,
    Replace,
    Quarantine,
    DeleteDuplicate,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Keep => "keep",
            RecommendedAction::Replace => "replace",
            RecommendedAction::Quarantine => "quarantine",
            RecommendedAction::DeleteDuplicate => "delete_duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<RecommendedAction> {
        match s {
            "keep" => Some(RecommendedAction::Keep),
            "replace" => Some(RecommendedAction::Replace),
            "quarantine" => Some(RecommendedAction::Quarantine),
            "delete_duplicate" => Some(RecommendedAction::DeleteDuplicate),
            _ => None,
        }
    }
}

/// Component scores plus the weighted result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub technical: f64,
    pub fidelity: f64,
    pub integrity: f64,
    /// None when no reference was available; the neutral default was used
    pub reference: Option<f64>,
    pub final_score: f64,
    pub grade: Grade,
    pub recommended_action: RecommendedAction,
}
