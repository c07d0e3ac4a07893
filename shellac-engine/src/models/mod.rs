//! Pipeline-level domain types

pub mod quality;
pub mod session;

pub use quality::{Grade, QualityBreakdown, RecommendedAction};
pub use session::{CleanupSession, SessionCounters, SessionState};
