//! Cleanup session state
//!
//! In-memory view of one pipeline run: where it is, what it has counted,
//! how it ended. Counters are persisted inside checkpoints as JSON so a
//! recovery run can pick the numbers back up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shellac_common::events::Phase;
use uuid::Uuid;

/// Terminal and non-terminal session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Counters accumulated across the run; serialized into checkpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    pub discovered: u64,
    pub analyzed: u64,
    pub failed: u64,
    pub quarantined: u64,
    pub healthy: u64,
    pub groups_formed: u64,
    pub organized: u64,
    pub rejected: u64,
    pub needs_review: u64,
    pub bytes_copied: u64,
}

/// One pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSession {
    pub session_id: Uuid,
    pub state: SessionState,
    pub phase: Phase,
    pub counters: SessionCounters,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CleanupSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: SessionState::Running,
            phase: Phase::Discovery,
            counters: SessionCounters::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Enter the next phase
    pub fn enter_phase(&mut self, phase: Phase) {
        tracing::info!(
            session_id = %self.session_id,
            phase = phase.as_str(),
            "Entering phase"
        );
        self.phase = phase;
    }

    /// Close out the session
    pub fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.ended_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0) as u64
    }
}

impl Default for CleanupSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_round_trip_as_json() {
        let mut counters = SessionCounters::default();
        counters.discovered = 120;
        counters.organized = 80;

        let json = serde_json::to_string(&counters).unwrap();
        let back: SessionCounters = serde_json::from_str(&json).unwrap();
        assert_eq!(back.discovered, 120);
        assert_eq!(back.organized, 80);
    }

    #[test]
    fn test_finish_sets_end_time() {
        let mut session = CleanupSession::new();
        assert!(session.ended_at.is_none());
        session.finish(SessionState::Completed);
        assert!(session.ended_at.is_some());
        assert_eq!(session.state, SessionState::Completed);
    }
}
