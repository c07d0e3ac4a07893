//! Event types and bus for pipeline progress
//!
//! Events are broadcast via [`EventBus`]; consumers (the CLI progress
//! printer, future report layers) subscribe independently. Emission is
//! lossy: a slow or absent subscriber never stalls the pipeline.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline phase names carried in events and checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Analysis,
    CorruptionFilter,
    Grouping,
    Organization,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Analysis => "analysis",
            Phase::CorruptionFilter => "corruption_filter",
            Phase::Grouping => "grouping",
            Phase::Organization => "organization",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        match s {
            "discovery" => Some(Phase::Discovery),
            "analysis" => Some(Phase::Analysis),
            "corruption_filter" => Some(Phase::CorruptionFilter),
            "grouping" => Some(Phase::Grouping),
            "organization" => Some(Phase::Organization),
            _ => None,
        }
    }
}

/// Cleanup pipeline events
///
/// Serializable so a future SSE/report layer can forward them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CleanupEvent {
    /// A cleanup session began
    SessionStarted {
        session_id: Uuid,
        source_roots: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A phase began processing
    PhaseStarted { session_id: Uuid, phase: Phase },

    /// A phase finished; counts are phase-specific
    PhaseCompleted {
        session_id: Uuid,
        phase: Phase,
        processed: u64,
    },

    /// A batch transaction committed
    BatchCommitted {
        session_id: Uuid,
        phase: Phase,
        batch_id: i64,
        operations: u64,
    },

    /// A checkpoint row was written
    CheckpointWritten {
        session_id: Uuid,
        phase: Phase,
        last_batch_id: i64,
    },

    /// A file failed analysis and was marked failed
    FileFailed {
        session_id: Uuid,
        path: String,
        error: String,
    },

    /// A file was quarantined by the corruption filter
    FileQuarantined {
        session_id: Uuid,
        path: String,
        reasons: Vec<String>,
    },

    /// A duplicate group was formed
    GroupFormed {
        session_id: Uuid,
        group_id: i64,
        key_kind: String,
        size: u64,
    },

    /// A primary landed in the organized tree
    FileOrganized {
        session_id: Uuid,
        source_path: String,
        destination_path: String,
    },

    /// A non-primary or conflicting file was rejected
    FileRejected {
        session_id: Uuid,
        path: String,
        category: String,
    },

    /// Session finished
    SessionCompleted {
        session_id: Uuid,
        duration_seconds: u64,
        organized: u64,
        rejected: u64,
        failed: u64,
    },

    /// Session stopped before completion (signal or operator request)
    SessionCancelled { session_id: Uuid },
}

/// Broadcast bus for [`CleanupEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CleanupEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CleanupEvent> {
        self.tx.subscribe()
    }

    /// Emit without caring whether anyone listens
    pub fn emit_lossy(&self, event: CleanupEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
