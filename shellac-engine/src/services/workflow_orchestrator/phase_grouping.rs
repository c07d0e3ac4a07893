//! Phase 4: GROUPING
//!
//! Runs the duplicate grouper over the healthy set and reports the
//! groups it formed. Grouping works on store rows only; nothing touches
//! the filesystem here.

use super::CleanupOrchestrator;
use crate::db;
use crate::models::CleanupSession;
use anyhow::Result;
use shellac_common::events::{CleanupEvent, Phase};

impl CleanupOrchestrator {
    pub(super) async fn phase_grouping(&mut self, session: &mut CleanupSession) -> Result<u64> {
        if self.cancel.is_cancelled() {
            return Ok(0);
        }

        let summary = self.grouper.run().await?;
        session.counters.groups_formed += summary.hash_groups + summary.fingerprint_groups;

        for group_id in &summary.group_ids {
            if let Some(group) = db::groups::load_group(&self.pool, *group_id).await? {
                self.event_bus.emit_lossy(CleanupEvent::GroupFormed {
                    session_id: session.session_id,
                    group_id: group.id,
                    key_kind: group.key_kind.as_str().to_string(),
                    size: group.size as u64,
                });
            }
        }

        let batch_id = self.take_batch_id();
        self.checkpointer
            .force(Phase::Grouping, batch_id, &session.counters)
            .await?;

        Ok(summary.grouped_files)
    }
}
