//! Phase 1: DISCOVERY
//!
//! Streams candidates out of the filesystem walker and upserts them as
//! `discovered`. Already-known paths are ignored, which is what lets a
//! resumed run re-walk the same roots without duplicating work.

use super::CleanupOrchestrator;
use crate::db;
use crate::models::CleanupSession;
use crate::services::discovery::DiscoveryProducer;
use anyhow::Result;
use shellac_common::events::Phase;

impl CleanupOrchestrator {
    pub(super) async fn phase_discovery(&mut self, session: &mut CleanupSession) -> Result<u64> {
        let producer = DiscoveryProducer::new(&self.config);
        let mut rx = producer.stream(self.config.batch_size * 2);

        let mut seen: u64 = 0;
        let mut inserted: u64 = 0;
        let mut in_batch: usize = 0;

        while let Some(found) = rx.recv().await {
            if self.cancel.is_cancelled() {
                tracing::info!("Discovery cancelled, draining");
                break;
            }

            seen += 1;
            let path = found.absolute_path.to_string_lossy();
            let new_row = db::files::upsert_discovered(
                &self.pool,
                &path,
                found.size_bytes as i64,
                found.modified_time,
            )
            .await?;

            if new_row.is_some() {
                inserted += 1;
                session.counters.discovered += 1;
                in_batch += 1;
            }

            if in_batch >= self.config.batch_size {
                in_batch = 0;
                let batch_id = self.take_batch_id();
                self.checkpointer
                    .force(Phase::Discovery, batch_id, &session.counters)
                    .await?;
            } else {
                let batch_id = self.next_batch_id;
                self.checkpointer
                    .maybe(Phase::Discovery, batch_id, &session.counters)
                    .await?;
            }
        }

        tracing::info!(seen, inserted, "Discovery complete");
        Ok(inserted)
    }
}
