//! Phase 5: ORGANIZATION
//!
//! Walks the groups and singleton files in batches, one transaction per
//! batch. A failed batch is already rolled back by the transaction
//! manager; the orchestrator retries it a bounded number of times before
//! giving up on the run.

use super::CleanupOrchestrator;
use crate::db;
use crate::models::CleanupSession;
use crate::services::organizer::OrganizeUnit;
use anyhow::Result;
use shellac_common::events::{CleanupEvent, Phase};

/// Per-batch retry bound after a rollback
const MAX_BATCH_RETRIES: u32 = 2;

impl CleanupOrchestrator {
    pub(super) async fn phase_organization(&mut self, session: &mut CleanupSession) -> Result<u64> {
        let mut units: Vec<OrganizeUnit> = Vec::new();
        for group_id in db::groups::all_group_ids(&self.pool).await? {
            units.push(OrganizeUnit::Group(group_id));
        }
        for file_id in db::groups::ungrouped_healthy_file_ids(&self.pool).await? {
            units.push(OrganizeUnit::Singleton(file_id));
        }

        tracing::info!(units = units.len(), "Organizing");
        let mut processed: u64 = 0;

        for chunk in units.chunks(self.config.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                tracing::info!("Organization cancelled, draining");
                break;
            }

            let mut attempt = 0;
            let summary = loop {
                match self.organizer.organize_batch(&self.txn_manager, chunk).await {
                    Ok(summary) => break summary,
                    Err(e) if attempt < MAX_BATCH_RETRIES => {
                        attempt += 1;
                        tracing::warn!(
                            error = %e,
                            attempt,
                            "Organize batch rolled back, retrying"
                        );
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            session.counters.organized += summary.organized;
            session.counters.rejected += summary.rejected;
            session.counters.needs_review += summary.needs_review;
            session.counters.bytes_copied += summary.bytes_copied;
            processed += summary.organized + summary.rejected + summary.needs_review;

            for (source, destination) in &summary.placements {
                self.event_bus.emit_lossy(CleanupEvent::FileOrganized {
                    session_id: session.session_id,
                    source_path: source.clone(),
                    destination_path: destination.clone(),
                });
            }
            for (path, category) in &summary.rejections {
                self.event_bus.emit_lossy(CleanupEvent::FileRejected {
                    session_id: session.session_id,
                    path: path.clone(),
                    category: category.clone(),
                });
            }

            let batch_id = self.take_batch_id();
            self.checkpointer
                .force(Phase::Organization, batch_id, &session.counters)
                .await?;
            self.event_bus.emit_lossy(CleanupEvent::BatchCommitted {
                session_id: session.session_id,
                phase: Phase::Organization,
                batch_id,
                operations: summary.organized + summary.rejected,
            });
        }

        tracing::info!(
            organized = session.counters.organized,
            rejected = session.counters.rejected,
            needs_review = session.counters.needs_review,
            "Organization complete"
        );
        Ok(processed)
    }
}
