//! Phase 3: CORRUPTION FILTER
//!
//! Evaluates the filter rules against every `analyzed` file. Healthy
//! files move on to grouping; critically corrupted files are quarantined
//! into the rejected tree with an audit entry. The quarantine moves for
//! a batch travel as one transaction.

use super::CleanupOrchestrator;
use crate::db;
use crate::db::files::{FileRecord, FileStatus};
use crate::db::rejections::RejectionCategory;
use crate::services::corruption_filter::{quarantine_destination, FilterVerdict};
use crate::services::transaction_manager::StagedOp;
use crate::models::CleanupSession;
use anyhow::Result;
use shellac_common::events::{CleanupEvent, Phase};
use std::collections::HashSet;
use std::path::PathBuf;

struct QuarantinePlan {
    file: FileRecord,
    destination: PathBuf,
    hash: Option<String>,
    reasons: Vec<String>,
}

impl CleanupOrchestrator {
    pub(super) async fn phase_filtering(&mut self, session: &mut CleanupSession) -> Result<u64> {
        let batch_size = self.config.batch_size as i64;
        let mut processed: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Corruption filter cancelled, draining");
                break;
            }

            let batch =
                db::files::load_batch_by_status(&self.pool, FileStatus::Analyzed, 0, batch_size)
                    .await?;
            if batch.is_empty() {
                break;
            }

            let mut quarantine: Vec<QuarantinePlan> = Vec::new();
            let mut planned_names: HashSet<PathBuf> = HashSet::new();

            for file in batch {
                let Some(quality) = db::quality::load_by_file(&self.pool, file.id).await? else {
                    tracing::warn!(file_id = file.id, "Analyzed file without quality row");
                    db::files::mark_failed(&self.pool, file.id, "missing quality analysis").await?;
                    session.counters.failed += 1;
                    processed += 1;
                    continue;
                };

                match self.corruption_filter.evaluate(&quality) {
                    FilterVerdict::Healthy => {
                        db::files::set_status(&self.pool, file.id, FileStatus::Healthy).await?;
                        session.counters.healthy += 1;
                        processed += 1;
                    }
                    FilterVerdict::Corrupted { reasons } => {
                        let source = PathBuf::from(&file.absolute_path);
                        let mut destination =
                            quarantine_destination(&self.config.rejected_root, &source);
                        let mut n = 2;
                        while planned_names.contains(&destination) || destination.exists() {
                            let stem = source
                                .file_stem()
                                .map(|s| s.to_string_lossy().to_string())
                                .unwrap_or_else(|| "file".to_string());
                            let ext = source
                                .extension()
                                .map(|e| format!(".{}", e.to_string_lossy()))
                                .unwrap_or_default();
                            destination = self
                                .config
                                .rejected_root
                                .join("corrupted")
                                .join(format!("{}_dup{}{}", stem, n, ext));
                            n += 1;
                        }
                        planned_names.insert(destination.clone());

                        quarantine.push(QuarantinePlan {
                            hash: file.content_hash.clone(),
                            file,
                            destination,
                            reasons,
                        });
                        processed += 1;
                    }
                }
            }

            if !quarantine.is_empty() {
                self.quarantine_batch(session, &quarantine).await?;
            }

            let batch_id = self.take_batch_id();
            self.checkpointer
                .force(Phase::CorruptionFilter, batch_id, &session.counters)
                .await?;
        }

        tracing::info!(
            healthy = session.counters.healthy,
            quarantined = session.counters.quarantined,
            "Corruption filter complete"
        );
        Ok(processed)
    }

    async fn quarantine_batch(
        &mut self,
        session: &mut CleanupSession,
        plans: &[QuarantinePlan],
    ) -> Result<()> {
        let txn_id = self.txn_manager.begin("quarantine corrupted files").await?;

        let corrupted_dir = self.config.rejected_root.join("corrupted");
        self.txn_manager
            .stage(txn_id, StagedOp::create_dir(&corrupted_dir))
            .await?;

        for plan in plans {
            let source = PathBuf::from(&plan.file.absolute_path);
            match plan.hash.as_deref() {
                Some(hash) => {
                    self.txn_manager
                        .stage(
                            txn_id,
                            StagedOp::copy(plan.file.id, &source, &plan.destination, hash),
                        )
                        .await?;
                    if !self.config.quarantine_copy {
                        self.txn_manager
                            .stage(
                                txn_id,
                                StagedOp::remove_source(
                                    plan.file.id,
                                    &source,
                                    &plan.destination,
                                    hash,
                                ),
                            )
                            .await?;
                    }
                }
                // No recorded hash means the source cannot be verified
                // after the copy; quarantine by copy and keep the original
                None => {
                    self.txn_manager
                        .stage(
                            txn_id,
                            StagedOp {
                                kind: crate::db::operations::OpKind::Copy,
                                file_id: Some(plan.file.id),
                                source: source.clone(),
                                destination: Some(plan.destination.clone()),
                                source_hash: None,
                            },
                        )
                        .await?;
                }
            }
        }

        self.txn_manager.execute(txn_id).await?;

        for plan in plans {
            // In dry-run the move stays pending, so there is no rejected
            // copy to record and no path change
            if !self.config.dry_run {
                db::rejections::append(
                    &self.pool,
                    plan.file.id,
                    RejectionCategory::Corrupted,
                    None,
                    None,
                    &plan.destination.to_string_lossy(),
                    &plan.file.absolute_path,
                    plan.hash.as_deref(),
                    &plan.reasons.join("; "),
                )
                .await?;
                if !self.config.quarantine_copy && plan.hash.is_some() {
                    db::files::update_path(
                        &self.pool,
                        plan.file.id,
                        &plan.destination.to_string_lossy(),
                    )
                    .await?;
                }
            }
            db::files::set_status(&self.pool, plan.file.id, FileStatus::Quarantined).await?;

            session.counters.quarantined += 1;
            self.event_bus.emit_lossy(CleanupEvent::FileQuarantined {
                session_id: session.session_id,
                path: plan.file.absolute_path.clone(),
                reasons: plan.reasons.clone(),
            });
        }

        Ok(())
    }
}
