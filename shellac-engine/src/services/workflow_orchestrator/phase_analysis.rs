//! Phase 2: ANALYSIS
//!
//! Consumes `discovered` files in batches, running the per-file analyzer
//! across a worker pool. Per-file failures are recorded on the row and
//! never stall the batch; store failures abort the run.

use super::CleanupOrchestrator;
use crate::db;
use crate::db::files::FileStatus;
use crate::models::CleanupSession;
use crate::services::analyzer::AnalysisOutcome;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use shellac_common::events::{CleanupEvent, Phase};

impl CleanupOrchestrator {
    pub(super) async fn phase_analysis(&mut self, session: &mut CleanupSession) -> Result<u64> {
        // Decoded audio dominates analysis memory; the soft cap bounds how
        // many decodes run at once (one worker per ~128 MiB budgeted)
        let memory_workers =
            (self.config.memory_limit_bytes / (128 * 1024 * 1024)).max(1) as usize;
        let workers = self.config.worker_count().min(memory_workers);
        let batch_size = self.config.batch_size as i64;
        let mut processed: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Analysis cancelled, draining");
                break;
            }

            // Analysis moves files out of `discovered`, so each round
            // re-reads from the front
            let batch =
                db::files::load_batch_by_status(&self.pool, FileStatus::Discovered, 0, batch_size)
                    .await?;
            if batch.is_empty() {
                break;
            }

            tracing::debug!(files = batch.len(), workers, "Analyzing batch");

            let results: Vec<_> = stream::iter(batch.iter())
                .map(|file| {
                    let analyzer = &self.analyzer;
                    let cancel = self.cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some((file, analyzer.process(file).await))
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;

            for result in results.into_iter().flatten() {
                let (file, outcome) = result;
                match outcome? {
                    AnalysisOutcome::Analyzed { .. } => {
                        session.counters.analyzed += 1;
                        processed += 1;
                    }
                    AnalysisOutcome::Failed { error } => {
                        session.counters.failed += 1;
                        processed += 1;
                        self.event_bus.emit_lossy(CleanupEvent::FileFailed {
                            session_id: session.session_id,
                            path: file.absolute_path.clone(),
                            error,
                        });
                    }
                }
            }

            let batch_id = self.take_batch_id();
            self.checkpointer
                .force(Phase::Analysis, batch_id, &session.counters)
                .await?;
        }

        tracing::info!(
            analyzed = session.counters.analyzed,
            failed = session.counters.failed,
            "Analysis complete"
        );
        Ok(processed)
    }
}
