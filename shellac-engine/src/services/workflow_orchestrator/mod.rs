//! Cleanup workflow orchestrator
//!
//! Owns the phase sequence and every collaborator:
//! Discovery -> Analysis -> Corruption Filter -> Grouping -> Organization
//!
//! Each phase consumes the previous phase's ready set from the store in
//! batches, so a restarted run naturally picks up where the last one
//! stopped. Phase boundaries and batch boundaries write checkpoints;
//! cancellation is observed between files and between batches, and a
//! cancelled run still ends with a forced checkpoint.

use crate::db;
use crate::extractors::AnalyzerToolkit;
use crate::models::{CleanupSession, SessionState};
use crate::services::checkpointer::Checkpointer;
use crate::services::corruption_filter::CorruptionFilter;
use crate::services::duplicate_grouper::DuplicateGrouper;
use crate::services::organizer::Organizer;
use crate::services::rejection_manifest::RejectionManifest;
use crate::services::transaction_manager::TransactionManager;
use crate::services::FileAnalyzer;
use anyhow::Result;
use chrono::Utc;
use shellac_common::config::CleanupConfig;
use shellac_common::events::{CleanupEvent, EventBus, Phase};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

mod phase_analysis;
mod phase_discovery;
mod phase_filtering;
mod phase_grouping;
mod phase_organization;
pub mod statistics;

/// How a run ended; the binary maps this to an exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Discovery found nothing to do
    NoWork,
    /// Everything processed, no per-file failures
    Clean,
    /// Pipeline finished but some files failed analysis
    CompletedWithFailures,
    /// Stopped by signal or operator; progress checkpointed
    Cancelled,
}

pub struct CleanupOrchestrator {
    pool: SqlitePool,
    config: CleanupConfig,
    event_bus: EventBus,
    analyzer: FileAnalyzer,
    corruption_filter: CorruptionFilter,
    grouper: DuplicateGrouper,
    organizer: Organizer,
    txn_manager: TransactionManager,
    manifest: RejectionManifest,
    checkpointer: Checkpointer,
    cancel: CancellationToken,
    /// Monotonic across the whole run, continued from the last checkpoint
    next_batch_id: i64,
}

impl CleanupOrchestrator {
    pub fn new(
        pool: SqlitePool,
        config: CleanupConfig,
        event_bus: EventBus,
        cancel: CancellationToken,
    ) -> Result<Self, shellac_common::Error> {
        let toolkit = AnalyzerToolkit::from_config(&config)?;

        let analyzer = FileAnalyzer::new(pool.clone(), toolkit.clone(), &config);
        let corruption_filter = CorruptionFilter::new(&config);
        let grouper = DuplicateGrouper::new(pool.clone(), toolkit.fingerprinter.clone(), &config);
        let organizer = Organizer::new(pool.clone(), &config);
        let txn_manager = TransactionManager::new(
            pool.clone(),
            config.protected_roots.clone(),
            toolkit.metadata_writer.clone(),
            config.dry_run,
        )
        .with_integrity(config.integrity_level);
        let manifest = RejectionManifest::new(pool.clone(), config.rejected_root.clone());
        let checkpointer = Checkpointer::new(
            pool.clone(),
            config.checkpoint_interval_sec,
            config.store_lock_wait_ms,
        );

        Ok(Self {
            pool,
            config,
            event_bus,
            analyzer,
            corruption_filter,
            grouper,
            organizer,
            txn_manager,
            manifest,
            checkpointer,
            cancel,
            next_batch_id: 1,
        })
    }

    /// Run the full pipeline
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let mut session = CleanupSession::new();

        tracing::info!(
            session_id = %session.session_id,
            source_roots = ?self.config.source_roots,
            dry_run = self.config.dry_run,
            "Starting cleanup session"
        );
        self.event_bus.emit_lossy(CleanupEvent::SessionStarted {
            session_id: session.session_id,
            source_roots: self
                .config
                .source_roots
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            timestamp: Utc::now(),
        });

        // Startup recovery: anything a prior run left open is reversed,
        // and batch numbering continues past the last checkpoint
        let recovered = self.txn_manager.recover().await?;
        if !recovered.is_empty() {
            tracing::warn!(
                transactions = recovered.len(),
                "Rolled back unfinished transactions from a previous run"
            );
        }
        if let Some(checkpoint) = self.checkpointer.latest().await? {
            tracing::info!(
                checkpoint_id = checkpoint.id,
                phase = checkpoint.phase.as_str(),
                last_batch_id = checkpoint.last_batch_id,
                "Resuming past checkpoint"
            );
            self.next_batch_id = checkpoint.last_batch_id + 1;
        }

        // Runtime-tunable values live in the settings table. The lock
        // wait row is seeded at first init and is authoritative once
        // present; batch size has no seed, so an absent key means the
        // config value stands.
        let lock_wait_ms = db::settings::get_u64(
            &self.pool,
            "store_lock_wait_ms",
            self.config.store_lock_wait_ms,
        )
        .await?;
        if lock_wait_ms != self.config.store_lock_wait_ms {
            tracing::info!(lock_wait_ms, "Store lock wait overridden from settings");
            self.config.store_lock_wait_ms = lock_wait_ms;
        }
        self.checkpointer.set_lock_wait_ms(lock_wait_ms);

        if let Some(batch_size) = db::settings::get(&self.pool, "batch_size")
            .await?
            .and_then(|v| v.parse::<usize>().ok())
        {
            if batch_size > 0 && batch_size != self.config.batch_size {
                tracing::info!(batch_size, "Batch size overridden from settings");
                self.config.batch_size = batch_size;
            }
        }

        let phases = [
            Phase::Discovery,
            Phase::Analysis,
            Phase::CorruptionFilter,
            Phase::Grouping,
            Phase::Organization,
        ];

        for phase in phases {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(&mut session).await;
            }

            session.enter_phase(phase);
            self.event_bus.emit_lossy(CleanupEvent::PhaseStarted {
                session_id: session.session_id,
                phase,
            });

            let processed = match phase {
                Phase::Discovery => self.phase_discovery(&mut session).await?,
                Phase::Analysis => self.phase_analysis(&mut session).await?,
                Phase::CorruptionFilter => self.phase_filtering(&mut session).await?,
                Phase::Grouping => self.phase_grouping(&mut session).await?,
                Phase::Organization => self.phase_organization(&mut session).await?,
            };

            // Phase boundary checkpoint
            let batch_id = self.next_batch_id;
            self.checkpointer
                .force(phase, batch_id, &session.counters)
                .await?;
            self.event_bus.emit_lossy(CleanupEvent::CheckpointWritten {
                session_id: session.session_id,
                phase,
                last_batch_id: batch_id,
            });
            self.event_bus.emit_lossy(CleanupEvent::PhaseCompleted {
                session_id: session.session_id,
                phase,
                processed,
            });

            if phase == Phase::Discovery && session.counters.discovered == 0 {
                let pending = db::files::count_by_status(
                    &self.pool,
                    db::files::FileStatus::Discovered,
                )
                .await?;
                if pending == 0 {
                    tracing::info!("Nothing to process");
                    session.finish(SessionState::Completed);
                    return Ok(RunOutcome::NoWork);
                }
            }
        }

        if self.cancel.is_cancelled() {
            return self.finish_cancelled(&mut session).await;
        }
        self.finish_completed(&mut session).await
    }

    async fn finish_completed(&mut self, session: &mut CleanupSession) -> Result<RunOutcome> {
        if !self.config.dry_run {
            self.manifest.export().await?;
        }
        statistics::write_report(&self.pool, &self.config, session).await?;

        session.finish(SessionState::Completed);
        self.event_bus.emit_lossy(CleanupEvent::SessionCompleted {
            session_id: session.session_id,
            duration_seconds: session.duration_seconds(),
            organized: session.counters.organized,
            rejected: session.counters.rejected,
            failed: session.counters.failed,
        });

        tracing::info!(
            session_id = %session.session_id,
            duration_seconds = session.duration_seconds(),
            organized = session.counters.organized,
            rejected = session.counters.rejected,
            quarantined = session.counters.quarantined,
            needs_review = session.counters.needs_review,
            failed = session.counters.failed,
            "Cleanup session completed"
        );

        if session.counters.failed > 0 {
            Ok(RunOutcome::CompletedWithFailures)
        } else {
            Ok(RunOutcome::Clean)
        }
    }

    async fn finish_cancelled(&mut self, session: &mut CleanupSession) -> Result<RunOutcome> {
        let batch_id = self.next_batch_id;
        self.checkpointer
            .force(session.phase, batch_id, &session.counters)
            .await?;

        session.finish(SessionState::Cancelled);
        self.event_bus.emit_lossy(CleanupEvent::SessionCancelled {
            session_id: session.session_id,
        });
        tracing::info!(session_id = %session.session_id, "Cleanup session cancelled");
        Ok(RunOutcome::Cancelled)
    }

    /// Explicit recovery entry point: roll back unfinished transactions
    /// and report what was done, without running the pipeline
    pub async fn recover_only(&mut self) -> Result<Vec<i64>> {
        let recovered = self.txn_manager.recover().await?;
        if let Some(checkpoint) = self.checkpointer.latest().await? {
            tracing::info!(
                checkpoint_id = checkpoint.id,
                phase = checkpoint.phase.as_str(),
                last_batch_id = checkpoint.last_batch_id,
                "Recovery complete; next run resumes from here"
            );
        }
        Ok(recovered)
    }

    /// Allocate the next batch id
    pub(super) fn take_batch_id(&mut self) -> i64 {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        id
    }
}
