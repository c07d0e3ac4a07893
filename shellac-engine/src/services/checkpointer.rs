//! Checkpointer
//!
//! Makes forward progress recoverable. Checkpoints are written at every
//! batch boundary and, at most once per configured interval, in between.
//! Interrupt and termination signals cancel the pipeline token; the
//! orchestrator forces a final checkpoint before the process gives up.

use crate::db::checkpoints::{self, CheckpointRow};
use crate::db::{operations, StoreResult};
use crate::models::SessionCounters;
use crate::utils::retry_busy;
use shellac_common::events::Phase;
use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct Checkpointer {
    pool: SqlitePool,
    interval: Duration,
    lock_wait_ms: u64,
    last_write: Option<Instant>,
}

impl Checkpointer {
    pub fn new(pool: SqlitePool, interval_sec: u64, lock_wait_ms: u64) -> Self {
        Self {
            pool,
            interval: Duration::from_secs(interval_sec.max(1)),
            lock_wait_ms,
            last_write: None,
        }
    }

    /// Write a checkpoint unconditionally (batch boundaries, shutdown)
    pub async fn force(
        &mut self,
        phase: Phase,
        last_batch_id: i64,
        counters: &SessionCounters,
    ) -> StoreResult<i64> {
        let pool = &self.pool;
        let open = operations::unfinished_transactions(pool).await?;
        let open_ref = &open;
        let id = retry_busy("checkpoint write", self.lock_wait_ms, || {
            checkpoints::write(pool, phase, last_batch_id, counters, open_ref)
        })
        .await?;
        self.last_write = Some(Instant::now());
        Ok(id)
    }

    /// Apply a runtime-tuned lock wait (settings table override)
    pub fn set_lock_wait_ms(&mut self, lock_wait_ms: u64) {
        self.lock_wait_ms = lock_wait_ms;
    }

    /// Write a checkpoint if the interval has elapsed since the last one
    pub async fn maybe(
        &mut self,
        phase: Phase,
        last_batch_id: i64,
        counters: &SessionCounters,
    ) -> StoreResult<Option<i64>> {
        let due = match self.last_write {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        };
        if !due {
            return Ok(None);
        }
        Ok(Some(self.force(phase, last_batch_id, counters).await?))
    }

    /// Latest checkpoint, for recovery
    pub async fn latest(&self) -> StoreResult<Option<CheckpointRow>> {
        checkpoints::latest(&self.pool).await
    }
}

/// Wire interrupt/termination signals to the cancellation token.
///
/// Signal handling is the only entry point allowed to trip the token;
/// workers observe it and drain gracefully.
pub fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    token.cancel();
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => tracing::info!("Interrupt received, draining"),
                _ = sigterm.recv() => tracing::info!("Termination signal received, draining"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Interrupt received, draining");
        }

        token.cancel();
    });
}
