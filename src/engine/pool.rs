//! Pooled Work Engine
//!
//! Two capacity-bounded pools backed by tokio semaphores: short-running slots
//! for request-scoped work and long-running slots for daemon-like work. A full
//! pool rejects rather than queues for `do_work` and `start_work`;
//! `schedule_work` queues behind the semaphore. Free capacity is simply the
//! number of available permits, which is what gets gossiped to peers.

use super::WorkEngine;
use super::registry::WorkHandlerRegistry;
use super::types::{EngineError, WorkItem};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

pub struct PooledWorkEngine {
    handlers: Arc<WorkHandlerRegistry>,
    short_slots: Arc<Semaphore>,
    long_slots: Arc<Semaphore>,
}

impl PooledWorkEngine {
    pub fn new(
        handlers: Arc<WorkHandlerRegistry>,
        short_slots: usize,
        long_slots: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            handlers,
            short_slots: Arc::new(Semaphore::new(short_slots)),
            long_slots: Arc::new(Semaphore::new(long_slots)),
        })
    }

    fn slots_for(&self, work: &WorkItem) -> &Arc<Semaphore> {
        if work.long_running {
            &self.long_slots
        } else {
            &self.short_slots
        }
    }

    fn admit(&self, work: &WorkItem) -> Result<WorkHandlerFnGuard, EngineError> {
        let handler = self
            .handlers
            .lookup(work)
            .ok_or_else(|| EngineError::Rejected(format!("unknown work handler: {}", work.handler)))?;

        let permit = self
            .slots_for(work)
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                EngineError::Rejected(if work.long_running {
                    "no long-running capacity".to_string()
                } else {
                    "no short-running capacity".to_string()
                })
            })?;

        Ok(WorkHandlerFnGuard { handler, permit })
    }
}

/// A handler admitted into a pool; the permit is held until execution ends.
struct WorkHandlerFnGuard {
    handler: super::registry::WorkHandlerFn,
    permit: tokio::sync::OwnedSemaphorePermit,
}

#[async_trait]
impl WorkEngine for PooledWorkEngine {
    async fn do_work(&self, work: WorkItem) -> Result<(), EngineError> {
        let admitted = self.admit(&work)?;
        let result = (admitted.handler)(work).await;
        drop(admitted.permit);
        result.map_err(|e| EngineError::Failed(e.to_string()))
    }

    async fn start_work(&self, work: WorkItem) -> Result<u64, EngineError> {
        let blocked = Instant::now();
        let admitted = self.admit(&work)?;

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let handler_name = work.handler.clone();
        tokio::spawn(async move {
            let _ = started_tx.send(());
            let result = (admitted.handler)(work).await;
            drop(admitted.permit);
            if let Err(e) = result {
                tracing::error!("started work '{}' failed: {}", handler_name, e);
            }
        });

        // Wait until the spawned task actually begins, so the returned figure
        // is the time the caller spent blocked until the start, not just the
        // admission overhead.
        let _ = started_rx.await;
        Ok(blocked.elapsed().as_millis() as u64)
    }

    async fn schedule_work(&self, work: WorkItem) -> Result<(), EngineError> {
        // Scheduled work queues behind the pool instead of rejecting, but an
        // unknown handler is still refused up front.
        let handler = self
            .handlers
            .lookup(&work)
            .ok_or_else(|| EngineError::Rejected(format!("unknown work handler: {}", work.handler)))?;

        let slots = self.slots_for(&work).clone();
        let handler_name = work.handler.clone();
        tokio::spawn(async move {
            let permit = match slots.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!("pool closed before scheduled work '{}' ran", handler_name);
                    return;
                }
            };
            let result = handler(work).await;
            drop(permit);
            if let Err(e) = result {
                tracing::error!("scheduled work '{}' failed: {}", handler_name, e);
            }
        });

        Ok(())
    }

    fn short_running_free(&self) -> i64 {
        self.short_slots.available_permits() as i64
    }

    fn long_running_free(&self) -> i64 {
        self.long_slots.available_permits() as i64
    }
}
