//! Work Handler Registry
//!
//! Maps string handler names carried inside work items to executable async
//! closures, keeping the engine generic: nodes register whatever work logic
//! they host without the pool caring what it does.

use super::types::WorkItem;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Thread-safe, type-erased async work handler.
pub type WorkHandlerFn =
    Arc<dyn Fn(WorkItem) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub struct WorkHandlerRegistry {
    handlers: DashMap<String, WorkHandlerFn>,
}

impl WorkHandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    /// Registers `handler` under `name`, replacing any previous registration.
    pub fn register<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so heterogeneous handlers
        // can share one map.
        let handler_fn: WorkHandlerFn = Arc::new(move |work: WorkItem| {
            Box::pin(handler(work)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });

        self.handlers.insert(name.to_string(), handler_fn);
        tracing::info!("registered work handler: {}", name);
    }

    /// Looks up the handler named by `work` without running it. The pool uses
    /// this to reject unknown work before burning an execution slot.
    pub fn lookup(&self, work: &WorkItem) -> Option<WorkHandlerFn> {
        self.handlers
            .get(&work.handler)
            .map(|entry| entry.value().clone())
    }

    /// Runs the handler named by `work` to completion.
    pub async fn execute(&self, work: WorkItem) -> Result<()> {
        match self.lookup(&work) {
            Some(handler_fn) => handler_fn(work).await,
            None => Err(anyhow::anyhow!("unknown work handler: {}", work.handler)),
        }
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Default for WorkHandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}
