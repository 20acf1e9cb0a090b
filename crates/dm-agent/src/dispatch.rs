//! Operation dispatch engine
//!
//! Operations are queued in arrival order and drained by a single background
//! loop. A drain loop is started only when an operation lands in an empty
//! queue; it exits after removing the last operation. Both decisions are
//! made under the queue lock, so at most one loop runs at a time.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::FutureExt;
use tokio::sync::Notify;

use dm_core::SessionError;
use dm_protocol::{Operation, Record, Template};

use crate::events::{status_event, AgentStatus};
use crate::processors::{OperationContext, OperationProcessor};

/// Accepts operations and hands them to processors one at a time
#[derive(Clone)]
pub struct OperationDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: OperationContext,
    processors: RwLock<Vec<Arc<dyn OperationProcessor>>>,
    queue: Mutex<VecDeque<Operation>>,
    drain_loops: AtomicUsize,
    idle: Notify,
}

impl OperationDispatcher {
    pub fn new(ctx: OperationContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                processors: RwLock::new(Vec::new()),
                queue: Mutex::new(VecDeque::new()),
                drain_loops: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Initialize `processors` in order, keeping those that succeed
    ///
    /// A processor whose initialization fails is reported as an error event
    /// and is neither advertised nor offered operations for the rest of this
    /// session.
    pub async fn initialize(&self, processors: Vec<Arc<dyn OperationProcessor>>) {
        let mut active = Vec::with_capacity(processors.len());
        for processor in processors {
            let operation_type = processor.operation_type();
            match processor.initialize(&self.inner.ctx).await {
                Ok(()) => {
                    tracing::debug!("{} processor ready", operation_type);
                    active.push(processor);
                }
                Err(e) => {
                    tracing::error!("{} processor failed to initialize, disabling it: {}", operation_type, e);
                    let text = format!("{} unavailable: {}", operation_type, e);
                    let event = status_event(AgentStatus::Error, Some(&text));
                    if let Err(e) = self.inner.ctx.session.publish_record(&event).await {
                        tracing::warn!("Failed to report processor failure: {}", e);
                    }
                }
            }
        }

        tracing::info!("{} operation processors active", active.len());
        *self
            .inner
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner) = active;
    }

    /// Operation types of the active processors, in registration order
    pub fn supported_operations(&self) -> Vec<&'static str> {
        self.inner
            .active()
            .iter()
            .map(|processor| processor.operation_type())
            .collect()
    }

    /// Publish the supported operations, then ask for pending ones
    pub async fn advertise(&self) -> Result<(), SessionError> {
        let supported = Record::new(Template::SetSupportedOperations).with_fields(self.supported_operations());
        let session = self.inner.ctx.session.as_ref();
        session.publish_record(&supported).await?;
        session
            .publish_record(&Record::new(Template::RequestPendingOperations))
            .await
    }

    /// Queue `operation`, starting a drain loop if none is running
    pub fn submit(&self, operation: Operation) {
        let start_drain = {
            let mut queue = self.inner.queue();
            let was_empty = queue.is_empty();
            queue.push_back(operation);
            was_empty
        };

        if start_drain {
            self.inner.drain_loops.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.drain().await });
        }
    }

    /// Operations queued or in progress
    pub fn pending(&self) -> usize {
        self.inner.queue().len()
    }

    /// Drain loops started since creation
    pub fn drain_loops_started(&self) -> usize {
        self.inner.drain_loops.load(Ordering::SeqCst)
    }

    /// Wait until every queued operation has been processed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Operation>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Vec<Arc<dyn OperationProcessor>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn drain(&self) {
        loop {
            // The head stays queued while it is processed
            let Some(operation) = self.queue().front().cloned() else {
                break;
            };

            self.process(&operation).await;

            let mut queue = self.queue();
            queue.pop_front();
            if queue.is_empty() {
                break;
            }
        }
        self.idle.notify_waiters();
    }

    async fn process(&self, operation: &Operation) {
        for processor in self.active() {
            // A panicking processor must not leave the head queued forever
            let attempt =
                AssertUnwindSafe(processor.process_operation(operation, &self.ctx)).catch_unwind();
            match attempt.await {
                Ok(Ok(true)) => return,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        "{} processor failed on {}: {}",
                        processor.operation_type(),
                        operation.describe(),
                        e
                    );
                }
                Err(_) => {
                    tracing::error!(
                        "{} processor panicked on {}",
                        processor.operation_type(),
                        operation.describe()
                    );
                }
            }
        }
        tracing::warn!("No processor handled {}", operation.describe());
    }
}
