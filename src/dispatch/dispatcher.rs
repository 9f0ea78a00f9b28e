//! Dispatcher - the in-process messaging substrate
//!
//! A single bounded bus carries every [`Message`]. The router task spawns one
//! handler per message so coordinators with different ids run concurrently;
//! reports for the same id are serialized by [`StateStore::apply_report`].
//! Handlers never wait on a child: whatever they emit goes back on the bus.
//! The router admits a leaf task only once a worker slot is free, so queued
//! leaf work stays on the bounded bus instead of piling up as parked tasks.
//! Stores that do disk I/O are driven from the blocking pool.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coord::coordinator::Coordinator;
use crate::coord::types::{CompletionReport, Job, JobFinished, JobId, LeafTask, Message};
use crate::coord::worker::{WorkItem, Worker};
use crate::core::config::ScatterConfig;
use crate::core::errors::{Result, ScatterError};
use crate::core::metrics::DispatchMetrics;
use crate::storage::{MemoryStore, StateStore};

/// A coordination error recorded while handling a message
#[derive(Debug)]
pub struct Fault {
    /// Id the failing message was routed by
    pub job_id: JobId,
    pub message_kind: &'static str,
    pub error: ScatterError,
}

struct Shared {
    coordinator: Coordinator,
    worker: Worker,
    metrics: Arc<DispatchMetrics>,
    finish_waiters: DashMap<JobId, oneshot::Sender<JobFinished>>,
    faults: Mutex<Vec<Fault>>,
    worker_slots: Arc<Semaphore>,
}

/// Routes messages between coordinators, workers and requesters
pub struct Dispatcher {
    bus_tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    router: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the router. Must be called from within a tokio runtime.
    pub fn start(
        config: &ScatterConfig,
        store: Arc<dyn StateStore>,
        work: Arc<dyn WorkItem>,
    ) -> Result<Self> {
        config.validate()?;

        let (bus_tx, bus_rx) = mpsc::channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let shared = Arc::new(Shared {
            coordinator: Coordinator::from_config(store, config)?,
            worker: Worker::new(work),
            metrics: Arc::new(DispatchMetrics::new()),
            finish_waiters: DashMap::new(),
            faults: Mutex::new(Vec::new()),
            worker_slots: Arc::new(Semaphore::new(config.max_workers)),
        });

        let router = tokio::spawn(route_messages(
            shared.clone(),
            bus_tx.clone(),
            bus_rx,
            shutdown_rx,
        ));

        info!(
            min_partition_size = config.min_partition_size,
            max_workers = config.max_workers,
            channel_capacity = config.channel_capacity,
            "Dispatcher started"
        );

        Ok(Self {
            bus_tx,
            shared,
            shutdown_tx: Some(shutdown_tx),
            router: Some(router),
        })
    }

    /// In-memory state and no-op leaf work
    pub fn in_memory(config: &ScatterConfig) -> Result<Self> {
        Self::start(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(crate::coord::worker::NoopWork),
        )
    }

    /// Fire-and-forget send onto the bus
    pub async fn dispatch(&self, message: Message) -> Result<()> {
        self.bus_tx
            .send(message)
            .await
            .map_err(|_| ScatterError::channel("message bus closed"))
    }

    /// Register to be told when the root job `job_id` finishes
    pub fn register_finish(&self, job_id: JobId) -> oneshot::Receiver<JobFinished> {
        let (tx, rx) = oneshot::channel();
        self.shared.finish_waiters.insert(job_id, tx);
        rx
    }

    /// Withdraw interest in `job_id`. A `JobFinished` arriving later is dropped.
    pub fn unregister_finish(&self, job_id: JobId) {
        if self.shared.finish_waiters.remove(&job_id).is_some() {
            debug!(job_id = %job_id, "Requester stopped waiting");
        }
    }

    /// Requesters still registered for a `JobFinished`
    pub fn waiting_requesters(&self) -> usize {
        self.shared.finish_waiters.len()
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        self.shared.metrics.clone()
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.shared.coordinator.store().clone()
    }

    /// Drain the recorded faults
    pub fn take_faults(&self) -> Vec<Fault> {
        std::mem::take(&mut *self.shared.faults.lock())
    }

    pub fn fault_count(&self) -> usize {
        self.shared.faults.lock().len()
    }

    /// Stop the router and flush the state store
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(router) = self.router.take() {
            router
                .await
                .map_err(|e| ScatterError::channel(format!("router task failed: {}", e)))?;
        }
        self.shared.coordinator.store().flush()?;
        info!("Dispatcher shut down");
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn route_messages(
    shared: Arc<Shared>,
    bus_tx: mpsc::Sender<Message>,
    mut bus_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Router received shutdown signal");
                break;
            }
            message = bus_rx.recv() => match message {
                Some(message) => route(&shared, &bus_tx, message).await,
                None => break,
            }
        }
    }
}

async fn route(shared: &Arc<Shared>, bus_tx: &mpsc::Sender<Message>, message: Message) {
    match message {
        Message::Start(job) => {
            tokio::spawn(handle_start(shared.clone(), bus_tx.clone(), job));
        }
        Message::LeafTask(task) => {
            // Leaf tasks beyond max_workers stay queued on the bus
            let Ok(permit) = shared.worker_slots.clone().acquire_owned().await else {
                return;
            };
            DispatchMetrics::incr(&shared.metrics.leaf_tasks_admitted);
            tokio::spawn(handle_leaf(shared.clone(), bus_tx.clone(), task, permit));
        }
        Message::CompletionReport(report) => {
            tokio::spawn(handle_report(shared.clone(), bus_tx.clone(), report));
        }
        Message::JobFinished(finished) => shared.finish(finished),
    }
}

/// Run `f` against the coordinator, on the blocking pool when the store does disk I/O
async fn with_coordinator<T, F>(shared: &Arc<Shared>, f: F) -> Result<T>
where
    F: FnOnce(&Coordinator) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if !shared.coordinator.store().is_blocking() {
        return f(&shared.coordinator);
    }
    let shared = shared.clone();
    tokio::task::spawn_blocking(move || f(&shared.coordinator))
        .await
        .map_err(|e| ScatterError::channel(format!("state store task failed: {}", e)))?
}

async fn handle_start(shared: Arc<Shared>, bus_tx: mpsc::Sender<Message>, job: Job) {
    let id = job.id();
    match with_coordinator(&shared, move |coordinator| coordinator.start(&job)).await {
        Ok(outgoing) => {
            DispatchMetrics::incr(&shared.metrics.jobs_started);
            for message in outgoing {
                match &message {
                    Message::Start(_) => DispatchMetrics::incr(&shared.metrics.child_jobs_dispatched),
                    Message::LeafTask(_) => DispatchMetrics::incr(&shared.metrics.leaf_tasks_dispatched),
                    _ => {}
                }
                forward(&bus_tx, message).await;
            }
        }
        Err(e) => shared.record_fault(id, "start", e),
    }
}

async fn handle_leaf(
    shared: Arc<Shared>,
    bus_tx: mpsc::Sender<Message>,
    task: LeafTask,
    permit: OwnedSemaphorePermit,
) {
    let result = shared.worker.execute(&task).await;
    // Free the slot before forwarding so a full bus can't hold it
    drop(permit);
    match result {
        Ok(report) => {
            DispatchMetrics::incr(&shared.metrics.leaf_tasks_executed);
            forward(&bus_tx, Message::CompletionReport(report)).await;
        }
        Err(e) => shared.record_fault(task.parent_id, "leaf_task", e),
    }
}

async fn handle_report(shared: Arc<Shared>, bus_tx: mpsc::Sender<Message>, report: CompletionReport) {
    let target_id = report.target_id;
    match with_coordinator(&shared, move |coordinator| coordinator.on_completion_report(&report)).await {
        Ok(upward) => {
            DispatchMetrics::incr(&shared.metrics.reports_applied);
            if let Some(message) = upward {
                DispatchMetrics::incr(&shared.metrics.coordinators_completed);
                forward(&bus_tx, message).await;
            }
        }
        Err(e) => shared.record_fault(target_id, "completion_report", e),
    }
}

async fn forward(bus_tx: &mpsc::Sender<Message>, message: Message) {
    let kind = message.kind();
    if bus_tx.send(message).await.is_err() {
        debug!(kind, "Message bus closed, dropping message");
    }
}

impl Shared {
    fn finish(&self, finished: JobFinished) {
        DispatchMetrics::incr(&self.metrics.jobs_finished);
        match self.finish_waiters.remove(&finished.job_id) {
            Some((_, waiter)) => {
                if waiter.send(finished).is_err() {
                    warn!(job_id = %finished.job_id, "Requester stopped waiting before job finished");
                }
            }
            None => {
                debug!(job_id = %finished.job_id, "JobFinished with no waiting requester");
            }
        }
    }

    fn record_fault(&self, job_id: JobId, message_kind: &'static str, error: ScatterError) {
        let counter = match &error {
            ScatterError::InvalidJob { .. } => Some(&self.metrics.invalid_jobs),
            ScatterError::CountOverflow { .. } => Some(&self.metrics.count_overflows),
            ScatterError::LateReport { .. } => Some(&self.metrics.late_reports),
            ScatterError::DuplicateStart { .. } => Some(&self.metrics.duplicate_starts),
            ScatterError::WorkFailed { .. } => Some(&self.metrics.work_failures),
            _ => None,
        };
        if let Some(counter) = counter {
            DispatchMetrics::incr(counter);
        }

        if error.is_protocol_anomaly() {
            warn!(job_id = %job_id, kind = message_kind, category = error.category(), error = %error, "Protocol anomaly");
        } else {
            error!(job_id = %job_id, kind = message_kind, category = error.category(), error = %error, "Coordination fault");
        }

        self.faults.lock().push(Fault {
            job_id,
            message_kind,
            error,
        });
    }
}
