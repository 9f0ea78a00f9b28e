//! Requester - launches a root job and reports throughput when it finishes

use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

use crate::coord::types::{Job, JobFinished, JobId, Message};
use crate::core::errors::{Result, ScatterError};
use crate::core::metrics::ExecutionTimer;
use crate::dispatch::Dispatcher;

/// Outcome of one completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub job_id: JobId,
    pub total_items: u64,
    pub elapsed: Duration,
    pub items_per_second: f64,
}

pub struct Requester<'d> {
    dispatcher: &'d Dispatcher,
}

impl<'d> Requester<'d> {
    pub fn new(dispatcher: &'d Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Dispatch a root job of `total_items` and start the clock
    pub async fn launch(&self, total_items: u64) -> Result<RunHandle<'d>> {
        let job = Job::root(total_items)?;
        let job_id = job.id();

        // Register before dispatching so the finish can't be missed
        let finished_rx = self.dispatcher.register_finish(job_id);
        let timer = ExecutionTimer::start();
        if let Err(e) = self.dispatcher.dispatch(Message::Start(job)).await {
            self.dispatcher.unregister_finish(job_id);
            return Err(e);
        }

        info!(job_id = %job_id, total_items, "Launched root job");
        Ok(RunHandle {
            dispatcher: self.dispatcher,
            job_id,
            total_items,
            timer,
            finished_rx,
        })
    }
}

/// A launched run waiting for its `JobFinished`.
///
/// Dropping the handle, or giving up in [`RunHandle::wait_timeout`], withdraws
/// the registration with the dispatcher.
pub struct RunHandle<'d> {
    dispatcher: &'d Dispatcher,
    job_id: JobId,
    total_items: u64,
    timer: ExecutionTimer,
    finished_rx: oneshot::Receiver<JobFinished>,
}

impl std::fmt::Debug for RunHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("job_id", &self.job_id)
            .field("total_items", &self.total_items)
            .finish_non_exhaustive()
    }
}

impl RunHandle<'_> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait until the root job finishes. A lost message means waiting forever.
    pub async fn wait(mut self) -> Result<RunReport> {
        let finished = (&mut self.finished_rx)
            .await
            .map_err(|_| ScatterError::channel("dispatcher dropped before job finished"))?;
        Ok(self.on_job_finished(finished))
    }

    /// Like [`RunHandle::wait`], giving up after `timeout`
    pub async fn wait_timeout(mut self, timeout: Duration) -> Result<RunReport> {
        match tokio::time::timeout(timeout, &mut self.finished_rx).await {
            Ok(Ok(finished)) => Ok(self.on_job_finished(finished)),
            Ok(Err(_)) => Err(ScatterError::channel("dispatcher dropped before job finished")),
            Err(_) => Err(ScatterError::timeout(
                format!("waiting for job {}", self.job_id),
                timeout.as_millis() as u64,
            )),
        }
    }

    fn on_job_finished(&self, finished: JobFinished) -> RunReport {
        let elapsed = self.timer.elapsed();
        let items_per_second = throughput(self.total_items, elapsed);
        info!(
            job_id = %finished.job_id,
            total_items = self.total_items,
            elapsed_ms = elapsed.as_millis() as u64,
            items_per_second,
            "Done!"
        );
        RunReport {
            job_id: finished.job_id,
            total_items: self.total_items,
            elapsed,
            items_per_second,
        }
    }
}

impl Drop for RunHandle<'_> {
    fn drop(&mut self) {
        self.dispatcher.unregister_finish(self.job_id);
    }
}

/// Items per second, 0 when no measurable time passed
pub fn throughput(items: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        items as f64 / secs
    } else {
        0.0
    }
}
