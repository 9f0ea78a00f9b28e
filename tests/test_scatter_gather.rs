//! End-to-end runs through the in-process dispatcher

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use async_trait::async_trait;
use scatter_gather::{
    CompletionReport, CoordinatorState, Dispatcher, Job, LeafTask, MemoryStore, Message,
    Requester, ScatterConfig, ScatterError, StateStore, WorkItem,
};

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

fn config() -> ScatterConfig {
    ScatterConfig::builder()
        .max_workers(8)
        .channel_capacity(256)
        .build()
        .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_twenty_five_items_split_into_three() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();

    let handle = Requester::new(&dispatcher).launch(25).await.unwrap();
    let root_id = handle.job_id();
    let report = handle.wait_timeout(RUN_TIMEOUT).await.unwrap();

    assert_eq!(report.job_id, root_id);
    assert_eq!(report.total_items, 25);

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.jobs_started, 4);
    assert_eq!(snapshot.child_jobs_dispatched, 3);
    assert_eq!(snapshot.leaf_tasks_dispatched, 25);
    assert_eq!(snapshot.leaf_tasks_executed, 25);
    // 25 leaf reports plus the three sub-job totals
    assert_eq!(snapshot.reports_applied, 28);
    assert_eq!(snapshot.coordinators_completed, 4);
    assert_eq!(snapshot.jobs_finished, 1);

    let root = dispatcher.store().get(root_id).unwrap().unwrap();
    assert!(root.is_done());
    assert_eq!(root.items_done, 25);
    assert_eq!(dispatcher.fault_count(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_items_use_leaf_path() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();

    let report = Requester::new(&dispatcher)
        .launch(3)
        .await
        .unwrap()
        .wait_timeout(RUN_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(report.total_items, 3);

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.jobs_started, 1);
    assert_eq!(snapshot.child_jobs_dispatched, 0);
    assert_eq!(snapshot.leaf_tasks_dispatched, 3);
    assert_eq!(snapshot.reports_applied, 3);
    assert_eq!(snapshot.jobs_finished, 1);
    assert_eq!(dispatcher.store().len().unwrap(), 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_thousand_items_conserved() {
    let dispatcher = Dispatcher::in_memory(&ScatterConfig::default()).unwrap();

    let report = Requester::new(&dispatcher)
        .launch(10_000)
        .await
        .unwrap()
        .wait_timeout(Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(report.total_items, 10_000);

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.leaf_tasks_executed, 10_000);
    // 1 root, 10 x 1000, 100 x 100, 1000 x 10
    assert_eq!(snapshot.jobs_started, 1_111);
    assert_eq!(snapshot.coordinators_completed, 1_111);
    assert_eq!(snapshot.jobs_finished, 1);
    assert_eq!(snapshot.fatal_errors(), 0);
    assert_eq!(dispatcher.store().len().unwrap(), 1_111);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_share_a_dispatcher() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();
    let requester = Requester::new(&dispatcher);

    let sizes = [1u64, 10, 11, 99, 1_234];
    let mut handles = Vec::new();
    for size in sizes {
        handles.push(requester.launch(size).await.unwrap());
    }
    let ids: Vec<_> = handles.iter().map(|h| h.job_id()).collect();

    let reports = join_all(handles.into_iter().map(|h| h.wait_timeout(RUN_TIMEOUT))).await;
    for ((report, size), id) in reports.into_iter().zip(sizes).zip(ids) {
        let report = report.unwrap();
        assert_eq!(report.total_items, size);
        assert_eq!(report.job_id, id);
    }

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.leaf_tasks_executed, sizes.iter().sum::<u64>());
    assert_eq!(snapshot.jobs_finished, sizes.len() as u64);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_runs_release_their_registration() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();
    let requester = Requester::new(&dispatcher);

    for size in [5u64, 50, 500] {
        let handle = requester.launch(size).await.unwrap();
        drop(handle);
        assert_eq!(dispatcher.waiting_requesters(), 0);
    }

    wait_until(|| dispatcher.metrics().snapshot().jobs_finished == 3).await;
    assert_eq!(dispatcher.waiting_requesters(), 0);
    assert_eq!(dispatcher.fault_count(), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_items_rejected_at_launch() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();
    let err = Requester::new(&dispatcher).launch(0).await.unwrap_err();
    assert!(matches!(err, ScatterError::InvalidJob { size: 0, .. }));
    assert_eq!(dispatcher.metrics().snapshot().jobs_started, 0);
    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redelivered_start_is_ignored() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();
    let job = Job::root(40).unwrap();
    let finished = dispatcher.register_finish(job.id());

    dispatcher.dispatch(Message::Start(job.clone())).await.unwrap();
    dispatcher.dispatch(Message::Start(job.clone())).await.unwrap();

    let done = tokio::time::timeout(RUN_TIMEOUT, finished).await.unwrap().unwrap();
    assert_eq!(done.job_id, job.id());
    wait_until(|| dispatcher.fault_count() == 1).await;

    let faults = dispatcher.take_faults();
    assert!(matches!(faults[0].error, ScatterError::DuplicateStart { .. }));
    assert_eq!(faults[0].job_id, job.id());

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.duplicate_starts, 1);
    assert_eq!(snapshot.leaf_tasks_executed, 40);
    assert_eq!(snapshot.jobs_finished, 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_report_does_not_mutate_state() {
    let dispatcher = Dispatcher::in_memory(&config()).unwrap();
    let handle = Requester::new(&dispatcher).launch(3).await.unwrap();
    let root_id = handle.job_id();
    handle.wait_timeout(RUN_TIMEOUT).await.unwrap();

    dispatcher
        .dispatch(Message::CompletionReport(CompletionReport::new(root_id, 1)))
        .await
        .unwrap();
    wait_until(|| dispatcher.fault_count() == 1).await;

    let faults = dispatcher.take_faults();
    assert!(faults[0].error.is_protocol_anomaly());
    assert!(matches!(faults[0].error, ScatterError::LateReport { .. }));

    let root = dispatcher.store().get(root_id).unwrap().unwrap();
    assert_eq!(root.items_done, 3);
    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.late_reports, 1);
    assert_eq!(snapshot.jobs_finished, 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overflow_is_isolated_to_one_coordinator() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::start(
        &config(),
        store.clone(),
        Arc::new(scatter_gather::NoopWork),
    )
    .unwrap();

    let broken = Job::root(2).unwrap();
    store
        .create(broken.id(), CoordinatorState::for_job(&broken))
        .unwrap();

    let handle = Requester::new(&dispatcher).launch(57).await.unwrap();
    dispatcher
        .dispatch(Message::CompletionReport(CompletionReport::new(broken.id(), 5)))
        .await
        .unwrap();

    let report = handle.wait_timeout(RUN_TIMEOUT).await.unwrap();
    assert_eq!(report.total_items, 57);
    wait_until(|| dispatcher.fault_count() == 1).await;

    let faults = dispatcher.take_faults();
    assert!(matches!(
        faults[0].error,
        ScatterError::CountOverflow { items_done: 0, count: 5, items_to_be_done: 2, .. }
    ));
    assert_eq!(store.get(broken.id()).unwrap().unwrap().items_done, 0);
    assert_eq!(dispatcher.metrics().snapshot().count_overflows, 1);

    dispatcher.shutdown().await.unwrap();
}

struct CountingWork {
    runs: AtomicU64,
}

#[async_trait]
impl WorkItem for CountingWork {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, _task: &LeafTask) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_work_runs_once_per_item() {
    let work = Arc::new(CountingWork {
        runs: AtomicU64::new(0),
    });
    let config = ScatterConfig::builder()
        .max_workers(2)
        .channel_capacity(16)
        .build()
        .unwrap();
    let dispatcher =
        Dispatcher::start(&config, Arc::new(MemoryStore::new()), work.clone()).unwrap();

    Requester::new(&dispatcher)
        .launch(321)
        .await
        .unwrap()
        .wait_timeout(RUN_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(work.runs.load(Ordering::SeqCst), 321);

    dispatcher.shutdown().await.unwrap();
}

/// Blocks every leaf until the gate is opened
struct GatedWork {
    gate: Semaphore,
}

#[async_trait]
impl WorkItem for GatedWork {
    fn name(&self) -> &str {
        "gated"
    }

    async fn run(&self, _task: &LeafTask) -> anyhow::Result<()> {
        let _pass = self.gate.acquire().await?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leaf_admission_bounded_by_max_workers() {
    let work = Arc::new(GatedWork {
        gate: Semaphore::new(0),
    });
    let config = ScatterConfig::builder()
        .max_workers(3)
        .channel_capacity(64)
        .build()
        .unwrap();
    let dispatcher =
        Dispatcher::start(&config, Arc::new(MemoryStore::new()), work.clone()).unwrap();

    let handle = Requester::new(&dispatcher).launch(200).await.unwrap();
    wait_until(|| dispatcher.metrics().snapshot().leaf_tasks_admitted == 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.leaf_tasks_admitted, 3);
    assert_eq!(snapshot.leaf_tasks_executed, 0);

    work.gate.add_permits(3);
    let report = handle.wait_timeout(RUN_TIMEOUT).await.unwrap();
    assert_eq!(report.total_items, 200);
    assert_eq!(dispatcher.metrics().snapshot().leaf_tasks_admitted, 200);

    dispatcher.shutdown().await.unwrap();
}

struct BrokenWork;

#[async_trait]
impl WorkItem for BrokenWork {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run(&self, _task: &LeafTask) -> anyhow::Result<()> {
        anyhow::bail!("unit of work failed")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_work_manifests_as_silence() {
    let dispatcher =
        Dispatcher::start(&config(), Arc::new(MemoryStore::new()), Arc::new(BrokenWork)).unwrap();

    let err = Requester::new(&dispatcher)
        .launch(4)
        .await
        .unwrap()
        .wait_timeout(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ScatterError::Timeout { .. }));
    assert_eq!(dispatcher.waiting_requesters(), 0);

    wait_until(|| dispatcher.fault_count() == 4).await;
    let snapshot = dispatcher.metrics().snapshot();
    assert_eq!(snapshot.work_failures, 4);
    assert_eq!(snapshot.jobs_finished, 0);

    dispatcher.shutdown().await.unwrap();
}
