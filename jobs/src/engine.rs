use crate::error::JobError;
use crate::model::{Job, JobStatus, JobView};
use crate::workers::resolve_worker_count;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::warn;
use uuid::Uuid;

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One unit of work an engine-created job hands out per `item_key`
/// (SPEC_FULL.md §4.G processor contract). Implementations own whatever I/O
/// a single item needs (parsing a file, fetching a connector document, ...);
/// the engine only sees success/failure.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, item_key: &str) -> Result<String, String>;
}

/// Semaphore-backed pool the engine dispatches items through. Rebuilding
/// swaps in a fresh semaphore so in-flight permits on the old one are
/// unaffected (SPEC_FULL.md §5 "rebuild the pool once" contract).
struct WorkerPool {
    semaphore: Arc<Semaphore>,
    generation: u64,
}

impl WorkerPool {
    fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
            generation: 0,
        }
    }
}

async fn acquire_permit(pool: &Mutex<WorkerPool>) -> tokio::sync::OwnedSemaphorePermit {
    let semaphore = pool.lock().await.semaphore.clone();
    semaphore
        .acquire_owned()
        .await
        .expect("worker pool semaphore is never closed")
}

async fn maybe_rebuild_pool(pool: &Mutex<WorkerPool>, rebuilt_once: &AtomicBool, permits: usize) {
    if rebuilt_once.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut guard = pool.lock().await;
    guard.semaphore = Arc::new(Semaphore::new(permits.max(1)));
    guard.generation += 1;
    warn!(generation = guard.generation, "worker pool rebuilt after crash");
}

/// In-memory job scheduler (SPEC_FULL.md §4.G). Owns jobs keyed by
/// `user_id -> job_id -> Job`; each job runs its items concurrently under a
/// semaphore of size `2 * max_workers`, with parsing isolated per item so a
/// crash marks only that item `WORKER_CRASHED` instead of the whole job.
pub struct TaskEngine {
    jobs: DashMap<String, Arc<RwLock<Job>>>,
    user_jobs: DashMap<String, Vec<String>>,
    pool: Arc<Mutex<WorkerPool>>,
    pool_rebuilt: Arc<AtomicBool>,
    max_workers: usize,
    retention_ttl: Duration,
    sweep_interval: Duration,
}

impl TaskEngine {
    pub fn new(
        max_workers_override: Option<usize>,
        retention_ttl_hours: u64,
        sweep_interval_hours: u64,
    ) -> Arc<Self> {
        let max_workers = resolve_worker_count(max_workers_override);
        Arc::new(Self {
            jobs: DashMap::new(),
            user_jobs: DashMap::new(),
            pool: Arc::new(Mutex::new(WorkerPool::new(max_workers * 2))),
            pool_rebuilt: Arc::new(AtomicBool::new(false)),
            max_workers,
            retention_ttl: Duration::from_secs(retention_ttl_hours * 3600),
            sweep_interval: Duration::from_secs(sweep_interval_hours.max(1) * 3600),
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn create_job(
        &self,
        user_id: &str,
        item_keys: Vec<String>,
        processor: Arc<dyn Processor>,
    ) -> String {
        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), user_id.to_string(), &item_keys);
        let job_arc = Arc::new(RwLock::new(job));

        self.jobs.insert(job_id.clone(), job_arc.clone());
        self.user_jobs
            .entry(user_id.to_string())
            .or_default()
            .push(job_id.clone());

        let pool = self.pool.clone();
        let pool_rebuilt = self.pool_rebuilt.clone();
        let max_workers = self.max_workers;

        tokio::spawn(run_job(job_arc, item_keys, processor, pool, pool_rebuilt, max_workers));

        job_id
    }

    /// `CreateUploadTask(user_id, item_keys, processor) -> job_id`.
    pub fn create_upload_task(
        &self,
        user_id: &str,
        item_keys: Vec<String>,
        processor: Arc<dyn Processor>,
    ) -> String {
        self.create_job(user_id, item_keys, processor)
    }

    /// `CreateCustomTask(user_id, item_keys, processor) -> job_id`, used by
    /// connector-driven jobs with a provider-specific processor.
    pub fn create_custom_task(
        &self,
        user_id: &str,
        item_keys: Vec<String>,
        processor: Arc<dyn Processor>,
    ) -> String {
        self.create_job(user_id, item_keys, processor)
    }

    pub async fn status(&self, user_id: &str, job_id: &str) -> Result<JobView, JobError> {
        let job_arc = self
            .jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or(JobError::NotFound)?;
        let job = job_arc.read().await;
        if job.user_id != user_id {
            return Err(JobError::AccessDenied);
        }
        Ok(JobView::from(&*job))
    }

    /// `ListTasks(user_id) -> [JobView]`, most-recent first.
    pub async fn list_tasks(&self, user_id: &str) -> Vec<JobView> {
        let job_ids = self
            .user_jobs
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut views = Vec::with_capacity(job_ids.len());
        for job_id in job_ids.iter().rev() {
            if let Some(job_arc) = self.jobs.get(job_id) {
                let job = job_arc.read().await;
                views.push(JobView::from(&*job));
            }
        }
        views
    }

    pub async fn cancel(&self, user_id: &str, job_id: &str) -> Result<(), JobError> {
        let job_arc = self
            .jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or(JobError::NotFound)?;
        let mut job = job_arc.write().await;
        if job.user_id != user_id {
            return Err(JobError::AccessDenied);
        }
        job.cancel_requested = true;
        job.status = JobStatus::Cancelled;
        job.updated_at = now_unix_secs();
        Ok(())
    }

    /// Evicts terminal jobs whose `updated_at` is older than the retention
    /// TTL (SPEC_FULL.md §4.G retention).
    pub async fn sweep_retention(&self) {
        let now = now_unix_secs();
        let ttl_secs = self.retention_ttl.as_secs();
        let mut expired = Vec::new();

        for entry in self.jobs.iter() {
            let job = entry.value().read().await;
            let terminal = matches!(
                job.status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            );
            if terminal && now.saturating_sub(job.updated_at) >= ttl_secs {
                expired.push(entry.key().clone());
            }
        }

        for job_id in expired {
            self.jobs.remove(&job_id);
        }
    }

    /// Spawns the periodic retention sweep (interval >= 1h, per §4.G).
    pub fn spawn_retention_sweeper(self: &Arc<Self>) {
        let engine = self.clone();
        let interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                engine.sweep_retention().await;
            }
        });
    }
}

async fn run_job(
    job: Arc<RwLock<Job>>,
    item_keys: Vec<String>,
    processor: Arc<dyn Processor>,
    pool: Arc<Mutex<WorkerPool>>,
    pool_rebuilt: Arc<AtomicBool>,
    max_workers: usize,
) {
    let permits = max_workers.max(1) * 2;
    let mut handles = Vec::with_capacity(item_keys.len());

    for item_key in item_keys {
        if job.read().await.cancel_requested {
            break;
        }

        let job = job.clone();
        let processor = processor.clone();
        let pool = pool.clone();
        let pool_rebuilt = pool_rebuilt.clone();

        handles.push(tokio::spawn(async move {
            run_item(job, item_key, processor, pool, pool_rebuilt, permits).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn run_item(
    job: Arc<RwLock<Job>>,
    item_key: String,
    processor: Arc<dyn Processor>,
    pool: Arc<Mutex<WorkerPool>>,
    pool_rebuilt: Arc<AtomicBool>,
    permits: usize,
) {
    let permit = acquire_permit(&pool).await;

    {
        let mut guard = job.write().await;
        if let Some(item) = guard.items.get_mut(&item_key) {
            item.status = crate::model::ItemStatus::Running;
            item.touch();
        }
    }

    let outcome = tokio::spawn({
        let processor = processor.clone();
        let item_key = item_key.clone();
        async move { processor.process(&item_key).await }
    })
    .await;

    drop(permit);

    let (status, result, error) = match outcome {
        Ok(Ok(result)) => (crate::model::ItemStatus::Succeeded, Some(result), None),
        Ok(Err(error)) => (crate::model::ItemStatus::Failed, None, Some(error)),
        Err(_join_error) => {
            warn!(item_key, "item worker crashed");
            maybe_rebuild_pool(&pool, &pool_rebuilt, permits).await;
            (
                crate::model::ItemStatus::Failed,
                None,
                Some("WORKER_CRASHED".to_string()),
            )
        }
    };

    let succeeded = status == crate::model::ItemStatus::Succeeded;

    let mut guard = job.write().await;
    if let Some(item) = guard.items.get_mut(&item_key) {
        item.status = status;
        item.result = result;
        item.error = error;
        item.touch();
    }
    guard.record_terminal(succeeded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct AlwaysSucceeds(Arc<AtomicUsize>);

    #[async_trait]
    impl Processor for AlwaysSucceeds {
        async fn process(&self, item_key: &str) -> Result<String, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("processed {item_key}"))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Processor for AlwaysFails {
        async fn process(&self, _item_key: &str) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    struct PanicsOnFirstCall(Arc<AtomicUsize>);

    #[async_trait]
    impl Processor for PanicsOnFirstCall {
        async fn process(&self, item_key: &str) -> Result<String, String> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("simulated crash processing {item_key}");
            }
            Ok("recovered".to_string())
        }
    }

    async fn wait_until_terminal(engine: &TaskEngine, user_id: &str, job_id: &str) -> JobView {
        for _ in 0..200 {
            let view = engine.status(user_id, job_id).await.unwrap();
            if matches!(
                view.status,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            ) {
                return view;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn upload_task_completes_when_all_items_succeed() {
        let engine = TaskEngine::new(Some(2), 24, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Arc::new(AlwaysSucceeds(calls.clone()));

        let job_id = engine.create_upload_task(
            "alice",
            vec!["a.pdf".to_string(), "b.pdf".to_string()],
            processor,
        );

        let view = wait_until_terminal(&engine, "alice", &job_id).await;
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.successful, 2);
        assert_eq!(view.failed, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn job_fails_when_every_item_fails() {
        let engine = TaskEngine::new(Some(2), 24, 1);
        let job_id = engine.create_upload_task(
            "bob",
            vec!["a.pdf".to_string()],
            Arc::new(AlwaysFails),
        );

        let view = wait_until_terminal(&engine, "bob", &job_id).await;
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.failed, 1);
    }

    #[tokio::test]
    async fn status_for_wrong_user_is_access_denied() {
        let engine = TaskEngine::new(Some(1), 24, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let job_id =
            engine.create_upload_task("alice", vec!["a.pdf".to_string()], Arc::new(AlwaysSucceeds(calls)));

        let err = engine.status("mallory", &job_id).await.unwrap_err();
        assert!(matches!(err, JobError::AccessDenied));
    }

    #[tokio::test]
    async fn status_for_unknown_job_is_not_found() {
        let engine = TaskEngine::new(Some(1), 24, 1);
        let err = engine.status("alice", "does-not-exist").await.unwrap_err();
        assert!(matches!(err, JobError::NotFound));
    }

    #[tokio::test]
    async fn cancel_marks_job_cancelled_and_is_user_scoped() {
        let engine = TaskEngine::new(Some(1), 24, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let job_id = engine.create_upload_task(
            "alice",
            vec!["a.pdf".to_string()],
            Arc::new(AlwaysSucceeds(calls)),
        );

        assert!(matches!(
            engine.cancel("mallory", &job_id).await.unwrap_err(),
            JobError::AccessDenied
        ));

        engine.cancel("alice", &job_id).await.unwrap();
        let view = engine.status("alice", &job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn worker_crash_marks_item_failed_and_recovers_subsequent_items() {
        let engine = TaskEngine::new(Some(1), 24, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let job_id = engine.create_upload_task(
            "alice",
            vec!["first.pdf".to_string(), "second.pdf".to_string()],
            Arc::new(PanicsOnFirstCall(calls)),
        );

        let view = wait_until_terminal(&engine, "alice", &job_id).await;
        assert_eq!(view.processed, 2);
        let crashed = view
            .items
            .values()
            .find(|item| item.error.as_deref() == Some("WORKER_CRASHED"))
            .expect("one item should have crashed");
        assert_eq!(crashed.status, crate::model::ItemStatus::Failed);
    }

    #[tokio::test]
    async fn list_tasks_returns_most_recent_first() {
        let engine = TaskEngine::new(Some(1), 24, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let first = engine.create_upload_task(
            "alice",
            vec!["a.pdf".to_string()],
            Arc::new(AlwaysSucceeds(calls.clone())),
        );
        let second = engine.create_upload_task(
            "alice",
            vec!["b.pdf".to_string()],
            Arc::new(AlwaysSucceeds(calls)),
        );

        wait_until_terminal(&engine, "alice", &first).await;
        wait_until_terminal(&engine, "alice", &second).await;

        let views = engine.list_tasks("alice").await;
        assert_eq!(views[0].job_id, second);
        assert_eq!(views[1].job_id, first);
    }

    #[tokio::test]
    async fn retention_sweep_evicts_old_terminal_jobs() {
        let engine = TaskEngine::new(Some(1), 0, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let job_id = engine.create_upload_task(
            "alice",
            vec!["a.pdf".to_string()],
            Arc::new(AlwaysSucceeds(calls)),
        );
        wait_until_terminal(&engine, "alice", &job_id).await;

        tokio::time::sleep(StdDuration::from_millis(1100)).await;
        engine.sweep_retention().await;

        assert!(engine.status("alice", &job_id).await.is_err());
    }
}
