use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTask {
    pub item_key: String,
    pub status: ItemStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ItemTask {
    pub fn new(item_key: impl Into<String>) -> Self {
        let now = now_unix_secs();
        Self {
            item_key: item_key.into(),
            status: ItemStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_unix_secs();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: HashMap<String, ItemTask>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Job {
    pub fn new(job_id: impl Into<String>, user_id: impl Into<String>, item_keys: &[String]) -> Self {
        let now = now_unix_secs();
        let items = item_keys
            .iter()
            .map(|key| (key.clone(), ItemTask::new(key.clone())))
            .collect();

        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            status: JobStatus::Running,
            total: item_keys.len(),
            processed: 0,
            successful: 0,
            failed: 0,
            items,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recomputes `status` from the item counters (SPEC_FULL.md §4.G).
    /// `completed` once every item has processed, `failed` only when every
    /// single item failed, otherwise stays `running`. `cancelled` is sticky:
    /// once cancellation is requested the status never reverts to a
    /// `completed`/`failed` terminal state, even after the last in-flight
    /// item finishes and `processed` catches up to `total`.
    pub fn recompute_status(&mut self) {
        if self.cancel_requested || self.status == JobStatus::Cancelled {
            self.status = JobStatus::Cancelled;
            self.updated_at = now_unix_secs();
            return;
        }
        if self.total > 0 && self.processed == self.total {
            self.status = if self.successful == 0 {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
        }
        self.updated_at = now_unix_secs();
    }

    pub fn record_terminal(&mut self, succeeded: bool) {
        self.processed += 1;
        if succeeded {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.recompute_status();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub items: HashMap<String, ItemTask>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            user_id: job.user_id.clone(),
            status: job.status,
            total: job.total,
            processed: job.processed,
            successful: job.successful,
            failed: job.failed,
            items: job.items.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_status_stays_cancelled_once_the_last_item_finishes() {
        let mut job = Job::new("job-1", "user-1", &["a".to_string(), "b".to_string()]);
        job.cancel_requested = true;
        job.recompute_status();
        assert_eq!(job.status, JobStatus::Cancelled);

        // Both in-flight items finish after cancellation was requested;
        // processed catches up to total, but status must not revert.
        job.record_terminal(true);
        job.record_terminal(true);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.processed, job.total);
    }

    #[test]
    fn completes_normally_without_cancellation() {
        let mut job = Job::new("job-2", "user-1", &["a".to_string()]);
        job.record_terminal(true);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn fails_when_every_item_fails() {
        let mut job = Job::new("job-3", "user-1", &["a".to_string()]);
        job.record_terminal(false);
        assert_eq!(job.status, JobStatus::Failed);
    }
}
