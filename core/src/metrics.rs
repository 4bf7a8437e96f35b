use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct SearchMetrics {
    pub total_searches: u64,
    pub fallback_count: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub items_processed: u64,
    pub items_retried: u64,
    pub items_crashed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorMetrics {
    pub webhook_dispatches: u64,
    pub webhook_ignored: u64,
}

pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    search: SearchMetrics,
    jobs: JobMetrics,
    connectors: ConnectorMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                search: SearchMetrics::default(),
                jobs: JobMetrics::default(),
                connectors: ConnectorMetrics::default(),
                max_history,
            })),
        }
    }

    pub fn record_search(&self, latency_us: u64, used_fallback: bool) {
        let mut state = self.state.lock().unwrap();
        state.search.total_searches += 1;
        if used_fallback {
            state.search.fallback_count += 1;
        }
        state.search.latencies.push_back(latency_us);
        if state.search.latencies.len() > state.max_history {
            state.search.latencies.pop_front();
        }
    }

    pub fn record_job_created(&self) {
        self.state.lock().unwrap().jobs.jobs_created += 1;
    }

    pub fn record_job_terminal(&self, succeeded: bool) {
        let mut state = self.state.lock().unwrap();
        if succeeded {
            state.jobs.jobs_completed += 1;
        } else {
            state.jobs.jobs_failed += 1;
        }
    }

    pub fn record_item_processed(&self, retried: bool, crashed: bool) {
        let mut state = self.state.lock().unwrap();
        state.jobs.items_processed += 1;
        if retried {
            state.jobs.items_retried += 1;
        }
        if crashed {
            state.jobs.items_crashed += 1;
        }
    }

    pub fn record_webhook_dispatch(&self, dispatched: bool) {
        let mut state = self.state.lock().unwrap();
        if dispatched {
            state.connectors.webhook_dispatches += 1;
        } else {
            state.connectors.webhook_ignored += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let search = &state.search;

        let mut sorted_latencies: Vec<u64> = search.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let p50 = percentile(&sorted_latencies, 50.0);
        let p95 = percentile(&sorted_latencies, 95.0);
        let p99 = percentile(&sorted_latencies, 99.0);

        let fallback_rate = if search.total_searches > 0 {
            search.fallback_count as f32 / search.total_searches as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_searches: search.total_searches,
            fallback_rate,
            p50,
            p95,
            p99,
            history_count: search.latencies.len(),
            jobs_created: state.jobs.jobs_created,
            jobs_completed: state.jobs.jobs_completed,
            jobs_failed: state.jobs.jobs_failed,
            items_processed: state.jobs.items_processed,
            items_retried: state.jobs.items_retried,
            items_crashed: state.jobs.items_crashed,
            webhook_dispatches: state.connectors.webhook_dispatches,
            webhook_ignored: state.connectors.webhook_ignored,
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_searches: u64,
    pub fallback_rate: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub items_processed: u64,
    pub items_retried: u64,
    pub items_crashed: u64,
    pub webhook_dispatches: u64,
    pub webhook_ignored: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_search_latency_and_fallback_rate() {
        let collector = MetricsCollector::new(100);
        collector.record_search(1000, false);
        collector.record_search(2000, true);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_searches, 2);
        assert_eq!(snapshot.fallback_rate, 0.5);
    }

    #[test]
    fn tracks_job_and_item_counters() {
        let collector = MetricsCollector::new(100);
        collector.record_job_created();
        collector.record_item_processed(true, false);
        collector.record_item_processed(false, true);
        collector.record_job_terminal(true);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.jobs_created, 1);
        assert_eq!(snapshot.jobs_completed, 1);
        assert_eq!(snapshot.items_processed, 2);
        assert_eq!(snapshot.items_retried, 1);
        assert_eq!(snapshot.items_crashed, 1);
    }
}
