use super::filter::Groups;
use crate::progress::ProgressSink;
use crate::traits::SpeedTester;
use crate::types::{FinalResult, LatencyMeasurement};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Discards on the primary endpoint after which the run switches to the fallback.
pub const DISCARD_THRESHOLD: u32 = 10;

/// The measurement URL chosen for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub primary: bool,
}

/// Run-scoped state shared by every group worker: the low-speed discard
/// counter and the one-way primary -> fallback endpoint switch.
#[derive(Debug)]
pub struct RunCoordinator {
    primary: String,
    fallback: String,
    discarded: AtomicU32,
    on_primary: Mutex<bool>,
}

impl RunCoordinator {
    pub fn new(primary: &str, fallback: &str) -> Self {
        Self {
            primary: primary.to_string(),
            fallback: fallback.to_string(),
            discarded: AtomicU32::new(0),
            on_primary: Mutex::new(true),
        }
    }

    pub fn discarded(&self) -> u32 {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Counts a below-minimum result, but only if it was measured on the primary endpoint.
    pub fn record_discard(&self, endpoint: &Endpoint) {
        if endpoint.primary {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Picks the endpoint for the next attempt, switching to the fallback
    /// exactly once when the discard counter has reached the threshold.
    pub async fn select_endpoint(&self, progress: &ProgressSink) -> Endpoint {
        let mut on_primary = self.on_primary.lock().await;
        if *on_primary {
            let discarded = self.discarded();
            if discarded >= DISCARD_THRESHOLD {
                *on_primary = false;
                tracing::warn!(discarded, fallback = %self.fallback, "switching speed test endpoint");
                progress.emit(format!(
                    "Warning: discarded {} slow IPs, switching to fallback speed test URL: {}",
                    discarded, self.fallback
                ));
            }
        }

        let url = if *on_primary {
            self.primary.clone()
        } else {
            self.fallback.clone()
        };
        Endpoint {
            url,
            primary: *on_primary,
        }
    }
}

/// Per-run parameters of the bandwidth stage.
#[derive(Debug, Clone)]
pub struct SpeedPlan {
    pub top_n_per_group: usize,
    pub concurrency: usize,
    pub min_speed: Option<f64>, // B/s
}

/// 下载速度测试 (带补充逻辑)
///
/// Every group gets its own worker that walks its candidates in latency
/// order until `top_n_per_group` pass or the list runs out. All workers share
/// one semaphore capping the downloads in flight. Results come back sorted by
/// descending speed.
pub async fn test_speeds(
    groups: Groups,
    tester: Arc<dyn SpeedTester>,
    plan: &SpeedPlan,
    coordinator: Arc<RunCoordinator>,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Vec<FinalResult> {
    let semaphore = Arc::new(Semaphore::new(plan.concurrency.max(1)));
    let results = Arc::new(Mutex::new(Vec::new()));
    let mut workers = JoinSet::new();

    for (group, candidates) in groups {
        let worker = GroupWorker {
            group,
            tester: tester.clone(),
            plan: plan.clone(),
            coordinator: coordinator.clone(),
            semaphore: semaphore.clone(),
            results: results.clone(),
            cancel: cancel.clone(),
            progress: progress.clone(),
        };
        workers.spawn(worker.run(candidates));
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "speed test worker panicked");
        }
    }

    let mut results = std::mem::take(&mut *results.lock().await);
    results.sort_by(|a, b| b.download_speed.total_cmp(&a.download_speed));
    results
}

struct GroupWorker {
    group: String,
    tester: Arc<dyn SpeedTester>,
    plan: SpeedPlan,
    coordinator: Arc<RunCoordinator>,
    semaphore: Arc<Semaphore>,
    results: Arc<Mutex<Vec<FinalResult>>>,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl GroupWorker {
    async fn run(self, candidates: Vec<LatencyMeasurement>) {
        let target = self.plan.top_n_per_group;
        self.progress.emit(format!(
            "Testing group '{}': target {}, {} candidates...",
            self.group,
            target,
            candidates.len()
        ));

        let mut successes = 0usize;
        for candidate in &candidates {
            // 已经收集到足够的结果
            if successes >= target || self.cancel.is_cancelled() {
                break;
            }

            let address = candidate.candidate.address;

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => permit,
            };
            let Ok(slot) = permit else { break };

            // 拿到下载槽位后再选择测速地址
            let endpoint = self.coordinator.select_endpoint(&self.progress).await;
            let measurement = match self.tester.measure(address, &endpoint.url).await {
                Ok(m) => m,
                Err(e) => {
                    self.progress.emit(format!("IP {} speed test failed: {}", address, e));
                    continue;
                }
            };

            let speed = measurement.bytes_per_sec;
            tracing::debug!(%address, colo = %measurement.colo, speed, url = %endpoint.url, "download measured");

            // the discard must be counted before the slot is released
            if let Some(min) = self.plan.min_speed {
                if speed < min {
                    self.progress.emit(format!(
                        "IP {} speed {:.2} MB/s is below the minimum {:.2} MB/s, discarded",
                        address,
                        to_mb(speed),
                        to_mb(min)
                    ));
                    self.coordinator.record_discard(&endpoint);
                    continue;
                }
            }
            drop(slot);

            let result = FinalResult::new(candidate, speed);
            self.progress.emit(format!(
                "IP {}: download speed={:.2} MB/s (group: {})",
                address,
                result.speed_mb(),
                self.group
            ));
            self.results.lock().await.push(result);
            successes += 1;
        }

        self.progress.emit(format!(
            "Group '{}' finished with {} results.",
            self.group, successes
        ));
    }
}

fn to_mb(bytes_per_sec: f64) -> f64 {
    bytes_per_sec / 1024.0 / 1024.0
}
