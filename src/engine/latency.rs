use super::filter::{classify, passes_ceiling};
use crate::progress::ProgressSink;
use crate::traits::{LatencyProbe, RegionLookup};
use crate::types::{Candidate, LatencyMeasurement};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// 并发延迟测试
///
/// Candidates that fail the probe or exceed the loss/latency ceiling are
/// dropped without a status line.
pub async fn test_latencies(
    candidates: Vec<Candidate>,
    prober: Arc<dyn LatencyProbe>,
    regions: Arc<dyn RegionLookup>,
    limit: usize,
    max_latency: Duration,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Vec<LatencyMeasurement> {
    progress.emit(format!("Testing latency of {} addresses...", candidates.len()));

    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let results = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();

    for candidate in candidates {
        if cancel.is_cancelled() {
            break;
        }
        let semaphore = semaphore.clone();
        let results = results.clone();
        let prober = prober.clone();
        let regions = regions.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();

        tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = semaphore.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };

            let outcome = match prober.probe(candidate.address).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::debug!(address = %candidate.address, error = %e, "latency probe failed");
                    return;
                }
            };
            if !passes_ceiling(&outcome, max_latency) {
                return;
            }

            let measurement = classify(candidate, outcome, regions.as_ref());
            progress.emit(format!(
                "IP {}: delay={:.2}ms, loss={:.0}%, colo={}, region={}",
                measurement.candidate.address,
                measurement.delay.as_secs_f64() * 1000.0,
                measurement.loss_rate * 100.0,
                measurement.colo,
                measurement.region
            ));
            results.lock().await.push(measurement);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "latency task panicked");
        }
    }

    let mut results = results.lock().await;
    std::mem::take(&mut *results)
}
