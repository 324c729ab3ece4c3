pub mod filter;
pub mod latency;
pub mod resolve;
pub mod speed;

use crate::config::RunSettings;
use crate::error::{Result, SelectorError};
use crate::progress::ProgressSink;
use crate::tester::{DownloadTester, HttpPing};
use crate::traits::{DnsLookup, LatencyProbe, RangeOracle, RegionLookup, SpeedTester};
use crate::types::FinalResult;
use resolve::HickoryLookup;
use speed::{RunCoordinator, SpeedPlan};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// IP 优选引擎: resolve -> range filter -> latency -> group -> bandwidth.
///
/// Every collaborator sits behind a trait object so a stage can be swapped
/// without touching the others.
pub struct Engine {
    settings: RunSettings,
    lookup: Arc<dyn DnsLookup>,
    oracle: Arc<dyn RangeOracle>,
    regions: Arc<dyn RegionLookup>,
    prober: Arc<dyn LatencyProbe>,
    tester: Arc<dyn SpeedTester>,
}

impl Engine {
    /// Builds an engine with the network-backed lookup, prober and speed tester.
    pub fn new(
        settings: RunSettings,
        oracle: Arc<dyn RangeOracle>,
        regions: Arc<dyn RegionLookup>,
    ) -> Self {
        let lookup = Arc::new(HickoryLookup::new(settings.dns_server, settings.ip_version));
        let prober = Arc::new(HttpPing::new(&settings.latency_url, settings.ping_times));
        let tester = Arc::new(DownloadTester::new(settings.speedtest_duration, settings.rate_limit));
        Self {
            settings,
            lookup,
            oracle,
            regions,
            prober,
            tester,
        }
    }

    #[cfg(test)]
    pub fn with_lookup(mut self, lookup: Arc<dyn DnsLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    #[cfg(test)]
    pub fn with_prober(mut self, prober: Arc<dyn LatencyProbe>) -> Self {
        self.prober = prober;
        self
    }

    #[cfg(test)]
    pub fn with_tester(mut self, tester: Arc<dyn SpeedTester>) -> Self {
        self.tester = tester;
        self
    }

    /// Runs all stages in order; each stage finishes for the whole candidate
    /// set before the next begins. A short or empty result is still `Ok`.
    pub async fn run(
        &self,
        domains: &[String],
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<Vec<FinalResult>> {
        if domains.is_empty() {
            return Err(SelectorError::EmptyInput("domain list".to_string()));
        }
        let s = &self.settings;

        progress.emit("Step 1/5: DNS resolution...");
        let resolved = resolve::resolve_domains(
            domains,
            self.lookup.clone(),
            s.dns_concurrency,
            s.ip_version,
            cancel,
            progress,
        )
        .await;
        let resolved_count = resolved.len();
        tracing::info!(domains = domains.len(), addresses = resolved_count, "resolution stage done");

        progress.emit("Step 2/5: range filtering...");
        let unique = filter::deduplicate(resolved);
        let unique_count = unique.len();
        let candidates = filter::filter_in_range(unique, self.oracle.as_ref());
        progress.emit(format!(
            "{} unique addresses out of {} resolved, {} within the target ranges.",
            unique_count,
            resolved_count,
            candidates.len()
        ));

        progress.emit("Step 3/5: latency test...");
        let measured = latency::test_latencies(
            candidates,
            self.prober.clone(),
            self.regions.clone(),
            s.latency_concurrency,
            s.max_latency,
            cancel,
            progress,
        )
        .await;
        tracing::info!(passed = measured.len(), "latency stage done");
        progress.emit(format!("Latency test finished: {} addresses passed.", measured.len()));

        progress.emit("Step 4/5: filtering and grouping...");
        let kept = filter::apply_allow_lists(measured, &s.filter_regions, &s.filter_colos);
        let groups = filter::group_results(kept, s.group_by);
        progress.emit(format!(
            "Grouped addresses by '{}' into {} groups.",
            s.group_by.as_str(),
            groups.len()
        ));

        progress.emit("Step 5/5: download speed test...");
        let plan = SpeedPlan {
            top_n_per_group: s.top_n_per_group,
            concurrency: s.speed_concurrency,
            min_speed: s.min_speed,
        };
        // 每次运行独立的协调器, 并发运行互不干扰
        let coordinator = Arc::new(RunCoordinator::new(&s.speed_url, &s.fallback_speed_url));
        let results = speed::test_speeds(
            groups,
            self.tester.clone(),
            &plan,
            coordinator.clone(),
            cancel,
            progress,
        )
        .await;
        tracing::info!(
            results = results.len(),
            discarded = coordinator.discarded(),
            "speed stage done"
        );
        progress.emit("Speed test finished.");

        Ok(results)
    }
}
