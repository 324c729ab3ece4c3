use crate::traits::{RangeOracle, RegionLookup};
use crate::types::{Candidate, GroupBy, LatencyMeasurement, ProbeOutcome};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// 丢包率上限 (10%)
pub const MAX_LOSS_RATE: f64 = 0.1;

/// Region assigned to colo codes missing from the lookup table.
pub const UNKNOWN_REGION: &str = "Unknown";

/// Group key -> measurements sorted by ascending delay.
pub type Groups = BTreeMap<String, Vec<LatencyMeasurement>>;

/// Deduplicates by address string; a later entry replaces an earlier one.
/// The result is ordered by address.
pub fn deduplicate(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut unique: HashMap<String, Candidate> = HashMap::new();
    for candidate in candidates {
        unique.insert(candidate.key(), candidate);
    }
    let mut unique: Vec<Candidate> = unique.into_values().collect();
    unique.sort_by_key(|c| c.address);
    unique
}

pub fn filter_in_range(candidates: Vec<Candidate>, oracle: &dyn RangeOracle) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| oracle.contains(&c.address))
        .collect()
}

/// Absolute quality bar applied before a measurement is built.
pub fn passes_ceiling(outcome: &ProbeOutcome, max_latency: Duration) -> bool {
    outcome.loss_rate <= MAX_LOSS_RATE && outcome.delay <= max_latency
}

/// 标注区域, 未知 colo 归入 "Unknown"
pub fn classify(
    candidate: Candidate,
    outcome: ProbeOutcome,
    regions: &dyn RegionLookup,
) -> LatencyMeasurement {
    let region = regions
        .region(&outcome.colo)
        .unwrap_or_else(|| UNKNOWN_REGION.to_string());
    LatencyMeasurement {
        candidate,
        delay: outcome.delay,
        loss_rate: outcome.loss_rate,
        colo: outcome.colo,
        region,
    }
}

/// Keeps measurements matching every non-empty allow-list.
pub fn apply_allow_lists(
    results: Vec<LatencyMeasurement>,
    regions: &[String],
    colos: &[String],
) -> Vec<LatencyMeasurement> {
    let regions: HashSet<&str> = regions.iter().map(String::as_str).collect();
    let colos: HashSet<&str> = colos.iter().map(String::as_str).collect();

    results
        .into_iter()
        .filter(|r| regions.is_empty() || regions.contains(r.region.as_str()))
        .filter(|r| colos.is_empty() || colos.contains(r.colo.as_str()))
        .collect()
}

pub fn group_results(results: Vec<LatencyMeasurement>, group_by: GroupBy) -> Groups {
    let mut groups = Groups::new();
    for result in results {
        let key = match group_by {
            GroupBy::Colo => result.colo.clone(),
            GroupBy::Region => result.region.clone(),
        };
        groups.entry(key).or_default().push(result);
    }

    // 每个分组按延迟排序
    for members in groups.values_mut() {
        members.sort_by_key(|m| m.delay);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ranges::CidrSet;
    use crate::sources::locations::RegionMap;

    fn candidate(address: &str, domain: &str) -> Candidate {
        Candidate::new(address.parse().unwrap(), domain)
    }

    fn measurement(address: &str, delay_ms: u64, colo: &str, region: &str) -> LatencyMeasurement {
        LatencyMeasurement {
            candidate: candidate(address, "example.com"),
            delay: Duration::from_millis(delay_ms),
            loss_rate: 0.0,
            colo: colo.to_string(),
            region: region.to_string(),
        }
    }

    #[test]
    fn test_overlapping_domains_keep_in_range_addresses() {
        // two domains, three distinct addresses, two of them in range
        let resolved = vec![
            candidate("104.16.1.1", "a.example"),
            candidate("104.16.1.2", "a.example"),
            candidate("104.16.1.1", "b.example"),
            candidate("8.8.8.8", "b.example"),
        ];
        let oracle = CidrSet::parse("104.16.0.0/13", "test").unwrap();

        let filtered = filter_in_range(deduplicate(resolved), &oracle);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].key(), "104.16.1.1");
        assert_eq!(filtered[0].source_domain, "b.example"); // last wins
        assert_eq!(filtered[1].key(), "104.16.1.2");
        assert!(filtered.iter().all(|c| oracle.contains(&c.address)));
    }

    #[test]
    fn test_deduplicate_is_order_independent() {
        let forward = vec![candidate("104.16.1.2", "a"), candidate("104.16.1.1", "a")];
        let backward = vec![candidate("104.16.1.1", "a"), candidate("104.16.1.2", "a")];
        assert_eq!(deduplicate(forward), deduplicate(backward));
    }

    #[test]
    fn test_ceiling_checks_loss_and_delay() {
        let ok = ProbeOutcome {
            delay: Duration::from_millis(120),
            loss_rate: 0.0,
            colo: "HKG".to_string(),
        };
        assert!(passes_ceiling(&ok, Duration::from_millis(300)));
        assert!(!passes_ceiling(&ok, Duration::from_millis(100)));

        let lossy = ProbeOutcome { loss_rate: 0.25, ..ok };
        assert!(!passes_ceiling(&lossy, Duration::from_millis(300)));
    }

    #[test]
    fn test_unknown_colo_maps_to_sentinel() {
        let regions = RegionMap::from_json(r#"[{"iata":"HKG","region":"Asia Pacific"}]"#).unwrap();
        let outcome = ProbeOutcome {
            delay: Duration::from_millis(50),
            loss_rate: 0.0,
            colo: "ZZZ".to_string(),
        };
        let m = classify(candidate("104.16.1.1", "a"), outcome, &regions);
        assert_eq!(m.region, UNKNOWN_REGION);
        assert_eq!(m.colo, "ZZZ");
    }

    #[test]
    fn test_allow_lists_are_anded() {
        let results = vec![
            measurement("104.16.0.1", 10, "HKG", "Asia Pacific"),
            measurement("104.16.0.2", 20, "NRT", "Asia Pacific"),
            measurement("104.16.0.3", 30, "SJC", "North America"),
        ];

        let kept = apply_allow_lists(results.clone(), &[], &[]);
        assert_eq!(kept.len(), 3);

        let kept = apply_allow_lists(results.clone(), &["Asia Pacific".to_string()], &[]);
        assert_eq!(kept.len(), 2);

        let kept = apply_allow_lists(
            results,
            &["Asia Pacific".to_string()],
            &["HKG".to_string(), "SJC".to_string()],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].colo, "HKG");
    }

    #[test]
    fn test_groups_are_sorted_by_delay() {
        let results = vec![
            measurement("104.16.0.1", 90, "HKG", "Asia Pacific"),
            measurement("104.16.0.2", 10, "NRT", "Asia Pacific"),
            measurement("104.16.0.3", 40, "HKG", "Asia Pacific"),
        ];

        let by_region = group_results(results.clone(), GroupBy::Region);
        assert_eq!(by_region.len(), 1);
        let delays: Vec<u128> = by_region["Asia Pacific"].iter().map(|m| m.delay.as_millis()).collect();
        assert_eq!(delays, vec![10, 40, 90]);

        let by_colo = group_results(results, GroupBy::Colo);
        assert_eq!(by_colo.len(), 2);
        assert_eq!(by_colo["HKG"].len(), 2);
        assert!(by_colo["HKG"].windows(2).all(|w| w[0].delay <= w[1].delay));
    }
}
