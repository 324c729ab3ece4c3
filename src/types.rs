use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// 候选地址: 从域名解析得到的 IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: IpAddr,
    pub source_domain: String, // 从哪个域名解析出来的
}

impl Candidate {
    pub fn new(address: IpAddr, source_domain: &str) -> Self {
        Self {
            address,
            source_domain: source_domain.to_string(),
        }
    }

    /// Normalized address string used as the deduplication key.
    pub fn key(&self) -> String {
        self.address.to_string()
    }
}

/// Outcome of one HTTPing run against a single address.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub delay: Duration,
    pub loss_rate: f64,
    pub colo: String,
}

/// 延迟测试结果
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyMeasurement {
    pub candidate: Candidate,
    pub delay: Duration,
    pub loss_rate: f64, // 0.0 - 1.0
    pub colo: String,   // e.g. "SJC"
    pub region: String, // e.g. "North America"
}

/// 下载测速结果
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedMeasurement {
    pub bytes_per_sec: f64,
    pub colo: String,
}

/// Terminal result of a run: latency fields plus measured throughput.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalResult {
    pub address: String,
    pub source_domain: String,
    pub delay_ms: f64,
    pub loss_rate: f64,
    pub colo: String,
    pub region: String,
    pub download_speed: f64, // B/s
}

impl FinalResult {
    pub fn new(latency: &LatencyMeasurement, bytes_per_sec: f64) -> Self {
        Self {
            address: latency.candidate.key(),
            source_domain: latency.candidate.source_domain.clone(),
            delay_ms: latency.delay.as_secs_f64() * 1000.0,
            loss_rate: latency.loss_rate,
            colo: latency.colo.clone(),
            region: latency.region.clone(),
            download_speed: bytes_per_sec,
        }
    }

    pub fn speed_mb(&self) -> f64 {
        self.download_speed / 1024.0 / 1024.0
    }
}

/// Address family preference for DNS resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[default]
    Ipv4,
    Ipv6,
    #[serde(other)]
    Both,
}

/// Grouping key for the bandwidth stage. Anything other than "colo" groups by region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Colo,
    #[default]
    #[serde(other)]
    Region,
}

impl GroupBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::Colo => "colo",
            GroupBy::Region => "region",
        }
    }
}
