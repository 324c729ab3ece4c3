use crate::error::Result;
use crate::types::{ProbeOutcome, SpeedMeasurement};
use async_trait::async_trait;
use std::net::IpAddr;

/// DNS 解析接口: 通过固定的 DNS 服务器解析单个域名
#[async_trait]
pub trait DnsLookup: Sync + Send {
    async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>>;
}

/// Membership test against the operator's published address ranges.
pub trait RangeOracle: Sync + Send {
    fn contains(&self, address: &IpAddr) -> bool;
}

/// Maps a point-of-presence (colo) code to its region.
pub trait RegionLookup: Sync + Send {
    fn region(&self, colo: &str) -> Option<String>;
}

/// 延迟测试接口 (HTTPing)
#[async_trait]
pub trait LatencyProbe: Sync + Send {
    /// Probes one address. Losses are reported in the outcome; only an
    /// unreachable target or a run with zero successful pings is an error.
    async fn probe(&self, address: IpAddr) -> Result<ProbeOutcome>;
}

/// 下载测速接口
#[async_trait]
pub trait SpeedTester: Sync + Send {
    async fn measure(&self, address: IpAddr, url: &str) -> Result<SpeedMeasurement>;
}
