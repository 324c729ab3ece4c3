use crate::error::{Result, SelectorError};
use crate::types::{GroupBy, IpVersion};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_TOP_N: usize = 5;
const DEFAULT_PING_TIMES: usize = 4;
const DEFAULT_SPEEDTEST_SECONDS: u64 = 10;

/// 配置文件结构, 所有可识别的字段都显式列出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dns_concurrency: i64,
    pub latency_test_concurrency: i64,
    pub speedtest_concurrency: i64,
    pub max_latency: u64, // ms
    pub top_n_per_group: i64,
    pub ip_version: IpVersion,
    pub speedtest_rate_limit_mb: f64, // MB/s, 0 = unlimited
    pub group_by: GroupBy,
    pub filter_regions: Vec<String>,
    pub filter_colos: Vec<String>,
    pub min_speed: f64, // MB/s, 0 = no minimum
    pub dns_server: String,
    pub latency_url: String,
    pub ping_times: i64,
    pub speed_url: String,
    pub fallback_speed_url: String,
    pub speedtest_seconds: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns_concurrency: 20,
            latency_test_concurrency: 50,
            speedtest_concurrency: 4,
            max_latency: 300,
            top_n_per_group: DEFAULT_TOP_N as i64,
            ip_version: IpVersion::Ipv4,
            speedtest_rate_limit_mb: 0.0,
            group_by: GroupBy::Region,
            filter_regions: Vec::new(),
            filter_colos: Vec::new(),
            min_speed: 0.0,
            dns_server: "1.1.1.1:53".to_string(),
            latency_url: "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
            ping_times: DEFAULT_PING_TIMES as i64,
            speed_url: "https://speed.cloudflare.com/__down?bytes=200000000".to_string(),
            fallback_speed_url: "https://cf.xiu2.xyz/url".to_string(),
            speedtest_seconds: DEFAULT_SPEEDTEST_SECONDS as i64,
        }
    }
}

/// Partial configuration: only the fields that are present get applied by [`Config::merge`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConfigOverride {
    pub dns_concurrency: Option<i64>,
    pub latency_test_concurrency: Option<i64>,
    pub speedtest_concurrency: Option<i64>,
    pub max_latency: Option<u64>,
    pub top_n_per_group: Option<i64>,
    pub ip_version: Option<IpVersion>,
    pub speedtest_rate_limit_mb: Option<f64>,
    pub group_by: Option<GroupBy>,
    pub filter_regions: Option<Vec<String>>,
    pub filter_colos: Option<Vec<String>>,
    pub min_speed: Option<f64>,
    pub dns_server: Option<String>,
    pub latency_url: Option<String>,
    pub ping_times: Option<i64>,
    pub speed_url: Option<String>,
    pub fallback_speed_url: Option<String>,
    pub speedtest_seconds: Option<i64>,
}

impl ConfigOverride {
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Effective parameters of one run, after validation and auto-correction.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub dns_concurrency: usize,
    pub latency_concurrency: usize,
    pub speed_concurrency: usize,
    pub max_latency: Duration,
    pub top_n_per_group: usize,
    pub ip_version: IpVersion,
    pub rate_limit: Option<f64>, // B/s
    pub group_by: GroupBy,
    pub filter_regions: Vec<String>,
    pub filter_colos: Vec<String>,
    pub min_speed: Option<f64>, // B/s
    pub dns_server: SocketAddr,
    pub latency_url: String,
    pub ping_times: usize,
    pub speed_url: String,
    pub fallback_speed_url: String,
    pub speedtest_duration: Duration,
}

impl Config {
    /// Loading strategy:
    /// 1. An explicit path must exist and parse.
    /// 2. Otherwise try the user config (~/.config/cfselect/config.toml).
    /// 3. Fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        if let Some(user_path) = user_config_path() {
            if user_path.exists() {
                tracing::debug!(path = %user_path.display(), "loading user config");
                return Self::from_file(&user_path);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SelectorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Overlays every field present in `o`; absent fields keep their current value.
    pub fn merge(&mut self, o: ConfigOverride) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = o.$field { self.$field = v; })*
            };
        }
        overlay!(
            dns_concurrency,
            latency_test_concurrency,
            speedtest_concurrency,
            max_latency,
            top_n_per_group,
            ip_version,
            speedtest_rate_limit_mb,
            group_by,
            filter_regions,
            filter_colos,
            min_speed,
            dns_server,
            latency_url,
            ping_times,
            speed_url,
            fallback_speed_url,
            speedtest_seconds,
        );
    }

    /// Validates the configuration. Non-positive counts are corrected with a
    /// warning; an unparsable DNS server address or URL is fatal.
    pub fn normalized(&self) -> Result<RunSettings> {
        let dns_server: SocketAddr = self.dns_server.parse().map_err(|_| {
            SelectorError::Config(format!("dns_server '{}' is not ip:port", self.dns_server))
        })?;
        for url in [&self.latency_url, &self.speed_url, &self.fallback_speed_url] {
            reqwest::Url::parse(url).map_err(|e| SelectorError::InvalidUrl(format!("{url}: {e}")))?;
        }

        Ok(RunSettings {
            dns_concurrency: positive_or("dns_concurrency", self.dns_concurrency, DEFAULT_CONCURRENCY),
            latency_concurrency: positive_or(
                "latency_test_concurrency",
                self.latency_test_concurrency,
                DEFAULT_CONCURRENCY,
            ),
            speed_concurrency: positive_or(
                "speedtest_concurrency",
                self.speedtest_concurrency,
                DEFAULT_CONCURRENCY,
            ),
            max_latency: Duration::from_millis(self.max_latency),
            top_n_per_group: positive_or("top_n_per_group", self.top_n_per_group, DEFAULT_TOP_N),
            ip_version: self.ip_version,
            rate_limit: mb_to_bytes(self.speedtest_rate_limit_mb),
            group_by: self.group_by,
            filter_regions: self.filter_regions.clone(),
            filter_colos: self.filter_colos.clone(),
            min_speed: mb_to_bytes(self.min_speed),
            dns_server,
            latency_url: self.latency_url.clone(),
            ping_times: positive_or("ping_times", self.ping_times, DEFAULT_PING_TIMES),
            speed_url: self.speed_url.clone(),
            fallback_speed_url: self.fallback_speed_url.clone(),
            speedtest_duration: Duration::from_secs(positive_or(
                "speedtest_seconds",
                self.speedtest_seconds,
                DEFAULT_SPEEDTEST_SECONDS as usize,
            ) as u64),
        })
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "cfselect").map(|dirs| dirs.config_dir().join("config.toml"))
}

// 非正数会导致信号量死锁, 自动修正为默认值
fn positive_or(name: &str, value: i64, default: usize) -> usize {
    if value <= 0 {
        tracing::warn!("{} is set to {}, correcting to {}", name, value, default);
        default
    } else {
        value as usize
    }
}

fn mb_to_bytes(mb: f64) -> Option<f64> {
    if mb > 0.0 && mb.is_finite() {
        Some(mb * 1024.0 * 1024.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_merge_only_present_fields() {
        let mut config = Config {
            filter_regions: vec!["Europe".to_string()],
            ..Config::default()
        };
        let o = ConfigOverride::from_json(r#"{"max_latency": 150, "group_by": "colo"}"#).unwrap();
        config.merge(o);

        assert_eq!(config.max_latency, 150);
        assert_eq!(config.group_by, GroupBy::Colo);
        // untouched fields keep the base value
        assert_eq!(config.filter_regions, vec!["Europe".to_string()]);
        assert_eq!(config.dns_concurrency, Config::default().dns_concurrency);
    }

    #[test]
    fn test_unknown_enum_values_fall_back() {
        let o = ConfigOverride::from_json(r#"{"group_by": "city", "ip_version": "ip"}"#).unwrap();
        assert_eq!(o.group_by, Some(GroupBy::Region));
        assert_eq!(o.ip_version, Some(IpVersion::Both));
    }

    #[test]
    fn test_non_positive_limits_are_corrected() {
        let config = Config {
            dns_concurrency: 0,
            latency_test_concurrency: -3,
            speedtest_concurrency: 0,
            top_n_per_group: 0,
            ..Config::default()
        };
        let settings = config.normalized().unwrap();
        assert_eq!(settings.dns_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.latency_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.speed_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.top_n_per_group, DEFAULT_TOP_N);
    }

    #[test]
    fn test_unit_conversion_and_disabled_limits() {
        let config = Config {
            min_speed: 2.0,
            speedtest_rate_limit_mb: 0.0,
            ..Config::default()
        };
        let settings = config.normalized().unwrap();
        assert_eq!(settings.min_speed, Some(2.0 * 1024.0 * 1024.0));
        assert_eq!(settings.rate_limit, None);
    }

    #[test]
    fn test_bad_dns_server_is_fatal() {
        let config = Config {
            dns_server: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.normalized(), Err(SelectorError::Config(_))));
    }

    #[test]
    fn test_load_toml_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "max_latency = 200\nfilter_colos = [\"HKG\", \"SJC\"]\nip_version = \"ipv6\"\n",
        )?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.max_latency, 200);
        assert_eq!(config.filter_colos, vec!["HKG".to_string(), "SJC".to_string()]);
        assert_eq!(config.ip_version, IpVersion::Ipv6);
        assert_eq!(config.speed_url, Config::default().speed_url);

        // round trip through the printer used by `cfselect config`
        let reparsed: Config = toml::from_str(&config.to_toml()?)?;
        assert_eq!(reparsed, config);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let dir = tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(result, Err(SelectorError::Config(_))));
    }
}
