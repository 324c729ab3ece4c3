use super::colo::extract_colo;
use super::pinned_client;
use crate::error::{Result, SelectorError};
use crate::traits::LatencyProbe;
use crate::types::ProbeOutcome;
use async_trait::async_trait;
use reqwest::header::CONNECTION;
use reqwest::redirect::Policy;
use std::net::IpAddr;
use std::time::{Duration, Instant};

// 单次 ping 超时
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTPing: measures latency as the round-trip of HEAD requests sent to a
/// fixed URL over a connection pinned to the target address.
pub struct HttpPing {
    url: String,
    ping_times: usize,
    timeout: Duration,
}

impl HttpPing {
    pub fn new(url: &str, ping_times: usize) -> Self {
        Self {
            url: url.to_string(),
            ping_times: ping_times.max(1),
            timeout: PING_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LatencyProbe for HttpPing {
    async fn probe(&self, address: IpAddr) -> Result<ProbeOutcome> {
        // 重定向不跟随, 301/302 本身就算可达
        let client = pinned_client(address, &self.url, self.timeout, Policy::none())?;

        // 先访问一次获得 HTTP 状态码及 colo
        let response = client.head(&self.url).send().await?;
        let status = response.status().as_u16();
        if !matches!(status, 200 | 301 | 302) {
            return Err(SelectorError::InvalidStatus {
                status,
                detail: String::new(),
            });
        }
        let colo = extract_colo(response.headers());
        let _ = response.bytes().await;

        let mut success: u32 = 0;
        let mut total = Duration::ZERO;
        for i in 0..self.ping_times {
            let mut request = client.head(&self.url);
            if i == self.ping_times - 1 {
                request = request.header(CONNECTION, "close");
            }

            let start = Instant::now();
            match request.send().await {
                Ok(response) => {
                    let _ = response.bytes().await;
                    success += 1;
                    total += start.elapsed();
                }
                Err(e) => {
                    tracing::debug!(%address, attempt = i + 1, error = %e, "ping failed");
                }
            }
        }

        if success == 0 {
            return Err(SelectorError::AllPingsFailed);
        }

        Ok(ProbeOutcome {
            delay: total / success,
            loss_rate: (self.ping_times - success as usize) as f64 / self.ping_times as f64,
            colo,
        })
    }
}
