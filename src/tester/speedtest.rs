use super::colo::extract_colo;
use super::pinned_client;
use crate::error::{Result, SelectorError};
use crate::traits::SpeedTester;
use crate::types::SpeedMeasurement;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::redirect::Policy;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::io::StreamReader;

/// Number of equal time slices the test duration is split into.
const SLICE_COUNT: u32 = 100;

/// Final speed = EWMA / (duration_secs / NORMALIZATION_DIVISOR). Empirical,
/// tied to the 100-slice window; keep it as-is.
const NORMALIZATION_DIVISOR: f64 = 120.0;

const READ_BUFFER_SIZE: usize = 8192;

// 错误响应体最多保留的字符数
const ERROR_BODY_LIMIT: usize = 200;

/// Simple exponentially-weighted moving average with an average age of 30
/// samples. The first non-zero sample seeds the average.
#[derive(Debug, Default)]
pub struct Ewma {
    value: f64,
}

impl Ewma {
    const AGE: f64 = 30.0;

    pub fn add(&mut self, sample: f64) {
        let decay = 2.0 / (Self::AGE + 1.0);
        if self.value == 0.0 {
            self.value = sample;
        } else {
            self.value = sample * decay + self.value * (1.0 - decay);
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Token bucket holding at most one second's worth of bytes. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(bytes_per_sec: f64) -> Self {
        Self {
            rate: bytes_per_sec,
            capacity: bytes_per_sec,
            tokens: bytes_per_sec,
            last: Instant::now(),
        }
    }

    /// Waits until `n` bytes (capped at the bucket capacity) may be consumed.
    pub async fn acquire(&mut self, n: usize) {
        let wanted = (n as f64).min(self.capacity);
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(self.last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
            self.last = now;

            if self.tokens >= wanted {
                self.tokens -= wanted;
                return;
            }
            let missing = (wanted - self.tokens) / self.rate;
            sleep(Duration::from_secs_f64(missing)).await;
        }
    }
}

/// What one bounded transfer produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub bytes_read: u64,
    pub bytes_per_sec: f64,
}

/// 下载测速: 在 max_duration 内下载文件, 计算稳定速度
pub struct DownloadTester {
    max_duration: Duration,
    rate_limit: Option<f64>, // B/s
}

impl DownloadTester {
    pub fn new(max_duration: Duration, rate_limit: Option<f64>) -> Self {
        Self {
            max_duration,
            rate_limit,
        }
    }
}

#[async_trait]
impl SpeedTester for DownloadTester {
    async fn measure(&self, address: IpAddr, url: &str) -> Result<SpeedMeasurement> {
        let client = pinned_client(address, url, self.max_duration, Policy::limited(10))?;
        let response = client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            // 将响应体内容附加到错误信息中, 限制长度以防刷屏
            let body = response.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                String::new()
            } else {
                format!(", response: {}", body.chars().take(ERROR_BODY_LIMIT).collect::<String>())
            };
            return Err(SelectorError::InvalidStatus {
                status: status.as_u16(),
                detail,
            });
        }

        let colo = extract_colo(response.headers());
        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = Box::pin(StreamReader::new(stream));

        let transfer =
            estimate_throughput(&mut reader, content_length, self.max_duration, self.rate_limit).await;
        tracing::debug!(
            %address,
            bytes = transfer.bytes_read,
            speed = transfer.bytes_per_sec,
            "download finished"
        );

        Ok(SpeedMeasurement {
            bytes_per_sec: transfer.bytes_per_sec,
            colo,
        })
    }
}

/// Reads `reader` for at most `max_duration` and returns a smoothed speed.
///
/// The duration is split into [`SLICE_COUNT`] slices; whenever a read starts
/// in a new slice, the bytes read since the previous boundary are fed to an
/// EWMA. When a payload of known length completes, the unfinished slice is
/// extrapolated to a full one before being fed. A read error or the deadline
/// ends the transfer with whatever was measured so far.
pub async fn estimate_throughput<R>(
    reader: &mut R,
    content_length: Option<u64>,
    max_duration: Duration,
    rate_limit: Option<f64>,
) -> Transfer
where
    R: AsyncRead + Unpin,
{
    let start = Instant::now();
    let deadline = start + max_duration;
    let slice = max_duration / SLICE_COUNT;

    let mut bucket = rate_limit.map(TokenBucket::new);
    let mut ewma = Ewma::default();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut slice_index: u32 = 1;
    let mut next_boundary = start + slice;
    let mut read_total: u64 = 0;
    let mut last_total: u64 = 0;

    loop {
        let now = Instant::now();
        if content_length == Some(read_total) {
            feed_partial_slice(&mut ewma, read_total - last_total, now, start, slice, slice_index);
            break;
        }
        if now > next_boundary {
            slice_index += 1;
            next_boundary = start + slice * slice_index;
            ewma.add((read_total - last_total) as f64);
            last_total = read_total;
        }
        if now > deadline {
            break;
        }

        if let Some(bucket) = bucket.as_mut() {
            if timeout_at(deadline, bucket.acquire(READ_BUFFER_SIZE)).await.is_err() {
                break;
            }
        }

        let n = match timeout_at(deadline, reader.read(&mut buffer)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "read aborted");
                break;
            }
            // 文件大小未知时, 读到结尾即正常结束
            Ok(Ok(0)) if content_length.is_none() => break,
            Ok(Ok(0)) => {
                feed_partial_slice(&mut ewma, read_total - last_total, Instant::now(), start, slice, slice_index);
                break;
            }
            Ok(Ok(n)) => n,
        };
        read_total += n as u64;
    }

    let bytes_per_sec = ewma.value() / (max_duration.as_secs_f64() / NORMALIZATION_DIVISOR);
    Transfer {
        bytes_read: read_total,
        bytes_per_sec: if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
            bytes_per_sec
        } else {
            0.0
        },
    }
}

// 下载数据量 / (当前时间 - 上个时间片) / 时间片
fn feed_partial_slice(
    ewma: &mut Ewma,
    bytes: u64,
    now: Instant,
    start: Instant,
    slice: Duration,
    slice_index: u32,
) {
    let slice_start = start + slice * (slice_index - 1);
    let fraction = now.saturating_duration_since(slice_start).as_secs_f64() / slice.as_secs_f64();
    if fraction > 0.0 {
        let sample = bytes as f64 / fraction;
        if sample.is_finite() {
            ewma.add(sample);
        }
    }
}
