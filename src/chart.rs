use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use reqwest::{Client, Url};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::template::StateKey;

pub const DEFAULT_CHART_BASE: &str = "https://quickchart.io/chart";

/// Axis labels of the 12-band radar, in drawing order.
pub const BAND_LABELS: [&str; 12] = [
    "C_low", "C_mid", "C_high", "T_low", "T_mid", "T_high", "R_low", "R_mid", "R_high", "L_low",
    "L_mid", "L_high",
];

/// Upper bound of the 4-axis count radar.
const COUNT_SCALE_MAX: f64 = 5.0;

/// Largest chart response read into memory.
pub const MAX_CHART_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid chart url: {0}")]
    Url(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chart service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("chart url scheme {0:?} is not allowed")]
    Scheme(String),
    #[error("chart response exceeds {0} bytes")]
    TooLarge(usize),
    #[error("chart response is neither PNG nor JPEG ({0} bytes)")]
    UnknownFormat(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Raster chart bytes, already sniffed.
#[derive(Debug, Clone)]
pub struct ChartImage {
    pub format: ImageFormat,
    pub bytes: Bytes,
}

/// Identifies PNG and JPEG by their magic numbers.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else {
        None
    }
}

impl ChartImage {
    pub fn from_bytes(bytes: Bytes) -> Result<Self, ChartError> {
        let format = sniff_image(&bytes).ok_or(ChartError::UnknownFormat(bytes.len()))?;
        Ok(Self { format, bytes })
    }
}

fn radar_config(labels: &[&str], data: &[f64], suggested_max: f64) -> serde_json::Value {
    json!({
        "type": "radar",
        "data": {
            "labels": labels,
            "datasets": [{
                "label": "",
                "data": data,
                "fill": true,
                "borderWidth": 2,
                "pointRadius": 2
            }]
        },
        "options": {
            "plugins": { "legend": { "display": false } },
            "scales": {
                "r": {
                    "beginAtZero": true,
                    "suggestedMax": suggested_max,
                    "ticks": { "display": false },
                    "grid": { "circular": true }
                }
            }
        }
    })
}

fn chart_url(base: &str, config: &serde_json::Value) -> Result<Url, ChartError> {
    Url::parse_with_params(
        base,
        &[
            ("c", config.to_string().as_str()),
            ("backgroundColor", "transparent"),
            ("format", "png"),
            ("width", "700"),
            ("height", "700"),
        ],
    )
    .map_err(|e| ChartError::Url(e.to_string()))
}

/// 12-axis radar, each band scaled by the largest observed value (at least 1).
pub fn spider_chart_url_bands(base: &str, bands: &[f64; 12]) -> Result<Url, ChartError> {
    let max = bands.iter().copied().fold(1.0_f64, f64::max);
    let scaled: Vec<f64> = bands.iter().map(|v| v / max).collect();
    chart_url(base, &radar_config(&BAND_LABELS, &scaled, 1.0))
}

/// 4-axis radar of state counts on a fixed 0-5 scale.
pub fn spider_chart_url_counts(base: &str, counts: &[(StateKey, f64)]) -> Result<Url, ChartError> {
    let labels: Vec<&str> = StateKey::ALL.iter().map(|k| k.as_str()).collect();
    let data: Vec<f64> = StateKey::ALL
        .iter()
        .map(|key| {
            counts
                .iter()
                .find(|(k, _)| k == key)
                .map(|&(_, v)| v.clamp(0.0, COUNT_SCALE_MAX))
                .unwrap_or(0.0)
        })
        .collect();
    chart_url(base, &radar_config(&labels, &data, COUNT_SCALE_MAX))
}

/// Appends a `cb` query parameter so caches between us and the chart host
/// never serve a stale image.
pub fn with_cache_buster(raw: &str) -> Result<Url, ChartError> {
    let mut url = Url::parse(raw).map_err(|e| ChartError::Url(e.to_string()))?;
    let nonce: u16 = rand::random();
    url.query_pairs_mut()
        .append_pair("cb", &format!("{}{:05}", Utc::now().timestamp_millis(), nonce));
    Ok(url)
}

/// Where chart images come from. Fetch failures are never fatal: callers get
/// `None` and leave the chart region blank.
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Option<ChartImage>;
}

/// Only plain web URLs are fetched; `file:`, `ftp:` and friends are refused
/// before any request is made.
pub fn ensure_web_url(url: &Url) -> Result<(), ChartError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ChartError::Scheme(other.to_string())),
    }
}

pub struct HttpChartSource {
    client: Client,
    max_bytes: usize,
}

impl HttpChartSource {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("⚠️ Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self::with_client(client)
    }

    fn with_client(client: Client) -> Self {
        Self {
            client,
            max_bytes: MAX_CHART_BYTES,
        }
    }

    /// Caps the response body size.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn try_fetch(&self, url: &Url) -> Result<ChartImage, ChartError> {
        ensure_web_url(url)?;
        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChartError::Status(status));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(ChartError::TooLarge(self.max_bytes));
        }

        // The declared length may be absent or wrong, so the cap is enforced
        // while reading too.
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(ChartError::TooLarge(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        ChartImage::from_bytes(body.freeze())
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn fetch(&self, url: &Url) -> Option<ChartImage> {
        let host = url.host_str().unwrap_or("?").to_string();
        info!("🔗 Fetching chart from {}", host);
        match self.try_fetch(url).await {
            Ok(image) => {
                info!(
                    "🖼️ Chart fetched: {:?}, {} bytes",
                    image.format,
                    image.bytes.len()
                );
                Some(image)
            }
            Err(e) => {
                warn!("⚠️ Chart fetch from {} failed, rendering without it: {}", host, e);
                None
            }
        }
    }
}
