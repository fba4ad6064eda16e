// Upstream data source: the Bus Tracker website
//
// Endpoints (relative to the configured base URL):
// - Live departures page: getBusStopDepartures.php?busStopCode=<code>&...
// - Stops served by one service: getServicePoints.php?serviceMnemo=<mnemonic>

use bytes::Bytes;
use reqwest::blocking;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TrackerError};

pub const USER_AGENT: &str = concat!("BusTrackerServer/", env!("CARGO_PKG_VERSION"));

/// Source of live departures and stop feeds. Implemented over HTTP in production
/// and by canned documents in tests.
pub trait Upstream: Send + Sync {
    /// Raw departures page for one stop.
    fn departures(&self, stop_code: &str) -> Result<String>;

    /// Raw stop feed document for one service mnemonic.
    fn service_points(&self, mnemonic: &str) -> Result<Bytes>;
}

pub struct HttpUpstream {
    client: blocking::Client,
    base_url: String,
}

impl HttpUpstream {
    const REQUEST_TIMEOUT_SECS: u64 = 30;

    pub fn new(base_url: &str) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TrackerError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(HttpUpstream { client, base_url })
    }

    fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<blocking::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, ?query, "upstream request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| TrackerError::Network(format!("Failed to fetch {}: {}", endpoint, e)))?;

        if !response.status().is_success() {
            return Err(TrackerError::Network(format!(
                "{} returned error: {}",
                endpoint,
                response.status()
            )));
        }

        Ok(response)
    }
}

impl Upstream for HttpUpstream {
    fn departures(&self, stop_code: &str) -> Result<String> {
        let response = self.get(
            "getBusStopDepartures.php",
            &[
                ("refreshCount", "0"),
                ("clientType", "b"),
                ("busStopCode", stop_code),
                ("busStopDay", "0"),
                ("busStopService", "0"),
                ("numberOfPassage", "4"),
                ("busStopTime", ""),
                ("busStopDestination", "0"),
            ],
        )?;

        response
            .text()
            .map_err(|e| TrackerError::Network(format!("Failed to read departures: {}", e)))
    }

    fn service_points(&self, mnemonic: &str) -> Result<Bytes> {
        let response = self.get("getServicePoints.php", &[("serviceMnemo", mnemonic)])?;

        response
            .bytes()
            .map_err(|e| TrackerError::Network(format!("Failed to read stop feed: {}", e)))
    }
}
