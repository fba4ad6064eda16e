// Data structures exchanged between the parsers, the snapshot store and clients

use serde::{Deserialize, Serialize};

// ============================================================================
// Live Departures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusArrival {
    pub destination: String,
    pub arrival_time: String, // countdown ("2") or clock time ("14:05"), passed through untouched
    pub accessible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusServiceBlock {
    pub service_name: String,
    pub route: String,
    pub buses: Vec<BusArrival>,
}

/// Everything scraped from one stop's departures page, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopDepartures {
    pub stop_code: String,
    pub stop_name: String,
    pub services: Vec<BusServiceBlock>,
}

impl StopDepartures {
    pub fn arrival_count(&self) -> usize {
        self.services.iter().map(|s| s.buses.len()).sum()
    }
}

// ============================================================================
// Stop Locations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRecord {
    pub stop_code: String,
    pub stop_name: String,
    pub x: i64,
    pub y: i64,
}

/// Counters for one service feed handed to the stop feed parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub stops_inserted: usize,
    pub associations_inserted: usize,
    pub services_discovered: usize,
    pub records_skipped: usize,
}

/// Outcome of one completed snapshot rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub completed_at_ms: i64,
    pub services_crawled: usize,
    pub services_failed: Vec<String>,
    pub stops: usize,
    pub associations: usize,
}
