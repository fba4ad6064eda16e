// One full rebuild of the stop-location database

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::models::RebuildReport;
use crate::snapshot::store::SnapshotStore;
use crate::stop_feed::{CrawlState, StopFeedParser};
use crate::upstream::Upstream;

/// Service crawled first; every other service is discovered from the feeds.
pub const SEED_SERVICE: &str = "1";

pub struct SnapshotBuilder {
    upstream: Arc<dyn Upstream>,
    store: SnapshotStore,
    seed: String,
    rebuild_lock: Mutex<()>,
}

impl SnapshotBuilder {
    pub fn new(upstream: Arc<dyn Upstream>, store: SnapshotStore) -> Self {
        SnapshotBuilder {
            upstream,
            store,
            seed: SEED_SERVICE.to_string(),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn with_seed(mut self, seed: &str) -> Self {
        self.seed = seed.to_string();
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Crawl every reachable service and publish the result. Concurrent callers
    /// wait for the rebuild in progress and then run their own.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _guard = self
            .rebuild_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let started = Instant::now();
        info!(seed = %self.seed, "🔄 Rebuilding stop location database...");

        let mut build = self.store.begin()?;
        let mut crawl = CrawlState::seeded(&self.seed);
        let mut services_crawled = 0;
        let mut services_failed = Vec::new();

        while let Some(mnemonic) = crawl.next_service() {
            let feed = match self.upstream.service_points(&mnemonic) {
                Ok(feed) => feed,
                Err(e) => {
                    warn!(service = %mnemonic, error = %e, "⚠️  Could not fetch stop feed, skipping service");
                    services_failed.push(mnemonic);
                    continue;
                }
            };

            match StopFeedParser::new(&mnemonic).parse(&feed, &mut crawl, &mut build) {
                Ok(summary) => {
                    services_crawled += 1;
                    debug!(
                        service = %mnemonic,
                        stops = summary.stops_inserted,
                        associations = summary.associations_inserted,
                        discovered = summary.services_discovered,
                        "stop feed parsed"
                    );
                }
                Err(e) => {
                    warn!(service = %mnemonic, error = %e, "⚠️  Could not parse stop feed, skipping service");
                    services_failed.push(mnemonic);
                }
            }
        }

        if crawl.stop_count() == 0 {
            return Err(TrackerError::Parse(format!(
                "No stops found after crawling {} services; keeping the published snapshot",
                crawl.services().len()
            )));
        }

        let completed_at_ms = Utc::now().timestamp_millis();
        build.commit(completed_at_ms)?;
        self.store.publish(build, completed_at_ms)?;

        let report = RebuildReport {
            completed_at_ms,
            services_crawled,
            services_failed,
            stops: crawl.stop_count(),
            associations: crawl.association_count(),
        };

        info!(
            stops = report.stops,
            associations = report.associations,
            services = report.services_crawled,
            failed = report.services_failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✓ Database now ready"
        );

        Ok(report)
    }
}
