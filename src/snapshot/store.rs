// Stop-location database snapshots
//
// A rebuild writes into a staging file next to the published database. Rows are
// staged in memory and flushed in one transaction together with the metadata row,
// then the staging file is renamed over the published one and only after that the
// marker file is rewritten. Readers therefore see either the old or the new snapshot,
// and the marker is never fresher than the database it describes.

use rusqlite::{Connection, params};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackerError};
use crate::models::StopRecord;
use crate::stop_feed::StopSink;

pub const DB_FILE: &str = "busstops.db";
pub const LAST_MOD_FILE: &str = "dblastmod";
/// Marker value served before the first snapshot is published.
pub const NEVER_BUILT: &str = "0";
const STAGING_SUFFIX: &str = ".building";

const TABLE_STOPS: &str = "bus_stops";
const TABLE_SERVICES: &str = "service_stops";
const TABLE_METADATA: &str = "metadata";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    pub database: PathBuf,
    pub staging: PathBuf,
    pub marker: PathBuf,
}

impl SnapshotPaths {
    pub fn in_dir(dir: &Path) -> Self {
        SnapshotPaths {
            database: dir.join(DB_FILE),
            staging: dir.join(format!("{}{}", DB_FILE, STAGING_SUFFIX)),
            marker: dir.join(LAST_MOD_FILE),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    paths: SnapshotPaths,
}

impl SnapshotStore {
    pub fn new(db_dir: &Path) -> Result<Self> {
        fs::create_dir_all(db_dir).map_err(|e| {
            TrackerError::File(format!("Failed to create database directory {:?}: {}", db_dir, e))
        })?;
        Ok(SnapshotStore {
            paths: SnapshotPaths::in_dir(db_dir),
        })
    }

    pub fn paths(&self) -> &SnapshotPaths {
        &self.paths
    }

    /// Open a fresh staging database with an empty schema.
    pub fn begin(&self) -> Result<SnapshotBuild> {
        if self.paths.staging.exists() {
            warn!(path = ?self.paths.staging, "⚠️  Removing leftover staging database");
            fs::remove_file(&self.paths.staging)?;
        }

        let mut build = SnapshotBuild {
            conn: None,
            staging: self.paths.staging.clone(),
            stops: Vec::new(),
            services: Vec::new(),
            committed: false,
        };
        // From here on a failure drops `build`, which removes the staging file.
        let conn = Connection::open(&self.paths.staging)?;
        create_schema(&conn)?;
        build.conn = Some(conn);
        Ok(build)
    }

    /// Move a committed build over the published database, then rewrite the marker.
    pub fn publish(&self, mut build: SnapshotBuild, completed_at_ms: i64) -> Result<()> {
        if !build.committed {
            return Err(TrackerError::File(
                "Refusing to publish an uncommitted snapshot".to_string(),
            ));
        }
        // Close the connection before the file moves.
        build.conn = None;

        fs::rename(&build.staging, &self.paths.database).map_err(|e| {
            TrackerError::File(format!(
                "Failed to move {:?} to {:?}: {}",
                build.staging, self.paths.database, e
            ))
        })?;
        // Nothing left for Drop to clean up.
        build.staging = PathBuf::new();

        let written = write_marker(&self.paths.marker, completed_at_ms).or_else(|e| {
            warn!(error = %e, "⚠️  Marker write failed, retrying once");
            write_marker(&self.paths.marker, completed_at_ms)
        });
        if let Err(e) = written {
            error!(
                path = ?self.paths.marker,
                published_at_ms = completed_at_ms,
                marker = %self.read_marker(),
                error = %e,
                "❌ Snapshot published but its marker is stale"
            );
            return Err(e);
        }

        info!(path = ?self.paths.database, completed_at_ms, "✓ Snapshot published");
        Ok(())
    }

    pub fn published_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.paths.database).ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    /// True when no snapshot is published or the published one is older than `max_age`.
    pub fn needs_rebuild(&self, max_age: Duration) -> bool {
        match self.published_age() {
            None => true,
            Some(age) => age > max_age,
        }
    }

    pub fn read_marker(&self) -> String {
        marker_value(&self.paths.marker)
    }
}

/// Marker contents as served to clients: `0` when never built.
pub fn marker_value(marker: &Path) -> String {
    read_first_line(marker).unwrap_or_else(|| NEVER_BUILT.to_string())
}

/// First line of a small side file, or `None` if it is missing or empty.
pub fn read_first_line(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?;
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn write_marker(marker: &Path, completed_at_ms: i64) -> Result<()> {
    let mut temp_name = marker.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp)
        .map_err(|e| TrackerError::File(format!("Failed to write marker {:?}: {}", temp, e)))?;
    write!(file, "{}", completed_at_ms)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp, marker) {
        let _ = fs::remove_file(&temp);
        return Err(TrackerError::File(format!(
            "Failed to replace marker {:?}: {}",
            marker, e
        )));
    }
    Ok(())
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {stops};
         DROP TABLE IF EXISTS {services};
         DROP TABLE IF EXISTS {metadata};
         CREATE TABLE {stops} (_id TEXT PRIMARY KEY, stopName TEXT, x INTEGER, y INTEGER);
         CREATE TABLE {services} (_id INTEGER PRIMARY KEY AUTOINCREMENT, stopCode TEXT, serviceName TEXT);
         CREATE TABLE {metadata} (_id INTEGER PRIMARY KEY AUTOINCREMENT, updateTS TEXT);",
        stops = TABLE_STOPS,
        services = TABLE_SERVICES,
        metadata = TABLE_METADATA,
    ))?;
    Ok(())
}

// ============================================================================
// Build in progress
// ============================================================================

/// One rebuild's staging database. Dropping it before `SnapshotStore::publish`
/// discards the staging file and leaves the published snapshot untouched.
pub struct SnapshotBuild {
    conn: Option<Connection>,
    staging: PathBuf,
    stops: Vec<StopRecord>,
    services: Vec<(String, String)>,
    committed: bool,
}

impl SnapshotBuild {
    pub fn staged_stops(&self) -> usize {
        self.stops.len()
    }

    pub fn staged_associations(&self) -> usize {
        self.services.len()
    }

    /// Flush every staged row and one metadata row in a single transaction.
    pub fn commit(&mut self, completed_at_ms: i64) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TrackerError::File("Snapshot build already closed".to_string()))?;

        let tx = conn.transaction()?;
        {
            let mut insert_stop = tx.prepare(&format!(
                "INSERT INTO {} VALUES (?1, ?2, ?3, ?4)",
                TABLE_STOPS
            ))?;
            for stop in &self.stops {
                insert_stop.execute(params![stop.stop_code, stop.stop_name, stop.x, stop.y])?;
            }

            let mut insert_service = tx.prepare(&format!(
                "INSERT INTO {} (stopCode, serviceName) VALUES (?1, ?2)",
                TABLE_SERVICES
            ))?;
            for (stop_code, service) in &self.services {
                insert_service.execute(params![stop_code, service])?;
            }

            tx.execute(
                &format!("INSERT INTO {} (updateTS) VALUES (?1)", TABLE_METADATA),
                params![completed_at_ms.to_string()],
            )?;
        }
        tx.commit()?;

        debug!(
            stops = self.stops.len(),
            associations = self.services.len(),
            completed_at_ms,
            "snapshot committed"
        );
        self.committed = true;
        Ok(())
    }
}

impl StopSink for SnapshotBuild {
    fn insert_stop(&mut self, stop: StopRecord) -> Result<()> {
        if stop.stop_code.is_empty() {
            return Err(TrackerError::Parse("Stop code must not be blank".to_string()));
        }
        self.stops.push(stop);
        Ok(())
    }

    fn insert_service_stop(&mut self, stop_code: &str, service: &str) -> Result<()> {
        if stop_code.is_empty() || service.is_empty() {
            return Err(TrackerError::Parse(
                "Stop code and service name must not be blank".to_string(),
            ));
        }
        self.services.push((stop_code.to_string(), service.to_string()));
        Ok(())
    }
}

impl Drop for SnapshotBuild {
    fn drop(&mut self) {
        self.conn = None;
        if self.staging.as_os_str().is_empty() {
            return;
        }
        match fs::remove_file(&self.staging) {
            Ok(()) => debug!(path = ?self.staging, "staging database discarded"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.staging, error = %e, "⚠️  Failed to remove staging database"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::scheduler::MAX_SNAPSHOT_AGE;

    fn stop(code: &str) -> StopRecord {
        StopRecord {
            stop_code: code.to_string(),
            stop_name: format!("Stop {}", code),
            x: 1,
            y: 2,
        }
    }

    #[test]
    fn marker_reads_zero_before_first_publish() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        assert_eq!(store.read_marker(), "0");
        assert!(store.needs_rebuild(Duration::from_secs(60)));
    }

    #[test]
    fn publish_writes_database_and_matching_marker() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        let mut build = store.begin().unwrap();
        build.insert_stop(stop("100")).unwrap();
        build.insert_service_stop("100", "22").unwrap();
        build.commit(1_700_000_000_123).unwrap();
        store.publish(build, 1_700_000_000_123).unwrap();

        assert!(!store.paths().staging.exists());
        assert_eq!(store.read_marker(), "1700000000123");

        let conn = Connection::open(&store.paths().database).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM bus_stops", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let ts: String = conn
            .query_row("SELECT updateTS FROM metadata ORDER BY _id DESC LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(ts, "1700000000123");
        assert!(!store.needs_rebuild(Duration::from_secs(60)));
    }

    #[test]
    fn dropped_build_removes_staging_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        let mut build = store.begin().unwrap();
        build.insert_stop(stop("100")).unwrap();
        assert!(store.paths().staging.exists());
        drop(build);

        assert!(!store.paths().staging.exists());
        assert!(!store.paths().database.exists());
        assert!(!store.paths().marker.exists());
    }

    #[test]
    fn uncommitted_build_cannot_be_published() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        let build = store.begin().unwrap();
        assert!(store.publish(build, 1).is_err());
        assert!(!store.paths().database.exists());
        assert_eq!(store.read_marker(), "0");
    }

    #[test]
    fn duplicate_stop_code_fails_commit_and_keeps_previous_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        let mut first = store.begin().unwrap();
        first.insert_stop(stop("100")).unwrap();
        first.commit(10).unwrap();
        store.publish(first, 10).unwrap();
        let published = fs::read(&store.paths().database).unwrap();

        let mut second = store.begin().unwrap();
        second.insert_stop(stop("200")).unwrap();
        second.insert_stop(stop("200")).unwrap();
        assert!(second.commit(20).is_err());
        drop(second);

        assert_eq!(fs::read(&store.paths().database).unwrap(), published);
        assert_eq!(store.read_marker(), "10");
    }

    fn publish_one(store: &SnapshotStore, completed_at_ms: i64) {
        let mut build = store.begin().unwrap();
        build.insert_stop(stop("100")).unwrap();
        build.commit(completed_at_ms).unwrap();
        store.publish(build, completed_at_ms).unwrap();
    }

    fn backdate(path: &Path, age: Duration) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn snapshot_older_than_a_week_needs_rebuild() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        publish_one(&store, 10);

        backdate(&store.paths().database, 8 * DAY);
        assert!(store.needs_rebuild(MAX_SNAPSHOT_AGE));
    }

    #[test]
    fn snapshot_younger_than_a_week_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        publish_one(&store, 10);

        backdate(&store.paths().database, 6 * DAY);
        assert!(!store.needs_rebuild(MAX_SNAPSHOT_AGE));
    }

    #[test]
    fn marker_failure_after_publish_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        // A directory in the marker's place makes every rename onto it fail.
        fs::create_dir(&store.paths().marker).unwrap();

        let mut build = store.begin().unwrap();
        build.insert_stop(stop("100")).unwrap();
        build.commit(42).unwrap();

        assert!(store.publish(build, 42).is_err());
        assert!(store.paths().database.exists());
        assert!(!store.paths().staging.exists());
        assert!(!dir.path().join(format!("{}.tmp", LAST_MOD_FILE)).exists());
    }

    #[test]
    fn blank_rows_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let mut build = store.begin().unwrap();
        assert!(build.insert_stop(stop("")).is_err());
        assert!(build.insert_service_stop("100", "").is_err());
        assert_eq!(build.staged_stops(), 0);
        assert_eq!(build.staged_associations(), 0);
    }
}
