//! Shared helpers for the integration tests: a canned upstream, a server running
//! on an ephemeral port, and a line-oriented client.

#![allow(dead_code)]

use bytes::Bytes;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use bustracker_server::error::{Result, TrackerError};
use bustracker_server::server::{AcceptorHandle, ConnectionAcceptor, ConnectionContext, ConnectionRegistry};
use bustracker_server::snapshot::store::{DB_FILE, LAST_MOD_FILE};
use bustracker_server::upstream::Upstream;

pub const VERSION_FILE: &str = "latest.android";
pub const DB_URL: &str = "http://example.test/busstops.db";

// ============================================================================
// Fake upstream
// ============================================================================

/// Serves canned departures pages and stop feeds. Anything not registered fails
/// the way an unreachable website would.
#[derive(Default)]
pub struct FakeUpstream {
    departures: Mutex<HashMap<String, String>>,
    feeds: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_departures(&self, stop_code: &str, page: &str) {
        self.departures
            .lock()
            .unwrap()
            .insert(stop_code.to_string(), page.to_string());
    }

    pub fn with_feed(&self, mnemonic: &str, feed: &str) {
        self.feeds
            .lock()
            .unwrap()
            .insert(mnemonic.to_string(), feed.as_bytes().to_vec());
    }

    pub fn clear_feeds(&self) {
        self.feeds.lock().unwrap().clear();
    }
}

impl Upstream for FakeUpstream {
    fn departures(&self, stop_code: &str) -> Result<String> {
        self.departures
            .lock()
            .unwrap()
            .get(stop_code)
            .cloned()
            .ok_or_else(|| TrackerError::Network(format!("no departures for {}", stop_code)))
    }

    fn service_points(&self, mnemonic: &str) -> Result<Bytes> {
        self.feeds
            .lock()
            .unwrap()
            .get(mnemonic)
            .map(|feed| Bytes::from(feed.clone()))
            .ok_or_else(|| TrackerError::Network(format!("no feed for {}", mnemonic)))
    }
}

pub fn departures_page(stop_line: &str, bus_lines: &[&str]) -> String {
    format!(
        "<html><head><title>Bus Tracker</title></head><body><a href=\"stop.php\">{}</a><pre>{}</pre></body></html>",
        stop_line,
        bus_lines.join("\n")
    )
}

pub fn bus_stop(code: &str, name: &str, x: i64, y: i64) -> String {
    format!(
        "<busStop><sms>{}</sms><nom>{}</nom><x>{}</x><y>{}</y></busStop>",
        code, name, x, y
    )
}

pub fn service_feed(stops: &[String], mnemonics: &[&str]) -> String {
    let services: String = mnemonics
        .iter()
        .map(|m| format!("<mnemo>{}</mnemo>", m))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><busStops>{}<services>{}</services></busStops>",
        stops.concat(),
        services
    )
}

// ============================================================================
// Server under test
// ============================================================================

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub dir: TempDir,
    handle: AcceptorHandle,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(limit: Option<usize>, upstream: Arc<dyn Upstream>) -> Self {
        Self::start_with_read_timeout(limit, upstream, Duration::from_secs(10))
    }

    pub fn start_with_read_timeout(
        limit: Option<usize>,
        upstream: Arc<dyn Upstream>,
        read_timeout: Duration,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new(limit);
        let context = Arc::new(ConnectionContext {
            db_url: DB_URL.to_string(),
            marker_path: dir.path().join(LAST_MOD_FILE),
            version_path: dir.path().join(VERSION_FILE),
            upstream,
        });

        let acceptor = ConnectionAcceptor::bind(
            "127.0.0.1",
            0,
            Arc::clone(&registry),
            context,
            read_timeout,
        )
        .unwrap();
        let addr = acceptor.local_addr();
        let handle = acceptor.handle();
        let thread = thread::spawn(move || acceptor.run());

        TestServer {
            addr,
            registry,
            dir,
            handle,
            thread: Some(thread),
        }
    }

    pub fn db_dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn database(&self) -> std::path::PathBuf {
        self.dir.path().join(DB_FILE)
    }

    pub fn connect(&self) -> Client {
        Client::connect(self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Client { stream, reader }
    }

    pub fn send(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
        self.stream.flush().unwrap();
    }

    /// Next line without its terminator, or `None` once the server has closed.
    pub fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    /// Raw bytes, no terminator added. Errors are returned since the server may
    /// already have dropped the connection.
    pub fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    pub fn request(&mut self, line: &str) -> String {
        self.send(line);
        self.read_line().expect("server closed the connection")
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually<F>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(interval);
    }
}

pub fn wait_for<F: FnMut() -> bool>(check: F) -> bool {
    eventually(Duration::from_secs(5), Duration::from_millis(20), check)
}
