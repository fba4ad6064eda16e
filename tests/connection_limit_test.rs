mod common;

use std::time::Duration;

use bustracker_server::server::protocol::MAX_LINE_LEN;
use common::{DB_URL, FakeUpstream, TestServer, wait_for};

const REJECTION: &str = "Error: server has reached maximum number of connections.";

#[test]
fn connection_over_the_limit_is_rejected() {
    let server = TestServer::start(Some(2), FakeUpstream::new());

    let mut first = server.connect();
    let mut second = server.connect();
    assert_eq!(first.request("getDBURL"), DB_URL);
    assert_eq!(second.request("getDBURL"), DB_URL);
    assert_eq!(server.registry.len(), 2);

    let mut third = server.connect();
    assert_eq!(third.read_line().as_deref(), Some(REJECTION));
    assert_eq!(third.read_line(), None);
    assert_eq!(server.registry.len(), 2);

    // Admitted sessions are unaffected.
    assert_eq!(first.request("getDBURL"), DB_URL);
}

#[test]
fn freed_slot_admits_the_next_client() {
    let server = TestServer::start(Some(1), FakeUpstream::new());

    let mut first = server.connect();
    assert_eq!(first.request("getDBURL"), DB_URL);

    let mut rejected = server.connect();
    assert_eq!(rejected.read_line().as_deref(), Some(REJECTION));

    first.send("exit");
    assert_eq!(first.read_line(), None);
    assert!(wait_for(|| server.registry.is_empty()));

    let mut next = server.connect();
    assert_eq!(next.request("getDBURL"), DB_URL);
    assert_eq!(server.registry.len(), 1);
}

#[test]
fn unlimited_registry_admits_everyone() {
    let server = TestServer::start(None, FakeUpstream::new());

    let mut clients: Vec<_> = (0..20).map(|_| server.connect()).collect();
    for client in clients.iter_mut() {
        assert_eq!(client.request("getDBURL"), DB_URL);
    }
    assert_eq!(server.registry.len(), 20);
}

#[test]
fn stalled_client_is_dropped_after_read_timeout() {
    let server =
        TestServer::start_with_read_timeout(Some(1), FakeUpstream::new(), Duration::from_millis(200));

    let mut idle = server.connect();
    assert!(wait_for(|| server.registry.len() == 1));
    assert!(wait_for(|| server.registry.is_empty()));
    assert_eq!(idle.read_line(), None);

    let mut next = server.connect();
    assert_eq!(next.request("getDBURL"), DB_URL);
}

#[test]
fn oversized_request_line_ends_the_session() {
    let server = TestServer::start(Some(1), FakeUpstream::new());

    let mut flooder = server.connect();
    assert_eq!(flooder.request("getDBURL"), DB_URL);

    // Far past the cap and never terminated; writes start failing once the server hangs up.
    let chunk = vec![b'a'; MAX_LINE_LEN];
    for _ in 0..64 {
        if flooder.send_raw(&chunk).is_err() {
            break;
        }
    }
    assert!(wait_for(|| server.registry.is_empty()));

    let mut next = server.connect();
    assert_eq!(next.request("getDBURL"), DB_URL);
}

#[test]
fn request_line_at_the_cap_is_served() {
    let server = TestServer::start(Some(1), FakeUpstream::new());
    let mut client = server.connect();

    // Padding is trimmed off, so this is still a plain getDBURL.
    let mut line = "getDBURL".to_string();
    line.push_str(&" ".repeat(MAX_LINE_LEN - line.len() - 1));
    assert_eq!(client.request(&line), DB_URL);
}
