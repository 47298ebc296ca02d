#![forbid(unsafe_code)]

mod support;

use simtree_client::{
    RetryPolicy, Session, StreamConnection, StreamConnector, StreamKey, SyncConfig, WsConnector,
};
use simtree_core::ids::NodeId;
use simtree_core::tree::Snapshot;
use std::time::{Duration, Instant};
use support::*;

fn connector_for(base: &str, token: &str) -> WsConnector {
    WsConnector::new(base, token).with_timeouts(Duration::from_secs(2), Duration::from_millis(20))
}

fn poll_until<C: StreamConnection>(conn: &mut C, want: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while seen.len() < want && Instant::now() < deadline {
        let batch = conn.poll(16);
        seen.extend(batch.messages);
        if batch.closed {
            break;
        }
    }
    seen
}

#[test]
fn tree_stream_sends_ready_token_then_receives_events() {
    let Some(server) = spawn_ws_server(vec![attached(1, None, 0), lifecycle("run_start", 1)])
    else {
        return;
    };
    let connector = connector_for(&server.base, "ready");

    let mut conn = connector
        .open(&StreamKey::Tree(tree_id("t1")))
        .expect("open stream");
    let messages = poll_until(&mut conn, 2);

    assert_eq!(messages, vec![attached(1, None, 0), lifecycle("run_start", 1)]);
    assert_eq!(
        server.wait_for_handshakes(1),
        vec![("/simtree/t1/events".to_string(), "ready".to_string())]
    );
    conn.close();
    assert!(conn.poll(4).closed);
}

#[test]
fn node_stream_uses_node_path_and_custom_token() {
    let Some(server) = spawn_ws_server(Vec::new()) else {
        return;
    };
    let connector = connector_for(&server.base, "go");

    let mut conn = connector
        .open(&StreamKey::Node(tree_id("t1"), NodeId(7)))
        .expect("open stream");
    let batch = conn.poll(4);

    assert!(batch.messages.is_empty());
    assert!(!batch.closed);
    assert_eq!(
        server.wait_for_handshakes(1),
        vec![("/simtree/t1/sim/7/events".to_string(), "go".to_string())]
    );
}

#[test]
fn refused_connection_is_an_error() {
    let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
        return;
    };
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let connector = connector_for(&format!("ws://{addr}"), "ready");
    assert!(connector.open(&StreamKey::Tree(tree_id("t1"))).is_err());
}

#[test]
fn session_applies_events_from_live_stream() {
    let Some(server) = spawn_ws_server(vec![attached(2, Some(1), 1)]) else {
        return;
    };
    let mut config = SyncConfig::with_base("http://127.0.0.1:9");
    config.ws_base = server.base.clone();
    config.snapshot_retry = RetryPolicy::fixed(1, Duration::ZERO);
    let connector = WsConnector::new(&config.ws_base, &config.ready_token)
        .with_timeouts(Duration::from_secs(2), config.poll_timeout);
    let mut session = Session::new(
        FakeApi::serving(Snapshot::single(NodeId(1), 0)),
        connector,
        config,
    );

    session.open_tree(tree_id("t1")).expect("open");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !session.store().contains_node(NodeId(2)) && Instant::now() < deadline {
        session.pump();
    }

    assert!(session.store().contains_node(NodeId(2)));
    let paths: Vec<String> = server
        .wait_for_handshakes(2)
        .into_iter()
        .map(|(path, _)| path)
        .collect();
    assert!(paths.contains(&"/simtree/t1/events".to_string()));
    assert!(paths.contains(&"/simtree/t1/sim/1/events".to_string()));
}
