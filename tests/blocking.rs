//! Blocking client/server factory tests.

mod common;

use common::*;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tcpconn::prelude::*;
use tcpconn::LifecycleState;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helper Functions
// ============================================================================

fn echo_server(config: ConnectionConfig) -> (BlockingServerFactory, Arc<ConnectionTracker>, u16) {
    let server = BlockingServerFactory::new(config);
    let tracker = ConnectionTracker::new();
    server.register_sender(tracker.clone()).unwrap();
    server
        .register_listener(EchoListener::new(tracker.clone()))
        .unwrap();
    server.start().expect("Failed to start server");
    let port = server.local_port().expect("Server not listening");
    (server, tracker, port)
}

fn client(config: ConnectionConfig) -> (BlockingClientFactory, Collected) {
    let client = BlockingClientFactory::new(config);
    let (listener, collected) = CollectingListener::new();
    client.register_listener(listener).unwrap();
    client.start().expect("Failed to start client");
    (client, collected)
}

fn payload(message: &Message) -> String {
    String::from_utf8_lossy(&message.payload).into_owned()
}

// ============================================================================
// Exchanges
// ============================================================================

#[test]
fn pooled_echo() {
    init_tracing();

    let (_server, tracker, port) = echo_server(ConnectionConfig::server(0));
    let (client, collected) = client(ConnectionConfig::client("127.0.0.1", port));

    let connection = client.get_connection().unwrap();
    for text in ["hello", "again", "and again"] {
        connection.send(&Message::from(text)).unwrap();
        let reply = collected.messages.recv_timeout(WAIT).expect("No reply");
        assert_eq!(payload(&reply), format!("echo:{text}"));
        assert_eq!(reply.connection_id(), Some(connection.connection_id()));
        assert_eq!(reply.headers.peer_addr.map(|a| a.port()), Some(port));
    }

    // The pooled connection is handed out again while open
    let again = client.get_connection().unwrap();
    assert!(Arc::ptr_eq(&connection, &again));
    assert!(connection.is_open());
    assert!(!connection.is_server());

    assert_eq!(tracker.added().len(), 1);
    assert!(tracker.any().unwrap().is_server());
}

#[test]
fn pooled_connection_replaced_after_close() {
    init_tracing();

    let (server, tracker, port) = echo_server(ConnectionConfig::server(0));
    let (client, collected) = client(ConnectionConfig::client("127.0.0.1", port));

    let first = client.get_connection().unwrap();
    first.send(&Message::from("one")).unwrap();
    collected.messages.recv_timeout(WAIT).expect("No reply");
    first.close();
    assert!(!first.is_open());
    assert_eq!(
        collected.closed.recv_timeout(WAIT).ok().as_deref(),
        Some(first.connection_id())
    );

    let second = client.get_connection().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_open());

    // The server notices the first connection going away
    let server_side_id = tracker.added()[0].clone();
    assert!(wait_until(WAIT, || tracker.removed().contains(&server_side_id)));
    assert!(wait_until(WAIT, || !server
        .connection_ids()
        .contains(&server_side_id)));
}

#[test]
fn single_use_client_closes_after_reply() {
    init_tracing();

    let (server, _tracker, port) = echo_server(ConnectionConfig::server(0));
    let (client, collected) =
        client(ConnectionConfig::client("127.0.0.1", port).with_single_use(true));

    let connection = client.get_connection().unwrap();
    assert!(connection.is_single_use());
    connection.send(&Message::from("once")).unwrap();
    let reply = collected.messages.recv_timeout(WAIT).expect("No reply");
    assert_eq!(payload(&reply), "echo:once");

    assert!(wait_until(WAIT, || !connection.is_open()));
    assert_eq!(
        collected.closed.recv_timeout(WAIT).ok().as_deref(),
        Some(connection.connection_id())
    );
    assert!(wait_until(WAIT, || client.connection_ids().is_empty()));

    // Every request gets a fresh socket
    let next = client.get_connection().unwrap();
    assert!(!Arc::ptr_eq(&connection, &next));
    assert_ne!(connection.connection_id(), next.connection_id());
    next.close();

    assert!(wait_until(WAIT, || server.connection_ids().is_empty()));
}

#[test]
fn single_use_server_closes_after_reply() {
    init_tracing();

    let (_server, tracker, port) =
        echo_server(ConnectionConfig::server(0).with_single_use(true));

    let mut line_client = LineClient::connect(port);
    line_client.send_line("ping");
    assert_eq!(line_client.read_line().as_deref(), Some("echo:ping"));
    // The server closed after replying
    assert_eq!(line_client.read_line(), None);
    assert!(wait_until(WAIT, || tracker.removed().len() == 1));
}

#[test]
fn single_use_server_without_sender_closes_after_message() {
    init_tracing();

    let server = BlockingServerFactory::new(ConnectionConfig::server(0).with_single_use(true));
    let (listener, collected) = CollectingListener::new();
    server.register_listener(listener).unwrap();
    server.start().unwrap();
    let port = server.local_port().unwrap();

    let mut line_client = LineClient::connect(port);
    line_client.send_line("fire and forget");
    let message = collected.messages.recv_timeout(WAIT).expect("No message");
    assert_eq!(payload(&message), "fire and forget");
    assert_eq!(message.headers.local_port, Some(port));
    assert_eq!(line_client.read_line(), None);
}

// ============================================================================
// No Listener Handling
// ============================================================================

#[test]
fn no_listener_keeps_pooled_connection_open() {
    init_tracing();

    let (_server, _tracker, port) = echo_server(ConnectionConfig::server(0));
    let client = BlockingClientFactory::new(ConnectionConfig::client("127.0.0.1", port));
    let (listener, collected) = CollectingListener::rejecting();
    client.register_listener(listener).unwrap();
    client.start().unwrap();

    let connection = client.get_connection().unwrap();
    connection.send(&Message::from("anyone?")).unwrap();
    collected.messages.recv_timeout(WAIT).expect("No reply");
    thread::sleep(Duration::from_millis(100));
    assert!(connection.is_open());

    connection.send(&Message::from("still here")).unwrap();
    collected.messages.recv_timeout(WAIT).expect("No reply");
}

#[test]
fn no_listener_closes_single_use_connection() {
    init_tracing();

    let (_server, _tracker, port) = echo_server(ConnectionConfig::server(0));
    let client =
        BlockingClientFactory::new(ConnectionConfig::client("127.0.0.1", port).with_single_use(true));
    let (listener, collected) = CollectingListener::rejecting();
    client.register_listener(listener).unwrap();
    client.start().unwrap();

    let connection = client.get_connection().unwrap();
    connection.send(&Message::from("anyone?")).unwrap();
    collected.messages.recv_timeout(WAIT).expect("No reply");
    assert!(wait_until(WAIT, || !connection.is_open()));
}

#[test]
fn server_without_listener_does_not_bind() {
    init_tracing();

    let server = BlockingServerFactory::new(ConnectionConfig::server(0));
    server.start().unwrap();
    assert!(server.is_running());
    assert_eq!(server.local_port(), None);
    server.stop();
    assert_eq!(server.state(), LifecycleState::Stopped);
}

// ============================================================================
// Timeouts and Socket Options
// ============================================================================

#[test]
fn read_timeout_closes_pooled_connection() {
    init_tracing();

    let (server, tracker, port) = echo_server(
        ConnectionConfig::server(0).with_so_timeout(Duration::from_millis(200)),
    );

    let mut line_client = LineClient::connect(port);
    line_client.send_line("hi");
    assert_eq!(line_client.read_line().as_deref(), Some("echo:hi"));

    // Idle past the timeout: the server closes its side
    assert_eq!(line_client.read_line(), None);
    assert!(wait_until(WAIT, || tracker.removed().len() == 1));
    assert!(wait_until(WAIT, || server.connection_ids().is_empty()));
}

#[test]
fn socket_attributes_applied_to_accepted_connections() {
    init_tracing();

    let (_server, tracker, port) = echo_server(
        ConnectionConfig::server(0)
            .with_tcp_no_delay(true)
            .with_keep_alive(true)
            .with_so_timeout(Duration::from_secs(5)),
    );

    let _line_client = LineClient::connect(port);
    assert!(wait_until(WAIT, || tracker.any().is_some()));
    let options = tracker.any().unwrap().socket_options().unwrap();
    assert!(options.no_delay);
    assert!(options.keep_alive);
    assert_eq!(options.read_timeout, Some(Duration::from_secs(5)));
}

#[test]
fn socket_attributes_applied_to_client_connections() {
    init_tracing();

    let (_server, _tracker, port) = echo_server(ConnectionConfig::server(0));
    let (client, _collected) = client(
        ConnectionConfig::client("127.0.0.1", port)
            .with_tcp_no_delay(true)
            .with_linger(Duration::from_secs(1)),
    );

    let options = client.get_connection().unwrap().socket_options().unwrap();
    assert!(options.no_delay);
    assert_eq!(options.linger, Some(Duration::from_secs(1)));
}

// ============================================================================
// Lifecycle and Registration
// ============================================================================

#[test]
fn duplicate_registrations_are_rejected() {
    let client = BlockingClientFactory::new(ConnectionConfig::client("127.0.0.1", 1));
    let (first, _) = CollectingListener::new();
    let (second, _) = CollectingListener::new();
    client.register_listener(first).unwrap();
    assert!(matches!(
        client.register_listener(second),
        Err(Error::ListenerAlreadyRegistered)
    ));

    client.register_sender(ConnectionTracker::new()).unwrap();
    assert!(matches!(
        client.register_sender(ConnectionTracker::new()),
        Err(Error::SenderAlreadyRegistered)
    ));
}

#[test]
fn no_reconfiguration_while_running() {
    let client = BlockingClientFactory::new(ConnectionConfig::client("127.0.0.1", 1));
    client.configure(&mut |cfg: &mut ConnectionConfig| cfg.pool_size = 2).unwrap();
    client.start().unwrap();
    assert_eq!(client.state(), LifecycleState::Running);

    assert!(matches!(
        client.configure(&mut |cfg: &mut ConnectionConfig| cfg.single_use = true),
        Err(Error::AlreadyRunning)
    ));
    assert!(matches!(
        client.set_codec(Arc::new(CrLfCodec::new(16))),
        Err(Error::AlreadyRunning)
    ));

    client.stop();
    client.configure(&mut |cfg: &mut ConnectionConfig| cfg.single_use = true).unwrap();
}

#[test]
fn get_connection_requires_running_factory() {
    let client = BlockingClientFactory::new(ConnectionConfig::client("127.0.0.1", 1));
    assert!(matches!(client.get_connection(), Err(Error::NotRunning)));
}

#[test]
fn stop_releases_server_socket() {
    init_tracing();

    let (server, _tracker, port) = echo_server(ConnectionConfig::server(0));
    server.stop();
    assert!(!server.is_running());
    assert!(wait_until(WAIT, || TcpStream::connect(server_addr(port)).is_err()));

    // Stopping twice is harmless
    server.stop();
}
