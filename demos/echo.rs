//! Echo example - a selector server answering a single-use blocking client
//!
//! ## What it shows
//!
//! - Server factory configured from a [`config::Config`] with a namespace
//! - A [`Sender`] that keeps server connections by id so the listener can
//!   reply on the right one
//! - Single-use client connections: one request, one reply, then closed
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=tcpconn=debug cargo run --example echo
//! ```

use config::Config;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tcpconn::prelude::*;

/// Keeps server connections by id.
#[derive(Default)]
struct Gateway {
    connections: Mutex<HashMap<String, Arc<dyn Connection>>>,
}

impl Sender for Gateway {
    fn add_new_connection(&self, connection: Arc<dyn Connection>) {
        self.connections
            .lock()
            .unwrap()
            .insert(connection.connection_id().to_string(), connection);
    }

    fn remove_dead_connection(&self, connection_id: &str) {
        self.connections.lock().unwrap().remove(connection_id);
    }
}

/// Replies with the upper-cased payload.
struct Shouter {
    gateway: Arc<Gateway>,
}

impl Listener for Shouter {
    fn on_message(&self, message: Message) -> Result<(), ListenerError> {
        let connection = message
            .connection_id()
            .and_then(|id| self.gateway.connections.lock().unwrap().get(id).cloned())
            .ok_or(ListenerError::NoListener)?;
        connection
            .send(&Message::new(message.payload.to_ascii_uppercase()))
            .map_err(|err| ListenerError::Failed(err.to_string()))
    }
}

/// Hands replies to the main thread.
struct Replies(Mutex<mpsc::Sender<Message>>);

impl Listener for Replies {
    fn on_message(&self, message: Message) -> Result<(), ListenerError> {
        let _ = self.0.lock().unwrap().send(message);
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::builder()
        .set_default("server.port", 0_i64)
        .unwrap()
        .set_default("server.so_timeout_ms", 5000_i64)
        .unwrap()
        .set_default("so_tcp_no_delay", true)
        .unwrap()
        .build()
        .expect("Failed to build config");

    // Server
    let server_config =
        ConnectionConfig::from_config(&config, "server").expect("Failed to read server config");
    let server = NioServerFactory::new(server_config);
    let gateway = Arc::new(Gateway::default());
    server
        .register_sender(gateway.clone())
        .expect("Failed to register sender");
    server
        .register_listener(Arc::new(Shouter { gateway }))
        .expect("Failed to register listener");
    server.start().expect("Failed to start server");
    let port = server.local_port().expect("Server is not listening");
    println!("Server listening on port {port}");

    // Client
    let client = BlockingClientFactory::new(
        ConnectionConfig::client("127.0.0.1", port).with_single_use(true),
    );
    let (tx, rx) = mpsc::channel();
    client
        .register_listener(Arc::new(Replies(Mutex::new(tx))))
        .expect("Failed to register listener");
    client.start().expect("Failed to start client");

    for text in ["hello", "single use", "goodbye"] {
        let connection = client.get_connection().expect("Failed to connect");
        connection
            .send(&Message::from(text))
            .expect("Failed to send");
        let reply = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("No reply received");
        println!(
            "{} -> {} (via {})",
            text,
            String::from_utf8_lossy(&reply.payload),
            connection.connection_id()
        );
    }

    client.stop();
    server.stop();
}
