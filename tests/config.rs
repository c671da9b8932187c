//! Configuration loading tests.

use std::time::Duration;
use tcpconn::{ConnectionConfig, Error};

fn build_config() -> config::Config {
    config::Config::builder()
        .set_default("host", "example.org")
        .unwrap()
        .set_default("port", 7000_i64)
        .unwrap()
        .set_default("so_timeout_ms", 1500_i64)
        .unwrap()
        .set_default("single_use", true)
        .unwrap()
        .set_default("inbound.port", 7100_i64)
        .unwrap()
        .set_default("inbound.single_use", false)
        .unwrap()
        .set_default("inbound.pool_size", 12_i64)
        .unwrap()
        .set_default("inbound.so_tcp_no_delay", true)
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn defaults() {
    let config = ConnectionConfig::default();
    assert_eq!(config.pool_size, 5);
    assert_eq!(config.max_message_size, 2048);
    assert!(!config.single_use);
    assert!(config.close_unanswered_on_timeout);
    assert!(config.so_timeout.is_none());
    assert!(config.so_linger.is_none());
}

#[test]
fn reads_top_level_keys() {
    let config = ConnectionConfig::from_config(&build_config(), "").unwrap();
    assert_eq!(config.host, "example.org");
    assert_eq!(config.port, 7000);
    assert_eq!(config.so_timeout, Some(Duration::from_millis(1500)));
    assert!(config.single_use);
    assert_eq!(config.pool_size, 5);
    assert!(!config.so_tcp_no_delay);
}

#[test]
fn namespaced_keys_take_precedence() {
    let config = ConnectionConfig::from_config(&build_config(), "inbound").unwrap();
    assert_eq!(config.port, 7100);
    assert!(!config.single_use);
    assert_eq!(config.pool_size, 12);
    assert!(config.so_tcp_no_delay);
    // Not namespaced, so the top-level value applies
    assert_eq!(config.host, "example.org");
    assert_eq!(config.so_timeout, Some(Duration::from_millis(1500)));
}

#[test]
fn malformed_values_are_errors() {
    let config = config::Config::builder()
        .set_default("pool_size", "lots")
        .unwrap()
        .build()
        .unwrap();
    assert!(matches!(
        ConnectionConfig::from_config(&config, ""),
        Err(Error::Config(_))
    ));
}

#[test]
fn out_of_range_port_is_rejected() {
    let config = config::Config::builder()
        .set_default("port", 70000_i64)
        .unwrap()
        .build()
        .unwrap();
    assert!(matches!(
        ConnectionConfig::from_config(&config, ""),
        Err(Error::InvalidAddress)
    ));
}

#[test]
fn out_of_range_traffic_class_is_rejected() {
    let config = config::Config::builder()
        .set_default("so_traffic_class", 1_i64 << 40)
        .unwrap()
        .build()
        .unwrap();
    let err = ConnectionConfig::from_config(&config, "").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("so_traffic_class"));

    let config = config::Config::builder()
        .set_default("so_traffic_class", 0x10_i64)
        .unwrap()
        .build()
        .unwrap();
    let cfg = ConnectionConfig::from_config(&config, "").unwrap();
    assert_eq!(cfg.so_traffic_class, Some(0x10));
}

#[test]
fn builder_setters() {
    let config = ConnectionConfig::client("localhost", 9000)
        .with_so_timeout(Duration::from_millis(250))
        .with_tcp_no_delay(true)
        .with_keep_alive(true)
        .with_linger(Duration::from_secs(2))
        .with_pool_size(3)
        .with_single_use(true)
        .with_max_message_size(128);
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 9000);
    assert_eq!(config.so_timeout, Some(Duration::from_millis(250)));
    assert!(config.so_tcp_no_delay);
    assert!(config.so_keep_alive);
    assert_eq!(config.so_linger, Some(Duration::from_secs(2)));
    assert_eq!(config.pool_size, 3);
    assert!(config.single_use);
    assert_eq!(config.max_message_size, 128);
}
