//! End-to-end tests: raw kernel records in, JSON trace lines out over the
//! control socket.

use std::{net::Ipv4Addr, path::Path};
use tcpexpose_common::constants::*;
use tcpexpose_daemon::{
    events::EventProcessor, service::Service, Quartet, ServiceConfig, TcpEventRecord, TraceSample,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

struct Harness {
    _dir: TempDir,
    socket: std::path::PathBuf,
    service: Service,
    processor: EventProcessor,
}

impl Harness {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("tcpexpose.sock");
        let config = ServiceConfig {
            socket_path: socket.clone(),
            mailbox_capacity: 1024,
            progress_interval_secs: 0,
        };
        let service = Service::start(&config).unwrap();
        let processor = EventProcessor::new(service.mailbox(), service.stats(), false);

        Self {
            _dir: dir,
            socket,
            service,
            processor,
        }
    }

    fn emit(&self, event_type: u64, src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, rx_b: u64) {
        let record = TcpEventRecord {
            event_type,
            ts_us: rx_b,
            saddr: Ipv4Addr::from(src).to_ipv6_mapped().octets(),
            daddr: Ipv4Addr::from(dst).to_ipv6_mapped().octets(),
            ports: TcpEventRecord::pack_ports(sport, dport),
            rx_b,
            ..Default::default()
        };
        assert!(self.processor.ingest(&record.to_bytes()));
    }

    fn register(&self) {
        self.emit(EVENT_TYPE_REGISTER, [10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, 0);
    }

    fn publish(&self, rx_b: u64) {
        self.emit(EVENT_TYPE_PUBLISH, [10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, rx_b);
    }

    fn unregister(&self) {
        self.emit(EVENT_TYPE_UNREGISTER, [10, 0, 0, 1], [10, 0, 0, 2], 5000, 80, 0);
    }
}

const FORWARD: &str = "10.0.0.1 10.0.0.2 5000 80\n";
const REVERSE: &str = "10.0.0.2 10.0.0.1 80 5000\n";

/// Send one request, half-close, and collect everything until EOF
async fn flush_once(socket: &Path, request: &str) -> Vec<TraceSample> {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn rx_bytes(samples: &[TraceSample]) -> Vec<u64> {
    samples.iter().map(|s| s.rx_b).collect()
}

#[tokio::test]
async fn test_register_then_flush_is_empty() {
    let h = Harness::start();
    h.register();

    assert!(flush_once(&h.socket, FORWARD).await.is_empty());
    assert_eq!(h.service.stats().snapshot().active_records, 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_publish_accumulates_in_order() {
    let h = Harness::start();
    h.register();
    for rx_b in [1, 2, 3, 4] {
        h.publish(rx_b);
    }

    let samples = flush_once(&h.socket, FORWARD).await;
    assert_eq!(rx_bytes(&samples), vec![1, 2, 3, 4]);
    assert_eq!(samples[0].saddr, "10.0.0.1");
    assert_eq!(samples[0].sport, 5000);
    assert_eq!(samples[0].dport, 80);
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_reverse_quartet_flush() {
    let h = Harness::start();
    h.register();
    h.publish(42);

    assert_eq!(rx_bytes(&flush_once(&h.socket, REVERSE).await), vec![42]);
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_unregister_before_flush_is_empty() {
    let h = Harness::start();
    h.register();
    h.publish(1);
    h.unregister();

    assert!(flush_once(&h.socket, FORWARD).await.is_empty());
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_second_flush_is_empty() {
    let h = Harness::start();
    h.register();
    h.publish(9);

    assert_eq!(flush_once(&h.socket, FORWARD).await.len(), 1);
    assert!(flush_once(&h.socket, FORWARD).await.is_empty());
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_quartet_is_safe() {
    let h = Harness::start();
    h.publish(1);
    h.unregister();

    assert!(flush_once(&h.socket, FORWARD).await.is_empty());

    let stats = h.service.shutdown().await.stats;
    assert_eq!(stats.active_records, 0);
    assert_eq!(stats.orphan_publishes, 1);
    assert_eq!(stats.empty_flushes, 1);
}

#[tokio::test]
async fn test_garbage_gets_silence() {
    let h = Harness::start();
    h.register();
    h.publish(5);

    let samples = flush_once(&h.socket, "hello there\nnot an address 1 2\n").await;
    assert!(samples.is_empty());

    // The record is untouched by malformed requests
    assert_eq!(rx_bytes(&flush_once(&h.socket, FORWARD).await), vec![5]);

    let stats = h.service.shutdown().await.stats;
    assert_eq!(stats.malformed_requests, 1);
}

#[tokio::test]
async fn test_reverse_order_scenario_on_one_connection() {
    let h = Harness::start();
    h.register();
    h.publish(100);
    h.publish(250);

    let stream = UnixStream::connect(&h.socket).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(REVERSE.as_bytes()).await.unwrap();
    let first: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["rx_b"], 100);
    assert_eq!(second["rx_b"], 250);

    // Same request again on the same connection: nothing left
    write_half.write_all(REVERSE.as_bytes()).await.unwrap();
    write_half.shutdown().await.unwrap();
    assert_eq!(lines.next_line().await.unwrap(), None);

    let stats = h.service.shutdown().await.stats;
    assert_eq!(stats.event_type_breakdown.flush, 2);
    assert_eq!(stats.samples_flushed, 2);
}

#[tokio::test]
async fn test_short_line_does_not_shift_next_request() {
    let h = Harness::start();
    h.register();
    h.publish(100);
    h.publish(250);

    let stream = UnixStream::connect(&h.socket).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"10.0.0.2 10.0.0.1 80\n").await.unwrap();
    write_half.write_all(REVERSE.as_bytes()).await.unwrap();
    write_half.shutdown().await.unwrap();

    let mut received = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        received.push(serde_json::from_str::<TraceSample>(&line).unwrap());
    }
    assert_eq!(rx_bytes(&received), vec![100, 250]);

    let stats = h.service.shutdown().await.stats;
    assert_eq!(stats.event_type_breakdown.flush, 1);
    assert_eq!(stats.malformed_requests, 0);
}

#[tokio::test]
async fn test_overlong_token_is_not_truncated_into_a_request() {
    let h = Harness::start();
    h.register();
    h.publish(7);

    // Cut to its first 64 bytes this port would read as 5000
    let port = format!("{}50009", "0".repeat(60));
    let request = format!("10.0.0.1 10.0.0.2 {} 80\n", port);
    assert!(flush_once(&h.socket, &request).await.is_empty());

    assert_eq!(rx_bytes(&flush_once(&h.socket, FORWARD).await), vec![7]);

    let stats = h.service.shutdown().await.stats;
    assert_eq!(stats.malformed_requests, 1);
}

#[tokio::test]
async fn test_shutdown_returns_live_records() {
    let h = Harness::start();
    h.register();
    h.publish(3);
    h.publish(4);

    // A client left connected keeps a mailbox sender alive
    let idle = UnixStream::connect(&h.socket).await.unwrap();

    // Flushing an unknown quartet orders the events ahead of shutdown
    assert!(flush_once(&h.socket, "10.9.9.9 10.9.9.8 1 2\n")
        .await
        .is_empty());

    let report = h.service.shutdown().await;
    assert_eq!(report.stats.active_records, 1);
    assert_eq!(report.store.len(), 1);
    let forward = Quartet::new(
        "10.0.0.1".parse().unwrap(),
        "10.0.0.2".parse().unwrap(),
        5000,
        80,
    );
    assert_eq!(report.store.sample_count(&forward), Some(2));
    drop(idle);
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let h = Harness::start();
    let socket = h.socket.clone();
    assert!(socket.exists());

    h.service.shutdown().await;
    assert!(!socket.exists());
}
