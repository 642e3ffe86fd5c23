//! Shared constants for the tcpexpose probe
//!
//! These constants describe the record emitted by the kernel program and
//! the defaults used by the userspace daemon.

// ============================================================================
// Event Types (for TcpEventRecord.event_type)
// ============================================================================

/// Connection reached ESTABLISHED (tcp_set_state)
pub const EVENT_TYPE_REGISTER: u64 = 0;

/// Connection left ESTABLISHED (tcp_set_state)
pub const EVENT_TYPE_UNREGISTER: u64 = 1;

/// Counter snapshot taken on an established connection (tcp_rcv_established)
pub const EVENT_TYPE_PUBLISH: u64 = 2;

// ============================================================================
// Record Layout
// ============================================================================

/// Size in bytes of one event record
pub const RECORD_SIZE: usize = 208;

/// Length of a raw address field (IPv6 or IPv4-mapped IPv6)
pub const ADDR_LEN: usize = 16;

/// Byte offset of `event_type`
pub const OFFSET_EVENT_TYPE: usize = 0;

/// Byte offset of `ts_us`
pub const OFFSET_TS_US: usize = 8;

/// Byte offset of `saddr`
pub const OFFSET_SADDR: usize = 16;

/// Byte offset of `daddr`
pub const OFFSET_DADDR: usize = 32;

/// Byte offset of the packed `ports` field
pub const OFFSET_PORTS: usize = 48;

/// Byte offset of the first counter (`rx_b`); counters follow as consecutive u64s
pub const OFFSET_COUNTERS: usize = 56;

/// Number of u64 counters following `ports`
pub const COUNTER_COUNT: usize = 19;

// ============================================================================
// Service Defaults
// ============================================================================

/// Well-known path of the control socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/tcpexpose.sock";

/// Default mailbox capacity between producers and the correlation actor
pub const DEFAULT_MAILBOX_CAPACITY: usize = 65_536;

/// Default progress reporting interval in seconds
pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 30;

/// Number of perf buffers read per CPU wakeup
pub const PERF_READ_BATCH: usize = 16;
