//! Userspace type definitions
//!
//! Defines the connection identity, the trace samples served to clients and
//! the lifecycle events exchanged between producers and the correlation actor.
//!
//! ## Organization
//!
//! - **Kernel Types**: the raw record layout shared with the eBPF program
//! - **Userspace Types**: quartets, samples and mailbox events

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, Ipv6Addr},
};
use tokio::sync::oneshot;

// ============================================================================
// Kernel Types (from eBPF programs)
// ============================================================================

pub mod kernel {
    //! Types shared between the kernel eBPF program and userspace
    //!
    //! These are re-exported from the tcpexpose-common crate and must
    //! maintain binary compatibility with the eBPF program.

    pub use tcpexpose_common::constants;
    pub use tcpexpose_common::types::TcpEventRecord;
}

pub use kernel::TcpEventRecord;

// ============================================================================
// Connection identity
// ============================================================================

/// One direction of a TCP flow
///
/// Addresses are canonicalized on construction: IPv4-mapped IPv6 addresses
/// are unwrapped to plain IPv4, so both spellings name the same flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Quartet {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Quartet {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_ip: canonical_ip(src_ip),
            dst_ip: canonical_ip(dst_ip),
            src_port,
            dst_port,
        }
    }

    /// The same flow as observed from the peer
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Canonical key in the form "saddr:sport -> daddr:dport"
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Quartet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}

/// Unwrap IPv4-mapped IPv6 addresses
pub fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Render a raw 16-byte address as text
///
/// # Examples
///
/// ```
/// use tcpexpose_daemon::types::format_addr;
///
/// let mut raw = [0u8; 16];
/// raw[10] = 0xff;
/// raw[11] = 0xff;
/// raw[12..].copy_from_slice(&[10, 0, 0, 1]);
/// assert_eq!(format_addr(&raw), "10.0.0.1");
/// ```
pub fn format_addr(raw: &[u8; 16]) -> String {
    canonical_ip(IpAddr::V6(Ipv6Addr::from(*raw))).to_string()
}

// ============================================================================
// Trace samples
// ============================================================================

/// One captured kernel event, as delivered to control clients
///
/// Serialized as a flat JSON object. Counters are passed through untouched.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct TraceSample {
    pub event_type: u64,
    /// Capture timestamp in microseconds
    pub ts_us: u64,
    pub saddr: String,
    pub daddr: String,
    pub sport: u16,
    pub dport: u16,

    // Throughput
    pub rx_b: u64,
    pub tx_b: u64,
    pub segs_out: u64,
    pub segs_in: u64,
    pub rcv_tstamp: u64,
    pub lsndtime: u64,

    // Windowing
    pub snd_wl1: u64,
    pub snd_wnd: u64,
    pub max_window: u64,
    pub mss_cache: u64,
    pub window_clamp: u64,
    pub rcv_ssthresh: u64,
    pub packets_out: u64,
    pub retrans_out: u64,
    pub max_packets_out: u64,
    pub max_packets_seq: u64,

    // RTT
    pub srtt_us: u64,
    pub mdev_us: u64,
    pub mdev_max_us: u64,
}

impl TraceSample {
    /// Build a sample from a raw record and its already-decoded quartet
    pub fn from_record(record: &TcpEventRecord, quartet: &Quartet) -> Self {
        Self {
            event_type: record.event_type,
            ts_us: record.ts_us,
            saddr: quartet.src_ip.to_string(),
            daddr: quartet.dst_ip.to_string(),
            sport: quartet.src_port,
            dport: quartet.dst_port,
            rx_b: record.rx_b,
            tx_b: record.tx_b,
            segs_out: record.segs_out,
            segs_in: record.segs_in,
            rcv_tstamp: record.rcv_tstamp,
            lsndtime: record.lsndtime,
            snd_wl1: record.snd_wl1,
            snd_wnd: record.snd_wnd,
            max_window: record.max_window,
            mss_cache: record.mss_cache,
            window_clamp: record.window_clamp,
            rcv_ssthresh: record.rcv_ssthresh,
            packets_out: record.packets_out,
            retrans_out: record.retrans_out,
            max_packets_out: record.max_packets_out,
            max_packets_seq: record.max_packets_seq,
            srtt_us: record.srtt_us,
            mdev_us: record.mdev_us,
            mdev_max_us: record.mdev_max_us,
        }
    }
}

// ============================================================================
// Mailbox events
// ============================================================================

/// Action carried by a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Register,
    Unregister,
    Publish,
    Flush,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Register => "register",
            Action::Unregister => "unregister",
            Action::Publish => "publish",
            Action::Flush => "flush",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Unit of work for the correlation actor
#[derive(Debug)]
pub enum LifecycleEvent {
    /// Connection established: start a fresh trace buffer
    Register(Quartet),
    /// Connection closed: discard its trace buffer
    Unregister(Quartet),
    /// Counter snapshot for an established connection
    Publish(Quartet, TraceSample),
    /// Client request to drain a flow; samples are sent back on `reply`
    Flush {
        quartet: Quartet,
        reply: oneshot::Sender<Vec<TraceSample>>,
    },
}

impl LifecycleEvent {
    pub fn action(&self) -> Action {
        match self {
            LifecycleEvent::Register(_) => Action::Register,
            LifecycleEvent::Unregister(_) => Action::Unregister,
            LifecycleEvent::Publish(..) => Action::Publish,
            LifecycleEvent::Flush { .. } => Action::Flush,
        }
    }

    pub fn quartet(&self) -> &Quartet {
        match self {
            LifecycleEvent::Register(q)
            | LifecycleEvent::Unregister(q)
            | LifecycleEvent::Publish(q, _)
            | LifecycleEvent::Flush { quartet: q, .. } => q,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_quartet_key_format() {
        let q = Quartet::new(v4(10, 0, 0, 1), v4(10, 0, 0, 2), 5000, 80);
        assert_eq!(q.key(), "10.0.0.1:5000 -> 10.0.0.2:80");
        assert_eq!(q.reversed().key(), "10.0.0.2:80 -> 10.0.0.1:5000");
        assert_eq!(q.reversed().reversed(), q);
    }

    #[test]
    fn test_mapped_addresses_are_unwrapped() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        let q = Quartet::new(mapped, v4(10, 0, 0, 2), 1, 2);
        assert_eq!(q.src_ip, v4(10, 0, 0, 1));

        let native: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(canonical_ip(native), native);
    }

    #[test]
    fn test_format_addr_ipv6() {
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(format_addr(&addr.octets()), "fe80::1");
    }
}
