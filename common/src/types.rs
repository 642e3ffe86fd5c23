//! Record layout shared between the kernel probe and userspace
//!
//! The structure must stay repr(C) so that its layout matches the
//! record submitted to the `events` perf array.

/// One event record as submitted by the kernel probe
///
/// All integers are little-endian u64. Addresses are raw 16-byte IPv6
/// addresses; IPv4 peers appear as IPv4-mapped IPv6.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpEventRecord {
    /// Event class (see EVENT_TYPE_* constants)
    pub event_type: u64,
    /// Capture timestamp in microseconds
    pub ts_us: u64,
    /// Source address
    pub saddr: [u8; 16],
    /// Destination address
    pub daddr: [u8; 16],
    /// High 32 bits: destination port, low 32 bits: source port
    pub ports: u64,

    // Throughput
    /// Inbound bytes acknowledged
    pub rx_b: u64,
    /// Outbound bytes acknowledged
    pub tx_b: u64,
    pub segs_out: u64,
    pub segs_in: u64,
    /// Timestamp of last received ACK
    pub rcv_tstamp: u64,
    /// Timestamp of last sent data packet
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
    /// Smoothed RTT (<< 3) in microseconds
    pub srtt_us: u64,
    pub mdev_us: u64,
    pub mdev_max_us: u64,
}

impl TcpEventRecord {
    /// Pack a source/destination port pair the way the probe does
    pub const fn pack_ports(src_port: u16, dst_port: u16) -> u64 {
        ((dst_port as u64) << 32) | src_port as u64
    }

    /// Serialize to the on-wire little-endian layout
    pub fn to_bytes(&self) -> [u8; crate::constants::RECORD_SIZE] {
        use crate::constants::*;

        let mut out = [0u8; RECORD_SIZE];
        out[OFFSET_EVENT_TYPE..OFFSET_EVENT_TYPE + 8].copy_from_slice(&self.event_type.to_le_bytes());
        out[OFFSET_TS_US..OFFSET_TS_US + 8].copy_from_slice(&self.ts_us.to_le_bytes());
        out[OFFSET_SADDR..OFFSET_SADDR + ADDR_LEN].copy_from_slice(&self.saddr);
        out[OFFSET_DADDR..OFFSET_DADDR + ADDR_LEN].copy_from_slice(&self.daddr);
        out[OFFSET_PORTS..OFFSET_PORTS + 8].copy_from_slice(&self.ports.to_le_bytes());

        for (i, value) in self.counters().iter().enumerate() {
            let at = OFFSET_COUNTERS + i * 8;
            out[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Counters in record order, starting at `rx_b`
    pub fn counters(&self) -> [u64; crate::constants::COUNTER_COUNT] {
        [
            self.rx_b,
            self.tx_b,
            self.segs_out,
            self.segs_in,
            self.rcv_tstamp,
            self.lsndtime,
            self.snd_wl1,
            self.snd_wnd,
            self.max_window,
            self.mss_cache,
            self.window_clamp,
            self.rcv_ssthresh,
            self.packets_out,
            self.retrans_out,
            self.max_packets_out,
            self.max_packets_seq,
            self.srtt_us,
            self.mdev_us,
            self.mdev_max_us,
        ]
    }
}

// Compile-time layout checks
// These will fail to compile if the layout drifts from the kernel record
const _: () = {
    use crate::constants::*;
    use core::mem::{offset_of, size_of};

    assert!(size_of::<TcpEventRecord>() == RECORD_SIZE);
    assert!(offset_of!(TcpEventRecord, event_type) == OFFSET_EVENT_TYPE);
    assert!(offset_of!(TcpEventRecord, ts_us) == OFFSET_TS_US);
    assert!(offset_of!(TcpEventRecord, saddr) == OFFSET_SADDR);
    assert!(offset_of!(TcpEventRecord, daddr) == OFFSET_DADDR);
    assert!(offset_of!(TcpEventRecord, ports) == OFFSET_PORTS);
    assert!(offset_of!(TcpEventRecord, rx_b) == OFFSET_COUNTERS);
    assert!(offset_of!(TcpEventRecord, mdev_max_us) == OFFSET_COUNTERS + (COUNTER_COUNT - 1) * 8);
};
