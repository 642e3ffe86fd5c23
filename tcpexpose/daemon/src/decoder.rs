//! Event record decoding
//!
//! Turns the fixed-layout binary records submitted by the kernel probe into
//! lifecycle events. Fields are read at known little-endian offsets; no
//! pointer casts are involved.

use crate::types::{
    kernel::constants::*, LifecycleEvent, Quartet, TcpEventRecord, TraceSample,
};
use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;

/// Reasons a record is dropped before reaching the mailbox
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record truncated: {len} bytes, expected {RECORD_SIZE}")]
    Truncated { len: usize },
    #[error("unknown event type {0}")]
    UnknownEventType(u64),
    #[error("port value {0} does not fit in 16 bits")]
    PortOutOfRange(u64),
}

/// Read the raw record fields
///
/// Buffers longer than `RECORD_SIZE` are accepted; perf samples may carry
/// alignment padding after the record.
pub fn decode_record(buf: &[u8]) -> Result<TcpEventRecord, DecodeError> {
    if buf.len() < RECORD_SIZE {
        return Err(DecodeError::Truncated { len: buf.len() });
    }

    let mut counters = [0u64; COUNTER_COUNT];
    for (i, counter) in counters.iter_mut().enumerate() {
        *counter = read_u64(buf, OFFSET_COUNTERS + i * 8);
    }
    let [
        rx_b,
        tx_b,
        segs_out,
        segs_in,
        rcv_tstamp,
        lsndtime,
        snd_wl1,
        snd_wnd,
        max_window,
        mss_cache,
        window_clamp,
        rcv_ssthresh,
        packets_out,
        retrans_out,
        max_packets_out,
        max_packets_seq,
        srtt_us,
        mdev_us,
        mdev_max_us,
    ] = counters;

    Ok(TcpEventRecord {
        event_type: read_u64(buf, OFFSET_EVENT_TYPE),
        ts_us: read_u64(buf, OFFSET_TS_US),
        saddr: read_addr(buf, OFFSET_SADDR),
        daddr: read_addr(buf, OFFSET_DADDR),
        ports: read_u64(buf, OFFSET_PORTS),
        rx_b,
        tx_b,
        segs_out,
        segs_in,
        rcv_tstamp,
        lsndtime,
        snd_wl1,
        snd_wnd,
        max_window,
        mss_cache,
        window_clamp,
        rcv_ssthresh,
        packets_out,
        retrans_out,
        max_packets_out,
        max_packets_seq,
        srtt_us,
        mdev_us,
        mdev_max_us,
    })
}

/// Extract the connection quartet from a raw record
pub fn record_quartet(record: &TcpEventRecord) -> Result<Quartet, DecodeError> {
    let (src_port, dst_port) = unpack_ports(record.ports)?;
    Ok(Quartet::new(
        IpAddr::V6(Ipv6Addr::from(record.saddr)),
        IpAddr::V6(Ipv6Addr::from(record.daddr)),
        src_port,
        dst_port,
    ))
}

/// Split the packed ports field into (source, destination)
///
/// The destination port occupies the high 32 bits, the source port the low 32.
pub fn unpack_ports(ports: u64) -> Result<(u16, u16), DecodeError> {
    let src = ports & 0xffff_ffff;
    let dst = ports >> 32;
    let src_port = u16::try_from(src).map_err(|_| DecodeError::PortOutOfRange(src))?;
    let dst_port = u16::try_from(dst).map_err(|_| DecodeError::PortOutOfRange(dst))?;
    Ok((src_port, dst_port))
}

/// Decode a record into the lifecycle event it announces
pub fn decode_event(buf: &[u8]) -> Result<LifecycleEvent, DecodeError> {
    let record = decode_record(buf)?;
    record_to_event(&record)
}

pub fn record_to_event(record: &TcpEventRecord) -> Result<LifecycleEvent, DecodeError> {
    // Reject the class first so that garbage records are reported as such
    if !matches!(
        record.event_type,
        EVENT_TYPE_REGISTER | EVENT_TYPE_UNREGISTER | EVENT_TYPE_PUBLISH
    ) {
        return Err(DecodeError::UnknownEventType(record.event_type));
    }

    let quartet = record_quartet(record)?;
    let event = match record.event_type {
        EVENT_TYPE_REGISTER => LifecycleEvent::Register(quartet),
        EVENT_TYPE_UNREGISTER => LifecycleEvent::Unregister(quartet),
        _ => LifecycleEvent::Publish(quartet, TraceSample::from_record(record, &quartet)),
    };
    Ok(event)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_addr(buf: &[u8], offset: usize) -> [u8; ADDR_LEN] {
    let mut addr = [0u8; ADDR_LEN];
    addr.copy_from_slice(&buf[offset..offset + ADDR_LEN]);
    addr
}
