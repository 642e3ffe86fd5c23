//! Shared record layout and constants for tcpexpose
//!
//! This crate describes the fixed-layout event record emitted by the
//! kernel-side probe and the defaults shared by userspace components.

#![no_std]

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::TcpEventRecord;
