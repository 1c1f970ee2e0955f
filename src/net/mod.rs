//! Connection pipeline
//!
//! Bytes in, commands executed, state deltas out. Each connection runs three
//! independently scheduled stages (receive-decode, execute, send-encode)
//! coupled only by FIFO queues; a slow or broken client can only ever stall
//! its own queues.

pub mod commands;
pub mod connection;
pub mod framing;
pub mod pipeline;
pub mod protocol;
pub mod transport;
