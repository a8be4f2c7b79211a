//! # strand-net
//!
//! The network side of the strand system: a simulated unreliable packet
//! fabric, a thin datagram port layer, and a reliable stop-and-wait
//! byte-stream transport whose connection and retransmission state machine
//! is built entirely on the runtime's semaphores and alarms.
//!
//! ## Modules
//!
//! - `addr` - network addresses and endpoints
//! - `wire` - frame header codec (network byte order)
//! - `fabric` - in-process lossy packet network
//! - `stack` - per-host port table and inbound dispatch
//! - `datagram` - unreliable datagram ports
//! - `stream` - reliable stream sockets
//! - `error` - transport error types

pub mod addr;
pub mod wire;
mod error;
mod fabric;
mod ports;
mod stack;
mod datagram;
mod stream;

// Re-exports for convenience
pub use addr::{Endpoint, NetAddr};
pub use datagram::{DatagramReceiver, DatagramSender};
pub use error::{NetError, NetResult};
pub use fabric::{Fabric, LossPolicy};
pub use stack::{NetConfig, NetStack};
pub use stream::{ConnState, StreamSocket};
