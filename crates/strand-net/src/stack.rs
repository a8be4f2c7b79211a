//! Per-host network stack
//!
//! A `NetStack` binds one address on a fabric and owns that host's port
//! table. `deliver` is the single inbound entry point: it inspects the
//! protocol discriminant and routes the frame to the datagram or stream
//! demultiplexer. The fabric's delivery thread drives it for frames
//! arriving over the fabric; an embedding environment may call it
//! directly.
//!
//! Lock order: the port table lock is taken first; the kernel lock (via
//! semaphores) and the fabric's internal locks are leaves. Nothing called
//! with the port table held can block.

use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use strand_core::env::env_get;
use strand_core::kdebug;
use strand_runtime::Handle;

use crate::addr::NetAddr;
use crate::datagram::{self, DatagramPort};
use crate::error::{NetError, NetResult};
use crate::fabric::{Fabric, Mailbox};
use crate::ports::PortTable;
use crate::stream::{self, StreamConn};
use crate::wire::{self, Header, MAX_STREAM_PAYLOAD};

/// Transport configuration with builder pattern
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Payload bytes per stream segment
    pub max_segment: usize,
    /// Initial retransmission timeout in milliseconds
    pub rto_ms: u64,
    /// Retransmission timeout ceiling, inclusive: the attempt at the
    /// ceiling is still made, the next doubling gives up
    pub rto_ceil_ms: u64,
}

mod defaults {
    use super::MAX_STREAM_PAYLOAD;

    pub const MAX_SEGMENT: usize = MAX_STREAM_PAYLOAD;
    pub const RTO_MS: u64 = 100;
    pub const RTO_CEIL_MS: u64 = 6400;
}

impl NetConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STRAND_NET_SEGMENT` - payload bytes per segment
    /// - `STRAND_NET_RTO_MS` - initial retransmission timeout
    /// - `STRAND_NET_RTO_CEIL_MS` - retransmission timeout ceiling
    pub fn from_env() -> Self {
        Self {
            max_segment: env_get("STRAND_NET_SEGMENT", defaults::MAX_SEGMENT),
            rto_ms: env_get("STRAND_NET_RTO_MS", defaults::RTO_MS),
            rto_ceil_ms: env_get("STRAND_NET_RTO_CEIL_MS", defaults::RTO_CEIL_MS),
        }
    }

    /// Explicit defaults, no env override
    pub fn new() -> Self {
        Self {
            max_segment: defaults::MAX_SEGMENT,
            rto_ms: defaults::RTO_MS,
            rto_ceil_ms: defaults::RTO_CEIL_MS,
        }
    }

    pub fn max_segment(mut self, bytes: usize) -> Self {
        self.max_segment = bytes;
        self
    }

    pub fn rto_ms(mut self, ms: u64) -> Self {
        self.rto_ms = ms;
        self
    }

    pub fn rto_ceil_ms(mut self, ms: u64) -> Self {
        self.rto_ceil_ms = ms;
        self
    }

    pub fn validate(&self) -> NetResult<()> {
        if self.max_segment == 0 || self.max_segment > MAX_STREAM_PAYLOAD {
            return Err(NetError::InvalidParams);
        }
        if self.rto_ms == 0 || self.rto_ceil_ms < self.rto_ms {
            return Err(NetError::InvalidParams);
        }
        Ok(())
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// A port slot: either a datagram port or a stream connection
pub(crate) enum PortEntry {
    Datagram(DatagramPort),
    Stream(StreamConn),
}

pub(crate) struct StackInner {
    pub(crate) handle: Handle,
    pub(crate) fabric: Fabric,
    pub(crate) addr: NetAddr,
    pub(crate) config: NetConfig,
    pub(crate) ports: Mutex<PortTable<PortEntry>>,
}

impl Drop for StackInner {
    fn drop(&mut self) {
        self.fabric.unbind(self.addr);
    }
}

/// One host's view of the network
#[derive(Clone)]
pub struct NetStack {
    pub(crate) inner: Arc<StackInner>,
}

impl NetStack {
    /// Bind `addr` on the fabric and start this host's delivery thread.
    ///
    /// The delivery thread is the inbound interrupt context: it only ever
    /// enqueues, signals and replies, never blocks on a semaphore.
    pub fn attach(
        handle: &Handle,
        fabric: &Fabric,
        addr: NetAddr,
        config: NetConfig,
    ) -> NetResult<NetStack> {
        config.validate()?;
        let mailbox = fabric.bind(addr)?;
        let inner = Arc::new(StackInner {
            handle: handle.clone(),
            fabric: fabric.clone(),
            addr,
            config,
            ports: Mutex::new(PortTable::new()),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name(format!("strand-net-{}", addr))
            .spawn(move || delivery_loop(weak, mailbox))
            .expect("failed to spawn delivery thread");

        Ok(NetStack { inner })
    }

    pub fn local_addr(&self) -> NetAddr {
        self.inner.addr
    }

    pub fn config(&self) -> &NetConfig {
        &self.inner.config
    }

    /// Inbound dispatch entry point: route one raw frame by its protocol
    /// discriminant. Malformed frames are dropped.
    pub fn deliver(&self, frame: &[u8]) {
        dispatch(&self.inner, frame);
    }
}

fn delivery_loop(stack: Weak<StackInner>, mailbox: Mailbox) {
    loop {
        while let Some(frame) = mailbox.queue.pop() {
            let Some(inner) = stack.upgrade() else {
                return;
            };
            dispatch(&inner, &frame);
        }
        if stack.upgrade().is_none() {
            return;
        }
        mailbox.parker.park(Some(Duration::from_millis(20)));
    }
}

pub(crate) fn dispatch(inner: &Arc<StackInner>, frame: &[u8]) {
    match wire::decode(frame) {
        Ok(Header::Datagram(hdr)) => {
            datagram::append(inner, hdr, &frame[wire::SHARED_HEADER_LEN..])
        }
        Ok(Header::Stream(hdr)) => stream::append(inner, hdr, &frame[wire::STREAM_HEADER_LEN..]),
        Err(e) => kdebug!("dropping malformed frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_validate() {
        assert!(NetConfig::new().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(NetConfig::new().max_segment(0).validate().is_err());
        assert!(NetConfig::new()
            .max_segment(MAX_STREAM_PAYLOAD + 1)
            .validate()
            .is_err());
        assert!(NetConfig::new().rto_ms(0).validate().is_err());
        assert!(NetConfig::new()
            .rto_ms(100)
            .rto_ceil_ms(50)
            .validate()
            .is_err());
    }
}
