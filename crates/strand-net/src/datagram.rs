//! Unreliable datagram ports
//!
//! The thin demultiplexer under the stream layer: a receive port buffers
//! raw datagrams and wakes its blocked reader; a send port is an ephemeral
//! endpoint aimed at one remote receive port. No retransmission, no
//! ordering guarantee, silent loss.

use std::collections::VecDeque;
use std::sync::Arc;

use strand_core::constants::EPHEMERAL_PORT_START;
use strand_core::kdebug;
use strand_runtime::Semaphore;

use crate::addr::Endpoint;
use crate::error::{NetError, NetResult};
use crate::stack::{NetStack, PortEntry, StackInner};
use crate::wire::{DatagramHeader, MAX_DATAGRAM_PAYLOAD};

/// Datagram port slot state
pub(crate) enum DatagramPort {
    /// Well-known receiving port: buffered datagrams + data-ready signal
    Receive {
        inbox: VecDeque<(Endpoint, Vec<u8>)>,
        ready: Semaphore,
    },
    /// Ephemeral sending port aimed at one remote receiver
    Send { remote: Endpoint },
}

/// Receiving half: owns a well-known port
pub struct DatagramReceiver {
    inner: Arc<StackInner>,
    port: u16,
}

impl DatagramReceiver {
    /// Bind a well-known port for receiving
    pub fn bind(stack: &NetStack, port: u16) -> NetResult<DatagramReceiver> {
        if port >= EPHEMERAL_PORT_START {
            return Err(NetError::InvalidParams);
        }
        let inner = Arc::clone(&stack.inner);
        {
            let mut pt = inner.ports.lock().unwrap();
            if pt.contains(port) {
                return Err(NetError::PortInUse);
            }
            let ready = inner.handle.semaphore(0);
            pt.insert(
                port,
                PortEntry::Datagram(DatagramPort::Receive {
                    inbox: VecDeque::new(),
                    ready,
                }),
            );
        }
        Ok(DatagramReceiver { inner, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until a datagram arrives, then copy it out (truncating to the
    /// buffer). Returns the byte count and the sender's endpoint.
    pub fn recv(&self, buf: &mut [u8]) -> NetResult<(usize, Endpoint)> {
        let ready = {
            let pt = self.inner.ports.lock().unwrap();
            match pt.get(self.port) {
                Some(PortEntry::Datagram(DatagramPort::Receive { ready, .. })) => ready.clone(),
                _ => return Err(NetError::ConnectionClosed),
            }
        };
        ready.wait();

        let mut pt = self.inner.ports.lock().unwrap();
        match pt.get_mut(self.port) {
            Some(PortEntry::Datagram(DatagramPort::Receive { inbox, .. })) => {
                let (src, data) = inbox.pop_front().ok_or(NetError::ReceiveError)?;
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, src))
            }
            _ => Err(NetError::ConnectionClosed),
        }
    }

    /// Release the port and its buffered datagrams
    pub fn close(self) {
        let mut pt = self.inner.ports.lock().unwrap();
        if let Some(PortEntry::Datagram(DatagramPort::Receive { ready, .. })) =
            pt.remove(self.port)
        {
            let _ = ready.destroy();
        }
    }
}

/// Sending half: an ephemeral port aimed at one remote receiver
pub struct DatagramSender {
    inner: Arc<StackInner>,
    local_port: u16,
}

impl DatagramSender {
    /// Allocate an ephemeral port aimed at `remote`
    pub fn create(stack: &NetStack, remote: Endpoint) -> NetResult<DatagramSender> {
        if remote.port >= EPHEMERAL_PORT_START {
            return Err(NetError::InvalidParams);
        }
        let inner = Arc::clone(&stack.inner);
        let local_port = {
            let mut pt = inner.ports.lock().unwrap();
            let port = pt.alloc_ephemeral()?;
            pt.insert(port, PortEntry::Datagram(DatagramPort::Send { remote }));
            port
        };
        Ok(DatagramSender { inner, local_port })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Fire-and-forget send; returns bytes handed to the fabric
    pub fn send(&self, payload: &[u8]) -> NetResult<usize> {
        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(NetError::InvalidParams);
        }
        let remote = {
            let pt = self.inner.ports.lock().unwrap();
            match pt.get(self.local_port) {
                Some(PortEntry::Datagram(DatagramPort::Send { remote })) => *remote,
                _ => return Err(NetError::ConnectionClosed),
            }
        };
        let hdr = DatagramHeader {
            src: Endpoint::new(self.inner.addr, self.local_port),
            dst: remote,
        };
        let hdr_bytes = hdr.encode();
        let sent = self.inner.fabric.send_pkt(remote.addr, &hdr_bytes, payload)?;
        Ok(sent - hdr_bytes.len())
    }

    /// Return the ephemeral port to the pool
    pub fn close(self) {
        let mut pt = self.inner.ports.lock().unwrap();
        pt.remove(self.local_port);
    }
}

/// Inbound datagram demultiplexer
pub(crate) fn append(inner: &Arc<StackInner>, hdr: DatagramHeader, payload: &[u8]) {
    let mut pt = inner.ports.lock().unwrap();
    match pt.get_mut(hdr.dst.port) {
        Some(PortEntry::Datagram(DatagramPort::Receive { inbox, ready })) => {
            inbox.push_back((hdr.src, payload.to_vec()));
            ready.signal();
        }
        _ => {
            kdebug!("datagram for unbound port {}", hdr.dst.port);
        }
    }
}
