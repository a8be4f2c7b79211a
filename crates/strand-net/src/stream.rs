//! Reliable byte-stream sockets
//!
//! Stop-and-wait transport over the lossy fabric: one unacknowledged
//! segment at a time, retransmitted with exponential backoff. The whole
//! state machine is built on two semaphores per connection - `ack_ready`
//! signalled when the in-flight segment is acknowledged (or its retry
//! alarm fires), `data_ready` signalled when a segment is buffered for the
//! application - plus the runtime's alarms for the retry clock.
//!
//! Inbound processing (`append`) runs in the delivery interrupt context
//! and only ever records state, queues items, signals semaphores and
//! fires back best-effort replies. All blocking happens on the
//! application's own threads.

use std::collections::VecDeque;
use std::sync::Arc;

use strand_core::constants::EPHEMERAL_PORT_START;
use strand_core::{kdebug, kwarn};
use strand_runtime::Semaphore;

use crate::addr::Endpoint;
use crate::error::{NetError, NetResult};
use crate::ports::PortTable;
use crate::stack::{NetStack, PortEntry, StackInner};
use crate::wire::{MsgType, StreamHeader};

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Server waiting for a SYN
    Listening,
    /// Client sent SYN, waiting for SYN-ACK
    SynSent,
    /// Server answered SYN-ACK, waiting for it to be acknowledged
    SynAckSent,
    /// Handshake complete
    Established,
    /// A data segment is in flight
    DataSent,
    /// FIN sent, waiting for FIN-ACK
    FinSent,
    /// FIN received and answered; drained, about to be torn down
    FinAckSent,
    /// Torn down
    Closed,
}

/// One buffered inbound item, in arrival order
pub(crate) enum RxItem {
    /// Payload bytes, possibly a partially consumed remainder
    Data(Vec<u8>),
    /// Peer closed the stream
    Fin,
    /// Connection request against a live connection; carries the
    /// requester so it can be rejected without touching the peer fields
    StraySyn(Endpoint),
}

/// Per-connection transport state, owned by its port slot
pub(crate) struct StreamConn {
    pub(crate) conn_id: u64,
    pub(crate) state: ConnState,
    pub(crate) local: Endpoint,
    pub(crate) remote: Option<Endpoint>,
    /// Sequence number of the most recent segment sent
    pub(crate) seq: u32,
    /// Highest remote sequence number accepted so far
    pub(crate) ack_number: u32,
    /// Most recent ack number observed from the peer
    pub(crate) incoming_ack: u32,
    /// Type of the most recent inbound segment
    pub(crate) last_rx: Option<MsgType>,
    pub(crate) rx: VecDeque<RxItem>,
    pub(crate) ack_ready: Semaphore,
    pub(crate) data_ready: Semaphore,
}

fn conn_mut<'a>(
    pt: &'a mut PortTable<PortEntry>,
    port: u16,
    conn_id: u64,
) -> Option<&'a mut StreamConn> {
    match pt.get_mut(port) {
        Some(PortEntry::Stream(conn)) if conn.conn_id == conn_id => Some(conn),
        _ => None,
    }
}

fn bare_ack(conn: &StreamConn) -> Option<(Vec<u8>, Endpoint)> {
    let remote = conn.remote?;
    let hdr = StreamHeader {
        src: conn.local,
        dst: remote,
        msg_type: MsgType::Ack,
        seq: conn.seq,
        ack: conn.ack_number,
    };
    Some((hdr.encode(), remote))
}

/// A reliable stream socket handle
///
/// The handle is port + connection generation; once the connection is torn
/// down every operation fails with [`NetError::ConnectionClosed`], even if
/// the port has been recycled for a new connection since.
pub struct StreamSocket {
    inner: Arc<StackInner>,
    port: u16,
    conn_id: u64,
}

impl std::fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSocket")
            .field("port", &self.port)
            .field("conn_id", &self.conn_id)
            .finish()
    }
}

impl StreamSocket {
    /// Create a server socket on a well-known port and block until a
    /// client completes the handshake.
    ///
    /// The listen loop survives abandoned handshakes: if the SYN-ACK
    /// retry ladder runs dry, the connection re-arms and keeps listening.
    pub fn server(stack: &NetStack, port: u16) -> NetResult<StreamSocket> {
        if port >= EPHEMERAL_PORT_START {
            return Err(NetError::InvalidParams);
        }
        let inner = Arc::clone(&stack.inner);
        let conn_id = {
            let mut pt = inner.ports.lock().unwrap();
            if pt.contains(port) {
                return Err(NetError::PortInUse);
            }
            let conn_id = pt.alloc_conn_id();
            pt.insert(
                port,
                PortEntry::Stream(StreamConn {
                    conn_id,
                    state: ConnState::Listening,
                    local: Endpoint::new(inner.addr, port),
                    remote: None,
                    seq: 0,
                    ack_number: 0,
                    incoming_ack: 0,
                    last_rx: None,
                    rx: VecDeque::new(),
                    ack_ready: inner.handle.semaphore(0),
                    data_ready: inner.handle.semaphore(0),
                }),
            );
            conn_id
        };

        loop {
            let data_ready = {
                let mut pt = inner.ports.lock().unwrap();
                let conn = conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
                conn.data_ready.clone()
            };
            data_ready.wait();

            {
                let mut pt = inner.ports.lock().unwrap();
                let conn = conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
                if conn.remote.is_none() || conn.last_rx != Some(MsgType::Syn) {
                    // Stray wake (e.g. a FIN aimed at a listener); nothing
                    // buffered before the handshake matters
                    conn.rx.clear();
                    continue;
                }
                conn.seq += 1;
                conn.state = ConnState::SynAckSent;
            }

            match send_blocking(&inner, port, conn_id, MsgType::SynAck, &[]) {
                Ok(_) => {
                    let mut pt = inner.ports.lock().unwrap();
                    let conn =
                        conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
                    conn.state = ConnState::Established;
                    return Ok(StreamSocket {
                        inner: Arc::clone(&inner),
                        port,
                        conn_id,
                    });
                }
                Err(NetError::ConnectionClosed) => return Err(NetError::ConnectionClosed),
                Err(_) => {
                    // Client went away mid-handshake: re-arm and listen again
                    let mut pt = inner.ports.lock().unwrap();
                    let conn =
                        conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
                    kdebug!("handshake on port {} abandoned, re-listening", port);
                    conn.seq = 0;
                    conn.ack_number = 0;
                    conn.incoming_ack = 0;
                    conn.remote = None;
                    conn.last_rx = None;
                    conn.rx.clear();
                    conn.state = ConnState::Listening;
                }
            }
        }
    }

    /// Connect to a server, blocking until the handshake completes.
    ///
    /// Allocates an ephemeral local port. Fails with [`NetError::Busy`]
    /// when the peer rejects the attempt and
    /// [`NetError::PeerUnreachable`] when the retry ladder runs dry.
    pub fn connect(stack: &NetStack, remote: Endpoint) -> NetResult<StreamSocket> {
        if remote.port >= EPHEMERAL_PORT_START {
            return Err(NetError::InvalidParams);
        }
        let inner = Arc::clone(&stack.inner);
        let (port, conn_id) = {
            let mut pt = inner.ports.lock().unwrap();
            let port = pt.alloc_ephemeral()?;
            let conn_id = pt.alloc_conn_id();
            pt.insert(
                port,
                PortEntry::Stream(StreamConn {
                    conn_id,
                    state: ConnState::SynSent,
                    local: Endpoint::new(inner.addr, port),
                    remote: Some(remote),
                    seq: 1,
                    ack_number: 0,
                    incoming_ack: 0,
                    last_rx: None,
                    rx: VecDeque::new(),
                    ack_ready: inner.handle.semaphore(0),
                    data_ready: inner.handle.semaphore(0),
                }),
            );
            (port, conn_id)
        };

        if let Err(e) = send_blocking(&inner, port, conn_id, MsgType::Syn, &[]) {
            teardown(&inner, port, conn_id);
            return Err(e);
        }

        // SYN-ACK observed: acknowledge it once and enter Established. If
        // this ACK is lost the server's duplicate SYN-ACK draws another.
        {
            let mut pt = inner.ports.lock().unwrap();
            let conn = conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
            conn.state = ConnState::Established;
            if let Some((bytes, dst)) = bare_ack(conn) {
                let _ = inner.fabric.send_pkt(dst.addr, &bytes, &[]);
            }
        }
        Ok(StreamSocket {
            inner,
            port,
            conn_id,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Send a buffer, fragmenting at the configured segment size.
    ///
    /// Each fragment advances the sequence number by one and is sent
    /// stop-and-wait. On a retransmission stall the bytes acknowledged so
    /// far are reported in the error.
    pub fn send(&self, buf: &[u8]) -> NetResult<usize> {
        let max_segment = self.inner.config.max_segment;
        let mut total = 0;
        // Checks the socket state even for an empty buffer
        let mut chunks = buf.chunks(max_segment);
        loop {
            let chunk = {
                let mut pt = self.inner.ports.lock().unwrap();
                let conn = conn_mut(&mut pt, self.port, self.conn_id)
                    .ok_or(NetError::ConnectionClosed)?;
                if matches!(
                    conn.state,
                    ConnState::FinSent | ConnState::FinAckSent | ConnState::Closed
                ) {
                    return Err(NetError::SendError);
                }
                let Some(chunk) = chunks.next() else {
                    return Ok(total);
                };
                conn.seq += 1;
                conn.state = ConnState::DataSent;
                chunk
            };
            match send_blocking(&self.inner, self.port, self.conn_id, MsgType::Ack, chunk) {
                Ok(n) => total += n,
                Err(NetError::PeerUnreachable { .. }) => {
                    return Err(NetError::PeerUnreachable { acked: total })
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive into `buf`, blocking until data, end-of-stream or error.
    ///
    /// Returns `Ok(0)` exactly once, when the peer's FIN is reached: the
    /// FIN is acknowledged, the connection torn down, and every later call
    /// fails. A segment larger than `buf` is consumed partially; the
    /// remainder goes back to the front of the queue so byte order is
    /// preserved across partial reads.
    pub fn recv(&self, buf: &mut [u8]) -> NetResult<usize> {
        if buf.is_empty() {
            return Err(NetError::InvalidParams);
        }
        let data_ready = {
            let mut pt = self.inner.ports.lock().unwrap();
            let conn =
                conn_mut(&mut pt, self.port, self.conn_id).ok_or(NetError::ConnectionClosed)?;
            if matches!(conn.state, ConnState::FinAckSent | ConnState::Closed) {
                return Err(NetError::ReceiveError);
            }
            conn.data_ready.clone()
        };

        loop {
            data_ready.wait();
            let mut pt = self.inner.ports.lock().unwrap();
            let conn =
                conn_mut(&mut pt, self.port, self.conn_id).ok_or(NetError::ConnectionClosed)?;
            let Some(item) = conn.rx.pop_front() else {
                // Signalled without anything buffered; go back to waiting
                drop(pt);
                continue;
            };
            match item {
                RxItem::Fin => {
                    conn.state = ConnState::FinAckSent;
                    let remote = conn.remote;
                    let reply = remote.map(|r| {
                        StreamHeader {
                            src: conn.local,
                            dst: r,
                            msg_type: MsgType::FinAck,
                            seq: conn.seq,
                            ack: conn.ack_number,
                        }
                        .encode()
                    });
                    drop(pt);
                    if let (Some(bytes), Some(r)) = (reply, remote) {
                        let _ = self.inner.fabric.send_pkt(r.addr, &bytes, &[]);
                    }
                    teardown(&self.inner, self.port, self.conn_id);
                    return Ok(0);
                }
                RxItem::StraySyn(src) => {
                    // Reject the bogus attempt with a FIN aimed at its
                    // source, then keep waiting for real data
                    let reply = StreamHeader {
                        src: conn.local,
                        dst: src,
                        msg_type: MsgType::Fin,
                        seq: conn.seq,
                        ack: conn.ack_number,
                    }
                    .encode();
                    drop(pt);
                    let _ = self.inner.fabric.send_pkt(src.addr, &reply, &[]);
                }
                RxItem::Data(bytes) => {
                    if buf.len() < bytes.len() {
                        let n = buf.len();
                        buf.copy_from_slice(&bytes[..n]);
                        conn.rx.push_front(RxItem::Data(bytes[n..].to_vec()));
                        // The remainder is still consumable: re-signal
                        let ready = conn.data_ready.clone();
                        drop(pt);
                        ready.signal();
                        return Ok(n);
                    }
                    let n = bytes.len();
                    buf[..n].copy_from_slice(&bytes);
                    return Ok(n);
                }
            }
        }
    }

    /// Close the connection.
    ///
    /// Sends a FIN through the blocking retry ladder, then tears down
    /// local state unconditionally; from the caller's perspective close
    /// cannot fail. In-flight sends and receives on this socket fail once
    /// teardown completes.
    pub fn close(&self) {
        {
            let mut pt = self.inner.ports.lock().unwrap();
            match conn_mut(&mut pt, self.port, self.conn_id) {
                Some(conn) => {
                    conn.seq += 1;
                    conn.state = ConnState::FinSent;
                }
                None => return,
            }
        }
        let _ = send_blocking(&self.inner, self.port, self.conn_id, MsgType::Fin, &[]);
        {
            let mut pt = self.inner.ports.lock().unwrap();
            if let Some(conn) = conn_mut(&mut pt, self.port, self.conn_id) {
                conn.state = ConnState::Closed;
            }
        }
        teardown(&self.inner, self.port, self.conn_id);
    }
}

/// Transmit one segment and block until it is acknowledged, retrying with
/// exponential backoff.
///
/// The caller has set up `seq`/state for this segment; the header is
/// built once and retransmitted byte-identical. Each attempt arms an
/// alarm on the ack semaphore for the current timeout, waits, and cancels
/// the alarm on wake so a stale timeout can never fire into a later wait.
/// The ladder runs 100, 200, ... up to and including the ceiling.
fn send_blocking(
    inner: &Arc<StackInner>,
    port: u16,
    conn_id: u64,
    msg_type: MsgType,
    payload: &[u8],
) -> NetResult<usize> {
    let (hdr_bytes, dst, ack_ready) = {
        let mut pt = inner.ports.lock().unwrap();
        let conn = conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
        let remote = conn.remote.ok_or(NetError::SendError)?;
        let hdr = StreamHeader {
            src: conn.local,
            dst: remote,
            msg_type,
            seq: conn.seq,
            ack: conn.ack_number,
        };
        (hdr.encode(), remote, conn.ack_ready.clone())
    };

    let mut timeout = inner.config.rto_ms;
    while timeout <= inner.config.rto_ceil_ms {
        inner.fabric.send_pkt(dst.addr, &hdr_bytes, payload)?;
        let alarm = ack_ready.signal_after(timeout);
        ack_ready.wait();
        inner.handle.cancel_alarm(alarm);

        {
            let mut pt = inner.ports.lock().unwrap();
            let conn = conn_mut(&mut pt, port, conn_id).ok_or(NetError::ConnectionClosed)?;
            if conn.state == ConnState::SynSent && conn.last_rx == Some(MsgType::Fin) {
                // The peer rejected the connection attempt
                return Err(NetError::Busy);
            }
            if conn.incoming_ack == conn.seq {
                return Ok(payload.len());
            }
            if conn.state == ConnState::FinSent && conn.last_rx == Some(MsgType::FinAck) {
                // Close handshake complete; the peer's FIN-ACK carries its
                // pre-FIN ack number, so the match above cannot trigger
                return Ok(payload.len());
            }
        }
        timeout *= 2;
    }
    Err(NetError::PeerUnreachable { acked: 0 })
}

/// Release a connection's port slot, drain its buffers and retire both
/// semaphores. Exactly once per connection; later calls are no-ops thanks
/// to the connection generation.
pub(crate) fn teardown(inner: &Arc<StackInner>, port: u16, conn_id: u64) {
    let removed = {
        let mut pt = inner.ports.lock().unwrap();
        let ours = matches!(
            pt.get(port),
            Some(PortEntry::Stream(conn)) if conn.conn_id == conn_id
        );
        if ours {
            pt.remove(port)
        } else {
            None
        }
    };
    if let Some(PortEntry::Stream(conn)) = removed {
        if !conn.rx.is_empty() {
            kdebug!(
                "discarding {} unconsumed segments on port {}",
                conn.rx.len(),
                port
            );
        }
        if conn.ack_ready.destroy().is_err() {
            kwarn!("ack semaphore on port {} retired with waiters", port);
        }
        if conn.data_ready.destroy().is_err() {
            kwarn!("data semaphore on port {} retired with waiters", port);
        }
    }
}

/// Inbound stream demultiplexer, invoked from the delivery context.
///
/// Records the incoming ack number, then dispatches on message type.
/// Everything here is non-blocking: state updates, queue pushes, semaphore
/// signals and fire-and-forget replies.
pub(crate) fn append(inner: &Arc<StackInner>, hdr: StreamHeader, payload: &[u8]) {
    let mut pt = inner.ports.lock().unwrap();
    let conn = match pt.get_mut(hdr.dst.port) {
        Some(PortEntry::Stream(conn)) => conn,
        _ => {
            kdebug!("stream segment for unbound port {}", hdr.dst.port);
            return;
        }
    };
    conn.incoming_ack = hdr.ack;

    match hdr.msg_type {
        MsgType::Syn => {
            if conn.state == ConnState::Listening {
                conn.remote = Some(hdr.src);
                conn.ack_number = hdr.seq;
                conn.last_rx = Some(MsgType::Syn);
                conn.data_ready.signal();
            } else if conn.remote == Some(hdr.src) {
                // Retransmitted SYN from our own peer: the SYN-ACK retry
                // ladder is already answering it, nothing to do
            } else {
                // Competing connection request: queue it for rejection
                // without touching the recorded peer
                conn.rx.push_back(RxItem::StraySyn(hdr.src));
                conn.data_ready.signal();
            }
        }
        MsgType::SynAck => {
            if conn.state == ConnState::Established {
                // Duplicate SYN-ACK: our bare ACK was lost, resend it
                if let Some((bytes, dst)) = bare_ack(conn) {
                    let _ = inner.fabric.send_pkt(dst.addr, &bytes, &[]);
                }
            } else {
                conn.ack_number = 1;
                conn.last_rx = Some(MsgType::SynAck);
                conn.ack_ready.signal();
            }
        }
        MsgType::Ack => {
            if conn.state == ConnState::Listening {
                return;
            }
            conn.last_rx = Some(MsgType::Ack);
            if conn.incoming_ack == conn.seq && conn.state == ConnState::DataSent {
                // The in-flight segment is delivered
                conn.ack_ready.signal();
            }
            if !payload.is_empty() {
                if hdr.seq > conn.ack_number {
                    conn.rx.push_back(RxItem::Data(payload.to_vec()));
                    conn.ack_number = hdr.seq;
                    conn.data_ready.signal();
                }
                // Acknowledge new and duplicate payloads alike
                if let Some((bytes, dst)) = bare_ack(conn) {
                    let _ = inner.fabric.send_pkt(dst.addr, &bytes, &[]);
                }
            }
        }
        MsgType::Fin => {
            conn.last_rx = Some(MsgType::Fin);
            if conn.state == ConnState::SynSent {
                // Rejection of our connection attempt: fail the SYN wait
                conn.ack_ready.signal();
            } else {
                conn.rx.push_back(RxItem::Fin);
                conn.data_ready.signal();
            }
        }
        MsgType::FinAck => {
            conn.last_rx = Some(MsgType::FinAck);
            if conn.state == ConnState::FinSent {
                conn.ack_ready.signal();
                if let Some((bytes, dst)) = bare_ack(conn) {
                    let _ = inner.fabric.send_pkt(dst.addr, &bytes, &[]);
                }
            }
        }
    }
}
