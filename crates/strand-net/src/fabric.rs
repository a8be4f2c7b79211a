//! In-process packet fabric
//!
//! The unreliable network the transport runs over: hosts attach an inbox
//! keyed by address, senders enqueue frames, a per-host delivery thread
//! hands them to the owning stack's dispatch. Frames may be dropped by the
//! configured loss policy (and are silently discarded for unknown
//! destinations) but are never reordered, duplicated or corrupted by the
//! fabric itself.
//!
//! The producer side (any runtime thread, often while holding its stack's
//! port lock) pushes onto a lock-free queue, so enqueueing never waits on
//! the consumer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_queue::SegQueue;

use strand_core::constants::MAX_PACKET_SIZE;
use strand_runtime::Parker;

use crate::addr::NetAddr;
use crate::error::{NetError, NetResult};

/// Frame-drop policy applied at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossPolicy {
    /// Deliver everything
    None,
    /// Drop every nth frame (counted across the whole fabric)
    EveryNth(u32),
}

/// One host's inbox: frame queue plus the delivery thread's parker
#[derive(Clone)]
pub(crate) struct Mailbox {
    pub(crate) queue: Arc<SegQueue<Vec<u8>>>,
    pub(crate) parker: Arc<Parker>,
}

struct LossState {
    policy: LossPolicy,
    counter: u64,
    dropped: u64,
}

struct FabricInner {
    hosts: Mutex<HashMap<NetAddr, Mailbox>>,
    loss: Mutex<LossState>,
}

/// Handle to a shared packet fabric
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Fabric {
    pub fn new() -> Fabric {
        Self::with_loss(LossPolicy::None)
    }

    pub fn with_loss(policy: LossPolicy) -> Fabric {
        Fabric {
            inner: Arc::new(FabricInner {
                hosts: Mutex::new(HashMap::new()),
                loss: Mutex::new(LossState {
                    policy,
                    counter: 0,
                    dropped: 0,
                }),
            }),
        }
    }

    /// Change the loss policy; the every-nth counter keeps running
    pub fn set_loss(&self, policy: LossPolicy) {
        self.inner.loss.lock().unwrap().policy = policy;
    }

    /// Frames dropped by the loss policy so far
    pub fn dropped(&self) -> u64 {
        self.inner.loss.lock().unwrap().dropped
    }

    /// Attach an inbox for `addr`
    pub(crate) fn bind(&self, addr: NetAddr) -> NetResult<Mailbox> {
        let mut hosts = self.inner.hosts.lock().unwrap();
        if hosts.contains_key(&addr) {
            return Err(NetError::AddrInUse);
        }
        let mailbox = Mailbox {
            queue: Arc::new(SegQueue::new()),
            parker: Arc::new(Parker::new()),
        };
        hosts.insert(addr, mailbox.clone());
        Ok(mailbox)
    }

    /// Detach the inbox for `addr`; in-flight frames to it vanish
    pub(crate) fn unbind(&self, addr: NetAddr) {
        self.inner.hosts.lock().unwrap().remove(&addr);
    }

    /// Send one packet into the fabric.
    ///
    /// Returns the number of bytes handed to the network. A dropped frame
    /// or an unknown destination still counts as sent; that is what makes
    /// this network unreliable.
    pub fn send_pkt(&self, dst: NetAddr, header: &[u8], payload: &[u8]) -> NetResult<usize> {
        let total = header.len() + payload.len();
        if total > MAX_PACKET_SIZE {
            return Err(NetError::InvalidParams);
        }

        {
            let mut loss = self.inner.loss.lock().unwrap();
            loss.counter += 1;
            if let LossPolicy::EveryNth(n) = loss.policy {
                if n > 0 && loss.counter % n as u64 == 0 {
                    loss.dropped += 1;
                    return Ok(total);
                }
            }
        }

        let mailbox = {
            let hosts = self.inner.hosts.lock().unwrap();
            hosts.get(&dst).cloned()
        };
        if let Some(mailbox) = mailbox {
            let mut frame = Vec::with_capacity(total);
            frame.extend_from_slice(header);
            frame.extend_from_slice(payload);
            mailbox.queue.push(frame);
            mailbox.parker.unpark();
        }
        Ok(total)
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_rejects_duplicate_addr() {
        let fabric = Fabric::new();
        fabric.bind(NetAddr::new(1)).unwrap();
        assert!(matches!(
            fabric.bind(NetAddr::new(1)),
            Err(NetError::AddrInUse)
        ));
    }

    #[test]
    fn test_send_enqueues_header_and_payload() {
        let fabric = Fabric::new();
        let mailbox = fabric.bind(NetAddr::new(1)).unwrap();
        let n = fabric.send_pkt(NetAddr::new(1), b"hdr", b"payload").unwrap();
        assert_eq!(n, 10);
        assert_eq!(mailbox.queue.pop().unwrap().as_slice(), b"hdrpayload");
    }

    #[test]
    fn test_send_to_unknown_host_vanishes() {
        let fabric = Fabric::new();
        assert_eq!(fabric.send_pkt(NetAddr::new(9), b"x", b"y").unwrap(), 2);
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let fabric = Fabric::new();
        let big = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            fabric.send_pkt(NetAddr::new(1), &big, b""),
            Err(NetError::InvalidParams)
        ));
    }

    #[test]
    fn test_every_nth_drops() {
        let fabric = Fabric::with_loss(LossPolicy::EveryNth(3));
        let mailbox = fabric.bind(NetAddr::new(1)).unwrap();
        for _ in 0..9 {
            fabric.send_pkt(NetAddr::new(1), b"h", b"").unwrap();
        }
        assert_eq!(fabric.dropped(), 3);
        let mut delivered = 0;
        while mailbox.queue.pop().is_some() {
            delivered += 1;
        }
        assert_eq!(delivered, 6);
    }

    #[test]
    fn test_unbound_host_stops_receiving() {
        let fabric = Fabric::new();
        let mailbox = fabric.bind(NetAddr::new(1)).unwrap();
        fabric.unbind(NetAddr::new(1));
        fabric.send_pkt(NetAddr::new(1), b"h", b"").unwrap();
        assert!(mailbox.queue.pop().is_none());
    }
}
