//! Error types for the transport layer

use core::fmt;

use crate::wire::WireError;

/// Result type for transport operations
pub type NetResult<T> = Result<T, NetError>;

/// Errors surfaced by the fabric, datagram and stream layers
///
/// Packet loss never appears here directly: individual losses are masked
/// by retransmission and only the exhausted backoff ladder surfaces, as
/// [`NetError::PeerUnreachable`] carrying the bytes that were acknowledged
/// before the stall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Null-ish or out-of-range argument
    InvalidParams,

    /// Well-known port already owned by another listener
    PortInUse,

    /// Ephemeral port pool exhausted
    NoPortsAvailable,

    /// Local address already attached to the fabric
    AddrInUse,

    /// Retransmission ladder exhausted without an acknowledgment
    PeerUnreachable {
        /// Bytes acknowledged by the peer before the call gave up
        acked: usize,
    },

    /// Connection attempt raced a rejection (half-open peer)
    Busy,

    /// Socket handle refers to a torn-down connection
    ConnectionClosed,

    /// Send on a socket that is closing or closed
    SendError,

    /// Receive on a socket that is closing or closed
    ReceiveError,

    /// Frame failed to parse
    Malformed(WireError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::InvalidParams => write!(f, "invalid parameters"),
            NetError::PortInUse => write!(f, "port already in use"),
            NetError::NoPortsAvailable => write!(f, "no ephemeral ports available"),
            NetError::AddrInUse => write!(f, "address already attached"),
            NetError::PeerUnreachable { acked } => {
                write!(f, "peer unreachable ({} bytes acknowledged)", acked)
            }
            NetError::Busy => write!(f, "connection busy or rejected"),
            NetError::ConnectionClosed => write!(f, "connection closed"),
            NetError::SendError => write!(f, "send on closing socket"),
            NetError::ReceiveError => write!(f, "receive on closing socket"),
            NetError::Malformed(e) => write!(f, "malformed frame: {}", e),
        }
    }
}

impl std::error::Error for NetError {}

impl From<WireError> for NetError {
    fn from(e: WireError) -> Self {
        NetError::Malformed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", NetError::PeerUnreachable { acked: 128 }),
            "peer unreachable (128 bytes acknowledged)"
        );
        assert_eq!(format!("{}", NetError::Busy), "connection busy or rejected");
    }

    #[test]
    fn test_wire_error_conversion() {
        let e: NetError = WireError::TooShort.into();
        assert_eq!(e, NetError::Malformed(WireError::TooShort));
    }
}
