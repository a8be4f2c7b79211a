//! Network addresses and endpoints

use core::fmt;

/// 8-byte network address, big-endian on the wire
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NetAddr(u64);

impl NetAddr {
    pub const fn new(raw: u64) -> Self {
        NetAddr(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        NetAddr(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for NetAddr {
    fn from(raw: u64) -> Self {
        NetAddr(raw)
    }
}

impl fmt::Debug for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetAddr({})", self.0)
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side of a conversation: address plus 16-bit port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: NetAddr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: NetAddr, port: u16) -> Self {
        Endpoint { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_byte_roundtrip() {
        let a = NetAddr::new(0x0102_0304_0506_0708);
        assert_eq!(a.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(NetAddr::from_bytes(a.to_bytes()), a);
    }

    #[test]
    fn test_endpoint_display() {
        let e = Endpoint::new(NetAddr::new(7), 1500);
        assert_eq!(format!("{}", e), "7:1500");
    }
}
