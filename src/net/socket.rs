//! The socket wrapper (spec §3 `Socket`) unifying TCP, UDP, and local
//! pipes behind one readiness view for the epoll engine.

use std::net::SocketAddrV4;

use bytes::Bytes;

use super::local::LocalEnd;
use super::tcp::TcpConnection;
use super::udp::UdpEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Dgram,
}

pub enum SocketKind {
    Tcp(TcpConnection),
    Udp(UdpEndpoint),
    Local(LocalEnd),
}

/// A socket's local port must be unique per `(protocol, interface)`
/// (spec §3 invariant). The listener registry in [`crate::host::Host`]
/// enforces this at `insert_socket` time; this type only carries the
/// already-validated identity.
pub struct Socket {
    pub kind: SocketKind,
    pub local: Option<SocketAddrV4>,
    pub remote: Option<SocketAddrV4>,
    /// Epoll sets watching this socket, referenced by id only — the
    /// socket never owns the epoll set itself (Design Notes §9: "a socket
    /// must not own its epoll-listener handle").
    pub watchers: Vec<u32>,
}

impl Socket {
    pub fn new_dgram() -> Self {
        Self {
            kind: SocketKind::Udp(UdpEndpoint::new("0.0.0.0:0".parse().unwrap())),
            local: None,
            remote: None,
            watchers: Vec::new(),
        }
    }

    pub fn new_stream(local: SocketAddrV4, initial_window_packets: u32) -> Self {
        Self {
            kind: SocketKind::Tcp(TcpConnection::new_closed(local, initial_window_packets)),
            local: Some(local),
            remote: None,
            watchers: Vec::new(),
        }
    }

    pub fn new_local_pair(capacity: usize) -> (Self, Self) {
        let (end_a, end_b) = LocalEnd::new_pair(capacity);
        let wrap = |end| Self {
            kind: SocketKind::Local(end),
            local: None,
            remote: None,
            watchers: Vec::new(),
        };
        (wrap(end_a), wrap(end_b))
    }

    pub fn socket_type(&self) -> SocketType {
        match self.kind {
            SocketKind::Tcp(_) => SocketType::Stream,
            SocketKind::Udp(_) | SocketKind::Local(_) => SocketType::Dgram,
        }
    }

    pub fn is_readable(&self) -> bool {
        match &self.kind {
            SocketKind::Tcp(tcp) => tcp.has_buffered_data()
                || tcp.state == super::tcp::State::CloseWait,
            SocketKind::Udp(udp) => udp.is_readable(),
            SocketKind::Local(end) => end.is_readable(),
        }
    }

    pub fn is_writable(&self) -> bool {
        match &self.kind {
            SocketKind::Tcp(tcp) => tcp.effective_send_window() > 0,
            SocketKind::Udp(_) => true,
            SocketKind::Local(end) => end.is_writable(),
        }
    }

    pub fn payload_len_hint(&self, payload: &Bytes) -> usize {
        payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dgram_socket_is_always_writable() {
        let socket = Socket::new_dgram();
        assert!(socket.is_writable());
    }
}
