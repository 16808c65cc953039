//! UDP: unreliable, unordered datagrams (spec §4.6). The link-reliability
//! draw is applied by the routing path (spec §4.4); a dropped datagram
//! simply never reaches this queue.

use std::collections::VecDeque;
use std::net::SocketAddrV4;

use bytes::Bytes;

const MAX_QUEUE_LEN: usize = 4096;

pub struct UdpEndpoint {
    pub local: SocketAddrV4,
    recv_queue: VecDeque<(SocketAddrV4, Bytes)>,
}

impl UdpEndpoint {
    pub fn new(local: SocketAddrV4) -> Self {
        Self {
            local,
            recv_queue: VecDeque::new(),
        }
    }

    /// Deliver an inbound datagram. Drops silently once the receive queue
    /// is full, matching the "drops simply vanish" semantics of unreliable
    /// delivery.
    pub fn deliver(&mut self, from: SocketAddrV4, payload: Bytes) {
        if self.recv_queue.len() >= MAX_QUEUE_LEN {
            return;
        }
        self.recv_queue.push_back((from, payload));
    }

    pub fn recv(&mut self) -> Option<(SocketAddrV4, Bytes)> {
        self.recv_queue.pop_front()
    }

    pub fn is_readable(&self) -> bool {
        !self.recv_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_delivery_order() {
        let mut ep = UdpEndpoint::new("10.0.0.1:9".parse().unwrap());
        let peer: SocketAddrV4 = "10.0.0.2:9".parse().unwrap();
        ep.deliver(peer, Bytes::from_static(b"a"));
        ep.deliver(peer, Bytes::from_static(b"b"));
        assert_eq!(ep.recv().unwrap().1, Bytes::from_static(b"a"));
        assert_eq!(ep.recv().unwrap().1, Bytes::from_static(b"b"));
        assert!(ep.recv().is_none());
    }

    #[test]
    fn readiness_tracks_queue_occupancy() {
        let mut ep = UdpEndpoint::new("10.0.0.1:9".parse().unwrap());
        assert!(!ep.is_readable());
        ep.deliver("10.0.0.2:9".parse().unwrap(), Bytes::from_static(b"x"));
        assert!(ep.is_readable());
        ep.recv();
        assert!(!ep.is_readable());
    }
}
