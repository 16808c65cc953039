//! The packet model (spec §3 `Packet`, §4.4 delivery-status trace).
//!
//! A packet is created empty and sealed exactly once via [`Packet::set_local`],
//! [`Packet::set_udp`], or [`Packet::set_tcp`]; the payload is allocated once
//! at construction and never resized afterwards. `Bytes` gives the
//! ref-counted, clone-is-cheap, immutable-after-freeze semantics the spec
//! asks for directly, so the packet can be shared between the sending
//! interface queue, the in-flight event, and the receiving socket buffer
//! without a deep copy.

use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

pub type SeqNum = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub const NONE: Self = Self {
        syn: false,
        ack: false,
        fin: false,
        rst: false,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: SeqNum,
    pub ack: SeqNum,
    pub window: u32,
    pub flags: TcpFlags,
    /// Selective-ack edge list carried on this segment, at most a handful
    /// of entries in practice (spec §4.5 SACK).
    pub sack_edges_len: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct UdpHeader {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
}

#[derive(Debug, Clone, Copy)]
pub struct LocalHeader {
    pub pipe_id: u64,
}

/// Protocol tag + header, a tagged union per Design Notes §9 rather than a
/// function-pointer table.
#[derive(Debug, Clone, Copy)]
pub enum Header {
    Local(LocalHeader),
    Udp(UdpHeader),
    Tcp(TcpHeader),
}

/// Ordered, append-only delivery-status trace (spec §4.4, testable
/// property 5: "once a status is appended, it is never removed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeliveryStatus {
    SndCreated,
    SndTcpEnqueueThrottled,
    SndTcpEnqueueRetransmit,
    SndSocketBuffered,
    SndInterfaceSent,
    InetSent,
    InetDropped,
    RcvInterfaceBuffered,
    RcvInterfaceReceived,
    RcvInterfaceDropped,
    RcvSocketProcessed,
    RcvSocketBuffered,
    RcvSocketDelivered,
    RcvSocketDropped,
    RcvTcpEnqueueUnordered,
    SndTcpDequeueRetransmit,
    SndTcpRetransmitted,
    Destroyed,
}

impl DeliveryStatus {
    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

static NEXT_PACKET_ID: AtomicU64 = AtomicU64::new(1);

/// Priority used by the sending application to order packets on a shared
/// interface queue (higher is sent first).
pub type Priority = i32;

pub struct Packet {
    id: u64,
    header: Option<Header>,
    payload: Bytes,
    priority: Priority,
    trace: Vec<DeliveryStatus>,
    all_statuses: u32,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("id", &self.id)
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .field("priority", &self.priority)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Packet {
    /// Create an unsealed packet. The payload buffer is allocated exactly
    /// once here and never resized afterwards.
    pub fn new(payload: Bytes, priority: Priority) -> Self {
        let mut packet = Self {
            id: NEXT_PACKET_ID.fetch_add(1, Ordering::Relaxed),
            header: None,
            payload,
            priority,
            trace: Vec::with_capacity(4),
            all_statuses: 0,
        };
        packet.append_status(DeliveryStatus::SndCreated);
        packet
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.header.is_some()
    }

    fn seal(&mut self, header: Header) {
        assert!(self.header.is_none(), "packet header assigned twice");
        self.header = Some(header);
    }

    pub fn set_local(&mut self, header: LocalHeader) {
        self.seal(Header::Local(header));
    }

    pub fn set_udp(&mut self, header: UdpHeader) {
        self.seal(Header::Udp(header));
    }

    pub fn set_tcp(&mut self, header: TcpHeader) {
        self.seal(Header::Tcp(header));
    }

    pub fn append_status(&mut self, status: DeliveryStatus) {
        self.trace.push(status);
        self.all_statuses |= status.bit();
    }

    pub fn has_status(&self, status: DeliveryStatus) -> bool {
        self.all_statuses & status.bit() != 0
    }

    pub fn trace(&self) -> &[DeliveryStatus] {
        &self.trace
    }

    pub fn mtu_len(&self) -> usize {
        self.payload.len()
    }
}

/// Maximum stream payload per TCP packet (spec §4.5).
pub const TCP_MAX_SEGMENT_LEN: usize = 65_535;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_is_append_only_and_union_matches_bitset() {
        let mut p = Packet::new(Bytes::from_static(b"hi"), 0);
        p.append_status(DeliveryStatus::SndSocketBuffered);
        p.append_status(DeliveryStatus::SndInterfaceSent);
        assert_eq!(
            p.trace(),
            &[
                DeliveryStatus::SndCreated,
                DeliveryStatus::SndSocketBuffered,
                DeliveryStatus::SndInterfaceSent,
            ]
        );
        assert!(p.has_status(DeliveryStatus::SndCreated));
        assert!(p.has_status(DeliveryStatus::SndInterfaceSent));
        assert!(!p.has_status(DeliveryStatus::InetDropped));
    }

    #[test]
    #[should_panic(expected = "assigned twice")]
    fn header_can_only_be_sealed_once() {
        let mut p = Packet::new(Bytes::new(), 0);
        p.set_local(LocalHeader { pipe_id: 1 });
        p.set_local(LocalHeader { pipe_id: 2 });
    }

    #[test]
    fn clone_is_cheap_ref_count_bump() {
        let payload = Bytes::from(vec![7u8; 4096]);
        let clone = payload.clone();
        assert_eq!(payload.as_ptr(), clone.as_ptr());
    }
}
