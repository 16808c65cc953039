//! The TCP engine: RFC 793 state machine plus Reno congestion control,
//! delayed ack, SACK, and retransmission (spec §4.5).

use std::collections::BTreeMap;
use std::net::SocketAddrV4;
use std::time::Duration;

use bytes::Bytes;

use crate::error::SocketError;
use crate::packet::SeqNum;
use crate::time::SimTime;

/// Maximum stream payload per packet (spec §4.5).
pub const MSS: usize = crate::packet::TCP_MAX_SEGMENT_LEN;

/// Default initial congestion/advertised window, in packets
/// (`--tcp-windows`, spec §6.2, default 10).
pub const DEFAULT_INITIAL_WINDOW_PACKETS: u32 = 10;

pub const DELAYED_ACK_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closing,
    TimeWait,
}

/// Reno congestion-control sub-state (spec §4.5), a tagged union per
/// Design Notes §9 rather than a function-pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenoState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

#[derive(Debug, Clone)]
pub struct CongestionControl {
    pub state: RenoState,
    /// In MSS-sized packets, matching the packet-count bookkeeping spec
    /// §4.5 describes ("each new ack increases cwnd by n").
    pub cwnd: u32,
    pub ssthresh: u32,
    cong_avoid_nacked: u32,
    dup_ack_count: u32,
}

impl CongestionControl {
    pub fn new(initial_window: u32) -> Self {
        Self {
            state: RenoState::SlowStart,
            cwnd: initial_window.max(1),
            ssthresh: u32::MAX,
            cong_avoid_nacked: 0,
            dup_ack_count: 0,
        }
    }

    /// A new (non-duplicate) ack covering `n` previously unacknowledged
    /// packets arrived.
    pub fn on_new_ack(&mut self, n: u32) {
        self.dup_ack_count = 0;
        if n == 0 {
            return;
        }
        match self.state {
            RenoState::SlowStart => {
                self.cwnd += n;
                if self.cwnd >= self.ssthresh {
                    self.state = RenoState::CongestionAvoidance;
                }
            }
            RenoState::CongestionAvoidance => {
                self.cong_avoid_nacked += n;
                while self.cong_avoid_nacked >= self.cwnd {
                    self.cong_avoid_nacked -= self.cwnd;
                    self.cwnd += 1;
                }
            }
            RenoState::FastRecovery => {
                // First new ack after fast recovery deflates to ssthresh
                // and returns to congestion avoidance with the leftover.
                self.cwnd = self.ssthresh.max(1);
                self.state = RenoState::CongestionAvoidance;
                self.cong_avoid_nacked = 0;
            }
        }
        self.cwnd = self.cwnd.max(1);
    }

    /// A duplicate ack arrived (no new data acknowledged).
    pub fn on_duplicate_ack(&mut self) {
        match self.state {
            RenoState::FastRecovery => {
                self.cwnd += 1;
            }
            _ => {
                self.dup_ack_count += 1;
                if self.dup_ack_count == 3 {
                    self.ssthresh = (self.cwnd / 2 + 1).max(1);
                    self.cwnd = self.ssthresh + 3;
                    self.state = RenoState::FastRecovery;
                }
            }
        }
    }

    /// A retransmission timeout fired.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2 + 1).max(1);
        self.cwnd = DEFAULT_INITIAL_WINDOW_PACKETS;
        self.state = RenoState::SlowStart;
        self.dup_ack_count = 0;
        self.cong_avoid_nacked = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetransmitKey {
    pub seq: SeqNum,
}

#[derive(Debug, Clone)]
pub struct RetransmitEntry {
    pub payload: Bytes,
    pub sent_at: SimTime,
    pub retransmitted: bool,
}

/// A contiguous hole's edges, carried on the next outgoing ack so the
/// sender can skip re-sending already-acknowledged data (spec §4.5 SACK).
pub type SackEdge = (SeqNum, SeqNum);

pub struct TcpConnection {
    pub local: SocketAddrV4,
    pub remote: Option<SocketAddrV4>,
    pub state: State,

    pub iss: SeqNum,
    pub snd_una: SeqNum,
    pub snd_nxt: SeqNum,
    pub snd_wnd: u32,
    pub snd_wl1: SeqNum,
    pub snd_wl2: SeqNum,
    pub snd_end: SeqNum,

    pub rcv_irs: SeqNum,
    pub rcv_nxt: SeqNum,
    pub rcv_wnd: u32,
    pub rcv_end: SeqNum,

    pub congestion: CongestionControl,
    pub retransmit_queue: BTreeMap<SeqNum, RetransmitEntry>,
    pub selective_acks: Vec<SackEdge>,
    delayed_ack_pending: bool,
    /// Generation of the delayed-ack timer currently armed for this
    /// connection, or `None` if there is nothing withheld right now. A
    /// fired timer compares its own generation against this before sending
    /// a pure ack, so a timer that lost a race against a piggyback flush
    /// (spec §9: "an outgoing data packet always flushes any pending
    /// delayed ack") is a no-op instead of double-acking.
    delayed_ack_timer: Option<u64>,
    delayed_ack_generation: u64,

    /// In-order bytes delivered to the application but not yet read.
    recv_buffer: std::collections::VecDeque<u8>,
}

impl TcpConnection {
    pub fn new_closed(local: SocketAddrV4, initial_window_packets: u32) -> Self {
        Self {
            local,
            remote: None,
            state: State::Closed,
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: initial_window_packets * MSS as u32,
            snd_wl1: 0,
            snd_wl2: 0,
            snd_end: 0,
            rcv_irs: 0,
            rcv_nxt: 0,
            rcv_wnd: initial_window_packets * MSS as u32,
            rcv_end: 0,
            congestion: CongestionControl::new(initial_window_packets),
            retransmit_queue: BTreeMap::new(),
            selective_acks: Vec::new(),
            delayed_ack_pending: false,
            delayed_ack_timer: None,
            delayed_ack_generation: 0,
            recv_buffer: std::collections::VecDeque::new(),
        }
    }

    /// Withhold an ack for data just received (spec §4.5: "an ack may be
    /// withheld up to 10ms to piggyback on outgoing data"). Returns the
    /// generation the caller should arm a `now + DELAYED_ACK_TIMEOUT` timer
    /// under.
    pub fn arm_delayed_ack(&mut self) -> u64 {
        self.delayed_ack_pending = true;
        self.delayed_ack_generation = self.delayed_ack_generation.wrapping_add(1);
        self.delayed_ack_timer = Some(self.delayed_ack_generation);
        self.delayed_ack_generation
    }

    /// Cancel whatever delayed ack is outstanding, because it is about to
    /// be sent (either piggybacked on outgoing data or as the timer's own
    /// pure ack). Returns whether one was actually pending.
    pub fn flush_delayed_ack(&mut self) -> bool {
        let was_pending = self.delayed_ack_pending;
        self.delayed_ack_pending = false;
        self.delayed_ack_timer = None;
        was_pending
    }

    /// Whether `generation` is still the currently-armed delayed-ack timer,
    /// i.e. nothing has flushed it since it was armed.
    pub fn is_delayed_ack_timer_current(&self, generation: u64) -> bool {
        self.delayed_ack_timer == Some(generation)
    }

    /// Append in-order data to the application-visible receive buffer.
    /// Out-of-order segments are never appended here; the caller is
    /// responsible for holding them until they become contiguous with
    /// `rcv_nxt` (spec `RCV_TCP_ENQUEUE_UNORDERED`).
    pub fn push_received(&mut self, data: &[u8]) {
        self.recv_buffer.extend(data);
        self.rcv_nxt = self.rcv_nxt.wrapping_add(data.len() as u32);
    }

    pub fn read_received(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.recv_buffer.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.recv_buffer.pop_front().unwrap();
        }
        n
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.recv_buffer.is_empty()
    }

    pub fn listen(&mut self) {
        self.state = State::Listen;
    }

    /// Active open: seal the SYN and move to `SYN-SENT`.
    pub fn connect(&mut self, remote: SocketAddrV4) {
        self.remote = Some(remote);
        self.iss = 0;
        self.snd_una = self.iss;
        self.snd_nxt = self.iss.wrapping_add(1);
        self.state = State::SynSent;
    }

    /// Passive side received a SYN.
    pub fn on_syn(&mut self, remote: SocketAddrV4, peer_seq: SeqNum) -> Result<(), SocketError> {
        if self.state != State::Listen {
            return Err(SocketError::ConnRefused);
        }
        self.remote = Some(remote);
        self.rcv_irs = peer_seq;
        self.rcv_nxt = peer_seq.wrapping_add(1);
        self.iss = 0;
        self.snd_una = self.iss;
        self.snd_nxt = self.iss.wrapping_add(1);
        self.state = State::SynRcvd;
        Ok(())
    }

    /// Active side received `SYN,ACK`.
    pub fn on_syn_ack(&mut self, peer_seq: SeqNum, peer_ack: SeqNum) -> Result<(), SocketError> {
        if self.state != State::SynSent {
            return Err(SocketError::ConnRefused);
        }
        if peer_ack != self.snd_nxt {
            return Err(SocketError::ConnReset);
        }
        self.rcv_irs = peer_seq;
        self.rcv_nxt = peer_seq.wrapping_add(1);
        self.snd_una = peer_ack;
        self.state = State::Established;
        Ok(())
    }

    /// Passive side's SYN got acked; handshake completes.
    pub fn on_final_handshake_ack(&mut self, peer_ack: SeqNum) {
        if self.state == State::SynRcvd && peer_ack == self.snd_nxt {
            self.snd_una = peer_ack;
            self.state = State::Established;
        }
    }

    pub fn on_rst(&mut self) {
        self.state = State::Closed;
        self.retransmit_queue.clear();
    }

    /// Enqueue `payload` for sending, assigning it the next sequence
    /// range. Returns the assigned starting sequence number.
    pub fn enqueue_send(&mut self, payload: Bytes, now: SimTime) -> SeqNum {
        let seq = self.snd_nxt;
        let len = payload.len() as u32;
        self.retransmit_queue.insert(
            seq,
            RetransmitEntry {
                payload,
                sent_at: now,
                retransmitted: false,
            },
        );
        self.snd_nxt = self.snd_nxt.wrapping_add(len.max(1));
        self.snd_end = self.snd_nxt;
        seq
    }

    /// Usable send window in bytes: the minimum of the advertised window
    /// and the congestion window (spec §4.5).
    pub fn effective_send_window(&self) -> u32 {
        let cwnd_bytes = self.congestion.cwnd.saturating_mul(MSS as u32);
        self.snd_wnd.min(cwnd_bytes)
    }

    /// Process an incoming ack. `acked_packets` is the number of
    /// full-MSS-equivalent packets newly acknowledged, computed by the
    /// caller from the byte range `snd_una..new_una`.
    pub fn on_ack(&mut self, peer_ack: SeqNum, window: u32, acked_packets: u32) {
        let advanced = peer_ack != self.snd_una;
        if advanced {
            // drop entries fully covered by the new cumulative ack
            self.retransmit_queue
                .retain(|&seq, _| !is_seq_lt(seq, peer_ack));
            self.snd_una = peer_ack;
            self.snd_wnd = window;
            self.congestion.on_new_ack(acked_packets);
        } else {
            self.snd_wnd = window;
            self.congestion.on_duplicate_ack();
        }
    }

    pub fn on_retransmit_timeout(&mut self) {
        self.congestion.on_timeout();
        for entry in self.retransmit_queue.values_mut() {
            entry.retransmitted = true;
        }
    }

    pub fn close(&mut self) {
        self.state = match self.state {
            State::Established => State::FinWait1,
            State::CloseWait => State::LastAck,
            other => other,
        };
    }

    pub fn on_fin(&mut self) {
        self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
        self.state = match self.state {
            State::Established => State::CloseWait,
            State::FinWait1 => State::Closing,
            State::FinWait2 => State::TimeWait,
            other => other,
        };
    }

    pub fn on_fin_ack(&mut self) {
        self.state = match self.state {
            State::FinWait1 => State::FinWait2,
            State::Closing => State::TimeWait,
            State::LastAck => State::Closed,
            other => other,
        };
    }
}

/// Strict sequence ordering with wraparound, matching TCP's modular
/// comparison (spec: "sequence numbers strictly ordered").
fn is_seq_lt(a: SeqNum, b: SeqNum) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}
