//! The simulated host (spec §3 `Host`). A host exclusively owns its
//! sockets, epoll sets, CPU account, and randomness (spec §5).

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::context::SimContext;
use crate::cpu::CpuAccount;
use crate::epoll::{EpollSet, NixPoller, OsPoller};
use crate::error::SocketError;
use crate::event::{Event, EventIdAllocator, Task};
use crate::net::socket::{Socket, SocketId, SocketKind, SocketType};
use crate::net::tcp::{State, MSS};
use crate::packet::{DeliveryStatus, Header, Packet, SeqNum, TcpFlags, TcpHeader};
use crate::pcap::PcapWriter;
use crate::process::{Process, ProcessId};
use crate::scheduler::Scheduler;
use crate::time::SimTime;

/// Retransmission timeout (spec §4.5 leaves the exact value as an Open
/// Question; resolved in DESIGN.md as a fixed 200ms RTO).
const RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub u32);

/// Bandwidth in bytes/second, mirroring the config's KiB/s input already
/// converted to a byte rate.
#[derive(Debug, Clone, Copy)]
pub struct Bandwidth {
    pub up_bps: u64,
    pub down_bps: u64,
}

pub struct Host {
    pub id: HostId,
    pub dns_name: String,
    pub ip: Ipv4Addr,
    pub bandwidth: Bandwidth,
    pub cpu: CpuAccount,
    /// `--tcp-windows` (spec §6.2): initial window new TCP sockets on this
    /// host are created with.
    pub initial_tcp_window_packets: u32,

    rng: StdRng,
    next_event_id: EventIdAllocator,

    sockets: FxHashMap<SocketId, Socket>,
    next_socket_id: u32,
    epolls: FxHashMap<u32, EpollSet>,
    next_epoll_id: u32,
    next_ephemeral_port: u16,
    /// Backs the pass-through half of the epoll engine (spec §4.7); a real
    /// OS poller, swapped out in tests that never register a pass-through
    /// fd and so never touch it.
    os_poller: Box<dyn OsPoller>,

    processes: Vec<Process>,

    /// `<node logpcap>` (spec §6.5): set once at boot by
    /// [`crate::master::Master`] when the node requests a capture file.
    pcap: Option<PcapWriter<std::fs::File>>,
}

impl Host {
    pub fn new(
        id: HostId,
        dns_name: String,
        ip: Ipv4Addr,
        bandwidth: Bandwidth,
        cpu: CpuAccount,
        rng_seed: u64,
    ) -> Self {
        Self::with_tcp_window(id, dns_name, ip, bandwidth, cpu, rng_seed, crate::net::tcp::DEFAULT_INITIAL_WINDOW_PACKETS)
    }

    /// As [`Host::new`], but with an explicit default initial TCP window
    /// (spec §6.2 `--tcp-windows`) instead of the protocol default.
    pub fn with_tcp_window(
        id: HostId,
        dns_name: String,
        ip: Ipv4Addr,
        bandwidth: Bandwidth,
        cpu: CpuAccount,
        rng_seed: u64,
        initial_tcp_window_packets: u32,
    ) -> Self {
        Self {
            id,
            dns_name,
            ip,
            bandwidth,
            cpu,
            initial_tcp_window_packets,
            rng: StdRng::seed_from_u64(rng_seed),
            next_event_id: EventIdAllocator::default(),
            sockets: FxHashMap::default(),
            next_socket_id: 1,
            epolls: FxHashMap::default(),
            next_epoll_id: 1,
            next_ephemeral_port: 49_152,
            os_poller: Box::new(NixPoller),
            processes: Vec::new(),
            pcap: None,
        }
    }

    /// `<node logpcap>` (spec §6.5): arms a per-host capture file. Once
    /// set, every packet this host's interface receives is appended to it.
    pub fn enable_pcap(&mut self, writer: PcapWriter<std::fs::File>) {
        self.pcap = Some(writer);
    }

    fn capture(&mut self, now: SimTime, payload: &Bytes) {
        let Some(writer) = self.pcap.as_mut() else { return };
        let tv = now.to_timeval();
        if let Err(err) = writer.write_packet(tv.seconds as u32, tv.microseconds as u32, payload) {
            tracing::warn!(host = self.id.0, %err, "pcap write failed");
        }
    }

    /// Hand out the next unused ephemeral port, wrapping back into the
    /// dynamic range (`RFC 6335`) if it is ever exhausted within one run.
    pub(crate) fn alloc_ephemeral_port(&mut self) -> u16 {
        let port = self.next_ephemeral_port;
        self.next_ephemeral_port = if self.next_ephemeral_port == u16::MAX {
            49_152
        } else {
            self.next_ephemeral_port + 1
        };
        port
    }

    /// Draw the next deterministic uniform sample from this host's RNG,
    /// used by the reliability draw in spec §4.4 step 2 and by any
    /// application-visible randomness syscall.
    pub fn next_uniform(&mut self) -> f64 {
        use rand::Rng;
        self.rng.gen_range(0.0..1.0)
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_event_id.next()
    }

    pub fn insert_socket(&mut self, socket: Socket) -> SocketId {
        let id = SocketId(self.next_socket_id);
        self.next_socket_id += 1;
        self.sockets.insert(id, socket);
        id
    }

    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(&id)
    }

    pub fn socket_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        self.sockets.get_mut(&id)
    }

    pub fn remove_socket(&mut self, id: SocketId) -> Option<Socket> {
        self.sockets.remove(&id)
    }

    pub fn sockets_mut(&mut self) -> impl Iterator<Item = (&SocketId, &mut Socket)> {
        self.sockets.iter_mut()
    }

    pub fn create_epoll(&mut self) -> u32 {
        let id = self.next_epoll_id;
        self.next_epoll_id += 1;
        self.epolls.insert(id, EpollSet::new(id));
        id
    }

    pub fn epoll(&self, id: u32) -> Option<&EpollSet> {
        self.epolls.get(&id)
    }

    pub fn epoll_mut(&mut self, id: u32) -> Option<&mut EpollSet> {
        self.epolls.get_mut(&id)
    }

    pub fn destroy_epoll(&mut self, id: u32) -> Option<EpollSet> {
        self.epolls.remove(&id)
    }

    pub fn add_process(&mut self, process: Process) -> ProcessId {
        let id = ProcessId(self.processes.len() as u32);
        self.processes.push(process);
        id
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id.0 as usize)
    }

    pub fn processes_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.processes.iter_mut()
    }

    /// Runs `process_continue` on `pid` and, on plug-in failure, counts it
    /// against the run's plug-in error threshold (spec §7), aborting the
    /// whole simulation once that threshold is reached.
    pub fn run_process(&mut self, scheduler: &Scheduler, ctx: &SimContext, pid: ProcessId) {
        let Some(process) = self.process_mut(pid) else { return };
        if let Err(err) = process.process_continue() {
            tracing::warn!(host = self.id.0, pid = pid.0, %err, "plugin instance activation failed");
            if ctx.plugin_errors.report() {
                scheduler.abort(format!("plugin error threshold reached: {err}"));
            }
        }
    }

    /// `stoptime` (spec §6.1 `<application stoptime>`): tears down every
    /// descriptor the process still holds, same as closing each by hand.
    pub fn stop_process(&mut self, pid: ProcessId) {
        let Some(process) = self.process_mut(pid) else { return };
        for sid in process.close_all_fds() {
            self.remove_socket(sid);
        }
    }

    pub(crate) fn find_socket_by_local(&self, addr: SocketAddrV4, kind: SocketType) -> Option<SocketId> {
        self.sockets
            .iter()
            .find(|(_, s)| s.socket_type() == kind && s.local == Some(addr))
            .map(|(id, _)| *id)
    }

    fn find_socket_established(&self, local: SocketAddrV4, remote: SocketAddrV4) -> Option<SocketId> {
        self.sockets
            .iter()
            .find(|(_, s)| {
                s.socket_type() == SocketType::Stream && s.local == Some(local) && s.remote == Some(remote)
            })
            .map(|(id, _)| *id)
    }

    fn process_owning_epoll(&self, epoll_id: u32) -> Option<ProcessId> {
        self.processes
            .iter()
            .position(|p| p.epoll_sets().contains(&epoll_id))
            .map(|i| ProcessId(i as u32))
    }

    /// Demultiplex an arrived packet into the matching socket, advance its
    /// protocol state, reply in-line where the protocol requires it (a
    /// SYN-ACK, a data ack), and wake any epoll watcher whose readiness
    /// changed as a result (spec §4.4 receive side, §4.7).
    pub fn receive_packet(&mut self, now: SimTime, scheduler: &Scheduler, ctx: &SimContext, mut packet: Packet) {
        packet.append_status(DeliveryStatus::RcvInterfaceReceived);
        self.capture(now, packet.payload());
        let touched = match packet.header().copied() {
            Some(Header::Udp(h)) => {
                let mut touched = Vec::new();
                if let Some(sid) = self.find_socket_by_local(h.dst, SocketType::Dgram) {
                    if let Some(socket) = self.socket_mut(sid) {
                        if let SocketKind::Udp(udp) = &mut socket.kind {
                            udp.deliver(h.src, packet.payload().clone());
                            touched.push(sid);
                        }
                    }
                    packet.append_status(DeliveryStatus::RcvSocketDelivered);
                } else {
                    packet.append_status(DeliveryStatus::RcvSocketDropped);
                }
                touched
            }
            Some(Header::Tcp(h)) => {
                let payload = packet.payload().clone();
                let touched = self.receive_tcp_segment(now, scheduler, ctx, h, payload);
                if touched.is_empty() {
                    packet.append_status(DeliveryStatus::RcvSocketDropped);
                } else {
                    packet.append_status(DeliveryStatus::RcvSocketDelivered);
                }
                touched
            }
            // LOCAL pipes never traverse the network path (spec §4.6); a
            // `Header::Local` packet is never handed to `receive_packet`.
            Some(Header::Local(_)) | None => Vec::new(),
        };
        packet.append_status(DeliveryStatus::Destroyed);
        self.wake_watchers(scheduler, now, &touched);
    }

    fn receive_tcp_segment(
        &mut self,
        now: SimTime,
        scheduler: &Scheduler,
        ctx: &SimContext,
        header: TcpHeader,
        payload: Bytes,
    ) -> Vec<SocketId> {
        let Some(sid) = self
            .find_socket_established(header.dst, header.src)
            .or_else(|| self.find_socket_by_local(header.dst, SocketType::Stream))
        else {
            return Vec::new();
        };

        let mut reply: Option<TcpHeader> = None;
        let mut set_remote: Option<SocketAddrV4> = None;
        let mut arm_delayed_ack: Option<u64> = None;

        if let Some(socket) = self.socket_mut(sid) {
            if let SocketKind::Tcp(conn) = &mut socket.kind {
                if header.flags.rst {
                    conn.on_rst();
                } else if header.flags.syn && !header.flags.ack {
                    if conn.on_syn(header.src, header.seq).is_ok() {
                        set_remote = Some(header.src);
                        reply = Some(TcpHeader {
                            src: header.dst,
                            dst: header.src,
                            seq: conn.iss,
                            ack: conn.rcv_nxt,
                            window: conn.rcv_wnd,
                            flags: TcpFlags {
                                syn: true,
                                ack: true,
                                ..TcpFlags::NONE
                            },
                            sack_edges_len: 0,
                        });
                    }
                } else if header.flags.syn && header.flags.ack {
                    let _ = conn.on_syn_ack(header.seq, header.ack);
                    reply = Some(TcpHeader {
                        src: header.dst,
                        dst: header.src,
                        seq: conn.snd_nxt,
                        ack: conn.rcv_nxt,
                        window: conn.rcv_wnd,
                        flags: TcpFlags {
                            ack: true,
                            ..TcpFlags::NONE
                        },
                        sack_edges_len: 0,
                    });
                } else {
                    if conn.state == State::SynRcvd {
                        conn.on_final_handshake_ack(header.ack);
                    }
                    let delta = (header.ack.wrapping_sub(conn.snd_una) as i32).max(0) as u32;
                    let acked_packets = if delta == 0 {
                        0
                    } else {
                        (delta + MSS as u32 - 1) / MSS as u32
                    };
                    conn.on_ack(header.ack, header.window, acked_packets);
                    let has_data = !payload.is_empty();
                    if has_data {
                        conn.push_received(&payload);
                    }
                    if header.flags.fin {
                        conn.on_fin();
                    }
                    if header.flags.fin {
                        // A FIN must be acked promptly, not withheld; it
                        // also flushes any ack this segment's own data
                        // would otherwise have queued up behind it.
                        conn.flush_delayed_ack();
                        reply = Some(TcpHeader {
                            src: header.dst,
                            dst: header.src,
                            seq: conn.snd_nxt,
                            ack: conn.rcv_nxt,
                            window: conn.rcv_wnd,
                            flags: TcpFlags {
                                ack: true,
                                ..TcpFlags::NONE
                            },
                            sack_edges_len: 0,
                        });
                    } else if has_data {
                        // Withhold the ack up to `DELAYED_ACK_TIMEOUT`
                        // (spec §4.5); it is sent either by the timer below
                        // or piggybacked on the next outgoing data segment
                        // (`Host::tcp_send`'s `flush_delayed_ack`).
                        arm_delayed_ack = Some(conn.arm_delayed_ack());
                    }
                }
            }
            if let Some(addr) = set_remote {
                socket.remote = Some(addr);
            }
        }

        if let Some(reply_header) = reply {
            let mut ack_packet = Packet::new(Bytes::new(), 0);
            ack_packet.set_tcp(reply_header);
            let dst_ip = *reply_header.dst.ip();
            if let Err(err) = crate::net::route::send_packet(&ctx.topology, scheduler, self, dst_ip, ack_packet, now) {
                tracing::error!(host = self.id.0, %err, "failed to send tcp reply");
            }
        }
        if let Some(generation) = arm_delayed_ack {
            self.schedule_delayed_ack_timer(scheduler, sid, generation, now);
        }

        vec![sid]
    }

    fn schedule_delayed_ack_timer(&mut self, scheduler: &Scheduler, sid: SocketId, generation: u64, now: SimTime) {
        let event_id = self.next_event_id();
        let host_id = self.id;
        let fire_at = now.saturating_add(crate::net::tcp::DELAYED_ACK_TIMEOUT);
        let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &SimContext| {
            host.on_delayed_ack_timer(scheduler, ctx, sid, generation, fire_at);
        });
        if let Err(err) = scheduler.push(Event::new(fire_at, host_id, host_id, event_id, task)) {
            tracing::error!(host = host_id.0, %err, "failed to arm delayed ack timer");
        }
    }

    /// Fires at `now`; sends the withheld pure ack if nothing has flushed
    /// it in the meantime — neither a later received segment's own reply
    /// nor an outgoing data segment on this connection (spec §4.5: "if no
    /// data is ready, send a pure ack at the timer").
    fn on_delayed_ack_timer(&mut self, scheduler: &Scheduler, ctx: &SimContext, sid: SocketId, generation: u64, now: SimTime) {
        let reply = {
            let Some(socket) = self.socket_mut(sid) else { return };
            let SocketKind::Tcp(conn) = &mut socket.kind else { return };
            if !conn.is_delayed_ack_timer_current(generation) {
                return;
            }
            conn.flush_delayed_ack();
            conn.remote.map(|remote| TcpHeader {
                src: conn.local,
                dst: remote,
                seq: conn.snd_nxt,
                ack: conn.rcv_nxt,
                window: conn.rcv_wnd,
                flags: TcpFlags {
                    ack: true,
                    ..TcpFlags::NONE
                },
                sack_edges_len: 0,
            })
        };
        let Some(header) = reply else { return };
        let mut packet = Packet::new(Bytes::new(), 0);
        packet.set_tcp(header);
        let dst_ip = *header.dst.ip();
        if let Err(err) = crate::net::route::send_packet(&ctx.topology, scheduler, self, dst_ip, packet, now) {
            tracing::error!(host = self.id.0, %err, "failed to send delayed ack");
        }
    }

    /// Wake every epoll set watching one of `touched`'s sockets whose
    /// readiness changed, coalescing into at most one pending notification
    /// task per set (spec §4.7).
    fn wake_watchers(&mut self, scheduler: &Scheduler, now: SimTime, touched: &[SocketId]) {
        if touched.is_empty() {
            return;
        }
        let epoll_ids: Vec<u32> = self.epolls.keys().copied().collect();
        for epoll_id in epoll_ids {
            let watched = match self.epolls.get(&epoll_id) {
                Some(epoll) => epoll.watched_ids(),
                None => continue,
            };
            let mut became_ready = false;
            for sid in watched {
                if !touched.contains(&sid) {
                    continue;
                }
                let Some((readable, writable)) = self.sockets.get(&sid).map(|s| (s.is_readable(), s.is_writable()))
                else {
                    continue;
                };
                if let Some(epoll) = self.epolls.get_mut(&epoll_id) {
                    if epoll.poll_one(sid, readable, writable) {
                        became_ready = true;
                    }
                }
            }
            if !became_ready {
                continue;
            }
            let epoll = self.epolls.get_mut(&epoll_id).expect("epoll set still present");
            if epoll.has_pending_notification() {
                continue;
            }
            epoll.mark_notification_scheduled();
            let pid = self.process_owning_epoll(epoll_id);
            let event_id = self.next_event_id();
            let host_id = self.id;
            let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &SimContext| {
                if let Some(epoll) = host.epoll_mut(epoll_id) {
                    epoll.clear_notification();
                }
                if let Some(pid) = pid {
                    host.run_process(scheduler, ctx, pid);
                }
            });
            if let Err(err) = scheduler.push(Event::new(now, host_id, host_id, event_id, task)) {
                tracing::error!(host = host_id.0, %err, "failed to schedule epoll notification");
            }
        }
    }

    /// Poll every epoll set's pass-through fds once (spec §4.7: "pass-through
    /// readiness is polled once per scheduler tick"), scheduling the same
    /// coalesced notification task [`Host::wake_watchers`] uses for virtual
    /// descriptors.
    pub fn poll_passthrough_epolls(&mut self, scheduler: &Scheduler, now: SimTime) {
        let epoll_ids: Vec<u32> = self.epolls.keys().copied().collect();
        for epoll_id in epoll_ids {
            let became_ready = match self.epolls.get_mut(&epoll_id) {
                Some(epoll) => epoll.poll_passthrough(self.os_poller.as_mut()),
                None => continue,
            };
            if !became_ready {
                continue;
            }
            let epoll = self.epolls.get_mut(&epoll_id).expect("epoll set still present");
            if epoll.has_pending_notification() {
                continue;
            }
            epoll.mark_notification_scheduled();
            let pid = self.process_owning_epoll(epoll_id);
            let event_id = self.next_event_id();
            let host_id = self.id;
            let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &SimContext| {
                if let Some(epoll) = host.epoll_mut(epoll_id) {
                    epoll.clear_notification();
                }
                if let Some(pid) = pid {
                    host.run_process(scheduler, ctx, pid);
                }
            });
            if let Err(err) = scheduler.push(Event::new(now, host_id, host_id, event_id, task)) {
                tracing::error!(host = host_id.0, %err, "failed to schedule pass-through epoll notification");
            }
        }
    }

    /// Re-poll one epoll set's pass-through fds on demand and report which
    /// ones fired, mirroring the virtual-descriptor path `epoll_wait` takes
    /// (spec §4.7). Returns an empty vector for an unknown `epoll_id`.
    pub fn poll_passthrough_ready(&mut self, epoll_id: u32) -> Vec<(std::os::fd::RawFd, bool, bool)> {
        let Some(epoll) = self.epolls.get(&epoll_id) else {
            return Vec::new();
        };
        let fds = epoll.watched_passthrough_fds();
        if fds.is_empty() {
            return Vec::new();
        }
        let states = self.os_poller.poll(&fds);
        let Some(epoll) = self.epolls.get_mut(&epoll_id) else {
            return Vec::new();
        };
        fds.into_iter()
            .zip(states)
            .filter_map(|(fd, (readable, writable))| {
                epoll
                    .poll_one(crate::epoll::WatchTarget::Passthrough(fd), readable, writable)
                    .then_some((fd, readable, writable))
            })
            .collect()
    }

    /// Enqueue `payload` on `sid`'s send buffer, seal it into a TCP
    /// segment, and hand it to the routing path; arms a retransmission
    /// timer for the assigned sequence range.
    pub fn tcp_send(
        &mut self,
        scheduler: &Scheduler,
        ctx: &SimContext,
        now: SimTime,
        sid: SocketId,
        payload: Bytes,
    ) -> crate::Result<()> {
        let (header, dst_ip, seq) = {
            let socket = self.socket_mut(sid).ok_or(SocketError::NotFound)?;
            let SocketKind::Tcp(conn) = &mut socket.kind else {
                return Err(SocketError::NotFound.into());
            };
            if conn.state != State::Established {
                return Err(SocketError::NotConnected.into());
            }
            let remote = conn.remote.ok_or(SocketError::NotConnected)?;
            let seq = conn.enqueue_send(payload.clone(), now);
            // This segment's own `ack` field already carries `rcv_nxt`, so
            // it piggybacks whatever ack was being withheld (spec §9: "an
            // outgoing data packet always flushes any pending delayed
            // ack") — cancel the timer rather than also sending a pure ack.
            conn.flush_delayed_ack();
            let header = TcpHeader {
                src: conn.local,
                dst: remote,
                seq,
                ack: conn.rcv_nxt,
                window: conn.rcv_wnd,
                flags: TcpFlags {
                    ack: true,
                    ..TcpFlags::NONE
                },
                sack_edges_len: 0,
            };
            (header, *remote.ip(), seq)
        };
        let mut packet = Packet::new(payload, 0);
        packet.set_tcp(header);
        crate::net::route::send_packet(&ctx.topology, scheduler, self, dst_ip, packet, now)?;
        self.schedule_retransmit_timer(scheduler, sid, seq, now);
        Ok(())
    }

    fn schedule_retransmit_timer(&mut self, scheduler: &Scheduler, sid: SocketId, seq: SeqNum, now: SimTime) {
        let event_id = self.next_event_id();
        let host_id = self.id;
        let fire_at = now.saturating_add(RETRANSMIT_TIMEOUT);
        let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &SimContext| {
            host.on_retransmit_timer(scheduler, ctx, sid, seq, fire_at);
        });
        if let Err(err) = scheduler.push(Event::new(fire_at, host_id, host_id, event_id, task)) {
            tracing::error!(host = host_id.0, %err, "failed to arm retransmit timer");
        }
    }

    /// Fires at `now`; re-sends the segment at `seq` if it has not yet
    /// been acked and has not already been retransmitted by an earlier
    /// timeout on this connection (spec §4.5 RTO).
    fn on_retransmit_timer(&mut self, scheduler: &Scheduler, ctx: &SimContext, sid: SocketId, seq: SeqNum, now: SimTime) {
        let resend = {
            let Some(socket) = self.socket_mut(sid) else { return };
            let SocketKind::Tcp(conn) = &mut socket.kind else { return };
            match conn.retransmit_queue.get(&seq) {
                Some(entry) if !entry.retransmitted => {
                    let payload = entry.payload.clone();
                    conn.on_retransmit_timeout();
                    match conn.remote {
                        Some(remote) => Some((conn.local, remote, conn.rcv_nxt, conn.rcv_wnd, payload)),
                        None => None,
                    }
                }
                _ => None,
            }
        };
        let Some((local, remote, ack, window, payload)) = resend else {
            return;
        };
        let header = TcpHeader {
            src: local,
            dst: remote,
            seq,
            ack,
            window,
            flags: TcpFlags {
                ack: true,
                ..TcpFlags::NONE
            },
            sack_edges_len: 0,
        };
        let mut packet = Packet::new(payload, 0);
        packet.set_tcp(header);
        packet.append_status(DeliveryStatus::SndTcpDequeueRetransmit);
        packet.append_status(DeliveryStatus::SndTcpRetransmitted);
        if crate::net::route::send_packet(&ctx.topology, scheduler, self, *remote.ip(), packet, now).is_ok() {
            self.schedule_retransmit_timer(scheduler, sid, seq, now);
        }
    }
}
