//! Host-bound handlers for the syscall-interception contract (spec §6.3).
//! The shim itself — the library-call interception that redirects a hosted
//! application's libc calls here — is out of scope (spec §1); this module
//! is what it redirects *to*: one function per intercepted call, each
//! operating on a single process's descriptor table and its host's socket
//! and epoll state.
//!
//! Every function takes the active `&mut Host` and the calling process's
//! [`ProcessId`] rather than reaching through a global, per Design Notes
//! §9 ("pass a context handle explicitly ... rather than process-wide
//! singletons").

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::context::SimContext;
use crate::epoll::{ControlOp, EpollFlags, WatchTarget};
use crate::error::SocketError;
use crate::host::Host;
use crate::net::route;
use crate::net::socket::{Socket, SocketId, SocketKind, SocketType};
use crate::net::tcp::State;
use crate::packet::{Packet, TcpFlags, TcpHeader, UdpHeader};
use crate::process::ProcessId;
use crate::scheduler::Scheduler;
use crate::time::SimTime;

fn process_of<'h>(host: &'h mut Host, pid: ProcessId) -> Result<&'h mut crate::process::Process, SocketError> {
    host.process_mut(pid).ok_or(SocketError::NotFound)
}

fn socket_of(host: &mut Host, pid: ProcessId, fd: i32) -> Result<SocketId, SocketError> {
    let sid = host
        .process_mut(pid)
        .ok_or(SocketError::NotFound)?
        .socket_for_fd(fd)
        .ok_or(SocketError::NotFound)?;
    Ok(sid)
}

/// `socket(2)`: allocate an unbound socket of `kind` and install it in the
/// calling process's descriptor table.
pub fn socket(host: &mut Host, pid: ProcessId, kind: SocketType) -> Result<i32, SocketError> {
    let socket = match kind {
        SocketType::Dgram => Socket::new_dgram(),
        SocketType::Stream => Socket::new_stream(
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            host.initial_tcp_window_packets,
        ),
    };
    let sid = host.insert_socket(socket);
    let process = process_of(host, pid)?;
    Ok(process.open_fd(sid))
}

/// `socketpair(2)`/`pipe(2)`: a connected pair of LOCAL endpoints, each
/// given its own fd in the calling process.
pub fn socketpair(host: &mut Host, pid: ProcessId, capacity: usize) -> Result<(i32, i32), SocketError> {
    let (a, b) = Socket::new_local_pair(capacity);
    let sid_a = host.insert_socket(a);
    let sid_b = host.insert_socket(b);
    let process = process_of(host, pid)?;
    Ok((process.open_fd(sid_a), process.open_fd(sid_b)))
}

/// `bind(2)`. Port `0` requests an ephemeral port. `EADDRINUSE` if the
/// `(protocol, interface)` pair is already taken (spec §3 `Socket`
/// invariant).
pub fn bind(host: &mut Host, pid: ProcessId, fd: i32, mut addr: SocketAddrV4) -> Result<(), SocketError> {
    let sid = socket_of(host, pid, fd)?;
    let kind = host.socket(sid).ok_or(SocketError::NotFound)?.socket_type();
    if addr.port() == 0 {
        addr = SocketAddrV4::new(*addr.ip(), host.alloc_ephemeral_port());
    }
    if host.find_socket_by_local(addr, kind).is_some() {
        return Err(SocketError::AddrInUse);
    }
    let socket = host.socket_mut(sid).ok_or(SocketError::NotFound)?;
    socket.local = Some(addr);
    if let SocketKind::Tcp(conn) = &mut socket.kind {
        conn.local = addr;
    }
    Ok(())
}

/// `listen(2)`: move a bound STREAM socket into `LISTEN`.
pub fn listen(host: &mut Host, pid: ProcessId, fd: i32) -> Result<(), SocketError> {
    let sid = socket_of(host, pid, fd)?;
    let socket = host.socket_mut(sid).ok_or(SocketError::NotFound)?;
    let SocketKind::Tcp(conn) = &mut socket.kind else {
        return Err(SocketError::NotFound);
    };
    conn.listen();
    Ok(())
}

/// `accept(4)`. The listening socket transitions itself straight to
/// `SYN-RCVD`/`ESTABLISHED` on an inbound SYN (there is no separate
/// accept backlog — see `Host::receive_tcp_segment`), so `accept` here
/// only hands the caller a second fd onto the same now-connected socket
/// once the handshake has completed; `EAGAIN` while it is still pending.
pub fn accept(host: &mut Host, pid: ProcessId, fd: i32) -> Result<i32, SocketError> {
    let sid = socket_of(host, pid, fd)?;
    let socket = host.socket(sid).ok_or(SocketError::NotFound)?;
    let SocketKind::Tcp(conn) = &socket.kind else {
        return Err(SocketError::NotFound);
    };
    if conn.state != State::Established {
        return Err(SocketError::Again);
    }
    let process = process_of(host, pid)?;
    Ok(process.open_fd(sid))
}

/// `connect(2)`: active open. Binds an ephemeral local port first if the
/// socket was never bound, seals and sends the initial SYN.
pub fn connect(
    host: &mut Host,
    scheduler: &Scheduler,
    ctx: &SimContext,
    now: SimTime,
    pid: ProcessId,
    fd: i32,
    remote: SocketAddrV4,
) -> crate::Result<()> {
    let sid = socket_of(host, pid, fd).map_err(Into::<crate::SimError>::into)?;
    // `socket(2)` leaves a fresh STREAM socket's local address at
    // `0.0.0.0:0` (never `None`) until it is actually bound; that sentinel
    // is what marks it as not-yet-bound here.
    let unbound = host
        .socket(sid)
        .and_then(|s| s.local)
        .map_or(true, |addr| *addr.ip() == Ipv4Addr::UNSPECIFIED);
    if unbound {
        let local_ip = host.ip;
        bind(host, pid, fd, SocketAddrV4::new(local_ip, 0)).map_err(Into::<crate::SimError>::into)?;
    }
    let (local, seq) = {
        let socket = host.socket_mut(sid).ok_or(SocketError::NotFound)?;
        let SocketKind::Tcp(conn) = &mut socket.kind else {
            return Err(SocketError::NotFound.into());
        };
        conn.connect(remote);
        socket.remote = Some(remote);
        (conn.local, conn.iss)
    };
    let header = TcpHeader {
        src: local,
        dst: remote,
        seq,
        ack: 0,
        window: 0,
        flags: TcpFlags {
            syn: true,
            ..TcpFlags::NONE
        },
        sack_edges_len: 0,
    };
    let mut packet = Packet::new(Bytes::new(), 0);
    packet.set_tcp(header);
    route::send_packet(&ctx.topology, scheduler, host, *remote.ip(), packet, now)
}

/// `send(to|msg)`/`write(2)`. TCP enqueues onto the stream and goes
/// through `Host::tcp_send` (which also arms the retransmit timer); UDP
/// seals and routes one datagram per call; LOCAL writes into the peer's
/// ring buffer with no network effect.
pub fn send(
    host: &mut Host,
    scheduler: &Scheduler,
    ctx: &SimContext,
    now: SimTime,
    pid: ProcessId,
    fd: i32,
    dst: Option<SocketAddrV4>,
    payload: Bytes,
) -> crate::Result<usize> {
    let sid = socket_of(host, pid, fd).map_err(Into::<crate::SimError>::into)?;
    let len = payload.len();
    match host.socket(sid).ok_or(SocketError::NotFound)?.socket_type() {
        SocketType::Stream => {
            host.tcp_send(scheduler, ctx, now, sid, payload)?;
            Ok(len)
        }
        SocketType::Dgram => {
            let (local, remote_socket, is_local) = {
                let socket = host.socket(sid).ok_or(SocketError::NotFound)?;
                (socket.local, socket.remote, matches!(socket.kind, SocketKind::Local(_)))
            };
            if is_local {
                let socket = host.socket(sid).ok_or(SocketError::NotFound)?;
                let SocketKind::Local(end) = &socket.kind else {
                    unreachable!("checked above")
                };
                Ok(end.write.lock().unwrap().write(&payload))
            } else {
                let src = local.ok_or(SocketError::NotConnected)?;
                let remote = dst.or(remote_socket).ok_or(SocketError::NotConnected)?;
                let mut packet = Packet::new(payload, 0);
                packet.set_udp(UdpHeader { src, dst: remote });
                route::send_packet(&ctx.topology, scheduler, host, *remote.ip(), packet, now)?;
                Ok(len)
            }
        }
    }
}

/// `recv(from|msg)`/`read(2)`. Returns `0` on TCP EOF (peer FIN,
/// buffer drained); `EAGAIN` if nothing is available yet.
pub fn recv(host: &mut Host, pid: ProcessId, fd: i32, out: &mut [u8]) -> Result<usize, SocketError> {
    let sid = socket_of(host, pid, fd)?;
    let socket = host.socket_mut(sid).ok_or(SocketError::NotFound)?;
    match &mut socket.kind {
        SocketKind::Tcp(conn) => {
            if conn.has_buffered_data() {
                Ok(conn.read_received(out))
            } else if matches!(conn.state, State::CloseWait | State::Closed) {
                Ok(0)
            } else {
                Err(SocketError::Again)
            }
        }
        SocketKind::Udp(udp) => match udp.recv() {
            Some((_, payload)) => {
                let n = out.len().min(payload.len());
                out[..n].copy_from_slice(&payload[..n]);
                Ok(n)
            }
            None => Err(SocketError::Again),
        },
        SocketKind::Local(end) => {
            let n = end.read.lock().unwrap().read(out);
            if n == 0 && !end.is_readable() {
                Err(SocketError::Again)
            } else {
                Ok(n)
            }
        }
    }
}

/// `shutdown(2)`: half-close a STREAM socket (sends a FIN on the next
/// protocol step); a no-op for DGRAM/LOCAL sockets.
pub fn shutdown(host: &mut Host, pid: ProcessId, fd: i32) -> Result<(), SocketError> {
    let sid = socket_of(host, pid, fd)?;
    if let Some(socket) = host.socket_mut(sid) {
        if let SocketKind::Tcp(conn) = &mut socket.kind {
            conn.close();
        }
    }
    Ok(())
}

/// `close(2)`. This implementation does not support `dup`/shared fds, so
/// closing a fd always tears down the underlying socket with it.
pub fn close(host: &mut Host, pid: ProcessId, fd: i32) -> Result<(), SocketError> {
    let sid = process_of(host, pid)?.close_fd(fd).ok_or(SocketError::NotFound)?;
    host.remove_socket(sid);
    Ok(())
}

/// `getsockname(2)`.
pub fn getsockname(host: &Host, sid: SocketId) -> Option<SocketAddrV4> {
    host.socket(sid).and_then(|s| s.local)
}

/// `getpeername(2)`.
pub fn getpeername(host: &Host, sid: SocketId) -> Option<SocketAddrV4> {
    host.socket(sid).and_then(|s| s.remote)
}

/// `epoll_create(1)`: allocate a set owned by `pid`.
pub fn epoll_create(host: &mut Host, pid: ProcessId) -> Result<u32, SocketError> {
    let epoll_id = host.create_epoll();
    process_of(host, pid)?.own_epoll_set(epoll_id);
    Ok(epoll_id)
}

/// `epoll_ctl(2)`. `fd` is looked up in the calling process's virtual
/// descriptor table first; an fd the process never opened through this
/// shim (a real OS fd the hosted application owns directly) is registered
/// as a pass-through watch instead (spec §4.7).
pub fn epoll_ctl(
    host: &mut Host,
    pid: ProcessId,
    epoll_id: u32,
    op: ControlOp,
    fd: i32,
    flags: EpollFlags,
) -> Result<(), SocketError> {
    let target: WatchTarget = match socket_of(host, pid, fd) {
        Ok(sid) => WatchTarget::Virtual(sid),
        Err(SocketError::NotFound) => WatchTarget::Passthrough(fd),
        Err(err) => return Err(err),
    };
    host.epoll_mut(epoll_id).ok_or(SocketError::NotFound)?.control(op, target, flags)
}

/// `epoll_(p)wait(2)`: re-evaluate readiness for every fd this process has
/// registered on `epoll_id` and return the ones currently ready, alongside
/// the readable/writable flags observed (not intersected with the watch's
/// requested mask — the caller already knows what it asked for). Virtual
/// descriptors are re-evaluated against current socket state; pass-through
/// fds are re-polled against the real kernel (spec §4.7).
pub fn epoll_wait(host: &mut Host, pid: ProcessId, epoll_id: u32) -> Result<Vec<(i32, EpollFlags)>, SocketError> {
    let fds: Vec<(i32, SocketId)> = process_of(host, pid)?.fds().collect();
    let mut ready = Vec::new();
    for (fd, sid) in fds {
        if !host.epoll(epoll_id).ok_or(SocketError::NotFound)?.is_watching(sid) {
            continue;
        }
        let Some((readable, writable)) = host.socket(sid).map(|s| (s.is_readable(), s.is_writable())) else {
            continue;
        };
        let fired = host
            .epoll_mut(epoll_id)
            .ok_or(SocketError::NotFound)?
            .poll_one(sid, readable, writable);
        if fired {
            ready.push((fd, mask_of(readable, writable)));
        }
    }
    if host.epoll(epoll_id).is_none() {
        return Err(SocketError::NotFound);
    }
    for (fd, readable, writable) in host.poll_passthrough_ready(epoll_id) {
        ready.push((fd, mask_of(readable, writable)));
    }
    Ok(ready)
}

fn mask_of(readable: bool, writable: bool) -> EpollFlags {
    let mut mask = EpollFlags::empty();
    if readable {
        mask = mask.union(EpollFlags::IN);
    }
    if writable {
        mask = mask.union(EpollFlags::OUT);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuAccount;
    use crate::dns::Dns;
    use crate::graph::{NetworkVertex, Topology, VertexId};
    use crate::host::{Bandwidth, HostId};
    use crate::process::Process;
    use std::sync::Arc;
    use std::time::Duration;

    fn make_host(ip: Ipv4Addr) -> Host {
        Host::new(
            HostId(1),
            "h1".into(),
            ip,
            Bandwidth {
                up_bps: 1_000_000,
                down_bps: 1_000_000,
            },
            CpuAccount::new(1.0e9, 1.0e9, SimTime::from_nanos(1), None),
            7,
        )
    }

    #[test]
    fn socket_then_bind_then_listen_reaches_listen_state() {
        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let fd = socket(&mut host, pid, SocketType::Stream).unwrap();
        bind(&mut host, pid, fd, "10.0.0.1:80".parse().unwrap()).unwrap();
        listen(&mut host, pid, fd).unwrap();
        let sid = socket_of(&mut host, pid, fd).unwrap();
        assert_eq!(getsockname(&host, sid), Some("10.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn double_bind_to_same_address_is_addrinuse() {
        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let a = socket(&mut host, pid, SocketType::Stream).unwrap();
        let b = socket(&mut host, pid, SocketType::Stream).unwrap();
        bind(&mut host, pid, a, "10.0.0.1:80".parse().unwrap()).unwrap();
        assert_eq!(
            bind(&mut host, pid, b, "10.0.0.1:80".parse().unwrap()),
            Err(SocketError::AddrInUse)
        );
    }

    #[test]
    fn accept_before_handshake_completes_is_eagain() {
        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let fd = socket(&mut host, pid, SocketType::Stream).unwrap();
        bind(&mut host, pid, fd, "10.0.0.1:80".parse().unwrap()).unwrap();
        listen(&mut host, pid, fd).unwrap();
        assert_eq!(accept(&mut host, pid, fd), Err(SocketError::Again));
    }

    #[test]
    fn connect_sends_initial_syn() {
        let ip_a = Ipv4Addr::new(10, 0, 0, 1);
        let ip_b = Ipv4Addr::new(10, 0, 0, 2);
        let mut topology = Topology::new();
        topology.add_vertex(NetworkVertex::new(VertexId(0), crate::cdf::Cdf::constant(Duration::from_millis(5)), 1.0));
        topology.assign_ip(ip_a, VertexId(0));
        topology.assign_ip(ip_b, VertexId(0));
        topology.assign_host(ip_a, HostId(1));
        topology.assign_host(ip_b, HostId(2));
        let hosts = [HostId(1), HostId(2)];
        let scheduler = Scheduler::new(&hosts, 1, Duration::from_millis(10));
        let ctx = SimContext::new(Arc::new(topology), Arc::new(Dns::new()));

        let mut host = make_host(ip_a);
        let pid = host.add_process(Process::new("client".into(), vec![], SimTime::ZERO, None));
        let fd = socket(&mut host, pid, SocketType::Stream).unwrap();
        connect(&mut host, &scheduler, &ctx, SimTime::ZERO, pid, fd, "10.0.0.2:80".parse().unwrap()).unwrap();

        let event = scheduler.pop_ready(&hosts).unwrap();
        assert_eq!(event.dst_host, HostId(2));
    }

    #[test]
    fn udp_recv_without_data_is_eagain() {
        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let fd = socket(&mut host, pid, SocketType::Dgram).unwrap();
        bind(&mut host, pid, fd, "10.0.0.1:9".parse().unwrap()).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(recv(&mut host, pid, fd, &mut buf), Err(SocketError::Again));
    }

    #[test]
    fn epoll_ctl_on_fd_outside_descriptor_table_registers_passthrough() {
        use std::os::fd::AsRawFd;

        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let epoll_id = epoll_create(&mut host, pid).unwrap();
        let raw_fd = std::io::stdin().as_raw_fd();
        epoll_ctl(&mut host, pid, epoll_id, ControlOp::Add, raw_fd, EpollFlags::IN).unwrap();
        // A second `Add` for the same fd is EEXIST, confirming it landed as
        // a pass-through watch rather than being silently dropped.
        assert_eq!(
            epoll_ctl(&mut host, pid, epoll_id, ControlOp::Add, raw_fd, EpollFlags::IN),
            Err(SocketError::Exists)
        );
    }

    #[test]
    fn epoll_create_and_ctl_register_watch() {
        let mut host = make_host(Ipv4Addr::new(10, 0, 0, 1));
        let pid = host.add_process(Process::new("echo".into(), vec![], SimTime::ZERO, None));
        let fd = socket(&mut host, pid, SocketType::Dgram).unwrap();
        let epoll_id = epoll_create(&mut host, pid).unwrap();
        epoll_ctl(&mut host, pid, epoll_id, ControlOp::Add, fd, EpollFlags::IN).unwrap();
        assert_eq!(epoll_wait(&mut host, pid, epoll_id).unwrap(), Vec::new());
    }
}
