//! The send-side routing/delivery pipeline (spec §4.4 steps 1-5): resolve
//! the two hosts' topology vertices, draw the reliability sample, and
//! either mark the packet dropped or schedule its arrival on the
//! destination host at `now + latency`.

use std::net::Ipv4Addr;

use crate::error::SimulationError;
use crate::event::{Event, Task};
use crate::graph::Topology;
use crate::host::Host;
use crate::packet::{DeliveryStatus, Packet};
use crate::scheduler::Scheduler;
use crate::time::SimTime;

/// Send `packet` from `src_host` toward `dst_ip`. On success the packet's
/// ownership has passed either to a dropped/discarded fate (`InetDropped`)
/// or to the scheduler as a delivery event; the caller never touches it
/// again either way.
pub fn send_packet(
    topology: &Topology,
    scheduler: &Scheduler,
    src_host: &mut Host,
    dst_ip: Ipv4Addr,
    mut packet: Packet,
    now: SimTime,
) -> crate::Result<()> {
    packet.append_status(DeliveryStatus::SndInterfaceSent);

    let dst_host = topology
        .host_of(dst_ip)
        .ok_or(SimulationError::UnknownHost(u32::MAX))?;
    let src_vertex = topology
        .vertex_of(src_host.ip)
        .ok_or(SimulationError::UnknownHost(src_host.id.0))?;
    let dst_vertex = topology
        .vertex_of(dst_ip)
        .ok_or(SimulationError::UnknownHost(dst_host.0))?;
    let route = topology
        .route(src_vertex, dst_vertex)
        .ok_or(SimulationError::UnknownHost(dst_host.0))?;

    // Empty packets (bare acks) are never dropped by the reliability draw;
    // only payload-carrying segments are subject to loss (spec §4.4 step 3).
    if !packet.payload().is_empty() {
        let draw = src_host.next_uniform();
        if draw > route.reliability {
            packet.append_status(DeliveryStatus::InetDropped);
            return Ok(());
        }
    }
    packet.append_status(DeliveryStatus::InetSent);

    let latency = route.latency.sample(src_host.rng_mut());
    scheduler.update_min_time_jump(latency);

    let event_id = src_host.next_event_id();
    let deliver_at = now.saturating_add(latency);
    let src_id = src_host.id;
    let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &crate::context::SimContext| {
        host.receive_packet(deliver_at, scheduler, ctx, packet);
    });
    scheduler.push(Event::new(deliver_at, src_id, dst_host, event_id, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdf::Cdf;
    use crate::cpu::CpuAccount;
    use crate::graph::{NetworkVertex, VertexId};
    use crate::host::{Bandwidth, HostId};
    use bytes::Bytes;
    use std::time::Duration;

    fn make_host(id: u32, ip: Ipv4Addr) -> Host {
        Host::new(
            HostId(id),
            format!("h{id}"),
            ip,
            Bandwidth {
                up_bps: 1_000_000,
                down_bps: 1_000_000,
            },
            CpuAccount::new(1.0e9, 1.0e9, SimTime::from_nanos(1), None),
            id as u64,
        )
    }

    #[test]
    fn same_vertex_full_reliability_always_delivers() {
        let ip_a = Ipv4Addr::new(10, 0, 0, 1);
        let ip_b = Ipv4Addr::new(10, 0, 0, 2);
        let mut topology = Topology::new();
        topology.add_vertex(NetworkVertex::new(VertexId(0), Cdf::constant(Duration::from_millis(5)), 1.0));
        topology.assign_ip(ip_a, VertexId(0));
        topology.assign_ip(ip_b, VertexId(0));
        topology.assign_host(ip_a, HostId(1));
        topology.assign_host(ip_b, HostId(2));

        let hosts = [HostId(1), HostId(2)];
        let scheduler = Scheduler::new(&hosts, 1, Duration::from_millis(10));
        let mut host_a = make_host(1, ip_a);
        let packet = Packet::new(Bytes::from_static(b"hi"), 0);
        send_packet(&topology, &scheduler, &mut host_a, ip_b, packet, SimTime::ZERO).unwrap();

        let event = scheduler.pop_ready(&hosts).unwrap();
        assert_eq!(event.dst_host, HostId(2));
        assert_eq!(event.time, SimTime::from_nanos(5_000_000));
    }

    #[test]
    fn unknown_destination_is_a_simulation_error() {
        let topology = Topology::new();
        let hosts = [HostId(1)];
        let scheduler = Scheduler::new(&hosts, 1, Duration::from_millis(10));
        let mut host_a = make_host(1, Ipv4Addr::new(10, 0, 0, 1));
        let packet = Packet::new(Bytes::new(), 0);
        let err = send_packet(&topology, &scheduler, &mut host_a, Ipv4Addr::new(10, 0, 0, 9), packet, SimTime::ZERO);
        assert!(err.is_err());
    }
}
