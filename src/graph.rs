//! The weighted directed topology graph (spec §3: `NetworkVertex`,
//! `NetworkEdge`) and the routing query the packet path uses (spec §4.4).

use rustc_hash::FxHashMap;
use std::net::Ipv4Addr;

use crate::cdf::Cdf;
use crate::host::HostId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub u32);

#[derive(Debug, Clone)]
pub struct NetworkVertex {
    pub id: VertexId,
    /// Latency CDF for two hosts attached to this same vertex.
    pub intra_latency: Cdf,
    /// Reliability in `[0, 1]` for intra-network sends.
    pub intra_reliability: f64,
}

impl NetworkVertex {
    pub fn new(id: VertexId, intra_latency: Cdf, intra_reliability: f64) -> Self {
        Self {
            id,
            intra_latency,
            intra_reliability: intra_reliability.clamp(0.0, 1.0),
        }
    }
}

/// A directed edge weight: latency CDF and reliability for traffic flowing
/// `src -> dst`. Edges are stored once per unordered pair but carry two of
/// these, one per direction (spec: "edges symmetric in endpoints but
/// directional in weight").
#[derive(Debug, Clone)]
pub struct DirectedWeight {
    pub latency: Cdf,
    pub reliability: f64,
}

impl DirectedWeight {
    pub fn new(latency: Cdf, reliability: f64) -> Self {
        Self {
            latency,
            reliability: reliability.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkEdge {
    pub a: VertexId,
    pub b: VertexId,
    pub a_to_b: DirectedWeight,
    pub b_to_a: DirectedWeight,
}

/// Routing result for a single send (spec §4.4 step 2).
#[derive(Debug, Clone, Copy)]
pub struct RouteWeight {
    pub latency: Cdf,
    pub reliability: f64,
}

/// The topology: vertices plus at-most-one edge per unordered pair.
#[derive(Debug, Default)]
pub struct Topology {
    vertices: FxHashMap<VertexId, NetworkVertex>,
    // keyed by the unordered pair, lowest id first
    edges: FxHashMap<(VertexId, VertexId), NetworkEdge>,
    ip_to_vertex: FxHashMap<Ipv4Addr, VertexId>,
    /// Address-plane bookkeeping the routing path needs to turn a
    /// destination IP into the `HostId` a delivery event targets; kept
    /// alongside `ip_to_vertex` since both are populated at the same
    /// boot-time step (one host, one vertex, one IP).
    ip_to_host: FxHashMap<Ipv4Addr, HostId>,
}

fn pair_key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: NetworkVertex) {
        self.vertices.insert(vertex.id, vertex);
    }

    /// Rejects a second edge between the same unordered pair, matching
    /// the invariant "at most one edge per unordered pair".
    pub fn add_edge(&mut self, edge: NetworkEdge) -> anyhow::Result<()> {
        let key = pair_key(edge.a, edge.b);
        if self.edges.contains_key(&key) {
            anyhow::bail!(
                "duplicate edge between vertices {:?} and {:?}",
                edge.a,
                edge.b
            );
        }
        self.edges.insert(key, edge);
        Ok(())
    }

    pub fn assign_ip(&mut self, ip: Ipv4Addr, vertex: VertexId) {
        self.ip_to_vertex.insert(ip, vertex);
    }

    pub fn vertex_of(&self, ip: Ipv4Addr) -> Option<VertexId> {
        self.ip_to_vertex.get(&ip).copied()
    }

    pub fn assign_host(&mut self, ip: Ipv4Addr, host: HostId) {
        self.ip_to_host.insert(ip, host);
    }

    pub fn host_of(&self, ip: Ipv4Addr) -> Option<HostId> {
        self.ip_to_host.get(&ip).copied()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&NetworkVertex> {
        self.vertices.get(&id)
    }

    /// Resolve the directed weight used to send from `src` to `dst`.
    /// Same-vertex sends use the vertex's own intra-network CDF and
    /// reliability; cross-vertex sends use the directed edge weight in
    /// the `src -> dst` direction.
    pub fn route(&self, src: VertexId, dst: VertexId) -> Option<RouteWeight> {
        if src == dst {
            let v = self.vertices.get(&src)?;
            return Some(RouteWeight {
                latency: v.intra_latency,
                reliability: v.intra_reliability,
            });
        }
        let edge = self.edges.get(&pair_key(src, dst))?;
        let weight = if edge.a == src {
            &edge.a_to_b
        } else {
            &edge.b_to_a
        };
        Some(RouteWeight {
            latency: weight.latency,
            reliability: weight.reliability,
        })
    }

    /// The smallest end-to-end latency centre across the whole topology,
    /// used by the scheduler to tighten the runahead barrier
    /// (spec §4.1 `updateMinTimeJump`, applied once at load time as the
    /// static floor and refined at runtime per observed sends). Uses each
    /// CDF's centre rather than a random draw so topology load stays
    /// deterministic independent of any RNG state (spec §8 invariant 1).
    pub fn min_latency_floor(&self) -> Option<std::time::Duration> {
        self.edges
            .values()
            .flat_map(|e| [e.a_to_b.latency, e.b_to_a.latency])
            .chain(self.vertices.values().map(|v| v.intra_latency))
            .map(|cdf| cdf.centre())
            .min()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &NetworkVertex> {
        self.vertices.values()
    }
}
