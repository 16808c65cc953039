//! The single entry point (spec §2 `Master`, §3 ownership table): owns the
//! configuration-derived topology, DNS, and host set; boots one `Host` per
//! declared node instance, partitions them across the scheduler's workers,
//! drives the run to completion, and tracks the per-run plug-in error
//! threshold (spec §7).

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cdf::Cdf;
use crate::config::ShadowConfig;
use crate::context::{PluginErrorCounter, SimContext};
use crate::cpu::CpuAccount;
use crate::dns::Dns;
use crate::error::{Result, SetupError, SimulationError};
use crate::event::{Event, Task};
use crate::graph::{NetworkVertex, Topology, VertexId};
use crate::host::{Bandwidth, Host, HostId};
use crate::process::Process;
use crate::scheduler::{worker_pool, Scheduler};
use crate::time::SimTime;

/// Mirrors the CLI surface of spec §6.2; a `clap`-derived binary sets
/// these from flags and hands a `MasterOptions` to [`Master::boot`].
#[derive(Debug, Clone)]
pub struct MasterOptions {
    pub worker_threads: usize,
    pub seed: u64,
    pub min_runahead: Duration,
    pub initial_tcp_window_packets: u32,
    pub interface_buffer_bytes: u64,
    /// Per-run cap on plug-in instance failures before the simulation
    /// aborts (spec §7: "a threshold of repeated plug-in errors
    /// terminates the simulation with a non-zero exit"). The spec leaves
    /// the exact count unspecified; resolved as an Open Question in
    /// DESIGN.md.
    pub plugin_error_threshold: u32,
}

impl Default for MasterOptions {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            seed: 1,
            min_runahead: Duration::from_millis(10),
            initial_tcp_window_packets: 10,
            interface_buffer_bytes: 1 << 16,
            plugin_error_threshold: 10,
        }
    }
}

pub struct Master {
    options: MasterOptions,
    dns: Arc<Dns>,
    topology: Arc<Topology>,
    scheduler: Arc<Scheduler>,
    hosts_by_worker: Vec<Vec<Host>>,
    plugin_errors: Arc<PluginErrorCounter>,
}

/// Turns the declared `quantity` on a `<node>` into one IPv4 address per
/// instance. Addresses are handed out from `10.0.0.0/8` in allocation
/// order; nothing in the spec ties a node's address to its declared
/// `iphint`, so this is an Open Question resolution recorded in
/// DESIGN.md.
fn allocate_ip(index: u32) -> Ipv4Addr {
    let index = index.wrapping_add(1); // keep 10.0.0.0 reserved
    Ipv4Addr::new(10, (index >> 16) as u8, (index >> 8) as u8, index as u8)
}

fn secs_to_simtime(secs: f64) -> SimTime {
    SimTime::from_nanos((secs.max(0.0) * 1_000_000_000.0) as u64)
}

/// `<node logpcap>`/`<node pcapdir>` (spec §6.5): opens `{pcapdir}/
/// {dnsname}.pcap`, creating the directory (default `./pcap`) if needed.
fn open_pcap_writer(dns_name: String, pcap_dir: Option<std::path::PathBuf>) -> std::io::Result<crate::pcap::PcapWriter<std::fs::File>> {
    let dir = pcap_dir.unwrap_or_else(|| std::path::PathBuf::from("pcap"));
    std::fs::create_dir_all(&dir)?;
    let file = std::fs::File::create(dir.join(format!("{dns_name}.pcap")))?;
    crate::pcap::PcapWriter::new(file)
}

/// `<application starttime>` (spec §6.1): arms the process's first
/// `process_continue` (spec §4.8) at its start time. Same-host, so exempt
/// from the runahead barrier the same way a CPU reschedule is.
fn schedule_process_start(scheduler: &Scheduler, host: &mut Host, pid: crate::process::ProcessId, at: SimTime) {
    let event_id = host.next_event_id();
    let host_id = host.id;
    let task = Task::new(move |host: &mut Host, scheduler: &Scheduler, ctx: &SimContext| {
        host.run_process(scheduler, ctx, pid);
    });
    if scheduler.push(Event::new(at, host_id, host_id, event_id, task)).is_err() {
        tracing::error!(host = host_id.0, "failed to arm process start event");
    }
}

/// `<application stoptime>` (spec §6.1): tears down every descriptor the
/// process still holds once it stops.
fn schedule_process_stop(scheduler: &Scheduler, host: &mut Host, pid: crate::process::ProcessId, at: SimTime) {
    let event_id = host.next_event_id();
    let host_id = host.id;
    let task = Task::new(move |host: &mut Host, _scheduler: &Scheduler, _ctx: &SimContext| {
        host.stop_process(pid);
    });
    if scheduler.push(Event::new(at, host_id, host_id, event_id, task)).is_err() {
        tracing::error!(host = host_id.0, "failed to arm process stop event");
    }
}

impl Master {
    pub fn boot(config: ShadowConfig, mut topology: Topology, options: MasterOptions) -> Result<Self> {
        let mut dns = Dns::new();
        struct Pending {
            host_id: HostId,
            dns_name: String,
            ip: Ipv4Addr,
            bandwidth: Bandwidth,
            cpu_frequency_hz: f64,
            iphint: Option<String>,
            applications: Vec<crate::config::ApplicationSpec>,
            log_pcap: bool,
            pcap_dir: Option<std::path::PathBuf>,
        }
        let mut pending = Vec::new();
        let mut next_host_id = 0u32;
        for node in &config.nodes {
            let quantity = node.quantity.max(1);
            for instance in 0..quantity {
                let host_id = HostId(next_host_id);
                let ip = allocate_ip(next_host_id);
                next_host_id += 1;
                let dns_name = if quantity > 1 {
                    format!("{}{instance}", node.id)
                } else {
                    node.id.clone()
                };
                dns.register(dns_name.clone(), ip)
                    .map_err(|e| SetupError::PluginLoad {
                        id: node.id.clone(),
                        path: std::path::PathBuf::new(),
                        message: e.to_string(),
                    })?;
                pending.push(Pending {
                    host_id,
                    dns_name,
                    ip,
                    bandwidth: Bandwidth {
                        up_bps: node.bandwidth_up_kibps * 1024,
                        down_bps: node.bandwidth_down_kibps * 1024,
                    },
                    cpu_frequency_hz: (node.cpu_frequency_khz.max(1) * 1000) as f64,
                    iphint: node.iphint.clone(),
                    applications: node.applications.clone(),
                    log_pcap: node.log_pcap,
                    pcap_dir: node.pcap_dir.clone(),
                });
            }
        }

        // The spec names `iphint`/`geocodehint` as the node-to-vertex tie
        // but leaves the exact binding unspecified (Open Question,
        // DESIGN.md): a node whose `iphint` parses as a declared vertex id
        // is pinned there; everything else, including every host when the
        // topology declares no vertices at all, lands on a synthetic
        // zero-latency/full-reliability default vertex so a config with no
        // `<topology>` still boots and routes.
        let default_vertex = VertexId(u32::MAX);
        if topology.vertex(default_vertex).is_none() {
            topology.add_vertex(NetworkVertex::new(default_vertex, Cdf::constant(Duration::ZERO), 1.0));
        }
        for p in &pending {
            let vertex = p
                .iphint
                .as_deref()
                .and_then(|hint| hint.parse::<u32>().ok())
                .map(VertexId)
                .filter(|id| topology.vertex(*id).is_some())
                .unwrap_or(default_vertex);
            topology.assign_ip(p.ip, vertex);
            topology.assign_host(p.ip, p.host_id);
        }

        let host_ids: Vec<HostId> = pending.iter().map(|p| p.host_id).collect();
        let scheduler = Arc::new(Scheduler::new(&host_ids, options.worker_threads, options.min_runahead));
        if let Some(kill) = config.kill_time_secs {
            scheduler.set_kill_time(secs_to_simtime(kill));
        }
        if let Some(floor) = topology.min_latency_floor() {
            scheduler.update_min_time_jump(floor);
        }

        let worker_count = scheduler.worker_count();
        let mut hosts_by_worker: Vec<Vec<Host>> = (0..worker_count).map(|_| Vec::new()).collect();
        for p in pending {
            // `Random streams are per-worker, seeded deterministically from
            // the master seed so that runs are reproducible for a given
            // thread count and partitioning` (spec §5) — folding the host
            // id into the seed ties each host's stream to both the master
            // seed and its position in the (fixed, deterministic) boot
            // order, which is what varies with thread count/partitioning.
            let rng_seed = options.seed ^ (p.host_id.0 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
            let cpu = CpuAccount::new(p.cpu_frequency_hz, p.cpu_frequency_hz, SimTime::from_nanos(1_000), None);
            let pcap_target = p.log_pcap.then(|| (p.dns_name.clone(), p.pcap_dir.clone()));
            let mut host = Host::with_tcp_window(
                p.host_id,
                p.dns_name,
                p.ip,
                p.bandwidth,
                cpu,
                rng_seed,
                options.initial_tcp_window_packets,
            );
            if let Some((dns_name, pcap_dir)) = pcap_target {
                open_pcap_writer(dns_name, pcap_dir)
                    .map(|writer| host.enable_pcap(writer))
                    .unwrap_or_else(|err| tracing::warn!(%err, "failed to open pcap capture file"));
            }
            for app in p.applications {
                let start_time = secs_to_simtime(app.start_time_secs);
                let stop_time = app.stop_time_secs.map(secs_to_simtime);
                let pid = host.add_process(Process::new(app.plugin, app.arguments, start_time, stop_time));
                schedule_process_start(&scheduler, &mut host, pid, start_time);
                if let Some(stop_time) = stop_time {
                    schedule_process_stop(&scheduler, &mut host, pid, stop_time);
                }
            }
            let worker_index = (0..worker_count)
                .find(|&w| scheduler.hosts_for_worker(w).contains(&host.id))
                .expect("every booted host is assigned to a worker by construction");
            hosts_by_worker[worker_index].push(host);
        }

        info!(
            hosts = host_ids.len(),
            workers = worker_count,
            "booted simulation"
        );

        let plugin_errors = Arc::new(PluginErrorCounter::new(options.plugin_error_threshold));
        Ok(Self {
            options,
            dns: Arc::new(dns),
            topology: Arc::new(topology),
            scheduler,
            hosts_by_worker,
            plugin_errors,
        })
    }

    pub fn dns(&self) -> &Dns {
        &self.dns
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn options(&self) -> &MasterOptions {
        &self.options
    }

    /// Counts one plug-in instance failure against the per-run threshold
    /// (spec §7). Returns `true` once the threshold is reached, at which
    /// point the caller should abort with a non-zero exit.
    pub fn report_plugin_error(&self) -> bool {
        self.plugin_errors.report()
    }

    /// Drives the simulation to completion, single-threaded if only one
    /// worker was assigned (spec §6.2 `--threads 0`), otherwise across one
    /// OS thread per worker (spec §5). Returns an error if a task requested
    /// a simulation-wide abort (e.g. the plug-in error threshold of spec §7).
    pub fn drive(mut self) -> Result<()> {
        let scheduler = self.scheduler.clone();
        let ctx = SimContext::with_plugin_errors(self.topology.clone(), self.dns.clone(), self.plugin_errors.clone());
        if scheduler.worker_count() <= 1 {
            let mut hosts = self.hosts_by_worker.pop().unwrap_or_default();
            worker_pool::run_single_threaded(&scheduler, &ctx, &mut hosts)?;
        } else {
            let outcomes = worker_pool::run(scheduler.clone(), ctx, self.hosts_by_worker);
            for outcome in outcomes {
                outcome?;
            }
        }
        if let Some(reason) = scheduler.abort_reason() {
            return Err(SimulationError::Aborted(reason).into());
        }
        Ok(())
    }
}
