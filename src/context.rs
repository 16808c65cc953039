//! The explicit context handle threaded through the scheduler and worker
//! APIs in place of the source's process-wide singletons (Design Notes
//! §9: "pass a context handle explicitly through the scheduler and
//! worker APIs; keep worker-local state as thread-local storage scoped
//! to the worker's lifetime").
//!
//! Both fields are read-only after boot and shared unlocked across every
//! worker thread (spec §5: "the DNS, topology graph, and master options
//! are read-only after boot; they may be shared unlocked").

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::dns::Dns;
use crate::graph::Topology;

/// Per-run count of plug-in instance failures against the threshold that
/// terminates the simulation (spec §7: "a threshold of repeated plug-in
/// errors terminates the simulation with a non-zero exit"). Shared behind
/// an `Arc` so every worker's tasks report into the same counter and
/// [`crate::master::Master`] can inspect it after the run.
pub struct PluginErrorCounter {
    count: AtomicU32,
    threshold: u32,
}

impl PluginErrorCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold: threshold.max(1),
        }
    }

    /// Counts one failure; returns `true` once the threshold is reached.
    pub fn report(&self) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst) + 1 >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct SimContext {
    pub topology: Arc<Topology>,
    pub dns: Arc<Dns>,
    pub plugin_errors: Arc<PluginErrorCounter>,
}

impl SimContext {
    /// Convenience for call sites (mostly tests) that don't care about the
    /// plug-in error threshold; effectively never trips.
    pub fn new(topology: Arc<Topology>, dns: Arc<Dns>) -> Self {
        Self::with_plugin_errors(topology, dns, Arc::new(PluginErrorCounter::new(u32::MAX)))
    }

    pub fn with_plugin_errors(topology: Arc<Topology>, dns: Arc<Dns>, plugin_errors: Arc<PluginErrorCounter>) -> Self {
        Self {
            topology,
            dns,
            plugin_errors,
        }
    }
}
