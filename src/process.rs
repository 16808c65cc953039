//! Per-host process (spec §4.8). A process is a descriptor table and a
//! pool of epoll sets, plus the plug-in instance behind it; it has no
//! further identity of its own beyond ownership of those resources.

use rustc_hash::FxHashMap;

use crate::error::PluginError;
use crate::net::socket::SocketId;
use crate::plugin::PluginInstance;
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

pub struct Process {
    pub plugin_id: String,
    pub arguments: Vec<String>,
    pub start_time: SimTime,
    pub stop_time: Option<SimTime>,

    /// The descriptor table mapping a process-local fd number to the
    /// socket it names; separate from `Host::sockets`, which owns the
    /// sockets themselves.
    descriptors: FxHashMap<i32, SocketId>,
    next_fd: i32,

    /// Ids of the epoll sets this process owns, looked up through
    /// `Host::epoll`/`epoll_mut`.
    epoll_sets: Vec<u32>,

    instance: Option<PluginInstance>,
}

impl Process {
    pub fn new(
        plugin_id: String,
        arguments: Vec<String>,
        start_time: SimTime,
        stop_time: Option<SimTime>,
    ) -> Self {
        Self {
            plugin_id,
            arguments,
            start_time,
            stop_time,
            descriptors: FxHashMap::default(),
            next_fd: 3,
            epoll_sets: Vec::new(),
            instance: None,
        }
    }

    pub fn bind_instance(&mut self, instance: PluginInstance) {
        self.instance = Some(instance);
    }

    pub fn instance_mut(&mut self) -> Option<&mut PluginInstance> {
        self.instance.as_mut()
    }

    pub fn open_fd(&mut self, socket: SocketId) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.descriptors.insert(fd, socket);
        fd
    }

    pub fn close_fd(&mut self, fd: i32) -> Option<SocketId> {
        self.descriptors.remove(&fd)
    }

    pub fn socket_for_fd(&self, fd: i32) -> Option<SocketId> {
        self.descriptors.get(&fd).copied()
    }

    pub fn fds(&self) -> impl Iterator<Item = (i32, SocketId)> + '_ {
        self.descriptors.iter().map(|(&fd, &sid)| (fd, sid))
    }

    pub fn own_epoll_set(&mut self, epoll_id: u32) {
        self.epoll_sets.push(epoll_id);
    }

    pub fn epoll_sets(&self) -> &[u32] {
        &self.epoll_sets
    }

    /// True once `start_time` has passed and (if set) `stop_time` has not.
    pub fn is_active_at(&self, now: SimTime) -> bool {
        now >= self.start_time && self.stop_time.map_or(true, |stop| now < stop)
    }

    /// `process_continue` (spec §4.8): the host becomes the active host on
    /// the worker and the plug-in instance runs until it voluntarily
    /// yields back into the interception shim. The core has no visibility
    /// into what the instance does during the call; it only observes that
    /// control returned. A process with no bound instance (no loadable
    /// plug-in image — out of scope per spec §1) is a no-op.
    pub fn process_continue(&mut self) -> Result<(), PluginError> {
        match self.instance.as_mut() {
            Some(instance) => instance.activate(),
            None => Ok(()),
        }
    }

    /// Tears down every descriptor this process still holds, mirroring
    /// `close(2)` on each one (spec §4.8: a process stops running at its
    /// `stoptime`; nothing it held stays open past that).
    pub fn close_all_fds(&mut self) -> Vec<SocketId> {
        let ids: Vec<SocketId> = self.descriptors.values().copied().collect();
        self.descriptors.clear();
        self.epoll_sets.clear();
        ids
    }
}
