//! Scheduled events and the deterministic total order of spec §4.1.
//!
//! A [`Task`] is produced by a sender (a socket send, a timer, a CPU-delay
//! reschedule) and runs exactly once when its [`Event`] is popped by the
//! worker that owns the destination host. Ordering is `(time, dst_host,
//! src_host, src_host_event_id)`, strict and total (spec §3 `Event`,
//! testable property 2).

use std::cmp::Ordering;
use std::fmt;

use crate::context::SimContext;
use crate::host::{Host, HostId};
use crate::scheduler::Scheduler;
use crate::time::SimTime;

/// The unit of work a scheduled event carries. Boxed so that timers,
/// packet deliveries, and CPU-delay reschedules can all share one queue
/// without a sum type per call site. A task runs with exclusive access to
/// the host it was delivered to (the only host a worker may touch while
/// executing one of its events, spec §5), the scheduler, and the
/// read-only [`SimContext`] (topology, DNS), so it can mutate socket/epoll
/// state, resolve a route, and push follow-up events (an ack, a
/// retransmit timer, an epoll notification) in the same step.
pub type TaskFn = dyn FnOnce(&mut Host, &Scheduler, &SimContext) + Send;

pub struct Task(Box<TaskFn>);

impl Task {
    pub fn new(f: impl FnOnce(&mut Host, &Scheduler, &SimContext) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn run(self, host: &mut Host, scheduler: &Scheduler, ctx: &SimContext) {
        (self.0)(host, scheduler, ctx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Per-host monotonically increasing counter so two events produced by the
/// same host at the same simulated time execute in production order
/// (spec §4.1 `srcHostEventID`).
#[derive(Debug, Default)]
pub struct EventIdAllocator(std::sync::atomic::AtomicU64);

impl EventIdAllocator {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

pub struct Event {
    pub time: SimTime,
    pub dst_host: HostId,
    pub src_host: HostId,
    pub src_host_event_id: u64,
    pub task: Task,
}

impl Event {
    pub fn new(
        time: SimTime,
        src_host: HostId,
        dst_host: HostId,
        src_host_event_id: u64,
        task: Task,
    ) -> Self {
        Self {
            time,
            dst_host,
            src_host,
            src_host_event_id,
            task,
        }
    }

    pub(crate) fn order_key(&self) -> (SimTime, HostId, HostId, u64) {
        (self.time, self.dst_host, self.src_host, self.src_host_event_id)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("time", &self.time)
            .field("dst_host", &self.dst_host)
            .field("src_host", &self.src_host)
            .field("src_host_event_id", &self.src_host_event_id)
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    /// `BinaryHeap` is a max-heap; callers that need the earliest event
    /// first (the common case) must reverse this via `std::cmp::Reverse`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}
