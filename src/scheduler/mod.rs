//! The parallel conservative discrete-event scheduler and worker pool
//! (spec §4.1, §5). Hosts are partitioned across a fixed worker count;
//! each worker owns an OS thread and a disjoint set of hosts, so no host
//! is ever touched by more than one worker. A round-robin barrier bounds
//! how far any worker may run ahead of the others before they resynchronize.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Barrier, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::error::{Result, SimulationError};
use crate::event::Event;
use crate::host::HostId;
use crate::time::SimTime;

pub mod worker_pool;

/// Floor below which the runahead step is never allowed to shrink, so the
/// barrier always makes forward progress (spec §4.1: "floor enforced to
/// ≥ 1 ns").
const RUNAHEAD_FLOOR: Duration = Duration::from_nanos(1);

struct HostQueue {
    heap: Mutex<BinaryHeap<Reverse<Event>>>,
}

impl HostQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }
}

/// Shared scheduler state: the per-host queues, the worker/host partition,
/// and the barrier clock. Cheap to share behind an `Arc` since all mutation
/// goes through interior locks or atomics (spec §5: "the queue is protected
/// by a lock held only during push/pop").
pub struct Scheduler {
    queues: FxHashMap<HostId, HostQueue>,
    partitions: Vec<Vec<HostId>>,
    barrier_ns: AtomicU64,
    min_runahead: Duration,
    min_observed_latency: Mutex<Duration>,
    done: AtomicBool,
    round_barrier: Barrier,
    /// `SimTime::INVALID` means no `<kill time>` was configured.
    kill_time_ns: AtomicU64,
    /// First reason a task requested simulation-wide abort (spec §7: a
    /// plug-in error threshold, or any other fatal condition a task wants
    /// to surface). `None` if the run finished normally.
    abort_reason: Mutex<Option<String>>,
}

impl Scheduler {
    /// `worker_count == 0` is normalised to the single-threaded fallback
    /// (spec §6.2 `--threads 0`): one worker owns every host.
    pub fn new(host_ids: &[HostId], worker_count: usize, min_runahead: Duration) -> Self {
        let worker_count = worker_count.max(1);
        let min_runahead = min_runahead.max(RUNAHEAD_FLOOR);
        let mut partitions: Vec<Vec<HostId>> = vec![Vec::new(); worker_count];
        for (i, host) in host_ids.iter().enumerate() {
            partitions[i % worker_count].push(*host);
        }
        let queues = host_ids
            .iter()
            .map(|host| (*host, HostQueue::new()))
            .collect();
        Self {
            queues,
            partitions,
            barrier_ns: AtomicU64::new(min_runahead.as_nanos() as u64),
            min_runahead,
            min_observed_latency: Mutex::new(min_runahead),
            done: AtomicBool::new(false),
            round_barrier: Barrier::new(worker_count),
            kill_time_ns: AtomicU64::new(SimTime::INVALID.as_nanos()),
            abort_reason: Mutex::new(None),
        }
    }

    /// Requests the whole simulation stop at the next round boundary,
    /// keeping only the first reported reason. Used by a task that
    /// observes a fatal, run-wide condition (spec §7's plug-in error
    /// threshold) rather than a per-event failure.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut guard = self.abort_reason.lock().unwrap();
        if guard.is_none() {
            *guard = Some(reason.into());
        }
        self.done.store(true, Ordering::Release);
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().unwrap().clone()
    }

    pub fn worker_count(&self) -> usize {
        self.partitions.len()
    }

    /// `<kill time>` (spec §6.1): schedules simulation end at an absolute
    /// simulated time, regardless of whether any host still has pending
    /// work.
    pub fn set_kill_time(&self, time: SimTime) {
        self.kill_time_ns.store(time.as_nanos(), Ordering::Release);
    }

    pub fn hosts_for_worker(&self, worker_index: usize) -> &[HostId] {
        &self.partitions[worker_index]
    }

    pub fn barrier(&self) -> SimTime {
        SimTime::from_nanos(self.barrier_ns.load(Ordering::Acquire))
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// `updateMinTimeJump` (spec §4.1): a narrower observed end-to-end
    /// latency tightens every future runahead step.
    pub fn update_min_time_jump(&self, latency: Duration) {
        let mut min = self.min_observed_latency.lock().unwrap();
        if latency < *min {
            *min = latency;
        }
    }

    /// `push` (spec §4.1). Rejects events scheduled past the current
    /// barrier or targeting a host this scheduler does not own; both are
    /// programmer errors in the core, not user-visible failures.
    ///
    /// The runahead barrier only bounds cross-host sends: that is what
    /// could let one worker observe another's future before it has
    /// committed to it. An event a host schedules against itself (a CPU
    /// reschedule, a retransmit timer, an epoll notification) never
    /// crosses a host boundary, so it is exempt — the owning worker will
    /// simply not see it until the round reaches that time.
    pub fn push(&self, event: Event) -> Result<()> {
        if event.dst_host != event.src_host {
            let barrier = self.barrier();
            if event.time > barrier {
                return Err(SimulationError::RunaheadViolation {
                    host: event.dst_host.0,
                    time: event.time.as_nanos(),
                    barrier: barrier.as_nanos(),
                }
                .into());
            }
        }
        let queue = self
            .queues
            .get(&event.dst_host)
            .ok_or(SimulationError::UnknownHost(event.dst_host.0))?;
        queue.heap.lock().unwrap().push(Reverse(event));
        Ok(())
    }

    /// `pop` restricted to the hosts owned by one worker: the earliest
    /// event (by the total order of spec §4.1) among those hosts whose
    /// `time` is within the barrier, or `None` if nothing is ready yet.
    pub fn pop_ready(&self, hosts: &[HostId]) -> Option<Event> {
        let barrier = self.barrier();
        let mut winner: Option<HostId> = None;
        let mut winner_key = None;
        for host in hosts {
            let queue = self.queues.get(host).expect("worker polled unowned host");
            let heap = queue.heap.lock().unwrap();
            if let Some(Reverse(event)) = heap.peek() {
                if event.time <= barrier {
                    let key = event.order_key();
                    if winner_key.is_none() || Some(&key) < winner_key.as_ref() {
                        winner_key = Some(key);
                        winner = Some(*host);
                    }
                }
            }
        }
        let host = winner?;
        let queue = self.queues.get(&host).unwrap();
        queue.heap.lock().unwrap().pop().map(|Reverse(e)| e)
    }

    fn all_queues_empty(&self) -> bool {
        self.queues.values().all(|q| q.heap.lock().unwrap().is_empty())
    }

    /// Advance the barrier by `min(configured runahead, smallest observed
    /// latency)`, or mark the run finished once every queue is empty
    /// (spec §4.1, §5: "`scheduler_pop` returns null at simulation end").
    fn end_round(&self) {
        let kill_time = SimTime::from_nanos(self.kill_time_ns.load(Ordering::Acquire));
        if kill_time.is_valid() && self.barrier() >= kill_time {
            self.done.store(true, Ordering::Release);
            return;
        }
        if self.all_queues_empty() {
            self.done.store(true, Ordering::Release);
            return;
        }
        let observed = *self.min_observed_latency.lock().unwrap();
        let step = self.min_runahead.min(observed).max(RUNAHEAD_FLOOR);
        let next = self.barrier().saturating_add(step);
        self.barrier_ns.store(next.as_nanos(), Ordering::Release);
    }

    /// `awaitStart`/`awaitFinish` collapsed into one per-round rendezvous:
    /// every worker calls this once it has drained all events ready under
    /// the current barrier. One worker (the barrier leader) advances the
    /// clock or declares the run finished; a second rendezvous makes sure
    /// every worker observes the same outcome before resuming.
    pub fn await_round_boundary(&self) -> bool {
        if self.round_barrier.wait().is_leader() {
            self.end_round();
        }
        self.round_barrier.wait();
        !self.is_done()
    }
}
