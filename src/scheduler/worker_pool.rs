//! Worker threads: one OS thread per worker, running its owned hosts'
//! events to completion with no internal suspension (spec §5). Event
//! execution itself — the CPU-blocking check and reschedule of §4.2 — lives
//! here since it is the one piece of behaviour shared by every worker loop.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};

use crate::context::SimContext;
use crate::event::{Event, Task};
use crate::host::{Host, HostId};

use super::Scheduler;

/// `scheduler.pop` followed by §4.2's execution rule: charge the event to
/// its host's CPU account; if the host is blocked, discard this event and
/// reschedule its task for `now + cpuDelay` instead of running it.
pub fn execute_event(scheduler: &Scheduler, ctx: &SimContext, host: &mut Host, event: Event) {
    host.cpu.update_time(event.time);
    if host.cpu.is_blocked() {
        let delay = host.cpu.get_delay();
        let resume_at = event.time.saturating_add(delay);
        let event_id = host.next_event_id();
        let dst = event.dst_host;
        // `src_host` is set to `dst` rather than the original sender: a
        // CPU-blocked reschedule never leaves this host's own queue, so it
        // is exempt from the runahead barrier the same way a self-armed
        // timer is (see `Scheduler::push`).
        let rescheduled = Event::new(resume_at, dst, dst, event_id, event.task);
        if let Err(err) = scheduler.push(rescheduled) {
            tracing::error!(host = host.id.0, %err, "failed to reschedule CPU-blocked event");
        }
        return;
    }
    event.task.run(host, scheduler, ctx);
}

/// One worker's result: either it ran to completion, or it observed a
/// fatal simulation error from a task it could not recover from.
pub type WorkerOutcome = crate::Result<()>;

/// Runs every worker's event loop to completion, one OS thread per worker,
/// and returns each worker's outcome in worker-index order.
///
/// `hosts_by_worker[i]` must be exactly the hosts `scheduler.hosts_for_worker(i)`
/// assigned to worker `i`; the pool does not itself validate the
/// partition since it is always constructed from the same scheduler.
pub fn run(scheduler: Arc<Scheduler>, ctx: SimContext, hosts_by_worker: Vec<Vec<Host>>) -> Vec<WorkerOutcome> {
    let (result_tx, result_rx): (Sender<(usize, WorkerOutcome)>, _) = unbounded();
    let mut handles = Vec::with_capacity(hosts_by_worker.len());
    for (worker_index, mut hosts) in hosts_by_worker.into_iter().enumerate() {
        let scheduler = scheduler.clone();
        let ctx = ctx.clone();
        let result_tx = result_tx.clone();
        handles.push(thread::spawn(move || {
            let host_ids: Vec<HostId> = hosts.iter().map(|h| h.id).collect();
            let outcome = worker_loop(&scheduler, &ctx, &host_ids, &mut hosts);
            let _ = result_tx.send((worker_index, outcome));
        }));
    }
    drop(result_tx);
    for handle in handles {
        let _ = handle.join();
    }
    let mut results: Vec<(usize, WorkerOutcome)> = result_rx.try_iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, outcome)| outcome).collect()
}

fn worker_loop(scheduler: &Scheduler, ctx: &SimContext, host_ids: &[HostId], hosts: &mut [Host]) -> WorkerOutcome {
    loop {
        while let Some(event) = scheduler.pop_ready(host_ids) {
            let dst = event.dst_host;
            let host = hosts
                .iter_mut()
                .find(|h| h.id == dst)
                .expect("worker popped an event for a host it does not own");
            execute_event(scheduler, ctx, host, event);
        }
        // Pass-through epoll fds are polled once per scheduler tick, not
        // per event (spec §4.7), since they carry no simulated delivery
        // event of their own to hang the poll off of.
        let now = scheduler.barrier();
        for host in hosts.iter_mut() {
            host.poll_passthrough_epolls(scheduler, now);
        }
        if !scheduler.await_round_boundary() {
            return Ok(());
        }
    }
}

/// The single-threaded fallback (spec §6.2 `--threads 0`): runs the whole
/// simulation on the calling thread with no spawned workers at all.
pub fn run_single_threaded(scheduler: &Scheduler, ctx: &SimContext, hosts: &mut [Host]) -> WorkerOutcome {
    let host_ids: Vec<HostId> = hosts.iter().map(|h| h.id).collect();
    worker_loop(scheduler, ctx, &host_ids, hosts)
}

/// Convenience used by timer/CPU reschedules and retransmit timers to wrap
/// a closure as a [`Task`] without importing `event::Task` at every call
/// site.
pub fn task(f: impl FnOnce(&mut Host, &Scheduler, &SimContext) + Send + 'static) -> Task {
    Task::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuAccount;
    use crate::dns::Dns;
    use crate::graph::Topology;
    use crate::host::Bandwidth;
    use crate::time::SimTime;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn test_ctx() -> SimContext {
        SimContext::new(Arc::new(Topology::new()), Arc::new(Dns::new()))
    }

    fn make_host(id: u32) -> Host {
        Host::new(
            HostId(id),
            format!("h{id}"),
            Ipv4Addr::new(10, 0, 0, id as u8),
            Bandwidth {
                up_bps: 1_000_000,
                down_bps: 1_000_000,
            },
            CpuAccount::new(1.0e9, 1.0e9, SimTime::from_nanos(1), None),
            id as u64,
        )
    }

    #[test]
    fn single_threaded_run_executes_every_event_once() {
        let hosts = [HostId(1)];
        let scheduler = Scheduler::new(&hosts, 0, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));
        for i in 0..5 {
            let counter = counter.clone();
            scheduler
                .push(Event::new(
                    SimTime::from_nanos(0),
                    HostId(1),
                    HostId(1),
                    i,
                    task(move |_host, _scheduler, _ctx| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                ))
                .unwrap();
        }
        let mut hosts = vec![make_host(1)];
        run_single_threaded(&scheduler, &test_ctx(), &mut hosts).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(scheduler.is_done());
    }

    #[test]
    fn blocked_cpu_reschedules_instead_of_running() {
        let hosts = [HostId(1)];
        let scheduler = Scheduler::new(&hosts, 0, Duration::from_millis(10));
        let mut host = make_host(1);
        host.cpu = CpuAccount::new(1.0e9, 1.0e9, SimTime::from_nanos(1), None);
        host.cpu.update_time(SimTime::ZERO);
        host.cpu.add_delay(Duration::from_nanos(10_000));
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = ran.clone();
        let event = Event::new(
            SimTime::ZERO,
            HostId(1),
            HostId(1),
            host.next_event_id(),
            task(move |_host, _scheduler, _ctx| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        execute_event(&scheduler, &test_ctx(), &mut host, event);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let rescheduled = scheduler.pop_ready(&hosts).unwrap();
        assert!(rescheduled.time > SimTime::ZERO);
    }
}
