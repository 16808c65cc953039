//! The per-host epoll-equivalent readiness engine (spec §4.7). Mirrors
//! Linux `epoll_ctl`/`epoll_wait` semantics over the virtual descriptor
//! space; a real OS poll descriptor is held alongside for pass-through
//! of non-virtual fds.

use std::os::fd::{BorrowedFd, RawFd};

use rustc_hash::FxHashMap;

use crate::error::SocketError;
use crate::net::socket::SocketId;

/// One watch target: either a virtual descriptor this engine itself tracks
/// readiness for, or a raw OS fd forwarded to the real kernel (spec §4.7:
/// "any FD that is not a virtual descriptor is forwarded to the host
/// kernel").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Virtual(SocketId),
    Passthrough(RawFd),
}

impl From<SocketId> for WatchTarget {
    fn from(sid: SocketId) -> Self {
        WatchTarget::Virtual(sid)
    }
}

/// Polls a batch of raw OS fds for readiness, abstracted so the engine
/// itself stays testable without a real kernel underneath it.
pub trait OsPoller: Send {
    /// Returns `(readable, writable)` for each of `fds`, in the same order.
    fn poll(&mut self, fds: &[RawFd]) -> Vec<(bool, bool)>;
}

/// The real pass-through implementation, a thin wrapper over `poll(2)`
/// (the same wrapper-over-libc idiom the teacher uses `nix` for elsewhere
/// rather than hand-rolled FFI).
#[derive(Debug, Default)]
pub struct NixPoller;

impl OsPoller for NixPoller {
    fn poll(&mut self, fds: &[RawFd]) -> Vec<(bool, bool)> {
        if fds.is_empty() {
            return Vec::new();
        }
        let mut pollfds: Vec<nix::poll::PollFd> = fds
            .iter()
            .map(|&fd| {
                // SAFETY: the fd outlives this call; callers only pass fds
                // the process still holds open for the duration of one poll.
                let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
                nix::poll::PollFd::new(borrowed, nix::poll::PollFlags::POLLIN | nix::poll::PollFlags::POLLOUT)
            })
            .collect();
        // Zero-millisecond timeout: a non-blocking poll, since this runs
        // once per scheduler tick rather than suspending the worker thread.
        if nix::poll::poll(&mut pollfds, nix::poll::PollTimeout::from(0u16)).is_err() {
            return vec![(false, false); fds.len()];
        }
        pollfds
            .iter()
            .map(|pfd| {
                let revents = pfd.revents().unwrap_or_else(nix::poll::PollFlags::empty);
                (revents.contains(nix::poll::PollFlags::POLLIN), revents.contains(nix::poll::PollFlags::POLLOUT))
            })
            .collect()
    }
}

/// Interest flags, named after their Linux counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpollFlags(u32);

impl EpollFlags {
    pub const IN: EpollFlags = EpollFlags(1 << 0);
    pub const OUT: EpollFlags = EpollFlags(1 << 1);
    pub const ET: EpollFlags = EpollFlags(1 << 2);
    pub const ONESHOT: EpollFlags = EpollFlags(1 << 3);

    pub fn empty() -> Self {
        EpollFlags(0)
    }

    pub fn contains(&self, other: EpollFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: EpollFlags) -> Self {
        EpollFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for EpollFlags {
    type Output = EpollFlags;
    fn bitor(self, rhs: EpollFlags) -> EpollFlags {
        self.union(rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Add,
    Mod,
    Del,
}

struct Watch {
    mask: EpollFlags,
    /// Last reported readable/writable pair, used to detect the state
    /// change edge-triggered mode requires.
    last_reported: Option<(bool, bool)>,
    /// Set once a one-shot watch has fired; cleared by a `Mod` that
    /// supplies a fresh mask.
    oneshot_fired: bool,
}

/// One `epoll_create`d set, scoped to a single process on a single host.
pub struct EpollSet {
    pub id: u32,
    watches: FxHashMap<WatchTarget, Watch>,
    /// True once a notification task has been scheduled for this set and
    /// not yet delivered; additional readiness changes coalesce into it
    /// instead of scheduling a second one (spec §4.7 thundering-herd note).
    notification_pending: bool,
}

impl EpollSet {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            watches: FxHashMap::default(),
            notification_pending: false,
        }
    }

    pub fn control(
        &mut self,
        op: ControlOp,
        fd: impl Into<WatchTarget>,
        mask: EpollFlags,
    ) -> Result<(), SocketError> {
        let fd = fd.into();
        match op {
            ControlOp::Add => {
                if self.watches.contains_key(&fd) {
                    return Err(SocketError::Exists);
                }
                self.watches.insert(
                    fd,
                    Watch {
                        mask,
                        last_reported: None,
                        oneshot_fired: false,
                    },
                );
                Ok(())
            }
            ControlOp::Mod => {
                let watch = self.watches.get_mut(&fd).ok_or(SocketError::NotFound)?;
                watch.mask = mask;
                watch.oneshot_fired = false;
                Ok(())
            }
            ControlOp::Del => {
                self.watches.remove(&fd).ok_or(SocketError::NotFound)?;
                Ok(())
            }
        }
    }

    pub fn is_watching(&self, fd: impl Into<WatchTarget>) -> bool {
        self.watches.contains_key(&fd.into())
    }

    /// Every virtual descriptor currently registered in this set, used to
    /// re-evaluate readiness after a batch of socket state changes.
    pub fn watched_ids(&self) -> Vec<SocketId> {
        self.watches
            .keys()
            .filter_map(|t| match t {
                WatchTarget::Virtual(sid) => Some(*sid),
                WatchTarget::Passthrough(_) => None,
            })
            .collect()
    }

    /// Every raw OS fd registered for pass-through, polled once per
    /// scheduler tick by [`EpollSet::poll_passthrough`].
    pub fn watched_passthrough_fds(&self) -> Vec<RawFd> {
        self.watches
            .keys()
            .filter_map(|t| match t {
                WatchTarget::Passthrough(fd) => Some(*fd),
                WatchTarget::Virtual(_) => None,
            })
            .collect()
    }

    /// Evaluate readiness for one watched descriptor given its current
    /// readable/writable state, per the rule in spec §4.7: ACTIVE, not
    /// CLOSED, still watched, and mask-matching; edge-triggered additionally
    /// requires the state to have changed (or never been reported); one-shot
    /// fires exactly once until the mask is rewritten by `Mod`.
    ///
    /// The descriptor is assumed ACTIVE and not CLOSED by the caller, which
    /// removes closed sockets from the watch set before calling this.
    pub fn poll_one(&mut self, fd: impl Into<WatchTarget>, readable: bool, writable: bool) -> bool {
        let Some(watch) = self.watches.get_mut(&fd.into()) else {
            return false;
        };
        if watch.oneshot_fired {
            return false;
        }
        let mask_match = (watch.mask.contains(EpollFlags::IN) && readable)
            || (watch.mask.contains(EpollFlags::OUT) && writable);
        if !mask_match {
            return false;
        }
        if watch.mask.contains(EpollFlags::ET) {
            let changed = watch.last_reported != Some((readable, writable));
            watch.last_reported = Some((readable, writable));
            if !changed {
                return false;
            }
        } else {
            watch.last_reported = Some((readable, writable));
        }
        if watch.mask.contains(EpollFlags::ONESHOT) {
            watch.oneshot_fired = true;
        }
        true
    }

    /// Poll every pass-through fd in this set once via `poller` and apply
    /// the same readiness rule `poll_one` applies to virtual descriptors.
    /// Called once per scheduler tick (spec §4.7); returns whether any fd
    /// newly became ready, which the caller uses to decide whether to
    /// schedule a notification task.
    pub fn poll_passthrough(&mut self, poller: &mut dyn OsPoller) -> bool {
        let fds = self.watched_passthrough_fds();
        if fds.is_empty() {
            return false;
        }
        let states = poller.poll(&fds);
        let mut became_ready = false;
        for (fd, (readable, writable)) in fds.into_iter().zip(states) {
            if self.poll_one(WatchTarget::Passthrough(fd), readable, writable) {
                became_ready = true;
            }
        }
        became_ready
    }

    pub fn has_pending_notification(&self) -> bool {
        self.notification_pending
    }

    pub fn mark_notification_scheduled(&mut self) {
        self.notification_pending = true;
    }

    pub fn clear_notification(&mut self) {
        self.notification_pending = false;
    }
}
