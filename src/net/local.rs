//! LOCAL pipes and socketpairs: in-process ring buffers with no network
//! effects; readiness flips with buffer occupancy (spec §4.6).

use std::collections::VecDeque;

use bytes::Bytes;

const PIPE_CAPACITY: usize = 1 << 16;

pub struct Pipe {
    buf: VecDeque<u8>,
    capacity: usize,
    writer_closed: bool,
}

impl Pipe {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(PIPE_CAPACITY)),
            capacity,
            writer_closed: false,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        let free = self.capacity.saturating_sub(self.buf.len());
        let n = free.min(data.len());
        self.buf.extend(&data[..n]);
        n
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = self.buf.pop_front().unwrap();
        }
        n
    }

    pub fn read_all(&mut self) -> Bytes {
        let v: Vec<u8> = self.buf.drain(..).collect();
        Bytes::from(v)
    }

    pub fn close_writer(&mut self) {
        self.writer_closed = true;
    }

    pub fn is_readable(&self) -> bool {
        !self.buf.is_empty() || self.writer_closed
    }

    pub fn is_writable(&self) -> bool {
        !self.writer_closed && self.buf.len() < self.capacity
    }
}

/// One end of a `socketpair(2)`/`pipe(2)` analogue: reads from the pipe
/// the peer writes into, writes into the pipe the peer reads from. Both
/// ends of a pair live on the same host and are only ever touched by that
/// host's single owning worker thread (spec §5), but the `Host` itself is
/// moved onto its worker thread once at boot (see `scheduler::Scheduler`),
/// so the pipes need to be `Send` even though they're never contended —
/// `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>`.
pub struct LocalEnd {
    pub read: std::sync::Arc<std::sync::Mutex<Pipe>>,
    pub write: std::sync::Arc<std::sync::Mutex<Pipe>>,
}

impl LocalEnd {
    pub fn new_pair(capacity: usize) -> (Self, Self) {
        let p1 = std::sync::Arc::new(std::sync::Mutex::new(Pipe::new(capacity)));
        let p2 = std::sync::Arc::new(std::sync::Mutex::new(Pipe::new(capacity)));
        (
            Self {
                read: p1.clone(),
                write: p2.clone(),
            },
            Self {
                read: p2,
                write: p1,
            },
        )
    }

    pub fn is_readable(&self) -> bool {
        self.read.lock().unwrap().is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.write.lock().unwrap().is_writable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flips_with_occupancy() {
        let mut pipe = Pipe::new(16);
        assert!(!pipe.is_readable());
        assert!(pipe.is_writable());
        pipe.write(b"hello");
        assert!(pipe.is_readable());
        let mut out = [0u8; 5];
        assert_eq!(pipe.read(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert!(!pipe.is_readable());
    }

    #[test]
    fn write_is_capped_at_capacity() {
        let mut pipe = Pipe::new(4);
        assert_eq!(pipe.write(b"abcdef"), 4);
        assert!(!pipe.is_writable());
    }

    #[test]
    fn closed_writer_keeps_pipe_readable_for_eof() {
        let mut pipe = Pipe::new(4);
        pipe.close_writer();
        assert!(pipe.is_readable());
        assert!(!pipe.is_writable());
    }
}
