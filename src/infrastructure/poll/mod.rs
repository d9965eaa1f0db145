//! Readiness multiplexing.
//!
//! The event loop only talks to [`EventSource`]; [`Poller`] is the
//! level-triggered `poll(2)` implementation used in production.

use crate::domain::error::{MuxError, MuxResult};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::collections::BTreeMap;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::trace;

/// Opaque identity of a pollable resource.
pub type Handle = RawFd;

/// Readiness a registered handle should be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    /// Normal and priority data.
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const READ_WRITE: Interest = Interest { readable: true, writable: true };

    fn as_poll_flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.readable {
            flags |= PollFlags::POLLIN | PollFlags::POLLPRI;
        }
        if self.writable {
            flags |= PollFlags::POLLOUT;
        }
        flags
    }
}

/// What the kernel reported for one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    fn from_poll_flags(flags: PollFlags) -> Self {
        Self {
            readable: flags.intersects(PollFlags::POLLIN | PollFlags::POLLPRI),
            writable: flags.contains(PollFlags::POLLOUT),
            hangup: flags.contains(PollFlags::POLLHUP),
            error: flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.hangup || self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub handle: Handle,
    pub readiness: Readiness,
}

/// Minimal interface over a readiness multiplexing primitive.
pub trait EventSource {
    /// Start watching `handle`. Registering the same handle twice is an error.
    fn register(&mut self, handle: Handle, interest: Interest) -> MuxResult<()>;

    /// Change the interest of an already registered handle.
    fn reregister(&mut self, handle: Handle, interest: Interest) -> MuxResult<()>;

    /// Stop watching `handle`.
    fn unregister(&mut self, handle: Handle) -> MuxResult<()>;

    /// Block until at least one handle is ready or `timeout` elapses.
    ///
    /// An interrupted wait returns no events.
    fn wait(&mut self, timeout: Duration) -> MuxResult<Vec<Event>>;
}

/// Level-triggered `poll(2)` event source.
///
/// Events come back in ascending handle order.
#[derive(Debug, Default)]
pub struct Poller {
    interests: BTreeMap<Handle, Interest>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.interests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interests.is_empty()
    }

    pub fn interest(&self, handle: Handle) -> Option<Interest> {
        self.interests.get(&handle).copied()
    }
}

impl EventSource for Poller {
    fn register(&mut self, handle: Handle, interest: Interest) -> MuxResult<()> {
        if self.interests.contains_key(&handle) {
            return Err(MuxError::DuplicateHandle(handle));
        }
        self.interests.insert(handle, interest);
        Ok(())
    }

    fn reregister(&mut self, handle: Handle, interest: Interest) -> MuxResult<()> {
        match self.interests.get_mut(&handle) {
            Some(current) => {
                *current = interest;
                Ok(())
            }
            None => Err(MuxError::Lookup(handle)),
        }
    }

    fn unregister(&mut self, handle: Handle) -> MuxResult<()> {
        self.interests
            .remove(&handle)
            .map(|_| ())
            .ok_or(MuxError::Lookup(handle))
    }

    fn wait(&mut self, timeout: Duration) -> MuxResult<Vec<Event>> {
        let mut fds: Vec<PollFd> = self
            .interests
            .iter()
            .map(|(&handle, interest)| PollFd::new(handle, interest.as_poll_flags()))
            .collect();

        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        match poll(&mut fds, millis) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                trace!("Poll interrupted");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(MuxError::Poll {
                    message: e.to_string(),
                })
            }
        }

        let events = self
            .interests
            .keys()
            .zip(fds.iter())
            .filter_map(|(&handle, fd)| {
                let readiness = Readiness::from_poll_flags(fd.revents()?);
                (!readiness.is_empty()).then_some(Event { handle, readiness })
            })
            .collect();

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_register_is_unique() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();

        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();
        let result = poller.register(a.as_raw_fd(), Interest::READABLE);
        assert!(matches!(result, Err(MuxError::DuplicateHandle(_))));
        assert_eq!(poller.len(), 1);
    }

    #[test]
    fn test_unregister_unknown_handle() {
        let mut poller = Poller::new();
        assert!(matches!(poller.unregister(42), Err(MuxError::Lookup(42))));
        assert!(matches!(
            poller.reregister(42, Interest::READ_WRITE),
            Err(MuxError::Lookup(42))
        ));
    }

    #[test]
    fn test_wait_times_out_without_events() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();

        let events = poller.wait(Duration::from_millis(10)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_wait_reports_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();

        b.write_all(b"ping").unwrap();

        let events = poller.wait(Duration::from_millis(500)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].handle, a.as_raw_fd());
        assert!(events[0].readiness.readable);
        assert!(!events[0].readiness.writable);
    }

    #[test]
    fn test_level_triggered_until_drained() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();

        b.write_all(b"ping").unwrap();

        // Nothing read, so the handle stays ready.
        for _ in 0..3 {
            let events = poller.wait(Duration::from_millis(500)).unwrap();
            assert_eq!(events.len(), 1);
        }
    }

    #[test]
    fn test_writable_interest() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();
        assert!(poller.wait(Duration::from_millis(10)).unwrap().is_empty());

        poller.reregister(a.as_raw_fd(), Interest::READ_WRITE).unwrap();
        let events = poller.wait(Duration::from_millis(500)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readiness.writable);
        assert_eq!(poller.interest(a.as_raw_fd()), Some(Interest::READ_WRITE));
    }

    #[test]
    fn test_peer_close_is_reported() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut poller = Poller::new();
        poller.register(a.as_raw_fd(), Interest::READABLE).unwrap();

        drop(b);

        let events = poller.wait(Duration::from_millis(500)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].readiness.readable || events[0].readiness.hangup);
    }
}
