use crate::domain::config::OverflowPolicy;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Write};

/// Result of queueing bytes for a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Everything fit
    Queued,
    /// The oldest `n` bytes were discarded to make room
    DroppedOldest(usize),
    /// Nothing was queued; the client cannot keep up
    Overflow,
}

/// Bounded queue of bytes waiting to be sent to one client.
///
/// `len()` never exceeds the capacity it was created with.
#[derive(Debug)]
pub struct OutboundBuffer {
    queue: VecDeque<u8>,
    capacity: usize,
    dropped: u64,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8], policy: OverflowPolicy) -> Enqueue {
        let needed = self.queue.len() + data.len();
        if needed <= self.capacity {
            self.queue.extend(data);
            return Enqueue::Queued;
        }

        match policy {
            OverflowPolicy::Disconnect => Enqueue::Overflow,
            OverflowPolicy::DropOldest => {
                let excess = needed - self.capacity;
                if data.len() >= self.capacity {
                    self.queue.clear();
                    self.queue.extend(&data[data.len() - self.capacity..]);
                } else {
                    self.queue.drain(..excess);
                    self.queue.extend(data);
                }
                self.dropped += excess as u64;
                Enqueue::DroppedOldest(excess)
            }
        }
    }

    /// Write as much as `writer` accepts without blocking.
    ///
    /// Returns the number of bytes written; stops quietly on `WouldBlock`.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.queue.is_empty() {
            let pending = self.queue.make_contiguous();
            match writer.write(pending) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "peer accepted no bytes",
                    ))
                }
                Ok(n) => {
                    self.queue.drain(..n);
                    written += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes discarded by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Accepts at most `budget` bytes, then reports `WouldBlock`.
    struct Throttled {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_queue_within_capacity() {
        let mut buffer = OutboundBuffer::new(8);
        assert_eq!(buffer.push(b"abcd", OverflowPolicy::Disconnect), Enqueue::Queued);
        assert_eq!(buffer.push(b"efgh", OverflowPolicy::Disconnect), Enqueue::Queued);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_disconnect_policy_rejects_overflow() {
        let mut buffer = OutboundBuffer::new(8);
        buffer.push(b"abcdef", OverflowPolicy::Disconnect);
        assert_eq!(buffer.push(b"ghi", OverflowPolicy::Disconnect), Enqueue::Overflow);
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_drop_oldest_keeps_newest_bytes() {
        let mut buffer = OutboundBuffer::new(8);
        buffer.push(b"abcdef", OverflowPolicy::DropOldest);
        assert_eq!(buffer.push(b"ghij", OverflowPolicy::DropOldest), Enqueue::DroppedOldest(2));
        assert_eq!(buffer.dropped(), 2);

        let mut sink = Vec::new();
        buffer.write_to(&mut sink).unwrap();
        assert_eq!(sink, b"cdefghij");
    }

    #[test]
    fn test_drop_oldest_with_oversized_chunk() {
        let mut buffer = OutboundBuffer::new(4);
        buffer.push(b"ab", OverflowPolicy::DropOldest);
        assert_eq!(buffer.push(b"0123456789", OverflowPolicy::DropOldest), Enqueue::DroppedOldest(8));

        let mut sink = Vec::new();
        buffer.write_to(&mut sink).unwrap();
        assert_eq!(sink, b"6789");
    }

    #[test]
    fn test_partial_write_keeps_remainder() {
        let mut buffer = OutboundBuffer::new(64);
        buffer.push(b"hello world", OverflowPolicy::Disconnect);

        let mut writer = Throttled { accepted: Vec::new(), budget: 5 };
        assert_eq!(buffer.write_to(&mut writer).unwrap(), 5);
        assert_eq!(writer.accepted, b"hello");
        assert_eq!(buffer.len(), 6);

        writer.budget = 100;
        assert_eq!(buffer.write_to(&mut writer).unwrap(), 6);
        assert_eq!(writer.accepted, b"hello world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_hard_write_error_propagates() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut buffer = OutboundBuffer::new(16);
        buffer.push(b"x", OverflowPolicy::Disconnect);
        let error = buffer.write_to(&mut Broken).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BrokenPipe);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(
            capacity in 1usize..256,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..32),
        ) {
            let mut buffer = OutboundBuffer::new(capacity);
            for chunk in &chunks {
                buffer.push(chunk, OverflowPolicy::DropOldest);
                prop_assert!(buffer.len() <= capacity);
            }
        }

        #[test]
        fn prop_drop_oldest_retains_stream_suffix(
            capacity in 1usize..256,
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..32),
        ) {
            let mut buffer = OutboundBuffer::new(capacity);
            let mut stream = Vec::new();
            for chunk in &chunks {
                buffer.push(chunk, OverflowPolicy::DropOldest);
                stream.extend_from_slice(chunk);
            }

            let mut sink = Vec::new();
            buffer.write_to(&mut sink).unwrap();
            let kept = stream.len().min(capacity);
            prop_assert_eq!(&sink[..], &stream[stream.len() - kept..]);
            prop_assert_eq!(buffer.dropped() as usize, stream.len() - kept);
        }

        #[test]
        fn prop_throttled_writes_preserve_order(
            data in prop::collection::vec(any::<u8>(), 0..512),
            budgets in prop::collection::vec(0usize..64, 1..64),
        ) {
            let mut buffer = OutboundBuffer::new(512);
            prop_assert_eq!(buffer.push(&data, OverflowPolicy::Disconnect), Enqueue::Queued);

            let mut writer = Throttled { accepted: Vec::new(), budget: 0 };
            for budget in budgets {
                writer.budget = budget;
                buffer.write_to(&mut writer).unwrap();
            }
            writer.budget = usize::MAX;
            buffer.write_to(&mut writer).unwrap();

            prop_assert_eq!(writer.accepted, data);
        }
    }
}
