use framekeep_common::config::OverflowPolicy;
use framekeep_common::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest frame, whose sequence number is given.
    Evicted(u64),
    /// Dropped: the buffer was cleared since the producer read it, or is closed.
    Discarded,
}

/// Result of taking a frame from the buffer.
#[derive(Debug)]
pub enum Popped {
    Frame(Frame),
    /// Nothing queued yet; the producer is still running.
    Empty,
    /// The producer finished and every queued frame has been taken.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub pushed: u64,
    pub popped: u64,
    pub evicted: u64,
    pub discarded: u64,
    pub cleared: u64,
}

struct State {
    frames: VecDeque<Frame>,
    /// Bumped by every clear; pushes stamped with an older epoch are stale.
    epoch: u64,
    finished: bool,
    closed: bool,
    stats: BufferStats,
}

/// Bounded FIFO between one producer and one consumer.
///
/// All state sits behind a single lock, so `clear` is atomic with respect to
/// `push` and `pop`: nobody observes a half-flushed queue.
pub struct FrameBuffer {
    state: Mutex<State>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Signalled when a frame is queued or the stream ends.
    frame_available: Condvar,
    /// Signalled when a slot frees up, the queue is cleared, or it closes.
    space_available: Condvar,
}

impl FrameBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                frames: VecDeque::with_capacity(capacity),
                epoch: 0,
                finished: false,
                closed: false,
                stats: BufferStats::default(),
            }),
            capacity,
            policy,
            frame_available: Condvar::new(),
            space_available: Condvar::new(),
        }
    }

    /// Current flush generation. A producer reads this before a blocking
    /// source read and hands it back to [`push_at`](Self::push_at).
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn push(&self, frame: Frame) -> PushOutcome {
        let epoch = self.epoch();
        self.push_at(frame, epoch)
    }

    /// Queues `frame` unless the buffer was cleared after `epoch` was read.
    pub fn push_at(&self, frame: Frame, epoch: u64) -> PushOutcome {
        let mut state = self.state.lock();
        let mut outcome = PushOutcome::Queued;

        loop {
            if state.closed || state.epoch != epoch {
                state.stats.discarded += 1;
                return PushOutcome::Discarded;
            }
            if state.frames.len() < self.capacity {
                break;
            }
            match self.policy {
                OverflowPolicy::Block => self.space_available.wait(&mut state),
                OverflowPolicy::DropOldest => {
                    if let Some(old) = state.frames.pop_front() {
                        state.stats.evicted += 1;
                        outcome = PushOutcome::Evicted(old.seq());
                    }
                }
            }
        }

        state.frames.push_back(frame);
        state.stats.pushed += 1;
        self.frame_available.notify_one();
        outcome
    }

    /// Blocks until a frame is queued or the stream has ended.
    pub fn pop(&self) -> Popped {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = self.take_front(&mut state) {
                return Popped::Frame(frame);
            }
            if state.finished || state.closed {
                return Popped::EndOfStream;
            }
            self.frame_available.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop) but gives up with `Empty` after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = self.take_front(&mut state) {
                return Popped::Frame(frame);
            }
            if state.finished || state.closed {
                return Popped::EndOfStream;
            }
            if self
                .frame_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match self.take_front(&mut state) {
                    Some(frame) => Popped::Frame(frame),
                    None if state.finished || state.closed => Popped::EndOfStream,
                    None => Popped::Empty,
                };
            }
        }
    }

    pub fn try_pop(&self) -> Popped {
        let mut state = self.state.lock();
        match self.take_front(&mut state) {
            Some(frame) => Popped::Frame(frame),
            None if state.finished || state.closed => Popped::EndOfStream,
            None => Popped::Empty,
        }
    }

    fn take_front(&self, state: &mut State) -> Option<Frame> {
        let frame = state.frames.pop_front()?;
        state.stats.popped += 1;
        self.space_available.notify_one();
        Some(frame)
    }

    /// Drops every queued frame and starts a new epoch, so frames read
    /// before the clear can no longer be pushed. Also re-opens a finished
    /// stream, since a seek makes the source readable again.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.frames.len();
        state.frames.clear();
        state.epoch += 1;
        state.finished = false;
        state.stats.cleared += 1;
        self.space_available.notify_all();
        debug!(dropped, epoch = state.epoch, "frame buffer cleared");
        dropped
    }

    /// Marks end of stream. Queued frames remain poppable.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.frame_available.notify_all();
    }

    /// Releases every frame and wakes all waiters for good.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.frames.clear();
        self.frame_available.notify_all();
        self.space_available.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        self.state.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekeep_common::frame::PixelFormat;
    use std::sync::Arc;
    use std::thread;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, 1, 1, PixelFormat::Gray8, vec![seq as u8]).unwrap()
    }

    fn drain(buffer: &FrameBuffer) -> Vec<u64> {
        let mut out = Vec::new();
        while let Popped::Frame(f) = buffer.try_pop() {
            out.push(f.seq());
        }
        out
    }

    #[test]
    fn evict_oldest_keeps_most_recent_in_order() {
        let buffer = FrameBuffer::new(3, OverflowPolicy::DropOldest);
        assert_eq!(buffer.push(frame(1)), PushOutcome::Queued);
        buffer.push(frame(2));
        buffer.push(frame(3));
        assert_eq!(buffer.push(frame(4)), PushOutcome::Evicted(1));

        assert_eq!(buffer.len(), 3);
        assert_eq!(drain(&buffer), vec![2, 3, 4]);
        assert_eq!(buffer.stats().evicted, 1);
    }

    #[test]
    fn never_exceeds_capacity() {
        let buffer = FrameBuffer::new(5, OverflowPolicy::DropOldest);
        for seq in 0..100 {
            buffer.push(frame(seq));
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(drain(&buffer), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn block_policy_waits_for_consumer() {
        let buffer = Arc::new(FrameBuffer::new(1, OverflowPolicy::Block));
        buffer.push(frame(1));

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.push(frame(2)))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.len(), 1);

        assert!(matches!(buffer.pop(), Popped::Frame(f) if f.seq() == 1));
        assert_eq!(producer.join().unwrap(), PushOutcome::Queued);
        assert!(matches!(buffer.pop(), Popped::Frame(f) if f.seq() == 2));
    }

    #[test]
    fn pop_reports_end_of_stream_after_drain() {
        let buffer = FrameBuffer::new(4, OverflowPolicy::DropOldest);
        buffer.push(frame(1));
        buffer.finish();

        assert!(matches!(buffer.pop(), Popped::Frame(_)));
        assert!(matches!(buffer.pop(), Popped::EndOfStream));
        assert!(matches!(buffer.try_pop(), Popped::EndOfStream));
    }

    #[test]
    fn blocked_pop_wakes_on_push() {
        let buffer = Arc::new(FrameBuffer::new(2, OverflowPolicy::DropOldest));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || match buffer.pop() {
                Popped::Frame(f) => Some(f.seq()),
                _ => None,
            })
        };
        thread::sleep(Duration::from_millis(20));
        buffer.push(frame(9));
        assert_eq!(consumer.join().unwrap(), Some(9));
    }

    #[test]
    fn pop_timeout_returns_empty() {
        let buffer = FrameBuffer::new(2, OverflowPolicy::DropOldest);
        let started = Instant::now();
        assert!(matches!(
            buffer.pop_timeout(Duration::from_millis(30)),
            Popped::Empty
        ));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn clear_flushes_and_rejects_stale_pushes() {
        let buffer = FrameBuffer::new(4, OverflowPolicy::DropOldest);
        let before = buffer.epoch();
        buffer.push(frame(1));
        buffer.push(frame(2));
        buffer.finish();

        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
        assert!(!buffer.is_finished());

        // A frame read before the clear arrives late.
        assert_eq!(buffer.push_at(frame(3), before), PushOutcome::Discarded);
        assert_eq!(buffer.push(frame(50)), PushOutcome::Queued);
        assert_eq!(drain(&buffer), vec![50]);
    }

    #[test]
    fn close_releases_blocked_producer() {
        let buffer = Arc::new(FrameBuffer::new(1, OverflowPolicy::Block));
        buffer.push(frame(1));
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.push(frame(2)))
        };
        thread::sleep(Duration::from_millis(20));
        buffer.close();

        assert_eq!(producer.join().unwrap(), PushOutcome::Discarded);
        assert!(buffer.is_empty());
        assert!(matches!(buffer.pop(), Popped::EndOfStream));
    }
}
