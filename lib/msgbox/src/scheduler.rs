use crate::connection::ConnId;
use crate::databuffer::DataBuffer;
use crate::error::ErrorKind;
use crate::handler::ConnInfo;

/// Owned counterpart of `Event`, queued until the scheduler drains. Holds
/// whatever buffer or context the event carries so the socket operation that
/// produced it doesn't need to keep it alive. `engine::drain_events` borrows
/// from this to build the `Event<'_>` a `Handler` actually sees.
pub enum QueuedPayload {
    None,
    Data(DataBuffer),
    Request { reply_id: u16, data: DataBuffer },
    Reply {
        reply_id: u16,
        data: DataBuffer,
        context: Box<dyn std::any::Any>,
    },
    Error(ErrorKind),
}

/// Tag distinguishing the zero-payload events from each other, since they
/// all share `QueuedPayload::None`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tag {
    Listening,
    ListeningEnded,
    ConnectionReady,
    ConnectionClosed,
    ConnectionLost,
    Message,
    Request,
    Reply,
    Error,
}

/// A queued occurrence: the connection it's about, read-only info about that
/// connection, a discriminant tag, and whatever owned data the event needs.
pub struct Scheduled {
    pub conn: ConnId,
    pub info: ConnInfo,
    pub tag: Tag,
    pub payload: QueuedPayload,
}

/// FIFO queue of events awaiting delivery, re-entrancy-safe via queue swap:
/// `drain` takes the current queue and leaves a fresh empty one in its place
/// before invoking any callback, so events enqueued by a callback land in the
/// new queue and are picked up on the *next* drain rather than being visited
/// (or skipped) mid-iteration.
pub struct Scheduler {
    queue: Vec<Scheduled>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler { queue: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, event: Scheduled) {
        self.queue.push(event);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Swaps out the current queue and returns it for draining.
    pub fn take(&mut self) -> Vec<Scheduled> {
        std::mem::take(&mut self.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tag: Tag) -> Scheduled {
        Scheduled {
            conn: 0,
            info: ConnInfo {
                transport: crate::address::Transport::Tcp,
                remote_addr: None,
            },
            tag,
            payload: QueuedPayload::None,
        }
    }

    #[test]
    fn test_take_leaves_fresh_empty_queue() {
        let mut sched = Scheduler::new();
        sched.push(sample(Tag::Listening));
        sched.push(sample(Tag::Message));

        let drained = sched.take();
        assert_eq!(drained.len(), 2);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_events_enqueued_during_drain_land_in_next_batch() {
        let mut sched = Scheduler::new();
        sched.push(sample(Tag::Listening));

        let batch = sched.take();
        for _ in &batch {
            // Simulates a callback that enqueues a follow-up event.
            sched.push(sample(Tag::Message));
        }

        assert_eq!(batch.len(), 1);
        let next = sched.take();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].tag, Tag::Message);
    }
}
