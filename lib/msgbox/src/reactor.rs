use mio::{Event, Events, Poll, PollOpt, Ready, Token};
use std::io;
use std::time::Duration;

/// Which direction of I/O a registered socket currently cares about.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn to_ready(self) -> Ready {
        match self {
            Interest::Read => Ready::readable(),
            Interest::Write => Ready::writable(),
            Interest::ReadWrite => Ready::readable() | Ready::writable(),
        }
    }
}

/// Readiness reported for one registered slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    fn from_event(event: &Event) -> Readiness {
        let ready = event.readiness();
        Readiness {
            readable: ready.is_readable(),
            writable: ready.is_writable(),
        }
    }
}

/// Readiness multiplexer over a dynamic set of sockets.
///
/// Registered sockets live in two parallel vectors indexed by a stable slot
/// number: `owners[i]` is the caller-chosen key (an engine `ConnId`) for
/// `tokens[i]`. Removal swaps the last element into the freed slot so the
/// index stays dense without shifting every later entry; `apply_removals`
/// reports which owner moved and its new slot so the caller can update the
/// index it cached on that owner's own record.
pub struct Reactor {
    poll: Poll,
    events: Events,
    tokens: Vec<Token>,
    interests: Vec<Interest>,
    owners: Vec<usize>,
    pending_removals: Vec<usize>,
    next_token: usize,
}

impl Reactor {
    pub fn new(event_capacity: usize) -> io::Result<Reactor> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(event_capacity),
            tokens: Vec::new(),
            interests: Vec::new(),
            owners: Vec::new(),
            pending_removals: Vec::new(),
            next_token: 0,
        })
    }

    /// Number of live registered slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Registers `source` under a freshly allocated slot tagged with
    /// `owner`, returning the slot's index.
    pub fn register<S: mio::Evented>(
        &mut self,
        source: &S,
        mode: Interest,
        owner: usize,
    ) -> io::Result<usize> {
        let index = self.tokens.len();
        let token = Token(self.next_token);
        self.next_token += 1;

        self.poll
            .register(source, token, mode.to_ready(), PollOpt::edge())?;

        self.tokens.push(token);
        self.interests.push(mode);
        self.owners.push(owner);
        Ok(index)
    }

    /// Switches the interest of an already registered slot.
    pub fn set_mode<S: mio::Evented>(
        &mut self,
        index: usize,
        source: &S,
        mode: Interest,
    ) -> io::Result<()> {
        self.poll
            .reregister(source, self.tokens[index], mode.to_ready(), PollOpt::edge())?;
        self.interests[index] = mode;
        Ok(())
    }

    /// Schedules `index` for removal; the slot is actually dropped at the top
    /// of the next `poll` call so iteration over a readiness sweep stays
    /// stable.
    pub fn unregister(&mut self, index: usize) {
        self.pending_removals.push(index);
    }

    /// Drains pending removals, swap-removing each bookkeeping entry. The
    /// kernel side needs no explicit deregistration: the caller closes the
    /// socket when it removes a Connection, and closing an fd drops its
    /// epoll association for free. `on_moved(owner, new_index)` is invoked
    /// once per swap so the caller can fix up the reactor index it cached on
    /// that owner's own record.
    pub fn apply_removals<Moved: FnMut(usize, usize)>(&mut self, mut on_moved: Moved) {
        // Largest index first so earlier swaps never invalidate a later one.
        self.pending_removals.sort_unstable();
        self.pending_removals.dedup();
        while let Some(index) = self.pending_removals.pop() {
            let last = self.tokens.len() - 1;
            if index != last {
                self.tokens.swap(index, last);
                self.interests.swap(index, last);
                self.owners.swap(index, last);
                on_moved(self.owners[index], index);
            }
            self.tokens.pop();
            self.interests.pop();
            self.owners.pop();
        }
    }

    /// Waits up to `timeout` for readiness, returning zero-or-more (owner,
    /// readiness) pairs. A `None` timeout blocks indefinitely. Signal
    /// interruption and other transient poll failures are folded into
    /// "nothing became ready" rather than propagated.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Vec<(usize, Readiness)> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(_) => (),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => return Vec::new(),
            Err(_) => return Vec::new(),
        }

        let mut ready = Vec::new();
        for event in &self.events {
            if let Some(index) = self.tokens.iter().position(|t| *t == event.token()) {
                ready.push((self.owners[index], Readiness::from_event(&event)));
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::UdpSocket;

    fn socket(port: u16) -> UdpSocket {
        UdpSocket::bind(&format!("127.0.0.1:{}", port).parse().unwrap()).unwrap()
    }

    #[test]
    fn test_register_and_unregister_keep_parallel_lengths() {
        let mut reactor = Reactor::new(32).unwrap();
        let a = socket(0);
        let b = socket(0);

        let ia = reactor.register(&a, Interest::Read, 100).unwrap();
        let _ib = reactor.register(&b, Interest::Read, 200).unwrap();
        assert_eq!(reactor.len(), 2);

        reactor.unregister(ia);
        reactor.apply_removals(|_owner, _index| {});
        assert_eq!(reactor.len(), 1);
        assert_eq!(reactor.tokens.len(), reactor.interests.len());
        assert_eq!(reactor.tokens.len(), reactor.owners.len());
    }

    #[test]
    fn test_swap_remove_reports_moved_owner() {
        let mut reactor = Reactor::new(32).unwrap();
        let a = socket(0);
        let b = socket(0);
        let c = socket(0);

        reactor.register(&a, Interest::Read, 10).unwrap();
        reactor.register(&b, Interest::Read, 20).unwrap();
        reactor.register(&c, Interest::Read, 30).unwrap();

        reactor.unregister(0);
        let mut moved = None;
        reactor.apply_removals(|owner, index| moved = Some((owner, index)));

        assert_eq!(moved, Some((30, 0)));
        assert_eq!(reactor.len(), 2);
    }

    #[test]
    fn test_poll_empty_returns_no_readiness() {
        let mut reactor = Reactor::new(32).unwrap();
        let ready = reactor.poll(Some(Duration::from_millis(0)));
        assert!(ready.is_empty());
    }
}
