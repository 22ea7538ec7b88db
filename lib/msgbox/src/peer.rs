use crate::databuffer::{DataBuffer, HEADER_SIZE};
use crate::header::Header;
use hashbrown::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// A TCP message under construction: the full sized buffer plus how much of
/// the payload is still unread.
pub struct Reassembly {
    pub buffer: DataBuffer,
    pub waiting_suffix: usize,
}

impl Reassembly {
    #[inline]
    pub fn filled_so_far(&self) -> usize {
        self.buffer.len() - self.waiting_suffix
    }

    /// The still-unwritten tail of the payload, ready for a `read` call.
    #[inline]
    pub fn suffix_mut(&mut self) -> &mut [u8] {
        let filled = self.filled_so_far();
        &mut self.buffer.payload_mut()[filled..]
    }
}

/// A request issued to this peer, awaiting its reply.
pub struct PendingRequest {
    pub context: Box<dyn std::any::Any>,
    pub issued_at: Instant,
}

/// Library-internal state for one remote endpoint: reassembly progress,
/// reply-id allocation, and outstanding request contexts.
pub struct PeerStatus {
    pub last_seen_at: Instant,
    pub next_reply_id: u16,
    pub reply_contexts: HashMap<u16, PendingRequest>,
    pub reassembly: Option<Reassembly>,
    /// Header bytes read so far for a message whose header hasn't arrived in
    /// full yet (TCP only; a single `read` can return fewer than 8 bytes).
    pub header_scratch: Vec<u8>,
}

impl PeerStatus {
    pub fn new(now: Instant) -> PeerStatus {
        PeerStatus {
            last_seen_at: now,
            next_reply_id: 1,
            reply_contexts: HashMap::new(),
            reassembly: None,
            header_scratch: Vec::with_capacity(HEADER_SIZE),
        }
    }

    /// Allocates the next reply-id, wrapping past zero (zero is reserved for
    /// one-way messages).
    pub fn allocate_reply_id(&mut self) -> u16 {
        let id = self.next_reply_id;
        self.next_reply_id = self.next_reply_id.wrapping_add(1);
        if self.next_reply_id == 0 {
            self.next_reply_id = 1;
        }
        id
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_seen_at = now;
    }

    /// Begins reassembly for a freshly decoded header, allocating a buffer
    /// sized to the full frame.
    pub fn start_reassembly(&mut self, header: Header) {
        let mut buffer = DataBuffer::new_data_space(header.num_bytes as usize);
        header.encode(&mut buffer);
        self.reassembly = Some(Reassembly {
            waiting_suffix: header.num_bytes as usize,
            buffer,
        });
    }
}

/// Map from remote address to per-peer state, created on first contact and
/// removed when the connection closes or is lost.
pub struct PeerMap {
    peers: HashMap<SocketAddr, PeerStatus>,
}

impl PeerMap {
    pub fn new() -> PeerMap {
        PeerMap {
            peers: HashMap::new(),
        }
    }

    /// Looks up the peer, creating it (and reporting that it's new) on first
    /// contact.
    pub fn get_or_create(&mut self, addr: SocketAddr, now: Instant) -> (&mut PeerStatus, bool) {
        let is_new = !self.peers.contains_key(&addr);
        let status = self.peers.entry(addr).or_insert_with(|| PeerStatus::new(now));
        (status, is_new)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerStatus> {
        self.peers.get_mut(addr)
    }

    /// All peers, for sweeps that need to visit every one (request timeout
    /// scanning).
    pub fn peers_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut PeerStatus)> {
        self.peers.iter_mut()
    }

    /// Removes the peer, returning any requests still awaiting a reply so the
    /// caller can release their contexts without invoking the reply callback.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerStatus> {
        self.peers.remove(addr)
    }
}
