use crate::address::{Address, Transport};
use crate::peer::{PeerMap, PeerStatus};
use crate::transport::{TcpSocket, UdpSocket};
use std::net::SocketAddr;
use std::time::Instant;

pub type ConnId = usize;

/// Whether a Connection accepts new peers/datagrams or speaks for a single
/// established peer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Listening,
    Connected,
}

/// The underlying non-blocking socket a Connection drives. TCP listeners and
/// TCP peers use distinct mio types; a UDP listener and a UDP "connection"
/// both wrap the same bound socket (see module docs on `Role`).
pub enum Socket {
    TcpListener(mio::net::TcpListener),
    TcpStream(TcpSocket),
    Udp(UdpSocket),
}

/// Peer bookkeeping attached to a Connection. A TCP listener has none of its
/// own (each accepted peer gets its own Connection); a connected TCP or UDP
/// Connection speaks for exactly one remote address; a listening UDP
/// Connection multiplexes every remote address that has sent it a datagram.
pub enum PeerState {
    None,
    Single(PeerStatus),
    Multiple(PeerMap),
}

impl PeerState {
    pub fn single_mut(&mut self) -> &mut PeerStatus {
        match self {
            PeerState::Single(status) => status,
            _ => panic!("expected a single-peer Connection"),
        }
    }

    pub fn multiple_mut(&mut self) -> &mut PeerMap {
        match self {
            PeerState::Multiple(map) => map,
            _ => panic!("expected a listening UDP Connection"),
        }
    }
}

/// Per-socket state tracked by the engine. Mirrors the wire-facing fields
/// exposed to callbacks (`transport`, `remote_addr`, `reply_id`) plus the
/// bookkeeping needed to drive it.
pub struct Connection {
    pub transport: Transport,
    pub local_address: Address,
    pub remote_addr: Option<SocketAddr>,
    pub role: Role,
    pub socket: Socket,
    pub reactor_index: usize,
    /// `reply_id` of the event currently being dispatched to the user, or 0.
    pub last_seen_reply_id: u16,
    pub user_context: Option<Box<dyn std::any::Any>>,
    /// Set once a TCP connect initiated here completes (write-ready fires).
    pub connect_pending: bool,
    /// Unsent bytes left over from a `send` that would have blocked.
    pub write_backlog: Vec<u8>,
    pub peer_state: PeerState,
}

impl Connection {
    pub fn new_tcp_listener(
        local_address: Address,
        listener: mio::net::TcpListener,
        reactor_index: usize,
    ) -> Connection {
        Connection {
            transport: Transport::Tcp,
            local_address,
            remote_addr: None,
            role: Role::Listening,
            socket: Socket::TcpListener(listener),
            reactor_index,
            last_seen_reply_id: 0,
            user_context: None,
            connect_pending: false,
            write_backlog: Vec::new(),
            peer_state: PeerState::None,
        }
    }

    pub fn new_tcp_peer(
        local_address: Address,
        stream: TcpSocket,
        remote_addr: SocketAddr,
        reactor_index: usize,
        connect_pending: bool,
        now: Instant,
    ) -> Connection {
        Connection {
            transport: Transport::Tcp,
            local_address,
            remote_addr: Some(remote_addr),
            role: Role::Connected,
            socket: Socket::TcpStream(stream),
            reactor_index,
            last_seen_reply_id: 0,
            user_context: None,
            connect_pending,
            write_backlog: Vec::new(),
            peer_state: PeerState::Single(PeerStatus::new(now)),
        }
    }

    pub fn new_udp(
        local_address: Address,
        socket: UdpSocket,
        role: Role,
        remote_addr: Option<SocketAddr>,
        reactor_index: usize,
        now: Instant,
    ) -> Connection {
        let peer_state = match role {
            Role::Listening => PeerState::Multiple(PeerMap::new()),
            Role::Connected => PeerState::Single(PeerStatus::new(now)),
        };
        Connection {
            transport: Transport::Udp,
            local_address,
            remote_addr,
            role,
            socket: Socket::Udp(socket),
            reactor_index,
            last_seen_reply_id: 0,
            user_context: None,
            connect_pending: false,
            write_backlog: Vec::new(),
            peer_state,
        }
    }

    #[inline]
    pub fn has_backlog(&self) -> bool {
        !self.write_backlog.is_empty()
    }
}
