use crate::address::{Address, Host, Transport};
use crate::connection::{ConnId, Connection, PeerState, Role, Socket};
use crate::databuffer::DataBuffer;
use crate::error::{socket_error, ErrorKind, NetworkError, NetworkResult};
use crate::handler::{ConnInfo, Event, Handler};
use crate::header::{Header, Kind};
use crate::peer::PendingRequest;
use crate::reactor::{Interest, Reactor, Readiness};
use crate::scheduler::{QueuedPayload, Scheduled, Scheduler, Tag};
use crate::transport::{self, tcp, udp};
use slog::Logger;
use std::any::Any;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

const DEFAULT_EVENT_CAPACITY: usize = 1024;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables for a fresh `Engine`. Everything defaults to what the original
/// C library hard-codes; only `log` and `request_timeout` are realistically
/// worth overriding.
pub struct EngineConfig {
    pub event_capacity: usize,
    pub request_timeout: Duration,
    pub log: Logger,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log: Logger::root(slog::Discard, slog::o!()),
        }
    }
}

fn to_socket_addr(addr: &Address) -> SocketAddr {
    let ip = match addr.host {
        Host::Wildcard => Ipv4Addr::UNSPECIFIED,
        Host::Addr(ip) => ip,
    };
    SocketAddr::from((ip, addr.port))
}

/// The reactor-driven transport engine. Owns every `Connection`, the
/// readiness multiplexer, and the deferred event queue; drives a
/// user-supplied `Handler` to completion one `run_loop` tick at a time.
pub struct Engine<H: Handler> {
    connections: Vec<Option<Connection>>,
    free_slots: Vec<ConnId>,
    reactor: Reactor,
    scheduler: Scheduler,
    pending_teardown: Vec<ConnId>,
    recv_scratch: Vec<u8>,
    request_timeout: Duration,
    handler: H,
    log: Logger,
}

impl<H: Handler> Engine<H> {
    pub fn new(handler: H) -> std::io::Result<Engine<H>> {
        Engine::with_config(handler, EngineConfig::default())
    }

    /// Convenience constructor for overriding just the request/reply
    /// deadline, leaving event capacity and logging at their defaults.
    pub fn with_request_timeout(handler: H, request_timeout: Duration) -> std::io::Result<Engine<H>> {
        Engine::with_config(
            handler,
            EngineConfig {
                request_timeout,
                ..EngineConfig::default()
            },
        )
    }

    pub fn with_config(handler: H, config: EngineConfig) -> std::io::Result<Engine<H>> {
        Ok(Engine {
            connections: Vec::new(),
            free_slots: Vec::new(),
            reactor: Reactor::new(config.event_capacity)?,
            scheduler: Scheduler::new(),
            pending_teardown: Vec::new(),
            recv_scratch: vec![0u8; udp::MAX_DATAGRAM],
            request_timeout: config.request_timeout,
            handler,
            log: config.log,
        })
    }

    fn handle(&mut self) -> EngineHandle<'_> {
        EngineHandle {
            connections: &mut self.connections,
            free_slots: &mut self.free_slots,
            reactor: &mut self.reactor,
            scheduler: &mut self.scheduler,
            pending_teardown: &mut self.pending_teardown,
            recv_scratch: &mut self.recv_scratch,
            request_timeout: self.request_timeout,
            log: &self.log,
        }
    }

    pub fn listen(&mut self, address: &str, user_context: Option<Box<dyn Any>>) -> NetworkResult<ConnId> {
        self.handle().listen(address, user_context)
    }

    pub fn connect(&mut self, address: &str, user_context: Option<Box<dyn Any>>) -> NetworkResult<ConnId> {
        self.handle().connect(address, user_context)
    }

    pub fn unlisten(&mut self, conn: ConnId) -> NetworkResult<()> {
        self.handle().unlisten(conn)
    }

    pub fn disconnect(&mut self, conn: ConnId) -> NetworkResult<()> {
        self.handle().disconnect(conn)
    }

    pub fn send(&mut self, conn: ConnId, data: &[u8]) -> NetworkResult<()> {
        self.handle().send(conn, data)
    }

    pub fn get(&mut self, conn: ConnId, data: &[u8], reply_context: Box<dyn Any>) -> NetworkResult<u16> {
        self.handle().get(conn, data, reply_context)
    }

    pub fn context_of(&self, conn: ConnId) -> Option<&dyn Any> {
        self.connections
            .get(conn)
            .and_then(|c| c.as_ref())
            .and_then(|c| c.user_context.as_deref())
    }

    /// Drives one iteration: flush last cycle's teardowns, scan for expired
    /// requests, poll for readiness, service every ready socket, then drain
    /// and dispatch whatever landed on the event queue. `timeout_ms < 0`
    /// blocks indefinitely when nothing is queued; `0` never blocks.
    pub fn run_loop(&mut self, timeout_ms: i64) {
        let mut core = self.handle();
        core.finalize_removals();
        core.scan_request_timeouts();
        let timeout = core.effective_timeout(timeout_ms);
        let ready = core.poll(timeout);
        for (conn_id, readiness) in ready {
            core.service_readiness(conn_id, readiness);
        }
        drop(core);
        self.drain_events();
    }

    /// Number of live connections, for tests and demos that want to know
    /// when the last peer has gone away.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_some()).count()
    }

    fn drain_events(&mut self) {
        let Engine {
            connections,
            free_slots,
            reactor,
            scheduler,
            pending_teardown,
            recv_scratch,
            request_timeout,
            handler,
            log,
        } = self;

        let batch = scheduler.take();
        for item in batch {
            let conn_id = item.conn;
            let present = match connections.get_mut(conn_id).and_then(|c| c.as_mut()) {
                Some(conn) => {
                    if let Some(addr) = item.info.remote_addr {
                        conn.remote_addr = Some(addr);
                    }
                    conn.last_seen_reply_id = match &item.payload {
                        QueuedPayload::Request { reply_id, .. } => *reply_id,
                        _ => 0,
                    };
                    true
                }
                None => false,
            };
            if !present {
                continue;
            }

            let info = item.info;
            let mut eng = EngineHandle {
                connections: &mut *connections,
                free_slots: &mut *free_slots,
                reactor: &mut *reactor,
                scheduler: &mut *scheduler,
                pending_teardown: &mut *pending_teardown,
                recv_scratch: &mut *recv_scratch,
                request_timeout: *request_timeout,
                log: &*log,
            };

            match item.payload {
                QueuedPayload::None => {
                    let event = match item.tag {
                        Tag::Listening => Event::Listening,
                        Tag::ListeningEnded => Event::ListeningEnded,
                        Tag::ConnectionReady => Event::ConnectionReady,
                        Tag::ConnectionClosed => Event::ConnectionClosed,
                        Tag::ConnectionLost => Event::ConnectionLost,
                        other => panic!("tag {:?} scheduled with no payload", other),
                    };
                    handler.on_event(&mut eng, conn_id, info, event);
                }
                QueuedPayload::Data(data) => {
                    handler.on_event(&mut eng, conn_id, info, Event::Message { data: data.payload() });
                }
                QueuedPayload::Request { reply_id, data } => {
                    handler.on_event(&mut eng, conn_id, info, Event::Request { reply_id, data: data.payload() });
                }
                QueuedPayload::Reply { reply_id, data, context } => {
                    handler.on_event(&mut eng, conn_id, info, Event::Reply { reply_id, data: data.payload(), context });
                }
                QueuedPayload::Error(kind) => {
                    handler.on_event(&mut eng, conn_id, info, Event::Error(kind));
                }
            }
        }
    }
}

/// Everything `Engine` exposes to a running `Handler`, borrowed apart from
/// `handler` itself so a callback can call back into the engine (including
/// onto the very Connection its event is about) without the compiler seeing
/// two live `&mut Engine` at once.
pub struct EngineHandle<'a> {
    connections: &'a mut Vec<Option<Connection>>,
    free_slots: &'a mut Vec<ConnId>,
    reactor: &'a mut Reactor,
    scheduler: &'a mut Scheduler,
    pending_teardown: &'a mut Vec<ConnId>,
    recv_scratch: &'a mut Vec<u8>,
    request_timeout: Duration,
    log: &'a Logger,
}

impl<'a> EngineHandle<'a> {
    fn allocate_slot(&mut self) -> ConnId {
        if let Some(id) = self.free_slots.pop() {
            id
        } else {
            self.connections.push(None);
            self.connections.len() - 1
        }
    }

    fn free_slot(&mut self, conn_id: ConnId) {
        self.connections[conn_id] = None;
        self.free_slots.push(conn_id);
    }

    fn queue_event(&mut self, conn: ConnId, info: ConnInfo, tag: Tag, payload: QueuedPayload) {
        self.scheduler.push(Scheduled { conn, info, tag, payload });
    }

    fn queue_error(&mut self, conn: ConnId, remote: Option<SocketAddr>, kind: ErrorKind) {
        let transport = self
            .connections
            .get(conn)
            .and_then(|c| c.as_ref())
            .map(|c| c.transport)
            .unwrap_or(Transport::Tcp);
        slog::warn!(self.log, "error"; "conn" => conn, "detail" => kind.message());
        self.queue_event(
            conn,
            ConnInfo { transport, remote_addr: remote },
            Tag::Error,
            QueuedPayload::Error(kind),
        );
    }

    fn begin_teardown(&mut self, conn_id: ConnId) {
        if self.pending_teardown.contains(&conn_id) {
            return;
        }
        if let Some(conn) = self.connections[conn_id].as_ref() {
            self.reactor.unregister(conn.reactor_index);
        }
        self.pending_teardown.push(conn_id);
    }

    /// Flushes removals the previous cycle scheduled: first lets the reactor
    /// swap-remove its bookkeeping and report which owners moved, then frees
    /// the actual `Connection` slots. Doing this in two steps (reactor, then
    /// slab) keeps a `ConnId` from being handed to a brand-new connection
    /// before the reactor has forgotten the old socket's slot.
    fn finalize_removals(&mut self) {
        let connections = &mut *self.connections;
        self.reactor.apply_removals(|owner, new_index| {
            if let Some(conn) = connections.get_mut(owner).and_then(|c| c.as_mut()) {
                conn.reactor_index = new_index;
            }
        });
        for conn_id in self.pending_teardown.drain(..) {
            self.connections[conn_id] = None;
            self.free_slots.push(conn_id);
        }
    }

    fn effective_timeout(&self, timeout_ms: i64) -> Option<Duration> {
        if !self.scheduler.is_empty() {
            Some(Duration::from_millis(0))
        } else if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Vec<(ConnId, Readiness)> {
        self.reactor.poll(timeout)
    }

    fn scan_request_timeouts(&mut self) {
        let now = Instant::now();
        let deadline = self.request_timeout;
        let mut expirations: Vec<(ConnId, Transport, Option<SocketAddr>)> = Vec::new();

        for conn_id in 0..self.connections.len() {
            let conn = match self.connections[conn_id].as_mut() {
                Some(c) => c,
                None => continue,
            };
            let transport = conn.transport;
            match &mut conn.peer_state {
                PeerState::Single(status) => {
                    let expired: Vec<u16> = status
                        .reply_contexts
                        .iter()
                        .filter(|(_, req)| now.duration_since(req.issued_at) >= deadline)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in expired {
                        status.reply_contexts.remove(&id);
                        expirations.push((conn_id, transport, None));
                    }
                }
                PeerState::Multiple(map) => {
                    for (addr, status) in map.peers_mut() {
                        let addr = *addr;
                        let expired: Vec<u16> = status
                            .reply_contexts
                            .iter()
                            .filter(|(_, req)| now.duration_since(req.issued_at) >= deadline)
                            .map(|(id, _)| *id)
                            .collect();
                        for id in expired {
                            status.reply_contexts.remove(&id);
                            expirations.push((conn_id, transport, Some(addr)));
                        }
                    }
                }
                PeerState::None => {}
            }
        }

        for (conn_id, transport, addr) in expirations {
            let message = match transport {
                Transport::Udp => "udp get timed out".to_string(),
                Transport::Tcp => "tcp get timed out".to_string(),
            };
            self.queue_error(conn_id, addr, ErrorKind::TimedOut(message));
        }
    }

    fn service_readiness(&mut self, conn_id: ConnId, readiness: Readiness) {
        let now = Instant::now();
        let (transport, role, connect_pending) = match self.connections[conn_id].as_ref() {
            Some(c) => (c.transport, c.role, c.connect_pending),
            None => return,
        };

        match (transport, role) {
            (Transport::Tcp, Role::Listening) => {
                if readiness.readable {
                    self.service_tcp_accept(conn_id, now);
                }
            }
            (Transport::Tcp, Role::Connected) if connect_pending => {
                if readiness.writable {
                    self.service_tcp_connect_complete(conn_id);
                }
            }
            (Transport::Tcp, Role::Connected) => {
                if readiness.readable {
                    self.service_tcp_read(conn_id, now);
                }
                if readiness.writable && self.connections[conn_id].is_some() && !self.pending_teardown.contains(&conn_id) {
                    self.service_tcp_write(conn_id);
                }
            }
            (Transport::Udp, _) => {
                if readiness.readable {
                    self.service_udp_read(conn_id, now);
                }
            }
        }
    }

    fn service_tcp_accept(&mut self, conn_id: ConnId, now: Instant) {
        loop {
            let accept_result = match self.connections[conn_id].as_ref().map(|c| &c.socket) {
                Some(Socket::TcpListener(listener)) => tcp::accept(listener),
                _ => return,
            };
            match accept_result {
                Ok((stream, remote)) => {
                    let local_address = self.connections[conn_id].as_ref().unwrap().local_address;
                    let peer_conn_id = self.allocate_slot();
                    match self.reactor.register(&stream, Interest::Read, peer_conn_id) {
                        Ok(index) => {
                            let conn = Connection::new_tcp_peer(local_address, stream, remote, index, false, now);
                            self.connections[peer_conn_id] = Some(conn);
                            self.queue_event(
                                peer_conn_id,
                                ConnInfo { transport: Transport::Tcp, remote_addr: Some(remote) },
                                Tag::ConnectionReady,
                                QueuedPayload::None,
                            );
                        }
                        Err(err) => {
                            self.free_slot(peer_conn_id);
                            slog::warn!(self.log, "failed to register accepted peer"; "error" => %err);
                        }
                    }
                }
                Err(NetworkError::Wait) => return,
                Err(NetworkError::Fatal(kind)) => {
                    self.queue_error(conn_id, None, kind);
                    return;
                }
            }
        }
    }

    fn service_tcp_connect_complete(&mut self, conn_id: ConnId) {
        let result = match self.connections[conn_id].as_ref().map(|c| &c.socket) {
            Some(Socket::TcpStream(stream)) => tcp::check_connect(stream),
            _ => return,
        };
        match result {
            Ok(()) => {
                let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                if let Some(conn) = self.connections[conn_id].as_mut() {
                    conn.connect_pending = false;
                }
                if let Some(conn) = self.connections[conn_id].as_ref() {
                    if let Socket::TcpStream(stream) = &conn.socket {
                        let _ = self.reactor.set_mode(conn.reactor_index, stream, Interest::Read);
                    }
                }
                self.queue_event(
                    conn_id,
                    ConnInfo { transport: Transport::Tcp, remote_addr: remote },
                    Tag::ConnectionReady,
                    QueuedPayload::None,
                );
            }
            Err(NetworkError::Fatal(kind)) => {
                let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                self.queue_error(conn_id, remote, kind);
                self.begin_teardown(conn_id);
            }
            Err(NetworkError::Wait) => {}
        }
    }

    fn service_tcp_read(&mut self, conn_id: ConnId, now: Instant) {
        loop {
            let outcome = {
                let conn = match self.connections[conn_id].as_mut() {
                    Some(c) => c,
                    None => return,
                };
                let stream = match &mut conn.socket {
                    Socket::TcpStream(s) => s,
                    _ => return,
                };
                let peer = conn.peer_state.single_mut();
                tcp::read_frame(stream, peer)
            };
            match outcome {
                Ok(tcp::ReadOutcome::Frame(header, buffer)) => {
                    let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                    let info = ConnInfo { transport: Transport::Tcp, remote_addr: remote };
                    self.dispatch_frame(conn_id, info, header, buffer, now);
                    if self.connections[conn_id].is_none() || self.pending_teardown.contains(&conn_id) {
                        return;
                    }
                }
                Ok(tcp::ReadOutcome::Closed) => {
                    let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                    self.queue_event(
                        conn_id,
                        ConnInfo { transport: Transport::Tcp, remote_addr: remote },
                        Tag::ConnectionLost,
                        QueuedPayload::None,
                    );
                    self.begin_teardown(conn_id);
                    return;
                }
                Err(NetworkError::Wait) => return,
                Err(NetworkError::Fatal(kind)) => {
                    let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                    self.queue_error(conn_id, remote, kind);
                    self.begin_teardown(conn_id);
                    return;
                }
            }
        }
    }

    fn service_tcp_write(&mut self, conn_id: ConnId) {
        let result = {
            let conn = match self.connections[conn_id].as_mut() {
                Some(c) => c,
                None => return,
            };
            let stream = match &mut conn.socket {
                Socket::TcpStream(s) => s,
                _ => return,
            };
            tcp::flush_backlog(stream, &mut conn.write_backlog)
        };
        match result {
            Ok(()) => {
                if let Some(conn) = self.connections[conn_id].as_ref() {
                    if !conn.has_backlog() {
                        if let Socket::TcpStream(stream) = &conn.socket {
                            let _ = self.reactor.set_mode(conn.reactor_index, stream, Interest::Read);
                        }
                    }
                }
            }
            Err(NetworkError::Wait) => {}
            Err(NetworkError::Fatal(kind)) => {
                let remote = self.connections[conn_id].as_ref().and_then(|c| c.remote_addr);
                self.queue_error(conn_id, remote, kind);
                self.begin_teardown(conn_id);
            }
        }
    }

    fn service_udp_read(&mut self, conn_id: ConnId, now: Instant) {
        loop {
            let recv_result = {
                let conn = match self.connections[conn_id].as_ref() {
                    Some(c) => c,
                    None => return,
                };
                let socket = match &conn.socket {
                    Socket::Udp(s) => s,
                    _ => return,
                };
                udp::recv_datagram(socket, self.recv_scratch)
            };
            match recv_result {
                Ok((header, buffer, remote)) => {
                    let is_new = self.ensure_peer(conn_id, remote);
                    let info = ConnInfo { transport: Transport::Udp, remote_addr: Some(remote) };
                    if is_new {
                        self.queue_event(conn_id, info, Tag::ConnectionReady, QueuedPayload::None);
                    }
                    self.dispatch_frame(conn_id, info, header, buffer, now);
                    if self.connections[conn_id].is_none() {
                        return;
                    }
                }
                Err(NetworkError::Wait) => return,
                Err(NetworkError::Fatal(kind)) => {
                    self.queue_error(conn_id, None, kind);
                    return;
                }
            }
        }
    }

    fn ensure_peer(&mut self, conn_id: ConnId, remote: SocketAddr) -> bool {
        let now = Instant::now();
        match self.connections[conn_id].as_mut().map(|c| &mut c.peer_state) {
            Some(PeerState::Single(status)) => {
                status.touch(now);
                false
            }
            Some(PeerState::Multiple(map)) => {
                let (status, is_new) = map.get_or_create(remote, now);
                status.touch(now);
                is_new
            }
            _ => false,
        }
    }

    fn dispatch_frame(&mut self, conn_id: ConnId, info: ConnInfo, header: Header, buffer: DataBuffer, now: Instant) {
        if let Some(conn) = self.connections[conn_id].as_mut() {
            match &mut conn.peer_state {
                PeerState::Single(status) => status.touch(now),
                PeerState::Multiple(map) => {
                    if let Some(addr) = info.remote_addr {
                        if let Some(status) = map.get_mut(&addr) {
                            status.touch(now);
                        }
                    }
                }
                PeerState::None => {}
            }
        }

        match header.kind {
            Kind::Close => {
                self.queue_event(conn_id, info, Tag::ConnectionClosed, QueuedPayload::None);
                self.teardown_peer_or_connection(conn_id, info.remote_addr);
            }
            Kind::Heartbeat => {}
            Kind::OneWay => {
                self.queue_event(conn_id, info, Tag::Message, QueuedPayload::Data(buffer));
            }
            Kind::Request => {
                self.queue_event(
                    conn_id,
                    info,
                    Tag::Request,
                    QueuedPayload::Request { reply_id: header.reply_id, data: buffer },
                );
            }
            Kind::Reply => match self.take_reply_context(conn_id, info.remote_addr, header.reply_id) {
                Some(context) => {
                    self.queue_event(
                        conn_id,
                        info,
                        Tag::Reply,
                        QueuedPayload::Reply { reply_id: header.reply_id, data: buffer, context },
                    );
                }
                None => {
                    self.queue_error(
                        conn_id,
                        info.remote_addr,
                        ErrorKind::Protocol(format!("unrecognized reply_id {}", header.reply_id)),
                    );
                }
            },
        }
    }

    fn teardown_peer_or_connection(&mut self, conn_id: ConnId, remote: Option<SocketAddr>) {
        let is_multi = matches!(
            self.connections[conn_id].as_ref().map(|c| &c.peer_state),
            Some(PeerState::Multiple(_))
        );
        if is_multi {
            if let (Some(conn), Some(addr)) = (self.connections[conn_id].as_mut(), remote) {
                conn.peer_state.multiple_mut().remove(&addr);
            }
        } else {
            self.begin_teardown(conn_id);
        }
    }

    fn take_reply_context(&mut self, conn_id: ConnId, remote: Option<SocketAddr>, reply_id: u16) -> Option<Box<dyn Any>> {
        let conn = self.connections[conn_id].as_mut()?;
        let pending = match &mut conn.peer_state {
            PeerState::Single(status) => status.reply_contexts.remove(&reply_id),
            PeerState::Multiple(map) => map.get_mut(&remote?)?.reply_contexts.remove(&reply_id),
            PeerState::None => None,
        };
        pending.map(|p| p.context)
    }

    fn write_frame_to(&mut self, conn_id: ConnId, frame: &[u8]) -> NetworkResult<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .and_then(|c| c.as_mut())
            .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("unknown connection".to_string())))?;
        let reactor_index = conn.reactor_index;
        let role = conn.role;
        let remote_addr = conn.remote_addr;

        match &mut conn.socket {
            Socket::TcpStream(stream) => {
                let result = tcp::write_frame(stream, &mut conn.write_backlog, frame);
                if result.is_ok() && !conn.write_backlog.is_empty() {
                    let _ = self.reactor.set_mode(reactor_index, stream, Interest::ReadWrite);
                }
                result
            }
            Socket::Udp(socket) => match role {
                Role::Listening => {
                    let addr = remote_addr
                        .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("no current peer to send to".to_string())))?;
                    udp::send_datagram(socket, addr, frame)
                }
                Role::Connected => udp::send_connected(socket, frame),
            },
            Socket::TcpListener(_) => Err(NetworkError::Fatal(ErrorKind::Protocol(
                "cannot send on a listening connection".to_string(),
            ))),
        }
    }

    fn send_close_frame(&mut self, conn_id: ConnId) {
        let mut frame = DataBuffer::new_data_space(0);
        Header { kind: Kind::Close, reply_id: 0, num_bytes: 0 }.encode(&mut frame);
        let _ = self.write_frame_to(conn_id, frame.wire());
    }

    pub fn listen(&mut self, address: &str, user_context: Option<Box<dyn Any>>) -> NetworkResult<ConnId> {
        let addr = Address::parse(address)?;
        let socket_addr = to_socket_addr(&addr);

        match addr.transport {
            Transport::Tcp => {
                let listener = transport::bind_tcp_listener(socket_addr)?;
                let conn_id = self.allocate_slot();
                let index = match self.reactor.register(&listener, Interest::Read, conn_id) {
                    Ok(index) => index,
                    Err(err) => {
                        self.free_slot(conn_id);
                        return Err(socket_error("register", err));
                    }
                };
                let mut conn = Connection::new_tcp_listener(addr, listener, index);
                conn.user_context = user_context;
                self.connections[conn_id] = Some(conn);
                self.queue_event(
                    conn_id,
                    ConnInfo { transport: Transport::Tcp, remote_addr: None },
                    Tag::Listening,
                    QueuedPayload::None,
                );
                Ok(conn_id)
            }
            Transport::Udp => {
                let socket = transport::bind_udp(socket_addr)?;
                let conn_id = self.allocate_slot();
                let index = match self.reactor.register(&socket, Interest::Read, conn_id) {
                    Ok(index) => index,
                    Err(err) => {
                        self.free_slot(conn_id);
                        return Err(socket_error("register", err));
                    }
                };
                let mut conn = Connection::new_udp(addr, socket, Role::Listening, None, index, Instant::now());
                conn.user_context = user_context;
                self.connections[conn_id] = Some(conn);
                self.queue_event(
                    conn_id,
                    ConnInfo { transport: Transport::Udp, remote_addr: None },
                    Tag::Listening,
                    QueuedPayload::None,
                );
                Ok(conn_id)
            }
        }
    }

    pub fn connect(&mut self, address: &str, user_context: Option<Box<dyn Any>>) -> NetworkResult<ConnId> {
        let addr = Address::parse(address)?;
        if addr.is_wildcard() {
            return Err(NetworkError::Fatal(ErrorKind::BadAddress(format!(
                "{} cannot be used as a connect target",
                address
            ))));
        }
        let socket_addr = to_socket_addr(&addr);

        match addr.transport {
            Transport::Tcp => {
                let stream = transport::connect_tcp(socket_addr)?;
                let conn_id = self.allocate_slot();
                let index = match self.reactor.register(&stream, Interest::Write, conn_id) {
                    Ok(index) => index,
                    Err(err) => {
                        self.free_slot(conn_id);
                        return Err(socket_error("register", err));
                    }
                };
                let mut conn = Connection::new_tcp_peer(addr, stream, socket_addr, index, true, Instant::now());
                conn.user_context = user_context;
                self.connections[conn_id] = Some(conn);
                Ok(conn_id)
            }
            Transport::Udp => {
                let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
                let socket = transport::bind_udp(local)?;
                transport::connect_udp(&socket, socket_addr)?;
                let conn_id = self.allocate_slot();
                let index = match self.reactor.register(&socket, Interest::Read, conn_id) {
                    Ok(index) => index,
                    Err(err) => {
                        self.free_slot(conn_id);
                        return Err(socket_error("register", err));
                    }
                };
                let mut conn = Connection::new_udp(addr, socket, Role::Connected, Some(socket_addr), index, Instant::now());
                conn.user_context = user_context;
                self.connections[conn_id] = Some(conn);
                self.queue_event(
                    conn_id,
                    ConnInfo { transport: Transport::Udp, remote_addr: Some(socket_addr) },
                    Tag::ConnectionReady,
                    QueuedPayload::None,
                );
                Ok(conn_id)
            }
        }
    }

    pub fn unlisten(&mut self, conn_id: ConnId) -> NetworkResult<()> {
        let conn = self
            .connections
            .get(conn_id)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("unlisten called on an unknown connection".to_string())))?;
        if conn.role != Role::Listening {
            return Err(NetworkError::Fatal(ErrorKind::Protocol(
                "unlisten called on a non-listening connection".to_string(),
            )));
        }
        let transport = conn.transport;
        self.begin_teardown(conn_id);
        self.queue_event(
            conn_id,
            ConnInfo { transport, remote_addr: None },
            Tag::ListeningEnded,
            QueuedPayload::None,
        );
        Ok(())
    }

    pub fn disconnect(&mut self, conn_id: ConnId) -> NetworkResult<()> {
        let (transport, remote, is_multi) = match self.connections.get(conn_id).and_then(|c| c.as_ref()) {
            Some(c) => (c.transport, c.remote_addr, matches!(c.peer_state, PeerState::Multiple(_))),
            None => {
                return Err(NetworkError::Fatal(ErrorKind::Protocol(
                    "disconnect called on an unknown connection".to_string(),
                )))
            }
        };

        self.send_close_frame(conn_id);
        self.queue_event(
            conn_id,
            ConnInfo { transport, remote_addr: remote },
            Tag::ConnectionClosed,
            QueuedPayload::None,
        );
        if is_multi {
            if let (Some(conn), Some(addr)) = (self.connections[conn_id].as_mut(), remote) {
                conn.peer_state.multiple_mut().remove(&addr);
            }
        } else {
            self.begin_teardown(conn_id);
        }
        Ok(())
    }

    pub fn send(&mut self, conn_id: ConnId, data: &[u8]) -> NetworkResult<()> {
        let reply_id = self
            .connections
            .get(conn_id)
            .and_then(|c| c.as_ref())
            .map(|c| c.last_seen_reply_id)
            .unwrap_or(0);
        let kind = if reply_id != 0 { Kind::Reply } else { Kind::OneWay };
        let mut frame = DataBuffer::new_data(data);
        Header { kind, reply_id, num_bytes: data.len() as u32 }.encode(&mut frame);
        self.write_frame_to(conn_id, frame.wire())
    }

    pub fn get(&mut self, conn_id: ConnId, data: &[u8], reply_context: Box<dyn Any>) -> NetworkResult<u16> {
        let now = Instant::now();
        let remote = self.connections.get(conn_id).and_then(|c| c.as_ref()).and_then(|c| c.remote_addr);

        let reply_id = {
            let conn = self
                .connections
                .get_mut(conn_id)
                .and_then(|c| c.as_mut())
                .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("unknown connection".to_string())))?;
            let status = match &mut conn.peer_state {
                PeerState::Single(status) => status,
                PeerState::Multiple(map) => {
                    let addr = remote
                        .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("no current peer to request from".to_string())))?;
                    map.get_mut(&addr)
                        .ok_or_else(|| NetworkError::Fatal(ErrorKind::Protocol("unknown peer".to_string())))?
                }
                PeerState::None => {
                    return Err(NetworkError::Fatal(ErrorKind::Protocol(
                        "connection accepts no requests".to_string(),
                    )))
                }
            };
            let id = status.allocate_reply_id();
            status.reply_contexts.insert(id, PendingRequest { context: reply_context, issued_at: now });
            id
        };

        let mut frame = DataBuffer::new_data(data);
        Header { kind: Kind::Request, reply_id, num_bytes: data.len() as u32 }.encode(&mut frame);
        self.write_frame_to(conn_id, frame.wire())?;
        Ok(reply_id)
    }

    /// The `user_context` a connection was `listen`ed or `connect`ed with, if
    /// any. Mirrors `Engine::context_of` so handlers can reach it from inside
    /// a callback, where all they ever hold is this handle.
    pub fn context_of(&self, conn_id: ConnId) -> Option<&dyn Any> {
        self.connections
            .get(conn_id)
            .and_then(|c| c.as_ref())
            .and_then(|c| c.user_context.as_deref())
    }
}
