use crate::address::Transport;
use crate::connection::ConnId;
use crate::error::ErrorKind;
use std::net::SocketAddr;

/// One user-visible occurrence delivered to `Handler::on_event`. Carries the
/// payload slice and kind-specific fields in place of a raw callback struct.
pub enum Event<'a> {
    Listening,
    ListeningEnded,
    ConnectionReady,
    ConnectionClosed,
    ConnectionLost,
    Message { data: &'a [u8] },
    Request { reply_id: u16, data: &'a [u8] },
    Reply {
        reply_id: u16,
        data: &'a [u8],
        context: Box<dyn std::any::Any>,
    },
    Error(ErrorKind),
}

impl<'a> Event<'a> {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Listening => "listening",
            Event::ListeningEnded => "listening_ended",
            Event::ConnectionReady => "connection_ready",
            Event::ConnectionClosed => "connection_closed",
            Event::ConnectionLost => "connection_lost",
            Event::Message { .. } => "message",
            Event::Request { .. } => "request",
            Event::Reply { .. } => "reply",
            Event::Error(_) => "error",
        }
    }
}

/// Read-only facts about a Connection exposed alongside an event, matching
/// the connection fields a callback needs without handing out the engine's
/// internal `Connection` record.
#[derive(Debug, Copy, Clone)]
pub struct ConnInfo {
    pub transport: Transport,
    pub remote_addr: Option<SocketAddr>,
}

/// User-supplied event sink. `eng` lets the handler issue further public
/// operations (including on the very Connection the event is about) from
/// inside the callback; such calls are legal and take effect immediately or
/// at the top of the next loop iteration, per the scheduler's rules.
pub trait Handler {
    fn on_event(&mut self, eng: &mut crate::engine::EngineHandle<'_>, conn: ConnId, info: ConnInfo, event: Event<'_>);
}

/// Blanket impl so a plain closure can be used as a `Handler` for simple
/// demos and tests.
impl<F> Handler for F
where
    F: FnMut(&mut crate::engine::EngineHandle<'_>, ConnId, ConnInfo, Event<'_>),
{
    fn on_event(&mut self, eng: &mut crate::engine::EngineHandle<'_>, conn: ConnId, info: ConnInfo, event: Event<'_>) {
        self(eng, conn, info, event)
    }
}
