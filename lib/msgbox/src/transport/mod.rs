pub mod tcp;
pub mod udp;

use crate::error::{socket_error, NetworkResult};
use net2::TcpBuilder;
use std::net::SocketAddr;

pub type TcpSocket = mio::net::TcpStream;
pub type UdpSocket = mio::net::UdpSocket;

/// Binds a non-blocking TCP listener with `SO_REUSEADDR` set, since mio's own
/// `TcpListener::bind` doesn't expose socket options before the call.
pub fn bind_tcp_listener(addr: SocketAddr) -> NetworkResult<mio::net::TcpListener> {
    let builder = if addr.is_ipv4() {
        TcpBuilder::new_v4()
    } else {
        TcpBuilder::new_v6()
    }
    .map_err(|err| socket_error("socket", err))?;

    builder
        .reuse_address(true)
        .map_err(|err| socket_error("setsockopt", err))?;
    builder.bind(addr).map_err(|err| socket_error("bind", err))?;
    let std_listener = builder
        .listen(1024)
        .map_err(|err| socket_error("listen", err))?;
    std_listener
        .set_nonblocking(true)
        .map_err(|err| socket_error("fcntl", err))?;

    mio::net::TcpListener::from_std(std_listener).map_err(|err| socket_error("from_std", err))
}

pub fn connect_tcp(addr: SocketAddr) -> NetworkResult<TcpSocket> {
    TcpSocket::connect(&addr).map_err(|err| socket_error("connect", err))
}

pub fn bind_udp(addr: SocketAddr) -> NetworkResult<UdpSocket> {
    UdpSocket::bind(&addr).map_err(|err| socket_error("bind", err))
}

pub fn connect_udp(socket: &UdpSocket, addr: SocketAddr) -> NetworkResult<()> {
    socket.connect(addr).map_err(|err| socket_error("connect", err))
}
