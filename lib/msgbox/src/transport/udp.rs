use super::UdpSocket;
use crate::databuffer::{DataBuffer, HEADER_SIZE};
use crate::error::{socket_error, ErrorKind, NetworkError, NetworkResult};
use crate::header::Header;
use std::net::SocketAddr;

/// Largest payload a single datagram can carry at the kernel's UDP ceiling.
pub const MAX_DATAGRAM: usize = 65_536;

/// Receives one complete datagram and decodes its header. UDP has no partial-
/// read path: the kernel hands back a whole datagram or nothing.
pub fn recv_datagram(socket: &UdpSocket, scratch: &mut [u8]) -> NetworkResult<(Header, DataBuffer, SocketAddr)> {
    let (n, addr) = socket
        .recv_from(scratch)
        .map_err(|err| socket_error("recvfrom", err))?;

    if n < HEADER_SIZE {
        return Err(NetworkError::Fatal(ErrorKind::Protocol(
            "truncated header on UDP datagram".to_string(),
        )));
    }

    let header = Header::decode(&scratch[..HEADER_SIZE])?;
    let mut buffer = DataBuffer::new_data_space(n - HEADER_SIZE);
    buffer.header_slice_mut().copy_from_slice(&scratch[..HEADER_SIZE]);
    buffer.payload_mut().copy_from_slice(&scratch[HEADER_SIZE..n]);
    Ok((header, buffer, addr))
}

/// Sends a complete `[header][payload]` datagram to `remote`. UDP sends are
/// all-or-nothing from userspace's point of view; there is no partial-write
/// buffering to do.
pub fn send_datagram(socket: &UdpSocket, remote: SocketAddr, frame: &[u8]) -> NetworkResult<()> {
    socket
        .send_to(frame, &remote)
        .map(|_| ())
        .map_err(|err| socket_error("sendto", err))
}

/// Sends to the already-connected peer address of a UDP client connection.
pub fn send_connected(socket: &UdpSocket, frame: &[u8]) -> NetworkResult<()> {
    socket.send(frame).map(|_| ()).map_err(|err| socket_error("send", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Kind;

    #[test]
    fn test_roundtrip_over_loopback() {
        let server = UdpSocket::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let client = UdpSocket::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut frame = DataBuffer::new_data(b"why hello");
        Header {
            kind: Kind::OneWay,
            reply_id: 0,
            num_bytes: 9,
        }
        .encode(&mut frame);

        send_datagram(&client, server_addr, frame.wire()).unwrap();

        let mut scratch = [0u8; MAX_DATAGRAM];
        // Best effort: loopback UDP delivery is effectively synchronous here.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let (header, buf, from) = recv_datagram(&server, &mut scratch).unwrap();

        assert_eq!(header.num_bytes, 9);
        assert_eq!(buf.payload(), b"why hello");
        assert_eq!(from, client.local_addr().unwrap());
    }
}
