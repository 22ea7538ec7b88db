use super::TcpSocket;
use crate::databuffer::{DataBuffer, HEADER_SIZE};
use crate::error::{socket_error, ErrorKind, NetworkError, NetworkResult};
use crate::header::Header;
use crate::peer::PeerStatus;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Result of one attempt to drive a TCP peer's read side forward. A "not
/// enough bytes yet" outcome is signaled by `Err(NetworkError::Wait)` instead
/// of a variant here, so callers use the ordinary `?` try-again pattern.
pub enum ReadOutcome {
    /// A full `[header][payload]` frame has been reassembled.
    Frame(Header, DataBuffer),
    /// Zero-length read or a reset: the peer is gone.
    Closed,
}

pub fn accept(listener: &mio::net::TcpListener) -> NetworkResult<(TcpSocket, SocketAddr)> {
    listener.accept().map_err(|err| socket_error("accept", err))
}

/// Checks whether an async `connect()` registered for write-readiness
/// actually succeeded, via `SO_ERROR`.
pub fn check_connect(stream: &TcpSocket) -> NetworkResult<()> {
    match stream.take_error() {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(socket_error("connect", err)),
        Err(err) => Err(socket_error("connect", err)),
    }
}

/// Advances reassembly for one peer by reading everything currently
/// available off `stream`. Partial reads across calls accumulate in
/// `peer.header_scratch` (while the header itself is incomplete) and
/// `peer.reassembly` (once the header is known); no bytes are ever
/// discarded between calls.
pub fn read_frame<R: Read>(stream: &mut R, peer: &mut PeerStatus) -> NetworkResult<ReadOutcome> {
    if peer.reassembly.is_none() {
        while peer.header_scratch.len() < HEADER_SIZE {
            let mut chunk = [0u8; HEADER_SIZE];
            let want = HEADER_SIZE - peer.header_scratch.len();
            match stream.read(&mut chunk[..want]) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => peer.header_scratch.extend_from_slice(&chunk[..n]),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(NetworkError::Wait)
                }
                Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    return Ok(ReadOutcome::Closed)
                }
                Err(err) => return Err(socket_error("read", err)),
            }
        }

        let header = Header::decode(&peer.header_scratch)?;
        peer.header_scratch.clear();
        peer.start_reassembly(header);
    }

    loop {
        let reassembly = peer.reassembly.as_mut().expect("reassembly just started above");
        if reassembly.waiting_suffix == 0 {
            break;
        }
        match stream.read(reassembly.suffix_mut()) {
            Ok(0) => return Ok(ReadOutcome::Closed),
            Ok(n) => reassembly.waiting_suffix -= n,
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Err(NetworkError::Wait),
            Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset => {
                return Ok(ReadOutcome::Closed)
            }
            Err(err) => return Err(socket_error("read", err)),
        }
    }

    let reassembly = peer.reassembly.take().expect("checked above");
    let header = Header::decode_buffer(&reassembly.buffer)?;
    Ok(ReadOutcome::Frame(header, reassembly.buffer))
}

/// Writes `frame` to `stream`, buffering anything `write` couldn't accept
/// immediately rather than busy-looping on `EWOULDBLOCK`. Assumes `backlog`
/// is drained (via `flush_backlog`) before new frames are appended, so bytes
/// leave the wire in the order `send`/`get` were called.
pub fn write_frame<W: Write>(stream: &mut W, backlog: &mut Vec<u8>, frame: &[u8]) -> NetworkResult<()> {
    if !backlog.is_empty() {
        backlog.extend_from_slice(frame);
        return Ok(());
    }

    match stream.write(frame) {
        Ok(n) if n == frame.len() => Ok(()),
        Ok(n) => {
            backlog.extend_from_slice(&frame[n..]);
            Ok(())
        }
        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
            backlog.extend_from_slice(frame);
            Ok(())
        }
        Err(err) => Err(socket_error("write", err)),
    }
}

/// Drains as much of `backlog` as the socket will currently accept.
pub fn flush_backlog<W: Write>(stream: &mut W, backlog: &mut Vec<u8>) -> NetworkResult<()> {
    while !backlog.is_empty() {
        match stream.write(backlog) {
            Ok(0) => {
                return Err(NetworkError::Fatal(ErrorKind::Socket(
                    "write: zero-length write on non-empty backlog".to_string(),
                )))
            }
            Ok(n) => {
                backlog.drain(..n);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Err(NetworkError::Wait),
            Err(err) => return Err(socket_error("write", err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Kind;
    use std::time::Instant;

    struct Chunked {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let available = self.data.len() - self.cursor;
            let n = available.min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
            self.cursor += n;
            Ok(n)
        }
    }

    #[test]
    fn test_read_frame_across_many_partial_reads() {
        let mut frame = DataBuffer::new_data(b"hello msgbox!");
        Header {
            kind: Kind::OneWay,
            reply_id: 0,
            num_bytes: 13,
        }
        .encode(&mut frame);

        let mut stream = Chunked {
            data: frame.wire().to_vec(),
            cursor: 0,
            chunk: 3,
        };
        let mut peer = PeerStatus::new(Instant::now());

        let outcome = loop {
            match read_frame(&mut stream, &mut peer) {
                Ok(ReadOutcome::Frame(header, buf)) => break (header, buf),
                Err(NetworkError::Wait) => continue,
                Ok(ReadOutcome::Closed) => panic!("stream closed unexpectedly"),
                Err(NetworkError::Fatal(_)) => panic!("fatal error reading frame"),
            }
        };

        assert_eq!(outcome.0.num_bytes, 13);
        assert_eq!(outcome.1.payload(), b"hello msgbox!");
    }

    #[test]
    fn test_write_frame_buffers_partial_write() {
        struct HalfWriter {
            written: Vec<u8>,
        }
        impl Write for HalfWriter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(2);
                self.written.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut writer = HalfWriter { written: Vec::new() };
        let mut backlog = Vec::new();
        write_frame(&mut writer, &mut backlog, b"abcdef").unwrap();

        assert_eq!(writer.written, b"ab");
        assert_eq!(backlog, b"cdef");

        flush_backlog(&mut writer, &mut backlog).unwrap();
        assert_eq!(writer.written, b"abcdef");
        assert!(backlog.is_empty());
    }
}
