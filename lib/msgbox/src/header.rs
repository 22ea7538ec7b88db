use crate::databuffer::{DataBuffer, HEADER_SIZE};
use crate::error::{ErrorKind, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Wire message kind, the first two bytes of every frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
    OneWay = 0,
    Request = 1,
    Reply = 2,
    Heartbeat = 3,
    Close = 4,
}

impl Kind {
    #[inline]
    fn from_u16(value: u16) -> Option<Kind> {
        match value {
            0 => Some(Kind::OneWay),
            1 => Some(Kind::Request),
            2 => Some(Kind::Reply),
            3 => Some(Kind::Heartbeat),
            4 => Some(Kind::Close),
            _ => None,
        }
    }
}

/// `{kind, reply_id, num_bytes}` serialized big-endian into a `DataBuffer`'s
/// reserved prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub kind: Kind,
    pub reply_id: u16,
    pub num_bytes: u32,
}

impl Header {
    /// Writes `self` into `buffer`'s reserved header prefix.
    pub fn encode(&self, buffer: &mut DataBuffer) {
        let mut stream = buffer.header_slice_mut();
        stream
            .write_u16::<BigEndian>(self.kind as u16)
            .expect("header prefix must hold 8 bytes");
        stream
            .write_u16::<BigEndian>(self.reply_id)
            .expect("header prefix must hold 8 bytes");
        stream
            .write_u32::<BigEndian>(self.num_bytes)
            .expect("header prefix must hold 8 bytes");
    }

    /// Parses a header out of a raw 8-byte slice (used directly on data read
    /// off the wire, before it has been wrapped in a `DataBuffer`).
    pub fn decode(bytes: &[u8]) -> NetworkResult<Header> {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        let mut stream = bytes;
        let raw_kind = stream.read_u16::<BigEndian>()?;
        let kind = Kind::from_u16(raw_kind).ok_or_else(|| {
            NetworkError::Fatal(ErrorKind::Protocol(format!(
                "unknown message kind {}",
                raw_kind
            )))
        })?;
        let reply_id = stream.read_u16::<BigEndian>()?;
        let num_bytes = stream.read_u32::<BigEndian>()?;
        Ok(Header {
            kind,
            reply_id,
            num_bytes,
        })
    }

    /// Parses the header out of a `DataBuffer`'s own reserved prefix.
    pub fn decode_buffer(buffer: &DataBuffer) -> NetworkResult<Header> {
        Header::decode(buffer.header_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_request_header() {
        let mut buf = DataBuffer::new_data_space(0);
        let header = Header {
            kind: Kind::Request,
            reply_id: u16::max_value(),
            num_bytes: u32::max_value(),
        };
        header.encode(&mut buf);
        assert_eq!(Header::decode_buffer(&buf).unwrap(), header);
    }

    #[test]
    fn test_decode_unknown_kind_is_protocol_error() {
        let bytes = [0u8, 9, 0, 0, 0, 0, 0, 0];
        match Header::decode(&bytes) {
            Err(NetworkError::Fatal(ErrorKind::Protocol(msg))) => {
                assert!(msg.contains('9'));
            }
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_big_endian_encoding() {
        let mut buf = DataBuffer::new_data_space(0);
        Header {
            kind: Kind::Request,
            reply_id: 0x0102,
            num_bytes: 0x0304_0506,
        }
        .encode(&mut buf);

        assert_eq!(
            buf.header_slice(),
            &[0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]
        );
    }
}
