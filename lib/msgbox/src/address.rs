use crate::error::{ErrorKind, NetworkError, NetworkResult};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Transport carried by an `Address`. Also tags a connection's wire
/// semantics.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Either a concrete IPv4 host or the listener-only wildcard `*`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Host {
    Wildcard,
    Addr(Ipv4Addr),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Wildcard => write!(f, "*"),
            Host::Addr(ip) => write!(f, "{}", ip),
        }
    }
}

/// `(host, port, transport)` triple identifying an endpoint. Equality and
/// hashing fall out of `derive` over the fixed-size fields.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Address {
    pub host: Host,
    pub port: u16,
    pub transport: Transport,
}

impl Address {
    /// True when this address can only be used to `listen`, never `connect`.
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.host == Host::Wildcard
    }

    /// Parses `"tcp://host:port"` / `"udp://host:port"`.
    ///
    /// `host` is either `*` or a dotted-quad IPv4 address of length 1-15;
    /// `port` is decimal in `[1, 65535]`. Any other shape is a `BadAddress`
    /// error and the parser has no partial side effects.
    pub fn parse(input: &str) -> NetworkResult<Address> {
        let bad = |reason: String| NetworkError::Fatal(ErrorKind::BadAddress(reason));

        let mut parts = input.splitn(2, "://");
        let scheme = parts
            .next()
            .ok_or_else(|| bad(format!("missing scheme in address {:?}", input)))?;
        let rest = parts
            .next()
            .ok_or_else(|| bad(format!("missing \"://\" in address {:?}", input)))?;

        let transport = match scheme {
            "tcp" => Transport::Tcp,
            "udp" => Transport::Udp,
            other => return Err(bad(format!("unknown transport scheme {:?}", other))),
        };

        let colon = rest
            .rfind(':')
            .ok_or_else(|| bad(format!("missing \":port\" in address {:?}", input)))?;
        let (host_str, port_str) = (&rest[..colon], &rest[colon + 1..]);

        if host_str.is_empty() || host_str.len() > 15 {
            return Err(bad(format!(
                "host {:?} must be 1-15 characters long",
                host_str
            )));
        }

        let host = if host_str == "*" {
            Host::Wildcard
        } else {
            Host::Addr(
                Ipv4Addr::from_str(host_str)
                    .map_err(|_| bad(format!("invalid IPv4 address {:?}", host_str)))?,
            )
        };

        if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad(format!("invalid port {:?}", port_str)));
        }
        let port: u32 = port_str
            .parse()
            .map_err(|_| bad(format!("invalid port {:?}", port_str)))?;
        if port < 1 || port > 65535 {
            return Err(bad(format!("port {} out of range [1, 65535]", port)));
        }

        Ok(Address {
            host,
            port: port as u16,
            transport,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_tcp() {
        let addr = Address::parse("tcp://127.0.0.1:8100").unwrap();
        assert_eq!(addr.transport, Transport::Tcp);
        assert_eq!(addr.host, Host::Addr(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(addr.port, 8100);
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:8100");
    }

    #[test]
    fn test_roundtrip_udp_wildcard() {
        let addr = Address::parse("udp://*:8200").unwrap();
        assert!(addr.is_wildcard());
        assert_eq!(addr.to_string(), "udp://*:8200");
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(Address::parse("ftp://127.0.0.1:1").is_err());
    }

    #[test]
    fn test_missing_colon() {
        assert!(Address::parse("tcp://127.0.0.1").is_err());
    }

    #[test]
    fn test_empty_port() {
        assert!(Address::parse("tcp://127.0.0.1:").is_err());
    }

    #[test]
    fn test_non_numeric_port() {
        assert!(Address::parse("tcp://127.0.0.1:abc").is_err());
    }

    #[test]
    fn test_port_out_of_range() {
        assert!(Address::parse("tcp://127.0.0.1:0").is_err());
        assert!(Address::parse("tcp://127.0.0.1:65536").is_err());
    }

    #[test]
    fn test_bad_ip() {
        assert!(Address::parse("tcp://not.an.ip:80").is_err());
    }

    #[test]
    fn test_host_length_bounds() {
        assert!(Address::parse("tcp://:80").is_err());
        assert!(Address::parse("tcp://123.123.123.123.123:80").is_err());
    }
}
