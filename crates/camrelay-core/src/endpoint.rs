//! `tcp://host:port` endpoint addresses.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SCHEME: &str = "tcp://";
const WILDCARD: &str = "*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint {0:?} must start with tcp://")]
    Scheme(String),
    #[error("endpoint {0:?} has no port")]
    MissingPort(String),
    #[error("endpoint {0:?} has no host")]
    MissingHost(String),
    #[error("endpoint {0:?} has an invalid port")]
    Port(String),
}

/// A remote-control endpoint. A host of `*` means all interfaces when binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address to bind a listener to.
    pub fn bind_addr(&self) -> String {
        let host = if self.host == WILDCARD {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        join_host_port(host, self.port)
    }

    /// Address to connect to. A wildcard endpoint is reached on loopback.
    pub fn connect_addr(&self) -> String {
        let host = if self.host == WILDCARD {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        join_host_port(host, self.port)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| EndpointError::Scheme(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(EndpointError::MissingHost(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointError::Port(s.to_string()))?;
        if port == 0 {
            return Err(EndpointError::Port(s.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}", join_host_port(&self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let e: Endpoint = "tcp://192.168.1.5:5555".parse().unwrap();
        assert_eq!(e.host(), "192.168.1.5");
        assert_eq!(e.port(), 5555);
        assert_eq!(e.bind_addr(), "192.168.1.5:5555");
        assert_eq!(e.to_string(), "tcp://192.168.1.5:5555");
    }

    #[test]
    fn test_wildcard() {
        let e: Endpoint = "tcp://*:5555".parse().unwrap();
        assert_eq!(e.bind_addr(), "0.0.0.0:5555");
        assert_eq!(e.connect_addr(), "127.0.0.1:5555");
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        assert!(matches!(
            "udp://host:1".parse::<Endpoint>(),
            Err(EndpointError::Scheme(_))
        ));
        assert!(matches!(
            "tcp://host".parse::<Endpoint>(),
            Err(EndpointError::MissingPort(_))
        ));
        assert!(matches!(
            "tcp://:5555".parse::<Endpoint>(),
            Err(EndpointError::MissingHost(_))
        ));
        assert!("tcp://host:0".parse::<Endpoint>().is_err());
        assert!("tcp://host:99999".parse::<Endpoint>().is_err());
    }
}
