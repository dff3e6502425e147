use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
    time::Duration,
};

use tracing::debug;

use crate::builder::BuildError;

pub mod sync;

/// A resolved remote collector endpoint.
#[derive(Clone, Debug)]
pub(crate) struct RemoteAddr {
    host: String,
    port: String,
    addrs: Vec<SocketAddr>,
}

impl RemoteAddr {
    /// Resolves the given host and port.
    ///
    /// Candidate addresses are kept in resolver order. When `ipv4_only` is set, anything but IPv4 addresses is
    /// discarded.
    pub fn resolve(host: &str, port: &str, ipv4_only: bool) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::InvalidRemoteAddress { reason };

        let port_num = port
            .parse::<u16>()
            .map_err(|e| invalid(format!("invalid port '{}': {}", port, e)))?;

        let addrs = (host, port_num)
            .to_socket_addrs()
            .map_err(|e| invalid(format!("unable to resolve '{}': {}", host, e)))?
            .filter(|addr| !ipv4_only || addr.is_ipv4())
            .collect::<Vec<_>>();

        if addrs.is_empty() {
            return Err(invalid(format!("no usable addresses for '{}'", host)));
        }

        Ok(RemoteAddr { host: host.to_string(), port: port.to_string(), addrs })
    }

    /// Creates a UDP socket connected to the first candidate address that accepts it.
    pub fn connect(&self, write_timeout: Duration) -> Result<UdpSocket, BuildError> {
        let mut last_error = None;

        for addr in &self.addrs {
            match connect_udp(*addr, write_timeout) {
                Ok(socket) => {
                    debug!(%addr, host = %self.host, port = %self.port, "Connected to remote collector.");
                    return Ok(socket);
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Failed to connect to candidate address.");
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(e) => e.to_string(),
            None => "no candidate addresses".to_string(),
        };
        Err(BuildError::Connect { reason })
    }
}

fn connect_udp(addr: SocketAddr, write_timeout: Duration) -> io::Result<UdpSocket> {
    let local: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    socket.connect(addr)?;
    socket.set_write_timeout(Some(write_timeout))?;
    Ok(socket)
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub struct ForwarderConfiguration {
    /// Time between the start of consecutive polling cycles.
    pub interval: Duration,

    /// Pause after each message within a cycle.
    pub pacing: Duration,
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::RemoteAddr;
    use crate::builder::BuildError;

    #[test]
    fn resolve_literal_addresses() {
        let remote = RemoteAddr::resolve("127.0.0.1", "8089", false).expect("literal should resolve");
        assert_eq!(remote.addrs, vec!["127.0.0.1:8089".parse().unwrap()]);

        let remote = RemoteAddr::resolve("::1", "8089", false).expect("literal should resolve");
        assert_eq!(remote.addrs, vec!["[::1]:8089".parse().unwrap()]);
    }

    #[test]
    fn ipv4_only_discards_ipv6() {
        let result = RemoteAddr::resolve("::1", "8089", true);
        assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })));
    }

    #[test]
    fn invalid_port() {
        for port in ["", "http", "65536", "-1"] {
            let result = RemoteAddr::resolve("127.0.0.1", port, false);
            assert!(matches!(result, Err(BuildError::InvalidRemoteAddress { .. })), "port: {:?}", port);
        }
    }

    #[test]
    fn connect_reaches_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").expect("bind listener");
        let port = listener.local_addr().unwrap().port().to_string();

        let remote = RemoteAddr::resolve("127.0.0.1", &port, true).expect("literal should resolve");
        let socket = remote.connect(Duration::from_secs(1)).expect("connect");
        socket.send(b"ping").expect("send");

        let mut buf = [0u8; 16];
        let len = listener.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"ping");
    }
}
