//! UDP transport for chat sessions.

pub mod udp;

pub use udp::{DatagramHandler, Transport};

/// Find a UDP port that is currently free on this host.
#[cfg(test)]
pub(crate) fn free_port() -> u16 {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap()
}
