//! Session UDP transport.
//!
//! A session owns one receive socket bound to the chat port and one send
//! socket on an ephemeral port with broadcast enabled. Sends are
//! fire-and-forget; the receive loop runs until [`Transport::close`].

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};

use crate::error::ConnectionError;
use crate::protocol::RECEIVE_BUFFER_SIZE;

/// Consumer of inbound datagrams.
///
/// Called on the receive task, one datagram at a time. The payload borrows
/// the loop's reusable buffer.
pub trait DatagramHandler: Send + Sync {
    fn on_datagram(&self, payload: &[u8], from: SocketAddr) -> impl Future<Output = ()> + Send;
}

/// Create the receive socket.
///
/// Address reuse stays off so a port held by another process fails to bind.
pub fn create_receive_socket(port: u16) -> Result<std::net::UdpSocket, ConnectionError> {
    let bind_err = |source| ConnectionError::Bind { port, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// Create the broadcast-capable send socket on an ephemeral port.
pub fn create_send_socket() -> Result<std::net::UdpSocket, ConnectionError> {
    let bind_err = |source| ConnectionError::Bind { port: 0, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket
        .set_broadcast(true)
        .map_err(ConnectionError::Broadcast)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// WSAEMSGSIZE: Windows reports a datagram longer than the buffer as an error.
const WINDOWS_MESSAGE_TOO_LONG: i32 = 10040;

/// Receive errors that leave the socket usable.
///
/// Windows reports ICMP port-unreachable for an earlier send as a
/// `ConnectionReset` on the next receive.
fn is_transient(err: &io::Error) -> bool {
    let kind_is_transient = matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    );

    kind_is_transient || (cfg!(windows) && err.raw_os_error() == Some(WINDOWS_MESSAGE_TOO_LONG))
}

pub struct Transport {
    port: u16,
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    shutdown: watch::Sender<bool>,
}

impl Transport {
    /// Bind both sockets for a session on `port`.
    pub async fn open(port: u16) -> Result<Self, ConnectionError> {
        let recv_socket = UdpSocket::from_std(create_receive_socket(port)?)
            .map_err(|source| ConnectionError::Bind { port, source })?;
        let send_socket = UdpSocket::from_std(create_send_socket()?)
            .map_err(|source| ConnectionError::Bind { port: 0, source })?;

        let (shutdown, _) = watch::channel(false);

        log::info!("UDP transport listening on port {}", port);

        Ok(Self {
            port,
            recv_socket,
            send_socket,
            shutdown,
        })
    }

    /// The chat port peers are addressed on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the receive socket is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.recv_socket.local_addr()
    }

    /// Send to one peer. Failures are logged and swallowed.
    pub async fn send_unicast(&self, addr: IpAddr, bytes: &[u8]) {
        let target = SocketAddr::new(addr, self.port);
        if let Err(e) = self.send_socket.send_to(bytes, target).await {
            log::warn!("UDP send to {} failed: {}", target, e);
        }
    }

    /// Send to the limited broadcast address. Failures are logged and swallowed.
    pub async fn send_broadcast(&self, bytes: &[u8]) {
        let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.port);
        if let Err(e) = self.send_socket.send_to(bytes, target).await {
            log::warn!("UDP broadcast on port {} failed: {}", self.port, e);
        }
    }

    /// Run the receive loop until [`close`](Self::close) is called.
    ///
    /// `ready` fires once the loop is running. Returns `Ok(())` after an
    /// intentional close and `Err` only for a non-transient socket error.
    pub async fn receive_loop<H: DatagramHandler>(
        &self,
        handler: &H,
        ready: oneshot::Sender<()>,
    ) -> Result<(), ConnectionError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

        let _ = ready.send(());
        log::debug!("Receive loop started on port {}", self.port);

        loop {
            if *shutdown.borrow_and_update() {
                log::debug!("Receive loop on port {} closed", self.port);
                return Ok(());
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                result = self.recv_socket.recv_from(&mut buf) => result,
            };

            match received {
                Ok((len, from)) => handler.on_datagram(&buf[..len], from).await,
                Err(e) if is_transient(&e) => {
                    log::debug!("Ignoring transient receive error: {}", e);
                }
                Err(e) => {
                    log::error!("UDP receive error on port {}: {}", self.port, e);
                    return Err(ConnectionError::Receive(e));
                }
            }
        }
    }

    /// Stop the receive loop. Safe to call repeatedly and from any task.
    pub fn close(&self) {
        let was_closed = self.shutdown.send_replace(true);
        if !was_closed {
            log::debug!("Closing UDP transport on port {}", self.port);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}
