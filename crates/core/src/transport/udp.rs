//! UDP socket setup for media transport.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use mio::net::UdpSocket;
use socket2::{Domain, Protocol, Socket, Type};

/// Kernel buffer size for media sockets. RTP bursts at Wi-Fi Display
/// bitrates overflow the default buffers long before the worker gets
/// scheduled again.
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Bind a non-blocking UDP socket on `local_port`, optionally connected to
/// a remote peer.
///
/// Built through `socket2` so the 256 KiB send/receive buffers can be set
/// before the first packet flows.
pub(crate) fn bind(local_port: u16, remote: Option<SocketAddrV4>) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port)).into())?;

    if let Some(remote) = remote {
        socket.connect(&SocketAddr::V4(remote).into())?;
    }

    Ok(UdpSocket::from_std(socket.into()))
}
