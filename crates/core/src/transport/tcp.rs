//! Non-blocking TCP socket setup.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};

/// Start a non-blocking connect to `remote`.
///
/// The returned stream is in `Connecting` state until the dispatcher sees
/// it writable and resolves the pending error.
pub(crate) fn connect(remote: SocketAddrV4) -> io::Result<TcpStream> {
    TcpStream::connect(SocketAddr::V4(remote))
}

/// Start a non-blocking connect to `remote` from a fixed local port.
///
/// Goes through `socket2` because the bind must happen before the connect;
/// `EINPROGRESS` is the expected outcome of a non-blocking connect.
pub(crate) fn connect_from(local_port: u16, remote: SocketAddrV4) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, local_port)).into())?;

    match socket.connect(&SocketAddr::V4(remote).into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(e),
    }

    Ok(TcpStream::from_std(socket.into()))
}

/// Bind a non-blocking listener on `addr:port`.
///
/// `mio`'s bind sets `SO_REUSEADDR` on Unix, so restarting a control
/// endpoint does not trip over sockets in TIME_WAIT.
pub(crate) fn listen(addr: Ipv4Addr, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from((addr, port)))
}
