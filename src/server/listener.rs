// Listener module
// Creates TCP listeners and applies per-connection transport options

use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use super::options::ServerConfiguration;

/// Create a non-blocking `TcpListener` on `addr` using the transport options
/// of `options`.
///
/// `SO_REUSEPORT` is never set: a port held by another listener must make
/// the bind fail so the caller can move on to the next port.
///
/// Must be called from within a Tokio runtime; the listener registers with
/// the calling thread's reactor.
pub fn create_listener(
    addr: SocketAddr,
    options: &ServerConfiguration,
) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // On Windows SO_REUSEADDR lets a second socket steal a port that is in
    // use, so it is only honored on Unix (bind to a port in TIME_WAIT).
    #[cfg(unix)]
    socket.set_reuse_address(options.reuse_address())?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(options.backlog()).unwrap_or(i32::MAX))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Forward the per-connection options to an accepted stream.
pub fn apply_connection_options(
    stream: &TcpStream,
    options: &ServerConfiguration,
) -> std::io::Result<()> {
    stream.set_nodelay(options.low_latency())?;
    SockRef::from(stream).set_keepalive(options.keep_alive())?;
    Ok(())
}
