//! TCP listener and connection dispatch.
//!
//! Binds the configured address, accepts connections in a loop and hands
//! each one to its own task. The dispatcher never waits on those tasks.

use crate::config::{AcceptPolicy, Config};
use crate::runtime::{CloseReason, Closed, Handler, HandlerConfig};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Pause after a logged accept failure, so a persistent error such as
/// EMFILE does not turn the accept loop into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<HandlerConfig>,
    nodelay: bool,
    accept_errors: AcceptPolicy,
    connection_limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the listening socket. Must be called from within a tokio runtime.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = create_listener(addr, config.backlog, config.reuse_port)
            .and_then(TcpListener::from_std)
            .map_err(|e| ServerError::Bind(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(addr, e))?;

        Ok(Server {
            listener,
            local_addr,
            handler: Arc::new(HandlerConfig::from_config(config)),
            nodelay: config.nodelay,
            accept_errors: config.accept_errors,
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
        })
    }

    /// Address the listener is bound to (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until accepting fails.
    ///
    /// Only returns on error. With `AcceptPolicy::Log` it never returns.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = match &self.connection_limit {
                Some(limit) => Some(
                    Arc::clone(limit)
                        .acquire_owned()
                        .await
                        .map_err(ServerError::Admission)?,
                ),
                None => None,
            };

            match self.listener.accept().await {
                Ok((stream, peer)) => self.dispatch(stream, peer, permit),
                Err(e) => accept_failed(self.accept_errors, e).await?,
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, permit: Option<OwnedSemaphorePermit>) {
        debug!(peer = %peer, "New connection");

        if self.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let closed = Handler::new(stream, handler.buffer_size)
                .run(&handler)
                .await;
            drop(permit);
            if on_close(peer, closed) == Aftermath::Exit {
                std::process::exit(1);
            }
        });
    }
}

/// What a finished handler means for the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aftermath {
    /// Only this connection is gone.
    Continue,
    /// The process must exit with a non-zero status.
    Exit,
}

/// Log why a connection ended and decide whether the process survives it.
fn on_close(peer: SocketAddr, closed: Closed) -> Aftermath {
    let Closed { reason, rounds } = closed;

    if reason.is_process_fatal() {
        error!(peer = %peer, rounds, error = %reason, "Short write, terminating");
        return Aftermath::Exit;
    }

    match reason {
        CloseReason::PeerClosed => {
            info!(peer = %peer, rounds, error = %reason, "Connection closed")
        }
        _ => warn!(peer = %peer, rounds, error = %reason, "Connection closed"),
    }
    Aftermath::Continue
}

/// Apply the accept policy to a failed `accept`.
///
/// `Fatal` hands the error back so the dispatcher stops. `Log` records it
/// and backs off before the next attempt.
async fn accept_failed(policy: AcceptPolicy, e: io::Error) -> Result<(), ServerError> {
    match policy {
        AcceptPolicy::Fatal => Err(ServerError::Accept(e)),
        AcceptPolicy::Log => {
            error!(error = %e, "Failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            Ok(())
        }
    }
}

fn create_listener(
    addr: SocketAddr,
    backlog: u32,
    reuse_port: bool,
) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    if reuse_port {
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Server errors. All of them end the process.
#[derive(Debug)]
pub enum ServerError {
    Bind(SocketAddr, io::Error),
    Accept(io::Error),
    Runtime(io::Error),
    Admission(AcquireError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Listening on {addr} failed: {e}"),
            ServerError::Accept(e) => write!(f, "Accepting failed: {e}"),
            ServerError::Runtime(e) => write!(f, "Building runtime failed: {e}"),
            ServerError::Admission(e) => write!(f, "Connection limit unavailable: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind(_, e) | ServerError::Accept(e) | ServerError::Runtime(e) => Some(e),
            ServerError::Admission(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliArgs, TomlConfig};
    use clap::Parser;

    fn test_config(toml_str: &str) -> Config {
        let cli = CliArgs::try_parse_from(["hello-timeout", "127.0.0.1", "0", "1"]).unwrap();
        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        Config::merge(cli, toml_config)
    }

    #[tokio::test]
    async fn test_bind_resolves_port() {
        let server = Server::bind(&test_config("")).unwrap();
        assert!(server.local_addr().ip().is_loopback());
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.connection_limit.is_none());
        assert_eq!(server.accept_errors, AcceptPolicy::Fatal);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = Server::bind(&test_config("")).unwrap();

        let mut config = test_config("");
        config.port = first.local_addr().port();
        match Server::bind(&config) {
            Err(ServerError::Bind(addr, _)) => assert_eq!(addr.port(), config.port),
            Err(other) => panic!("unexpected: {other}"),
            Ok(_) => panic!("second bind succeeded"),
        }
    }

    #[tokio::test]
    async fn test_reuse_port_allows_shared_bind() {
        let config = test_config("[server]\nreuse_port = true");
        let first = Server::bind(&config).unwrap();

        let mut config = test_config("[server]\nreuse_port = true");
        config.port = first.local_addr().port();
        let second = Server::bind(&config).unwrap();
        assert_eq!(first.local_addr(), second.local_addr());
    }

    #[tokio::test]
    async fn test_connection_limit_configured() {
        let server = Server::bind(&test_config("[server]\nmax_connections = 2")).unwrap();
        let limit = server.connection_limit.as_ref().unwrap();
        assert_eq!(limit.available_permits(), 2);
    }

    #[test]
    fn test_short_write_exits_process() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let reason = CloseReason::ShortWrite {
            written: 10,
            expected: 48,
        };
        let closed = Closed { reason, rounds: 2 };
        assert_eq!(on_close(peer, closed), Aftermath::Exit);
    }

    #[test]
    fn test_connection_failures_only_close_connection() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let reasons = [
            CloseReason::ReadTimeout,
            CloseReason::ReadFailed(io::ErrorKind::ConnectionReset.into()),
            CloseReason::PeerClosed,
            CloseReason::WriteTimeout,
            CloseReason::WriteFailed(io::ErrorKind::BrokenPipe.into()),
        ];
        for reason in reasons {
            let closed = Closed { reason, rounds: 1 };
            assert_eq!(on_close(peer, closed), Aftermath::Continue);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_accept_error_stops_dispatcher() {
        let start = tokio::time::Instant::now();
        let e = io::Error::from(io::ErrorKind::ConnectionAborted);

        let result = accept_failed(AcceptPolicy::Fatal, e).await;
        assert!(matches!(result, Err(ServerError::Accept(_))));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_accept_error_backs_off() {
        let start = tokio::time::Instant::now();
        let e = io::Error::other("too many open files");

        accept_failed(AcceptPolicy::Log, e).await.unwrap();
        assert!(start.elapsed() >= ACCEPT_BACKOFF);
    }

    #[test]
    fn test_error_display() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let err = ServerError::Bind(addr, io::Error::new(io::ErrorKind::AddrInUse, "in use"));
        assert_eq!(err.to_string(), "Listening on 127.0.0.1:80 failed: in use");
    }
}
