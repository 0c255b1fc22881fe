use crate::config::Config;
use crate::error::Result;
use crate::security::ConnectionLimiter;
use crate::smtp::session::{SessionContext, SmtpSession};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed accept (e.g. EMFILE) before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct SmtpServer {
    config: Arc<Config>,
}

/// A running server. Dropping the handle does not stop it; call [`stop`].
///
/// [`stop`]: ServerHandle::stop
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    accept_loop: JoinHandle<()>,
}

impl SmtpServer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Bind the listener and spawn the accept loop. Returns as soon as the
    /// socket is bound.
    pub async fn start(self) -> Result<ServerHandle> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("SMTP server listening on {}", local_addr);

        let ctx = Arc::new(SessionContext::from_config(&self.config));
        let limiter = ConnectionLimiter::new(self.config.server.max_connections);
        let shutdown = CancellationToken::new();
        let sessions = TaskTracker::new();

        let accept_loop = tokio::spawn(accept_loop(
            listener,
            ctx,
            limiter,
            shutdown.clone(),
            sessions.clone(),
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown,
            sessions,
            accept_loop,
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, release the listening socket, then wait for the
    /// sessions still running. Idle sessions are told to go away; a session
    /// in the middle of DATA completes its message.
    pub async fn stop(self) {
        info!("Stopping SMTP server on {}", self.local_addr);
        self.shutdown.cancel();

        if let Err(e) = self.accept_loop.await {
            error!("Accept loop ended abnormally: {}", e);
        }

        self.sessions.close();
        if !self.sessions.is_empty() {
            info!("Waiting for {} session(s) to finish", self.sessions.len());
        }
        self.sessions.wait().await;
        info!("SMTP server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    limiter: ConnectionLimiter,
    shutdown: CancellationToken,
    sessions: TaskTracker,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Some(permit) = limiter.try_acquire() else {
                        warn!(
                            "Too many concurrent sessions ({}), rejecting {}",
                            limiter.max_concurrent(),
                            peer
                        );
                        sessions.spawn(turn_away(stream, ctx.hostname.clone()));
                        continue;
                    };

                    let session = SmtpSession::new(peer, ctx.clone());
                    let span = info_span!("session", id = %session.id(), peer = %peer);
                    let shutdown = shutdown.clone();

                    sessions.spawn(
                        async move {
                            info!("New SMTP connection from {}", peer);
                            if let Err(e) = session.handle(stream, shutdown).await {
                                error!("Session error: {}", e);
                            }
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    if !accept_backoff(&shutdown).await {
                        break;
                    }
                }
            },
            _ = shutdown.cancelled() => {
                debug!("Accept loop received shutdown signal");
                break;
            }
        }
    }
    // listener dropped here, freeing the port before sessions drain
}

/// Sleep for [`ACCEPT_BACKOFF`]. Returns `false` if shutdown fired first.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
        _ = shutdown.cancelled() => false,
    }
}

async fn turn_away(mut stream: TcpStream, hostname: String) {
    let reply = format!(
        "421 {} Too many concurrent connections, try again later\r\n",
        hostname
    );
    let _ = stream.write_all(reply.as_bytes()).await;
    let _ = stream.shutdown().await;
}
