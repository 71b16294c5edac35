//! Remote-control server.
//!
//! One JSON request per line, one JSON reply per line. Requests are answered
//! strictly in turn across all connections: one request is in flight at a
//! time, and it is fully answered before the next is taken.

use camrelay_core::protocol::{dispatch, Response};
use camrelay_core::{CommandSender, Endpoint, FeatureCache};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// Longest request line accepted before the connection is dropped.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),
}

/// Online/offline flag observable by other components. Starts offline, goes
/// online once bound, and goes offline for good on a transport failure.
#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    online: Arc<AtomicBool>,
}

impl ServerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// The error flag: true while the server is not serving.
    pub fn has_error(&self) -> bool {
        !self.is_online()
    }

    fn set(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

/// Remembers the last observed status so that only changes are reported.
#[derive(Debug)]
pub struct StatusWatch {
    status: ServerStatus,
    online: bool,
}

impl StatusWatch {
    pub fn new(status: ServerStatus) -> Self {
        let online = status.is_online();
        Self { status, online }
    }

    /// The new online state if it changed since the last call.
    pub fn changed(&mut self) -> Option<bool> {
        let online = self.status.is_online();
        (online != self.online).then(|| {
            self.online = online;
            online
        })
    }
}

/// A server running in the background.
pub struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Stop accepting and wait for the accept loop to end.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "remote control task panicked");
                Ok(())
            }
        }
    }
}

/// Bind `endpoint` and serve in the background. A bind failure is logged and
/// leaves `status` offline; the caller carries on without a server.
pub async fn start_remote_control(
    endpoint: &Endpoint,
    cache: Arc<FeatureCache>,
    commands: CommandSender,
    status: ServerStatus,
) -> Option<ServerHandle> {
    let server = match RemoteControlServer::bind(endpoint, cache, commands, status).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(%endpoint, error = %e, "remote control unavailable");
            return None;
        }
    };
    let (shutdown, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(async move {
        let _ = stopped.await;
    }));
    Some(ServerHandle { shutdown, task })
}

pub struct RemoteControlServer {
    listener: TcpListener,
    cache: Arc<FeatureCache>,
    commands: CommandSender,
    status: ServerStatus,
    /// Held while a request is dispatched and answered.
    turn: Arc<Mutex<()>>,
}

impl RemoteControlServer {
    pub async fn bind(
        endpoint: &Endpoint,
        cache: Arc<FeatureCache>,
        commands: CommandSender,
        status: ServerStatus,
    ) -> Result<Self, ServerError> {
        Self::bind_addr(&endpoint.bind_addr(), cache, commands, status).await
    }

    pub async fn bind_addr(
        addr: &str,
        cache: Arc<FeatureCache>,
        commands: CommandSender,
        status: ServerStatus,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            status.set(false);
            ServerError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        status.set(true);
        tracing::info!(addr, "remote control listening");
        Ok(Self {
            listener,
            cache,
            commands,
            status,
            turn: Arc::new(Mutex::new(())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves. An accept failure marks
    /// the server offline and ends the loop; it is not restarted.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("remote control shutting down");
                    self.status.set(false);
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "remote client connected");
                        let cache = self.cache.clone();
                        let commands = self.commands.clone();
                        let turn = self.turn.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &cache, &commands, &turn).await {
                                tracing::debug!(%peer, error = %e, "remote client dropped");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "remote control transport failed");
                        self.status.set(false);
                        return Err(ServerError::Transport(e));
                    }
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    cache: &FeatureCache,
    commands: &CommandSender,
    turn: &Mutex<()>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_REQUEST_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(());
        }
        if line.len() > MAX_REQUEST_BYTES {
            tracing::warn!(bytes = line.len(), "request too long, closing");
            write_reply(&mut write, &Response::Fault).await?;
            return Ok(());
        }
        let text = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => Some(text.trim()),
            Err(_) => None,
        };
        let _turn = turn.lock().await;
        let response = text.map_or(Response::Fault, |text| dispatch(text, cache, commands));
        write_reply(&mut write, &response).await?;
    }
}

async fn write_reply(
    write: &mut tokio::net::tcp::OwnedWriteHalf,
    response: &Response,
) -> std::io::Result<()> {
    let mut reply = response.encode();
    reply.push('\n');
    write.write_all(reply.as_bytes()).await
}
