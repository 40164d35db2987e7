// ── Client registry ──
//
// The set of live client connections of a broadcast device. It is the
// only structure touched by several tasks at once (accept task, broadcast
// step, every client task), so every insert, remove, write, and full
// broadcast pass runs under one async mutex.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CoreError;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifier assigned to a connection at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct ClientConnection<W> {
    writer: W,
    peer: SocketAddr,
    /// Cancels the client's reader task when the connection is dropped.
    cancel: CancellationToken,
}

/// Mutex-guarded set of connected clients.
///
/// Generic over the write half so it can be driven by in-memory streams;
/// the broadcast device uses TCP write halves.
pub struct ClientRegistry<W = OwnedWriteHalf> {
    clients: Mutex<HashMap<ClientId, ClientConnection<W>>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl<W> Default for ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl<W> ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Add a connection and return its id.
    pub async fn register(&self, writer: W, peer: SocketAddr, cancel: CancellationToken) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut clients = self.clients.lock().await;
        clients.insert(
            id,
            ClientConnection {
                writer,
                peer,
                cancel,
            },
        );
        info!(client = %id, %peer, connected = clients.len(), "client connected");
        id
    }

    /// Drop a connection, closing its socket. Returns false when the id
    /// was already gone.
    pub async fn remove(&self, id: ClientId) -> bool {
        let removed = self.clients.lock().await.remove(&id);
        match removed {
            Some(conn) => {
                close(conn).await;
                debug!(client = %id, "client removed");
                true
            }
            None => false,
        }
    }

    /// Write one message to one client. A failed write drops the client.
    pub async fn send_to(&self, id: ClientId, message: &str) -> Result<(), CoreError> {
        let mut clients = self.clients.lock().await;
        let Some(conn) = clients.get_mut(&id) else {
            return Err(CoreError::Internal(format!("{id} is no longer registered")));
        };

        let written = write_line(&mut conn.writer, message, self.write_timeout).await;
        if let Err(e) = written {
            if let Some(conn) = clients.remove(&id) {
                info!(client = %id, peer = %conn.peer, error = %e, "client write failed, dropping");
                close(conn).await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Send `message` to every client. Clients whose write fails are
    /// closed and removed in the same pass. Returns the delivered count.
    pub async fn broadcast(&self, message: &str) -> usize {
        let mut clients = self.clients.lock().await;
        let mut failed = Vec::new();

        for (id, conn) in clients.iter_mut() {
            if let Err(e) = write_line(&mut conn.writer, message, self.write_timeout).await {
                debug!(client = %id, peer = %conn.peer, error = %e, "broadcast write failed");
                failed.push(*id);
            }
        }

        for id in &failed {
            if let Some(conn) = clients.remove(id) {
                info!(client = %id, peer = %conn.peer, "client disconnected during broadcast");
                close(conn).await;
            }
        }

        clients.len()
    }

    /// Close every connection and empty the registry.
    pub async fn close_all(&self) {
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        for (_, conn) in clients.drain() {
            close(conn).await;
        }
        if count > 0 {
            info!(closed = count, "all clients closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }
}

async fn write_line<W>(writer: &mut W, message: &str, limit: Duration) -> Result<(), CoreError>
where
    W: AsyncWrite + Unpin + Send,
{
    let write = async {
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await
    };
    match tokio::time::timeout(limit, write).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Timeout {
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

async fn close<W>(mut conn: ClientConnection<W>)
where
    W: AsyncWrite + Unpin + Send,
{
    conn.cancel.cancel();
    let _ = conn.writer.shutdown().await;
}
