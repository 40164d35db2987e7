// ── Broadcast-server device ──
//
// Binds a TCP listener on initialize. While running, a dedicated accept
// task admits clients into the `ClientRegistry` and spawns one reader task
// per client into a bounded `JoinSet`. The run-loop itself advances the
// simulated counter/status each tick and fans the counter out to every
// client.
//
// Every blocking await (accept, line read, tick) races the device's
// cancellation token, so `stop()` never waits on a peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::protocol::{self, Request, RequestCodec, RequestFrame};
use super::registry::{ClientId, ClientRegistry};
use super::{DeviceContext, DeviceRuntime};
use crate::error::CoreError;
use crate::model::DataType;

const LISTEN_BACKLOG: u32 = 10;
const MAX_REQUEST_LEN: usize = 1024;
const COUNTER_WRAP: u32 = 10_000;
const STATUS_EVERY: u64 = 200;
const CUSTOM_EVERY: u64 = 50;
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const MIN_TICK: Duration = Duration::from_millis(1);

const STATUS_LABELS: [&str; 4] = ["normal", "warning", "maintenance", "busy"];
const CUSTOM_MESSAGES: [&str; 5] = [
    "system started",
    "sensor calibrating",
    "acquisition nominal",
    "network stable",
    "device running",
];

// ── Telemetry ────────────────────────────────────────────────────

/// Simulated counter/status shared between the run-loop and client tasks.
pub struct Telemetry {
    counter: AtomicU32,
    /// Index into `STATUS_LABELS`.
    status: AtomicUsize,
    custom: ArcSwap<Vec<String>>,
}

impl Telemetry {
    fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            status: AtomicUsize::new(0),
            custom: ArcSwap::from_pointee(CUSTOM_MESSAGES.iter().map(ToString::to_string).collect()),
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn status_label(&self) -> &'static str {
        STATUS_LABELS[self.status.load(Ordering::Acquire) % STATUS_LABELS.len()]
    }

    pub fn custom_messages(&self) -> Arc<Vec<String>> {
        self.custom.load_full()
    }

    /// Advance one tick. Returns the new counter value.
    fn advance(&self, tick: u64) -> u32 {
        let next = self.counter.load(Ordering::Acquire) + 1;
        let next = if next > COUNTER_WRAP { 0 } else { next };
        self.counter.store(next, Ordering::Release);

        if tick % STATUS_EVERY == 0 {
            let index = cycle_index(tick / STATUS_EVERY, STATUS_LABELS.len());
            self.status.store(index, Ordering::Release);
        }

        if tick % CUSTOM_EVERY == 0 {
            let slot = cycle_index(tick / CUSTOM_EVERY, CUSTOM_MESSAGES.len());
            let stamp = protocol::format_timestamp(&chrono::Local::now());
            self.custom.rcu(|current| {
                let mut next = Vec::clone(current);
                if let Some(entry) = next.get_mut(slot) {
                    *entry = format!("updated at {stamp}");
                }
                next
            });
        }
        next
    }

    fn respond(&self, device: &str, request: &Request) -> String {
        match request {
            Request::Data => protocol::data_response(device, self.counter(), self.status_label()),
            Request::Status => {
                protocol::status_response(device, self.status_label(), self.counter())
            }
            Request::Unknown(other) => {
                protocol::error_response(&format!("unknown request: {other}"))
            }
        }
    }
}

fn cycle_index(step: u64, len: usize) -> usize {
    let len = u64::try_from(len).unwrap_or(u64::MAX);
    usize::try_from(step % len).unwrap_or_default()
}

// ── BroadcastRuntime ─────────────────────────────────────────────

pub struct BroadcastRuntime {
    listener: Mutex<Option<TcpListener>>,
    local_addr: ArcSwapOption<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    clients: Arc<ClientRegistry>,
    telemetry: Arc<Telemetry>,
}

impl Default for BroadcastRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastRuntime {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            local_addr: ArcSwapOption::empty(),
            accept_task: Mutex::new(None),
            clients: Arc::new(ClientRegistry::default()),
            telemetry: Arc::new(Telemetry::new()),
        }
    }

    /// Address actually bound by the last initialize. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load().as_deref().copied()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub async fn client_count(&self) -> usize {
        self.clients.len().await
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Send a free-form `MSG` line to every client. Returns how many
    /// clients remain connected.
    pub async fn send_message(&self, kind: &str, data: &str) -> usize {
        self.clients.broadcast(&protocol::message_line(kind, data)).await
    }

    async fn tick(&self, ctx: &DeviceContext, tick: u64) {
        let counter = self.telemetry.advance(tick);
        let counter_point = ctx.point(DataType::Custom, f64::from(counter), "count");
        let status_point = ctx.point(DataType::Status, 0.0, self.telemetry.status_label());

        let line = protocol::broadcast_line(ctx.name(), &counter_point);
        let connected = self.clients.broadcast(&line).await;
        trace!(device = ctx.name(), tick, counter, connected, "broadcast tick");

        ctx.emit(counter_point);
        ctx.emit(status_point);
    }
}

impl DeviceRuntime for BroadcastRuntime {
    async fn initialize(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        let endpoint = ctx.config().endpoint();
        let listener = bind(&endpoint)
            .await
            .map_err(|e| CoreError::connection(&endpoint, e))?;
        let addr = listener.local_addr()?;

        *self.listener.lock().await = Some(listener);
        self.local_addr.store(Some(Arc::new(addr)));
        info!(device = ctx.name(), %addr, "broadcast server listening");
        Ok(())
    }

    async fn run(&self, ctx: DeviceContext) -> Result<(), CoreError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::Internal("listener was not initialized".into()))?;

        // Tear the accept task down on any exit from this loop, panics included.
        let _shutdown = ctx.cancel_token().clone().drop_guard();

        let accept = tokio::spawn(accept_loop(
            listener,
            ctx.clone(),
            Arc::clone(&self.clients),
            Arc::clone(&self.telemetry),
        ));
        *self.accept_task.lock().await = Some(accept);

        let mut interval = tokio::time::interval(ctx.config().update_interval.max(MIN_TICK));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0_u64;

        loop {
            tokio::select! {
                biased;
                () = ctx.cancelled() => break,
                _ = interval.tick() => {
                    tick += 1;
                    self.tick(&ctx, tick).await;
                }
            }
        }

        let accept = self.accept_task.lock().await.take();
        if let Some(accept) = accept {
            if let Err(e) = accept.await {
                warn!(device = ctx.name(), error = %e, "accept task did not join cleanly");
            }
        }
        Ok(())
    }

    async fn cleanup(&self, ctx: &DeviceContext) -> Result<(), CoreError> {
        let accept = self.accept_task.lock().await.take();
        if let Some(accept) = accept {
            ctx.cancel_token().cancel();
            let _ = accept.await;
        }
        self.clients.close_all().await;
        if self.listener.lock().await.take().is_some() {
            debug!(device = ctx.name(), "unused listener dropped");
        }
        self.local_addr.store(None);
        info!(device = ctx.name(), "broadcast server closed");
        Ok(())
    }
}

// ── Socket plumbing ──────────────────────────────────────────────

async fn bind(endpoint: &str) -> std::io::Result<TcpListener> {
    let addr = tokio::net::lookup_host(endpoint)
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

async fn accept_loop(
    listener: TcpListener,
    ctx: DeviceContext,
    clients: Arc<ClientRegistry>,
    telemetry: Arc<Telemetry>,
) {
    let limit = Arc::new(Semaphore::new(ctx.config().max_clients.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(device = ctx.name(), error = %e, "client task failed");
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(
                            device = ctx.name(),
                            %peer,
                            "client limit reached, rejecting connection"
                        );
                        tasks.spawn(reject(stream, ctx.cancel_token().child_token()));
                        continue;
                    };
                    let (reader, writer) = stream.into_split();
                    let cancel = ctx.cancel_token().child_token();
                    let id = clients.register(writer, peer, cancel.clone()).await;
                    tasks.spawn(serve_client(ClientTask {
                        id,
                        reader,
                        cancel,
                        ctx: ctx.clone(),
                        clients: Arc::clone(&clients),
                        telemetry: Arc::clone(&telemetry),
                        _permit: permit,
                    }));
                }
                Err(e) => {
                    warn!(device = ctx.name(), error = %e, "accept failed");
                    tokio::select! {
                        () = ctx.cancelled() => break,
                        () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    }
                }
            },
        }
    }

    drop(listener);
    // Client tokens are children of the device token, so they are already
    // cancelled here.
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(device = ctx.name(), error = %e, "client task failed");
        }
    }
    debug!(device = ctx.name(), "accept loop stopped");
}

async fn reject(mut stream: TcpStream, cancel: CancellationToken) {
    let line = protocol::error_response("server busy");
    let farewell = async {
        let _ = stream.write_all(line.as_bytes()).await;
        let _ = stream.shutdown().await;
    };
    tokio::select! {
        () = cancel.cancelled() => {}
        _ = tokio::time::timeout(REJECT_WRITE_TIMEOUT, farewell) => {}
    }
}

struct ClientTask {
    id: ClientId,
    reader: OwnedReadHalf,
    cancel: CancellationToken,
    ctx: DeviceContext,
    clients: Arc<ClientRegistry>,
    telemetry: Arc<Telemetry>,
    _permit: OwnedSemaphorePermit,
}

async fn serve_client(task: ClientTask) {
    let ClientTask {
        id,
        reader,
        cancel,
        ctx,
        clients,
        telemetry,
        _permit,
    } = task;
    let mut frames = FramedRead::new(reader, RequestCodec::new(MAX_REQUEST_LEN));

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = frames.next() => next,
        };

        let response = match next {
            Some(Ok(RequestFrame::Line(request))) => {
                trace!(device = ctx.name(), client = %id, ?request, "request");
                telemetry.respond(ctx.name(), &request)
            }
            Some(Ok(RequestFrame::TooLong)) => {
                debug!(
                    device = ctx.name(),
                    client = %id,
                    limit = MAX_REQUEST_LEN,
                    "request too long"
                );
                protocol::error_response("request too long")
            }
            Some(Err(e)) => {
                debug!(device = ctx.name(), client = %id, error = %e, "client read failed");
                break;
            }
            None => {
                debug!(device = ctx.name(), client = %id, "client closed connection");
                break;
            }
        };
        if clients.send_to(id, &response).await.is_err() {
            break;
        }
    }

    if clients.remove(id).await {
        info!(device = ctx.name(), client = %id, "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_after_ten_thousand() {
        let telemetry = Telemetry::new();
        telemetry.counter.store(COUNTER_WRAP, Ordering::Release);
        assert_eq!(telemetry.advance(1), 0);
        assert_eq!(telemetry.advance(2), 1);
    }

    #[test]
    fn status_cycles_every_two_hundred_ticks() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.status_label(), "normal");
        for tick in 1..200 {
            telemetry.advance(tick);
        }
        assert_eq!(telemetry.status_label(), "normal");
        telemetry.advance(200);
        assert_eq!(telemetry.status_label(), "warning");
        telemetry.advance(800);
        assert_eq!(telemetry.status_label(), "normal");
    }

    #[test]
    fn custom_messages_refresh_every_fifty_ticks() {
        let telemetry = Telemetry::new();
        telemetry.advance(49);
        assert_eq!(telemetry.custom_messages()[1], "sensor calibrating");
        telemetry.advance(50);
        assert!(telemetry.custom_messages()[1].starts_with("updated at "));
    }

    #[test]
    fn unknown_requests_get_error_lines() {
        let telemetry = Telemetry::new();
        let line = telemetry.respond("dev", &Request::parse("PING"));
        assert!(line.starts_with("ERROR|"));
        assert!(line.ends_with("|unknown request: PING\n"));
    }
}
