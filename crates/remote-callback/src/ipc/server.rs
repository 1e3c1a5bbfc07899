//! TCP host for a binder.
//!
//! Listens on a local address (OS-assigned port by default), accepts
//! connections from other processes, and runs each incoming transaction
//! against the hosted [`Binder`].
//!
//! Every accepted connection first receives an [`Admission`] frame. When the
//! connection cap is reached the server answers `Busy` and closes the stream,
//! so a client sees a refusal instead of a silent hang.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is handled in its own
//! spawned task. Transactions on one connection run in arrival order; separate
//! connections run concurrently against the same binder.

use super::protocol::{read_frame, write_frame, Admission, TransactionReply, TransactionRequest};
use crate::binder::{Binder, TransactStatus};
use crate::config::IpcConfig;
use crate::parcel::Parcel;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Counts live connections against a fixed cap.
#[derive(Debug)]
struct ConnectionSlots {
    active: AtomicUsize,
    limit: usize,
}

impl ConnectionSlots {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            limit,
        })
    }

    fn try_acquire(self: &Arc<Self>) -> Option<ConnectionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionSlot {
                slots: Arc::clone(self),
            })
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// One admitted connection. Releases its slot when dropped.
struct ConnectionSlot {
    slots: Arc<ConnectionSlots>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.slots.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a running binder server. Dropping shuts down the server.
pub struct BinderServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: watch::Sender<bool>,
    slots: Arc<ConnectionSlots>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl BinderServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of admitted connections still open.
    pub fn active_connections(&self) -> usize {
        self.slots.active()
    }

    /// Stop accepting connections and close the active ones.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for BinderServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Exposes a binder to other processes.
#[derive(Debug, Clone)]
pub struct BinderServer {
    bind_addr: String,
    max_connections: usize,
}

impl Default for BinderServer {
    fn default() -> Self {
        Self {
            bind_addr: IpcConfig::BIND_ADDR.to_string(),
            max_connections: IpcConfig::MAX_CONNECTIONS,
        }
    }
}

impl BinderServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `addr` instead of [`IpcConfig::BIND_ADDR`].
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Admit at most `limit` concurrent connections.
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit;
        self
    }

    /// Host `binder` on [`IpcConfig::BIND_ADDR`].
    pub async fn start(binder: Arc<dyn Binder>) -> Result<BinderServerHandle> {
        Self::new().serve(binder).await
    }

    /// Host `binder` on an explicit address.
    pub async fn start_on(
        bind_addr: &str,
        binder: Arc<dyn Binder>,
    ) -> Result<BinderServerHandle> {
        Self::new().bind_addr(bind_addr).serve(binder).await
    }

    /// Bind and start accepting connections for `binder`.
    pub async fn serve(self, binder: Arc<dyn Binder>) -> Result<BinderServerHandle> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let addr = listener.local_addr()?;

        info!(
            "Binder server listening on {} (max {} connections)",
            addr, self.max_connections
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = ConnectionSlots::new(self.max_connections);

        let accept_task = tokio::spawn(accept_loop(listener, binder, shutdown_rx, slots.clone()));

        Ok(BinderServerHandle {
            addr,
            port: addr.port(),
            shutdown_tx,
            slots,
            accept_task: Some(accept_task),
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    binder: Arc<dyn Binder>,
    mut shutdown_rx: watch::Receiver<bool>,
    slots: Arc<ConnectionSlots>,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("Binder server shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            },
        };

        match slots.try_acquire() {
            Some(slot) => {
                let binder = binder.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    debug!("Connection from {}", peer_addr);
                    if let Err(e) = serve_connection(stream, &*binder, shutdown_rx).await {
                        debug!("Connection {} ended: {}", peer_addr, e);
                    }
                    drop(slot);
                });
            }
            None => {
                warn!(
                    "Refusing connection from {}: {} connections open",
                    peer_addr,
                    slots.active()
                );
                tokio::spawn(refuse(stream));
            }
        }
    }
}

async fn refuse(mut stream: TcpStream) {
    if let Err(e) = write_frame(&mut stream, &Admission::Busy.encode()).await {
        debug!("Could not tell refused peer: {}", e);
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    binder: &dyn Binder,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();
    write_frame(&mut writer, &Admission::Accepted.encode()).await?;

    loop {
        let frame = tokio::select! {
            result = read_frame(&mut reader) => match result? {
                Some(f) => f,
                None => return Ok(()),
            },
            _ = shutdown_rx.changed() => return Ok(()),
        };

        // A broken envelope means the stream can no longer be trusted.
        let request = TransactionRequest::decode(&frame)?;

        if let Some(reply) = process_request(&request, binder).await {
            write_frame(&mut writer, &reply.encode()).await?;
        }
    }
}

/// Run one transaction. One-way requests produce no reply.
async fn process_request(
    request: &TransactionRequest,
    binder: &dyn Binder,
) -> Option<TransactionReply> {
    let data = Parcel::from_bytes(&request.data);
    let outcome = binder.transact(request.code, &data, request.flags).await;

    if request.flags.is_oneway() {
        if let Err(e) = outcome {
            warn!("One-way transaction {:#x} failed: {}", request.code, e);
        }
        return None;
    }

    Some(match outcome {
        Ok(TransactStatus::Handled(reply)) => TransactionReply::handled(reply.as_bytes()),
        Ok(TransactStatus::Unhandled) => TransactionReply::unhandled(),
        Err(e) => {
            let mut reply = Parcel::obtain();
            reply.write_exception(&e);
            TransactionReply::handled(reply.as_bytes())
        }
    })
}
