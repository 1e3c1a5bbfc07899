//! Binder that forwards transactions to another process.
//!
//! Establishes a TCP connection to a [`BinderServer`](super::BinderServer) and
//! sends every transaction over it. Once the connection breaks the binder is
//! dead for good: later transactions fail with `DeadObject` without touching
//! the network. A payload over the frame limit is refused before anything is
//! written and leaves the connection usable.
//!
//! # Thread Safety
//!
//! A tokio `Mutex` serializes access to the stream, so one `RemoteBinder` can
//! be shared between tasks. Transactions from one binder arrive in the order
//! they acquired the lock.
//!
//! Each exchange runs in its own spawned task that owns the lock guard. A
//! caller that stops waiting does not abandon a half-written request or an
//! unread reply on the stream.

use super::protocol::{
    check_frame_size, read_frame, write_frame, Admission, ReplyStatus, TransactionReply,
    TransactionRequest,
};
use crate::binder::{Binder, TransactStatus, TransactionFlags};
use crate::config::IpcConfig;
use crate::parcel::Parcel;
use crate::{CallbackError, Result};
use futures::FutureExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Client end of a hosted binder.
#[derive(Debug)]
pub struct RemoteBinder {
    stream: Arc<Mutex<Option<TcpStream>>>,
    addr: SocketAddr,
}

impl RemoteBinder {
    /// Connect to a binder server.
    ///
    /// Uses [`IpcConfig::CONNECT_TIMEOUT`] for the connection and the
    /// server's admission frame. An unreachable or full server is reported as
    /// `DeadObject`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let dead = || CallbackError::DeadObject {
            addr: addr.to_string(),
        };

        let (stream, admission) = tokio::time::timeout(IpcConfig::CONNECT_TIMEOUT, async {
            let mut stream = TcpStream::connect(addr).await?;
            let admission = read_frame(&mut stream).await?;
            Ok::<_, CallbackError>((stream, admission))
        })
        .await
        .map_err(|_| dead())?
        .map_err(|e| {
            debug!("Connecting to binder at {} failed: {}", addr, e);
            dead()
        })?;

        match admission.as_deref().map(Admission::decode) {
            Some(Ok(Admission::Accepted)) => {}
            Some(Ok(Admission::Busy)) => {
                warn!("Binder at {} refused the connection: server busy", addr);
                return Err(dead());
            }
            Some(Err(e)) => {
                warn!("Binder at {} sent a bad admission frame: {}", addr, e);
                return Err(dead());
            }
            None => return Err(dead()),
        }

        debug!("Connected to binder at {}", addr);

        Ok(Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            addr,
        })
    }

    /// Get the address of the hosting process.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection is still usable.
    pub async fn is_alive(&self) -> bool {
        let guard = self.stream.lock().await;
        matches!(guard.as_ref(), Some(stream) if !peer_closed(stream))
    }

    fn dead(&self) -> CallbackError {
        CallbackError::DeadObject {
            addr: self.addr.to_string(),
        }
    }
}

/// Check for a closed connection without blocking or consuming input.
fn peer_closed(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.peek(&mut buf).now_or_never() {
        // Nothing pending: open and idle.
        None => false,
        Some(Ok(0)) => true,
        Some(Ok(_)) => false,
        Some(Err(_)) => true,
    }
}

/// Send one request and, unless one-way, read its reply frame.
async fn exchange(
    stream: &mut TcpStream,
    request: &[u8],
    oneway: bool,
) -> Result<Option<Vec<u8>>> {
    let (mut reader, mut writer) = stream.split();
    write_frame(&mut writer, request).await?;
    if oneway {
        return Ok(None);
    }
    match read_frame(&mut reader).await? {
        Some(frame) => Ok(Some(frame)),
        None => Err(CallbackError::Transport {
            message: "connection closed before the reply".to_string(),
            source: None,
        }),
    }
}

#[async_trait::async_trait]
impl Binder for RemoteBinder {
    async fn transact(
        &self,
        code: u32,
        data: &Parcel,
        flags: TransactionFlags,
    ) -> Result<TransactStatus> {
        let request = TransactionRequest::new(code, flags, data.as_bytes()).encode();
        check_frame_size(request.len())?;

        let mut guard = Arc::clone(&self.stream).lock_owned().await;
        let closed = match guard.as_ref() {
            Some(stream) => peer_closed(stream),
            None => return Err(self.dead()),
        };
        if closed {
            warn!("Binder at {} closed the connection", self.addr);
            *guard = None;
            return Err(self.dead());
        }

        let addr = self.addr;
        let oneway = flags.is_oneway();
        let task = tokio::spawn(async move {
            let Some(stream) = guard.as_mut() else {
                return Err(CallbackError::DeadObject {
                    addr: addr.to_string(),
                });
            };
            let outcome = exchange(stream, &request, oneway).await;
            if let Err(e) = &outcome {
                debug!("Transaction {:#x} to {} failed: {}", code, addr, e);
                *guard = None;
            }
            outcome
        });

        let frame = match task.await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return Ok(TransactStatus::Handled(Parcel::obtain())),
            Ok(Err(_)) => return Err(self.dead()),
            Err(e) => {
                return Err(CallbackError::Transport {
                    message: format!("transaction task failed: {}", e),
                    source: None,
                })
            }
        };

        let reply = TransactionReply::decode(&frame)?;
        match reply.status {
            ReplyStatus::Handled => {
                let mut parcel = Parcel::obtain();
                parcel.append_raw(&reply.data);
                Ok(TransactStatus::Handled(parcel))
            }
            ReplyStatus::Unhandled => Ok(TransactStatus::Unhandled),
        }
    }
}
