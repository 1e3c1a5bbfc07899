//! Cross-process transport for binders.
//!
//! Carries binder transactions over `127.0.0.1` TCP connections using
//! length-prefixed frames.
//!
//! # Architecture
//!
//! - **Server**: hosts a binder, accepts connections, runs incoming transactions
//! - **Client**: a `Binder` that forwards transactions to a hosted one
//! - **Protocol**: shared framing and transaction envelopes used by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::RemoteBinder;
pub use protocol::{ReplyStatus, TransactionReply, TransactionRequest};
pub use server::{BinderServer, BinderServerHandle};
