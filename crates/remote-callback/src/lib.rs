//! Remote Callback - deliver an operation's result to whoever asked for it,
//! possibly in another process.
//!
//! The receiving side wraps a [`RemoteCallback`] in a [`CallbackStub`] and
//! hands out the resulting binder. The sending side resolves that binder with
//! [`as_interface`] and calls `send_result`. In-process binders short-circuit
//! to the implementation; remote ones go through a [`CallbackProxy`], which
//! marshals the [`Bundle`] into a [`Parcel`] and transacts it.
//!
//! # Example
//!
//! ```rust,ignore
//! use remote_callback::{as_interface, BinderServer, Bundle, CallbackStub, RemoteBinder};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> remote_callback::Result<()> {
//!     // Receiving process
//!     let binder = CallbackStub::new(Arc::new(MyCallback)).into_binder();
//!     let server = BinderServer::start(binder).await?;
//!
//!     // Sending process
//!     let remote = Arc::new(RemoteBinder::connect(server.addr()).await?);
//!     if let Some(callback) = as_interface(Some(remote)) {
//!         callback
//!             .send_result(Some(Bundle::new().with("success", true)))
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod bundle;
pub mod callback;
pub mod config;
pub mod error;
pub mod ipc;
pub mod parcel;

// Re-export commonly used types
pub use binder::{Binder, LocalBinder, TransactStatus, TransactionFlags, TransactionHandler};
pub use bundle::{Bundle, BundleValue};
pub use callback::{
    as_interface, default_impl, set_default_impl, CallbackProxy, CallbackStub,
    DefaultCallbackRegistry, DeliveryPolicy, NoopCallback, RemoteCallback, DESCRIPTOR,
};
pub use config::{IpcConfig, ParcelConfig};
pub use error::{CallbackError, Result};
pub use ipc::{BinderServer, BinderServerHandle, RemoteBinder};
pub use parcel::{Parcel, Parcelable, PooledParcel};
