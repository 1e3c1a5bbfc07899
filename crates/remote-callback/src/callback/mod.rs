//! The `send_result` callback interface.
//!
//! # Architecture
//!
//! - **`RemoteCallback`**: the contract, implemented by application code and by
//!   the proxy alike
//! - **Stub**: decodes incoming transactions and calls a local implementation
//! - **Proxy**: encodes calls and sends them to a remote binder
//! - **Registry**: the write-once fallback used by one-way proxies

pub mod proxy;
pub mod registry;
pub mod stub;

pub use proxy::{CallbackProxy, DeliveryPolicy};
pub use registry::{default_impl, set_default_impl, DefaultCallbackRegistry};
pub use stub::CallbackStub;

use crate::binder::{Binder, FIRST_CALL_TRANSACTION};
use crate::bundle::Bundle;
use crate::Result;
use std::sync::Arc;

/// Identity of the interface, carried in every request token.
pub const DESCRIPTOR: &str = "me.zhanghai.android.files.util.IRemoteCallback";

pub const TRANSACTION_SEND_RESULT: u32 = FIRST_CALL_TRANSACTION;

/// Receives the result of an operation that ran somewhere else.
#[async_trait::async_trait]
pub trait RemoteCallback: Send + Sync {
    /// Deliver `result`, which may be absent.
    async fn send_result(&self, result: Option<Bundle>) -> Result<()>;

    /// The binder this callback forwards through, if it is a proxy.
    fn as_binder(&self) -> Option<Arc<dyn Binder>> {
        None
    }
}

/// Callback that accepts and discards every result.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

#[async_trait::async_trait]
impl RemoteCallback for NoopCallback {
    async fn send_result(&self, _result: Option<Bundle>) -> Result<()> {
        Ok(())
    }
}

/// Resolve a binder into a callback.
///
/// A binder hosted in this process yields its implementation directly so
/// calls skip marshaling; anything else is wrapped in a [`CallbackProxy`]
/// with the default delivery policy.
pub fn as_interface(binder: Option<Arc<dyn Binder>>) -> Option<Arc<dyn RemoteCallback>> {
    let binder = binder?;
    if let Some(local) = binder
        .query_local_interface(DESCRIPTOR)
        .and_then(|iface| iface.downcast_ref::<Arc<dyn RemoteCallback>>().cloned())
    {
        return Some(local);
    }
    Some(Arc::new(CallbackProxy::new(binder)))
}
