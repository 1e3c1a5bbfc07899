//! Receiving side of the callback interface.

use super::{RemoteCallback, DESCRIPTOR, TRANSACTION_SEND_RESULT};
use crate::binder::{
    self, Binder, LocalBinder, LocalInterface, TransactionFlags, TransactionHandler,
    FIRST_CALL_TRANSACTION, INTERFACE_TRANSACTION, LAST_CALL_TRANSACTION,
};
use crate::bundle::Bundle;
use crate::parcel::Parcel;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Dispatches incoming transactions to a local [`RemoteCallback`].
///
/// Holds no per-call state, so one stub can serve any number of concurrent
/// transactions.
pub struct CallbackStub {
    inner: Arc<dyn RemoteCallback>,
}

impl CallbackStub {
    pub fn new(inner: Arc<dyn RemoteCallback>) -> Self {
        Self { inner }
    }

    /// Wrap the stub in a local binder that can be hosted or handed out.
    ///
    /// The implementation is attached under [`DESCRIPTOR`] so that
    /// `as_interface` on the same process returns it without marshaling.
    pub fn into_binder(self) -> Arc<dyn Binder> {
        let local: LocalInterface = Arc::new(self.inner.clone());
        Arc::new(LocalBinder::new(Arc::new(self)).attach_interface(DESCRIPTOR, local))
    }
}

#[async_trait::async_trait]
impl TransactionHandler for CallbackStub {
    async fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        flags: TransactionFlags,
    ) -> Result<bool> {
        if (FIRST_CALL_TRANSACTION..=LAST_CALL_TRANSACTION).contains(&code) {
            data.enforce_interface(DESCRIPTOR)?;
        }

        match code {
            INTERFACE_TRANSACTION => {
                reply.write_string(Some(DESCRIPTOR));
                Ok(true)
            }
            TRANSACTION_SEND_RESULT => {
                let result = data.read_typed::<Bundle>()?;
                debug!(
                    "send_result: {} entries (oneway={})",
                    result.as_ref().map_or(0, Bundle::len),
                    flags.is_oneway()
                );
                self.inner.send_result(result).await?;
                if !flags.is_oneway() {
                    reply.write_no_exception();
                }
                Ok(true)
            }
            _ => binder::default_on_transact(code, data, reply, flags),
        }
    }
}
