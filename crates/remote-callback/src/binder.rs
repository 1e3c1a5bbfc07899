//! Transaction primitive shared by every transport.
//!
//! A [`Binder`] accepts a transaction (code, request parcel, flags) and reports
//! whether the target handled it. [`LocalBinder`] runs a
//! [`TransactionHandler`] in-process; `ipc::RemoteBinder` forwards the same
//! transaction over a socket to a `LocalBinder` hosted by another process.

use crate::parcel::{Parcel, PooledParcel};
use crate::Result;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;
pub const LAST_CALL_TRANSACTION: u32 = 0x00ff_ffff;
/// `'_PNG'`: liveness check answered by every binder.
pub const PING_TRANSACTION: u32 = u32::from_be_bytes(*b"_PNG");
/// `'_NTF'`: asks the target for its interface descriptor.
pub const INTERFACE_TRANSACTION: u32 = u32::from_be_bytes(*b"_NTF");

/// An implementation object attached to a local binder, downcast by
/// interface-specific `as_interface` helpers.
pub type LocalInterface = Arc<dyn Any + Send + Sync>;

/// Per-transaction flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransactionFlags(u32);

impl TransactionFlags {
    pub const NONE: Self = Self(0);
    /// Do not wait for, or expect, a reply.
    pub const ONEWAY: Self = Self(0x01);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_oneway(self) -> bool {
        self.0 & Self::ONEWAY.0 != 0
    }
}

/// Outcome of a transaction that reached its target.
#[derive(Debug)]
pub enum TransactStatus {
    /// The target recognized the code. Carries the reply (empty for one-way).
    Handled(PooledParcel),
    /// The target does not know this transaction code.
    Unhandled,
}

impl TransactStatus {
    pub fn is_handled(&self) -> bool {
        matches!(self, TransactStatus::Handled(_))
    }
}

/// Receiving side of a transaction.
///
/// Returns `Ok(false)` for codes the handler does not recognize. Errors are
/// turned into exception replies by the binder that owns the handler.
#[async_trait::async_trait]
pub trait TransactionHandler: Send + Sync + 'static {
    async fn on_transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
        flags: TransactionFlags,
    ) -> Result<bool>;
}

/// Base handling for codes an interface stub does not claim.
pub fn default_on_transact(
    code: u32,
    _data: &mut Parcel,
    _reply: &mut Parcel,
    _flags: TransactionFlags,
) -> Result<bool> {
    match code {
        PING_TRANSACTION => Ok(true),
        _ => {
            debug!("Unhandled transaction code {:#x}", code);
            Ok(false)
        }
    }
}

/// A transaction target, local or remote.
#[async_trait::async_trait]
pub trait Binder: Send + Sync {
    async fn transact(
        &self,
        code: u32,
        data: &Parcel,
        flags: TransactionFlags,
    ) -> Result<TransactStatus>;

    /// The in-process implementation registered under `descriptor`, if this
    /// binder lives in the calling process.
    fn query_local_interface(&self, _descriptor: &str) -> Option<LocalInterface> {
        None
    }

    /// Check that the target is reachable and answering.
    async fn ping(&self) -> bool {
        let data = Parcel::new();
        matches!(
            self.transact(PING_TRANSACTION, &data, TransactionFlags::NONE)
                .await,
            Ok(TransactStatus::Handled(_))
        )
    }

    /// Ask the target which interface it implements.
    async fn interface_descriptor(&self) -> Result<Option<String>> {
        let data = Parcel::new();
        match self
            .transact(INTERFACE_TRANSACTION, &data, TransactionFlags::NONE)
            .await?
        {
            TransactStatus::Handled(mut reply) => reply.read_string(),
            TransactStatus::Unhandled => Ok(None),
        }
    }
}

/// In-process binder around a transaction handler.
pub struct LocalBinder {
    handler: Arc<dyn TransactionHandler>,
    attached: Option<(String, LocalInterface)>,
}

impl LocalBinder {
    pub fn new(handler: Arc<dyn TransactionHandler>) -> Self {
        Self {
            handler,
            attached: None,
        }
    }

    /// Register the implementation returned by `query_local_interface`.
    pub fn attach_interface(
        mut self,
        descriptor: impl Into<String>,
        interface: LocalInterface,
    ) -> Self {
        self.attached = Some((descriptor.into(), interface));
        self
    }

    /// Run the handler, converting handler errors into exception replies.
    ///
    /// One-way transactions never produce a reply; their failures are logged
    /// and dropped.
    async fn execute(
        &self,
        code: u32,
        data: &Parcel,
        flags: TransactionFlags,
    ) -> TransactStatus {
        let mut incoming = Parcel::obtain();
        incoming.append_raw(data.as_bytes());
        let mut reply = Parcel::obtain();

        match self
            .handler
            .on_transact(code, &mut incoming, &mut reply, flags)
            .await
        {
            Ok(true) => {
                if flags.is_oneway() {
                    reply.clear();
                }
                TransactStatus::Handled(reply)
            }
            Ok(false) => TransactStatus::Unhandled,
            Err(e) if flags.is_oneway() => {
                warn!("One-way transaction {:#x} failed: {}", code, e);
                reply.clear();
                TransactStatus::Handled(reply)
            }
            Err(e) => {
                debug!("Transaction {:#x} failed, replying with exception: {}", code, e);
                reply.clear();
                reply.write_exception(&e);
                TransactStatus::Handled(reply)
            }
        }
    }
}

impl std::fmt::Debug for LocalBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBinder")
            .field(
                "descriptor",
                &self.attached.as_ref().map(|(descriptor, _)| descriptor),
            )
            .finish()
    }
}

#[async_trait::async_trait]
impl Binder for LocalBinder {
    async fn transact(
        &self,
        code: u32,
        data: &Parcel,
        flags: TransactionFlags,
    ) -> Result<TransactStatus> {
        Ok(self.execute(code, data, flags).await)
    }

    fn query_local_interface(&self, descriptor: &str) -> Option<LocalInterface> {
        match &self.attached {
            Some((attached, interface)) if attached == descriptor => Some(interface.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallbackError;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl TransactionHandler for EchoHandler {
        async fn on_transact(
            &self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
            flags: TransactionFlags,
        ) -> Result<bool> {
            match code {
                INTERFACE_TRANSACTION => {
                    reply.write_string(Some("test.IEcho"));
                    Ok(true)
                }
                FIRST_CALL_TRANSACTION => {
                    let value = data.read_i32()?;
                    reply.write_no_exception();
                    reply.write_i32(value * 2);
                    Ok(true)
                }
                2 => Err(CallbackError::Other("handler failed".into())),
                _ => default_on_transact(code, data, reply, flags),
            }
        }
    }

    fn echo_binder() -> LocalBinder {
        LocalBinder::new(Arc::new(EchoHandler))
    }

    #[test]
    fn test_reserved_codes() {
        assert_eq!(PING_TRANSACTION, 0x5f50_4e47);
        assert_eq!(INTERFACE_TRANSACTION, 0x5f4e_5446);
        assert!(INTERFACE_TRANSACTION > LAST_CALL_TRANSACTION);
    }

    #[test]
    fn test_flags() {
        assert!(TransactionFlags::ONEWAY.is_oneway());
        assert!(!TransactionFlags::NONE.is_oneway());
        assert!(TransactionFlags::from_bits(0x11).is_oneway());
        assert_eq!(TransactionFlags::ONEWAY.bits(), 1);
    }

    #[tokio::test]
    async fn test_local_transact_returns_reply() {
        let binder = echo_binder();
        let mut data = Parcel::new();
        data.write_i32(21);

        match binder
            .transact(FIRST_CALL_TRANSACTION, &data, TransactionFlags::NONE)
            .await
            .unwrap()
        {
            TransactStatus::Handled(mut reply) => {
                reply.read_exception().unwrap();
                assert_eq!(reply.read_i32().unwrap(), 42);
            }
            TransactStatus::Unhandled => panic!("Expected Handled"),
        }
    }

    #[tokio::test]
    async fn test_local_oneway_has_empty_reply() {
        let binder = echo_binder();
        let mut data = Parcel::new();
        data.write_i32(1);

        match binder
            .transact(FIRST_CALL_TRANSACTION, &data, TransactionFlags::ONEWAY)
            .await
            .unwrap()
        {
            TransactStatus::Handled(reply) => assert_eq!(reply.data_size(), 0),
            TransactStatus::Unhandled => panic!("Expected Handled"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_becomes_exception_reply() {
        let binder = echo_binder();
        let data = Parcel::new();

        let status = binder
            .transact(2, &data, TransactionFlags::NONE)
            .await
            .unwrap();
        let TransactStatus::Handled(mut reply) = status else {
            panic!("Expected Handled");
        };
        match reply.read_exception() {
            Err(CallbackError::Remote { message, .. }) => assert_eq!(message, "handler failed"),
            other => panic!("Expected Remote, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported_not_panicked() {
        let binder = echo_binder();
        // No i32 argument at all.
        let data = Parcel::new();

        let status = binder
            .transact(FIRST_CALL_TRANSACTION, &data, TransactionFlags::NONE)
            .await
            .unwrap();
        let TransactStatus::Handled(mut reply) = status else {
            panic!("Expected Handled");
        };
        match reply.read_exception() {
            Err(CallbackError::Remote { code, .. }) => {
                assert_eq!(code, crate::parcel::EX_BAD_PARCELABLE)
            }
            other => panic!("Expected Remote, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_code_unhandled_and_ping_answered() {
        let binder = echo_binder();
        let data = Parcel::new();

        let status = binder
            .transact(0x1234, &data, TransactionFlags::NONE)
            .await
            .unwrap();
        assert!(!status.is_handled());
        assert!(binder.ping().await);
    }

    #[tokio::test]
    async fn test_interface_descriptor() {
        let binder = echo_binder();
        assert_eq!(
            binder.interface_descriptor().await.unwrap().as_deref(),
            Some("test.IEcho")
        );
    }

    #[test]
    fn test_query_local_interface_matches_descriptor() {
        let marker: LocalInterface = Arc::new(7_u32);
        let binder = echo_binder().attach_interface("test.IEcho", marker);

        let found = binder.query_local_interface("test.IEcho").unwrap();
        assert_eq!(found.downcast_ref::<u32>(), Some(&7));
        assert!(binder.query_local_interface("test.IOther").is_none());
    }
}
