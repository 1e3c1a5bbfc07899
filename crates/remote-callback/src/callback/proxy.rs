//! Sending side of the callback interface.

use super::registry::{self, DefaultCallbackRegistry};
use super::{RemoteCallback, DESCRIPTOR, TRANSACTION_SEND_RESULT};
use crate::binder::{Binder, TransactStatus, TransactionFlags};
use crate::bundle::Bundle;
use crate::parcel::Parcel;
use crate::{CallbackError, Result};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a proxy delivers `send_result`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Wait for the callee to acknowledge, re-raising its exception if any.
    Acknowledged,
    /// Fire and forget. An undelivered result goes to the fallback, if any.
    #[default]
    OneWay,
}

impl DeliveryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPolicy::Acknowledged => "ack",
            DeliveryPolicy::OneWay => "oneway",
        }
    }
}

impl std::fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeliveryPolicy {
    type Err = CallbackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ack" | "acknowledged" => Ok(DeliveryPolicy::Acknowledged),
            "oneway" | "one-way" => Ok(DeliveryPolicy::OneWay),
            other => Err(CallbackError::Config {
                message: format!("unknown delivery policy: {}", other),
            }),
        }
    }
}

/// Implements [`RemoteCallback`] by forwarding to a remote binder.
pub struct CallbackProxy {
    remote: Arc<dyn Binder>,
    policy: DeliveryPolicy,
    fallback: Option<Arc<dyn RemoteCallback>>,
    registry: Option<Arc<DefaultCallbackRegistry>>,
}

impl CallbackProxy {
    /// Proxy with the default (one-way) policy, falling back to the
    /// process-wide default implementation.
    pub fn new(remote: Arc<dyn Binder>) -> Self {
        Self {
            remote,
            policy: DeliveryPolicy::default(),
            fallback: None,
            registry: None,
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `fallback` for undelivered one-way results instead of any
    /// registered default.
    pub fn with_fallback(mut self, fallback: Arc<dyn RemoteCallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Consult `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<DefaultCallbackRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn interface_descriptor(&self) -> &'static str {
        DESCRIPTOR
    }

    fn resolve_fallback(&self) -> Option<Arc<dyn RemoteCallback>> {
        if let Some(fallback) = &self.fallback {
            return Some(fallback.clone());
        }
        match &self.registry {
            Some(registry) => registry.get_default(),
            None => registry::default_impl(),
        }
    }

    async fn send_acknowledged(&self, data: &Parcel) -> Result<()> {
        match self
            .remote
            .transact(TRANSACTION_SEND_RESULT, data, TransactionFlags::NONE)
            .await?
        {
            TransactStatus::Handled(mut reply) => reply.read_exception(),
            TransactStatus::Unhandled => Err(CallbackError::UnknownTransaction {
                code: TRANSACTION_SEND_RESULT,
            }),
        }
    }

    async fn send_oneway(&self, data: &Parcel) -> Result<bool> {
        match self
            .remote
            .transact(TRANSACTION_SEND_RESULT, data, TransactionFlags::ONEWAY)
            .await
        {
            Ok(status) => Ok(status.is_handled()),
            Err(e) if e.is_transport() => {
                warn!("One-way send_result not delivered: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for CallbackProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackProxy")
            .field("policy", &self.policy)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait::async_trait]
impl RemoteCallback for CallbackProxy {
    async fn send_result(&self, result: Option<Bundle>) -> Result<()> {
        let mut data = Parcel::obtain();
        data.write_interface_token(DESCRIPTOR);
        // A result that cannot be marshaled is the caller's error, never an
        // undelivered one.
        data.write_typed(result.as_ref())?;

        match self.policy {
            DeliveryPolicy::Acknowledged => self.send_acknowledged(&data).await,
            DeliveryPolicy::OneWay => {
                if self.send_oneway(&data).await? {
                    return Ok(());
                }
                match self.resolve_fallback() {
                    Some(fallback) => {
                        debug!("Delivering send_result to local fallback");
                        fallback.send_result(result).await
                    }
                    None => Ok(()),
                }
            }
        }
    }

    fn as_binder(&self) -> Option<Arc<dyn Binder>> {
        Some(self.remote.clone())
    }
}
