//! Write-once slot holding the fallback callback.
//!
//! Only one component in a process may own the fallback. A second
//! registration means two subsystems both assumed they did, so it is rejected
//! rather than silently replacing the first.

use super::RemoteCallback;
use crate::{CallbackError, Result};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static PROCESS_DEFAULT: DefaultCallbackRegistry = DefaultCallbackRegistry::new();

/// Holds at most one default [`RemoteCallback`].
pub struct DefaultCallbackRegistry {
    slot: OnceLock<Arc<dyn RemoteCallback>>,
}

impl DefaultCallbackRegistry {
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Register the fallback implementation.
    ///
    /// Returns `Ok(true)` when `implementation` was stored and `Ok(false)` when
    /// it was `None` (nothing is stored). Fails with `DuplicateRegistration`
    /// once a default exists, including when `implementation` is `None`.
    pub fn set_default(&self, implementation: Option<Arc<dyn RemoteCallback>>) -> Result<bool> {
        if self.slot.get().is_some() {
            return Err(CallbackError::DuplicateRegistration);
        }
        let Some(implementation) = implementation else {
            return Ok(false);
        };
        self.slot
            .set(implementation)
            .map_err(|_| CallbackError::DuplicateRegistration)?;
        debug!("Default callback registered");
        Ok(true)
    }

    pub fn get_default(&self) -> Option<Arc<dyn RemoteCallback>> {
        self.slot.get().cloned()
    }
}

impl Default for DefaultCallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefaultCallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCallbackRegistry")
            .field("registered", &self.slot.get().is_some())
            .finish()
    }
}

/// Register the process-wide default. See [`DefaultCallbackRegistry::set_default`].
pub fn set_default_impl(implementation: Option<Arc<dyn RemoteCallback>>) -> Result<bool> {
    PROCESS_DEFAULT.set_default(implementation)
}

/// The process-wide default, if one was registered.
pub fn default_impl() -> Option<Arc<dyn RemoteCallback>> {
    PROCESS_DEFAULT.get_default()
}
