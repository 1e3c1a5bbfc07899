//! Centralized configuration for the remote callback.
//!
//! This module provides limits for the parcel codec and the local transport.

use std::time::Duration;

/// Local transport configuration.
pub struct IpcConfig;

impl IpcConfig {
    /// Listen address used when no explicit host/port is given.
    pub const BIND_ADDR: &'static str = "127.0.0.1:0";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const MAX_CONNECTIONS: usize = 16;
    pub const MAX_MESSAGE_SIZE: usize = 1_048_576; // 1MB
}

/// Parcel codec configuration.
pub struct ParcelConfig;

impl ParcelConfig {
    /// Number of recycled buffers kept around for `Parcel::obtain`.
    pub const POOL_CAPACITY: usize = 6;
    pub const MAX_BUNDLE_DEPTH: usize = 16;
    /// Strict-mode policy written ahead of every interface token.
    pub const STRICT_MODE_POLICY: i32 = 0;
}
