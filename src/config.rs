//! Transport configuration parameters
//!
//! All tunable parameters of the BLE RPC core. Values can be overridden by
//! the embedding firmware (NVS blob or build-time constants); the defaults
//! match the reference device.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rpc::chunker::HEADER_SIZE;

/// Largest attribute value a GATT characteristic may carry.
pub const MAX_ATTRIBUTE_SIZE: usize = 512;

/// Session map capacity (power of two for `heapless::FnvIndexMap`).
pub const MAX_CONNECTIONS: usize = 4;

/// Auth store slot count.
pub const AUTH_RECORDS: usize = 4;

/// Default device name, also the default of the `ble_name` preference.
pub const DEFAULT_DEVICE_NAME: &str = "Reflow Table";

/// Advertising payload budget for the device name.
pub const ADVERTISED_NAME_MAX: usize = 20;

/// Framing limits of one logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum chunk size in bytes, header included.
    pub chunk_size: usize,
    /// Maximum reassembled message size in bytes.
    pub max_message_size: usize,
}

impl ChannelConfig {
    pub const fn new(chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            chunk_size,
            max_message_size,
        }
    }

    /// Payload bytes carried by one full chunk.
    pub const fn payload_capacity(&self) -> usize {
        self.chunk_size.saturating_sub(HEADER_SIZE)
    }

    /// Reject limits the 4-byte header and 16-bit sequence cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size <= HEADER_SIZE {
            return Err(ConfigError::ValidationFailed(
                "chunk_size must exceed the chunk header",
            ));
        }
        if self.chunk_size > MAX_ATTRIBUTE_SIZE {
            return Err(ConfigError::ValidationFailed(
                "chunk_size exceeds the GATT attribute limit",
            ));
        }
        if self.max_message_size / self.payload_capacity() >= usize::from(u16::MAX) + 1 {
            return Err(ConfigError::ValidationFailed(
                "max_message_size needs more than 65535 chunks",
            ));
        }
        Ok(())
    }
}

/// Core transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    // --- RPC channel ---
    /// RPC characteristic chunk size (bytes, header included)
    pub rpc_chunk_size: usize,
    /// Largest RPC request accepted before OVERFLOW is signalled
    pub rpc_max_message_size: usize,

    // --- Auth channel ---
    pub auth_chunk_size: usize,
    pub auth_max_message_size: usize,

    // --- Persistence ---
    /// Preference persistence ticker period (milliseconds)
    pub persist_period_ms: u32,
    /// Auth store persistence ticker period (milliseconds)
    pub auth_persist_period_ms: u32,

    // --- Security ---
    /// Refuse RPC-channel requests from sessions that have not authenticated
    pub require_auth: bool,

    // --- Identity ---
    pub device_name: heapless::String<32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str(DEFAULT_DEVICE_NAME);

        Self {
            // RPC: 16 KiB request plus one chunk of slack
            rpc_chunk_size: 500,
            rpc_max_message_size: 16 * 1024 + 500,

            // Auth
            auth_chunk_size: 500,
            auth_max_message_size: 1024,

            // Persistence
            persist_period_ms: 200,
            auth_persist_period_ms: 500,

            require_auth: false,
            device_name,
        }
    }
}

impl TransportConfig {
    pub const fn rpc_channel(&self) -> ChannelConfig {
        ChannelConfig::new(self.rpc_chunk_size, self.rpc_max_message_size)
    }

    pub const fn auth_channel(&self) -> ChannelConfig {
        ChannelConfig::new(self.auth_chunk_size, self.auth_max_message_size)
    }

    /// Validate both channels and the ticker periods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpc_channel().validate()?;
        self.auth_channel().validate()?;
        if self.persist_period_ms == 0 || self.auth_persist_period_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "persistence periods must be non-zero",
            ));
        }
        if self.device_name.is_empty() {
            return Err(ConfigError::ValidationFailed("device_name is empty"));
        }
        Ok(())
    }

    /// Device name cut to the advertising budget on a UTF-8 boundary.
    pub fn advertised_name(&self) -> &str {
        truncate_utf8(&self.device_name, ADVERTISED_NAME_MAX)
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// character.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ── Tests ────────────────────────────────────────────────────
