//! Chunked JSON RPC transport for BLE devices.
//!
//! Exposes the transport core (chunk framing, dispatcher, sessions,
//! authentication), the lock-free preference store and the adapters that
//! bind them to ESP-IDF. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; every other target
//! gets a simulation backend for host tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod drivers;
pub mod error;
pub mod prefs;
pub mod rpc;
pub mod versioned;

pub use error::{Error, Result};
