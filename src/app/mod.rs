//! Application layer.
//!
//! [`ports`] defines the traits the RPC core consumes (storage, clock);
//! [`service`] registers the device's built-in RPC methods; [`device`]
//! wires them, the auth store and the persistence tickers together.

pub mod device;
pub mod ports;
pub mod service;
