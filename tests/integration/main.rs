//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the in-memory [`mock_kv::MockKv`] backend. All tests run on the
//! host with no BLE stack or flash required.

mod auth_flow_tests;
mod client;
mod device_tests;
mod mock_kv;
mod preference_tests;
mod server_flow_tests;
