//! Chunked JSON RPC over BLE characteristics.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RPC Stack                             │
//! │                                                              │
//! │  GATT write ──▶ ┌─────────┐ complete ┌────────────┐          │
//! │                 │ Chunker │─────────▶│ Dispatcher │          │
//! │  GATT read  ◀── │ (queue) │◀─────────│  (JSON)    │          │
//! │                 └─────────┘ response └────────────┘          │
//! │                      ▲                     │                 │
//! │                      │ per connection      ▼                 │
//! │                 ┌─────────┐         handlers / AuthStore     │
//! │                 │RpcServer│                                  │
//! │                 └─────────┘                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod auth_store;
pub mod chunker;
pub mod dispatcher;
pub mod server;
pub mod value;

pub use chunker::{ChunkEvent, Chunker, ResponseAssembler, split_message};
pub use dispatcher::{Dispatcher, encode_response};
pub use server::{Channel, ConnHandle, RpcServer};
pub use value::{Args, Kind, Value};
