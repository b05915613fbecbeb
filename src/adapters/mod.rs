//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter    | Implements | Connects to                 |
//! |------------|------------|-----------------------------|
//! | `ble_gatt` | (RpcServer)| Bluedroid GATT server       |
//! | `nvs`      | KvStore    | NVS / in-memory store       |
//! | `time`     | Clock      | ESP32 system timer          |

pub mod ble_gatt;
pub mod nvs;
pub mod time;
