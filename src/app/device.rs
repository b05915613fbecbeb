//! Device wiring: the RPC server plus its two persistence tickers.
//!
//! ```text
//!   TransportConfig ──▶ Device::new ──▶ RpcServer   (built-in + auth methods)
//!                                   ├─▶ prefs_writer (persist_period_ms)
//!                                   └─▶ auth_writer  (auth_persist_period_ms)
//! ```
//!
//! The name preference is loaded once here and becomes the configured
//! device name, so a name set over RPC is advertised from the next start.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::adapters::ble_gatt::{self, BleRpcService};
use crate::app::ports::{Clock, KvStore};
use crate::app::service::{device_name_preference, register_builtin_methods};
use crate::config::TransportConfig;
use crate::error::ConfigError;
use crate::prefs::PersistenceWriter;
use crate::rpc::auth_store::AuthStore;
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::server::RpcServer;

pub struct Device {
    pub server: RpcServer,
    /// Persists the `ble_name` preference.
    pub prefs_writer: PersistenceWriter,
    /// Persists the auth store tables.
    pub auth_writer: PersistenceWriter,
}

impl Device {
    pub fn new<C>(
        mut config: TransportConfig,
        store: Arc<dyn KvStore>,
        clock: C,
    ) -> Result<Self, ConfigError>
    where
        C: Clock + Clone + 'static,
    {
        config.validate()?;

        let (mut name, name_persister) =
            device_name_preference(Arc::clone(&store), &config.device_name);
        let stored = *name.get();
        if stored.as_str() != config.device_name.as_str() {
            info!("device: using stored name '{}'", stored);
            config.device_name.clear();
            // Both buffers hold 32 bytes.
            let _ = config.device_name.push_str(stored.as_str());
        }

        let mut rpc = Dispatcher::new();
        register_builtin_methods(&mut rpc, name);
        let (auth_store, auth_persister) = AuthStore::new(store);

        let mut prefs_writer =
            PersistenceWriter::new(config.persist_period_ms).with_clock(clock.clone());
        prefs_writer.add(name_persister);
        let mut auth_writer =
            PersistenceWriter::new(config.auth_persist_period_ms).with_clock(clock);
        auth_writer.add(auth_persister);

        let server = RpcServer::new(config, rpc, auth_store)?;
        Ok(Self {
            server,
            prefs_writer,
            auth_writer,
        })
    }

    /// Start both tickers and hand the server to the BLE stack.
    pub fn start(self, poll: Duration) -> anyhow::Result<()> {
        self.prefs_writer.spawn(poll)?;
        self.auth_writer.spawn(poll)?;
        ble_gatt::start(BleRpcService::new(self.server))
    }
}

// ── Tests ────────────────────────────────────────────────────
