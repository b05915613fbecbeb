//! Connection-aware RPC server with an explicit session map.
//!
//! Each BLE connection gets a [`Session`] holding one [`Chunker`] per
//! logical channel plus its authentication state:
//!
//! ```text
//!   conn ──▶ Session { rpc: Chunker, auth: Chunker, auth_state }
//!
//!   on_write(conn, Rpc,  chunk) ──▶ rpc chunker  ──▶ Dispatcher<()>
//!   on_write(conn, Auth, chunk) ──▶ auth chunker ──▶ Dispatcher<AuthContext>
//!   on_read(conn, channel)      ◀── one queued response chunk (or placeholder)
//! ```
//!
//! The transport glue calls these from its callback context. Everything
//! runs synchronously; the only storage access is the one-time lazy load
//! of preferences and the auth table.

use log::{debug, info, warn};

use super::auth::{AuthContext, AuthSession, register_auth_methods};
use super::auth_store::AuthStore;
use super::chunker::{ChunkEvent, Chunker, PLACEHOLDER_CHUNK};
use super::dispatcher::{Dispatcher, encode_response};
use crate::config::{MAX_CONNECTIONS, TransportConfig};
use crate::error::{ConfigError, RpcError, ServerError};

/// BLE connection handle.
pub type ConnHandle = u16;

/// Logical channel (one GATT characteristic each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Rpc,
    Auth,
}

/// Per-connection state.
pub struct Session {
    rpc: Chunker,
    auth: Chunker,
    auth_state: AuthSession,
}

impl Session {
    fn new(config: &TransportConfig) -> Self {
        Self {
            rpc: Chunker::from_validated(config.rpc_channel()),
            auth: Chunker::from_validated(config.auth_channel()),
            auth_state: AuthSession::new(),
        }
    }

    fn chunker_mut(&mut self, channel: Channel) -> &mut Chunker {
        match channel {
            Channel::Rpc => &mut self.rpc,
            Channel::Auth => &mut self.auth,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state.is_authenticated()
    }
}

pub struct RpcServer {
    config: TransportConfig,
    sessions: heapless::FnvIndexMap<ConnHandle, Session, MAX_CONNECTIONS>,
    rpc: Dispatcher,
    auth: Dispatcher<AuthContext>,
    auth_ctx: AuthContext,
}

impl RpcServer {
    /// Build a server around the application's method registry.
    pub fn new(
        config: TransportConfig,
        rpc: Dispatcher,
        auth_store: AuthStore,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut auth = Dispatcher::new();
        register_auth_methods(&mut auth);
        Ok(Self {
            config,
            sessions: heapless::FnvIndexMap::new(),
            rpc,
            auth,
            auth_ctx: AuthContext::new(auth_store),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a session for `conn`. A handle that is already known gets a
    /// fresh session.
    pub fn on_connect(&mut self, conn: ConnHandle) -> Result<(), ServerError> {
        let session = Session::new(&self.config);
        match self.sessions.insert(conn, session) {
            Ok(None) => {
                info!("RPC[{}]: connected ({} active)", conn, self.sessions.len());
                Ok(())
            }
            Ok(Some(_)) => {
                info!("RPC[{}]: reconnected, session reset", conn);
                Ok(())
            }
            Err(_) => {
                warn!("RPC[{}]: session table full, refusing", conn);
                Err(ServerError::TooManyConnections)
            }
        }
    }

    pub fn on_disconnect(&mut self, conn: ConnHandle) {
        if self.sessions.remove(&conn).is_some() {
            info!("RPC[{}]: disconnected", conn);
        }
    }

    /// Feed one chunk written by `conn` to `channel`. A completed message
    /// is dispatched immediately and its response queued for reading.
    pub fn on_write(&mut self, conn: ConnHandle, channel: Channel, chunk: &[u8]) {
        let Some(session) = self.sessions.get_mut(&conn) else {
            warn!("RPC[{}]: write on unknown connection", conn);
            return;
        };

        let ChunkEvent::Complete(message) = session.chunker_mut(channel).consume_chunk(chunk)
        else {
            return;
        };

        let response = match channel {
            Channel::Rpc => {
                if self.config.require_auth && !session.is_authenticated() {
                    warn!("RPC[{}]: request before authentication", conn);
                    encode_response(Err(RpcError::Unauthenticated))
                } else {
                    self.rpc.dispatch(&message)
                }
            }
            Channel::Auth => {
                core::mem::swap(&mut self.auth_ctx.session, &mut session.auth_state);
                let response = self.auth.dispatch_with(&mut self.auth_ctx, &message);
                core::mem::swap(&mut self.auth_ctx.session, &mut session.auth_state);
                response
            }
        };

        debug!(
            "RPC[{}]: {:?} response {} bytes",
            conn,
            channel,
            response.len()
        );
        if let Err(e) = session.chunker_mut(channel).queue_response(&response) {
            warn!("RPC[{}]: {:?} response dropped: {}", conn, channel, e);
        }
    }

    /// Next response chunk for `conn` on `channel`, or the placeholder
    /// chunk when nothing is queued.
    pub fn on_read(&mut self, conn: ConnHandle, channel: Channel) -> Vec<u8> {
        match self.sessions.get_mut(&conn) {
            Some(session) => session.chunker_mut(channel).read_chunk(),
            None => PLACEHOLDER_CHUNK.to_vec(),
        }
    }

    pub fn set_pairing(&mut self, enabled: bool) {
        info!(
            "RPC: pairing {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.auth_ctx.pairing_enabled = enabled;
    }

    pub fn is_pairing_enabled(&self) -> bool {
        self.auth_ctx.pairing_enabled
    }

    pub fn is_authenticated(&self, conn: ConnHandle) -> bool {
        self.sessions
            .get(&conn)
            .is_some_and(Session::is_authenticated)
    }

    pub fn is_connected(&self, conn: ConnHandle) -> bool {
        self.sessions.contains_key(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn auth_store_mut(&mut self) -> &mut AuthStore {
        &mut self.auth_ctx.store
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.rpc
    }
}

// ── Tests ────────────────────────────────────────────────────
