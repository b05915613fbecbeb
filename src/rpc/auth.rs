//! Client pairing and challenge-response authentication.
//!
//! Runs on the auth channel, dispatched by the same JSON dispatcher as
//! the RPC channel:
//!
//! 1. While pairing is enabled, the client calls `pair(id)` and receives a
//!    fresh 32-byte secret, stored in the [`AuthStore`].
//! 2. On each connection the client calls `challenge(id)` and receives a
//!    32-byte nonce.
//! 3. The client calls `authenticate(id, HMAC-SHA256(secret, nonce), now)`.
//!    On success the session is authenticated and the client's last-seen
//!    timestamp is refreshed. A nonce is good for one attempt.
//!
//! Ids, secrets, nonces and tags travel as lowercase hex strings.
//!
//! Crypto is handled by the `hmac-sha256` crate (pure Rust, no_std,
//! constant-time verification), identical on ESP-IDF and host targets.

extern crate alloc;
use alloc::string::String;
use core::time::Duration;

use burster::Limiter;
use log::{info, warn};

use super::auth_store::{AuthStore, ClientId, Secret};
use super::dispatcher::Dispatcher;
use super::value::{Kind, Value};
use crate::error::RpcError;

// ── Session state machine ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Challenged { client: ClientId, nonce: [u8; 32] },
    Authenticated { client: ClientId },
}

/// Authentication state of one connection.
pub struct AuthSession {
    state: SessionState,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                5,
                5, // 5 challenges per second, 5 burst capacity
                platform_now as fn() -> Duration,
            ),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Issue a fresh nonce for `client`, replacing any pending challenge.
    pub fn begin_challenge(&mut self, client: ClientId) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        fill_random(&mut nonce);
        self.state = SessionState::Challenged { client, nonce };
        nonce
    }

    /// Check `tag` against the pending challenge for `client`.
    ///
    /// The challenge is consumed whatever the outcome. Transitions to
    /// `Authenticated` on success, `Unauthenticated` otherwise.
    pub fn verify(&mut self, client: &ClientId, tag: &[u8; 32], secret: &Secret) -> bool {
        let state = core::mem::replace(&mut self.state, SessionState::Unauthenticated);
        let SessionState::Challenged {
            client: expected,
            nonce,
        } = state
        else {
            warn!("auth: verify without a pending challenge");
            return false;
        };

        if expected != *client {
            warn!("auth: challenge was issued to a different client");
            return false;
        }

        if !hmac_sha256::HMAC::verify(nonce, secret, tag) {
            warn!("auth: HMAC verification failed");
            return false;
        }

        self.state = SessionState::Authenticated { client: *client };
        true
    }

    /// Consume one rate-limit token; returns `false` when exhausted.
    pub fn check_rate_limit(&mut self) -> bool {
        self.rate_limiter.try_consume(1).is_ok()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    /// Authenticated client id, if any.
    pub fn client(&self) -> Option<ClientId> {
        match self.state {
            SessionState::Authenticated { client } => Some(client),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = SessionState::Unauthenticated;
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

// ── Dispatch context ─────────────────────────────────────────

/// State reachable from auth-channel handlers.
///
/// `session` holds the calling connection's session for the duration of a
/// call; the server swaps it in before dispatch and back out afterwards.
pub struct AuthContext {
    pub store: AuthStore,
    pub session: AuthSession,
    pub pairing_enabled: bool,
}

impl AuthContext {
    pub fn new(store: AuthStore) -> Self {
        Self {
            store,
            session: AuthSession::new(),
            pairing_enabled: false,
        }
    }
}

/// Register `pair`, `challenge`, `authenticate` and `status`.
pub fn register_auth_methods(d: &mut Dispatcher<AuthContext>) {
    d.add_method("pair", &[Kind::Str], Kind::Str, |ctx, args| {
        if !ctx.pairing_enabled {
            return Err(RpcError::handler("Pairing disabled"));
        }
        let id = parse_client_id(args.str(0)?)?;
        let mut secret: Secret = [0; 32];
        fill_random(&mut secret);
        if !ctx.store.create(&id, &secret) {
            return Err(RpcError::handler("Invalid client id"));
        }
        info!("auth: paired new client");
        Ok(Value::Str(to_hex(&secret)))
    });

    d.add_method("challenge", &[Kind::Str], Kind::Str, |ctx, args| {
        let id = parse_client_id(args.str(0)?)?;
        if !ctx.session.check_rate_limit() {
            warn!("auth: challenge rate limit exceeded");
            return Err(RpcError::handler("Too many attempts"));
        }
        if !ctx.store.has(&id) {
            return Err(RpcError::handler("Unknown client"));
        }
        let nonce = ctx.session.begin_challenge(id);
        Ok(Value::Str(to_hex(&nonce)))
    });

    d.add_method(
        "authenticate",
        &[Kind::Str, Kind::Str, Kind::U32],
        Kind::Bool,
        |ctx, args| {
            let id = parse_client_id(args.str(0)?)?;
            let tag: [u8; 32] =
                parse_hex(args.str(1)?).ok_or_else(|| RpcError::handler("Invalid hmac"))?;
            let timestamp: u32 = args.get(2)?;

            let Some(secret) = ctx.store.get_secret(&id) else {
                ctx.session.reset();
                return Err(RpcError::handler("Unknown client"));
            };
            if !ctx.session.verify(&id, &tag, &secret) {
                return Ok(Value::Bool(false));
            }
            ctx.store.set_timestamp(&id, timestamp);
            info!("auth: client authenticated");
            Ok(Value::Bool(true))
        },
    );

    d.add_method("status", &[], Kind::Bool, |ctx, _| {
        Ok(Value::Bool(ctx.session.is_authenticated()))
    });
}

fn parse_client_id(s: &str) -> Result<ClientId, RpcError> {
    parse_hex(s).ok_or_else(|| RpcError::handler("Invalid client id"))
}

// ── Hex helpers ──────────────────────────────────────────────

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push(DIGITS[usize::from(b >> 4)] as char);
        s.push(DIGITS[usize::from(b & 0x0f)] as char);
    }
    s
}

/// Decode exactly `N` bytes of hex (either case).
pub fn parse_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    fn nibble(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'a'..=b'f' => Some(c - b'a' + 10),
            b'A'..=b'F' => Some(c - b'A' + 10),
            _ => None,
        }
    }

    let bytes = s.as_bytes();
    if bytes.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        out[i] = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Some(out)
}

// ── Compute HMAC for client-side (used in tests) ─────────────

/// Compute `HMAC-SHA256(secret, nonce)`, the client's half of the
/// handshake.
pub fn compute_hmac(secret: &Secret, nonce: &[u8; 32]) -> [u8; 32] {
    hmac_sha256::HMAC::mac(nonce, secret)
}

// ── Platform-specific randomness ─────────────────────────────

/// Fill `buf` with random bytes.
///
/// ESP-IDF: delegates to the hardware RNG via `esp_fill_random`.
#[cfg(target_os = "espidf")]
pub fn fill_random(buf: &mut [u8]) {
    // SAFETY: esp_fill_random writes exactly `buf.len()` bytes into the
    // provided buffer, which is valid and exclusively borrowed.
    unsafe {
        esp_idf_svc::sys::esp_fill_random(buf.as_mut_ptr().cast(), buf.len());
    }
}

/// Simulation stub using `RandomState` to produce non-cryptographic entropy.
#[cfg(not(target_os = "espidf"))]
pub fn fill_random(buf: &mut [u8]) {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    for chunk in buf.chunks_mut(8) {
        let val = RandomState::new().build_hasher().finish().to_le_bytes();
        chunk.copy_from_slice(&val[..chunk.len()]);
    }
}

// ── Platform time for rate limiter ───────────────────────────

#[cfg(target_os = "espidf")]
fn platform_now() -> Duration {
    // SAFETY: esp_timer_get_time has no preconditions once the scheduler
    // is running.
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────
