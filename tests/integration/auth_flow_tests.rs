//! Pairing and challenge-response authentication over the auth channel.

use std::sync::Arc;

use blerpc::app::ports::KvStore;
use blerpc::config::TransportConfig;
use blerpc::prefs::PersistTask;
use blerpc::rpc::auth::{compute_hmac, parse_hex, to_hex};
use blerpc::rpc::auth_store::{AUTH_NAMESPACE, AuthStore, CLIENTS_KEY, ONE_DAY_MS, TIMESTAMPS_KEY};
use blerpc::rpc::dispatcher::Dispatcher;
use blerpc::rpc::server::{Channel, RpcServer};
use blerpc::rpc::value::{Kind, Value};

use super::client::request;
use super::mock_kv::MockKv;

const CLIENT: [u8; 16] = [0xab; 16];

fn server_on(kv: Arc<MockKv>, require_auth: bool) -> RpcServer {
    let mut d = Dispatcher::new();
    d.add_method("ping", &[], Kind::Str, |_, _| Ok(Value::from("pong")));
    let (store, _) = AuthStore::new(kv);
    let config = TransportConfig {
        require_auth,
        ..TransportConfig::default()
    };
    RpcServer::new(config, d, store).unwrap()
}

fn result(doc: &str) -> serde_json::Value {
    let v: serde_json::Value = serde_json::from_str(doc).unwrap();
    v["result"].clone()
}

fn auth_call(s: &mut RpcServer, id: u8, body: &str) -> String {
    request(s, 1, Channel::Auth, id, body)
}

fn pair(s: &mut RpcServer) -> [u8; 32] {
    let resp = auth_call(
        s,
        1,
        &format!(r#"{{"method":"pair","args":["{}"]}}"#, to_hex(&CLIENT)),
    );
    let secret = result(&resp);
    parse_hex(secret.as_str().unwrap()).unwrap()
}

fn login(s: &mut RpcServer, secret: &[u8; 32], first_id: u8) -> String {
    let resp = auth_call(
        s,
        first_id,
        &format!(r#"{{"method":"challenge","args":["{}"]}}"#, to_hex(&CLIENT)),
    );
    let nonce: [u8; 32] = parse_hex(result(&resp).as_str().unwrap()).unwrap();
    let tag = compute_hmac(secret, &nonce);
    auth_call(
        s,
        first_id.wrapping_add(1),
        &format!(
            r#"{{"method":"authenticate","args":["{}","{}",1000]}}"#,
            to_hex(&CLIENT),
            to_hex(&tag)
        ),
    )
}

#[test]
fn pairing_is_refused_while_disabled() {
    let mut s = server_on(MockKv::new(), false);
    s.on_connect(1).unwrap();
    let resp = auth_call(
        &mut s,
        1,
        &format!(r#"{{"method":"pair","args":["{}"]}}"#, to_hex(&CLIENT)),
    );
    assert_eq!(resp, r#"{"ok":false,"result":"Pairing disabled"}"#);
}

#[test]
fn full_handshake_unlocks_rpc_channel() {
    let mut s = server_on(MockKv::new(), true);
    s.on_connect(1).unwrap();
    s.set_pairing(true);
    let secret = pair(&mut s);

    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 1, r#"{"method":"ping","args":[]}"#),
        r#"{"ok":false,"result":"Authentication required"}"#
    );

    assert_eq!(login(&mut s, &secret, 2), r#"{"ok":true,"result":true}"#);
    assert!(s.is_authenticated(1));
    assert_eq!(
        auth_call(&mut s, 9, r#"{"method":"status","args":[]}"#),
        r#"{"ok":true,"result":true}"#
    );
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 2, r#"{"method":"ping","args":[]}"#),
        r#"{"ok":true,"result":"pong"}"#
    );
    assert_eq!(s.auth_store_mut().timestamp(&CLIENT), Some(1000));
}

#[test]
fn wrong_secret_fails_and_consumes_nonce() {
    let mut s = server_on(MockKv::new(), false);
    s.on_connect(1).unwrap();
    s.set_pairing(true);
    let mut secret = pair(&mut s);
    secret[0] ^= 0xff;
    assert_eq!(login(&mut s, &secret, 2), r#"{"ok":true,"result":false}"#);
    assert!(!s.is_authenticated(1));

    // Replaying any tag without a fresh challenge fails.
    let replay = format!(
        r#"{{"method":"authenticate","args":["{}","{}",1000]}}"#,
        to_hex(&CLIENT),
        to_hex(&[0u8; 32])
    );
    assert_eq!(auth_call(&mut s, 4, &replay), r#"{"ok":true,"result":false}"#);
}

#[test]
fn unknown_client_cannot_challenge() {
    let mut s = server_on(MockKv::new(), false);
    s.on_connect(1).unwrap();
    let resp = auth_call(
        &mut s,
        1,
        &format!(r#"{{"method":"challenge","args":["{}"]}}"#, to_hex(&[7u8; 16])),
    );
    assert_eq!(resp, r#"{"ok":false,"result":"Unknown client"}"#);
}

#[test]
fn malformed_client_id_is_rejected() {
    let mut s = server_on(MockKv::new(), false);
    s.on_connect(1).unwrap();
    assert_eq!(
        auth_call(&mut s, 1, r#"{"method":"challenge","args":["zz"]}"#),
        r#"{"ok":false,"result":"Invalid client id"}"#
    );
}

#[test]
fn authentication_is_per_connection() {
    let mut s = server_on(MockKv::new(), true);
    s.on_connect(1).unwrap();
    s.on_connect(2).unwrap();
    s.set_pairing(true);
    let secret = pair(&mut s);
    login(&mut s, &secret, 2);
    assert!(s.is_authenticated(1));
    assert!(!s.is_authenticated(2));
    assert_eq!(
        request(&mut s, 2, Channel::Rpc, 1, r#"{"method":"ping","args":[]}"#),
        r#"{"ok":false,"result":"Authentication required"}"#
    );
}

#[test]
fn paired_client_survives_restart() {
    let kv = MockKv::new();
    let secret = {
        let mut d = Dispatcher::new();
        d.add_method("ping", &[], Kind::Str, |_, _| Ok(Value::from("pong")));
        let (store, mut persister) = AuthStore::new(kv.clone());
        let mut s = RpcServer::new(TransportConfig::default(), d, store).unwrap();
        s.on_connect(1).unwrap();
        s.set_pairing(true);
        let secret = pair(&mut s);
        persister.tick();
        secret
    };
    assert!(kv.length(AUTH_NAMESPACE, CLIENTS_KEY) > 0);

    let mut s = server_on(kv, false);
    s.on_connect(1).unwrap();
    assert_eq!(login(&mut s, &secret, 1), r#"{"ok":true,"result":true}"#);
}

#[test]
fn timestamp_refresh_rewrites_only_the_timestamp_table() {
    let kv = MockKv::new();
    let (mut store, mut persister) = AuthStore::<4>::new(kv.clone());
    assert!(store.create(&CLIENT, &[5; 32]));
    persister.tick();
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, CLIENTS_KEY), 1);
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, TIMESTAMPS_KEY), 1);

    assert!(store.set_timestamp(&CLIENT, 2 * ONE_DAY_MS));
    persister.tick();
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, CLIENTS_KEY), 1, "secrets untouched");
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, TIMESTAMPS_KEY), 2);

    // A step inside the one-day window is absorbed and writes nothing.
    assert!(store.set_timestamp(&CLIENT, 2 * ONE_DAY_MS + 10));
    persister.tick();
    assert_eq!(kv.writes_to(AUTH_NAMESPACE, TIMESTAMPS_KEY), 2);
    assert_eq!(kv.writes(), 3);
}
