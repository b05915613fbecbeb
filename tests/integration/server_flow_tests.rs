//! End-to-end request flows through [`RpcServer`] with the built-in
//! methods registered.

use blerpc::app::service::{device_name_preference, register_builtin_methods};
use blerpc::config::{DEFAULT_DEVICE_NAME, TransportConfig};
use blerpc::rpc::auth_store::AuthStore;
use blerpc::rpc::chunker::{FLAG_FINAL, FLAG_MISSED, FLAG_OVERFLOW, PLACEHOLDER_CHUNK};
use blerpc::rpc::dispatcher::Dispatcher;
use blerpc::rpc::server::{Channel, RpcServer};

use super::client::{CHUNK, request};
use super::mock_kv::MockKv;

fn server() -> RpcServer {
    let kv = MockKv::new();
    let (name, _) = device_name_preference(kv.clone(), DEFAULT_DEVICE_NAME);
    let mut d = Dispatcher::new();
    register_builtin_methods(&mut d, name);
    let (store, _) = AuthStore::new(kv);
    RpcServer::new(TransportConfig::default(), d, store).unwrap()
}

#[test]
fn sum_over_the_wire() {
    let mut s = server();
    s.on_connect(1).unwrap();
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 1, r#"{"method":"sum","args":[20,22]}"#),
        r#"{"ok":true,"result":42}"#
    );
}

#[test]
fn multi_chunk_request_and_response() {
    let mut s = server();
    s.on_connect(1).unwrap();
    let text = "a".repeat(3 * CHUNK);
    let body = format!(r#"{{"method":"echo","args":["{text}"]}}"#);
    let resp = request(&mut s, 1, Channel::Rpc, 7, &body);
    assert_eq!(resp, format!(r#"{{"ok":true,"result":"{text}"}}"#));
}

#[test]
fn response_chunks_carry_request_message_id() {
    let mut s = server();
    s.on_connect(1).unwrap();
    let text = "b".repeat(2 * CHUNK);
    let body = format!(r#"{{"method":"echo","args":["{text}"]}}"#);
    for c in blerpc::rpc::split_message(33, body.as_bytes(), CHUNK) {
        s.on_write(1, Channel::Rpc, &c);
    }
    let mut seq = 0u16;
    loop {
        let chunk = s.on_read(1, Channel::Rpc);
        assert_eq!(chunk[0], 33);
        assert_eq!(u16::from_le_bytes([chunk[1], chunk[2]]), seq);
        assert!(chunk.len() <= CHUNK);
        seq += 1;
        if chunk[3] & FLAG_FINAL != 0 {
            break;
        }
    }
    assert!(seq >= 3);
    assert_eq!(s.on_read(1, Channel::Rpc), PLACEHOLDER_CHUNK.to_vec());
}

#[test]
fn oversized_message_reports_overflow_once() {
    let mut s = server();
    s.on_connect(1).unwrap();
    let payload = vec![b' '; CHUNK - 4];
    let limit = s.config().rpc_max_message_size;
    let chunks = limit / payload.len() + 2;
    for seq in 0..chunks as u16 {
        let mut c = vec![4];
        c.extend_from_slice(&seq.to_le_bytes());
        c.push(0);
        c.extend_from_slice(&payload);
        s.on_write(1, Channel::Rpc, &c);
    }
    assert_eq!(
        s.on_read(1, Channel::Rpc),
        vec![4, 0, 0, FLAG_OVERFLOW | FLAG_FINAL]
    );
    // The rest of message 4 was dropped silently.
    assert_eq!(s.on_read(1, Channel::Rpc), PLACEHOLDER_CHUNK.to_vec());
}

#[test]
fn lost_chunk_reports_missed_and_next_message_recovers() {
    let mut s = server();
    s.on_connect(1).unwrap();
    s.on_write(1, Channel::Rpc, &[5, 0, 0, 0, b'{']);
    // seq 1 lost
    s.on_write(1, Channel::Rpc, &[5, 2, 0, FLAG_FINAL, b'}']);
    assert_eq!(
        s.on_read(1, Channel::Rpc),
        vec![5, 0, 0, FLAG_MISSED | FLAG_FINAL]
    );
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 6, r#"{"method":"ping"}"#),
        r#"{"ok":true,"result":"pong"}"#
    );
}

#[test]
fn new_message_discards_unread_response() {
    let mut s = server();
    s.on_connect(1).unwrap();
    let text = "c".repeat(2 * CHUNK);
    let body = format!(r#"{{"method":"echo","args":["{text}"]}}"#);
    for c in blerpc::rpc::split_message(1, body.as_bytes(), CHUNK) {
        s.on_write(1, Channel::Rpc, &c);
    }
    // Read only the first chunk, then start over.
    let first = s.on_read(1, Channel::Rpc);
    assert_eq!(first[3] & FLAG_FINAL, 0);
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 2, r#"{"method":"ping","args":[]}"#),
        r#"{"ok":true,"result":"pong"}"#
    );
}

#[test]
fn connections_interleave_independently() {
    let mut s = server();
    s.on_connect(1).unwrap();
    s.on_connect(2).unwrap();
    let a = format!(r#"{{"method":"echo","args":["{}"]}}"#, "x".repeat(CHUNK));
    let b = format!(r#"{{"method":"echo","args":["{}"]}}"#, "y".repeat(CHUNK));
    let ca = blerpc::rpc::split_message(1, a.as_bytes(), CHUNK);
    let cb = blerpc::rpc::split_message(1, b.as_bytes(), CHUNK);
    for (x, y) in ca.iter().zip(cb.iter()) {
        s.on_write(1, Channel::Rpc, x);
        s.on_write(2, Channel::Rpc, y);
    }
    let mut asm_a = blerpc::rpc::ResponseAssembler::new();
    let mut asm_b = blerpc::rpc::ResponseAssembler::new();
    let mut done_a = None;
    let mut done_b = None;
    for _ in 0..16 {
        if done_a.is_none() {
            done_a = asm_a.feed(&s.on_read(1, Channel::Rpc)).unwrap();
        }
        if done_b.is_none() {
            done_b = asm_b.feed(&s.on_read(2, Channel::Rpc)).unwrap();
        }
    }
    let done_a = String::from_utf8(done_a.unwrap()).unwrap();
    let done_b = String::from_utf8(done_b.unwrap()).unwrap();
    assert!(done_a.contains(&"x".repeat(CHUNK)));
    assert!(done_b.contains(&"y".repeat(CHUNK)));
}

#[test]
fn disconnected_session_is_gone() {
    let mut s = server();
    s.on_connect(1).unwrap();
    s.on_write(1, Channel::Rpc, &[1, 0, 0, 0, b'{']);
    s.on_disconnect(1);
    s.on_connect(1).unwrap();
    // Fresh session: the half message is forgotten, seq 1 is a gap.
    s.on_write(1, Channel::Rpc, &[1, 1, 0, FLAG_FINAL, b'}']);
    assert_eq!(
        s.on_read(1, Channel::Rpc),
        vec![1, 0, 0, FLAG_MISSED | FLAG_FINAL]
    );
}

#[test]
fn dispatch_errors_travel_in_band() {
    let mut s = server();
    s.on_connect(1).unwrap();
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 1, r#"{"method":"sum","args":[1]}"#),
        r#"{"ok":false,"result":"Number of arguments mismatch"}"#
    );
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 2, r#"{"method":"sum","args":[1,"2"]}"#),
        r#"{"ok":false,"result":"Argument type mismatch"}"#
    );
    assert_eq!(
        request(&mut s, 1, Channel::Rpc, 3, r#"{"method":"nope","args":[]}"#),
        r#"{"ok":false,"result":"Method not found"}"#
    );
}
