//! Peer-side request helper: frames a request, polls reads until the
//! response completes.

use blerpc::rpc::chunker::{ResponseAssembler, split_message};
use blerpc::rpc::server::{Channel, ConnHandle, RpcServer};

pub const CHUNK: usize = 500;

/// Send `body` as message `id` and collect the response document.
pub fn request(
    server: &mut RpcServer,
    conn: ConnHandle,
    channel: Channel,
    id: u8,
    body: &str,
) -> String {
    for chunk in split_message(id, body.as_bytes(), CHUNK) {
        server.on_write(conn, channel, &chunk);
    }
    let mut assembler = ResponseAssembler::new();
    for _ in 0..1024 {
        let chunk = server.on_read(conn, channel);
        if let Some(done) = assembler.feed(&chunk).expect("device reported a framing error") {
            return String::from_utf8(done).expect("response is UTF-8");
        }
    }
    panic!("response never completed");
}
