//! Fuzz target: `Chunker::consume_chunk`
//!
//! Splits the input into variable-length chunks and feeds them to a small
//! chunker. Asserts that it never panics, never buffers past its limit,
//! and only ever queues well-formed response chunks.
//!
//! cargo fuzz run fuzz_chunker

#![no_main]

use blerpc::config::ChannelConfig;
use blerpc::rpc::chunker::{ChunkEvent, ChunkHeader, Chunker, FLAG_FINAL};
use libfuzzer_sys::fuzz_target;

const CHUNK: usize = 32;
const LIMIT: usize = 256;

fuzz_target!(|data: &[u8]| {
    let Ok(mut chunker) = Chunker::new(ChannelConfig::new(CHUNK, LIMIT)) else {
        return;
    };

    // First byte of each record is its length.
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len) % (CHUNK + 1);
        let (chunk, tail) = tail.split_at(len.min(tail.len()));
        rest = tail;

        if let ChunkEvent::Complete(msg) = chunker.consume_chunk(chunk) {
            assert!(msg.len() <= LIMIT, "completed message exceeds limit");
            assert!(chunker.queue_response(&msg).is_ok(), "small response rejected");
        }
        assert!(chunker.buffered_len() <= LIMIT, "buffer exceeds limit");

        while let Some(out) = chunker.next_response_chunk() {
            assert!(out.len() <= CHUNK, "response chunk exceeds chunk size");
            let header = ChunkHeader::parse(&out).expect("response chunk has a header");
            assert_eq!(header.message_id, chunker.current_message_id());
        }
    }

    // After a reset the chunker accepts a fresh message.
    chunker.reset();
    assert!(matches!(
        chunker.consume_chunk(&[1, 0, 0, FLAG_FINAL, b'x']),
        ChunkEvent::Complete(_)
    ));
});
