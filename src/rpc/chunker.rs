//! Chunked message framing over a size-limited characteristic.
//!
//! Every chunk carries a fixed 4-byte header:
//!
//! ```text
//! ┌────────────┬──────────────────┬───────┬──────────────────────┐
//! │ message id │ sequence (u16 LE)│ flags │ payload              │
//! │    (1B)    │       (2B)       │ (1B)  │ (chunk_size - 4)     │
//! └────────────┴──────────────────┴───────┴──────────────────────┘
//! ```
//!
//! Flags: bit 0 = FINAL (last chunk of a message), bit 1 = MISSED (a
//! sequence gap was detected), bit 2 = OVERFLOW (message too large).
//!
//! A [`Chunker`] holds one session's reassembly state and its outbound
//! queue. Inbound chunks are accumulated until FINAL; the caller handles
//! the complete message and queues the reply, which is split into chunks
//! tagged with the request's message id and drained one per read.
//!
//! Framing errors are answered in-band with a single header-only chunk
//! (`MISSED|FINAL` or `OVERFLOW|FINAL`), after which every further chunk of
//! the same message id is dropped until the peer starts a new message.

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::config::ChannelConfig;
use crate::error::{ConfigError, FrameError};

// ── Constants ────────────────────────────────────────────────

pub const HEADER_SIZE: usize = 4;

/// Last chunk of a message.
pub const FLAG_FINAL: u8 = 0x01;
/// Reassembly detected a sequence gap.
pub const FLAG_MISSED: u8 = 0x02;
/// Reassembled message would exceed the configured limit.
pub const FLAG_OVERFLOW: u8 = 0x04;

/// Returned by a read when nothing is queued. Shorter than a header, so
/// the peer can never mistake it for a chunk and simply polls again.
pub const PLACEHOLDER_CHUNK: [u8; 1] = [0];

/// Sequence numbers are 16 bits wide.
pub const MAX_CHUNKS: usize = u16::MAX as usize + 1;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

// ── Header ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub message_id: u8,
    pub sequence: u16,
    pub flags: u8,
}

impl ChunkHeader {
    pub const fn new(message_id: u8, sequence: u16, flags: u8) -> Self {
        Self {
            message_id,
            sequence,
            flags,
        }
    }

    /// Parse the header of `chunk`. `None` if shorter than [`HEADER_SIZE`].
    pub fn parse(chunk: &[u8]) -> Option<Self> {
        let h = chunk.get(..HEADER_SIZE)?;
        Some(Self {
            message_id: h[0],
            sequence: u16::from_le_bytes([h[1], h[2]]),
            flags: h[3],
        })
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let seq = self.sequence.to_le_bytes();
        [self.message_id, seq[0], seq[1], self.flags]
    }

    pub fn is_final(&self) -> bool {
        self.flags & FLAG_FINAL != 0
    }

    pub fn is_missed(&self) -> bool {
        self.flags & FLAG_MISSED != 0
    }

    pub fn is_overflow(&self) -> bool {
        self.flags & FLAG_OVERFLOW != 0
    }
}

// ── Splitting ────────────────────────────────────────────────

/// Split `payload` into chunks of at most `chunk_size` bytes.
///
/// Produces `ceil(len / (chunk_size - 4))` chunks with ascending sequence
/// numbers; the last carries FINAL. An empty payload yields exactly one
/// header-only FINAL chunk so the peer always sees a terminator.
///
/// `chunk_size` must exceed [`HEADER_SIZE`] (see
/// [`ChannelConfig::validate`]) and the payload must fit in
/// [`MAX_CHUNKS`] chunks; [`Chunker::queue_response`] enforces the latter.
pub fn split_message(message_id: u8, payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let capacity = chunk_size.saturating_sub(HEADER_SIZE).max(1);

    if payload.is_empty() {
        return alloc::vec![ChunkHeader::new(message_id, 0, FLAG_FINAL).to_bytes().to_vec()];
    }

    let total = payload.len().div_ceil(capacity);
    payload
        .chunks(capacity)
        .enumerate()
        .map(|(i, part)| {
            let flags = if i + 1 == total { FLAG_FINAL } else { 0 };
            let header = ChunkHeader::new(message_id, i as u16, flags);
            let mut chunk = Vec::with_capacity(HEADER_SIZE + part.len());
            chunk.extend_from_slice(&header.to_bytes());
            chunk.extend_from_slice(part);
            chunk
        })
        .collect()
}

// ── Reassembly ───────────────────────────────────────────────

/// Outcome of feeding one inbound chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// Dropped without any state change (tail suppression).
    Ignored,
    /// Payload appended; more chunks expected.
    Accepted,
    /// Framing error. For `ShortChunk` nothing changed; otherwise an error
    /// chunk has been queued and the message's tail will be suppressed.
    Rejected(FrameError),
    /// FINAL chunk arrived: the complete message. The caller must answer
    /// it with [`Chunker::queue_response`].
    Complete(Vec<u8>),
}

/// Per-session reassembly state plus outbound response queue.
pub struct Chunker {
    config: ChannelConfig,
    message_id: u8,
    expected_seq: u16,
    buffer: Vec<u8>,
    skip_tail: bool,
    started: bool,
    outbound: VecDeque<Vec<u8>>,
}

impl Chunker {
    pub fn new(config: ChannelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_validated(config))
    }

    /// `config` must already have passed [`ChannelConfig::validate`].
    pub(crate) fn from_validated(config: ChannelConfig) -> Self {
        Self {
            config,
            message_id: 0,
            expected_seq: 0,
            buffer: Vec::new(),
            skip_tail: false,
            started: false,
            outbound: VecDeque::new(),
        }
    }

    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    /// Feed one inbound chunk.
    pub fn consume_chunk(&mut self, chunk: &[u8]) -> ChunkEvent {
        let Some(header) = ChunkHeader::parse(chunk) else {
            debug!("BLE RPC: dropping {}-byte chunk (short)", chunk.len());
            return ChunkEvent::Rejected(FrameError::ShortChunk);
        };

        if self.started && header.message_id == self.message_id {
            if self.skip_tail {
                return ChunkEvent::Ignored;
            }
        } else {
            self.start_message(header.message_id);
        }

        let payload = &chunk[HEADER_SIZE..];
        let size = self.buffer.len() + payload.len();
        if size > self.config.max_message_size {
            warn!(
                "BLE RPC: message {} overflow ({} > {} bytes)",
                header.message_id, size, self.config.max_message_size
            );
            self.fail(FLAG_OVERFLOW);
            return ChunkEvent::Rejected(FrameError::SizeOverflow {
                size,
                limit: self.config.max_message_size,
            });
        }

        if header.sequence != self.expected_seq {
            warn!(
                "BLE RPC: message {} missed chunks (expected seq {}, got {})",
                header.message_id, self.expected_seq, header.sequence
            );
            let err = FrameError::MissedChunks {
                expected: self.expected_seq,
                got: header.sequence,
            };
            self.fail(FLAG_MISSED);
            return ChunkEvent::Rejected(err);
        }

        self.buffer.extend_from_slice(payload);
        self.expected_seq = self.expected_seq.wrapping_add(1);

        if header.is_final() {
            self.skip_tail = true;
            return ChunkEvent::Complete(core::mem::take(&mut self.buffer));
        }
        ChunkEvent::Accepted
    }

    /// Feed one chunk and, on completion, answer it with `handler`.
    pub fn consume_chunk_with<F>(&mut self, chunk: &[u8], handler: F) -> ChunkEvent
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let event = self.consume_chunk(chunk);
        if let ChunkEvent::Complete(ref message) = event {
            let response = handler(message);
            if let Err(e) = self.queue_response(&response) {
                return ChunkEvent::Rejected(e);
            }
        }
        event
    }

    /// Split `payload` into chunks tagged with the current message id and
    /// queue them. Replaces anything still queued so two responses never
    /// interleave.
    ///
    /// A payload needing more than [`MAX_CHUNKS`] chunks cannot be
    /// numbered; the peer gets a single `OVERFLOW|FINAL` chunk instead.
    pub fn queue_response(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let limit = MAX_CHUNKS * self.config.payload_capacity();
        if payload.len() > limit {
            warn!(
                "BLE RPC: message {} response too large ({} > {} bytes)",
                self.message_id,
                payload.len(),
                limit
            );
            self.fail(FLAG_OVERFLOW);
            return Err(FrameError::SizeOverflow {
                size: payload.len(),
                limit,
            });
        }
        self.outbound.clear();
        self.outbound
            .extend(split_message(self.message_id, payload, self.config.chunk_size));
        Ok(())
    }

    /// Pop the next outbound chunk in order.
    pub fn next_response_chunk(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    /// Next outbound chunk, or [`PLACEHOLDER_CHUNK`] when the queue is empty.
    pub fn read_chunk(&mut self) -> Vec<u8> {
        self.next_response_chunk()
            .unwrap_or_else(|| PLACEHOLDER_CHUNK.to_vec())
    }

    pub fn pending_chunks(&self) -> usize {
        self.outbound.len()
    }

    pub fn current_message_id(&self) -> u8 {
        self.message_id
    }

    pub fn expected_sequence(&self) -> u16 {
        self.expected_seq
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_skipping_tail(&self) -> bool {
        self.skip_tail
    }

    /// Forget all reassembly state and queued output.
    pub fn reset(&mut self) {
        self.message_id = 0;
        self.expected_seq = 0;
        self.buffer.clear();
        self.skip_tail = false;
        self.started = false;
        self.outbound.clear();
    }

    fn start_message(&mut self, message_id: u8) {
        self.started = true;
        self.message_id = message_id;
        self.expected_seq = 0;
        self.buffer.clear();
        self.skip_tail = false;
        self.outbound.clear();
    }

    fn fail(&mut self, flag: u8) {
        self.skip_tail = true;
        self.buffer.clear();
        self.outbound.clear();
        let header = ChunkHeader::new(self.message_id, 0, flag | FLAG_FINAL);
        self.outbound.push_back(header.to_bytes().to_vec());
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_validated(ChannelConfig::new(
            DEFAULT_CHUNK_SIZE,
            DEFAULT_MAX_MESSAGE_SIZE,
        ))
    }
}

// ── Peer-side response assembly ──────────────────────────────

/// Reassembles a response stream on the requesting side.
///
/// Anything shorter than a header (the placeholder) means "not ready" and
/// is skipped. MISSED/OVERFLOW flags from the device surface as errors.
#[derive(Default)]
pub struct ResponseAssembler {
    buffer: Vec<u8>,
    expected_seq: u16,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk read from the device. Returns the complete response
    /// once the FINAL chunk arrives.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header) = ChunkHeader::parse(chunk) else {
            return Ok(None);
        };
        if header.is_missed() {
            self.reset();
            return Err(FrameError::PeerMissed);
        }
        if header.is_overflow() {
            self.reset();
            return Err(FrameError::PeerOverflow);
        }
        if header.sequence != self.expected_seq {
            let err = FrameError::MissedChunks {
                expected: self.expected_seq,
                got: header.sequence,
            };
            self.reset();
            return Err(err);
        }

        self.buffer.extend_from_slice(&chunk[HEADER_SIZE..]);
        self.expected_seq = self.expected_seq.wrapping_add(1);

        if header.is_final() {
            self.expected_seq = 0;
            return Ok(Some(core::mem::take(&mut self.buffer)));
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = 0;
    }
}

// ── Tests ────────────────────────────────────────────────────
