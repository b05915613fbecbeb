//! Storage encodings for preference values, selected per type.
//!
//! | Shape                          | Codec            | Stored bytes            |
//! |--------------------------------|------------------|-------------------------|
//! | scalars, `bool`, `[T; N]`      | [`RawCodec`]     | fixed-size little-endian|
//! | [`TextBuf`], [`ByteBuf`]       | [`BufferCodec`]  | contents, length = blob |
//! | anything else (opt-in)         | [`PostcardCodec`]| postcard                |
//!
//! The codec is an associated type of [`Persist`], so a value type with no
//! codec cannot be wrapped in a preference at all.

extern crate alloc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Value types that can back an [`AsyncPreference`](super::AsyncPreference).
pub trait Persist: Copy + Send + 'static {
    type Codec: PrefCodec<Self>;
}

/// Encoding strategy for `T`.
pub trait PrefCodec<T> {
    /// Encode for storage. `None` if the value cannot be encoded.
    fn encode(value: &T) -> Option<Vec<u8>>;

    /// Decode a stored blob. `None` if it does not describe a `T`.
    fn decode(bytes: &[u8]) -> Option<T>;

    /// Whether a stored blob of `len` bytes can possibly decode.
    fn accepts_len(_len: usize) -> bool {
        true
    }
}

// ── Fixed-size raw encoding ──────────────────────────────────

/// Types with a fixed little-endian byte image.
pub trait Raw: Copy {
    const SIZE: usize;

    fn write_le(&self, out: &mut Vec<u8>);

    /// `bytes.len()` is exactly [`Self::SIZE`].
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! raw_number {
    ($($ty:ty),*) => {
        $(
            impl Raw for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                fn write_le(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut b = [0u8; core::mem::size_of::<$ty>()];
                    b.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(b)
                }
            }

            impl Persist for $ty {
                type Codec = RawCodec;
            }
        )*
    };
}

raw_number!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Raw for bool {
    const SIZE: usize = 1;

    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl Persist for bool {
    type Codec = RawCodec;
}

impl<T: Raw, const N: usize> Raw for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn write_le(&self, out: &mut Vec<u8>) {
        for item in self {
            item.write_le(out);
        }
    }

    fn read_le(bytes: &[u8]) -> Self {
        core::array::from_fn(|i| T::read_le(&bytes[i * T::SIZE..(i + 1) * T::SIZE]))
    }
}

impl<T: Raw + Send + 'static, const N: usize> Persist for [T; N] {
    type Codec = RawCodec;
}

pub struct RawCodec;

impl<T: Raw> PrefCodec<T> for RawCodec {
    fn encode(value: &T) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(T::SIZE);
        value.write_le(&mut out);
        Some(out)
    }

    fn decode(bytes: &[u8]) -> Option<T> {
        (bytes.len() == T::SIZE).then(|| T::read_le(bytes))
    }

    fn accepts_len(len: usize) -> bool {
        len == T::SIZE
    }
}

// ── Bounded buffers ──────────────────────────────────────────

/// Resizable, fixed-capacity buffers stored as their raw contents.
pub trait Buffer: Copy {
    const CAPACITY: usize;

    fn as_bytes(&self) -> &[u8];

    fn from_stored(bytes: &[u8]) -> Option<Self>;
}

/// `Copy` byte buffer holding up to `N` bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ByteBuf<const N: usize> {
    len: usize,
    data: [u8; N],
}

impl<const N: usize> ByteBuf<N> {
    pub const fn new() -> Self {
        Self { len: 0, data: [0; N] }
    }

    /// `None` if `bytes` exceeds the capacity.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > N {
            return None;
        }
        let mut buf = Self::new();
        buf.data[..bytes.len()].copy_from_slice(bytes);
        buf.len = bytes.len();
        Some(buf)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for ByteBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for ByteBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<const N: usize> Buffer for ByteBuf<N> {
    const CAPACITY: usize = N;

    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }

    fn from_stored(bytes: &[u8]) -> Option<Self> {
        Self::from_slice(bytes)
    }
}

impl<const N: usize> Persist for ByteBuf<N> {
    type Codec = BufferCodec;
}

/// `Copy` UTF-8 string holding up to `N` bytes.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TextBuf<const N: usize>(ByteBuf<N>);

impl<const N: usize> TextBuf<N> {
    pub const fn new() -> Self {
        Self(ByteBuf::new())
    }

    pub fn as_str(&self) -> &str {
        // Constructed only from `&str` or validated bytes.
        core::str::from_utf8(self.0.as_slice()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> TryFrom<&str> for TextBuf<N> {
    type Error = ();

    /// Fails if `s` exceeds the capacity.
    fn try_from(s: &str) -> Result<Self, ()> {
        ByteBuf::from_slice(s.as_bytes()).map(Self).ok_or(())
    }
}

impl<const N: usize> fmt::Debug for TextBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for TextBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> Buffer for TextBuf<N> {
    const CAPACITY: usize = N;

    fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn from_stored(bytes: &[u8]) -> Option<Self> {
        let s = core::str::from_utf8(bytes).ok()?;
        Self::try_from(s).ok()
    }
}

impl<const N: usize> Persist for TextBuf<N> {
    type Codec = BufferCodec;
}

pub struct BufferCodec;

impl<T: Buffer> PrefCodec<T> for BufferCodec {
    fn encode(value: &T) -> Option<Vec<u8>> {
        Some(value.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Option<T> {
        T::from_stored(bytes)
    }

    fn accepts_len(len: usize) -> bool {
        len <= T::CAPACITY
    }
}

// ── User-supplied serde encoding ─────────────────────────────

/// Opt-in codec for structured values:
///
/// ```ignore
/// impl Persist for Calibration {
///     type Codec = PostcardCodec<Self>;
/// }
/// ```
pub struct PostcardCodec<T>(PhantomData<T>);

impl<T: Serialize + DeserializeOwned> PrefCodec<T> for PostcardCodec<T> {
    fn encode(value: &T) -> Option<Vec<u8>> {
        postcard::to_allocvec(value).ok()
    }

    fn decode(bytes: &[u8]) -> Option<T> {
        postcard::from_bytes(bytes).ok()
    }
}

// ── Tests ────────────────────────────────────────────────────
