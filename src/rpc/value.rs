//! Primitive kinds and values carried by RPC arguments and results.
//!
//! The set is closed: signed/unsigned 8–64-bit integers, 32/64-bit floats,
//! booleans and UTF-8 strings. Each method declares the [`Kind`] of every
//! parameter and of its result; decoding a JSON argument against a kind is
//! exact. Integers must fit the declared width (512 is not an `i8`), float
//! literals are never accepted for integer kinds, and integer literals are
//! accepted for float kinds when representable.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::Serialize;

use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
    Str,
}

impl Kind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
            Self::Str => "string",
        }
    }

    /// Decode a JSON element as this kind. `None` on any type mismatch,
    /// including integers out of range for the declared width.
    pub fn decode(self, json: &serde_json::Value) -> Option<Value> {
        use serde_json::Value as J;

        match (self, json) {
            (Self::Bool, J::Bool(b)) => Some(Value::Bool(*b)),
            (Self::Str, J::String(s)) => Some(Value::Str(s.clone())),
            (Self::F64, J::Number(n)) => n.as_f64().map(Value::F64),
            (Self::F32, J::Number(n)) => {
                let v = n.as_f64()?;
                (v.is_finite() && v.abs() <= f64::from(f32::MAX)).then(|| Value::F32(v as f32))
            }
            (Self::I64, J::Number(n)) => n.as_i64().map(Value::I64),
            (Self::U64, J::Number(n)) => n.as_u64().map(Value::U64),
            (kind, J::Number(n)) => {
                let v = n.as_i64()?;
                match kind {
                    Self::I8 => i8::try_from(v).ok().map(Value::I8),
                    Self::U8 => u8::try_from(v).ok().map(Value::U8),
                    Self::I16 => i16::try_from(v).ok().map(Value::I16),
                    Self::U16 => u16::try_from(v).ok().map(Value::U16),
                    Self::I32 => i32::try_from(v).ok().map(Value::I32),
                    Self::U32 => u32::try_from(v).ok().map(Value::U32),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded argument or a handler result. Serializes as the bare JSON
/// primitive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::I8(_) => Kind::I8,
            Self::U8(_) => Kind::U8,
            Self::I16(_) => Kind::I16,
            Self::U16(_) => Kind::U16,
            Self::I32(_) => Kind::I32,
            Self::U32(_) => Kind::U32,
            Self::I64(_) => Kind::I64,
            Self::U64(_) => Kind::U64,
            Self::F32(_) => Kind::F32,
            Self::F64(_) => Kind::F64,
            Self::Bool(_) => Kind::Bool,
            Self::Str(_) => Kind::Str,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

// ── Typed conversions ────────────────────────────────────────

/// Rust types that map one-to-one onto a [`Kind`].
pub trait FromValue: Sized {
    const KIND: Kind;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const KIND: Kind = Kind::$variant;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

primitive! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
}

impl FromValue for String {
    const KIND: Kind = Kind::Str;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(String::from)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(String::from(v))
    }
}

// ── Decoded argument list ────────────────────────────────────

/// Arguments of one call, already checked against the method signature.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Typed access to argument `index`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T, RpcError> {
        self.0
            .get(index)
            .and_then(T::from_value)
            .ok_or(RpcError::ArgumentType)
    }

    /// Borrow a string argument without copying.
    pub fn str(&self, index: usize) -> Result<&str, RpcError> {
        self.0
            .get(index)
            .and_then(Value::as_str)
            .ok_or(RpcError::ArgumentType)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }
}

// ── Tests ────────────────────────────────────────────────────
