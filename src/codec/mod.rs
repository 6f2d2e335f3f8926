//! Streaming JSON codec for the wire records.
//!
//! # Data Flow
//! ```text
//! Encode:
//!     encoder() ──▶ pooled Encoder ──▶ T::marshal(TokenWriter)
//!                   (buffer reused)     writes only non-zero fields
//!
//! Decode:
//!     decoder() ──▶ pooled Decoder ──▶ Reader::reset(body)
//!                                      ──▶ T::unmarshal: state machine
//!                                          object_begin → keys → ... → None
//! ```
//!
//! # Design Decisions
//! - No reflection: every record has a hand-written marshal function and
//!   a hand-written keys state, so field names and zero-omission are local
//! - Encoders and decoders are pooled; the guard returns them on every exit
//!   path including unwinding
//! - Unknown object keys are skipped so newer peers can add fields
//! - Errors carry the JSON pointer of the failing position; a partially
//!   decoded value is never returned

pub mod machine;
pub mod marshal;
pub mod pool;
pub mod reader;
pub mod unmarshal;
pub mod writer;

use std::io::{Read, Write};

use thiserror::Error;

pub use pool::{Pool, Pooled, Reusable};
pub use reader::{Kind, Reader, Token};
pub use writer::TokenWriter;

/// Buffers above this capacity are not returned to the pools.
const MAX_RETAINED: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding scalar: {0}")]
    Json(#[from] serde_json::Error),

    #[error("misplaced token: {0}")]
    Syntax(&'static str),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of input (at {0:?})")]
    Eof(String),

    #[error("syntax error at offset {offset}: {msg} (at {pointer:?})")]
    Syntax {
        msg: String,
        pointer: String,
        offset: usize,
    },

    #[error("unexpected token (at {0:?})")]
    UnexpectedToken(String),

    #[error("invalid value (at {pointer:?}): {msg}")]
    InvalidValue { pointer: String, msg: String },
}

/// Types with a hand-written wire encoding.
pub trait Marshal {
    fn marshal<W: Write>(&self, w: &mut TokenWriter<W>) -> Result<(), EncodeError>;
}

/// Types with a hand-written wire decoding.
pub trait Unmarshal: Sized {
    fn unmarshal(r: &mut Reader) -> Result<Self, DecodeError>;
}

/// Reusable encoding state: output buffer plus container stack.
pub struct Encoder {
    w: TokenWriter<Vec<u8>>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            w: TokenWriter::new(Vec::new()),
        }
    }
}

impl Reusable for Encoder {
    fn reset(&mut self) {
        self.w.clear();
    }

    fn retain(&self) -> bool {
        self.w.get_ref().capacity() <= MAX_RETAINED
    }
}

impl Encoder {
    /// Encode `v` into the internal buffer.
    ///
    /// On error the bytes produced so far stay available via [`Encoder::written`].
    pub fn encode<T: Marshal + ?Sized>(&mut self, v: &T) -> Result<&[u8], EncodeError> {
        self.w.clear();
        v.marshal(&mut self.w)?;
        Ok(self.w.get_ref())
    }

    pub fn written(&self) -> &[u8] {
        self.w.get_ref()
    }

    /// Encode `v` and copy the output to `out`, including partial output on error.
    pub fn encode_to<W: Write, T: Marshal + ?Sized>(&mut self, out: &mut W, v: &T) -> Result<(), EncodeError> {
        self.w.clear();
        let res = v.marshal(&mut self.w);
        out.write_all(self.w.get_ref())?;
        res
    }
}

/// Reusable decoding state.
#[derive(Default)]
pub struct Decoder {
    r: Reader,
}

impl Reusable for Decoder {
    fn reset(&mut self) {
        self.r.clear();
    }

    fn retain(&self) -> bool {
        self.r.capacity() <= MAX_RETAINED
    }
}

impl Decoder {
    /// Decode a single `T` from `src`; only whitespace may follow it.
    pub fn decode<T: Unmarshal, R: Read>(&mut self, src: R) -> Result<T, DecodeError> {
        self.r.reset(src)?;
        let v = T::unmarshal(&mut self.r)?;
        self.r.finish()?;
        Ok(v)
    }
}

static ENCODERS: Pool<Encoder> = Pool::new("encoder", 64);
static DECODERS: Pool<Decoder> = Pool::new("decoder", 64);

/// Check out an encoder.
pub fn encoder() -> Pooled<'static, Encoder> {
    ENCODERS.get()
}

/// Check out a decoder.
pub fn decoder() -> Pooled<'static, Decoder> {
    DECODERS.get()
}

pub fn to_vec<T: Marshal + ?Sized>(v: &T) -> Result<Vec<u8>, EncodeError> {
    let mut enc = encoder();
    Ok(enc.encode(v)?.to_vec())
}

pub fn from_slice<T: Unmarshal>(b: &[u8]) -> Result<T, DecodeError> {
    decoder().decode(b)
}
