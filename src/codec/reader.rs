//! JSON token reader.
//!
//! Reads one token at a time from an owned buffer, validating structure
//! (separators, nesting) as it goes and keeping enough state to report the
//! JSON pointer of the current position. String and number scalars are
//! handed to serde_json for unescaping and range checks.

use std::fmt::Write as _;
use std::io::Read;

use serde_json::value::RawValue;
use serde_json::Number;

use super::DecodeError;

/// A single JSON token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    String(String),
    Number(Number),
    Bool(bool),
    Null,
}

/// The kind of the next token, as seen by [`Reader::peek_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    String,
    Number,
    Bool,
    Null,
    Eof,
    Invalid,
}

#[derive(Debug)]
enum Frame {
    Object {
        members: usize,
        key: Option<String>,
        want_value: bool,
    },
    Array {
        elems: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Ctx {
    Top,
    ObjectKey { first: bool },
    ObjectValue,
    Array { first: bool },
}

#[derive(Debug, Default)]
pub struct Reader {
    buf: Vec<u8>,
    pos: usize,
    stack: Vec<Frame>,
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any previous input and load `r` to its end.
    pub fn reset<R: Read>(&mut self, mut r: R) -> Result<(), DecodeError> {
        self.clear();
        r.read_to_end(&mut self.buf)?;
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.stack.clear();
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// JSON pointer of the current structural position.
    pub fn pointer(&self) -> String {
        let mut p = String::new();
        for f in &self.stack {
            match f {
                Frame::Object { key: Some(k), .. } => {
                    p.push('/');
                    for c in k.chars() {
                        match c {
                            '~' => p.push_str("~0"),
                            '/' => p.push_str("~1"),
                            c => p.push(c),
                        }
                    }
                }
                Frame::Array { elems } if *elems > 0 => {
                    let _ = write!(p, "/{}", elems - 1);
                }
                _ => {}
            }
        }
        p
    }

    fn syntax(&self, msg: impl Into<String>) -> DecodeError {
        DecodeError::Syntax {
            msg: msg.into(),
            pointer: self.pointer(),
            offset: self.pos,
        }
    }

    fn eof(&self) -> DecodeError {
        DecodeError::Eof(self.pointer())
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.buf.get(self.pos) {
            self.pos += 1;
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn ctx(&self) -> Ctx {
        match self.stack.last() {
            None => Ctx::Top,
            Some(Frame::Object {
                want_value: true, ..
            }) => Ctx::ObjectValue,
            Some(Frame::Object { members, .. }) => Ctx::ObjectKey {
                first: *members == 0,
            },
            Some(Frame::Array { elems }) => Ctx::Array { first: *elems == 0 },
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), DecodeError> {
        match self.peek_byte() {
            Some(c) if c == b => {
                self.pos += 1;
                self.skip_ws();
                Ok(())
            }
            Some(c) => Err(self.syntax(format!("want {:?}, found {:?}", b as char, c as char))),
            None => Err(self.eof()),
        }
    }

    /// Consume separators ahead of the next token. Container ends and object
    /// keys are returned directly; `None` means a value starts at `pos`.
    fn advance(&mut self) -> Result<Option<Token>, DecodeError> {
        self.skip_ws();
        match self.ctx() {
            Ctx::Top => Ok(None),
            Ctx::ObjectValue => {
                self.expect(b':')?;
                if let Some(Frame::Object { want_value, .. }) = self.stack.last_mut() {
                    *want_value = false;
                }
                Ok(None)
            }
            Ctx::ObjectKey { first } => {
                if self.peek_byte() == Some(b'}') {
                    self.pos += 1;
                    self.stack.pop();
                    return Ok(Some(Token::EndObject));
                }
                if !first {
                    self.expect(b',')?;
                }
                if self.peek_byte() != Some(b'"') {
                    return Err(match self.peek_byte() {
                        None => self.eof(),
                        Some(_) => self.syntax("want object key"),
                    });
                }
                let k = self.lex_string()?;
                if let Some(Frame::Object {
                    members,
                    key,
                    want_value,
                }) = self.stack.last_mut()
                {
                    *members += 1;
                    *key = Some(k.clone());
                    *want_value = true;
                }
                Ok(Some(Token::String(k)))
            }
            Ctx::Array { first } => {
                if self.peek_byte() == Some(b']') {
                    self.pos += 1;
                    self.stack.pop();
                    return Ok(Some(Token::EndArray));
                }
                if !first {
                    self.expect(b',')?;
                }
                if let Some(Frame::Array { elems }) = self.stack.last_mut() {
                    *elems += 1;
                }
                Ok(None)
            }
        }
    }

    /// Read the next token.
    pub fn read_token(&mut self) -> Result<Token, DecodeError> {
        if let Some(tok) = self.advance()? {
            return Ok(tok);
        }
        self.lex_value()
    }

    /// Report the kind of the next token without consuming it.
    pub fn peek_kind(&mut self) -> Kind {
        self.skip_ws();
        let mut i = self.pos;
        let sep = match self.ctx() {
            Ctx::ObjectValue => Some(b':'),
            Ctx::ObjectKey { first: false } | Ctx::Array { first: false } => Some(b','),
            _ => None,
        };
        if let Some(sep) = sep {
            if self.buf.get(i) == Some(&sep) {
                i += 1;
                while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.buf.get(i) {
                    i += 1;
                }
            }
        }
        match self.buf.get(i) {
            None => Kind::Eof,
            Some(b'{') => Kind::BeginObject,
            Some(b'}') => Kind::EndObject,
            Some(b'[') => Kind::BeginArray,
            Some(b']') => Kind::EndArray,
            Some(b'"') => Kind::String,
            Some(b't' | b'f') => Kind::Bool,
            Some(b'n') => Kind::Null,
            Some(b'-' | b'0'..=b'9') => Kind::Number,
            Some(_) => Kind::Invalid,
        }
    }

    /// Skip the next value, however deeply nested.
    pub fn skip_value(&mut self) -> Result<(), DecodeError> {
        let depth = self.stack.len();
        match self.read_token()? {
            Token::BeginObject | Token::BeginArray => {}
            Token::EndObject | Token::EndArray => return Err(self.syntax("want value")),
            _ => return Ok(()),
        }
        while self.stack.len() > depth {
            self.read_token()?;
        }
        Ok(())
    }

    /// Capture the next value verbatim.
    pub fn read_raw(&mut self) -> Result<Box<RawValue>, DecodeError> {
        if self.advance()?.is_some() {
            return Err(self.syntax("want value"));
        }
        let mut it = serde_json::Deserializer::from_slice(&self.buf[self.pos..])
            .into_iter::<Box<RawValue>>();
        let raw = match it.next() {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => return Err(self.json(e)),
            None => return Err(self.eof()),
        };
        self.pos += it.byte_offset();
        Ok(raw)
    }

    /// Check that nothing but whitespace follows the top-level value.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        self.skip_ws();
        if !self.stack.is_empty() {
            return Err(self.eof());
        }
        if self.pos != self.buf.len() {
            return Err(self.syntax("trailing data after top-level value"));
        }
        Ok(())
    }

    fn json(&self, e: serde_json::Error) -> DecodeError {
        if e.is_eof() {
            return self.eof();
        }
        self.syntax(e.to_string())
    }

    fn lex_value(&mut self) -> Result<Token, DecodeError> {
        let Some(b) = self.peek_byte() else {
            return Err(self.eof());
        };
        match b {
            b'{' => {
                self.pos += 1;
                self.stack.push(Frame::Object {
                    members: 0,
                    key: None,
                    want_value: false,
                });
                Ok(Token::BeginObject)
            }
            b'[' => {
                self.pos += 1;
                self.stack.push(Frame::Array { elems: 0 });
                Ok(Token::BeginArray)
            }
            b'"' => self.lex_string().map(Token::String),
            b't' => self.lex_literal("true", Token::Bool(true)),
            b'f' => self.lex_literal("false", Token::Bool(false)),
            b'n' => self.lex_literal("null", Token::Null),
            b'-' | b'0'..=b'9' => self.lex_number(),
            c => Err(self.syntax(format!("invalid character {:?}", c as char))),
        }
    }

    fn lex_literal(&mut self, lit: &str, tok: Token) -> Result<Token, DecodeError> {
        let rest = &self.buf[self.pos..];
        if rest.starts_with(lit.as_bytes()) {
            self.pos += lit.len();
            return Ok(tok);
        }
        if lit.as_bytes().starts_with(rest) {
            return Err(self.eof());
        }
        Err(self.syntax(format!("invalid literal, want {lit}")))
    }

    fn lex_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos + 1;
        // Fast path: no escapes before the closing quote.
        let end = self.buf[start.min(self.buf.len())..]
            .iter()
            .position(|&b| b == b'"' || b == b'\\' || b < 0x20);
        if let Some(n) = end {
            if self.buf[start + n] == b'"' {
                let s = std::str::from_utf8(&self.buf[start..start + n])
                    .map_err(|e| self.syntax(e.to_string()))?
                    .to_owned();
                self.pos = start + n + 1;
                return Ok(s);
            }
        }
        let mut it =
            serde_json::Deserializer::from_slice(&self.buf[self.pos..]).into_iter::<String>();
        let s = match it.next() {
            Some(Ok(s)) => s,
            Some(Err(e)) => return Err(self.json(e)),
            None => return Err(self.eof()),
        };
        self.pos += it.byte_offset();
        Ok(s)
    }

    fn lex_number(&mut self) -> Result<Token, DecodeError> {
        let mut it =
            serde_json::Deserializer::from_slice(&self.buf[self.pos..]).into_iter::<Number>();
        let n = match it.next() {
            Some(Ok(n)) => n,
            Some(Err(e)) => return Err(self.json(e)),
            None => return Err(self.eof()),
        };
        self.pos += it.byte_offset();
        Ok(Token::Number(n))
    }
}
