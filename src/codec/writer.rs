//! Low-level JSON token writer.
//!
//! The writer tracks open containers and emits `,` and `:` itself, so
//! marshal code only states structure. Scalars are escaped by serde_json.

use std::fmt::Display;
use std::io::Write;

use serde::Serialize;
use serde_json::value::RawValue;

use super::{EncodeError, Marshal};

#[derive(Debug, Clone, Copy)]
enum Frame {
    Object { members: usize, want_value: bool },
    Array { elems: usize },
}

pub struct TokenWriter<W> {
    w: W,
    stack: Vec<Frame>,
}

impl<W: Write> TokenWriter<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            stack: Vec::with_capacity(8),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.w
    }

    pub fn into_inner(self) -> W {
        self.w
    }

    /// Writes the separator owed before a value in the current container.
    fn before_value(&mut self) -> Result<(), EncodeError> {
        match self.stack.last_mut() {
            None => Ok(()),
            Some(Frame::Object { want_value, .. }) => {
                if !*want_value {
                    return Err(EncodeError::Syntax("value where an object key is due"));
                }
                *want_value = false;
                Ok(())
            }
            Some(Frame::Array { elems }) => {
                *elems += 1;
                if *elems > 1 {
                    self.w.write_all(b",")?;
                }
                Ok(())
            }
        }
    }

    pub fn begin_object(&mut self) -> Result<(), EncodeError> {
        self.before_value()?;
        self.w.write_all(b"{")?;
        self.stack.push(Frame::Object {
            members: 0,
            want_value: false,
        });
        Ok(())
    }

    pub fn end_object(&mut self) -> Result<(), EncodeError> {
        match self.stack.pop() {
            Some(Frame::Object {
                want_value: false, ..
            }) => {
                self.w.write_all(b"}")?;
                Ok(())
            }
            _ => Err(EncodeError::Syntax("unbalanced end of object")),
        }
    }

    pub fn begin_array(&mut self) -> Result<(), EncodeError> {
        self.before_value()?;
        self.w.write_all(b"[")?;
        self.stack.push(Frame::Array { elems: 0 });
        Ok(())
    }

    pub fn end_array(&mut self) -> Result<(), EncodeError> {
        match self.stack.pop() {
            Some(Frame::Array { .. }) => {
                self.w.write_all(b"]")?;
                Ok(())
            }
            _ => Err(EncodeError::Syntax("unbalanced end of array")),
        }
    }

    pub fn key(&mut self, key: &str) -> Result<(), EncodeError> {
        match self.stack.last_mut() {
            Some(Frame::Object {
                members,
                want_value,
            }) if !*want_value => {
                *members += 1;
                *want_value = true;
                if *members > 1 {
                    self.w.write_all(b",")?;
                }
            }
            _ => return Err(EncodeError::Syntax("object key outside of an object")),
        }
        serde_json::to_writer(&mut self.w, key)?;
        self.w.write_all(b":")?;
        Ok(())
    }

    pub fn string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.before_value()?;
        serde_json::to_writer(&mut self.w, s)?;
        Ok(())
    }

    /// Writes the `Display` form of a self-describing type as a string.
    pub fn text<T: Display + ?Sized>(&mut self, v: &T) -> Result<(), EncodeError> {
        self.string(&v.to_string())
    }

    pub fn bool(&mut self, b: bool) -> Result<(), EncodeError> {
        self.before_value()?;
        self.w.write_all(if b { b"true" } else { b"false" })?;
        Ok(())
    }

    pub fn u64(&mut self, n: u64) -> Result<(), EncodeError> {
        self.before_value()?;
        write!(self.w, "{n}")?;
        Ok(())
    }

    pub fn i64(&mut self, n: i64) -> Result<(), EncodeError> {
        self.before_value()?;
        write!(self.w, "{n}")?;
        Ok(())
    }

    pub fn null(&mut self) -> Result<(), EncodeError> {
        self.before_value()?;
        self.w.write_all(b"null")?;
        Ok(())
    }

    /// Copies an already-encoded document verbatim.
    pub fn raw(&mut self, v: &RawValue) -> Result<(), EncodeError> {
        self.before_value()?;
        self.w.write_all(v.get().as_bytes())?;
        Ok(())
    }

    /// Writes an arbitrary serde value, for open-ended extension members.
    pub fn value<T: Serialize + ?Sized>(&mut self, v: &T) -> Result<(), EncodeError> {
        self.before_value()?;
        serde_json::to_writer(&mut self.w, v)?;
        Ok(())
    }

    /// `key` then `v`.
    pub fn field<T: Marshal + ?Sized>(&mut self, key: &str, v: &T) -> Result<(), EncodeError> {
        self.key(key)?;
        v.marshal(self)
    }

    /// `key` then `s`, skipped when `s` is empty.
    pub fn field_str(&mut self, key: &str, s: &str) -> Result<(), EncodeError> {
        if s.is_empty() {
            return Ok(());
        }
        self.key(key)?;
        self.string(s)
    }

    /// `key` then the text form of `v`, skipped when that form is empty.
    pub fn field_text<T: Display + ?Sized>(&mut self, key: &str, v: &T) -> Result<(), EncodeError> {
        let s = v.to_string();
        self.field_str(key, &s)
    }

    /// Whether every opened container has been closed.
    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty()
    }
}

impl TokenWriter<Vec<u8>> {
    pub(crate) fn clear(&mut self) {
        self.w.clear();
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut TokenWriter<Vec<u8>>) -> Result<(), EncodeError>) -> String {
        let mut w = TokenWriter::new(Vec::new());
        f(&mut w).unwrap();
        assert!(w.is_balanced());
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn separators() {
        let out = written(|w| {
            w.begin_object()?;
            w.key("a")?;
            w.begin_array()?;
            w.u64(1)?;
            w.string("two")?;
            w.null()?;
            w.i64(-4)?;
            w.end_array()?;
            w.key("b")?;
            w.begin_object()?;
            w.end_object()?;
            w.key("c")?;
            w.bool(false)?;
            w.end_object()
        });
        assert_eq!(out, r#"{"a":[1,"two",null,-4],"b":{},"c":false}"#);
    }

    #[test]
    fn escapes_strings_and_keys() {
        let out = written(|w| {
            w.begin_object()?;
            w.key("quo\"te")?;
            w.string("line\nbreak")?;
            w.end_object()
        });
        assert_eq!(out, r#"{"quo\"te":"line\nbreak"}"#);
    }

    #[test]
    fn skips_empty_fields() {
        let out = written(|w| {
            w.begin_object()?;
            w.field_str("empty", "")?;
            w.field_str("set", "x")?;
            w.end_object()
        });
        assert_eq!(out, r#"{"set":"x"}"#);
    }

    #[test]
    fn rejects_misplaced_tokens() {
        let mut w = TokenWriter::new(Vec::new());
        w.begin_object().unwrap();
        assert!(matches!(w.string("x"), Err(EncodeError::Syntax(_))));
        assert!(matches!(w.end_array(), Err(EncodeError::Syntax(_))));

        let mut w = TokenWriter::new(Vec::new());
        assert!(matches!(w.key("k"), Err(EncodeError::Syntax(_))));
    }
}
