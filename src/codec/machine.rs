//! Continuation-passing decode machine.
//!
//! A [`Machine`] holds the token reader, the destination value and an error
//! slot. Each state reads what it needs, stores into the destination and
//! returns the next state; `None` stops the machine, with any failure left
//! in the error slot. Per-type "keys" states are plain functions; the generic
//! array and map loops are boxed closures that re-enter themselves.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use super::reader::{Kind, Reader, Token};
use super::{DecodeError, Unmarshal};

/// Signature of a per-type state that dispatches on the next object key.
pub(crate) type Keys<V> = fn(&mut Machine<'_, V>) -> Option<State<V>>;

type Step<V> = Box<dyn FnOnce(&mut Machine<'_, V>) -> Option<State<V>>>;

pub(crate) enum State<V> {
    Keys(Keys<V>),
    Step(Step<V>),
}

impl<V> State<V> {
    pub(crate) fn step<F>(f: F) -> Self
    where
        F: FnOnce(&mut Machine<'_, V>) -> Option<State<V>> + 'static,
    {
        State::Step(Box::new(f))
    }
}

pub(crate) struct Machine<'m, V> {
    pub(crate) dec: &'m mut Reader,
    pub(crate) out: &'m mut V,
    err: Option<DecodeError>,
}

/// Drive the machine from `start` until a state returns `None`.
pub(crate) fn run<V>(dec: &mut Reader, out: &mut V, start: State<V>) -> Result<(), DecodeError> {
    let mut m = Machine {
        dec,
        out,
        err: None,
    };
    let mut state = Some(start);
    while let Some(s) = state {
        state = match s {
            State::Keys(f) => f(&mut m),
            State::Step(f) => f(&mut m),
        };
    }
    match m.err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Decode a record whose fields are dispatched by `keys`.
pub(crate) fn record<V: Default + 'static>(dec: &mut Reader, keys: Keys<V>) -> Result<V, DecodeError> {
    let mut out = V::default();
    run(dec, &mut out, object_begin(keys))?;
    Ok(out)
}

/// Terminal state.
pub(crate) fn done<V>(_: &mut Machine<'_, V>) -> Option<State<V>> {
    None
}

/// Expect the start of an object (then continue with `keys`) or `null`
/// (leaving the destination untouched).
pub(crate) fn object_begin<V: 'static>(keys: Keys<V>) -> State<V> {
    State::step(move |m| match m.token()? {
        Token::BeginObject => Some(State::Keys(keys)),
        Token::Null => None,
        _ => m.unexpected(),
    })
}

/// Decode an array of `T` into the field selected by `field`, then go to `next`.
pub(crate) fn array<V: 'static, T: Unmarshal + 'static>(
    field: fn(&mut V) -> &mut Vec<T>,
    next: Keys<V>,
) -> State<V> {
    State::step(move |m| match m.token()? {
        Token::BeginArray => Some(array_elems(field, next)),
        Token::Null => Some(State::Keys(next)),
        _ => m.unexpected(),
    })
}

fn array_elems<V: 'static, T: Unmarshal + 'static>(
    field: fn(&mut V) -> &mut Vec<T>,
    next: Keys<V>,
) -> State<V> {
    State::step(move |m| {
        if m.dec.peek_kind() == Kind::EndArray {
            m.token()?;
            return Some(State::Keys(next));
        }
        match T::unmarshal(m.dec) {
            Ok(v) => field(&mut *m.out).push(v),
            Err(e) => return m.fail(e),
        }
        Some(array_elems(field, next))
    })
}

/// Decode an object of `T` keyed by string into the selected map, then go to `next`.
pub(crate) fn map<V: 'static, T: Unmarshal + 'static>(
    field: fn(&mut V) -> &mut BTreeMap<String, T>,
    next: Keys<V>,
) -> State<V> {
    State::step(move |m| match m.token()? {
        Token::BeginObject => Some(map_entries(field, next)),
        Token::Null => Some(State::Keys(next)),
        _ => m.unexpected(),
    })
}

fn map_entries<V: 'static, T: Unmarshal + 'static>(
    field: fn(&mut V) -> &mut BTreeMap<String, T>,
    next: Keys<V>,
) -> State<V> {
    State::step(move |m| {
        let Token::String(key) = m.token()? else {
            // Only the end of the object can stand where a key is due.
            return Some(State::Keys(next));
        };
        match T::unmarshal(m.dec) {
            Ok(v) => {
                field(&mut *m.out).insert(key, v);
            }
            Err(e) => return m.fail(e),
        }
        Some(map_entries(field, next))
    })
}

impl<V> Machine<'_, V> {
    /// Read one token, parking any error.
    pub(crate) fn token(&mut self) -> Option<Token> {
        match self.dec.read_token() {
            Ok(tok) => Some(tok),
            Err(e) => {
                self.err = Some(e);
                None
            }
        }
    }

    /// Read the next object key. `None` at the end of the object or on error.
    pub(crate) fn key(&mut self) -> Option<String> {
        match self.token()? {
            Token::String(k) => Some(k),
            Token::EndObject => None,
            _ => {
                self.unexpected::<()>();
                None
            }
        }
    }

    pub(crate) fn fail<S>(&mut self, err: DecodeError) -> Option<S> {
        self.err = Some(err);
        None
    }

    pub(crate) fn unexpected<S>(&mut self) -> Option<S> {
        let pointer = self.dec.pointer();
        self.fail(DecodeError::UnexpectedToken(pointer))
    }

    /// Skip the value of an unknown key.
    pub(crate) fn skip(&mut self, next: Keys<V>) -> Option<State<V>> {
        if let Err(e) = self.dec.skip_value() {
            return self.fail(e);
        }
        Some(State::Keys(next))
    }

    pub(crate) fn string(
        &mut self,
        field: impl FnOnce(&mut V) -> &mut String,
        next: Keys<V>,
    ) -> Option<State<V>> {
        match self.token()? {
            Token::String(s) => *field(&mut *self.out) = s,
            Token::Null => {}
            _ => return self.unexpected(),
        }
        Some(State::Keys(next))
    }

    pub(crate) fn bool(&mut self, field: impl FnOnce(&mut V) -> &mut bool, next: Keys<V>) -> Option<State<V>> {
        match self.token()? {
            Token::Bool(b) => *field(&mut *self.out) = b,
            Token::Null => {}
            _ => return self.unexpected(),
        }
        Some(State::Keys(next))
    }

    pub(crate) fn u64(&mut self, field: impl FnOnce(&mut V) -> &mut u64, next: Keys<V>) -> Option<State<V>> {
        match self.token()? {
            Token::Number(n) => match n.as_u64() {
                Some(n) => *field(&mut *self.out) = n,
                None => return self.invalid(format!("{n} is not an unsigned integer")),
            },
            Token::Null => {}
            _ => return self.unexpected(),
        }
        Some(State::Keys(next))
    }

    /// Decode a string through the target type's `FromStr`.
    pub(crate) fn text<T>(&mut self, field: impl FnOnce(&mut V) -> &mut T, next: Keys<V>) -> Option<State<V>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.token()? {
            Token::String(s) => match s.parse::<T>() {
                Ok(v) => *field(&mut *self.out) = v,
                Err(e) => return self.invalid(e),
            },
            Token::Null => {}
            _ => return self.unexpected(),
        }
        Some(State::Keys(next))
    }

    /// Like [`Machine::text`], leaving `None` for null or the empty string.
    pub(crate) fn opt_text<T>(
        &mut self,
        field: impl FnOnce(&mut V) -> &mut Option<T>,
        next: Keys<V>,
    ) -> Option<State<V>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.token()? {
            Token::String(s) if s.is_empty() => {}
            Token::String(s) => match s.parse::<T>() {
                Ok(v) => *field(&mut *self.out) = Some(v),
                Err(e) => return self.invalid(e),
            },
            Token::Null => {}
            _ => return self.unexpected(),
        }
        Some(State::Keys(next))
    }

    /// Decode a nested value in place.
    pub(crate) fn value<T: Unmarshal>(&mut self, field: impl FnOnce(&mut V) -> &mut T, next: Keys<V>) -> Option<State<V>> {
        match T::unmarshal(self.dec) {
            Ok(v) => *field(&mut *self.out) = v,
            Err(e) => return self.fail(e),
        }
        Some(State::Keys(next))
    }

    /// Decode an optional nested record; a zero-valued record stays `None`.
    pub(crate) fn optional<T>(
        &mut self,
        field: impl FnOnce(&mut V) -> &mut Option<T>,
        next: Keys<V>,
    ) -> Option<State<V>>
    where
        T: Unmarshal + Default + PartialEq,
    {
        match T::unmarshal(self.dec) {
            Ok(v) if v == T::default() => {}
            Ok(v) => *field(&mut *self.out) = Some(v),
            Err(e) => return self.fail(e),
        }
        Some(State::Keys(next))
    }

    fn invalid<S>(&mut self, msg: impl Display) -> Option<S> {
        let pointer = self.dec.pointer();
        self.fail(DecodeError::InvalidValue {
            pointer,
            msg: msg.to_string(),
        })
    }
}
