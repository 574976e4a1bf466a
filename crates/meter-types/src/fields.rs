//! Field-level coercion for JSON records.
//!
//! Most record kinds declare the exact set of fields they accept and reject
//! anything else; open kinds only read the fields they know. Required fields
//! must be present either way.

use serde_json::{Map, Value};
use time::Date;

use crate::error::{ParseError, ParseResult};
use crate::timestamp::parse_date;

/// A validated view over one JSON object of a given record kind.
pub(crate) struct Fields<'a> {
    kind: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// Check that `value` is an object whose keys are all in `allowed`.
    pub(crate) fn new(
        kind: &'static str,
        value: &'a Value,
        allowed: &[&str],
    ) -> ParseResult<Self> {
        let map = value.as_object().ok_or(ParseError::NotAnObject { kind })?;

        if let Some(unknown) = map.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(ParseError::UnknownField {
                kind,
                field: unknown.clone(),
            });
        }

        Ok(Self { kind, map })
    }

    /// Like [`new`](Self::new), but keys outside the known set are ignored.
    pub(crate) fn open(kind: &'static str, value: &'a Value) -> ParseResult<Self> {
        let map = value.as_object().ok_or(ParseError::NotAnObject { kind })?;
        Ok(Self { kind, map })
    }

    fn invalid(&self, field: &str, reason: impl Into<String>) -> ParseError {
        ParseError::InvalidField {
            kind: self.kind,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &str) -> ParseResult<&'a Value> {
        self.present(field).ok_or_else(|| ParseError::MissingField {
            kind: self.kind,
            field: field.to_string(),
        })
    }

    fn coerce_int(&self, field: &str, value: &Value) -> ParseResult<i64> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| self.invalid(field, format!("{} is not an integer", n))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| self.invalid(field, format!("'{}' is not an integer", s))),
            other => Err(self.invalid(field, format!("expected integer, got {}", other))),
        }
    }

    fn coerce_string(&self, field: &str, value: &Value) -> ParseResult<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(field, format!("expected string, got {}", value)))
    }

    pub(crate) fn int(&self, field: &str) -> ParseResult<i64> {
        let value = self.required(field)?;
        self.coerce_int(field, value)
    }

    pub(crate) fn opt_int(&self, field: &str) -> ParseResult<Option<i64>> {
        self.present(field)
            .map(|v| self.coerce_int(field, v))
            .transpose()
    }

    pub(crate) fn string(&self, field: &str) -> ParseResult<String> {
        let value = self.required(field)?;
        self.coerce_string(field, value)
    }

    pub(crate) fn opt_string(&self, field: &str) -> ParseResult<Option<String>> {
        self.present(field)
            .map(|v| self.coerce_string(field, v))
            .transpose()
    }

    pub(crate) fn opt_date(&self, field: &str) -> ParseResult<Option<Date>> {
        match self.opt_string(field)? {
            Some(text) => parse_date(&text)
                .map(Some)
                .map_err(|_| self.invalid(field, format!("'{}' is not a YYYY-MM-DD date", text))),
            None => Ok(None),
        }
    }
}
