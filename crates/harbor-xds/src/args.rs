//! Decoding of untyped extension arguments.
//!
//! Arguments arrive as a JSON object written by operators, so keys match
//! case-insensitively and every problem is collected before giving up.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::{ErrorList, XdsError, XdsResult};

/// A closed set of accepted values for one argument.
#[derive(Debug, Clone, Default)]
pub struct StringSet(BTreeSet<&'static str>);

impl StringSet {
    pub fn new(values: &[&'static str]) -> Self {
        Self(values.iter().copied().collect())
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    /// Reject an empty `value` or one outside the set.
    pub fn check_required(&self, value: &str, field: &str) -> XdsResult<()> {
        if value.is_empty() {
            return Err(XdsError::Required(field.to_string()));
        }
        if !self.0.contains(value) {
            return Err(XdsError::Unsupported {
                field: field.to_string(),
                value: value.to_string(),
                supported: self.0.iter().copied().collect::<Vec<_>>().join(", "),
            });
        }
        Ok(())
    }
}

/// Argument reader that records every failure instead of stopping at the
/// first one. Call [`Arguments::finish`] once all fields are read.
pub struct Arguments<'a> {
    raw: &'a Map<String, Value>,
    errors: ErrorList,
}

impl<'a> Arguments<'a> {
    pub fn new(raw: &'a Map<String, Value>) -> Self {
        Self {
            raw,
            errors: ErrorList::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.raw.get(key).or_else(|| {
            self.raw
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    fn invalid(&mut self, field: &str, reason: &str) {
        self.errors.push(XdsError::Argument {
            field: field.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn string(&mut self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            _ => {
                self.invalid(key, "expected a string");
                None
            }
        }
    }

    /// A string that must be present and non-empty. Returns `""` when it
    /// is not, after recording the error.
    pub fn required_string(&mut self, key: &str) -> String {
        let value = self.string(key).unwrap_or_default();
        if value.is_empty() && !self.has_error_for(key) {
            self.errors.push(XdsError::Required(key.to_string()));
        }
        value
    }

    /// A string checked against `allowed`; missing values are an error.
    pub fn one_of(&mut self, key: &str, allowed: &StringSet) -> String {
        let value = self.string(key).unwrap_or_default();
        if self.has_error_for(key) {
            return value;
        }
        if let Err(err) = allowed.check_required(&value, key) {
            self.errors.push(err);
        }
        value
    }

    pub fn bool(&mut self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            _ => {
                self.invalid(key, "expected a boolean");
                None
            }
        }
    }

    /// A non-negative integer. Integral floats are accepted since JSON
    /// tooling often writes `10.0`.
    pub fn u64(&mut self, key: &str) -> Option<u64> {
        let value = self.get(key)?;
        if value.is_null() {
            return None;
        }
        let parsed = value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        });
        if parsed.is_none() {
            self.invalid(key, "expected a non-negative integer");
        }
        parsed
    }

    pub fn required_u64(&mut self, key: &str) -> u64 {
        match self.u64(key) {
            Some(n) => n,
            None => {
                if !self.has_error_for(key) {
                    self.errors.push(XdsError::Required(key.to_string()));
                }
                0
            }
        }
    }

    /// Record an extension-specific failure.
    pub fn error(&mut self, err: XdsError) {
        self.errors.push(err);
    }

    fn has_error_for(&self, key: &str) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, XdsError::Argument { field, .. } if field == key))
    }

    /// `value` if nothing went wrong, every recorded error otherwise.
    pub fn finish<T>(self, value: T) -> XdsResult<T> {
        self.errors.into_result().map(|()| value)
    }
}
