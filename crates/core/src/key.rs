// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{OrderedF64, Value};

#[derive(Debug, Error, PartialEq)]
#[error("value cannot be used as a key: {0}")]
pub struct KeyError(pub String);

/// A primary, join or grouping key. Keys compare by value, never by
/// identity; a composite key renders as a bracketed tuple so its textual
/// form is comparable across process boundaries.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
	Undefined,
	Boolean(bool),
	Int(i64),
	Float(OrderedF64),
	Text(String),
	Composite(Vec<Key>),
}

impl Key {
	pub fn text(value: impl Into<String>) -> Self {
		Key::Text(value.into())
	}

	pub fn composite(parts: impl IntoIterator<Item = Key>) -> Self {
		Key::Composite(parts.into_iter().collect())
	}
}

impl Display for Key {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Key::Undefined => f.write_str("undefined"),
			Key::Boolean(true) => f.write_str("true"),
			Key::Boolean(false) => f.write_str("false"),
			Key::Int(value) => Display::fmt(value, f),
			Key::Float(value) => Display::fmt(value, f),
			Key::Text(value) => Display::fmt(value, f),
			Key::Composite(parts) => {
				f.write_str("[")?;
				for (i, part) in parts.iter().enumerate() {
					if i > 0 {
						f.write_str(",")?;
					}
					Display::fmt(part, f)?;
				}
				f.write_str("]")
			}
		}
	}
}

impl TryFrom<Value> for Key {
	type Error = KeyError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Undefined => Ok(Key::Undefined),
			Value::Boolean(v) => Ok(Key::Boolean(v)),
			Value::Int(v) => Ok(Key::Int(v)),
			Value::Float(v) => Ok(Key::Float(OrderedF64::new(v))),
			Value::Text(v) => Ok(Key::Text(v)),
			Value::Timestamp(v) => Ok(Key::Int(v.millis())),
			Value::List(items) => {
				let parts = items
					.into_iter()
					.map(Key::try_from)
					.collect::<Result<Vec<_>, _>>()?;
				Ok(Key::Composite(parts))
			}
			value @ Value::Record(_) => Err(KeyError(format!("{value}"))),
		}
	}
}

impl From<Key> for Value {
	fn from(key: Key) -> Self {
		match key {
			Key::Undefined => Value::Undefined,
			Key::Boolean(v) => Value::Boolean(v),
			Key::Int(v) => Value::Int(v),
			Key::Float(v) => Value::Float(v.value()),
			Key::Text(v) => Value::Text(v),
			Key::Composite(parts) => Value::List(parts.into_iter().map(Value::from).collect()),
		}
	}
}

impl From<i64> for Key {
	fn from(v: i64) -> Self {
		Key::Int(v)
	}
}

impl From<&str> for Key {
	fn from(v: &str) -> Self {
		Key::Text(v.to_string())
	}
}

impl From<String> for Key {
	fn from(v: String) -> Self {
		Key::Text(v)
	}
}

#[cfg(test)]
mod tests {
	use super::Key;
	use crate::Value;

	#[test]
	fn test_keys_compare_by_value() {
		assert_eq!(Key::text("alice"), Key::text(String::from("alice")));
		assert_eq!(Key::composite([Key::Int(1), Key::Int(2)]), Key::composite([Key::Int(1), Key::Int(2)]));
	}

	#[test]
	fn test_composite_display_is_deterministic() {
		let key = Key::composite([Key::Int(1), Key::text("a")]);
		assert_eq!(key.to_string(), "[1,a]");
	}

	#[test]
	fn test_key_from_value() {
		assert_eq!(Key::try_from(Value::Int(7)).unwrap(), Key::Int(7));
		assert_eq!(Key::try_from(Value::text("x")).unwrap(), Key::text("x"));
		assert!(Key::try_from(Value::Record(crate::Row::new())).is_err());
	}
}
