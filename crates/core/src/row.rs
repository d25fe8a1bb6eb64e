// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	cmp::Ordering,
	fmt::{Display, Formatter},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::Value;

/// An ordered record of named values.
///
/// Field order is insertion order and is part of a row's identity: two
/// rows with the same fields in a different order are distinct. Projections
/// always produce fields in a deterministic order, so this keeps equality,
/// ordering and fingerprints cheap and stable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, Value>);

impl Row {
	pub fn new() -> Self {
		Row(IndexMap::new())
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Row(IndexMap::with_capacity(capacity))
	}

	pub fn from_pairs(pairs: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
		Row(pairs.into_iter().map(|(field, value)| (field.into(), value)).collect())
	}

	pub fn set(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
		self.0.insert(field.into(), value);
		self
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	/// Walk a dotted path through nested records. Missing segments and
	/// non-record intermediates resolve to `None`.
	pub fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
		let (first, rest) = path.split_first()?;
		let mut current = self.0.get(first.as_ref())?;
		for segment in rest {
			match current {
				Value::Record(row) => current = row.get(segment.as_ref())?,
				_ => return None,
			}
		}
		Some(current)
	}

	pub fn contains(&self, field: &str) -> bool {
		self.0.contains_key(field)
	}

	pub fn remove(&mut self, field: &str) -> Option<Value> {
		self.0.shift_remove(field)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}

	pub fn fields(&self) -> impl Iterator<Item = &String> {
		self.0.keys()
	}

	pub fn values(&self) -> impl Iterator<Item = &Value> {
		self.0.values()
	}

	/// Append the canonical byte encoding of every field in order.
	pub fn encode_into(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&(self.len() as u64).to_le_bytes());
		for (field, value) in self.iter() {
			out.extend_from_slice(&(field.len() as u64).to_le_bytes());
			out.extend_from_slice(field.as_bytes());
			value.encode_into(out);
		}
	}

	/// Structural fingerprint over the canonical value encoding. Equal rows
	/// fingerprint equally; distinct rows collide only with xxh3's odds.
	pub fn fingerprint(&self) -> u64 {
		let mut buf = Vec::with_capacity(64);
		self.encode_into(&mut buf);
		xxh3_64(&buf)
	}
}

impl PartialEq for Row {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Row {}

impl PartialOrd for Row {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Row {
	fn cmp(&self, other: &Self) -> Ordering {
		let mut left = self.iter();
		let mut right = other.iter();
		loop {
			match (left.next(), right.next()) {
				(None, None) => return Ordering::Equal,
				(None, Some(_)) => return Ordering::Less,
				(Some(_), None) => return Ordering::Greater,
				(Some((lf, lv)), Some((rf, rv))) => {
					let ord = lf.cmp(rf).then_with(|| lv.cmp(rv));
					if ord != Ordering::Equal {
						return ord;
					}
				}
			}
		}
	}
}

impl FromIterator<(String, Value)> for Row {
	fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
		Row(iter.into_iter().collect())
	}
}

impl Display for Row {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("{")?;
		for (i, (field, value)) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{field}: {value}")?;
		}
		f.write_str("}")
	}
}
