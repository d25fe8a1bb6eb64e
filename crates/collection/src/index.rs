// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::BTreeMap,
	ops::Bound,
	time::{Duration, Instant},
};

use indexmap::IndexMap;
use xxhash_rust::xxh3::xxh3_64;

use rill_core::{ChangeKind, ChangeMessage, Key, Row, Value};
use rill_query::{Expression, evaluate};

/// Signature of an expression list: the hash of its canonical encoding,
/// so the same expressions always address the same index across restarts.
pub fn index_signature(expressions: &[Expression]) -> u64 {
	let encoded = serde_json::to_vec(expressions).expect("expressions serialize");
	xxh3_64(&encoded)
}

struct IndexEntry {
	name: String,
	expressions: Vec<Expression>,
	map: BTreeMap<Value, Vec<Key>>,
	ref_count: usize,
	idle_since: Option<Instant>,
	removed: bool,
}

impl IndexEntry {
	fn value_of(&self, row: &Row) -> Value {
		match self.expressions.as_slice() {
			[single] => evaluate(single, row),
			many => Value::List(many.iter().map(|expr| evaluate(expr, row)).collect()),
		}
	}

	fn insert(&mut self, key: &Key, row: &Row) {
		let value = self.value_of(row);
		let keys = self.map.entry(value).or_default();
		if !keys.contains(key) {
			keys.push(key.clone());
		}
	}

	fn remove(&mut self, key: &Key, row: &Row) {
		let value = self.value_of(row);
		if let Some(keys) = self.map.get_mut(&value) {
			keys.retain(|k| k != key);
			if keys.is_empty() {
				self.map.remove(&value);
			}
		}
	}
}

/// Registry of derived indexes, maintained incrementally on every change
/// broadcast. Indexes are reference counted by the subscribers that
/// benefit from them; an index idle past the configured duration is
/// removed but its `(signature, name, removed)` record stays so restarts
/// rebuild deterministically.
pub struct IndexRegistry {
	entries: IndexMap<u64, IndexEntry>,
	idle_timeout: Duration,
}

/// `(signature, name, removed)` rows describing every index the registry
/// has seen.
pub type IndexDescriptor = (u64, String, bool);

impl IndexRegistry {
	pub fn new(idle_timeout: Duration) -> Self {
		IndexRegistry {
			entries: IndexMap::new(),
			idle_timeout,
		}
	}

	/// Create (or re-acquire) the index for an expression list, seeding
	/// it from the currently visible rows. Returns the signature.
	pub fn acquire<'a>(
		&mut self,
		name: impl Into<String>,
		expressions: Vec<Expression>,
		rows: impl Iterator<Item = (&'a Key, &'a Row)>,
	) -> u64 {
		let signature = index_signature(&expressions);
		let entry = self.entries.entry(signature).or_insert_with(|| IndexEntry {
			name: name.into(),
			expressions,
			map: BTreeMap::new(),
			ref_count: 0,
			idle_since: None,
			removed: false,
		});
		entry.ref_count += 1;
		entry.idle_since = None;
		if entry.removed {
			entry.removed = false;
			entry.map.clear();
		}
		if entry.map.is_empty() {
			for (key, row) in rows {
				entry.insert(key, row);
			}
		}
		signature
	}

	pub fn release(&mut self, signature: u64) {
		if let Some(entry) = self.entries.get_mut(&signature) {
			entry.ref_count = entry.ref_count.saturating_sub(1);
			if entry.ref_count == 0 {
				entry.idle_since = Some(Instant::now());
			}
		}
	}

	/// Drop the storage of indexes idle past the timeout, keeping their
	/// descriptors.
	pub fn sweep(&mut self) {
		let timeout = self.idle_timeout;
		for entry in self.entries.values_mut() {
			if entry.removed {
				continue;
			}
			if let Some(idle_since) = entry.idle_since {
				if idle_since.elapsed() >= timeout {
					entry.removed = true;
					entry.map = BTreeMap::new();
				}
			}
		}
	}

	/// Apply one change batch to every live index.
	pub fn apply(&mut self, messages: &[ChangeMessage]) {
		for entry in self.entries.values_mut() {
			if entry.removed {
				continue;
			}
			for message in messages {
				match message.kind {
					ChangeKind::Insert => {
						if let Some(row) = &message.value {
							entry.insert(&message.key, row);
						}
					}
					ChangeKind::Update => {
						if let Some(previous) = &message.previous_value {
							entry.remove(&message.key, previous);
						}
						if let Some(row) = &message.value {
							entry.insert(&message.key, row);
						}
					}
					ChangeKind::Delete => {
						if let Some(previous) = &message.previous_value {
							entry.remove(&message.key, previous);
						}
					}
				}
			}
		}
	}

	pub fn lookup(&self, signature: u64, value: &Value) -> Vec<Key> {
		self.entries
			.get(&signature)
			.filter(|entry| !entry.removed)
			.and_then(|entry| entry.map.get(value).cloned())
			.unwrap_or_default()
	}

	/// Keys whose indexed value falls inside the bounds, in value order.
	pub fn lookup_range(&self, signature: u64, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<Key> {
		match self.entries.get(&signature).filter(|entry| !entry.removed) {
			Some(entry) => {
				entry.map.range((lower, upper)).flat_map(|(_, keys)| keys.iter().cloned()).collect()
			}
			None => Vec::new(),
		}
	}

	pub fn descriptors(&self) -> Vec<IndexDescriptor> {
		self.entries
			.iter()
			.map(|(signature, entry)| (*signature, entry.name.clone(), entry.removed))
			.collect()
	}
}
