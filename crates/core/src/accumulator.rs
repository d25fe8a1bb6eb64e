// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use indexmap::IndexMap;

use crate::{Delta, Key, Row};

/// A change classified out of a drained [`ChangeAccumulator`].
#[derive(Clone, Debug, PartialEq)]
pub enum OutputChange {
	Enter {
		key: Key,
		value: Row,
		order_index: Option<String>,
	},
	Exit {
		key: Key,
		previous: Row,
	},
	Update {
		key: Key,
		value: Row,
		previous: Row,
		order_index: Option<String>,
	},
}

impl OutputChange {
	pub fn key(&self) -> &Key {
		match self {
			OutputChange::Enter { key, .. } => key,
			OutputChange::Exit { key, .. } => key,
			OutputChange::Update { key, .. } => key,
		}
	}
}

#[derive(Debug, Default)]
struct Slot {
	inserts: i64,
	deletes: i64,
	insert_value: Option<Row>,
	delete_value: Option<Row>,
	order_index: Option<String>,
}

/// The keyed change multiset: accumulates signed deltas per key and drains
/// them as classified enter/exit/update changes.
///
/// For each key the last inserted row wins as the new value, the first
/// deleted row is kept as the previous value, and a key whose inserts and
/// deletes cancel to nothing is dropped on drain. Drain order is the order
/// in which keys were first touched.
#[derive(Debug, Default)]
pub struct ChangeAccumulator {
	slots: IndexMap<Key, Slot>,
}

impl ChangeAccumulator {
	pub fn new() -> Self {
		ChangeAccumulator {
			slots: IndexMap::new(),
		}
	}

	pub fn accumulate(&mut self, delta: Delta) {
		let slot = self.slots.entry(delta.key).or_default();
		if delta.weight > 0 {
			slot.inserts += delta.weight;
			slot.insert_value = Some(delta.row);
			if delta.order_index.is_some() {
				slot.order_index = delta.order_index;
			}
		} else if delta.weight < 0 {
			slot.deletes -= delta.weight;
			if slot.delete_value.is_none() {
				slot.delete_value = Some(delta.row);
			}
		}
	}

	pub fn accumulate_all(&mut self, deltas: impl IntoIterator<Item = Delta>) {
		for delta in deltas {
			self.accumulate(delta);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Drain all slots, classifying each key:
	///
	/// - inserts only → `Enter`
	/// - deletes only → `Exit`
	/// - both → `Update`
	/// - neither → dropped
	pub fn drain(&mut self) -> Vec<OutputChange> {
		let slots = std::mem::take(&mut self.slots);
		let mut out = Vec::with_capacity(slots.len());
		for (key, slot) in slots {
			match (slot.inserts > 0, slot.deletes > 0) {
				(true, false) => {
					if let Some(value) = slot.insert_value {
						out.push(OutputChange::Enter {
							key,
							value,
							order_index: slot.order_index,
						});
					}
				}
				(false, true) => {
					if let Some(previous) = slot.delete_value {
						out.push(OutputChange::Exit {
							key,
							previous,
						});
					}
				}
				(true, true) => {
					if let (Some(value), Some(previous)) = (slot.insert_value, slot.delete_value) {
						out.push(OutputChange::Update {
							key,
							value,
							previous,
							order_index: slot.order_index,
						});
					}
				}
				(false, false) => {}
			}
		}
		out
	}
}

#[cfg(test)]
mod tests {
	use super::{ChangeAccumulator, OutputChange};
	use crate::{Delta, Key, Row, Value};

	fn row(name: &str) -> Row {
		Row::from_pairs([("name", Value::text(name))])
	}

	#[test]
	fn test_insert_classifies_as_enter() {
		let mut acc = ChangeAccumulator::new();
		acc.accumulate(Delta::insert(Key::Int(1), row("a")));
		let changes = acc.drain();
		assert_eq!(changes, vec![OutputChange::Enter {
			key: Key::Int(1),
			value: row("a"),
			order_index: None,
		}]);
		assert!(acc.is_empty());
	}

	#[test]
	fn test_delete_then_insert_classifies_as_update() {
		let mut acc = ChangeAccumulator::new();
		acc.accumulate(Delta::delete(Key::Int(1), row("old")));
		acc.accumulate(Delta::insert(Key::Int(1), row("new")));
		let changes = acc.drain();
		assert_eq!(changes, vec![OutputChange::Update {
			key: Key::Int(1),
			value: row("new"),
			previous: row("old"),
			order_index: None,
		}]);
	}

	#[test]
	fn test_last_insert_and_first_delete_win() {
		let mut acc = ChangeAccumulator::new();
		acc.accumulate(Delta::delete(Key::Int(1), row("v1")));
		acc.accumulate(Delta::insert(Key::Int(1), row("v2")));
		acc.accumulate(Delta::delete(Key::Int(1), row("v2")));
		acc.accumulate(Delta::insert(Key::Int(1), row("v3")));
		let changes = acc.drain();
		assert_eq!(changes, vec![OutputChange::Update {
			key: Key::Int(1),
			value: row("v3"),
			previous: row("v1"),
			order_index: None,
		}]);
	}

	#[test]
	fn test_zero_weight_is_dropped() {
		let mut acc = ChangeAccumulator::new();
		acc.accumulate(Delta::new(Key::Int(1), row("a"), 0));
		assert!(acc.drain().is_empty());
	}

	#[test]
	fn test_drain_preserves_first_touch_order() {
		let mut acc = ChangeAccumulator::new();
		acc.accumulate(Delta::insert(Key::Int(2), row("b")));
		acc.accumulate(Delta::insert(Key::Int(1), row("a")));
		acc.accumulate(Delta::insert(Key::Int(2), row("b2")));
		let keys: Vec<_> = acc.drain().iter().map(|c| c.key().clone()).collect();
		assert_eq!(keys, vec![Key::Int(2), Key::Int(1)]);
	}
}
