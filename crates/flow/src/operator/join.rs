// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use indexmap::IndexMap;

use rill_core::{Delta, Error, Key, Row, Value};
use rill_query::JoinKind;

/// One consolidated row in a join-side arrangement, in insertion order.
#[derive(Clone, Debug)]
struct ArrangedRow {
	source_key: Key,
	row: Row,
	weight: i64,
}

/// A differential binary join.
///
/// Both input ports carry streams re-keyed to `Composite[join_key,
/// source_key]`; the operator arranges each side by join key and keeps
/// rows in insertion order, which fixes the output order when several
/// rows share a join key. Output deltas are keyed by
/// `Composite[left_source_key, right_source_key]` with an undefined
/// component for null-extended rows, and their multiplicity is the
/// product of the input multiplicities.
pub struct JoinOperator {
	kind: JoinKind,
	left_aliases: Vec<String>,
	right_aliases: Vec<String>,
	left: IndexMap<Key, Vec<ArrangedRow>>,
	right: IndexMap<Key, Vec<ArrangedRow>>,
}

impl JoinOperator {
	pub fn new(kind: JoinKind, left_aliases: Vec<String>, right_aliases: Vec<String>) -> Self {
		JoinOperator {
			kind,
			left_aliases,
			right_aliases,
			left: IndexMap::new(),
			right: IndexMap::new(),
		}
	}

	/// Does this side null-extend its own unmatched rows?
	fn outer(&self, port: usize) -> bool {
		match self.kind {
			JoinKind::Inner | JoinKind::Cross => false,
			JoinKind::Left => port == 0,
			JoinKind::Right => port == 1,
			JoinKind::Full => true,
		}
	}

	pub(crate) fn apply(&mut self, port: usize, deltas: Vec<Delta>) -> crate::Result<Vec<Delta>> {
		let mut out = Vec::new();
		for delta in deltas {
			self.apply_one(port, delta, &mut out)?;
		}
		Ok(out)
	}

	fn apply_one(&mut self, port: usize, delta: Delta, out: &mut Vec<Delta>) -> crate::Result<()> {
		let (join_key, source_key) = split_key(&delta.key)?;
		let my_outer = self.outer(port);
		let other_outer = self.outer(1 - port);
		let null_row = |aliases: &[String]| -> Row {
			aliases.iter().map(|alias| (alias.clone(), Value::Undefined)).collect()
		};

		let (mine, other, my_nulls, other_nulls) = match port {
			0 => (&mut self.left, &self.right, null_row(&self.right_aliases), null_row(&self.left_aliases)),
			_ => (&mut self.right, &self.left, null_row(&self.left_aliases), null_row(&self.right_aliases)),
		};

		let my_total_before: i64 =
			mine.get(&join_key).map(|rows| rows.iter().map(|r| r.weight).sum()).unwrap_or(0);
		apply_to_arrangement(mine, &join_key, &source_key, &delta.row, delta.weight);
		let my_total_after = my_total_before + delta.weight;

		let other_rows = other.get(&join_key).map(Vec::as_slice).unwrap_or(&[]);
		let other_total: i64 = other_rows.iter().map(|r| r.weight).sum();

		// Matched products with the other side's current state.
		for other_row in other_rows {
			let (key, row) = match port {
				0 => (
					Key::composite([source_key.clone(), other_row.source_key.clone()]),
					merge_rows(&delta.row, &other_row.row),
				),
				_ => (
					Key::composite([other_row.source_key.clone(), source_key.clone()]),
					merge_rows(&other_row.row, &delta.row),
				),
			};
			out.push(Delta::new(key, row, delta.weight * other_row.weight));
		}

		// This row is unmatched: null-extend it when this side is outer.
		if my_outer && other_total <= 0 {
			let (key, row) = match port {
				0 => (
					Key::composite([source_key.clone(), Key::Undefined]),
					merge_rows(&delta.row, &my_nulls),
				),
				_ => (
					Key::composite([Key::Undefined, source_key.clone()]),
					merge_rows(&my_nulls, &delta.row),
				),
			};
			out.push(Delta::new(key, row, delta.weight));
		}

		// This delta may flip the other side's rows between matched and
		// unmatched.
		if other_outer {
			let was_present = my_total_before > 0;
			let is_present = my_total_after > 0;
			if was_present != is_present {
				// Becoming present retracts the other side's
				// null-extensions; disappearing restores them.
				let sign = if is_present {
					-1
				} else {
					1
				};
				for other_row in other_rows {
					let (key, row) = match port {
						0 => (
							Key::composite([Key::Undefined, other_row.source_key.clone()]),
							merge_rows(&other_nulls, &other_row.row),
						),
						_ => (
							Key::composite([other_row.source_key.clone(), Key::Undefined]),
							merge_rows(&other_row.row, &other_nulls),
						),
					};
					out.push(Delta::new(key, row, sign * other_row.weight));
				}
			}
		}
		Ok(())
	}
}

fn split_key(key: &Key) -> crate::Result<(Key, Key)> {
	match key {
		Key::Composite(parts) if parts.len() == 2 => Ok((parts[0].clone(), parts[1].clone())),
		other => Err(Error::Internal(format!("join expects [join_key, source_key] keys, got {other}"))),
	}
}

fn apply_to_arrangement(
	arrangement: &mut IndexMap<Key, Vec<ArrangedRow>>,
	join_key: &Key,
	source_key: &Key,
	row: &Row,
	weight: i64,
) {
	let rows = arrangement.entry(join_key.clone()).or_default();
	match rows.iter_mut().position(|r| r.source_key == *source_key && r.row == *row) {
		Some(index) => {
			rows[index].weight += weight;
			if rows[index].weight == 0 {
				rows.remove(index);
			}
		}
		None => {
			if weight != 0 {
				rows.push(ArrangedRow {
					source_key: source_key.clone(),
					row: row.clone(),
					weight,
				});
			}
		}
	}
	if rows.is_empty() {
		arrangement.shift_remove(join_key);
	}
}

fn merge_rows(left: &Row, right: &Row) -> Row {
	let mut merged = Row::with_capacity(left.len() + right.len());
	for (field, value) in left.iter() {
		merged.set(field.clone(), value.clone());
	}
	for (field, value) in right.iter() {
		merged.set(field.clone(), value.clone());
	}
	merged
}

#[cfg(test)]
mod tests {
	use rill_core::{Delta, Key, Row, Value};
	use rill_query::JoinKind;

	use super::JoinOperator;

	fn user(name: &str, dept: i64) -> Row {
		Row::from_pairs([(
			"u",
			Value::Record(Row::from_pairs([("name", Value::text(name)), ("dept", Value::Int(dept))])),
		)])
	}

	fn dept(name: &str) -> Row {
		Row::from_pairs([("d", Value::Record(Row::from_pairs([("name", Value::text(name))])))])
	}

	fn keyed(join_key: i64, source_key: i64) -> Key {
		Key::composite([Key::Int(join_key), Key::Int(source_key)])
	}

	fn join(kind: JoinKind) -> JoinOperator {
		JoinOperator::new(kind, vec!["u".to_string()], vec!["d".to_string()])
	}

	#[test]
	fn test_inner_join_matches() {
		let mut op = join(JoinKind::Inner);
		let none = op.apply(0, vec![Delta::insert(keyed(1, 10), user("alice", 1))]).unwrap();
		assert!(none.is_empty(), "no right side yet");

		let out = op.apply(1, vec![Delta::insert(keyed(1, 100), dept("eng"))]).unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, Key::composite([Key::Int(10), Key::Int(100)]));
		assert_eq!(out[0].weight, 1);
		assert!(out[0].row.get("u").is_some() && out[0].row.get("d").is_some());
	}

	#[test]
	fn test_left_join_null_extends_and_retracts() {
		let mut op = join(JoinKind::Left);
		let out = op.apply(0, vec![Delta::insert(keyed(1, 10), user("alice", 1))]).unwrap();
		assert_eq!(out.len(), 1, "unmatched left row appears null-extended");
		assert_eq!(out[0].key, Key::composite([Key::Int(10), Key::Undefined]));
		assert_eq!(out[0].row.get("d"), Some(&Value::Undefined));

		let out = op.apply(1, vec![Delta::insert(keyed(1, 100), dept("eng"))]).unwrap();
		// The match appears and the null-extension retracts.
		assert_eq!(out.len(), 2);
		assert_eq!(out[0].weight, 1);
		assert_eq!(out[1].key, Key::composite([Key::Int(10), Key::Undefined]));
		assert_eq!(out[1].weight, -1);
	}

	#[test]
	fn test_full_join_extends_both_sides() {
		let mut op = join(JoinKind::Full);
		let left = op.apply(0, vec![Delta::insert(keyed(1, 10), user("alice", 1))]).unwrap();
		assert_eq!(left.len(), 1);
		let right = op.apply(1, vec![Delta::insert(keyed(2, 100), dept("eng"))]).unwrap();
		assert_eq!(right.len(), 1);
		assert_eq!(right[0].key, Key::composite([Key::Undefined, Key::Int(100)]));
	}

	#[test]
	fn test_multiplicities_multiply() {
		let mut op = join(JoinKind::Inner);
		op.apply(0, vec![Delta::new(keyed(1, 10), user("alice", 1), 2)]).unwrap();
		let out = op.apply(1, vec![Delta::new(keyed(1, 100), dept("eng"), 3)]).unwrap();
		assert_eq!(out[0].weight, 6);
	}

	#[test]
	fn test_delete_retracts_matches() {
		let mut op = join(JoinKind::Inner);
		op.apply(0, vec![Delta::insert(keyed(1, 10), user("alice", 1))]).unwrap();
		op.apply(1, vec![Delta::insert(keyed(1, 100), dept("eng"))]).unwrap();
		let out = op.apply(0, vec![Delta::delete(keyed(1, 10), user("alice", 1))]).unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].weight, -1);
	}

	#[test]
	fn test_tie_break_is_left_insertion_order() {
		let mut op = join(JoinKind::Inner);
		op.apply(0, vec![
			Delta::insert(keyed(1, 11), user("a", 1)),
			Delta::insert(keyed(1, 12), user("b", 1)),
		])
		.unwrap();
		let out = op.apply(1, vec![Delta::insert(keyed(1, 100), dept("eng"))]).unwrap();
		let keys: Vec<_> = out.iter().map(|d| d.key.clone()).collect();
		assert_eq!(keys, vec![
			Key::composite([Key::Int(11), Key::Int(100)]),
			Key::composite([Key::Int(12), Key::Int(100)]),
		]);
	}
}
