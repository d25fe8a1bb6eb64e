// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Differential operators. Each consumes keyed deltas on one or more input
//! ports and produces output deltas; all state updates are deterministic
//! in input order, so identical delta sequences replay identically.

pub use aggregate::AggregateOperator;
pub use join::JoinOperator;
pub use order::{OrderByOperator, TopKOperator};

mod aggregate;
mod join;
mod order;

use indexmap::IndexMap;

use rill_core::{Delta, Key, Row};
use rill_query::{Expression, matches};

pub type MapFn = Box<dyn FnMut(&Key, &Row) -> Row + Send>;
pub type ReKeyFn = Box<dyn FnMut(&Key, &Row) -> crate::Result<Key> + Send>;
pub type SinkFn = Box<dyn FnMut(Vec<Delta>) + Send>;

pub enum OperatorKind {
	/// An external stream; deltas are buffered here by the input handle.
	Input,
	/// Forward deltas whose row satisfies the predicate.
	Filter { predicate: Expression },
	/// Transform the row, keeping key and multiplicity.
	Map { f: MapFn },
	/// Re-key the stream by a function of the row; multiplicity kept.
	ReKey { f: ReKeyFn },
	Join(JoinOperator),
	/// Collapse each (key, row) pair to output multiplicity one.
	Distinct { state: IndexMap<Key, Vec<(Row, i64)>> },
	/// Fold equal (key, row) deltas within the batch, dropping zeros.
	Consolidate,
	Aggregate(AggregateOperator),
	OrderBy(OrderByOperator),
	TopK(TopKOperator),
	/// Terminal operator: hands each non-empty batch to the sink.
	Output { sink: SinkFn },
}

impl OperatorKind {
	pub fn filter(predicate: Expression) -> Self {
		OperatorKind::Filter {
			predicate,
		}
	}

	pub fn map(f: impl FnMut(&Key, &Row) -> Row + Send + 'static) -> Self {
		OperatorKind::Map {
			f: Box::new(f),
		}
	}

	pub fn re_key(f: impl FnMut(&Key, &Row) -> crate::Result<Key> + Send + 'static) -> Self {
		OperatorKind::ReKey {
			f: Box::new(f),
		}
	}

	pub fn distinct() -> Self {
		OperatorKind::Distinct {
			state: IndexMap::new(),
		}
	}

	pub fn output(sink: impl FnMut(Vec<Delta>) + Send + 'static) -> Self {
		OperatorKind::Output {
			sink: Box::new(sink),
		}
	}

	pub(crate) fn apply(&mut self, port: usize, deltas: Vec<Delta>) -> crate::Result<Vec<Delta>> {
		match self {
			OperatorKind::Input => Ok(deltas),
			OperatorKind::Filter { predicate } => Ok(deltas
				.into_iter()
				.filter(|delta| matches(predicate, &delta.row))
				.collect()),
			OperatorKind::Map { f } => Ok(deltas
				.into_iter()
				.map(|delta| {
					let row = f(&delta.key, &delta.row);
					Delta {
						key: delta.key,
						row,
						weight: delta.weight,
						order_index: delta.order_index,
					}
				})
				.collect()),
			OperatorKind::ReKey { f } => {
				let mut out = Vec::with_capacity(deltas.len());
				for delta in deltas {
					let key = f(&delta.key, &delta.row)?;
					out.push(Delta {
						key,
						row: delta.row,
						weight: delta.weight,
						order_index: delta.order_index,
					});
				}
				Ok(out)
			}
			OperatorKind::Join(join) => join.apply(port, deltas),
			OperatorKind::Distinct { state } => Ok(apply_distinct(state, deltas)),
			OperatorKind::Consolidate => Ok(consolidate(deltas)),
			OperatorKind::Aggregate(aggregate) => aggregate.apply(deltas),
			OperatorKind::OrderBy(order_by) => order_by.apply(deltas),
			OperatorKind::TopK(top_k) => top_k.apply(deltas),
			OperatorKind::Output { sink } => {
				sink(deltas);
				Ok(Vec::new())
			}
		}
	}
}

fn apply_distinct(state: &mut IndexMap<Key, Vec<(Row, i64)>>, deltas: Vec<Delta>) -> Vec<Delta> {
	let mut out = Vec::new();
	for delta in deltas {
		let entries = state.entry(delta.key.clone()).or_default();
		match entries.iter_mut().position(|(row, _)| *row == delta.row) {
			Some(index) => {
				let before = entries[index].1;
				entries[index].1 += delta.weight;
				let after = entries[index].1;
				if before > 0 && after <= 0 {
					out.push(Delta::delete(delta.key.clone(), delta.row.clone()));
				} else if before <= 0 && after > 0 {
					out.push(Delta::insert(delta.key.clone(), delta.row.clone()));
				}
				if after == 0 {
					entries.remove(index);
				}
			}
			None => {
				if delta.weight > 0 {
					out.push(Delta::insert(delta.key.clone(), delta.row.clone()));
				}
				if delta.weight != 0 {
					entries.push((delta.row, delta.weight));
				}
			}
		}
		if state.get(&delta.key).is_some_and(Vec::is_empty) {
			state.shift_remove(&delta.key);
		}
	}
	out
}

/// Fold equal (key, row) entries of one batch, dropping zero weights.
pub fn consolidate(deltas: Vec<Delta>) -> Vec<Delta> {
	let mut folded: Vec<Delta> = Vec::with_capacity(deltas.len());
	for delta in deltas {
		match folded.iter_mut().find(|d| d.key == delta.key && d.row == delta.row) {
			Some(existing) => {
				existing.weight += delta.weight;
				if delta.order_index.is_some() {
					existing.order_index = delta.order_index;
				}
			}
			None => folded.push(delta),
		}
	}
	folded.retain(|delta| delta.weight != 0);
	folded
}

#[cfg(test)]
mod tests {
	use rill_core::{Delta, Key, Row, Value};

	use super::{OperatorKind, consolidate};

	fn row(v: i64) -> Row {
		Row::from_pairs([("v", Value::Int(v))])
	}

	#[test]
	fn test_consolidate_folds_and_drops_zeros() {
		let out = consolidate(vec![
			Delta::insert(Key::Int(1), row(1)),
			Delta::delete(Key::Int(1), row(1)),
			Delta::insert(Key::Int(2), row(2)),
			Delta::insert(Key::Int(2), row(2)),
		]);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, Key::Int(2));
		assert_eq!(out[0].weight, 2);
	}

	#[test]
	fn test_distinct_emits_transitions_only() {
		let mut distinct = OperatorKind::distinct();
		let first = distinct.apply(0, vec![
			Delta::insert(Key::Int(1), row(1)),
			Delta::insert(Key::Int(1), row(1)),
		])
		.unwrap();
		assert_eq!(first.len(), 1, "double insert surfaces once");

		let second = distinct.apply(0, vec![Delta::delete(Key::Int(1), row(1))]).unwrap();
		assert!(second.is_empty(), "still one copy left");

		let third = distinct.apply(0, vec![Delta::delete(Key::Int(1), row(1))]).unwrap();
		assert_eq!(third.len(), 1);
		assert_eq!(third[0].weight, -1);
	}

	#[test]
	fn test_re_key() {
		let mut re_key = OperatorKind::re_key(|_, row| {
			Ok(Key::try_from(row.get("v").cloned().unwrap_or(Value::Undefined))
				.map_err(rill_core::Error::from)?)
		});
		let out = re_key.apply(0, vec![Delta::insert(Key::Int(9), row(42))]).unwrap();
		assert_eq!(out[0].key, Key::Int(42));
	}
}
