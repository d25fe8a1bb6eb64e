// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::cmp::Ordering;

use indexmap::IndexMap;

use rill_core::{Delta, Key, Row, Value, frac_between};
use rill_query::{OrderByClause, compare_values, evaluate};

use crate::graph::WindowShortfall;

#[derive(Clone, Debug)]
struct Entry {
	sort_key: Vec<Value>,
	key: Key,
	row: Row,
	weight: i64,
	index: String,
}

fn sort_cmp(order_by: &[OrderByClause], a: (&[Value], &Key), b: (&[Value], &Key)) -> Ordering {
	for (clause, (av, bv)) in order_by.iter().zip(a.0.iter().zip(b.0)) {
		let ord = compare_values(av, bv, &clause.options);
		if ord != Ordering::Equal {
			return ord;
		}
	}
	// Row key as the final tie-break keeps the total order deterministic.
	a.1.cmp(b.1)
}

fn sort_key(order_by: &[OrderByClause], row: &Row) -> Vec<Value> {
	order_by.iter().map(|clause| evaluate(&clause.expression, row)).collect()
}

/// Unbounded incremental order-by.
///
/// Maintains the full sorted multiset and attaches a fractional index to
/// every output delta; the lexicographic order of indices matches the
/// query's total order. A row re-entering at an unchanged rank within one
/// batch keeps the index it had.
pub struct OrderByOperator {
	order_by: Vec<OrderByClause>,
	entries: Vec<Entry>,
}

impl OrderByOperator {
	pub fn new(order_by: Vec<OrderByClause>) -> Self {
		OrderByOperator {
			order_by,
			entries: Vec::new(),
		}
	}

	pub(crate) fn apply(&mut self, deltas: Vec<Delta>) -> crate::Result<Vec<Delta>> {
		let mut out = Vec::with_capacity(deltas.len());
		// Indices released in this batch, kept around so an update that
		// does not change rank can reuse its old index.
		let mut released: Vec<Entry> = Vec::new();

		for delta in deltas {
			let sort_key = sort_key(&self.order_by, &delta.row);
			if delta.weight == 0 {
				continue;
			}
			if delta.weight < 0 {
				let position = self.entries.iter().position(|entry| {
					entry.key == delta.key && entry.row == delta.row
				});
				let Some(position) = position else {
					continue;
				};
				self.entries[position].weight += delta.weight;
				let index = self.entries[position].index.clone();
				if self.entries[position].weight <= 0 {
					released.push(self.entries.remove(position));
				}
				out.push(Delta {
					key: delta.key,
					row: delta.row,
					weight: delta.weight,
					order_index: Some(index),
				});
				continue;
			}

			// Positive delta: merge into an existing entry if one holds
			// the same row.
			if let Some(entry) = self
				.entries
				.iter_mut()
				.find(|entry| entry.key == delta.key && entry.row == delta.row)
			{
				entry.weight += delta.weight;
				out.push(Delta {
					key: delta.key,
					row: delta.row,
					weight: delta.weight,
					order_index: Some(entry.index.clone()),
				});
				continue;
			}

			let position = self.entries.partition_point(|entry| {
				sort_cmp(&self.order_by, (&entry.sort_key, &entry.key), (&sort_key, &delta.key))
					== Ordering::Less
			});

			// Same key re-entering at the same rank reuses its index.
			let reused = released
				.iter()
				.position(|entry| entry.key == delta.key && entry.sort_key == sort_key)
				.map(|i| released.remove(i).index);
			let index = match reused {
				Some(index) => index,
				None => {
					let lo = position.checked_sub(1).map(|i| self.entries[i].index.clone());
					let hi = self.entries.get(position).map(|entry| entry.index.clone());
					frac_between(lo.as_deref(), hi.as_deref())
				}
			};

			self.entries.insert(position, Entry {
				sort_key,
				key: delta.key.clone(),
				row: delta.row.clone(),
				weight: delta.weight,
				index: index.clone(),
			});
			out.push(Delta {
				key: delta.key,
				row: delta.row,
				weight: delta.weight,
				order_index: Some(index),
			});
		}
		Ok(out)
	}
}

/// Limit-aware order-by: maintains the sorted multiset of everything the
/// source has provided and emits membership changes of the
/// `[offset, offset + limit)` window, with fractional indices scoped to
/// the window. After each batch it records whether the window is
/// under-filled so the load-more protocol can ask the source for another
/// page.
pub struct TopKOperator {
	order_by: Vec<OrderByClause>,
	limit: usize,
	offset: usize,
	entries: Vec<Entry>,
	window: IndexMap<Key, (Row, String)>,
	shortfall: Option<WindowShortfall>,
}

impl TopKOperator {
	pub fn new(order_by: Vec<OrderByClause>, limit: usize, offset: usize) -> Self {
		TopKOperator {
			order_by,
			limit,
			offset,
			entries: Vec::new(),
			window: IndexMap::new(),
			shortfall: None,
		}
	}

	pub fn shortfall(&self) -> Option<WindowShortfall> {
		self.shortfall.clone()
	}

	pub(crate) fn apply(&mut self, deltas: Vec<Delta>) -> crate::Result<Vec<Delta>> {
		for delta in deltas {
			if delta.weight == 0 {
				continue;
			}
			let sort_key = sort_key(&self.order_by, &delta.row);
			match self
				.entries
				.iter()
				.position(|entry| entry.key == delta.key && entry.row == delta.row)
			{
				Some(position) => {
					self.entries[position].weight += delta.weight;
					if self.entries[position].weight <= 0 {
						self.entries.remove(position);
					}
				}
				None => {
					if delta.weight > 0 {
						let position = self.entries.partition_point(|entry| {
							sort_cmp(
								&self.order_by,
								(&entry.sort_key, &entry.key),
								(&sort_key, &delta.key),
							) == Ordering::Less
						});
						self.entries.insert(position, Entry {
							sort_key,
							key: delta.key.clone(),
							row: delta.row.clone(),
							weight: delta.weight,
							index: String::new(),
						});
					}
				}
			}
		}
		Ok(self.emit_window_diff())
	}

	fn emit_window_diff(&mut self) -> Vec<Delta> {
		let desired: Vec<(Key, Row)> = self
			.entries
			.iter()
			.filter(|entry| entry.weight > 0)
			.skip(self.offset)
			.take(self.limit)
			.map(|entry| (entry.key.clone(), entry.row.clone()))
			.collect();

		let mut out = Vec::new();

		// Rows that fell out of the window.
		for (key, (row, index)) in &self.window {
			if !desired.iter().any(|(k, _)| k == key) {
				out.push(Delta {
					key: key.clone(),
					row: row.clone(),
					weight: -1,
					order_index: Some(index.clone()),
				});
			}
		}

		// Walk the new window in order, keeping valid indices and
		// assigning fresh ones where the order would otherwise break.
		let mut next_window: IndexMap<Key, (Row, String)> = IndexMap::with_capacity(desired.len());
		let mut prev: Option<String> = None;
		for (position, (key, row)) in desired.iter().enumerate() {
			let existing = self.window.get(key);
			let keep = existing
				.map(|(_, index)| prev.as_deref().is_none_or(|prev| prev < index.as_str()))
				.unwrap_or(false);
			let index = if keep {
				existing.map(|(_, index)| index.clone()).expect("existing checked")
			} else {
				// Upper bound: the next window member whose current
				// index is still usable.
				let hi = desired[position + 1..].iter().find_map(|(k, _)| {
					self.window.get(k).and_then(|(_, index)| {
						if prev.as_deref().is_none_or(|prev| prev < index.as_str()) {
							Some(index.clone())
						} else {
							None
						}
					})
				});
				frac_between(prev.as_deref(), hi.as_deref())
			};

			match existing {
				None => {
					out.push(Delta {
						key: key.clone(),
						row: row.clone(),
						weight: 1,
						order_index: Some(index.clone()),
					});
				}
				Some((old_row, old_index)) => {
					if *old_row != *row || *old_index != index {
						out.push(Delta {
							key: key.clone(),
							row: old_row.clone(),
							weight: -1,
							order_index: Some(old_index.clone()),
						});
						out.push(Delta {
							key: key.clone(),
							row: row.clone(),
							weight: 1,
							order_index: Some(index.clone()),
						});
					}
				}
			}

			prev = Some(index.clone());
			next_window.insert(key.clone(), (row.clone(), index));
		}
		self.window = next_window;

		// Record whether the window wants more input than the source has
		// provided so far.
		let available = self.entries.iter().filter(|entry| entry.weight > 0).count();
		let want = self.offset + self.limit;
		self.shortfall = if self.window.len() < self.limit && available < want {
			Some(WindowShortfall {
				have: self.window.len(),
				want,
				last_sort_value: self
					.entries
					.iter()
					.filter(|entry| entry.weight > 0)
					.next_back()
					.and_then(|entry| entry.sort_key.first().cloned()),
			})
		} else {
			None
		};

		out
	}
}
