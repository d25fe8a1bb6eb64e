// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use indexmap::IndexMap;

use rill_core::{Delta, Key, Row, Value};
use rill_query::{AggregateFunc, Expression, evaluate};

/// Differential group-by aggregation.
///
/// Rows group by the values of the group-by expressions; each group emits
/// one output row shaped `{__group: {…}, __agg: {…}}`, keyed by the
/// composite of its group values. The compiler rewrites having and select
/// expressions to reference these fields. Count and sum are folded
/// incrementally; min/max/first/last recompute from the group's
/// consolidated rows so retractions are exact.
pub struct AggregateOperator {
	group_by: Vec<Expression>,
	aggregates: Vec<(AggregateFunc, Option<Expression>)>,
	groups: IndexMap<Key, GroupState>,
}

#[derive(Default)]
struct GroupState {
	group_values: Vec<Value>,
	rows: Vec<(Row, i64)>,
	total: i64,
}

impl AggregateOperator {
	pub fn new(group_by: Vec<Expression>, aggregates: Vec<(AggregateFunc, Option<Expression>)>) -> Self {
		AggregateOperator {
			group_by,
			aggregates,
			groups: IndexMap::new(),
		}
	}

	pub(crate) fn apply(&mut self, deltas: Vec<Delta>) -> crate::Result<Vec<Delta>> {
		// Snapshot the pre-batch output of every touched group, then
		// replace it wholesale after the batch has been absorbed.
		let mut previous: IndexMap<Key, Option<Row>> = IndexMap::new();

		for delta in deltas {
			let group_values: Vec<Value> =
				self.group_by.iter().map(|expr| evaluate(expr, &delta.row)).collect();
			let group_key = Key::Composite(
				group_values
					.iter()
					.cloned()
					.map(Key::try_from)
					.collect::<Result<Vec<_>, _>>()
					.map_err(rill_core::Error::from)?,
			);

			if !previous.contains_key(&group_key) {
				previous.insert(group_key.clone(), self.output_row(&group_key));
			}

			let state = self.groups.entry(group_key).or_default();
			state.group_values = group_values;
			state.total += delta.weight;
			match state.rows.iter_mut().position(|(row, _)| *row == delta.row) {
				Some(index) => {
					state.rows[index].1 += delta.weight;
					if state.rows[index].1 == 0 {
						state.rows.remove(index);
					}
				}
				None => {
					if delta.weight != 0 {
						state.rows.push((delta.row, delta.weight));
					}
				}
			}
		}

		let mut out = Vec::new();
		for (group_key, old) in previous {
			let new = self.output_row(&group_key);
			if old == new {
				continue;
			}
			if let Some(old) = old {
				out.push(Delta::delete(group_key.clone(), old));
			}
			if let Some(new) = new {
				out.push(Delta::insert(group_key.clone(), new));
			}
			if self.groups.get(&group_key).is_some_and(|state| state.total <= 0 && state.rows.is_empty())
			{
				self.groups.shift_remove(&group_key);
			}
		}
		Ok(out)
	}

	fn output_row(&self, group_key: &Key) -> Option<Row> {
		let state = self.groups.get(group_key)?;
		if state.total <= 0 {
			return None;
		}

		let group: Row = state
			.group_values
			.iter()
			.enumerate()
			.map(|(i, value)| (i.to_string(), value.clone()))
			.collect();
		let agg: Row = self
			.aggregates
			.iter()
			.enumerate()
			.map(|(i, (func, arg))| (i.to_string(), compute(*func, arg.as_ref(), &state.rows)))
			.collect();

		Some(Row::from_pairs([
			("__group", Value::Record(group)),
			("__agg", Value::Record(agg)),
		]))
	}
}

fn compute(func: AggregateFunc, arg: Option<&Expression>, rows: &[(Row, i64)]) -> Value {
	let mut total = 0i64;
	let mut values: Vec<Value> = Vec::new();
	for (row, weight) in rows {
		if *weight <= 0 {
			continue;
		}
		total += weight;
		if let Some(expr) = arg {
			let value = evaluate(expr, row);
			for _ in 0..*weight {
				values.push(value.clone());
			}
		}
	}

	match func {
		AggregateFunc::Count => match arg {
			None => Value::Int(total),
			Some(_) => Value::Int(values.iter().filter(|v| !v.is_undefined()).count() as i64),
		},
		AggregateFunc::Sum => sum_values(&values),
		AggregateFunc::Avg => {
			let count = values.iter().filter(|v| !v.is_undefined()).count();
			match (sum_values(&values).as_float(), count) {
				(_, 0) => Value::Undefined,
				(Some(sum), count) => Value::Float(sum / count as f64),
				(None, _) => Value::Undefined,
			}
		}
		AggregateFunc::Min => {
			values.iter().filter(|v| !v.is_undefined()).min().cloned().unwrap_or(Value::Undefined)
		}
		AggregateFunc::Max => {
			values.iter().filter(|v| !v.is_undefined()).max().cloned().unwrap_or(Value::Undefined)
		}
		AggregateFunc::First => values.first().cloned().unwrap_or(Value::Undefined),
		AggregateFunc::Last => values.last().cloned().unwrap_or(Value::Undefined),
	}
}

fn sum_values(values: &[Value]) -> Value {
	let mut int_sum = 0i64;
	let mut float_sum = 0f64;
	let mut saw_float = false;
	let mut saw_any = false;
	for value in values {
		match value {
			Value::Int(i) => {
				saw_any = true;
				int_sum += i;
				float_sum += *i as f64;
			}
			Value::Float(f) => {
				saw_any = true;
				saw_float = true;
				float_sum += f;
			}
			_ => {}
		}
	}
	if !saw_any {
		Value::Undefined
	} else if saw_float {
		Value::Float(float_sum)
	} else {
		Value::Int(int_sum)
	}
}

#[cfg(test)]
mod tests {
	use rill_core::{Delta, Key, Row, Value};
	use rill_query::{AggregateFunc, dsl::*};

	use super::AggregateOperator;

	fn sale(dept: &str, amount: i64) -> Row {
		Row::from_pairs([("dept", Value::text(dept)), ("amount", Value::Int(amount))])
	}

	fn operator() -> AggregateOperator {
		AggregateOperator::new(
			vec![field(["dept"])],
			vec![
				(AggregateFunc::Count, None),
				(AggregateFunc::Sum, Some(field(["amount"]))),
				(AggregateFunc::Min, Some(field(["amount"]))),
			],
		)
	}

	fn agg_value(row: &Row, index: &str) -> Value {
		row.lookup_path(&["__agg", index]).cloned().unwrap()
	}

	#[test]
	fn test_groups_accumulate() {
		let mut op = operator();
		let out = op
			.apply(vec![
				Delta::insert(Key::Int(1), sale("eng", 10)),
				Delta::insert(Key::Int(2), sale("eng", 20)),
				Delta::insert(Key::Int(3), sale("ops", 5)),
			])
			.unwrap();

		// eng enters with both rows folded, ops with one.
		assert_eq!(out.len(), 2);
		let eng = &out[0];
		assert_eq!(eng.key, Key::Composite(vec![Key::text("eng")]));
		assert_eq!(agg_value(&eng.row, "0"), Value::Int(2));
		assert_eq!(agg_value(&eng.row, "1"), Value::Int(30));
		assert_eq!(agg_value(&eng.row, "2"), Value::Int(10));
	}

	#[test]
	fn test_retraction_updates_group() {
		let mut op = operator();
		op.apply(vec![
			Delta::insert(Key::Int(1), sale("eng", 10)),
			Delta::insert(Key::Int(2), sale("eng", 20)),
		])
		.unwrap();

		let out = op.apply(vec![Delta::delete(Key::Int(1), sale("eng", 10))]).unwrap();
		assert_eq!(out.len(), 2, "old group row retracts, new one enters");
		assert_eq!(out[0].weight, -1);
		assert_eq!(agg_value(&out[1].row, "1"), Value::Int(20));
		assert_eq!(agg_value(&out[1].row, "2"), Value::Int(20), "min recomputes after retraction");
	}

	#[test]
	fn test_group_disappears_when_empty() {
		let mut op = operator();
		op.apply(vec![Delta::insert(Key::Int(1), sale("eng", 10))]).unwrap();
		let out = op.apply(vec![Delta::delete(Key::Int(1), sale("eng", 10))]).unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].weight, -1);
	}
}
