// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::cmp::Ordering;

use rill_core::{Row, Value};

use crate::expression::{CompareOp, Expression};

/// Evaluate a scalar expression against a row.
///
/// Field paths resolve against the row as given; the compiler decides
/// whether rows are namespaced by alias. Aggregates evaluate to
/// `Undefined` here; they only carry meaning inside the aggregate
/// operator.
pub fn evaluate(expr: &Expression, row: &Row) -> Value {
	match expr {
		Expression::Value(v) => v.clone(),
		Expression::Field(path) => row.lookup_path(path.segments()).cloned().unwrap_or(Value::Undefined),
		Expression::And(items) => {
			for item in items {
				if !is_truthy(&evaluate(item, row)) {
					return Value::Boolean(false);
				}
			}
			Value::Boolean(true)
		}
		Expression::Or(items) => {
			for item in items {
				if is_truthy(&evaluate(item, row)) {
					return Value::Boolean(true);
				}
			}
			Value::Boolean(false)
		}
		Expression::Not(inner) => Value::Boolean(!is_truthy(&evaluate(inner, row))),
		Expression::Compare { op, left, right } => {
			let left = evaluate(left, row);
			let right = evaluate(right, row);
			Value::Boolean(compare(*op, &left, &right))
		}
		Expression::In { expr, list } => {
			let value = evaluate(expr, row);
			Value::Boolean(list.contains(&value))
		}
		Expression::Func { name, args } => {
			let args: Vec<Value> = args.iter().map(|arg| evaluate(arg, row)).collect();
			apply_func(name, &args)
		}
		Expression::Aggregate { .. } => Value::Undefined,
	}
}

/// Evaluate a predicate expression to a boolean.
pub fn matches(expr: &Expression, row: &Row) -> bool {
	is_truthy(&evaluate(expr, row))
}

/// Predicate truthiness: booleans are themselves, `Undefined`, zero and
/// the empty string are false, everything else is true.
pub fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Boolean(b) => *b,
		Value::Undefined => false,
		Value::Int(i) => *i != 0,
		Value::Float(f) => *f != 0.0,
		Value::Text(t) => !t.is_empty(),
		Value::Timestamp(_) | Value::List(_) | Value::Record(_) => true,
	}
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
	match op {
		CompareOp::Eq => left == right,
		CompareOp::Neq => left != right,
		// Ordering comparisons against an undefined operand are false.
		_ if left.is_undefined() || right.is_undefined() => false,
		CompareOp::Gt => left.cmp(right) == Ordering::Greater,
		CompareOp::Gte => left.cmp(right) != Ordering::Less,
		CompareOp::Lt => left.cmp(right) == Ordering::Less,
		CompareOp::Lte => left.cmp(right) != Ordering::Greater,
	}
}

fn apply_func(name: &str, args: &[Value]) -> Value {
	match name {
		"add" => match (args.first(), args.get(1)) {
			(Some(Value::Int(l)), Some(Value::Int(r))) => Value::Int(l + r),
			(Some(l), Some(r)) => match (l.as_float(), r.as_float()) {
				(Some(l), Some(r)) => Value::Float(l + r),
				_ => Value::Undefined,
			},
			_ => Value::Undefined,
		},
		"concat" => {
			let mut out = String::new();
			for arg in args {
				match arg {
					Value::Undefined => {}
					Value::Text(t) => out.push_str(t),
					other => out.push_str(&other.to_string()),
				}
			}
			Value::Text(out)
		}
		"lower" => match args.first() {
			Some(Value::Text(t)) => Value::Text(t.to_lowercase()),
			_ => Value::Undefined,
		},
		"upper" => match args.first() {
			Some(Value::Text(t)) => Value::Text(t.to_uppercase()),
			_ => Value::Undefined,
		},
		"length" => match args.first() {
			Some(Value::Text(t)) => Value::Int(t.chars().count() as i64),
			Some(Value::List(items)) => Value::Int(items.len() as i64),
			_ => Value::Undefined,
		},
		"coalesce" => args.iter().find(|v| !v.is_undefined()).cloned().unwrap_or(Value::Undefined),
		_ => Value::Undefined,
	}
}

#[cfg(test)]
mod tests {
	use rill_core::{Row, Value};

	use super::{evaluate, matches};
	use crate::dsl::*;

	fn user(age: i64, active: bool) -> Row {
		Row::from_pairs([
			("age", Value::Int(age)),
			("active", Value::Boolean(active)),
			("name", Value::text("Alice")),
		])
	}

	#[test]
	fn test_compare_and_logic() {
		let row = user(25, true);
		assert!(matches(&and([eq(field(["active"]), true), gt(field(["age"]), 18)]), &row));
		assert!(!matches(&and([eq(field(["active"]), true), gt(field(["age"]), 30)]), &row));
		assert!(matches(&or([eq(field(["age"]), 1), eq(field(["age"]), 25)]), &row));
	}

	#[test]
	fn test_undefined_comparisons() {
		let row = user(25, true);
		assert!(!matches(&gt(field(["missing"]), 1), &row));
		assert!(matches(&is_null(field(["missing"])), &row));
		assert!(matches(&is_not_null(field(["age"])), &row));
	}

	#[test]
	fn test_in_list() {
		let row = user(25, true);
		assert!(matches(&in_list(field(["age"]), [20i64, 25]), &row));
		assert!(!matches(&in_list(field(["age"]), [20i64, 30]), &row));
	}

	#[test]
	fn test_funcs() {
		let row = user(25, true);
		assert_eq!(evaluate(&add(field(["age"]), 1), &row), Value::Int(26));
		assert_eq!(evaluate(&lower(field(["name"])), &row), Value::text("alice"));
		assert_eq!(
			evaluate(&concat([field(["name"]), val("!")]), &row),
			Value::text("Alice!")
		);
		assert_eq!(evaluate(&coalesce([field(["missing"]), field(["age"])]), &row), Value::Int(25));
	}
}
