// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::cmp::Ordering;

use rill_core::Value;

use crate::{
	expression::{CompareOp, Expression},
	ir::OrderByClause,
};

use super::{Atom, Predicate, as_atom};

/// True iff every row satisfying `p` also satisfies `q`.
///
/// An absent predicate is unconstrained: everything is a subset of an
/// absent `q`, and an absent `p` is only a subset of an absent `q`.
pub fn is_where_subset(p: Option<&Expression>, q: Option<&Expression>) -> bool {
	match (p, q) {
		(_, None) => true,
		(None, Some(_)) => false,
		(Some(p), Some(q)) => subset(p, q),
	}
}

/// True iff ordering by `q` also orders by `p`: `p` must be a prefix of
/// `q` with identical directions, nulls policy and string sort.
pub fn is_order_by_subset(p: &[OrderByClause], q: &[OrderByClause]) -> bool {
	p.len() <= q.len() && p.iter().zip(q).all(|(a, b)| a == b)
}

/// `None` is unbounded.
pub fn is_limit_subset(l1: Option<usize>, l2: Option<usize>) -> bool {
	match (l1, l2) {
		(_, None) => true,
		(None, Some(_)) => false,
		(Some(l1), Some(l2)) => l1 <= l2,
	}
}

/// Conjunction of the three component subset checks.
pub fn is_predicate_subset(p: &Predicate, q: &Predicate) -> bool {
	is_where_subset(p.where_clause.as_ref(), q.where_clause.as_ref())
		&& is_order_by_subset(&p.order_by, &q.order_by)
		&& is_limit_subset(p.limit, q.limit)
}

fn subset(p: &Expression, q: &Expression) -> bool {
	if p == q || q.is_literal_true() || p.is_literal_false() {
		return true;
	}

	// A disjunctive p must be covered operand by operand.
	if let Expression::Or(items) = p {
		return items.iter().all(|item| subset(item, q));
	}
	// A conjunctive q must be implied clause by clause.
	if let Expression::And(items) = q {
		return items.iter().all(|item| subset(p, item));
	}
	// A conjunctive p implies q if any single conjunct does.
	if let Expression::And(items) = p {
		if items.iter().any(|item| subset(item, q)) {
			return true;
		}
	}
	// A disjunctive q is implied if any single branch is.
	if let Expression::Or(items) = q {
		if items.iter().any(|item| subset(p, item)) {
			return true;
		}
	}

	match (as_atom(p), as_atom(q)) {
		(Some(pa), Some(qa)) if pa.path() == qa.path() => atom_subset(&pa, &qa),
		_ => false,
	}
}

/// An ordering comparison against an undefined operand never matches.
fn is_empty_atom(atom: &Atom<'_>) -> bool {
	match atom {
		Atom::Cmp { op, value, .. } => {
			!matches!(op, CompareOp::Eq | CompareOp::Neq) && value.is_undefined()
		}
		Atom::In { list, .. } => list.is_empty(),
	}
}

fn atom_subset(p: &Atom<'_>, q: &Atom<'_>) -> bool {
	if is_empty_atom(p) {
		return true;
	}
	if is_empty_atom(q) {
		return false;
	}

	match (p, q) {
		(Atom::In { list, .. }, q) => list.iter().all(|value| eq_subset(value, q)),
		(Atom::Cmp { op: CompareOp::Eq, value, .. }, q) => eq_subset(value, q),
		(Atom::Cmp { op: pop, value: pv, .. }, Atom::Cmp { op: qop, value: qv, .. }) => {
			range_subset(*pop, pv, *qop, qv)
		}
		(Atom::Cmp { .. }, Atom::In { .. }) => false,
	}
}

/// Is `x = v` a subset of `q`?
fn eq_subset(v: &Value, q: &Atom<'_>) -> bool {
	match q {
		Atom::In { list, .. } => list.contains(v),
		Atom::Cmp { op, value, .. } => match op {
			CompareOp::Eq => v == *value,
			CompareOp::Neq => v != *value,
			_ => {
				if v.is_undefined() || value.is_undefined() {
					return false;
				}
				match op {
					CompareOp::Gt => v.cmp(value) == Ordering::Greater,
					CompareOp::Gte => v.cmp(value) != Ordering::Less,
					CompareOp::Lt => v.cmp(value) == Ordering::Less,
					CompareOp::Lte => v.cmp(value) != Ordering::Greater,
					CompareOp::Eq | CompareOp::Neq => unreachable!(),
				}
			}
		},
	}
}

fn range_subset(pop: CompareOp, pv: &Value, qop: CompareOp, qv: &Value) -> bool {
	use CompareOp::*;
	match (pop, qop) {
		// x > b ⊆ x > a iff b ≥ a; x > b ⊆ x ≥ a iff b ≥ a
		(Gt, Gt) | (Gt, Gte) => pv.cmp(qv) != Ordering::Less,
		// x ≥ b ⊆ x > a iff b > a
		(Gte, Gt) => pv.cmp(qv) == Ordering::Greater,
		(Gte, Gte) => pv.cmp(qv) != Ordering::Less,
		// x < b ⊆ x < a iff b ≤ a; x < b ⊆ x ≤ a iff b ≤ a
		(Lt, Lt) | (Lt, Lte) => pv.cmp(qv) != Ordering::Greater,
		// x ≤ b ⊆ x < a iff b < a
		(Lte, Lt) => pv.cmp(qv) == Ordering::Less,
		(Lte, Lte) => pv.cmp(qv) != Ordering::Greater,
		// x ≠ v ⊆ x ≠ w iff v = w
		(Neq, Neq) => pv == qv,
		// A range excludes a point that lies outside it.
		(Gt, Neq) => qv.cmp(pv) != Ordering::Greater,
		(Gte, Neq) => qv.cmp(pv) == Ordering::Less,
		(Lt, Neq) => qv.cmp(pv) != Ordering::Less,
		(Lte, Neq) => qv.cmp(pv) == Ordering::Greater,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use rill_core::Timestamp;

	use super::{is_limit_subset, is_order_by_subset, is_where_subset};
	use crate::{
		dsl::*,
		ir::{CompareOptions, OrderByClause},
	};

	fn age() -> crate::expression::Expression {
		field(["age"])
	}

	#[test]
	fn test_eq_vs_ranges() {
		assert!(is_where_subset(Some(&eq(age(), 10i64)), Some(&gt(age(), 5i64))));
		assert!(!is_where_subset(Some(&eq(age(), 5i64)), Some(&gt(age(), 5i64))));
		assert!(is_where_subset(Some(&eq(age(), 5i64)), Some(&gte(age(), 5i64))));
		assert!(is_where_subset(Some(&eq(age(), 5i64)), Some(&in_list(age(), [5i64, 6]))));
		assert!(!is_where_subset(Some(&eq(age(), 7i64)), Some(&in_list(age(), [5i64, 6]))));
	}

	#[test]
	fn test_range_vs_range() {
		assert!(is_where_subset(Some(&gt(age(), 10i64)), Some(&gt(age(), 5i64))));
		assert!(!is_where_subset(Some(&gt(age(), 5i64)), Some(&gt(age(), 10i64))));
		assert!(is_where_subset(Some(&gte(age(), 6i64)), Some(&gt(age(), 5i64))));
		assert!(!is_where_subset(Some(&gte(age(), 5i64)), Some(&gt(age(), 5i64))));
		assert!(is_where_subset(Some(&lt(age(), 5i64)), Some(&lt(age(), 10i64))));
		assert!(!is_where_subset(Some(&lt(age(), 10i64)), Some(&lt(age(), 5i64))));
	}

	#[test]
	fn test_in_vs_in() {
		assert!(is_where_subset(Some(&in_list(age(), [5i64, 6])), Some(&in_list(age(), [5i64, 6, 7]))));
		assert!(!is_where_subset(Some(&in_list(age(), [5i64, 8])), Some(&in_list(age(), [5i64, 6, 7]))));
	}

	#[test]
	fn test_conjunction_and_disjunction() {
		let p = and([gt(age(), 10i64), eq(field(["active"]), true)]);
		assert!(is_where_subset(Some(&p), Some(&gt(age(), 5i64))));

		let p = or([eq(age(), 8i64), eq(age(), 9i64)]);
		assert!(is_where_subset(Some(&p), Some(&gt(age(), 5i64))));
		assert!(!is_where_subset(Some(&p), Some(&gt(age(), 8i64))));

		let q = or([gt(age(), 5i64), eq(field(["active"]), true)]);
		assert!(is_where_subset(Some(&eq(age(), 10i64)), Some(&q)));
	}

	#[test]
	fn test_unconstrained_rules() {
		assert!(is_where_subset(None, None));
		assert!(!is_where_subset(None, Some(&gt(age(), 5i64))));
		assert!(is_where_subset(Some(&gt(age(), 5i64)), None));
	}

	#[test]
	fn test_different_fields_are_not_related() {
		assert!(!is_where_subset(Some(&gt(age(), 10i64)), Some(&gt(field(["height"]), 5i64))));
	}

	#[test]
	fn test_dates_compare_by_instant() {
		let p = eq(field(["created"]), Timestamp::from_millis(1000));
		let q = gt(field(["created"]), Timestamp::from_millis(500));
		assert!(is_where_subset(Some(&p), Some(&q)));
	}

	#[test]
	fn test_order_by_prefix() {
		let by_age = OrderByClause {
			expression: age(),
			options: CompareOptions::default(),
		};
		let by_name = OrderByClause {
			expression: field(["name"]),
			options: CompareOptions::default(),
		};
		let by_age_desc = OrderByClause {
			expression: age(),
			options: CompareOptions::desc(),
		};
		assert!(is_order_by_subset(&[by_age.clone()], &[by_age.clone(), by_name.clone()]));
		assert!(!is_order_by_subset(&[by_name.clone()], &[by_age.clone(), by_name]));
		assert!(!is_order_by_subset(&[by_age_desc], &[by_age]));
	}

	#[test]
	fn test_subset_answers_are_sound_over_a_value_grid() {
		use rill_core::{Row, Value};

		use crate::matches;

		// Every true subset answer must hold for every row; false
		// answers are allowed to be conservative.
		let predicates = vec![
			eq(age(), 5i64),
			eq(age(), 10i64),
			gt(age(), 5i64),
			gte(age(), 5i64),
			lt(age(), 10i64),
			lte(age(), 10i64),
			neq(age(), 7i64),
			in_list(age(), [3i64, 5, 10]),
			and([gt(age(), 2i64), lt(age(), 12i64)]),
			or([eq(age(), 1i64), gt(age(), 9i64)]),
		];
		let rows: Vec<Row> = (0..=20).map(|age| Row::from_pairs([("age", Value::Int(age))])).collect();

		for p in &predicates {
			for q in &predicates {
				if !is_where_subset(Some(p), Some(q)) {
					continue;
				}
				for row in &rows {
					if matches(p, row) {
						assert!(
							matches(q, row),
							"claimed {p:?} subset of {q:?} but row {row} disagrees"
						);
					}
				}
			}
		}
	}

	#[test]
	fn test_limit_subset() {
		assert!(is_limit_subset(Some(5), Some(10)));
		assert!(!is_limit_subset(Some(10), Some(5)));
		assert!(is_limit_subset(Some(10), None));
		assert!(!is_limit_subset(None, Some(10)));
		assert!(is_limit_subset(None, None));
	}
}
