// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::cmp::Ordering;

use indexmap::IndexMap;

use rill_core::Value;

use crate::{
	expression::{CompareOp, Expression, FieldPath},
	ir::OrderByClause,
};

use super::{Atom, Predicate, as_atom};

/// A bound on one side of a range; `strict` excludes the bound itself.
#[derive(Clone, Debug)]
struct Bound {
	value: Value,
	strict: bool,
}

/// The most restrictive constraint seen so far for one field.
#[derive(Clone, Debug, Default)]
struct FieldConstraint {
	eq: Option<Value>,
	in_list: Option<Vec<Value>>,
	lower: Option<Bound>,
	upper: Option<Bound>,
	neqs: Vec<Value>,
	unsatisfiable: bool,
}

impl FieldConstraint {
	fn add(&mut self, atom: &Atom<'_>) {
		if self.unsatisfiable {
			return;
		}
		match atom {
			Atom::In { list, .. } => {
				let next = match &self.in_list {
					None => list.to_vec(),
					Some(existing) => existing.iter().filter(|v| list.contains(v)).cloned().collect(),
				};
				self.in_list = Some(next);
			}
			Atom::Cmp { op, value, .. } => match op {
				CompareOp::Eq => match &self.eq {
					Some(existing) if existing != *value => self.unsatisfiable = true,
					_ => self.eq = Some((*value).clone()),
				},
				CompareOp::Neq => self.neqs.push((*value).clone()),
				CompareOp::Gt | CompareOp::Gte => {
					let strict = *op == CompareOp::Gt;
					let tighter = match &self.lower {
						None => true,
						Some(bound) => match (*value).cmp(&bound.value) {
							Ordering::Greater => true,
							Ordering::Equal => strict && !bound.strict,
							Ordering::Less => false,
						},
					};
					if tighter {
						self.lower = Some(Bound {
							value: (*value).clone(),
							strict,
						});
					}
				}
				CompareOp::Lt | CompareOp::Lte => {
					let strict = *op == CompareOp::Lt;
					let tighter = match &self.upper {
						None => true,
						Some(bound) => match (*value).cmp(&bound.value) {
							Ordering::Less => true,
							Ordering::Equal => strict && !bound.strict,
							Ordering::Greater => false,
						},
					};
					if tighter {
						self.upper = Some(Bound {
							value: (*value).clone(),
							strict,
						});
					}
				}
			},
		}
	}

	fn satisfies_ranges(&self, value: &Value) -> bool {
		if let Some(lower) = &self.lower {
			let ord = value.cmp(&lower.value);
			if ord == Ordering::Less || (ord == Ordering::Equal && lower.strict) {
				return false;
			}
		}
		if let Some(upper) = &self.upper {
			let ord = value.cmp(&upper.value);
			if ord == Ordering::Greater || (ord == Ordering::Equal && upper.strict) {
				return false;
			}
		}
		!self.neqs.contains(value)
	}

	/// Emit the tightened conjuncts for this field, or `None` when the
	/// constraint is unsatisfiable.
	fn finalize(self, path: &FieldPath) -> Option<Vec<Expression>> {
		if self.unsatisfiable {
			return None;
		}
		let field = || Expression::Field(path.clone());

		if let Some(ref eq) = self.eq {
			if let Some(in_list) = &self.in_list {
				if !in_list.contains(eq) {
					return None;
				}
			}
			if !self.satisfies_ranges(eq) {
				return None;
			}
			let eq = eq.clone();
			return Some(vec![Expression::Compare {
				op: CompareOp::Eq,
				left: Box::new(field()),
				right: Box::new(Expression::Value(eq)),
			}]);
		}

		if let Some(ref in_list) = self.in_list {
			let survivors: Vec<Value> =
				in_list.iter().filter(|v| self.satisfies_ranges(v)).cloned().collect();
			if survivors.is_empty() {
				return None;
			}
			return Some(vec![Expression::In {
				expr: Box::new(field()),
				list: survivors,
			}]);
		}

		// Pure range: check the bounds still leave room.
		if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
			match lower.value.cmp(&upper.value) {
				Ordering::Greater => return None,
				Ordering::Equal if lower.strict || upper.strict => return None,
				_ => {}
			}
		}

		let mut out = Vec::new();
		if let Some(lower) = self.lower {
			out.push(Expression::Compare {
				op: if lower.strict {
					CompareOp::Gt
				} else {
					CompareOp::Gte
				},
				left: Box::new(field()),
				right: Box::new(Expression::Value(lower.value)),
			});
		}
		if let Some(upper) = self.upper {
			out.push(Expression::Compare {
				op: if upper.strict {
					CompareOp::Lt
				} else {
					CompareOp::Lte
				},
				left: Box::new(field()),
				right: Box::new(Expression::Value(upper.value)),
			});
		}
		for neq in self.neqs {
			out.push(Expression::Compare {
				op: CompareOp::Neq,
				left: Box::new(field()),
				right: Box::new(Expression::Value(neq)),
			});
		}
		Some(out)
	}
}

/// Most restrictive combination of the given predicates. Conflicting
/// constraints collapse to the literal `false`; callers check with
/// [`Expression::is_literal_false`] and short-circuit.
pub fn intersect_where_predicates(predicates: &[Expression]) -> Expression {
	let mut fields: IndexMap<FieldPath, FieldConstraint> = IndexMap::new();
	let mut opaque: Vec<Expression> = Vec::new();

	for predicate in predicates {
		let conjuncts: Vec<&Expression> = match predicate {
			Expression::And(items) => items.iter().collect(),
			other => vec![other],
		};
		for conjunct in conjuncts {
			if conjunct.is_literal_false() {
				return Expression::FALSE;
			}
			if conjunct.is_literal_true() {
				continue;
			}
			match as_atom(conjunct) {
				Some(atom) => {
					fields.entry(atom.path().clone()).or_default().add(&atom);
				}
				None => {
					if !opaque.contains(conjunct) {
						opaque.push(conjunct.clone());
					}
				}
			}
		}
	}

	let mut conjuncts: Vec<Expression> = Vec::new();
	for (path, constraint) in fields {
		match constraint.finalize(&path) {
			Some(exprs) => conjuncts.extend(exprs),
			None => return Expression::FALSE,
		}
	}
	conjuncts.extend(opaque);

	match conjuncts.len() {
		0 => Expression::TRUE,
		1 => conjuncts.into_iter().next().expect("one conjunct"),
		_ => Expression::And(conjuncts),
	}
}

/// Least restrictive combination: point predicates on a common field fold
/// into `IN`, ranges on a common field relax, everything else ORs
/// together.
pub fn union_where_predicates(predicates: &[Expression]) -> Expression {
	let mut branches: Vec<Expression> = Vec::new();
	for predicate in predicates {
		if predicate.is_literal_true() {
			return Expression::TRUE;
		}
		if predicate.is_literal_false() {
			continue;
		}
		match predicate {
			Expression::Or(items) => {
				for item in items {
					if !branches.contains(item) {
						branches.push(item.clone());
					}
				}
			}
			other => {
				if !branches.contains(other) {
					branches.push(other.clone());
				}
			}
		}
	}

	if branches.is_empty() {
		return Expression::FALSE;
	}
	if branches.len() == 1 {
		return branches.into_iter().next().expect("one branch");
	}

	if let Some(folded) = fold_same_field(&branches) {
		return folded;
	}

	Expression::Or(branches)
}

/// Try to fold all branches into one predicate on a shared field.
fn fold_same_field(branches: &[Expression]) -> Option<Expression> {
	let atoms: Vec<Atom<'_>> = branches.iter().map(as_atom).collect::<Option<Vec<_>>>()?;
	let path = atoms.first()?.path();
	if !atoms.iter().all(|atom| atom.path() == path) {
		return None;
	}

	let mut points: Vec<Value> = Vec::new();
	let mut lower: Option<Bound> = None;
	let mut upper: Option<Bound> = None;

	for atom in &atoms {
		match atom {
			Atom::In { list, .. } => {
				for value in *list {
					if !points.contains(value) {
						points.push(value.clone());
					}
				}
			}
			Atom::Cmp { op: CompareOp::Eq, value, .. } => {
				if !points.contains(*value) {
					points.push((*value).clone());
				}
			}
			Atom::Cmp { op: CompareOp::Gt | CompareOp::Gte, value, .. } => {
				let strict = matches!(atom, Atom::Cmp { op: CompareOp::Gt, .. });
				let looser = match &lower {
					None => true,
					Some(bound) => match (*value).cmp(&bound.value) {
						Ordering::Less => true,
						Ordering::Equal => !strict && bound.strict,
						Ordering::Greater => false,
					},
				};
				if looser {
					lower = Some(Bound {
						value: (*value).clone(),
						strict,
					});
				}
			}
			Atom::Cmp { op: CompareOp::Lt | CompareOp::Lte, value, .. } => {
				let strict = matches!(atom, Atom::Cmp { op: CompareOp::Lt, .. });
				let looser = match &upper {
					None => true,
					Some(bound) => match (*value).cmp(&bound.value) {
						Ordering::Greater => true,
						Ordering::Equal => !strict && bound.strict,
						Ordering::Less => false,
					},
				};
				if looser {
					upper = Some(Bound {
						value: (*value).clone(),
						strict,
					});
				}
			}
			Atom::Cmp { op: CompareOp::Neq, .. } => return None,
		}
	}

	let field = || Expression::Field(path.clone());

	match (points.is_empty(), lower.is_some() || upper.is_some()) {
		// Only point predicates: fold into eq / IN.
		(false, false) => {
			if points.len() == 1 {
				Some(Expression::Compare {
					op: CompareOp::Eq,
					left: Box::new(field()),
					right: Box::new(Expression::Value(
						points.into_iter().next().expect("one point"),
					)),
				})
			} else {
				Some(Expression::In {
					expr: Box::new(field()),
					list: points,
				})
			}
		}
		// Only one-sided ranges of the same direction relax cleanly.
		(true, true) => match (lower, upper) {
			(Some(lower), None) => Some(Expression::Compare {
				op: if lower.strict {
					CompareOp::Gt
				} else {
					CompareOp::Gte
				},
				left: Box::new(field()),
				right: Box::new(Expression::Value(lower.value)),
			}),
			(None, Some(upper)) => Some(Expression::Compare {
				op: if upper.strict {
					CompareOp::Lt
				} else {
					CompareOp::Lte
				},
				left: Box::new(field()),
				right: Box::new(Expression::Value(upper.value)),
			}),
			_ => None,
		},
		_ => None,
	}
}

/// AND over wheres, the longer of prefix-related orderings, the smaller
/// window.
pub fn intersect_predicates(predicates: &[Predicate]) -> Predicate {
	let wheres: Vec<Expression> =
		predicates.iter().filter_map(|p| p.where_clause.clone()).collect();
	let where_clause = if wheres.is_empty() {
		None
	} else {
		Some(intersect_where_predicates(&wheres))
	};

	let mut order_by: Vec<OrderByClause> = Vec::new();
	let mut first = true;
	for predicate in predicates {
		if first {
			order_by = predicate.order_by.clone();
			first = false;
			continue;
		}
		order_by = match merge_prefixes(&order_by, &predicate.order_by) {
			Some(merged) => merged,
			None => Vec::new(),
		};
	}

	let limit = predicates.iter().filter_map(|p| p.limit).min();

	Predicate {
		where_clause,
		order_by,
		limit,
	}
}

/// OR over wheres (unconstrained swallows everything), the shared ordering
/// prefix, and the smallest window unless any input is unbounded.
pub fn union_predicates(predicates: &[Predicate]) -> Predicate {
	let where_clause = if predicates.iter().any(|p| p.where_clause.is_none()) {
		None
	} else {
		let wheres: Vec<Expression> =
			predicates.iter().filter_map(|p| p.where_clause.clone()).collect();
		Some(union_where_predicates(&wheres))
	};

	let mut order_by: Vec<OrderByClause> = predicates.first().map(|p| p.order_by.clone()).unwrap_or_default();
	for predicate in &predicates[1.min(predicates.len())..] {
		let common = order_by
			.iter()
			.zip(&predicate.order_by)
			.take_while(|(a, b)| a == b)
			.count();
		order_by.truncate(common);
	}

	let limit = if predicates.iter().any(|p| p.limit.is_none()) {
		None
	} else {
		predicates.iter().filter_map(|p| p.limit).min()
	};

	Predicate {
		where_clause,
		order_by,
		limit,
	}
}

/// The longer ordering when the shorter is its prefix.
fn merge_prefixes(a: &[OrderByClause], b: &[OrderByClause]) -> Option<Vec<OrderByClause>> {
	let (short, long) = if a.len() <= b.len() {
		(a, b)
	} else {
		(b, a)
	};
	if short.iter().zip(long).all(|(s, l)| s == l) {
		Some(long.to_vec())
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use rill_core::Value;

	use super::{intersect_where_predicates, union_where_predicates};
	use crate::{dsl::*, expression::Expression};

	fn age() -> Expression {
		field(["age"])
	}

	#[test]
	fn test_conflicting_equalities_are_unsatisfiable() {
		let out = intersect_where_predicates(&[eq(age(), 5i64), eq(age(), 6i64)]);
		assert!(out.is_literal_false());
	}

	#[test]
	fn test_ranges_tighten() {
		let out = intersect_where_predicates(&[gt(age(), 5i64), gt(age(), 10i64), lt(age(), 20i64)]);
		assert_eq!(out, and([gt(age(), 10i64), lt(age(), 20i64)]));
	}

	#[test]
	fn test_eq_dominates_compatible_range() {
		let out = intersect_where_predicates(&[eq(age(), 15i64), gt(age(), 10i64)]);
		assert_eq!(out, eq(age(), 15i64));
	}

	#[test]
	fn test_eq_conflicts_with_disjoint_range() {
		let out = intersect_where_predicates(&[eq(age(), 5i64), gt(age(), 10i64)]);
		assert!(out.is_literal_false());
	}

	#[test]
	fn test_in_intersection() {
		let out = intersect_where_predicates(&[
			in_list(age(), [5i64, 6, 7]),
			in_list(age(), [6i64, 7, 8]),
		]);
		assert_eq!(out, in_list(age(), [6i64, 7]));
	}

	#[test]
	fn test_empty_in_intersection_is_unsatisfiable() {
		let out = intersect_where_predicates(&[in_list(age(), [5i64]), in_list(age(), [6i64])]);
		assert!(out.is_literal_false());
	}

	#[test]
	fn test_cross_field_conjunction() {
		let out = intersect_where_predicates(&[gt(age(), 5i64), eq(field(["active"]), true)]);
		assert_eq!(out, and([gt(age(), 5i64), eq(field(["active"]), true)]));
	}

	#[test]
	fn test_union_of_equalities_folds_to_in() {
		let out = union_where_predicates(&[eq(age(), 5i64), eq(age(), 10i64)]);
		assert_eq!(out, in_list(age(), [5i64, 10]));
	}

	#[test]
	fn test_union_then_intersections_narrow_back_down() {
		// in(age,[5,10]) ∩ age>7 → in(age,[10])
		let union = union_where_predicates(&[eq(age(), 5i64), eq(age(), 10i64)]);
		let narrowed = intersect_where_predicates(&[union, gt(age(), 7i64)]);
		assert_eq!(narrowed, in_list(age(), [10i64]));

		// in(age,[10]) ∩ age=10 → age=10
		let pinned = intersect_where_predicates(&[narrowed, eq(age(), 10i64)]);
		assert_eq!(pinned, eq(age(), 10i64));

		// age=10 ∩ age=11 → false
		let conflicted = intersect_where_predicates(&[pinned, eq(age(), 11i64)]);
		assert!(conflicted.is_literal_false());
	}

	#[test]
	fn test_union_of_ranges_relaxes() {
		let out = union_where_predicates(&[gt(age(), 10i64), gte(age(), 5i64)]);
		assert_eq!(out, gte(age(), 5i64));
	}

	#[test]
	fn test_union_across_fields_ors() {
		let out = union_where_predicates(&[gt(age(), 10i64), eq(field(["active"]), true)]);
		assert_eq!(out, or([gt(age(), 10i64), eq(field(["active"]), true)]));
	}

	#[test]
	fn test_union_folds_in_and_eq() {
		let out = union_where_predicates(&[in_list(age(), [1i64, 2]), eq(age(), 3i64)]);
		assert_eq!(out, in_list(age(), [Value::Int(1), Value::Int(2), Value::Int(3)]));
	}
}
