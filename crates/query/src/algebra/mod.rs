// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Predicate algebra over `{where, orderBy, limit}` triples.
//!
//! The subset direction is conservative: a `true` answer is a guarantee, a
//! `false` answer only means "could not prove it". Intersection produces
//! the most restrictive combination and surfaces unsatisfiability as the
//! literal `false`, which callers check for instead of catching errors.

pub use combine::{intersect_predicates, intersect_where_predicates, union_predicates, union_where_predicates};
pub use subset::{is_limit_subset, is_order_by_subset, is_predicate_subset, is_where_subset};

mod combine;
mod subset;

use rill_core::Value;

use crate::{
	expression::{CompareOp, Expression, FieldPath},
	ir::OrderByClause,
};

/// A loadable data shape: an optional row predicate, an ordering and a
/// window size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predicate {
	pub where_clause: Option<Expression>,
	pub order_by: Vec<OrderByClause>,
	pub limit: Option<usize>,
}

impl Predicate {
	pub fn unconstrained() -> Self {
		Predicate::default()
	}

	pub fn from_where(where_clause: Expression) -> Self {
		Predicate {
			where_clause: Some(where_clause),
			..Default::default()
		}
	}

	/// True when the where-clause is the literal `false`: no row can ever
	/// match, so loads and scans short-circuit.
	pub fn is_unsatisfiable(&self) -> bool {
		self.where_clause.as_ref().is_some_and(Expression::is_literal_false)
	}
}

/// A comparison of one field against literal values, the unit the algebra
/// reasons about. Anything else is treated opaquely.
pub(crate) enum Atom<'a> {
	Cmp {
		path: &'a FieldPath,
		op: CompareOp,
		value: &'a Value,
	},
	In {
		path: &'a FieldPath,
		list: &'a [Value],
	},
}

pub(crate) fn as_atom(expr: &Expression) -> Option<Atom<'_>> {
	match expr {
		Expression::Compare { op, left, right } => match (left.as_ref(), right.as_ref()) {
			(Expression::Field(path), Expression::Value(value)) => Some(Atom::Cmp {
				path,
				op: *op,
				value,
			}),
			(Expression::Value(value), Expression::Field(path)) => Some(Atom::Cmp {
				path,
				op: op.flipped(),
				value,
			}),
			_ => None,
		},
		Expression::In { expr, list } => match expr.as_ref() {
			Expression::Field(path) => Some(Atom::In {
				path,
				list,
			}),
			_ => None,
		},
		_ => None,
	}
}

impl<'a> Atom<'a> {
	pub(crate) fn path(&self) -> &'a FieldPath {
		match self {
			Atom::Cmp { path, .. } => path,
			Atom::In { path, .. } => path,
		}
	}
}
