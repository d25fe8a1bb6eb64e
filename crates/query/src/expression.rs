// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use rill_core::Value;

/// A path of field segments, the first of which is usually a source alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(pub SmallVec<[String; 2]>);

impl FieldPath {
	pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
		FieldPath(segments.into_iter().map(Into::into).collect())
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}

	pub fn first(&self) -> Option<&str> {
		self.0.first().map(String::as_str)
	}

	pub fn last(&self) -> Option<&str> {
		self.0.last().map(String::as_str)
	}

	pub fn child(&self, segment: impl Into<String>) -> Self {
		let mut segments = self.0.clone();
		segments.push(segment.into());
		FieldPath(segments)
	}

	/// Drop the leading segment when it names the given alias. Used when a
	/// predicate is pushed down to a source that sees bare rows.
	pub fn without_alias(&self, alias: &str) -> Self {
		if self.first() == Some(alias) && self.0.len() > 1 {
			FieldPath(self.0[1..].iter().cloned().collect())
		} else {
			self.clone()
		}
	}
}

impl Display for FieldPath {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0.join("."))
	}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
	Eq,
	Neq,
	Gt,
	Gte,
	Lt,
	Lte,
}

impl CompareOp {
	pub fn flipped(&self) -> CompareOp {
		match self {
			CompareOp::Eq => CompareOp::Eq,
			CompareOp::Neq => CompareOp::Neq,
			CompareOp::Gt => CompareOp::Lt,
			CompareOp::Gte => CompareOp::Lte,
			CompareOp::Lt => CompareOp::Gt,
			CompareOp::Lte => CompareOp::Gte,
		}
	}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
	Count,
	Sum,
	Min,
	Max,
	Avg,
	First,
	Last,
}

/// A scalar or aggregate expression over namespaced rows.
///
/// `And`/`Or` are n-ary: their operand sets are commutative, which the
/// fingerprint exploits by sorting operand encodings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
	/// A constant value.
	Value(Value),
	/// A field reference by path; the first segment names a source alias.
	Field(FieldPath),
	/// Logical conjunction of all operands.
	And(Vec<Expression>),
	/// Logical disjunction of all operands.
	Or(Vec<Expression>),
	/// Logical negation.
	Not(Box<Expression>),
	/// A binary comparison.
	Compare {
		op: CompareOp,
		left: Box<Expression>,
		right: Box<Expression>,
	},
	/// Membership test against a list of values.
	In {
		expr: Box<Expression>,
		list: Vec<Value>,
	},
	/// A named scalar function application.
	Func {
		name: String,
		args: Vec<Expression>,
	},
	/// An aggregate, only valid under a group-by.
	Aggregate {
		func: AggregateFunc,
		arg: Option<Box<Expression>>,
	},
}

impl Expression {
	pub const TRUE: Expression = Expression::Value(Value::Boolean(true));
	pub const FALSE: Expression = Expression::Value(Value::Boolean(false));

	pub fn is_literal_false(&self) -> bool {
		matches!(self, Expression::Value(Value::Boolean(false)))
	}

	pub fn is_literal_true(&self) -> bool {
		matches!(self, Expression::Value(Value::Boolean(true)))
	}

	/// Collect every alias referenced by a field path in this expression.
	pub fn referenced_aliases(&self, out: &mut Vec<String>) {
		match self {
			Expression::Value(_) => {}
			Expression::Field(path) => {
				if let Some(alias) = path.first() {
					if !out.iter().any(|a| a == alias) {
						out.push(alias.to_string());
					}
				}
			}
			Expression::And(items) | Expression::Or(items) => {
				for item in items {
					item.referenced_aliases(out);
				}
			}
			Expression::Not(inner) => inner.referenced_aliases(out),
			Expression::Compare { left, right, .. } => {
				left.referenced_aliases(out);
				right.referenced_aliases(out);
			}
			Expression::In { expr, .. } => expr.referenced_aliases(out),
			Expression::Func { args, .. } => {
				for arg in args {
					arg.referenced_aliases(out);
				}
			}
			Expression::Aggregate { arg, .. } => {
				if let Some(arg) = arg {
					arg.referenced_aliases(out);
				}
			}
		}
	}

	/// True when every field path in this expression starts with `alias`.
	pub fn references_only(&self, alias: &str) -> bool {
		let mut aliases = Vec::new();
		self.referenced_aliases(&mut aliases);
		aliases.iter().all(|a| a == alias)
	}

	/// Rewrite every field path, dropping the leading `alias` segment.
	/// Pushing a per-source predicate into a collection requires paths
	/// relative to that collection's bare rows.
	pub fn without_alias(&self, alias: &str) -> Expression {
		self.map_paths(&|path| path.without_alias(alias))
	}

	/// Rewrite every field path with `f`, leaving the rest of the tree
	/// untouched.
	pub fn map_paths(&self, f: &impl Fn(&FieldPath) -> FieldPath) -> Expression {
		match self {
			Expression::Value(v) => Expression::Value(v.clone()),
			Expression::Field(path) => Expression::Field(f(path)),
			Expression::And(items) => Expression::And(items.iter().map(|e| e.map_paths(f)).collect()),
			Expression::Or(items) => Expression::Or(items.iter().map(|e| e.map_paths(f)).collect()),
			Expression::Not(inner) => Expression::Not(Box::new(inner.map_paths(f))),
			Expression::Compare { op, left, right } => Expression::Compare {
				op: *op,
				left: Box::new(left.map_paths(f)),
				right: Box::new(right.map_paths(f)),
			},
			Expression::In { expr, list } => Expression::In {
				expr: Box::new(expr.map_paths(f)),
				list: list.clone(),
			},
			Expression::Func { name, args } => Expression::Func {
				name: name.clone(),
				args: args.iter().map(|e| e.map_paths(f)).collect(),
			},
			Expression::Aggregate { func, arg } => Expression::Aggregate {
				func: *func,
				arg: arg.as_ref().map(|a| Box::new(a.map_paths(f))),
			},
		}
	}

	/// True when this expression contains an aggregate anywhere.
	pub fn contains_aggregate(&self) -> bool {
		match self {
			Expression::Aggregate { .. } => true,
			Expression::Value(_) | Expression::Field(_) => false,
			Expression::And(items) | Expression::Or(items) => items.iter().any(|e| e.contains_aggregate()),
			Expression::Not(inner) => inner.contains_aggregate(),
			Expression::Compare { left, right, .. } => {
				left.contains_aggregate() || right.contains_aggregate()
			}
			Expression::In { expr, .. } => expr.contains_aggregate(),
			Expression::Func { args, .. } => args.iter().any(|e| e.contains_aggregate()),
		}
	}
}

/// Values and refs usable directly as expression operands.
pub trait IntoExpression {
	fn into_expression(self) -> Expression;
}

impl IntoExpression for Expression {
	fn into_expression(self) -> Expression {
		self
	}
}

impl IntoExpression for &Expression {
	fn into_expression(self) -> Expression {
		self.clone()
	}
}

impl IntoExpression for Value {
	fn into_expression(self) -> Expression {
		Expression::Value(self)
	}
}

impl IntoExpression for bool {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::Boolean(self))
	}
}

impl IntoExpression for i64 {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::Int(self))
	}
}

impl IntoExpression for f64 {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::Float(self))
	}
}

impl IntoExpression for &str {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::text(self))
	}
}

impl IntoExpression for String {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::Text(self))
	}
}

impl IntoExpression for rill_core::Timestamp {
	fn into_expression(self) -> Expression {
		Expression::Value(Value::Timestamp(self))
	}
}
