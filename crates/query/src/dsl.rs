// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Constructor functions for building expressions by hand:
//!
//! ```
//! use rill_query::dsl::*;
//!
//! let active_adults = and([eq(field(["u", "active"]), true), gte(field(["u", "age"]), 18)]);
//! # let _ = active_adults;
//! ```

use rill_core::Value;

use crate::expression::{AggregateFunc, CompareOp, Expression, FieldPath, IntoExpression};

pub fn val(value: impl Into<Value>) -> Expression {
	Expression::Value(value.into())
}

pub fn field(path: impl IntoIterator<Item = impl Into<String>>) -> Expression {
	Expression::Field(FieldPath::new(path))
}

fn compare(op: CompareOp, left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	Expression::Compare {
		op,
		left: Box::new(left.into_expression()),
		right: Box::new(right.into_expression()),
	}
}

pub fn eq(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Eq, left, right)
}

pub fn neq(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Neq, left, right)
}

pub fn gt(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Gt, left, right)
}

pub fn gte(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Gte, left, right)
}

pub fn lt(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Lt, left, right)
}

pub fn lte(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	compare(CompareOp::Lte, left, right)
}

pub fn and(operands: impl IntoIterator<Item = Expression>) -> Expression {
	Expression::And(operands.into_iter().collect())
}

pub fn or(operands: impl IntoIterator<Item = Expression>) -> Expression {
	Expression::Or(operands.into_iter().collect())
}

pub fn not(operand: impl IntoExpression) -> Expression {
	Expression::Not(Box::new(operand.into_expression()))
}

pub fn in_list(expr: impl IntoExpression, list: impl IntoIterator<Item = impl Into<Value>>) -> Expression {
	Expression::In {
		expr: Box::new(expr.into_expression()),
		list: list.into_iter().map(Into::into).collect(),
	}
}

pub fn is_null(expr: impl IntoExpression) -> Expression {
	compare(CompareOp::Eq, expr, Expression::Value(Value::Undefined))
}

pub fn is_not_null(expr: impl IntoExpression) -> Expression {
	not(is_null(expr))
}

pub fn func(name: impl Into<String>, args: impl IntoIterator<Item = Expression>) -> Expression {
	Expression::Func {
		name: name.into(),
		args: args.into_iter().collect(),
	}
}

pub fn add(left: impl IntoExpression, right: impl IntoExpression) -> Expression {
	func("add", [left.into_expression(), right.into_expression()])
}

pub fn concat(args: impl IntoIterator<Item = Expression>) -> Expression {
	func("concat", args)
}

pub fn lower(arg: impl IntoExpression) -> Expression {
	func("lower", [arg.into_expression()])
}

pub fn upper(arg: impl IntoExpression) -> Expression {
	func("upper", [arg.into_expression()])
}

pub fn length(arg: impl IntoExpression) -> Expression {
	func("length", [arg.into_expression()])
}

pub fn coalesce(args: impl IntoIterator<Item = Expression>) -> Expression {
	func("coalesce", args)
}

pub fn count() -> Expression {
	Expression::Aggregate {
		func: AggregateFunc::Count,
		arg: None,
	}
}

fn aggregate(func: AggregateFunc, arg: impl IntoExpression) -> Expression {
	Expression::Aggregate {
		func,
		arg: Some(Box::new(arg.into_expression())),
	}
}

pub fn sum(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::Sum, arg)
}

pub fn min(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::Min, arg)
}

pub fn max(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::Max, arg)
}

pub fn avg(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::Avg, arg)
}

pub fn first(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::First, arg)
}

pub fn last(arg: impl IntoExpression) -> Expression {
	aggregate(AggregateFunc::Last, arg)
}
