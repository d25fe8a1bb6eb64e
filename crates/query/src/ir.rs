// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	fmt,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rill_core::Row;

use crate::expression::{Expression, FieldPath};

/// Anything a query can read from: collections and live query collections
/// implement this to hand the builder a stable source identity.
pub trait QuerySource {
	fn source_id(&self) -> String;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
	Inner,
	Left,
	Right,
	Full,
	Cross,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	#[default]
	Asc,
	Desc,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
	#[default]
	First,
	Last,
}

/// How text values compare inside an order-by.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringSort {
	/// Compare codepoint sequences.
	#[default]
	Lexical,
	/// Compare with a portable locale option bag.
	Locale(LocaleOptions),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocaleOptions {
	#[serde(default)]
	pub locale: Option<String>,
	#[serde(default)]
	pub case_insensitive: bool,
	/// Compare runs of digits by numeric value ("a9" before "a10").
	#[serde(default)]
	pub numeric: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompareOptions {
	pub direction: Direction,
	pub nulls: NullsOrder,
	#[serde(rename = "stringSort")]
	pub string_sort: StringSort,
}

impl CompareOptions {
	pub fn desc() -> Self {
		CompareOptions {
			direction: Direction::Desc,
			..Default::default()
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderByClause {
	pub expression: Expression,
	#[serde(rename = "compareOptions")]
	pub options: CompareOptions,
}

/// A projection tree: nested records of expressions, spreads of whole
/// aliases, and aggregates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Projection {
	Expression(Expression),
	Record(IndexMap<String, Projection>),
	Spread(FieldPath),
}

static ROW_FN_SEQ: AtomicU64 = AtomicU64::new(1);

/// An opaque row-to-row projection. Two `RowFn`s are never considered
/// equivalent, so queries using them fingerprint distinctly.
#[derive(Clone)]
pub struct RowFn {
	id: u64,
	f: Arc<dyn Fn(&Row) -> Row + Send + Sync>,
}

impl RowFn {
	pub fn new(f: impl Fn(&Row) -> Row + Send + Sync + 'static) -> Self {
		RowFn {
			id: ROW_FN_SEQ.fetch_add(1, Ordering::Relaxed),
			f: Arc::new(f),
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn apply(&self, row: &Row) -> Row {
		(self.f)(row)
	}
}

impl fmt::Debug for RowFn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RowFn").field("id", &self.id).finish()
	}
}

impl PartialEq for RowFn {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

/// A query source: a concrete collection or an embedded sub-query.
#[derive(Clone, Debug)]
pub enum SourceRef {
	Collection {
		id: String,
		alias: String,
	},
	Query {
		query: Arc<QueryIr>,
		alias: String,
	},
}

impl SourceRef {
	pub fn alias(&self) -> &str {
		match self {
			SourceRef::Collection { alias, .. } => alias,
			SourceRef::Query { alias, .. } => alias,
		}
	}
}

#[derive(Clone, Debug)]
pub struct JoinClause {
	pub kind: JoinKind,
	pub source: SourceRef,
	pub on: Expression,
}

/// The immutable intermediate representation of a query. Built by the
/// fluent builder, consumed by the compiler. Structural equality of intent
/// is captured by [`crate::fingerprint`].
#[derive(Clone, Debug, Default)]
pub struct QueryIr {
	pub from: Option<SourceRef>,
	pub joins: Vec<JoinClause>,
	pub where_clause: Option<Expression>,
	pub group_by: Vec<Expression>,
	pub having: Option<Expression>,
	pub order_by: Vec<OrderByClause>,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
	pub select: Option<Projection>,
	pub fn_select: Option<RowFn>,
	/// `find_one`: limit 1 with single-row result semantics.
	pub single_row: bool,
}

impl QueryIr {
	/// Every alias in scope, in declaration order: `from` first, then each
	/// join.
	pub fn aliases(&self) -> Vec<&str> {
		let mut aliases = Vec::with_capacity(1 + self.joins.len());
		if let Some(from) = &self.from {
			aliases.push(from.alias());
		}
		for join in &self.joins {
			aliases.push(join.source.alias());
		}
		aliases
	}

	pub fn source(&self, alias: &str) -> Option<&SourceRef> {
		if let Some(from) = &self.from {
			if from.alias() == alias {
				return Some(from);
			}
		}
		self.joins.iter().map(|j| &j.source).find(|s| s.alias() == alias)
	}
}
