// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::Arc;

use rill_core::{Error, Row};

use crate::{
	expression::{Expression, FieldPath, IntoExpression},
	ir::{
		CompareOptions, Direction, JoinClause, JoinKind, OrderByClause, Projection, QueryIr, QuerySource,
		RowFn, SourceRef,
	},
};

/// A path-recording reference to a source alias or one of its fields.
///
/// Traversing a `Ref` with [`Ref::field`] extends the recorded path; using
/// it as an expression operand captures the path without evaluating
/// anything.
#[derive(Clone, Debug)]
pub struct Ref {
	path: FieldPath,
}

impl Ref {
	pub fn new(alias: impl Into<String>) -> Self {
		Ref {
			path: FieldPath::new([alias.into()]),
		}
	}

	pub fn field(&self, name: impl Into<String>) -> Ref {
		Ref {
			path: self.path.child(name),
		}
	}

	pub fn path(&self) -> &FieldPath {
		&self.path
	}
}

impl IntoExpression for Ref {
	fn into_expression(self) -> Expression {
		Expression::Field(self.path)
	}
}

impl IntoExpression for &Ref {
	fn into_expression(self) -> Expression {
		Expression::Field(self.path.clone())
	}
}

/// Start a new query.
pub fn query() -> QueryBuilder {
	QueryBuilder::new()
}

/// The immutable fluent builder. Every method clones the current state,
/// appends one clause and returns the new builder; the receiver stays
/// usable, so partial queries can be shared and extended in different
/// directions.
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
	// Shared, cloned-on-write: embedding this builder as a sub-query
	// keeps one IR node, which the compiler memoizes by identity across
	// self-joins of the same sub-expression.
	ir: Arc<QueryIr>,
}

impl QueryBuilder {
	pub fn new() -> Self {
		QueryBuilder {
			ir: Arc::new(QueryIr::default()),
		}
	}

	/// The current (unvalidated) IR.
	pub fn ir(&self) -> &QueryIr {
		&self.ir
	}

	fn edit(&self, edit: impl FnOnce(&mut QueryIr)) -> Self {
		let mut next = self.clone();
		edit(Arc::make_mut(&mut next.ir));
		next
	}

	pub fn from(&self, alias: impl Into<String>, source: &dyn QuerySource) -> Self {
		let (id, alias) = (source.source_id(), alias.into());
		self.edit(|ir| {
			ir.from = Some(SourceRef::Collection {
				id,
				alias,
			});
		})
	}

	/// Embed a sub-query as the primary source. The inner query is
	/// validated together with the outer one on [`QueryBuilder::build`].
	pub fn from_query(&self, alias: impl Into<String>, sub: &QueryBuilder) -> Self {
		let (query, alias) = (Arc::clone(&sub.ir), alias.into());
		self.edit(|ir| {
			ir.from = Some(SourceRef::Query {
				query,
				alias,
			});
		})
	}

	pub fn join(
		&self,
		kind: JoinKind,
		alias: impl Into<String>,
		source: &dyn QuerySource,
		on: impl IntoExpression,
	) -> Self {
		let (id, alias, on) = (source.source_id(), alias.into(), on.into_expression());
		self.edit(|ir| {
			ir.joins.push(JoinClause {
				kind,
				source: SourceRef::Collection {
					id,
					alias,
				},
				on,
			});
		})
	}

	pub fn join_query(
		&self,
		kind: JoinKind,
		alias: impl Into<String>,
		sub: &QueryBuilder,
		on: impl IntoExpression,
	) -> Self {
		let (query, alias, on) = (Arc::clone(&sub.ir), alias.into(), on.into_expression());
		self.edit(|ir| {
			ir.joins.push(JoinClause {
				kind,
				source: SourceRef::Query {
					query,
					alias,
				},
				on,
			});
		})
	}

	pub fn inner_join(
		&self,
		alias: impl Into<String>,
		source: &dyn QuerySource,
		on: impl IntoExpression,
	) -> Self {
		self.join(JoinKind::Inner, alias, source, on)
	}

	pub fn left_join(
		&self,
		alias: impl Into<String>,
		source: &dyn QuerySource,
		on: impl IntoExpression,
	) -> Self {
		self.join(JoinKind::Left, alias, source, on)
	}

	pub fn right_join(
		&self,
		alias: impl Into<String>,
		source: &dyn QuerySource,
		on: impl IntoExpression,
	) -> Self {
		self.join(JoinKind::Right, alias, source, on)
	}

	pub fn full_join(
		&self,
		alias: impl Into<String>,
		source: &dyn QuerySource,
		on: impl IntoExpression,
	) -> Self {
		self.join(JoinKind::Full, alias, source, on)
	}

	/// A cross join is an inner join with a constant-true condition.
	pub fn cross_join(&self, alias: impl Into<String>, source: &dyn QuerySource) -> Self {
		self.join(JoinKind::Cross, alias, source, Expression::TRUE)
	}

	/// Add a where-clause. Successive calls conjoin.
	pub fn filter(&self, predicate: impl IntoExpression) -> Self {
		let predicate = predicate.into_expression();
		self.edit(|ir| {
			ir.where_clause = Some(match ir.where_clause.take() {
				None => predicate,
				Some(Expression::And(mut items)) => {
					items.push(predicate);
					Expression::And(items)
				}
				Some(existing) => Expression::And(vec![existing, predicate]),
			});
		})
	}

	pub fn group_by(&self, exprs: impl IntoIterator<Item = Expression>) -> Self {
		let exprs: Vec<Expression> = exprs.into_iter().collect();
		self.edit(|ir| ir.group_by.extend(exprs))
	}

	pub fn having(&self, predicate: impl IntoExpression) -> Self {
		let predicate = predicate.into_expression();
		self.edit(|ir| {
			ir.having = Some(match ir.having.take() {
				None => predicate,
				Some(existing) => Expression::And(vec![existing, predicate]),
			});
		})
	}

	pub fn order_by(&self, expr: impl IntoExpression) -> Self {
		self.order_by_with(expr, CompareOptions::default())
	}

	pub fn order_by_desc(&self, expr: impl IntoExpression) -> Self {
		self.order_by_with(expr, CompareOptions::desc())
	}

	pub fn order_by_with(&self, expr: impl IntoExpression, options: CompareOptions) -> Self {
		let expression = expr.into_expression();
		self.edit(|ir| {
			ir.order_by.push(OrderByClause {
				expression,
				options,
			});
		})
	}

	pub fn limit(&self, limit: usize) -> Self {
		self.edit(|ir| ir.limit = Some(limit))
	}

	pub fn offset(&self, offset: usize) -> Self {
		self.edit(|ir| ir.offset = Some(offset))
	}

	/// Project each result row to a flat record of named expressions.
	pub fn select(&self, fields: impl IntoIterator<Item = (impl Into<String>, Expression)>) -> Self {
		let tree = Projection::Record(
			fields.into_iter().map(|(name, expr)| (name.into(), Projection::Expression(expr))).collect(),
		);
		self.select_tree(tree)
	}

	/// Project with a full projection tree (nested records, spreads).
	pub fn select_tree(&self, projection: Projection) -> Self {
		self.edit(|ir| ir.select = Some(projection))
	}

	/// Project with an opaque row-to-row function. Queries using this
	/// never share a fingerprint.
	pub fn select_fn(&self, f: impl Fn(&Row) -> Row + Send + Sync + 'static) -> Self {
		let f = RowFn::new(f);
		self.edit(|ir| ir.fn_select = Some(f))
	}

	/// Shorthand for `limit(1)` with single-row result semantics.
	pub fn find_one(&self) -> Self {
		self.edit(|ir| {
			ir.limit = Some(1);
			ir.single_row = true;
		})
	}

	/// Validate and freeze the IR.
	pub fn build(&self) -> crate::Result<Arc<QueryIr>> {
		validate(&self.ir)?;
		Ok(Arc::clone(&self.ir))
	}
}

fn validate(ir: &QueryIr) -> crate::Result<()> {
	let Some(from) = &ir.from else {
		return Err(Error::MissingSource("query has no from clause".to_string()));
	};

	let mut aliases: Vec<&str> = Vec::with_capacity(1 + ir.joins.len());
	aliases.push(from.alias());
	for join in &ir.joins {
		let alias = join.source.alias();
		if aliases.contains(&alias) {
			return Err(Error::UnknownAlias(format!("alias {alias} is declared twice")));
		}
		aliases.push(alias);
	}

	if let SourceRef::Query { query, .. } = from {
		validate(query)?;
	}
	for join in &ir.joins {
		if let SourceRef::Query { query, .. } = &join.source {
			validate(query)?;
		}
		check_aliases(&join.on, &aliases)?;
	}
	if let Some(where_clause) = &ir.where_clause {
		check_aliases(where_clause, &aliases)?;
	}
	if let Some(having) = &ir.having {
		check_aliases(having, &aliases)?;
	}
	for clause in &ir.order_by {
		check_aliases(&clause.expression, &aliases)?;
	}
	for expr in &ir.group_by {
		check_aliases(expr, &aliases)?;
	}
	if let Some(select) = &ir.select {
		check_projection_aliases(select, &aliases)?;
	}
	Ok(())
}

fn check_aliases(expr: &Expression, aliases: &[&str]) -> crate::Result<()> {
	let mut referenced = Vec::new();
	expr.referenced_aliases(&mut referenced);
	for alias in referenced {
		if !aliases.contains(&alias.as_str()) {
			return Err(Error::UnknownAlias(alias));
		}
	}
	Ok(())
}

fn check_projection_aliases(projection: &Projection, aliases: &[&str]) -> crate::Result<()> {
	match projection {
		Projection::Expression(expr) => check_aliases(expr, aliases),
		Projection::Record(fields) => {
			for field in fields.values() {
				check_projection_aliases(field, aliases)?;
			}
			Ok(())
		}
		Projection::Spread(path) => {
			let alias = path.first().unwrap_or_default();
			if aliases.contains(&alias) {
				Ok(())
			} else {
				Err(Error::UnknownAlias(alias.to_string()))
			}
		}
	}
}
