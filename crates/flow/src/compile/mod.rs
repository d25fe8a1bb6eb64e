// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Lowering of query IR into an operator graph.
//!
//! Sources become per-alias input streams (one stream per alias even when
//! two aliases name the same collection, so self-joins never fan out over
//! a shared keyed stream). Where-clauses split into per-source predicates
//! that both fuse into the pipeline and surface for push-down into the
//! source collections; residual predicates filter after the joins. An
//! order-by with a limit over a single collection is marked optimizable
//! and lowered to the windowed operator wired for the load-more protocol.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;

use rill_core::{Error, Key, Row, Value};
use rill_query::{
	AggregateFunc, CompareOp, Expression, FieldPath, JoinKind, OrderByClause, Projection, QueryIr, SourceRef,
	evaluate,
};

use crate::{
	graph::{FlowGraph, NodeId},
	operator::{AggregateOperator, JoinOperator, OperatorKind, OrderByOperator, TopKOperator},
};

/// Everything the compiler learns that the runtime glue needs: which
/// collection feeds each input stream, the per-source predicates to push
/// down, and the optimizable order-by, if any. The owning live query
/// fills its subscription and load-more slots from this before the first
/// run.
#[derive(Debug, Default)]
pub struct CompileContext {
	/// Qualified input alias → collection id.
	pub alias_to_collection: IndexMap<String, String>,
	/// Qualified input alias → predicate over that source's bare rows.
	pub source_where_clauses: IndexMap<String, Expression>,
	pub optimizable_order_by: Option<OptimizableOrderBy>,
}

/// Metadata for the windowed order-by load-more protocol: which input to
/// ask for more rows and the shape to ask with.
#[derive(Clone, Debug)]
pub struct OptimizableOrderBy {
	pub alias: String,
	pub node: NodeId,
	/// Order clauses over the source's bare rows.
	pub order_by: Vec<OrderByClause>,
	pub limit: usize,
	pub offset: usize,
}

pub struct CompiledQuery {
	pub graph: FlowGraph,
	pub context: CompileContext,
	/// The final operator; callers attach an output sink here and then
	/// finalize the graph.
	pub tail: NodeId,
}

/// Lower a validated query IR into a fresh graph.
pub fn compile(ir: &QueryIr) -> crate::Result<CompiledQuery> {
	let mut graph = FlowGraph::new();
	let mut context = CompileContext::default();
	let mut memo: Memo = HashMap::new();
	let tail = compile_query(ir, "", &mut graph, &mut context, &mut memo)?;
	Ok(CompiledQuery {
		graph,
		context,
		tail,
	})
}

type Memo = HashMap<*const QueryIr, NodeId>;

fn compile_query(
	ir: &QueryIr,
	prefix: &str,
	graph: &mut FlowGraph,
	context: &mut CompileContext,
	memo: &mut Memo,
) -> crate::Result<NodeId> {
	let from = ir.from.as_ref().ok_or_else(|| Error::MissingSource("query has no from clause".to_string()))?;

	// Split the where-clause into per-source pushdowns and residuals. A
	// predicate must not move below a join that can null-extend its
	// alias: the where-clause filters null-extended rows out, a source
	// filter would let them through.
	let nullable = nullable_aliases(ir);
	let mut source_filters: IndexMap<String, Vec<Expression>> = IndexMap::new();
	let mut residual: Vec<Expression> = Vec::new();
	if let Some(where_clause) = &ir.where_clause {
		let conjuncts: Vec<Expression> = match where_clause {
			Expression::And(items) => items.clone(),
			other => vec![other.clone()],
		};
		for conjunct in conjuncts {
			let mut referenced = Vec::new();
			conjunct.referenced_aliases(&mut referenced);
			match referenced.as_slice() {
				[alias] if !conjunct.contains_aggregate() && !nullable.contains(alias) => {
					source_filters.entry(alias.clone()).or_default().push(conjunct);
				}
				_ => residual.push(conjunct),
			}
		}
	}

	// Build each source's namespaced, pre-filtered stream.
	let mut streams: IndexMap<String, NodeId> = IndexMap::new();
	for source in std::iter::once(from).chain(ir.joins.iter().map(|j| &j.source)) {
		let alias = source.alias().to_string();
		let filters = source_filters.get(&alias).cloned().unwrap_or_default();
		let stream = compile_source(source, prefix, &filters, graph, context, memo)?;
		streams.insert(alias, stream);
	}

	// Join chain: fold joins onto the from-stream, left to right.
	let mut left = *streams.get(from.alias()).expect("from stream exists");
	let mut left_aliases = vec![from.alias().to_string()];
	for join in &ir.joins {
		let right_alias = join.source.alias().to_string();
		let right = *streams.get(&right_alias).expect("join stream exists");
		left = compile_join(
			graph,
			join.kind,
			left,
			&left_aliases,
			right,
			&right_alias,
			&join.on,
		)?;
		left_aliases.push(right_alias);
	}
	let mut tail = left;

	// Residual predicates run over the joined record.
	if !residual.is_empty() {
		let predicate = if residual.len() == 1 {
			residual.into_iter().next().expect("one residual")
		} else {
			Expression::And(residual)
		};
		tail = graph.add_operator(OperatorKind::filter(predicate), &[tail])?;
	}

	// Aggregation rewrites having/select/order-by over the group output.
	let mut select = ir.select.clone();
	let mut order_by = ir.order_by.clone();
	let needs_aggregate = !ir.group_by.is_empty()
		|| select.as_ref().is_some_and(projection_contains_aggregate)
		|| ir.having.as_ref().is_some_and(Expression::contains_aggregate);
	if needs_aggregate {
		let mut aggregates: Vec<(AggregateFunc, Option<Expression>)> = Vec::new();
		if let Some(select) = &select {
			collect_projection_aggregates(select, &mut aggregates);
		}
		if let Some(having) = &ir.having {
			collect_aggregates(having, &mut aggregates);
		}
		for clause in &order_by {
			collect_aggregates(&clause.expression, &mut aggregates);
		}

		tail = graph.add_operator(
			OperatorKind::Aggregate(AggregateOperator::new(ir.group_by.clone(), aggregates.clone())),
			&[tail],
		)?;

		if let Some(having) = &ir.having {
			let rewritten = rewrite_for_aggregate(having, &ir.group_by, &aggregates);
			tail = graph.add_operator(OperatorKind::filter(rewritten), &[tail])?;
		}
		select = select.map(|projection| {
			rewrite_projection_for_aggregate(&projection, &ir.group_by, &aggregates)
		});
		for clause in &mut order_by {
			clause.expression = rewrite_for_aggregate(&clause.expression, &ir.group_by, &aggregates);
		}
	} else if let Some(having) = &ir.having {
		tail = graph.add_operator(OperatorKind::filter(having.clone()), &[tail])?;
	}

	// Ordering and windowing.
	if !order_by.is_empty() {
		match ir.limit {
			Some(limit) => {
				let offset = ir.offset.unwrap_or(0);
				let node = graph.add_operator(
					OperatorKind::TopK(TopKOperator::new(order_by.clone(), limit, offset)),
					&[tail],
				)?;
				tail = node;
				// A single-collection source with no joins or grouping
				// can window-load: remember the slot for the load-more
				// callback.
				if ir.joins.is_empty() && ir.group_by.is_empty() && !needs_aggregate {
					if let SourceRef::Collection { alias, .. } = from {
						let qualified = format!("{prefix}{alias}");
						context.optimizable_order_by = Some(OptimizableOrderBy {
							alias: qualified,
							node,
							order_by: order_by
								.iter()
								.map(|clause| OrderByClause {
									expression: clause
										.expression
										.without_alias(alias),
									options: clause.options.clone(),
								})
								.collect(),
							limit,
							offset,
						});
					}
				}
			}
			None => {
				tail = graph.add_operator(
					OperatorKind::OrderBy(OrderByOperator::new(order_by.clone())),
					&[tail],
				)?;
			}
		}
	} else if let Some(limit) = ir.limit {
		// Limit without an order-by windows in key order; reruns make no
		// stability promise.
		tail = graph.add_operator(
			OperatorKind::TopK(TopKOperator::new(Vec::new(), limit, ir.offset.unwrap_or(0))),
			&[tail],
		)?;
	}

	// Projection, or the natural row shape.
	if let Some(projection) = select {
		tail = graph.add_operator(
			OperatorKind::map(move |_key: &Key, row: &Row| project_row(&projection, row)),
			&[tail],
		)?;
	} else if let Some(fn_select) = ir.fn_select.clone() {
		tail = graph.add_operator(
			OperatorKind::map(move |_key: &Key, row: &Row| fn_select.apply(row)),
			&[tail],
		)?;
	} else if ir.joins.is_empty() && !needs_aggregate {
		// Single-source natural shape: unwrap the alias namespace back to
		// the raw row.
		let alias = from.alias().to_string();
		tail = graph.add_operator(
			OperatorKind::map(move |_key: &Key, row: &Row| match row.get(&alias) {
				Some(Value::Record(inner)) => inner.clone(),
				_ => row.clone(),
			}),
			&[tail],
		)?;
	}

	Ok(tail)
}

/// Aliases that some join can null-extend. The right side of a left/full
/// join is nullable; everything already joined before a right/full join
/// is nullable too (the accumulated base becomes optional).
fn nullable_aliases(ir: &QueryIr) -> Vec<String> {
	let aliases = ir.aliases();
	let mut nullable: Vec<String> = Vec::new();
	for (position, join) in ir.joins.iter().enumerate() {
		if matches!(join.kind, JoinKind::Left | JoinKind::Full) {
			let alias = join.source.alias().to_string();
			if !nullable.contains(&alias) {
				nullable.push(alias);
			}
		}
		if matches!(join.kind, JoinKind::Right | JoinKind::Full) {
			for alias in &aliases[..=position] {
				let alias = alias.to_string();
				if !nullable.contains(&alias) {
					nullable.push(alias);
				}
			}
		}
	}
	nullable
}

/// Input (or sub-pipeline), namespaced under its alias, with its pushed
/// predicates fused in.
fn compile_source(
	source: &SourceRef,
	prefix: &str,
	filters: &[Expression],
	graph: &mut FlowGraph,
	context: &mut CompileContext,
	memo: &mut Memo,
) -> crate::Result<NodeId> {
	let alias = source.alias().to_string();
	let upstream = match source {
		SourceRef::Collection { id, .. } => {
			let qualified = format!("{prefix}{alias}");
			let input = graph.add_input(&qualified)?;
			context.alias_to_collection.insert(qualified.clone(), id.clone());
			if !filters.is_empty() {
				let stripped: Vec<Expression> =
					filters.iter().map(|f| f.without_alias(&alias)).collect();
				let pushed = if stripped.len() == 1 {
					stripped.into_iter().next().expect("one filter")
				} else {
					Expression::And(stripped)
				};
				context.source_where_clauses.insert(qualified, pushed);
			}
			input
		}
		SourceRef::Query { query, .. } => {
			// Identical sub-query nodes share one compiled subtree.
			let pointer = Arc::as_ptr(query);
			match memo.get(&pointer) {
				Some(node) => *node,
				None => {
					let nested_prefix = format!("{prefix}{alias}.");
					let node = compile_query(query, &nested_prefix, graph, context, memo)?;
					memo.insert(pointer, node);
					node
				}
			}
		}
	};

	// Namespace the raw rows under the alias.
	let namespace_alias = alias.clone();
	let mut node = graph.add_operator(
		OperatorKind::map(move |_key: &Key, row: &Row| {
			Row::from_pairs([(namespace_alias.clone(), Value::Record(row.clone()))])
		}),
		&[upstream],
	)?;

	// Fuse pushed predicates into the stream as well; the source may
	// deliver a superset of what was asked for.
	if !filters.is_empty() {
		let predicate = if filters.len() == 1 {
			filters[0].clone()
		} else {
			Expression::And(filters.to_vec())
		};
		node = graph.add_operator(OperatorKind::filter(predicate), &[node])?;
	}
	Ok(node)
}

fn compile_join(
	graph: &mut FlowGraph,
	kind: JoinKind,
	left: NodeId,
	left_aliases: &[String],
	right: NodeId,
	right_alias: &str,
	on: &Expression,
) -> crate::Result<NodeId> {
	let (left_keys, right_keys, residual) = split_join_on(on, left_aliases, right_alias)?;
	if !residual.is_empty() && !matches!(kind, JoinKind::Inner | JoinKind::Cross) {
		return Err(Error::Internal(
			"non-equi join conditions are only supported for inner joins".to_string(),
		));
	}

	let left_rekey = graph.add_operator(join_rekey(left_keys), &[left])?;
	let right_rekey = graph.add_operator(join_rekey(right_keys), &[right])?;

	let join = graph.add_operator(
		OperatorKind::Join(JoinOperator::new(
			kind,
			left_aliases.to_vec(),
			vec![right_alias.to_string()],
		)),
		&[left_rekey, right_rekey],
	)?;

	if residual.is_empty() {
		Ok(join)
	} else {
		let predicate = if residual.len() == 1 {
			residual.into_iter().next().expect("one residual")
		} else {
			Expression::And(residual)
		};
		Ok(graph.add_operator(OperatorKind::filter(predicate), &[join])?)
	}
}

/// Re-key a namespaced stream to `Composite[join_key, source_key]`.
fn join_rekey(key_exprs: Vec<Expression>) -> OperatorKind {
	OperatorKind::re_key(move |key: &Key, row: &Row| {
		let mut parts = Vec::with_capacity(key_exprs.len());
		for expr in &key_exprs {
			parts.push(Key::try_from(evaluate(expr, row)).map_err(Error::from)?);
		}
		let join_key = if parts.len() == 1 {
			parts.into_iter().next().expect("one key part")
		} else {
			Key::Composite(parts)
		};
		Ok(Key::composite([join_key, key.clone()]))
	})
}

/// Decompose an on-expression into oriented equi-join key pairs and
/// residual conditions.
fn split_join_on(
	on: &Expression,
	left_aliases: &[String],
	right_alias: &str,
) -> crate::Result<(Vec<Expression>, Vec<Expression>, Vec<Expression>)> {
	let conjuncts: Vec<&Expression> = match on {
		Expression::And(items) => items.iter().collect(),
		other => vec![other],
	};

	let mut left_keys = Vec::new();
	let mut right_keys = Vec::new();
	let mut residual = Vec::new();

	for conjunct in conjuncts {
		if conjunct.is_literal_true() {
			continue;
		}
		if let Expression::Compare { op: CompareOp::Eq, left, right } = conjunct {
			let mut left_refs = Vec::new();
			left.referenced_aliases(&mut left_refs);
			let mut right_refs = Vec::new();
			right.referenced_aliases(&mut right_refs);

			let left_side_is_left = !left_refs.is_empty()
				&& left_refs.iter().all(|a| left_aliases.contains(a))
				&& right_refs.iter().all(|a| a == right_alias)
				&& !right_refs.is_empty();
			let left_side_is_right = !left_refs.is_empty()
				&& left_refs.iter().all(|a| a == right_alias)
				&& right_refs.iter().all(|a| left_aliases.contains(a))
				&& !right_refs.is_empty();

			if left_side_is_left {
				left_keys.push((**left).clone());
				right_keys.push((**right).clone());
				continue;
			}
			if left_side_is_right {
				left_keys.push((**right).clone());
				right_keys.push((**left).clone());
				continue;
			}
		}
		residual.push(conjunct.clone());
	}

	if left_keys.is_empty() {
		// No equi-condition: a constant key joins everything against
		// everything (cross product), with residuals filtering after.
		left_keys.push(Expression::TRUE);
		right_keys.push(Expression::TRUE);
	}
	Ok((left_keys, right_keys, residual))
}

fn collect_aggregates(expr: &Expression, out: &mut Vec<(AggregateFunc, Option<Expression>)>) {
	match expr {
		Expression::Aggregate { func, arg } => {
			let entry = (*func, arg.as_deref().cloned());
			if !out.contains(&entry) {
				out.push(entry);
			}
		}
		Expression::And(items) | Expression::Or(items) => {
			for item in items {
				collect_aggregates(item, out);
			}
		}
		Expression::Not(inner) => collect_aggregates(inner, out),
		Expression::Compare { left, right, .. } => {
			collect_aggregates(left, out);
			collect_aggregates(right, out);
		}
		Expression::In { expr, .. } => collect_aggregates(expr, out),
		Expression::Func { args, .. } => {
			for arg in args {
				collect_aggregates(arg, out);
			}
		}
		Expression::Value(_) | Expression::Field(_) => {}
	}
}

fn collect_projection_aggregates(projection: &Projection, out: &mut Vec<(AggregateFunc, Option<Expression>)>) {
	match projection {
		Projection::Expression(expr) => collect_aggregates(expr, out),
		Projection::Record(fields) => {
			for field in fields.values() {
				collect_projection_aggregates(field, out);
			}
		}
		Projection::Spread(_) => {}
	}
}

fn projection_contains_aggregate(projection: &Projection) -> bool {
	match projection {
		Projection::Expression(expr) => expr.contains_aggregate(),
		Projection::Record(fields) => fields.values().any(projection_contains_aggregate),
		Projection::Spread(_) => false,
	}
}

/// Replace group expressions with `__group.i` refs and aggregates with
/// `__agg.i` refs, matching the aggregate operator's output shape.
fn rewrite_for_aggregate(
	expr: &Expression,
	group_by: &[Expression],
	aggregates: &[(AggregateFunc, Option<Expression>)],
) -> Expression {
	if let Some(position) = group_by.iter().position(|g| g == expr) {
		return Expression::Field(FieldPath::new(["__group".to_string(), position.to_string()]));
	}
	match expr {
		Expression::Aggregate { func, arg } => {
			let entry = (*func, arg.as_deref().cloned());
			match aggregates.iter().position(|a| *a == entry) {
				Some(position) => Expression::Field(FieldPath::new([
					"__agg".to_string(),
					position.to_string(),
				])),
				None => Expression::Value(Value::Undefined),
			}
		}
		Expression::And(items) => Expression::And(
			items.iter().map(|item| rewrite_for_aggregate(item, group_by, aggregates)).collect(),
		),
		Expression::Or(items) => Expression::Or(
			items.iter().map(|item| rewrite_for_aggregate(item, group_by, aggregates)).collect(),
		),
		Expression::Not(inner) => {
			Expression::Not(Box::new(rewrite_for_aggregate(inner, group_by, aggregates)))
		}
		Expression::Compare { op, left, right } => Expression::Compare {
			op: *op,
			left: Box::new(rewrite_for_aggregate(left, group_by, aggregates)),
			right: Box::new(rewrite_for_aggregate(right, group_by, aggregates)),
		},
		Expression::In { expr, list } => Expression::In {
			expr: Box::new(rewrite_for_aggregate(expr, group_by, aggregates)),
			list: list.clone(),
		},
		Expression::Func { name, args } => Expression::Func {
			name: name.clone(),
			args: args.iter().map(|arg| rewrite_for_aggregate(arg, group_by, aggregates)).collect(),
		},
		other => other.clone(),
	}
}

fn rewrite_projection_for_aggregate(
	projection: &Projection,
	group_by: &[Expression],
	aggregates: &[(AggregateFunc, Option<Expression>)],
) -> Projection {
	match projection {
		Projection::Expression(expr) => {
			Projection::Expression(rewrite_for_aggregate(expr, group_by, aggregates))
		}
		Projection::Record(fields) => Projection::Record(
			fields.iter()
				.map(|(name, child)| {
					(name.clone(), rewrite_projection_for_aggregate(child, group_by, aggregates))
				})
				.collect(),
		),
		Projection::Spread(path) => Projection::Spread(path.clone()),
	}
}

/// Evaluate a projection tree against a (namespaced) row.
pub fn project_row(projection: &Projection, row: &Row) -> Row {
	match projection {
		Projection::Record(fields) => {
			let mut out = Row::with_capacity(fields.len());
			for (name, child) in fields {
				match child {
					Projection::Expression(expr) => {
						out.set(name.clone(), evaluate(expr, row));
					}
					Projection::Record(_) => {
						out.set(name.clone(), Value::Record(project_row(child, row)));
					}
					Projection::Spread(path) => {
						spread_into(&mut out, path, row);
					}
				}
			}
			out
		}
		Projection::Expression(expr) => match evaluate(expr, row) {
			Value::Record(inner) => inner,
			other => Row::from_pairs([("value", other)]),
		},
		Projection::Spread(path) => {
			let mut out = Row::new();
			spread_into(&mut out, path, row);
			out
		}
	}
}

fn spread_into(out: &mut Row, path: &FieldPath, row: &Row) {
	if let Some(Value::Record(inner)) = row.lookup_path(path.segments()) {
		for (field, value) in inner.iter() {
			out.set(field.clone(), value.clone());
		}
	}
}
