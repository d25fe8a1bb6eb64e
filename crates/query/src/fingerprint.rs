// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Canonical query fingerprints.
//!
//! The IR is rendered to a canonical textual encoding and hashed with
//! xxh3. Canonicalization covers exactly the equivalences the engine
//! promises: commutative AND/OR/EQ operand sets are sorted, IN lists are
//! sorted and deduplicated, projection record keys are sorted, `<`/`<=`
//! normalize to flipped `>`/`>=`, and aliases are replaced by their
//! declaration position so renaming an alias does not change the
//! fingerprint. Equal fingerprints imply equivalent queries; distinct
//! fingerprints imply nothing.

use std::{collections::HashMap, fmt::Write};

use xxhash_rust::xxh3::xxh3_64;

use rill_core::Value;

use crate::{
	expression::{CompareOp, Expression},
	ir::{Direction, NullsOrder, Projection, QueryIr, SourceRef, StringSort},
};

pub fn fingerprint(ir: &QueryIr) -> u64 {
	xxh3_64(encode_query(ir).as_bytes())
}

fn encode_query(ir: &QueryIr) -> String {
	let aliases: HashMap<String, usize> =
		ir.aliases().into_iter().enumerate().map(|(i, alias)| (alias.to_string(), i)).collect();

	let mut out = String::new();
	if let Some(from) = &ir.from {
		out.push_str("from:");
		encode_source(from, &mut out);
	}
	for join in &ir.joins {
		write!(out, "|join:{:?}:", join.kind).expect("write to string");
		encode_source(&join.source, &mut out);
		out.push(':');
		out.push_str(&encode_expr(&join.on, &aliases));
	}
	if let Some(where_clause) = &ir.where_clause {
		out.push_str("|where:");
		out.push_str(&encode_expr(where_clause, &aliases));
	}
	if !ir.group_by.is_empty() {
		out.push_str("|group:");
		for expr in &ir.group_by {
			out.push_str(&encode_expr(expr, &aliases));
			out.push(',');
		}
	}
	if let Some(having) = &ir.having {
		out.push_str("|having:");
		out.push_str(&encode_expr(having, &aliases));
	}
	for clause in &ir.order_by {
		out.push_str("|order:");
		out.push_str(&encode_expr(&clause.expression, &aliases));
		out.push(':');
		out.push_str(match clause.options.direction {
			Direction::Asc => "asc",
			Direction::Desc => "desc",
		});
		out.push(':');
		out.push_str(match clause.options.nulls {
			NullsOrder::First => "nf",
			NullsOrder::Last => "nl",
		});
		match &clause.options.string_sort {
			StringSort::Lexical => out.push_str(":lex"),
			StringSort::Locale(locale) => {
				write!(
					out,
					":loc({},{},{})",
					locale.locale.as_deref().unwrap_or(""),
					locale.case_insensitive,
					locale.numeric
				)
				.expect("write to string");
			}
		}
	}
	if let Some(limit) = ir.limit {
		write!(out, "|limit:{limit}").expect("write to string");
	}
	if let Some(offset) = ir.offset {
		write!(out, "|offset:{offset}").expect("write to string");
	}
	if let Some(select) = &ir.select {
		out.push_str("|select:");
		out.push_str(&encode_projection(select, &aliases));
	}
	if let Some(fn_select) = &ir.fn_select {
		write!(out, "|fnsel:{}", fn_select.id()).expect("write to string");
	}
	if ir.single_row {
		out.push_str("|one");
	}
	out
}

fn encode_source(source: &SourceRef, out: &mut String) {
	match source {
		SourceRef::Collection { id, .. } => {
			write!(out, "col({id})").expect("write to string");
		}
		SourceRef::Query { query, .. } => {
			out.push_str("sub(");
			out.push_str(&encode_query(query));
			out.push(')');
		}
	}
}

fn encode_value(value: &Value) -> String {
	serde_json::to_string(value).expect("values serialize")
}

fn encode_expr(expr: &Expression, aliases: &HashMap<String, usize>) -> String {
	match expr {
		Expression::Value(value) => format!("v({})", encode_value(value)),
		Expression::Field(path) => {
			let mut out = String::from("f(");
			for (i, segment) in path.segments().iter().enumerate() {
				if i > 0 {
					out.push('.');
				}
				if i == 0 {
					if let Some(position) = aliases.get(segment) {
						write!(out, "@{position}").expect("write to string");
						continue;
					}
				}
				out.push_str(segment);
			}
			out.push(')');
			out
		}
		Expression::And(items) => {
			let mut parts: Vec<String> = items.iter().map(|e| encode_expr(e, aliases)).collect();
			parts.sort();
			parts.dedup();
			format!("and({})", parts.join(","))
		}
		Expression::Or(items) => {
			let mut parts: Vec<String> = items.iter().map(|e| encode_expr(e, aliases)).collect();
			parts.sort();
			parts.dedup();
			format!("or({})", parts.join(","))
		}
		Expression::Not(inner) => format!("not({})", encode_expr(inner, aliases)),
		Expression::Compare { op, left, right } => {
			// <, <= normalize to flipped >, >=; = and != sort operands.
			let (op, left, right) = match op {
				CompareOp::Lt | CompareOp::Lte => (op.flipped(), right, left),
				_ => (*op, left, right),
			};
			let mut left = encode_expr(left, aliases);
			let mut right = encode_expr(right, aliases);
			if matches!(op, CompareOp::Eq | CompareOp::Neq) && right < left {
				std::mem::swap(&mut left, &mut right);
			}
			format!("cmp:{op:?}({left},{right})")
		}
		Expression::In { expr, list } => {
			let mut values: Vec<String> = list.iter().map(encode_value).collect();
			values.sort();
			values.dedup();
			format!("in({},[{}])", encode_expr(expr, aliases), values.join(","))
		}
		Expression::Func { name, args } => {
			let args: Vec<String> = args.iter().map(|e| encode_expr(e, aliases)).collect();
			format!("fn:{name}({})", args.join(","))
		}
		Expression::Aggregate { func, arg } => match arg {
			Some(arg) => format!("agg:{func:?}({})", encode_expr(arg, aliases)),
			None => format!("agg:{func:?}()"),
		},
	}
}

fn encode_projection(projection: &Projection, aliases: &HashMap<String, usize>) -> String {
	match projection {
		Projection::Expression(expr) => encode_expr(expr, aliases),
		Projection::Record(fields) => {
			let mut parts: Vec<String> = fields
				.iter()
				.map(|(name, child)| format!("{name}={}", encode_projection(child, aliases)))
				.collect();
			parts.sort();
			format!("rec({})", parts.join(","))
		}
		Projection::Spread(path) => {
			format!("spread({})", encode_expr(&Expression::Field(path.clone()), aliases))
		}
	}
}

#[cfg(test)]
mod tests {
	use rill_core::Timestamp;

	use super::fingerprint;
	use crate::{
		builder::query,
		dsl::*,
		ir::QuerySource,
	};

	struct FakeSource(&'static str);

	impl QuerySource for FakeSource {
		fn source_id(&self) -> String {
			self.0.to_string()
		}
	}

	#[test]
	fn test_commutative_clauses_fingerprint_equally() {
		let users = FakeSource("users");
		let a = query()
			.from("u", &users)
			.filter(and([eq(field(["u", "a"]), 1i64), eq(field(["u", "b"]), 2i64)]));
		let b = query()
			.from("u", &users)
			.filter(and([eq(field(["u", "b"]), 2i64), eq(field(["u", "a"]), 1i64)]));
		assert_eq!(fingerprint(a.ir()), fingerprint(b.ir()));
	}

	#[test]
	fn test_alias_renaming_is_irrelevant() {
		let users = FakeSource("users");
		let a = query().from("u", &users).filter(eq(field(["u", "age"]), 5i64));
		let b = query().from("person", &users).filter(eq(field(["person", "age"]), 5i64));
		assert_eq!(fingerprint(a.ir()), fingerprint(b.ir()));
	}

	#[test]
	fn test_distinct_collections_fingerprint_differently() {
		let users = FakeSource("users");
		let posts = FakeSource("posts");
		let a = query().from("u", &users);
		let b = query().from("u", &posts);
		assert_ne!(fingerprint(a.ir()), fingerprint(b.ir()));
	}

	#[test]
	fn test_flipped_ranges_fingerprint_equally() {
		let users = FakeSource("users");
		let a = query().from("u", &users).filter(gt(field(["u", "age"]), 5i64));
		let b = query().from("u", &users).filter(lt(val(5i64), field(["u", "age"])));
		assert_eq!(fingerprint(a.ir()), fingerprint(b.ir()));
	}

	#[test]
	fn test_timestamps_fingerprint_by_instant() {
		let users = FakeSource("users");
		let instant = || Timestamp::from_millis(1_700_000_000_000);
		let a = query().from("u", &users).filter(gt(field(["u", "created"]), instant()));
		let b = query().from("u", &users).filter(gt(field(["u", "created"]), instant()));
		let c = query()
			.from("u", &users)
			.filter(gt(field(["u", "created"]), Timestamp::from_millis(1_700_000_000_001)));
		assert_eq!(fingerprint(a.ir()), fingerprint(b.ir()));
		assert_ne!(fingerprint(a.ir()), fingerprint(c.ir()));
	}

	#[test]
	fn test_fn_select_never_shares_a_fingerprint() {
		let users = FakeSource("users");
		let a = query().from("u", &users).select_fn(|row| row.clone());
		let b = query().from("u", &users).select_fn(|row| row.clone());
		assert_ne!(fingerprint(a.ir()), fingerprint(b.ir()));
	}
}
