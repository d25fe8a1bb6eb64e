// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use rill_core::{Delta, Key, Row, Value};
use rill_flow::{OperatorKind, compile};
use rill_query::{JoinKind, QuerySource, dsl::*, query};

struct FakeSource(&'static str);

impl QuerySource for FakeSource {
	fn source_id(&self) -> String {
		self.0.to_string()
	}
}

fn user(id: i64, name: &str, dept: Option<i64>) -> (Key, Row) {
	let mut row = Row::from_pairs([("id", Value::Int(id)), ("name", Value::text(name))]);
	row.set("dept", dept.map(Value::Int).unwrap_or(Value::Undefined));
	(Key::Int(id), row)
}

fn dept(id: i64, name: &str) -> (Key, Row) {
	(Key::Int(id), Row::from_pairs([("id", Value::Int(id)), ("name", Value::text(name))]))
}

/// Compile, attach a collecting sink, finalize and return (graph, sink).
fn prepare(
	ir: &rill_query::QueryIr,
) -> (rill_flow::FlowGraph, Arc<Mutex<Vec<Delta>>>, rill_flow::CompileContext) {
	let compiled = compile(ir).expect("query compiles");
	let mut graph = compiled.graph;
	let collected: Arc<Mutex<Vec<Delta>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&collected);
	graph.add_operator(
		OperatorKind::output(move |deltas: Vec<Delta>| sink.lock().unwrap().extend(deltas)),
		&[compiled.tail],
	)
	.expect("output attaches");
	graph.finalize();
	(graph, collected, compiled.context)
}

fn result_size(deltas: &[Delta]) -> usize {
	let mut weights: IndexMap<Key, i64> = IndexMap::new();
	for delta in deltas {
		*weights.entry(delta.key.clone()).or_default() += delta.weight;
	}
	weights.values().filter(|w| **w > 0).count()
}

#[test]
fn test_filter_and_select_single_source() {
	let users = FakeSource("users");
	let q = query()
		.from("u", &users)
		.filter(eq(field(["u", "active"]), true))
		.select([("name", field(["u", "name"]))]);
	let (mut graph, collected, context) = prepare(q.ir());

	assert_eq!(
		context.source_where_clauses.get("u"),
		Some(&eq(field(["active"]), true)),
		"pushdown predicate is recorded against bare rows"
	);

	let row = |name: &str, active: bool| {
		Row::from_pairs([("name", Value::text(name)), ("active", Value::Boolean(active))])
	};
	graph.send("u", [
		Delta::insert(Key::Int(1), row("alice", true)),
		Delta::insert(Key::Int(2), row("bob", false)),
	])
	.unwrap();
	graph.run().unwrap();

	let out = collected.lock().unwrap();
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].row, Row::from_pairs([("name", Value::text("alice"))]));
}

#[test]
fn test_self_join_produces_pairs_not_products() {
	let users = FakeSource("users");
	let q = query()
		.from("c", &users)
		.inner_join("p", &users, eq(field(["c", "parent"]), field(["p", "id"])))
		.select([
			("user_name", field(["c", "name"])),
			("parent_name", field(["p", "name"])),
		]);
	let (mut graph, collected, _) = prepare(q.ir());

	let person = |id: i64, name: &str, parent: Option<i64>| {
		let mut row = Row::from_pairs([("id", Value::Int(id)), ("name", Value::text(name))]);
		row.set("parent", parent.map(Value::Int).unwrap_or(Value::Undefined));
		(Key::Int(id), row)
	};
	let people = [
		person(1, "Alice", None),
		person(2, "Bob", Some(1)),
		person(3, "Charlie", Some(1)),
		person(4, "Dave", Some(2)),
		person(5, "Eve", Some(3)),
	];

	for alias in ["c", "p"] {
		graph.send(alias, people.iter().map(|(key, row)| Delta::insert(key.clone(), row.clone())))
			.unwrap();
	}
	graph.run().unwrap();

	let out = collected.lock().unwrap();
	assert_eq!(result_size(&out), 4, "one row per parent link, never N^2");

	let pairs: Vec<(String, String)> = out
		.iter()
		.filter(|d| d.weight > 0)
		.map(|d| {
			(
				d.row.get("user_name").unwrap().to_string(),
				d.row.get("parent_name").unwrap().to_string(),
			)
		})
		.collect();
	assert!(pairs.contains(&("Bob".to_string(), "Alice".to_string())));
	assert!(pairs.contains(&("Charlie".to_string(), "Alice".to_string())));
	assert!(pairs.contains(&("Dave".to_string(), "Bob".to_string())));
	assert!(pairs.contains(&("Eve".to_string(), "Charlie".to_string())));
}

#[test]
fn test_self_join_large_tree() {
	let users = FakeSource("users");
	let q = query()
		.from("c", &users)
		.inner_join("p", &users, eq(field(["c", "parent"]), field(["p", "id"])));
	let (mut graph, collected, _) = prepare(q.ir());

	let rows: Vec<(Key, Row)> = (1..=100)
		.map(|i| {
			let parent = i / 2;
			let mut row = Row::from_pairs([("id", Value::Int(i)), ("name", Value::text(format!("n{i}")))]);
			row.set("parent", if parent >= 1 {
				Value::Int(parent)
			} else {
				Value::Undefined
			});
			(Key::Int(i), row)
		})
		.collect();

	for alias in ["c", "p"] {
		graph.send(alias, rows.iter().map(|(key, row)| Delta::insert(key.clone(), row.clone())))
			.unwrap();
	}
	graph.run().unwrap();

	assert_eq!(result_size(&collected.lock().unwrap()), 99);
}

fn join_fixture(kind: JoinKind) -> usize {
	let users = FakeSource("users");
	let depts = FakeSource("departments");
	let base = query().from("u", &users);
	let q = match kind {
		JoinKind::Cross => base.cross_join("d", &depts),
		kind => base.join(kind, "d", &depts, eq(field(["u", "dept"]), field(["d", "id"]))),
	};
	let (mut graph, collected, _) = prepare(q.ir());

	graph.send("u", [
		user(1, "alice", Some(10)),
		user(2, "bob", Some(10)),
		user(3, "carol", Some(20)),
		user(4, "dave", Some(99)),
	]
	.into_iter()
	.map(|(key, row)| Delta::insert(key, row)))
	.unwrap();
	graph.send("d", [dept(10, "eng"), dept(20, "ops"), dept(30, "empty")]
		.into_iter()
		.map(|(key, row)| Delta::insert(key, row)))
		.unwrap();
	graph.run().unwrap();

	result_size(&collected.lock().unwrap())
}

#[test]
fn test_join_type_matrix() {
	assert_eq!(join_fixture(JoinKind::Inner), 3);
	assert_eq!(join_fixture(JoinKind::Left), 4);
	assert_eq!(join_fixture(JoinKind::Right), 4);
	assert_eq!(join_fixture(JoinKind::Full), 5);
	assert_eq!(join_fixture(JoinKind::Cross), 12);
}

#[test]
fn test_order_by_limit_is_optimizable() {
	let users = FakeSource("users");
	let q = query().from("u", &users).order_by(field(["u", "score"])).limit(10).offset(5);
	let compiled = compile(q.ir()).unwrap();
	let optimizable = compiled.context.optimizable_order_by.expect("single-source window is optimizable");
	assert_eq!(optimizable.alias, "u");
	assert_eq!(optimizable.limit, 10);
	assert_eq!(optimizable.offset, 5);
	assert_eq!(optimizable.order_by[0].expression, field(["score"]));
}

#[test]
fn test_joined_order_by_limit_is_not_optimizable() {
	let users = FakeSource("users");
	let depts = FakeSource("departments");
	let q = query()
		.from("u", &users)
		.inner_join("d", &depts, eq(field(["u", "dept"]), field(["d", "id"])))
		.order_by(field(["u", "score"]))
		.limit(10);
	let compiled = compile(q.ir()).unwrap();
	assert!(compiled.context.optimizable_order_by.is_none());
}

#[test]
fn test_group_by_aggregation() {
	let sales = FakeSource("sales");
	let q = query()
		.from("s", &sales)
		.group_by([field(["s", "dept"])])
		.select([
			("dept", field(["s", "dept"])),
			("total", sum(field(["s", "amount"]))),
			("orders", count()),
		]);
	let (mut graph, collected, _) = prepare(q.ir());

	let sale = |id: i64, dept: &str, amount: i64| {
		Delta::insert(
			Key::Int(id),
			Row::from_pairs([("dept", Value::text(dept)), ("amount", Value::Int(amount))]),
		)
	};
	graph.send("s", [sale(1, "eng", 10), sale(2, "eng", 20), sale(3, "ops", 5)]).unwrap();
	graph.run().unwrap();

	let out = collected.lock().unwrap();
	let eng = out
		.iter()
		.filter(|d| d.weight > 0)
		.find(|d| d.row.get("dept") == Some(&Value::text("eng")))
		.expect("eng group present");
	assert_eq!(eng.row.get("total"), Some(&Value::Int(30)));
	assert_eq!(eng.row.get("orders"), Some(&Value::Int(2)));
}

#[test]
fn test_subquery_as_source() {
	let users = FakeSource("users");
	let active = query().from("u", &users).filter(eq(field(["u", "active"]), true));
	let q = query().from_query("a", &active).select([("name", field(["a", "name"]))]);
	let (mut graph, collected, context) = prepare(&q.build().unwrap());

	assert_eq!(
		context.alias_to_collection.get("a.u").map(String::as_str),
		Some("users"),
		"nested input is qualified by the subquery alias"
	);

	let row = |name: &str, active: bool| {
		Row::from_pairs([("name", Value::text(name)), ("active", Value::Boolean(active))])
	};
	graph.send("a.u", [
		Delta::insert(Key::Int(1), row("alice", true)),
		Delta::insert(Key::Int(2), row("bob", false)),
	])
	.unwrap();
	graph.run().unwrap();

	let out = collected.lock().unwrap();
	assert_eq!(out.len(), 1);
	assert_eq!(out[0].row.get("name"), Some(&Value::text("alice")));
}
