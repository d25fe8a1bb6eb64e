// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{Arc, Mutex};

use rill_collection::{
	Collection, CollectionConfig, CollectionStatus, SubscribeOptions, SyncAdapter, SyncWrite, SyncWriter,
	Transaction, TransactionState,
};
use rill_core::{ChangeKind, ChangeMessage, Error, Key, Row, Value};
use rill_query::{LoadSubsetOptions, dsl::*};

fn user(id: i64, name: &str, age: i64, active: bool) -> Row {
	Row::from_pairs([
		("id", Value::Int(id)),
		("name", Value::text(name)),
		("age", Value::Int(age)),
		("active", Value::Boolean(active)),
	])
}

fn users_collection() -> Collection {
	Collection::new(CollectionConfig::keyed_by("id"))
}

fn record_changes(collection: &Collection) -> Arc<Mutex<Vec<ChangeMessage>>> {
	let seen: Arc<Mutex<Vec<ChangeMessage>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	collection.subscribe_changes(
		move |messages| {
			sink.lock().unwrap().extend_from_slice(messages);
			Ok(())
		},
		SubscribeOptions::default(),
	);
	seen
}

#[test]
fn test_insert_update_delete_roundtrip() {
	let collection = users_collection();
	let seen = record_changes(&collection);

	collection.insert(user(1, "alice", 25, true)).unwrap();
	collection.update(Key::Int(1), |row| {
		row.set("age", Value::Int(26));
	})
	.unwrap();
	collection.delete(Key::Int(1)).unwrap();

	assert_eq!(collection.size(), 0, "state is empty after the roundtrip");
	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 3);
	assert_eq!(seen[0].kind, ChangeKind::Insert);
	assert_eq!(seen[1].kind, ChangeKind::Update);
	assert_eq!(seen[2].kind, ChangeKind::Delete);
}

#[test]
fn test_duplicate_insert_is_rejected() {
	let collection = users_collection();
	collection.insert(user(1, "alice", 25, true)).unwrap();
	let err = collection.insert(user(1, "alice2", 30, true)).unwrap_err();
	assert!(matches!(err, Error::DuplicateKey(_)));
}

#[test]
fn test_update_missing_key_is_rejected() {
	let collection = users_collection();
	let err = collection
		.update(Key::Int(9), |row| {
			row.set("age", Value::Int(1));
		})
		.unwrap_err();
	assert!(matches!(err, Error::KeyNotFound(_)));
}

#[test]
fn test_schema_violation_applies_nothing() {
	let collection = Collection::new(CollectionConfig::keyed_by("id").with_schema(|row| {
		match row.get("age") {
			Some(Value::Int(age)) if *age >= 0 => Ok(()),
			_ => Err(Error::SchemaViolation("age must be a non-negative integer".to_string())),
		}
	}));
	let err = collection.insert(user(1, "alice", -1, true)).unwrap_err();
	assert!(matches!(err, Error::SchemaViolation(_)));
	assert_eq!(collection.size(), 0);
}

#[test]
fn test_subscription_replay_primes_initial_state() {
	let collection = users_collection();
	collection.insert(user(1, "alice", 25, true)).unwrap();
	collection.insert(user(2, "bob", 19, false)).unwrap();

	let seen: Arc<Mutex<Vec<ChangeMessage>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	collection.subscribe_changes(
		move |messages| {
			sink.lock().unwrap().extend_from_slice(messages);
			Ok(())
		},
		SubscribeOptions {
			include_initial_state: true,
			..Default::default()
		},
	);

	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 2);
	assert!(seen.iter().all(|m| m.kind == ChangeKind::Insert));
}

#[test]
fn test_filtered_subscription_translates_boundary_updates() {
	let collection = users_collection();
	collection.insert(user(2, "bob", 19, true)).unwrap();

	let seen: Arc<Mutex<Vec<ChangeMessage>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	collection.subscribe_changes(
		move |messages| {
			sink.lock().unwrap().extend_from_slice(messages);
			Ok(())
		},
		SubscribeOptions {
			include_initial_state: true,
			where_expression: Some(eq(field(["active"]), true)),
			..Default::default()
		},
	);

	collection.update(Key::Int(2), |row| {
		row.set("active", Value::Boolean(false));
	})
	.unwrap();

	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 2);
	assert_eq!(seen[0].kind, ChangeKind::Insert);
	assert_eq!(seen[1].kind, ChangeKind::Delete, "leaving the predicate reads as a delete");
}

#[test]
fn test_transaction_batches_and_commits() {
	let collection = users_collection();
	let seen = record_changes(&collection);

	let tx = Transaction::new();
	tx.mutate(|| {
		collection.insert(user(1, "alice", 25, true)).unwrap();
		collection.insert(user(2, "bob", 19, true)).unwrap();
	});
	assert_eq!(collection.size(), 2, "overlay is visible before commit");
	tx.commit().unwrap();
	assert_eq!(tx.state(), TransactionState::Completed);
	assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn test_failed_handler_reverts_overlay_with_reversals() {
	let collection = Collection::new(
		CollectionConfig::keyed_by("id")
			.with_on_insert(|_| Err(Error::AdapterFailure("backend rejected".to_string()))),
	);
	let seen = record_changes(&collection);

	let err = collection.insert(user(1, "alice", 25, true)).unwrap_err();
	assert!(matches!(err, Error::AdapterFailure(_)));
	assert_eq!(collection.size(), 0, "overlay reverted");

	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 2);
	assert_eq!(seen[0].kind, ChangeKind::Insert);
	assert_eq!(seen[1].kind, ChangeKind::Delete, "subscribers see the reversal");
}

#[test]
fn test_explicit_rollback_reverts() {
	let collection = users_collection();
	let tx = Transaction::new();
	tx.mutate(|| {
		collection.insert(user(1, "alice", 25, true)).unwrap();
	});
	tx.rollback();
	assert_eq!(tx.state(), TransactionState::Failed);
	assert_eq!(collection.size(), 0);
}

struct ScriptedAdapter {
	initial: Vec<Row>,
	loads: Arc<Mutex<Vec<LoadSubsetOptions>>>,
}

impl SyncAdapter for ScriptedAdapter {
	fn start(&mut self, writer: SyncWriter) -> rill_core::Result<()> {
		writer.begin();
		for row in self.initial.drain(..) {
			writer.write(SyncWrite::insert(row));
		}
		writer.commit()?;
		writer.mark_ready();
		Ok(())
	}

	fn load_subset(&mut self, options: &LoadSubsetOptions) -> rill_core::Result<()> {
		self.loads.lock().unwrap().push(options.clone());
		Ok(())
	}
}

#[test]
fn test_sync_adapter_populates_and_marks_ready() {
	let loads = Arc::new(Mutex::new(Vec::new()));
	let collection = Collection::new(CollectionConfig::keyed_by("id").with_sync(ScriptedAdapter {
		initial: vec![user(1, "alice", 25, true), user(2, "bob", 19, false)],
		loads: Arc::clone(&loads),
	}));

	assert_eq!(collection.status(), CollectionStatus::Ready);
	assert_eq!(collection.size(), 2);
}

#[test]
fn test_load_reuse_for_subset_predicates() {
	let loads = Arc::new(Mutex::new(Vec::new()));
	let collection = Collection::new(CollectionConfig::keyed_by("id").with_sync(ScriptedAdapter {
		initial: vec![],
		loads: Arc::clone(&loads),
	}));

	collection.subscribe_changes(
		|_| Ok(()),
		SubscribeOptions {
			where_expression: Some(gt(field(["age"]), 10i64)),
			..Default::default()
		},
	);
	assert_eq!(loads.lock().unwrap().len(), 1, "first predicate loads");

	collection.subscribe_changes(
		|_| Ok(()),
		SubscribeOptions {
			where_expression: Some(gt(field(["age"]), 20i64)),
			..Default::default()
		},
	);
	assert_eq!(loads.lock().unwrap().len(), 1, "narrower predicate reuses the loaded data");

	collection.subscribe_changes(
		|_| Ok(()),
		SubscribeOptions {
			where_expression: Some(gt(field(["age"]), 5i64)),
			..Default::default()
		},
	);
	assert_eq!(loads.lock().unwrap().len(), 2, "wider predicate issues a new load");
}

#[test]
fn test_sync_mirror_discards_completed_overlay() {
	let collection = Collection::new(CollectionConfig::keyed_by("id").with_sync(ScriptedAdapter {
		initial: vec![],
		loads: Arc::new(Mutex::new(Vec::new())),
	}));
	let seen = record_changes(&collection);

	collection.insert(user(1, "alice", 25, true)).unwrap();

	// The backend mirrors the committed insert; replaying it twice is a
	// no-op for subscribers.
	for _ in 0..2 {
		let writer = collection.writer();
		writer.begin();
		writer.write(SyncWrite::insert(user(1, "alice", 25, true)));
		writer.commit().unwrap();
	}

	assert_eq!(collection.size(), 1);
	assert_eq!(seen.lock().unwrap().len(), 1, "mirror and replay produce no extra events");
}

#[test]
fn test_cleanup_tears_down() {
	let collection = users_collection();
	collection.insert(user(1, "alice", 25, true)).unwrap();
	collection.cleanup();

	assert_eq!(collection.status(), CollectionStatus::CleanedUp);
	assert!(matches!(collection.insert(user(2, "bob", 19, true)), Err(Error::CollectionCleanedUp(_))));
}

#[test]
fn test_status_listener_fires() {
	let statuses: Arc<Mutex<Vec<CollectionStatus>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&statuses);
	let collection = users_collection();
	collection.on_status_change(move |status| sink.lock().unwrap().push(status));
	collection.cleanup();
	assert_eq!(*statuses.lock().unwrap(), vec![CollectionStatus::CleanedUp]);
}

#[test]
fn test_partial_row_update_mode_merges() {
	struct PartialAdapter;

	impl SyncAdapter for PartialAdapter {
		fn start(&mut self, writer: SyncWriter) -> rill_core::Result<()> {
			writer.begin();
			writer.write(SyncWrite::insert(user(1, "alice", 25, true)));
			writer.commit()?;
			writer.mark_ready();
			Ok(())
		}

		fn row_update_mode(&self) -> rill_collection::RowUpdateMode {
			rill_collection::RowUpdateMode::Partial
		}
	}

	let collection = Collection::new(CollectionConfig::keyed_by("id").with_sync(PartialAdapter));
	let writer = collection.writer();
	writer.begin();
	writer.write(SyncWrite::update(Row::from_pairs([("id", Value::Int(1)), ("age", Value::Int(26))])));
	writer.commit().unwrap();

	let row = collection.get(Key::Int(1)).unwrap();
	assert_eq!(row.get("age"), Some(&Value::Int(26)));
	assert_eq!(row.get("name"), Some(&Value::text("alice")), "untouched fields survive a partial update");
}
