// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::warn;

use rill_core::{ChangeKind, ChangeMessage, Key, Row};
use rill_query::{Expression, matches};
use rill_scheduler::ContextId;

/// Delivered a filtered batch; the context identifies the transaction the
/// batch belongs to, if any. Errors are routed to the subscription's
/// error hook, or logged.
pub type ChangeCallback = Box<dyn FnMut(&[ChangeMessage], Option<ContextId>) -> rill_core::Result<()> + Send>;

pub type ErrorCallback = Box<dyn Fn(&rill_core::Error) + Send + Sync>;

pub struct SubscribeOptions {
	pub include_initial_state: bool,
	pub where_expression: Option<Expression>,
	/// Load shape to request from the adapter instead of the bare
	/// where-clause; windowed live queries pass their
	/// `{where, orderBy, limit}` triple here.
	pub load: Option<rill_query::Predicate>,
	pub on_error: Option<ErrorCallback>,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		SubscribeOptions {
			include_initial_state: false,
			where_expression: None,
			load: None,
			on_error: None,
		}
	}
}

pub(crate) struct SubscriptionState {
	pub id: u64,
	pub predicate: Option<Expression>,
	sent_keys: Mutex<HashSet<Key>>,
	callback: Mutex<ChangeCallback>,
	/// Batches that arrived while the callback was already running on
	/// this thread; the running delivery drains them in order.
	pending: Mutex<std::collections::VecDeque<(Vec<ChangeMessage>, Option<ContextId>)>>,
	on_error: Option<ErrorCallback>,
}

impl SubscriptionState {
	pub fn new(id: u64, predicate: Option<Expression>, callback: ChangeCallback, on_error: Option<ErrorCallback>) -> Self {
		SubscriptionState {
			id,
			predicate,
			sent_keys: Mutex::new(HashSet::new()),
			callback: Mutex::new(callback),
			pending: Mutex::new(std::collections::VecDeque::new()),
			on_error,
		}
	}

	fn row_matches(&self, row: Option<&Row>) -> bool {
		match (&self.predicate, row) {
			(None, _) => true,
			(Some(_), None) => false,
			(Some(predicate), Some(row)) => matches(predicate, row),
		}
	}

	/// Filter one broadcast batch down to what this subscriber should
	/// see, translating updates that cross the predicate boundary into
	/// inserts or deletes, and suppressing duplicate inserts per key.
	fn filter(&self, messages: &[ChangeMessage]) -> Vec<ChangeMessage> {
		let mut sent_keys = self.sent_keys.lock();
		let mut out = Vec::new();
		for message in messages {
			let new_matches = self.row_matches(message.value.as_ref());
			// Whether the subscriber saw the old value is tracked via
			// sent_keys, which also covers predicate-filtered history.
			let delivered = sent_keys.contains(&message.key);

			let kind = match message.kind {
				ChangeKind::Insert if new_matches => Some(ChangeKind::Insert),
				ChangeKind::Insert => None,
				ChangeKind::Delete if delivered => Some(ChangeKind::Delete),
				ChangeKind::Delete => None,
				ChangeKind::Update => match (delivered, new_matches) {
					(false, true) => Some(ChangeKind::Insert),
					(true, true) => Some(ChangeKind::Update),
					(true, false) => Some(ChangeKind::Delete),
					(false, false) => None,
				},
			};

			let Some(kind) = kind else {
				continue;
			};
			match kind {
				ChangeKind::Insert => {
					// At-most-once insert per key between deletes.
					if !sent_keys.insert(message.key.clone()) {
						continue;
					}
					out.push(ChangeMessage {
						kind: ChangeKind::Insert,
						key: message.key.clone(),
						value: message.value.clone(),
						previous_value: None,
						metadata: message.metadata.clone(),
					});
				}
				ChangeKind::Update => {
					out.push(message.clone());
				}
				ChangeKind::Delete => {
					sent_keys.remove(&message.key);
					out.push(ChangeMessage {
						kind: ChangeKind::Delete,
						key: message.key.clone(),
						value: None,
						previous_value: message
							.previous_value
							.clone()
							.or_else(|| message.value.clone()),
						metadata: message.metadata.clone(),
					});
				}
			}
		}
		out
	}

	pub fn deliver(&self, messages: &[ChangeMessage], context: Option<ContextId>) {
		let filtered = self.filter(messages);
		if filtered.is_empty() {
			return;
		}
		self.pending.lock().push_back((filtered, context));

		// A callback may cause further deliveries to this subscription
		// (a load triggered from inside it commits new rows). Those
		// batches queue above and the active delivery picks them up.
		let Some(mut callback) = self.callback.try_lock() else {
			return;
		};
		loop {
			let batch = self.pending.lock().pop_front();
			let Some((batch, context)) = batch else {
				break;
			};
			if let Err(err) = callback(&batch, context) {
				match &self.on_error {
					Some(on_error) => on_error(&err),
					None => {
						warn!(subscription = self.id, error = %err, "subscription callback failed")
					}
				}
			}
		}
	}

	/// Prime a fresh subscription with synthetic inserts for every
	/// currently visible matching row.
	pub fn prime(&self, rows: impl Iterator<Item = (Key, Row)>) {
		let messages: Vec<ChangeMessage> = rows
			.filter(|(_, row)| self.row_matches(Some(row)))
			.map(|(key, row)| ChangeMessage::insert(key, row))
			.collect();
		if messages.is_empty() {
			return;
		}
		self.deliver(&messages, None);
	}

	pub fn release(&self) {
		self.sent_keys.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use rill_core::{ChangeKind, ChangeMessage, Key, Row, Value};
	use rill_query::dsl::*;

	use super::SubscriptionState;

	fn active_user(active: bool) -> Row {
		Row::from_pairs([("active", Value::Boolean(active))])
	}

	fn collecting() -> (Arc<Mutex<Vec<ChangeMessage>>>, super::ChangeCallback) {
		let seen: Arc<Mutex<Vec<ChangeMessage>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let callback: super::ChangeCallback = Box::new(move |messages, _| {
			sink.lock().unwrap().extend_from_slice(messages);
			Ok(())
		});
		(seen, callback)
	}

	#[test]
	fn test_duplicate_insert_suppression() {
		let (seen, callback) = collecting();
		let sub = SubscriptionState::new(1, None, callback, None);
		let insert = ChangeMessage::insert(Key::Int(1), active_user(true));
		sub.deliver(&[insert.clone()], None);
		sub.deliver(&[insert.clone()], None);
		assert_eq!(seen.lock().unwrap().len(), 1);

		sub.deliver(&[ChangeMessage::delete(Key::Int(1), active_user(true))], None);
		sub.deliver(&[insert], None);
		assert_eq!(seen.lock().unwrap().len(), 3, "insert allowed again after delete");
	}

	#[test]
	fn test_update_crossing_predicate_becomes_delete() {
		let (seen, callback) = collecting();
		let sub = SubscriptionState::new(1, Some(eq(field(["active"]), true)), callback, None);
		sub.deliver(&[ChangeMessage::insert(Key::Int(1), active_user(true))], None);
		sub.deliver(&[ChangeMessage::update(Key::Int(1), active_user(false), active_user(true))], None);

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[1].kind, ChangeKind::Delete);
	}

	#[test]
	fn test_update_entering_predicate_becomes_insert() {
		let (seen, callback) = collecting();
		let sub = SubscriptionState::new(1, Some(eq(field(["active"]), true)), callback, None);
		sub.deliver(&[ChangeMessage::insert(Key::Int(1), active_user(false))], None);
		sub.deliver(&[ChangeMessage::update(Key::Int(1), active_user(true), active_user(false))], None);

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].kind, ChangeKind::Insert);
	}

	#[test]
	fn test_delete_for_never_seen_key_is_dropped() {
		let (seen, callback) = collecting();
		let sub = SubscriptionState::new(1, Some(eq(field(["active"]), true)), callback, None);
		sub.deliver(&[ChangeMessage::delete(Key::Int(9), active_user(false))], None);
		assert!(seen.lock().unwrap().is_empty());
	}
}
