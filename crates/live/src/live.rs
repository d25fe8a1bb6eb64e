// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::{Duration, Instant},
};

use indexmap::IndexMap;
use parking_lot::Mutex;

use rill_collection::{
	ChangeCallback, Collection, CollectionConfig, SubscribeOptions, SubscriptionHandle, SyncWrite,
	SyncWriteKind,
};
use rill_core::{ChangeMessage, Key, OutputChange, Row};
use rill_query::{QueryBuilder, QueryIr, QuerySource, fingerprint};
use rill_scheduler::ContextId;

use crate::driver::{Driver, GraphConsumer, register_driver};

static LIVE_QUERY_SEQ: AtomicU64 = AtomicU64::new(1);

pub type ResultKeyFn = Arc<dyn Fn(&Row) -> Key + Send + Sync>;

pub struct LiveQueryOptions {
	pub id: Option<String>,
	/// Derive result keys from the projected row; without it, each output
	/// row keeps its origin tuple key.
	pub get_key: Option<ResultKeyFn>,
	/// How long a subscriber-less live query keeps its graph compiled.
	/// Zero tears down on the last unsubscribe.
	pub gc_time: Duration,
}

impl Default for LiveQueryOptions {
	fn default() -> Self {
		LiveQueryOptions {
			id: None,
			get_key: None,
			gc_time: Duration::from_secs(5),
		}
	}
}

struct LiveConsumer {
	result: Collection,
	get_key: Option<ResultKeyFn>,
	/// Fractional order index per result key, backing ordered reads.
	order_keys: Mutex<HashMap<Key, String>>,
}

impl LiveConsumer {
	fn result_key(&self, origin: &Key, row: &Row) -> Key {
		match &self.get_key {
			Some(get_key) => get_key(row),
			None => origin.clone(),
		}
	}
}

impl GraphConsumer for LiveConsumer {
	fn consume(&self, changes: Vec<OutputChange>, context: Option<ContextId>) {
		let mut writes = Vec::with_capacity(changes.len());
		{
			let mut order_keys = self.order_keys.lock();
			for change in changes {
				match change {
					OutputChange::Enter { key, value, order_index } => {
						let result_key = self.result_key(&key, &value);
						if let Some(index) = order_index {
							order_keys.insert(result_key.clone(), index);
						}
						writes.push(SyncWrite {
							kind: SyncWriteKind::Insert,
							key: Some(result_key),
							value: Some(value),
						});
					}
					OutputChange::Update { key, value, previous, order_index } => {
						let result_key = self.result_key(&key, &value);
						let previous_key = self.result_key(&key, &previous);
						if previous_key != result_key {
							// A projection-derived key moved: the old
							// row leaves, the new one enters.
							order_keys.remove(&previous_key);
							writes.push(SyncWrite {
								kind: SyncWriteKind::Delete,
								key: Some(previous_key),
								value: None,
							});
						}
						if let Some(index) = order_index {
							order_keys.insert(result_key.clone(), index);
						}
						writes.push(SyncWrite {
							kind: SyncWriteKind::Update,
							key: Some(result_key),
							value: Some(value),
						});
					}
					OutputChange::Exit { key, previous } => {
						let result_key = self.result_key(&key, &previous);
						order_keys.remove(&result_key);
						writes.push(SyncWrite {
							kind: SyncWriteKind::Delete,
							key: Some(result_key),
							value: None,
						});
					}
				}
			}
		}
		if let Err(err) = self.result.apply_batch_with_context(writes, context) {
			tracing::error!(collection = self.result.id(), error = %err, "result write failed");
		}
	}

	fn reset(&self) {
		let writes: Vec<SyncWrite> = self
			.result
			.keys()
			.into_iter()
			.map(|key| SyncWrite {
				kind: SyncWriteKind::Delete,
				key: Some(key),
				value: None,
			})
			.collect();
		self.order_keys.lock().clear();
		if let Err(err) = self.result.apply_batch_with_context(writes, None) {
			tracing::error!(collection = self.result.id(), error = %err, "result reset failed");
		}
	}
}

/// A query materialized as a first-class collection: subscribable,
/// readable, and usable as a source for further queries.
#[derive(Clone)]
pub struct LiveQueryCollection {
	driver: Driver,
	consumer: Arc<LiveConsumer>,
	ir: Arc<QueryIr>,
	gc_time: Duration,
	idle_since: Arc<Mutex<Option<Instant>>>,
}

/// Build the live, incrementally-maintained result of a query.
///
/// Compilation errors (unknown aliases, missing sources) surface here,
/// synchronously.
pub fn create_live_query(builder: &QueryBuilder) -> rill_core::Result<LiveQueryCollection> {
	create_live_query_with(builder, LiveQueryOptions::default())
}

pub fn create_live_query_with(
	builder: &QueryBuilder,
	options: LiveQueryOptions,
) -> rill_core::Result<LiveQueryCollection> {
	let ir = builder.build()?;
	create_live_query_from_ir(ir, options)
}

/// Variant accepting a pre-built IR.
pub fn create_live_query_from_ir(
	ir: Arc<QueryIr>,
	options: LiveQueryOptions,
) -> rill_core::Result<LiveQueryCollection> {
	let id = options
		.id
		.unwrap_or_else(|| format!("live-query-{}", LIVE_QUERY_SEQ.fetch_add(1, Ordering::Relaxed)));

	let result = Collection::new(CollectionConfig::new(|_row: &Row| Key::Undefined).with_id(&id));
	let consumer = Arc::new(LiveConsumer {
		result: result.clone(),
		get_key: options.get_key,
		order_keys: Mutex::new(HashMap::new()),
	});
	let driver = Driver::new(&id, Arc::clone(&ir), Arc::clone(&consumer) as Arc<dyn GraphConsumer>);
	register_driver(&id, &driver);
	driver.activate()?;

	Ok(LiveQueryCollection {
		driver,
		consumer,
		ir,
		gc_time: options.gc_time,
		idle_since: Arc::new(Mutex::new(None)),
	})
}

impl LiveQueryCollection {
	pub fn id(&self) -> String {
		self.consumer.result.id().to_string()
	}

	/// The backing result collection (read access).
	pub fn collection(&self) -> &Collection {
		&self.consumer.result
	}

	pub fn query(&self) -> &Arc<QueryIr> {
		&self.ir
	}

	pub fn fingerprint(&self) -> u64 {
		fingerprint(&self.ir)
	}

	pub fn get(&self, key: impl Into<Key>) -> Option<Row> {
		self.consumer.result.get(key)
	}

	pub fn size(&self) -> usize {
		self.consumer.result.size()
	}

	pub fn state(&self) -> IndexMap<Key, Row> {
		self.consumer.result.state()
	}

	/// Result keys in query order when the query has an order-by,
	/// otherwise in write order.
	pub fn keys_ordered(&self) -> Vec<Key> {
		let order_keys = self.consumer.order_keys.lock();
		let mut keys: Vec<Key> = self.consumer.result.keys();
		if !order_keys.is_empty() {
			keys.sort_by(|a, b| match (order_keys.get(a), order_keys.get(b)) {
				(Some(ai), Some(bi)) => ai.cmp(bi),
				(Some(_), None) => std::cmp::Ordering::Less,
				(None, Some(_)) => std::cmp::Ordering::Greater,
				(None, None) => a.cmp(b),
			});
		}
		keys
	}

	/// Rows in query order.
	pub fn to_array(&self) -> Vec<Row> {
		let state = self.consumer.result.state();
		self.keys_ordered().into_iter().filter_map(|key| state.get(&key).cloned()).collect()
	}

	/// Subscribe to result changes, re-activating the graph when it was
	/// garbage collected.
	pub fn subscribe_changes(
		&self,
		callback: impl FnMut(&[ChangeMessage]) -> rill_core::Result<()> + Send + 'static,
		options: SubscribeOptions,
	) -> rill_core::Result<LiveSubscription> {
		self.driver.activate()?;
		*self.idle_since.lock() = None;
		let handle = self.consumer.result.subscribe_changes(callback, options);
		Ok(LiveSubscription {
			handle,
			live: self.clone(),
		})
	}

	/// Context-aware subscription used by downstream live queries.
	pub fn subscribe_with_context(
		&self,
		callback: ChangeCallback,
		options: SubscribeOptions,
	) -> rill_core::Result<LiveSubscription> {
		self.driver.activate()?;
		*self.idle_since.lock() = None;
		let handle = self.consumer.result.subscribe_with_context(callback, options);
		Ok(LiveSubscription {
			handle,
			live: self.clone(),
		})
	}

	pub fn is_compiled(&self) -> bool {
		self.driver.is_active()
	}

	/// Zero-subscriber GC: tear down source subscriptions and release
	/// the graph once the idle time passes; the next subscribe
	/// recompiles.
	fn maybe_gc(&self) {
		if self.consumer.result.subscription_count() > 0 {
			return;
		}
		let mut idle_since = self.idle_since.lock();
		match *idle_since {
			None => {
				*idle_since = Some(Instant::now());
				if self.gc_time.is_zero() {
					drop(idle_since);
					self.driver.deactivate();
				}
			}
			Some(since) => {
				if since.elapsed() >= self.gc_time {
					drop(idle_since);
					self.driver.deactivate();
				}
			}
		}
	}
}

impl QuerySource for LiveQueryCollection {
	fn source_id(&self) -> String {
		self.consumer.result.id().to_string()
	}
}

/// Subscription handle that feeds the live query's GC when released.
pub struct LiveSubscription {
	handle: SubscriptionHandle,
	live: LiveQueryCollection,
}

impl LiveSubscription {
	pub fn unsubscribe(&self) {
		self.handle.unsubscribe();
		self.live.maybe_gc();
	}
}
