// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::VecDeque,
	sync::{
		Arc, Weak,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use rill_core::{ChangeMessage, Error, Key, Row, Value};
use rill_query::{Expression, LoadSubsetOptions, Predicate, QuerySource, is_predicate_subset};
use rill_scheduler::ContextId;

use crate::{
	adapter::{MutationContext, MutationHandlers, RowUpdateMode, SyncAdapter, SyncWrite, SyncWriteKind, SyncWriter},
	catalog,
	index::{IndexDescriptor, IndexRegistry},
	subscription::{ChangeCallback, SubscribeOptions, SubscriptionState},
	transaction::{PendingMutation, Transaction, TransactionState, current_transaction},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
	/// Created with a sync adapter that has not started yet.
	Idle,
	/// The adapter is starting.
	Loading,
	/// First sync batch seen, ready signal still pending.
	InitialCommit,
	Ready,
	/// The adapter failed to start.
	Error,
	CleanedUp,
}

/// Extra per-mutation options.
#[derive(Default)]
pub struct MutateOptions {
	/// Opaque payload forwarded to subscribers and mutation handlers.
	pub metadata: Option<Value>,
}

pub type GetKeyFn = Arc<dyn Fn(&Row) -> Key + Send + Sync>;
pub type SchemaFn = Arc<dyn Fn(&Row) -> rill_core::Result<()> + Send + Sync>;
pub type CompareFn = Arc<dyn Fn(&Row, &Row) -> std::cmp::Ordering + Send + Sync>;

static COLLECTION_SEQ: AtomicU64 = AtomicU64::new(1);

pub struct CollectionConfig {
	id: Option<String>,
	get_key: GetKeyFn,
	schema: Option<SchemaFn>,
	compare: Option<CompareFn>,
	sync: Option<Box<dyn SyncAdapter>>,
	handlers: MutationHandlers,
	start_sync: bool,
	index_idle_timeout: Duration,
}

impl CollectionConfig {
	pub fn new(get_key: impl Fn(&Row) -> Key + Send + Sync + 'static) -> Self {
		CollectionConfig {
			id: None,
			get_key: Arc::new(get_key),
			schema: None,
			compare: None,
			sync: None,
			handlers: MutationHandlers::default(),
			start_sync: true,
			index_idle_timeout: Duration::from_secs(30),
		}
	}

	/// Key rows by an id-like field (string or integer).
	pub fn keyed_by(field: impl Into<String>) -> Self {
		let field = field.into();
		CollectionConfig::new(move |row: &Row| {
			row.get(&field)
				.cloned()
				.and_then(|value| Key::try_from(value).ok())
				.unwrap_or(Key::Undefined)
		})
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_schema(mut self, schema: impl Fn(&Row) -> rill_core::Result<()> + Send + Sync + 'static) -> Self {
		self.schema = Some(Arc::new(schema));
		self
	}

	pub fn with_compare(
		mut self,
		compare: impl Fn(&Row, &Row) -> std::cmp::Ordering + Send + Sync + 'static,
	) -> Self {
		self.compare = Some(Arc::new(compare));
		self
	}

	pub fn with_sync(mut self, adapter: impl SyncAdapter + 'static) -> Self {
		self.sync = Some(Box::new(adapter));
		self
	}

	pub fn with_on_insert(
		mut self,
		handler: impl Fn(&MutationContext<'_>) -> rill_core::Result<()> + Send + Sync + 'static,
	) -> Self {
		self.handlers.on_insert = Some(Box::new(handler));
		self
	}

	pub fn with_on_update(
		mut self,
		handler: impl Fn(&MutationContext<'_>) -> rill_core::Result<()> + Send + Sync + 'static,
	) -> Self {
		self.handlers.on_update = Some(Box::new(handler));
		self
	}

	pub fn with_on_delete(
		mut self,
		handler: impl Fn(&MutationContext<'_>) -> rill_core::Result<()> + Send + Sync + 'static,
	) -> Self {
		self.handlers.on_delete = Some(Box::new(handler));
		self
	}

	/// Defer the adapter start until the first subscriber or `preload`.
	pub fn lazy(mut self) -> Self {
		self.start_sync = false;
		self
	}

	pub fn index_idle_timeout(mut self, timeout: Duration) -> Self {
		self.index_idle_timeout = timeout;
		self
	}
}

#[derive(Clone)]
pub(crate) struct Overlay {
	/// The visible row, or `None` for an optimistic delete.
	pub row: Option<Row>,
	/// The transaction that wrote the entry; a dangling weak counts as
	/// completed.
	pub tx: Option<Weak<crate::transaction::TransactionInner>>,
}

struct State {
	status: CollectionStatus,
	synced: IndexMap<Key, Row>,
	overlay: IndexMap<Key, Overlay>,
}

struct SyncSlot {
	adapter: Option<Box<dyn SyncAdapter>>,
	started: bool,
	update_mode: RowUpdateMode,
	batch: Option<Vec<SyncWrite>>,
}

pub struct CollectionInner {
	id: String,
	get_key: GetKeyFn,
	schema: Option<SchemaFn>,
	compare: Option<CompareFn>,
	handlers: MutationHandlers,
	state: Mutex<State>,
	sync: Mutex<SyncSlot>,
	subscriptions: Mutex<IndexMap<u64, Arc<SubscriptionState>>>,
	subscription_seq: AtomicU64,
	status_listeners: Mutex<IndexMap<u64, Arc<dyn Fn(CollectionStatus) + Send + Sync>>>,
	listener_seq: AtomicU64,
	broadcast_queue: Mutex<VecDeque<(Vec<ChangeMessage>, Option<ContextId>)>>,
	broadcasting: Mutex<bool>,
	reversals: Mutex<Vec<ChangeMessage>>,
	loaded: Mutex<Vec<Predicate>>,
	indexes: Mutex<IndexRegistry>,
}

/// A transactional, keyed row container with optimistic overlays,
/// change subscriptions and predicate-aware on-demand loading. Cheap to
/// clone; clones share state.
#[derive(Clone)]
pub struct Collection {
	inner: Arc<CollectionInner>,
}

impl Collection {
	pub fn new(config: CollectionConfig) -> Self {
		let id = config
			.id
			.unwrap_or_else(|| format!("collection-{}", COLLECTION_SEQ.fetch_add(1, Ordering::Relaxed)));
		let has_sync = config.sync.is_some();
		let collection = Collection {
			inner: Arc::new(CollectionInner {
				id: id.clone(),
				get_key: config.get_key,
				schema: config.schema,
				compare: config.compare,
				handlers: config.handlers,
				state: Mutex::new(State {
					status: if has_sync {
						CollectionStatus::Idle
					} else {
						CollectionStatus::Ready
					},
					synced: IndexMap::new(),
					overlay: IndexMap::new(),
				}),
				sync: Mutex::new(SyncSlot {
					adapter: config.sync,
					started: false,
					update_mode: RowUpdateMode::Full,
					batch: None,
				}),
				subscriptions: Mutex::new(IndexMap::new()),
				subscription_seq: AtomicU64::new(1),
				status_listeners: Mutex::new(IndexMap::new()),
				listener_seq: AtomicU64::new(1),
				broadcast_queue: Mutex::new(VecDeque::new()),
				broadcasting: Mutex::new(false),
				reversals: Mutex::new(Vec::new()),
				loaded: Mutex::new(Vec::new()),
				indexes: Mutex::new(IndexRegistry::new(config.index_idle_timeout)),
			}),
		};
		catalog::register(&id, Arc::downgrade(&collection.inner));
		if config.start_sync && has_sync {
			if let Err(err) = collection.start_sync() {
				warn!(collection = %id, error = %err, "sync failed to start");
			}
		}
		collection
	}

	pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
		Collection {
			inner,
		}
	}

	pub fn id(&self) -> &str {
		&self.inner.id
	}

	pub fn status(&self) -> CollectionStatus {
		self.inner.state.lock().status
	}

	pub fn key_of(&self, row: &Row) -> Key {
		(self.inner.get_key)(row)
	}

	pub fn compare_fn(&self) -> Option<CompareFn> {
		self.inner.compare.clone()
	}

	// --- status lifecycle ---------------------------------------------

	fn set_status(&self, status: CollectionStatus) {
		{
			let mut state = self.inner.state.lock();
			if state.status == status {
				return;
			}
			state.status = status;
		}
		debug!(collection = %self.inner.id, ?status, "status change");
		let listeners: Vec<_> = self.inner.status_listeners.lock().values().cloned().collect();
		for listener in listeners {
			listener(status);
		}
	}

	/// Register a `status:change` listener.
	pub fn on_status_change(
		&self,
		listener: impl Fn(CollectionStatus) + Send + Sync + 'static,
	) -> StatusListenerHandle {
		let id = self.inner.listener_seq.fetch_add(1, Ordering::Relaxed);
		self.inner.status_listeners.lock().insert(id, Arc::new(listener));
		StatusListenerHandle {
			collection: Arc::downgrade(&self.inner),
			id,
		}
	}

	/// Start the sync adapter if it has not started yet.
	#[instrument(name = "collection::start_sync", level = "debug", skip(self), fields(collection = %self.inner.id))]
	pub fn start_sync(&self) -> rill_core::Result<()> {
		let adapter = {
			let mut slot = self.inner.sync.lock();
			if slot.started {
				return Ok(());
			}
			slot.started = true;
			slot.adapter.take()
		};
		let Some(mut adapter) = adapter else {
			self.set_status(CollectionStatus::Ready);
			return Ok(());
		};

		self.set_status(CollectionStatus::Loading);
		self.inner.sync.lock().update_mode = adapter.row_update_mode();
		let result = adapter.start(SyncWriter::new(self.clone()));
		self.inner.sync.lock().adapter = Some(adapter);
		if let Err(err) = result {
			self.set_status(CollectionStatus::Error);
			return Err(err);
		}
		Ok(())
	}

	/// Force the first sync batch; resolves once the collection is ready
	/// or the adapter reported no data. Idempotent.
	pub fn preload(&self) -> rill_core::Result<()> {
		self.start_sync()
	}

	/// Tear down sync, subscriptions and indexes. A later `start_sync`
	/// restarts the adapter from scratch.
	pub fn cleanup(&self) {
		{
			let mut slot = self.inner.sync.lock();
			if let Some(adapter) = slot.adapter.as_mut() {
				adapter.cleanup();
			}
			slot.started = false;
			slot.batch = None;
		}
		{
			let mut subscriptions = self.inner.subscriptions.lock();
			for subscription in subscriptions.values() {
				subscription.release();
			}
			subscriptions.clear();
		}
		{
			let mut state = self.inner.state.lock();
			state.synced.clear();
			state.overlay.clear();
		}
		self.inner.loaded.lock().clear();
		self.set_status(CollectionStatus::CleanedUp);
	}

	fn ensure_active(&self) -> rill_core::Result<()> {
		if self.status() == CollectionStatus::CleanedUp {
			return Err(Error::CollectionCleanedUp(self.inner.id.clone()));
		}
		Ok(())
	}

	// --- reads --------------------------------------------------------

	/// Snapshot of the visible state: synced rows with the optimistic
	/// overlay applied on top.
	pub fn state(&self) -> IndexMap<Key, Row> {
		let state = self.inner.state.lock();
		let mut out = IndexMap::with_capacity(state.synced.len() + state.overlay.len());
		for (key, row) in &state.synced {
			match state.overlay.get(key) {
				Some(Overlay { row: Some(overlaid), .. }) => {
					out.insert(key.clone(), overlaid.clone());
				}
				Some(Overlay { row: None, .. }) => {}
				None => {
					out.insert(key.clone(), row.clone());
				}
			}
		}
		for (key, entry) in &state.overlay {
			if state.synced.contains_key(key) {
				continue;
			}
			if let Some(row) = &entry.row {
				out.insert(key.clone(), row.clone());
			}
		}
		out
	}

	pub fn get(&self, key: impl Into<Key>) -> Option<Row> {
		let key = key.into();
		let state = self.inner.state.lock();
		visible(&state, &key).cloned()
	}

	pub fn has(&self, key: impl Into<Key>) -> bool {
		self.get(key).is_some()
	}

	pub fn size(&self) -> usize {
		self.state().len()
	}

	pub fn keys(&self) -> Vec<Key> {
		self.state().keys().cloned().collect()
	}

	/// Visible rows; sorted by the configured compare function when one
	/// exists, otherwise in synced-then-overlay order.
	pub fn to_array(&self) -> Vec<Row> {
		let mut rows: Vec<Row> = self.state().into_values().collect();
		if let Some(compare) = &self.inner.compare {
			rows.sort_by(|a, b| compare(a, b));
		}
		rows
	}

	pub fn values(&self) -> Vec<Row> {
		self.to_array()
	}

	// --- mutations ----------------------------------------------------

	pub fn insert(&self, row: Row) -> rill_core::Result<()> {
		self.insert_with(row, MutateOptions::default())
	}

	pub fn insert_with(&self, row: Row, options: MutateOptions) -> rill_core::Result<()> {
		self.ensure_active()?;
		self.validate(&row)?;
		let key = (self.inner.get_key)(&row);
		{
			let state = self.inner.state.lock();
			if visible(&state, &key).is_some() {
				return Err(Error::DuplicateKey(key));
			}
		}
		let mut message = ChangeMessage::insert(key, row);
		message.metadata = options.metadata;
		self.with_active_transaction(move |collection, tx| {
			collection.apply_mutation(tx, message);
			Ok(())
		})
	}

	pub fn insert_many(&self, rows: impl IntoIterator<Item = Row>) -> rill_core::Result<()> {
		self.ensure_active()?;
		let rows: Vec<Row> = rows.into_iter().collect();
		for row in &rows {
			self.validate(row)?;
		}
		self.with_active_transaction(move |collection, tx| {
			for row in rows {
				let key = (collection.inner.get_key)(&row);
				{
					let state = collection.inner.state.lock();
					if visible(&state, &key).is_some() {
						return Err(Error::DuplicateKey(key));
					}
				}
				collection.apply_mutation(tx, ChangeMessage::insert(key, row));
			}
			Ok(())
		})
	}

	pub fn update(&self, key: impl Into<Key>, mutator: impl FnOnce(&mut Row)) -> rill_core::Result<()> {
		self.update_with(key, MutateOptions::default(), mutator)
	}

	pub fn update_with(
		&self,
		key: impl Into<Key>,
		options: MutateOptions,
		mutator: impl FnOnce(&mut Row),
	) -> rill_core::Result<()> {
		self.ensure_active()?;
		let key = key.into();
		let previous = {
			let state = self.inner.state.lock();
			visible(&state, &key).cloned().ok_or_else(|| Error::KeyNotFound(key.clone()))?
		};
		let mut row = previous.clone();
		mutator(&mut row);
		self.validate(&row)?;
		if (self.inner.get_key)(&row) != key {
			return Err(Error::SchemaViolation("update must not change the row's key".to_string()));
		}
		let mut message = ChangeMessage::update(key, row, previous);
		message.metadata = options.metadata;
		self.with_active_transaction(move |collection, tx| {
			collection.apply_mutation(tx, message);
			Ok(())
		})
	}

	pub fn delete(&self, key: impl Into<Key>) -> rill_core::Result<()> {
		self.delete_with(key, MutateOptions::default())
	}

	pub fn delete_with(&self, key: impl Into<Key>, options: MutateOptions) -> rill_core::Result<()> {
		self.ensure_active()?;
		let key = key.into();
		let previous = {
			let state = self.inner.state.lock();
			visible(&state, &key).cloned().ok_or_else(|| Error::KeyNotFound(key.clone()))?
		};
		let mut message = ChangeMessage::delete(key, previous);
		message.metadata = options.metadata;
		self.with_active_transaction(move |collection, tx| {
			collection.apply_mutation(tx, message);
			Ok(())
		})
	}

	fn validate(&self, row: &Row) -> rill_core::Result<()> {
		match &self.inner.schema {
			Some(schema) => schema(row),
			None => Ok(()),
		}
	}

	fn with_active_transaction(
		&self,
		f: impl FnOnce(&Collection, &Transaction) -> rill_core::Result<()>,
	) -> rill_core::Result<()> {
		match current_transaction() {
			Some(tx) => f(self, &tx),
			None => {
				// No ambient transaction: wrap the mutation in an
				// implicit one that commits right away.
				let tx = Transaction::new();
				let applied = tx.mutate(|| f(self, &tx));
				match applied {
					Ok(()) => tx.commit(),
					Err(err) => {
						tx.rollback();
						Err(err)
					}
				}
			}
		}
	}

	fn apply_mutation(&self, tx: &Transaction, message: ChangeMessage) {
		let previous_overlay = {
			let mut state = self.inner.state.lock();
			state.overlay.insert(message.key.clone(), Overlay {
				row: message.value.clone(),
				tx: Some(tx.downgrade()),
			})
		};
		tx.record(PendingMutation {
			collection: self.clone(),
			message: message.clone(),
			previous_overlay,
		});
		self.broadcast(vec![message], Some(tx.context()));
	}

	/// Called by a rolling-back transaction: restore the key's previous
	/// overlay entry and stage the visible difference as a reversal
	/// change.
	pub(crate) fn restore_overlay(&self, key: &Key, previous: Option<Overlay>) {
		let (before, after) = {
			let mut state = self.inner.state.lock();
			let before = visible(&state, key).cloned();
			match previous {
				Some(entry) => {
					state.overlay.insert(key.clone(), entry);
				}
				None => {
					state.overlay.shift_remove(key);
				}
			}
			(before, visible(&state, key).cloned())
		};
		if let Some(message) = diff_message(key, before, after) {
			self.inner.reversals.lock().push(message);
		}
	}

	pub(crate) fn flush_reversals(&self, context: ContextId) {
		let reversals = std::mem::take(&mut *self.inner.reversals.lock());
		if !reversals.is_empty() {
			self.broadcast(reversals, Some(context));
		}
	}

	pub(crate) fn dispatch_mutation_handler(
		&self,
		kind: rill_core::ChangeKind,
		context: &MutationContext<'_>,
	) -> rill_core::Result<()> {
		let handler = match kind {
			rill_core::ChangeKind::Insert => &self.inner.handlers.on_insert,
			rill_core::ChangeKind::Update => &self.inner.handlers.on_update,
			rill_core::ChangeKind::Delete => &self.inner.handlers.on_delete,
		};
		match handler {
			Some(handler) => handler(context),
			None => Ok(()),
		}
	}

	// --- sync writes --------------------------------------------------

	pub(crate) fn sync_begin(&self) {
		let mut slot = self.inner.sync.lock();
		if slot.batch.is_none() {
			slot.batch = Some(Vec::new());
		}
		drop(slot);
		if self.status() == CollectionStatus::Loading {
			self.set_status(CollectionStatus::InitialCommit);
		}
	}

	pub(crate) fn sync_write(&self, write: SyncWrite) {
		let mut slot = self.inner.sync.lock();
		slot.batch.get_or_insert_with(Vec::new).push(write);
	}

	pub(crate) fn sync_commit(&self) -> rill_core::Result<()> {
		let writes = {
			let mut slot = self.inner.sync.lock();
			slot.batch.take().unwrap_or_default()
		};
		self.apply_batch_with_context(writes, None)
	}

	/// Apply a batch of keyed writes to the synced map, broadcasting the
	/// visible differences under the given transaction context. Live
	/// query collections use this so their downstream graphs coalesce
	/// onto the same context as the writes that caused them.
	pub fn apply_batch_with_context(
		&self,
		writes: Vec<SyncWrite>,
		context: Option<ContextId>,
	) -> rill_core::Result<()> {
		let update_mode = self.inner.sync.lock().update_mode;
		let mut messages = Vec::new();
		{
			let mut state = self.inner.state.lock();
			for write in writes {
				let key = match (&write.key, &write.value) {
					(Some(key), _) => key.clone(),
					(None, Some(value)) => (self.inner.get_key)(value),
					(None, None) => continue,
				};
				let before = visible(&state, &key).cloned();

				match write.kind {
					SyncWriteKind::Insert => {
						if let Some(value) = write.value {
							state.synced.insert(key.clone(), value);
						}
					}
					SyncWriteKind::Update => {
						if let Some(value) = write.value {
							let merged = match (update_mode, state.synced.get(&key)) {
								(RowUpdateMode::Partial, Some(existing)) => {
									let mut merged = existing.clone();
									for (field, val) in value.iter() {
										merged.set(field.clone(), val.clone());
									}
									merged
								}
								_ => value,
							};
							state.synced.insert(key.clone(), merged);
						}
					}
					SyncWriteKind::Delete => {
						state.synced.shift_remove(&key);
					}
				}

				// A completed optimistic write is now owned by the
				// synced map; drop its overlay entry.
				let drop_overlay = state.overlay.get(&key).is_some_and(|entry| match &entry.tx {
					None => true,
					Some(tx) => tx
						.upgrade()
						.map(|tx| tx.state() == TransactionState::Completed)
						.unwrap_or(true),
				});
				if drop_overlay {
					state.overlay.shift_remove(&key);
				}

				let after = visible(&state, &key).cloned();
				if let Some(message) = diff_message(&key, before, after) {
					messages.push(message);
				}
			}
		}
		self.broadcast(messages, context);
		Ok(())
	}

	pub fn subscription_count(&self) -> usize {
		self.inner.subscriptions.lock().len()
	}

	pub(crate) fn mark_ready(&self) {
		self.set_status(CollectionStatus::Ready);
	}

	/// Low-level writer bypassing transactions; adapters and tests use
	/// this to apply synchronous batches.
	pub fn writer(&self) -> SyncWriter {
		SyncWriter::new(self.clone())
	}

	// --- subscriptions ------------------------------------------------

	/// Subscribe to changes. The callback sees batches filtered to the
	/// subscription's predicate; with `include_initial_state` it is
	/// primed with an insert per currently visible matching key.
	pub fn subscribe_changes(
		&self,
		callback: impl FnMut(&[ChangeMessage]) -> rill_core::Result<()> + Send + 'static,
		options: SubscribeOptions,
	) -> SubscriptionHandle {
		let mut callback = callback;
		self.subscribe_with_context(Box::new(move |messages, _| callback(messages)), options)
	}

	/// Subscription variant whose callback also receives the transaction
	/// context a batch belongs to; live queries use the context to
	/// schedule their graph runs.
	pub fn subscribe_with_context(&self, callback: ChangeCallback, options: SubscribeOptions) -> SubscriptionHandle {
		if self.status() == CollectionStatus::Idle {
			if let Err(err) = self.start_sync() {
				warn!(collection = %self.inner.id, error = %err, "sync failed to start on subscribe");
			}
		}

		let predicate = options.load.clone().unwrap_or_else(|| Predicate {
			where_clause: options.where_expression.clone(),
			order_by: Vec::new(),
			limit: None,
		});
		if let Err(err) = self.ensure_loaded(&predicate) {
			warn!(collection = %self.inner.id, error = %err, "load for subscription failed");
		}

		let id = self.inner.subscription_seq.fetch_add(1, Ordering::Relaxed);
		let subscription = Arc::new(SubscriptionState::new(
			id,
			options.where_expression,
			callback,
			options.on_error,
		));
		self.inner.subscriptions.lock().insert(id, Arc::clone(&subscription));

		if options.include_initial_state {
			let rows = self.state();
			subscription.prime(rows.into_iter());
		}

		SubscriptionHandle {
			collection: Arc::downgrade(&self.inner),
			id,
		}
	}

	fn broadcast(&self, messages: Vec<ChangeMessage>, context: Option<ContextId>) {
		if messages.is_empty() {
			return;
		}
		self.inner.indexes.lock().apply(&messages);
		self.inner.broadcast_queue.lock().push_back((messages, context));
		{
			let mut broadcasting = self.inner.broadcasting.lock();
			if *broadcasting {
				// The active delivery loop will pick the batch up;
				// re-entrant delivery would reorder changes.
				return;
			}
			*broadcasting = true;
		}
		loop {
			let batch = self.inner.broadcast_queue.lock().pop_front();
			let Some((messages, context)) = batch else {
				break;
			};
			let subscriptions: Vec<Arc<SubscriptionState>> =
				self.inner.subscriptions.lock().values().cloned().collect();
			for subscription in subscriptions {
				subscription.deliver(&messages, context);
			}
		}
		*self.inner.broadcasting.lock() = false;
	}

	// --- on-demand loading --------------------------------------------

	/// Make sure data matching the predicate is loaded, reusing previous
	/// loads that already cover it.
	pub fn ensure_loaded(&self, predicate: &Predicate) -> rill_core::Result<()> {
		if predicate.is_unsatisfiable() {
			return Ok(());
		}
		{
			let loaded = self.inner.loaded.lock();
			if loaded.iter().any(|have| is_predicate_subset(predicate, have)) {
				return Ok(());
			}
		}
		let options = LoadSubsetOptions::from_predicate(predicate);
		self.load_subset(options)
	}

	/// Ask the adapter for a specific load shape (window pages use a
	/// cursor); records what was asked for.
	pub fn load_subset(&self, options: LoadSubsetOptions) -> rill_core::Result<()> {
		let adapter = { self.inner.sync.lock().adapter.take() };
		let Some(mut adapter) = adapter else {
			return Ok(());
		};
		let result = adapter.load_subset(&options);
		self.inner.sync.lock().adapter = Some(adapter);
		result?;
		self.inner.loaded.lock().push(options.predicate());
		Ok(())
	}

	pub fn sync_metadata(&self) -> Option<Value> {
		let slot = self.inner.sync.lock();
		slot.adapter.as_ref().and_then(|adapter| adapter.get_sync_metadata())
	}

	/// Hand a committed transaction to the sync adapter.
	pub(crate) fn notify_committed(&self, transaction: &Transaction) {
		let adapter = { self.inner.sync.lock().adapter.take() };
		let Some(mut adapter) = adapter else {
			return;
		};
		let result = adapter.apply_committed_tx(transaction);
		self.inner.sync.lock().adapter = Some(adapter);
		if let Err(err) = result {
			warn!(collection = %self.inner.id, error = %err, "adapter rejected committed transaction");
		}
	}

	/// Ask the adapter to catch up from a row version.
	pub fn pull_since(&self, from_row_version: u64) -> rill_core::Result<()> {
		let adapter = { self.inner.sync.lock().adapter.take() };
		let Some(mut adapter) = adapter else {
			return Ok(());
		};
		let result = adapter.pull_since(from_row_version);
		self.inner.sync.lock().adapter = Some(adapter);
		result
	}

	// --- indexes ------------------------------------------------------

	/// Create or re-acquire a derived index over the expression list,
	/// returning its signature.
	pub fn create_index(&self, name: impl Into<String>, expressions: Vec<Expression>) -> u64 {
		let rows = self.state();
		self.inner.indexes.lock().acquire(name, expressions, rows.iter())
	}

	pub fn release_index(&self, signature: u64) {
		let mut indexes = self.inner.indexes.lock();
		indexes.release(signature);
		indexes.sweep();
	}

	pub fn index_lookup(&self, signature: u64, value: &Value) -> Vec<Key> {
		self.inner.indexes.lock().lookup(signature, value)
	}

	pub fn index_descriptors(&self) -> Vec<IndexDescriptor> {
		self.inner.indexes.lock().descriptors()
	}
}

impl QuerySource for Collection {
	fn source_id(&self) -> String {
		self.inner.id.clone()
	}
}

impl std::fmt::Debug for Collection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Collection")
			.field("id", &self.inner.id)
			.field("status", &self.status())
			.finish()
	}
}

fn visible<'a>(state: &'a State, key: &Key) -> Option<&'a Row> {
	match state.overlay.get(key) {
		Some(entry) => entry.row.as_ref(),
		None => state.synced.get(key),
	}
}

fn diff_message(key: &Key, before: Option<Row>, after: Option<Row>) -> Option<ChangeMessage> {
	match (before, after) {
		(None, Some(after)) => Some(ChangeMessage::insert(key.clone(), after)),
		(Some(before), None) => Some(ChangeMessage::delete(key.clone(), before)),
		(Some(before), Some(after)) => {
			if before == after {
				None
			} else {
				Some(ChangeMessage::update(key.clone(), after, before))
			}
		}
		(None, None) => None,
	}
}

/// Handle returned by `subscribe_changes`; dropping it does nothing,
/// `unsubscribe` removes the subscription and releases its sent-keys.
pub struct SubscriptionHandle {
	collection: Weak<CollectionInner>,
	id: u64,
}

impl SubscriptionHandle {
	pub fn unsubscribe(&self) {
		if let Some(inner) = self.collection.upgrade() {
			if let Some(subscription) = inner.subscriptions.lock().shift_remove(&self.id) {
				subscription.release();
			}
		}
	}
}

pub struct StatusListenerHandle {
	collection: Weak<CollectionInner>,
	id: u64,
}

impl StatusListenerHandle {
	pub fn unsubscribe(&self) {
		if let Some(inner) = self.collection.upgrade() {
			inner.status_listeners.lock().shift_remove(&self.id);
		}
	}
}
