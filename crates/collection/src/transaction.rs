// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	cell::RefCell,
	sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use rill_core::{ChangeKind, ChangeMessage, Error};
use rill_scheduler::ContextId;

use crate::{
	adapter::MutationContext,
	collection::{Collection, Overlay},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionState {
	Pending,
	Persisting,
	Completed,
	Failed,
}

pub(crate) struct PendingMutation {
	pub collection: Collection,
	pub message: ChangeMessage,
	/// Overlay entry this mutation replaced, restored on rollback.
	pub previous_overlay: Option<Overlay>,
}

pub(crate) struct TransactionInner {
	id: Uuid,
	context: ContextId,
	state: Mutex<TransactionState>,
	mutations: Mutex<Vec<PendingMutation>>,
	settled: Mutex<Vec<Box<dyn FnOnce(TransactionState) + Send>>>,
}

impl TransactionInner {
	pub(crate) fn state(&self) -> TransactionState {
		*self.state.lock()
	}
}

thread_local! {
	static ACTIVE: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
}

/// The ambient transaction, if a `mutate` scope is open on this thread.
pub fn current_transaction() -> Option<Transaction> {
	ACTIVE.with(|stack| stack.borrow().last().cloned())
}

/// A unit of optimistic mutation.
///
/// Mutations made inside [`Transaction::mutate`] apply to each touched
/// collection's overlay immediately and reach subscribers when the scope
/// closes; [`Transaction::commit`] then runs the collections' mutation
/// handlers. A rejected handler rolls the overlay back and emits reversal
/// changes.
#[derive(Clone)]
pub struct Transaction {
	inner: Arc<TransactionInner>,
}

impl Transaction {
	pub fn new() -> Self {
		Transaction {
			inner: Arc::new(TransactionInner {
				id: Uuid::new_v4(),
				context: rill_scheduler::global().allocate_context(),
				state: Mutex::new(TransactionState::Pending),
				mutations: Mutex::new(Vec::new()),
				settled: Mutex::new(Vec::new()),
			}),
		}
	}

	pub fn id(&self) -> Uuid {
		self.inner.id
	}

	pub fn context(&self) -> ContextId {
		self.inner.context
	}

	pub fn state(&self) -> TransactionState {
		self.inner.state()
	}

	pub(crate) fn downgrade(&self) -> Weak<TransactionInner> {
		Arc::downgrade(&self.inner)
	}

	/// Run `f` with this transaction as the ambient target of collection
	/// mutations, then propagate the buffered changes through every
	/// scheduled live query exactly once.
	pub fn mutate<R>(&self, f: impl FnOnce() -> R) -> R {
		ACTIVE.with(|stack| stack.borrow_mut().push(self.clone()));
		let result = f();
		ACTIVE.with(|stack| {
			stack.borrow_mut().pop();
		});
		rill_scheduler::global().flush(self.inner.context);
		result
	}

	pub(crate) fn record(&self, mutation: PendingMutation) {
		self.inner.mutations.lock().push(mutation);
	}

	/// Run registered mutation handlers; on success the overlay stays in
	/// place until the source sync mirrors it, on failure the overlay
	/// reverts and subscribers see reversal changes.
	pub fn commit(&self) -> rill_core::Result<()> {
		{
			let mut state = self.inner.state.lock();
			if *state != TransactionState::Pending {
				return Err(Error::Internal(format!(
					"transaction {} cannot commit from state {:?}",
					self.inner.id, *state
				)));
			}
			*state = TransactionState::Persisting;
		}

		match self.dispatch_handlers() {
			Ok(()) => {
				*self.inner.state.lock() = TransactionState::Completed;
				// Sync layers that ship transactions pick it up here.
				let committed: Vec<Collection> = {
					let mutations = self.inner.mutations.lock();
					let mut collections: Vec<Collection> = Vec::new();
					for mutation in mutations.iter() {
						if !collections.iter().any(|c| c.id() == mutation.collection.id()) {
							collections.push(mutation.collection.clone());
						}
					}
					collections
				};
				for collection in committed {
					collection.notify_committed(self);
				}
				self.settle(TransactionState::Completed);
				Ok(())
			}
			Err(err) => {
				debug!(transaction = %self.inner.id, error = %err, "mutation handler rejected");
				self.revert();
				*self.inner.state.lock() = TransactionState::Failed;
				self.settle(TransactionState::Failed);
				Err(Error::AdapterFailure(err.to_string()))
			}
		}
	}

	/// Discard the transaction, reverting its overlay entries. A settled
	/// transaction cannot be rolled back.
	pub fn rollback(&self) {
		{
			let state = self.inner.state.lock();
			if matches!(*state, TransactionState::Completed | TransactionState::Failed) {
				return;
			}
		}
		self.revert();
		*self.inner.state.lock() = TransactionState::Failed;
		self.settle(TransactionState::Failed);
	}

	/// Register a callback fired once the transaction completes or fails.
	pub fn on_settled(&self, callback: impl FnOnce(TransactionState) + Send + 'static) {
		let state = self.state();
		if matches!(state, TransactionState::Completed | TransactionState::Failed) {
			callback(state);
		} else {
			self.inner.settled.lock().push(Box::new(callback));
		}
	}

	fn settle(&self, state: TransactionState) {
		let callbacks = std::mem::take(&mut *self.inner.settled.lock());
		for callback in callbacks {
			callback(state);
		}
	}

	fn dispatch_handlers(&self) -> rill_core::Result<()> {
		// One handler call per (collection, operation kind), in first
		// touch order. Handlers run outside the mutation lock.
		let pending: Vec<(Collection, ChangeKind)> = {
			let mutations = self.inner.mutations.lock();
			let mut pending: Vec<(Collection, ChangeKind)> = Vec::new();
			for mutation in mutations.iter() {
				let seen = pending.iter().any(|(collection, kind)| {
					collection.id() == mutation.collection.id() && *kind == mutation.message.kind
				});
				if !seen {
					pending.push((mutation.collection.clone(), mutation.message.kind));
				}
			}
			pending
		};

		for (collection, kind) in pending {
			let context = MutationContext {
				transaction: self,
				collection_id: collection.id(),
			};
			collection.dispatch_mutation_handler(kind, &context)?;
		}
		Ok(())
	}

	/// Restore every touched key's previous overlay entry, in reverse
	/// order, broadcasting the visible differences. The transaction's
	/// scheduler context is discarded so per-context buffered state
	/// clears, and the reversals propagate under a fresh context.
	fn revert(&self) {
		rill_scheduler::global().clear(self.inner.context);

		let mutations = std::mem::take(&mut *self.inner.mutations.lock());
		let reversal_context = rill_scheduler::global().allocate_context();
		let mut touched: Vec<Collection> = Vec::new();
		for mutation in mutations.iter().rev() {
			mutation.collection.restore_overlay(&mutation.message.key, mutation.previous_overlay.clone());
			if !touched.iter().any(|c| c.id() == mutation.collection.id()) {
				touched.push(mutation.collection.clone());
			}
		}
		for collection in touched {
			collection.flush_reversals(reversal_context);
		}
		rill_scheduler::global().flush(reversal_context);
	}
}

impl Default for Transaction {
	fn default() -> Self {
		Transaction::new()
	}
}

impl std::fmt::Debug for Transaction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Transaction")
			.field("id", &self.inner.id)
			.field("state", &self.state())
			.finish()
	}
}
