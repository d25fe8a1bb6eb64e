// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use rill_core::{Key, Row, Value};
use rill_query::LoadSubsetOptions;

use crate::{collection::Collection, transaction::Transaction};

/// Whether `update` writes from the sync layer carry whole rows or
/// partial patches applied over the previous value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RowUpdateMode {
	#[default]
	Full,
	Partial,
}

/// One write inside a sync batch.
#[derive(Clone, Debug)]
pub struct SyncWrite {
	pub kind: SyncWriteKind,
	/// Derived via the collection's `get_key` when absent.
	pub key: Option<Key>,
	pub value: Option<Row>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncWriteKind {
	Insert,
	Update,
	Delete,
}

impl SyncWrite {
	pub fn insert(value: Row) -> Self {
		SyncWrite {
			kind: SyncWriteKind::Insert,
			key: None,
			value: Some(value),
		}
	}

	pub fn update(value: Row) -> Self {
		SyncWrite {
			kind: SyncWriteKind::Update,
			key: None,
			value: Some(value),
		}
	}

	pub fn delete(key: Key) -> Self {
		SyncWrite {
			kind: SyncWriteKind::Delete,
			key: Some(key),
			value: None,
		}
	}
}

/// The sync seam a source adapter implements. `start` is called once when
/// the collection begins syncing and receives a [`SyncWriter`] it keeps
/// for the lifetime of the sync; all I/O happens behind this boundary.
pub trait SyncAdapter: Send {
	/// Begin syncing. Synchronous adapters write their first batch and
	/// call [`SyncWriter::mark_ready`] before returning.
	fn start(&mut self, writer: SyncWriter) -> rill_core::Result<()>;

	fn row_update_mode(&self) -> RowUpdateMode {
		RowUpdateMode::Full
	}

	/// Ensure all rows satisfying `options` are (or will become) visible
	/// in the collection. The default assumes the adapter loads
	/// everything up front.
	fn load_subset(&mut self, options: &LoadSubsetOptions) -> rill_core::Result<()> {
		let _ = options;
		Ok(())
	}

	fn get_sync_metadata(&self) -> Option<Value> {
		None
	}

	/// A transaction against this collection committed; sync layers that
	/// ship transactions forward them from here.
	fn apply_committed_tx(&mut self, transaction: &Transaction) -> rill_core::Result<()> {
		let _ = transaction;
		Ok(())
	}

	/// Catch up from a known row version (reconnecting sync layers).
	fn pull_since(&mut self, from_row_version: u64) -> rill_core::Result<()> {
		let _ = from_row_version;
		Ok(())
	}

	/// Release adapter resources; called on collection cleanup.
	fn cleanup(&mut self) {}
}

/// The write half handed to a sync adapter: `begin`/`write`/`commit`
/// batches apply to the synced map and broadcast to subscribers;
/// `mark_ready` moves the collection from its initial commit state to
/// ready.
#[derive(Clone)]
pub struct SyncWriter {
	collection: Collection,
}

impl SyncWriter {
	pub(crate) fn new(collection: Collection) -> Self {
		SyncWriter {
			collection,
		}
	}

	pub fn collection_id(&self) -> String {
		self.collection.id().to_string()
	}

	pub fn begin(&self) {
		self.collection.sync_begin();
	}

	pub fn write(&self, write: SyncWrite) {
		self.collection.sync_write(write);
	}

	pub fn commit(&self) -> rill_core::Result<()> {
		self.collection.sync_commit()
	}

	pub fn mark_ready(&self) {
		self.collection.mark_ready();
	}
}

/// Context handed to mutation handlers during the transactional write
/// phase.
pub struct MutationContext<'a> {
	pub transaction: &'a Transaction,
	pub collection_id: &'a str,
}

pub type MutationHandler = Box<dyn Fn(&MutationContext<'_>) -> rill_core::Result<()> + Send + Sync>;

/// Optional per-operation persistence handlers. A rejecting handler fails
/// the transaction, reverting its overlay.
#[derive(Default)]
pub struct MutationHandlers {
	pub on_insert: Option<MutationHandler>,
	pub on_update: Option<MutationHandler>,
	pub on_delete: Option<MutationHandler>,
}
