// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Transactional keyed collections: a synced map with an optimistic
//! overlay, change subscriptions with predicate filtering, derived
//! indexes, and the sync/mutation adapter seams.

pub use adapter::{
	MutationContext, MutationHandler, MutationHandlers, RowUpdateMode, SyncAdapter, SyncWrite, SyncWriteKind,
	SyncWriter,
};
pub use catalog::resolve;
pub use collection::{
	Collection, CollectionConfig, CollectionStatus, MutateOptions, StatusListenerHandle, SubscriptionHandle,
};
pub use index::{IndexDescriptor, index_signature};
pub use subscription::{ChangeCallback, ErrorCallback, SubscribeOptions};
pub use transaction::{Transaction, TransactionState, current_transaction};

mod adapter;
mod catalog;
mod collection;
mod index;
mod subscription;
mod transaction;

pub type Result<T> = std::result::Result<T, rill_core::Error>;
