// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use thiserror::Error;

use crate::{Key, KeyError};

/// The engine-wide error type. Crates re-export it behind their own
/// `Result` alias and propagate with `?`.
#[derive(Debug, Error)]
pub enum Error {
	/// A row failed a configured schema check; nothing was applied.
	#[error("schema violation: {0}")]
	SchemaViolation(String),

	/// An adapter hook failed; the surrounding transaction rolls back.
	#[error("adapter failure: {0}")]
	AdapterFailure(String),

	/// An insert collided with an existing visible key.
	#[error("duplicate key: {0}")]
	DuplicateKey(Key),

	/// An update or delete referenced a key with no visible row.
	#[error("key not found: {0}")]
	KeyNotFound(Key),

	/// The collection was cleaned up and no longer accepts operations.
	#[error("collection {0} has been cleaned up")]
	CollectionCleanedUp(String),

	/// A query referenced an alias no source was registered for.
	#[error("unknown alias: {0}")]
	UnknownAlias(String),

	/// A query referenced a source collection that is not available.
	#[error("missing source: {0}")]
	MissingSource(String),

	/// A value could not serve as a key where one was required.
	#[error("invalid key: {0}")]
	InvalidKey(String),

	/// An internal invariant did not hold.
	#[error("internal: {0}")]
	Internal(String),
}

impl From<KeyError> for Error {
	fn from(err: KeyError) -> Self {
		Error::InvalidKey(err.0)
	}
}
