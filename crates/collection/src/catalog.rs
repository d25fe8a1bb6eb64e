// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Process-wide registry resolving collection ids back to live
//! collections. Entries are weak: dropping the last strong handle to a
//! collection makes it unresolvable without any unregister step.

use std::{collections::HashMap, sync::Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::collection::{Collection, CollectionInner};

static CATALOG: Lazy<Mutex<HashMap<String, Weak<CollectionInner>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register(id: &str, inner: Weak<CollectionInner>) {
	CATALOG.lock().insert(id.to_string(), inner);
}

/// Resolve a collection id recorded in a query IR to the live collection.
pub fn resolve(id: &str) -> Option<Collection> {
	let inner = CATALOG.lock().get(id)?.upgrade()?;
	Some(Collection::from_inner(inner))
}
