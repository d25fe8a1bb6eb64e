// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use serde::{Deserialize, Serialize};

use crate::{Key, Row, Value};

/// The kind of a change delivered to subscribers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// A single change to a keyed row, delivered to subscribers in batches.
///
/// Inserts carry `value`, deletes carry `previous_value`, updates carry
/// both. `metadata` is opaque to the engine and round-trips to mutation
/// adapters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
	#[serde(rename = "type")]
	pub kind: ChangeKind,
	pub key: Key,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<Row>,
	#[serde(rename = "previousValue", skip_serializing_if = "Option::is_none")]
	pub previous_value: Option<Row>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

impl ChangeMessage {
	pub fn insert(key: Key, value: Row) -> Self {
		ChangeMessage {
			kind: ChangeKind::Insert,
			key,
			value: Some(value),
			previous_value: None,
			metadata: None,
		}
	}

	pub fn update(key: Key, value: Row, previous_value: Row) -> Self {
		ChangeMessage {
			kind: ChangeKind::Update,
			key,
			value: Some(value),
			previous_value: Some(previous_value),
			metadata: None,
		}
	}

	pub fn delete(key: Key, previous_value: Row) -> Self {
		ChangeMessage {
			kind: ChangeKind::Delete,
			key,
			value: None,
			previous_value: Some(previous_value),
			metadata: None,
		}
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	/// The row this change leaves visible, if any.
	pub fn row(&self) -> Option<&Row> {
		self.value.as_ref().or(self.previous_value.as_ref())
	}
}

/// One multiset delta flowing through an operator graph: a keyed row with
/// a signed multiplicity, optionally tagged with a fractional order index
/// by a downstream order-by operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
	pub key: Key,
	pub row: Row,
	pub weight: i64,
	pub order_index: Option<String>,
}

impl Delta {
	pub fn insert(key: Key, row: Row) -> Self {
		Delta {
			key,
			row,
			weight: 1,
			order_index: None,
		}
	}

	pub fn delete(key: Key, row: Row) -> Self {
		Delta {
			key,
			row,
			weight: -1,
			order_index: None,
		}
	}

	pub fn new(key: Key, row: Row, weight: i64) -> Self {
		Delta {
			key,
			row,
			weight,
			order_index: None,
		}
	}

	pub fn with_order_index(mut self, order_index: impl Into<String>) -> Self {
		self.order_index = Some(order_index.into());
		self
	}
}
