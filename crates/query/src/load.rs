// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use serde::{Deserialize, Serialize};

use crate::{algebra::Predicate, expression::Expression, ir::OrderByClause};

/// Window cursor for incremental loads: `where_from` selects the rows to
/// fetch next, `where_current` describes what is already loaded so the
/// adapter can report how much of the window is satisfied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadCursor {
	#[serde(rename = "whereCurrent")]
	pub where_current: Expression,
	#[serde(rename = "whereFrom")]
	pub where_from: Expression,
}

/// The shape of data a collection asks its adapter to make visible. A
/// plain serializable record, so sync layers can translate it to their
/// own wire dialects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSubsetOptions {
	#[serde(rename = "where", skip_serializing_if = "Option::is_none")]
	pub where_clause: Option<Expression>,
	#[serde(rename = "orderBy", skip_serializing_if = "Vec::is_empty", default)]
	pub order_by: Vec<OrderByClause>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub offset: Option<usize>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cursor: Option<LoadCursor>,
}

impl LoadSubsetOptions {
	pub fn from_predicate(predicate: &Predicate) -> Self {
		LoadSubsetOptions {
			where_clause: predicate.where_clause.clone(),
			order_by: predicate.order_by.clone(),
			limit: predicate.limit,
			offset: None,
			cursor: None,
		}
	}

	pub fn predicate(&self) -> Predicate {
		Predicate {
			where_clause: self.where_clause.clone(),
			order_by: self.order_by.clone(),
			limit: self.limit,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::LoadSubsetOptions;
	use crate::dsl::*;

	#[test]
	fn test_serializes_to_wire_names() {
		let options = LoadSubsetOptions {
			where_clause: Some(eq(field(["active"]), true)),
			limit: Some(10),
			..Default::default()
		};
		let json = serde_json::to_value(&options).unwrap();
		assert!(json.get("where").is_some());
		assert_eq!(json.get("limit").and_then(|l| l.as_u64()), Some(10));
		assert!(json.get("cursor").is_none());
	}
}
