// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Rill: a reactive, in-process database engine. Collections hold keyed
//! rows with optimistic mutations; queries over them are maintained
//! incrementally and are themselves collections.
//!
//! ```
//! use rill::{Collection, CollectionConfig, create_live_query, query};
//! use rill::dsl::*;
//! use rill::{Row, Value};
//!
//! let users = Collection::new(CollectionConfig::keyed_by("id"));
//! users.insert(Row::from_pairs([
//! 	("id", Value::Int(1)),
//! 	("name", Value::text("alice")),
//! 	("active", Value::Boolean(true)),
//! ]))
//! .unwrap();
//!
//! let active = create_live_query(
//! 	&query().from("u", &users).filter(eq(field(["u", "active"]), true)),
//! )
//! .unwrap();
//! assert_eq!(active.size(), 1);
//! ```

pub use rill_core::{
	ChangeAccumulator, ChangeKind, ChangeMessage, Delta, Error, Key, OrderedF64, OutputChange, Result, Row,
	Timestamp, Value, frac_between,
};

pub use rill_query::{
	CompareOptions, Direction, Expression, FieldPath, JoinKind, LoadCursor, LoadSubsetOptions, LocaleOptions,
	NullsOrder, OrderByClause, Predicate, Projection, QueryBuilder, QueryIr, QuerySource, Ref, StringSort,
	compare_values, evaluate, fingerprint, intersect_predicates, intersect_where_predicates,
	is_limit_subset, is_order_by_subset, is_predicate_subset, is_where_subset, matches, query,
	union_predicates, union_where_predicates,
};
pub use rill_query::dsl;

pub use rill_collection::{
	Collection, CollectionConfig, CollectionStatus, MutateOptions, MutationContext, RowUpdateMode,
	SubscribeOptions, SubscriptionHandle, SyncAdapter, SyncWrite, SyncWriteKind, SyncWriter, Transaction,
	TransactionState, current_transaction,
};

pub use rill_flow::{CompileContext, CompiledQuery, FlowGraph, OperatorKind, compile};

pub use rill_live::{
	EffectHandle, EffectHandlers, EffectOptions, LiveQueryCollection, LiveQueryOptions, LiveSubscription,
	create_effect, create_effect_on, create_live_query, create_live_query_from_ir, create_live_query_with,
};

pub use rill_scheduler::{ContextId, OwnerId, Scheduler};
