// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{error, warn};

use rill_collection::{Collection, SubscribeOptions, SubscriptionHandle, resolve};
use rill_core::{ChangeAccumulator, ChangeKind, ChangeMessage, Delta, Error, OutputChange};
use rill_flow::{FlowGraph, InputHandle, OperatorKind, OptimizableOrderBy, compile};
use rill_query::{
	Direction, Expression, LoadCursor, LoadSubsetOptions, Predicate, QueryIr, dsl,
	intersect_where_predicates,
};
use rill_scheduler::{ContextId, OwnerId};

/// Receives each graph run's classified output.
pub(crate) trait GraphConsumer: Send + Sync {
	fn consume(&self, changes: Vec<OutputChange>, context: Option<ContextId>);

	/// The graph was torn down; discard materialized state. The next
	/// activation replays everything from the sources.
	fn reset(&self) {}
}

/// Live query collections register their result collection here so that
/// downstream queries reading from them can declare scheduler
/// dependencies on the upstream graph, and re-activate it after GC.
static DRIVERS: Lazy<Mutex<HashMap<String, (OwnerId, std::sync::Weak<DriverInner>)>>> =
	Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register_driver(collection_id: &str, driver: &Driver) {
	DRIVERS.lock().insert(collection_id.to_string(), (driver.owner(), Arc::downgrade(&driver.inner)));
}

fn upstream_of(collection_id: &str) -> Option<(OwnerId, Option<Driver>)> {
	let drivers = DRIVERS.lock();
	let (owner, weak) = drivers.get(collection_id)?;
	Some((*owner, weak.upgrade().map(|inner| Driver {
		inner,
	})))
}

struct ActiveGraph {
	graph: Arc<Mutex<FlowGraph>>,
	accumulator: Arc<Mutex<ChangeAccumulator>>,
	subscriptions: Vec<SubscriptionHandle>,
	sources: IndexMap<String, Collection>,
	source_wheres: IndexMap<String, Expression>,
	optimizable: Option<OptimizableOrderBy>,
	deps: Vec<OwnerId>,
}

struct DriverInner {
	id: String,
	owner: OwnerId,
	ir: Arc<QueryIr>,
	consumer: Arc<dyn GraphConsumer>,
	active: Mutex<Option<ActiveGraph>>,
	/// Context whose load-more already failed; not retried within it.
	load_failed_context: Mutex<Option<Option<ContextId>>>,
}

/// Owns one compiled graph: subscribes to every source alias, feeds
/// deltas in, schedules runs under the originating transaction context,
/// and hands classified output to its consumer.
#[derive(Clone)]
pub(crate) struct Driver {
	inner: Arc<DriverInner>,
}

impl Driver {
	pub fn new(id: impl Into<String>, ir: Arc<QueryIr>, consumer: Arc<dyn GraphConsumer>) -> Self {
		Driver {
			inner: Arc::new(DriverInner {
				id: id.into(),
				owner: rill_scheduler::global().allocate_owner(),
				ir,
				consumer,
				active: Mutex::new(None),
				load_failed_context: Mutex::new(None),
			}),
		}
	}

	pub fn owner(&self) -> OwnerId {
		self.inner.owner
	}

	pub fn is_active(&self) -> bool {
		self.inner.active.lock().is_some()
	}

	/// Compile the pipeline and subscribe to every source. Idempotent;
	/// called on creation and again after a GC teardown.
	pub fn activate(&self) -> rill_core::Result<()> {
		if self.is_active() {
			return Ok(());
		}

		let compiled = compile(&self.inner.ir)?;
		let accumulator = Arc::new(Mutex::new(ChangeAccumulator::new()));
		let mut graph = compiled.graph;
		let acc = Arc::clone(&accumulator);
		graph.add_operator(
			OperatorKind::output(move |deltas: Vec<Delta>| {
				let mut acc = acc.lock();
				acc.accumulate_all(deltas);
			}),
			&[compiled.tail],
		)?;
		graph.finalize();
		let graph = Arc::new(Mutex::new(graph));

		let mut sources: IndexMap<String, Collection> = IndexMap::new();
		let mut deps: Vec<OwnerId> = Vec::new();
		for (alias, collection_id) in &compiled.context.alias_to_collection {
			let collection = resolve(collection_id)
				.ok_or_else(|| Error::MissingSource(collection_id.clone()))?;
			// An upstream live query: depend on its graph run and make
			// sure a garbage-collected one compiles again.
			if let Some((owner, upstream)) = upstream_of(collection_id) {
				if !deps.contains(&owner) {
					deps.push(owner);
				}
				if let Some(upstream) = upstream {
					upstream.activate()?;
				}
			}
			sources.insert(alias.clone(), collection);
		}

		*self.inner.active.lock() = Some(ActiveGraph {
			graph: Arc::clone(&graph),
			accumulator,
			subscriptions: Vec::new(),
			sources: sources.clone(),
			source_wheres: compiled.context.source_where_clauses.clone(),
			optimizable: compiled.context.optimizable_order_by.clone(),
			deps: deps.clone(),
		});

		// One subscription per alias; the same collection under two
		// aliases gets two independent streams.
		let mut handles = Vec::with_capacity(sources.len());
		for (alias, collection) in &sources {
			let where_expression = compiled.context.source_where_clauses.get(alias).cloned();
			// A windowed source asks the adapter for the full
			// {where, orderBy, limit} shape up front.
			let load = compiled
				.context
				.optimizable_order_by
				.as_ref()
				.filter(|optimizable| optimizable.alias == *alias)
				.map(|optimizable| Predicate {
					where_clause: where_expression.clone(),
					order_by: optimizable.order_by.clone(),
					limit: Some(optimizable.offset + optimizable.limit),
				});
			let input = InputHandle::new(Arc::clone(&graph), alias.clone());
			let weak = Arc::downgrade(&self.inner);
			let handle = collection.subscribe_with_context(
				Box::new(move |messages, context| {
					input.send(messages_to_deltas(messages))?;
					if let Some(inner) = weak.upgrade() {
						Driver {
							inner,
						}
						.schedule_run(context);
					}
					Ok(())
				}),
				SubscribeOptions {
					include_initial_state: true,
					where_expression,
					load,
					on_error: None,
				},
			);
			handles.push(handle);
		}
		if let Some(active) = self.inner.active.lock().as_mut() {
			active.subscriptions = handles;
		}
		Ok(())
	}

	/// Tear down subscriptions and release the graph; the driver returns
	/// to the uncompiled state and can be activated again.
	pub fn deactivate(&self) {
		let active = self.inner.active.lock().take();
		if let Some(active) = active {
			for handle in &active.subscriptions {
				handle.unsubscribe();
			}
			self.inner.consumer.reset();
		}
	}

	fn schedule_run(&self, context: Option<ContextId>) {
		let deps = match self.inner.active.lock().as_ref() {
			Some(active) => active.deps.clone(),
			None => return,
		};
		let weak = Arc::downgrade(&self.inner);
		rill_scheduler::global().schedule(context, self.inner.owner, deps, move || {
			if let Some(inner) = weak.upgrade() {
				Driver {
					inner,
				}
				.run(context);
			}
		});
	}

	/// One graph run: drain buffered deltas through the pipeline,
	/// classify the accumulated output, hand it to the consumer, then
	/// let an under-filled window ask its source for another page.
	fn run(&self, context: Option<ContextId>) {
		let (graph, accumulator) = match self.inner.active.lock().as_ref() {
			Some(active) => (Arc::clone(&active.graph), Arc::clone(&active.accumulator)),
			None => return,
		};

		if let Err(err) = graph.lock().run() {
			error!(live_query = %self.inner.id, error = %err, "graph run failed");
			return;
		}

		let changes = accumulator.lock().drain();
		if !changes.is_empty() {
			self.inner.consumer.consume(changes, context);
		}

		self.maybe_load_more(context);
	}

	fn maybe_load_more(&self, context: Option<ContextId>) {
		let (graph, optimizable, collection, base_where) = {
			let active = self.inner.active.lock();
			let Some(active) = active.as_ref() else {
				return;
			};
			let Some(optimizable) = active.optimizable.clone() else {
				return;
			};
			let Some(collection) = active.sources.get(&optimizable.alias).cloned() else {
				return;
			};
			// source_wheres are already expressed over the source's bare
			// rows.
			let base_where = active.source_wheres.get(&optimizable.alias).cloned();
			(Arc::clone(&active.graph), optimizable, collection, base_where)
		};

		let Some(shortfall) = graph.lock().window_shortfall(optimizable.node) else {
			return;
		};
		if *self.inner.load_failed_context.lock() == Some(context) {
			return;
		}

		let mut options = LoadSubsetOptions {
			where_clause: base_where.clone(),
			order_by: optimizable.order_by.clone(),
			limit: Some(optimizable.offset + optimizable.limit),
			offset: None,
			cursor: None,
		};
		if let Some(last) = shortfall.last_sort_value {
			let order_expr = optimizable.order_by[0].expression.clone();
			let ascending = optimizable.order_by[0].options.direction == Direction::Asc;
			let beyond = if ascending {
				dsl::gt(order_expr.clone(), Expression::Value(last.clone()))
			} else {
				dsl::lt(order_expr.clone(), Expression::Value(last.clone()))
			};
			let covered = if ascending {
				dsl::lte(order_expr, Expression::Value(last))
			} else {
				dsl::gte(order_expr, Expression::Value(last))
			};
			let where_from = match &base_where {
				Some(base) => intersect_where_predicates(&[base.clone(), beyond]),
				None => beyond,
			};
			if where_from.is_literal_false() {
				return;
			}
			let where_current = match &base_where {
				Some(base) => intersect_where_predicates(&[base.clone(), covered]),
				None => covered,
			};
			options.cursor = Some(LoadCursor {
				where_current,
				where_from,
			});
		}

		if let Err(err) = collection.load_subset(options) {
			warn!(live_query = %self.inner.id, error = %err, "window load failed, treating as exhausted");
			*self.inner.load_failed_context.lock() = Some(context);
		}
	}
}

fn messages_to_deltas(messages: &[ChangeMessage]) -> Vec<Delta> {
	let mut deltas = Vec::with_capacity(messages.len());
	for message in messages {
		match message.kind {
			ChangeKind::Insert => {
				if let Some(value) = &message.value {
					deltas.push(Delta::insert(message.key.clone(), value.clone()));
				}
			}
			ChangeKind::Update => {
				if let Some(previous) = &message.previous_value {
					deltas.push(Delta::delete(message.key.clone(), previous.clone()));
				}
				if let Some(value) = &message.value {
					deltas.push(Delta::insert(message.key.clone(), value.clone()));
				}
			}
			ChangeKind::Delete => {
				let previous = message.previous_value.as_ref().or(message.value.as_ref());
				if let Some(previous) = previous {
					deltas.push(Delta::delete(message.key.clone(), previous.clone()));
				}
			}
		}
	}
	deltas
}
