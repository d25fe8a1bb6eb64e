// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::HashSet,
	sync::atomic::{AtomicU64, Ordering},
};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{trace, warn};

/// Identifies one transaction context. Jobs in the same context are
/// coalesced and ordered; distinct contexts are independent.
pub type ContextId = u64;

/// Identifies a job owner (a live query collection, an effect). One owner
/// runs at most once per context.
pub type OwnerId = u64;

type Job = Box<dyn FnOnce() + Send>;
type ClearCallback = Box<dyn Fn(ContextId) + Send + Sync>;

struct ScheduledJob {
	deps: Vec<OwnerId>,
	run: Job,
}

#[derive(Default)]
struct State {
	queues: IndexMap<ContextId, IndexMap<OwnerId, ScheduledJob>>,
	completed: IndexMap<ContextId, HashSet<OwnerId>>,
	flushing: HashSet<ContextId>,
}

/// See the crate docs. Obtain the process-wide instance with [`global`].
pub struct Scheduler {
	state: Mutex<State>,
	on_clear: Mutex<Vec<ClearCallback>>,
	context_seq: AtomicU64,
	owner_seq: AtomicU64,
}

static GLOBAL: Lazy<Scheduler> = Lazy::new(Scheduler::new);

pub fn global() -> &'static Scheduler {
	&GLOBAL
}

impl Scheduler {
	pub fn new() -> Self {
		Scheduler {
			state: Mutex::new(State::default()),
			on_clear: Mutex::new(Vec::new()),
			context_seq: AtomicU64::new(1),
			owner_seq: AtomicU64::new(1),
		}
	}

	pub fn allocate_context(&self) -> ContextId {
		self.context_seq.fetch_add(1, Ordering::Relaxed)
	}

	pub fn allocate_owner(&self) -> OwnerId {
		self.owner_seq.fetch_add(1, Ordering::Relaxed)
	}

	/// Schedule `run` for `owner` within `context`.
	///
	/// Without a context the job runs immediately and synchronously.
	/// Re-scheduling an owner in the same context unions the dependencies
	/// and keeps only the latest `run`. An owner that already ran in this
	/// context is not run again.
	pub fn schedule(
		&self,
		context: Option<ContextId>,
		owner: OwnerId,
		deps: Vec<OwnerId>,
		run: impl FnOnce() + Send + 'static,
	) {
		let Some(context) = context else {
			run();
			return;
		};

		let mut state = self.state.lock();
		if state.completed.get(&context).is_some_and(|done| done.contains(&owner)) {
			trace!(context, owner, "owner already ran in context, skipping");
			return;
		}
		let queue = state.queues.entry(context).or_default();
		match queue.entry(owner) {
			indexmap::map::Entry::Occupied(mut entry) => {
				let job = entry.get_mut();
				for dep in deps {
					if !job.deps.contains(&dep) {
						job.deps.push(dep);
					}
				}
				job.run = Box::new(run);
			}
			indexmap::map::Entry::Vacant(entry) => {
				entry.insert(ScheduledJob {
					deps,
					run: Box::new(run),
				});
			}
		}
	}

	pub fn has_pending(&self, context: ContextId) -> bool {
		self.state.lock().queues.get(&context).is_some_and(|queue| !queue.is_empty())
	}

	/// Drain the context's queue in dependency order, running each owner
	/// at most once. Jobs may schedule more work into the same context;
	/// it is picked up before the flush returns. Nested flushes of the
	/// same context are no-ops.
	pub fn flush(&self, context: ContextId) {
		{
			let mut state = self.state.lock();
			if !state.flushing.insert(context) {
				trace!(context, "nested flush ignored");
				return;
			}
		}

		loop {
			let job = {
				let mut state = self.state.lock();
				match next_ready(&mut state, context) {
					Some(job) => job,
					None => break,
				}
			};
			(job)();
		}

		let mut state = self.state.lock();
		state.flushing.remove(&context);
		state.queues.shift_remove(&context);
		state.completed.shift_remove(&context);
	}

	/// Discard a context (transaction rollback). Pending jobs are dropped
	/// and every registered clear callback fires so components can release
	/// per-context buffered state.
	pub fn clear(&self, context: ContextId) {
		let dropped = {
			let mut state = self.state.lock();
			state.completed.shift_remove(&context);
			state.queues.shift_remove(&context)
		};
		if let Some(dropped) = dropped {
			trace!(context, jobs = dropped.len(), "context cleared with pending jobs");
		}
		for callback in self.on_clear.lock().iter() {
			callback(context);
		}
	}

	/// Register a callback fired whenever a context is discarded.
	pub fn on_clear(&self, callback: impl Fn(ContextId) + Send + Sync + 'static) {
		self.on_clear.lock().push(Box::new(callback));
	}
}

impl Default for Scheduler {
	fn default() -> Self {
		Scheduler::new()
	}
}

/// Pop the first job (in insertion order) whose dependencies have no
/// pending job in this context. Falls back to raw insertion order if the
/// dependency graph is cyclic.
fn next_ready(state: &mut State, context: ContextId) -> Option<Job> {
	let queue = state.queues.get(&context)?;
	if queue.is_empty() {
		return None;
	}

	let owner = queue
		.iter()
		.find(|(_, job)| job.deps.iter().all(|dep| !queue.contains_key(dep)))
		.map(|(owner, _)| *owner)
		.unwrap_or_else(|| {
			warn!(context, "cyclic scheduler dependencies, running in insertion order");
			*queue.keys().next().expect("queue not empty")
		});

	let queue = state.queues.get_mut(&context)?;
	let job = queue.shift_remove(&owner)?;
	state.completed.entry(context).or_default().insert(owner);
	Some(job.run)
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::Scheduler;

	fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
		let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
		let log_clone = Arc::clone(&log);
		let record = move |name: &'static str| -> Box<dyn FnOnce() + Send> {
			let log = Arc::clone(&log_clone);
			Box::new(move || log.lock().unwrap().push(name))
		};
		(log, record)
	}

	#[test]
	fn test_null_context_runs_immediately() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();
		scheduler.schedule(None, 1, vec![], record("a"));
		assert_eq!(*log.lock().unwrap(), vec!["a"]);
	}

	#[test]
	fn test_dependencies_order_execution() {
		let scheduler = Scheduler::new();
		let context = scheduler.allocate_context();
		let (log, record) = recorder();
		// b depends on a but is scheduled first
		scheduler.schedule(Some(context), 2, vec![1], record("b"));
		scheduler.schedule(Some(context), 1, vec![], record("a"));
		scheduler.flush(context);
		assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
	}

	#[test]
	fn test_reschedule_replaces_run_and_unions_deps() {
		let scheduler = Scheduler::new();
		let context = scheduler.allocate_context();
		let (log, record) = recorder();
		scheduler.schedule(Some(context), 1, vec![], record("old"));
		scheduler.schedule(Some(context), 1, vec![2], record("new"));
		scheduler.schedule(Some(context), 2, vec![], record("dep"));
		scheduler.flush(context);
		assert_eq!(*log.lock().unwrap(), vec!["dep", "new"]);
	}

	#[test]
	fn test_owner_runs_at_most_once_per_context() {
		let scheduler = Scheduler::new();
		let context = scheduler.allocate_context();
		let (log, record) = recorder();
		scheduler.schedule(Some(context), 1, vec![], record("first"));
		scheduler.flush(context);

		// A fresh context runs the owner again.
		let next_context = scheduler.allocate_context();
		scheduler.schedule(Some(next_context), 1, vec![], record("second"));
		scheduler.flush(next_context);
		assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
	}

	#[test]
	fn test_jobs_scheduled_during_flush_run_in_same_flush() {
		let scheduler = Arc::new(Scheduler::new());
		let context = scheduler.allocate_context();
		let (log, record) = recorder();
		let chained = record("chained");
		let scheduler_clone = Arc::clone(&scheduler);
		scheduler.schedule(Some(context), 1, vec![], move || {
			scheduler_clone.schedule(Some(context), 2, vec![1], chained);
		});
		scheduler.flush(context);
		assert_eq!(*log.lock().unwrap(), vec!["chained"]);
	}

	#[test]
	fn test_clear_drops_jobs_and_fires_callbacks() {
		let scheduler = Scheduler::new();
		let context = scheduler.allocate_context();
		let (log, record) = recorder();
		let cleared: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
		let cleared_clone = Arc::clone(&cleared);
		scheduler.on_clear(move |context| cleared_clone.lock().unwrap().push(context));

		scheduler.schedule(Some(context), 1, vec![], record("never"));
		scheduler.clear(context);
		scheduler.flush(context);

		assert!(log.lock().unwrap().is_empty());
		assert_eq!(*cleared.lock().unwrap(), vec![context]);
	}
}
