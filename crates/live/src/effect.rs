// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	Arc,
	atomic::{AtomicBool, AtomicU64, Ordering},
};

use parking_lot::Mutex;

use rill_core::OutputChange;
use rill_query::QueryBuilder;
use rill_scheduler::ContextId;

use crate::driver::{Driver, GraphConsumer};

static EFFECT_SEQ: AtomicU64 = AtomicU64::new(1);

pub struct EffectOptions {
	pub id: Option<String>,
	/// Discard the first graph run's output (the initial state).
	pub skip_initial: bool,
}

impl Default for EffectOptions {
	fn default() -> Self {
		EffectOptions {
			id: None,
			skip_initial: false,
		}
	}
}

/// Per-event handlers; any subset may be set. Unset events are
/// discarded, so an enter-only effect never hears about exits.
#[derive(Default)]
pub struct EffectHandlers {
	pub on_enter: Option<Box<dyn FnMut(&rill_core::Key, &rill_core::Row) + Send>>,
	pub on_exit: Option<Box<dyn FnMut(&rill_core::Key, &rill_core::Row) + Send>>,
	pub on_update: Option<Box<dyn FnMut(&rill_core::Key, &rill_core::Row, &rill_core::Row) + Send>>,
}

type BatchCallback = Box<dyn FnMut(&[OutputChange]) + Send>;

struct EffectConsumer {
	callback: Mutex<BatchCallback>,
	skip_initial: bool,
	/// False while the activation's initial runs are replaying current
	/// state; `skip_initial` discards everything before this flips.
	activation_done: AtomicBool,
	disposed: Arc<AtomicBool>,
}

impl GraphConsumer for EffectConsumer {
	fn consume(&self, changes: Vec<OutputChange>, _context: Option<ContextId>) {
		if self.disposed.load(Ordering::Acquire) {
			return;
		}
		if self.skip_initial && !self.activation_done.load(Ordering::Acquire) {
			return;
		}
		(self.callback.lock())(&changes);
	}
}

/// A delta-only subscriber over a query graph: no result collection is
/// materialized, the callback sees classified enter/exit/update changes.
pub struct EffectHandle {
	driver: Driver,
	disposed: Arc<AtomicBool>,
}

impl EffectHandle {
	/// Abort delivery and release graph references. In-flight callbacks
	/// have completed when this returns; the cooperative runtime never
	/// holds one across a suspension point.
	pub fn dispose(&self) {
		self.disposed.store(true, Ordering::Release);
		self.driver.deactivate();
	}

	pub fn disposed(&self) -> bool {
		self.disposed.load(Ordering::Acquire)
	}
}

/// Run a per-batch callback over a query's delta stream.
pub fn create_effect(
	builder: &QueryBuilder,
	callback: impl FnMut(&[OutputChange]) + Send + 'static,
	options: EffectOptions,
) -> rill_core::Result<EffectHandle> {
	let ir = builder.build()?;
	let id = options
		.id
		.unwrap_or_else(|| format!("effect-{}", EFFECT_SEQ.fetch_add(1, Ordering::Relaxed)));

	let disposed = Arc::new(AtomicBool::new(false));
	let consumer = Arc::new(EffectConsumer {
		callback: Mutex::new(Box::new(callback)),
		skip_initial: options.skip_initial,
		activation_done: AtomicBool::new(false),
		disposed: Arc::clone(&disposed),
	});
	let driver = Driver::new(id, ir, Arc::clone(&consumer) as Arc<dyn GraphConsumer>);
	driver.activate()?;
	consumer.activation_done.store(true, Ordering::Release);

	Ok(EffectHandle {
		driver,
		disposed,
	})
}

/// Run per-event handlers over a query's delta stream; events without a
/// handler are dropped.
pub fn create_effect_on(
	builder: &QueryBuilder,
	handlers: EffectHandlers,
	options: EffectOptions,
) -> rill_core::Result<EffectHandle> {
	let mut handlers = handlers;
	create_effect(
		builder,
		move |changes| {
			for change in changes {
				match change {
					OutputChange::Enter { key, value, .. } => {
						if let Some(on_enter) = handlers.on_enter.as_mut() {
							on_enter(key, value);
						}
					}
					OutputChange::Exit { key, previous } => {
						if let Some(on_exit) = handlers.on_exit.as_mut() {
							on_exit(key, previous);
						}
					}
					OutputChange::Update { key, value, previous, .. } => {
						if let Some(on_update) = handlers.on_update.as_mut() {
							on_update(key, value, previous);
						}
					}
				}
			}
		},
		options,
	)
}
