// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Live query collections and delta effects: the glue that turns a
//! compiled query graph into a subscribable collection, or into a stream
//! of enter/exit/update callbacks.

pub use effect::{EffectHandle, EffectHandlers, EffectOptions, create_effect, create_effect_on};
pub use live::{
	LiveQueryCollection, LiveQueryOptions, LiveSubscription, ResultKeyFn, create_live_query,
	create_live_query_from_ir, create_live_query_with,
};

mod driver;
mod effect;
mod live;

pub type Result<T> = std::result::Result<T, rill_core::Error>;
