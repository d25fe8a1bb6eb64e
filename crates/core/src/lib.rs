// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Shared primitives for the Rill engine: the value model, keys, rows,
//! change messages, the keyed change multiset and fractional order indices.

pub use accumulator::{ChangeAccumulator, OutputChange};
pub use change::{ChangeKind, ChangeMessage, Delta};
pub use error::Error;
pub use fractional::frac_between;
pub use key::{Key, KeyError};
pub use ordered_float::OrderedF64;
pub use row::Row;
pub use value::{Timestamp, Value};

mod accumulator;
mod change;
mod error;
mod fractional;
mod key;
mod ordered_float;
mod row;
mod value;

pub type Result<T> = std::result::Result<T, Error>;
