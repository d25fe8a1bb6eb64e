// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The incremental dataflow runtime: differential operators over keyed
//! change multisets, the graph that wires them together, and the compiler
//! that lowers query IR into operator pipelines.

pub use compile::{CompileContext, CompiledQuery, OptimizableOrderBy, compile};
pub use graph::{FlowGraph, InputHandle, NodeId, WindowShortfall};
pub use operator::OperatorKind;

mod compile;
mod graph;
pub mod operator;

pub type Result<T> = std::result::Result<T, rill_core::Error>;
