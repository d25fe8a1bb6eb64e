// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use rill_core::{Delta, Error};

use crate::operator::OperatorKind;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// State of an under-filled limit window after a run, handed to the
/// load-more protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowShortfall {
	/// Rows currently in the window.
	pub have: usize,
	/// Rows the window wants (`offset + limit`).
	pub want: usize,
	/// Sort key of the last row the operator has seen at all, loaded or
	/// not; a follow-up load starts past it.
	pub last_sort_value: Option<rill_core::Value>,
}

struct Node {
	operator: OperatorKind,
	/// Buffered deltas per input port, filled by upstream nodes or the
	/// external input handle.
	buffers: Vec<Vec<Delta>>,
	/// Downstream edges: (target node, target port).
	downstream: Vec<(NodeId, usize)>,
}

/// A dataflow graph over keyed change multisets.
///
/// Nodes are appended in construction order, which is already topological
/// (edges only point from existing nodes to new ones); `finalize` freezes
/// the topology. `run` drains all buffered deltas in one deterministic
/// pass. A nested `run` from inside an output sink is ignored; sinks
/// schedule follow-up work instead.
pub struct FlowGraph {
	nodes: Vec<Node>,
	inputs: IndexMap<String, NodeId>,
	finalized: bool,
	running: bool,
}

impl FlowGraph {
	pub fn new() -> Self {
		FlowGraph {
			nodes: Vec::new(),
			inputs: IndexMap::new(),
			finalized: false,
			running: false,
		}
	}

	/// Register an external input stream for a source alias.
	pub fn add_input(&mut self, alias: impl Into<String>) -> crate::Result<NodeId> {
		let alias = alias.into();
		if self.finalized {
			return Err(Error::Internal(format!("graph is finalized, cannot add input {alias}")));
		}
		if self.inputs.contains_key(&alias) {
			return Err(Error::Internal(format!("input {alias} already registered")));
		}
		let id = self.push_node(OperatorKind::Input, &[]);
		self.inputs.insert(alias, id);
		Ok(id)
	}

	/// Append an operator consuming the given upstream outputs; upstream
	/// order defines the operator's input ports.
	pub fn add_operator(&mut self, operator: OperatorKind, upstream: &[NodeId]) -> crate::Result<NodeId> {
		if self.finalized {
			return Err(Error::Internal("graph is finalized, cannot add operator".to_string()));
		}
		Ok(self.push_node(operator, upstream))
	}

	fn push_node(&mut self, operator: OperatorKind, upstream: &[NodeId]) -> NodeId {
		let id = NodeId(self.nodes.len());
		let ports = upstream.len().max(1);
		self.nodes.push(Node {
			operator,
			buffers: (0..ports).map(|_| Vec::new()).collect(),
			downstream: Vec::new(),
		});
		for (port, source) in upstream.iter().enumerate() {
			self.nodes[source.0].downstream.push((id, port));
		}
		id
	}

	/// Freeze the topology. Required before the first run.
	pub fn finalize(&mut self) {
		self.finalized = true;
	}

	pub fn is_finalized(&self) -> bool {
		self.finalized
	}

	pub fn input(&self, alias: &str) -> Option<NodeId> {
		self.inputs.get(alias).copied()
	}

	pub fn aliases(&self) -> impl Iterator<Item = &String> {
		self.inputs.keys()
	}

	/// Buffer deltas at an input without running the graph.
	pub fn send(&mut self, alias: &str, deltas: impl IntoIterator<Item = Delta>) -> crate::Result<()> {
		let id = self
			.inputs
			.get(alias)
			.copied()
			.ok_or_else(|| Error::UnknownAlias(alias.to_string()))?;
		self.nodes[id.0].buffers[0].extend(deltas);
		Ok(())
	}

	/// True while any node has buffered deltas not yet propagated.
	pub fn pending_work(&self) -> bool {
		self.nodes.iter().any(|node| node.buffers.iter().any(|buffer| !buffer.is_empty()))
	}

	/// Per-operator observability hook.
	pub fn node_pending_work(&self, node: NodeId) -> bool {
		self.nodes.get(node.0).is_some_and(|n| n.buffers.iter().any(|b| !b.is_empty()))
	}

	/// Drain the graph in one topological pass. Nested calls from inside
	/// a sink are ignored.
	pub fn run(&mut self) -> crate::Result<()> {
		if self.running {
			trace!("nested graph run ignored");
			return Ok(());
		}
		if !self.finalized {
			return Err(Error::Internal("graph must be finalized before running".to_string()));
		}
		self.running = true;
		let result = self.run_inner();
		self.running = false;
		result
	}

	fn run_inner(&mut self) -> crate::Result<()> {
		// Node indices are topologically ordered by construction, so a
		// single forward pass drains every buffer, including deltas
		// produced while the pass is in flight.
		for index in 0..self.nodes.len() {
			let ports = self.nodes[index].buffers.len();
			for port in 0..ports {
				let deltas = std::mem::take(&mut self.nodes[index].buffers[port]);
				if deltas.is_empty() {
					continue;
				}
				let output = self.nodes[index].operator.apply(port, deltas)?;
				if output.is_empty() {
					continue;
				}
				let downstream = self.nodes[index].downstream.clone();
				for (target, target_port) in downstream {
					self.nodes[target.0].buffers[target_port].extend(output.iter().cloned());
				}
			}
		}
		Ok(())
	}

	/// The under-filled window state of a limit-aware order-by node, if
	/// that node is one and is short.
	pub fn window_shortfall(&self, node: NodeId) -> Option<WindowShortfall> {
		match &self.nodes.get(node.0)?.operator {
			OperatorKind::TopK(top_k) => top_k.shortfall(),
			_ => None,
		}
	}
}

impl Default for FlowGraph {
	fn default() -> Self {
		FlowGraph::new()
	}
}

/// Shared handle to a graph input, used by collection subscriptions to
/// feed a live query's pipeline.
#[derive(Clone)]
pub struct InputHandle {
	graph: Arc<Mutex<FlowGraph>>,
	alias: String,
}

impl InputHandle {
	pub fn new(graph: Arc<Mutex<FlowGraph>>, alias: impl Into<String>) -> Self {
		InputHandle {
			graph,
			alias: alias.into(),
		}
	}

	pub fn alias(&self) -> &str {
		&self.alias
	}

	pub fn send(&self, deltas: impl IntoIterator<Item = Delta>) -> crate::Result<()> {
		self.graph.lock().send(&self.alias, deltas)
	}
}
