//! Control Flow Graph construction, mutation and linearization.
//!
//! This module provides the editable CFG over Dex-family bytecode: a typed
//! graph of basic blocks built from a linear instruction list, a mutation
//! API that keeps the dual adjacency lists and block terminators consistent
//! under arbitrary edits, and the inverse transformation back into a linear
//! list.
//!
//! # Key Components
//!
//! - [`ControlFlowGraph`] - the graph container and mutation API
//! - [`Block`] - a basic block with its incident edges
//! - [`Edge`] / [`EdgeKind`] - typed edges (goto, branch, throw, ghost)
//! - [`Dominators`] - immediate-dominator computation results
//!
//! # Edge Types
//!
//! The CFG distinguishes four kinds of control flow edges:
//!
//! - **Goto**: unconditional transfer, including fallthrough
//! - **Branch**: the taken side of a conditional, or one switch case
//!   (carrying its case key)
//! - **Throw**: potential transfer to an exception handler, carrying the
//!   caught type and the handler's position in the catch chain
//! - **Ghost**: synthetic edges feeding the ghost exit block
//!
//! # Construction and linearization
//!
//! ```rust
//! use dexflow::{ControlFlowGraph, ir::{Instruction, Item, ItemList, Opcode}};
//!
//! let mut ir = ItemList::new();
//! ir.push(Item::Insn(Instruction::new(Opcode::Const).with_dest(0)));
//! ir.push(Item::Insn(Instruction::new(Opcode::Return).with_srcs(vec![0])));
//!
//! let cfg = ControlFlowGraph::build(ir, 1)?;
//! let rebuilt = cfg.linearize();
//! assert_eq!(rebuilt.len(), 2);
//! # Ok::<(), dexflow::Error>(())
//! ```

mod block;
mod builder;
mod dominators;
mod edge;
mod exits;
mod graph;
mod linearize;

pub use block::{Block, BlockId};
pub use dominators::{DominatorInfo, Dominators};
pub use edge::{Edge, EdgeId, EdgeKind, EdgeType};
pub use graph::ControlFlowGraph;
