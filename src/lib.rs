// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # dexflow
//!
//! An editable control-flow graph library for Dex-family register-machine
//! bytecode. `dexflow` turns a linear method body - opcodes interleaved with
//! branch targets, try-region delimiters and catch markers - into a typed
//! graph of basic blocks, keeps that graph consistent under structural
//! edits, and rebuilds a correct linear body on demand.
//!
//! # Architecture
//!
//! The library is organized into two layers:
//!
//! - **IR Layer** ([`crate::ir`]): the linear instruction model - opcodes
//!   with their control-flow classifiers, marker items, and the owning
//!   instruction list.
//! - **CFG Layer** ([`crate::cfg`]): graph construction, the mutation API
//!   with its terminator-fixup and cleanup rules, exit-block discovery via
//!   an iterative SCC walk, immediate dominators, and linearization.
//!
//! ## Key Components
//!
//! - [`ControlFlowGraph`] - the graph container, in editable or read-only mode
//! - [`crate::cfg::Block`] and [`crate::cfg::Edge`] - blocks and typed edges
//! - [`crate::cfg::Dominators`] - immediate-dominator queries
//! - [`crate::ir::ItemList`] - the linear form consumed and produced
//! - [`crate::Error`] and [`crate::Result`] - the construction-surface errors
//!
//! # Usage Examples
//!
//! ## Building and editing a graph
//!
//! ```rust
//! use dexflow::{ControlFlowGraph, cfg::EdgeType};
//! use dexflow::ir::{BranchTarget, Instruction, Item, ItemList, Opcode};
//!
//! // if-eqz v0, L; const v0; L: return-void
//! let cond = Instruction::new(Opcode::IfEqz).with_srcs(vec![0]);
//! let cond_id = cond.id();
//! let mut ir = ItemList::new();
//! ir.push(Item::Insn(cond));
//! ir.push(Item::Insn(Instruction::new(Opcode::Const).with_dest(0)));
//! ir.push(Item::Target(BranchTarget { branch: cond_id, case_key: None }));
//! ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
//!
//! let mut cfg = ControlFlowGraph::build(ir, 1)?;
//! assert_eq!(cfg.block_count(), 3);
//!
//! // Drop the taken branch; the conditional decays to a plain goto.
//! let entry = cfg.entry_block();
//! let taken = cfg.get_succ_edge_of_type(entry, EdgeType::Branch).unwrap();
//! cfg.delete_edge(taken);
//! cfg.simplify();
//!
//! let body = cfg.linearize();
//! # Ok::<(), dexflow::Error>(())
//! ```
//!
//! ## Analyses
//!
//! ```rust,no_run
//! # use dexflow::{ControlFlowGraph, ir::ItemList};
//! # let ir = ItemList::new();
//! let mut cfg = ControlFlowGraph::build(ir, 0)?;
//!
//! cfg.calculate_exit_block();
//! let exits = cfg.real_exit_blocks(true);
//!
//! let dominators = cfg.immediate_dominators();
//! for block in cfg.block_ids() {
//!     assert!(dominators.dominates(cfg.entry_block(), block));
//! }
//! # Ok::<(), dexflow::Error>(())
//! ```
//!
//! # Error Handling
//!
//! The construction surface returns [`Result`]; everything past it treats
//! precondition violations as fatal programming errors and panics with a
//! diagnostic, since a quietly corrupt graph corrupts the code every
//! downstream pass emits. See [`Error`] for the rationale.
//!
//! # Thread Safety
//!
//! One graph is a single-threaded, non-reentrant structure. Distinct graphs
//! are independent and may be driven concurrently by separate worker
//! threads.

pub mod cfg;
mod error;
pub mod ir;

pub use cfg::ControlFlowGraph;
pub use error::{Error, Result};
