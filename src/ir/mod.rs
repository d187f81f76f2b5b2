//! The linear instruction model consumed and produced by the CFG.
//!
//! A method body arrives as an [`ItemList`]: opcodes interleaved with
//! branch-target markers, try-region delimiters, catch markers and source
//! positions. CFG construction partitions the list into blocks and converts
//! every marker into typed edges; linearization performs the inverse.
//!
//! # Key Components
//!
//! - [`Opcode`] - the opcode set with its control-flow classifiers
//! - [`Instruction`] - an opcode plus register operands, identified by [`InsnId`]
//! - [`Item`] - the tagged list element (opcode or marker)
//! - [`ItemList`] - the owning sequence with splice primitives

mod item;
mod list;
mod opcode;

pub use item::{
    BranchTarget, CatchEntry, CatchId, InsnId, Instruction, Item, PosId, SourcePosition,
    TryEntry, TypeToken,
};
pub use list::ItemList;
pub use opcode::{Branchingness, Opcode, OpcodeFlags};
