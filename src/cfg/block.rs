//! Basic blocks and block-local item inspection.
//!
//! A [`Block`] is a maximal straight-line instruction segment together with
//! its incident edges. In an editable CFG each block exclusively owns its
//! items; in a read-only CFG a block records a half-open range into the
//! shared source list and the item accessors live on
//! [`ControlFlowGraph::block_items`](crate::cfg::ControlFlowGraph::block_items).

use std::fmt;

use crate::cfg::EdgeId;
use crate::ir::{Instruction, Item, ItemList};

/// A strongly-typed identifier for blocks within a control flow graph.
///
/// `BlockId` wraps a `usize` index into the CFG's block arena. Ids are
/// dense at creation time, assigned monotonically, and never reused:
/// removing a block tombstones its arena slot. The entry block of a freshly
/// built CFG is id 0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a new `BlockId` from a raw index value.
    ///
    /// This constructor is primarily intended for internal use and testing.
    /// Normal usage should obtain `BlockId` values from the CFG.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the raw index value of this block identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block: an ordered instruction segment plus incident edges.
///
/// The predecessor and successor lists are ordered multisets of edge ids;
/// duplicate edges between the same pair of blocks are permitted (distinct
/// switch cases sharing a target). Both lists are maintained exclusively by
/// the CFG's mutation API.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    /// Owned items; populated in editable mode, empty in read-only mode.
    pub(crate) entries: ItemList,
    /// Half-open range into the shared source list; read-only mode only.
    pub(crate) span: (usize, usize),
    pub(crate) preds: Vec<EdgeId>,
    pub(crate) succs: Vec<EdgeId>,
}

impl Block {
    pub(crate) fn new(id: BlockId) -> Self {
        Block {
            id,
            entries: ItemList::new(),
            span: (0, 0),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    /// Returns this block's id.
    #[must_use]
    #[inline]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Returns the incoming edges, in insertion order.
    #[must_use]
    pub fn preds(&self) -> &[EdgeId] {
        &self.preds
    }

    /// Returns the outgoing edges, in insertion order.
    #[must_use]
    pub fn succs(&self) -> &[EdgeId] {
        &self.succs
    }

    /// Returns the owned items of this block.
    ///
    /// Only meaningful in editable mode; read-only blocks keep their items
    /// in the shared source list and this list is empty.
    #[must_use]
    pub fn entries(&self) -> &ItemList {
        &self.entries
    }

    /// Returns `true` if this block holds no items at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the last opcode item of this block, if any.
    #[must_use]
    pub fn last_insn(&self) -> Option<&Instruction> {
        last_insn_in(self.entries.as_slice())
    }

    /// Returns the first opcode item of this block, if any.
    #[must_use]
    pub fn first_insn(&self) -> Option<&Instruction> {
        first_insn_in(self.entries.as_slice())
    }

    /// Returns `true` if the first opcode is a move-result(-pseudo).
    ///
    /// Such a block is inseparable from the block holding its primary
    /// instruction; linearization keeps the pair adjacent.
    #[must_use]
    pub fn starts_with_move_result(&self) -> bool {
        starts_with_move_result_in(self.entries.as_slice())
    }

    /// Returns the last conditional-branch or switch opcode, scanning
    /// backwards.
    #[must_use]
    pub fn get_conditional_branch(&self) -> Option<&Instruction> {
        self.entries.as_slice().iter().rev().find_map(|item| {
            item.insn().filter(|insn| {
                insn.opcode().is_conditional_branch() || insn.opcode().is_switch()
            })
        })
    }

    /// Returns the number of non-internal opcodes in this block.
    #[must_use]
    pub fn num_opcodes(&self) -> u32 {
        num_opcodes_in(self.entries.as_slice())
    }

    /// Removes the first target marker belonging to `branch` and returns
    /// its case key.
    ///
    /// Multiple switch cases can point at the same block, leaving several
    /// markers for one branch; the markers are identical save the case key,
    /// so taking them in forward order is fine.
    ///
    /// # Panics
    ///
    /// Panics if no marker for `branch` is present; construction recorded a
    /// target that the block does not carry, which is a malformed graph.
    pub(crate) fn remove_first_matching_target(
        &mut self,
        branch: crate::ir::InsnId,
    ) -> Option<i32> {
        let found = self.entries.iter().enumerate().find_map(|(index, item)| {
            match item {
                Item::Target(target) if target.branch == branch => {
                    Some((index, target.case_key))
                }
                _ => None,
            }
        });
        let Some((index, case_key)) = found else {
            panic!("block {} has no targets matching {:?}", self.id, branch);
        };
        self.entries.remove(index);
        case_key
    }
}

/// Returns the last opcode in an item slice.
pub(crate) fn last_insn_in(items: &[Item]) -> Option<&Instruction> {
    items.iter().rev().find_map(Item::insn)
}

/// Returns the first opcode in an item slice.
pub(crate) fn first_insn_in(items: &[Item]) -> Option<&Instruction> {
    items.iter().find_map(Item::insn)
}

/// Returns `true` if the first opcode is a move-result(-pseudo).
pub(crate) fn starts_with_move_result_in(items: &[Item]) -> bool {
    first_insn_in(items).is_some_and(|insn| insn.opcode().is_any_move_result())
}

/// Returns `true` if the last opcode throws or may throw.
pub(crate) fn ends_with_may_throw(items: &[Item]) -> bool {
    last_insn_in(items)
        .is_some_and(|insn| insn.opcode().is_throw() || insn.opcode().may_throw())
}

/// Returns `true` if no opcode in the slice throws or may throw.
pub(crate) fn cannot_throw(items: &[Item]) -> bool {
    items
        .iter()
        .filter_map(Item::insn)
        .all(|insn| !insn.opcode().is_throw() && !insn.opcode().may_throw())
}

/// Counts non-internal opcodes in an item slice.
pub(crate) fn num_opcodes_in(items: &[Item]) -> u32 {
    let count = items
        .iter()
        .filter_map(Item::insn)
        .filter(|insn| !insn.opcode().is_internal())
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
