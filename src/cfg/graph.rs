//! The control flow graph container and its mutation API.
//!
//! [`ControlFlowGraph`] owns every block and edge it contains. Blocks and
//! edges live in id-keyed arenas; removal tombstones the slot so ids stay
//! stable for the lifetime of the graph. The dual adjacency invariant - an
//! edge appears in its source's successor list and its target's predecessor
//! list - is maintained by every mutation in this module.
//!
//! # Modes
//!
//! An editable graph (`ControlFlowGraph<'static>`, built by
//! [`ControlFlowGraph::build`]) owns its instruction items and allows
//! structural mutation. A read-only graph borrows the caller's instruction
//! list for `'a` and forbids everything except edge removal on unreachable
//! blocks; its blocks reference item ranges instead of owning items.
//!
//! # Error model
//!
//! Mutations treat precondition violations as fatal programming errors and
//! panic with the offending block id. Callers are in-process optimization
//! passes; a quietly corrupt graph would corrupt emitted code, so failing
//! loudly wins.

use std::fmt::Write as _;

use rustc_hash::FxHashSet;

use crate::cfg::{
    block::{
        cannot_throw, first_insn_in, last_insn_in, num_opcodes_in, starts_with_move_result_in,
    },
    Block, BlockId, Edge, EdgeId, EdgeKind, EdgeType,
};
use crate::ir::{Branchingness, InsnId, Item, ItemList, PosId, TypeToken};

/// A control flow graph over Dex-family bytecode blocks.
///
/// See the [module documentation](self) for the ownership and mode rules.
///
/// # Examples
///
/// ```rust
/// use dexflow::{ControlFlowGraph, ir::{Instruction, Item, ItemList, Opcode}};
///
/// let mut ir = ItemList::new();
/// ir.push(Item::Insn(Instruction::new(Opcode::Nop)));
/// ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
///
/// let cfg = ControlFlowGraph::build(ir, 0)?;
/// assert_eq!(cfg.block_count(), 1);
/// # Ok::<(), dexflow::Error>(())
/// ```
#[derive(Debug)]
pub struct ControlFlowGraph<'a> {
    pub(crate) blocks: Vec<Option<Block>>,
    pub(crate) edges: Vec<Option<Edge>>,
    pub(crate) entry: BlockId,
    pub(crate) exit: Option<BlockId>,
    pub(crate) registers_size: u16,
    pub(crate) editable: bool,
    /// The shared source list; present in read-only mode only.
    pub(crate) source: Option<&'a ItemList>,
}

impl<'a> ControlFlowGraph<'a> {
    pub(crate) fn empty(registers_size: u16, editable: bool) -> Self {
        ControlFlowGraph {
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: BlockId::new(0),
            exit: None,
            registers_size,
            editable,
            source: None,
        }
    }

    /// Returns `true` if this graph allows structural mutation.
    #[must_use]
    #[inline]
    pub const fn editable(&self) -> bool {
        self.editable
    }

    /// Returns the entry block.
    #[must_use]
    #[inline]
    pub const fn entry_block(&self) -> BlockId {
        self.entry
    }

    /// Returns the exit block, if exit analysis has installed one.
    #[must_use]
    #[inline]
    pub const fn exit_block(&self) -> Option<BlockId> {
        self.exit
    }

    pub(crate) fn set_entry_block(&mut self, b: BlockId) {
        self.entry = b;
    }

    /// Returns the register frame size of the underlying method.
    #[must_use]
    #[inline]
    pub const fn registers_size(&self) -> u16 {
        self.registers_size
    }

    /// Overrides the register frame size.
    pub fn set_registers_size(&mut self, size: u16) {
        self.registers_size = size;
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().flatten().count()
    }

    /// Returns the number of live edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    /// Returns the block with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the block was removed; holding on to a stale id is a
    /// programming error.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        self.blocks[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale block id {id}"))
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale block id {id}"))
    }

    /// Returns `true` if the block with the given id is still present.
    #[must_use]
    pub fn contains_block(&self, id: BlockId) -> bool {
        self.blocks.get(id.index()).is_some_and(Option::is_some)
    }

    /// Returns the edge with the given id.
    ///
    /// # Panics
    ///
    /// Panics if the edge was removed.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> &Edge {
        self.edges[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("stale edge id {id}"))
    }

    fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        self.edges[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("stale edge id {id}"))
    }

    /// Iterates over the live blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().flatten()
    }

    /// Iterates over the live block ids in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().flatten().map(Block::id)
    }

    /// Iterates over the live edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|edge| (EdgeId::new(index), edge)))
    }

    /// Returns the items of a block, regardless of mode.
    ///
    /// In editable mode this is the block's owned item list; in read-only
    /// mode it is the block's range of the shared source list.
    #[must_use]
    pub fn block_items(&self, id: BlockId) -> &[Item] {
        let block = self.block(id);
        match self.source {
            Some(source) => &source.as_slice()[block.span.0..block.span.1],
            None => block.entries.as_slice(),
        }
    }

    /// Creates a fresh empty block and returns its id.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(Block::new(id)));
        id
    }

    // -- edge insertion ----------------------------------------------------

    /// Adds an edge of the given kind; constant work.
    pub fn add_edge(&mut self, src: BlockId, target: BlockId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId::new(self.edges.len());
        self.edges.push(Some(Edge::new(src, target, kind)));
        self.block_mut(src).succs.push(id);
        self.block_mut(target).preds.push(id);
        id
    }

    /// Adds a goto edge.
    pub fn add_goto_edge(&mut self, src: BlockId, target: BlockId) -> EdgeId {
        self.add_edge(src, target, EdgeKind::Goto)
    }

    /// Adds a branch edge, keyed when the source ends in a switch.
    pub fn add_branch_edge(
        &mut self,
        src: BlockId,
        target: BlockId,
        case_key: Option<i32>,
    ) -> EdgeId {
        self.add_edge(src, target, EdgeKind::Branch { case_key })
    }

    /// Adds a throw edge carrying the handler's type and chain position.
    pub fn add_throw_edge(
        &mut self,
        src: BlockId,
        target: BlockId,
        catch_type: Option<TypeToken>,
        index: u32,
    ) -> EdgeId {
        self.add_edge(src, target, EdgeKind::Throw { catch_type, index })
    }

    /// Adds a ghost edge to a synthetic exit block.
    pub fn add_ghost_edge(&mut self, src: BlockId, target: BlockId) -> EdgeId {
        self.add_edge(src, target, EdgeKind::Ghost)
    }

    // -- edge removal ------------------------------------------------------

    /// Unlinks the edge from both adjacency lists without freeing it.
    fn unlink_edge(&mut self, e: EdgeId) {
        let (src, target) = {
            let edge = self.edge(e);
            (edge.src, edge.target)
        };
        self.block_mut(src).succs.retain(|&x| x != e);
        self.block_mut(target).preds.retain(|&x| x != e);
    }

    /// Re-links the edge into its current endpoints' adjacency lists.
    fn relink_edge(&mut self, e: EdgeId) {
        let (src, target) = {
            let edge = self.edge(e);
            (edge.src, edge.target)
        };
        self.block_mut(src).succs.push(e);
        self.block_mut(target).preds.push(e);
    }

    fn free_edge(&mut self, e: EdgeId) {
        self.edges[e.index()] = None;
    }

    /// Removes one edge: unlink, run the terminator fixup, free.
    pub fn delete_edge(&mut self, e: EdgeId) {
        self.unlink_edge(e);
        self.cleanup_deleted_edges(&[e]);
        self.free_edge(e);
    }

    /// Removes every successor edge of `block` matching the predicate.
    pub fn delete_succ_edges_if<F: Fn(&Edge) -> bool>(&mut self, block: BlockId, predicate: F) {
        self.remove_matching_succ_edges(block, predicate, true);
    }

    /// Removes every predecessor edge of `block` matching the predicate.
    pub fn delete_pred_edges_if<F: Fn(&Edge) -> bool>(&mut self, block: BlockId, predicate: F) {
        self.remove_matching_pred_edges(block, predicate, true);
    }

    /// Removes every successor edge of `block`.
    pub fn delete_succ_edges(&mut self, block: BlockId) {
        self.remove_matching_succ_edges(block, |_| true, true);
    }

    /// Removes every predecessor edge of `block`.
    pub fn delete_pred_edges(&mut self, block: BlockId) {
        self.remove_matching_pred_edges(block, |_| true, true);
    }

    /// Bulk successor-edge removal. Unlinks and frees the matching edges,
    /// optionally running the terminator fixup first. Returns the removed
    /// (now dead) edge ids.
    pub(crate) fn remove_matching_succ_edges<F: Fn(&Edge) -> bool>(
        &mut self,
        block: BlockId,
        predicate: F,
        cleanup: bool,
    ) -> Vec<EdgeId> {
        let to_remove: Vec<EdgeId> = self
            .block(block)
            .succs
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect();
        for &e in &to_remove {
            self.unlink_edge(e);
        }
        if cleanup {
            self.cleanup_deleted_edges(&to_remove);
        }
        for &e in &to_remove {
            self.free_edge(e);
        }
        to_remove
    }

    /// Bulk predecessor-edge removal, symmetric to
    /// [`remove_matching_succ_edges`](Self::remove_matching_succ_edges).
    pub(crate) fn remove_matching_pred_edges<F: Fn(&Edge) -> bool>(
        &mut self,
        block: BlockId,
        predicate: F,
        cleanup: bool,
    ) -> Vec<EdgeId> {
        let to_remove: Vec<EdgeId> = self
            .block(block)
            .preds
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect();
        for &e in &to_remove {
            self.unlink_edge(e);
        }
        if cleanup {
            self.cleanup_deleted_edges(&to_remove);
        }
        for &e in &to_remove {
            self.free_edge(e);
        }
        to_remove
    }

    /// Removes every edge from `src` to `target`.
    pub(crate) fn remove_edges_between(&mut self, src: BlockId, target: BlockId, cleanup: bool) {
        self.remove_matching_succ_edges(src, |e| e.target == target, cleanup);
    }

    /// After edges have been removed: if a source block's terminator is a
    /// conditional branch or switch and only one successor edge remains,
    /// erase the terminator opcode and retype that edge as a goto.
    fn cleanup_deleted_edges(&mut self, removed: &[EdgeId]) {
        for &e in removed {
            let src = self.edge(e).src;
            let last_is_branching = self.block(src).last_insn().is_some_and(|insn| {
                insn.opcode().is_conditional_branch() || insn.opcode().is_switch()
            });
            if !last_is_branching || self.block(src).succs.len() != 1 {
                continue;
            }
            let remaining = self.block(src).succs[0];
            let block = self.block_mut(src);
            let last_index = block
                .entries
                .as_slice()
                .iter()
                .rposition(Item::is_insn)
                .expect("terminator vanished during cleanup");
            block.entries.remove(last_index);
            self.edge_mut(remaining).kind = EdgeKind::Goto;
        }
    }

    // -- edge movement -----------------------------------------------------

    /// Points an existing edge at a new target, preserving its identity.
    pub fn set_edge_target(&mut self, e: EdgeId, new_target: BlockId) {
        self.move_edge(e, None, Some(new_target));
    }

    /// Re-sources an existing edge, preserving its identity.
    pub fn set_edge_source(&mut self, e: EdgeId, new_source: BlockId) {
        self.move_edge(e, Some(new_source), None);
    }

    /// Moves an edge out of the adjacency lists of its old endpoints and
    /// into those of the new ones.
    fn move_edge(&mut self, e: EdgeId, new_source: Option<BlockId>, new_target: Option<BlockId>) {
        self.unlink_edge(e);
        {
            let edge = self.edge_mut(e);
            if let Some(src) = new_source {
                edge.src = src;
            }
            if let Some(target) = new_target {
                edge.target = target;
            }
        }
        self.relink_edge(e);
    }

    // -- block removal and merging ----------------------------------------

    /// Merges `succ` into `pred`.
    ///
    /// # Panics
    ///
    /// Panics unless `pred` has exactly one successor edge, of kind goto, to
    /// `succ`, and `succ` has exactly one predecessor (that same edge).
    pub fn merge_blocks(&mut self, pred: BlockId, succ: BlockId) {
        assert!(self.editable, "cannot merge blocks of a read-only CFG");
        {
            let forward = self.block(pred).succs();
            assert_eq!(forward.len(), 1, "merge: {pred} must have one successor");
            let forward_edge = self.edge(forward[0]);
            assert_eq!(forward_edge.target, succ, "merge: {pred} must lead to {succ}");
            assert!(forward_edge.kind.is_goto(), "merge: {pred} -> {succ} must be a goto");
            let reverse = self.block(succ).preds();
            assert_eq!(reverse.len(), 1, "merge: {succ} must have one predecessor");
            assert_eq!(reverse[0], forward[0], "merge: adjacency lists disagree");
        }

        self.remove_edges_between(pred, succ, false);

        let mut moved = std::mem::take(&mut self.block_mut(succ).entries);
        self.block_mut(pred).entries.append(&mut moved);

        let outgoing: Vec<EdgeId> = self.block(succ).succs.clone();
        for e in outgoing {
            self.set_edge_source(e, pred);
        }

        if self.exit == Some(succ) {
            self.exit = None;
        }
        self.blocks[succ.index()] = None;
    }

    /// Deletes `old` and reroutes its predecessors to `new`.
    pub fn replace_block(&mut self, old: BlockId, new: BlockId) {
        let to_redirect: Vec<EdgeId> = self.block(old).preds.clone();
        for e in to_redirect {
            self.set_edge_target(e, new);
        }
        self.remove_block(old);
    }

    /// Removes a block and all incident edges.
    ///
    /// # Panics
    ///
    /// If `block` is the entry, it must have exactly one successor, which
    /// becomes the new entry.
    pub fn remove_block(&mut self, block: BlockId) {
        if block == self.entry {
            let succs = self.block(block).succs();
            assert_eq!(succs.len(), 1, "removing entry {block} with multiple successors");
            self.entry = self.edge(succs[0]).target;
        }
        self.remove_matching_pred_edges(block, |_| true, true);
        self.remove_matching_succ_edges(block, |_| true, true);
        if self.exit == Some(block) {
            self.exit = None;
        }
        self.blocks[block.index()] = None;
    }

    // -- opcode removal ----------------------------------------------------

    /// Removes one opcode from its block, cascading on edges and paired
    /// move-results as the opcode's shape requires.
    ///
    /// Removing a conditional branch or switch drops its branch edges; a
    /// result-producing instruction takes its move-result(-pseudo) with it,
    /// even across a block boundary; removing the last may-throw opcode of a
    /// block drops its throw edges.
    ///
    /// # Panics
    ///
    /// Panics on a read-only graph, when `insn` is not in `block`, or when
    /// asked to remove a goto (gotos live only as edges in editable mode).
    pub fn remove_opcode(&mut self, block: BlockId, insn: InsnId) {
        assert!(self.editable, "cannot remove opcodes from a read-only CFG");

        let position = self
            .block(block)
            .entries
            .iter()
            .position(|item| item.insn().is_some_and(|i| i.id() == insn))
            .unwrap_or_else(|| panic!("{insn:?} is not in block {block}"));
        let op = self.block(block).entries.get(position).unwrap().insn().unwrap().opcode();
        assert!(!op.is_goto(), "there are no GOTO instructions in the CFG");

        let last = self
            .block(block)
            .last_insn()
            .map(|i| i.id())
            .expect("cannot remove from an empty block");
        let is_last = last == insn;

        if op.is_conditional_branch() || op.is_switch() {
            // The instruction is deleted below; leave the fixup out so it
            // doesn't resurrect a goto from the remaining edge shape.
            self.remove_matching_succ_edges(block, |e| e.kind.is_branch(), false);
        } else if op.has_any_move_result() {
            self.remove_paired_move_result(block, position, is_last);
        }

        if is_last && (op.may_throw() || op.is_throw()) {
            self.remove_matching_succ_edges(block, |e| e.kind.is_throw(), true);
        }

        self.block_mut(block).entries.remove(position);
    }

    /// Deletes the move-result(-pseudo) paired with the instruction at
    /// `position` of `block`.
    fn remove_paired_move_result(&mut self, block: BlockId, position: usize, is_last: bool) {
        if is_last {
            // The pair lives in the goto successor block, which must exist
            // solely for it.
            let goto = self
                .get_succ_edge_of_type(block, EdgeType::Goto)
                .unwrap_or_else(|| panic!("{block} ends a move-result pair without a goto edge"));
            let target = self.edge(goto).target;
            let first = self
                .block(target)
                .first_insn()
                .unwrap_or_else(|| panic!("move-result block {target} is empty"));
            assert!(
                first.opcode().is_any_move_result(),
                "{block} -> {target}: expected a move-result at the head"
            );
            assert_eq!(
                self.block(target).preds().len(),
                1,
                "multiple edges to a move-result in {target}"
            );
            let first_index = self
                .block(target)
                .entries
                .iter()
                .position(Item::is_insn)
                .unwrap();
            self.block_mut(target).entries.remove(first_index);
        } else {
            let pair_index = self
                .block(block)
                .entries
                .iter()
                .enumerate()
                .skip(position + 1)
                .find(|(_, item)| item.is_insn())
                .map(|(index, _)| index)
                .unwrap_or_else(|| panic!("no move-result follows in {block}"));
            let pair = self.block(block).entries.get(pair_index).unwrap().insn().unwrap();
            assert!(
                pair.opcode().is_any_move_result(),
                "expected a move-result after the primary in {block}"
            );
            self.block_mut(block).entries.remove(pair_index);
        }
    }

    // -- simplification ----------------------------------------------------

    /// Removes unreachable blocks, bypasses empty blocks and recomputes the
    /// register frame size. Idempotent.
    pub fn simplify(&mut self) {
        assert!(self.editable, "cannot simplify a read-only CFG");
        self.remove_unreachable_blocks();
        self.remove_empty_blocks();
        self.recompute_registers_size();
    }

    /// Removes successor edges of every block not reachable from the entry.
    pub(crate) fn remove_unreachable_succ_edges(&mut self) {
        let visited = self.reachable_from_entry();
        let unvisited: Vec<BlockId> = self
            .block_ids()
            .filter(|b| !visited.contains(b))
            .collect();
        for b in unvisited {
            log::trace!("build: removing succ edges from unreachable block {b}");
            self.remove_matching_succ_edges(b, |_| true, false);
        }
    }

    /// Removes blocks with no predecessors (other than the entry) and
    /// returns the number of opcodes removed with them.
    ///
    /// Source-position items whose parent lived in a removed block have
    /// their parent link cleared so nothing dangles.
    pub fn remove_unreachable_blocks(&mut self) -> u32 {
        assert!(self.editable, "cannot remove blocks of a read-only CFG");
        let mut removed_opcodes = 0;
        self.remove_unreachable_succ_edges();

        let visited = self.reachable_from_entry();
        let unvisited: Vec<BlockId> = self
            .block_ids()
            .filter(|b| !visited.contains(b))
            .collect();

        let mut deleted_positions: FxHashSet<PosId> = FxHashSet::default();
        for b in unvisited {
            for item in self.block_items(b) {
                if let Item::Position(pos) = item {
                    deleted_positions.insert(pos.id);
                }
            }
            removed_opcodes += num_opcodes_in(self.block_items(b));
            assert!(
                self.block(b).preds.is_empty(),
                "unreachable block {b} still has predecessors"
            );
            self.blocks[b.index()] = None;
        }

        if !deleted_positions.is_empty() {
            for slot in self.blocks.iter_mut().flatten() {
                for item in slot.entries.iter_mut() {
                    if let Item::Position(pos) = item {
                        if pos.parent.is_some_and(|p| deleted_positions.contains(&p)) {
                            pos.parent = None;
                        }
                    }
                }
            }
        }
        removed_opcodes
    }

    /// Bypasses blocks that carry no items: their predecessors are
    /// retargeted at their sole successor. Empty self-loops stay (an
    /// infinite-loop placeholder); the exit block stays.
    fn remove_empty_blocks(&mut self) {
        let ids: Vec<BlockId> = self.block_ids().collect();
        for b in ids {
            if !self.contains_block(b) {
                continue;
            }
            if !self.block(b).is_empty() || Some(b) == self.exit {
                continue;
            }

            let succs = self.block(b).succs();
            if !succs.is_empty() {
                assert_eq!(succs.len(), 1, "too many successors for empty block {b}");
                let succ = self.edge(succs[0]).target;
                if succ == b {
                    continue;
                }

                self.remove_edges_between(b, succ, false);
                let to_redirect: Vec<EdgeId> = self.block(b).preds.clone();
                for e in to_redirect {
                    self.set_edge_target(e, succ);
                }
                if b == self.entry {
                    self.entry = succ;
                }
            } else if !self.block(b).preds.is_empty() {
                // Jumped-to but goes nowhere; leaving it is safer than
                // dangling its predecessors.
                continue;
            }
            self.blocks[b.index()] = None;
        }
    }

    /// Recomputes the register frame size from the registers the remaining
    /// instructions actually reference.
    pub fn recompute_registers_size(&mut self) {
        let mut num_regs: u16 = 0;
        let ids: Vec<BlockId> = self.block_ids().collect();
        for b in ids {
            for insn in self.block_items(b).iter().filter_map(Item::insn) {
                if let Some(dest) = insn.dest() {
                    let highest = dest + u16::from(insn.dest_is_wide());
                    num_regs = num_regs.max(highest + 1);
                }
                for (i, &src) in insn.srcs().iter().enumerate() {
                    let highest = src + u16::from(insn.src_is_wide(i));
                    num_regs = num_regs.max(highest + 1);
                }
            }
        }
        self.registers_size = num_regs;
    }

    fn check_registers_size(&self) {
        let mut copy_regs: u16 = 0;
        for b in self.block_ids().collect::<Vec<_>>() {
            for insn in self.block_items(b).iter().filter_map(Item::insn) {
                if let Some(dest) = insn.dest() {
                    copy_regs = copy_regs.max(dest + u16::from(insn.dest_is_wide()) + 1);
                }
                for (i, &src) in insn.srcs().iter().enumerate() {
                    copy_regs = copy_regs.max(src + u16::from(insn.src_is_wide(i)) + 1);
                }
            }
        }
        assert_eq!(
            self.registers_size, copy_regs,
            "used regs {copy_regs} != registers size {}",
            self.registers_size
        );
    }

    /// Returns the set of blocks reachable from the entry along successor
    /// edges.
    pub(crate) fn reachable_from_entry(&self) -> FxHashSet<BlockId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            if !visited.insert(b) {
                continue;
            }
            for &e in self.block(b).succs() {
                stack.push(self.edge(e).target);
            }
        }
        visited
    }

    // -- queries -----------------------------------------------------------

    /// Returns the first predecessor edge matching the predicate.
    pub fn get_pred_edge_if<F: Fn(&Edge) -> bool>(
        &self,
        block: BlockId,
        predicate: F,
    ) -> Option<EdgeId> {
        self.block(block)
            .preds
            .iter()
            .copied()
            .find(|&e| predicate(self.edge(e)))
    }

    /// Returns the first successor edge matching the predicate.
    pub fn get_succ_edge_if<F: Fn(&Edge) -> bool>(
        &self,
        block: BlockId,
        predicate: F,
    ) -> Option<EdgeId> {
        self.block(block)
            .succs
            .iter()
            .copied()
            .find(|&e| predicate(self.edge(e)))
    }

    /// Returns every predecessor edge matching the predicate.
    pub fn get_pred_edges_if<F: Fn(&Edge) -> bool>(
        &self,
        block: BlockId,
        predicate: F,
    ) -> Vec<EdgeId> {
        self.block(block)
            .preds
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect()
    }

    /// Returns every successor edge matching the predicate.
    pub fn get_succ_edges_if<F: Fn(&Edge) -> bool>(
        &self,
        block: BlockId,
        predicate: F,
    ) -> Vec<EdgeId> {
        self.block(block)
            .succs
            .iter()
            .copied()
            .filter(|&e| predicate(self.edge(e)))
            .collect()
    }

    /// Returns the first predecessor edge of the given type.
    #[must_use]
    pub fn get_pred_edge_of_type(&self, block: BlockId, ty: EdgeType) -> Option<EdgeId> {
        self.get_pred_edge_if(block, |e| e.edge_type() == ty)
    }

    /// Returns the first successor edge of the given type.
    #[must_use]
    pub fn get_succ_edge_of_type(&self, block: BlockId, ty: EdgeType) -> Option<EdgeId> {
        self.get_succ_edge_if(block, |e| e.edge_type() == ty)
    }

    /// Returns every predecessor edge of the given type.
    #[must_use]
    pub fn get_pred_edges_of_type(&self, block: BlockId, ty: EdgeType) -> Vec<EdgeId> {
        self.get_pred_edges_if(block, |e| e.edge_type() == ty)
    }

    /// Returns every successor edge of the given type.
    #[must_use]
    pub fn get_succ_edges_of_type(&self, block: BlockId, ty: EdgeType) -> Vec<EdgeId> {
        self.get_succ_edges_if(block, |e| e.edge_type() == ty)
    }

    /// Returns `true` if `pred` is a predecessor of `block`, optionally
    /// restricted to one edge type.
    #[must_use]
    pub fn has_pred(&self, block: BlockId, pred: BlockId, ty: Option<EdgeType>) -> bool {
        self.get_pred_edge_if(block, |e| {
            e.src == pred && ty.is_none_or(|t| e.edge_type() == t)
        })
        .is_some()
    }

    /// Returns `true` if `succ` is a successor of `block`, optionally
    /// restricted to one edge type.
    #[must_use]
    pub fn has_succ(&self, block: BlockId, succ: BlockId, ty: Option<EdgeType>) -> bool {
        self.get_succ_edge_if(block, |e| {
            e.target == succ && ty.is_none_or(|t| e.edge_type() == t)
        })
        .is_some()
    }

    /// Returns `true` if the block is an exception handler target.
    #[must_use]
    pub fn is_catch(&self, block: BlockId) -> bool {
        self.get_pred_edge_of_type(block, EdgeType::Throw).is_some()
    }

    /// Returns `true` if two blocks sit in the same try region, i.e. their
    /// throw-edge projections (target, catch type), sorted by handler
    /// index, are identical.
    #[must_use]
    pub fn blocks_are_in_same_try(&self, b1: BlockId, b2: BlockId) -> bool {
        let projection = |b: BlockId| {
            let mut throws: Vec<&Edge> = self
                .get_succ_edges_of_type(b, EdgeType::Throw)
                .into_iter()
                .map(|e| self.edge(e))
                .collect();
            throws.sort_by_key(|e| e.kind.throw_index());
            throws
                .into_iter()
                .map(|e| (e.target, e.kind.catch_type()))
                .collect::<Vec<_>>()
        };
        projection(b1) == projection(b2)
    }

    /// Returns the terminator category of a block, derived from its edges
    /// and last opcode.
    ///
    /// # Panics
    ///
    /// Panics on a read-only graph (gotos still live as opcodes there, so
    /// the edge shapes this reads are not authoritative).
    #[must_use]
    pub fn branchingness(&self, block: BlockId) -> Branchingness {
        assert!(self.editable, "branchingness requires an editable CFG");
        let b = self.block(block);
        let last = b.last_insn();

        let only_ghost = b.succs.len() == 1
            && self.get_succ_edge_of_type(block, EdgeType::Ghost).is_some();
        if b.succs.is_empty() || only_ghost {
            if let Some(insn) = last {
                if insn.opcode().is_return() {
                    return Branchingness::Return;
                }
                if insn.opcode().is_throw() {
                    return Branchingness::Throw;
                }
            }
            return Branchingness::None;
        }

        if self.get_succ_edge_of_type(block, EdgeType::Throw).is_some() {
            return Branchingness::Throw;
        }

        if self.get_succ_edge_of_type(block, EdgeType::Branch).is_some() {
            let insn = last.unwrap_or_else(|| panic!("{block} has branch edges but no opcodes"));
            let br = insn.opcode().branchingness();
            assert!(
                br == Branchingness::If || br == Branchingness::Switch,
                "{block} has branch edges but a {br:?} terminator"
            );
            return br;
        }

        if self.get_succ_edge_of_type(block, EdgeType::Goto).is_some() {
            return Branchingness::Goto;
        }
        Branchingness::None
    }

    /// Locates the move-result(-pseudo) paired with `insn`, in the same
    /// block or at the head of the goto successor.
    #[must_use]
    pub fn move_result_of(&self, block: BlockId, insn: InsnId) -> Option<(BlockId, InsnId)> {
        let items = self.block_items(block);
        let position = items
            .iter()
            .position(|item| item.insn().is_some_and(|i| i.id() == insn))?;

        if let Some(next) = items[position + 1..].iter().find_map(Item::insn) {
            if next.opcode().is_any_move_result() {
                return Some((block, next.id()));
            }
            return None;
        }

        let goto = self.get_succ_edge_of_type(block, EdgeType::Goto)?;
        let target = self.edge(goto).target;
        let target_items = self.block_items(target);
        if starts_with_move_result_in(target_items) {
            return first_insn_in(target_items).map(|i| (target, i.id()));
        }
        None
    }

    /// Returns the ids of the method's parameter-loading instructions, the
    /// leading `load-param` run of the first block with any opcodes.
    #[must_use]
    pub fn get_param_instructions(&self) -> Vec<InsnId> {
        let mut block = self.entry;
        while num_opcodes_in(self.block_items(block)) == 0 {
            let succs = self.block(block).succs();
            assert_eq!(succs.len(), 1, "empty prefix block {block} must have one successor");
            let edge = self.edge(succs[0]);
            assert!(edge.kind.is_goto(), "empty prefix block {block} must exit via goto");
            block = edge.target;
        }
        self.block_items(block)
            .iter()
            .filter_map(Item::insn)
            .take_while(|insn| insn.opcode().is_load_param())
            .map(|insn| insn.id())
            .collect()
    }

    /// Returns the total number of non-internal opcodes in the graph.
    #[must_use]
    pub fn num_opcodes(&self) -> u32 {
        self.block_ids()
            .collect::<Vec<_>>()
            .into_iter()
            .map(|b| num_opcodes_in(self.block_items(b)))
            .sum()
    }

    // -- sanity ------------------------------------------------------------

    /// Validates the graph's invariants, panicking on the first violation.
    ///
    /// Checks that no markers or goto opcodes remain (editable mode), that
    /// every terminator's successor shape is legal, that the dual adjacency
    /// lists agree, that the exit block has no successors, that the register
    /// frame size is current and that no source position dangles.
    pub fn sanity_check(&self) {
        if self.editable {
            for block in self.blocks() {
                for item in block.entries.iter() {
                    assert!(
                        !item.is_target(),
                        "failed to remove all targets. block {}",
                        block.id
                    );
                    assert!(
                        !item.is_catch() && !item.is_try_marker(),
                        "failed to remove all try/catch markers. block {}",
                        block.id
                    );
                    if let Some(insn) = item.insn() {
                        assert!(
                            !insn.opcode().is_goto(),
                            "failed to remove all gotos. block {}",
                            block.id
                        );
                    }
                }

                if let Some(insn) = block.last_insn() {
                    let op = insn.opcode();
                    let num_preds = block.preds.len();
                    let num_succs = block.succs.len();
                    if op.is_conditional_branch() || op.is_switch() {
                        assert!(num_succs > 1, "block {} needs branch successors", block.id);
                    } else if op.is_return() {
                        let real: Vec<EdgeId> =
                            self.get_succ_edges_if(block.id, |e| !e.kind.is_ghost());
                        assert!(real.is_empty(), "return block {} has successors", block.id);
                    } else if op.is_throw() {
                        // A throw may end the method or reach a handler;
                        // nothing useful to assert.
                    } else if num_preds > 0 {
                        assert!(
                            num_succs > 0,
                            "control flow falls off the end of block {}",
                            block.id
                        );
                    }
                }
            }
        }

        if let Some(exit) = self.exit {
            assert!(
                self.block(exit).succs.is_empty(),
                "exit block {exit} has outgoing edges"
            );
        }

        for block in self.blocks() {
            for &e in &block.succs {
                let edge = self.edge(e);
                assert_eq!(edge.src, block.id, "edge {e} disowned by source {}", block.id);
                assert!(
                    self.block(edge.target).preds.contains(&e),
                    "edge {} -> {} missing from target's preds",
                    block.id,
                    edge.target
                );
            }
            for &e in &block.preds {
                let edge = self.edge(e);
                assert_eq!(edge.target, block.id, "edge {e} disowned by target {}", block.id);
                assert!(
                    self.block(edge.src).succs.contains(&e),
                    "edge {} -> {} missing from source's succs",
                    edge.src,
                    block.id
                );
            }
        }

        if self.editable {
            self.check_registers_size();
        }
        self.no_dangling_positions();
    }

    fn no_dangling_positions(&self) {
        let mut positions: FxHashSet<PosId> = FxHashSet::default();
        let ids: Vec<BlockId> = self.block_ids().collect();
        for &b in &ids {
            for item in self.block_items(b) {
                if let Item::Position(pos) = item {
                    positions.insert(pos.id);
                }
            }
        }
        for &b in &ids {
            for item in self.block_items(b) {
                if let Item::Position(pos) = item {
                    if let Some(parent) = pos.parent {
                        assert!(
                            positions.contains(&parent),
                            "dangling position parent in block {b}"
                        );
                    }
                }
            }
        }
    }

    // -- copy and dump -----------------------------------------------------

    /// Produces an isomorphic, independently editable copy of this graph.
    ///
    /// Blocks clone their items (ids included), edges are cloned in place;
    /// since adjacency is expressed through arena ids rather than pointers,
    /// no remapping is needed and the copy shares nothing with the original.
    #[must_use]
    pub fn deep_copy(&self) -> ControlFlowGraph<'static> {
        assert!(self.editable, "cannot deep-copy a read-only CFG");
        ControlFlowGraph {
            blocks: self.blocks.clone(),
            edges: self.edges.clone(),
            entry: self.entry,
            exit: self.exit,
            registers_size: self.registers_size,
            editable: true,
            source: None,
        }
    }

    /// Renders the graph in DOT format for Graphviz tooling.
    ///
    /// Nodes are block ids (entry and exit highlighted); edge labels carry
    /// the kind and the switch case key, if any.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();

        dot.push_str("digraph CFG {\n");
        if let Some(name) = title {
            let _ = writeln!(dot, "    label=\"{name}\";");
            dot.push_str("    labelloc=t;\n");
        }
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for b in self.block_ids().collect::<Vec<_>>() {
            let mut label = format!("{b}");
            if b == self.entry {
                label.push_str(" (entry)");
            }
            if Some(b) == self.exit {
                label.push_str(" (exit)");
            }
            label.push_str("\\l");
            for insn in self.block_items(b).iter().filter_map(Item::insn) {
                let _ = write!(label, "{:?}", insn.opcode());
                label.push_str("\\l");
            }

            let style = if b == self.entry {
                ", style=filled, fillcolor=lightgreen"
            } else if Some(b) == self.exit {
                ", style=filled, fillcolor=lightcoral"
            } else {
                ""
            };
            let _ = writeln!(dot, "    {b} [label=\"{label}\"{style}];");
        }

        dot.push('\n');

        for (_, edge) in self.edges() {
            let color = match edge.kind {
                EdgeKind::Goto => "black",
                EdgeKind::Branch { .. } => "blue",
                EdgeKind::Throw { .. } => "red",
                EdgeKind::Ghost => "gray",
            };
            let _ = writeln!(
                dot,
                "    {} -> {} [label=\"{}\", color={color}];",
                edge.src, edge.target, edge.kind
            );
        }

        dot.push_str("}\n");
        dot
    }
}

/// Crate-internal helpers shared by the builder and linearizer.
impl ControlFlowGraph<'_> {
    /// Returns `true` if the block ends (in item terms) with an opcode that
    /// throws or may throw.
    pub(crate) fn ends_with_may_throw(&self, block: BlockId) -> bool {
        crate::cfg::block::ends_with_may_throw(self.block_items(block))
    }

    /// Returns `true` if no opcode of the block throws or may throw.
    pub(crate) fn block_cannot_throw(&self, block: BlockId) -> bool {
        cannot_throw(self.block_items(block))
    }

    /// Returns the last opcode of the block regardless of mode.
    pub(crate) fn last_insn_of(&self, block: BlockId) -> Option<&crate::ir::Instruction> {
        last_insn_in(self.block_items(block))
    }
}
