//! CFG construction from a linear instruction list.
//!
//! Construction walks the list once to find block boundaries, distributes
//! the items into blocks (editable mode) or records item ranges (read-only
//! mode), wires the blocks together from the recorded markers, converts try
//! regions into throw edges, and finally strips every marker so that an
//! editable graph encodes all structure as edges.
//!
//! The scratch maps built during the walk (branch to targets, catch marker
//! to block, recorded try ends) are local to construction and dropped
//! afterwards.

use rustc_hash::FxHashMap;

use crate::cfg::{BlockId, ControlFlowGraph};
use crate::ir::{CatchEntry, CatchId, InsnId, Item, ItemList, TryEntry};
use crate::{Error, Result};

/// Scratch state recorded while scanning for block boundaries.
#[derive(Default)]
struct Scratch {
    /// Branch instruction to the blocks headed by its target markers, in
    /// marker order (duplicates for multi-target switches).
    branch_to_targets: FxHashMap<InsnId, Vec<BlockId>>,
    /// Every TRY_END seen, with the block that contains it.
    try_ends: Vec<(TryEntry, BlockId)>,
    /// Catch marker to the block that contains it.
    try_catches: FxHashMap<CatchId, BlockId>,
    /// Catch marker payloads, for walking handler chains.
    catch_entries: FxHashMap<CatchId, CatchEntry>,
}

/// Returns `true` if the item at `index` should be the last of its block.
fn end_of_block(items: &[Item], index: usize, in_try: bool) -> bool {
    let Some(next) = items.get(index + 1) else {
        return true;
    };
    let it = &items[index];

    // End the block before the first target in a contiguous run of targets.
    if next.is_target() && !it.is_target() {
        return true;
    }

    // End the block before the first catch marker in a contiguous run of
    // catch markers.
    if next.is_catch() && !it.is_catch() {
        return true;
    }

    // End the block before a TRY_START and after a TRY_END.
    if matches!(next, Item::TryStart(_)) || matches!(it, Item::TryEnd(_)) {
        return true;
    }

    if in_try && it.insn().is_some_and(|insn| insn.opcode().may_throw()) {
        return true;
    }

    match it.insn() {
        Some(insn) => {
            let op = insn.opcode();
            op.is_branch() || op.is_return() || op.is_throw()
        }
        None => false,
    }
}

impl ControlFlowGraph<'static> {
    /// Builds an editable control-flow graph, draining `ir` into the
    /// graph's blocks.
    ///
    /// All markers are converted to edges and stripped, the graph is
    /// simplified and its invariants validated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for an empty list and
    /// [`Error::GraphError`] when a branch terminator has no recorded
    /// targets.
    ///
    /// # Panics
    ///
    /// Panics on a structurally impossible list, such as a TRY_START that
    /// is not at the head of its block.
    pub fn build(ir: ItemList, registers_size: u16) -> Result<Self> {
        if ir.is_empty() {
            return Err(Error::Empty);
        }
        let mut cfg = ControlFlowGraph::empty(registers_size, true);
        let items = ir.into_items();

        let mut scratch = cfg.find_block_boundaries(&items);
        cfg.fill_blocks(items);
        cfg.connect_blocks(&mut scratch)?;
        cfg.add_catch_edges(&scratch);
        cfg.remove_try_catch_markers();

        log::trace!("before simplify:\n{}", cfg.to_dot(None));
        cfg.simplify();
        log::trace!("after simplify:\n{}", cfg.to_dot(None));

        cfg.sanity_check();
        Ok(cfg)
    }
}

impl<'a> ControlFlowGraph<'a> {
    /// Builds a read-only control-flow graph over a borrowed instruction
    /// list.
    ///
    /// Blocks reference item ranges of `ir`; no markers are stripped and no
    /// structural mutation is allowed afterwards. Unreachable blocks are
    /// kept but lose their successor edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for an empty list and
    /// [`Error::GraphError`] when a branch terminator has no recorded
    /// targets.
    pub fn read_only(ir: &'a ItemList, registers_size: u16) -> Result<Self> {
        if ir.is_empty() {
            return Err(Error::Empty);
        }
        let mut cfg = ControlFlowGraph::empty(registers_size, false);
        cfg.source = Some(ir);

        let mut scratch = cfg.find_block_boundaries(ir.as_slice());
        cfg.connect_blocks(&mut scratch)?;
        cfg.add_catch_edges(&scratch);
        cfg.remove_unreachable_succ_edges();

        cfg.sanity_check();
        Ok(cfg)
    }

    /// Scans the list once, creating blocks at boundary points and
    /// recording every marker in the scratch maps.
    fn find_block_boundaries(&mut self, items: &[Item]) -> Scratch {
        let mut scratch = Scratch::default();
        let mut block = self.create_block();
        let mut start = 0usize;
        self.set_entry_block(block);

        let mut in_try = false;
        for (index, item) in items.iter().enumerate() {
            match item {
                Item::TryStart(_) => {
                    // TRY_STARTs are only at the beginning of blocks.
                    assert_eq!(index, start, "TRY_START is not at the head of block {block}");
                    in_try = true;
                }
                Item::TryEnd(entry) => {
                    scratch.try_ends.push((*entry, block));
                    in_try = false;
                }
                Item::Catch(entry) => {
                    scratch.try_catches.insert(entry.id, block);
                    scratch.catch_entries.insert(entry.id, *entry);
                }
                Item::Target(target) => {
                    scratch
                        .branch_to_targets
                        .entry(target.branch)
                        .or_default()
                        .push(block);
                }
                _ => {}
            }

            if !end_of_block(items, index, in_try) {
                continue;
            }

            self.block_mut(block).span = (start, index + 1);
            if index + 1 == items.len() {
                break;
            }
            block = self.create_block();
            start = index + 1;
        }
        log::trace!("build: boundaries found");
        scratch
    }

    /// Moves the items into the blocks according to the recorded spans.
    /// The graph takes ownership; the source vector is consumed.
    fn fill_blocks(&mut self, items: Vec<Item>) {
        let mut iter = items.into_iter();
        let ids: Vec<BlockId> = self.block_ids().collect();
        for b in ids {
            let (start, end) = self.block(b).span;
            let mut entries = ItemList::new();
            for _ in start..end {
                entries.push(iter.next().expect("boundaries out of sync with items"));
            }
            assert!(!entries.is_empty(), "block {b} is empty");
            let block = self.block_mut(b);
            block.entries = entries;
            block.span = (0, 0);
        }
        log::trace!("build: splicing finished");
    }

    /// Links the blocks together with edges. In editable mode this also
    /// strips the target markers and goto opcodes, whose information now
    /// lives entirely in the edges.
    fn connect_blocks(&mut self, scratch: &mut Scratch) -> Result<()> {
        let ids: Vec<BlockId> = self.block_ids().collect();
        for (index, &b) in ids.iter().enumerate() {
            // The decision is driven by the last item, not the last opcode:
            // a trailing marker means the block does not end in a branch.
            let last = self
                .block_items(b)
                .last()
                .and_then(Item::insn)
                .map(|insn| (insn.opcode(), insn.id()));

            let mut fallthrough = true;
            if let Some((op, branch)) = last {
                if op.is_branch() {
                    fallthrough = !op.is_goto();
                    let targets = scratch.branch_to_targets.remove(&branch).unwrap_or_default();
                    if targets.is_empty() {
                        return Err(Error::GraphError(format!(
                            "no targets recorded for the branch ending block {b}"
                        )));
                    }
                    for target in targets {
                        if self.editable {
                            let case_key =
                                self.block_mut(target).remove_first_matching_target(branch);
                            if let Some(key) = case_key {
                                assert!(
                                    op.is_switch(),
                                    "case key on a non-switch branch in block {b}"
                                );
                                self.add_branch_edge(b, target, Some(key));
                                continue;
                            }
                        }
                        if op.is_goto() {
                            self.add_goto_edge(b, target);
                        } else {
                            self.add_branch_edge(b, target, None);
                        }
                    }

                    if self.editable && op.is_goto() {
                        // The edge fully encodes the transfer.
                        let popped = self.block_mut(b).entries.pop();
                        assert!(
                            popped.is_some_and(
                                |item| item.insn().is_some_and(|i| i.opcode().is_goto())
                            ),
                            "block {b} does not end in its goto opcode"
                        );
                    }
                } else if op.is_return() || op.is_throw() {
                    fallthrough = false;
                }
            }

            if fallthrough {
                if let Some(&next) = ids.get(index + 1) {
                    log::trace!("adding fallthrough goto {b} -> {next}");
                    self.add_goto_edge(b, next);
                }
            }
        }
        log::trace!("build: edges added");
        Ok(())
    }

    /// Gives every block inside a try region one throw edge per handler in
    /// the region's catch chain.
    ///
    /// Walks backwards from each recorded TRY_END; a try region consists of
    /// sequentially-numbered blocks because regions are contiguous in the
    /// bytecode and blocks are created in bytecode order.
    fn add_catch_edges(&mut self, scratch: &Scratch) {
        for &(try_end, end_block) in &scratch.try_ends {
            let mut bid = end_block.index();
            loop {
                let b = BlockId::new(bid);
                if self.ends_with_may_throw(b) {
                    let mut index = 0u32;
                    let mut cursor = Some(try_end.catch_start);
                    while let Some(catch_id) = cursor {
                        let entry = scratch
                            .catch_entries
                            .get(&catch_id)
                            .unwrap_or_else(|| panic!("unknown catch marker {catch_id:?}"));
                        let handler = *scratch
                            .try_catches
                            .get(&catch_id)
                            .unwrap_or_else(|| panic!("catch marker {catch_id:?} has no block"));
                        self.add_throw_edge(b, handler, entry.catch_type, index);
                        index += 1;
                        cursor = entry.next;
                    }
                }

                if let Some(Item::TryStart(entry)) = self.block_items(b).first() {
                    assert_eq!(
                        entry.catch_start, try_end.catch_start,
                        "mismatched try region at block {b}"
                    );
                    break;
                }
                assert!(bid > 0, "no beginning of try region found");
                bid -= 1;
            }
        }
        log::trace!("build: catch edges added");
    }

    /// Strips all try and catch markers; regions are now encoded solely as
    /// throw edges, and linearization may reorder the blocks anyway.
    fn remove_try_catch_markers(&mut self) {
        assert!(self.editable);
        for block in self.blocks.iter_mut().flatten() {
            block
                .entries
                .retain(|item| !item.is_try_marker() && !item.is_catch());
        }
    }
}
