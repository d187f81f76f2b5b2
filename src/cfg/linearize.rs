//! Linearization: rebuilding the instruction list from the graph.
//!
//! The inverse of construction. Blocks are placed in an order that keeps
//! move-result pairs adjacent, branch targets and goto opcodes are
//! materialized from the edges (eliding gotos that fall through), and try
//! regions are regenerated by diffing the catch handles of consecutive
//! blocks in the ordering. The block contents are then spliced into one
//! fresh list and the graph is consumed.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cfg::{BlockId, ControlFlowGraph, EdgeId, EdgeKind, EdgeType};
use crate::ir::{
    BranchTarget, CatchEntry, CatchId, Instruction, Item, ItemList, Opcode, TryEntry, TypeToken,
};

/// Bookkeeping for the catch markers created during one linearization.
///
/// All catch markers in the graph at this point were created here (build
/// stripped the originals), so these maps are authoritative.
#[derive(Default)]
struct CatchMaps {
    containing_block: FxHashMap<CatchId, BlockId>,
    /// Catch marker payloads: caught type and next link.
    data: FxHashMap<CatchId, (Option<TypeToken>, Option<CatchId>)>,
}

impl ControlFlowGraph<'static> {
    /// Rebuilds a linear instruction list equivalent to this graph,
    /// consuming it.
    ///
    /// The graph is simplified and validated first; the returned list is
    /// owned by the caller and contains every item the blocks held, plus
    /// the regenerated markers.
    #[must_use]
    pub fn linearize(mut self) -> ItemList {
        assert!(self.editable, "cannot linearize a read-only CFG");
        log::trace!("before linearize:\n{}", self.to_dot(None));
        self.simplify();
        self.sanity_check();

        let ordering = self.order();
        self.insert_branches_and_targets(&ordering);
        self.insert_try_catch_markers(&ordering);

        let mut result = ItemList::new();
        for b in ordering {
            let mut entries = std::mem::take(&mut self.block_mut(b).entries);
            result.append(&mut entries);
        }
        result
    }

    /// Picks the emission order: id order, except that a goto chain whose
    /// target starts with a move-result(-pseudo) is appended immediately,
    /// because nothing may come between an instruction and its
    /// move-result.
    fn order(&self) -> Vec<BlockId> {
        let mut ordering = Vec::new();
        let mut finished: FxHashSet<BlockId> = FxHashSet::default();

        for b in self.block_ids().collect::<Vec<_>>() {
            if finished.contains(&b) {
                continue;
            }
            assert!(
                !self.block(b).starts_with_move_result(),
                "{b} starts with a move-result but was not claimed by its predecessor"
            );
            ordering.push(b);
            finished.insert(b);

            // A chain of blocks may all start with move-results.
            let mut goto_edge = self.get_succ_edge_of_type(b, EdgeType::Goto);
            while let Some(e) = goto_edge {
                let target = self.edge(e).target();
                if self.block(target).starts_with_move_result() && !finished.contains(&target) {
                    ordering.push(target);
                    finished.insert(target);
                    goto_edge = self.get_succ_edge_of_type(target, EdgeType::Goto);
                } else {
                    goto_edge = None;
                }
            }
        }
        assert_eq!(ordering.len(), self.block_count());
        ordering
    }

    /// Gives every branch edge a target marker at the head of its target
    /// block, and materializes a goto opcode (plus target marker) for every
    /// goto edge that does not fall through to the next block in the
    /// ordering.
    fn insert_branches_and_targets(&mut self, ordering: &[BlockId]) {
        for (index, &b) in ordering.iter().enumerate() {
            let succs: Vec<EdgeId> = self.block(b).succs().to_vec();
            for e in succs {
                let (target, kind) = {
                    let edge = self.edge(e);
                    (edge.target(), *edge.kind())
                };
                match kind {
                    EdgeKind::Branch { case_key } => {
                        let branch = self
                            .block(b)
                            .get_conditional_branch()
                            .unwrap_or_else(|| {
                                panic!("{b} has a branch edge but no conditional terminator")
                            })
                            .id();
                        self.block_mut(target)
                            .entries
                            .push_front(Item::Target(BranchTarget { branch, case_key }));
                    }
                    EdgeKind::Goto => {
                        if ordering.get(index + 1) == Some(&target) {
                            // Falls through; no goto needed.
                            continue;
                        }
                        let goto = Instruction::new(Opcode::Goto);
                        let branch = goto.id();
                        self.block_mut(b).entries.push(Item::Insn(goto));
                        self.block_mut(target)
                            .entries
                            .push_front(Item::Target(BranchTarget {
                                branch,
                                case_key: None,
                            }));
                    }
                    EdgeKind::Throw { .. } | EdgeKind::Ghost => {}
                }
            }
        }
    }

    /// Regenerates TRY_START/TRY_END/catch markers.
    ///
    /// Each block's catch handle is derived from its throw edges. A block
    /// with no throw edges that cannot throw and is not itself a handler
    /// extends the previous block's region; whenever consecutive handles
    /// differ, the outgoing region is closed and the incoming one opened.
    fn insert_try_catch_markers(&mut self, ordering: &[BlockId]) {
        let mut maps = CatchMaps::default();
        let mut active_catch: Option<CatchId> = None;
        let mut prev: Option<BlockId> = None;

        for &b in ordering {
            let new_catch = self.create_catch(b, &mut maps);

            if new_catch.is_none() && self.block_cannot_throw(b) && !self.is_catch(b) {
                // Non-throwing blocks extend the enclosing try region,
                // keeping the region count down. A region's own catch
                // blocks must stay outside of it though.
                prev = Some(b);
                continue;
            }

            if active_catch != new_catch {
                // Final item order is TRY_END then TRY_START; inserting the
                // start first leaves it behind the end when both land at
                // the same point.
                if let Some(start) = new_catch {
                    self.insert_try_marker(prev, b, true, start);
                }
                if let Some(end) = active_catch {
                    self.insert_try_marker(prev, b, false, end);
                }
                active_catch = new_catch;
            }
            prev = Some(b);
        }

        if let Some(end) = active_catch {
            let last = *ordering.last().expect("ordering cannot be empty");
            self.block_mut(last)
                .entries
                .push(Item::TryEnd(TryEntry { catch_start: end }));
        }
    }

    /// Places one try marker between `prev` and `block`.
    ///
    /// A leading move-result-pseudo may not be separated from its primary
    /// instruction, so markers go after it. A TRY_START in the entry block
    /// goes after the parameter-loading instructions; elsewhere it heads the
    /// block. A TRY_END tails the previous block.
    fn insert_try_marker(
        &mut self,
        prev: Option<BlockId>,
        block: BlockId,
        is_start: bool,
        catch_start: CatchId,
    ) {
        let entry = TryEntry { catch_start };
        let marker = if is_start {
            Item::TryStart(entry)
        } else {
            Item::TryEnd(entry)
        };

        let first_insn_index = self.block(block).entries.iter().position(Item::is_insn);
        if let Some(index) = first_insn_index {
            let first = self.block(block).entries.get(index).unwrap().insn().unwrap();
            if first.opcode().is_move_result_pseudo() {
                self.block_mut(block).entries.insert(index + 1, marker);
                return;
            }
        }

        if is_start {
            if prev.is_none() && block == self.entry {
                let params = self
                    .block(block)
                    .entries
                    .iter()
                    .take_while(|item| {
                        item.insn().is_some_and(|i| i.opcode().is_load_param())
                    })
                    .count();
                self.block_mut(block).entries.insert(params, marker);
            } else {
                self.block_mut(block).entries.push_front(marker);
            }
        } else {
            let prev = prev.expect("TRY_END cannot precede the first block");
            self.block_mut(prev).entries.push(marker);
        }
    }

    /// Computes or reuses the catch handle for a block's throw edges.
    ///
    /// Returns `None` when the block has no throw edges. Otherwise the
    /// edges, sorted by handler index, either match an existing chain at
    /// the head of the first handler block (which is reused) or a new
    /// chain of catch markers is created across the handler blocks.
    fn create_catch(&mut self, block: BlockId, maps: &mut CatchMaps) -> Option<CatchId> {
        let mut throws = self.get_succ_edges_of_type(block, EdgeType::Throw);
        if throws.is_empty() {
            return None;
        }
        throws.sort_by_key(|&e| self.edge(e).kind().throw_index());
        self.add_catch_chain(&throws, 0, maps)
    }

    fn add_catch_chain(
        &mut self,
        throws: &[EdgeId],
        index: usize,
        maps: &mut CatchMaps,
    ) -> Option<CatchId> {
        let &edge_id = throws.get(index)?;
        let (target, catch_type) = {
            let edge = self.edge(edge_id);
            (edge.target(), edge.kind().catch_type())
        };

        // Reuse an equivalent chain if one already heads the handler block.
        for item in self.block(target).entries.iter() {
            if let Item::Catch(existing) = item {
                if self.catch_chain_matches(existing.id, &throws[index..], maps) {
                    return Some(existing.id);
                }
            }
        }

        let id = CatchId::fresh();
        self.block_mut(target).entries.push_front(Item::Catch(CatchEntry {
            id,
            catch_type,
            next: None,
        }));
        maps.containing_block.insert(id, target);
        maps.data.insert(id, (catch_type, None));

        let next = self.add_catch_chain(throws, index + 1, maps);
        if next.is_some() {
            maps.data.get_mut(&id).unwrap().1 = next;
            for item in self.block_mut(target).entries.iter_mut() {
                if let Item::Catch(entry) = item {
                    if entry.id == id {
                        entry.next = next;
                        break;
                    }
                }
            }
        }
        Some(id)
    }

    /// Follows the chain starting at `first` and checks it against the
    /// sorted throw edges: same caught types, same handler blocks, same
    /// length.
    fn catch_chain_matches(&self, first: CatchId, throws: &[EdgeId], maps: &CatchMaps) -> bool {
        let mut cursor = Some(first);
        let mut index = 0;
        while let Some(catch_id) = cursor {
            let Some(&edge_id) = throws.get(index) else {
                return false;
            };
            let edge = self.edge(edge_id);
            let &(catch_type, next) = maps
                .data
                .get(&catch_id)
                .unwrap_or_else(|| panic!("{catch_id:?} not created by this linearization"));
            let containing = maps.containing_block[&catch_id];
            if catch_type != edge.kind().catch_type() || containing != edge.target() {
                return false;
            }
            cursor = next;
            index += 1;
        }
        index == throws.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::ControlFlowGraph;
    use crate::ir::{
        BranchTarget, CatchEntry, CatchId, InsnId, Instruction, Item, ItemList, Opcode,
        TryEntry, TypeToken,
    };

    fn insn(op: Opcode) -> (Item, InsnId) {
        let instruction = Instruction::new(op);
        let id = instruction.id();
        (Item::Insn(instruction), id)
    }

    fn opcodes(list: &ItemList) -> Vec<Opcode> {
        list.insns().map(Instruction::opcode).collect()
    }

    #[test]
    fn test_straight_line_roundtrips_exactly() {
        let (o1, id1) = insn(Opcode::Const);
        let (o2, id2) = insn(Opcode::AddInt);
        let (o3, id3) = insn(Opcode::ReturnVoid);
        let mut ir = ItemList::new();
        ir.push(o1);
        ir.push(o2);
        ir.push(o3);

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();
        let out = cfg.linearize();

        let ids: Vec<InsnId> = out.insns().map(Instruction::id).collect();
        assert_eq!(ids, vec![id1, id2, id3]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_if_then_else_roundtrip() {
        let (if_item, if_id) = insn(Opcode::IfEqz);
        let (goto_item, goto_id) = insn(Opcode::Goto);
        let mut ir = ItemList::new();
        ir.push(if_item);
        ir.push(insn(Opcode::Const).0); // a
        ir.push(goto_item);
        ir.push(Item::Target(BranchTarget {
            branch: if_id,
            case_key: None,
        }));
        ir.push(insn(Opcode::AddInt).0); // b
        ir.push(Item::Target(BranchTarget {
            branch: goto_id,
            case_key: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0); // c

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();
        let out = cfg.linearize();

        // `a` comes before `b` because their blocks keep id order, and the
        // goto from the then-arm to the join is rematerialized.
        assert_eq!(
            opcodes(&out),
            vec![
                Opcode::IfEqz,
                Opcode::Const,
                Opcode::Goto,
                Opcode::AddInt,
                Opcode::ReturnVoid
            ]
        );

        // Rebuilding gives the same shape back.
        let again = ControlFlowGraph::build(out, 0).unwrap();
        assert_eq!(again.block_count(), 4);
        assert_eq!(again.edge_count(), 4);
    }

    #[test]
    fn test_switch_case_keys_survive_roundtrip() {
        let (switch_item, switch_id) = insn(Opcode::PackedSwitch);
        let mut ir = ItemList::new();
        ir.push(switch_item);
        ir.push(insn(Opcode::Const).0); // default
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Target(BranchTarget {
            branch: switch_id,
            case_key: Some(10),
        }));
        ir.push(Item::Target(BranchTarget {
            branch: switch_id,
            case_key: Some(20),
        }));
        ir.push(insn(Opcode::AddInt).0);
        ir.push(insn(Opcode::ReturnVoid).0);

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();
        let out = cfg.linearize();

        let mut keys: Vec<Option<i32>> = out
            .iter()
            .filter_map(|item| match item {
                Item::Target(t) => Some(t.case_key),
                _ => None,
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec![Some(10), Some(20)]);

        let again = ControlFlowGraph::build(out, 0).unwrap();
        let entry = again.entry_block();
        let mut again_keys: Vec<Option<i32>> = again
            .get_succ_edges_if(entry, |e| e.kind().is_branch())
            .into_iter()
            .map(|e| again.edge(e).kind().case_key())
            .collect();
        again_keys.sort();
        assert_eq!(again_keys, vec![Some(10), Some(20)]);
    }

    #[test]
    fn test_try_catch_markers_reinserted() {
        let catch_id = CatchId::fresh();
        let token = TypeToken(0x0200_0007);
        let mut ir = ItemList::new();
        ir.push(Item::TryStart(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::Const).0);
        ir.push(insn(Opcode::DivInt).0);
        ir.push(insn(Opcode::AddInt).0);
        ir.push(Item::TryEnd(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Catch(CatchEntry {
            id: catch_id,
            catch_type: Some(token),
            next: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0); // handler

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();
        let out = cfg.linearize();

        let starts = out
            .iter()
            .filter(|i| matches!(i, Item::TryStart(_)))
            .count();
        let ends = out.iter().filter(|i| matches!(i, Item::TryEnd(_))).count();
        assert_eq!(starts, 1);
        assert_eq!(ends, 1);

        // One catch marker, carrying the original type, directly before the
        // handler code.
        let catches: Vec<&CatchEntry> = out
            .iter()
            .filter_map(|item| match item {
                Item::Catch(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(catches.len(), 1);
        assert_eq!(catches[0].catch_type, Some(token));
        assert_eq!(catches[0].next, None);

        // The TRY_START precedes the may-throw opcode.
        let start_index = out
            .iter()
            .position(|i| matches!(i, Item::TryStart(_)))
            .unwrap();
        let div_index = out
            .iter()
            .position(|i| i.insn().is_some_and(|x| x.opcode() == Opcode::DivInt))
            .unwrap();
        assert!(start_index < div_index);

        // And it all builds again with the throw edge intact.
        let again = ControlFlowGraph::build(out, 0).unwrap();
        let throwing: Vec<_> = again
            .block_ids()
            .filter(|&b| {
                !again
                    .get_succ_edges_if(b, |e| e.kind().is_throw())
                    .is_empty()
            })
            .collect();
        assert_eq!(throwing.len(), 1);
    }

    #[test]
    fn test_move_result_follows_primary_across_try_boundary() {
        // try { invoke } catch(..); move-result lands in the fallthrough
        // block, which must stay glued to the invoke.
        let catch_id = CatchId::fresh();
        let mut ir = ItemList::new();
        ir.push(Item::TryStart(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::InvokeStatic).0);
        ir.push(Item::TryEnd(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::MoveResult).0);
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Catch(CatchEntry {
            id: catch_id,
            catch_type: None,
            next: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();

        // The move-result block has exactly one predecessor.
        let mr_block = cfg
            .block_ids()
            .find(|&b| cfg.block(b).starts_with_move_result())
            .unwrap();
        assert_eq!(cfg.block(mr_block).preds().len(), 1);

        let out = cfg.linearize();
        let ops = opcodes(&out);
        let invoke = ops.iter().position(|&o| o == Opcode::InvokeStatic).unwrap();
        assert_eq!(ops[invoke + 1], Opcode::MoveResult);

        // Round-trips cleanly.
        let again = ControlFlowGraph::build(out, 0).unwrap();
        again.sanity_check();
    }

    #[test]
    fn test_two_blocks_sharing_a_try_share_one_chain() {
        // try { div; div } catch(T): both blocks throw to the same handler;
        // only one catch marker may be generated.
        let catch_id = CatchId::fresh();
        let token = TypeToken(3);
        let mut ir = ItemList::new();
        ir.push(Item::TryStart(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::DivInt).0);
        ir.push(insn(Opcode::DivInt).0);
        ir.push(Item::TryEnd(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Catch(CatchEntry {
            id: catch_id,
            catch_type: Some(token),
            next: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);

        let cfg = ControlFlowGraph::build(ir, 0).unwrap();
        let out = cfg.linearize();

        let catches = out.iter().filter(|i| i.is_catch()).count();
        assert_eq!(catches, 1);
        let starts = out
            .iter()
            .filter(|i| matches!(i, Item::TryStart(_)))
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_linearize_is_idempotent_after_one_trip() {
        // Signature of a graph, invariant under block relabeling.
        fn signature(cfg: &ControlFlowGraph<'_>) -> (usize, Vec<(usize, usize, String)>) {
            let ids: Vec<_> = cfg.block_ids().collect();
            let rank = |b| ids.iter().position(|&x| x == b).unwrap();
            let mut edges: Vec<(usize, usize, String)> = cfg
                .edges()
                .map(|(_, e)| (rank(e.src()), rank(e.target()), format!("{}", e.kind())))
                .collect();
            edges.sort();
            (ids.len(), edges)
        }

        let catch_id = CatchId::fresh();
        let (if_item, if_id) = insn(Opcode::IfEqz);
        let mut ir = ItemList::new();
        ir.push(if_item);
        ir.push(Item::TryStart(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::DivInt).0);
        ir.push(Item::TryEnd(TryEntry {
            catch_start: catch_id,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Target(BranchTarget {
            branch: if_id,
            case_key: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Catch(CatchEntry {
            id: catch_id,
            catch_type: None,
            next: None,
        }));
        ir.push(insn(Opcode::ReturnVoid).0);

        let g1 = ControlFlowGraph::build(ir, 1).unwrap();
        let g2 = ControlFlowGraph::build(g1.linearize(), 1).unwrap();
        let sig2 = signature(&g2);
        let g3 = ControlFlowGraph::build(g2.linearize(), 1).unwrap();
        let sig3 = signature(&g3);
        assert_eq!(sig2, sig3);
    }

    #[test]
    fn test_ghost_exit_contributes_nothing() {
        let (if_item, if_id) = insn(Opcode::IfEqz);
        let mut ir = ItemList::new();
        ir.push(if_item);
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Target(BranchTarget {
            branch: if_id,
            case_key: None,
        }));
        ir.push(insn(Opcode::Throw).0);

        let mut cfg = ControlFlowGraph::build(ir, 1).unwrap();
        cfg.calculate_exit_block();
        assert!(cfg.exit_block().is_some());

        let out = cfg.linearize();
        // Only the real opcodes surface; ghost edges leave no trace.
        assert_eq!(
            opcodes(&out),
            vec![Opcode::IfEqz, Opcode::ReturnVoid, Opcode::Throw]
        );
    }
}
