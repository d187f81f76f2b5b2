//! Exit-block discovery.
//!
//! Finding the exits of a method is not as simple as collecting blocks that
//! end in return or throw: an infinite loop is a valid way to end dex
//! bytecode too. The walk here is Tarjan's strongly-connected-components
//! algorithm, tracking per component whether any vertex has an edge leaving
//! it; a component with no way out contributes its head as an exit.
//!
//! Method graphs can reach tens of thousands of blocks, so the walk keeps
//! an explicit frame stack instead of recursing.

use rustc_hash::FxHashMap;

use crate::cfg::{BlockId, ControlFlowGraph, EdgeType};
use crate::ir::Branchingness;

/// Depth-first number sentinel for "popped and assigned to a finished SCC".
const VISITED: u32 = u32::MAX;

/// One in-progress vertex of the iterative SCC walk.
struct Frame {
    block: BlockId,
    /// Next successor index to examine.
    succ_index: usize,
    /// Running minimum over own dfn and reachable low-links.
    head: u32,
    /// Whether any vertex of the current component escapes it.
    has_exit: bool,
}

/// Tarjan SCC state, collecting the heads of terminal components.
struct ExitBlocks {
    next_dfn: u32,
    dfns: FxHashMap<BlockId, u32>,
    scc_stack: Vec<BlockId>,
    exit_blocks: Vec<BlockId>,
}

impl ExitBlocks {
    fn new() -> Self {
        ExitBlocks {
            next_dfn: 0,
            dfns: FxHashMap::default(),
            scc_stack: Vec::new(),
            exit_blocks: Vec::new(),
        }
    }

    fn visit(&mut self, cfg: &ControlFlowGraph<'_>, start: BlockId) {
        let mut frames = vec![self.push_vertex(start)];

        while let Some(frame) = frames.last_mut() {
            let block = frame.block;
            let succs = cfg.block(block).succs();

            if frame.succ_index < succs.len() {
                let edge = succs[frame.succ_index];
                frame.succ_index += 1;
                let target = cfg.edge(edge).target();

                match self.dfns.get(&target).copied() {
                    None => {
                        let child = self.push_vertex(target);
                        frames.push(child);
                    }
                    Some(dfn) => {
                        frame.has_exit |= dfn == VISITED;
                        frame.head = frame.head.min(dfn);
                    }
                }
                continue;
            }

            let finished = frames.pop().expect("frame stack underflow");
            let own_dfn = self.dfns[&finished.block];
            let mut has_exit = finished.has_exit;

            if finished.head == own_dfn {
                // `finished.block` heads a component; a component nothing
                // escapes is an exit.
                if !has_exit {
                    self.exit_blocks.push(finished.block);
                    has_exit = true;
                }
                loop {
                    let top = self.scc_stack.pop().expect("SCC stack underflow");
                    self.dfns.insert(top, VISITED);
                    if top == finished.block {
                        break;
                    }
                }
            }

            if let Some(parent) = frames.last_mut() {
                parent.head = parent.head.min(finished.head);
                parent.has_exit |= has_exit;
            }
        }
    }

    fn push_vertex(&mut self, block: BlockId) -> Frame {
        self.next_dfn += 1;
        self.dfns.insert(block, self.next_dfn);
        self.scc_stack.push(block);
        Frame {
            block,
            succ_index: 0,
            head: self.next_dfn,
            has_exit: false,
        }
    }
}

impl<'a> ControlFlowGraph<'a> {
    /// Installs the exit block.
    ///
    /// A single real exit becomes the exit block directly; multiple real
    /// exits get a fresh ghost block that each of them reaches through a
    /// ghost edge. Recomputing on a graph whose exit is a ghost block
    /// removes the old ghost first.
    pub fn calculate_exit_block(&mut self) {
        if let Some(exit) = self.exit {
            if !self.editable {
                return;
            }
            if self.get_pred_edge_of_type(exit, EdgeType::Ghost).is_some() {
                // Clear the old ghost before recomputing the exit of a
                // graph with multiple exit points.
                self.remove_ghost_exit_block(exit);
            } else {
                self.exit = None;
            }
        }

        let mut walk = ExitBlocks::new();
        walk.visit(self, self.entry);

        if walk.exit_blocks.len() == 1 {
            self.exit = Some(walk.exit_blocks[0]);
        } else {
            let ghost = self.create_block();
            for b in walk.exit_blocks {
                self.add_ghost_edge(b, ghost);
            }
            self.exit = Some(ghost);
        }
    }

    /// Removes a ghost exit block without the entry-reassignment rule of
    /// [`remove_block`](Self::remove_block); a ghost never becomes entry.
    fn remove_ghost_exit_block(&mut self, ghost: BlockId) {
        self.remove_matching_pred_edges(ghost, |_| true, false);
        assert!(
            self.block(ghost).succs().is_empty(),
            "ghost exit {ghost} has outgoing edges"
        );
        self.blocks[ghost.index()] = None;
        self.exit = None;
    }

    /// Returns the method's real exit blocks.
    ///
    /// With `include_infinite_loops`, returns the sources of the ghost
    /// exit's predecessor edges (or the single exit block when no ghost was
    /// needed); [`calculate_exit_block`](Self::calculate_exit_block) must
    /// have run. Without, returns every block whose terminator is a return
    /// or throw; no SCC analysis is involved.
    #[must_use]
    pub fn real_exit_blocks(&self, include_infinite_loops: bool) -> Vec<BlockId> {
        let mut result = Vec::new();
        if let Some(exit) = self.exit {
            if include_infinite_loops {
                let ghosts = self.get_pred_edges_of_type(exit, EdgeType::Ghost);
                if ghosts.is_empty() {
                    // A single exit point; no ghost block was added.
                    result.push(exit);
                } else {
                    for e in ghosts {
                        result.push(self.edge(e).src());
                    }
                }
                return result;
            }
        } else {
            assert!(
                !include_infinite_loops,
                "call calculate_exit_block first"
            );
        }

        for b in self.block_ids().collect::<Vec<_>>() {
            let br = self.branchingness(b);
            if br == Branchingness::Return || br == Branchingness::Throw {
                result.push(b);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::cfg::{BlockId, ControlFlowGraph, EdgeType};
    use crate::ir::{BranchTarget, Instruction, Item, ItemList, Opcode};

    fn insn(op: Opcode) -> (Item, crate::ir::InsnId) {
        let instruction = Instruction::new(op);
        let id = instruction.id();
        (Item::Insn(instruction), id)
    }

    /// if-eqz L; ret; L: throw  -- two real exits.
    fn two_exit_cfg() -> ControlFlowGraph<'static> {
        let (if_item, if_id) = insn(Opcode::IfEqz);
        let mut ir = ItemList::new();
        ir.push(if_item);
        ir.push(insn(Opcode::ReturnVoid).0);
        ir.push(Item::Target(BranchTarget {
            branch: if_id,
            case_key: None,
        }));
        ir.push(insn(Opcode::Const).0);
        ir.push(insn(Opcode::Throw).0);
        ControlFlowGraph::build(ir, 1).unwrap()
    }

    #[test]
    fn test_single_exit_is_direct() {
        let mut ir = ItemList::new();
        ir.push(insn(Opcode::Const).0);
        ir.push(insn(Opcode::ReturnVoid).0);
        let mut cfg = ControlFlowGraph::build(ir, 0).unwrap();

        cfg.calculate_exit_block();
        let exit = cfg.exit_block().unwrap();
        assert_eq!(exit, cfg.entry_block());
        assert_eq!(cfg.real_exit_blocks(true), vec![exit]);
    }

    #[test]
    fn test_multiple_exits_get_a_ghost() {
        let mut cfg = two_exit_cfg();
        let before = cfg.block_count();

        cfg.calculate_exit_block();
        let exit = cfg.exit_block().unwrap();

        // A fresh ghost block was created, fed by two ghost edges.
        assert_eq!(cfg.block_count(), before + 1);
        assert!(cfg.block(exit).is_empty());
        let ghosts = cfg.get_pred_edges_of_type(exit, EdgeType::Ghost);
        assert_eq!(ghosts.len(), 2);

        let mut real = cfg.real_exit_blocks(true);
        real.sort();
        assert_eq!(real.len(), 2);
        cfg.sanity_check();
    }

    #[test]
    fn test_recompute_clears_old_ghost() {
        let mut cfg = two_exit_cfg();
        cfg.calculate_exit_block();
        let first_ghost = cfg.exit_block().unwrap();

        cfg.calculate_exit_block();
        let second_ghost = cfg.exit_block().unwrap();

        assert!(!cfg.contains_block(first_ghost));
        assert_eq!(
            cfg.get_pred_edges_of_type(second_ghost, EdgeType::Ghost).len(),
            2
        );
        cfg.sanity_check();
    }

    #[test]
    fn test_infinite_loop_is_an_exit() {
        // L: goto L
        let (goto_item, goto_id) = insn(Opcode::Goto);
        let mut ir = ItemList::new();
        ir.push(Item::Target(BranchTarget {
            branch: goto_id,
            case_key: None,
        }));
        ir.push(goto_item);
        let mut cfg = ControlFlowGraph::build(ir, 0).unwrap();
        assert_eq!(cfg.block_count(), 1);

        cfg.calculate_exit_block();
        let exits = cfg.real_exit_blocks(true);
        assert_eq!(exits, vec![cfg.entry_block()]);
    }

    #[test]
    fn test_terminal_loop_head_is_the_exit() {
        // entry -> L, where L loops on itself with no way out.
        let (goto_back_item, goto_back) = insn(Opcode::Goto);
        let mut ir = ItemList::new();
        ir.push(insn(Opcode::Const).0); // entry code
        ir.push(Item::Target(BranchTarget {
            branch: goto_back,
            case_key: None,
        }));
        ir.push(insn(Opcode::Nop).0); // L
        ir.push(insn(Opcode::AddInt).0);
        ir.push(goto_back_item);
        let mut cfg = ControlFlowGraph::build(ir, 0).unwrap();

        cfg.calculate_exit_block();
        let exits = cfg.real_exit_blocks(true);
        assert_eq!(exits.len(), 1);
        assert_ne!(exits[0], cfg.entry_block());
    }

    #[test]
    fn test_real_exits_without_infinite_loops() {
        let cfg = two_exit_cfg();
        // No calculate_exit_block needed for the terminator-driven query.
        let exits = cfg.real_exit_blocks(false);
        assert_eq!(exits.len(), 2);
    }

    #[test]
    #[should_panic(expected = "call calculate_exit_block first")]
    fn test_infinite_loops_require_exit_analysis() {
        let cfg = two_exit_cfg();
        let _ = cfg.real_exit_blocks(true);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        // A long straight chain of conditional diamonds exercises the
        // explicit-stack walk.
        let mut ir = ItemList::new();
        for _ in 0..20_000 {
            ir.push(insn(Opcode::Nop).0);
            // Forced block break via a may-throw op inside a try would be
            // heavier; a plain long chain splits on nothing, so interleave
            // branches.
            let (if_item, if_id) = insn(Opcode::IfEqz);
            ir.push(if_item);
            ir.push(Item::Target(BranchTarget {
                branch: if_id,
                case_key: None,
            }));
        }
        ir.push(insn(Opcode::ReturnVoid).0);
        let mut cfg = ControlFlowGraph::build(ir, 1).unwrap();
        assert!(cfg.block_count() > 10_000);

        cfg.calculate_exit_block();
        assert!(cfg.exit_block().is_some());
    }

    #[test]
    fn test_single_exit_recompute_is_stable() {
        let mut ir = ItemList::new();
        ir.push(insn(Opcode::ReturnVoid).0);
        let mut cfg = ControlFlowGraph::build(ir, 0).unwrap();

        cfg.calculate_exit_block();
        let first = cfg.exit_block();
        cfg.calculate_exit_block();
        assert_eq!(cfg.exit_block(), first);
    }

    #[test]
    fn test_exit_ids_are_fresh() {
        let mut cfg = two_exit_cfg();
        let max_id = cfg.block_ids().map(BlockId::index).max().unwrap();
        cfg.calculate_exit_block();
        assert!(cfg.exit_block().unwrap().index() > max_id);
    }
}
