//! Immediate-dominator computation.
//!
//! A block `d` dominates a block `n` if every path from the entry to `n`
//! passes through `d`. The computation here is the Cooper-Harvey-Kennedy
//! fixpoint ("A Simple, Fast Dominance Algorithm"): number the blocks in
//! postorder, then repeatedly intersect each block's predecessors' dominator
//! fingers until nothing changes. The intersection walks the finger with the
//! smaller postorder number up its immediate-dominator chain until the two
//! fingers meet.
//!
//! Blocks with no predecessors (the entry, plus any orphans a caller has
//! not cleaned up yet) are treated as their own dominators and seed the
//! postorder walk so that every block receives a number.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::cfg::{BlockId, ControlFlowGraph};

/// Dominator data for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DominatorInfo {
    /// The block's immediate dominator; the entry (and any orphan root) is
    /// its own. `None` means the block was never reached by the fixpoint.
    pub idom: Option<BlockId>,
    /// The block's postorder number.
    pub postorder: usize,
}

/// The result of immediate-dominator computation.
///
/// # Examples
///
/// ```rust
/// use dexflow::{ControlFlowGraph, ir::{BranchTarget, Instruction, Item, ItemList, Opcode}};
///
/// // if-eqz L; ret; L: ret  -- the conditional block dominates both arms.
/// let cond = Instruction::new(Opcode::IfEqz).with_srcs(vec![0]);
/// let cond_id = cond.id();
/// let mut ir = ItemList::new();
/// ir.push(Item::Insn(cond));
/// ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
/// ir.push(Item::Target(BranchTarget { branch: cond_id, case_key: None }));
/// ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
///
/// let cfg = ControlFlowGraph::build(ir, 1)?;
/// let dominators = cfg.immediate_dominators();
/// let entry = cfg.entry_block();
/// for b in cfg.block_ids() {
///     assert!(dominators.dominates(entry, b));
/// }
/// # Ok::<(), dexflow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Dominators {
    entry: BlockId,
    info: FxHashMap<BlockId, DominatorInfo>,
}

impl Dominators {
    /// Returns the entry block the computation was rooted at.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    /// Returns the recorded data for a block.
    #[must_use]
    pub fn info(&self, block: BlockId) -> Option<&DominatorInfo> {
        self.info.get(&block)
    }

    /// Returns the immediate dominator of a block.
    ///
    /// The entry block is its own immediate dominator; `None` means the
    /// block was not reached.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.info.get(&block).and_then(|info| info.idom)
    }

    /// Returns the postorder number assigned to a block.
    #[must_use]
    pub fn postorder_index(&self, block: BlockId) -> Option<usize> {
        self.info.get(&block).map(|info| info.postorder)
    }

    /// Checks whether `a` dominates `b`. A block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let Some(idom) = self.immediate_dominator(current) else {
                return false;
            };
            if idom == current {
                // Reached a root without meeting `a`.
                return false;
            }
            current = idom;
        }
    }

    /// Checks whether `a` strictly dominates `b` (dominates and differs).
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

/// Produces a postorder numbering of the graph's blocks.
///
/// Blocks with no predecessors other than the entry seed the stack first so
/// orphan subgraphs still get numbered; the entry goes on top and is
/// traversed first.
fn postorder_sort(cfg: &ControlFlowGraph<'_>) -> Vec<BlockId> {
    let mut stack: Vec<BlockId> = Vec::new();
    for b in cfg.block_ids() {
        if b != cfg.entry_block() && cfg.block(b).preds().is_empty() {
            stack.push(b);
        }
    }
    stack.push(cfg.entry_block());

    let mut postorder = Vec::new();
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    while let Some(&current) = stack.last() {
        visited.insert(current);
        let unvisited_succ = cfg
            .block(current)
            .succs()
            .iter()
            .map(|&e| cfg.edge(e).target())
            .find(|t| !visited.contains(t));
        match unvisited_succ {
            Some(succ) => stack.push(succ),
            None => {
                postorder.push(current);
                stack.pop();
            }
        }
    }
    postorder
}

/// Walks the two fingers up their dominator chains until they meet.
fn idom_intersect(
    info: &FxHashMap<BlockId, DominatorInfo>,
    block1: BlockId,
    block2: BlockId,
) -> BlockId {
    let postorder = |b: BlockId| info[&b].postorder;
    let idom = |b: BlockId| info[&b].idom.expect("finger escaped the processed region");

    let mut finger1 = block1;
    let mut finger2 = block2;
    while finger1 != finger2 {
        while postorder(finger1) < postorder(finger2) {
            finger1 = idom(finger1);
        }
        while postorder(finger2) < postorder(finger1) {
            finger2 = idom(finger2);
        }
    }
    finger1
}

impl<'a> ControlFlowGraph<'a> {
    /// Computes the immediate dominator of every block.
    ///
    /// # Panics
    ///
    /// Panics if a block's predecessors are all unprocessed when its turn
    /// comes, which happens when the entry block itself is a branch target;
    /// run [`simplify`](Self::simplify) first on graphs in that state.
    #[must_use]
    pub fn immediate_dominators(&self) -> Dominators {
        let postorder = postorder_sort(self);
        let mut info: FxHashMap<BlockId, DominatorInfo> = FxHashMap::default();
        for (index, &b) in postorder.iter().enumerate() {
            info.insert(
                b,
                DominatorInfo {
                    idom: None,
                    postorder: index,
                },
            );
        }
        for b in self.block_ids() {
            info.entry(b).or_insert(DominatorInfo {
                idom: None,
                postorder: usize::MAX,
            });
        }

        // A block with no predecessors is its own dominator.
        let ids: Vec<BlockId> = self.block_ids().collect();
        for &b in &ids {
            if self.block(b).preds().is_empty() {
                info.get_mut(&b).unwrap().idom = Some(b);
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in postorder.iter().rev() {
                let preds = self.block(b).preds();
                if preds.is_empty() {
                    continue;
                }

                let mut new_idom = preds
                    .iter()
                    .map(|&e| self.edge(e).src())
                    .find(|p| info[p].idom.is_some())
                    .expect("no processed predecessor; is the entry a branch target?");
                for &e in preds {
                    let pred = self.edge(e).src();
                    if pred != new_idom && info[&pred].idom.is_some() {
                        new_idom = idom_intersect(&info, new_idom, pred);
                    }
                }

                if info[&b].idom != Some(new_idom) {
                    info.get_mut(&b).unwrap().idom = Some(new_idom);
                    changed = true;
                }
            }
        }

        Dominators {
            entry: self.entry,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::ControlFlowGraph;

    /// Builds a bare editable graph from an edge list over `n` blocks.
    fn graph(n: usize, edges: &[(usize, usize)]) -> ControlFlowGraph<'static> {
        let mut cfg = ControlFlowGraph::empty(0, true);
        let ids: Vec<BlockId> = (0..n).map(|_| cfg.create_block()).collect();
        cfg.entry = ids[0];
        for &(src, target) in edges {
            cfg.add_goto_edge(ids[src], ids[target]);
        }
        cfg
    }

    fn b(index: usize) -> BlockId {
        BlockId::new(index)
    }

    #[test]
    fn test_single_block() {
        let cfg = graph(1, &[]);
        let dom = cfg.immediate_dominators();
        assert_eq!(dom.immediate_dominator(b(0)), Some(b(0)));
        assert!(dom.dominates(b(0), b(0)));
        assert!(!dom.strictly_dominates(b(0), b(0)));
    }

    #[test]
    fn test_linear_chain() {
        // 0 -> 1 -> 2 -> 3
        let cfg = graph(4, &[(0, 1), (1, 2), (2, 3)]);
        let dom = cfg.immediate_dominators();

        assert_eq!(dom.immediate_dominator(b(1)), Some(b(0)));
        assert_eq!(dom.immediate_dominator(b(2)), Some(b(1)));
        assert_eq!(dom.immediate_dominator(b(3)), Some(b(2)));

        assert!(dom.dominates(b(0), b(3)));
        assert!(dom.dominates(b(1), b(3)));
        assert!(!dom.dominates(b(3), b(1)));
    }

    #[test]
    fn test_diamond() {
        //      0
        //     / \
        //    1   2
        //     \ /
        //      3
        let cfg = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom = cfg.immediate_dominators();

        assert_eq!(dom.immediate_dominator(b(1)), Some(b(0)));
        assert_eq!(dom.immediate_dominator(b(2)), Some(b(0)));
        // The join's immediate dominator is the fork, not either arm.
        assert_eq!(dom.immediate_dominator(b(3)), Some(b(0)));
        assert!(!dom.strictly_dominates(b(1), b(3)));
        assert!(!dom.strictly_dominates(b(2), b(3)));
    }

    #[test]
    fn test_loop_back_edge() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let cfg = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let dom = cfg.immediate_dominators();

        assert!(dom.dominates(b(1), b(2)));
        assert!(!dom.strictly_dominates(b(2), b(1)));
        assert_eq!(dom.immediate_dominator(b(3)), Some(b(2)));
    }

    #[test]
    fn test_nested_branches() {
        //        0
        //        |
        //        1
        //       / \
        //      2   3
        //     / \   \
        //    4   5   6
        //     \ /   /
        //      7   /
        //       \ /
        //        8
        let cfg = graph(
            9,
            &[
                (0, 1),
                (1, 2),
                (1, 3),
                (2, 4),
                (2, 5),
                (3, 6),
                (4, 7),
                (5, 7),
                (6, 8),
                (7, 8),
            ],
        );
        let dom = cfg.immediate_dominators();

        assert_eq!(dom.immediate_dominator(b(7)), Some(b(2)));
        assert_eq!(dom.immediate_dominator(b(8)), Some(b(1)));
        assert!(dom.dominates(b(1), b(8)));
        assert!(!dom.strictly_dominates(b(3), b(8)));
    }

    #[test]
    fn test_entry_idom_is_itself() {
        let cfg = graph(2, &[(0, 1)]);
        let dom = cfg.immediate_dominators();
        assert_eq!(dom.entry(), b(0));
        assert_eq!(dom.immediate_dominator(b(0)), Some(b(0)));
    }

    #[test]
    fn test_postorder_indices_cover_reachable_blocks() {
        let cfg = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let dom = cfg.immediate_dominators();

        let mut indices: Vec<usize> = (0..4)
            .map(|i| dom.postorder_index(b(i)).unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        // The entry is last in postorder.
        assert_eq!(dom.postorder_index(b(0)), Some(3));
    }

    #[test]
    fn test_orphan_block_is_own_dominator() {
        // Block 2 is disconnected; it still gets a postorder number and is
        // its own dominator.
        let cfg = graph(3, &[(0, 1)]);
        let dom = cfg.immediate_dominators();

        assert_eq!(dom.immediate_dominator(b(2)), Some(b(2)));
        assert!(dom.postorder_index(b(2)).is_some());
        assert!(!dom.dominates(b(0), b(2)));
        assert!(dom.dominates(b(0), b(1)));
    }

    #[test]
    fn test_idom_strictly_dominates_on_built_graph() {
        use crate::ir::{BranchTarget, Instruction, Item, ItemList, Opcode};

        let cond = Instruction::new(Opcode::IfEqz).with_srcs(vec![0]);
        let cond_id = cond.id();
        let mut ir = ItemList::new();
        ir.push(Item::Insn(cond));
        ir.push(Item::Insn(Instruction::new(Opcode::Const).with_dest(0)));
        ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));
        ir.push(Item::Target(BranchTarget {
            branch: cond_id,
            case_key: None,
        }));
        ir.push(Item::Insn(Instruction::new(Opcode::ReturnVoid)));

        let cfg = ControlFlowGraph::build(ir, 1).unwrap();
        let dom = cfg.immediate_dominators();
        let entry = cfg.entry_block();

        for block in cfg.block_ids() {
            assert!(dom.dominates(entry, block));
            if block != entry {
                let idom = dom.immediate_dominator(block).unwrap();
                assert!(dom.strictly_dominates(idom, block));
            }
        }
    }
}
