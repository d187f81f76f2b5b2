//! Instruction-list items: opcodes, branch targets, try/catch markers and
//! source positions.
//!
//! A method body is a linear sequence of [`Item`]s. Only the
//! [`Item::Insn`] variant survives inside an editable control-flow graph;
//! the marker variants exist in the linear form and are converted to and
//! from edges by construction and linearization.
//!
//! # Identity
//!
//! Branch-target markers must name the branch instruction they belong to,
//! and catch markers chain to one another. In the linear form these are
//! cross-item references, expressed here as ids: every [`Instruction`]
//! carries a process-unique [`InsnId`], every catch marker a [`CatchId`] and
//! every source position a [`PosId`], minted from atomic counters. Cloning
//! preserves ids, so a deep-copied graph stays isomorphic to its original.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ir::Opcode;

macro_rules! fresh_id {
    ($name:ident, $counter:ident) => {
        static $counter: AtomicU32 = AtomicU32::new(0);

        impl $name {
            /// Mints the next process-unique id.
            #[must_use]
            pub fn fresh() -> Self {
                $name($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Returns the raw id value.
            #[must_use]
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }
        }
    };
}

/// A strongly-typed identifier for an instruction within a method.
///
/// Replaces pointer identity: branch-target markers reference their branch
/// instruction by `InsnId`. Uniqueness is process-wide; density is not
/// guaranteed or needed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(u32);

fresh_id!(InsnId, NEXT_INSN_ID);

impl fmt::Debug for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InsnId({})", self.0)
    }
}

/// A strongly-typed identifier for a catch marker within a method.
///
/// Try markers reference the head of their catch chain by `CatchId`, and
/// catch markers chain to the next handler the same way.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatchId(u32);

fresh_id!(CatchId, NEXT_CATCH_ID);

impl fmt::Debug for CatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CatchId({})", self.0)
    }
}

/// A strongly-typed identifier for a source position entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PosId(u32);

fresh_id!(PosId, NEXT_POS_ID);

impl fmt::Debug for PosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PosId({})", self.0)
    }
}

/// A metadata token naming an exception type in the enclosing dex file.
///
/// The CFG never resolves tokens; it only compares them when deciding
/// whether two catch chains are equivalent.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeToken(
    /// The raw token value.
    pub u32,
);

impl fmt::Debug for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeToken(0x{:08X})", self.0)
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// A single instruction: an opcode plus its register operands.
///
/// The operand model is the minimum registers-size recomputation needs: an
/// optional destination register, source registers and an optional literal.
/// Wide operands occupy a register pair; the width queries account for
/// that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    id: InsnId,
    opcode: Opcode,
    dest: Option<u16>,
    srcs: Vec<u16>,
    literal: Option<i64>,
}

impl Instruction {
    /// Creates a new instruction with a fresh id and no operands.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Instruction {
            id: InsnId::fresh(),
            opcode,
            dest: None,
            srcs: Vec::new(),
            literal: None,
        }
    }

    /// Sets the destination register.
    #[must_use]
    pub fn with_dest(mut self, dest: u16) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Sets the source registers.
    #[must_use]
    pub fn with_srcs(mut self, srcs: Vec<u16>) -> Self {
        self.srcs = srcs;
        self
    }

    /// Sets the literal operand.
    #[must_use]
    pub fn with_literal(mut self, literal: i64) -> Self {
        self.literal = Some(literal);
        self
    }

    /// Returns this instruction's id.
    #[must_use]
    #[inline]
    pub const fn id(&self) -> InsnId {
        self.id
    }

    /// Returns the opcode.
    #[must_use]
    #[inline]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the destination register, if any.
    #[must_use]
    #[inline]
    pub const fn dest(&self) -> Option<u16> {
        self.dest
    }

    /// Returns the source registers.
    #[must_use]
    pub fn srcs(&self) -> &[u16] {
        &self.srcs
    }

    /// Returns the literal operand, if any.
    #[must_use]
    #[inline]
    pub const fn literal(&self) -> Option<i64> {
        self.literal
    }

    /// Returns `true` if the destination register is a wide pair.
    #[must_use]
    pub const fn dest_is_wide(&self) -> bool {
        self.opcode.dest_is_wide()
    }

    /// Returns `true` if source register `i` is a wide pair.
    #[must_use]
    pub fn src_is_wide(&self, i: usize) -> bool {
        debug_assert!(i < self.srcs.len());
        self.opcode.srcs_are_wide()
    }
}

/// A branch-target marker.
///
/// Marks its position in the list as a destination of `branch`. Switch
/// targets additionally carry the case key that selects them; `None` means
/// a plain `if`/`goto` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchTarget {
    /// The branch instruction this marker belongs to.
    pub branch: InsnId,
    /// The switch case key selecting this target, absent for plain targets.
    pub case_key: Option<i32>,
}

/// A try-region delimiter, referencing the head of its catch chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryEntry {
    /// First catch marker of the region's handler chain.
    pub catch_start: CatchId,
}

/// A catch marker: one handler in a try region's catch chain.
///
/// Chains are ordered; an exception is offered to each handler in chain
/// order. `catch_type` of `None` is a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchEntry {
    /// This marker's id, referenced by try markers and by `next` links.
    pub id: CatchId,
    /// The caught exception type, or `None` for a catch-all handler.
    pub catch_type: Option<TypeToken>,
    /// The next handler in the chain, if any.
    pub next: Option<CatchId>,
}

/// A source-position entry mapping following instructions to a line.
///
/// Positions form a parent-pointer tree (for inlined code); the CFG only
/// maintains the invariant that a parent pointer never dangles after block
/// deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    /// This position's id.
    pub id: PosId,
    /// The caller position this one was inlined from, if any.
    pub parent: Option<PosId>,
    /// Source line number.
    pub line: u32,
}

impl SourcePosition {
    /// Creates a root position with a fresh id.
    #[must_use]
    pub fn new(line: u32) -> Self {
        SourcePosition {
            id: PosId::fresh(),
            parent: None,
            line,
        }
    }

    /// Creates a position inlined from `parent`, with a fresh id.
    #[must_use]
    pub fn with_parent(line: u32, parent: PosId) -> Self {
        SourcePosition {
            id: PosId::fresh(),
            parent: Some(parent),
            line,
        }
    }
}

/// One element of a method's linear instruction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// An executable instruction.
    Insn(Instruction),
    /// A branch-target marker.
    Target(BranchTarget),
    /// Start of a try region.
    TryStart(TryEntry),
    /// End of a try region.
    TryEnd(TryEntry),
    /// A catch handler marker.
    Catch(CatchEntry),
    /// A source-position entry.
    Position(SourcePosition),
}

impl Item {
    /// Returns the contained instruction, if this is an opcode item.
    #[must_use]
    pub fn insn(&self) -> Option<&Instruction> {
        match self {
            Item::Insn(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns `true` for opcode items.
    #[must_use]
    pub const fn is_insn(&self) -> bool {
        matches!(self, Item::Insn(_))
    }

    /// Returns `true` for branch-target markers.
    #[must_use]
    pub const fn is_target(&self) -> bool {
        matches!(self, Item::Target(_))
    }

    /// Returns `true` for catch markers.
    #[must_use]
    pub const fn is_catch(&self) -> bool {
        matches!(self, Item::Catch(_))
    }

    /// Returns `true` for try-region delimiters (either end).
    #[must_use]
    pub const fn is_try_marker(&self) -> bool {
        matches!(self, Item::TryStart(_) | Item::TryEnd(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = InsnId::fresh();
        let b = InsnId::fresh();
        assert_ne!(a, b);

        let c = CatchId::fresh();
        let d = CatchId::fresh();
        assert_ne!(c, d);
    }

    #[test]
    fn test_instruction_builder() {
        let insn = Instruction::new(Opcode::AddInt)
            .with_dest(0)
            .with_srcs(vec![1, 2]);
        assert_eq!(insn.opcode(), Opcode::AddInt);
        assert_eq!(insn.dest(), Some(0));
        assert_eq!(insn.srcs(), &[1, 2]);
        assert_eq!(insn.literal(), None);
    }

    #[test]
    fn test_clone_preserves_id() {
        let insn = Instruction::new(Opcode::Nop);
        let copy = insn.clone();
        assert_eq!(insn.id(), copy.id());
    }

    #[test]
    fn test_wide_queries() {
        let wide = Instruction::new(Opcode::MoveWide).with_dest(2).with_srcs(vec![4]);
        assert!(wide.dest_is_wide());
        assert!(wide.src_is_wide(0));

        let narrow = Instruction::new(Opcode::Move).with_dest(0).with_srcs(vec![1]);
        assert!(!narrow.dest_is_wide());
        assert!(!narrow.src_is_wide(0));
    }

    #[test]
    fn test_item_predicates() {
        let insn = Item::Insn(Instruction::new(Opcode::Nop));
        assert!(insn.is_insn());
        assert!(insn.insn().is_some());
        assert!(!insn.is_target());

        let target = Item::Target(BranchTarget {
            branch: InsnId::fresh(),
            case_key: None,
        });
        assert!(target.is_target());
        assert!(target.insn().is_none());

        let try_start = Item::TryStart(TryEntry {
            catch_start: CatchId::fresh(),
        });
        assert!(try_start.is_try_marker());
        assert!(!try_start.is_catch());
    }

    #[test]
    fn test_position_parents() {
        let root = SourcePosition::new(10);
        let inlined = SourcePosition::with_parent(42, root.id);
        assert_eq!(inlined.parent, Some(root.id));
        assert_eq!(root.parent, None);
    }
}
