//! Opcode classification for Dex-family register bytecode.
//!
//! This module provides the [`Opcode`] enum together with the pure property
//! queries the control-flow graph branches on: whether an opcode branches,
//! returns, throws, may throw, pairs with a move-result, or is internal to
//! the IR. The queries are driven by a per-opcode [`OpcodeFlags`] table so
//! that each category is declared exactly once.
//!
//! The opcode set is deliberately the subset a CFG cares about; operand
//! encoding, verification and the full Dalvik instruction catalogue live in
//! the frontend that produces the instruction list.

use bitflags::bitflags;

bitflags! {
    /// Property bits describing how an opcode participates in control flow.
    ///
    /// These flags drive every classifier query below. A single opcode can
    /// carry several: `throw` is both a block terminator and a thrower,
    /// invokes both may throw and produce a move-result.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u16 {
        /// Any branch: goto, conditional or switch.
        const BRANCH = 1 << 0;

        /// A two-way conditional branch (`if-*`).
        const CONDITIONAL = 1 << 1;

        /// A multi-way branch (`packed-switch`, `sparse-switch`).
        const SWITCH = 1 << 2;

        /// An unconditional goto.
        const GOTO = 1 << 3;

        /// Ends the method (`return-*`).
        const RETURN = 1 << 4;

        /// The explicit `throw` opcode.
        const THROW = 1 << 5;

        /// Can raise at runtime without being a `throw` (invokes, array and
        /// field accesses, division, allocation, resolution).
        const MAY_THROW = 1 << 6;

        /// Is a `move-result*` opcode consuming an invoke's value.
        const MOVE_RESULT = 1 << 7;

        /// Is the IR-internal `move-result-pseudo` consuming the value of a
        /// resolution opcode such as `check-cast`.
        const MOVE_RESULT_PSEUDO = 1 << 8;

        /// IR-internal opcode that never appears in emitted dex
        /// (`load-param*`, `move-result-pseudo`).
        const INTERNAL = 1 << 9;

        /// Produces a value picked up by a following `move-result*`.
        const HAS_MOVE_RESULT = 1 << 10;

        /// Produces a value picked up by a following `move-result-pseudo`.
        const HAS_MOVE_RESULT_PSEUDO = 1 << 11;

        /// The destination register is a wide (64-bit) pair.
        const WIDE_DEST = 1 << 12;

        /// All source registers are wide (64-bit) pairs.
        const WIDE_SRCS = 1 << 13;
    }
}

/// The category of a block's terminator.
///
/// Derived from the last opcode of a block (or, in an editable CFG, from the
/// block's outgoing edges, since gotos live only as edges there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branchingness {
    /// Control falls through; the block does not end in a branch.
    None,
    /// Unconditional transfer.
    Goto,
    /// Two-way conditional branch.
    If,
    /// Multi-way branch.
    Switch,
    /// Method return.
    Return,
    /// Explicit throw.
    Throw,
}

/// A Dex-family opcode, reduced to the categories control-flow analysis
/// distinguishes.
///
/// Operand shapes are carried by [`Instruction`](crate::ir::Instruction);
/// the opcode itself only answers classification queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Opcode {
    Nop,

    Move,
    MoveWide,
    MoveObject,

    MoveResult,
    MoveResultWide,
    MoveResultObject,
    MoveResultPseudo,

    LoadParam,
    LoadParamWide,
    LoadParamObject,

    Const,
    ConstWide,
    ConstString,
    ConstClass,

    CheckCast,
    InstanceOf,
    NewInstance,
    NewArray,

    InvokeVirtual,
    InvokeSuper,
    InvokeDirect,
    InvokeStatic,
    InvokeInterface,

    Goto,

    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfEqz,
    IfNez,
    IfLtz,
    IfGez,
    IfGtz,
    IfLez,

    PackedSwitch,
    SparseSwitch,

    ReturnVoid,
    Return,
    ReturnWide,
    ReturnObject,

    Throw,

    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    CmpLong,

    Aget,
    Aput,
    Iget,
    Iput,
    Sget,
    Sput,

    MonitorEnter,
    MonitorExit,
}

impl Opcode {
    /// Returns the property flags for this opcode.
    #[must_use]
    pub const fn flags(self) -> OpcodeFlags {
        use Opcode::*;
        match self {
            Nop | Move | MoveObject | Const | AddInt | SubInt | MulInt => OpcodeFlags::empty(),

            MoveWide => OpcodeFlags::WIDE_DEST.union(OpcodeFlags::WIDE_SRCS),
            ConstWide => OpcodeFlags::WIDE_DEST,
            CmpLong => OpcodeFlags::WIDE_SRCS,

            MoveResult | MoveResultObject => OpcodeFlags::MOVE_RESULT,
            MoveResultWide => OpcodeFlags::MOVE_RESULT.union(OpcodeFlags::WIDE_DEST),
            MoveResultPseudo => {
                OpcodeFlags::MOVE_RESULT_PSEUDO.union(OpcodeFlags::INTERNAL)
            }

            LoadParam | LoadParamObject => OpcodeFlags::INTERNAL,
            LoadParamWide => OpcodeFlags::INTERNAL.union(OpcodeFlags::WIDE_DEST),

            ConstString | ConstClass | CheckCast | InstanceOf | NewInstance | NewArray => {
                OpcodeFlags::MAY_THROW.union(OpcodeFlags::HAS_MOVE_RESULT_PSEUDO)
            }

            InvokeVirtual | InvokeSuper | InvokeDirect | InvokeStatic | InvokeInterface => {
                OpcodeFlags::MAY_THROW.union(OpcodeFlags::HAS_MOVE_RESULT)
            }

            Goto => OpcodeFlags::BRANCH.union(OpcodeFlags::GOTO),

            IfEq | IfNe | IfLt | IfGe | IfGt | IfLe | IfEqz | IfNez | IfLtz | IfGez | IfGtz
            | IfLez => OpcodeFlags::BRANCH.union(OpcodeFlags::CONDITIONAL),

            PackedSwitch | SparseSwitch => OpcodeFlags::BRANCH.union(OpcodeFlags::SWITCH),

            ReturnVoid | Return | ReturnObject => OpcodeFlags::RETURN,
            ReturnWide => OpcodeFlags::RETURN.union(OpcodeFlags::WIDE_SRCS),

            Throw => OpcodeFlags::THROW,

            DivInt | RemInt | Aget | Aput | Iget | Iput | Sget | Sput | MonitorEnter
            | MonitorExit => OpcodeFlags::MAY_THROW,
        }
    }

    /// Returns `true` if this opcode transfers control: goto, conditional
    /// branch or switch.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        self.flags().contains(OpcodeFlags::BRANCH)
    }

    /// Returns `true` for two-way conditional branches (`if-*`).
    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        self.flags().contains(OpcodeFlags::CONDITIONAL)
    }

    /// Returns `true` for `packed-switch` and `sparse-switch`.
    #[must_use]
    pub const fn is_switch(self) -> bool {
        self.flags().contains(OpcodeFlags::SWITCH)
    }

    /// Returns `true` for the unconditional `goto`.
    #[must_use]
    pub const fn is_goto(self) -> bool {
        self.flags().contains(OpcodeFlags::GOTO)
    }

    /// Returns `true` for `return-*`.
    #[must_use]
    pub const fn is_return(self) -> bool {
        self.flags().contains(OpcodeFlags::RETURN)
    }

    /// Returns `true` for the explicit `throw` opcode.
    #[must_use]
    pub const fn is_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::THROW)
    }

    /// Returns `true` if this opcode can raise an exception at runtime
    /// without being the explicit `throw`.
    ///
    /// Use `op.is_throw() || op.may_throw()` when asking whether a block
    /// containing this opcode needs throw edges.
    #[must_use]
    pub const fn may_throw(self) -> bool {
        self.flags().contains(OpcodeFlags::MAY_THROW)
    }

    /// Returns `true` for `move-result*` opcodes.
    #[must_use]
    pub const fn is_move_result(self) -> bool {
        self.flags().contains(OpcodeFlags::MOVE_RESULT)
    }

    /// Returns `true` for the internal `move-result-pseudo`.
    #[must_use]
    pub const fn is_move_result_pseudo(self) -> bool {
        self.flags().contains(OpcodeFlags::MOVE_RESULT_PSEUDO)
    }

    /// Returns `true` for either flavor of move-result.
    #[must_use]
    pub const fn is_any_move_result(self) -> bool {
        self.is_move_result() || self.is_move_result_pseudo()
    }

    /// Returns `true` for IR-internal opcodes that never reach emitted dex.
    #[must_use]
    pub const fn is_internal(self) -> bool {
        self.flags().contains(OpcodeFlags::INTERNAL)
    }

    /// Returns `true` for the `load-param*` family.
    #[must_use]
    pub const fn is_load_param(self) -> bool {
        matches!(
            self,
            Opcode::LoadParam | Opcode::LoadParamWide | Opcode::LoadParamObject
        )
    }

    /// Returns `true` if this opcode's value is consumed by a following
    /// `move-result*`.
    #[must_use]
    pub const fn has_move_result(self) -> bool {
        self.flags().contains(OpcodeFlags::HAS_MOVE_RESULT)
    }

    /// Returns `true` if this opcode's value is consumed by a following
    /// `move-result-pseudo`.
    #[must_use]
    pub const fn has_move_result_pseudo(self) -> bool {
        self.flags().contains(OpcodeFlags::HAS_MOVE_RESULT_PSEUDO)
    }

    /// Returns `true` if this opcode pairs with any flavor of move-result.
    #[must_use]
    pub const fn has_any_move_result(self) -> bool {
        self.has_move_result() || self.has_move_result_pseudo()
    }

    /// Returns `true` if the destination register is a wide pair.
    #[must_use]
    pub const fn dest_is_wide(self) -> bool {
        self.flags().contains(OpcodeFlags::WIDE_DEST)
    }

    /// Returns `true` if the source registers are wide pairs.
    #[must_use]
    pub const fn srcs_are_wide(self) -> bool {
        self.flags().contains(OpcodeFlags::WIDE_SRCS)
    }

    /// Returns the terminator category this opcode establishes when it is
    /// the last opcode of a block.
    #[must_use]
    pub const fn branchingness(self) -> Branchingness {
        let flags = self.flags();
        if flags.contains(OpcodeFlags::RETURN) {
            Branchingness::Return
        } else if flags.contains(OpcodeFlags::THROW) {
            Branchingness::Throw
        } else if flags.contains(OpcodeFlags::GOTO) {
            Branchingness::Goto
        } else if flags.contains(OpcodeFlags::CONDITIONAL) {
            Branchingness::If
        } else if flags.contains(OpcodeFlags::SWITCH) {
            Branchingness::Switch
        } else {
            Branchingness::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_classification() {
        assert!(Opcode::Goto.is_branch());
        assert!(Opcode::Goto.is_goto());
        assert!(!Opcode::Goto.is_conditional_branch());

        assert!(Opcode::IfEqz.is_branch());
        assert!(Opcode::IfEqz.is_conditional_branch());
        assert!(!Opcode::IfEqz.is_goto());

        assert!(Opcode::PackedSwitch.is_branch());
        assert!(Opcode::PackedSwitch.is_switch());
        assert!(Opcode::SparseSwitch.is_switch());

        assert!(!Opcode::Nop.is_branch());
        assert!(!Opcode::InvokeStatic.is_branch());
    }

    #[test]
    fn test_terminators() {
        assert!(Opcode::ReturnVoid.is_return());
        assert!(Opcode::ReturnWide.is_return());
        assert!(Opcode::Throw.is_throw());
        assert!(!Opcode::Throw.is_return());
        assert!(!Opcode::Throw.may_throw());
    }

    #[test]
    fn test_may_throw() {
        assert!(Opcode::InvokeVirtual.may_throw());
        assert!(Opcode::DivInt.may_throw());
        assert!(Opcode::Aget.may_throw());
        assert!(Opcode::ConstString.may_throw());
        assert!(Opcode::MonitorExit.may_throw());

        assert!(!Opcode::Move.may_throw());
        assert!(!Opcode::Const.may_throw());
        assert!(!Opcode::AddInt.may_throw());
        assert!(!Opcode::Goto.may_throw());
    }

    #[test]
    fn test_move_result_pairing() {
        assert!(Opcode::InvokeStatic.has_move_result());
        assert!(!Opcode::InvokeStatic.has_move_result_pseudo());

        assert!(Opcode::CheckCast.has_move_result_pseudo());
        assert!(Opcode::NewInstance.has_move_result_pseudo());
        assert!(!Opcode::CheckCast.has_move_result());

        assert!(Opcode::MoveResult.is_move_result());
        assert!(Opcode::MoveResultWide.is_move_result());
        assert!(Opcode::MoveResultPseudo.is_move_result_pseudo());
        assert!(!Opcode::MoveResultPseudo.is_move_result());
        assert!(Opcode::MoveResult.is_any_move_result());
        assert!(Opcode::MoveResultPseudo.is_any_move_result());
    }

    #[test]
    fn test_internal_opcodes() {
        assert!(Opcode::LoadParam.is_internal());
        assert!(Opcode::LoadParamWide.is_internal());
        assert!(Opcode::MoveResultPseudo.is_internal());
        assert!(Opcode::LoadParam.is_load_param());
        assert!(!Opcode::MoveResultPseudo.is_load_param());
        assert!(!Opcode::Nop.is_internal());
    }

    #[test]
    fn test_wideness() {
        assert!(Opcode::MoveWide.dest_is_wide());
        assert!(Opcode::MoveWide.srcs_are_wide());
        assert!(Opcode::ConstWide.dest_is_wide());
        assert!(!Opcode::ConstWide.srcs_are_wide());
        assert!(Opcode::ReturnWide.srcs_are_wide());
        assert!(Opcode::CmpLong.srcs_are_wide());
        assert!(!Opcode::CmpLong.dest_is_wide());
        assert!(!Opcode::Move.dest_is_wide());
    }

    #[test]
    fn test_branchingness() {
        assert_eq!(Opcode::Goto.branchingness(), Branchingness::Goto);
        assert_eq!(Opcode::IfLt.branchingness(), Branchingness::If);
        assert_eq!(Opcode::SparseSwitch.branchingness(), Branchingness::Switch);
        assert_eq!(Opcode::Return.branchingness(), Branchingness::Return);
        assert_eq!(Opcode::Throw.branchingness(), Branchingness::Throw);
        assert_eq!(Opcode::Nop.branchingness(), Branchingness::None);
        assert_eq!(Opcode::InvokeDirect.branchingness(), Branchingness::None);
    }
}
