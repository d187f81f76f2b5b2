//! Control flow edge types for the CFG.
//!
//! This module defines the edge representations used in the control flow graph,
//! providing semantic information about how control flows between basic blocks.

use std::fmt;

use crate::cfg::BlockId;
use crate::ir::TypeToken;

/// A strongly-typed identifier for edges within a control flow graph.
///
/// `EdgeId` wraps a `usize` index into the CFG's edge arena, providing type
/// safety to prevent accidental mixing of edge indices with other integer
/// values or block indices. Edge ids are assigned sequentially starting from
/// 0 and are never reused: removing an edge tombstones its arena slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub(crate) usize);

impl EdgeId {
    /// Creates a new `EdgeId` from a raw index value.
    ///
    /// This constructor is primarily intended for internal use and testing.
    /// Normal usage should obtain `EdgeId` values from the CFG's edge
    /// constructors.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        EdgeId(index)
    }

    /// Returns the raw index value of this edge identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The discriminant of an [`EdgeKind`], used for kind-filtered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeType {
    /// Unconditional transfer, including fallthrough.
    Goto,
    /// Taken branch of a conditional or one switch case.
    Branch,
    /// Potential transfer to an exception handler.
    Throw,
    /// Synthetic edge to the ghost exit block.
    Ghost,
}

/// The kind of control flow represented by an edge, with per-kind payload.
///
/// # Examples
///
/// ```rust
/// use dexflow::cfg::EdgeKind;
///
/// let kind = EdgeKind::Branch { case_key: Some(3) };
/// assert!(kind.is_branch());
/// assert_eq!(kind.case_key(), Some(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Unconditional control flow.
    ///
    /// In an editable CFG the goto opcode itself is absent; the edge fully
    /// encodes the transfer. Fallthrough between adjacent blocks is also a
    /// goto edge.
    Goto,

    /// The taken side of a conditional branch, or one switch case.
    ///
    /// `case_key` is present exactly when the source block ends in a switch;
    /// duplicate edges to one target carry distinct keys.
    Branch {
        /// The switch case key selecting this edge, absent for `if` branches.
        case_key: Option<i32>,
    },

    /// Potential transfer to an exception handler.
    ///
    /// Every block inside a try region that contains a may-throw opcode
    /// carries one throw edge per handler in the region's catch chain.
    Throw {
        /// The caught exception type, or `None` for a catch-all handler.
        catch_type: Option<TypeToken>,
        /// Position of this handler within the catch chain; lower is tried
        /// first.
        index: u32,
    },

    /// Synthetic edge connecting a real exit to the ghost exit block.
    Ghost,
}

impl EdgeKind {
    /// Returns the discriminant of this kind.
    #[must_use]
    pub const fn edge_type(&self) -> EdgeType {
        match self {
            EdgeKind::Goto => EdgeType::Goto,
            EdgeKind::Branch { .. } => EdgeType::Branch,
            EdgeKind::Throw { .. } => EdgeType::Throw,
            EdgeKind::Ghost => EdgeType::Ghost,
        }
    }

    /// Returns `true` for goto edges.
    #[must_use]
    pub const fn is_goto(&self) -> bool {
        matches!(self, EdgeKind::Goto)
    }

    /// Returns `true` for branch edges.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self, EdgeKind::Branch { .. })
    }

    /// Returns `true` for throw edges.
    #[must_use]
    pub const fn is_throw(&self) -> bool {
        matches!(self, EdgeKind::Throw { .. })
    }

    /// Returns `true` for ghost edges.
    #[must_use]
    pub const fn is_ghost(&self) -> bool {
        matches!(self, EdgeKind::Ghost)
    }

    /// Returns the switch case key, if this is a keyed branch edge.
    #[must_use]
    pub const fn case_key(&self) -> Option<i32> {
        match self {
            EdgeKind::Branch { case_key } => *case_key,
            _ => None,
        }
    }

    /// Returns the caught type, if this is a throw edge with a typed handler.
    #[must_use]
    pub const fn catch_type(&self) -> Option<TypeToken> {
        match self {
            EdgeKind::Throw { catch_type, .. } => *catch_type,
            _ => None,
        }
    }

    /// Returns the catch-chain index, if this is a throw edge.
    #[must_use]
    pub const fn throw_index(&self) -> Option<u32> {
        match self {
            EdgeKind::Throw { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Goto => write!(f, "goto"),
            EdgeKind::Branch { case_key: None } => write!(f, "branch"),
            EdgeKind::Branch {
                case_key: Some(key),
            } => write!(f, "branch {key}"),
            EdgeKind::Throw { .. } => write!(f, "throw"),
            EdgeKind::Ghost => write!(f, "ghost"),
        }
    }
}

/// A typed, directed edge between two blocks.
///
/// An edge appears in its source block's successor list and its target
/// block's predecessor list; the CFG's mutation API keeps the two sides
/// consistent. Edge identity (the [`EdgeId`]) is stable across retargeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub(crate) src: BlockId,
    pub(crate) target: BlockId,
    pub(crate) kind: EdgeKind,
}

impl Edge {
    /// Creates a new edge record.
    #[must_use]
    pub const fn new(src: BlockId, target: BlockId, kind: EdgeKind) -> Self {
        Edge { src, target, kind }
    }

    /// Returns the source block.
    #[must_use]
    #[inline]
    pub const fn src(&self) -> BlockId {
        self.src
    }

    /// Returns the target block.
    #[must_use]
    #[inline]
    pub const fn target(&self) -> BlockId {
        self.target
    }

    /// Returns the kind of control flow this edge represents.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> &EdgeKind {
        &self.kind
    }

    /// Returns the discriminant of this edge's kind.
    #[must_use]
    pub const fn edge_type(&self) -> EdgeType {
        self.kind.edge_type()
    }
}
