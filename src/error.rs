use thiserror::Error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The construction surface is the only place where recoverable errors exist: a control-flow
/// graph is built from externally supplied input (an instruction list produced by a dex
/// frontend), and that input can be empty or structurally malformed. Everything past
/// construction treats violations as fatal programming errors and panics with a diagnostic,
/// because a silently corrupt CFG would corrupt the emitted code of every pass downstream.
///
/// # Examples
///
/// ```rust
/// use dexflow::{ControlFlowGraph, Error, ir::ItemList};
///
/// match ControlFlowGraph::build(ItemList::new(), 0) {
///     Err(Error::Empty) => eprintln!("no instructions to build from"),
///     Err(Error::GraphError(message)) => eprintln!("malformed input: {message}"),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Provided input was empty.
    ///
    /// This error occurs when an empty instruction list is provided where
    /// actual method bytecode was expected. A method body always has at
    /// least one instruction.
    #[error("Provided input was empty")]
    Empty,

    /// The instruction list is structurally malformed.
    ///
    /// Errors related to wiring blocks together during construction, such as
    /// a branch instruction that terminates a block but has no recorded
    /// target markers anywhere in the list.
    #[error("{0}")]
    GraphError(String),
}

/// Convenience `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
