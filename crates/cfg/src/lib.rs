//! Control-flow graph construction for the Beryl type checker.
//!
//! Given a desugared, name-resolved method body, [`build_for_method`]
//! produces a [`Cfg`] of basic blocks over a small three-address
//! instruction set, ready for dataflow type inference. Surface control
//! flow — loops, conditionals, `rescue`/`else`/`ensure`/`retry`,
//! `break`/`next`/`return`, and iterator blocks — all lower to the same
//! uniform block structure.

pub mod builder;
pub mod fmt;
pub mod ir;

pub use builder::{
    CfgBuilder, LowerCtx, LowerError, LowerResult, build_for_method, conditional_jump,
    jump_to_dead, unconditional_jump,
};
pub use ir::{
    BasicBlock, Binding, BlockExit, BlockId, BlockLink, Cfg, Instruction, MIN_LOOP_LET,
    SendAndBlockLink, SendInst,
};
