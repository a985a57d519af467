//! The CFG data model.
//!
//! A method body lowers to a [`Cfg`]: an arena of [`BasicBlock`]s addressed
//! by dense [`BlockId`]s. Each block owns an ordered list of [`Binding`]s
//! (destination local, location, instruction) and at most one [`BlockExit`]
//! terminator. Back edges are non-owning ids into the same arena, so the
//! graph may be cyclic without ownership knots.
//!
//! Instructions form a closed three-address set. They have no notion of
//! their own destination; the binding's `bind` local is the write target.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use beryl_core::{
    ArgFlags, CastKind, LiteralValue, Loc, LocalVariable, NameRef, SymbolRef, TypeRef,
};

/// Identifier for a basic block (dense index into `Cfg::blocks`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shared identity tying a call to its iterator body.
///
/// One allocation is shared (by [`Arc`]) between the call's `Send`, the
/// body's `LoadSelf`/`LoadYieldParams`/`BlockReturn`, and the trailing
/// `SolveConstraint`. Identity comparison is pointer equality.
#[derive(Debug)]
pub struct SendAndBlockLink {
    pub fun: NameRef,
    /// Shape flags for each declared block parameter, in order.
    pub arg_flags: Vec<ArgFlags>,
    /// Unique id of the iterator-block scope this link introduces.
    pub iter_block_id: u32,
}

pub type BlockLink = Arc<SendAndBlockLink>;

/// A dispatch call.
#[derive(Debug, Clone)]
pub struct SendInst {
    pub recv: LocalVariable,
    pub fun: NameRef,
    pub recv_loc: Loc,
    pub args: Vec<LocalVariable>,
    pub arg_locs: Vec<Loc>,
    pub is_private_ok: bool,
    pub link: Option<BlockLink>,
}

/// One three-address instruction. Immutable once inserted.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// A compile-time-known value.
    Literal(LiteralValue),
    /// Copy of another local.
    Ident(LocalVariable),
    /// The value of a global/constant slot.
    Alias(SymbolRef),
    Send(SendInst),
    /// After an iterator-block call completes, resolves generic constraints
    /// and selects the call's result.
    SolveConstraint {
        link: BlockLink,
        send_temp: LocalVariable,
    },
    /// In an iterator body, restores `self` as captured by the block.
    LoadSelf {
        link: BlockLink,
        fallback: LocalVariable,
    },
    /// In an iterator body, the tuple of yielded parameters.
    LoadYieldParams { link: BlockLink },
    /// Last value produced by an iterator body iteration.
    BlockReturn {
        link: BlockLink,
        value: LocalVariable,
    },
    /// Method return.
    Return { value: LocalVariable },
    Cast {
        value: LocalVariable,
        ty: TypeRef,
        kind: CastKind,
    },
    /// Exhaustiveness assertion.
    TAbsurd { value: LocalVariable },
    /// Opaque value; blocks type propagation. Used to model coarse
    /// exceptional joins.
    Unanalyzable,
}

/// An instruction bound to its destination local.
#[derive(Debug, Clone)]
pub struct Binding {
    pub bind: LocalVariable,
    pub loc: Loc,
    pub inst: Instruction,
    /// Set for instructions that do not correspond to user source.
    pub is_synthetic: bool,
}

/// Block terminator: branch on `cond`, or fall through when `cond` is the
/// absent local (then both successors are the same block).
#[derive(Debug, Clone)]
pub struct BlockExit {
    pub cond: LocalVariable,
    pub then_block: BlockId,
    pub else_block: BlockId,
    pub loc: Loc,
}

impl BlockExit {
    pub fn is_conditional(&self) -> bool {
        self.cond.exists()
    }
}

/// A straight-line instruction sequence with a single terminator.
#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Lexical loop depth the block sits at.
    pub loop_depth: u32,
    /// Innermost iterator-block scope the block belongs to; `0` is the
    /// method body itself.
    pub iter_block_id: u32,
    pub bindings: Vec<Binding>,
    /// Predecessors, one entry per incoming edge.
    pub back_edges: Vec<BlockId>,
    /// Set at most once; `None` only on the dead block.
    pub exit: Option<BlockExit>,
    /// Whether any edge targets this block.
    pub was_jump_destination: bool,
}

/// `min_loops` value flagging a local introduced by a `let` cast, which must
/// escape loop-level type widening. Real loop depths are non-negative.
pub const MIN_LOOP_LET: i32 = -1;

/// Control-flow graph of one lowered method.
#[derive(Debug)]
pub struct Cfg {
    /// The method this CFG was lowered from.
    pub method: SymbolRef,
    blocks: Vec<BasicBlock>,
    entry: BlockId,
    dead: BlockId,
    /// Highest iterator-block id allocated while lowering this method.
    pub max_iter_block_id: u32,
    /// Minimum loop depth at which each recorded local is treated as
    /// pinned. [`MIN_LOOP_LET`] flags `let`-introduced locals.
    pub min_loops: FxHashMap<LocalVariable, i32>,
}

impl Cfg {
    /// Creates a CFG with its entry block (depth 0, iterator id 0) and the
    /// unique dead block.
    pub fn new(method: SymbolRef) -> Self {
        let mut cfg = Self {
            method,
            blocks: Vec::new(),
            entry: BlockId(0),
            dead: BlockId(0),
            max_iter_block_id: 0,
            min_loops: FxHashMap::default(),
        };
        cfg.entry = cfg.fresh_block(0, 0);
        cfg.dead = cfg.fresh_block(0, 0);
        cfg
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The sentinel sink for control flow that does not continue.
    pub fn dead_block(&self) -> BlockId {
        self.dead
    }

    pub fn fresh_block(&mut self, loop_depth: u32, iter_block_id: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            loop_depth,
            iter_block_id,
            bindings: Vec::new(),
            back_edges: Vec::new(),
            exit: None,
            was_jump_destination: false,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Validates the structural invariants the rest of the checker relies
    /// on: the dead block is the only block without a terminator, and every
    /// edge is mirrored exactly once in its target's back-edge list.
    ///
    /// Panics on violation; meant for tests and debug assertions.
    pub fn sanity_check(&self) {
        for block in &self.blocks {
            if block.id == self.dead {
                assert!(
                    block.exit.is_none(),
                    "the dead block must not have a terminator"
                );
            } else {
                assert!(
                    block.exit.is_some(),
                    "block {:?} has no terminator",
                    block.id
                );
            }
        }

        let mut incoming: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for block in &self.blocks {
            let Some(exit) = &block.exit else { continue };
            incoming.entry(exit.then_block).or_default().push(block.id);
            if exit.is_conditional() {
                incoming.entry(exit.else_block).or_default().push(block.id);
            } else {
                assert_eq!(
                    exit.then_block, exit.else_block,
                    "unconditional exit of {:?} must name one successor twice",
                    block.id
                );
            }
        }
        for block in &self.blocks {
            let mut expected = incoming.remove(&block.id).unwrap_or_default();
            let mut actual = block.back_edges.clone();
            expected.sort_by_key(|id| id.0);
            actual.sort_by_key(|id| id.0);
            assert_eq!(
                expected, actual,
                "back edges of {:?} do not mirror incoming edges",
                block.id
            );
            if !block.back_edges.is_empty() && block.id != self.entry {
                assert!(
                    block.was_jump_destination,
                    "block {:?} has predecessors but was never flagged as a jump destination",
                    block.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cfg_has_entry_and_dead_blocks() {
        let cfg = Cfg::new(SymbolRef(0));
        assert_ne!(cfg.entry(), cfg.dead_block());
        assert_eq!(cfg.blocks().len(), 2);
        assert!(cfg.block(cfg.entry()).exit.is_none());
        assert!(cfg.block(cfg.dead_block()).exit.is_none());
    }

    #[test]
    fn fresh_blocks_record_depth_and_scope() {
        let mut cfg = Cfg::new(SymbolRef(0));
        let id = cfg.fresh_block(2, 1);
        assert_eq!(cfg.block(id).loop_depth, 2);
        assert_eq!(cfg.block(id).iter_block_id, 1);
        assert!(cfg.block(id).bindings.is_empty());
    }

    #[test]
    fn link_identity_is_pointer_equality() {
        let a: BlockLink = Arc::new(SendAndBlockLink {
            fun: NameRef::NONE,
            arg_flags: Vec::new(),
            iter_block_id: 1,
        });
        let b: BlockLink = Arc::new(SendAndBlockLink {
            fun: NameRef::NONE,
            arg_flags: Vec::new(),
            iter_block_id: 1,
        });
        assert!(Arc::ptr_eq(&a, &a.clone()));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
