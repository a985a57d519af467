//! CFG construction.
//!
//! [`build_for_method`] seeds an entry block and a method-return target,
//! walks the resolved body (one case per AST variant), and attaches the
//! epilogue. The [`CfgBuilder`] is the per-method root owning everything
//! the walk shares: the growing [`Cfg`], the constant-alias map, the
//! undeclared-field cache, and the temporary counter. The value-copied
//! [`LowerCtx`] threads the rest (current target, loop depth,
//! control-transfer scopes) through the recursion.

use std::{error::Error, fmt};

use rustc_hash::FxHashMap;

use beryl_ast as ast;
use beryl_core::{
    ErrorCode, ErrorQueue, Loc, LocalVariable, NameRef, NameTable, SymbolRef, SymbolTable,
};

use crate::ir::{BlockExit, BlockId, BlockLink, Cfg};

mod walk;

/// Errors that abort lowering of the current method.
///
/// These are upstream contract violations, not user errors: an AST variant
/// survived that an earlier pass should have removed. User-source problems
/// go through the [`ErrorQueue`] instead and never abort.
#[derive(Debug)]
pub enum LowerError {
    /// A node kind that must not reach this phase.
    UnexpectedNode { loc: Loc, what: &'static str },
    /// An assignment target that is not a constant, field, local, or
    /// unresolved identifier.
    MalformedAssignTarget { loc: Loc },
}

impl LowerError {
    pub fn loc(&self) -> Loc {
        match self {
            LowerError::UnexpectedNode { loc, .. } => *loc,
            LowerError::MalformedAssignTarget { loc } => *loc,
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowerError::UnexpectedNode { what, .. } => {
                write!(f, "unexpected {what} survived to CFG construction")
            }
            LowerError::MalformedAssignTarget { .. } => {
                write!(f, "malformed assignment target survived to CFG construction")
            }
        }
    }
}

impl Error for LowerError {}

pub type LowerResult<T> = Result<T, LowerError>;

/// Sets `from`'s terminator to branch on `cond`.
///
/// No-op when `from` is the dead block. Panics if the terminator is
/// already set; each block is finalized exactly once.
pub fn conditional_jump(
    cfg: &mut Cfg,
    from: BlockId,
    cond: LocalVariable,
    then_block: BlockId,
    else_block: BlockId,
    loc: Loc,
) {
    assert!(cond.exists(), "conditional jump requires a condition local");
    cfg.block_mut(then_block).was_jump_destination = true;
    cfg.block_mut(else_block).was_jump_destination = true;
    if from == cfg.dead_block() {
        return;
    }
    let block = cfg.block_mut(from);
    assert!(
        block.exit.is_none(),
        "terminator for {from:?} already set"
    );
    block.exit = Some(BlockExit {
        cond,
        then_block,
        else_block,
        loc,
    });
    cfg.block_mut(then_block).back_edges.push(from);
    cfg.block_mut(else_block).back_edges.push(from);
}

/// Sets `from`'s terminator to fall through to `to`.
///
/// Both successor fields name `to`, which spares downstream traversals a
/// special case. No-op when `from` is the dead block.
pub fn unconditional_jump(cfg: &mut Cfg, from: BlockId, to: BlockId, loc: Loc) {
    cfg.block_mut(to).was_jump_destination = true;
    if from == cfg.dead_block() {
        return;
    }
    let block = cfg.block_mut(from);
    assert!(
        block.exit.is_none(),
        "terminator for {from:?} already set"
    );
    block.exit = Some(BlockExit {
        cond: LocalVariable::none(),
        then_block: to,
        else_block: to,
        loc,
    });
    cfg.block_mut(to).back_edges.push(from);
}

/// Terminates `from` into the CFG's dead block.
pub fn jump_to_dead(cfg: &mut Cfg, from: BlockId, loc: Loc) {
    let dead = cfg.dead_block();
    unconditional_jump(cfg, from, dead, loc);
}

/// Context threaded through the walk. Cheap to copy; the `with_*` builders
/// return a modified copy, so sibling walks never observe each other's
/// scope changes.
#[derive(Debug, Clone)]
pub struct LowerCtx {
    /// Local receiving the value of the expression being walked.
    pub target: LocalVariable,
    /// Current lexical loop depth.
    pub loops: u32,
    /// Innermost iterator-block scope id.
    pub iter_block_id: u32,
    /// Where `next` jumps; `None` outside loops and iterator bodies.
    pub next_scope: Option<BlockId>,
    /// Where `break` jumps; `None` outside loops and iterator bodies.
    pub break_scope: Option<BlockId>,
    /// Local a `break` value is assigned to.
    pub block_break_target: LocalVariable,
    /// Where `retry` jumps; `None` outside `begin`/`rescue`.
    pub rescue_scope: Option<BlockId>,
    /// Link of the innermost iterator-block call being lowered.
    pub link: Option<BlockLink>,
    /// Whether we are inside an iterator body (not merely inside a loop).
    pub is_inside_iter_block: bool,
}

impl LowerCtx {
    fn new(target: LocalVariable) -> Self {
        Self {
            target,
            loops: 0,
            iter_block_id: 0,
            next_scope: None,
            break_scope: None,
            block_break_target: LocalVariable::none(),
            rescue_scope: None,
            link: None,
            is_inside_iter_block: false,
        }
    }

    pub fn with_target(&self, target: LocalVariable) -> Self {
        let mut ret = self.clone();
        ret.target = target;
        ret
    }

    /// Enters a loop or iterator body: sets the `next`/`break` targets,
    /// bumps the loop depth, and records whether the scope is an iterator
    /// body (a plain loop resets that flag even when nested in one).
    pub fn with_loop_scope(
        &self,
        next_scope: BlockId,
        break_scope: BlockId,
        inside_iter_block: bool,
    ) -> Self {
        let mut ret = self.clone();
        ret.next_scope = Some(next_scope);
        ret.break_scope = Some(break_scope);
        ret.is_inside_iter_block = inside_iter_block;
        ret.loops += 1;
        ret
    }

    pub fn with_block_break_target(&self, target: LocalVariable) -> Self {
        let mut ret = self.clone();
        ret.block_break_target = target;
        ret
    }

    pub fn with_rescue_scope(&self, scope: BlockId) -> Self {
        let mut ret = self.clone();
        ret.rescue_scope = Some(scope);
        ret
    }

    pub fn with_link(&self, link: BlockLink) -> Self {
        let mut ret = self.clone();
        ret.link = Some(link);
        ret
    }

    pub fn with_iter_block_id(&self, iter_block_id: u32) -> Self {
        let mut ret = self.clone();
        ret.iter_block_id = iter_block_id;
        ret
    }
}

/// Per-method lowering root.
pub struct CfgBuilder<'a> {
    pub(crate) names: &'a NameTable,
    pub(crate) symbols: &'a SymbolTable,
    pub(crate) errors: &'a ErrorQueue,
    /// The method whose body is being lowered.
    pub(crate) method: SymbolRef,
    pub(crate) cfg: Cfg,
    /// Canonical method-local alias for each referenced global/constant.
    pub(crate) aliases: FxHashMap<SymbolRef, LocalVariable>,
    /// Temporaries standing in for fields that were used but never
    /// declared, so repeated uses unify after the first diagnostic.
    pub(crate) discovered_undeclared_fields: FxHashMap<NameRef, LocalVariable>,
    temporary_counter: u32,
}

impl<'a> CfgBuilder<'a> {
    fn new(
        names: &'a NameTable,
        symbols: &'a SymbolTable,
        errors: &'a ErrorQueue,
        method: SymbolRef,
    ) -> Self {
        Self {
            names,
            symbols,
            errors,
            method,
            cfg: Cfg::new(method),
            aliases: FxHashMap::default(),
            discovered_undeclared_fields: FxHashMap::default(),
            temporary_counter: 0,
        }
    }

    /// Allocates a fresh uniquely-numbered local.
    pub(crate) fn new_temporary(&mut self, name: NameRef) -> LocalVariable {
        self.temporary_counter += 1;
        LocalVariable::new(name, self.temporary_counter)
    }
}

/// Lowers a resolved method body into a CFG.
///
/// On success, every reachable block has its terminator set and the dead
/// block holds all `Return` sinks. User-source problems are enqueued into
/// `errors` and lowering continues; upstream contract violations enqueue an
/// `InternalError` and abort with `Err`, leaving other methods unaffected.
pub fn build_for_method(
    names: &NameTable,
    symbols: &SymbolTable,
    errors: &ErrorQueue,
    method: SymbolRef,
    body: &ast::Node,
) -> LowerResult<Cfg> {
    let mut builder = CfgBuilder::new(names, symbols, errors, method);
    let entry = builder.cfg.entry();
    let return_temp = builder.new_temporary(NameRef::METHOD_RETURN_TEMP);
    let cctx = LowerCtx::new(return_temp);

    let cont = match builder.walk(&cctx, body, entry) {
        Ok(cont) => cont,
        Err(err) => {
            tracing::error!(target: "cfg", %err, "abandoning method");
            if let Some(mut e) = errors.begin_error(err.loc(), ErrorCode::InternalError) {
                e.set_header(format!("Failed to build CFG: {err}"));
            }
            return Err(err);
        }
    };

    let final_temp = builder.new_temporary(NameRef::FINAL_RETURN);
    builder.emit(
        cont,
        final_temp,
        body.loc,
        crate::ir::Instruction::Return { value: return_temp },
    );
    jump_to_dead(&mut builder.cfg, cont, body.loc);

    tracing::debug!(
        target: "cfg",
        method = builder.names.resolve(builder.symbols.symbol(method).name),
        blocks = builder.cfg.blocks().len(),
        temporaries = builder.temporary_counter,
        "lowered method body"
    );
    Ok(builder.cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use beryl_core::FileId;

    fn loc() -> Loc {
        Loc::new(FileId(0), 0, 1)
    }

    #[test]
    fn unconditional_jump_names_one_successor_twice() {
        let mut cfg = Cfg::new(SymbolRef(0));
        let target = cfg.fresh_block(0, 0);
        let entry = cfg.entry();
        unconditional_jump(&mut cfg, entry, target, loc());

        let exit = cfg.block(cfg.entry()).exit.as_ref().unwrap();
        assert!(!exit.is_conditional());
        assert_eq!(exit.then_block, target);
        assert_eq!(exit.else_block, target);
        assert_eq!(cfg.block(target).back_edges, vec![cfg.entry()]);
        assert!(cfg.block(target).was_jump_destination);
    }

    #[test]
    fn conditional_jump_records_both_back_edges() {
        let mut cfg = Cfg::new(SymbolRef(0));
        let then_block = cfg.fresh_block(0, 0);
        let else_block = cfg.fresh_block(0, 0);
        let cond = LocalVariable::new(NameRef::IF_TEMP, 1);
        let entry = cfg.entry();
        conditional_jump(&mut cfg, entry, cond, then_block, else_block, loc());

        let exit = cfg.block(cfg.entry()).exit.as_ref().unwrap();
        assert!(exit.is_conditional());
        assert_eq!(cfg.block(then_block).back_edges, vec![cfg.entry()]);
        assert_eq!(cfg.block(else_block).back_edges, vec![cfg.entry()]);
    }

    #[test]
    fn jumps_from_the_dead_block_are_no_ops() {
        let mut cfg = Cfg::new(SymbolRef(0));
        let target = cfg.fresh_block(0, 0);
        let dead = cfg.dead_block();
        unconditional_jump(&mut cfg, dead, target, loc());

        assert!(cfg.block(dead).exit.is_none());
        assert!(cfg.block(target).back_edges.is_empty());
        // The destination flag is still raised for the attempted edge.
        assert!(cfg.block(target).was_jump_destination);
    }

    #[test]
    #[should_panic(expected = "already set")]
    fn setting_a_terminator_twice_is_a_bug() {
        let mut cfg = Cfg::new(SymbolRef(0));
        let target = cfg.fresh_block(0, 0);
        let entry = cfg.entry();
        unconditional_jump(&mut cfg, entry, target, loc());
        unconditional_jump(&mut cfg, entry, target, loc());
    }

    #[test]
    fn loop_scope_bumps_depth_and_resets_the_iterator_flag() {
        let ctx = LowerCtx::new(LocalVariable::new(NameRef::METHOD_RETURN_TEMP, 1));
        let header = BlockId(2);
        let cont = BlockId(3);
        let inner = ctx.with_loop_scope(header, cont, true);
        assert_eq!(inner.loops, 1);
        assert!(inner.is_inside_iter_block);
        let nested = inner.with_loop_scope(header, cont, false);
        assert_eq!(nested.loops, 2);
        assert!(!nested.is_inside_iter_block);
    }
}
