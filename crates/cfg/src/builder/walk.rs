//! The lowering walk: one case per AST variant.
//!
//! `walk(cctx, node, current)` evaluates `node` starting in `current`,
//! stores the result into `cctx.target`, and returns the block where
//! subsequent statements continue. Returning the dead block means control
//! does not locally continue (after `return`, `break`, `next`, `retry`).
//!
//! The walker never duplicates any part of the tree: every node is walked
//! exactly once, so downstream type checking stays linear in the source.

use beryl_ast::{self as ast, Expr, IdentKind};
use beryl_core::{CastKind, ErrorCode, LiteralValue, Loc, LocalVariable, NameRef, SymbolRef};

use super::{CfgBuilder, LowerCtx, LowerError, LowerResult, conditional_jump, jump_to_dead,
            unconditional_jump};
use crate::ir::{BlockId, BlockLink, Instruction, MIN_LOOP_LET, SendAndBlockLink, SendInst};

impl CfgBuilder<'_> {
    pub(crate) fn emit(
        &mut self,
        block: BlockId,
        bind: LocalVariable,
        loc: Loc,
        inst: Instruction,
    ) {
        self.cfg.block_mut(block).bindings.push(crate::ir::Binding {
            bind,
            loc,
            inst,
            is_synthetic: false,
        });
    }

    /// Emits an instruction that does not correspond to user source.
    fn synthesize(&mut self, block: BlockId, bind: LocalVariable, loc: Loc, inst: Instruction) {
        self.cfg.block_mut(block).bindings.push(crate::ir::Binding {
            bind,
            loc,
            inst,
            is_synthetic: true,
        });
    }

    /// The canonical method-local alias for a global/constant slot,
    /// allocated on first use.
    fn global_to_local(&mut self, sym: SymbolRef) -> LocalVariable {
        if let Some(&alias) = self.aliases.get(&sym) {
            return alias;
        }
        let alias = self.new_temporary(self.symbols.symbol(sym).name);
        self.aliases.insert(sym, alias);
        alias
    }

    /// Resolves an instance/class variable against the enclosing class.
    ///
    /// Undeclared variables are reported once and bound to a cached
    /// temporary so later uses unify with the first.
    fn unresolved_ident_to_local(
        &mut self,
        loc: Loc,
        kind: IdentKind,
        name: NameRef,
    ) -> LocalVariable {
        let klass = match kind {
            IdentKind::Class => {
                let mut klass = self.symbols.enclosing_class(self.method);
                while let Some(attached) = self.symbols.attached_class(klass) {
                    klass = attached;
                }
                klass
            }
            IdentKind::Instance => {
                assert!(self.symbols.symbol(self.method).is_method());
                self.symbols.symbol(self.method).owner
            }
        };
        assert!(self.symbols.symbol(klass).is_class_or_module());

        match self.symbols.find_member_transitive(klass, name) {
            Some(sym) => self.global_to_local(sym),
            None => {
                if let Some(&cached) = self.discovered_undeclared_fields.get(&name) {
                    return cached;
                }
                if let Some(mut e) = self.errors.begin_error(loc, ErrorCode::UndeclaredVariable) {
                    e.set_header(format!(
                        "Use of undeclared variable `{}`",
                        self.names.resolve(name)
                    ));
                }
                let ret = self.new_temporary(name);
                self.discovered_undeclared_fields.insert(name, ret);
                ret
            }
        }
    }

    /// Lowers `node` into `current`, storing its value in `cctx.target`.
    /// Returns the continuation block.
    pub(crate) fn walk(
        &mut self,
        cctx: &LowerCtx,
        node: &ast::Node,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        let dead = self.cfg.dead_block();
        assert!(
            self.cfg.block(current).exit.is_none() || current == dead,
            "current block has already been finalized"
        );

        match &node.expr {
            Expr::EmptyTree => Ok(current),

            Expr::Literal(value) => {
                self.emit(current, cctx.target, node.loc, Instruction::Literal(value.clone()));
                Ok(current)
            }

            Expr::Local(var) => {
                self.emit(current, cctx.target, node.loc, Instruction::Ident(*var));
                Ok(current)
            }

            Expr::UnresolvedIdent { kind, name } => {
                let local = self.unresolved_ident_to_local(node.loc, *kind, *name);
                self.emit(current, cctx.target, node.loc, Instruction::Ident(local));
                Ok(current)
            }

            Expr::Field(symbol) => {
                let local = self.global_to_local(*symbol);
                self.emit(current, cctx.target, node.loc, Instruction::Ident(local));
                Ok(current)
            }

            Expr::ConstantLit {
                symbol,
                original_scope,
            } => {
                // Constants the resolver stubbed out degrade to untyped.
                let aliased = if *symbol == self.symbols.stub_module {
                    self.symbols.untyped
                } else {
                    *symbol
                };
                self.emit(current, cctx.target, node.loc, Instruction::Alias(aliased));

                let mut current = current;
                if let Some(scope) = original_scope {
                    if matches!(scope.expr, Expr::ConstantLit { .. }) {
                        // Keep the scope expression alive for IDE queries.
                        let scope_temp = self.new_temporary(NameRef::KEEP_FOR_IDE);
                        current = self.walk(&cctx.with_target(scope_temp), scope, current)?;
                    }
                }
                Ok(current)
            }

            Expr::Assign { lhs, rhs } => {
                let lhs_local = match &lhs.expr {
                    Expr::ConstantLit { symbol, .. } => self.global_to_local(*symbol),
                    Expr::Field(symbol) => self.global_to_local(*symbol),
                    Expr::Local(var) => *var,
                    Expr::UnresolvedIdent { kind, name } => {
                        self.unresolved_ident_to_local(lhs.loc, *kind, *name)
                    }
                    _ => return Err(LowerError::MalformedAssignTarget { loc: lhs.loc }),
                };
                let cont = self.walk(&cctx.with_target(lhs_local), rhs, current)?;
                // The assignment expression itself has the assigned value.
                self.emit(cont, cctx.target, node.loc, Instruction::Ident(lhs_local));
                Ok(cont)
            }

            Expr::InsSeq { stats, expr } => {
                let mut current = current;
                for stat in stats {
                    let temp = self.new_temporary(NameRef::STAT_TEMP);
                    current = self.walk(&cctx.with_target(temp), stat, current)?;
                }
                self.walk(cctx, expr, current)
            }

            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => self.walk_if(cctx, node.loc, cond, then_branch, else_branch, current),

            Expr::While { cond, body } => self.walk_while(cctx, node.loc, cond, body, current),

            Expr::Return { expr } => {
                let return_temp = self.new_temporary(NameRef::RETURN_TEMP);
                let cont = self.walk(&cctx.with_target(return_temp), expr, current)?;
                // Dead assign; nothing reads the target past a return.
                self.emit(
                    cont,
                    cctx.target,
                    node.loc,
                    Instruction::Return { value: return_temp },
                );
                jump_to_dead(&mut self.cfg, cont, node.loc);
                Ok(self.cfg.dead_block())
            }

            Expr::Next { expr } => {
                let expr_temp = self.new_temporary(NameRef::NEXT_TEMP);
                let after_next = self.walk(&cctx.with_target(expr_temp), expr, current)?;
                let dead = self.cfg.dead_block();
                if after_next != dead && cctx.is_inside_iter_block {
                    let link = cctx
                        .link
                        .clone()
                        .expect("iterator body context must carry a link");
                    let dead_temp = self.new_temporary(NameRef::NEXT_TEMP);
                    self.synthesize(
                        after_next,
                        dead_temp,
                        node.loc,
                        Instruction::BlockReturn {
                            link,
                            value: expr_temp,
                        },
                    );
                }
                match cctx.next_scope {
                    Some(scope) => unconditional_jump(&mut self.cfg, after_next, scope, node.loc),
                    None => {
                        if let Some(mut e) =
                            self.errors.begin_error(node.loc, ErrorCode::NoNextScope)
                        {
                            e.set_header("No `do` block around `next`");
                        }
                        // Keep walking into dead code.
                        jump_to_dead(&mut self.cfg, after_next, node.loc);
                    }
                }
                Ok(dead)
            }

            Expr::Break { expr } => {
                let expr_temp = self.new_temporary(NameRef::RETURN_TEMP);
                let after_break = self.walk(&cctx.with_target(expr_temp), expr, current)?;

                // Break values reach the outer target through an
                // intermediate named `<blockBreakAssign>`; the pinned-
                // variable analysis keys on that name to accept the write
                // at a lower loop depth.
                let break_assign = self.new_temporary(NameRef::BLOCK_BREAK_ASSIGN);
                self.emit(after_break, break_assign, node.loc, Instruction::Ident(expr_temp));
                self.emit(
                    after_break,
                    cctx.block_break_target,
                    node.loc,
                    Instruction::Ident(break_assign),
                );

                match cctx.break_scope {
                    Some(scope) => unconditional_jump(&mut self.cfg, after_break, scope, node.loc),
                    None => {
                        if let Some(mut e) =
                            self.errors.begin_error(node.loc, ErrorCode::NoNextScope)
                        {
                            e.set_header("No `do` block around `break`");
                        }
                        jump_to_dead(&mut self.cfg, after_break, node.loc);
                    }
                }
                Ok(self.cfg.dead_block())
            }

            Expr::Retry => {
                match cctx.rescue_scope {
                    Some(scope) => unconditional_jump(&mut self.cfg, current, scope, node.loc),
                    None => {
                        if let Some(mut e) =
                            self.errors.begin_error(node.loc, ErrorCode::NoNextScope)
                        {
                            e.set_header("No `begin` block around `retry`");
                        }
                        jump_to_dead(&mut self.cfg, current, node.loc);
                    }
                }
                Ok(self.cfg.dead_block())
            }

            Expr::Rescue(rescue) => self.walk_rescue(cctx, node.loc, rescue, current),

            Expr::Send(send) => self.walk_send(cctx, node.loc, send, current),

            Expr::Array { elems } => {
                let mut current = current;
                let mut vars = Vec::with_capacity(elems.len());
                let mut locs = Vec::with_capacity(elems.len());
                for elem in elems {
                    let temp = self.new_temporary(NameRef::ARRAY_TEMP);
                    current = self.walk(&cctx.with_target(temp), elem, current)?;
                    vars.push(temp);
                    locs.push(node.loc);
                }
                let magic = self.new_temporary(NameRef::MAGIC);
                self.synthesize(current, magic, Loc::none(), Instruction::Alias(self.symbols.magic));
                self.emit(
                    current,
                    cctx.target,
                    node.loc,
                    Instruction::Send(SendInst {
                        recv: magic,
                        fun: NameRef::BUILD_ARRAY,
                        recv_loc: node.loc,
                        args: vars,
                        arg_locs: locs,
                        is_private_ok: false,
                        link: None,
                    }),
                );
                Ok(current)
            }

            Expr::Hash { keys, values } => {
                let mut current = current;
                let mut vars = Vec::with_capacity(keys.len() * 2);
                let mut locs = Vec::with_capacity(keys.len() * 2);
                for (key, value) in keys.iter().zip(values) {
                    let key_temp = self.new_temporary(NameRef::HASH_TEMP);
                    let value_temp = self.new_temporary(NameRef::HASH_TEMP);
                    current = self.walk(&cctx.with_target(key_temp), key, current)?;
                    current = self.walk(&cctx.with_target(value_temp), value, current)?;
                    vars.push(key_temp);
                    vars.push(value_temp);
                    locs.push(key.loc);
                    locs.push(value.loc);
                }
                let magic = self.new_temporary(NameRef::MAGIC);
                self.synthesize(current, magic, Loc::none(), Instruction::Alias(self.symbols.magic));
                self.emit(
                    current,
                    cctx.target,
                    node.loc,
                    Instruction::Send(SendInst {
                        recv: magic,
                        fun: NameRef::BUILD_HASH,
                        recv_loc: node.loc,
                        args: vars,
                        arg_locs: locs,
                        is_private_ok: false,
                        link: None,
                    }),
                );
                Ok(current)
            }

            Expr::Cast { arg, ty, kind } => {
                let temp = self.new_temporary(NameRef::CAST_TEMP);
                let current = self.walk(&cctx.with_target(temp), arg, current)?;
                self.emit(
                    current,
                    cctx.target,
                    node.loc,
                    Instruction::Cast {
                        value: temp,
                        ty: ty.clone(),
                        kind: *kind,
                    },
                );
                if *kind == CastKind::Let {
                    self.cfg.min_loops.insert(cctx.target, MIN_LOOP_LET);
                }
                Ok(current)
            }

            Expr::UnresolvedConstantLit { .. } => Err(LowerError::UnexpectedNode {
                loc: node.loc,
                what: "unresolved constant (namer/resolver should have eliminated it)",
            }),
            Expr::Block(_) => Err(LowerError::UnexpectedNode {
                loc: node.loc,
                what: "bare iterator block",
            }),
            Expr::ClassDef { .. } => Err(LowerError::UnexpectedNode {
                loc: node.loc,
                what: "class definition (flatten pass should have removed it)",
            }),
            Expr::MethodDef { .. } => Err(LowerError::UnexpectedNode {
                loc: node.loc,
                what: "method definition (flatten pass should have removed it)",
            }),
        }
    }

    fn walk_if(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        cond: &ast::Node,
        then_branch: &ast::Node,
        else_branch: &ast::Node,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        let if_temp = self.new_temporary(NameRef::IF_TEMP);
        let cont = self.walk(&cctx.with_target(if_temp), cond, current)?;
        let then_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let else_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        conditional_jump(&mut self.cfg, cont, if_temp, then_block, else_block, cond.loc);

        let then_end = self.walk(cctx, then_branch, then_block)?;
        let else_end = self.walk(cctx, else_branch, else_block)?;
        let dead = self.cfg.dead_block();
        if then_end == dead && else_end == dead {
            return Ok(dead);
        }
        if then_end == dead {
            Ok(else_end)
        } else if else_end == dead {
            Ok(then_end)
        } else {
            let join = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
            unconditional_jump(&mut self.cfg, then_end, join, loc);
            unconditional_jump(&mut self.cfg, else_end, join, loc);
            Ok(join)
        }
    }

    fn walk_while(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        cond: &ast::Node,
        body: &ast::Node,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        let header = self.cfg.fresh_block(cctx.loops + 1, cctx.iter_block_id);
        // Entered only when the body never breaks out of the loop.
        let break_not_called = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let continue_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        unconditional_jump(&mut self.cfg, current, header, loc);

        let cond_temp = self.new_temporary(NameRef::WHILE_TEMP);
        let header_end = self.walk(
            &cctx
                .with_target(cond_temp)
                .with_loop_scope(header, continue_block, false),
            cond,
            header,
        )?;
        let body_block = self.cfg.fresh_block(cctx.loops + 1, cctx.iter_block_id);
        conditional_jump(
            &mut self.cfg,
            header_end,
            cond_temp,
            body_block,
            break_not_called,
            cond.loc,
        );

        let body_temp = self.new_temporary(NameRef::STAT_TEMP);
        let body_end = self.walk(
            &cctx
                .with_target(body_temp)
                .with_loop_scope(header, continue_block, false)
                .with_block_break_target(cctx.target),
            body,
            body_block,
        )?;
        unconditional_jump(&mut self.cfg, body_end, header, loc);

        // A loop that falls out normally evaluates to nil.
        self.synthesize(
            break_not_called,
            cctx.target,
            loc,
            Instruction::Literal(LiteralValue::Nil),
        );
        unconditional_jump(&mut self.cfg, break_not_called, continue_block, loc);
        Ok(continue_block)
    }

    fn walk_send(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        send: &ast::Send,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        if send.fun == NameRef::ABSURD {
            if let Expr::ConstantLit { symbol, .. } = &send.recv.expr {
                if *symbol == self.symbols.t_module {
                    return self.walk_absurd(cctx, loc, send, current);
                }
            }
        }

        let mut current = current;
        let recv = self.new_temporary(NameRef::STAT_TEMP);
        current = self.walk(&cctx.with_target(recv), &send.recv, current)?;

        let mut args = Vec::with_capacity(send.args.len());
        let mut arg_locs = Vec::with_capacity(send.args.len());
        for arg in &send.args {
            let temp = self.new_temporary(NameRef::STAT_TEMP);
            current = self.walk(&cctx.with_target(temp), arg, current)?;
            args.push(temp);
            arg_locs.push(arg.loc);
        }

        let Some(block) = &send.block else {
            self.emit(
                current,
                cctx.target,
                loc,
                Instruction::Send(SendInst {
                    recv,
                    fun: send.fun,
                    recv_loc: send.recv.loc,
                    args,
                    arg_locs,
                    is_private_ok: send.is_private_ok,
                    link: None,
                }),
            );
            return Ok(current);
        };

        self.walk_send_with_block(cctx, loc, send, block, recv, args, arg_locs, current)
    }

    /// Lowers a call carrying an iterator block.
    ///
    /// The block shape matches the while loop, except that the header
    /// branches on the reserved `<blockCall>` local ("did the iterator
    /// yield another element?") rather than a user condition, and the body
    /// side starts by reloading `self` and the yielded parameter tuple.
    #[allow(clippy::too_many_arguments)]
    fn walk_send_with_block(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        send: &ast::Send,
        block: &ast::IterBlock,
        recv: LocalVariable,
        args: Vec<LocalVariable>,
        arg_locs: Vec<Loc>,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        self.cfg.max_iter_block_id += 1;
        let new_iter_block_id = self.cfg.max_iter_block_id;

        let arg_flags = block.params.iter().map(ast::BlockParam::flags).collect();
        let link: BlockLink = std::sync::Arc::new(SendAndBlockLink {
            fun: send.fun,
            arg_flags,
            iter_block_id: new_iter_block_id,
        });

        let send_temp = self.new_temporary(NameRef::BLOCK_PRE_CALL_TEMP);
        self.emit(
            current,
            send_temp,
            loc,
            Instruction::Send(SendInst {
                recv,
                fun: send.fun,
                recv_loc: send.recv.loc,
                args,
                arg_locs,
                is_private_ok: send.is_private_ok,
                link: Some(link.clone()),
            }),
        );
        // Stash the outer self; the body rebinds it.
        let restore_self = self.new_temporary(NameRef::SELF_RESTORE);
        self.synthesize(
            current,
            restore_self,
            Loc::none(),
            Instruction::Ident(LocalVariable::self_var()),
        );

        let header = self.cfg.fresh_block(cctx.loops + 1, new_iter_block_id);
        // Entered only when the body never breaks out of the iteration.
        let solve_constraint_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let post_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let body_block = self.cfg.fresh_block(cctx.loops + 1, new_iter_block_id);

        let arg_temp = self.new_temporary(NameRef::BLK_ARG);
        let idx_temp = self.new_temporary(NameRef::BLK_ARG);
        self.emit(
            body_block,
            LocalVariable::self_var(),
            loc,
            Instruction::LoadSelf {
                link: link.clone(),
                fallback: LocalVariable::self_var(),
            },
        );
        self.emit(
            body_block,
            arg_temp,
            block.loc,
            Instruction::LoadYieldParams { link: link.clone() },
        );

        for (i, param) in block.params.iter().enumerate() {
            if param.repeated {
                if i != 0 {
                    // Mixing positional and rest parameters in a block is
                    // not supported; bind an untyped alias instead.
                    self.emit(
                        body_block,
                        param.local,
                        param.loc,
                        Instruction::Alias(self.symbols.untyped),
                    );
                } else {
                    self.emit(body_block, param.local, param.loc, Instruction::Ident(arg_temp));
                }
                continue;
            }

            // Parameter extraction does not map to source text; the
            // zero-length loc hides it from IDE queries.
            let zero_loc = param.loc.with_zero_length();
            self.emit(
                body_block,
                idx_temp,
                zero_loc,
                Instruction::Literal(LiteralValue::int(i as i64)),
            );
            self.emit(
                body_block,
                param.local,
                param.loc,
                Instruction::Send(SendInst {
                    recv: arg_temp,
                    fun: NameRef::SQUARE_BRACKETS,
                    recv_loc: block.loc,
                    args: vec![idx_temp],
                    arg_locs: vec![zero_loc],
                    is_private_ok: false,
                    link: None,
                }),
            );
        }

        conditional_jump(
            &mut self.cfg,
            header,
            LocalVariable::block_call(),
            body_block,
            solve_constraint_block,
            loc,
        );
        unconditional_jump(&mut self.cfg, current, header, loc);

        let block_return_temp = self.new_temporary(NameRef::BLOCK_RETURN_TEMP);
        let body_ctx = cctx
            .with_target(block_return_temp)
            .with_block_break_target(cctx.target)
            .with_loop_scope(header, post_block, true)
            .with_link(link.clone())
            .with_iter_block_id(new_iter_block_id);
        let block_last = self.walk(&body_ctx, &block.body, body_block)?;
        if block_last != self.cfg.dead_block() {
            let dead_temp = self.new_temporary(NameRef::BLOCK_RETURN_TEMP);
            self.synthesize(
                block_last,
                dead_temp,
                block.loc,
                Instruction::BlockReturn {
                    link: link.clone(),
                    value: block_return_temp,
                },
            );
        }
        unconditional_jump(&mut self.cfg, block_last, header, loc);
        unconditional_jump(&mut self.cfg, solve_constraint_block, post_block, loc);

        self.emit(
            solve_constraint_block,
            cctx.target,
            loc,
            Instruction::SolveConstraint { link, send_temp },
        );

        // Reinstate the outer self past the block.
        self.synthesize(
            post_block,
            LocalVariable::self_var(),
            loc,
            Instruction::Ident(restore_self),
        );
        Ok(post_block)
    }

    /// `T.absurd(arg)`: exhaustiveness assertion over a variable.
    fn walk_absurd(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        send: &ast::Send,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        if send.args.len() != 1 {
            if let Some(mut e) = self.errors.begin_error(loc, ErrorCode::MalformedTAbsurd) {
                e.set_header(format!(
                    "`T.absurd` expects exactly one argument but got `{}`",
                    send.args.len()
                ));
            }
            return Ok(current);
        }
        if matches!(send.args[0].expr, Expr::Send(_)) {
            // Passing a call is the most common way `T.absurd` is misused.
            if let Some(mut e) = self.errors.begin_error(loc, ErrorCode::MalformedTAbsurd) {
                e.set_header("`T.absurd` expects to be called on a variable, not a method call");
            }
            return Ok(current);
        }

        let temp = self.new_temporary(NameRef::STAT_TEMP);
        let current = self.walk(&cctx.with_target(temp), &send.args[0], current)?;
        self.emit(current, cctx.target, loc, Instruction::TAbsurd { value: temp });
        Ok(current)
    }

    /// `begin … rescue … else … ensure … end`.
    ///
    /// Exception flow is modeled coarsely: the body either runs completely
    /// or not at all. Two opaque `Unanalyzable` conditions (one before the
    /// body, one after the `else`) can divert into the handlers; nothing
    /// models a throw in the middle of a statement.
    fn walk_rescue(
        &mut self,
        cctx: &LowerCtx,
        loc: Loc,
        rescue: &ast::Rescue,
        current: BlockId,
    ) -> LowerResult<BlockId> {
        let rescue_start = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        unconditional_jump(&mut self.cfg, current, rescue_start, loc);
        let cctx = cctx.with_rescue_scope(rescue_start);

        let rescue_handlers = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let body_block = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let rescue_start_temp = self.new_temporary(NameRef::RESCUE_START_TEMP);
        self.synthesize(rescue_start, rescue_start_temp, loc, Instruction::Unanalyzable);
        conditional_jump(
            &mut self.cfg,
            rescue_start,
            rescue_start_temp,
            rescue_handlers,
            body_block,
            loc,
        );

        let body_end = self.walk(&cctx, &rescue.body, body_block)?;
        let else_body = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        unconditional_jump(&mut self.cfg, body_end, else_body, loc);

        let else_end = self.walk(&cctx, &rescue.else_branch, else_body)?;
        let ensure_body = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);

        let should_ensure = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        unconditional_jump(&mut self.cfg, else_end, should_ensure, loc);
        let rescue_end_temp = self.new_temporary(NameRef::RESCUE_END_TEMP);
        self.synthesize(should_ensure, rescue_end_temp, loc, Instruction::Unanalyzable);
        conditional_jump(
            &mut self.cfg,
            should_ensure,
            rescue_end_temp,
            rescue_handlers,
            ensure_body,
            loc,
        );

        let mut rescue_handlers = rescue_handlers;
        for case in &rescue.cases {
            let case_body = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
            let Expr::Local(exn_local) = &case.var.expr else {
                return Err(LowerError::UnexpectedNode {
                    loc: case.var.loc,
                    what: "rescue binder that is not a local",
                });
            };
            let exn_local = *exn_local;
            self.emit(rescue_handlers, exn_local, case.var.loc, Instruction::Unanalyzable);

            // A bare `rescue` catches the standard error class.
            let default_exception;
            let exceptions: Vec<&ast::Node> = if case.exceptions.is_empty() {
                default_exception =
                    ast::Node::constant(case.var.loc, self.symbols.standard_error);
                vec![&default_exception]
            } else {
                case.exceptions.iter().collect()
            };

            for exception in exceptions {
                let exn_loc = exception.loc;
                let class_temp = self.new_temporary(NameRef::EXCEPTION_CLASS_TEMP);
                rescue_handlers =
                    self.walk(&cctx.with_target(class_temp), exception, rescue_handlers)?;

                let isa_temp = self.new_temporary(NameRef::ISA_CHECK_TEMP);
                self.emit(
                    rescue_handlers,
                    isa_temp,
                    exn_loc,
                    Instruction::Send(SendInst {
                        recv: exn_local,
                        fun: NameRef::IS_A_P,
                        recv_loc: exn_loc,
                        args: vec![class_temp],
                        arg_locs: vec![exn_loc],
                        is_private_ok: false,
                        link: None,
                    }),
                );

                let other_handler = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
                conditional_jump(
                    &mut self.cfg,
                    rescue_handlers,
                    isa_temp,
                    case_body,
                    other_handler,
                    exn_loc,
                );
                rescue_handlers = other_handler;
            }

            let case_end = self.walk(&cctx, &case.body, case_body)?;
            unconditional_jump(&mut self.cfg, case_end, ensure_body, loc);
        }

        // No handler matched: after the ensure runs, the exception keeps
        // propagating, so this path must flow to dead. On normal paths the
        // flag is conceptually false, but the surrounding Unanalyzable
        // conditions keep inference from assuming a concrete value.
        let goto_dead_temp = self.new_temporary(NameRef::GOTO_DEAD_TEMP);
        self.synthesize(
            rescue_handlers,
            goto_dead_temp,
            loc,
            Instruction::Literal(LiteralValue::Bool(true)),
        );
        unconditional_jump(&mut self.cfg, rescue_handlers, ensure_body, loc);

        let throw_away = self.new_temporary(NameRef::THROW_AWAY_TEMP);
        let ensure_end = self.walk(&cctx.with_target(throw_away), &rescue.ensure, ensure_body)?;
        let ret = self.cfg.fresh_block(cctx.loops, cctx.iter_block_id);
        let dead = self.cfg.dead_block();
        conditional_jump(&mut self.cfg, ensure_end, goto_dead_temp, dead, ret, loc);
        Ok(ret)
    }
}
