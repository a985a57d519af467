//! Human-readable CFG dumps, for debugging and test failure output.

use std::fmt::Write;

use beryl_core::{NameTable, SymbolTable};

use crate::ir::{Cfg, Instruction};

impl Cfg {
    /// Renders the graph block by block.
    pub fn show(&self, names: &NameTable, symbols: &SymbolTable) -> String {
        let mut out = String::new();
        for block in self.blocks() {
            let marker = if block.id == self.entry() {
                " (entry)"
            } else if block.id == self.dead_block() {
                " (dead)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "bb{}{} depth={} iter={}:",
                block.id.0, marker, block.loop_depth, block.iter_block_id
            );
            for binding in &block.bindings {
                let synth = if binding.is_synthetic { " (synthetic)" } else { "" };
                let _ = writeln!(
                    out,
                    "    {} = {}{}",
                    binding.bind.show(names),
                    show_instruction(&binding.inst, names, symbols),
                    synth
                );
            }
            match &block.exit {
                Some(exit) if exit.is_conditional() => {
                    let _ = writeln!(
                        out,
                        "    branch {} ? bb{} : bb{}",
                        exit.cond.show(names),
                        exit.then_block.0,
                        exit.else_block.0
                    );
                }
                Some(exit) => {
                    let _ = writeln!(out, "    goto bb{}", exit.then_block.0);
                }
                None => {
                    let _ = writeln!(out, "    <no terminator>");
                }
            }
        }
        out
    }
}

fn show_instruction(inst: &Instruction, names: &NameTable, symbols: &SymbolTable) -> String {
    match inst {
        Instruction::Literal(value) => format!("literal {value:?}"),
        Instruction::Ident(var) => var.show(names),
        Instruction::Alias(sym) => {
            format!("alias {}", names.resolve(symbols.symbol(*sym).name))
        }
        Instruction::Send(send) => {
            let args: Vec<String> = send.args.iter().map(|arg| arg.show(names)).collect();
            let block = if send.link.is_some() { " {…}" } else { "" };
            format!(
                "{}.{}({}){}",
                send.recv.show(names),
                names.resolve(send.fun),
                args.join(", "),
                block
            )
        }
        Instruction::SolveConstraint { send_temp, .. } => {
            format!("solve_constraint {}", send_temp.show(names))
        }
        Instruction::LoadSelf { fallback, .. } => {
            format!("load_self {}", fallback.show(names))
        }
        Instruction::LoadYieldParams { .. } => "load_yield_params".to_string(),
        Instruction::BlockReturn { value, .. } => {
            format!("block_return {}", value.show(names))
        }
        Instruction::Return { value } => format!("return {}", value.show(names)),
        Instruction::Cast { value, kind, .. } => {
            format!("cast({kind:?}) {}", value.show(names))
        }
        Instruction::TAbsurd { value } => format!("absurd {}", value.show(names)),
        Instruction::Unanalyzable => "unanalyzable".to_string(),
    }
}
