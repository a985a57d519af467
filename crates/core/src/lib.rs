//! Shared vocabulary for the Beryl type checker.
//!
//! This crate holds the leaf types every phase speaks: source locations, the
//! name interner, local variables, literal constants, the symbol table, and
//! the structured diagnostics queue. It has no knowledge of the AST or the
//! CFG; those crates depend on this one.

pub mod diagnostics;
pub mod literals;
pub mod loc;
pub mod locals;
pub mod names;
pub mod symbols;
pub mod types;

pub use diagnostics::{Diagnostic, ErrorBuilder, ErrorCode, ErrorQueue, Severity};
pub use literals::LiteralValue;
pub use loc::{FileId, Loc};
pub use locals::LocalVariable;
pub use names::{NameRef, NameTable};
pub use symbols::{Symbol, SymbolKind, SymbolRef, SymbolTable};
pub use types::{ArgFlags, CastKind, TypeRef};
