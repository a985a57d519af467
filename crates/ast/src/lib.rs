//! The desugared, name-resolved AST.
//!
//! By the time a tree reaches CFG lowering, earlier phases have already run:
//! the desugarer has rewritten surface sugar into this small core language,
//! and the namer/resolver has interned every class, method, constant, and
//! local. Nodes therefore carry resolved [`SymbolRef`]s and
//! [`LocalVariable`]s, not raw identifiers. `UnresolvedIdent` is the one
//! deliberate exception: instance and class variables are resolved lazily
//! during lowering because their declarations may live on ancestors.
//!
//! The variant set is closed. `Block` (a bare iterator block), `ClassDef`,
//! `MethodDef`, and `UnresolvedConstantLit` are carried only so that the
//! lowering can reject them as upstream bugs.

use beryl_core::{ArgFlags, CastKind, LiteralValue, Loc, LocalVariable, NameRef, SymbolRef, TypeRef};

/// A located expression.
#[derive(Debug, Clone)]
pub struct Node {
    pub loc: Loc,
    pub expr: Expr,
}

impl Node {
    pub fn new(loc: Loc, expr: Expr) -> Self {
        Self { loc, expr }
    }

    pub fn empty(loc: Loc) -> Self {
        Self::new(loc, Expr::EmptyTree)
    }

    pub fn literal(loc: Loc, value: LiteralValue) -> Self {
        Self::new(loc, Expr::Literal(value))
    }

    pub fn local(loc: Loc, var: LocalVariable) -> Self {
        Self::new(loc, Expr::Local(var))
    }

    pub fn constant(loc: Loc, symbol: SymbolRef) -> Self {
        Self::new(
            loc,
            Expr::ConstantLit {
                symbol,
                original_scope: None,
            },
        )
    }
}

/// Which flavor of not-yet-resolved variable an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    /// `@foo`: resolved against the method's owner.
    Instance,
    /// `@@foo`: resolved against the attached class chain.
    Class,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// Absent expression (e.g. an omitted `else`). Evaluates to nothing.
    EmptyTree,
    Literal(LiteralValue),
    Local(LocalVariable),
    /// An instance or class variable, resolved during lowering.
    UnresolvedIdent { kind: IdentKind, name: NameRef },
    /// A resolved instance/class variable declaration reference.
    Field(SymbolRef),
    /// A resolved constant. `original_scope` preserves the scope expression
    /// of the surface constant for IDE queries, when there was one.
    ConstantLit {
        symbol: SymbolRef,
        original_scope: Option<Box<Node>>,
    },
    /// A constant the resolver failed to resolve. Must not reach lowering.
    UnresolvedConstantLit { name: NameRef },
    Assign {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    /// Statement sequence; evaluates to `expr`.
    InsSeq {
        stats: Vec<Node>,
        expr: Box<Node>,
    },
    Send(Box<Send>),
    /// A bare iterator block. Must not reach lowering detached from a send.
    Block(Box<IterBlock>),
    If {
        cond: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Box<Node>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    Return {
        expr: Box<Node>,
    },
    Next {
        expr: Box<Node>,
    },
    Break {
        expr: Box<Node>,
    },
    Retry,
    Rescue(Box<Rescue>),
    Array {
        elems: Vec<Node>,
    },
    Hash {
        keys: Vec<Node>,
        values: Vec<Node>,
    },
    Cast {
        arg: Box<Node>,
        ty: TypeRef,
        kind: CastKind,
    },
    /// Must not reach lowering; flattened away by an earlier pass.
    ClassDef { symbol: SymbolRef },
    /// Must not reach lowering; flattened away by an earlier pass.
    MethodDef { symbol: SymbolRef },
}

/// A method call: `recv.fun(args) { |params| body }`.
#[derive(Debug, Clone)]
pub struct Send {
    pub recv: Node,
    pub fun: NameRef,
    pub args: Vec<Node>,
    /// Whether a private method may be called (implicit-receiver calls).
    pub is_private_ok: bool,
    pub block: Option<IterBlock>,
}

/// An iterator block attached to a call.
#[derive(Debug, Clone)]
pub struct IterBlock {
    pub loc: Loc,
    pub params: Vec<BlockParam>,
    pub body: Node,
}

/// One iterator-block parameter, with the shape flags the namer computed.
#[derive(Debug, Clone)]
pub struct BlockParam {
    pub local: LocalVariable,
    pub loc: Loc,
    pub keyword: bool,
    pub repeated: bool,
    pub has_default: bool,
    pub shadow: bool,
}

impl BlockParam {
    pub fn required(local: LocalVariable, loc: Loc) -> Self {
        Self {
            local,
            loc,
            keyword: false,
            repeated: false,
            has_default: false,
            shadow: false,
        }
    }

    pub fn flags(&self) -> ArgFlags {
        ArgFlags {
            is_keyword: self.keyword,
            is_repeated: self.repeated,
            is_default: self.has_default,
            is_shadow: self.shadow,
        }
    }
}

/// `begin … rescue … else … ensure … end`.
#[derive(Debug, Clone)]
pub struct Rescue {
    pub body: Node,
    pub cases: Vec<RescueCase>,
    /// Runs when the body completes without raising. `EmptyTree` if absent.
    pub else_branch: Node,
    /// Runs on every path out. `EmptyTree` if absent.
    pub ensure: Node,
}

/// One `rescue Klass1, Klass2 => var` clause.
#[derive(Debug, Clone)]
pub struct RescueCase {
    pub loc: Loc,
    /// Exception class expressions; empty means the standard error class.
    pub exceptions: Vec<Node>,
    /// The binder; the desugarer guarantees a `Local`.
    pub var: Node,
    pub body: Node,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_param_flags_carry_through() {
        let param = BlockParam {
            local: LocalVariable::new(NameRef::NONE, 0),
            loc: Loc::none(),
            keyword: true,
            repeated: false,
            has_default: true,
            shadow: false,
        };
        let flags = param.flags();
        assert!(flags.is_keyword);
        assert!(!flags.is_repeated);
        assert!(flags.is_default);
        assert!(!flags.is_shadow);
    }
}
