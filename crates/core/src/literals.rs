//! Compile-time constant values.

use num_bigint::BigInt;

use crate::names::NameRef;

/// A literal constant known at compile time.
///
/// Source-language integers are unbounded, so they carry a [`BigInt`].
/// Strings and symbols are interned and carry their [`NameRef`].
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Nil,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(NameRef),
    Sym(NameRef),
}

impl LiteralValue {
    pub fn int(value: i64) -> Self {
        Self::Int(BigInt::from(value))
    }
}
