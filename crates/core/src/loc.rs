//! Source locations.
//!
//! A [`Loc`] is a file plus a byte range. Statements synthesized by the
//! compiler either carry `Loc::none()` or a zero-length copy of a nearby
//! user location; zero-length locations are skipped by IDE queries.

use text_size::{TextRange, TextSize};

/// Identifier for a source file, assigned by the enclosing driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

impl FileId {
    pub const NONE: FileId = FileId(u32::MAX);
}

/// A byte range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Loc {
    pub file: FileId,
    pub range: TextRange,
}

impl Loc {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self {
            file,
            range: TextRange::new(TextSize::new(start), TextSize::new(end)),
        }
    }

    /// The nonexistent location.
    pub fn none() -> Self {
        Self {
            file: FileId::NONE,
            range: TextRange::empty(TextSize::new(0)),
        }
    }

    pub fn exists(&self) -> bool {
        self.file != FileId::NONE
    }

    /// Copy of this location collapsed to its start offset.
    ///
    /// Zero-length locations mark statements inserted by the compiler that
    /// do not map to any source text.
    pub fn with_zero_length(&self) -> Self {
        Self {
            file: self.file,
            range: TextRange::empty(self.range.start()),
        }
    }

    pub fn is_zero_length(&self) -> bool {
        self.range.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_copy_keeps_file_and_start() {
        let loc = Loc::new(FileId(3), 10, 25);
        let zero = loc.with_zero_length();
        assert_eq!(zero.file, FileId(3));
        assert_eq!(u32::from(zero.range.start()), 10);
        assert!(zero.is_zero_length());
        assert!(zero.exists());
    }

    #[test]
    fn none_does_not_exist() {
        assert!(!Loc::none().exists());
        assert!(Loc::new(FileId(0), 0, 1).exists());
    }
}
