//! Interned identifiers.
//!
//! Names are interned once per checker run into a dense table; a [`NameRef`]
//! is an index into it. The temporaries the CFG lowering allocates and the
//! method names it synthesizes calls to are *well-known*: they are interned
//! at fixed indices when the table is constructed, so they are usable as
//! constants without a live table in hand (the reserved `self` and
//! `<blockCall>` locals depend on this).

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

/// Index of an interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameRef(pub u32);

impl NameRef {
    pub fn exists(self) -> bool {
        self != Self::NONE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Well-known names, interned in this order by [`NameTable::new`].
///
/// Angle brackets mark names that can never collide with user identifiers.
const WELL_KNOWN: &[&str] = &[
    "<none>",
    "self",
    "<blockCall>",
    "<methodReturnTemp>",
    "<finalReturn>",
    "<statTemp>",
    "<ifTemp>",
    "<whileTemp>",
    "<returnTemp>",
    "<nextTemp>",
    "<blockPreCallTemp>",
    "<selfRestore>",
    "<blkArg>",
    "<blockReturnTemp>",
    "<blockBreakAssign>",
    "<rescueStartTemp>",
    "<rescueEndTemp>",
    "<exceptionClassTemp>",
    "<isaCheckTemp>",
    "<gotoDeadTemp>",
    "<throwAwayTemp>",
    "<castTemp>",
    "<hashTemp>",
    "<arrayTemp>",
    "<magic>",
    "<keepForIde>",
    "[]",
    "is_a?",
    "absurd",
    "buildArray",
    "buildHash",
];

impl NameRef {
    pub const NONE: NameRef = NameRef(0);
    pub const SELF: NameRef = NameRef(1);
    pub const BLOCK_CALL: NameRef = NameRef(2);
    pub const METHOD_RETURN_TEMP: NameRef = NameRef(3);
    pub const FINAL_RETURN: NameRef = NameRef(4);
    pub const STAT_TEMP: NameRef = NameRef(5);
    pub const IF_TEMP: NameRef = NameRef(6);
    pub const WHILE_TEMP: NameRef = NameRef(7);
    pub const RETURN_TEMP: NameRef = NameRef(8);
    pub const NEXT_TEMP: NameRef = NameRef(9);
    pub const BLOCK_PRE_CALL_TEMP: NameRef = NameRef(10);
    pub const SELF_RESTORE: NameRef = NameRef(11);
    pub const BLK_ARG: NameRef = NameRef(12);
    pub const BLOCK_RETURN_TEMP: NameRef = NameRef(13);
    pub const BLOCK_BREAK_ASSIGN: NameRef = NameRef(14);
    pub const RESCUE_START_TEMP: NameRef = NameRef(15);
    pub const RESCUE_END_TEMP: NameRef = NameRef(16);
    pub const EXCEPTION_CLASS_TEMP: NameRef = NameRef(17);
    pub const ISA_CHECK_TEMP: NameRef = NameRef(18);
    pub const GOTO_DEAD_TEMP: NameRef = NameRef(19);
    pub const THROW_AWAY_TEMP: NameRef = NameRef(20);
    pub const CAST_TEMP: NameRef = NameRef(21);
    pub const HASH_TEMP: NameRef = NameRef(22);
    pub const ARRAY_TEMP: NameRef = NameRef(23);
    pub const MAGIC: NameRef = NameRef(24);
    pub const KEEP_FOR_IDE: NameRef = NameRef(25);
    pub const SQUARE_BRACKETS: NameRef = NameRef(26);
    pub const IS_A_P: NameRef = NameRef(27);
    pub const ABSURD: NameRef = NameRef(28);
    pub const BUILD_ARRAY: NameRef = NameRef(29);
    pub const BUILD_HASH: NameRef = NameRef(30);
}

/// Dense name interner.
#[derive(Debug)]
pub struct NameTable {
    strings: Vec<SmolStr>,
    map: FxHashMap<SmolStr, NameRef>,
}

impl NameTable {
    pub fn new() -> Self {
        let mut table = Self {
            strings: Vec::with_capacity(WELL_KNOWN.len()),
            map: FxHashMap::default(),
        };
        for text in WELL_KNOWN {
            table.intern(text);
        }
        table
    }

    pub fn intern(&mut self, text: &str) -> NameRef {
        if let Some(&name) = self.map.get(text) {
            return name;
        }
        let name = NameRef(self.strings.len() as u32);
        let text = SmolStr::new(text);
        self.strings.push(text.clone());
        self.map.insert(text, name);
        name
    }

    pub fn resolve(&self, name: NameRef) -> &str {
        &self.strings[name.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}
