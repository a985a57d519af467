//! The resolved symbol table.
//!
//! The namer/resolver runs before CFG lowering and interns every class,
//! method, and variable into this arena. The lowering only reads it: it
//! looks up instance/class variables transitively and aliases well-known
//! symbols. Symbols are dense indices into the arena, in the same style as
//! every other id in the checker.

use indexmap::IndexMap;

use crate::names::{NameRef, NameTable};

/// Index of a symbol in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolRef(pub u32);

impl SymbolRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    ClassOrModule,
    Method,
    /// An instance variable.
    Field,
    /// A class-level variable.
    StaticField,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: NameRef,
    pub owner: SymbolRef,
    pub kind: SymbolKind,
    /// For classes: the superclass, if any.
    pub superclass: Option<SymbolRef>,
    /// For singleton classes: the class this one is attached to.
    pub attached_class: Option<SymbolRef>,
    members: IndexMap<NameRef, SymbolRef>,
}

impl Symbol {
    pub fn is_class_or_module(&self) -> bool {
        self.kind == SymbolKind::ClassOrModule
    }

    pub fn is_method(&self) -> bool {
        self.kind == SymbolKind::Method
    }

    pub fn members(&self) -> impl Iterator<Item = (NameRef, SymbolRef)> + '_ {
        self.members.iter().map(|(&name, &sym)| (name, sym))
    }
}

/// Arena of resolved symbols plus the well-known symbols the lowering needs.
#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    pub root: SymbolRef,
    /// The dynamic escape-hatch type's symbol.
    pub untyped: SymbolRef,
    /// The type-system module `T`.
    pub t_module: SymbolRef,
    /// Compiler-internal pseudo-receiver for literal construction calls.
    pub magic: SymbolRef,
    /// Default class caught by a bare `rescue`.
    pub standard_error: SymbolRef,
    /// Placeholder the resolver substitutes for unresolvable constants.
    pub stub_module: SymbolRef,
}

impl SymbolTable {
    pub fn new(names: &mut NameTable) -> Self {
        let mut symbols = Vec::new();
        let root = SymbolRef(0);
        symbols.push(Symbol {
            name: names.intern("<root>"),
            owner: root,
            kind: SymbolKind::ClassOrModule,
            superclass: None,
            attached_class: None,
            members: IndexMap::new(),
        });
        let mut table = Self {
            symbols,
            root,
            untyped: root,
            t_module: root,
            magic: root,
            standard_error: root,
            stub_module: root,
        };
        table.untyped = table.alloc_class(root, names.intern("<untyped>"));
        table.t_module = table.alloc_class(root, names.intern("T"));
        table.magic = table.alloc_class(root, names.intern("<Magic>"));
        table.standard_error = table.alloc_class(root, names.intern("StandardError"));
        table.stub_module = table.alloc_class(root, names.intern("<StubModule>"));
        table
    }

    fn alloc(&mut self, owner: SymbolRef, name: NameRef, kind: SymbolKind) -> SymbolRef {
        let sym = SymbolRef(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name,
            owner,
            kind,
            superclass: None,
            attached_class: None,
            members: IndexMap::new(),
        });
        self.symbols[owner.index()].members.insert(name, sym);
        sym
    }

    pub fn alloc_class(&mut self, owner: SymbolRef, name: NameRef) -> SymbolRef {
        self.alloc(owner, name, SymbolKind::ClassOrModule)
    }

    pub fn alloc_method(&mut self, owner: SymbolRef, name: NameRef) -> SymbolRef {
        self.alloc(owner, name, SymbolKind::Method)
    }

    pub fn alloc_field(&mut self, owner: SymbolRef, name: NameRef) -> SymbolRef {
        self.alloc(owner, name, SymbolKind::Field)
    }

    pub fn alloc_static_field(&mut self, owner: SymbolRef, name: NameRef) -> SymbolRef {
        self.alloc(owner, name, SymbolKind::StaticField)
    }

    /// Allocates the singleton class of `class` and links the two.
    pub fn alloc_singleton_class(&mut self, names: &mut NameTable, class: SymbolRef) -> SymbolRef {
        let name = {
            let base = names.resolve(self.symbol(class).name).to_string();
            names.intern(&format!("<Class:{base}>"))
        };
        let owner = self.symbol(class).owner;
        let singleton = self.alloc(owner, name, SymbolKind::ClassOrModule);
        self.symbols[singleton.index()].attached_class = Some(class);
        singleton
    }

    pub fn set_superclass(&mut self, class: SymbolRef, superclass: SymbolRef) {
        self.symbols[class.index()].superclass = Some(superclass);
    }

    pub fn symbol(&self, sym: SymbolRef) -> &Symbol {
        &self.symbols[sym.index()]
    }

    pub fn attached_class(&self, sym: SymbolRef) -> Option<SymbolRef> {
        self.symbol(sym).attached_class
    }

    /// Nearest enclosing class-or-module, starting at `sym` itself.
    pub fn enclosing_class(&self, sym: SymbolRef) -> SymbolRef {
        let mut cursor = sym;
        loop {
            let data = self.symbol(cursor);
            if data.is_class_or_module() {
                return cursor;
            }
            cursor = data.owner;
        }
    }

    pub fn find_member(&self, klass: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.symbol(klass).members.get(&name).copied()
    }

    /// Member lookup walking the superclass chain.
    pub fn find_member_transitive(&self, klass: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        let mut cursor = Some(klass);
        while let Some(current) = cursor {
            if let Some(found) = self.find_member(current, name) {
                return Some(found);
            }
            cursor = self.symbol(current).superclass;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitive_lookup_walks_superclasses() {
        let mut names = NameTable::new();
        let mut table = SymbolTable::new(&mut names);
        let base = table.alloc_class(table.root, names.intern("Base"));
        let derived = table.alloc_class(table.root, names.intern("Derived"));
        table.set_superclass(derived, base);
        let field = table.alloc_field(base, names.intern("@count"));

        assert_eq!(
            table.find_member_transitive(derived, names.intern("@count")),
            Some(field)
        );
        assert_eq!(table.find_member(derived, names.intern("@count")), None);
        assert_eq!(
            table.find_member_transitive(derived, names.intern("@missing")),
            None
        );
    }

    #[test]
    fn singleton_classes_link_back_to_their_class() {
        let mut names = NameTable::new();
        let mut table = SymbolTable::new(&mut names);
        let widget = table.alloc_class(table.root, names.intern("Widget"));
        let singleton = table.alloc_singleton_class(&mut names, widget);

        assert_eq!(table.attached_class(singleton), Some(widget));
        assert_eq!(table.attached_class(widget), None);
        assert!(table.symbol(singleton).is_class_or_module());
    }

    #[test]
    fn enclosing_class_skips_methods() {
        let mut names = NameTable::new();
        let mut table = SymbolTable::new(&mut names);
        let widget = table.alloc_class(table.root, names.intern("Widget"));
        let method = table.alloc_method(widget, names.intern("compute"));

        assert_eq!(table.enclosing_class(method), widget);
        assert_eq!(table.enclosing_class(widget), widget);
    }
}
