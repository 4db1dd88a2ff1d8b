//! The runtime class model.
//!
//! Classes form a single-inheritance hierarchy rooted at `Any`. Built-in
//! classes occupy fixed ids so value-kind dispatch is a constant lookup;
//! user classes are appended as modules are prepared. Typealiases live in
//! a parallel table.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    intern::{Interns, StringId},
    modules::ModuleId,
    syntax::{MethodDef, Modifiers, PropertyDef, TypeExpr},
};

/// Index into the evaluator's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed ids of the built-in classes, in registration order.
pub(crate) mod builtin {
    use super::ClassId;

    pub const ANY: ClassId = ClassId(0);
    pub const NULL: ClassId = ClassId(1);
    pub const BOOLEAN: ClassId = ClassId(2);
    pub const NUMBER: ClassId = ClassId(3);
    pub const INT: ClassId = ClassId(4);
    pub const FLOAT: ClassId = ClassId(5);
    pub const STRING: ClassId = ClassId(6);
    pub const BYTES: ClassId = ClassId(7);
    pub const DURATION: ClassId = ClassId(8);
    pub const DATA_SIZE: ClassId = ClassId(9);
    pub const PAIR: ClassId = ClassId(10);
    pub const REGEX: ClassId = ClassId(11);
    pub const INT_SEQ: ClassId = ClassId(12);
    pub const COLLECTION: ClassId = ClassId(13);
    pub const LIST: ClassId = ClassId(14);
    pub const SET: ClassId = ClassId(15);
    pub const MAP: ClassId = ClassId(16);
    pub const OBJECT: ClassId = ClassId(17);
    pub const DYNAMIC: ClassId = ClassId(18);
    pub const LISTING: ClassId = ClassId(19);
    pub const MAPPING: ClassId = ClassId(20);
    pub const TYPED: ClassId = ClassId(21);
    pub const MODULE: ClassId = ClassId(22);
    pub const FUNCTION: ClassId = ClassId(23);
    pub const CLASS: ClassId = ClassId(24);
    pub const TYPE_ALIAS: ClassId = ClassId(25);
    pub const RESOURCE: ClassId = ClassId(26);

    /// `(name, superclass)` seed rows, in id order.
    pub(super) const SEED: &[(&str, Option<ClassId>)] = &[
        ("Any", None),
        ("Null", Some(ANY)),
        ("Boolean", Some(ANY)),
        ("Number", Some(ANY)),
        ("Int", Some(NUMBER)),
        ("Float", Some(NUMBER)),
        ("String", Some(ANY)),
        ("Bytes", Some(ANY)),
        ("Duration", Some(ANY)),
        ("DataSize", Some(ANY)),
        ("Pair", Some(ANY)),
        ("Regex", Some(ANY)),
        ("IntSeq", Some(ANY)),
        ("Collection", Some(ANY)),
        ("List", Some(COLLECTION)),
        ("Set", Some(COLLECTION)),
        ("Map", Some(ANY)),
        ("Object", Some(ANY)),
        ("Dynamic", Some(OBJECT)),
        ("Listing", Some(OBJECT)),
        ("Mapping", Some(OBJECT)),
        ("Typed", Some(OBJECT)),
        ("Module", Some(TYPED)),
        ("Function", Some(ANY)),
        ("Class", Some(ANY)),
        ("TypeAlias", Some(ANY)),
        ("Resource", Some(TYPED)),
    ];
}

/// Looks up a built-in class by its simple name.
pub(crate) fn builtin_class_named(name: &str) -> Option<ClassId> {
    builtin::SEED
        .iter()
        .position(|(n, _)| *n == name)
        .map(|i| ClassId(u32::try_from(i).expect("seed table is small")))
}

/// One class: built-in or user-declared.
#[derive(Debug)]
pub(crate) struct ClassDef {
    pub name: StringId,
    /// `moduleUri#SimpleName` for user classes, `pkl:base#Name` for built-ins.
    pub qualified_name: String,
    pub module_uri: Rc<str>,
    pub modifiers: Modifiers,
    pub superclass: Option<ClassId>,
    pub type_params: Vec<StringId>,
    /// Properties declared at this level, in source order.
    pub properties: IndexMap<StringId, Rc<PropertyDef>>,
    pub methods: AHashMap<StringId, Rc<MethodDef>>,
    /// Module whose frame class-level bodies evaluate in.
    pub module: Option<ModuleId>,
    pub doc: Option<String>,
}

/// A registered typealias.
#[derive(Debug)]
pub(crate) struct TypeAliasDef {
    pub name: StringId,
    pub qualified_name: String,
    pub type_params: Vec<StringId>,
    pub aliased: Rc<TypeExpr>,
    pub module: Option<ModuleId>,
}

/// The class and typealias tables.
#[derive(Debug)]
pub(crate) struct ClassTable {
    classes: Vec<ClassDef>,
    aliases: Vec<TypeAliasDef>,
}

impl ClassTable {
    /// Creates a table with the built-in classes pre-registered.
    pub(crate) fn new(interns: &mut Interns) -> Self {
        let classes = builtin::SEED
            .iter()
            .map(|(name, superclass)| ClassDef {
                name: interns.intern(name),
                qualified_name: format!("pkl:base#{name}"),
                module_uri: "pkl:base".into(),
                modifiers: Modifiers {
                    is_open: true,
                    ..Modifiers::default()
                },
                superclass: *superclass,
                type_params: Vec::new(),
                properties: IndexMap::new(),
                methods: AHashMap::new(),
                module: None,
                doc: None,
            })
            .collect();
        Self {
            classes,
            aliases: Vec::new(),
        }
    }

    pub(crate) fn get(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    pub(crate) fn add(&mut self, class: ClassDef) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).expect("class table overflow"));
        self.classes.push(class);
        id
    }

    /// Replaces a placeholder registered in the first prepare pass.
    pub(crate) fn set(&mut self, id: ClassId, class: ClassDef) {
        self.classes[id.index()] = class;
    }

    pub(crate) fn set_alias(&mut self, id: u32, alias: TypeAliasDef) {
        self.aliases[id as usize] = alias;
    }

    pub(crate) fn alias(&self, id: u32) -> &TypeAliasDef {
        &self.aliases[id as usize]
    }

    pub(crate) fn add_alias(&mut self, alias: TypeAliasDef) -> u32 {
        let id = u32::try_from(self.aliases.len()).expect("alias table overflow");
        self.aliases.push(alias);
        id
    }

    /// Walks the superclass chain.
    pub(crate) fn is_subclass(&self, mut class: ClassId, of: ClassId) -> bool {
        loop {
            if class == of {
                return true;
            }
            match self.get(class).superclass {
                Some(parent) => class = parent,
                None => return false,
            }
        }
    }

    /// Looks up a property declaration along the superclass chain, returning
    /// the declaring class of each declaration from the given class upward.
    pub(crate) fn property_chain(&self, class: ClassId, name: StringId) -> Vec<(ClassId, Rc<PropertyDef>)> {
        let mut out = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(def) = self.get(id).properties.get(&name) {
                out.push((id, Rc::clone(def)));
            }
            current = self.get(id).superclass;
        }
        out
    }

    /// Looks up a method along the superclass chain.
    pub(crate) fn find_method(&self, class: ClassId, name: StringId) -> Option<(ClassId, Rc<MethodDef>)> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(def) = self.get(id).methods.get(&name) {
                return Some((id, Rc::clone(def)));
            }
            current = self.get(id).superclass;
        }
        None
    }

    /// All declared properties of a class, superclass-first so subclass
    /// declarations override by name while preserving base ordering.
    pub(crate) fn all_properties(&self, class: ClassId) -> IndexMap<StringId, (ClassId, Rc<PropertyDef>)> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            chain.push(id);
            current = self.get(id).superclass;
        }
        let mut out = IndexMap::new();
        for id in chain.into_iter().rev() {
            for (name, def) in &self.get(id).properties {
                out.insert(*name, (id, Rc::clone(def)));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hierarchy() {
        let mut interns = Interns::new();
        let table = ClassTable::new(&mut interns);
        assert!(table.is_subclass(builtin::INT, builtin::NUMBER));
        assert!(table.is_subclass(builtin::INT, builtin::ANY));
        assert!(!table.is_subclass(builtin::NUMBER, builtin::INT));
        assert!(table.is_subclass(builtin::LISTING, builtin::OBJECT));
        assert!(table.is_subclass(builtin::MODULE, builtin::TYPED));
        assert_eq!(interns.get(table.get(builtin::DYNAMIC).name), "Dynamic");
    }
}
