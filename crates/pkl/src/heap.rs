//! The evaluator's arena: objects, frames, and function values.
//!
//! Objects are immutable records `(parent, own members, enclosing frame)`
//! referenced by index; the amendment chain is a walk over `parent` ids, so
//! the value graph carries no native reference cycles and is freed wholesale
//! when the evaluator is dropped.
//!
//! Laziness lives in the per-object member cells: each `(holder, member)`
//! slot is a three-state cell `Uncomputed → InProgress → Computed`. Entering
//! `InProgress` a second time is the property-cycle signal. Cells fill
//! monotonically; nothing is ever invalidated.

use std::{collections::BTreeMap, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    classes::ClassId,
    intern::StringId,
    lexer::Span,
    modules::ModuleId,
    syntax::{ExprLoc, MethodDef, Modifiers, ObjectBody, Param, PropertyDef, TypeExpr},
    value::Value,
};

/// Index of an object in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(u32);

/// Index of a frame in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

/// Index of a function value in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

/// Structural flavour of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum ObjKind {
    Typed,
    Dynamic,
    Listing,
    Mapping,
    Module,
}

/// State of one lazy member slot.
#[derive(Debug, Clone, Default)]
pub(crate) enum PropCell {
    #[default]
    Uncomputed,
    InProgress,
    Computed(Value),
}

/// The body of a member at one level of the chain.
#[derive(Debug, Clone)]
pub(crate) enum MemberBody {
    /// An expression to evaluate in the member's captured frame.
    Expr(Rc<ExprLoc>),
    /// Amend-declaration bodies: `foo { … } { … }` layered onto the
    /// inherited value.
    Bodies(Vec<Rc<ObjectBody>>),
    /// No body; the value comes from the declared type's default.
    TypeDefault,
    /// An already-computed constant (spread results, decoded values).
    Const(Value),
}

/// One member definition owned by an object level.
#[derive(Debug, Clone)]
pub(crate) struct ObjMember {
    /// Frame the body evaluates under (captures generator variables).
    pub frame: FrameId,
    pub body: MemberBody,
    pub type_ann: Option<Rc<TypeExpr>>,
    pub modifiers: Modifiers,
    pub span: Span,
    /// Module the body's source belongs to, for stack frames.
    pub module: ModuleId,
}

/// An object record: one level of an amendment chain.
#[derive(Debug)]
pub(crate) struct ObjData {
    pub kind: ObjKind,
    pub class: ClassId,
    pub parent: Option<ObjId>,
    /// Lexical frame the object literal was written in.
    pub frame: FrameId,
    /// Named members this level introduces or overrides, in source order.
    pub props: IndexMap<StringId, ObjMember>,
    /// Elements this level appends.
    pub elements: Vec<ObjMember>,
    /// Keyed entries this level introduces or overrides (keys are forced).
    pub entries: Vec<(Value, ObjMember)>,
    /// Local methods declared in this object body.
    pub methods: AHashMap<StringId, (FrameId, Rc<MethodDef>)>,
    /// The parent chain's total element count when this level was created;
    /// this level's elements get effective indices starting here.
    pub elements_base: usize,
    /// `elements_base + elements.len()` — the chain's total length at this
    /// level.
    pub total_elements: usize,
    /// The `default` member for Listings/Mappings, if any level set one.
    pub default_member: Option<Box<ObjMember>>,

    // Memoisation cells, meaningful on the object a read was initiated on
    // (the holder). Keyed by name / effective index / entry key.
    pub prop_cells: AHashMap<StringId, PropCell>,
    pub element_cells: AHashMap<usize, PropCell>,
    pub entry_cells: Vec<(Value, PropCell)>,
}

impl ObjData {
    /// A fresh object with no members.
    pub(crate) fn empty(kind: ObjKind, class: ClassId, frame: FrameId) -> Self {
        Self {
            kind,
            class,
            parent: None,
            frame,
            props: IndexMap::new(),
            elements: Vec::new(),
            entries: Vec::new(),
            methods: AHashMap::new(),
            elements_base: 0,
            total_elements: 0,
            default_member: None,
            prop_cells: AHashMap::new(),
            element_cells: AHashMap::new(),
            entry_cells: Vec::new(),
        }
    }

    /// Finds this level's entry member for a key.
    pub(crate) fn entry(&self, key: &Value) -> Option<&ObjMember> {
        self.entries.iter().find(|(k, _)| k.same(key)).map(|(_, m)| m)
    }
}

/// A lexical frame: locals plus the enclosing frame.
///
/// Frames are heap-allocated and arena-owned so closures can outlive the
/// call that created them; indices replace pointers throughout. The
/// `receiver` is the `this` value of the code that ran in this frame —
/// implicit name lookup walks frames outward and consults each receiver's
/// member chain.
#[derive(Debug)]
pub(crate) struct Frame {
    pub parent: Option<FrameId>,
    /// Lexically enclosing object level of the code in this frame.
    pub owner: Option<ObjId>,
    /// `this` of the code that ran in this frame.
    pub receiver: Option<Value>,
    /// Module of the source executing in this frame.
    pub module: ModuleId,
    /// Local slots: parameters, let-bindings, generator variables.
    pub locals: Vec<Option<Value>>,
}

impl Frame {
    pub(crate) fn set_local(&mut self, slot: u16, value: Value) {
        let slot = slot as usize;
        if slot >= self.locals.len() {
            self.locals.resize(slot + 1, None);
        }
        self.locals[slot] = Some(value);
    }

    pub(crate) fn local(&self, slot: u16) -> Option<&Value> {
        self.locals.get(slot as usize).and_then(Option::as_ref)
    }
}

/// A function value: a lambda or a method bound at capture time.
#[derive(Debug)]
pub(crate) struct FuncData {
    pub params: Vec<Param>,
    pub body: Rc<ExprLoc>,
    /// Defining frame, captured at construction.
    pub frame: FrameId,
    /// `this` at construction.
    pub this: Value,
    pub owner: Option<ObjId>,
    pub module: ModuleId,
    /// When set, an object body that amends whatever the call returns.
    /// Supports amending the result of a function call lazily.
    pub amend_body: Option<(Rc<ObjectBody>, FrameId)>,
}

/// Snapshot of arena occupancy, by record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub objects: usize,
    pub frames: usize,
    pub functions: usize,
    /// Live objects by structural kind name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
}

/// The arena.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    objects: Vec<ObjData>,
    frames: Vec<Frame>,
    functions: Vec<FuncData>,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc_object(&mut self, data: ObjData) -> ObjId {
        let id = ObjId(u32::try_from(self.objects.len()).expect("object arena overflow"));
        self.objects.push(data);
        id
    }

    pub(crate) fn obj(&self, id: ObjId) -> &ObjData {
        &self.objects[id.0 as usize]
    }

    pub(crate) fn obj_mut(&mut self, id: ObjId) -> &mut ObjData {
        &mut self.objects[id.0 as usize]
    }

    pub(crate) fn alloc_frame(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(u32::try_from(self.frames.len()).expect("frame arena overflow"));
        self.frames.push(frame);
        id
    }

    pub(crate) fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0 as usize]
    }

    pub(crate) fn alloc_func(&mut self, func: FuncData) -> FuncId {
        let id = FuncId(u32::try_from(self.functions.len()).expect("function arena overflow"));
        self.functions.push(func);
        id
    }

    pub(crate) fn func(&self, id: FuncId) -> &FuncData {
        &self.functions[id.0 as usize]
    }

    /// Walks the chain leaf-first for a named member.
    ///
    /// Returns the level that defines the member. `local` members are
    /// skipped unless `include_private` (access originates from the defining
    /// scope); `hidden` members resolve normally and are only excluded from
    /// rendering and conversion.
    pub(crate) fn lookup_prop(&self, leaf: ObjId, name: StringId, include_private: bool) -> Option<(ObjId, ObjMember)> {
        let mut current = Some(leaf);
        while let Some(id) = current {
            let data = self.obj(id);
            if let Some(member) = data.props.get(&name) {
                if member.modifiers.is_local && !include_private {
                    // a local at one level does not shadow an inherited
                    // non-local definition
                    current = data.parent;
                    continue;
                }
                return Some((id, member.clone()));
            }
            current = data.parent;
        }
        None
    }

    /// Walks the chain leaf-first for an entry member by key.
    pub(crate) fn lookup_entry(&self, leaf: ObjId, key: &Value) -> Option<(ObjId, ObjMember)> {
        let mut current = Some(leaf);
        while let Some(id) = current {
            let data = self.obj(id);
            if let Some(member) = data.entry(key) {
                return Some((id, member.clone()));
            }
            current = data.parent;
        }
        None
    }

    /// Finds the element member for an effective index, walking to the level
    /// whose index window contains it.
    pub(crate) fn lookup_element(&self, leaf: ObjId, index: usize) -> Option<(ObjId, ObjMember)> {
        let mut current = Some(leaf);
        while let Some(id) = current {
            let data = self.obj(id);
            if index >= data.elements_base {
                return data
                    .elements
                    .get(index - data.elements_base)
                    .map(|m| (id, m.clone()));
            }
            current = data.parent;
        }
        None
    }

    /// The nearest `default` member along the chain.
    pub(crate) fn lookup_default(&self, leaf: ObjId) -> Option<ObjMember> {
        let mut current = Some(leaf);
        while let Some(id) = current {
            let data = self.obj(id);
            if let Some(member) = &data.default_member {
                return Some((**member).clone());
            }
            current = data.parent;
        }
        None
    }

    /// All distinct entry keys along the chain, leaf overrides deduplicated,
    /// in root-to-leaf insertion order.
    pub(crate) fn entry_keys(&self, leaf: ObjId) -> Vec<Value> {
        let mut levels = Vec::new();
        let mut current = Some(leaf);
        while let Some(id) = current {
            levels.push(id);
            current = self.obj(id).parent;
        }
        let mut keys: Vec<Value> = Vec::new();
        for id in levels.into_iter().rev() {
            for (key, _) in &self.obj(id).entries {
                if !keys.iter().any(|k| k.same(key)) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// All property names visible on the chain, root-to-leaf order with
    /// leaf-wins dedup. `local`/`hidden` members are excluded.
    pub(crate) fn prop_names(&self, leaf: ObjId) -> Vec<StringId> {
        let mut levels = Vec::new();
        let mut current = Some(leaf);
        while let Some(id) = current {
            levels.push(id);
            current = self.obj(id).parent;
        }
        let mut names: Vec<StringId> = Vec::new();
        for id in levels.into_iter().rev() {
            for (name, member) in &self.obj(id).props {
                if member.modifiers.is_local || member.modifiers.is_hidden {
                    continue;
                }
                if !names.contains(name) {
                    names.push(*name);
                }
            }
        }
        names
    }

    pub(crate) fn stats(&self) -> HeapStats {
        let mut objects_by_kind = BTreeMap::new();
        for obj in &self.objects {
            *objects_by_kind.entry(kind_name(obj.kind)).or_insert(0) += 1;
        }
        HeapStats {
            objects: self.objects.len(),
            frames: self.frames.len(),
            functions: self.functions.len(),
            objects_by_kind,
        }
    }
}

fn kind_name(kind: ObjKind) -> &'static str {
    match kind {
        ObjKind::Typed => "Typed",
        ObjKind::Dynamic => "Dynamic",
        ObjKind::Listing => "Listing",
        ObjKind::Mapping => "Mapping",
        ObjKind::Module => "Module",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::builtin;

    fn test_frame(heap: &mut Heap) -> FrameId {
        heap.alloc_frame(Frame {
            parent: None,
            owner: None,
            receiver: None,
            module: ModuleId::REPL,
            locals: Vec::new(),
        })
    }

    #[test]
    fn element_windows_across_chain() {
        let mut heap = Heap::new();
        let frame = test_frame(&mut heap);
        let member = ObjMember {
            frame,
            body: MemberBody::Const(Value::Int(1)),
            type_ann: None,
            modifiers: Modifiers::default(),
            span: Span::default(),
            module: ModuleId::REPL,
        };
        let mut parent = ObjData::empty(ObjKind::Listing, builtin::LISTING, frame);
        parent.elements = vec![member.clone(), member.clone()];
        parent.total_elements = 2;
        let parent_id = heap.alloc_object(parent);

        let mut child = ObjData::empty(ObjKind::Listing, builtin::LISTING, frame);
        child.parent = Some(parent_id);
        child.elements = vec![member];
        child.elements_base = 2;
        child.total_elements = 3;
        let child_id = heap.alloc_object(child);

        assert_eq!(heap.lookup_element(child_id, 0).unwrap().0, parent_id);
        assert_eq!(heap.lookup_element(child_id, 2).unwrap().0, child_id);
        assert!(heap.lookup_element(child_id, 3).is_none());
    }
}
