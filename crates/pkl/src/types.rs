//! The type and constraint checker.
//!
//! A type expression is executed as a predicate over a candidate value.
//! Checking never unwinds through native errors: the result is a
//! [`Check`] value, so union checking aggregates branch failures into one
//! hierarchical report. Constraint predicates run with `this` bound to the
//! candidate.
//!
//! Nominal type names resolve lazily, on first check, through the declaring
//! module's name table and imports; the result is inserted once into the
//! type node's cell, so types may refer to declarations that parse later.

use std::rc::Rc;

use crate::{
    classes::{ClassId, builtin},
    errors::{ErrorKind, EvalError, EvalResult},
    eval::{Ctx, Evaluator},
    heap::{Frame, ObjKind},
    lexer::Span,
    modules::ModuleId,
    syntax::{Identifier, ResolvedTypeRef, TypeExpr},
    tracer::EvalTracer,
    value::Value,
};

/// Outcome of a type check.
#[derive(Debug)]
pub(crate) enum Check {
    Ok,
    Mismatch(Mismatch),
}

/// A structured mismatch report; unions carry one cause per failed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mismatch {
    /// Rendered expected type, e.g. `String|Int(isPositive)`.
    pub expected: String,
    /// Rendered actual type, e.g. `Int`.
    pub actual: String,
    /// Source text of the violated constraint predicate, when the base type
    /// matched but a constraint failed.
    pub constraint: Option<String>,
    pub causes: Vec<Mismatch>,
}

impl Mismatch {
    fn plain(expected: String, actual: String) -> Self {
        Self {
            expected,
            actual,
            constraint: None,
            causes: Vec::new(),
        }
    }
}

/// Type-argument environment for typealias expansion: the argument types
/// together with the module they were written in.
type TypeArgs<'a> = &'a [(Rc<TypeExpr>, ModuleId)];

impl<Tr: EvalTracer> Evaluator<Tr> {
    /// Checks `value` against `ty` as declared in `module`.
    pub(crate) fn check_type(
        &mut self,
        value: &Value,
        ty: &TypeExpr,
        module: ModuleId,
        type_args: TypeArgs,
    ) -> EvalResult<Check> {
        match ty {
            TypeExpr::Unknown => Ok(Check::Ok),
            TypeExpr::Nothing => Ok(Check::Mismatch(Mismatch::plain(
                "nothing".to_owned(),
                self.type_name_of(value),
            ))),
            TypeExpr::ModuleType => {
                let is_module = matches!(value, Value::Obj(id) if self.heap.obj(*id).kind == ObjKind::Module);
                if is_module {
                    Ok(Check::Ok)
                } else {
                    Ok(Check::Mismatch(Mismatch::plain(
                        "module".to_owned(),
                        self.type_name_of(value),
                    )))
                }
            }
            TypeExpr::StringLit(text) => {
                if matches!(value, Value::Str(s) if s.as_ref() == text.as_ref()) {
                    Ok(Check::Ok)
                } else {
                    Ok(Check::Mismatch(Mismatch::plain(
                        format!("{text:?}"),
                        self.type_name_of(value),
                    )))
                }
            }
            TypeExpr::Nullable(inner) => {
                if value.is_null() {
                    return Ok(Check::Ok);
                }
                match self.check_type(value, inner, module, type_args)? {
                    Check::Ok => Ok(Check::Ok),
                    Check::Mismatch(cause) => Ok(Check::Mismatch(Mismatch {
                        expected: self.render_type(ty, module),
                        actual: self.type_name_of(value),
                        constraint: None,
                        causes: vec![cause],
                    })),
                }
            }
            TypeExpr::Union { branches, .. } => {
                let mut causes: Vec<Mismatch> = Vec::new();
                for branch in branches {
                    match self.check_type(value, branch, module, type_args)? {
                        Check::Ok => return Ok(Check::Ok),
                        Check::Mismatch(m) => {
                            // suppress trivially-identical sub-messages
                            if !causes.contains(&m) {
                                causes.push(m);
                            }
                        }
                    }
                }
                Ok(Check::Mismatch(Mismatch {
                    expected: self.render_type(ty, module),
                    actual: self.type_name_of(value),
                    constraint: None,
                    causes,
                }))
            }
            TypeExpr::Constrained { base, predicates } => {
                match self.check_type(value, base, module, type_args)? {
                    Check::Ok => {}
                    mismatch => return Ok(mismatch),
                }
                for predicate in predicates {
                    let frame = self.heap.alloc_frame(Frame {
                        parent: None,
                        owner: None,
                        receiver: Some(value.clone()),
                        module,
                        locals: Vec::new(),
                    });
                    let ctx = Ctx {
                        frame,
                        this: value.clone(),
                        owner: None,
                        module,
                    };
                    let result = self.eval_expr(predicate, &ctx)?;
                    match result.as_bool() {
                        Some(true) => {}
                        Some(false) => {
                            return Ok(Check::Mismatch(Mismatch {
                                expected: self.render_type(ty, module),
                                actual: self.type_name_of(value),
                                constraint: Some(self.source_text(module, predicate.span)),
                                causes: Vec::new(),
                            }));
                        }
                        None => {
                            return Err(EvalError::new(
                                ErrorKind::ConstraintViolation,
                                format!(
                                    "a type constraint must evaluate to a Boolean, got {}",
                                    self.type_name_of(&result)
                                ),
                            )
                            .with_span(predicate.span));
                        }
                    }
                }
                Ok(Check::Ok)
            }
            TypeExpr::Function { params, .. } => {
                let matches = match value {
                    Value::Func(id) => self.heap.func(*id).params.len() == params.len(),
                    _ => false,
                };
                if matches {
                    Ok(Check::Ok)
                } else {
                    Ok(Check::Mismatch(Mismatch::plain(
                        self.render_type(ty, module),
                        self.type_name_of(value),
                    )))
                }
            }
            TypeExpr::Name { parts, args, resolved } => {
                let target = self.resolve_type_name(parts, resolved, module)?;
                match target {
                    ResolvedTypeRef::TypeVar(index) => match type_args.get(index as usize).cloned() {
                        Some((arg, arg_module)) => self.check_type(value, &arg, arg_module, &[]),
                        None => Ok(Check::Ok),
                    },
                    ResolvedTypeRef::Alias(id) => {
                        let alias = self.classes.alias(id);
                        let aliased = Rc::clone(&alias.aliased);
                        let alias_module = alias.module.unwrap_or(module);
                        let env: Vec<(Rc<TypeExpr>, ModuleId)> =
                            args.iter().map(|a| (Rc::clone(a), module)).collect();
                        self.check_type(value, &aliased, alias_module, &env)
                    }
                    ResolvedTypeRef::Class(class_id) => self.check_class_instance(value, class_id, args, ty, module),
                }
            }
        }
    }

    fn check_class_instance(
        &mut self,
        value: &Value,
        class_id: ClassId,
        args: &[Rc<TypeExpr>],
        ty: &TypeExpr,
        module: ModuleId,
    ) -> EvalResult<Check> {
        let actual_class = match value {
            Value::Obj(id) => self.heap.obj(*id).class,
            other => other.builtin_class(),
        };
        if !self.classes.is_subclass(actual_class, class_id) {
            return Ok(Check::Mismatch(Mismatch::plain(
                self.render_type(ty, module),
                self.type_name_of(value),
            )));
        }
        // element/entry types of the parameterised built-in containers
        let mismatch = |this: &Self, cause: Mismatch| {
            Ok(Check::Mismatch(Mismatch {
                expected: this.render_type(ty, module),
                actual: this.type_name_of(value),
                constraint: None,
                causes: vec![cause],
            }))
        };
        match (class_id, value) {
            (builtin::LIST | builtin::SET | builtin::COLLECTION, Value::List(items) | Value::Set(items)) => {
                if let Some(element_ty) = args.first() {
                    for item in items.iter() {
                        if let Check::Mismatch(m) = self.check_type(item, element_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                }
                Ok(Check::Ok)
            }
            (builtin::MAP, Value::Map(map)) => {
                let entries: Vec<(Value, Value)> = map.entries.clone();
                for (key, val) in &entries {
                    if let Some(key_ty) = args.first() {
                        if let Check::Mismatch(m) = self.check_type(key, key_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                    if let Some(value_ty) = args.get(1) {
                        if let Check::Mismatch(m) = self.check_type(val, value_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                }
                Ok(Check::Ok)
            }
            (builtin::PAIR, Value::Pair(pair)) => {
                if let Some(first_ty) = args.first() {
                    if let Check::Mismatch(m) = self.check_type(&pair.0.clone(), first_ty, module, &[])? {
                        return mismatch(self, m);
                    }
                }
                if let Some(second_ty) = args.get(1) {
                    if let Check::Mismatch(m) = self.check_type(&pair.1.clone(), second_ty, module, &[])? {
                        return mismatch(self, m);
                    }
                }
                Ok(Check::Ok)
            }
            (builtin::LISTING, Value::Obj(obj)) => {
                if let Some(element_ty) = args.first() {
                    let element_ty = Rc::clone(element_ty);
                    let total = self.heap.obj(*obj).total_elements;
                    for index in 0..total {
                        let element = self.force_element(*obj, index, Span::default())?;
                        if let Check::Mismatch(m) = self.check_type(&element, &element_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                }
                Ok(Check::Ok)
            }
            (builtin::MAPPING, Value::Obj(obj)) => {
                let keys = self.heap.entry_keys(*obj);
                for key in keys {
                    if let Some(key_ty) = args.first() {
                        let key_ty = Rc::clone(key_ty);
                        if let Check::Mismatch(m) = self.check_type(&key, &key_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                    if let Some(value_ty) = args.get(1) {
                        let value_ty = Rc::clone(value_ty);
                        let entry = self.force_entry(*obj, &key, Span::default())?;
                        if let Check::Mismatch(m) = self.check_type(&entry, &value_ty, module, &[])? {
                            return mismatch(self, m);
                        }
                    }
                }
                Ok(Check::Ok)
            }
            _ => Ok(Check::Ok),
        }
    }

    /// Resolves a nominal type name, caching the result in the node.
    pub(crate) fn resolve_type_name(
        &mut self,
        parts: &[Identifier],
        resolved: &std::cell::OnceCell<ResolvedTypeRef>,
        module: ModuleId,
    ) -> EvalResult<ResolvedTypeRef> {
        if let Some(target) = resolved.get() {
            return Ok(*target);
        }
        let target = self.resolve_type_name_uncached(parts, module)?;
        let _ = resolved.set(target);
        Ok(target)
    }

    fn resolve_type_name_uncached(&mut self, parts: &[Identifier], module: ModuleId) -> EvalResult<ResolvedTypeRef> {
        match parts {
            [single] => {
                if let Some(target) = self.modules[module.index()].type_names.get(&single.name) {
                    return Ok(*target);
                }
                if let Some(class_id) = crate::classes::builtin_class_named(self.interns.get(single.name)) {
                    return Ok(ResolvedTypeRef::Class(class_id));
                }
                Err(EvalError::new(
                    ErrorKind::TypeMismatch,
                    format!("cannot find type `{}`", self.interns.get(single.name)),
                )
                .with_span(single.span))
            }
            [qualifier, member] => {
                let import = self.modules[module.index()]
                    .imports
                    .iter()
                    .find(|i| i.name == qualifier.name)
                    .cloned()
                    .ok_or_else(|| {
                        EvalError::new(
                            ErrorKind::TypeMismatch,
                            format!("cannot find module `{}`", self.interns.get(qualifier.name)),
                        )
                        .with_span(qualifier.span)
                    })?;
                let target_id = self.load_module(&import.uri, Some(module))?;
                self.modules[target_id.index()]
                    .type_names
                    .get(&member.name)
                    .copied()
                    .ok_or_else(|| {
                        EvalError::new(
                            ErrorKind::TypeMismatch,
                            format!(
                                "module `{}` does not declare a type `{}`",
                                self.interns.get(qualifier.name),
                                self.interns.get(member.name)
                            ),
                        )
                        .with_span(member.span)
                    })
            }
            _ => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                "a type name has at most two dotted parts",
            )),
        }
    }

    /// Resolves a type used in `new T { … }` position down to a class.
    pub(crate) fn resolve_class_type(&mut self, ty: &TypeExpr, module: ModuleId) -> EvalResult<ClassId> {
        match ty {
            TypeExpr::Name { parts, resolved, .. } => match self.resolve_type_name(parts, resolved, module)? {
                ResolvedTypeRef::Class(id) => Ok(id),
                ResolvedTypeRef::Alias(id) => {
                    let alias = self.classes.alias(id);
                    let aliased = Rc::clone(&alias.aliased);
                    let alias_module = alias.module.unwrap_or(module);
                    self.resolve_class_type(&aliased, alias_module)
                }
                ResolvedTypeRef::TypeVar(_) => Err(EvalError::new(
                    ErrorKind::TypeMismatch,
                    "cannot instantiate a type parameter",
                )),
            },
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!("cannot instantiate type {}", self.render_type(other, module)),
            )),
        }
    }

    /// The default value a declared type provides when a property has no
    /// body, or `None` when the property stays undefined.
    pub(crate) fn default_for_type(
        &mut self,
        ty: &TypeExpr,
        module: ModuleId,
        ctx: &Ctx,
    ) -> EvalResult<Option<Value>> {
        match ty {
            TypeExpr::Nullable(_) => Ok(Some(Value::Null)),
            TypeExpr::StringLit(text) => Ok(Some(Value::Str(Rc::clone(text)))),
            TypeExpr::Constrained { base, .. } => self.default_for_type(base, module, ctx),
            TypeExpr::Union { branches, default_index } => match default_index {
                Some(index) => self.default_for_type(&branches[*index], module, ctx),
                None => Ok(None),
            },
            TypeExpr::Name { parts, resolved, .. } => {
                let target = self.resolve_type_name(parts, resolved, module)?;
                match target {
                    ResolvedTypeRef::Class(class_id) => self.default_for_class(class_id, ctx),
                    ResolvedTypeRef::Alias(id) => {
                        let alias = self.classes.alias(id);
                        let aliased = Rc::clone(&alias.aliased);
                        let alias_module = alias.module.unwrap_or(module);
                        self.default_for_type(&aliased, alias_module, ctx)
                    }
                    ResolvedTypeRef::TypeVar(_) => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    fn default_for_class(&mut self, class_id: ClassId, ctx: &Ctx) -> EvalResult<Option<Value>> {
        use crate::heap::ObjData;
        if class_id == builtin::LIST || class_id == builtin::COLLECTION {
            return Ok(Some(Value::List(Rc::new(Vec::new()))));
        }
        if class_id == builtin::SET {
            return Ok(Some(Value::Set(Rc::new(Vec::new()))));
        }
        if class_id == builtin::MAP {
            return Ok(Some(Value::Map(Rc::new(crate::value::ValueMap::new()))));
        }
        if class_id == builtin::LISTING {
            let data = ObjData::empty(ObjKind::Listing, builtin::LISTING, ctx.frame);
            return Ok(Some(Value::Obj(self.heap.alloc_object(data))));
        }
        if class_id == builtin::MAPPING {
            let data = ObjData::empty(ObjKind::Mapping, builtin::MAPPING, ctx.frame);
            return Ok(Some(Value::Obj(self.heap.alloc_object(data))));
        }
        if class_id == builtin::DYNAMIC {
            let data = ObjData::empty(ObjKind::Dynamic, builtin::DYNAMIC, ctx.frame);
            return Ok(Some(Value::Obj(self.heap.alloc_object(data))));
        }
        let class = self.classes.get(class_id);
        if class.module.is_some() && !class.modifiers.is_abstract {
            // a user class defaults to its prototype; undefined properties
            // surface lazily when read
            let proto = self.class_prototype(class_id)?;
            return Ok(Some(Value::Obj(proto)));
        }
        Ok(None)
    }

    /// Renders a type for diagnostics, e.g. `String|Int(isPositive)`.
    pub(crate) fn render_type(&self, ty: &TypeExpr, module: ModuleId) -> String {
        match ty {
            TypeExpr::Unknown => "unknown".to_owned(),
            TypeExpr::Nothing => "nothing".to_owned(),
            TypeExpr::ModuleType => "module".to_owned(),
            TypeExpr::StringLit(text) => format!("{text:?}"),
            TypeExpr::Nullable(inner) => format!("{}?", self.render_type(inner, module)),
            TypeExpr::Union { branches, default_index } => branches
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    let rendered = self.render_type(b, module);
                    if Some(i) == *default_index {
                        format!("*{rendered}")
                    } else {
                        rendered
                    }
                })
                .collect::<Vec<_>>()
                .join("|"),
            TypeExpr::Constrained { base, predicates } => {
                let rendered: Vec<String> = predicates.iter().map(|p| self.source_text(module, p.span)).collect();
                format!("{}({})", self.render_type(base, module), rendered.join(", "))
            }
            TypeExpr::Function { params, ret } => {
                let rendered: Vec<String> = params.iter().map(|p| self.render_type(p, module)).collect();
                format!("({}) -> {}", rendered.join(", "), self.render_type(ret, module))
            }
            TypeExpr::Name { parts, args, .. } => {
                let mut out = parts
                    .iter()
                    .map(|p| self.interns.get(p.name))
                    .collect::<Vec<_>>()
                    .join(".");
                if !args.is_empty() {
                    let rendered: Vec<String> = args.iter().map(|a| self.render_type(a, module)).collect();
                    out.push('<');
                    out.push_str(&rendered.join(", "));
                    out.push('>');
                }
                out
            }
        }
    }

    /// Source text of a span within a module, for constraint names.
    pub(crate) fn source_text(&self, module: ModuleId, span: Span) -> String {
        let source = &self.modules[module.index()].source;
        source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("<constraint>")
            .to_owned()
    }

    /// Converts a mismatch report into the error the evaluator raises.
    pub(crate) fn mismatch_error(&self, mismatch: Mismatch, span: Span) -> Box<EvalError> {
        let mut error = mismatch_to_error(&mismatch);
        error.span = Some(span);
        Box::new(error)
    }
}

fn mismatch_to_error(mismatch: &Mismatch) -> EvalError {
    let (kind, message) = match &mismatch.constraint {
        Some(constraint) => (
            ErrorKind::ConstraintViolation,
            crate::errors::bundle::format_message("constraintViolated", &[constraint]),
        ),
        None => (
            ErrorKind::TypeMismatch,
            crate::errors::bundle::format_message("typeMismatch", &[&mismatch.expected, &mismatch.actual]),
        ),
    };
    EvalError {
        kind,
        message,
        span: None,
        frames: Vec::new(),
        causes: mismatch.causes.iter().map(mismatch_to_error).collect(),
    }
}
