//! The tree-walking evaluator.
//!
//! One `Evaluator` owns the arena, the intern table, the class table, the
//! module and resource layers, and the per-module caches. Evaluation is
//! single-threaded and not re-entrant; embedding callers that need
//! parallelism create multiple evaluators.
//!
//! Properties are evaluated on demand and memoised per holding object; a
//! member body runs with `this` bound to the leaf of the amendment chain, so
//! overrides in derived levels are visible to super-level bodies. The only
//! blocking operations are module resolution, resource reads, and
//! external-reader RPC, which are also the cancellation points.

use std::{path::PathBuf, rc::Rc};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    classes::{ClassDef, ClassTable, builtin},
    errors::{ErrorKind, EvalError, EvalResult, PklError, StackFrame},
    external::ExternalReaderConfig,
    heap::{Frame, FrameId, FuncData, FuncId, Heap, HeapStats, MemberBody, ObjData, ObjId, ObjKind, ObjMember, PropCell},
    intern::{Interns, StringId},
    lexer::{Span, line_col},
    limits::Limits,
    modules::{self, ModuleId, ModuleLoader, ModuleRecord},
    object::{Object, StructBody},
    parse,
    prepare::{self, PreparedClause, PreparedModule},
    resource::ResourceManager,
    security::SecurityPolicy,
    stdlib,
    syntax::{
        BinOp, Builtin, Expr, ExprLoc, Identifier, Modifiers, ObjectBody, ObjectMember, PropValue, ReadMode,
        Resolution, StrPart, TypeExpr,
    },
    tracer::{EvalTracer, NoopTracer},
    types::Check,
    value::{DataSize, Duration, IntSeq, RegexValue, Value, ValueMap},
};

/// Construction-time options for an [`Evaluator`].
#[derive(Debug, Default)]
pub struct EvaluatorOptions {
    pub security: SecurityPolicy,
    pub limits: Limits,
    /// Root directories for the `modulepath:` scheme.
    pub module_path: Vec<PathBuf>,
    /// Local store directory for the `package:` scheme.
    pub package_store: Option<PathBuf>,
    /// Environment variables visible through `read("env:…")`.
    pub env_vars: std::collections::HashMap<String, String>,
    /// External properties visible through `read("prop:…")`.
    pub properties: std::collections::HashMap<String, String>,
    /// User-supplied reader subprocesses for extra schemes.
    pub external_readers: Vec<ExternalReaderConfig>,
}

/// Frequently used interned names.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Names {
    pub default: StringId,
}

/// Evaluation context threaded through expression evaluation.
#[derive(Debug, Clone)]
pub(crate) struct Ctx {
    pub frame: FrameId,
    pub this: Value,
    /// The object level whose body lexically contains the running code.
    pub owner: Option<ObjId>,
    pub module: ModuleId,
}

/// Member identity used for lookups and error frames.
#[derive(Debug, Clone)]
pub(crate) enum MemberKey {
    Prop(StringId),
    Element(usize),
    Entry(Value),
}

/// The Pkl evaluator.
pub struct Evaluator<Tr: EvalTracer = NoopTracer> {
    pub(crate) heap: Heap,
    pub(crate) interns: Interns,
    pub(crate) classes: ClassTable,
    pub(crate) loader: ModuleLoader,
    pub(crate) resources: ResourceManager,
    pub(crate) security: SecurityPolicy,
    pub(crate) limits: Limits,
    pub(crate) tracer: Tr,
    pub(crate) modules: Vec<ModuleRecord>,
    module_ids: AHashMap<String, ModuleId>,
    proto_cache: AHashMap<crate::classes::ClassId, ObjId>,
    call_depth: usize,
    repl_counter: u32,
    pub(crate) names: Names,
}

impl Evaluator<NoopTracer> {
    #[must_use]
    pub fn new(options: EvaluatorOptions) -> Self {
        Self::with_tracer(options, NoopTracer)
    }
}

impl<Tr: EvalTracer> Evaluator<Tr> {
    pub fn with_tracer(options: EvaluatorOptions, tracer: Tr) -> Self {
        let mut interns = Interns::new();
        let classes = ClassTable::new(&mut interns);
        let names = Names {
            default: interns.intern("default"),
        };
        let mut loader = ModuleLoader::standard(options.module_path, options.package_store.clone());
        let mut resources = ResourceManager::standard(
            options.env_vars.into_iter().collect(),
            options.properties.into_iter().collect(),
            options.package_store,
        );
        for config in options.external_readers {
            config.register(&mut loader, &mut resources);
        }
        Self {
            heap: Heap::new(),
            interns,
            classes,
            loader,
            resources,
            security: options.security,
            limits: options.limits,
            tracer,
            modules: Vec::new(),
            module_ids: AHashMap::new(),
            proto_cache: AHashMap::new(),
            call_depth: 0,
            repl_counter: 0,
            names,
        }
    }

    /// Access to the tracer, e.g. to read back recorded events.
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    /// Arena occupancy snapshot.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Registers an in-memory module under `repl:<name>`.
    pub fn add_repl_module(&mut self, name: &str, source: &str) {
        self.loader.repl_mut().insert(format!("repl:{name}"), source.to_owned());
    }

    // ---- public evaluation API ----

    /// Evaluates module source text and exports the fully-forced module.
    pub fn evaluate_text(&mut self, source: &str) -> Result<Object, PklError> {
        self.repl_counter += 1;
        let uri = format!("repl:text{}", self.repl_counter);
        self.loader.repl_mut().insert(uri.clone(), source.to_owned());
        self.evaluate_module(&uri)
    }

    /// Loads, evaluates, and exports the module at `uri`.
    pub fn evaluate_module(&mut self, uri: &str) -> Result<Object, PklError> {
        let result = self.evaluate_module_inner(uri);
        result.map_err(|e| e.into_public())
    }

    fn evaluate_module_inner(&mut self, uri: &str) -> EvalResult<Object> {
        let id = self.load_module(uri, None)?;
        let obj = self.modules[id.index()].obj.expect("loaded module has an object");
        self.export_value(&Value::Obj(obj))
    }

    /// Evaluates module source, then an expression against that module.
    pub fn evaluate_expression(&mut self, source: &str, expr: &str) -> Result<Object, PklError> {
        let result = self.evaluate_expression_inner(source, expr);
        result.map_err(|e| e.into_public())
    }

    /// Loads the module at `uri`, then evaluates an expression against it.
    pub fn evaluate_module_expression(&mut self, uri: &str, expr: &str) -> Result<Object, PklError> {
        let result = self.evaluate_module_expression_inner(uri, expr);
        result.map_err(|e| e.into_public())
    }

    fn evaluate_module_expression_inner(&mut self, uri: &str, expr: &str) -> EvalResult<Object> {
        let id = self.load_module(uri, None)?;
        let value = self.evaluate_expression_value(id, expr)?;
        self.export_value(&value)
    }

    fn evaluate_expression_inner(&mut self, source: &str, expr_text: &str) -> EvalResult<Object> {
        self.repl_counter += 1;
        let uri = format!("repl:text{}", self.repl_counter);
        self.loader.repl_mut().insert(uri.clone(), source.to_owned());
        let id = self.load_module(&uri, None)?;
        let value = self.evaluate_expression_value(id, expr_text)?;
        self.export_value(&value)
    }

    pub(crate) fn evaluate_expression_value(&mut self, module: ModuleId, expr_text: &str) -> EvalResult<Value> {
        let parsed = parse::parse_expression(expr_text, &mut self.interns)?;
        let record = &self.modules[module.index()];
        let uri = Rc::clone(&record.uri);
        let import_names: Vec<StringId> = record.imports.iter().map(|i| i.name).collect();
        let prepared = prepare::prepare_expression(
            &parsed,
            import_names,
            &uri,
            module,
            &mut self.interns,
            &mut self.classes,
        )?;
        let obj = self.modules[module.index()].obj.expect("module is loaded");
        let root = self.heap.obj(obj).frame;
        let frame = self.heap.alloc_frame(Frame {
            parent: Some(root),
            owner: Some(obj),
            receiver: Some(Value::Obj(obj)),
            module,
            locals: Vec::new(),
        });
        let ctx = Ctx {
            frame,
            this: Value::Obj(obj),
            owner: Some(obj),
            module,
        };
        self.eval_expr(&prepared, &ctx)
    }

    // ---- module loading ----

    pub(crate) fn load_module(&mut self, reference_uri: &str, importer: Option<ModuleId>) -> EvalResult<ModuleId> {
        let canonical = match importer {
            Some(imp) => {
                let base = Rc::clone(&self.modules[imp.index()].uri);
                self.loader.resolve(&base, reference_uri)?
            }
            None => reference_uri.to_owned(),
        };
        if let Some(id) = self.module_ids.get(&canonical) {
            let id = *id;
            if self.modules[id.index()].obj.is_none() {
                return Err(EvalError::keyed(ErrorKind::ImportError, "cyclicModuleImport", &[&canonical]));
            }
            return Ok(id);
        }
        self.security.check_module(&canonical)?;
        if let Some(imp) = importer {
            let importer_uri = Rc::clone(&self.modules[imp.index()].uri);
            self.security.check_import(&importer_uri, &canonical)?;
        }
        if let Some(path) = modules::file_uri_to_path(&canonical) {
            self.security.check_path_confinement(&path)?;
        }
        self.limits.check_suspension_point()?;

        let source = self.loader.read(&canonical)?;
        let id = ModuleId(u32::try_from(self.modules.len()).expect("module table overflow"));
        self.modules.push(ModuleRecord {
            uri: canonical.clone().into(),
            name: String::new(),
            source: source.clone().into(),
            obj: None,
            class: None,
            type_names: AHashMap::new(),
            imports: Vec::new(),
        });
        self.module_ids.insert(canonical.clone(), id);

        let result = self.instantiate_module(id, &source);
        if let Err(err) = result {
            // unhook the half-loaded record so a later attempt can retry;
            // the slot itself only comes off when nothing loaded after it
            self.module_ids.remove(&canonical);
            if self.modules.len() == id.index() + 1 {
                self.modules.pop();
            }
            let mut err = err;
            if err.frames.is_empty() {
                let span = err.span.take().unwrap_or_default();
                let (line, col) = line_col(&source, span.start);
                err.push_frame(StackFrame {
                    member: None,
                    location: format!("{canonical}:{line}:{col}"),
                });
            }
            return Err(err);
        }
        self.tracer.on_module_load(&canonical);
        Ok(id)
    }

    fn instantiate_module(&mut self, id: ModuleId, source: &str) -> EvalResult<()> {
        let uri = self.modules[id.index()].uri.to_string();
        let syntax = parse::parse_module(source, &mut self.interns)?;
        let prepared = {
            let loader = &self.loader;
            let interns = &mut self.interns;
            let classes = &mut self.classes;
            prepare::prepare_module(syntax, &uri, id, interns, classes, &mut |reference| {
                loader.resolve(&uri, reference)
            })?
        };
        let PreparedModule {
            name,
            clause,
            imports,
            properties,
            methods,
            type_names,
            modifiers,
        } = prepared;

        // amends/extends targets load before this module's object exists
        let (parent_obj, superclass) = match &clause {
            Some(PreparedClause::Amends(target) | PreparedClause::Extends(target)) => {
                let target_id = self.load_module(target, Some(id))?;
                let record = &self.modules[target_id.index()];
                (record.obj, record.class.unwrap_or(builtin::MODULE))
            }
            None => (None, builtin::MODULE),
        };

        let simple_name = name.rsplit('.').next().unwrap_or(&name).to_owned();
        let class_name = self.interns.intern(&simple_name);
        let mut class = ClassDef {
            name: class_name,
            qualified_name: uri.clone(),
            module_uri: uri.clone().into(),
            modifiers,
            superclass: Some(superclass),
            type_params: Vec::new(),
            properties: indexmap::IndexMap::new(),
            methods: AHashMap::new(),
            module: Some(id),
            doc: None,
        };
        for method in &methods {
            class.methods.insert(method.name, Rc::clone(method));
        }
        for property in &properties {
            class.properties.insert(property.name, Rc::clone(property));
        }
        let class_id = self.classes.add(class);

        let frame = self.heap.alloc_frame(Frame {
            parent: None,
            owner: None,
            receiver: None,
            module: id,
            locals: Vec::new(),
        });
        let mut data = ObjData::empty(ObjKind::Module, class_id, frame);
        data.parent = parent_obj;
        if let Some(parent) = parent_obj {
            data.elements_base = self.heap.obj(parent).total_elements;
            data.total_elements = data.elements_base;
        }
        for property in &properties {
            // amending a fixed or const property from another module is
            // rejected the same way object bodies are
            if let Some(parent) = parent_obj {
                self.check_amendable(parent, property.name, property.span)?;
            }
            data.props.insert(
                property.name,
                ObjMember {
                    frame,
                    body: member_body_of(&property.value, &property.type_ann),
                    type_ann: property.type_ann.clone(),
                    modifiers: property.modifiers,
                    span: property.span,
                    module: id,
                },
            );
        }
        let obj = self.heap.alloc_object(data);
        {
            let root = self.heap.frame_mut(frame);
            root.owner = Some(obj);
            root.receiver = Some(Value::Obj(obj));
        }

        let record = &mut self.modules[id.index()];
        record.name = name;
        record.obj = Some(obj);
        record.class = Some(class_id);
        record.type_names = type_names;
        record.imports = imports;
        Ok(())
    }

    pub(crate) fn module_object(&mut self, id: ModuleId) -> EvalResult<ObjId> {
        self.modules[id.index()]
            .obj
            .ok_or_else(|| EvalError::keyed(ErrorKind::ImportError, "cyclicModuleImport", &[&self.modules[id.index()].uri]))
    }

    // ---- object construction ----

    /// The per-class prototype: an object whose members are the class's
    /// declared properties (including inherited ones).
    pub(crate) fn class_prototype(&mut self, class_id: crate::classes::ClassId) -> EvalResult<ObjId> {
        if let Some(proto) = self.proto_cache.get(&class_id) {
            return Ok(*proto);
        }
        let class = self.classes.get(class_id);
        if class.modifiers.is_abstract {
            return Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!("cannot instantiate abstract class `{}`", class.qualified_name),
            ));
        }
        let kind = if self.classes.is_subclass(class_id, builtin::MODULE) {
            ObjKind::Module
        } else {
            ObjKind::Typed
        };
        let module = class.module;
        let frame = match module.and_then(|m| self.modules[m.index()].obj) {
            Some(module_obj) => self.heap.obj(module_obj).frame,
            None => self.heap.alloc_frame(Frame {
                parent: None,
                owner: None,
                receiver: None,
                module: module.unwrap_or(ModuleId::REPL),
                locals: Vec::new(),
            }),
        };
        let mut data = ObjData::empty(kind, class_id, frame);
        let member_module = module.unwrap_or(ModuleId::REPL);
        for (name, (declaring, def)) in self.classes.all_properties(class_id) {
            let declaring_module = self.classes.get(declaring).module.unwrap_or(member_module);
            let declaring_frame = match self.modules.get(declaring_module.index()).and_then(|r| r.obj) {
                Some(o) => self.heap.obj(o).frame,
                None => frame,
            };
            data.props.insert(
                name,
                ObjMember {
                    frame: declaring_frame,
                    body: member_body_of(&def.value, &def.type_ann),
                    type_ann: def.type_ann.clone(),
                    modifiers: def.modifiers,
                    span: def.span,
                    module: declaring_module,
                },
            );
        }
        let proto = self.heap.alloc_object(data);
        self.proto_cache.insert(class_id, proto);
        Ok(proto)
    }

    /// Builds one level of an amendment chain from an object body.
    pub(crate) fn build_object(
        &mut self,
        body: &ObjectBody,
        parent: Option<ObjId>,
        kind: ObjKind,
        class: crate::classes::ClassId,
        ctx: &Ctx,
    ) -> EvalResult<ObjId> {
        let mut data = ObjData::empty(kind, class, ctx.frame);
        data.parent = parent;
        if let Some(parent) = parent {
            data.elements_base = self.heap.obj(parent).total_elements;
        }
        data.total_elements = data.elements_base;
        let obj = self.heap.alloc_object(data);
        self.fill_level(obj, body, ctx)?;
        Ok(obj)
    }

    /// Adds an object body's members to `obj`, running generators and
    /// spreads in the construction context.
    fn fill_level(&mut self, obj: ObjId, body: &ObjectBody, ctx: &Ctx) -> EvalResult<()> {
        for member in &body.members {
            match member {
                ObjectMember::Property(def) => {
                    let parent = self.heap.obj(obj).parent;
                    if let Some(parent) = parent {
                        self.check_amendable(parent, def.name, def.span)?;
                    }
                    let kind = self.heap.obj(obj).kind;
                    let is_default = def.name == self.names.default;
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: member_body_of(&def.value, &def.type_ann),
                        type_ann: def.type_ann.clone(),
                        modifiers: def.modifiers,
                        span: def.span,
                        module: ctx.module,
                    };
                    if is_default && matches!(kind, ObjKind::Listing | ObjKind::Mapping) {
                        self.heap.obj_mut(obj).default_member = Some(Box::new(member));
                    } else {
                        if matches!(kind, ObjKind::Listing | ObjKind::Mapping) && !def.modifiers.is_local {
                            return Err(EvalError::new(
                                ErrorKind::TypeMismatch,
                                format!(
                                    "a {kind} cannot define the property `{}`",
                                    self.interns.get(def.name)
                                ),
                            )
                            .with_span(def.span));
                        }
                        self.heap.obj_mut(obj).props.insert(def.name, member);
                    }
                }
                ObjectMember::Method(def) => {
                    self.heap
                        .obj_mut(obj)
                        .methods
                        .insert(def.name, (ctx.frame, Rc::clone(def)));
                }
                ObjectMember::Entry { key, value } => {
                    let kind = self.heap.obj(obj).kind;
                    if matches!(kind, ObjKind::Typed | ObjKind::Module) {
                        return Err(EvalError::new(
                            ErrorKind::TypeMismatch,
                            "a typed object cannot contain entries",
                        )
                        .with_span(key.span));
                    }
                    let key_value = self.eval_expr(key, ctx)?;
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: match value.as_ref() {
                            PropValue::Expr(e) => MemberBody::Expr(Rc::new(e.clone())),
                            PropValue::Bodies(bodies) => MemberBody::Bodies(bodies.clone()),
                            PropValue::None => MemberBody::TypeDefault,
                        },
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span: key.span,
                        module: ctx.module,
                    };
                    self.heap.obj_mut(obj).entries.push((key_value, member));
                }
                ObjectMember::Element(expr) => {
                    let kind = self.heap.obj(obj).kind;
                    if matches!(kind, ObjKind::Typed | ObjKind::Module | ObjKind::Mapping) {
                        return Err(EvalError::new(
                            ErrorKind::TypeMismatch,
                            format!("a {kind} cannot contain elements"),
                        )
                        .with_span(expr.span));
                    }
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: MemberBody::Expr(Rc::clone(expr)),
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span: expr.span,
                        module: ctx.module,
                    };
                    let data = self.heap.obj_mut(obj);
                    data.elements.push(member);
                    data.total_elements += 1;
                }
                ObjectMember::Spread { expr, nullable, span } => {
                    let value = self.eval_expr(expr, ctx)?;
                    self.spread_into(obj, value, *nullable, *span, ctx)?;
                }
                ObjectMember::For(generator) => {
                    let iterable = self.eval_expr(&generator.iterable, ctx)?;
                    let pairs = self.iterate(&iterable, generator.span)?;
                    for (key, value) in pairs {
                        let frame = self.heap.alloc_frame(Frame {
                            parent: Some(ctx.frame),
                            owner: ctx.owner,
                            receiver: Some(ctx.this.clone()),
                            module: ctx.module,
                            locals: Vec::new(),
                        });
                        if let Some(param) = &generator.key_param {
                            let key = key.clone().unwrap_or(Value::Null);
                            self.heap.frame_mut(frame).set_local(param.slot, key);
                        }
                        self.heap
                            .frame_mut(frame)
                            .set_local(generator.value_param.slot, value.clone());
                        let inner_ctx = Ctx {
                            frame,
                            this: ctx.this.clone(),
                            owner: ctx.owner,
                            module: ctx.module,
                        };
                        self.fill_level(obj, &generator.body, &inner_ctx)?;
                    }
                }
                ObjectMember::When(generator) => {
                    let cond = self.eval_expr(&generator.cond, ctx)?;
                    let Some(cond) = cond.as_bool() else {
                        return Err(EvalError::new(
                            ErrorKind::TypeMismatch,
                            "the condition of `when` must be a Boolean",
                        )
                        .with_span(generator.span));
                    };
                    if cond {
                        self.fill_level(obj, &generator.body, ctx)?;
                    } else if let Some(else_body) = &generator.else_body {
                        self.fill_level(obj, else_body, ctx)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// `fixed`/`const` propagate down the chain: an amending level may not
    /// override them.
    fn check_amendable(&self, parent: ObjId, name: StringId, span: Span) -> EvalResult<()> {
        if let Some((_, inherited)) = self.heap.lookup_prop(parent, name, true) {
            if inherited.modifiers.is_fixed || inherited.modifiers.is_const {
                let flag = if inherited.modifiers.is_fixed { "fixed" } else { "const" };
                return Err(EvalError::new(
                    ErrorKind::TypeMismatch,
                    format!("cannot amend the `{flag}` property `{}`", self.interns.get(name)),
                )
                .with_span(span));
            }
        }
        Ok(())
    }

    /// Merges a spread value's members into the level under construction.
    /// Child elements receive indices starting at the chain's current length.
    fn spread_into(&mut self, obj: ObjId, value: Value, nullable: bool, span: Span, ctx: &Ctx) -> EvalResult<()> {
        let push_element = |this: &mut Self, obj: ObjId, v: Value| {
            let member = ObjMember {
                frame: ctx.frame,
                body: MemberBody::Const(v),
                type_ann: None,
                modifiers: Modifiers::default(),
                span,
                module: ctx.module,
            };
            let data = this.heap.obj_mut(obj);
            data.elements.push(member);
            data.total_elements += 1;
        };
        match value {
            Value::Null if nullable => Ok(()),
            Value::List(items) | Value::Set(items) => {
                for item in items.iter() {
                    push_element(self, obj, item.clone());
                }
                Ok(())
            }
            Value::IntSeq(seq) => {
                for i in seq.iter() {
                    push_element(self, obj, Value::Int(i));
                }
                Ok(())
            }
            Value::Map(map) => {
                for (k, v) in &map.entries {
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: MemberBody::Const(v.clone()),
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span,
                        module: ctx.module,
                    };
                    self.heap.obj_mut(obj).entries.push((k.clone(), member));
                }
                Ok(())
            }
            Value::Obj(source) => {
                // properties (leaf-wins over the source's chain)
                for name in self.heap.prop_names(source) {
                    let value = self.force_prop(source, name, false, span)?;
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: MemberBody::Const(value),
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span,
                        module: ctx.module,
                    };
                    self.heap.obj_mut(obj).props.insert(name, member);
                }
                let total = self.heap.obj(source).total_elements;
                for index in 0..total {
                    let value = self.force_element(source, index, span)?;
                    push_element(self, obj, value);
                }
                for key in self.heap.entry_keys(source) {
                    let value = self.force_entry(source, &key, span)?;
                    let member = ObjMember {
                        frame: ctx.frame,
                        body: MemberBody::Const(value),
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span,
                        module: ctx.module,
                    };
                    self.heap.obj_mut(obj).entries.push((key, member));
                }
                Ok(())
            }
            other => Err(EvalError::keyed(
                ErrorKind::TypeMismatch,
                "cannotAmendValue",
                &[&self.type_name_of(&other)],
            )
            .with_span(span)),
        }
    }

    /// Iterates a value for `for` generators: `(key, value)` pairs.
    fn iterate(&mut self, value: &Value, span: Span) -> EvalResult<Vec<(Option<Value>, Value)>> {
        match value {
            Value::List(items) | Value::Set(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    (
                        Some(Value::Int(i64::try_from(i).expect("list fits i64"))),
                        v.clone(),
                    )
                })
                .collect()),
            Value::IntSeq(seq) => Ok(seq
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    (
                        Some(Value::Int(i64::try_from(i).expect("sequence fits i64"))),
                        Value::Int(v),
                    )
                })
                .collect()),
            Value::Map(map) => Ok(map
                .entries
                .iter()
                .map(|(k, v)| (Some(k.clone()), v.clone()))
                .collect()),
            Value::Obj(obj) => {
                let kind = self.heap.obj(*obj).kind;
                match kind {
                    ObjKind::Listing | ObjKind::Dynamic => {
                        let mut out = Vec::new();
                        let total = self.heap.obj(*obj).total_elements;
                        for index in 0..total {
                            let v = self.force_element(*obj, index, span)?;
                            out.push((
                                Some(Value::Int(i64::try_from(index).expect("index fits i64"))),
                                v,
                            ));
                        }
                        if kind == ObjKind::Dynamic {
                            for key in self.heap.entry_keys(*obj) {
                                let v = self.force_entry(*obj, &key, span)?;
                                out.push((Some(key), v));
                            }
                            for name in self.heap.prop_names(*obj) {
                                let v = self.force_prop(*obj, name, false, span)?;
                                out.push((Some(Value::Str(self.interns.get(name).into())), v));
                            }
                        }
                        Ok(out)
                    }
                    ObjKind::Mapping => {
                        let mut out = Vec::new();
                        for key in self.heap.entry_keys(*obj) {
                            let v = self.force_entry(*obj, &key, span)?;
                            out.push((Some(key), v));
                        }
                        Ok(out)
                    }
                    _ => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        "cannot iterate over a typed object",
                    )
                    .with_span(span)),
                }
            }
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!("cannot iterate over a value of type {}", self.type_name_of(other)),
            )
            .with_span(span)),
        }
    }

    // ---- member forcing ----

    /// Reads a property on a holder, memoising per `(holder, name)`.
    pub(crate) fn force_prop(&mut self, holder: ObjId, name: StringId, private: bool, span: Span) -> EvalResult<Value> {
        match self.heap.obj(holder).prop_cells.get(&name) {
            Some(PropCell::Computed(v)) => return Ok(v.clone()),
            Some(PropCell::InProgress) => {
                return Err(EvalError::keyed(
                    ErrorKind::CycleError,
                    "cyclicProperty",
                    &[&self.interns.get(name)],
                )
                .with_span(span));
            }
            _ => {}
        }
        let Some((level, member)) = self.heap.lookup_prop(holder, name, private) else {
            return Err(EvalError::keyed(
                ErrorKind::UndefinedProperty,
                "cannotFindMember",
                &[&self.interns.get(name)],
            )
            .with_span(span));
        };
        self.heap.obj_mut(holder).prop_cells.insert(name, PropCell::InProgress);
        let result = self.eval_member(holder, level, &member, &MemberKey::Prop(name));
        match result {
            Ok(value) => {
                self.heap
                    .obj_mut(holder)
                    .prop_cells
                    .insert(name, PropCell::Computed(value.clone()));
                Ok(value)
            }
            Err(err) => {
                // leave the slot retryable; `trace` ignores errors
                self.heap.obj_mut(holder).prop_cells.insert(name, PropCell::Uncomputed);
                Err(err)
            }
        }
    }

    pub(crate) fn force_element(&mut self, holder: ObjId, index: usize, span: Span) -> EvalResult<Value> {
        match self.heap.obj(holder).element_cells.get(&index) {
            Some(PropCell::Computed(v)) => return Ok(v.clone()),
            Some(PropCell::InProgress) => {
                return Err(EvalError::keyed(ErrorKind::CycleError, "cyclicProperty", &[&format!("[{index}]")])
                    .with_span(span));
            }
            _ => {}
        }
        let Some((level, member)) = self.heap.lookup_element(holder, index) else {
            return Err(EvalError::new(
                ErrorKind::UndefinedProperty,
                format!("element index {index} is out of range"),
            )
            .with_span(span));
        };
        self.heap.obj_mut(holder).element_cells.insert(index, PropCell::InProgress);
        let result = self.eval_member(holder, level, &member, &MemberKey::Element(index));
        match result {
            Ok(value) => {
                self.heap
                    .obj_mut(holder)
                    .element_cells
                    .insert(index, PropCell::Computed(value.clone()));
                Ok(value)
            }
            Err(err) => {
                self.heap.obj_mut(holder).element_cells.insert(index, PropCell::Uncomputed);
                Err(err)
            }
        }
    }

    pub(crate) fn force_entry(&mut self, holder: ObjId, key: &Value, span: Span) -> EvalResult<Value> {
        let cell = self
            .heap
            .obj(holder)
            .entry_cells
            .iter()
            .find(|(k, _)| k.same(key))
            .map(|(_, c)| c.clone());
        match cell {
            Some(PropCell::Computed(v)) => return Ok(v),
            Some(PropCell::InProgress) => {
                let shown = self.display_value(key)?;
                return Err(EvalError::keyed(ErrorKind::CycleError, "cyclicProperty", &[&shown]).with_span(span));
            }
            _ => {}
        }
        let looked_up = self.heap.lookup_entry(holder, key);
        self.set_entry_cell(holder, key, PropCell::InProgress);
        let result = match looked_up {
            Some((level, member)) => self.eval_member(holder, level, &member, &MemberKey::Entry(key.clone())),
            None => self.entry_default(holder, key, span),
        };
        match result {
            Ok(value) => {
                self.set_entry_cell(holder, key, PropCell::Computed(value.clone()));
                Ok(value)
            }
            Err(err) => {
                self.set_entry_cell(holder, key, PropCell::Uncomputed);
                Err(err)
            }
        }
    }

    fn set_entry_cell(&mut self, holder: ObjId, key: &Value, cell: PropCell) {
        let data = self.heap.obj_mut(holder);
        if let Some(slot) = data.entry_cells.iter_mut().find(|(k, _)| k.same(key)) {
            slot.1 = cell;
        } else {
            data.entry_cells.push((key.clone(), cell));
        }
    }

    /// A key with no explicit definition takes the nearest `default`, which
    /// is a lazy template re-evaluated per access; a function default is
    /// applied to the key.
    fn entry_default(&mut self, holder: ObjId, key: &Value, span: Span) -> EvalResult<Value> {
        let Some(member) = self.heap.lookup_default(holder) else {
            let shown = self.display_value(key)?;
            return Err(EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&shown]).with_span(span));
        };
        let template = self.eval_member(holder, holder, &member, &MemberKey::Prop(self.names.default))?;
        match template {
            Value::Func(f) => self.call_function(f, vec![key.clone()], span),
            other => Ok(other),
        }
    }

    /// Evaluates a member body with `this` bound to the holder (the leaf).
    fn eval_member(&mut self, holder: ObjId, level: ObjId, member: &ObjMember, key: &MemberKey) -> EvalResult<Value> {
        self.limits.check_suspension_point()?;
        if self.call_depth >= self.limits.max_recursion_depth {
            return Err(EvalError::new(ErrorKind::StackOverflow, "evaluation is nested too deeply").with_span(member.span));
        }
        self.call_depth += 1;
        let result = self.eval_member_inner(holder, level, member, key);
        self.call_depth -= 1;
        result.map_err(|mut err| {
            let span = err.span.take().unwrap_or(member.span);
            let name = match key {
                MemberKey::Prop(name) => self.interns.get(*name).to_owned(),
                MemberKey::Element(index) => format!("[{index}]"),
                MemberKey::Entry(k) => format!("[{}]", self.display_value(k).unwrap_or_else(|_| "?".into())),
            };
            err.push_frame(self.stack_frame(member.module, span, Some(name)));
            err
        })
    }

    fn eval_member_inner(&mut self, holder: ObjId, level: ObjId, member: &ObjMember, key: &MemberKey) -> EvalResult<Value> {
        let frame = self.heap.alloc_frame(Frame {
            parent: Some(member.frame),
            owner: Some(level),
            receiver: Some(Value::Obj(holder)),
            module: member.module,
            locals: Vec::new(),
        });
        let ctx = Ctx {
            frame,
            this: Value::Obj(holder),
            owner: Some(level),
            module: member.module,
        };
        let value = match &member.body {
            MemberBody::Expr(expr) => self.eval_expr(expr, &ctx)?,
            MemberBody::Const(value) => value.clone(),
            MemberBody::TypeDefault => {
                let Some(ty) = &member.type_ann else {
                    return Err(EvalError::keyed(
                        ErrorKind::UndefinedProperty,
                        "undefinedProperty",
                        &[&self.member_key_name(key)],
                    )
                    .with_span(member.span));
                };
                let ty = Rc::clone(ty);
                match self.default_for_type(&ty, member.module, &ctx)? {
                    Some(value) => value,
                    None => {
                        return Err(EvalError::keyed(
                            ErrorKind::UndefinedProperty,
                            "undefinedProperty",
                            &[&self.member_key_name(key)],
                        )
                        .with_span(member.span));
                    }
                }
            }
            MemberBody::Bodies(bodies) => {
                let bodies = bodies.clone();
                let base = self.inherited_value(holder, level, member, key)?;
                let mut value = base;
                for body in &bodies {
                    value = self.amend_value(value, body, &ctx, member.span)?;
                }
                value
            }
        };
        // the effective type is the intersection of every declared type
        // along the chain; each level's constraints are all enforced
        if let MemberKey::Prop(name) = key {
            let mut current = Some(holder);
            while let Some(id) = current {
                let data = self.heap.obj(id);
                let ann = data.props.get(name).and_then(|m| m.type_ann.clone());
                let module = data.props.get(name).map(|m| m.module);
                current = data.parent;
                if let (Some(ty), Some(module)) = (ann, module) {
                    match self.check_type(&value, &ty, module, &[])? {
                        Check::Ok => {}
                        Check::Mismatch(mismatch) => return Err(self.mismatch_error(mismatch, member.span)),
                    }
                }
            }
        }
        Ok(value)
    }

    fn member_key_name(&self, key: &MemberKey) -> String {
        match key {
            MemberKey::Prop(name) => self.interns.get(*name).to_owned(),
            MemberKey::Element(index) => format!("[{index}]"),
            MemberKey::Entry(_) => "[entry]".to_owned(),
        }
    }

    /// The value a `foo { … }` amend-declaration starts from: the nearest
    /// definition above the defining level, or the declared type's default.
    fn inherited_value(&mut self, holder: ObjId, level: ObjId, member: &ObjMember, key: &MemberKey) -> EvalResult<Value> {
        let parent = self.heap.obj(level).parent;
        let inherited = parent.and_then(|p| match key {
            MemberKey::Prop(name) => self.heap.lookup_prop(p, *name, true),
            MemberKey::Entry(k) => self.heap.lookup_entry(p, k),
            MemberKey::Element(index) => self.heap.lookup_element(p, *index),
        });
        if let Some((inherited_level, inherited_member)) = inherited {
            if !matches!(inherited_member.body, MemberBody::TypeDefault) || inherited_member.type_ann.is_none() {
                return self.eval_member(holder, inherited_level, &inherited_member, key);
            }
            // fall through to the type default below, so that
            // `listing { … }` amends an empty listing of the declared type
            let ty = inherited_member.type_ann.clone().expect("checked above");
            let ctx = Ctx {
                frame: inherited_member.frame,
                this: Value::Obj(holder),
                owner: Some(inherited_level),
                module: inherited_member.module,
            };
            if let Some(value) = self.default_for_type(&ty, inherited_member.module, &ctx)? {
                return Ok(value);
            }
        }
        if let Some(ty) = &member.type_ann {
            let ty = Rc::clone(ty);
            let ctx = Ctx {
                frame: member.frame,
                this: Value::Obj(holder),
                owner: Some(level),
                module: member.module,
            };
            if let Some(value) = self.default_for_type(&ty, member.module, &ctx)? {
                return Ok(value);
            }
        }
        // a mapping's default template also seeds `["k"] { … }` amends
        if let MemberKey::Entry(k) = key {
            if self.heap.lookup_default(holder).is_some() {
                let k = k.clone();
                return self.entry_default(holder, &k, member.span);
            }
        }
        // in open-schema contexts, `foo { … }` with nothing to amend starts
        // from a fresh empty Dynamic
        if matches!(self.heap.obj(level).kind, ObjKind::Dynamic | ObjKind::Module) {
            let data = ObjData::empty(ObjKind::Dynamic, builtin::DYNAMIC, member.frame);
            return Ok(Value::Obj(self.heap.alloc_object(data)));
        }
        Err(EvalError::keyed(
            ErrorKind::UndefinedProperty,
            "cannotFindMember",
            &[&self.member_key_name(key)],
        )
        .with_span(member.span))
    }

    /// Amends a value with an object body: objects get a child level,
    /// functions get a lazy wrapper that amends their eventual result.
    pub(crate) fn amend_value(&mut self, base: Value, body: &Rc<ObjectBody>, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        match base {
            Value::Obj(parent) => {
                let (kind, class) = {
                    let data = self.heap.obj(parent);
                    (data.kind, data.class)
                };
                let kind = if kind == ObjKind::Module { ObjKind::Dynamic } else { kind };
                let child = self.build_object(body, Some(parent), kind, class, ctx)?;
                Ok(Value::Obj(child))
            }
            Value::Func(func) => {
                let data = self.heap.func(func);
                let wrapped = FuncData {
                    params: data.params.clone(),
                    body: Rc::clone(&data.body),
                    frame: data.frame,
                    this: data.this.clone(),
                    owner: data.owner,
                    module: data.module,
                    amend_body: Some((Rc::clone(body), ctx.frame)),
                };
                Ok(Value::Func(self.heap.alloc_func(wrapped)))
            }
            other => Err(EvalError::keyed(
                ErrorKind::TypeMismatch,
                "cannotAmendValue",
                &[&self.type_name_of(&other)],
            )
            .with_span(span)),
        }
    }

    // ---- calls ----

    pub(crate) fn call_function(&mut self, func: FuncId, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        if self.call_depth >= self.limits.max_recursion_depth {
            return Err(EvalError::new(ErrorKind::StackOverflow, "evaluation is nested too deeply").with_span(span));
        }
        let (params, body, parent_frame, this, owner, module, amend_body) = {
            let data = self.heap.func(func);
            (
                data.params.clone(),
                Rc::clone(&data.body),
                data.frame,
                data.this.clone(),
                data.owner,
                data.module,
                data.amend_body.clone(),
            )
        };
        if args.len() != params.len() {
            return Err(EvalError::keyed(ErrorKind::TypeMismatch, "wrongArity", &[&params.len(), &args.len()])
                .with_span(span));
        }
        let frame = self.heap.alloc_frame(Frame {
            parent: Some(parent_frame),
            owner,
            receiver: Some(this.clone()),
            module,
            locals: Vec::new(),
        });
        for (param, arg) in params.iter().zip(&args) {
            if let Some(ty) = &param.type_ann {
                match self.check_type(arg, ty, module, &[])? {
                    Check::Ok => {}
                    Check::Mismatch(m) => return Err(self.mismatch_error(m, span)),
                }
            }
            self.heap.frame_mut(frame).set_local(param.slot, arg.clone());
        }
        let ctx = Ctx {
            frame,
            this,
            owner,
            module,
        };
        self.call_depth += 1;
        let result = self.eval_expr(&body, &ctx);
        self.call_depth -= 1;
        let value = result?;
        match amend_body {
            Some((amend, amend_frame)) => {
                let amend_ctx = Ctx {
                    frame: amend_frame,
                    this: ctx.this.clone(),
                    owner: ctx.owner,
                    module: ctx.module,
                };
                self.amend_value(value, &amend, &amend_ctx, span)
            }
            None => Ok(value),
        }
    }

    pub(crate) fn call_method(
        &mut self,
        def: &Rc<crate::syntax::MethodDef>,
        defining_frame: FrameId,
        this: Value,
        owner: Option<ObjId>,
        module: ModuleId,
        args: Vec<Value>,
        span: Span,
    ) -> EvalResult<Value> {
        let Some(body) = &def.body else {
            return Err(EvalError::new(
                ErrorKind::Bug,
                format!("external method `{}` has no native implementation", self.interns.get(def.name)),
            )
            .with_span(span));
        };
        if args.len() != def.params.len() {
            return Err(
                EvalError::keyed(ErrorKind::TypeMismatch, "wrongArity", &[&def.params.len(), &args.len()])
                    .with_span(span),
            );
        }
        if self.call_depth >= self.limits.max_recursion_depth {
            return Err(EvalError::new(ErrorKind::StackOverflow, "evaluation is nested too deeply").with_span(span));
        }
        let frame = self.heap.alloc_frame(Frame {
            parent: Some(defining_frame),
            owner,
            receiver: Some(this.clone()),
            module,
            locals: Vec::new(),
        });
        for (param, arg) in def.params.iter().zip(&args) {
            if let Some(ty) = &param.type_ann {
                match self.check_type(arg, ty, module, &[])? {
                    Check::Ok => {}
                    Check::Mismatch(m) => return Err(self.mismatch_error(m, span)),
                }
            }
            self.heap.frame_mut(frame).set_local(param.slot, arg.clone());
        }
        let body = Rc::clone(body);
        let ctx = Ctx {
            frame,
            this,
            owner,
            module,
        };
        self.call_depth += 1;
        let result = self.eval_expr(&body, &ctx);
        self.call_depth -= 1;
        let value = result?;
        if let Some(ret) = &def.return_type {
            match self.check_type(&value, ret, module, &[])? {
                Check::Ok => {}
                Check::Mismatch(m) => return Err(self.mismatch_error(m, span)),
            }
        }
        Ok(value)
    }

    // ---- name lookup ----

    /// Implicit-receiver lookup: the holder's chain, then receivers of
    /// enclosing frames, then the module object, then class names.
    fn lookup_implicit(&mut self, name: StringId, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        if let Value::Obj(holder) = &ctx.this {
            if self.heap.lookup_prop(*holder, name, true).is_some() {
                return self.force_prop(*holder, name, true, span);
            }
        }
        let mut frame = Some(ctx.frame);
        while let Some(id) = frame {
            let (receiver, parent) = {
                let f = self.heap.frame(id);
                (f.receiver.clone(), f.parent)
            };
            if let Some(Value::Obj(obj)) = receiver {
                if self.heap.lookup_prop(obj, name, true).is_some() {
                    return self.force_prop(obj, name, true, span);
                }
            }
            frame = parent;
        }
        let module_obj = self.module_object(ctx.module)?;
        if self.heap.lookup_prop(module_obj, name, true).is_some() {
            return self.force_prop(module_obj, name, true, span);
        }
        // built-in properties of `this`, so constraint predicates can say
        // `isPositive` or `!isEmpty` without naming the receiver
        let this = ctx.this.clone();
        let name_text = self.interns.get(name).to_owned();
        if let Some(value) = stdlib::value_property(self, &this, &name_text, span)? {
            return Ok(value);
        }
        // class and typealias names evaluate to their reflective values
        if let Some(resolved) = self.modules[ctx.module.index()].type_names.get(&name) {
            return Ok(match resolved {
                crate::syntax::ResolvedTypeRef::Class(id) => Value::Class(*id),
                crate::syntax::ResolvedTypeRef::Alias(id) => Value::TypeAlias(*id),
                crate::syntax::ResolvedTypeRef::TypeVar(_) => Value::Null,
            });
        }
        if let Some(id) = crate::classes::builtin_class_named(self.interns.get(name)) {
            return Ok(Value::Class(id));
        }
        Err(EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&self.interns.get(name)]).with_span(span))
    }

    /// Implicit method resolution: local methods and class methods of each
    /// receiver outward, then a property holding a function value.
    fn call_implicit(&mut self, name: &Identifier, args: Vec<Value>, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        let mut receivers: SmallVec<[Value; 4]> = SmallVec::new();
        receivers.push(ctx.this.clone());
        let mut frame = Some(ctx.frame);
        while let Some(id) = frame {
            let f = self.heap.frame(id);
            if let Some(receiver) = &f.receiver {
                receivers.push(receiver.clone());
            }
            frame = f.parent;
        }
        let module_obj = self.module_object(ctx.module)?;
        receivers.push(Value::Obj(module_obj));
        for receiver in receivers {
            if let Value::Obj(obj) = receiver {
                if let Some(result) = self.try_call_object_method(obj, name.name, &args, span)? {
                    return Ok(result);
                }
            }
        }
        // a property holding a function value
        let value = self.lookup_implicit(name.name, ctx, span)?;
        match value {
            Value::Func(f) => self.call_function(f, args, span),
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!(
                    "`{}` is not a method (it is a value of type {})",
                    self.interns.get(name.name),
                    self.type_name_of(&other)
                ),
            )
            .with_span(span)),
        }
    }

    /// Tries object-local methods along the chain, then class methods.
    fn try_call_object_method(
        &mut self,
        obj: ObjId,
        name: StringId,
        args: &[Value],
        span: Span,
    ) -> EvalResult<Option<Value>> {
        let mut current = Some(obj);
        while let Some(id) = current {
            let data = self.heap.obj(id);
            if let Some((frame, def)) = data.methods.get(&name) {
                let (frame, def) = (*frame, Rc::clone(def));
                let module = self.heap.frame(frame).module;
                return self
                    .call_method(&def, frame, Value::Obj(obj), Some(id), module, args.to_vec(), span)
                    .map(Some);
            }
            current = data.parent;
        }
        let class = self.heap.obj(obj).class;
        if let Some((declaring, def)) = self.classes.find_method(class, name) {
            let module = self.classes.get(declaring).module.unwrap_or(ModuleId::REPL);
            let frame = match self.modules.get(module.index()).and_then(|r| r.obj) {
                Some(o) => self.heap.obj(o).frame,
                None => self.heap.obj(obj).frame,
            };
            return self
                .call_method(&def, frame, Value::Obj(obj), Some(obj), module, args.to_vec(), span)
                .map(Some);
        }
        Ok(None)
    }

    // ---- expression evaluation ----

    pub(crate) fn eval_expr(&mut self, expr: &ExprLoc, ctx: &Ctx) -> EvalResult<Value> {
        let span = expr.span;
        match &expr.expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(parts) => {
                if let [StrPart::Text(text)] = parts.as_slice() {
                    return Ok(Value::Str(Rc::clone(text)));
                }
                let mut out = String::new();
                for part in parts {
                    match part {
                        StrPart::Text(text) => out.push_str(text),
                        StrPart::Interp(inner) => {
                            let value = self.eval_expr(inner, ctx)?;
                            out.push_str(&self.string_of(&value)?);
                        }
                    }
                }
                Ok(Value::Str(out.into()))
            }
            Expr::This => Ok(ctx.this.clone()),
            Expr::Outer => {
                let mut frame = Some(ctx.frame);
                while let Some(id) = frame {
                    let f = self.heap.frame(id);
                    if let Some(receiver) = &f.receiver {
                        if !receiver.same(&ctx.this) {
                            return Ok(receiver.clone());
                        }
                    }
                    frame = f.parent;
                }
                Ok(ctx.this.clone())
            }
            Expr::ModuleRef => {
                let obj = self.module_object(ctx.module)?;
                Ok(Value::Obj(obj))
            }
            Expr::Name(ident) => match ident.resolution {
                Resolution::Local { depth, slot } => self.read_local(ctx.frame, depth, slot, ident, span),
                Resolution::Import(index) => self.import_by_index(ctx.module, index, span),
                Resolution::Builtin(_) | Resolution::Unresolved | Resolution::Implicit => {
                    self.lookup_implicit(ident.name, ctx, span)
                }
            },
            Expr::Prop { receiver, name, nullable } => {
                let value = self.eval_expr(receiver, ctx)?;
                if *nullable && value.is_null() {
                    return Ok(Value::Null);
                }
                self.prop_on_value(&value, name.name, span)
            }
            Expr::Call {
                receiver,
                name,
                args,
                nullable,
            } => {
                let mut evaluated = Vec::with_capacity(args.len());
                if let Some(receiver) = receiver {
                    let value = self.eval_expr(receiver, ctx)?;
                    if *nullable && value.is_null() {
                        return Ok(Value::Null);
                    }
                    for arg in args {
                        evaluated.push(self.eval_expr(arg, ctx)?);
                    }
                    self.call_on_value(&value, name, evaluated, span)
                } else {
                    for arg in args {
                        evaluated.push(self.eval_expr(arg, ctx)?);
                    }
                    match name.resolution {
                        Resolution::Builtin(builtin) => self.call_builtin(builtin, evaluated, span),
                        Resolution::Local { depth, slot } => {
                            let value = self.read_local(ctx.frame, depth, slot, name, span)?;
                            match value {
                                Value::Func(f) => self.call_function(f, evaluated, span),
                                other => Err(EvalError::new(
                                    ErrorKind::TypeMismatch,
                                    format!("cannot call a value of type {}", self.type_name_of(&other)),
                                )
                                .with_span(span)),
                            }
                        }
                        _ => self.call_implicit(name, evaluated, ctx, span),
                    }
                }
            }
            Expr::ApplyCall { callee, args } => {
                let value = self.eval_expr(callee, ctx)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, ctx)?);
                }
                match value {
                    Value::Func(f) => self.call_function(f, evaluated, span),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("cannot call a value of type {}", self.type_name_of(&other)),
                    )
                    .with_span(span)),
                }
            }
            Expr::Subscript { receiver, index } => {
                let value = self.eval_expr(receiver, ctx)?;
                let key = self.eval_expr(index, ctx)?;
                self.subscript(&value, &key, span)
            }
            Expr::SuperProp { name } => {
                let level = self.owner_or_error(ctx, span)?;
                let parent = self.heap.obj(level).parent.ok_or_else(|| {
                    EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&self.interns.get(name.name)])
                        .with_span(span)
                })?;
                let holder = self.this_object(ctx, span)?;
                let Some((super_level, member)) = self.heap.lookup_prop(parent, name.name, true) else {
                    return Err(EvalError::keyed(
                        ErrorKind::UndefinedProperty,
                        "cannotFindMember",
                        &[&self.interns.get(name.name)],
                    )
                    .with_span(span));
                };
                self.eval_member(holder, super_level, &member, &MemberKey::Prop(name.name))
            }
            Expr::SuperCall { name, args } => {
                let level = self.owner_or_error(ctx, span)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, ctx)?);
                }
                let parent = self.heap.obj(level).parent;
                if let Some(parent) = parent {
                    if let Some(result) = self.try_call_object_method(parent, name.name, &evaluated, span)? {
                        return Ok(result);
                    }
                }
                // method declared on the superclass of the defining level
                let class = self.heap.obj(level).class;
                let superclass = self.classes.get(class).superclass;
                if let Some(superclass) = superclass {
                    if let Some((declaring, def)) = self.classes.find_method(superclass, name.name) {
                        let module = self.classes.get(declaring).module.unwrap_or(ctx.module);
                        let frame = match self.modules.get(module.index()).and_then(|r| r.obj) {
                            Some(o) => self.heap.obj(o).frame,
                            None => ctx.frame,
                        };
                        return self.call_method(&def, frame, ctx.this.clone(), ctx.owner, module, evaluated, span);
                    }
                }
                Err(EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&self.interns.get(name.name)])
                    .with_span(span))
            }
            Expr::SuperSubscript { index } => {
                let level = self.owner_or_error(ctx, span)?;
                let key = self.eval_expr(index, ctx)?;
                let holder = self.this_object(ctx, span)?;
                let parent = self.heap.obj(level).parent.ok_or_else(|| {
                    EvalError::new(ErrorKind::UndefinedProperty, "there is no super level here").with_span(span)
                })?;
                if let (Value::Int(i), ObjKind::Listing | ObjKind::Dynamic) = (&key, self.heap.obj(parent).kind) {
                    let index = usize::try_from(*i).ok();
                    if let Some(index) = index {
                        if let Some((super_level, member)) = self.heap.lookup_element(parent, index) {
                            return self.eval_member(holder, super_level, &member, &MemberKey::Element(index));
                        }
                    }
                }
                let Some((super_level, member)) = self.heap.lookup_entry(parent, &key) else {
                    let shown = self.display_value(&key)?;
                    return Err(
                        EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&shown]).with_span(span)
                    );
                };
                self.eval_member(holder, super_level, &member, &MemberKey::Entry(key))
            }
            Expr::Not(inner) => {
                let value = self.eval_expr(inner, ctx)?;
                match value.as_bool() {
                    Some(b) => Ok(Value::Bool(!b)),
                    None => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("operator `!` expects a Boolean, got {}", self.type_name_of(&value)),
                    )
                    .with_span(span)),
                }
            }
            Expr::Neg(inner) => {
                let value = self.eval_expr(inner, ctx)?;
                match value {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"-"]).with_span(span)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Duration(d) => Ok(Value::Duration(Duration::new(-d.value, d.unit))),
                    Value::DataSize(d) => Ok(Value::DataSize(DataSize::new(-d.value, d.unit))),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("operator `-` expects a number, got {}", self.type_name_of(&other)),
                    )
                    .with_span(span)),
                }
            }
            Expr::NonNull(inner) => {
                let value = self.eval_expr(inner, ctx)?;
                if value.is_null() {
                    Err(EvalError::keyed(ErrorKind::TypeMismatch, "usedNullValue", &[]).with_span(span))
                } else {
                    Ok(value)
                }
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs, ctx, span),
            Expr::TypeTest { expr: inner, ty } => {
                let value = self.eval_expr(inner, ctx)?;
                let check = self.check_type(&value, ty, ctx.module, &[])?;
                Ok(Value::Bool(matches!(check, Check::Ok)))
            }
            Expr::TypeCast { expr: inner, ty } => {
                let value = self.eval_expr(inner, ctx)?;
                match self.check_type(&value, ty, ctx.module, &[])? {
                    Check::Ok => Ok(value),
                    Check::Mismatch(m) => Err(self.mismatch_error(m, span)),
                }
            }
            Expr::If { cond, then, otherwise } => {
                let value = self.eval_expr(cond, ctx)?;
                match value.as_bool() {
                    Some(true) => self.eval_expr(then, ctx),
                    Some(false) => self.eval_expr(otherwise, ctx),
                    None => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("the condition of `if` must be a Boolean, got {}", self.type_name_of(&value)),
                    )
                    .with_span(span)),
                }
            }
            Expr::Let { param, value, body, slot } => {
                let bound = self.eval_expr(value, ctx)?;
                if let Some(ty) = &param.type_ann {
                    match self.check_type(&bound, ty, ctx.module, &[])? {
                        Check::Ok => {}
                        Check::Mismatch(m) => return Err(self.mismatch_error(m, span)),
                    }
                }
                self.heap.frame_mut(ctx.frame).set_local(*slot, bound);
                self.eval_expr(body, ctx)
            }
            Expr::Throw(inner) => {
                let value = self.eval_expr(inner, ctx)?;
                let message = self.string_of(&value)?;
                Err(EvalError::new(ErrorKind::UserError, message).with_span(span))
            }
            Expr::Trace { expr: inner, text } => {
                let value = self.eval_expr(inner, ctx)?;
                let rendered = match self.export_value(&value) {
                    Ok(object) => object.to_string(),
                    Err(err) => format!("<error: {}>", err.message),
                };
                self.tracer.on_trace(text, &rendered);
                Ok(value)
            }
            Expr::Read { uri, mode } => {
                let value = self.eval_expr(uri, ctx)?;
                let Some(reference) = value.as_str() else {
                    return Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("`read` expects a String, got {}", self.type_name_of(&value)),
                    )
                    .with_span(span));
                };
                self.read_resource(reference, *mode, ctx, span)
            }
            Expr::ImportExpr { uri, glob } => self.import_value(uri, *glob, ctx.module, span),
            Expr::New { ty, body } => self.new_object(ty.as_deref(), body, ctx, span),
            Expr::Amendable(inner) => self.eval_expr(inner, ctx),
            Expr::Amend { base, body } => {
                let value = self.eval_expr(base, ctx)?;
                self.amend_value(value, body, ctx, span)
            }
            Expr::FunctionLit { params, body } => {
                let func = FuncData {
                    params: params.clone(),
                    body: Rc::clone(body),
                    frame: ctx.frame,
                    this: ctx.this.clone(),
                    owner: ctx.owner,
                    module: ctx.module,
                    amend_body: None,
                };
                Ok(Value::Func(self.heap.alloc_func(func)))
            }
        }
    }

    fn read_local(&self, frame: FrameId, depth: u16, slot: u16, ident: &Identifier, span: Span) -> EvalResult<Value> {
        let mut current = frame;
        for _ in 0..depth {
            current = self.heap.frame(current).parent.ok_or_else(|| {
                EvalError::new(ErrorKind::Bug, "frame depth out of range").with_span(span)
            })?;
        }
        self.heap
            .frame(current)
            .local(slot)
            .cloned()
            .ok_or_else(|| {
                EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&self.interns.get(ident.name)])
                    .with_span(span)
            })
    }

    fn owner_or_error(&self, ctx: &Ctx, span: Span) -> EvalResult<ObjId> {
        ctx.owner
            .ok_or_else(|| EvalError::new(ErrorKind::Bug, "`super` outside of an object body").with_span(span))
    }

    fn this_object(&self, ctx: &Ctx, span: Span) -> EvalResult<ObjId> {
        match &ctx.this {
            Value::Obj(id) => Ok(*id),
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!("`this` is not an object here (it is {})", self.type_name_of(other)),
            )
            .with_span(span)),
        }
    }

    // ---- imports and resources ----

    fn import_by_index(&mut self, module: ModuleId, index: u16, span: Span) -> EvalResult<Value> {
        let import = self.modules[module.index()].imports[index as usize].clone();
        self.import_value(&import.uri, import.glob, module, span)
    }

    /// `import` loads a module; `import*` builds a mapping whose entries
    /// load lazily on first access.
    pub(crate) fn import_value(&mut self, reference: &str, glob: bool, module: ModuleId, span: Span) -> EvalResult<Value> {
        if glob {
            let base = Rc::clone(&self.modules[module.index()].uri);
            let matches = self
                .loader
                .resolve_glob(&base, reference)
                .map_err(|e| e.with_span(span))?;
            let frame = {
                let obj = self.module_object(module)?;
                self.heap.obj(obj).frame
            };
            let mut data = ObjData::empty(ObjKind::Mapping, builtin::MAPPING, frame);
            for (key, uri) in matches {
                let member = ObjMember {
                    frame,
                    body: MemberBody::Expr(Rc::new(ExprLoc {
                        expr: Expr::ImportExpr {
                            uri: uri.into(),
                            glob: false,
                        },
                        span,
                    })),
                    type_ann: None,
                    modifiers: Modifiers::default(),
                    span,
                    module,
                };
                data.entries.push((Value::Str(key.into()), member));
            }
            return Ok(Value::Obj(self.heap.alloc_object(data)));
        }
        let id = self.load_module(reference, Some(module)).map_err(|e| e.with_span(span))?;
        let obj = self.module_object(id)?;
        Ok(Value::Obj(obj))
    }

    fn read_resource(&mut self, reference: &str, mode: ReadMode, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        self.limits.check_suspension_point()?;
        let base = Rc::clone(&self.modules[ctx.module.index()].uri);
        match mode {
            ReadMode::Fail | ReadMode::OrNull => {
                let uri = self.resources.resolve(&base, reference);
                self.security.check_resource(&uri).map_err(|e| e.with_span(span))?;
                if let Some(path) = modules::file_uri_to_path(&uri) {
                    self.security.check_path_confinement(&path).map_err(|e| e.with_span(span))?;
                }
                match self.resources.read(&uri) {
                    Ok(resource) => {
                        self.tracer.on_resource_read(&uri);
                        self.resource_object(&resource.uri, resource.bytes)
                    }
                    Err(_) if mode == ReadMode::OrNull => Ok(Value::Null),
                    Err(err) => Err(err.with_span(span)),
                }
            }
            ReadMode::Glob => {
                let matches = self
                    .resources
                    .resolve_glob(&base, reference)
                    .map_err(|e| e.with_span(span))?;
                let frame = ctx.frame;
                let mut data = ObjData::empty(ObjKind::Mapping, builtin::MAPPING, frame);
                for (key, uri) in matches {
                    let member = ObjMember {
                        frame,
                        body: MemberBody::Expr(Rc::new(ExprLoc {
                            expr: Expr::Read {
                                uri: Box::new(ExprLoc {
                                    expr: Expr::Str(vec![StrPart::Text(uri.into())]),
                                    span,
                                }),
                                mode: ReadMode::Fail,
                            },
                            span,
                        })),
                        type_ann: None,
                        modifiers: Modifiers::default(),
                        span,
                        module: ctx.module,
                    };
                    data.entries.push((Value::Str(key.into()), member));
                }
                Ok(Value::Obj(self.heap.alloc_object(data)))
            }
        }
    }

    /// Builds the `Resource { uri, text, base64, bytes }` view.
    fn resource_object(&mut self, uri: &str, bytes: Vec<u8>) -> EvalResult<Value> {
        let resource = crate::resource::Resource {
            uri: uri.to_owned(),
            bytes,
        };
        let text = resource.text().ok();
        let frame = self.heap.alloc_frame(Frame {
            parent: None,
            owner: None,
            receiver: None,
            module: ModuleId::REPL,
            locals: Vec::new(),
        });
        let mut data = ObjData::empty(ObjKind::Typed, builtin::RESOURCE, frame);
        let fields = [
            ("uri", Value::Str(resource.uri.clone().into())),
            ("text", text.map_or(Value::Null, |t| Value::Str(t.into()))),
            ("base64", Value::Str(resource.base64().into())),
            ("bytes", Value::Bytes(resource.bytes.into())),
        ];
        for (name, value) in fields {
            let name = self.interns.intern(name);
            data.props.insert(
                name,
                ObjMember {
                    frame,
                    body: MemberBody::Const(value),
                    type_ann: None,
                    modifiers: Modifiers::default(),
                    span: Span::default(),
                    module: ModuleId::REPL,
                },
            );
        }
        Ok(Value::Obj(self.heap.alloc_object(data)))
    }

    // ---- new / builtins ----

    fn new_object(&mut self, ty: Option<&TypeExpr>, body: &Rc<ObjectBody>, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        let class_id = match ty {
            None => builtin::DYNAMIC,
            Some(t) => self
                .resolve_class_type(t, ctx.module)
                .map_err(|e| e.with_span(span))?,
        };
        let (kind, parent) = if class_id == builtin::DYNAMIC {
            (ObjKind::Dynamic, None)
        } else if class_id == builtin::LISTING || self.classes.is_subclass(class_id, builtin::LISTING) {
            (ObjKind::Listing, None)
        } else if class_id == builtin::MAPPING || self.classes.is_subclass(class_id, builtin::MAPPING) {
            (ObjKind::Mapping, None)
        } else {
            let proto = self.class_prototype(class_id).map_err(|e| e.with_span(span))?;
            (ObjKind::Typed, Some(proto))
        };
        let obj = self.build_object(body, parent, kind, class_id, ctx)?;
        Ok(Value::Obj(obj))
    }

    fn call_builtin(&mut self, builtin_fn: Builtin, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        match builtin_fn {
            Builtin::List => Ok(Value::List(Rc::new(args))),
            Builtin::Set => {
                let mut out: Vec<Value> = Vec::with_capacity(args.len());
                for arg in args {
                    let mut duplicate = false;
                    for existing in &out {
                        if self.values_equal(existing, &arg)? {
                            duplicate = true;
                            break;
                        }
                    }
                    if !duplicate {
                        out.push(arg);
                    }
                }
                Ok(Value::Set(Rc::new(out)))
            }
            Builtin::Map => {
                if args.len() % 2 != 0 {
                    return Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        "`Map` expects an even number of arguments (alternating keys and values)",
                    )
                    .with_span(span));
                }
                let mut map = ValueMap::new();
                let mut iter = args.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    map.insert(k, v);
                }
                Ok(Value::Map(Rc::new(map)))
            }
            Builtin::Pair => {
                let count = args.len();
                let mut iter = args.into_iter();
                match (iter.next(), iter.next(), iter.next()) {
                    (Some(a), Some(b), None) => Ok(Value::Pair(Rc::new((a, b)))),
                    _ => Err(EvalError::keyed(ErrorKind::TypeMismatch, "wrongArity", &[&2, &count]).with_span(span)),
                }
            }
            Builtin::IntSeq => {
                let ints: Option<Vec<i64>> = args.iter().map(Value::as_int).collect();
                match ints.as_deref() {
                    Some([start, end]) => Ok(Value::IntSeq(IntSeq::new(*start, *end))),
                    _ => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        "`IntSeq` expects two Int arguments",
                    )
                    .with_span(span)),
                }
            }
            Builtin::Regex => {
                let Some(Value::Str(pattern)) = args.first() else {
                    return Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        "`Regex` expects a String argument",
                    )
                    .with_span(span));
                };
                let compiled = regex::Regex::new(pattern).map_err(|err| {
                    EvalError::keyed(ErrorKind::TypeMismatch, "invalidRegex", &[&pattern, &err]).with_span(span)
                })?;
                Ok(Value::Regex(Rc::new(RegexValue {
                    pattern: Rc::clone(pattern),
                    compiled,
                })))
            }
        }
    }

    // ---- operators ----

    fn eval_binary(&mut self, op: BinOp, lhs: &ExprLoc, rhs: &ExprLoc, ctx: &Ctx, span: Span) -> EvalResult<Value> {
        // short-circuiting forms first
        match op {
            BinOp::And => {
                let left = self.eval_expr(lhs, ctx)?;
                return match left.as_bool() {
                    Some(false) => Ok(Value::Bool(false)),
                    Some(true) => {
                        let right = self.eval_expr(rhs, ctx)?;
                        right.as_bool().map(Value::Bool).ok_or_else(|| {
                            self.bool_operand_error("&&", &right, span)
                        })
                    }
                    None => Err(self.bool_operand_error("&&", &left, span)),
                };
            }
            BinOp::Or => {
                let left = self.eval_expr(lhs, ctx)?;
                return match left.as_bool() {
                    Some(true) => Ok(Value::Bool(true)),
                    Some(false) => {
                        let right = self.eval_expr(rhs, ctx)?;
                        right.as_bool().map(Value::Bool).ok_or_else(|| {
                            self.bool_operand_error("||", &right, span)
                        })
                    }
                    None => Err(self.bool_operand_error("||", &left, span)),
                };
            }
            BinOp::Coalesce => {
                let left = self.eval_expr(lhs, ctx)?;
                return if left.is_null() { self.eval_expr(rhs, ctx) } else { Ok(left) };
            }
            BinOp::Pipe => {
                let left = self.eval_expr(lhs, ctx)?;
                let right = self.eval_expr(rhs, ctx)?;
                return match right {
                    Value::Func(f) => self.call_function(f, vec![left], span),
                    other => Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        format!("the right side of `|>` must be a function, got {}", self.type_name_of(&other)),
                    )
                    .with_span(span)),
                };
            }
            _ => {}
        }
        let left = self.eval_expr(lhs, ctx)?;
        let right = self.eval_expr(rhs, ctx)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(self.values_equal(&left, &right)?)),
            BinOp::NotEq => Ok(Value::Bool(!self.values_equal(&left, &right)?)),
            BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq => {
                let ordering = self.compare_values(&left, &right, span)?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::LtEq => ordering.is_le(),
                    _ => ordering.is_ge(),
                }))
            }
            BinOp::Add => self.arith_add(left, right, span),
            BinOp::Sub => self.arith_sub(left, right, span),
            BinOp::Mul => self.arith_mul(left, right, span),
            BinOp::Div => self.arith_div(left, right, span),
            BinOp::IntDiv => self.arith_int_div(left, right, span),
            BinOp::Rem => self.arith_rem(left, right, span),
            BinOp::Pow => self.arith_pow(left, right, span),
            BinOp::And | BinOp::Or | BinOp::Coalesce | BinOp::Pipe => unreachable!("handled above"),
        }
    }

    fn bool_operand_error(&self, op: &str, value: &Value, span: Span) -> Box<EvalError> {
        EvalError::new(
            ErrorKind::TypeMismatch,
            format!("operator `{op}` expects Boolean operands, got {}", self.type_name_of(value)),
        )
        .with_span(span)
    }

    fn numeric_operand_error(&self, op: &str, value: &Value, span: Span) -> Box<EvalError> {
        EvalError::new(
            ErrorKind::TypeMismatch,
            format!("operator `{op}` cannot be applied to a value of type {}", self.type_name_of(value)),
        )
        .with_span(span)
    }

    fn arith_add(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"+"]).with_span(span)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric") + right.as_f64().expect("numeric"),
            )),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}").into())),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.as_ref().clone();
                out.extend(b.iter().cloned());
                Ok(Value::List(Rc::new(out)))
            }
            (Value::Set(a), Value::Set(b)) => {
                let mut out = a.as_ref().clone();
                for item in b.iter() {
                    let mut duplicate = false;
                    for existing in &out {
                        if self.values_equal(existing, item)? {
                            duplicate = true;
                            break;
                        }
                    }
                    if !duplicate {
                        out.push(item.clone());
                    }
                }
                Ok(Value::Set(Rc::new(out)))
            }
            (Value::Map(a), Value::Map(b)) => {
                let mut out = ValueMap::new();
                for (k, v) in a.entries.iter().chain(b.entries.iter()) {
                    out.insert(k.clone(), v.clone());
                }
                Ok(Value::Map(Rc::new(out)))
            }
            (Value::Duration(a), Value::Duration(b)) => {
                Ok(Value::Duration(Duration::new(a.value + b.to_unit(a.unit).value, a.unit)))
            }
            (Value::DataSize(a), Value::DataSize(b)) => {
                Ok(Value::DataSize(DataSize::new(a.value + b.to_unit(a.unit).value, a.unit)))
            }
            _ => Err(self.numeric_operand_error("+", &left, span)),
        }
    }

    fn arith_sub(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"-"]).with_span(span)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric") - right.as_f64().expect("numeric"),
            )),
            (Value::Duration(a), Value::Duration(b)) => {
                Ok(Value::Duration(Duration::new(a.value - b.to_unit(a.unit).value, a.unit)))
            }
            (Value::DataSize(a), Value::DataSize(b)) => {
                Ok(Value::DataSize(DataSize::new(a.value - b.to_unit(a.unit).value, a.unit)))
            }
            _ => Err(self.numeric_operand_error("-", &left, span)),
        }
    }

    fn arith_mul(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_mul(*b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"*"]).with_span(span)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric") * right.as_f64().expect("numeric"),
            )),
            (Value::Duration(d), other) | (other, Value::Duration(d)) => match other.as_f64() {
                Some(factor) => Ok(Value::Duration(Duration::new(d.value * factor, d.unit))),
                None => Err(self.numeric_operand_error("*", other, span)),
            },
            (Value::DataSize(d), other) | (other, Value::DataSize(d)) => match other.as_f64() {
                Some(factor) => Ok(Value::DataSize(DataSize::new(d.value * factor, d.unit))),
                None => Err(self.numeric_operand_error("*", other, span)),
            },
            _ => Err(self.numeric_operand_error("*", &left, span)),
        }
    }

    fn arith_div(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric") / right.as_f64().expect("numeric"),
            )),
            (Value::Duration(a), Value::Duration(b)) => Ok(Value::Float(a.total_nanos() / b.total_nanos())),
            (Value::Duration(a), other) => match other.as_f64() {
                Some(divisor) => Ok(Value::Duration(Duration::new(a.value / divisor, a.unit))),
                None => Err(self.numeric_operand_error("/", other, span)),
            },
            (Value::DataSize(a), Value::DataSize(b)) => Ok(Value::Float(a.total_bytes() / b.total_bytes())),
            (Value::DataSize(a), other) => match other.as_f64() {
                Some(divisor) => Ok(Value::DataSize(DataSize::new(a.value / divisor, a.unit))),
                None => Err(self.numeric_operand_error("/", other, span)),
            },
            _ => Err(self.numeric_operand_error("/", &left, span)),
        }
    }

    fn arith_int_div(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(EvalError::keyed(ErrorKind::ArithmeticError, "divisionByZero", &[]).with_span(span));
                }
                a.checked_div(*b).map(Value::Int).ok_or_else(|| {
                    EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"~/"]).with_span(span)
                })
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let quotient = left.as_f64().expect("numeric") / right.as_f64().expect("numeric");
                if !quotient.is_finite() {
                    return Err(EvalError::keyed(ErrorKind::ArithmeticError, "divisionByZero", &[]).with_span(span));
                }
                Ok(Value::Int(quotient.trunc() as i64))
            }
            _ => Err(self.numeric_operand_error("~/", &left, span)),
        }
    }

    fn arith_rem(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                if *b == 0 {
                    return Err(EvalError::keyed(ErrorKind::ArithmeticError, "divisionByZero", &[]).with_span(span));
                }
                a.checked_rem(*b).map(Value::Int).ok_or_else(|| {
                    EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"%"]).with_span(span)
                })
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric") % right.as_f64().expect("numeric"),
            )),
            _ => Err(self.numeric_operand_error("%", &left, span)),
        }
    }

    fn arith_pow(&mut self, left: Value, right: Value, span: Span) -> EvalResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => {
                let exponent = u32::try_from(*b).map_err(|_| {
                    EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"**"]).with_span(span)
                })?;
                a.checked_pow(exponent).map(Value::Int).ok_or_else(|| {
                    EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"**"]).with_span(span)
                })
            }
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Float(
                left.as_f64().expect("numeric").powf(right.as_f64().expect("numeric")),
            )),
            _ => Err(self.numeric_operand_error("**", &left, span)),
        }
    }

    fn compare_values(&mut self, left: &Value, right: &Value, span: Span) -> EvalResult<std::cmp::Ordering> {
        let ordering = match (left, right) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => left
                .as_f64()
                .expect("numeric")
                .partial_cmp(&right.as_f64().expect("numeric")),
            (Value::Str(a), Value::Str(b)) => Some(a.as_ref().cmp(b.as_ref())),
            (Value::Duration(a), Value::Duration(b)) => a.partial_cmp(b),
            (Value::DataSize(a), Value::DataSize(b)) => a.partial_cmp(b),
            _ => None,
        };
        ordering.ok_or_else(|| {
            EvalError::new(
                ErrorKind::TypeMismatch,
                format!(
                    "values of types {} and {} cannot be compared",
                    self.type_name_of(left),
                    self.type_name_of(right)
                ),
            )
            .with_span(span)
        })
    }

    /// Deep equality; forcing object members as needed.
    pub(crate) fn values_equal(&mut self, left: &Value, right: &Value) -> EvalResult<bool> {
        if left.same(right) {
            return Ok(true);
        }
        match (left, right) {
            (Value::Obj(_), _) | (_, Value::Obj(_)) | (Value::Map(_), _) | (_, Value::Map(_))
            | (Value::List(_), _) | (_, Value::List(_)) | (Value::Set(_), _) | (_, Value::Set(_))
            | (Value::Pair(_), _) | (_, Value::Pair(_)) => {
                if std::mem::discriminant(left) != std::mem::discriminant(right)
                    && !(matches!(left, Value::Obj(_)) && matches!(right, Value::Obj(_)))
                {
                    return Ok(false);
                }
                let a = self.export_value(left)?;
                let b = self.export_value(right)?;
                Ok(export_equal(&a, &b))
            }
            _ => Ok(false),
        }
    }

    // ---- value property/method dispatch ----

    pub(crate) fn prop_on_value(&mut self, receiver: &Value, name: StringId, span: Span) -> EvalResult<Value> {
        if let Value::Obj(obj) = receiver {
            if self.heap.lookup_prop(*obj, name, false).is_some() {
                return self.force_prop(*obj, name, false, span);
            }
            if name == self.names.default {
                if let Some(member) = self.heap.lookup_default(*obj) {
                    return self.eval_member(*obj, *obj, &member, &MemberKey::Prop(name));
                }
            }
        }
        let name_text = self.interns.get(name).to_owned();
        if let Some(value) = stdlib::value_property(self, receiver, &name_text, span)? {
            return Ok(value);
        }
        Err(EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&name_text]).with_span(span))
    }

    fn call_on_value(&mut self, receiver: &Value, name: &Identifier, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        if let Value::Obj(obj) = receiver {
            if let Some(result) = self.try_call_object_method(*obj, name.name, &args, span)? {
                return Ok(result);
            }
        }
        let name_text = self.interns.get(name.name).to_owned();
        if let Some(result) = stdlib::value_method(self, receiver, &name_text, &args, span)? {
            return Ok(result);
        }
        // a property holding a function value
        if let Value::Obj(obj) = receiver {
            if self.heap.lookup_prop(*obj, name.name, false).is_some() {
                let value = self.force_prop(*obj, name.name, false, span)?;
                if let Value::Func(f) = value {
                    return self.call_function(f, args, span);
                }
            }
        }
        Err(EvalError::keyed(ErrorKind::UndefinedProperty, "cannotFindMember", &[&name_text]).with_span(span))
    }

    pub(crate) fn subscript(&mut self, receiver: &Value, key: &Value, span: Span) -> EvalResult<Value> {
        match receiver {
            Value::List(items) | Value::Set(items) => {
                let index = key.as_int().and_then(|i| usize::try_from(i).ok());
                match index.and_then(|i| items.get(i)) {
                    Some(v) => Ok(v.clone()),
                    None => Err(EvalError::new(
                        ErrorKind::UndefinedProperty,
                        format!("index {} is out of range", self.display_value(key)?),
                    )
                    .with_span(span)),
                }
            }
            Value::Map(map) => map.get(key).cloned().ok_or_else(|| {
                EvalError::new(
                    ErrorKind::UndefinedProperty,
                    format!("cannot find key {} in map", self.display_value(key).unwrap_or_default()),
                )
                .with_span(span)
            }),
            Value::Bytes(bytes) => {
                let index = key.as_int().and_then(|i| usize::try_from(i).ok());
                match index.and_then(|i| bytes.get(i)) {
                    Some(b) => Ok(Value::Int(i64::from(*b))),
                    None => Err(EvalError::new(ErrorKind::UndefinedProperty, "byte index out of range").with_span(span)),
                }
            }
            Value::Pair(pair) => match key.as_int() {
                Some(0) => Ok(pair.0.clone()),
                Some(1) => Ok(pair.1.clone()),
                _ => Err(EvalError::new(ErrorKind::UndefinedProperty, "pair index must be 0 or 1").with_span(span)),
            },
            Value::Obj(obj) => {
                let kind = self.heap.obj(*obj).kind;
                if matches!(kind, ObjKind::Listing | ObjKind::Dynamic) {
                    if let Some(index) = key.as_int().and_then(|i| usize::try_from(i).ok()) {
                        if index < self.heap.obj(*obj).total_elements {
                            return self.force_element(*obj, index, span);
                        }
                        if kind == ObjKind::Listing {
                            return Err(EvalError::new(
                                ErrorKind::UndefinedProperty,
                                format!("element index {index} is out of range"),
                            )
                            .with_span(span));
                        }
                    }
                }
                self.force_entry(*obj, key, span)
            }
            other => Err(EvalError::new(
                ErrorKind::TypeMismatch,
                format!("a value of type {} cannot be subscripted", self.type_name_of(other)),
            )
            .with_span(span)),
        }
    }

    // ---- export ----

    /// Deep-forces a value into the public tree. Local and hidden members
    /// are not exported.
    pub(crate) fn export_value(&mut self, value: &Value) -> EvalResult<Object> {
        Ok(match value {
            Value::Null => Object::Null,
            Value::Bool(b) => Object::Bool(*b),
            Value::Int(i) => Object::Int(*i),
            Value::Float(f) => Object::Float(*f),
            Value::Str(s) => Object::String(s.to_string()),
            Value::Bytes(b) => Object::Bytes(b.to_vec()),
            Value::Duration(d) => Object::Duration {
                value: d.value,
                unit: d.unit.to_string(),
            },
            Value::DataSize(d) => Object::DataSize {
                value: d.value,
                unit: d.unit.to_string(),
            },
            Value::Pair(pair) => Object::Pair(Box::new((self.export_value(&pair.0)?, self.export_value(&pair.1)?))),
            Value::Regex(r) => Object::Regex(r.pattern.to_string()),
            Value::IntSeq(seq) => Object::IntSeq {
                start: seq.start,
                end: seq.end,
                step: seq.step,
            },
            Value::List(items) => Object::List(
                items
                    .iter()
                    .map(|v| self.export_value(v))
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            Value::Set(items) => Object::Set(
                items
                    .iter()
                    .map(|v| self.export_value(v))
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            Value::Map(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in &map.entries {
                    entries.push((self.export_value(k)?, self.export_value(v)?));
                }
                Object::Map(entries)
            }
            Value::Obj(obj) => self.export_object(*obj)?,
            Value::Func(_) => Object::Function,
            Value::Class(id) => Object::Class(self.classes.get(*id).qualified_name.clone()),
            Value::TypeAlias(id) => Object::TypeAlias(self.classes.alias(*id).qualified_name.clone()),
        })
    }

    fn export_object(&mut self, obj: ObjId) -> EvalResult<Object> {
        let (kind, class_id) = {
            let data = self.heap.obj(obj);
            (data.kind, data.class)
        };
        let class = self.classes.get(class_id);
        let mut body = StructBody {
            class_name: class.qualified_name.clone(),
            module_uri: class.module_uri.to_string(),
            properties: Vec::new(),
            elements: Vec::new(),
            entries: Vec::new(),
        };
        for name in self.heap.prop_names(obj) {
            let value = self.force_prop(obj, name, false, Span::default())?;
            let exported = self.export_value(&value)?;
            body.properties.push((self.interns.get(name).to_owned(), exported));
        }
        let total = self.heap.obj(obj).total_elements;
        for index in 0..total {
            let value = self.force_element(obj, index, Span::default())?;
            body.elements.push(self.export_value(&value)?);
        }
        for key in self.heap.entry_keys(obj) {
            let value = self.force_entry(obj, &key, Span::default())?;
            let key = self.export_value(&key)?;
            let value = self.export_value(&value)?;
            body.entries.push((key, value));
        }
        let body = Box::new(body);
        Ok(match kind {
            ObjKind::Typed => Object::Typed(body),
            ObjKind::Dynamic => Object::Dynamic(body),
            ObjKind::Listing => Object::Listing(body),
            ObjKind::Mapping => Object::Mapping(body),
            ObjKind::Module => Object::Module(body),
        })
    }

    // ---- small helpers ----

    /// Pkl's string conversion, as used by interpolation and `toString()`.
    pub(crate) fn string_of(&mut self, value: &Value) -> EvalResult<String> {
        Ok(match value {
            Value::Str(s) => s.to_string(),
            other => self.export_value(other)?.to_string(),
        })
    }

    /// A display form for error messages (strings stay quoted).
    pub(crate) fn display_value(&mut self, value: &Value) -> EvalResult<String> {
        Ok(self.export_value(value)?.to_string())
    }

    pub(crate) fn type_name_of(&self, value: &Value) -> String {
        let class = match value {
            Value::Obj(obj) => self.heap.obj(*obj).class,
            other => other.builtin_class(),
        };
        self.interns.get(self.classes.get(class).name).to_owned()
    }

    pub(crate) fn stack_frame(&self, module: ModuleId, span: Span, member: Option<String>) -> StackFrame {
        let record = &self.modules[module.index()];
        let (line, col) = line_col(&record.source, span.start);
        StackFrame {
            member,
            location: format!("{}:{line}:{col}", record.uri),
        }
    }
}

/// Structural equality over exported trees; `Function` never equals itself.
fn export_equal(a: &Object, b: &Object) -> bool {
    if matches!(a, Object::Function) || matches!(b, Object::Function) {
        return false;
    }
    a == b
}

fn member_body_of(value: &PropValue, type_ann: &Option<Rc<TypeExpr>>) -> MemberBody {
    match value {
        PropValue::Expr(expr) => MemberBody::Expr(Rc::new(expr.clone())),
        PropValue::Bodies(bodies) => MemberBody::Bodies(bodies.clone()),
        PropValue::None => {
            debug_assert!(type_ann.is_some(), "parser guarantees a type for value-less properties");
            MemberBody::TypeDefault
        }
    }
}

