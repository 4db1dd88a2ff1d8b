//! The semantic builder: lowers a parsed module into its evaluable form.
//!
//! Preparation rebuilds the syntax tree with every identifier resolved to a
//! frame slot (by depth and index), an import, a builtin constructor, or an
//! implicit-receiver lookup; allocates slots for let-bindings, generator
//! variables, and parameters; registers classes and typealiases (two passes,
//! so forward references work); and enforces modifier legality per
//! declaration site. Type names inside [`TypeExpr`] nodes stay unresolved
//! here — they are resolved once, on first check, so types may refer to
//! declarations that load later.

use std::rc::Rc;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    classes::{ClassDef, ClassId, ClassTable, TypeAliasDef, builtin},
    errors::{ErrorKind, EvalError, EvalResult},
    intern::{Interns, StringId},
    lexer::Span,
    modules::ModuleId,
    syntax::{
        Builtin, ClassDecl, Expr, ExprLoc, ForGenerator, Identifier, MethodDef, ModuleClause, ModuleMember,
        ModuleSyntax, Modifiers, ObjectBody, ObjectMember, Param, PropValue, PropertyDef, Resolution, ResolvedTypeRef,
        StrPart, TypeAliasDecl, TypeExpr, WhenGenerator,
    },
};

/// A resolved `import` declaration.
#[derive(Debug, Clone)]
pub(crate) struct PreparedImport {
    /// Binding name: the alias, or the target's stem.
    pub name: StringId,
    /// Canonical target URI (for globs, the pattern resolved against the
    /// importing module).
    pub uri: Rc<str>,
    pub glob: bool,
    pub span: Span,
}

/// The module clause, with its target resolved to a canonical URI.
#[derive(Debug, Clone)]
pub(crate) enum PreparedClause {
    Amends(Rc<str>),
    Extends(Rc<str>),
}

/// Result of preparing one module.
#[derive(Debug)]
pub(crate) struct PreparedModule {
    /// Declared module name, or the stem of the URI.
    pub name: String,
    pub clause: Option<PreparedClause>,
    pub imports: Vec<PreparedImport>,
    pub properties: Vec<Rc<PropertyDef>>,
    pub methods: Vec<Rc<MethodDef>>,
    /// Classes and typealiases declared by this module, by simple name.
    pub type_names: AHashMap<StringId, ResolvedTypeRef>,
    pub modifiers: Modifiers,
}

/// Prepares a parsed module.
///
/// `resolve` turns an import reference into a canonical URI (it may probe
/// the filesystem for triple-dot references).
pub(crate) fn prepare_module(
    syntax: ModuleSyntax,
    module_uri: &str,
    module_id: ModuleId,
    interns: &mut Interns,
    classes: &mut ClassTable,
    resolve: &mut dyn FnMut(&str) -> EvalResult<String>,
) -> EvalResult<PreparedModule> {
    let name = syntax
        .header
        .as_ref()
        .filter(|h| !h.name_parts.is_empty())
        .map(|h| {
            h.name_parts
                .iter()
                .map(|p| interns.get(*p))
                .collect::<Vec<_>>()
                .join(".")
        })
        .unwrap_or_else(|| uri_stem(module_uri));

    let clause = match syntax.header.as_ref().and_then(|h| h.clause.as_ref()) {
        Some(ModuleClause::Amends { uri, span }) => Some(PreparedClause::Amends(
            resolve(uri).map_err(|e| e.with_span(*span))?.into(),
        )),
        Some(ModuleClause::Extends { uri, span }) => Some(PreparedClause::Extends(
            resolve(uri).map_err(|e| e.with_span(*span))?.into(),
        )),
        None => None,
    };
    let modifiers = syntax.header.as_ref().map(|h| h.modifiers).unwrap_or_default();

    let mut imports = Vec::with_capacity(syntax.imports.len());
    for decl in &syntax.imports {
        let uri: Rc<str> = if decl.glob {
            // glob imports resolve lazily per match; keep the pattern
            Rc::clone(&decl.uri)
        } else {
            resolve(&decl.uri).map_err(|e| e.with_span(decl.span))?.into()
        };
        let name = match decl.alias {
            Some(alias) => alias,
            None => interns.intern(&uri_stem(&decl.uri)),
        };
        imports.push(PreparedImport {
            name,
            uri,
            glob: decl.glob,
            span: decl.span,
        });
    }

    let mut prep = Prep {
        interns,
        classes,
        module_id,
        module_uri,
        scopes: Vec::new(),
        imports: imports.iter().map(|i| i.name).collect(),
        type_names: AHashMap::new(),
        type_params: Vec::new(),
    };

    // pass 1: reserve ids for classes and typealiases so forward and mutual
    // references resolve
    for member in &syntax.members {
        match member {
            ModuleMember::Class(decl) => {
                let id = prep.classes.add(placeholder_class(decl, prep.interns, module_uri, module_id));
                prep.type_names.insert(decl.name, ResolvedTypeRef::Class(id));
            }
            ModuleMember::TypeAlias(decl) => {
                let id = prep.classes.add_alias(TypeAliasDef {
                    name: decl.name,
                    qualified_name: format!("{module_uri}#{}", prep.interns.get(decl.name)),
                    type_params: decl.type_params.clone(),
                    aliased: Rc::clone(&decl.aliased),
                    module: Some(module_id),
                });
                prep.type_names.insert(decl.name, ResolvedTypeRef::Alias(id));
            }
            ModuleMember::Property(_) | ModuleMember::Method(_) => {}
        }
    }

    // pass 2: prepare bodies
    let mut properties = Vec::new();
    let mut methods = Vec::new();
    for member in syntax.members {
        match member {
            ModuleMember::Property(def) => {
                check_property_modifiers(&def, DeclSite::Module)?;
                properties.push(prep.property(&def)?);
            }
            ModuleMember::Method(def) => {
                check_method_modifiers(&def, DeclSite::Module)?;
                methods.push(prep.method(&def)?);
            }
            ModuleMember::Class(decl) => {
                let ResolvedTypeRef::Class(id) = prep.type_names[&decl.name] else {
                    unreachable!("registered in pass 1")
                };
                let prepared = prep.class(&decl)?;
                prep.classes.set(id, prepared);
                check_override_flags(prep.classes, id)?;
            }
            ModuleMember::TypeAlias(decl) => {
                let ResolvedTypeRef::Alias(id) = prep.type_names[&decl.name] else {
                    unreachable!("registered in pass 1")
                };
                let prepared = prep.typealias(&decl)?;
                prep.classes.set_alias(id, prepared);
            }
        }
    }

    let type_names = prep.type_names;
    Ok(PreparedModule {
        name,
        clause,
        imports,
        properties,
        methods,
        type_names,
        modifiers,
    })
}

/// Prepares a standalone expression evaluated against an already-loaded
/// module (REPL input, `--expression` selectors, constraint snippets).
pub(crate) fn prepare_expression(
    expr: &ExprLoc,
    imports: Vec<StringId>,
    module_uri: &str,
    module_id: ModuleId,
    interns: &mut Interns,
    classes: &mut ClassTable,
) -> EvalResult<ExprLoc> {
    let mut prep = Prep {
        interns,
        classes,
        module_id,
        module_uri,
        scopes: Vec::new(),
        imports,
        type_names: AHashMap::new(),
        type_params: Vec::new(),
    };
    prep.push_scope();
    let prepared = prep.expr(expr);
    prep.pop_scope();
    prepared
}

/// The final path segment of a URI, without its extension.
pub(crate) fn uri_stem(uri: &str) -> String {
    let last = uri.rsplit(['/', ':']).next().unwrap_or(uri);
    last.rsplit_once('.').map_or(last, |(stem, _)| stem).to_owned()
}

fn placeholder_class(decl: &ClassDecl, interns: &Interns, module_uri: &str, module: ModuleId) -> ClassDef {
    ClassDef {
        name: decl.name,
        qualified_name: format!("{module_uri}#{}", interns.get(decl.name)),
        module_uri: module_uri.into(),
        modifiers: decl.modifiers,
        superclass: Some(builtin::TYPED),
        type_params: decl.type_params.clone(),
        properties: IndexMap::new(),
        methods: AHashMap::new(),
        module: Some(module),
        doc: decl.doc.clone(),
    }
}

/// Declaration sites, for modifier legality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclSite {
    Module,
    Class,
    ObjectBody,
}

fn modifier_error(name: &str, site: DeclSite, span: Span) -> Box<EvalError> {
    let where_ = match site {
        DeclSite::Module => "a module member",
        DeclSite::Class => "a class member",
        DeclSite::ObjectBody => "an object member",
    };
    EvalError::new(
        ErrorKind::SyntaxError,
        format!("modifier `{name}` is not applicable to {where_}"),
    )
    .with_span(span)
}

fn check_property_modifiers(def: &PropertyDef, site: DeclSite) -> EvalResult<()> {
    let m = def.modifiers;
    if m.is_open {
        return Err(modifier_error("open", site, def.span));
    }
    if site == DeclSite::ObjectBody {
        if m.is_abstract {
            return Err(modifier_error("abstract", site, def.span));
        }
        if m.is_external {
            return Err(modifier_error("external", site, def.span));
        }
        if m.is_fixed {
            return Err(modifier_error("fixed", site, def.span));
        }
    }
    if m.is_abstract && matches!(def.value, PropValue::Expr(_)) {
        return Err(EvalError::new(
            ErrorKind::SyntaxError,
            "an abstract property cannot have a value",
        )
        .with_span(def.span));
    }
    Ok(())
}

fn check_method_modifiers(def: &MethodDef, site: DeclSite) -> EvalResult<()> {
    let m = def.modifiers;
    if m.is_open || m.is_hidden || m.is_fixed {
        return Err(modifier_error(
            if m.is_open {
                "open"
            } else if m.is_hidden {
                "hidden"
            } else {
                "fixed"
            },
            site,
            def.span,
        ));
    }
    if site == DeclSite::ObjectBody && !m.is_local {
        return Err(EvalError::new(
            ErrorKind::SyntaxError,
            "a method in an object body must be declared `local`",
        )
        .with_span(def.span));
    }
    Ok(())
}

/// `fixed` and `const` must propagate unchanged down the class hierarchy.
fn check_override_flags(classes: &ClassTable, id: ClassId) -> EvalResult<()> {
    let class = classes.get(id);
    let Some(superclass) = class.superclass else {
        return Ok(());
    };
    for (name, def) in &class.properties {
        for (_, inherited) in classes.property_chain(superclass, *name) {
            if inherited.modifiers.is_fixed != def.modifiers.is_fixed {
                return Err(EvalError::new(
                    ErrorKind::SyntaxError,
                    "a `fixed` property must stay `fixed` in subclasses (and vice versa)",
                )
                .with_span(def.span));
            }
            if inherited.modifiers.is_const != def.modifiers.is_const {
                return Err(EvalError::new(
                    ErrorKind::SyntaxError,
                    "a `const` property must stay `const` in subclasses (and vice versa)",
                )
                .with_span(def.span));
            }
        }
    }
    Ok(())
}

/// One static frame scope: name-to-slot bindings.
#[derive(Debug, Default)]
struct Scope {
    bindings: Vec<(StringId, u16)>,
    next_slot: u16,
}

struct Prep<'a> {
    interns: &'a mut Interns,
    classes: &'a mut ClassTable,
    module_id: ModuleId,
    module_uri: &'a str,
    scopes: Vec<Scope>,
    imports: Vec<StringId>,
    type_names: AHashMap<StringId, ResolvedTypeRef>,
    /// Type-parameter names of the enclosing class/alias declaration.
    type_params: Vec<StringId>,
}

impl Prep<'_> {
    fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: StringId) -> u16 {
        let scope = self.scopes.last_mut().expect("a scope is open");
        let slot = scope.next_slot;
        scope.next_slot += 1;
        scope.bindings.push((name, slot));
        slot
    }

    fn unbind(&mut self, name: StringId) {
        let scope = self.scopes.last_mut().expect("a scope is open");
        if let Some(pos) = scope.bindings.iter().rposition(|(n, _)| *n == name) {
            scope.bindings.remove(pos);
        }
    }

    /// Innermost-binds resolution across open frame scopes.
    fn resolve_name(&self, name: StringId) -> Resolution {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some((_, slot)) = scope.bindings.iter().rev().find(|(n, _)| *n == name) {
                return Resolution::Local {
                    depth: u16::try_from(depth).expect("scope depth fits"),
                    slot: *slot,
                };
            }
        }
        if let Some(idx) = self.imports.iter().position(|n| *n == name) {
            return Resolution::Import(u16::try_from(idx).expect("import count fits"));
        }
        Resolution::Implicit
    }

    // ---- declarations ----

    fn property(&mut self, def: &PropertyDef) -> EvalResult<Rc<PropertyDef>> {
        let type_ann = def.type_ann.as_ref().map(|t| self.type_expr(t)).transpose()?;
        let value = match &def.value {
            PropValue::Expr(expr) => {
                self.push_scope();
                let prepared = self.expr(expr);
                self.pop_scope();
                PropValue::Expr(prepared?)
            }
            PropValue::Bodies(bodies) => {
                // amend-declaration bodies evaluate in a fresh frame
                self.push_scope();
                let prepared = bodies.iter().map(|b| self.object_body(b)).collect::<EvalResult<_>>();
                self.pop_scope();
                PropValue::Bodies(prepared?)
            }
            PropValue::None => PropValue::None,
        };
        Ok(Rc::new(PropertyDef {
            name: def.name,
            span: def.span,
            modifiers: def.modifiers,
            doc: def.doc.clone(),
            type_ann,
            value,
        }))
    }

    fn method(&mut self, def: &MethodDef) -> EvalResult<Rc<MethodDef>> {
        self.push_scope();
        let mut params = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let slot = self.bind(param.name);
            params.push(Param {
                name: param.name,
                span: param.span,
                type_ann: param.type_ann.as_ref().map(|t| self.type_expr(t)).transpose()?,
                slot,
            });
        }
        let return_type = def.return_type.as_ref().map(|t| self.type_expr(t)).transpose()?;
        let body = match &def.body {
            Some(body) => Some(Rc::new(self.expr(body)?)),
            None => None,
        };
        self.pop_scope();
        Ok(Rc::new(MethodDef {
            name: def.name,
            span: def.span,
            modifiers: def.modifiers,
            doc: def.doc.clone(),
            params,
            return_type,
            body,
        }))
    }

    fn class(&mut self, decl: &ClassDecl) -> EvalResult<ClassDef> {
        let superclass = match &decl.extends {
            Some(ty) => Some(self.resolve_superclass(ty)?),
            None => Some(builtin::TYPED),
        };
        if let Some(sup) = superclass {
            let sup_def = self.classes.get(sup);
            if !(sup_def.modifiers.is_open || sup_def.modifiers.is_abstract) {
                return Err(EvalError::new(
                    ErrorKind::SyntaxError,
                    format!("cannot extend class `{}`: it is neither `open` nor `abstract`", sup_def.qualified_name),
                )
                .with_span(decl.span));
            }
        }
        self.type_params.clone_from(&decl.type_params);
        let mut properties = IndexMap::new();
        for def in &decl.properties {
            check_property_modifiers(def, DeclSite::Class)?;
            properties.insert(def.name, self.property(def)?);
        }
        let mut methods = AHashMap::new();
        for def in &decl.methods {
            check_method_modifiers(def, DeclSite::Class)?;
            methods.insert(def.name, self.method(def)?);
        }
        self.type_params.clear();
        Ok(ClassDef {
            name: decl.name,
            qualified_name: format!("{}#{}", self.module_uri, self.interns.get(decl.name)),
            module_uri: self.module_uri.into(),
            modifiers: decl.modifiers,
            superclass,
            type_params: decl.type_params.clone(),
            properties,
            methods,
            module: Some(self.module_id),
            doc: decl.doc.clone(),
        })
    }

    fn typealias(&mut self, decl: &TypeAliasDecl) -> EvalResult<TypeAliasDef> {
        self.type_params.clone_from(&decl.type_params);
        let aliased = self.type_expr(&decl.aliased)?;
        self.type_params.clear();
        Ok(TypeAliasDef {
            name: decl.name,
            qualified_name: format!("{}#{}", self.module_uri, self.interns.get(decl.name)),
            type_params: decl.type_params.clone(),
            aliased,
            module: Some(self.module_id),
        })
    }

    /// A class-level `extends` clause must name a class declared in this
    /// module or a built-in class.
    fn resolve_superclass(&mut self, ty: &TypeExpr) -> EvalResult<ClassId> {
        if let TypeExpr::Name { parts, args: _, .. } = ty {
            if parts.len() == 1 {
                let name = parts[0].name;
                if let Some(ResolvedTypeRef::Class(id)) = self.type_names.get(&name) {
                    return Ok(*id);
                }
                if let Some(id) = self.builtin_class_by_name(name) {
                    return Ok(id);
                }
            }
        }
        Err(EvalError::new(
            ErrorKind::SyntaxError,
            "a superclass must be a class declared in the same module or a built-in class",
        ))
    }

    fn builtin_class_by_name(&self, name: StringId) -> Option<ClassId> {
        crate::classes::builtin_class_named(self.interns.get(name))
    }

    // ---- object bodies ----

    fn object_body(&mut self, body: &ObjectBody) -> EvalResult<Rc<ObjectBody>> {
        let mut members = Vec::with_capacity(body.members.len());
        for member in &body.members {
            members.push(self.object_member(member)?);
        }
        Ok(Rc::new(ObjectBody { members }))
    }

    fn object_member(&mut self, member: &ObjectMember) -> EvalResult<ObjectMember> {
        Ok(match member {
            ObjectMember::Property(def) => {
                check_property_modifiers(def, DeclSite::ObjectBody)?;
                ObjectMember::Property(self.property(def)?)
            }
            ObjectMember::Method(def) => {
                check_method_modifiers(def, DeclSite::ObjectBody)?;
                ObjectMember::Method(self.method(def)?)
            }
            ObjectMember::Entry { key, value } => {
                let key = Rc::new(self.expr(key)?);
                let value = match value.as_ref() {
                    PropValue::Expr(expr) => {
                        self.push_scope();
                        let prepared = self.expr(expr);
                        self.pop_scope();
                        PropValue::Expr(prepared?)
                    }
                    PropValue::Bodies(bodies) => {
                        self.push_scope();
                        let prepared = bodies.iter().map(|b| self.object_body(b)).collect::<EvalResult<_>>();
                        self.pop_scope();
                        PropValue::Bodies(prepared?)
                    }
                    PropValue::None => PropValue::None,
                };
                ObjectMember::Entry {
                    key,
                    value: Rc::new(value),
                }
            }
            ObjectMember::Element(expr) => {
                self.push_scope();
                let prepared = self.expr(expr);
                self.pop_scope();
                ObjectMember::Element(Rc::new(prepared?))
            }
            ObjectMember::Spread { expr, nullable, span } => ObjectMember::Spread {
                expr: Rc::new(self.expr(expr)?),
                nullable: *nullable,
                span: *span,
            },
            ObjectMember::For(generator) => {
                let iterable = self.expr(&generator.iterable)?;
                self.push_scope();
                let key_param = generator.key_param.as_ref().map(|p| Param {
                    name: p.name,
                    span: p.span,
                    type_ann: None,
                    slot: self.bind(p.name),
                });
                let value_param = Param {
                    name: generator.value_param.name,
                    span: generator.value_param.span,
                    type_ann: None,
                    slot: self.bind(generator.value_param.name),
                };
                let body = self.object_body(&generator.body);
                self.pop_scope();
                ObjectMember::For(Rc::new(ForGenerator {
                    key_param,
                    value_param,
                    iterable,
                    body: body?,
                    span: generator.span,
                }))
            }
            ObjectMember::When(generator) => {
                let cond = self.expr(&generator.cond)?;
                let body = self.object_body(&generator.body)?;
                let else_body = generator
                    .else_body
                    .as_ref()
                    .map(|b| self.object_body(b))
                    .transpose()?;
                ObjectMember::When(Rc::new(WhenGenerator {
                    cond,
                    body,
                    else_body,
                    span: generator.span,
                }))
            }
        })
    }

    // ---- types ----

    fn type_expr(&mut self, ty: &TypeExpr) -> EvalResult<Rc<TypeExpr>> {
        Ok(Rc::new(match ty {
            TypeExpr::Name { parts, args, .. } => {
                let resolved = std::cell::OnceCell::new();
                if parts.len() == 1 {
                    if let Some(pos) = self.type_params.iter().position(|p| *p == parts[0].name) {
                        let _ = resolved.set(ResolvedTypeRef::TypeVar(u16::try_from(pos).expect("few params")));
                    }
                }
                TypeExpr::Name {
                    parts: parts.clone(),
                    args: args.iter().map(|a| self.type_expr(a)).collect::<EvalResult<_>>()?,
                    resolved,
                }
            }
            TypeExpr::Nullable(inner) => TypeExpr::Nullable(self.type_expr(inner)?),
            TypeExpr::Union { branches, default_index } => TypeExpr::Union {
                branches: branches.iter().map(|b| self.type_expr(b)).collect::<EvalResult<_>>()?,
                default_index: *default_index,
            },
            TypeExpr::Constrained { base, predicates } => {
                let base = self.type_expr(base)?;
                let mut prepared = Vec::with_capacity(predicates.len());
                for predicate in predicates {
                    self.push_scope();
                    let result = self.expr(predicate);
                    self.pop_scope();
                    prepared.push(Rc::new(result?));
                }
                TypeExpr::Constrained {
                    base,
                    predicates: prepared,
                }
            }
            TypeExpr::StringLit(text) => TypeExpr::StringLit(Rc::clone(text)),
            TypeExpr::Function { params, ret } => TypeExpr::Function {
                params: params.iter().map(|p| self.type_expr(p)).collect::<EvalResult<_>>()?,
                ret: self.type_expr(ret)?,
            },
            TypeExpr::Nothing => TypeExpr::Nothing,
            TypeExpr::Unknown => TypeExpr::Unknown,
            TypeExpr::ModuleType => TypeExpr::ModuleType,
        }))
    }

    // ---- expressions ----

    fn expr(&mut self, expr: &ExprLoc) -> EvalResult<ExprLoc> {
        let prepared = match &expr.expr {
            Expr::Null => Expr::Null,
            Expr::Bool(b) => Expr::Bool(*b),
            Expr::Int(i) => Expr::Int(*i),
            Expr::Float(f) => Expr::Float(*f),
            Expr::Str(parts) => Expr::Str(
                parts
                    .iter()
                    .map(|part| {
                        Ok(match part {
                            StrPart::Text(t) => StrPart::Text(Rc::clone(t)),
                            StrPart::Interp(inner) => StrPart::Interp(Box::new(self.expr(inner)?)),
                        })
                    })
                    .collect::<EvalResult<_>>()?,
            ),
            Expr::This => Expr::This,
            Expr::Outer => Expr::Outer,
            Expr::ModuleRef => Expr::ModuleRef,
            Expr::Name(ident) => Expr::Name(Identifier {
                name: ident.name,
                span: ident.span,
                resolution: self.resolve_name(ident.name),
            }),
            Expr::Prop { receiver, name, nullable } => Expr::Prop {
                receiver: Box::new(self.expr(receiver)?),
                name: name.clone(),
                nullable: *nullable,
            },
            Expr::Call {
                receiver,
                name,
                args,
                nullable,
            } => {
                let receiver = receiver.as_ref().map(|r| self.expr(r)).transpose()?.map(Box::new);
                let resolution = if receiver.is_none() {
                    match Builtin::by_name(self.interns.get(name.name)) {
                        Some(b) => Resolution::Builtin(b),
                        None => self.resolve_name(name.name),
                    }
                } else {
                    Resolution::Unresolved
                };
                Expr::Call {
                    receiver,
                    name: Identifier {
                        name: name.name,
                        span: name.span,
                        resolution,
                    },
                    args: args.iter().map(|a| self.expr(a)).collect::<EvalResult<_>>()?,
                    nullable: *nullable,
                }
            }
            Expr::ApplyCall { callee, args } => Expr::ApplyCall {
                callee: Box::new(self.expr(callee)?),
                args: args.iter().map(|a| self.expr(a)).collect::<EvalResult<_>>()?,
            },
            Expr::Subscript { receiver, index } => Expr::Subscript {
                receiver: Box::new(self.expr(receiver)?),
                index: Box::new(self.expr(index)?),
            },
            Expr::SuperProp { name } => Expr::SuperProp { name: name.clone() },
            Expr::SuperCall { name, args } => Expr::SuperCall {
                name: name.clone(),
                args: args.iter().map(|a| self.expr(a)).collect::<EvalResult<_>>()?,
            },
            Expr::SuperSubscript { index } => Expr::SuperSubscript {
                index: Box::new(self.expr(index)?),
            },
            Expr::Not(inner) => Expr::Not(Box::new(self.expr(inner)?)),
            Expr::Neg(inner) => Expr::Neg(Box::new(self.expr(inner)?)),
            Expr::NonNull(inner) => Expr::NonNull(Box::new(self.expr(inner)?)),
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)?),
                rhs: Box::new(self.expr(rhs)?),
            },
            Expr::TypeTest { expr: inner, ty } => Expr::TypeTest {
                expr: Box::new(self.expr(inner)?),
                ty: self.type_expr(ty)?,
            },
            Expr::TypeCast { expr: inner, ty } => Expr::TypeCast {
                expr: Box::new(self.expr(inner)?),
                ty: self.type_expr(ty)?,
            },
            Expr::If { cond, then, otherwise } => Expr::If {
                cond: Box::new(self.expr(cond)?),
                then: Box::new(self.expr(then)?),
                otherwise: Box::new(self.expr(otherwise)?),
            },
            Expr::Let { param, value, body, .. } => {
                let value = Box::new(self.expr(value)?);
                let type_ann = param.type_ann.as_ref().map(|t| self.type_expr(t)).transpose()?;
                let slot = self.bind(param.name);
                let body = self.expr(body);
                self.unbind(param.name);
                Expr::Let {
                    param: Param {
                        name: param.name,
                        span: param.span,
                        type_ann,
                        slot,
                    },
                    value,
                    body: Box::new(body?),
                    slot,
                }
            }
            Expr::Throw(inner) => Expr::Throw(Box::new(self.expr(inner)?)),
            Expr::Trace { expr: inner, text } => Expr::Trace {
                expr: Box::new(self.expr(inner)?),
                text: Rc::clone(text),
            },
            Expr::Read { uri, mode } => Expr::Read {
                uri: Box::new(self.expr(uri)?),
                mode: *mode,
            },
            Expr::ImportExpr { uri, glob } => Expr::ImportExpr {
                uri: Rc::clone(uri),
                glob: *glob,
            },
            Expr::New { ty, body } => Expr::New {
                ty: ty.as_ref().map(|t| self.type_expr(t)).transpose()?,
                body: self.object_body(body)?,
            },
            Expr::Amendable(inner) => Expr::Amendable(Box::new(self.expr(inner)?)),
            Expr::Amend { base, body } => Expr::Amend {
                base: Box::new(self.expr(base)?),
                body: self.object_body(body)?,
            },
            Expr::FunctionLit { params, body } => {
                self.push_scope();
                let mut prepared_params = Vec::with_capacity(params.len());
                for param in params {
                    let type_ann = param.type_ann.as_ref().map(|t| self.type_expr(t)).transpose()?;
                    prepared_params.push(Param {
                        name: param.name,
                        span: param.span,
                        type_ann,
                        slot: self.bind(param.name),
                    });
                }
                let body = self.expr(body);
                self.pop_scope();
                Expr::FunctionLit {
                    params: prepared_params,
                    body: Rc::new(body?),
                }
            }
        };
        Ok(ExprLoc {
            expr: prepared,
            span: expr.span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn prepare(source: &str) -> (PreparedModule, Interns, ClassTable) {
        let mut interns = Interns::new();
        let syntax = parse::parse_module(source, &mut interns).unwrap();
        let mut classes = ClassTable::new(&mut interns);
        let prepared = prepare_module(
            syntax,
            "repl:test",
            ModuleId::REPL,
            &mut interns,
            &mut classes,
            &mut |reference| Ok(reference.to_owned()),
        )
        .unwrap();
        (prepared, interns, classes)
    }

    #[test]
    fn let_slots_and_depth() {
        let (module, _, _) = prepare("x = let (a = 1) a + 1");
        let PropValue::Expr(expr) = &module.properties[0].value else { panic!() };
        let Expr::Let { slot, body, .. } = &expr.expr else { panic!("expected let") };
        assert_eq!(*slot, 0);
        let Expr::Binary { lhs, .. } = &body.expr else { panic!() };
        let Expr::Name(ident) = &lhs.expr else { panic!() };
        assert_eq!(ident.resolution, Resolution::Local { depth: 0, slot: 0 });
    }

    #[test]
    fn unknown_names_resolve_implicitly() {
        let (module, _, _) = prepare("x = y");
        let PropValue::Expr(expr) = &module.properties[0].value else { panic!() };
        let Expr::Name(ident) = &expr.expr else { panic!() };
        assert_eq!(ident.resolution, Resolution::Implicit);
    }

    #[test]
    fn builtin_constructor_calls() {
        let (module, _, _) = prepare("x = List(1, 2)");
        let PropValue::Expr(expr) = &module.properties[0].value else { panic!() };
        let Expr::Call { name, .. } = &expr.expr else { panic!() };
        assert_eq!(name.resolution, Resolution::Builtin(Builtin::List));
    }

    #[test]
    fn forward_class_references_register() {
        let (module, interns, classes) = prepare("class A { b: B }\nclass B { x: Int }");
        let a = interns.lookup("A").unwrap();
        let ResolvedTypeRef::Class(id) = module.type_names[&a] else { panic!() };
        assert_eq!(interns.get(classes.get(id).name), "A");
    }

    #[test]
    fn fixed_override_mismatch_is_rejected() {
        let mut interns = Interns::new();
        let syntax = parse::parse_module(
            "open class A { fixed x: Int = 1 }\nclass B extends A { x: Int = 2 }",
            &mut interns,
        )
        .unwrap();
        let mut classes = ClassTable::new(&mut interns);
        let err = prepare_module(
            syntax,
            "repl:test",
            ModuleId::REPL,
            &mut interns,
            &mut classes,
            &mut |r| Ok(r.to_owned()),
        )
        .unwrap_err();
        assert!(err.message.contains("fixed"), "{}", err.message);
    }

    #[test]
    fn generator_variable_depths() {
        let (module, _, _) = prepare("x = new Dynamic { for (v in list) { e = v } }");
        let PropValue::Expr(expr) = &module.properties[0].value else { panic!() };
        let Expr::New { body, .. } = &expr.expr else { panic!() };
        let ObjectMember::For(generator) = &body.members[0] else { panic!() };
        let ObjectMember::Property(prop) = &generator.body.members[0] else { panic!() };
        let PropValue::Expr(value) = &prop.value else { panic!() };
        let Expr::Name(ident) = &value.expr else { panic!() };
        // member body frame → generator frame
        assert_eq!(ident.resolution, Resolution::Local { depth: 1, slot: 0 });
    }
}
