//! The syntax tree produced by the parser and refined by the semantic
//! builder.
//!
//! The same node types serve both phases: the parser emits nodes whose
//! identifiers carry [`Resolution::Unresolved`]; the prepare phase rebuilds
//! the tree with every identifier resolved to a frame slot, an implicit
//! property lookup, an import, or a builtin. Member definitions are wrapped
//! in `Rc` so that object construction at runtime shares them instead of
//! cloning bodies.

use std::{cell::OnceCell, rc::Rc};

use crate::{
    classes::ClassId,
    intern::StringId,
    lexer::Span,
};

/// How an identifier reference resolves, decided by the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Not yet prepared.
    Unresolved,
    /// A frame slot: let-binding, for-variable, or parameter. `depth` is the
    /// number of enclosing frames to hop through.
    Local { depth: u16, slot: u16 },
    /// A property found by walking the implicit receivers: the current
    /// object chain, then lexically enclosing objects, then the module.
    Implicit,
    /// An imported module; index into the module's import table.
    Import(u16),
    /// A global builtin constructor function.
    Builtin(Builtin),
}

/// Global builtin constructor functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    List,
    Set,
    Map,
    Pair,
    IntSeq,
    Regex,
}

impl Builtin {
    pub(crate) fn by_name(name: &str) -> Option<Self> {
        Some(match name {
            "List" => Self::List,
            "Set" => Self::Set,
            "Map" => Self::Map,
            "Pair" => Self::Pair,
            "IntSeq" => Self::IntSeq,
            "Regex" => Self::Regex,
            _ => return None,
        })
    }
}

/// An identifier with source span and (after prepare) its resolution.
#[derive(Debug, Clone)]
pub(crate) struct Identifier {
    pub name: StringId,
    pub span: Span,
    pub resolution: Resolution,
}

impl Identifier {
    pub(crate) fn new(name: StringId, span: Span) -> Self {
        Self {
            name,
            span,
            resolution: Resolution::Unresolved,
        }
    }
}

/// Modifier flags on a declaration. Legality per declaration site is checked
/// by the prepare phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Modifiers {
    pub is_abstract: bool,
    pub is_open: bool,
    pub is_local: bool,
    pub is_hidden: bool,
    pub is_external: bool,
    pub is_fixed: bool,
    pub is_const: bool,
}

impl Modifiers {
    pub(crate) fn any(self) -> bool {
        self != Self::default()
    }
}

/// An expression with its source span.
#[derive(Debug, Clone)]
pub(crate) struct ExprLoc {
    pub expr: Expr,
    pub span: Span,
}

/// One piece of an interpolated string.
#[derive(Debug, Clone)]
pub(crate) enum StrPart {
    Text(Rc<str>),
    Interp(Box<ExprLoc>),
}

/// Binary operators, in increasing precedence tiers (see the parser).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum BinOp {
    #[strum(serialize = "??")]
    Coalesce,
    #[strum(serialize = "|>")]
    Pipe,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    LtEq,
    #[strum(serialize = ">=")]
    GtEq,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "~/")]
    IntDiv,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "**")]
    Pow,
}

/// `read` expression flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadMode {
    /// `read(uri)` — error when absent.
    Fail,
    /// `read?(uri)` — null when absent.
    OrNull,
    /// `read*(pattern)` — glob to a mapping.
    Glob,
}

/// An expression node.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// String literal; a single `Text` part for plain strings.
    Str(Vec<StrPart>),
    This,
    /// `outer` — the receiver of the enclosing object body.
    Outer,
    /// `module` — the enclosing module instance.
    ModuleRef,
    Name(Identifier),
    /// `x.name` / `x?.name`.
    Prop {
        receiver: Box<ExprLoc>,
        name: Identifier,
        nullable: bool,
    },
    /// `name(args)` (implicit receiver), `x.name(args)`, `x?.name(args)`.
    Call {
        receiver: Option<Box<ExprLoc>>,
        name: Identifier,
        args: Vec<ExprLoc>,
        nullable: bool,
    },
    /// Calling an arbitrary expression: `(f)(args)` or `makeFn()(args)`.
    ApplyCall {
        callee: Box<ExprLoc>,
        args: Vec<ExprLoc>,
    },
    /// `x[index]`.
    Subscript {
        receiver: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// `super.name` / `super.name(args)` / `super[key]`.
    SuperProp {
        name: Identifier,
    },
    SuperCall {
        name: Identifier,
        args: Vec<ExprLoc>,
    },
    SuperSubscript {
        index: Box<ExprLoc>,
    },
    Not(Box<ExprLoc>),
    Neg(Box<ExprLoc>),
    /// `x!!` — non-null assertion.
    NonNull(Box<ExprLoc>),
    Binary {
        op: BinOp,
        lhs: Box<ExprLoc>,
        rhs: Box<ExprLoc>,
    },
    /// `x is T`.
    TypeTest {
        expr: Box<ExprLoc>,
        ty: Rc<TypeExpr>,
    },
    /// `x as T`.
    TypeCast {
        expr: Box<ExprLoc>,
        ty: Rc<TypeExpr>,
    },
    If {
        cond: Box<ExprLoc>,
        then: Box<ExprLoc>,
        otherwise: Box<ExprLoc>,
    },
    /// `let (name = value) body`.
    Let {
        param: Param,
        value: Box<ExprLoc>,
        body: Box<ExprLoc>,
        /// Slot in the current frame, assigned by prepare.
        slot: u16,
    },
    Throw(Box<ExprLoc>),
    /// `trace(x)`: forces and logs `x`, then returns it. The source text of
    /// the argument is kept for the trace line.
    Trace {
        expr: Box<ExprLoc>,
        text: Rc<str>,
    },
    Read {
        uri: Box<ExprLoc>,
        mode: ReadMode,
    },
    /// `import("uri")` / `import*("glob")` in expression position.
    ImportExpr {
        uri: Rc<str>,
        glob: bool,
    },
    /// `new T? { body }`.
    New {
        ty: Option<Rc<TypeExpr>>,
        body: Rc<ObjectBody>,
    },
    /// A parenthesized expression. Kept distinct because it is the only
    /// unqualified form that a postfix `{ … }` may amend or `( … )` apply.
    Amendable(Box<ExprLoc>),
    /// `base { body }` — amendment of a parenthesized expression or of a
    /// chained amend.
    Amend {
        base: Box<ExprLoc>,
        body: Rc<ObjectBody>,
    },
    /// `(a, b) -> expr`.
    FunctionLit {
        params: Vec<Param>,
        body: Rc<ExprLoc>,
    },
}

/// A declared parameter (of a method, lambda, or for-generator).
#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: StringId,
    pub span: Span,
    pub type_ann: Option<Rc<TypeExpr>>,
    /// Frame slot, assigned by prepare.
    pub slot: u16,
}

/// A type written in source, executed as a predicate by the checker.
///
/// Class references resolve lazily: `resolved` is filled on first use so
/// types may refer to classes declared later in the file.
#[derive(Debug, Clone)]
pub(crate) enum TypeExpr {
    /// Nominal reference: `Foo`, `mod.Foo`, `Foo<A, B>`.
    Name {
        /// Dotted parts; more than one part means a member of an import.
        parts: Vec<Identifier>,
        args: Vec<Rc<TypeExpr>>,
        resolved: OnceCell<ResolvedTypeRef>,
    },
    Nullable(Rc<TypeExpr>),
    /// `A|B|…`; `default_index` marks a `*Branch` if present.
    Union {
        branches: Vec<Rc<TypeExpr>>,
        default_index: Option<usize>,
    },
    /// `T(expr, …)` — constraint predicates over a base type.
    Constrained {
        base: Rc<TypeExpr>,
        predicates: Vec<Rc<ExprLoc>>,
    },
    /// `"literal"` string-literal type.
    StringLit(Rc<str>),
    /// `(A, B) -> R`.
    Function {
        params: Vec<Rc<TypeExpr>>,
        ret: Rc<TypeExpr>,
    },
    Nothing,
    Unknown,
    /// The `module` type: the enclosing module's class.
    ModuleType,
}

/// What a nominal type name resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedTypeRef {
    Class(ClassId),
    /// Typealias index in the evaluator's alias table.
    Alias(u32),
    /// A type parameter of the enclosing class/alias, by position.
    TypeVar(u16),
}

/// The value side of a property or entry declaration.
#[derive(Debug, Clone)]
pub(crate) enum PropValue {
    /// `name = expr`.
    Expr(ExprLoc),
    /// `name { body… }` — amends the inherited value.
    Bodies(Vec<Rc<ObjectBody>>),
    /// Type-only declaration: `name: Type`; value comes from the type's
    /// default, or stays undefined.
    None,
}

/// A property declaration (module-, class-, or object-level).
#[derive(Debug)]
pub(crate) struct PropertyDef {
    pub name: StringId,
    pub span: Span,
    pub modifiers: Modifiers,
    pub doc: Option<String>,
    pub type_ann: Option<Rc<TypeExpr>>,
    pub value: PropValue,
}

/// A method declaration: `function f(a, b) = expr`.
#[derive(Debug)]
pub(crate) struct MethodDef {
    pub name: StringId,
    pub span: Span,
    pub modifiers: Modifiers,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Option<Rc<TypeExpr>>,
    /// `None` for `external` methods.
    pub body: Option<Rc<ExprLoc>>,
}

/// An object body: the members one level of an amend chain introduces.
#[derive(Debug, Default)]
pub(crate) struct ObjectBody {
    pub members: Vec<ObjectMember>,
}

/// One member of an object body.
#[derive(Debug)]
pub(crate) enum ObjectMember {
    Property(Rc<PropertyDef>),
    Method(Rc<MethodDef>),
    /// `["key"] = value` or `["key"] { … }`.
    Entry { key: Rc<ExprLoc>, value: Rc<PropValue> },
    /// An unnamed element expression.
    Element(Rc<ExprLoc>),
    /// `...expr` / `...?expr`.
    Spread {
        expr: Rc<ExprLoc>,
        nullable: bool,
        span: Span,
    },
    For(Rc<ForGenerator>),
    When(Rc<WhenGenerator>),
}

/// `for (k, v in iterable) { body }`.
#[derive(Debug)]
pub(crate) struct ForGenerator {
    pub key_param: Option<Param>,
    pub value_param: Param,
    pub iterable: ExprLoc,
    pub body: Rc<ObjectBody>,
    pub span: Span,
}

/// `when (cond) { body } else { body }`.
#[derive(Debug)]
pub(crate) struct WhenGenerator {
    pub cond: ExprLoc,
    pub body: Rc<ObjectBody>,
    pub else_body: Option<Rc<ObjectBody>>,
    pub span: Span,
}

/// A class declaration.
#[derive(Debug)]
pub(crate) struct ClassDecl {
    pub name: StringId,
    pub span: Span,
    pub modifiers: Modifiers,
    pub doc: Option<String>,
    pub type_params: Vec<StringId>,
    pub extends: Option<Rc<TypeExpr>>,
    pub properties: Vec<Rc<PropertyDef>>,
    pub methods: Vec<Rc<MethodDef>>,
}

/// A typealias declaration.
#[derive(Debug)]
pub(crate) struct TypeAliasDecl {
    pub name: StringId,
    pub span: Span,
    pub modifiers: Modifiers,
    pub doc: Option<String>,
    pub type_params: Vec<StringId>,
    pub aliased: Rc<TypeExpr>,
}

/// `import "uri"` / `import* "glob"` declaration with optional alias.
#[derive(Debug, Clone)]
pub(crate) struct ImportDecl {
    pub uri: Rc<str>,
    pub alias: Option<StringId>,
    pub glob: bool,
    pub span: Span,
}

/// The `module`/`amends`/`extends` header clause.
#[derive(Debug, Clone)]
pub(crate) struct ModuleHeader {
    /// Dotted module name, e.g. `com.example.AppConfig`.
    pub name_parts: Vec<StringId>,
    pub modifiers: Modifiers,
    pub clause: Option<ModuleClause>,
    pub doc: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum ModuleClause {
    Amends { uri: Rc<str>, span: Span },
    Extends { uri: Rc<str>, span: Span },
}

/// A top-level member of a module.
#[derive(Debug)]
pub(crate) enum ModuleMember {
    Property(Rc<PropertyDef>),
    Method(Rc<MethodDef>),
    Class(Rc<ClassDecl>),
    TypeAlias(Rc<TypeAliasDecl>),
}

/// A parsed (and later prepared) module.
#[derive(Debug)]
pub(crate) struct ModuleSyntax {
    pub header: Option<ModuleHeader>,
    pub imports: Vec<ImportDecl>,
    pub members: Vec<ModuleMember>,
}
