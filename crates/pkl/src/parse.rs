//! Recursive-descent parser for Pkl modules and expressions.
//!
//! Binary operators are parsed with precedence climbing; everything else is
//! straight recursive descent over the token stream from [`crate::lexer`].
//! String interpolations arrive as nested token streams and are parsed by
//! re-entering the parser on each stream.
//!
//! Malformed syntax produces a `SyntaxError` carrying the error span and an
//! expected-token set; no recovery is attempted.

use std::rc::Rc;

use crate::{
    errors::{ErrorKind, EvalError, EvalResult},
    intern::Interns,
    lexer::{self, LexedPart, Span, Token, TokenKind},
    syntax::{
        BinOp, ClassDecl, Expr, ExprLoc, ForGenerator, Identifier, ImportDecl, MethodDef, ModuleClause, ModuleHeader,
        ModuleMember, ModuleSyntax, Modifiers, ObjectBody, ObjectMember, Param, PropValue, PropertyDef, ReadMode,
        StrPart, TypeAliasDecl, TypeExpr, WhenGenerator,
    },
};

/// Maximum expression nesting depth accepted by the parser, guarding against
/// stack overflow on pathological input.
const MAX_NESTING_DEPTH: u16 = 200;

/// Parses a whole module.
pub(crate) fn parse_module(source: &str, interns: &mut Interns) -> EvalResult<ModuleSyntax> {
    let tokens = lexer::tokenize(source)?;
    let mut parser = Parser::new(source, tokens, interns);
    parser.module()
}

/// Parses a single expression (REPL input, constraint snippets in tests).
pub(crate) fn parse_expression(source: &str, interns: &mut Interns) -> EvalResult<ExprLoc> {
    let tokens = lexer::tokenize(source)?;
    let mut parser = Parser::new(source, tokens, interns);
    let expr = parser.expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: u16,
    interns: &'a mut Interns,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>, interns: &'a mut Interns) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
            interns,
        }
    }

    // ---- token plumbing ----

    fn peek(&self) -> &TokenKind {
        self.tokens.get(self.pos).map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_at(&self, ahead: usize) -> &TokenKind {
        self.tokens.get(self.pos + ahead).map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map_or_else(Span::default, |t| t.span)
    }

    fn prev_span(&self) -> Span {
        self.tokens.get(self.pos.saturating_sub(1)).map_or_else(Span::default, |t| t.span)
    }

    fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or(Token { kind: TokenKind::Eof, span: self.prev_span() });
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> EvalResult<Token> {
        if self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(self.expected(&[kind.describe()]))
        }
    }

    fn expect_eof(&mut self) -> EvalResult<()> {
        while self.eat(&TokenKind::Semicolon) {}
        if matches!(self.peek(), TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.expected(&["end of input"]))
        }
    }

    /// Builds a `SyntaxError` naming the expected-token set and what was found.
    fn expected(&self, expected: &[&str]) -> Box<EvalError> {
        let found = self.peek().describe();
        let list = match expected {
            [] => String::from("something else"),
            [one] => (*one).to_owned(),
            [init @ .., last] => format!("{}, or {last}", init.join(", ")),
        };
        EvalError::new(ErrorKind::SyntaxError, format!("expected {list}, but found {found}")).with_span(self.span())
    }

    fn enter(&mut self) -> EvalResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(EvalError::new(ErrorKind::SyntaxError, "expression nesting is too deep").with_span(self.span()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn ident(&mut self) -> EvalResult<Identifier> {
        match self.peek() {
            TokenKind::Ident(_) => {
                let token = self.advance();
                let TokenKind::Ident(name) = token.kind else { unreachable!() };
                Ok(Identifier::new(self.interns.intern(&name), token.span))
            }
            _ => Err(self.expected(&["identifier"])),
        }
    }

    fn string_literal(&mut self) -> EvalResult<(Rc<str>, Span)> {
        match self.peek() {
            TokenKind::Str(parts) if parts.len() == 1 => {
                let token = self.advance();
                let TokenKind::Str(parts) = token.kind else { unreachable!() };
                match parts.into_iter().next() {
                    Some(LexedPart::Text(text)) => Ok((text.into(), token.span)),
                    _ => Err(EvalError::new(
                        ErrorKind::SyntaxError,
                        "interpolation is not allowed in this string",
                    )
                    .with_span(token.span)),
                }
            }
            TokenKind::Str(_) => Err(EvalError::new(
                ErrorKind::SyntaxError,
                "interpolation is not allowed in this string",
            )
            .with_span(self.span())),
            _ => Err(self.expected(&["string literal"])),
        }
    }

    fn take_doc(&mut self) -> Option<String> {
        if let TokenKind::DocComment(_) = self.peek() {
            let token = self.advance();
            let TokenKind::DocComment(text) = token.kind else { unreachable!() };
            Some(text)
        } else {
            None
        }
    }

    /// Parses and discards annotations (`@Name` or `@Name { … }`).
    fn skip_annotations(&mut self) -> EvalResult<()> {
        while self.eat(&TokenKind::At) {
            self.ident()?;
            while self.eat(&TokenKind::Dot) {
                self.ident()?;
            }
            if matches!(self.peek(), TokenKind::LBrace) {
                self.object_body()?;
            }
        }
        Ok(())
    }

    fn modifiers(&mut self) -> Modifiers {
        let mut m = Modifiers::default();
        loop {
            match self.peek() {
                TokenKind::KwAbstract => m.is_abstract = true,
                TokenKind::KwOpen => m.is_open = true,
                TokenKind::KwLocal => m.is_local = true,
                TokenKind::KwHidden => m.is_hidden = true,
                TokenKind::KwExternal => m.is_external = true,
                TokenKind::KwFixed => m.is_fixed = true,
                TokenKind::KwConst => m.is_const = true,
                _ => return m,
            }
            self.pos += 1;
        }
    }

    // ---- module structure ----

    fn module(&mut self) -> EvalResult<ModuleSyntax> {
        let mut header = None;
        // header: doc? annotations? modifiers? `module` name, and/or amends/extends
        let checkpoint = self.pos;
        let doc = self.take_doc();
        self.skip_annotations()?;
        let modifiers = self.modifiers();
        if matches!(self.peek(), TokenKind::KwModule) {
            self.advance();
            let mut name_parts = vec![self.ident()?.name];
            while self.eat(&TokenKind::Dot) {
                name_parts.push(self.ident()?.name);
            }
            let clause = self.module_clause()?;
            header = Some(ModuleHeader {
                name_parts,
                modifiers,
                clause,
                doc,
            });
        } else if modifiers.any() {
            // modifiers belonged to the first member, not a module header
            self.pos = checkpoint;
        } else if let Some(clause) = self.module_clause()? {
            header = Some(ModuleHeader {
                name_parts: Vec::new(),
                modifiers,
                clause: Some(clause),
                doc,
            });
        } else {
            // no header; any doc comment belongs to the first member
            self.pos = checkpoint;
        }

        let mut imports = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            let glob = match self.peek() {
                TokenKind::KwImport => false,
                TokenKind::KwImportGlob => true,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let (uri, _) = self.string_literal()?;
            let alias = if matches!(self.peek(), TokenKind::KwAs) {
                self.advance();
                Some(self.ident()?.name)
            } else {
                None
            };
            imports.push(ImportDecl { uri, alias, glob, span });
        }

        let mut members = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if matches!(self.peek(), TokenKind::Eof) {
                break;
            }
            members.push(self.module_member()?);
        }
        Ok(ModuleSyntax {
            header,
            imports,
            members,
        })
    }

    fn module_clause(&mut self) -> EvalResult<Option<ModuleClause>> {
        if let TokenKind::Ident(name) = self.peek() {
            let which = match name.as_str() {
                "amends" => true,
                "extends" => false,
                _ => return Ok(None),
            };
            // only a clause when followed by a string literal
            if matches!(self.peek_at(1), TokenKind::Str(_)) {
                let span = self.span();
                self.advance();
                let (uri, _) = self.string_literal()?;
                return Ok(Some(if which {
                    ModuleClause::Amends { uri, span }
                } else {
                    ModuleClause::Extends { uri, span }
                }));
            }
        }
        if matches!(self.peek(), TokenKind::KwExtends) && matches!(self.peek_at(1), TokenKind::Str(_)) {
            let span = self.span();
            self.advance();
            let (uri, _) = self.string_literal()?;
            return Ok(Some(ModuleClause::Extends { uri, span }));
        }
        Ok(None)
    }

    fn module_member(&mut self) -> EvalResult<ModuleMember> {
        let doc = self.take_doc();
        self.skip_annotations()?;
        let modifiers = self.modifiers();
        match self.peek() {
            TokenKind::KwClass => Ok(ModuleMember::Class(Rc::new(self.class_decl(doc, modifiers)?))),
            TokenKind::KwTypealias => Ok(ModuleMember::TypeAlias(Rc::new(self.typealias_decl(doc, modifiers)?))),
            TokenKind::KwFunction => Ok(ModuleMember::Method(Rc::new(self.method_def(doc, modifiers)?))),
            TokenKind::Ident(_) => Ok(ModuleMember::Property(Rc::new(self.property_def(doc, modifiers)?))),
            _ => Err(self.expected(&["`class`", "`typealias`", "`function`", "property declaration"])),
        }
    }

    fn class_decl(&mut self, doc: Option<String>, modifiers: Modifiers) -> EvalResult<ClassDecl> {
        let span = self.span();
        self.expect(&TokenKind::KwClass)?;
        let name = self.ident()?.name;
        let type_params = self.type_params()?;
        let extends = if self.eat(&TokenKind::KwExtends) {
            Some(Rc::new(self.type_expr()?))
        } else {
            None
        };
        let mut properties = Vec::new();
        let mut methods = Vec::new();
        if self.eat(&TokenKind::LBrace) {
            loop {
                while self.eat(&TokenKind::Semicolon) {}
                if self.eat(&TokenKind::RBrace) {
                    break;
                }
                let doc = self.take_doc();
                self.skip_annotations()?;
                let member_modifiers = self.modifiers();
                match self.peek() {
                    TokenKind::KwFunction => methods.push(Rc::new(self.method_def(doc, member_modifiers)?)),
                    TokenKind::Ident(_) => properties.push(Rc::new(self.property_def(doc, member_modifiers)?)),
                    _ => return Err(self.expected(&["`function`", "property declaration", "`}`"])),
                }
            }
        }
        Ok(ClassDecl {
            name,
            span,
            modifiers,
            doc,
            type_params,
            extends,
            properties,
            methods,
        })
    }

    fn typealias_decl(&mut self, doc: Option<String>, modifiers: Modifiers) -> EvalResult<TypeAliasDecl> {
        let span = self.span();
        self.expect(&TokenKind::KwTypealias)?;
        let name = self.ident()?.name;
        let type_params = self.type_params()?;
        self.expect(&TokenKind::Assign)?;
        let aliased = Rc::new(self.type_expr()?);
        Ok(TypeAliasDecl {
            name,
            span,
            modifiers,
            doc,
            type_params,
            aliased,
        })
    }

    fn type_params(&mut self) -> EvalResult<Vec<crate::intern::StringId>> {
        let mut params = Vec::new();
        if self.eat(&TokenKind::Lt) {
            loop {
                // variance markers `in`/`out` are accepted and ignored
                if matches!(self.peek(), TokenKind::KwIn) {
                    self.advance();
                } else if matches!(self.peek(), TokenKind::Ident(n) if n == "out") {
                    if matches!(self.peek_at(1), TokenKind::Ident(_)) {
                        self.advance();
                    }
                }
                params.push(self.ident()?.name);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Gt)?;
        }
        Ok(params)
    }

    fn method_def(&mut self, doc: Option<String>, modifiers: Modifiers) -> EvalResult<MethodDef> {
        let span = self.span();
        self.expect(&TokenKind::KwFunction)?;
        let name = self.ident()?.name;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                params.push(self.param()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let return_type = if self.eat(&TokenKind::Colon) {
            Some(Rc::new(self.type_expr()?))
        } else {
            None
        };
        let body = if self.eat(&TokenKind::Assign) {
            Some(Rc::new(self.expr()?))
        } else if modifiers.is_external {
            None
        } else {
            return Err(self.expected(&["`=`"]));
        };
        Ok(MethodDef {
            name,
            span,
            modifiers,
            doc,
            params,
            return_type,
            body,
        })
    }

    fn param(&mut self) -> EvalResult<Param> {
        let ident = self.ident()?;
        let type_ann = if self.eat(&TokenKind::Colon) {
            Some(Rc::new(self.type_expr()?))
        } else {
            None
        };
        Ok(Param {
            name: ident.name,
            span: ident.span,
            type_ann,
            slot: 0,
        })
    }

    fn property_def(&mut self, doc: Option<String>, modifiers: Modifiers) -> EvalResult<PropertyDef> {
        let ident = self.ident()?;
        let type_ann = if self.eat(&TokenKind::Colon) {
            Some(Rc::new(self.type_expr()?))
        } else {
            None
        };
        let value = if self.eat(&TokenKind::Assign) {
            PropValue::Expr(self.expr()?)
        } else if matches!(self.peek(), TokenKind::LBrace) {
            if type_ann.is_some() {
                return Err(self.expected(&["`=`"]));
            }
            let mut bodies = Vec::new();
            while matches!(self.peek(), TokenKind::LBrace) {
                bodies.push(Rc::new(self.object_body()?));
            }
            PropValue::Bodies(bodies)
        } else if type_ann.is_some() {
            PropValue::None
        } else {
            return Err(self.expected(&["`:`", "`=`", "`{`"]));
        };
        Ok(PropertyDef {
            name: ident.name,
            span: ident.span,
            modifiers,
            doc,
            type_ann,
            value,
        })
    }

    // ---- object bodies ----

    fn object_body(&mut self) -> EvalResult<ObjectBody> {
        self.enter()?;
        self.expect(&TokenKind::LBrace)?;
        let mut members = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            members.push(self.object_member()?);
        }
        self.leave();
        Ok(ObjectBody { members })
    }

    fn object_member(&mut self) -> EvalResult<ObjectMember> {
        match self.peek() {
            TokenKind::Spread | TokenKind::QSpread => {
                let span = self.span();
                let nullable = matches!(self.advance().kind, TokenKind::QSpread);
                let expr = Rc::new(self.expr()?);
                Ok(ObjectMember::Spread { expr, nullable, span })
            }
            TokenKind::LBracket => {
                self.advance();
                let key = Rc::new(self.expr()?);
                self.expect(&TokenKind::RBracket)?;
                let value = if self.eat(&TokenKind::Assign) {
                    PropValue::Expr(self.expr()?)
                } else if matches!(self.peek(), TokenKind::LBrace) {
                    let mut bodies = Vec::new();
                    while matches!(self.peek(), TokenKind::LBrace) {
                        bodies.push(Rc::new(self.object_body()?));
                    }
                    PropValue::Bodies(bodies)
                } else {
                    return Err(self.expected(&["`=`", "`{`"]));
                };
                Ok(ObjectMember::Entry {
                    key,
                    value: Rc::new(value),
                })
            }
            TokenKind::KwFor => {
                let span = self.span();
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let first = self.param()?;
                let (key_param, value_param) = if self.eat(&TokenKind::Comma) {
                    (Some(first), self.param()?)
                } else {
                    (None, first)
                };
                self.expect(&TokenKind::KwIn)?;
                let iterable = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = Rc::new(self.object_body()?);
                Ok(ObjectMember::For(Rc::new(ForGenerator {
                    key_param,
                    value_param,
                    iterable,
                    body,
                    span,
                })))
            }
            TokenKind::KwWhen => {
                let span = self.span();
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = Rc::new(self.object_body()?);
                let else_body = if self.eat(&TokenKind::KwElse) {
                    Some(Rc::new(self.object_body()?))
                } else {
                    None
                };
                Ok(ObjectMember::When(Rc::new(WhenGenerator {
                    cond,
                    body,
                    else_body,
                    span,
                })))
            }
            TokenKind::DocComment(_) => {
                let doc = self.take_doc();
                self.skip_annotations()?;
                let modifiers = self.modifiers();
                match self.peek() {
                    TokenKind::KwFunction => Ok(ObjectMember::Method(Rc::new(self.method_def(doc, modifiers)?))),
                    _ => Ok(ObjectMember::Property(Rc::new(self.property_def(doc, modifiers)?))),
                }
            }
            TokenKind::KwLocal
            | TokenKind::KwHidden
            | TokenKind::KwFixed
            | TokenKind::KwConst
            | TokenKind::KwAbstract => {
                let modifiers = self.modifiers();
                match self.peek() {
                    TokenKind::KwFunction => Ok(ObjectMember::Method(Rc::new(self.method_def(None, modifiers)?))),
                    _ => Ok(ObjectMember::Property(Rc::new(self.property_def(None, modifiers)?))),
                }
            }
            TokenKind::KwFunction => Ok(ObjectMember::Method(Rc::new(self.method_def(None, Modifiers::default())?))),
            TokenKind::Ident(_)
                if matches!(
                    self.peek_at(1),
                    TokenKind::Assign | TokenKind::Colon | TokenKind::LBrace
                ) =>
            {
                Ok(ObjectMember::Property(Rc::new(
                    self.property_def(None, Modifiers::default())?,
                )))
            }
            _ => Ok(ObjectMember::Element(Rc::new(self.expr()?))),
        }
    }

    // ---- types ----

    fn type_expr(&mut self) -> EvalResult<TypeExpr> {
        self.enter()?;
        let mut default_index = None;
        let mut branches = Vec::new();
        loop {
            if self.eat(&TokenKind::Star) {
                if default_index.is_some() {
                    return Err(EvalError::new(
                        ErrorKind::SyntaxError,
                        "a union type may mark at most one default branch",
                    )
                    .with_span(self.span()));
                }
                default_index = Some(branches.len());
            }
            branches.push(Rc::new(self.type_atom()?));
            if !self.eat(&TokenKind::Pipe) {
                break;
            }
        }
        self.leave();
        if branches.len() == 1 && default_index.is_none() {
            let only = branches.pop().expect("one branch");
            return Ok(Rc::try_unwrap(only).unwrap_or_else(|rc| (*rc).clone()));
        }
        Ok(TypeExpr::Union {
            branches,
            default_index,
        })
    }

    fn type_atom(&mut self) -> EvalResult<TypeExpr> {
        let mut ty = match self.peek() {
            TokenKind::KwNothing => {
                self.advance();
                TypeExpr::Nothing
            }
            TokenKind::KwUnknown => {
                self.advance();
                TypeExpr::Unknown
            }
            TokenKind::KwModule => {
                self.advance();
                TypeExpr::ModuleType
            }
            TokenKind::Str(_) => {
                let (text, _) = self.string_literal()?;
                TypeExpr::StringLit(text)
            }
            TokenKind::LParen => {
                // `(A, B) -> R` function type, or parenthesized type
                self.advance();
                let mut params = Vec::new();
                if !matches!(self.peek(), TokenKind::RParen) {
                    loop {
                        params.push(Rc::new(self.type_expr()?));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
                if self.eat(&TokenKind::Arrow) {
                    let ret = Rc::new(self.type_expr()?);
                    TypeExpr::Function { params, ret }
                } else if params.len() == 1 {
                    Rc::try_unwrap(params.into_iter().next().expect("one")).unwrap_or_else(|rc| (*rc).clone())
                } else {
                    return Err(self.expected(&["`->`"]));
                }
            }
            TokenKind::Ident(_) => {
                let mut parts = vec![self.ident()?];
                while matches!(self.peek(), TokenKind::Dot) && matches!(self.peek_at(1), TokenKind::Ident(_)) {
                    self.advance();
                    parts.push(self.ident()?);
                }
                let mut args = Vec::new();
                if self.eat(&TokenKind::Lt) {
                    loop {
                        args.push(Rc::new(self.type_expr()?));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::Gt)?;
                }
                TypeExpr::Name {
                    parts,
                    args,
                    resolved: std::cell::OnceCell::new(),
                }
            }
            _ => return Err(self.expected(&["type"])),
        };
        // postfix: constraints `(expr, …)` then nullable `?`
        if matches!(self.peek(), TokenKind::LParen) {
            self.advance();
            let mut predicates = Vec::new();
            loop {
                predicates.push(Rc::new(self.expr()?));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
            ty = TypeExpr::Constrained {
                base: Rc::new(ty),
                predicates,
            };
        }
        while self.eat(&TokenKind::Question) {
            ty = TypeExpr::Nullable(Rc::new(ty));
        }
        Ok(ty)
    }

    // ---- expressions ----

    fn expr(&mut self) -> EvalResult<ExprLoc> {
        self.enter()?;
        let result = self.expr_bp(0);
        self.leave();
        result
    }

    fn expr_bp(&mut self, min_bp: u8) -> EvalResult<ExprLoc> {
        let mut lhs = match self.peek() {
            TokenKind::Minus => {
                let span = self.span();
                self.advance();
                let operand = self.expr_bp(UNARY_BP)?;
                let full = span.to(operand.span);
                ExprLoc {
                    expr: Expr::Neg(Box::new(operand)),
                    span: full,
                }
            }
            TokenKind::Bang => {
                let span = self.span();
                self.advance();
                let operand = self.expr_bp(UNARY_BP)?;
                let full = span.to(operand.span);
                ExprLoc {
                    expr: Expr::Not(Box::new(operand)),
                    span: full,
                }
            }
            _ => self.postfix_expr()?,
        };
        loop {
            let (op, l_bp, r_bp) = match self.peek() {
                TokenKind::PipeGt => (BinOp::Pipe, 2, 3),
                TokenKind::Coalesce => (BinOp::Coalesce, 5, 4),
                TokenKind::PipePipe => (BinOp::Or, 6, 7),
                TokenKind::AmpAmp => (BinOp::And, 8, 9),
                TokenKind::Eq => (BinOp::Eq, 10, 11),
                TokenKind::NotEq => (BinOp::NotEq, 10, 11),
                TokenKind::KwIs | TokenKind::KwAs => {
                    if IS_AS_BP < min_bp {
                        break;
                    }
                    let is_test = matches!(self.peek(), TokenKind::KwIs);
                    self.advance();
                    let ty = Rc::new(self.type_atom_for_operator()?);
                    let span = lhs.span.to(self.prev_span());
                    lhs = ExprLoc {
                        expr: if is_test {
                            Expr::TypeTest { expr: Box::new(lhs), ty }
                        } else {
                            Expr::TypeCast { expr: Box::new(lhs), ty }
                        },
                        span,
                    };
                    continue;
                }
                TokenKind::Lt => (BinOp::Lt, 14, 15),
                TokenKind::Gt => (BinOp::Gt, 14, 15),
                TokenKind::LtEq => (BinOp::LtEq, 14, 15),
                TokenKind::GtEq => (BinOp::GtEq, 14, 15),
                TokenKind::Plus => (BinOp::Add, 16, 17),
                TokenKind::Minus => (BinOp::Sub, 16, 17),
                TokenKind::Star => (BinOp::Mul, 18, 19),
                TokenKind::Slash => (BinOp::Div, 18, 19),
                TokenKind::TildeSlash => (BinOp::IntDiv, 18, 19),
                TokenKind::Percent => (BinOp::Rem, 18, 19),
                TokenKind::StarStar => (BinOp::Pow, 23, 22),
                _ => break,
            };
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.expr_bp(r_bp)?;
            let span = lhs.span.to(rhs.span);
            lhs = ExprLoc {
                expr: Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    /// Type operand of `is`/`as`. Union alternatives must be parenthesized
    /// here, since a bare `|` would be ambiguous with a following pipe.
    fn type_atom_for_operator(&mut self) -> EvalResult<TypeExpr> {
        self.type_atom()
    }

    fn postfix_expr(&mut self) -> EvalResult<ExprLoc> {
        let mut lhs = self.primary_expr()?;
        loop {
            match self.peek() {
                TokenKind::Dot | TokenKind::QDot => {
                    let nullable = matches!(self.advance().kind, TokenKind::QDot);
                    let name = self.ident()?;
                    if matches!(self.peek(), TokenKind::LParen) {
                        let args = self.call_args()?;
                        let span = lhs.span.to(self.prev_span());
                        lhs = ExprLoc {
                            expr: Expr::Call {
                                receiver: Some(Box::new(lhs)),
                                name,
                                args,
                                nullable,
                            },
                            span,
                        };
                    } else {
                        let span = lhs.span.to(name.span);
                        lhs = ExprLoc {
                            expr: Expr::Prop {
                                receiver: Box::new(lhs),
                                name,
                                nullable,
                            },
                            span,
                        };
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    let span = lhs.span.to(self.prev_span());
                    lhs = ExprLoc {
                        expr: Expr::Subscript {
                            receiver: Box::new(lhs),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::NonNull => {
                    self.advance();
                    let span = lhs.span.to(self.prev_span());
                    lhs = ExprLoc {
                        expr: Expr::NonNull(Box::new(lhs)),
                        span,
                    };
                }
                // postfix amend / apply, only after forms that cannot be
                // confused with a property declaration
                TokenKind::LBrace if amendable(&lhs.expr) => {
                    let body = Rc::new(self.object_body()?);
                    let span = lhs.span.to(self.prev_span());
                    lhs = ExprLoc {
                        expr: Expr::Amend {
                            base: Box::new(lhs),
                            body,
                        },
                        span,
                    };
                }
                TokenKind::LParen if applicable(&lhs.expr) => {
                    let args = self.call_args()?;
                    let span = lhs.span.to(self.prev_span());
                    lhs = ExprLoc {
                        expr: Expr::ApplyCall {
                            callee: Box::new(lhs),
                            args,
                        },
                        span,
                    };
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn call_args(&mut self) -> EvalResult<Vec<ExprLoc>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                args.push(self.expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn primary_expr(&mut self) -> EvalResult<ExprLoc> {
        let span = self.span();
        let expr = match self.peek() {
            TokenKind::KwNull => {
                self.advance();
                Expr::Null
            }
            TokenKind::KwTrue => {
                self.advance();
                Expr::Bool(true)
            }
            TokenKind::KwFalse => {
                self.advance();
                Expr::Bool(false)
            }
            TokenKind::Int(_) => {
                let TokenKind::Int(v) = self.advance().kind else { unreachable!() };
                Expr::Int(v)
            }
            TokenKind::Float(_) => {
                let TokenKind::Float(v) = self.advance().kind else { unreachable!() };
                Expr::Float(v)
            }
            TokenKind::Str(_) => {
                let TokenKind::Str(parts) = self.advance().kind else { unreachable!() };
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        LexedPart::Text(text) => out.push(StrPart::Text(text.into())),
                        LexedPart::Interp(mut tokens) => {
                            let end = tokens.last().map_or(span, |t| t.span);
                            tokens.push(Token {
                                kind: TokenKind::Eof,
                                span: end,
                            });
                            let mut sub = Parser::new(self.source, tokens, self.interns);
                            let inner = sub.expr()?;
                            sub.expect_eof()?;
                            out.push(StrPart::Interp(Box::new(inner)));
                        }
                    }
                }
                Expr::Str(out)
            }
            TokenKind::KwThis => {
                self.advance();
                Expr::This
            }
            TokenKind::KwOuter => {
                self.advance();
                Expr::Outer
            }
            TokenKind::KwModule => {
                self.advance();
                Expr::ModuleRef
            }
            TokenKind::KwSuper => {
                self.advance();
                if self.eat(&TokenKind::Dot) {
                    let name = self.ident()?;
                    if matches!(self.peek(), TokenKind::LParen) {
                        let args = self.call_args()?;
                        Expr::SuperCall { name, args }
                    } else {
                        Expr::SuperProp { name }
                    }
                } else if self.eat(&TokenKind::LBracket) {
                    let index = self.expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    Expr::SuperSubscript { index: Box::new(index) }
                } else {
                    return Err(self.expected(&["`.`", "`[`"]));
                }
            }
            TokenKind::KwIf => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let then = self.expr()?;
                self.expect(&TokenKind::KwElse)?;
                let otherwise = self.expr()?;
                Expr::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                }
            }
            TokenKind::KwLet => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let param = self.param()?;
                self.expect(&TokenKind::Assign)?;
                let value = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.expr()?;
                Expr::Let {
                    param,
                    value: Box::new(value),
                    body: Box::new(body),
                    slot: 0,
                }
            }
            TokenKind::KwThrow => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Expr::Throw(Box::new(inner))
            }
            TokenKind::KwTrace => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let inner = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                let text: Rc<str> = self.source[inner.span.start as usize..inner.span.end as usize].into();
                Expr::Trace {
                    expr: Box::new(inner),
                    text,
                }
            }
            TokenKind::KwRead | TokenKind::KwReadOrNull | TokenKind::KwReadGlob => {
                let mode = match self.advance().kind {
                    TokenKind::KwRead => ReadMode::Fail,
                    TokenKind::KwReadOrNull => ReadMode::OrNull,
                    _ => ReadMode::Glob,
                };
                self.expect(&TokenKind::LParen)?;
                let uri = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Expr::Read {
                    uri: Box::new(uri),
                    mode,
                }
            }
            TokenKind::KwImport | TokenKind::KwImportGlob => {
                let glob = matches!(self.advance().kind, TokenKind::KwImportGlob);
                self.expect(&TokenKind::LParen)?;
                let (uri, _) = self.string_literal()?;
                self.expect(&TokenKind::RParen)?;
                Expr::ImportExpr { uri, glob }
            }
            TokenKind::KwNew => {
                self.advance();
                let ty = if matches!(self.peek(), TokenKind::LBrace) {
                    None
                } else {
                    Some(Rc::new(self.type_expr()?))
                };
                let body = Rc::new(self.object_body()?);
                Expr::New { ty, body }
            }
            TokenKind::LParen => {
                // function literal or parenthesized expression
                if let Some(expr) = self.try_function_literal()? {
                    expr
                } else {
                    self.advance();
                    let inner = self.expr()?;
                    self.expect(&TokenKind::RParen)?;
                    // a parenthesized expression is the amendable form
                    let span = span.to(self.prev_span());
                    return Ok(ExprLoc {
                        expr: Expr::Amendable(Box::new(inner)),
                        span,
                    });
                }
            }
            TokenKind::Ident(_) => {
                let name = self.ident()?;
                if matches!(self.peek(), TokenKind::LParen) {
                    let args = self.call_args()?;
                    Expr::Call {
                        receiver: None,
                        name,
                        args,
                        nullable: false,
                    }
                } else {
                    Expr::Name(name)
                }
            }
            _ => return Err(self.expected(&["expression"])),
        };
        Ok(ExprLoc {
            expr,
            span: span.to(self.prev_span()),
        })
    }

    /// Attempts to parse `(a, b) -> expr`; rolls back when the parentheses
    /// turn out to enclose an ordinary expression.
    fn try_function_literal(&mut self) -> EvalResult<Option<Expr>> {
        let checkpoint = self.pos;
        self.advance(); // `(`
        let mut params = Vec::new();
        let mut ok = true;
        if !matches!(self.peek(), TokenKind::RParen) {
            loop {
                if !matches!(self.peek(), TokenKind::Ident(_)) {
                    ok = false;
                    break;
                }
                match self.param() {
                    Ok(p) => params.push(p),
                    Err(_) => {
                        ok = false;
                        break;
                    }
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if ok && self.eat(&TokenKind::RParen) && self.eat(&TokenKind::Arrow) {
            let body = Rc::new(self.expr()?);
            Ok(Some(Expr::FunctionLit { params, body }))
        } else {
            self.pos = checkpoint;
            Ok(None)
        }
    }
}

const UNARY_BP: u8 = 20;
const IS_AS_BP: u8 = 12;

/// Whether a postfix `{ … }` amends this expression form.
fn amendable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Amendable(_) | Expr::Amend { .. } | Expr::New { .. } | Expr::Call { .. } | Expr::ApplyCall { .. } | Expr::SuperCall { .. }
    )
}

/// Whether a postfix `( … )` calls this expression form.
fn applicable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Amendable(_) | Expr::ApplyCall { .. } | Expr::Call { .. } | Expr::Subscript { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ModuleSyntax {
        let mut interns = Interns::new();
        parse_module(source, &mut interns).unwrap()
    }

    #[test]
    fn simple_module() {
        let module = parse_ok("x = 1\ny = x + 2");
        assert_eq!(module.members.len(), 2);
    }

    #[test]
    fn module_header_and_imports() {
        let module = parse_ok("module com.example.Config\nimport \"foo.pkl\"\nimport* \"bar/*.pkl\" as bars\nx = 1");
        let header = module.header.expect("header");
        assert_eq!(header.name_parts.len(), 3);
        assert_eq!(module.imports.len(), 2);
        assert!(module.imports[1].glob);
        assert!(module.imports[1].alias.is_some());
    }

    #[test]
    fn amends_clause() {
        let module = parse_ok("amends \"base.pkl\"\nx = 2");
        let header = module.header.expect("header");
        assert!(matches!(header.clause, Some(ModuleClause::Amends { .. })));
    }

    #[test]
    fn class_with_members() {
        let module = parse_ok("class Bird {\n  name: String\n  function greet(): String = \"hi\"\n}");
        let ModuleMember::Class(class) = &module.members[0] else {
            panic!("expected class")
        };
        assert_eq!(class.properties.len(), 1);
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn object_body_members() {
        let module = parse_ok("a = new Dynamic {\n  \"one\"\n  \"two\"\n  name = \"x\"\n  [\"k\"] = 1\n  ...others\n}");
        let ModuleMember::Property(prop) = &module.members[0] else {
            panic!("expected property")
        };
        let PropValue::Expr(expr) = &prop.value else { panic!() };
        let Expr::New { body, .. } = &expr.expr else { panic!() };
        assert_eq!(body.members.len(), 5);
    }

    #[test]
    fn precedence() {
        let mut interns = Interns::new();
        let expr = parse_expression("1 + 2 * 3", &mut interns).unwrap();
        let Expr::Binary { op: BinOp::Add, rhs, .. } = expr.expr else {
            panic!("expected + at the top")
        };
        assert!(matches!(rhs.expr, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn pow_is_right_associative() {
        let mut interns = Interns::new();
        let expr = parse_expression("2 ** 3 ** 2", &mut interns).unwrap();
        let Expr::Binary { op: BinOp::Pow, rhs, .. } = expr.expr else {
            panic!("expected **")
        };
        assert!(matches!(rhs.expr, Expr::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn function_literal_vs_paren() {
        let mut interns = Interns::new();
        let lit = parse_expression("(x) -> x + 1", &mut interns).unwrap();
        assert!(matches!(lit.expr, Expr::FunctionLit { .. }));
        let paren = parse_expression("(1 + 2)", &mut interns).unwrap();
        assert!(matches!(paren.expr, Expr::Amendable(_)));
    }

    #[test]
    fn amend_parenthesized() {
        let mut interns = Interns::new();
        let expr = parse_expression("(a) { b = 1 }", &mut interns).unwrap();
        assert!(matches!(expr.expr, Expr::Amend { .. }));
    }

    #[test]
    fn error_carries_expected_set() {
        let mut interns = Interns::new();
        let err = parse_module("x = ", &mut interns).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
        assert!(err.message.contains("expected expression"), "{}", err.message);
        assert!(err.span.is_some());
    }

    #[test]
    fn null_chain_operators() {
        let mut interns = Interns::new();
        let expr = parse_expression("a?.b ?? c!!", &mut interns).unwrap();
        let Expr::Binary { op: BinOp::Coalesce, lhs, rhs } = expr.expr else {
            panic!("expected ??")
        };
        assert!(matches!(lhs.expr, Expr::Prop { nullable: true, .. }));
        assert!(matches!(rhs.expr, Expr::NonNull(_)));
    }
}
