use crate::lexer::Lexer;
use crate::token::{Tok, TokKind};
use crate::ParseError;
use anyhow::{bail, Result};
use narrow_ast::ast::{
    BinOp, Block, Case, CasePattern, ElseBranch, Expr, FieldDecl, FieldInit, FnDecl, Ident,
    IfCond, IfStmt, Item, LetDecl, Lit, Module, Param, PatElem, Stmt, Switch, TypeAlias,
    TypeExpr, UnOp, UnionDecl, VariantDecl, VisitOp, VisitorDecl,
};
use narrow_ast::span::Span;

/// Maximum nesting of blocks and expressions before the parser gives up.
pub const MAX_NESTING_DEPTH: usize = 256;

pub fn parse_str(_file: &str, src: &str) -> Result<Module> {
    let mut p = Parser::new(src);
    p.parse_module()
}

struct Parser<'a> {
    lex: Lexer<'a>,
    cur: Tok,
    nxt: Tok,
    /// End offset of the last consumed token.
    prev_end: u32,
    depth: usize,
    /// Set while parsing `if`/`switch` headers, where `{` opens the body.
    no_brace_construct: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let mut lex = Lexer::new(src);
        let cur = lex.next_tok();
        let nxt = lex.next_tok();
        Self {
            lex,
            cur,
            nxt,
            prev_end: 0,
            depth: 0,
            no_brace_construct: false,
        }
    }

    fn bump(&mut self) {
        self.prev_end = self.cur.span.end;
        self.cur = std::mem::replace(&mut self.nxt, self.lex.next_tok());
    }

    fn at(&self, k: &TokKind) -> bool {
        std::mem::discriminant(&self.cur.kind) == std::mem::discriminant(k)
    }

    fn span_from(&self, start: u32) -> Span {
        Span {
            start,
            end: self.prev_end,
        }
    }

    fn error(&self, message: String) -> anyhow::Error {
        // Lexer errors win over the generic "unexpected token" message.
        let message = match &self.cur.kind {
            TokKind::Error(msg) => msg.clone(),
            _ => message,
        };
        ParseError::new(message, self.cur.span).into()
    }

    fn expect(&mut self, k: TokKind) -> Result<Tok> {
        if self.at(&k) {
            let t = self.cur.clone();
            self.bump();
            Ok(t)
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", k, self.cur.kind)))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            bail!(ParseError::new(
                format!("nesting depth limit exceeded (max {})", MAX_NESTING_DEPTH),
                self.cur.span,
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ======= module / items =======

    fn parse_module(&mut self) -> Result<Module> {
        let start = self.cur.span.start;
        let mut items = Vec::new();
        while !matches!(self.cur.kind, TokKind::Eof) {
            items.push(self.parse_item()?);
        }
        Ok(Module {
            items,
            span: Span {
                start,
                end: self.cur.span.end,
            },
        })
    }

    fn parse_item(&mut self) -> Result<Item> {
        match self.cur.kind {
            TokKind::KwUnion => Ok(Item::Union(self.parse_union()?)),
            TokKind::KwType => Ok(Item::TypeAlias(self.parse_type_alias()?)),
            TokKind::KwFn => Ok(Item::Fn(self.parse_fn_decl()?)),
            TokKind::KwVisitor => Ok(Item::Visitor(self.parse_visitor()?)),
            TokKind::KwLet => Ok(Item::Let(self.parse_let()?)),
            _ => Err(self.error(format!(
                "unexpected token at top level: {:?}",
                self.cur.kind
            ))),
        }
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        match &self.cur.kind {
            TokKind::Ident(s) => {
                let id = Ident {
                    text: s.clone(),
                    span: self.cur.span,
                };
                self.bump();
                Ok(id)
            }
            _ => Err(self.error(format!("expected identifier, found {:?}", self.cur.kind))),
        }
    }

    /// `union Name { tag { field: Type, .. }, tag, .. }`
    fn parse_union(&mut self) -> Result<UnionDecl> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwUnion)?;
        let name = self.parse_ident()?;
        self.expect(TokKind::LBrace)?;

        let mut variants = Vec::new();
        while !matches!(self.cur.kind, TokKind::RBrace) {
            variants.push(self.parse_variant()?);
            if matches!(self.cur.kind, TokKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokKind::RBrace)?;

        if variants.is_empty() {
            bail!(ParseError::new(
                format!("union `{}` must declare at least one variant", name.text),
                name.span,
            ));
        }

        Ok(UnionDecl {
            name,
            variants,
            span: self.span_from(start),
        })
    }

    fn parse_variant(&mut self) -> Result<VariantDecl> {
        let start = self.cur.span.start;
        let tag = self.parse_ident()?;
        let mut fields = Vec::new();
        if matches!(self.cur.kind, TokKind::LBrace) {
            self.bump();
            while !matches!(self.cur.kind, TokKind::RBrace) {
                let fstart = self.cur.span.start;
                let name = self.parse_ident()?;
                self.expect(TokKind::Colon)?;
                let ty = self.parse_type()?;
                fields.push(FieldDecl {
                    name,
                    ty,
                    span: self.span_from(fstart),
                });
                if matches!(self.cur.kind, TokKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
            self.expect(TokKind::RBrace)?;
        }
        Ok(VariantDecl {
            tag,
            fields,
            span: self.span_from(start),
        })
    }

    fn parse_type_alias(&mut self) -> Result<TypeAlias> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwType)?;
        let name = self.parse_ident()?;
        self.expect(TokKind::Eq)?;
        let ty = self.parse_type()?;
        self.expect(TokKind::Semicolon)?;
        Ok(TypeAlias {
            name,
            ty,
            span: self.span_from(start),
        })
    }

    fn parse_let(&mut self) -> Result<LetDecl> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwLet)?;
        let name = self.parse_ident()?;
        let ty = if matches!(self.cur.kind, TokKind::Colon) {
            self.bump();
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(TokKind::Eq)?;
        let value = self.parse_expr_bp(0)?;
        self.expect(TokKind::Semicolon)?;
        Ok(LetDecl {
            name,
            ty,
            value,
            span: self.span_from(start),
        })
    }

    fn parse_fn_decl(&mut self) -> Result<FnDecl> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwFn)?;
        let name = self.parse_ident()?;

        self.expect(TokKind::LParen)?;
        let mut params = Vec::new();
        while !matches!(self.cur.kind, TokKind::RParen) {
            params.push(self.parse_param()?);
            if matches!(self.cur.kind, TokKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokKind::RParen)?;

        let ret_ty = self.parse_ret_ty()?;
        let body = self.parse_block()?;

        Ok(FnDecl {
            name,
            params,
            ret_ty,
            body,
            span: self.span_from(start),
        })
    }

    fn parse_param(&mut self) -> Result<Param> {
        let start = self.cur.span.start;
        let name = self.parse_ident()?;
        if !matches!(self.cur.kind, TokKind::Colon) {
            return Err(self.error(format!(
                "parameter `{}` needs a type annotation",
                name.text
            )));
        }
        self.bump();
        let ty = self.parse_type()?;
        Ok(Param {
            name,
            ty,
            span: self.span_from(start),
        })
    }

    fn parse_ret_ty(&mut self) -> Result<Option<TypeExpr>> {
        if matches!(self.cur.kind, TokKind::Arrow) {
            self.bump();
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    /// `visitor Name for Union -> Type { tag(binder) { .. } .. }`
    fn parse_visitor(&mut self) -> Result<VisitorDecl> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwVisitor)?;
        let name = self.parse_ident()?;
        self.expect(TokKind::KwFor)?;
        let target = self.parse_ident()?;
        self.expect(TokKind::Arrow)?;
        let ret_ty = self.parse_type()?;
        self.expect(TokKind::LBrace)?;

        let mut ops = Vec::new();
        while !matches!(self.cur.kind, TokKind::RBrace) {
            let op_start = self.cur.span.start;
            let tag = self.parse_ident()?;
            self.expect(TokKind::LParen)?;
            let binder = self.parse_ident()?;
            self.expect(TokKind::RParen)?;
            let body = self.parse_block()?;
            ops.push(VisitOp {
                tag,
                binder,
                body,
                span: self.span_from(op_start),
            });
        }
        self.expect(TokKind::RBrace)?;

        Ok(VisitorDecl {
            name,
            target,
            ret_ty,
            ops,
            span: self.span_from(start),
        })
    }

    fn parse_type(&mut self) -> Result<TypeExpr> {
        let start = self.cur.span.start;

        // Function type: fn(T1, T2) -> R
        if matches!(self.cur.kind, TokKind::KwFn) {
            self.bump();
            self.expect(TokKind::LParen)?;

            let mut params = Vec::new();
            while !matches!(self.cur.kind, TokKind::RParen) {
                params.push(self.parse_type()?);
                if matches!(self.cur.kind, TokKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }

            self.expect(TokKind::RParen)?;
            self.expect(TokKind::Arrow)?;
            let ret = Box::new(self.parse_type()?);

            return Ok(TypeExpr::Arrow {
                params,
                ret,
                span: self.span_from(start),
            });
        }

        Ok(TypeExpr::Named(self.parse_ident()?))
    }

    // ======= blocks and statements =======

    /// Parse a block: `{ stmt* }`
    fn parse_block(&mut self) -> Result<Block> {
        self.enter()?;
        let start = self.cur.span.start;
        self.expect(TokKind::LBrace)?;

        // Braces inside a block are never part of an `if`/`switch` header.
        let saved = std::mem::replace(&mut self.no_brace_construct, false);
        let mut stmts = Vec::new();
        while !matches!(self.cur.kind, TokKind::RBrace | TokKind::Eof) {
            stmts.push(self.parse_stmt()?);
        }
        self.no_brace_construct = saved;

        self.expect(TokKind::RBrace)?;
        self.leave();
        Ok(Block {
            stmts,
            span: self.span_from(start),
        })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.cur.kind {
            TokKind::KwLet => Ok(Stmt::Let(self.parse_let()?)),
            TokKind::KwReturn => self.parse_return_stmt(),
            TokKind::KwSwitch => Ok(Stmt::Switch(self.parse_switch()?)),
            TokKind::KwIf => Ok(Stmt::If(self.parse_if()?)),
            _ => {
                let start = self.cur.span.start;
                let expr = self.parse_expr_bp(0)?;
                if !matches!(self.cur.kind, TokKind::Semicolon) {
                    return Err(self.error(format!(
                        "expected ';' after expression, found {:?}",
                        self.cur.kind
                    )));
                }
                self.bump();
                Ok(Stmt::Expr {
                    expr,
                    span: self.span_from(start),
                })
            }
        }
    }

    /// Parse a return statement: `return [expr];`
    fn parse_return_stmt(&mut self) -> Result<Stmt> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwReturn)?;

        let value = if matches!(self.cur.kind, TokKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr_bp(0)?)
        };

        self.expect(TokKind::Semicolon)?;

        Ok(Stmt::Return {
            value,
            span: self.span_from(start),
        })
    }

    /// `switch expr { case tag { .. } .. default { .. } }`
    /// or `switch (a, b) { case (x, _) { .. } .. }`
    fn parse_switch(&mut self) -> Result<Switch> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwSwitch)?;

        let saved = std::mem::replace(&mut self.no_brace_construct, true);
        let scrutinees = if matches!(self.cur.kind, TokKind::LParen) {
            let paren_start = self.cur.span.start;
            self.bump();
            let first = self.with_braces_allowed(|p| p.parse_expr_bp(0))?;
            if matches!(self.cur.kind, TokKind::Comma) {
                let mut elems = vec![first];
                while matches!(self.cur.kind, TokKind::Comma) {
                    self.bump();
                    elems.push(self.with_braces_allowed(|p| p.parse_expr_bp(0))?);
                }
                self.expect(TokKind::RParen)?;
                elems
            } else {
                self.expect(TokKind::RParen)?;
                let paren = Expr::Paren {
                    inner: Box::new(first),
                    span: self.span_from(paren_start),
                };
                vec![self.continue_expr(paren, 0)?]
            }
        } else {
            vec![self.parse_expr_bp(0)?]
        };
        self.no_brace_construct = saved;

        self.expect(TokKind::LBrace)?;
        let mut cases = Vec::new();
        let mut default = None;
        loop {
            match self.cur.kind {
                TokKind::KwCase => {
                    if default.is_some() {
                        return Err(self.error("`case` after `default` in switch".into()));
                    }
                    let case_start = self.cur.span.start;
                    self.bump();
                    let pattern = self.parse_case_pattern()?;
                    let body = self.parse_block()?;
                    cases.push(Case {
                        pattern,
                        body,
                        span: self.span_from(case_start),
                    });
                }
                TokKind::KwDefault => {
                    if default.is_some() {
                        return Err(self.error("duplicate `default` in switch".into()));
                    }
                    self.bump();
                    default = Some(self.parse_block()?);
                }
                TokKind::RBrace => break,
                _ => {
                    return Err(self.error(format!(
                        "expected `case`, `default` or '}}' in switch, found {:?}",
                        self.cur.kind
                    )))
                }
            }
        }
        self.expect(TokKind::RBrace)?;

        Ok(Switch {
            scrutinees,
            cases,
            default,
            span: self.span_from(start),
        })
    }

    fn parse_case_pattern(&mut self) -> Result<CasePattern> {
        if !matches!(self.cur.kind, TokKind::LParen) {
            return Ok(CasePattern::Tag(self.parse_ident()?));
        }
        let start = self.cur.span.start;
        self.bump();
        let mut elems = vec![self.parse_pat_elem()?];
        while matches!(self.cur.kind, TokKind::Comma) {
            self.bump();
            elems.push(self.parse_pat_elem()?);
        }
        self.expect(TokKind::RParen)?;
        Ok(CasePattern::Tuple(elems, self.span_from(start)))
    }

    fn parse_pat_elem(&mut self) -> Result<PatElem> {
        let span = self.cur.span;
        let elem = match self.cur.kind.clone() {
            TokKind::Ident(s) if s == "_" => PatElem::Wildcard(span),
            TokKind::Ident(s) => PatElem::Tag(Ident { text: s, span }),
            TokKind::Int(v) => PatElem::Lit(Lit::Int(v), span),
            TokKind::Str(s) => PatElem::Lit(Lit::Str(s), span),
            TokKind::KwTrue => PatElem::Lit(Lit::Bool(true), span),
            TokKind::KwFalse => PatElem::Lit(Lit::Bool(false), span),
            TokKind::Minus => {
                self.bump();
                let TokKind::Int(v) = self.cur.kind else {
                    return Err(self.error("expected integer after '-' in pattern".into()));
                };
                let lit = PatElem::Lit(Lit::Int(-v), span.to(self.cur.span));
                self.bump();
                return Ok(lit);
            }
            other => {
                return Err(self.error(format!("expected pattern, found {:?}", other)));
            }
        };
        self.bump();
        Ok(elem)
    }

    /// `if cond { } [else { }]`, `if x is tag { } ...`, `else if` chains.
    fn parse_if(&mut self) -> Result<IfStmt> {
        let start = self.cur.span.start;
        self.expect(TokKind::KwIf)?;

        let saved = std::mem::replace(&mut self.no_brace_construct, true);
        let subject = self.parse_expr_bp(0)?;
        let cond = if matches!(self.cur.kind, TokKind::KwIs) {
            self.bump();
            let tag = self.parse_ident()?;
            IfCond::Is { subject, tag }
        } else {
            IfCond::Bool(subject)
        };
        self.no_brace_construct = saved;

        let then_ = self.parse_block()?;

        let else_ = if matches!(self.cur.kind, TokKind::KwElse) {
            self.bump();
            if matches!(self.cur.kind, TokKind::KwIf) {
                self.enter()?;
                let nested = self.parse_if();
                self.leave();
                Some(ElseBranch::If(Box::new(nested?)))
            } else {
                Some(ElseBranch::Block(self.parse_block()?))
            }
        } else {
            None
        };

        Ok(IfStmt {
            cond,
            then_,
            else_,
            span: self.span_from(start),
        })
    }

    fn with_braces_allowed<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = std::mem::replace(&mut self.no_brace_construct, false);
        let out = f(self);
        self.no_brace_construct = saved;
        out
    }

    // ======= expressions (Pratt parser) =======
    //
    // Precedence (low -> high):
    //   1:  ||
    //   3:  &&
    //   5:  == !=
    //   7:  < <= > >=
    //   10: + -
    //   20: * /
    // prefix (unary) binds tighter than all infix; we give it rbp = 100.
    // Postfix call, field access, `.accept(V)` and `as! T` bind tightest.

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        self.enter()?;
        let lhs = self.parse_prefix()?;
        let out = self.continue_expr(lhs, min_bp);
        self.leave();
        out
    }

    /// Each operator applied to `lhs` adds a level to the tree, so long
    /// chains count against the nesting limit like parentheses do.
    fn continue_expr(&mut self, lhs: Expr, min_bp: u8) -> Result<Expr> {
        let depth = self.depth;
        let out = self.continue_chain(lhs, min_bp);
        self.depth = depth;
        out
    }

    fn continue_chain(&mut self, mut lhs: Expr, min_bp: u8) -> Result<Expr> {
        loop {
            let (op, lbp, rbp) = match self.cur.kind {
                // logical
                TokKind::OrOr => (BinOp::Or, 1, 2),
                TokKind::AndAnd => (BinOp::And, 3, 4),
                // equality
                TokKind::EqEq => (BinOp::Eq, 5, 6),
                TokKind::BangEq => (BinOp::Ne, 5, 6),
                // relational
                TokKind::Lt => (BinOp::Lt, 7, 8),
                TokKind::Le => (BinOp::Le, 7, 8),
                TokKind::Gt => (BinOp::Gt, 7, 8),
                TokKind::Ge => (BinOp::Ge, 7, 8),
                // arithmetic
                TokKind::Plus => (BinOp::Add, 10, 11),
                TokKind::Minus => (BinOp::Sub, 10, 11),
                TokKind::Star => (BinOp::Mul, 20, 21),
                TokKind::Slash => (BinOp::Div, 20, 21),
                TokKind::LParen | TokKind::Dot | TokKind::KwAsBang => {
                    self.enter()?;
                    lhs = self.parse_postfix(lhs)?;
                    continue;
                }
                _ => break,
            };

            if lbp < min_bp {
                break;
            }
            self.enter()?;
            self.bump(); // consume operator
            let rhs = self.parse_expr_bp(rbp)?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
                span,
            };
        }

        Ok(lhs)
    }

    fn parse_postfix(&mut self, lhs: Expr) -> Result<Expr> {
        let start = lhs.span().start;
        match self.cur.kind {
            TokKind::LParen => {
                let args = self.parse_call_args()?;
                Ok(Expr::Call {
                    callee: Box::new(lhs),
                    args,
                    span: self.span_from(start),
                })
            }
            TokKind::Dot => {
                self.bump();
                let field = self.parse_ident()?;
                if field.text == "accept" && matches!(self.cur.kind, TokKind::LParen) {
                    self.bump();
                    let visitor = self.parse_ident()?;
                    self.expect(TokKind::RParen)?;
                    return Ok(Expr::Accept {
                        target: Box::new(lhs),
                        visitor,
                        span: self.span_from(start),
                    });
                }
                Ok(Expr::Field {
                    base: Box::new(lhs),
                    field,
                    span: self.span_from(start),
                })
            }
            TokKind::KwAsBang => {
                self.bump();
                let ty = self.parse_type()?;
                Ok(Expr::Cast {
                    expr: Box::new(lhs),
                    ty,
                    span: self.span_from(start),
                })
            }
            _ => Err(self.error(format!("unexpected token {:?}", self.cur.kind))),
        }
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        // Snapshot current token to avoid borrow issues when bumping
        let tok_kind = self.cur.kind.clone();
        let tok_span = self.cur.span;

        match tok_kind {
            // unary prefix
            TokKind::Bang | TokKind::Minus => {
                let op = if tok_kind == TokKind::Bang {
                    UnOp::Not
                } else {
                    UnOp::Neg
                };
                self.bump();
                let inner = self.parse_expr_bp(100)?;
                let span = tok_span.to(inner.span());
                Ok(Expr::Unary {
                    op,
                    expr: Box::new(inner),
                    span,
                })
            }

            // primaries
            TokKind::Int(v) => {
                self.bump();
                Ok(Expr::Lit(Lit::Int(v), tok_span))
            }
            TokKind::Str(s) => {
                self.bump();
                Ok(Expr::Lit(Lit::Str(s), tok_span))
            }
            TokKind::KwTrue => {
                self.bump();
                Ok(Expr::Lit(Lit::Bool(true), tok_span))
            }
            TokKind::KwFalse => {
                self.bump();
                Ok(Expr::Lit(Lit::Bool(false), tok_span))
            }

            TokKind::Ident(_) => {
                if matches!(self.nxt.kind, TokKind::ColonColon) {
                    return self.parse_construct();
                }
                Ok(Expr::Var(self.parse_ident()?))
            }

            TokKind::LParen => {
                self.bump(); // '('
                if matches!(self.cur.kind, TokKind::RParen) {
                    self.bump();
                    return Ok(Expr::Lit(Lit::Unit, self.span_from(tok_span.start)));
                }
                let inner = self.with_braces_allowed(|p| p.parse_expr_bp(0))?;
                self.expect(TokKind::RParen)?;
                Ok(Expr::Paren {
                    inner: Box::new(inner),
                    span: self.span_from(tok_span.start),
                })
            }

            // Deferred effect: fn() [-> T] { .. }
            TokKind::KwFn => {
                self.bump();
                self.expect(TokKind::LParen)?;
                if !matches!(self.cur.kind, TokKind::RParen) {
                    return Err(self.error("closures take no parameters".into()));
                }
                self.bump();
                let ret_ty = self.parse_ret_ty()?;
                let body = self.parse_block()?;
                Ok(Expr::Lambda {
                    ret_ty,
                    body,
                    span: self.span_from(tok_span.start),
                })
            }

            _ => Err(self.error(format!("unexpected token in expression: {:?}", tok_kind))),
        }
    }

    /// `Union::tag` or `Union::tag { field: expr, .. }`
    fn parse_construct(&mut self) -> Result<Expr> {
        let start = self.cur.span.start;
        let union = self.parse_ident()?;
        self.expect(TokKind::ColonColon)?;
        let tag = self.parse_ident()?;

        let mut fields = Vec::new();
        if matches!(self.cur.kind, TokKind::LBrace) && !self.no_brace_construct {
            self.bump();
            while !matches!(self.cur.kind, TokKind::RBrace) {
                let fstart = self.cur.span.start;
                let name = self.parse_ident()?;
                self.expect(TokKind::Colon)?;
                let value = self.parse_expr_bp(0)?;
                fields.push(FieldInit {
                    name,
                    value,
                    span: self.span_from(fstart),
                });
                if matches!(self.cur.kind, TokKind::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
            self.expect(TokKind::RBrace)?;
        }

        Ok(Expr::Construct {
            union,
            tag,
            fields,
            span: self.span_from(start),
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokKind::LParen)?;
        let mut args = Vec::new();
        self.with_braces_allowed(|p| {
            while !matches!(p.cur.kind, TokKind::RParen) {
                args.push(p.parse_expr_bp(0)?);
                if matches!(p.cur.kind, TokKind::Comma) {
                    p.bump();
                } else {
                    break;
                }
            }
            Ok(())
        })?;
        self.expect(TokKind::RParen)?;
        Ok(args)
    }
}
