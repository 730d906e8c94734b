pub mod span {
    use serde::Serialize;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
    pub struct Span {
        pub start: u32,
        pub end: u32,
    }

    impl Span {
        pub fn new(start: u32, end: u32) -> Self {
            Span { start, end }
        }

        /// Smallest span covering both `self` and `other`.
        pub fn to(self, other: Span) -> Span {
            Span {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            }
        }

        pub fn range(&self) -> std::ops::Range<usize> {
            self.start as usize..self.end as usize
        }
    }
}

pub mod ast {
    use super::span::Span;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    pub struct Module {
        pub items: Vec<Item>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum Item {
        Union(UnionDecl),
        TypeAlias(TypeAlias),
        Fn(FnDecl),
        Visitor(VisitorDecl),
        Let(LetDecl),
    }

    impl Item {
        pub fn span(&self) -> Span {
            match self {
                Item::Union(d) => d.span,
                Item::TypeAlias(d) => d.span,
                Item::Fn(d) => d.span,
                Item::Visitor(d) => d.span,
                Item::Let(d) => d.span,
            }
        }
    }

    /// `union Calc { add { a: Int, b: Int }, multiply { .. }, divide { .. } }`
    #[derive(Debug, Clone, Serialize)]
    pub struct UnionDecl {
        pub name: Ident,
        pub variants: Vec<VariantDecl>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct VariantDecl {
        /// The discriminant.
        pub tag: Ident,
        pub fields: Vec<FieldDecl>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct FieldDecl {
        pub name: Ident,
        pub ty: TypeExpr,
        pub span: Span,
    }

    /// `type Effect = fn() -> Unit;`
    #[derive(Debug, Clone, Serialize)]
    pub struct TypeAlias {
        pub name: Ident,
        pub ty: TypeExpr,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct FnDecl {
        pub name: Ident,
        pub params: Vec<Param>,
        pub ret_ty: Option<TypeExpr>,
        pub body: Block,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Param {
        pub name: Ident,
        pub ty: TypeExpr,
        pub span: Span,
    }

    /// `visitor Area for Shape -> Int { circle(c) { .. } square(s) { .. } }`
    #[derive(Debug, Clone, Serialize)]
    pub struct VisitorDecl {
        pub name: Ident,
        pub target: Ident,
        pub ret_ty: TypeExpr,
        pub ops: Vec<VisitOp>,
        pub span: Span,
    }

    /// One operation of a visitor, keyed by the variant tag it handles.
    #[derive(Debug, Clone, Serialize)]
    pub struct VisitOp {
        pub tag: Ident,
        pub binder: Ident,
        pub body: Block,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct LetDecl {
        pub name: Ident,
        pub ty: Option<TypeExpr>,
        pub value: Expr,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Ident {
        pub text: String,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum TypeExpr {
        Named(Ident),
        Arrow {
            // fn(A, B) -> R
            params: Vec<TypeExpr>,
            ret: Box<TypeExpr>,
            span: Span,
        },
    }

    impl TypeExpr {
        pub fn span(&self) -> Span {
            match self {
                TypeExpr::Named(id) => id.span,
                TypeExpr::Arrow { span, .. } => *span,
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Block {
        pub stmts: Vec<Stmt>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum Stmt {
        Let(LetDecl),
        Return {
            value: Option<Expr>,
            span: Span,
        },
        Switch(Switch),
        If(IfStmt),
        Expr {
            expr: Expr,
            span: Span,
        },
    }

    impl Stmt {
        pub fn span(&self) -> Span {
            match self {
                Stmt::Let(d) => d.span,
                Stmt::Return { span, .. } => *span,
                Stmt::Switch(s) => s.span,
                Stmt::If(s) => s.span,
                Stmt::Expr { span, .. } => *span,
            }
        }
    }

    /// Case analysis over one discriminant, or over a tuple of them.
    #[derive(Debug, Clone, Serialize)]
    pub struct Switch {
        pub scrutinees: Vec<Expr>,
        pub cases: Vec<Case>,
        pub default: Option<Block>,
        pub span: Span,
    }

    impl Switch {
        pub fn is_tuple(&self) -> bool {
            self.scrutinees.len() > 1
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct Case {
        pub pattern: CasePattern,
        pub body: Block,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum CasePattern {
        /// `case add`
        Tag(Ident),
        /// `case (email, _)`
        Tuple(Vec<PatElem>, Span),
    }

    impl CasePattern {
        pub fn span(&self) -> Span {
            match self {
                CasePattern::Tag(id) => id.span,
                CasePattern::Tuple(_, span) => *span,
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum PatElem {
        Tag(Ident),
        Wildcard(Span),
        Lit(Lit, Span),
    }

    impl PatElem {
        pub fn span(&self) -> Span {
            match self {
                PatElem::Tag(id) => id.span,
                PatElem::Wildcard(span) | PatElem::Lit(_, span) => *span,
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum IfCond {
        /// `if flag { .. }`
        Bool(Expr),
        /// `if op is add { .. }`
        Is { subject: Expr, tag: Ident },
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct IfStmt {
        pub cond: IfCond,
        pub then_: Block,
        pub else_: Option<ElseBranch>,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum ElseBranch {
        Block(Block),
        If(Box<IfStmt>),
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct FieldInit {
        pub name: Ident,
        pub value: Expr,
        pub span: Span,
    }

    #[derive(Debug, Clone, Serialize)]
    pub enum Expr {
        Lit(Lit, Span),
        Var(Ident),
        /// `Calc::add { a: 1, b: 2 }` or `Light::red`
        Construct {
            union: Ident,
            tag: Ident,
            fields: Vec<FieldInit>,
            span: Span,
        },
        Field {
            base: Box<Expr>,
            field: Ident,
            span: Span,
        },
        Unary {
            op: UnOp,
            expr: Box<Expr>,
            span: Span,
        },
        Binary {
            lhs: Box<Expr>,
            op: BinOp,
            rhs: Box<Expr>,
            span: Span,
        },
        Call {
            callee: Box<Expr>,
            args: Vec<Expr>,
            span: Span,
        },
        /// Zero-argument closure: `fn() { print("hi"); }`
        Lambda {
            ret_ty: Option<TypeExpr>,
            body: Block,
            span: Span,
        },
        /// `shape.accept(Area)`
        Accept {
            target: Box<Expr>,
            visitor: Ident,
            span: Span,
        },
        /// Unchecked type assertion: `expr as! Calc`
        Cast {
            expr: Box<Expr>,
            ty: TypeExpr,
            span: Span,
        },
        Paren {
            inner: Box<Expr>,
            span: Span,
        },
    }

    impl Expr {
        pub fn span(&self) -> Span {
            match self {
                Expr::Lit(_, sp) => *sp,
                Expr::Var(id) => id.span,
                Expr::Construct { span, .. }
                | Expr::Field { span, .. }
                | Expr::Unary { span, .. }
                | Expr::Binary { span, .. }
                | Expr::Call { span, .. }
                | Expr::Lambda { span, .. }
                | Expr::Accept { span, .. }
                | Expr::Cast { span, .. }
                | Expr::Paren { span, .. } => *span,
            }
        }

        /// The variable this expression names, looking through parentheses.
        pub fn as_var(&self) -> Option<&Ident> {
            match self {
                Expr::Var(id) => Some(id),
                Expr::Paren { inner, .. } => inner.as_var(),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub enum UnOp {
        Not,
        Neg,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub enum Lit {
        Int(i64),
        Str(String),
        Bool(bool),
        Unit,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub enum BinOp {
        // logical
        Or,
        And,
        // equality
        Eq,
        Ne,
        // relational
        Lt,
        Le,
        Gt,
        Ge,
        // arithmetic
        Add,
        Sub,
        Mul,
        Div,
    }
}
