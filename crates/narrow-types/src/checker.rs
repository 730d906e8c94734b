// crates/narrow-types/src/checker.rs
// Type checker for narrow - residual narrowing, flow analysis and the
// exhaustiveness obligations

use crate::adt::{FieldDef, UnionDef, UnionRegistry, VariantDef};
use crate::exhaustive::{self, ExhaustivenessError, LiteralPat, SimplifiedPat};
use crate::lint::Lint;
use crate::ty::{is_assignable, Ty, TyConst};
use narrow_ast::ast::{
    BinOp, Block, CasePattern, ElseBranch, Expr, FnDecl, Ident, IfCond, IfStmt, Item, LetDecl,
    Lit, Module, PatElem, Stmt, Switch, TypeAlias, TypeExpr, UnOp, UnionDecl, VisitorDecl,
};
use narrow_ast::span::Span;
use std::collections::{HashMap, HashSet};

/// Functions the checker knows without a declaration.
pub const BUILTINS: [&str; 2] = ["print", "assert_never"];

const PRIMITIVE_TYPES: [&str; 5] = ["Int", "Bool", "String", "Unit", "Never"];

/// Type errors that can occur during type checking
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    /// Type mismatch - expected one type but found another
    #[error("type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: Ty, found: Ty, span: Span },
    #[error("unknown variable `{name}`")]
    UnknownVariable { name: String, span: Span },
    #[error("unknown type `{name}`")]
    UnknownType { name: String, span: Span },
    #[error("union `{union}` has no variant `{tag}`")]
    UnknownVariant {
        union: String,
        tag: String,
        span: Span,
    },
    /// Field access needs the field on every variant still possible
    #[error("no field `{field}` on every variant of {ty}")]
    UnknownField { ty: Ty, field: String, span: Span },
    #[error("missing field `{field}` in `{union}::{tag}`")]
    MissingField {
        union: String,
        tag: String,
        field: String,
        span: Span,
    },
    #[error("duplicate field `{field}`")]
    DuplicateField { field: String, span: Span },
    #[error("duplicate variant `{tag}` in union `{union}`")]
    DuplicateVariant {
        union: String,
        tag: String,
        span: Span,
    },
    #[error("`{name}` is defined more than once")]
    DuplicateDefinition { name: String, span: Span },
    #[error("visitor `{visitor}` handles `{tag}` more than once")]
    DuplicateVisitOp {
        visitor: String,
        tag: String,
        span: Span,
    },
    #[error("unknown visitor `{name}`")]
    UnknownVisitor { name: String, span: Span },
    #[error("expected a union, found {found}")]
    NotAUnion { found: Ty, span: Span },
    /// A case whose variant is no longer in the residual
    #[error("case `{case}` is unreachable: already handled")]
    RedundantCase { case: String, span: Span },
    #[error("pattern has {found} element(s) but the switch has {expected} scrutinee(s)")]
    PatternArity {
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("pattern `{pattern}` cannot match a value of type {expected}")]
    PatternMismatch {
        expected: Ty,
        pattern: String,
        span: Span,
    },
    /// Arity mismatch (different number of arguments)
    #[error("expected {expected} argument(s), found {found}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("{found} is not callable")]
    NotCallable { found: Ty, span: Span },
    #[error("builtin `{name}` can only be called directly")]
    BuiltinNotValue { name: String, span: Span },
    #[error("operator `{op}` is not defined for {found}")]
    InvalidOperand { op: String, found: Ty, span: Span },
    /// A residual that still holds real variants reached `assert_never`
    #[error(
        "non-exhaustive: {} not handled (residual {residual} is not assignable to Never)",
        .missing.join(", ")
    )]
    NonExhaustive {
        residual: Ty,
        missing: Vec<String>,
        span: Span,
    },
    /// Control can fall off the end of a body whose result is not Unit
    #[error(
        "`{func}` declares result {expected} but control can reach the end of its body{}",
        uncovered_note(.uncovered)
    )]
    MissingReturn {
        func: String,
        expected: Ty,
        uncovered: Option<String>,
        span: Span,
    },
    #[error("visitor `{visitor}` does not handle {}", .missing.join(", "))]
    IncompleteVisitor {
        visitor: String,
        missing: Vec<String>,
        span: Span,
    },
    /// A top-level `let` that, through the functions it calls, reads a
    /// `let` that is not bound yet
    #[error("`{name}` is read while evaluating `let {binding}`, before `{name}` is defined")]
    ReadBeforeDefinition {
        name: String,
        binding: String,
        span: Span,
    },
    /// Exhaustiveness checking limit exceeded (DoS protection)
    #[error("{msg}")]
    MatchTooComplex { msg: String, span: Span },
}

fn uncovered_note(uncovered: &Option<String>) -> String {
    match uncovered {
        Some(u) => format!(" (unhandled: {})", u),
        None => String::new(),
    }
}

impl TypeError {
    /// Location of the failed obligation
    pub fn span(&self) -> Span {
        match self {
            TypeError::Mismatch { span, .. }
            | TypeError::UnknownVariable { span, .. }
            | TypeError::UnknownType { span, .. }
            | TypeError::UnknownVariant { span, .. }
            | TypeError::UnknownField { span, .. }
            | TypeError::MissingField { span, .. }
            | TypeError::DuplicateField { span, .. }
            | TypeError::DuplicateVariant { span, .. }
            | TypeError::DuplicateDefinition { span, .. }
            | TypeError::DuplicateVisitOp { span, .. }
            | TypeError::UnknownVisitor { span, .. }
            | TypeError::NotAUnion { span, .. }
            | TypeError::RedundantCase { span, .. }
            | TypeError::PatternArity { span, .. }
            | TypeError::PatternMismatch { span, .. }
            | TypeError::ArityMismatch { span, .. }
            | TypeError::NotCallable { span, .. }
            | TypeError::BuiltinNotValue { span, .. }
            | TypeError::InvalidOperand { span, .. }
            | TypeError::NonExhaustive { span, .. }
            | TypeError::MissingReturn { span, .. }
            | TypeError::IncompleteVisitor { span, .. }
            | TypeError::ReadBeforeDefinition { span, .. }
            | TypeError::MatchTooComplex { span, .. } => *span,
        }
    }
}

/// Variable types at a program point. Narrowing replaces an entry.
type Env = HashMap<String, Ty>;

/// How a statement or block can be left.
#[derive(Debug, Clone)]
struct Flow {
    /// Control can reach the next statement
    completes: bool,
    /// What a non-exhaustive case analysis let through, for diagnostics
    uncovered: Option<String>,
}

impl Flow {
    fn completes() -> Self {
        Flow {
            completes: true,
            uncovered: None,
        }
    }

    fn diverges() -> Self {
        Flow {
            completes: false,
            uncovered: None,
        }
    }
}

/// Completing paths out of a branching statement.
#[derive(Default)]
struct Exits {
    envs: Vec<Env>,
    uncovered: Option<String>,
}

impl Exits {
    fn push(&mut self, flow: Flow, env: Env) {
        if flow.completes {
            self.envs.push(env);
            if self.uncovered.is_none() {
                self.uncovered = flow.uncovered;
            }
        }
    }

    fn finish(self, before: &Env) -> (Flow, Env) {
        if self.envs.is_empty() {
            return (Flow::diverges(), before.clone());
        }
        let flow = Flow {
            completes: true,
            uncovered: self.uncovered,
        };
        (flow, merge(self.envs))
    }
}

/// Join the environments of paths that meet: a narrowed union widens to the
/// variants any path allows.
fn merge(envs: Vec<Env>) -> Env {
    let mut iter = envs.into_iter();
    let Some(mut acc) = iter.next() else {
        return Env::new();
    };
    for env in iter {
        acc = acc
            .into_iter()
            .filter_map(|(name, ty)| env.get(&name).map(|other| (name, join(&ty, other))))
            .collect();
    }
    acc
}

fn join(a: &Ty, b: &Ty) -> Ty {
    match (a, b) {
        (Ty::Never, t) | (t, Ty::Never) => t.clone(),
        (Ty::Union(x), Ty::Union(y)) if x.name == y.name => Ty::union_of(
            x.name.clone(),
            x.variants.union(&y.variants).cloned().collect(),
            x.total,
        ),
        _ => a.clone(),
    }
}

fn narrowed(env: &Env, var: Option<&Ident>, ty: Ty) -> Env {
    let mut env = env.clone();
    if let Some(var) = var {
        env.insert(var.text.clone(), ty);
    }
    env
}

/// The result type a body must produce.
struct FnCtx {
    ret: Ty,
}

#[derive(Clone, Debug)]
struct VisitorSig {
    target: String,
    ret: Ty,
}

/// An item whose body can read globals.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Owner {
    /// A function or top-level let
    Value(String),
    Visitor(String),
}

#[derive(Clone, Debug)]
struct GlobalRef {
    target: Owner,
    span: Span,
}

/// Type checker for a module
#[derive(Debug, Default)]
pub struct TypeChecker {
    registry: UnionRegistry,
    aliases: HashMap<String, Ty>,
    /// Functions and top-level lets
    globals: HashMap<String, Ty>,
    visitors: HashMap<String, VisitorSig>,
    lints: Vec<Lint>,
    /// Item whose body is being checked
    owner: Option<Owner>,
    /// Globals and visitors each item refers to
    refs: HashMap<Owner, Vec<GlobalRef>>,
    /// Union each tag test is made against, by the span of the tested
    /// expression
    discriminants: HashMap<Span, String>,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &UnionRegistry {
        &self.registry
    }

    /// Lints collected while checking.
    pub fn lints(&self) -> &[Lint] {
        &self.lints
    }

    /// The union a `switch` scrutinee or `if .. is` subject was checked
    /// against. Keyed by the span of that expression.
    pub fn discriminants(&self) -> &HashMap<Span, String> {
        &self.discriminants
    }

    /// Type of a function or top-level let.
    pub fn global_ty(&self, name: &str) -> Option<&Ty> {
        self.globals.get(name)
    }

    /// Type check an entire module.
    ///
    /// Pass 1: union names and tags (so field types may mention any union)
    /// Pass 2: type aliases, in order
    /// Pass 3: variant fields
    /// Pass 4: function and visitor signatures
    /// Pass 5: top-level lets, in order
    /// Pass 6: function bodies and visitor operations
    /// Pass 7: no `let` reads a later `let` through a call
    pub fn check_module(&mut self, module: &Module) -> Result<(), TypeError> {
        for item in &module.items {
            if let Item::Union(decl) = item {
                self.declare_union(decl)?;
            }
        }
        for item in &module.items {
            if let Item::TypeAlias(alias) = item {
                self.declare_alias(alias)?;
            }
        }
        for item in &module.items {
            if let Item::Union(decl) = item {
                self.resolve_fields(decl)?;
            }
        }
        for item in &module.items {
            match item {
                Item::Fn(decl) => self.declare_fn(decl)?,
                Item::Visitor(decl) => self.declare_visitor(decl)?,
                _ => {}
            }
        }
        for item in &module.items {
            if let Item::Let(decl) = item {
                self.owner = Some(Owner::Value(decl.name.text.clone()));
                let ty = self.check_let_value(&Env::new(), decl)?;
                self.claim_value_name(&decl.name)?;
                self.globals.insert(decl.name.text.clone(), ty);
            }
        }
        for item in &module.items {
            match item {
                Item::Fn(decl) => {
                    self.owner = Some(Owner::Value(decl.name.text.clone()));
                    self.check_fn(decl)?;
                }
                Item::Visitor(decl) => {
                    self.owner = Some(Owner::Visitor(decl.name.text.clone()));
                    self.check_visitor(decl)?;
                }
                _ => {}
            }
        }
        self.owner = None;
        self.check_let_order(module)
    }

    fn record_ref(&mut self, target: Owner, span: Span) {
        if let Some(owner) = &self.owner {
            self.refs
                .entry(owner.clone())
                .or_default()
                .push(GlobalRef { target, span });
        }
    }

    /// Lets run in declaration order, so every function a `let` can reach
    /// may only read lets declared before it.
    fn check_let_order(&self, module: &Module) -> Result<(), TypeError> {
        let lets: Vec<&str> = module
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Let(decl) => Some(decl.name.text.as_str()),
                _ => None,
            })
            .collect();
        let order: HashMap<&str, usize> =
            lets.iter().enumerate().map(|(i, &name)| (name, i)).collect();

        for (index, &binding) in lets.iter().enumerate() {
            let start = Owner::Value(binding.to_string());
            let mut seen = HashSet::from([start.clone()]);
            let mut stack = vec![start];
            while let Some(owner) = stack.pop() {
                for r in self.refs.get(&owner).into_iter().flatten() {
                    if let Owner::Value(name) = &r.target {
                        if let Some(&other) = order.get(name.as_str()) {
                            if other >= index {
                                return Err(TypeError::ReadBeforeDefinition {
                                    name: name.clone(),
                                    binding: binding.to_string(),
                                    span: r.span,
                                });
                            }
                            continue;
                        }
                    }
                    if seen.insert(r.target.clone()) {
                        stack.push(r.target.clone());
                    }
                }
            }
        }
        Ok(())
    }

    // ======= declarations =======

    fn claim_type_name(&self, name: &Ident) -> Result<(), TypeError> {
        if PRIMITIVE_TYPES.contains(&name.text.as_str())
            || self.registry.contains(&name.text)
            || self.aliases.contains_key(&name.text)
        {
            return Err(TypeError::DuplicateDefinition {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(())
    }

    fn claim_value_name(&self, name: &Ident) -> Result<(), TypeError> {
        if BUILTINS.contains(&name.text.as_str()) || self.globals.contains_key(&name.text) {
            return Err(TypeError::DuplicateDefinition {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(())
    }

    fn declare_union(&mut self, decl: &UnionDecl) -> Result<(), TypeError> {
        self.claim_type_name(&decl.name)?;
        let mut seen = HashSet::new();
        for v in &decl.variants {
            if !seen.insert(v.tag.text.as_str()) {
                return Err(TypeError::DuplicateVariant {
                    union: decl.name.text.clone(),
                    tag: v.tag.text.clone(),
                    span: v.tag.span,
                });
            }
        }
        // Fields are resolved once every union name is known.
        let variants = decl
            .variants
            .iter()
            .map(|v| VariantDef::unit(v.tag.text.clone()))
            .collect();
        self.registry
            .register(UnionDef::new(decl.name.text.clone(), variants))
            .map_err(|_| TypeError::DuplicateDefinition {
                name: decl.name.text.clone(),
                span: decl.name.span,
            })
    }

    fn declare_alias(&mut self, alias: &TypeAlias) -> Result<(), TypeError> {
        self.claim_type_name(&alias.name)?;
        let ty = self.resolve_type(&alias.ty)?;
        self.aliases.insert(alias.name.text.clone(), ty);
        Ok(())
    }

    fn resolve_fields(&mut self, decl: &UnionDecl) -> Result<(), TypeError> {
        let mut variants = Vec::with_capacity(decl.variants.len());
        for v in &decl.variants {
            let mut seen = HashSet::new();
            let mut fields = Vec::with_capacity(v.fields.len());
            for f in &v.fields {
                if !seen.insert(f.name.text.as_str()) {
                    return Err(TypeError::DuplicateField {
                        field: f.name.text.clone(),
                        span: f.name.span,
                    });
                }
                fields.push(FieldDef::new(f.name.text.clone(), self.resolve_type(&f.ty)?));
            }
            variants.push(VariantDef::new(v.tag.text.clone(), fields));
        }
        if let Some(def) = self.registry.get_mut(&decl.name.text) {
            def.variants = variants;
        }
        Ok(())
    }

    fn declare_fn(&mut self, decl: &FnDecl) -> Result<(), TypeError> {
        self.claim_value_name(&decl.name)?;
        let (params, ret) = self.fn_signature(decl)?;
        let tys = params.into_iter().map(|(_, ty)| ty).collect();
        self.globals
            .insert(decl.name.text.clone(), Ty::arrow(tys, ret));
        Ok(())
    }

    fn fn_signature(&self, decl: &FnDecl) -> Result<(Vec<(String, Ty)>, Ty), TypeError> {
        let mut seen = HashSet::new();
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            if !seen.insert(p.name.text.as_str()) {
                return Err(TypeError::DuplicateDefinition {
                    name: p.name.text.clone(),
                    span: p.name.span,
                });
            }
            params.push((p.name.text.clone(), self.resolve_type(&p.ty)?));
        }
        let ret = match &decl.ret_ty {
            Some(te) => self.resolve_type(te)?,
            None => Ty::unit(),
        };
        Ok((params, ret))
    }

    /// A visitor must declare exactly one operation per variant of its target.
    fn declare_visitor(&mut self, decl: &VisitorDecl) -> Result<(), TypeError> {
        if self.visitors.contains_key(&decl.name.text) {
            return Err(TypeError::DuplicateDefinition {
                name: decl.name.text.clone(),
                span: decl.name.span,
            });
        }
        let def = self
            .registry
            .get(&decl.target.text)
            .ok_or_else(|| TypeError::UnknownType {
                name: decl.target.text.clone(),
                span: decl.target.span,
            })?;

        let mut seen = HashSet::new();
        for op in &decl.ops {
            if def.find_variant(&op.tag.text).is_none() {
                return Err(TypeError::UnknownVariant {
                    union: def.name.clone(),
                    tag: op.tag.text.clone(),
                    span: op.tag.span,
                });
            }
            if !seen.insert(op.tag.text.as_str()) {
                return Err(TypeError::DuplicateVisitOp {
                    visitor: decl.name.text.clone(),
                    tag: op.tag.text.clone(),
                    span: op.tag.span,
                });
            }
        }
        let missing: Vec<String> = def
            .tags()
            .filter(|t| !seen.contains(t))
            .map(|t| format!("{}::{}", def.name, t))
            .collect();
        if !missing.is_empty() {
            return Err(TypeError::IncompleteVisitor {
                visitor: decl.name.text.clone(),
                missing,
                span: decl.name.span,
            });
        }

        let ret = self.resolve_type(&decl.ret_ty)?;
        self.visitors.insert(
            decl.name.text.clone(),
            VisitorSig {
                target: decl.target.text.clone(),
                ret,
            },
        );
        Ok(())
    }

    fn resolve_type(&self, te: &TypeExpr) -> Result<Ty, TypeError> {
        match te {
            TypeExpr::Named(id) => match id.text.as_str() {
                "Int" => Ok(Ty::int()),
                "Bool" => Ok(Ty::bool_()),
                "String" => Ok(Ty::string()),
                "Unit" => Ok(Ty::unit()),
                "Never" => Ok(Ty::Never),
                name => {
                    if let Some(def) = self.registry.get(name) {
                        Ok(def.full_ty())
                    } else if let Some(ty) = self.aliases.get(name) {
                        Ok(ty.clone())
                    } else {
                        Err(TypeError::UnknownType {
                            name: name.to_string(),
                            span: id.span,
                        })
                    }
                }
            },
            TypeExpr::Arrow { params, ret, .. } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_type(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Ty::arrow(params, self.resolve_type(ret)?))
            }
        }
    }

    // ======= bodies =======

    fn check_fn(&mut self, decl: &FnDecl) -> Result<(), TypeError> {
        let (params, ret) = self.fn_signature(decl)?;
        let ret_span = decl.ret_ty.as_ref().map_or(decl.name.span, TypeExpr::span);
        let env: Env = params.into_iter().collect();
        self.check_body(&decl.name.text, env, ret, &decl.body, ret_span)
    }

    fn check_visitor(&mut self, decl: &VisitorDecl) -> Result<(), TypeError> {
        let Some(sig) = self.visitors.get(&decl.name.text).cloned() else {
            return Err(TypeError::UnknownVisitor {
                name: decl.name.text.clone(),
                span: decl.name.span,
            });
        };
        let total = self
            .registry
            .get(&sig.target)
            .map_or(0, |def| def.variants.len());
        for op in &decl.ops {
            let mut env = Env::new();
            env.insert(
                op.binder.text.clone(),
                Ty::variant(sig.target.clone(), op.tag.text.clone(), total),
            );
            let func = format!("{}::{}", decl.name.text, op.tag.text);
            self.check_body(&func, env, sig.ret.clone(), &op.body, op.tag.span)?;
        }
        Ok(())
    }

    /// Check a body and discharge the declared-result obligation: if control
    /// can fall off the end, the result type must accept Unit.
    fn check_body(
        &mut self,
        func: &str,
        env: Env,
        ret: Ty,
        body: &Block,
        ret_span: Span,
    ) -> Result<(), TypeError> {
        let fcx = FnCtx { ret };
        let (flow, _) = self.check_block(&fcx, body, &env)?;
        if flow.completes && !is_assignable(&Ty::unit(), &fcx.ret) {
            return Err(TypeError::MissingReturn {
                func: func.to_string(),
                expected: fcx.ret,
                uncovered: flow.uncovered,
                span: ret_span,
            });
        }
        Ok(())
    }

    fn check_let_value(&mut self, env: &Env, decl: &LetDecl) -> Result<Ty, TypeError> {
        let found = self.infer_expr(env, &decl.value)?;
        match &decl.ty {
            Some(te) => {
                let want = self.resolve_type(te)?;
                expect(&want, &found, decl.value.span())?;
                Ok(want)
            }
            None => Ok(found),
        }
    }

    /// Check a block; the returned environment holds only names visible
    /// before it, with whatever narrowing survived.
    fn check_block(
        &mut self,
        fcx: &FnCtx,
        block: &Block,
        env: &Env,
    ) -> Result<(Flow, Env), TypeError> {
        let mut cur = env.clone();
        let mut shadowed: HashMap<String, Option<Ty>> = HashMap::new();
        let mut flow = Flow::completes();
        let mut reported = false;

        for stmt in &block.stmts {
            if !flow.completes && !reported {
                self.lints.push(Lint::unreachable_code(stmt.span()));
                reported = true;
            }
            if let Stmt::Let(decl) = stmt {
                shadowed
                    .entry(decl.name.text.clone())
                    .or_insert_with(|| cur.get(&decl.name.text).cloned());
            }
            let (next, next_env) = self.check_stmt(fcx, stmt, &cur)?;
            cur = next_env;
            if flow.completes {
                flow = if next.completes {
                    Flow {
                        completes: true,
                        uncovered: next.uncovered.or(flow.uncovered),
                    }
                } else {
                    Flow::diverges()
                };
            }
        }

        for (name, prev) in shadowed {
            match prev {
                Some(ty) => cur.insert(name, ty),
                None => cur.remove(&name),
            };
        }
        Ok((flow, cur))
    }

    fn check_stmt(
        &mut self,
        fcx: &FnCtx,
        stmt: &Stmt,
        env: &Env,
    ) -> Result<(Flow, Env), TypeError> {
        match stmt {
            Stmt::Let(decl) => {
                let ty = self.check_let_value(env, decl)?;
                let flow = if ty.is_never() {
                    Flow::diverges()
                } else {
                    Flow::completes()
                };
                let mut env = env.clone();
                env.insert(decl.name.text.clone(), ty);
                Ok((flow, env))
            }
            Stmt::Return { value, span } => {
                let (found, at) = match value {
                    Some(e) => (self.infer_expr(env, e)?, e.span()),
                    None => (Ty::unit(), *span),
                };
                expect(&fcx.ret, &found, at)?;
                Ok((Flow::diverges(), env.clone()))
            }
            Stmt::Expr { expr, span } => {
                let ty = self.infer_expr(env, expr)?;
                if ty.is_fn() {
                    self.lints.push(Lint::unused_effect(&ty, *span));
                }
                let flow = if ty.is_never() {
                    Flow::diverges()
                } else {
                    Flow::completes()
                };
                Ok((flow, env.clone()))
            }
            Stmt::Switch(sw) if sw.is_tuple() => self.check_tuple_switch(fcx, sw, env),
            Stmt::Switch(sw) => self.check_switch(fcx, sw, env),
            Stmt::If(stmt) => self.check_if(fcx, stmt, env),
        }
    }

    /// Sequential case analysis over one discriminant.
    ///
    /// Each case removes its variant from the residual; `default` receives
    /// the residual (`Never` once every variant is handled). Without a
    /// default, a non-empty residual falls through to the next statement.
    fn check_switch(
        &mut self,
        fcx: &FnCtx,
        sw: &Switch,
        env: &Env,
    ) -> Result<(Flow, Env), TypeError> {
        let scrutinee = &sw.scrutinees[0];
        let scrut_ty = self.infer_expr(env, scrutinee)?;
        let var = scrutinee.as_var();

        let u = match scrut_ty {
            Ty::Union(u) => u,
            Ty::Never => {
                // Nothing left to handle: every case is dead.
                if let Some(case) = sw.cases.first() {
                    return Err(TypeError::RedundantCase {
                        case: pattern_text(&case.pattern),
                        span: case.pattern.span(),
                    });
                }
                let mut exits = Exits::default();
                if let Some(default) = &sw.default {
                    let (flow, out) = self.check_block(fcx, default, env)?;
                    exits.push(flow, out);
                }
                return Ok(exits.finish(env));
            }
            found => {
                return Err(TypeError::NotAUnion {
                    found,
                    span: scrutinee.span(),
                })
            }
        };
        self.discriminants.insert(scrutinee.span(), u.name.clone());

        let mut residual = u.variants.clone();
        let mut exits = Exits::default();
        for case in &sw.cases {
            let tag = match &case.pattern {
                CasePattern::Tag(tag) => tag,
                CasePattern::Tuple(elems, span) => {
                    return Err(TypeError::PatternArity {
                        expected: 1,
                        found: elems.len(),
                        span: *span,
                    })
                }
            };
            self.expect_variant(&u.name, tag)?;
            if !residual.remove(&tag.text) {
                return Err(TypeError::RedundantCase {
                    case: format!("{}::{}", u.name, tag.text),
                    span: tag.span,
                });
            }
            let case_env = narrowed(env, var, Ty::variant(u.name.clone(), tag.text.clone(), u.total));
            let (flow, out) = self.check_block(fcx, &case.body, &case_env)?;
            exits.push(flow, out);
        }

        let rest = Ty::union_of(u.name.clone(), residual, u.total);
        match &sw.default {
            Some(default) => {
                let default_env = narrowed(env, var, rest);
                let (flow, out) = self.check_block(fcx, default, &default_env)?;
                exits.push(flow, out);
            }
            None => {
                if let Ty::Union(left) = &rest {
                    let uncovered = left.qualified().join(" | ");
                    let flow = Flow {
                        completes: true,
                        uncovered: Some(uncovered),
                    };
                    exits.push(flow, narrowed(env, var, rest));
                }
            }
        }
        Ok(exits.finish(env))
    }

    /// Case analysis over several scrutinees at once, checked as a pattern
    /// matrix over their cross-product.
    fn check_tuple_switch(
        &mut self,
        fcx: &FnCtx,
        sw: &Switch,
        env: &Env,
    ) -> Result<(Flow, Env), TypeError> {
        let columns = sw
            .scrutinees
            .iter()
            .map(|e| self.infer_expr(env, e))
            .collect::<Result<Vec<_>, _>>()?;
        let vars: Vec<Option<&Ident>> = sw.scrutinees.iter().map(Expr::as_var).collect();
        for (scrutinee, column) in sw.scrutinees.iter().zip(&columns) {
            if let Ty::Union(u) = column {
                self.discriminants.insert(scrutinee.span(), u.name.clone());
            }
        }

        let mut rows = Vec::with_capacity(sw.cases.len());
        let mut case_envs = Vec::with_capacity(sw.cases.len());
        for case in &sw.cases {
            let elems = match &case.pattern {
                CasePattern::Tuple(elems, _) if elems.len() == columns.len() => elems,
                CasePattern::Tuple(elems, span) => {
                    return Err(TypeError::PatternArity {
                        expected: columns.len(),
                        found: elems.len(),
                        span: *span,
                    })
                }
                CasePattern::Tag(tag) => {
                    return Err(TypeError::PatternArity {
                        expected: columns.len(),
                        found: 1,
                        span: tag.span,
                    })
                }
            };

            let mut row = Vec::with_capacity(elems.len());
            let mut case_env = env.clone();
            for ((elem, column), var) in elems.iter().zip(&columns).zip(&vars) {
                row.push(self.simplify_elem(elem, column)?);
                if let (PatElem::Tag(tag), Ty::Union(u), Some(var)) = (elem, column, var) {
                    case_env.insert(
                        var.text.clone(),
                        Ty::variant(u.name.clone(), tag.text.clone(), u.total),
                    );
                }
            }
            rows.push(row);
            case_envs.push(case_env);
        }

        let (witness, redundant) =
            exhaustive::check_match(rows, &columns, sw.default.is_some(), sw.span)
                .map_err(too_complex)?;
        if let Some(case) = redundant.first().and_then(|&i| sw.cases.get(i)) {
            return Err(TypeError::RedundantCase {
                case: pattern_text(&case.pattern),
                span: case.pattern.span(),
            });
        }

        let mut exits = Exits::default();
        for (case, case_env) in sw.cases.iter().zip(&case_envs) {
            let (flow, out) = self.check_block(fcx, &case.body, case_env)?;
            exits.push(flow, out);
        }
        match &sw.default {
            Some(default) => {
                let (flow, out) = self.check_block(fcx, default, env)?;
                exits.push(flow, out);
            }
            None => {
                if let Some(witness) = witness {
                    let flow = Flow {
                        completes: true,
                        uncovered: Some(witness.to_string()),
                    };
                    exits.push(flow, env.clone());
                }
            }
        }
        Ok(exits.finish(env))
    }

    fn simplify_elem(&self, elem: &PatElem, column: &Ty) -> Result<SimplifiedPat, TypeError> {
        match elem {
            PatElem::Wildcard(_) => Ok(SimplifiedPat::Wildcard),
            PatElem::Tag(tag) => match column {
                Ty::Union(u) => {
                    self.expect_variant(&u.name, tag)?;
                    let qualified = format!("{}::{}", u.name, tag.text);
                    if !u.contains(&tag.text) {
                        // Narrowed away before this switch.
                        return Err(TypeError::RedundantCase {
                            case: qualified,
                            span: tag.span,
                        });
                    }
                    Ok(SimplifiedPat::Constructor(qualified))
                }
                other => Err(TypeError::PatternMismatch {
                    expected: other.clone(),
                    pattern: tag.text.clone(),
                    span: tag.span,
                }),
            },
            PatElem::Lit(lit, span) => match (lit, column) {
                (Lit::Int(n), Ty::Const(TyConst::Int)) => {
                    Ok(SimplifiedPat::Literal(LiteralPat::Int(*n)))
                }
                (Lit::Str(s), Ty::Const(TyConst::String)) => {
                    Ok(SimplifiedPat::Literal(LiteralPat::String(s.clone())))
                }
                (Lit::Bool(b), Ty::Const(TyConst::Bool)) => {
                    Ok(SimplifiedPat::Literal(LiteralPat::Bool(*b)))
                }
                (Lit::Unit, Ty::Const(TyConst::Unit)) => Ok(SimplifiedPat::Wildcard),
                _ => Err(TypeError::PatternMismatch {
                    expected: column.clone(),
                    pattern: lit_text(lit),
                    span: *span,
                }),
            },
        }
    }

    /// `if cond { .. }` or `if x is tag { .. }`, with optional `else` chain.
    ///
    /// `is` narrows the subject to the tag in the then-branch and to the
    /// remaining variants in the else-branch (explicit or implicit).
    fn check_if(
        &mut self,
        fcx: &FnCtx,
        stmt: &IfStmt,
        env: &Env,
    ) -> Result<(Flow, Env), TypeError> {
        let (then_env, else_env, rest) = match &stmt.cond {
            IfCond::Bool(cond) => {
                let ty = self.infer_expr(env, cond)?;
                expect(&Ty::bool_(), &ty, cond.span())?;
                (env.clone(), env.clone(), None)
            }
            IfCond::Is { subject, tag } => {
                let ty = self.infer_expr(env, subject)?;
                let Ty::Union(u) = ty else {
                    return Err(TypeError::NotAUnion {
                        found: ty,
                        span: subject.span(),
                    });
                };
                self.expect_variant(&u.name, tag)?;
                if !u.contains(&tag.text) {
                    return Err(TypeError::RedundantCase {
                        case: format!("{}::{}", u.name, tag.text),
                        span: tag.span,
                    });
                }
                self.discriminants.insert(subject.span(), u.name.clone());
                let var = subject.as_var();
                let mut others = u.variants.clone();
                others.remove(&tag.text);
                let rest = Ty::union_of(u.name.clone(), others, u.total);
                let then_env = narrowed(env, var, Ty::variant(u.name.clone(), tag.text.clone(), u.total));
                let else_env = narrowed(env, var, rest.clone());
                (then_env, else_env, Some(rest))
            }
        };

        let mut exits = Exits::default();
        let (flow, out) = self.check_block(fcx, &stmt.then_, &then_env)?;
        exits.push(flow, out);

        match &stmt.else_ {
            Some(ElseBranch::Block(block)) => {
                let (flow, out) = self.check_block(fcx, block, &else_env)?;
                exits.push(flow, out);
            }
            Some(ElseBranch::If(inner)) => {
                let (flow, out) = self.check_if(fcx, inner, &else_env)?;
                exits.push(flow, out);
            }
            None => match rest {
                // Every variant was tested: the implicit else is dead.
                Some(Ty::Never) => {}
                Some(Ty::Union(left)) => {
                    let flow = Flow {
                        completes: true,
                        uncovered: Some(left.qualified().join(" | ")),
                    };
                    exits.push(flow, else_env);
                }
                _ => exits.push(Flow::completes(), else_env),
            },
        }
        Ok(exits.finish(env))
    }

    fn expect_variant(&self, union: &str, tag: &Ident) -> Result<(), TypeError> {
        let known = self
            .registry
            .get(union)
            .is_some_and(|def| def.find_variant(&tag.text).is_some());
        if known {
            Ok(())
        } else {
            Err(TypeError::UnknownVariant {
                union: union.to_string(),
                tag: tag.text.clone(),
                span: tag.span,
            })
        }
    }

    // ======= expressions =======

    fn infer_expr(&mut self, env: &Env, expr: &Expr) -> Result<Ty, TypeError> {
        match expr {
            Expr::Lit(lit, _) => Ok(match lit {
                Lit::Int(_) => Ty::int(),
                Lit::Str(_) => Ty::string(),
                Lit::Bool(_) => Ty::bool_(),
                Lit::Unit => Ty::unit(),
            }),

            Expr::Var(id) => self.lookup(env, id),

            Expr::Construct {
                union, tag, fields, ..
            } => {
                let def = self
                    .registry
                    .get(&union.text)
                    .ok_or_else(|| TypeError::UnknownType {
                        name: union.text.clone(),
                        span: union.span,
                    })?;
                let total = def.variants.len();
                let variant = def
                    .find_variant(&tag.text)
                    .cloned()
                    .ok_or_else(|| TypeError::UnknownVariant {
                        union: union.text.clone(),
                        tag: tag.text.clone(),
                        span: tag.span,
                    })?;
                let result = Ty::variant(union.text.clone(), tag.text.clone(), total);

                let mut seen = HashSet::new();
                for init in fields {
                    if !seen.insert(init.name.text.as_str()) {
                        return Err(TypeError::DuplicateField {
                            field: init.name.text.clone(),
                            span: init.name.span,
                        });
                    }
                    let field = variant.field(&init.name.text).ok_or_else(|| {
                        TypeError::UnknownField {
                            ty: result.clone(),
                            field: init.name.text.clone(),
                            span: init.name.span,
                        }
                    })?;
                    let found = self.infer_expr(env, &init.value)?;
                    expect(&field.ty, &found, init.value.span())?;
                }
                if let Some(missing) = variant.fields.iter().find(|f| !seen.contains(f.name.as_str())) {
                    return Err(TypeError::MissingField {
                        union: union.text.clone(),
                        tag: tag.text.clone(),
                        field: missing.name.clone(),
                        span: expr.span(),
                    });
                }
                Ok(result)
            }

            Expr::Field { base, field, .. } => {
                let base_ty = self.infer_expr(env, base)?;
                let found = match &base_ty {
                    Ty::Union(u) => self.registry.field_ty(u, &field.text),
                    _ => None,
                };
                found.ok_or_else(|| TypeError::UnknownField {
                    ty: base_ty,
                    field: field.text.clone(),
                    span: field.span,
                })
            }

            Expr::Unary { op, expr: inner, .. } => {
                let ty = self.infer_expr(env, inner)?;
                let want = match op {
                    UnOp::Not => Ty::bool_(),
                    UnOp::Neg => Ty::int(),
                };
                expect(&want, &ty, inner.span())?;
                Ok(want)
            }

            Expr::Binary { lhs, op, rhs, .. } => {
                let l = self.infer_expr(env, lhs)?;
                let r = self.infer_expr(env, rhs)?;
                self.infer_binary(*op, (&l, lhs.span()), (&r, rhs.span()))
            }

            Expr::Call { callee, args, span } => {
                if let Expr::Var(id) = callee.as_ref() {
                    if BUILTINS.contains(&id.text.as_str()) && !env.contains_key(&id.text) {
                        return self.check_builtin(env, id, args, *span);
                    }
                }
                let callee_ty = self.infer_expr(env, callee)?;
                let Ty::Arrow(params, ret) = callee_ty else {
                    return Err(TypeError::NotCallable {
                        found: callee_ty,
                        span: callee.span(),
                    });
                };
                if params.len() != args.len() {
                    return Err(TypeError::ArityMismatch {
                        expected: params.len(),
                        found: args.len(),
                        span: *span,
                    });
                }
                for (param, arg) in params.iter().zip(args) {
                    let found = self.infer_expr(env, arg)?;
                    expect(param, &found, arg.span())?;
                }
                Ok(*ret)
            }

            Expr::Lambda { ret_ty, body, span } => {
                let (ret, ret_span) = match ret_ty {
                    Some(te) => (self.resolve_type(te)?, te.span()),
                    None => (Ty::unit(), *span),
                };
                // Captures see the narrowed types at the point of creation.
                self.check_body("<closure>", env.clone(), ret.clone(), body, ret_span)?;
                Ok(Ty::thunk(ret))
            }

            Expr::Accept {
                target, visitor, ..
            } => {
                let sig = self.visitors.get(&visitor.text).cloned().ok_or_else(|| {
                    TypeError::UnknownVisitor {
                        name: visitor.text.clone(),
                        span: visitor.span,
                    }
                })?;
                self.record_ref(Owner::Visitor(visitor.text.clone()), visitor.span);
                let found = self.infer_expr(env, target)?;
                let accepted = match &found {
                    Ty::Union(u) => u.name == sig.target,
                    Ty::Never => true,
                    _ => false,
                };
                if !accepted {
                    let expected = self
                        .registry
                        .get(&sig.target)
                        .map_or(Ty::Never, UnionDef::full_ty);
                    return Err(TypeError::Mismatch {
                        expected,
                        found,
                        span: target.span(),
                    });
                }
                Ok(sig.ret)
            }

            // Unchecked: the operand is still checked, its type is discarded.
            Expr::Cast { expr: inner, ty, .. } => {
                self.infer_expr(env, inner)?;
                self.resolve_type(ty)
            }

            Expr::Paren { inner, .. } => self.infer_expr(env, inner),
        }
    }

    fn lookup(&mut self, env: &Env, id: &Ident) -> Result<Ty, TypeError> {
        if let Some(ty) = env.get(&id.text) {
            return Ok(ty.clone());
        }
        if let Some(ty) = self.globals.get(&id.text).cloned() {
            self.record_ref(Owner::Value(id.text.clone()), id.span);
            return Ok(ty);
        }
        if BUILTINS.contains(&id.text.as_str()) {
            return Err(TypeError::BuiltinNotValue {
                name: id.text.clone(),
                span: id.span,
            });
        }
        Err(TypeError::UnknownVariable {
            name: id.text.clone(),
            span: id.span,
        })
    }

    /// `print(x) -> Unit` accepts anything; `assert_never(x) -> Never`
    /// type-checks only when `x` is uninhabited.
    fn check_builtin(
        &mut self,
        env: &Env,
        name: &Ident,
        args: &[Expr],
        span: Span,
    ) -> Result<Ty, TypeError> {
        let [arg] = args else {
            return Err(TypeError::ArityMismatch {
                expected: 1,
                found: args.len(),
                span,
            });
        };
        let ty = self.infer_expr(env, arg)?;
        if name.text != "assert_never" {
            return Ok(Ty::unit());
        }
        if ty.is_never() {
            return Ok(Ty::Never);
        }
        let missing = match &ty {
            Ty::Union(u) => u.qualified(),
            other => vec![other.to_string()],
        };
        Err(TypeError::NonExhaustive {
            residual: ty,
            missing,
            span: arg.span(),
        })
    }

    fn infer_binary(
        &self,
        op: BinOp,
        (l, lspan): (&Ty, Span),
        (r, rspan): (&Ty, Span),
    ) -> Result<Ty, TypeError> {
        match op {
            BinOp::And | BinOp::Or => {
                expect(&Ty::bool_(), l, lspan)?;
                expect(&Ty::bool_(), r, rspan)?;
                Ok(Ty::bool_())
            }
            BinOp::Add if matches!(l, Ty::Const(TyConst::String)) => {
                expect(&Ty::string(), r, rspan)?;
                Ok(Ty::string())
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                expect(&Ty::int(), l, lspan)?;
                expect(&Ty::int(), r, rspan)?;
                Ok(Ty::int())
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                expect(&Ty::int(), l, lspan)?;
                expect(&Ty::int(), r, rspan)?;
                Ok(Ty::bool_())
            }
            BinOp::Eq | BinOp::Ne => {
                if !matches!(l, Ty::Const(_)) {
                    return Err(TypeError::InvalidOperand {
                        op: binop_symbol(op).to_string(),
                        found: l.clone(),
                        span: lspan,
                    });
                }
                expect(l, r, rspan)?;
                Ok(Ty::bool_())
            }
        }
    }
}

fn expect(want: &Ty, found: &Ty, span: Span) -> Result<(), TypeError> {
    if is_assignable(found, want) {
        Ok(())
    } else {
        Err(TypeError::Mismatch {
            expected: want.clone(),
            found: found.clone(),
            span,
        })
    }
}

fn too_complex(err: ExhaustivenessError) -> TypeError {
    match err {
        ExhaustivenessError::MatrixTooLarge { size, span } => TypeError::MatchTooComplex {
            msg: format!("pattern matrix too large: {} elements", size),
            span,
        },
        ExhaustivenessError::DepthExceeded { span } => TypeError::MatchTooComplex {
            msg: "exhaustiveness check depth limit exceeded".to_string(),
            span,
        },
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Or => "||",
        BinOp::And => "&&",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
    }
}

fn lit_text(lit: &Lit) -> String {
    match lit {
        Lit::Int(n) => n.to_string(),
        Lit::Str(s) => format!("{:?}", s),
        Lit::Bool(b) => b.to_string(),
        Lit::Unit => "()".to_string(),
    }
}

fn pattern_text(pat: &CasePattern) -> String {
    match pat {
        CasePattern::Tag(tag) => tag.text.clone(),
        CasePattern::Tuple(elems, _) => {
            let parts: Vec<String> = elems
                .iter()
                .map(|e| match e {
                    PatElem::Tag(tag) => tag.text.clone(),
                    PatElem::Wildcard(_) => "_".to_string(),
                    PatElem::Lit(lit, _) => lit_text(lit),
                })
                .collect();
            format!("({})", parts.join(", "))
        }
    }
}
