//! Evaluator for narrow programs
//!
//! A tree-walking interpreter over the checked AST. The checker has already
//! proven every case analysis complete, so dispatch only has to find the one
//! matching arm. The paths a well-typed program never takes are still
//! guarded: `assert_never` raises [`EvalError::Unreachable`], and a body
//! that falls off its end with a non-Unit result raises
//! [`EvalError::MissingReturn`]. An unchecked `as!` cast is the way to reach
//! either.

use anyhow::{anyhow, bail, Result};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use narrow_ast::ast::{
    BinOp, Block, CasePattern, ElseBranch, Expr, FnDecl, IfCond, IfStmt, Item, Lit, Module,
    PatElem, Stmt, Switch, TypeExpr, UnOp, VisitorDecl,
};
use narrow_ast::span::Span;
use narrow_types::BUILTINS;

use crate::trace::{TraceEmitter, TraceValue};
use crate::Checked;

/// Maximum call depth to prevent stack overflow from deep recursion
pub const MAX_CALL_DEPTH: u32 = 1000;

thread_local! {
    static CALL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Runtime failures. Only [`EvalError::InvalidValue`] and the arithmetic
/// errors are reachable from a well-typed program without an `as!` cast.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// A value reached `assert_never`, or a visitor was handed a variant it
    /// has no operation for
    #[error("unreachable: {value} was not handled")]
    Unreachable { value: String, span: Span },
    #[error("division by zero")]
    DivisionByZero { span: Span },
    #[error("integer overflow")]
    IntegerOverflow { span: Span },
    #[error("`{func}` reached the end of its body without returning a value")]
    MissingReturn { func: String, span: Span },
    #[error("maximum call depth exceeded (limit: {limit} calls)")]
    CallDepthExceeded { limit: u32, span: Span },
    #[error("{message}")]
    InvalidValue { message: String, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::Unreachable { span, .. }
            | EvalError::DivisionByZero { span }
            | EvalError::IntegerOverflow { span }
            | EvalError::MissingReturn { span, .. }
            | EvalError::CallDepthExceeded { span, .. }
            | EvalError::InvalidValue { span, .. } => *span,
        }
    }

    fn invalid(message: impl Into<String>, span: Span) -> Self {
        EvalError::InvalidValue {
            message: message.into(),
            span,
        }
    }
}

/// Runtime values
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Unit,
    /// `Calc::add { a: 2, b: 3 }`; fields keep declaration order
    Variant {
        union: String,
        tag: String,
        fields: Vec<(String, Value)>,
    },
    /// A top-level function, by name
    Fn(String),
    /// A deferred effect: a zero-argument closure over the scope it was
    /// created in
    Closure {
        body: Block,
        returns_unit: bool,
        env: Env,
    },
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Unit => write!(f, "()"),
            Value::Variant { union, tag, fields } => {
                write!(f, "{}::{}", union, tag)?;
                if !fields.is_empty() {
                    write!(f, " {{ ")?;
                    for (i, (name, value)) in fields.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {}", name, value)?;
                    }
                    write!(f, " }}")?;
                }
                Ok(())
            }
            Value::Fn(name) => write!(f, "<fn {}>", name),
            Value::Closure { .. } => write!(f, "<effect>"),
        }
    }
}

impl Value {
    /// Whether this is the variant `tag`, of `union` when one is given.
    pub fn is_variant(&self, union: Option<&str>, tag: &str) -> bool {
        match self {
            Value::Variant {
                union: u, tag: t, ..
            } => t == tag && union.map_or(true, |name| name == u),
            _ => false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Variant { fields, .. } => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Rendering used by `print`: strings without quotes.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "String",
            Value::Unit => "Unit",
            Value::Variant { .. } => "variant",
            Value::Fn(_) | Value::Closure { .. } => "function",
        }
    }
}

/// Control flow out of a statement or block
#[derive(Debug, Clone)]
pub enum ControlFlow {
    /// Completed; continue with the next statement
    Normal,
    /// `return` - bubbles up to the function boundary
    Return(Value),
}

impl ControlFlow {
    pub fn is_return(&self) -> bool {
        matches!(self, ControlFlow::Return(_))
    }
}

/// Where `print` writes.
#[derive(Debug, Clone, Default)]
pub enum Output {
    #[default]
    Stdout,
    /// Lines are kept for the caller to inspect
    Captured(Arc<Mutex<Vec<String>>>),
}

impl Output {
    pub fn captured() -> Self {
        Output::Captured(Arc::default())
    }

    /// Everything printed so far; always empty for stdout.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Output::Stdout => Vec::new(),
            Output::Captured(buf) => buf.lock().map(|l| l.clone()).unwrap_or_default(),
        }
    }

    fn write_line(&self, line: String) -> Result<()> {
        match self {
            Output::Stdout => println!("{}", line),
            Output::Captured(buf) => buf
                .lock()
                .map_err(|_| anyhow!("output buffer poisoned"))?
                .push(line),
        }
        Ok(())
    }
}

/// Declarations the evaluator looks up by name.
#[derive(Debug, Default)]
struct Program {
    fns: HashMap<String, FnDecl>,
    visitors: HashMap<String, VisitorDecl>,
    aliases: HashMap<String, TypeExpr>,
    /// Union a tag test compares against, by the span of the tested
    /// expression. Empty for an unchecked module: tests go by tag alone.
    discriminants: HashMap<Span, String>,
}

impl Program {
    fn from_module(module: &Module, discriminants: HashMap<Span, String>) -> Self {
        let mut program = Program {
            discriminants,
            ..Program::default()
        };
        for item in &module.items {
            match item {
                Item::Fn(f) => {
                    program.fns.insert(f.name.text.clone(), f.clone());
                }
                Item::Visitor(v) => {
                    program.visitors.insert(v.name.text.clone(), v.clone());
                }
                Item::TypeAlias(a) => {
                    program.aliases.insert(a.name.text.clone(), a.ty.clone());
                }
                Item::Union(_) | Item::Let(_) => {}
            }
        }
        program
    }

    fn discriminant(&self, expr: &Expr) -> Option<&str> {
        self.discriminants.get(&expr.span()).map(String::as_str)
    }

    /// Whether falling off a body with this declared result yields Unit.
    fn returns_unit(&self, ty: Option<&TypeExpr>) -> bool {
        let mut ty = match ty {
            None => return true,
            Some(t) => t,
        };
        // Aliases only refer to earlier aliases, so this terminates
        for _ in 0..=self.aliases.len() {
            match ty {
                TypeExpr::Named(id) => match self.aliases.get(&id.text) {
                    Some(next) => ty = next,
                    None => return id.text == "Unit",
                },
                TypeExpr::Arrow { .. } => return false,
            }
        }
        false
    }
}

/// Output sink and trace shared by every environment of one run.
#[derive(Debug)]
struct Host {
    out: Output,
    tracer: TraceEmitter,
}

/// Environment with lexical scoping
///
/// The first scope holds top-level `let`s; function bodies start from a
/// copy of it.
#[derive(Debug, Clone)]
pub struct Env {
    scopes: Vec<HashMap<String, Value>>,
    program: Arc<Program>,
    host: Arc<Mutex<Host>>,
}

impl Env {
    fn new(program: Arc<Program>, host: Arc<Mutex<Host>>) -> Self {
        Self {
            scopes: vec![HashMap::new()],
            program,
            host,
        }
    }

    /// A fresh environment for a function body: globals only.
    fn for_call(&self) -> Self {
        Self {
            scopes: vec![self.scopes.first().cloned().unwrap_or_default()],
            program: Arc::clone(&self.program),
            host: Arc::clone(&self.host),
        }
    }

    /// Run `f` in a new scope that is popped on exit, even on error.
    pub fn with_scope<T>(&mut self, f: impl FnOnce(&mut Env) -> Result<T>) -> Result<T> {
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    pub fn define(&mut self, name: String, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        }
    }

    /// Look up a variable, innermost scope first
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn host(&self) -> Result<MutexGuard<'_, Host>> {
        self.host
            .lock()
            .map_err(|_| anyhow!("runtime host state poisoned"))
    }

    fn print(&self, value: &Value) -> Result<()> {
        let start = Instant::now();
        let mut host = self.host()?;
        host.out.write_line(value.to_plain_string())?;
        let inputs = BTreeMap::from([("value".to_string(), TraceValue::from_value(value))]);
        host.tracer
            .record("io", "print", inputs, Ok(TraceValue::Unit), start.elapsed())?;
        Ok(())
    }
}

/// How a run is wired up.
pub struct RunConfig {
    pub output: Output,
    /// Destination for the JSONL effect trace, if any
    pub trace: Option<Box<dyn std::io::Write + Send>>,
    /// Recorded in the trace header
    pub program: String,
    /// How many times a deferred effect returned from `main` is invoked
    pub invoke: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output: Output::Stdout,
            trace: None,
            program: "<main>".to_string(),
            invoke: 1,
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Top-level `let`s in declaration order
    pub lets: Vec<(String, Value)>,
    /// What `main()` returned, if there is a `main`
    pub main: Option<Value>,
    /// Invocations performed by the effect runner
    pub effects_invoked: u32,
}

/// Evaluate a module that passed the checker. Tag tests also compare the
/// union the checker resolved, so a value forged into the wrong union
/// reaches the fallback.
pub fn run_checked(checked: &Checked, config: RunConfig) -> Result<RunOutcome> {
    let program = Program::from_module(&checked.module, checked.checker.discriminants().clone());
    run_program(program, &checked.module, config)
}

/// Top-level `let`s in order, then `main()`.
fn run_program(program: Program, module: &Module, config: RunConfig) -> Result<RunOutcome> {
    let tracer = match config.trace {
        Some(w) => TraceEmitter::new(w, &config.program)?,
        None => TraceEmitter::disabled(),
    };
    let host = Arc::new(Mutex::new(Host {
        out: config.output,
        tracer,
    }));
    let mut env = Env::new(Arc::new(program), host);

    let result = run_items(&mut env, module, config.invoke);

    // The footer is written either way; a run error takes precedence
    let status = if result.is_ok() { "success" } else { "error" };
    let finalized = env
        .host()
        .and_then(|mut h| h.tracer.finalize(status).map_err(Into::into));
    let outcome = result?;
    finalized?;
    Ok(outcome)
}

fn run_items(env: &mut Env, module: &Module, invoke: u32) -> Result<RunOutcome> {
    let mut lets = Vec::new();
    for item in &module.items {
        if let Item::Let(decl) = item {
            let value = eval_expr(env, &decl.value)?;
            env.define(decl.name.text.clone(), value.clone());
            lets.push((decl.name.text.clone(), value));
        }
    }

    let Some(main) = env.program.fns.get("main") else {
        return Ok(RunOutcome {
            lets,
            main: None,
            effects_invoked: 0,
        });
    };
    if !main.params.is_empty() {
        bail!(EvalError::invalid("`main` must take no parameters", main.name.span));
    }
    let span = main.name.span;
    let value = call_value(env, &Value::Fn("main".to_string()), Vec::new(), span)?;

    let mut runner = EffectRunner::new(env);
    if runner.is_effect(&value) {
        runner.invoke_times(&value, invoke)?;
    }
    Ok(RunOutcome {
        lets,
        main: Some(value),
        effects_invoked: runner.invoked(),
    })
}

/// Invokes deferred effects on behalf of the code that received them.
///
/// Every invocation is recorded in the trace as a `deferred` effect.
pub struct EffectRunner<'e> {
    env: &'e Env,
    invoked: u32,
}

impl<'e> EffectRunner<'e> {
    pub fn new(env: &'e Env) -> Self {
        Self { env, invoked: 0 }
    }

    /// Closures, and top-level functions without parameters.
    pub fn is_effect(&self, value: &Value) -> bool {
        match value {
            Value::Closure { .. } => true,
            Value::Fn(name) => self
                .env
                .program
                .fns
                .get(name)
                .is_some_and(|f| f.params.is_empty()),
            _ => false,
        }
    }

    pub fn invoke(&mut self, effect: &Value) -> Result<Value> {
        if !self.is_effect(effect) {
            bail!(EvalError::invalid(
                format!("expected a deferred effect, found {}", effect),
                Span::default()
            ));
        }
        let start = Instant::now();
        let mut env = self.env.clone();
        let result = call_value(&mut env, effect, Vec::new(), Span::default());
        let inputs = BTreeMap::from([
            ("effect".to_string(), TraceValue::from_value(effect)),
            (
                "invocation".to_string(),
                TraceValue::Int(i64::from(self.invoked)),
            ),
        ]);
        let output = match &result {
            Ok(v) => Ok(TraceValue::from_value(v)),
            Err(e) => Err(e.to_string()),
        };
        self.invoked += 1;
        self.env
            .host()?
            .tracer
            .record("deferred", "invoke", inputs, output, start.elapsed())?;
        result
    }

    pub fn invoke_times(&mut self, effect: &Value, n: u32) -> Result<()> {
        for _ in 0..n {
            self.invoke(effect)?;
        }
        Ok(())
    }

    pub fn invoked(&self) -> u32 {
        self.invoked
    }
}

/// Evaluate a block in its own scope
pub fn eval_block(env: &mut Env, block: &Block) -> Result<ControlFlow> {
    env.with_scope(|env| {
        for stmt in &block.stmts {
            let flow = eval_stmt(env, stmt)?;
            if flow.is_return() {
                return Ok(flow);
            }
        }
        Ok(ControlFlow::Normal)
    })
}

fn eval_stmt(env: &mut Env, stmt: &Stmt) -> Result<ControlFlow> {
    match stmt {
        Stmt::Let(decl) => {
            let value = eval_expr(env, &decl.value)?;
            env.define(decl.name.text.clone(), value);
            Ok(ControlFlow::Normal)
        }
        Stmt::Return { value, .. } => {
            let value = match value {
                Some(e) => eval_expr(env, e)?,
                None => Value::Unit,
            };
            Ok(ControlFlow::Return(value))
        }
        Stmt::Switch(sw) => eval_switch(env, sw),
        Stmt::If(stmt) => eval_if(env, stmt),
        Stmt::Expr { expr, .. } => {
            eval_expr(env, expr)?;
            Ok(ControlFlow::Normal)
        }
    }
}

/// Run the first case whose pattern matches, else the default. With
/// neither, control falls through.
fn eval_switch(env: &mut Env, sw: &Switch) -> Result<ControlFlow> {
    let values = sw
        .scrutinees
        .iter()
        .map(|e| eval_expr(env, e))
        .collect::<Result<Vec<_>>>()?;
    let program = Arc::clone(&env.program);
    let unions: Vec<Option<&str>> = sw
        .scrutinees
        .iter()
        .map(|e| program.discriminant(e))
        .collect();
    if let Some(case) = sw
        .cases
        .iter()
        .find(|c| case_matches(&c.pattern, &values, &unions))
    {
        return eval_block(env, &case.body);
    }
    match &sw.default {
        Some(block) => eval_block(env, block),
        None => Ok(ControlFlow::Normal),
    }
}

fn case_matches(pattern: &CasePattern, values: &[Value], unions: &[Option<&str>]) -> bool {
    match pattern {
        CasePattern::Tag(tag) => match (values, unions) {
            ([v], [union]) => v.is_variant(*union, &tag.text),
            _ => false,
        },
        CasePattern::Tuple(elems, _) => {
            elems.len() == values.len()
                && elems
                    .iter()
                    .zip(values.iter().zip(unions))
                    .all(|(p, (v, union))| elem_matches(p, v, *union))
        }
    }
}

fn elem_matches(pattern: &PatElem, value: &Value, union: Option<&str>) -> bool {
    match (pattern, value) {
        (PatElem::Wildcard(_), _) => true,
        (PatElem::Tag(tag), v) => v.is_variant(union, &tag.text),
        (PatElem::Lit(Lit::Int(a), _), Value::Int(b)) => a == b,
        (PatElem::Lit(Lit::Bool(a), _), Value::Bool(b)) => a == b,
        (PatElem::Lit(Lit::Str(a), _), Value::Str(b)) => a == b,
        (PatElem::Lit(Lit::Unit, _), Value::Unit) => true,
        _ => false,
    }
}

fn eval_if(env: &mut Env, stmt: &IfStmt) -> Result<ControlFlow> {
    let taken = match &stmt.cond {
        IfCond::Bool(cond) => match eval_expr(env, cond)? {
            Value::Bool(b) => b,
            other => bail!(EvalError::invalid(
                format!("condition must be Bool, found {}", other.type_name()),
                cond.span()
            )),
        },
        IfCond::Is { subject, tag } => {
            let value = eval_expr(env, subject)?;
            value.is_variant(env.program.discriminant(subject), &tag.text)
        }
    };
    if taken {
        return eval_block(env, &stmt.then_);
    }
    match &stmt.else_ {
        Some(ElseBranch::Block(block)) => eval_block(env, block),
        Some(ElseBranch::If(nested)) => eval_if(env, nested),
        None => Ok(ControlFlow::Normal),
    }
}

/// Evaluate an expression
pub fn eval_expr(env: &mut Env, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Lit(lit, _) => Ok(match lit {
            Lit::Int(n) => Value::Int(*n),
            Lit::Str(s) => Value::Str(s.clone()),
            Lit::Bool(b) => Value::Bool(*b),
            Lit::Unit => Value::Unit,
        }),
        Expr::Var(id) => {
            if let Some(v) = env.get(&id.text) {
                return Ok(v.clone());
            }
            if env.program.fns.contains_key(&id.text) {
                return Ok(Value::Fn(id.text.clone()));
            }
            bail!(EvalError::invalid(
                format!("undefined variable `{}`", id.text),
                id.span
            ))
        }
        Expr::Construct {
            union, tag, fields, ..
        } => {
            let fields = fields
                .iter()
                .map(|init| Ok((init.name.text.clone(), eval_expr(env, &init.value)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Variant {
                union: union.text.clone(),
                tag: tag.text.clone(),
                fields,
            })
        }
        Expr::Field { base, field, span } => {
            let value = eval_expr(env, base)?;
            match value.field(&field.text) {
                Some(v) => Ok(v.clone()),
                None => bail!(EvalError::invalid(
                    format!("{} has no field `{}`", value, field.text),
                    *span
                )),
            }
        }
        Expr::Unary { op, expr, span } => {
            let value = eval_expr(env, expr)?;
            match (op, value) {
                (UnOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnOp::Neg, Value::Int(n)) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::IntegerOverflow { span: *span }.into()),
                (_, other) => bail!(EvalError::invalid(
                    format!("invalid operand {}", other.type_name()),
                    *span
                )),
            }
        }
        Expr::Binary { lhs, op, rhs, span } => eval_binary(env, lhs, *op, rhs, *span),
        Expr::Call { callee, args, span } => {
            if let Some(id) = callee.as_var() {
                if BUILTINS.contains(&id.text.as_str())
                    && env.get(&id.text).is_none()
                    && !env.program.fns.contains_key(&id.text)
                {
                    return eval_builtin(env, &id.text, args, *span);
                }
            }
            let callee = eval_expr(env, callee)?;
            let args = args
                .iter()
                .map(|a| eval_expr(env, a))
                .collect::<Result<Vec<_>>>()?;
            call_value(env, &callee, args, *span)
        }
        Expr::Lambda { ret_ty, body, .. } => Ok(Value::Closure {
            body: body.clone(),
            returns_unit: env.program.returns_unit(ret_ty.as_ref()),
            env: env.clone(),
        }),
        Expr::Accept {
            target,
            visitor,
            span,
        } => {
            let value = eval_expr(env, target)?;
            with_call_depth(*span, || eval_accept(env, value, &visitor.text, *span))
        }
        // Unchecked at runtime: the value passes through as-is
        Expr::Cast { expr, .. } => eval_expr(env, expr),
        Expr::Paren { inner, .. } => eval_expr(env, inner),
    }
}

fn eval_builtin(env: &mut Env, name: &str, args: &[Expr], span: Span) -> Result<Value> {
    let [arg] = args else {
        bail!(EvalError::invalid(
            format!("`{}` takes one argument", name),
            span
        ));
    };
    let value = eval_expr(env, arg)?;
    match name {
        "print" => {
            env.print(&value)?;
            Ok(Value::Unit)
        }
        "assert_never" => bail!(EvalError::Unreachable {
            value: value.to_string(),
            span: arg.span(),
        }),
        other => bail!(EvalError::invalid(
            format!("unknown builtin `{}`", other),
            span
        )),
    }
}

fn eval_binary(env: &mut Env, lhs: &Expr, op: BinOp, rhs: &Expr, span: Span) -> Result<Value> {
    // Short-circuit evaluation for && and ||
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = match eval_expr(env, lhs)? {
            Value::Bool(b) => b,
            other => bail!(EvalError::invalid(
                format!("expected Bool, found {}", other.type_name()),
                lhs.span()
            )),
        };
        if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
            return Ok(Value::Bool(l));
        }
        return match eval_expr(env, rhs)? {
            Value::Bool(b) => Ok(Value::Bool(b)),
            other => bail!(EvalError::invalid(
                format!("expected Bool, found {}", other.type_name()),
                rhs.span()
            )),
        };
    }

    let l = eval_expr(env, lhs)?;
    let r = eval_expr(env, rhs)?;
    let overflow = || anyhow::Error::from(EvalError::IntegerOverflow { span });
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Add, Value::Int(a), Value::Int(b)) => {
            a.checked_add(b).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => {
            a.checked_sub(b).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => {
            a.checked_mul(b).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Div, Value::Int(_), Value::Int(0)) => {
            bail!(EvalError::DivisionByZero { span: rhs.span() })
        }
        (BinOp::Div, Value::Int(a), Value::Int(b)) => {
            a.checked_div(b).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Lt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a < b)),
        (BinOp::Le, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a <= b)),
        (BinOp::Gt, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a > b)),
        (BinOp::Ge, Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a >= b)),
        (BinOp::Eq | BinOp::Ne, l, r) => {
            let equal = match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => a == b,
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Str(a), Value::Str(b)) => a == b,
                (Value::Unit, Value::Unit) => true,
                _ => bail!(EvalError::invalid(
                    format!(
                        "cannot compare {} with {}",
                        l.type_name(),
                        r.type_name()
                    ),
                    span
                )),
            };
            Ok(Value::Bool(equal == (op == BinOp::Eq)))
        }
        (op, l, r) => bail!(EvalError::invalid(
            format!(
                "operator {:?} is not defined for {} and {}",
                op,
                l.type_name(),
                r.type_name()
            ),
            span
        )),
    }
}

/// Track call depth around `f`, failing past [`MAX_CALL_DEPTH`].
fn with_call_depth<T>(span: Span, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let depth = CALL_DEPTH.with(|d| {
        let current = d.get();
        d.set(current + 1);
        current + 1
    });
    let result = if depth > MAX_CALL_DEPTH {
        Err(EvalError::CallDepthExceeded {
            limit: MAX_CALL_DEPTH,
            span,
        }
        .into())
    } else {
        f()
    };
    // Decrement even on error/return
    CALL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    result
}

fn call_value(env: &mut Env, callee: &Value, args: Vec<Value>, span: Span) -> Result<Value> {
    with_call_depth(span, || match callee {
        Value::Fn(name) => {
            let program = Arc::clone(&env.program);
            let Some(decl) = program.fns.get(name) else {
                bail!(EvalError::invalid(
                    format!("undefined function `{}`", name),
                    span
                ));
            };
            if decl.params.len() != args.len() {
                bail!(EvalError::invalid(
                    format!(
                        "`{}` expects {} argument(s), found {}",
                        name,
                        decl.params.len(),
                        args.len()
                    ),
                    span
                ));
            }
            let mut call_env = env.for_call();
            for (param, arg) in decl.params.iter().zip(args) {
                call_env.define(param.name.text.clone(), arg);
            }
            let flow = eval_block(&mut call_env, &decl.body)?;
            finish(
                flow,
                program.returns_unit(decl.ret_ty.as_ref()),
                name,
                decl.body.span,
            )
        }
        Value::Closure {
            body,
            returns_unit,
            env: captured,
        } => {
            if !args.is_empty() {
                bail!(EvalError::invalid(
                    format!("closures take no arguments, found {}", args.len()),
                    span
                ));
            }
            let mut call_env = captured.clone();
            let flow = eval_block(&mut call_env, body)?;
            finish(flow, *returns_unit, "<closure>", body.span)
        }
        other => bail!(EvalError::invalid(
            format!("{} is not callable", other.type_name()),
            span
        )),
    })
}

/// Dispatch to the visitor operation for the value's tag.
fn eval_accept(env: &mut Env, value: Value, visitor: &str, span: Span) -> Result<Value> {
    let program = Arc::clone(&env.program);
    let Some(decl) = program.visitors.get(visitor) else {
        bail!(EvalError::invalid(
            format!("unknown visitor `{}`", visitor),
            span
        ));
    };
    let Some(op) = decl
        .ops
        .iter()
        .find(|op| value.is_variant(Some(&decl.target.text), &op.tag.text))
    else {
        bail!(EvalError::Unreachable {
            value: value.to_string(),
            span,
        });
    };
    let mut call_env = env.for_call();
    call_env.define(op.binder.text.clone(), value);
    let flow = eval_block(&mut call_env, &op.body)?;
    finish(
        flow,
        program.returns_unit(Some(&decl.ret_ty)),
        &format!("{}::{}", decl.name.text, op.tag.text),
        op.body.span,
    )
}

/// The result of a body: its `return`, or Unit if it may fall off the end.
fn finish(flow: ControlFlow, returns_unit: bool, func: &str, span: Span) -> Result<Value> {
    match flow {
        ControlFlow::Return(v) => Ok(v),
        ControlFlow::Normal if returns_unit => Ok(Value::Unit),
        ControlFlow::Normal => bail!(EvalError::MissingReturn {
            func: func.to_string(),
            span,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// No type information: tag tests go by tag alone.
    fn run_module(module: &Module, config: RunConfig) -> Result<RunOutcome> {
        run_program(Program::from_module(module, HashMap::new()), module, config)
    }

    /// Parse and run without the checker, so ill-typed paths stay reachable.
    fn run(src: &str) -> (Result<RunOutcome>, Vec<String>) {
        let module = narrow_parse::parse_str("<test>", src).expect("parse failed");
        let output = Output::captured();
        let result = run_module(
            &module,
            RunConfig {
                output: output.clone(),
                ..RunConfig::default()
            },
        );
        (result, output.lines())
    }

    fn main_value(src: &str) -> Value {
        let (result, _) = run(src);
        result.expect("run failed").main.expect("no main")
    }

    fn eval_error(src: &str) -> EvalError {
        let (result, _) = run(src);
        let err = result.expect_err("expected a runtime error");
        err.downcast::<EvalError>().expect("not an EvalError")
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert!(matches!(
            main_value("fn main() -> Int { return (1 + 2) * 3 - 4 / 2; }"),
            Value::Int(7)
        ));
        assert!(matches!(
            main_value("fn main() -> Bool { return 1 < 2 && \"a\" == \"a\"; }"),
            Value::Bool(true)
        ));
    }

    #[test]
    fn short_circuit_skips_rhs() {
        // The rhs would divide by zero
        assert!(matches!(
            main_value("fn main() -> Bool { return false && 1 / 0 == 0; }"),
            Value::Bool(false)
        ));
    }

    #[test]
    fn division_by_zero() {
        let err = eval_error("fn main() -> Int { return 1 / 0; }");
        assert!(matches!(err, EvalError::DivisionByZero { .. }));
    }

    #[test]
    fn overflow_is_an_error() {
        let err = eval_error("fn main() -> Int { return 9223372036854775807 + 1; }");
        assert!(matches!(err, EvalError::IntegerOverflow { .. }));
    }

    #[test]
    fn lets_evaluate_in_order() {
        let (result, _) = run("let a = 2; let b = a * 21;");
        let outcome = result.expect("run failed");
        assert!(outcome.main.is_none());
        let names: Vec<&str> = outcome.lets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(matches!(outcome.lets[1].1, Value::Int(42)));
    }

    #[test]
    fn print_strips_quotes() {
        let (result, lines) = run("fn main() { print(\"hi\"); print(3); }");
        result.expect("run failed");
        assert_eq!(lines, ["hi", "3"]);
    }

    #[test]
    fn unit_body_may_fall_off() {
        assert!(matches!(main_value("fn main() { }"), Value::Unit));
    }

    #[test]
    fn fall_off_with_result_is_missing_return() {
        let err = eval_error("fn f() -> Int { } fn main() -> Int { return f(); }");
        assert_eq!(
            err,
            EvalError::MissingReturn {
                func: "f".to_string(),
                span: err.span(),
            }
        );
    }

    #[test]
    fn unit_alias_allows_fall_off() {
        assert!(matches!(
            main_value("type Nothing = Unit; fn main() -> Nothing { }"),
            Value::Unit
        ));
    }

    #[test]
    fn switch_without_match_falls_through() {
        let (result, lines) = run(
            "union U { a, b }
             fn main() { switch U::b { case a { print(1); } } print(2); }",
        );
        result.expect("run failed");
        assert_eq!(lines, ["2"]);
    }

    #[test]
    fn tuple_switch_literal_column() {
        let value = main_value(
            "union U { a, b }
             fn pick(u: U, urgent: Bool) -> Int {
                 switch (u, urgent) {
                     case (_, true) { return 0; }
                     case (a, false) { return 1; }
                     case (b, false) { return 2; }
                 }
             }
             fn main() -> Int { return pick(U::b, false) * 10 + pick(U::a, true); }",
        );
        assert!(matches!(value, Value::Int(20)));
    }

    #[test]
    fn else_if_chain() {
        let value = main_value(
            "fn sign(n: Int) -> Int {
                 if n < 0 { return -1; } else if n == 0 { return 0; } else { return 1; }
             }
             fn main() -> Int { return sign(-5) + sign(0) * 10 + sign(9) * 100; }",
        );
        assert!(matches!(value, Value::Int(99)));
    }

    #[test]
    fn recursion_limit() {
        // Deep recursion needs more than the default test thread stack
        let handle = std::thread::Builder::new()
            .stack_size(crate::EVAL_STACK_SIZE)
            .spawn(|| {
                let err = eval_error(
                    "fn f(n: Int) -> Int { return f(n + 1); } fn main() -> Int { return f(0); }",
                );
                (err, CALL_DEPTH.with(|d| d.get()))
            })
            .unwrap();
        let (err, depth_after) = handle.join().unwrap();
        assert!(matches!(
            err,
            EvalError::CallDepthExceeded {
                limit: MAX_CALL_DEPTH,
                ..
            }
        ));
        assert_eq!(depth_after, 0);
    }

    #[test]
    fn closure_sees_the_scope_it_was_made_in() {
        let (result, lines) = run(
            "fn later(n: Int) -> fn() -> Unit { let m = n * 2; return fn() { print(m); }; }
             fn main() { let e = later(4); e(); e(); }",
        );
        result.expect("run failed");
        assert_eq!(lines, ["8", "8"]);
    }

    #[test]
    fn effect_returned_from_main_is_invoked() {
        let module = narrow_parse::parse_str(
            "<test>",
            "fn main() -> fn() -> Unit { return fn() { print(\"tick\"); }; }",
        )
        .unwrap();
        let output = Output::captured();
        let outcome = run_module(
            &module,
            RunConfig {
                output: output.clone(),
                invoke: 3,
                ..RunConfig::default()
            },
        )
        .unwrap();
        assert_eq!(outcome.effects_invoked, 3);
        assert!(matches!(outcome.main, Some(Value::Closure { .. })));
        assert_eq!(output.lines(), ["tick", "tick", "tick"]);
    }

    #[test]
    fn accept_without_operation_is_unreachable() {
        // Constructed without checking, so the visitor misses `b`
        let err = eval_error(
            "union U { a, b }
             visitor V for U -> Int { a(x) { return 1; } }
             fn main() -> Int { return U::b.accept(V); }",
        );
        assert!(matches!(err, EvalError::Unreachable { ref value, .. } if value == "U::b"));
    }

    #[test]
    fn variant_display() {
        let value = Value::Variant {
            union: "Calc".to_string(),
            tag: "add".to_string(),
            fields: vec![
                ("a".to_string(), Value::Int(2)),
                ("b".to_string(), Value::Int(3)),
            ],
        };
        assert_eq!(value.to_string(), "Calc::add { a: 2, b: 3 }");
        assert_eq!(value.field("b").map(|v| v.to_string()), Some("3".to_string()));
    }
}
