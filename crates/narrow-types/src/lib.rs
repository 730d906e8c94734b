#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![forbid(unsafe_code)]

//! Closed unions, residual types and the checker that proves case analyses
//! over them exhaustive.

pub mod adt;
mod checker;
pub mod exhaustive;
pub mod flatten;
pub mod lint;
pub mod ty;


pub use checker::{TypeChecker, TypeError, BUILTINS};
pub use lint::{Lint, LintConfig, LintKind, LintLevel};
pub use ty::{is_assignable, Ty, TyConst, UnionTy};
