//! Advisory diagnostics collected during checking.
//!
//! Lints never make [`check_module`](crate::TypeChecker::check_module) fail;
//! the driver decides what to do with them through a [`LintConfig`].

use narrow_ast::span::Span;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LintKind {
    /// A deferred effect was produced and dropped without being invoked.
    UnusedEffect,
    /// A statement follows one that never completes.
    UnreachableCode,
}

impl LintKind {
    pub const ALL: [LintKind; 2] = [LintKind::UnusedEffect, LintKind::UnreachableCode];

    pub fn name(self) -> &'static str {
        match self {
            LintKind::UnusedEffect => "unused-effect",
            LintKind::UnreachableCode => "unreachable-code",
        }
    }
}

impl fmt::Display for LintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LintKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LintKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = LintKind::ALL.iter().map(|k| k.name()).collect();
                format!("unknown lint `{}` (known: {})", s, known.join(", "))
            })
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lint {
    pub kind: LintKind,
    pub message: String,
    pub span: Span,
}

impl Lint {
    pub fn unused_effect(ty: &crate::ty::Ty, span: Span) -> Self {
        Lint {
            kind: LintKind::UnusedEffect,
            message: format!(
                "deferred effect of type {} is discarded without being invoked",
                ty
            ),
            span,
        }
    }

    pub fn unreachable_code(span: Span) -> Self {
        Lint {
            kind: LintKind::UnreachableCode,
            message: "unreachable statement".to_string(),
            span,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LintLevel {
    Allow,
    #[default]
    Warn,
    Deny,
}

/// Per-lint levels; anything not configured is [`LintLevel::Warn`].
#[derive(Clone, Debug, Default)]
pub struct LintConfig {
    levels: HashMap<LintKind, LintLevel>,
}

impl LintConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: LintKind, level: LintLevel) -> &mut Self {
        self.levels.insert(kind, level);
        self
    }

    pub fn level(&self, kind: LintKind) -> LintLevel {
        self.levels.get(&kind).copied().unwrap_or_default()
    }

    /// Lints that should be reported, paired with their level.
    pub fn reported<'a>(
        &'a self,
        lints: &'a [Lint],
    ) -> impl Iterator<Item = (&'a Lint, LintLevel)> + 'a {
        lints
            .iter()
            .map(|l| (l, self.level(l.kind)))
            .filter(|(_, level)| *level != LintLevel::Allow)
    }
}
