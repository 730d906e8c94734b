//! Diagnostic rendering.
//!
//! Parse, type and runtime errors and lints all become a [`Diagnostic`],
//! which renders as an ariadne report pointing at the span of the failed
//! obligation, or serializes for `--format json`.

use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use narrow_ast::span::Span;
use narrow_parse::ParseError;
use narrow_types::{Lint, LintLevel, TypeError};
use std::io::IsTerminal;
use std::ops::Range;

use crate::eval::EvalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// `parse`, `type`, `runtime`, `io` or the lint name
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// Text attached to the span
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Diagnostic {
    fn error(code: &str, message: String, span: Option<Span>, label: &str) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            message,
            span,
            label: label.to_string(),
            note: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn from_type_error(err: &TypeError) -> Self {
        let span = Some(err.span());
        let message = err.to_string();
        match err {
            TypeError::NonExhaustive { residual, .. } => Diagnostic::error(
                "type",
                message,
                span,
                &format!("this can still be {}", residual),
            )
            .with_note("add a case for each variant listed, or handle them before `assert_never`"),
            TypeError::MissingReturn {
                expected,
                uncovered,
                ..
            } => {
                let label = match uncovered {
                    Some(u) => format!("falls off the end for {}", u),
                    None => "control reaches the end of this body".to_string(),
                };
                Diagnostic::error("type", message, span, &label).with_note(format!(
                    "every path must return a value of type {}",
                    expected
                ))
            }
            TypeError::IncompleteVisitor { .. } => {
                Diagnostic::error("type", message, span, "declared here")
                    .with_note("a visitor needs one operation per variant")
            }
            TypeError::RedundantCase { .. } => {
                Diagnostic::error("type", message, span, "this case can never run")
            }
            _ => Diagnostic::error("type", message, span, "here"),
        }
    }

    pub fn from_eval_error(err: &EvalError) -> Self {
        let d = Diagnostic::error("runtime", err.to_string(), Some(err.span()), "raised here");
        match err {
            EvalError::Unreachable { .. } => {
                d.with_note("a value outside its declared union reached code the checker proved dead")
            }
            _ => d,
        }
    }

    pub fn from_lint(lint: &Lint, level: LintLevel) -> Self {
        Self {
            severity: match level {
                LintLevel::Deny => Severity::Error,
                LintLevel::Warn | LintLevel::Allow => Severity::Warning,
            },
            code: lint.kind.name().to_string(),
            message: lint.message.clone(),
            span: Some(lint.span),
            label: match lint.kind {
                narrow_types::LintKind::UnusedEffect => "this effect is never invoked",
                narrow_types::LintKind::UnreachableCode => "never executed",
            }
            .to_string(),
            note: None,
        }
    }

    /// Any error from checking or running a program.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<ParseError>() {
            return Diagnostic::error("parse", e.message.clone(), Some(e.span), "here");
        }
        if let Some(e) = err.downcast_ref::<TypeError>() {
            return Diagnostic::from_type_error(e);
        }
        if let Some(e) = err.downcast_ref::<EvalError>() {
            return Diagnostic::from_eval_error(e);
        }
        Diagnostic::error("io", format!("{:#}", err), None, "")
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render as an ariadne report. Spans are byte offsets into `src`.
    pub fn render(&self, filename: &str, src: &str, color: bool) -> String {
        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let range = self.span.map(|s| clamp(s, src)).unwrap_or(0..0);
        let config = Config::default()
            .with_color(color)
            .with_index_type(IndexType::Byte);

        let mut report = Report::build(kind, (filename, range.clone()))
            .with_config(config)
            .with_code(&self.code)
            .with_message(&self.message);
        if self.span.is_some() {
            let label_color = match self.severity {
                Severity::Error => Color::Red,
                Severity::Warning => Color::Yellow,
            };
            report = report.with_label(
                Label::new((filename, range))
                    .with_message(&self.label)
                    .with_color(label_color),
            );
        }
        if let Some(note) = &self.note {
            report = report.with_note(note);
        }

        let mut buf = Vec::new();
        match report.finish().write((filename, Source::from(src)), &mut buf) {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("{}: {}\n", self.code, self.message),
        }
    }
}

/// Whether reports written to stderr should be coloured.
pub fn stderr_color() -> bool {
    std::io::stderr().is_terminal()
}

fn clamp(span: Span, src: &str) -> Range<usize> {
    let end = (span.end as usize).min(src.len());
    let start = (span.start as usize).min(end);
    start..end
}

/// Machine-readable result of `narrow check --format json`.
#[derive(Debug, serde::Serialize)]
pub struct CheckReport {
    pub file: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}
