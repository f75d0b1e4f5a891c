//! Execution failures.
//!
//! Failures are ordinary values propagated with `?` through statement,
//! procedure, and call boundaries. An `Unreachable` is not a user-facing
//! error: it marks a path whose accumulated constraints have no model.

use crate::diagnostic::Diagnostic;
use crate::engine::expr::format_thunk;
use crate::syntax::ast::SpecClause;
use crate::syntax::span::Span;

pub type EngineResult<T> = Result<T, Failure>;

#[derive(Clone, Debug)]
pub enum FailureSource {
    /// A checked clause evaluated to false under the picked model.
    Assertion {
        clause: SpecClause,
        defined_at: Span,
    },
    /// The path's constraints are unsatisfiable.
    Unreachable,
    /// A construct the engine cannot model.
    Unsupported(String),
}

#[derive(Clone, Debug)]
pub struct StackFrame {
    pub call_site: Span,
    pub procedure: String,
}

#[derive(Clone, Debug)]
pub struct Failure {
    pub source: FailureSource,
    pub position: Span,
    /// Innermost call first; call sites push frames as the failure
    /// bubbles out.
    pub trace: Vec<StackFrame>,
}

impl Failure {
    pub fn unreachable(position: Span) -> Self {
        Self {
            source: FailureSource::Unreachable,
            position,
            trace: Vec::new(),
        }
    }

    pub fn unsupported(detail: impl Into<String>, position: Span) -> Self {
        Self {
            source: FailureSource::Unsupported(detail.into()),
            position,
            trace: Vec::new(),
        }
    }

    pub fn assertion(clause: SpecClause, defined_at: Span, failed_at: Span) -> Self {
        Self {
            source: FailureSource::Assertion { clause, defined_at },
            position: failed_at,
            trace: Vec::new(),
        }
    }

    pub fn with_frame(mut self, call_site: Span, procedure: &str) -> Self {
        self.trace.push(StackFrame {
            call_site,
            procedure: procedure.to_string(),
        });
        self
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self.source, FailureSource::Unreachable)
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.source, FailureSource::Unsupported(_))
    }

    /// One-line description without positions.
    pub fn headline(&self) -> String {
        match &self.source {
            FailureSource::Assertion { clause, .. } => {
                format!("{} violation: {}", clause.kind, format_thunk(&clause.expr))
            }
            FailureSource::Unreachable => "assumption violated (path infeasible)".to_string(),
            FailureSource::Unsupported(detail) => format!("unsupported construct: {}", detail),
        }
    }

    /// Convert into a renderable diagnostic: the failure position is the
    /// primary label, the violated clause's declaration and each
    /// call-stack frame become secondary labels.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.headline(), self.position);
        if let FailureSource::Assertion { defined_at, .. } = &self.source {
            if *defined_at != self.position {
                diag = diag.with_label(*defined_at, "clause declared here".to_string());
            }
        }
        for frame in &self.trace {
            diag = diag.with_label(
                frame.call_site,
                format!("in call to `{}`", frame.procedure),
            );
        }
        diag
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.headline())?;
        if !self.position.is_synthetic() {
            write!(f, " at {}", self.position)?;
        }
        for frame in &self.trace {
            write!(f, "\n  in call to {} at {}", frame.procedure, frame.call_site)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::expr::ff;
    use crate::syntax::ast::SpecKind;

    #[test]
    fn frames_accumulate_innermost_first() {
        let f = Failure::unreachable(Span::new(0, 1, 2))
            .with_frame(Span::new(0, 10, 12), "inner")
            .with_frame(Span::new(0, 20, 22), "outer");
        assert_eq!(f.trace.len(), 2);
        assert_eq!(f.trace[0].procedure, "inner");
        assert_eq!(f.trace[1].procedure, "outer");
    }

    #[test]
    fn classification_helpers() {
        assert!(Failure::unreachable(Span::synthetic()).is_unreachable());
        assert!(Failure::unsupported("x", Span::synthetic()).is_unsupported());
        let clause = SpecClause::check(SpecKind::Inline, ff(Span::synthetic()));
        let a = Failure::assertion(clause, Span::synthetic(), Span::synthetic());
        assert!(!a.is_unreachable());
        assert!(!a.is_unsupported());
    }

    #[test]
    fn display_names_the_clause_kind() {
        let clause = SpecClause::check(SpecKind::Postcondition, ff(Span::synthetic()));
        let f = Failure::assertion(clause, Span::synthetic(), Span::synthetic());
        let text = f.to_string();
        assert!(text.contains("postcondition"), "got: {}", text);
    }

    #[test]
    fn diagnostic_carries_declaration_and_call_stack() {
        let clause = SpecClause::check(SpecKind::Precondition, ff(Span::new(0, 10, 15)));
        let f = Failure::assertion(clause, Span::new(0, 10, 15), Span::new(0, 40, 48))
            .with_frame(Span::new(0, 40, 48), "q")
            .with_frame(Span::new(0, 60, 70), "main");
        let diag = f.to_diagnostic();
        assert_eq!(diag.span, Span::new(0, 40, 48));
        // Declaration label plus one label per frame
        assert_eq!(diag.labels.len(), 3);
        assert!(diag.labels[0].message.contains("declared"));
        assert!(diag.labels[2].message.contains("main"));
    }
}
