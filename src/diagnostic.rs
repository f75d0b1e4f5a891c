//! User-facing reports rendered against source with ariadne.
//!
//! Parse errors carry one primary location; execution failures add one
//! secondary label per call-stack frame, so a violated precondition deep
//! in a call chain shows both the clause and every call site leading to
//! it. Synthetic spans (engine-minted nodes with no source position)
//! are skipped at render time.

use crate::syntax::span::Span;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn report_kind(self) -> ariadne::ReportKind<'static> {
        match self {
            Severity::Error => ariadne::ReportKind::Error,
            Severity::Warning => ariadne::ReportKind::Warning,
        }
    }

    fn color(self) -> ariadne::Color {
        match self {
            Severity::Error => ariadne::Color::Red,
            Severity::Warning => ariadne::Color::Yellow,
        }
    }
}

/// A secondary location attached to a diagnostic (a call site, a related
/// declaration).
#[derive(Clone, Debug)]
pub struct ContextLabel {
    pub span: Span,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Primary location; labeled with `message` itself.
    pub span: Span,
    /// Secondary locations, outermost last.
    pub labels: Vec<ContextLabel>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: String, span: Span) -> Self {
        Self {
            severity,
            message,
            span,
            labels: Vec::new(),
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn error(message: String, span: Span) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    pub fn with_label(mut self, span: Span, message: String) -> Self {
        self.labels.push(ContextLabel { span, message });
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render to stderr. Labels with synthetic spans are dropped; if even
    /// the primary span is synthetic the message still prints, anchored
    /// at offset zero.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Label, Report, Source};

        let primary = if self.span.is_synthetic() {
            0..0
        } else {
            self.span.byte_range()
        };
        let mut report = Report::build(self.severity.report_kind(), filename, primary.start)
            .with_message(&self.message);
        if !self.span.is_synthetic() {
            report = report.with_label(
                Label::new((filename, primary))
                    .with_message(&self.message)
                    .with_color(self.severity.color())
                    .with_order(0),
            );
        }
        for (depth, label) in self.labels.iter().enumerate() {
            if label.span.is_synthetic() {
                continue;
            }
            report = report.with_label(
                Label::new((filename, label.span.byte_range()))
                    .with_message(&label.message)
                    .with_color(ariadne::Color::Cyan)
                    .with_order(depth as i32 + 1),
            );
        }
        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        report
            .finish()
            .eprint((filename, Source::from(source)))
            .unwrap();
    }
}

/// Render a batch of diagnostics in order.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let d = Diagnostic::error("assertion might not hold".to_string(), Span::new(0, 4, 9))
            .with_label(Span::new(0, 20, 30), "in call to `p`".to_string())
            .with_label(Span::new(0, 40, 50), "in call to `main`".to_string())
            .with_note("witness: x = -1".to_string())
            .with_help("strengthen the precondition".to_string());
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.span.lo, 4);
        assert_eq!(d.labels.len(), 2);
        assert_eq!(d.labels[0].message, "in call to `p`");
        assert_eq!(d.notes.len(), 1);
        assert!(d.help.is_some());
    }

    #[test]
    fn warning_severity_is_kept() {
        let d = Diagnostic::warning("unused procedure".to_string(), Span::synthetic());
        assert_eq!(d.severity, Severity::Warning);
        assert!(d.labels.is_empty());
    }

    #[test]
    fn render_with_call_stack_does_not_panic() {
        let source = "procedure q() { assert false; }\nprocedure p() { call q(); }\n";
        let d = Diagnostic::error("assertion violation: false".to_string(), Span::new(0, 16, 29))
            .with_label(Span::new(0, 48, 57), "in call to `q`".to_string());
        d.render("test.kvl", source);
    }

    #[test]
    fn render_with_synthetic_primary_does_not_panic() {
        let d = Diagnostic::error("assumption violated".to_string(), Span::synthetic());
        d.render("test.kvl", "procedure p() { }\n");
    }
}
