//! Compile-time diagnostics: the Reporter collects, sorts, and renders
//! errors and warnings produced by every front-end pass.

use std::fmt;
use std::sync::Mutex;

use crate::script::{ScriptId, ScriptPool};

/// A byte offset into a particular script's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub script: ScriptId,
    pub offset: u32,
}

impl Location {
    #[must_use]
    pub fn new(script: ScriptId, offset: u32) -> Self {
        Self { script, offset }
    }
}

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single compile-time diagnostic.
///
/// `message` may contain the literal placeholder `{line}`, which the
/// Reporter replaces with a quoted sample of the offending source line when
/// rendering, per the error handling design.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub location: Location,
    pub severity: Severity,
    pub message: String,
}

/// Collects diagnostics from every compilation lane.
///
/// Shared behind an `Arc` across worker threads; `report`/`error`/`warning`
/// take `&self` so lanes never block each other beyond the duration of a
/// single push.
#[derive(Default)]
pub struct Reporter {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Reporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, location: Location, severity: Severity, message: impl Into<String>) {
        let diagnostic = Diagnostic { location, severity, message: message.into() };
        self.diagnostics.lock().expect("reporter mutex poisoned").push(diagnostic);
    }

    pub fn error(&self, location: Location, message: impl Into<String>) {
        self.report(location, Severity::Error, message);
    }

    pub fn warning(&self, location: Location, message: impl Into<String>) {
        self.report(location, Severity::Warning, message);
    }

    /// Whether any error-severity diagnostic has been reported.
    ///
    /// Per the error handling design, this gates whether execution is
    /// attempted at all: warnings alone do not block a run.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .expect("reporter mutex poisoned")
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.lock().expect("reporter mutex poisoned").is_empty()
    }

    /// Drains the diagnostics, sorted by `(script, offset)` as required by
    /// the testable property of stable, location-ordered reporting.
    #[must_use]
    pub fn take_sorted(&self) -> Vec<Diagnostic> {
        let mut diagnostics = std::mem::take(&mut *self.diagnostics.lock().expect("reporter mutex poisoned"));
        diagnostics.sort_by_key(|d| (d.location.script, d.location.offset));
        diagnostics
    }

    /// Renders every collected diagnostic as human-readable text, resolving
    /// line numbers and the `{line}` placeholder against `scripts`.
    #[must_use]
    pub fn render(&self, scripts: &ScriptPool) -> String {
        let mut out = String::new();
        for diagnostic in self.take_sorted() {
            let script = scripts.get(diagnostic.location.script);
            let (line, column) = script.line_and_column(diagnostic.location.offset);
            let sample = script.line_text(line);
            let message = diagnostic.message.replace("{line}", &format!("{sample:?}"));
            out.push_str(&format!(
                "{}:{}:{}: {}: {}\n",
                script.absolute_path.display(),
                line + 1,
                column + 1,
                diagnostic.severity,
                message
            ));
        }
        out
    }
}
