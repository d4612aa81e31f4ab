//! Development-log tracing, surfaced to stderr behind the CLI's `-trace`
//! flag (per the `original_source` `common.cpp` dev-log, which distinguishes
//! `Info`/`Warning`/`Error` lines).
//!
//! Grounded on the teacher's `VmTracer` trait: a zero-cost [`NoopTracer`] for
//! production runs, monomorphised away entirely, plus a [`StderrTracer`] for
//! `-trace`.

use std::fmt;

/// Severity of a single trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Hook points a `Tracer` implementation may observe. Every call site in
/// the compiler/runtime calls these unconditionally; [`NoopTracer`]'s
/// bodies are empty and inline away.
pub trait Tracer {
    fn log(&mut self, level: TraceLevel, message: fmt::Arguments<'_>);

    /// A compilation pass boundary was crossed (phase 1-4 of §2).
    fn pass_boundary(&mut self, pass: &str) {
        self.log(TraceLevel::Info, format_args!("pass boundary: {pass}"));
    }

    /// A definition advanced to a new [`crate::types::Stage`].
    fn stage_transition(&mut self, identifier: &str, stage: &str) {
        self.log(TraceLevel::Info, format_args!("{identifier} -> {stage}"));
    }

    /// The dispatch loop ran an opportunistic heap sweep.
    fn heap_sweep(&mut self, freed: usize, remaining: usize) {
        self.log(TraceLevel::Info, format_args!("heap sweep: freed {freed}, {remaining} live"));
    }
}

/// Zero-cost tracer used in production; every method call is an empty
/// function the optimiser removes entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    #[inline(always)]
    fn log(&mut self, _level: TraceLevel, _message: fmt::Arguments<'_>) {}
}

/// Human-readable trace log written to stderr with a `[trace]` prefix,
/// enabled by the CLI's `-trace` flag.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn log(&mut self, level: TraceLevel, message: fmt::Arguments<'_>) {
        eprintln!("[trace] {level}: {message}");
    }
}

/// Collects trace lines in memory instead of printing them; used by tests
/// that assert on pass ordering without capturing stderr.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub lines: Vec<(TraceLevel, String)>,
}

impl Tracer for RecordingTracer {
    fn log(&mut self, level: TraceLevel, message: fmt::Arguments<'_>) {
        self.lines.push((level, message.to_string()));
    }
}
