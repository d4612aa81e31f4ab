#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at the call sites that matter")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional (byte offsets, register indices)")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior is bounded by the resource limits module")]

mod ast;
mod definitions;
mod diagnostics;
mod heap;
mod host;
mod intern;
mod intrinsics;
mod ir;
mod lexer;
mod parser;
mod program;
mod resource;
mod run_error;
mod runtime;
mod scanner;
mod script;
mod semantic;
mod tracer;
mod types;

pub use crate::diagnostics::{Diagnostic, Location, Reporter, Severity};
pub use crate::host::{CallOutput, FileInfo, Host, HostError, HostResult, InMemoryHost, NativeHost, PrintLevel, RedirectMode};
pub use crate::program::{CliOptions, Program};
pub use crate::resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceError, ResourceLimits};
pub use crate::run_error::{RunError, RuntimeAbort};
pub use crate::script::{Script, ScriptId, ScriptPool};
pub use crate::tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceLevel, Tracer};
