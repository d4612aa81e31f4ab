//! Top-level error types a [`crate::program::Program`] run can fail with,
//! and their mapping to process exit codes (§6.1, §7).

use std::fmt;

use crate::resource::ResourceError;

/// A fault raised by the running program itself rather than by a failed
/// compile pass: an instruction whose precondition the type checker could
/// not rule out at compile time (§3.6 "Non-goals": no bounds/null checks
/// are elided, they are deferred to here).
#[derive(Debug, Clone)]
pub enum RuntimeAbort {
    /// Dereferenced a `Reference` whose target is `null`.
    NullDereference,
    /// Array index was out of `[0, count)`.
    IndexOutOfBounds { index: i64, count: usize },
    /// A `Jump`'s condition operand was not a `Bool`.
    BoolExpected,
    DivisionByZero,
    /// `call_script`/`import`'s right-hand path argument was absolute when
    /// the operation requires a path relative to the invoking script.
    PathMustNotBeAbsolute { path: String },
    StackOverflow { limit: usize },
    /// The interpreter's operand stack underflowed; indicates an internal
    /// linker/lowering bug rather than a user program error.
    BrokenStack,
    /// An auto-evaluated `Result` (the `ResultEval` instruction) had `failed == true`.
    ResultFailed { message: String, code: i64 },
}

impl fmt::Display for RuntimeAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullDereference => write!(f, "null reference dereferenced"),
            Self::IndexOutOfBounds { index, count } => write!(f, "index {index} out of bounds for array of length {count}"),
            Self::BoolExpected => write!(f, "condition did not evaluate to a Bool"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::PathMustNotBeAbsolute { path } => write!(f, "path must not be absolute: '{path}'"),
            Self::StackOverflow { limit } => write!(f, "stack overflow: recursion exceeded {limit} nested calls"),
            Self::BrokenStack => write!(f, "internal error: broken interpreter stack"),
            Self::ResultFailed { message, code } => write!(f, "{message} (code {code})"),
        }
    }
}

impl std::error::Error for RuntimeAbort {}

/// Everything that can cause a [`crate::program::Program`] run to fail
/// before producing a normal exit code.
#[derive(Debug)]
pub enum RunError {
    /// Compilation failed; diagnostics were already reported through the
    /// [`crate::diagnostics::Reporter`] and rendered to stderr by the caller.
    ParseFailed,
    Abort(RuntimeAbort),
    Resource(ResourceError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParseFailed => write!(f, "compilation failed"),
            Self::Abort(abort) => write!(f, "{abort}"),
            Self::Resource(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<RuntimeAbort> for RunError {
    fn from(abort: RuntimeAbort) -> Self {
        Self::Abort(abort)
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl RunError {
    /// The process exit code the CLI should return for this failure, per
    /// §6.1: `1` for compile failures, `3` for a resource limit hit, and for
    /// a runtime abort, the code of the failed `Result` that aborted
    /// execution when that's what happened (`ResultFailed`), else a fixed
    /// `2`. A clean run's own `Result.code` (from an explicit `exit()`) is
    /// handled by the caller, not here.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ParseFailed => 1,
            Self::Abort(RuntimeAbort::ResultFailed { code, .. }) => i32::try_from(*code).unwrap_or(2),
            Self::Abort(_) => 2,
            Self::Resource(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_category() {
        assert_eq!(RunError::ParseFailed.exit_code(), 1);
        assert_eq!(RunError::Abort(RuntimeAbort::NullDereference).exit_code(), 2);
        assert_eq!(RunError::Resource(ResourceError::Recursion { limit: 2048 }).exit_code(), 3);
    }

    #[test]
    fn result_failed_abort_surfaces_its_own_code() {
        let err = RunError::Abort(RuntimeAbort::ResultFailed { message: "disk full".to_string(), code: 7 });
        assert_eq!(err.exit_code(), 7);
    }
}
