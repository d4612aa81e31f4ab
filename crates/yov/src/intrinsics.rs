//! The intrinsic library (§4.8): the fixed set of native functions a
//! compiled program can call, looked up by name at function-resolve time
//! (mirrors the original's linear-scan `IntrinsicFromIdentifier` table).
//!
//! Every effectful intrinsic routes through [`Host`] rather than touching
//! `std::fs`/`std::process`/`std::env` directly, resolves relative path
//! arguments against the caller's current directory, and — when
//! `user_assert` is set — asks the host to confirm before performing the
//! effect.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::heap::{Heap, RtValue};
use crate::host::{Host, PrintLevel, RedirectMode};
use crate::run_error::RuntimeAbort;
use crate::types::StructDef;

/// What an intrinsic call produced: either ordinary return values, or a
/// request to stop the whole program now with a specific exit code (the
/// `exit` intrinsic — not an error, so it is not a [`RuntimeAbort`]).
pub enum IntrinsicOutcome {
    Returned(Vec<RtValue>),
    Exit(i32),
}

/// Everything an intrinsic call needs besides its arguments.
pub struct IntrinsicCx<'a> {
    pub heap: &'a Heap,
    pub interner: &'a crate::intern::Interner,
    pub host: &'a mut dyn Host,
    pub cd: PathBuf,
    pub user_assert: bool,
    pub no_user: bool,
    pub redirect_stdout: RedirectMode,
    pub result_def: Arc<StructDef>,
    pub current_file: String,
    pub current_line: u32,
}

pub type IntrinsicFn = fn(&mut IntrinsicCx<'_>, &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort>;

const YOV_MAJOR_VERSION: i64 = 0;
const YOV_MINOR_VERSION: i64 = 0;

/// Resolves the native function bound to an intrinsic's identifier.
///
/// `thread_sleep` is registered under that name rather than the original
/// source's `"sleep"` — the distilled specification names it
/// `thread_sleep`, and the specification is the authoritative naming
/// source (see `DESIGN.md`).
#[must_use]
pub fn lookup(name: &str) -> Option<IntrinsicFn> {
    REGISTRY.iter().find(|(identifier, _)| *identifier == name).map(|(_, f)| *f)
}

macro_rules! returned {
    ($($value:expr),* $(,)?) => {
        Ok(IntrinsicOutcome::Returned(vec![$($value),*]))
    };
}

fn str_value(cx: &IntrinsicCx<'_>, value: &RtValue) -> String {
    match value {
        RtValue::Str(id) => cx.heap.string(*id),
        other => cx.heap.stringify(cx.interner, other),
    }
}

fn int_value(value: &RtValue) -> i64 {
    value.as_int().unwrap_or(0)
}

fn bool_value(value: &RtValue) -> bool {
    value.as_bool().unwrap_or(false)
}

fn alloc_str(cx: &IntrinsicCx<'_>, value: impl Into<String>) -> RtValue {
    RtValue::Str(cx.heap.alloc_string(value.into()))
}

fn make_result(cx: &IntrinsicCx<'_>, failed: bool, message: impl Into<String>, code: i64) -> RtValue {
    let message = alloc_str(cx, message.into());
    let fields = vec![RtValue::Bool(failed), message, RtValue::Int(code)];
    RtValue::Struct(cx.heap.alloc_struct(cx.result_def.clone(), fields))
}

fn ok_result(cx: &IntrinsicCx<'_>) -> RtValue {
    make_result(cx, false, String::new(), 0)
}

fn failed_result(cx: &IntrinsicCx<'_>, message: impl Into<String>) -> RtValue {
    make_result(cx, true, message, 1)
}

/// Joins a (possibly relative) path argument onto the caller's current
/// directory and removes `.`/`..` components lexically, mirroring the
/// original's `PathAbsoluteToCD`/`PathResolve`.
fn resolve_path(cd: &Path, raw: &str) -> PathBuf {
    let joined = if Path::new(raw).is_absolute() { PathBuf::from(raw) } else { cd.join(raw) };
    let mut out = PathBuf::new();
    for component in joined.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Asks for confirmation before an effectful operation, per §6.2's
/// `user_assert` rule. Returns `Some(failed Result)` when the caller should
/// stop and return that value immediately; `None` to proceed.
fn confirm(cx: &mut IntrinsicCx<'_>, message: &str) -> Option<RtValue> {
    if !cx.user_assert {
        return None;
    }
    if cx.no_user || !cx.host.ask_yes_no(message) {
        return Some(failed_result(cx, "Operation cancelled by user"));
    }
    None
}

// ---- core ----

fn intrinsic_typeof(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let ty = match &params[0] {
        RtValue::Type(ty) => ty.clone(),
        other => crate::runtime::value_type_of(cx.heap, other),
    };
    returned!(RtValue::Type(ty))
}

fn intrinsic_print(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let text = str_value(cx, &params[0]);
    cx.host.print(PrintLevel::UserCode, &text);
    returned!()
}

fn intrinsic_println(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let text = str_value(cx, &params[0]);
    cx.host.print(PrintLevel::UserCode, &text);
    cx.host.print(PrintLevel::UserCode, "\n");
    returned!()
}

fn intrinsic_exit(_cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    Ok(IntrinsicOutcome::Exit(int_value(&params[0]) as i32))
}

fn intrinsic_set_cd(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let result = if cx.host.path_exists(&path) {
        cx.cd = path;
        ok_result(cx)
    } else {
        failed_result(cx, "Path does not exists")
    };
    returned!(result)
}

fn intrinsic_assert(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let result = if bool_value(&params[0]) {
        ok_result(cx)
    } else {
        failed_result(cx, format!("Assertion failed at '{}:{}'", cx.current_file, cx.current_line))
    };
    returned!(result)
}

fn intrinsic_failed(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let message = str_value(cx, &params[0]);
    let code = int_value(&params[1]);
    returned!(make_result(cx, true, message, code))
}

fn intrinsic_thread_sleep(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    cx.host.thread_sleep(Duration::from_millis(int_value(&params[0]).max(0) as u64));
    returned!()
}

fn intrinsic_env(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let name = str_value(cx, &params[0]);
    match cx.host.env_get(&name) {
        Some(value) => returned!(alloc_str(cx, value), ok_result(cx)),
        None => returned!(alloc_str(cx, ""), failed_result(cx, format!("Environment variable not found: '{name}'"))),
    }
}

fn intrinsic_env_path(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let name = str_value(cx, &params[0]);
    match cx.host.env_get(&name) {
        Some(value) => {
            let resolved = resolve_path(&cx.cd, &value).display().to_string();
            returned!(alloc_str(cx, resolved), ok_result(cx))
        }
        None => returned!(alloc_str(cx, ""), failed_result(cx, format!("Environment variable not found: '{name}'"))),
    }
}

fn intrinsic_env_path_array(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    use crate::types::{Primitive, VType};
    let name = str_value(cx, &params[0]);
    match cx.host.env_get(&name) {
        Some(value) => {
            let elements: Vec<RtValue> =
                value.split(';').filter(|s| !s.is_empty()).map(|s| alloc_str(cx, resolve_path(&cx.cd, s).display().to_string())).collect();
            let array = RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), elements));
            returned!(array, ok_result(cx))
        }
        None => {
            let array = RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), Vec::new()));
            returned!(array, failed_result(cx, format!("Environment variable not found: '{name}'")))
        }
    }
}

// ---- console ----

fn intrinsic_console_write(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let text = str_value(cx, &params[0]);
    cx.host.print(PrintLevel::UserCode, &text);
    returned!()
}

fn intrinsic_console_clear(cx: &mut IntrinsicCx<'_>, _params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    cx.host.console_clear();
    returned!()
}

fn intrinsic_console_set_cursor(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let row = int_value(&params[0]).clamp(0, i64::from(u16::MAX)) as u16;
    let col = int_value(&params[1]).clamp(0, i64::from(u16::MAX)) as u16;
    cx.host.console_set_cursor(row, col);
    returned!()
}

fn intrinsic_console_get_cursor(cx: &mut IntrinsicCx<'_>, _params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let (row, col) = cx.host.console_get_cursor();
    returned!(RtValue::Int(i64::from(row)), RtValue::Int(i64::from(col)))
}

// ---- external calls ----

fn call_output_values(cx: &IntrinsicCx<'_>, result: Result<crate::host::CallOutput, crate::host::HostError>) -> (RtValue, RtValue, RtValue) {
    match result {
        Ok(output) => (alloc_str(cx, output.stdout), RtValue::Int(i64::from(output.exit_code)), ok_result(cx)),
        Err(err) => (alloc_str(cx, ""), RtValue::Int(-1), failed_result(cx, err.to_string())),
    }
}

fn intrinsic_call(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let command_line = str_value(cx, &params[0]);
    if let Some(failed) = confirm(cx, &format!("Call:\n{command_line}")) {
        return returned!(alloc_str(cx, ""), RtValue::Int(-1), failed);
    }
    let cd = cx.cd.clone();
    let redirect = cx.redirect_stdout;
    let (stdout, exit_code, result) = call_output_values(cx, cx.host.spawn(&cd, &command_line, redirect));
    returned!(stdout, exit_code, result)
}

fn intrinsic_call_exe(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let exe_name = str_value(cx, &params[0]);
    let args = str_value(cx, &params[1]);
    if let Some(failed) = confirm(cx, &format!("Call Exe:\n{exe_name} {args}")) {
        return returned!(alloc_str(cx, ""), RtValue::Int(-1), failed);
    }
    let cd = cx.cd.clone();
    let redirect = cx.redirect_stdout;
    let (stdout, exit_code, result) = call_output_values(cx, cx.host.spawn_exe(&cd, &exe_name, &args, redirect));
    returned!(stdout, exit_code, result)
}

/// A script-to-script call: resolves the target script against the
/// caller's current directory and re-spawns the current executable against
/// it, passing `lang_args` ahead of the resolved path and `args` after it;
/// see `DESIGN.md`.
fn intrinsic_call_script(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let script_name = str_value(cx, &params[0]);
    let args = str_value(cx, &params[1]);
    let lang_args = str_value(cx, &params[2]);
    if let Some(failed) = confirm(cx, &format!("Call Script:\n{lang_args} {script_name} {args}")) {
        return returned!(alloc_str(cx, ""), RtValue::Int(-1), failed);
    }
    let path = resolve_path(&cx.cd, &script_name);
    let exe = std::env::current_exe().map(|p| p.display().to_string()).unwrap_or_else(|_| "yov".to_string());
    let cd = cx.cd.clone();
    let redirect = cx.redirect_stdout;
    let command_args = format!("{lang_args} {} {args}", path.display());
    let (stdout, exit_code, result) = call_output_values(cx, cx.host.spawn_exe(&cd, &exe, &command_args, redirect));
    returned!(stdout, exit_code, result)
}

// ---- utils ----

fn intrinsic_path_resolve(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let resolved = resolve_path(&cx.cd, &str_value(cx, &params[0])).display().to_string();
    returned!(alloc_str(cx, resolved))
}

fn intrinsic_str_get_codepoint(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let str = str_value(cx, &params[0]);
    let cursor = int_value(&params[1]).max(0) as usize;
    let rest = str.get(cursor..).unwrap_or("");
    let (codepoint, next_cursor) = match rest.chars().next() {
        Some(c) => (c as i64, cursor + c.len_utf8()),
        None => (0, cursor),
    };
    returned!(RtValue::Int(codepoint), RtValue::Int(next_cursor as i64))
}

fn intrinsic_str_split(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    use crate::types::{Primitive, VType};
    let str = str_value(cx, &params[0]);
    let separator = str_value(cx, &params[1]);
    let elements: Vec<RtValue> = if separator.is_empty() {
        str.chars().map(|c| alloc_str(cx, c.to_string())).collect()
    } else {
        str.split(separator.as_str()).map(|part| alloc_str(cx, part)).collect()
    };
    returned!(RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), elements)))
}

/// A minimal JSON navigator: splits `route` on `/` and walks named object
/// properties per RFC 8259, treating every scalar (including numbers) as
/// the literal source text between its delimiters — the original's
/// `json_access` never finished this (see `intrinsics.cpp`'s unfinished
/// `json_get_property`); this is the specified, tested resolution.
fn intrinsic_json_route(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let json = str_value(cx, &params[0]);
    let route = str_value(cx, &params[1]);
    let mut cursor = json.as_str();
    let mut ok = true;
    for name in route.split('/').filter(|s| !s.is_empty()) {
        match json_property(cursor, name) {
            Some(value) => cursor = value,
            None => {
                ok = false;
                break;
            }
        }
    }
    if ok {
        returned!(alloc_str(cx, cursor.trim()), ok_result(cx))
    } else {
        returned!(alloc_str(cx, ""), failed_result(cx, "Json route not found"))
    }
}

/// Finds `"name": <value>` inside `object` and returns the raw slice of
/// `<value>` (braces/brackets/quotes included, numbers/literals bare).
fn json_property<'a>(object: &'a str, name: &str) -> Option<&'a str> {
    let bytes = object.as_bytes();
    let mut i = 0usize;
    let mut depth = 0i32;
    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth -= 1,
            b'"' if depth <= 1 => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'"' {
                    if bytes[end] == b'\\' {
                        end += 1;
                    }
                    end += 1;
                }
                let key = &object[start..end.min(bytes.len())];
                let mut j = end + 1;
                while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b':' {
                    j += 1;
                    while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                        j += 1;
                    }
                    let value_start = j;
                    let value_end = json_value_end(object, value_start);
                    if key == name {
                        return Some(&object[value_start..value_end]);
                    }
                    i = value_end;
                    continue;
                }
                i = end + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn json_value_end(text: &str, start: usize) -> usize {
    let bytes = text.as_bytes();
    if start >= bytes.len() {
        return start;
    }
    match bytes[start] {
        b'"' => {
            let mut i = start + 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            (i + 1).min(bytes.len())
        }
        b'{' | b'[' => {
            let open = bytes[start];
            let close = if open == b'{' { b'}' } else { b']' };
            let mut depth = 0i32;
            let mut i = start;
            while i < bytes.len() {
                if bytes[i] == open {
                    depth += 1;
                } else if bytes[i] == close {
                    depth -= 1;
                    if depth == 0 {
                        return i + 1;
                    }
                }
                i += 1;
            }
            bytes.len()
        }
        _ => {
            let mut i = start;
            while i < bytes.len() && !matches!(bytes[i], b',' | b'}' | b']') {
                i += 1;
            }
            i
        }
    }
}

// ---- yov ----

fn intrinsic_yov_require(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let major = int_value(&params[0]);
    let minor = int_value(&params[1]);
    let result = if major == YOV_MAJOR_VERSION && minor == YOV_MINOR_VERSION {
        ok_result(cx)
    } else {
        failed_result(cx, format!("Require version: Yov v{major}.{minor}"))
    };
    returned!(result)
}

fn intrinsic_yov_require_min(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let major = int_value(&params[0]);
    let minor = int_value(&params[1]);
    let valid = !(major > YOV_MAJOR_VERSION || (major == YOV_MAJOR_VERSION && minor > YOV_MINOR_VERSION));
    let result = if valid { ok_result(cx) } else { failed_result(cx, format!("Require minimum version: Yov v{major}.{minor}")) };
    returned!(result)
}

fn intrinsic_yov_require_max(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let major = int_value(&params[0]);
    let minor = int_value(&params[1]);
    let valid = major > YOV_MAJOR_VERSION || (major == YOV_MAJOR_VERSION && minor >= YOV_MINOR_VERSION);
    let result = if valid { ok_result(cx) } else { failed_result(cx, format!("Require maximum version: Yov v{major}.{minor}")) };
    returned!(result)
}

/// Unimplemented in the original source (guarded out with `#if 0`, a
/// recursive self-parse-for-tooling feature); kept as a registered stub
/// that always fails rather than silently dropped, see `DESIGN.md`.
fn intrinsic_yov_parse(cx: &mut IntrinsicCx<'_>, _params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    returned!(failed_result(cx, "yov_parse is not implemented"))
}

// ---- misc ----

fn intrinsic_ask_yesno(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let content = str_value(cx, &params[0]);
    let result = cx.host.ask_yes_no(&content);
    returned!(RtValue::Bool(result))
}

fn intrinsic_exists(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    returned!(RtValue::Bool(cx.host.path_exists(&path)))
}

fn intrinsic_create_directory(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let recursive = bool_value(&params[1]);
    if let Some(failed) = confirm(cx, &format!("Create directory:\n{}", path.display())) {
        return returned!(failed);
    }
    let result = match cx.host.create_directory(&path, recursive) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_delete_directory(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    if let Some(failed) = confirm(cx, &format!("Delete directory:\n{}", path.display())) {
        return returned!(failed);
    }
    let result = match cx.host.delete_directory(&path) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_copy_directory(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let dst = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let src = resolve_path(&cx.cd, &str_value(cx, &params[1]));
    if let Some(failed) = confirm(cx, &format!("Copy directory\n'{}'\nto\n'{}'", src.display(), dst.display())) {
        return returned!(failed);
    }
    let result = match cx.host.copy_directory(&dst, &src) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_move_directory(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let dst = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let src = resolve_path(&cx.cd, &str_value(cx, &params[1]));
    if let Some(failed) = confirm(cx, &format!("Move directory\n'{}'\nto\n'{}'", src.display(), dst.display())) {
        return returned!(failed);
    }
    let result = match cx.host.move_directory(&dst, &src) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_copy_file(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let dst = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let src = resolve_path(&cx.cd, &str_value(cx, &params[1]));
    let overwrite = match &params[2] {
        RtValue::Enum(_, index) => *index == 1,
        other => bool_value(other),
    };
    if let Some(failed) = confirm(cx, &format!("Copy file\n'{}'\nto\n'{}'", src.display(), dst.display())) {
        return returned!(failed);
    }
    let result = match cx.host.copy_file(&dst, &src, overwrite) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_move_file(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let dst = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let src = resolve_path(&cx.cd, &str_value(cx, &params[1]));
    if let Some(failed) = confirm(cx, &format!("Move file\n'{}'\nto\n'{}'", src.display(), dst.display())) {
        return returned!(failed);
    }
    let result = match cx.host.move_file(&dst, &src) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_delete_file(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    if let Some(failed) = confirm(cx, &format!("Delete file:\n'{}'", path.display())) {
        return returned!(failed);
    }
    let result = match cx.host.delete_file(&path) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_write_entire_file(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    let content = str_value(cx, &params[1]);
    if let Some(failed) = confirm(cx, &format!("Write entire file:\n'{}'", path.display())) {
        return returned!(failed);
    }
    let result = match cx.host.write_entire_file(&path, &content) {
        Ok(()) => ok_result(cx),
        Err(err) => failed_result(cx, err.to_string()),
    };
    returned!(result)
}

fn intrinsic_read_entire_file(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    if let Some(failed) = confirm(cx, &format!("Read entire file:\n'{}'", path.display())) {
        return returned!(alloc_str(cx, ""), failed);
    }
    let (content, result) = match cx.host.read_entire_file(&path) {
        Ok(content) => (content, ok_result(cx)),
        Err(err) => (String::new(), failed_result(cx, err.to_string())),
    };
    returned!(alloc_str(cx, content), result)
}

fn intrinsic_file_get_info(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    match cx.host.file_info(&path) {
        Ok(info) => {
            returned!(alloc_str(cx, info.name), alloc_str(cx, info.path.display().to_string()), RtValue::Bool(info.is_directory), RtValue::Int(info.size_bytes as i64), ok_result(cx))
        }
        Err(err) => returned!(alloc_str(cx, ""), alloc_str(cx, ""), RtValue::Bool(false), RtValue::Int(0), failed_result(cx, err.to_string())),
    }
}

fn intrinsic_dir_get_files_info(cx: &mut IntrinsicCx<'_>, params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    use crate::types::{Primitive, VType};
    let path = resolve_path(&cx.cd, &str_value(cx, &params[0]));
    match cx.host.dir_files_info(&path) {
        Ok(infos) => {
            let names = infos.iter().map(|i| alloc_str(cx, i.name.clone())).collect();
            let paths = infos.iter().map(|i| alloc_str(cx, i.path.display().to_string())).collect();
            let names_array = RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), names));
            let paths_array = RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), paths));
            returned!(names_array, paths_array, ok_result(cx))
        }
        Err(err) => {
            let empty = |cx: &IntrinsicCx<'_>| RtValue::Array(cx.heap.alloc_array(VType::Primitive(Primitive::String), Vec::new()));
            returned!(empty(cx), empty(cx), failed_result(cx, err.to_string()))
        }
    }
}

// ---- msvc ----

/// The original imports MSVC's `vcvarsall`-generated environment via a
/// Windows-only child process diff; `NativeHost` has no such MSVC-specific
/// hook, so both variants report failure rather than silently doing
/// nothing (see `DESIGN.md`).
fn intrinsic_msvc_import_env_x64(cx: &mut IntrinsicCx<'_>, _params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    returned!(failed_result(cx, "msvc_import_env_x64 is not supported on this host"))
}

fn intrinsic_msvc_import_env_x86(cx: &mut IntrinsicCx<'_>, _params: &[RtValue]) -> Result<IntrinsicOutcome, RuntimeAbort> {
    returned!(failed_result(cx, "msvc_import_env_x86 is not supported on this host"))
}

const REGISTRY: &[(&str, IntrinsicFn)] = &[
    ("typeof", intrinsic_typeof),
    ("print", intrinsic_print),
    ("println", intrinsic_println),
    ("exit", intrinsic_exit),
    ("set_cd", intrinsic_set_cd),
    ("assert", intrinsic_assert),
    ("failed", intrinsic_failed),
    ("thread_sleep", intrinsic_thread_sleep),
    ("env", intrinsic_env),
    ("env_path", intrinsic_env_path),
    ("env_path_array", intrinsic_env_path_array),
    ("console_write", intrinsic_console_write),
    ("console_clear", intrinsic_console_clear),
    ("console_set_cursor", intrinsic_console_set_cursor),
    ("console_get_cursor", intrinsic_console_get_cursor),
    ("call", intrinsic_call),
    ("call_exe", intrinsic_call_exe),
    ("call_script", intrinsic_call_script),
    ("path_resolve", intrinsic_path_resolve),
    ("str_get_codepoint", intrinsic_str_get_codepoint),
    ("str_split", intrinsic_str_split),
    ("json_route", intrinsic_json_route),
    ("yov_require", intrinsic_yov_require),
    ("yov_require_min", intrinsic_yov_require_min),
    ("yov_require_max", intrinsic_yov_require_max),
    ("yov_parse", intrinsic_yov_parse),
    ("ask_yesno", intrinsic_ask_yesno),
    ("exists", intrinsic_exists),
    ("create_directory", intrinsic_create_directory),
    ("delete_directory", intrinsic_delete_directory),
    ("copy_directory", intrinsic_copy_directory),
    ("move_directory", intrinsic_move_directory),
    ("copy_file", intrinsic_copy_file),
    ("move_file", intrinsic_move_file),
    ("delete_file", intrinsic_delete_file),
    ("write_entire_file", intrinsic_write_entire_file),
    ("read_entire_file", intrinsic_read_entire_file),
    ("file_get_info", intrinsic_file_get_info),
    ("dir_get_files_info", intrinsic_dir_get_files_info),
    ("msvc_import_env_x64", intrinsic_msvc_import_env_x64),
    ("msvc_import_env_x86", intrinsic_msvc_import_env_x86),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;
    use crate::intern::Interner;
    use crate::types::StructDef as TypesStructDef;

    fn cx<'a>(heap: &'a Heap, interner: &'a Interner, host: &'a mut InMemoryHost, result_def: Arc<TypesStructDef>) -> IntrinsicCx<'a> {
        IntrinsicCx {
            heap,
            interner,
            host,
            cd: PathBuf::from("/"),
            user_assert: false,
            no_user: false,
            redirect_stdout: RedirectMode::Console,
            result_def,
            current_file: "script.yov".to_string(),
            current_line: 1,
        }
    }

    #[test]
    fn lookup_resolves_thread_sleep_not_sleep() {
        assert!(lookup("thread_sleep").is_some());
        assert!(lookup("sleep").is_none());
    }

    #[test]
    fn delete_missing_file_reports_failed_result() {
        let heap = Heap::new();
        let interner = Interner::new();
        let result_def = Arc::new(TypesStructDef::builtin_result(&interner));
        let mut host = InMemoryHost::new();
        let mut ctx = cx(&heap, &interner, &mut host, result_def);
        let path = alloc_str(&ctx, "missing.txt");
        let outcome = intrinsic_delete_file(&mut ctx, &[path]).expect("intrinsic does not abort");
        let IntrinsicOutcome::Returned(values) = outcome else { panic!("expected a return") };
        let RtValue::Struct(id) = &values[0] else { panic!("expected a Result struct") };
        assert!(matches!(heap.struct_field(*id, 0), RtValue::Bool(true)));
    }

    #[test]
    fn write_then_read_round_trips_through_the_host() {
        let heap = Heap::new();
        let interner = Interner::new();
        let result_def = Arc::new(TypesStructDef::builtin_result(&interner));
        let mut host = InMemoryHost::new();
        let mut ctx = cx(&heap, &interner, &mut host, result_def);
        let path = alloc_str(&ctx, "notes.txt");
        let content = alloc_str(&ctx, "hello");
        intrinsic_write_entire_file(&mut ctx, &[path, content]).unwrap();
        let path = alloc_str(&ctx, "notes.txt");
        let outcome = intrinsic_read_entire_file(&mut ctx, &[path]).unwrap();
        let IntrinsicOutcome::Returned(values) = outcome else { panic!("expected a return") };
        assert_eq!(str_value(&ctx, &values[0]), "hello");
    }

    #[test]
    fn json_route_walks_nested_objects() {
        let heap = Heap::new();
        let interner = Interner::new();
        let result_def = Arc::new(TypesStructDef::builtin_result(&interner));
        let mut host = InMemoryHost::new();
        let mut ctx = cx(&heap, &interner, &mut host, result_def);
        let json = alloc_str(&ctx, r#"{"a": {"b": "c"}}"#);
        let route = alloc_str(&ctx, "a/b");
        let outcome = intrinsic_json_route(&mut ctx, &[json, route]).unwrap();
        let IntrinsicOutcome::Returned(values) = outcome else { panic!("expected a return") };
        assert_eq!(str_value(&ctx, &values[0]), "\"c\"");
    }
}
