//! Top-level orchestration (§2, §5): discovers every script reachable from
//! the entry point, runs the definition table through its four passes,
//! wires up the ambient globals, and drives the runtime.
//!
//! Grounded on the teacher's `Runner`: a façade owning the whole pipeline so
//! that an embedder's `main` stays a thin argument-parsing shell. The
//! parallel "lanes" fan-out (§5) is grounded on the teacher's worker-pool
//! compiler passes: one mutex-guarded work queue, a small fixed pool of OS
//! threads, a barrier between passes — without the teacher's bytecode
//! linking step, which this IR does not need.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};

use crate::ast::{Expr, ObjectInit, Stmt, StringPart, TypeExpr, UnaryOp};
use crate::definitions::{ArgDef, Definition, DefinitionId, DefinitionTable, FunctionBody, FunctionDef, GlobalDef};
use crate::diagnostics::{Location, Reporter};
use crate::heap::{Heap, RtValue};
use crate::host::{Host, PrintLevel};
use crate::intern::Interner;
use crate::ir::{Ir, Literal, Value};
use crate::parser;
use crate::resource::ResourceLimits;
use crate::run_error::RunError;
use crate::runtime::Interpreter;
use crate::scanner::{self, CodeDefinition, DeclKind};
use crate::script::{ScriptId, ScriptPool};
use crate::semantic::{self, Signature};
use crate::tracer::{NoopTracer, StderrTracer, Tracer};
use crate::types::{EnumDef, Primitive, Stage, StructDef, StructMember, VType};

/// Interpreter version exposed through the ambient `yov` global; mirrors
/// the constants the `yov_require*` intrinsics check against.
const YOV_MAJOR_VERSION: i64 = 0;
const YOV_MINOR_VERSION: i64 = 0;

/// Parsed command line, per §6.1.
#[derive(Debug, Clone)]
pub struct CliOptions {
    pub script_path: PathBuf,
    pub analyze_only: bool,
    pub trace: bool,
    pub user_assert: bool,
    pub no_user: bool,
    pub wait_end: bool,
    /// Script arguments as given on the command line: `name=value`, or a
    /// bare `name` (implied value `"true"`).
    pub script_args: Vec<(String, String)>,
}

impl CliOptions {
    /// Parses the process argument list (excluding `argv[0]`). Flags may
    /// appear before or after the script path; the first non-flag token is
    /// taken as the script path, everything after that is a script argument.
    ///
    /// # Errors
    /// Returns a message when no script path was given.
    pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, String> {
        let mut script_path = None;
        let mut analyze_only = false;
        let mut trace = false;
        let mut user_assert = false;
        let mut no_user = false;
        let mut wait_end = false;
        let mut script_args = Vec::new();

        for arg in args {
            match arg.as_str() {
                "-analyze" => analyze_only = true,
                "-trace" => trace = true,
                "-user_assert" => user_assert = true,
                "-no_user" => no_user = true,
                "-wait_end" => wait_end = true,
                _ if arg.starts_with('-') && script_path.is_none() => return Err(format!("unknown flag: {arg}")),
                _ if script_path.is_none() => script_path = Some(PathBuf::from(arg)),
                _ if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
                _ => {
                    let (name, value) = arg.split_once('=').map_or((arg.as_str(), "true"), |(n, v)| (n, v));
                    script_args.push((name.to_string(), value.to_string()));
                }
            }
        }

        let script_path = script_path.ok_or_else(|| "missing script path".to_string())?;
        Ok(Self { script_path, analyze_only, trace, user_assert, no_user, wait_end, script_args })
    }
}

/// Runs `work` over every item in `items` across a small pool of OS
/// threads: a single mutex-guarded queue, no per-item synchronisation
/// beyond that, per the concurrency design's lane model (§5).
fn run_in_lanes<T, F>(items: Vec<T>, work: F)
where
    T: Send,
    F: Fn(T) + Sync,
{
    if items.is_empty() {
        return;
    }
    let lanes = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get).min(8).min(items.len()).max(1);
    let queue = Mutex::new(VecDeque::from(items));
    std::thread::scope(|scope| {
        for _ in 0..lanes {
            scope.spawn(|| loop {
                let item = queue.lock().expect("lane queue poisoned").pop_front();
                let Some(item) = item else { break };
                work(item);
            });
        }
    });
}

/// Drives a whole compile-and-run, or just a compile with `-analyze`.
pub struct Program;

impl Program {
    /// Runs `options` against `host`, returning the process exit code.
    /// Diagnostics and runtime failures are printed to `host` before
    /// returning a non-zero code.
    #[must_use]
    pub fn run(options: &CliOptions, host: &mut dyn Host) -> i32 {
        let mut stderr_tracer = StderrTracer;
        let mut noop_tracer = NoopTracer;
        let tracer: &mut dyn Tracer = if options.trace { &mut stderr_tracer } else { &mut noop_tracer };
        match Self::try_run(options, host, tracer) {
            Ok(code) => code,
            Err(err) => {
                host.print(PrintLevel::Error, &format!("{err}\n"));
                err.exit_code()
            }
        }
    }

    fn try_run(options: &CliOptions, host: &mut dyn Host, tracer: &mut dyn Tracer) -> Result<i32, RunError> {
        let scripts = ScriptPool::new();
        let interner = Interner::new();
        let reporter = Reporter::new();
        let definitions = DefinitionTable::new();
        let heap = Heap::new();
        let here = Location::new(ScriptId::default_for_empty(), 0);

        let absolute_entry = options.script_path.canonicalize().map_err(|err| {
            host.print(PrintLevel::Error, &format!("cannot read '{}': {err}\n", options.script_path.display()));
            RunError::ParseFailed
        })?;
        let (entry_id, _) = scripts.load_or_get(&absolute_entry).map_err(|err| {
            host.print(PrintLevel::Error, &format!("cannot read '{}': {err}\n", absolute_entry.display()));
            RunError::ParseFailed
        })?;

        tracer.pass_boundary("discover");
        let scan_results = discover_scripts(&scripts, &reporter, entry_id);
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        tracer.pass_boundary("identify");
        let result_def = Arc::new(StructDef::builtin_result(&interner));
        let _ = definitions.identify(&reporter, "Result", here, Definition::Struct(result_def.clone()));
        register_intrinsics(&definitions, &interner, &reporter, result_def);
        setup_ambient_globals(&definitions, &interner, &reporter);

        let mut code_definitions: Vec<(DefinitionId, CodeDefinition)> = Vec::new();
        let mut script_ids: Vec<ScriptId> = scan_results.keys().copied().collect();
        script_ids.sort_by_key(ScriptId::index);
        for script_id in script_ids {
            let scan = &scan_results[&script_id];
            for code_def in &scan.definitions {
                let definition = match code_def.kind {
                    DeclKind::Function => Definition::Function(Arc::new(FunctionDef::new_unresolved(code_def.identifier.clone(), code_def.location))),
                    DeclKind::Struct => Definition::Struct(Arc::new(StructDef::new_unresolved(code_def.identifier.clone()))),
                    DeclKind::Enum => Definition::Enum(Arc::new(EnumDef::new_unresolved(code_def.identifier.clone()))),
                    DeclKind::Arg => Definition::Arg(Arc::new(ArgDef::new_unresolved(code_def.identifier.clone(), code_def.location))),
                    DeclKind::Global => {
                        Definition::Global(Arc::new(GlobalDef::new_unresolved(code_def.identifier.clone(), code_def.location, VType::Nil, code_def.is_constant)))
                    }
                };
                if let Some(id) = definitions.identify(&reporter, &code_def.identifier, code_def.location, definition) {
                    code_definitions.push((id, code_def.clone()));
                }
            }
        }
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        tracer.pass_boundary("define");
        let global_bodies: Mutex<AHashMap<DefinitionId, Stmt>> = Mutex::new(AHashMap::new());
        let struct_members: Mutex<AHashMap<DefinitionId, Vec<(String, TypeExpr)>>> = Mutex::new(AHashMap::new());
        run_in_lanes(code_definitions.clone(), |(id, code_def)| {
            define_one(&definitions, &interner, &reporter, &scripts, id, &code_def, &global_bodies, &struct_members);
        });
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        tracer.pass_boundary("fixpoint");
        fixpoint_structs(&definitions, &interner, &reporter, &struct_members.into_inner().expect("struct member lock poisoned"));
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        tracer.pass_boundary("lower");
        let function_defs: Vec<(DefinitionId, CodeDefinition)> = code_definitions.iter().filter(|(_, d)| d.kind == DeclKind::Function).cloned().collect();
        run_in_lanes(function_defs, |(id, code_def)| lower_function(&definitions, &interner, &reporter, &scripts, id, &code_def));
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        let globals_ir = build_globals_ir(&definitions, &interner, &reporter, &code_definitions, &global_bodies.into_inner().expect("global body lock poisoned"));
        if reporter.has_errors() {
            host.print(PrintLevel::Error, &reporter.render(&scripts));
            return Err(RunError::ParseFailed);
        }

        if options.analyze_only {
            host.print(PrintLevel::Info, "ok\n");
            return Ok(0);
        }

        let Some(main_id) = definitions.resolve_name("main") else {
            host.print(PrintLevel::Error, "no 'main' function defined\n");
            return Err(RunError::ParseFailed);
        };

        let limits = ResourceLimits::default();
        let mut interpreter = Interpreter::new(&heap, &interner, &definitions, &scripts, host, tracer, limits, options.user_assert, options.no_user);
        seed_ambient_globals(&mut interpreter, &heap, &interner, &definitions, &absolute_entry, options);
        seed_script_args(&mut interpreter, &heap, &interner, &definitions, &reporter, options);
        if reporter.has_errors() {
            return Err(RunError::ParseFailed);
        }

        interpreter.run_globals_init(&globals_ir)?;
        let code = interpreter.call_entry_point(main_id, Vec::new())?;
        interpreter.release_globals();
        Ok(code)
    }
}

fn discover_scripts(scripts: &ScriptPool, reporter: &Reporter, entry: ScriptId) -> AHashMap<ScriptId, scanner::ScanResult> {
    let mut scanned: AHashMap<ScriptId, scanner::ScanResult> = AHashMap::new();
    let mut seen: AHashSet<ScriptId> = AHashSet::default();
    seen.insert(entry);
    let mut frontier = vec![entry];

    while !frontier.is_empty() {
        let batch = std::mem::take(&mut frontier);
        let results: Mutex<Vec<(ScriptId, scanner::ScanResult)>> = Mutex::new(Vec::new());
        run_in_lanes(batch, |id| {
            let script = scripts.get(id);
            let scan = scanner::scan(&script, reporter);
            results.lock().expect("scan results lock poisoned").push((id, scan));
        });
        for (id, scan) in results.into_inner().expect("scan results lock poisoned") {
            let script = scripts.get(id);
            for import_path in &scan.imports {
                let resolved = script.directory.join(import_path);
                match scripts.load_or_get(&resolved) {
                    Ok((new_id, _)) => {
                        if seen.insert(new_id) {
                            frontier.push(new_id);
                        }
                    }
                    Err(err) => reporter.error(Location::new(id, 0), format!("cannot import '{import_path}': {err}")),
                }
            }
            scanned.insert(id, scan);
        }
    }
    scanned
}

/// Registers every intrinsic as an already-`Ready` `FunctionDef` whose body
/// is `FunctionBody::Intrinsic(name)`: user source has no grammar for
/// declaring an extern function, so these are seeded directly rather than
/// discovered by the scanner. Signatures are hand-authored here to match
/// each intrinsic's actual parameter/return shape in `intrinsics.rs`.
fn register_intrinsics(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter, result_def: Arc<StructDef>) {
    let here = Location::new(ScriptId::default_for_empty(), 0);
    let int = VType::Primitive(Primitive::Int);
    let boolean = VType::Primitive(Primitive::Bool);
    let string = VType::Primitive(Primitive::String);
    let result = VType::Struct(result_def);
    let string_array = VType::Array { element: Box::new(string.clone()), dims: 1 };

    let table: Vec<(&str, Vec<(&str, VType)>, Vec<(&str, VType)>)> = vec![
        ("typeof", vec![("value", VType::Any)], vec![("result", VType::Any)]),
        ("print", vec![("text", string.clone())], vec![]),
        ("println", vec![("text", string.clone())], vec![]),
        ("exit", vec![("code", int.clone())], vec![]),
        ("set_cd", vec![("path", string.clone())], vec![("result", result.clone())]),
        ("assert", vec![("condition", boolean.clone())], vec![("result", result.clone())]),
        ("failed", vec![("message", string.clone()), ("code", int.clone())], vec![("result", result.clone())]),
        ("thread_sleep", vec![("millis", int.clone())], vec![]),
        ("env", vec![("name", string.clone())], vec![("value", string.clone()), ("result", result.clone())]),
        ("env_path", vec![("name", string.clone())], vec![("value", string.clone()), ("result", result.clone())]),
        ("env_path_array", vec![("name", string.clone())], vec![("values", string_array.clone()), ("result", result.clone())]),
        ("console_write", vec![("text", string.clone())], vec![]),
        ("console_clear", vec![], vec![]),
        ("console_set_cursor", vec![("row", int.clone()), ("col", int.clone())], vec![]),
        ("console_get_cursor", vec![], vec![("row", int.clone()), ("col", int.clone())]),
        ("call", vec![("command_line", string.clone())], vec![("stdout", string.clone()), ("exit_code", int.clone()), ("result", result.clone())]),
        (
            "call_exe",
            vec![("exe", string.clone()), ("args", string.clone())],
            vec![("stdout", string.clone()), ("exit_code", int.clone()), ("result", result.clone())],
        ),
        (
            "call_script",
            vec![("script_name", string.clone()), ("args", string.clone()), ("lang_args", string.clone())],
            vec![("stdout", string.clone()), ("exit_code", int.clone()), ("result", result.clone())],
        ),
        ("path_resolve", vec![("path", string.clone())], vec![("resolved", string.clone())]),
        ("str_get_codepoint", vec![("text", string.clone()), ("cursor", int.clone())], vec![("codepoint", int.clone()), ("next_cursor", int.clone())]),
        ("str_split", vec![("text", string.clone()), ("separator", string.clone())], vec![("parts", string_array.clone())]),
        ("json_route", vec![("json", string.clone()), ("route", string.clone())], vec![("value", string.clone()), ("result", result.clone())]),
        ("yov_require", vec![("major", int.clone()), ("minor", int.clone())], vec![("result", result.clone())]),
        ("yov_require_min", vec![("major", int.clone()), ("minor", int.clone())], vec![("result", result.clone())]),
        ("yov_require_max", vec![("major", int.clone()), ("minor", int.clone())], vec![("result", result.clone())]),
        ("yov_parse", vec![("path", string.clone())], vec![("result", result.clone())]),
        ("ask_yesno", vec![("prompt", string.clone())], vec![("answer", boolean.clone())]),
        ("exists", vec![("path", string.clone())], vec![("answer", boolean.clone())]),
        ("create_directory", vec![("path", string.clone()), ("recursive", boolean.clone())], vec![("result", result.clone())]),
        ("delete_directory", vec![("path", string.clone())], vec![("result", result.clone())]),
        ("copy_directory", vec![("dst", string.clone()), ("src", string.clone())], vec![("result", result.clone())]),
        ("move_directory", vec![("dst", string.clone()), ("src", string.clone())], vec![("result", result.clone())]),
        ("copy_file", vec![("dst", string.clone()), ("src", string.clone()), ("overwrite", boolean.clone())], vec![("result", result.clone())]),
        ("move_file", vec![("dst", string.clone()), ("src", string.clone())], vec![("result", result.clone())]),
        ("delete_file", vec![("path", string.clone())], vec![("result", result.clone())]),
        ("write_entire_file", vec![("path", string.clone()), ("content", string.clone())], vec![("result", result.clone())]),
        ("read_entire_file", vec![("path", string.clone())], vec![("content", string.clone()), ("result", result.clone())]),
        (
            "file_get_info",
            vec![("path", string.clone())],
            vec![
                ("name", string.clone()),
                ("path", string.clone()),
                ("is_directory", boolean.clone()),
                ("size_bytes", int.clone()),
                ("result", result.clone()),
            ],
        ),
        (
            "dir_get_files_info",
            vec![("path", string.clone())],
            vec![("names", string_array.clone()), ("paths", string_array), ("result", result.clone())],
        ),
        ("msvc_import_env_x64", vec![], vec![("result", result.clone())]),
        ("msvc_import_env_x86", vec![], vec![("result", result)]),
    ];

    for (name, params, returns) in table {
        let func = FunctionDef::new_unresolved(name.to_string(), here);
        let params = params.into_iter().map(|(n, ty)| (interner.intern(n), ty)).collect();
        let returns = returns.into_iter().map(|(n, ty)| (interner.intern(n), ty)).collect();
        func.set_signature(params, returns);
        *func.body.write().expect("function body lock poisoned") = FunctionBody::Intrinsic(name.to_string());
        func.set_stage(Stage::Ready);
        let _ = definitions.identify(reporter, name, here, Definition::Function(Arc::new(func)));
    }
}

fn struct_layout(interner: &Interner, fields: &[(&str, VType)]) -> (Vec<StructMember>, usize, bool) {
    let mut members = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    let mut needs_release = false;
    for (name, ty) in fields {
        needs_release |= ty.needs_internal_release();
        members.push(StructMember { name: interner.intern(name), ty: ty.clone(), offset });
        offset += ty.size_in_bytes();
    }
    (members, offset, needs_release)
}

/// Registers the ambient globals (§6.3): `yov`, `os`, `context`, `calls`,
/// plus the struct/enum types backing them. Run before any user script is
/// identified, so a user declaration that collides with one of these names
/// gets the ordinary "already defined" diagnostic.
fn setup_ambient_globals(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter) {
    let here = Location::new(ScriptId::default_for_empty(), 0);

    let os_kind = Arc::new(EnumDef::new_ready(
        "OSKind".into(),
        vec![("Linux".into(), 0), ("MacOs".into(), 1), ("Windows".into(), 2), ("Unknown".into(), 3)],
    ));
    let _ = definitions.identify(reporter, "OSKind", here, Definition::Enum(os_kind.clone()));

    let redirect_mode = Arc::new(EnumDef::new_ready(
        "RedirectMode".into(),
        vec![("Console".into(), 0), ("Ignore".into(), 1), ("Script".into(), 2), ("ImportEnv".into(), 3)],
    ));
    let _ = definitions.identify(reporter, "RedirectMode", here, Definition::Enum(redirect_mode.clone()));

    let yov_info = Arc::new(StructDef::new_unresolved("YovInfo".into()));
    let (members, size, release) = struct_layout(
        interner,
        &[
            ("path", VType::Primitive(Primitive::String)),
            ("version", VType::Primitive(Primitive::String)),
            ("major", VType::Primitive(Primitive::Int)),
            ("minor", VType::Primitive(Primitive::Int)),
            ("revision", VType::Primitive(Primitive::Int)),
        ],
    );
    yov_info.set_body(members, size, release);
    yov_info.set_stage(Stage::Ready);
    let _ = definitions.identify(reporter, "YovInfo", here, Definition::Struct(yov_info.clone()));

    let os_struct = Arc::new(StructDef::new_unresolved("OS".into()));
    let (members, size, release) = struct_layout(interner, &[("kind", VType::Enum(os_kind))]);
    os_struct.set_body(members, size, release);
    os_struct.set_stage(Stage::Ready);
    let _ = definitions.identify(reporter, "OS", here, Definition::Struct(os_struct.clone()));

    let context_struct = Arc::new(StructDef::new_unresolved("Context".into()));
    let string_array = VType::Array { element: Box::new(VType::Primitive(Primitive::String)), dims: 1 };
    let (members, size, release) = struct_layout(
        interner,
        &[
            ("cd", VType::Primitive(Primitive::String)),
            ("script_dir", VType::Primitive(Primitive::String)),
            ("caller_dir", VType::Primitive(Primitive::String)),
            ("args", string_array.clone()),
            ("types", string_array),
        ],
    );
    context_struct.set_body(members, size, release);
    context_struct.set_stage(Stage::Ready);
    let _ = definitions.identify(reporter, "Context", here, Definition::Struct(context_struct.clone()));

    let calls_struct = Arc::new(StructDef::new_unresolved("CallsContext".into()));
    let (members, size, release) = struct_layout(interner, &[("redirect_stdout", VType::Enum(redirect_mode))]);
    calls_struct.set_body(members, size, release);
    calls_struct.set_stage(Stage::Ready);
    let _ = definitions.identify(reporter, "CallsContext", here, Definition::Struct(calls_struct.clone()));

    let _ = definitions.identify(reporter, "yov", here, Definition::Global(Arc::new(GlobalDef::new_unresolved("yov".into(), here, VType::Struct(yov_info), true))));
    let _ = definitions.identify(reporter, "os", here, Definition::Global(Arc::new(GlobalDef::new_unresolved("os".into(), here, VType::Struct(os_struct), true))));
    let _ = definitions.identify(
        reporter,
        "context",
        here,
        Definition::Global(Arc::new(GlobalDef::new_unresolved("context".into(), here, VType::Struct(context_struct), true))),
    );
    let _ = definitions.identify(reporter, "calls", here, Definition::Global(Arc::new(GlobalDef::new_unresolved("calls".into(), here, VType::Struct(calls_struct), true))));
}

fn find_struct(definitions: &DefinitionTable, name: &str) -> Arc<StructDef> {
    definitions
        .resolve_name(name)
        .and_then(|id| definitions.with_definition(id, |d| if let Definition::Struct(def) = d { Some(def.clone()) } else { None }))
        .unwrap_or_else(|| panic!("ambient struct '{name}' must be registered"))
}

fn find_enum(definitions: &DefinitionTable, name: &str) -> Arc<EnumDef> {
    definitions
        .resolve_name(name)
        .and_then(|id| definitions.with_definition(id, |d| if let Definition::Enum(def) = d { Some(def.clone()) } else { None }))
        .unwrap_or_else(|| panic!("ambient enum '{name}' must be registered"))
}

fn text_of(script_text: &str, range: Option<scanner::ByteRange>) -> (String, u32) {
    match range {
        Some(r) => (script_text[r.start as usize..r.end as usize].to_string(), r.start),
        None => (String::new(), 0),
    }
}

fn string_literal_text(expr: &Expr) -> Option<String> {
    let Expr::StringLiteral(parts, _) = expr else { return None };
    let mut out = String::new();
    for part in parts {
        match part {
            StringPart::Text(text) => out.push_str(text),
            StringPart::Interp(_) => return None,
        }
    }
    Some(out)
}

fn resolve_typed_list(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter, location: Location, parsed: &[(String, TypeExpr)]) -> Vec<(crate::intern::StringId, VType)> {
    parsed
        .iter()
        .map(|(name, ty)| {
            let vty = semantic::resolve_type_expr(definitions, ty).unwrap_or_else(|| {
                reporter.error(location, format!("unknown type for '{name}'"));
                VType::Any
            });
            (interner.intern(name), vty)
        })
        .collect()
}

/// The define pass (phase 2): parses one declaration's params/returns/body/
/// variants/properties from its scanned byte range and fills in its
/// definition. Struct member types are parsed here but resolved later, in
/// [`fixpoint_structs`], since they may reference a struct identified after
/// this one; enum variant values, function signatures and arg properties
/// have no such forward-reference problem and are resolved immediately.
#[allow(clippy::too_many_arguments)]
fn define_one(
    definitions: &DefinitionTable,
    interner: &Interner,
    reporter: &Reporter,
    scripts: &ScriptPool,
    id: DefinitionId,
    code_def: &CodeDefinition,
    global_bodies: &Mutex<AHashMap<DefinitionId, Stmt>>,
    struct_members: &Mutex<AHashMap<DefinitionId, Vec<(String, TypeExpr)>>>,
) {
    let script = scripts.get(code_def.script);

    match code_def.kind {
        DeclKind::Function => {
            let (params_text, params_off) = text_of(&script.text, code_def.params);
            let params = parser::parse_param_list_text(&params_text, params_off, code_def.script, reporter);
            let (returns_text, returns_off) = text_of(&script.text, code_def.returns);
            let returns = parser::parse_return_list_text(&returns_text, returns_off, code_def.script, reporter);
            let params = resolve_typed_list(definitions, interner, reporter, code_def.location, &params);
            let returns = resolve_typed_list(definitions, interner, reporter, code_def.location, &returns);
            definitions.with_definition(id, |definition| {
                if let Definition::Function(func) = definition {
                    func.set_signature(params, returns);
                    func.set_stage(Stage::Defined);
                }
            });
        }
        DeclKind::Struct => {
            let (body_text, body_off) = text_of(&script.text, code_def.body);
            let members = parser::parse_param_list_text(&body_text, body_off, code_def.script, reporter);
            definitions.with_definition(id, |definition| {
                if let Definition::Struct(def) = definition {
                    def.set_stage(Stage::Defined);
                }
            });
            struct_members.lock().expect("struct member lock poisoned").insert(id, members);
        }
        DeclKind::Enum => {
            let (body_text, body_off) = text_of(&script.text, code_def.body);
            let variants = parser::parse_enum_variants_text(&body_text, body_off, code_def.script, reporter);
            let mut next_value = 0i64;
            let mut resolved = Vec::with_capacity(variants.len());
            for (name, value_expr) in &variants {
                let value = match value_expr {
                    Some(Expr::IntLiteral(n, _)) => *n,
                    Some(Expr::Unary { op: UnaryOp::Neg, expr, .. }) if matches!(expr.as_ref(), Expr::IntLiteral(..)) => {
                        let Expr::IntLiteral(n, _) = expr.as_ref() else { unreachable!() };
                        -*n
                    }
                    Some(_) => {
                        reporter.error(code_def.location, format!("enum variant '{name}' must have a literal integer value"));
                        next_value
                    }
                    None => next_value,
                };
                resolved.push((name.clone(), value));
                next_value = value + 1;
            }
            definitions.with_definition(id, |definition| {
                if let Definition::Enum(def) = definition {
                    def.set_variants(resolved.clone());
                    def.set_stage(Stage::Ready);
                }
            });
        }
        DeclKind::Arg => {
            let declared_ty = if code_def.returns.is_some() {
                let (text, off) = text_of(&script.text, code_def.returns);
                parser::parse_return_list_text(&text, off, code_def.script, reporter)
                    .first()
                    .and_then(|(_, ty)| semantic::resolve_type_expr(definitions, ty))
                    .unwrap_or(VType::Primitive(Primitive::Bool))
            } else {
                VType::Primitive(Primitive::Bool)
            };
            let (body_text, body_off) = text_of(&script.text, code_def.body);
            let properties = parser::parse_arg_properties_text(&body_text, body_off, code_def.script, reporter);
            definitions.with_definition(id, |definition| {
                let Definition::Arg(arg) = definition else { return };
                *arg.ty.write().expect("arg type lock poisoned") = declared_ty.clone();
                for (key, expr) in &properties {
                    match key.as_str() {
                        "name" => {
                            if let Some(text) = string_literal_text(expr) {
                                arg.set_display_name(text);
                            }
                        }
                        "description" => {
                            if let Some(text) = string_literal_text(expr) {
                                arg.set_description(text);
                            }
                        }
                        "required" => {
                            if let Expr::BoolLiteral(b, _) = expr {
                                *arg.required.write().expect("arg required lock poisoned") = *b;
                            }
                        }
                        "default" => match semantic::lower_constant_expr(definitions, interner, reporter, code_def.script, expr) {
                            Some((value @ Value::Literal(_), _)) => {
                                *arg.default_value.write().expect("arg default lock poisoned") = Some(value);
                                *arg.required.write().expect("arg required lock poisoned") = false;
                            }
                            Some(_) => reporter.error(code_def.location, "an arg's default value must be a literal constant"),
                            None => {}
                        },
                        other => reporter.error(code_def.location, format!("unknown arg property '{other}'")),
                    }
                }
                arg.set_stage(Stage::Ready);
            });
        }
        DeclKind::Global => {
            if code_def.is_constant {
                let (expr_text, expr_off) = text_of(&script.text, code_def.body);
                let Some(expr) = parser::parse_expr_text(&expr_text, expr_off, code_def.script, reporter) else { return };
                let ty = semantic::lower_constant_expr(definitions, interner, reporter, code_def.script, &expr).map(|(_, ty)| ty);
                definitions.with_definition(id, |definition| {
                    if let Definition::Global(global) = definition {
                        if let Some(ty) = ty {
                            *global.ty.write().expect("global type lock poisoned") = ty;
                        }
                        global.set_stage(Stage::Ready);
                    }
                });
                let stmt = Stmt::ObjectDef { names: vec![code_def.identifier.clone()], ty: None, init: Some(ObjectInit::Constant(expr)), location: code_def.location };
                global_bodies.lock().expect("global body lock poisoned").insert(id, stmt);
            } else {
                let (text, off) = text_of(&script.text, code_def.body);
                let (ty_expr, init_expr) = parser::parse_global_def_text(&text, off, code_def.script, reporter);
                let resolved_ty = ty_expr
                    .as_ref()
                    .and_then(|t| semantic::resolve_type_expr(definitions, t))
                    .or_else(|| init_expr.as_ref().and_then(|e| semantic::lower_constant_expr(definitions, interner, reporter, code_def.script, e).map(|(_, ty)| ty)));
                definitions.with_definition(id, |definition| {
                    if let Definition::Global(global) = definition {
                        if let Some(ty) = resolved_ty.clone() {
                            *global.ty.write().expect("global type lock poisoned") = ty;
                        } else {
                            reporter.error(code_def.location, format!("cannot infer a type for '{}'", code_def.identifier));
                        }
                        global.set_stage(Stage::Ready);
                    }
                });
                let stmt = Stmt::ObjectDef { names: vec![code_def.identifier.clone()], ty: ty_expr, init: init_expr.map(ObjectInit::Value), location: code_def.location };
                global_bodies.lock().expect("global body lock poisoned").insert(id, stmt);
            }
        }
    }
}

/// A struct member type is safe to lay out once whatever it names is
/// itself `Ready` — except a reference, whose in-object size is a fixed
/// pointer-width pair regardless of what it points to. Without that
/// exception a self-referential struct (`next: &Node`) could never resolve.
fn member_is_ready(ty: &VType) -> bool {
    match ty {
        VType::Struct(def) => def.is_ready(),
        VType::Enum(def) => def.is_ready(),
        _ => true,
    }
}

fn fixpoint_structs(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter, struct_members: &AHashMap<DefinitionId, Vec<(String, TypeExpr)>>) {
    let mut remaining: Vec<DefinitionId> = struct_members.keys().copied().collect();
    loop {
        let mut progressed = false;
        let mut still_waiting = Vec::new();
        for id in remaining {
            let parsed = &struct_members[&id];
            let mut resolved = Vec::with_capacity(parsed.len());
            let mut ready = true;
            for (name, ty) in parsed {
                match semantic::resolve_type_expr(definitions, ty) {
                    Some(vty) if member_is_ready(&vty) => resolved.push((name.as_str(), vty)),
                    _ => {
                        ready = false;
                        break;
                    }
                }
            }
            if !ready {
                still_waiting.push(id);
                continue;
            }
            let (members, size, release) = struct_layout(interner, &resolved);
            definitions.with_definition(id, |definition| {
                if let Definition::Struct(def) = definition {
                    def.set_body(members, size, release);
                    def.set_stage(Stage::Ready);
                }
            });
            progressed = true;
        }
        if still_waiting.is_empty() {
            return;
        }
        if !progressed {
            for id in &still_waiting {
                let name = definitions.name_of(*id);
                reporter.error(Location::new(ScriptId::default_for_empty(), 0), format!("struct '{name}' has a circular or unresolved member type"));
            }
            return;
        }
        remaining = still_waiting;
    }
}

fn lower_function(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter, scripts: &ScriptPool, id: DefinitionId, code_def: &CodeDefinition) {
    let script = scripts.get(code_def.script);
    let body_range = code_def.body.expect("a function declaration always has a body");
    let body_text = &script.text[body_range.start as usize..body_range.end as usize];
    let stmts = parser::parse_block_text(body_text, body_range.start, code_def.script, reporter);

    let (params, returns, name) = definitions.with_definition(id, |definition| {
        let Definition::Function(func) = definition else { unreachable!("lower_function only runs on Function ids") };
        (func.params(), func.returns(), func.name.clone())
    });
    let signature = Signature { params: &params, returns: &returns };
    let ir = semantic::build_ir(definitions, interner, reporter, code_def.script, script.absolute_path.clone(), &signature, &stmts, false, &name);

    definitions.with_definition(id, |definition| {
        if let Definition::Function(func) = definition {
            *func.body.write().expect("function body lock poisoned") = FunctionBody::Ir(ir);
            func.set_stage(Stage::Ready);
        }
    });
}

/// Assembles every top-level global's initializer, in discovery order,
/// into one synthetic body and lowers it with `at_global_scope: true`.
fn build_globals_ir(definitions: &DefinitionTable, interner: &Interner, reporter: &Reporter, code_definitions: &[(DefinitionId, CodeDefinition)], global_bodies: &AHashMap<DefinitionId, Stmt>) -> Ir {
    let mut stmts = Vec::new();
    let mut script = ScriptId::default_for_empty();
    for (id, code_def) in code_definitions {
        if code_def.kind != DeclKind::Global {
            continue;
        }
        if let Some(stmt) = global_bodies.get(id) {
            script = code_def.script;
            stmts.push(stmt.clone());
        }
    }
    let signature = Signature { params: &[], returns: &[] };
    semantic::build_ir(definitions, interner, reporter, script, PathBuf::new(), &signature, &stmts, true, "<globals>")
}

/// Installs the ambient `yov`/`os`/`context` globals (`calls` is seeded
/// separately since its one field, `redirect_stdout`, starts at its
/// default variant and is otherwise plain user-writable state).
fn seed_ambient_globals(interpreter: &mut Interpreter<'_>, heap: &Heap, interner: &Interner, definitions: &DefinitionTable, entry_path: &Path, options: &CliOptions) {
    let os_kind_ty = find_enum(definitions, "OSKind");
    let os_kind_index: usize = if cfg!(target_os = "linux") {
        0
    } else if cfg!(target_os = "macos") {
        1
    } else if cfg!(target_os = "windows") {
        2
    } else {
        3
    };

    let yov_id = heap.alloc_struct(
        find_struct(definitions, "YovInfo"),
        vec![
            RtValue::Str(heap.alloc_string(entry_path.display().to_string())),
            RtValue::Str(heap.alloc_string(format!("{YOV_MAJOR_VERSION}.{YOV_MINOR_VERSION}.0"))),
            RtValue::Int(YOV_MAJOR_VERSION),
            RtValue::Int(YOV_MINOR_VERSION),
            RtValue::Int(0),
        ],
    );
    interpreter.seed_global(interner.intern("yov"), RtValue::Struct(yov_id));

    let os_id = heap.alloc_struct(find_struct(definitions, "OS"), vec![RtValue::Enum(VType::Enum(os_kind_ty), os_kind_index)]);
    interpreter.seed_global(interner.intern("os"), RtValue::Struct(os_id));

    let script_dir = entry_path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let args_array: Vec<RtValue> = options.script_args.iter().map(|(name, value)| RtValue::Str(heap.alloc_string(format!("{name}={value}")))).collect();
    let args_id = heap.alloc_array(VType::Primitive(Primitive::String), args_array);

    let mut type_names: Vec<String> = vec!["Int".into(), "Bool".into(), "String".into(), "Void".into(), "Any".into()];
    for id in definitions.all_ids() {
        definitions.with_definition(id, |d| match d {
            Definition::Struct(def) => type_names.push(def.name.clone()),
            Definition::Enum(def) => type_names.push(def.name.clone()),
            _ => {}
        });
    }
    let types_array: Vec<RtValue> = type_names.into_iter().map(|name| RtValue::Str(heap.alloc_string(name))).collect();
    let types_id = heap.alloc_array(VType::Primitive(Primitive::String), types_array);

    let context_id = heap.alloc_struct(
        find_struct(definitions, "Context"),
        vec![
            RtValue::Str(heap.alloc_string(script_dir.display().to_string())),
            RtValue::Str(heap.alloc_string(script_dir.display().to_string())),
            RtValue::Str(heap.alloc_string(script_dir.display().to_string())),
            RtValue::Array(args_id),
            RtValue::Array(types_id),
        ],
    );
    interpreter.seed_global(interner.intern("context"), RtValue::Struct(context_id));

    let redirect_mode_ty = find_enum(definitions, "RedirectMode");
    let calls_id = heap.alloc_struct(find_struct(definitions, "CallsContext"), vec![RtValue::Enum(VType::Enum(redirect_mode_ty), 0)]);
    interpreter.seed_global(interner.intern("calls"), RtValue::Struct(calls_id));
}

fn value_from_literal(heap: &Heap, value: &Value) -> RtValue {
    match value {
        Value::Literal(Literal::Int(n)) => RtValue::Int(*n),
        Value::Literal(Literal::Bool(b)) => RtValue::Bool(*b),
        Value::Literal(Literal::String(s)) => RtValue::Str(heap.alloc_string(s.clone())),
        Value::Literal(Literal::Type(ty)) => RtValue::Type(ty.clone()),
        Value::Literal(Literal::Enum(ty, index)) => RtValue::Enum(ty.clone(), *index),
        _ => RtValue::Nil,
    }
}

fn coerce_cli_value(heap: &Heap, ty: &VType, raw: &str) -> Option<RtValue> {
    match ty {
        VType::Primitive(Primitive::Bool) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(RtValue::Bool(true)),
            "false" | "0" | "no" => Some(RtValue::Bool(false)),
            _ => None,
        },
        VType::Primitive(Primitive::Int) => raw.parse::<i64>().ok().map(RtValue::Int),
        VType::Primitive(Primitive::String) => Some(RtValue::Str(heap.alloc_string(raw.to_string()))),
        _ => None,
    }
}

/// Every `arg` declaration becomes a global, addressed exactly like a
/// mutable top-level `name: Type` (see `Builder::global_alias`); this seeds
/// its value from a matching `name=value` on the command line, its
/// declared default, or a required-argument diagnostic.
fn seed_script_args(interpreter: &mut Interpreter<'_>, heap: &Heap, interner: &Interner, definitions: &DefinitionTable, reporter: &Reporter, options: &CliOptions) {
    for id in definitions.all_ids() {
        let Some(arg) = definitions.with_definition(id, |d| if let Definition::Arg(arg) = d { Some(arg.clone()) } else { None }) else { continue };
        let provided = options.script_args.iter().find(|(name, _)| name == &arg.identifier).map(|(_, v)| v.clone());
        let ty = arg.ty.read().expect("arg type lock poisoned").clone();
        let value = if let Some(raw) = provided {
            coerce_cli_value(heap, &ty, &raw).unwrap_or_else(|| {
                reporter.error(arg.location, format!("argument '{}' could not be parsed as {}", arg.identifier, ty.display_name()));
                heap.zero_init(&ty)
            })
        } else if let Some(default) = arg.default_value.read().expect("arg default lock poisoned").clone() {
            value_from_literal(heap, &default)
        } else {
            if *arg.required.read().expect("arg required lock poisoned") {
                reporter.error(arg.location, format!("missing required argument '{}'", arg.identifier));
            }
            heap.zero_init(&ty)
        };
        interpreter.seed_global(interner.intern(&arg.identifier), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_trailing_script_args() {
        let args = ["-trace", "build.yov", "target=release", "verbose"].into_iter().map(str::to_string);
        let options = CliOptions::parse_args(args).expect("valid arguments");
        assert!(options.trace);
        assert!(!options.analyze_only);
        assert_eq!(options.script_path, PathBuf::from("build.yov"));
        assert_eq!(options.script_args, vec![("target".to_string(), "release".to_string()), ("verbose".to_string(), "true".to_string())]);
    }

    #[test]
    fn missing_script_path_is_an_error() {
        let args = ["-trace"].into_iter().map(str::to_string);
        assert!(CliOptions::parse_args(args).is_err());
    }

    #[test]
    fn struct_layout_accumulates_offsets_and_release_flag() {
        let interner = Interner::new();
        let (members, size, release) = struct_layout(&interner, &[("flag", VType::Primitive(Primitive::Bool)), ("name", VType::Primitive(Primitive::String))]);
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 1);
        assert_eq!(size, 1 + VType::Primitive(Primitive::String).size_in_bytes());
        assert!(release, "a String member makes the struct need internal release");
    }

    #[test]
    fn run_in_lanes_visits_every_item_exactly_once() {
        let seen: Mutex<Vec<i32>> = Mutex::new(Vec::new());
        run_in_lanes((0..50).collect(), |n| seen.lock().expect("lock poisoned").push(n));
        let mut seen = seen.into_inner().expect("lock poisoned");
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }
}
