//! The Runtime/Interpreter (§4.7, §5): a register-based dispatch loop that
//! executes a linked [`Ir`] program over a call-stack of [`Scope`]s.
//!
//! Grounded on the shape of the teacher's bytecode VM
//! (`ouros::bytecode::vm`) without its byte-opcode machinery: that VM
//! fetches one opcode byte at a time off an instruction stream and
//! maintains an explicit operand stack; this interpreter's IR is already a
//! flat array of typed three-address [`Instruction`]s, so dispatch is a
//! single `match` over [`UnitBody`] per program-counter step and operands
//! are addressed directly by register index rather than pushed/popped.
//! What carries over is the frame-per-call structure (`Scope` here plays
//! the teacher's `Frame`) and the opportunistic-sweep-on-backward-jump
//! rule, which mirrors the teacher's periodic GC-safepoint checks on loop
//! back-edges.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;

use crate::definitions::{Definition, DefinitionId, DefinitionTable, FunctionBody};
use crate::diagnostics::Location;
use crate::heap::{Heap, RefTarget, Reference, RtValue};
use crate::host::Host;
use crate::intern::{Interner, StringId};
use crate::intrinsics::{self, IntrinsicCx, IntrinsicOutcome};
use crate::ir::{Ir, JumpCondition, Literal, Register, RegisterKind, UnitBody, Value};
use crate::lexer::BinaryOperator;
use crate::resource::{ResourceError, ResourceLimits, ScratchArenaPool};
use crate::run_error::{RunError, RuntimeAbort};
use crate::script::ScriptPool;
use crate::tracer::Tracer;
use crate::types::{Primitive, VType};

/// Resolves the dynamic type of an already-materialised value, used by
/// `typeof` for anything that is not itself a `Type` literal.
#[must_use]
pub fn value_type_of(heap: &Heap, value: &RtValue) -> VType {
    match value {
        RtValue::Nil => VType::Nil,
        RtValue::Int(_) => VType::Primitive(Primitive::Int),
        RtValue::Bool(_) => VType::Primitive(Primitive::Bool),
        RtValue::Enum(ty, _) => ty.clone(),
        RtValue::Type(_) => VType::Any,
        RtValue::Str(_) => VType::Primitive(Primitive::String),
        RtValue::Array(id) => {
            let (element, _) = heap.array_snapshot(*id);
            VType::Array { element: Box::new(element), dims: 1 }
        }
        RtValue::Struct(id) => {
            let (ty, _) = heap.struct_snapshot(*id);
            VType::Struct(ty)
        }
        RtValue::Reference(r) => VType::Reference { base: Box::new(r.ty.clone()), dims: 1 },
    }
}

/// One function activation: the linked program being executed plus its
/// register file. `Global`-kind registers are never stored here — they are
/// an alias the [`Interpreter`] redirects into its process-wide global
/// store, per the design recorded in `semantic`'s module doc comment.
struct Scope {
    ir: Arc<Ir>,
    registers: Vec<RtValue>,
}

impl Scope {
    fn register_meta(&self, index: u32) -> &Register {
        self.ir.register(index)
    }
}

/// Executes one program's worth of linked IR: the globals-initialisation
/// block, then whichever function the caller asked to run first (normally
/// `main`, driven by [`crate::program::Program`]).
pub struct Interpreter<'a> {
    heap: &'a Heap,
    interner: &'a Interner,
    definitions: &'a DefinitionTable,
    scripts: &'a ScriptPool,
    host: &'a mut dyn Host,
    tracer: &'a mut dyn Tracer,
    limits: ResourceLimits,
    scratch: ScratchArenaPool,
    globals: RefCell<AHashMap<StringId, RtValue>>,
    ir_cache: RefCell<AHashMap<DefinitionId, Arc<Ir>>>,
    call_depth: std::cell::Cell<usize>,
    sweep_counter: std::cell::Cell<u32>,
    user_assert: bool,
    no_user: bool,
    /// The process's working directory as `set_cd` last left it; intrinsics
    /// see this through `IntrinsicCx.cd` and can update it for the rest of
    /// the run (a fresh `IntrinsicCx` is built per call, so this is what
    /// carries the change between calls instead of re-asking the host).
    cd: RefCell<PathBuf>,
}

/// What running one function body produced.
enum Flow {
    /// Fell through to the end of the instruction array (only valid for a
    /// `Void`-returning body; callers of a value-returning body that never
    /// hit `Return` indicate a prior compile-time bug, not a runtime fault).
    FellThrough,
    Returned(Vec<RtValue>),
    Exit(i32),
}

#[allow(clippy::too_many_arguments)]
impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(
        heap: &'a Heap,
        interner: &'a Interner,
        definitions: &'a DefinitionTable,
        scripts: &'a ScriptPool,
        host: &'a mut dyn Host,
        tracer: &'a mut dyn Tracer,
        limits: ResourceLimits,
        user_assert: bool,
        no_user: bool,
    ) -> Self {
        let cd = RefCell::new(host.working_dir());
        Self {
            heap,
            interner,
            definitions,
            scripts,
            host,
            tracer,
            limits,
            scratch: ScratchArenaPool::new(),
            globals: RefCell::new(AHashMap::new()),
            ir_cache: RefCell::new(AHashMap::new()),
            call_depth: std::cell::Cell::new(0),
            sweep_counter: std::cell::Cell::new(0),
            user_assert,
            no_user,
            cd,
        }
    }

    /// Installs a global's initial value before any IR has run, releasing
    /// whatever was already bound to `name`. Used by [`crate::program`] to
    /// seed the ambient `yov`/`os`/`context`/`calls` globals.
    pub fn seed_global(&mut self, name: StringId, value: RtValue) {
        let old = self.globals.borrow_mut().insert(name, value);
        if let Some(old) = old {
            self.heap.release_value(&old);
        }
    }

    /// Runs `globals_ir` (the synthetic globals-initialisation body built by
    /// [`crate::semantic::build_ir`] with `at_global_scope: true`) once, to
    /// populate the global store before anything else executes.
    pub fn run_globals_init(&mut self, globals_ir: &Ir) -> Result<(), RunError> {
        let ir = Arc::new(globals_ir.clone());
        match self.run_ir(ir, Vec::new())? {
            Flow::Exit(code) => Err(RunError::Abort(RuntimeAbort::ResultFailed { message: "exit() called during global initialisation".into(), code: i64::from(code) })),
            Flow::FellThrough | Flow::Returned(_) => Ok(()),
        }
    }

    /// Calls a top-level function by name (normally `main`), returning its
    /// own exit rules: `Ok(0)` on a clean return, `Ok(code)` for an explicit
    /// `exit(code)`, or the `Result.code` of the failed `Result` that
    /// aborted execution, surfaced by [`RunError::exit_code`].
    pub fn call_entry_point(&mut self, function: DefinitionId, args: Vec<RtValue>) -> Result<i32, RunError> {
        match self.invoke_function(function, args)? {
            Flow::Exit(code) => Ok(code),
            Flow::Returned(_) | Flow::FellThrough => Ok(0),
        }
    }

    /// Number of heap objects still live; the ref-count-balance testable
    /// property requires this to be `0` once the caller has released every
    /// remaining global after the run completes.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        self.heap
    }

    /// Releases every global's current value and sweeps, so a clean run
    /// leaves `heap.object_count() == 0`.
    pub fn release_globals(&mut self) {
        for (_, value) in self.globals.borrow_mut().drain() {
            self.heap.release_value(&value);
        }
        let freed = self.heap.sweep();
        self.tracer.heap_sweep(freed, self.heap.object_count());
    }

    fn cached_ir(&self, id: DefinitionId, func: &crate::definitions::FunctionDef) -> Option<Arc<Ir>> {
        if let Some(cached) = self.ir_cache.borrow().get(&id) {
            return Some(cached.clone());
        }
        let body = func.body.read().expect("function body lock poisoned");
        match &*body {
            FunctionBody::Ir(ir) => {
                let arced = Arc::new(ir.clone());
                self.ir_cache.borrow_mut().insert(id, arced.clone());
                Some(arced)
            }
            _ => None,
        }
    }

    fn invoke_function(&mut self, id: DefinitionId, args: Vec<RtValue>) -> Result<Flow, RunError> {
        let func = self
            .definitions
            .with_definition(id, |definition| match definition {
                Definition::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("FunctionCall target must resolve to a function");

        if let Some(ir) = self.cached_ir(id, &func) {
            return self.run_ir(ir, args);
        }

        let body = func.body.read().expect("function body lock poisoned");
        match &*body {
            FunctionBody::Intrinsic(name) => {
                let intrinsic = intrinsics::lookup(name).unwrap_or_else(|| panic!("unresolved intrinsic '{name}'"));
                drop(body);
                let outcome = {
                    let mut cx = self.intrinsic_cx(Location::new(crate::script::ScriptId::default_for_empty(), 0));
                    let outcome = intrinsic(&mut cx, &args);
                    let cd_after = cx.cd.clone();
                    drop(cx);
                    *self.cd.borrow_mut() = cd_after;
                    outcome
                };
                for arg in &args {
                    self.heap.release_value(arg);
                }
                match outcome? {
                    IntrinsicOutcome::Returned(values) => Ok(Flow::Returned(values)),
                    IntrinsicOutcome::Exit(code) => Ok(Flow::Exit(code)),
                }
            }
            FunctionBody::Ir(_) => unreachable!("cached_ir already handles the Ir case"),
            FunctionBody::Unresolved => panic!("function '{}' never reached Ready", func.name),
        }
    }

    fn intrinsic_cx(&mut self, location: Location) -> IntrinsicCx<'_> {
        let (current_file, current_line) = self.describe_location(location);
        let redirect_stdout = self.calls_redirect_mode();
        IntrinsicCx {
            heap: self.heap,
            interner: self.interner,
            host: self.host,
            cd: self.cd.borrow().clone(),
            user_assert: self.user_assert,
            no_user: self.no_user,
            redirect_stdout,
            result_def: self.result_struct_def(),
            current_file,
            current_line,
        }
    }

    /// Reads the ambient `calls.redirect_stdout` global, falling back to
    /// `Console` if the global hasn't been seeded yet (e.g. while running
    /// the globals-init block, before `calls` has a value).
    fn calls_redirect_mode(&self) -> crate::host::RedirectMode {
        (|| {
            let calls_name = self.interner.intern("calls");
            let field_name = self.interner.intern("redirect_stdout");
            let globals = self.globals.borrow();
            let RtValue::Struct(id) = globals.get(&calls_name)?.clone() else { return None };
            let (ty, _) = self.heap.struct_snapshot(id);
            let index = ty.member_index(field_name)?;
            let RtValue::Enum(_, variant) = self.heap.struct_field(id, index) else { return None };
            Some(match variant {
                1 => crate::host::RedirectMode::Ignore,
                2 => crate::host::RedirectMode::Script,
                3 => crate::host::RedirectMode::ImportEnv,
                _ => crate::host::RedirectMode::Console,
            })
        })()
        .unwrap_or(crate::host::RedirectMode::Console)
    }

    fn result_struct_def(&self) -> Arc<crate::types::StructDef> {
        self.definitions
            .all_ids()
            .into_iter()
            .find_map(|id| {
                self.definitions.with_definition(id, |definition| match definition {
                    Definition::Struct(def) if def.name == "Result" => Some(def.clone()),
                    _ => None,
                })
            })
            .expect("builtin Result struct must be registered before execution")
    }

    fn describe_location(&self, location: Location) -> (String, u32) {
        if self.scripts.len() == 0 {
            return (String::new(), 0);
        }
        let script = self.scripts.get(location.script);
        let (line, _) = script.line_and_column(location.offset);
        (script.absolute_path.display().to_string(), u32::try_from(line + 1).unwrap_or(0))
    }

    /// The dispatch loop: steps `ir.instructions` by program counter until a
    /// `Return`/implicit fall-through or an `exit()` call stops it.
    fn run_ir(&mut self, ir: Arc<Ir>, args: Vec<RtValue>) -> Result<Flow, RunError> {
        let depth = self.call_depth.get() + 1;
        if depth > self.limits.max_recursion_depth {
            return Err(RunError::Resource(ResourceError::Recursion { limit: self.limits.max_recursion_depth }));
        }
        self.call_depth.set(depth);
        let result = self.run_ir_inner(ir, args);
        self.call_depth.set(depth - 1);
        result
    }

    fn run_ir_inner(&mut self, ir: Arc<Ir>, args: Vec<RtValue>) -> Result<Flow, RunError> {
        let mut registers = Vec::with_capacity(ir.local_registers.len());
        for reg in &ir.local_registers {
            registers.push(if reg.kind == RegisterKind::Global { RtValue::Nil } else { self.heap.zero_init(&reg.ty) });
        }
        for (index, arg) in args.into_iter().enumerate() {
            let old = std::mem::replace(&mut registers[index], arg);
            self.heap.release_value(&old);
        }
        let mut scope = Scope { ir, registers };

        let mut pc: i64 = 0;
        loop {
            let Some(instruction) = scope.ir.instructions.get(pc as usize) else {
                return Ok(self.fall_through(&mut scope));
            };
            let body = &instruction.body;
            let next = match body {
                UnitBody::Empty | UnitBody::Label(_) => pc + 1,
                UnitBody::Copy { dst, src, through_reference } => {
                    self.exec_copy(&mut scope, *dst, src, *through_reference)?;
                    pc + 1
                }
                UnitBody::Store { dst, src } => {
                    let value = self.materialize_owned(&mut scope, src)?;
                    self.write_register(&mut scope, *dst, value);
                    pc + 1
                }
                UnitBody::FunctionCall { first_dst, function, params } => {
                    let mut arg_values = Vec::with_capacity(params.len());
                    for p in params {
                        arg_values.push(self.materialize_owned(&mut scope, p)?);
                    }
                    match self.invoke_function(*function, arg_values)? {
                        Flow::Exit(code) => return Ok(self.cleanup_and_exit(&mut scope, code)),
                        Flow::Returned(values) => {
                            for (offset, value) in values.into_iter().enumerate() {
                                self.write_register(&mut scope, *first_dst + offset as u32, value);
                            }
                        }
                        Flow::FellThrough => {}
                    }
                    pc + 1
                }
                UnitBody::Return => {
                    let values = self.collect_returns(&mut scope);
                    self.drop_scope(scope);
                    return Ok(Flow::Returned(values));
                }
                UnitBody::Jump { condition, src, target } => {
                    let taken = match condition {
                        JumpCondition::Always => true,
                        JumpCondition::IfFalse | JumpCondition::IfTrue => {
                            let value = self.materialize_owned(&mut scope, src)?;
                            let Some(flag) = value.as_bool() else {
                                self.heap.release_value(&value);
                                return Err(RunError::Abort(RuntimeAbort::BoolExpected));
                            };
                            self.heap.release_value(&value);
                            (*condition == JumpCondition::IfTrue) == flag
                        }
                    };
                    if taken {
                        let offset = crate::ir::linked_jump_offset(target);
                        let landing = pc + 1 + i64::from(offset);
                        if offset < 0 {
                            self.maybe_sweep();
                        }
                        landing
                    } else {
                        pc + 1
                    }
                }
                UnitBody::BinaryOp { dst, lhs, rhs, op } => {
                    let result = self.exec_binary_op(&mut scope, lhs, rhs, *op)?;
                    self.write_register(&mut scope, *dst, result);
                    pc + 1
                }
                UnitBody::SignOp { dst, src, negate } => {
                    let value = self.materialize_owned(&mut scope, src)?;
                    let result = match (&value, negate) {
                        (RtValue::Int(n), true) => RtValue::Int(-n),
                        (RtValue::Bool(b), false) => RtValue::Bool(!b),
                        _ => {
                            self.heap.release_value(&value);
                            return Err(RunError::Abort(RuntimeAbort::BrokenStack));
                        }
                    };
                    self.heap.release_value(&value);
                    self.write_register(&mut scope, *dst, result);
                    pc + 1
                }
                UnitBody::Child { dst, src, index, is_member } => {
                    let result = self.exec_child(&mut scope, src, index, *is_member)?;
                    self.write_register(&mut scope, *dst, result);
                    pc + 1
                }
                UnitBody::ResultEval { src } => {
                    self.exec_result_eval(&mut scope, src)?;
                    pc + 1
                }
            };
            pc = next;
        }
    }

    fn fall_through(&mut self, scope: &mut Scope) -> Flow {
        let values = self.collect_returns(scope);
        for (index, value) in scope.registers.iter().enumerate() {
            let index = u32::try_from(index).expect("register index fits u32");
            if scope.ir.register(index).kind == RegisterKind::Return {
                continue;
            }
            self.heap.release_value(value);
        }
        Flow::Returned(values)
    }

    fn cleanup_and_exit(&mut self, scope: &mut Scope, code: i32) -> Flow {
        for value in std::mem::take(&mut scope.registers) {
            self.heap.release_value(&value);
        }
        Flow::Exit(code)
    }

    fn drop_scope(&mut self, scope: Scope) {
        // Return-kind registers were already moved out by `collect_returns`;
        // everything else in this frame is now dead.
        for (index, value) in scope.registers.into_iter().enumerate() {
            let index = u32::try_from(index).expect("register index fits u32");
            if scope.ir.register(index).kind == RegisterKind::Return {
                continue;
            }
            self.heap.release_value(&value);
        }
    }

    /// Moves the function's `Return`-kind registers out (they occupy
    /// indices `[parameter_count, parameter_count + return_count)`, per
    /// `semantic::build_ir`'s construction order).
    fn collect_returns(&mut self, scope: &mut Scope) -> Vec<RtValue> {
        let start = scope.ir.parameter_count;
        let count = scope.ir.return_count;
        (start..start + count).map(|i| std::mem::replace(&mut scope.registers[i as usize], RtValue::Nil)).collect()
    }

    fn maybe_sweep(&mut self) {
        let next = self.sweep_counter.get() + 1;
        if next >= self.limits.sweep_interval {
            self.sweep_counter.set(0);
            let freed = self.heap.sweep();
            self.tracer.heap_sweep(freed, self.heap.object_count());
        } else {
            self.sweep_counter.set(next);
        }
    }

    // ---- register access ----

    fn read_register(&self, scope: &Scope, index: u32) -> RtValue {
        let reg = scope.register_meta(index);
        if reg.kind == RegisterKind::Global {
            let name = reg.name.expect("global register carries its identifier");
            return self.globals.borrow().get(&name).cloned().unwrap_or(RtValue::Nil);
        }
        scope.registers[index as usize].clone()
    }

    fn write_register(&self, scope: &mut Scope, index: u32, value: RtValue) {
        let reg = scope.register_meta(index);
        if reg.kind == RegisterKind::Global {
            let name = reg.name.expect("global register carries its identifier");
            let old = self.globals.borrow_mut().insert(name, value);
            if let Some(old) = old {
                self.heap.release_value(&old);
            }
            return;
        }
        let old = std::mem::replace(&mut scope.registers[index as usize], value);
        self.heap.release_value(&old);
    }

    // ---- value materialisation ----

    /// Produces an independently-owned `RtValue` for `value`: literals and
    /// constructed values (array literals, string interpolation, `ZeroInit`)
    /// are already fresh; a register/lvalue read is deep-copied (or, for a
    /// `Reference`, retained) since its slot is merely being peeked at.
    fn materialize_owned(&self, scope: &mut Scope, value: &Value) -> Result<RtValue, RuntimeAbort> {
        match value {
            Value::None => Ok(RtValue::Nil),
            Value::Literal(lit) => Ok(self.literal_owned(lit)),
            Value::ZeroInit(ty) => Ok(self.heap.zero_init(ty)),
            Value::Array { elements, element_ty } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.materialize_owned(scope, element)?);
                }
                Ok(RtValue::Array(self.heap.alloc_array(element_ty.clone(), values)))
            }
            Value::StringComposition(parts) => {
                let mut text = String::new();
                for part in parts {
                    if let Value::Literal(Literal::String(literal_text)) = part {
                        text.push_str(literal_text);
                        continue;
                    }
                    let value = self.materialize_owned(scope, part)?;
                    text.push_str(&self.heap.stringify(self.interner, &value));
                    self.heap.release_value(&value);
                }
                Ok(RtValue::Str(self.heap.alloc_string(text)))
            }
            Value::MultipleReturn(_) => Err(RuntimeAbort::BrokenStack),
            Value::Register { index, reference_op } | Value::LValue { index, reference_op } => {
                let static_ty = scope.register_meta(*index).ty.clone();
                let raw = self.read_register(scope, *index);
                let applied = self.apply_reference_op(raw, *reference_op, &static_ty)?;
                if matches!(applied, RtValue::Reference(_)) {
                    self.heap.retain_value(&applied);
                    Ok(applied)
                } else {
                    Ok(self.heap.deep_copy(&applied))
                }
            }
        }
    }

    fn literal_owned(&self, literal: &Literal) -> RtValue {
        match literal {
            Literal::Int(n) => RtValue::Int(*n),
            Literal::Bool(b) => RtValue::Bool(*b),
            Literal::String(s) => RtValue::Str(self.heap.alloc_string(s.clone())),
            Literal::Type(ty) => RtValue::Type(ty.clone()),
            Literal::Enum(ty, index) => RtValue::Enum(ty.clone(), *index),
        }
    }

    /// Applies `op` take-reference (positive) / dereference (negative)
    /// conversions. `static_ty` is the register's compile-time type before
    /// the conversion, used to tag a freshly-built `Reference`'s pointee
    /// type; taking the address of an already-`Reference` value collapses
    /// to the same runtime `Reference` rather than building a genuine
    /// reference-to-reference, since a `Reference` has no heap identity of
    /// its own to point at (see `DESIGN.md`, open question: reference depth).
    fn apply_reference_op(&self, mut value: RtValue, op: i32, static_ty: &VType) -> Result<RtValue, RuntimeAbort> {
        if op > 0 {
            for _ in 0..op {
                value = match value {
                    RtValue::Str(id) | RtValue::Array(id) | RtValue::Struct(id) => {
                        RtValue::Reference(Reference { ty: static_ty.clone(), target: RefTarget::Whole(id) })
                    }
                    already @ RtValue::Reference(_) => already,
                    other => other,
                };
            }
        } else {
            for _ in 0..(-op) {
                value = match value {
                    RtValue::Reference(r) => {
                        if matches!(r.target, RefTarget::Null) {
                            return Err(RuntimeAbort::NullDereference);
                        }
                        self.heap.read_reference(&r)
                    }
                    other => other,
                };
            }
        }
        Ok(value)
    }

    fn exec_copy(&mut self, scope: &mut Scope, dst: u32, src: &Value, through_reference: bool) -> Result<(), RuntimeAbort> {
        let value = self.materialize_owned(scope, src)?;
        if through_reference {
            let RtValue::Reference(reference) = self.read_register(scope, dst) else {
                self.heap.release_value(&value);
                return Err(RuntimeAbort::BrokenStack);
            };
            if matches!(reference.target, RefTarget::Null) {
                self.heap.release_value(&value);
                return Err(RuntimeAbort::NullDereference);
            }
            self.heap.write_reference(&reference, value);
        } else {
            self.write_register(scope, dst, value);
        }
        Ok(())
    }

    fn exec_binary_op(&mut self, scope: &mut Scope, lhs: &Value, rhs: &Value, op: BinaryOperator) -> Result<RtValue, RuntimeAbort> {
        let lhs_value = self.materialize_owned(scope, lhs)?;
        let rhs_value = self.materialize_owned(scope, rhs)?;
        let result = self.apply_binary_op(&lhs_value, &rhs_value, op);
        self.heap.release_value(&lhs_value);
        self.heap.release_value(&rhs_value);
        result
    }

    fn apply_binary_op(&self, lhs: &RtValue, rhs: &RtValue, op: BinaryOperator) -> Result<RtValue, RuntimeAbort> {
        use BinaryOperator as Op;
        match op {
            Op::Eq => return Ok(RtValue::Bool(self.heap.values_equal(lhs, rhs))),
            Op::NotEq => return Ok(RtValue::Bool(!self.heap.values_equal(lhs, rhs))),
            _ => {}
        }
        match (lhs, rhs, op) {
            (RtValue::Int(a), RtValue::Int(b), Op::Add) => Ok(RtValue::Int(a + b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Sub) => Ok(RtValue::Int(a - b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Mul) => Ok(RtValue::Int(a * b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Div) => if *b == 0 { Err(RuntimeAbort::DivisionByZero) } else { Ok(RtValue::Int(a / b)) },
            (RtValue::Int(a), RtValue::Int(b), Op::Mod) => if *b == 0 { Err(RuntimeAbort::DivisionByZero) } else { Ok(RtValue::Int(a % b)) },
            (RtValue::Int(a), RtValue::Int(b), Op::Lt) => Ok(RtValue::Bool(a < b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Gt) => Ok(RtValue::Bool(a > b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Le) => Ok(RtValue::Bool(a <= b)),
            (RtValue::Int(a), RtValue::Int(b), Op::Ge) => Ok(RtValue::Bool(a >= b)),
            (RtValue::Bool(a), RtValue::Bool(b), Op::And) => Ok(RtValue::Bool(*a && *b)),
            (RtValue::Bool(a), RtValue::Bool(b), Op::Or) => Ok(RtValue::Bool(*a || *b)),
            (RtValue::Str(a), RtValue::Str(b), Op::Add) => {
                let joined = format!("{}{}", self.heap.string(*a), self.heap.string(*b));
                Ok(RtValue::Str(self.heap.alloc_string(joined)))
            }
            (RtValue::Str(a), RtValue::Int(n), Op::Add) => {
                let joined = format!("{}{n}", self.heap.string(*a));
                Ok(RtValue::Str(self.heap.alloc_string(joined)))
            }
            (RtValue::Str(a), RtValue::Str(b), Op::Div) => {
                let joined = format!("{}/{}", self.heap.string(*a), self.heap.string(*b));
                Ok(RtValue::Str(self.heap.alloc_string(joined)))
            }
            (RtValue::Array(a), RtValue::Array(b), Op::Add) => {
                let (element_ty, mut elements) = self.heap.array_snapshot(*a);
                let (_, more) = self.heap.array_snapshot(*b);
                for element in more {
                    elements.push(self.heap.deep_copy(&element));
                }
                Ok(RtValue::Array(self.heap.alloc_array(element_ty, elements)))
            }
            (RtValue::Array(a), element, Op::Add) => {
                let (element_ty, mut elements) = self.heap.array_snapshot(*a);
                elements.push(self.heap.deep_copy(element));
                Ok(RtValue::Array(self.heap.alloc_array(element_ty, elements)))
            }
            _ => Err(RuntimeAbort::BrokenStack),
        }
    }

    fn exec_child(&mut self, scope: &mut Scope, src: &Value, index: &Value, is_member: bool) -> Result<RtValue, RuntimeAbort> {
        let base = self.materialize_owned(scope, src)?;
        let index_value = self.materialize_owned(scope, index)?;
        let idx = index_value.as_int().unwrap_or(0);
        self.heap.release_value(&index_value);
        let result = if is_member { self.child_member(&base, idx) } else { self.child_property(&base, idx) };
        self.heap.release_value(&base);
        result
    }

    fn child_member(&self, base: &RtValue, idx: i64) -> Result<RtValue, RuntimeAbort> {
        match base {
            RtValue::Struct(id) => {
                let (ty, _) = self.heap.struct_snapshot(*id);
                let member_ty = ty.member_ty_at(idx as usize).ok_or(RuntimeAbort::BrokenStack)?;
                self.heap.retain(*id);
                Ok(RtValue::Reference(Reference { ty: member_ty, target: RefTarget::StructField(*id, idx as usize) }))
            }
            RtValue::Array(id) => {
                let count = self.heap.array_len(*id);
                if idx < 0 || idx as usize >= count {
                    return Err(RuntimeAbort::IndexOutOfBounds { index: idx, count });
                }
                let (element_ty, _) = self.heap.array_snapshot(*id);
                self.heap.retain(*id);
                Ok(RtValue::Reference(Reference { ty: element_ty, target: RefTarget::ArrayElement(*id, idx as usize) }))
            }
            _ => Err(RuntimeAbort::BrokenStack),
        }
    }

    fn child_property(&self, base: &RtValue, idx: i64) -> Result<RtValue, RuntimeAbort> {
        match base {
            RtValue::Str(id) => Ok(RtValue::Int(self.heap.string(*id).chars().count() as i64)),
            RtValue::Array(id) => Ok(RtValue::Int(self.heap.array_len(*id) as i64)),
            RtValue::Enum(VType::Enum(def), variant) => match idx {
                0 => Ok(RtValue::Int(*variant as i64)),
                1 => Ok(RtValue::Int(def.variant_value(*variant).unwrap_or(0))),
                2 => Ok(RtValue::Str(self.heap.alloc_string(def.variant_name(*variant).unwrap_or_default()))),
                _ => Err(RuntimeAbort::BrokenStack),
            },
            _ => Err(RuntimeAbort::BrokenStack),
        }
    }

    fn exec_result_eval(&mut self, scope: &mut Scope, src: &Value) -> Result<(), RuntimeAbort> {
        let value = self.materialize_owned(scope, src)?;
        let RtValue::Struct(id) = &value else {
            self.heap.release_value(&value);
            return Err(RuntimeAbort::BrokenStack);
        };
        let (ty, fields) = self.heap.struct_snapshot(*id);
        let failed_index = ty.member_index(self.interner.intern("failed")).expect("Result always has 'failed'");
        let failed = fields[failed_index].as_bool().unwrap_or(false);
        if !failed {
            self.heap.release_value(&value);
            return Ok(());
        }
        let message_index = ty.member_index(self.interner.intern("message")).expect("Result always has 'message'");
        let code_index = ty.member_index(self.interner.intern("code")).expect("Result always has 'code'");
        let message = match &fields[message_index] {
            RtValue::Str(id) => self.heap.string(*id),
            other => self.heap.stringify(self.interner, other),
        };
        let code = fields[code_index].as_int().unwrap_or(1);
        self.heap.release_value(&value);
        Err(RuntimeAbort::ResultFailed { message, code })
    }

    /// Checks out a transient scratch buffer; exposed for intrinsics that
    /// assemble a listing or formatted blob without a heap round-trip.
    #[must_use]
    pub fn scratch(&self) -> crate::resource::ScratchArena<'_> {
        self.scratch.checkout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::DefinitionKind;
    use crate::diagnostics::Reporter;
    use crate::host::InMemoryHost;
    use crate::ir::{IrGraph, Label, JumpTarget};
    use crate::script::ScriptId;
    use crate::tracer::NoopTracer;

    fn build_table() -> (DefinitionTable, ScriptPool, Interner, Heap) {
        (DefinitionTable::new(), ScriptPool::new(), Interner::new(), Heap::new())
    }

    #[test]
    fn runs_trivial_function_and_returns_value() {
        let (definitions, scripts, interner, heap) = build_table();
        let mut host = InMemoryHost::new();
        let mut tracer = NoopTracer;

        let mut graph = IrGraph::new();
        graph.push(UnitBody::Return, Location::new(ScriptId::default_for_empty(), 0));
        let ir = Ir {
            parameter_count: 0,
            local_registers: vec![Register { kind: RegisterKind::Return, ty: VType::Primitive(Primitive::Int), is_constant: false, name: None }],
            instructions: crate::ir::link(graph),
            return_count: 0,
            source_path: std::path::PathBuf::new(),
        };
        // Overwrite with a Copy+Return so the function actually yields 7.
        let mut graph = IrGraph::new();
        let location = Location::new(ScriptId::default_for_empty(), 0);
        graph.push(UnitBody::Copy { dst: 0, src: Value::Literal(Literal::Int(7)), through_reference: false }, location);
        graph.push(UnitBody::Return, location);
        let ir = Ir { instructions: crate::ir::link(graph), ..ir };

        let reporter = Reporter::new();
        let _ = &reporter;
        let func = crate::definitions::FunctionDef::new_unresolved("answer".to_string(), location);
        func.set_signature(Vec::new(), vec![(interner.intern("result"), VType::Primitive(Primitive::Int))]);
        *func.body.write().unwrap() = FunctionBody::Ir(ir);
        func.set_stage(crate::types::Stage::Ready);
        let id = definitions.identify(&reporter, "answer", location, Definition::Function(Arc::new(func))).expect("registers");
        assert_eq!(definitions.len(), 1);
        assert_eq!(DefinitionKind::Function, definitions.with_definition(id, Definition::kind));

        let mut interpreter = Interpreter::new(&heap, &interner, &definitions, &scripts, &mut host, &mut tracer, ResourceLimits::default(), false, false);
        let flow = interpreter.invoke_function(id, Vec::new()).expect("call succeeds");
        match flow {
            Flow::Returned(values) => assert_eq!(values[0].as_int(), Some(7)),
            _ => panic!("expected a returned value"),
        }
        let _ = JumpTarget::Label(Label(0));
    }

    #[test]
    fn division_by_zero_aborts() {
        let (definitions, scripts, interner, heap) = build_table();
        let mut host = InMemoryHost::new();
        let mut tracer = NoopTracer;
        let mut interpreter = Interpreter::new(&heap, &interner, &definitions, &scripts, &mut host, &mut tracer, ResourceLimits::default(), false, false);
        let mut scope_ir_graph = IrGraph::new();
        let location = Location::new(ScriptId::default_for_empty(), 0);
        scope_ir_graph.push(
            UnitBody::BinaryOp { dst: 0, lhs: Value::Literal(Literal::Int(1)), rhs: Value::Literal(Literal::Int(0)), op: BinaryOperator::Div },
            location,
        );
        scope_ir_graph.push(UnitBody::Return, location);
        let ir = Arc::new(Ir {
            parameter_count: 0,
            local_registers: vec![Register { kind: RegisterKind::Local, ty: VType::Primitive(Primitive::Int), is_constant: false, name: None }],
            instructions: crate::ir::link(scope_ir_graph),
            return_count: 0,
            source_path: std::path::PathBuf::new(),
        });
        let result = interpreter.run_ir(ir, Vec::new());
        assert!(matches!(result, Err(RunError::Abort(RuntimeAbort::DivisionByZero))));
    }
}
