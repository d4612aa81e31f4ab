//! The Semantic Analyser / IR Builder: lowers a parsed statement list into
//! the linear IR (§4.5).
//!
//! Construction happens scope-by-scope: [`Builder`] tracks a stack of
//! lexical scopes (name -> local register index), a loop-label stack for
//! `break`/`continue`, and the in-progress [`IrGraph`]. Global identifiers
//! are addressed through a small wrinkle forced by [`Ir::register`] only
//! ever indexing a single function's own `local_registers` table: a
//! function that reads or writes a global gets its own local alias
//! register, `kind = Global`, `name = Some(id)`; the interpreter recognises
//! that kind and redirects the read/write to the process-wide global store
//! by that name instead of the scope's own register file. This is recorded
//! as a design decision in `DESIGN.md` (open question: global addressing).

use std::path::PathBuf;

use ahash::AHashMap;

use crate::ast::{Expr, ObjectInit, Stmt, StringPart, TypeExpr, UnaryOp};
use crate::definitions::{Definition, DefinitionKind, DefinitionTable};
use crate::diagnostics::{Location, Reporter};
use crate::intern::{Interner, StringId};
use crate::ir::{Instruction, Ir, IrGraph, JumpCondition, JumpTarget, Label, Literal, Register, RegisterKind, UnitBody, Value};
use crate::lexer::BinaryOperator;
use crate::script::ScriptId;
use crate::types::{Primitive, VType};

/// A function/global-init body's parameter and return shape, resolved by
/// the caller from the corresponding [`crate::definitions::FunctionDef`].
pub struct Signature<'a> {
    pub params: &'a [(StringId, VType)],
    pub returns: &'a [(StringId, VType)],
}

/// Lowers `body` into a linked [`Ir`].
///
/// `at_global_scope` selects how top-level `ObjectDef` statements resolve
/// their storage: `true` (the synthetic globals-init body) binds each
/// declaration to its pre-identified [`crate::definitions::GlobalDef`]
/// register instead of allocating a fresh local.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_ir(
    definitions: &DefinitionTable,
    interner: &Interner,
    reporter: &Reporter,
    script: ScriptId,
    source_path: PathBuf,
    signature: &Signature<'_>,
    body: &[Stmt],
    at_global_scope: bool,
    function_name: &str,
) -> Ir {
    let mut builder = Builder {
        definitions,
        interner,
        reporter,
        script,
        registers: Vec::new(),
        global_aliases: AHashMap::new(),
        scopes: vec![AHashMap::new()],
        loop_labels: Vec::new(),
        graph: IrGraph::new(),
        at_global_scope,
        return_types: signature.returns.iter().map(|(_, ty)| ty.clone()).collect(),
        return_registers: Vec::new(),
    };

    for &(name, ref ty) in signature.params {
        let index = builder.new_register(RegisterKind::Parameter, ty.clone(), false, Some(name));
        builder.declare_local(interner.resolve(name), index);
    }
    for &(name, ref ty) in signature.returns {
        let index = builder.new_register(RegisterKind::Return, ty.clone(), false, Some(name));
        builder.return_registers.push(index);
    }

    for stmt in body {
        builder.lower_stmt(stmt);
    }

    if !signature.returns.is_empty() && !all_paths_return(body) {
        reporter.error(location_of_body(body, script), format!("not all paths of '{function_name}' return a value"));
    }

    let instructions: Vec<Instruction> = crate::ir::link(builder.graph);
    Ir {
        parameter_count: u32::try_from(signature.params.len()).unwrap_or(0),
        local_registers: builder.registers,
        instructions,
        return_count: u32::try_from(signature.returns.len()).unwrap_or(0),
        source_path,
    }
}

/// Resolves a parsed `TypeExpr` to a `VType`, looking up struct/enum names
/// in `definitions`. Used both by `Builder` (a function body's own param/
/// return/local type annotations) and by `crate::program`'s define pass,
/// which resolves a top-level declaration's params/returns/global type
/// ahead of building any IR.
#[must_use]
pub fn resolve_type_expr(definitions: &DefinitionTable, ty: &TypeExpr) -> Option<VType> {
    match ty {
        TypeExpr::Named(name) => match name.as_str() {
            "Int" => Some(VType::Primitive(Primitive::Int)),
            "Bool" => Some(VType::Primitive(Primitive::Bool)),
            "String" => Some(VType::Primitive(Primitive::String)),
            "Any" => Some(VType::Any),
            "Void" => Some(VType::Void),
            _ => {
                let id = definitions.resolve_name(name)?;
                definitions.with_definition(id, |definition| match definition {
                    Definition::Struct(def) => Some(VType::Struct(def.clone())),
                    Definition::Enum(def) => Some(VType::Enum(def.clone())),
                    _ => None,
                })
            }
        },
        TypeExpr::Array(inner) => match resolve_type_expr(definitions, inner)? {
            VType::Array { element, dims } => Some(VType::Array { element, dims: dims + 1 }),
            other => Some(VType::Array { element: Box::new(other), dims: 1 }),
        },
        TypeExpr::Reference(inner) => match resolve_type_expr(definitions, inner)? {
            VType::Reference { base, dims } => Some(VType::Reference { base, dims: dims + 1 }),
            other => Some(VType::Reference { base: Box::new(other), dims: 1 }),
        },
    }
}

/// Lowers a standalone expression with no enclosing function — used to infer
/// a `name :: expr;` global's type, and a script argument's default-value
/// expression, ahead of the define pass building any real function body.
/// The expression must not reference locals or parameters (there are none).
#[must_use]
pub fn lower_constant_expr(
    definitions: &DefinitionTable,
    interner: &Interner,
    reporter: &Reporter,
    script: ScriptId,
    expr: &Expr,
) -> Option<(Value, VType)> {
    let mut builder = Builder {
        definitions,
        interner,
        reporter,
        script,
        registers: Vec::new(),
        global_aliases: AHashMap::new(),
        scopes: vec![AHashMap::new()],
        loop_labels: Vec::new(),
        graph: IrGraph::new(),
        at_global_scope: false,
        return_types: Vec::new(),
        return_registers: Vec::new(),
    };
    builder.lower_expr(expr, None)
}

fn location_of_body(body: &[Stmt], script: ScriptId) -> Location {
    body.first().map_or(Location::new(script, 0), stmt_location)
}

fn stmt_location(stmt: &Stmt) -> Location {
    match stmt {
        Stmt::ExprStmt(e) => e.location(),
        Stmt::ObjectDef { location, .. }
        | Stmt::Assign { location, .. }
        | Stmt::MultiAssign { location, .. }
        | Stmt::If { location, .. }
        | Stmt::While { location, .. }
        | Stmt::ForClassic { location, .. }
        | Stmt::ForEach { location, .. }
        | Stmt::Return { location, .. }
        | Stmt::Import { location, .. } => *location,
        Stmt::Break(l) | Stmt::Continue(l) => *l,
        Stmt::Block(stmts) => stmts.first().map_or_else(|| Location::new(ScriptId::default_for_empty(), 0), stmt_location),
    }
}

/// Conservative backward data-flow: every path through `body` reaches a
/// `return`. Only recognises the shapes the lowering itself produces
/// (`return`, `if/else` with both arms returning, a trailing block).
fn all_paths_return(body: &[Stmt]) -> bool {
    fn stmt_always_returns(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Return { .. } => true,
            Stmt::Block(stmts) => all_paths_return(stmts),
            Stmt::If { then_branch, else_branch: Some(else_branch), .. } => {
                stmt_always_returns(then_branch) && stmt_always_returns(else_branch)
            }
            _ => false,
        }
    }
    body.iter().any(stmt_always_returns)
}

struct Builder<'a> {
    definitions: &'a DefinitionTable,
    interner: &'a Interner,
    reporter: &'a Reporter,
    script: ScriptId,
    registers: Vec<Register>,
    /// Per-function memoisation of the local alias register for a global
    /// already referenced earlier in this same body.
    global_aliases: AHashMap<StringId, u32>,
    scopes: Vec<AHashMap<String, u32>>,
    loop_labels: Vec<(Label, Label)>,
    graph: IrGraph,
    at_global_scope: bool,
    return_types: Vec<VType>,
    return_registers: Vec<u32>,
}

impl<'a> Builder<'a> {
    fn new_register(&mut self, kind: RegisterKind, ty: VType, is_constant: bool, name: Option<StringId>) -> u32 {
        let index = u32::try_from(self.registers.len()).expect("function has too many registers");
        self.registers.push(Register { kind, ty, is_constant, name });
        index
    }

    fn declare_local(&mut self, name: String, index: u32) {
        self.scopes.last_mut().expect("scope stack never empty").insert(name, index);
    }

    fn resolve_local(&self, name: &str) -> Option<u32> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn push_scope(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn new_label(&mut self) -> Label {
        self.graph.new_label()
    }

    fn place_label(&mut self, label: Label, location: Location) {
        self.graph.place_label(label, location);
    }

    fn push(&mut self, body: UnitBody, location: Location) {
        self.graph.push(body, location);
    }

    fn error(&self, location: Location, message: impl Into<String>) {
        self.reporter.error(location, message);
    }

    /// Resolves `name` against a global definition, caching a local alias
    /// register for it within this function body.
    fn global_alias(&mut self, name: &str, location: Location) -> Option<(u32, VType)> {
        let id = self.definitions.resolve_name(name)?;
        self.definitions.with_definition(id, |definition| {
            let (ty, is_constant) = match definition {
                Definition::Global(global) => (global.ty.read().expect("global type lock poisoned").clone(), global.is_constant),
                Definition::Arg(arg) => (arg.ty.read().expect("arg type lock poisoned").clone(), false),
                _ => return None,
            };
            let string_id = self.interner.intern(name);
            if let Some(&existing) = self.global_aliases.get(&string_id) {
                return Some((existing, ty));
            }
            let index = self.new_register(RegisterKind::Global, ty.clone(), is_constant, Some(string_id));
            self.global_aliases.insert(string_id, index);
            let _ = location;
            Some((index, ty))
        })
    }

    fn resolve_type_expr(&self, ty: &TypeExpr) -> Option<VType> {
        resolve_type_expr(self.definitions, ty)
    }

    // ---- expressions ----

    fn lower_expr(&mut self, expr: &Expr, expected: Option<&VType>) -> Option<(Value, VType)> {
        match expr {
            Expr::IntLiteral(n, _) => Some((Value::Literal(Literal::Int(*n)), VType::Primitive(Primitive::Int))),
            Expr::BoolLiteral(b, _) => Some((Value::Literal(Literal::Bool(*b)), VType::Primitive(Primitive::Bool))),
            Expr::CodepointLiteral(c, _) => Some((Value::Literal(Literal::Int(i64::from(u32::from(*c)))), VType::Primitive(Primitive::Int))),
            Expr::NullLiteral(location) => match expected {
                Some(ty @ VType::Reference { .. }) => Some((Value::ZeroInit(ty.clone()), ty.clone())),
                _ => {
                    self.error(*location, "cannot infer the type of 'null' here; bind it to an explicitly-typed reference");
                    None
                }
            },
            Expr::StringLiteral(parts, location) => self.lower_string_literal(parts, *location),
            Expr::Identifier(name, location) => self.lower_identifier(name, *location),
            Expr::Unary { op, expr, location } => self.lower_unary(*op, expr, *location),
            Expr::Reference { expr, location } => self.lower_reference_of(expr, *location),
            Expr::Binary { op, lhs, rhs, location } => self.lower_binary(*op, lhs, rhs, *location),
            Expr::Call { callee, args, location } => self.lower_call(callee, args, *location).map(|(value, ty, _)| (value, ty)),
            Expr::Member { base, name, location } => self.lower_member(base, name, *location),
            Expr::Index { base, index, location } => self.lower_index(base, index, *location),
            Expr::Is { expr, ty, location } => self.lower_is(expr, ty, *location),
            Expr::ArrayLiteral { elements, location } => self.lower_array_literal(elements, expected, *location),
        }
    }

    fn lower_string_literal(&mut self, parts: &[StringPart], location: Location) -> Option<(Value, VType)> {
        if parts.iter().all(|p| matches!(p, StringPart::Text(_))) {
            let joined: String = parts
                .iter()
                .map(|p| match p {
                    StringPart::Text(t) => t.as_str(),
                    StringPart::Interp(_) => unreachable!(),
                })
                .collect();
            return Some((Value::Literal(Literal::String(joined)), VType::Primitive(Primitive::String)));
        }
        let mut pieces = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StringPart::Text(t) => pieces.push(Value::Literal(Literal::String(t.clone()))),
                StringPart::Interp(expr) => {
                    let (value, _) = self.lower_expr(expr, None).unwrap_or((Value::Literal(Literal::String(String::new())), VType::Primitive(Primitive::String)));
                    pieces.push(value);
                }
            }
        }
        let _ = location;
        Some((Value::StringComposition(pieces), VType::Primitive(Primitive::String)))
    }

    fn lower_identifier(&mut self, name: &str, location: Location) -> Option<(Value, VType)> {
        if let Some(index) = self.resolve_local(name) {
            let ty = self.registers[index as usize].ty.clone();
            return Some((Value::register(index), ty));
        }
        if let Some((index, ty)) = self.global_alias(name, location) {
            return Some((Value::register(index), ty));
        }
        if let Some(id) = self.definitions.resolve_name(name) {
            let resolved = self.definitions.with_definition(id, |definition| match definition {
                Definition::Struct(def) => Some(VType::Struct(def.clone())),
                Definition::Enum(def) => Some(VType::Enum(def.clone())),
                _ => None,
            });
            if let Some(ty) = resolved {
                return Some((Value::Literal(Literal::Type(ty.clone())), VType::Any));
            }
        }
        self.error(location, format!("'{name}' is not defined"));
        None
    }

    fn lower_unary(&mut self, op: UnaryOp, expr: &Expr, location: Location) -> Option<(Value, VType)> {
        let (value, ty) = self.lower_expr(expr, None)?;
        let negate = matches!(op, UnaryOp::Neg);
        let is_not = matches!(op, UnaryOp::Not);
        let Some(result_ty) = ty.result_of_sign_op(is_not) else {
            self.error(location, format!("cannot apply {} to '{}'", if negate { "-" } else { "!" }, ty.display_name()));
            return None;
        };
        if let Value::Literal(Literal::Int(n)) = value {
            if negate {
                return Some((Value::Literal(Literal::Int(-n)), result_ty));
            }
        }
        if let Value::Literal(Literal::Bool(b)) = value {
            if is_not {
                return Some((Value::Literal(Literal::Bool(!b)), result_ty));
            }
        }
        let dst = self.new_register(RegisterKind::Local, result_ty.clone(), false, None);
        self.push(UnitBody::SignOp { dst, src: value, negate }, location);
        Some((Value::register(dst), result_ty))
    }

    /// `&expr`: only meaningful for heap-backed values (whole
    /// String/Array/Struct objects) or an already-produced interior
    /// reference (`Child` result); scalar locals cannot be referenced since
    /// they have no heap identity to point at.
    fn lower_reference_of(&mut self, expr: &Expr, location: Location) -> Option<(Value, VType)> {
        let (value, ty) = self.lower_expr(expr, None)?;
        match &ty {
            VType::Reference { .. } => {
                // Already a reference-typed location (e.g. a Child result);
                // taking its address again just increments the take-ref count.
                let bumped = bump_reference_op(&value, 1);
                Some((bumped, VType::Reference { base: Box::new(ty), dims: 1 }))
            }
            VType::Primitive(Primitive::String) | VType::Array { .. } | VType::Struct(_) => {
                let bumped = bump_reference_op(&value, 1);
                Some((bumped, VType::Reference { base: Box::new(ty), dims: 1 }))
            }
            _ => {
                self.error(location, format!("cannot take a reference to a value of type '{}'", ty.display_name()));
                None
            }
        }
    }

    fn lower_binary(&mut self, op: BinaryOperator, lhs: &Expr, rhs: &Expr, location: Location) -> Option<(Value, VType)> {
        let (lhs_value, lhs_ty) = self.lower_expr(lhs, None)?;
        let (rhs_value, rhs_ty) = self.lower_expr(rhs, Some(&lhs_ty))?;

        if matches!(op, BinaryOperator::Div | BinaryOperator::Mod) {
            if let Value::Literal(Literal::Int(0)) = rhs_value {
                self.error(location, "division by zero");
                return None;
            }
        }

        let Some(result_ty) = lhs_ty.result_of_binary_op(&rhs_ty, op) else {
            self.error(location, format!("operator not supported between '{}' and '{}'", lhs_ty.display_name(), rhs_ty.display_name()));
            return None;
        };

        if let (Value::Literal(l), Value::Literal(r)) = (&lhs_value, &rhs_value) {
            if let Some(folded) = fold_binary(l, r, op) {
                return Some((Value::Literal(folded), result_ty));
            }
        }

        let dst = self.new_register(RegisterKind::Local, result_ty.clone(), false, None);
        self.push(UnitBody::BinaryOp { dst, lhs: lhs_value, rhs: rhs_value, op }, location);
        Some((Value::register(dst), result_ty))
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr], location: Location) -> Option<(Value, VType, Vec<VType>)> {
        let Expr::Identifier(name, _) = callee else {
            self.error(location, "only a plain function name may be called");
            return None;
        };
        let Some(id) = self.definitions.resolve_name(name) else {
            self.error(location, format!("'{name}' is not defined"));
            return None;
        };
        let signature = self.definitions.with_definition(id, |definition| match definition {
            Definition::Function(func) => Some((func.params(), func.returns())),
            _ => None,
        });
        let Some((params, returns)) = signature else {
            self.error(location, format!("'{name}' is not a function"));
            return None;
        };
        if args.len() != params.len() {
            self.error(location, format!("'{name}' expects {} argument(s), found {}", params.len(), args.len()));
            return None;
        }
        let mut lowered_args = Vec::with_capacity(args.len());
        for (arg, (_, param_ty)) in args.iter().zip(params.iter()) {
            let (value, ty) = self.lower_expr(arg, Some(param_ty))?;
            let Some(coerced) = self.coerce(value, &ty, param_ty, arg.location()) else { return None };
            lowered_args.push(coerced);
        }
        let return_types: Vec<VType> = returns.iter().map(|(_, ty)| ty.clone()).collect();
        let first_dst = if return_types.is_empty() {
            0
        } else {
            let mut first = None;
            for ty in &return_types {
                let index = self.new_register(RegisterKind::Local, ty.clone(), false, None);
                if first.is_none() {
                    first = Some(index);
                }
            }
            first.unwrap_or(0)
        };
        self.push(UnitBody::FunctionCall { first_dst, function: id, params: lowered_args }, location);
        let value = match return_types.len() {
            0 => Value::None,
            1 => Value::register(first_dst),
            n => Value::MultipleReturn((0..n as u32).map(|i| Value::register(first_dst + i)).collect()),
        };
        let overall_ty = return_types.first().cloned().unwrap_or(VType::Void);
        Some((value, overall_ty, return_types))
    }

    fn lower_member(&mut self, base: &Expr, name: &str, location: Location) -> Option<(Value, VType)> {
        let (base_value, base_ty) = self.lower_expr(base, None)?;
        if let Value::Literal(Literal::Type(VType::Enum(def))) = &base_value {
            let Some(index) = def.index_of_name(name) else {
                self.error(location, format!("'{name}' is not a variant of '{}'", def.name));
                return None;
            };
            let ty = VType::Enum(def.clone());
            return Some((Value::Literal(Literal::Enum(ty.clone(), index)), ty));
        }
        if let VType::Struct(def) = &base_ty {
            if let Some(index) = def.member_index(self.interner.intern(name)) {
                let member_ty = def.member_ty_at(index).unwrap_or(VType::Nil);
                let result_ty = VType::Reference { base: Box::new(member_ty.clone()), dims: 1 };
                let dst = self.new_register(RegisterKind::Local, result_ty.clone(), false, None);
                self.push(
                    UnitBody::Child { dst, src: base_value, index: Value::Literal(Literal::Int(index as i64)), is_member: true },
                    location,
                );
                return Some((Value::register(dst), result_ty));
            }
        }
        if let Some((prop_index, prop_ty)) = base_ty.property(name) {
            let dst = self.new_register(RegisterKind::Local, prop_ty.clone(), false, None);
            self.push(
                UnitBody::Child { dst, src: base_value, index: Value::Literal(Literal::Int(prop_index as i64)), is_member: false },
                location,
            );
            return Some((Value::register(dst), prop_ty));
        }
        self.error(location, format!("'{}' has no member or property named '{name}'", base_ty.display_name()));
        None
    }

    fn lower_index(&mut self, base: &Expr, index: &Expr, location: Location) -> Option<(Value, VType)> {
        let (base_value, base_ty) = self.lower_expr(base, None)?;
        let VType::Array { .. } = &base_ty else {
            self.error(location, format!("cannot index a value of type '{}'", base_ty.display_name()));
            return None;
        };
        let element_ty = base_ty.child_at(0, true)?;
        let (index_value, index_ty) = self.lower_expr(index, Some(&VType::Primitive(Primitive::Int)))?;
        if !matches!(index_ty, VType::Primitive(Primitive::Int)) {
            self.error(location, "array index must be an Int");
            return None;
        }
        let result_ty = VType::Reference { base: Box::new(element_ty), dims: 1 };
        let dst = self.new_register(RegisterKind::Local, result_ty.clone(), false, None);
        self.push(UnitBody::Child { dst, src: base_value, index: index_value, is_member: true }, location);
        Some((Value::register(dst), result_ty))
    }

    fn lower_is(&mut self, expr: &Expr, ty: &TypeExpr, location: Location) -> Option<(Value, VType)> {
        let (_, actual_ty) = self.lower_expr(expr, None)?;
        let Some(target_ty) = self.resolve_type_expr(ty) else {
            self.error(location, "unknown type in 'is' expression");
            return None;
        };
        Some((Value::Literal(Literal::Bool(actual_ty == target_ty)), VType::Primitive(Primitive::Bool)))
    }

    fn lower_array_literal(&mut self, elements: &[Expr], expected: Option<&VType>, location: Location) -> Option<(Value, VType)> {
        let hint_element = match expected {
            Some(VType::Array { element, .. }) => Some((**element).clone()),
            _ => None,
        };
        if elements.is_empty() {
            let Some(element_ty) = hint_element else {
                self.error(location, "empty array literal needs an explicit expected type (Any[] is not supported)");
                return None;
            };
            return Some((Value::Array { elements: Vec::new(), element_ty: element_ty.clone() }, VType::Array { element: Box::new(element_ty), dims: 1 }));
        }
        let mut lowered = Vec::with_capacity(elements.len());
        let mut element_ty: Option<VType> = hint_element;
        for element in elements {
            let (value, ty) = self.lower_expr(element, element_ty.as_ref())?;
            match &element_ty {
                None => element_ty = Some(ty),
                Some(expected_ty) if *expected_ty != ty => {
                    self.error(element.location(), format!("array element type mismatch: expected '{}', found '{}'", expected_ty.display_name(), ty.display_name()));
                    return None;
                }
                Some(_) => {}
            }
            lowered.push(value);
        }
        let element_ty = element_ty.expect("checked non-empty above");
        Some((Value::Array { elements: lowered, element_ty: element_ty.clone() }, VType::Array { element: Box::new(element_ty), dims: 1 }))
    }

    /// Inserts the implicit reference/dereference conversion of §4.5 when
    /// `from` and `to` differ only by one level of `&`.
    fn coerce(&self, value: Value, from: &VType, to: &VType, location: Location) -> Option<Value> {
        if from == to {
            return Some(value);
        }
        if let VType::Reference { base, dims: 1 } = to {
            if base.as_ref() == from {
                return Some(bump_reference_op(&value, 1));
            }
        }
        if let VType::Reference { base, dims: 1 } = from {
            if base.as_ref() == to {
                return Some(bump_reference_op(&value, -1));
            }
        }
        if matches!(to, VType::Any) {
            return Some(value);
        }
        self.error(location, format!("type mismatch: expected '{}', found '{}'", to.display_name(), from.display_name()));
        None
    }

    // ---- lvalues ----

    /// Resolves `expr` as an assignment target: `(register, value_type,
    /// writes_through_reference)`. Member/index targets lower to a fresh
    /// `&T`-typed register holding a `Child`-produced interior reference;
    /// `Copy`'s dispatch writes through such a register instead of
    /// overwriting its own slot (see module docs).
    fn lower_lvalue(&mut self, expr: &Expr) -> Option<(u32, VType, bool)> {
        match expr {
            Expr::Identifier(name, location) => {
                if let Some(index) = self.resolve_local(name) {
                    let register = &self.registers[index as usize];
                    if register.is_constant {
                        self.error(*location, format!("cannot assign to constant '{name}'"));
                        return None;
                    }
                    return Some((index, register.ty.clone(), false));
                }
                if let Some((index, ty)) = self.global_alias(name, *location) {
                    if self.registers[index as usize].is_constant {
                        self.error(*location, format!("cannot assign to constant '{name}'"));
                        return None;
                    }
                    return Some((index, ty, false));
                }
                self.error(*location, format!("'{name}' is not defined"));
                None
            }
            Expr::Member { .. } | Expr::Index { .. } => {
                let (value, ty) = self.lower_expr(expr, None)?;
                let Value::Register { index, .. } = value else {
                    self.error(expr.location(), "expression is not assignable");
                    return None;
                };
                let VType::Reference { base, .. } = ty else {
                    self.error(expr.location(), "expression is not assignable");
                    return None;
                };
                Some((index, (*base).clone(), true))
            }
            _ => {
                self.error(expr.location(), "expression is not assignable");
                None
            }
        }
    }

    fn emit_assign(&mut self, dst: u32, writes_through: bool, src: Value, location: Location) {
        self.push(UnitBody::Copy { dst, src, through_reference: writes_through }, location);
    }

    // ---- statements ----

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::ExprStmt(expr) => self.lower_expr_stmt(expr),
            Stmt::ObjectDef { names, ty, init, location } => self.lower_object_def(names, ty.as_ref(), init.as_ref(), *location),
            Stmt::Assign { target, op, value, location } => self.lower_assign(target, *op, value, *location),
            Stmt::MultiAssign { targets, value, location, .. } => self.lower_multi_assign(targets, value, *location),
            Stmt::If { cond, then_branch, else_branch, location } => self.lower_if(cond, then_branch, else_branch.as_deref(), *location),
            Stmt::While { cond, body, location } => self.lower_while(cond, body, *location),
            Stmt::ForClassic { init, cond, update, body, location } => self.lower_for_classic(init.as_deref(), cond.as_ref(), update.as_deref(), body, *location),
            Stmt::ForEach { elem, index, iter, body, location } => self.lower_for_each(elem, index.as_deref(), iter, body, *location),
            Stmt::Return { values, location } => self.lower_return(values, *location),
            Stmt::Break(location) => self.lower_break_continue(*location, true),
            Stmt::Continue(location) => self.lower_break_continue(*location, false),
            Stmt::Block(stmts) => {
                self.push_scope();
                for stmt in stmts {
                    self.lower_stmt(stmt);
                }
                self.pop_scope();
            }
            Stmt::Import { .. } => {}
        }
    }

    fn lower_expr_stmt(&mut self, expr: &Expr) {
        if let Expr::Call { callee, args, location } = expr {
            if let Some((value, _, return_types)) = self.lower_call(callee, args, *location) {
                self.auto_eval_unbound(&value, &return_types, 0, *location);
            }
            return;
        }
        let _ = self.lower_expr(expr, None);
    }

    /// Inserts `ResultEval` for every trailing `Result`-typed return slot at
    /// or past `bound_count` that the caller left unbound, per §4.5/§7.3.
    fn auto_eval_unbound(&mut self, value: &Value, return_types: &[VType], bound_count: usize, location: Location) {
        let registers: Vec<u32> = match value {
            Value::None => Vec::new(),
            Value::Register { index, .. } => vec![*index],
            Value::MultipleReturn(values) => values
                .iter()
                .filter_map(|v| if let Value::Register { index, .. } = v { Some(*index) } else { None })
                .collect(),
            _ => Vec::new(),
        };
        for (i, ty) in return_types.iter().enumerate() {
            if i < bound_count {
                continue;
            }
            if is_result_type(ty) {
                if let Some(&register) = registers.get(i) {
                    self.push(UnitBody::ResultEval { src: Value::register(register) }, location);
                }
            }
        }
    }

    fn lower_object_def(&mut self, names: &[String], ty: Option<&TypeExpr>, init: Option<&ObjectInit>, location: Location) {
        let is_constant = matches!(init, Some(ObjectInit::Constant(_)));
        let init_expr = match init {
            Some(ObjectInit::Value(e) | ObjectInit::Constant(e)) => Some(e),
            None => None,
        };

        if names.len() > 1 {
            self.lower_multi_declare(names, init_expr, location);
            return;
        }

        let name = &names[0];
        let declared_ty = ty.and_then(|t| self.resolve_type_expr(t));
        let Some(init_expr) = init_expr else {
            let Some(declared_ty) = declared_ty else {
                self.error(location, format!("'{name}' needs either a type or an initializer"));
                return;
            };
            let index = self.allocate_declared(name, declared_ty.clone(), is_constant, location);
            let Some(index) = index else { return };
            self.push(UnitBody::Copy { dst: index, src: Value::ZeroInit(declared_ty), through_reference: false }, location);
            return;
        };

        if let Expr::Call { callee, args, location: call_location } = init_expr {
            if let Some((value, first_ty, return_types)) = self.lower_call(callee, args, *call_location) {
                let target_ty = declared_ty.unwrap_or(first_ty);
                let Some(index) = self.allocate_declared(name, target_ty, is_constant, location) else { return };
                if let Value::Register { index: src_index, .. } = value {
                    self.push(UnitBody::Copy { dst: index, src: Value::register(src_index), through_reference: false }, location);
                }
                self.auto_eval_unbound(&value, &return_types, 1, location);
            }
            return;
        }

        let (value, value_ty) = match self.lower_expr(init_expr, declared_ty.as_ref()) {
            Some(result) => result,
            None => return,
        };
        let target_ty = declared_ty.unwrap_or_else(|| value_ty.clone());
        let Some(coerced) = self.coerce(value, &value_ty, &target_ty, location) else { return };
        let Some(index) = self.allocate_declared(name, target_ty, is_constant, location) else { return };
        self.push(UnitBody::Copy { dst: index, src: coerced, through_reference: false }, location);
    }

    fn lower_multi_declare(&mut self, names: &[String], init_expr: Option<&Expr>, location: Location) {
        let Some(Expr::Call { callee, args, location: call_location }) = init_expr else {
            self.error(location, "multiple names must be bound from a multi-return function call");
            return;
        };
        let Some((value, _, return_types)) = self.lower_call(callee, args, *call_location) else { return };
        let Value::MultipleReturn(values) = value.clone() else {
            self.error(*call_location, "function does not return multiple values");
            return;
        };
        for (name, (bound_value, ty)) in names.iter().zip(values.iter().zip(return_types.iter())) {
            let index = self.new_register(RegisterKind::Local, ty.clone(), false, None);
            self.declare_local(name.clone(), index);
            self.push(UnitBody::Copy { dst: index, src: bound_value.clone(), through_reference: false }, location);
        }
        self.auto_eval_unbound(&value, &return_types, names.len(), location);
    }

    fn allocate_declared(&mut self, name: &str, ty: VType, is_constant: bool, location: Location) -> Option<u32> {
        if self.at_global_scope {
            let Some((index, _)) = self.global_alias(name, location) else {
                self.error(location, format!("'{name}' has no matching global declaration"));
                return None;
            };
            return Some(index);
        }
        if self.scopes.last().expect("scope stack never empty").contains_key(name) {
            self.error(location, format!("'{name}' is already defined in this scope"));
            return None;
        }
        let string_id = self.interner.intern(name);
        let index = self.new_register(RegisterKind::Local, ty, is_constant, Some(string_id));
        self.declare_local(name.to_string(), index);
        Some(index)
    }

    fn lower_assign(&mut self, target: &Expr, op: Option<BinaryOperator>, value: &Expr, location: Location) {
        let Some((dst, target_ty, writes_through)) = self.lower_lvalue(target) else { return };
        let rhs_expected = if op.is_some() { None } else { Some(target_ty.clone()) };
        let Some((rhs_value, rhs_ty)) = self.lower_expr(value, rhs_expected.as_ref()) else { return };

        let to_store = if let Some(op) = op {
            let current = if writes_through { Value::Register { index: dst, reference_op: -1 } } else { Value::register(dst) };
            let Some(result_ty) = target_ty.result_of_binary_op(&rhs_ty, op) else {
                self.error(location, format!("operator not supported between '{}' and '{}'", target_ty.display_name(), rhs_ty.display_name()));
                return;
            };
            let tmp = self.new_register(RegisterKind::Local, result_ty, false, None);
            self.push(UnitBody::BinaryOp { dst: tmp, lhs: current, rhs: rhs_value, op }, location);
            Value::register(tmp)
        } else {
            let Some(coerced) = self.coerce(rhs_value, &rhs_ty, &target_ty, location) else { return };
            coerced
        };

        self.emit_assign(dst, writes_through, to_store, location);
    }

    fn lower_multi_assign(&mut self, targets: &[Expr], value: &Expr, location: Location) {
        let Expr::Call { callee, args, location: call_location } = value else {
            self.error(location, "multi-assignment requires a multi-return function call");
            return;
        };
        let Some((call_value, _, return_types)) = self.lower_call(callee, args, *call_location) else { return };
        let Value::MultipleReturn(values) = call_value.clone() else {
            self.error(*call_location, "function does not return multiple values");
            return;
        };
        for (target, source) in targets.iter().zip(values.iter()) {
            let Some((dst, _, writes_through)) = self.lower_lvalue(target) else { continue };
            self.emit_assign(dst, writes_through, source.clone(), location);
        }
        self.auto_eval_unbound(&call_value, &return_types, targets.len(), location);
    }

    fn lower_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>, location: Location) {
        let Some((cond_value, cond_ty)) = self.lower_expr(cond, Some(&VType::Primitive(Primitive::Bool))) else { return };
        if !cond_ty.is_bool() {
            self.error(location, "condition must be a Bool");
            return;
        }
        if let Value::Literal(Literal::Bool(constant)) = cond_value {
            if constant {
                self.lower_stmt(then_branch);
            } else if let Some(else_branch) = else_branch {
                self.lower_stmt(else_branch);
            }
            return;
        }
        let else_label = self.new_label();
        self.push(UnitBody::Jump { condition: JumpCondition::IfFalse, src: cond_value, target: JumpTarget::Label(else_label) }, location);
        self.lower_stmt(then_branch);
        if let Some(else_branch) = else_branch {
            let end_label = self.new_label();
            self.push(UnitBody::Jump { condition: JumpCondition::Always, src: Value::None, target: JumpTarget::Label(end_label) }, location);
            self.place_label(else_label, location);
            self.lower_stmt(else_branch);
            self.place_label(end_label, location);
        } else {
            self.place_label(else_label, location);
        }
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt, location: Location) {
        if let Some((Value::Literal(Literal::Bool(false)), _)) = self.lower_expr(cond, Some(&VType::Primitive(Primitive::Bool))) {
            return;
        }
        let start_label = self.new_label();
        let end_label = self.new_label();
        self.place_label(start_label, location);
        let Some((cond_value, _)) = self.lower_expr(cond, Some(&VType::Primitive(Primitive::Bool))) else { return };
        self.push(UnitBody::Jump { condition: JumpCondition::IfFalse, src: cond_value, target: JumpTarget::Label(end_label) }, location);
        self.loop_labels.push((start_label, end_label));
        self.lower_stmt(body);
        self.loop_labels.pop();
        self.push(UnitBody::Jump { condition: JumpCondition::Always, src: Value::None, target: JumpTarget::Label(start_label) }, location);
        self.place_label(end_label, location);
    }

    fn lower_for_classic(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, update: Option<&Stmt>, body: &Stmt, location: Location) {
        self.push_scope();
        if let Some(init) = init {
            self.lower_stmt(init);
        }
        let start_label = self.new_label();
        let continue_label = self.new_label();
        let end_label = self.new_label();
        self.place_label(start_label, location);
        if let Some(cond) = cond {
            let Some((cond_value, _)) = self.lower_expr(cond, Some(&VType::Primitive(Primitive::Bool))) else {
                self.pop_scope();
                return;
            };
            self.push(UnitBody::Jump { condition: JumpCondition::IfFalse, src: cond_value, target: JumpTarget::Label(end_label) }, location);
        }
        self.loop_labels.push((continue_label, end_label));
        self.lower_stmt(body);
        self.loop_labels.pop();
        self.place_label(continue_label, location);
        if let Some(update) = update {
            self.lower_stmt(update);
        }
        self.push(UnitBody::Jump { condition: JumpCondition::Always, src: Value::None, target: JumpTarget::Label(start_label) }, location);
        self.place_label(end_label, location);
        self.pop_scope();
    }

    fn lower_for_each(&mut self, elem: &str, index: Option<&str>, iter: &Expr, body: &Stmt, location: Location) {
        let Some((iter_value, iter_ty)) = self.lower_expr(iter, None) else { return };
        let VType::Array { .. } = &iter_ty else {
            self.error(location, "'for (elem : expr)' requires an array");
            return;
        };
        let Some(element_ty) = iter_ty.child_at(0, true) else { return };

        self.push_scope();
        let Value::Register { index: iter_reg, .. } = iter_value else {
            self.error(location, "array must be stored before iterating");
            self.pop_scope();
            return;
        };
        let idx_reg = self.new_register(RegisterKind::Local, VType::Primitive(Primitive::Int), false, None);
        self.push(UnitBody::Copy { dst: idx_reg, src: Value::Literal(Literal::Int(0)), through_reference: false }, location);
        self.declare_local(index.unwrap_or("__index").to_string(), idx_reg);

        let elem_reg = self.new_register(RegisterKind::Local, element_ty.clone(), false, None);
        self.declare_local(elem.to_string(), elem_reg);

        let start_label = self.new_label();
        let end_label = self.new_label();
        self.place_label(start_label, location);

        let count_reg = self.new_register(RegisterKind::Local, VType::Primitive(Primitive::Int), false, None);
        self.push(
            UnitBody::Child { dst: count_reg, src: Value::register(iter_reg), index: Value::Literal(Literal::Int(0)), is_member: false },
            location,
        );
        let cond_reg = self.new_register(RegisterKind::Local, VType::Primitive(Primitive::Bool), false, None);
        self.push(
            UnitBody::BinaryOp { dst: cond_reg, lhs: Value::register(idx_reg), rhs: Value::register(count_reg), op: BinaryOperator::Lt },
            location,
        );
        self.push(UnitBody::Jump { condition: JumpCondition::IfFalse, src: Value::register(cond_reg), target: JumpTarget::Label(end_label) }, location);

        let item_ref = self.new_register(RegisterKind::Local, VType::Reference { base: Box::new(element_ty), dims: 1 }, false, None);
        self.push(
            UnitBody::Child { dst: item_ref, src: Value::register(iter_reg), index: Value::register(idx_reg), is_member: true },
            location,
        );
        self.push(UnitBody::Copy { dst: elem_reg, src: Value::Register { index: item_ref, reference_op: -1 }, through_reference: false }, location);

        let continue_label = self.new_label();
        self.loop_labels.push((continue_label, end_label));
        self.lower_stmt(body);
        self.loop_labels.pop();
        self.place_label(continue_label, location);

        self.push(
            UnitBody::BinaryOp { dst: idx_reg, lhs: Value::register(idx_reg), rhs: Value::Literal(Literal::Int(1)), op: BinaryOperator::Add },
            location,
        );
        self.push(UnitBody::Jump { condition: JumpCondition::Always, src: Value::None, target: JumpTarget::Label(start_label) }, location);
        self.place_label(end_label, location);
        self.pop_scope();
    }

    fn lower_return(&mut self, values: &[Expr], location: Location) {
        if values.len() != self.return_registers.len() && !(values.is_empty() && self.return_registers.is_empty()) {
            self.error(location, format!("expected {} return value(s), found {}", self.return_registers.len(), values.len()));
        }
        let return_registers = self.return_registers.clone();
        let return_types = self.return_types.clone();
        for (value_expr, (&dst, ty)) in values.iter().zip(return_registers.iter().zip(return_types.iter())) {
            let Some((value, value_ty)) = self.lower_expr(value_expr, Some(ty)) else { continue };
            let Some(coerced) = self.coerce(value, &value_ty, ty, location) else { continue };
            self.push(UnitBody::Copy { dst, src: coerced, through_reference: false }, location);
        }
        self.push(UnitBody::Return, location);
    }

    fn lower_break_continue(&mut self, location: Location, is_break: bool) {
        let Some(&(continue_label, break_label)) = self.loop_labels.last() else {
            self.error(location, format!("'{}' outside of a loop", if is_break { "break" } else { "continue" }));
            return;
        };
        let target = if is_break { break_label } else { continue_label };
        self.push(UnitBody::Jump { condition: JumpCondition::Always, src: Value::None, target: JumpTarget::Label(target) }, location);
    }
}

fn is_result_type(ty: &VType) -> bool {
    matches!(ty, VType::Struct(def) if def.name == "Result")
}

fn bump_reference_op(value: &Value, delta: i32) -> Value {
    match value {
        Value::Register { index, reference_op } => Value::Register { index: *index, reference_op: reference_op + delta },
        Value::LValue { index, reference_op } => Value::LValue { index: *index, reference_op: reference_op + delta },
        other => other.clone(),
    }
}

fn fold_binary(lhs: &Literal, rhs: &Literal, op: BinaryOperator) -> Option<Literal> {
    use BinaryOperator as Op;
    match (lhs, rhs) {
        (Literal::Int(a), Literal::Int(b)) => match op {
            Op::Add => Some(Literal::Int(a.wrapping_add(*b))),
            Op::Sub => Some(Literal::Int(a.wrapping_sub(*b))),
            Op::Mul => Some(Literal::Int(a.wrapping_mul(*b))),
            Op::Div if *b != 0 => Some(Literal::Int(a / b)),
            Op::Mod if *b != 0 => Some(Literal::Int(a % b)),
            Op::Eq => Some(Literal::Bool(a == b)),
            Op::NotEq => Some(Literal::Bool(a != b)),
            Op::Lt => Some(Literal::Bool(a < b)),
            Op::Gt => Some(Literal::Bool(a > b)),
            Op::Le => Some(Literal::Bool(a <= b)),
            Op::Ge => Some(Literal::Bool(a >= b)),
            _ => None,
        },
        (Literal::Bool(a), Literal::Bool(b)) => match op {
            Op::And => Some(Literal::Bool(*a && *b)),
            Op::Or => Some(Literal::Bool(*a || *b)),
            Op::Eq => Some(Literal::Bool(a == b)),
            Op::NotEq => Some(Literal::Bool(a != b)),
            _ => None,
        },
        (Literal::String(a), Literal::String(b)) => match op {
            Op::Add => Some(Literal::String(format!("{a}{b}"))),
            Op::Div => Some(Literal::String(format!("{}/{}", a.trim_end_matches('/'), b.trim_start_matches('/')))),
            Op::Eq => Some(Literal::Bool(a == b)),
            Op::NotEq => Some(Literal::Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn folds_constant_arithmetic() {
        assert!(matches!(fold_binary(&Literal::Int(2), &Literal::Int(3), BinaryOperator::Add), Some(Literal::Int(5))));
    }

    #[test]
    fn builds_trivial_function_body() {
        let definitions = DefinitionTable::new();
        let interner = Interner::new();
        let reporter = Reporter::new();
        let body = vec![Stmt::Return { values: Vec::new(), location: Location::new(ScriptId::default_for_empty(), 0) }];
        let signature = Signature { params: &[], returns: &[] };
        let ir = build_ir(&definitions, &interner, &reporter, ScriptId::default_for_empty(), PathBuf::from("<test>"), &signature, &body, false, "main");
        assert_eq!(ir.instructions.len(), 1);
        assert!(!reporter.has_errors());
    }
}
