//! The linear, register-based three-address intermediate representation.
//!
//! Construction happens in two stages, per the design notes: the
//! [`semantic`](crate::semantic) module builds a linked graph of [`IrUnit`]
//! nodes with symbolic jump targets (so branches can be spliced in before
//! their destination is known), and [`link`] flattens that graph into the
//! compact [`Ir`] instruction array that the runtime executes by program
//! counter.

use crate::diagnostics::Location;
use crate::intern::StringId;
use crate::lexer::BinaryOperator;
use crate::types::VType;

/// The storage class of a [`Register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    Local,
    Parameter,
    Return,
    Global,
}

/// One slot in an [`Ir`]'s register file, or in the runtime's global file.
#[derive(Debug, Clone)]
pub struct Register {
    pub kind: RegisterKind,
    pub ty: VType,
    pub is_constant: bool,
    pub name: Option<StringId>,
}

/// A signed count of take-reference (positive) / dereference (negative)
/// applied when a [`Value`] is materialised into a runtime `Reference`.
pub type ReferenceOp = i32;

/// A compile-time literal scalar.
#[derive(Debug, Clone)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    String(String),
    Type(VType),
    /// An enum variant, identified by its index within the enum's variant list.
    Enum(VType, usize),
}

/// An IR operand.
///
/// Values compose: a `StringComposition` may itself hold `Register` values
/// referring to the results of earlier units in the same group, and an
/// `Array` literal holds a `Value` per element.
#[derive(Debug, Clone)]
pub enum Value {
    /// No operand (e.g. a bare `return;`).
    None,
    Literal(Literal),
    /// A default-constructed value of `ty` (all-zero bytes, empty string/array).
    ZeroInit(VType),
    Array { elements: Vec<Value>, element_ty: VType },
    /// A run of literal text and register operands to be concatenated into
    /// one string at runtime (lowering of string interpolation).
    StringComposition(Vec<Value>),
    /// The bundle of return values produced by a multi-return function call.
    MultipleReturn(Vec<Value>),
    /// The current contents of a register, by value.
    Register { index: u32, reference_op: ReferenceOp },
    /// The register as an assignable location (used as a `Copy`/`Store` destination operand).
    LValue { index: u32, reference_op: ReferenceOp },
}

impl Value {
    #[must_use]
    pub fn register(index: u32) -> Self {
        Self::Register { index, reference_op: 0 }
    }

    #[must_use]
    pub fn lvalue(index: u32) -> Self {
        Self::LValue { index, reference_op: 0 }
    }
}

/// Condition under which a [`UnitBody::Jump`] is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCondition {
    /// Jump if `src` is falsy.
    IfFalse,
    /// Unconditional.
    Always,
    /// Jump if `src` is truthy.
    IfTrue,
}

impl JumpCondition {
    #[must_use]
    pub fn as_signed(self) -> i32 {
        match self {
            Self::IfFalse => -1,
            Self::Always => 0,
            Self::IfTrue => 1,
        }
    }
}

/// A symbolic jump destination, resolved to a relative offset by [`link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// A jump's destination: symbolic before [`link`], a PC-relative offset after.
#[derive(Debug, Clone, Copy)]
pub enum JumpTarget {
    Label(Label),
    /// Relative to the instruction following the jump, per the linker's contract.
    Offset(i32),
}

/// The body of a single [`IrUnit`] / linked instruction.
#[derive(Debug, Clone)]
pub enum UnitBody {
    /// Anchor with no effect; used as a splice point during graph
    /// construction and dropped by the linker.
    Empty,
    /// Value-level semantic copy into `dst` (deep-copies strings/arrays/structs).
    ///
    /// `through_reference` distinguishes the two shapes that both target a
    /// `Reference`-typed register: `false` installs `src` into `dst` itself
    /// (a plain local, or a reference-variable rebind, since a heap `Copy` of
    /// a `Reference` retains and aliases rather than deep-copying the
    /// referent); `true` reads the `Reference` currently held in `dst` and
    /// writes `src` into the location it denotes (lowering of `p.x = 3;` /
    /// `arr[i] = v;`), leaving `dst`'s own contents untouched.
    Copy { dst: u32, src: Value, through_reference: bool },
    /// Rebinds `dst` to hold the object the source value's reference targets.
    Store { dst: u32, src: Value },
    /// Calls `function` (by definition id), writing results starting at
    /// `first_dst` (one consecutive register per return value).
    FunctionCall { first_dst: u32, function: crate::definitions::DefinitionId, params: Vec<Value> },
    Return,
    Jump { condition: JumpCondition, src: Value, target: JumpTarget },
    BinaryOp { dst: u32, lhs: Value, rhs: Value, op: BinaryOperator },
    SignOp { dst: u32, src: Value, negate: bool },
    /// Element/field/property access. `is_member` distinguishes struct
    /// field/array element (interior reference into the same object) from a
    /// property (`.size`/`.count`/enum `.index`/`.value`/`.name`, which
    /// allocates a fresh object).
    Child { dst: u32, src: Value, index: Value, is_member: bool },
    /// Aborts execution if `src`'s `Result.failed` field is true.
    ResultEval { src: Value },
    /// A jump target with no other effect; `link` resolves [`Label`]s to the
    /// instruction index following this marker.
    Label(Label),
}

/// A single node in the pre-link instruction graph.
#[derive(Debug, Clone)]
pub struct IrUnit {
    pub body: UnitBody,
    pub location: Location,
}

/// A linked instruction: `body` with jump targets already resolved to
/// relative offsets, from [`UnitBody::Jump`] by [`link`].
#[derive(Debug, Clone)]
pub struct Instruction {
    pub body: UnitBody,
    pub location: Location,
}

/// A linear, register-based three-address program for one function or
/// global-initialisation block.
#[derive(Debug, Clone, Default)]
pub struct Ir {
    pub parameter_count: u32,
    pub local_registers: Vec<Register>,
    pub instructions: Vec<Instruction>,
    /// Describes the shape of `return` statements this body contains, used
    /// by the runtime to size the caller's destination register window.
    pub return_count: u32,
    pub source_path: std::path::PathBuf,
}

impl Ir {
    #[must_use]
    pub fn register(&self, index: u32) -> &Register {
        &self.local_registers[index as usize]
    }
}

/// Builder for the pre-link graph of one function/global body.
///
/// Labels are allocated monotonically and spliced in as [`UnitBody::Label`]
/// markers; `link` walks the unit list once, dropping `Empty` anchors and
/// rewriting every `Jump`'s `target` into a relative offset from the
/// instruction *following* the jump, per the linker's contract.
#[derive(Default)]
pub struct IrGraph {
    pub units: Vec<IrUnit>,
    next_label: u32,
}

impl IrGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, body: UnitBody, location: Location) {
        self.units.push(IrUnit { body, location });
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn place_label(&mut self, label: Label, location: Location) {
        self.push(UnitBody::Label(label), location);
    }
}

/// Flattens `graph` into the compact instruction array the runtime executes,
/// dropping `Empty`/`Label` marker units and resolving every jump's symbolic
/// target to a signed offset relative to the instruction after the jump.
#[must_use]
pub fn link(graph: IrGraph) -> Vec<Instruction> {
    // First pass: compute the linked index each label resolves to, by
    // counting how many non-marker units precede it.
    let mut label_index = ahash::AHashMap::new();
    let mut linked_count = 0u32;
    for unit in &graph.units {
        match &unit.body {
            UnitBody::Label(label) => {
                label_index.insert(*label, linked_count);
            }
            UnitBody::Empty => {}
            _ => linked_count += 1,
        }
    }

    let mut out = Vec::with_capacity(linked_count as usize);
    for unit in graph.units {
        match unit.body {
            UnitBody::Empty | UnitBody::Label(_) => {}
            UnitBody::Jump { condition, src, target } => {
                let JumpTarget::Label(label) = target else {
                    panic!("jump target already resolved before link")
                };
                let target_index = *label_index.get(&label).expect("unresolved jump label");
                // `out.len()` is the index of the jump itself; after it is
                // fetched the PC is advanced past it, so the offset is
                // relative to `out.len() + 1`.
                let offset = i32::try_from(target_index).expect("program too large")
                    - i32::try_from(out.len() + 1).expect("program too large");
                out.push(Instruction { body: UnitBody::Jump { condition, src, target: JumpTarget::Offset(offset) }, location: unit.location });
            }
            other => out.push(Instruction { body: other, location: unit.location }),
        }
    }
    out
}

/// Reads a linked jump's resolved relative offset (valid only after [`link`]
/// has run; before that, `target` holds a label id, not an offset).
#[must_use]
pub fn linked_jump_offset(target: &JumpTarget) -> i32 {
    match target {
        JumpTarget::Offset(offset) => *offset,
        JumpTarget::Label(_) => panic!("jump target not yet linked"),
    }
}
