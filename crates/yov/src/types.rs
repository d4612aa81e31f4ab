//! The type system: the universe of value types and the fixed property
//! tables exposed on them.

use std::sync::{Arc, RwLock};

use crate::intern::StringId;
use crate::lexer::BinaryOperator;

/// The three primitive scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Int,
    Bool,
    String,
}

/// The universe of value types.
///
/// Equality is structural: two `VType`s are equal when their shapes match,
/// not merely when they share a base index (`Struct`/`Enum` compare by the
/// identity of the definition they point at, which is itself unique per
/// name, so structural and nominal equality coincide for named types).
#[derive(Debug, Clone, PartialEq)]
pub enum VType {
    Nil,
    Void,
    Any,
    Primitive(Primitive),
    Struct(Arc<StructDef>),
    Enum(Arc<EnumDef>),
    Array { element: Box<VType>, dims: u8 },
    Reference { base: Box<VType>, dims: u8 },
}

impl VType {
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Nil => "nil".into(),
            Self::Void => "void".into(),
            Self::Any => "Any".into(),
            Self::Primitive(Primitive::Int) => "Int".into(),
            Self::Primitive(Primitive::Bool) => "Bool".into(),
            Self::Primitive(Primitive::String) => "String".into(),
            Self::Struct(def) => def.name.clone(),
            Self::Enum(def) => def.name.clone(),
            Self::Array { element, dims } => format!("{}{}", element.display_name(), "[]".repeat(*dims as usize)),
            Self::Reference { base, dims } => format!("{}{}", "&".repeat(*dims as usize), base.display_name()),
        }
    }

    /// Size in bytes of the value's in-object storage (not counting
    /// out-of-line buffers such as a string's heap payload).
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::Nil | Self::Void => 0,
            Self::Any => 8,
            Self::Primitive(Primitive::Int) => 8,
            Self::Primitive(Primitive::Bool) => 1,
            Self::Primitive(Primitive::String) => std::mem::size_of::<(usize, usize, usize)>(),
            Self::Struct(def) => def.total_size(),
            Self::Enum(_) => 8,
            Self::Array { .. } => std::mem::size_of::<(usize, usize)>(),
            Self::Reference { .. } => std::mem::size_of::<(usize, usize)>(),
        }
    }

    /// Whether values of this type hold heap references that require a
    /// ref-count release when the value is destroyed (strings, arrays,
    /// structs/enums containing any of those, or reference-typed values).
    #[must_use]
    pub fn needs_internal_release(&self) -> bool {
        match self {
            Self::Nil | Self::Void | Self::Any | Self::Primitive(Primitive::Int | Primitive::Bool) => false,
            Self::Primitive(Primitive::String) | Self::Array { .. } | Self::Reference { .. } => true,
            Self::Struct(def) => def.needs_internal_release(),
            Self::Enum(_) => false,
        }
    }

    /// All definitions referenced by this type have completed resolution.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Struct(def) => def.is_ready(),
            Self::Enum(def) => def.is_ready(),
            Self::Array { element, .. } | Self::Reference { base: element, .. } => element.is_ready(),
            _ => true,
        }
    }

    /// Resolves the type of the `index`-th member (`is_member = true`, i.e.
    /// struct field / array element) or the `index`-th fixed property
    /// (`is_member = false`, i.e. `.size`/`.count`/`.index`/`.value`/`.name`).
    #[must_use]
    pub fn child_at(&self, index: usize, is_member: bool) -> Option<VType> {
        if is_member {
            match self {
                Self::Struct(def) => def.member_ty_at(index),
                Self::Array { element, dims } => {
                    if *dims > 1 {
                        Some(Self::Array { element: element.clone(), dims: dims - 1 })
                    } else {
                        Some((**element).clone())
                    }
                }
                _ => None,
            }
        } else {
            match self {
                Self::Primitive(Primitive::String) if index == 0 => Some(Self::Primitive(Primitive::Int)),
                Self::Array { .. } if index == 0 => Some(Self::Primitive(Primitive::Int)),
                Self::Enum(_) => match index {
                    0 => Some(Self::Primitive(Primitive::Int)),
                    1 => Some(Self::Primitive(Primitive::Int)),
                    2 => Some(Self::Primitive(Primitive::String)),
                    _ => None,
                },
                _ => None,
            }
        }
    }

    /// Resolves a named property: `.size` on `String`, `.count` on arrays,
    /// `.index`/`.value`/`.name` on enums. Returns the property index for
    /// use with [`VType::child_at`] and the resulting type.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<(usize, VType)> {
        match (self, name) {
            (Self::Primitive(Primitive::String), "size") => Some((0, Self::Primitive(Primitive::Int))),
            (Self::Array { .. }, "count") => Some((0, Self::Primitive(Primitive::Int))),
            (Self::Enum(_), "index") => Some((0, Self::Primitive(Primitive::Int))),
            (Self::Enum(_), "value") => Some((1, Self::Primitive(Primitive::Int))),
            (Self::Enum(_), "name") => Some((2, Self::Primitive(Primitive::String))),
            _ => None,
        }
    }

    /// Result type of `self <op> other`, or `None` if the combination is
    /// not supported by the runtime's binary-op dispatch tables.
    #[must_use]
    pub fn result_of_binary_op(&self, other: &Self, op: BinaryOperator) -> Option<VType> {
        use BinaryOperator as Op;
        use Primitive::{Bool, Int, String as Str};
        match (self, other, op) {
            (Self::Primitive(Int), Self::Primitive(Int), Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod) => {
                Some(Self::Primitive(Int))
            }
            (Self::Primitive(Bool), Self::Primitive(Bool), Op::And | Op::Or) => Some(Self::Primitive(Bool)),
            (Self::Primitive(Str), Self::Primitive(Str), Op::Add | Op::Div) => Some(Self::Primitive(Str)),
            (Self::Primitive(Str), Self::Primitive(Int), Op::Add) => Some(Self::Primitive(Str)),
            (Self::Array { element, dims }, rhs, Op::Add) if **element == *rhs && *dims == 1 => {
                Some(Self::Array { element: element.clone(), dims: *dims })
            }
            (Self::Array { .. }, Self::Array { .. }, Op::Add) if self == other => Some(self.clone()),
            (_, _, Op::Eq | Op::NotEq) if self == other => Some(Self::Primitive(Bool)),
            (Self::Reference { .. }, Self::Reference { .. }, Op::Eq | Op::NotEq) => Some(Self::Primitive(Bool)),
            (Self::Primitive(Int), Self::Primitive(Int), Op::Lt | Op::Gt | Op::Le | Op::Ge) => Some(Self::Primitive(Bool)),
            _ => None,
        }
    }

    /// Result type of a unary sign/not op: negation on `Int`, logical-not on `Bool`.
    #[must_use]
    pub fn result_of_sign_op(&self, is_not: bool) -> Option<VType> {
        match (self, is_not) {
            (Self::Primitive(Int), false) => Some(Self::Primitive(Int)),
            (Self::Primitive(Bool), true) => Some(Self::Primitive(Bool)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Primitive(Primitive::Bool))
    }
}
/// An ordered struct member.
#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: StringId,
    pub ty: VType,
    pub offset: usize,
}

/// Monotonic resolution stage shared by every definition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    None,
    Identified,
    Defined,
    Ready,
}

/// The layout-dependent half of a [`StructDef`]: empty until the struct's
/// member types are all resolvable, then filled in once, during the
/// struct fixpoint pass (§4.4). Kept behind a lock rather than as plain
/// fields because a struct may be referenced by `&Self`/`&Other` from a
/// sibling struct (or itself) before its own layout is known — the
/// `Arc<StructDef>` those references capture has to be the same one this
/// pass later backfills, not a replacement.
#[derive(Debug, Default, Clone)]
struct StructBody {
    members: Vec<StructMember>,
    total_size: usize,
    needs_internal_release: bool,
}

#[derive(Debug)]
pub struct StructDef {
    pub name: String,
    body: RwLock<StructBody>,
    stage: RwLock<Stage>,
}

impl PartialEq for StructDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl StructDef {
    #[must_use]
    pub fn new_unresolved(name: String) -> Self {
        Self { name, body: RwLock::new(StructBody::default()), stage: RwLock::new(Stage::Identified) }
    }

    /// The built-in `Result{failed, message, code}` record synthesized once
    /// per workspace so that intrinsic return values share the ordinary
    /// struct machinery (field offsets, property/child lookup).
    #[must_use]
    pub fn builtin_result(interner: &crate::intern::Interner) -> Self {
        let failed = interner.intern("failed");
        let message = interner.intern("message");
        let code = interner.intern("code");
        let def = Self::new_unresolved("Result".into());
        def.set_body(
            vec![
                StructMember { name: failed, ty: VType::Primitive(Primitive::Bool), offset: 0 },
                StructMember { name: message, ty: VType::Primitive(Primitive::String), offset: 8 },
                StructMember {
                    name: code,
                    ty: VType::Primitive(Primitive::Int),
                    offset: 8 + std::mem::size_of::<(usize, usize, usize)>(),
                },
            ],
            8 + std::mem::size_of::<(usize, usize, usize)>() + 8,
            true,
        );
        def.set_stage(Stage::Ready);
        def
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.read().expect("struct stage lock poisoned")
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.write().expect("struct stage lock poisoned") = stage;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Fills in the struct's member list and derived layout once every
    /// member type is resolvable; called exactly once, by the fixpoint pass
    /// that defines structs (§4.4).
    pub fn set_body(&self, members: Vec<StructMember>, total_size: usize, needs_internal_release: bool) {
        *self.body.write().expect("struct body lock poisoned") = StructBody { members, total_size, needs_internal_release };
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.body.read().expect("struct body lock poisoned").total_size
    }

    #[must_use]
    pub fn needs_internal_release(&self) -> bool {
        self.body.read().expect("struct body lock poisoned").needs_internal_release
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.body.read().expect("struct body lock poisoned").members.len()
    }

    #[must_use]
    pub fn member_ty_at(&self, index: usize) -> Option<VType> {
        self.body.read().expect("struct body lock poisoned").members.get(index).map(|m| m.ty.clone())
    }

    /// A snapshot of the member list, for callers that need to walk every
    /// member (zero-initialisation, stringification).
    #[must_use]
    pub fn members_snapshot(&self) -> Vec<StructMember> {
        self.body.read().expect("struct body lock poisoned").members.clone()
    }

    #[must_use]
    pub fn member_index(&self, name: StringId) -> Option<usize> {
        self.body.read().expect("struct body lock poisoned").members.iter().position(|m| m.name == name)
    }
}

#[derive(Debug)]
pub struct EnumDef {
    pub name: String,
    variants: RwLock<Vec<(String, i64)>>,
    stage: RwLock<Stage>,
}

impl PartialEq for EnumDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl EnumDef {
    #[must_use]
    pub fn new_unresolved(name: String) -> Self {
        Self { name, variants: RwLock::new(Vec::new()), stage: RwLock::new(Stage::Identified) }
    }

    /// Builds an already-`Ready` enum directly, for the handful of enums
    /// (`OSKind`, `RedirectMode`) synthesized by the ambient globals setup
    /// rather than declared in user source.
    #[must_use]
    pub fn new_ready(name: String, variants: Vec<(String, i64)>) -> Self {
        let def = Self::new_unresolved(name);
        def.set_variants(variants);
        def.set_stage(Stage::Ready);
        def
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.read().expect("enum stage lock poisoned")
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.write().expect("enum stage lock poisoned") = stage;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Fills in the variant list once every variant value is resolved;
    /// called exactly once, by the enum-resolve pass (§4.4).
    pub fn set_variants(&self, variants: Vec<(String, i64)>) {
        *self.variants.write().expect("enum variants lock poisoned") = variants;
    }

    #[must_use]
    pub fn variants_snapshot(&self) -> Vec<(String, i64)> {
        self.variants.read().expect("enum variants lock poisoned").clone()
    }

    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.variants.read().expect("enum variants lock poisoned").len()
    }

    #[must_use]
    pub fn variant_name(&self, index: usize) -> Option<String> {
        self.variants.read().expect("enum variants lock poisoned").get(index).map(|(name, _)| name.clone())
    }

    #[must_use]
    pub fn variant_value(&self, index: usize) -> Option<i64> {
        self.variants.read().expect("enum variants lock poisoned").get(index).map(|(_, value)| *value)
    }

    #[must_use]
    pub fn index_of(&self, value: i64) -> Option<usize> {
        self.variants.read().expect("enum variants lock poisoned").iter().position(|(_, v)| *v == value)
    }

    #[must_use]
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.variants.read().expect("enum variants lock poisoned").iter().position(|(n, _)| n == name)
    }
}
