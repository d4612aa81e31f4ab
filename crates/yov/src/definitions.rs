//! Process-wide registry of named top-level declarations and globals.
//!
//! Every entry advances through the same monotonic lifecycle stage
//! (`None -> Identified -> Defined -> Ready`); the table itself is guarded
//! by a single mutex, matching the concurrency design's preference for one
//! append-only, mutex-guarded structure over fine-grained per-entry locks.

use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::diagnostics::{Location, Reporter};
use crate::intern::StringId;
use crate::ir::{Ir, Value};
use crate::types::{EnumDef, Stage, StructDef, VType};

/// Identifies an entry within a [`DefinitionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId(u32);

impl DefinitionId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Enum,
    Struct,
    Function,
    Arg,
    Global,
}

/// A function's body: either an intrinsic identified by name (resolved
/// against [`crate::intrinsics::lookup`]) or a lowered [`Ir`] program.
pub enum FunctionBody {
    Unresolved,
    Intrinsic(String),
    Ir(Ir),
}

pub struct FunctionDef {
    pub name: String,
    pub location: Location,
    params: RwLock<Vec<(StringId, VType)>>,
    returns: RwLock<Vec<(StringId, VType)>>,
    pub body: RwLock<FunctionBody>,
    pub(crate) stage: RwLock<Stage>,
}

impl FunctionDef {
    /// Registered at identify time with an empty signature; the define pass
    /// fills it in once the parameter/return-type text has been parsed (see
    /// [`Self::set_signature`]) — intrinsics are the exception, built
    /// already-`Ready` with their signature known up front.
    #[must_use]
    pub fn new_unresolved(name: String, location: Location) -> Self {
        Self {
            name,
            location,
            params: RwLock::new(Vec::new()),
            returns: RwLock::new(Vec::new()),
            body: RwLock::new(FunctionBody::Unresolved),
            stage: RwLock::new(Stage::Identified),
        }
    }

    #[must_use]
    pub fn params(&self) -> Vec<(StringId, VType)> {
        self.params.read().expect("function params lock poisoned").clone()
    }

    #[must_use]
    pub fn returns(&self) -> Vec<(StringId, VType)> {
        self.returns.read().expect("function returns lock poisoned").clone()
    }

    pub fn set_signature(&self, params: Vec<(StringId, VType)>, returns: Vec<(StringId, VType)>) {
        *self.params.write().expect("function params lock poisoned") = params;
        *self.returns.write().expect("function returns lock poisoned") = returns;
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.read().expect("function stage lock poisoned")
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.write().expect("function stage lock poisoned") = stage;
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }
}

pub struct ArgDef {
    pub identifier: String,
    pub location: Location,
    display_name: RwLock<String>,
    description: RwLock<String>,
    pub ty: RwLock<VType>,
    pub required: RwLock<bool>,
    pub default_value: RwLock<Option<Value>>,
    pub(crate) stage: RwLock<Stage>,
}

impl ArgDef {
    /// Registered at identify time, before the `{name=...; description=...;
    /// ...}` properties body has been parsed; `display_name`/`description`
    /// default to the identifier/empty string until [`Self::set_properties`]
    /// runs during the define pass.
    #[must_use]
    pub fn new_unresolved(identifier: String, location: Location) -> Self {
        let display_name = RwLock::new(identifier.clone());
        Self {
            identifier,
            location,
            display_name,
            description: RwLock::new(String::new()),
            ty: RwLock::new(VType::Nil),
            required: RwLock::new(true),
            default_value: RwLock::new(None),
            stage: RwLock::new(Stage::Identified),
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.read().expect("arg stage lock poisoned")
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.write().expect("arg stage lock poisoned") = stage;
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        self.display_name.read().expect("arg display_name lock poisoned").clone()
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.description.read().expect("arg description lock poisoned").clone()
    }

    pub fn set_display_name(&self, value: String) {
        *self.display_name.write().expect("arg display_name lock poisoned") = value;
    }

    pub fn set_description(&self, value: String) {
        *self.description.write().expect("arg description lock poisoned") = value;
    }
}

pub struct GlobalDef {
    pub identifier: String,
    pub location: Location,
    pub ty: RwLock<VType>,
    pub is_constant: bool,
    pub(crate) stage: RwLock<Stage>,
}

impl GlobalDef {
    #[must_use]
    pub fn new_unresolved(identifier: String, location: Location, ty: VType, is_constant: bool) -> Self {
        Self { identifier, location, ty: RwLock::new(ty), is_constant, stage: RwLock::new(Stage::Identified) }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.stage.read().expect("global stage lock poisoned")
    }

    pub fn set_stage(&self, stage: Stage) {
        *self.stage.write().expect("global stage lock poisoned") = stage;
    }
}

pub enum Definition {
    Enum(Arc<EnumDef>),
    Struct(Arc<StructDef>),
    Function(Arc<FunctionDef>),
    Arg(Arc<ArgDef>),
    Global(Arc<GlobalDef>),
}

impl Definition {
    #[must_use]
    pub fn kind(&self) -> DefinitionKind {
        match self {
            Self::Enum(_) => DefinitionKind::Enum,
            Self::Struct(_) => DefinitionKind::Struct,
            Self::Function(_) => DefinitionKind::Function,
            Self::Arg(_) => DefinitionKind::Arg,
            Self::Global(_) => DefinitionKind::Global,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Enum(def) => def.stage(),
            Self::Struct(def) => def.stage(),
            Self::Function(def) => def.stage(),
            Self::Arg(def) => def.stage(),
            Self::Global(def) => def.stage(),
        }
    }
}

struct Entry {
    identifier: String,
    definition: Definition,
}

#[derive(Default)]
struct TableInner {
    entries: Vec<Entry>,
    by_name: AHashMap<String, DefinitionId>,
}

/// The process-wide definition table.
#[derive(Default)]
pub struct DefinitionTable {
    inner: RwLock<TableInner>,
}

impl DefinitionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a brand-new definition in the `Identified` stage. Returns
    /// `None` (after reporting a diagnostic) when `identifier` is already
    /// taken; per the duplicate-identifier rule, the first occurrence keeps
    /// its slot.
    pub fn identify(&self, reporter: &Reporter, identifier: &str, location: Location, definition: Definition) -> Option<DefinitionId> {
        let mut inner = self.inner.write().expect("definition table lock poisoned");
        if inner.by_name.contains_key(identifier) {
            reporter.error(location, format!("'{identifier}' is already defined"));
            return None;
        }
        let id = DefinitionId(u32::try_from(inner.entries.len()).expect("too many definitions"));
        inner.entries.push(Entry { identifier: identifier.to_string(), definition });
        inner.by_name.insert(identifier.to_string(), id);
        Some(id)
    }

    #[must_use]
    pub fn resolve_name(&self, identifier: &str) -> Option<DefinitionId> {
        self.inner.read().expect("definition table lock poisoned").by_name.get(identifier).copied()
    }

    pub fn with_definition<R>(&self, id: DefinitionId, f: impl FnOnce(&Definition) -> R) -> R {
        let inner = self.inner.read().expect("definition table lock poisoned");
        f(&inner.entries[id.index()].definition)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("definition table lock poisoned").entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids currently registered, for the phase-2/3 worker passes to
    /// distribute across lanes.
    #[must_use]
    pub fn all_ids(&self) -> Vec<DefinitionId> {
        (0..self.len()).map(|i| DefinitionId(u32::try_from(i).expect("too many definitions"))).collect()
    }

    /// `true` once every registered definition has reached stage `Ready`.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        let inner = self.inner.read().expect("definition table lock poisoned");
        inner.entries.iter().all(|entry| entry.definition.stage() == Stage::Ready)
    }

    #[must_use]
    pub fn name_of(&self, id: DefinitionId) -> String {
        self.inner.read().expect("definition table lock poisoned").entries[id.index()].identifier.clone()
    }
}
