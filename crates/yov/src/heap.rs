//! The reference-counted object heap (§3.5-3.6) and the runtime value
//! representation IR operands materialise into.
//!
//! Only `String`, `Array`, `Struct` (when it contains one of those,
//! transitively) and `Reference` values carry a heap footprint — exactly
//! the types [`VType::needs_internal_release`] flags. Plain `Int`/`Bool`
//! scalars and enum variants live inline in a [`RtValue`] with no heap
//! indirection, since they never need a ref-count release.
//!
//! The sweeper (§5) walks every zero-refcount slot, frees it, and releases
//! whatever it held, repeating to a fixpoint — freeing one struct/array may
//! drop the last reference to another. This is sufficient because the type
//! system forbids value-type cycles (§3.3); reference-typed fields that
//! alias an ancestor are a declared user-level leak, not handled here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::types::{Primitive, StructDef, VType};

/// Identifies a heap-resident [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The dynamic payload owned by a heap object.
#[derive(Debug)]
pub enum Payload {
    String(String),
    Array { element_ty: VType, elements: Vec<RtValue> },
    Struct { ty: Arc<StructDef>, fields: Vec<RtValue> },
}

struct Slot {
    ref_count: u32,
    payload: Payload,
}

/// What a [`Reference`] denotes: a whole heap object, or an interior
/// sub-region (array element / struct field) borrowing from a parent
/// object without owning it, per §3.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// A valid reference pointing at nothing (the language's `null`).
    Null,
    /// An invalid reference used internally to signal failure.
    Nil,
    Whole(HeapId),
    ArrayElement(HeapId, usize),
    StructField(HeapId, usize),
}

impl RefTarget {
    #[must_use]
    fn owning_parent(self) -> Option<HeapId> {
        match self {
            Self::Null | Self::Nil => None,
            Self::Whole(id) | Self::ArrayElement(id, _) | Self::StructField(id, _) => Some(id),
        }
    }
}

/// The runtime realisation of an IR operand: `{type, target}`. Never owns
/// the object it denotes on its own — when a `Reference` value is itself
/// stored into a register/array-element/struct-field, the holder takes a
/// retaining `+1` on the target (see [`Heap::retain_value`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub ty: VType,
    pub target: RefTarget,
}

impl Reference {
    #[must_use]
    pub fn null(ty: VType) -> Self {
        Self { ty, target: RefTarget::Null }
    }

    #[must_use]
    pub fn nil() -> Self {
        Self { ty: VType::Nil, target: RefTarget::Nil }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.target, RefTarget::Null)
    }
}

/// A materialised IR operand value.
#[derive(Debug, Clone)]
pub enum RtValue {
    Nil,
    Int(i64),
    Bool(bool),
    /// An enum variant: the enum's `VType` plus the variant's index.
    Enum(VType, usize),
    /// A compile-time type value (the result of `typeof` or naming a type).
    Type(VType),
    Str(HeapId),
    Array(HeapId),
    Struct(HeapId),
    Reference(Reference),
}

impl RtValue {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// The process-wide object heap: an allocation counter plus a slot table
/// guarded by a single mutex, mirroring the concurrency design's preference
/// for one append-heavy structure over fine-grained locks. Execution itself
/// is single-threaded (§5), so contention is a non-issue; the mutex exists
/// so a `Heap` can be shared behind an `Arc` without `unsafe`.
pub struct Heap {
    slots: Mutex<Vec<Option<Slot>>>,
    free: Mutex<Vec<u32>>,
    allocations: AtomicU32,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Mutex::new(Vec::new()), free: Mutex::new(Vec::new()), allocations: AtomicU32::new(0) }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Slot>>> {
        self.slots.lock().expect("heap mutex poisoned")
    }

    fn insert(&self, payload: Payload) -> HeapId {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots();
        if let Some(id) = self.free.lock().expect("heap free-list mutex poisoned").pop() {
            slots[id as usize] = Some(Slot { ref_count: 1, payload });
            return HeapId(id);
        }
        let id = u32::try_from(slots.len()).expect("heap exhausted u32 id space");
        slots.push(Some(Slot { ref_count: 1, payload }));
        HeapId(id)
    }

    #[must_use]
    pub fn alloc_string(&self, value: String) -> HeapId {
        self.insert(Payload::String(value))
    }

    #[must_use]
    pub fn alloc_array(&self, element_ty: VType, elements: Vec<RtValue>) -> HeapId {
        self.insert(Payload::Array { element_ty, elements })
    }

    #[must_use]
    pub fn alloc_struct(&self, ty: Arc<StructDef>, fields: Vec<RtValue>) -> HeapId {
        self.insert(Payload::Struct { ty, fields })
    }

    pub fn retain(&self, id: HeapId) {
        if let Some(slot) = &mut self.slots()[id.index()] {
            slot.ref_count += 1;
        }
    }

    pub fn release(&self, id: HeapId) {
        if let Some(slot) = &mut self.slots()[id.index()] {
            slot.ref_count = slot.ref_count.saturating_sub(1);
        }
    }

    /// Releases whatever `value` holds a heap reference to (a no-op for
    /// inline scalars). Call when a value is discarded or overwritten.
    pub fn release_value(&self, value: &RtValue) {
        match value {
            RtValue::Str(id) | RtValue::Array(id) | RtValue::Struct(id) => self.release(*id),
            RtValue::Reference(r) => {
                if let Some(parent) = r.target.owning_parent() {
                    self.release(parent);
                }
            }
            RtValue::Nil | RtValue::Int(_) | RtValue::Bool(_) | RtValue::Enum(..) | RtValue::Type(_) => {}
        }
    }

    /// Retains whatever `value` holds a heap reference to. Call when a
    /// value is installed into a second holder (e.g. `Store`, or a
    /// reference stored into a struct field/array element).
    pub fn retain_value(&self, value: &RtValue) {
        match value {
            RtValue::Str(id) | RtValue::Array(id) | RtValue::Struct(id) => self.retain(*id),
            RtValue::Reference(r) => {
                if let Some(parent) = r.target.owning_parent() {
                    self.retain(parent);
                }
            }
            RtValue::Nil | RtValue::Int(_) | RtValue::Bool(_) | RtValue::Enum(..) | RtValue::Type(_) => {}
        }
    }

    /// A fresh, independently-owned deep copy of `value`: new heap objects
    /// for every `String`/`Array`/`Struct` reachable from it, per the
    /// `Copy` instruction's "value-level semantic copy" (§4.7). A bare
    /// `Reference` value copies by sharing its target with a retain.
    #[must_use]
    pub fn deep_copy(&self, value: &RtValue) -> RtValue {
        match value {
            RtValue::Nil | RtValue::Int(_) | RtValue::Bool(_) | RtValue::Enum(..) | RtValue::Type(_) => value.clone(),
            RtValue::Str(id) => RtValue::Str(self.alloc_string(self.string(*id))),
            RtValue::Array(id) => {
                let (element_ty, elements) = self.array_snapshot(*id);
                let copied = elements.iter().map(|e| self.deep_copy(e)).collect();
                RtValue::Array(self.alloc_array(element_ty, copied))
            }
            RtValue::Struct(id) => {
                let (ty, fields) = self.struct_snapshot(*id);
                let copied = fields.iter().map(|f| self.deep_copy(f)).collect();
                RtValue::Struct(self.alloc_struct(ty, copied))
            }
            RtValue::Reference(r) => {
                if let Some(parent) = r.target.owning_parent() {
                    self.retain(parent);
                }
                RtValue::Reference(r.clone())
            }
        }
    }

    /// A default-constructed value of `ty`: zero/empty-string/empty-array,
    /// all-zero struct fields, the enum's first variant, per `ZeroInit`.
    #[must_use]
    pub fn zero_init(&self, ty: &VType) -> RtValue {
        match ty {
            VType::Nil | VType::Void | VType::Any => RtValue::Nil,
            VType::Primitive(Primitive::Int) => RtValue::Int(0),
            VType::Primitive(Primitive::Bool) => RtValue::Bool(false),
            VType::Primitive(Primitive::String) => RtValue::Str(self.alloc_string(String::new())),
            VType::Struct(def) => {
                let fields = def.members_snapshot().iter().map(|m| self.zero_init(&m.ty)).collect();
                RtValue::Struct(self.alloc_struct(def.clone(), fields))
            }
            VType::Enum(_) => RtValue::Enum(ty.clone(), 0),
            VType::Array { element, .. } => RtValue::Array(self.alloc_array((**element).clone(), Vec::new())),
            VType::Reference { .. } => RtValue::Reference(Reference::null(ty.clone())),
        }
    }

    #[must_use]
    pub fn string(&self, id: HeapId) -> String {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::String(s), .. }) => s.clone(),
            _ => String::new(),
        }
    }

    pub fn set_string(&self, id: HeapId, value: String) {
        if let Some(Slot { payload: Payload::String(s), .. }) = &mut self.slots()[id.index()] {
            *s = value;
        }
    }

    #[must_use]
    pub fn array_snapshot(&self, id: HeapId) -> (VType, Vec<RtValue>) {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::Array { element_ty, elements }, .. }) => (element_ty.clone(), elements.clone()),
            _ => (VType::Nil, Vec::new()),
        }
    }

    #[must_use]
    pub fn array_len(&self, id: HeapId) -> usize {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::Array { elements, .. }, .. }) => elements.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn array_element(&self, id: HeapId, index: usize) -> Option<RtValue> {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::Array { elements, .. }, .. }) => elements.get(index).cloned(),
            _ => None,
        }
    }

    /// Overwrites element `index`, releasing whatever value was there.
    pub fn set_array_element(&self, id: HeapId, index: usize, value: RtValue) {
        let old = {
            let mut slots = self.slots();
            match &mut slots[id.index()] {
                Some(Slot { payload: Payload::Array { elements, .. }, .. }) if index < elements.len() => {
                    Some(std::mem::replace(&mut elements[index], value))
                }
                _ => None,
            }
        };
        if let Some(old) = old {
            self.release_value(&old);
        }
    }

    pub fn array_push(&self, id: HeapId, value: RtValue) {
        if let Some(Slot { payload: Payload::Array { elements, .. }, .. }) = &mut self.slots()[id.index()] {
            elements.push(value);
        }
    }

    #[must_use]
    pub fn struct_snapshot(&self, id: HeapId) -> (Arc<StructDef>, Vec<RtValue>) {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::Struct { ty, fields }, .. }) => (ty.clone(), fields.clone()),
            _ => panic!("heap id {} is not a struct object", id.0),
        }
    }

    #[must_use]
    pub fn struct_field(&self, id: HeapId, index: usize) -> RtValue {
        match &self.slots()[id.index()] {
            Some(Slot { payload: Payload::Struct { fields, .. }, .. }) => fields[index].clone(),
            _ => RtValue::Nil,
        }
    }

    pub fn set_struct_field(&self, id: HeapId, index: usize, value: RtValue) {
        let old = {
            let mut slots = self.slots();
            match &mut slots[id.index()] {
                Some(Slot { payload: Payload::Struct { fields, .. }, .. }) => Some(std::mem::replace(&mut fields[index], value)),
                _ => None,
            }
        };
        if let Some(old) = old {
            self.release_value(&old);
        }
    }

    /// Reads the value currently addressed by `reference`.
    #[must_use]
    pub fn read_reference(&self, reference: &Reference) -> RtValue {
        match reference.target {
            RefTarget::Null | RefTarget::Nil => RtValue::Nil,
            RefTarget::Whole(id) => match &reference.ty {
                VType::Primitive(Primitive::String) => RtValue::Str(id),
                VType::Array { .. } => RtValue::Array(id),
                VType::Struct(_) => RtValue::Struct(id),
                other => panic!("whole-object reference of unsupported type {}", other.display_name()),
            },
            RefTarget::ArrayElement(id, index) => self.array_element(id, index).unwrap_or(RtValue::Nil),
            RefTarget::StructField(id, index) => self.struct_field(id, index),
        }
    }

    /// Writes `value` into the location `reference` addresses (a struct
    /// field or array element; see [`crate::interpreter`]'s `Copy`
    /// dispatch for why whole-object references never reach here).
    pub fn write_reference(&self, reference: &Reference, value: RtValue) {
        match reference.target {
            RefTarget::Null | RefTarget::Nil | RefTarget::Whole(_) => self.release_value(&value),
            RefTarget::ArrayElement(id, index) => self.set_array_element(id, index, value),
            RefTarget::StructField(id, index) => self.set_struct_field(id, index, value),
        }
    }

    /// Structural equality, per §4.7's `BinaryOp` table: strings/arrays
    /// compare by content, structs by member-wise equality, references by
    /// target address.
    #[must_use]
    pub fn values_equal(&self, a: &RtValue, b: &RtValue) -> bool {
        match (a, b) {
            (RtValue::Nil, RtValue::Nil) => true,
            (RtValue::Int(x), RtValue::Int(y)) => x == y,
            (RtValue::Bool(x), RtValue::Bool(y)) => x == y,
            (RtValue::Enum(tx, x), RtValue::Enum(ty, y)) => tx == ty && x == y,
            (RtValue::Type(x), RtValue::Type(y)) => x == y,
            (RtValue::Str(x), RtValue::Str(y)) => self.string(*x) == self.string(*y),
            (RtValue::Array(x), RtValue::Array(y)) => {
                if *x == *y {
                    return true;
                }
                let (_, xs) = self.array_snapshot(*x);
                let (_, ys) = self.array_snapshot(*y);
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(a, b)| self.values_equal(a, b))
            }
            (RtValue::Struct(x), RtValue::Struct(y)) => {
                if *x == *y {
                    return true;
                }
                let (_, xs) = self.struct_snapshot(*x);
                let (_, ys) = self.struct_snapshot(*y);
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(a, b)| self.values_equal(a, b))
            }
            (RtValue::Reference(x), RtValue::Reference(y)) => x.target == y.target,
            _ => false,
        }
    }

    /// The textual form of a value for `print`/`println`/string
    /// interpolation; enums render as their variant name.
    ///
    /// `interner` resolves struct member names back to text; `Heap` itself
    /// holds no handle on the interner, so callers (the intrinsic library,
    /// the runtime) thread theirs through here.
    #[must_use]
    pub fn stringify(&self, interner: &crate::intern::Interner, value: &RtValue) -> String {
        match value {
            RtValue::Nil => "null".to_string(),
            RtValue::Int(n) => n.to_string(),
            RtValue::Bool(b) => b.to_string(),
            RtValue::Enum(VType::Enum(def), index) => def.variant_name(*index).unwrap_or_else(|| "?".into()),
            RtValue::Enum(_, index) => index.to_string(),
            RtValue::Type(ty) => ty.display_name(),
            RtValue::Str(id) => self.string(*id),
            RtValue::Array(id) => {
                let (_, elements) = self.array_snapshot(*id);
                let parts: Vec<String> = elements.iter().map(|e| self.stringify(interner, e)).collect();
                format!("{{{}}}", parts.join(", "))
            }
            RtValue::Struct(id) => {
                let (ty, fields) = self.struct_snapshot(*id);
                let members = ty.members_snapshot();
                let parts: Vec<String> = members
                    .iter()
                    .zip(fields.iter())
                    .map(|(m, v)| format!(".{}={}", interner.resolve(m.name), self.stringify(interner, v)))
                    .collect();
                format!("{}{{{}}}", ty.name, parts.join(", "))
            }
            RtValue::Reference(r) => match r.target {
                RefTarget::Null => "null".to_string(),
                RefTarget::Nil => "nil".to_string(),
                _ => format!("&{}", r.ty.display_name()),
            },
        }
    }

    /// Number of heap objects still allocated; the ref-count-balance
    /// testable property (§8) requires this to be `0` at clean exit.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    /// Walks every zero-refcount slot, frees it, and releases whatever it
    /// held, repeating until a pass frees nothing. Returns the number of
    /// objects freed.
    pub fn sweep(&self) -> usize {
        let mut total = 0usize;
        loop {
            let candidates: Vec<u32> = {
                let slots = self.slots();
                slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| match slot {
                        Some(s) if s.ref_count == 0 => Some(u32::try_from(i).expect("heap id fits u32")),
                        _ => None,
                    })
                    .collect()
            };
            if candidates.is_empty() {
                break;
            }
            for id in &candidates {
                let payload = {
                    let mut slots = self.slots();
                    slots[*id as usize].take().map(|slot| slot.payload)
                };
                let Some(payload) = payload else { continue };
                self.free.lock().expect("heap free-list mutex poisoned").push(*id);
                total += 1;
                match payload {
                    Payload::String(_) => {}
                    Payload::Array { elements, .. } => {
                        for element in &elements {
                            self.release_value(element);
                        }
                    }
                    Payload::Struct { fields, .. } => {
                        for field in &fields {
                            self.release_value(field);
                        }
                    }
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructMember;

    #[test]
    fn string_roundtrip_and_sweep() {
        let heap = Heap::new();
        let id = heap.alloc_string("hello".to_string());
        assert_eq!(heap.string(id), "hello");
        heap.release(id);
        assert_eq!(heap.sweep(), 1);
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn array_element_release_cascades() {
        let heap = Heap::new();
        let inner = heap.alloc_string("x".to_string());
        let array = heap.alloc_array(VType::Primitive(Primitive::String), vec![RtValue::Str(inner)]);
        heap.release(array);
        assert_eq!(heap.sweep(), 2);
        assert_eq!(heap.object_count(), 0);
    }

    #[test]
    fn deep_copy_allocates_independent_buffer() {
        let heap = Heap::new();
        let original = heap.alloc_string("a".to_string());
        let copy_value = heap.deep_copy(&RtValue::Str(original));
        let RtValue::Str(copy_id) = copy_value else { panic!("expected Str") };
        assert_ne!(copy_id, original);
        heap.set_string(copy_id, "b".to_string());
        assert_eq!(heap.string(original), "a");
    }

    #[test]
    fn struct_field_write_releases_old_value() {
        let heap = Heap::new();
        let interner = crate::intern::Interner::new();
        let def = StructDef::new_unresolved("T".to_string());
        def.set_body(vec![StructMember { name: interner.intern("s"), ty: VType::Primitive(Primitive::String), offset: 0 }], 0, true);
        let old = heap.alloc_string("old".to_string());
        let record = heap.alloc_struct(Arc::new(def), vec![RtValue::Str(old)]);
        heap.set_struct_field(record, 0, RtValue::Str(heap.alloc_string("new".to_string())));
        heap.release(record);
        assert_eq!(heap.sweep(), 3);
    }
}
