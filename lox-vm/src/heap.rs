// lox-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The garbage-collected heap.
//!
//! Objects live in an arena of tagged slots addressed by stable [`ObjRef`]
//! indices; freed slots go on a free list and are reused. The arena is the
//! collector's sole enumeration path, the mark bit lives in the slot
//! header, and the intern table is swept weakly before slots are freed.
//!
//! The heap itself never decides when to collect: the VM checks
//! [`Heap::should_collect`] before each runtime allocation and supplies
//! the root set. Collection never runs during compilation; the compiler
//! owns every partially built function as a plain Rust value.

use crate::object::{LoxString, Obj, ObjRef, UpvalueState};
use crate::table::Table;
use crate::value::{Value, format_number};
use crate::vm::CallFrame;

/// After a collection the next trigger point is the surviving byte count
/// scaled by this factor.
const GC_HEAP_GROW_FACTOR: usize = 2;

/// First collection threshold.
const GC_FIRST_THRESHOLD: usize = 1024 * 1024;

/// FNV-1a over the string bytes; stored with every interned string.
pub fn hash_str(s: &str) -> u32 {
    let mut hash = 2166136261u32;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

struct ObjSlot {
    marked: bool,
    obj: Obj,
}

/// The root set for a collection, borrowed from the VM at the safepoint.
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub frames: &'a [CallFrame],
    pub open_upvalues: Option<ObjRef>,
    pub globals: &'a Table,
    pub init_string: Option<ObjRef>,
}

/// The garbage-collected object heap.
pub struct Heap {
    slots: Vec<Option<ObjSlot>>,
    free: Vec<u32>,

    /// String intern table. Holds every live string weakly: membership here
    /// does not keep a string alive.
    strings: Table,

    bytes_allocated: usize,
    next_gc: usize,

    /// Collect before every runtime allocation (debug aid).
    stress: bool,

    /// Grey worklist for the mark phase.
    gray: Vec<ObjRef>,
}

impl Heap {
    /// Create a new empty heap.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: GC_FIRST_THRESHOLD,
            stress: false,
            gray: Vec::new(),
        }
    }

    /// Enable or disable stress collection.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    /// Total bytes currently accounted to live objects.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// True if the VM should collect before its next allocation.
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Allocate an object and return its handle.
    ///
    /// Never collects; callers that can reach a safepoint collect first.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.bytes_allocated += obj.heap_size();
        let slot = ObjSlot { marked: false, obj };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(slot));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Intern a string: return the existing handle for this byte content or
    /// allocate and publish a new one.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = hash_str(s);
        let found = self
            .strings
            .find_key(hash, |key| &*self.string(key).chars == s);
        if let Some(key) = found {
            return key;
        }

        let r = self.alloc(Obj::String(LoxString {
            chars: s.into(),
            hash,
        }));
        self.strings.set(r, hash, Value::Nil);
        r
    }

    // =========================================================================
    // Object access
    // =========================================================================
    // Handles are only created by `alloc` and only invalidated by `collect`
    // for unreachable objects, so a live handle always resolves; a failure
    // here is a VM bug, not a user error.

    pub fn obj(&self, r: ObjRef) -> &Obj {
        match &self.slots[r.0 as usize] {
            Some(slot) => &slot.obj,
            None => unreachable!("stale object handle"),
        }
    }

    pub fn obj_mut(&mut self, r: ObjRef) -> &mut Obj {
        match &mut self.slots[r.0 as usize] {
            Some(slot) => &mut slot.obj,
            None => unreachable!("stale object handle"),
        }
    }

    pub fn string(&self, r: ObjRef) -> &LoxString {
        match self.obj(r) {
            Obj::String(s) => s,
            other => unreachable!("expected string, got {}", other.kind_name()),
        }
    }

    pub fn function(&self, r: ObjRef) -> &crate::object::Function {
        match self.obj(r) {
            Obj::Function(f) => f,
            other => unreachable!("expected function, got {}", other.kind_name()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &crate::object::Closure {
        match self.obj(r) {
            Obj::Closure(c) => c,
            other => unreachable!("expected closure, got {}", other.kind_name()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut crate::object::Closure {
        match self.obj_mut(r) {
            Obj::Closure(c) => c,
            other => unreachable!("expected closure, got {}", other.kind_name()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &crate::object::Upvalue {
        match self.obj(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("expected upvalue, got {}", other.kind_name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut crate::object::Upvalue {
        match self.obj_mut(r) {
            Obj::Upvalue(u) => u,
            other => unreachable!("expected upvalue, got {}", other.kind_name()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &crate::object::Class {
        match self.obj(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, got {}", other.kind_name()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut crate::object::Class {
        match self.obj_mut(r) {
            Obj::Class(c) => c,
            other => unreachable!("expected class, got {}", other.kind_name()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &crate::object::Instance {
        match self.obj(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, got {}", other.kind_name()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut crate::object::Instance {
        match self.obj_mut(r) {
            Obj::Instance(i) => i,
            other => unreachable!("expected instance, got {}", other.kind_name()),
        }
    }

    /// True if the slot behind `r` is still live.
    #[cfg(test)]
    pub(crate) fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render a value the way `print` does.
    pub fn value_to_string(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(r) => self.obj_to_string(r),
        }
    }

    fn obj_to_string(&self, r: ObjRef) -> String {
        match self.obj(r) {
            Obj::String(s) => s.chars.to_string(),
            Obj::Function(_) => self.function_repr(r),
            Obj::Native(_) => "<native fn>".to_string(),
            Obj::Closure(c) => self.function_repr(c.function),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => self.string(c.name).chars.to_string(),
            Obj::Instance(i) => {
                format!("{} instance", self.string(self.class(i.class).name).chars)
            }
            Obj::BoundMethod(b) => self.function_repr(self.closure(b.method).function),
        }
    }

    fn function_repr(&self, function: ObjRef) -> String {
        match self.function(function).name {
            Some(name) => format!("<fn {}>", self.string(name).chars),
            None => "<script>".to_string(),
        }
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run a full mark-and-sweep collection over the given roots.
    pub fn collect(&mut self, roots: Roots<'_>) {
        debug_assert!(self.gray.is_empty());

        self.mark_roots(&roots);
        self.trace_references();
        self.sweep_interned_strings();
        self.sweep();

        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }

    fn mark_roots(&mut self, roots: &Roots<'_>) {
        for value in roots.stack {
            self.mark_value(*value);
        }
        for frame in roots.frames {
            self.mark_object(frame.closure);
        }

        let mut upvalue = roots.open_upvalues;
        while let Some(r) = upvalue {
            upvalue = self.upvalue(r).next;
            self.mark_object(r);
        }

        for entry in roots.globals.entries() {
            self.mark_object(entry.key);
            self.mark_value(entry.value);
        }

        if let Some(init) = roots.init_string {
            self.mark_object(init);
        }
    }

    fn trace_references(&mut self) {
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }
    }

    /// Mark everything the object references, per kind. Strings and natives
    /// have no outgoing references.
    fn blacken(&mut self, r: ObjRef) {
        let mut refs: Vec<ObjRef> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        match self.obj(r) {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::Function(f) => {
                if let Some(name) = f.name {
                    refs.push(name);
                }
                values.extend(f.chunk.constants.iter().copied());
            }
            Obj::Closure(c) => {
                refs.push(c.function);
                refs.extend(c.upvalues.iter().copied());
            }
            Obj::Upvalue(u) => {
                if let UpvalueState::Closed(value) = u.state {
                    values.push(value);
                }
            }
            Obj::Class(c) => {
                refs.push(c.name);
                for entry in c.methods.entries() {
                    refs.push(entry.key);
                    values.push(entry.value);
                }
            }
            Obj::Instance(i) => {
                refs.push(i.class);
                for entry in i.fields.entries() {
                    refs.push(entry.key);
                    values.push(entry.value);
                }
            }
            Obj::BoundMethod(b) => {
                values.push(b.receiver);
                refs.push(b.method);
            }
        }

        for child in refs {
            self.mark_object(child);
        }
        for value in values {
            self.mark_value(value);
        }
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    fn mark_object(&mut self, r: ObjRef) {
        let slot = match &mut self.slots[r.0 as usize] {
            Some(slot) => slot,
            None => unreachable!("marking freed object"),
        };
        if slot.marked {
            return;
        }
        slot.marked = true;
        self.gray.push(r);
    }

    fn is_marked(&self, r: ObjRef) -> bool {
        match &self.slots[r.0 as usize] {
            Some(slot) => slot.marked,
            None => false,
        }
    }

    /// The intern table references strings weakly: drop entries whose key
    /// did not survive marking, before sweep frees them.
    fn sweep_interned_strings(&mut self) {
        let mut strings = std::mem::take(&mut self.strings);
        strings.retain_keys(|key| self.is_marked(key));
        self.strings = strings;
    }

    /// Free unmarked slots, clear survivor marks, and recompute the byte
    /// accounting from the survivors (owned buffers may have grown since
    /// allocation).
    fn sweep(&mut self) {
        let mut live_bytes = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    live_bytes += slot.obj.heap_size();
                }
                Some(_) => {
                    *entry = None;
                    self.free.push(index as u32);
                }
                None => {}
            }
        }
        self.bytes_allocated = live_bytes;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
