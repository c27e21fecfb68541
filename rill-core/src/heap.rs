// rill-core - Object heap and mark-sweep collector
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The garbage-collected object heap.
//!
//! Objects live in a slot table; an [`ObjRef`] is a slot index and a live
//! object's slot never changes. Allocation may trigger a tri-color
//! mark-sweep collection *before* the new object exists, so anything
//! already allocated but not yet reachable from a root must sit on the
//! temp-root stack across further allocations.
//!
//! Root sets, in marking order: fibers reachable from other roots trace
//! their own stacks; the temp-root stack; the roots of the active compiler
//! (its script, and through it everything the compiler is emitting into);
//! and persistent roots held by the embedder.

use std::mem;

use crate::object::{
    CallFrame, Fiber, FnKind, Function, List, Map, MapEntry, Obj, ObjKind, ObjRef, Range, Script,
    Str,
};
use crate::value::{Value, hash_bytes};

/// Capacity of the temp-root stack. Exceeding it is a programmer error.
pub const MAX_TEMP_ROOTS: usize = 8;

/// Name given to every script's top-level body function.
pub const SCRIPT_BODY_NAME: &str = "@(ScriptLevel)";

/// Collection thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HeapLimits {
    /// Bytes of live allocations before the first collection, and the
    /// floor for every later threshold.
    pub initial_threshold: usize,

    /// Next threshold as a percentage of the bytes that survived the last
    /// collection.
    pub growth_percent: usize,
}

impl Default for HeapLimits {
    fn default() -> Self {
        HeapLimits {
            initial_threshold: 1024 * 1024,
            growth_percent: 150,
        }
    }
}

/// Identifier of a persistent root registered with [`Heap::add_root`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootId(u32);

/// The object heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    free: Vec<u32>,

    /// Marked-but-not-yet-scanned objects during collection.
    gray: Vec<ObjRef>,
    /// Scratch space for one object's outgoing references while tracing.
    scratch: Vec<ObjRef>,

    temp_roots: Vec<ObjRef>,
    compiler_roots: Vec<ObjRef>,
    persistent_roots: Vec<Option<ObjRef>>,
    persistent_free: Vec<u32>,

    limits: HeapLimits,
    bytes_allocated: usize,
    next_gc: usize,
    collections: usize,
}

impl Heap {
    pub fn new(limits: HeapLimits) -> Heap {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            scratch: Vec::new(),
            temp_roots: Vec::new(),
            compiler_roots: Vec::new(),
            persistent_roots: Vec::new(),
            persistent_free: Vec::new(),
            next_gc: limits.initial_threshold,
            limits,
            bytes_allocated: 0,
            collections: 0,
        }
    }

    // ========================================================================
    // Access
    // ========================================================================

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.index()].as_ref().expect("access to freed object")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.index()].as_mut().expect("access to freed object")
    }

    pub fn str(&self, r: ObjRef) -> &Str {
        match &self.get(r).kind {
            ObjKind::Str(s) => s,
            other => panic!("expected string, found {:?}", other.obj_type()),
        }
    }

    pub fn list(&self, r: ObjRef) -> &List {
        match &self.get(r).kind {
            ObjKind::List(l) => l,
            other => panic!("expected list, found {:?}", other.obj_type()),
        }
    }

    pub fn list_mut(&mut self, r: ObjRef) -> &mut List {
        match &mut self.get_mut(r).kind {
            ObjKind::List(l) => l,
            other => panic!("expected list, found {:?}", other.obj_type()),
        }
    }

    pub fn map(&self, r: ObjRef) -> &Map {
        match &self.get(r).kind {
            ObjKind::Map(m) => m,
            other => panic!("expected map, found {:?}", other.obj_type()),
        }
    }

    pub fn range(&self, r: ObjRef) -> &Range {
        match &self.get(r).kind {
            ObjKind::Range(rg) => rg,
            other => panic!("expected range, found {:?}", other.obj_type()),
        }
    }

    pub fn script(&self, r: ObjRef) -> &Script {
        match &self.get(r).kind {
            ObjKind::Script(s) => s,
            other => panic!("expected script, found {:?}", other.obj_type()),
        }
    }

    pub fn script_mut(&mut self, r: ObjRef) -> &mut Script {
        match &mut self.get_mut(r).kind {
            ObjKind::Script(s) => s,
            other => panic!("expected script, found {:?}", other.obj_type()),
        }
    }

    pub fn function(&self, r: ObjRef) -> &Function {
        match &self.get(r).kind {
            ObjKind::Func(f) => f,
            other => panic!("expected function, found {:?}", other.obj_type()),
        }
    }

    pub fn function_mut(&mut self, r: ObjRef) -> &mut Function {
        match &mut self.get_mut(r).kind {
            ObjKind::Func(f) => f,
            other => panic!("expected function, found {:?}", other.obj_type()),
        }
    }

    pub fn fiber(&self, r: ObjRef) -> &Fiber {
        match &self.get(r).kind {
            ObjKind::Fiber(f) => f,
            other => panic!("expected fiber, found {:?}", other.obj_type()),
        }
    }

    pub fn fiber_mut(&mut self, r: ObjRef) -> &mut Fiber {
        match &mut self.get_mut(r).kind {
            ObjKind::Fiber(f) => f,
            other => panic!("expected fiber, found {:?}", other.obj_type()),
        }
    }

    /// Whether the slot behind `r` is still occupied. Meaningful only while
    /// no allocation has reused the slot.
    pub fn contains(&self, r: ObjRef) -> bool {
        r.index() < self.slots.len() && self.slots[r.index()].is_some()
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of collections run so far.
    pub fn collections(&self) -> usize {
        self.collections
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    fn allocate(&mut self, kind: ObjKind) -> ObjRef {
        self.bytes_allocated += object_size_of(&kind);
        if self.bytes_allocated > self.next_gc {
            self.collect();
        }

        let obj = Obj { marked: false, kind };
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(obj);
                ObjRef::new(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef::new((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Intern a copy of `text` with its hash computed eagerly.
    pub fn new_string(&mut self, text: &str) -> ObjRef {
        let hash = hash_bytes(text.as_bytes());
        self.allocate(ObjKind::Str(Str {
            hash,
            data: text.to_string(),
        }))
    }

    /// A new list with capacity for `size` elements.
    pub fn new_list(&mut self, size: usize) -> ObjRef {
        self.allocate(ObjKind::List(List {
            elements: Vec::with_capacity(size),
        }))
    }

    pub fn new_map(&mut self) -> ObjRef {
        self.allocate(ObjKind::Map(Map::default()))
    }

    pub fn new_range(&mut self, from: f64, to: f64) -> ObjRef {
        self.allocate(ObjKind::Range(Range { from, to }))
    }

    /// A new compilation unit with its body function constructed
    /// immediately. The script is temp-rooted across the body allocation.
    pub fn new_script(&mut self, path: &str) -> ObjRef {
        let script = self.allocate(ObjKind::Script(Script {
            path: path.to_string(),
            globals: Vec::new(),
            global_names: Default::default(),
            literals: Vec::new(),
            functions: Vec::new(),
            function_names: Default::default(),
            names: Default::default(),
            body: None,
        }));

        self.push_temp_ref(script);
        let body = self.new_function(SCRIPT_BODY_NAME, Some(script), false);
        self.pop_temp_ref();

        self.script_mut(script).body = Some(body);
        script
    }

    /// A new function. When `owner` is given, the function and its interned
    /// name are appended to the owner's aligned tables.
    pub fn new_function(&mut self, name: &str, owner: Option<ObjRef>, is_native: bool) -> ObjRef {
        let name_ref = self.new_string(name);

        // The name is unreachable until the function holds it.
        self.push_temp_ref(name_ref);
        let kind = if is_native {
            FnKind::Native(None)
        } else {
            FnKind::Scripted(Default::default())
        };
        let func = self.allocate(ObjKind::Func(Function {
            name: name_ref,
            owner,
            arity: crate::object::ARITY_UNINIT,
            kind,
        }));
        self.pop_temp_ref();

        if let Some(owner) = owner {
            let script = self.script_mut(owner);
            script.functions.push(func);
            script.function_names.push(name_ref);
        }
        func
    }

    /// A new fiber prepared to run `func`, with empty stack and frames.
    pub fn new_fiber(&mut self, func: ObjRef) -> ObjRef {
        self.allocate(ObjKind::Fiber(Fiber {
            func,
            stack: Vec::new(),
            sp: 0,
            frames: Vec::new(),
            error: None,
        }))
    }

    // ========================================================================
    // Roots
    // ========================================================================

    /// Protect an object that is not yet reachable from any root.
    pub fn push_temp_ref(&mut self, r: ObjRef) {
        assert!(
            self.temp_roots.len() < MAX_TEMP_ROOTS,
            "too many temporary references"
        );
        self.temp_roots.push(r);
    }

    pub fn pop_temp_ref(&mut self) {
        self.temp_roots.pop().expect("temp reference stack underflow");
    }

    /// Register the object graph the active compiler is building.
    pub fn set_compiler_roots(&mut self, roots: &[ObjRef]) {
        self.compiler_roots.clear();
        self.compiler_roots.extend_from_slice(roots);
    }

    pub fn clear_compiler_roots(&mut self) {
        self.compiler_roots.clear();
    }

    /// Register a persistent root on behalf of the embedder.
    pub fn add_root(&mut self, r: ObjRef) -> RootId {
        match self.persistent_free.pop() {
            Some(id) => {
                self.persistent_roots[id as usize] = Some(r);
                RootId(id)
            }
            None => {
                self.persistent_roots.push(Some(r));
                RootId((self.persistent_roots.len() - 1) as u32)
            }
        }
    }

    pub fn remove_root(&mut self, id: RootId) {
        let slot = &mut self.persistent_roots[id.0 as usize];
        assert!(slot.is_some(), "root removed twice");
        *slot = None;
        self.persistent_free.push(id.0);
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full mark-sweep collection.
    pub fn collect(&mut self) {
        self.collections += 1;
        self.gray.clear();
        self.bytes_allocated = 0;

        // Gray the roots.
        for i in 0..self.temp_roots.len() {
            let r = self.temp_roots[i];
            self.gray_object(r);
        }
        for i in 0..self.compiler_roots.len() {
            let r = self.compiler_roots[i];
            self.gray_object(r);
        }
        for i in 0..self.persistent_roots.len() {
            if let Some(r) = self.persistent_roots[i] {
                self.gray_object(r);
            }
        }

        // Blacken until the worklist drains.
        while let Some(r) = self.gray.pop() {
            self.blacken(r);
        }

        self.sweep();

        self.next_gc = usize::max(
            self.limits.initial_threshold,
            self.bytes_allocated * self.limits.growth_percent / 100,
        );
    }

    /// Mark an object and queue it for scanning. Already-marked objects are
    /// ignored, which is what terminates cycles.
    fn gray_object(&mut self, r: ObjRef) {
        let obj = self.slots[r.index()]
            .as_mut()
            .expect("grayed a freed object");
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(r);
    }

    /// Scan one marked object: account its size and gray everything it
    /// references.
    fn blacken(&mut self, r: ObjRef) {
        debug_assert!(self.scratch.is_empty());

        let obj = self.slots[r.index()].as_ref().expect("blackened a freed object");
        let mut size = mem::size_of::<Obj>();
        match &obj.kind {
            ObjKind::Str(s) => {
                size += s.data.capacity();
            }

            ObjKind::List(l) => {
                for v in &l.elements {
                    if v.is_object() {
                        self.scratch.push(v.as_object());
                    }
                }
                size += l.elements.capacity() * mem::size_of::<Value>();
            }

            ObjKind::Map(m) => {
                for entry in &m.entries {
                    if entry.key.is_undefined() {
                        continue;
                    }
                    if entry.key.is_object() {
                        self.scratch.push(entry.key.as_object());
                    }
                    if entry.value.is_object() {
                        self.scratch.push(entry.value.as_object());
                    }
                }
                size += m.entries.capacity() * mem::size_of::<MapEntry>();
            }

            ObjKind::Range(_) => {}

            ObjKind::Script(s) => {
                for v in &s.globals {
                    if v.is_object() {
                        self.scratch.push(v.as_object());
                    }
                }
                for v in &s.literals {
                    if v.is_object() {
                        self.scratch.push(v.as_object());
                    }
                }
                self.scratch.extend(s.global_names.iter());
                self.scratch.extend(s.functions.iter().copied());
                self.scratch.extend(s.function_names.iter());
                self.scratch.extend(s.names.iter());
                if let Some(body) = s.body {
                    self.scratch.push(body);
                }
                size += s.globals.capacity() * mem::size_of::<Value>()
                    + s.literals.capacity() * mem::size_of::<Value>()
                    + s.functions.capacity() * mem::size_of::<ObjRef>()
                    + (s.global_names.count() + s.function_names.count() + s.names.count())
                        * mem::size_of::<ObjRef>()
                    + s.path.capacity();
            }

            ObjKind::Func(f) => {
                self.scratch.push(f.name);
                if let Some(owner) = f.owner {
                    self.scratch.push(owner);
                }
                if let FnKind::Scripted(code) = &f.kind {
                    size += code.opcodes.capacity()
                        + code.oplines.capacity() * mem::size_of::<u32>();
                }
            }

            ObjKind::Fiber(f) => {
                self.scratch.push(f.func);
                for v in &f.stack[..f.sp] {
                    if v.is_object() {
                        self.scratch.push(v.as_object());
                    }
                }
                for frame in &f.frames {
                    self.scratch.push(frame.func);
                }
                if let Some(error) = f.error {
                    self.scratch.push(error);
                }
                size += f.stack.capacity() * mem::size_of::<Value>()
                    + f.frames.capacity() * mem::size_of::<CallFrame>();
            }
        }

        self.bytes_allocated += size;
        while let Some(child) = self.scratch.pop() {
            self.gray_object(child);
        }
    }

    /// Free everything unmarked and clear the mark on survivors.
    fn sweep(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(obj) if !obj.marked => {
                    *slot = None;
                    self.free.push(index as u32);
                }
                Some(obj) => obj.marked = false,
                None => {}
            }
        }
    }
}

/// Initial size estimate of an object, before any buffer growth.
fn object_size_of(kind: &ObjKind) -> usize {
    let payload = match kind {
        ObjKind::Str(s) => s.data.capacity(),
        ObjKind::List(l) => l.elements.capacity() * mem::size_of::<Value>(),
        ObjKind::Map(m) => m.entries.capacity() * mem::size_of::<MapEntry>(),
        ObjKind::Range(_) => 0,
        ObjKind::Script(s) => s.path.capacity(),
        ObjKind::Func(_) => 0,
        ObjKind::Fiber(f) => f.stack.capacity() * mem::size_of::<Value>(),
    };
    mem::size_of::<Obj>() + payload
}

// ============================================================================
// Tests
// ============================================================================
