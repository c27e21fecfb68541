// rill-core - Heap object records
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Heap object records.
//!
//! Every garbage-collected object shares a common header (type tag via the
//! [`ObjKind`] enum, mark bit) and is addressed by an [`ObjRef`]: the index
//! of its slot in the VM's object table. A live object's slot never changes,
//! so an `ObjRef` doubles as the object's identity.

use crate::value::Value;
use crate::vm::Vm;

/// Reference to a heap object: its slot index in the object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    #[inline]
    pub(crate) fn new(index: u32) -> ObjRef {
        ObjRef(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The closed set of heap object types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    String,
    List,
    Map,
    Range,
    Script,
    Function,
    Fiber,
}

/// A heap object: mark bit plus the typed payload.
#[derive(Debug)]
pub struct Obj {
    pub(crate) marked: bool,
    pub kind: ObjKind,
}

#[derive(Debug)]
pub enum ObjKind {
    Str(Str),
    List(List),
    Map(Map),
    Range(Range),
    Script(Script),
    Func(Function),
    Fiber(Fiber),
}

impl ObjKind {
    pub fn obj_type(&self) -> ObjType {
        match self {
            ObjKind::Str(_) => ObjType::String,
            ObjKind::List(_) => ObjType::List,
            ObjKind::Map(_) => ObjType::Map,
            ObjKind::Range(_) => ObjType::Range,
            ObjKind::Script(_) => ObjType::Script,
            ObjKind::Func(_) => ObjType::Function,
            ObjKind::Fiber(_) => ObjType::Fiber,
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

/// An immutable string with its hash computed eagerly at construction.
#[derive(Debug)]
pub struct Str {
    pub hash: u32,
    pub data: String,
}

impl Str {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A growable list of values.
#[derive(Debug, Default)]
pub struct List {
    pub elements: Vec<Value>,
}

/// One slot of a map's entry array.
///
/// Empty slots have `key == UNDEFINED, value == FALSE`; tombstones have
/// `key == UNDEFINED, value == TRUE`; anything else is a live entry.
#[derive(Debug, Clone, Copy)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

impl MapEntry {
    pub const EMPTY: MapEntry = MapEntry {
        key: Value::UNDEFINED,
        value: Value::FALSE,
    };

    pub const TOMBSTONE: MapEntry = MapEntry {
        key: Value::UNDEFINED,
        value: Value::TRUE,
    };
}

/// An open-addressed hash map with linear probing and tombstones.
#[derive(Debug, Default)]
pub struct Map {
    /// Number of live entries (tombstones excluded).
    pub count: u32,
    /// Entry array; its length is the map's capacity.
    pub entries: Vec<MapEntry>,
}

impl Map {
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// An immutable numeric range, produced by the `..` operator.
#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub from: f64,
    pub to: f64,
}

// ============================================================================
// Name table
// ============================================================================

/// An ordered, deduplicating registry of interned strings.
///
/// Indices are stable for the life of the table and are used directly as
/// bytecode operands. Deduplication itself lives on the heap
/// ([`crate::heap::Heap::find_name`]), which can read the string bytes.
#[derive(Debug, Default)]
pub struct NameTable {
    names: Vec<ObjRef>,
}

impl NameTable {
    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// The interned string at `index`.
    pub fn get(&self, index: usize) -> ObjRef {
        self.names[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.names.iter().copied()
    }

    /// Append without a duplicate check; callers dedup via the heap first.
    pub(crate) fn push(&mut self, name: ObjRef) -> usize {
        self.names.push(name);
        self.names.len() - 1
    }
}

// ============================================================================
// Script & function records
// ============================================================================

/// A compilation unit.
#[derive(Debug)]
pub struct Script {
    /// Path the script was loaded from.
    pub path: String,

    /// Global slots, index-aligned with `global_names`.
    pub globals: Vec<Value>,
    pub global_names: NameTable,

    /// Constant pool, deduplicated, at most 2^16 entries.
    pub literals: Vec<Value>,

    /// Declared functions, index-aligned with `function_names`.
    pub functions: Vec<ObjRef>,
    pub function_names: NameTable,

    /// Interned identifiers referenced by bytecode (attribute names).
    pub names: NameTable,

    /// The function compiled from top-level statements. Set during
    /// construction, before the script is visible to anyone else.
    pub(crate) body: Option<ObjRef>,
}

impl Script {
    /// The top-level body function.
    pub fn body(&self) -> ObjRef {
        self.body.expect("script body is set at construction")
    }
}

/// Compiled bytecode of one scripted function.
#[derive(Debug, Default)]
pub struct Code {
    /// Opcode stream.
    pub opcodes: Vec<u8>,

    /// Source line per opcode byte; same length as `opcodes`.
    pub oplines: Vec<u32>,

    /// Maximum operand-stack slots the function needs, as simulated by
    /// the emitter.
    pub stack_size: u32,
}

/// A host function callable from Rill.
pub type NativeFn = fn(&mut Vm);

#[derive(Debug)]
pub enum FnKind {
    /// Declared with `native`; the host installs the callback later.
    Native(Option<NativeFn>),
    Scripted(Code),
}

/// Arity marker: not yet initialized.
pub const ARITY_UNINIT: i32 = -2;
/// Arity marker: variadic (reserved).
pub const ARITY_VARIADIC: i32 = -1;

/// A function, native or scripted.
#[derive(Debug)]
pub struct Function {
    /// Interned name, owned by the script's function-name table.
    pub name: ObjRef,

    /// Owning script. The collector treats this back reference as strong;
    /// destruction is exclusively sweep-driven, so the cycle is harmless.
    pub owner: Option<ObjRef>,

    /// Declared parameter count, or one of the `ARITY_*` markers.
    pub arity: i32,

    pub kind: FnKind,
}

impl Function {
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FnKind::Native(_))
    }

    /// The bytecode of a scripted function.
    pub fn code(&self) -> &Code {
        match &self.kind {
            FnKind::Scripted(code) => code,
            FnKind::Native(_) => panic!("native function has no code"),
        }
    }

    pub fn code_mut(&mut self) -> &mut Code {
        match &mut self.kind {
            FnKind::Scripted(code) => code,
            FnKind::Native(_) => panic!("native function has no code"),
        }
    }
}

// ============================================================================
// Fibers
// ============================================================================

/// One call frame of a fiber.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub func: ObjRef,
    pub ip: usize,
    /// Stack index of the frame's first slot.
    pub base: usize,
}

/// An execution context: value stack, frames, and error state.
///
/// Fibers are not exercised by the compiler; they exist here because the
/// collector must trace them.
#[derive(Debug)]
pub struct Fiber {
    pub func: ObjRef,
    pub stack: Vec<Value>,
    /// Live extent of `stack`.
    pub sp: usize,
    pub frames: Vec<CallFrame>,
    /// Error message, if the fiber failed.
    pub error: Option<ObjRef>,
}
