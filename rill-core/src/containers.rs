// rill-core - Container operations and value utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Heap-level container operations.
//!
//! Lists and maps hold [`Value`]s whose hashing and equality need the heap
//! (string bytes, range endpoints live behind [`ObjRef`]s), so the
//! operations are methods on [`Heap`] rather than on the container records.
//! Map operations detach the entry array while probing; nothing allocates
//! through the heap while a map is detached.

use std::mem;

use crate::heap::Heap;
use crate::object::{Map, MapEntry, NameTable, ObjKind, ObjRef};
use crate::value::{Value, hash_bits, hash_number};

/// Growth factor for lists and maps.
const GROW_FACTOR: usize = 2;

/// Maximum percentage of live map entries before the table grows.
const MAP_LOAD_PERCENT: usize = 75;

/// Smallest non-empty map capacity.
const MIN_CAPACITY: usize = 8;

/// Where a probe for a key ended up.
enum MapSlot {
    /// Live entry holding the key.
    Found(usize),
    /// Slot to insert into: the first tombstone seen, or the empty slot
    /// that stopped the probe.
    Vacant(usize),
}

impl Heap {
    // ========================================================================
    // Lists
    // ========================================================================

    /// Insert `value` at `index`, shifting everything after it.
    pub fn list_insert(&mut self, r: ObjRef, index: usize, value: Value) {
        self.list_mut(r).elements.insert(index, value);
    }

    /// Remove and return the element at `index`. Capacity is halved when
    /// half of it would still hold the remaining elements.
    pub fn list_remove_at(&mut self, r: ObjRef, index: usize) -> Value {
        let list = self.list_mut(r);
        let count = list.elements.len();
        let removed = list.elements.remove(index);
        if list.elements.capacity() / GROW_FACTOR >= count {
            let target = list.elements.capacity() / GROW_FACTOR;
            list.elements.shrink_to(target);
        }
        removed
    }

    // ========================================================================
    // Maps
    // ========================================================================

    fn take_map(&mut self, r: ObjRef) -> Map {
        match &mut self.get_mut(r).kind {
            ObjKind::Map(m) => mem::take(m),
            other => panic!("expected map, found {:?}", other.obj_type()),
        }
    }

    fn put_map(&mut self, r: ObjRef, map: Map) {
        match &mut self.get_mut(r).kind {
            ObjKind::Map(m) => *m = map,
            other => panic!("expected map, found {:?}", other.obj_type()),
        }
    }

    /// Probe for `key`. `None` when the map has no capacity.
    fn map_find(&self, map: &Map, key: Value) -> Option<MapSlot> {
        if map.capacity() == 0 {
            return None;
        }

        let start = self.hash_value(key) as usize % map.capacity();
        let mut index = start;
        let mut tombstone = None;

        loop {
            let entry = &map.entries[index];

            if entry.key.is_undefined() {
                debug_assert!(entry.value.is_bool());
                if entry.value.is_same(Value::TRUE) {
                    // Tombstone: remember the first one, keep searching in
                    // case the key is further along the sequence.
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                } else {
                    return Some(MapSlot::Vacant(tombstone.unwrap_or(index)));
                }
            } else if self.values_equal(entry.key, key) {
                return Some(MapSlot::Found(index));
            }

            index = (index + 1) % map.capacity();
            if index == start {
                break;
            }
        }

        // The whole table is live entries and tombstones; insert into the
        // first tombstone.
        Some(MapSlot::Vacant(
            tombstone.expect("probe sequence saw neither key nor vacancy"),
        ))
    }

    /// Store into a map that already has capacity. True when a new entry
    /// was created rather than a value replaced.
    fn map_insert_entry(&self, map: &mut Map, key: Value, value: Value) -> bool {
        match self.map_find(map, key) {
            Some(MapSlot::Found(index)) => {
                map.entries[index].value = value;
                false
            }
            Some(MapSlot::Vacant(index)) => {
                map.entries[index] = MapEntry { key, value };
                true
            }
            None => panic!("insert into a map with no capacity"),
        }
    }

    /// Rebuild the entry array at `capacity`, re-inserting live entries and
    /// dropping tombstones.
    fn map_resize(&self, map: &mut Map, capacity: usize) {
        let old = mem::replace(&mut map.entries, vec![MapEntry::EMPTY; capacity]);
        for entry in old {
            if entry.key.is_undefined() {
                continue;
            }
            self.map_insert_entry(map, entry.key, entry.value);
        }
    }

    /// The value stored under `key`, or undefined on a miss.
    pub fn map_get(&self, r: ObjRef, key: Value) -> Value {
        let map = self.map(r);
        match self.map_find(map, key) {
            Some(MapSlot::Found(index)) => map.entries[index].value,
            _ => Value::UNDEFINED,
        }
    }

    /// Insert or replace. The table grows before an insert that would push
    /// the load factor past the limit.
    pub fn map_set(&mut self, r: ObjRef, key: Value, value: Value) {
        let mut map = self.take_map(r);

        if map.count as usize + 1 > map.capacity() * MAP_LOAD_PERCENT / 100 {
            let capacity = usize::max(map.capacity() * GROW_FACTOR, MIN_CAPACITY);
            self.map_resize(&mut map, capacity);
        }

        if self.map_insert_entry(&mut map, key, value) {
            map.count += 1;
        }

        self.put_map(r, map);
    }

    /// Remove `key`, returning its value, or null if it was absent. The
    /// slot becomes a tombstone; an emptied map drops its table entirely,
    /// and a sparsely used one shrinks.
    pub fn map_remove(&mut self, r: ObjRef, key: Value) -> Value {
        let mut map = self.take_map(r);

        let index = match self.map_find(&map, key) {
            Some(MapSlot::Found(index)) => index,
            _ => {
                self.put_map(r, map);
                return Value::NULL;
            }
        };

        let value = map.entries[index].value;
        map.entries[index] = MapEntry::TOMBSTONE;
        map.count -= 1;

        if map.count == 0 {
            map.entries = Vec::new();
        } else if map.capacity() > MIN_CAPACITY
            && map.capacity() / GROW_FACTOR > map.count as usize * 100 / MAP_LOAD_PERCENT
        {
            let capacity = usize::max(map.capacity() / GROW_FACTOR, MIN_CAPACITY);
            self.map_resize(&mut map, capacity);
        }

        self.put_map(r, map);
        value
    }

    /// Drop every entry and the table itself.
    pub fn map_clear(&mut self, r: ObjRef) {
        match &mut self.get_mut(r).kind {
            ObjKind::Map(m) => {
                m.entries = Vec::new();
                m.count = 0;
            }
            other => panic!("expected map, found {:?}", other.obj_type()),
        }
    }

    // ========================================================================
    // Value identity, equality, hashing
    // ========================================================================

    /// Hash a value. Only immutable values are hashable; anything else as a
    /// map key is a programmer error.
    pub fn hash_value(&self, v: Value) -> u32 {
        if !v.is_object() {
            return hash_bits(v.bits());
        }
        match &self.get(v.as_object()).kind {
            ObjKind::Str(s) => s.hash,
            ObjKind::Range(rg) => hash_number(rg.from) ^ hash_number(rg.to),
            other => panic!("value of type {:?} is not hashable", other.obj_type()),
        }
    }

    /// Structural equality: bitwise identity, or same-typed strings with
    /// equal bytes, or ranges with equal endpoints. Everything else falls
    /// back to identity.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        if a.is_same(b) {
            return true;
        }
        if !a.is_object() || !b.is_object() {
            return false;
        }
        match (&self.get(a.as_object()).kind, &self.get(b.as_object()).kind) {
            (ObjKind::Str(s1), ObjKind::Str(s2)) => {
                s1.hash == s2.hash && s1.data.len() == s2.data.len() && s1.data == s2.data
            }
            (ObjKind::Range(r1), ObjKind::Range(r2)) => r1.from == r2.from && r1.to == r2.to,
            _ => false,
        }
    }

    /// The language-level type name of a value.
    pub fn value_type_name(&self, v: Value) -> &'static str {
        if v.is_null() {
            return "null";
        }
        if v.is_bool() {
            return "bool";
        }
        if v.is_number() {
            return "number";
        }
        debug_assert!(v.is_object());
        match &self.get(v.as_object()).kind {
            ObjKind::Str(_) => "String",
            ObjKind::List(_) => "List",
            ObjKind::Map(_) => "Map",
            ObjKind::Range(_) => "Range",
            ObjKind::Script(_) => "Script",
            ObjKind::Func(_) => "Func",
            ObjKind::Fiber(_) => "Fiber",
        }
    }

    /// Truthiness: false and null are false; numbers by non-zero; strings,
    /// lists, and maps by non-emptiness; every other object is true.
    pub fn value_to_bool(&self, v: Value) -> bool {
        if v.is_bool() {
            return v.as_bool();
        }
        if v.is_null() {
            return false;
        }
        if v.is_number() {
            return v.as_number() != 0.0;
        }
        debug_assert!(v.is_object());
        match &self.get(v.as_object()).kind {
            ObjKind::Str(s) => !s.is_empty(),
            ObjKind::List(l) => !l.elements.is_empty(),
            ObjKind::Map(m) => m.count != 0,
            _ => true,
        }
    }

    // ========================================================================
    // String building
    // ========================================================================

    /// Build a string from `fmt`, replacing `$` with a raw string argument
    /// and `@` with the bytes of a string value. The length is computed in
    /// a first pass so the result is built exactly once.
    pub fn string_format(&mut self, fmt: &str, args: &[FormatArg<'_>]) -> ObjRef {
        let mut total = 0;
        let mut iter = args.iter();
        for c in fmt.chars() {
            match c {
                '$' => match iter.next() {
                    Some(FormatArg::Str(s)) => total += s.len(),
                    _ => panic!("string_format: '$' expects a raw string argument"),
                },
                '@' => match iter.next() {
                    Some(FormatArg::Val(v)) => total += self.str(v.as_object()).len(),
                    _ => panic!("string_format: '@' expects a string value argument"),
                },
                _ => total += c.len_utf8(),
            }
        }

        let mut out = String::with_capacity(total);
        let mut iter = args.iter();
        for c in fmt.chars() {
            match c {
                '$' => {
                    if let Some(FormatArg::Str(s)) = iter.next() {
                        out.push_str(s);
                    }
                }
                '@' => {
                    if let Some(FormatArg::Val(v)) = iter.next() {
                        out.push_str(&self.str(v.as_object()).data);
                    }
                }
                _ => out.push(c),
            }
        }

        self.new_string(&out)
    }

    /// Render a value for display. `recursive` renders strings with quotes,
    /// the way they appear inside list output. The value itself must be
    /// reachable from a root; intermediate strings are protected internally.
    pub fn to_display_string(&mut self, v: Value, recursive: bool) -> ObjRef {
        if v.is_null() {
            return self.new_string("null");
        }
        if v.is_bool() {
            return self.new_string(if v.as_bool() { "true" } else { "false" });
        }
        if v.is_number() {
            return self.new_string(&v.as_number().to_string());
        }

        debug_assert!(v.is_object());
        let r = v.as_object();
        match self.get(r).kind.obj_type() {
            crate::object::ObjType::String => {
                if !recursive {
                    return r;
                }
                self.push_temp_ref(r);
                let quoted = self.string_format("\"@\"", &[FormatArg::Val(v)]);
                self.pop_temp_ref();
                quoted
            }

            crate::object::ObjType::List => {
                let count = self.list(r).elements.len();
                let mut result = self.new_string("[");
                for i in 0..count {
                    let element = self.list(r).elements[i];
                    self.push_temp_ref(result);
                    let element_str = self.to_display_string(element, true);
                    self.push_temp_ref(element_str);

                    let fmt = if i != 0 { "@, @" } else { "@@" };
                    let joined = self.string_format(
                        fmt,
                        &[
                            FormatArg::Val(Value::object(result)),
                            FormatArg::Val(Value::object(element_str)),
                        ],
                    );

                    self.pop_temp_ref();
                    self.pop_temp_ref();
                    result = joined;
                }

                self.push_temp_ref(result);
                let closed = self.string_format("@]", &[FormatArg::Val(Value::object(result))]);
                self.pop_temp_ref();
                closed
            }

            crate::object::ObjType::Map => self.new_string("[Map]"),
            crate::object::ObjType::Range => self.new_string("[Range]"),
            crate::object::ObjType::Script => self.new_string("[Script]"),
            crate::object::ObjType::Function => {
                let name = self.function(r).name;
                self.string_format("[Func:@]", &[FormatArg::Val(Value::object(name))])
            }
            crate::object::ObjType::Fiber => self.new_string("[Fiber]"),
        }
    }

    // ========================================================================
    // Name tables
    // ========================================================================

    /// Index of `name` in `table`, comparing string bytes.
    pub fn find_name(&self, table: &NameTable, name: &str) -> Option<usize> {
        table.iter().position(|r| self.str(r).data == name)
    }

    /// Intern `name` in the script's attribute-name table, returning the
    /// index of the existing match or of a freshly appended entry.
    pub fn script_intern_name(&mut self, script: ObjRef, name: &str) -> usize {
        let existing = {
            let s = self.script(script);
            self.find_name(&s.names, name)
        };
        if let Some(index) = existing {
            return index;
        }
        let name_ref = self.new_string(name);
        self.script_mut(script).names.push(name_ref)
    }

    /// Append a new global slot with its name. The caller has checked that
    /// the name is unbound, which keeps `globals` and `global_names`
    /// aligned.
    pub fn script_add_global(&mut self, script: ObjRef, name: &str) -> usize {
        let name_ref = self.new_string(name);
        let s = self.script_mut(script);
        s.globals.push(Value::NULL);
        s.global_names.push(name_ref)
    }
}

/// One argument to [`Heap::string_format`].
pub enum FormatArg<'a> {
    /// Spliced in for `$`.
    Str(&'a str),
    /// A string value, spliced in for `@`.
    Val(Value),
}

// ============================================================================
// Tests
// ============================================================================
