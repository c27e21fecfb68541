// rill-core - Collector behavior tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Reachability, cycles, and the temp-root discipline.

use rill_core::heap::{Heap, HeapLimits};
use rill_core::value::Value;

fn heap() -> Heap {
    Heap::new(HeapLimits::default())
}

#[test]
fn test_rooted_chain_survives() {
    let mut h = heap();
    let a = h.new_list(0);
    let b = h.new_list(0);
    let c = h.new_list(0);
    h.list_insert(a, 0, Value::object(b));
    h.list_insert(b, 0, Value::object(c));

    let root = h.add_root(a);
    h.collect();

    assert!(h.contains(a));
    assert!(h.contains(b));
    assert!(h.contains(c));
    h.remove_root(root);
}

#[test]
fn test_broken_link_frees_the_tail() {
    let mut h = heap();
    let a = h.new_list(0);
    let b = h.new_list(0);
    let c = h.new_list(0);
    h.list_insert(a, 0, Value::object(b));
    h.list_insert(b, 0, Value::object(c));
    let root = h.add_root(a);

    h.list_remove_at(a, 0);
    h.collect();

    assert!(h.contains(a));
    assert!(!h.contains(b));
    assert!(!h.contains(c));
    h.remove_root(root);
}

#[test]
fn test_unrooted_cycle_is_collected() {
    let mut h = heap();
    let a = h.new_list(0);
    let b = h.new_list(0);
    h.list_insert(a, 0, Value::object(b));
    h.list_insert(b, 0, Value::object(a));

    h.collect();

    assert!(!h.contains(a));
    assert!(!h.contains(b));
}

#[test]
fn test_temp_root_protects_across_allocation() {
    // Collect on every allocation.
    let mut h = Heap::new(HeapLimits {
        initial_threshold: 1,
        growth_percent: 100,
    });

    let a = h.new_list(0);
    h.push_temp_ref(a);
    // This allocation collects; `a` must survive through the temp-root
    // stack.
    let b = h.new_list(0);
    assert!(h.contains(a));

    h.pop_temp_ref();
    let _ = b;

    h.collect();
    assert!(!h.contains(a));
}

#[test]
fn test_map_entries_are_traced() {
    let mut h = heap();
    let m = h.new_map();
    let key = h.new_string("key");
    let value = h.new_list(0);
    h.map_set(m, Value::object(key), Value::object(value));

    let root = h.add_root(m);
    h.collect();
    assert!(h.contains(key));
    assert!(h.contains(value));

    h.map_remove(m, Value::object(key));
    h.collect();
    assert!(!h.contains(value));
    h.remove_root(root);
}

#[test]
fn test_script_graph_is_traced() {
    let mut h = heap();
    let script = h.new_script("main.rill");
    let root = h.add_root(script);

    let f = h.new_function("helper", Some(script), false);
    let lit = h.new_string("literal");
    h.script_mut(script).literals.push(Value::object(lit));
    let global = h.script_add_global(script, "g");

    h.collect();

    assert!(h.contains(script));
    assert!(h.contains(f));
    assert!(h.contains(lit));
    assert!(h.contains(h.script(script).body()));
    assert!(h.contains(h.script(script).global_names.get(global)));
    h.remove_root(root);
}

#[test]
fn test_fiber_stack_is_traced() {
    let mut h = heap();
    let script = h.new_script("main.rill");
    let script_root = h.add_root(script);
    let body = h.script(script).body();

    let fiber = h.new_fiber(body);
    let root = h.add_root(fiber);
    let live = h.new_string("live");
    let dead = h.new_string("dead");
    {
        let f = h.fiber_mut(fiber);
        f.stack.push(Value::object(live));
        f.stack.push(Value::object(dead));
        f.sp = 1; // Only the first slot is live.
    }

    h.collect();
    assert!(h.contains(live));
    assert!(!h.contains(dead));

    h.remove_root(root);
    h.remove_root(script_root);
}

#[test]
fn test_marks_are_cleared_between_collections() {
    let mut h = heap();
    let a = h.new_list(0);
    let root = h.add_root(a);
    h.collect();
    assert!(h.contains(a));

    // If marks leaked between cycles, `a` would survive unrooted.
    h.remove_root(root);
    h.collect();
    assert!(!h.contains(a));
}
