// rill-embed - Value conversion traits
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Conversions between host types and Rill values.

use rill_core::value::Value;

use crate::engine::Engine;

/// Convert a host value into a Rill value.
///
/// String conversions allocate on the GC heap; the result is unrooted, so
/// either root it ([`Engine::root`]) or make it reachable before the next
/// allocation.
pub trait IntoValue {
    fn into_value(self, engine: &mut Engine) -> Value;
}

impl IntoValue for bool {
    fn into_value(self, _engine: &mut Engine) -> Value {
        Value::bool(self)
    }
}

impl IntoValue for f64 {
    fn into_value(self, _engine: &mut Engine) -> Value {
        Value::number(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self, _engine: &mut Engine) -> Value {
        Value::number(self as f64)
    }
}

impl IntoValue for &str {
    fn into_value(self, engine: &mut Engine) -> Value {
        engine.vm_mut().var_string(self)
    }
}

impl IntoValue for String {
    fn into_value(self, engine: &mut Engine) -> Value {
        engine.vm_mut().var_string(&self)
    }
}

/// Convert a Rill value back into a host type. Returns `None` on a type
/// mismatch.
pub trait FromValue: Sized {
    fn from_value(engine: &Engine, value: Value) -> Option<Self>;
}

impl FromValue for bool {
    fn from_value(_engine: &Engine, value: Value) -> Option<Self> {
        value.is_bool().then(|| value.as_bool())
    }
}

impl FromValue for f64 {
    fn from_value(_engine: &Engine, value: Value) -> Option<Self> {
        value.is_number().then(|| value.as_number())
    }
}

impl FromValue for String {
    fn from_value(engine: &Engine, value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let heap = &engine.vm().heap;
        match &heap.get(value.as_object()).kind {
            rill_core::object::ObjKind::Str(s) => Some(s.data.clone()),
            _ => None,
        }
    }
}
