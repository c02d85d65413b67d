//! Host-facing values.
//!
//! [`Object`] is the plain data type that crosses the embedding boundary:
//! arguments passed to `run`, results returned from it, and the values
//! host functions receive and produce. Conversion to and from the internal
//! runtime representation happens at the boundary, never inside the
//! interpreter loop.

use std::{any::Any, fmt, sync::Arc};

use crate::{
    error::Error,
    program::Program,
    ssa::FuncId,
    value::{FuncValue, MapKey, MapValue, OpaqueValue, SliceValue, Value},
};

/// A value crossing the host boundary.
#[derive(Debug, Clone)]
pub enum Object {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    /// A slice, snapshotted on the way out.
    List(Vec<Object>),
    /// A map, as key/value pairs in iteration order.
    Map(Vec<(Object, Object)>),
    /// A packed multi-value result, e.g. from a multi-return host function.
    Tuple(Vec<Object>),
    /// A script closure the host can invoke.
    Closure(ScriptFunc),
    /// An opaque handle of an externally registered type.
    Opaque(OpaqueObject),
}

impl Object {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => *a >= 0 && *a as u64 == *b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Closure(a), Self::Closure(b)) => a.func == b.func && Arc::ptr_eq(&a.free, &b.free),
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(&a.data, &b.data),
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match value_from_object(self) {
            Ok(v) => write!(f, "{v}"),
            Err(_) => f.write_str("<invalid>"),
        }
    }
}

/// A script closure exported to the host.
///
/// Invoking it packages the arguments as runtime values, runs the
/// underlying SSA function with its captured bindings, and unpacks the
/// result — under a fresh default-deadline context.
#[derive(Clone)]
pub struct ScriptFunc {
    pub(crate) program: Program,
    pub(crate) func: FuncId,
    pub(crate) free: Arc<Vec<Value>>,
}

impl ScriptFunc {
    /// Calls the closure with the given arguments.
    pub fn call(&self, args: &[Object]) -> Result<Object, Error> {
        self.program.invoke_closure(self.func, &self.free, args)
    }
}

impl fmt::Debug for ScriptFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFunc").field("func", &self.func).finish_non_exhaustive()
    }
}

/// An opaque host handle tagged with the qualified name of its registered
/// type (`"pkg.Type"`), which method calls resolve against.
#[derive(Clone)]
pub struct OpaqueObject {
    pub(crate) type_name: Arc<str>,
    pub(crate) data: Arc<dyn Any + Send + Sync>,
}

impl OpaqueObject {
    #[must_use]
    pub fn new(type_name: &str, data: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            type_name: Arc::from(type_name),
            data,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Downcasts the handle to its concrete host type.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.data.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for OpaqueObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueObject")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Converts a host object to a runtime value.
pub(crate) fn value_from_object(obj: &Object) -> Result<Value, String> {
    match obj {
        Object::Nil => Ok(Value::Nil),
        Object::Bool(b) => Ok(Value::Bool(*b)),
        Object::Int(i) => Ok(Value::Int(*i)),
        Object::Uint(u) => Ok(Value::Uint(*u)),
        Object::Float(f) => Ok(Value::Float(*f)),
        Object::String(s) => Ok(Value::str(s)),
        Object::List(items) => {
            let values = items.iter().map(value_from_object).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Slice(SliceValue::from_values(values)))
        }
        Object::Map(pairs) => {
            let map = MapValue::new();
            for (k, v) in pairs {
                let key = MapKey::from_value(&value_from_object(k)?).map_err(|p| p.value.to_string())?;
                map.insert(key, value_from_object(v)?);
            }
            Ok(Value::Map(map))
        }
        Object::Tuple(items) => {
            let values = items.iter().map(value_from_object).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::tuple(values))
        }
        Object::Closure(sf) => Ok(Value::Func(FuncValue {
            func: sf.func,
            free: sf.free.clone(),
        })),
        Object::Opaque(o) => Ok(Value::Opaque(OpaqueValue {
            type_name: o.type_name.clone(),
            data: o.data.clone(),
        })),
    }
}

/// Converts a runtime value back to a host object.
///
/// Channels and iterators become opaque handles; pointers are read
/// through; structs flatten to tuples of their fields.
pub(crate) fn object_from_value(v: &Value, program: &Program) -> Object {
    match v {
        Value::Nil => Object::Nil,
        Value::Bool(b) => Object::Bool(*b),
        Value::Int(i) => Object::Int(*i),
        Value::Uint(u) => Object::Uint(*u),
        Value::Float(f) => Object::Float(*f),
        Value::Str(s) => Object::String(s.to_string()),
        Value::Slice(s) => Object::List(s.snapshot().iter().map(|e| object_from_value(e, program)).collect()),
        Value::Array(values) => Object::List(values.iter().map(|e| object_from_value(e, program)).collect()),
        Value::Struct(s) => Object::Tuple(s.fields().iter().map(|e| object_from_value(e, program)).collect()),
        Value::Map(m) => Object::Map(
            m.pairs()
                .iter()
                .map(|(k, v)| (object_from_value(k, program), object_from_value(v, program)))
                .collect(),
        ),
        Value::Tuple(values) => Object::Tuple(values.iter().map(|e| object_from_value(e, program)).collect()),
        Value::Pointer(place) => match place.load() {
            Ok(inner) => object_from_value(&inner, program),
            Err(_) => Object::Nil,
        },
        Value::Func(fv) => Object::Closure(ScriptFunc {
            program: program.clone(),
            func: fv.func,
            free: fv.free.clone(),
        }),
        Value::ExternFunc(obj) => Object::Opaque(OpaqueObject {
            type_name: Arc::from("func"),
            data: obj.clone(),
        }),
        Value::Chan(c) => Object::Opaque(OpaqueObject {
            type_name: Arc::from("chan"),
            data: Arc::new(c.clone()),
        }),
        Value::Iter(it) => Object::Opaque(OpaqueObject {
            type_name: Arc::from("iterator"),
            data: Arc::new(it.clone()),
        }),
        Value::Opaque(o) => Object::Opaque(OpaqueObject {
            type_name: o.type_name.clone(),
            data: o.data.clone(),
        }),
    }
}
