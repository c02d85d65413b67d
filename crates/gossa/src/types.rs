//! The type bridge: a mapping from static IR types to runtime behavior.
//!
//! Types are interned in a [`TypeStore`]; the intern map doubles as the
//! cache required for named and externally registered types. Primitive
//! kinds are pre-interned at fixed ids so the rest of the crate can refer
//! to them as constants.

use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::value::{SliceValue, StructValue, Value};

/// Interned type handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct TypeId(u32);

impl TypeId {
    pub const INVALID: Self = Self(0);
    pub const BOOL: Self = Self(1);
    pub const INT: Self = Self(2);
    pub const INT8: Self = Self(3);
    pub const INT16: Self = Self(4);
    pub const INT32: Self = Self(5);
    pub const INT64: Self = Self(6);
    pub const UINT: Self = Self(7);
    pub const UINT8: Self = Self(8);
    pub const UINT16: Self = Self(9);
    pub const UINT32: Self = Self(10);
    pub const UINT64: Self = Self(11);
    pub const FLOAT32: Self = Self(12);
    pub const FLOAT64: Self = Self(13);
    pub const COMPLEX64: Self = Self(14);
    pub const COMPLEX128: Self = Self(15);
    pub const STRING: Self = Self(16);
    pub const INTERFACE: Self = Self(17);
    /// The type of the untyped `nil` literal before assignment context
    /// resolves it.
    pub const UNTYPED_NIL: Self = Self(18);

    pub fn new(index: usize) -> Self {
        Self(index.try_into().expect("type id exceeds u32"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum ChanDir {
    Both,
    Send,
    Recv,
}

/// One declared struct field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct StructField {
    pub name: String,
    pub ty: TypeId,
    pub tag: Option<String>,
    pub embedded: bool,
}

/// Structural description of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum TypeKind {
    Invalid,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    Interface,
    UntypedNil,
    Array { len: u64, elem: TypeId },
    Slice { elem: TypeId },
    Map { key: TypeId, elem: TypeId },
    Chan { dir: ChanDir, elem: TypeId },
    Pointer { elem: TypeId },
    Func { params: Vec<TypeId>, results: Vec<TypeId> },
    Struct { fields: Vec<StructField> },
    Tuple { elems: Vec<TypeId> },
    Named { name: String, underlying: TypeId },
}

/// Interning store of every type a program mentions.
///
/// The `cache` map is the lookup required by the bridge: interning the
/// same structural kind twice returns the original id, and named types
/// registered once keep their identity for the whole program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TypeStore {
    kinds: Vec<TypeKind>,
    cache: ahash::AHashMap<TypeKind, TypeId>,
}

impl Default for TypeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeStore {
    pub fn new() -> Self {
        let mut store = Self {
            kinds: Vec::new(),
            cache: ahash::AHashMap::new(),
        };
        // Pre-interned primitives; order must match the TypeId constants.
        for kind in [
            TypeKind::Invalid,
            TypeKind::Bool,
            TypeKind::Int,
            TypeKind::Int8,
            TypeKind::Int16,
            TypeKind::Int32,
            TypeKind::Int64,
            TypeKind::Uint,
            TypeKind::Uint8,
            TypeKind::Uint16,
            TypeKind::Uint32,
            TypeKind::Uint64,
            TypeKind::Float32,
            TypeKind::Float64,
            TypeKind::Complex64,
            TypeKind::Complex128,
            TypeKind::String,
            TypeKind::Interface,
            TypeKind::UntypedNil,
        ] {
            store.intern(kind);
        }
        debug_assert_eq!(store.kinds.len(), TypeId::UNTYPED_NIL.index() + 1);
        store
    }

    /// Interns a kind, returning the cached id when it was seen before.
    pub fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.cache.get(&kind) {
            return id;
        }
        let id = TypeId::new(self.kinds.len());
        self.kinds.push(kind.clone());
        self.cache.insert(kind, id);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    /// Resolves named types to their underlying structural kind.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            TypeKind::Named { underlying, .. } => self.underlying(*underlying),
            _ => id,
        }
    }

    /// Pointer element type; identity for non-pointers.
    pub fn deref(&self, id: TypeId) -> TypeId {
        match self.get(self.underlying(id)) {
            TypeKind::Pointer { elem } => *elem,
            _ => id,
        }
    }

    pub fn slice_of(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Slice { elem })
    }

    pub fn pointer_to(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer { elem })
    }

    pub fn tuple_of(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Tuple { elems })
    }

    /// Element type of an indexable or channel type; `INVALID` otherwise.
    pub fn elem(&self, id: TypeId) -> TypeId {
        match self.get(self.underlying(id)) {
            TypeKind::Array { elem, .. }
            | TypeKind::Slice { elem }
            | TypeKind::Map { elem, .. }
            | TypeKind::Chan { elem, .. }
            | TypeKind::Pointer { elem } => *elem,
            TypeKind::String => TypeId::UINT8,
            _ => TypeId::INVALID,
        }
    }

    /// The default value of a type, as required for every local alloc,
    /// global initialisation, and non-chosen comma-ok slot.
    pub fn zero(&self, id: TypeId) -> Value {
        match self.get(self.underlying(id)) {
            TypeKind::Bool => Value::Bool(false),
            TypeKind::Int | TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => Value::Int(0),
            TypeKind::Uint | TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64 => Value::Uint(0),
            TypeKind::Float32 | TypeKind::Float64 => Value::Float(0.0),
            TypeKind::String => Value::str(""),
            TypeKind::Array { len, elem } => {
                let zeros = (0..*len).map(|_| self.zero(*elem)).collect::<Vec<_>>();
                Value::Array(std::sync::Arc::new(zeros))
            }
            TypeKind::Struct { fields } => {
                let zeros = fields.iter().map(|f| self.zero(f.ty)).collect::<Vec<_>>();
                Value::Struct(StructValue::new(id, zeros))
            }
            TypeKind::Tuple { elems } => {
                let zeros = elems.iter().map(|&t| self.zero(t)).collect::<Vec<_>>();
                Value::Tuple(std::sync::Arc::new(zeros))
            }
            // the complex kinds exist in the bridge's primitive table but
            // have no value representation; the front end rejects them
            TypeKind::Complex64 | TypeKind::Complex128 => {
                unreachable!("complex kinds are rejected at build time")
            }
            // chan, func, map, pointer, interface, slice: the zero reference
            _ => Value::Nil,
        }
    }

    /// Converts `v` to type `target`. A nil value converts to the zero of
    /// the target; otherwise the host representation is converted.
    pub fn conv(&self, v: &Value, target: TypeId) -> Value {
        if v.is_nil() {
            return self.zero(target);
        }
        match self.get(self.underlying(target)) {
            TypeKind::Bool => v.clone(),
            TypeKind::Int => Value::Int(to_i64(v)),
            TypeKind::Int8 => Value::Int(to_i64(v) as i8 as i64),
            TypeKind::Int16 => Value::Int(to_i64(v) as i16 as i64),
            TypeKind::Int32 => Value::Int(to_i64(v) as i32 as i64),
            TypeKind::Int64 => Value::Int(to_i64(v)),
            TypeKind::Uint | TypeKind::Uint64 => Value::Uint(to_u64(v)),
            TypeKind::Uint8 => Value::Uint(to_u64(v) & 0xff),
            TypeKind::Uint16 => Value::Uint(to_u64(v) & 0xffff),
            TypeKind::Uint32 => Value::Uint(to_u64(v) & 0xffff_ffff),
            TypeKind::Float32 => Value::Float(f64::from(to_f64(v) as f32)),
            TypeKind::Float64 => Value::Float(to_f64(v)),
            TypeKind::String => Value::str(to_string_repr(v)),
            TypeKind::Slice { elem } => match (v, self.get(self.underlying(*elem))) {
                (Value::Str(s), TypeKind::Uint8) => {
                    let bytes = s.bytes().map(|b| Value::Uint(u64::from(b))).collect::<Vec<_>>();
                    Value::Slice(SliceValue::from_values(bytes))
                }
                (Value::Str(s), TypeKind::Int32) => {
                    let runes = s.chars().map(|c| Value::Int(i64::from(u32::from(c)))).collect::<Vec<_>>();
                    Value::Slice(SliceValue::from_values(runes))
                }
                _ => v.clone(),
            },
            TypeKind::Complex64 | TypeKind::Complex128 => {
                unreachable!("complex kinds are rejected at build time")
            }
            // interface targets and shape-identical aggregates pass through
            _ => v.clone(),
        }
    }

    /// Whether a runtime value's dynamic type is assignable to `target`.
    /// Drives `TypeAssert`.
    pub fn assignable(&self, v: &Value, target: TypeId) -> bool {
        let under = self.underlying(target);
        match self.get(under) {
            TypeKind::Interface => true,
            TypeKind::Bool => matches!(v, Value::Bool(_)),
            TypeKind::Int | TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => {
                matches!(v, Value::Int(_))
            }
            TypeKind::Uint | TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64 => {
                matches!(v, Value::Uint(_))
            }
            TypeKind::Float32 | TypeKind::Float64 => matches!(v, Value::Float(_)),
            TypeKind::String => matches!(v, Value::Str(_)),
            TypeKind::Array { .. } => matches!(v, Value::Array(_)),
            TypeKind::Slice { .. } => matches!(v, Value::Slice(_)),
            TypeKind::Map { .. } => matches!(v, Value::Map(_)),
            TypeKind::Chan { .. } => matches!(v, Value::Chan(_)),
            TypeKind::Pointer { .. } => matches!(v, Value::Pointer(_)),
            TypeKind::Func { .. } => matches!(v, Value::Func(_) | Value::ExternFunc(_)),
            TypeKind::Struct { .. } => match v {
                Value::Struct(s) => self.underlying(s.ty) == under,
                _ => false,
            },
            _ => false,
        }
    }

    /// Source-like spelling of a type, used in panic messages and
    /// completion entries.
    pub fn name(&self, id: TypeId) -> String {
        match self.get(id) {
            TypeKind::Invalid => "invalid".to_owned(),
            TypeKind::Bool => "bool".to_owned(),
            TypeKind::Int => "int".to_owned(),
            TypeKind::Int8 => "int8".to_owned(),
            TypeKind::Int16 => "int16".to_owned(),
            TypeKind::Int32 => "int32".to_owned(),
            TypeKind::Int64 => "int64".to_owned(),
            TypeKind::Uint => "uint".to_owned(),
            TypeKind::Uint8 => "uint8".to_owned(),
            TypeKind::Uint16 => "uint16".to_owned(),
            TypeKind::Uint32 => "uint32".to_owned(),
            TypeKind::Uint64 => "uint64".to_owned(),
            TypeKind::Float32 => "float32".to_owned(),
            TypeKind::Float64 => "float64".to_owned(),
            TypeKind::Complex64 => "complex64".to_owned(),
            TypeKind::Complex128 => "complex128".to_owned(),
            TypeKind::String => "string".to_owned(),
            TypeKind::Interface => "interface {}".to_owned(),
            TypeKind::UntypedNil => "untyped nil".to_owned(),
            TypeKind::Array { len, elem } => format!("[{len}]{}", self.name(*elem)),
            TypeKind::Slice { elem } => format!("[]{}", self.name(*elem)),
            TypeKind::Map { key, elem } => format!("map[{}]{}", self.name(*key), self.name(*elem)),
            TypeKind::Chan { dir, elem } => match dir {
                ChanDir::Both => format!("chan {}", self.name(*elem)),
                ChanDir::Send => format!("chan<- {}", self.name(*elem)),
                ChanDir::Recv => format!("<-chan {}", self.name(*elem)),
            },
            TypeKind::Pointer { elem } => format!("*{}", self.name(*elem)),
            TypeKind::Func { params, results } => {
                let params = params.iter().map(|&t| self.name(t)).collect::<Vec<_>>().join(", ");
                match results.len() {
                    0 => format!("func({params})"),
                    1 => format!("func({params}) {}", self.name(results[0])),
                    _ => {
                        let rs = results.iter().map(|&t| self.name(t)).collect::<Vec<_>>().join(", ");
                        format!("func({params}) ({rs})")
                    }
                }
            }
            TypeKind::Struct { fields } => {
                let fs = fields
                    .iter()
                    .map(|f| format!("{} {}", f.name, self.name(f.ty)))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("struct {{ {fs} }}")
            }
            TypeKind::Tuple { elems } => {
                let ts = elems.iter().map(|&t| self.name(t)).collect::<Vec<_>>().join(", ");
                format!("({ts})")
            }
            TypeKind::Named { name, .. } => name.clone(),
        }
    }

    /// Whether values of this type are nilable (chan, func, map, pointer,
    /// interface, slice).
    pub fn nilable(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.underlying(id)),
            TypeKind::Slice { .. }
                | TypeKind::Map { .. }
                | TypeKind::Chan { .. }
                | TypeKind::Pointer { .. }
                | TypeKind::Func { .. }
                | TypeKind::Interface
                | TypeKind::UntypedNil
        )
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.underlying(id)),
            TypeKind::Int
                | TypeKind::Int8
                | TypeKind::Int16
                | TypeKind::Int32
                | TypeKind::Int64
                | TypeKind::Uint
                | TypeKind::Uint8
                | TypeKind::Uint16
                | TypeKind::Uint32
                | TypeKind::Uint64
                | TypeKind::Float32
                | TypeKind::Float64
        )
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.is_numeric(id) && !matches!(self.get(self.underlying(id)), TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.get(self.underlying(id)), TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        matches!(
            self.get(self.underlying(id)),
            TypeKind::Uint | TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64
        )
    }

    pub fn is_string(&self, id: TypeId) -> bool {
        matches!(self.get(self.underlying(id)), TypeKind::String)
    }

    pub fn is_interface(&self, id: TypeId) -> bool {
        matches!(self.get(self.underlying(id)), TypeKind::Interface)
    }
}

fn to_i64(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Uint(u) => *u as i64,
        Value::Float(f) => f.to_i64().unwrap_or_else(|| if *f < 0.0 { i64::MIN } else { i64::MAX }),
        Value::Bool(b) => i64::from(*b),
        _ => 0,
    }
}

fn to_u64(v: &Value) -> u64 {
    match v {
        Value::Int(i) => *i as u64,
        Value::Uint(u) => *u,
        Value::Float(f) => f.to_u64().unwrap_or(if *f < 0.0 { 0 } else { u64::MAX }),
        Value::Bool(b) => u64::from(*b),
        _ => 0,
    }
}

fn to_f64(v: &Value) -> f64 {
    match v {
        Value::Int(i) => *i as f64,
        Value::Uint(u) => *u as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

/// String conversion: integers convert as code points, per the source
/// language's `string(rune)` rule.
fn to_string_repr(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        Value::Int(i) => rune_to_string(*i),
        Value::Uint(u) => rune_to_string(*u as i64),
        Value::Slice(s) => {
            let elems = s.snapshot();
            if elems.iter().all(|e| matches!(e, Value::Uint(_))) {
                let bytes = elems
                    .iter()
                    .map(|e| match e {
                        Value::Uint(b) => *b as u8,
                        _ => 0,
                    })
                    .collect::<Vec<_>>();
                String::from_utf8_lossy(&bytes).into_owned()
            } else {
                elems
                    .iter()
                    .map(|e| match e {
                        Value::Int(r) => rune_to_string(*r),
                        _ => String::new(),
                    })
                    .collect()
            }
        }
        other => other.to_string(),
    }
}

fn rune_to_string(code: i64) -> String {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_cached() {
        let mut store = TypeStore::new();
        let a = store.slice_of(TypeId::INT);
        let b = store.slice_of(TypeId::INT);
        assert_eq!(a, b);
    }

    #[test]
    fn named_underlying_resolution() {
        let mut store = TypeStore::new();
        let celsius = store.intern(TypeKind::Named {
            name: "Celsius".to_owned(),
            underlying: TypeId::FLOAT64,
        });
        assert_eq!(store.underlying(celsius), TypeId::FLOAT64);
        assert!(store.is_float(celsius));
    }

    #[test]
    fn zero_is_idempotent_under_conv() {
        let mut store = TypeStore::new();
        let tys = vec![
            TypeId::BOOL,
            TypeId::INT,
            TypeId::UINT8,
            TypeId::FLOAT64,
            TypeId::STRING,
            TypeId::INTERFACE,
            store.slice_of(TypeId::INT),
            store.pointer_to(TypeId::STRING),
            store.intern(TypeKind::Map {
                key: TypeId::STRING,
                elem: TypeId::INT,
            }),
            store.intern(TypeKind::Chan {
                dir: ChanDir::Both,
                elem: TypeId::INT,
            }),
        ];
        for ty in tys {
            let zero = store.zero(ty);
            let again = store.conv(&zero, ty);
            assert!(zero.value_eq(&again).unwrap_or(false), "zero not stable for {}", store.name(ty));
        }
    }

    #[test]
    fn string_byte_slice_round_trip() {
        let mut store = TypeStore::new();
        let bytes_ty = store.slice_of(TypeId::UINT8);
        let s = Value::str("go");
        let bytes = store.conv(&s, bytes_ty);
        let back = store.conv(&bytes, TypeId::STRING);
        assert!(back.value_eq(&s).unwrap());
    }

    #[test]
    fn int_narrowing_wraps() {
        let store = TypeStore::new();
        let v = store.conv(&Value::Int(300), TypeId::INT8);
        assert!(v.value_eq(&Value::Int(44)).unwrap());
    }
}
