//! Runtime value representation.
//!
//! [`Value`] is a tagged union over everything a script can touch. Scalars
//! are stored inline; aggregates sit behind `Arc` so values are cheap to
//! clone and safe to share across tasks. Mutable aggregates (slice backing
//! stores, maps, storage cells) add a `parking_lot` lock.
//!
//! Addressability is explicit: a pointer value wraps a [`Place`], which is
//! either a named storage [`Cell`], a slice element, a struct field
//! projection, or an external variable whose storage lives in the registry.

use std::{
    any::Any,
    fmt,
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::{
    chan::ChanValue,
    error::{Panic, RunResult},
    registry::ExternObject,
    ssa::FuncId,
    types::TypeId,
};

/// A single-slot mutable holder for a value.
///
/// Every script-level variable (stack local, heap alloc, global) lives in
/// a cell; pointer values alias cells without owning them.
#[derive(Debug, Clone)]
pub(crate) struct Cell(Arc<RwLock<Value>>);

impl Cell {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn load(&self) -> Value {
        self.0.read().clone()
    }

    pub fn store(&self, value: Value) {
        *self.0.write() = value;
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// Backing store shared by every slice view over the same allocation.
pub(crate) type SliceData = Arc<RwLock<Vec<Value>>>;

/// An addressable location.
#[derive(Debug, Clone)]
pub(crate) enum Place {
    /// A named storage cell (local, heap alloc, or global).
    Cell(Cell),
    /// One element of a slice backing store.
    Elem { data: SliceData, index: usize },
    /// A field or array-element projection through another place. Loads
    /// copy the aggregate out; stores read-modify-write the base.
    Field { base: Box<Place>, index: usize },
    /// Host-side storage of a registered external variable.
    Extern(Arc<ExternObject>),
}

impl Place {
    pub fn load(&self) -> RunResult<Value> {
        match self {
            Self::Cell(cell) => Ok(cell.load()),
            Self::Elem { data, index } => data
                .read()
                .get(*index)
                .cloned()
                .ok_or_else(|| Panic::msg("runtime error: invalid slice element address")),
            Self::Field { base, index } => match base.load()? {
                Value::Struct(s) => Ok(s.field(*index)),
                Value::Array(values) => values
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| Panic::msg("runtime error: invalid array element address")),
                other => Err(Panic::msg(format!("field access on non-struct {}", other.kind_name()))),
            },
            Self::Extern(obj) => obj
                .var_load()
                .ok_or_else(|| Panic::msg(format!("external symbol {} is not a variable", obj.name()))),
        }
    }

    pub fn store(&self, value: Value) -> RunResult<()> {
        match self {
            Self::Cell(cell) => {
                cell.store(value);
                Ok(())
            }
            Self::Elem { data, index } => {
                let mut guard = data.write();
                match guard.get_mut(*index) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(Panic::msg("runtime error: invalid slice element address")),
                }
            }
            Self::Field { base, index } => match base.load()? {
                Value::Struct(s) => base.store(Value::Struct(s.with_field(*index, value))),
                Value::Array(mut values) => {
                    if *index >= values.len() {
                        return Err(Panic::msg("runtime error: invalid array element address"));
                    }
                    std::sync::Arc::make_mut(&mut values)[*index] = value;
                    base.store(Value::Array(values))
                }
                other => Err(Panic::msg(format!("field access on non-struct {}", other.kind_name()))),
            },
            Self::Extern(obj) => {
                if obj.var_store(value) {
                    Ok(())
                } else {
                    Err(Panic::msg(format!("external symbol {} is not assignable", obj.name())))
                }
            }
        }
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (a, b) {
            (Self::Cell(x), Self::Cell(y)) => Cell::ptr_eq(x, y),
            (Self::Elem { data: dx, index: ix }, Self::Elem { data: dy, index: iy }) => {
                Arc::ptr_eq(dx, dy) && ix == iy
            }
            (Self::Field { base: bx, index: ix }, Self::Field { base: by, index: iy }) => {
                Self::ptr_eq(bx, by) && ix == iy
            }
            (Self::Extern(x), Self::Extern(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }

    fn addr(&self) -> usize {
        match self {
            Self::Cell(cell) => cell.addr(),
            Self::Elem { data, index } => Arc::as_ptr(data) as usize + index,
            Self::Field { base, index } => base.addr() + index + 1,
            Self::Extern(obj) => Arc::as_ptr(obj) as usize,
        }
    }
}

/// A slice: a view (offset, length, capacity) over a shared backing store.
#[derive(Debug, Clone)]
pub(crate) struct SliceValue {
    pub data: SliceData,
    pub off: usize,
    pub len: usize,
    pub cap: usize,
}

impl SliceValue {
    pub fn from_values(values: Vec<Value>) -> Self {
        let len = values.len();
        Self {
            data: Arc::new(RwLock::new(values)),
            off: 0,
            len,
            cap: len,
        }
    }

    pub fn with_zeros(zero: &Value, len: usize, cap: usize) -> Self {
        let cap = cap.max(len);
        let mut values = Vec::with_capacity(cap);
        values.resize(len, zero.clone());
        Self {
            data: Arc::new(RwLock::new(values)),
            off: 0,
            len,
            cap,
        }
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        if index >= self.len {
            return None;
        }
        self.data.read().get(self.off + index).cloned()
    }

    /// Copies the visible elements out.
    pub fn snapshot(&self) -> Vec<Value> {
        let guard = self.data.read();
        guard[self.off..self.off + self.len].to_vec()
    }

    pub fn elem_place(&self, index: usize) -> Place {
        Place::Elem {
            data: self.data.clone(),
            index: self.off + index,
        }
    }

    /// Appends elements, reusing the backing store while capacity allows,
    /// matching the source language's visible-aliasing rules.
    pub fn append(&self, extra: Vec<Value>) -> Self {
        let new_len = self.len + extra.len();
        if new_len <= self.cap {
            let mut guard = self.data.write();
            for (i, value) in extra.into_iter().enumerate() {
                let pos = self.off + self.len + i;
                if pos < guard.len() {
                    guard[pos] = value;
                } else {
                    guard.push(value);
                }
            }
            return Self {
                data: self.data.clone(),
                off: self.off,
                len: new_len,
                cap: self.cap,
            };
        }
        let mut values = self.snapshot();
        values.extend(extra);
        Self::from_values(values)
    }

    /// Reslices `[low:high:max]`; bounds are validated against capacity.
    pub fn reslice(&self, low: usize, high: usize, max: usize) -> RunResult<Self> {
        if low > high || high > max || max > self.cap {
            return Err(Panic::msg("runtime error: slice bounds out of range"));
        }
        Ok(Self {
            data: self.data.clone(),
            off: self.off + low,
            len: high - low,
            cap: max - low,
        })
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.data, &b.data) && a.off == b.off && a.len == b.len
    }
}

/// Hashable key for map values. Only comparable scalar kinds may be keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    /// Bit pattern of the float, so keys hash consistently.
    Float(u64),
    Str(Arc<str>),
}

impl MapKey {
    pub fn from_value(v: &Value) -> RunResult<Self> {
        match v {
            Value::Nil => Ok(Self::Nil),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Uint(u) => Ok(Self::Uint(*u)),
            Value::Float(f) => Ok(Self::Float(f.to_bits())),
            Value::Str(s) => Ok(Self::Str(s.clone())),
            other => Err(Panic::msg(format!(
                "runtime error: hash of unhashable type {}",
                other.kind_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Uint(u) => Value::Uint(*u),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

/// A map value; insertion-ordered so diagnostics are stable.
#[derive(Debug, Clone)]
pub(crate) struct MapValue(Arc<RwLock<IndexMap<MapKey, Value, ahash::RandomState>>>);

impl MapValue {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(IndexMap::with_hasher(ahash::RandomState::new()))))
    }

    pub fn get(&self, key: &MapKey) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    pub fn insert(&self, key: MapKey, value: Value) {
        self.0.write().insert(key, value);
    }

    pub fn remove(&self, key: &MapKey) {
        self.0.write().shift_remove(key);
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Snapshot of the entries at iteration start.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (k.to_value(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// A struct value with value semantics: assignment copies, and mutation
/// through a pointer copies-on-write before storing back.
#[derive(Debug, Clone)]
pub(crate) struct StructValue {
    pub ty: TypeId,
    fields: Arc<Vec<Value>>,
}

impl StructValue {
    pub fn new(ty: TypeId, fields: Vec<Value>) -> Self {
        Self {
            ty,
            fields: Arc::new(fields),
        }
    }

    pub fn field(&self, index: usize) -> Value {
        self.fields[index].clone()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn with_field(&self, index: usize, value: Value) -> Self {
        let mut fields = self.fields.clone();
        Arc::make_mut(&mut fields)[index] = value;
        Self {
            ty: self.ty,
            fields,
        }
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

/// A callable script function, optionally with captured free-variable
/// bindings (pointer values into the defining frame's cells).
#[derive(Debug, Clone)]
pub(crate) struct FuncValue {
    pub func: FuncId,
    pub free: Arc<Vec<Value>>,
}

impl FuncValue {
    pub fn new(func: FuncId, free: Vec<Value>) -> Self {
        Self {
            func,
            free: Arc::new(free),
        }
    }
}

/// A live iterator over a snapshot of key/value pairs.
#[derive(Debug, Clone)]
pub(crate) struct IterValue(Arc<Mutex<IterInner>>);

#[derive(Debug)]
struct IterInner {
    pairs: Vec<(Value, Value)>,
    pos: usize,
}

impl IterValue {
    pub fn new(pairs: Vec<(Value, Value)>) -> Self {
        Self(Arc::new(Mutex::new(IterInner { pairs, pos: 0 })))
    }

    /// Advances the iterator; `None` once exhausted.
    pub fn next(&self) -> Option<(Value, Value)> {
        let mut inner = self.0.lock();
        let pair = inner.pairs.get(inner.pos).cloned();
        if pair.is_some() {
            inner.pos += 1;
        }
        pair
    }
}

/// An opaque host handle carrying the name of its registered type, so
/// method calls can resolve through the registry.
#[derive(Clone)]
pub(crate) struct OpaqueValue {
    pub type_name: Arc<str>,
    pub data: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The polymorphic runtime datum.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    /// Zero reference of every nilable kind (chan, func, map, pointer,
    /// interface, slice).
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(Arc<str>),
    Slice(SliceValue),
    Array(Arc<Vec<Value>>),
    Struct(StructValue),
    Map(MapValue),
    Chan(ChanValue),
    Pointer(Place),
    Func(FuncValue),
    /// A host function contributed through the registry.
    ExternFunc(Arc<ExternObject>),
    /// Packed multi-value result; read with `Extract`.
    Tuple(Arc<Vec<Value>>),
    Iter(IterValue),
    /// Host handle of an externally registered type.
    Opaque(OpaqueValue),
}

impl Default for Value {
    fn default() -> Self {
        Self::Nil
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    pub fn tuple(values: Vec<Self>) -> Self {
        Self::Tuple(Arc::new(values))
    }

    /// True only for the zero reference of nilable kinds.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float64",
            Self::Str(_) => "string",
            Self::Slice(_) => "slice",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Map(_) => "map",
            Self::Chan(_) => "chan",
            Self::Pointer(_) => "pointer",
            Self::Func(_) | Self::ExternFunc(_) => "func",
            Self::Tuple(_) => "tuple",
            Self::Iter(_) => "iterator",
            Self::Opaque(_) => "opaque",
        }
    }

    /// For pointer values, the referent; every other kind is returned
    /// unchanged.
    pub fn elem(&self) -> RunResult<Self> {
        match self {
            Self::Pointer(place) => place.load(),
            Self::Nil => Err(Panic::msg(
                "runtime error: invalid memory address or nil pointer dereference",
            )),
            other => Ok(other.clone()),
        }
    }

    /// Indexes arrays, slices and strings; pointers to arrays are
    /// dereferenced first. Out-of-range indexes panic.
    pub fn index(&self, index: i64) -> RunResult<Self> {
        match self {
            Self::Str(s) => {
                let bytes = s.as_bytes();
                let i = check_index(index, bytes.len())?;
                Ok(Self::Uint(u64::from(bytes[i])))
            }
            Self::Slice(s) => {
                let i = check_index(index, s.len)?;
                s.get(i)
                    .ok_or_else(|| Panic::msg("runtime error: invalid slice element address"))
            }
            Self::Array(values) => {
                let i = check_index(index, values.len())?;
                Ok(values[i].clone())
            }
            Self::Pointer(place) => place.load()?.index(index),
            Self::Nil => {
                check_index(index, 0)?;
                unreachable!("empty bound always rejects")
            }
            other => Err(Panic::msg(format!("runtime error: index of {}", other.kind_name()))),
        }
    }

    /// The i-th declared field of a struct value.
    pub fn field(&self, index: usize) -> RunResult<Self> {
        match self {
            Self::Struct(s) => Ok(s.field(index)),
            Self::Pointer(place) => place.load()?.field(index),
            other => Err(Panic::msg(format!("field access on non-struct {}", other.kind_name()))),
        }
    }

    /// Map lookup; `None` when the key is absent or the map is nil.
    pub fn map_index(&self, key: &MapKey) -> RunResult<Option<Self>> {
        match self {
            Self::Map(m) => Ok(m.get(key)),
            Self::Nil => Ok(None),
            other => Err(Panic::msg(format!("runtime error: lookup in {}", other.kind_name()))),
        }
    }

    pub fn len(&self) -> RunResult<i64> {
        match self {
            Self::Str(s) => Ok(s.len() as i64),
            Self::Slice(s) => Ok(s.len as i64),
            Self::Array(values) => Ok(values.len() as i64),
            Self::Map(m) => Ok(m.len() as i64),
            Self::Chan(c) => Ok(c.len() as i64),
            Self::Nil => Ok(0),
            other => Err(Panic::msg(format!("runtime error: len of {}", other.kind_name()))),
        }
    }

    pub fn cap(&self) -> RunResult<i64> {
        match self {
            Self::Slice(s) => Ok(s.cap as i64),
            Self::Array(values) => Ok(values.len() as i64),
            Self::Chan(c) => Ok(c.capacity() as i64),
            Self::Nil => Ok(0),
            other => Err(Panic::msg(format!("runtime error: cap of {}", other.kind_name()))),
        }
    }

    pub fn expect_bool(&self) -> RunResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(Panic::msg(format!("expected bool, found {}", other.kind_name()))),
        }
    }

    pub fn expect_int(&self) -> RunResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Uint(u) => Ok(*u as i64),
            other => Err(Panic::msg(format!("expected integer, found {}", other.kind_name()))),
        }
    }

    pub fn expect_str(&self) -> RunResult<Arc<str>> {
        match self {
            Self::Str(s) => Ok(s.clone()),
            other => Err(Panic::msg(format!("expected string, found {}", other.kind_name()))),
        }
    }

    /// Equality per the source language: nil-either-side is handled
    /// specially, scalars compare by value, structs and arrays compare
    /// element-wise, references compare by identity. Slices, maps and
    /// functions compare only against nil.
    pub fn value_eq(&self, other: &Self) -> RunResult<bool> {
        match (self, other) {
            (Self::Nil, Self::Nil) => Ok(true),
            (Self::Nil, _) | (_, Self::Nil) => Ok(false),
            (Self::Bool(a), Self::Bool(b)) => Ok(a == b),
            (Self::Int(a), Self::Int(b)) => Ok(a == b),
            (Self::Uint(a), Self::Uint(b)) => Ok(a == b),
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => Ok(*a >= 0 && *a as u64 == *b),
            (Self::Float(a), Self::Float(b)) => Ok(a == b),
            (Self::Str(a), Self::Str(b)) => Ok(a == b),
            (Self::Struct(a), Self::Struct(b)) => {
                if a.field_count() != b.field_count() {
                    return Ok(false);
                }
                for (x, y) in a.fields().iter().zip(b.fields().iter()) {
                    if !x.value_eq(y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Self::Array(a), Self::Array(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b.iter()) {
                    if !x.value_eq(y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Self::Pointer(a), Self::Pointer(b)) => Ok(Place::ptr_eq(a, b)),
            (Self::Chan(a), Self::Chan(b)) => Ok(ChanValue::ptr_eq(a, b)),
            (Self::Opaque(a), Self::Opaque(b)) => Ok(Arc::ptr_eq(&a.data, &b.data)),
            (Self::Slice(_), Self::Slice(_)) => {
                Err(Panic::msg("runtime error: comparing uncomparable type []T"))
            }
            (Self::Map(_), Self::Map(_)) => Err(Panic::msg("runtime error: comparing uncomparable type map")),
            (Self::Func(_) | Self::ExternFunc(_), Self::Func(_) | Self::ExternFunc(_)) => {
                Err(Panic::msg("runtime error: comparing uncomparable type func"))
            }
            _ => Ok(false),
        }
    }
}

fn check_index(index: i64, len: usize) -> RunResult<usize> {
    if index < 0 || index as usize >= len {
        return Err(Panic::msg(format!(
            "runtime error: index out of range [{index}] with length {len}"
        )));
    }
    Ok(index as usize)
}

/// Formats a float the way the source language's default formatter does:
/// integral values print without a fraction, others via ryu.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf".to_owned() } else { "-Inf".to_owned() };
    }
    if f == f.trunc() && f.abs() < 1e15 {
        return format!("{}", f as i64);
    }
    ryu::Buffer::new().format_finite(f).to_owned()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("<nil>"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Str(s) => f.write_str(s),
            Self::Slice(s) => {
                f.write_str("[")?;
                for (i, v) in s.snapshot().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Array(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
            Self::Struct(s) => {
                f.write_str("{")?;
                for (i, v) in s.fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("}")
            }
            Self::Map(m) => {
                f.write_str("map[")?;
                for (i, (k, v)) in m.pairs().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("]")
            }
            Self::Chan(c) => write!(f, "0x{:x}", c.addr()),
            Self::Pointer(p) => write!(f, "0x{:x}", p.addr()),
            Self::Func(fv) => write!(f, "0x{:x}", Arc::as_ptr(&fv.free) as usize),
            Self::ExternFunc(obj) => f.write_str(obj.name()),
            Self::Tuple(values) => {
                f.write_str("(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Self::Iter(_) => f.write_str("<iterator>"),
            Self::Opaque(o) => write!(f, "<{}>", o.type_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_store_and_load() {
        let cell = Cell::new(Value::Int(1));
        cell.store(Value::Int(2));
        assert!(cell.load().value_eq(&Value::Int(2)).unwrap());
    }

    #[test]
    fn slice_append_shares_backing_within_capacity() {
        let s = SliceValue::with_zeros(&Value::Int(0), 1, 4);
        let grown = s.append(vec![Value::Int(7)]);
        assert_eq!(grown.len, 2);
        assert!(Arc::ptr_eq(&s.data, &grown.data));
        let regrown = grown.append(vec![Value::Int(8), Value::Int(9), Value::Int(10)]);
        assert!(!Arc::ptr_eq(&s.data, &regrown.data));
        assert_eq!(regrown.len, 5);
    }

    #[test]
    fn reslice_aliases_base() {
        let s = SliceValue::from_values(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let sub = s.reslice(1, 3, 3).unwrap();
        sub.elem_place(0).store(Value::Int(9)).unwrap();
        assert!(s.get(1).unwrap().value_eq(&Value::Int(9)).unwrap());
    }

    #[test]
    fn index_out_of_range_message() {
        let s = Value::Slice(SliceValue::from_values(vec![Value::Int(1)]));
        let err = s.index(3).unwrap_err();
        assert_eq!(
            err.value.to_string(),
            "runtime error: index out of range [3] with length 1"
        );
    }

    #[test]
    fn struct_mutation_through_place_copies() {
        let a = StructValue::new(TypeId::INVALID, vec![Value::Int(1), Value::Int(2)]);
        let copied = Value::Struct(a.clone());
        let cell = Cell::new(Value::Struct(a));
        let place = Place::Field {
            base: Box::new(Place::Cell(cell.clone())),
            index: 0,
        };
        place.store(Value::Int(9)).unwrap();
        assert!(cell.load().field(0).unwrap().value_eq(&Value::Int(9)).unwrap());
        // the copy taken before the store is unaffected
        assert!(copied.field(0).unwrap().value_eq(&Value::Int(1)).unwrap());
    }

    #[test]
    fn map_iteration_snapshot_is_stable() {
        let m = MapValue::new();
        m.insert(MapKey::Str(Arc::from("a")), Value::Int(1));
        let it = IterValue::new(m.pairs());
        m.insert(MapKey::Str(Arc::from("b")), Value::Int(2));
        assert!(it.next().is_some());
        assert!(it.next().is_none());
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(f64::INFINITY), "+Inf");
    }
}
