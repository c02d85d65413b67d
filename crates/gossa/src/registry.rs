//! Process-wide catalog of host packages.
//!
//! Hosts register packages during initialisation; scripts import them by
//! path (or pick them up through auto-import by package name). Each
//! package contributes named objects: functions, addressable variables,
//! constants, and types with method tables. The registry is read-only
//! during script execution.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    object::{Object, value_from_object},
    value::Value,
};

/// Host function signature. The error string becomes a script panic.
pub type HostFn = Arc<dyn Fn(&[Object]) -> Result<Object, String> + Send + Sync>;

/// A host function plus the parameter type names used for completion
/// snippets.
#[derive(Clone)]
pub(crate) struct HostFunc {
    pub params: Vec<String>,
    pub f: HostFn,
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("params", &self.params).finish_non_exhaustive()
    }
}

/// An externally registered type: an opaque named type with methods.
#[derive(Debug)]
pub(crate) struct ExternType {
    pub methods: IndexMap<String, HostFunc>,
}

#[derive(Debug)]
pub(crate) enum ExternKind {
    Function(HostFunc),
    Var(RwLock<Value>),
    Const(Value),
    Type(ExternType),
}

/// One named object contributed by a host package.
#[derive(Debug)]
pub struct ExternObject {
    name: String,
    pub(crate) kind: ExternKind,
}

impl ExternObject {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads external variable storage; `None` for non-variables.
    pub(crate) fn var_load(&self) -> Option<Value> {
        match &self.kind {
            ExternKind::Var(cell) => Some(cell.read().clone()),
            ExternKind::Const(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Writes external variable storage; false for non-assignable objects.
    pub(crate) fn var_store(&self, value: Value) -> bool {
        match &self.kind {
            ExternKind::Var(cell) => {
                *cell.write() = value;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn as_func(&self) -> Option<&HostFunc> {
        match &self.kind {
            ExternKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn method(&self, name: &str) -> Option<HostFunc> {
        match &self.kind {
            ExternKind::Type(t) => t.methods.get(name).cloned(),
            _ => None,
        }
    }
}

/// Builds a function object for [`add_package`].
///
/// `params` are parameter type names, used only for editor completion
/// snippets.
pub fn new_function(
    name: &str,
    params: &[&str],
    f: impl Fn(&[Object]) -> Result<Object, String> + Send + Sync + 'static,
) -> ExternObject {
    ExternObject {
        name: name.to_owned(),
        kind: ExternKind::Function(HostFunc {
            params: params.iter().map(|&p| p.to_owned()).collect(),
            f: Arc::new(f),
        }),
    }
}

/// Builds an addressable variable object. Scripts read and write it
/// through the registry's storage.
///
/// # Panics
/// Panics if the value cannot be represented as a runtime value (host
/// setup error).
pub fn new_var(name: &str, value: Object) -> ExternObject {
    let value = value_from_object(&value).expect("unsupported external variable value");
    ExternObject {
        name: name.to_owned(),
        kind: ExternKind::Var(RwLock::new(value)),
    }
}

/// Builds an immutable constant object.
///
/// # Panics
/// Panics if the value cannot be represented as a runtime value (host
/// setup error).
pub fn new_const(name: &str, value: Object) -> ExternObject {
    let value = value_from_object(&value).expect("unsupported external constant value");
    ExternObject {
        name: name.to_owned(),
        kind: ExternKind::Const(value),
    }
}

/// Builds a type object with the given methods (each built with
/// [`new_function`]).
///
/// # Panics
/// Panics if any entry is not a function object.
pub fn new_type(name: &str, methods: Vec<ExternObject>) -> ExternObject {
    let mut table = IndexMap::new();
    for m in methods {
        match m.kind {
            ExternKind::Function(f) => {
                table.insert(m.name, f);
            }
            _ => panic!("type methods must be function objects"),
        }
    }
    ExternObject {
        name: name.to_owned(),
        kind: ExternKind::Type(ExternType { methods: table }),
    }
}

#[derive(Debug)]
pub(crate) struct PackageEntry {
    pub path: String,
    pub name: String,
    pub objects: IndexMap<String, Arc<ExternObject>>,
}

#[derive(Debug, Default)]
struct Registry {
    /// Packages indexed by import path.
    packages: IndexMap<String, PackageEntry>,
    /// Package name → import path, for auto-import resolution.
    by_name: ahash::AHashMap<String, String>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));

/// Registers a package under `path`, importable as `name`.
///
/// Repeated registration of the same path replaces the earlier entry;
/// registration is expected to happen once, before any program runs.
pub fn add_package(path: &str, name: &str, objects: Vec<ExternObject>) {
    let mut objs = IndexMap::new();
    for obj in objects {
        objs.insert(obj.name.clone(), Arc::new(obj));
    }
    let mut registry = REGISTRY.write();
    registry.by_name.insert(name.to_owned(), path.to_owned());
    registry.packages.insert(
        path.to_owned(),
        PackageEntry {
            path: path.to_owned(),
            name: name.to_owned(),
            objects: objs,
        },
    );
}

/// Looks up `pkg.sym` where `pkg` may be an import path or a package name.
pub(crate) fn lookup_object(pkg: &str, sym: &str) -> Option<Arc<ExternObject>> {
    let registry = REGISTRY.read();
    let path = if registry.packages.contains_key(pkg) {
        pkg.to_owned()
    } else {
        registry.by_name.get(pkg)?.clone()
    };
    registry.packages.get(&path)?.objects.get(sym).cloned()
}

/// Resolves a package name to its import path, for auto-import.
pub(crate) fn package_path(name: &str) -> Option<String> {
    let registry = REGISTRY.read();
    if registry.packages.contains_key(name) {
        return Some(name.to_owned());
    }
    registry.by_name.get(name).cloned()
}

/// Finds a method on a registered type by the type's qualified name
/// (`"pkg.Type"`).
pub(crate) fn find_type_method(type_name: &str, method: &str) -> Option<HostFunc> {
    let (pkg, ty) = type_name.rsplit_once('.')?;
    let registry = REGISTRY.read();
    let path = if registry.packages.contains_key(pkg) {
        pkg.to_owned()
    } else {
        registry.by_name.get(pkg)?.clone()
    };
    registry.packages.get(&path)?.objects.get(ty)?.method(method)
}

/// Completion entry kind, mirroring the registry object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    Function,
    Variable,
    Constant,
    Type,
}

/// How an editor should treat the insert text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertTextRule {
    None,
    InsertAsSnippet,
}

/// One editor-completion entry flattened from the registry.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub label: String,
    pub kind: KeywordKind,
    pub insert_text: String,
    pub insert_text_rules: InsertTextRule,
}

/// Flattens the registry into completion entries of the form `pkg.sym`.
/// Function entries render as snippets `pkg.sym(${1:T1},${2:T2},…)`.
#[must_use]
pub fn keywords() -> Vec<Keyword> {
    let registry = REGISTRY.read();
    let mut out = Vec::new();
    for pkg in registry.packages.values() {
        for obj in pkg.objects.values() {
            let label = format!("{}.{}", pkg.name, obj.name);
            let entry = match &obj.kind {
                ExternKind::Function(f) => {
                    let holes = f
                        .params
                        .iter()
                        .enumerate()
                        .map(|(i, p)| format!("${{{}:{}}}", i + 1, p))
                        .collect::<Vec<_>>()
                        .join(",");
                    Keyword {
                        insert_text: format!("{label}({holes})"),
                        label,
                        kind: KeywordKind::Function,
                        insert_text_rules: InsertTextRule::InsertAsSnippet,
                    }
                }
                ExternKind::Var(_) => Keyword {
                    insert_text: label.clone(),
                    label,
                    kind: KeywordKind::Variable,
                    insert_text_rules: InsertTextRule::None,
                },
                ExternKind::Const(_) => Keyword {
                    insert_text: label.clone(),
                    label,
                    kind: KeywordKind::Constant,
                    insert_text_rules: InsertTextRule::None,
                },
                ExternKind::Type(_) => Keyword {
                    insert_text: label.clone(),
                    label,
                    kind: KeywordKind::Type,
                    insert_text_rules: InsertTextRule::None,
                },
            };
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_snippet_rendering() {
        add_package(
            "kwtest/strings",
            "kwstrings",
            vec![new_function("Repeat", &["string", "int"], |_| Ok(Object::Nil))],
        );
        let entries = keywords();
        let entry = entries.iter().find(|k| k.label == "kwstrings.Repeat").unwrap();
        assert_eq!(entry.kind, KeywordKind::Function);
        assert_eq!(entry.insert_text, "kwstrings.Repeat(${1:string},${2:int})");
        assert_eq!(entry.insert_text_rules, InsertTextRule::InsertAsSnippet);
    }

    #[test]
    fn lookup_by_name_and_path() {
        add_package("lookup/pkg", "lookuppkg", vec![new_const("Answer", Object::Int(42))]);
        assert!(lookup_object("lookup/pkg", "Answer").is_some());
        assert!(lookup_object("lookuppkg", "Answer").is_some());
        assert!(lookup_object("lookuppkg", "Missing").is_none());
    }

    #[test]
    fn type_method_resolution() {
        add_package(
            "reg/conn",
            "regconn",
            vec![new_type(
                "Conn",
                vec![new_function("Ping", &[], |_| Ok(Object::String("pong".into())))],
            )],
        );
        let method = find_type_method("regconn.Conn", "Ping").unwrap();
        assert_eq!((method.f)(&[]).unwrap(), Object::String("pong".into()));
        assert!(find_type_method("regconn.Conn", "Close").is_none());
    }
}
