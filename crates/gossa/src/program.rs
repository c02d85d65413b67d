//! The compiled, ready-to-execute unit.
//!
//! `Program` owns the SSA function table, the type store, global storage
//! cells, and the resolved external bindings. Building a program runs
//! every unit's initialisers once; running it spins up a root frame per
//! call, so a single program may be invoked concurrently.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    context::{Context, DEFAULT_TIMEOUT},
    error::Error,
    interp::Interp,
    lower::Lowerer,
    object::{Object, object_from_value, value_from_object},
    parse::parse,
    registry::{self, ExternObject},
    ssa::{ExternalDef, FuncId, Function, GlobalDef, GlobalId},
    tracer::{NoopTracer, VmTracer},
    types::TypeStore,
    value::{Cell, FuncValue, Value},
};

/// The serialisable part of a compiled program. External bindings are
/// stored as paths and re-resolved against the registry on load.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Artifact {
    pub name: String,
    pub main_package: String,
    pub functions: Vec<Function>,
    pub store: TypeStore,
    pub globals: Vec<GlobalDef>,
    pub externals: Vec<ExternalDef>,
    pub init_funcs: Vec<FuncId>,
    pub imports: Vec<String>,
    pub main_funcs: AHashMap<String, FuncId>,
}

/// Shared program state. Global cells are the only mutable part.
#[derive(Debug)]
pub(crate) struct ProgramInner {
    pub name: String,
    pub main_package: String,
    pub functions: Vec<Function>,
    pub store: TypeStore,
    pub globals: Vec<GlobalDef>,
    pub externals: Vec<ExternalDef>,
    pub init_funcs: Vec<FuncId>,
    pub imports: Vec<String>,
    pub main_funcs: AHashMap<String, FuncId>,
    pub global_cells: Vec<Cell>,
    pub global_names: AHashMap<String, GlobalId>,
    pub extern_objects: Vec<Arc<ExternObject>>,
    debugging: AtomicBool,
}

impl ProgramInner {
    pub fn debugging(&self) -> bool {
        self.debugging.load(Ordering::Relaxed)
    }
}

/// A compiled program, cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.inner.name)
            .field("package", &self.inner.main_package)
            .finish_non_exhaustive()
    }
}

impl Program {
    /// Compiles `source` (plus any additional source units in `imports`,
    /// compiled first, in order) and runs every unit's initialisers.
    pub fn build(name: &str, source: &str, imports: &[&str]) -> Result<Self, Error> {
        let mut lowerer = Lowerer::new();
        for src in imports {
            let file = parse(src)?;
            let unit_name = format!("{}.go", file.package);
            lowerer.lower_unit(&file, &unit_name)?;
        }
        let file = parse(source)?;
        lowerer.lower_unit(&file, name)?;
        let lowered = lowerer.finish();
        let artifact = Artifact {
            name: name.to_owned(),
            main_package: lowered.main_package,
            functions: lowered.funcs,
            store: lowered.store,
            globals: lowered.globals,
            externals: lowered.externals,
            init_funcs: lowered.init_funcs,
            imports: lowered.imports,
            main_funcs: lowered.main_funcs,
        };
        Self::assemble(artifact)
    }

    /// Turns an artifact into a live program: resolve external bindings,
    /// allocate zeroed global cells, and run initialisers.
    fn assemble(artifact: Artifact) -> Result<Self, Error> {
        let mut extern_objects = Vec::with_capacity(artifact.externals.len());
        for ext in &artifact.externals {
            let Some(obj) = registry::lookup_object(&ext.pkg, &ext.name) else {
                return Err(Error::build(
                    format!("unresolved external symbol {}.{}", ext.pkg, ext.name),
                    0,
                ));
            };
            extern_objects.push(obj);
        }

        let mut global_cells = Vec::with_capacity(artifact.globals.len());
        let mut global_names = AHashMap::new();
        for (i, global) in artifact.globals.iter().enumerate() {
            global_cells.push(Cell::new(artifact.store.zero(global.ty)));
            let id = GlobalId::new(i);
            global_names.insert(global.name.clone(), id);
            if let Some(bare) = global.name.strip_prefix(&format!("{}.", artifact.main_package)) {
                global_names.insert(bare.to_owned(), id);
            }
        }

        let inner = Arc::new(ProgramInner {
            name: artifact.name,
            main_package: artifact.main_package,
            functions: artifact.functions,
            store: artifact.store,
            globals: artifact.globals,
            externals: artifact.externals,
            init_funcs: artifact.init_funcs,
            imports: artifact.imports,
            main_funcs: artifact.main_funcs,
            global_cells,
            global_names,
            extern_objects,
            debugging: AtomicBool::new(false),
        });
        let program = Self { inner };
        program.run_inits()?;
        Ok(program)
    }

    /// Runs each unit's initialisers in dependency order under a fresh
    /// default-deadline context.
    fn run_inits(&self) -> Result<(), Error> {
        if self.inner.init_funcs.is_empty() {
            return Ok(());
        }
        let ctx = Context::new(DEFAULT_TIMEOUT);
        let mut tracer = NoopTracer;
        let mut interp = Interp::new(&self.inner, &ctx, &mut tracer);
        for &init in &self.inner.init_funcs {
            if let Err(panic) = interp.call(&FuncValue::new(init, Vec::new()), Vec::new(), None) {
                ctx.cancel("init failed");
                return Err(panic.into_error());
            }
        }
        ctx.cancel("init finished");
        Ok(())
    }

    pub(crate) fn from_inner(inner: Arc<ProgramInner>) -> Self {
        Self { inner }
    }

    /// Import paths this program depends on.
    #[must_use]
    pub fn imports(&self) -> &[String] {
        &self.inner.imports
    }

    /// Enables or disables interactive stepping; while set, cancellation
    /// polls are skipped.
    pub fn set_debugging(&self, on: bool) {
        self.inner.debugging.store(on, Ordering::Relaxed);
    }

    /// Synchronous top-level invocation of a named function.
    pub fn run(&self, name: &str, args: &[Object]) -> Result<Object, Error> {
        self.run_with_context(name, args).1
    }

    /// Like [`Self::run`], additionally exposing the invocation's
    /// [`Context`] so output and timeout state survive errors.
    pub fn run_with_context(&self, name: &str, args: &[Object]) -> (Context, Result<Object, Error>) {
        let ctx = Context::new(DEFAULT_TIMEOUT);
        let mut tracer = NoopTracer;
        let result = self.run_in(&ctx, name, args, &mut tracer);
        // release the deadline and stop orphan tasks
        ctx.cancel("run finished");
        (ctx, result)
    }

    /// Like [`Self::run_with_context`] with a caller-chosen deadline
    /// instead of the 10 s default.
    pub fn run_with_timeout(
        &self,
        name: &str,
        args: &[Object],
        timeout: std::time::Duration,
    ) -> (Context, Result<Object, Error>) {
        let ctx = Context::new(timeout);
        let mut tracer = NoopTracer;
        let result = self.run_in(&ctx, name, args, &mut tracer);
        ctx.cancel("run finished");
        (ctx, result)
    }

    /// Runs with a caller-supplied instruction tracer.
    pub fn run_with_tracer(&self, name: &str, args: &[Object], tracer: &mut impl VmTracer) -> Result<Object, Error> {
        let ctx = Context::new(DEFAULT_TIMEOUT);
        let result = self.run_in(&ctx, name, args, tracer);
        ctx.cancel("run finished");
        result
    }

    fn run_in(&self, ctx: &Context, name: &str, args: &[Object], tracer: &mut impl VmTracer) -> Result<Object, Error> {
        let Some(&fid) = self.inner.main_funcs.get(name) else {
            return Err(Error::lookup(format!("function not found: {name}")));
        };
        let params = self.convert_args(fid, args)?;
        let mut interp = Interp::new(&self.inner, ctx, tracer);
        match interp.call(&FuncValue::new(fid, Vec::new()), params, None) {
            Ok(value) => Ok(object_from_value(&value, self)),
            Err(panic) => Err(panic.into_error()),
        }
    }

    fn convert_args(&self, fid: FuncId, args: &[Object]) -> Result<Vec<Value>, Error> {
        let func = &self.inner.functions[fid.index()];
        if func.params.len() != args.len() {
            return Err(Error::runtime(format!(
                "wrong number of arguments for {}: want {}, got {}",
                func.name,
                func.params.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(func.params.iter())
            .map(|(obj, &ty)| {
                let value = value_from_object(obj).map_err(Error::runtime)?;
                Ok(self.inner.store.conv(&value, ty))
            })
            .collect()
    }

    /// Invokes a script closure exported to the host, under a fresh
    /// default-deadline context.
    pub(crate) fn invoke_closure(
        &self,
        func: FuncId,
        free: &Arc<Vec<Value>>,
        args: &[Object],
    ) -> Result<Object, Error> {
        let ctx = Context::new(DEFAULT_TIMEOUT);
        let params = self.convert_args(func, args)?;
        let mut tracer = NoopTracer;
        let mut interp = Interp::new(&self.inner, &ctx, &mut tracer);
        let fv = FuncValue {
            func,
            free: free.clone(),
        };
        let result = match interp.call(&fv, params, None) {
            Ok(value) => Ok(object_from_value(&value, self)),
            Err(panic) => Err(panic.into_error()),
        };
        ctx.cancel("run finished");
        result
    }

    /// Replaces the storage of a named global. Main-package globals may
    /// be addressed by bare name, all globals by `pkg.name`.
    pub fn set_global_value(&self, name: &str, value: Object) -> Result<(), Error> {
        let Some(&id) = self.inner.global_names.get(name) else {
            return Err(Error::lookup(format!("global not found: {name}")));
        };
        let value = value_from_object(&value).map_err(Error::runtime)?;
        let ty = self.inner.globals[id.index()].ty;
        self.inner.global_cells[id.index()].store(self.inner.store.conv(&value, ty));
        Ok(())
    }

    /// Serialises the compiled program. Global values and external
    /// bindings are not part of the image; [`Self::load`] re-resolves
    /// bindings and re-runs initialisation.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        let inner = &self.inner;
        let view = ArtifactRef {
            name: &inner.name,
            main_package: &inner.main_package,
            functions: &inner.functions,
            store: &inner.store,
            globals: &inner.globals,
            externals: &inner.externals,
            init_funcs: &inner.init_funcs,
            imports: &inner.imports,
            main_funcs: &inner.main_funcs,
        };
        postcard::to_allocvec(&view)
    }

    /// Restores a program serialised with [`Self::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, Error> {
        let artifact: Artifact =
            postcard::from_bytes(bytes).map_err(|e| Error::build(format!("invalid program image: {e}"), 0))?;
        Self::assemble(artifact)
    }
}

/// Serialisation view over [`ProgramInner`]; field order must match
/// [`Artifact`].
#[derive(Serialize)]
struct ArtifactRef<'a> {
    name: &'a str,
    main_package: &'a str,
    functions: &'a [Function],
    store: &'a TypeStore,
    globals: &'a [GlobalDef],
    externals: &'a [ExternalDef],
    init_funcs: &'a [FuncId],
    imports: &'a [String],
    main_funcs: &'a AHashMap<String, FuncId>,
}

/// Convenience: build and run in one step.
pub fn run(source: &str, name: &str, args: &[Object]) -> Result<Object, Error> {
    let program = Program::build("main.go", source, &[])?;
    program.run(name, args)
}
