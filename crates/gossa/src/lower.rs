//! Lowering: AST → SSA.
//!
//! One pass per source unit: type and constant declarations resolve
//! first, then function signatures, then global variables (whose
//! initialisers become the unit's synthetic `init` function), then
//! function bodies. Expression lowering carries static types, folds
//! constants, and resolves names through the lexical scope stack, unit
//! members, imports, and finally the registry for external packages.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::{
        BinaryOp, Block as AstBlock, ChanDirExpr, CommClause, CompositeElem, ConstDecl, Decl, Expr, File,
        ForRangeStmt, ForStmt, FuncDecl, IfStmt, Param, SelectStmt, Stmt, TypeExpr, UnaryOp, VarDecl,
    },
    error::Error,
    registry,
    ssa::{
        BinOpKind, Block, Builtin, BlockId, CallInstr, Callee, Const, ExternId, ExternalDef, FuncId, Function,
        GlobalDef, GlobalId, Instr, InstrKind, Lit, LocalDef, LocalId, Operand, RegId, SelectCase, UnOpKind,
    },
    types::{ChanDir, StructField, TypeId, TypeKind, TypeStore},
};

/// Compiled output of the lowerer, consumed by `Program`.
#[derive(Debug)]
pub(crate) struct Lowered {
    pub store: TypeStore,
    pub funcs: Vec<Function>,
    pub globals: Vec<GlobalDef>,
    pub externals: Vec<ExternalDef>,
    pub init_funcs: Vec<FuncId>,
    pub imports: Vec<String>,
    pub main_package: String,
    pub main_funcs: AHashMap<String, FuncId>,
}

#[derive(Debug, Clone)]
enum Member {
    Func {
        id: FuncId,
        params: Vec<TypeId>,
        results: Vec<TypeId>,
    },
    Global {
        id: GlobalId,
        ty: TypeId,
    },
    Const(Const),
    Type(TypeId),
}

#[derive(Debug, Clone)]
enum ImportRef {
    /// A previously compiled source unit, by package name.
    Source(String),
    /// A registered external package, by import path.
    Extern(String),
}

#[derive(Debug, Clone)]
enum ScopeEntry {
    Var {
        /// Operand producing the variable's cell pointer.
        ptr: Operand,
        ty: TypeId,
        /// Local slot, for marking escape when the address is taken.
        local: Option<LocalId>,
    },
    Const(Const),
}

#[derive(Debug)]
struct FreeVar {
    name: String,
    ty: TypeId,
    /// Pointer operand in the *enclosing* function's terms; becomes the
    /// MakeClosure binding.
    outer: Operand,
}

#[derive(Debug, Clone, Copy)]
struct LoopCtx {
    cont: BlockId,
    brk: BlockId,
}

#[derive(Debug)]
struct FuncCtx {
    name: String,
    params: Vec<TypeId>,
    results: Vec<TypeId>,
    blocks: Vec<Block>,
    cur: BlockId,
    terminated: bool,
    num_regs: u32,
    locals: Vec<LocalDef>,
    scopes: Vec<AHashMap<String, ScopeEntry>>,
    free: Vec<FreeVar>,
    loops: Vec<LoopCtx>,
    has_defer: bool,
    line: u32,
}

impl FuncCtx {
    fn new(name: String, params: Vec<TypeId>, results: Vec<TypeId>, has_defer: bool, line: u32) -> Self {
        Self {
            name,
            params,
            results,
            blocks: vec![Block::default()],
            cur: BlockId::new(0),
            terminated: false,
            num_regs: 0,
            locals: Vec::new(),
            scopes: vec![AHashMap::new()],
            free: Vec::new(),
            loops: Vec::new(),
            has_defer,
            line,
        }
    }
}

pub(crate) struct Lowerer {
    store: TypeStore,
    funcs: Vec<Function>,
    globals: Vec<GlobalDef>,
    externals: Vec<ExternalDef>,
    extern_ids: AHashMap<(String, String), ExternId>,
    packages: AHashMap<String, AHashMap<String, Member>>,
    init_funcs: Vec<FuncId>,
    imports: Vec<String>,
    // current unit
    pkg: String,
    file: String,
    unit_imports: AHashMap<String, ImportRef>,
    members: AHashMap<String, Member>,
    ctxs: Vec<FuncCtx>,
}

impl Lowerer {
    pub fn new() -> Self {
        Self {
            store: TypeStore::new(),
            funcs: Vec::new(),
            globals: Vec::new(),
            externals: Vec::new(),
            extern_ids: AHashMap::new(),
            packages: AHashMap::new(),
            init_funcs: Vec::new(),
            imports: Vec::new(),
            pkg: String::new(),
            file: String::new(),
            unit_imports: AHashMap::new(),
            members: AHashMap::new(),
            ctxs: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Lowered {
        let mut main_funcs = AHashMap::new();
        for (name, member) in &self.members {
            if let Member::Func { id, .. } = member {
                main_funcs.insert(name.clone(), *id);
            }
        }
        self.imports.sort();
        self.imports.dedup();
        Lowered {
            store: self.store,
            funcs: self.funcs,
            globals: self.globals,
            externals: self.externals,
            init_funcs: self.init_funcs,
            imports: self.imports,
            main_package: self.pkg,
            main_funcs,
        }
    }

    // === unit lowering ===

    pub fn lower_unit(&mut self, file: &File, file_name: &str) -> Result<(), Error> {
        // seal the previous unit's members into the package table
        if !self.pkg.is_empty() {
            let members = std::mem::take(&mut self.members);
            self.packages.insert(self.pkg.clone(), members);
        }
        self.pkg = file.package.clone();
        self.file = file_name.to_owned();
        self.unit_imports = AHashMap::new();

        for import in &file.imports {
            let local = import
                .path
                .rsplit('/')
                .next()
                .unwrap_or(import.path.as_str())
                .to_owned();
            if self.packages.contains_key(&import.path) {
                self.unit_imports.insert(import.path.clone(), ImportRef::Source(import.path.clone()));
            } else if self.packages.contains_key(&local) {
                self.unit_imports.insert(local.clone(), ImportRef::Source(local));
            } else if registry::package_path(&import.path).is_some() {
                self.unit_imports.insert(local, ImportRef::Extern(import.path.clone()));
            } else {
                return Err(Error::build(
                    format!("unresolved import {:?}", import.path),
                    import.line,
                ));
            }
            self.imports.push(import.path.clone());
        }

        // pass 1: types, constants, function signatures
        for decl in &file.decls {
            match decl {
                Decl::Type(td) => {
                    let underlying = self.resolve_type(&td.ty)?;
                    let named = self.store.intern(TypeKind::Named {
                        name: format!("{}.{}", self.pkg, td.name),
                        underlying,
                    });
                    self.members.insert(td.name.clone(), Member::Type(named));
                }
                Decl::Const(cd) => self.lower_const_decl(cd, false)?,
                _ => {}
            }
        }
        for decl in &file.decls {
            if let Decl::Func(fd) = decl {
                let params = fd
                    .params
                    .iter()
                    .map(|p| self.resolve_type(&p.ty))
                    .collect::<Result<Vec<_>, _>>()?;
                let results = fd
                    .results
                    .iter()
                    .map(|t| self.resolve_type(t))
                    .collect::<Result<Vec<_>, _>>()?;
                let id = FuncId::new(self.funcs.len());
                self.funcs.push(placeholder_function(
                    format!("{}.{}", self.pkg, fd.name),
                    &self.pkg,
                    &self.file,
                    params.clone(),
                    results.clone(),
                    fd.line,
                ));
                if fd.name != "init" {
                    self.members.insert(
                        fd.name.clone(),
                        Member::Func {
                            id,
                            params,
                            results,
                        },
                    );
                }
            }
        }

        // pass 2: globals become the unit's synthetic init function
        let has_globals = file.decls.iter().any(|d| matches!(d, Decl::Var(_)));
        if has_globals {
            let init_id = FuncId::new(self.funcs.len());
            self.funcs.push(placeholder_function(
                format!("{}.init", self.pkg),
                &self.pkg,
                &self.file,
                Vec::new(),
                Vec::new(),
                1,
            ));
            self.ctxs.push(FuncCtx::new(
                format!("{}.init", self.pkg),
                Vec::new(),
                Vec::new(),
                false,
                1,
            ));
            for decl in &file.decls {
                if let Decl::Var(vd) = decl {
                    self.lower_global_var(vd)?;
                }
            }
            self.emit(InstrKind::Return { results: SmallVec::new() }, 1);
            self.ctx().terminated = true;
            let ctx = self.ctxs.pop().expect("init ctx");
            self.seal_function(init_id, ctx, None);
            self.init_funcs.push(init_id);
        }

        // pass 3: function bodies (user init functions run after globals)
        let mut next_fn = 0usize;
        for decl in &file.decls {
            if let Decl::Func(fd) = decl {
                let id = self.find_decl_func_id(fd, &mut next_fn);
                self.lower_func_body(id, fd)?;
                if fd.name == "init" {
                    self.init_funcs.push(id);
                }
            }
        }
        Ok(())
    }

    /// Function ids were assigned in declaration order during pass 1.
    fn find_decl_func_id(&self, fd: &FuncDecl, cursor: &mut usize) -> FuncId {
        let name = format!("{}.{}", self.pkg, fd.name);
        let mut i = *cursor;
        loop {
            let func = &self.funcs[i];
            if func.name == name && func.blocks.is_empty() && func.line == fd.line {
                *cursor = i + 1;
                return FuncId::new(i);
            }
            i += 1;
        }
    }

    fn lower_const_decl(&mut self, cd: &ConstDecl, local: bool) -> Result<(), Error> {
        if cd.names.len() != cd.values.len() {
            return Err(Error::build("constant declaration arity mismatch", cd.line));
        }
        for (name, value) in cd.names.iter().zip(cd.values.iter()) {
            let c = self.const_eval(value)?;
            if local {
                self.scope_insert(name.clone(), ScopeEntry::Const(c));
            } else {
                self.members.insert(name.clone(), Member::Const(c));
            }
        }
        Ok(())
    }

    fn lower_global_var(&mut self, vd: &VarDecl) -> Result<(), Error> {
        let line = vd.line;
        let declared = vd.ty.as_ref().map(|t| self.resolve_type(t)).transpose()?;
        if vd.values.is_empty() {
            let ty = declared.ok_or_else(|| Error::build("missing type in variable declaration", line))?;
            for name in &vd.names {
                self.declare_global(name, ty);
            }
            return Ok(());
        }
        if vd.values.len() == vd.names.len() {
            for (name, value) in vd.names.iter().zip(vd.values.iter()) {
                let (mut op, mut ty) = self.expr(value)?;
                if let Some(want) = declared {
                    op = self.coerce(op, ty, want, line)?;
                    ty = want;
                }
                let id = self.declare_global(name, ty);
                self.emit(
                    InstrKind::Store {
                        addr: Operand::Global(id),
                        value: op,
                    },
                    line,
                );
            }
            return Ok(());
        }
        // `var a, b = f()`
        if vd.values.len() == 1 {
            let (tuple, tys) = self.lower_multi_rhs(&vd.values[0], vd.names.len())?;
            for (i, name) in vd.names.iter().enumerate() {
                let value = self.emit_value(
                    InstrKind::Extract {
                        tuple: tuple.clone(),
                        index: i as u32,
                    },
                    line,
                );
                let id = self.declare_global(name, tys[i]);
                self.emit(
                    InstrKind::Store {
                        addr: Operand::Global(id),
                        value,
                    },
                    line,
                );
            }
            return Ok(());
        }
        Err(Error::build("variable declaration arity mismatch", line))
    }

    fn declare_global(&mut self, name: &str, ty: TypeId) -> GlobalId {
        let id = GlobalId::new(self.globals.len());
        self.globals.push(GlobalDef {
            name: format!("{}.{}", self.pkg, name),
            ty,
        });
        self.members.insert(name.to_owned(), Member::Global { id, ty });
        id
    }

    fn lower_func_body(&mut self, id: FuncId, fd: &FuncDecl) -> Result<(), Error> {
        let params = self.funcs[id.index()].params.clone();
        let results = self.funcs[id.index()].results.clone();
        let has_defer = block_defers(&fd.body);
        let mut ctx = FuncCtx::new(
            format!("{}.{}", self.pkg, fd.name),
            params.clone(),
            results,
            has_defer,
            fd.line,
        );
        self.ctxs.push(ctx);
        self.bind_params(&fd.params, &params, fd.line);
        self.lower_block(&fd.body)?;
        self.finish_body(fd.line)?;
        ctx = self.ctxs.pop().expect("function ctx");
        let recover_block = self.maybe_recover_block(&mut ctx);
        debug_assert!(ctx.free.is_empty(), "top-level function captured variables");
        self.seal_function(id, ctx, recover_block);
        Ok(())
    }

    fn bind_params(&mut self, decls: &[Param], tys: &[TypeId], line: u32) {
        for (i, (param, &ty)) in decls.iter().zip(tys.iter()).enumerate() {
            let local = self.new_local(ty);
            let ptr = self.emit_value(
                InstrKind::Alloc {
                    local,
                    heap: false,
                },
                line,
            );
            self.emit(
                InstrKind::Store {
                    addr: ptr.clone(),
                    value: Operand::Param(i as u16),
                },
                line,
            );
            self.scope_insert(
                param.name.clone(),
                ScopeEntry::Var {
                    ptr,
                    ty,
                    local: Some(local),
                },
            );
        }
    }

    /// Implicit return at the end of a body; an error when the function
    /// declares results.
    fn finish_body(&mut self, line: u32) -> Result<(), Error> {
        if self.ctx().terminated {
            return Ok(());
        }
        if !self.ctx().results.is_empty() {
            return Err(Error::build(
                format!("missing return in {}", self.ctx().name),
                line,
            ));
        }
        if self.ctx().has_defer {
            self.emit(InstrKind::RunDefers, line);
        }
        self.emit(InstrKind::Return { results: SmallVec::new() }, line);
        self.ctx().terminated = true;
        Ok(())
    }

    /// Functions that defer get a recover block returning zero results.
    fn maybe_recover_block(&mut self, ctx: &mut FuncCtx) -> Option<BlockId> {
        if !ctx.has_defer {
            return None;
        }
        let rb = BlockId::new(ctx.blocks.len());
        ctx.blocks.push(Block::default());
        let mut results = SmallVec::new();
        let mut zero_instrs = Vec::new();
        for &ty in ctx.results.clone().iter() {
            match self.zero_const(ty) {
                Some(c) => results.push(Operand::Const(c)),
                None => {
                    // aggregate zero: materialise through a fresh cell
                    let local = LocalId::new(ctx.locals.len());
                    ctx.locals.push(LocalDef { ty, heap: true });
                    let ptr = RegId::new(ctx.num_regs as usize);
                    ctx.num_regs += 1;
                    zero_instrs.push(Instr {
                        dst: Some(ptr),
                        line: ctx.line,
                        kind: InstrKind::Alloc { local, heap: true },
                    });
                    let value = RegId::new(ctx.num_regs as usize);
                    ctx.num_regs += 1;
                    zero_instrs.push(Instr {
                        dst: Some(value),
                        line: ctx.line,
                        kind: InstrKind::UnOp {
                            op: UnOpKind::Deref,
                            x: Operand::Reg(ptr),
                            comma_ok: false,
                        },
                    });
                    results.push(Operand::Reg(value));
                }
            }
        }
        let block = &mut ctx.blocks[rb.index()];
        block.instrs.extend(zero_instrs);
        block.instrs.push(Instr {
            dst: None,
            line: ctx.line,
            kind: InstrKind::Return { results },
        });
        Some(rb)
    }

    fn zero_const(&self, ty: TypeId) -> Option<Const> {
        let under = self.store.underlying(ty);
        Some(match self.store.get(under) {
            TypeKind::Bool => Const { ty, lit: Lit::Bool(false) },
            TypeKind::Int | TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64 => {
                Const { ty, lit: Lit::Int(0) }
            }
            TypeKind::Uint | TypeKind::Uint8 | TypeKind::Uint16 | TypeKind::Uint32 | TypeKind::Uint64 => {
                Const { ty, lit: Lit::Uint(0) }
            }
            TypeKind::Float32 | TypeKind::Float64 => Const { ty, lit: Lit::Float(0.0) },
            TypeKind::String => Const { ty, lit: Lit::Str(String::new()) },
            TypeKind::Slice { .. }
            | TypeKind::Map { .. }
            | TypeKind::Chan { .. }
            | TypeKind::Pointer { .. }
            | TypeKind::Func { .. }
            | TypeKind::Interface
            | TypeKind::UntypedNil => Const { ty, lit: Lit::Nil },
            _ => return None,
        })
    }

    fn seal_function(&mut self, id: FuncId, ctx: FuncCtx, recover_block: Option<BlockId>) {
        let func = &mut self.funcs[id.index()];
        func.params = ctx.params;
        func.results = ctx.results;
        func.num_free = ctx.free.len() as u16;
        func.locals = ctx.locals;
        func.blocks = ctx.blocks;
        func.num_regs = ctx.num_regs;
        func.recover_block = recover_block;
    }

    // === emission helpers ===

    fn ctx(&mut self) -> &mut FuncCtx {
        self.ctxs.last_mut().expect("inside a function")
    }

    fn new_local(&mut self, ty: TypeId) -> LocalId {
        let ctx = self.ctx();
        let id = LocalId::new(ctx.locals.len());
        ctx.locals.push(LocalDef { ty, heap: false });
        id
    }

    fn emit(&mut self, kind: InstrKind, line: u32) {
        let ctx = self.ctx();
        let cur = ctx.cur.index();
        ctx.blocks[cur].instrs.push(Instr {
            dst: None,
            line,
            kind,
        });
    }

    fn emit_value(&mut self, kind: InstrKind, line: u32) -> Operand {
        let ctx = self.ctx();
        let reg = RegId::new(ctx.num_regs as usize);
        ctx.num_regs += 1;
        let cur = ctx.cur.index();
        ctx.blocks[cur].instrs.push(Instr {
            dst: Some(reg),
            line,
            kind,
        });
        Operand::Reg(reg)
    }

    fn new_block(&mut self) -> BlockId {
        let ctx = self.ctx();
        let id = BlockId::new(ctx.blocks.len());
        ctx.blocks.push(Block::default());
        id
    }

    fn start_block(&mut self, id: BlockId) {
        let ctx = self.ctx();
        ctx.cur = id;
        ctx.terminated = false;
    }

    fn seal_jump(&mut self, target: BlockId, line: u32) {
        if !self.ctx().terminated {
            self.emit(InstrKind::Jump { target }, line);
            self.ctx().terminated = true;
        }
    }

    fn emit_if(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId, line: u32) {
        self.emit(
            InstrKind::If {
                cond,
                then_block,
                else_block,
            },
            line,
        );
        self.ctx().terminated = true;
    }

    fn scope_insert(&mut self, name: String, entry: ScopeEntry) {
        if name == "_" {
            return;
        }
        self.ctx()
            .scopes
            .last_mut()
            .expect("scope stack never empty")
            .insert(name, entry);
    }

    fn push_scope(&mut self) {
        self.ctx().scopes.push(AHashMap::new());
    }

    fn pop_scope(&mut self) {
        self.ctx().scopes.pop();
    }

    // === name resolution ===

    /// Resolves a name through the scope stacks of the current and
    /// enclosing functions, registering transitive captures on the way.
    fn resolve_local(&mut self, name: &str) -> Option<ScopeEntry> {
        let top = self.ctxs.len().checked_sub(1)?;
        // current function's scopes
        for scope in self.ctxs[top].scopes.iter().rev() {
            if let Some(entry) = scope.get(name) {
                return Some(entry.clone());
            }
        }
        // enclosing functions, innermost first
        for owner in (0..top).rev() {
            let mut found = None;
            for scope in self.ctxs[owner].scopes.iter().rev() {
                if let Some(entry) = scope.get(name) {
                    found = Some(entry.clone());
                    break;
                }
            }
            let Some(entry) = found else { continue };
            let ScopeEntry::Var { ptr, ty, local } = entry else {
                return Some(entry);
            };
            // captured cells must escape the defining frame
            if let Some(local) = local {
                self.ctxs[owner].locals[local.index()].heap = true;
            }
            // thread the capture through every intermediate function
            let mut outer = ptr;
            for mid in owner + 1..=top {
                let existing = self.ctxs[mid].free.iter().position(|f| f.name == name);
                let idx = match existing {
                    Some(idx) => idx,
                    None => {
                        self.ctxs[mid].free.push(FreeVar {
                            name: name.to_owned(),
                            ty,
                            outer,
                        });
                        self.ctxs[mid].free.len() - 1
                    }
                };
                outer = Operand::FreeVar(idx as u16);
            }
            return Some(ScopeEntry::Var {
                ptr: outer,
                ty,
                local: None,
            });
        }
        None
    }

    fn member_of(&self, pkg: &str, name: &str) -> Option<Member> {
        if pkg == self.pkg {
            return self.members.get(name).cloned();
        }
        self.packages.get(pkg)?.get(name).cloned()
    }

    fn extern_operand(&mut self, pkg: &str, name: &str, line: u32) -> Result<(ExternId, std::sync::Arc<registry::ExternObject>), Error> {
        let Some(obj) = registry::lookup_object(pkg, name) else {
            return Err(Error::build(format!("undefined: {pkg}.{name}"), line));
        };
        let key = (pkg.to_owned(), name.to_owned());
        let id = if let Some(&id) = self.extern_ids.get(&key) {
            id
        } else {
            let id = ExternId::new(self.externals.len());
            self.externals.push(ExternalDef {
                pkg: pkg.to_owned(),
                name: name.to_owned(),
            });
            self.extern_ids.insert(key, id);
            id
        };
        Ok((id, obj))
    }

    /// Static type of an external object, inferred from its stored value
    /// kind. Functions and opaque values type as `any`.
    fn extern_type(&mut self, obj: &registry::ExternObject) -> TypeId {
        match obj.var_load() {
            Some(crate::value::Value::Bool(_)) => TypeId::BOOL,
            Some(crate::value::Value::Int(_)) => TypeId::INT,
            Some(crate::value::Value::Uint(_)) => TypeId::UINT,
            Some(crate::value::Value::Float(_)) => TypeId::FLOAT64,
            Some(crate::value::Value::Str(_)) => TypeId::STRING,
            _ => TypeId::INTERFACE,
        }
    }

    // === types ===

    fn resolve_type(&mut self, te: &TypeExpr) -> Result<TypeId, Error> {
        match te {
            TypeExpr::Name { pkg: None, name, line } => {
                let builtin = match name.as_str() {
                    "bool" => Some(TypeId::BOOL),
                    "int" => Some(TypeId::INT),
                    "int8" => Some(TypeId::INT8),
                    "int16" => Some(TypeId::INT16),
                    "int32" | "rune" => Some(TypeId::INT32),
                    "int64" => Some(TypeId::INT64),
                    "uint" => Some(TypeId::UINT),
                    "uint8" | "byte" => Some(TypeId::UINT8),
                    "uint16" => Some(TypeId::UINT16),
                    "uint32" => Some(TypeId::UINT32),
                    "uint64" => Some(TypeId::UINT64),
                    "float32" => Some(TypeId::FLOAT32),
                    "float64" => Some(TypeId::FLOAT64),
                    // the bridge knows the complex kinds, but they have no
                    // value representation here
                    "complex64" | "complex128" => {
                        return Err(Error::build(format!("unsupported type: {name}"), *line));
                    }
                    "string" => Some(TypeId::STRING),
                    "any" | "error" => Some(TypeId::INTERFACE),
                    _ => None,
                };
                if let Some(ty) = builtin {
                    return Ok(ty);
                }
                match self.member_of(&self.pkg.clone(), name) {
                    Some(Member::Type(ty)) => Ok(ty),
                    _ => Err(Error::build(format!("undefined type: {name}"), *line)),
                }
            }
            TypeExpr::Name {
                pkg: Some(pkg),
                name,
                line,
            } => match self.unit_imports.get(pkg).cloned() {
                Some(ImportRef::Source(src)) => match self.member_of(&src, name) {
                    Some(Member::Type(ty)) => Ok(ty),
                    _ => Err(Error::build(format!("undefined type: {pkg}.{name}"), *line)),
                },
                Some(ImportRef::Extern(_)) | None => {
                    // registered external type; auto-import applies
                    if registry::lookup_object(pkg, name).is_none() {
                        return Err(Error::build(format!("undefined type: {pkg}.{name}"), *line));
                    }
                    if !self.unit_imports.contains_key(pkg)
                        && let Some(path) = registry::package_path(pkg)
                    {
                        self.unit_imports.insert(pkg.clone(), ImportRef::Extern(path.clone()));
                        self.imports.push(path);
                    }
                    Ok(self.store.intern(TypeKind::Named {
                        name: format!("{pkg}.{name}"),
                        underlying: TypeId::INTERFACE,
                    }))
                }
            },
            TypeExpr::Slice(elem) => {
                let elem = self.resolve_type(elem)?;
                Ok(self.store.slice_of(elem))
            }
            TypeExpr::Array { len, elem } => {
                let len_const = self.const_eval(len)?;
                let len = match len_const.lit {
                    Lit::Int(n) if n >= 0 => n as u64,
                    _ => return Err(Error::build("array length must be a constant integer", len.line())),
                };
                let elem = self.resolve_type(elem)?;
                Ok(self.store.intern(TypeKind::Array { len, elem }))
            }
            TypeExpr::Map { key, value } => {
                let key = self.resolve_type(key)?;
                let elem = self.resolve_type(value)?;
                Ok(self.store.intern(TypeKind::Map { key, elem }))
            }
            TypeExpr::Chan { dir, elem } => {
                let elem = self.resolve_type(elem)?;
                let dir = match dir {
                    ChanDirExpr::Both => ChanDir::Both,
                    ChanDirExpr::Send => ChanDir::Send,
                    ChanDirExpr::Recv => ChanDir::Recv,
                };
                Ok(self.store.intern(TypeKind::Chan { dir, elem }))
            }
            TypeExpr::Pointer(elem) => {
                let elem = self.resolve_type(elem)?;
                Ok(self.store.pointer_to(elem))
            }
            TypeExpr::Func { params, results } => {
                let params = params.iter().map(|t| self.resolve_type(t)).collect::<Result<Vec<_>, _>>()?;
                let results = results.iter().map(|t| self.resolve_type(t)).collect::<Result<Vec<_>, _>>()?;
                Ok(self.store.intern(TypeKind::Func { params, results }))
            }
            TypeExpr::Struct { fields } => {
                let fields = fields
                    .iter()
                    .map(|f| {
                        Ok(StructField {
                            name: f.name.clone(),
                            ty: self.resolve_type(&f.ty)?,
                            tag: f.tag.clone(),
                            embedded: false,
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(self.store.intern(TypeKind::Struct { fields }))
            }
            TypeExpr::Interface => Ok(TypeId::INTERFACE),
        }
    }

    // === constants ===

    fn const_eval(&mut self, e: &Expr) -> Result<Const, Error> {
        match e {
            Expr::IntLit { value, .. } => Ok(Const::int(*value)),
            Expr::UintLit { value, .. } => Ok(Const {
                ty: TypeId::UINT64,
                lit: Lit::Uint(*value),
            }),
            Expr::FloatLit { value, .. } => Ok(Const {
                ty: TypeId::FLOAT64,
                lit: Lit::Float(*value),
            }),
            Expr::StringLit { value, .. } => Ok(Const::str(value.clone())),
            Expr::Ident { name, line } => {
                match name.as_str() {
                    "true" => return Ok(Const::bool(true)),
                    "false" => return Ok(Const::bool(false)),
                    "nil" => return Ok(Const::nil()),
                    _ => {}
                }
                if !self.ctxs.is_empty()
                    && let Some(ScopeEntry::Const(c)) = self.resolve_local(name)
                {
                    return Ok(c);
                }
                match self.member_of(&self.pkg.clone(), name) {
                    Some(Member::Const(c)) => Ok(c),
                    _ => Err(Error::build(format!("constant expression expected, found {name}"), *line)),
                }
            }
            Expr::Selector { base, field, line } => {
                if let Expr::Ident { name: pkg, .. } = base.as_ref()
                    && let Some(ImportRef::Source(src)) = self.unit_imports.get(pkg).cloned()
                    && let Some(Member::Const(c)) = self.member_of(&src, field)
                {
                    return Ok(c);
                }
                Err(Error::build("constant expression expected", *line))
            }
            Expr::Unary { op, expr, line } => {
                let c = self.const_eval(expr)?;
                match (op, &c.lit) {
                    (UnaryOp::Neg, Lit::Int(v)) => Ok(Const { ty: c.ty, lit: Lit::Int(-v) }),
                    (UnaryOp::Neg, Lit::Float(v)) => Ok(Const { ty: c.ty, lit: Lit::Float(-v) }),
                    (UnaryOp::Not, Lit::Bool(v)) => Ok(Const { ty: c.ty, lit: Lit::Bool(!v) }),
                    _ => Err(Error::build("invalid constant operation", *line)),
                }
            }
            Expr::Binary { op, lhs, rhs, line } => {
                let a = self.const_eval(lhs)?;
                let b = self.const_eval(rhs)?;
                fold_binary(*op, &a, &b).ok_or_else(|| Error::build("invalid constant operation", *line))
            }
            other => Err(Error::build("constant expression expected", other.line())),
        }
    }

    // === statements ===

    fn lower_block(&mut self, block: &AstBlock) -> Result<(), Error> {
        self.push_scope();
        for stmt in &block.stmts {
            if self.ctx().terminated {
                // unreachable statements still lower, into a dead block
                let dead = self.new_block();
                self.start_block(dead);
            }
            self.lower_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), Error> {
        match stmt {
            Stmt::Expr(e) => {
                match e {
                    // `panic(x)` in statement position terminates the block
                    Expr::Call { callee, args, line } if is_ident(callee, "panic") && self.is_universe("panic") => {
                        if args.len() != 1 {
                            return Err(Error::build("panic takes one argument", *line));
                        }
                        let (op, _) = self.expr(&args[0])?;
                        self.emit(InstrKind::Panic { x: op }, *line);
                        self.ctx().terminated = true;
                    }
                    _ => {
                        self.expr(e)?;
                    }
                }
                Ok(())
            }
            Stmt::Var(vd) => self.lower_local_var(vd),
            Stmt::Const(cd) => self.lower_const_decl(cd, true),
            Stmt::Send { chan, value, line } => {
                let (chan_op, chan_ty) = self.expr(chan)?;
                let elem = self.store.elem(chan_ty);
                let (value_op, value_ty) = self.expr(value)?;
                let value_op = self.coerce(value_op, value_ty, elem, *line)?;
                self.emit(
                    InstrKind::Send {
                        chan: chan_op,
                        value: value_op,
                    },
                    *line,
                );
                Ok(())
            }
            Stmt::IncDec { target, dec, line } => {
                let (addr, ty) = self.lower_addr(target)?;
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: addr.clone(),
                        comma_ok: false,
                    },
                    *line,
                );
                let one = if self.store.is_float(ty) {
                    Operand::Const(Const { ty, lit: Lit::Float(1.0) })
                } else if self.store.is_unsigned(ty) {
                    Operand::Const(Const { ty, lit: Lit::Uint(1) })
                } else {
                    Operand::Const(Const { ty, lit: Lit::Int(1) })
                };
                let op = if *dec { BinOpKind::Sub } else { BinOpKind::Add };
                let result = self.emit_value(InstrKind::BinOp { op, x: value, y: one }, *line);
                self.emit(InstrKind::Store { addr, value: result }, *line);
                Ok(())
            }
            Stmt::Assign {
                targets,
                op,
                values,
                define,
                line,
            } => self.lower_assign(targets, *op, values, *define, *line),
            Stmt::Return { values, line } => self.lower_return(values, *line),
            Stmt::If(stmt) => self.lower_if(stmt),
            Stmt::For(stmt) => self.lower_for(stmt),
            Stmt::ForRange(stmt) => self.lower_for_range(stmt),
            Stmt::Block(block) => self.lower_block(block),
            Stmt::Break { line } => {
                let Some(&LoopCtx { brk, .. }) = self.ctx().loops.last() else {
                    return Err(Error::build("break outside loop", *line));
                };
                self.seal_jump(brk, *line);
                Ok(())
            }
            Stmt::Continue { line } => {
                let Some(&LoopCtx { cont, .. }) = self.ctx().loops.last() else {
                    return Err(Error::build("continue outside loop", *line));
                };
                self.seal_jump(cont, *line);
                Ok(())
            }
            Stmt::Defer { call, line } => {
                let call_instr = self.lower_call_parts(call, *line)?;
                self.emit(InstrKind::Defer(call_instr), *line);
                Ok(())
            }
            Stmt::Go { call, line } => {
                let call_instr = self.lower_call_parts(call, *line)?;
                self.emit(InstrKind::Go(call_instr), *line);
                Ok(())
            }
            Stmt::Select(stmt) => self.lower_select(stmt),
        }
    }

    fn lower_local_var(&mut self, vd: &VarDecl) -> Result<(), Error> {
        let line = vd.line;
        let declared = vd.ty.as_ref().map(|t| self.resolve_type(t)).transpose()?;
        if vd.values.is_empty() {
            let ty = declared.ok_or_else(|| Error::build("missing type in variable declaration", line))?;
            for name in &vd.names {
                self.declare_var_zero(name, ty, line);
            }
            return Ok(());
        }
        if vd.values.len() == vd.names.len() {
            for (name, value) in vd.names.iter().zip(vd.values.iter()) {
                let (mut op, mut ty) = self.expr(value)?;
                if let Some(want) = declared {
                    op = self.coerce(op, ty, want, line)?;
                    ty = want;
                }
                self.declare_var(name, ty, op, line);
            }
            return Ok(());
        }
        if vd.values.len() == 1 {
            let (tuple, tys) = self.lower_multi_rhs(&vd.values[0], vd.names.len())?;
            for (i, name) in vd.names.iter().enumerate() {
                let value = self.emit_value(
                    InstrKind::Extract {
                        tuple: tuple.clone(),
                        index: i as u32,
                    },
                    line,
                );
                let ty = declared.unwrap_or(tys[i]);
                self.declare_var(name, ty, value, line);
            }
            return Ok(());
        }
        Err(Error::build("variable declaration arity mismatch", line))
    }

    fn declare_var(&mut self, name: &str, ty: TypeId, value: Operand, line: u32) {
        if name == "_" {
            return;
        }
        let local = self.new_local(ty);
        let ptr = self.emit_value(InstrKind::Alloc { local, heap: false }, line);
        self.emit(
            InstrKind::Store {
                addr: ptr.clone(),
                value,
            },
            line,
        );
        self.scope_insert(
            name.to_owned(),
            ScopeEntry::Var {
                ptr,
                ty,
                local: Some(local),
            },
        );
    }

    fn declare_var_zero(&mut self, name: &str, ty: TypeId, line: u32) {
        if name == "_" {
            return;
        }
        let local = self.new_local(ty);
        let ptr = self.emit_value(InstrKind::Alloc { local, heap: false }, line);
        self.scope_insert(
            name.to_owned(),
            ScopeEntry::Var {
                ptr,
                ty,
                local: Some(local),
            },
        );
    }

    fn lower_assign(
        &mut self,
        targets: &[Expr],
        op: Option<BinaryOp>,
        values: &[Expr],
        define: bool,
        line: u32,
    ) -> Result<(), Error> {
        // compound assignment: exactly one target and one value
        if let Some(op) = op {
            let target = &targets[0];
            // map targets read-modify-write through Lookup/MapUpdate
            if let Expr::Index { base, index, .. } = target
                && self.is_map_base(base)?
            {
                let (map_op, map_ty) = self.expr(base)?;
                let elem = self.store.elem(map_ty);
                let (key_op, _) = self.expr(index)?;
                let cur = self.emit_value(
                    InstrKind::Lookup {
                        x: map_op.clone(),
                        index: key_op.clone(),
                        elem,
                        comma_ok: false,
                    },
                    line,
                );
                let (rhs, rhs_ty) = self.expr(&values[0])?;
                let rhs = self.coerce(rhs, rhs_ty, elem, line)?;
                let result = self.binop_value(op, cur, elem, rhs, line)?;
                self.emit(
                    InstrKind::MapUpdate {
                        map: map_op,
                        key: key_op,
                        value: result.0,
                    },
                    line,
                );
                return Ok(());
            }
            let (addr, ty) = self.lower_addr(target)?;
            let cur = self.emit_value(
                InstrKind::UnOp {
                    op: UnOpKind::Deref,
                    x: addr.clone(),
                    comma_ok: false,
                },
                line,
            );
            let (rhs, rhs_ty) = self.expr(&values[0])?;
            let rhs = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
                rhs
            } else {
                self.coerce(rhs, rhs_ty, ty, line)?
            };
            let (result, _) = self.binop_value(op, cur, ty, rhs, line)?;
            self.emit(InstrKind::Store { addr, value: result }, line);
            return Ok(());
        }

        // multi-target with a single multi-value rhs
        if targets.len() > 1 && values.len() == 1 {
            let (tuple, tys) = self.lower_multi_rhs(&values[0], targets.len())?;
            let mut extracted = Vec::new();
            for i in 0..targets.len() {
                extracted.push(self.emit_value(
                    InstrKind::Extract {
                        tuple: tuple.clone(),
                        index: i as u32,
                    },
                    line,
                ));
            }
            for ((target, value), &ty) in targets.iter().zip(extracted).zip(tys.iter()) {
                self.assign_one(target, value, ty, define, line)?;
            }
            return Ok(());
        }

        if targets.len() != values.len() {
            return Err(Error::build("assignment arity mismatch", line));
        }

        // evaluate every rhs before storing, so swaps behave
        let mut evaluated = Vec::new();
        for value in values {
            evaluated.push(self.expr(value)?);
        }
        for (target, (value, ty)) in targets.iter().zip(evaluated) {
            self.assign_one(target, value, ty, define, line)?;
        }
        Ok(())
    }

    fn assign_one(&mut self, target: &Expr, value: Operand, ty: TypeId, define: bool, line: u32) -> Result<(), Error> {
        if is_blank(target) {
            return Ok(());
        }
        if define {
            let Expr::Ident { name, .. } = target else {
                return Err(Error::build("left side of := must be an identifier", line));
            };
            self.declare_var(name, ty, value, line);
            return Ok(());
        }
        // map element assignment is MapUpdate, not a store
        if let Expr::Index { base, index, .. } = target
            && self.is_map_base(base)?
        {
            let (map_op, map_ty) = self.expr(base)?;
            let elem = self.store.elem(map_ty);
            let (key_op, _) = self.expr(index)?;
            let value = self.coerce(value, ty, elem, line)?;
            self.emit(
                InstrKind::MapUpdate {
                    map: map_op,
                    key: key_op,
                    value,
                },
                line,
            );
            return Ok(());
        }
        let (addr, slot_ty) = self.lower_addr(target)?;
        let value = self.coerce(value, ty, slot_ty, line)?;
        self.emit(InstrKind::Store { addr, value }, line);
        Ok(())
    }

    /// Whether an expression statically types as a map (so indexing it is
    /// a Lookup/MapUpdate rather than IndexAddr).
    fn is_map_base(&mut self, base: &Expr) -> Result<bool, Error> {
        let ty = self.type_of(base)?;
        Ok(matches!(self.store.get(self.store.underlying(ty)), TypeKind::Map { .. }))
    }

    fn lower_return(&mut self, values: &[Expr], line: u32) -> Result<(), Error> {
        let results_tys = self.ctx().results.clone();
        if values.len() != results_tys.len() {
            // `return f()` forwarding a multi-result call
            if values.len() == 1 && results_tys.len() > 1 {
                let (tuple, _) = self.lower_multi_rhs(&values[0], results_tys.len())?;
                let mut results = SmallVec::new();
                for i in 0..results_tys.len() {
                    results.push(self.emit_value(
                        InstrKind::Extract {
                            tuple: tuple.clone(),
                            index: i as u32,
                        },
                        line,
                    ));
                }
                if self.ctx().has_defer {
                    self.emit(InstrKind::RunDefers, line);
                }
                self.emit(InstrKind::Return { results }, line);
                self.ctx().terminated = true;
                return Ok(());
            }
            return Err(Error::build(
                format!("wrong number of return values: want {}, got {}", results_tys.len(), values.len()),
                line,
            ));
        }
        let mut results = SmallVec::new();
        for (value, &want) in values.iter().zip(results_tys.iter()) {
            let (op, ty) = self.expr(value)?;
            results.push(self.coerce(op, ty, want, line)?);
        }
        if self.ctx().has_defer {
            self.emit(InstrKind::RunDefers, line);
        }
        self.emit(InstrKind::Return { results }, line);
        self.ctx().terminated = true;
        Ok(())
    }

    fn lower_if(&mut self, stmt: &IfStmt) -> Result<(), Error> {
        self.push_scope();
        if let Some(init) = &stmt.init {
            self.lower_stmt(init)?;
        }
        let (cond, cond_ty) = self.expr(&stmt.cond)?;
        if !matches!(self.store.get(self.store.underlying(cond_ty)), TypeKind::Bool) {
            return Err(Error::build("if condition must be boolean", stmt.line));
        }
        let then_block = self.new_block();
        let else_block = self.new_block();
        let end = if stmt.els.is_some() { self.new_block() } else { else_block };
        self.emit_if(cond, then_block, else_block, stmt.line);

        self.start_block(then_block);
        self.lower_block(&stmt.then)?;
        let then_done = self.ctx().terminated;
        self.seal_jump(end, stmt.line);

        let mut else_done = false;
        if let Some(els) = &stmt.els {
            self.start_block(else_block);
            self.lower_stmt(els)?;
            else_done = self.ctx().terminated;
            self.seal_jump(end, stmt.line);
        }
        self.start_block(end);
        // both branches returning or panicking makes this a terminating
        // statement; the merge block is unreachable
        if then_done && else_done {
            self.ctx().terminated = true;
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_for(&mut self, stmt: &ForStmt) -> Result<(), Error> {
        self.push_scope();
        if let Some(init) = &stmt.init {
            self.lower_stmt(init)?;
        }
        let header = self.new_block();
        let body = self.new_block();
        let post = self.new_block();
        let end = self.new_block();

        self.seal_jump(header, stmt.line);
        self.start_block(header);
        match &stmt.cond {
            Some(cond) => {
                let (cond, _) = self.expr(cond)?;
                self.emit_if(cond, body, end, stmt.line);
            }
            None => self.seal_jump(body, stmt.line),
        }

        self.start_block(body);
        self.ctx().loops.push(LoopCtx { cont: post, brk: end });
        self.lower_block(&stmt.body)?;
        self.ctx().loops.pop();
        self.seal_jump(post, stmt.line);

        self.start_block(post);
        if let Some(post_stmt) = &stmt.post {
            self.lower_stmt(post_stmt)?;
        }
        self.seal_jump(header, stmt.line);

        self.start_block(end);
        self.pop_scope();
        Ok(())
    }

    fn lower_for_range(&mut self, stmt: &ForRangeStmt) -> Result<(), Error> {
        let line = stmt.line;
        self.push_scope();
        let (subject, subject_ty) = self.expr(&stmt.expr)?;
        let under = self.store.underlying(subject_ty);

        // channel ranges lower to a receive loop
        if let TypeKind::Chan { elem, .. } = self.store.get(under).clone() {
            let header = self.new_block();
            let body = self.new_block();
            let end = self.new_block();
            self.seal_jump(header, line);
            self.start_block(header);
            let pair = self.emit_value(
                InstrKind::UnOp {
                    op: UnOpKind::Recv,
                    x: subject,
                    comma_ok: true,
                },
                line,
            );
            let value = self.emit_value(
                InstrKind::Extract {
                    tuple: pair.clone(),
                    index: 0,
                },
                line,
            );
            let ok = self.emit_value(InstrKind::Extract { tuple: pair, index: 1 }, line);
            self.emit_if(ok, body, end, line);
            self.start_block(body);
            self.push_scope();
            if let Some(key) = &stmt.key {
                self.declare_var(key, elem, value, line);
            }
            self.ctx().loops.push(LoopCtx { cont: header, brk: end });
            self.lower_block(&stmt.body)?;
            self.ctx().loops.pop();
            self.pop_scope();
            self.seal_jump(header, line);
            self.start_block(end);
            self.pop_scope();
            return Ok(());
        }

        let (key_ty, value_ty) = match self.store.get(under).clone() {
            TypeKind::Map { key, elem } => (key, elem),
            TypeKind::Slice { elem } | TypeKind::Array { elem, .. } => (TypeId::INT, elem),
            TypeKind::String => (TypeId::INT, TypeId::INT32),
            _ => return Err(Error::build("cannot range over this type", line)),
        };

        let iter = self.emit_value(InstrKind::Range { x: subject }, line);
        let header = self.new_block();
        let body = self.new_block();
        let end = self.new_block();
        self.seal_jump(header, line);

        self.start_block(header);
        let triple = self.emit_value(
            InstrKind::Next {
                iter,
                key: key_ty,
                value: value_ty,
            },
            line,
        );
        let ok = self.emit_value(
            InstrKind::Extract {
                tuple: triple.clone(),
                index: 0,
            },
            line,
        );
        self.emit_if(ok, body, end, line);

        self.start_block(body);
        self.push_scope();
        if let Some(key) = &stmt.key {
            let key_val = self.emit_value(
                InstrKind::Extract {
                    tuple: triple.clone(),
                    index: 1,
                },
                line,
            );
            self.declare_var(key, key_ty, key_val, line);
        }
        if let Some(value) = &stmt.value {
            let value_val = self.emit_value(
                InstrKind::Extract {
                    tuple: triple,
                    index: 2,
                },
                line,
            );
            self.declare_var(value, value_ty, value_val, line);
        }
        self.ctx().loops.push(LoopCtx { cont: header, brk: end });
        self.lower_block(&stmt.body)?;
        self.ctx().loops.pop();
        self.pop_scope();
        self.seal_jump(header, line);

        self.start_block(end);
        self.pop_scope();
        Ok(())
    }

    fn lower_select(&mut self, stmt: &SelectStmt) -> Result<(), Error> {
        let line = stmt.line;
        self.push_scope();
        let mut cases = Vec::new();
        let mut clause_info = Vec::new(); // (case index or None for default, recv slot)
        let mut has_default = false;
        let mut recv_slots = 0u32;
        for clause in &stmt.cases {
            match &clause.comm {
                CommClause::Send { chan, value } => {
                    let (chan_op, chan_ty) = self.expr(chan)?;
                    let elem = self.store.elem(chan_ty);
                    let (value_op, value_ty) = self.expr(value)?;
                    let value_op = self.coerce(value_op, value_ty, elem, clause.line)?;
                    clause_info.push((Some(cases.len()), None));
                    cases.push(SelectCase::Send {
                        chan: chan_op,
                        value: value_op,
                    });
                }
                CommClause::Recv { chan, .. } => {
                    let (chan_op, chan_ty) = self.expr(chan)?;
                    let elem = self.store.elem(chan_ty);
                    clause_info.push((Some(cases.len()), Some((recv_slots, elem))));
                    recv_slots += 1;
                    cases.push(SelectCase::Recv {
                        chan: chan_op,
                        elem,
                    });
                }
                CommClause::Default => {
                    has_default = true;
                    clause_info.push((None, None));
                }
            }
        }

        let tuple = self.emit_value(
            InstrKind::Select {
                cases,
                blocking: !has_default,
            },
            line,
        );
        let chosen = self.emit_value(
            InstrKind::Extract {
                tuple: tuple.clone(),
                index: 0,
            },
            line,
        );

        let end = self.new_block();
        for (clause, (case_index, recv_slot)) in stmt.cases.iter().zip(clause_info) {
            let body_block = self.new_block();
            let next = self.new_block();
            let want = case_index.map_or(-1, |i| i as i64);
            let cond = self.emit_value(
                InstrKind::BinOp {
                    op: BinOpKind::Eq,
                    x: chosen.clone(),
                    y: Operand::Const(Const::int(want)),
                },
                clause.line,
            );
            self.emit_if(cond, body_block, next, clause.line);

            self.start_block(body_block);
            self.push_scope();
            if let CommClause::Recv { names, .. } = &clause.comm
                && let Some((slot, elem)) = recv_slot
            {
                if let Some(value_name) = names.first() {
                    let value = self.emit_value(
                        InstrKind::Extract {
                            tuple: tuple.clone(),
                            index: 2 + slot,
                        },
                        clause.line,
                    );
                    self.declare_var(value_name, elem, value, clause.line);
                }
                if let Some(ok_name) = names.get(1) {
                    let ok = self.emit_value(
                        InstrKind::Extract {
                            tuple: tuple.clone(),
                            index: 1,
                        },
                        clause.line,
                    );
                    self.declare_var(ok_name, TypeId::BOOL, ok, clause.line);
                }
            }
            self.lower_block(&clause.body)?;
            self.pop_scope();
            self.seal_jump(end, clause.line);

            self.start_block(next);
        }
        self.seal_jump(end, line);
        self.start_block(end);
        self.pop_scope();
        Ok(())
    }

    // === expressions ===

    /// Static type of an expression, without emitting code where possible.
    /// Falls back to lowering into the current block for complex shapes.
    fn type_of(&mut self, e: &Expr) -> Result<TypeId, Error> {
        match e {
            Expr::Ident { name, .. } => {
                if let Some(entry) = self.resolve_local(name) {
                    return Ok(match entry {
                        ScopeEntry::Var { ty, .. } => ty,
                        ScopeEntry::Const(c) => c.ty,
                    });
                }
                match self.member_of(&self.pkg.clone(), name) {
                    Some(Member::Global { ty, .. }) => Ok(ty),
                    Some(Member::Const(c)) => Ok(c.ty),
                    _ => Ok(TypeId::INTERFACE),
                }
            }
            Expr::Index { base, .. } => {
                let base_ty = self.type_of(base)?;
                Ok(self.store.elem(base_ty))
            }
            Expr::Selector { base, field, .. } => {
                if let Expr::Ident { name, .. } = base.as_ref()
                    && self.resolve_local(name).is_none()
                    && self.unit_imports.contains_key(name)
                {
                    return Ok(TypeId::INTERFACE);
                }
                let base_ty = self.type_of(base)?;
                let base_ty = self.store.deref(base_ty);
                if let TypeKind::Struct { fields } = self.store.get(self.store.underlying(base_ty))
                    && let Some(f) = fields.iter().find(|f| &f.name == field)
                {
                    return Ok(f.ty);
                }
                Ok(TypeId::INTERFACE)
            }
            _ => Ok(TypeId::INTERFACE),
        }
    }

    fn expr(&mut self, e: &Expr) -> Result<(Operand, TypeId), Error> {
        match e {
            Expr::IntLit { value, .. } => Ok((Operand::Const(Const::int(*value)), TypeId::INT)),
            Expr::UintLit { value, .. } => Ok((
                Operand::Const(Const {
                    ty: TypeId::UINT64,
                    lit: Lit::Uint(*value),
                }),
                TypeId::UINT64,
            )),
            Expr::FloatLit { value, .. } => Ok((
                Operand::Const(Const {
                    ty: TypeId::FLOAT64,
                    lit: Lit::Float(*value),
                }),
                TypeId::FLOAT64,
            )),
            Expr::StringLit { value, .. } => Ok((Operand::Const(Const::str(value.clone())), TypeId::STRING)),
            Expr::Ident { name, line } => self.lower_ident(name, *line),
            Expr::Binary { op, lhs, rhs, line } => self.lower_binary(*op, lhs, rhs, *line),
            Expr::Unary { op, expr, line } => self.lower_unary(*op, expr, *line),
            Expr::Call { .. } | Expr::Conversion { .. } => self.lower_call(e),
            Expr::Index { base, index, line } => self.lower_index(base, index, *line),
            Expr::SliceExpr {
                base,
                low,
                high,
                max,
                line,
            } => self.lower_slice_expr(base, low.as_deref(), high.as_deref(), max.as_deref(), *line),
            Expr::Selector { base, field, line } => self.lower_selector(base, field, *line),
            Expr::TypeAssert { base, ty, line } => {
                let (op, base_ty) = self.expr(base)?;
                if !self.store.is_interface(base_ty) {
                    return Err(Error::build("type assertion on non-interface value", *line));
                }
                let target = self.resolve_type(ty)?;
                let result = self.emit_value(
                    InstrKind::TypeAssert {
                        x: op,
                        ty: target,
                        comma_ok: false,
                    },
                    *line,
                );
                Ok((result, target))
            }
            Expr::Composite { ty, elems, line } => {
                let ty = self.resolve_type(ty)?;
                self.lower_composite(ty, elems, *line)
            }
            Expr::FuncLit {
                params,
                results,
                body,
                line,
            } => self.lower_func_lit(params, results, body, *line),
            Expr::TypeLit { line, .. } => Err(Error::build("type is not an expression", *line)),
        }
    }

    fn lower_ident(&mut self, name: &str, line: u32) -> Result<(Operand, TypeId), Error> {
        match name {
            "true" => return Ok((Operand::Const(Const::bool(true)), TypeId::BOOL)),
            "false" => return Ok((Operand::Const(Const::bool(false)), TypeId::BOOL)),
            "nil" => return Ok((Operand::Const(Const::nil()), TypeId::UNTYPED_NIL)),
            "_" => return Err(Error::build("cannot use _ as value", line)),
            _ => {}
        }
        if let Some(entry) = self.resolve_local(name) {
            return Ok(match entry {
                ScopeEntry::Var { ptr, ty, .. } => {
                    let value = self.emit_value(
                        InstrKind::UnOp {
                            op: UnOpKind::Deref,
                            x: ptr,
                            comma_ok: false,
                        },
                        line,
                    );
                    (value, ty)
                }
                ScopeEntry::Const(c) => {
                    let ty = c.ty;
                    (Operand::Const(c), ty)
                }
            });
        }
        match self.member_of(&self.pkg.clone(), name) {
            Some(Member::Global { id, ty }) => {
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: Operand::Global(id),
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, ty))
            }
            Some(Member::Const(c)) => {
                let ty = c.ty;
                Ok((Operand::Const(c), ty))
            }
            Some(Member::Func { id, params, results }) => {
                let ty = self.store.intern(TypeKind::Func { params, results });
                Ok((Operand::Function(id), ty))
            }
            Some(Member::Type(_)) | None => Err(Error::build(format!("undefined: {name}"), line)),
        }
    }

    fn lower_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, line: u32) -> Result<(Operand, TypeId), Error> {
        // short-circuit forms merge through a phi
        if matches!(op, BinaryOp::LAnd | BinaryOp::LOr) {
            let (lhs_op, _) = self.expr(lhs)?;
            let p0 = self.ctx().cur;
            let rhs_block = self.new_block();
            let end = self.new_block();
            let short = match op {
                BinaryOp::LAnd => {
                    self.emit_if(lhs_op, rhs_block, end, line);
                    Const::bool(false)
                }
                _ => {
                    self.emit_if(lhs_op, end, rhs_block, line);
                    Const::bool(true)
                }
            };
            self.start_block(rhs_block);
            let (rhs_op, _) = self.expr(rhs)?;
            let p1 = self.ctx().cur;
            self.seal_jump(end, line);
            self.start_block(end);
            let result = self.emit_value(
                InstrKind::Phi {
                    edges: vec![(p0, Operand::Const(short)), (p1, rhs_op)],
                },
                line,
            );
            return Ok((result, TypeId::BOOL));
        }

        let (mut x, mut x_ty) = self.expr(lhs)?;
        let (mut y, mut y_ty) = self.expr(rhs)?;

        // untyped constants adapt to the other operand
        if !matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            if matches!(x, Operand::Const(_)) && !matches!(y, Operand::Const(_)) {
                x = self.coerce(x, x_ty, y_ty, line)?;
                x_ty = y_ty;
            } else if matches!(y, Operand::Const(_)) && !matches!(x, Operand::Const(_)) {
                y = self.coerce(y, y_ty, x_ty, line)?;
                y_ty = x_ty;
            }
        }

        // constant folding
        if let (Operand::Const(a), Operand::Const(b)) = (&x, &y)
            && let Some(folded) = fold_binary(op, a, b)
        {
            let ty = folded.ty;
            return Ok((Operand::Const(folded), ty));
        }

        let kind = binop_kind(op);
        if kind.is_comparison() {
            self.check_comparable(op, x_ty, y_ty, line)?;
            let result = self.emit_value(InstrKind::BinOp { op: kind, x, y }, line);
            return Ok((result, TypeId::BOOL));
        }
        self.check_arith(op, x_ty, y_ty, line)?;
        let result = self.emit_value(InstrKind::BinOp { op: kind, x, y }, line);
        Ok((result, x_ty))
    }

    fn binop_value(
        &mut self,
        op: BinaryOp,
        x: Operand,
        ty: TypeId,
        y: Operand,
        line: u32,
    ) -> Result<(Operand, TypeId), Error> {
        let kind = binop_kind(op);
        let result = self.emit_value(InstrKind::BinOp { op: kind, x, y }, line);
        Ok((result, ty))
    }

    fn check_comparable(&mut self, op: BinaryOp, x: TypeId, y: TypeId, line: u32) -> Result<(), Error> {
        let ordered = matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge);
        if ordered {
            let ok = (self.store.is_numeric(x) && self.store.is_numeric(y))
                || (self.store.is_string(x) && self.store.is_string(y));
            if !ok {
                return Err(Error::build("operands are not ordered", line));
            }
        }
        Ok(())
    }

    fn check_arith(&mut self, op: BinaryOp, x: TypeId, y: TypeId, line: u32) -> Result<(), Error> {
        match op {
            BinaryOp::Add => {
                let ok = (self.store.is_numeric(x) && self.store.is_numeric(y))
                    || (self.store.is_string(x) && self.store.is_string(y));
                if !ok {
                    return Err(Error::build("invalid operand types for +", line));
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                if !self.store.is_integer(x) || !self.store.is_integer(y) {
                    return Err(Error::build("shift operands must be integers", line));
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                if !self.store.is_numeric(x) || !self.store.is_numeric(y) {
                    return Err(Error::build("arithmetic on non-numeric operands", line));
                }
                if matches!(op, BinaryOp::Rem) && (self.store.is_float(x) || self.store.is_float(y)) {
                    return Err(Error::build("% is not defined on floats", line));
                }
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::AndNot => {
                if !self.store.is_integer(x) || !self.store.is_integer(y) {
                    return Err(Error::build("bitwise operands must be integers", line));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr, line: u32) -> Result<(Operand, TypeId), Error> {
        match op {
            UnaryOp::Addr => {
                let (ptr, elem) = self.lower_addr(operand)?;
                // the cell now escapes through the pointer
                if let Expr::Ident { name, .. } = operand
                    && let Some(ScopeEntry::Var { local: Some(local), .. }) = self.resolve_local(name)
                {
                    let top = self.ctxs.len() - 1;
                    if local.index() < self.ctxs[top].locals.len() {
                        self.ctxs[top].locals[local.index()].heap = true;
                    }
                }
                let ty = self.store.pointer_to(elem);
                Ok((ptr, ty))
            }
            UnaryOp::Deref => {
                let (op, ty) = self.expr(operand)?;
                let TypeKind::Pointer { elem } = self.store.get(self.store.underlying(ty)).clone() else {
                    return Err(Error::build("cannot dereference non-pointer", line));
                };
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: op,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, elem))
            }
            UnaryOp::Recv => {
                let (op, ty) = self.expr(operand)?;
                let elem = self.store.elem(ty);
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Recv,
                        x: op,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, elem))
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                let (x, ty) = self.expr(operand)?;
                let kind = match op {
                    UnaryOp::Neg => UnOpKind::Neg,
                    UnaryOp::Not => UnOpKind::Not,
                    _ => UnOpKind::BitNot,
                };
                // fold constant negation
                if let Operand::Const(c) = &x {
                    match (kind, &c.lit) {
                        (UnOpKind::Neg, Lit::Int(v)) => {
                            return Ok((Operand::Const(Const { ty: c.ty, lit: Lit::Int(-v) }), ty));
                        }
                        (UnOpKind::Neg, Lit::Float(v)) => {
                            return Ok((Operand::Const(Const { ty: c.ty, lit: Lit::Float(-v) }), ty));
                        }
                        (UnOpKind::Not, Lit::Bool(v)) => {
                            return Ok((Operand::Const(Const { ty: c.ty, lit: Lit::Bool(!v) }), ty));
                        }
                        _ => {}
                    }
                }
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: kind,
                        x,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, ty))
            }
        }
    }

    fn lower_index(&mut self, base: &Expr, index: &Expr, line: u32) -> Result<(Operand, TypeId), Error> {
        let (base_op, base_ty) = self.expr(base)?;
        let under = self.store.underlying(self.store.deref(base_ty));
        match self.store.get(under).clone() {
            TypeKind::Map { key, elem } => {
                let (key_op, key_ty) = self.expr(index)?;
                let key_op = self.coerce(key_op, key_ty, key, line)?;
                let value = self.emit_value(
                    InstrKind::Lookup {
                        x: base_op,
                        index: key_op,
                        elem,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, elem))
            }
            TypeKind::Slice { elem } => {
                let (index_op, _) = self.expr(index)?;
                let addr = self.emit_value(
                    InstrKind::IndexAddr {
                        x: base_op,
                        index: index_op,
                    },
                    line,
                );
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: addr,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, elem))
            }
            // array values (and pointers to arrays, already loaded above)
            // read elements directly
            TypeKind::Array { elem, .. } => {
                let (index_op, _) = self.expr(index)?;
                let value = self.emit_value(
                    InstrKind::Index {
                        x: base_op,
                        index: index_op,
                    },
                    line,
                );
                Ok((value, elem))
            }
            TypeKind::String => {
                let (index_op, _) = self.expr(index)?;
                let value = self.emit_value(
                    InstrKind::Index {
                        x: base_op,
                        index: index_op,
                    },
                    line,
                );
                Ok((value, TypeId::UINT8))
            }
            // dynamically typed base: fall back to element indexing
            TypeKind::Interface => {
                let (index_op, _) = self.expr(index)?;
                let value = self.emit_value(
                    InstrKind::Index {
                        x: base_op,
                        index: index_op,
                    },
                    line,
                );
                Ok((value, TypeId::INTERFACE))
            }
            _ => Err(Error::build("cannot index this type", line)),
        }
    }

    fn lower_slice_expr(
        &mut self,
        base: &Expr,
        low: Option<&Expr>,
        high: Option<&Expr>,
        max: Option<&Expr>,
        line: u32,
    ) -> Result<(Operand, TypeId), Error> {
        let (base_op, base_ty) = self.expr(base)?;
        let under = self.store.underlying(self.store.deref(base_ty));
        let result_ty = match self.store.get(under).clone() {
            TypeKind::Slice { .. } => base_ty,
            TypeKind::String => TypeId::STRING,
            TypeKind::Array { elem, .. } => self.store.slice_of(elem),
            _ => return Err(Error::build("cannot slice this type", line)),
        };
        let low = low.map(|e| self.expr(e)).transpose()?.map(|(op, _)| op);
        let high = high.map(|e| self.expr(e)).transpose()?.map(|(op, _)| op);
        let max = max.map(|e| self.expr(e)).transpose()?.map(|(op, _)| op);
        let result = self.emit_value(
            InstrKind::Slice {
                x: base_op,
                low,
                high,
                max,
            },
            line,
        );
        Ok((result, result_ty))
    }

    fn lower_selector(&mut self, base: &Expr, field: &str, line: u32) -> Result<(Operand, TypeId), Error> {
        // package member access
        if let Expr::Ident { name, .. } = base
            && self.resolve_local(name).is_none()
        {
            if let Some(import) = self.unit_imports.get(name).cloned() {
                return self.lower_qualified(&import, name, field, line);
            }
            // auto-import from the registry
            if self.member_of(&self.pkg.clone(), name).is_none()
                && let Some(path) = registry::package_path(name)
            {
                self.unit_imports.insert(name.clone(), ImportRef::Extern(path.clone()));
                self.imports.push(path.clone());
                let import = ImportRef::Extern(path);
                return self.lower_qualified(&import, name, field, line);
            }
        }

        let (base_op, base_ty) = self.expr(base)?;
        let elem_ty = self.store.deref(base_ty);
        let under = self.store.underlying(elem_ty);
        if let TypeKind::Struct { fields } = self.store.get(under).clone() {
            let Some(index) = fields.iter().position(|f| f.name == field) else {
                return Err(Error::build(format!("unknown field {field}"), line));
            };
            let field_ty = fields[index].ty;
            // through a pointer: FieldAddr + load; by value: Field
            if matches!(
                self.store.get(self.store.underlying(base_ty)),
                TypeKind::Pointer { .. }
            ) {
                let addr = self.emit_value(
                    InstrKind::FieldAddr {
                        x: base_op,
                        field: index as u32,
                    },
                    line,
                );
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: addr,
                        comma_ok: false,
                    },
                    line,
                );
                return Ok((value, field_ty));
            }
            let value = self.emit_value(
                InstrKind::Field {
                    x: base_op,
                    field: index as u32,
                },
                line,
            );
            return Ok((value, field_ty));
        }
        Err(Error::build(format!("no field {field} on this type"), line))
    }

    fn lower_qualified(
        &mut self,
        import: &ImportRef,
        pkg: &str,
        name: &str,
        line: u32,
    ) -> Result<(Operand, TypeId), Error> {
        match import {
            ImportRef::Source(src) => {
                if !name.chars().next().is_some_and(char::is_uppercase) {
                    return Err(Error::build(format!("{name} is not exported by {src}"), line));
                }
                match self.member_of(src, name) {
                    Some(Member::Global { id, ty }) => {
                        let value = self.emit_value(
                            InstrKind::UnOp {
                                op: UnOpKind::Deref,
                                x: Operand::Global(id),
                                comma_ok: false,
                            },
                            line,
                        );
                        Ok((value, ty))
                    }
                    Some(Member::Const(c)) => {
                        let ty = c.ty;
                        Ok((Operand::Const(c), ty))
                    }
                    Some(Member::Func { id, params, results }) => {
                        let ty = self.store.intern(TypeKind::Func { params, results });
                        Ok((Operand::Function(id), ty))
                    }
                    Some(Member::Type(_)) | None => Err(Error::build(format!("undefined: {pkg}.{name}"), line)),
                }
            }
            ImportRef::Extern(path) => {
                let (id, obj) = self.extern_operand(&path.clone(), name, line)?;
                let ty = if obj.as_func().is_some() {
                    self.store.intern(TypeKind::Func {
                        params: Vec::new(),
                        results: vec![TypeId::INTERFACE],
                    })
                } else {
                    self.extern_type(&obj)
                };
                // variables read through the external cell; constants and
                // functions are direct values
                if matches!(obj.kind, registry::ExternKind::Var(_)) {
                    let value = self.emit_value(
                        InstrKind::UnOp {
                            op: UnOpKind::Deref,
                            x: Operand::External(id),
                            comma_ok: false,
                        },
                        line,
                    );
                    Ok((value, ty))
                } else {
                    Ok((Operand::External(id), ty))
                }
            }
        }
    }

    fn lower_addr(&mut self, e: &Expr) -> Result<(Operand, TypeId), Error> {
        match e {
            Expr::Ident { name, line } => {
                if let Some(ScopeEntry::Var { ptr, ty, .. }) = self.resolve_local(name) {
                    return Ok((ptr, ty));
                }
                match self.member_of(&self.pkg.clone(), name) {
                    Some(Member::Global { id, ty }) => Ok((Operand::Global(id), ty)),
                    _ => Err(Error::build(format!("cannot assign to {name}"), *line)),
                }
            }
            Expr::Index { base, index, line } => {
                let base_ty = self.type_of(base)?;
                let under = self.store.underlying(self.store.deref(base_ty));
                let (base_op, elem) = match self.store.get(under).clone() {
                    TypeKind::Slice { elem } => (self.expr(base)?.0, elem),
                    // array elements are addressed through the array's own
                    // address (or the pointer value, if base is one)
                    TypeKind::Array { elem, .. } => {
                        let op = if matches!(
                            self.store.get(self.store.underlying(base_ty)),
                            TypeKind::Pointer { .. }
                        ) {
                            self.expr(base)?.0
                        } else {
                            self.lower_addr(base)?.0
                        };
                        (op, elem)
                    }
                    _ => return Err(Error::build("cannot take element address", *line)),
                };
                let (index_op, _) = self.expr(index)?;
                let addr = self.emit_value(
                    InstrKind::IndexAddr {
                        x: base_op,
                        index: index_op,
                    },
                    *line,
                );
                Ok((addr, elem))
            }
            Expr::Selector { base, field, line } => {
                // assignment to pkg.Var (source global or external variable)
                if let Expr::Ident { name, .. } = base.as_ref()
                    && self.resolve_local(name).is_none()
                    && let Some(import) = self.unit_imports.get(name).cloned()
                {
                    match import {
                        ImportRef::Source(src) => {
                            if let Some(Member::Global { id, ty }) = self.member_of(&src, field) {
                                return Ok((Operand::Global(id), ty));
                            }
                            return Err(Error::build(format!("cannot assign to {name}.{field}"), *line));
                        }
                        ImportRef::Extern(path) => {
                            let (id, obj) = self.extern_operand(&path, field, *line)?;
                            let ty = self.extern_type(&obj);
                            return Ok((Operand::External(id), ty));
                        }
                    }
                }
                // struct field address: through a pointer value, or the
                // address of the base itself
                let base_ty = self.type_of(base)?;
                let (ptr_op, elem_ty) = if matches!(
                    self.store.get(self.store.underlying(base_ty)),
                    TypeKind::Pointer { .. }
                ) {
                    let (op, ty) = self.expr(base)?;
                    (op, self.store.deref(ty))
                } else {
                    self.lower_addr(base)?
                };
                let under = self.store.underlying(elem_ty);
                let TypeKind::Struct { fields } = self.store.get(under).clone() else {
                    return Err(Error::build(format!("cannot assign to field {field}"), *line));
                };
                let Some(index) = fields.iter().position(|f| f.name == *field) else {
                    return Err(Error::build(format!("unknown field {field}"), *line));
                };
                let field_ty = fields[index].ty;
                let addr = self.emit_value(
                    InstrKind::FieldAddr {
                        x: ptr_op,
                        field: index as u32,
                    },
                    *line,
                );
                Ok((addr, field_ty))
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                expr,
                line,
            } => {
                let (op, ty) = self.expr(expr)?;
                let TypeKind::Pointer { elem } = self.store.get(self.store.underlying(ty)).clone() else {
                    return Err(Error::build("cannot dereference non-pointer", *line));
                };
                Ok((op, elem))
            }
            other => Err(Error::build("expression is not addressable", other.line())),
        }
    }

    // === conversions and coercion ===

    fn coerce(&mut self, op: Operand, from: TypeId, to: TypeId, line: u32) -> Result<Operand, Error> {
        if from == to || to == TypeId::INVALID {
            return Ok(op);
        }
        // untyped nil takes the zero of any nilable target
        if from == TypeId::UNTYPED_NIL {
            if !self.store.nilable(to) {
                return Err(Error::build("cannot use nil as this type", line));
            }
            return Ok(Operand::Const(Const {
                ty: to,
                lit: Lit::Nil,
            }));
        }
        // constants convert at compile time where possible
        if let Operand::Const(c) = &op
            && let Some(adapted) = adapt_const(c, to, &self.store)
        {
            return Ok(Operand::Const(adapted));
        }
        if self.store.is_interface(to) {
            if self.store.is_interface(from) {
                return Ok(op);
            }
            return Ok(self.emit_value(InstrKind::MakeInterface { x: op }, line));
        }
        if self.store.underlying(from) == self.store.underlying(to) {
            return Ok(self.emit_value(InstrKind::ChangeType { ty: to, x: op }, line));
        }
        if self.store.is_interface(from) || (self.store.is_numeric(from) && self.store.is_numeric(to)) {
            return Ok(self.emit_value(InstrKind::Convert { ty: to, x: op }, line));
        }
        Err(Error::build(
            format!(
                "cannot use value of type {} as {}",
                self.store.name(from),
                self.store.name(to)
            ),
            line,
        ))
    }

    fn convert_to(&mut self, op: Operand, from: TypeId, to: TypeId, line: u32) -> (Operand, TypeId) {
        if let Operand::Const(c) = &op
            && let Some(adapted) = adapt_const(c, to, &self.store)
        {
            return (Operand::Const(adapted), to);
        }
        let kind = if self.store.is_interface(to) {
            if self.store.is_interface(from) {
                InstrKind::ChangeInterface { x: op }
            } else {
                InstrKind::MakeInterface { x: op }
            }
        } else if self.store.underlying(from) == self.store.underlying(to) && from != to {
            InstrKind::ChangeType { ty: to, x: op }
        } else {
            InstrKind::Convert { ty: to, x: op }
        };
        (self.emit_value(kind, line), to)
    }

    // === calls ===

    fn is_universe(&mut self, name: &str) -> bool {
        self.resolve_local(name).is_none() && self.member_of(&self.pkg.clone(), name).is_none()
    }

    /// Lowers a call expression in value position.
    fn lower_call(&mut self, e: &Expr) -> Result<(Operand, TypeId), Error> {
        // syntactic conversions: `[]byte(s)` and friends
        if let Expr::Conversion { ty, expr, line } = e {
            let to = self.resolve_type(ty)?;
            let (op, from) = self.expr(expr)?;
            return Ok(self.convert_to(op, from, to, *line));
        }
        let Expr::Call { callee, args, line } = e else {
            unreachable!("lower_call only sees calls and conversions")
        };
        let line = *line;

        // builtins, make/new, and conversions to named types
        if let Expr::Ident { name, .. } = callee.as_ref()
            && self.is_universe(name)
        {
            match name.as_str() {
                "make" => return self.lower_make(args, line),
                "new" => return self.lower_new(args, line),
                "len" | "cap" => {
                    let b = if name == "len" { Builtin::Len } else { Builtin::Cap };
                    let instr = self.builtin_call(b, args, line)?;
                    let result = self.emit_value(InstrKind::Call(instr), line);
                    return Ok((result, TypeId::INT));
                }
                "append" => {
                    if args.is_empty() {
                        return Err(Error::build("append needs a slice argument", line));
                    }
                    let (first, first_ty) = self.expr(&args[0])?;
                    let elem = self.store.elem(first_ty);
                    let mut call_args: SmallVec<[Operand; 4]> = SmallVec::new();
                    call_args.push(first);
                    for arg in &args[1..] {
                        let (op, ty) = self.expr(arg)?;
                        call_args.push(self.coerce(op, ty, elem, line)?);
                    }
                    let result = self.emit_value(
                        InstrKind::Call(CallInstr {
                            callee: Callee::Builtin(Builtin::Append),
                            args: call_args,
                        }),
                        line,
                    );
                    return Ok((result, first_ty));
                }
                "copy" => {
                    let instr = self.builtin_call(Builtin::Copy, args, line)?;
                    let result = self.emit_value(InstrKind::Call(instr), line);
                    return Ok((result, TypeId::INT));
                }
                "close" | "delete" | "print" | "println" => {
                    let b = match name.as_str() {
                        "close" => Builtin::Close,
                        "delete" => Builtin::Delete,
                        "print" => Builtin::Print,
                        _ => Builtin::Println,
                    };
                    let instr = self.builtin_call(b, args, line)?;
                    self.emit(InstrKind::Call(instr), line);
                    return Ok((Operand::Const(Const::nil()), TypeId::INVALID));
                }
                "recover" => {
                    let result = self.emit_value(
                        InstrKind::Call(CallInstr {
                            callee: Callee::Builtin(Builtin::Recover),
                            args: SmallVec::new(),
                        }),
                        line,
                    );
                    return Ok((result, TypeId::INTERFACE));
                }
                "panic" => {
                    // panic in value position still raises; it has no result
                    let instr = self.builtin_call(Builtin::Panic, args, line)?;
                    self.emit(InstrKind::Call(instr), line);
                    self.ctx().terminated = true;
                    return Ok((Operand::Const(Const::nil()), TypeId::INVALID));
                }
                _ => {
                    // conversion to a builtin or named type: `int(x)`
                    let te = TypeExpr::Name {
                        pkg: None,
                        name: name.clone(),
                        line,
                    };
                    if let Ok(to) = self.resolve_type(&te) {
                        if args.len() != 1 {
                            return Err(Error::build("conversion takes one argument", line));
                        }
                        let (op, from) = self.expr(&args[0])?;
                        return Ok(self.convert_to(op, from, to, line));
                    }
                }
            }
        }

        // conversion to a locally declared named type: `celsius(x)`
        if let Expr::Ident { name, .. } = callee.as_ref()
            && self.resolve_local(name).is_none()
            && let Some(Member::Type(to)) = self.member_of(&self.pkg.clone(), name)
        {
            if args.len() != 1 {
                return Err(Error::build("conversion takes one argument", line));
            }
            let (op, from) = self.expr(&args[0])?;
            return Ok(self.convert_to(op, from, to, line));
        }

        // conversion to a qualified type: `pkg.T(x)` with T a source type
        if let Expr::Selector { base, field, .. } = callee.as_ref()
            && let Expr::Ident { name, .. } = base.as_ref()
            && self.resolve_local(name).is_none()
            && let Some(ImportRef::Source(src)) = self.unit_imports.get(name).cloned()
            && let Some(Member::Type(to)) = self.member_of(&src, field)
        {
            if args.len() != 1 {
                return Err(Error::build("conversion takes one argument", line));
            }
            let (op, from) = self.expr(&args[0])?;
            return Ok(self.convert_to(op, from, to, line));
        }

        let (instr, results) = self.call_parts(callee, args, line)?;
        let result_ty = match results.len() {
            0 => TypeId::INVALID,
            1 => results[0],
            _ => self.store.tuple_of(results),
        };
        let result = self.emit_value(InstrKind::Call(instr), line);
        Ok((result, result_ty))
    }

    /// Shared call-construction for calls, `defer`, and `go`.
    fn lower_call_parts(&mut self, e: &Expr, line: u32) -> Result<CallInstr, Error> {
        let Expr::Call { callee, args, .. } = e else {
            return Err(Error::build("expression must be a function call", line));
        };
        if let Expr::Ident { name, .. } = callee.as_ref()
            && self.is_universe(name)
            && let Ok(b) = name.parse::<Builtin>()
        {
            return self.builtin_call(b, args, line);
        }
        let (instr, _) = self.call_parts(callee, args, line)?;
        Ok(instr)
    }

    fn builtin_call(&mut self, b: Builtin, args: &[Expr], line: u32) -> Result<CallInstr, Error> {
        let expected = match b {
            Builtin::Len | Builtin::Cap | Builtin::Close | Builtin::Panic => Some(1),
            Builtin::Copy | Builtin::Delete => Some(2),
            Builtin::Recover => Some(0),
            Builtin::Append | Builtin::Print | Builtin::Println => None,
        };
        if let Some(expected) = expected
            && args.len() != expected
        {
            return Err(Error::build(
                format!("{} takes {expected} argument(s)", b.as_ref()),
                line,
            ));
        }
        let mut call_args: SmallVec<[Operand; 4]> = SmallVec::new();
        for arg in args {
            let (op, _) = self.expr(arg)?;
            call_args.push(op);
        }
        Ok(CallInstr {
            callee: Callee::Builtin(b),
            args: call_args,
        })
    }

    fn call_parts(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        line: u32,
    ) -> Result<(CallInstr, Vec<TypeId>), Error> {
        // static call to a member function
        if let Expr::Ident { name, .. } = callee
            && self.resolve_local(name).is_none()
            && let Some(Member::Func { id, params, results }) = self.member_of(&self.pkg.clone(), name)
        {
            let call_args = self.lower_args(args, Some(&params), line)?;
            return Ok((
                CallInstr {
                    callee: Callee::Function(id),
                    args: call_args,
                },
                results,
            ));
        }

        // qualified calls: pkg.F(...)
        if let Expr::Selector { base, field, .. } = callee
            && let Expr::Ident { name, .. } = base.as_ref()
            && self.resolve_local(name).is_none()
        {
            let import = match self.unit_imports.get(name).cloned() {
                Some(import) => Some(import),
                None => registry::package_path(name).map(|path| {
                    self.unit_imports.insert(name.clone(), ImportRef::Extern(path.clone()));
                    self.imports.push(path.clone());
                    ImportRef::Extern(path)
                }),
            };
            match import {
                Some(ImportRef::Source(src)) => {
                    if let Some(Member::Func { id, params, results }) = self.member_of(&src, field) {
                        if !field.chars().next().is_some_and(char::is_uppercase) {
                            return Err(Error::build(format!("{field} is not exported by {src}"), line));
                        }
                        let call_args = self.lower_args(args, Some(&params), line)?;
                        return Ok((
                            CallInstr {
                                callee: Callee::Function(id),
                                args: call_args,
                            },
                            results,
                        ));
                    }
                    return Err(Error::build(format!("undefined: {name}.{field}"), line));
                }
                Some(ImportRef::Extern(path)) => {
                    let (id, obj) = self.extern_operand(&path, field, line)?;
                    if obj.as_func().is_none() {
                        return Err(Error::build(format!("{name}.{field} is not a function"), line));
                    }
                    let call_args = self.lower_args(args, None, line)?;
                    return Ok((
                        CallInstr {
                            callee: Callee::Value(Operand::External(id)),
                            args: call_args,
                        },
                        vec![TypeId::INTERFACE],
                    ));
                }
                None => {}
            }
        }

        // method invocation on an interface or external-type receiver
        if let Expr::Selector { base, field, .. } = callee {
            let base_ty = self.type_of(base)?;
            let under = self.store.get(self.store.underlying(base_ty)).clone();
            let is_method_recv = matches!(under, TypeKind::Interface)
                || matches!(&self.store.get(base_ty), TypeKind::Named { .. });
            if is_method_recv
                && !matches!(under, TypeKind::Struct { .. })
            {
                let (recv, _) = self.expr(base)?;
                let call_args = self.lower_args(args, None, line)?;
                return Ok((
                    CallInstr {
                        callee: Callee::Method {
                            recv,
                            name: field.clone(),
                        },
                        args: call_args,
                    },
                    vec![TypeId::INTERFACE],
                ));
            }
        }

        // indirect call through a function value
        let (callee_op, callee_ty) = self.expr(callee)?;
        let results = match self.store.get(self.store.underlying(callee_ty)).clone() {
            TypeKind::Func { params, results } => {
                let call_args = self.lower_args(args, Some(&params), line)?;
                return Ok((
                    CallInstr {
                        callee: Callee::Value(callee_op),
                        args: call_args,
                    },
                    results,
                ));
            }
            TypeKind::Interface => vec![TypeId::INTERFACE],
            _ => return Err(Error::build("called value is not a function", line)),
        };
        let call_args = self.lower_args(args, None, line)?;
        Ok((
            CallInstr {
                callee: Callee::Value(callee_op),
                args: call_args,
            },
            results,
        ))
    }

    fn lower_args(
        &mut self,
        args: &[Expr],
        params: Option<&[TypeId]>,
        line: u32,
    ) -> Result<SmallVec<[Operand; 4]>, Error> {
        if let Some(params) = params
            && params.len() != args.len()
        {
            return Err(Error::build(
                format!("wrong number of arguments: want {}, got {}", params.len(), args.len()),
                line,
            ));
        }
        let mut out: SmallVec<[Operand; 4]> = SmallVec::new();
        for (i, arg) in args.iter().enumerate() {
            let (op, ty) = self.expr(arg)?;
            let op = match params {
                Some(params) => self.coerce(op, ty, params[i], line)?,
                None => op,
            };
            out.push(op);
        }
        Ok(out)
    }

    fn lower_make(&mut self, args: &[Expr], line: u32) -> Result<(Operand, TypeId), Error> {
        let Some(first) = args.first() else {
            return Err(Error::build("make needs a type argument", line));
        };
        let ty = self.type_from_make_arg(first, line)?;
        let under = self.store.get(self.store.underlying(ty)).clone();
        match under {
            TypeKind::Slice { .. } => {
                let len = match args.get(1) {
                    Some(e) => self.expr(e)?.0,
                    None => Operand::Const(Const::int(0)),
                };
                let cap = match args.get(2) {
                    Some(e) => self.expr(e)?.0,
                    None => len.clone(),
                };
                let result = self.emit_value(InstrKind::MakeSlice { ty, len, cap }, line);
                Ok((result, ty))
            }
            TypeKind::Map { .. } => {
                // capacity hints are accepted and ignored
                if let Some(e) = args.get(1) {
                    self.expr(e)?;
                }
                let result = self.emit_value(InstrKind::MakeMap { ty }, line);
                Ok((result, ty))
            }
            TypeKind::Chan { .. } => {
                let size = match args.get(1) {
                    Some(e) => self.expr(e)?.0,
                    None => Operand::Const(Const::int(0)),
                };
                let result = self.emit_value(InstrKind::MakeChan { ty, size }, line);
                Ok((result, ty))
            }
            _ => Err(Error::build("make requires a slice, map, or channel type", line)),
        }
    }

    /// `make`'s first argument parses as an expression; reinterpret it as
    /// a type.
    fn type_from_make_arg(&mut self, e: &Expr, line: u32) -> Result<TypeId, Error> {
        match e {
            Expr::Ident { name, line } => self.resolve_type(&TypeExpr::Name {
                pkg: None,
                name: name.clone(),
                line: *line,
            }),
            Expr::TypeLit { ty, .. } => self.resolve_type(ty),
            Expr::Selector { base, field, line } => match base.as_ref() {
                Expr::Ident { name, .. } => self.resolve_type(&TypeExpr::Name {
                    pkg: Some(name.clone()),
                    name: field.clone(),
                    line: *line,
                }),
                _ => Err(Error::build("make needs a type argument", *line)),
            },
            _ => Err(Error::build("make needs a type argument", line)),
        }
    }

    fn lower_new(&mut self, args: &[Expr], line: u32) -> Result<(Operand, TypeId), Error> {
        let Some(first) = args.first() else {
            return Err(Error::build("new needs a type argument", line));
        };
        let ty = self.type_from_make_arg(first, line)?;
        let local = self.new_local(ty);
        self.ctx().locals[local.index()].heap = true;
        let ptr = self.emit_value(InstrKind::Alloc { local, heap: true }, line);
        let ptr_ty = self.store.pointer_to(ty);
        Ok((ptr, ptr_ty))
    }

    // === composites and closures ===

    fn lower_composite(&mut self, ty: TypeId, elems: &[CompositeElem], line: u32) -> Result<(Operand, TypeId), Error> {
        let under = self.store.get(self.store.underlying(ty)).clone();
        match under {
            TypeKind::Struct { fields } => {
                let local = self.new_local(ty);
                self.ctx().locals[local.index()].heap = true;
                let ptr = self.emit_value(InstrKind::Alloc { local, heap: true }, line);
                for (i, elem) in elems.iter().enumerate() {
                    let index = match &elem.key {
                        Some(Expr::Ident { name, .. }) => fields
                            .iter()
                            .position(|f| &f.name == name)
                            .ok_or_else(|| Error::build(format!("unknown field {name}"), line))?,
                        Some(other) => return Err(Error::build("field key must be an identifier", other.line())),
                        None => i,
                    };
                    if index >= fields.len() {
                        return Err(Error::build("too many values in struct literal", line));
                    }
                    let (value, value_ty) = self.expr(&elem.value)?;
                    let value = self.coerce(value, value_ty, fields[index].ty, line)?;
                    let addr = self.emit_value(
                        InstrKind::FieldAddr {
                            x: ptr.clone(),
                            field: index as u32,
                        },
                        line,
                    );
                    self.emit(InstrKind::Store { addr, value }, line);
                }
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: ptr,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, ty))
            }
            TypeKind::Slice { elem } => {
                let len = Operand::Const(Const::int(elems.len() as i64));
                let slice = self.emit_value(
                    InstrKind::MakeSlice {
                        ty,
                        len: len.clone(),
                        cap: len,
                    },
                    line,
                );
                for (i, e) in elems.iter().enumerate() {
                    let (value, value_ty) = self.expr(&e.value)?;
                    let value = self.coerce(value, value_ty, elem, line)?;
                    let addr = self.emit_value(
                        InstrKind::IndexAddr {
                            x: slice.clone(),
                            index: Operand::Const(Const::int(i as i64)),
                        },
                        line,
                    );
                    self.emit(InstrKind::Store { addr, value }, line);
                }
                Ok((slice, ty))
            }
            TypeKind::Array { elem, .. } => {
                let local = self.new_local(ty);
                self.ctx().locals[local.index()].heap = true;
                let ptr = self.emit_value(InstrKind::Alloc { local, heap: true }, line);
                for (i, e) in elems.iter().enumerate() {
                    let (value, value_ty) = self.expr(&e.value)?;
                    let value = self.coerce(value, value_ty, elem, line)?;
                    let addr = self.emit_value(
                        InstrKind::IndexAddr {
                            x: ptr.clone(),
                            index: Operand::Const(Const::int(i as i64)),
                        },
                        line,
                    );
                    self.emit(InstrKind::Store { addr, value }, line);
                }
                let value = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Deref,
                        x: ptr,
                        comma_ok: false,
                    },
                    line,
                );
                Ok((value, ty))
            }
            TypeKind::Map { key, elem } => {
                let map = self.emit_value(InstrKind::MakeMap { ty }, line);
                for e in elems {
                    let Some(k) = &e.key else {
                        return Err(Error::build("map literal entries need keys", line));
                    };
                    let (key_op, key_ty) = self.expr(k)?;
                    let key_op = self.coerce(key_op, key_ty, key, line)?;
                    let (value, value_ty) = self.expr(&e.value)?;
                    let value = self.coerce(value, value_ty, elem, line)?;
                    self.emit(
                        InstrKind::MapUpdate {
                            map: map.clone(),
                            key: key_op,
                            value,
                        },
                        line,
                    );
                }
                Ok((map, ty))
            }
            _ => Err(Error::build("invalid composite literal type", line)),
        }
    }

    fn lower_func_lit(
        &mut self,
        params: &[Param],
        results: &[TypeExpr],
        body: &AstBlock,
        line: u32,
    ) -> Result<(Operand, TypeId), Error> {
        let param_tys = params
            .iter()
            .map(|p| self.resolve_type(&p.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let result_tys = results
            .iter()
            .map(|t| self.resolve_type(t))
            .collect::<Result<Vec<_>, _>>()?;

        let parent = &self.ctx().name;
        let name = format!("{parent}$");
        let id = FuncId::new(self.funcs.len());
        let name = format!("{name}{}", id.index());
        self.funcs.push(placeholder_function(
            name.clone(),
            &self.pkg.clone(),
            &self.file.clone(),
            param_tys.clone(),
            result_tys.clone(),
            line,
        ));

        let has_defer = block_defers(body);
        self.ctxs.push(FuncCtx::new(
            name,
            param_tys.clone(),
            result_tys.clone(),
            has_defer,
            line,
        ));
        self.bind_params(params, &param_tys, line);
        self.lower_block(body)?;
        self.finish_body(line)?;
        let mut ctx = self.ctxs.pop().expect("closure ctx");
        let recover_block = self.maybe_recover_block(&mut ctx);
        let bindings = ctx.free.iter().map(|f| f.outer.clone()).collect::<Vec<_>>();
        self.seal_function(id, ctx, recover_block);

        let result = self.emit_value(InstrKind::MakeClosure { func: id, bindings }, line);
        let ty = self.store.intern(TypeKind::Func {
            params: param_tys,
            results: result_tys,
        });
        Ok((result, ty))
    }

    // === multi-value right-hand sides ===

    /// Lowers `a, b := rhs` forms: multi-result calls, comma-ok receives,
    /// map lookups, and type assertions.
    fn lower_multi_rhs(&mut self, rhs: &Expr, want: usize) -> Result<(Operand, Vec<TypeId>), Error> {
        let line = rhs.line();
        match rhs {
            Expr::Unary {
                op: UnaryOp::Recv,
                expr,
                ..
            } if want == 2 => {
                let (chan, chan_ty) = self.expr(expr)?;
                let elem = self.store.elem(chan_ty);
                let tuple = self.emit_value(
                    InstrKind::UnOp {
                        op: UnOpKind::Recv,
                        x: chan,
                        comma_ok: true,
                    },
                    line,
                );
                Ok((tuple, vec![elem, TypeId::BOOL]))
            }
            Expr::Index { base, index, .. } if want == 2 && self.is_map_base(base)? => {
                let (map_op, map_ty) = self.expr(base)?;
                let (key_ty, elem) = match self.store.get(self.store.underlying(map_ty)).clone() {
                    TypeKind::Map { key, elem } => (key, elem),
                    _ => unreachable!("is_map_base checked"),
                };
                let (key_op, key_from) = self.expr(index)?;
                let key_op = self.coerce(key_op, key_from, key_ty, line)?;
                let tuple = self.emit_value(
                    InstrKind::Lookup {
                        x: map_op,
                        index: key_op,
                        elem,
                        comma_ok: true,
                    },
                    line,
                );
                Ok((tuple, vec![elem, TypeId::BOOL]))
            }
            Expr::TypeAssert { base, ty, .. } if want == 2 => {
                let (op, base_ty) = self.expr(base)?;
                if !self.store.is_interface(base_ty) {
                    return Err(Error::build("type assertion on non-interface value", line));
                }
                let target = self.resolve_type(ty)?;
                let tuple = self.emit_value(
                    InstrKind::TypeAssert {
                        x: op,
                        ty: target,
                        comma_ok: true,
                    },
                    line,
                );
                Ok((tuple, vec![target, TypeId::BOOL]))
            }
            Expr::Call { callee, args, .. } => {
                let (instr, mut results) = self.call_parts(callee, args, line)?;
                // host functions and method calls have no static result
                // arity; their packed results unpack at runtime
                let dynamic = matches!(
                    instr.callee,
                    Callee::Method { .. } | Callee::Value(Operand::External(_))
                );
                if dynamic && results == vec![TypeId::INTERFACE] {
                    results = vec![TypeId::INTERFACE; want];
                }
                if results.len() != want {
                    return Err(Error::build(
                        format!("assignment count mismatch: want {want}, call returns {}", results.len()),
                        line,
                    ));
                }
                let tuple = self.emit_value(InstrKind::Call(instr), line);
                Ok((tuple, results))
            }
            other => Err(Error::build("expression does not produce multiple values", other.line())),
        }
    }
}

// === free helpers ===

fn placeholder_function(
    name: String,
    package: &str,
    file: &str,
    params: Vec<TypeId>,
    results: Vec<TypeId>,
    line: u32,
) -> Function {
    Function {
        name,
        package: package.to_owned(),
        file: file.to_owned(),
        params,
        results,
        num_free: 0,
        locals: Vec::new(),
        blocks: Vec::new(),
        num_regs: 0,
        recover_block: None,
        line,
    }
}

fn is_blank(e: &Expr) -> bool {
    matches!(e, Expr::Ident { name, .. } if name == "_")
}

fn is_ident(e: &Expr, want: &str) -> bool {
    matches!(e, Expr::Ident { name, .. } if name == want)
}

/// Whether a body contains `defer` anywhere (so the function needs
/// RunDefers on return and a recover block).
fn block_defers(block: &AstBlock) -> bool {
    block.stmts.iter().any(stmt_defers)
}

fn stmt_defers(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Defer { .. } => true,
        Stmt::If(s) => {
            block_defers(&s.then)
                || s.els.as_deref().is_some_and(stmt_defers)
                || s.init.as_deref().is_some_and(stmt_defers)
        }
        Stmt::For(s) => block_defers(&s.body),
        Stmt::ForRange(s) => block_defers(&s.body),
        Stmt::Block(b) => block_defers(b),
        Stmt::Select(s) => s.cases.iter().any(|c| block_defers(&c.body)),
        _ => false,
    }
}

fn binop_kind(op: BinaryOp) -> BinOpKind {
    match op {
        BinaryOp::Add => BinOpKind::Add,
        BinaryOp::Sub => BinOpKind::Sub,
        BinaryOp::Mul => BinOpKind::Mul,
        BinaryOp::Div => BinOpKind::Div,
        BinaryOp::Rem => BinOpKind::Rem,
        BinaryOp::And => BinOpKind::And,
        BinaryOp::Or => BinOpKind::Or,
        BinaryOp::Xor => BinOpKind::Xor,
        BinaryOp::AndNot => BinOpKind::AndNot,
        BinaryOp::Shl => BinOpKind::Shl,
        BinaryOp::Shr => BinOpKind::Shr,
        BinaryOp::Eq => BinOpKind::Eq,
        BinaryOp::Ne => BinOpKind::Ne,
        BinaryOp::Lt => BinOpKind::Lt,
        BinaryOp::Le => BinOpKind::Le,
        BinaryOp::Gt => BinOpKind::Gt,
        BinaryOp::Ge => BinOpKind::Ge,
        BinaryOp::LAnd | BinaryOp::LOr => unreachable!("short-circuit forms lower through phi"),
    }
}

/// Adapts a constant to a target type at compile time, or gives up and
/// lets the runtime convert.
fn adapt_const(c: &Const, to: TypeId, store: &TypeStore) -> Option<Const> {
    if store.is_float(to) {
        return match c.lit {
            Lit::Int(v) => Some(Const {
                ty: to,
                lit: Lit::Float(v as f64),
            }),
            Lit::Uint(v) => Some(Const {
                ty: to,
                lit: Lit::Float(v as f64),
            }),
            Lit::Float(v) => Some(Const { ty: to, lit: Lit::Float(v) }),
            _ => None,
        };
    }
    if store.is_unsigned(to) {
        return match c.lit {
            Lit::Int(v) if v >= 0 => Some(Const {
                ty: to,
                lit: Lit::Uint(v as u64),
            }),
            Lit::Uint(v) => Some(Const { ty: to, lit: Lit::Uint(v) }),
            _ => None,
        };
    }
    if store.is_integer(to) {
        return match c.lit {
            Lit::Int(v) => Some(Const { ty: to, lit: Lit::Int(v) }),
            Lit::Uint(v) => Some(Const {
                ty: to,
                lit: Lit::Int(v as i64),
            }),
            _ => None,
        };
    }
    if store.is_string(to) {
        return match &c.lit {
            Lit::Str(s) => Some(Const {
                ty: to,
                lit: Lit::Str(s.clone()),
            }),
            _ => None,
        };
    }
    None
}

fn fold_binary(op: BinaryOp, a: &Const, b: &Const) -> Option<Const> {
    match (&a.lit, &b.lit) {
        (Lit::Int(x), Lit::Int(y)) => {
            let lit = match op {
                BinaryOp::Add => Lit::Int(x.wrapping_add(*y)),
                BinaryOp::Sub => Lit::Int(x.wrapping_sub(*y)),
                BinaryOp::Mul => Lit::Int(x.wrapping_mul(*y)),
                BinaryOp::Div => {
                    if *y == 0 {
                        return None;
                    }
                    Lit::Int(x.wrapping_div(*y))
                }
                BinaryOp::Rem => {
                    if *y == 0 {
                        return None;
                    }
                    Lit::Int(x.wrapping_rem(*y))
                }
                BinaryOp::And => Lit::Int(x & y),
                BinaryOp::Or => Lit::Int(x | y),
                BinaryOp::Xor => Lit::Int(x ^ y),
                BinaryOp::AndNot => Lit::Int(x & !y),
                BinaryOp::Shl => Lit::Int(if *y >= 64 { 0 } else { x.wrapping_shl(*y as u32) }),
                BinaryOp::Shr => Lit::Int(x.wrapping_shr((*y).min(63) as u32)),
                BinaryOp::Eq => Lit::Bool(x == y),
                BinaryOp::Ne => Lit::Bool(x != y),
                BinaryOp::Lt => Lit::Bool(x < y),
                BinaryOp::Le => Lit::Bool(x <= y),
                BinaryOp::Gt => Lit::Bool(x > y),
                BinaryOp::Ge => Lit::Bool(x >= y),
                _ => return None,
            };
            Some(make_const(lit, a.ty))
        }
        (Lit::Float(x), Lit::Float(y)) => {
            let lit = match op {
                BinaryOp::Add => Lit::Float(x + y),
                BinaryOp::Sub => Lit::Float(x - y),
                BinaryOp::Mul => Lit::Float(x * y),
                BinaryOp::Div => Lit::Float(x / y),
                BinaryOp::Eq => Lit::Bool(x == y),
                BinaryOp::Ne => Lit::Bool(x != y),
                BinaryOp::Lt => Lit::Bool(x < y),
                BinaryOp::Le => Lit::Bool(x <= y),
                BinaryOp::Gt => Lit::Bool(x > y),
                BinaryOp::Ge => Lit::Bool(x >= y),
                _ => return None,
            };
            Some(make_const(lit, a.ty))
        }
        (Lit::Uint(x), Lit::Uint(y)) => {
            let lit = match op {
                BinaryOp::Add => Lit::Uint(x.wrapping_add(*y)),
                BinaryOp::Sub => Lit::Uint(x.wrapping_sub(*y)),
                BinaryOp::Mul => Lit::Uint(x.wrapping_mul(*y)),
                BinaryOp::Div => {
                    if *y == 0 {
                        return None;
                    }
                    Lit::Uint(x / y)
                }
                BinaryOp::Rem => {
                    if *y == 0 {
                        return None;
                    }
                    Lit::Uint(x % y)
                }
                BinaryOp::And => Lit::Uint(x & y),
                BinaryOp::Or => Lit::Uint(x | y),
                BinaryOp::Xor => Lit::Uint(x ^ y),
                BinaryOp::AndNot => Lit::Uint(x & !y),
                BinaryOp::Shl => Lit::Uint(if *y >= 64 { 0 } else { x.wrapping_shl(*y as u32) }),
                BinaryOp::Shr => Lit::Uint(if *y >= 64 { 0 } else { x >> y }),
                BinaryOp::Eq => Lit::Bool(x == y),
                BinaryOp::Ne => Lit::Bool(x != y),
                BinaryOp::Lt => Lit::Bool(x < y),
                BinaryOp::Le => Lit::Bool(x <= y),
                BinaryOp::Gt => Lit::Bool(x > y),
                BinaryOp::Ge => Lit::Bool(x >= y),
                _ => return None,
            };
            Some(make_const(lit, a.ty))
        }
        (Lit::Uint(x), Lit::Int(y)) if *y >= 0 => fold_binary(
            op,
            &Const {
                ty: a.ty,
                lit: Lit::Uint(*x),
            },
            &Const {
                ty: a.ty,
                lit: Lit::Uint(*y as u64),
            },
        ),
        (Lit::Int(x), Lit::Uint(y)) if *x >= 0 => fold_binary(
            op,
            &Const {
                ty: b.ty,
                lit: Lit::Uint(*x as u64),
            },
            &Const {
                ty: b.ty,
                lit: Lit::Uint(*y),
            },
        ),
        (Lit::Int(x), Lit::Float(y)) => fold_binary(
            op,
            &Const {
                ty: b.ty,
                lit: Lit::Float(*x as f64),
            },
            &Const {
                ty: b.ty,
                lit: Lit::Float(*y),
            },
        ),
        (Lit::Float(x), Lit::Int(y)) => fold_binary(
            op,
            &Const {
                ty: a.ty,
                lit: Lit::Float(*x),
            },
            &Const {
                ty: a.ty,
                lit: Lit::Float(*y as f64),
            },
        ),
        (Lit::Str(x), Lit::Str(y)) => {
            let lit = match op {
                BinaryOp::Add => Lit::Str(format!("{x}{y}")),
                BinaryOp::Eq => Lit::Bool(x == y),
                BinaryOp::Ne => Lit::Bool(x != y),
                BinaryOp::Lt => Lit::Bool(x < y),
                BinaryOp::Le => Lit::Bool(x <= y),
                BinaryOp::Gt => Lit::Bool(x > y),
                BinaryOp::Ge => Lit::Bool(x >= y),
                _ => return None,
            };
            Some(make_const(lit, a.ty))
        }
        (Lit::Bool(x), Lit::Bool(y)) => {
            let lit = match op {
                BinaryOp::Eq => Lit::Bool(x == y),
                BinaryOp::Ne => Lit::Bool(x != y),
                BinaryOp::LAnd => Lit::Bool(*x && *y),
                BinaryOp::LOr => Lit::Bool(*x || *y),
                _ => return None,
            };
            Some(make_const(lit, TypeId::BOOL))
        }
        _ => None,
    }
}

fn make_const(lit: Lit, ty: TypeId) -> Const {
    let ty = match lit {
        Lit::Bool(_) => TypeId::BOOL,
        _ => ty,
    };
    Const { ty, lit }
}
