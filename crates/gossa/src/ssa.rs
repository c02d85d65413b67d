//! The SSA intermediate representation.
//!
//! Everything here is index-based plain data: functions refer to blocks by
//! [`BlockId`], instructions assign registers ([`RegId`]) and read operands
//! that are either registers, constants, or environment-free references
//! (globals, functions, external symbols, parameters, free variables).
//! The whole IR serialises, which is what makes `Program::dump`/`load`
//! possible.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::AsRefStr;

use crate::types::TypeId;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub(crate) struct $name(u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index.try_into().expect(concat!(stringify!($name), " exceeds u32")))
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

id_type!(
    /// Index into the program's function table.
    FuncId
);
id_type!(
    /// Index into a function's block list.
    BlockId
);
id_type!(
    /// A virtual register inside one frame's environment.
    RegId
);
id_type!(
    /// Index into a function's local (storage cell) table.
    LocalId
);
id_type!(
    /// Index into the program's global table.
    GlobalId
);
id_type!(
    /// Index into the program's external binding table.
    ExternId
);

/// A literal constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Lit {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

/// A typed constant operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Const {
    pub ty: TypeId,
    pub lit: Lit,
}

impl Const {
    pub fn int(v: i64) -> Self {
        Self {
            ty: TypeId::INT,
            lit: Lit::Int(v),
        }
    }

    pub fn bool(v: bool) -> Self {
        Self {
            ty: TypeId::BOOL,
            lit: Lit::Bool(v),
        }
    }

    pub fn str(v: impl Into<String>) -> Self {
        Self {
            ty: TypeId::STRING,
            lit: Lit::Str(v.into()),
        }
    }

    pub fn nil() -> Self {
        Self {
            ty: TypeId::UNTYPED_NIL,
            lit: Lit::Nil,
        }
    }
}

/// An instruction input.
///
/// Everything except `Reg` resolves without the frame environment, which
/// is the IR's environment invariant: registers must be assigned in the
/// same frame before they are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Operand {
    Const(Const),
    Reg(RegId),
    /// Incoming parameter by position.
    Param(u16),
    /// Captured free-variable binding by position (a pointer value).
    FreeVar(u16),
    /// A global's storage cell; resolves to a pointer value.
    Global(GlobalId),
    /// A top-level function as a first-class value.
    Function(FuncId),
    /// A registry symbol: constants resolve to values, variables to
    /// pointers into host storage, functions to callables.
    External(ExternId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum UnOpKind {
    /// Arithmetic negation.
    Neg,
    /// Logical negation.
    Not,
    /// Bitwise complement.
    BitNot,
    /// Pointer dereference (load).
    Deref,
    /// Channel receive.
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOpKind {
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

/// The builtin functions the interpreter dispatches directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Builtin {
    Append,
    Copy,
    Close,
    Delete,
    Print,
    Println,
    Len,
    Cap,
    Panic,
    Recover,
}

/// What a call dispatches to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Callee {
    /// A statically known script function.
    Function(FuncId),
    Builtin(Builtin),
    /// A first-class function value: closure, function variable, or host
    /// function; re-dispatched by its runtime kind.
    Value(Operand),
    /// Method invocation resolved on the receiver's runtime type.
    Method { recv: Operand, name: String },
}

/// A call site: callee plus already-ordered argument operands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CallInstr {
    pub callee: Callee,
    pub args: SmallVec<[Operand; 4]>,
}

/// One case of a `Select` instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum SelectCase {
    Send { chan: Operand, value: Operand },
    Recv { chan: Operand, elem: TypeId },
}

/// The instruction set.
#[derive(Debug, Clone, Serialize, Deserialize, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum InstrKind {
    /// Bind a storage cell: heap allocs get a fresh cell per execution,
    /// stack allocs reset the frame's preallocated cell to the zero of its
    /// type. The result is a pointer to the cell.
    Alloc { local: LocalId, heap: bool },
    UnOp {
        op: UnOpKind,
        x: Operand,
        /// For `Recv`: produce a `{value, ok}` tuple.
        comma_ok: bool,
    },
    BinOp { op: BinOpKind, x: Operand, y: Operand },
    /// Wrap a concrete value into an interface; the runtime value passes
    /// through unchanged.
    MakeInterface { x: Operand },
    /// Static type change between identically shaped types.
    ChangeType { ty: TypeId, x: Operand },
    /// Interface-to-interface conversion; runtime value unchanged.
    ChangeInterface { x: Operand },
    Return { results: SmallVec<[Operand; 2]> },
    /// Read an element of a non-addressable aggregate (array value,
    /// string).
    Index { x: Operand, index: Operand },
    /// Address of the i-th element of a slice or pointed-to array.
    IndexAddr { x: Operand, index: Operand },
    /// Read the i-th field of a struct value.
    Field { x: Operand, field: u32 },
    /// Address of the i-th field through a struct pointer.
    FieldAddr { x: Operand, field: u32 },
    Store { addr: Operand, value: Operand },
    Slice {
        x: Operand,
        low: Option<Operand>,
        high: Option<Operand>,
        max: Option<Operand>,
    },
    Call(CallInstr),
    MakeSlice { ty: TypeId, len: Operand, cap: Operand },
    MakeMap { ty: TypeId },
    MakeChan { ty: TypeId, size: Operand },
    MapUpdate { map: Operand, key: Operand, value: Operand },
    Lookup {
        x: Operand,
        index: Operand,
        elem: TypeId,
        comma_ok: bool,
    },
    /// Read the i-th component of a packed tuple.
    Extract { tuple: Operand, index: u32 },
    If {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Jump { target: BlockId },
    /// Select the edge value whose predecessor block was executed.
    Phi { edges: Vec<(BlockId, Operand)> },
    Convert { ty: TypeId, x: Operand },
    /// Begin iteration; snapshots map keys (and slice/string contents) at
    /// this point.
    Range { x: Operand },
    /// Advance an iterator, producing `{ok, key, value}`.
    Next { iter: Operand, key: TypeId, value: TypeId },
    MakeClosure { func: FuncId, bindings: Vec<Operand> },
    /// Capture a call and its arguments for execution at frame exit.
    Defer(CallInstr),
    /// Run the frame's deferred calls in reverse order.
    RunDefers,
    Send { chan: Operand, value: Operand },
    TypeAssert {
        x: Operand,
        ty: TypeId,
        comma_ok: bool,
    },
    /// Spawn the call as a concurrent task.
    Go(CallInstr),
    Panic { x: Operand },
    Select {
        cases: Vec<SelectCase>,
        blocking: bool,
    },
}

/// One instruction: an optional destination register plus the operation
/// and its source line for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Instr {
    pub dst: Option<RegId>,
    pub line: u32,
    pub kind: InstrKind,
}

/// A basic block: a straight-line instruction list ending in a
/// terminator (`If`, `Jump`, `Return`, or `Panic`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Block {
    pub instrs: Vec<Instr>,
}

/// A local storage slot: the element type held by its cell, and whether
/// the cell escapes the frame (captured by a closure or address-taken).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LocalDef {
    pub ty: TypeId,
    pub heap: bool,
}

/// A compiled function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Function {
    /// Qualified name, e.g. `main.test` or `main.test$1` for closures.
    pub name: String,
    pub package: String,
    /// Script file name, used by `print` diagnostics.
    pub file: String,
    pub params: Vec<TypeId>,
    pub results: Vec<TypeId>,
    pub num_free: u16,
    pub locals: Vec<LocalDef>,
    pub blocks: Vec<Block>,
    pub num_regs: u32,
    /// Entry block taken after a deferred call recovers this frame's
    /// panic; returns zero results. Present whenever the function defers.
    pub recover_block: Option<BlockId>,
    pub line: u32,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }
}

/// A global variable definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GlobalDef {
    /// Qualified name, e.g. `main.counter`.
    pub name: String,
    /// Element type held by the global's cell.
    pub ty: TypeId,
}

/// An external symbol reference, re-resolved against the registry when a
/// program is built or loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExternalDef {
    pub pkg: String,
    pub name: String,
}
