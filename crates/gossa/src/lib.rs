#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts follow source-language conversion rules")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the source language")]

mod ast;
mod chan;
mod context;
mod error;
mod interp;
mod lower;
mod object;
mod parse;
mod program;
pub mod registry;
mod scan;
mod ssa;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    context::{Context, DEFAULT_TIMEOUT},
    error::{Error, ErrorKind},
    object::{Object, OpaqueObject, ScriptFunc},
    parse::parse_func_list,
    program::{Program, run},
    registry::{HostFn, InsertTextRule, Keyword, KeywordKind, add_package, keywords, new_const, new_function,
        new_type, new_var},
    tracer::{NoopTracer, RecordingTracer, StderrTracer, VmTracer},
};
