//! Call dispatch: SSA functions, builtins, host functions, first-class
//! function values, and method invocation on external types.

use std::fmt::Write as _;

use crate::{
    error::{Panic, RunResult},
    object::{object_from_value, value_from_object},
    program::Program,
    registry,
    ssa::{Builtin, CallInstr, Callee, Function},
    tracer::VmTracer,
    value::{FuncValue, MapKey, SliceValue, Value},
};

use super::{DeferredCall, Frame, Interp, ResolvedCallee};

/// The `recover` builtin: reads and clears the panic of the frame on
/// whose behalf the current deferred call runs. Outside a deferred call
/// there is no slot and recover yields nil.
pub(super) fn recover_value(recover_slot: Option<&mut Option<Panic>>) -> Value {
    match recover_slot {
        Some(slot) => match slot.take() {
            Some(panic) => panic.value,
            None => Value::Nil,
        },
        None => Value::Nil,
    }
}

impl<T: VmTracer> Interp<'_, T> {
    /// Executes a `Call` instruction. Arguments are resolved left to
    /// right before the callee dispatches.
    pub(super) fn exec_call(
        &mut self,
        frame: &mut Frame,
        func: &Function,
        call: &CallInstr,
        line: u32,
        recover_slot: Option<&mut Option<Panic>>,
    ) -> RunResult<Value> {
        if let Callee::Builtin(Builtin::Recover) = call.callee {
            return Ok(recover_value(recover_slot));
        }
        let resolved = self.resolve_call(frame, call, line, &func.file)?;
        self.invoke_direct(resolved)
    }

    fn invoke_direct(&mut self, call: DeferredCall) -> RunResult<Value> {
        match call.callee {
            ResolvedCallee::Ssa(fv) => self.call(&fv, call.args, None),
            ResolvedCallee::Host(obj) => self.call_host(&obj, &call.args),
            ResolvedCallee::Builtin(Builtin::Recover) => Ok(Value::Nil),
            ResolvedCallee::Builtin(b) => self.exec_builtin(b, call.args, call.line, &call.file),
            ResolvedCallee::Method { recv, name } => self.call_method(&recv, &name, &call.args),
        }
    }

    /// Resolves a call site to a callee and evaluated arguments. Shared
    /// by `Call`, `Defer` (which captures the result for later), and `Go`
    /// (which ships it to a new task).
    pub(super) fn resolve_call(
        &mut self,
        frame: &Frame,
        call: &CallInstr,
        line: u32,
        file: &str,
    ) -> RunResult<DeferredCall> {
        let callee = match &call.callee {
            Callee::Function(fid) => ResolvedCallee::Ssa(FuncValue::new(*fid, Vec::new())),
            Callee::Builtin(b) => ResolvedCallee::Builtin(*b),
            Callee::Value(op) => match self.operand(frame, op)? {
                Value::Func(fv) => ResolvedCallee::Ssa(fv),
                Value::ExternFunc(obj) => ResolvedCallee::Host(obj),
                Value::Nil => return Err(Panic::msg("runtime error: call of nil function")),
                other => {
                    return Err(Panic::msg(format!("call of non-function {}", other.kind_name())));
                }
            },
            Callee::Method { recv, name } => ResolvedCallee::Method {
                recv: self.operand(frame, recv)?,
                name: name.clone(),
            },
        };
        let args = call
            .args
            .iter()
            .map(|a| self.operand(frame, a))
            .collect::<RunResult<Vec<_>>>()?;
        Ok(DeferredCall {
            callee,
            args,
            line,
            file: file.to_owned(),
        })
    }

    /// Calls a host function: arguments convert to host objects, the
    /// result converts back. A host error return becomes a script panic.
    pub(super) fn call_host(&mut self, obj: &registry::ExternObject, args: &[Value]) -> RunResult<Value> {
        let Some(host) = obj.as_func() else {
            return Err(Panic::msg(format!("{} is not callable", obj.name())));
        };
        let program = Program::from_inner(self.prog.clone());
        let host_args = args.iter().map(|a| object_from_value(a, &program)).collect::<Vec<_>>();
        match (host.f)(&host_args) {
            Ok(result) => value_from_object(&result).map_err(Panic::msg),
            Err(message) => Err(Panic::msg(message)),
        }
    }

    /// Method invocation: the method resolves by name on the receiver's
    /// runtime type through the registry, then dispatches as a host call
    /// with the receiver prepended.
    pub(super) fn call_method(&mut self, recv: &Value, name: &str, args: &[Value]) -> RunResult<Value> {
        let Value::Opaque(opaque) = recv else {
            return Err(Panic::msg(format!(
                "method {name} undefined on {}",
                recv.kind_name()
            )));
        };
        let Some(method) = registry::find_type_method(&opaque.type_name, name) else {
            return Err(Panic::msg(format!(
                "method {name} undefined on {}",
                opaque.type_name
            )));
        };
        let program = Program::from_inner(self.prog.clone());
        let mut host_args = Vec::with_capacity(args.len() + 1);
        host_args.push(object_from_value(recv, &program));
        for arg in args {
            host_args.push(object_from_value(arg, &program));
        }
        match (method.f)(&host_args) {
            Ok(result) => value_from_object(&result).map_err(Panic::msg),
            Err(message) => Err(Panic::msg(message)),
        }
    }

    pub(super) fn exec_builtin(&mut self, b: Builtin, args: Vec<Value>, line: u32, file: &str) -> RunResult<Value> {
        match b {
            Builtin::Append => {
                let mut iter = args.into_iter();
                let first = iter.next().unwrap_or(Value::Nil);
                let extra = iter.collect::<Vec<_>>();
                if extra.is_empty() {
                    return Ok(first);
                }
                match first {
                    Value::Slice(s) => Ok(Value::Slice(s.append(extra))),
                    Value::Nil => Ok(Value::Slice(SliceValue::from_values(extra))),
                    other => Err(Panic::msg(format!("append to {}", other.kind_name()))),
                }
            }
            Builtin::Copy => {
                let dst = &args[0];
                let src = &args[1];
                let Value::Slice(dst) = dst else {
                    return Err(Panic::msg(format!("copy to {}", dst.kind_name())));
                };
                let src_values = match src {
                    Value::Slice(s) => s.snapshot(),
                    Value::Str(s) => s.bytes().map(|b| Value::Uint(u64::from(b))).collect(),
                    Value::Nil => Vec::new(),
                    other => return Err(Panic::msg(format!("copy from {}", other.kind_name()))),
                };
                let count = dst.len.min(src_values.len());
                for (i, value) in src_values.into_iter().take(count).enumerate() {
                    dst.elem_place(i).store(value)?;
                }
                Ok(Value::Int(count as i64))
            }
            Builtin::Close => match &args[0] {
                Value::Chan(c) => {
                    c.close()?;
                    Ok(Value::Nil)
                }
                Value::Nil => Err(Panic::msg("close of nil channel")),
                other => Err(Panic::msg(format!("close of {}", other.kind_name()))),
            },
            Builtin::Delete => {
                match &args[0] {
                    Value::Map(m) => {
                        let key = MapKey::from_value(&args[1])?;
                        m.remove(&key);
                    }
                    // deleting from a nil map is a no-op
                    Value::Nil => {}
                    other => return Err(Panic::msg(format!("delete from {}", other.kind_name()))),
                }
                Ok(Value::Nil)
            }
            Builtin::Print | Builtin::Println => {
                let mut text = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        text.push(' ');
                    }
                    let _ = write!(text, "{arg}");
                }
                let stamp = chrono::Local::now().format("%H:%M:%S");
                self.ctx.write_line(&format!("[{stamp} {file}:{line}] {text}"));
                Ok(Value::Nil)
            }
            Builtin::Len => args[0].len().map(Value::Int),
            Builtin::Cap => args[0].cap().map(Value::Int),
            Builtin::Panic => {
                let payload = args.into_iter().next().unwrap_or(Value::Nil);
                Err(Panic::new(payload))
            }
            Builtin::Recover => Ok(Value::Nil),
        }
    }
}
