//! Per-instruction dispatch.

use crate::{
    chan::{ChanValue, RecvOutcome, SelectOp, SelectResult, SendOutcome, run_select},
    error::{Panic, RunResult},
    ssa::{BinOpKind, Const, Function, Instr, InstrKind, Lit, Operand, SelectCase, UnOpKind},
    tracer::VmTracer,
    types::TypeId,
    value::{Cell, FuncValue, IterValue, MapKey, MapValue, Place, SliceValue, Value},
};

use super::{Flow, Frame, Interp};

pub(super) fn const_value(c: &Const) -> Value {
    match &c.lit {
        Lit::Nil => Value::Nil,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Int(i) => Value::Int(*i),
        Lit::Uint(u) => Value::Uint(*u),
        Lit::Float(f) => Value::Float(*f),
        Lit::Str(s) => Value::str(s),
    }
}

impl<T: VmTracer> Interp<'_, T> {
    /// Resolves an operand against the frame environment. Constants,
    /// globals, functions, and external symbols resolve without it.
    pub(super) fn operand(&self, frame: &Frame, op: &Operand) -> RunResult<Value> {
        Ok(match op {
            Operand::Const(c) => const_value(c),
            Operand::Reg(r) => frame.regs[r.index()]
                .clone()
                .expect("register read before assignment"),
            Operand::Param(i) => frame.params[*i as usize].clone(),
            Operand::FreeVar(i) => frame.free[*i as usize].clone(),
            Operand::Global(g) => Value::Pointer(Place::Cell(self.prog.global_cells[g.index()].clone())),
            Operand::Function(f) => Value::Func(FuncValue::new(*f, Vec::new())),
            Operand::External(e) => {
                let obj = &self.prog.extern_objects[e.index()];
                match &obj.kind {
                    crate::registry::ExternKind::Function(_) => Value::ExternFunc(obj.clone()),
                    crate::registry::ExternKind::Var(_) => Value::Pointer(Place::Extern(obj.clone())),
                    crate::registry::ExternKind::Const(v) => v.clone(),
                    crate::registry::ExternKind::Type(_) => {
                        return Err(Panic::msg("type used as value"));
                    }
                }
            }
        })
    }

    fn assign(frame: &mut Frame, instr: &Instr, value: Value) {
        if let Some(dst) = instr.dst {
            frame.regs[dst.index()] = Some(value);
        }
    }

    pub(super) fn exec(
        &mut self,
        frame: &mut Frame,
        func: &Function,
        instr: &Instr,
        recover_slot: Option<&mut Option<Panic>>,
    ) -> RunResult<Flow> {
        match &instr.kind {
            InstrKind::Alloc { local, heap } => {
                let zero = self.prog.store.zero(func.locals[local.index()].ty);
                let cell = if *heap {
                    Cell::new(zero)
                } else {
                    let cell = frame.locals[local.index()].clone();
                    cell.store(zero);
                    cell
                };
                Self::assign(frame, instr, Value::Pointer(Place::Cell(cell)));
            }
            InstrKind::UnOp { op, x, comma_ok } => {
                let value = self.exec_unop(frame, *op, x, *comma_ok)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::BinOp { op, x, y } => {
                let x = self.operand(frame, x)?;
                let y = self.operand(frame, y)?;
                let value = binop(*op, &x, &y)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::MakeInterface { x } | InstrKind::ChangeInterface { x } => {
                let value = self.operand(frame, x)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::ChangeType { x, .. } => {
                let value = self.operand(frame, x)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::Return { results } => {
                frame.result = match results.len() {
                    0 => Value::Nil,
                    1 => self.operand(frame, &results[0])?,
                    _ => {
                        let values = results
                            .iter()
                            .map(|r| self.operand(frame, r))
                            .collect::<RunResult<Vec<_>>>()?;
                        Value::tuple(values)
                    }
                };
                return Ok(Flow::Return);
            }
            InstrKind::Index { x, index } => {
                let x = self.operand(frame, x)?;
                let i = self.operand(frame, index)?.expect_int()?;
                Self::assign(frame, instr, x.index(i)?);
            }
            InstrKind::IndexAddr { x, index } => {
                let x = self.operand(frame, x)?;
                let i = self.operand(frame, index)?.expect_int()?;
                let place = elem_addr(&x, i)?;
                Self::assign(frame, instr, Value::Pointer(place));
            }
            InstrKind::Field { x, field } => {
                let x = self.operand(frame, x)?;
                Self::assign(frame, instr, x.field(*field as usize)?);
            }
            InstrKind::FieldAddr { x, field } => {
                let x = self.operand(frame, x)?;
                let place = match x {
                    Value::Pointer(base) => Place::Field {
                        base: Box::new(base),
                        index: *field as usize,
                    },
                    Value::Nil => {
                        return Err(Panic::msg(
                            "runtime error: invalid memory address or nil pointer dereference",
                        ));
                    }
                    other => {
                        return Err(Panic::msg(format!(
                            "field address through non-pointer {}",
                            other.kind_name()
                        )));
                    }
                };
                Self::assign(frame, instr, Value::Pointer(place));
            }
            InstrKind::Store { addr, value } => {
                let addr = self.operand(frame, addr)?;
                let value = self.operand(frame, value)?;
                match addr {
                    Value::Pointer(place) => place.store(value)?,
                    Value::Nil => {
                        return Err(Panic::msg(
                            "runtime error: invalid memory address or nil pointer dereference",
                        ));
                    }
                    other => {
                        return Err(Panic::msg(format!("store through non-pointer {}", other.kind_name())));
                    }
                }
            }
            InstrKind::Slice { x, low, high, max } => {
                let x = self.operand(frame, x)?;
                let low = self.opt_index(frame, low.as_ref())?;
                let high = self.opt_index(frame, high.as_ref())?;
                let max = self.opt_index(frame, max.as_ref())?;
                Self::assign(frame, instr, slice_value(&x, low, high, max)?);
            }
            InstrKind::Call(call) => {
                let value = self.exec_call(frame, func, call, instr.line, recover_slot)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::MakeSlice { ty, len, cap } => {
                let len = self.operand(frame, len)?.expect_int()?;
                let cap = self.operand(frame, cap)?.expect_int()?;
                if len < 0 || cap < len {
                    return Err(Panic::msg("runtime error: makeslice: len out of range"));
                }
                let elem = self.prog.store.elem(*ty);
                let zero = self.prog.store.zero(elem);
                Self::assign(
                    frame,
                    instr,
                    Value::Slice(SliceValue::with_zeros(&zero, len as usize, cap as usize)),
                );
            }
            InstrKind::MakeMap { .. } => {
                Self::assign(frame, instr, Value::Map(MapValue::new()));
            }
            InstrKind::MakeChan { ty, size } => {
                let size = self.operand(frame, size)?.expect_int()?;
                if size < 0 {
                    return Err(Panic::msg("runtime error: makechan: size out of range"));
                }
                let elem = self.prog.store.elem(*ty);
                Self::assign(frame, instr, Value::Chan(ChanValue::new(size as usize, elem)));
            }
            InstrKind::MapUpdate { map, key, value } => {
                let map = self.operand(frame, map)?;
                let key = MapKey::from_value(&self.operand(frame, key)?)?;
                let value = self.operand(frame, value)?;
                match map {
                    Value::Map(m) => m.insert(key, value),
                    Value::Nil => return Err(Panic::msg("assignment to entry in nil map")),
                    other => return Err(Panic::msg(format!("map update on {}", other.kind_name()))),
                }
            }
            InstrKind::Lookup {
                x,
                index,
                elem,
                comma_ok,
            } => {
                let x = self.operand(frame, x)?;
                let key = MapKey::from_value(&self.operand(frame, index)?)?;
                let found = x.map_index(&key)?;
                let value = match (found, *comma_ok) {
                    (Some(v), false) => v,
                    (None, false) => self.prog.store.zero(*elem),
                    (Some(v), true) => Value::tuple(vec![v, Value::Bool(true)]),
                    (None, true) => Value::tuple(vec![self.prog.store.zero(*elem), Value::Bool(false)]),
                };
                Self::assign(frame, instr, value);
            }
            InstrKind::Extract { tuple, index } => {
                let tuple = self.operand(frame, tuple)?;
                let Value::Tuple(values) = tuple else {
                    return Err(Panic::msg(format!("extract from non-tuple {}", tuple.kind_name())));
                };
                Self::assign(frame, instr, values[*index as usize].clone());
            }
            InstrKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.operand(frame, cond)?.expect_bool()?;
                frame.prev_block = frame.block;
                frame.block = Some(if cond { *then_block } else { *else_block });
                return Ok(Flow::Jump);
            }
            InstrKind::Jump { target } => {
                frame.prev_block = frame.block;
                frame.block = Some(*target);
                return Ok(Flow::Jump);
            }
            InstrKind::Phi { edges } => {
                let prev = frame.prev_block.expect("phi without predecessor");
                let Some((_, op)) = edges.iter().find(|(block, _)| *block == prev) else {
                    return Err(Panic::msg("phi has no edge for predecessor"));
                };
                let value = self.operand(frame, op)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::Convert { ty, x } => {
                let x = self.operand(frame, x)?;
                let value = self.prog.store.conv(&x, *ty);
                Self::assign(frame, instr, value);
            }
            InstrKind::Range { x } => {
                let x = self.operand(frame, x)?;
                let pairs = range_pairs(&x)?;
                Self::assign(frame, instr, Value::Iter(IterValue::new(pairs)));
            }
            InstrKind::Next { iter, key, value } => {
                let it = self.operand(frame, iter)?;
                let Value::Iter(it) = it else {
                    return Err(Panic::msg("next on non-iterator"));
                };
                let triple = match it.next() {
                    Some((k, v)) => Value::tuple(vec![Value::Bool(true), k, v]),
                    None => Value::tuple(vec![
                        Value::Bool(false),
                        self.prog.store.zero(*key),
                        self.prog.store.zero(*value),
                    ]),
                };
                Self::assign(frame, instr, triple);
            }
            InstrKind::MakeClosure { func: fid, bindings } => {
                let bindings = bindings
                    .iter()
                    .map(|b| self.operand(frame, b))
                    .collect::<RunResult<Vec<_>>>()?;
                Self::assign(frame, instr, Value::Func(FuncValue::new(*fid, bindings)));
            }
            InstrKind::Defer(call) => {
                let deferred = self.resolve_call(frame, call, instr.line, &func.file)?;
                frame.defers.push(deferred);
            }
            InstrKind::RunDefers => {
                self.run_defers(frame);
                if let Some(panic) = frame.panic.take() {
                    return Err(panic);
                }
            }
            InstrKind::Send { chan, value } => {
                let chan = self.operand(frame, chan)?;
                let value = self.operand(frame, value)?;
                match chan {
                    Value::Chan(c) => match c.send(value, self.ctx.remaining())? {
                        SendOutcome::Sent => {}
                        SendOutcome::TimedOut => return Err(self.cancelled_panic()),
                    },
                    Value::Nil => return Err(self.block_forever()),
                    other => return Err(Panic::msg(format!("send on {}", other.kind_name()))),
                }
            }
            InstrKind::TypeAssert { x, ty, comma_ok } => {
                let x = self.operand(frame, x)?;
                let value = self.exec_type_assert(x, *ty, *comma_ok)?;
                Self::assign(frame, instr, value);
            }
            InstrKind::Go(call) => {
                let resolved = self.resolve_call(frame, call, instr.line, &func.file)?;
                self.spawn(resolved)?;
            }
            InstrKind::Panic { x } => {
                let value = self.operand(frame, x)?;
                return Err(Panic::new(value));
            }
            InstrKind::Select { cases, blocking } => {
                let value = self.exec_select(frame, cases, *blocking)?;
                Self::assign(frame, instr, value);
            }
        }
        Ok(Flow::Next)
    }

    fn opt_index(&self, frame: &Frame, op: Option<&Operand>) -> RunResult<Option<i64>> {
        match op {
            Some(op) => Ok(Some(self.operand(frame, op)?.expect_int()?)),
            None => Ok(None),
        }
    }

    fn exec_unop(&mut self, frame: &Frame, op: UnOpKind, x: &Operand, comma_ok: bool) -> RunResult<Value> {
        let x = self.operand(frame, x)?;
        match op {
            UnOpKind::Deref => x.elem(),
            UnOpKind::Neg => match x {
                Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
                Value::Uint(u) => Ok(Value::Uint(u.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(Panic::msg(format!("cannot negate {}", other.kind_name()))),
            },
            UnOpKind::Not => Ok(Value::Bool(!x.expect_bool()?)),
            UnOpKind::BitNot => match x {
                Value::Int(i) => Ok(Value::Int(!i)),
                Value::Uint(u) => Ok(Value::Uint(!u)),
                other => Err(Panic::msg(format!("cannot complement {}", other.kind_name()))),
            },
            UnOpKind::Recv => match x {
                Value::Chan(c) => {
                    let elem = c.elem();
                    match c.recv(self.ctx.remaining()) {
                        RecvOutcome::Value(v) => Ok(if comma_ok {
                            Value::tuple(vec![v, Value::Bool(true)])
                        } else {
                            v
                        }),
                        RecvOutcome::Closed => {
                            let zero = self.prog.store.zero(elem);
                            Ok(if comma_ok {
                                Value::tuple(vec![zero, Value::Bool(false)])
                            } else {
                                zero
                            })
                        }
                        RecvOutcome::TimedOut => Err(self.cancelled_panic()),
                    }
                }
                Value::Nil => Err(self.block_forever()),
                other => Err(Panic::msg(format!("receive from {}", other.kind_name()))),
            },
        }
    }

    fn exec_type_assert(&mut self, x: Value, ty: TypeId, comma_ok: bool) -> RunResult<Value> {
        let store = &self.prog.store;
        if x.is_nil() {
            if comma_ok {
                return Ok(Value::tuple(vec![store.zero(ty), Value::Bool(false)]));
            }
            return Err(Panic::msg(format!(
                "interface conversion: interface {{}} is nil, not {}",
                store.name(ty)
            )));
        }
        if store.assignable(&x, ty) {
            return Ok(if comma_ok {
                Value::tuple(vec![x, Value::Bool(true)])
            } else {
                x
            });
        }
        if comma_ok {
            return Ok(Value::tuple(vec![store.zero(ty), Value::Bool(false)]));
        }
        Err(Panic::msg(format!(
            "interface conversion: interface {{}} is {}, not {}",
            x.kind_name(),
            store.name(ty)
        )))
    }

    fn exec_select(&mut self, frame: &Frame, cases: &[SelectCase], blocking: bool) -> RunResult<Value> {
        let mut ops = Vec::with_capacity(cases.len());
        let mut recv_elems = Vec::new();
        for case in cases {
            match case {
                SelectCase::Send { chan, value } => {
                    let chan = self.select_chan(frame, chan, TypeId::INTERFACE)?;
                    let value = self.operand(frame, value)?;
                    ops.push(SelectOp::Send { chan, value });
                }
                SelectCase::Recv { chan, elem } => {
                    let chan = self.select_chan(frame, chan, *elem)?;
                    recv_elems.push(*elem);
                    ops.push(SelectOp::Recv { chan });
                }
            }
        }

        let result = run_select(ops, blocking, self.ctx.remaining())?;
        let (chosen, recv_ok, received) = match result {
            SelectResult::Chosen {
                index,
                recv_ok,
                value,
            } => (index as i64, recv_ok, value),
            SelectResult::Default => (-1, false, None),
            SelectResult::TimedOut => return Err(self.cancelled_panic()),
        };

        // tuple layout: chosen, recv-ok, then one slot per receive case
        let mut tuple = vec![Value::Int(chosen), Value::Bool(recv_ok)];
        let mut recv_pos = 0usize;
        for (i, case) in cases.iter().enumerate() {
            if let SelectCase::Recv { .. } = case {
                let slot = if chosen == i as i64 {
                    match &received {
                        Some(v) => v.clone(),
                        None => self.prog.store.zero(recv_elems[recv_pos]),
                    }
                } else {
                    self.prog.store.zero(recv_elems[recv_pos])
                };
                tuple.push(slot);
                recv_pos += 1;
            }
        }
        Ok(Value::tuple(tuple))
    }

    /// Resolves a select case's channel; nil channels become fresh idle
    /// channels that never report ready.
    fn select_chan(&self, frame: &Frame, op: &Operand, elem: TypeId) -> RunResult<ChanValue> {
        match self.operand(frame, op)? {
            Value::Chan(c) => Ok(c),
            Value::Nil => Ok(ChanValue::new(0, elem)),
            other => Err(Panic::msg(format!("select on {}", other.kind_name()))),
        }
    }
}

fn elem_addr(x: &Value, index: i64) -> RunResult<Place> {
    match x {
        Value::Slice(s) => {
            if index < 0 || index as usize >= s.len {
                return Err(Panic::msg(format!(
                    "runtime error: index out of range [{index}] with length {}",
                    s.len
                )));
            }
            Ok(s.elem_place(index as usize))
        }
        Value::Pointer(place) => {
            let inner = place.load()?;
            match inner {
                Value::Array(values) => {
                    if index < 0 || index as usize >= values.len() {
                        return Err(Panic::msg(format!(
                            "runtime error: index out of range [{index}] with length {}",
                            values.len()
                        )));
                    }
                    Ok(Place::Field {
                        base: Box::new(place.clone()),
                        index: index as usize,
                    })
                }
                other => Err(Panic::msg(format!("element address of {}", other.kind_name()))),
            }
        }
        Value::Nil => Err(Panic::msg(format!(
            "runtime error: index out of range [{index}] with length 0"
        ))),
        other => Err(Panic::msg(format!("element address of {}", other.kind_name()))),
    }
}

fn slice_value(x: &Value, low: Option<i64>, high: Option<i64>, max: Option<i64>) -> RunResult<Value> {
    let check = |v: i64| -> RunResult<usize> {
        if v < 0 {
            return Err(Panic::msg("runtime error: slice bounds out of range"));
        }
        Ok(v as usize)
    };
    match x {
        Value::Slice(s) => {
            let low = check(low.unwrap_or(0))?;
            let high = check(high.unwrap_or(s.len as i64))?;
            let max = check(max.unwrap_or(s.cap as i64))?;
            Ok(Value::Slice(s.reslice(low, high, max)?))
        }
        Value::Str(s) => {
            let low = check(low.unwrap_or(0))?;
            let high = check(high.unwrap_or(s.len() as i64))?;
            if low > high || high > s.len() {
                return Err(Panic::msg("runtime error: slice bounds out of range"));
            }
            match s.get(low..high) {
                Some(sub) => Ok(Value::str(sub)),
                None => Err(Panic::msg("runtime error: slice bounds out of range")),
            }
        }
        Value::Array(values) => slice_of_array(values, low, high, max),
        Value::Pointer(place) => match place.load()? {
            Value::Array(values) => slice_of_array(&values, low, high, max),
            other => Err(Panic::msg(format!("cannot slice {}", other.kind_name()))),
        },
        Value::Nil => {
            let low = check(low.unwrap_or(0))?;
            let high = check(high.unwrap_or(0))?;
            if low == 0 && high == 0 {
                Ok(Value::Nil)
            } else {
                Err(Panic::msg("runtime error: slice bounds out of range"))
            }
        }
        other => Err(Panic::msg(format!("cannot slice {}", other.kind_name()))),
    }
}

fn slice_of_array(values: &[Value], low: Option<i64>, high: Option<i64>, _max: Option<i64>) -> RunResult<Value> {
    let low = low.unwrap_or(0);
    let high = high.unwrap_or(values.len() as i64);
    if low < 0 || high < low || high as usize > values.len() {
        return Err(Panic::msg("runtime error: slice bounds out of range"));
    }
    Ok(Value::Slice(SliceValue::from_values(
        values[low as usize..high as usize].to_vec(),
    )))
}

fn range_pairs(x: &Value) -> RunResult<Vec<(Value, Value)>> {
    match x {
        Value::Map(m) => Ok(m.pairs()),
        Value::Slice(s) => Ok(s
            .snapshot()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), v))
            .collect()),
        Value::Array(values) => Ok(values
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), v.clone()))
            .collect()),
        Value::Str(s) => Ok(s
            .char_indices()
            .map(|(i, c)| (Value::Int(i as i64), Value::Int(i64::from(u32::from(c)))))
            .collect()),
        Value::Nil => Ok(Vec::new()),
        other => Err(Panic::msg(format!("cannot range over {}", other.kind_name()))),
    }
}

/// Binary operator dispatch over the scalar kinds.
fn binop(op: BinOpKind, x: &Value, y: &Value) -> RunResult<Value> {
    match op {
        BinOpKind::Eq => return Ok(Value::Bool(x.value_eq(y)?)),
        BinOpKind::Ne => return Ok(Value::Bool(!x.value_eq(y)?)),
        _ => {}
    }
    if op.is_comparison() {
        return compare(op, x, y);
    }
    match (x, y) {
        (Value::Str(a), Value::Str(b)) => match op {
            BinOpKind::Add => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Value::str(s))
            }
            _ => Err(Panic::msg("invalid string operation")),
        },
        (Value::Float(a), Value::Float(b)) => {
            let v = match op {
                BinOpKind::Add => a + b,
                BinOpKind::Sub => a - b,
                BinOpKind::Mul => a * b,
                BinOpKind::Div => a / b,
                _ => return Err(Panic::msg("invalid float operation")),
            };
            Ok(Value::Float(v))
        }
        (Value::Uint(a), Value::Uint(b)) => uint_binop(op, *a, *b),
        (Value::Uint(a), Value::Int(b)) if matches!(op, BinOpKind::Shl | BinOpKind::Shr) => {
            if *b < 0 {
                return Err(Panic::msg("runtime error: negative shift amount"));
            }
            uint_binop(op, *a, *b as u64)
        }
        (Value::Int(_) | Value::Uint(_), Value::Int(_) | Value::Uint(_)) => {
            int_binop(op, as_int(x), as_int(y))
        }
        _ => Err(Panic::msg(format!(
            "invalid operation between {} and {}",
            x.kind_name(),
            y.kind_name()
        ))),
    }
}

fn as_int(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Uint(u) => *u as i64,
        _ => 0,
    }
}

fn int_binop(op: BinOpKind, a: i64, b: i64) -> RunResult<Value> {
    let v = match op {
        BinOpKind::Add => a.wrapping_add(b),
        BinOpKind::Sub => a.wrapping_sub(b),
        BinOpKind::Mul => a.wrapping_mul(b),
        BinOpKind::Div => {
            if b == 0 {
                return Err(Panic::msg("runtime error: integer divide by zero"));
            }
            a.wrapping_div(b)
        }
        BinOpKind::Rem => {
            if b == 0 {
                return Err(Panic::msg("runtime error: integer divide by zero"));
            }
            a.wrapping_rem(b)
        }
        BinOpKind::And => a & b,
        BinOpKind::Or => a | b,
        BinOpKind::Xor => a ^ b,
        BinOpKind::AndNot => a & !b,
        BinOpKind::Shl => {
            if b < 0 {
                return Err(Panic::msg("runtime error: negative shift amount"));
            }
            if b >= 64 { 0 } else { a.wrapping_shl(b as u32) }
        }
        BinOpKind::Shr => {
            if b < 0 {
                return Err(Panic::msg("runtime error: negative shift amount"));
            }
            if b >= 64 {
                if a < 0 { -1 } else { 0 }
            } else {
                a >> b
            }
        }
        _ => return Err(Panic::msg("invalid integer operation")),
    };
    Ok(Value::Int(v))
}

fn uint_binop(op: BinOpKind, a: u64, b: u64) -> RunResult<Value> {
    let v = match op {
        BinOpKind::Add => a.wrapping_add(b),
        BinOpKind::Sub => a.wrapping_sub(b),
        BinOpKind::Mul => a.wrapping_mul(b),
        BinOpKind::Div => {
            if b == 0 {
                return Err(Panic::msg("runtime error: integer divide by zero"));
            }
            a / b
        }
        BinOpKind::Rem => {
            if b == 0 {
                return Err(Panic::msg("runtime error: integer divide by zero"));
            }
            a % b
        }
        BinOpKind::And => a & b,
        BinOpKind::Or => a | b,
        BinOpKind::Xor => a ^ b,
        BinOpKind::AndNot => a & !b,
        BinOpKind::Shl => {
            if b >= 64 { 0 } else { a.wrapping_shl(b as u32) }
        }
        BinOpKind::Shr => {
            if b >= 64 { 0 } else { a >> b }
        }
        _ => return Err(Panic::msg("invalid integer operation")),
    };
    Ok(Value::Uint(v))
}

fn compare(op: BinOpKind, x: &Value, y: &Value) -> RunResult<Value> {
    let ord = match (x, y) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
        (Value::Int(a), Value::Uint(b)) => i128::from(*a).cmp(&i128::from(*b)),
        (Value::Uint(a), Value::Int(b)) => i128::from(*a).cmp(&i128::from(*b)),
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => {
            let result = match op {
                BinOpKind::Lt => a < b,
                BinOpKind::Le => a <= b,
                BinOpKind::Gt => a > b,
                BinOpKind::Ge => a >= b,
                _ => false,
            };
            return Ok(Value::Bool(result));
        }
        _ => {
            return Err(Panic::msg(format!(
                "values of {} and {} are not ordered",
                x.kind_name(),
                y.kind_name()
            )));
        }
    };
    let result = match op {
        BinOpKind::Lt => ord.is_lt(),
        BinOpKind::Le => ord.is_le(),
        BinOpKind::Gt => ord.is_gt(),
        BinOpKind::Ge => ord.is_ge(),
        _ => false,
    };
    Ok(Value::Bool(result))
}
