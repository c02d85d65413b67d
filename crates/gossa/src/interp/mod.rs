//! The instruction interpreter.
//!
//! A [`Frame`] is the activation record of one in-flight call: register
//! file, preallocated local cells, defer list, result slot, and panic
//! state. Frames come from a process-wide pool (taken with `try_lock`,
//! falling back to fresh allocation under contention) and are reset
//! before reuse.
//!
//! The block loop executes the current block's instructions in order and
//! acts on the returned control word: NEXT stays in the block, JUMP
//! follows an updated block pointer, RETURN leaves the frame. A panic is
//! an `Err` threaded out of the instruction handler; the loop records it,
//! runs the frame's defers in reverse (a defer's own panic replaces the
//! frame's), and either resumes at the function's recover block or
//! re-raises to the caller.

mod call;
mod exec;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    context::{Context, DEADLINE_CAUSE},
    error::{Panic, RunResult},
    program::ProgramInner,
    ssa::{BlockId, Builtin, FuncId, Function},
    tracer::{NoopTracer, VmTracer},
    value::{Cell, FuncValue, Value},
};

/// Calls deeper than this fail with a panic instead of exhausting the
/// host stack.
const MAX_CALL_DEPTH: u32 = 512;

/// Deadline poll cadence, in instructions.
const POLL_INTERVAL: u32 = 64;

/// Upper bound on pooled frames.
const POOL_LIMIT: usize = 64;

static FRAME_POOL: Mutex<Vec<Frame>> = Mutex::new(Vec::new());

fn acquire_frame() -> Frame {
    FRAME_POOL
        .try_lock()
        .and_then(|mut pool| pool.pop())
        .unwrap_or_default()
}

fn release_frame(mut frame: Frame) {
    frame.reset();
    if let Some(mut pool) = FRAME_POOL.try_lock()
        && pool.len() < POOL_LIMIT
    {
        pool.push(frame);
    }
}

/// Control word returned by each instruction handler.
pub(crate) enum Flow {
    Next,
    Jump,
    Return,
}

/// A deferred call: callee and arguments captured at the `defer` site.
#[derive(Debug)]
pub(crate) struct DeferredCall {
    pub callee: ResolvedCallee,
    pub args: Vec<Value>,
    pub line: u32,
    pub file: String,
}

/// A call target after operand resolution.
#[derive(Debug)]
pub(crate) enum ResolvedCallee {
    Ssa(FuncValue),
    Host(Arc<crate::registry::ExternObject>),
    Builtin(Builtin),
    Method { recv: Value, name: String },
}

/// One call activation.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub func: Option<FuncId>,
    pub block: Option<BlockId>,
    pub prev_block: Option<BlockId>,
    /// The environment: registers assigned by instructions in this frame.
    pub regs: Vec<Option<Value>>,
    /// Preallocated cells for stack locals.
    pub locals: Vec<Cell>,
    pub params: Vec<Value>,
    /// Captured free-variable bindings (pointer values).
    pub free: Vec<Value>,
    pub defers: Vec<DeferredCall>,
    pub result: Value,
    /// Panic state; `Some` while the frame is panicking.
    pub panic: Option<Panic>,
    /// When set, the cancellation poll is skipped (interactive stepping).
    pub debugging: bool,
}

impl Frame {
    fn prepare(&mut self, func_id: FuncId, func: &Function, params: Vec<Value>, free: Vec<Value>, debugging: bool) {
        self.func = Some(func_id);
        self.block = Some(BlockId::new(0));
        self.prev_block = None;
        self.regs.clear();
        self.regs.resize(func.num_regs as usize, None);
        self.locals.clear();
        for _ in &func.locals {
            self.locals.push(Cell::new(Value::Nil));
        }
        self.params = params;
        self.free = free;
        self.debugging = debugging;
    }

    /// Pool hygiene: a released frame keeps its buffers but no values.
    fn reset(&mut self) {
        self.func = None;
        self.block = None;
        self.prev_block = None;
        self.regs.clear();
        self.locals.clear();
        self.params.clear();
        self.free.clear();
        self.defers.clear();
        self.result = Value::Nil;
        self.panic = None;
        self.debugging = false;
    }
}

/// The per-task interpreter: shared program, shared context, one frame
/// chain.
pub(crate) struct Interp<'a, T: VmTracer> {
    prog: &'a Arc<ProgramInner>,
    ctx: &'a Context,
    tracer: &'a mut T,
    ops: u32,
    depth: u32,
}

impl<'a, T: VmTracer> Interp<'a, T> {
    pub fn new(prog: &'a Arc<ProgramInner>, ctx: &'a Context, tracer: &'a mut T) -> Self {
        Self {
            prog,
            ctx,
            tracer,
            ops: 0,
            depth: 0,
        }
    }

    /// Calls an SSA function. `recover_slot` is `Some` only when this is a
    /// deferred call running on behalf of a panicking frame; the callee's
    /// `recover` builtin reads and clears it.
    pub fn call(
        &mut self,
        fv: &FuncValue,
        params: Vec<Value>,
        recover_slot: Option<&mut Option<Panic>>,
    ) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Panic::msg("runtime error: maximum call depth exceeded"));
        }
        self.depth += 1;
        let prog = self.prog.clone();
        let func = &prog.functions[fv.func.index()];
        let mut frame = acquire_frame();
        frame.prepare(
            fv.func,
            func,
            params,
            fv.free.as_ref().clone(),
            prog.debugging(),
        );
        let result = self.run_frame(&mut frame, func, recover_slot);
        release_frame(frame);
        self.depth -= 1;
        result
    }

    fn run_frame(
        &mut self,
        frame: &mut Frame,
        func: &Function,
        mut recover_slot: Option<&mut Option<Panic>>,
    ) -> RunResult<Value> {
        self.tracer.on_call(&func.name);
        'blocks: while let Some(bid) = frame.block {
            let block = func.block(bid);
            for instr in &block.instrs {
                let outcome = self
                    .poll(frame.debugging)
                    .and_then(|()| {
                        self.tracer.on_instr(&func.name, instr.line, instr.kind.as_ref());
                        self.exec(frame, func, instr, recover_slot.as_mut().map(|r| &mut **r))
                    });
                match outcome {
                    Ok(Flow::Next) => {}
                    Ok(Flow::Jump) => continue 'blocks,
                    Ok(Flow::Return) => {
                        frame.block = None;
                        continue 'blocks;
                    }
                    Err(panic) => {
                        // record the panic, run defers, and either resume
                        // at the recover block or re-raise to the caller
                        frame.panic = Some(panic);
                        self.run_defers(frame);
                        match frame.panic.take() {
                            Some(panic) => {
                                self.tracer.on_return(&func.name);
                                return Err(panic);
                            }
                            None => match func.recover_block {
                                Some(rb) => {
                                    frame.prev_block = None;
                                    frame.block = Some(rb);
                                    continue 'blocks;
                                }
                                None => {
                                    frame.block = None;
                                    continue 'blocks;
                                }
                            },
                        }
                    }
                }
            }
            return Err(Panic::msg(format!("block without terminator in {}", func.name)));
        }
        self.tracer.on_return(&func.name);
        Ok(std::mem::take(&mut frame.result))
    }

    /// Periodic cancellation poll, per §4.5: active unless the frame's
    /// debugging flag is set.
    fn poll(&mut self, debugging: bool) -> RunResult<()> {
        if debugging {
            return Ok(());
        }
        self.ops = self.ops.wrapping_add(1);
        if self.ops % POLL_INTERVAL == 0 {
            self.ctx.check()?;
        }
        Ok(())
    }

    /// Runs the frame's deferred calls in reverse registration order. A
    /// panicking deferred call replaces the frame's panic; deferred calls
    /// that run later (registered earlier) may still recover it.
    fn run_defers(&mut self, frame: &mut Frame) {
        while let Some(deferred) = frame.defers.pop() {
            if let Err(panic) = self.invoke(deferred, Some(&mut frame.panic)) {
                frame.panic = Some(panic);
            }
        }
    }

    /// Invokes a resolved callee. Used by deferred calls and spawned
    /// tasks; in-block calls dispatch through `exec_call`.
    fn invoke(&mut self, call: DeferredCall, recover_slot: Option<&mut Option<Panic>>) -> RunResult<Value> {
        match call.callee {
            ResolvedCallee::Ssa(fv) => self.call(&fv, call.args, recover_slot),
            ResolvedCallee::Host(obj) => self.call_host(&obj, &call.args),
            ResolvedCallee::Builtin(Builtin::Recover) => Ok(call::recover_value(recover_slot)),
            ResolvedCallee::Builtin(b) => self.exec_builtin(b, call.args, call.line, &call.file),
            ResolvedCallee::Method { recv, name } => self.call_method(&recv, &name, &call.args),
        }
    }

    /// Spawns a resolved call as a concurrent task sharing program and
    /// context. A panicking task writes a diagnostic to the output buffer
    /// and dies without affecting siblings.
    fn spawn(&mut self, call: DeferredCall) -> RunResult<()> {
        let prog = self.prog.clone();
        let ctx = self.ctx.clone();
        ctx.task_started();
        let spawned = std::thread::Builder::new()
            .name("gossa-task".to_owned())
            .spawn(move || {
                let mut tracer = NoopTracer;
                let mut interp = Interp::new(&prog, &ctx, &mut tracer);
                match interp.invoke(call, None) {
                    Ok(_) => {}
                    Err(panic) if panic.cancelled => {}
                    Err(panic) => {
                        ctx.write_line(&format!("goroutine panic: {}", panic.value));
                    }
                }
                ctx.task_finished();
            });
        if spawned.is_err() {
            self.ctx.task_finished();
            return Err(Panic::msg("cannot spawn task"));
        }
        Ok(())
    }

    /// Converts a blocking-operation timeout into the cancellation panic.
    fn cancelled_panic(&self) -> Panic {
        match self.ctx.check() {
            Err(panic) => panic,
            Ok(()) => Panic::cancelled(DEADLINE_CAUSE),
        }
    }

    /// Receive or send on a nil channel blocks until the deadline.
    fn block_forever(&self) -> Panic {
        std::thread::sleep(self.ctx.remaining());
        self.cancelled_panic()
    }
}
