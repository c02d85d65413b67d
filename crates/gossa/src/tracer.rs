//! Instruction tracing hooks.
//!
//! The interpreter is generic over a [`VmTracer`]; the default
//! [`NoopTracer`] compiles to nothing. [`StderrTracer`] prints each
//! executed instruction and [`RecordingTracer`] collects them for
//! inspection in tests and tooling.

/// Observer for interpreter execution events.
///
/// All methods have empty default implementations so implementors only
/// override what they need.
pub trait VmTracer {
    /// Called before each instruction is executed.
    fn on_instr(&mut self, func: &str, line: u32, op: &str) {
        let _ = (func, line, op);
    }

    /// Called when a new frame is entered.
    fn on_call(&mut self, func: &str) {
        let _ = func;
    }

    /// Called when a frame returns or unwinds.
    fn on_return(&mut self, func: &str) {
        let _ = func;
    }
}

/// Tracer that does nothing.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints one line per instruction to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instr(&mut self, func: &str, line: u32, op: &str) {
        eprintln!("{func}:{line} {op}");
    }

    fn on_call(&mut self, func: &str) {
        eprintln!("call {func}");
    }

    fn on_return(&mut self, func: &str) {
        eprintln!("return {func}");
    }
}

/// Tracer that records events as formatted strings.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<String>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, in execution order.
    #[must_use]
    pub fn events(&self) -> &[String] {
        &self.events
    }
}

impl VmTracer for RecordingTracer {
    fn on_instr(&mut self, func: &str, line: u32, op: &str) {
        self.events.push(format!("{func}:{line} {op}"));
    }

    fn on_call(&mut self, func: &str) {
        self.events.push(format!("call {func}"));
    }

    fn on_return(&mut self, func: &str) {
        self.events.push(format!("return {func}"));
    }
}
