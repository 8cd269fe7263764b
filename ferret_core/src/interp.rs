use crate::bytecode::{Instr, Module, Value};
use crate::fault::{Fault, FaultKind, TraceFrame};
use crate::loader::ModuleLoader;
use crate::signal::CoverageSignal;
use std::sync::Arc;

/// Default per-invocation instruction budget.
pub const DEFAULT_FUEL: u64 = 1_000_000;
/// Default limit on live frames, entry frame included.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Execution budgets for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct InterpOptions {
    pub fuel: u64,
    pub max_call_depth: usize,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            fuel: DEFAULT_FUEL,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// A classified fault in the making: kind plus detail, before the frame
/// trace is attached.
struct StepError {
    kind: FaultKind,
    message: String,
}

impl StepError {
    fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What one executed instruction asks the driver loop to do next.
enum Flow {
    Advance,
    Call(Frame),
    Return(Value),
}

struct Frame {
    module: Arc<Module>,
    function: usize,
    pc: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
    line: u32,
}

impl Frame {
    /// Builds the frame for `module.functions[function]`, binding `args` to
    /// the leading local slots. The caller is responsible for arity and kind
    /// checks; extra local slots start as integer 0.
    fn enter(module: Arc<Module>, function: usize, args: Vec<Value>) -> Result<Frame, StepError> {
        let slots = match module.functions.get(function) {
            Some(f) => f.params.len() + f.locals as usize,
            None => {
                return Err(StepError::new(
                    FaultKind::Malformed,
                    format!("function index {function} out of range in '{}'", module.name),
                ));
            }
        };
        let mut locals = args;
        locals.resize(slots, Value::Int(0));
        Ok(Frame {
            module,
            function,
            pc: 0,
            stack: Vec::new(),
            locals,
            line: 0,
        })
    }

    fn function_name(&self) -> &str {
        self.module
            .functions
            .get(self.function)
            .map_or("?", |f| f.name.as_str())
    }

    fn pop(&mut self) -> Result<Value, StepError> {
        self.stack
            .pop()
            .ok_or_else(|| StepError::new(FaultKind::Malformed, "operand stack underflow"))
    }

    fn pop_int(&mut self) -> Result<i64, StepError> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(StepError::new(
                FaultKind::TypeMismatch,
                format!("expected int operand, found {}", other.kind_name()),
            )),
        }
    }

    fn pop_text(&mut self) -> Result<String, StepError> {
        match self.pop()? {
            Value::Text(s) => Ok(s),
            other => Err(StepError::new(
                FaultKind::TypeMismatch,
                format!("expected markup operand, found {}", other.kind_name()),
            )),
        }
    }

    fn pop_array(&mut self) -> Result<Vec<i64>, StepError> {
        match self.pop()? {
            Value::IntArray(items) => Ok(items),
            other => Err(StepError::new(
                FaultKind::TypeMismatch,
                format!("expected int[] operand, found {}", other.kind_name()),
            )),
        }
    }

    fn constant(&self, index: u16) -> Result<String, StepError> {
        self.module
            .constant(index)
            .map(str::to_string)
            .ok_or_else(|| {
                StepError::new(
                    FaultKind::Malformed,
                    format!("constant {index} out of range in '{}'", self.module.name),
                )
            })
    }
}

fn trace_fault(error: StepError, frames: &[Frame]) -> Fault {
    let frames = frames
        .iter()
        .rev()
        .map(|frame| TraceFrame {
            function: format!("{}::{}", frame.module.name, frame.function_name()),
            line: frame.line,
        })
        .collect();
    Fault {
        kind: error.kind,
        message: error.message,
        frames,
    }
}

/// Executes module functions over an explicit frame stack.
///
/// Holds the loader mutably for the duration of one invocation so `Call`
/// instructions can pull (and namespace-filter) dependency modules on first
/// use. Coverage probes write into the accumulator the caller passes to
/// [`Interpreter::run`]; the interpreter neither resets nor reads it.
pub struct Interpreter<'a> {
    loader: &'a mut ModuleLoader,
    options: InterpOptions,
}

impl<'a> Interpreter<'a> {
    pub fn new(loader: &'a mut ModuleLoader, options: InterpOptions) -> Self {
        Self { loader, options }
    }

    /// Runs `module.functions[function]` to completion.
    ///
    /// `args` must already satisfy the function's declared signature (the
    /// harness validates before calling). A `Fault` return covers everything
    /// the target did wrong at run time, budget exhaustion included; it is
    /// data about the target, not an error of the interpreter.
    pub fn run(
        &mut self,
        module: &Arc<Module>,
        function: usize,
        args: Vec<Value>,
        signal: &mut CoverageSignal,
    ) -> Result<Value, Fault> {
        let entry = Frame::enter(Arc::clone(module), function, args)
            .map_err(|e| trace_fault(e, &[]))?;
        let mut frames = vec![entry];
        let mut fuel = self.options.fuel;

        loop {
            if fuel == 0 {
                return Err(trace_fault(
                    StepError::new(
                        FaultKind::FuelExhausted,
                        format!("budget of {} instructions spent", self.options.fuel),
                    ),
                    &frames,
                ));
            }
            fuel -= 1;

            let stepped = match frames.last_mut() {
                Some(frame) => self.step(frame, signal),
                None => Err(StepError::new(FaultKind::Malformed, "frame stack underflow")),
            };
            let flow = match stepped {
                Ok(flow) => flow,
                Err(error) => return Err(trace_fault(error, &frames)),
            };

            match flow {
                Flow::Advance => {}
                Flow::Call(frame) => {
                    if frames.len() >= self.options.max_call_depth {
                        return Err(trace_fault(
                            StepError::new(
                                FaultKind::CallDepthExceeded,
                                format!("call depth limit {} reached", self.options.max_call_depth),
                            ),
                            &frames,
                        ));
                    }
                    frames.push(frame);
                }
                Flow::Return(value) => {
                    frames.pop();
                    match frames.last_mut() {
                        Some(caller) => caller.stack.push(value),
                        None => return Ok(value),
                    }
                }
            }
        }
    }

    fn step(&mut self, frame: &mut Frame, signal: &mut CoverageSignal) -> Result<Flow, StepError> {
        let instr = {
            let function = frame.module.functions.get(frame.function).ok_or_else(|| {
                StepError::new(FaultKind::Malformed, "function index out of range")
            })?;
            match function.body.get(frame.pc) {
                Some(instr) => *instr,
                // running off the end returns integer 0
                None => return Ok(Flow::Return(Value::Int(0))),
            }
        };
        frame.pc += 1;

        match instr {
            Instr::Line(step) => frame.line = step,
            Instr::Trace(step) => signal.record(step),
            Instr::PushInt(n) => frame.stack.push(Value::Int(n)),
            Instr::PushConst(index) => {
                let text = frame.constant(index)?;
                frame.stack.push(Value::Text(text));
            }
            Instr::Dup => {
                let top = frame.stack.last().cloned().ok_or_else(|| {
                    StepError::new(FaultKind::Malformed, "operand stack underflow")
                })?;
                frame.stack.push(top);
            }
            Instr::Pop => {
                frame.pop()?;
            }
            Instr::Load(slot) => {
                let value = frame.locals.get(slot as usize).cloned().ok_or_else(|| {
                    StepError::new(
                        FaultKind::Malformed,
                        format!("local slot {slot} out of range"),
                    )
                })?;
                frame.stack.push(value);
            }
            Instr::Store(slot) => {
                let value = frame.pop()?;
                let dest = frame.locals.get_mut(slot as usize).ok_or_else(|| {
                    StepError::new(
                        FaultKind::Malformed,
                        format!("local slot {slot} out of range"),
                    )
                })?;
                *dest = value;
            }
            Instr::Add => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(a.wrapping_add(b)));
            }
            Instr::Sub => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(a.wrapping_sub(b)));
            }
            Instr::Mul => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(a.wrapping_mul(b)));
            }
            Instr::Div => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if b == 0 {
                    return Err(StepError::new(FaultKind::DivisionByZero, "division by zero"));
                }
                frame.stack.push(Value::Int(a.wrapping_div(b)));
            }
            Instr::Rem => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                if b == 0 {
                    return Err(StepError::new(
                        FaultKind::DivisionByZero,
                        "remainder by zero",
                    ));
                }
                frame.stack.push(Value::Int(a.wrapping_rem(b)));
            }
            Instr::Neg => {
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(a.wrapping_neg()));
            }
            Instr::Eq => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a == b)));
            }
            Instr::Ne => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a != b)));
            }
            Instr::Lt => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a < b)));
            }
            Instr::Le => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a <= b)));
            }
            Instr::Gt => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a > b)));
            }
            Instr::Ge => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                frame.stack.push(Value::Int(i64::from(a >= b)));
            }
            Instr::Concat => {
                let b = frame.pop_text()?;
                let a = frame.pop_text()?;
                frame.stack.push(Value::Text(a + &b));
            }
            Instr::StrLen => {
                let s = frame.pop_text()?;
                frame.stack.push(Value::Int(s.chars().count() as i64));
            }
            Instr::CharAt => {
                let index = frame.pop_int()?;
                let s = frame.pop_text()?;
                let c = usize::try_from(index)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .ok_or_else(|| {
                        StepError::new(
                            FaultKind::IndexOutOfBounds,
                            format!("char index {index} out of bounds for length {}", s.chars().count()),
                        )
                    })?;
                frame.stack.push(Value::Int(c as i64));
            }
            Instr::ArrLen => {
                let items = frame.pop_array()?;
                frame.stack.push(Value::Int(items.len() as i64));
            }
            Instr::ArrGet => {
                let index = frame.pop_int()?;
                let items = frame.pop_array()?;
                let value = usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).copied())
                    .ok_or_else(|| {
                        StepError::new(
                            FaultKind::IndexOutOfBounds,
                            format!("index {index} out of bounds for length {}", items.len()),
                        )
                    })?;
                frame.stack.push(Value::Int(value));
            }
            Instr::Jump(target) => frame.pc = target as usize,
            Instr::JumpIf(target) => {
                if frame.pop_int()? != 0 {
                    frame.pc = target as usize;
                }
            }
            Instr::Call {
                module: module_const,
                function: function_const,
            } => {
                let module_name = frame.constant(module_const)?;
                let function_name = frame.constant(function_const)?;
                return self.call_named(frame, &module_name, &function_name);
            }
            Instr::Return => {
                let value = frame.pop().map_err(|_| {
                    StepError::new(FaultKind::Malformed, "return with empty operand stack")
                })?;
                return Ok(Flow::Return(value));
            }
            Instr::Raise(index) => {
                let name = frame.constant(index)?;
                return Err(StepError::new(
                    FaultKind::Raised {
                        module: frame.module.name.clone(),
                        name,
                    },
                    "raised by target code",
                ));
            }
        }
        Ok(Flow::Advance)
    }

    fn call_named(
        &mut self,
        frame: &mut Frame,
        module_name: &str,
        function_name: &str,
    ) -> Result<Flow, StepError> {
        let callee_module = self.loader.load(module_name).map_err(|e| {
            StepError::new(
                FaultKind::Malformed,
                format!("call to '{module_name}::{function_name}' failed: {e}"),
            )
        })?;
        let (index, arity, params) = match callee_module.function_named(function_name) {
            Some((index, callee)) => (index, callee.params.len(), callee.params.clone()),
            None => {
                return Err(StepError::new(
                    FaultKind::Malformed,
                    format!("function '{function_name}' not found in '{module_name}'"),
                ));
            }
        };
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            args.push(frame.pop()?);
        }
        args.reverse();
        for (position, (arg, kind)) in args.iter().zip(&params).enumerate() {
            if !kind.admits(arg) {
                return Err(StepError::new(
                    FaultKind::TypeMismatch,
                    format!(
                        "call to '{module_name}::{function_name}': argument {position} expects {kind}, found {}",
                        arg.kind_name()
                    ),
                ));
            }
        }
        Ok(Flow::Call(Frame::enter(callee_module, index, args)?))
    }
}
