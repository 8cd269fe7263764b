use std::fmt;

/// Classification of a runtime fault raised by the interpreter or the target.
///
/// The variants carry no positional detail (indexes, operand values, lines);
/// that lives in [`Fault::message`]. Deduplication and artifact naming key on
/// the kind alone, so two out-of-range reads at different sites count as one
/// fault.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Integer division or remainder by zero.
    DivisionByZero,
    /// Text or array access outside the value's bounds.
    IndexOutOfBounds,
    /// An operand on the stack had the wrong runtime type, or a call passed
    /// a value its callee's declared parameter kind does not admit.
    TypeMismatch,
    /// Structurally broken execution: operand-stack underflow, a bad local
    /// or constant slot, or a `Call` naming a function that does not exist.
    Malformed,
    /// The per-invocation instruction budget ran out.
    FuelExhausted,
    /// The frame stack grew past the configured call-depth limit.
    CallDepthExceeded,
    /// A fault raised explicitly by target code, named by the raising module.
    Raised { module: String, name: String },
}

impl FaultKind {
    /// Full dedup identity, e.g. `vm::DivisionByZero` or `demo.pages::UnclosedTag`.
    pub fn qualified(&self) -> String {
        match self {
            FaultKind::Raised { module, name } => format!("{module}::{name}"),
            other => format!("vm::{}", other.short_name()),
        }
    }

    /// Bare kind name, used as the artifact filename component.
    pub fn short_name(&self) -> &str {
        match self {
            FaultKind::DivisionByZero => "DivisionByZero",
            FaultKind::IndexOutOfBounds => "IndexOutOfBounds",
            FaultKind::TypeMismatch => "TypeMismatch",
            FaultKind::Malformed => "Malformed",
            FaultKind::FuelExhausted => "FuelExhausted",
            FaultKind::CallDepthExceeded => "CallDepthExceeded",
            FaultKind::Raised { name, .. } => name,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// One frame of the call stack at the moment a fault fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Qualified function, `module::function`.
    pub function: String,
    /// Last statement line the frame passed, 0 if none was reached.
    pub line: u32,
}

/// A classified runtime fault with its human-readable detail and call trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    /// Innermost frame first.
    pub frames: Vec<TraceFrame>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.qualified(), self.message)?;
        for frame in &self.frames {
            write!(f, "\n  at {} (line {})", frame.function, frame.line)?;
        }
        Ok(())
    }
}
