use crate::bytecode::Value;
use crate::fault::Fault;
use crate::interp::{InterpOptions, Interpreter};
use crate::loader::{ModuleLoader, Target};
use crate::signal::{CoverageSignal, CoverageSignature};
use thiserror::Error;

/// Errors for invocations the harness refuses to start.
///
/// These mean the synthesizer handed over arguments that do not fit the
/// resolved target's declared signature. That is a defect in the session
/// setup, not target behavior, so it surfaces as an `Err` and aborts the
/// session instead of being classified as an [`Outcome`].
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Target expects {expected} arguments, synthesizer produced {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("Argument {position} expects {expected}, synthesizer produced {actual}")]
    ArgumentKind {
        position: usize,
        expected: String,
        actual: String,
    },
}

/// What one target invocation did, with the coverage signature read from the
/// signal in either case, faulting runs included.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        signature: CoverageSignature,
    },
    Faulted {
        fault: Fault,
        signature: CoverageSignature,
    },
}

impl Outcome {
    pub fn signature(&self) -> CoverageSignature {
        match self {
            Outcome::Completed { signature } | Outcome::Faulted { signature, .. } => *signature,
        }
    }
}

/// Drives single target invocations: validate arguments, reset the signal,
/// interpret, capture the signature.
///
/// Owns the loader (so mid-run dependency loads go through the same
/// namespace filter) and the one [`CoverageSignal`] accumulator the
/// interpreter writes into.
pub struct Harness {
    loader: ModuleLoader,
    options: InterpOptions,
    signal: CoverageSignal,
}

impl Harness {
    pub fn new(loader: ModuleLoader, options: InterpOptions) -> Self {
        Self {
            loader,
            options,
            signal: CoverageSignal::new(),
        }
    }

    pub fn invoke(&mut self, target: &Target, args: &[Value]) -> Result<Outcome, HarnessError> {
        if args.len() != target.params.len() {
            return Err(HarnessError::ArityMismatch {
                expected: target.params.len(),
                actual: args.len(),
            });
        }
        for (position, (kind, arg)) in target.params.iter().zip(args).enumerate() {
            if !kind.admits(arg) {
                return Err(HarnessError::ArgumentKind {
                    position,
                    expected: kind.to_string(),
                    actual: arg.kind_name().to_string(),
                });
            }
        }

        self.signal.reset();
        let result = Interpreter::new(&mut self.loader, self.options).run(
            &target.module,
            target.function,
            args.to_vec(),
            &mut self.signal,
        );
        let signature = self.signal.value();
        Ok(match result {
            Ok(_) => Outcome::Completed { signature },
            Err(fault) => Outcome::Faulted { fault, signature },
        })
    }
}
