pub mod artifact;
pub mod bytecode;
pub mod config;
pub mod corpus;
pub mod fault;
pub mod harness;
pub mod instrument;
pub mod interp;
pub mod loader;
pub mod markup;
pub mod mutate;
pub mod session;
pub mod signal;
pub mod synth;

pub use artifact::{ArtifactError, SessionReport, write_fault_artifact, write_session_report};
pub use bytecode::{
    Function, FunctionBuilder, Instr, Module, ModuleBuilder, ModuleError, ParamKind, Value,
};
pub use config::FerretConfig;
pub use corpus::{Corpus, FaultRegistry};
pub use fault::{Fault, FaultKind, TraceFrame};
pub use harness::{Harness, HarnessError, Outcome};
pub use instrument::{InstrumentError, instrument_module, is_instrumented};
pub use interp::{InterpOptions, Interpreter};
pub use loader::{LoadError, ModuleLoader, Target, namespace_of};
pub use mutate::{ByteRangeMutator, MarkupMutator, MutationEngine, Mutator};
pub use session::{Session, SessionError, SessionState};
pub use signal::{CoverageSignal, CoverageSignature};
pub use synth::{SynthesisError, describe_call, seed_buffer, synthesize};
