use crate::bytecode::{Function, Instr, Module};
use thiserror::Error;

/// Errors from the coverage-instrumentation transform.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("Instrumentation failed in function '{function}': jump target {target} out of range")]
    JumpOutOfRange { function: String, target: u32 },
}

/// Whether a module already carries coverage probes.
pub fn is_instrumented(module: &Module) -> bool {
    module.functions.iter().any(|function| {
        function
            .body
            .iter()
            .any(|instr| matches!(instr, Instr::Trace(_)))
    })
}

/// Rewrites a module so every statement reports itself to the coverage
/// signal.
///
/// Pure transform: the input is untouched and the result is a fully working
/// module whose only behavioral difference is writes into the invocation's
/// signal accumulator, one `Trace(step)` after each `Line(step)` marker.
/// Inserting shifts instruction indices, so jump targets are remapped
/// through an old-to-new index table. Already-instrumented modules come back
/// unchanged, so repeated transformation is safe.
pub fn instrument_module(module: &Module) -> Result<Module, InstrumentError> {
    if is_instrumented(module) {
        return Ok(module.clone());
    }
    let mut functions = Vec::with_capacity(module.functions.len());
    for function in &module.functions {
        functions.push(instrument_function(function)?);
    }
    Ok(Module {
        name: module.name.clone(),
        constants: module.constants.clone(),
        functions,
    })
}

fn instrument_function(function: &Function) -> Result<Function, InstrumentError> {
    let mut remap = Vec::with_capacity(function.body.len() + 1);
    let mut body = Vec::with_capacity(function.body.len() * 2);
    for instr in &function.body {
        remap.push(body.len() as u32);
        body.push(instr.clone());
        if let Instr::Line(step) = instr {
            body.push(Instr::Trace(*step));
        }
    }
    // one-past-the-end stays a legal jump target
    remap.push(body.len() as u32);
    for instr in &mut body {
        if let Instr::Jump(target) | Instr::JumpIf(target) = instr {
            let new_target = remap.get(*target as usize).copied().ok_or_else(|| {
                InstrumentError::JumpOutOfRange {
                    function: function.name.clone(),
                    target: *target,
                }
            })?;
            *target = new_target;
        }
    }
    Ok(Function {
        name: function.name.clone(),
        params: function.params.clone(),
        locals: function.locals,
        body,
    })
}
