use bincode::{
    Decode, Encode,
    config::{Configuration, Fixint, LittleEndian, NoLimit},
    decode_from_slice, encode_to_vec,
    error::{DecodeError, EncodeError},
};
use std::fmt;
use thiserror::Error;

/// File extension for serialized modules on a loader search path.
pub const MODULE_FILE_EXT: &str = "fmod";

/// Errors arising from module encoding, decoding, or structural checks.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module encode error: {0}")]
    Encode(String),
    #[error("Module decode error: {0}")]
    Decode(String),
    #[error("Malformed module: {0}")]
    Invalid(String),
}

impl From<EncodeError> for ModuleError {
    fn from(e: EncodeError) -> Self {
        ModuleError::Encode(format!("bincode encoding failed: {e}"))
    }
}

impl From<DecodeError> for ModuleError {
    fn from(e: DecodeError) -> Self {
        ModuleError::Decode(format!("bincode decoding failed: {e}"))
    }
}

/// Declared parameter kind of a target function.
///
/// The set is closed: a module file carrying any other kind tag fails to
/// decode, so an unsupported signature is rejected when the module is
/// admitted rather than discovered mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ParamKind {
    Int,
    IntArray,
    Markup,
}

impl ParamKind {
    /// Signature rendering, e.g. `int[]`; the form selectors match against.
    pub fn render(self) -> &'static str {
        match self {
            ParamKind::Int => "int",
            ParamKind::IntArray => "int[]",
            ParamKind::Markup => "markup",
        }
    }

    /// Whether a runtime value satisfies this declared kind.
    pub fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ParamKind::Int, Value::Int(_))
                | (ParamKind::IntArray, Value::IntArray(_))
                | (ParamKind::Markup, Value::Text(_))
        )
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// A runtime value on the interpreter's operand stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    IntArray(Vec<i64>),
}

impl Value {
    /// Kind name used in type-mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Text(_) => "markup",
            Value::IntArray(_) => "int[]",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Text(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::IntArray(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// One interpreter instruction.
///
/// Jump targets are absolute instruction indices within the owning function;
/// a target equal to the body length is legal and falls off the end (implicit
/// `Return` of integer 0). `u16` operands index the module constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Instr {
    /// Statement marker carrying the source line id. Executes as a no-op
    /// apart from updating the frame's current line.
    Line(u32),
    /// Coverage probe: folds the step id into the invocation's signal.
    /// Only the instrumenter emits these; authored modules never carry them.
    Trace(u32),
    PushInt(i64),
    /// Pushes the constant-pool string at the given index.
    PushConst(u16),
    Dup,
    Pop,
    Load(u8),
    Store(u8),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    StrLen,
    /// Pops index then text, pushes the character code at that index.
    CharAt,
    ArrLen,
    /// Pops index then array, pushes the element at that index.
    ArrGet,
    Jump(u32),
    /// Pops an integer and jumps when it is nonzero.
    JumpIf(u32),
    /// Calls `constants[function]` in module `constants[module]`, resolved
    /// through the loader at run time (so dependencies load lazily).
    Call { module: u16, function: u16 },
    Return,
    /// Raises a named fault; the operand indexes the constant pool.
    Raise(u16),
}

/// A function exported by a module.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Function {
    pub name: String,
    pub params: Vec<ParamKind>,
    /// Extra local slots beyond the parameters, zero-initialized.
    pub locals: u8,
    pub body: Vec<Instr>,
}

impl Function {
    /// Selector form, e.g. `parse(markup)` or `merge(int,int[])`.
    pub fn rendered_signature(&self) -> String {
        let kinds: Vec<&str> = self.params.iter().map(|k| k.render()).collect();
        format!("{}({})", self.name, kinds.join(","))
    }
}

/// A loadable unit: dotted name, string constant pool, exported functions.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Module {
    pub name: String,
    pub constants: Vec<String>,
    pub functions: Vec<Function>,
}

/// Bincode layout shared by module files and any other binary encoding in
/// the crate. Fixed-int keeps the representation stable across versions.
pub(crate) fn codec_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

impl Module {
    /// First function with the given bare name.
    pub fn function_named(&self, name: &str) -> Option<(usize, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, function)| function.name == name)
    }

    pub fn constant(&self, index: u16) -> Option<&str> {
        self.constants.get(index as usize).map(String::as_str)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModuleError> {
        Ok(encode_to_vec(self, codec_config())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Module, ModuleError> {
        let (module, _len): (Module, usize) = decode_from_slice(bytes, codec_config())?;
        Ok(module)
    }

    /// Structural check run whenever a module is admitted by the loader:
    /// jump targets within bounds, constant and local slot references valid.
    pub fn validate(&self) -> Result<(), ModuleError> {
        for function in &self.functions {
            let slots = function.params.len() + function.locals as usize;
            let end = function.body.len() as u32;
            for (index, instr) in function.body.iter().enumerate() {
                match *instr {
                    Instr::Jump(target) | Instr::JumpIf(target) => {
                        if target > end {
                            return Err(ModuleError::Invalid(format!(
                                "function '{}': jump at {} targets {} beyond end {}",
                                function.name, index, target, end
                            )));
                        }
                    }
                    Instr::PushConst(c) | Instr::Raise(c) => {
                        if c as usize >= self.constants.len() {
                            return Err(ModuleError::Invalid(format!(
                                "function '{}': constant {} out of range",
                                function.name, c
                            )));
                        }
                    }
                    Instr::Call {
                        module: module_const,
                        function: function_const,
                    } => {
                        let pool = self.constants.len();
                        if module_const as usize >= pool || function_const as usize >= pool {
                            return Err(ModuleError::Invalid(format!(
                                "function '{}': call references constant out of range",
                                function.name
                            )));
                        }
                    }
                    Instr::Load(slot) | Instr::Store(slot) => {
                        if slot as usize >= slots {
                            return Err(ModuleError::Invalid(format!(
                                "function '{}': local slot {} out of range ({} slots)",
                                function.name, slot, slots
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Collects functions and interns constant-pool strings for one module.
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    constants: Vec<String>,
    functions: Vec<Function>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constants: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Index of `text` in the constant pool, adding it on first use.
    pub fn intern(&mut self, text: &str) -> u16 {
        if let Some(index) = self.constants.iter().position(|c| c == text) {
            return index as u16;
        }
        self.constants.push(text.to_string());
        (self.constants.len() - 1) as u16
    }

    pub fn function(&mut self, function: Function) -> &mut Self {
        self.functions.push(function);
        self
    }

    pub fn finish(self) -> Module {
        Module {
            name: self.name,
            constants: self.constants,
            functions: self.functions,
        }
    }
}

/// Forward-reference jump target handed out by [`FunctionBuilder::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds a [`Function`] body one instruction at a time.
///
/// Jumps take [`Label`]s which may be bound before or after the jump is
/// emitted; `finish` patches every jump and rejects unbound labels.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    params: Vec<ParamKind>,
    extra_locals: u8,
    body: Vec<Instr>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
}

impl FunctionBuilder {
    pub fn new(name: &str, params: &[ParamKind]) -> Self {
        Self {
            name: name.to_string(),
            params: params.to_vec(),
            extra_locals: 0,
            body: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn extra_locals(&mut self, count: u8) -> &mut Self {
        self.extra_locals = count;
        self
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.body.len() as u32);
        self
    }

    fn emit(&mut self, instr: Instr) -> &mut Self {
        self.body.push(instr);
        self
    }

    pub fn line(&mut self, step: u32) -> &mut Self {
        self.emit(Instr::Line(step))
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.emit(Instr::PushInt(value))
    }

    pub fn push_const(&mut self, index: u16) -> &mut Self {
        self.emit(Instr::PushConst(index))
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit(Instr::Dup)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Instr::Pop)
    }

    pub fn load(&mut self, slot: u8) -> &mut Self {
        self.emit(Instr::Load(slot))
    }

    pub fn store(&mut self, slot: u8) -> &mut Self {
        self.emit(Instr::Store(slot))
    }

    pub fn add(&mut self) -> &mut Self {
        self.emit(Instr::Add)
    }

    pub fn sub(&mut self) -> &mut Self {
        self.emit(Instr::Sub)
    }

    pub fn mul(&mut self) -> &mut Self {
        self.emit(Instr::Mul)
    }

    pub fn div(&mut self) -> &mut Self {
        self.emit(Instr::Div)
    }

    pub fn rem(&mut self) -> &mut Self {
        self.emit(Instr::Rem)
    }

    pub fn neg(&mut self) -> &mut Self {
        self.emit(Instr::Neg)
    }

    pub fn eq(&mut self) -> &mut Self {
        self.emit(Instr::Eq)
    }

    pub fn ne(&mut self) -> &mut Self {
        self.emit(Instr::Ne)
    }

    pub fn lt(&mut self) -> &mut Self {
        self.emit(Instr::Lt)
    }

    pub fn le(&mut self) -> &mut Self {
        self.emit(Instr::Le)
    }

    pub fn gt(&mut self) -> &mut Self {
        self.emit(Instr::Gt)
    }

    pub fn ge(&mut self) -> &mut Self {
        self.emit(Instr::Ge)
    }

    pub fn concat(&mut self) -> &mut Self {
        self.emit(Instr::Concat)
    }

    pub fn str_len(&mut self) -> &mut Self {
        self.emit(Instr::StrLen)
    }

    pub fn char_at(&mut self) -> &mut Self {
        self.emit(Instr::CharAt)
    }

    pub fn arr_len(&mut self) -> &mut Self {
        self.emit(Instr::ArrLen)
    }

    pub fn arr_get(&mut self) -> &mut Self {
        self.emit(Instr::ArrGet)
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.patches.push((self.body.len(), label));
        self.emit(Instr::Jump(0))
    }

    pub fn jump_if(&mut self, label: Label) -> &mut Self {
        self.patches.push((self.body.len(), label));
        self.emit(Instr::JumpIf(0))
    }

    pub fn call(&mut self, module: u16, function: u16) -> &mut Self {
        self.emit(Instr::Call { module, function })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Instr::Return)
    }

    pub fn raise(&mut self, name: u16) -> &mut Self {
        self.emit(Instr::Raise(name))
    }

    pub fn finish(self) -> Result<Function, ModuleError> {
        let Self {
            name,
            params,
            extra_locals,
            mut body,
            labels,
            patches,
        } = self;
        for (at, label) in patches {
            let target = labels.get(label.0).copied().flatten().ok_or_else(|| {
                ModuleError::Invalid(format!("function '{name}': unbound label at instruction {at}"))
            })?;
            if let Some(Instr::Jump(t) | Instr::JumpIf(t)) = body.get_mut(at) {
                *t = target;
            }
        }
        Ok(Function {
            name,
            params,
            locals: extra_locals,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_targets {
    //! Hand-built modules shared by interpreter, harness, and session tests.

    use super::*;

    /// Markup scanner: counts `<tag>` openings against `</tag>` closings,
    /// ignoring `<!...>` declarations. Raises `UnclosedTag` when openings
    /// remain at end of input (or a lone `<` ends it) and `StrayCloseTag`
    /// when a closing appears at depth zero. Returns the final depth (0).
    fn parse_function(module: &mut ModuleBuilder) -> Function {
        let unclosed = module.intern("UnclosedTag");
        let stray = module.intern("StrayCloseTag");
        // locals: 0 = text, 1 = i, 2 = depth, 3 = len
        let mut f = FunctionBuilder::new("parse", &[ParamKind::Markup]);
        f.extra_locals(3);
        let l_head = f.new_label();
        let l_body = f.new_label();
        let l_adv = f.new_label();
        let l_tag = f.new_label();
        let l_peek = f.new_label();
        let l_close = f.new_label();
        let l_stray = f.new_label();
        let l_end = f.new_label();
        let l_unclosed = f.new_label();

        f.line(1)
            .push_int(0)
            .store(1)
            .push_int(0)
            .store(2)
            .load(0)
            .str_len()
            .store(3);
        f.bind(l_head);
        f.line(2).load(1).load(3).lt().jump_if(l_body).jump(l_end);
        f.bind(l_body);
        f.line(3)
            .load(0)
            .load(1)
            .char_at()
            .push_int('<' as i64)
            .eq()
            .jump_if(l_tag);
        f.bind(l_adv);
        f.line(4).load(1).push_int(1).add().store(1).jump(l_head);
        f.bind(l_tag);
        f.line(5).load(1).push_int(1).add().load(3).lt().jump_if(l_peek);
        f.line(6).raise(unclosed);
        f.bind(l_peek);
        f.line(7)
            .load(0)
            .load(1)
            .push_int(1)
            .add()
            .char_at()
            .push_int('/' as i64)
            .eq()
            .jump_if(l_close);
        f.line(8)
            .load(0)
            .load(1)
            .push_int(1)
            .add()
            .char_at()
            .push_int('!' as i64)
            .eq()
            .jump_if(l_adv);
        f.line(9).load(2).push_int(1).add().store(2).jump(l_adv);
        f.bind(l_close);
        f.line(10).load(2).push_int(0).eq().jump_if(l_stray);
        f.line(11).load(2).push_int(1).sub().store(2).jump(l_adv);
        f.bind(l_stray);
        f.line(12).raise(stray);
        f.bind(l_end);
        f.line(13).load(2).push_int(0).gt().jump_if(l_unclosed);
        f.line(14).load(2).ret();
        f.bind(l_unclosed);
        f.line(15).raise(unclosed);
        f.finish().expect("parse target builds")
    }

    /// Raises `NegativeArgument` below zero, otherwise returns the doubled
    /// argument.
    fn check_function(module: &mut ModuleBuilder) -> Function {
        let negative = module.intern("NegativeArgument");
        let mut f = FunctionBuilder::new("check", &[ParamKind::Int]);
        let l_neg = f.new_label();
        f.line(1).load(0).push_int(0).lt().jump_if(l_neg);
        f.line(2).load(0).push_int(2).mul().ret();
        f.bind(l_neg);
        f.line(3).raise(negative);
        f.finish().expect("check target builds")
    }

    /// Sums an integer array with an explicit loop. Line 2 and 3 trip counts
    /// depend on the array length, so every distinct length lands a distinct
    /// coverage signature.
    fn sum_function() -> Function {
        // locals: 0 = array, 1 = acc, 2 = i
        let mut f = FunctionBuilder::new("sum", &[ParamKind::IntArray]);
        f.extra_locals(2);
        let l_head = f.new_label();
        let l_body = f.new_label();
        let l_done = f.new_label();
        f.line(1).push_int(0).store(1).push_int(0).store(2);
        f.bind(l_head);
        f.line(2)
            .load(2)
            .load(0)
            .arr_len()
            .lt()
            .jump_if(l_body)
            .jump(l_done);
        f.bind(l_body);
        f.line(3)
            .load(1)
            .load(0)
            .load(2)
            .arr_get()
            .add()
            .store(1)
            .load(2)
            .push_int(1)
            .add()
            .store(2)
            .jump(l_head);
        f.bind(l_done);
        f.line(4).load(1).ret();
        f.finish().expect("sum target builds")
    }

    pub(crate) fn pages_module() -> Module {
        let mut builder = ModuleBuilder::new("demo.pages");
        let parse = parse_function(&mut builder);
        let check = check_function(&mut builder);
        builder.function(parse).function(check).function(sum_function());
        builder.finish()
    }
}
