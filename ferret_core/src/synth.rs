use crate::bytecode::{ParamKind, Value};
use crate::markup::{LITERAL_CHARS, TAG_NAMES, encode_text};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use thiserror::Error;

/// Longest array an `int[]` parameter synthesizes.
pub const ARRAY_LEN_CAP: usize = 32;
/// Most generation steps a `markup` parameter runs.
pub const MARKUP_STEP_CAP: usize = 100;

/// The single synthesis failure: the candidate buffer ran out of bytes
/// mid-argument. The driver skips the iteration; nothing was invoked.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Input buffer exhausted at offset {0}")]
    Exhausted(usize),
}

/// Forward-only reader over a candidate buffer.
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn take(&mut self) -> Result<u8, SynthesisError> {
        match self.bytes.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => Err(SynthesisError::Exhausted(self.pos)),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Turns a candidate buffer into one typed argument per declared parameter,
/// consuming bytes left to right.
///
/// The mapping is pure: the same buffer always synthesizes the same
/// arguments. Per kind:
/// - `int`: one byte, sign-extended.
/// - `int[]`: a length byte (mod [`ARRAY_LEN_CAP`]), then one sign-extended
///   byte per element.
/// - `markup`: a step-count byte (mod [`MARKUP_STEP_CAP`]), then two bytes
///   per step: one selects the construct, one seeds the local generator
///   that picks the specific tag or character.
pub fn synthesize(params: &[ParamKind], buffer: &[u8]) -> Result<Vec<Value>, SynthesisError> {
    let mut cursor = ByteCursor::new(buffer);
    params
        .iter()
        .map(|kind| value_for(*kind, &mut cursor))
        .collect()
}

fn value_for(kind: ParamKind, cursor: &mut ByteCursor<'_>) -> Result<Value, SynthesisError> {
    match kind {
        ParamKind::Int => Ok(Value::Int(i64::from(cursor.take()? as i8))),
        ParamKind::IntArray => {
            let len = cursor.take()? as usize % ARRAY_LEN_CAP;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(i64::from(cursor.take()? as i8));
            }
            Ok(Value::IntArray(items))
        }
        ParamKind::Markup => Ok(Value::Text(markup_text(cursor)?)),
    }
}

fn markup_text(cursor: &mut ByteCursor<'_>) -> Result<String, SynthesisError> {
    let steps = cursor.take()? as usize % MARKUP_STEP_CAP;
    let mut out = String::new();
    for _ in 0..steps {
        let mode = cursor.take()? % 3;
        // the byte itself seeds the pick, keeping the choice a function of
        // the buffer alone
        let mut pick = ChaCha8Rng::seed_from_u64(u64::from(cursor.take()?));
        match mode {
            0 => {
                let tag = TAG_NAMES[pick.random_range(0..TAG_NAMES.len())];
                out.push('<');
                out.push_str(tag);
                out.push('>');
            }
            1 => {
                let tag = TAG_NAMES[pick.random_range(0..TAG_NAMES.len())];
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            _ => {
                out.push(LITERAL_CHARS[pick.random_range(0..LITERAL_CHARS.len())] as char);
            }
        }
    }
    Ok(out)
}

/// Renders an invocation for artifacts, e.g. `parse: ["<div></div>"]`.
pub fn describe_call(name: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("{name}: [{}]", rendered.join(", "))
}

/// Encodes a seed document the way the corpus stores candidates: a length
/// byte, the document bytes, zero padding out to the session buffer length.
pub fn seed_buffer(document: &str, buffer_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; buffer_len];
    if buffer_len == 0 {
        return out;
    }
    let encoded = encode_text(document);
    let capacity = (buffer_len - 1).min(255);
    let take = encoded.len().min(capacity);
    out[0] = take as u8;
    out[1..1 + take].copy_from_slice(&encoded[..take]);
    out
}
