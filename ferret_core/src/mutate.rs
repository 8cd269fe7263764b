use crate::markup::{ATTR_TOKENS, ENTITY_TOKENS, TAG_TOKENS, decode_text, encode_text};
use rand::Rng;

/// Byte length of freshly generated candidate buffers.
pub const DEFAULT_BUFFER_LEN: usize = 500;

/// A `Mutator` derives a new candidate buffer from an existing seed.
///
/// Implementations are total: any byte sequence in, a usable byte sequence
/// out, never touching the seed itself.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&self, seed: &[u8], rng: &mut R) -> Vec<u8>;
}

/// Overwrites a random run of bytes with draws from a random narrow range.
///
/// Start, run length, and the `[lo, hi)` value window are all drawn per
/// call, so a rewritten run holds clustered byte values. Length is always
/// preserved; an empty seed comes back as an empty buffer.
#[derive(Debug, Default)]
pub struct ByteRangeMutator;

impl<R: Rng + ?Sized> Mutator<R> for ByteRangeMutator {
    fn mutate(&self, seed: &[u8], rng: &mut R) -> Vec<u8> {
        let mut out = seed.to_vec();
        if out.is_empty() {
            return out;
        }
        let start = rng.random_range(0..out.len());
        let run = rng.random_range(0..out.len() - start);
        let lo: i32 = rng.random_range(-128..127);
        let hi: i32 = rng.random_range(lo + 1..128);
        for byte in &mut out[start..start + run] {
            *byte = rng.random_range(lo..hi) as u8;
        }
        out
    }
}

/// Treats the buffer as markup text and splices in one vocabulary token.
///
/// The buffer is decoded one byte per character, then one of: a tag token at
/// a random position, an attribute in front of the next `>` at or after a
/// random position (no-op when the rest of the text has none), or an entity
/// at a random position. The result is re-encoded the same way, so the
/// operation is lossless for anything the decoder produced.
#[derive(Debug, Default)]
pub struct MarkupMutator;

impl<R: Rng + ?Sized> Mutator<R> for MarkupMutator {
    fn mutate(&self, seed: &[u8], rng: &mut R) -> Vec<u8> {
        let mut chars: Vec<char> = decode_text(seed).chars().collect();
        if chars.is_empty() {
            return seed.to_vec();
        }
        let position = rng.random_range(0..chars.len());
        match rng.random_range(0..3) {
            0 => {
                let token = TAG_TOKENS[rng.random_range(0..TAG_TOKENS.len())];
                insert_at(&mut chars, position, token);
            }
            1 => {
                if let Some(offset) = chars[position..].iter().position(|&c| c == '>') {
                    let attr = ATTR_TOKENS[rng.random_range(0..ATTR_TOKENS.len())];
                    insert_at(&mut chars, position + offset, &format!(" {attr}"));
                }
            }
            _ => {
                let entity = ENTITY_TOKENS[rng.random_range(0..ENTITY_TOKENS.len())];
                insert_at(&mut chars, position, entity);
            }
        }
        let text: String = chars.into_iter().collect();
        encode_text(&text)
    }
}

fn insert_at(chars: &mut Vec<char>, index: usize, text: &str) {
    chars.splice(index..index, text.chars());
}

/// Produces each iteration's candidate buffer.
///
/// With no seed available (empty corpus) it emits a fully random buffer of
/// the configured length; otherwise it applies one of the two families,
/// chosen uniformly, to a copy of the seed.
#[derive(Debug)]
pub struct MutationEngine {
    buffer_len: usize,
    byte_range: ByteRangeMutator,
    markup: MarkupMutator,
}

impl MutationEngine {
    pub fn new(buffer_len: usize) -> Self {
        Self {
            buffer_len,
            byte_range: ByteRangeMutator,
            markup: MarkupMutator,
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn mutate<R: Rng + ?Sized>(&self, seed: Option<&[u8]>, rng: &mut R) -> Vec<u8> {
        match seed {
            None => {
                let mut buffer = vec![0u8; self.buffer_len];
                rng.fill(&mut buffer[..]);
                buffer
            }
            Some(seed) => {
                if rng.random_range(0..2) == 0 {
                    self.byte_range.mutate(seed, rng)
                } else {
                    self.markup.mutate(seed, rng)
                }
            }
        }
    }
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LEN)
    }
}
