/// Tag names the synthesizer builds opening/closing tags from.
pub const TAG_NAMES: [&str; 7] = ["div", "p", "span", "a", "h1", "h2", "h3"];

/// Whole-token insertions used by the markup-aware mutator.
pub const TAG_TOKENS: [&str; 8] = [
    "<div>", "<span>", "<p>", "<a>", "</div>", "</span>", "</p>", "</a>",
];

/// Attribute insertions, spliced in front of a closing `>`.
pub const ATTR_TOKENS: [&str; 3] = ["id=\"test\"", "class=\"example\"", "style=\"color:red;\""];

/// Entity insertions.
pub const ENTITY_TOKENS: [&str; 3] = ["&lt;", "&gt;", "&amp;"];

/// Literal characters the synthesizer emits between tags.
pub const LITERAL_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Reinterprets raw bytes as text, one character per byte (Latin-1 range).
///
/// Total for any byte sequence, which is what lets the mutator treat an
/// arbitrary fuzzing buffer as a document.
pub fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Inverse of [`decode_text`]. Characters outside the single-byte range fold
/// to `?`; everything [`decode_text`] can produce round-trips losslessly.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_round_trips() {
        let all: Vec<u8> = (0..=255u8).collect();
        assert_eq!(encode_text(&decode_text(&all)), all);
    }

    #[test]
    fn wide_characters_fold_to_placeholder() {
        assert_eq!(encode_text("a\u{0100}b"), b"a?b".to_vec());
    }

    #[test]
    fn vocabulary_is_single_byte_clean() {
        for token in TAG_TOKENS.iter().chain(&ATTR_TOKENS).chain(&ENTITY_TOKENS) {
            assert_eq!(decode_text(&encode_text(token)), *token);
        }
    }
}
