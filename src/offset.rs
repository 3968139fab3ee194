// SPDX-License-Identifier: MIT

//! Offset translation between editor character offsets and protocol byte
//! offsets.
//!
//! The DCD wire protocol addresses positions as byte offsets into the
//! encoded buffer, while editor buffers address characters. Conversion is
//! pure and total: out-of-range or mid-codepoint inputs clamp instead of
//! failing, because the server only ever emits boundary-aligned offsets
//! and editors only ever hand us offsets within the buffer.

/// Byte encoding used when translating editor offsets for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// One to four bytes per character. The protocol encoding.
    Utf8,
    /// Two bytes per UTF-16 code unit.
    Utf16,
}

impl TextEncoding {
    fn encoded_len(self, ch: char) -> usize {
        match self {
            TextEncoding::Utf8 => ch.len_utf8(),
            TextEncoding::Utf16 => ch.len_utf16() * 2,
        }
    }
}

/// Byte offset of the position `char_offset` characters into `text`,
/// under `encoding`.
///
/// Offsets past the end of `text` clamp to the full encoded length.
pub fn char_to_byte(text: &str, char_offset: usize, encoding: TextEncoding) -> usize {
    text.chars()
        .take(char_offset)
        .map(|ch| encoding.encoded_len(ch))
        .sum()
}

/// Character offset of the position `byte_offset` bytes into `text`,
/// under `encoding`.
///
/// A byte offset landing inside a multi-byte sequence resolves to the
/// preceding character boundary; offsets past the end clamp to the
/// character count.
pub fn byte_to_char(text: &str, byte_offset: usize, encoding: TextEncoding) -> usize {
    // Fast path: a pure-ASCII buffer has identical offsets.
    if encoding == TextEncoding::Utf8 && text.is_ascii() {
        return byte_offset.min(text.len());
    }
    let mut bytes = 0usize;
    let mut chars = 0usize;
    for ch in text.chars() {
        let width = encoding.encoded_len(ch);
        if bytes + width > byte_offset {
            return chars;
        }
        bytes += width;
        chars += 1;
    }
    chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii_offsets_are_identical() {
        let text = "int main() { return 0; }";
        for i in 0..=text.len() {
            assert_eq!(char_to_byte(text, i, TextEncoding::Utf8), i);
            assert_eq!(byte_to_char(text, i, TextEncoding::Utf8), i);
        }
    }

    #[test]
    fn multibyte_utf8_widens_byte_offsets() {
        // "héllo": h=1 byte, é=2 bytes.
        let text = "h\u{e9}llo";
        assert_eq!(char_to_byte(text, 0, TextEncoding::Utf8), 0);
        assert_eq!(char_to_byte(text, 1, TextEncoding::Utf8), 1);
        assert_eq!(char_to_byte(text, 2, TextEncoding::Utf8), 3);
        assert_eq!(char_to_byte(text, 5, TextEncoding::Utf8), 6);
    }

    #[test]
    fn multibyte_utf8_narrows_char_offsets() {
        let text = "h\u{e9}llo";
        assert_eq!(byte_to_char(text, 0, TextEncoding::Utf8), 0);
        assert_eq!(byte_to_char(text, 1, TextEncoding::Utf8), 1);
        assert_eq!(byte_to_char(text, 3, TextEncoding::Utf8), 2);
        assert_eq!(byte_to_char(text, 6, TextEncoding::Utf8), 5);
    }

    #[test]
    fn mid_codepoint_byte_offset_resolves_to_preceding_boundary() {
        let text = "h\u{e9}llo";
        // Byte 2 is the second byte of the two-byte é.
        assert_eq!(byte_to_char(text, 2, TextEncoding::Utf8), 1);
    }

    #[test]
    fn offsets_past_the_end_clamp() {
        let text = "abc\u{e9}";
        assert_eq!(char_to_byte(text, 100, TextEncoding::Utf8), 5);
        assert_eq!(byte_to_char(text, 100, TextEncoding::Utf8), 4);
        assert_eq!(byte_to_char("plain ascii", 100, TextEncoding::Utf8), 11);
    }

    #[test]
    fn utf16_counts_two_bytes_per_code_unit() {
        // 𝄞 (U+1D11E) is a surrogate pair in UTF-16: 4 bytes.
        let text = "a\u{1d11e}b";
        assert_eq!(char_to_byte(text, 1, TextEncoding::Utf16), 2);
        assert_eq!(char_to_byte(text, 2, TextEncoding::Utf16), 6);
        assert_eq!(char_to_byte(text, 3, TextEncoding::Utf16), 8);
        assert_eq!(byte_to_char(text, 6, TextEncoding::Utf16), 2);
        assert_eq!(byte_to_char(text, 8, TextEncoding::Utf16), 3);
    }

    #[test]
    fn empty_buffer_is_always_zero() {
        assert_eq!(char_to_byte("", 0, TextEncoding::Utf8), 0);
        assert_eq!(char_to_byte("", 7, TextEncoding::Utf8), 0);
        assert_eq!(byte_to_char("", 7, TextEncoding::Utf8), 0);
    }

    proptest! {
        #[test]
        fn char_byte_round_trip_utf8(text in "\\PC*", frac in 0.0f64..1.0) {
            let char_count = text.chars().count();
            let char_offset = (frac * char_count as f64) as usize;
            let byte_offset = char_to_byte(&text, char_offset, TextEncoding::Utf8);
            prop_assert_eq!(byte_to_char(&text, byte_offset, TextEncoding::Utf8), char_offset);
        }

        #[test]
        fn char_byte_round_trip_utf16(text in "\\PC*", frac in 0.0f64..1.0) {
            let char_count = text.chars().count();
            let char_offset = (frac * char_count as f64) as usize;
            let byte_offset = char_to_byte(&text, char_offset, TextEncoding::Utf16);
            prop_assert_eq!(byte_to_char(&text, byte_offset, TextEncoding::Utf16), char_offset);
        }

        #[test]
        fn ascii_char_to_byte_is_identity(text in "[ -~]*", offset in 0usize..64) {
            let clamped = offset.min(text.len());
            prop_assert_eq!(char_to_byte(&text, clamped, TextEncoding::Utf8), clamped);
        }
    }
}
