// SPDX-License-Identifier: MIT

//! Unescaping of documentation responses.
//!
//! `dcd-client --doc` flattens a doc comment onto one line by escaping
//! control characters. This module reverses that encoding on the raw
//! bytes before UTF-8 decoding, since `\xHH` sequences may encode bytes
//! that only form valid UTF-8 once decoded.

/// Decode backslash escapes in a raw documentation response.
///
/// Recognized escapes: `\n`, `\t`, `\r`, `\0`, `\\`, `\'`, `\"` and
/// `\xHH` with two hex digits. Unrecognized escapes are passed through
/// verbatim, as is a trailing lone backslash. Byte sequences that do not
/// form valid UTF-8 after unescaping are replaced rather than rejected.
pub fn unescape_doc(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = match raw[i + 1] {
            b'n' => Some(b'\n'),
            b't' => Some(b'\t'),
            b'r' => Some(b'\r'),
            b'0' => Some(0),
            b'\\' => Some(b'\\'),
            b'\'' => Some(b'\''),
            b'"' => Some(b'"'),
            _ => None,
        };
        if let Some(byte) = escaped {
            out.push(byte);
            i += 2;
            continue;
        }

        if raw[i + 1] == b'x' && i + 3 < raw.len() {
            if let Some(byte) = hex_pair(raw[i + 2], raw[i + 3]) {
                out.push(byte);
                i += 4;
                continue;
            }
        }

        // Unknown escape: keep the backslash and the following byte.
        out.push(raw[i]);
        out.push(raw[i + 1]);
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
