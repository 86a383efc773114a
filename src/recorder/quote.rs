//! Byte quoting for feature-file records, and carve-name sanitizing.
//!
//! Feature files are tab-separated lines, so recorded bytes must never
//! contain a raw tab, newline, or carriage return, and the file as a whole
//! must be valid UTF-8. [`validate_or_escape_utf8`] produces that form in a
//! single pass over the raw bytes: invalid UTF-8 sequences and the forbidden
//! control bytes become `\xHH` escapes, and backslashes are doubled when the
//! recorder's flags call for it.
//!
//! The escaping is reversible: [`unquote_string`] maps `\xHH`, legacy `\NNN`
//! octal, and `\\` back to raw bytes, so
//! `unquote_string(&validate_or_escape_utf8(x, true, true)) == x` for every
//! byte sequence `x`.

use std::fmt::Write as _;

/// Escapes `bytes` into a valid UTF-8 string suitable for a feature file.
///
/// With `escape_bad_utf8`, bytes that are not part of a valid UTF-8 sequence,
/// plus raw `\t`, `\n`, and `\r`, are rendered as `\xHH`. With
/// `escape_backslash`, each backslash is doubled. The default recorder policy
/// sets both; `xml` recorders set only the first; `no_quote` recorders set
/// neither (the caller then replaces invalid sequences, since the result must
/// still be a Rust `String`).
pub fn validate_or_escape_utf8(bytes: &[u8], escape_bad_utf8: bool, escape_backslash: bool) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_valid(&mut out, valid, escape_bad_utf8, escape_backslash);
                return out;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                // Split point comes from the validator; this cannot fail.
                push_valid(
                    &mut out,
                    std::str::from_utf8(valid).unwrap(),
                    escape_bad_utf8,
                    escape_backslash,
                );
                let bad_len = err.error_len().unwrap_or(after.len()).max(1);
                for b in &after[..bad_len] {
                    if escape_bad_utf8 {
                        let _ = write!(out, "\\x{b:02X}");
                    } else {
                        // Unquoted recorders still need a String; invalid
                        // sequences degrade to the replacement character.
                        out.push(char::REPLACEMENT_CHARACTER);
                    }
                }
                rest = &after[bad_len..];
            }
        }
    }
}

fn push_valid(out: &mut String, valid: &str, escape_bad_utf8: bool, escape_backslash: bool) {
    for c in valid.chars() {
        match c {
            '\\' if escape_backslash => out.push_str("\\\\"),
            '\t' | '\n' | '\r' if escape_bad_utf8 => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            _ => out.push(c),
        }
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn octal_val(b: u8) -> Option<u8> {
    matches!(b, b'0'..=b'7').then(|| b - b'0')
}

/// Reverses the quoting applied by [`validate_or_escape_utf8`].
///
/// Handles `\\`, `\xHH`, and legacy `\NNN` octal escapes; everything else is
/// copied through. The result is raw bytes: escapes may decode to arbitrary
/// non-UTF-8 values.
pub fn unquote_string(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if i + 3 < bytes.len() && bytes[i + 1] == b'x' {
                if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 2]), hex_val(bytes[i + 3])) {
                    out.push((hi << 4) | lo);
                    i += 4;
                    continue;
                }
            }
            if i + 3 < bytes.len() {
                if let (Some(a), Some(b), Some(c)) =
                    (octal_val(bytes[i + 1]), octal_val(bytes[i + 2]), octal_val(bytes[i + 3]))
                {
                    out.push(a * 64 + b * 8 + c);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Sanitizes a carve base name for portable filesystems.
///
/// Bytes at or below space, at or above 0x80, and the DOS-hostile set
/// `" * + , / : ; < = > ? \ [ ] |` all become underscores.
pub fn valid_dosname(name: &str) -> String {
    name.bytes()
        .map(|b| {
            if b <= 32
                || b >= 128
                || matches!(
                    b,
                    b'"' | b'*'
                        | b'+'
                        | b','
                        | b'/'
                        | b':'
                        | b';'
                        | b'<'
                        | b'='
                        | b'>'
                        | b'?'
                        | b'\\'
                        | b'['
                        | b']'
                        | b'|'
                )
            {
                '_'
            } else {
                b as char
            }
        })
        .collect()
}
