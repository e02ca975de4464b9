//! Reversible encoding of guest paths into one query parameter value.
//!
//! Encoding runs in two stages:
//!
//! 1. Substitution: `%` becomes `%25`, `&` becomes `%M1`, `=` becomes `%M2`.
//!    After this stage the string holds no `&` or `=`, so it can never break
//!    the surrounding query string even if a host re-decodes it.
//! 2. Component percent-encoding over UTF-8 bytes, leaving only
//!    `A-Z a-z 0-9 - _ . ! ~ * ' ( )` unescaped.
//!
//! Decoding percent-decodes repeatedly until the value is stable or looks
//! like a path, then reverses stage 1 in a single left-to-right scan.
//!
//! # Examples
//!
//! ```
//! use cohost_router::{decode, encode};
//!
//! let encoded = encode("/x?y=1#z");
//! assert_eq!(encoded, "%2Fx%3Fy%25M21%23z");
//! assert_eq!(decode(&encoded), "/x?y=1#z");
//! ```

/// Characters left untouched by component encoding.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Stage 1: make `&` and `=` disappear without losing information.
fn substitute(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%M1"),
            '=' => out.push_str("%M2"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`substitute`].
fn unsubstitute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%M1") {
            out.push('&');
            rest = &tail[3..];
        } else if tail.starts_with("%M2") {
            out.push('=');
            rest = &tail[3..];
        } else if tail.starts_with("%25") {
            out.push('%');
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Percent-encode every byte outside the unreserved set.
pub fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decode one level. Malformed escapes are kept literally.
///
/// Returns `None` if the decoded bytes are not valid UTF-8.
pub fn decode_component(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// Encode a guest full path for the browser URL.
pub fn encode(path: &str) -> String {
    encode_component(&substitute(path))
}

/// Decode a value read from the browser URL back into a guest full path.
pub fn decode(value: &str) -> String {
    let mut current = value.to_string();
    loop {
        let Some(next) = decode_component(&current) else {
            break;
        };
        if next == current {
            break;
        }
        current = next;
        if current.contains(['/', '?', '#']) {
            break;
        }
    }
    unsubstitute(&current)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// decode(encode(p)) == p for every guest full path.
        #[test]
        fn prop_roundtrip(rest in ".*") {
            let path = format!("/{rest}");
            let encoded = encode(&path);
            prop_assert_eq!(decode(&encoded), path);
        }

        /// Encoded values are safe inside a query string.
        #[test]
        fn prop_encoded_is_query_safe(s in ".*") {
            let encoded = encode(&s);
            prop_assert!(encoded.bytes().all(|b| is_unreserved(b) || b == b'%' || b.is_ascii_hexdigit()));
        }
    }
}
