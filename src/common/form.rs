//! The application/x-www-form-urlencoded record codec.
//!
//! Every persisted record and every wire body in the node is a flat list of
//! `key=value` pairs joined by `&`, with both sides percent-encoded. The codec
//! is total on arbitrary byte strings: encoding never fails, and decoding
//! passes malformed `%` sequences through literally instead of erroring so
//! that peers running newer encodings stay readable.

use std::collections::HashMap;

/// Encode one key or value component. `ALPHA / DIGIT / - _ . ~` pass through,
/// space becomes `+`, everything else becomes `%HH` with uppercase hex.
pub fn encode_component(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);

    for &b in bytes {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
            out.push(b as char);
        } else if b == b' ' {
            out.push('+');
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 15) as usize] as char);
        }
    }
    out
}

/// Decode one component: `+` becomes space, `%HH` with valid hex becomes the
/// byte, anything malformed is copied through untouched.
pub fn decode_component(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(10 + b - b'a'),
        b'A'..=b'F' => Some(10 + b - b'A'),
        _ => None,
    }
}

/// Serialize an ordered pair list into a body.
pub fn build<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(&encode_component(key.as_ref().as_bytes()));
        out.push('=');
        out.push_str(&encode_component(value.as_ref().as_bytes()));
    }
    out
}

/// Parse a body into a key→value map. Empty tokens are skipped, a token
/// without `=` maps to the empty value, and the last occurrence of a
/// duplicated key wins.
pub fn parse(body: &[u8]) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for token in body.split(|&b| b == b'&') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = match token.iter().position(|&b| b == b'=') {
            Some(eq) => (&token[..eq], &token[eq + 1..]),
            None => (token, &[][..]),
        };
        out.insert(lossy(key), lossy(value));
    }
    out
}

fn lossy(component: &[u8]) -> String {
    String::from_utf8_lossy(&decode_component(component)).into_owned()
}
