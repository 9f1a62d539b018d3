//! Base-62 short-code codec.
//!
//! Codes are the base-62 rendering of a 64-bit row id over `[0-9A-Za-z]`,
//! least-significant digit first. LSD-first means `encode(62) == "01"`, not
//! `"10"`; both sides of the codec must agree on this or round-tripping
//! breaks silently.

use crate::{Error, Result};

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: u64 = 62;

/// Maximum code length: ceil(64 / log2(62)) digits cover all of `u64`.
pub const MAX_CODE_LEN: usize = 11;

/// Encode an id as a short code.
pub fn encode(mut id: u64) -> String {
    if id == 0 {
        return "0".to_string();
    }

    let mut out = String::with_capacity(MAX_CODE_LEN);
    while id > 0 {
        out.push(ALPHABET[(id % BASE) as usize] as char);
        id /= BASE;
    }
    out
}

/// Decode a short code back to its id.
///
/// Rejects empty input, characters outside the alphabet, over-long codes,
/// and codes that overflow `u64`.
pub fn decode(code: &str) -> Result<u64> {
    if code.is_empty() {
        return Err(Error::InvalidCode("empty code".to_string()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(Error::InvalidCode(format!(
            "code longer than {MAX_CODE_LEN} characters"
        )));
    }

    let mut id: u64 = 0;
    let mut multiplier: u64 = 1;
    for (i, c) in code.bytes().enumerate() {
        let digit = digit_value(c)
            .ok_or_else(|| Error::InvalidCode(format!("invalid character {:?}", c as char)))?;

        let term = (digit as u64)
            .checked_mul(multiplier)
            .and_then(|t| id.checked_add(t))
            .ok_or_else(|| Error::InvalidCode("code overflows 64 bits".to_string()))?;
        id = term;

        // The last digit does not need a next multiplier; computing it would
        // overflow for 11-character codes.
        if i + 1 < code.len() {
            multiplier = multiplier
                .checked_mul(BASE)
                .ok_or_else(|| Error::InvalidCode("code overflows 64 bits".to_string()))?;
        }
    }

    Ok(id)
}

fn digit_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'Z' => Some(c - b'A' + 10),
        b'a'..=b'z' => Some(c - b'a' + 36),
        _ => None,
    }
}
