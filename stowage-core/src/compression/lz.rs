/*!
Windowed LZ77-style compressor.

Output is a stream of characters. A literal is the character itself, except
the marker, which is doubled. A back-reference is the marker followed by two
characters carrying `0x80 + offset` and `0x80 + length`; both stay below the
surrogate range, so every reference is a valid `char`.
*/

use super::Compressor;
use crate::{Result, StowageError};

const MARKER: char = '\u{1}';
const CODE_BASE: u32 = 0x80;
const WINDOW_SIZE: usize = 1024;
const MAX_MATCH: usize = 255;
/// A reference costs five UTF-8 bytes, so only longer matches pay off
const MIN_MATCH: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct LzCompressor;

impl LzCompressor {
    fn longest_match(chars: &[char], pos: usize) -> Option<(usize, usize)> {
        let start = pos.saturating_sub(WINDOW_SIZE);
        let limit = MAX_MATCH.min(chars.len() - pos);
        if limit < MIN_MATCH {
            return None;
        }

        let mut best: Option<(usize, usize)> = None;
        for candidate in (start..pos).rev() {
            if chars[candidate] != chars[pos] {
                continue;
            }
            let mut len = 1;
            // the match may run past `pos` and overlap itself
            while len < limit && chars[candidate + len] == chars[pos + len] {
                len += 1;
            }
            if len >= MIN_MATCH && best.map_or(true, |(_, best_len)| len > best_len) {
                best = Some((pos - candidate, len));
                if len == limit {
                    break;
                }
            }
        }
        best
    }

    fn code(value: usize) -> char {
        // offset and length are bounded far below the surrogate range
        char::from_u32(CODE_BASE + value as u32).unwrap_or(MARKER)
    }
}

impl Compressor for LzCompressor {
    fn name(&self) -> &str {
        "lz"
    }

    fn compress(&self, data: &str) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let chars: Vec<char> = data.chars().collect();
        let mut out = String::with_capacity(data.len());
        let mut pos = 0;

        while pos < chars.len() {
            match Self::longest_match(&chars, pos) {
                Some((offset, len)) => {
                    out.push(MARKER);
                    out.push(Self::code(offset));
                    out.push(Self::code(len));
                    pos += len;
                }
                None => {
                    let c = chars[pos];
                    out.push(c);
                    if c == MARKER {
                        out.push(MARKER);
                    }
                    pos += 1;
                }
            }
        }

        Ok(out)
    }

    fn decompress(&self, data: &str) -> Result<String> {
        let corrupt = |msg: &str| StowageError::compression("lz", msg);
        let decode = |c: Option<char>| -> Result<usize> {
            let c = c.ok_or_else(|| corrupt("truncated back-reference"))?;
            (c as u32)
                .checked_sub(CODE_BASE)
                .map(|v| v as usize)
                .ok_or_else(|| corrupt("invalid back-reference code"))
        };

        let mut out: Vec<char> = Vec::with_capacity(data.len() * 2);
        let mut input = data.chars();

        while let Some(c) = input.next() {
            if c != MARKER {
                out.push(c);
                continue;
            }

            let mut lookahead = input.clone();
            if lookahead.next() == Some(MARKER) {
                input = lookahead;
                out.push(MARKER);
                continue;
            }

            let offset = decode(input.next())?;
            let len = decode(input.next())?;
            if offset == 0 || offset > out.len() || offset > WINDOW_SIZE {
                return Err(corrupt("back-reference outside the window"));
            }
            if len == 0 || len > MAX_MATCH {
                return Err(corrupt("invalid back-reference length"));
            }

            let from = out.len() - offset;
            for i in 0..len {
                let c = out[from + i];
                out.push(c);
            }
        }

        Ok(out.into_iter().collect())
    }
}
