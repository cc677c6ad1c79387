/*!
Run-length encoding.

A run is written as `MARKER char count ';'` when it is longer than three
characters, when it is a run of more than one space, or when the character
is the marker itself. Everything else is copied literally.
*/

use super::Compressor;
use crate::{Result, StowageError};

const MARKER: char = '\u{1}';
const TERMINATOR: char = ';';
const MIN_RUN: usize = 4;
const MIN_SPACE_RUN: usize = 2;
/// Upper bound on a decoded run, rejects corrupt counts before allocating
const MAX_RUN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct RleCompressor;

impl RleCompressor {
    fn encodes_as_run(c: char, run: usize) -> bool {
        c == MARKER || run >= MIN_RUN || (c == ' ' && run >= MIN_SPACE_RUN)
    }
}

impl Compressor for RleCompressor {
    fn name(&self) -> &str {
        "rle"
    }

    fn compress(&self, data: &str) -> Result<String> {
        let mut out = String::with_capacity(data.len());
        let mut chars = data.chars().peekable();

        while let Some(c) = chars.next() {
            let mut run = 1;
            while chars.peek() == Some(&c) {
                chars.next();
                run += 1;
            }

            if Self::encodes_as_run(c, run) {
                out.push(MARKER);
                out.push(c);
                out.push_str(&run.to_string());
                out.push(TERMINATOR);
            } else {
                out.extend(std::iter::repeat(c).take(run));
            }
        }

        Ok(out)
    }

    fn decompress(&self, data: &str) -> Result<String> {
        let corrupt = |msg: String| StowageError::compression("rle", msg);
        let mut out = String::with_capacity(data.len());
        let mut chars = data.chars();

        while let Some(c) = chars.next() {
            if c != MARKER {
                out.push(c);
                continue;
            }

            let symbol = chars
                .next()
                .ok_or_else(|| corrupt("truncated run record".to_string()))?;
            let mut digits = String::new();
            loop {
                match chars.next() {
                    Some(TERMINATOR) => break,
                    Some(d) if d.is_ascii_digit() => digits.push(d),
                    Some(other) => {
                        return Err(corrupt(format!("unexpected '{other}' in run count")))
                    }
                    None => return Err(corrupt("unterminated run record".to_string())),
                }
            }

            let run: usize = digits
                .parse()
                .map_err(|_| corrupt(format!("invalid run count '{digits}'")))?;
            if run == 0 || run > MAX_RUN {
                return Err(corrupt(format!("run count {run} out of range")));
            }
            out.extend(std::iter::repeat(symbol).take(run));
        }

        Ok(out)
    }
}
