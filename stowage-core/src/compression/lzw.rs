/*!
LZW dictionary coder over the UTF-8 bytes of the input.

The dictionary starts with the 256 single bytes and grows to at most 65,536
codes; it is rebuilt on every call. Each code is written as one `char`:
codes below the surrogate range map to themselves, the rest are shifted past
it.
*/

use std::collections::HashMap;

use super::Compressor;
use crate::{Result, StowageError};

const MAX_CODES: usize = 1 << 16;
const SURROGATE_START: u32 = 0xD800;
const SURROGATE_SPAN: u32 = 0x800;

fn code_to_char(code: u32) -> Option<char> {
    if code < SURROGATE_START {
        char::from_u32(code)
    } else {
        char::from_u32(code + SURROGATE_SPAN)
    }
}

fn char_to_code(c: char) -> Option<usize> {
    let c = c as u32;
    let code = if c < SURROGATE_START {
        c
    } else {
        c.checked_sub(SURROGATE_SPAN)?
    };
    let code = code as usize;
    (code < MAX_CODES).then_some(code)
}

#[derive(Debug, Clone, Default)]
pub struct LzwCompressor;

impl Compressor for LzwCompressor {
    fn name(&self) -> &str {
        "lzw"
    }

    fn compress(&self, data: &str) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let mut dictionary: HashMap<Vec<u8>, u32> =
            (0..=255u8).map(|b| (vec![b], u32::from(b))).collect();
        let mut out = String::with_capacity(data.len());
        let mut emit = |code: u32| -> Result<()> {
            let c = code_to_char(code)
                .ok_or_else(|| StowageError::compression("lzw", format!("unencodable code {code}")))?;
            out.push(c);
            Ok(())
        };

        let mut word: Vec<u8> = Vec::new();
        for &byte in data.as_bytes() {
            word.push(byte);
            if dictionary.contains_key(&word) {
                continue;
            }
            let next_code = dictionary.len();
            word.pop();
            // `word` is always a known sequence here
            let code = dictionary.get(&word).copied().unwrap_or_default();
            emit(code)?;
            if next_code < MAX_CODES {
                let mut entry = word.clone();
                entry.push(byte);
                dictionary.insert(entry, next_code as u32);
            }
            word.clear();
            word.push(byte);
        }
        if let Some(&code) = dictionary.get(&word) {
            emit(code)?;
        }

        Ok(out)
    }

    fn decompress(&self, data: &str) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let corrupt = |msg: String| StowageError::compression("lzw", msg);
        let mut dictionary: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
        let mut codes = data.chars().map(|c| {
            char_to_code(c).ok_or_else(|| corrupt(format!("invalid code character U+{:04X}", c as u32)))
        });

        let first = codes
            .next()
            .transpose()?
            .ok_or_else(|| corrupt("empty code stream".to_string()))?;
        let mut previous = dictionary
            .get(first)
            .cloned()
            .ok_or_else(|| corrupt(format!("first code {first} is not a byte")))?;
        let mut out = previous.clone();

        for code in codes {
            let code = code?;
            let entry = if let Some(known) = dictionary.get(code) {
                known.clone()
            } else if code == dictionary.len() {
                let mut entry = previous.clone();
                entry.push(previous[0]);
                entry
            } else {
                return Err(corrupt(format!("code {code} is not in the dictionary")));
            };

            out.extend_from_slice(&entry);
            if dictionary.len() < MAX_CODES {
                let mut grown = previous;
                grown.push(entry[0]);
                dictionary.push(grown);
            }
            previous = entry;
        }

        String::from_utf8(out).map_err(|e| corrupt(e.to_string()))
    }
}
