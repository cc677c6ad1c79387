/*!
Huffman coder with a per-call frequency table.

Output layout: an 8-digit decimal length, a JSON header of that many bytes
holding the code tree and the bit count, then the bit-packed payload in
base64.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use super::Compressor;
use crate::{Result, StowageError};

const LENGTH_DIGITS: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
enum CodeTree {
    Leaf(char),
    Node(Box<CodeTree>, Box<CodeTree>),
}

#[derive(Serialize, Deserialize, Debug)]
struct Header {
    tree: CodeTree,
    bits: usize,
}

impl CodeTree {
    fn build(data: &str) -> Option<CodeTree> {
        let mut frequencies: BTreeMap<char, usize> = BTreeMap::new();
        for c in data.chars() {
            *frequencies.entry(c).or_default() += 1;
        }

        // (weight, insertion order) keeps the build deterministic
        let mut nodes: Vec<Option<CodeTree>> = Vec::new();
        let mut heap = BinaryHeap::new();
        for (c, weight) in frequencies {
            heap.push(Reverse((weight, nodes.len())));
            nodes.push(Some(CodeTree::Leaf(c)));
        }

        while heap.len() > 1 {
            let Reverse((w1, i1)) = heap.pop()?;
            let Reverse((w2, i2)) = heap.pop()?;
            let left = nodes[i1].take()?;
            let right = nodes[i2].take()?;
            heap.push(Reverse((w1 + w2, nodes.len())));
            nodes.push(Some(CodeTree::Node(Box::new(left), Box::new(right))));
        }

        let Reverse((_, root)) = heap.pop()?;
        nodes[root].take()
    }

    fn codes(&self) -> HashMap<char, Vec<bool>> {
        let mut codes = HashMap::new();
        match self {
            // a lone symbol still needs one bit per occurrence
            CodeTree::Leaf(c) => {
                codes.insert(*c, vec![false]);
            }
            node => node.collect_codes(&mut Vec::new(), &mut codes),
        }
        codes
    }

    fn collect_codes(&self, prefix: &mut Vec<bool>, codes: &mut HashMap<char, Vec<bool>>) {
        match self {
            CodeTree::Leaf(c) => {
                codes.insert(*c, prefix.clone());
            }
            CodeTree::Node(left, right) => {
                prefix.push(false);
                left.collect_codes(prefix, codes);
                prefix.pop();
                prefix.push(true);
                right.collect_codes(prefix, codes);
                prefix.pop();
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HuffmanCompressor;

impl Compressor for HuffmanCompressor {
    fn name(&self) -> &str {
        "huffman"
    }

    fn compress(&self, data: &str) -> Result<String> {
        let Some(tree) = CodeTree::build(data) else {
            return Ok(String::new());
        };
        let codes = tree.codes();

        let mut packed = Vec::with_capacity(data.len() / 2);
        let mut bits = 0usize;
        for c in data.chars() {
            let code = codes
                .get(&c)
                .ok_or_else(|| StowageError::compression(self.name(), "symbol missing from tree"))?;
            for &bit in code {
                if bits % 8 == 0 {
                    packed.push(0u8);
                }
                if bit {
                    if let Some(last) = packed.last_mut() {
                        *last |= 0x80 >> (bits % 8);
                    }
                }
                bits += 1;
            }
        }

        let header = serde_json::to_string(&Header { tree, bits })?;
        Ok(format!(
            "{:0width$}{}{}",
            header.len(),
            header,
            BASE64.encode(packed),
            width = LENGTH_DIGITS
        ))
    }

    fn decompress(&self, data: &str) -> Result<String> {
        if data.is_empty() {
            return Ok(String::new());
        }

        let corrupt = |msg: String| StowageError::compression("huffman", msg);
        let header_len: usize = data
            .get(..LENGTH_DIGITS)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| corrupt("missing length prefix".to_string()))?;
        let header_end = LENGTH_DIGITS
            .checked_add(header_len)
            .ok_or_else(|| corrupt("header length overflows".to_string()))?;
        let header = data
            .get(LENGTH_DIGITS..header_end)
            .ok_or_else(|| corrupt("truncated header".to_string()))?;
        let header: Header =
            serde_json::from_str(header).map_err(|e| corrupt(format!("bad header: {e}")))?;
        let packed = BASE64
            .decode(&data[header_end..])
            .map_err(|e| corrupt(format!("bad payload: {e}")))?;
        if header.bits > packed.len() * 8 {
            return Err(corrupt(format!(
                "payload holds {} bits, header claims {}",
                packed.len() * 8,
                header.bits
            )));
        }

        let bit_at = |i: usize| packed[i / 8] & (0x80 >> (i % 8)) != 0;
        let mut out = String::new();

        if let CodeTree::Leaf(c) = header.tree {
            out.extend(std::iter::repeat(c).take(header.bits));
            return Ok(out);
        }

        let mut node = &header.tree;
        for i in 0..header.bits {
            if let CodeTree::Node(left, right) = node {
                node = if bit_at(i) { &**right } else { &**left };
            }
            if let CodeTree::Leaf(c) = node {
                out.push(*c);
                node = &header.tree;
            }
        }
        if !std::ptr::eq(node, &header.tree) {
            return Err(corrupt("payload ends inside a code".to_string()));
        }

        Ok(out)
    }
}
