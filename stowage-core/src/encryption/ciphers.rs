/*!
Classical ciphers: repeating-key XOR, Caesar, Vigenère and keyed rotation.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;

use super::{require_key, utf8, Encryptor, GENERATED_KEY_LEN};
use crate::{Result, StowageError};

fn decode_base64(cipher: &str, data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| StowageError::encryption(cipher, format!("malformed ciphertext: {e}")))
}

fn shift_letter(c: char, shift: u8) -> char {
    let base = match c {
        'a'..='z' => b'a',
        'A'..='Z' => b'A',
        _ => return c,
    };
    char::from(base + (c as u8 - base + shift) % 26)
}

/// Repeating-key XOR over the UTF-8 bytes, base64 wrapped
#[derive(Debug, Clone, Default)]
pub struct XorCipher;

impl XorCipher {
    fn apply(data: &[u8], key: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl Encryptor for XorCipher {
    fn name(&self) -> &str {
        "xor"
    }

    fn encrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        Ok(BASE64.encode(Self::apply(data.as_bytes(), key.as_bytes())))
    }

    fn decrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        let bytes = decode_base64(self.name(), data)?;
        utf8(self.name(), Self::apply(&bytes, key.as_bytes()))
    }
}

/// Caesar shift of ASCII letters; the shift is the sum of the key's
/// character codes modulo 26
#[derive(Debug, Clone, Default)]
pub struct CaesarCipher;

impl CaesarCipher {
    fn shift(key: &str) -> u8 {
        (key.chars().map(|c| c as u64).sum::<u64>() % 26) as u8
    }

    fn apply(data: &str, shift: u8) -> String {
        data.chars().map(|c| shift_letter(c, shift)).collect()
    }
}

impl Encryptor for CaesarCipher {
    fn name(&self) -> &str {
        "caesar"
    }

    fn encrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        Ok(Self::apply(data, Self::shift(key)))
    }

    fn decrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        Ok(Self::apply(data, (26 - Self::shift(key)) % 26))
    }
}

/// Vigenère over ASCII letters, preserving case. Non-letters pass through
/// and do not advance the key.
#[derive(Debug, Clone, Default)]
pub struct VigenereCipher;

impl VigenereCipher {
    fn shifts(key: &str) -> Vec<u8> {
        key.chars()
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase() as u8 - b'a')
            .collect()
    }

    fn apply(data: &str, shifts: &[u8], decrypt: bool) -> String {
        let mut position = 0;
        data.chars()
            .map(|c| {
                if !c.is_ascii_alphabetic() {
                    return c;
                }
                let shift = shifts[position % shifts.len()];
                position += 1;
                shift_letter(c, if decrypt { (26 - shift) % 26 } else { shift })
            })
            .collect()
    }
}

impl Encryptor for VigenereCipher {
    fn name(&self) -> &str {
        "vigenere"
    }

    fn encrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        Ok(Self::apply(data, &Self::shifts(key), false))
    }

    fn decrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        Ok(Self::apply(data, &Self::shifts(key), true))
    }

    fn generate_key(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..GENERATED_KEY_LEN)
            .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
            .collect()
    }

    /// The key needs at least one ASCII letter
    fn validate_key(&self, key: &str) -> bool {
        key.chars().any(|c| c.is_ascii_alphabetic())
    }
}

/// Per byte: add the key byte, then rotate left by the key byte mod 8.
/// Output is base64.
#[derive(Debug, Clone, Default)]
pub struct RotateCipher;

impl Encryptor for RotateCipher {
    fn name(&self) -> &str {
        "rotate"
    }

    fn encrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        let encrypted: Vec<u8> = data
            .bytes()
            .zip(key.bytes().cycle())
            .map(|(b, k)| b.wrapping_add(k).rotate_left(u32::from(k % 8)))
            .collect();
        Ok(BASE64.encode(encrypted))
    }

    fn decrypt(&self, data: &str, key: &str) -> Result<String> {
        require_key(self, key)?;
        let bytes = decode_base64(self.name(), data)?;
        let decrypted = bytes
            .into_iter()
            .zip(key.bytes().cycle())
            .map(|(b, k)| b.rotate_right(u32::from(k % 8)).wrapping_sub(k))
            .collect();
        utf8(self.name(), decrypted)
    }
}
