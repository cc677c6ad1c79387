/*!
Reversible ciphers for stored payloads.

**None of these ciphers is cryptographically secure.** They obscure data at
rest and demonstrate the pipeline; they do not authenticate, and a motivated
reader can break every one of them. Use a vetted AEAD construction for real
secrets.
*/

pub mod ciphers;
pub mod manager;
pub mod spn;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::registry::codec_kind;
use crate::{Result, StowageError};

pub use ciphers::{CaesarCipher, RotateCipher, VigenereCipher, XorCipher};
pub use manager::EncryptionManager;
pub use spn::SpnCipher;

/// Length of generated keys
pub const GENERATED_KEY_LEN: usize = 32;

codec_kind!(
    /// Built-in cipher kinds
    EncryptionKind {
        Xor => "xor",
        Caesar => "caesar",
        Vigenere => "vigenere",
        Rotate => "rotate",
        Spn => "spn",
    }
);

/// Encryption abstraction for stored payloads
///
/// `decrypt(encrypt(d, k), k) == d`. A missing or empty key is always an
/// error.
pub trait Encryptor: Send + Sync {
    fn name(&self) -> &str;

    fn encrypt(&self, data: &str, key: &str) -> Result<String>;

    fn decrypt(&self, data: &str, key: &str) -> Result<String>;

    /// A random key this cipher accepts
    fn generate_key(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_KEY_LEN)
            .map(char::from)
            .collect()
    }

    fn validate_key(&self, key: &str) -> bool {
        !key.is_empty()
    }
}

/// Output of the encryption stage
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionResult {
    pub encrypted: String,
    pub algorithm: EncryptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_check: Option<String>,
}

/// Fail unless the key is present and accepted by the cipher
pub(crate) fn require_key(cipher: &dyn Encryptor, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StowageError::encryption(cipher.name(), "missing encryption key"));
    }
    if !cipher.validate_key(key) {
        return Err(StowageError::encryption(cipher.name(), "invalid key"));
    }
    Ok(())
}

pub(crate) fn utf8(cipher: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| StowageError::encryption(cipher, "decrypted bytes are not valid UTF-8"))
}
