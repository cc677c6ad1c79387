/*!
Cipher registry with salted key fingerprints.
*/

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    require_key, CaesarCipher, EncryptionKind, EncryptionResult, Encryptor, RotateCipher,
    SpnCipher, VigenereCipher, XorCipher,
};
use crate::registry::Registry;
use crate::{Result, StowageError};

/// Hex characters of the SHA-256 fingerprint kept in `key_check`
const KEY_CHECK_LEN: usize = 16;

pub struct EncryptionManager {
    registry: Registry<EncryptionKind, dyn Encryptor>,
}

impl Default for EncryptionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn key_check(salt: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..KEY_CHECK_LEN].to_string()
}

impl EncryptionManager {
    /// Manager with every built-in cipher and `xor` as the default
    pub fn new() -> Self {
        let manager = Self::empty(EncryptionKind::Xor);
        manager.register(EncryptionKind::Xor, Arc::new(XorCipher));
        manager.register(EncryptionKind::Caesar, Arc::new(CaesarCipher));
        manager.register(EncryptionKind::Vigenere, Arc::new(VigenereCipher));
        manager.register(EncryptionKind::Rotate, Arc::new(RotateCipher));
        manager.register(EncryptionKind::Spn, Arc::new(SpnCipher));
        manager
    }

    pub fn empty(default: EncryptionKind) -> Self {
        Self {
            registry: Registry::new("encryptor", default),
        }
    }

    pub fn register(&self, kind: EncryptionKind, encryptor: Arc<dyn Encryptor>) {
        self.registry.register(kind, encryptor);
    }

    pub fn unregister(&self, kind: &EncryptionKind) -> Option<Arc<dyn Encryptor>> {
        self.registry.unregister(kind)
    }

    pub fn get_encryptor(&self, kind: &EncryptionKind) -> Option<Arc<dyn Encryptor>> {
        self.registry.get(kind)
    }

    pub fn set_default(&self, kind: EncryptionKind) -> Result<()> {
        self.registry.set_default(kind)
    }

    pub fn default_kind(&self) -> EncryptionKind {
        self.registry.default_kind()
    }

    pub fn get_all_algorithms(&self) -> Vec<EncryptionKind> {
        self.registry.kinds()
    }

    /// A fresh key for the given cipher, or the default one
    pub fn generate_key(&self, kind: Option<&EncryptionKind>) -> Result<String> {
        let (_, encryptor) = self.registry.resolve(kind)?;
        Ok(encryptor.generate_key())
    }

    pub fn validate_key(&self, key: &str, kind: Option<&EncryptionKind>) -> Result<bool> {
        let (_, encryptor) = self.registry.resolve(kind)?;
        Ok(!key.is_empty() && encryptor.validate_key(key))
    }

    /// Encrypt and record a salted key fingerprint next to the ciphertext
    pub fn encrypt(
        &self,
        data: &str,
        key: &str,
        kind: Option<&EncryptionKind>,
    ) -> Result<EncryptionResult> {
        let (kind, encryptor) = self.registry.resolve(kind)?;
        require_key(encryptor.as_ref(), key)?;

        let encrypted = encryptor.encrypt(data, key)?;
        let salt = Uuid::new_v4().to_string();
        debug!(algorithm = %kind, size = encrypted.len(), "Encrypted payload");
        Ok(EncryptionResult {
            encrypted,
            algorithm: kind,
            iv: None,
            key_check: Some(key_check(&salt, key)),
            salt: Some(salt),
        })
    }

    /// Decrypt with the cipher the result names. A key that does not match
    /// the recorded fingerprint is rejected before decrypting.
    pub fn decrypt(&self, result: &EncryptionResult, key: &str) -> Result<String> {
        let encryptor = self.registry.require(&result.algorithm)?;
        require_key(encryptor.as_ref(), key)?;

        if let (Some(salt), Some(expected)) = (&result.salt, &result.key_check) {
            if key_check(salt, key) != *expected {
                return Err(StowageError::encryption(result.algorithm.as_str(), "invalid key"));
            }
        }
        encryptor.decrypt(&result.encrypted, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_algorithm_round_trips() {
        let manager = EncryptionManager::new();
        for kind in manager.get_all_algorithms() {
            let key = manager.generate_key(Some(&kind)).unwrap();
            assert!(manager.validate_key(&key, Some(&kind)).unwrap());

            let result = manager.encrypt("secret payload", &key, Some(&kind)).unwrap();
            assert_eq!(result.algorithm, kind);
            assert_eq!(manager.decrypt(&result, &key).unwrap(), "secret payload");
        }
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let manager = EncryptionManager::new();
        let result = manager.encrypt("secret", "k1", None).unwrap();

        let err = manager.decrypt(&result, "k2").unwrap_err();
        assert!(matches!(err, StowageError::Encryption { .. }));
        assert!(err.to_string().contains("invalid key"));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let manager = EncryptionManager::new();
        assert!(manager.encrypt("secret", "", None).is_err());
        assert!(!manager.validate_key("", None).unwrap());

        let result = manager.encrypt("secret", "k1", None).unwrap();
        assert_eq!(manager.decrypt(&result, "").unwrap_err().code(), "ENCRYPTION_ERROR");
    }

    #[test]
    fn test_salt_differs_per_call() {
        let manager = EncryptionManager::new();
        let a = manager.encrypt("secret", "k1", Some(&EncryptionKind::Spn)).unwrap();
        let b = manager.encrypt("secret", "k1", Some(&EncryptionKind::Spn)).unwrap();
        assert_eq!(a.encrypted, b.encrypted);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.key_check, b.key_check);
    }

    #[test]
    fn test_result_without_fingerprint_still_decrypts() {
        let manager = EncryptionManager::new();
        let mut result = manager.encrypt("legacy", "k1", None).unwrap();
        result.salt = None;
        result.key_check = None;
        assert_eq!(manager.decrypt(&result, "k1").unwrap(), "legacy");
    }
}
