//! At-rest encryption of operator secrets.
//!
//! Session records keep the storage secret so it can be replayed on every
//! storage call, so it must be recoverable: AES-256-GCM with a random
//! 96-bit nonce per secret under a process-held key.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use base64::Engine;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// 256-bit key used to wrap stored secrets.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

impl SecretKey {
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decode a base64 key, which must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD.decode(encoded.trim())?,
        );
        let bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("encryption key must be 32 bytes, got {}", decoded.len()))?;
        Ok(Self(bytes))
    }
}

/// A secret as stored in a session record.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    /// Ciphertext with the 16-byte authentication tag appended.
    ciphertext: Vec<u8>,
    nonce: [u8; 12],
}

impl std::fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("len", &self.ciphertext.len())
            .finish()
    }
}

/// Errors from the secret cipher.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("secret encryption failed")]
    EncryptionFailed,
    /// Wrong key, or the ciphertext was tampered with.
    #[error("secret decryption failed authentication")]
    DecryptionAuthFailed,
    #[error("decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// Encrypts and decrypts operator secrets.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher")
    }
}

impl SecretCipher {
    pub fn new(key: &SecretKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    pub fn encrypt(&self, secret: &str) -> Result<EncryptedSecret, CryptoError> {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), secret.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(EncryptedSecret { ciphertext, nonce })
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<Zeroizing<String>, CryptoError> {
        let plaintext = self
            .cipher
            .decrypt(
                aes_gcm::Nonce::from_slice(&secret.nonce),
                secret.ciphertext.as_ref(),
            )
            .map_err(|_| CryptoError::DecryptionAuthFailed)?;
        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|e| {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                CryptoError::InvalidUtf8
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = SecretCipher::new(&SecretKey::random());
        let enc = cipher.encrypt("wJalrXUtnFEMI/K7MDENG").unwrap();
        assert_eq!(cipher.decrypt(&enc).unwrap().as_str(), "wJalrXUtnFEMI/K7MDENG");
    }

    #[test]
    fn test_ciphertext_differs_per_call() {
        let cipher = SecretCipher::new(&SecretKey::random());
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert!(!a.ciphertext.windows(4).any(|w| w == b"same"));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let enc = SecretCipher::new(&SecretKey::random())
            .encrypt("secret")
            .unwrap();
        let other = SecretCipher::new(&SecretKey::random());
        assert!(matches!(
            other.decrypt(&enc),
            Err(CryptoError::DecryptionAuthFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let cipher = SecretCipher::new(&SecretKey::random());
        let mut enc = cipher.encrypt("secret").unwrap();
        enc.ciphertext[0] ^= 0xff;
        assert!(cipher.decrypt(&enc).is_err());
    }

    #[test]
    fn test_key_from_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(SecretKey::from_base64(&encoded).is_ok());
        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(SecretKey::from_base64(&short).is_err());
        assert!(SecretKey::from_base64("not base64!").is_err());
    }
}
