/*!
 * Audit Payload Encryption
 * AEAD sealing of audit payloads, bound to the event id
 */

use crate::core::errors::ConfigurationError;
use crate::core::limits::AUDIT_KEY_LEN;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Both supported ciphers use 96-bit nonces
const NONCE_LEN: usize = 12;

/// Supported payload ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "aes-256-gcm",
            CipherAlgorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(CipherAlgorithm::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(CipherAlgorithm::ChaCha20Poly1305),
            other => Err(format!("unsupported algorithm '{other}'")),
        }
    }
}

/// 256-bit key; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct AuditKey([u8; AUDIT_KEY_LEN]);

impl AuditKey {
    pub fn new(bytes: [u8; AUDIT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a hex-encoded key
    pub fn from_hex(key: &str, value: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidSetting {
            key: key.to_string(),
            value: "<redacted>".to_string(),
            reason,
        };
        let bytes = hex::decode(value.trim()).map_err(|e| invalid(e.to_string()))?;
        let bytes: [u8; AUDIT_KEY_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| invalid(format!("expected {AUDIT_KEY_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; AUDIT_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for AuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuditKey(<redacted>)")
    }
}

/// Encryption failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("{0} encryption failed")]
    Seal(CipherAlgorithm),
    #[error("{0} decryption failed: payload tampered or wrong key")]
    Open(CipherAlgorithm),
    #[error("malformed sealed payload: {0}")]
    Malformed(String),
    #[error("payload sealed with {found}, ledger uses {expected}")]
    AlgorithmMismatch {
        expected: CipherAlgorithm,
        found: CipherAlgorithm,
    },
}

/// Sealed bytes plus the nonce needed to open them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Configured AEAD for audit payloads
#[derive(Clone)]
pub enum PayloadCipher {
    Aes256Gcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
}

impl PayloadCipher {
    pub fn new(algorithm: CipherAlgorithm, key: &AuditKey) -> Self {
        let key = key.as_bytes().as_slice();
        match algorithm {
            CipherAlgorithm::Aes256Gcm => {
                PayloadCipher::Aes256Gcm(Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key)))
            }
            CipherAlgorithm::ChaCha20Poly1305 => PayloadCipher::ChaCha20Poly1305(
                ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key)),
            ),
        }
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        match self {
            PayloadCipher::Aes256Gcm(_) => CipherAlgorithm::Aes256Gcm,
            PayloadCipher::ChaCha20Poly1305(_) => CipherAlgorithm::ChaCha20Poly1305,
        }
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CipherError> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self {
            PayloadCipher::Aes256Gcm(cipher) => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, payload)
                    .map_err(|_| CipherError::Seal(self.algorithm()))?;
                Ok(Sealed {
                    nonce: nonce.to_vec(),
                    ciphertext,
                })
            }
            PayloadCipher::ChaCha20Poly1305(cipher) => {
                let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, payload)
                    .map_err(|_| CipherError::Seal(self.algorithm()))?;
                Ok(Sealed {
                    nonce: nonce.to_vec(),
                    ciphertext,
                })
            }
        }
    }

    pub fn open(&self, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.nonce.len() != NONCE_LEN {
            return Err(CipherError::Malformed(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                sealed.nonce.len()
            )));
        }
        let payload = Payload {
            msg: sealed.ciphertext.as_slice(),
            aad,
        };
        match self {
            PayloadCipher::Aes256Gcm(cipher) => cipher
                .decrypt(aes_gcm::Nonce::from_slice(&sealed.nonce), payload)
                .map_err(|_| CipherError::Open(self.algorithm())),
            PayloadCipher::ChaCha20Poly1305(cipher) => cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(&sealed.nonce), payload)
                .map_err(|_| CipherError::Open(self.algorithm())),
        }
    }
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadCipher({})", self.algorithm())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AuditKey {
        AuditKey::new([7u8; AUDIT_KEY_LEN])
    }

    #[test]
    fn test_seal_open_both_algorithms() {
        for algorithm in [CipherAlgorithm::Aes256Gcm, CipherAlgorithm::ChaCha20Poly1305] {
            let cipher = PayloadCipher::new(algorithm, &key());
            let sealed = cipher.seal(b"secret details", b"event-1").unwrap();
            assert_ne!(sealed.ciphertext, b"secret details".to_vec());
            assert_eq!(cipher.open(&sealed, b"event-1").unwrap(), b"secret details");
        }
    }

    #[test]
    fn test_open_rejects_wrong_aad() {
        let cipher = PayloadCipher::new(CipherAlgorithm::Aes256Gcm, &key());
        let sealed = cipher.seal(b"details", b"event-1").unwrap();
        assert_eq!(
            cipher.open(&sealed, b"event-2").unwrap_err(),
            CipherError::Open(CipherAlgorithm::Aes256Gcm)
        );
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sealed = PayloadCipher::new(CipherAlgorithm::ChaCha20Poly1305, &key())
            .seal(b"details", b"aad")
            .unwrap();
        let other = PayloadCipher::new(
            CipherAlgorithm::ChaCha20Poly1305,
            &AuditKey::new([9u8; AUDIT_KEY_LEN]),
        );
        assert!(other.open(&sealed, b"aad").is_err());
    }

    #[test]
    fn test_key_from_hex() {
        let hex_key = "00".repeat(AUDIT_KEY_LEN);
        assert!(AuditKey::from_hex("K", &hex_key).is_ok());
        assert!(AuditKey::from_hex("K", "abcd").is_err());
        assert!(AuditKey::from_hex("K", "zz").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "AuditKey(<redacted>)");
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(
            "ChaCha20-Poly1305".parse::<CipherAlgorithm>().unwrap(),
            CipherAlgorithm::ChaCha20Poly1305
        );
        assert!("rot13".parse::<CipherAlgorithm>().is_err());
    }
}
