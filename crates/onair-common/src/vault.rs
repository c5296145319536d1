//! Ingest credential vault.
//!
//! Every token is persisted twice: a salt-free SHA-256 hash for indexed
//! lookup from the publish hooks, and an AES-256-GCM blob for display and
//! injection into supervised children. Each seal generates a fresh random
//! 96-bit nonce via the system CSPRNG; nonce reuse would be catastrophic
//! for GCM security. Ciphertext and nonce are hex-encoded for storage.
//!
//! User passwords use Argon2id with a random salt and never touch the
//! AEAD path.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKey,
    #[error("nonce generation failed")]
    NonceGeneration,
    #[error("sealing failed")]
    Seal,
    #[error("decryption failed: wrong key or corrupted data")]
    Open,
    #[error("stored blob is not valid hex")]
    Encoding,
    #[error("password hashing failed: {0}")]
    Password(String),
}

/// Key material for sealing and opening ingest tokens.
#[derive(Clone)]
pub struct TokenVault {
    key: [u8; 32],
}

impl TokenVault {
    /// Build a vault from a 64-hex-character key, as supplied via
    /// `ENCRYPTION_KEY`.
    pub fn from_hex_key(key_hex: &str) -> Result<Self, VaultError> {
        let bytes = hex::decode(key_hex).map_err(|_| VaultError::InvalidKey)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| VaultError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Encrypt a token. Returns `(ciphertext_hex, nonce_hex)`; the
    /// ciphertext includes the 16-byte GCM tag.
    pub fn seal(&self, token: &str) -> Result<(String, String), VaultError> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::Seal)?;
        let sealing = LessSafeKey::new(unbound);

        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; 12];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| VaultError::NonceGeneration)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = token.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Seal)?;

        Ok((hex::encode(in_out), hex::encode(nonce_bytes)))
    }

    /// Decrypt a token previously produced by [`TokenVault::seal`].
    pub fn open(&self, ciphertext_hex: &str, nonce_hex: &str) -> Result<String, VaultError> {
        let ciphertext = hex::decode(ciphertext_hex).map_err(|_| VaultError::Encoding)?;
        let nonce_bytes: [u8; 12] = hex::decode(nonce_hex)
            .map_err(|_| VaultError::Encoding)?
            .try_into()
            .map_err(|_| VaultError::Encoding)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key).map_err(|_| VaultError::Open)?;
        let opening = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = ciphertext;
        let plaintext = opening
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::Open)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::Open)
    }
}

/// Deterministic, fixed-length lookup hash of a raw token.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh ingest token: 16 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    // SystemRandom only fails when the OS entropy source is unavailable,
    // which is unrecoverable at this layer.
    rng.fill(&mut bytes).expect("system CSPRNG unavailable");
    hex::encode(bytes)
}

// ── Passwords (Argon2id) ────────────────────────────────────────────

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String, VaultError> {
    use argon2::{
        password_hash::{rand_core::OsRng, SaltString},
        Argon2, PasswordHasher,
    };

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::Password(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, VaultError> {
    use argon2::{password_hash::PasswordHash, Argon2, PasswordVerifier};

    let parsed = PasswordHash::new(hash).map_err(|e| VaultError::Password(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn vault() -> TokenVault {
        TokenVault::from_hex_key(TEST_KEY).unwrap()
    }

    // ─── Seal / Open ────────────────────────────────────────────────

    #[test]
    fn seal_open_roundtrip() {
        let v = vault();
        let token = generate_token();
        let (ct, nonce) = v.seal(&token).unwrap();
        assert_eq!(v.open(&ct, &nonce).unwrap(), token);
    }

    #[test]
    fn seal_produces_different_ciphertext_for_same_token() {
        let v = vault();
        let (ct1, n1) = v.seal("same token twice").unwrap();
        let (ct2, n2) = v.seal("same token twice").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let v1 = vault();
        let v2 = TokenVault::from_hex_key(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        let (ct, nonce) = v1.seal("secret").unwrap();
        assert!(v2.open(&ct, &nonce).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let v = vault();
        let (ct, nonce) = v.seal("do not tamper").unwrap();
        let mut bytes = hex::decode(&ct).unwrap();
        bytes[0] ^= 0x01;
        assert!(v.open(&hex::encode(bytes), &nonce).is_err());
    }

    #[test]
    fn rejects_short_key() {
        assert!(TokenVault::from_hex_key("deadbeef").is_err());
        assert!(TokenVault::from_hex_key("not hex at all").is_err());
    }

    // ─── Hashing ────────────────────────────────────────────────────

    #[test]
    fn token_hash_is_deterministic_and_fixed_length() {
        let a = hash_token("my-token");
        let b = hash_token("my-token");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("other-token"));
    }

    #[test]
    fn generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(hex::decode(&a).is_ok());
    }

    // ─── Passwords ──────────────────────────────────────────────────

    #[test]
    fn password_hash_and_verify() {
        let hash = hash_password("test-password-123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("test-password-123", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }
}
