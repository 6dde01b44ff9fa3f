//! Cipher codec for everything the store writes.
//!
//! Key: SHA-256 of the shared secret (32 bytes).
//! Cipher: AES-256-CBC with PKCS#7 padding and a fresh random 16-byte IV.
//!
//! Token wire format (text):
//!   <iv hex (32 chars)>:<ciphertext hex>

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::Md5;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CipherError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TOKEN_SEPARATOR: char = ':';

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Clone)]
pub struct CipherCodec {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CipherCodec {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            key: derive_key(secret),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let iv = generate_iv();
        let cipher = Aes256CbcEnc::new_from_slices(&self.key[..], &iv)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ok(format!(
            "{}{}{}",
            hex::encode(iv),
            TOKEN_SEPARATOR,
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a token produced by [`CipherCodec::encrypt`].
    ///
    /// A failure here means the data cannot be trusted; the cause is logged
    /// at debug level and returned.
    pub fn decrypt(&self, token: &str) -> Result<String, CipherError> {
        let result = self.decrypt_token(token);
        if let Err(err) = &result {
            debug!(error = %err, "token decryption failed");
        }
        result
    }

    fn decrypt_token(&self, token: &str) -> Result<String, CipherError> {
        let parts: Vec<&str> = token.split(TOKEN_SEPARATOR).collect();
        let [iv_hex, ciphertext_hex] = parts.as_slice() else {
            return Err(CipherError::MalformedToken);
        };
        let iv = hex::decode(iv_hex)?;
        if iv.len() != IV_LEN {
            return Err(CipherError::InvalidIv);
        }
        let ciphertext = hex::decode(ciphertext_hex)?;
        let cipher = Aes256CbcDec::new_from_slices(&self.key[..], &iv)
            .map_err(|_| CipherError::InvalidIv)?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

impl fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherCodec").field("key", &"<redacted>").finish()
    }
}

pub fn derive_key(secret: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    key
}

pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// `len` random bytes from the OS RNG, hex encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// MD5 hex digest of a plaintext chunk (32 chars).
pub fn checksum_hex(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "AyAtO-LaUnChEr-2024-SeCrEt!!";

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let codec = CipherCodec::from_secret("unit-test-secret");
        let token = codec.encrypt("héllo, wörld").unwrap();
        assert_eq!(codec.decrypt(&token).unwrap(), "héllo, wörld");
    }

    #[test]
    fn token_has_hex_iv_and_fresh_iv_per_call() {
        let codec = CipherCodec::from_secret("unit-test-secret");
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_ne!(a, b);

        let (iv, ct) = a.split_once(':').unwrap();
        assert_eq!(iv.len(), IV_LEN * 2);
        assert!(iv.chars().all(|c| c.is_ascii_hexdigit()));
        // one full block for a short plaintext
        assert_eq!(ct.len(), 32);
    }

    #[test]
    fn decrypts_token_written_by_existing_deployments() {
        let codec = CipherCodec::from_secret(SECRET);
        let token = "000102030405060708090a0b0c0d0e0f:\
                     b79b0ba4e4993cb8cb393599a46dd70ee13269207ac46da7ea115fd4c3b68489";
        assert_eq!(codec.decrypt(token).unwrap(), r#"[{"id":1,"name":"a"}]"#);
    }

    #[test]
    fn wrong_key_fails() {
        let codec = CipherCodec::from_secret("key-one");
        let other = CipherCodec::from_secret("key-two");
        let token = codec.encrypt("a reasonably long secret payload").unwrap();
        // CBC with the wrong key almost always breaks padding; if the padding
        // happens to validate, the plaintext must still differ.
        match other.decrypt(&token) {
            Err(_) => {}
            Ok(plain) => assert_ne!(plain, "a reasonably long secret payload"),
        }
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let codec = CipherCodec::from_secret("unit-test-secret");
        assert!(matches!(
            codec.decrypt("no-separator"),
            Err(CipherError::MalformedToken)
        ));
        assert!(matches!(
            codec.decrypt("aa:bb:cc"),
            Err(CipherError::MalformedToken)
        ));
        assert!(matches!(
            codec.decrypt("zz:00"),
            Err(CipherError::HexDecode(_))
        ));
        assert!(matches!(
            codec.decrypt("0011:00112233445566778899aabbccddeeff"),
            Err(CipherError::InvalidIv)
        ));
        let iv = "00".repeat(IV_LEN);
        assert!(matches!(
            codec.decrypt(&format!("{iv}:")),
            Err(CipherError::Decrypt)
        ));
    }

    #[test]
    fn checksum_is_md5_hex() {
        assert_eq!(checksum_hex("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            checksum_hex(r#"[{"id":1,"name":"a"}]"#),
            "ad0c4902cb1a9128347b516343bf1806"
        );
    }

    #[test]
    fn debug_does_not_leak_key() {
        let codec = CipherCodec::from_secret(SECRET);
        let rendered = format!("{codec:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains(&hex::encode(&derive_key(SECRET)[..])));
    }
}
