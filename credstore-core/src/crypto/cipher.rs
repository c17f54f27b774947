//! Symmetric primitives used by the envelope codec.
//!
//! # Fixed counter
//!
//! Payloads are encrypted with AES-256-CTR starting from the constant counter
//! block `00 .. 00 01`, the layout of records already in the table. The
//! counter must stay fixed. Every data key encrypts exactly one payload; the
//! envelope codec mints a fresh key for each write.

use crate::errors::{Error, Result};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;

const INITIAL_COUNTER: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// Encrypts `plaintext` under a 32-byte key.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = plaintext.to_vec();
    apply_keystream(key, &mut buffer)?;
    Ok(buffer)
}

/// Inverse of [`encrypt`]; CTR is its own inverse.
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    apply_keystream(key, &mut buffer)?;
    Ok(buffer)
}

/// HMAC-SHA-256 of `message`, lowercase hex.
pub fn mac(message: &[u8], key: &[u8]) -> Result<String> {
    check_key_len(key)?;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| Error::Crypto("invalid hmac key".into()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn apply_keystream(key: &[u8], buffer: &mut [u8]) -> Result<()> {
    check_key_len(key)?;
    let mut cipher = Aes256Ctr::new_from_slices(key, &INITIAL_COUNTER)
        .map_err(|_| Error::Crypto("invalid cipher key".into()))?;
    cipher.apply_keystream(buffer);
    Ok(())
}

fn check_key_len(key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(Error::Crypto(format!(
            "expected {KEY_LEN}-byte key, got {}",
            key.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::STANDARD};

    // Cipher key and payload of a record written by the legacy tooling.
    const LEGACY_KEY: [u8; 32] = [
        0x6a, 0xcf, 0xeb, 0xd6, 0xe9, 0xa6, 0x19, 0xc1, 0x38, 0xb9, 0xfc, 0x2d, 0x53, 0x23, 0x4d,
        0x78, 0x85, 0x48, 0x96, 0xd6, 0xd2, 0xf6, 0xf4, 0x42, 0x99, 0x9d, 0x8e, 0xa9, 0xed, 0xf0,
        0xb3, 0xf2,
    ];
    const LEGACY_CONTENTS: &str = "o8we1zr9GD+KstVv3x2YTeT2";

    #[test]
    fn decrypts_legacy_payload() {
        let ciphertext = STANDARD.decode(LEGACY_CONTENTS).unwrap();
        let plaintext = decrypt(&LEGACY_KEY, &ciphertext).unwrap();
        assert_eq!(plaintext, b"something test 123");
    }

    #[test]
    fn encrypt_is_deterministic_for_fixed_counter() {
        let ciphertext = encrypt(&LEGACY_KEY, b"something test 123").unwrap();
        assert_eq!(STANDARD.encode(&ciphertext), LEGACY_CONTENTS);
    }

    #[test]
    fn roundtrip_spans_multiple_blocks() {
        let key = [7u8; 32];
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let ciphertext = encrypt(&key, &plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn mac_matches_rfc4231_vector() {
        // RFC 4231 test case 2, with the key zero-extended to 32 bytes; HMAC
        // pads short keys with zeros so the tag is unchanged.
        let mut key = [0u8; 32];
        key[..4].copy_from_slice(b"Jefe");
        let tag = mac(b"what do ya want for nothing?", &key).unwrap();
        assert_eq!(
            tag,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn mac_of_legacy_payload_with_zero_key() {
        let ciphertext = STANDARD.decode(LEGACY_CONTENTS).unwrap();
        let tag = mac(&ciphertext, &[0u8; 32]).unwrap();
        assert_eq!(
            tag,
            "1e2d485cf52ec57d9db5c05eda678b45eee8d3dabcc6c1ee7c0999712026f6aa"
        );
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(matches!(encrypt(&[0u8; 16], b"x"), Err(Error::Crypto(_))));
        assert!(matches!(mac(b"x", &[0u8; 31]), Err(Error::Crypto(_))));
    }
}
