use crate::context::EncryptionContext;
use crate::crypto::cipher::{self, KEY_LEN};
use crate::errors::{Error, Result};
use crate::key_provider::KeyManagement;
use tracing::debug;

/// Bytes requested from key management per write: cipher key then MAC key.
pub const DATA_KEY_LEN: usize = 2 * KEY_LEN;

/// Output of [`EnvelopeCodec::seal`]: everything that is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub wrapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub mac: String,
}

/// Envelope encryption over a key management service. Each seal mints a
/// fresh data key; the plaintext key never leaves this type.
pub struct EnvelopeCodec<K> {
    keys: K,
}

impl<K> EnvelopeCodec<K>
where
    K: KeyManagement,
{
    pub fn new(keys: K) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Encrypts `plaintext` under a new data key wrapped by `key_id`.
    pub async fn seal(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        plaintext: &[u8],
    ) -> Result<Envelope> {
        let data_key = self
            .keys
            .generate_data_key(key_id, context, DATA_KEY_LEN)
            .await?;
        let (cipher_key, mac_key) = split_data_key(&data_key.plaintext)?;

        let ciphertext = cipher::encrypt(cipher_key, plaintext)?;
        let mac = cipher::mac(&ciphertext, mac_key)?;
        debug!(key_id, bytes = ciphertext.len(), "sealed payload");

        Ok(Envelope {
            wrapped_key: data_key.wrapped,
            ciphertext,
            mac,
        })
    }

    /// Unwraps the data key, verifies the tag and only then decrypts.
    pub async fn open(
        &self,
        wrapped_key: &[u8],
        ciphertext: &[u8],
        mac: &str,
        context: &EncryptionContext,
    ) -> Result<Vec<u8>> {
        let material = self.keys.unwrap_data_key(wrapped_key, context).await?;
        let (cipher_key, mac_key) = split_data_key(&material)?;

        let expected = cipher::mac(ciphertext, mac_key)?;
        if expected != mac {
            return Err(Error::IntegrityCheckFailed);
        }

        cipher::decrypt(cipher_key, ciphertext)
    }
}

fn split_data_key(material: &[u8]) -> Result<(&[u8], &[u8])> {
    if material.len() != DATA_KEY_LEN {
        return Err(Error::Crypto(format!(
            "data key must be {DATA_KEY_LEN} bytes, got {}",
            material.len()
        )));
    }
    Ok(material.split_at(KEY_LEN))
}
