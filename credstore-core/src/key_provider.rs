use crate::context::EncryptionContext;
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// A freshly minted data key: the plaintext material plus the blob the key
/// management service can later unwrap.
pub struct DataKey {
    pub wrapped: Vec<u8>,
    pub plaintext: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("wrapped_len", &self.wrapped.len())
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

/// Trait implemented by key management services that mint and unwrap data keys.
#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// Mint `size` bytes of key material under `key_id` bound to `context`.
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        size: usize,
    ) -> Result<DataKey>;

    /// Recover the plaintext of a wrapped data key. The context must match the
    /// one used at generation.
    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>>;
}

#[async_trait]
impl<T> KeyManagement for Arc<T>
where
    T: KeyManagement + ?Sized,
{
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        size: usize,
    ) -> Result<DataKey> {
        (**self).generate_data_key(key_id, context, size).await
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        (**self).unwrap_data_key(wrapped, context).await
    }
}

#[async_trait]
impl<T> KeyManagement for Box<T>
where
    T: KeyManagement + ?Sized,
{
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        size: usize,
    ) -> Result<DataKey> {
        (**self).generate_data_key(key_id, context, size).await
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        (**self).unwrap_data_key(wrapped, context).await
    }
}
