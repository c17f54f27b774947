use crate::backend::{RecordBackend, TableSpec};
use crate::config::StoreConfig;
use crate::context::EncryptionContext;
use crate::crypto::envelope::EnvelopeCodec;
use crate::errors::{Error, Result};
use crate::key_provider::KeyManagement;
use crate::store::RecordStore;
use crate::table::{WaitPolicy, create_and_wait};
use crate::types::{DecryptedSecret, SecretListing, SecretRecord, Version};
use crate::version;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use tracing::{debug, info, warn};

/// High-level API that pairs the record table with envelope encryption.
pub struct Credstore<B, K> {
    store: RecordStore<B>,
    codec: EnvelopeCodec<K>,
    wait: WaitPolicy,
}

impl<B, K> Credstore<B, K>
where
    B: RecordBackend,
    K: KeyManagement,
{
    pub fn new(backend: B, keys: K) -> Self {
        Self {
            store: RecordStore::new(backend),
            codec: EnvelopeCodec::new(keys),
            wait: WaitPolicy::default(),
        }
    }

    /// Construct with the table wait policy taken from `config`.
    pub fn from_config(backend: B, keys: K, config: &StoreConfig) -> Self {
        Self::new(backend, keys).with_wait_policy(config.wait)
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn store(&self) -> &RecordStore<B> {
        &self.store
    }

    pub fn codec(&self) -> &EnvelopeCodec<K> {
        &self.codec
    }

    /// Create the secret table and wait until it is active.
    pub async fn setup(&self, table: &str, read_capacity: i64, write_capacity: i64) -> Result<()> {
        let spec = TableSpec {
            name: table.to_string(),
            read_capacity,
            write_capacity,
        };
        create_and_wait(self.store.backend(), &spec, self.wait).await
    }

    /// Pick the version a write of `name` would use; see [`version::resolve`].
    pub async fn resolve_version(
        &self,
        table: &str,
        name: &str,
        requested: u64,
    ) -> Result<Version> {
        version::resolve(&self.store, table, name, requested).await
    }

    /// Encrypt and store a secret. A `version` of zero means the next free
    /// one. Returns the version written.
    pub async fn put_secret(
        &self,
        table: &str,
        key_alias: &str,
        name: &str,
        plaintext: &[u8],
        version: u64,
        context: &EncryptionContext,
    ) -> Result<Version> {
        validate_name(name)?;
        let version = self.resolve_version(table, name, version).await?;
        let envelope = self.codec.seal(key_alias, context, plaintext).await?;

        let record = SecretRecord {
            name: name.to_string(),
            version: version.padded(),
            wrapped_key: STANDARD.encode(&envelope.wrapped_key),
            ciphertext: STANDARD.encode(&envelope.ciphertext),
            mac: envelope.mac,
            created_at: Utc::now().timestamp(),
        };
        self.store.put(table, &record).await?;
        info!(table, name, version = %version, "stored secret");
        Ok(version)
    }

    /// Retrieve and decrypt one version of a secret.
    pub async fn get_secret(
        &self,
        table: &str,
        name: &str,
        version: Version,
        context: &EncryptionContext,
    ) -> Result<DecryptedSecret> {
        validate_name(name)?;
        let record = self.store.get_exact(table, name, &version.padded()).await?;
        self.decrypt(record, context).await
    }

    /// Retrieve and decrypt the newest version of a secret.
    pub async fn get_highest_secret(
        &self,
        table: &str,
        name: &str,
        context: &EncryptionContext,
    ) -> Result<DecryptedSecret> {
        validate_name(name)?;
        let record = self.store.get_highest(table, name).await?;
        self.decrypt(record, context).await
    }

    /// Names, versions and creation times, without touching key management.
    pub async fn list_secrets(
        &self,
        table: &str,
        all_versions: bool,
    ) -> Result<Vec<SecretListing>> {
        self.store.scan_all(table, all_versions).await
    }

    /// Decrypt every secret in the table. Records whose key cannot be
    /// unwrapped with `context` are skipped; any other failure aborts.
    pub async fn get_all_secrets(
        &self,
        table: &str,
        all_versions: bool,
        context: &EncryptionContext,
    ) -> Result<Vec<DecryptedSecret>> {
        let records: Vec<SecretRecord> = self.store.scan_all(table, all_versions).await?;
        let total = records.len();
        let mut secrets = Vec::with_capacity(total);

        for record in records {
            let name = record.name.clone();
            let version = record.version.clone();
            match self.decrypt(record, context).await {
                Ok(secret) => secrets.push(secret),
                Err(err) if err.is_key_access_failure() => {
                    warn!(table, name = %name, version = %version, error = %err, "skipping secret");
                }
                Err(err) => return Err(err),
            }
        }

        debug!(table, total, decrypted = secrets.len(), "decrypted secrets");
        Ok(secrets)
    }

    /// Delete every version of `name`, returning the versions removed.
    pub async fn delete_secret(&self, table: &str, name: &str) -> Result<Vec<String>> {
        validate_name(name)?;
        self.store.delete_all(table, name).await
    }

    async fn decrypt(
        &self,
        record: SecretRecord,
        context: &EncryptionContext,
    ) -> Result<DecryptedSecret> {
        let wrapped_key = record.wrapped_key_bytes()?;
        let ciphertext = record.ciphertext_bytes()?;
        let plaintext = self
            .codec
            .open(&wrapped_key, &ciphertext, &record.mac, context)
            .await?;
        Ok(DecryptedSecret { record, plaintext })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryKeyProvider};
    use std::sync::Arc;

    const TABLE: &str = "credential-store";
    const ALIAS: &str = "alias/credstash";

    fn credstore() -> Credstore<MemoryBackend, Arc<MemoryKeyProvider>> {
        Credstore::new(
            MemoryBackend::new().with_table(TABLE),
            Arc::new(MemoryKeyProvider::new().with_key(ALIAS)),
        )
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = credstore();
        let ctx = EncryptionContext::new().with("app", "billing");
        let version = store
            .put_secret(TABLE, ALIAS, "db", b"hunter2", 0, &ctx)
            .await
            .unwrap();
        assert_eq!(version, Version::FIRST);

        let secret = store.get_highest_secret(TABLE, "db", &ctx).await.unwrap();
        assert_eq!(secret.secret(), "hunter2");
        assert_eq!(secret.version(), "0000000000000000001");
        assert!(secret.record.created_at > 0);

        let exact = store
            .get_secret(TABLE, "db", Version::FIRST, &ctx)
            .await
            .unwrap();
        assert_eq!(exact.plaintext, b"hunter2");
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let store = credstore();
        let ctx = EncryptionContext::new();
        let err = store
            .put_secret(TABLE, ALIAS, "", b"x", 0, &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidName);
        assert_eq!(store.store().backend().calls().queries, 0);
    }

    #[tokio::test]
    async fn unknown_key_alias_fails_without_writing() {
        let store = credstore();
        let err = store
            .put_secret(TABLE, "alias/other", "db", b"x", 0, &EncryptionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyUnavailable { .. }));
        assert!(store.store().backend().is_empty(TABLE));
    }

    #[tokio::test]
    async fn explicit_version_is_not_checked_for_gaps() {
        let store = credstore();
        let ctx = EncryptionContext::new();
        store
            .put_secret(TABLE, ALIAS, "db", b"v7", 7, &ctx)
            .await
            .unwrap();
        let next = store.resolve_version(TABLE, "db", 0).await.unwrap();
        assert_eq!(next.get(), 8);
    }

    #[tokio::test]
    async fn corrupt_stored_version_blocks_auto_increment() {
        let store = credstore();
        let record = SecretRecord {
            name: "db".into(),
            version: "latest".into(),
            wrapped_key: String::new(),
            ciphertext: String::new(),
            mac: String::new(),
            created_at: 0,
        };
        store
            .store()
            .backend()
            .insert_raw(TABLE, record.to_item())
            .unwrap();
        let err = store.resolve_version(TABLE, "db", 0).await.unwrap_err();
        assert_eq!(
            err,
            Error::CorruptVersion {
                name: "db".into(),
                value: "latest".into()
            }
        );

        let explicit = store.resolve_version(TABLE, "db", 3).await.unwrap();
        assert_eq!(explicit.padded(), "0000000000000000003");
    }
}
