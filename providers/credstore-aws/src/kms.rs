use async_trait::async_trait;
use aws_sdk_kms::Client as KmsClient;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use credstore_core::{DataKey, EncryptionContext, Error, KeyManagement, Result};
use std::collections::HashMap;
use tracing::debug;
use zeroize::Zeroizing;

/// Data keys minted and unwrapped by AWS KMS.
#[derive(Clone)]
pub struct KmsKeyProvider {
    client: KmsClient,
}

impl KmsKeyProvider {
    pub fn new(client: KmsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeyManagement for KmsKeyProvider {
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        size: usize,
    ) -> Result<DataKey> {
        let bytes = i32::try_from(size)
            .map_err(|_| Error::Crypto(format!("data key size {size} out of range")))?;
        let output = self
            .client
            .generate_data_key()
            .key_id(key_id)
            .number_of_bytes(bytes)
            .set_encryption_context(kms_context(context))
            .send()
            .await
            .map_err(|err| kms_error("GenerateDataKey", Some(key_id), err))?;

        let plaintext = output
            .plaintext()
            .map(|blob| Zeroizing::new(blob.as_ref().to_vec()))
            .ok_or_else(|| Error::Crypto("GenerateDataKey returned no plaintext".into()))?;
        let wrapped = output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| Error::Crypto("GenerateDataKey returned no ciphertext".into()))?;
        debug!(key_id, resolved = ?output.key_id(), "generated data key");

        Ok(DataKey { wrapped, plaintext })
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let output = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .set_encryption_context(kms_context(context))
            .send()
            .await
            .map_err(|err| kms_error("Decrypt", None, err))?;

        output
            .plaintext()
            .map(|blob| Zeroizing::new(blob.as_ref().to_vec()))
            .ok_or_else(|| Error::Crypto("Decrypt returned no plaintext".into()))
    }
}

fn kms_context(context: &EncryptionContext) -> Option<HashMap<String, String>> {
    (!context.is_empty()).then(|| context.to_hash_map())
}

fn kms_error<T>(operation: &str, key_id: Option<&str>, err: SdkError<T>) -> Error
where
    T: std::error::Error + ProvideErrorMetadata + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    let message = format!("{operation} failed: {}", DisplayErrorContext(&err));
    classify(code.as_deref(), key_id, message)
}

/// Maps a KMS error code onto the store's error kinds.
fn classify(code: Option<&str>, key_id: Option<&str>, message: String) -> Error {
    match code {
        Some("AccessDeniedException") => Error::AccessDenied(message),
        Some("InvalidCiphertextException" | "IncorrectKeyException") => {
            Error::ContextMismatch(message)
        }
        Some(
            "NotFoundException"
            | "DisabledException"
            | "KMSInvalidStateException"
            | "KeyUnavailableException",
        ) => Error::KeyUnavailable {
            key_id: key_id.unwrap_or("<from ciphertext>").to_string(),
            reason: message,
        },
        _ => Error::BackendUnavailable(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_is_kept_distinct() {
        let err = classify(Some("AccessDeniedException"), None, "denied".into());
        assert_eq!(err, Error::AccessDenied("denied".into()));
        assert!(err.is_key_access_failure());
    }

    #[test]
    fn invalid_ciphertext_means_context_mismatch() {
        let err = classify(Some("InvalidCiphertextException"), None, "bad".into());
        assert_eq!(err, Error::ContextMismatch("bad".into()));
        assert!(err.is_key_access_failure());
    }

    #[test]
    fn missing_or_disabled_key_is_unavailable() {
        for code in [
            "NotFoundException",
            "DisabledException",
            "KMSInvalidStateException",
            "KeyUnavailableException",
        ] {
            let err = classify(Some(code), Some("alias/credstash"), "gone".into());
            assert_eq!(
                err,
                Error::KeyUnavailable {
                    key_id: "alias/credstash".into(),
                    reason: "gone".into(),
                }
            );
            assert!(!err.is_key_access_failure());
        }
    }

    #[test]
    fn other_failures_are_backend_errors() {
        assert!(matches!(
            classify(Some("ThrottlingException"), None, "slow".into()),
            Error::BackendUnavailable(_)
        ));
        assert!(matches!(
            classify(None, None, "dispatch".into()),
            Error::BackendUnavailable(_)
        ));
    }

    #[test]
    fn empty_context_is_omitted() {
        assert!(kms_context(&EncryptionContext::new()).is_none());
        let ctx = EncryptionContext::new().with("env", "prod");
        assert_eq!(
            kms_context(&ctx).unwrap().get("env").map(String::as_str),
            Some("prod")
        );
    }
}
