use crate::backend::{AttributeValue, Item, ItemKey};
use crate::errors::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// Wire attribute names. Other tooling reads the same table, so these are
/// part of the storage contract.
pub const ATTR_NAME: &str = "name";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_KEY: &str = "key";
pub const ATTR_CONTENTS: &str = "contents";
pub const ATTR_HMAC: &str = "hmac";
pub const ATTR_CREATED_AT: &str = "created_at";

/// Digit count of `i64::MAX`; every stored version is padded to this width.
pub const VERSION_WIDTH: usize = 19;

/// Shown where a legacy row carries no creation timestamp.
pub const CREATED_AT_NOT_AVAILABLE: &str = "Not available";

/// Numeric secret version, rendered zero-padded to [`VERSION_WIDTH`] digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub const FIRST: Version = Version(1);
    pub const MAX: u64 = i64::MAX as u64;

    pub fn new(value: u64) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::InvalidVersion {
                value: value.to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Result<Self> {
        Self::new(self.0.saturating_add(1))
    }

    /// Parses a stored version string. Accepts plain decimal digits only,
    /// padded or not.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty()
            || value.len() > VERSION_WIDTH
            || !value.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        value.parse::<u64>().ok().and_then(|v| Self::new(v).ok())
    }

    /// Zero-padded wire form.
    pub fn padded(self) -> String {
        format!("{:0width$}", self.0, width = VERSION_WIDTH)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.padded())
    }
}

/// Row types that can be decoded from the table. The projection a row type
/// needs is part of the type, so a scan only fetches those columns.
pub trait StoredRow: Sized {
    /// Columns to request, or `None` for every attribute.
    const PROJECTION: Option<&'static [&'static str]>;

    fn from_item(item: &Item) -> Result<Self>;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
}

/// Persisted, encrypted secret row.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub name: String,
    pub version: String,
    /// Base64 of the key-management ciphertext blob.
    pub wrapped_key: String,
    /// Base64 of the AES-CTR ciphertext.
    pub ciphertext: String,
    /// Lowercase hex HMAC-SHA-256 over the raw ciphertext.
    pub mac: String,
    pub created_at: i64,
}

impl SecretRecord {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.name.clone(), self.version.clone())
    }

    pub fn wrapped_key_bytes(&self) -> Result<Vec<u8>> {
        decode_b64(ATTR_KEY, &self.wrapped_key)
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>> {
        decode_b64(ATTR_CONTENTS, &self.ciphertext)
    }

    pub fn created_at_date(&self) -> Option<DateTime<Utc>> {
        created_at_date(self.created_at)
    }

    pub fn to_item(&self) -> Item {
        let mut item = Item::with_capacity(6);
        item.insert(ATTR_NAME.into(), AttributeValue::S(self.name.clone()));
        item.insert(ATTR_VERSION.into(), AttributeValue::S(self.version.clone()));
        item.insert(ATTR_KEY.into(), AttributeValue::S(self.wrapped_key.clone()));
        item.insert(
            ATTR_CONTENTS.into(),
            AttributeValue::S(self.ciphertext.clone()),
        );
        item.insert(ATTR_HMAC.into(), AttributeValue::S(self.mac.clone()));
        item.insert(
            ATTR_CREATED_AT.into(),
            AttributeValue::N(self.created_at.to_string()),
        );
        item
    }
}

impl StoredRow for SecretRecord {
    const PROJECTION: Option<&'static [&'static str]> = Some(&[
        ATTR_NAME,
        ATTR_VERSION,
        ATTR_KEY,
        ATTR_CONTENTS,
        ATTR_HMAC,
        ATTR_CREATED_AT,
    ]);

    fn from_item(item: &Item) -> Result<Self> {
        Ok(Self {
            name: required_s(item, ATTR_NAME)?,
            version: required_s(item, ATTR_VERSION)?,
            wrapped_key: required_s(item, ATTR_KEY)?,
            ciphertext: required_s(item, ATTR_CONTENTS)?,
            mac: required_s(item, ATTR_HMAC)?,
            created_at: optional_n(item, ATTR_CREATED_AT)?,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Secret metadata without any encrypted material, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretListing {
    pub name: String,
    pub version: String,
    pub created_at: i64,
}

impl SecretListing {
    pub fn created_at_date(&self) -> Option<DateTime<Utc>> {
        created_at_date(self.created_at)
    }

    /// RFC 3339 creation time, or [`CREATED_AT_NOT_AVAILABLE`].
    pub fn created_at_display(&self) -> String {
        self.created_at_date()
            .map(|date| date.to_rfc3339())
            .unwrap_or_else(|| CREATED_AT_NOT_AVAILABLE.to_string())
    }
}

impl StoredRow for SecretListing {
    const PROJECTION: Option<&'static [&'static str]> =
        Some(&[ATTR_NAME, ATTR_VERSION, ATTR_CREATED_AT]);

    fn from_item(item: &Item) -> Result<Self> {
        Ok(Self {
            name: required_s(item, ATTR_NAME)?,
            version: required_s(item, ATTR_VERSION)?,
            created_at: optional_n(item, ATTR_CREATED_AT)?,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// A secret record together with its recovered plaintext. Only ever built
/// for the caller of a read.
#[derive(Clone)]
pub struct DecryptedSecret {
    pub record: SecretRecord,
    pub plaintext: Vec<u8>,
}

impl DecryptedSecret {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    /// Plaintext as text; invalid UTF-8 sequences are replaced.
    pub fn secret(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.plaintext)
    }
}

impl fmt::Debug for DecryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptedSecret")
            .field("record", &self.record)
            .field("plaintext", &"<redacted>")
            .finish()
    }
}

fn created_at_date(created_at: i64) -> Option<DateTime<Utc>> {
    if created_at == 0 {
        return None;
    }
    DateTime::from_timestamp(created_at, 0)
}

fn required_s(item: &Item, attr: &str) -> Result<String> {
    match item.get(attr) {
        Some(AttributeValue::S(value)) => Ok(value.clone()),
        Some(AttributeValue::N(_)) => Err(Error::CorruptRecord(format!(
            "attribute `{attr}` is not a string"
        ))),
        None => Err(Error::CorruptRecord(format!("missing attribute `{attr}`"))),
    }
}

fn optional_n(item: &Item, attr: &str) -> Result<i64> {
    match item.get(attr) {
        Some(AttributeValue::N(value)) => value.parse::<i64>().map_err(|err| {
            Error::CorruptRecord(format!("attribute `{attr}` is not an integer: {err}"))
        }),
        Some(AttributeValue::S(_)) => Err(Error::CorruptRecord(format!(
            "attribute `{attr}` is not a number"
        ))),
        None => Ok(0),
    }
}

fn decode_b64(attr: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|err| Error::CorruptRecord(format!("attribute `{attr}` is not base64: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SecretRecord {
        SecretRecord {
            name: "db-password".into(),
            version: Version::FIRST.padded(),
            wrapped_key: "AAEC".into(),
            ciphertext: "o8we1zr9GD+KstVv3x2YTeT2".into(),
            mac: "1e2d485cf52ec57d9db5c05eda678b45eee8d3dabcc6c1ee7c0999712026f6aa".into(),
            created_at: 1458117788,
        }
    }

    #[test]
    fn version_pads_to_fixed_width() {
        assert_eq!(Version::FIRST.padded(), "0000000000000000001");
        let max = Version::new(Version::MAX).unwrap();
        assert_eq!(max.padded(), i64::MAX.to_string());
        assert_eq!(max.padded().len(), VERSION_WIDTH);
    }

    #[test]
    fn padded_order_matches_numeric_order() {
        let mut padded: Vec<String> = [10u64, 9, 100, 2, 1]
            .iter()
            .map(|v| Version::new(*v).unwrap().padded())
            .collect();
        padded.sort();
        let parsed: Vec<u64> = padded
            .iter()
            .map(|v| Version::parse(v).unwrap().get())
            .collect();
        assert_eq!(parsed, vec![1, 2, 9, 10, 100]);
    }

    #[test]
    fn version_parse_rejects_non_numeric() {
        assert_eq!(Version::parse("1").map(Version::get), Some(1));
        assert!(Version::parse("").is_none());
        assert!(Version::parse("-1").is_none());
        assert!(Version::parse("v2").is_none());
        assert!(Version::parse("99999999999999999999").is_none());
        assert!(Version::parse("9223372036854775808").is_none());
    }

    #[test]
    fn version_above_i64_max_is_invalid() {
        assert!(matches!(
            Version::new(Version::MAX + 1),
            Err(Error::InvalidVersion { .. })
        ));
        assert!(Version::new(Version::MAX).unwrap().next().is_err());
    }

    #[test]
    fn record_maps_to_wire_attributes() {
        let item = sample_record().to_item();
        assert_eq!(item.get("name"), Some(&AttributeValue::S("db-password".into())));
        assert_eq!(
            item.get("contents"),
            Some(&AttributeValue::S("o8we1zr9GD+KstVv3x2YTeT2".into()))
        );
        assert_eq!(item.get("key"), Some(&AttributeValue::S("AAEC".into())));
        assert_eq!(
            item.get("created_at"),
            Some(&AttributeValue::N("1458117788".into()))
        );
        assert!(item.contains_key("hmac"));
        assert_eq!(SecretRecord::from_item(&item).unwrap(), sample_record());
    }

    #[test]
    fn legacy_row_without_created_at_decodes() {
        let mut item = sample_record().to_item();
        item.remove(ATTR_CREATED_AT);
        let record = SecretRecord::from_item(&item).unwrap();
        assert_eq!(record.created_at, 0);
        assert!(record.created_at_date().is_none());
    }

    #[test]
    fn missing_required_attribute_is_corrupt() {
        let mut item = sample_record().to_item();
        item.remove(ATTR_HMAC);
        let err = SecretRecord::from_item(&item).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord(_)));
    }

    #[test]
    fn listing_reports_created_at() {
        let listing = SecretListing {
            name: "a".into(),
            version: Version::FIRST.padded(),
            created_at: 0,
        };
        assert_eq!(listing.created_at_display(), CREATED_AT_NOT_AVAILABLE);

        let listing = SecretListing {
            created_at: 1458117788,
            ..listing
        };
        assert_eq!(listing.created_at_display(), "2016-03-16T08:43:08+00:00");
    }

    #[test]
    fn decrypted_secret_debug_redacts_plaintext() {
        let secret = DecryptedSecret {
            record: sample_record(),
            plaintext: b"hunter2".to_vec(),
        };
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(secret.secret(), "hunter2");
    }
}
