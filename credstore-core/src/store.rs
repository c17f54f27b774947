use crate::backend::{AttributeValue, Item, ItemKey, QueryRequest, RecordBackend};
use crate::errors::{Error, Result};
use crate::types::{ATTR_VERSION, SecretRecord, StoredRow};
use crate::version::{latest_filter, sort_all_versions};
use tracing::{debug, info, warn};

const VERSION_ONLY: &[&str] = &[ATTR_VERSION];

/// Typed access to the secret table on top of a [`RecordBackend`].
pub struct RecordStore<B> {
    backend: B,
}

impl<B> RecordStore<B>
where
    B: RecordBackend,
{
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Inserts a record; an existing row at the same key is never replaced.
    pub async fn put(&self, table: &str, record: &SecretRecord) -> Result<()> {
        match self.backend.put_if_absent(table, record.to_item()).await {
            Ok(()) => {
                debug!(table, name = %record.name, version = %record.version, "stored record");
                Ok(())
            }
            Err(Error::ConditionFailed) => Err(Error::VersionConflict {
                name: record.name.clone(),
                version: record.version.clone(),
            }),
            Err(err) => Err(err),
        }
    }

    pub async fn get_exact(&self, table: &str, name: &str, version: &str) -> Result<SecretRecord> {
        let key = ItemKey::new(name, version);
        match self.backend.get_item(table, &key).await? {
            Some(item) => SecretRecord::from_item(&item),
            None => Err(Error::not_found(name, Some(version))),
        }
    }

    pub async fn get_highest(&self, table: &str, name: &str) -> Result<SecretRecord> {
        let item = self.newest(table, name, SecretRecord::PROJECTION).await?;
        SecretRecord::from_item(&item)
    }

    /// Highest stored version string for `name`, as written.
    pub async fn get_highest_version_number(&self, table: &str, name: &str) -> Result<String> {
        let item = self.newest(table, name, Some(VERSION_ONLY)).await?;
        version_of(&item)
    }

    /// Reads the whole table page by page. Unless `all_versions` is set only
    /// the newest version of each name is kept.
    pub async fn scan_all<R: StoredRow>(&self, table: &str, all_versions: bool) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        let mut start_key = None;
        let mut pages = 0usize;

        loop {
            let page = self.backend.scan(table, R::PROJECTION, start_key).await?;
            pages += 1;
            for item in &page.items {
                rows.push(R::from_item(item)?);
            }
            start_key = page.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }
        debug!(table, pages, rows = rows.len(), "scanned table");

        if all_versions {
            sort_all_versions(rows)
        } else {
            latest_filter(rows)
        }
    }

    /// Every stored version of `name`, newest first.
    pub async fn query_versions(&self, table: &str, name: &str) -> Result<Vec<String>> {
        let mut versions = Vec::new();
        let mut start_key = None;

        loop {
            let request = QueryRequest {
                name,
                limit: None,
                projection: Some(VERSION_ONLY),
                start_key,
            };
            let page = self.backend.query(table, request).await?;
            for item in &page.items {
                versions.push(version_of(item)?);
            }
            start_key = page.last_evaluated_key;
            if start_key.is_none() {
                break;
            }
        }

        Ok(versions)
    }

    /// Deletes every version of `name`, newest first, and returns the
    /// versions removed. Stops at the first failed delete; rows already
    /// removed stay removed.
    pub async fn delete_all(&self, table: &str, name: &str) -> Result<Vec<String>> {
        let versions = self.query_versions(table, name).await?;
        if versions.is_empty() {
            warn!(table, name, "no versions found to delete");
            return Ok(Vec::new());
        }

        let mut deleted = Vec::with_capacity(versions.len());
        for version in versions {
            let key = ItemKey::new(name, version.as_str());
            if let Err(err) = self.backend.delete_item(table, &key).await {
                if deleted.is_empty() {
                    return Err(err);
                }
                return Err(Error::PartialDelete {
                    name: name.to_string(),
                    deleted,
                    source: Box::new(err),
                });
            }
            info!(table, name, version = %version, "deleted secret version");
            deleted.push(version);
        }

        Ok(deleted)
    }

    async fn newest(
        &self,
        table: &str,
        name: &str,
        projection: Option<&[&str]>,
    ) -> Result<Item> {
        let request = QueryRequest {
            name,
            limit: Some(1),
            projection,
            start_key: None,
        };
        let page = self.backend.query(table, request).await?;
        page.items
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(name, None))
    }
}

fn version_of(item: &Item) -> Result<String> {
    item.get(ATTR_VERSION)
        .and_then(AttributeValue::as_s)
        .map(str::to_string)
        .ok_or_else(|| Error::CorruptRecord(format!("missing attribute `{ATTR_VERSION}`")))
}
