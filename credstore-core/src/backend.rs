use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute value as understood by the record table. Only the two scalar
/// kinds the secret record uses are modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// String attribute.
    S(String),
    /// Number attribute, carried in its decimal text form.
    N(String),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value),
            Self::N(_) => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(value) => Some(value),
            Self::S(_) => None,
        }
    }
}

/// A single row in the native attribute-map representation.
pub type Item = HashMap<String, AttributeValue>;

/// Primary key of a row: `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub name: String,
    pub version: String,
}

impl ItemKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Query for every row of one partition, newest sort key first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest<'a> {
    pub name: &'a str,
    pub limit: Option<u32>,
    pub projection: Option<&'a [&'a str]>,
    pub start_key: Option<ItemKey>,
}

/// One page of results with the continuation key for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<ItemKey>,
}

/// Table creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub read_capacity: i64,
    pub write_capacity: i64,
}

/// Lifecycle status reported by the backend for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Other(String),
}

impl TableStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Key-value backend holding the secret table.
///
/// All reads are strongly consistent. Implementations report a failed
/// `put_if_absent` precondition as [`crate::Error::ConditionFailed`].
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Insert `item` unless a row with the same key already exists.
    async fn put_if_absent(&self, table: &str, item: Item) -> Result<()>;
    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>>;
    /// Query one partition in descending sort-key order.
    async fn query(&self, table: &str, request: QueryRequest<'_>) -> Result<Page>;
    /// Fetch one page of a full-table scan.
    async fn scan(
        &self,
        table: &str,
        projection: Option<&[&str]>,
        start_key: Option<ItemKey>,
    ) -> Result<Page>;
    async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<()>;
    async fn create_table(&self, spec: &TableSpec) -> Result<()>;
    async fn describe_table_status(&self, table: &str) -> Result<TableStatus>;
}

#[async_trait]
impl<T> RecordBackend for Arc<T>
where
    T: RecordBackend + ?Sized,
{
    async fn put_if_absent(&self, table: &str, item: Item) -> Result<()> {
        (**self).put_if_absent(table, item).await
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        (**self).get_item(table, key).await
    }

    async fn query(&self, table: &str, request: QueryRequest<'_>) -> Result<Page> {
        (**self).query(table, request).await
    }

    async fn scan(
        &self,
        table: &str,
        projection: Option<&[&str]>,
        start_key: Option<ItemKey>,
    ) -> Result<Page> {
        (**self).scan(table, projection, start_key).await
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<()> {
        (**self).delete_item(table, key).await
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        (**self).create_table(spec).await
    }

    async fn describe_table_status(&self, table: &str) -> Result<TableStatus> {
        (**self).describe_table_status(table).await
    }
}

#[async_trait]
impl<T> RecordBackend for Box<T>
where
    T: RecordBackend + ?Sized,
{
    async fn put_if_absent(&self, table: &str, item: Item) -> Result<()> {
        (**self).put_if_absent(table, item).await
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        (**self).get_item(table, key).await
    }

    async fn query(&self, table: &str, request: QueryRequest<'_>) -> Result<Page> {
        (**self).query(table, request).await
    }

    async fn scan(
        &self,
        table: &str,
        projection: Option<&[&str]>,
        start_key: Option<ItemKey>,
    ) -> Result<Page> {
        (**self).scan(table, projection, start_key).await
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<()> {
        (**self).delete_item(table, key).await
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        (**self).create_table(spec).await
    }

    async fn describe_table_status(&self, table: &str) -> Result<TableStatus> {
        (**self).describe_table_status(table).await
    }
}
