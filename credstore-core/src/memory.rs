//! In-process implementations of the consumed interfaces, suitable for
//! embedding and tests.

use crate::backend::{
    AttributeValue, Item, ItemKey, Page, QueryRequest, RecordBackend, TableSpec, TableStatus,
};
use crate::context::EncryptionContext;
use crate::errors::{Error, Result};
use crate::key_provider::{DataKey, KeyManagement};
use crate::types::{ATTR_NAME, ATTR_VERSION};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use zeroize::Zeroizing;

/// How a table created through [`RecordBackend::create_table`] reaches
/// `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Active as soon as it is created.
    #[default]
    Immediate,
    /// Reports `Creating` for this many status checks, then `Active`.
    AfterPolls(usize),
    /// Stays `Creating` forever.
    Never,
}

/// Operation counters, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryCalls {
    pub puts: usize,
    pub gets: usize,
    pub queries: usize,
    pub scans: usize,
    pub deletes: usize,
    pub describes: usize,
}

#[derive(Default)]
struct MemoryTable {
    rows: BTreeMap<(String, String), Item>,
    pending_polls: Option<usize>,
}

impl MemoryTable {
    fn status(&mut self) -> TableStatus {
        match self.pending_polls.as_mut() {
            None => TableStatus::Creating,
            Some(0) => TableStatus::Active,
            Some(remaining) => {
                *remaining -= 1;
                TableStatus::Creating
            }
        }
    }
}

#[derive(Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    calls: MemoryCalls,
}

/// Simple in-memory record table.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    page_size: Option<usize>,
    activation: Activation,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create an active, empty table.
    pub fn with_table(self, table: &str) -> Self {
        self.state.lock().tables.insert(
            table.to_string(),
            MemoryTable {
                rows: BTreeMap::new(),
                pending_polls: Some(0),
            },
        );
        self
    }

    /// Cap every scan and query page at `size` rows.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size.max(1));
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn calls(&self) -> MemoryCalls {
        self.state.lock().calls
    }

    /// Number of rows currently stored in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Insert a row unconditionally, bypassing the write-once check.
    pub fn insert_raw(&self, table: &str, item: Item) -> Result<()> {
        let key = row_key(&item)?;
        let mut state = self.state.lock();
        let table = table_mut(&mut state.tables, table)?;
        table.rows.insert(key, item);
        Ok(())
    }

    fn limit(&self, requested: Option<u32>) -> Option<usize> {
        let requested = requested.map(|limit| limit as usize);
        match (requested, self.page_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn put_if_absent(&self, table: &str, item: Item) -> Result<()> {
        let key = row_key(&item)?;
        let mut state = self.state.lock();
        state.calls.puts += 1;
        let table = table_mut(&mut state.tables, table)?;
        if table.rows.contains_key(&key) {
            return Err(Error::ConditionFailed);
        }
        table.rows.insert(key, item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        let mut state = self.state.lock();
        state.calls.gets += 1;
        let table = table_mut(&mut state.tables, table)?;
        Ok(table
            .rows
            .get(&(key.name.clone(), key.version.clone()))
            .cloned())
    }

    async fn query(&self, table: &str, request: QueryRequest<'_>) -> Result<Page> {
        let limit = self.limit(request.limit);
        let mut state = self.state.lock();
        state.calls.queries += 1;
        let table = table_mut(&mut state.tables, table)?;

        let lower = (request.name.to_string(), String::new());
        let upper = match &request.start_key {
            Some(start) => Bound::Excluded((request.name.to_string(), start.version.clone())),
            None => Bound::Unbounded,
        };
        let rows = table
            .rows
            .range((Bound::Included(lower), upper))
            .rev()
            .filter(|((name, _), _)| name == request.name)
            .map(|(_, item)| item);

        Ok(paginate(rows, limit, request.projection))
    }

    async fn scan(
        &self,
        table: &str,
        projection: Option<&[&str]>,
        start_key: Option<ItemKey>,
    ) -> Result<Page> {
        let mut state = self.state.lock();
        state.calls.scans += 1;
        let table = table_mut(&mut state.tables, table)?;

        let lower = match start_key {
            Some(start) => Bound::Excluded((start.name, start.version)),
            None => Bound::Unbounded,
        };
        let rows = table
            .rows
            .range((lower, Bound::Unbounded))
            .map(|(_, item)| item);

        Ok(paginate(rows, self.page_size, projection))
    }

    async fn delete_item(&self, table: &str, key: &ItemKey) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.deletes += 1;
        let table = table_mut(&mut state.tables, table)?;
        table.rows.remove(&(key.name.clone(), key.version.clone()));
        Ok(())
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let mut state = self.state.lock();
        if state.tables.contains_key(&spec.name) {
            return Err(Error::BackendUnavailable(format!(
                "table `{}` already exists",
                spec.name
            )));
        }
        let pending_polls = match self.activation {
            Activation::Immediate => Some(0),
            Activation::AfterPolls(polls) => Some(polls),
            Activation::Never => None,
        };
        state.tables.insert(
            spec.name.clone(),
            MemoryTable {
                rows: BTreeMap::new(),
                pending_polls,
            },
        );
        Ok(())
    }

    async fn describe_table_status(&self, table: &str) -> Result<TableStatus> {
        let mut state = self.state.lock();
        state.calls.describes += 1;
        let table = table_mut(&mut state.tables, table)?;
        Ok(table.status())
    }
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, MemoryTable>,
    table: &str,
) -> Result<&'a mut MemoryTable> {
    tables
        .get_mut(table)
        .ok_or_else(|| Error::BackendUnavailable(format!("table `{table}` does not exist")))
}

fn row_key(item: &Item) -> Result<(String, String)> {
    let attr = |name: &str| {
        item.get(name)
            .and_then(AttributeValue::as_s)
            .map(str::to_string)
            .ok_or_else(|| Error::CorruptRecord(format!("missing key attribute `{name}`")))
    };
    Ok((attr(ATTR_NAME)?, attr(ATTR_VERSION)?))
}

fn paginate<'a>(
    rows: impl Iterator<Item = &'a Item>,
    limit: Option<usize>,
    projection: Option<&[&str]>,
) -> Page {
    let mut rows = rows.peekable();
    let mut page = Page::default();
    while let Some(item) = rows.next() {
        page.items.push(project(item, projection));
        if limit.is_some_and(|limit| page.items.len() >= limit) {
            if rows.peek().is_some() {
                page.last_evaluated_key = row_key(item)
                    .ok()
                    .map(|(name, version)| ItemKey::new(name, version));
            }
            break;
        }
    }
    page
}

fn project(item: &Item, projection: Option<&[&str]>) -> Item {
    match projection {
        None => item.clone(),
        Some(columns) => item
            .iter()
            .filter(|(attr, _)| columns.contains(&attr.as_str()))
            .map(|(attr, value)| (attr.clone(), value.clone()))
            .collect(),
    }
}

/// Key management stand-in. Wrapped blobs carry the key id and a digest of
/// the encryption context, and the key material masked with a master key
/// derived via SHA-256.
pub struct MemoryKeyProvider {
    master_key: [u8; 32],
    keys: RwLock<BTreeSet<String>>,
    revoked: RwLock<BTreeSet<String>>,
}

impl Default for MemoryKeyProvider {
    fn default() -> Self {
        Self::from_material(b"credstore-memory")
    }
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct the provider by hashing arbitrary input into the master key.
    pub fn from_material(input: &[u8]) -> Self {
        let digest = Sha256::digest(input);
        let mut master_key = [0u8; 32];
        master_key.copy_from_slice(&digest);
        Self {
            master_key,
            keys: RwLock::new(BTreeSet::new()),
            revoked: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn with_key(self, key_id: &str) -> Self {
        self.add_key(key_id);
        self
    }

    pub fn add_key(&self, key_id: &str) {
        self.keys.write().insert(key_id.to_string());
    }

    /// Deny every later request that uses `key_id`.
    pub fn revoke(&self, key_id: &str) {
        self.revoked.write().insert(key_id.to_string());
    }

    fn check_access(&self, key_id: &str) -> Result<()> {
        if !self.keys.read().contains(key_id) {
            return Err(Error::KeyUnavailable {
                key_id: key_id.to_string(),
                reason: "key does not exist".into(),
            });
        }
        if self.revoked.read().contains(key_id) {
            return Err(Error::AccessDenied(format!("access to `{key_id}` revoked")));
        }
        Ok(())
    }

    fn mask(&self, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .enumerate()
            .map(|(idx, byte)| byte ^ self.master_key[idx % self.master_key.len()])
            .collect()
    }
}

#[async_trait]
impl KeyManagement for MemoryKeyProvider {
    async fn generate_data_key(
        &self,
        key_id: &str,
        context: &EncryptionContext,
        size: usize,
    ) -> Result<DataKey> {
        self.check_access(key_id)?;
        let id_len = u8::try_from(key_id.len()).map_err(|_| Error::KeyUnavailable {
            key_id: key_id.to_string(),
            reason: "key id too long".into(),
        })?;

        let mut plaintext = Zeroizing::new(vec![0u8; size]);
        rand::rng().fill_bytes(&mut plaintext);

        let mut wrapped = Vec::with_capacity(1 + key_id.len() + 32 + size);
        wrapped.push(id_len);
        wrapped.extend_from_slice(key_id.as_bytes());
        wrapped.extend_from_slice(&context.digest());
        wrapped.extend(self.mask(&plaintext));

        Ok(DataKey { wrapped, plaintext })
    }

    async fn unwrap_data_key(
        &self,
        wrapped: &[u8],
        context: &EncryptionContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let invalid = || Error::ContextMismatch("invalid ciphertext".into());
        let (&id_len, rest) = wrapped.split_first().ok_or_else(invalid)?;
        let id_len = id_len as usize;
        if rest.len() < id_len + 32 {
            return Err(invalid());
        }
        let (id, rest) = rest.split_at(id_len);
        let (digest, body) = rest.split_at(32);
        let key_id = std::str::from_utf8(id).map_err(|_| invalid())?;

        self.check_access(key_id)?;
        if digest != context.digest() {
            return Err(Error::ContextMismatch(format!(
                "encryption context does not match key `{key_id}`"
            )));
        }
        Ok(Zeroizing::new(self.mask(body)))
    }
}
