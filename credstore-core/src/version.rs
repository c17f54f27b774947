use crate::backend::RecordBackend;
use crate::errors::{Error, Result};
use crate::store::RecordStore;
use crate::types::{StoredRow, Version};
use std::collections::BTreeMap;
use tracing::debug;

/// Parses a version as read back from the table.
pub fn parse_stored(name: &str, value: &str) -> Result<Version> {
    Version::parse(value).ok_or_else(|| Error::CorruptVersion {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Picks the version a write should use. A non-zero request is taken as is
/// without checking whether it exists; zero means one past the highest
/// stored version, or [`Version::FIRST`] for a new name.
pub async fn resolve<B>(
    store: &RecordStore<B>,
    table: &str,
    name: &str,
    requested: u64,
) -> Result<Version>
where
    B: RecordBackend,
{
    if requested != 0 {
        return Version::new(requested);
    }

    match store.get_highest_version_number(table, name).await {
        Ok(stored) => {
            let next = parse_stored(name, &stored)?.next()?;
            debug!(name, current = %stored, next = %next, "auto-incremented version");
            Ok(next)
        }
        Err(err) if err.is_not_found() => Ok(Version::FIRST),
        Err(err) => Err(err),
    }
}

/// Reduces rows to the highest version of each name, ordered by name.
pub fn latest_filter<R: StoredRow>(rows: Vec<R>) -> Result<Vec<R>> {
    let mut latest: BTreeMap<String, (Version, R)> = BTreeMap::new();
    for row in rows {
        let version = parse_stored(row.name(), row.version())?;
        let newer = latest
            .get(row.name())
            .is_none_or(|(current, _)| *current < version);
        if newer {
            latest.insert(row.name().to_string(), (version, row));
        }
    }
    Ok(latest.into_values().map(|(_, row)| row).collect())
}

/// Orders rows by name, then by numeric version.
pub fn sort_all_versions<R: StoredRow>(rows: Vec<R>) -> Result<Vec<R>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| Ok((parse_stored(row.name(), row.version())?, row)))
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|(va, a), (vb, b)| a.name().cmp(b.name()).then(va.cmp(vb)));
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}
