use credstore_core::{
    Credstore, EncryptionContext, Error, MemoryBackend, MemoryKeyProvider, Version,
};
use std::sync::Arc;

const TABLE: &str = "credential-store";
const ALIAS: &str = "alias/credstash";

struct Harness {
    store: Credstore<Arc<MemoryBackend>, Arc<MemoryKeyProvider>>,
    backend: Arc<MemoryBackend>,
    keys: Arc<MemoryKeyProvider>,
}

fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new().with_table(TABLE));
    let keys = Arc::new(MemoryKeyProvider::new().with_key(ALIAS));
    Harness {
        store: Credstore::new(backend.clone(), keys.clone()),
        backend,
        keys,
    }
}

fn ctx() -> EncryptionContext {
    EncryptionContext::new().with("env", "test")
}

#[tokio::test]
async fn auto_increment_pads_versions() {
    let h = harness();
    let first = h
        .store
        .put_secret(TABLE, ALIAS, "db", b"one", 0, &ctx())
        .await
        .unwrap();
    let second = h
        .store
        .put_secret(TABLE, ALIAS, "db", b"two", 0, &ctx())
        .await
        .unwrap();
    assert_eq!(first.padded(), "0000000000000000001");
    assert_eq!(second.padded(), "0000000000000000002");

    let latest = h.store.get_highest_secret(TABLE, "db", &ctx()).await.unwrap();
    assert_eq!(latest.secret(), "two");
    let old = h
        .store
        .get_secret(TABLE, "db", first, &ctx())
        .await
        .unwrap();
    assert_eq!(old.secret(), "one");
}

#[tokio::test]
async fn explicit_version_is_write_once() {
    let h = harness();
    let version = 4;
    h.store
        .put_secret(TABLE, ALIAS, "api", b"original", version, &ctx())
        .await
        .unwrap();

    let err = h
        .store
        .put_secret(TABLE, ALIAS, "api", b"replacement", version, &ctx())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::VersionConflict {
            name: "api".into(),
            version: "0000000000000000004".into(),
        }
    );

    let stored = h
        .store
        .get_secret(TABLE, "api", Version::new(version).unwrap(), &ctx())
        .await
        .unwrap();
    assert_eq!(stored.secret(), "original");
}

#[tokio::test]
async fn version_above_signed_range_is_rejected() {
    let h = harness();
    let err = h
        .store
        .put_secret(TABLE, ALIAS, "db", b"x", u64::MAX, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidVersion { .. }));
    assert!(h.backend.is_empty(TABLE));
}

#[tokio::test]
async fn list_returns_latest_per_name() {
    let h = harness();
    for (name, version) in [("a", 1), ("a", 2), ("a", 5), ("b", 1)] {
        h.store
            .put_secret(TABLE, ALIAS, name, b"v", version, &ctx())
            .await
            .unwrap();
    }

    let latest = h.store.list_secrets(TABLE, false).await.unwrap();
    let got: Vec<_> = latest
        .iter()
        .map(|l| format!("{}:{}", l.name, l.version))
        .collect();
    assert_eq!(got, ["a:0000000000000000005", "b:0000000000000000001"]);
    assert!(latest.iter().all(|l| l.created_at > 0));

    let all = h.store.list_secrets(TABLE, true).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].version, "0000000000000000001");
    assert_eq!(all[3].name, "b");
}

#[tokio::test]
async fn get_all_skips_records_with_mismatched_context() {
    let h = harness();
    let other = EncryptionContext::new().with("env", "other");
    h.store
        .put_secret(TABLE, ALIAS, "a", b"alpha", 0, &ctx())
        .await
        .unwrap();
    h.store
        .put_secret(TABLE, ALIAS, "b", b"bravo", 0, &other)
        .await
        .unwrap();
    h.store
        .put_secret(TABLE, ALIAS, "c", b"charlie", 0, &ctx())
        .await
        .unwrap();

    let secrets = h.store.get_all_secrets(TABLE, false, &ctx()).await.unwrap();
    let names: Vec<_> = secrets.iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, ["a", "c"]);
    assert_eq!(secrets[1].secret(), "charlie");
}

#[tokio::test]
async fn get_all_skips_records_under_revoked_key() {
    let h = harness();
    h.keys.add_key("alias/legacy");
    h.store
        .put_secret(TABLE, "alias/legacy", "old", b"x", 0, &ctx())
        .await
        .unwrap();
    h.store
        .put_secret(TABLE, ALIAS, "new", b"y", 0, &ctx())
        .await
        .unwrap();
    h.keys.revoke("alias/legacy");

    let err = h
        .store
        .get_highest_secret(TABLE, "old", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));

    let secrets = h.store.get_all_secrets(TABLE, false, &ctx()).await.unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].name(), "new");
}

#[tokio::test]
async fn get_all_aborts_on_integrity_failure() {
    let h = harness();
    let version = h
        .store
        .put_secret(TABLE, ALIAS, "db", b"secret", 0, &ctx())
        .await
        .unwrap();

    let mut record = h
        .store
        .store()
        .get_exact(TABLE, "db", &version.padded())
        .await
        .unwrap();
    record.name = "db-copy".into();
    record.mac = "0".repeat(64);
    h.backend.insert_raw(TABLE, record.to_item()).unwrap();

    let err = h
        .store
        .get_all_secrets(TABLE, false, &ctx())
        .await
        .unwrap_err();
    assert_eq!(err, Error::IntegrityCheckFailed);
}

#[tokio::test]
async fn delete_removes_all_versions() {
    let h = harness();
    for _ in 0..3 {
        h.store
            .put_secret(TABLE, ALIAS, "db", b"v", 0, &ctx())
            .await
            .unwrap();
    }
    h.store
        .put_secret(TABLE, ALIAS, "web", b"w", 0, &ctx())
        .await
        .unwrap();

    let deleted = h.store.delete_secret(TABLE, "db").await.unwrap();
    assert_eq!(deleted.len(), 3);
    assert_eq!(deleted[0], "0000000000000000003");

    let err = h
        .store
        .get_highest_secret(TABLE, "db", &ctx())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.backend.len(TABLE), 1);

    assert!(h.store.delete_secret(TABLE, "db").await.unwrap().is_empty());
    let next = h.store.resolve_version(TABLE, "db", 0).await.unwrap();
    assert_eq!(next, Version::FIRST);
}
