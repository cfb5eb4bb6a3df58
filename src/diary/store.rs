//! Durable per-user ledger storage.
//!
//! Each [`UserScope`] owns two JSON files under the store root:
//! `<key>.entries.json` (the ledger, source of truth) and
//! `<key>.aggregates.json` (per-day totals, a read cache rebuilt after
//! every write). Files are replaced by writing a temp file and renaming it.

use crate::diary::aggregate::{aggregate, aggregate_all};
use crate::diary::data::{validate_date, DailyAggregate, LedgerEntry, UserScope};
use crate::error::{FitError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Per-user ledger files with in-process write serialization.
pub struct LedgerStore {
    root: PathBuf,
    locks: Mutex<HashMap<UserScope, Arc<tokio::sync::Mutex<()>>>>,
}

impl LedgerStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries_path(&self, scope: &UserScope) -> PathBuf {
        self.root.join(format!("{}.entries.json", scope.storage_key()))
    }

    pub fn aggregates_path(&self, scope: &UserScope) -> PathBuf {
        self.root.join(format!("{}.aggregates.json", scope.storage_key()))
    }

    fn scope_lock(&self, scope: &UserScope) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds an idle lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(scope.clone()).or_default())
    }

    /// Append `entry` to the scope's ledger and refresh the aggregate cache.
    ///
    /// An unreadable ledger is treated as empty once its content has been
    /// kept aside as `*.corrupt-<timestamp>`. If it cannot be kept aside the
    /// append is refused. Write failures are returned.
    /// Returns the updated aggregate for the entry's date.
    pub async fn append(&self, scope: &UserScope, entry: LedgerEntry) -> Result<DailyAggregate> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let entries_path = self.entries_path(scope);
        let mut entries: Vec<LedgerEntry> = read_for_rewrite(&entries_path).await?;
        let date = entry.date().to_string();
        entries.push(entry);
        write_collection(&entries_path, &entries).await?;

        let aggregates = aggregate_all(&entries);
        write_collection(&self.aggregates_path(scope), &aggregates).await?;
        debug!(
            "Appended entry for {} on {} ({} entries, {} days)",
            scope,
            date,
            entries.len(),
            aggregates.len()
        );

        Ok(aggregate(&entries, &date))
    }

    /// The scope's full ledger, in insertion order.
    pub async fn entries(&self, scope: &UserScope) -> Vec<LedgerEntry> {
        read_collection(&self.entries_path(scope)).await
    }

    /// Entries logged on `date`.
    pub async fn entries_for_date(&self, scope: &UserScope, date: &str) -> Vec<LedgerEntry> {
        self.entries(scope)
            .await
            .into_iter()
            .filter(|entry| entry.date() == date)
            .collect()
    }

    /// Cached aggregate for `date`, if that date has entries.
    pub async fn aggregate_for_date(&self, scope: &UserScope, date: &str) -> Option<DailyAggregate> {
        self.all_aggregates(scope)
            .await
            .into_iter()
            .find(|aggregate| aggregate.date == date)
    }

    /// Every cached aggregate, ordered by date.
    pub async fn all_aggregates(&self, scope: &UserScope) -> Vec<DailyAggregate> {
        read_collection(&self.aggregates_path(scope)).await
    }

    /// Cached aggregates with `from <= date <= to`.
    pub async fn aggregate_range(
        &self,
        scope: &UserScope,
        from: &str,
        to: &str,
    ) -> Result<Vec<DailyAggregate>> {
        let from = validate_date(from)?;
        let to = validate_date(to)?;
        if from > to {
            return Err(FitError::validation_error(format!(
                "Range start {} is after end {}",
                from, to
            )));
        }

        Ok(self
            .all_aggregates(scope)
            .await
            .into_iter()
            .filter(|aggregate| match validate_date(&aggregate.date) {
                Ok(date) => from <= date && date <= to,
                Err(_) => false,
            })
            .collect())
    }

    /// Recompute the aggregate cache from the ledger and write it back.
    pub async fn rebuild_aggregates(&self, scope: &UserScope) -> Result<Vec<DailyAggregate>> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock().await;

        let entries: Vec<LedgerEntry> = read_collection(&self.entries_path(scope)).await;
        let aggregates = aggregate_all(&entries);
        write_collection(&self.aggregates_path(scope), &aggregates).await?;
        info!("Rebuilt {} daily aggregates for {}", aggregates.len(), scope);
        Ok(aggregates)
    }
}

/// Read a JSON array, degrading to empty on a missing or unreadable file.
async fn read_collection<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!("Cannot read {}, treating as empty: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(items) => items,
        Err(e) => {
            warn!("Corrupt ledger file {}, treating as empty: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Read a collection that is about to be replaced.
///
/// Content that cannot be read or parsed is copied aside first; when even
/// that fails the caller gets an error instead of an empty collection.
async fn read_for_rewrite<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            error!("Cannot read {} before rewriting it: {}", path.display(), e);
            let backup = backup_path(path);
            tokio::fs::copy(path, &backup)
                .await
                .map_err(|_| FitError::persistence_error(path, e))?;
            warn!("Kept unreadable ledger as {}", backup.display());
            return Ok(Vec::new());
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(items) => Ok(items),
        Err(e) => {
            warn!("Corrupt ledger file {}, treating as empty: {}", path.display(), e);
            let backup = backup_path(path);
            tokio::fs::write(&backup, &bytes)
                .await
                .map_err(|e| FitError::persistence_error(&backup, e))?;
            warn!("Kept unreadable ledger as {}", backup.display());
            Ok(Vec::new())
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    PathBuf::from(format!("{}.corrupt-{}", path.display(), stamp))
}

/// Replace `path` with `items` as pretty JSON via temp file + rename.
async fn write_collection<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FitError::persistence_error(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(items)?;
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| FitError::persistence_error(&tmp, e))?;
    file.write_all(&json)
        .await
        .map_err(|e| FitError::persistence_error(&tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| FitError::persistence_error(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| FitError::persistence_error(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::data::Nutrients;

    fn entry(date: &str, calories: f64, protein: f64, fat: f64, carbs: f64) -> LedgerEntry {
        LedgerEntry::builder(date, "meal")
            .nutrients(Nutrients::new(calories, protein, fat, carbs))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();

        store.append(&scope, entry("2024-01-10", 300.0, 10.0, 5.0, 40.0)).await.unwrap();
        let day = store
            .append(&scope, entry("2024-01-10", 200.0, 5.0, 2.0, 30.0))
            .await
            .unwrap();
        assert_eq!(day.totals, Nutrients::new(500.0, 15.0, 7.0, 70.0));

        let cached = store.aggregate_for_date(&scope, "2024-01-10").await.unwrap();
        assert_eq!(cached, day);
        assert_eq!(store.entries_for_date(&scope, "2024-01-10").await.len(), 2);
        assert!(store.aggregate_for_date(&scope, "2024-01-11").await.is_none());
    }

    #[tokio::test]
    async fn test_missing_files_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("not-yet-created"));
        let scope = UserScope::new("nobody").unwrap();

        assert!(store.entries(&scope).await.is_empty());
        assert!(store.all_aggregates(&scope).await.is_empty());
        assert!(store.aggregate_for_date(&scope, "2024-01-10").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_reads_empty_and_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();
        std::fs::write(store.entries_path(&scope), b"{ not json").unwrap();

        assert!(store.entries(&scope).await.is_empty());

        store.append(&scope, entry("2024-01-10", 100.0, 1.0, 1.0, 1.0)).await.unwrap();
        assert_eq!(store.entries(&scope).await.len(), 1);

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read(backups[0].path()).unwrap(), b"{ not json");
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let alice = UserScope::new("alice").unwrap();
        let bob = UserScope::new("bob").unwrap();

        store.append(&alice, entry("2024-01-10", 300.0, 0.0, 0.0, 0.0)).await.unwrap();
        assert!(store.entries(&bob).await.is_empty());
        assert!(store.aggregate_for_date(&bob, "2024-01-10").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LedgerStore::new(dir.path()));
        let scope = UserScope::new("user-1").unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let scope = scope.clone();
            handles.push(tokio::spawn(async move {
                store.append(&scope, entry("2024-01-10", i as f64, 0.0, 0.0, 0.0)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.entries(&scope).await.len(), 20);
        let day = store.aggregate_for_date(&scope, "2024-01-10").await.unwrap();
        assert_eq!(day.entry_count, 20);
        assert_eq!(day.totals.calories, (0..20).sum::<i32>() as f64);
    }

    #[tokio::test]
    async fn test_rebuild_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();
        for day in ["2024-01-09", "2024-01-10", "2024-01-12"] {
            store.append(&scope, entry(day, 100.0, 0.0, 0.0, 0.0)).await.unwrap();
        }

        std::fs::remove_file(store.aggregates_path(&scope)).unwrap();
        assert!(store.all_aggregates(&scope).await.is_empty());

        let rebuilt = store.rebuild_aggregates(&scope).await.unwrap();
        assert_eq!(rebuilt.len(), 3);

        let range = store.aggregate_range(&scope, "2024-01-10", "2024-01-12").await.unwrap();
        let dates: Vec<_> = range.iter().map(|a| a.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-01-10", "2024-01-12"]);

        assert!(store.aggregate_range(&scope, "2024-01-12", "2024-01-10").await.is_err());
    }

    #[tokio::test]
    async fn test_fractional_quantities_survive_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();

        let appended = vec![
            entry("2024-03-01", 120.47295739550161, 0.1 + 0.2, 1.0 / 3.0, 2.0 / 7.0),
            entry("2024-03-01", 98.76543210987654, 7.0 / 9.0, 0.30000000000000004, 13.0 / 11.0),
            entry("2024-03-01", 1e-7 / 3.0, 5.551115123125783e-17, 123456.78901234567, 0.7071067811865476),
        ];
        for item in &appended {
            store.append(&scope, item.clone()).await.unwrap();
        }

        let stored = store.entries(&scope).await;
        assert_eq!(stored, appended);
        assert_eq!(
            store.aggregate_for_date(&scope, "2024-03-01").await,
            Some(aggregate(&appended, "2024-03-01"))
        );
    }

    #[tokio::test]
    async fn test_corrupt_aggregates_read_empty_until_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();
        store.append(&scope, entry("2024-01-10", 250.0, 4.0, 3.0, 20.0)).await.unwrap();
        std::fs::write(store.aggregates_path(&scope), b"[{\"date\": ").unwrap();

        assert!(store.all_aggregates(&scope).await.is_empty());
        assert!(store.aggregate_for_date(&scope, "2024-01-10").await.is_none());
        assert_eq!(store.entries(&scope).await.len(), 1);

        let rebuilt = store.rebuild_aggregates(&scope).await.unwrap();
        assert_eq!(rebuilt.len(), 1);
        let day = store.aggregate_for_date(&scope, "2024-01-10").await.unwrap();
        assert_eq!(day.totals, Nutrients::new(250.0, 4.0, 3.0, 20.0));
    }

    #[tokio::test]
    async fn test_unreadable_ledger_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        let scope = UserScope::new("user-1").unwrap();
        // A directory where the ledger file should be cannot be read or copied.
        let entries_path = store.entries_path(&scope);
        std::fs::create_dir(&entries_path).unwrap();
        std::fs::write(entries_path.join("keep"), b"data").unwrap();

        assert!(store.entries(&scope).await.is_empty());

        let result = store.append(&scope, entry("2024-01-10", 1.0, 0.0, 0.0, 0.0)).await;
        assert!(matches!(result, Err(FitError::Persistence { .. })));
        assert_eq!(std::fs::read(entries_path.join("keep")).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_idle_scope_locks_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path());
        for user in ["a", "b", "c", "d"] {
            let scope = UserScope::new(user).unwrap();
            store.append(&scope, entry("2024-01-10", 1.0, 0.0, 0.0, 0.0)).await.unwrap();
        }

        assert_eq!(store.locks.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        // Root is a regular file, so no ledger can be created beneath it.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let store = LedgerStore::new(&blocker);
        let scope = UserScope::new("user-1").unwrap();

        let result = store.append(&scope, entry("2024-01-10", 1.0, 0.0, 0.0, 0.0)).await;
        assert!(matches!(result, Err(FitError::Persistence { .. })));
    }
}
