//! Emptying a bucket: list versions, batch-delete them, repeat.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::store::{ListPage, ObjectStore, VersionEntry};

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("listing versions of bucket `{bucket}` failed")]
    Listing {
        bucket: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("deleting {count} entries from bucket `{bucket}` failed")]
    Delete {
        bucket: String,
        count: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl DrainError {
    pub fn bucket(&self) -> &str {
        match self {
            Self::Listing { bucket, .. } | Self::Delete { bucket, .. } => bucket,
        }
    }
}

/// What one drain removed.
#[cfg_attr(feature = "python", pyo3::pyclass(module = "s3_flush", get_all))]
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DrainReport {
    /// listing calls issued
    pub pages: usize,
    pub versions: usize,
    pub delete_markers: usize,
    /// records without a key, dropped before deleting
    pub skipped: usize,
}

impl DrainReport {
    pub const fn deleted(&self) -> usize {
        self.versions + self.delete_markers
    }
}

/// The entries of one page that can actually be deleted:
/// versions first, then delete markers.
#[derive(Debug, Default)]
struct DeleteBatch {
    entries: Vec<VersionEntry>,
    versions: usize,
    delete_markers: usize,
    skipped: usize,
}

impl DeleteBatch {
    fn from_page(page: ListPage) -> Self {
        let listed = page.len();

        let mut entries: Vec<VersionEntry> = page
            .versions
            .into_iter()
            .filter(VersionEntry::is_valid)
            .collect();
        let versions = entries.len();

        entries.extend(
            page.delete_markers
                .into_iter()
                .filter(VersionEntry::is_valid),
        );
        let delete_markers = entries.len() - versions;

        Self {
            skipped: listed - entries.len(),
            entries,
            versions,
            delete_markers,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Delete every version and delete marker in `bucket`.
///
/// Pages are processed strictly one after another: each batch delete is
/// awaited before the next listing, which always starts from the beginning
/// and therefore only sees what is left. The loop stops at the first page
/// without deletable entries, even if that page claims to be truncated.
///
/// The first failing call ends the drain and is returned; nothing is retried.
pub async fn drain<S: ObjectStore>(
    store: &S,
    bucket: &str,
) -> Result<DrainReport, DrainError> {
    let mut report = DrainReport::default();

    loop {
        let page = store.list_versions(bucket).await.map_err(|source| {
            warn!("Listing `{bucket}` failed after {} page(s): {source:#}", report.pages);

            DrainError::Listing {
                bucket: bucket.to_owned(),
                source,
            }
        })?;
        report.pages += 1;

        let more_to_fetch = page.truncated;
        let batch = DeleteBatch::from_page(page);

        if batch.skipped > 0 {
            debug!("Skipping {} record(s) without a key in `{bucket}`", batch.skipped);
            report.skipped += batch.skipped;
        }

        if batch.is_empty() {
            break;
        }

        debug!(
            "Page {}: deleting {} version(s) and {} delete marker(s) from `{bucket}`",
            report.pages, batch.versions, batch.delete_markers
        );

        store
            .batch_delete(bucket, &batch.entries)
            .await
            .map_err(|source| {
                warn!("Deleting {} entries from `{bucket}` failed: {source:#}", batch.len());

                DrainError::Delete {
                    bucket: bucket.to_owned(),
                    count: batch.len(),
                    source,
                }
            })?;

        report.versions += batch.versions;
        report.delete_markers += batch.delete_markers;

        if !more_to_fetch {
            break;
        }
    }

    info!(
        "Flushed `{bucket}`: {} version(s), {} delete marker(s) in {} page(s)",
        report.versions, report.delete_markers, report.pages
    );

    Ok(report)
}

/// Run [`drain`] on a spawned task and hand the outcome to `callback`.
///
/// `callback` is called exactly once, and never before this function has
/// returned. Must be called from within a tokio runtime. Aborting the
/// returned handle abandons the drain, possibly leaving the bucket
/// partially emptied.
pub fn flush_bucket<S, B, F>(
    store: Arc<S>,
    bucket: B,
    callback: F,
) -> JoinHandle<()>
where
    S: ObjectStore + 'static,
    B: Into<String>,
    F: FnOnce(Result<DrainReport, DrainError>) + Send + 'static,
{
    let bucket = bucket.into();

    tokio::spawn(async move {
        let outcome = drain(store.as_ref(), &bucket).await;
        callback(outcome);
    })
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::channel::oneshot;

    use super::*;
    use crate::memory::MemoryStore;

    const BUCKET: &str = "awesome-test-bucket";

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_bucket(BUCKET).unwrap();
        store
    }

    fn assert_empty(store: &MemoryStore) {
        assert!(store.list_objects(BUCKET).unwrap().is_empty());

        let all = store.list_all_versions(BUCKET).unwrap();
        assert!(all.versions.is_empty());
        assert!(all.delete_markers.is_empty());
    }

    #[tokio::test]
    async fn empty_bucket_needs_no_deletes() {
        let store = store();

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report, DrainReport { pages: 1, ..DrainReport::default() });
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test]
    async fn callback_is_not_called_synchronously() {
        let store = Arc::new(store());
        let returned = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let seen = Arc::clone(&returned);
        flush_bucket(store, BUCKET, move |outcome| {
            let _ = tx.send((seen.load(Ordering::SeqCst), outcome.is_ok()));
        });
        returned.store(true, Ordering::SeqCst);

        let (flag_at_callback, ok) = rx.await.unwrap();
        assert!(flag_at_callback);
        assert!(ok);
    }

    #[tokio::test]
    async fn callback_receives_the_error() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = oneshot::channel();

        let handle = flush_bucket(Arc::clone(&store), "missing", move |outcome| {
            let _ = tx.send(outcome);
        });
        handle.await.unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, DrainError::Listing { .. }));
        assert_eq!(err.bucket(), "missing");
    }

    #[tokio::test]
    async fn removes_an_unversioned_object() {
        let store = store();
        store.put_object(BUCKET, "test", "").unwrap();

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.versions, 1);
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.get_object(BUCKET, "test").unwrap(), None);
        assert_empty(&store);
        store.delete_bucket(BUCKET).unwrap();
    }

    #[tokio::test]
    async fn removes_versions_and_delete_markers() {
        let store = store();
        store.enable_versioning(BUCKET).unwrap();
        store.put_object(BUCKET, "test", "").unwrap();
        store.put_object(BUCKET, "test", "version2").unwrap();
        store.delete_object(BUCKET, "test").unwrap();

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.versions, 2);
        assert_eq!(report.delete_markers, 1);
        assert_empty(&store);
        store.delete_bucket(BUCKET).unwrap();
    }

    #[tokio::test]
    async fn pages_through_more_than_a_thousand_entries() {
        let store = store();
        store.enable_versioning(BUCKET).unwrap();

        for n in 0..1100 {
            store.put_object(BUCKET, &format!("{n}"), "").unwrap();
        }
        for n in 0..502 {
            store.delete_object(BUCKET, &format!("{n}")).unwrap();
        }
        assert_eq!(store.list_all_versions(BUCKET).unwrap().len(), 1602);

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.versions, 1100);
        assert_eq!(report.delete_markers, 502);
        assert_eq!(store.list_calls(), 2);
        assert_eq!(store.delete_calls(), 2);
        assert_empty(&store);
    }

    #[tokio::test]
    async fn draining_twice_is_harmless() {
        let store = store();
        store.put_object(BUCKET, "test", "").unwrap();

        drain(&store, BUCKET).await.unwrap();
        let deletes = store.delete_calls();

        let second = drain(&store, BUCKET).await.unwrap();

        assert_eq!(second.deleted(), 0);
        assert_eq!(store.delete_calls(), deletes);
    }

    #[tokio::test]
    async fn listing_failure_stops_before_deleting() {
        let store = store();
        store.put_object(BUCKET, "test", "").unwrap();
        store.fail_list_call(0);

        let err = drain(&store, BUCKET).await.unwrap_err();

        assert!(matches!(err, DrainError::Listing { .. }));
        assert!(err.source().is_some());
        assert_eq!(store.delete_calls(), 0);
        assert!(store.get_object(BUCKET, "test").unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_failure_stops_listing() {
        let store = MemoryStore::with_page_size(2);
        store.create_bucket(BUCKET).unwrap();
        for key in ["a", "b", "c"] {
            store.put_object(BUCKET, key, "").unwrap();
        }
        store.fail_delete_call(0);

        let err = drain(&store, BUCKET).await.unwrap_err();

        match err {
            DrainError::Delete { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.list_objects(BUCKET).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn keyless_records_are_never_deleted() {
        let store = store();
        store.put_object(BUCKET, "test", "").unwrap();
        store.inject_keyless_records(3);

        // the memory store rejects the whole batch if a keyless entry slips through
        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.skipped, 3);
        assert_eq!(report.versions, 1);
        assert_empty(&store);
    }

    #[tokio::test]
    async fn page_of_only_keyless_records_ends_the_drain() {
        let store = MemoryStore::with_page_size(2);
        store.create_bucket(BUCKET).unwrap();
        store.put_object(BUCKET, "test", "").unwrap();
        store.inject_keyless_records(2);

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.pages, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(store.delete_calls(), 0);
        assert_eq!(store.list_objects(BUCKET).unwrap(), vec!["test".to_owned()]);
    }

    /// Always answers with the same page, no matter what was deleted.
    #[derive(Default)]
    struct FixedPageStore {
        page: ListPage,
        lists: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl ObjectStore for FixedPageStore {
        async fn list_versions(
            &self,
            _bucket: &str,
        ) -> anyhow::Result<ListPage> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(self.page.clone())
        }

        async fn batch_delete(
            &self,
            _bucket: &str,
            _entries: &[VersionEntry],
        ) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn last_page_ends_the_drain() {
        let store = FixedPageStore {
            page: ListPage {
                versions: vec![VersionEntry::new("still-there", Some("1".to_owned()))],
                delete_markers: vec![],
                truncated: false,
            },
            ..FixedPageStore::default()
        };

        let report = drain(&store, BUCKET).await.unwrap();

        assert_eq!(report.pages, 1);
        assert_eq!(report.versions, 1);
        assert_eq!(store.lists.load(Ordering::SeqCst), 1);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_page_is_followed_by_another_listing() {
        let store = MemoryStore::with_page_size(1);
        store.create_bucket(BUCKET).unwrap();
        for key in ["a", "b", "c"] {
            store.put_object(BUCKET, key, "").unwrap();
        }

        let report = drain(&store, BUCKET).await.unwrap();

        // two truncated pages, then a final one; no trailing empty listing
        assert_eq!(report.pages, 3);
        assert_eq!(store.list_calls(), 3);
        assert_eq!(store.delete_calls(), 3);
        assert_empty(&store);
    }

    #[test]
    fn batch_keeps_versions_before_markers() {
        let page = ListPage {
            versions: vec![VersionEntry::new("b", None), VersionEntry::new("", None)],
            delete_markers: vec![VersionEntry::new("a", Some("1".to_owned()))],
            truncated: true,
        };

        let batch = DeleteBatch::from_page(page);

        assert_eq!(batch.entries, vec![
            VersionEntry::new("b", None),
            VersionEntry::new("a", Some("1".to_owned())),
        ]);
        assert_eq!((batch.versions, batch.delete_markers, batch.skipped), (1, 1, 1));
    }
}
