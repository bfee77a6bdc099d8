//! An in-process stand-in for an S3-compatible bucket store.
//!
//! Buckets can be versioned, listings are capped the way S3 caps
//! `ListObjectVersions`, and calls can be made to fail on demand.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::bail;

use crate::store::{ListPage, ObjectStore, VersionEntry};

/// S3 returns at most this many versions + delete markers per listing.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// S3 rejects `DeleteObjects` requests naming more keys than this.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
struct StoredVersion {
    key: String,
    version_id: Option<String>,
    is_delete_marker: bool,
    body: Vec<u8>,
    seq: u64,
}

impl StoredVersion {
    fn entry(&self) -> VersionEntry {
        VersionEntry::new(self.key.clone(), self.version_id.clone())
    }
}

#[derive(Debug, Default)]
struct Bucket {
    versioning: bool,
    entries: Vec<StoredVersion>,
}

impl Bucket {
    fn latest(
        &self,
        key: &str,
    ) -> Option<&StoredVersion> {
        self.entries
            .iter()
            .filter(|stored| stored.key == key)
            .max_by_key(|stored| stored.seq)
    }

    /// key ascending, newest first within a key (the S3 listing order)
    fn sorted(&self) -> Vec<&StoredVersion> {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key).then(b.seq.cmp(&a.seq)));
        sorted
    }
}

#[derive(Debug, Default)]
struct State {
    buckets: BTreeMap<String, Bucket>,
    seq: u64,
    list_calls: usize,
    delete_calls: usize,
    list_failures: BTreeSet<usize>,
    delete_failures: BTreeSet<usize>,
    keyless_records: usize,
}

impl State {
    fn bucket(
        &self,
        name: &str,
    ) -> anyhow::Result<&Bucket> {
        let Some(bucket) = self.buckets.get(name) else {
            bail!("NoSuchBucket: The specified bucket `{name}` does not exist");
        };

        Ok(bucket)
    }

    fn bucket_mut(
        &mut self,
        name: &str,
    ) -> anyhow::Result<&mut Bucket> {
        let Some(bucket) = self.buckets.get_mut(name) else {
            bail!("NoSuchBucket: The specified bucket `{name}` does not exist");
        };

        Ok(bucket)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    page_size: usize,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // nothing panics while holding the lock, a poisoned state is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_bucket(
        &self,
        bucket: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state();

        if state.buckets.contains_key(bucket) {
            bail!("BucketAlreadyOwnedByYou: `{bucket}` already exists");
        }

        state.buckets.insert(bucket.to_owned(), Bucket::default());
        Ok(())
    }

    /// Fails like S3 does while any version or delete marker remains.
    pub fn delete_bucket(
        &self,
        bucket: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state();

        if !state.bucket(bucket)?.entries.is_empty() {
            bail!("BucketNotEmpty: The bucket `{bucket}` you tried to delete is not empty");
        }

        state.buckets.remove(bucket);
        Ok(())
    }

    pub fn enable_versioning(
        &self,
        bucket: &str,
    ) -> anyhow::Result<()> {
        self.state().bucket_mut(bucket)?.versioning = true;
        Ok(())
    }

    /// Returns the new version id (`None` on an unversioned bucket).
    pub fn put_object<B: Into<Vec<u8>>>(
        &self,
        bucket: &str,
        key: &str,
        body: B,
    ) -> anyhow::Result<Option<String>> {
        let mut state = self.state();
        let seq = state.next_seq();
        let bucket = state.bucket_mut(bucket)?;

        let version_id = if bucket.versioning {
            Some(format!("{seq:016x}"))
        } else {
            bucket.entries.retain(|stored| stored.key != key);
            None
        };

        bucket.entries.push(StoredVersion {
            key: key.to_owned(),
            version_id: version_id.clone(),
            is_delete_marker: false,
            body: body.into(),
            seq,
        });

        Ok(version_id)
    }

    /// Unversioned delete: a delete marker on a versioned bucket, removal otherwise.
    pub fn delete_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        let seq = state.next_seq();
        let bucket = state.bucket_mut(bucket)?;

        if bucket.versioning {
            bucket.entries.push(StoredVersion {
                key: key.to_owned(),
                version_id: Some(format!("{seq:016x}")),
                is_delete_marker: true,
                body: Vec::new(),
                seq,
            });
        } else {
            bucket.entries.retain(|stored| stored.key != key);
        }

        Ok(())
    }

    /// `None` when the key does not exist or its latest version is a delete marker.
    pub fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let state = self.state();
        let latest = state.bucket(bucket)?.latest(key);

        Ok(latest
            .filter(|stored| !stored.is_delete_marker)
            .map(|stored| stored.body.clone()))
    }

    /// Live keys, like `ListObjects`.
    pub fn list_objects(
        &self,
        bucket: &str,
    ) -> anyhow::Result<Vec<String>> {
        let state = self.state();
        let bucket = state.bucket(bucket)?;

        let keys: BTreeSet<&str> = bucket
            .entries
            .iter()
            .map(|stored| stored.key.as_str())
            .collect();

        Ok(keys
            .into_iter()
            .filter(|key| bucket.latest(key).is_some_and(|stored| !stored.is_delete_marker))
            .map(str::to_owned)
            .collect())
    }

    /// Every version and delete marker, without a page cap. Not counted as a listing call.
    pub fn list_all_versions(
        &self,
        bucket: &str,
    ) -> anyhow::Result<ListPage> {
        let state = self.state();
        let sorted = state.bucket(bucket)?.sorted();

        Ok(split_page(sorted.into_iter(), false))
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state().delete_calls
    }

    /// Make the `index`-th (0-based) listing call fail.
    pub fn fail_list_call(
        &self,
        index: usize,
    ) {
        self.state().list_failures.insert(index);
    }

    /// Make the `index`-th (0-based) batch delete call fail.
    pub fn fail_delete_call(
        &self,
        index: usize,
    ) {
        self.state().delete_failures.insert(index);
    }

    /// The next listing starts with `count` version records lacking a key.
    /// They count towards the page cap.
    pub fn inject_keyless_records(
        &self,
        count: usize,
    ) {
        self.state().keyless_records += count;
    }
}

fn split_page<'a>(
    records: impl Iterator<Item = &'a StoredVersion>,
    truncated: bool,
) -> ListPage {
    let mut page = ListPage {
        truncated,
        ..ListPage::default()
    };

    for stored in records {
        if stored.is_delete_marker {
            page.delete_markers.push(stored.entry());
        } else {
            page.versions.push(stored.entry());
        }
    }

    page
}

impl ObjectStore for MemoryStore {
    async fn list_versions(
        &self,
        bucket: &str,
    ) -> anyhow::Result<ListPage> {
        let mut state = self.state();

        let call = state.list_calls;
        state.list_calls += 1;

        if state.list_failures.contains(&call) {
            bail!("InternalError: listing call {call} failed (injected)");
        }

        let keyless = std::mem::take(&mut state.keyless_records);
        let sorted = state.bucket(bucket)?.sorted();

        let total = keyless + sorted.len();
        let room = self.page_size.saturating_sub(keyless);
        let mut page = split_page(sorted.into_iter().take(room), total > self.page_size);

        let mut versions: Vec<_> = (0..keyless.min(self.page_size))
            .map(|_| VersionEntry::new("", None))
            .collect();
        versions.append(&mut page.versions);
        page.versions = versions;

        Ok(page)
    }

    async fn batch_delete(
        &self,
        bucket: &str,
        entries: &[VersionEntry],
    ) -> anyhow::Result<()> {
        let mut state = self.state();

        let call = state.delete_calls;
        state.delete_calls += 1;

        if state.delete_failures.contains(&call) {
            bail!("InternalError: delete call {call} failed (injected)");
        }

        let seq = state.next_seq();
        let bucket = state.bucket_mut(bucket)?;

        if entries.len() > MAX_DELETE_BATCH {
            bail!(
                "MalformedXML: {} keys exceed the limit of {MAX_DELETE_BATCH} per request",
                entries.len()
            );
        }

        if entries.iter().any(|entry| !entry.is_valid()) {
            bail!("MalformedXML: object identifier without a key");
        }

        for entry in entries {
            match (&entry.version_id, bucket.versioning) {
                (Some(version_id), _) => bucket.entries.retain(|stored| {
                    stored.key != entry.key || stored.version_id.as_ref() != Some(version_id)
                }),
                (None, true) => bucket.entries.push(StoredVersion {
                    key: entry.key.clone(),
                    version_id: Some(format!("{seq:016x}")),
                    is_delete_marker: true,
                    body: Vec::new(),
                    seq,
                }),
                (None, false) => bucket.entries.retain(|stored| stored.key != entry.key),
            }
        }

        Ok(())
    }
}
