use std::future::Future;

use serde::Serialize;

/// One stored object version, or one delete marker.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionEntry {
    pub key: String,
    /// `None` for non-versioned stores.
    pub version_id: Option<String>,
}

impl VersionEntry {
    pub fn new<S: Into<String>>(
        key: S,
        version_id: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            version_id,
        }
    }

    /// Backends occasionally return records without a usable key;
    /// those must never reach a delete request.
    pub fn is_valid(&self) -> bool {
        !self.key.is_empty()
    }
}

/// One response of the version listing.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub versions: Vec<VersionEntry>,
    pub delete_markers: Vec<VersionEntry>,
    /// More entries exist beyond this page.
    pub truncated: bool,
}

impl ListPage {
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty() && self.delete_markers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.versions.len() + self.delete_markers.len()
    }
}

/// The two backend operations a bucket drain needs.
///
/// Production code binds this to [`crate::s3_store::S3Store`], tests to
/// [`crate::memory::MemoryStore`].
pub trait ObjectStore: Send + Sync {
    /// List (up to a backend-defined cap of) versions and delete markers
    /// currently in `bucket`, starting from the beginning.
    fn list_versions(
        &self,
        bucket: &str,
    ) -> impl Future<Output = anyhow::Result<ListPage>> + Send;

    /// Delete every key/version pair in `entries`. A backend reporting
    /// any per-item failure fails the call as a whole.
    fn batch_delete(
        &self,
        bucket: &str,
        entries: &[VersionEntry],
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyless_entries_are_invalid() {
        assert!(VersionEntry::new("a", None).is_valid());
        assert!(VersionEntry::new("a", Some("v1".to_owned())).is_valid());
        assert!(!VersionEntry::new("", Some("v1".to_owned())).is_valid());
    }

    #[test]
    fn page_len_counts_markers() {
        let page = ListPage {
            versions: vec![VersionEntry::new("a", None)],
            delete_markers: vec![VersionEntry::new("b", Some("2".to_owned()))],
            truncated: false,
        };

        assert_eq!(page.len(), 2);
        assert!(!page.is_empty());
        assert!(ListPage::default().is_empty());
    }
}
