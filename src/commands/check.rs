use anyhow::Context;

use crate::cli::{CheckOptions, Process};
use crate::config::Config;
use crate::store::{ObjectStore, VersionEntry};

/// Number of deletable entries on the first listing page, and whether more follow.
pub async fn remaining<S: ObjectStore>(
    store: &S,
    bucket: &str,
) -> anyhow::Result<(usize, bool)> {
    let page = store
        .list_versions(bucket)
        .await
        .with_context(|| format!("listing versions of bucket `{bucket}` failed"))?;

    let count = page
        .versions
        .iter()
        .chain(&page.delete_markers)
        .filter(|entry| VersionEntry::is_valid(entry))
        .count();

    Ok((count, page.truncated))
}

impl Process for CheckOptions {
    async fn process(self) -> anyhow::Result<i32> {
        let config = Config::guess()?;
        let bucket = config.bucket_or(&self.bucket)?;

        let store = config.into_store().await?;

        match remaining(&store, &bucket).await? {
            (0, _) => {
                println!("Bucket `{bucket}` is empty.");
                Ok(0)
            }
            (count, truncated) => {
                let more = if truncated { "+" } else { "" };
                println!("Bucket `{bucket}` still holds {count}{more} versions and/or delete markers.");
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::drain;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn counts_versions_and_markers() {
        let store = MemoryStore::with_page_size(2);
        store.create_bucket("b").unwrap();
        store.enable_versioning("b").unwrap();
        store.put_object("b", "a", "").unwrap();
        store.put_object("b", "a", "").unwrap();
        store.delete_object("b", "a").unwrap();

        assert_eq!(remaining(&store, "b").await.unwrap(), (2, true));

        drain(&store, "b").await.unwrap();

        assert_eq!(remaining(&store, "b").await.unwrap(), (0, false));
    }

    #[tokio::test]
    async fn keyless_records_do_not_count() {
        let store = MemoryStore::new();
        store.create_bucket("b").unwrap();
        store.inject_keyless_records(1);

        assert_eq!(remaining(&store, "b").await.unwrap(), (0, false));
    }
}
