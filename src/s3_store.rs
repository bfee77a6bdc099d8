use anyhow::{Context, bail};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};

use crate::store::{ListPage, ObjectStore, VersionEntry};

/// [`ObjectStore`] backed by a real S3-compatible endpoint (AWS, R2, `MinIO`, ...).
#[derive(Debug, Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    pub const fn new(client: S3Client) -> Self {
        Self { client }
    }

    pub const fn client(&self) -> &S3Client {
        &self.client
    }
}

impl From<S3Client> for S3Store {
    fn from(client: S3Client) -> Self {
        Self::new(client)
    }
}

/// A missing key becomes an empty one, which the drain filters out.
fn to_entry(
    key: Option<&str>,
    version_id: Option<&str>,
) -> VersionEntry {
    VersionEntry::new(key.unwrap_or_default(), version_id.map(str::to_owned))
}

fn to_identifier(entry: &VersionEntry) -> anyhow::Result<ObjectIdentifier> {
    ObjectIdentifier::builder()
        .key(&entry.key)
        .set_version_id(entry.version_id.clone())
        .build()
        .with_context(|| format!("building ObjectIdentifier for `{}`", entry.key))
}

impl ObjectStore for S3Store {
    async fn list_versions(
        &self,
        bucket: &str,
    ) -> anyhow::Result<ListPage> {
        // no key marker: every call sees what is left after the previous delete
        let output = self
            .client
            .list_object_versions()
            .bucket(bucket)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .with_context(|| format!("ListObjectVersions on `{bucket}`"))?;

        Ok(ListPage {
            versions: output
                .versions()
                .iter()
                .map(|version| to_entry(version.key(), version.version_id()))
                .collect(),
            delete_markers: output
                .delete_markers()
                .iter()
                .map(|marker| to_entry(marker.key(), marker.version_id()))
                .collect(),
            truncated: output.is_truncated().unwrap_or(false),
        })
    }

    async fn batch_delete(
        &self,
        bucket: &str,
        entries: &[VersionEntry],
    ) -> anyhow::Result<()> {
        let identifiers = entries
            .iter()
            .map(to_identifier)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .context("building Delete")?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(aws_sdk_s3::Error::from)
            .with_context(|| format!("DeleteObjects on `{bucket}`"))?;

        // DeleteObjects answers 200 even if some keys could not be removed
        let errors = output.errors();
        if let Some(first) = errors.first() {
            bail!(
                "DeleteObjects on `{bucket}` failed for {} of {} entries (first: `{}`: {} {})",
                errors.len(),
                entries.len(),
                first.key().unwrap_or_default(),
                first.code().unwrap_or("unknown"),
                first.message().unwrap_or("no message"),
            );
        }

        Ok(())
    }
}
