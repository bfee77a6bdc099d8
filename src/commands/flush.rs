use anyhow::bail;
use log::{debug, info};
use tabled::Tabled;

use crate::cli::{FlushOptions, Process};
use crate::config::Config;
use crate::drain::{DrainReport, drain};
use crate::helpers::print_table;
use crate::store::ObjectStore;

#[derive(Tabled)]
pub struct FlushTable {
    bucket_name: String,
    versions: usize,
    delete_markers: usize,
    skipped: usize,
    pages: usize,
}

impl FlushTable {
    pub fn new<S: Into<String>>(
        name: S,
        report: &DrainReport,
    ) -> Self {
        Self {
            bucket_name: name.into(),
            versions: report.versions,
            delete_markers: report.delete_markers,
            skipped: report.skipped,
            pages: report.pages,
        }
    }
}

pub fn render_report(
    bucket: &str,
    report: &DrainReport,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_table(&[FlushTable::new(bucket, report)]);
    }

    Ok(())
}

/// Drain `bucket` and print what was removed.
pub async fn flush<S: ObjectStore>(
    store: &S,
    bucket: &str,
    json: bool,
) -> anyhow::Result<DrainReport> {
    let report = drain(store, bucket).await?;

    render_report(bucket, &report, json)?;

    Ok(report)
}

impl Process for FlushOptions {
    async fn process(self) -> anyhow::Result<i32> {
        let mut config = Config::guess()?;

        if self.bucket.is_some() {
            config.set_bucket(self.bucket);
        }

        let bucket = config.bucket_or(&None)?;

        if !self.yes {
            bail!(
                "Refusing to flush {config} without `--yes`: every object, version and delete marker would be deleted."
            );
        }

        info!("Flushing {config}");
        debug!("Using {config:?}");

        let store = config.into_store().await?;
        flush(&store, &bucket, self.json).await?;

        eprintln!("Bucket `{bucket}` is empty and can now be deleted.");

        Ok(0)
    }
}
