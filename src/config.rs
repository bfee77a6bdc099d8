use anyhow::{Context, anyhow, bail};
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use dotenvy::from_path_iter;
use log::debug;
use resolve_path::PathResolveExt;
use std::collections::BTreeMap;
use std::env;
use std::fmt::{Debug, Display};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::helpers::StringExt;
use crate::s3_store::S3Store;

const DEFAULT_REGION: &str = "us-east-1";
/// Region to sign with when talking to a custom endpoint (R2, `MinIO`, ...).
const ENDPOINT_REGION: &str = "auto";

fn get_from_config(
    config: &BTreeMap<String, String>,
    key: &str,
) -> anyhow::Result<String> {
    config.get(key).map_or_else(
        || Err(anyhow!("Key {key} could not be found in the config.")),
        |value| Ok(value.clone()),
    )
}

pub fn get_from_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow!("Key {key} could not be found in your environment."))
}

fn read_configfile(path: &PathBuf) -> Option<BTreeMap<String, String>> {
    let iter = from_path_iter(path).ok()?;

    let mut config: BTreeMap<String, String> = BTreeMap::new();

    for item in iter {
        let (key, value) = item.ok()?;
        config.insert(key, value);
    }

    Some(config)
}

/// A settings source that has nothing to say, as opposed to one with invalid settings.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Unconfigured(String);

type Source = fn() -> anyhow::Result<Config>;

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Connection settings for the bucket to flush.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    pub bucket: Option<String>,
    pub force_path_style: bool,
}

impl Config {
    fn from_lookup(lookup: impl Fn(&str) -> anyhow::Result<String>) -> anyhow::Result<Self> {
        let config = Self {
            endpoint: lookup("S3_ENDPOINT").ok(),
            region: lookup("S3_REGION").ok(),
            access_key_id: lookup("S3_ACCESS_KEY_ID").ok(),
            secret_access_key: lookup("S3_SECRET_ACCESS_KEY").ok(),
            bucket: lookup("S3_BUCKET").ok(),
            force_path_style: lookup("S3_FORCE_PATH_STYLE").is_ok_and(|value| parse_bool(&value)),
        };

        if config.endpoint.is_none() && config.bucket.is_none() && config.access_key_id.is_none() {
            return Err(Unconfigured("No S3 settings found.".to_owned()).into());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let abs_path = path
            .try_resolve()
            .map_or_else(|_| path.to_path_buf(), std::borrow::Cow::into_owned);

        if let Some(config) = read_configfile(&abs_path) {
            Self::from_lookup(|key| get_from_config(&config, key))
        } else {
            Err(Unconfigured(format!("Invalid config file {}", abs_path.display())).into())
        }
    }

    pub fn from_filename(filename: &str) -> anyhow::Result<Self> {
        let path = Path::new(filename);
        Self::from_path(path)
    }

    /// Read .s3flush config file
    pub fn from_dot_s3flush() -> anyhow::Result<Self> {
        Self::from_filename(".s3flush")
    }

    pub fn from_global_dot_s3flush() -> anyhow::Result<Self> {
        Self::from_filename("~/.s3flush")
    }

    pub fn from_dotenv() -> anyhow::Result<Self> {
        Self::from_filename(".env")
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(get_from_env)
    }

    /// .s3flush, then .env, then environment variables, then ~/.s3flush.
    /// Without any `S3_*` settings the default AWS configuration is used.
    pub fn guess() -> anyhow::Result<Self> {
        Self::guess_from(&[
            (".s3flush", Self::from_dot_s3flush),
            (".env", Self::from_dotenv),
            ("environment", Self::from_env),
            ("~/.s3flush", Self::from_global_dot_s3flush),
        ])
    }

    fn guess_from(sources: &[(&str, Source)]) -> anyhow::Result<Self> {
        for (name, source) in sources {
            match source() {
                Ok(config) => {
                    debug!("Using S3 settings from {name}");
                    return Ok(config);
                }
                Err(err) if err.is::<Unconfigured>() => debug!("{name}: {err}"),
                Err(err) => return Err(err.context(format!("Invalid S3 settings in {name}"))),
            }
        }

        debug!("No S3_* settings found, using the default AWS configuration");
        Ok(Self::default())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(endpoint) = &self.endpoint {
            let url = Url::parse(endpoint).with_context(|| format!("Invalid S3_ENDPOINT `{endpoint}`"))?;

            if !matches!(url.scheme(), "http" | "https") {
                bail!("S3_ENDPOINT must be an http(s) url, got `{endpoint}`");
            }
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            bail!("`S3_ACCESS_KEY_ID` and `S3_SECRET_ACCESS_KEY` must be set together.");
        }

        Ok(())
    }

    pub fn bucket_or(
        &self,
        bucket: &Option<String>,
    ) -> anyhow::Result<String> {
        let Some(bucket) = bucket.as_ref().or(self.bucket.as_ref()) else {
            bail!("Bucket (`S3_BUCKET`) required for this operation.");
        };

        if bucket.is_empty() {
            bail!("Bucket name can not be empty.");
        }

        Ok(bucket.to_string())
    }

    pub fn set_bucket(
        &mut self,
        bucket: Option<String>,
    ) {
        self.bucket = bucket;
    }

    /// `None` leaves the region to the default AWS chain (`AWS_REGION`, profile, IMDS).
    pub fn region(&self) -> Option<String> {
        self.region.clone().or_else(|| {
            self.endpoint
                .as_ref()
                .map(|_| ENDPOINT_REGION.to_owned())
        })
    }

    fn static_credentials(&self) -> Option<Credentials> {
        let (Some(key_id), Some(secret)) = (&self.access_key_id, &self.secret_access_key) else {
            return None;
        };

        Some(Credentials::new(key_id, secret, None, None, "s3-flush"))
    }

    pub async fn into_s3_client(self) -> anyhow::Result<S3Client> {
        self.validate()?;

        let static_credentials = self.static_credentials();

        // the default chain is only consulted for what is not configured here
        let shared_config = if static_credentials.is_none() || self.region().is_none() {
            Some(aws_config::defaults(BehaviorVersion::latest()).load().await)
        } else {
            None
        };

        let region = resolve_region(
            self.region(),
            shared_config.as_ref().and_then(|shared| shared.region()),
        );
        debug!("Signing for region {region}");

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region)
            .force_path_style(self.force_path_style);

        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(credentials) = static_credentials {
            builder = builder.credentials_provider(credentials);
        } else if let Some(provider) = shared_config.as_ref().and_then(|shared| shared.credentials_provider()) {
            builder = builder.credentials_provider(provider.clone());
        }

        Ok(S3Client::from_conf(builder.build()))
    }

    pub async fn into_store(self) -> anyhow::Result<S3Store> {
        Ok(S3Store::new(self.into_s3_client().await?))
    }
}

impl Debug for Config {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // keep the secret out of logs
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl Display for Config {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let endpoint = self.endpoint.clone().unwrap_or_default().or("aws");
        let bucket = self.bucket.clone().unwrap_or_default().or("-");

        let region = self.region().unwrap_or_default().or("default region");

        write!(f, "`{bucket}` @ {endpoint} ({region})")
    }
}

/// Configured region first, then whatever the default chain found.
fn resolve_region(
    configured: Option<String>,
    discovered: Option<&Region>,
) -> Region {
    configured
        .map(Region::new)
        .or_else(|| discovered.cloned())
        .unwrap_or_else(|| Region::from_static(DEFAULT_REGION))
}
