use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr};
use thiserror::Error;

use crate::services::{
    ingest::IngestConfig,
    strategy::{DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE, MAX_PART_SIZE, MIN_PART_SIZE},
};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
const DEFAULT_MEMORY_BUCKET: &str = "omniload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Any S3-compatible endpoint.
    S3,
    /// Keep objects in process memory (development only).
    Memory,
}

#[derive(Debug, Error)]
#[error("unknown storage backend `{0}` (expected s3 or memory)")]
pub struct UnknownBackend(String);

impl FromStr for StorageBackend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true).map_err(|_| UnknownBackend(s.to_string()))
    }
}

/// Object-store connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    /// Prefix of public object URLs.
    pub public_base_url: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Where request bodies are buffered while they are hashed.
    pub spool_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub storage: StorageConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content-addressed upload gateway")]
pub struct Args {
    /// Host to bind to (overrides OMNILOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OMNILOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides OMNILOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for buffering uploads (overrides OMNILOAD_SPOOL_DIR)
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes (overrides OMNILOAD_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Object store backend (overrides OMNILOAD_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StorageBackend>,

    /// S3 endpoint URL (overrides B2_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// S3 region (overrides B2_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Bucket name (overrides B2_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Public URL prefix for stored objects (overrides OMNILOAD_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Uploads above this many bytes use multipart (overrides OMNILOAD_MULTIPART_THRESHOLD)
    #[arg(long)]
    pub multipart_threshold: Option<u64>,

    /// Multipart part size in bytes (overrides OMNILOAD_PART_SIZE)
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Parse `name` from the environment, falling back to `default` when unset.
fn env_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        dotenvy::dotenv().ok();
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values read through `lookup`.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<(Self, bool)>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Environment fallback ---
        let env_host = lookup("OMNILOAD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = env_or(&lookup, "OMNILOAD_PORT", 5000u16)?;
        let env_db = lookup("OMNILOAD_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/metadata.db".into());
        let env_spool = lookup("OMNILOAD_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let env_max_upload = env_or(&lookup, "OMNILOAD_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let env_threshold = env_or(
            &lookup,
            "OMNILOAD_MULTIPART_THRESHOLD",
            DEFAULT_MULTIPART_THRESHOLD,
        )?;
        let env_part_size = env_or(&lookup, "OMNILOAD_PART_SIZE", DEFAULT_PART_SIZE)?;
        let env_backend = env_or(&lookup, "OMNILOAD_STORAGE_BACKEND", StorageBackend::S3)?;

        // --- Merge ---
        let backend = args.backend.unwrap_or(env_backend);
        let endpoint = args.endpoint.or_else(|| lookup("B2_ENDPOINT"));
        let region = args
            .region
            .or_else(|| lookup("B2_REGION"))
            .unwrap_or_else(|| "us-east-1".into());
        let bucket = match (args.bucket.or_else(|| lookup("B2_BUCKET")), backend) {
            (Some(bucket), _) => bucket,
            (None, StorageBackend::Memory) => DEFAULT_MEMORY_BUCKET.into(),
            (None, StorageBackend::S3) => {
                bail!("a bucket is required for the s3 backend (set B2_BUCKET or --bucket)")
            }
        };
        let public_base_url = args
            .public_base_url
            .or_else(|| lookup("OMNILOAD_PUBLIC_BASE_URL"))
            .unwrap_or_else(|| default_public_base_url(backend, endpoint.as_deref(), &region, &bucket));

        let part_size = args.part_size.unwrap_or(env_part_size);
        if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&part_size) {
            bail!(
                "part size {} is outside the accepted range {}..={} bytes",
                part_size,
                MIN_PART_SIZE,
                MAX_PART_SIZE
            );
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            spool_dir: args.spool_dir.unwrap_or(env_spool),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            multipart_threshold: args.multipart_threshold.unwrap_or(env_threshold),
            part_size,
            storage: StorageConfig {
                backend,
                endpoint,
                region,
                access_key_id: lookup("B2_KEY_ID"),
                secret_access_key: lookup("B2_APPLICATION_KEY"),
                bucket,
                public_base_url,
            },
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings handed to the ingestion coordinator.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            bucket: self.storage.bucket.clone(),
            multipart_threshold: self.multipart_threshold,
            part_size: self.part_size,
            public_base_url: self.storage.public_base_url.clone(),
        }
    }
}

fn default_public_base_url(
    backend: StorageBackend,
    endpoint: Option<&str>,
    region: &str,
    bucket: &str,
) -> String {
    match (backend, endpoint) {
        (StorageBackend::Memory, _) => format!("memory://{}", bucket),
        (StorageBackend::S3, Some(endpoint)) => {
            format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
        }
        (StorageBackend::S3, None) => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_with_memory_backend() {
        let args = Args {
            backend: Some(StorageBackend::Memory),
            ..Args::default()
        };
        let (cfg, migrate) = AppConfig::from_sources(args, lookup_from(&[])).unwrap();

        assert!(!migrate);
        assert_eq!(cfg.addr(), "0.0.0.0:5000");
        assert_eq!(cfg.multipart_threshold, 100 * 1024 * 1024);
        assert_eq!(cfg.part_size, 100 * 1024 * 1024);
        assert_eq!(cfg.storage.bucket, "omniload");
        assert_eq!(cfg.storage.public_base_url, "memory://omniload");
    }

    #[test]
    fn environment_supplies_storage_settings() {
        let lookup = lookup_from(&[
            ("B2_KEY_ID", "key-id"),
            ("B2_APPLICATION_KEY", "super-secret"),
            ("B2_BUCKET", "uploads"),
            ("B2_ENDPOINT", "https://s3.us-west-004.backblazeb2.com/"),
            ("OMNILOAD_PORT", "8080"),
            ("OMNILOAD_MULTIPART_THRESHOLD", "1024"),
        ]);
        let (cfg, _) = AppConfig::from_sources(Args::default(), lookup).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.multipart_threshold, 1024);
        assert_eq!(cfg.storage.backend, StorageBackend::S3);
        assert_eq!(cfg.storage.access_key_id.as_deref(), Some("key-id"));
        assert_eq!(
            cfg.storage.public_base_url,
            "https://s3.us-west-004.backblazeb2.com/uploads"
        );

        let ingest = cfg.ingest_config();
        assert_eq!(ingest.bucket, "uploads");
        assert_eq!(
            ingest.object_url("abcd1234_a.txt"),
            "https://s3.us-west-004.backblazeb2.com/uploads/abcd1234_a.txt"
        );
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(9000),
            bucket: Some("cli-bucket".into()),
            part_size: Some(8 * 1024 * 1024),
            migrate: true,
            ..Args::default()
        };
        let lookup = lookup_from(&[("OMNILOAD_PORT", "8080"), ("B2_BUCKET", "env-bucket")]);
        let (cfg, migrate) = AppConfig::from_sources(args, lookup).unwrap();

        assert!(migrate);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.storage.bucket, "cli-bucket");
        assert_eq!(cfg.part_size, 8 * 1024 * 1024);
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let err = AppConfig::from_sources(Args::default(), lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let lookup = lookup_from(&[("OMNILOAD_PORT", "eighty"), ("B2_BUCKET", "b")]);
        let err = AppConfig::from_sources(Args::default(), lookup).unwrap_err();
        assert!(err.to_string().contains("OMNILOAD_PORT"));
    }

    #[test]
    fn part_size_must_fit_object_store_limits() {
        let lookup = || lookup_from(&[("B2_BUCKET", "b")]);
        let with_part_size = |part_size| Args {
            part_size: Some(part_size),
            ..Args::default()
        };

        for bad in [0, MIN_PART_SIZE - 1, MAX_PART_SIZE + 1] {
            let err = AppConfig::from_sources(with_part_size(bad), lookup()).unwrap_err();
            assert!(err.to_string().contains("part size"), "{}", err);
        }
        for good in [MIN_PART_SIZE, MAX_PART_SIZE] {
            let (cfg, _) = AppConfig::from_sources(with_part_size(good), lookup()).unwrap();
            assert_eq!(cfg.part_size, good);
        }

        let env = lookup_from(&[("B2_BUCKET", "b"), ("OMNILOAD_PART_SIZE", "1024")]);
        assert!(AppConfig::from_sources(Args::default(), env).is_err());
    }

    #[test]
    fn backend_parses_from_env() {
        let lookup = lookup_from(&[("OMNILOAD_STORAGE_BACKEND", "MEMORY")]);
        let (cfg, _) = AppConfig::from_sources(Args::default(), lookup).unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn debug_output_hides_secret() {
        let lookup = lookup_from(&[("B2_BUCKET", "b"), ("B2_APPLICATION_KEY", "super-secret")]);
        let (cfg, _) = AppConfig::from_sources(Args::default(), lookup).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
