use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Empty disables the local object store (uploads answer 501).
    pub storage_dir: String,
    /// Empty disables the metadata database (uploads answer 501).
    pub database_url: String,
    /// Public prefix every canonical URL starts with.
    pub public_base_url: String,
    pub key_prefix: String,
    pub max_body_size: usize,
    pub max_daily_uploads: u32,
    pub fetch_timeout_secs: u64,
    /// Zone whose calendar day bounds the upload quota.
    pub timezone: Tz,
    /// Trust `x-forwarded-for` / `x-real-ip` for the client identifier.
    pub trust_proxy: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Deduplicating image ingestion proxy")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image objects are stored (overrides IMAGE_PROXY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_PROXY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL images are served from (overrides IMAGE_PROXY_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Prefix prepended to generated object keys (overrides IMAGE_PROXY_KEY_PREFIX)
    #[arg(long)]
    pub key_prefix: Option<String>,

    /// Largest accepted image in bytes (overrides IMAGE_PROXY_MAX_BODY_SIZE)
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Accepted uploads per client per day (overrides IMAGE_PROXY_MAX_DAILY_UPLOADS)
    #[arg(long)]
    pub max_daily_uploads: Option<u32>,

    /// Timeout for fetching remote images (overrides IMAGE_PROXY_FETCH_TIMEOUT_SECS)
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// IANA timezone for the daily quota window (overrides IMAGE_PROXY_TIMEZONE)
    #[arg(long)]
    pub timezone: Option<String>,

    /// Trust proxy headers for client addresses (overrides IMAGE_PROXY_TRUST_PROXY)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_PROXY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("IMAGE_PROXY_PORT", 3000u16)?;
        let env_storage =
            env::var("IMAGE_PROXY_STORAGE_DIR").unwrap_or_else(|_| "./data/images".into());
        let env_db = env::var("IMAGE_PROXY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/image_proxy.db".into());
        let env_base_url = env::var("IMAGE_PROXY_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/images".into());
        let env_prefix = env::var("IMAGE_PROXY_KEY_PREFIX").unwrap_or_default();
        let env_max_body = env_parse("IMAGE_PROXY_MAX_BODY_SIZE", 10 * 1024 * 1024usize)?;
        let env_max_daily = env_parse("IMAGE_PROXY_MAX_DAILY_UPLOADS", 100u32)?;
        let env_timeout = env_parse("IMAGE_PROXY_FETCH_TIMEOUT_SECS", 10u64)?;
        let env_tz = env::var("IMAGE_PROXY_TIMEZONE").unwrap_or_else(|_| "UTC".into());
        let env_trust_proxy = env_parse("IMAGE_PROXY_TRUST_PROXY", false)?;

        let timezone_name = args.timezone.unwrap_or(env_tz);
        let timezone = Tz::from_str(&timezone_name)
            .map_err(|err| anyhow::anyhow!("parsing timezone `{}`: {}", timezone_name, err))?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_base_url),
            key_prefix: args.key_prefix.unwrap_or(env_prefix),
            max_body_size: args.max_body_size.unwrap_or(env_max_body),
            max_daily_uploads: args.max_daily_uploads.unwrap_or(env_max_daily),
            fetch_timeout_secs: args.fetch_timeout_secs.unwrap_or(env_timeout),
            timezone,
            trust_proxy: args.trust_proxy || env_trust_proxy,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Both storage backends are configured.
    pub fn storage_enabled(&self) -> bool {
        !self.storage_dir.trim().is_empty() && !self.database_url.trim().is_empty()
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
