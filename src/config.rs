use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Seconds between cache/catalog maintenance passes.
pub const DEFAULT_MANAGER_INTERVAL_SECS: u64 = 30;

/// Everything a bridge instance needs, fixed at construction.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the Sia daemon API (e.g. "127.0.0.1:9980").
    pub siad_address: String,
    /// Root directory of the local object cache.
    pub cache_dir: PathBuf,
    /// SQLite URL of the metadata catalog.
    pub database_url: String,
    /// Interval between maintenance passes.
    pub manager_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            siad_address: "127.0.0.1:9980".into(),
            cache_dir: PathBuf::from(".sia_cache"),
            database_url: "sqlite://siabridge.db".into(),
            manager_interval: Duration::from_secs(DEFAULT_MANAGER_INTERVAL_SECS),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bridge: BridgeConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "HTTP gateway for the Sia storage bridge")]
pub struct Args {
    /// Host to bind to (overrides SIA_BRIDGE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SIA_BRIDGE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Sia daemon API address (overrides SIA_BRIDGE_SIAD_ADDRESS)
    #[arg(long)]
    pub siad_address: Option<String>,

    /// Local cache directory (overrides SIA_BRIDGE_CACHE_DIR)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Database URL (overrides SIA_BRIDGE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds between maintenance passes (overrides SIA_BRIDGE_MANAGER_INTERVAL_SECS)
    #[arg(long)]
    pub manager_interval_secs: Option<u64>,

    /// Create the catalog schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |key| env::var(key))?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = BridgeConfig::default();

        let env_host = lookup("SIA_BRIDGE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "SIA_BRIDGE_PORT")?.unwrap_or(3000);
        let env_siad =
            lookup("SIA_BRIDGE_SIAD_ADDRESS").unwrap_or_else(|_| defaults.siad_address.clone());
        let env_cache = lookup("SIA_BRIDGE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| defaults.cache_dir.clone());
        let env_db =
            lookup("SIA_BRIDGE_DATABASE_URL").unwrap_or_else(|_| defaults.database_url.clone());
        let env_interval = parse_var(&lookup, "SIA_BRIDGE_MANAGER_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_MANAGER_INTERVAL_SECS);

        let interval_secs = args.manager_interval_secs.unwrap_or(env_interval);
        if interval_secs == 0 {
            anyhow::bail!("manager interval must be at least one second");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            bridge: BridgeConfig {
                siad_address: args.siad_address.unwrap_or(env_siad),
                cache_dir: args.cache_dir.unwrap_or(env_cache),
                database_url: args.database_url.unwrap_or(env_db),
                manager_interval: Duration::from_secs(interval_secs),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
