use clap::{Args as ClapArgs, Parser, Subcommand};
use geofetch_engine::MimeType;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "geofetch",
    about = "Geofetch - download, validate and cache geospatial imagery",
    long_about = "Downloads imagery from OGC-style services (WMS, WCS, FIS) and Sentinel-2\n\
                  files from the public object store. Transient failures are retried with\n\
                  backoff, payloads are validated before use and identical requests are\n\
                  served from a local cache.",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "GEOFETCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Bypass the cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Total fetch attempts per download
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Overall deadline of a download in seconds
    #[arg(long, global = true)]
    pub deadline: Option<u64>,

    /// Proxy URL (supports http, https, socks5)
    #[arg(long, global = true)]
    pub proxy: Option<String>,

    /// Proxy username (if proxy requires authentication)
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_username: Option<String>,

    /// Proxy password (if proxy requires authentication)
    #[arg(long, global = true, requires = "proxy")]
    pub proxy_password: Option<String>,

    /// Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'
    #[arg(long = "header", short = 'H', global = true, value_name = "HEADER")]
    pub headers: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download a map image from a WMS endpoint
    Wms(ServiceArgs),

    /// Download a coverage from a WCS endpoint
    Wcs(ServiceArgs),

    /// Download feature statistics from a FIS endpoint
    Fis(ServiceArgs),

    /// Download a Sentinel-2 tile or product file from the object store
    Aws(AwsArgs),

    /// Maintain the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Remove every cached artifact
    Clear,
    /// Remove expired entries and shrink the cache to its size limit
    Sweep,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Overwrite the configuration file with defaults
    Reset,
    /// Print the configuration file location
    Path,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OutputArgs {
    /// Write the artifact to this file
    #[arg(short, long, conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Directory for artifacts named after their fingerprint
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print the fingerprint and target without downloading
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServiceArgs {
    /// Layer name as configured in the service instance
    #[arg(short, long)]
    pub layer: String,

    /// Bounding box as min_x,min_y,max_x,max_y
    #[arg(short, long, allow_hyphen_values = true)]
    pub bbox: String,

    /// CRS of the bounding box (EPSG code)
    #[arg(long, default_value = "4326")]
    pub crs: String,

    /// Date or date range: YYYY-MM-DD or YYYY-MM-DD/YYYY-MM-DD
    #[arg(short, long)]
    pub time: Option<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<MimeType>,

    /// Image size in pixels as WIDTHxHEIGHT (WMS)
    #[arg(long, value_parser = parse_image_size)]
    pub size: Option<(u32, u32)>,

    /// Resolution such as 10m (WCS, FIS)
    #[arg(long)]
    pub resolution: Option<String>,

    /// Service instance id, overrides the configuration
    #[arg(long, env = "GEOFETCH_INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Service base URL, overrides the configuration
    #[arg(long)]
    pub base_url: Option<String>,

    /// Extra request parameter as NAME=VALUE (can be used multiple times)
    #[arg(long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AwsArgs {
    /// Sentinel-2 tile name, e.g. T38TML
    #[arg(long, required_unless_present = "product", conflicts_with = "product")]
    pub tile: Option<String>,

    /// Sentinel-2 product id
    #[arg(long)]
    pub product: Option<String>,

    /// File inside the tile or product folder, e.g. B01.jp2
    #[arg(long)]
    pub file: String,

    /// Acquisition date (YYYY-MM-DD), required for tiles
    #[arg(short, long)]
    pub time: Option<String>,

    /// Acquisition index within the day
    #[arg(long)]
    pub index: Option<u32>,

    /// Bucket, overrides the configuration
    #[arg(long)]
    pub bucket: Option<String>,

    /// Region, overrides the configuration
    #[arg(long)]
    pub region: Option<String>,

    /// Output format, guessed from the file name when omitted
    #[arg(short, long, value_enum)]
    pub format: Option<MimeType>,

    /// Expected digest as sha256:<hex> or md5:<hex>
    #[arg(long)]
    pub checksum: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// `512x512` or `512,512`
pub fn parse_image_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X', ','])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid size '{v}': {e}"))
    };
    Ok((parse(width)?, parse(height)?))
}

pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
