use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use rangecache_storage::{RemoteStreamConfig, RemoteStreamOptions, DEFAULT_MAX_CHUNK_BYTES};
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(name = "rangecache", version, about)]
pub struct Args {
    /// Absolute `http`/`https` URL of the resource to stream.
    pub url: String,

    /// Directory holding cached data files and their indexes.
    ///
    /// Environment variable: `RANGECACHE_CACHE_DIR`.
    #[arg(long, env = "RANGECACHE_CACHE_DIR", default_value = "./rangecache")]
    pub cache_dir: PathBuf,

    /// First byte to emit.
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to emit; defaults to everything up to the end of the resource.
    #[arg(long)]
    pub length: Option<u64>,

    /// Write the bytes here instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Extra request header as `NAME:VALUE`. May be repeated.
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Upper bound on bytes moved from the network into the cache per step.
    #[arg(long, default_value_t = DEFAULT_MAX_CHUNK_BYTES)]
    pub chunk_bytes: usize,

    /// Byte budget for the whole cache directory. Older files are evicted to stay under it.
    ///
    /// Environment variable: `RANGECACHE_QUOTA_BYTES`.
    #[arg(long, env = "RANGECACHE_QUOTA_BYTES")]
    pub quota_bytes: Option<u64>,

    /// Print the cache status as JSON on stdout.
    ///
    /// Without `--output`, no resource bytes are transferred.
    #[arg(long)]
    pub status: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `RANGECACHE_LOG`.
    #[arg(long, env = "RANGECACHE_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
    /// Status only; nothing is copied.
    Discard,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub stream: RemoteStreamConfig,
    pub offset: u64,
    pub length: Option<u64>,
    pub output: Output,
    pub print_status: bool,
    pub log_level: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let url = Url::parse(&args.url).with_context(|| format!("invalid URL {:?}", args.url))?;
        if args.chunk_bytes == 0 {
            bail!("--chunk-bytes must be greater than zero");
        }

        let request_headers = args
            .headers
            .iter()
            .map(|raw| parse_header(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut stream = RemoteStreamConfig::new(url, args.cache_dir);
        stream.request_headers = request_headers;
        stream.options = RemoteStreamOptions {
            max_chunk_bytes: args.chunk_bytes,
            quota_bytes: args.quota_bytes,
            ..RemoteStreamOptions::default()
        };

        let output = match (args.output, args.status) {
            (Some(path), _) => Output::File(path),
            (None, true) => Output::Discard,
            (None, false) => Output::Stdout,
        };

        let log_level = args.log_level.trim().to_string();
        let log_level = if log_level.is_empty() {
            "info".to_string()
        } else {
            log_level
        };

        Ok(Self {
            stream,
            offset: args.offset,
            length: args.length,
            output,
            print_status: args.status,
            log_level,
        })
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("header {raw:?} is not of the form NAME:VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header {raw:?} has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}
