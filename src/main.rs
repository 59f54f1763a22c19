mod config;

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};

use anyhow::Context;
use rangecache_storage::{RemoteStreamHandle, StreamReader};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Output};

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout may carry resource bytes, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    std::fs::create_dir_all(&config.stream.cache_dir).with_context(|| {
        format!(
            "failed to create cache directory {}",
            config.stream.cache_dir.display()
        )
    })?;

    let handle =
        RemoteStreamHandle::open(config.stream.clone()).context("failed to open remote stream")?;
    let mut reader = StreamReader::new(handle);

    let copied = match &config.output {
        Output::Discard => 0,
        Output::Stdout => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            copy_range(&mut reader, &config, &mut out)?
        }
        Output::File(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            copy_range(&mut reader, &config, &mut out)?
        }
    };
    tracing::info!(bytes = copied, offset = config.offset, "transfer finished");

    if config.print_status {
        let handle = reader.handle();
        let status = serde_json::json!({
            "file_size": handle.file_size(),
            "cache": handle.cache_status()?,
            "telemetry": handle.telemetry()?,
        });
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &status)?;
        writeln!(stdout)?;
    }

    reader.into_inner().close();
    Ok(())
}

fn copy_range(
    reader: &mut StreamReader,
    config: &Config,
    out: &mut impl Write,
) -> anyhow::Result<u64> {
    reader
        .seek(SeekFrom::Start(config.offset))
        .with_context(|| format!("failed to seek to offset {}", config.offset))?;
    let mut limited = (&mut *reader).take(config.length.unwrap_or(u64::MAX));
    let copied = io::copy(&mut limited, out).context("failed to copy resource bytes")?;
    out.flush()?;
    Ok(copied)
}
