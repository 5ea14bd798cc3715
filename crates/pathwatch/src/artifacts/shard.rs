use crate::traceroute::TracerouteRecord;
use anyhow::{Context, Result};
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Lines, Write},
    path::{Path, PathBuf},
};
use tracing::info;

/// Suffix of raw and filtered measurement shard files.
pub const SHARD_FILE_SUFFIX: &str = ".jsonl.gz";

/// Failure while reading a measurement shard. A corrupt line is fatal for the
/// shard it appears in; the batch decides whether to carry on with others.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("failed to read shard {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt shard {path}, line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Streaming reader over a gzip-compressed newline-delimited JSON shard.
///
/// Yields records in file order. The first I/O or parse failure is surfaced
/// with the shard path and line number and ends the stream.
pub struct ShardReader {
    path: PathBuf,
    lines: Lines<BufReader<MultiGzDecoder<File>>>,
    line: usize,
    failed: bool,
}

impl ShardReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ShardError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ShardError::Io {
            path: path.clone(),
            source,
        })?;
        let lines = BufReader::new(MultiGzDecoder::new(file)).lines();
        Ok(Self {
            path,
            lines,
            line: 0,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ShardReader {
    type Item = Result<TracerouteRecord, ShardError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    self.failed = true;
                    return Some(Err(ShardError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            };
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str(&line) {
                Ok(record) => Some(Ok(record)),
                Err(source) => {
                    self.failed = true;
                    Some(Err(ShardError::Corrupt {
                        path: self.path.clone(),
                        line: self.line,
                        source,
                    }))
                }
            };
        }
    }
}

/// Write records as a gzip-compressed newline-delimited JSON shard.
pub fn write_shard<P: AsRef<Path>>(path: P, records: &[TracerouteRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create shard file: {}", path.display()))?;
    let mut writer = BufWriter::new(GzEncoder::new(file, Compression::default()));
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer
        .into_inner()
        .map_err(|e| e.into_error())
        .and_then(|encoder| encoder.finish())
        .with_context(|| format!("Failed to finish shard file: {}", path.display()))?;
    Ok(())
}

/// Check that every line of a shard parses, returning the record count.
pub fn verify_shard<P: AsRef<Path>>(path: P) -> Result<usize, ShardError> {
    let mut count = 0;
    for record in ShardReader::open(path)? {
        record?;
        count += 1;
    }
    Ok(count)
}

/// Collect shard files from a directory (or accept a single shard file),
/// sorted by name for deterministic processing order.
pub fn collect_shard_files<P: AsRef<Path>>(input: P) -> Result<Vec<PathBuf>> {
    let input = input.as_ref();
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files = Vec::new();
    let entries = std::fs::read_dir(input)
        .with_context(|| format!("Failed to read shard directory: {}", input.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(SHARD_FILE_SUFFIX))
        {
            files.push(path);
        }
    }
    files.sort();
    info!("Found {} shard files in {}", files.len(), input.display());
    Ok(files)
}
