//! I/O utilities: compression detection, decompressing readers, encodings,
//! delimiter resolution, and line counting.
//!
//! All file access in loadprep flows through this module:
//!
//! - **Compression**: `.gz` and `.bz2` inputs are streamed through
//!   `flate2`/`bzip2` decoders; anything else is read as-is.
//! - **Encoding**: inputs in a non-UTF-8 encoding are transcoded to UTF-8 on
//!   the fly via `encoding_rs_io`.
//! - **Delimiters**: extension-based defaults (`.csv` → comma, everything
//!   else → tab) with manual override support.
//! - **CSV readers**: built with the configured quote character and quoting
//!   mode, flexible so ragged rows are tolerated.

use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use bzip2::read::BzDecoder;
use clap::ValueEnum;
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';
const READ_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match extension_lowercase(path).as_deref() {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            _ => Compression::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }
}

/// An input file as found on disk. Identified once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub compression: Compression,
}

impl RawFile {
    pub fn identify(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).with_context(|| format!("Reading metadata for {path:?}"))?;
        if !metadata.is_file() {
            return Err(anyhow!("{path:?} is not a regular file"));
        }
        Ok(RawFile {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            compression: Compression::from_path(path),
        })
    }

    /// Path with the compression extension removed, e.g. `calls.vcf.gz` →
    /// `calls.vcf`.
    pub fn logical_path(&self) -> PathBuf {
        match self.compression {
            Compression::None => self.path.clone(),
            _ => self.path.with_extension(""),
        }
    }

    pub fn is_vcf(&self) -> bool {
        extension_lowercase(&self.logical_path()).as_deref() == Some("vcf")
    }
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Separator for `path` when none was configured. Compression extensions are
/// looked through, so `table.csv.gz` resolves to a comma.
pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| {
        let logical = match Compression::from_path(path) {
            Compression::None => path.to_path_buf(),
            _ => path.with_extension(""),
        };
        match extension_lowercase(&logical).as_deref() {
            Some("csv") => DEFAULT_CSV_DELIMITER,
            _ => DEFAULT_TSV_DELIMITER,
        }
    })
}

/// Opens `raw` and returns a stream of its decompressed bytes.
pub fn open_decompressed(raw: &RawFile) -> Result<Box<dyn Read + Send>> {
    let file = File::open(&raw.path)
        .with_context(|| format!("Opening input file {:?}", raw.path))?;
    let buffered = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    let reader: Box<dyn Read + Send> = match raw.compression {
        Compression::None => Box::new(buffered),
        Compression::Gzip => Box::new(MultiGzDecoder::new(buffered)),
        Compression::Bzip2 => Box::new(BzDecoder::new(buffered)),
    };
    Ok(reader)
}

/// Wraps `reader` so it yields UTF-8 regardless of the source encoding. A BOM
/// in the input takes precedence over `encoding`.
pub fn transcode_to_utf8<R>(reader: R, encoding: &'static Encoding) -> Box<dyn Read + Send>
where
    R: Read + Send + 'static,
{
    if encoding == UTF_8 {
        Box::new(reader)
    } else {
        Box::new(
            DecodeReaderBytesBuilder::new()
                .encoding(Some(encoding))
                .build(reader),
        )
    }
}

pub fn create_output_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    Ok(BufWriter::with_capacity(READ_BUFFER_BYTES, file))
}

/// Number of `\n` bytes in the file, i.e. its newline-terminated line count.
pub fn count_lines(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("Opening {path:?} to count lines"))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, file);
    let mut total = 0u64;
    loop {
        let buffer = reader
            .fill_buf()
            .with_context(|| format!("Counting lines in {path:?}"))?;
        if buffer.is_empty() {
            break;
        }
        total += buffer.iter().filter(|&&byte| byte == b'\n').count() as u64;
        let consumed = buffer.len();
        reader.consume(consumed);
    }
    Ok(total)
}

/// Reads and discards `count` lines from `reader`.
pub fn skip_lines<R: BufRead>(reader: &mut R, count: usize) -> io::Result<usize> {
    let mut discarded = Vec::new();
    let mut skipped = 0usize;
    while skipped < count {
        discarded.clear();
        if reader.read_until(b'\n', &mut discarded)? == 0 {
            break;
        }
        skipped += 1;
    }
    Ok(skipped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QuotingMode {
    /// Quote characters enclose fields and are removed while reading.
    #[default]
    Minimal,
    /// Quote characters are ordinary data.
    None,
}

pub fn open_csv_reader<R>(
    reader: R,
    delimiter: u8,
    quote: u8,
    quoting: QuotingMode,
    has_headers: bool,
) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .quote(quote)
        .quoting(quoting == QuotingMode::Minimal)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Sibling path used while an output file is still being written.
pub fn incomplete_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".incomplete");
    PathBuf::from(name)
}

/// Writes `bytes` to `path` through a buffered writer.
pub fn write_all(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut writer = create_output_writer(path)?;
    writer
        .write_all(bytes)
        .and_then(|_| writer.flush())
        .with_context(|| format!("Writing {path:?}"))
}
