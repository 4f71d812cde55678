//! Chunked column type sampling.
//!
//! The sampler reads a normalized file and produces one [`ColumnTypeMap`]
//! per chunk of rows. How much is read depends on the row cap, the chunk cap
//! and the file's line count (see [`plan_strategy`]). Each chunk is
//! classified independently; merging is the combiner's job.

use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    cancel::CancellationToken,
    io_utils::{self, QuotingMode},
    patterns::CANONICAL_NULL,
    schema::{ColumnTypeGuess, ColumnTypeMap},
};

const CANCEL_CHECK_ROWS: usize = 65_536;

#[derive(Debug, Clone)]
pub struct SampleOptions {
    pub separator: u8,
    pub quote: u8,
    pub quoting: QuotingMode,
    /// Lines before the header row that are not part of the table.
    pub skip_rows: usize,
    pub row_cap: usize,
    /// Maximum number of chunks; 0 reads as many as the file needs.
    pub chunk_cap: usize,
    pub null_tokens: Vec<String>,
    pub encoding: &'static Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleStrategy {
    HeaderOnly,
    WholeFile,
    Chunked { chunk_rows: usize, chunks: usize },
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub header: Vec<String>,
    /// One entry per chunk read; `None` marks a chunk without rows.
    pub chunks: Vec<Option<ColumnTypeMap>>,
    pub strategy: SampleStrategy,
    pub total_lines: u64,
    pub rows_read: usize,
    pub decode_errors: usize,
}

/// Decides how a file of `total_lines` lines is sampled.
pub fn plan_strategy(row_cap: usize, chunk_cap: usize, total_lines: u64) -> SampleStrategy {
    if row_cap == 0 {
        return SampleStrategy::HeaderOnly;
    }
    if row_cap as u64 >= total_lines || chunk_cap == 1 {
        return SampleStrategy::WholeFile;
    }
    let needed = total_lines.div_ceil(row_cap as u64) as usize;
    let chunks = if chunk_cap == 0 {
        needed
    } else {
        chunk_cap.min(needed)
    };
    SampleStrategy::Chunked {
        chunk_rows: row_cap,
        chunks,
    }
}

#[derive(Debug, Clone, Default)]
struct TypeCandidate {
    non_null: usize,
    integer_matches: usize,
    float_matches: usize,
    integer_overflow: bool,
    literal_booleans: usize,
    numeric_booleans: usize,
    saw_zero: bool,
    saw_one: bool,
    max_len: usize,
}

impl TypeCandidate {
    fn update(&mut self, raw: &str) {
        self.non_null += 1;
        self.max_len = self.max_len.max(raw.chars().count());
        let value = raw.trim();

        match value {
            "0" => {
                self.numeric_booleans += 1;
                self.saw_zero = true;
            }
            "1" => {
                self.numeric_booleans += 1;
                self.saw_one = true;
            }
            _ if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false") => {
                self.literal_booleans += 1;
            }
            _ => {}
        }

        if value.parse::<i64>().is_ok() {
            self.integer_matches += 1;
            self.float_matches += 1;
            return;
        }
        if looks_integral(value) {
            self.integer_overflow = true;
        }
        if value.parse::<f64>().is_ok_and(f64::is_finite) {
            self.float_matches += 1;
        }
    }

    fn record_undecodable(&mut self, byte_len: usize) {
        self.non_null += 1;
        self.max_len = self.max_len.max(byte_len);
    }

    fn decide(&self) -> Option<ColumnTypeGuess> {
        if self.non_null == 0 {
            return None;
        }
        let all = |count: usize| count == self.non_null;
        let guess = if all(self.literal_booleans)
            || (all(self.numeric_booleans) && self.saw_zero && self.saw_one)
        {
            ColumnTypeGuess::Boolean
        } else if all(self.integer_matches) {
            ColumnTypeGuess::Integer
        } else if all(self.float_matches) && !self.integer_overflow {
            ColumnTypeGuess::Double
        } else {
            ColumnTypeGuess::for_text_length(self.max_len)
        };
        Some(guess)
    }
}

fn looks_integral(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Accumulates one chunk of rows into per-column guesses.
pub struct ChunkClassifier<'h> {
    header: &'h [String],
    candidates: Vec<TypeCandidate>,
    null_tokens: &'h HashSet<String>,
    encoding: &'static Encoding,
    rows: usize,
    decode_errors: usize,
}

impl<'h> ChunkClassifier<'h> {
    pub fn new(
        header: &'h [String],
        null_tokens: &'h HashSet<String>,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            header,
            candidates: vec![TypeCandidate::default(); header.len()],
            null_tokens,
            encoding,
            rows: 0,
            decode_errors: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn observe(&mut self, record: &csv::ByteRecord) {
        for (idx, field) in record.iter().take(self.header.len()).enumerate() {
            match io_utils::decode_bytes(field, self.encoding) {
                Ok(value) => {
                    if is_null(&value, self.null_tokens) {
                        continue;
                    }
                    self.candidates[idx].update(&value);
                }
                Err(_) => {
                    self.decode_errors += 1;
                    self.candidates[idx].record_undecodable(field.len());
                }
            }
        }
        self.rows += 1;
    }

    /// Guesses for this chunk, or `None` when it held no rows. Columns that
    /// only held nulls are left out.
    pub fn finish(self) -> (Option<ColumnTypeMap>, usize) {
        if self.rows == 0 {
            return (None, self.decode_errors);
        }
        let mut map = ColumnTypeMap::new();
        for (name, candidate) in self.header.iter().zip(&self.candidates) {
            let Some(guess) = candidate.decide() else {
                continue;
            };
            let merged = match map.get(name) {
                Some(existing) => existing.wider(guess),
                None => guess,
            };
            map.insert(name.clone(), merged);
        }
        (Some(map), self.decode_errors)
    }
}

fn is_null(value: &str, null_tokens: &HashSet<String>) -> bool {
    value.is_empty() || value == CANONICAL_NULL || null_tokens.contains(value)
}

/// Samples `path` and returns its header plus one type map per chunk.
pub fn sample(path: &Path, options: &SampleOptions, cancel: &CancellationToken) -> Result<Sample> {
    let total_lines = io_utils::count_lines(path)?;
    let strategy = plan_strategy(options.row_cap, options.chunk_cap, total_lines);
    info!(
        "Sampling {:?} ({} line(s)) with strategy {:?}",
        path, total_lines, strategy
    );

    let file = File::open(path).with_context(|| format!("Opening {path:?} for sampling"))?;
    let mut buffered = BufReader::new(file);
    io_utils::skip_lines(&mut buffered, options.skip_rows)
        .with_context(|| format!("Skipping {} leading line(s) of {path:?}", options.skip_rows))?;
    let mut reader = io_utils::open_csv_reader(
        buffered,
        options.separator,
        options.quote,
        options.quoting,
        true,
    );
    let header_record = reader
        .byte_headers()
        .with_context(|| format!("Reading header of {path:?}"))?
        .clone();
    let header = io_utils::decode_record(&header_record, options.encoding)
        .with_context(|| format!("Decoding header of {path:?}"))?;
    let null_tokens: HashSet<String> = options.null_tokens.iter().cloned().collect();

    let (chunk_rows, chunk_limit) = match strategy {
        SampleStrategy::HeaderOnly => {
            return Ok(Sample {
                header,
                chunks: vec![None],
                strategy,
                total_lines,
                rows_read: 0,
                decode_errors: 0,
            });
        }
        SampleStrategy::WholeFile => (usize::MAX, 1),
        SampleStrategy::Chunked { chunk_rows, chunks } => (chunk_rows, chunks),
    };

    let mut chunks = Vec::with_capacity(chunk_limit);
    let mut record = csv::ByteRecord::new();
    let mut rows_read = 0usize;
    let mut decode_errors = 0usize;
    let mut exhausted = false;

    while chunks.len() < chunk_limit && !exhausted {
        ensure_not_cancelled(cancel, path)?;
        let mut classifier = ChunkClassifier::new(&header, &null_tokens, options.encoding);
        while classifier.rows() < chunk_rows {
            let more = reader
                .read_byte_record(&mut record)
                .with_context(|| format!("Reading row {} of {path:?}", rows_read + 2))?;
            if !more {
                exhausted = true;
                break;
            }
            classifier.observe(&record);
            rows_read += 1;
            if rows_read % CANCEL_CHECK_ROWS == 0 {
                ensure_not_cancelled(cancel, path)?;
            }
        }
        let rows_in_chunk = classifier.rows();
        if rows_in_chunk == 0 && !chunks.is_empty() {
            break;
        }
        let (guesses, errors) = classifier.finish();
        decode_errors += errors;
        debug!(
            "Chunk {} of {:?}: {} row(s), guesses {}",
            chunks.len() + 1,
            path,
            rows_in_chunk,
            guesses
                .as_ref()
                .map(ColumnTypeMap::to_string)
                .unwrap_or_else(|| "none".to_string())
        );
        chunks.push(guesses);
    }

    Ok(Sample {
        header,
        chunks,
        strategy,
        total_lines,
        rows_read,
        decode_errors,
    })
}

fn ensure_not_cancelled(cancel: &CancellationToken, path: &Path) -> Result<()> {
    if cancel.is_cancelled() {
        Err(anyhow!("Sampling of {path:?} cancelled"))
    } else {
        Ok(())
    }
}
