//! Streaming null normalization.
//!
//! Input is consumed in large blocks. Each block is appended to a carry
//! buffer and only the bytes up to (and including) the last `\n` are
//! processed; the unterminated tail waits for the next read. Every slice
//! handed to the matchers therefore starts at a line start and holds whole
//! lines, so a token can never be split across two reads. Whatever remains at
//! EOF is processed as the final, unterminated line.
//!
//! VCF meta lines (`##...`) are dropped and the leading `#` of the column
//! header line is removed before substitution.

use std::{
    fs,
    io::{self, Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    cancel::CancellationToken,
    error::PipelineError,
    io_utils::{self, RawFile},
    patterns::NullPatterns,
};

pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub block_size: usize,
    pub strip_vcf_header: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            strip_vcf_header: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub lines: u64,
    pub header_lines_dropped: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VcfState {
    Disabled,
    MetaLines,
    Done,
}

struct BlockWriter<'w, W: Write> {
    inner: &'w mut W,
    hasher: Sha256,
    bytes_written: u64,
    lines: u64,
}

impl<W: Write> BlockWriter<'_, W> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.hasher.update(bytes);
        self.bytes_written += bytes.len() as u64;
        self.lines += bytes.iter().filter(|&&b| b == b'\n').count() as u64;
        Ok(())
    }
}

/// Copies `reader` to `writer`, rewriting null tokens with `patterns`.
/// `None` patterns make this a straight copy (still honoring VCF stripping).
pub fn normalize<R, W>(
    reader: &mut R,
    writer: &mut W,
    patterns: Option<&NullPatterns>,
    options: &NormalizeOptions,
    cancel: &CancellationToken,
) -> Result<NormalizeStats, PipelineError>
where
    R: Read,
    W: Write,
{
    let block_size = options.block_size.max(1) as u64;
    let mut vcf = if options.strip_vcf_header {
        VcfState::MetaLines
    } else {
        VcfState::Disabled
    };
    let mut out = BlockWriter {
        inner: writer,
        hasher: Sha256::new(),
        bytes_written: 0,
        lines: 0,
    };
    let mut carry: Vec<u8> = Vec::new();
    let mut bytes_read = 0u64;
    let mut header_lines_dropped = 0u64;
    let mut blocks = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::incomplete(
                out.bytes_written,
                "cancelled at block boundary",
            ));
        }
        let read = reader
            .by_ref()
            .take(block_size)
            .read_to_end(&mut carry)
            .map_err(|err| PipelineError::incomplete(out.bytes_written, err.to_string()))?;
        if read == 0 {
            break;
        }
        bytes_read += read as u64;
        blocks += 1;

        let Some(last_newline) = carry.iter().rposition(|&b| b == b'\n') else {
            continue;
        };
        let remainder = carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut carry, remainder);
        process_lines(&complete, patterns, &mut vcf, &mut header_lines_dropped, &mut out)?;
    }

    if !carry.is_empty() {
        process_lines(&carry, patterns, &mut vcf, &mut header_lines_dropped, &mut out)?;
    }
    out.inner
        .flush()
        .map_err(|err| PipelineError::incomplete(out.bytes_written, err.to_string()))?;

    debug!(
        "Normalized {} byte(s) in {} block(s) into {} byte(s)",
        bytes_read, blocks, out.bytes_written
    );
    Ok(NormalizeStats {
        bytes_read,
        bytes_written: out.bytes_written,
        lines: out.lines,
        header_lines_dropped,
        sha256: format!("{:x}", out.hasher.finalize()),
    })
}

fn process_lines<W: Write>(
    lines: &[u8],
    patterns: Option<&NullPatterns>,
    vcf: &mut VcfState,
    dropped: &mut u64,
    out: &mut BlockWriter<'_, W>,
) -> Result<(), PipelineError> {
    let stripped;
    let body = if *vcf == VcfState::MetaLines {
        stripped = strip_vcf_meta(lines, vcf, dropped);
        stripped.as_slice()
    } else {
        lines
    };
    if body.is_empty() {
        return Ok(());
    }
    let result = match patterns {
        Some(patterns) => out.write(&patterns.apply(body)),
        None => out.write(body),
    };
    result.map_err(|err| PipelineError::incomplete(out.bytes_written, err.to_string()))
}

/// Removes `##` lines and the `#` prefix of the first other line. Stops
/// looking once the column header line has been seen.
fn strip_vcf_meta(lines: &[u8], vcf: &mut VcfState, dropped: &mut u64) -> Vec<u8> {
    let mut kept = Vec::with_capacity(lines.len());
    let mut rest = lines;
    while !rest.is_empty() {
        if *vcf != VcfState::MetaLines {
            kept.extend_from_slice(rest);
            break;
        }
        let line_end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(rest.len());
        let (line, tail) = rest.split_at(line_end);
        if line.starts_with(b"##") {
            *dropped += 1;
        } else {
            kept.extend_from_slice(line.strip_prefix(b"#").unwrap_or(line));
            *vcf = VcfState::Done;
        }
        rest = tail;
    }
    kept
}

/// Normalizes `raw` into `output`.
///
/// Bytes go to `<output>.incomplete` first; the file is renamed to `output`
/// only after every block was written and flushed. On failure the
/// `.incomplete` file is left behind and must not be loaded.
pub fn normalize_file(
    raw: &RawFile,
    output: &Path,
    patterns: Option<&NullPatterns>,
    options: &NormalizeOptions,
    encoding: &'static Encoding,
    cancel: &CancellationToken,
) -> Result<NormalizeStats> {
    let partial = io_utils::incomplete_path(output);
    info!(
        "Normalizing '{}' ({}, {} byte(s)) -> {:?}",
        raw.path.display(),
        raw.compression.as_str(),
        raw.size_bytes,
        output
    );
    let decompressed = io_utils::open_decompressed(raw)?;
    let mut reader = io_utils::transcode_to_utf8(decompressed, encoding);
    let mut writer = io_utils::create_output_writer(&partial)?;

    let stats = match normalize(&mut reader, &mut writer, patterns, options, cancel) {
        Ok(stats) => stats,
        Err(err) => {
            warn!("Normalization of {:?} stopped; partial output left at {partial:?}", raw.path);
            return Err(err).with_context(|| format!("Normalizing {:?}", raw.path));
        }
    };
    let file = writer
        .into_inner()
        .map_err(|err| PipelineError::incomplete(stats.bytes_written, err.error().to_string()))
        .with_context(|| format!("Flushing {partial:?}"))?;
    file.sync_all()
        .with_context(|| format!("Syncing {partial:?}"))?;
    drop(file);
    fs::rename(&partial, output)
        .with_context(|| format!("Renaming {partial:?} to {output:?}"))?;

    if stats.header_lines_dropped > 0 {
        debug!("Dropped {} VCF meta line(s)", stats.header_lines_dropped);
    }
    info!(
        "Wrote {} line(s), {} byte(s) to {:?}",
        stats.lines, stats.bytes_written, output
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &[u8], tokens: &[&str], options: &NormalizeOptions) -> Vec<u8> {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let patterns = NullPatterns::build(b'\t', &tokens, Vec::new()).expect("patterns");
        let mut reader = input;
        let mut output = Vec::new();
        normalize(
            &mut reader,
            &mut output,
            patterns.as_ref(),
            options,
            &CancellationToken::new(),
        )
        .expect("normalize");
        output
    }

    #[test]
    fn tokens_straddling_block_boundaries_are_replaced() {
        let input = b"a\tb\nna\tna\nx\tna\nna\ty\n";
        let tiny = NormalizeOptions {
            block_size: 3,
            strip_vcf_header: false,
        };
        let expected = b"a\tb\n\\N\t\\N\nx\t\\N\n\\N\ty\n".to_vec();
        assert_eq!(run(input, &["na"], &tiny), expected);
        assert_eq!(run(input, &["na"], &NormalizeOptions::default()), expected);
    }

    #[test]
    fn final_line_without_newline_is_processed() {
        let out = run(b"a\tb\nx\tna", &["na"], &NormalizeOptions::default());
        assert_eq!(out, b"a\tb\nx\t\\N".to_vec());
    }

    #[test]
    fn vcf_meta_lines_are_stripped_across_blocks() {
        let input = b"##fileformat=VCFv4.2\n##source=test\n#CHROM\tPOS\tID\n1\t100\t.\n";
        let options = NormalizeOptions {
            block_size: 7,
            strip_vcf_header: true,
        };
        let tokens: Vec<String> = vec![".".to_string()];
        let patterns = NullPatterns::build(b'\t', &tokens, Vec::new()).expect("patterns");
        let mut reader = &input[..];
        let mut output = Vec::new();
        let stats = normalize(
            &mut reader,
            &mut output,
            patterns.as_ref(),
            &options,
            &CancellationToken::new(),
        )
        .expect("normalize");
        assert_eq!(output, b"CHROM\tPOS\tID\n1\t100\t\\N\n".to_vec());
        assert_eq!(stats.header_lines_dropped, 2);
        assert_eq!(stats.lines, 2);
    }

    #[test]
    fn identity_copy_reports_digest_of_input() {
        let input = b"x\ty\n1\t2\n";
        let mut reader = &input[..];
        let mut output = Vec::new();
        let stats = normalize(
            &mut reader,
            &mut output,
            None,
            &NormalizeOptions::default(),
            &CancellationToken::new(),
        )
        .expect("copy");
        assert_eq!(output, input.to_vec());
        assert_eq!(stats.bytes_read, input.len() as u64);
        assert_eq!(stats.sha256, format!("{:x}", Sha256::digest(input)));
    }

    #[test]
    fn cancelled_token_aborts_before_writing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = &b"a\tna\n"[..];
        let mut output = Vec::new();
        let err = normalize(
            &mut reader,
            &mut output,
            None,
            &NormalizeOptions::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteNormalization { bytes_written: 0, .. }
        ));
        assert!(output.is_empty());
    }
}
