use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::{
    config::{PipelineConfig, SubstitutionRule},
    io_utils::QuotingMode,
    naming::NameCollisionPolicy,
    schema::ColumnTypeGuess,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Normalize nulls and infer column types for bulk database loads",
    long_about = None
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rewrite null tokens to \N, decompressing and stripping VCF headers
    Normalize(NormalizeArgs),
    /// Sample a delimited file and infer one SQL type per column
    Infer(InferArgs),
    /// Merge per-chunk type maps written by `infer --chunks-out`
    Combine(CombineArgs),
    /// Show the safe identifiers for a list of column headers
    Columns(ColumnsArgs),
    /// Normalize, infer and write load plans for one or more files
    Prepare(PrepareArgs),
}

/// Options shared by every subcommand that reads delimited input.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// YAML configuration file; flags given on the command line win
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Field separator (supports ',', 'tab', ';', '|'); defaults by extension
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Token treated as a missing value; repeat to list several
    #[arg(long = "null-token", action = clap::ArgAction::Append)]
    pub null_tokens: Vec<String>,
    /// Extra rewrite applied after null substitution, as `PATTERN=>REPLACEMENT`
    #[arg(long = "substitute", action = clap::ArgAction::Append)]
    pub substitutions: Vec<SubstitutionRule>,
    /// Quote character
    #[arg(long, value_parser = parse_delimiter)]
    pub quote: Option<u8>,
    /// Whether quote characters enclose fields
    #[arg(long, value_enum)]
    pub quoting: Option<QuotingMode>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Lines preceding the header row
    #[arg(long = "skip-rows")]
    pub skip_rows: Option<usize>,
    /// Rows per sampled chunk (0 reads only the header)
    #[arg(long = "row-cap")]
    pub row_cap: Option<usize>,
    /// Maximum number of sampled chunks (0 samples the whole file)
    #[arg(long = "chunk-cap")]
    pub chunk_cap: Option<usize>,
    /// Bytes read per normalization block
    #[arg(long = "block-size")]
    pub block_size: Option<usize>,
    /// Strip VCF meta lines even without a .vcf extension
    #[arg(long, conflicts_with = "no_vcf")]
    pub vcf: bool,
    /// Never strip VCF meta lines
    #[arg(long = "no-vcf")]
    pub no_vcf: bool,
    /// Header naming collision policy
    #[arg(long = "collisions", value_enum)]
    pub collision_policy: Option<NameCollisionPolicy>,
    /// Type for columns without sampled values
    #[arg(long = "fallback-type")]
    pub fallback_type: Option<ColumnTypeGuess>,
    /// Fixed type for a column, as `COLUMN=TYPE`; repeat for several columns
    #[arg(long = "type", value_parser = parse_column_type, action = clap::ArgAction::Append)]
    pub column_types: Vec<(String, ColumnTypeGuess)>,
}

impl CommonArgs {
    /// The configuration file (or defaults) with command-line overrides applied.
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if self.delimiter.is_some() {
            config.separator = self.delimiter;
        }
        if !self.null_tokens.is_empty() {
            config.null_tokens = self.null_tokens.clone();
        }
        if !self.substitutions.is_empty() {
            config.extra_substitutions = self.substitutions.clone();
        }
        if let Some(quote) = self.quote {
            config.quote = quote;
        }
        if let Some(quoting) = self.quoting {
            config.quoting = quoting;
        }
        if self.input_encoding.is_some() {
            config.input_encoding = self.input_encoding.clone();
        }
        if let Some(skip_rows) = self.skip_rows {
            config.skip_rows = skip_rows;
        }
        if let Some(row_cap) = self.row_cap {
            config.row_cap = row_cap;
        }
        if let Some(chunk_cap) = self.chunk_cap {
            config.chunk_cap = chunk_cap;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if self.vcf {
            config.strip_vcf_header = Some(true);
        } else if self.no_vcf {
            config.strip_vcf_header = Some(false);
        }
        if let Some(policy) = self.collision_policy {
            config.collision_policy = policy;
        }
        if let Some(fallback) = self.fallback_type {
            config.fallback_type = fallback;
        }
        for (column, guess) in &self.column_types {
            config.column_types.insert(column.clone(), *guess);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Input file (.gz and .bz2 are decompressed)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination of the normalized file
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    /// Normalized (or plain) delimited file to sample
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Write the per-chunk type maps as JSON
    #[arg(long = "chunks-out")]
    pub chunks_out: Option<PathBuf>,
    /// Write the table schema as YAML
    #[arg(long = "schema-out")]
    pub schema_out: Option<PathBuf>,
    /// Table name (derived from the file name when omitted)
    #[arg(long)]
    pub table: Option<String>,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct CombineArgs {
    /// JSON files holding arrays of chunk type maps (null marks an empty chunk)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Write the merged type map as JSON instead of printing a table
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Raw header names
    pub names: Vec<String>,
    /// Read the header row of this file instead
    #[arg(short = 'i', long = "input", conflicts_with = "names")]
    pub input: Option<PathBuf>,
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Input files; each becomes one table
    #[arg(short = 'i', long = "input", required = true, action = clap::ArgAction::Append)]
    pub inputs: Vec<PathBuf>,
    /// Directory receiving normalized files, schemas, DDL and load plans
    #[arg(short = 's', long = "staging")]
    pub staging: PathBuf,
    /// Number of files prepared concurrently
    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    pub workers: usize,
    #[command(flatten)]
    pub common: CommonArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

/// Parses `COLUMN=TYPE`; the last `=` separates the type.
pub fn parse_column_type(value: &str) -> Result<(String, ColumnTypeGuess), String> {
    let (column, token) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("Column type '{value}' must look like COLUMN=TYPE"))?;
    if column.is_empty() {
        return Err("Column name cannot be empty".to_string());
    }
    let guess = token.parse::<ColumnTypeGuess>().map_err(|err| err.to_string())?;
    Ok((column.to_string(), guess))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delimiter_accepts_names_and_escapes() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("\\t"), Ok(b'\t'));
        assert_eq!(parse_delimiter("pipe"), Ok(b'|'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "loadprep",
            "normalize",
            "-i",
            "in.tsv",
            "-o",
            "out.tsv",
            "--null-token",
            "NA",
            "--null-token",
            "",
            "--row-cap",
            "5",
            "--no-vcf",
        ])
        .expect("parse");
        let Commands::Normalize(args) = cli.command else {
            panic!("expected normalize");
        };
        let config = args.common.resolve().expect("resolve");
        assert_eq!(config.null_tokens, vec!["NA", ""]);
        assert_eq!(config.row_cap, 5);
        assert_eq!(config.strip_vcf_header, Some(false));
        assert_eq!(config.chunk_cap, crate::config::DEFAULT_CHUNK_CAP);
    }

    #[test]
    fn type_flags_parse_column_and_type() {
        assert_eq!(
            parse_column_type("Score (raw)=double"),
            Ok(("Score (raw)".to_string(), ColumnTypeGuess::Double))
        );
        assert_eq!(
            parse_column_type("a=b=text"),
            Ok(("a=b".to_string(), ColumnTypeGuess::Text))
        );
        assert!(parse_column_type("score").is_err());
        assert!(parse_column_type("=integer").is_err());
        assert!(parse_column_type("score=blob").is_err());

        let cli = Cli::try_parse_from([
            "loadprep",
            "prepare",
            "-i",
            "genes.tsv",
            "-s",
            "staging",
            "--type",
            "gene_id=varchar_medium",
            "--type",
            "score=double",
        ])
        .expect("parse");
        let Commands::Prepare(args) = cli.command else {
            panic!("expected prepare");
        };
        let config = args.common.resolve().expect("resolve");
        assert_eq!(
            config.column_types.iter().collect::<Vec<_>>(),
            vec![
                ("gene_id", ColumnTypeGuess::VarcharMedium),
                ("score", ColumnTypeGuess::Double),
            ]
        );
    }

    #[test]
    fn vcf_flags_conflict() {
        let result = Cli::try_parse_from([
            "loadprep", "normalize", "-i", "a", "-o", "b", "--vcf", "--no-vcf",
        ]);
        assert!(result.is_err());
    }
}
