//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built from defaults, optionally replaced by a YAML
//! file and finally overridden by command-line flags. Nothing here is global;
//! every pipeline run receives its own copy.

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{
    cli::parse_delimiter,
    error::PipelineError,
    io_utils::{self, QuotingMode, RawFile},
    naming::{self, NameCollisionPolicy},
    normalize::{DEFAULT_BLOCK_SIZE, NormalizeOptions},
    patterns::{self, ExtraSubstitution, NullPatterns},
    printable_delimiter,
    sampler::SampleOptions,
    schema::{ColumnTypeGuess, ColumnTypeMap},
};

pub const DEFAULT_ROW_CAP: usize = 100_000;
pub const DEFAULT_CHUNK_CAP: usize = 100;

/// A textual rewrite applied after null substitution, written on the command
/// line as `PATTERN=>REPLACEMENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub pattern: String,
    pub replacement: String,
}

impl FromStr for SubstitutionRule {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (pattern, replacement) = value
            .split_once("=>")
            .ok_or_else(|| format!("Substitution '{value}' must look like PATTERN=>REPLACEMENT"))?;
        if pattern.is_empty() {
            return Err("Substitution pattern cannot be empty".to_string());
        }
        Ok(SubstitutionRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        })
    }
}

impl fmt::Display for SubstitutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=>{}", self.pattern, self.replacement)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Field separator; resolved from the file extension when unset.
    #[serde(with = "optional_byte_char")]
    pub separator: Option<u8>,
    pub null_tokens: Vec<String>,
    pub extra_substitutions: Vec<SubstitutionRule>,
    /// Rows per sampled chunk; 0 reads the header only.
    pub row_cap: usize,
    /// Maximum sampled chunks; 0 samples the whole file.
    pub chunk_cap: usize,
    /// Lines before the header row.
    pub skip_rows: usize,
    #[serde(with = "byte_char")]
    pub quote: u8,
    pub quoting: QuotingMode,
    pub block_size: usize,
    pub input_encoding: Option<String>,
    /// Forces VCF header stripping on or off; by default `.vcf` inputs are
    /// stripped.
    pub strip_vcf_header: Option<bool>,
    pub acronyms: Vec<String>,
    pub collision_policy: NameCollisionPolicy,
    /// Type given to columns for which sampling saw no values.
    pub fallback_type: ColumnTypeGuess,
    /// Fixed types keyed by safe column name or raw header; these replace
    /// the sampled type.
    pub column_types: ColumnTypeMap,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            separator: None,
            null_tokens: patterns::default_null_tokens(),
            extra_substitutions: Vec::new(),
            row_cap: DEFAULT_ROW_CAP,
            chunk_cap: DEFAULT_CHUNK_CAP,
            skip_rows: 0,
            quote: b'"',
            quoting: QuotingMode::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            input_encoding: None,
            strip_vcf_header: None,
            acronyms: naming::default_acronyms(),
            collision_policy: NameCollisionPolicy::default(),
            fallback_type: ColumnTypeGuess::VarcharShort,
            column_types: ColumnTypeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: PipelineConfig = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(anyhow!("block_size must be greater than zero"));
        }
        if let Some(separator) = self.separator
            && separator == self.quote
            && self.quoting == QuotingMode::Minimal
        {
            return Err(anyhow!(
                "Separator and quote character are both '{}'",
                printable_delimiter(separator)
            ));
        }
        Ok(())
    }

    pub fn separator_for(&self, path: &Path) -> u8 {
        io_utils::resolve_input_delimiter(path, self.separator)
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        io_utils::resolve_encoding(self.input_encoding.as_deref())
    }

    pub fn compile_patterns(&self, separator: u8) -> Result<Option<NullPatterns>, PipelineError> {
        let extras = self
            .extra_substitutions
            .iter()
            .map(|rule| ExtraSubstitution::new(&rule.pattern, &rule.replacement))
            .collect::<Result<Vec<_>, _>>()?;
        NullPatterns::build(separator, &self.null_tokens, extras)
    }

    pub fn normalize_options(&self, raw: &RawFile) -> NormalizeOptions {
        NormalizeOptions {
            block_size: self.block_size,
            strip_vcf_header: self.strip_vcf_header.unwrap_or_else(|| raw.is_vcf()),
        }
    }

    pub fn sample_options(&self, separator: u8, encoding: &'static Encoding) -> SampleOptions {
        SampleOptions {
            separator,
            quote: self.quote,
            quoting: self.quoting,
            skip_rows: self.skip_rows,
            row_cap: self.row_cap,
            chunk_cap: self.chunk_cap,
            null_tokens: self.null_tokens.clone(),
            encoding,
        }
    }
}

mod byte_char {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&printable_delimiter(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_delimiter(&text).map_err(de::Error::custom)
    }
}

mod optional_byte_char {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(byte) => serializer.serialize_some(&printable_delimiter(*byte)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| parse_delimiter(&text).map_err(de::Error::custom))
            .transpose()
    }
}
